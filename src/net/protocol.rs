//! Wire codec: packets and full-state snapshots as flat little-endian
//! 32-bit integer sequences.
//!
//! The transport moves opaque byte buffers with no ordering or delivery
//! guarantee; everything here must tolerate truncated, duplicated and stale
//! data by returning an error (never panicking) and letting the session
//! layer decide what to ignore.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::session::JoinState;
use crate::sim::actor::{
    Actor, ActorKind, BulletActor, ClientId, ItemActor, PlayerActor, PlayerStat,
};
use crate::sim::world::WorldState;

use super::events::ClientEvent;

/// One peer-to-peer datagram: join state, acknowledgement bookkeeping,
/// round-trip timestamps and the sender's unacknowledged events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub join_state: JoinState,
    /// Highest tick the sender has fully received from us (our ack)
    pub received_on_sender: u32,
    /// The sender's input horizon; packets at or below the previously
    /// recorded horizon are stale
    pub tick: u32,
    // Round-trip timestamps, 31-bit masked milliseconds
    pub ts0: u32,
    pub ts1: u32,
    pub events: Vec<ClientEvent>,
}

/// Protocol decode errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("buffer truncated")]
    Truncated,

    #[error("invalid join state {0}")]
    BadJoinState(i32),

    #[error("implausible element count {0}")]
    BadCount(i32),
}

const EVENT_HAS_INPUT: i32 = 1;

pub fn encode_packet(packet: &Packet) -> Bytes {
    let mut buf = BytesMut::with_capacity(24 + packet.events.len() * 12);
    buf.put_i32_le(packet.join_state as i32);
    buf.put_i32_le(packet.received_on_sender as i32);
    buf.put_i32_le(packet.tick as i32);
    buf.put_i32_le(packet.ts0 as i32);
    buf.put_i32_le(packet.ts1 as i32);
    buf.put_i32_le(packet.events.len() as i32);
    for event in &packet.events {
        buf.put_i32_le(event.tick as i32);
        buf.put_i32_le(if event.input.is_some() { EVENT_HAS_INPUT } else { 0 });
        buf.put_i32_le(event.input.unwrap_or(0) as i32);
    }
    buf.freeze()
}

/// Decode a packet sent by `from`. Events do not carry a client id on the
/// wire; the sender's id from the transport envelope is stamped in here.
pub fn decode_packet(from: ClientId, mut buf: &[u8]) -> Result<Packet, ProtocolError> {
    let join_state = JoinState::try_from(read_i32(&mut buf)?)?;
    let received_on_sender = read_i32(&mut buf)? as u32;
    let tick = read_i32(&mut buf)? as u32;
    let ts0 = read_i32(&mut buf)? as u32;
    let ts1 = read_i32(&mut buf)? as u32;
    let count = read_count(&mut buf, 12)?;
    let mut events = Vec::with_capacity(count);
    for _ in 0..count {
        let event_tick = read_i32(&mut buf)? as u32;
        let flags = read_i32(&mut buf)?;
        let input = read_i32(&mut buf)? as u32;
        events.push(ClientEvent {
            tick: event_tick,
            client: from,
            input: (flags & EVENT_HAS_INPUT != 0).then_some(input),
        });
    }
    Ok(Packet {
        join_state,
        received_on_sender,
        tick,
        ts0,
        ts1,
        events,
    })
}

/// Snapshot layout: header `(next_id, tick, seed)`, then the four entity
/// collections (count-prefixed, fixed field order), then the score triples.
pub fn encode_snapshot(world: &WorldState) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_i32_le(world.next_id as i32);
    buf.put_i32_le(world.tick as i32);
    buf.put_i32_le(world.seed as i32);

    buf.put_i32_le(world.players.len() as i32);
    for p in &world.players {
        put_actor(&mut buf, &p.base);
        buf.put_i32_le(p.client);
        buf.put_i32_le(p.input as i32);
        buf.put_i32_le(p.trig as i32);
        buf.put_i32_le(p.mags as i32);
        buf.put_i32_le(p.detune as i32);
        buf.put_i32_le(p.clip_reload as i32);
        buf.put_i32_le(p.weapon as i32);
        buf.put_i32_le(p.clip_ammo as i32);
        buf.put_i32_le(p.weapon2 as i32);
        buf.put_i32_le(p.clip_ammo2 as i32);
    }

    buf.put_i32_le(world.barrels.len() as i32);
    for b in &world.barrels {
        put_actor(&mut buf, b);
    }

    buf.put_i32_le(world.bullets.len() as i32);
    for b in &world.bullets {
        put_actor(&mut buf, &b.base);
        buf.put_i32_le(b.owner);
        match b.ray_end {
            Some((x1, y1)) => {
                buf.put_i32_le(1);
                buf.put_i32_le(x1);
                buf.put_i32_le(y1);
            }
            None => {
                buf.put_i32_le(0);
                buf.put_i32_le(0);
                buf.put_i32_le(0);
            }
        }
    }

    buf.put_i32_le(world.items.len() as i32);
    for i in &world.items {
        put_actor(&mut buf, &i.base);
        buf.put_i32_le(i.item_weapon as i32);
        buf.put_i32_le(i.item_weapon_ammo as i32);
    }

    buf.put_i32_le(world.stats.len() as i32);
    for (client, stat) in &world.stats {
        buf.put_i32_le(*client);
        buf.put_i32_le(stat.frags as i32);
        buf.put_i32_le(stat.scores as i32);
    }
    buf.freeze()
}

pub fn decode_snapshot(mut buf: &[u8]) -> Result<WorldState, ProtocolError> {
    let mut world = WorldState::new();
    world.next_id = read_i32(&mut buf)? as u32;
    world.tick = read_i32(&mut buf)? as u32;
    world.seed = read_i32(&mut buf)? as u32;

    let players = read_count(&mut buf, (13 + 10) * 4)?;
    for _ in 0..players {
        let base = get_actor(&mut buf, ActorKind::Player)?;
        world.players.push(PlayerActor {
            base,
            client: read_i32(&mut buf)?,
            input: read_i32(&mut buf)? as u32,
            trig: read_i32(&mut buf)? as u8,
            mags: read_i32(&mut buf)? as u8,
            detune: read_i32(&mut buf)? as u8,
            clip_reload: read_i32(&mut buf)? as u8,
            weapon: read_i32(&mut buf)? as u8,
            clip_ammo: read_i32(&mut buf)? as u8,
            weapon2: read_i32(&mut buf)? as u8,
            clip_ammo2: read_i32(&mut buf)? as u8,
        });
    }

    let barrels = read_count(&mut buf, 13 * 4)?;
    for _ in 0..barrels {
        let barrel = get_actor(&mut buf, ActorKind::Barrel)?;
        world.barrels.push(barrel);
    }

    let bullets = read_count(&mut buf, (13 + 4) * 4)?;
    for _ in 0..bullets {
        let base = get_actor(&mut buf, ActorKind::Bullet)?;
        let owner = read_i32(&mut buf)?;
        let has_end = read_i32(&mut buf)?;
        let x1 = read_i32(&mut buf)?;
        let y1 = read_i32(&mut buf)?;
        world.bullets.push(BulletActor {
            base,
            owner,
            ray_end: (has_end != 0).then_some((x1, y1)),
        });
    }

    let items = read_count(&mut buf, (13 + 2) * 4)?;
    for _ in 0..items {
        let base = get_actor(&mut buf, ActorKind::Item)?;
        world.items.push(ItemActor {
            base,
            item_weapon: read_i32(&mut buf)? as u8,
            item_weapon_ammo: read_i32(&mut buf)? as u8,
        });
    }

    let stats = read_count(&mut buf, 12)?;
    for _ in 0..stats {
        let client = read_i32(&mut buf)?;
        let frags = read_i32(&mut buf)? as u32;
        let scores = read_i32(&mut buf)? as u32;
        world.stats.insert(client, PlayerStat { frags, scores });
    }
    Ok(world)
}

fn put_actor(buf: &mut BytesMut, a: &Actor) {
    buf.put_i32_le(a.id as i32);
    buf.put_i32_le(a.subtype as i32);
    buf.put_i32_le(a.x);
    buf.put_i32_le(a.y);
    buf.put_i32_le(a.z);
    buf.put_i32_le(a.u);
    buf.put_i32_le(a.v);
    buf.put_i32_le(a.w);
    buf.put_i32_le(a.hp as i32);
    buf.put_i32_le(a.sp as i32);
    buf.put_i32_le(a.lifetime as i32);
    buf.put_i32_le(a.anim0 as i32);
    buf.put_i32_le(a.anim_hit as i32);
}

fn get_actor(buf: &mut &[u8], kind: ActorKind) -> Result<Actor, ProtocolError> {
    Ok(Actor {
        id: read_i32(buf)? as u32,
        kind,
        subtype: read_i32(buf)? as u8,
        x: read_i32(buf)?,
        y: read_i32(buf)?,
        z: read_i32(buf)?,
        u: read_i32(buf)?,
        v: read_i32(buf)?,
        w: read_i32(buf)?,
        hp: read_i32(buf)? as u8,
        sp: read_i32(buf)? as u8,
        lifetime: read_i32(buf)? as u8,
        anim0: read_i32(buf)? as u8,
        anim_hit: read_i32(buf)? as u8,
        local_flags: 0,
    })
}

fn read_i32(buf: &mut &[u8]) -> Result<i32, ProtocolError> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.get_i32_le())
}

/// Read a count prefix, rejecting values the remaining buffer cannot hold
fn read_count(buf: &mut &[u8], record_bytes: usize) -> Result<usize, ProtocolError> {
    let count = read_i32(buf)?;
    if count < 0 || count as usize * record_bytes > buf.remaining() {
        return Err(ProtocolError::BadCount(count));
    }
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_round_trips_and_stamps_sender() {
        let packet = Packet {
            join_state: JoinState::Joined,
            received_on_sender: 41,
            tick: 50,
            ts0: 1111,
            ts1: 2222,
            events: vec![
                ClientEvent {
                    tick: 45,
                    client: 0,
                    input: Some(0x1234),
                },
                ClientEvent {
                    tick: 46,
                    client: 0,
                    input: None,
                },
            ],
        };
        let bytes = encode_packet(&packet);
        let decoded = decode_packet(9, &bytes).expect("decode");
        assert_eq!(decoded.join_state, JoinState::Joined);
        assert_eq!(decoded.tick, 50);
        assert_eq!(decoded.events.len(), 2);
        assert!(decoded.events.iter().all(|e| e.client == 9));
        assert_eq!(decoded.events[0].input, Some(0x1234));
        assert_eq!(decoded.events[1].input, None);
    }

    #[test]
    fn truncated_packet_is_an_error_not_a_panic() {
        let packet = Packet {
            join_state: JoinState::Sync,
            received_on_sender: 0,
            tick: 1,
            ts0: 0,
            ts1: 0,
            events: vec![],
        };
        let bytes = encode_packet(&packet);
        for len in 0..bytes.len() {
            assert!(decode_packet(1, &bytes[..len]).is_err());
        }
    }

    #[test]
    fn hostile_event_count_is_rejected() {
        let mut buf = BytesMut::new();
        for _ in 0..5 {
            buf.put_i32_le(0);
        }
        buf.put_i32_le(i32::MAX);
        assert!(matches!(
            decode_packet(1, &buf),
            Err(ProtocolError::BadCount(_))
        ));
    }

    #[test]
    fn snapshot_survives_a_populated_world() {
        use crate::sim::actor::*;
        use rand::SeedableRng;
        use rand_chacha::ChaCha8Rng;

        let mut rng = ChaCha8Rng::seed_from_u64(77);
        let mut world = WorldState::new();
        let mut p = PlayerActor::new(&mut rng);
        p.client = 3;
        p.base.hp = 9;
        p.weapon = 2;
        p.clip_ammo = 7;
        world.push_player(p);
        let mut barrel = Actor::new(ActorKind::Barrel, &mut rng);
        barrel.hp = 10;
        barrel.x = 4242;
        world.push_barrel(barrel);
        let mut bullet = BulletActor::new(-5, 6, &mut rng);
        bullet.ray_end = Some((100, 200));
        world.push_bullet(bullet);
        let mut item = ItemActor::new(item_type::WEAPON | item_type::AMMO, 200, &mut rng);
        item.item_weapon = 4;
        world.push_item(item);
        world.stats.insert(3, PlayerStat { frags: 2, scores: 11 });
        world.tick = 500;
        world.seed = 0xdead_beef;
        world.normalize();

        let decoded = decode_snapshot(&encode_snapshot(&world)).expect("decode");
        assert_eq!(decoded, world);
    }
}
