//! Two peers, one seeded and one bootstrapped, exchanging packets over a
//! deliberately unfriendly loopback router (latency jitter, reordering,
//! duplication). Lockstep correctness means: whenever both peers have
//! committed the same tick, their snapshots are byte-identical.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use arena_game_core::net::protocol::encode_snapshot;
use arena_game_core::session::{GameMode, GameSession, PeerTransport};
use arena_game_core::sim::actor::ClientId;
use arena_game_core::GameConfig;

enum Msg {
    Packet { from: ClientId, data: Bytes },
    StateRequest { from: ClientId },
    StateResponse { from: ClientId, payload: String },
}

/// Messages in flight: (deliver_at_frame, to, message)
type Wire = Vec<(u64, ClientId, Msg)>;

struct RouterTransport<'a> {
    local: ClientId,
    peers: Vec<ClientId>,
    staged: &'a mut Vec<(ClientId, Msg)>,
}

impl PeerTransport for RouterTransport<'_> {
    fn peer_ids(&self) -> Vec<ClientId> {
        self.peers.clone()
    }
    fn is_connected(&self, id: ClientId) -> bool {
        self.peers.contains(&id)
    }
    fn send_packet(&mut self, to: ClientId, data: Bytes) {
        self.staged.push((
            to,
            Msg::Packet {
                from: self.local,
                data,
            },
        ));
    }
    fn request_state(&mut self, to: ClientId) {
        self.staged.push((to, Msg::StateRequest { from: self.local }));
    }
}

fn bot_session(id: ClientId) -> GameSession {
    GameSession::new(
        Arc::new(GameConfig::default()),
        id,
        0xfeed_f00d,
        0xab5eed,
        GameMode {
            run_ai: true,
            players_ai: true,
            npc_level: 2,
        },
    )
}

#[test]
fn two_peers_converge_over_lossy_transport() {
    const JOIN_FRAME: u64 = 60;
    const TOTAL_FRAMES: u64 = 600;
    const FRAME_DT: f64 = 1.0 / 60.0;

    let mut a = bot_session(1);
    let mut b = bot_session(2);

    let mut wire: Wire = Vec::new();
    let mut seq: u64 = 0;

    // per-peer history: committed tick -> snapshot bytes
    let mut history: [BTreeMap<u32, Bytes>; 2] = [BTreeMap::new(), BTreeMap::new()];

    for frame in 0..TOTAL_FRAMES {
        let now = frame as f64 * FRAME_DT;
        let b_active = frame >= JOIN_FRAME;

        // deliver everything due this frame (order scrambled by jitter)
        let due = take_due(&mut wire, frame);
        let mut responses: Vec<(ClientId, Msg)> = Vec::new();
        for (_, to, msg) in due {
            let session = if to == 1 { &mut a } else { &mut b };
            match msg {
                Msg::Packet { from, data } => {
                    session.on_packet(from, &data, (now * 1000.0) as u64)
                }
                Msg::StateRequest { from } => {
                    let payload = session.state_snapshot_for_bootstrap().unwrap_or_default();
                    responses.push((
                        from,
                        Msg::StateResponse {
                            from: to,
                            payload,
                        },
                    ));
                }
                Msg::StateResponse { from, payload } => {
                    session.on_state_response(from, &payload)
                }
            }
        }
        enqueue(&mut wire, &mut seq, frame, responses);

        // drive both sessions, staging their outgoing traffic
        let mut staged: Vec<(ClientId, Msg)> = Vec::new();
        {
            let mut transport = RouterTransport {
                local: 1,
                peers: if b_active { vec![2] } else { vec![] },
                staged: &mut staged,
            };
            a.update(now, 0, &mut transport).expect("peer A frame");
        }
        if b_active {
            let mut transport = RouterTransport {
                local: 2,
                peers: vec![1],
                staged: &mut staged,
            };
            b.update(now, 0, &mut transport).expect("peer B frame");
        }
        enqueue(&mut wire, &mut seq, frame, staged);

        history[0]
            .entry(a.world.tick)
            .or_insert_with(|| encode_snapshot(&a.world));
        if b_active {
            history[1]
                .entry(b.world.tick)
                .or_insert_with(|| encode_snapshot(&b.world));
        }
    }

    // both peers must have made real progress past the bootstrap
    let last_a = *history[0].keys().last().expect("peer A ticks");
    let last_b = *history[1].keys().last().expect("peer B ticks");
    assert!(last_a > 120, "peer A stalled at {last_a}");
    assert!(last_b > 120, "peer B stalled at {last_b}");

    // every commonly committed tick must match bit for bit
    let mut compared = 0;
    for (tick, snapshot) in &history[0] {
        if let Some(other) = history[1].get(tick) {
            assert_eq!(snapshot, other, "desync at tick {tick}");
            compared += 1;
        }
    }
    assert!(
        compared > 50,
        "expected a long run of common ticks, got {compared}"
    );
}

/// Stage messages onto the wire with jittered latency and an occasional
/// duplicate, exercising the stale/duplicate tolerance of the protocol.
fn enqueue(wire: &mut Wire, seq: &mut u64, frame: u64, staged: Vec<(ClientId, Msg)>) {
    for (to, msg) in staged {
        *seq += 1;
        let latency = 2 + (*seq % 4); // 2..5 frames, reorders constantly
        if *seq % 6 == 0 {
            if let Msg::Packet { from, data } = &msg {
                wire.push((
                    frame + latency + 2,
                    to,
                    Msg::Packet {
                        from: *from,
                        data: data.clone(),
                    },
                ));
            }
        }
        wire.push((frame + latency, to, msg));
    }
}

fn take_due(wire: &mut Wire, frame: u64) -> Vec<(u64, ClientId, Msg)> {
    let mut due = Vec::new();
    let mut keep: Wire = Vec::with_capacity(wire.len());
    for entry in wire.drain(..) {
        if entry.0 <= frame {
            due.push(entry);
        } else {
            keep.push(entry);
        }
    }
    *wire = keep;
    due
}
