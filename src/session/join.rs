//! Join/synchronization state machine.
//!
//! `Wait -> LoadingState -> Sync -> Joined`, strictly forward; only a full
//! game reset returns to `Wait`. A peer with no neighbours seeds a brand-new
//! world; otherwise it requests snapshots, adopts the one with the highest
//! tick, fast-forwards buffered ticks and gates full participation until
//! every live peer reports itself as actively playing.

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, trace};

use crate::net::client::ClientState;
use crate::net::protocol::ProtocolError;
use crate::sim::actor::{Actor, ActorKind, ClientId};
use crate::sim::map::MapData;
use crate::sim::world::WorldState;
use crate::sim::TILE_WORLD;

use super::{GameSession, PeerTransport, SessionError};

/// Bootstrap progress of a peer (also carried in every packet header)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum JoinState {
    /// No confirmed world state yet
    #[default]
    Wait = 0,
    /// A snapshot request is in flight
    LoadingState = 1,
    /// World known, peer readiness not yet mutually confirmed
    Sync = 2,
    /// Steady state: local input is transmitted and consumed normally
    Joined = 3,
}

impl TryFrom<i32> for JoinState {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(JoinState::Wait),
            1 => Ok(JoinState::LoadingState),
            2 => Ok(JoinState::Sync),
            3 => Ok(JoinState::Joined),
            other => Err(ProtocolError::BadJoinState(other)),
        }
    }
}

impl GameSession {
    /// Drive the `Wait`/`LoadingState` phase: seed a fresh world when alone,
    /// otherwise poll peers for bootstrap snapshots and adopt the best one.
    pub(crate) fn update_wait_state(&mut self, transport: &mut dyn PeerTransport) {
        let peers = transport.peer_ids();
        if peers.is_empty() {
            self.create_seed_world();
            return;
        }

        let mut best: Option<(u32, ClientId)> = None;
        for id in peers {
            if !transport.is_connected(id) {
                continue;
            }
            let client = self
                .clients
                .entry(id)
                .or_insert_with(|| ClientState::new(id));
            if !client.loading_state && client.start_state.is_none() {
                info!(peer = id, "requesting bootstrap state");
                client.loading_state = true;
                self.join_state = JoinState::LoadingState;
                transport.request_state(id);
            }
            if let Some(state) = &client.start_state {
                if best.map_or(true, |(tick, _)| state.tick > tick) {
                    best = Some((state.tick, id));
                }
            }
        }

        if let Some((tick, owner)) = best {
            info!(tick, owner, "adopting bootstrap state");
            if let Some(state) = self
                .clients
                .get_mut(&owner)
                .and_then(|c| c.start_state.take())
            {
                self.adopt_world(state);
            }
        }
    }

    /// First peer of a room: deterministically seed a brand-new world.
    pub(crate) fn create_seed_world(&mut self) {
        info!(seed = self.game_seed, "creating initial game state (first peer)");
        self.join_state = JoinState::Sync;
        self.game_tick = 1;
        self.world = WorldState::new();
        self.world.seed = self.game_seed;
        self.map = MapData::generate(self.map_seed, &self.config);

        // initial barrels occupy item slots
        let mut rng = ChaCha8Rng::seed_from_u64(self.world.seed as u64);
        let barrels = self.config.barrels.clone();
        for _ in 0..barrels.init_count {
            if self.map.item_slots.is_empty() {
                break;
            }
            let slot = self
                .map
                .item_slots
                .remove(rng.gen_range(0..self.map.item_slots.len()));
            let mut barrel = Actor::new(ActorKind::Barrel, &mut rng);
            barrel.hp = barrels.hp_min
                + if barrels.hp_max > barrels.hp_min {
                    rng.gen_range(0..barrels.hp_max - barrels.hp_min)
                } else {
                    0
                };
            barrel.subtype = rng.gen_range(0..2);
            barrel.x = slot.0 * TILE_WORLD;
            barrel.y = slot.1 * TILE_WORLD;
            self.world.push_barrel(barrel);
        }
        self.world.seed = rng.next_u32();
        self.world.normalize();
    }

    /// Replace the local world with a peer's snapshot, reset the scheduler
    /// reference, prune stale events and fast-forward any buffered ticks.
    pub(crate) fn adopt_world(&mut self, mut state: WorldState) {
        self.join_state = JoinState::Sync;
        let prev_tick = self.game_tick;
        self.game_tick = state.tick + 1;
        let tick_delta = prev_tick.saturating_sub(self.game_tick);
        debug!(
            tick_delta,
            new_tick = self.game_tick,
            prev_tick,
            "bootstrap state installed"
        );
        let rate = self.config.net.tick_rate as f64;
        self.clock.prev_time = self.clock.last_frame_ts - tick_delta as f64 / rate;

        state.normalize();
        self.world = state;
        self.map = MapData::generate(self.map_seed, &self.config);
        self.last_input_tick = self.world.tick + 1 + self.config.net.input_delay;
        self.events.reset_for_adoption(self.world.tick);

        let processed = self.run_pending_ticks(self.clock.last_frame_ts, false);
        debug!(processed, "fast-forwarded buffered ticks");
    }

    /// Transition `Sync -> Joined` once every connected, transport-live peer
    /// reports itself actively playing. Entering `Joined` releases respawn
    /// gating.
    pub(crate) fn check_join_sync(&mut self, transport: &dyn PeerTransport) {
        if self.join_state != JoinState::Sync {
            return;
        }
        for id in transport.peer_ids() {
            if transport.is_connected(id) {
                match self.clients.get(&id) {
                    Some(client) if client.is_playing => {}
                    _ => {
                        trace!(peer = id, "syncing...");
                        return;
                    }
                }
            } else {
                trace!(peer = id, "still connecting...");
                return;
            }
        }
        info!("all peers in sync");
        self.join_state = JoinState::Joined;
        self.wait_to_spawn = false;
        self.wait_to_auto_spawn = true;
        self.allowed_to_respawn = true;
        // event-history recording (external collaborator) starts here
    }

    /// Drop bookkeeping for peers gone from the transport and watch for a
    /// ready peer staying unreachable past the configured timeout. A peer
    /// that disconnects mid-`Sync` simply stops being counted; only a
    /// sustained outage of a once-ready peer is terminal.
    pub(crate) fn cleaning_up_clients(
        &mut self,
        transport: &dyn PeerTransport,
    ) -> Result<(), SessionError> {
        let live = transport.peer_ids();
        self.clients.retain(|id, _| live.contains(id));

        if self.join_state >= JoinState::Sync {
            for id in &live {
                let ready = self.clients.get(id).map_or(false, |c| c.ready);
                if ready && !transport.is_connected(*id) {
                    self.disconnect_frames += 1;
                    if self.disconnect_frames > self.config.net.peer_timeout_frames {
                        return Err(SessionError::PeerTimeout { peer: *id });
                    }
                    return Ok(());
                }
            }
        }
        self.disconnect_frames = 0;
        Ok(())
    }
}
