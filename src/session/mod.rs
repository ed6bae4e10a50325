//! Per-peer game session: the explicit context object owning world state,
//! peer bookkeeping, event buffers and the frame-driven update loop.
//!
//! There are no module-level singletons; several sessions can run in one
//! process (tests, replay-while-live), each fully self-contained.

pub mod clock;
pub mod join;
pub mod predict;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::config::GameConfig;
use crate::net::client::ClientState;
use crate::net::events::EventPipeline;
use crate::net::protocol::{decode_packet, encode_packet, encode_snapshot, Packet};
use crate::sim::actor::ClientId;
use crate::sim::grid::SpatialGrid;
use crate::sim::input::SPAWN;
use crate::sim::map::MapData;
use crate::sim::tick::simulate_tick;
use crate::sim::world::WorldState;
use crate::util::time::stamp31;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

pub use clock::TickClock;
pub use join::JoinState;

/// Session-level failures surfaced to the host
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("timeout error: peer {peer} can't be connected for the given time")]
    PeerTimeout { peer: ClientId },
}

/// How this session is being driven
#[derive(Debug, Clone)]
pub struct GameMode {
    /// Drive NPC players with the built-in AI
    pub run_ai: bool,
    /// Also drive client-owned players with the AI (bot/demo sessions)
    pub players_ai: bool,
    /// NPC difficulty level, index into the configured table; 0 disables
    /// NPC spawning
    pub npc_level: usize,
}

impl Default for GameMode {
    fn default() -> Self {
        Self {
            run_ai: true,
            players_ai: false,
            npc_level: 0,
        }
    }
}

/// The transport collaborator: delivers opaque buffers to named peers with
/// no ordering or delivery guarantee, and carries the "request full state"
/// bootstrap RPC. Incoming traffic is pushed back into the session through
/// [`GameSession::on_packet`] and [`GameSession::on_state_response`].
pub trait PeerTransport {
    /// Every peer known to the room, connected or not
    fn peer_ids(&self) -> Vec<ClientId>;
    fn is_connected(&self, id: ClientId) -> bool;
    fn send_packet(&mut self, to: ClientId, data: Bytes);
    /// Fire the bootstrap RPC; the response arrives via `on_state_response`
    fn request_state(&mut self, to: ClientId);
}

/// One peer's complete lockstep session.
pub struct GameSession {
    pub config: Arc<GameConfig>,
    pub mode: GameMode,
    /// Our own client id as assigned by the room
    pub local_client: ClientId,
    /// Seed shared by the room for map regeneration
    pub map_seed: u32,
    /// Seed used if this peer has to create the very first world
    pub game_seed: u32,

    pub join_state: JoinState,
    /// Next tick to simulate; `world.tick` trails it by one
    pub game_tick: u32,
    pub world: WorldState,
    pub map: MapData,
    /// Broad-phase indexes rebuilt every tick; exposed read-only to
    /// rendering collaborators
    pub players_grid: SpatialGrid,
    pub barrels_grid: SpatialGrid,

    pub events: EventPipeline,
    pub clients: HashMap<ClientId, ClientState>,
    pub clock: TickClock,

    // Respawn gating, released by the join state machine
    pub wait_to_spawn: bool,
    pub wait_to_auto_spawn: bool,
    pub allowed_to_respawn: bool,
    pub respawn_start_tick: u32,

    pub last_input_tick: u32,
    pub last_input_cmd: u32,
    /// Nearest usable weapon item under the local player this tick
    pub hot_usable: Option<u32>,
    pub processing_prediction: bool,

    pub(crate) saved_state: Option<WorldState>,
    disconnect_frames: u32,
}

impl GameSession {
    pub fn new(
        config: Arc<GameConfig>,
        local_client: ClientId,
        game_seed: u32,
        map_seed: u32,
        mode: GameMode,
    ) -> Self {
        let map = MapData::generate(map_seed, &config);
        Self {
            config,
            mode,
            local_client,
            map_seed,
            game_seed,
            join_state: JoinState::Wait,
            game_tick: 1,
            world: WorldState::new(),
            map,
            players_grid: SpatialGrid::new(),
            barrels_grid: SpatialGrid::new(),
            events: EventPipeline::default(),
            clients: HashMap::new(),
            clock: TickClock::new(),
            wait_to_spawn: false,
            wait_to_auto_spawn: false,
            allowed_to_respawn: false,
            respawn_start_tick: 0,
            last_input_tick: 0,
            last_input_cmd: 0,
            hot_usable: None,
            processing_prediction: false,
            saved_state: None,
            disconnect_frames: 0,
        }
    }

    /// Full game reset: back to `Wait` with an empty world.
    pub fn reset(&mut self) {
        self.clients.clear();
        self.events = EventPipeline::default();
        self.world = WorldState::new();
        self.world.normalize();
        self.join_state = JoinState::Wait;
        self.game_tick = 1;
        self.wait_to_spawn = false;
        self.wait_to_auto_spawn = false;
        self.allowed_to_respawn = false;
        self.clock = TickClock::new();
        self.last_input_tick = 0;
        self.last_input_cmd = 0;
        self.saved_state = None;
        self.disconnect_frames = 0;
    }

    /// The per-frame entry point. Drives the bootstrap state machine, runs
    /// every due simulation tick, records local input and fans packets out
    /// to peers. Returns the number of ticks simulated this frame.
    pub fn update(
        &mut self,
        now: f64,
        local_input: u32,
        transport: &mut dyn PeerTransport,
    ) -> Result<u32, SessionError> {
        self.clock.update_frame_time(now);

        if self.join_state <= JoinState::LoadingState {
            self.update_wait_state(transport);
        }

        let mut simulated = 0;
        if self.join_state >= JoinState::Sync {
            self.cleaning_up_clients(transport)?;
            simulated = self.run_pending_ticks(self.clock.last_frame_ts, true);
            self.check_join_sync(transport);
            self.check_player_input(local_input);
        }
        self.send_input(transport, (now * 1000.0) as u64);
        Ok(simulated)
    }

    /// Forced simulate-and-send cycle for an unfocused host: driven from the
    /// visibility-change signal instead of the frame loop so peers are not
    /// stalled while this tab is hidden.
    pub fn update_hidden(
        &mut self,
        now: f64,
        transport: &mut dyn PeerTransport,
    ) -> Result<(), SessionError> {
        self.clock.update_frame_time(now);
        if self.join_state >= JoinState::Sync {
            self.cleaning_up_clients(transport)?;
            if self.run_pending_ticks(self.clock.last_frame_ts, true) > 0 {
                self.send_input(transport, (now * 1000.0) as u64);
            }
        }
        Ok(())
    }

    /// Advance exactly one tick, bypassing the scheduler. Replay and test
    /// harness entry; normal hosts go through [`GameSession::update`].
    pub fn step_tick(&mut self) {
        simulate_tick(self, false);
    }

    /// Run every tick that is both due by wall clock and confirmed by the
    /// network horizon.
    pub(crate) fn run_pending_ticks(&mut self, ts: f64, correct: bool) -> u32 {
        let net_tick = self.min_confirmed_tick();
        let rate = self.config.net.tick_rate;
        let mut frames = self.clock.frames_due(ts, rate);
        let mut simulated = 0;
        while self.game_tick <= net_tick && frames > 0 {
            simulate_tick(self, false);
            simulated += 1;
            frames -= 1;
            // keep net_tick >= game_tick + input_delay where possible
            self.clock.advance_tick(rate);
        }
        if correct {
            self.clock
                .correct_drift(net_tick, self.game_tick - 1, ts, self.config.net.input_delay, rate);
        }

        if self.join_state >= JoinState::Joined {
            let last_tick = self.game_tick - 1;
            let min_ack = self.min_acknowledged_tick(last_tick);
            self.events.gc(last_tick, min_ack);
        }
        simulated
    }

    /// The confirmed horizon: the lowest input tick over every known peer,
    /// or the wall-clock-implied tick when playing alone.
    pub(crate) fn min_confirmed_tick(&self) -> u32 {
        let mut tick: u32 = 1 << 30;
        let mut total = 0usize;
        for client in self.clients.values() {
            total += 1;
            if tick > client.tick {
                tick = client.tick;
            }
        }
        if total == 0 {
            let rate = self.config.net.tick_rate;
            let elapsed = self.clock.frames_due(self.clock.last_frame_ts, rate).max(0);
            tick = self.game_tick + elapsed as u32;
        }
        tick
    }

    /// Lowest of our ticks every actively-playing peer has acknowledged
    fn min_acknowledged_tick(&self, mut last_tick: u32) -> u32 {
        for client in self.clients.values() {
            if client.is_playing && last_tick > client.acknowledged_tick {
                last_tick = client.acknowledged_tick;
            }
        }
        last_tick
    }

    /// The tick a fresh local input lands on: committed horizon plus input
    /// delay, or further out when the frame loop has fallen behind.
    fn next_input_tick(&self, tick: u32) -> u32 {
        let rate = self.config.net.tick_rate;
        let elapsed = self
            .clock
            .frames_due(self.clock.last_frame_ts, rate)
            .max(0) as u32;
        tick + self.config.net.input_delay.max(elapsed)
    }

    /// Record the locally captured input word for its delayed tick,
    /// injecting the one-shot respawn request when gating allows it.
    pub(crate) fn check_player_input(&mut self, raw_input: u32) {
        let player_exists = self.world.player_by_client(self.local_client).is_some();
        let mut input = if player_exists && self.join_state == JoinState::Joined {
            raw_input
        } else {
            0
        };

        if self.local_client != 0
            && !self.wait_to_spawn
            && !player_exists
            && self.join_state == JoinState::Joined
            && self.allowed_to_respawn
            && self.wait_to_auto_spawn
        {
            input |= SPAWN;
            self.wait_to_spawn = true;
            self.wait_to_auto_spawn = false;
            self.allowed_to_respawn = false;
        }

        if self.last_input_cmd != input {
            let mut input_tick = self.next_input_tick(self.game_tick);
            if input_tick <= self.last_input_tick {
                input_tick = self.last_input_tick + 1;
            }
            self.last_input_tick = input_tick;
            self.events
                .set_local_input(input_tick, self.local_client, input);
            self.last_input_cmd = input;
        }
    }

    /// Arm the respawn request; it fires on the next frame the join state
    /// machine allows it.
    pub fn request_respawn(&mut self) {
        self.wait_to_auto_spawn = true;
    }

    /// Fan out one packet per connected peer carrying every event it has
    /// not acknowledged yet.
    pub(crate) fn send_input(&mut self, transport: &mut dyn PeerTransport, now_millis: u64) {
        let last_tick = if self.join_state >= JoinState::Sync {
            self.game_tick - 1
        } else {
            0
        };
        for id in transport.peer_ids() {
            if !transport.is_connected(id) {
                continue;
            }
            let input_tick = self.next_input_tick(last_tick);
            let client = self
                .clients
                .entry(id)
                .or_insert_with(|| ClientState::new(id));
            if input_tick > client.acknowledged_tick {
                client.ts0 = stamp31(now_millis);
                let packet = Packet {
                    join_state: self.join_state,
                    received_on_sender: client.tick,
                    tick: input_tick,
                    ts0: client.ts0,
                    ts1: client.ts1,
                    events: self
                        .events
                        .unacked_local(client.acknowledged_tick, input_tick),
                };
                transport.send_packet(id, encode_packet(&packet));
            }
        }
    }

    /// Transport entry for an incoming datagram from `from`. Malformed
    /// buffers are dropped; stale packets are partially applied per the
    /// freshness/acknowledgement rules.
    pub fn on_packet(&mut self, from: ClientId, data: &[u8], now_millis: u64) {
        match decode_packet(from, data) {
            Ok(packet) => self.process_packet(from, packet, now_millis),
            Err(error) => debug!(from, %error, "dropping undecodable packet"),
        }
    }

    pub(crate) fn process_packet(&mut self, from: ClientId, packet: Packet, now_millis: u64) {
        let client = self
            .clients
            .entry(from)
            .or_insert_with(|| ClientState::new(from));
        client.ts1 = packet.ts0;
        client.lag = Some(stamp31(now_millis).wrapping_sub(packet.ts1));
        client.join_state = Some(packet.join_state);
        if !client.ready && packet.join_state >= JoinState::Sync {
            client.ready = true;
            client.tick = 0;
            client.acknowledged_tick = 0;
        }
        // freshness: ignore stale input horizons entirely
        if packet.tick > client.tick && client.ready {
            client.is_playing = true;
            let received_up_to = client.tick;
            client.tick = packet.tick;
            for event in packet.events {
                if event.tick > received_up_to {
                    self.events.push_received(event);
                }
            }
        }
        // acknowledgement advances independently of freshness
        if client.acknowledged_tick < packet.received_on_sender {
            client.acknowledged_tick = packet.received_on_sender;
        }
    }

    /// Bootstrap RPC server side: the encoded world, or `None` while this
    /// peer has nothing to share yet.
    pub fn state_snapshot_for_bootstrap(&self) -> Option<String> {
        if self.join_state < JoinState::Sync {
            return None;
        }
        Some(BASE64.encode(encode_snapshot(&self.world)))
    }

    /// Bootstrap RPC response. An empty payload means "peer has nothing
    /// yet"; a malformed one is logged and treated the same, so the state
    /// machine keeps waiting and re-requests.
    pub fn on_state_response(&mut self, from: ClientId, payload: &str) {
        let client = self
            .clients
            .entry(from)
            .or_insert_with(|| ClientState::new(from));
        client.loading_state = false;
        if payload.is_empty() {
            debug!(from, "bootstrap state is empty, will retry");
            return;
        }
        let decoded = BASE64
            .decode(payload)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                crate::net::protocol::decode_snapshot(&bytes).map_err(|e| e.to_string())
            });
        match decoded {
            Ok(state) => {
                debug!(from, tick = state.tick, "bootstrap state received");
                client.start_state = Some(state);
            }
            Err(error) => warn!(from, %error, "malformed bootstrap state, will retry"),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Loopback transport stub recording everything the session sends.
    #[derive(Default)]
    pub struct MockTransport {
        pub peers: Vec<ClientId>,
        pub disconnected: Vec<ClientId>,
        pub sent: Vec<(ClientId, Bytes)>,
        pub state_requests: Vec<ClientId>,
    }

    impl MockTransport {
        pub fn with_peers(peers: &[ClientId]) -> Self {
            Self {
                peers: peers.to_vec(),
                ..Self::default()
            }
        }
    }

    impl PeerTransport for MockTransport {
        fn peer_ids(&self) -> Vec<ClientId> {
            self.peers.clone()
        }
        fn is_connected(&self, id: ClientId) -> bool {
            self.peers.contains(&id) && !self.disconnected.contains(&id)
        }
        fn send_packet(&mut self, to: ClientId, data: Bytes) {
            self.sent.push((to, data));
        }
        fn request_state(&mut self, to: ClientId) {
            self.state_requests.push(to);
        }
    }

    pub fn session(local: ClientId) -> GameSession {
        GameSession::new(
            Arc::new(GameConfig::default()),
            local,
            0xc0ffee,
            0x5eed,
            GameMode::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::net::events::ClientEvent;

    fn fresh_packet(tick: u32, received_on_sender: u32, events: Vec<ClientEvent>) -> Packet {
        Packet {
            join_state: JoinState::Joined,
            received_on_sender,
            tick,
            ts0: 10,
            ts1: 20,
            events,
        }
    }

    #[test]
    fn stale_packet_keeps_tick_and_events_but_may_ack() {
        let mut session = test_support::session(1);
        // peer 2 catches us up to tick 100
        session.process_packet(
            2,
            fresh_packet(
                100,
                5,
                vec![ClientEvent {
                    tick: 99,
                    client: 2,
                    input: Some(1),
                }],
            ),
            0,
        );
        assert_eq!(session.clients[&2].tick, 100);
        assert_eq!(session.clients[&2].acknowledged_tick, 5);
        assert_eq!(session.events.received.len(), 1);

        // duplicate/late packet: tick not newer, but a larger ack
        session.process_packet(
            2,
            fresh_packet(
                100,
                9,
                vec![ClientEvent {
                    tick: 99,
                    client: 2,
                    input: Some(1),
                }],
            ),
            0,
        );
        assert_eq!(session.clients[&2].tick, 100, "stale tick must not move");
        assert_eq!(
            session.events.received.len(),
            1,
            "stale packet must not duplicate events"
        );
        assert_eq!(
            session.clients[&2].acknowledged_tick, 9,
            "ack is an independent monotone counter"
        );
    }

    #[test]
    fn events_below_received_horizon_are_dropped() {
        let mut session = test_support::session(1);
        session.process_packet(2, fresh_packet(50, 0, vec![]), 0);
        // new packet whose event range overlaps what we already hold
        session.process_packet(
            2,
            fresh_packet(
                60,
                0,
                vec![
                    ClientEvent {
                        tick: 45,
                        client: 2,
                        input: Some(1),
                    },
                    ClientEvent {
                        tick: 55,
                        client: 2,
                        input: Some(2),
                    },
                ],
            ),
            0,
        );
        let ticks: Vec<u32> = session.events.received.iter().map(|e| e.tick).collect();
        assert_eq!(ticks, vec![55]);
    }

    #[test]
    fn unready_peer_does_not_advance_horizon() {
        let mut session = test_support::session(1);
        let mut packet = fresh_packet(30, 0, vec![]);
        packet.join_state = JoinState::Wait;
        session.process_packet(2, packet, 0);
        assert!(!session.clients[&2].ready);
        assert_eq!(session.clients[&2].tick, 0);
    }

    #[test]
    fn solo_session_seeds_and_simulates() {
        let mut session = test_support::session(1);
        let mut transport = MockTransport::default();
        session.update(1.0, 0, &mut transport).expect("frame");
        assert_eq!(session.join_state, JoinState::Joined);
        session.update(2.0, 0, &mut transport).expect("frame");
        assert!(session.world.tick > 30, "tick {}", session.world.tick);
        assert!(!session.world.barrels.is_empty());
    }

    #[test]
    fn local_input_is_delayed_and_merged() {
        let mut session = test_support::session(1);
        let mut transport = MockTransport::default();
        session.update(1.0, 0, &mut transport).expect("frame");
        // session is joined, a spawn request is armed on the first frame;
        // by the next frames the local player exists
        session.update(1.5, 0, &mut transport).expect("frame");
        session.update(1.6, 0x8, &mut transport).expect("frame");
        let last = session.events.local.last().expect("event");
        assert!(last.tick >= session.game_tick, "input lands in the future");
    }

    #[test]
    fn hidden_host_still_advances_and_sends() {
        let mut session = test_support::session(1);
        let mut empty = MockTransport::default();
        session.update(1.0, 0, &mut empty).expect("frame");

        // tab goes hidden; a forced cycle keeps peers fed
        let mut transport = MockTransport::with_peers(&[2]);
        session.update_hidden(2.0, &mut transport).expect("hidden");
        assert!(session.world.tick > 60, "tick {}", session.world.tick);
        assert!(!transport.sent.is_empty(), "hidden cycle still sends input");
    }

    #[test]
    fn peer_timeout_surfaces_terminal_error() {
        let mut session = test_support::session(1);
        let mut transport = MockTransport::with_peers(&[2]);
        session.join_state = JoinState::Joined;
        session.clients.insert(2, {
            let mut c = ClientState::new(2);
            c.ready = true;
            c
        });
        transport.disconnected.push(2);
        session.config = Arc::new({
            let mut cfg = GameConfig::default();
            cfg.net.peer_timeout_frames = 3;
            cfg
        });
        let mut result = Ok(0);
        for frame in 0..10 {
            result = session.update(1.0 + frame as f64 * 0.016, 0, &mut transport);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(SessionError::PeerTimeout { peer: 2 })));
    }
}
