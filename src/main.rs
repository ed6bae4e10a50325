//! Bot arena - headless lockstep demo host
//!
//! Runs several in-process peers over a loopback transport: the first peer
//! seeds a fresh world, the others join through the bootstrap snapshot RPC,
//! and from then on every peer advances its own deterministic simulation
//! fed only by exchanged input events. AI drives all players. A periodic
//! checksum line makes divergence (which should never happen) visible.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arena_game_core::net::protocol::encode_snapshot;
use arena_game_core::session::{GameMode, GameSession, PeerTransport};
use arena_game_core::sim::actor::ClientId;
use arena_game_core::util::time::unix_millis;
use arena_game_core::GameConfig;

/// Peers in the demo room
const PEER_COUNT: ClientId = 3;
/// Frames after which the next peer joins the room
const JOIN_STAGGER_FRAMES: u64 = 120;

enum HubMsg {
    Packet { from: ClientId, data: Bytes },
    StateRequest { from: ClientId },
    StateResponse { from: ClientId, payload: String },
}

/// Loopback "network": one unbounded inbox per registered peer
#[derive(Default)]
struct Hub {
    inboxes: DashMap<ClientId, mpsc::UnboundedSender<HubMsg>>,
}

impl Hub {
    fn deliver(&self, to: ClientId, msg: HubMsg) {
        if let Some(tx) = self.inboxes.get(&to) {
            let _ = tx.send(msg);
        }
    }
}

struct HubTransport<'a> {
    hub: &'a Hub,
    local: ClientId,
}

impl PeerTransport for HubTransport<'_> {
    fn peer_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self
            .hub
            .inboxes
            .iter()
            .map(|entry| *entry.key())
            .filter(|id| *id != self.local)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn is_connected(&self, id: ClientId) -> bool {
        self.hub.inboxes.contains_key(&id)
    }

    fn send_packet(&mut self, to: ClientId, data: Bytes) {
        self.hub.deliver(
            to,
            HubMsg::Packet {
                from: self.local,
                data,
            },
        );
    }

    fn request_state(&mut self, to: ClientId) {
        self.hub.deliver(to, HubMsg::StateRequest { from: self.local });
    }
}

struct Peer {
    id: ClientId,
    session: GameSession,
    rx: mpsc::UnboundedReceiver<HubMsg>,
    /// Inbox sender, parked here until the peer's join frame registers it
    /// with the hub
    parked_tx: Option<mpsc::UnboundedSender<HubMsg>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!(%path, "loading configuration");
            Arc::new(GameConfig::from_file(&path).context("loading game config")?)
        }
        None => Arc::new(GameConfig::default()),
    };

    let game_seed: u32 = rand::random();
    let map_seed: u32 = rand::random();
    info!(game_seed, map_seed, peers = PEER_COUNT, "starting bot arena");

    let hub = Hub::default();
    let mode = GameMode {
        run_ai: true,
        players_ai: true,
        npc_level: 2,
    };

    let mut pending: Vec<Peer> = (1..=PEER_COUNT)
        .map(|id| {
            let (tx, rx) = mpsc::unbounded_channel();
            let session = GameSession::new(config.clone(), id, game_seed, map_seed, mode.clone());
            Peer {
                id,
                session,
                rx,
                parked_tx: Some(tx),
            }
        })
        .collect();
    pending.reverse();

    // the first peer is alone in the room and seeds the world
    let mut first = pending.pop().expect("first peer");
    hub.inboxes
        .insert(first.id, first.parked_tx.take().expect("sender"));
    let mut peers: Vec<Peer> = vec![first];

    let start = Instant::now();
    let mut interval = tokio::time::interval(Duration::from_millis(16));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut frame: u64 = 0;
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut ctrl_c => {
                info!("interrupted, shutting down");
                break;
            }
        }
        frame += 1;
        let now = start.elapsed().as_secs_f64();

        // stagger late joiners into the room
        if !pending.is_empty() && frame % JOIN_STAGGER_FRAMES == 0 {
            let mut peer = pending.pop().expect("pending peer");
            info!(peer = peer.id, "peer joins the room");
            hub.inboxes
                .insert(peer.id, peer.parked_tx.take().expect("sender"));
            peers.push(peer);
        }

        for peer in &mut peers {
            drain_inbox(peer, &hub);
            let mut transport = HubTransport {
                hub: &hub,
                local: peer.id,
            };
            if let Err(error) = peer.session.update(now, 0, &mut transport) {
                warn!(peer = peer.id, %error, "session failed");
                return Err(error.into());
            }
        }

        if frame % 300 == 0 {
            report(&peers);
        }
    }

    report(&peers);
    Ok(())
}

fn drain_inbox(peer: &mut Peer, hub: &Hub) {
    let now_millis = unix_millis();
    while let Ok(msg) = peer.rx.try_recv() {
        match msg {
            HubMsg::Packet { from, data } => peer.session.on_packet(from, &data, now_millis),
            HubMsg::StateRequest { from } => {
                let payload = peer
                    .session
                    .state_snapshot_for_bootstrap()
                    .unwrap_or_default();
                hub.deliver(
                    from,
                    HubMsg::StateResponse {
                        from: peer.id,
                        payload,
                    },
                );
            }
            HubMsg::StateResponse { from, payload } => {
                peer.session.on_state_response(from, &payload);
            }
        }
    }
}

/// Log one status line per peer and flag any divergence between peers whose
/// committed tick coincides.
fn report(peers: &[Peer]) {
    let mut checksums: Vec<(u32, u64, ClientId)> = Vec::new();
    for peer in peers {
        let world = &peer.session.world;
        let mut hasher = DefaultHasher::new();
        let snapshot = encode_snapshot(world);
        snapshot[..].hash(&mut hasher);
        let checksum = hasher.finish();
        let scores: Vec<String> = world
            .stats
            .iter()
            .map(|(client, stat)| format!("{}:{}f/{}s", client, stat.frags, stat.scores))
            .collect();
        info!(
            peer = peer.id,
            state = ?peer.session.join_state,
            tick = world.tick,
            players = world.players.len(),
            checksum = %format!("{checksum:016x}"),
            scores = %scores.join(" "),
            "status"
        );
        checksums.push((world.tick, checksum, peer.id));
    }
    for pair in checksums.windows(2) {
        if pair[0].0 == pair[1].0 && pair[0].1 != pair[1].1 {
            warn!(
                tick = pair[0].0,
                a = pair[0].2,
                b = pair[1].2,
                "DESYNC: peers disagree at the same tick"
            );
        }
    }
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
