//! Per-peer bookkeeping, tracked outside the simulation snapshot.

use crate::session::JoinState;
use crate::sim::actor::ClientId;
use crate::sim::world::WorldState;

/// What we know about one remote peer. This is transport-side state, never
/// serialized and never part of the deterministic world.
#[derive(Debug, Clone, Default)]
pub struct ClientState {
    pub id: ClientId,
    /// Highest input horizon fully received from this peer
    pub tick: u32,
    /// Highest of our ticks this peer has confirmed receiving
    pub acknowledged_tick: u32,
    /// Round-trip stamps: last stamp we sent them / last stamp they sent us
    pub ts0: u32,
    pub ts1: u32,
    /// Estimated one-way latency in milliseconds
    pub lag: Option<u32>,
    /// Join state the peer last reported
    pub join_state: Option<JoinState>,
    /// The peer has reached Sync at least once; its freshness counters are
    /// live from that point on
    pub ready: bool,
    /// The peer is actively feeding us events
    pub is_playing: bool,
    /// A bootstrap snapshot request to this peer is in flight
    pub loading_state: bool,
    /// Bootstrap snapshot received from this peer, waiting for adoption
    pub start_state: Option<WorldState>,
}

impl ClientState {
    pub fn new(id: ClientId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}
