//! Deterministic lockstep core for a peer-to-peer multiplayer arena shooter.
//!
//! Every peer runs the identical fixed-step simulation and exchanges only
//! player inputs; convergence is established by determinism, not by an
//! authoritative server. The crate covers:
//! - the per-tick world simulation (entities, physics, combat, spawning),
//! - the event/input pipeline and wire protocol peers use to converge,
//! - the tick clock and scheduling policy,
//! - the join/synchronization bootstrap state machine,
//! - the speculative prediction/rollback controller.
//!
//! Rendering, audio, input capture and the actual peer transport are
//! external collaborators: they read world state through shared references
//! and move opaque byte buffers, nothing more.

pub mod config;
pub mod net;
pub mod session;
pub mod sim;
pub mod util;

pub use config::GameConfig;
pub use session::{GameMode, GameSession, JoinState, PeerTransport, SessionError};
pub use sim::actor::ClientId;
pub use sim::world::WorldState;
