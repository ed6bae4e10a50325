//! Peer-to-peer event exchange: buffers, wire codec, per-peer bookkeeping.

pub mod client;
pub mod events;
pub mod protocol;
