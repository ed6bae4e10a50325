//! Time utilities for frame pacing and latency measurement

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Millisecond timestamp masked to 31 bits, the form carried in packet
/// round-trip fields. Wraps every ~24 days; latency deltas stay valid
/// because both peers mask the same way.
pub fn stamp31(millis: u64) -> u32 {
    (millis & 0x7fff_ffff) as u32
}

/// Current wall clock in seconds, the sample the scheduler consumes.
pub fn now_seconds() -> f64 {
    unix_millis() as f64 / 1000.0
}
