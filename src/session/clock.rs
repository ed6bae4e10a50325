//! Tick clock: decides how many simulation steps are due each frame and
//! keeps the reference time tracking wall clock without visible jumps.

/// Frame-time bookkeeping for one session. `prev_time` is the reference
/// instant of the next uncommitted tick; wall-clock samples are compared
/// against it to derive how many whole ticks have elapsed.
#[derive(Debug, Clone, Default)]
pub struct TickClock {
    /// Highest wall-clock sample seen, seconds
    pub last_frame_ts: f64,
    /// Reference time of the local commit horizon, seconds
    pub prev_time: f64,
}

impl TickClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic frame-time update; stale samples are ignored
    pub fn update_frame_time(&mut self, ts: f64) {
        if ts > self.last_frame_ts {
            self.last_frame_ts = ts;
        }
    }

    /// Whole ticks elapsed between the reference time and `ts`
    pub fn frames_due(&self, ts: f64, tick_rate: u32) -> i64 {
        ((ts - self.prev_time) * tick_rate as f64) as i64
    }

    /// Move the reference forward by one tick period after a simulated tick
    pub fn advance_tick(&mut self, tick_rate: u32) {
        self.prev_time += 1.0 / tick_rate as f64;
    }

    /// Drift correction. When the confirmed horizon coincides with the local
    /// commit and the reference has fallen more than one input delay behind
    /// wall clock, ease it toward wall clock (exponential smoothing, not a
    /// step). When the horizon is comfortably ahead, step the reference back
    /// one period so local catch-up slows down.
    pub fn correct_drift(
        &mut self,
        net_tick: u32,
        last_committed: u32,
        ts: f64,
        input_delay: u32,
        tick_rate: u32,
    ) {
        let delay_span = input_delay as f64 / tick_rate as f64;
        if net_tick == last_committed && ts - self.prev_time > delay_span {
            self.prev_time = lerp(self.prev_time, ts - delay_span, 0.01);
        }
        if last_committed + input_delay < net_tick {
            self.prev_time -= 1.0 / tick_rate as f64;
        }
    }
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}
