//! Speculative prediction: run extra ticks past the confirmed horizon on a
//! clone of the world, then discard the clone and resume from confirmed
//! state. Completed-then-discarded within one frame, never left partially
//! applied.

use tracing::trace;

use crate::sim::tick::simulate_tick;

use super::{GameSession, JoinState};

impl GameSession {
    /// Engage prediction when fully joined and at least one tick of wall
    /// clock has elapsed past the commit horizon. Returns false when nothing
    /// was speculated; the caller must balance a `true` with
    /// [`GameSession::end_prediction`] after reading the predicted state.
    pub fn begin_prediction(&mut self) -> bool {
        if !self.config.net.prediction || self.join_state != JoinState::Joined {
            return false;
        }
        let rate = self.config.net.tick_rate;
        let frames = self
            .clock
            .frames_due(self.clock.last_frame_ts, rate)
            .clamp(0, self.config.net.prediction_max as i64);
        if frames == 0 {
            return false;
        }

        trace!(frames, "prediction begins");
        self.saved_state = Some(self.world.clone());
        for _ in 0..frames {
            simulate_tick(self, true);
        }
        true
    }

    /// Discard all speculative work: restore the pre-clone world (and with
    /// it the committed random-seed stream) and rewind the tick counter.
    pub fn end_prediction(&mut self) {
        if let Some(saved) = self.saved_state.take() {
            self.world = saved;
            self.game_tick = self.world.tick + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    /// Property: begin/run/end leaves world and seed stream untouched.
    #[test]
    fn prediction_is_transparent() {
        let mut session = session(1);
        let mut transport = MockTransport::default();
        session.update(1.0, 0, &mut transport).expect("frame");
        session.update(1.5, 0, &mut transport).expect("frame");
        assert_eq!(session.join_state, JoinState::Joined);

        // leave some wall clock past the last committed tick
        session.clock.update_frame_time(1.6);
        let world_before = session.world.clone();
        let tick_before = session.game_tick;

        let engaged = session.begin_prediction();
        assert!(engaged, "speculative ticks should have been run");
        assert!(session.world.tick > world_before.tick);
        session.end_prediction();

        assert_eq!(session.world, world_before);
        assert_eq!(session.game_tick, tick_before);
        assert_eq!(session.world.seed, world_before.seed);
    }

    #[test]
    fn prediction_requires_joined() {
        let mut session = session(1);
        session.clock.update_frame_time(10.0);
        assert_eq!(session.join_state, JoinState::Wait);
        assert!(!session.begin_prediction());
    }

    #[test]
    fn prediction_is_bounded() {
        let mut session = session(1);
        let mut transport = MockTransport::default();
        session.update(1.0, 0, &mut transport).expect("frame");
        session.update(1.5, 0, &mut transport).expect("frame");
        let committed = session.world.tick;

        // hours of elapsed wall clock still only speculate prediction_max
        session.clock.update_frame_time(1000.0);
        if session.begin_prediction() {
            let speculated = session.world.tick - committed;
            assert!(speculated <= session.config.net.prediction_max);
            session.end_prediction();
        }
        assert_eq!(session.world.tick, committed);
    }
}
