//! Frame-rate limiting for the delivery pipeline.

use std::time::Instant;

/// Default multiplier applied to measured elapsed time.
///
/// Capture timestamps tend to run slightly behind wall-clock expectations,
/// so measured intervals are inflated a little before being compared against
/// the target interval.
pub const DEFAULT_CORRECTION_FACTOR: f64 = 1.15;

/// Sliding-window limiter deciding which deliveries become frames.
///
/// A frame arriving late builds up a "time behind" credit that lets the next
/// frame through early once. A rejection clears the credit, so the accepted
/// rate cannot overshoot the ceiling for long.
#[derive(Debug)]
pub struct FrameThrottle {
    correction_factor: f64,
    last_accepted: Option<Instant>,
    time_behind_ms: f64,
}

impl Default for FrameThrottle {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameThrottle {
    /// A throttle using [`DEFAULT_CORRECTION_FACTOR`].
    #[must_use]
    pub const fn new() -> Self {
        Self::with_correction_factor(DEFAULT_CORRECTION_FACTOR)
    }

    /// A throttle with a custom elapsed-time multiplier.
    #[must_use]
    pub const fn with_correction_factor(correction_factor: f64) -> Self {
        Self {
            correction_factor,
            last_accepted: None,
            time_behind_ms: 0.0,
        }
    }

    /// Decide whether a delivery arriving at `now` is admitted.
    ///
    /// `ceiling_fps` of `None` or `Some(0)` means unlimited; every delivery
    /// is admitted and no state is recorded, so the first delivery after a
    /// ceiling is (re)enabled is admitted unconditionally.
    #[must_use]
    pub fn admit(&mut self, now: Instant, ceiling_fps: Option<u32>) -> bool {
        let Some(fps) = ceiling_fps.filter(|&fps| fps > 0) else {
            return true;
        };

        let Some(last) = self.last_accepted else {
            self.last_accepted = Some(now);
            return true;
        };

        let target_ms = 1000.0 / f64::from(fps);
        let elapsed_ms =
            now.duration_since(last).as_secs_f64() * 1000.0 * self.correction_factor;

        if elapsed_ms + self.time_behind_ms >= target_ms {
            self.time_behind_ms = (elapsed_ms - target_ms).max(0.0);
            self.last_accepted = Some(now);
            true
        } else {
            self.time_behind_ms = 0.0;
            false
        }
    }
}
