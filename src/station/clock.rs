//! Simulated clock with adjustable speed and re-anchorable base.
//!
//! Simulated time is an affine projection of real time:
//! `now = base_sim + (real_now - base_real) * speedup`. Every mutation
//! rebases the pair at the current simulated instant, so already-observed
//! timestamps are never rewritten and time stays continuous across a
//! speedup or absolute-time change.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};

use super::types::StationError;

/// Anchor pair plus speed factor, always replaced as one unit.
#[derive(Debug, Clone, Copy)]
struct ClockBase {
    speedup: f64,
    base_real: DateTime<Utc>,
    base_sim: DateTime<Utc>,
}

/// Process-wide simulated time source.
///
/// Reads take a short read lock and copy the base triple, so a reader
/// never observes a half-updated anchor. The read path allocates nothing
/// and is cheap enough for the billing hot path.
///
/// # Examples
///
/// ```
/// use station_sim::station::clock::SimClock;
///
/// let clock = SimClock::new();
/// clock.set_speedup(10.0).unwrap();
/// assert!(clock.set_speedup(-1.0).is_err());
/// ```
#[derive(Debug)]
pub struct SimClock {
    base: RwLock<ClockBase>,
}

fn project(base: &ClockBase, real_now: DateTime<Utc>) -> DateTime<Utc> {
    let elapsed_ms = (real_now - base.base_real).num_milliseconds() as f64;
    base.base_sim + Duration::milliseconds((elapsed_ms * base.speedup) as i64)
}

impl SimClock {
    /// Creates a clock tracking real time at speedup 1.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            base: RwLock::new(ClockBase {
                speedup: 1.0,
                base_real: now,
                base_sim: now,
            }),
        }
    }

    /// Creates a clock pinned at `at` with speedup 0.
    ///
    /// Time does not move until [`SimClock::advance`] or one of the admin
    /// mutations is called. Used for deterministic tests.
    pub fn frozen_at(at: DateTime<Utc>) -> Self {
        Self {
            base: RwLock::new(ClockBase {
                speedup: 0.0,
                base_real: Utc::now(),
                base_sim: at,
            }),
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> DateTime<Utc> {
        let base = *self
            .base
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        project(&base, Utc::now())
    }

    /// Current speedup factor.
    pub fn speedup(&self) -> f64 {
        self.base
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .speedup
    }

    /// Sets the speedup factor, rebasing at the current simulated instant.
    ///
    /// # Errors
    ///
    /// Rejects negative or non-finite factors with a validation error
    /// before any mutation.
    pub fn set_speedup(&self, factor: f64) -> Result<(), StationError> {
        if !factor.is_finite() || factor < 0.0 {
            return Err(StationError::Validation(format!(
                "speedup must be finite and >= 0, got {factor}"
            )));
        }
        let mut base = self.base.write().unwrap_or_else(PoisonError::into_inner);
        let real_now = Utc::now();
        let sim_now = project(&base, real_now);
        *base = ClockBase {
            speedup: factor,
            base_real: real_now,
            base_sim: sim_now,
        };
        Ok(())
    }

    /// Jumps simulated time to `at`, keeping the current speedup.
    pub fn set_absolute(&self, at: DateTime<Utc>) {
        let mut base = self.base.write().unwrap_or_else(PoisonError::into_inner);
        base.base_real = Utc::now();
        base.base_sim = at;
    }

    /// Reverts to real time: speedup 1, anchored at the real now.
    pub fn reset_to_real(&self) {
        let mut base = self.base.write().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        *base = ClockBase {
            speedup: 1.0,
            base_real: now,
            base_sim: now,
        };
    }

    /// Shifts simulated time forward by `delta` without touching the speedup.
    ///
    /// Equivalent to `set_absolute(now() + delta)`; convenient for tests
    /// driving a frozen clock.
    pub fn advance(&self, delta: Duration) {
        let mut base = self.base.write().unwrap_or_else(PoisonError::into_inner);
        let real_now = Utc::now();
        let sim_now = project(&base, real_now);
        base.base_real = real_now;
        base.base_sim = sim_now + delta;
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 8, 0, 0).unwrap()
    }

    #[test]
    fn frozen_clock_does_not_move() {
        let clock = SimClock::frozen_at(t0());
        let a = clock.now();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(a, clock.now());
        assert_eq!(a, t0());
    }

    #[test]
    fn advance_moves_frozen_clock() {
        let clock = SimClock::frozen_at(t0());
        clock.advance(Duration::hours(2));
        assert_eq!(clock.now(), t0() + Duration::hours(2));
    }

    #[test]
    fn set_absolute_keeps_speedup() {
        let clock = SimClock::frozen_at(t0());
        clock.set_absolute(t0() + Duration::days(1));
        assert_eq!(clock.speedup(), 0.0);
        assert_eq!(clock.now(), t0() + Duration::days(1));
    }

    #[test]
    fn rejects_negative_speedup() {
        let clock = SimClock::new();
        assert!(clock.set_speedup(-1.0).is_err());
        assert!(clock.set_speedup(f64::NAN).is_err());
        assert!(clock.set_speedup(f64::INFINITY).is_err());
    }

    #[test]
    fn rejected_speedup_leaves_clock_unchanged() {
        let clock = SimClock::frozen_at(t0());
        let _ = clock.set_speedup(f64::NAN);
        assert_eq!(clock.speedup(), 0.0);
        assert_eq!(clock.now(), t0());
    }

    #[test]
    fn speedup_scales_elapsed_real_time() {
        let clock = SimClock::frozen_at(t0());
        clock.set_speedup(60.0).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(100));
        let elapsed = clock.now() - t0();
        // 100ms real * 60 = 6s simulated; allow generous slack for CI jitter
        assert!(elapsed >= Duration::seconds(5), "elapsed {elapsed}");
        assert!(elapsed < Duration::seconds(60), "elapsed {elapsed}");
    }

    #[test]
    fn speedup_change_preserves_continuity() {
        let clock = SimClock::frozen_at(t0());
        clock.advance(Duration::hours(1));
        clock.set_speedup(5.0).unwrap();
        // Rebase must not jump: the new base is the instant of the change.
        let now = clock.now();
        assert!(now >= t0() + Duration::hours(1));
        assert!(now < t0() + Duration::hours(1) + Duration::seconds(10));
    }

    #[test]
    fn reset_to_real_tracks_wall_clock() {
        let clock = SimClock::frozen_at(t0());
        clock.reset_to_real();
        assert_eq!(clock.speedup(), 1.0);
        let delta = clock.now() - Utc::now();
        assert!(delta.num_seconds().abs() < 2);
    }
}
