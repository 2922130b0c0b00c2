use std::fmt::Debug;
use std::ops::{Add, AddAssign, Sub};
use std::time::{Duration, Instant};

use crate::safe_converter::PrecheckedCast;

/// A point in time, measured as the offset from some fixed (per-clock) epoch.
///
/// The epoch is arbitrary: timestamps from different [Clock] instances must never be compared,
///  and timestamps never leave the process except as part of a data frame header where the
///  receiving side treats them as opaque.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp(Duration);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(Duration::ZERO);

    pub fn from_micros(micros: u64) -> Timestamp {
        Timestamp(Duration::from_micros(micros))
    }

    pub fn as_micros(&self) -> u64 {
        self.0.as_micros().prechecked_cast()
    }
}
impl Debug for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T+{}us", self.as_micros())
    }
}
impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0 + rhs)
    }
}
impl AddAssign<Duration> for Timestamp {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs;
    }
}
impl Sub<Timestamp> for Timestamp {
    type Output = Duration;

    /// saturating: a 'negative' duration is truncated to zero
    fn sub(self, rhs: Timestamp) -> Duration {
        self.0.checked_sub(rhs.0)
            .unwrap_or(Duration::ZERO)
    }
}

/// Time is injected rather than read ambiently so that tests can drive it by hand and the whole
///  stack stays deterministic under a paused runtime.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Timestamp;
}

/// Monotonic clock anchored at its own creation.
pub struct WallClock {
    epoch: Instant,
}
impl WallClock {
    pub fn new() -> WallClock {
        WallClock {
            epoch: Instant::now(),
        }
    }
}
impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}
impl Clock for WallClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.epoch.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0)]
    #[case::one(1)]
    #[case::big(4378943758943)]
    fn test_timestamp_micros_roundtrip(#[case] micros: u64) {
        assert_eq!(Timestamp::from_micros(micros).as_micros(), micros);
    }

    #[rstest]
    #[case::forward(100, 30, Duration::from_micros(70))]
    #[case::same(100, 100, Duration::ZERO)]
    #[case::backward_saturates(30, 100, Duration::ZERO)]
    fn test_timestamp_sub(#[case] a: u64, #[case] b: u64, #[case] expected: Duration) {
        assert_eq!(Timestamp::from_micros(a) - Timestamp::from_micros(b), expected);
    }

    #[test]
    fn test_timestamp_add() {
        let t = Timestamp::from_micros(10) + Duration::from_micros(5);
        assert_eq!(t, Timestamp::from_micros(15));
    }

    #[test]
    fn test_wall_clock_monotonic() {
        let clock = WallClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
