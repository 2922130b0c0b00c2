use std::fmt::Debug;
use std::iter::Sum;
use std::ops::{Add, Div, Sub};
use std::time::Duration;

use crate::safe_converter::{PrecheckedCast, SafeCast};

/// A send rate in bits per second.
///
/// This is the unit in which the session reports its congestion state (bandwidth estimate and
///  pacing rate), and the unit in which data sources are configured and throttled. All arithmetic
///  is integer arithmetic rounding down, so dividing a budget across consumers can never
///  overshoot it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Bitrate(u64);

impl Bitrate {
    pub const ZERO: Bitrate = Bitrate(0);

    pub fn from_bits_per_second(bits_per_second: u64) -> Bitrate {
        Bitrate(bits_per_second)
    }

    pub fn from_kilobits_per_second(kilobits_per_second: u64) -> Bitrate {
        Bitrate(kilobits_per_second * 1_000)
    }

    /// The rate at which `bytes` are transferred in `period`.
    pub fn from_bytes_and_period(bytes: usize, period: Duration) -> Bitrate {
        if period.is_zero() {
            return Bitrate::ZERO;
        }
        let bits: u64 = 8 * SafeCast::<u64>::safe_cast(bytes);
        Bitrate(((bits as u128) * 1_000_000 / period.as_micros()).prechecked_cast())
    }

    pub fn bits_per_second(&self) -> u64 {
        self.0
    }

    /// The number of whole bytes this rate transfers in `period`.
    pub fn bytes_for_period(&self, period: Duration) -> usize {
        let bytes: u64 = ((self.0 as u128) * period.as_micros() / 8_000_000).prechecked_cast();
        bytes.prechecked_cast()
    }

    pub fn saturating_sub(&self, rhs: Bitrate) -> Bitrate {
        Bitrate(self.0.saturating_sub(rhs.0))
    }
}
impl Debug for Bitrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}bps", self.0)
    }
}
impl Add for Bitrate {
    type Output = Bitrate;

    fn add(self, rhs: Bitrate) -> Bitrate {
        Bitrate(self.0 + rhs.0)
    }
}
impl Sub for Bitrate {
    type Output = Bitrate;

    fn sub(self, rhs: Bitrate) -> Bitrate {
        Bitrate(self.0 - rhs.0)
    }
}
impl Div<usize> for Bitrate {
    type Output = Bitrate;

    fn div(self, rhs: usize) -> Bitrate {
        Bitrate(self.0 / SafeCast::<u64>::safe_cast(rhs))
    }
}
impl Sum for Bitrate {
    fn sum<I: Iterator<Item = Bitrate>>(iter: I) -> Bitrate {
        Bitrate(iter.map(|b| b.0).sum())
    }
}
