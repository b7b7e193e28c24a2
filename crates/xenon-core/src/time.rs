//! 100-nanosecond-unit timeouts, the representation the Xbox 360 kernel
//! ABI passes across every wait primitive.

use std::time::Duration;

/// A relative wait timeout expressed in 100-ns units, or infinite.
///
/// The guest ABI represents an infinite wait as a null timeout pointer;
/// callers translate that at the import-dispatch boundary into
/// [`WaitTimeout::Infinite`] before reaching the sync primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    Infinite,
    Relative(u64),
}

const HUNDRED_NS_PER_SEC: u64 = 10_000_000;

impl WaitTimeout {
    pub const fn zero() -> Self {
        WaitTimeout::Relative(0)
    }

    pub fn from_millis(ms: u64) -> Self {
        WaitTimeout::Relative(ms.saturating_mul(10_000))
    }

    /// Converts to a `Duration`, or `None` for an infinite wait.
    pub fn to_duration(self) -> Option<Duration> {
        match self {
            WaitTimeout::Infinite => None,
            WaitTimeout::Relative(units) => {
                let secs = units / HUNDRED_NS_PER_SEC;
                let remainder_units = units % HUNDRED_NS_PER_SEC;
                let nanos = remainder_units * 100;
                Some(Duration::new(secs, nanos as u32))
            }
        }
    }

    pub const fn is_zero(self) -> bool {
        matches!(self, WaitTimeout::Relative(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_immediate() {
        assert_eq!(WaitTimeout::zero().to_duration(), Some(Duration::ZERO));
    }

    #[test]
    fn infinite_has_no_duration() {
        assert_eq!(WaitTimeout::Infinite.to_duration(), None);
    }

    #[test]
    fn millis_round_trips_through_hundred_ns_units() {
        let t = WaitTimeout::from_millis(100);
        assert_eq!(t.to_duration(), Some(Duration::from_millis(100)));
    }
}
