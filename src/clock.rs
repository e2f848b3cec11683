//! Virtual clock and expiration buckets.
//!
//! Time never moves on its own: the host calls [`VirtualClock::advance`].
//! Expirations are quantized to fixed-width buckets so requests issued
//! within one bucket share a deadline, and with it one retry/fallback
//! decision.

use std::fmt;
use std::ops::{Add, Sub};

use crate::config::ClockConfig;
use crate::core::Priority;

/// A point on the virtual timeline (ticks since scheduler creation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(pub u64);

impl Time {
    pub const ZERO: Self = Self(0);
    pub const NEVER: Self = Self(u64::MAX);

    #[inline]
    pub const fn ticks(self) -> u64 {
        self.0
    }
}

impl Add<u64> for Time {
    type Output = Self;

    fn add(self, rhs: u64) -> Self {
        Self(self.0.saturating_add(rhs))
    }
}

impl Sub for Time {
    type Output = u64;

    fn sub(self, rhs: Self) -> u64 {
        self.0.saturating_sub(rhs.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NEVER {
            f.write_str("never")
        } else {
            write!(f, "@{}", self.0)
        }
    }
}

/// Monotonic counter advanced by the host.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    now: Time,
    config: ClockConfig,
}

impl VirtualClock {
    pub fn new(config: ClockConfig) -> Self {
        Self {
            now: Time::ZERO,
            config,
        }
    }

    #[inline]
    pub fn now(&self) -> Time {
        self.now
    }

    /// Move time forward. Fires nothing; only later comparisons change.
    pub fn advance(&mut self, delta: u64) -> Time {
        self.now = self.now + delta;
        self.now
    }

    /// Expiration deadline for work requested now at `priority`.
    ///
    /// Sync work never expires: it either resolves inside its pass or leaves
    /// the visible output untouched.
    pub fn expiration_for(&self, priority: Priority) -> Time {
        if priority.is_sync() {
            return Time::NEVER;
        }
        let window = self.config.window(priority);
        quantize(self.now + window, self.config.bucket_width)
    }
}

/// Round `t` up to the next multiple of `width`.
pub fn quantize(t: Time, width: u64) -> Time {
    if width <= 1 || t == Time::NEVER {
        return t;
    }
    match t.0.div_ceil(width).checked_mul(width) {
        Some(v) => Time(v),
        None => Time::NEVER,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(width: u64) -> VirtualClock {
        VirtualClock::new(ClockConfig {
            bucket_width: width,
            ..ClockConfig::default()
        })
    }

    #[test]
    fn test_quantize_rounds_up() {
        assert_eq!(quantize(Time(0), 25), Time(0));
        assert_eq!(quantize(Time(1), 25), Time(25));
        assert_eq!(quantize(Time(25), 25), Time(25));
        assert_eq!(quantize(Time(26), 25), Time(50));
        assert_eq!(quantize(Time(7), 1), Time(7));
    }

    #[test]
    fn test_requests_in_one_bucket_share_expiration() {
        let mut clock = clock(100);
        let first = clock.expiration_for(Priority::Normal);
        clock.advance(30);
        let second = clock.expiration_for(Priority::Normal);
        assert_eq!(first, second);

        clock.advance(100);
        assert!(clock.expiration_for(Priority::Normal) > first);
    }

    #[test]
    fn test_sync_never_expires() {
        let mut clock = clock(10);
        clock.advance(1_000_000);
        assert_eq!(clock.expiration_for(Priority::Sync), Time::NEVER);
    }

    #[test]
    fn test_higher_priority_expires_sooner() {
        let clock = clock(10);
        assert!(
            clock.expiration_for(Priority::UserBlocking) < clock.expiration_for(Priority::Normal)
        );
        assert!(clock.expiration_for(Priority::Normal) < clock.expiration_for(Priority::Deferred));
    }

    #[test]
    fn test_advance_is_saturating() {
        let mut clock = clock(10);
        clock.advance(u64::MAX);
        clock.advance(5);
        assert_eq!(clock.now(), Time::NEVER);
    }
}
