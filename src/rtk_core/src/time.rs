//! Temporal quantities.
//!
//! All times are nanoseconds. `Instant` is the kernel's monotonic clock
//! value (§3 "Monotonic clock"); `Duration` is a relative span used to
//! request a delay or timeout; `Timeout` additionally distinguishes "block
//! forever" from "block for this long" so a zero-length timeout and an
//! infinite one are never confused at the call site.
use core::ops;

/// A monotonic instant, in nanoseconds since boot.
///
/// Backed by `u64`, which does not wrap within any device's service life at
/// nanosecond resolution (~584 years).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Instant(u64);

impl Instant {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    #[inline]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// `self + d`, saturating at `u64::MAX` rather than wrapping.
    #[inline]
    pub const fn saturating_add(self, d: Duration) -> Self {
        Self(self.0.saturating_add(d.0))
    }

    #[inline]
    pub fn checked_duration_since(self, earlier: Self) -> Option<Duration> {
        self.0
            .checked_sub(earlier.0)
            .map(|nanos| Duration(nanos as i64))
    }
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;
    #[inline]
    fn add(self, rhs: Duration) -> Instant {
        self.saturating_add(rhs)
    }
}

/// A relative time span, in nanoseconds.
///
/// Backed by `i64` so that "time remaining" computations (which may go
/// negative for an already-expired deadline) don't need a separate type.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct Duration(i64);

impl Duration {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(i64::MAX);

    #[inline]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    #[inline]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros * 1_000)
    }

    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * 1_000_000)
    }

    #[inline]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs * 1_000_000_000)
    }

    #[inline]
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }
}

/// Distinguishes an infinite wait from a bounded one.
///
/// Kernel calls take this instead of a bare `Duration` so that "wait
/// forever" (§4.G's `timeout == 0` meaning "none") is a distinct value
/// rather than a magic constant a caller could collide with.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Timeout {
    #[default]
    Forever,
    None,
    After(Duration),
}

impl Timeout {
    #[inline]
    pub const fn from_nanos(nanos: i64) -> Self {
        if nanos == 0 {
            Self::None
        } else {
            Self::After(Duration::from_nanos(nanos))
        }
    }

    /// Absolute deadline for a wait starting at `now`, or `None` for
    /// "forever" (§3 "Blocking context": deadline 0 == none).
    #[inline]
    pub fn deadline_from(self, now: Instant) -> Option<Instant> {
        match self {
            Self::Forever => None,
            Self::None => Some(now),
            Self::After(d) => Some(now.saturating_add(d)),
        }
    }

    #[inline]
    pub const fn is_immediate(self) -> bool {
        matches!(self, Self::None)
    }
}

impl From<Duration> for Timeout {
    #[inline]
    fn from(d: Duration) -> Self {
        Self::After(d)
    }
}
