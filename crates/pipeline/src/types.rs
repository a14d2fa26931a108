//! Shared value types for the SpyGlass analysis domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. adoption percentages are in
//! `1..=100`, the requested trend count is in `1..=50`) and are validated at
//! construction. A value of one of these types is always in range.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Requested trend count
// ---------------------------------------------------------------------------

/// Number of trends requested for one run (`k`), in `1..=50`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct TrendCount(u32);

impl TrendCount {
    /// Smallest permitted trend count.
    pub const MIN: u32 = 1;
    /// Largest permitted trend count.
    pub const MAX: u32 = 50;
    /// Trend count used when the caller does not ask for one.
    pub const DEFAULT: u32 = 10;

    /// Creates a [`TrendCount`], returning `None` outside `1..=50`.
    #[must_use]
    pub fn new(count: u32) -> Option<Self> {
        if (Self::MIN..=Self::MAX).contains(&count) {
            Some(Self(count))
        } else {
            None
        }
    }

    /// Clamps an arbitrary integer into `1..=50`.
    ///
    /// Used by request layers that prefer a lenient reading of `k` over a
    /// rejection.
    pub fn clamped(count: i64) -> Self {
        Self(count.clamp(Self::MIN as i64, Self::MAX as i64) as u32)
    }

    /// Returns the count as a `usize` for slicing.
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Returns the underlying integer.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl Default for TrendCount {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl TryFrom<u32> for TrendCount {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| {
            format!(
                "trend count {value} outside {}..={}",
                Self::MIN,
                Self::MAX
            )
        })
    }
}

impl From<TrendCount> for u32 {
    fn from(value: TrendCount) -> Self {
        value.0
    }
}

impl std::fmt::Display for TrendCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Percentages
// ---------------------------------------------------------------------------

/// Projected adoption of a trend in one year, as an integer percentage in
/// `1..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AdoptionPct(u8);

impl AdoptionPct {
    /// Lowest valid adoption.
    pub const MIN: Self = Self(1);

    /// Creates an [`AdoptionPct`], returning `None` outside `1..=100`.
    #[must_use]
    pub fn new(value: i64) -> Option<Self> {
        if (1..=100).contains(&value) {
            Some(Self(value as u8))
        } else {
            None
        }
    }

    /// Returns the percentage.
    pub fn as_u8(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for AdoptionPct {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0)
    }
}

// ---------------------------------------------------------------------------

/// Week-over-week growth of a startup opportunity, in percent. Never negative.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct GrowthRate(f64);

impl GrowthRate {
    /// Creates a [`GrowthRate`].
    ///
    /// Returns `None` if `value` is negative, infinite, or NaN.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && value >= 0.0 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Returns the underlying `f64` percentage.
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl std::fmt::Display for GrowthRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}%", self.0)
    }
}

// ---------------------------------------------------------------------------

/// Estimated probability that a startup opportunity is accepted by an
/// accelerator, in percent (`0.0..=100.0`).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct AcceptanceProbability(f64);

impl AcceptanceProbability {
    /// Creates an [`AcceptanceProbability`], returning `None` if `value` is
    /// outside `[0.0, 100.0]` or not finite.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if value.is_finite() && (0.0..=100.0).contains(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Returns the underlying `f64` percentage.
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl std::fmt::Display for AcceptanceProbability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}%", self.0)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Compact local-sortable form used in file names: `YYYYmmdd_HHMMSS`.
    pub fn file_stamp(self) -> String {
        self.0.format("%Y%m%d_%H%M%S").to_string()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
