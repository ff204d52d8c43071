//! Microsecond-precision timestamp type
//!
//! Used both for business time (`valid_from`/`valid_to`, usually a block
//! timestamp) and for bookkeeping time (`inserted_at`/`modified_at`, audit
//! entry times).
//!
//! Timestamps are stored as microseconds since Unix epoch. Block timestamps
//! arrive from ingestion as naive UTC date-times; use
//! [`Timestamp::from_naive`] to convert them.
//!
//! ```
//! use chainstate_core::Timestamp;
//!
//! let block_ts = Timestamp::from_secs(1_700_000_000);
//! assert!(block_ts > Timestamp::EPOCH);
//! ```

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Microsecond-precision timestamp
///
/// ## Invariants
///
/// - Always non-negative (u64 microseconds since epoch)
/// - Totally ordered; the zero timestamp is the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Unix epoch (1970-01-01 00:00:00 UTC)
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Maximum representable timestamp
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    /// Timestamp for the current moment according to the system clock
    ///
    /// Returns epoch if the system clock is before Unix epoch.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as u64)
    }

    /// Create a timestamp from microseconds since epoch
    #[inline]
    pub const fn from_micros(micros: u64) -> Self {
        Timestamp(micros)
    }

    /// Create a timestamp from milliseconds since epoch
    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        Timestamp(millis.saturating_mul(1_000))
    }

    /// Create a timestamp from seconds since epoch
    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs.saturating_mul(1_000_000))
    }

    /// Convert a naive (implicitly UTC) date-time
    ///
    /// Date-times before the epoch clamp to [`Timestamp::EPOCH`].
    pub fn from_naive(dt: NaiveDateTime) -> Self {
        let micros = dt.and_utc().timestamp_micros();
        Timestamp(u64::try_from(micros).unwrap_or(0))
    }

    /// Convert back into a naive UTC date-time
    ///
    /// Returns `None` when the value is outside chrono's representable range.
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        let micros = i64::try_from(self.0).ok()?;
        DateTime::from_timestamp_micros(micros).map(|dt| dt.naive_utc())
    }

    /// Microseconds since Unix epoch
    #[inline]
    pub const fn as_micros(&self) -> u64 {
        self.0
    }

    /// Milliseconds since Unix epoch (truncates)
    #[inline]
    pub const fn as_millis(&self) -> u64 {
        self.0 / 1_000
    }

    /// Seconds since Unix epoch (truncates)
    #[inline]
    pub const fn as_secs(&self) -> u64 {
        self.0 / 1_000_000
    }

    /// Duration since an earlier timestamp, `None` if `earlier` is later
    pub fn duration_since(&self, earlier: Timestamp) -> Option<Duration> {
        self.0.checked_sub(earlier.0).map(Duration::from_micros)
    }

    /// Add a duration, saturating at [`Timestamp::MAX`]
    pub fn saturating_add(&self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration.as_micros() as u64))
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp::EPOCH
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_naive() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.6f")),
            None => write!(f, "{}us", self.0),
        }
    }
}

impl From<u64> for Timestamp {
    fn from(micros: u64) -> Self {
        Timestamp::from_micros(micros)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl From<NaiveDateTime> for Timestamp {
    fn from(dt: NaiveDateTime) -> Self {
        Timestamp::from_naive(dt)
    }
}
