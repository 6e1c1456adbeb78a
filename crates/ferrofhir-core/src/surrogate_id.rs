//! Time-derived surrogate ids.
//!
//! A surrogate id is the physical ordering key of a stored resource row.
//! It is a 63-bit integer whose high bits carry the row's creation time
//! truncated to milliseconds and whose low bits carry a per-millisecond
//! disambiguator, so ids assigned later always compare greater. Range
//! predicates over surrogate ids replace offset counters for pagination.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::CoreError;

/// Number of low bits reserved for the per-millisecond disambiguator.
pub const SEQUENCE_BITS: u32 = 20;

/// Largest disambiguator value that fits in the low bits.
pub const MAX_SEQUENCE: u32 = (1 << SEQUENCE_BITS) - 1;

/// Largest millisecond timestamp that fits in the high bits (63 - 20 = 43 bits).
const MAX_MILLIS: i64 = (1 << (63 - SEQUENCE_BITS)) - 1;

/// A resource row's physical ordering key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct SurrogateId(i64);

impl SurrogateId {
    /// Wrap a raw surrogate id read back from the store.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidSurrogateId` for negative values; the id
    /// space is 63-bit non-negative.
    pub fn new(raw: i64) -> Result<Self, CoreError> {
        if raw < 0 {
            return Err(CoreError::InvalidSurrogateId(raw));
        }
        Ok(Self(raw))
    }

    /// Compose a surrogate id from a millisecond timestamp and a sequence value.
    pub fn from_parts(millis: i64, sequence: u32) -> Result<Self, CoreError> {
        if !(0..=MAX_MILLIS).contains(&millis) {
            return Err(CoreError::TimestampOutOfRange(millis));
        }
        if sequence > MAX_SEQUENCE {
            return Err(CoreError::SequenceOutOfRange(sequence));
        }
        Ok(Self((millis << SEQUENCE_BITS) | i64::from(sequence)))
    }

    /// Compose a surrogate id from a wall-clock timestamp.
    pub fn from_datetime(ts: OffsetDateTime, sequence: u32) -> Result<Self, CoreError> {
        let millis = (ts.unix_timestamp_nanos() / 1_000_000) as i64;
        Self::from_parts(millis, sequence)
    }

    /// The millisecond timestamp embedded in the high bits.
    pub fn millis(self) -> i64 {
        self.0 >> SEQUENCE_BITS
    }

    /// The disambiguator embedded in the low bits.
    pub fn sequence(self) -> u32 {
        (self.0 & i64::from(MAX_SEQUENCE)) as u32
    }

    /// The embedded timestamp as a wall-clock instant, truncated to the millisecond.
    pub fn last_updated(self) -> Result<OffsetDateTime, CoreError> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.millis()) * 1_000_000)
            .map_err(|_| CoreError::TimestampOutOfRange(self.millis()))
    }

    /// Raw id accessor.
    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for SurrogateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_compose_decompose_round_trip() {
        let id = SurrogateId::from_parts(1_700_000_000_000, 42).unwrap();
        assert_eq!(id.millis(), 1_700_000_000_000);
        assert_eq!(id.sequence(), 42);
    }

    #[test]
    fn test_later_ids_compare_greater() {
        let a = SurrogateId::from_parts(1000, MAX_SEQUENCE).unwrap();
        let b = SurrogateId::from_parts(1001, 0).unwrap();
        assert!(b > a);

        let c = SurrogateId::from_parts(1000, 1).unwrap();
        let d = SurrogateId::from_parts(1000, 2).unwrap();
        assert!(d > c);
    }

    #[test]
    fn test_from_datetime() {
        let ts = datetime!(2024-06-01 12:00:00 UTC);
        let id = SurrogateId::from_datetime(ts, 7).unwrap();
        assert_eq!(id.sequence(), 7);
        assert_eq!(id.last_updated().unwrap(), ts);
    }

    #[test]
    fn test_rejects_negative_raw() {
        assert!(SurrogateId::new(-1).is_err());
        assert!(SurrogateId::new(0).is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_parts() {
        assert!(SurrogateId::from_parts(-1, 0).is_err());
        assert!(SurrogateId::from_parts(0, MAX_SEQUENCE + 1).is_err());
        assert!(SurrogateId::from_parts(MAX_MILLIS + 1, 0).is_err());
    }
}
