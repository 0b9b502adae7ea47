//! Mapping between [`Value`](crate::core::Value)s and the tagged JSON wire
//! format.
//!
//! Typed values travel as `{"__type": ..., ...}` envelopes; pending
//! operations travel as `{"__op": ..., ...}` envelopes, except `Set` which
//! is sent as the bare encoded value.
//!
//! - `encode.rs` - values, entities and operations to wire JSON
//! - `decode.rs` - wire JSON back into values and entity state

mod decode;
mod encode;

pub use decode::ValueDecoder;
pub use encode::ValueEncoder;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::core::{ObjectError, Result};

/// How entity references are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeMode {
    /// Every entity becomes `{"__type":"Pointer",...}`.
    Pointer,
    /// Entities with data are expanded to `{"__type":"Object",...}` the
    /// first time they are met; repeats degrade to pointers.
    Full,
}

/// UTC ISO-8601 with millisecond precision, e.g. `2015-06-29T01:39:35.931Z`.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_date(iso: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(iso)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ObjectError::Decode(format!("Invalid date '{}': {}", iso, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_date_truncates_to_millis() {
        let date = Utc.with_ymd_and_hms(2015, 6, 29, 1, 39, 35).unwrap()
            + chrono::Duration::microseconds(931_456);
        assert_eq!(format_date(&date), "2015-06-29T01:39:35.931Z");
    }

    #[test]
    fn test_parse_date_normalizes_to_utc() {
        let parsed = parse_date("2015-06-29T09:39:35.931+08:00").unwrap();
        assert_eq!(format_date(&parsed), "2015-06-29T01:39:35.931Z");
        assert!(parse_date("yesterday").is_err());
    }
}
