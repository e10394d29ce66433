//! Shipdate encoding: days since 1992-01-01, the first TPC-H order date.

use time::macros::{date, format_description};
use time::{Date, Duration};

use crate::{Result, StorageError};

/// Day zero of the encoding.
pub const EPOCH: Date = date!(1992 - 01 - 01);

/// Q1 predicate bound: `l_shipdate <= date '1998-12-01' - interval '90' day`.
pub const Q1_SHIPDATE_THRESHOLD: i16 =
    (date!(1998 - 09 - 02).to_julian_day() - EPOCH.to_julian_day()) as i16;

/// Encode a calendar date.
pub fn encode(d: Date) -> Result<i16> {
    let days = d.to_julian_day() - EPOCH.to_julian_day();
    i16::try_from(days)
        .ok()
        .filter(|d| *d >= 0)
        .ok_or_else(|| StorageError::InvalidDate(d.to_string()))
}

/// Decode an encoded date.
pub fn decode(days: i16) -> Date {
    EPOCH + Duration::days(days as i64)
}

/// Parse an ISO `YYYY-MM-DD` string into the encoding.
pub fn parse(s: &str) -> Result<i16> {
    let d = Date::parse(s, format_description!("[year]-[month]-[day]"))
        .map_err(|e| StorageError::InvalidDate(format!("{s}: {e}")))?;
    encode(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_matches_parse() {
        assert_eq!(parse("1998-09-02").unwrap(), Q1_SHIPDATE_THRESHOLD);
        assert_eq!(parse("1992-01-01").unwrap(), 0);
        assert_eq!(decode(Q1_SHIPDATE_THRESHOLD), date!(1998 - 09 - 02));
    }

    #[test]
    fn rejects_pre_epoch_and_garbage() {
        assert!(parse("1991-12-31").is_err());
        assert!(parse("1998/09/02").is_err());
    }
}
