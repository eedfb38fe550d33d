//! Time utilities for AgenticContinuity.
//!
//! All timestamps are Unix epoch microseconds (u64).

use std::time::{SystemTime, UNIX_EPOCH};

/// Return the current time as microseconds since Unix epoch.
///
/// A clock set before the epoch reads as 0 rather than panicking.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Convert microseconds to an RFC 3339 string.
pub fn micros_to_rfc3339(micros: u64) -> String {
    let secs = (micros / 1_000_000) as i64;
    let nsecs = ((micros % 1_000_000) * 1000) as u32;
    let dt = chrono::DateTime::from_timestamp(secs, nsecs).unwrap_or(chrono::DateTime::UNIX_EPOCH);
    dt.to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_monotonic_enough() {
        let a = now_micros();
        let b = now_micros();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000_000);
    }

    #[test]
    fn test_rfc3339_epoch() {
        assert!(micros_to_rfc3339(0).starts_with("1970-01-01T00:00:00"));
    }
}
