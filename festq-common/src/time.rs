//! Timestamp utilities

use chrono::{DateTime, Duration, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current time as Unix epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Deadline `seconds` after `start`
pub fn deadline(start: DateTime<Utc>, seconds: u32) -> DateTime<Utc> {
    start + Duration::seconds(i64::from(seconds))
}

/// Whole seconds left until `deadline`, rounded up, 0 once it has passed
pub fn seconds_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (deadline - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        (millis as u64).div_ceil(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // After 2000-01-01 and before 2100-01-01
        assert!(timestamp.timestamp() > 946_684_800);
        assert!(timestamp.timestamp() < 4_102_444_800);
    }

    #[test]
    fn test_deadline_adds_seconds() {
        let start = now();
        assert_eq!((deadline(start, 150) - start).num_seconds(), 150);
    }

    #[test]
    fn test_seconds_until_rounds_up() {
        let start = now();
        let end = deadline(start, 10);
        assert_eq!(seconds_until(end, start), 10);
        assert_eq!(seconds_until(end, start + Duration::milliseconds(9_001)), 1);
        assert_eq!(seconds_until(end, start + Duration::milliseconds(9_000)), 1);
    }

    #[test]
    fn test_seconds_until_past_deadline_is_zero() {
        let start = now();
        let end = deadline(start, 1);
        assert_eq!(seconds_until(end, end), 0);
        assert_eq!(seconds_until(end, end + Duration::seconds(30)), 0);
    }
}
