use chrono::{DateTime, Utc};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Converts an epoch-millisecond value back to a UTC timestamp.
/// Out-of-range values clamp to the epoch rather than panicking; the hot
/// store boundary may hand us arbitrary numbers.
pub fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}
