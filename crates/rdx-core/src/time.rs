use chrono::{DateTime, NaiveDateTime, Utc};

/// Seconds since the Unix epoch.
pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

/// `YYYY-MM-DDTHH:MM:SSZ`.
pub fn format_ts(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Inverse of [`format_ts`]; `None` for anything else.
pub fn parse_ts(s: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}
