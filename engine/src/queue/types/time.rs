//! Time helpers. Scheduler timestamps are whole seconds since the epoch.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local};

#[inline(always)]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Render a timestamp for tabular output. Zero means "never".
pub fn format_timestamp(secs: u64) -> String {
    if secs == 0 {
        return "n/a".to_string();
    }
    match DateTime::from_timestamp(secs as i64, 0) {
        Some(utc) => utc
            .with_timezone(&Local)
            .format("%m/%d/%Y %H:%M:%S")
            .to_string(),
        None => secs.to_string(),
    }
}
