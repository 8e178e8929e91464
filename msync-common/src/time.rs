//! Clock and interval helpers

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Current UTC time, used for `updated_at` stamps on outgoing patches
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Interval or timeout setting in milliseconds as a `Duration`
pub fn millis_to_duration(millis: u64) -> Duration {
    Duration::from_millis(millis)
}
