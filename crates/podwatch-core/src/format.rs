//! Human-readable time labels for events and readings.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Describe how long ago `ts` was, relative to `now`.
///
/// Under an hour reads in minutes, under a day in hours, otherwise in days.
/// Timestamps in the future read as "0 minutes ago".
#[must_use]
pub fn relative_age(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - ts).num_minutes().max(0);
    if minutes < 60 {
        format!("{minutes} minutes ago")
    } else if minutes < 24 * 60 {
        format!("{} hours ago", minutes / 60)
    } else {
        let days = minutes / (24 * 60);
        if days == 1 {
            "1 day ago".to_string()
        } else {
            format!("{days} days ago")
        }
    }
}

/// Render `ts` as `HH:MM` in `tz`.
#[must_use]
pub fn clock_time(ts: DateTime<Utc>, tz: Tz) -> String {
    ts.with_timezone(&tz).format("%H:%M").to_string()
}
