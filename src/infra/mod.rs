use chrono::{DateTime, Datelike, Utc};

pub mod cli;
#[cfg(feature = "docker")]
pub mod docker;
pub mod memory;
pub mod network;
pub mod web;

/// Engine timestamps are RFC3339, the zero time (`0001-01-01T00:00:00Z`) means unset.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .filter(|timestamp| timestamp.year() > 1)
}
