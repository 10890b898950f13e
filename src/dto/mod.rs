use std::time::{Duration, SystemTime, UNIX_EPOCH};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod health;
pub mod room;
pub mod validation;
pub mod ws;

fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}

/// Render milliseconds since the Unix epoch as RFC 3339.
fn format_epoch_ms(ms: u64) -> String {
    format_system_time(UNIX_EPOCH + Duration::from_millis(ms))
}
