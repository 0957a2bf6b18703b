use anyhow::anyhow;
use chrono::{DateTime, TimeDelta, Utc};
use std::any::Any;
use std::time::Duration;

/// Try to figure out what's in the panic payload of a job that blew up.
pub(crate) fn try_to_extract_panic_info(info: &(dyn Any + Send + 'static)) -> anyhow::Error {
    if let Some(message) = info.downcast_ref::<&'static str>() {
        anyhow!("job panicked: {message}")
    } else if let Some(message) = info.downcast_ref::<String>() {
        anyhow!("job panicked: {message}")
    } else {
        anyhow!("job panicked")
    }
}

fn to_time_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// `instant + duration`, saturating at the latest representable time.
pub(crate) fn later_by(instant: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    instant
        .checked_add_signed(to_time_delta(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `instant - duration`, saturating at the earliest representable time.
pub(crate) fn earlier_by(instant: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    instant
        .checked_sub_signed(to_time_delta(duration))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Milliseconds of a duration as bound into SQL, saturating at `i64::MAX`.
pub(crate) fn to_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
