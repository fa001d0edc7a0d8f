//! Daily trigger math — when does "HH:MM portal time" fire next?

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};

use campusclock_core::error::{ClockError, Result};

/// Compute the next fire instant strictly after `after` for a wall-clock
/// time given as "HH:MM" in the portal's UTC offset.
pub fn next_daily_fire(
    daily_at: &str,
    after: DateTime<Utc>,
    utc_offset_hours: i32,
) -> Result<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(daily_at, "%H:%M")
        .map_err(|e| ClockError::Config(format!("Invalid daily_at '{daily_at}': {e}")))?;
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
        .ok_or_else(|| ClockError::Config(format!("Invalid UTC offset {utc_offset_hours}")))?;

    let local_after = after.with_timezone(&offset);
    let mut candidate = local_after
        .date_naive()
        .and_time(time)
        .and_local_timezone(offset)
        .single()
        .ok_or_else(|| ClockError::Config("Ambiguous daily fire time".into()))?;

    if candidate.with_timezone(&Utc) <= after {
        candidate += Duration::days(1);
    }
    Ok(candidate.with_timezone(&Utc))
}
