//! Calendar-month arithmetic for credit periods.
//!
//! Adding a month keeps the day of month when it exists in the target month
//! and otherwise clamps to that month's last day: a reset on January 31 is
//! next due on February 28 (or 29), and from then on on the 28th.

use chrono::{DateTime, Months, Utc};

/// Add `months` calendar months to `at`, clamping the day of month.
#[must_use]
pub fn add_months(at: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    at.checked_add_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// The instant one calendar month after `at`.
#[must_use]
pub fn add_one_month(at: DateTime<Utc>) -> DateTime<Utc> {
    add_months(at, 1)
}

/// Whether a full calendar month has elapsed between `since` and `now`.
#[must_use]
pub fn month_elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    add_one_month(since) <= now
}
