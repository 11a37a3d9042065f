//! Calendar-day arithmetic in the devices' local time zone.

use chrono::{DateTime, Duration, NaiveDate, TimeZone as _, Utc};
use chrono_tz::Tz;

/// A device-local calendar date and the UTC instants that bound it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalDay {
    pub date: NaiveDate,
    /// First instant of the day (inclusive).
    pub start: DateTime<Utc>,
    /// First instant of the following day (exclusive).
    pub end: DateTime<Utc>,
}

impl LocalDay {
    /// The local day in `tz` that contains `now`.
    pub fn containing(now: DateTime<Utc>, tz: Tz) -> Self {
        let date = now.with_timezone(&tz).date_naive();
        Self::of(date, tz)
    }

    pub fn of(date: NaiveDate, tz: Tz) -> Self {
        let next = date.succ_opt().unwrap_or(date);
        LocalDay {
            date,
            start: start_of_day(date, tz),
            end: start_of_day(next, tz),
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

// Midnight can fall into a DST gap in some zones; walk forward to the first
// representable local time and take the earliest mapping of an overlap.
fn start_of_day(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    for minutes in (0..=180).step_by(15) {
        let candidate = midnight + Duration::minutes(minutes);
        if let Some(local) = tz.from_local_datetime(&candidate).earliest() {
            return local.with_timezone(&Utc);
        }
    }
    midnight.and_utc()
}
