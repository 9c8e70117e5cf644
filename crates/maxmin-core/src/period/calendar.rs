//! Local-calendar period boundaries.
//!
//! All arithmetic is done on local calendar dates and then resolved back to
//! an instant, so DST transitions and variable month/year lengths fall out
//! naturally instead of being approximated with fixed 24h/7d/30d offsets.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};

use super::PeriodKind;

/// Stateless boundary computations in a fixed time zone.
#[derive(Debug, Clone)]
pub struct PeriodCalendar<Tz: TimeZone> {
    tz: Tz,
}

impl<Tz: TimeZone> PeriodCalendar<Tz> {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn time_zone(&self) -> &Tz {
        &self.tz
    }

    /// Local midnight that opened the window containing `now`.
    ///
    /// Weeks start on Monday. All-time has no start.
    pub fn period_start(&self, now: DateTime<Utc>, kind: PeriodKind) -> Option<DateTime<Utc>> {
        let today = now.with_timezone(&self.tz).date_naive();
        let date = match kind {
            PeriodKind::Daily => today,
            PeriodKind::Weekly => {
                today - Duration::days(i64::from(today.weekday().num_days_from_monday()))
            }
            PeriodKind::Monthly => today.with_day(1)?,
            PeriodKind::Yearly => NaiveDate::from_ymd_opt(today.year(), 1, 1)?,
            PeriodKind::AllTime => return None,
        };
        Some(self.local_midnight(date))
    }

    /// Local midnight of the next boundary strictly after `now`.
    pub fn next_reset(&self, now: DateTime<Utc>, kind: PeriodKind) -> Option<DateTime<Utc>> {
        let today = now.with_timezone(&self.tz).date_naive();
        let date = match kind {
            PeriodKind::Daily => today.succ_opt()?,
            PeriodKind::Weekly => {
                today + Duration::days(7 - i64::from(today.weekday().num_days_from_monday()))
            }
            PeriodKind::Monthly => {
                if today.month() == 12 {
                    NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)?
                } else {
                    NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 1)?
                }
            }
            PeriodKind::Yearly => NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)?,
            PeriodKind::AllTime => return None,
        };
        Some(self.local_midnight(date))
    }

    /// Resolve local midnight of `date` to an instant.
    ///
    /// An ambiguous midnight resolves to its earliest instant. A midnight
    /// skipped by a DST gap resolves to the first valid local time after it.
    fn local_midnight(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_time(NaiveTime::MIN);
        match self.tz.from_local_datetime(&midnight) {
            LocalResult::Single(dt) => dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => (1..=48i64)
                .map(|step| midnight + Duration::minutes(30 * step))
                .find_map(|candidate| self.tz.from_local_datetime(&candidate).earliest())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&midnight)),
        }
    }
}
