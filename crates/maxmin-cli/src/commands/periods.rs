use chrono::{DateTime, Local, TimeZone, Utc};
use maxmin_core::{PeriodCalendar, PeriodKind, Result};
use serde::Serialize;

use super::Context;

#[derive(Serialize)]
struct PeriodWindow {
    period: PeriodKind,
    period_start: Option<DateTime<Utc>>,
    next_reset: Option<DateTime<Utc>>,
}

pub fn run(ctx: &Context, at: Option<DateTime<Utc>>) -> Result<()> {
    let config = ctx.load_config()?;
    let now = at.unwrap_or_else(Utc::now);
    let windows = match config.time_zone()? {
        Some(tz) => windows(&PeriodCalendar::new(tz), &config.periods, now),
        None => windows(&PeriodCalendar::new(Local), &config.periods, now),
    };
    println!("{}", serde_json::to_string_pretty(&windows)?);
    Ok(())
}

fn windows<Tz: TimeZone>(
    calendar: &PeriodCalendar<Tz>,
    periods: &[PeriodKind],
    now: DateTime<Utc>,
) -> Vec<PeriodWindow> {
    periods
        .iter()
        .map(|&period| PeriodWindow {
            period,
            period_start: calendar.period_start(now, period),
            next_reset: calendar.next_reset(now, period),
        })
        .collect()
}
