//! Tracking engine.
//!
//! The engine is a wall-clock-driven state machine with no internal threads
//! or timers. Every entry point takes the current instant explicitly and runs
//! to completion:
//!
//! - [`TrackerEngine::apply_reading`] for each inbound reading
//! - [`TrackerEngine::tick`] when the scheduler's earliest timer is due
//! - [`TrackerEngine::check_watchdog`] on a coarse periodic tick
//! - [`TrackerEngine::reconcile_restored`] once at startup
//!
//! ## Usage
//!
//! ```ignore
//! let mut engine = TrackerEngine::new(settings, chrono::Local, source);
//! engine.reconcile_restored(records, &history, Utc::now());
//! engine.start(Utc::now());
//! // For every reading:
//! engine.apply_reading(&reading);
//! // When engine.next_due() passes:
//! engine.tick(Utc::now());
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::{debug, info, warn};

use super::scheduler::ResetScheduler;
use super::store::{ConfiguredInitial, PeriodStore};
use crate::events::{Event, Observer, PeriodSnapshot, ResetReason};
use crate::period::{Extremum, Field, OutputKind, PeriodCalendar, PeriodKind};
use crate::reading::{quantize, Reading, ReadingSource};

/// Static engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub periods: Vec<PeriodKind>,
    pub outputs: Vec<OutputKind>,
    pub initials: BTreeMap<PeriodKind, ConfiguredInitial>,
    /// Delay applied after each boundary; also the half-width of the dead zone.
    pub offset: Duration,
    /// Window after a reset in which a cumulative drop re-triggers it.
    /// Zero disables the check.
    pub late_reset_grace: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            periods: vec![PeriodKind::Daily],
            outputs: vec![OutputKind::Max, OutputKind::Min],
            initials: BTreeMap::new(),
            offset: Duration::zero(),
            late_reset_grace: Duration::seconds(300),
        }
    }
}

impl EngineSettings {
    pub fn new(periods: impl IntoIterator<Item = PeriodKind>) -> Self {
        Self {
            periods: periods.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = OutputKind>) -> Self {
        self.outputs = outputs.into_iter().collect();
        self
    }

    pub fn with_initial(mut self, kind: PeriodKind, initial: ConfiguredInitial) -> Self {
        self.initials.insert(kind, initial);
        self
    }

    pub fn with_offset(mut self, offset: Duration) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_late_reset_grace(mut self, grace: Duration) -> Self {
        self.late_reset_grace = grace;
        self
    }
}

/// Multi-period extremum and delta tracker for one reading source.
pub struct TrackerEngine<Tz: TimeZone, S: ReadingSource> {
    calendar: PeriodCalendar<Tz>,
    source: S,
    pub(super) store: PeriodStore,
    scheduler: ResetScheduler,
    outputs: BTreeSet<OutputKind>,
    late_reset_grace: Duration,
    observers: Vec<Box<dyn Observer>>,
}

impl<Tz: TimeZone, S: ReadingSource> TrackerEngine<Tz, S> {
    pub fn new(settings: EngineSettings, tz: Tz, source: S) -> Self {
        let offset = settings.offset.max(Duration::zero());
        Self {
            calendar: PeriodCalendar::new(tz),
            source,
            store: PeriodStore::new(settings.periods, settings.initials),
            scheduler: ResetScheduler::new(offset),
            outputs: settings.outputs.into_iter().collect(),
            late_reset_grace: settings.late_reset_grace,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: impl Observer + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn add_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn calendar(&self) -> &PeriodCalendar<Tz> {
        &self.calendar
    }

    pub fn store(&self) -> &PeriodStore {
        &self.store
    }

    pub fn scheduler(&self) -> &ResetScheduler {
        &self.scheduler
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn offset(&self) -> Duration {
        self.scheduler.offset()
    }

    pub fn outputs(&self) -> impl Iterator<Item = OutputKind> + '_ {
        self.outputs.iter().copied()
    }

    /// Configured periods, narrowest first.
    pub fn periods(&self) -> Vec<PeriodKind> {
        self.store.kinds().collect()
    }

    /// Effective value of one field, configured bounds applied.
    pub fn get(&self, kind: PeriodKind, field: Field) -> Option<f64> {
        self.store.get(kind, field)
    }

    /// Net change since the last reset.
    pub fn delta(&self, kind: PeriodKind) -> Option<f64> {
        let start = self.store.get(kind, Field::Start)?;
        let end = self.store.get(kind, Field::End)?;
        Some(quantize(end - start))
    }

    pub fn last_reset(&self, kind: PeriodKind) -> Option<DateTime<Utc>> {
        self.store.last_reset(kind)
    }

    pub fn snapshot(&self, kind: PeriodKind) -> Option<PeriodSnapshot> {
        let period = self.store.period(kind)?;
        Some(PeriodSnapshot {
            period: kind,
            max: self.get(kind, Field::Max),
            min: self.get(kind, Field::Min),
            start: period.start,
            end: period.end,
            delta: self.delta(kind),
            last_reset: period.last_reset,
        })
    }

    pub fn snapshots(&self) -> Vec<PeriodSnapshot> {
        self.store
            .kinds()
            .filter_map(|kind| self.snapshot(kind))
            .collect()
    }

    /// Earliest pending reset timer.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.scheduler.next_due()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Initialize from the live source and arm every reset timer.
    ///
    /// Periods never initialized (not even by restored history) get their
    /// last reset set to the start of the current window, so the watchdog
    /// and inline checks have a reference point.
    pub fn start(&mut self, now: DateTime<Utc>) {
        let value = self.live_value();
        if value.is_none() {
            warn!("reading source unavailable at startup");
        }
        for kind in self.periods() {
            if self.store.last_reset(kind).is_none() {
                let start = self.calendar.period_start(now, kind).unwrap_or(now);
                self.store.set_last_reset(kind, start);
            }
            if let Some(value) = value {
                self.store.seed_start(kind, value);
                self.store.apply_reading(kind, value);
            }
        }
        self.schedule_all(now);
    }

    /// Cancel and re-arm the timer of every period with a boundary.
    pub fn schedule_all(&mut self, now: DateTime<Utc>) {
        for kind in self.periods() {
            self.scheduler.cancel(kind);
            if let Some(next) = self.calendar.next_reset(now, kind) {
                self.scheduler.arm(kind, next);
            }
        }
    }

    /// Ingest one reading. Returns whether any period was updated.
    pub fn apply_reading(&mut self, reading: &Reading) -> bool {
        let Some(value) = reading.value.numeric() else {
            warn!(value = ?reading.value, "dropping non-numeric reading");
            return false;
        };
        let now = reading.at;
        let mut updated = Vec::new();

        for kind in self.periods() {
            if kind.has_boundary() {
                if self.boundary_missed(kind, now) {
                    self.scheduler.cancel(kind);
                    self.handle_reset(now, kind, ResetReason::Inline);
                }

                if self.scheduler.in_dead_zone(kind, now) {
                    let stored_max = self.store.stored_extreme(kind, Extremum::Max);
                    if reading.is_cumulative && stored_max.is_some_and(|max| value < max) {
                        self.scheduler.cancel(kind);
                        self.handle_reset(now, kind, ResetReason::Early);
                    } else {
                        debug!(period = %kind, value, %now, "reading inside dead zone suppressed");
                    }
                    continue;
                }

                if reading.is_cumulative && self.rolled_over_after_reset(kind, value, now) {
                    self.scheduler.cancel(kind);
                    self.handle_reset(now, kind, ResetReason::Late);
                    continue;
                }
            }

            self.store.apply_reading(kind, value);
            updated.push(kind);
        }

        if updated.is_empty() {
            return false;
        }
        self.notify(&Event::ReadingApplied {
            value,
            periods: updated,
            at: now,
        });
        true
    }

    /// Reset one period from the live source and re-arm its timer.
    ///
    /// The timer is re-armed even when an observer fails or panics.
    pub fn handle_reset(&mut self, now: DateTime<Utc>, kind: PeriodKind, reason: ResetReason) {
        if !self.store.contains(kind) {
            return;
        }
        let value = self.live_value();
        self.store.reset_to(kind, value, now);
        info!(period = %kind, %reason, value = ?value, %now, "period reset");

        if let Some(snapshot) = self.snapshot(kind) {
            self.notify(&Event::PeriodReset {
                reason,
                snapshot,
                at: now,
            });
        }

        if let Some(next) = self.calendar.next_reset(now, kind) {
            self.scheduler.arm(kind, next);
        }
    }

    /// Fire every timer due at `now`. Returns how many resets ran.
    pub fn tick(&mut self, now: DateTime<Utc>) -> usize {
        let due = self.scheduler.take_due(now);
        for &kind in &due {
            self.handle_reset(now, kind, ResetReason::Scheduled);
        }
        due.len()
    }

    /// Force a reset of every period whose boundary (plus offset) passed
    /// without one. Returns how many resets ran.
    pub fn check_watchdog(&mut self, now: DateTime<Utc>) -> usize {
        let mut forced = 0;
        for kind in self.periods() {
            if kind.has_boundary() && self.boundary_missed(kind, now) {
                info!(period = %kind, last_reset = ?self.store.last_reset(kind), "watchdog found missed reset");
                self.handle_reset(now, kind, ResetReason::Watchdog);
                forced += 1;
            }
        }
        forced
    }

    /// Cancel every pending timer.
    pub fn shutdown(&mut self) {
        self.scheduler.cancel_all();
        debug!("all reset timers cancelled");
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn live_value(&self) -> Option<f64> {
        self.source
            .current_value()
            .filter(|value| value.is_finite())
            .map(quantize)
    }

    /// Last reset predates the current window and the offset has elapsed.
    fn boundary_missed(&self, kind: PeriodKind, now: DateTime<Utc>) -> bool {
        let (Some(last_reset), Some(start)) = (
            self.store.last_reset(kind),
            self.calendar.period_start(now, kind),
        ) else {
            return false;
        };
        last_reset < start && now >= start + self.scheduler.offset()
    }

    /// A cumulative value below the last reading shortly after a reset means
    /// the source rolled over late.
    fn rolled_over_after_reset(&self, kind: PeriodKind, value: f64, now: DateTime<Utc>) -> bool {
        if self.late_reset_grace <= Duration::zero() {
            return false;
        }
        let Some(period) = self.store.period(kind) else {
            return false;
        };
        let within_grace = period
            .last_reset
            .is_some_and(|at| now >= at && now - at <= self.late_reset_grace);
        within_grace && period.end.is_some_and(|end| value < end)
    }

    pub(super) fn notify(&mut self, event: &Event) {
        for observer in &mut self.observers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(event)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(observer = observer.name(), error = %err, "observer failed"),
                Err(_) => warn!(observer = observer.name(), "observer panicked"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ObserverError;
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tokio::sync::watch;

    type Engine = TrackerEngine<Utc, watch::Receiver<Option<f64>>>;

    fn utc(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, s).unwrap()
    }

    fn engine(settings: EngineSettings, live: Option<f64>) -> (Engine, watch::Sender<Option<f64>>) {
        let (tx, rx) = watch::channel(live);
        (TrackerEngine::new(settings, Utc, rx), tx)
    }

    fn recorder(engine: Engine) -> (Engine, Rc<RefCell<Vec<Event>>>) {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        let engine = engine.with_observer(move |event: &Event| -> Result<(), ObserverError> {
            sink.borrow_mut().push(event.clone());
            Ok(())
        });
        (engine, events)
    }

    #[test]
    fn floor_example_from_daily_readings() {
        let settings = EngineSettings::new([PeriodKind::Daily])
            .with_initial(PeriodKind::Daily, ConfiguredInitial::new(Some(45.0), None));
        let (mut engine, live) = engine(settings, Some(13.1));
        let morning = utc(2023, 1, 1, 8, 0, 0);
        engine.start(morning);

        engine.apply_reading(&Reading::new(13.1, morning));
        engine.apply_reading(&Reading::new(50.2, morning + Duration::hours(1)));
        assert_eq!(engine.get(PeriodKind::Daily, Field::Max), Some(50.2));

        live.send_replace(Some(10.0));
        engine.handle_reset(utc(2023, 1, 2, 0, 0, 0), PeriodKind::Daily, ResetReason::Scheduled);
        assert_eq!(engine.get(PeriodKind::Daily, Field::Max), Some(45.0));
        assert_eq!(engine.get(PeriodKind::Daily, Field::Min), Some(10.0));
    }

    #[test]
    fn start_seeds_values_and_last_reset() {
        let (mut engine, _live) = engine(
            EngineSettings::new([PeriodKind::Daily, PeriodKind::AllTime]),
            Some(10.0),
        );
        let now = utc(2023, 1, 2, 10, 0, 0);
        engine.start(now);

        assert_eq!(engine.last_reset(PeriodKind::Daily), Some(utc(2023, 1, 2, 0, 0, 0)));
        assert_eq!(engine.last_reset(PeriodKind::AllTime), Some(now));
        assert_eq!(engine.get(PeriodKind::Daily, Field::Start), Some(10.0));
        assert_eq!(engine.delta(PeriodKind::Daily), Some(0.0));
        assert_eq!(engine.next_due(), Some(utc(2023, 1, 3, 0, 0, 0)));
    }

    #[test]
    fn start_without_source_leaves_values_absent() {
        let (mut engine, _live) = engine(EngineSettings::new([PeriodKind::Daily]), None);
        engine.start(utc(2023, 1, 2, 10, 0, 0));
        assert_eq!(engine.get(PeriodKind::Daily, Field::Max), None);
        assert!(engine.next_due().is_some());
    }

    #[test]
    fn invalid_reading_is_dropped() {
        let (engine, _live) = engine(EngineSettings::new([PeriodKind::Daily]), Some(1.0));
        let (mut engine, events) = recorder(engine);
        engine.start(utc(2023, 1, 2, 10, 0, 0));

        assert!(!engine.apply_reading(&Reading::new("unavailable", utc(2023, 1, 2, 11, 0, 0))));
        assert_eq!(engine.get(PeriodKind::Daily, Field::End), Some(1.0));
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn huge_reading_becomes_the_extreme() {
        let (mut engine, _live) = engine(EngineSettings::new([PeriodKind::Daily]), Some(1.0));
        let now = utc(2023, 1, 2, 10, 0, 0);
        engine.start(now);

        assert!(engine.apply_reading(&Reading::new(1.0e306, now + Duration::minutes(1))));
        assert_eq!(engine.get(PeriodKind::Daily, Field::Max), Some(1.0e306));
        assert_eq!(engine.get(PeriodKind::Daily, Field::Min), Some(1.0));
    }

    #[test]
    fn readings_notify_once_per_event() {
        let (engine, _live) = engine(
            EngineSettings::new([PeriodKind::Daily, PeriodKind::Weekly, PeriodKind::AllTime]),
            Some(1.0),
        );
        let (mut engine, events) = recorder(engine);
        engine.start(utc(2023, 1, 2, 10, 0, 0));

        assert!(engine.apply_reading(&Reading::new(4.0, utc(2023, 1, 2, 11, 0, 0))));
        let events = events.borrow();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::ReadingApplied { value, periods, .. } => {
                assert_eq!(*value, 4.0);
                assert_eq!(periods.len(), 3);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn delta_tracks_end_minus_start() {
        let settings =
            EngineSettings::new([PeriodKind::Daily]).with_outputs([OutputKind::Delta]);
        let (mut engine, _live) = engine(settings, Some(10.0));
        let now = utc(2023, 1, 2, 10, 0, 0);
        engine.start(now);
        engine.apply_reading(&Reading::new(15.0, now + Duration::minutes(1)));
        assert_eq!(engine.delta(PeriodKind::Daily), Some(5.0));
        engine.apply_reading(&Reading::new(5.0, now + Duration::minutes(2)));
        assert_eq!(engine.delta(PeriodKind::Daily), Some(-5.0));
    }

    #[test]
    fn reset_is_idempotent() {
        let (mut engine, _live) = engine(EngineSettings::new([PeriodKind::Daily]), Some(7.0));
        let now = utc(2023, 1, 2, 0, 0, 0);
        engine.start(now - Duration::hours(3));
        engine.apply_reading(&Reading::new(9.0, now - Duration::hours(1)));

        engine.handle_reset(now, PeriodKind::Daily, ResetReason::Scheduled);
        let once = engine.snapshot(PeriodKind::Daily);
        let due_once = engine.next_due();
        engine.handle_reset(now, PeriodKind::Daily, ResetReason::Scheduled);
        assert_eq!(engine.snapshot(PeriodKind::Daily), once);
        assert_eq!(engine.next_due(), due_once);
    }

    #[test]
    fn tick_fires_due_timers_and_rearms() {
        let (engine, live) = engine(EngineSettings::new([PeriodKind::Daily]), Some(3.0));
        let (mut engine, events) = recorder(engine);
        engine.start(utc(2023, 1, 1, 12, 0, 0));
        live.send_replace(Some(8.0));

        assert_eq!(engine.tick(utc(2023, 1, 1, 23, 59, 59)), 0);
        assert_eq!(engine.tick(utc(2023, 1, 2, 0, 0, 0)), 1);
        assert_eq!(engine.get(PeriodKind::Daily, Field::Start), Some(8.0));
        assert_eq!(engine.next_due(), Some(utc(2023, 1, 3, 0, 0, 0)));
        assert!(matches!(
            events.borrow().last(),
            Some(Event::PeriodReset { reason: ResetReason::Scheduled, .. })
        ));
    }

    #[test]
    fn failing_observer_does_not_break_the_chain() {
        let (engine, _live) = engine(EngineSettings::new([PeriodKind::Daily]), Some(1.0));
        let mut engine = engine
            .with_observer(|_: &Event| -> Result<(), ObserverError> {
                Err(ObserverError::new("broken", "refused"))
            })
            .with_observer(|_: &Event| -> Result<(), ObserverError> { panic!("observer bug") });
        engine.start(utc(2023, 1, 1, 12, 0, 0));

        engine.handle_reset(utc(2023, 1, 2, 0, 0, 0), PeriodKind::Daily, ResetReason::Scheduled);
        assert_eq!(engine.next_due(), Some(utc(2023, 1, 3, 0, 0, 0)));
    }

    #[test]
    fn all_time_has_no_timer_and_never_resets_inline() {
        let (mut engine, _live) = engine(EngineSettings::new([PeriodKind::AllTime]), Some(2.0));
        engine.start(utc(2020, 1, 1, 0, 0, 0));
        assert_eq!(engine.next_due(), None);

        engine.apply_reading(&Reading::new(1.0, utc(2024, 6, 1, 0, 0, 0)));
        assert_eq!(engine.get(PeriodKind::AllTime, Field::Max), Some(2.0));
        assert_eq!(engine.get(PeriodKind::AllTime, Field::Min), Some(1.0));
        assert_eq!(engine.check_watchdog(utc(2025, 1, 1, 0, 0, 0)), 0);
    }

    #[test]
    fn late_rollover_resets_again() {
        let (mut engine, live) = engine(EngineSettings::new([PeriodKind::Daily]), Some(10.0));
        let midnight = utc(2023, 1, 2, 0, 0, 0);
        engine.start(midnight - Duration::hours(2));
        engine.tick(midnight);
        assert_eq!(engine.get(PeriodKind::Daily, Field::Max), Some(10.0));

        let late = midnight + Duration::seconds(30);
        live.send_replace(Some(0.0));
        engine.apply_reading(&Reading::new(0.0, late).cumulative());

        assert_eq!(engine.get(PeriodKind::Daily, Field::Max), Some(0.0));
        assert_eq!(engine.last_reset(PeriodKind::Daily), Some(late));
    }

    #[test]
    fn late_rollover_ignored_for_non_cumulative_sources() {
        let (mut engine, _live) = engine(EngineSettings::new([PeriodKind::Daily]), Some(10.0));
        let midnight = utc(2023, 1, 2, 0, 0, 0);
        engine.start(midnight - Duration::hours(2));
        engine.tick(midnight);

        engine.apply_reading(&Reading::new(0.0, midnight + Duration::seconds(30)));
        assert_eq!(engine.get(PeriodKind::Daily, Field::Max), Some(10.0));
        assert_eq!(engine.get(PeriodKind::Daily, Field::Min), Some(0.0));
        assert_eq!(engine.last_reset(PeriodKind::Daily), Some(midnight));
    }

    #[test]
    fn late_rollover_disabled_with_zero_grace() {
        let settings =
            EngineSettings::new([PeriodKind::Daily]).with_late_reset_grace(Duration::zero());
        let (mut engine, _live) = engine(settings, Some(10.0));
        let midnight = utc(2023, 1, 2, 0, 0, 0);
        engine.start(midnight - Duration::hours(2));
        engine.tick(midnight);

        engine.apply_reading(&Reading::new(0.0, midnight + Duration::seconds(30)).cumulative());
        assert_eq!(engine.last_reset(PeriodKind::Daily), Some(midnight));
    }

    #[test]
    fn shutdown_cancels_all_timers() {
        let (mut engine, _live) = engine(
            EngineSettings::new([PeriodKind::Daily, PeriodKind::Monthly]),
            Some(1.0),
        );
        engine.start(utc(2023, 1, 2, 10, 0, 0));
        assert!(engine.next_due().is_some());
        engine.shutdown();
        assert_eq!(engine.next_due(), None);
        engine.shutdown();
    }
}
