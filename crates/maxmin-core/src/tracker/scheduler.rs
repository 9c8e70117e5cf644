//! Per-period reset timers.
//!
//! Timers are plain deadlines; nothing fires on its own. The owner polls
//! [`ResetScheduler::take_due`] (the runtime driver sleeps until
//! [`ResetScheduler::next_due`]) and runs the resets itself, which keeps
//! every mutation on one logical execution context.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::period::PeriodKind;

/// Opaque handle of one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// An armed reset timer.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReset {
    pub handle: TimerHandle,
    pub kind: PeriodKind,
    /// Calendar boundary the timer belongs to.
    pub boundary: DateTime<Utc>,
    /// Boundary plus offset; when the timer fires.
    pub due_at: DateTime<Utc>,
}

/// Owns at most one timer per period.
#[derive(Debug, Clone)]
pub struct ResetScheduler {
    offset: Duration,
    timers: BTreeMap<PeriodKind, PendingReset>,
    /// Last boundary armed per period. Survives cancellation so readings can
    /// still be checked against the dead zone while a reset is in flight.
    next_resets: BTreeMap<PeriodKind, DateTime<Utc>>,
    next_handle: u64,
}

impl ResetScheduler {
    pub fn new(offset: Duration) -> Self {
        Self {
            offset,
            timers: BTreeMap::new(),
            next_resets: BTreeMap::new(),
            next_handle: 0,
        }
    }

    pub fn offset(&self) -> Duration {
        self.offset
    }

    /// Arm the timer for `kind` at `boundary + offset`, replacing any
    /// previous one.
    pub fn arm(&mut self, kind: PeriodKind, boundary: DateTime<Utc>) -> TimerHandle {
        self.cancel(kind);
        self.next_handle += 1;
        let handle = TimerHandle(self.next_handle);
        let due_at = boundary + self.offset;
        self.next_resets.insert(kind, boundary);
        self.timers.insert(
            kind,
            PendingReset {
                handle,
                kind,
                boundary,
                due_at,
            },
        );
        debug!(period = %kind, %boundary, %due_at, "reset timer armed");
        handle
    }

    /// Cancel the timer for `kind`. Returns whether one was pending;
    /// cancelling twice is a no-op.
    pub fn cancel(&mut self, kind: PeriodKind) -> bool {
        let cancelled = self.timers.remove(&kind).is_some();
        if cancelled {
            debug!(period = %kind, "reset timer cancelled");
        }
        cancelled
    }

    /// Cancel by handle. A handle that was already replaced or fired does
    /// nothing.
    pub fn cancel_handle(&mut self, handle: TimerHandle) -> bool {
        let kind = self
            .timers
            .values()
            .find(|pending| pending.handle == handle)
            .map(|pending| pending.kind);
        match kind {
            Some(kind) => self.cancel(kind),
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        self.timers.clear();
        self.next_resets.clear();
    }

    pub fn pending(&self, kind: PeriodKind) -> Option<&PendingReset> {
        self.timers.get(&kind)
    }

    pub fn next_reset_at(&self, kind: PeriodKind) -> Option<DateTime<Utc>> {
        self.next_resets.get(&kind).copied()
    }

    /// Earliest instant any timer is due.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.timers.values().map(|pending| pending.due_at).min()
    }

    /// Remove and return every timer due at or before `now`.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<PeriodKind> {
        let due: Vec<_> = self
            .timers
            .values()
            .filter(|pending| pending.due_at <= now)
            .map(|pending| pending.kind)
            .collect();
        for kind in &due {
            self.timers.remove(kind);
        }
        due
    }

    /// Whether `now` lies within `offset` of the next boundary of `kind`.
    /// Always false with a zero offset.
    pub fn in_dead_zone(&self, kind: PeriodKind, now: DateTime<Utc>) -> bool {
        if self.offset <= Duration::zero() {
            return false;
        }
        match self.next_reset_at(kind) {
            Some(boundary) => now >= boundary - self.offset && now <= boundary + self.offset,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn midnight() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn arm_applies_offset() {
        let mut scheduler = ResetScheduler::new(Duration::seconds(10));
        scheduler.arm(PeriodKind::Daily, midnight());
        let pending = scheduler.pending(PeriodKind::Daily).unwrap();
        assert_eq!(pending.boundary, midnight());
        assert_eq!(pending.due_at, midnight() + Duration::seconds(10));
    }

    #[test]
    fn rearm_replaces_previous_timer() {
        let mut scheduler = ResetScheduler::new(Duration::zero());
        let first = scheduler.arm(PeriodKind::Daily, midnight());
        let second = scheduler.arm(PeriodKind::Daily, midnight() + Duration::days(1));
        assert_ne!(first, second);
        assert!(!scheduler.cancel_handle(first));
        assert_eq!(scheduler.pending(PeriodKind::Daily).unwrap().handle, second);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut scheduler = ResetScheduler::new(Duration::zero());
        scheduler.arm(PeriodKind::Weekly, midnight());
        assert!(scheduler.cancel(PeriodKind::Weekly));
        assert!(!scheduler.cancel(PeriodKind::Weekly));
        // Boundary is still known for dead-zone checks.
        assert_eq!(scheduler.next_reset_at(PeriodKind::Weekly), Some(midnight()));
    }

    #[test]
    fn take_due_returns_only_expired_timers() {
        let mut scheduler = ResetScheduler::new(Duration::zero());
        scheduler.arm(PeriodKind::Daily, midnight());
        scheduler.arm(PeriodKind::Monthly, midnight() + Duration::days(30));
        assert_eq!(scheduler.next_due(), Some(midnight()));

        assert!(scheduler.take_due(midnight() - Duration::seconds(1)).is_empty());
        assert_eq!(scheduler.take_due(midnight()), vec![PeriodKind::Daily]);
        assert!(scheduler.pending(PeriodKind::Daily).is_none());
        assert_eq!(scheduler.next_due(), Some(midnight() + Duration::days(30)));
    }

    #[test]
    fn dead_zone_is_symmetric_around_boundary() {
        let mut scheduler = ResetScheduler::new(Duration::seconds(10));
        scheduler.arm(PeriodKind::Daily, midnight());
        assert!(!scheduler.in_dead_zone(PeriodKind::Daily, midnight() - Duration::seconds(20)));
        assert!(scheduler.in_dead_zone(PeriodKind::Daily, midnight() - Duration::seconds(5)));
        assert!(scheduler.in_dead_zone(PeriodKind::Daily, midnight() + Duration::seconds(10)));
        assert!(!scheduler.in_dead_zone(PeriodKind::Daily, midnight() + Duration::seconds(15)));
    }

    #[test]
    fn no_dead_zone_without_offset() {
        let mut scheduler = ResetScheduler::new(Duration::zero());
        scheduler.arm(PeriodKind::Daily, midnight());
        assert!(!scheduler.in_dead_zone(PeriodKind::Daily, midnight()));
    }

    #[test]
    fn cancel_all_clears_everything() {
        let mut scheduler = ResetScheduler::new(Duration::zero());
        scheduler.arm(PeriodKind::Daily, midnight());
        scheduler.arm(PeriodKind::Yearly, midnight());
        scheduler.cancel_all();
        assert_eq!(scheduler.next_due(), None);
        assert_eq!(scheduler.next_reset_at(PeriodKind::Daily), None);
    }
}
