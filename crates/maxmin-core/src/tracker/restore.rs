//! Startup reconciliation of persisted history.
//!
//! Restored values are only trusted when their `last_reset` proves they
//! belong to the current window. Afterwards extremes are propagated from
//! narrow to broad periods so that, e.g., all-time never reports a smaller
//! max than yearly.

use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::engine::TrackerEngine;
use super::store::PeriodStore;
use crate::events::Event;
use crate::period::{Extremum, Field, OutputKind, PeriodKind};
use crate::reading::ReadingSource;

/// One previously persisted derived value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreRecord {
    pub period: PeriodKind,
    pub field: Field,
    pub value: f64,
    /// Raw persisted timestamp; unparsable values are treated as absent.
    #[serde(default)]
    pub last_reset: Option<String>,
}

impl RestoreRecord {
    pub fn new(period: PeriodKind, field: Field, value: f64, last_reset: Option<DateTime<Utc>>) -> Self {
        Self {
            period,
            field,
            value,
            last_reset: last_reset.map(|at| at.to_rfc3339()),
        }
    }

    fn parsed_last_reset(&self) -> Option<DateTime<Utc>> {
        let raw = self.last_reset.as_deref()?.trim();
        let parsed = DateTime::parse_from_rfc3339(raw)
            .or_else(|_| raw.parse::<DateTime<FixedOffset>>());
        match parsed {
            Ok(at) => Some(at.with_timezone(&Utc)),
            Err(err) => {
                warn!(period = %self.period, field = %self.field, raw, error = %err, "malformed restored last_reset");
                None
            }
        }
    }
}

/// Extremes a configuration change already invalidated; restored history
/// must not repopulate them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetHistory(BTreeSet<(PeriodKind, Extremum)>);

impl ResetHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: PeriodKind, extremum: Extremum) -> bool {
        self.0.insert((kind, extremum))
    }

    pub fn contains(&self, kind: PeriodKind, extremum: Extremum) -> bool {
        self.0.contains(&(kind, extremum))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PeriodKind, Extremum)> + '_ {
        self.0.iter().copied()
    }

    fn skips(&self, kind: PeriodKind, field: Field) -> bool {
        field
            .extremum()
            .is_some_and(|extremum| self.contains(kind, extremum))
    }
}

impl FromIterator<(PeriodKind, Extremum)> for ResetHistory {
    fn from_iter<I: IntoIterator<Item = (PeriodKind, Extremum)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub accepted: usize,
    pub discarded: usize,
}

impl<Tz: TimeZone, S: ReadingSource> TrackerEngine<Tz, S> {
    /// Merge persisted records into the store, then propagate consistency.
    pub fn reconcile_restored(
        &mut self,
        records: impl IntoIterator<Item = RestoreRecord>,
        history: &ResetHistory,
        now: DateTime<Utc>,
    ) -> RestoreOutcome {
        let mut outcome = RestoreOutcome::default();
        for record in records {
            if self.restore_record(&record, history, now) {
                outcome.accepted += 1;
            } else {
                outcome.discarded += 1;
            }
        }
        self.propagate_consistency(history);

        info!(accepted = outcome.accepted, discarded = outcome.discarded, "restored history reconciled");
        self.notify(&Event::Restored {
            accepted: outcome.accepted,
            discarded: outcome.discarded,
            at: now,
        });
        outcome
    }

    /// Narrow -> broad propagation of extremes across configured periods.
    pub fn propagate_consistency(&mut self, history: &ResetHistory) {
        propagate(&mut self.store, history);
    }

    /// Every (period, field) pair the requested outputs persist.
    pub fn tracked_fields(&self) -> Vec<(PeriodKind, Field)> {
        let fields: Vec<Field> = self.outputs().flat_map(OutputKind::fields).copied().collect();
        self.store
            .kinds()
            .flat_map(|kind| fields.iter().map(move |&field| (kind, field)))
            .collect()
    }

    /// Records for every requested output, ready to persist. Absent values
    /// have no record.
    pub fn export_records(&self) -> Vec<RestoreRecord> {
        self.tracked_fields()
            .into_iter()
            .filter_map(|(kind, field)| {
                let value = self.store.get(kind, field)?;
                Some(RestoreRecord::new(kind, field, value, self.store.last_reset(kind)))
            })
            .collect()
    }

    fn restore_record(&mut self, record: &RestoreRecord, history: &ResetHistory, now: DateTime<Utc>) -> bool {
        let kind = record.period;
        if !self.store.contains(kind) || !record.value.is_finite() {
            return false;
        }
        if history.skips(kind, record.field) {
            debug!(period = %kind, field = %record.field, "restored value skipped by reset history");
            return false;
        }

        match record.parsed_last_reset() {
            Some(last_reset) => {
                let period_start = self.calendar().period_start(now, kind);
                if kind.has_boundary() && period_start.is_some_and(|start| last_reset < start) {
                    debug!(period = %kind, field = %record.field, %last_reset, "discarding stale restored value");
                    return false;
                }
                if self.store.last_reset(kind).map_or(true, |current| last_reset > current) {
                    self.store.set_last_reset(kind, last_reset);
                }
            }
            None => {
                if self.store.last_reset(kind).is_some() {
                    debug!(period = %kind, field = %record.field, "discarding restored value without last_reset");
                    return false;
                }
            }
        }

        match record.field.extremum() {
            Some(extremum) => self.store.merge_extreme(kind, extremum, record.value),
            None => self.store.set_boundary(kind, record.field, record.value),
        }
        self.store.enforce_initial(kind);
        true
    }
}

fn propagate(store: &mut PeriodStore, history: &ResetHistory) {
    let kinds: Vec<_> = store.kinds().collect();
    for (index, &broad) in kinds.iter().enumerate() {
        for &narrow in &kinds[..index] {
            for extremum in [Extremum::Max, Extremum::Min] {
                if history.contains(broad, extremum) {
                    continue;
                }
                // Effective value, so a narrow floor reaches broad periods
                // whether or not the narrow period holds data.
                if let Some(value) = store.get(narrow, extremum.field()) {
                    store.merge_extreme(broad, extremum, value);
                }
            }
        }
    }
    store.enforce_all();
}
