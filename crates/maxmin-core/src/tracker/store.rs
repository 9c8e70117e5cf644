//! In-memory table of per-period scalars.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::period::{Extremum, Field, PeriodKind};

/// Scalars kept for one period since its last reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackedPeriod {
    pub max: Option<f64>,
    pub min: Option<f64>,
    /// First reading of the window (set only at reset).
    pub start: Option<f64>,
    /// Most recent accepted reading.
    pub end: Option<f64>,
    /// `None` means the period was never initialized.
    pub last_reset: Option<DateTime<Utc>>,
}

impl TrackedPeriod {
    fn field(&self, field: Field) -> Option<f64> {
        match field {
            Field::Max => self.max,
            Field::Min => self.min,
            Field::Start => self.start,
            Field::End => self.end,
        }
    }
}

/// Absolute bounds configured for a period.
///
/// The effective max is never reported below `floor_max`, the effective min
/// never above `ceiling_min`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfiguredInitial {
    #[serde(default, rename = "max", skip_serializing_if = "Option::is_none")]
    pub floor_max: Option<f64>,
    #[serde(default, rename = "min", skip_serializing_if = "Option::is_none")]
    pub ceiling_min: Option<f64>,
}

impl ConfiguredInitial {
    pub fn new(floor_max: Option<f64>, ceiling_min: Option<f64>) -> Self {
        Self {
            floor_max,
            ceiling_min,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.floor_max.is_none() && self.ceiling_min.is_none()
    }

    fn bound_max(&self, max: Option<f64>) -> Option<f64> {
        match (max, self.floor_max) {
            (Some(v), Some(floor)) if v < floor => Some(floor),
            (None, floor) => floor,
            (v, _) => v,
        }
    }

    fn bound_min(&self, min: Option<f64>) -> Option<f64> {
        match (min, self.ceiling_min) {
            (Some(v), Some(ceiling)) if v > ceiling => Some(ceiling),
            (None, ceiling) => ceiling,
            (v, _) => v,
        }
    }
}

/// Per-period scalars plus their configured bounds.
///
/// Only configured periods have entries; operations on any other kind are
/// no-ops and reads return `None`.
#[derive(Debug, Clone, Default)]
pub struct PeriodStore {
    periods: BTreeMap<PeriodKind, TrackedPeriod>,
    initials: BTreeMap<PeriodKind, ConfiguredInitial>,
}

impl PeriodStore {
    pub fn new(
        kinds: impl IntoIterator<Item = PeriodKind>,
        initials: impl IntoIterator<Item = (PeriodKind, ConfiguredInitial)>,
    ) -> Self {
        let periods: BTreeMap<_, _> = kinds
            .into_iter()
            .map(|kind| (kind, TrackedPeriod::default()))
            .collect();
        let initials = initials
            .into_iter()
            .filter(|(kind, initial)| periods.contains_key(kind) && !initial.is_empty())
            .collect();
        Self { periods, initials }
    }

    /// Configured periods, narrowest first.
    pub fn kinds(&self) -> impl Iterator<Item = PeriodKind> + '_ {
        self.periods.keys().copied()
    }

    pub fn contains(&self, kind: PeriodKind) -> bool {
        self.periods.contains_key(&kind)
    }

    pub fn period(&self, kind: PeriodKind) -> Option<&TrackedPeriod> {
        self.periods.get(&kind)
    }

    pub fn initial(&self, kind: PeriodKind) -> ConfiguredInitial {
        self.initials.get(&kind).copied().unwrap_or_default()
    }

    /// Effective value of a field.
    ///
    /// Max and min are bounded by the configured initial at read time, so the
    /// bound holds no matter which write path produced the stored value.
    pub fn get(&self, kind: PeriodKind, field: Field) -> Option<f64> {
        let period = self.periods.get(&kind)?;
        let initial = self.initial(kind);
        match field {
            Field::Max => initial.bound_max(period.max),
            Field::Min => initial.bound_min(period.min),
            other => period.field(other),
        }
    }

    pub fn last_reset(&self, kind: PeriodKind) -> Option<DateTime<Utc>> {
        self.periods.get(&kind)?.last_reset
    }

    pub fn set_last_reset(&mut self, kind: PeriodKind, at: DateTime<Utc>) {
        if let Some(period) = self.periods.get_mut(&kind) {
            period.last_reset = Some(at);
        }
    }

    /// Record an accepted reading: `end` always moves, extremes widen.
    pub fn apply_reading(&mut self, kind: PeriodKind, value: f64) {
        let Some(period) = self.periods.get_mut(&kind) else {
            return;
        };
        period.end = Some(value);
        period.max = Some(period.max.map_or(value, |max| max.max(value)));
        period.min = Some(period.min.map_or(value, |min| min.min(value)));
    }

    /// Re-initialize a period from `value` (or from its bounds alone).
    pub fn reset_to(&mut self, kind: PeriodKind, value: Option<f64>, at: DateTime<Utc>) {
        let initial = self.initial(kind);
        let Some(period) = self.periods.get_mut(&kind) else {
            return;
        };
        period.start = value;
        period.end = value;
        period.max = initial.bound_max(value);
        period.min = initial.bound_min(value);
        period.last_reset = Some(at);
    }

    /// Seed `start` if the period has never seen one.
    pub fn seed_start(&mut self, kind: PeriodKind, value: f64) {
        if let Some(period) = self.periods.get_mut(&kind) {
            period.start.get_or_insert(value);
        }
    }

    /// Widen one extreme with `value`.
    pub fn merge_extreme(&mut self, kind: PeriodKind, extremum: Extremum, value: f64) {
        let Some(period) = self.periods.get_mut(&kind) else {
            return;
        };
        match extremum {
            Extremum::Max => period.max = Some(period.max.map_or(value, |max| max.max(value))),
            Extremum::Min => period.min = Some(period.min.map_or(value, |min| min.min(value))),
        }
    }

    /// Overwrite a boundary scalar (`start` or `end`). Extremes are merged,
    /// never overwritten, so they are ignored here.
    pub fn set_boundary(&mut self, kind: PeriodKind, field: Field, value: f64) {
        let Some(period) = self.periods.get_mut(&kind) else {
            return;
        };
        match field {
            Field::Start => period.start = Some(value),
            Field::End => period.end = Some(value),
            Field::Max | Field::Min => {}
        }
    }

    /// Raw stored extreme, without configured bounds.
    pub fn stored_extreme(&self, kind: PeriodKind, extremum: Extremum) -> Option<f64> {
        let period = self.periods.get(&kind)?;
        match extremum {
            Extremum::Max => period.max,
            Extremum::Min => period.min,
        }
    }

    /// Write the configured bounds into the stored extremes of one period.
    pub fn enforce_initial(&mut self, kind: PeriodKind) {
        let initial = self.initial(kind);
        if let Some(period) = self.periods.get_mut(&kind) {
            period.max = initial.bound_max(period.max);
            period.min = initial.bound_min(period.min);
        }
    }

    pub fn enforce_all(&mut self) {
        let kinds: Vec<_> = self.kinds().collect();
        for kind in kinds {
            self.enforce_initial(kind);
        }
    }
}
