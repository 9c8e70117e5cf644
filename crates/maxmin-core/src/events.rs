use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ObserverError;
use crate::period::PeriodKind;

/// Why a period was reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetReason {
    /// The period's reset timer fired.
    Scheduled,
    /// A reading arrived after the boundary before the timer fired.
    Inline,
    /// A cumulative source rolled over inside the offset dead zone.
    Early,
    /// A cumulative source rolled over shortly after the period was reset.
    Late,
    /// The watchdog found a missed boundary.
    Watchdog,
}

impl ResetReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ResetReason::Scheduled => "scheduled",
            ResetReason::Inline => "inline",
            ResetReason::Early => "early",
            ResetReason::Late => "late",
            ResetReason::Watchdog => "watchdog",
        }
    }
}

impl std::fmt::Display for ResetReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effective values of one period at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSnapshot {
    pub period: PeriodKind,
    pub max: Option<f64>,
    pub min: Option<f64>,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub delta: Option<f64>,
    pub last_reset: Option<DateTime<Utc>>,
}

/// Every change to tracked state produces an Event.
/// Observers subscribe to them; the CLI prints them as JSON lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A reading updated one or more periods.
    ReadingApplied {
        value: f64,
        periods: Vec<PeriodKind>,
        at: DateTime<Utc>,
    },
    /// A period was re-initialized.
    PeriodReset {
        reason: ResetReason,
        snapshot: PeriodSnapshot,
        at: DateTime<Utc>,
    },
    /// Persisted history was merged at startup.
    Restored {
        accepted: usize,
        discarded: usize,
        at: DateTime<Utc>,
    },
}

/// Receives engine events.
///
/// A failing observer is logged and skipped; it never interrupts the engine.
pub trait Observer {
    fn name(&self) -> &str {
        "observer"
    }

    fn on_event(&mut self, event: &Event) -> Result<(), ObserverError>;
}

impl<F> Observer for F
where
    F: FnMut(&Event) -> Result<(), ObserverError>,
{
    fn on_event(&mut self, event: &Event) -> Result<(), ObserverError> {
        self(event)
    }
}
