//! The multi-period tracking engine and its parts.

mod engine;
mod restore;
mod scheduler;
mod store;

pub use engine::{EngineSettings, TrackerEngine};
pub use restore::{ResetHistory, RestoreOutcome, RestoreRecord};
pub use scheduler::{PendingReset, ResetScheduler, TimerHandle};
pub use store::{ConfiguredInitial, PeriodStore, TrackedPeriod};
