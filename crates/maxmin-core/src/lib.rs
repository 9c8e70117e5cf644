//! # maxmin Core Library
//!
//! Derives rolling statistics (running maximum, minimum and delta since the
//! period start) from a single numeric reading source, separately for daily,
//! weekly, monthly, yearly and all-time windows.
//!
//! ## Architecture
//!
//! - **Tracker Engine**: a wall-clock-driven state machine; the caller feeds
//!   readings and invokes `tick()` / `check_watchdog()` at the right instants
//! - **Period Calendar**: local-calendar boundary arithmetic
//! - **Storage**: TOML configuration and SQLite persistence of derived values
//! - **Runtime**: a tokio driver serializing readings, timers and the watchdog
//!
//! ## Key Components
//!
//! - [`TrackerEngine`]: core tracking state machine
//! - [`PeriodCalendar`]: period start / next reset computation
//! - [`TrackerConfig`]: configuration management
//! - [`Database`]: persistence of derived values and reset history

pub mod error;
pub mod events;
pub mod period;
pub mod reading;
pub mod runtime;
pub mod storage;
pub mod tracker;

pub use error::{ConfigError, CoreError, DatabaseError, ObserverError, Result, ValidationError};
pub use events::{Event, Observer, PeriodSnapshot, ResetReason};
pub use period::{Extremum, Field, OutputKind, PeriodCalendar, PeriodKind};
pub use reading::{quantize, RawValue, Reading, ReadingSource};
pub use runtime::Driver;
pub use storage::{Database, TrackerConfig};
pub use tracker::{
    ConfiguredInitial, EngineSettings, ResetHistory, RestoreOutcome, RestoreRecord, TrackerEngine,
};
