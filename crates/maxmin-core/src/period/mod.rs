//! Period kinds and the fields tracked for each of them.

mod calendar;

pub use calendar::PeriodCalendar;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A calendar window tracked independently of the others.
///
/// The derived ordering is by window breadth (`Daily < Weekly < ... < AllTime`)
/// and is only used for narrow -> broad consistency propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodKind {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    AllTime,
}

impl PeriodKind {
    pub const ALL: [PeriodKind; 5] = [
        PeriodKind::Daily,
        PeriodKind::Weekly,
        PeriodKind::Monthly,
        PeriodKind::Yearly,
        PeriodKind::AllTime,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PeriodKind::Daily => "daily",
            PeriodKind::Weekly => "weekly",
            PeriodKind::Monthly => "monthly",
            PeriodKind::Yearly => "yearly",
            PeriodKind::AllTime => "all_time",
        }
    }

    /// Whether this period has calendar boundaries (everything but all-time).
    pub fn has_boundary(self) -> bool {
        self != PeriodKind::AllTime
    }
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(PeriodKind::Daily),
            "weekly" => Ok(PeriodKind::Weekly),
            "monthly" => Ok(PeriodKind::Monthly),
            "yearly" => Ok(PeriodKind::Yearly),
            "all_time" | "alltime" | "all-time" => Ok(PeriodKind::AllTime),
            other => Err(ValidationError::UnknownPeriod(other.to_string())),
        }
    }
}

/// One of the four scalars stored per period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Max,
    Min,
    Start,
    End,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Max => "max",
            Field::Min => "min",
            Field::Start => "start",
            Field::End => "end",
        }
    }

    /// The extremum this field represents, if any.
    pub fn extremum(self) -> Option<Extremum> {
        match self {
            Field::Max => Some(Extremum::Max),
            Field::Min => Some(Extremum::Min),
            Field::Start | Field::End => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "max" => Ok(Field::Max),
            "min" => Ok(Field::Min),
            "start" => Ok(Field::Start),
            "end" => Ok(Field::End),
            other => Err(ValidationError::UnknownField(other.to_string())),
        }
    }
}

/// Running maximum or running minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extremum {
    Max,
    Min,
}

impl Extremum {
    pub fn field(self) -> Field {
        match self {
            Extremum::Max => Field::Max,
            Extremum::Min => Field::Min,
        }
    }
}

impl fmt::Display for Extremum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field().as_str())
    }
}

impl FromStr for Extremum {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<Field>()?
            .extremum()
            .ok_or_else(|| ValidationError::UnknownField(s.to_string()))
    }
}

/// A derived output requested by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Max,
    Min,
    Delta,
}

impl OutputKind {
    /// Stored fields backing this output.
    pub fn fields(self) -> &'static [Field] {
        match self {
            OutputKind::Max => &[Field::Max],
            OutputKind::Min => &[Field::Min],
            OutputKind::Delta => &[Field::Start, Field::End],
        }
    }
}
