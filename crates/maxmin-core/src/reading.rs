//! Inbound readings and the live reading source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Decimal places kept after quantization.
pub const QUANTIZE_DECIMALS: i32 = 4;

/// Magnitude above which an `f64` has no fractional digits left to round.
const QUANTIZE_LIMIT: f64 = 1.0e15;

/// Round to [`QUANTIZE_DECIMALS`] places so floating-point noise such as
/// `45.99999999999999` does not register as a new extreme.
///
/// Values too large to carry decimals are returned unchanged, so scaling
/// never overflows to infinity.
pub fn quantize(value: f64) -> f64 {
    if !value.is_finite() || value.abs() >= QUANTIZE_LIMIT {
        return value;
    }
    let scale = 10f64.powi(QUANTIZE_DECIMALS);
    (value * scale).round() / scale
}

/// Value as reported by the source: a number or a state string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl RawValue {
    /// Numeric, finite, quantized value. `None` for `unknown`, `unavailable`,
    /// empty or otherwise unparsable states.
    pub fn numeric(&self) -> Option<f64> {
        let value = match self {
            RawValue::Number(n) => *n,
            RawValue::Text(text) => text.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then(|| quantize(value))
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

/// One state-change event from the reading source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: RawValue,
    /// Source is a monotonically growing total that rolls over on its own
    /// (rain gauge, energy meter).
    #[serde(default)]
    pub is_cumulative: bool,
    pub at: DateTime<Utc>,
}

impl Reading {
    pub fn new(value: impl Into<RawValue>, at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            is_cumulative: false,
            at,
        }
    }

    pub fn cumulative(mut self) -> Self {
        self.is_cumulative = true;
        self
    }

    /// Parse a line of the form `<value> [cumulative]`.
    pub fn parse_line(line: &str, at: DateTime<Utc>) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let value = parts.next()?;
        let reading = Self::new(value, at);
        match parts.next() {
            Some(flag) if flag.eq_ignore_ascii_case("cumulative") => Some(reading.cumulative()),
            _ => Some(reading),
        }
    }
}

/// Synchronous access to the source's current value.
pub trait ReadingSource {
    /// Current numeric value, or `None` if unavailable.
    fn current_value(&self) -> Option<f64>;
}

impl ReadingSource for watch::Receiver<Option<f64>> {
    fn current_value(&self) -> Option<f64> {
        *self.borrow()
    }
}

impl<S: ReadingSource + ?Sized> ReadingSource for Box<S> {
    fn current_value(&self) -> Option<f64> {
        (**self).current_value()
    }
}
