//! Telemetry sample model.
//!
//! A [`RawSample`] is what the device link delivers: every field optional,
//! values unchecked. [`TelemetrySample::from_raw`] normalizes it into a
//! [`TelemetrySample`], clamping out-of-range percentages instead of
//! rejecting them. Temperature is kept as reported. Only missing or
//! non-finite fields make a sample invalid.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Lowest plausible body temperature reported by the pod, in °C.
pub const MIN_TEMPERATURE_C: f64 = 30.0;

/// Highest plausible body temperature reported by the pod, in °C.
pub const MAX_TEMPERATURE_C: f64 = 42.0;

/// Errors produced while normalizing a raw sample.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SampleError {
    /// A required field was absent from the raw sample.
    #[error("sample is missing field '{field}'")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },

    /// A numeric field was NaN or infinite.
    #[error("sample field '{field}' is not a finite number")]
    NotFinite {
        /// Name of the offending field.
        field: &'static str,
    },

    /// The position string is not one of the known positions.
    #[error("unknown body position '{value}'")]
    UnknownPosition {
        /// The value that failed to parse.
        value: String,
    },

    /// The raw payload could not be decoded at all.
    #[error("malformed sample payload: {message}")]
    Malformed {
        /// Decoder message.
        message: String,
    },
}

/// Result alias for sample normalization.
pub type SampleResult<T> = std::result::Result<T, SampleError>;

/// Body position reported by the pod's accelerometer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    /// Lying on the back.
    Back,
    /// Lying face down.
    Stomach,
    /// Lying on the left side.
    LeftSide,
    /// Lying on the right side.
    RightSide,
}

impl Position {
    /// Snake-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Back => "back",
            Self::Stomach => "stomach",
            Self::LeftSide => "left_side",
            Self::RightSide => "right_side",
        }
    }

    /// Human-readable label ("left side").
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Back => "back",
            Self::Stomach => "stomach",
            Self::LeftSide => "left side",
            Self::RightSide => "right side",
        }
    }

    /// Whether this sleeping position should raise an alert.
    #[must_use]
    pub const fn is_unsafe(self) -> bool {
        matches!(self, Self::Stomach)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Position {
    type Err = SampleError;

    fn from_str(s: &str) -> SampleResult<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "back" => Ok(Self::Back),
            "stomach" => Ok(Self::Stomach),
            "left_side" | "left" => Ok(Self::LeftSide),
            "right_side" | "right" => Ok(Self::RightSide),
            _ => Err(SampleError::UnknownPosition {
                value: s.to_string(),
            }),
        }
    }
}

/// A reading as delivered by the device link, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Moisture percentage.
    pub moisture_pct: Option<f64>,
    /// Gas sensor percentage.
    pub gas_pct: Option<f64>,
    /// Skin temperature in °C.
    pub temp_c: Option<f64>,
    /// Battery charge percentage.
    pub battery_pct: Option<f64>,
    /// Body position name.
    pub position: Option<String>,
    /// Device timestamp.
    pub ts: Option<DateTime<Utc>>,
}

impl RawSample {
    /// Decode a JSON payload into a raw sample.
    ///
    /// # Errors
    ///
    /// Returns [`SampleError::Malformed`] if the payload is not valid JSON
    /// or has wrongly typed fields.
    pub fn from_json(bytes: &[u8]) -> SampleResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| SampleError::Malformed {
            message: e.to_string(),
        })
    }
}

/// One normalized sensor reading.
///
/// All percentage fields are within `[0, 100]`. The temperature is the
/// reported value, which may fall outside
/// [`MIN_TEMPERATURE_C`]..=[`MAX_TEMPERATURE_C`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TelemetrySample {
    /// Moisture percentage, 0-100.
    #[schema(example = 12.0)]
    pub moisture: f64,

    /// Gas level percentage, 0-100.
    #[schema(example = 4.0)]
    pub gas_level: f64,

    /// Skin temperature in °C.
    #[schema(example = 36.5)]
    pub temperature_c: f64,

    /// Battery charge, 0-100.
    #[schema(example = 87)]
    pub battery_percent: u8,

    /// Body position.
    pub position: Position,

    /// When the reading was taken.
    pub timestamp: DateTime<Utc>,
}

impl TelemetrySample {
    /// Normalize a raw sample, clamping the percentage fields into range.
    ///
    /// # Errors
    ///
    /// Returns a [`SampleError`] when a field is missing, non-finite, or the
    /// position is unknown. Out-of-range values are never an error.
    pub fn from_raw(raw: &RawSample) -> SampleResult<Self> {
        let moisture = finite("moisture_pct", raw.moisture_pct)?;
        let gas_level = finite("gas_pct", raw.gas_pct)?;
        let temperature_c = finite("temp_c", raw.temp_c)?;
        let battery = finite("battery_pct", raw.battery_pct)?;
        let position = raw
            .position
            .as_deref()
            .ok_or(SampleError::MissingField { field: "position" })?
            .parse()?;
        let timestamp = raw.ts.ok_or(SampleError::MissingField { field: "ts" })?;

        Ok(Self {
            moisture: clamp_percent(moisture),
            gas_level: clamp_percent(gas_level),
            temperature_c,
            battery_percent: battery_level(battery),
            position,
            timestamp,
        })
    }
}

impl TryFrom<&RawSample> for TelemetrySample {
    type Error = SampleError;

    fn try_from(raw: &RawSample) -> SampleResult<Self> {
        Self::from_raw(raw)
    }
}

/// Clamp a percentage into `[0, 100]`.
#[must_use]
pub fn clamp_percent(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

// Clamped to 0..=100 before the cast, so it cannot truncate.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn battery_level(value: f64) -> u8 {
    clamp_percent(value).round() as u8
}

fn finite(field: &'static str, value: Option<f64>) -> SampleResult<f64> {
    let value = value.ok_or(SampleError::MissingField { field })?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(SampleError::NotFinite { field })
    }
}
