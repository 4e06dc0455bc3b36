//! Diaper status classification.
//!
//! [`classify`] maps a [`TelemetrySample`] to a [`DiaperStatus`] using only
//! the moisture and gas readings. Thresholds are inclusive: a reading exactly
//! at the threshold counts as triggered.

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::telemetry::{clamp_percent, TelemetrySample};

/// Default moisture threshold, in percent.
pub const DEFAULT_WET_THRESHOLD: f64 = 50.0;

/// Default gas threshold, in percent.
pub const DEFAULT_GAS_THRESHOLD: f64 = 50.0;

/// Default temperature spike threshold, in °C.
pub const DEFAULT_TEMP_SPIKE_THRESHOLD_C: f64 = 37.8;

/// Derived diaper condition.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum DiaperStatus {
    /// Neither sensor triggered.
    #[default]
    Dry,
    /// Moisture above threshold.
    Wet,
    /// Gas above threshold.
    Soiled,
    /// Both sensors above threshold.
    Both,
}

impl DiaperStatus {
    /// Snake-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dry => "dry",
            Self::Wet => "wet",
            Self::Soiled => "soiled",
            Self::Both => "both",
        }
    }

    /// Whether the diaper needs changing.
    #[must_use]
    pub const fn needs_attention(self) -> bool {
        !matches!(self, Self::Dry)
    }
}

impl fmt::Display for DiaperStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Thresholds {
    /// Moisture percentage at or above which the diaper is wet.
    #[schema(example = 50.0)]
    pub wet_threshold: f64,

    /// Gas percentage at or above which the diaper is soiled.
    #[schema(example = 50.0)]
    pub gas_threshold: f64,

    /// Temperature above which a spike event is recorded.
    #[schema(example = 37.8)]
    pub temp_spike_threshold_c: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            wet_threshold: DEFAULT_WET_THRESHOLD,
            gas_threshold: DEFAULT_GAS_THRESHOLD,
            temp_spike_threshold_c: DEFAULT_TEMP_SPIKE_THRESHOLD_C,
        }
    }
}

impl Thresholds {
    /// Classify a sample against these thresholds.
    #[must_use]
    pub fn classify(&self, sample: &TelemetrySample) -> DiaperStatus {
        self.classify_levels(sample.moisture, sample.gas_level)
    }

    /// Classify raw moisture and gas levels. Inputs are clamped first.
    #[must_use]
    pub fn classify_levels(&self, moisture: f64, gas_level: f64) -> DiaperStatus {
        let wet = clamp_percent(moisture) >= self.wet_threshold;
        let soiled = clamp_percent(gas_level) >= self.gas_threshold;

        match (wet, soiled) {
            (true, true) => DiaperStatus::Both,
            (true, false) => DiaperStatus::Wet,
            (false, true) => DiaperStatus::Soiled,
            (false, false) => DiaperStatus::Dry,
        }
    }

    /// Whether a temperature is above the spike threshold.
    #[must_use]
    pub fn is_temperature_spike(&self, temperature_c: f64) -> bool {
        temperature_c > self.temp_spike_threshold_c
    }
}

/// Classify a sample using the given thresholds.
#[must_use]
pub fn classify(sample: &TelemetrySample, thresholds: &Thresholds) -> DiaperStatus {
    thresholds.classify(sample)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Position;
    use chrono::Utc;

    fn sample(moisture: f64, gas_level: f64) -> TelemetrySample {
        TelemetrySample {
            moisture,
            gas_level,
            temperature_c: 36.5,
            battery_percent: 90,
            position: Position::Back,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let t = Thresholds::default();
        assert_eq!(classify(&sample(50.0, 0.0), &t), DiaperStatus::Wet);
        assert_eq!(classify(&sample(49.0, 50.0), &t), DiaperStatus::Soiled);
        assert_eq!(classify(&sample(50.0, 50.0), &t), DiaperStatus::Both);
        assert_eq!(classify(&sample(0.0, 0.0), &t), DiaperStatus::Dry);
    }

    #[test]
    fn test_classification_ignores_other_fields() {
        let t = Thresholds::default();
        let mut a = sample(70.0, 10.0);
        let mut b = a.clone();
        a.temperature_c = 30.0;
        a.battery_percent = 1;
        b.temperature_c = 42.0;
        b.position = Position::Stomach;
        assert_eq!(t.classify(&a), t.classify(&b));
    }

    #[test]
    fn test_out_of_range_levels_do_not_panic() {
        let t = Thresholds::default();
        assert_eq!(t.classify_levels(1_000.0, -3.0), DiaperStatus::Wet);
        assert_eq!(t.classify_levels(-1.0, 250.0), DiaperStatus::Soiled);
    }

    #[test]
    fn test_custom_thresholds() {
        let t = Thresholds {
            wet_threshold: 30.0,
            gas_threshold: 80.0,
            ..Thresholds::default()
        };
        assert_eq!(t.classify_levels(30.0, 79.9), DiaperStatus::Wet);
        assert_eq!(t.classify_levels(10.0, 80.0), DiaperStatus::Soiled);
    }

    #[test]
    fn test_temperature_spike_is_strictly_above() {
        let t = Thresholds::default();
        assert!(!t.is_temperature_spike(37.8));
        assert!(t.is_temperature_spike(37.9));
    }

    #[test]
    fn test_needs_attention() {
        assert!(!DiaperStatus::Dry.needs_attention());
        assert!(DiaperStatus::Wet.needs_attention());
        assert!(DiaperStatus::Both.needs_attention());
        assert_eq!(DiaperStatus::Soiled.to_string(), "soiled");
    }
}
