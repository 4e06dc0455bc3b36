//! Append-only event history.
//!
//! Events are appended by the telemetry adapter and read by presentation
//! code through windowed queries. Ids are assigned under the write lock, so
//! they are strictly increasing in append order and never reused, even after
//! retention evicts old entries.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::status::DiaperStatus;

/// What a history event records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Transition into `wet`.
    Wet,
    /// Transition into `soiled`.
    Soiled,
    /// Transition into `both`.
    Both,
    /// Temperature crossed the spike threshold.
    TemperatureSpike,
}

impl EventKind {
    /// Event kind for a status transition, if that status is loggable.
    #[must_use]
    pub const fn from_status(status: DiaperStatus) -> Option<Self> {
        match status {
            DiaperStatus::Dry => None,
            DiaperStatus::Wet => Some(Self::Wet),
            DiaperStatus::Soiled => Some(Self::Soiled),
            DiaperStatus::Both => Some(Self::Both),
        }
    }

    /// Snake-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Wet => "wet",
            Self::Soiled => "soiled",
            Self::Both => "both",
            Self::TemperatureSpike => "temperature_spike",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The readings that triggered an event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EventDetails {
    /// Moisture percentage at the time of the event.
    pub moisture: f64,
    /// Gas percentage at the time of the event.
    pub gas_level: f64,
    /// Temperature at the time of the event.
    pub temperature_c: f64,
}

impl EventDetails {
    /// One-line description of the readings relevant to `kind`.
    #[must_use]
    pub fn summary(&self, kind: EventKind) -> String {
        match kind {
            EventKind::Wet => format!("Moisture level: {:.0}%", self.moisture),
            EventKind::Soiled => format!("Gas level: {:.0}%", self.gas_level),
            EventKind::Both => {
                format!("Moisture: {:.0}%, Gas: {:.0}%", self.moisture, self.gas_level)
            }
            EventKind::TemperatureSpike => {
                format!("Temperature spike: {:.1}°C", self.temperature_c)
            }
        }
    }
}

/// An event waiting to be assigned an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// Event kind.
    pub kind: EventKind,
    /// When the triggering sample was taken.
    pub timestamp: DateTime<Utc>,
    /// Triggering readings.
    pub details: EventDetails,
}

/// An immutable history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HistoryEvent {
    /// Unique, strictly increasing id.
    pub id: u64,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// When the triggering sample was taken.
    pub timestamp: DateTime<Utc>,
    /// Triggering readings.
    pub details: EventDetails,
}

impl HistoryEvent {
    /// Human-readable description of the triggering readings.
    #[must_use]
    pub fn summary(&self) -> String {
        self.details.summary(self.kind)
    }
}

/// Relative time range for history queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HistoryWindow {
    /// The last 24 hours.
    #[default]
    Today,
    /// The last 168 hours.
    Week,
    /// The last 720 hours.
    Month,
    /// Everything retained.
    All,
}

impl HistoryWindow {
    /// Window length in hours, or `None` for [`HistoryWindow::All`].
    #[must_use]
    pub const fn hours(self) -> Option<i64> {
        match self {
            Self::Today => Some(24),
            Self::Week => Some(168),
            Self::Month => Some(720),
            Self::All => None,
        }
    }

    /// Whether an event at `timestamp` falls inside the window ending at `now`.
    ///
    /// An event exactly one window length old is outside.
    #[must_use]
    pub fn contains(self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.hours() {
            Some(hours) => now.signed_duration_since(timestamp) < Duration::hours(hours),
            None => true,
        }
    }

    /// Snake-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Week => "week",
            Self::Month => "month",
            Self::All => "all",
        }
    }
}

impl fmt::Display for HistoryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "today" | "day" => Ok(Self::Today),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "all" => Ok(Self::All),
            other => Err(format!("unknown history window '{other}'")),
        }
    }
}

/// Aggregate statistics over one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HistoryStats {
    /// The window these stats cover.
    pub window: HistoryWindow,
    /// Number of events in the window.
    pub count: usize,
    /// Mean gap between consecutive events in seconds; `None` below two events.
    pub average_interval_secs: Option<f64>,
    /// Number of events of each kind.
    #[schema(value_type = Object)]
    pub by_kind: BTreeMap<EventKind, usize>,
}

impl HistoryStats {
    /// Mean gap between consecutive events.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn average_interval(&self) -> Option<Duration> {
        self.average_interval_secs
            .map(|secs| Duration::milliseconds((secs * 1000.0).round() as i64))
    }
}

#[derive(Debug, Default)]
struct EventLog {
    events: VecDeque<HistoryEvent>,
    next_id: u64,
}

/// Thread-safe append-only event log.
#[derive(Debug, Default)]
pub struct HistoryStore {
    log: RwLock<EventLog>,
    retention_cap: Option<NonZeroUsize>,
}

impl HistoryStore {
    /// Create an unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that keeps at most `cap` events, evicting oldest first.
    #[must_use]
    pub fn with_retention(cap: Option<NonZeroUsize>) -> Self {
        Self {
            log: RwLock::default(),
            retention_cap: cap,
        }
    }

    /// Append an event and return it with its assigned id.
    pub fn append(&self, event: NewEvent) -> HistoryEvent {
        let mut log = self.log.write();
        log.next_id += 1;
        let stored = HistoryEvent {
            id: log.next_id,
            kind: event.kind,
            timestamp: event.timestamp,
            details: event.details,
        };
        log.events.push_back(stored.clone());

        if let Some(cap) = self.retention_cap {
            while log.events.len() > cap.get() {
                if let Some(evicted) = log.events.pop_front() {
                    tracing::debug!(id = evicted.id, "Evicted history event past retention cap");
                }
            }
        }

        stored
    }

    /// Events in `window` relative to now, newest first.
    #[must_use]
    pub fn query(&self, window: HistoryWindow) -> Vec<HistoryEvent> {
        self.query_at(window, Utc::now())
    }

    /// Events in `window` relative to `now`, newest first.
    #[must_use]
    pub fn query_at(&self, window: HistoryWindow, now: DateTime<Utc>) -> Vec<HistoryEvent> {
        let mut events: Vec<HistoryEvent> = {
            let log = self.log.read();
            log.events
                .iter()
                .filter(|event| window.contains(event.timestamp, now))
                .cloned()
                .collect()
        };
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        events
    }

    /// Statistics for `window` relative to now.
    #[must_use]
    pub fn stats(&self, window: HistoryWindow) -> HistoryStats {
        self.stats_at(window, Utc::now())
    }

    /// Statistics for `window` relative to `now`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats_at(&self, window: HistoryWindow, now: DateTime<Utc>) -> HistoryStats {
        let events = self.query_at(window, now);
        let count = events.len();

        let mut by_kind = BTreeMap::new();
        for event in &events {
            *by_kind.entry(event.kind).or_insert(0) += 1;
        }

        // Newest first, so the span is first minus last.
        let average_interval_secs = match (events.first(), events.last()) {
            (Some(newest), Some(oldest)) if count >= 2 => {
                let span = newest.timestamp.signed_duration_since(oldest.timestamp);
                Some(span.num_milliseconds() as f64 / 1000.0 / (count - 1) as f64)
            }
            _ => None,
        };

        HistoryStats {
            window,
            count,
            average_interval_secs,
            by_kind,
        }
    }

    /// The most recently appended event still retained.
    #[must_use]
    pub fn latest(&self) -> Option<HistoryEvent> {
        self.log.read().events.back().cloned()
    }

    /// Number of retained events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.read().events.len()
    }

    /// Whether no events are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.read().events.is_empty()
    }
}
