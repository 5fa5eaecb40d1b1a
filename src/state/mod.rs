use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::trace;

use crate::{
    events::RawEvent,
    protocol::{
        ConnectionsPayload, StatisticsPayload, StatusPayload, number_field, parse_timestamp,
        text_field,
    },
};

pub const UPTIME_PLACEHOLDER: &str = "--";

pub const MAGNITUDE_BUCKETS: [&str; 7] = [
    "< M3.0",
    "M3.0 - M3.9",
    "M4.0 - M4.9",
    "M5.0 - M5.9",
    "M6.0 - M6.9",
    "M7.0 - M7.9",
    ">= M8.0",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceStatus {
    pub running: bool,
    pub reference_start_time: Option<DateTime<Utc>>,
    pub active_connections: u64,
    pub total_connections: u64,
    pub uptime_text: String,
}

impl Default for ServiceStatus {
    fn default() -> Self {
        Self {
            running: false,
            reference_start_time: None,
            active_connections: 0,
            total_connections: 0,
            uptime_text: UPTIME_PLACEHOLDER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPatch {
    pub running: Option<bool>,
    pub reference_start_time: Option<DateTime<Utc>>,
    pub uptime_text: Option<String>,
    pub active_connections: Option<u64>,
    pub total_connections: Option<u64>,
}

impl StatusPatch {
    pub fn from_payload(payload: &StatusPayload) -> Self {
        let reference_start_time = payload.start_time.as_deref().and_then(parse_timestamp);
        let uptime_text = match reference_start_time {
            Some(_) => None,
            None => payload.uptime.clone(),
        };

        Self {
            running: payload.running,
            reference_start_time,
            uptime_text,
            active_connections: payload.active_connections,
            total_connections: payload.total_connections,
        }
    }

    pub fn uptime(text: impl Into<String>) -> Self {
        Self {
            uptime_text: Some(text.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MagnitudeHistogram {
    buckets: Vec<(String, u64)>,
}

impl MagnitudeHistogram {
    pub fn from_counts(counts: &BTreeMap<String, u64>) -> Self {
        if counts.is_empty() {
            return Self::default();
        }

        let mut buckets: Vec<(String, u64)> = MAGNITUDE_BUCKETS
            .iter()
            .map(|label| (label.to_string(), counts.get(*label).copied().unwrap_or(0)))
            .collect();
        buckets.extend(
            counts
                .iter()
                .filter(|(label, _)| !MAGNITUDE_BUCKETS.contains(&label.as_str()))
                .map(|(label, count)| (label.clone(), *count)),
        );

        Self { buckets }
    }

    pub fn buckets(&self) -> &[(String, u64)] {
        &self.buckets
    }

    /// Scale for bar rendering, never below 1.
    pub fn max_count(&self) -> u64 {
        self.buckets
            .iter()
            .map(|(_, count)| *count)
            .max()
            .unwrap_or(0)
            .max(1)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    pub total_events: u64,
    pub total_received: u64,
    pub counts_by_category: BTreeMap<String, u64>,
    pub counts_by_source: BTreeMap<String, u64>,
    pub magnitude_histogram: MagnitudeHistogram,
    pub max_magnitude: Option<f64>,
    pub recent_events: Vec<RawEvent>,
}

impl Statistics {
    pub fn from_payload(payload: &StatisticsPayload) -> Self {
        let by_magnitude = payload
            .earthquake_stats
            .as_ref()
            .and_then(|stats| stats.by_magnitude.clone())
            .unwrap_or_default();

        Self {
            total_events: payload.total_events.unwrap_or(0),
            total_received: payload.total_received.unwrap_or(0),
            counts_by_category: payload.by_type.clone().unwrap_or_default(),
            counts_by_source: payload.by_source.clone().unwrap_or_default(),
            magnitude_histogram: MagnitudeHistogram::from_counts(&by_magnitude),
            max_magnitude: payload
                .earthquake_stats
                .as_ref()
                .and_then(|stats| stats.max_magnitude),
            recent_events: payload
                .recent_pushes
                .as_deref()
                .unwrap_or_default()
                .iter()
                .filter_map(RawEvent::from_value)
                .collect(),
        }
    }

    pub fn category_count(&self, category: &str) -> u64 {
        self.counts_by_category.get(category).copied().unwrap_or(0)
    }

    pub fn earthquake_count(&self) -> u64 {
        self.category_count("earthquake")
    }

    pub fn tsunami_count(&self) -> u64 {
        self.category_count("tsunami")
    }

    pub fn weather_count(&self) -> u64 {
        self.category_count("weather_alarm")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceConnection {
    pub connected: bool,
    pub retry_count: u64,
    pub status: Option<String>,
}

pub type ConnectionInfo = BTreeMap<String, SourceConnection>;

#[derive(Debug, Clone, PartialEq)]
pub struct QuakeMarker {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub magnitude: f64,
    pub place: String,
    pub time: Option<DateTime<Utc>>,
    pub source: String,
}

impl QuakeMarker {
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let latitude = number_field(object, "latitude")?;
        let longitude = number_field(object, "longitude")?;

        Some(Self {
            id: text_field(object, "id").unwrap_or_default(),
            latitude,
            longitude,
            magnitude: number_field(object, "magnitude").unwrap_or(0.0),
            place: text_field(object, "place").unwrap_or_else(|| "unknown location".to_string()),
            time: text_field(object, "time").as_deref().and_then(parse_timestamp),
            source: text_field(object, "source").unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreState {
    pub status: ServiceStatus,
    pub statistics: Statistics,
    pub connections: ConnectionInfo,
    pub earthquakes: Vec<QuakeMarker>,
    pub realtime_connected: bool,
    pub alert: Option<Alert>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slice {
    Status,
    Statistics,
    Connections,
    Earthquakes,
    Realtime,
    Alert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type Subscriber = Box<dyn FnMut(Slice, &StoreState) + Send>;

/// The single authoritative client-side state. Mutations notify every
/// subscriber synchronously, after the change is in place.
#[derive(Default)]
pub struct StateStore {
    state: StoreState,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("state", &self.state)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, subscriber: F) -> SubscriptionId
    where
        F: FnMut(Slice, &StoreState) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(subscriber)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(existing, _)| *existing != id);
        self.subscribers.len() != before
    }

    pub fn state(&self) -> &StoreState {
        &self.state
    }

    pub fn status(&self) -> &ServiceStatus {
        &self.state.status
    }

    pub fn statistics(&self) -> &Statistics {
        &self.state.statistics
    }

    pub fn alert(&self) -> Option<&Alert> {
        self.state.alert.as_ref()
    }

    pub fn apply_status(&mut self, patch: StatusPatch) {
        let status = &mut self.state.status;
        if let Some(running) = patch.running {
            status.running = running;
        }
        if let Some(reference) = patch.reference_start_time {
            status.reference_start_time = Some(reference);
        }
        if let Some(uptime) = patch.uptime_text {
            status.uptime_text = uptime;
        }
        if let Some(active) = patch.active_connections {
            status.active_connections = active;
        }
        if let Some(total) = patch.total_connections {
            status.total_connections = total;
        }
        self.notify(Slice::Status);
    }

    pub fn apply_statistics(&mut self, payload: &StatisticsPayload) {
        self.state.statistics = Statistics::from_payload(payload);
        self.notify(Slice::Statistics);
    }

    pub fn apply_connections(&mut self, payload: &ConnectionsPayload) {
        self.state.connections = payload
            .iter()
            .map(|(name, info)| {
                (
                    name.clone(),
                    SourceConnection {
                        connected: info.connected.unwrap_or(false),
                        retry_count: info.retry_count.unwrap_or(0),
                        status: info.status.clone(),
                    },
                )
            })
            .collect();
        self.notify(Slice::Connections);
    }

    pub fn apply_earthquakes(&mut self, payload: &[Value]) {
        self.state.earthquakes = payload.iter().filter_map(QuakeMarker::from_value).collect();
        self.notify(Slice::Earthquakes);
    }

    pub fn set_realtime_connected(&mut self, connected: bool) {
        if self.state.realtime_connected == connected {
            return;
        }
        self.state.realtime_connected = connected;
        self.notify(Slice::Realtime);
    }

    pub fn raise_alert(&mut self, message: impl Into<String>) {
        self.state.alert = Some(Alert {
            message: message.into(),
            raised_at: Utc::now(),
        });
        self.notify(Slice::Alert);
    }

    pub fn dismiss_alert(&mut self) -> bool {
        if self.state.alert.take().is_none() {
            return false;
        }
        self.notify(Slice::Alert);
        true
    }

    fn notify(&mut self, slice: Slice) {
        trace!(?slice, subscribers = self.subscribers.len(), "store changed");
        let state = &self.state;
        for (_, subscriber) in &mut self.subscribers {
            subscriber(slice, state);
        }
    }
}
