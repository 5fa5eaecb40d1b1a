use std::collections::BTreeMap;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StatusPayload {
    #[serde(deserialize_with = "flag")]
    pub running: Option<bool>,
    #[serde(deserialize_with = "text")]
    pub start_time: Option<String>,
    #[serde(deserialize_with = "text")]
    pub uptime: Option<String>,
    #[serde(deserialize_with = "count")]
    pub active_connections: Option<u64>,
    #[serde(deserialize_with = "count")]
    pub total_connections: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StatisticsPayload {
    #[serde(deserialize_with = "count")]
    pub total_events: Option<u64>,
    #[serde(deserialize_with = "count")]
    pub total_received: Option<u64>,
    #[serde(deserialize_with = "counts")]
    pub by_type: Option<BTreeMap<String, u64>>,
    #[serde(deserialize_with = "counts")]
    pub by_source: Option<BTreeMap<String, u64>>,
    #[serde(deserialize_with = "list")]
    pub recent_pushes: Option<Vec<Value>>,
    #[serde(deserialize_with = "slice")]
    pub earthquake_stats: Option<EarthquakeStatsPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EarthquakeStatsPayload {
    #[serde(deserialize_with = "counts")]
    pub by_magnitude: Option<BTreeMap<String, u64>>,
    #[serde(deserialize_with = "float")]
    pub max_magnitude: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionPayload {
    #[serde(deserialize_with = "flag")]
    pub connected: Option<bool>,
    #[serde(deserialize_with = "count")]
    pub retry_count: Option<u64>,
    #[serde(deserialize_with = "text")]
    pub status: Option<String>,
}

pub type ConnectionsPayload = BTreeMap<String, ConnectionPayload>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectionsResponse {
    #[serde(deserialize_with = "connections")]
    pub connections: Option<ConnectionsPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EarthquakesResponse {
    #[serde(deserialize_with = "list")]
    pub earthquakes: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationRequest {
    pub target_group: String,
    pub disaster_type: String,
    pub test_type: String,
    pub custom_params: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SimulationResponse {
    pub success: Option<bool>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl SimulationResponse {
    pub fn succeeded(&self) -> bool {
        self.success.unwrap_or(false)
    }

    pub fn summary(&self) -> String {
        self.message
            .as_deref()
            .or(self.error.as_deref())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .unwrap_or("no details")
            .to_string()
    }
}

/// Slices pushed by the server inside a real-time envelope. Each slice is
/// read on its own; an unreadable one is dropped without affecting the rest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateData {
    #[serde(deserialize_with = "slice")]
    pub status: Option<StatusPayload>,
    #[serde(deserialize_with = "slice")]
    pub statistics: Option<StatisticsPayload>,
    #[serde(deserialize_with = "connections")]
    pub connections: Option<ConnectionsPayload>,
    #[serde(deserialize_with = "list")]
    pub earthquakes: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, deserialize_with = "slice")]
    pub data: Option<UpdateData>,
    #[serde(default)]
    pub new_event: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    FullUpdate,
    Update,
    Event,
    Pong,
    Unknown(String),
}

impl MessageKind {
    pub fn carries_data(&self) -> bool {
        matches!(self, Self::FullUpdate | Self::Update | Self::Event)
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let input = String::deserialize(deserializer)?;
        let kind = match input.as_str() {
            "full_update" => Self::FullUpdate,
            "update" => Self::Update,
            "event" => Self::Event,
            "pong" => Self::Pong,
            other => Self::Unknown(other.to_owned()),
        };

        Ok(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Refresh,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

fn count_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|float| float.is_finite() && *float >= 0.0)
                .map(|float| float as u64)
        }),
        Value::String(text) => {
            let text = text.trim();
            text.parse().ok().or_else(|| {
                text.parse::<f64>()
                    .ok()
                    .filter(|float| float.is_finite() && *float >= 0.0)
                    .map(|float| float as u64)
            })
        }
        _ => None,
    }
}

fn count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(count_value(&Value::deserialize(deserializer)?))
}

// entries that are not counts read as 0
fn counts<'de, D>(deserializer: D) -> Result<Option<BTreeMap<String, u64>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Object(object) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };

    Ok(Some(
        object
            .iter()
            .map(|(key, value)| (key.clone(), count_value(value).unwrap_or(0)))
            .collect(),
    ))
}

fn flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?.as_bool())
}

fn text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn float<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    })
}

fn list<'de, D>(deserializer: D) -> Result<Option<Vec<Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => Some(items),
        _ => None,
    })
}

fn slice<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if !value.is_object() {
        return Ok(None);
    }

    match serde_json::from_value(value) {
        Ok(slice) => Ok(Some(slice)),
        Err(err) => {
            warn!(%err, "ignoring unreadable slice");
            Ok(None)
        }
    }
}

// a non-object entry reads as a default, disconnected source
fn connections<'de, D>(deserializer: D) -> Result<Option<ConnectionsPayload>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Object(object) = Value::deserialize(deserializer)? else {
        return Ok(None);
    };

    Ok(Some(
        object
            .into_iter()
            .map(|(name, entry)| {
                let info = if entry.is_object() {
                    serde_json::from_value(entry).unwrap_or_default()
                } else {
                    ConnectionPayload::default()
                };
                (name, info)
            })
            .collect(),
    ))
}

pub fn decode_frame(text: &str) -> Result<InboundMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

pub fn encode_control(frame: ControlFrame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&frame)?)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

pub fn text_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

pub fn number_field(object: &Map<String, Value>, key: &str) -> Option<f64> {
    match object.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
