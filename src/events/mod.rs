use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    fmt,
};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::protocol::{number_field, parse_timestamp, text_field};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    Earthquake,
    EarthquakeWarning,
    Tsunami,
    WeatherAlarm,
    Unknown,
}

impl EventCategory {
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "earthquake" => Self::Earthquake,
            "earthquake_warning" => Self::EarthquakeWarning,
            "tsunami" => Self::Tsunami,
            "weather_alarm" => Self::WeatherAlarm,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Earthquake => "earthquake",
            Self::EarthquakeWarning => "earthquake_warning",
            Self::Tsunami => "tsunami",
            Self::WeatherAlarm => "weather_alarm",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_seismic(self) -> bool {
        matches!(self, Self::Earthquake | Self::EarthquakeWarning)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub identity: String,
    pub category: EventCategory,
    pub time: Option<DateTime<Utc>>,
    pub raw_time: String,
    pub description: String,
    pub magnitude: Option<f64>,
    pub source: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl RawEvent {
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;

        let raw_time = text_field(object, "time").unwrap_or_default();
        let description = text_field(object, "description").unwrap_or_default();
        let identity = text_field(object, "event_id")
            .or_else(|| text_field(object, "id"))
            .unwrap_or_else(|| format!("{}-{}", raw_time, description));

        let category = object
            .get("type")
            .and_then(Value::as_str)
            .map(EventCategory::from_wire)
            .unwrap_or(EventCategory::Unknown);

        Some(Self {
            identity,
            category,
            time: parse_timestamp(&raw_time),
            raw_time,
            description,
            magnitude: number_field(object, "magnitude"),
            source: text_field(object, "source").unwrap_or_default(),
            latitude: number_field(object, "latitude"),
            longitude: number_field(object, "longitude"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFilter {
    #[default]
    All,
    Earthquake,
    Tsunami,
    Weather,
}

impl EventFilter {
    pub fn matches(self, category: EventCategory) -> bool {
        match self {
            Self::All => true,
            Self::Earthquake => category.is_seismic(),
            Self::Tsunami => category == EventCategory::Tsunami,
            Self::Weather => category == EventCategory::WeatherAlarm,
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::All => Self::Earthquake,
            Self::Earthquake => Self::Tsunami,
            Self::Tsunami => Self::Weather,
            Self::Weather => Self::All,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::All => "All",
            Self::Earthquake => "Earthquake",
            Self::Tsunami => "Tsunami",
            Self::Weather => "Weather",
        }
    }
}

impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Events sharing one identity; `members` is newest first and never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct EventGroup {
    pub identity: String,
    pub members: Vec<RawEvent>,
}

impl EventGroup {
    pub fn latest(&self) -> &RawEvent {
        &self.members[0]
    }

    pub fn update_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_collapsible(&self) -> bool {
        self.update_count() > 1
    }

    pub fn history(&self) -> &[RawEvent] {
        &self.members[1..]
    }
}

fn newest_first(a: &Option<DateTime<Utc>>, b: &Option<DateTime<Utc>>) -> Ordering {
    b.cmp(a)
}

/// Filters, buckets by identity and orders by recency. Ties keep first-seen
/// order so equal inputs always produce equal output.
pub fn group_events(events: &[RawEvent], filter: EventFilter) -> Vec<EventGroup> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<EventGroup> = Vec::new();

    for event in events.iter().filter(|event| filter.matches(event.category)) {
        match positions.get(event.identity.as_str()) {
            Some(&index) => groups[index].members.push(event.clone()),
            None => {
                positions.insert(event.identity.as_str(), groups.len());
                groups.push(EventGroup {
                    identity: event.identity.clone(),
                    members: vec![event.clone()],
                });
            }
        }
    }

    for group in &mut groups {
        group
            .members
            .sort_by(|a, b| newest_first(&a.time, &b.time));
    }

    groups.sort_by(|a, b| newest_first(&a.latest().time, &b.latest().time));
    groups
}

#[derive(Debug, Default)]
pub struct EventAggregator {
    filter: EventFilter,
    groups: Vec<EventGroup>,
    expanded: HashSet<String>,
    source: Vec<RawEvent>,
}

impl EventAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recompute(&mut self, events: &[RawEvent]) {
        self.source = events.to_vec();
        self.groups = group_events(&self.source, self.filter);
    }

    pub fn filter(&self) -> EventFilter {
        self.filter
    }

    pub fn set_filter(&mut self, filter: EventFilter) {
        if self.filter == filter {
            return;
        }
        self.filter = filter;
        self.groups = group_events(&self.source, self.filter);
    }

    pub fn cycle_filter(&mut self) -> EventFilter {
        self.set_filter(self.filter.next());
        self.filter
    }

    pub fn groups(&self) -> &[EventGroup] {
        &self.groups
    }

    pub fn is_expanded(&self, identity: &str) -> bool {
        self.expanded.contains(identity)
    }

    pub fn toggle(&mut self, identity: &str) -> Option<bool> {
        let group = self
            .groups
            .iter()
            .find(|group| group.identity == identity)?;
        if !group.is_collapsible() {
            return None;
        }

        if self.expanded.remove(identity) {
            Some(false)
        } else {
            self.expanded.insert(identity.to_owned());
            Some(true)
        }
    }

    pub fn expanded(&self) -> &HashSet<String> {
        &self.expanded
    }
}
