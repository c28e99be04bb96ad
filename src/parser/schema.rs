//! In-memory trace model produced by the loader.
//!
//! A `Trace` is immutable once built: events are stably ordered by
//! timestamp and the event catalog is derived from the events themselves.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A decoded field value
///
/// **Public** - exposed on every event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Null,
}

impl Value {
    /// Hashable form used to correlate events by value
    ///
    /// **Public** - used by the callstack matcher
    ///
    /// Returns `None` for null, which never correlates.
    /// Integers compare equal regardless of signedness.
    pub fn key(&self) -> Option<ValueKey> {
        match self {
            Value::Int(v) => Some(ValueKey::Int(i128::from(*v))),
            Value::UInt(v) => Some(ValueKey::Int(i128::from(*v))),
            Value::Float(v) => Some(ValueKey::Float(v.to_bits())),
            Value::Str(s) => Some(ValueKey::Str(s.clone())),
            Value::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::UInt(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => f.write_str(s),
            Value::Null => f.write_str("null"),
        }
    }
}

/// Totally ordered, hashable projection of a non-null `Value`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKey {
    Int(i128),
    Float(u64),
    Str(String),
}

/// Physical stream an event was read from
///
/// **Public** - opaque track identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// A single decoded event record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event record class name
    pub name: String,

    /// Stream the event was decoded from
    pub track: TrackId,

    /// Nanoseconds from the clock origin (0 without a default clock)
    pub timestamp: u64,

    /// Scalar fields keyed by path, e.g. `/payload/addr`
    pub fields: BTreeMap<String, Value>,
}

impl Event {
    /// Look up a field by its path key
    ///
    /// **Public** - used by the matcher to resolve track and label values
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Clock class summary reported in trace metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockInfo {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Ticks per second
    pub frequency: u64,

    pub offset_seconds: i64,
    pub offset_cycles: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Per-stream summary reported in trace metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub track: TrackId,

    /// File name inside the trace directory
    pub file: String,

    pub data_stream_class_id: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_stream_id: Option<u64>,

    pub packet_count: u64,
    pub event_count: u64,
}

/// Trace-level metadata record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceMetadata {
    /// CTF major version
    pub format_version: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Trace class environment (integers and strings only)
    pub environment: serde_json::Map<String, serde_json::Value>,

    /// Producer-declared attributes of the preamble and trace class
    pub attributes: serde_json::Map<String, serde_json::Value>,

    pub clocks: Vec<ClockInfo>,
    pub streams: Vec<TrackInfo>,
    pub event_count: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub begin_ns: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ns: Option<u64>,
}

/// Distinct event name with the union of its field keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTypeInfo {
    pub name: String,

    #[serde(rename = "value-fields")]
    pub fields: BTreeSet<String>,
}

/// A fully loaded trace
///
/// **Public** - shared read-only by every query
#[derive(Debug, Clone)]
pub struct Trace {
    metadata: TraceMetadata,
    events: Vec<Event>,
    catalog: Vec<EventTypeInfo>,
}

impl Trace {
    /// Build a trace from events in stream order
    ///
    /// **Public** - constructor used by the loader and tests
    ///
    /// Events are stably sorted by timestamp, so events sharing a
    /// timestamp keep their stream order. Event count and time bounds
    /// of `metadata` are filled in from the events.
    pub fn new(mut metadata: TraceMetadata, mut events: Vec<Event>) -> Self {
        events.sort_by_key(|e| e.timestamp);

        let mut by_name: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
        for event in &events {
            let fields = by_name.entry(event.name.as_str()).or_default();
            for key in event.fields.keys() {
                if !fields.contains(key) {
                    fields.insert(key.clone());
                }
            }
        }
        let catalog = by_name
            .into_iter()
            .map(|(name, fields)| EventTypeInfo {
                name: name.to_string(),
                fields,
            })
            .collect();

        metadata.event_count = events.len() as u64;
        metadata.begin_ns = events.first().map(|e| e.timestamp);
        metadata.end_ns = events.last().map(|e| e.timestamp);

        Self {
            metadata,
            events,
            catalog,
        }
    }

    pub fn metadata(&self) -> &TraceMetadata {
        &self.metadata
    }

    /// All events in global timestamp order
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Distinct event names, sorted, each with its observed field keys
    ///
    /// **Public** - populates selection choices for queries
    pub fn list_event_names(&self) -> &[EventTypeInfo] {
        &self.catalog
    }

    pub fn event_type(&self, name: &str) -> Option<&EventTypeInfo> {
        self.catalog
            .binary_search_by(|info| info.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.catalog[idx])
    }
}

/// Answer of the trace info query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceInfo {
    pub metadata: TraceMetadata,
    pub events: Vec<EventTypeInfo>,
}

impl From<&Trace> for TraceInfo {
    fn from(trace: &Trace) -> Self {
        Self {
            metadata: trace.metadata().clone(),
            events: trace.list_event_names().to_vec(),
        }
    }
}

impl TraceMetadata {
    /// Metadata with no clocks, streams or attributes
    ///
    /// **Public** - starting point for the loader and tests
    pub fn empty(format_version: u64) -> Self {
        Self {
            format_version,
            uuid: None,
            namespace: None,
            name: None,
            uid: None,
            environment: serde_json::Map::new(),
            attributes: serde_json::Map::new(),
            clocks: Vec::new(),
            streams: Vec::new(),
            event_count: 0,
            begin_ns: None,
            end_ns: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, ts: u64, fields: &[(&str, Value)]) -> Event {
        Event {
            name: name.to_string(),
            track: TrackId(0),
            timestamp: ts,
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn test_trace_sorts_stably_by_timestamp() {
        let events = vec![
            event("b", 5, &[]),
            event("a", 1, &[]),
            event("c", 5, &[]),
        ];
        let trace = Trace::new(TraceMetadata::empty(2), events);

        let names: Vec<&str> = trace.events().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(trace.metadata().begin_ns, Some(1));
        assert_eq!(trace.metadata().end_ns, Some(5));
        assert_eq!(trace.metadata().event_count, 3);
    }

    #[test]
    fn test_catalog_unions_fields_per_name() {
        let events = vec![
            event("enter", 0, &[("/payload/addr", Value::UInt(1))]),
            event("enter", 1, &[("/payload/depth", Value::UInt(2))]),
            event("exit", 2, &[]),
        ];
        let trace = Trace::new(TraceMetadata::empty(2), events);

        let enter = trace.event_type("enter").unwrap();
        assert!(enter.fields.contains("/payload/addr"));
        assert!(enter.fields.contains("/payload/depth"));
        assert!(trace.event_type("exit").unwrap().fields.is_empty());
        assert!(trace.event_type("missing").is_none());
    }

    #[test]
    fn test_value_keys_ignore_integer_signedness() {
        assert_eq!(Value::Int(7).key(), Value::UInt(7).key());
        assert_ne!(Value::Int(-1).key(), Value::UInt(u64::MAX).key());
        assert!(Value::Null.key().is_none());
    }

    #[test]
    fn test_event_type_info_serializes_value_fields() {
        let info = EventTypeInfo {
            name: "func_entry".to_string(),
            fields: ["/payload/addr".to_string()].into_iter().collect(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "func_entry", "value-fields": ["/payload/addr"]})
        );
    }
}
