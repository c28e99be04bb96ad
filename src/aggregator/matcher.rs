//! Callstack matching of entry and exit events.
//!
//! Entry events are pushed on a stack keyed by (track, label) and each
//! exit event pops the most recent open entry with the same key. Every
//! successful pop yields one `CallRecord`.

use super::diagnostics::Diagnostics;
use crate::parser::{Event, Trace, Value, ValueKey};
use crate::utils::config::{MATCH_MODE_EXACT, MATCH_MODE_REGEX};
use crate::utils::error::QueryError;
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How an event name is selected
///
/// **Public** - built from a pattern string and a mode string
#[derive(Debug, Clone)]
pub enum NamePattern {
    /// Literal name comparison
    Exact(String),

    /// Regular expression, matched anywhere in the name
    Regex(Regex),
}

impl NamePattern {
    /// Build a pattern for one side of a query
    ///
    /// **Public** - validates the mode and compiles regular expressions
    ///
    /// # Arguments
    /// * `pattern` - Event name or regular expression
    /// * `mode` - `"cmp"`/`"exact"` or `"regex"`/`"re"` (case-insensitive)
    /// * `side` - `"entry"` or `"exit"`, used in error messages
    ///
    /// # Errors
    /// * `QueryError::InvalidParameter` - unknown mode
    /// * `QueryError::InvalidPattern` - regular expression does not compile
    pub fn new(pattern: &str, mode: &str, side: &'static str) -> Result<Self, QueryError> {
        let mode = mode.trim().to_ascii_lowercase();
        if MATCH_MODE_EXACT.contains(&mode.as_str()) {
            Ok(NamePattern::Exact(pattern.to_string()))
        } else if MATCH_MODE_REGEX.contains(&mode.as_str()) {
            Regex::new(pattern)
                .map(NamePattern::Regex)
                .map_err(|source| QueryError::InvalidPattern { side, source })
        } else {
            Err(QueryError::InvalidParameter(format!(
                "unknown {} match mode '{}' (expected one of: {}, {})",
                side,
                mode,
                MATCH_MODE_EXACT.join(", "),
                MATCH_MODE_REGEX.join(", ")
            )))
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Exact(expected) => expected == name,
            NamePattern::Regex(re) => re.is_match(name),
        }
    }
}

/// Parameters of one matching run
///
/// **Public** - validated form of the nine query parameters
///
/// An empty track field means "use the physical track"; an empty label
/// field means every candidate event shares one label.
#[derive(Debug, Clone)]
pub struct MatchSpec {
    pub entry: NamePattern,
    pub exit: NamePattern,
    pub entry_track_field: String,
    pub exit_track_field: String,
    pub entry_label_field: String,
    pub exit_label_field: String,
}

/// One matched entry/exit pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub entry_name: String,
    pub exit_name: String,

    /// Correlation track value (the physical track id without a track field)
    pub track: Value,

    /// Correlation label value (null without a label field)
    pub label: Value,

    pub start_ts: u64,
    pub end_ts: u64,

    /// `end_ts - start_ts`
    pub duration: u64,
}

/// Result of a matching run
///
/// **Public** - consumed by the stats aggregator and flamegraph builder
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchReport {
    /// Records in exit order
    pub records: Vec<CallRecord>,

    /// Entries never closed, including entries lacking a field
    pub orphan_entries: usize,

    /// Exits with no open entry, including exits lacking a field
    pub orphan_exits: usize,

    /// Candidates skipped because a track or label field was missing
    pub skipped_missing_field: usize,

    pub diagnostics: Diagnostics,
}

/// Correlation key and the values it was derived from
struct Correlation {
    key: (ValueKey, Option<ValueKey>),
    track: Value,
    label: Value,
}

struct OpenEntry<'a> {
    name: &'a str,
    timestamp: u64,
}

/// Pair entry and exit events of a trace
///
/// **Public** - main entry point for callstack matching
///
/// Events are processed in global timestamp order. An event matching
/// both patterns acts as an exit first, then as an entry.
///
/// # Errors
/// * `QueryError::UnknownField` - a named track or label field is absent
///   from every event type the corresponding pattern selects
pub fn match_calls(trace: &Trace, spec: &MatchSpec) -> Result<MatchReport, QueryError> {
    let entry_types = check_fields(
        trace,
        &spec.entry,
        &[&spec.entry_track_field, &spec.entry_label_field],
        "entry",
    )?;
    let exit_types = check_fields(
        trace,
        &spec.exit,
        &[&spec.exit_track_field, &spec.exit_label_field],
        "exit",
    )?;

    let mut report = MatchReport::default();
    if entry_types == 0 {
        info!("No event type matches the entry pattern");
        report.diagnostics.push("no event type matches the entry pattern");
    }
    if exit_types == 0 {
        info!("No event type matches the exit pattern");
        report.diagnostics.push("no event type matches the exit pattern");
    }

    let mut stacks: HashMap<(ValueKey, Option<ValueKey>), Vec<OpenEntry>> = HashMap::new();

    for event in trace.events() {
        let is_entry = spec.entry.matches(&event.name);
        let is_exit = spec.exit.matches(&event.name);

        if is_exit {
            match correlate(event, &spec.exit_track_field, &spec.exit_label_field) {
                None => {
                    report.skipped_missing_field += 1;
                    report.orphan_exits += 1;
                    report.diagnostics.push(format!(
                        "exit '{}' at {} lacks a track or label field",
                        event.name, event.timestamp
                    ));
                }
                Some(c) => match stacks.get_mut(&c.key).and_then(|s| s.pop()) {
                    Some(open) => {
                        report.records.push(CallRecord {
                            entry_name: open.name.to_string(),
                            exit_name: event.name.clone(),
                            track: c.track,
                            label: c.label,
                            start_ts: open.timestamp,
                            end_ts: event.timestamp,
                            duration: event.timestamp.saturating_sub(open.timestamp),
                        });
                    }
                    None => {
                        report.orphan_exits += 1;
                        report.diagnostics.push(format!(
                            "exit '{}' at {} has no open entry (track {}, label {})",
                            event.name, event.timestamp, c.track, c.label
                        ));
                    }
                },
            }
        }

        if is_entry {
            match correlate(event, &spec.entry_track_field, &spec.entry_label_field) {
                None => {
                    report.skipped_missing_field += 1;
                    report.orphan_entries += 1;
                    report.diagnostics.push(format!(
                        "entry '{}' at {} lacks a track or label field",
                        event.name, event.timestamp
                    ));
                }
                Some(c) => stacks.entry(c.key).or_default().push(OpenEntry {
                    name: &event.name,
                    timestamp: event.timestamp,
                }),
            }
        }
    }

    let mut unclosed: Vec<_> = stacks
        .into_iter()
        .filter(|(_, open)| !open.is_empty())
        .collect();
    unclosed.sort_by(|a, b| a.0.cmp(&b.0));
    for (_, open) in unclosed {
        report.orphan_entries += open.len();
        for entry in open {
            report.diagnostics.push(format!(
                "entry '{}' at {} was never closed",
                entry.name, entry.timestamp
            ));
        }
    }

    debug!(
        "Matched {} calls ({} orphan entries, {} orphan exits)",
        report.records.len(),
        report.orphan_entries,
        report.orphan_exits
    );
    if report.orphan_entries > 0 || report.orphan_exits > 0 {
        warn!(
            "{} orphan entries and {} orphan exits ({} missing a correlation field)",
            report.orphan_entries, report.orphan_exits, report.skipped_missing_field
        );
    }

    Ok(report)
}

/// Count event types selected by a pattern and check named fields exist
///
/// **Private** - internal helper for match_calls
///
/// A field is unknown when at least one event type matches and none of
/// the matching types carries it.
fn check_fields(
    trace: &Trace,
    pattern: &NamePattern,
    fields: &[&String],
    side: &'static str,
) -> Result<usize, QueryError> {
    let matching: Vec<_> = trace
        .list_event_names()
        .iter()
        .filter(|info| pattern.matches(&info.name))
        .collect();
    if matching.is_empty() {
        return Ok(0);
    }

    for field in fields.iter().filter(|f| !f.is_empty()) {
        if !matching.iter().any(|info| info.fields.contains(field.as_str())) {
            return Err(QueryError::UnknownField {
                field: field.to_string(),
                side,
            });
        }
    }
    Ok(matching.len())
}

/// Resolve the correlation key of one event
///
/// **Private** - returns `None` when a named field is absent or null
fn correlate(event: &Event, track_field: &str, label_field: &str) -> Option<Correlation> {
    let (track, track_key) = if track_field.is_empty() {
        let id = event.track.0;
        (Value::UInt(u64::from(id)), ValueKey::Int(i128::from(id)))
    } else {
        let value = event.field(track_field)?;
        (value.clone(), value.key()?)
    };

    let (label, label_key) = if label_field.is_empty() {
        (Value::Null, None)
    } else {
        let value = event.field(label_field)?;
        (value.clone(), Some(value.key()?))
    };

    Some(Correlation {
        key: (track_key, label_key),
        track,
        label,
    })
}
