//! Event-type frequency index.

use crate::parser::Trace;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of occurrences of one event name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTypeCount {
    pub event_name: String,
    pub count: u64,
}

/// Count events per distinct name across all tracks
///
/// **Public** - backs the event-type distribution query
///
/// Rows follow the trace's event catalog order (sorted by name); any
/// display ordering is left to the caller.
pub fn count_by_name(trace: &Trace) -> Vec<EventTypeCount> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for event in trace.events() {
        *counts.entry(event.name.as_str()).or_insert(0) += 1;
    }

    debug!("Counted {} event types", counts.len());

    trace
        .list_event_names()
        .iter()
        .map(|info| EventTypeCount {
            event_name: info.name.clone(),
            count: counts.get(info.name.as_str()).copied().unwrap_or(0),
        })
        .collect()
}

/// Sort rows by count descending, then by name
///
/// **Public** - display ordering used by the query layer
pub fn sort_for_display(rows: &mut [EventTypeCount]) {
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.event_name.cmp(&b.event_name)));
}
