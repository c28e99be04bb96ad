//! Per-callsite duration statistics over matched calls.

use super::matcher::CallRecord;
use crate::utils::config::STATS_HEADERS;
use log::debug;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;

/// Aggregate durations of one (entry, exit) group
///
/// Serialized as a positional array matching `STATS_HEADERS`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatsRow {
    pub name: String,
    pub entry: String,
    pub exit: String,
    pub count: u64,
    pub total: u64,
    pub mean: f64,
    pub min: u64,
    pub max: u64,
}

impl Serialize for StatsRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(STATS_HEADERS.len()))?;
        seq.serialize_element(&self.name)?;
        seq.serialize_element(&self.entry)?;
        seq.serialize_element(&self.exit)?;
        seq.serialize_element(&self.count)?;
        seq.serialize_element(&self.total)?;
        seq.serialize_element(&self.mean)?;
        seq.serialize_element(&self.min)?;
        seq.serialize_element(&self.max)?;
        seq.end()
    }
}

/// Stats answer: fixed headers plus rows
///
/// **Public** - result of the callstack stats query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsTable {
    pub hdrs: Vec<String>,
    pub rows: Vec<StatsRow>,
}

impl StatsTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Default)]
struct Accumulator {
    count: u64,
    total: u64,
    min: u64,
    max: u64,
}

/// Group call records by (entry, exit) and compute duration statistics
///
/// **Public** - main entry point for stats aggregation
///
/// # Arguments
/// * `records` - Call records from the matcher
///
/// # Returns
/// Table sorted by total duration descending, ties by (entry, exit)
pub fn aggregate(records: &[CallRecord]) -> StatsTable {
    let mut groups: HashMap<(&str, &str), Accumulator> = HashMap::new();

    for record in records {
        let acc = groups
            .entry((record.entry_name.as_str(), record.exit_name.as_str()))
            .or_default();
        if acc.count == 0 {
            acc.min = record.duration;
            acc.max = record.duration;
        } else {
            acc.min = acc.min.min(record.duration);
            acc.max = acc.max.max(record.duration);
        }
        acc.count += 1;
        acc.total = acc.total.saturating_add(record.duration);
    }

    let mut rows: Vec<StatsRow> = groups
        .into_iter()
        .map(|((entry, exit), acc)| StatsRow {
            name: callsite_name(entry, exit),
            entry: entry.to_string(),
            exit: exit.to_string(),
            count: acc.count,
            total: acc.total,
            mean: acc.total as f64 / acc.count as f64,
            min: acc.min,
            max: acc.max,
        })
        .collect();

    rows.sort_by(|a, b| {
        b.total
            .cmp(&a.total)
            .then_with(|| a.entry.cmp(&b.entry))
            .then_with(|| a.exit.cmp(&b.exit))
    });

    debug!("Aggregated {} records into {} rows", records.len(), rows.len());

    StatsTable {
        hdrs: STATS_HEADERS.iter().map(|h| h.to_string()).collect(),
        rows,
    }
}

/// Display name of an (entry, exit) pair
///
/// **Public** - shared by stats rows and flamegraph frames
///
/// Equal names give the name itself. Otherwise the common prefix, cut
/// back to a separator boundary with trailing separators trimmed, e.g.
/// `"func_entry"`/`"func_exit"` gives `"func"`. Without a usable prefix
/// the names are joined as `entry/exit`.
pub fn callsite_name(entry: &str, exit: &str) -> String {
    if entry == exit {
        return entry.to_string();
    }

    let common = entry
        .char_indices()
        .zip(exit.chars())
        .take_while(|((_, a), b)| a == b)
        .last()
        .map(|((i, c), _)| i + c.len_utf8())
        .unwrap_or(0);

    let at_boundary = |name: &str| name[common..].chars().next().map_or(true, is_separator);
    let cut = if at_boundary(entry) && at_boundary(exit) {
        common
    } else {
        entry[..common]
            .rfind(is_separator)
            .map(|i| i + 1)
            .unwrap_or(0)
    };

    let prefix = entry[..cut].trim_end_matches(is_separator);
    if prefix.is_empty() {
        format!("{}/{}", entry, exit)
    } else {
        prefix.to_string()
    }
}

fn is_separator(c: char) -> bool {
    matches!(c, '_' | ':' | '.' | '/' | '-')
}
