//! Flamegraph tree construction from matched calls.
//!
//! Calls are nested by timestamp containment, independently per
//! correlation track, and every top-level call hangs off one synthetic
//! root frame.

use crate::aggregator::{callsite_name, CallRecord, Diagnostics};
use crate::parser::{Value, ValueKey};
use crate::utils::config::ROOT_FRAME_NAME;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A node of the flamegraph tree
///
/// **Public** - serialized in d3-flamegraph shape (`name`, `value`, `children`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlameFrame {
    pub name: String,

    /// Total duration of the call (0 for the synthetic root)
    pub value: u64,

    /// `value` minus the children's values, clamped at 0
    pub self_value: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ts: Option<u64>,

    /// Children ordered by start time
    pub children: Vec<FlameFrame>,
}

impl FlameFrame {
    fn root() -> Self {
        Self {
            name: ROOT_FRAME_NAME.to_string(),
            value: 0,
            self_value: 0,
            track: None,
            label: None,
            start_ts: None,
            children: Vec::new(),
        }
    }

    /// Depth of the deepest frame below this one
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut pending = vec![(self, 0usize)];
        while let Some((frame, level)) = pending.pop() {
            deepest = deepest.max(level);
            pending.extend(frame.children.iter().map(|c| (c, level + 1)));
        }
        deepest
    }

    /// Number of frames in this subtree, excluding self
    pub fn descendant_count(&self) -> usize {
        let mut count = 0;
        let mut pending: Vec<&FlameFrame> = self.children.iter().collect();
        while let Some(frame) = pending.pop() {
            count += 1;
            pending.extend(frame.children.iter());
        }
        count
    }
}

// Deep call chains are released level by level instead of recursively.
impl Drop for FlameFrame {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut frame) = pending.pop() {
            pending.append(&mut frame.children);
        }
    }
}

/// A built flamegraph with the diagnostics raised while nesting
///
/// **Public** - result of the flamegraph query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlameGraph {
    pub root: FlameFrame,
    pub diagnostics: Diagnostics,
}

/// Arena slot used while nesting
struct Slot {
    record: usize,
    children: Vec<usize>,
}

/// Build the flamegraph tree of a set of call records
///
/// **Public** - main entry point for flamegraph construction
///
/// Within each track, records are sorted by start time (longer calls
/// first on ties, then input order) and placed with an open-interval
/// stack: open frames ending at or before the next start are closed,
/// and the record becomes a child of the innermost frame still open.
///
/// # Arguments
/// * `records` - Call records from the matcher
///
/// # Returns
/// The tree under a root named `root` with value 0. Containment
/// violations are reported in `diagnostics`, never as errors.
pub fn build(records: &[CallRecord]) -> FlameGraph {
    let mut diagnostics = Diagnostics::new();

    let mut tracks: BTreeMap<Option<ValueKey>, Vec<usize>> = BTreeMap::new();
    for (index, record) in records.iter().enumerate() {
        tracks.entry(record.track.key()).or_default().push(index);
    }

    let mut slots: Vec<Slot> = Vec::with_capacity(records.len());
    let mut top_level: Vec<usize> = Vec::new();

    for (_, mut indices) in tracks {
        indices.sort_by(|&a, &b| {
            let (ra, rb) = (&records[a], &records[b]);
            ra.start_ts
                .cmp(&rb.start_ts)
                .then_with(|| rb.duration.cmp(&ra.duration))
                .then_with(|| a.cmp(&b))
        });

        let mut open: Vec<usize> = Vec::new();
        for index in indices {
            let record = &records[index];
            while let Some(&top) = open.last() {
                if records[slots[top].record].end_ts <= record.start_ts {
                    open.pop();
                } else {
                    break;
                }
            }

            let slot = slots.len();
            slots.push(Slot {
                record: index,
                children: Vec::new(),
            });

            match open.last() {
                Some(&parent) => {
                    let parent_record = &records[slots[parent].record];
                    if record.end_ts > parent_record.end_ts {
                        warn!(
                            "Call '{}' [{}, {}] overlaps its parent '{}' [{}, {}]",
                            record.entry_name,
                            record.start_ts,
                            record.end_ts,
                            parent_record.entry_name,
                            parent_record.start_ts,
                            parent_record.end_ts
                        );
                        diagnostics.push(format!(
                            "call '{}' [{}, {}] ends after its parent [{}, {}]",
                            record.entry_name,
                            record.start_ts,
                            record.end_ts,
                            parent_record.start_ts,
                            parent_record.end_ts
                        ));
                    }
                    slots[parent].children.push(slot);
                }
                None => top_level.push(slot),
            }
            open.push(slot);
        }
    }

    // Track groups are concatenated; order top-level calls by start time.
    top_level.sort_by(|&a, &b| {
        let (ra, rb) = (&records[slots[a].record], &records[slots[b].record]);
        ra.start_ts.cmp(&rb.start_ts).then_with(|| slots[a].record.cmp(&slots[b].record))
    });

    // Children always sit in later slots than their parent, so walking
    // the arena backwards finishes every subtree before its parent.
    let mut built: Vec<Option<FlameFrame>> = Vec::with_capacity(slots.len());
    built.resize_with(slots.len(), || None);
    for slot in (0..slots.len()).rev() {
        let children: Vec<FlameFrame> = slots[slot]
            .children
            .iter()
            .filter_map(|&child| built[child].take())
            .collect();
        let record = &records[slots[slot].record];
        built[slot] = Some(to_frame(record, children, &mut diagnostics));
    }

    let mut root = FlameFrame::root();
    root.children = top_level
        .iter()
        .filter_map(|&slot| built[slot].take())
        .collect();

    debug!(
        "Built flamegraph: {} frames, depth {}",
        root.descendant_count(),
        root.depth()
    );

    FlameGraph { root, diagnostics }
}

/// Frame of one record over its already built children
///
/// **Private** - internal helper for build
fn to_frame(
    record: &CallRecord,
    children: Vec<FlameFrame>,
    diagnostics: &mut Diagnostics,
) -> FlameFrame {
    let children_total = children
        .iter()
        .fold(0u64, |acc, c| acc.saturating_add(c.value));
    let self_value = match record.duration.checked_sub(children_total) {
        Some(v) => v,
        None => {
            warn!(
                "Children of '{}' at {} exceed its duration ({} > {}), clamping self value",
                record.entry_name, record.start_ts, children_total, record.duration
            );
            diagnostics.push(format!(
                "children of '{}' at {} last {} ns, longer than the call itself ({} ns)",
                record.entry_name, record.start_ts, children_total, record.duration
            ));
            0
        }
    };

    FlameFrame {
        name: callsite_name(&record.entry_name, &record.exit_name),
        value: record.duration,
        self_value,
        track: Some(record.track.clone()),
        label: if record.label.is_null() {
            None
        } else {
            Some(record.label.clone())
        },
        start_ts: Some(record.start_ts),
        children,
    }
}
