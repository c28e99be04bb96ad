//! Aggregation of loaded traces into query answers.
//!
//! This module transforms an immutable `Trace` into:
//! - Event counts per event name
//! - Call records from matched entry/exit events
//! - Per-callsite duration statistics

pub mod diagnostics;
pub mod event_types;
pub mod matcher;
pub mod metrics;
pub mod stats;

// Re-export main types and functions
pub use diagnostics::Diagnostics;
pub use event_types::{count_by_name, EventTypeCount};
pub use matcher::{match_calls, CallRecord, MatchReport, MatchSpec, NamePattern};
pub use metrics::{summarize_durations, DurationSummary};
pub use stats::{aggregate, callsite_name, StatsRow, StatsTable};
