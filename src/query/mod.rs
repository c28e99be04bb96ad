//! Query entry points over loaded traces.
//!
//! `QueryEngine` keeps the most recently loaded trace behind an `Arc`.
//! Loading another directory builds the new trace completely before
//! swapping it in, so a query still holding the previous trace keeps
//! reading it until it finishes.

use crate::aggregator::{
    self, count_by_name, event_types, CallRecord, EventTypeCount, MatchReport, MatchSpec,
    NamePattern, StatsTable,
};
use crate::flamegraph::{self, FlameGraph};
use crate::parser::{self, Trace, TraceInfo};
use crate::utils::error::QueryError;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// The eight string parameters of the callstack queries
///
/// **Public** - shared by the stats and flamegraph queries
///
/// Modes are `"cmp"` (exact name) or `"regex"`. Empty track fields
/// select the physical track; empty label fields disable labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallstackQuery {
    pub entry_pattern: String,
    pub entry_match_mode: String,
    pub exit_pattern: String,
    pub exit_match_mode: String,
    pub entry_track_field: String,
    pub exit_track_field: String,
    pub entry_label_field: String,
    pub exit_label_field: String,
}

impl CallstackQuery {
    /// Exact-name query on the physical tracks without labels
    pub fn new(entry_pattern: impl Into<String>, exit_pattern: impl Into<String>) -> Self {
        Self {
            entry_pattern: entry_pattern.into(),
            entry_match_mode: "cmp".to_string(),
            exit_pattern: exit_pattern.into(),
            exit_match_mode: "cmp".to_string(),
            entry_track_field: String::new(),
            exit_track_field: String::new(),
            entry_label_field: String::new(),
            exit_label_field: String::new(),
        }
    }

    pub fn with_modes(mut self, entry: impl Into<String>, exit: impl Into<String>) -> Self {
        self.entry_match_mode = entry.into();
        self.exit_match_mode = exit.into();
        self
    }

    /// Same track field on both sides
    pub fn with_track_field(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.entry_track_field = field.clone();
        self.exit_track_field = field;
        self
    }

    /// Same label field on both sides
    pub fn with_label_field(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.entry_label_field = field.clone();
        self.exit_label_field = field;
        self
    }

    /// Validate modes and compile patterns
    ///
    /// **Public** - fails before any trace is touched
    ///
    /// # Errors
    /// * `QueryError::InvalidParameter` - unknown match mode or empty pattern
    /// * `QueryError::InvalidPattern` - regular expression does not compile
    pub fn to_match_spec(&self) -> Result<MatchSpec, QueryError> {
        if self.entry_pattern.is_empty() {
            return Err(QueryError::InvalidParameter("entry pattern is empty".to_string()));
        }
        if self.exit_pattern.is_empty() {
            return Err(QueryError::InvalidParameter("exit pattern is empty".to_string()));
        }

        Ok(MatchSpec {
            entry: NamePattern::new(&self.entry_pattern, &self.entry_match_mode, "entry")?,
            exit: NamePattern::new(&self.exit_pattern, &self.exit_match_mode, "exit")?,
            entry_track_field: self.entry_track_field.trim().to_string(),
            exit_track_field: self.exit_track_field.trim().to_string(),
            entry_label_field: self.entry_label_field.trim().to_string(),
            exit_label_field: self.exit_label_field.trim().to_string(),
        })
    }
}

struct Cached {
    dir: PathBuf,
    trace: Arc<Trace>,
}

/// Query engine with a one-trace cache
///
/// **Public** - main entry point for queries
///
/// Every query is read-only over the cached trace; matcher state is
/// built per call. The engine is `Send + Sync`.
#[derive(Default)]
pub struct QueryEngine {
    cache: Mutex<Option<Cached>>,
}

impl QueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trace of `dir`, loading it unless it is the cached one
    ///
    /// **Public** - also used by commands needing the raw trace
    ///
    /// # Errors
    /// * `QueryError::Load` - the directory could not be loaded
    pub fn trace(&self, dir: impl AsRef<Path>) -> Result<Arc<Trace>, QueryError> {
        let key = cache_key(dir.as_ref());
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = cache.as_ref().filter(|c| c.dir == key) {
                debug!("Reusing loaded trace for {}", key.display());
                return Ok(Arc::clone(&cached.trace));
            }
        }
        self.load_and_swap(dir.as_ref(), key)
    }

    /// Force a fresh load of `dir`, replacing the cached trace
    ///
    /// **Public** - picks up files staged after the first load
    pub fn reload(&self, dir: impl AsRef<Path>) -> Result<Arc<Trace>, QueryError> {
        let key = cache_key(dir.as_ref());
        self.load_and_swap(dir.as_ref(), key)
    }

    /// Load outside the lock, then swap the cached `Arc`
    ///
    /// **Private** - a failed load leaves the cache untouched
    fn load_and_swap(&self, dir: &Path, key: PathBuf) -> Result<Arc<Trace>, QueryError> {
        let trace = Arc::new(parser::load(dir)?);
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        *cache = Some(Cached {
            dir: key,
            trace: Arc::clone(&trace),
        });
        Ok(trace)
    }

    /// Trace metadata and event catalog
    ///
    /// **Public** - `getTraceInfo(dir)`
    pub fn get_trace_info(&self, dir: impl AsRef<Path>) -> Result<TraceInfo, QueryError> {
        let trace = self.trace(dir)?;
        Ok(TraceInfo::from(trace.as_ref()))
    }

    /// Event counts per event name, most frequent first
    ///
    /// **Public** - `getEventTypeCounts(dir)`
    pub fn get_event_type_counts(
        &self,
        dir: impl AsRef<Path>,
    ) -> Result<Vec<EventTypeCount>, QueryError> {
        let trace = self.trace(dir)?;
        let mut rows = count_by_name(&trace);
        event_types::sort_for_display(&mut rows);
        info!("Event type counts: {} types", rows.len());
        Ok(rows)
    }

    /// Raw matching run, with orphan counts and diagnostics
    ///
    /// **Public** - shared first step of the stats and flamegraph queries
    pub fn match_calls(
        &self,
        dir: impl AsRef<Path>,
        query: &CallstackQuery,
    ) -> Result<MatchReport, QueryError> {
        let spec = query.to_match_spec()?;
        let trace = self.trace(dir)?;

        let start = Instant::now();
        let report = aggregator::match_calls(&trace, &spec)?;
        info!(
            "Matched {} calls for '{}' / '{}' in {:.2}s",
            report.records.len(),
            query.entry_pattern,
            query.exit_pattern,
            start.elapsed().as_secs_f64()
        );
        Ok(report)
    }

    /// Per-callsite duration statistics
    ///
    /// **Public** - `getCallstackStats(dir, ...)`
    ///
    /// A pattern matching nothing yields an empty table, not an error.
    pub fn get_callstack_stats(
        &self,
        dir: impl AsRef<Path>,
        query: &CallstackQuery,
    ) -> Result<StatsTable, QueryError> {
        let report = self.match_calls(dir, query)?;
        if !report.diagnostics.is_empty() {
            warn!(
                "{} orphan entries, {} orphan exits, {} diagnostics",
                report.orphan_entries,
                report.orphan_exits,
                report.diagnostics.total()
            );
            for message in &report.diagnostics.messages {
                debug!("{}", message);
            }
        }
        Ok(stats_of(&report.records))
    }

    /// Flamegraph of matched calls
    ///
    /// **Public** - `getFlamegraph(dir, ...)`
    pub fn get_flamegraph(
        &self,
        dir: impl AsRef<Path>,
        query: &CallstackQuery,
    ) -> Result<FlameGraph, QueryError> {
        let report = self.match_calls(dir, query)?;
        let mut graph = flamegraph::build(&report.records);
        graph.diagnostics.merge(&report.diagnostics);
        Ok(graph)
    }
}

fn stats_of(records: &[CallRecord]) -> StatsTable {
    let table = aggregator::aggregate(records);
    debug!("Stats table: {} rows", table.rows.len());
    table
}

/// Canonical cache key of a directory; the path itself when it does
/// not resolve
fn cache_key(dir: &Path) -> PathBuf {
    std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_engine_is_send_sync() {
        assert_send_sync::<QueryEngine>();
    }

    #[test]
    fn test_invalid_parameters_fail_before_loading() {
        let engine = QueryEngine::new();
        let query = CallstackQuery::new("a", "b").with_modes("glob", "cmp");
        let err = engine
            .get_callstack_stats("/definitely/not/a/trace", &query)
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidParameter");

        let query = CallstackQuery::new("(", "b").with_modes("regex", "cmp");
        let err = engine.get_flamegraph("/definitely/not/a/trace", &query).unwrap_err();
        assert_eq!(err.kind(), "InvalidPattern");

        let err = CallstackQuery::new("", "b").to_match_spec().unwrap_err();
        assert_eq!(err.kind(), "InvalidParameter");
    }

    #[test]
    fn test_missing_directory_is_io_failure() {
        let engine = QueryEngine::new();
        let err = engine.get_trace_info("/definitely/not/a/trace").unwrap_err();
        assert_eq!(err.kind(), "IOFailure");
    }

    #[test]
    fn test_query_builder_sets_both_sides() {
        let q = CallstackQuery::new("in", "out")
            .with_track_field("/common-context/tid")
            .with_label_field("/payload/addr");
        assert_eq!(q.entry_track_field, q.exit_track_field);
        assert_eq!(q.exit_label_field, "/payload/addr");
        assert_eq!(q.entry_match_mode, "cmp");
    }
}
