//! End-to-end query tests over generated trace directories

mod common;

use common::{TraceBuilder, ADDR, ENTRY, EXIT, VTID};
use ctf_trace_query::flamegraph::FlameFrame;
use ctf_trace_query::output::json::Response;
use ctf_trace_query::parser::Value;
use ctf_trace_query::query::{CallstackQuery, QueryEngine};
use ctf_trace_query::utils::config::MAX_DIAGNOSTICS;
use ctf_trace_query::utils::error::QueryError;
use pretty_assertions::assert_eq;
use serde_json::json;

fn by_vtid() -> CallstackQuery {
    CallstackQuery::new(ENTRY, EXIT).with_track_field(VTID)
}

/// Every frame's value covers its children and self_value is the rest
fn assert_self_values(frame: &FlameFrame) {
    let children: u64 = frame.children.iter().map(|c| c.value).sum();
    if frame.value >= children {
        assert_eq!(frame.self_value, frame.value - children, "frame {}", frame.name);
    } else {
        assert_eq!(frame.self_value, 0);
    }
    frame.children.iter().for_each(assert_self_values);
}

#[test]
fn test_nested_calls_stats_and_flamegraph() {
    let dir = TraceBuilder::new()
        .entry(0, 1, 0xa)
        .entry(1, 1, 0xa)
        .exit(2, 1, 0xa)
        .exit(3, 1, 0xa)
        .write();
    let engine = QueryEngine::new();

    let report = engine.match_calls(dir.path(), &by_vtid()).unwrap();
    let pairs: Vec<(u64, u64)> = report.records.iter().map(|r| (r.start_ts, r.end_ts)).collect();
    assert_eq!(pairs, vec![(1, 2), (0, 3)]);
    assert_eq!(report.orphan_entries, 0);
    assert_eq!(report.orphan_exits, 0);

    let stats = engine.get_callstack_stats(dir.path(), &by_vtid()).unwrap();
    assert_eq!(stats.rows.len(), 1);
    let row = &stats.rows[0];
    assert_eq!(row.name, "func");
    assert_eq!((row.count, row.total, row.min, row.max), (2, 4, 1, 3));
    assert_eq!(row.mean, 2.0);

    let graph = engine.get_flamegraph(dir.path(), &by_vtid()).unwrap();
    let root = &graph.root;
    assert_eq!(root.name, "root");
    assert_eq!(root.value, 0);
    assert_eq!(root.children.len(), 1);

    let outer = &root.children[0];
    assert_eq!((outer.value, outer.self_value), (3, 2));
    assert_eq!(outer.track, Some(Value::UInt(1)));
    assert_eq!(outer.children.len(), 1);
    assert_eq!((outer.children[0].value, outer.children[0].self_value), (1, 1));
    assert!(graph.diagnostics.is_empty());
}

#[test]
fn test_lone_exit_is_an_orphan() {
    let dir = TraceBuilder::new().exit(5, 1, 0xa).write();
    let engine = QueryEngine::new();

    let report = engine.match_calls(dir.path(), &by_vtid()).unwrap();
    assert!(report.records.is_empty());
    assert_eq!(report.orphan_exits, 1);

    let stats = engine.get_callstack_stats(dir.path(), &by_vtid()).unwrap();
    assert!(stats.is_empty());
    assert_eq!(stats.hdrs.len(), 8);
}

#[test]
fn test_event_type_counts() {
    let dir = TraceBuilder::new()
        .entry(1, 1, 1)
        .entry(2, 1, 1)
        .exit(3, 1, 1)
        .write();

    let counts = QueryEngine::new().get_event_type_counts(dir.path()).unwrap();
    let pairs: Vec<(&str, u64)> = counts.iter().map(|c| (c.event_name.as_str(), c.count)).collect();
    assert_eq!(pairs, vec![(ENTRY, 2), (EXIT, 1)]);
}

#[test]
fn test_trace_info() {
    let dir = TraceBuilder::new().entry(10, 1, 1).exit(20, 1, 1).write();

    let info = QueryEngine::new().get_trace_info(dir.path()).unwrap();
    assert_eq!(info.metadata.event_count, 2);
    assert_eq!(info.events.len(), 2);
    assert!(info.events.iter().any(|t| t.name == ENTRY && t.fields.contains(ADDR)));
}

#[test]
fn test_stats_ordering_by_total() {
    let dir = TraceBuilder::new()
        .entry(0, 1, 0)
        .exit(10, 1, 0)
        .entry(20, 1, 0)
        .exit(21, 1, 0)
        .write();

    let stats = QueryEngine::new()
        .get_callstack_stats(dir.path(), &by_vtid())
        .unwrap();
    assert_eq!(stats.rows[0].count, 2);
    assert_eq!(stats.rows[0].total, 11);
    assert_eq!(stats.rows[0].max, 10);
    assert_eq!(stats.rows[0].min, 1);
}

#[test]
fn test_queries_are_idempotent() {
    let dir = TraceBuilder::new()
        .entry(0, 1, 1)
        .entry(1, 2, 1)
        .exit(2, 1, 1)
        .exit(4, 2, 1)
        .write();
    let engine = QueryEngine::new();

    let first = serde_json::to_value(engine.get_flamegraph(dir.path(), &by_vtid()).unwrap()).unwrap();
    let second = serde_json::to_value(engine.get_flamegraph(dir.path(), &by_vtid()).unwrap()).unwrap();
    assert_eq!(first, second);

    let s1 = engine.get_callstack_stats(dir.path(), &by_vtid()).unwrap();
    let s2 = engine.get_callstack_stats(dir.path(), &by_vtid()).unwrap();
    assert_eq!(s1, s2);
}

#[test]
fn test_unknown_field_is_an_error() {
    let dir = TraceBuilder::new().entry(0, 1, 1).exit(1, 1, 1).write();
    let query = CallstackQuery::new(ENTRY, EXIT).with_track_field("/payload/nope");

    let err = QueryEngine::new()
        .get_callstack_stats(dir.path(), &query)
        .unwrap_err();
    assert!(matches!(err, QueryError::UnknownField { .. }));
    assert_eq!(err.kind(), "UnknownField");
}

#[test]
fn test_empty_success_differs_from_failure() {
    let dir = TraceBuilder::new().marker(0, 1, "only markers").write();
    let engine = QueryEngine::new();

    let empty: Response<_> = engine.get_callstack_stats(dir.path(), &by_vtid()).into();
    let value = serde_json::to_value(&empty).unwrap();
    assert_eq!(value["rc"], json!(0));
    assert_eq!(value["res"]["rows"], json!([]));
    assert!(value.get("err").is_none());

    let missing = dir.path().join("missing");
    let failed: Response<_> = engine.get_callstack_stats(&missing, &by_vtid()).into();
    let value = serde_json::to_value(&failed).unwrap();
    assert_eq!(value["rc"], json!(-1));
    assert!(value.get("res").is_none());
    assert!(value["err"].as_str().unwrap().starts_with("IOFailure: "));
}

#[test]
fn test_regex_patterns() {
    let dir = TraceBuilder::new().entry(0, 1, 1).exit(5, 1, 1).write();
    let query = CallstackQuery::new("_entry$", "^func_ex")
        .with_modes("regex", "regex")
        .with_track_field(VTID);

    let stats = QueryEngine::new().get_callstack_stats(dir.path(), &query).unwrap();
    assert_eq!(stats.rows.len(), 1);
    assert_eq!(stats.rows[0].total, 5);

    let bad = CallstackQuery::new("(", EXIT).with_modes("regex", "cmp");
    let err = QueryEngine::new().get_callstack_stats(dir.path(), &bad).unwrap_err();
    assert_eq!(err.kind(), "InvalidPattern");
}

#[test]
fn test_vtid_track_spans_streams() {
    // Same thread id recorded in two stream files pairs across them.
    let dir = TraceBuilder::new()
        .entry(0, 3, 1)
        .stream()
        .exit(10, 3, 1)
        .write();
    let engine = QueryEngine::new();

    let report = engine.match_calls(dir.path(), &by_vtid()).unwrap();
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].duration, 10);

    // Physical tracks keep them apart.
    let physical = CallstackQuery::new(ENTRY, EXIT);
    let report = engine.match_calls(dir.path(), &physical).unwrap();
    assert!(report.records.is_empty());
    assert_eq!(report.orphan_entries, 1);
    assert_eq!(report.orphan_exits, 1);
}

#[test]
fn test_label_pairs_by_address() {
    // Interleaved calls on one thread, correlated by address.
    let dir = TraceBuilder::new()
        .entry(0, 1, 0xa)
        .entry(1, 1, 0xb)
        .exit(2, 1, 0xa)
        .exit(6, 1, 0xb)
        .write();
    let query = by_vtid().with_label_field(ADDR);

    let report = QueryEngine::new().match_calls(dir.path(), &query).unwrap();
    let mut found: Vec<(Value, u64)> = report
        .records
        .iter()
        .map(|r| (r.label.clone(), r.duration))
        .collect();
    found.sort_by_key(|(_, d)| *d);
    assert_eq!(found, vec![(Value::UInt(0xa), 2), (Value::UInt(0xb), 5)]);
}

#[test]
fn test_flamegraph_self_values_hold() {
    let dir = TraceBuilder::new()
        .entry(0, 1, 1)
        .entry(1, 1, 2)
        .exit(4, 1, 2)
        .entry(5, 1, 3)
        .exit(7, 1, 3)
        .exit(10, 1, 1)
        .entry(2, 2, 1)
        .exit(3, 2, 1)
        .write();

    let graph = QueryEngine::new()
        .get_flamegraph(dir.path(), &by_vtid().with_label_field(ADDR))
        .unwrap();
    assert_eq!(graph.root.children.len(), 2);
    assert_eq!(graph.root.descendant_count(), 4);
    assert_eq!(graph.root.children[0].children.len(), 2);
    assert_self_values(&graph.root);
}

#[test]
fn test_reload_picks_up_new_streams() {
    let dir = TraceBuilder::new().entry(0, 1, 1).exit(1, 1, 1).write();
    let engine = QueryEngine::new();
    assert_eq!(engine.get_trace_info(dir.path()).unwrap().metadata.event_count, 2);

    TraceBuilder::new()
        .entry(0, 1, 1)
        .exit(1, 1, 1)
        .stream()
        .entry(2, 2, 1)
        .exit(3, 2, 1)
        .write_into(dir.path());

    // Cached until reloaded.
    assert_eq!(engine.get_trace_info(dir.path()).unwrap().metadata.event_count, 2);
    engine.reload(dir.path()).unwrap();
    assert_eq!(engine.get_trace_info(dir.path()).unwrap().metadata.event_count, 4);
}

#[test]
fn test_flamegraph_keeps_dropped_diagnostics() {
    let mut builder = TraceBuilder::new();
    for ts in 1..=(MAX_DIAGNOSTICS as u64 + 5) {
        builder = builder.exit(ts, 1, 1);
    }
    let dir = builder.entry(200, 1, 1).exit(201, 1, 1).write();
    let engine = QueryEngine::new();

    let graph = engine.get_flamegraph(dir.path(), &by_vtid()).unwrap();
    assert_eq!(graph.root.children.len(), 1);
    assert_eq!(graph.diagnostics.messages.len(), MAX_DIAGNOSTICS);
    assert_eq!(graph.diagnostics.dropped, 5);

    let stats = engine.get_callstack_stats(dir.path(), &by_vtid()).unwrap();
    assert_eq!(stats.rows.len(), 1);
    assert_eq!(stats.rows[0].count, 1);
}
