use ctf_trace_query::aggregator::{aggregate, match_calls, summarize_durations, MatchSpec, NamePattern};
use ctf_trace_query::flamegraph::{build, generate_flamegraph, FlamegraphConfig};
use ctf_trace_query::output::render_stats_table;
use ctf_trace_query::parser::{Event, Trace, TraceMetadata, TrackId, Value};
use std::collections::BTreeMap;

const TID: &str = "/common-context/tid";

fn event(name: &str, ts: u64, tid: u64) -> Event {
    let mut fields = BTreeMap::new();
    fields.insert(TID.to_string(), Value::UInt(tid));
    Event {
        name: name.to_string(),
        track: TrackId(0),
        timestamp: ts,
        fields,
    }
}

fn spec(entry: &str, exit: &str) -> MatchSpec {
    MatchSpec {
        entry: NamePattern::new(entry, "regex", "entry").unwrap(),
        exit: NamePattern::new(exit, "regex", "exit").unwrap(),
        entry_track_field: TID.to_string(),
        exit_track_field: TID.to_string(),
        entry_label_field: String::new(),
        exit_label_field: String::new(),
    }
}

/// Two syscalls and one irq handler on two threads
fn sample_trace() -> Trace {
    let events = vec![
        event("syscall_entry_read", 0, 1),
        event("syscall_entry_write", 5, 2),
        event("irq_handler_entry", 10, 1),
        event("irq_handler_exit", 12, 1),
        event("syscall_exit_write", 30, 2),
        event("syscall_exit_read", 40, 1),
    ];
    Trace::new(TraceMetadata::empty(2), events)
}

#[test]
fn test_pipeline_stats() {
    let trace = sample_trace();
    let report = match_calls(&trace, &spec("_entry", "_exit")).unwrap();
    assert_eq!(report.records.len(), 3);
    assert_eq!(report.orphan_entries, 0);

    let table = aggregate(&report.records);
    let names: Vec<&str> = table.rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["syscall", "syscall", "irq_handler"]);
    assert_eq!(table.rows[0].entry, "syscall_entry_read");
    assert_eq!(table.rows[0].total, 40);
    assert_eq!(table.rows[1].total, 25);
    assert_eq!(table.rows[2].total, 2);

    let summary = summarize_durations(&report.records);
    assert_eq!(summary.call_count, 3);
    assert_eq!(summary.total_ns, 67);
}

#[test]
fn test_pipeline_flamegraph_per_thread() {
    let trace = sample_trace();
    let report = match_calls(&trace, &spec("_entry", "_exit")).unwrap();
    let graph = build(&report.records);

    // Thread 2's write does not nest inside thread 1's read.
    let tops: Vec<(&str, u64)> = graph
        .root
        .children
        .iter()
        .map(|f| (f.name.as_str(), f.value))
        .collect();
    assert_eq!(tops, vec![("syscall", 40), ("syscall", 25)]);

    let read = &graph.root.children[0];
    assert_eq!(read.children.len(), 1);
    assert_eq!(read.children[0].name, "irq_handler");
    assert_eq!(read.self_value, 38);
    assert!(graph.diagnostics.is_empty());
}

#[test]
fn test_pipeline_renders_svg_and_table() {
    let trace = sample_trace();
    let report = match_calls(&trace, &spec("_entry", "_exit")).unwrap();

    let graph = build(&report.records);
    let config = FlamegraphConfig::new().with_title("Syscalls").with_width(800);
    let svg = generate_flamegraph(&graph.root, Some(&config)).unwrap();
    assert!(svg.starts_with("<svg"));
    assert!(svg.contains("Syscalls"));
    assert!(svg.contains("irq_handler"));

    let text = render_stats_table(&aggregate(&report.records), 10);
    assert!(text.contains("syscall"));
    assert!(text.contains("irq_handler"));
}

#[test]
fn test_unmatched_patterns_give_empty_results() {
    let trace = sample_trace();
    let report = match_calls(&trace, &spec("^page_fault_entry$", "^page_fault_exit$")).unwrap();
    assert!(report.records.is_empty());
    assert!(!report.diagnostics.is_empty());

    assert!(aggregate(&report.records).is_empty());
    let graph = build(&report.records);
    assert!(graph.root.children.is_empty());
    assert!(generate_flamegraph(&graph.root, None).is_err());
}
