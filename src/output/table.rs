//! Text rendering of query answers for terminal output.

use crate::aggregator::{EventTypeCount, StatsTable};

const NAME_WIDTH: usize = 42;

/// Render a stats table with box drawing, hottest callsites first
///
/// **Public** - used by `stats --table`
///
/// # Arguments
/// * `table` - Stats table, already sorted by total
/// * `max_rows` - Maximum number of rows to print
pub fn render_stats_table(table: &StatsTable, max_rows: usize) -> String {
    let mut lines = Vec::new();

    lines.push("  CALLSTACK STATS".to_string());
    lines.push("  ┏━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┳━━━━━━━━━━┳━━━━━━━━━━━━┳━━━━━━━━━━━━┳━━━━━━━━━━━━┳━━━━━━━━━━━━┓".to_string());
    lines.push(format!(
        "  ┃ {:<42} ┃ {:^8} ┃ {:^10} ┃ {:^10} ┃ {:^10} ┃ {:^10} ┃",
        "Callsite (Slowest First)", "COUNT", "TOTAL", "MEAN", "MIN", "MAX"
    ));
    lines.push("  ┣━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━╋━━━━━━━━━━╋━━━━━━━━━━━━╋━━━━━━━━━━━━╋━━━━━━━━━━━━╋━━━━━━━━━━━━┫".to_string());

    for row in table.rows.iter().take(max_rows) {
        lines.push(format!(
            "  ┃ {:<42} ┃ {:>8} ┃ {:>10} ┃ {:>10} ┃ {:>10} ┃ {:>10} ┃",
            truncate(&row.name, NAME_WIDTH),
            row.count,
            format_duration(row.total as f64),
            format_duration(row.mean),
            format_duration(row.min as f64),
            format_duration(row.max as f64)
        ));
    }

    lines.push("  ┗━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━┻━━━━━━━━━━┻━━━━━━━━━━━━┻━━━━━━━━━━━━┻━━━━━━━━━━━━┻━━━━━━━━━━━━┛".to_string());

    let grand_total: u64 = table
        .rows
        .iter()
        .fold(0u64, |acc, r| acc.saturating_add(r.total));
    if grand_total > 0 {
        lines.push(String::new());
        lines.push("  SHARE OF TOTAL DURATION".to_string());
        for row in table.rows.iter().take(5) {
            let percentage = (row.total as f64 / grand_total as f64) * 100.0;
            let bar = "█".repeat((percentage / 2.0) as usize);
            lines.push(format!(
                "  └─ {:<20} {:50} {:>5.1}%",
                truncate(&row.name, 20),
                bar,
                percentage
            ));
        }
    }

    if table.rows.len() > max_rows {
        lines.push(String::new());
        lines.push(format!(
            "   (Showing top {} of {} callsites)",
            max_rows,
            table.rows.len()
        ));
    }

    lines.join("\n")
}

/// Render event counts as a two-column table
///
/// **Public** - used by `event-types --table`
pub fn render_event_counts(rows: &[EventTypeCount]) -> String {
    let mut lines = Vec::new();
    lines.push(format!("  {:<w$}  {:>10}", "EVENT", "COUNT", w = NAME_WIDTH));
    for row in rows {
        lines.push(format!(
            "  {:<w$}  {:>10}",
            truncate(&row.event_name, NAME_WIDTH),
            row.count,
            w = NAME_WIDTH
        ));
    }
    lines.join("\n")
}

/// Human-readable duration from nanoseconds
///
/// **Public** - display only; JSON output keeps raw nanoseconds
pub fn format_duration(ns: f64) -> String {
    if ns >= 1e9 {
        format!("{:.2} s", ns / 1e9)
    } else if ns >= 1e6 {
        format!("{:.2} ms", ns / 1e6)
    } else if ns >= 1e3 {
        format!("{:.2} us", ns / 1e3)
    } else {
        format!("{:.0} ns", ns)
    }
}

/// Keep the tail of long names, where callsite names differ
fn truncate(name: &str, width: usize) -> String {
    let len = name.chars().count();
    if len <= width {
        return name.to_string();
    }
    let tail: String = name.chars().skip(len - (width - 3)).collect();
    format!("...{}", tail)
}
