//! Query command implementation.
//!
//! The query commands:
//! 1. Load (or reuse) the trace directory
//! 2. Run the requested query
//! 3. Print the response envelope, a text table, or write files

use super::models::{QueryArgs, QueryKind};
use crate::aggregator::{aggregate, summarize_durations, StatsTable};
use crate::flamegraph::{generate_flamegraph, FlameFrame};
use crate::output::{
    render_event_counts, render_stats_table, response_to_string, write_result, write_svg,
    Response, SavedResult,
};
use crate::query::{CallstackQuery, QueryEngine};
use crate::utils::error::QueryError;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::time::Instant;

/// Execute a query command
///
/// **Public** - main entry point called from main.rs
///
/// # Arguments
/// * `args` - Query command arguments
///
/// # Returns
/// `Ok(true)` when the query succeeded, `Ok(false)` when it failed and
/// the failure envelope was emitted
///
/// # Errors
/// * Invalid arguments
/// * Output files that cannot be written
pub fn execute_query(args: QueryArgs) -> Result<bool> {
    validate_args(&args)?;

    let start_time = Instant::now();
    info!("Running {} query on: {}", args.kind, args.trace_dir.display());

    let engine = QueryEngine::new();
    let succeeded = match args.kind {
        QueryKind::Info => {
            let result = engine.get_trace_info(&args.trace_dir);
            emit(&args, Response::from(result))?
        }
        QueryKind::EventTypes => match engine.get_event_type_counts(&args.trace_dir) {
            Ok(rows) if args.print_table => {
                println!("{}", render_event_counts(&rows));
                true
            }
            result => emit(&args, Response::from(result))?,
        },
        QueryKind::Stats => {
            let query = callstack(&args)?;
            match run_stats(&engine, &args, query) {
                Ok(table) if args.print_table => {
                    println!("{}", render_stats_table(&table, args.max_rows));
                    true
                }
                result => emit(&args, Response::from(result))?,
            }
        }
        QueryKind::Flamegraph => {
            let query = callstack(&args)?;
            let result = run_flamegraph(&engine, &args, query)?;
            emit(&args, Response::from(result))?
        }
    };

    let elapsed = start_time.elapsed();
    if succeeded {
        info!("{} query completed in {:.2}s", args.kind, elapsed.as_secs_f64());
    } else {
        warn!("{} query failed after {:.2}s", args.kind, elapsed.as_secs_f64());
    }

    Ok(succeeded)
}

/// Match calls and aggregate them, logging a duration summary
///
/// **Private** - internal helper for execute_query
fn run_stats(
    engine: &QueryEngine,
    args: &QueryArgs,
    query: &CallstackQuery,
) -> Result<StatsTable, QueryError> {
    let report = engine.match_calls(&args.trace_dir, query)?;
    info!("Call durations: {}", summarize_durations(&report.records).summary());
    if report.orphan_entries + report.orphan_exits > 0 {
        info!(
            "Orphans: {} entries, {} exits",
            report.orphan_entries, report.orphan_exits
        );
    }

    let table = aggregate(&report.records);
    debug!("Top 3 callsites:");
    for (i, row) in table.rows.iter().take(3).enumerate() {
        debug!("  {}. {} ({} calls, {} ns)", i + 1, row.name, row.count, row.total);
    }
    Ok(table)
}

/// Build the flamegraph and write its SVG rendering when requested
///
/// **Private** - internal helper for execute_query
///
/// The outer `Result` carries output failures, the inner one the query
/// outcome.
fn run_flamegraph(
    engine: &QueryEngine,
    args: &QueryArgs,
    query: &CallstackQuery,
) -> Result<Result<FlameFrame, QueryError>> {
    let graph = match engine.get_flamegraph(&args.trace_dir, query) {
        Ok(graph) => graph,
        Err(e) => return Ok(Err(e)),
    };

    if graph.diagnostics.total() > 0 {
        info!("Flamegraph built with {} diagnostics", graph.diagnostics.total());
    }

    if let Some(svg_path) = &args.output_svg {
        if graph.root.children.is_empty() {
            warn!("No calls matched; skipping SVG output");
        } else {
            let svg = generate_flamegraph(&graph.root, args.flamegraph_config.as_ref())
                .context("Failed to generate flamegraph")?;
            write_svg(&svg, svg_path).context("Failed to write flamegraph SVG")?;
            info!("✓ Flamegraph written to: {}", svg_path.display());
        }
    }

    Ok(Ok(graph.root))
}

/// Print a response on stdout or save it to the output file
///
/// **Private** - returns whether the response is a success
fn emit<T: Serialize>(args: &QueryArgs, response: Response<T>) -> Result<bool> {
    let succeeded = response.is_success();
    if let Some(err) = &response.err {
        warn!("Query failed: {}", err);
    }

    match &args.output_json {
        Some(path) => {
            let saved = SavedResult::new(args.kind.to_string(), &args.trace_dir, response);
            write_result(&saved, path).context("Failed to write result JSON")?;
            info!("✓ Result written to: {}", path.display());
        }
        None => {
            let json = response_to_string(&response).context("Failed to serialize response")?;
            println!("{}", json);
        }
    }

    Ok(succeeded)
}

fn callstack(args: &QueryArgs) -> Result<&CallstackQuery> {
    args.callstack
        .as_ref()
        .with_context(|| format!("{} query needs entry and exit patterns", args.kind))
}

/// Validate query arguments
///
/// **Public** - can be called before execute_query for early validation
///
/// # Arguments
/// * `args` - Arguments to validate
///
/// # Returns
/// Ok if arguments are valid, Err with message if not
pub fn validate_args(args: &QueryArgs) -> Result<()> {
    if args.trace_dir.as_os_str().is_empty() {
        anyhow::bail!("Trace directory cannot be empty");
    }

    if args.kind.needs_callstack() {
        let Some(query) = &args.callstack else {
            anyhow::bail!("{} query needs entry and exit patterns", args.kind);
        };
        if query.entry_pattern.is_empty() {
            anyhow::bail!("Entry pattern cannot be empty");
        }
        if query.exit_pattern.is_empty() {
            anyhow::bail!("Exit pattern cannot be empty");
        }
    }

    if args.output_svg.is_some() && args.kind != QueryKind::Flamegraph {
        anyhow::bail!("--svg is only valid for the flamegraph query");
    }

    if args.print_table && !matches!(args.kind, QueryKind::Stats | QueryKind::EventTypes) {
        anyhow::bail!("--table is only valid for the stats and event-types queries");
    }

    if args.max_rows == 0 {
        anyhow::bail!("max_rows must be greater than 0");
    }

    if let Some(config) = &args.flamegraph_config {
        if config.width < 100 || config.width > 10_000 {
            anyhow::bail!("Flamegraph width must be between 100 and 10000 pixels");
        }
    }

    Ok(())
}
