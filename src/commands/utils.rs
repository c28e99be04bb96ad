use crate::output::read_result;
use crate::utils::config::SCHEMA_VERSION;
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Validate a saved result JSON file
///
/// **Public** - backs the `validate` command
pub fn validate_result_file(file_path: PathBuf) -> Result<()> {
    println!("Validating result: {}", file_path.display());

    let result = read_result::<serde_json::Value>(&file_path)
        .with_context(|| format!("Failed to read result file {}", file_path.display()))?;

    if result.version != SCHEMA_VERSION {
        anyhow::bail!(
            "Unsupported result version {} (expected {})",
            result.version,
            SCHEMA_VERSION
        );
    }

    println!("✓ Valid result JSON");
    println!("  Version:   {}", result.version);
    println!("  Query:     {}", result.query);
    println!("  Trace:     {}", result.trace_dir);
    println!("  Generated: {}", result.generated_at);
    match (&result.response.res, &result.response.err) {
        (_, Some(err)) => println!("  Failed:    rc {} ({})", result.response.rc, err),
        (Some(serde_json::Value::Array(rows)), None) => println!("  Rows:      {}", rows.len()),
        (Some(_), None) => println!("  Status:    ok"),
        (None, None) => println!("  Status:    rc {}", result.response.rc),
    }

    Ok(())
}

/// Display schema information
pub fn display_schema(show_details: bool) {
    println!("CTF Trace Query Result Schema");
    println!("Current Version: {}", SCHEMA_VERSION);
    println!();

    if show_details {
        println!("Response envelope:");
        println!("  rc: number               - 0 on success, -1 on failure");
        println!("  res: any                 - Query answer (success only)");
        println!("  err: string              - \"<Kind>: <message>\" (failure only)");
        println!();
        println!("Query answers:");
        println!("  info        {{metadata, events: [{{name, value-fields}}]}}");
        println!("  event-types [{{event_name, count}}]");
        println!("  stats       {{hdrs, rows: [[name, entry, exit, count, total, mean, min, max]]}}");
        println!("  flamegraph  {{name, value, self_value, children}}, durations in ns");
        println!();
        println!("Saved result files:");
        println!("  version: string          - Schema version (e.g., '1.0.0')");
        println!("  query: string            - Query name");
        println!("  trace_dir: string        - Trace directory queried");
        println!("  generated_at: string     - RFC 3339 timestamp");
        println!("  response: object         - Response envelope");
    } else {
        println!("Use --show for detailed schema information");
    }
}

/// Display version information
pub fn display_version() {
    println!("CTF Trace Query v{}", env!("CARGO_PKG_VERSION"));
    println!("Result Schema: v{}", SCHEMA_VERSION);
    println!();
    println!("Callstack statistics and flamegraphs from CTF 2 trace directories.");
}
