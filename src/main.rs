//! CTF Trace Query CLI
//!
//! Loads a CTF 2 trace directory and answers trace info, event type,
//! callstack stats and flamegraph queries as JSON.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;

use ctf_trace_query::commands::{
    display_schema, display_version, execute_query, validate_result_file, QueryArgs, QueryKind,
};
use ctf_trace_query::flamegraph::FlamegraphConfig;
use ctf_trace_query::query::CallstackQuery;
use ctf_trace_query::utils::config::TRACE_DIR_ENV;

/// CTF Trace Query - callstack analysis of CTF 2 traces
#[derive(Parser, Debug)]
#[command(name = "ctfq")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Entry/exit matching options shared by stats and flamegraph
#[derive(Args, Debug)]
struct CallstackOpts {
    /// Entry event name or pattern
    #[arg(short, long)]
    entry: String,

    /// Exit event name or pattern
    #[arg(short = 'x', long)]
    exit: String,

    /// Entry match mode: cmp or regex
    #[arg(long, default_value = "cmp")]
    entry_mode: String,

    /// Exit match mode: cmp or regex
    #[arg(long, default_value = "cmp")]
    exit_mode: String,

    /// Entry field selecting the track, e.g. /common-context/vtid (empty = physical stream)
    #[arg(long, default_value = "")]
    entry_track: String,

    /// Exit field selecting the track
    #[arg(long, default_value = "")]
    exit_track: String,

    /// Entry field correlating with the exit, e.g. /payload/addr (empty = none)
    #[arg(long, default_value = "")]
    entry_label: String,

    /// Exit field correlating with the entry
    #[arg(long, default_value = "")]
    exit_label: String,
}

impl From<CallstackOpts> for CallstackQuery {
    fn from(opts: CallstackOpts) -> Self {
        CallstackQuery {
            entry_pattern: opts.entry,
            entry_match_mode: opts.entry_mode,
            exit_pattern: opts.exit,
            exit_match_mode: opts.exit_mode,
            entry_track_field: opts.entry_track,
            exit_track_field: opts.exit_track,
            entry_label_field: opts.entry_label,
            exit_label_field: opts.exit_label,
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Show trace metadata and the event catalog
    Info {
        /// Trace directory
        #[arg(env = TRACE_DIR_ENV)]
        trace_dir: PathBuf,

        /// Write the response to a JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Count events per event name
    EventTypes {
        /// Trace directory
        #[arg(env = TRACE_DIR_ENV)]
        trace_dir: PathBuf,

        /// Write the response to a JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print a text table instead of JSON
        #[arg(long)]
        table: bool,
    },

    /// Duration statistics per matched callsite
    Stats {
        /// Trace directory
        #[arg(env = TRACE_DIR_ENV)]
        trace_dir: PathBuf,

        #[command(flatten)]
        callstack: CallstackOpts,

        /// Write the response to a JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print a text table instead of JSON
        #[arg(long)]
        table: bool,

        /// Rows shown by --table
        #[arg(long, default_value = "20")]
        max_rows: usize,
    },

    /// Flamegraph of matched calls
    Flamegraph {
        /// Trace directory
        #[arg(env = TRACE_DIR_ENV)]
        trace_dir: PathBuf,

        #[command(flatten)]
        callstack: CallstackOpts,

        /// Write the response to a JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output path for an SVG flamegraph
        #[arg(long)]
        svg: Option<PathBuf>,

        /// Flamegraph title
        #[arg(long)]
        title: Option<String>,

        /// Flamegraph width in pixels
        #[arg(long, default_value = "1200")]
        width: usize,
    },

    /// Validate a saved result JSON file
    Validate {
        /// Path to result JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Display schema information
    Schema {
        /// Show full schema details
        #[arg(long)]
        show: bool,
    },

    /// Display version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the JSON responses.
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    let args = match cli.command {
        Commands::Info { trace_dir, output } => QueryArgs {
            kind: QueryKind::Info,
            trace_dir,
            output_json: output,
            ..Default::default()
        },

        Commands::EventTypes {
            trace_dir,
            output,
            table,
        } => QueryArgs {
            kind: QueryKind::EventTypes,
            trace_dir,
            output_json: output,
            print_table: table,
            ..Default::default()
        },

        Commands::Stats {
            trace_dir,
            callstack,
            output,
            table,
            max_rows,
        } => QueryArgs {
            kind: QueryKind::Stats,
            trace_dir,
            callstack: Some(callstack.into()),
            output_json: output,
            print_table: table,
            max_rows,
            ..Default::default()
        },

        Commands::Flamegraph {
            trace_dir,
            callstack,
            output,
            svg,
            title,
            width,
        } => {
            let mut config = FlamegraphConfig::new().with_width(width);
            if let Some(title_str) = title {
                config = config.with_title(title_str);
            }

            QueryArgs {
                kind: QueryKind::Flamegraph,
                trace_dir,
                callstack: Some(callstack.into()),
                output_json: output,
                output_svg: svg,
                flamegraph_config: Some(config),
                ..Default::default()
            }
        }

        Commands::Validate { file } => return validate_result_file(file),

        Commands::Schema { show } => {
            display_schema(show);
            return Ok(());
        }

        Commands::Version => {
            display_version();
            return Ok(());
        }
    };

    if !execute_query(args)? {
        std::process::exit(1);
    }

    Ok(())
}
