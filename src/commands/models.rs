use crate::flamegraph::FlamegraphConfig;
use crate::query::CallstackQuery;
use std::fmt;
use std::path::PathBuf;

/// Which query a command runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Info,
    EventTypes,
    Stats,
    Flamegraph,
}

impl QueryKind {
    pub fn needs_callstack(&self) -> bool {
        matches!(self, QueryKind::Stats | QueryKind::Flamegraph)
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryKind::Info => "info",
            QueryKind::EventTypes => "event-types",
            QueryKind::Stats => "stats",
            QueryKind::Flamegraph => "flamegraph",
        };
        f.write_str(name)
    }
}

/// Arguments for the query commands
///
/// **Public** - used by main.rs to construct from CLI args
#[derive(Debug, Clone)]
pub struct QueryArgs {
    pub kind: QueryKind,

    /// Trace directory to load
    pub trace_dir: PathBuf,

    /// Entry/exit parameters (stats and flamegraph only)
    pub callstack: Option<CallstackQuery>,

    /// Write the response to this file instead of stdout
    pub output_json: Option<PathBuf>,

    /// Output path for an SVG flamegraph (flamegraph only)
    pub output_svg: Option<PathBuf>,

    pub flamegraph_config: Option<FlamegraphConfig>,

    /// Print a text table instead of JSON
    pub print_table: bool,

    /// Rows shown by the text table
    pub max_rows: usize,
}

impl Default for QueryArgs {
    fn default() -> Self {
        Self {
            kind: QueryKind::Info,
            trace_dir: PathBuf::new(),
            callstack: None,
            output_json: None,
            output_svg: None,
            flamegraph_config: None,
            print_table: false,
            max_rows: 20,
        }
    }
}
