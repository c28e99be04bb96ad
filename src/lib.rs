//! CTF Trace Query
//!
//! Callstack statistics and flamegraphs from CTF 2 trace directories.
//!
//! A trace directory is loaded once into an immutable [`parser::Trace`];
//! queries then pair entry and exit events per track and label, and
//! aggregate the resulting calls into per-callsite statistics or a
//! flamegraph tree.
//!
//! ## Getting Started
//!
//! ```no_run
//! use ctf_trace_query::query::{CallstackQuery, QueryEngine};
//!
//! let engine = QueryEngine::new();
//! let query = CallstackQuery::new(
//!     "lttng_ust_cyg_profile:func_entry",
//!     "lttng_ust_cyg_profile:func_exit",
//! )
//! .with_track_field("/common-context/vtid")
//! .with_label_field("/payload/addr");
//!
//! let stats = engine.get_callstack_stats("/path/to/trace", &query)?;
//! println!("{} callsites", stats.rows.len());
//! # Ok::<(), ctf_trace_query::utils::error::QueryError>(())
//! ```
//!
//! The `ctfq` binary wraps the same queries; see `ctfq --help`.

pub mod aggregator;
pub mod commands;
pub mod flamegraph;
pub mod output;
pub mod parser;
pub mod query;
pub mod utils;
