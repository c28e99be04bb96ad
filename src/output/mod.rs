//! Output writers for query results and flamegraphs.
//!
//! This module handles:
//! - The JSON response envelope and saved result files
//! - SVG flamegraph files
//! - Text tables for the terminal

pub mod json;
pub mod svg;
pub mod table;

// Re-export main functions
pub use json::{read_result, response_to_string, write_result, Response, SavedResult};
pub use svg::write_svg;
pub use table::{format_duration, render_event_counts, render_stats_table};
