//! CLI command implementations.
//!
//! Commands orchestrate the library components to perform user tasks.

pub mod models;
pub mod query;
pub mod utils;

// Re-export main command functions
pub use models::{QueryArgs, QueryKind};
pub use query::{execute_query, validate_args};
pub use utils::{display_schema, display_version, validate_result_file};
