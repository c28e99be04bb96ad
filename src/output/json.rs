//! JSON response envelope and result file writer.
//!
//! Every query answer leaves the engine wrapped in a `Response`:
//! `{"rc": 0, "res": ...}` on success, `{"rc": -1, "err": "..."}` on
//! failure, so an empty success and a failure stay distinguishable.

use crate::utils::config::SCHEMA_VERSION;
use crate::utils::error::{OutputError, QueryError};
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Result code of a successful query
pub const RC_OK: i32 = 0;

/// Result code of a failed query
pub const RC_FAILED: i32 = -1;

/// Query response envelope
///
/// **Public** - wire shape of every query answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response<T> {
    pub rc: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub res: Option<T>,

    /// `"<Kind>: <message>"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl<T> Response<T> {
    pub fn ok(res: T) -> Self {
        Self {
            rc: RC_OK,
            res: Some(res),
            err: None,
        }
    }

    pub fn failure(error: &QueryError) -> Self {
        Self {
            rc: RC_FAILED,
            res: None,
            err: Some(format!("{}: {}", error.kind(), error)),
        }
    }

    pub fn is_success(&self) -> bool {
        self.rc == RC_OK
    }
}

impl<T> From<Result<T, QueryError>> for Response<T> {
    fn from(result: Result<T, QueryError>) -> Self {
        match result {
            Ok(res) => Response::ok(res),
            Err(e) => Response::failure(&e),
        }
    }
}

/// A response saved to disk with its provenance
///
/// **Public** - file format written by `--output`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedResult<T> {
    /// Output schema version
    pub version: String,

    /// Query that produced the response, e.g. `"stats"`
    pub query: String,

    /// Trace directory the query ran against
    pub trace_dir: String,

    /// RFC 3339 timestamp of when the file was written
    pub generated_at: String,

    pub response: Response<T>,
}

impl<T> SavedResult<T> {
    /// Wrap a response, stamping it with the current time
    ///
    /// **Public** - constructor used by the query commands
    pub fn new(query: impl Into<String>, trace_dir: &Path, response: Response<T>) -> Self {
        Self {
            version: SCHEMA_VERSION.to_string(),
            query: query.into(),
            trace_dir: trace_dir.display().to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            response,
        }
    }
}

/// Serialize a response as pretty-printed JSON
///
/// **Public** - used to print responses on stdout
pub fn response_to_string<T: Serialize>(response: &Response<T>) -> Result<String, OutputError> {
    serde_json::to_string_pretty(response).map_err(OutputError::SerializationFailed)
}

/// Write a saved result to a JSON file
///
/// **Public** - main entry point for JSON output
///
/// # Arguments
/// * `result` - Saved result to write
/// * `output_path` - Path to output JSON file
///
/// # Errors
/// * `OutputError::WriteFailed` - I/O error during write
/// * `OutputError::SerializationFailed` - JSON serialization error
/// * `OutputError::InvalidPath` - Path cannot be created or is invalid
pub fn write_result<T: Serialize>(
    result: &SavedResult<T>,
    output_path: impl AsRef<Path>,
) -> Result<(), OutputError> {
    let output_path = output_path.as_ref();

    info!("Writing {} result to: {}", result.query, output_path.display());

    validate_output_path(output_path)?;

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            debug!("Creating parent directories: {}", parent.display());
            std::fs::create_dir_all(parent).map_err(|e| {
                OutputError::InvalidPath(format!(
                    "Cannot create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    let file = File::create(output_path).map_err(OutputError::WriteFailed)?;
    let writer = BufWriter::new(file);

    serde_json::to_writer_pretty(writer, result).map_err(OutputError::SerializationFailed)?;

    info!(
        "Result written successfully ({} bytes)",
        calculate_file_size(output_path)
    );

    Ok(())
}

/// Read a saved result back from a JSON file
///
/// **Public** - useful for comparing runs and for tests
///
/// # Errors
/// * `OutputError::WriteFailed` - File read error (reusing WriteFailed for I/O)
/// * `OutputError::SerializationFailed` - JSON parse error
pub fn read_result<T: DeserializeOwned>(
    input_path: impl AsRef<Path>,
) -> Result<SavedResult<T>, OutputError> {
    let input_path = input_path.as_ref();

    debug!("Reading result from: {}", input_path.display());

    let file = File::open(input_path).map_err(OutputError::WriteFailed)?;
    let result: SavedResult<T> =
        serde_json::from_reader(file).map_err(OutputError::SerializationFailed)?;

    debug!(
        "Result loaded: version {}, query {}, rc {}",
        result.version, result.query, result.response.rc
    );

    Ok(result)
}

/// Validate that output path is writable
///
/// **Private** - internal validation
fn validate_output_path(path: &Path) -> Result<(), OutputError> {
    if path.as_os_str().is_empty() {
        return Err(OutputError::InvalidPath("Path is empty".to_string()));
    }

    if path.is_dir() {
        return Err(OutputError::InvalidPath(format!(
            "Path is a directory: {}",
            path.display()
        )));
    }

    Ok(())
}

fn calculate_file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
