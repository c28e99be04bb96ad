//! Shared utilities: error types and configuration constants.

pub mod config;
pub mod error;

pub use error::{DecodeError, FlamegraphError, LoadError, MetadataError, OutputError, QueryError};
