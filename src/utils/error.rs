//! Error types for the entire application.
//!
//! We use `thiserror` for library-style errors with custom types,
//! and `anyhow` for application-level error propagation in main.rs and commands.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while parsing the CTF 2 metadata stream
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("JSON deserialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid metadata packet: {0}")]
    InvalidPacket(String),

    #[error("Missing required property \"{key}\" in {context}")]
    MissingProperty { key: String, context: String },

    #[error("Property \"{key}\" in {context} has the wrong type, expected {expected}")]
    WrongType {
        key: String,
        context: String,
        expected: &'static str,
    },

    #[error("Invalid value for \"{key}\" in {context}: {reason}")]
    InvalidValue {
        key: String,
        context: String,
        reason: String,
    },

    #[error("Unknown fragment type: {0}")]
    UnknownFragment(String),

    #[error("Unknown field class type: {0}")]
    UnknownFieldClass(String),

    #[error("Unknown field class alias: {0}")]
    UnknownAlias(String),

    #[error("Duplicate {what}: {id}")]
    Duplicate { what: &'static str, id: String },

    #[error("Unsupported CTF version: {0}")]
    UnsupportedVersion(String),

    #[error("Unsupported extension: {0}")]
    UnsupportedExtension(String),

    #[error("Invalid fragment order: {0}")]
    FragmentOrder(String),
}

/// Errors that can occur while decoding a data stream
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Read of {requested} bits at bit offset {offset} exceeds the limit of {limit} bits")]
    OutOfBounds {
        offset: u64,
        requested: u64,
        limit: u64,
    },

    #[error("Variable-length integer at bit offset {0} exceeds 64 bits")]
    VarIntOverflow(u64),

    #[error("Invalid packet magic number: {0:#x}")]
    BadMagic(u64),

    #[error("Metadata stream UUID mismatch")]
    UuidMismatch,

    #[error("No data stream class with id {0}")]
    UnknownDataStreamClass(u64),

    #[error("No event record class with id {id} in data stream class {dsc_id}")]
    UnknownEventClass { dsc_id: u64, id: u64 },

    #[error("Cannot select a {what} class: {reason}")]
    AmbiguousClass { what: &'static str, reason: String },

    #[error("Invalid packet length: {0}")]
    InvalidPacketLength(String),

    #[error("Field location {0} does not resolve to a decoded field")]
    UnresolvedLocation(String),

    #[error("Field location {location} resolves to a value that is not {expected}")]
    LocationType {
        location: String,
        expected: &'static str,
    },

    #[error("Invalid string data: {0}")]
    InvalidString(String),

    #[error("Event record at bit offset {0} consumed no data")]
    EmptyEventRecord(u64),

    #[error("Array of {length} elements at bit offset {offset} has zero-size elements")]
    EmptyArrayElement { offset: u64, length: u64 },
}

/// Errors that can occur while loading a trace directory
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid metadata in {}: {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: MetadataError,
    },

    #[error("Invalid data stream {} at byte {offset}: {source}", path.display())]
    Decode {
        path: PathBuf,
        offset: u64,
        #[source]
        source: DecodeError,
    },

    #[error("Missing metadata stream in {}", .0.display())]
    MissingMetadata(PathBuf),

    #[error("No events found in {}: {reason}", path.display())]
    Empty { path: PathBuf, reason: String },
}

impl LoadError {
    /// Machine-readable error kind
    ///
    /// **Public** - used for failure envelopes
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::Io { .. } => "IOFailure",
            LoadError::Metadata { .. }
            | LoadError::Decode { .. }
            | LoadError::MissingMetadata(_) => "MalformedInput",
            LoadError::Empty { .. } => "EmptyInput",
        }
    }
}

/// Errors that can occur while answering a query
#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Field \"{field}\" is not present on any {side} event type matching the pattern")]
    UnknownField { field: String, side: &'static str },

    #[error("Invalid {side} pattern: {source}")]
    InvalidPattern {
        side: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl QueryError {
    /// Machine-readable error kind
    ///
    /// **Public** - used for failure envelopes
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::Load(e) => e.kind(),
            QueryError::UnknownField { .. } => "UnknownField",
            QueryError::InvalidPattern { .. } => "InvalidPattern",
            QueryError::InvalidParameter(_) => "InvalidParameter",
        }
    }
}

/// Errors that can occur during flamegraph rendering
#[derive(Error, Debug)]
pub enum FlamegraphError {
    #[error("Flamegraph has no frames")]
    EmptyGraph,
}

/// Errors that can occur during file output
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write file: {0}")]
    WriteFailed(#[from] std::io::Error),

    #[error("Failed to serialize JSON: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("Invalid output path: {0}")]
    InvalidPath(String),
}
