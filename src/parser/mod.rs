//! Trace loading and the in-memory event model.
//!
//! This module handles:
//! - Parsing the CTF 2 metadata stream and its field classes
//! - Decoding data stream packets and event records
//! - Loading a trace directory into an immutable `Trace`

pub mod bit_reader;
pub mod decoder;
pub mod field_class;
pub mod loader;
pub mod metadata;
pub mod props;
pub mod schema;

// Re-export main types
pub use loader::load;
pub use metadata::{parse_metadata, Metadata};
pub use schema::{Event, EventTypeInfo, Trace, TraceInfo, TraceMetadata, TrackId, Value, ValueKey};
