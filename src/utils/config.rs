//! Configuration and constants for the library and CLI.

/// Current output schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Only CTF major version understood by the loader
pub const CTF_VERSION: u64 = 2;

/// File name of the metadata stream inside a trace directory
pub const METADATA_FILE_NAME: &str = "metadata";

/// Separates JSON fragments in a metadata stream (ASCII record separator)
pub const RECORD_SEPARATOR: u8 = 0x1e;

// Packetised metadata stream header layout
pub const METADATA_PACKET_MAGIC: u32 = 0x75d1_1d57;
pub const METADATA_PACKET_HEADER_BYTES: usize = 44;
pub const METADATA_PACKET_HEADER_BITS: u32 = 352;

/// Expected value of a field with the `packet-magic-number` role
pub const PACKET_MAGIC_NUMBER: u64 = 0xc1fc_1fc1;

/// A LEB128 integer never needs more than this many bytes for 64 bits
pub const MAX_VAR_INT_BYTES: u32 = 10;

// Match mode names accepted by the query entry points
pub const MATCH_MODE_EXACT: &[&str] = &["cmp", "exact"];
pub const MATCH_MODE_REGEX: &[&str] = &["regex", "re"];

/// Fixed header set of the callstack statistics table
pub const STATS_HEADERS: &[&str] = &["name", "entry", "exit", "count", "total", "mean", "min", "max"];

/// Name of the synthetic flamegraph root frame
pub const ROOT_FRAME_NAME: &str = "root";

/// Diagnostics beyond this many are counted but not kept
pub const MAX_DIAGNOSTICS: usize = 100;

/// Environment variable that can supply the trace directory to the CLI
pub const TRACE_DIR_ENV: &str = "CTFQ_TRACE_DIR";
