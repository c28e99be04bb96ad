//! Trace directory loader.
//!
//! Reads the metadata stream and every data stream of a CTF 2 trace
//! directory into an immutable `Trace`. Loading is all-or-nothing: any
//! failure discards everything decoded so far.

use super::decoder::decode_stream;
use super::metadata::{format_uuid, parse_metadata, ClockOrigin, Metadata};
use super::schema::{ClockInfo, Event, Trace, TraceMetadata, TrackId, TrackInfo};
use crate::utils::config::{CTF_VERSION, METADATA_FILE_NAME};
use crate::utils::error::LoadError;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Load a trace directory
///
/// **Public** - main entry point for trace loading
///
/// # Arguments
/// * `dir` - Directory holding a `metadata` file and data stream files
///
/// # Returns
/// The loaded trace, events ordered by timestamp
///
/// # Errors
/// * `LoadError::Io` - directory or file unreadable
/// * `LoadError::MissingMetadata` / `Metadata` / `Decode` - malformed input
/// * `LoadError::Empty` - no data streams or no event records
pub fn load(dir: impl AsRef<Path>) -> Result<Trace, LoadError> {
    let dir = dir.as_ref();
    let start = Instant::now();
    info!("Loading trace from: {}", dir.display());

    let io = |path: &Path| {
        let path = path.to_path_buf();
        move |source| LoadError::Io { path, source }
    };

    let metadata_path = dir.join(METADATA_FILE_NAME);
    let stream_paths = list_data_streams(dir)?;
    if !metadata_path.is_file() {
        return Err(LoadError::MissingMetadata(dir.to_path_buf()));
    }

    let raw_metadata = fs::read(&metadata_path).map_err(io(metadata_path.as_path()))?;
    let metadata = parse_metadata(&raw_metadata).map_err(|source| LoadError::Metadata {
        path: metadata_path.clone(),
        source,
    })?;
    debug!(
        "Metadata: {} clock classes, {} data stream classes",
        metadata.clock_classes.len(),
        metadata.data_stream_classes.len()
    );

    if stream_paths.is_empty() {
        return Err(LoadError::Empty {
            path: dir.to_path_buf(),
            reason: "no data stream files".to_string(),
        });
    }

    let mut trace_meta = trace_metadata(&metadata);
    let mut events = Vec::new();
    for (index, path) in stream_paths.iter().enumerate() {
        let track = TrackId(index as u32);
        let data = fs::read(path).map_err(io(path.as_path()))?;
        let stream = decode_stream(&metadata, &data).map_err(|e| LoadError::Decode {
            path: path.clone(),
            offset: e.offset,
            source: e.source,
        })?;

        debug!(
            "{}: {} packets, {} events ({})",
            path.display(),
            stream.packet_count,
            stream.events.len(),
            track
        );

        trace_meta.streams.push(TrackInfo {
            track,
            file: file_name(path),
            data_stream_class_id: stream.data_stream_class_id,
            data_stream_id: stream.data_stream_id,
            packet_count: stream.packet_count,
            event_count: stream.events.len() as u64,
        });
        events.extend(stream.events.into_iter().map(|raw| Event {
            name: raw.name,
            track,
            timestamp: raw.timestamp,
            fields: raw.fields,
        }));
    }

    if events.is_empty() {
        return Err(LoadError::Empty {
            path: dir.to_path_buf(),
            reason: "data streams contain no event records".to_string(),
        });
    }

    let trace = Trace::new(trace_meta, events);
    info!(
        "Loaded {} events of {} types from {} streams in {:.2}s",
        trace.events().len(),
        trace.list_event_names().len(),
        stream_paths.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(trace)
}

/// Data stream files of a trace directory, sorted by name
///
/// **Private** - internal helper for load
///
/// Hidden files, empty files, directories and the metadata stream
/// itself are skipped.
fn list_data_streams(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    let io = |source| LoadError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(io)? {
        let entry = entry.map_err(io)?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == METADATA_FILE_NAME || name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        let meta = fs::metadata(&path).map_err(|source| LoadError::Io {
            path: path.clone(),
            source,
        })?;
        if meta.is_file() && meta.len() > 0 {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Trace metadata record derived from the parsed metadata stream
fn trace_metadata(metadata: &Metadata) -> TraceMetadata {
    let mut meta = TraceMetadata::empty(CTF_VERSION);
    meta.uuid = metadata.preamble.uuid.as_ref().map(format_uuid);
    meta.attributes = metadata.preamble.attributes.clone();

    if let Some(tc) = &metadata.trace_class {
        meta.namespace = tc.namespace.clone();
        meta.name = tc.name.clone();
        meta.uid = tc.uid.clone();
        meta.environment = tc.environment.clone();
        for (key, value) in &tc.attributes {
            meta.attributes.insert(key.clone(), value.clone());
        }
    }

    meta.clocks = metadata
        .clock_classes
        .iter()
        .map(|c| ClockInfo {
            id: c.id.clone(),
            namespace: c.namespace.clone(),
            name: c.name.clone(),
            uid: c.uid.clone(),
            frequency: c.frequency,
            offset_seconds: c.offset_seconds,
            offset_cycles: c.offset_cycles,
            origin: c.origin.as_ref().map(|o| match o {
                ClockOrigin::UnixEpoch => "unix-epoch".to_string(),
                ClockOrigin::Custom { namespace, name, uid } => match namespace {
                    Some(ns) => format!("{}/{}/{}", ns, name, uid),
                    None => format!("{}/{}", name, uid),
                },
            }),
            precision: c.precision,
            accuracy: c.accuracy,
            description: c.description.clone(),
        })
        .collect();

    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_directory_is_io_failure() {
        let err = load("/definitely/not/a/trace/dir").unwrap_err();
        assert_eq!(err.kind(), "IOFailure");
    }

    #[test]
    fn test_directory_without_metadata() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stream0"), [1u8, 2, 3]).unwrap();
        let err = load(dir.path()).unwrap_err();
        assert!(matches!(err, LoadError::MissingMetadata(_)));
        assert_eq!(err.kind(), "MalformedInput");
    }

    #[test]
    fn test_data_stream_listing_skips_hidden_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(METADATA_FILE_NAME), b"{}").unwrap();
        fs::write(dir.path().join("b_stream"), [1u8]).unwrap();
        fs::write(dir.path().join("a_stream"), [1u8]).unwrap();
        fs::write(dir.path().join(".hidden"), [1u8]).unwrap();
        fs::write(dir.path().join("empty"), b"").unwrap();
        fs::create_dir(dir.path().join("index")).unwrap();

        let names: Vec<String> = list_data_streams(dir.path())
            .unwrap()
            .iter()
            .map(|p| file_name(p))
            .collect();
        assert_eq!(names, vec!["a_stream", "b_stream"]);
    }
}
