//! CTF 2 trace fixtures written into temporary directories.
//!
//! Every fixture shares one metadata stream: a nanosecond clock, an
//! event header `{id: u8, ts: u64}`, a common context `{vtid: u32}` and
//! three event record classes:
//! - `func_entry` / `func_exit` with payload `{addr: u64}`
//! - `marker` with payload `{msg: string}`

#![allow(dead_code)]

use serde_json::{json, Value as Json};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

pub const ENTRY: &str = "func_entry";
pub const EXIT: &str = "func_exit";
pub const MARKER: &str = "marker";

pub const VTID: &str = "/common-context/vtid";
pub const ADDR: &str = "/payload/addr";

#[derive(Debug, Clone)]
enum FixtureEvent {
    Entry { ts: u64, vtid: u32, addr: u64 },
    Exit { ts: u64, vtid: u32, addr: u64 },
    Marker { ts: u64, vtid: u32, msg: String },
}

/// Builder of a trace directory with one file per stream
#[derive(Debug, Clone, Default)]
pub struct TraceBuilder {
    streams: Vec<Vec<FixtureEvent>>,
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self {
            streams: vec![Vec::new()],
        }
    }

    /// Start a new stream file; later events go into it
    pub fn stream(mut self) -> Self {
        self.streams.push(Vec::new());
        self
    }

    pub fn entry(mut self, ts: u64, vtid: u32, addr: u64) -> Self {
        self.current().push(FixtureEvent::Entry { ts, vtid, addr });
        self
    }

    pub fn exit(mut self, ts: u64, vtid: u32, addr: u64) -> Self {
        self.current().push(FixtureEvent::Exit { ts, vtid, addr });
        self
    }

    pub fn marker(mut self, ts: u64, vtid: u32, msg: &str) -> Self {
        self.current().push(FixtureEvent::Marker {
            ts,
            vtid,
            msg: msg.to_string(),
        });
        self
    }

    fn current(&mut self) -> &mut Vec<FixtureEvent> {
        if self.streams.is_empty() {
            self.streams.push(Vec::new());
        }
        let last = self.streams.len() - 1;
        &mut self.streams[last]
    }

    /// Write metadata and streams into a fresh temporary directory
    pub fn write(&self) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        self.write_into(dir.path());
        dir
    }

    pub fn write_into(&self, dir: &Path) {
        write_metadata(dir);
        for (i, events) in self.streams.iter().enumerate() {
            let data: Vec<u8> = events.iter().flat_map(encode_event).collect();
            fs::write(dir.join(format!("stream_{}", i)), data).unwrap();
        }
    }
}

pub fn write_metadata(dir: &Path) {
    fs::write(dir.join("metadata"), metadata_text()).unwrap();
}

fn u(len: u32, roles: &[&str]) -> Json {
    let mut class = json!({
        "type": "fixed-length-unsigned-integer",
        "length": len,
        "byte-order": "little-endian",
        "alignment": 8
    });
    if !roles.is_empty() {
        class["roles"] = json!(roles);
    }
    class
}

fn member(name: &str, class: Json) -> Json {
    json!({"name": name, "field-class": class})
}

fn structure(members: Vec<Json>) -> Json {
    json!({"type": "structure", "member-classes": members})
}

/// Metadata stream text: record-separated JSON fragments
pub fn metadata_text() -> Vec<u8> {
    let fragments = vec![
        json!({"type": "preamble", "version": 2}),
        json!({"type": "trace-class", "name": "fixture", "environment": {"hostname": "testbox", "tracer_major": 2}}),
        json!({"type": "clock-class", "id": "monotonic", "name": "monotonic", "frequency": 1_000_000_000u64}),
        json!({
            "type": "data-stream-class",
            "default-clock-class-id": "monotonic",
            "event-record-header-field-class": structure(vec![
                member("id", u(8, &["event-record-class-id"])),
                member("ts", u(64, &["default-clock-timestamp"])),
            ]),
            "event-record-common-context-field-class": structure(vec![member("vtid", u(32, &[]))]),
        }),
        json!({
            "type": "event-record-class",
            "id": 0,
            "name": ENTRY,
            "payload-field-class": structure(vec![member("addr", u(64, &[]))]),
        }),
        json!({
            "type": "event-record-class",
            "id": 1,
            "name": EXIT,
            "payload-field-class": structure(vec![member("addr", u(64, &[]))]),
        }),
        json!({
            "type": "event-record-class",
            "id": 2,
            "name": MARKER,
            "payload-field-class": structure(vec![member("msg", json!({"type": "null-terminated-string"}))]),
        }),
    ];

    let mut out = Vec::new();
    for fragment in fragments {
        out.push(0x1e);
        out.extend_from_slice(fragment.to_string().as_bytes());
        out.push(b'\n');
    }
    out
}

fn encode_event(event: &FixtureEvent) -> Vec<u8> {
    let mut out = Vec::new();
    let (id, ts, vtid) = match event {
        FixtureEvent::Entry { ts, vtid, .. } => (0u8, *ts, *vtid),
        FixtureEvent::Exit { ts, vtid, .. } => (1u8, *ts, *vtid),
        FixtureEvent::Marker { ts, vtid, .. } => (2u8, *ts, *vtid),
    };
    out.push(id);
    out.extend_from_slice(&ts.to_le_bytes());
    out.extend_from_slice(&vtid.to_le_bytes());

    match event {
        FixtureEvent::Entry { addr, .. } | FixtureEvent::Exit { addr, .. } => {
            out.extend_from_slice(&addr.to_le_bytes())
        }
        FixtureEvent::Marker { msg, .. } => {
            out.extend_from_slice(msg.as_bytes());
            out.push(0);
        }
    }
    out
}
