//! CTF 2 metadata stream parsing.
//!
//! The metadata stream is a JSON text sequence of fragments, optionally
//! wrapped in metadata packets. Fragments are applied in order: the
//! preamble first, then aliases and classes that may only reference
//! classes declared before them.

use super::field_class::FieldClass;
use super::props::{self, Object};
use crate::utils::config::{
    CTF_VERSION, METADATA_PACKET_HEADER_BITS, METADATA_PACKET_HEADER_BYTES, METADATA_PACKET_MAGIC,
    RECORD_SEPARATOR,
};
use crate::utils::error::MetadataError;
use log::debug;
use serde_json::Value as Json;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct Preamble {
    pub uuid: Option<[u8; 16]>,
    pub attributes: Object,
}

#[derive(Debug, Clone, Default)]
pub struct TraceClass {
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub uid: Option<String>,
    pub packet_header: Option<FieldClass>,
    pub environment: Object,
    pub attributes: Object,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockOrigin {
    UnixEpoch,
    Custom {
        namespace: Option<String>,
        name: String,
        uid: String,
    },
}

#[derive(Debug, Clone)]
pub struct ClockClass {
    pub id: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub uid: Option<String>,
    pub frequency: u64,
    pub offset_seconds: i64,
    pub offset_cycles: u64,
    pub origin: Option<ClockOrigin>,
    pub precision: Option<u64>,
    pub accuracy: Option<u64>,
    pub description: Option<String>,
}

impl ClockClass {
    /// Convert a clock value in cycles to nanoseconds from the origin
    ///
    /// Negative results saturate to 0.
    pub fn cycles_to_ns(&self, cycles: u64) -> u64 {
        let freq = i128::from(self.frequency);
        let total = i128::from(cycles) + i128::from(self.offset_cycles);
        let seconds = i128::from(self.offset_seconds) + total / freq;
        let ns = seconds * 1_000_000_000 + (total % freq) * 1_000_000_000 / freq;
        ns.clamp(0, i128::from(u64::MAX)) as u64
    }
}

#[derive(Debug, Clone)]
pub struct EventRecordClass {
    pub id: u64,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub uid: Option<String>,
    pub specific_context: Option<FieldClass>,
    pub payload: Option<FieldClass>,
}

impl EventRecordClass {
    /// Name events of this class are reported under
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("event-{}", self.id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataStreamClass {
    pub id: u64,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub uid: Option<String>,
    /// Index into `Metadata::clock_classes`
    pub default_clock: Option<usize>,
    pub packet_context: Option<FieldClass>,
    pub event_header: Option<FieldClass>,
    pub common_context: Option<FieldClass>,
    pub event_classes: Vec<EventRecordClass>,
}

impl DataStreamClass {
    pub fn event_class(&self, id: u64) -> Option<&EventRecordClass> {
        self.event_classes.iter().find(|erc| erc.id == id)
    }
}

/// Parsed metadata stream
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub preamble: Preamble,
    pub trace_class: Option<TraceClass>,
    pub clock_classes: Vec<ClockClass>,
    pub data_stream_classes: Vec<DataStreamClass>,
}

impl Metadata {
    pub fn data_stream_class(&self, id: u64) -> Option<&DataStreamClass> {
        self.data_stream_classes.iter().find(|dsc| dsc.id == id)
    }

    pub fn packet_header(&self) -> Option<&FieldClass> {
        self.trace_class.as_ref().and_then(|tc| tc.packet_header.as_ref())
    }
}

/// Parse a complete metadata stream
///
/// **Public** - main entry point for metadata parsing
///
/// # Arguments
/// * `raw` - Metadata stream bytes, packetised or plain
///
/// # Errors
/// * `MetadataError::InvalidPacket` - malformed metadata packet
/// * `MetadataError::JsonError` - fragment is not valid JSON
/// * Any structural error of the fragments
pub fn parse_metadata(raw: &[u8]) -> Result<Metadata, MetadataError> {
    let text = if detect_packet_byte_order(raw).is_some() {
        depacketize(raw)?
    } else {
        raw.to_vec()
    };

    let first = text
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(text.len());
    if text[first..].starts_with(b"/* CTF 1") {
        return Err(MetadataError::UnsupportedVersion(
            "CTF 1 TSDL metadata".to_string(),
        ));
    }

    let mut builder = MetadataBuilder::default();
    let mut count = 0usize;
    for chunk in text.split(|&b| b == RECORD_SEPARATOR) {
        if chunk.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let fragment: Json = serde_json::from_slice(chunk)?;
        builder.apply(&fragment)?;
        count += 1;
    }

    debug!("Parsed {} metadata fragments", count);
    builder.finish()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PacketEndian {
    Little,
    Big,
}

fn detect_packet_byte_order(raw: &[u8]) -> Option<PacketEndian> {
    let magic: [u8; 4] = raw.get(..4)?.try_into().ok()?;
    if u32::from_le_bytes(magic) == METADATA_PACKET_MAGIC {
        Some(PacketEndian::Little)
    } else if u32::from_be_bytes(magic) == METADATA_PACKET_MAGIC {
        Some(PacketEndian::Big)
    } else {
        None
    }
}

fn read_u32(raw: &[u8], at: usize, endian: PacketEndian) -> u32 {
    let bytes = [raw[at], raw[at + 1], raw[at + 2], raw[at + 3]];
    match endian {
        PacketEndian::Little => u32::from_le_bytes(bytes),
        PacketEndian::Big => u32::from_be_bytes(bytes),
    }
}

/// Concatenate the contents of every metadata packet
///
/// **Private** - internal helper for parse_metadata
fn depacketize(raw: &[u8]) -> Result<Vec<u8>, MetadataError> {
    let mut out = Vec::with_capacity(raw.len());
    let mut offset = 0usize;
    let mut packets = 0usize;

    while offset < raw.len() {
        let bad = |reason: String| MetadataError::InvalidPacket(format!("packet {}: {}", packets, reason));
        let header = raw
            .get(offset..offset + METADATA_PACKET_HEADER_BYTES)
            .ok_or_else(|| bad("truncated header".to_string()))?;
        let endian = detect_packet_byte_order(header).ok_or_else(|| bad("bad magic number".to_string()))?;

        let content_bits = read_u32(header, 24, endian);
        let total_bits = read_u32(header, 28, endian);
        let (compression, encryption, checksum) = (header[32], header[33], header[34]);
        let (major, minor) = (header[35], header[36]);
        let header_bits = read_u32(header, 40, endian);

        if header_bits != METADATA_PACKET_HEADER_BITS {
            return Err(bad(format!("header size is {} bits", header_bits)));
        }
        if compression != 0 || encryption != 0 || checksum != 0 {
            return Err(bad("compression, encryption and checksums are not supported".to_string()));
        }
        if u64::from(major) != CTF_VERSION || minor != 0 {
            return Err(bad(format!("unsupported version {}.{}", major, minor)));
        }
        if content_bits % 8 != 0 || total_bits % 8 != 0 {
            return Err(bad("sizes are not multiples of 8 bits".to_string()));
        }
        if content_bits < header_bits || total_bits < content_bits {
            return Err(bad(format!(
                "content size {} and total size {} are inconsistent",
                content_bits, total_bits
            )));
        }

        let content_end = offset + content_bits as usize / 8;
        let packet_end = offset + total_bits as usize / 8;
        if packet_end > raw.len() {
            return Err(bad("packet extends past the end of the stream".to_string()));
        }

        out.extend_from_slice(&raw[offset + METADATA_PACKET_HEADER_BYTES..content_end]);
        offset = packet_end;
        packets += 1;
    }

    debug!("Depacketized {} metadata packets ({} bytes)", packets, out.len());
    Ok(out)
}

/// Applies fragments one by one
#[derive(Default)]
struct MetadataBuilder {
    seen_preamble: bool,
    aliases: HashMap<String, FieldClass>,
    metadata: Metadata,
}

impl MetadataBuilder {
    fn apply(&mut self, fragment: &Json) -> Result<(), MetadataError> {
        let obj = props::as_object(fragment, "fragment")?;
        let ty = props::req_str(obj, "type", "fragment")?;

        if !self.seen_preamble && ty != "preamble" {
            return Err(MetadataError::FragmentOrder(format!(
                "first fragment is \"{}\", expected \"preamble\"",
                ty
            )));
        }

        match ty {
            "preamble" => self.apply_preamble(obj),
            "field-class-alias" => self.apply_alias(obj),
            "trace-class" => self.apply_trace_class(obj),
            "clock-class" => self.apply_clock_class(obj),
            "data-stream-class" => self.apply_data_stream_class(obj),
            "event-record-class" => self.apply_event_record_class(obj),
            other => Err(MetadataError::UnknownFragment(other.to_string())),
        }
    }

    fn finish(self) -> Result<Metadata, MetadataError> {
        if !self.seen_preamble {
            return Err(MetadataError::FragmentOrder("metadata stream has no preamble".to_string()));
        }
        Ok(self.metadata)
    }

    fn scope_class(&self, obj: &Object, key: &str, ctx: &str) -> Result<Option<FieldClass>, MetadataError> {
        let Some(raw) = obj.get(key) else {
            return Ok(None);
        };
        let class = FieldClass::parse(raw, &self.aliases, &format!("{} of {}", key, ctx))?;
        if !class.is_struct() {
            return Err(props::invalid(key, ctx, "scope field class must be a structure"));
        }
        Ok(Some(class))
    }

    fn apply_preamble(&mut self, obj: &Object) -> Result<(), MetadataError> {
        let ctx = "preamble";
        if self.seen_preamble {
            return Err(MetadataError::FragmentOrder("duplicate preamble".to_string()));
        }

        let version = props::req_u64(obj, "version", ctx)?;
        if version != CTF_VERSION {
            return Err(MetadataError::UnsupportedVersion(version.to_string()));
        }

        if let Some(ext) = props::opt_object(obj, "extensions", ctx)? {
            if let Some(name) = ext.keys().next() {
                return Err(MetadataError::UnsupportedExtension(name.clone()));
            }
        }

        let uuid = match obj.get("uuid") {
            None => None,
            Some(raw) => Some(parse_uuid(raw, ctx)?),
        };

        self.metadata.preamble = Preamble {
            uuid,
            attributes: props::attributes(obj, ctx)?,
        };
        self.seen_preamble = true;
        Ok(())
    }

    fn apply_alias(&mut self, obj: &Object) -> Result<(), MetadataError> {
        let ctx = "field-class-alias";
        let name = props::req_str(obj, "name", ctx)?;
        if self.aliases.contains_key(name) {
            return Err(MetadataError::Duplicate {
                what: "field class alias",
                id: name.to_string(),
            });
        }
        let class = FieldClass::parse(props::required(obj, "field-class", ctx)?, &self.aliases, ctx)?;
        self.aliases.insert(name.to_string(), class);
        Ok(())
    }

    fn apply_trace_class(&mut self, obj: &Object) -> Result<(), MetadataError> {
        let ctx = "trace-class";
        if self.metadata.trace_class.is_some() {
            return Err(MetadataError::Duplicate {
                what: "trace class",
                id: "trace-class".to_string(),
            });
        }

        let environment = props::opt_object(obj, "environment", ctx)?.cloned().unwrap_or_default();
        for (key, value) in &environment {
            if !(value.is_i64() || value.is_u64() || value.is_string()) {
                return Err(props::invalid(
                    "environment",
                    ctx,
                    format!("entry \"{}\" is neither an integer nor a string", key),
                ));
            }
        }

        self.metadata.trace_class = Some(TraceClass {
            namespace: props::opt_str(obj, "namespace", ctx)?.map(str::to_string),
            name: props::opt_str(obj, "name", ctx)?.map(str::to_string),
            uid: props::opt_str(obj, "uid", ctx)?.map(str::to_string),
            packet_header: self.scope_class(obj, "packet-header-field-class", ctx)?,
            environment,
            attributes: props::attributes(obj, ctx)?,
        });
        Ok(())
    }

    fn apply_clock_class(&mut self, obj: &Object) -> Result<(), MetadataError> {
        let ctx = "clock-class";
        let id = props::req_str(obj, "id", ctx)?;
        if self.metadata.clock_classes.iter().any(|c| c.id == id) {
            return Err(MetadataError::Duplicate {
                what: "clock class",
                id: id.to_string(),
            });
        }

        let frequency = props::req_u64(obj, "frequency", ctx)?;
        if frequency == 0 {
            return Err(props::invalid("frequency", ctx, "frequency must be greater than 0"));
        }

        let (offset_seconds, offset_cycles) = match props::opt_object(obj, "offset-from-origin", ctx)? {
            None => (0, 0),
            Some(off) => {
                let seconds = props::opt_i64(off, "seconds", ctx)?.unwrap_or(0);
                let cycles = props::opt_u64(off, "cycles", ctx)?.unwrap_or(0);
                if cycles >= frequency {
                    return Err(props::invalid(
                        "offset-from-origin",
                        ctx,
                        format!("cycles {} must be less than the frequency {}", cycles, frequency),
                    ));
                }
                (seconds, cycles)
            }
        };

        let origin = match obj.get("origin") {
            None => None,
            Some(Json::String(s)) if s == "unix-epoch" => Some(ClockOrigin::UnixEpoch),
            Some(Json::Object(o)) => Some(ClockOrigin::Custom {
                namespace: props::opt_str(o, "namespace", ctx)?.map(str::to_string),
                name: props::req_str(o, "name", ctx)?.to_string(),
                uid: props::req_str(o, "uid", ctx)?.to_string(),
            }),
            Some(_) => {
                return Err(props::invalid(
                    "origin",
                    ctx,
                    "expected \"unix-epoch\" or an origin object",
                ))
            }
        };

        self.metadata.clock_classes.push(ClockClass {
            id: id.to_string(),
            namespace: props::opt_str(obj, "namespace", ctx)?.map(str::to_string),
            name: props::opt_str(obj, "name", ctx)?.map(str::to_string),
            uid: props::opt_str(obj, "uid", ctx)?.map(str::to_string),
            frequency,
            offset_seconds,
            offset_cycles,
            origin,
            precision: props::opt_u64(obj, "precision", ctx)?,
            accuracy: props::opt_u64(obj, "accuracy", ctx)?,
            description: props::opt_str(obj, "description", ctx)?.map(str::to_string),
        });
        Ok(())
    }

    fn apply_data_stream_class(&mut self, obj: &Object) -> Result<(), MetadataError> {
        let ctx = "data-stream-class";
        let id = props::opt_u64(obj, "id", ctx)?.unwrap_or(0);
        if self.metadata.data_stream_class(id).is_some() {
            return Err(MetadataError::Duplicate {
                what: "data stream class",
                id: id.to_string(),
            });
        }

        let default_clock = match props::opt_str(obj, "default-clock-class-id", ctx)? {
            None => None,
            Some(clock_id) => Some(
                self.metadata
                    .clock_classes
                    .iter()
                    .position(|c| c.id == clock_id)
                    .ok_or_else(|| {
                        props::invalid(
                            "default-clock-class-id",
                            ctx,
                            format!("no clock class with id \"{}\"", clock_id),
                        )
                    })?,
            ),
        };

        let dsc = DataStreamClass {
            id,
            namespace: props::opt_str(obj, "namespace", ctx)?.map(str::to_string),
            name: props::opt_str(obj, "name", ctx)?.map(str::to_string),
            uid: props::opt_str(obj, "uid", ctx)?.map(str::to_string),
            default_clock,
            packet_context: self.scope_class(obj, "packet-context-field-class", ctx)?,
            event_header: self.scope_class(obj, "event-record-header-field-class", ctx)?,
            common_context: self.scope_class(obj, "event-record-common-context-field-class", ctx)?,
            event_classes: Vec::new(),
        };
        self.metadata.data_stream_classes.push(dsc);
        Ok(())
    }

    fn apply_event_record_class(&mut self, obj: &Object) -> Result<(), MetadataError> {
        let ctx = "event-record-class";
        let id = props::opt_u64(obj, "id", ctx)?.unwrap_or(0);
        let dsc_id = props::opt_u64(obj, "data-stream-class-id", ctx)?.unwrap_or(0);

        let erc = EventRecordClass {
            id,
            namespace: props::opt_str(obj, "namespace", ctx)?.map(str::to_string),
            name: props::opt_str(obj, "name", ctx)?.map(str::to_string),
            uid: props::opt_str(obj, "uid", ctx)?.map(str::to_string),
            specific_context: self.scope_class(obj, "specific-context-field-class", ctx)?,
            payload: self.scope_class(obj, "payload-field-class", ctx)?,
        };

        let dsc = self
            .metadata
            .data_stream_classes
            .iter_mut()
            .find(|dsc| dsc.id == dsc_id)
            .ok_or_else(|| {
                props::invalid(
                    "data-stream-class-id",
                    ctx,
                    format!("no data stream class with id {}", dsc_id),
                )
            })?;
        if dsc.event_class(id).is_some() {
            return Err(MetadataError::Duplicate {
                what: "event record class",
                id: format!("{} in data stream class {}", id, dsc_id),
            });
        }
        dsc.event_classes.push(erc);
        Ok(())
    }
}

fn parse_uuid(raw: &Json, ctx: &str) -> Result<[u8; 16], MetadataError> {
    let items = raw
        .as_array()
        .filter(|a| a.len() == 16)
        .ok_or_else(|| props::invalid("uuid", ctx, "expected an array of 16 integers"))?;
    let mut uuid = [0u8; 16];
    for (slot, item) in uuid.iter_mut().zip(items) {
        *slot = item
            .as_u64()
            .and_then(|b| u8::try_from(b).ok())
            .ok_or_else(|| props::invalid("uuid", ctx, "bytes must be integers in 0..=255"))?;
    }
    Ok(uuid)
}

/// Canonical textual form of a UUID
pub fn format_uuid(uuid: &[u8; 16]) -> String {
    let hex: String = uuid.iter().map(|b| format!("{:02x}", b)).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
