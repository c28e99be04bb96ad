//! CTF 2 data stream decoding.
//!
//! A data stream is a sequence of packets. Each packet holds an optional
//! header and context followed by event records, each made of a header,
//! a common context, a specific context and a payload. Field values with
//! roles drive class selection, packet sizes and the stream clock.

use super::bit_reader::BitReader;
use super::field_class::{Encoding, FieldClass, FieldLocation, FixedLayout, BitOrder, ByteOrder, Role, Scope};
use super::metadata::{DataStreamClass, Metadata};
use super::schema::Value;
use crate::utils::config::{MAX_VAR_INT_BYTES, PACKET_MAGIC_NUMBER};
use crate::utils::error::DecodeError;
use log::debug;
use std::collections::BTreeMap;

/// A decoded field, before flattening into event fields
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    UInt(u64),
    SInt(i64),
    Bool(bool),
    Float(f64),
    Str(String),
    Blob(Vec<u8>),
    Struct(Vec<(String, Decoded)>),
    Array(Vec<Decoded>),
    Optional(Option<Box<Decoded>>),
    Variant(Box<Decoded>),
}

impl Decoded {
    /// See through enabled optionals and selected variant options
    fn unwrap_transparent(&self) -> Option<&Decoded> {
        match self {
            Decoded::Optional(Some(inner)) | Decoded::Variant(inner) => inner.unwrap_transparent(),
            Decoded::Optional(None) => None,
            other => Some(other),
        }
    }

    fn member(&self, name: &str) -> Option<&Decoded> {
        match self.unwrap_transparent()? {
            Decoded::Struct(members) => members.iter().rev().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

/// An event record decoded from a stream, ready for the trace model
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub name: String,
    pub timestamp: u64,
    pub fields: BTreeMap<String, Value>,
}

/// Everything decoded from one data stream
#[derive(Debug, Clone, Default)]
pub struct DecodedStream {
    pub events: Vec<RawEvent>,
    pub packet_count: u64,
    pub data_stream_class_id: u64,
    pub data_stream_id: Option<u64>,
}

/// A decode failure with the byte offset it happened at
#[derive(Debug)]
pub struct PositionedError {
    pub offset: u64,
    pub source: DecodeError,
}

/// Values of fields with roles, collected per packet and per event
#[derive(Debug, Default, Clone)]
struct RoleValues {
    data_stream_class_id: Option<u64>,
    data_stream_id: Option<u64>,
    content_length: Option<u64>,
    total_length: Option<u64>,
    event_record_class_id: Option<u64>,
    uuid: Option<Vec<u8>>,
}

/// Link between a location lookup and an in-progress structure
#[derive(Debug)]
struct Frame {
    /// Member name of this structure in its parent, for absolute lookups
    name: Option<String>,
    members: Vec<(String, Decoded)>,
}

/// Scalar a field location resolved to
enum Selector {
    Int(i128),
    Bool(bool),
}

/// Decode every packet of a data stream
///
/// **Public** - main entry point for data stream decoding
///
/// # Arguments
/// * `metadata` - Parsed metadata of the trace
/// * `data` - Complete data stream file contents
///
/// # Returns
/// Decoded events in stream order plus stream-level identifiers
///
/// # Errors
/// A `PositionedError` carrying the byte offset of the packet or event
/// record that could not be decoded
pub fn decode_stream(metadata: &Metadata, data: &[u8]) -> Result<DecodedStream, PositionedError> {
    let mut decoder = StreamDecoder::new(metadata, data);
    decoder.run()?;
    debug!(
        "Decoded {} packets, {} events",
        decoder.out.packet_count,
        decoder.out.events.len()
    );
    Ok(decoder.out)
}

struct StreamDecoder<'m, 'd> {
    metadata: &'m Metadata,
    reader: BitReader<'d>,
    scopes: [Option<Decoded>; 6],
    frames: Vec<Frame>,
    current: Scope,
    roles: RoleValues,
    clock: u64,
    /// Start of the packet or event record being decoded, in bits
    record_start: u64,
    out: DecodedStream,
}

impl<'m, 'd> StreamDecoder<'m, 'd> {
    fn new(metadata: &'m Metadata, data: &'d [u8]) -> Self {
        Self {
            metadata,
            reader: BitReader::new(data),
            scopes: Default::default(),
            frames: Vec::new(),
            current: Scope::PacketHeader,
            roles: RoleValues::default(),
            clock: 0,
            record_start: 0,
            out: DecodedStream::default(),
        }
    }

    fn positioned(&self, source: DecodeError) -> PositionedError {
        PositionedError {
            offset: self.record_start / 8,
            source,
        }
    }

    fn run(&mut self) -> Result<(), PositionedError> {
        let size = self.reader.size_bits();
        let mut packet_start = 0u64;
        while packet_start < size {
            self.record_start = packet_start;
            let packet_end = self
                .decode_packet(packet_start)
                .map_err(|e| self.positioned(e))?;
            packet_start = packet_end;
            self.out.packet_count += 1;
        }
        Ok(())
    }

    /// Decode one packet starting at `start`, returning where the next begins
    fn decode_packet(&mut self, start: u64) -> Result<u64, DecodeError> {
        let size = self.reader.size_bits();
        self.reader.seek(start);
        self.reader.set_limit(size);
        self.scopes = Default::default();
        self.roles = RoleValues::default();

        let metadata = self.metadata;
        if let Some(header) = metadata.packet_header() {
            self.decode_scope(Scope::PacketHeader, header)?;
        }
        self.check_uuid()?;

        let dsc = self.select_data_stream_class()?;
        if self.out.packet_count == 0 {
            self.out.data_stream_class_id = dsc.id;
            self.out.data_stream_id = self.roles.data_stream_id;
        }

        if let Some(ctx) = &dsc.packet_context {
            self.decode_scope(Scope::PacketContext, ctx)?;
        }

        let (content, total) = match (self.roles.content_length, self.roles.total_length) {
            (Some(c), Some(t)) => (c, t),
            (Some(c), None) => (c, c),
            (None, Some(t)) => (t, t),
            (None, None) => (size - start, size - start),
        };
        if total == 0 || content > total {
            return Err(DecodeError::InvalidPacketLength(format!(
                "content length {} bits, total length {} bits",
                content, total
            )));
        }
        if start + total > size {
            return Err(DecodeError::InvalidPacketLength(format!(
                "packet of {} bits at bit {} exceeds the stream size of {} bits",
                total, start, size
            )));
        }
        if self.reader.position() > start + content {
            return Err(DecodeError::InvalidPacketLength(
                "packet header and context exceed the content length".to_string(),
            ));
        }

        let packet_fields = self.packet_fields();
        let content_end = start + content;
        self.reader.set_limit(content_end);

        while self.reader.position() < content_end {
            let event_start = self.reader.position();
            self.record_start = event_start;
            let event = self.decode_event(dsc, &packet_fields)?;
            if self.reader.position() == event_start {
                return Err(DecodeError::EmptyEventRecord(event_start));
            }
            self.out.events.push(event);
        }

        Ok(start + total)
    }

    fn decode_event(
        &mut self,
        dsc: &'m DataStreamClass,
        packet_fields: &BTreeMap<String, Value>,
    ) -> Result<RawEvent, DecodeError> {
        for scope in [Scope::EventHeader, Scope::CommonContext, Scope::SpecificContext, Scope::Payload] {
            self.scopes[scope.index()] = None;
        }
        self.roles.event_record_class_id = None;

        if let Some(header) = &dsc.event_header {
            self.decode_scope(Scope::EventHeader, header)?;
        }

        let erc = match self.roles.event_record_class_id {
            Some(id) => dsc
                .event_class(id)
                .ok_or(DecodeError::UnknownEventClass { dsc_id: dsc.id, id })?,
            None => match dsc.event_classes.as_slice() {
                [only] => only,
                [] => {
                    return Err(DecodeError::AmbiguousClass {
                        what: "event record",
                        reason: format!("data stream class {} has no event record classes", dsc.id),
                    })
                }
                _ => {
                    return Err(DecodeError::AmbiguousClass {
                        what: "event record",
                        reason: "no event-record-class-id in the event header".to_string(),
                    })
                }
            },
        };

        if let Some(ctx) = &dsc.common_context {
            self.decode_scope(Scope::CommonContext, ctx)?;
        }
        if let Some(ctx) = &erc.specific_context {
            self.decode_scope(Scope::SpecificContext, ctx)?;
        }
        if let Some(payload) = &erc.payload {
            self.decode_scope(Scope::Payload, payload)?;
        }

        let timestamp = match dsc.default_clock {
            Some(idx) => self.metadata.clock_classes[idx].cycles_to_ns(self.clock),
            None => 0,
        };

        let mut fields = packet_fields.clone();
        for scope in [Scope::EventHeader, Scope::CommonContext, Scope::SpecificContext, Scope::Payload] {
            if let Some(value) = &self.scopes[scope.index()] {
                flatten(scope.key_prefix().to_string(), value, &mut fields);
            }
        }

        Ok(RawEvent {
            name: erc.display_name(),
            timestamp,
            fields,
        })
    }

    fn packet_fields(&self) -> BTreeMap<String, Value> {
        let mut fields = BTreeMap::new();
        for scope in [Scope::PacketHeader, Scope::PacketContext] {
            if let Some(value) = &self.scopes[scope.index()] {
                flatten(scope.key_prefix().to_string(), value, &mut fields);
            }
        }
        fields
    }

    fn select_data_stream_class(&self) -> Result<&'m DataStreamClass, DecodeError> {
        let metadata = self.metadata;
        match self.roles.data_stream_class_id {
            Some(id) => metadata
                .data_stream_class(id)
                .ok_or(DecodeError::UnknownDataStreamClass(id)),
            None => match metadata.data_stream_classes.as_slice() {
                [only] => Ok(only),
                [] => Err(DecodeError::AmbiguousClass {
                    what: "data stream",
                    reason: "metadata declares no data stream classes".to_string(),
                }),
                _ => Err(DecodeError::AmbiguousClass {
                    what: "data stream",
                    reason: "no data-stream-class-id in the packet header".to_string(),
                }),
            },
        }
    }

    fn check_uuid(&self) -> Result<(), DecodeError> {
        if let (Some(expected), Some(found)) = (&self.metadata.preamble.uuid, &self.roles.uuid) {
            if expected.as_slice() != found.as_slice() {
                return Err(DecodeError::UuidMismatch);
            }
        }
        Ok(())
    }

    fn decode_scope(&mut self, scope: Scope, class: &FieldClass) -> Result<(), DecodeError> {
        self.current = scope;
        self.frames.clear();
        let value = self.decode_field(class, None)?;
        self.frames.clear();
        self.scopes[scope.index()] = Some(value);
        Ok(())
    }

    fn decode_field(&mut self, class: &FieldClass, name: Option<&str>) -> Result<Decoded, DecodeError> {
        self.reader.align(class.alignment())?;

        let value = match class {
            FieldClass::BitArray(layout) => Decoded::UInt(self.read_fixed(layout)?),
            FieldClass::UnsignedInt { layout, roles } => {
                let v = self.read_fixed(layout)?;
                self.apply_roles(roles, v, layout.length)?;
                Decoded::UInt(v)
            }
            FieldClass::SignedInt(layout) => Decoded::SInt(sign_extend(self.read_fixed(layout)?, layout.length)),
            FieldClass::Bool(layout) => Decoded::Bool(self.read_fixed(layout)? != 0),
            FieldClass::Float(layout) => {
                let bits = self.read_fixed(layout)?;
                if layout.length == 32 {
                    Decoded::Float(f64::from(f32::from_bits(bits as u32)))
                } else {
                    Decoded::Float(f64::from_bits(bits))
                }
            }
            FieldClass::VarUnsignedInt { roles } => {
                let (v, _) = self.read_leb128()?;
                self.apply_roles(roles, v, 64)?;
                Decoded::UInt(v)
            }
            FieldClass::VarSignedInt => {
                let (v, bits) = self.read_leb128()?;
                Decoded::SInt(if bits >= 64 { v as i64 } else { sign_extend(v, bits) })
            }
            FieldClass::NullTerminatedString { encoding } => Decoded::Str(self.read_nt_string(*encoding)?),
            FieldClass::StaticString { length, encoding } => {
                let bytes = self.reader.read_bytes(*length)?;
                Decoded::Str(decode_string(bytes, *encoding)?)
            }
            FieldClass::DynamicString { length, encoding } => {
                let len = self.lookup_length(length)?;
                let bytes = self.reader.read_bytes(len)?;
                Decoded::Str(decode_string(bytes, *encoding)?)
            }
            FieldClass::StaticBlob { length, roles } => {
                let bytes = self.reader.read_bytes(*length)?.to_vec();
                if roles.contains(&Role::MetadataStreamUuid) {
                    self.roles.uuid = Some(bytes.clone());
                }
                Decoded::Blob(bytes)
            }
            FieldClass::DynamicBlob { length } => {
                let len = self.lookup_length(length)?;
                Decoded::Blob(self.reader.read_bytes(len)?.to_vec())
            }
            FieldClass::Struct { members, .. } => {
                self.frames.push(Frame {
                    name: name.map(str::to_string),
                    members: Vec::with_capacity(members.len()),
                });
                for member in members {
                    let v = self.decode_field(&member.class, Some(member.name.as_str()))?;
                    if let Some(frame) = self.frames.last_mut() {
                        frame.members.push((member.name.clone(), v));
                    }
                }
                let frame = self.frames.pop();
                Decoded::Struct(frame.map(|f| f.members).unwrap_or_default())
            }
            FieldClass::StaticArray { element, length, .. } => {
                self.decode_elements(element, *length, name)?
            }
            FieldClass::DynamicArray { element, length, .. } => {
                let len = self.lookup_length(length)?;
                self.decode_elements(element, len, name)?
            }
            FieldClass::Optional { class, selector, ranges } => {
                let enabled = match (self.lookup(selector)?, ranges) {
                    (Selector::Bool(b), _) => b,
                    (Selector::Int(v), Some(ranges)) => ranges.contains(v),
                    (Selector::Int(_), None) => {
                        return Err(DecodeError::LocationType {
                            location: selector.to_string(),
                            expected: "a boolean (no selector ranges given)",
                        })
                    }
                };
                if enabled {
                    Decoded::Optional(Some(Box::new(self.decode_field(class, name)?)))
                } else {
                    Decoded::Optional(None)
                }
            }
            FieldClass::Variant { selector, options } => {
                let tag = match self.lookup(selector)? {
                    Selector::Int(v) => v,
                    Selector::Bool(_) => {
                        return Err(DecodeError::LocationType {
                            location: selector.to_string(),
                            expected: "an integer",
                        })
                    }
                };
                let option = options.iter().find(|o| o.ranges.contains(tag)).ok_or_else(|| {
                    DecodeError::LocationType {
                        location: selector.to_string(),
                        expected: "a value selecting a variant option",
                    }
                })?;
                Decoded::Variant(Box::new(self.decode_field(&option.class, name)?))
            }
        };
        Ok(value)
    }

    fn read_fixed(&mut self, layout: &FixedLayout) -> Result<u64, DecodeError> {
        let raw = self.reader.read_bits(layout.length, layout.byte_order)?;
        let natural = match layout.byte_order {
            ByteOrder::Little => BitOrder::FirstToLast,
            ByteOrder::Big => BitOrder::LastToFirst,
        };
        if layout.bit_order == natural {
            Ok(raw)
        } else {
            Ok(raw.reverse_bits() >> (64 - layout.length))
        }
    }

    /// Returns the value and the number of significant bits read
    fn read_leb128(&mut self) -> Result<(u64, u32), DecodeError> {
        let start = self.reader.position();
        let mut value = 0u64;
        let mut shift = 0u32;
        for _ in 0..MAX_VAR_INT_BYTES {
            let byte = self.reader.read_u8()?;
            let group = u64::from(byte & 0x7f);
            if shift >= 64 || (shift == 63 && group > 1) {
                return Err(DecodeError::VarIntOverflow(start));
            }
            value |= group << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                return Ok((value, shift.min(64)));
            }
        }
        Err(DecodeError::VarIntOverflow(start))
    }

    fn read_nt_string(&mut self, encoding: Encoding) -> Result<String, DecodeError> {
        self.reader.align(8)?;
        let unit = encoding.unit_size() as u64;
        let start = self.reader.position();
        let mut len = 0u64;
        loop {
            let chunk = self.reader.read_bytes(unit)?;
            if chunk.iter().all(|&b| b == 0) {
                break;
            }
            len += unit;
        }
        let end = self.reader.position();
        self.reader.seek(start);
        let bytes = self.reader.read_bytes(len)?;
        self.reader.seek(end);
        decode_string(bytes, encoding)
    }

    fn apply_roles(&mut self, roles: &[Role], value: u64, length: u32) -> Result<(), DecodeError> {
        for role in roles {
            match role {
                Role::DataStreamClassId => self.roles.data_stream_class_id = Some(value),
                Role::DataStreamId => self.roles.data_stream_id = Some(value),
                Role::PacketMagicNumber => {
                    if value != PACKET_MAGIC_NUMBER {
                        return Err(DecodeError::BadMagic(value));
                    }
                }
                Role::DefaultClockTimestamp => self.update_clock(value, length),
                Role::PacketContentLength => self.roles.content_length = Some(value),
                Role::PacketTotalLength => self.roles.total_length = Some(value),
                Role::EventRecordClassId => self.roles.event_record_class_id = Some(value),
                Role::MetadataStreamUuid
                | Role::DiscardedEventRecordCounterSnapshot
                | Role::PacketEndDefaultClockTimestamp
                | Role::PacketSequenceNumber => {}
            }
        }
        Ok(())
    }

    /// Extend a possibly truncated timestamp onto the running clock
    fn update_clock(&mut self, value: u64, length: u32) {
        if length >= 64 {
            self.clock = value;
            return;
        }
        let mask = (1u64 << length) - 1;
        let high = self.clock & !mask;
        let current = self.clock & mask;
        self.clock = if value >= current {
            high.wrapping_add(value)
        } else {
            high.wrapping_add(mask).wrapping_add(1).wrapping_add(value)
        };
    }

    /// Decode `length` array elements
    ///
    /// Elements that consume no bits would never exhaust the stream, so
    /// an array of more than one of them is rejected up front.
    fn decode_elements(
        &mut self,
        element: &FieldClass,
        length: u64,
        name: Option<&str>,
    ) -> Result<Decoded, DecodeError> {
        let mut items = Vec::new();
        for _ in 0..length {
            let start = self.reader.position();
            items.push(self.decode_field(element, name)?);
            if length > 1 && self.reader.position() == start {
                return Err(DecodeError::EmptyArrayElement {
                    offset: start,
                    length,
                });
            }
        }
        Ok(Decoded::Array(items))
    }

    fn lookup_length(&self, location: &FieldLocation) -> Result<u64, DecodeError> {
        match self.lookup(location)? {
            Selector::Int(v) if v >= 0 => u64::try_from(v).map_err(|_| DecodeError::LocationType {
                location: location.to_string(),
                expected: "a length",
            }),
            _ => Err(DecodeError::LocationType {
                location: location.to_string(),
                expected: "an unsigned integer length",
            }),
        }
    }

    /// Resolve a field location against decoded scopes and open structures
    fn lookup(&self, location: &FieldLocation) -> Result<Selector, DecodeError> {
        let unresolved = || DecodeError::UnresolvedLocation(location.to_string());

        let target = match location.origin {
            Some(scope) if scope != self.current => {
                let mut value = self.scopes[scope.index()].as_ref().ok_or_else(unresolved)?;
                for elem in &location.path {
                    let name = elem.as_deref().ok_or_else(unresolved)?;
                    value = value.member(name).ok_or_else(unresolved)?;
                }
                value
            }
            Some(_) => self.walk_frames(0, &location.path).ok_or_else(unresolved)?,
            None => {
                let top = self.frames.len().checked_sub(1).ok_or_else(unresolved)?;
                self.walk_frames(top, &location.path).ok_or_else(unresolved)?
            }
        };

        match target.unwrap_transparent() {
            Some(Decoded::UInt(v)) => Ok(Selector::Int(i128::from(*v))),
            Some(Decoded::SInt(v)) => Ok(Selector::Int(i128::from(*v))),
            Some(Decoded::Bool(b)) => Ok(Selector::Bool(*b)),
            _ => Err(DecodeError::LocationType {
                location: location.to_string(),
                expected: "an integer or boolean",
            }),
        }
    }

    fn walk_frames<'s>(&'s self, mut idx: usize, path: &[Option<String>]) -> Option<&'s Decoded> {
        for (i, elem) in path.iter().enumerate() {
            match elem {
                None => idx = idx.checked_sub(1)?,
                Some(name) => {
                    let frame = self.frames.get(idx)?;
                    if let Some((_, value)) = frame.members.iter().rev().find(|(n, _)| n == name) {
                        let mut value = value;
                        for rest in &path[i + 1..] {
                            value = value.member(rest.as_deref()?)?;
                        }
                        return Some(value);
                    }
                    let next = self.frames.get(idx + 1)?;
                    if next.name.as_deref() != Some(name.as_str()) {
                        return None;
                    }
                    idx += 1;
                }
            }
        }
        None
    }
}

fn sign_extend(value: u64, bits: u32) -> i64 {
    if bits == 0 || bits >= 64 {
        return value as i64;
    }
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

fn decode_string(bytes: &[u8], encoding: Encoding) -> Result<String, DecodeError> {
    let invalid = |e: String| DecodeError::InvalidString(e);
    let text = match encoding {
        Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        Encoding::Utf16Be | Encoding::Utf16Le => {
            let units = bytes.chunks_exact(2).map(|c| {
                if encoding == Encoding::Utf16Be {
                    u16::from_be_bytes([c[0], c[1]])
                } else {
                    u16::from_le_bytes([c[0], c[1]])
                }
            });
            char::decode_utf16(units)
                .collect::<Result<String, _>>()
                .map_err(|e| invalid(e.to_string()))?
        }
        Encoding::Utf32Be | Encoding::Utf32Le => bytes
            .chunks_exact(4)
            .map(|c| {
                let cp = if encoding == Encoding::Utf32Be {
                    u32::from_be_bytes([c[0], c[1], c[2], c[3]])
                } else {
                    u32::from_le_bytes([c[0], c[1], c[2], c[3]])
                };
                char::from_u32(cp).ok_or_else(|| invalid(format!("invalid code point {:#x}", cp)))
            })
            .collect::<Result<String, _>>()?,
    };
    // Static-length strings end at the first null code point
    Ok(match text.find('\0') {
        Some(end) => text[..end].to_string(),
        None => text,
    })
}

/// Flatten a decoded value into path-keyed scalar fields
fn flatten(prefix: String, value: &Decoded, out: &mut BTreeMap<String, Value>) {
    match value {
        Decoded::UInt(v) => {
            out.insert(prefix, Value::UInt(*v));
        }
        Decoded::SInt(v) => {
            out.insert(prefix, Value::Int(*v));
        }
        Decoded::Bool(b) => {
            out.insert(prefix, Value::UInt(u64::from(*b)));
        }
        Decoded::Float(v) => {
            out.insert(prefix, Value::Float(*v));
        }
        Decoded::Str(s) => {
            out.insert(prefix, Value::Str(s.clone()));
        }
        Decoded::Blob(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            out.insert(prefix, Value::Str(hex));
        }
        Decoded::Struct(members) => {
            for (name, member) in members {
                flatten(format!("{}/{}", prefix, name), member, out);
            }
        }
        Decoded::Array(_) => {}
        Decoded::Optional(None) => {
            out.insert(prefix, Value::Null);
        }
        Decoded::Optional(Some(inner)) | Decoded::Variant(inner) => flatten(prefix, inner, out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::metadata::parse_metadata;
    use serde_json::{json, Value as Json};

    fn metadata(fragments: &[Json]) -> Metadata {
        let mut raw = Vec::new();
        for f in fragments {
            raw.push(0x1e);
            raw.extend_from_slice(f.to_string().as_bytes());
        }
        parse_metadata(&raw).unwrap()
    }

    fn u(len: u32) -> Json {
        json!({"type": "fixed-length-unsigned-integer", "length": len, "byte-order": "little-endian", "alignment": 8})
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0b111, 3), -1);
        assert_eq!(sign_extend(0b011, 3), 3);
        assert_eq!(sign_extend(u64::MAX, 64), -1);
    }

    #[test]
    fn test_clock_update_wraps_truncated_timestamps() {
        let meta = Metadata::default();
        let mut d = StreamDecoder::new(&meta, &[]);
        d.clock = 0x1_00f0;
        d.update_clock(0xf8, 8);
        assert_eq!(d.clock, 0x1_00f8);
        d.update_clock(0x02, 8);
        assert_eq!(d.clock, 0x1_0102);
        d.update_clock(7, 64);
        assert_eq!(d.clock, 7);
    }

    #[test]
    fn test_decode_single_packet_without_header() {
        let meta = metadata(&[
            json!({"type": "preamble", "version": 2}),
            json!({"type": "clock-class", "id": "c", "frequency": 1_000_000_000}),
            json!({"type": "data-stream-class", "default-clock-class-id": "c",
                   "event-record-header-field-class": {"type": "structure", "member-classes": [
                       {"name": "id", "field-class": {"type": "fixed-length-unsigned-integer", "length": 8,
                           "byte-order": "little-endian", "alignment": 8, "roles": ["event-record-class-id"]}},
                       {"name": "ts", "field-class": {"type": "fixed-length-unsigned-integer", "length": 16,
                           "byte-order": "little-endian", "alignment": 8, "roles": ["default-clock-timestamp"]}}
                   ]}}),
            json!({"type": "event-record-class", "id": 0, "name": "enter",
                   "payload-field-class": {"type": "structure", "member-classes": [{"name": "addr", "field-class": u(32)}]}}),
            json!({"type": "event-record-class", "id": 1, "name": "leave"}),
        ]);

        let mut data = Vec::new();
        data.extend_from_slice(&[0, 10, 0]);
        data.extend_from_slice(&0xdeadu32.to_le_bytes());
        data.extend_from_slice(&[1, 20, 0]);

        let stream = decode_stream(&meta, &data).unwrap();
        assert_eq!(stream.packet_count, 1);
        assert_eq!(stream.events.len(), 2);
        assert_eq!(stream.events[0].name, "enter");
        assert_eq!(stream.events[0].timestamp, 10);
        assert_eq!(stream.events[0].fields["/payload/addr"], Value::UInt(0xdead));
        assert_eq!(stream.events[0].fields["/event-header/ts"], Value::UInt(10));
        assert_eq!(stream.events[1].name, "leave");
        assert_eq!(stream.events[1].timestamp, 20);
    }

    #[test]
    fn test_dynamic_string_and_optional() {
        let meta = metadata(&[
            json!({"type": "preamble", "version": 2}),
            json!({"type": "data-stream-class"}),
            json!({"type": "event-record-class", "name": "msg",
                   "payload-field-class": {"type": "structure", "member-classes": [
                       {"name": "len", "field-class": u(8)},
                       {"name": "text", "field-class": {"type": "dynamic-length-string",
                           "length-field-location": {"origin": "event-record-payload", "path": ["len"]}}},
                       {"name": "has_extra", "field-class": {"type": "fixed-length-boolean", "length": 8,
                           "byte-order": "little-endian", "alignment": 8}},
                       {"name": "extra", "field-class": {"type": "optional",
                           "selector-field-location": {"path": ["has_extra"]},
                           "field-class": u(8)}}
                   ]}}),
        ]);

        let data = [2, b'h', b'i', 1, 42, 3, b'a', b'b', b'c', 0];
        let stream = decode_stream(&meta, &data).unwrap();
        assert_eq!(stream.events.len(), 2);
        assert_eq!(stream.events[0].fields["/payload/text"], Value::Str("hi".to_string()));
        assert_eq!(stream.events[0].fields["/payload/extra"], Value::UInt(42));
        assert_eq!(stream.events[1].fields["/payload/text"], Value::Str("abc".to_string()));
        assert_eq!(stream.events[1].fields["/payload/extra"], Value::Null);
    }

    #[test]
    fn test_variant_selects_option() {
        let meta = metadata(&[
            json!({"type": "preamble", "version": 2}),
            json!({"type": "data-stream-class"}),
            json!({"type": "event-record-class", "name": "v",
                   "payload-field-class": {"type": "structure", "member-classes": [
                       {"name": "tag", "field-class": u(8)},
                       {"name": "val", "field-class": {"type": "variant",
                           "selector-field-location": {"origin": "event-record-payload", "path": ["tag"]},
                           "options": [
                               {"field-class": u(8), "selector-field-ranges": [[0, 0]]},
                               {"field-class": {"type": "null-terminated-string"}, "selector-field-ranges": [[1, 1]]}
                           ]}}
                   ]}}),
        ]);

        let data = [0, 7, 1, b'o', b'k', 0];
        let stream = decode_stream(&meta, &data).unwrap();
        assert_eq!(stream.events[0].fields["/payload/val"], Value::UInt(7));
        assert_eq!(stream.events[1].fields["/payload/val"], Value::Str("ok".to_string()));
    }

    #[test]
    fn test_packet_header_magic_and_lengths() {
        let meta = metadata(&[
            json!({"type": "preamble", "version": 2}),
            json!({"type": "trace-class", "packet-header-field-class": {"type": "structure", "member-classes": [
                {"name": "magic", "field-class": {"type": "fixed-length-unsigned-integer", "length": 32,
                    "byte-order": "little-endian", "alignment": 8, "roles": ["packet-magic-number"]}}
            ]}}),
            json!({"type": "data-stream-class", "packet-context-field-class": {"type": "structure", "member-classes": [
                {"name": "content", "field-class": {"type": "fixed-length-unsigned-integer", "length": 16,
                    "byte-order": "little-endian", "alignment": 8, "roles": ["packet-content-length"]}},
                {"name": "total", "field-class": {"type": "fixed-length-unsigned-integer", "length": 16,
                    "byte-order": "little-endian", "alignment": 8, "roles": ["packet-total-length"]}}
            ]}}),
            json!({"type": "event-record-class", "name": "e",
                   "payload-field-class": {"type": "structure", "member-classes": [{"name": "x", "field-class": u(8)}]}}),
        ]);

        let mut packet = Vec::new();
        packet.extend_from_slice(&(PACKET_MAGIC_NUMBER as u32).to_le_bytes());
        packet.extend_from_slice(&(10u16 * 8).to_le_bytes());
        packet.extend_from_slice(&(12u16 * 8).to_le_bytes());
        packet.extend_from_slice(&[5, 6, 0, 0]);

        let mut data = packet.clone();
        data.extend_from_slice(&packet);
        let stream = decode_stream(&meta, &data).unwrap();
        assert_eq!(stream.packet_count, 2);
        let xs: Vec<&Value> = stream.events.iter().map(|e| &e.fields["/payload/x"]).collect();
        assert_eq!(xs, vec![&Value::UInt(5), &Value::UInt(6), &Value::UInt(5), &Value::UInt(6)]);

        let mut bad = packet.clone();
        bad[0] = 0;
        let err = decode_stream(&meta, &bad).unwrap_err();
        assert!(matches!(err.source, DecodeError::BadMagic(_)));
        assert_eq!(err.offset, 0);
    }

    #[test]
    fn test_truncated_event_is_an_error() {
        let meta = metadata(&[
            json!({"type": "preamble", "version": 2}),
            json!({"type": "data-stream-class"}),
            json!({"type": "event-record-class", "name": "e",
                   "payload-field-class": {"type": "structure", "member-classes": [{"name": "x", "field-class": u(32)}]}}),
        ]);
        let err = decode_stream(&meta, &[1, 0, 0, 0, 2, 0]).unwrap_err();
        assert!(matches!(err.source, DecodeError::OutOfBounds { .. }));
    }

    #[test]
    fn test_empty_event_records_are_rejected() {
        let meta = metadata(&[
            json!({"type": "preamble", "version": 2}),
            json!({"type": "data-stream-class"}),
            json!({"type": "event-record-class", "name": "nothing"}),
        ]);
        let err = decode_stream(&meta, &[0]).unwrap_err();
        assert!(matches!(err.source, DecodeError::EmptyEventRecord(_)));
    }

    #[test]
    fn test_array_of_empty_structures_is_rejected() {
        let array = |length: u64| {
            metadata(&[
                json!({"type": "preamble", "version": 2}),
                json!({"type": "data-stream-class"}),
                json!({"type": "event-record-class", "name": "e",
                       "payload-field-class": {"type": "structure", "member-classes": [
                           {"name": "x", "field-class": u(8)},
                           {"name": "xs", "field-class": {"type": "static-length-array", "length": length,
                               "element-field-class": {"type": "structure"}}}
                       ]}}),
            ])
        };

        let err = decode_stream(&array(1u64 << 62), &[7]).unwrap_err();
        assert!(matches!(
            err.source,
            DecodeError::EmptyArrayElement { length, .. } if length == 1u64 << 62
        ));
        assert_eq!(err.offset, 0);

        // A single empty element is still a valid array.
        let stream = decode_stream(&array(1), &[7]).unwrap();
        assert_eq!(stream.events[0].fields["/payload/x"], Value::UInt(7));
    }

    #[test]
    fn test_leb128() {
        let meta = metadata(&[
            json!({"type": "preamble", "version": 2}),
            json!({"type": "data-stream-class"}),
            json!({"type": "event-record-class", "name": "v",
                   "payload-field-class": {"type": "structure", "member-classes": [
                       {"name": "u", "field-class": {"type": "variable-length-unsigned-integer"}},
                       {"name": "s", "field-class": {"type": "variable-length-signed-integer"}}
                   ]}}),
        ]);
        // 624485 = e5 8e 26, -123456 = c0 bb 78
        let data = [0xe5, 0x8e, 0x26, 0xc0, 0xbb, 0x78];
        let stream = decode_stream(&meta, &data).unwrap();
        assert_eq!(stream.events[0].fields["/payload/u"], Value::UInt(624_485));
        assert_eq!(stream.events[0].fields["/payload/s"], Value::Int(-123_456));
    }
}
