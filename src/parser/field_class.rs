//! CTF 2 field classes.
//!
//! A field class describes how one field is laid out in a data stream.
//! Field classes are parsed from metadata JSON, resolving string
//! references against previously declared field class aliases.

use super::props::{self, Object};
use crate::utils::error::MetadataError;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOrder {
    FirstToLast,
    LastToFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Utf16Be,
    Utf16Le,
    Utf32Be,
    Utf32Le,
}

impl Encoding {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "utf-8" => Some(Encoding::Utf8),
            "utf-16be" => Some(Encoding::Utf16Be),
            "utf-16le" => Some(Encoding::Utf16Le),
            "utf-32be" => Some(Encoding::Utf32Be),
            "utf-32le" => Some(Encoding::Utf32Le),
            _ => None,
        }
    }

    /// Bytes per code unit
    pub fn unit_size(self) -> usize {
        match self {
            Encoding::Utf8 => 1,
            Encoding::Utf16Be | Encoding::Utf16Le => 2,
            Encoding::Utf32Be | Encoding::Utf32Le => 4,
        }
    }
}

/// Semantic role of an unsigned integer or blob field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    DataStreamClassId,
    DataStreamId,
    PacketMagicNumber,
    MetadataStreamUuid,
    DefaultClockTimestamp,
    DiscardedEventRecordCounterSnapshot,
    PacketContentLength,
    PacketEndDefaultClockTimestamp,
    PacketSequenceNumber,
    PacketTotalLength,
    EventRecordClassId,
}

impl Role {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "data-stream-class-id" => Role::DataStreamClassId,
            "data-stream-id" => Role::DataStreamId,
            "packet-magic-number" => Role::PacketMagicNumber,
            "metadata-stream-uuid" => Role::MetadataStreamUuid,
            "default-clock-timestamp" => Role::DefaultClockTimestamp,
            "discarded-event-record-counter-snapshot" => Role::DiscardedEventRecordCounterSnapshot,
            "packet-content-length" => Role::PacketContentLength,
            "packet-end-default-clock-timestamp" => Role::PacketEndDefaultClockTimestamp,
            "packet-sequence-number" => Role::PacketSequenceNumber,
            "packet-total-length" => Role::PacketTotalLength,
            "event-record-class-id" => Role::EventRecordClassId,
            _ => return None,
        })
    }
}

/// Root scope of a packet or event record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    PacketHeader,
    PacketContext,
    EventHeader,
    CommonContext,
    SpecificContext,
    Payload,
}

impl Scope {
    pub const ALL: [Scope; 6] = [
        Scope::PacketHeader,
        Scope::PacketContext,
        Scope::EventHeader,
        Scope::CommonContext,
        Scope::SpecificContext,
        Scope::Payload,
    ];

    fn from_origin(name: &str) -> Option<Self> {
        Some(match name {
            "packet-header" => Scope::PacketHeader,
            "packet-context" => Scope::PacketContext,
            "event-record-header" => Scope::EventHeader,
            "event-record-common-context" => Scope::CommonContext,
            "event-record-specific-context" => Scope::SpecificContext,
            "event-record-payload" => Scope::Payload,
            _ => return None,
        })
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// First element of event field keys
    pub fn key_prefix(self) -> &'static str {
        match self {
            Scope::PacketHeader => "/packet-header",
            Scope::PacketContext => "/packet-context",
            Scope::EventHeader => "/event-header",
            Scope::CommonContext => "/common-context",
            Scope::SpecificContext => "/specific-context",
            Scope::Payload => "/payload",
        }
    }
}

/// Location of a previously decoded field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLocation {
    /// `None` means relative to the enclosing structure
    pub origin: Option<Scope>,

    /// `None` elements move to the parent structure
    pub path: Vec<Option<String>>,
}

impl FieldLocation {
    pub fn parse(value: &Json, context: &str) -> Result<Self, MetadataError> {
        let obj = props::as_object(value, context)?;
        let origin = match props::opt_str(obj, "origin", context)? {
            None => None,
            Some(name) => Some(Scope::from_origin(name).ok_or_else(|| {
                props::invalid("origin", context, format!("unknown origin \"{}\"", name))
            })?),
        };
        let raw_path = props::req_array(obj, "path", context)?;
        if raw_path.is_empty() {
            return Err(props::invalid("path", context, "path is empty"));
        }
        let mut path = Vec::with_capacity(raw_path.len());
        for elem in raw_path {
            match elem {
                Json::Null if origin.is_none() => path.push(None),
                Json::String(s) => path.push(Some(s.clone())),
                _ => {
                    return Err(props::invalid(
                        "path",
                        context,
                        "elements must be strings (or null in a relative location)",
                    ))
                }
            }
        }
        Ok(Self { origin, path })
    }
}

impl fmt::Display for FieldLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            Some(scope) => f.write_str(scope.key_prefix())?,
            None => f.write_str(".")?,
        }
        for elem in &self.path {
            match elem {
                Some(name) => write!(f, "/{}", name)?,
                None => f.write_str("/..")?,
            }
        }
        Ok(())
    }
}

/// Set of inclusive integer ranges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSet(Vec<(i128, i128)>);

impl RangeSet {
    pub fn new(ranges: Vec<(i128, i128)>) -> Self {
        Self(ranges)
    }

    pub fn parse(value: &Json, context: &str) -> Result<Self, MetadataError> {
        let key = "selector-field-ranges";
        let items = value
            .as_array()
            .ok_or_else(|| props::invalid(key, context, "expected an array of ranges"))?;
        if items.is_empty() {
            return Err(props::invalid(key, context, "range set is empty"));
        }
        let mut ranges = Vec::with_capacity(items.len());
        for item in items {
            let pair = item
                .as_array()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| props::invalid(key, context, "a range is a [lower, upper] pair"))?;
            let lower = props::integer(&pair[0], key, context)?;
            let upper = props::integer(&pair[1], key, context)?;
            if lower > upper {
                return Err(props::invalid(
                    key,
                    context,
                    format!("lower bound {} exceeds upper bound {}", lower, upper),
                ));
            }
            ranges.push((lower, upper));
        }
        Ok(Self(ranges))
    }

    pub fn contains(&self, value: i128) -> bool {
        self.0.iter().any(|&(lo, hi)| lo <= value && value <= hi)
    }

    pub fn intersects(&self, other: &RangeSet) -> bool {
        self.0
            .iter()
            .any(|&(lo, hi)| other.0.iter().any(|&(olo, ohi)| lo <= ohi && olo <= hi))
    }
}

/// Layout shared by all fixed-length field classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedLayout {
    /// Length in bits (1..=64)
    pub length: u32,
    pub byte_order: ByteOrder,
    pub bit_order: BitOrder,
    pub alignment: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructMember {
    pub name: String,
    pub class: FieldClass,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantOption {
    pub name: Option<String>,
    pub class: FieldClass,
    pub ranges: RangeSet,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldClass {
    /// Bit arrays and bit maps
    BitArray(FixedLayout),
    UnsignedInt { layout: FixedLayout, roles: Vec<Role> },
    SignedInt(FixedLayout),
    Bool(FixedLayout),
    Float(FixedLayout),
    VarUnsignedInt { roles: Vec<Role> },
    VarSignedInt,
    NullTerminatedString { encoding: Encoding },
    StaticString { length: u64, encoding: Encoding },
    DynamicString { length: FieldLocation, encoding: Encoding },
    StaticBlob { length: u64, roles: Vec<Role> },
    DynamicBlob { length: FieldLocation },
    Struct { members: Vec<StructMember>, min_alignment: u64 },
    StaticArray { element: Box<FieldClass>, length: u64, min_alignment: u64 },
    DynamicArray { element: Box<FieldClass>, length: FieldLocation, min_alignment: u64 },
    Optional { class: Box<FieldClass>, selector: FieldLocation, ranges: Option<RangeSet> },
    Variant { selector: FieldLocation, options: Vec<VariantOption> },
}

impl FieldClass {
    /// Alignment in bits applied before decoding a field of this class
    pub fn alignment(&self) -> u64 {
        match self {
            FieldClass::BitArray(l)
            | FieldClass::UnsignedInt { layout: l, .. }
            | FieldClass::SignedInt(l)
            | FieldClass::Bool(l)
            | FieldClass::Float(l) => l.alignment,
            FieldClass::VarUnsignedInt { .. }
            | FieldClass::VarSignedInt
            | FieldClass::NullTerminatedString { .. }
            | FieldClass::StaticString { .. }
            | FieldClass::DynamicString { .. }
            | FieldClass::StaticBlob { .. }
            | FieldClass::DynamicBlob { .. } => 8,
            FieldClass::Struct { members, min_alignment } => members
                .iter()
                .map(|m| m.class.alignment())
                .fold(*min_alignment, u64::max),
            FieldClass::StaticArray { element, min_alignment, .. }
            | FieldClass::DynamicArray { element, min_alignment, .. } => {
                element.alignment().max(*min_alignment)
            }
            FieldClass::Optional { .. } | FieldClass::Variant { .. } => 1,
        }
    }

    pub fn roles(&self) -> &[Role] {
        match self {
            FieldClass::UnsignedInt { roles, .. }
            | FieldClass::VarUnsignedInt { roles }
            | FieldClass::StaticBlob { roles, .. } => roles,
            _ => &[],
        }
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, FieldClass::Struct { .. })
    }

    /// Parse a field class, resolving alias references
    ///
    /// **Public** - entry point used by the metadata parser
    ///
    /// # Arguments
    /// * `value` - Field class JSON: an object, or a string naming an alias
    /// * `aliases` - Aliases declared so far
    /// * `context` - Description of the enclosing object for errors
    ///
    /// # Errors
    /// * `MetadataError::UnknownAlias` - string references an undeclared alias
    /// * `MetadataError::UnknownFieldClass` - unsupported `type`
    /// * Property errors for missing or invalid properties
    pub fn parse(
        value: &Json,
        aliases: &HashMap<String, FieldClass>,
        context: &str,
    ) -> Result<Self, MetadataError> {
        if let Some(alias) = value.as_str() {
            return aliases
                .get(alias)
                .cloned()
                .ok_or_else(|| MetadataError::UnknownAlias(alias.to_string()));
        }

        let obj = props::as_object(value, context)?;
        let ty = props::req_str(obj, "type", context)?;
        let ctx = format!("{} field class in {}", ty, context);
        let ctx = ctx.as_str();

        let class = match ty {
            "fixed-length-bit-array" | "fixed-length-bit-map" => {
                FieldClass::BitArray(parse_fixed_layout(obj, ctx)?)
            }
            "fixed-length-unsigned-integer" => FieldClass::UnsignedInt {
                layout: parse_fixed_layout(obj, ctx)?,
                roles: parse_roles(obj, ctx)?,
            },
            "fixed-length-signed-integer" => FieldClass::SignedInt(parse_fixed_layout(obj, ctx)?),
            "fixed-length-boolean" => FieldClass::Bool(parse_fixed_layout(obj, ctx)?),
            "fixed-length-floating-point-number" => {
                let layout = parse_fixed_layout(obj, ctx)?;
                if layout.length != 32 && layout.length != 64 {
                    return Err(props::invalid(
                        "length",
                        ctx,
                        format!("unsupported floating point length {}", layout.length),
                    ));
                }
                FieldClass::Float(layout)
            }
            "variable-length-unsigned-integer" => FieldClass::VarUnsignedInt {
                roles: parse_roles(obj, ctx)?,
            },
            "variable-length-signed-integer" => FieldClass::VarSignedInt,
            "null-terminated-string" => FieldClass::NullTerminatedString {
                encoding: parse_encoding(obj, ctx)?,
            },
            "static-length-string" => FieldClass::StaticString {
                length: props::req_u64(obj, "length", ctx)?,
                encoding: parse_encoding(obj, ctx)?,
            },
            "dynamic-length-string" => FieldClass::DynamicString {
                length: FieldLocation::parse(props::required(obj, "length-field-location", ctx)?, ctx)?,
                encoding: parse_encoding(obj, ctx)?,
            },
            "static-length-blob" => FieldClass::StaticBlob {
                length: props::req_u64(obj, "length", ctx)?,
                roles: parse_roles(obj, ctx)?,
            },
            "dynamic-length-blob" => FieldClass::DynamicBlob {
                length: FieldLocation::parse(props::required(obj, "length-field-location", ctx)?, ctx)?,
            },
            "structure" => parse_struct(obj, aliases, ctx)?,
            "static-length-array" => FieldClass::StaticArray {
                element: Box::new(parse_element(obj, aliases, ctx)?),
                length: props::req_u64(obj, "length", ctx)?,
                min_alignment: props::alignment(obj, "minimum-alignment", ctx, 1)?,
            },
            "dynamic-length-array" => FieldClass::DynamicArray {
                element: Box::new(parse_element(obj, aliases, ctx)?),
                length: FieldLocation::parse(props::required(obj, "length-field-location", ctx)?, ctx)?,
                min_alignment: props::alignment(obj, "minimum-alignment", ctx, 1)?,
            },
            "optional" => FieldClass::Optional {
                class: Box::new(FieldClass::parse(
                    props::required(obj, "field-class", ctx)?,
                    aliases,
                    ctx,
                )?),
                selector: FieldLocation::parse(props::required(obj, "selector-field-location", ctx)?, ctx)?,
                ranges: obj
                    .get("selector-field-ranges")
                    .map(|r| RangeSet::parse(r, ctx))
                    .transpose()?,
            },
            "variant" => parse_variant(obj, aliases, ctx)?,
            other => return Err(MetadataError::UnknownFieldClass(other.to_string())),
        };
        Ok(class)
    }
}

fn parse_fixed_layout(obj: &Object, ctx: &str) -> Result<FixedLayout, MetadataError> {
    let length = props::req_u64(obj, "length", ctx)?;
    if length == 0 || length > 64 {
        return Err(props::invalid(
            "length",
            ctx,
            format!("length {} is outside 1..=64", length),
        ));
    }

    let byte_order = match props::req_str(obj, "byte-order", ctx)? {
        "little-endian" => ByteOrder::Little,
        "big-endian" => ByteOrder::Big,
        other => {
            return Err(props::invalid(
                "byte-order",
                ctx,
                format!("unknown byte order \"{}\"", other),
            ))
        }
    };

    let bit_order = match props::opt_str(obj, "bit-order", ctx)? {
        None => match byte_order {
            ByteOrder::Little => BitOrder::FirstToLast,
            ByteOrder::Big => BitOrder::LastToFirst,
        },
        Some("first-to-last") => BitOrder::FirstToLast,
        Some("last-to-first") => BitOrder::LastToFirst,
        Some(other) => {
            return Err(props::invalid(
                "bit-order",
                ctx,
                format!("unknown bit order \"{}\"", other),
            ))
        }
    };

    Ok(FixedLayout {
        length: length as u32,
        byte_order,
        bit_order,
        alignment: props::alignment(obj, "alignment", ctx, 1)?,
    })
}

fn parse_roles(obj: &Object, ctx: &str) -> Result<Vec<Role>, MetadataError> {
    let Some(raw) = props::opt_array(obj, "roles", ctx)? else {
        return Ok(Vec::new());
    };
    raw.iter()
        .map(|r| {
            let name = r
                .as_str()
                .ok_or_else(|| props::invalid("roles", ctx, "roles must be strings"))?;
            Role::from_name(name)
                .ok_or_else(|| props::invalid("roles", ctx, format!("unknown role \"{}\"", name)))
        })
        .collect()
}

fn parse_encoding(obj: &Object, ctx: &str) -> Result<Encoding, MetadataError> {
    match props::opt_str(obj, "encoding", ctx)? {
        None => Ok(Encoding::Utf8),
        Some(name) => Encoding::from_name(name)
            .ok_or_else(|| props::invalid("encoding", ctx, format!("unknown encoding \"{}\"", name))),
    }
}

fn parse_element(
    obj: &Object,
    aliases: &HashMap<String, FieldClass>,
    ctx: &str,
) -> Result<FieldClass, MetadataError> {
    FieldClass::parse(props::required(obj, "element-field-class", ctx)?, aliases, ctx)
}

fn parse_struct(
    obj: &Object,
    aliases: &HashMap<String, FieldClass>,
    ctx: &str,
) -> Result<FieldClass, MetadataError> {
    let mut members: Vec<StructMember> = Vec::new();
    if let Some(raw) = props::opt_array(obj, "member-classes", ctx)? {
        for m in raw {
            let mobj = props::as_object(m, ctx)?;
            let name = props::req_str(mobj, "name", ctx)?;
            if members.iter().any(|existing| existing.name == name) {
                return Err(MetadataError::Duplicate {
                    what: "structure member",
                    id: name.to_string(),
                });
            }
            let member_ctx = format!("member \"{}\" of {}", name, ctx);
            let class = FieldClass::parse(props::required(mobj, "field-class", &member_ctx)?, aliases, &member_ctx)?;
            members.push(StructMember {
                name: name.to_string(),
                class,
            });
        }
    }
    Ok(FieldClass::Struct {
        members,
        min_alignment: props::alignment(obj, "minimum-alignment", ctx, 1)?,
    })
}

fn parse_variant(
    obj: &Object,
    aliases: &HashMap<String, FieldClass>,
    ctx: &str,
) -> Result<FieldClass, MetadataError> {
    let selector = FieldLocation::parse(props::required(obj, "selector-field-location", ctx)?, ctx)?;
    let raw = props::req_array(obj, "options", ctx)?;
    if raw.is_empty() {
        return Err(props::invalid("options", ctx, "variant has no options"));
    }

    let mut options: Vec<VariantOption> = Vec::with_capacity(raw.len());
    for o in raw {
        let oobj = props::as_object(o, ctx)?;
        let ranges = RangeSet::parse(props::required(oobj, "selector-field-ranges", ctx)?, ctx)?;
        if options.iter().any(|existing| existing.ranges.intersects(&ranges)) {
            return Err(props::invalid(
                "selector-field-ranges",
                ctx,
                "variant option ranges intersect",
            ));
        }
        options.push(VariantOption {
            name: props::opt_str(oobj, "name", ctx)?.map(str::to_string),
            class: FieldClass::parse(props::required(oobj, "field-class", ctx)?, aliases, ctx)?,
            ranges,
        });
    }
    Ok(FieldClass::Variant { selector, options })
}
