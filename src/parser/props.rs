//! Typed property accessors for metadata JSON objects.
//!
//! Every accessor takes a `context` naming the object being read so
//! errors point at the offending fragment or field class.

use crate::utils::error::MetadataError;
use serde_json::{Map, Value as Json};

pub type Object = Map<String, Json>;

pub fn as_object<'a>(value: &'a Json, context: &str) -> Result<&'a Object, MetadataError> {
    value.as_object().ok_or_else(|| MetadataError::WrongType {
        key: context.to_string(),
        context: context.to_string(),
        expected: "object",
    })
}

fn wrong_type(key: &str, context: &str, expected: &'static str) -> MetadataError {
    MetadataError::WrongType {
        key: key.to_string(),
        context: context.to_string(),
        expected,
    }
}

pub fn invalid(key: &str, context: &str, reason: impl Into<String>) -> MetadataError {
    MetadataError::InvalidValue {
        key: key.to_string(),
        context: context.to_string(),
        reason: reason.into(),
    }
}

pub fn required<'a>(obj: &'a Object, key: &str, context: &str) -> Result<&'a Json, MetadataError> {
    obj.get(key).ok_or_else(|| MetadataError::MissingProperty {
        key: key.to_string(),
        context: context.to_string(),
    })
}

pub fn opt_str<'a>(obj: &'a Object, key: &str, context: &str) -> Result<Option<&'a str>, MetadataError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) => v.as_str().map(Some).ok_or_else(|| wrong_type(key, context, "string")),
    }
}

pub fn req_str<'a>(obj: &'a Object, key: &str, context: &str) -> Result<&'a str, MetadataError> {
    required(obj, key, context)?
        .as_str()
        .ok_or_else(|| wrong_type(key, context, "string"))
}

pub fn opt_u64(obj: &Object, key: &str, context: &str) -> Result<Option<u64>, MetadataError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| wrong_type(key, context, "non-negative integer")),
    }
}

pub fn req_u64(obj: &Object, key: &str, context: &str) -> Result<u64, MetadataError> {
    opt_u64(obj, key, context)?.ok_or_else(|| MetadataError::MissingProperty {
        key: key.to_string(),
        context: context.to_string(),
    })
}

pub fn opt_i64(obj: &Object, key: &str, context: &str) -> Result<Option<i64>, MetadataError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| wrong_type(key, context, "integer")),
    }
}

pub fn opt_object<'a>(obj: &'a Object, key: &str, context: &str) -> Result<Option<&'a Object>, MetadataError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) => v.as_object().map(Some).ok_or_else(|| wrong_type(key, context, "object")),
    }
}

pub fn req_array<'a>(obj: &'a Object, key: &str, context: &str) -> Result<&'a Vec<Json>, MetadataError> {
    required(obj, key, context)?
        .as_array()
        .ok_or_else(|| wrong_type(key, context, "array"))
}

pub fn opt_array<'a>(obj: &'a Object, key: &str, context: &str) -> Result<Option<&'a Vec<Json>>, MetadataError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) => v.as_array().map(Some).ok_or_else(|| wrong_type(key, context, "array")),
    }
}

/// Alignment property, which must be a power of two
pub fn alignment(obj: &Object, key: &str, context: &str, default: u64) -> Result<u64, MetadataError> {
    let align = opt_u64(obj, key, context)?.unwrap_or(default);
    if !align.is_power_of_two() {
        return Err(invalid(key, context, format!("{} is not a power of two", align)));
    }
    Ok(align)
}

/// Signed or unsigned JSON integer widened to `i128`
pub fn integer(value: &Json, key: &str, context: &str) -> Result<i128, MetadataError> {
    if let Some(u) = value.as_u64() {
        Ok(i128::from(u))
    } else if let Some(i) = value.as_i64() {
        Ok(i128::from(i))
    } else {
        Err(wrong_type(key, context, "integer"))
    }
}

/// User attributes, kept verbatim
pub fn attributes(obj: &Object, context: &str) -> Result<Object, MetadataError> {
    Ok(opt_object(obj, "attributes", context)?.cloned().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Json) -> Object {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_required_and_optional_accessors() {
        let o = obj(json!({"name": "x", "id": 3, "neg": -2}));
        assert_eq!(req_str(&o, "name", "test").unwrap(), "x");
        assert_eq!(opt_str(&o, "missing", "test").unwrap(), None);
        assert_eq!(req_u64(&o, "id", "test").unwrap(), 3);
        assert_eq!(opt_i64(&o, "neg", "test").unwrap(), Some(-2));
        assert!(matches!(
            req_u64(&o, "neg", "test"),
            Err(MetadataError::WrongType { .. })
        ));
        assert!(matches!(
            req_str(&o, "nope", "test"),
            Err(MetadataError::MissingProperty { .. })
        ));
    }

    #[test]
    fn test_alignment_must_be_power_of_two() {
        let o = obj(json!({"alignment": 8, "bad": 6}));
        assert_eq!(alignment(&o, "alignment", "test", 1).unwrap(), 8);
        assert_eq!(alignment(&o, "missing", "test", 1).unwrap(), 1);
        assert!(alignment(&o, "bad", "test", 1).is_err());
    }

    #[test]
    fn test_integer_widening() {
        assert_eq!(integer(&json!(u64::MAX), "k", "c").unwrap(), i128::from(u64::MAX));
        assert_eq!(integer(&json!(-5), "k", "c").unwrap(), -5);
        assert!(integer(&json!("5"), "k", "c").is_err());
    }
}
