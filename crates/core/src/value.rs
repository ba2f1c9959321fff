use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// A value stored under one session field.
///
/// The variant is the wire discriminant: serializers encode the tag
/// explicitly rather than inspecting runtime types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SessionValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl SessionValue {
    /// Returns `true` for primitive and string values.
    ///
    /// Handing out a mutable-kind value lets the caller change it in place,
    /// so change tracking treats any read of one as a modification.
    pub fn is_immutable(&self) -> bool {
        !matches!(self, Self::Bytes(_) | Self::Json(_))
    }

    /// Short name of the variant, used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for SessionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for SessionValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for SessionValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for SessionValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for SessionValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for SessionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<u8>> for SessionValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<serde_json::Value> for SessionValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Converts session values to and from the opaque bytes kept in the store.
pub trait ValueSerializer: Send + Sync {
    /// Registry name of this serializer.
    fn name(&self) -> &'static str;

    fn serialize(&self, value: &SessionValue) -> Result<Bytes, CodecError>;

    fn deserialize(&self, raw: &[u8]) -> Result<SessionValue, CodecError>;
}

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_JSON: u8 = 6;

/// Header size: one discriminant byte plus a big-endian `u32` length.
const HEADER_LEN: usize = 5;

/// Compact tagged encoding: `[tag: u8][len: u32 BE][payload]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinarySerializer;

impl BinarySerializer {
    fn frame(tag: u8, payload: &[u8]) -> Result<Bytes, CodecError> {
        let len = u32::try_from(payload.len()).map_err(|_| CodecError::TooLarge(payload.len()))?;
        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        buf.put_u8(tag);
        buf.put_u32(len);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    fn fixed<const N: usize>(kind: &'static str, payload: &[u8]) -> Result<[u8; N], CodecError> {
        payload.try_into().map_err(|_| CodecError::LengthMismatch {
            kind,
            expected: N,
            found: payload.len(),
        })
    }
}

impl ValueSerializer for BinarySerializer {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn serialize(&self, value: &SessionValue) -> Result<Bytes, CodecError> {
        match value {
            SessionValue::Null => Self::frame(TAG_NULL, &[]),
            SessionValue::Bool(b) => Self::frame(TAG_BOOL, &[u8::from(*b)]),
            SessionValue::Int(n) => Self::frame(TAG_INT, &n.to_be_bytes()),
            SessionValue::Float(x) => Self::frame(TAG_FLOAT, &x.to_bits().to_be_bytes()),
            SessionValue::Str(s) => Self::frame(TAG_STR, s.as_bytes()),
            SessionValue::Bytes(b) => Self::frame(TAG_BYTES, b),
            SessionValue::Json(v) => {
                let encoded = serde_json::to_vec(v).map_err(|e| CodecError::Json(e.to_string()))?;
                Self::frame(TAG_JSON, &encoded)
            }
        }
    }

    fn deserialize(&self, raw: &[u8]) -> Result<SessionValue, CodecError> {
        if raw.len() < HEADER_LEN {
            return Err(CodecError::Truncated {
                needed: HEADER_LEN,
                available: raw.len(),
            });
        }
        let mut header = &raw[..HEADER_LEN];
        let tag = header.get_u8();
        let len = header.get_u32() as usize;
        let payload = &raw[HEADER_LEN..];
        if payload.len() != len {
            return Err(CodecError::LengthMismatch {
                kind: "frame",
                expected: len,
                found: payload.len(),
            });
        }

        match tag {
            TAG_NULL => {
                Self::fixed::<0>("null", payload)?;
                Ok(SessionValue::Null)
            }
            TAG_BOOL => {
                let [b] = Self::fixed::<1>("bool", payload)?;
                Ok(SessionValue::Bool(b != 0))
            }
            TAG_INT => Ok(SessionValue::Int(i64::from_be_bytes(Self::fixed("int", payload)?))),
            TAG_FLOAT => Ok(SessionValue::Float(f64::from_bits(u64::from_be_bytes(
                Self::fixed("float", payload)?,
            )))),
            TAG_STR => String::from_utf8(payload.to_vec())
                .map(SessionValue::Str)
                .map_err(|e| CodecError::InvalidUtf8(e.to_string())),
            TAG_BYTES => Ok(SessionValue::Bytes(payload.to_vec())),
            TAG_JSON => serde_json::from_slice(payload)
                .map(SessionValue::Json)
                .map_err(|e| CodecError::Json(e.to_string())),
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

/// Self-describing JSON encoding (`{"type": "...", "value": ...}`).
///
/// Larger than [`BinarySerializer`] but readable with `redis-cli`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl ValueSerializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, value: &SessionValue) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| CodecError::Json(e.to_string()))
    }

    fn deserialize(&self, raw: &[u8]) -> Result<SessionValue, CodecError> {
        serde_json::from_slice(raw).map_err(|e| CodecError::Json(e.to_string()))
    }
}

/// Resolve a serializer by its registry name.
pub fn serializer_for(name: &str) -> Result<Arc<dyn ValueSerializer>, CodecError> {
    match name.to_ascii_lowercase().as_str() {
        "binary" => Ok(Arc::new(BinarySerializer)),
        "json" => Ok(Arc::new(JsonSerializer)),
        _ => Err(CodecError::UnknownSerializer(name.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<SessionValue> {
        vec![
            SessionValue::Null,
            SessionValue::Bool(true),
            SessionValue::Int(-42),
            SessionValue::Float(2.5),
            SessionValue::Str("héllo".into()),
            SessionValue::Bytes(vec![0, 1, 2, 255]),
            SessionValue::Json(serde_json::json!({"cart": [1, 2, 3]})),
        ]
    }

    #[test]
    fn binary_header_layout() {
        let encoded = BinarySerializer.serialize(&SessionValue::Int(1)).unwrap();
        assert_eq!(encoded[0], TAG_INT);
        assert_eq!(&encoded[1..5], &8u32.to_be_bytes());
        assert_eq!(encoded.len(), HEADER_LEN + 8);
    }

    #[test]
    fn both_serializers_preserve_every_kind() {
        for serializer in [
            &BinarySerializer as &dyn ValueSerializer,
            &JsonSerializer as &dyn ValueSerializer,
        ] {
            for value in samples() {
                let raw = serializer.serialize(&value).unwrap();
                let back = serializer.deserialize(&raw).unwrap();
                assert_eq!(back, value, "{} lost a {}", serializer.name(), value.kind());
            }
        }
    }

    #[test]
    fn binary_rejects_truncated_header() {
        let err = BinarySerializer.deserialize(&[TAG_INT, 0, 0]).unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated {
                needed: 5,
                available: 3
            }
        );
    }

    #[test]
    fn binary_rejects_length_mismatch() {
        let err = BinarySerializer
            .deserialize(&[TAG_STR, 0, 0, 0, 9, b'a'])
            .unwrap_err();
        assert!(matches!(err, CodecError::LengthMismatch { expected: 9, found: 1, .. }));
    }

    #[test]
    fn binary_rejects_unknown_tag() {
        let err = BinarySerializer.deserialize(&[42, 0, 0, 0, 0]).unwrap_err();
        assert_eq!(err, CodecError::UnknownTag(42));
    }

    #[test]
    fn binary_rejects_wrong_fixed_width() {
        let err = BinarySerializer
            .deserialize(&[TAG_INT, 0, 0, 0, 2, 1, 2])
            .unwrap_err();
        assert!(matches!(err, CodecError::LengthMismatch { kind: "int", .. }));
    }

    #[test]
    fn mutability_classification() {
        assert!(SessionValue::Str("x".into()).is_immutable());
        assert!(SessionValue::Int(1).is_immutable());
        assert!(SessionValue::Null.is_immutable());
        assert!(!SessionValue::Bytes(vec![]).is_immutable());
        assert!(!SessionValue::Json(serde_json::json!({})).is_immutable());
    }

    #[test]
    fn registry_resolves_known_names() {
        assert_eq!(serializer_for("binary").unwrap().name(), "binary");
        assert_eq!(serializer_for("JSON").unwrap().name(), "json");
        assert!(matches!(
            serializer_for("xml"),
            Err(CodecError::UnknownSerializer(_))
        ));
    }
}
