use thiserror::Error;

/// Errors from encoding or decoding session values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("value header truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("unknown value discriminant: {0}")]
    UnknownTag(u8),

    #[error("payload length mismatch for {kind}: expected {expected}, found {found}")]
    LengthMismatch {
        kind: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("payload of {0} bytes exceeds the encodable maximum")]
    TooLarge(usize),

    #[error("invalid utf-8 in string value: {0}")]
    InvalidUtf8(String),

    #[error("json value error: {0}")]
    Json(String),

    #[error("unknown serializer: {0}")]
    UnknownSerializer(String),
}
