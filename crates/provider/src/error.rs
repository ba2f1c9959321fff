use sessionlock_core::CodecError;
use sessionlock_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the session state provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Missing or malformed settings. Raised at initialization, never retried.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A session value could not be encoded for the store.
    #[error("serialization error: {0}")]
    Codec(#[from] CodecError),

    /// The host asked for something the protocol does not allow.
    #[error("rejected by policy: {0}")]
    Policy(String),
}

impl ProviderError {
    /// Returns `true` if the underlying store failure was connectivity-related.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_transient())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn transient_errors() {
        assert!(!ProviderError::from(StoreError::Timeout(Duration::from_secs(1))).is_transient());
        assert!(ProviderError::from(StoreError::Connection("reset".into())).is_transient());
        assert!(!ProviderError::from(StoreError::Backend("ERR".into())).is_transient());
        assert!(!ProviderError::Config("x".into()).is_transient());
        assert!(!ProviderError::Policy("x".into()).is_transient());
    }

    #[test]
    fn error_display() {
        let err = ProviderError::Config("port must not be 0".into());
        assert_eq!(err.to_string(), "invalid configuration: port must not be 0");

        let err = ProviderError::from(StoreError::Timeout(Duration::from_millis(500)));
        assert_eq!(err.to_string(), "operation timed out after 500ms");

        let err = ProviderError::from(CodecError::UnknownTag(9));
        assert!(err.to_string().starts_with("serialization error:"));
    }
}
