use thiserror::Error;

/// How the operation executor reacts to a failed store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Fetch the connection again and retry once.
    RetryOnce,
    /// Ask the connection manager to reconnect, then retry once.
    ReconnectAndRetry,
    /// Return the error to the caller.
    Surface,
}

/// Errors from scripted store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The connection handle was torn down underneath the call.
    #[error("connection disposed: {0}")]
    Disposed(String),

    #[error("connection error: {0}")]
    Connection(String),

    /// The server no longer has the script cached.
    #[error("script not found on server: {0}")]
    ScriptNotFound(String),

    /// A script call outlived the operation timeout. The server may still
    /// have applied it.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The reply did not have the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl StoreError {
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::Disposed(_) | Self::ScriptNotFound(_) => Recovery::RetryOnce,
            Self::Connection(_) => Recovery::ReconnectAndRetry,
            Self::Timeout(_) | Self::Protocol(_) | Self::Backend(_) | Self::Configuration(_) => {
                Recovery::Surface
            }
        }
    }

    /// Returns `true` for connectivity-class failures.
    pub fn is_transient(&self) -> bool {
        self.recovery() != Recovery::Surface
    }
}
