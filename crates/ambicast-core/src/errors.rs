use thiserror::Error;

use crate::types::{BackendState, Resolution, SourceKind};

/// Outcome taxonomy for capture backends and the capture context.
///
/// `NotReady` is the only retryable variant; every other one is final for the
/// backend instance that produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Configuration invalid: {reason}")]
    Config { reason: String },

    #[error("Capture hardware not ready: {reason}")]
    NotReady { reason: String },

    #[error("Permission denied: {permission}")]
    PermissionDenied { permission: String },

    #[error("Dimension mismatch: sources already resolved to {expected}, {kind} backend reports {found}")]
    DimensionMismatch {
        kind: SourceKind,
        expected: Resolution,
        found: Resolution,
    },

    #[error("Capture backend failed: {reason}")]
    Fatal { reason: String },

    #[error("No {kind} capture backend available")]
    NoBackendAvailable { kind: SourceKind },

    #[error("Unknown capture backend: {name}")]
    UnknownBackend { name: String },

    #[error("Backend '{backend}' cannot {operation} while {state}")]
    InvalidState {
        backend: String,
        operation: &'static str,
        state: BackendState,
    },

    #[error("Capture already running")]
    AlreadyRunning,
}

impl CaptureError {
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config { reason: reason.into() }
    }

    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self::NotReady { reason: reason.into() }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal { reason: reason.into() }
    }

    /// Map an I/O failure onto the capture taxonomy.
    ///
    /// Missing files are reported as not-ready: device nodes and shared-memory
    /// dumps appear only once the platform capture service is up.
    pub fn from_io(what: &str, err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                permission: format!("{what}: {err}"),
            },
            std::io::ErrorKind::NotFound => Self::NotReady {
                reason: format!("{what}: {err}"),
            },
            _ => Self::Fatal {
                reason: format!("{what}: {err}"),
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Not connected to the lighting sink")]
    NotConnected,

    #[error("Registration rejected: {reason}")]
    RegistrationRejected { reason: String },

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Message too large: {len} bytes")]
    MessageTooLarge { len: usize },

    #[error("Frame size mismatch: expected {expected} bytes of RGB24, got {found}")]
    InvalidFrame { expected: usize, found: usize },

    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings invalid: {reason}")]
    Invalid { reason: String },

    #[error("Settings parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
