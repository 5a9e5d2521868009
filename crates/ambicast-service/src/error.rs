use ambicast_core::{CaptureError, SettingsError};
use thiserror::Error;

/// Failures surfaced by the service control operations.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Service already running")]
    AlreadyRunning,

    #[error("Service not running")]
    NotRunning,

    #[error("Configuration invalid: {0}")]
    Config(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
