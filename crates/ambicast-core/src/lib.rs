pub mod config;
pub mod errors;
pub mod settings;
pub mod types;

pub use config::CaptureConfig;
pub use errors::{CaptureError, SettingsError, StreamError};
pub use settings::Settings;
pub use types::*;
