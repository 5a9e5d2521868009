//! Persisted service settings.
//!
//! Stored as a single JSON object. Keys are camelCase on disk; snake_case
//! spellings are accepted on input so hand-written files keep working.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::CaptureConfig;
use crate::errors::SettingsError;

/// Default TCP port of the lighting sink.
pub const DEFAULT_SINK_PORT: u16 = 19444;
/// Default priority channel registered with the sink.
pub const DEFAULT_PRIORITY: i32 = 150;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    // Sink
    pub address:  String,
    pub port:     u16,
    pub priority: i32,
    pub origin:   String,
    #[serde(alias = "read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(alias = "reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,

    // Capture
    pub fps:    u32,
    pub width:  u32,
    pub height: u32,
    #[serde(alias = "no_gui")]
    pub no_gui: bool,
    #[serde(alias = "no_video")]
    pub no_video: bool,
    /// `"auto"` (or empty) probes the default candidate list.
    #[serde(alias = "ui_backend")]
    pub ui_backend: String,
    #[serde(alias = "video_backend")]
    pub video_backend: String,
    #[serde(alias = "init_retries")]
    pub init_retries: u32,
    #[serde(alias = "init_retry_interval_ms")]
    pub init_retry_interval_ms: u64,

    // Backend options
    #[serde(alias = "fbdev_device")]
    pub fbdev_device: String,
    #[serde(alias = "shm_path")]
    pub shm_path: String,

    /// Start capturing as soon as the service comes up.
    pub autostart: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            address:  String::new(),
            port:     DEFAULT_SINK_PORT,
            priority: DEFAULT_PRIORITY,
            origin:   "ambicast".to_owned(),
            read_timeout_ms:      10_000,
            reconnect_backoff_ms: 1_000,
            fps:    30,
            width:  320,
            height: 180,
            no_gui:   false,
            no_video: false,
            ui_backend:    "auto".to_owned(),
            video_backend: "auto".to_owned(),
            init_retries:           5,
            init_retry_interval_ms: 100,
            fbdev_device: "fb0".to_owned(),
            shm_path:     "/dev/shm/ambicast-video.nv21".to_owned(),
            autostart: false,
        }
    }
}

impl Settings {
    /// Load settings from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No settings at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let settings: Self = serde_json::from_str(&text)?;
        settings.validate()?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Persist to `path`, replacing the previous file atomically.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let json = serde_json::to_vec_pretty(self)?;
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        info!("Settings saved to {}", path.display());
        Ok(())
    }

    /// Overlay the keys present in `patch` onto these settings.
    ///
    /// On any error `self` is left untouched.
    pub fn merge_json(&mut self, patch: &serde_json::Value) -> Result<(), SettingsError> {
        let serde_json::Value::Object(patch) = patch else {
            return Err(SettingsError::Invalid { reason: "expected a JSON object".to_owned() });
        };
        let mut merged = serde_json::to_value(&*self)?;
        if let serde_json::Value::Object(current) = &mut merged {
            for (k, v) in patch {
                // Serialized keys are camelCase; an alias next to them would
                // be a duplicate field.
                current.insert(camel_case(k), v.clone());
            }
        }
        let candidate: Self = serde_json::from_value(merged)?;
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |reason: &str| Err(SettingsError::Invalid { reason: reason.to_owned() });
        if self.no_gui && self.no_video {
            return invalid("noGui and noVideo cannot both be set");
        }
        if self.width == 0 || self.height == 0 {
            return invalid("width and height must be non-zero");
        }
        if self.port == 0 {
            return invalid("port must be non-zero");
        }
        if self.reconnect_backoff_ms == 0 {
            return invalid("reconnectBackoffMs must be non-zero");
        }
        Ok(())
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            fps: self.fps,
            resolution_width: self.width,
            resolution_height: self.height,
            no_gui: self.no_gui,
            no_video: self.no_video,
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn init_retry_interval(&self) -> Duration {
        Duration::from_millis(self.init_retry_interval_ms)
    }
}

fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}
