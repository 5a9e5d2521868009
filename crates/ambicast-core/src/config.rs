use serde::{Deserialize, Serialize};

use crate::errors::CaptureError;
use crate::types::{Resolution, SourceKind};

/// Frame rate substituted when a caller asks for `fps == 0` (unlimited).
pub const DEFAULT_FPS: u32 = 60;

/// Capture configuration shared by every backend of one capture session.
///
/// Immutable once a backend has been initialised with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub fps: u32,
    #[serde(alias = "resolutionWidth", alias = "width")]
    pub resolution_width: u32,
    #[serde(alias = "resolutionHeight", alias = "height")]
    pub resolution_height: u32,
    #[serde(alias = "noGui")]
    pub no_gui: bool,
    #[serde(alias = "noVideo")]
    pub no_video: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            resolution_width: 320,
            resolution_height: 180,
            no_gui: false,
            no_video: false,
        }
    }
}

impl CaptureConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.resolution_width, self.resolution_height)
    }

    /// Whether `kind` is enabled by this configuration.
    pub fn wants(&self, kind: SourceKind) -> bool {
        match kind {
            SourceKind::Ui => !self.no_gui,
            SourceKind::Video => !self.no_video,
        }
    }

    /// Validate and normalise the configuration.
    ///
    /// `fps == 0` becomes [`DEFAULT_FPS`]; a zero-sized resolution or both
    /// sources disabled is a [`CaptureError::Config`].
    pub fn validated(&self) -> Result<Self, CaptureError> {
        if self.no_gui && self.no_video {
            return Err(CaptureError::config(
                "neither UI nor video capture is enabled; enable at least one",
            ));
        }
        if self.resolution().is_empty() {
            return Err(CaptureError::config(format!(
                "resolution must be non-zero, got {}",
                self.resolution()
            )));
        }
        let mut cfg = self.clone();
        if cfg.fps == 0 {
            cfg.fps = DEFAULT_FPS;
        }
        Ok(cfg)
    }

    /// Target inter-frame interval in microseconds.
    pub fn frame_interval_us(&self) -> u64 {
        1_000_000 / self.fps.max(1) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_both_sources_disabled() {
        let cfg = CaptureConfig { no_gui: true, no_video: true, ..Default::default() };
        assert!(matches!(cfg.validated(), Err(CaptureError::Config { .. })));
    }

    #[test]
    fn rejects_zero_resolution() {
        let cfg = CaptureConfig { resolution_width: 0, ..Default::default() };
        assert!(matches!(cfg.validated(), Err(CaptureError::Config { .. })));
    }

    #[test]
    fn zero_fps_is_normalised() {
        let cfg = CaptureConfig { fps: 0, ..Default::default() };
        let cfg = cfg.validated().expect("valid config");
        assert_eq!(cfg.fps, DEFAULT_FPS);
        assert_eq!(cfg.frame_interval_us(), 16_666);
    }

    #[test]
    fn deserializes_camel_case_fields() {
        let json = r#"{"fps": 25, "resolutionWidth": 640, "resolutionHeight": 360, "noGui": true}"#;
        let cfg: CaptureConfig = serde_json::from_str(json).expect("valid camelCase config");
        assert_eq!(cfg.fps, 25);
        assert_eq!(cfg.resolution(), Resolution::new(640, 360));
        assert!(cfg.no_gui);
        assert!(!cfg.no_video);
        assert!(!cfg.wants(SourceKind::Ui));
    }
}
