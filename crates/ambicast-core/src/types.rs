use serde::{Deserialize, Serialize};

// MARK: - Resolution

/// Width × height of a captured or produced raster, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const HD: Self = Self { width: 1280, height: 720 };
    pub const FHD: Self = Self { width: 1920, height: 1080 };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn total_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Byte length of a tightly packed RGB24 raster of this size.
    pub fn rgb24_len(&self) -> usize {
        self.total_pixels() * 3
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}×{}", self.width, self.height)
    }
}

// MARK: - SourceKind

/// Which half of the composited picture a backend captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Graphics / OSD overlay plane.
    Ui,
    /// Hardware video scan-out plane.
    Video,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ui => write!(f, "UI"),
            Self::Video => write!(f, "video"),
        }
    }
}

// MARK: - BackendState

/// Lifecycle of a single capture backend instance.
///
/// ```text
/// Unconfigured ─preinit─► Configured ─init─► Initialized ─start─► Running ─terminate─► Stopped
///                             ▲   │
///                             └───┘ NotReady (retry later)
/// any Fatal / PermissionDenied ─────────────────────────────────► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendState {
    Unconfigured,
    Configured,
    Initialized,
    Running,
    Stopped,
    Failed,
}

impl BackendState {
    /// `Failed` and `Stopped` accept no further lifecycle calls except cleanup.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

impl std::fmt::Display for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unconfigured => "unconfigured",
            Self::Configured => "configured",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// MARK: - ConnectionState

/// State of the streaming client's connection to the lighting sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Registered,
    Streaming,
}

impl ConnectionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Registered | Self::Streaming)
    }

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Registered,
            3 => Self::Streaming,
            _ => Self::Disconnected,
        }
    }
}

/// Lock-free cell holding a [`ConnectionState`], shared between the
/// connection task and whoever polls status.
#[derive(Debug, Default)]
pub struct AtomicConnectionState(std::sync::atomic::AtomicU8);

impl AtomicConnectionState {
    pub fn new(state: ConnectionState) -> Self {
        Self(std::sync::atomic::AtomicU8::new(state.as_u8()))
    }

    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(std::sync::atomic::Ordering::Acquire))
    }

    pub fn store(&self, state: ConnectionState) {
        self.0.store(state.as_u8(), std::sync::atomic::Ordering::Release);
    }
}
