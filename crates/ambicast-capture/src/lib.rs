//! ambicast-capture: screen capture for the ambient-light sender.
//!
//! # Capture backends
//!
//! | Backend | Source | Status |
//! |---------|--------|--------|
//! | `fbdev` | UI overlay from `/dev/fbN` | ✓ |
//! | `shm` | NV21 video plane dumped by the platform capture daemon | ✓ |
//! | `testsrc-ui` / `testsrc-video` | synthetic patterns | ✓ |
//!
//! # Usage
//!
//! ```rust,no_run
//! use ambicast_capture::{BackendOptions, BackendRegistry, UnifiedCapture};
//! use ambicast_core::CaptureConfig;
//!
//! # fn example() -> Result<(), ambicast_core::CaptureError> {
//! let registry = BackendRegistry::builtin(BackendOptions::default());
//! let mut capture = UnifiedCapture::open(&registry, &CaptureConfig::default(), "auto", "auto")?;
//! capture.set_callback(|frame| {
//!     // frame.data: width × height × 3 bytes of packed RGB24
//! })?;
//! capture.start()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! BackendRegistry ──probe──► Backend (UI)    ─┐
//!                 ──probe──► Backend (video) ─┤  same geometry
//!                                             ▼
//!                 UnifiedCapture ── FramePacer thread ── tick:
//!                     capture_frame × 2
//!                       → NV21 ─► ARGB      (BT.709, limited range)
//!                       → ABGR/BGRA ─► ARGB
//!                       → blend (UI over video)
//!                       → RGB24 ─► FrameCallback
//! ```

pub mod backend;
pub mod backends;
pub mod cancel;
pub mod convert;
pub mod frame;
pub mod pacer;
pub mod registry;
pub mod unicapture;

pub use ambicast_core::{BackendState, CaptureConfig, CaptureError, Resolution, SourceKind};
pub use backend::{Backend, CaptureBackend};
pub use backends::{BackendOptions, FbdevOptions, ShmOptions};
pub use cancel::{CancelToken, PollPolicy};
pub use convert::PixelPipeline;
pub use frame::{FrameGeometry, OutputFrame, OverlayLayout, OverlayPlane, RawBuffers, VideoPlanes};
pub use pacer::{FramePacer, Metrics};
pub use registry::{is_auto, BackendRegistry, InitRetry, DEFAULT_UI_CANDIDATES, DEFAULT_VIDEO_CANDIDATES};
pub use unicapture::{FrameCallback, UnifiedCapture};
