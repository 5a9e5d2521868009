//! Capture backend contract.
//!
//! Every capture source (UI overlay or video plane) implements
//! [`CaptureBackend`]. Callers never drive an implementation directly: the
//! [`Backend`] handle owns it, tracks its [`BackendState`], and rejects calls
//! that are invalid for the current state.
//!
//! ```text
//! preinit(config)   validate only, no hardware I/O
//! init()            acquire hardware, publish FrameGeometry
//! start()           arm frame production
//! capture_frame()   overwrite RawBuffers with the latest frame
//! terminate()       stop hardware, release session handle
//! cleanup()         free buffers / unmap (idempotent)
//! ```

use ambicast_core::{BackendState, CaptureConfig, CaptureError, SourceKind};
use tracing::{debug, info, warn};

use crate::frame::{FrameGeometry, RawBuffers};

// ── Contract ──────────────────────────────────────────────────────────────────

/// One concrete capture mechanism.
///
/// Implementations may assume the call order enforced by [`Backend`].
pub trait CaptureBackend: Send {
    /// Which source this backend produces.
    fn kind(&self) -> SourceKind;

    /// Validate `config`. Must not touch hardware.
    fn preinit(&mut self, config: &CaptureConfig) -> Result<(), CaptureError>;

    /// Acquire hardware resources and allocate capture buffers.
    ///
    /// [`CaptureError::NotReady`] means the caller may retry later.
    fn init(&mut self) -> Result<FrameGeometry, CaptureError>;

    /// Begin producing frames.
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Copy the latest available frame into the backend-owned buffers.
    fn capture_frame(&mut self) -> Result<(), CaptureError>;

    /// The buffers filled by the last [`capture_frame`](Self::capture_frame).
    fn buffers(&self) -> RawBuffers<'_>;

    /// Stop production and release the hardware handle. Must be safe when
    /// `init` never completed.
    fn terminate(&mut self);

    /// Release heap buffers and memory mappings. Must be idempotent.
    fn cleanup(&mut self);
}

// ── Backend handle ────────────────────────────────────────────────────────────

/// Named, state-tracked owner of a [`CaptureBackend`].
pub struct Backend {
    name:     String,
    kind:     SourceKind,
    state:    BackendState,
    geometry: Option<FrameGeometry>,
    inner:    Box<dyn CaptureBackend>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("geometry", &self.geometry)
            .finish()
    }
}

impl Backend {
    pub fn new(name: impl Into<String>, inner: Box<dyn CaptureBackend>) -> Self {
        Self {
            name: name.into(),
            kind: inner.kind(),
            state: BackendState::Unconfigured,
            geometry: None,
            inner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn state(&self) -> BackendState {
        self.state
    }

    /// Geometry published by a successful `init`.
    pub fn geometry(&self) -> Option<FrameGeometry> {
        self.geometry
    }

    pub fn is_running(&self) -> bool {
        self.state == BackendState::Running
    }

    fn expect_state(&self, want: BackendState, operation: &'static str) -> Result<(), CaptureError> {
        if self.state == want {
            Ok(())
        } else {
            Err(CaptureError::InvalidState {
                backend: self.name.clone(),
                operation,
                state: self.state,
            })
        }
    }

    /// Record a failure; anything but `NotReady` is terminal.
    fn fail(&mut self, err: CaptureError) -> CaptureError {
        if !err.is_retryable() {
            self.state = BackendState::Failed;
        }
        err
    }

    pub fn preinit(&mut self, config: &CaptureConfig) -> Result<(), CaptureError> {
        self.expect_state(BackendState::Unconfigured, "preinit")?;
        let config = config.validated().map_err(|e| self.fail(e))?;
        self.inner.preinit(&config).map_err(|e| self.fail(e))?;
        self.state = BackendState::Configured;
        debug!("{} backend '{}' configured", self.kind, self.name);
        Ok(())
    }

    pub fn init(&mut self) -> Result<FrameGeometry, CaptureError> {
        self.expect_state(BackendState::Configured, "init")?;
        match self.inner.init() {
            Ok(geometry) => {
                info!(
                    "{} backend '{}' initialized: {} stride={}",
                    self.kind, self.name, geometry.resolution, geometry.stride
                );
                self.geometry = Some(geometry);
                self.state = BackendState::Initialized;
                Ok(geometry)
            }
            Err(e) if e.is_retryable() => {
                debug!("{} backend '{}' not ready: {}", self.kind, self.name, e);
                // Release whatever a partial init acquired before the retry.
                self.inner.terminate();
                self.inner.cleanup();
                Err(e)
            }
            Err(e) => {
                warn!("{} backend '{}' init failed: {}", self.kind, self.name, e);
                self.inner.terminate();
                self.inner.cleanup();
                Err(self.fail(e))
            }
        }
    }

    pub fn start(&mut self) -> Result<(), CaptureError> {
        self.expect_state(BackendState::Initialized, "start")?;
        if let Err(e) = self.inner.start() {
            warn!("{} backend '{}' start failed: {}", self.kind, self.name, e);
            self.inner.terminate();
            return Err(self.fail(e));
        }
        self.state = BackendState::Running;
        info!("{} backend '{}' started", self.kind, self.name);
        Ok(())
    }

    /// Capture one frame. `NotReady` leaves the backend running; any other
    /// error stops the hardware and moves it to `Failed`.
    pub fn capture_frame(&mut self) -> Result<(), CaptureError> {
        self.expect_state(BackendState::Running, "capture_frame")?;
        match self.inner.capture_frame() {
            Ok(()) => Ok(()),
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => {
                warn!("{} backend '{}' capture failed: {}", self.kind, self.name, e);
                self.inner.terminate();
                Err(self.fail(e))
            }
        }
    }

    pub fn buffers(&self) -> RawBuffers<'_> {
        match self.state {
            BackendState::Running => self.inner.buffers(),
            _ => RawBuffers::Empty,
        }
    }

    /// Stop hardware production. Safe in every state; repeated calls are no-ops.
    pub fn terminate(&mut self) {
        match self.state {
            BackendState::Stopped | BackendState::Failed => {}
            BackendState::Unconfigured => self.state = BackendState::Stopped,
            _ => {
                self.inner.terminate();
                self.state = BackendState::Stopped;
                info!("{} backend '{}' terminated", self.kind, self.name);
            }
        }
    }

    /// Release buffers. Safe in every state and idempotent.
    pub fn cleanup(&mut self) {
        self.inner.cleanup();
    }

    /// Mark the backend failed after an external cross-check (geometry).
    pub(crate) fn reject(&mut self, err: CaptureError) -> CaptureError {
        self.terminate();
        self.cleanup();
        self.state = BackendState::Failed;
        err
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        self.terminate();
        self.cleanup();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::frame::{OverlayLayout, OverlayPlane};
    use ambicast_core::Resolution;
    use std::sync::{Arc, Mutex};

    /// Scripted backend used across the crate's tests.
    pub(crate) struct MockBackend {
        pub kind: SourceKind,
        pub resolution: Resolution,
        /// Results returned by successive `init` calls; `Ok` once exhausted.
        pub init_script: Vec<Result<(), CaptureError>>,
        /// Same for `capture_frame`.
        pub capture_script: Vec<Result<(), CaptureError>>,
        pub log: Arc<Mutex<Vec<String>>>,
        pub plane: Option<OverlayPlane>,
        pub video: Option<crate::frame::VideoPlanes>,
    }

    impl MockBackend {
        pub(crate) fn new(kind: SourceKind, resolution: Resolution) -> Self {
            Self {
                kind,
                resolution,
                init_script: Vec::new(),
                capture_script: Vec::new(),
                log: Arc::default(),
                plane: None,
                video: None,
            }
        }

        fn record(&self, call: &str) {
            self.log.lock().unwrap().push(call.to_owned());
        }
    }

    impl CaptureBackend for MockBackend {
        fn kind(&self) -> SourceKind {
            self.kind
        }
        fn preinit(&mut self, _config: &CaptureConfig) -> Result<(), CaptureError> {
            self.record("preinit");
            Ok(())
        }
        fn init(&mut self) -> Result<FrameGeometry, CaptureError> {
            self.record("init");
            if !self.init_script.is_empty() {
                self.init_script.remove(0)?;
            }
            let stride = self.resolution.width as usize * 4;
            match self.kind {
                SourceKind::Ui => {
                    self.plane = Some(OverlayPlane::new(self.resolution, stride, OverlayLayout::Abgr))
                }
                SourceKind::Video => {
                    self.video = Some(crate::frame::VideoPlanes::new(self.resolution, stride))
                }
            }
            Ok(FrameGeometry { resolution: self.resolution, stride })
        }
        fn start(&mut self) -> Result<(), CaptureError> {
            self.record("start");
            Ok(())
        }
        fn capture_frame(&mut self) -> Result<(), CaptureError> {
            if self.capture_script.is_empty() {
                return Ok(());
            }
            self.capture_script.remove(0)
        }
        fn buffers(&self) -> RawBuffers<'_> {
            match (&self.plane, &self.video) {
                (Some(p), _) => RawBuffers::Overlay(p),
                (_, Some(v)) => RawBuffers::Video(v),
                _ => RawBuffers::Empty,
            }
        }
        fn terminate(&mut self) {
            self.record("terminate");
        }
        fn cleanup(&mut self) {
            self.record("cleanup");
            self.plane = None;
            self.video = None;
        }
    }

    fn cfg() -> CaptureConfig {
        CaptureConfig::default()
    }

    #[test]
    fn lifecycle_follows_state_machine() {
        let mut b = Backend::new("mock", Box::new(MockBackend::new(SourceKind::Ui, Resolution::HD)));
        assert_eq!(b.state(), BackendState::Unconfigured);
        b.preinit(&cfg()).expect("preinit");
        assert_eq!(b.state(), BackendState::Configured);
        let g = b.init().expect("init");
        assert_eq!(g.resolution, Resolution::HD);
        assert_eq!(b.state(), BackendState::Initialized);
        b.start().expect("start");
        assert!(b.is_running());
        assert!(matches!(b.buffers(), RawBuffers::Overlay(_)));
        b.terminate();
        assert_eq!(b.state(), BackendState::Stopped);
        assert!(matches!(b.buffers(), RawBuffers::Empty));
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut b = Backend::new("mock", Box::new(MockBackend::new(SourceKind::Ui, Resolution::HD)));
        b.preinit(&cfg()).unwrap();
        b.init().unwrap();
        b.start().unwrap();
        assert!(matches!(b.start(), Err(CaptureError::InvalidState { operation: "start", .. })));
    }

    #[test]
    fn not_ready_stays_configured_and_fatal_fails() {
        let mut mock = MockBackend::new(SourceKind::Video, Resolution::HD);
        mock.init_script = vec![
            Err(CaptureError::not_ready("buffers pending")),
            Err(CaptureError::fatal("driver gone")),
        ];
        let mut b = Backend::new("mock", Box::new(mock));
        b.preinit(&cfg()).unwrap();

        assert!(b.init().unwrap_err().is_retryable());
        assert_eq!(b.state(), BackendState::Configured);

        assert!(matches!(b.init(), Err(CaptureError::Fatal { .. })));
        assert_eq!(b.state(), BackendState::Failed);
        assert!(matches!(b.start(), Err(CaptureError::InvalidState { .. })));
    }

    #[test]
    fn fatal_capture_error_fails_the_backend() {
        let mut mock = MockBackend::new(SourceKind::Video, Resolution::HD);
        mock.capture_script = vec![
            Ok(()),
            Err(CaptureError::not_ready("no new frame")),
            Err(CaptureError::fatal("device unplugged")),
        ];
        let log = Arc::clone(&mock.log);
        let mut b = Backend::new("mock", Box::new(mock));
        b.preinit(&cfg()).unwrap();
        b.init().unwrap();
        b.start().unwrap();

        b.capture_frame().unwrap();
        assert!(b.capture_frame().unwrap_err().is_retryable());
        assert!(b.is_running());

        assert!(matches!(b.capture_frame(), Err(CaptureError::Fatal { .. })));
        assert_eq!(b.state(), BackendState::Failed);
        assert!(log.lock().unwrap().contains(&"terminate".to_owned()));
        assert!(matches!(b.buffers(), RawBuffers::Empty));
        assert!(matches!(
            b.capture_frame(),
            Err(CaptureError::InvalidState { operation: "capture_frame", .. })
        ));
    }

    #[test]
    fn preinit_rejects_degenerate_config() {
        let mut b = Backend::new("mock", Box::new(MockBackend::new(SourceKind::Ui, Resolution::HD)));
        let bad = CaptureConfig { no_gui: true, no_video: true, ..cfg() };
        assert!(matches!(b.preinit(&bad), Err(CaptureError::Config { .. })));
        assert_eq!(b.state(), BackendState::Failed);
    }

    #[test]
    fn terminate_and_cleanup_are_safe_without_init() {
        let mock = MockBackend::new(SourceKind::Ui, Resolution::HD);
        let log = Arc::clone(&mock.log);
        let mut b = Backend::new("mock", Box::new(mock));
        b.terminate();
        b.cleanup();
        b.cleanup();
        drop(b);
        let calls = log.lock().unwrap().clone();
        assert!(!calls.contains(&"terminate".to_owned()), "{calls:?}");
        assert!(calls.iter().filter(|c| *c == "cleanup").count() >= 2);
    }
}
