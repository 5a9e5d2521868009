//! Unified capture context.
//!
//! Owns at most one UI and one video backend of identical geometry, the
//! pixel pipeline, and the output callback. While running, all of them
//! live on the pacer thread:
//!
//! ```text
//!             ┌──────────────── pacer thread ────────────────┐
//!  UI  ──────►│ capture_frame ─┐                              │
//!             │                ├─► PixelPipeline ─► callback ─┼─► RGB24
//!  video ────►│ capture_frame ─┘                              │
//!             └──────────────────────────────────────────────┘
//! ```
//!
//! `stop` joins the thread and takes the session back, so buffers are never
//! released while a tick could still read them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use ambicast_core::{BackendState, CaptureConfig, CaptureError, Resolution, SourceKind};
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::convert::PixelPipeline;
use crate::frame::{OutputFrame, RawBuffers};
use crate::pacer::{FramePacer, Metrics};
use crate::registry::BackendRegistry;

/// Receives every produced frame on the pacer thread.
pub type FrameCallback = Box<dyn FnMut(&OutputFrame<'_>) + Send>;

/// Consecutive capture failures between repeated warnings.
const FAILURE_LOG_EVERY: u32 = 100;

// ── Session (pacer-thread state) ──────────────────────────────────────────────

struct Session {
    ui:             Option<Backend>,
    video:          Option<Backend>,
    pipeline:       PixelPipeline,
    callback:       Option<FrameCallback>,
    ui_failures:    u32,
    video_failures: u32,
}

impl Session {
    fn backends_mut(&mut self) -> impl Iterator<Item = &mut Backend> {
        self.ui.iter_mut().chain(self.video.iter_mut())
    }

    fn tick(&mut self) {
        let Session { ui, video, pipeline, callback, ui_failures, video_failures } = self;

        let ui_ok = ui.as_mut().is_some_and(|b| capture(b, ui_failures));
        let video_ok = video.as_mut().is_some_and(|b| capture(b, video_failures));

        let overlay = match ui.as_ref().filter(|_| ui_ok).map(Backend::buffers) {
            Some(RawBuffers::Overlay(plane)) => Some(plane),
            _ => None,
        };
        let planes = match video.as_ref().filter(|_| video_ok).map(Backend::buffers) {
            Some(RawBuffers::Video(planes)) => Some(planes),
            _ => None,
        };
        if overlay.is_none() && planes.is_none() {
            return;
        }

        let res = pipeline.resolution();
        match pipeline.process(overlay, planes) {
            Ok(rgb) => {
                if let Some(cb) = callback.as_mut() {
                    cb(&OutputFrame { width: res.width, height: res.height, data: rgb });
                }
            }
            Err(e) => warn!("Frame conversion failed: {e}"),
        }
    }
}

fn capture(backend: &mut Backend, failures: &mut u32) -> bool {
    // A failed backend was already reported and its hardware released.
    if backend.state().is_terminal() {
        return false;
    }
    match backend.capture_frame() {
        Ok(()) => {
            if *failures > 0 {
                debug!("{} capture recovered after {} failures", backend.kind(), failures);
            }
            *failures = 0;
            true
        }
        Err(e) => {
            *failures += 1;
            if *failures == 1 || *failures % FAILURE_LOG_EVERY == 0 {
                warn!(
                    "{} capture via '{}' failed ({} in a row): {e}",
                    backend.kind(),
                    backend.name(),
                    failures
                );
            }
            false
        }
    }
}

// ── UnifiedCapture ────────────────────────────────────────────────────────────

pub struct UnifiedCapture {
    config:     CaptureConfig,
    resolution: Resolution,
    ui_name:    Option<String>,
    video_name: Option<String>,
    /// `None` while the pacer thread owns it, or after a failed spawn.
    session:    Option<Session>,
    worker:     Option<JoinHandle<Session>>,
    run:        Arc<AtomicBool>,
    metrics:    Arc<Metrics>,
}

impl UnifiedCapture {
    /// Build a context from already initialized backends.
    pub fn new(
        config: &CaptureConfig,
        ui: Option<Backend>,
        video: Option<Backend>,
    ) -> Result<Self, CaptureError> {
        let config = config.validated()?;

        let geometry = |b: &Option<Backend>| -> Result<Option<Resolution>, CaptureError> {
            match b {
                None => Ok(None),
                Some(b) => b.geometry().map(|g| Some(g.resolution)).ok_or_else(|| {
                    CaptureError::InvalidState {
                        backend: b.name().to_owned(),
                        operation: "join a capture context",
                        state: b.state(),
                    }
                }),
            }
        };

        let resolution = match (geometry(&ui)?, geometry(&video)?) {
            (Some(u), Some(v)) if u != v => {
                return Err(CaptureError::DimensionMismatch {
                    kind: SourceKind::Video,
                    expected: u,
                    found: v,
                })
            }
            (Some(r), _) | (None, Some(r)) => r,
            (None, None) => return Err(CaptureError::config("no capture source available")),
        };

        info!(
            "Capture context: {} ui={} video={}",
            resolution,
            ui.as_ref().map_or("-", |b| b.name()),
            video.as_ref().map_or("-", |b| b.name())
        );

        Ok(Self {
            config,
            resolution,
            ui_name: ui.as_ref().map(|b| b.name().to_owned()),
            video_name: video.as_ref().map(|b| b.name().to_owned()),
            session: Some(Session {
                ui,
                video,
                pipeline: PixelPipeline::new(resolution),
                callback: None,
                ui_failures: 0,
                video_failures: 0,
            }),
            worker: None,
            run: Arc::new(AtomicBool::new(false)),
            metrics: Arc::default(),
        })
    }

    /// Resolve both sources through `registry` and build a context.
    ///
    /// A source that cannot be brought up is disabled with a warning; the
    /// video source must match the UI geometry. Fails when neither source is
    /// usable or on a dimension mismatch.
    pub fn open(
        registry: &BackendRegistry,
        config: &CaptureConfig,
        ui_selection: &str,
        video_selection: &str,
    ) -> Result<Self, CaptureError> {
        let config = config.validated()?;
        let mut last_err = None;

        let ui = if config.wants(SourceKind::Ui) {
            match registry.select(ui_selection, SourceKind::Ui, &config, None) {
                Ok(b) => Some(b),
                Err(e) => {
                    warn!("UI capture disabled: {e}");
                    last_err = Some(e);
                    None
                }
            }
        } else {
            None
        };

        let expected = ui.as_ref().and_then(Backend::geometry).map(|g| g.resolution);
        let video = if config.wants(SourceKind::Video) {
            match registry.select(video_selection, SourceKind::Video, &config, expected) {
                Ok(b) => Some(b),
                Err(e @ CaptureError::DimensionMismatch { .. }) => return Err(e),
                Err(e) => {
                    warn!("Video capture disabled: {e}");
                    last_err = Some(e);
                    None
                }
            }
        } else {
            None
        };

        if ui.is_none() && video.is_none() {
            return Err(last_err.unwrap_or_else(|| CaptureError::config("no capture source enabled")));
        }
        Self::new(&config, ui, video)
    }

    /// Install the frame callback. Rejected while running.
    pub fn set_callback<F>(&mut self, callback: F) -> Result<(), CaptureError>
    where
        F: FnMut(&OutputFrame<'_>) + Send + 'static,
    {
        if self.is_running() {
            return Err(CaptureError::AlreadyRunning);
        }
        let session = self.session_mut()?;
        session.callback = Some(Box::new(callback));
        Ok(())
    }

    /// Start any backend not yet running, then spawn the pacer thread.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.is_running() {
            return Err(CaptureError::AlreadyRunning);
        }
        let session = self.session_mut()?;
        for backend in session.backends_mut() {
            if !backend.is_running() {
                backend.start()?;
            }
        }

        let Some(session) = self.session.take() else {
            return Err(CaptureError::fatal("capture context has no session"));
        };
        self.run.store(true, Ordering::Release);
        let pacer = FramePacer::new(self.config.fps, Arc::clone(&self.run), Arc::clone(&self.metrics));
        match pacer.spawn(session, Session::tick) {
            Ok(handle) => {
                self.worker = Some(handle);
                info!("Capture started at {} FPS", self.config.fps);
                Ok(())
            }
            Err(e) => {
                // The session was moved into the failed spawn and is gone.
                self.run.store(false, Ordering::Release);
                error!("Failed to spawn pacer thread: {e}");
                Err(CaptureError::fatal(format!("spawn pacer thread: {e}")))
            }
        }
    }

    /// Stop the pacer and join it. Returns `false` if it was not running.
    ///
    /// Backends stay running so a later `start` resumes immediately.
    pub fn stop(&mut self) -> bool {
        let Some(handle) = self.worker.take() else {
            return false;
        };
        self.run.store(false, Ordering::Release);
        match handle.join() {
            Ok(session) => self.session = Some(session),
            Err(_) => error!("Pacer thread panicked; capture session lost"),
        }
        info!("Capture stopped");
        true
    }

    /// Stop and terminate every backend.
    pub fn terminate(&mut self) {
        self.stop();
        if let Some(session) = self.session.as_mut() {
            session.backends_mut().for_each(Backend::terminate);
        }
    }

    /// Release backend buffers. Idempotent.
    pub fn cleanup(&mut self) {
        self.stop();
        if let Some(session) = self.session.as_mut() {
            session.backends_mut().for_each(Backend::cleanup);
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn ui_running(&self) -> bool {
        self.is_running() && self.ui_name.is_some()
    }

    pub fn video_running(&self) -> bool {
        self.is_running() && self.video_name.is_some()
    }

    /// Whether a backend hit an unrecoverable capture error. Only known
    /// while stopped; such a context cannot be started again.
    pub fn has_failed_backend(&self) -> bool {
        self.session.as_ref().is_some_and(|s| {
            s.ui.iter().chain(s.video.iter()).any(|b| b.state() == BackendState::Failed)
        })
    }

    pub fn ui_backend_name(&self) -> Option<&str> {
        self.ui_name.as_deref()
    }

    pub fn video_backend_name(&self) -> Option<&str> {
        self.video_name.as_deref()
    }

    /// Output raster size shared by both sources.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn framerate(&self) -> f64 {
        self.metrics.framerate()
    }

    fn session_mut(&mut self) -> Result<&mut Session, CaptureError> {
        self.session
            .as_mut()
            .ok_or_else(|| CaptureError::fatal("capture context lost its session"))
    }
}

impl Drop for UnifiedCapture {
    fn drop(&mut self) {
        self.terminate();
        self.cleanup();
    }
}
