//! Service orchestrator.
//!
//! Wires [`Settings`] into a [`UnifiedCapture`] context and a
//! [`StreamingClient`], and reacts to power and display-output events.
//!
//! ```text
//!  Settings ──► BackendRegistry ──► UnifiedCapture ── FrameCallback ──┐
//!                                                                     ▼
//!  power / display events ──► Service ──────────────► StreamingClient ──► sink
//! ```
//!
//! Requires a multi-threaded tokio runtime: the pacer thread pushes frames
//! through `Handle::block_on` while the runtime drives the socket.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use ambicast_capture::{
    BackendOptions, BackendRegistry, CancelToken, FbdevOptions, InitRetry, OutputFrame, ShmOptions,
    UnifiedCapture,
};
use ambicast_core::{Settings, StreamError};
use ambicast_transport_client::{ClientSettings, StreamingClient};
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::ServiceError;

/// Failed pushes between repeated warnings.
const PUSH_FAILURE_LOG_EVERY: u32 = 100;

type ClientSlot = Arc<Mutex<Option<Arc<StreamingClient>>>>;

// ── Status ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub is_running:    bool,
    pub connected:     bool,
    pub video_backend: Option<String>,
    pub video_running: bool,
    pub ui_backend:    Option<String>,
    pub ui_running:    bool,
    pub framerate:     f64,
}

/// Display output dynamic range reported by the platform.
pub fn is_hdr(hdr_type: &str) -> bool {
    matches!(hdr_type, "HDR10" | "DolbyVision")
}

// ── Service ───────────────────────────────────────────────────────────────────

pub struct Service {
    settings:      Settings,
    settings_path: Option<PathBuf>,
    runtime:       Handle,
    cancel:        CancelToken,
    capture:       Option<UnifiedCapture>,
    client:        ClientSlot,
    running:       bool,
    power_paused:  bool,
    hdr:           Option<bool>,
    /// Capture settings changed while running; reopen after the next stop.
    capture_stale: bool,
}

impl Service {
    /// Create the service and probe capture backends.
    ///
    /// A probe failure is logged, not returned: `start` probes again, so a
    /// platform that is still booting recovers on its own.
    pub async fn new(settings: Settings, settings_path: Option<PathBuf>) -> Self {
        let mut service = Self {
            settings,
            settings_path,
            runtime: Handle::current(),
            cancel: CancelToken::new(),
            capture: None,
            client: Arc::default(),
            running: false,
            power_paused: false,
            hdr: None,
            capture_stale: false,
        };
        if let Err(e) = service.ensure_capture().await {
            warn!("Capture backends not available yet: {e}");
        }
        service
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_power_paused(&self) -> bool {
        self.power_paused
    }

    pub fn status(&self) -> ServiceStatus {
        let capture = self.capture.as_ref();
        ServiceStatus {
            is_running:    self.running,
            connected:     self.current_client().is_some_and(|c| c.is_connected()),
            video_backend: capture.and_then(|c| c.video_backend_name()).map(str::to_owned),
            video_running: capture.is_some_and(|c| c.video_running()),
            ui_backend:    capture.and_then(|c| c.ui_backend_name()).map(str::to_owned),
            ui_running:    capture.is_some_and(|c| c.ui_running()),
            framerate:     capture.map_or(0.0, |c| c.framerate()),
        }
    }

    // ── Start / stop ──────────────────────────────────────────────────────────

    /// Start capture, then the streaming client. If capture cannot start
    /// the service stays stopped.
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        if self.running {
            return Err(ServiceError::AlreadyRunning);
        }
        if self.settings.address.trim().is_empty() {
            return Err(ServiceError::Config("no sink address configured".to_owned()));
        }

        self.ensure_capture().await?;
        let capture = self
            .capture
            .as_mut()
            .ok_or_else(|| ServiceError::Config("no capture context".to_owned()))?;
        capture.set_callback(frame_forwarder(Arc::clone(&self.client)))?;
        capture.start()?;

        let client = Arc::new(StreamingClient::spawn(
            ClientSettings::from_settings(&self.settings),
            self.runtime.clone(),
        ));
        if let Some(hdr) = self.hdr {
            // Not connected yet; remembered and sent after registration.
            let _ = client.set_hdr(hdr).await;
        }
        *lock_slot(&self.client) = Some(client);

        self.running = true;
        info!("Service started");
        Ok(())
    }

    /// Stop capture, then shut the streaming client down.
    pub async fn stop(&mut self) -> Result<(), ServiceError> {
        if !self.running {
            return Err(ServiceError::NotRunning);
        }
        self.running = false;

        let mut result = Ok(());
        let stale = std::mem::take(&mut self.capture_stale);
        if let Some(mut capture) = self.capture.take() {
            // Joining the pacer (and tearing down a stale context) blocks;
            // keep it off the runtime workers.
            let joined = tokio::task::spawn_blocking(move || {
                capture.stop();
                if stale || capture.has_failed_backend() {
                    debug!("Capture context outdated, releasing it for the next start");
                    drop(capture);
                    None
                } else {
                    Some(capture)
                }
            })
            .await;
            match joined {
                Ok(capture) => self.capture = capture,
                Err(e) => result = Err(ServiceError::from(e)),
            }
        }

        let client = lock_slot(&self.client).take();
        if let Some(client) = client {
            match Arc::try_unwrap(client) {
                Ok(client) => client.shutdown().await,
                Err(shared) => drop(shared),
            }
        }
        info!("Service stopped");
        result
    }

    /// Stop if running and release every backend.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if self.running {
            if let Err(e) = self.stop().await {
                warn!("Stop during shutdown failed: {e}");
            }
        }
        if let Some(capture) = self.capture.take() {
            if let Err(e) = tokio::task::spawn_blocking(move || drop(capture)).await {
                warn!("Capture teardown failed: {e}");
            }
        }
        info!("Service shut down");
    }

    // ── Platform events ───────────────────────────────────────────────────────

    /// Pause on standby, resume when the display becomes active again.
    ///
    /// Active means `state == "Active"` with no `processing` marker. Only a
    /// pause made here is resumed here.
    pub async fn on_power_state(&mut self, state: &str, processing: bool) -> Result<(), ServiceError> {
        let active = state == "Active" && !processing;
        debug!("Power state {state} (processing={processing}) → active={active}");

        if !self.running && active && self.power_paused {
            info!("Display active again, resuming capture");
            self.power_paused = false;
            return self.start().await;
        }
        if self.running && !active && !self.power_paused {
            info!("Display going to standby, pausing capture");
            self.power_paused = true;
            return self.stop().await;
        }
        Ok(())
    }

    /// Forward the display's dynamic range to the sink's HDR component.
    pub async fn on_video_output(&mut self, hdr_type: &str) -> bool {
        let hdr = is_hdr(hdr_type);
        info!("Video output {hdr_type} → {}", if hdr { "HDR" } else { "SDR" });
        self.hdr = Some(hdr);

        if let Some(client) = self.current_client() {
            match client.set_hdr(hdr).await {
                Ok(()) | Err(StreamError::NotConnected) => {}
                Err(e) => warn!("Failed to forward HDR state: {e}"),
            }
        }
        hdr
    }

    // ── Settings ──────────────────────────────────────────────────────────────

    /// Merge `patch` into the settings, validate, and persist.
    ///
    /// Takes effect on the next start. A rejected patch leaves the settings
    /// unchanged.
    pub fn set_settings(&mut self, patch: &serde_json::Value) -> Result<(), ServiceError> {
        let before = self.settings.clone();
        self.settings.merge_json(patch)?;
        self.after_settings_change(&before);
        Ok(())
    }

    /// Restore defaults and persist.
    pub fn reset_settings(&mut self) {
        let before = std::mem::take(&mut self.settings);
        self.after_settings_change(&before);
    }

    fn after_settings_change(&mut self, before: &Settings) {
        if let Some(path) = &self.settings_path {
            if let Err(e) = self.settings.save(path) {
                warn!("Settings save failed: {e}");
            }
        }
        let capture_changed = before.capture_config() != self.settings.capture_config()
            || before.ui_backend != self.settings.ui_backend
            || before.video_backend != self.settings.video_backend
            || before.fbdev_device != self.settings.fbdev_device
            || before.shm_path != self.settings.shm_path;
        if !capture_changed {
            return;
        }
        if self.running {
            info!("Capture settings changed; applied after the next stop");
            self.capture_stale = true;
        } else {
            // Re-probe with the new configuration on the next start.
            self.capture = None;
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn current_client(&self) -> Option<Arc<StreamingClient>> {
        lock_slot(&self.client).clone()
    }

    async fn ensure_capture(&mut self) -> Result<(), ServiceError> {
        if self.capture.is_some() {
            return Ok(());
        }
        let settings = self.settings.clone();
        let cancel = self.cancel.clone();
        // Probing may sleep while waiting for hardware.
        let capture = tokio::task::spawn_blocking(move || {
            let registry = build_registry(&settings, cancel);
            UnifiedCapture::open(
                &registry,
                &settings.capture_config(),
                &settings.ui_backend,
                &settings.video_backend,
            )
        })
        .await??;
        self.capture = Some(capture);
        Ok(())
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        self.cancel.cancel();
        lock_slot(&self.client).take();
    }
}

/// Registry of the built-in backends configured from `settings`.
pub fn build_registry(settings: &Settings, cancel: CancelToken) -> BackendRegistry {
    let defaults = BackendOptions::default();
    let options = BackendOptions {
        fbdev: FbdevOptions { device: settings.fbdev_device.clone(), ..defaults.fbdev },
        shm: ShmOptions { path: PathBuf::from(&settings.shm_path), ..defaults.shm },
        cancel,
    };
    BackendRegistry::builtin(options).with_retry(InitRetry {
        attempts: settings.init_retries.max(1),
        interval: settings.init_retry_interval(),
    })
}

fn lock_slot(slot: &ClientSlot) -> std::sync::MutexGuard<'_, Option<Arc<StreamingClient>>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Frame callback pushing every frame to whichever client is current.
fn frame_forwarder(slot: ClientSlot) -> impl FnMut(&OutputFrame<'_>) + Send + 'static {
    let mut failures: u32 = 0;
    move |frame: &OutputFrame<'_>| {
        let Some(client) = lock_slot(&slot).clone() else {
            return;
        };
        if !client.is_connected() {
            return;
        }
        match client.push_frame_blocking(frame.width, frame.height, frame.data) {
            Ok(()) => failures = 0,
            Err(e) => {
                failures += 1;
                if failures == 1 || failures % PUSH_FAILURE_LOG_EVERY == 0 {
                    warn!("Frame push failed ({failures} in a row): {e}");
                }
            }
        }
    }
}
