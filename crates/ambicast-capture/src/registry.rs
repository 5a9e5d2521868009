//! Backend registry and prober.
//!
//! Maps backend names to factories and brings backends up to the
//! `Initialized` state, either by explicit name or by walking an ordered
//! candidate list until one succeeds.

use std::collections::BTreeMap;
use std::time::Duration;

use ambicast_core::{CaptureConfig, CaptureError, Resolution, SourceKind};
use tracing::{info, warn};

use crate::backend::{Backend, CaptureBackend};
use crate::backends::{BackendOptions, FbdevBackend, ShmBackend, TestPattern};

/// Candidates tried for the UI source when the selection is `auto`.
pub const DEFAULT_UI_CANDIDATES: &[&str] = &["fbdev"];
/// Candidates tried for the video source when the selection is `auto`.
pub const DEFAULT_VIDEO_CANDIDATES: &[&str] = &["shm"];

/// `""` and `"auto"` both mean "probe the default candidates".
pub fn is_auto(selection: &str) -> bool {
    selection.is_empty() || selection.eq_ignore_ascii_case("auto")
}

pub fn default_candidates(kind: SourceKind) -> &'static [&'static str] {
    match kind {
        SourceKind::Ui => DEFAULT_UI_CANDIDATES,
        SourceKind::Video => DEFAULT_VIDEO_CANDIDATES,
    }
}

pub type BackendFactory = Box<dyn Fn(&BackendOptions) -> Box<dyn CaptureBackend> + Send + Sync>;

struct Entry {
    kind:    SourceKind,
    factory: BackendFactory,
}

/// Retry budget for `init` returning `NotReady`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitRetry {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for InitRetry {
    fn default() -> Self {
        Self { attempts: 5, interval: Duration::from_millis(100) }
    }
}

pub struct BackendRegistry {
    entries: BTreeMap<String, Entry>,
    options: BackendOptions,
    retry:   InitRetry,
}

impl BackendRegistry {
    /// Empty registry.
    pub fn new(options: BackendOptions) -> Self {
        Self { entries: BTreeMap::new(), options, retry: InitRetry::default() }
    }

    /// Registry with `fbdev`, `shm`, `testsrc-ui` and `testsrc-video`.
    pub fn builtin(options: BackendOptions) -> Self {
        let mut reg = Self::new(options);
        reg.register("fbdev", SourceKind::Ui, |o| Box::new(FbdevBackend::new(o.fbdev.clone())));
        reg.register("shm", SourceKind::Video, |o| {
            Box::new(ShmBackend::new(o.shm.clone(), o.cancel.clone()))
        });
        reg.register("testsrc-ui", SourceKind::Ui, |_| Box::new(TestPattern::new(SourceKind::Ui)));
        reg.register("testsrc-video", SourceKind::Video, |_| {
            Box::new(TestPattern::new(SourceKind::Video))
        });
        reg
    }

    pub fn with_retry(mut self, retry: InitRetry) -> Self {
        self.retry = retry;
        self
    }

    /// Register (or replace) a named backend.
    pub fn register<F>(&mut self, name: &str, kind: SourceKind, factory: F)
    where
        F: Fn(&BackendOptions) -> Box<dyn CaptureBackend> + Send + Sync + 'static,
    {
        self.entries.insert(name.to_owned(), Entry { kind, factory: Box::new(factory) });
    }

    pub fn names(&self, kind: SourceKind) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.kind == kind)
            .map(|(n, _)| n.as_str())
            .collect()
    }

    pub fn options(&self) -> &BackendOptions {
        &self.options
    }

    /// Construct an unconfigured backend by name.
    pub fn create(&self, name: &str) -> Result<Backend, CaptureError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| CaptureError::UnknownBackend { name: name.to_owned() })?;
        Ok(Backend::new(name, (entry.factory)(&self.options)))
    }

    /// Bring the named backend to `Initialized`.
    ///
    /// `NotReady` from `init` is retried within the [`InitRetry`] budget.
    /// When `expected` is given, a backend publishing any other resolution is
    /// torn down and `DimensionMismatch` returned.
    pub fn init_backend(
        &self,
        name: &str,
        kind: SourceKind,
        config: &CaptureConfig,
        expected: Option<Resolution>,
    ) -> Result<Backend, CaptureError> {
        let mut backend = self.create(name)?;
        if backend.kind() != kind {
            return Err(CaptureError::config(format!(
                "backend '{name}' captures {}, not {kind}",
                backend.kind()
            )));
        }
        backend.preinit(config)?;

        let mut attempt = 1;
        let geometry = loop {
            match backend.init() {
                Ok(g) => break g,
                Err(e) if e.is_retryable() && attempt < self.retry.attempts => {
                    attempt += 1;
                    if self.options.cancel.wait_timeout(self.retry.interval) {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        };

        if let Some(expected) = expected {
            if geometry.resolution != expected {
                return Err(backend.reject(CaptureError::DimensionMismatch {
                    kind,
                    expected,
                    found: geometry.resolution,
                }));
            }
        }
        Ok(backend)
    }

    /// Try `candidates` in order and return the first that initializes.
    ///
    /// A dimension mismatch is returned immediately: a different candidate of
    /// the same source would not fix the sibling's geometry.
    pub fn try_backends(
        &self,
        candidates: &[&str],
        kind: SourceKind,
        config: &CaptureConfig,
        expected: Option<Resolution>,
    ) -> Result<Backend, CaptureError> {
        for name in candidates {
            match self.init_backend(name, kind, config, expected) {
                Ok(backend) => {
                    info!("{kind} backend '{name}' selected");
                    return Ok(backend);
                }
                Err(e @ CaptureError::DimensionMismatch { .. }) => return Err(e),
                Err(e) => warn!("{kind} backend '{name}' unavailable: {e}"),
            }
        }
        Err(CaptureError::NoBackendAvailable { kind })
    }

    /// Resolve a user selection: `auto` probes the defaults, anything else is
    /// initialized by name and its failure is final.
    pub fn select(
        &self,
        selection: &str,
        kind: SourceKind,
        config: &CaptureConfig,
        expected: Option<Resolution>,
    ) -> Result<Backend, CaptureError> {
        if is_auto(selection) {
            self.try_backends(default_candidates(kind), kind, config, expected)
        } else {
            self.init_backend(selection, kind, config, expected)
        }
    }
}
