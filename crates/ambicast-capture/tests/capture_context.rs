//! End-to-end capture tests over the built-in synthetic and file-backed
//! backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ambicast_capture::backends::shm::DumpHeader;
use ambicast_capture::{
    BackendOptions, BackendRegistry, CaptureBackend, CaptureConfig, CaptureError, FrameGeometry,
    InitRetry, PollPolicy, RawBuffers, Resolution, ShmOptions, SourceKind, UnifiedCapture,
};
use tempfile::TempDir;

fn config(width: u32, height: u32, fps: u32) -> CaptureConfig {
    CaptureConfig { fps, resolution_width: width, resolution_height: height, ..Default::default() }
}

fn write_dump(path: &std::path::Path, header: DumpHeader) {
    let mut buf = header.to_bytes().to_vec();
    buf.resize(header.file_len(), 128);
    std::fs::write(path, buf).unwrap();
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) {
    let end = Instant::now() + deadline;
    while !done() && Instant::now() < end {
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn synthetic_sources_stream_rgb24_until_stopped() {
    let registry = BackendRegistry::builtin(BackendOptions::default());
    let cfg = config(640, 360, 30);
    let mut capture = UnifiedCapture::open(&registry, &cfg, "testsrc-ui", "testsrc-video").unwrap();
    assert_eq!(capture.resolution(), Resolution::new(640, 360));
    assert_eq!(capture.video_backend_name(), Some("testsrc-video"));

    let count = Arc::new(AtomicUsize::new(0));
    let bad = Arc::new(AtomicUsize::new(0));
    let (c, b) = (Arc::clone(&count), Arc::clone(&bad));
    capture
        .set_callback(move |frame| {
            if frame.width != 640 || frame.height != 360 || frame.data.len() != 640 * 360 * 3 {
                b.fetch_add(1, Ordering::Relaxed);
            }
            c.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();

    capture.start().unwrap();
    // Two full 60-frame windows: the second measures steady state.
    let metrics = capture.metrics();
    wait_until(Duration::from_secs(15), || metrics.frames() >= 121);
    let fps = capture.framerate();
    assert!(capture.stop());
    assert!(!capture.is_running());

    assert!((fps - 30.0).abs() <= 1.5, "measured {fps} FPS");
    let delivered = count.load(Ordering::Relaxed);
    assert!(delivered >= 120, "only {delivered} frames");
    assert_eq!(bad.load(Ordering::Relaxed), 0);

    // The pacer thread was joined: no more ticks, no more callbacks.
    let ticks = metrics.frames();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(count.load(Ordering::Relaxed), delivered);
    assert_eq!(metrics.frames(), ticks);
}

#[test]
fn video_geometry_must_match_ui() {
    let dir = TempDir::new().unwrap();
    let dump = dir.path().join("video.nv21");
    write_dump(&dump, DumpHeader { width: 1280, height: 720, stride: 1280 });

    let options = BackendOptions {
        shm: ShmOptions { path: dump, poll: PollPolicy { interval: Duration::from_millis(5), max_attempts: 2 } },
        ..Default::default()
    };
    let registry = BackendRegistry::builtin(options);

    // The synthetic UI source follows the configuration (1920×1080).
    let err = UnifiedCapture::open(&registry, &config(1920, 1080, 30), "testsrc-ui", "shm");
    assert!(matches!(
        err,
        Err(CaptureError::DimensionMismatch { expected: Resolution::FHD, found: Resolution::HD, .. })
    ));

    // Matching geometry brings both up.
    let ctx = UnifiedCapture::open(&registry, &config(1280, 720, 30), "testsrc-ui", "shm").unwrap();
    assert_eq!(ctx.resolution(), Resolution::HD);
    assert_eq!(ctx.ui_backend_name(), Some("testsrc-ui"));
}

#[test]
fn failed_source_is_dropped_and_other_kept() {
    let dir = TempDir::new().unwrap();
    let options = BackendOptions {
        shm: ShmOptions {
            path: dir.path().join("never-written.nv21"),
            poll: PollPolicy { interval: Duration::from_millis(1), max_attempts: 1 },
        },
        ..Default::default()
    };
    let registry = BackendRegistry::builtin(options)
        .with_retry(InitRetry { attempts: 1, interval: Duration::from_millis(1) });

    let ctx = UnifiedCapture::open(&registry, &config(64, 36, 30), "testsrc-ui", "shm").unwrap();
    assert_eq!(ctx.ui_backend_name(), Some("testsrc-ui"));
    assert_eq!(ctx.video_backend_name(), None);
    assert!(!ctx.video_running());
}

#[test]
fn disabled_sources_are_not_probed() {
    let registry = BackendRegistry::builtin(BackendOptions::default());
    let cfg = CaptureConfig { no_video: true, ..config(64, 36, 30) };
    let ctx = UnifiedCapture::open(&registry, &cfg, "testsrc-ui", "does-not-exist").unwrap();
    assert_eq!(ctx.video_backend_name(), None);

    let both_off = CaptureConfig { no_gui: true, no_video: true, ..config(64, 36, 30) };
    assert!(matches!(
        UnifiedCapture::open(&registry, &both_off, "auto", "auto"),
        Err(CaptureError::Config { .. })
    ));
}

/// Backend defined outside the crate through the public trait.
struct Flaky {
    calls:    Arc<Mutex<u32>>,
    captures: Arc<AtomicUsize>,
}

impl CaptureBackend for Flaky {
    fn kind(&self) -> SourceKind {
        SourceKind::Video
    }
    fn preinit(&mut self, _config: &CaptureConfig) -> Result<(), CaptureError> {
        Ok(())
    }
    fn init(&mut self) -> Result<FrameGeometry, CaptureError> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        if *calls < 3 {
            return Err(CaptureError::not_ready("buffers not published"));
        }
        Ok(FrameGeometry { resolution: Resolution::new(4, 4), stride: 4 })
    }
    fn start(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }
    fn capture_frame(&mut self) -> Result<(), CaptureError> {
        self.captures.fetch_add(1, Ordering::Relaxed);
        Err(CaptureError::fatal("no signal"))
    }
    fn buffers(&self) -> RawBuffers<'_> {
        RawBuffers::Empty
    }
    fn terminate(&mut self) {}
    fn cleanup(&mut self) {}
}

#[test]
fn custom_backend_retries_and_failing_ticks_produce_nothing() {
    let calls = Arc::new(Mutex::new(0));
    let mut registry = BackendRegistry::new(BackendOptions::default())
        .with_retry(InitRetry { attempts: 5, interval: Duration::from_millis(1) });
    let captures = Arc::new(AtomicUsize::new(0));
    let (c, k) = (Arc::clone(&calls), Arc::clone(&captures));
    registry.register("flaky", SourceKind::Video, move |_| {
        Box::new(Flaky { calls: Arc::clone(&c), captures: Arc::clone(&k) })
    });

    let cfg = CaptureConfig { no_gui: true, ..config(4, 4, 100) };
    let mut ctx = UnifiedCapture::open(&registry, &cfg, "auto", "flaky").unwrap();
    assert_eq!(*calls.lock().unwrap(), 3);

    let frames = Arc::new(AtomicUsize::new(0));
    let f = Arc::clone(&frames);
    ctx.set_callback(move |_| {
        f.fetch_add(1, Ordering::Relaxed);
    })
    .unwrap();
    ctx.start().unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert!(ctx.stop());
    assert_eq!(frames.load(Ordering::Relaxed), 0);
    assert!(ctx.metrics().frames() > 1);

    // The fatal error is hit once; later ticks leave the failed backend alone.
    assert_eq!(captures.load(Ordering::Relaxed), 1);
    assert!(ctx.has_failed_backend());
    assert!(matches!(ctx.start(), Err(CaptureError::InvalidState { .. })));
}
