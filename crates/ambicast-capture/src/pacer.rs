//! Fixed-rate frame pacer.
//!
//! One dedicated OS thread per running capture context. Each iteration runs
//! the tick closure, then sleeps whatever is left of the frame interval. A
//! late tick is not compensated: the next one starts immediately, so drift
//! accumulates under sustained overrun.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info};

/// Frames per frame-rate measurement window.
pub const METRICS_WINDOW: u64 = 60;

// ── Metrics ───────────────────────────────────────────────────────────────────

/// Frame-rate estimate published by the pacer thread.
#[derive(Debug, Default)]
pub struct Metrics {
    framerate_bits: AtomicU64,
    frames:         AtomicU64,
}

impl Metrics {
    /// Frame rate measured over the last complete window (0 before the first).
    pub fn framerate(&self) -> f64 {
        f64::from_bits(self.framerate_bits.load(Ordering::Relaxed))
    }

    /// Total ticks since the context was created.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    fn publish(&self, fps: f64) {
        self.framerate_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    fn reset_framerate(&self) {
        self.publish(0.0);
    }
}

// ── FramePacer ────────────────────────────────────────────────────────────────

/// Configuration of one pacer thread.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    run:      Arc<AtomicBool>,
    metrics:  Arc<Metrics>,
}

impl FramePacer {
    /// `fps` must be non-zero (guaranteed by a validated `CaptureConfig`).
    pub fn new(fps: u32, run: Arc<AtomicBool>, metrics: Arc<Metrics>) -> Self {
        Self {
            interval: Duration::from_micros(1_000_000 / fps.max(1) as u64),
            run,
            metrics,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the pacer thread. It owns `state` while running and returns it
    /// from `join` once the run flag is cleared.
    pub fn spawn<T, F>(self, mut state: T, mut tick: F) -> std::io::Result<JoinHandle<T>>
    where
        T: Send + 'static,
        F: FnMut(&mut T) + Send + 'static,
    {
        thread::Builder::new()
            .name("ambicast-pacer".to_owned())
            .spawn(move || {
                self.run_loop(&mut state, &mut tick);
                state
            })
    }

    fn run_loop<T>(&self, state: &mut T, tick: &mut impl FnMut(&mut T)) {
        info!("Frame pacer started: interval={}µs", self.interval.as_micros());
        self.metrics.reset_framerate();

        let mut window_frames: u64 = 0;
        let mut window_start = Instant::now();

        while self.run.load(Ordering::Acquire) {
            let frame_start = Instant::now();
            tick(state);
            self.metrics.frames.fetch_add(1, Ordering::Relaxed);

            if let Some(wait) = self.interval.checked_sub(frame_start.elapsed()) {
                thread::sleep(wait);
            }

            window_frames += 1;
            if window_frames >= METRICS_WINDOW {
                let elapsed = window_start.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    let fps = window_frames as f64 / elapsed;
                    self.metrics.publish(fps);
                    debug!("framerate: {:.3} FPS", fps);
                }
                window_frames = 0;
                window_start = Instant::now();
            }
        }

        info!("Frame pacer stopped after {} frames", self.metrics.frames());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measured_rate_tracks_target() {
        let run = Arc::new(AtomicBool::new(true));
        let metrics = Arc::new(Metrics::default());
        let pacer = FramePacer::new(60, Arc::clone(&run), Arc::clone(&metrics));
        assert_eq!(pacer.interval(), Duration::from_micros(16_666));

        let handle = pacer.spawn(0u64, |n| *n += 1).expect("spawn pacer");
        let deadline = Instant::now() + Duration::from_secs(10);
        while metrics.framerate() == 0.0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        run.store(false, Ordering::Release);
        let ticks = handle.join().expect("pacer thread");

        let fps = metrics.framerate();
        assert!((fps - 60.0).abs() <= 60.0 * 0.05, "measured {fps} FPS");
        assert!(ticks >= METRICS_WINDOW);
        assert_eq!(ticks, metrics.frames());
    }

    #[test]
    fn overrunning_tick_runs_back_to_back() {
        let run = Arc::new(AtomicBool::new(true));
        let metrics = Arc::new(Metrics::default());
        // 1000 fps target with a 2ms tick: every tick is late, nothing sleeps.
        let pacer = FramePacer::new(1000, Arc::clone(&run), Arc::clone(&metrics));
        let r = Arc::clone(&run);
        let handle = pacer
            .spawn(0u32, move |n| {
                thread::sleep(Duration::from_millis(2));
                *n += 1;
                if *n == 10 {
                    r.store(false, Ordering::Release);
                }
            })
            .expect("spawn pacer");
        let start = Instant::now();
        assert_eq!(handle.join().expect("pacer thread"), 10);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn cleared_flag_prevents_any_tick() {
        let run = Arc::new(AtomicBool::new(false));
        let pacer = FramePacer::new(30, run, Arc::default());
        let handle = pacer.spawn(0u32, |n| *n += 1).expect("spawn pacer");
        assert_eq!(handle.join().expect("pacer thread"), 0);
    }
}
