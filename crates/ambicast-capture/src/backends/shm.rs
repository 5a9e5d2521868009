//! Video capture from a shared-memory NV21 dump.
//!
//! A platform capture daemon publishes the decoded video plane into a file
//! (normally under `/dev/shm`) and rewrites it in place every frame:
//!
//! ```text
//! ┌────────┬──────────┬───────────┬───────────┬──────────────────┬─────────────────────────┐
//! │ "NV21" │ width LE │ height LE │ stride LE │ luma stride × h  │ chroma stride × ⌈h/2⌉   │
//! │ 4 B    │ u32      │ u32       │ u32       │                  │ V,U interleaved         │
//! └────────┴──────────┴───────────┴───────────┴──────────────────┴─────────────────────────┘
//! ```
//!
//! Until the daemon has published a complete first frame, `init` polls the
//! file at a fixed interval and finally reports `NotReady`.

use std::fs::File;
use std::io::Read;

use ambicast_core::{CaptureConfig, CaptureError, Resolution, SourceKind};
use memmap2::Mmap;
use tracing::{debug, info};

use super::ShmOptions;
use crate::backend::CaptureBackend;
use crate::cancel::CancelToken;
use crate::frame::{FrameGeometry, RawBuffers, VideoPlanes};

pub const MAGIC: &[u8; 4] = b"NV21";
pub const HEADER_LEN: usize = 16;

// ── Header ────────────────────────────────────────────────────────────────────

/// Fixed header at the start of the dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpHeader {
    pub width:  u32,
    pub height: u32,
    pub stride: u32,
}

impl DumpHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(MAGIC);
        out[4..8].copy_from_slice(&self.width.to_le_bytes());
        out[8..12].copy_from_slice(&self.height.to_le_bytes());
        out[12..16].copy_from_slice(&self.stride.to_le_bytes());
        out
    }

    pub fn parse(buf: &[u8; HEADER_LEN]) -> Result<Self, CaptureError> {
        if &buf[0..4] != MAGIC {
            return Err(CaptureError::fatal("shm dump: bad magic"));
        }
        let word = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        let header = Self { width: word(4), height: word(8), stride: word(12) };
        if header.width == 0 || header.height == 0 || header.stride < header.width {
            return Err(CaptureError::fatal(format!(
                "shm dump: inconsistent geometry {}x{} stride={}",
                header.width, header.height, header.stride
            )));
        }
        Ok(header)
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn luma_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    pub fn chroma_len(&self) -> usize {
        self.stride as usize * (self.height as usize).div_ceil(2)
    }

    /// Total file size of a complete dump.
    pub fn file_len(&self) -> usize {
        HEADER_LEN + self.luma_len() + self.chroma_len()
    }
}

// ── Backend ───────────────────────────────────────────────────────────────────

struct Mapping {
    file:   File,
    map:    Mmap,
    header: DumpHeader,
}

pub struct ShmBackend {
    opts:    ShmOptions,
    cancel:  CancelToken,
    mapping: Option<Mapping>,
    planes:  Option<VideoPlanes>,
}

impl ShmBackend {
    pub fn new(opts: ShmOptions, cancel: CancelToken) -> Self {
        Self { opts, cancel, mapping: None, planes: None }
    }

    fn try_map(&self) -> Result<Mapping, CaptureError> {
        let what = self.opts.path.display().to_string();
        let io_err = |e: std::io::Error| CaptureError::from_io(&what, &e);

        let mut file = File::open(&self.opts.path).map_err(io_err)?;
        let len = file.metadata().map_err(io_err)?.len() as usize;
        if len < HEADER_LEN {
            return Err(CaptureError::not_ready(format!("{what}: no frame published yet")));
        }

        let mut raw = [0u8; HEADER_LEN];
        file.read_exact(&mut raw).map_err(io_err)?;
        let header = DumpHeader::parse(&raw)?;
        if len < header.file_len() {
            return Err(CaptureError::not_ready(format!(
                "{what}: partial frame ({len} of {} bytes)",
                header.file_len()
            )));
        }

        // SAFETY: read-only mapping of a file the producer only rewrites in
        // place; every frame re-checks the file length before reading, so a
        // truncation is reported instead of faulting.
        let map = unsafe { Mmap::map(&file) }.map_err(io_err)?;
        Ok(Mapping { file, map, header })
    }

    fn wait_for_dump(&self) -> Result<Mapping, CaptureError> {
        let policy = self.opts.poll;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_map() {
                Ok(mapping) => return Ok(mapping),
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    debug!("shm: waiting for dump (attempt {attempt}): {e}");
                    if self.cancel.wait_timeout(policy.interval) {
                        return Err(CaptureError::not_ready("shm: cancelled while waiting for dump"));
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl CaptureBackend for ShmBackend {
    fn kind(&self) -> SourceKind {
        SourceKind::Video
    }

    fn preinit(&mut self, config: &CaptureConfig) -> Result<(), CaptureError> {
        if !config.wants(SourceKind::Video) {
            return Err(CaptureError::config("video capture is disabled"));
        }
        if self.opts.path.as_os_str().is_empty() {
            return Err(CaptureError::config("shm dump path is empty"));
        }
        Ok(())
    }

    fn init(&mut self) -> Result<FrameGeometry, CaptureError> {
        let mapping = self.wait_for_dump()?;
        let header = mapping.header;
        info!(
            "shm: mapped {} ({} stride={})",
            self.opts.path.display(),
            header.resolution(),
            header.stride
        );
        self.planes = Some(VideoPlanes::new(header.resolution(), header.stride as usize));
        self.mapping = Some(mapping);
        Ok(FrameGeometry { resolution: header.resolution(), stride: header.stride as usize })
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<(), CaptureError> {
        let (Some(m), Some(planes)) = (self.mapping.as_ref(), self.planes.as_mut()) else {
            return Err(CaptureError::fatal("shm capture without mapping"));
        };

        let len = m
            .file
            .metadata()
            .map_err(|e| CaptureError::from_io("shm dump", &e))?
            .len() as usize;
        if len < m.header.file_len() || m.map.len() < m.header.file_len() {
            return Err(CaptureError::fatal(format!("shm dump shrank to {len} bytes")));
        }
        let mut raw = [0u8; HEADER_LEN];
        raw.copy_from_slice(&m.map[..HEADER_LEN]);
        if DumpHeader::parse(&raw)? != m.header {
            return Err(CaptureError::fatal("shm dump geometry changed"));
        }

        let luma_end = HEADER_LEN + m.header.luma_len();
        planes.luma.copy_from_slice(&m.map[HEADER_LEN..luma_end]);
        planes.chroma.copy_from_slice(&m.map[luma_end..luma_end + m.header.chroma_len()]);
        Ok(())
    }

    fn buffers(&self) -> RawBuffers<'_> {
        self.planes.as_ref().map_or(RawBuffers::Empty, RawBuffers::Video)
    }

    fn terminate(&mut self) {
        if self.mapping.take().is_some() {
            debug!("shm: unmapped {}", self.opts.path.display());
        }
    }

    fn cleanup(&mut self) {
        self.mapping = None;
        self.planes = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::PollPolicy;
    use std::path::Path;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn write_dump(path: &Path, header: DumpHeader, luma: u8, chroma: u8) {
        let mut buf = header.to_bytes().to_vec();
        buf.resize(HEADER_LEN + header.luma_len(), luma);
        buf.resize(header.file_len(), chroma);
        std::fs::write(path, buf).unwrap();
    }

    fn backend(dir: &TempDir, attempts: u32) -> (ShmBackend, CancelToken) {
        let cancel = CancelToken::new();
        let opts = ShmOptions {
            path: dir.path().join("video.nv21"),
            poll: PollPolicy { interval: Duration::from_millis(10), max_attempts: attempts },
        };
        (ShmBackend::new(opts, cancel.clone()), cancel)
    }

    #[test]
    fn header_rejects_bad_magic_and_stride() {
        let mut raw = DumpHeader { width: 4, height: 2, stride: 8 }.to_bytes();
        assert!(DumpHeader::parse(&raw).is_ok());
        raw[0] = b'X';
        assert!(DumpHeader::parse(&raw).is_err());
        let narrow = DumpHeader { width: 8, height: 2, stride: 4 }.to_bytes();
        assert!(matches!(DumpHeader::parse(&narrow), Err(CaptureError::Fatal { .. })));
    }

    #[test]
    fn odd_height_rounds_chroma_rows_up() {
        let h = DumpHeader { width: 4, height: 3, stride: 4 };
        assert_eq!(h.chroma_len(), 8);
        assert_eq!(h.file_len(), 16 + 12 + 8);
    }

    #[test]
    fn captures_published_planes() {
        let dir = TempDir::new().unwrap();
        let (mut shm, _) = backend(&dir, 3);
        let header = DumpHeader { width: 8, height: 4, stride: 16 };
        write_dump(&dir.path().join("video.nv21"), header, 200, 100);

        shm.preinit(&CaptureConfig::default()).unwrap();
        let g = shm.init().unwrap();
        assert_eq!(g.resolution, Resolution::new(8, 4));
        assert_eq!(g.stride, 16);
        shm.capture_frame().unwrap();

        let RawBuffers::Video(planes) = shm.buffers() else { panic!("expected planes") };
        assert!(planes.luma.iter().all(|&b| b == 200));
        assert!(planes.chroma.iter().all(|&b| b == 100));
        assert_eq!(planes.chroma.len(), 16 * 2);
    }

    #[test]
    fn missing_dump_is_not_ready_after_polling() {
        let dir = TempDir::new().unwrap();
        let (mut shm, _) = backend(&dir, 3);
        let start = Instant::now();
        assert!(matches!(shm.init(), Err(CaptureError::NotReady { .. })));
        // Two sleeps between three attempts.
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn dump_appearing_during_poll_is_picked_up() {
        let dir = TempDir::new().unwrap();
        let (mut shm, _) = backend(&dir, 50);
        let path = dir.path().join("video.nv21");
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            write_dump(&path, DumpHeader { width: 2, height: 2, stride: 2 }, 16, 128);
        });
        let g = shm.init().unwrap();
        writer.join().unwrap();
        assert_eq!(g.resolution, Resolution::new(2, 2));
    }

    #[test]
    fn cancel_aborts_polling() {
        let dir = TempDir::new().unwrap();
        let (mut shm, cancel) = backend(&dir, 10_000);
        cancel.cancel();
        let start = Instant::now();
        assert!(shm.init().unwrap_err().is_retryable());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn truncated_dump_fails_the_frame() {
        let dir = TempDir::new().unwrap();
        let (mut shm, _) = backend(&dir, 1);
        let path = dir.path().join("video.nv21");
        write_dump(&path, DumpHeader { width: 4, height: 4, stride: 4 }, 16, 128);
        shm.init().unwrap();
        std::fs::OpenOptions::new().write(true).open(&path).unwrap().set_len(20).unwrap();
        assert!(matches!(shm.capture_frame(), Err(CaptureError::Fatal { .. })));
    }
}
