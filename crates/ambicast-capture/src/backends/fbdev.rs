//! Linux framebuffer UI capture.
//!
//! ```text
//! /sys/class/graphics/fbN/{bits_per_pixel, stride, virtual_size, modes}
//!        │ geometry
//!        ▼
//! /dev/fbN ──mmap (read-only)──► nearest-neighbour scale ──► OverlayPlane (BGRA)
//! ```
//!
//! The scan-out buffer is sampled down (or up) to the configured output
//! resolution, so the published geometry always equals the configuration.

use std::fs::{self, File};
use std::path::Path;

use ambicast_core::{CaptureConfig, CaptureError, Resolution, SourceKind};
use memmap2::{Mmap, MmapOptions};
use tracing::{debug, info};

use super::FbdevOptions;
use crate::backend::CaptureBackend;
use crate::frame::{FrameGeometry, OverlayLayout, OverlayPlane, RawBuffers};

const BYTES_PER_PIXEL: usize = 4;

/// Scan-out geometry reported by sysfs.
#[derive(Debug, Clone, Copy)]
struct ScanoutGeometry {
    width:  usize,
    height: usize,
    stride: usize,
}

impl ScanoutGeometry {
    fn map_len(&self) -> usize {
        self.stride * self.height
    }
}

pub struct FbdevBackend {
    opts:      FbdevOptions,
    output:    Option<Resolution>,
    map:       Option<Mmap>,
    plane:     Option<OverlayPlane>,
    /// Source byte offset of each output column.
    x_offsets: Vec<usize>,
    /// Source byte offset of each output row.
    y_offsets: Vec<usize>,
}

impl FbdevBackend {
    pub fn new(opts: FbdevOptions) -> Self {
        Self {
            opts,
            output: None,
            map: None,
            plane: None,
            x_offsets: Vec::new(),
            y_offsets: Vec::new(),
        }
    }

    fn read_attr(dir: &Path, attr: &str) -> Result<String, CaptureError> {
        let path = dir.join(attr);
        fs::read_to_string(&path)
            .map(|s| s.trim().to_owned())
            .map_err(|e| CaptureError::from_io(&path.display().to_string(), &e))
    }

    /// Parse `"1920,1080"` (virtual_size).
    fn parse_pair(s: &str, sep: char) -> Option<(usize, usize)> {
        let (a, b) = s.split_once(sep)?;
        Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
    }

    /// Parse the first line of `modes`, e.g. `"U:1920x1080p-60"`.
    fn parse_mode(s: &str) -> Option<(usize, usize)> {
        let line = s.lines().next()?;
        let dims = line.split_once(':').map_or(line, |(_, rest)| rest);
        let (w, rest) = dims.split_once('x')?;
        let h: String = rest.chars().take_while(char::is_ascii_digit).collect();
        Some((w.parse().ok()?, h.parse().ok()?))
    }

    fn probe_scanout(&self) -> Result<ScanoutGeometry, CaptureError> {
        let dir = self.opts.sysfs_root.join(&self.opts.device);

        let bpp = Self::read_attr(&dir, "bits_per_pixel")?;
        if bpp != "32" {
            return Err(CaptureError::fatal(format!(
                "{}: unsupported bits_per_pixel {bpp}",
                self.opts.device
            )));
        }

        let stride: usize = Self::read_attr(&dir, "stride")?
            .parse()
            .map_err(|_| CaptureError::fatal(format!("{}: unreadable stride", self.opts.device)))?;

        let visible = Self::read_attr(&dir, "modes").ok().and_then(|m| Self::parse_mode(&m));
        let (width, height) = match visible {
            Some(dims) => dims,
            None => Self::read_attr(&dir, "virtual_size")
                .ok()
                .and_then(|s| Self::parse_pair(&s, ','))
                .ok_or_else(|| {
                    CaptureError::fatal(format!("{}: no usable modes or virtual_size", self.opts.device))
                })?,
        };

        if width == 0 || height == 0 || stride < width * BYTES_PER_PIXEL {
            return Err(CaptureError::fatal(format!(
                "{}: inconsistent geometry {width}x{height} stride={stride}",
                self.opts.device
            )));
        }
        Ok(ScanoutGeometry { width, height, stride })
    }

    fn map_device(&self, scanout: &ScanoutGeometry) -> Result<Mmap, CaptureError> {
        let path = self.opts.dev_root.join(&self.opts.device);
        let what = path.display().to_string();
        let file = File::open(&path).map_err(|e| CaptureError::from_io(&what, &e))?;

        // Character devices report a zero length; regular files (dumps,
        // tests) must cover the whole scan-out or reads past EOF fault.
        let meta = file.metadata().map_err(|e| CaptureError::from_io(&what, &e))?;
        if meta.is_file() && (meta.len() as usize) < scanout.map_len() {
            return Err(CaptureError::fatal(format!(
                "{what}: {} bytes, scan-out needs {}",
                meta.len(),
                scanout.map_len()
            )));
        }

        // SAFETY: the mapping is read-only and only ever read through
        // bounds-checked slices; the driver may rewrite pixels concurrently,
        // which at worst tears a frame.
        unsafe { MmapOptions::new().len(scanout.map_len()).map(&file) }
            .map_err(|e| CaptureError::from_io(&what, &e))
    }

    fn build_offsets(&mut self, scanout: &ScanoutGeometry, output: Resolution) {
        let ow = output.width as usize;
        let oh = output.height as usize;
        self.x_offsets = (0..ow).map(|x| (x * scanout.width / ow) * BYTES_PER_PIXEL).collect();
        self.y_offsets = (0..oh).map(|y| (y * scanout.height / oh) * scanout.stride).collect();
    }
}

impl CaptureBackend for FbdevBackend {
    fn kind(&self) -> SourceKind {
        SourceKind::Ui
    }

    fn preinit(&mut self, config: &CaptureConfig) -> Result<(), CaptureError> {
        if !config.wants(SourceKind::Ui) {
            return Err(CaptureError::config("UI capture is disabled"));
        }
        if self.opts.device.is_empty() || self.opts.device.contains('/') {
            return Err(CaptureError::config(format!(
                "invalid framebuffer device name '{}'",
                self.opts.device
            )));
        }
        self.output = Some(config.resolution());
        Ok(())
    }

    fn init(&mut self) -> Result<FrameGeometry, CaptureError> {
        let output = self.output.ok_or_else(|| CaptureError::config("fbdev not configured"))?;
        let scanout = self.probe_scanout()?;
        let map = self.map_device(&scanout)?;
        info!(
            "fbdev {}: scan-out {}x{} stride={} → {}",
            self.opts.device, scanout.width, scanout.height, scanout.stride, output
        );

        self.build_offsets(&scanout, output);
        let stride = output.width as usize * BYTES_PER_PIXEL;
        self.plane = Some(OverlayPlane::new(output, stride, OverlayLayout::Bgra));
        self.map = Some(map);
        Ok(FrameGeometry { resolution: output, stride })
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<(), CaptureError> {
        let (Some(map), Some(plane)) = (self.map.as_ref(), self.plane.as_mut()) else {
            return Err(CaptureError::fatal("fbdev capture without mapping"));
        };
        let stride = plane.stride;
        for (row, &src_row) in plane.data.chunks_exact_mut(stride).zip(&self.y_offsets) {
            for (px, &src_col) in row.chunks_exact_mut(BYTES_PER_PIXEL).zip(&self.x_offsets) {
                let src = src_row + src_col;
                px.copy_from_slice(&map[src..src + BYTES_PER_PIXEL]);
            }
        }
        Ok(())
    }

    fn buffers(&self) -> RawBuffers<'_> {
        self.plane.as_ref().map_or(RawBuffers::Empty, RawBuffers::Overlay)
    }

    fn terminate(&mut self) {
        // Unmapping the scan-out is all there is to release.
        if self.map.take().is_some() {
            debug!("fbdev {}: unmapped", self.opts.device);
        }
    }

    fn cleanup(&mut self) {
        self.map = None;
        self.plane = None;
        self.x_offsets.clear();
        self.y_offsets.clear();
    }
}
