//! Synthetic capture source for bring-up without capture hardware.
//!
//! Video: eight scrolling color bars. UI: fully transparent except a
//! translucent box in the centre whose color cycles.

use ambicast_core::{CaptureConfig, CaptureError, Resolution, SourceKind};

use crate::backend::CaptureBackend;
use crate::frame::{FrameGeometry, OverlayLayout, OverlayPlane, RawBuffers, VideoPlanes};

/// Coverage of the UI test box.
const UI_ALPHA: u8 = 160;

/// BT.709 limited-range Y, U, V of the classic bars (white → black).
const BARS: [[u8; 3]; 8] = [
    [235, 128, 128],
    [219, 16, 138],
    [188, 154, 16],
    [173, 42, 26],
    [78, 214, 230],
    [63, 102, 240],
    [32, 240, 118],
    [16, 128, 128],
];

pub struct TestPattern {
    kind:       SourceKind,
    resolution: Option<Resolution>,
    frame:      u64,
    overlay:    Option<OverlayPlane>,
    video:      Option<VideoPlanes>,
}

impl TestPattern {
    pub fn new(kind: SourceKind) -> Self {
        Self { kind, resolution: None, frame: 0, overlay: None, video: None }
    }

    /// Report `resolution` instead of the configured one.
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    fn draw_video(planes: &mut VideoPlanes, res: Resolution, frame: u64) {
        let w = res.width as usize;
        let h = res.height as usize;
        let shift = (frame as usize * 4) % w.max(1);
        let bar_of = |x: usize| ((x + shift) % w) * BARS.len() / w;

        for row in 0..h {
            let off = row * planes.luma_stride;
            for x in 0..w {
                planes.luma[off + x] = BARS[bar_of(x)][0];
            }
        }
        for row in 0..h.div_ceil(2) {
            let off = row * planes.chroma_stride;
            for cx in 0..w.div_ceil(2) {
                let [_, u, v] = BARS[bar_of(cx * 2)];
                planes.chroma[off + cx * 2] = v;
                planes.chroma[off + cx * 2 + 1] = u;
            }
        }
    }

    fn draw_ui(plane: &mut OverlayPlane, res: Resolution, frame: u64) {
        let w = res.width as usize;
        let h = res.height as usize;
        let hue = (frame % 256) as u32;
        // Premultiplied, like the platform GUI surface.
        let pm = |c: u32| (c * UI_ALPHA as u32 / 255) as u8;
        let px = [UI_ALPHA, pm(255 - hue), pm(64), pm(hue)];
        plane.data.fill(0);
        for row in h / 4..h * 3 / 4 {
            let off = row * plane.stride;
            for x in w / 4..w * 3 / 4 {
                // A, B, G, R
                plane.data[off + x * 4..off + x * 4 + 4].copy_from_slice(&px);
            }
        }
    }
}

impl CaptureBackend for TestPattern {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn preinit(&mut self, config: &CaptureConfig) -> Result<(), CaptureError> {
        if !config.wants(self.kind) {
            return Err(CaptureError::config(format!("{} capture is disabled", self.kind)));
        }
        self.resolution.get_or_insert(config.resolution());
        Ok(())
    }

    fn init(&mut self) -> Result<FrameGeometry, CaptureError> {
        let res = self
            .resolution
            .ok_or_else(|| CaptureError::config("test pattern not configured"))?;
        let stride = match self.kind {
            SourceKind::Ui => {
                let stride = res.width as usize * 4;
                self.overlay = Some(OverlayPlane::new(res, stride, OverlayLayout::Abgr));
                stride
            }
            SourceKind::Video => {
                // Pad rows to 64 bytes like a hardware scan-out buffer.
                let stride = (res.width as usize).div_ceil(64) * 64;
                self.video = Some(VideoPlanes::new(res, stride));
                stride
            }
        };
        Ok(FrameGeometry { resolution: res, stride })
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        self.frame = 0;
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<(), CaptureError> {
        let res = self.resolution.unwrap_or(Resolution::new(0, 0));
        if let Some(plane) = self.overlay.as_mut() {
            Self::draw_ui(plane, res, self.frame);
        }
        if let Some(planes) = self.video.as_mut() {
            Self::draw_video(planes, res, self.frame);
        }
        self.frame += 1;
        Ok(())
    }

    fn buffers(&self) -> RawBuffers<'_> {
        match (&self.overlay, &self.video) {
            (Some(p), _) => RawBuffers::Overlay(p),
            (_, Some(v)) => RawBuffers::Video(v),
            _ => RawBuffers::Empty,
        }
    }

    fn terminate(&mut self) {}

    fn cleanup(&mut self) {
        self.overlay = None;
        self.video = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::PixelPipeline;

    #[test]
    fn disabled_source_fails_preinit() {
        let mut ui = TestPattern::new(SourceKind::Ui);
        let cfg = CaptureConfig { no_gui: true, ..Default::default() };
        assert!(matches!(ui.preinit(&cfg), Err(CaptureError::Config { .. })));
    }

    #[test]
    fn video_bars_convert_to_white_first_column() {
        let res = Resolution::new(64, 8);
        let mut src = TestPattern::new(SourceKind::Video);
        src.preinit(&CaptureConfig { resolution_width: 64, resolution_height: 8, ..Default::default() })
            .unwrap();
        let geometry = src.init().unwrap();
        assert_eq!(geometry.resolution, res);
        assert_eq!(geometry.stride, 64);
        src.capture_frame().unwrap();

        let RawBuffers::Video(planes) = src.buffers() else { panic!("expected video planes") };
        let mut pipe = PixelPipeline::new(res);
        let out = pipe.process(None, Some(planes)).unwrap();
        assert_eq!(&out[..3], &[255, 255, 255]);
    }

    #[test]
    fn ui_box_is_translucent_and_corners_clear() {
        let res = Resolution::new(8, 8);
        let mut src = TestPattern::new(SourceKind::Ui).with_resolution(res);
        src.preinit(&CaptureConfig::default()).unwrap();
        src.init().unwrap();
        src.capture_frame().unwrap();
        let RawBuffers::Overlay(plane) = src.buffers() else { panic!("expected overlay") };
        assert_eq!(plane.data[0], 0);
        let centre = 4 * plane.stride + 4 * 4;
        assert_eq!(plane.data[centre], UI_ALPHA);
        // Premultiplied: no colour channel exceeds alpha.
        assert!(plane.data[centre + 1..centre + 4].iter().all(|&c| c <= UI_ALPHA));
        src.cleanup();
        assert!(matches!(src.buffers(), RawBuffers::Empty));
    }
}
