//! Pixel pipeline: raw capture planes → packed RGB24.
//!
//! # Source combinations
//!
//! | Active | Path |
//! |--------|------|
//! | video + UI | NV21 → ARGB, overlay → ARGB, blend UI over video, ARGB → RGB24 |
//! | video only | NV21 → RGB24 |
//! | UI only | overlay → ARGB → RGB24 |
//!
//! # Color
//!
//! YUV → RGB uses the ITU-R BT.709 limited-range matrix (the TV's scan-out
//! color space), in 16.16 fixed point:
//!
//! ```text
//! C = Y - 16   D = U - 128   E = V - 128
//! R = 1.164383 C              + 1.792741 E
//! G = 1.164383 C - 0.213249 D - 0.532909 E
//! B = 1.164383 C + 2.112402 D
//! ```
//!
//! Intermediate ARGB rasters are tightly packed, memory order A, R, G, B.
//! Every input is walked row by row using its own stride; the RGB24 output
//! never has row padding.

use ambicast_core::{CaptureError, Resolution};

use crate::frame::{OverlayLayout, OverlayPlane, VideoPlanes};

// ── BT.709 coefficients (16.16) ──────────────────────────────────────────────

const Y_GAIN: i32 = 76_309; // 1.164383
const V_TO_R: i32 = 117_489; // 1.792741
const U_TO_G: i32 = 13_975; // 0.213249
const V_TO_G: i32 = 34_925; // 0.532909
const U_TO_B: i32 = 138_438; // 2.112402
const ROUND: i32 = 1 << 15;

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Convert one limited-range BT.709 YUV sample to RGB.
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = (y as i32 - 16) * Y_GAIN;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    [
        clamp_u8((c + V_TO_R * e + ROUND) >> 16),
        clamp_u8((c - U_TO_G * d - V_TO_G * e + ROUND) >> 16),
        clamp_u8((c + U_TO_B * d + ROUND) >> 16),
    ]
}

// ── Row converters ────────────────────────────────────────────────────────────

fn nv21_rows<const BPP: usize>(
    src: &VideoPlanes,
    dst: &mut [u8],
    dst_stride: usize,
    width: usize,
    height: usize,
    put: impl Fn(&mut [u8], [u8; 3]),
) {
    let chroma_len = width.div_ceil(2) * 2;
    for row in 0..height {
        let y_off = row * src.luma_stride;
        let c_off = (row / 2) * src.chroma_stride;
        let d_off = row * dst_stride;

        let y_row = &src.luma[y_off..y_off + width];
        let c_row = &src.chroma[c_off..c_off + chroma_len];
        let d_row = &mut dst[d_off..d_off + width * BPP];

        for (x, (px, &y)) in d_row.chunks_exact_mut(BPP).zip(y_row).enumerate() {
            let ci = (x / 2) * 2;
            // NV21: V first, then U.
            put(px, yuv_to_rgb(y, c_row[ci + 1], c_row[ci]));
        }
    }
}

/// NV21 → ARGB (A, R, G, B).
pub fn nv21_to_argb(src: &VideoPlanes, dst: &mut [u8], dst_stride: usize, width: usize, height: usize) {
    nv21_rows::<4>(src, dst, dst_stride, width, height, |px, [r, g, b]| {
        px.copy_from_slice(&[0xff, r, g, b]);
    });
}

/// NV21 → RGB24 without an intermediate alpha stage.
pub fn nv21_to_rgb24(src: &VideoPlanes, dst: &mut [u8], dst_stride: usize, width: usize, height: usize) {
    nv21_rows::<3>(src, dst, dst_stride, width, height, |px, rgb| {
        px.copy_from_slice(&rgb);
    });
}

/// Overlay (either layout) → ARGB.
pub fn overlay_to_argb(src: &OverlayPlane, dst: &mut [u8], dst_stride: usize, width: usize, height: usize) {
    for row in 0..height {
        let s_off = row * src.stride;
        let d_off = row * dst_stride;
        let s_row = &src.data[s_off..s_off + width * 4];
        let d_row = &mut dst[d_off..d_off + width * 4];
        for (d, s) in d_row.chunks_exact_mut(4).zip(s_row.chunks_exact(4)) {
            let argb = match src.layout {
                OverlayLayout::Abgr => [s[0], s[3], s[2], s[1]],
                OverlayLayout::Bgra => [s[3], s[2], s[1], s[0]],
            };
            d.copy_from_slice(&argb);
        }
    }
}

/// Composite `top` over `bottom`; result is opaque.
///
/// `top` is premultiplied (GUI surfaces are), so its colour is added as-is
/// and only the background is attenuated:
/// `out = min(255, top + (bottom * (256 - a)) >> 8)`.
pub fn blend_argb(top: &[u8], bottom: &[u8], dst: &mut [u8], stride: usize, width: usize, height: usize) {
    for row in 0..height {
        let off = row * stride;
        let len = width * 4;
        let t_row = &top[off..off + len];
        let b_row = &bottom[off..off + len];
        let d_row = &mut dst[off..off + len];
        for ((d, t), b) in d_row.chunks_exact_mut(4).zip(t_row.chunks_exact(4)).zip(b_row.chunks_exact(4)) {
            let inv = 256 - t[0] as u32;
            d[0] = 0xff;
            for c in 1..4 {
                d[c] = (t[c] as u32 + ((b[c] as u32 * inv) >> 8)).min(255) as u8;
            }
        }
    }
}

/// ARGB → RGB24 (drop alpha).
pub fn argb_to_rgb24(src: &[u8], src_stride: usize, dst: &mut [u8], width: usize, height: usize) {
    let dst_stride = width * 3;
    for row in 0..height {
        let s_row = &src[row * src_stride..row * src_stride + width * 4];
        let d_row = &mut dst[row * dst_stride..(row + 1) * dst_stride];
        for (d, s) in d_row.chunks_exact_mut(3).zip(s_row.chunks_exact(4)) {
            d.copy_from_slice(&s[1..4]);
        }
    }
}

// ── Validation ────────────────────────────────────────────────────────────────

/// Minimum length of a plane with `rows` rows of `row_bytes` at `stride`.
fn plane_len(stride: usize, rows: usize, row_bytes: usize) -> usize {
    if rows == 0 { 0 } else { stride * (rows - 1) + row_bytes }
}

fn check_overlay(p: &OverlayPlane, w: usize, h: usize) -> Result<(), CaptureError> {
    if p.stride < w * 4 || p.data.len() < plane_len(p.stride, h, w * 4) {
        return Err(CaptureError::fatal(format!(
            "overlay plane too small: {} bytes at stride {} for {}x{}",
            p.data.len(), p.stride, w, h
        )));
    }
    Ok(())
}

fn check_video(v: &VideoPlanes, w: usize, h: usize) -> Result<(), CaptureError> {
    let chroma_row = w.div_ceil(2) * 2;
    if v.luma_stride < w
        || v.chroma_stride < chroma_row
        || v.luma.len() < plane_len(v.luma_stride, h, w)
        || v.chroma.len() < plane_len(v.chroma_stride, h.div_ceil(2), chroma_row)
    {
        return Err(CaptureError::fatal(format!(
            "video planes too small for {}x{}: luma {}@{} chroma {}@{}",
            w, h, v.luma.len(), v.luma_stride, v.chroma.len(), v.chroma_stride
        )));
    }
    Ok(())
}

// ── PixelPipeline ─────────────────────────────────────────────────────────────

/// Reusable scratch rasters for one capture geometry.
///
/// Buffers are allocated on first use and overwritten every tick.
#[derive(Debug)]
pub struct PixelPipeline {
    resolution: Resolution,
    video_argb: Vec<u8>,
    ui_argb:    Vec<u8>,
    blended:    Vec<u8>,
    rgb:        Vec<u8>,
}

impl PixelPipeline {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            video_argb: Vec::new(),
            ui_argb:    Vec::new(),
            blended:    Vec::new(),
            rgb:        vec![0; resolution.rgb24_len()],
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn argb_len(&self) -> usize {
        self.resolution.total_pixels() * 4
    }

    /// Convert whichever planes are present into the RGB24 output.
    pub fn process(
        &mut self,
        ui: Option<&OverlayPlane>,
        video: Option<&VideoPlanes>,
    ) -> Result<&[u8], CaptureError> {
        let w = self.resolution.width as usize;
        let h = self.resolution.height as usize;
        let argb_stride = w * 4;
        let argb_len = self.argb_len();

        match (ui, video) {
            (Some(ui), Some(video)) => {
                check_overlay(ui, w, h)?;
                check_video(video, w, h)?;
                self.video_argb.resize(argb_len, 0);
                self.ui_argb.resize(argb_len, 0);
                self.blended.resize(argb_len, 0);
                nv21_to_argb(video, &mut self.video_argb, argb_stride, w, h);
                overlay_to_argb(ui, &mut self.ui_argb, argb_stride, w, h);
                blend_argb(&self.ui_argb, &self.video_argb, &mut self.blended, argb_stride, w, h);
                argb_to_rgb24(&self.blended, argb_stride, &mut self.rgb, w, h);
            }
            (None, Some(video)) => {
                check_video(video, w, h)?;
                nv21_to_rgb24(video, &mut self.rgb, w * 3, w, h);
            }
            (Some(ui), None) => {
                check_overlay(ui, w, h)?;
                self.ui_argb.resize(argb_len, 0);
                overlay_to_argb(ui, &mut self.ui_argb, argb_stride, w, h);
                argb_to_rgb24(&self.ui_argb, argb_stride, &mut self.rgb, w, h);
            }
            (None, None) => {
                return Err(CaptureError::config("no capture source produced buffers"));
            }
        }
        Ok(&self.rgb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn solid_video(res: Resolution, stride: usize, y: u8, u: u8, v: u8) -> VideoPlanes {
        let mut planes = VideoPlanes::new(res, stride);
        planes.luma.fill(y);
        for pair in planes.chroma.chunks_exact_mut(2) {
            pair[0] = v;
            pair[1] = u;
        }
        planes
    }

    fn solid_overlay(res: Resolution, stride: usize, layout: OverlayLayout, px: [u8; 4]) -> OverlayPlane {
        let mut plane = OverlayPlane::new(res, stride, layout);
        for row in plane.data.chunks_exact_mut(stride) {
            for p in row[..res.width as usize * 4].chunks_exact_mut(4) {
                p.copy_from_slice(&px);
            }
        }
        plane
    }

    #[test]
    fn bt709_reference_points() {
        assert_eq!(yuv_to_rgb(16, 128, 128), [0, 0, 0]);
        assert_eq!(yuv_to_rgb(235, 128, 128), [255, 255, 255]);
        // BT.709 limited-range 100% red is Y=63 U=102 V=240.
        let [r, g, b] = yuv_to_rgb(63, 102, 240);
        assert!(r >= 253, "r={r}");
        assert!(g <= 2, "g={g}");
        assert!(b <= 3, "b={b}");
    }

    #[test]
    fn bt709_differs_from_bt601_on_green() {
        // Pure green in BT.601 limited range: Y=145 U=54 V=34. Under BT.709 the
        // red channel goes negative and clamps, blue stays near zero.
        let [r, g, _] = yuv_to_rgb(145, 54, 34);
        assert_eq!(r, 0);
        assert!(g > 200);
    }

    #[test]
    fn video_only_uses_luma_and_chroma_strides() {
        let res = Resolution::new(5, 3);
        let video = solid_video(res, 16, 235, 128, 128);
        let mut pipe = PixelPipeline::new(res);
        let out = pipe.process(None, Some(&video)).expect("convert");
        assert_eq!(out.len(), 5 * 3 * 3);
        assert!(out.iter().all(|&b| b == 255));
    }

    #[test]
    fn ui_only_swizzles_both_layouts() {
        let res = Resolution::new(2, 2);
        let mut pipe = PixelPipeline::new(res);

        let abgr = solid_overlay(res, 8, OverlayLayout::Abgr, [255, 30, 20, 10]);
        assert_eq!(&pipe.process(Some(&abgr), None).unwrap()[..3], &[10, 20, 30]);

        let bgra = solid_overlay(res, 12, OverlayLayout::Bgra, [30, 20, 10, 255]);
        assert_eq!(&pipe.process(Some(&bgra), None).unwrap()[..3], &[10, 20, 30]);
    }

    #[test]
    fn transparent_ui_shows_video_and_opaque_ui_hides_it() {
        let res = Resolution::new(4, 2);
        let video = solid_video(res, 4, 235, 128, 128);
        let mut pipe = PixelPipeline::new(res);

        let clear = solid_overlay(res, 16, OverlayLayout::Abgr, [0, 0, 0, 0]);
        let out = pipe.process(Some(&clear), Some(&video)).unwrap().to_vec();
        assert!(out.iter().all(|&b| b == 255));

        let opaque = solid_overlay(res, 16, OverlayLayout::Abgr, [255, 0, 0, 200]);
        let out = pipe.process(Some(&opaque), Some(&video)).unwrap();
        assert_eq!(&out[..3], &[200, 0, 0]);
    }

    #[test]
    fn premultiplied_ui_colour_is_not_attenuated_again() {
        let res = Resolution::new(2, 2);
        let black = solid_video(res, 2, 16, 128, 128);
        let mut pipe = PixelPipeline::new(res);

        // Full red at half coverage, as a premultiplied surface never stores
        // it, still comes through at full strength over black.
        let ui = solid_overlay(res, 8, OverlayLayout::Abgr, [128, 0, 0, 255]);
        let out = pipe.process(Some(&ui), Some(&black)).unwrap();
        assert_eq!(&out[..3], &[255, 0, 0]);
    }

    #[test]
    fn half_alpha_halves_the_background() {
        let res = Resolution::new(2, 2);
        let white = solid_video(res, 2, 235, 128, 128);
        let mut pipe = PixelPipeline::new(res);

        // Premultiplied 50% red: R = 128, G = B = 0, A = 128.
        let ui = solid_overlay(res, 8, OverlayLayout::Abgr, [128, 0, 0, 128]);
        let out = pipe.process(Some(&ui), Some(&white)).unwrap();
        assert_eq!(&out[..3], &[255, 127, 127]);

        let black = solid_video(res, 2, 16, 128, 128);
        let out = pipe.process(Some(&ui), Some(&black)).unwrap();
        assert_eq!(&out[..3], &[128, 0, 0]);
    }

    #[test]
    fn short_planes_are_rejected_not_panicking() {
        let res = Resolution::new(8, 8);
        let mut video = VideoPlanes::new(res, 8);
        video.chroma.truncate(10);
        let mut pipe = PixelPipeline::new(res);
        assert!(matches!(pipe.process(None, Some(&video)), Err(CaptureError::Fatal { .. })));
        assert!(pipe.process(None, None).is_err());
    }

    proptest! {
        #[test]
        fn output_is_always_width_height_3(
            w in 1u32..48,
            h in 1u32..48,
            pad in 0usize..24,
            combo in 0u8..3,
        ) {
            let res = Resolution::new(w, h);
            let video_stride = (w as usize).div_ceil(2) * 2 + pad;
            let video = VideoPlanes::new(res, video_stride);
            let ui = OverlayPlane::new(res, w as usize * 4 + pad, OverlayLayout::Abgr);
            let mut pipe = PixelPipeline::new(res);
            let out = match combo {
                0 => pipe.process(Some(&ui), Some(&video)),
                1 => pipe.process(None, Some(&video)),
                _ => pipe.process(Some(&ui), None),
            }.expect("convert");
            prop_assert_eq!(out.len(), (w * h * 3) as usize);
        }
    }
}
