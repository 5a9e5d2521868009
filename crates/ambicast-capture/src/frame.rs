//! Raw per-tick capture buffers and the produced output frame.

use ambicast_core::Resolution;

/// Byte order of one overlay pixel in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayLayout {
    /// A, B, G, R: platform GUI surfaces.
    Abgr,
    /// B, G, R, A: Linux fbdev XRGB8888 on little-endian hosts.
    Bgra,
}

/// Geometry a backend publishes once `init` succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub resolution: Resolution,
    /// Bytes per row of the backend's primary plane.
    pub stride: usize,
}

/// Packed 4-byte-per-pixel overlay plane (UI source).
#[derive(Debug, Clone)]
pub struct OverlayPlane {
    pub data:   Vec<u8>,
    pub stride: usize,
    pub layout: OverlayLayout,
}

impl OverlayPlane {
    pub fn new(resolution: Resolution, stride: usize, layout: OverlayLayout) -> Self {
        Self { data: vec![0; stride * resolution.height as usize], stride, layout }
    }
}

/// Semi-planar NV21 planes (video source): full-resolution luma followed by
/// 2×2-subsampled chroma interleaved V, U.
#[derive(Debug, Clone)]
pub struct VideoPlanes {
    pub luma:          Vec<u8>,
    pub luma_stride:   usize,
    pub chroma:        Vec<u8>,
    pub chroma_stride: usize,
}

impl VideoPlanes {
    /// Allocate planes for `resolution`, luma and chroma sharing `stride`.
    pub fn new(resolution: Resolution, stride: usize) -> Self {
        let h = resolution.height as usize;
        Self {
            luma:          vec![16; stride * h],
            luma_stride:   stride,
            chroma:        vec![128; stride * h.div_ceil(2)],
            chroma_stride: stride,
        }
    }
}

/// Borrowed view of whatever a backend captured on the last tick.
#[derive(Debug, Clone, Copy)]
pub enum RawBuffers<'a> {
    /// Nothing captured yet (or buffers already released).
    Empty,
    Overlay(&'a OverlayPlane),
    Video(&'a VideoPlanes),
}

/// Packed RGB24 frame handed to the output callback.
///
/// Borrowed for the duration of the callback only.
#[derive(Debug, Clone, Copy)]
pub struct OutputFrame<'a> {
    pub width:  u32,
    pub height: u32,
    /// `width * height * 3` bytes, row-major, R G B, no padding.
    pub data:   &'a [u8],
}
