//! Built-in capture backends.
//!
//! | Name | Source | Mechanism |
//! |------|--------|-----------|
//! | `fbdev` | UI | mmap of `/dev/fbN`, geometry from sysfs, nearest-neighbour scaled |
//! | `shm` | video | mmap of an NV21 dump published by the platform capture daemon |
//! | `testsrc` | UI / video | synthetic pattern, no hardware |

use std::path::PathBuf;

use crate::cancel::{CancelToken, PollPolicy};

pub mod fbdev;
pub mod shm;
pub mod testsrc;

pub use fbdev::FbdevBackend;
pub use shm::ShmBackend;
pub use testsrc::TestPattern;

/// Options for the `fbdev` UI backend.
#[derive(Debug, Clone)]
pub struct FbdevOptions {
    /// Device name, e.g. `fb0`.
    pub device:     String,
    pub dev_root:   PathBuf,
    pub sysfs_root: PathBuf,
}

impl Default for FbdevOptions {
    fn default() -> Self {
        Self {
            device:     "fb0".to_owned(),
            dev_root:   PathBuf::from("/dev"),
            sysfs_root: PathBuf::from("/sys/class/graphics"),
        }
    }
}

/// Options for the `shm` video backend.
#[derive(Debug, Clone)]
pub struct ShmOptions {
    pub path: PathBuf,
    /// How long to wait for the capture daemon to publish its first frame.
    pub poll: PollPolicy,
}

impl Default for ShmOptions {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dev/shm/ambicast-video.nv21"),
            poll: PollPolicy::default(),
        }
    }
}

/// Everything a backend factory may need to construct its backend.
#[derive(Debug, Clone, Default)]
pub struct BackendOptions {
    pub fbdev:  FbdevOptions,
    pub shm:    ShmOptions,
    /// Aborts readiness polling and init retries on shutdown.
    pub cancel: CancelToken,
}
