//! ambicast service: orchestrates capture and streaming.
//!
//! The binary (`src/main.rs`) is a thin shell around [`Service`]: it loads
//! settings, applies CLI overrides, and feeds the JSON-lines control surface
//! from stdin until interrupted.

pub mod cli;
pub mod control;
pub mod error;
pub mod service;

pub use control::{dispatch, handle_line, ControlRequest};
pub use error::ServiceError;
pub use service::{build_registry, is_hdr, Service, ServiceStatus};
