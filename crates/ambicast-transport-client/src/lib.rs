//! ambicast-transport-client: streaming client for the lighting sink.
//!
//! Keeps one TCP connection to the ambient-light sink alive for the life of
//! the service and pushes every captured frame to it.
//!
//! # Architecture
//!
//! ```text
//! pacer thread ── push_frame_blocking ──┐
//!                                       ▼
//!                    StreamingClient (writer half, tokio Mutex)
//!                                       │  JSON lines (Hyperion JSON API)
//!  connection task ◄── read loop ◄──────┴────────► lighting sink (TCP:19444)
//!   Disconnected → Connecting → Registered → Streaming
//!         ▲                                   │ read/write error, timeout
//!         └──────────── 1 s backoff ◄─────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ambicast_transport_client::{ClientSettings, StreamingClient};
//!
//! # async fn example() -> Result<(), ambicast_core::StreamError> {
//! let settings = ClientSettings::new("192.168.1.100", 19444);
//! let client = StreamingClient::spawn(settings, tokio::runtime::Handle::current());
//! // … once `client.is_connected()`:
//! client.push_frame(2, 1, &[255, 0, 0, 0, 0, 255]).await?;
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod wire;

pub use client::{ClientSettings, StreamingClient};
pub use wire::{Command, ComponentToggle, SinkMessage, MAX_MESSAGE_LEN};
