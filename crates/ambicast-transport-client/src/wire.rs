//! Sink wire format: the Hyperion/HyperHDR JSON API.
//!
//! Every message is one compact UTF-8 JSON object terminated by `\n`:
//!
//! ```text
//! {"command":"serverinfo","tan":1}\n
//! {"command":"image","imagewidth":320,"imageheight":180,"imagedata":"…",…}\n
//! ```
//!
//! The sink answers every command with `{"command", "success", "error"?,
//! "tan"?}` plus command-specific fields this client ignores.

use ambicast_core::StreamError;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Upper bound for one message line (a 1080p RGB24 frame in base64 fits).
pub const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Image duration understood by the sink as "until replaced".
pub const IMAGE_DURATION_FOREVER: i32 = -1;

/// Sink component toggled by [`Command::ComponentState`] for HDR content.
pub const HDR_COMPONENT: &str = "HDR";

/// Transaction number of the connection handshake.
pub const HANDSHAKE_TAN: u32 = 1;

// ── Client → sink ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Command {
    /// Handshake: any successful reply proves a JSON API is listening.
    ServerInfo {
        tan: u32,
    },
    Image {
        imagewidth:  u32,
        imageheight: u32,
        /// Base64 of packed RGB24, `imagewidth × imageheight × 3` bytes.
        imagedata:   String,
        origin:      String,
        priority:    i32,
        duration:    i32,
    },
    ComponentState {
        componentstate: ComponentToggle,
    },
    Clear {
        priority: i32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentToggle {
    pub component: String,
    pub state:     bool,
}

impl Command {
    pub fn server_info() -> Self {
        Self::ServerInfo { tan: HANDSHAKE_TAN }
    }

    /// Build an image command, checking `rgb` against the dimensions.
    pub fn image(
        origin: &str,
        priority: i32,
        width: u32,
        height: u32,
        rgb: &[u8],
    ) -> Result<Self, StreamError> {
        let expected = width as usize * height as usize * 3;
        if rgb.len() != expected {
            return Err(StreamError::InvalidFrame { expected, found: rgb.len() });
        }
        Ok(Self::Image {
            imagewidth: width,
            imageheight: height,
            imagedata: STANDARD.encode(rgb),
            origin: origin.to_owned(),
            priority,
            duration: IMAGE_DURATION_FOREVER,
        })
    }

    pub fn hdr(enabled: bool) -> Self {
        Self::ComponentState {
            componentstate: ComponentToggle { component: HDR_COMPONENT.to_owned(), state: enabled },
        }
    }

    pub fn clear(priority: i32) -> Self {
        Self::Clear { priority }
    }

    /// The `command` tag as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ServerInfo { .. } => "serverinfo",
            Self::Image { .. } => "image",
            Self::ComponentState { .. } => "componentstate",
            Self::Clear { .. } => "clear",
        }
    }
}

// ── Sink → client ─────────────────────────────────────────────────────────────

/// Reply to one command. Unknown fields (`info`, `instance`, …) are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkMessage {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error:   Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tan:     Option<u32>,
}

impl SinkMessage {
    pub fn ok(command: &str) -> Self {
        Self { command: command.to_owned(), success: true, error: None, tan: None }
    }

    pub fn failed(command: &str, error: &str) -> Self {
        Self { command: command.to_owned(), success: false, error: Some(error.to_owned()), tan: None }
    }

    pub fn with_tan(self, tan: u32) -> Self {
        Self { tan: Some(tan), ..self }
    }
}

// ── Line framing ──────────────────────────────────────────────────────────────

/// Serialise `msg` into one newline-terminated line.
pub fn encode<T: Serialize>(msg: &T) -> Result<BytesMut, StreamError> {
    let mut writer = BytesMut::new().writer();
    serde_json::to_writer(&mut writer, msg)?;
    let mut buf = writer.into_inner();
    if buf.len() > MAX_MESSAGE_LEN {
        return Err(StreamError::MessageTooLarge { len: buf.len() });
    }
    buf.put_u8(b'\n');
    Ok(buf)
}

pub async fn write_msg<T: Serialize>(
    stream: &mut (impl AsyncWrite + Unpin),
    msg: &T,
) -> Result<(), StreamError> {
    let line = encode(msg)?;
    stream.write_all(&line).await?;
    stream.flush().await?;
    trace!("Sent {} bytes", line.len());
    Ok(())
}

/// Read the next non-empty line and parse it. Never buffers more than
/// [`MAX_MESSAGE_LEN`] bytes of one line.
pub async fn read_msg<T: DeserializeOwned>(
    stream: &mut (impl AsyncBufRead + Unpin),
) -> Result<T, StreamError> {
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = (&mut *stream)
            .take(MAX_MESSAGE_LEN as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;
        if n == 0 {
            return Err(StreamError::ConnectionClosed);
        }
        if line.last() != Some(&b'\n') {
            return Err(if line.len() > MAX_MESSAGE_LEN {
                StreamError::MessageTooLarge { len: line.len() }
            } else {
                StreamError::ConnectionClosed
            });
        }
        let body = trim_line(&line);
        if body.is_empty() {
            continue;
        }
        trace!("Received {} bytes", body.len());
        return Ok(serde_json::from_slice(body)?);
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(line.len());
    let end = line.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &line[start..end]
}
