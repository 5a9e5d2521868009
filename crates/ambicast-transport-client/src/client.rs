//! Reconnecting streaming client.
//!
//! # Lifecycle
//!
//! ```text
//! 1. StreamingClient::spawn(settings, runtime_handle)
//!       └─ connection task: connect → serverinfo → read loop → backoff → …
//! 2. client.push_frame(w, h, rgb)     ← every tick while Streaming
//! 3. client.set_hdr(enabled)          ← display output changes
//! 4. client.shutdown()                ← clear + stop the task
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ambicast_core::{AtomicConnectionState, ConnectionState, Settings, StreamError};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::wire::{encode, read_msg, write_msg, Command, SinkMessage, HANDSHAKE_TAN};

// ── Settings ──────────────────────────────────────────────────────────────────

/// Connection parameters of one sink.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub host:              String,
    pub port:              u16,
    /// Name the sink shows for this source.
    pub origin:            String,
    pub priority:          i32,
    pub read_timeout:      Duration,
    pub reconnect_backoff: Duration,
}

impl ClientSettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let defaults = Settings::default();
        Self {
            host: host.into(),
            port,
            origin: defaults.origin.clone(),
            priority: defaults.priority,
            read_timeout: defaults.read_timeout(),
            reconnect_backoff: defaults.reconnect_backoff(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            host: settings.address.clone(),
            port: settings.port,
            origin: settings.origin.clone(),
            priority: settings.priority,
            read_timeout: settings.read_timeout(),
            reconnect_backoff: settings.reconnect_backoff(),
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.read_timeout.as_millis() as u64
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

const HDR_UNKNOWN: u8 = 0;
const HDR_OFF: u8 = 1;
const HDR_ON: u8 = 2;

/// Write side of one registered connection.
struct Link {
    writer: OwnedWriteHalf,
    /// Wakes this connection's read loop once the writer is unusable.
    broken: Arc<Notify>,
}

struct Shared {
    settings: ClientSettings,
    state:    AtomicConnectionState,
    /// Live connection; `None` unless registered and writable.
    link:     Mutex<Option<Link>>,
    /// Last HDR state requested, replayed after every reconnect.
    hdr:      AtomicU8,
}

impl Shared {
    async fn send(&self, cmd: &Command) -> Result<(), StreamError> {
        let line = encode(cmd)?;
        let mut guard = self.link.lock().await;
        let link = guard.as_mut().ok_or(StreamError::NotConnected)?;

        let write = async {
            link.writer.write_all(&line).await?;
            link.writer.flush().await
        };
        let err = match timeout(self.settings.read_timeout, write).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => StreamError::Io(e),
            Err(_) => StreamError::Timeout { ms: self.settings.timeout_ms() },
        };

        // Part of the line may be on the wire; nothing more can follow it.
        if let Some(link) = guard.take() {
            warn!("Sending {} failed, dropping the connection: {err}", cmd.name());
            link.broken.notify_one();
        }
        Err(err)
    }

    async fn release(&self) {
        self.link.lock().await.take();
        self.state.store(ConnectionState::Disconnected);
    }
}

// ── StreamingClient ───────────────────────────────────────────────────────────

/// Handle to the background connection task.
///
/// Dropping the handle stops the task without sending `clear`; use
/// [`shutdown`](Self::shutdown) for an orderly exit.
pub struct StreamingClient {
    shared:   Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task:     Option<JoinHandle<()>>,
    runtime:  Handle,
}

impl StreamingClient {
    /// Spawn the connection task on `runtime`. It retries forever until
    /// [`shutdown`](Self::shutdown).
    pub fn spawn(settings: ClientSettings, runtime: Handle) -> Self {
        let shared = Arc::new(Shared {
            settings,
            state: AtomicConnectionState::default(),
            link: Mutex::new(None),
            hdr: AtomicU8::new(HDR_UNKNOWN),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = runtime.spawn(connection_loop(Arc::clone(&shared), shutdown_rx));
        Self { shared, shutdown, task: Some(task), runtime }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    /// `true` once registered and streaming.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Streaming
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.shared.settings
    }

    /// Send one RGB24 frame. Fails with `NotConnected` unless streaming.
    /// A rejected frame leaves the connection up; a write that fails or
    /// times out part-way drops it and the task reconnects.
    pub async fn push_frame(&self, width: u32, height: u32, rgb: &[u8]) -> Result<(), StreamError> {
        if !self.is_connected() {
            return Err(StreamError::NotConnected);
        }
        let s = &self.shared.settings;
        let cmd = Command::image(&s.origin, s.priority, width, height, rgb)?;
        self.shared.send(&cmd).await
    }

    /// [`push_frame`](Self::push_frame) for callers on plain OS threads
    /// (the frame pacer). Must not be called from inside the runtime.
    pub fn push_frame_blocking(&self, width: u32, height: u32, rgb: &[u8]) -> Result<(), StreamError> {
        self.runtime.block_on(self.push_frame(width, height, rgb))
    }

    /// Toggle the sink's HDR component. Remembered and replayed after a
    /// reconnect; `NotConnected` only means the replay is pending.
    pub async fn set_hdr(&self, enabled: bool) -> Result<(), StreamError> {
        self.shared.hdr.store(if enabled { HDR_ON } else { HDR_OFF }, Ordering::Relaxed);
        if !self.is_connected() {
            return Err(StreamError::NotConnected);
        }
        self.shared.send(&Command::hdr(enabled)).await
    }

    /// Clear our priority on the sink, stop the task and wait for it.
    pub async fn shutdown(mut self) {
        if self.is_connected() {
            let clear = Command::clear(self.shared.settings.priority);
            if let Err(e) = self.shared.send(&clear).await {
                debug!("clear on shutdown failed: {e}");
            }
        }
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Streaming task ended abnormally: {e}");
            }
        }
        info!("Streaming client shut down");
    }
}

impl Drop for StreamingClient {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

// ── Connection task ───────────────────────────────────────────────────────────

async fn connection_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let s = &shared.settings;
    info!("Streaming to {}:{} as '{}' (priority {})", s.host, s.port, s.origin, s.priority);

    loop {
        if *shutdown.borrow() {
            break;
        }

        shared.state.store(ConnectionState::Connecting);
        let session = async {
            match connect_and_register(&shared).await {
                Ok((reader, broken)) => {
                    shared.state.store(ConnectionState::Streaming);
                    replay_hdr(&shared).await;
                    read_loop(&shared, reader, &broken).await
                }
                Err(e) => e,
            }
        };

        tokio::select! {
            err = session => warn!("Sink session ended: {err}"),
            _ = shutdown.changed() => break,
        }
        shared.release().await;

        debug!("Reconnecting in {:?}", s.reconnect_backoff);
        tokio::select! {
            _ = tokio::time::sleep(s.reconnect_backoff) => {}
            _ = shutdown.changed() => break,
        }
    }

    shared.release().await;
    debug!("Connection task exited");
}

type LineReader = BufReader<OwnedReadHalf>;

async fn connect_and_register(shared: &Shared) -> Result<(LineReader, Arc<Notify>), StreamError> {
    let s = &shared.settings;
    let timed_out = || StreamError::Timeout { ms: s.timeout_ms() };

    let stream = timeout(s.read_timeout, TcpStream::connect((s.host.as_str(), s.port)))
        .await
        .map_err(|_| timed_out())?
        .map_err(|e| StreamError::ConnectionFailed { reason: format!("{}:{}: {e}", s.host, s.port) })?;
    stream.set_nodelay(true)?;
    let peer: Option<SocketAddr> = stream.peer_addr().ok();

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    timeout(s.read_timeout, async {
        write_msg(&mut writer, &Command::server_info()).await?;
        await_handshake(&mut reader).await
    })
    .await
    .map_err(|_| timed_out())??;

    shared.state.store(ConnectionState::Registered);
    let broken = Arc::new(Notify::new());
    *shared.link.lock().await = Some(Link { writer, broken: Arc::clone(&broken) });
    info!("Registered with sink {:?} (priority {})", peer, s.priority);
    Ok((reader, broken))
}

/// Wait for the reply to the `serverinfo` handshake.
async fn await_handshake(reader: &mut LineReader) -> Result<(), StreamError> {
    loop {
        let reply = read_msg::<SinkMessage>(reader).await?;
        if reply.command != "serverinfo" && reply.tan != Some(HANDSHAKE_TAN) {
            debug!("Ignoring {:?} during handshake", reply);
            continue;
        }
        return if reply.success {
            Ok(())
        } else {
            Err(StreamError::RegistrationRejected {
                reason: reply.error.unwrap_or_else(|| "no reason given".to_owned()),
            })
        };
    }
}

async fn replay_hdr(shared: &Shared) {
    let enabled = match shared.hdr.load(Ordering::Relaxed) {
        HDR_ON => true,
        HDR_OFF => false,
        _ => return,
    };
    if let Err(e) = shared.send(&Command::hdr(enabled)).await {
        warn!("Failed to restore HDR state: {e}");
    }
}

/// Runs until the connection fails; the returned error says why.
async fn read_loop(shared: &Shared, mut reader: LineReader, broken: &Notify) -> StreamError {
    loop {
        let read = timeout(shared.settings.read_timeout, read_msg::<SinkMessage>(&mut reader));
        let msg = tokio::select! {
            _ = broken.notified() => return StreamError::ConnectionFailed {
                reason: "write to sink failed".to_owned(),
            },
            r = read => match r {
                Err(_) => return StreamError::Timeout { ms: shared.settings.timeout_ms() },
                Ok(Err(e)) => return e,
                Ok(Ok(msg)) => msg,
            },
        };
        if msg.success {
            trace!("Sink acknowledged {}", msg.command);
        } else {
            warn!("Sink rejected {}: {}", msg.command, msg.error.as_deref().unwrap_or("no reason given"));
        }
    }
}
