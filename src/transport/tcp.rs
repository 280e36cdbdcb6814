//! TCP transport speaking length-prefixed JSON [`Frame`]s.
//!
//! One connection runs three background tasks sharing a [`Link`]:
//!
//! ```text
//! writer     mpsc<Frame> → socket
//! reader     socket → inbound events / pending calls / pong latency
//! heartbeat  Ping every `heartbeat_interval` unless one is still
//!            unanswered; silence past `heartbeat_timeout` ends the
//!            connection
//! ```
//!
//! Whoever notices the end first (reader EOF, write error, heartbeat timeout
//! or a local `disconnect`) calls [`Link::end`], which fails every pending
//! call, stops the tasks and emits the single `Disconnected` event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::settings::SessionConfig;

use super::framing::{read_frame, write_frame, Frame, FrameConfig, FrameError};
use super::{InboundReceiver, Transport, TransportError, TransportEvent, TransportStatus};

#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// `host:port` of the world server.
    pub addr: String,
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub frame: FrameConfig,
}

impl TcpTransportConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(15),
            frame: FrameConfig::default(),
        }
    }
}

impl From<&SessionConfig> for TcpTransportConfig {
    fn from(cfg: &SessionConfig) -> Self {
        Self {
            addr: cfg.endpoint.clone(),
            connect_timeout: cfg.connect_timeout,
            call_timeout: cfg.call_timeout,
            heartbeat_interval: cfg.heartbeat_interval,
            heartbeat_timeout: cfg.heartbeat_timeout,
            frame: FrameConfig::default(),
        }
    }
}

type PendingCall = oneshot::Sender<Result<Value, TransportError>>;

/// State shared by the transport handle and one connection's tasks.
struct Link {
    outbound: mpsc::UnboundedSender<Frame>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
    pending: Mutex<HashMap<u64, PendingCall>>,
    next_id: AtomicU64,
    /// Outstanding ping id and when it was sent.
    ping: Mutex<Option<(u64, Instant)>>,
    last_seen: Mutex<Instant>,
    latency: Arc<Mutex<Option<Duration>>>,
    status: Arc<Mutex<TransportStatus>>,
    ended: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Link {
    fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Tear the connection down.  Only the first call has any effect.
    fn end(&self, manual: bool, reason: Option<String>) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.status.lock() = TransportStatus::Closed;
        self.shutdown.send_replace(true);

        let pending: Vec<PendingCall> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        if !pending.is_empty() {
            tracing::debug!("failing {} pending call(s)", pending.len());
        }
        for tx in pending {
            let _ = tx.send(Err(TransportError::Closed));
        }

        match &reason {
            Some(r) => tracing::info!("connection ended (manual: {manual}): {r}"),
            None => tracing::info!("connection ended (manual: {manual})"),
        }
        let _ = self
            .inbound
            .send(TransportEvent::Disconnected { manual, reason });
    }

    fn resolve(&self, id: u64, ok: Option<Value>, err: Option<String>) {
        let Some(tx) = self.pending.lock().remove(&id) else {
            tracing::debug!("response for unknown call {id} ignored");
            return;
        };
        let result = match err {
            Some(message) => Err(TransportError::Rejected(message)),
            None => Ok(ok.unwrap_or(Value::Null)),
        };
        let _ = tx.send(result);
    }

    /// Register a new ping, or `None` while the previous one is unanswered.
    /// A ping older than `give_up` is treated as lost and replaced.
    fn begin_ping(&self, give_up: Duration) -> Option<u64> {
        let mut ping = self.ping.lock();
        if let Some((id, sent_at)) = *ping {
            if sent_at.elapsed() < give_up {
                tracing::trace!("ping {id} still outstanding");
                return None;
            }
        }
        let id = self.next_id();
        *ping = Some((id, Instant::now()));
        Some(id)
    }

    fn pong(&self, id: u64) {
        let mut ping = self.ping.lock();
        match *ping {
            Some((sent_id, sent_at)) if sent_id == id => {
                *self.latency.lock() = Some(sent_at.elapsed());
                *ping = None;
            }
            _ => tracing::trace!("stale pong {id}"),
        }
    }

    fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }
}

/// [`Transport`] over a single TCP connection.
///
/// A transport may be connected again after it has closed; each connection
/// gets a fresh inbound channel.
pub struct TcpTransport {
    config: TcpTransportConfig,
    link: Mutex<Option<Arc<Link>>>,
    status: Arc<Mutex<TransportStatus>>,
    latency: Arc<Mutex<Option<Duration>>>,
}

impl TcpTransport {
    pub fn new(config: TcpTransportConfig) -> Self {
        Self {
            config,
            link: Mutex::new(None),
            status: Arc::new(Mutex::new(TransportStatus::Closed)),
            latency: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &TcpTransportConfig {
        &self.config
    }

    fn live_link(&self) -> Option<Arc<Link>> {
        let link = self.link.lock().clone();
        link.filter(|l| !l.is_ended())
    }

    fn set_status(&self, status: TransportStatus) {
        *self.status.lock() = status;
    }
}

impl Transport for TcpTransport {
    async fn connect(&self) -> Result<InboundReceiver, TransportError> {
        if self.live_link().is_some() {
            return Err(TransportError::ConnectFailed("already connected".into()));
        }
        self.set_status(TransportStatus::Opening);
        tracing::debug!("connecting to {}", self.config.addr);

        let stream = match tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(&self.config.addr),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.set_status(TransportStatus::Closed);
                return Err(TransportError::ConnectFailed(e.to_string()));
            }
            Err(_) => {
                self.set_status(TransportStatus::Closed);
                return Err(TransportError::Timeout(self.config.connect_timeout));
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("TCP_NODELAY not set: {e}");
        }

        let (reader, writer) = stream.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.latency.lock() = None;

        let link = Arc::new(Link {
            outbound: out_tx,
            inbound: in_tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            ping: Mutex::new(None),
            last_seen: Mutex::new(Instant::now()),
            latency: Arc::clone(&self.latency),
            status: Arc::clone(&self.status),
            ended: AtomicBool::new(false),
            shutdown: shutdown_tx,
        });

        // Opened before the tasks start so an immediate EOF can only move
        // the status forward to Closed.
        self.set_status(TransportStatus::Opened);
        *self.link.lock() = Some(Arc::clone(&link));

        let frame = self.config.frame.clone();
        tokio::spawn(write_loop(
            writer,
            out_rx,
            Arc::clone(&link),
            shutdown_rx.clone(),
            frame.clone(),
        ));
        tokio::spawn(read_loop(
            reader,
            Arc::clone(&link),
            shutdown_rx.clone(),
            frame,
        ));
        tokio::spawn(heartbeat_loop(
            link,
            shutdown_rx,
            self.config.heartbeat_interval,
            self.config.heartbeat_timeout,
        ));

        tracing::info!("connected to {}", self.config.addr);
        Ok(in_rx)
    }

    async fn call(&self, name: &str, payload: Value) -> Result<Value, TransportError> {
        let link = self.live_link().ok_or(TransportError::NotConnected)?;

        let id = link.next_id();
        let (tx, rx) = oneshot::channel();
        link.pending.lock().insert(id, tx);

        // `end` may have drained `pending` between the liveness check and
        // the insert above.
        if link.is_ended() {
            link.pending.lock().remove(&id);
            return Err(TransportError::Closed);
        }

        let req = Frame::Req {
            id,
            name: name.to_string(),
            payload,
        };
        if link.outbound.send(req).is_err() {
            link.pending.lock().remove(&id);
            return Err(TransportError::Closed);
        }

        match tokio::time::timeout(self.config.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                link.pending.lock().remove(&id);
                tracing::warn!("call '{name}' timed out after {:?}", self.config.call_timeout);
                Err(TransportError::Timeout(self.config.call_timeout))
            }
        }
    }

    fn send(&self, name: &str, payload: Value) {
        let Some(link) = self.live_link() else {
            tracing::trace!("dropping '{name}': not connected");
            return;
        };
        let msg = Frame::Msg {
            name: name.to_string(),
            payload,
        };
        if link.outbound.send(msg).is_err() {
            tracing::trace!("dropping '{name}': writer gone");
        }
    }

    fn disconnect(&self, manual: bool) {
        let link = self.link.lock().take();
        let Some(link) = link else {
            return;
        };
        if link.is_ended() {
            return;
        }
        self.set_status(TransportStatus::Closing);
        link.end(manual, None);
    }

    fn status(&self) -> TransportStatus {
        *self.status.lock()
    }

    fn last_heartbeat_latency(&self) -> Option<Duration> {
        *self.latency.lock()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.end(true, Some("transport dropped".into()));
        }
    }
}

// ---------------------------------------------------------------------------
// Connection tasks
// ---------------------------------------------------------------------------

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<Frame>,
    link: Arc<Link>,
    mut shutdown: watch::Receiver<bool>,
    config: FrameConfig,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = write_frame(&mut writer, &frame, &config).await {
                    tracing::warn!("write failed: {e}");
                    link.end(false, Some(e.to_string()));
                    break;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    link: Arc<Link>,
    mut shutdown: watch::Receiver<bool>,
    config: FrameConfig,
) {
    loop {
        let result = tokio::select! {
            _ = shutdown.changed() => return,
            result = read_frame(&mut reader, &config) => result,
        };

        let frame = match result {
            Ok(frame) => frame,
            // The length prefix was consumed, so the stream is still aligned.
            Err(FrameError::Codec(e)) => {
                tracing::warn!("skipping malformed frame: {e}");
                continue;
            }
            Err(FrameError::ConnectionClosed) => {
                link.end(false, Some("connection closed by server".into()));
                return;
            }
            Err(e) => {
                link.end(false, Some(e.to_string()));
                return;
            }
        };
        link.touch();

        match frame {
            Frame::Msg { name, payload } => {
                let _ = link.inbound.send(TransportEvent::Message { name, payload });
            }
            Frame::Res { id, ok, err } => link.resolve(id, ok, err),
            Frame::Ping { id } => {
                let _ = link.outbound.send(Frame::Pong { id });
            }
            Frame::Pong { id } => link.pong(id),
            Frame::Req { id, name, .. } => {
                tracing::warn!("server request '{name}' is not supported");
                let _ = link.outbound.send(Frame::Res {
                    id,
                    ok: None,
                    err: Some(format!("unsupported request '{name}'")),
                });
            }
        }
    }
}

/// Send a ping every `every`.  If nothing at all has been heard from the
/// server for longer than `timeout`, end the connection.
async fn heartbeat_loop(
    link: Arc<Link>,
    mut shutdown: watch::Receiver<bool>,
    every: Duration,
    timeout: Duration,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = interval.tick() => {}
        }
        if link.is_ended() {
            return;
        }

        let silent_for = link.last_seen.lock().elapsed();
        if silent_for > timeout {
            tracing::warn!("heartbeat timeout: nothing received in {silent_for:?}");
            link.end(false, Some(format!("heartbeat timeout after {timeout:?}")));
            return;
        }

        let Some(id) = link.begin_ping(timeout) else {
            continue;
        };
        if link.outbound.send(Frame::Ping { id }).is_err() {
            return;
        }
    }
}
