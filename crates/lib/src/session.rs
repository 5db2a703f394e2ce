//! Bridge session: one browser WebSocket relayed to one backend line connection.
//!
//! A session runs three duties as separate tasks:
//! - browser → backend: every inbound frame payload is written to the backend verbatim;
//! - backend → browser: every backend line becomes one text frame;
//! - liveness probe: pings the browser every half keep-alive interval and shuts the
//!   session down when pongs stop arriving.
//!
//! Any duty may end the session. Shutdown runs exactly once no matter how many
//! callers race on it, and after it starts no duty writes to either transport.

use crate::transport::{
    self, BrowserSink, BrowserSource, Frame, LineSink, LineSource, TransportError,
};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(80);
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_READ_LIMIT: usize = 2048;

const PING_PAYLOAD: &[u8] = b"keepalive";

/// Session could not be created. Nothing was spawned.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("dialing backend {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("dialing backend {addr} timed out after {timeout:?}")]
    DialTimeout { addr: String, timeout: Duration },
}

/// Timing and size limits for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Upper bound on connecting to the backend.
    pub dial_timeout: Duration,
    /// Full keep-alive cycle; the browser is pinged every half of it.
    pub keep_alive: Duration,
    /// How stale the last pong may be, relative to the latest ping, before the browser counts as gone.
    pub ack_timeout: Duration,
    /// Largest inbound WebSocket message, in bytes.
    pub read_limit: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            keep_alive: DEFAULT_KEEP_ALIVE,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            read_limit: DEFAULT_READ_LIMIT,
        }
    }
}

const RUNNING: u8 = 0;
const SHUTTING_DOWN: u8 = 1;
const CLOSED: u8 = 2;

/// Time of the last pong, as nanoseconds since `base`.
struct LastAck {
    base: Instant,
    nanos: AtomicU64,
}

impl LastAck {
    fn new() -> Self {
        Self {
            base: Instant::now(),
            nanos: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let nanos = u64::try_from(self.base.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.nanos.store(nanos, Ordering::SeqCst);
    }

    fn get(&self) -> Instant {
        self.base + Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// One stop signal per duty.
struct StopSignals {
    browser_reader: CancellationToken,
    backend_reader: CancellationToken,
    probe: CancellationToken,
}

impl StopSignals {
    fn new() -> Self {
        Self {
            browser_reader: CancellationToken::new(),
            backend_reader: CancellationToken::new(),
            probe: CancellationToken::new(),
        }
    }

    fn cancel_all(&self) {
        self.browser_reader.cancel();
        self.backend_reader.cancel();
        self.probe.cancel();
    }
}

struct Shared {
    id: String,
    settings: SessionSettings,
    state: AtomicU8,
    /// Guards every browser write and the browser close.
    browser: Mutex<Box<dyn BrowserSink>>,
    stop: StopSignals,
    last_ack: Arc<LastAck>,
}

impl Shared {
    fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RUNNING
    }

    async fn send_browser(&self, frame: Frame) -> Result<(), TransportError> {
        let mut sink = self.browser.lock().await;
        if !self.is_running() {
            return Err(TransportError::Closed);
        }
        sink.send(frame).await
    }

    async fn shutdown(&self, reason: &str) {
        if self
            .state
            .compare_exchange(RUNNING, SHUTTING_DOWN, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        log::info!("session {}: shutting down ({})", self.id, reason);
        // Readers must be released even while a browser write holds the lock.
        self.stop.cancel_all();
        let mut sink = self.browser.lock().await;
        if let Err(e) = sink.send(Frame::Close).await {
            log::debug!("session {}: close frame not delivered: {}", self.id, e);
        }
        if let Err(e) = sink.close().await {
            log::debug!("session {}: closing browser transport: {}", self.id, e);
        }
        self.state.store(CLOSED, Ordering::SeqCst);
    }
}

/// A running session. Dropping it leaves the duties running; they end on their own
/// when either side closes, errors or goes idle.
pub struct Session {
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

/// Cloneable handle for observing or ending a session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn is_closed(&self) -> bool {
        !self.shared.is_running()
    }

    /// End the session. Safe to call any number of times from anywhere.
    pub async fn shutdown(&self) {
        self.shared.shutdown("requested").await;
    }
}

/// Backend connection waiting for its browser transport.
pub struct DialedBackend {
    reader: transport::BackendReader,
    writer: transport::BackendWriter,
    settings: SessionSettings,
}

impl DialedBackend {
    /// Start a session relaying this backend to the given browser transport.
    pub fn attach<S, K>(self, source: S, sink: K) -> Session
    where
        S: BrowserSource + 'static,
        K: BrowserSink + 'static,
    {
        Session::start(source, sink, self.reader, self.writer, self.settings)
    }
}

impl Session {
    /// Dial `backend_addr` and start relaying it to the given browser transport.
    pub async fn create<S, K>(
        backend_addr: &str,
        source: S,
        sink: K,
        settings: SessionSettings,
    ) -> Result<Self, SessionError>
    where
        S: BrowserSource + 'static,
        K: BrowserSink + 'static,
    {
        Ok(Self::dial(backend_addr, settings).await?.attach(source, sink))
    }

    /// First half of [`Session::create`]: connect to the backend before a browser
    /// transport exists. The gateway uses this so a dial failure can still be
    /// answered over plain HTTP.
    pub async fn dial(
        backend_addr: &str,
        settings: SessionSettings,
    ) -> Result<DialedBackend, SessionError> {
        let (reader, writer) = transport::dial(backend_addr, settings.dial_timeout).await?;
        log::debug!("connected to backend {}", backend_addr);
        Ok(DialedBackend {
            reader,
            writer,
            settings,
        })
    }

    /// Start relaying between already-established transports. Returns as soon
    /// as the duties are spawned.
    pub fn start<S, K, R, W>(
        mut source: S,
        sink: K,
        backend_reader: R,
        backend_writer: W,
        settings: SessionSettings,
    ) -> Self
    where
        S: BrowserSource + 'static,
        K: BrowserSink + 'static,
        R: LineSource + 'static,
        W: LineSink + 'static,
    {
        let id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let last_ack = Arc::new(LastAck::new());
        let ack = last_ack.clone();
        source.on_pong(Arc::new(move || ack.touch()));

        let shared = Arc::new(Shared {
            id,
            settings,
            state: AtomicU8::new(RUNNING),
            browser: Mutex::new(Box::new(sink) as Box<dyn BrowserSink>),
            stop: StopSignals::new(),
            last_ack,
        });

        let tasks = vec![
            tokio::spawn(probe(shared.clone())),
            tokio::spawn(backend_to_browser(shared.clone(), Box::new(backend_reader))),
            tokio::spawn(browser_to_backend(
                shared.clone(),
                Box::new(source),
                Box::new(backend_writer),
            )),
        ];
        log::info!("session {}: started", shared.id);
        Self { shared, tasks }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        !self.shared.is_running()
    }

    pub async fn shutdown(&self) {
        self.shared.shutdown("requested").await;
    }

    /// Wait for all three duties to return.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                log::warn!("session {}: duty task failed: {}", self.shared.id, e);
            }
        }
        log::debug!("session {}: all duties finished", self.shared.id);
    }
}

async fn browser_to_backend(
    shared: Arc<Shared>,
    mut source: Box<dyn BrowserSource>,
    mut backend: Box<dyn LineSink>,
) {
    let stop = shared.stop.browser_reader.clone();
    loop {
        let res = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            res = source.recv() => res,
        };
        let payload = match res {
            Ok(payload) => payload,
            Err(e) => {
                shared.shutdown(&format!("browser read: {}", e)).await;
                break;
            }
        };
        if !shared.is_running() {
            break;
        }
        log::trace!("session {}: browser -> backend {} bytes", shared.id, payload.len());
        if let Err(e) = backend.write(&payload).await {
            shared.shutdown(&format!("backend write: {}", e)).await;
            break;
        }
    }
    if let Err(e) = backend.close().await {
        log::debug!("session {}: closing backend transport: {}", shared.id, e);
    }
}

async fn backend_to_browser(shared: Arc<Shared>, mut backend: Box<dyn LineSource>) {
    let stop = shared.stop.backend_reader.clone();
    loop {
        let res = tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            res = backend.read_line() => res,
        };
        let line = match res {
            Ok(line) => line,
            Err(e) => {
                shared.shutdown(&format!("backend read: {}", e)).await;
                return;
            }
        };
        let text = String::from_utf8_lossy(&line).into_owned();
        if let Err(e) = shared.send_browser(Frame::Text(text)).await {
            shared.shutdown(&format!("browser write: {}", e)).await;
            return;
        }
    }
}

async fn probe(shared: Arc<Shared>) {
    let stop = shared.stop.probe.clone();
    let half = shared.settings.keep_alive / 2;
    let ack_timeout = shared.settings.ack_timeout;
    loop {
        if stop.is_cancelled() {
            return;
        }
        let pinged_at = Instant::now();
        if let Err(e) = shared.send_browser(Frame::Ping(PING_PAYLOAD.to_vec())).await {
            shared.shutdown(&format!("ping: {}", e)).await;
            return;
        }
        tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(half) => {}
        }
        if pinged_at.saturating_duration_since(shared.last_ack.get()) > ack_timeout {
            log::warn!(
                "session {}: no pong for {:?}, closing",
                shared.id,
                shared.last_ack.get().elapsed()
            );
            shared.shutdown("browser unresponsive").await;
            return;
        }
    }
}
