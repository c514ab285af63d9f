//! Reconnecting connection manager.
//!
//! Owns one socket at a time and drives it through
//!
//! ```text
//! Idle ─connect()─► Connecting ─open─► Open ─close/error─► Closed
//!                        │                │                   │
//!                        └──fail──► Closed│          (reconnect_delay)
//!                                         │                   ▼
//!                            disconnect() ▼               Connecting …
//!                                      Closing ─► Closed (stays closed)
//! ```
//!
//! # Rules
//!
//! - `connect()` while `Connecting` or `Open` does nothing, so at most one
//!   socket is ever being opened.
//! - Frames sent while not `Open` are queued and written in order the moment
//!   the next socket opens, right after the optional channel handshake.
//! - An unsolicited close or error schedules exactly one reconnect attempt
//!   after the fixed delay.  A new schedule replaces any pending one.
//! - Every socket gets a generation number; events from a socket that has
//!   since been replaced or disconnected are ignored.
//! - `disconnect()` clears the queue, cancels the timer, and leaves the
//!   manager `Closed` with no reconnect until `connect()` is called again.
//!
//! State lives behind a `std::sync::Mutex` that is never held across an
//! `.await` or while listeners run.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use droidlink_core::{encode_create_channel, HandshakeError};
use tokio::sync::mpsc::{error::SendError, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::application::events::{Event, EventRegistry, Subscription};
use crate::application::transport::{Connector, Frame, Outbound, Socket, SocketEvent, TransportError};

/// Delay between an unsolicited disconnect and the next connect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Close code reported for a disconnect requested by this side.
pub const CLOSE_NORMAL: u16 = 1000;

// ── Configuration ─────────────────────────────────────────────────────────────

/// Where to connect and how to behave once connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub url: Url,
    pub reconnect_delay: Duration,
    handshake: Option<Vec<u8>>,
}

impl ConnectionConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            handshake: None,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Opens channel `code` on `channel_id` every time a socket opens.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError`] if `code` is not a valid channel code.
    pub fn with_channel(mut self, channel_id: u32, code: &str) -> Result<Self, HandshakeError> {
        self.handshake = Some(encode_create_channel(channel_id, code)?);
        Ok(self)
    }

    /// The create-channel frame written first on every open, if any.
    pub fn handshake_frame(&self) -> Option<&[u8]> {
        self.handshake.as_deref()
    }
}

// ── State and events ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Everything a connection reports to its listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    /// The socket is open and queued frames have been written.
    Connected,
    Message(Frame),
    /// The socket closed, by either side.
    Disconnected { code: Option<u16>, reason: String },
    /// Opening failed or the open socket reported an error.
    StreamError(TransportError),
    ReconnectScheduled(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEventKind {
    StateChanged,
    Connected,
    Message,
    Disconnected,
    StreamError,
    ReconnectScheduled,
}

impl Event for ConnectionEvent {
    type Kind = ConnectionEventKind;

    fn kind(&self) -> ConnectionEventKind {
        match self {
            Self::StateChanged(_) => ConnectionEventKind::StateChanged,
            Self::Connected => ConnectionEventKind::Connected,
            Self::Message(_) => ConnectionEventKind::Message,
            Self::Disconnected { .. } => ConnectionEventKind::Disconnected,
            Self::StreamError(_) => ConnectionEventKind::StreamError,
            Self::ReconnectScheduled(_) => ConnectionEventKind::ReconnectScheduled,
        }
    }
}

// ── Manager ───────────────────────────────────────────────────────────────────

/// Owns the socket lifecycle for one endpoint.
///
/// Dropping the manager closes the socket and cancels any pending reconnect
/// without notifying listeners.
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    events: EventRegistry<ConnectionEvent>,
    frame_handler: Option<FrameHandler>,
    inner: Mutex<Inner>,
}

type FrameHandler = Box<dyn Fn(Frame) + Send + Sync>;

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    /// Bumped on every connect attempt and every disconnect.
    generation: u64,
    outbound: Option<UnboundedSender<Outbound>>,
    pending: VecDeque<Frame>,
    reader: Option<JoinHandle<()>>,
    reconnect: Option<ReconnectTimer>,
    next_timer_id: u64,
}

struct ReconnectTimer {
    id: u64,
    handle: JoinHandle<()>,
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, config: ConnectionConfig) -> Self {
        Self::build(connector, config, None)
    }

    /// Like [`ConnectionManager::new`], but inbound frames are handed to
    /// `handler` by value instead of being emitted as
    /// [`ConnectionEvent::Message`].  Used by consumers that decode every
    /// frame and must not copy large video buffers.
    pub fn with_frame_handler<F>(
        connector: Arc<dyn Connector>,
        config: ConnectionConfig,
        handler: F,
    ) -> Self
    where
        F: Fn(Frame) + Send + Sync + 'static,
    {
        Self::build(connector, config, Some(Box::new(handler)))
    }

    fn build(
        connector: Arc<dyn Connector>,
        config: ConnectionConfig,
        frame_handler: Option<FrameHandler>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                config,
                events: EventRegistry::new(),
                frame_handler,
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    /// Opens the socket unless one is already open or opening.
    ///
    /// Resolves when the socket has opened (`Ok`) or failed to open (`Err`).
    /// A failure is also reported as [`ConnectionEvent::StreamError`] and
    /// schedules a reconnect.  Calling this while another call is in flight
    /// returns `Ok(())` immediately without opening a second socket.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectFailed`] when the transport cannot open
    /// the socket, or [`TransportError::Closed`] when `disconnect()` ran while
    /// the socket was opening.
    pub async fn connect(&self) -> Result<(), TransportError> {
        Arc::clone(&self.shared).connect().await
    }

    /// Writes `frame` now if open, otherwise queues it for the next open.
    pub fn send(&self, frame: Frame) {
        let mut inner = self.shared.lock();
        let rejected = match (inner.state, inner.outbound.as_ref()) {
            (ConnectionState::Open, Some(outbound)) => match outbound.send(Outbound::Frame(frame)) {
                Ok(()) => return,
                Err(SendError(rejected)) => rejected,
            },
            _ => Outbound::Frame(frame),
        };
        if let Outbound::Frame(frame) = rejected {
            inner.pending.push_back(frame);
        }
    }

    pub fn send_binary(&self, data: impl Into<Vec<u8>>) {
        self.send(Frame::Binary(data.into()));
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.send(Frame::Text(text.into()));
    }

    /// Closes the socket, drops queued frames, and cancels any reconnect.
    ///
    /// Safe to call from any state and more than once.
    pub fn disconnect(&self) {
        self.shared.close(true);
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Number of frames waiting for the next open socket.
    pub fn pending_len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn has_pending_reconnect(&self) -> bool {
        self.shared.lock().reconnect.is_some()
    }

    pub fn url(&self) -> &Url {
        &self.shared.config.url
    }

    pub fn subscribe<F>(&self, kind: ConnectionEventKind, listener: F) -> Subscription
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(kind, listener)
    }

    /// Another handle to this manager's listener registry.
    pub fn events(&self) -> EventRegistry<ConnectionEvent> {
        self.shared.events.clone()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shared.close(false);
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, events: Vec<ConnectionEvent>) {
        for event in &events {
            self.events.emit(event);
        }
    }

    // Boxed so the reconnect timer, which calls back into `connect`, has a
    // nameable `Send` future type.
    fn connect(self: Arc<Self>) -> BoxFuture<Result<(), TransportError>> {
        Box::pin(async move {
            let Some(generation) = self.begin_connect() else {
                return Ok(());
            };

            info!(url = %self.config.url, generation, "connecting");
            match self.connector.connect(&self.config.url).await {
                Ok(socket) => self.on_open(generation, socket),
                Err(err) => {
                    warn!(url = %self.config.url, "connect failed: {err}");
                    self.on_connect_failed(generation, err.clone());
                    Err(err)
                }
            }
        })
    }

    /// Moves to `Connecting`, or returns `None` if a socket is already open
    /// or opening.
    fn begin_connect(&self) -> Option<u64> {
        let mut events = Vec::new();
        let generation = {
            let mut inner = self.lock();
            if matches!(
                inner.state,
                ConnectionState::Connecting | ConnectionState::Open
            ) {
                debug!(url = %self.config.url, state = ?inner.state, "connect ignored, already active");
                return None;
            }
            inner.cancel_reconnect();
            inner.generation += 1;
            inner.transition(ConnectionState::Connecting, &mut events);
            inner.generation
        };
        self.dispatch(events);
        Some(generation)
    }

    fn on_open(self: &Arc<Self>, generation: u64, socket: Socket) -> Result<(), TransportError> {
        let Socket { outbound, inbound } = socket;
        let mut events = Vec::new();
        let flushed = {
            let mut inner = self.lock();
            if inner.generation != generation || inner.state != ConnectionState::Connecting {
                debug!(url = %self.config.url, "socket opened after disconnect; closing it");
                let _ = outbound.send(Outbound::Close);
                return Err(TransportError::Closed);
            }

            if let Some(handshake) = self.config.handshake_frame() {
                let _ = outbound.send(Outbound::Frame(Frame::Binary(handshake.to_vec())));
            }

            let mut flushed = 0usize;
            while let Some(frame) = inner.pending.pop_front() {
                match outbound.send(Outbound::Frame(frame)) {
                    Ok(()) => flushed += 1,
                    Err(SendError(rejected)) => {
                        if let Outbound::Frame(frame) = rejected {
                            inner.pending.push_front(frame);
                        }
                        break;
                    }
                }
            }

            inner.cancel_reconnect();
            inner.outbound = Some(outbound);
            inner.transition(ConnectionState::Open, &mut events);
            events.push(ConnectionEvent::Connected);
            flushed
        };

        info!(url = %self.config.url, generation, flushed, "connected");
        self.dispatch(events);

        let reader = tokio::spawn(read_socket(Arc::downgrade(self), generation, inbound));
        let mut inner = self.lock();
        if inner.generation == generation {
            inner.reader = Some(reader);
        } else {
            reader.abort();
        }
        Ok(())
    }

    fn on_connect_failed(self: &Arc<Self>, generation: u64, err: TransportError) {
        let mut events = vec![ConnectionEvent::StreamError(err)];
        {
            let mut inner = self.lock();
            if inner.generation != generation {
                return;
            }
            inner.transition(ConnectionState::Closed, &mut events);
            self.schedule_reconnect(&mut inner, &mut events);
        }
        self.dispatch(events);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    /// Handles a close or error reported by the socket of `generation`.
    ///
    /// The first such report moves to `Closed` and schedules the reconnect;
    /// later reports from the same socket are passed to listeners but do not
    /// schedule again.
    fn on_socket_down(self: &Arc<Self>, generation: u64, event: ConnectionEvent) {
        let mut events = vec![event];
        {
            let mut inner = self.lock();
            if inner.generation != generation {
                debug!(generation, "ignoring event from a replaced socket");
                return;
            }
            if inner.state == ConnectionState::Open {
                inner.outbound = None;
                // Detach rather than abort: this runs on the reader task itself.
                inner.reader = None;
                inner.transition(ConnectionState::Closed, &mut events);
                self.schedule_reconnect(&mut inner, &mut events);
            }
        }
        self.dispatch(events);
    }

    fn schedule_reconnect(self: &Arc<Self>, inner: &mut Inner, events: &mut Vec<ConnectionEvent>) {
        inner.cancel_reconnect();
        inner.next_timer_id += 1;
        let id = inner.next_timer_id;
        let delay = self.config.reconnect_delay;
        let weak = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if !shared.claim_timer(id) {
                return;
            }
            if let Err(err) = shared.connect().await {
                debug!("reconnect attempt failed: {err}");
            }
        });

        inner.reconnect = Some(ReconnectTimer { id, handle });
        events.push(ConnectionEvent::ReconnectScheduled(delay));
        info!(url = %self.config.url, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
    }

    /// Removes timer `id` from the state so the connect it triggers does not
    /// abort the timer task itself.  Returns `false` if it was superseded.
    fn claim_timer(&self, id: u64) -> bool {
        let mut inner = self.lock();
        match &inner.reconnect {
            Some(timer) if timer.id == id => {
                inner.reconnect = None;
                true
            }
            _ => false,
        }
    }

    fn close(&self, notify: bool) {
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            inner.cancel_reconnect();
            inner.pending.clear();
            inner.generation += 1;
            if let Some(reader) = inner.reader.take() {
                reader.abort();
            }
            if let Some(outbound) = inner.outbound.take() {
                inner.transition(ConnectionState::Closing, &mut events);
                let _ = outbound.send(Outbound::Close);
                events.push(ConnectionEvent::Disconnected {
                    code: Some(CLOSE_NORMAL),
                    reason: String::new(),
                });
            }
            inner.transition(ConnectionState::Closed, &mut events);
        }
        if notify {
            info!(url = %self.config.url, "disconnected by request");
            self.dispatch(events);
        }
    }
}

impl Inner {
    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect.take() {
            timer.handle.abort();
        }
    }

    fn transition(&mut self, to: ConnectionState, events: &mut Vec<ConnectionEvent>) {
        if self.state != to {
            debug!(from = ?self.state, ?to, "connection state");
            self.state = to;
            events.push(ConnectionEvent::StateChanged(to));
        }
    }
}

async fn read_socket(weak: Weak<Shared>, generation: u64, mut inbound: UnboundedReceiver<SocketEvent>) {
    let mut saw_close = false;
    while let Some(event) = inbound.recv().await {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        match event {
            SocketEvent::Message(frame) => {
                if shared.is_current(generation) {
                    match &shared.frame_handler {
                        Some(handler) => handler(frame),
                        None => {
                            shared.events.emit(&ConnectionEvent::Message(frame));
                        }
                    }
                }
            }
            SocketEvent::Closed { code, reason } => {
                info!(url = %shared.config.url, ?code, %reason, "socket closed");
                saw_close = true;
                shared.on_socket_down(generation, ConnectionEvent::Disconnected { code, reason });
            }
            SocketEvent::Error(err) => {
                warn!(url = %shared.config.url, "socket error: {err}");
                shared.on_socket_down(generation, ConnectionEvent::StreamError(err));
            }
        }
    }

    if !saw_close {
        if let Some(shared) = weak.upgrade() {
            shared.on_socket_down(
                generation,
                ConnectionEvent::Disconnected {
                    code: None,
                    reason: String::new(),
                },
            );
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
