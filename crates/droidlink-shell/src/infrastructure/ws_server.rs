//! WebSocket server: accept loop and per-session task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections.
//! 3. Upgrading each connection to a WebSocket.  Only `action=shell` and
//!    `action=multiplex` are accepted; anything else is refused with 400.
//! 4. Running one shell per session and carrying out what its
//!    [`ShellBridge`] returns.
//! 5. Gracefully shutting down when the `running` flag is cleared.
//!
//! # Two ways in
//!
//! - `?action=shell`: the whole socket is one shell session.  Browser frames
//!   are its input and its output goes back as plain text/binary messages.
//! - `?action=multiplex`: the socket carries multiplexer frames.  Every
//!   `CreateChannel` with code `SHEL` starts an independent shell session on
//!   that channel id.  Its output is wrapped in `RawStringData` /
//!   `RawBinaryData` frames, and its end is a `CloseChannel` frame carrying
//!   the close code and reason.  Other channel codes are closed at once.
//!
//! # Session loop
//!
//! Each shell is a single task ([`drive_shell`]) selecting over three sources:
//!
//! ```text
//!            ┌── peer payload ───► bridge.on_inbound  ──► spawn / write / stop
//! select! ───┼── process event ──► bridge.on_output / on_process_exit
//!            └── flush deadline ─► bridge.on_flush_timer ──► frames to peer
//! ```
//!
//! The bridge is owned by that task, so no locking is needed.  Whatever path
//! ends the session, the bridge is released and the process killed.  The
//! connection task owns the socket and moves payloads and frames between it
//! and the shell tasks over channels.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use droidlink_core::{
    encode_close_channel, encode_mux_frame, Action, ChannelCode, MuxFrame, MuxMessageType,
};

use crate::application::shell_bridge::{InboundAction, ShellBridge};
use crate::domain::config::{ShellServerConfig, CLOSE_ABNORMAL, CLOSE_NORMAL};
use crate::domain::messages::{InboundPayload, OutboundFrame};
use crate::infrastructure::process::{ProcessEvent, ShellProcess};

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

/// Longest close reason a control frame can carry, in bytes.
const MAX_CLOSE_REASON: usize = 123;

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `config.bind_addr` and serves shell sessions until `running` is set
/// to `false`.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (e.g., the port is
/// already in use).
pub async fn run_server(config: ShellServerConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind shell listener on {}", config.bind_addr))?;
    serve(listener, config, running).await
}

/// Runs the accept loop on an already bound listener.  Each accepted
/// connection gets its own task, so one slow session never blocks another.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn serve(
    listener: TcpListener,
    config: ShellServerConfig,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let local = listener
        .local_addr()
        .context("failed to read listener address")?;
    info!("shell server listening on {local}");

    let config = Arc::new(config);

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // A short accept timeout lets the loop notice the shutdown flag.
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                let cfg = Arc::clone(&config);
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, cfg).await;
                });
            }
            Ok(Err(e)) => {
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }

    Ok(())
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// What the upgrade request asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Upgrade {
    Shell,
    Multiplex,
}

async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, config: Arc<ShellServerConfig>) {
    let session = Uuid::new_v4();
    match run_connection(stream, peer_addr, session, config).await {
        Ok(()) => info!(%session, "connection {peer_addr} closed"),
        Err(e) => warn!(%session, "connection {peer_addr} closed with error: {e:#}"),
    }
}

/// Accepts the upgrade only for `?action=shell` and `?action=multiplex`.
#[allow(clippy::result_large_err)]
fn check_upgrade(request: &Request, response: Response) -> Result<(Response, Upgrade), ErrorResponse> {
    let query = request.uri().query().unwrap_or_default();
    let action = url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "action")
        .and_then(|(_, value)| value.parse::<Action>().ok());
    match action {
        Some(Action::Shell) => Ok((response, Upgrade::Shell)),
        Some(Action::Multiplex) => Ok((response, Upgrade::Multiplex)),
        _ => {
            let mut refusal = ErrorResponse::new(Some("expected action=shell or action=multiplex".to_string()));
            *refusal.status_mut() = StatusCode::BAD_REQUEST;
            Err(refusal)
        }
    }
}

async fn run_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    session: Uuid,
    config: Arc<ShellServerConfig>,
) -> anyhow::Result<()> {
    let mut upgrade = None;
    let ws = accept_hdr_async(stream, |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let (response, kind) = check_upgrade(request, response)?;
        upgrade = Some(kind);
        Ok(response)
    })
    .await
    .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;

    match upgrade.context("upgrade accepted without an action")? {
        Upgrade::Shell => {
            info!(%session, "shell session opened by {peer_addr}");
            serve_shell_socket(ws, session, config).await
        }
        Upgrade::Multiplex => {
            info!(%session, "multiplexed connection opened by {peer_addr}");
            serve_multiplexed(ws, session, config).await
        }
    }
}

// ── Direct shell socket ───────────────────────────────────────────────────────

async fn serve_shell_socket(
    ws: WebSocketStream<TcpStream>,
    session: Uuid,
    config: Arc<ShellServerConfig>,
) -> anyhow::Result<()> {
    let (mut sink, mut source) = ws.split();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let shell = tokio::spawn(drive_shell(session, config, inbound_rx, move |frame| {
        outbound_tx.send(frame).is_ok()
    }));

    loop {
        tokio::select! {
            message = source.next() => match message {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = inbound_tx.send(InboundPayload::Text(text));
                }
                Some(Ok(WsMessage::Binary(bytes))) => {
                    let _ = inbound_tx.send(InboundPayload::Binary(bytes));
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!(%session, "browser closed the socket");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(%session, "socket error: {e}");
                    break;
                }
            },
            frame = outbound_rx.recv() => match frame {
                Some(frame) => {
                    let last = matches!(frame, OutboundFrame::Close { .. });
                    send_frame(&mut sink, frame)
                        .await
                        .with_context(|| format!("session {session}: send failed"))?;
                    if last {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    // Ends the shell if it is still running.
    drop(inbound_tx);
    shell.await.context("shell task panicked")?;
    Ok(())
}

async fn send_frame(sink: &mut WsSink, frame: OutboundFrame) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let message = match frame {
        OutboundFrame::Text(text) => WsMessage::Text(text),
        OutboundFrame::Binary(bytes) => WsMessage::Binary(bytes),
        OutboundFrame::Close { code, reason } => WsMessage::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: truncate_reason(reason).into(),
        })),
    };
    sink.send(message).await
}

fn truncate_reason(mut reason: String) -> String {
    if reason.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

// ── Multiplexed socket ────────────────────────────────────────────────────────

type ChannelInputs = HashMap<u32, mpsc::UnboundedSender<InboundPayload>>;

async fn serve_multiplexed(
    ws: WebSocketStream<TcpStream>,
    session: Uuid,
    config: Arc<ShellServerConfig>,
) -> anyhow::Result<()> {
    let (mut sink, mut source) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<(u32, OutboundFrame)>();
    let mut channels = ChannelInputs::new();
    let mut shells = JoinSet::new();

    loop {
        tokio::select! {
            message = source.next() => match message {
                Some(Ok(WsMessage::Binary(data))) => {
                    let reply = route_mux_frame(session, &config, &data, &mut channels, &mut shells, &outbound_tx);
                    if let Some(reply) = reply {
                        sink.send(WsMessage::Binary(reply))
                            .await
                            .with_context(|| format!("session {session}: send failed"))?;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!(%session, "multiplexed socket closed");
                    break;
                }
                // Text frames are not part of the multiplexer protocol.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(%session, "socket error: {e}");
                    break;
                }
            },
            Some((channel_id, frame)) = outbound_rx.recv() => {
                if matches!(frame, OutboundFrame::Close { .. }) {
                    channels.remove(&channel_id);
                }
                sink.send(WsMessage::Binary(encode_channel_frame(channel_id, frame)))
                    .await
                    .with_context(|| format!("session {session}: send failed"))?;
            }
            Some(_) = shells.join_next() => {}
        }
    }

    // Ends every shell still running on this socket.
    channels.clear();
    while shells.join_next().await.is_some() {}
    Ok(())
}

/// Handles one inbound multiplexer frame.  Returns a frame to send back
/// right away, if any.
fn route_mux_frame(
    session: Uuid,
    config: &Arc<ShellServerConfig>,
    data: &[u8],
    channels: &mut ChannelInputs,
    shells: &mut JoinSet<()>,
    outbound: &mpsc::UnboundedSender<(u32, OutboundFrame)>,
) -> Option<Vec<u8>> {
    let frame = match MuxFrame::parse(data) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(%session, "dropping malformed multiplexer frame: {e}");
            return None;
        }
    };
    let channel = frame.channel_id;

    match frame.kind() {
        Some(MuxMessageType::CreateChannel) => {
            if ChannelCode::from_bytes(frame.payload) != Some(ChannelCode::Shel) {
                let code = String::from_utf8_lossy(frame.payload);
                warn!(%session, channel, %code, "refusing unsupported channel");
                return Some(encode_close_channel(
                    channel,
                    CLOSE_ABNORMAL,
                    &format!("unsupported channel code: {code}"),
                ));
            }
            if channels.contains_key(&channel) {
                warn!(%session, channel, "channel already open; ignoring CreateChannel");
                return None;
            }
            let (input_tx, input_rx) = mpsc::unbounded_channel();
            channels.insert(channel, input_tx);
            let outbound = outbound.clone();
            shells.spawn(drive_shell(session, Arc::clone(config), input_rx, move |frame| {
                outbound.send((channel, frame)).is_ok()
            }));
            info!(%session, channel, "shell channel opened");
            None
        }
        Some(MuxMessageType::CloseChannel) => {
            if channels.remove(&channel).is_some() {
                debug!(%session, channel, "peer closed shell channel");
            }
            None
        }
        Some(kind @ (MuxMessageType::RawStringData | MuxMessageType::RawBinaryData | MuxMessageType::Data)) => {
            let Some(input) = channels.get(&channel) else {
                debug!(%session, channel, "data for unknown channel dropped");
                return None;
            };
            let payload = if kind == MuxMessageType::RawStringData {
                match String::from_utf8(frame.payload.to_vec()) {
                    Ok(text) => InboundPayload::Text(text),
                    Err(e) => InboundPayload::Binary(e.into_bytes()),
                }
            } else {
                InboundPayload::Binary(frame.payload.to_vec())
            };
            let _ = input.send(payload);
            None
        }
        None => {
            debug!(%session, channel, message_type = frame.message_type, "unknown multiplexer message type");
            None
        }
    }
}

fn encode_channel_frame(channel: u32, frame: OutboundFrame) -> Vec<u8> {
    match frame {
        OutboundFrame::Text(text) => encode_mux_frame(MuxMessageType::RawStringData, channel, text.as_bytes()),
        OutboundFrame::Binary(bytes) => encode_mux_frame(MuxMessageType::RawBinaryData, channel, &bytes),
        OutboundFrame::Close { code, reason } => encode_close_channel(channel, code, &reason),
    }
}

// ── Shell session ─────────────────────────────────────────────────────────────

/// Runs one shell fed by `inbound` and hands every outbound frame to `emit`.
///
/// Ends when the bridge closes, when `inbound` is closed by the peer side, or
/// when `emit` reports the peer gone.  A close frame is always the last frame
/// emitted, unless the peer went away first.
async fn drive_shell<F>(
    session: Uuid,
    config: Arc<ShellServerConfig>,
    mut inbound: mpsc::UnboundedReceiver<InboundPayload>,
    mut emit: F,
) where
    F: FnMut(OutboundFrame) -> bool + Send + 'static,
{
    let mut bridge = ShellBridge::new(config.buffer_mode, config.flush_window);
    let mut process: Option<ShellProcess> = None;
    // Set once a close frame went out or the peer is already gone.
    let mut close_done = false;

    while !bridge.is_closed() {
        let deadline = bridge.flush_deadline();
        let frames = tokio::select! {
            payload = inbound.recv() => {
                let Some(payload) = payload else {
                    debug!(%session, "peer left the shell");
                    close_done = true;
                    break;
                };
                match bridge.on_inbound(payload) {
                    InboundAction::Start { udid, cols, rows } => {
                        let args = config.command.args_for(&udid);
                        info!(%session, %udid, ?cols, ?rows, "starting shell");
                        match ShellProcess::spawn(&config.command.program, &args) {
                            Ok(spawned) => {
                                process = Some(spawned);
                                Vec::new()
                            }
                            Err(e) => {
                                warn!(%session, "{e}");
                                bridge.on_start_failed(&e)
                            }
                        }
                    }
                    InboundAction::Input(bytes) => {
                        if let Some(p) = &process {
                            if !p.write(bytes) {
                                debug!(%session, "input after stdin closed");
                            }
                        }
                        Vec::new()
                    }
                    InboundAction::Stop => {
                        info!(%session, "stop requested");
                        Vec::new()
                    }
                    InboundAction::Ignore => Vec::new(),
                }
            }
            event = next_process_event(&mut process) => match event {
                Some(ProcessEvent::Output(stream, chunk)) => {
                    bridge.on_output(stream, &chunk, Instant::now());
                    Vec::new()
                }
                Some(ProcessEvent::Exited(code)) => {
                    process = None;
                    bridge.on_process_exit(code)
                }
                None => {
                    process = None;
                    bridge.on_process_exit(None)
                }
            },
            () = flush_timer(deadline) => bridge.on_flush_timer(),
        };

        for frame in frames {
            if matches!(frame, OutboundFrame::Close { .. }) {
                close_done = true;
            }
            if !emit(frame) {
                debug!(%session, "peer gone; dropping shell output");
                close_done = true;
                bridge.release();
                break;
            }
        }
    }

    if bridge.release() {
        debug!(%session, "bridge released");
    }
    if let Some(mut p) = process.take() {
        p.kill();
    }
    if !close_done {
        emit(OutboundFrame::Close {
            code: CLOSE_NORMAL,
            reason: String::new(),
        });
    }
}

async fn next_process_event(process: &mut Option<ShellProcess>) -> Option<ProcessEvent> {
    match process {
        Some(p) => p.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn flush_timer(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use droidlink_core::ChannelClose;

    fn request(uri: &str) -> Request {
        Request::builder().uri(uri).body(()).unwrap()
    }

    fn test_config() -> Arc<ShellServerConfig> {
        Arc::new(ShellServerConfig::default())
    }

    #[test]
    fn test_upgrade_with_shell_action_is_accepted() {
        let (_, upgrade) = check_upgrade(&request("/?action=shell"), Response::new(())).unwrap();

        assert_eq!(upgrade, Upgrade::Shell);
    }

    #[test]
    fn test_upgrade_with_multiplex_action_is_accepted() {
        let (_, upgrade) = check_upgrade(&request("/?action=multiplex"), Response::new(())).unwrap();

        assert_eq!(upgrade, Upgrade::Multiplex);
    }

    #[test]
    fn test_upgrade_without_action_is_refused_with_400() {
        let refusal = check_upgrade(&request("/"), Response::new(())).unwrap_err();

        assert_eq!(refusal.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_upgrade_with_other_action_is_refused() {
        assert!(check_upgrade(&request("/?action=proxy-adb"), Response::new(())).is_err());
    }

    #[test]
    fn test_long_close_reason_is_cut_on_a_char_boundary() {
        let reason = "é".repeat(100);

        let cut = truncate_reason(reason);

        assert_eq!(cut.len(), 122);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_channel_frames_wrap_output_and_close() {
        let text = encode_channel_frame(2, OutboundFrame::Text("$ ".into()));
        let close = encode_channel_frame(
            2,
            OutboundFrame::Close {
                code: 1000,
                reason: String::new(),
            },
        );

        let text = MuxFrame::parse(&text).unwrap();
        assert_eq!(text.kind(), Some(MuxMessageType::RawStringData));
        assert_eq!(text.payload, b"$ ");
        let close = MuxFrame::parse(&close).unwrap();
        assert_eq!(close.kind(), Some(MuxMessageType::CloseChannel));
        assert_eq!(ChannelClose::parse(close.payload).unwrap().code, 1000);
    }

    #[tokio::test]
    async fn test_non_shell_channel_is_closed_at_once() {
        // Arrange
        let mut channels = ChannelInputs::new();
        let mut shells = JoinSet::new();
        let (outbound, _rx) = mpsc::unbounded_channel();
        let create = droidlink_core::encode_create_channel(5, "GTRC").unwrap();

        // Act
        let reply = route_mux_frame(Uuid::nil(), &test_config(), &create, &mut channels, &mut shells, &outbound);

        // Assert
        let reply = reply.expect("a CloseChannel reply");
        let frame = MuxFrame::parse(&reply).unwrap();
        assert_eq!(frame.kind(), Some(MuxMessageType::CloseChannel));
        assert_eq!(frame.channel_id, 5);
        assert_eq!(ChannelClose::parse(frame.payload).unwrap().code, CLOSE_ABNORMAL);
        assert!(channels.is_empty());
        assert!(shells.is_empty());
    }

    #[tokio::test]
    async fn test_shell_channel_is_registered_and_closed_by_peer() {
        // Arrange
        let mut channels = ChannelInputs::new();
        let mut shells = JoinSet::new();
        let (outbound, mut frames) = mpsc::unbounded_channel();
        let config = test_config();
        let create = droidlink_core::encode_create_channel(1, "SHEL").unwrap();
        let close = encode_close_channel(1, CLOSE_NORMAL, "");

        // Act
        let reply = route_mux_frame(Uuid::nil(), &config, &create, &mut channels, &mut shells, &outbound);
        assert!(reply.is_none());
        assert!(channels.contains_key(&1));
        route_mux_frame(Uuid::nil(), &config, &close, &mut channels, &mut shells, &outbound);

        // Assert: the shell ends without sending anything back
        assert!(channels.is_empty());
        while shells.join_next().await.is_some() {}
        assert!(frames.try_recv().is_err());
    }
}
