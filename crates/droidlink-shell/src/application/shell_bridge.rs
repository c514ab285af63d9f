//! Per-session shell state machine.
//!
//! [`ShellBridge`] decides what happens with every input of one session:
//! browser frames, process output, process exit, and the flush timer.  It
//! does no I/O and never reads the clock; the session loop in
//! `infrastructure::ws_server` passes the current time in and performs the
//! returned actions.
//!
//! ```text
//!  AwaitingStart ──start──► Running ──exit / stop / release──► Closed
//!        │                                                       ▲
//!        └──────────────────── stop / release ───────────────────┘
//! ```
//!
//! # Flushing and closing
//!
//! The first output chunk after a flush arms a single timer, `flush_window`
//! in the future.  When it fires, everything collected is sent as one
//! message.  If the process exits while the timer is armed, the close is held
//! back and sent right after that final flush; otherwise the close is sent
//! at once.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::application::output_buffer::{OutputBuffer, OutputStream};
use crate::domain::config::{BufferMode, CLOSE_ABNORMAL, CLOSE_NORMAL};
use crate::domain::messages::{InboundPayload, OutboundFrame, ShellControl};

// ── Error type ────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ShellError {
    /// The `udid` of a start request cannot be passed to `adb -s`.
    #[error("invalid device serial: {0:?}")]
    InvalidUdid(String),

    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("shell process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Checks that `udid` is a plausible device serial: non-empty, printable
/// ASCII without spaces, and not starting with `-`.
pub fn validate_udid(udid: &str) -> Result<(), ShellError> {
    let plausible = !udid.is_empty()
        && !udid.starts_with('-')
        && udid.bytes().all(|b| b.is_ascii_graphic());
    if plausible {
        Ok(())
    } else {
        Err(ShellError::InvalidUdid(udid.to_string()))
    }
}

/// Tag that opens every close reason produced by the shell.
pub const CLOSE_REASON_TAG: &str = "[RemoteShell]";

/// Reason sent with the close frame after the process exits.
pub fn exit_reason(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("{CLOSE_REASON_TAG} terminal process exited with code: {code}"),
        None => format!("{CLOSE_REASON_TAG} terminal process exited with code: null"),
    }
}

fn exit_close_code(code: Option<i32>) -> u16 {
    if code == Some(0) {
        CLOSE_NORMAL
    } else {
        CLOSE_ABNORMAL
    }
}

// ── State machine ─────────────────────────────────────────────────────────────

/// What the session loop must do with an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundAction {
    /// Spawn the shell for `udid`.
    Start {
        udid: String,
        cols: Option<u16>,
        rows: Option<u16>,
    },
    /// Write the bytes to the process stdin.
    Input(Vec<u8>),
    /// The bridge has been released; kill the process and end the session.
    Stop,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingStart,
    Running,
    Closed,
}

#[derive(Debug)]
pub struct ShellBridge {
    phase: Phase,
    mode: BufferMode,
    output: OutputBuffer,
    flush_window: Duration,
    flush_at: Option<Instant>,
    /// Close frame held back until the pending flush has run.
    deferred_close: Option<OutboundFrame>,
}

impl ShellBridge {
    pub fn new(mode: BufferMode, flush_window: Duration) -> Self {
        Self {
            phase: Phase::AwaitingStart,
            mode,
            output: OutputBuffer::new(mode),
            flush_window,
            flush_at: None,
            deferred_close: None,
        }
    }

    /// Classifies a frame from the browser.
    ///
    /// Before the shell starts, frames are parsed as JSON controls; anything
    /// unparseable is logged and ignored.  Afterwards every frame, JSON or
    /// not, is process input.
    pub fn on_inbound(&mut self, payload: InboundPayload) -> InboundAction {
        match self.phase {
            Phase::Closed => InboundAction::Ignore,
            Phase::Running => InboundAction::Input(payload.into_bytes()),
            Phase::AwaitingStart => self.on_control(payload),
        }
    }

    fn on_control(&mut self, payload: InboundPayload) -> InboundAction {
        let text = match payload {
            InboundPayload::Text(text) => text,
            InboundPayload::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!("ignoring non-UTF-8 frame before start");
                    return InboundAction::Ignore;
                }
            },
        };

        match ShellControl::from_json(&text) {
            Ok(Some(ShellControl::Start { udid, cols, rows })) => {
                if let Err(err) = validate_udid(&udid) {
                    warn!("rejecting start: {err}");
                    return InboundAction::Ignore;
                }
                self.phase = Phase::Running;
                InboundAction::Start { udid, cols, rows }
            }
            Ok(Some(ShellControl::Stop)) => {
                self.release();
                InboundAction::Stop
            }
            Ok(None) => {
                debug!("ignoring non-shell message");
                InboundAction::Ignore
            }
            Err(err) => {
                warn!("ignoring malformed control message: {err}");
                InboundAction::Ignore
            }
        }
    }

    /// Buffers a chunk read from `stream`, arming the flush timer if it is
    /// not already armed.
    pub fn on_output(&mut self, stream: OutputStream, chunk: &[u8], now: Instant) {
        if self.phase == Phase::Closed || chunk.is_empty() {
            return;
        }
        self.output.push(stream, chunk);
        if self.flush_at.is_none() {
            self.flush_at = Some(now + self.flush_window);
        }
    }

    /// When the armed flush timer is due, if one is armed.
    pub fn flush_deadline(&self) -> Option<Instant> {
        self.flush_at
    }

    /// Runs the flush: returns the buffered output as one frame, followed by
    /// the held-back close if the process has already exited.
    pub fn on_flush_timer(&mut self) -> Vec<OutboundFrame> {
        if self.flush_at.take().is_none() {
            return Vec::new();
        }
        match self.deferred_close.take() {
            Some(close) => {
                let mut frames: Vec<OutboundFrame> = self.output.finish().into_iter().collect();
                frames.push(close);
                self.phase = Phase::Closed;
                frames
            }
            None => self.output.take().into_iter().collect(),
        }
    }

    /// Maps the process exit status to a close frame.  If a flush is pending
    /// the close is deferred to [`ShellBridge::on_flush_timer`] and nothing is
    /// returned now.
    pub fn on_process_exit(&mut self, code: Option<i32>) -> Vec<OutboundFrame> {
        if self.phase == Phase::Closed {
            return Vec::new();
        }
        debug!(?code, "shell process exited");
        let close = OutboundFrame::Close {
            code: exit_close_code(code),
            reason: exit_reason(code),
        };
        if self.flush_at.is_some() {
            self.deferred_close = Some(close);
            return Vec::new();
        }
        let mut frames: Vec<OutboundFrame> = self.output.finish().into_iter().collect();
        frames.push(close);
        self.phase = Phase::Closed;
        frames
    }

    /// The process could not be spawned: close abnormally.
    pub fn on_start_failed(&mut self, err: &ShellError) -> Vec<OutboundFrame> {
        self.release();
        vec![OutboundFrame::Close {
            code: CLOSE_ABNORMAL,
            reason: format!("{CLOSE_REASON_TAG} {err}"),
        }]
    }

    /// Cancels the flush timer and drops buffered output.  Returns `true` on
    /// the first call only; the caller then kills the process.
    pub fn release(&mut self) -> bool {
        if self.phase == Phase::Closed {
            return false;
        }
        self.phase = Phase::Closed;
        self.flush_at = None;
        self.deferred_close = None;
        self.output = OutputBuffer::new(self.mode);
        true
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(5);

    fn started(mode: BufferMode) -> ShellBridge {
        let mut bridge = ShellBridge::new(mode, WINDOW);
        let action = bridge.on_inbound(InboundPayload::Text(
            r#"{"type":"shell","data":{"type":"start","udid":"emulator-5554"}}"#.into(),
        ));
        assert!(matches!(action, InboundAction::Start { .. }));
        bridge
    }

    #[test]
    fn test_start_moves_to_running_and_later_frames_are_input() {
        // Arrange
        let mut bridge = started(BufferMode::Binary);

        // Act: even a control-looking frame is now plain input
        let action = bridge.on_inbound(InboundPayload::Text(r#"{"type":"stop"}"#.into()));

        // Assert
        assert!(bridge.is_running());
        assert_eq!(action, InboundAction::Input(br#"{"type":"stop"}"#.to_vec()));
    }

    #[test]
    fn test_garbage_before_start_is_ignored() {
        let mut bridge = ShellBridge::new(BufferMode::Binary, WINDOW);

        assert_eq!(
            bridge.on_inbound(InboundPayload::Text("ls\n".into())),
            InboundAction::Ignore
        );
        assert!(!bridge.is_running());
        assert!(!bridge.is_closed());
    }

    #[test]
    fn test_start_with_option_like_udid_is_ignored() {
        let mut bridge = ShellBridge::new(BufferMode::Binary, WINDOW);

        let action = bridge.on_inbound(InboundPayload::Text(
            r#"{"type":"start","udid":"-d"}"#.into(),
        ));

        assert_eq!(action, InboundAction::Ignore);
        assert!(!bridge.is_running());
    }

    #[test]
    fn test_stop_before_start_releases() {
        let mut bridge = ShellBridge::new(BufferMode::Binary, WINDOW);

        let action = bridge.on_inbound(InboundPayload::Text(r#"{"type":"stop"}"#.into()));

        assert_eq!(action, InboundAction::Stop);
        assert!(bridge.is_closed());
    }

    #[test]
    fn test_chunks_within_one_window_flush_as_one_message() {
        // Arrange
        let mut bridge = started(BufferMode::Binary);
        let t0 = Instant::now();

        // Act
        bridge.on_output(OutputStream::Stdout, b"one ", t0);
        bridge.on_output(OutputStream::Stdout, b"two ", t0 + Duration::from_millis(2));
        bridge.on_output(OutputStream::Stdout, b"three", t0 + Duration::from_millis(4));

        // Assert: the deadline is set by the first chunk only
        assert_eq!(bridge.flush_deadline(), Some(t0 + WINDOW));
        assert_eq!(
            bridge.on_flush_timer(),
            vec![OutboundFrame::Binary(b"one two three".to_vec())]
        );
        assert_eq!(bridge.flush_deadline(), None);
    }

    #[test]
    fn test_text_mode_flushes_text_frames() {
        let mut bridge = started(BufferMode::Text);

        bridge.on_output(OutputStream::Stdout, b"$ ", Instant::now());

        assert_eq!(bridge.on_flush_timer(), vec![OutboundFrame::Text("$ ".into())]);
    }

    #[test]
    fn test_exit_zero_with_pending_flush_sends_output_then_normal_close() {
        // Arrange
        let mut bridge = started(BufferMode::Binary);
        bridge.on_output(OutputStream::Stdout, b"bye", Instant::now());

        // Act
        let at_exit = bridge.on_process_exit(Some(0));
        let at_flush = bridge.on_flush_timer();

        // Assert
        assert!(at_exit.is_empty());
        assert_eq!(
            at_flush,
            vec![
                OutboundFrame::Binary(b"bye".to_vec()),
                OutboundFrame::Close {
                    code: 1000,
                    reason: "[RemoteShell] terminal process exited with code: 0".into(),
                },
            ]
        );
        assert!(bridge.is_closed());
    }

    #[test]
    fn test_nonzero_exit_without_pending_flush_closes_immediately() {
        let mut bridge = started(BufferMode::Binary);

        let frames = bridge.on_process_exit(Some(2));

        assert_eq!(
            frames,
            vec![OutboundFrame::Close {
                code: 4500,
                reason: "[RemoteShell] terminal process exited with code: 2".into(),
            }]
        );
        assert!(bridge.is_closed());
    }

    #[test]
    fn test_signal_exit_is_abnormal() {
        let mut bridge = started(BufferMode::Binary);

        let frames = bridge.on_process_exit(None);

        assert!(matches!(
            frames.as_slice(),
            [OutboundFrame::Close { code: 4500, .. }]
        ));
    }

    #[test]
    fn test_exit_reason_is_tagged_for_codes_and_signals() {
        assert_eq!(
            exit_reason(Some(127)),
            "[RemoteShell] terminal process exited with code: 127"
        );
        assert_eq!(
            exit_reason(None),
            "[RemoteShell] terminal process exited with code: null"
        );
    }

    #[test]
    fn test_text_exit_flushes_dangling_partial_character() {
        let mut bridge = started(BufferMode::Text);
        bridge.on_output(OutputStream::Stdout, b"ok\xC3", Instant::now());
        assert_eq!(bridge.on_flush_timer(), vec![OutboundFrame::Text("ok".into())]);

        let frames = bridge.on_process_exit(Some(0));

        assert_eq!(frames[0], OutboundFrame::Text("\u{FFFD}".into()));
        assert!(matches!(frames[1], OutboundFrame::Close { code: 1000, .. }));
    }

    #[test]
    fn test_release_is_idempotent_and_cancels_timer() {
        let mut bridge = started(BufferMode::Binary);
        bridge.on_output(OutputStream::Stdout, b"lost", Instant::now());

        assert!(bridge.release());
        assert!(!bridge.release());
        assert_eq!(bridge.flush_deadline(), None);
        assert!(bridge.on_flush_timer().is_empty());
        assert!(bridge.on_process_exit(Some(0)).is_empty());
    }

    #[test]
    fn test_output_after_close_is_dropped() {
        let mut bridge = started(BufferMode::Binary);
        bridge.on_process_exit(Some(0));

        bridge.on_output(OutputStream::Stdout, b"late", Instant::now());

        assert_eq!(bridge.flush_deadline(), None);
    }

    #[test]
    fn test_start_failure_closes_abnormally() {
        let mut bridge = started(BufferMode::Binary);
        let err = ShellError::Spawn {
            program: "adb".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };

        let frames = bridge.on_start_failed(&err);

        assert!(matches!(
            frames.as_slice(),
            [OutboundFrame::Close { code: 4500, reason }] if reason.starts_with("[RemoteShell] failed to start `adb`")
        ));
        assert!(bridge.is_closed());
    }

    #[test]
    fn test_validate_udid() {
        assert!(validate_udid("emulator-5554").is_ok());
        assert!(validate_udid("192.168.1.20:5555").is_ok());
        assert!(validate_udid("").is_err());
        assert!(validate_udid("a b").is_err());
        assert!(validate_udid("-s").is_err());
    }
}
