//! The shell child process.
//!
//! [`ShellProcess::spawn`] starts the configured program with piped stdio and
//! wires it to channels:
//!
//! ```text
//! write() ──► stdin task ──► child stdin
//! child stdout ──► reader task ──┐
//! child stderr ──► reader task ──┴──► events: Output(..)* then Exited(code)
//! ```
//!
//! `Exited` is always the last event and is only sent after both readers
//! have drained, so no output is lost behind it.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::application::output_buffer::OutputStream;
use crate::application::shell_bridge::ShellError;

/// How long the readers may keep draining after the process has exited.
/// A grandchild that inherited the pipes can otherwise hold them open.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

const READ_BUFFER_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A chunk read from one of the output pipes.
    Output(OutputStream, Vec<u8>),
    /// Exit status; `None` when the process was ended by a signal.
    Exited(Option<i32>),
}

/// A running shell process.  Dropping it kills the process.
#[derive(Debug)]
pub struct ShellProcess {
    stdin: mpsc::UnboundedSender<Vec<u8>>,
    kill: Option<oneshot::Sender<()>>,
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
}

impl ShellProcess {
    /// Starts `program` with `args`, `COLORTERM=truecolor`, and the working
    /// directory taken from `PWD` (or `/`).
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Spawn`] if the program cannot be started.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, ShellError> {
        let cwd = std::env::var("PWD").unwrap_or_else(|_| "/".to_string());
        let mut child = Command::new(program)
            .args(args)
            .env("COLORTERM", "truecolor")
            .current_dir(&cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ShellError::Spawn {
                program: program.to_string(),
                source,
            })?;
        debug!(program, ?args, pid = child.id(), "shell process started");

        let (events_tx, events) = mpsc::unbounded_channel();
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();

        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(write_stdin(stdin, stdin_rx));
        }
        let readers = [
            child
                .stdout
                .take()
                .map(|out| tokio::spawn(read_output(out, OutputStream::Stdout, events_tx.clone()))),
            child
                .stderr
                .take()
                .map(|err| tokio::spawn(read_output(err, OutputStream::Stderr, events_tx.clone()))),
        ];
        tokio::spawn(supervise(child, kill_rx, readers, events_tx));

        Ok(Self {
            stdin: stdin_tx,
            kill: Some(kill_tx),
            events,
        })
    }

    /// Queues `bytes` for the process stdin.  Returns `false` once stdin is
    /// closed.
    pub fn write(&self, bytes: Vec<u8>) -> bool {
        self.stdin.send(bytes).is_ok()
    }

    /// Asks the supervisor to kill the process.  `Exited` still follows.
    pub fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

async fn write_stdin(mut stdin: tokio::process::ChildStdin, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(bytes) = rx.recv().await {
        if let Err(e) = stdin.write_all(&bytes).await {
            debug!("shell stdin closed: {e}");
            break;
        }
        if let Err(e) = stdin.flush().await {
            debug!("shell stdin flush failed: {e}");
            break;
        }
    }
}

async fn read_output<R>(mut source: R, stream: OutputStream, tx: mpsc::UnboundedSender<ProcessEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match source.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(ProcessEvent::Output(stream, buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(?stream, "shell output read failed: {e}");
                break;
            }
        }
    }
}

async fn supervise(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    readers: [Option<tokio::task::JoinHandle<()>>; 2],
    events: mpsc::UnboundedSender<ProcessEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        // Fires on an explicit kill and when the handle is dropped.
        _ = kill => {
            if let Err(e) = child.start_kill() {
                debug!("kill failed: {e}");
            }
            child.wait().await
        }
    };

    let drained = tokio::time::timeout(READER_DRAIN_TIMEOUT, async {
        for reader in readers.into_iter().flatten() {
            let _ = reader.await;
        }
    })
    .await;
    if drained.is_err() {
        debug!("shell output still open after exit; dropping the rest");
    }

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!("waiting for shell process failed: {e}");
            None
        }
    };
    let _ = events.send(ProcessEvent::Exited(code));
}

// ── Tests ─────────────────────────────────────────────────────────────────────
