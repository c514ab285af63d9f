//! droidlink remote shell server: entry point.
//!
//! Accepts WebSocket connections on `?action=shell` (and `SHEL` channels on
//! `?action=multiplex`), and for each one runs `adb -s <udid> shell` once the
//! browser sends a `start` control.
//!
//! # Usage
//!
//! ```text
//! droidlink-shell [OPTIONS]
//!
//! Options:
//!   --bind        <ADDR>  Address to listen on [default: 0.0.0.0]
//!   --port        <PORT>  Port to listen on [default: 8000]
//!   --adb         <PATH>  adb executable [default: adb]
//!   --text-output         Send output as text messages instead of binary
//!   --flush-ms    <MS>    Output coalescing window in ms [default: 5]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                | Default   | Description                        |
//! |-------------------------|-----------|------------------------------------|
//! | `DROIDLINK_SHELL_BIND`  | `0.0.0.0` | Listen address                     |
//! | `DROIDLINK_SHELL_PORT`  | `8000`    | Listen port                        |
//! | `DROIDLINK_ADB`         | `adb`     | adb executable                     |
//! | `DROIDLINK_TEXT_OUTPUT` | off       | Text output (default on Windows)   |
//! | `DROIDLINK_FLUSH_MS`    | `5`       | Output coalescing window (ms)      |

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::builder::FalseyValueParser;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use droidlink_shell::domain::{BufferMode, ShellCommand, ShellServerConfig};
use droidlink_shell::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "droidlink-shell",
    about = "WebSocket remote shell for Android devices over adb",
    version
)]
struct Cli {
    /// IP address to listen on.  Use `127.0.0.1` to accept only local
    /// connections.
    #[arg(long, default_value = "0.0.0.0", env = "DROIDLINK_SHELL_BIND")]
    bind: String,

    #[arg(long, default_value_t = 8000, env = "DROIDLINK_SHELL_PORT")]
    port: u16,

    /// adb executable; run as `<adb> -s <udid> shell`.
    #[arg(long, env = "DROIDLINK_ADB")]
    adb: Option<String>,

    /// Decode output as UTF-8 and send text messages.
    #[arg(long, env = "DROIDLINK_TEXT_OUTPUT", value_parser = FalseyValueParser::new())]
    text_output: bool,

    /// How long output is collected before it is sent, in milliseconds.
    #[arg(long, default_value_t = 5, env = "DROIDLINK_FLUSH_MS")]
    flush_ms: u64,
}

impl Cli {
    /// # Errors
    ///
    /// Returns an error if `--bind` is not a valid IP address.
    fn into_server_config(self) -> anyhow::Result<ShellServerConfig> {
        let bind_addr: SocketAddr = format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("invalid bind address: '{}:{}'", self.bind, self.port))?;

        let command = match self.adb {
            Some(adb) => ShellCommand::adb(adb),
            None => ShellCommand::default(),
        };
        let buffer_mode = if self.text_output {
            BufferMode::Text
        } else {
            BufferMode::platform_default()
        };

        Ok(ShellServerConfig {
            bind_addr,
            command,
            buffer_mode,
            flush_window: Duration::from_millis(self.flush_ms),
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_server_config()?;
    info!(
        "droidlink shell server starting: bind={}, adb={}, output={:?}",
        config.bind_addr, config.command.program, config.buffer_mode
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(config, running).await?;

    info!("droidlink shell server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        // Arrange: no arguments
        let cli = Cli::parse_from(["droidlink-shell"]);

        // Act
        let config = cli.into_server_config().unwrap();

        // Assert
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:8000");
        assert_eq!(config.flush_window, Duration::from_millis(5));
        assert_eq!(config.command, ShellCommand::default());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "droidlink-shell",
            "--bind",
            "127.0.0.1",
            "--port",
            "9100",
            "--adb",
            "/opt/platform-tools/adb",
            "--text-output",
            "--flush-ms",
            "20",
        ]);

        let config = cli.into_server_config().unwrap();

        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9100");
        assert_eq!(config.command.program, "/opt/platform-tools/adb");
        assert_eq!(config.buffer_mode, BufferMode::Text);
        assert_eq!(config.flush_window, Duration::from_millis(20));
    }

    #[test]
    fn test_invalid_bind_returns_error() {
        let cli = Cli {
            bind: "not.an.ip".to_string(),
            port: 8000,
            adb: None,
            text_output: false,
            flush_ms: 5,
        };

        assert!(cli.into_server_config().is_err());
    }
}
