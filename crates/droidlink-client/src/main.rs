//! droidlink-client: diagnostic command-line client.
//!
//! Two subcommands exercise the library against a running device host:
//!
//! ```text
//! droidlink-client devices [--config FILE] [--host HOST] [--port PORT]
//!     Track attached devices and print every update as one JSON line.
//!
//! droidlink-client stream --udid SERIAL [--config FILE] [--host HOST] [--port PORT]
//! droidlink-client stream --page-url 'http://host/#!action=stream&udid=...&ws=...'
//!     Open a video stream and log metadata, device messages, and video
//!     frame sizes.
//! ```
//!
//! Both run until Ctrl+C.  Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use droidlink_client::{
    ConnectionConfig, DeviceTracker, StreamEvent, StreamEventKind, StreamReceiver, Subscription,
    WsConnector,
};
use droidlink_core::{DeviceEvent, StreamParams, WsConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "droidlink-client",
    about = "Diagnostic client for a droidlink device host",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the device list every time it changes.
    Devices(HostArgs),
    /// Open a device stream and log what arrives on it.
    Stream {
        #[command(flatten)]
        host: HostArgs,

        /// Device serial; the stream goes through the host's ADB proxy.
        #[arg(long, required_unless_present = "page_url")]
        udid: Option<String>,

        /// A page URL whose query (or `#!` fragment) carries stream parameters.
        #[arg(long, conflicts_with = "udid")]
        page_url: Option<Url>,
    },
}

#[derive(Debug, Args)]
struct HostArgs {
    /// TOML file with `host`, `port`, `remote_port`, and `secure`.
    #[arg(long, env = "DROIDLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `host` from the config file.
    #[arg(long, env = "DROIDLINK_HOST")]
    host: Option<String>,

    /// Overrides `port` from the config file.
    #[arg(long, env = "DROIDLINK_PORT")]
    port: Option<u16>,
}

impl HostArgs {
    fn into_ws_config(self) -> anyhow::Result<WsConfig> {
        let mut config = match &self.config {
            Some(path) => WsConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => WsConfig::default(),
        };
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        Ok(config)
    }
}

/// Resolves the WebSocket URL of a stream from either a device serial or a
/// page URL carrying `action=stream` / `action=proxy-adb` parameters.
fn stream_url(config: &WsConfig, udid: Option<String>, page_url: Option<Url>) -> anyhow::Result<Url> {
    if let Some(page) = page_url {
        // Hash-routed pages keep their parameters after `#!`.
        let query = match page.fragment() {
            Some(fragment) => fragment.trim_start_matches('!').to_string(),
            None => page.query().unwrap_or_default().to_string(),
        };
        let params = StreamParams::parse(url::form_urlencoded::parse(query.as_bytes()))
            .with_context(|| format!("invalid stream parameters in {page}"))?;
        let base = config.base_url()?;
        return Ok(params.websocket_url(&base)?);
    }
    let udid = udid.context("either --udid or --page-url is required")?;
    Ok(config.proxy_adb_url(&udid)?)
}

// ── Subcommands ───────────────────────────────────────────────────────────────

async fn run_devices(config: WsConfig) -> anyhow::Result<()> {
    let tracker = DeviceTracker::new(Arc::new(WsConnector), &config)?;
    info!(url = %tracker.connection().url(), "tracking devices");

    let _updates = tracker.on_device_list(|state| match serde_json::to_string(state) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!("failed to serialize device list: {e}"),
    });

    if let Err(e) = tracker.connect().await {
        warn!("initial connect failed, will retry: {e}");
    }
    wait_for_ctrl_c().await;
    tracker.disconnect();
    Ok(())
}

async fn run_stream(url: Url) -> anyhow::Result<()> {
    info!(%url, "opening stream");
    let receiver = StreamReceiver::new(Arc::new(WsConnector), ConnectionConfig::new(url));

    let _subscriptions: Vec<Subscription> = vec![
        receiver.subscribe(StreamEventKind::Connected, |_| info!("stream connected")),
        receiver.subscribe(StreamEventKind::Disconnected, |event| {
            if let StreamEvent::Disconnected { code, reason } = event {
                info!(?code, %reason, "stream disconnected");
            }
        }),
        receiver.subscribe(StreamEventKind::Encoders, |event| {
            if let StreamEvent::Encoders(encoders) = event {
                info!(?encoders, "encoders");
            }
        }),
        receiver.subscribe(StreamEventKind::ClientsStats, |event| {
            if let StreamEvent::ClientsStats(stats) = event {
                info!(device = %stats.device_name, client_id = stats.client_id, "client stats");
            }
        }),
        receiver.subscribe(StreamEventKind::DisplayInfo, |event| {
            if let StreamEvent::DisplayInfo(displays) = event {
                for entry in displays {
                    info!(
                        id = entry.display_info.display_id,
                        width = entry.display_info.size.width,
                        height = entry.display_info.size.height,
                        connections = entry.connection_count,
                        "display"
                    );
                }
            }
        }),
        receiver.subscribe(StreamEventKind::DeviceMessage, |event| {
            if let StreamEvent::DeviceMessage(message) = event {
                match message.event() {
                    Ok(DeviceEvent::Clipboard(text)) => info!(len = text.len(), "device clipboard"),
                    Ok(other) => info!(?other, "device message"),
                    Err(e) => warn!("undecodable device message: {e}"),
                }
            }
        }),
        receiver.subscribe(StreamEventKind::Video, |event| {
            if let StreamEvent::Video(data) = event {
                tracing::trace!(len = data.len(), "video frame");
            }
        }),
        receiver.subscribe(StreamEventKind::DecodeError, |event| {
            if let StreamEvent::DecodeError(e) = event {
                warn!("bad stream frame: {e}");
            }
        }),
    ];

    if let Err(e) = receiver.connect().await {
        warn!("initial connect failed, will retry: {e}");
    }
    wait_for_ctrl_c().await;
    receiver.stop();
    Ok(())
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C, shutting down"),
        Err(e) => tracing::error!("failed to listen for Ctrl+C signal: {e}"),
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

    match Cli::parse().command {
        Command::Devices(host) => run_devices(host.into_ws_config()?).await,
        Command::Stream {
            host,
            udid,
            page_url,
        } => {
            let config = host.into_ws_config()?;
            run_stream(stream_url(&config, udid, page_url)?).await
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
