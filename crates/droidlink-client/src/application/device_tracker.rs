//! Device tracker: the list of devices attached to the device host.
//!
//! Connects to the multiplexer URL, opens the `GTRC` channel on every
//! (re)connect, and turns each JSON payload into a [`DeviceState`]:
//!
//! ```text
//! [type:1][channel:4 LE]{"type":"devicelist","data":{"list":[...]}}
//! [type:1][channel:4 LE]{"type":"device","data":{"device":{...}}}
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use droidlink_core::{ChannelCode, ConfigError, HandshakeError, MuxFrame, ProtocolError, WsConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::application::connection::{ConnectionConfig, ConnectionManager};
use crate::application::events::{Event, EventRegistry, Subscription};
use crate::application::transport::{Connector, Frame, TransportError};

/// Tracker channel id on the multiplexed socket.
pub const TRACKER_CHANNEL_ID: u32 = 0;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid tracker endpoint: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid tracker channel: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("bad multiplexer frame: {0}")]
    Frame(#[from] ProtocolError),

    #[error("bad tracker payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// One network interface reported for a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub ipv4: String,
}

/// A device as described by the tracker.  Keys the tracker sends that are not
/// modelled here are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub udid: String,
    #[serde(default)]
    pub state: String,
    #[serde(rename = "ro.product.manufacturer", default)]
    pub manufacturer: String,
    #[serde(rename = "ro.product.model", default)]
    pub model: String,
    #[serde(rename = "ro.build.version.release", default)]
    pub release: String,
    #[serde(rename = "ro.build.version.sdk", default)]
    pub sdk: String,
    #[serde(default)]
    pub interfaces: Vec<NetworkInterface>,
    #[serde(default)]
    pub pid: Option<i64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Overall tracker state: `Device` when the first reported device is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerState {
    Device,
    Disconnected,
}

impl TrackerState {
    fn of(device: Option<&Device>) -> Self {
        match device {
            Some(d) if d.state == "device" => Self::Device,
            _ => Self::Disconnected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub devices: Vec<Device>,
    pub state: TrackerState,
}

impl Event for DeviceState {
    type Kind = ();

    fn kind(&self) {}
}

// ── Payload parsing ───────────────────────────────────────────────────────────

/// Parses one tracker frame.
///
/// Returns `Ok(None)` for well-formed JSON with a `type` this tracker does not
/// handle.
///
/// # Errors
///
/// Returns [`TrackerError`] for a short header, invalid JSON, or a device
/// record without a `udid`.
pub fn parse_tracker_frame(frame: &[u8]) -> Result<Option<DeviceState>, TrackerError> {
    let mux = MuxFrame::parse(frame)?;
    let message: Value = serde_json::from_slice(mux.payload)?;
    let data = message.get("data");

    let devices = match message.get("type").and_then(Value::as_str) {
        Some("devicelist") => match data.and_then(|d| d.get("list")) {
            Some(list) => Vec::<Device>::deserialize(list)?,
            None => Vec::new(),
        },
        Some("device") => match data.and_then(|d| d.get("device")) {
            Some(Value::Null) | None => Vec::new(),
            Some(device) => vec![Device::deserialize(device)?],
        },
        other => {
            debug!(kind = ?other, "ignoring tracker message");
            return Ok(None);
        }
    };

    let state = TrackerState::of(devices.first());
    Ok(Some(DeviceState { devices, state }))
}

// ── Tracker ───────────────────────────────────────────────────────────────────

pub struct DeviceTracker {
    connection: ConnectionManager,
    listeners: EventRegistry<DeviceState>,
}

impl DeviceTracker {
    /// Builds a tracker for the multiplexer at `config`.  Does not connect.
    pub fn new(connector: Arc<dyn Connector>, config: &WsConfig) -> Result<Self, TrackerError> {
        let connection_config = ConnectionConfig::new(config.multiplex_url()?)
            .with_channel(TRACKER_CHANNEL_ID, ChannelCode::Gtrc.as_str())?;
        Ok(Self::with_config(connector, connection_config))
    }

    pub fn with_config(connector: Arc<dyn Connector>, config: ConnectionConfig) -> Self {
        let listeners = EventRegistry::new();
        let sink = listeners.clone();
        let connection = ConnectionManager::with_frame_handler(connector, config, move |frame| {
            let bytes = match &frame {
                Frame::Binary(b) => b.as_slice(),
                Frame::Text(t) => t.as_bytes(),
            };
            match parse_tracker_frame(bytes) {
                Ok(Some(state)) => {
                    debug!(devices = state.devices.len(), state = ?state.state, "device list update");
                    sink.emit(&state);
                }
                Ok(None) => {}
                Err(err) => warn!("dropping tracker frame: {err}"),
            }
        });
        Self {
            connection,
            listeners,
        }
    }

    /// See [`ConnectionManager::connect`].
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.connection.connect().await
    }

    /// Registers `listener` for every device list update.
    pub fn on_device_list<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&DeviceState) + Send + Sync + 'static,
    {
        self.listeners.subscribe((), listener)
    }

    /// Closes the connection, cancels reconnects, and drops every listener.
    pub fn disconnect(&self) {
        self.connection.disconnect();
        self.listeners.clear();
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
