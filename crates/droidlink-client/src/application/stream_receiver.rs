//! Stream receiver: a connection manager plus the frame classifier.
//!
//! Every inbound binary frame is classified and decoded:
//!
//! - initial info replaces the receiver's device metadata in one step and
//!   re-emits `Encoders`, `ClientsStats`, and `DisplayInfo` (in that order);
//! - device messages are forwarded as-is;
//! - anything else is video and is handed to listeners without copying.
//!
//! A frame that fails to decode leaves the previous metadata untouched and is
//! reported as [`StreamEvent::DecodeError`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use droidlink_core::{
    decode_frame, DeviceMessage, DisplayCombinedInfo, DisplayInfo, InboundFrame, InitialInfo,
    ProtocolError, ScreenInfo, VideoSettings,
};
use tracing::{debug, warn};

use crate::application::connection::{
    ConnectionConfig, ConnectionEvent, ConnectionEventKind, ConnectionManager,
};
use crate::application::events::{Event, EventRegistry, Subscription};
use crate::application::transport::{Connector, Frame, TransportError};

/// Device name and the id the device host assigned to this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientsStats {
    pub device_name: String,
    pub client_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Video(Vec<u8>),
    DeviceMessage(DeviceMessage),
    DisplayInfo(Vec<DisplayCombinedInfo>),
    ClientsStats(ClientsStats),
    /// Encoder names, sorted.
    Encoders(Vec<String>),
    Connected,
    Disconnected { code: Option<u16>, reason: String },
    DecodeError(ProtocolError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamEventKind {
    Video,
    DeviceMessage,
    DisplayInfo,
    ClientsStats,
    Encoders,
    Connected,
    Disconnected,
    DecodeError,
}

impl Event for StreamEvent {
    type Kind = StreamEventKind;

    fn kind(&self) -> StreamEventKind {
        match self {
            Self::Video(_) => StreamEventKind::Video,
            Self::DeviceMessage(_) => StreamEventKind::DeviceMessage,
            Self::DisplayInfo(_) => StreamEventKind::DisplayInfo,
            Self::ClientsStats(_) => StreamEventKind::ClientsStats,
            Self::Encoders(_) => StreamEventKind::Encoders,
            Self::Connected => StreamEventKind::Connected,
            Self::Disconnected { .. } => StreamEventKind::Disconnected,
            Self::DecodeError(_) => StreamEventKind::DecodeError,
        }
    }
}

// ── Metadata ──────────────────────────────────────────────────────────────────

/// Device metadata from the most recent initial-info frame, keyed by display id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMetadata {
    pub device_name: String,
    pub client_id: i32,
    pub encoders: BTreeSet<String>,
    pub display_info: BTreeMap<i32, DisplayInfo>,
    pub connection_count: BTreeMap<i32, i32>,
    pub screen_info: BTreeMap<i32, ScreenInfo>,
    pub video_settings: BTreeMap<i32, VideoSettings>,
}

impl From<InitialInfo> for StreamMetadata {
    fn from(info: InitialInfo) -> Self {
        let mut metadata = Self {
            device_name: info.device_name,
            client_id: info.client_id,
            encoders: info.encoders,
            display_info: BTreeMap::new(),
            connection_count: BTreeMap::new(),
            screen_info: BTreeMap::new(),
            video_settings: BTreeMap::new(),
        };
        // A repeated display id overwrites the earlier entry.
        for display in info.displays {
            let id = display.display_info.display_id;
            metadata.display_info.insert(id, display.display_info);
            metadata.connection_count.insert(id, display.connection_count);
            if let Some(screen) = display.screen_info {
                metadata.screen_info.insert(id, screen);
            }
            if let Some(settings) = display.video_settings {
                metadata.video_settings.insert(id, settings);
            }
        }
        metadata
    }
}

impl StreamMetadata {
    /// One combined record per display, ordered by display id.
    pub fn combined(&self) -> Vec<DisplayCombinedInfo> {
        self.display_info
            .iter()
            .map(|(id, info)| DisplayCombinedInfo {
                display_info: *info,
                connection_count: self.connection_count.get(id).copied().unwrap_or(0),
                screen_info: self.screen_info.get(id).copied(),
                video_settings: self.video_settings.get(id).cloned(),
            })
            .collect()
    }
}

type SharedMetadata = Arc<Mutex<Option<StreamMetadata>>>;

fn lock(metadata: &Mutex<Option<StreamMetadata>>) -> MutexGuard<'_, Option<StreamMetadata>> {
    metadata.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Receiver ──────────────────────────────────────────────────────────────────

pub struct StreamReceiver {
    connection: ConnectionManager,
    metadata: SharedMetadata,
    events: EventRegistry<StreamEvent>,
    _forwarding: Vec<Subscription>,
}

impl StreamReceiver {
    pub fn new(connector: Arc<dyn Connector>, config: ConnectionConfig) -> Self {
        let metadata: SharedMetadata = Arc::new(Mutex::new(None));
        let events = EventRegistry::new();

        let connection = {
            let metadata = Arc::clone(&metadata);
            let events = events.clone();
            ConnectionManager::with_frame_handler(connector, config, move |frame| match frame {
                Frame::Binary(data) => handle_binary(&metadata, &events, data),
                Frame::Text(text) => debug!(len = text.len(), "ignoring text frame on stream"),
            })
        };

        let forwarding = vec![
            {
                let events = events.clone();
                connection.subscribe(ConnectionEventKind::Connected, move |_| {
                    events.emit(&StreamEvent::Connected);
                })
            },
            {
                let events = events.clone();
                connection.subscribe(ConnectionEventKind::Disconnected, move |event| {
                    if let ConnectionEvent::Disconnected { code, reason } = event {
                        events.emit(&StreamEvent::Disconnected {
                            code: *code,
                            reason: reason.clone(),
                        });
                    }
                })
            },
        ];

        Self {
            connection,
            metadata,
            events,
            _forwarding: forwarding,
        }
    }

    /// See [`ConnectionManager::connect`].
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.connection.connect().await
    }

    /// Sends an encoded control message, queueing it until the socket is open.
    pub fn send_event(&self, message: impl Into<Vec<u8>>) {
        self.connection.send_binary(message);
    }

    /// Closes the stream and discards queued control messages.
    pub fn stop(&self) {
        self.connection.disconnect();
    }

    pub fn subscribe<F>(&self, kind: StreamEventKind, listener: F) -> Subscription
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, listener)
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Re-emits the metadata events for the current state.  Does nothing
    /// before the first initial-info frame.
    pub fn trigger_initial_info_events(&self) {
        emit_initial_info(&self.metadata, &self.events);
    }

    pub fn has_initial_info(&self) -> bool {
        lock(&self.metadata).is_some()
    }

    /// Snapshot of the current metadata, if any has been received.
    pub fn metadata(&self) -> Option<StreamMetadata> {
        lock(&self.metadata).clone()
    }

    /// Empty until the first initial-info frame.
    pub fn device_name(&self) -> String {
        lock(&self.metadata)
            .as_ref()
            .map(|m| m.device_name.clone())
            .unwrap_or_default()
    }

    /// `-1` until the first initial-info frame.
    pub fn client_id(&self) -> i32 {
        lock(&self.metadata).as_ref().map_or(-1, |m| m.client_id)
    }

    /// Encoder names, sorted.
    pub fn encoders(&self) -> Vec<String> {
        lock(&self.metadata)
            .as_ref()
            .map(|m| m.encoders.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn display_info(&self, display_id: i32) -> Option<DisplayInfo> {
        lock(&self.metadata)
            .as_ref()
            .and_then(|m| m.display_info.get(&display_id).copied())
    }
}

fn handle_binary(metadata: &Mutex<Option<StreamMetadata>>, events: &EventRegistry<StreamEvent>, data: Vec<u8>) {
    match decode_frame(data) {
        Ok(InboundFrame::Video(data)) => {
            events.emit(&StreamEvent::Video(data));
        }
        Ok(InboundFrame::DeviceMessage(message)) => {
            events.emit(&StreamEvent::DeviceMessage(message));
        }
        Ok(InboundFrame::InitialInfo(info)) => {
            *lock(metadata) = Some(StreamMetadata::from(info));
            emit_initial_info(metadata, events);
        }
        Err(err) => {
            warn!("dropping undecodable frame: {err}");
            events.emit(&StreamEvent::DecodeError(err));
        }
    }
}

fn emit_initial_info(metadata: &Mutex<Option<StreamMetadata>>, events: &EventRegistry<StreamEvent>) {
    let Some(snapshot) = lock(metadata).clone() else {
        return;
    };
    debug!(device = %snapshot.device_name, client_id = snapshot.client_id, "emitting initial info");
    events.emit(&StreamEvent::Encoders(snapshot.encoders.iter().cloned().collect()));
    events.emit(&StreamEvent::ClientsStats(ClientsStats {
        device_name: snapshot.device_name.clone(),
        client_id: snapshot.client_id,
    }));
    events.emit(&StreamEvent::DisplayInfo(snapshot.combined()));
}

// ── Tests ─────────────────────────────────────────────────────────────────────
