//! Integration tests for the stream receiver and the device tracker, driven
//! through the in-memory connector.

mod support;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use droidlink_client::application::transport::Outbound;
use droidlink_client::{
    ConnectionConfig, DeviceState, DeviceTracker, Frame, StreamEvent, StreamEventKind,
    StreamReceiver, TrackerState,
};
use droidlink_core::protocol::frame::MAGIC_DEVICE_MESSAGE;
use droidlink_core::protocol::Size;
use droidlink_core::{DeviceEvent, DisplayCombinedInfo, DisplayInfo, InitialInfo, WsConfig};

use support::{settle, url, MockConnector};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn display(id: i32, width: i32, height: i32) -> DisplayCombinedInfo {
    DisplayCombinedInfo {
        display_info: DisplayInfo {
            display_id: id,
            size: Size { width, height },
            rotation: 0,
            layer_stack: id,
            flags: 0,
        },
        connection_count: 1,
        screen_info: None,
        video_settings: None,
    }
}

fn initial_info_frame(name: &str, client_id: i32, displays: Vec<DisplayCombinedInfo>) -> Vec<u8> {
    InitialInfo {
        device_name: name.to_string(),
        displays,
        encoders: BTreeSet::from(["c2.qti.avc.encoder".to_string(), "OMX.google.h264".to_string()]),
        client_id,
    }
    .encode()
    .unwrap()
}

fn clipboard_frame(text: &str) -> Vec<u8> {
    let mut frame = MAGIC_DEVICE_MESSAGE.to_vec();
    frame.push(0);
    frame.extend_from_slice(&(text.len() as i32).to_be_bytes());
    frame.extend_from_slice(text.as_bytes());
    frame
}

/// Records every stream event of the given kinds, in emission order.
fn record(receiver: &StreamReceiver, kinds: &[StreamEventKind]) -> Arc<Mutex<Vec<StreamEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in kinds {
        let sink = Arc::clone(&seen);
        drop(receiver.subscribe(*kind, move |event| {
            sink.lock().unwrap().push(event.clone());
        }));
    }
    seen
}

// ── Stream receiver ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_initial_info_updates_metadata_and_emits_in_order() {
    // Arrange
    let connector = MockConnector::new();
    let receiver = StreamReceiver::new(connector.clone(), ConnectionConfig::new(url()));
    let seen = record(
        &receiver,
        &[
            StreamEventKind::Encoders,
            StreamEventKind::ClientsStats,
            StreamEventKind::DisplayInfo,
        ],
    );
    receiver.connect().await.unwrap();
    let server = connector.take_server();

    // Act: displays arrive out of id order
    server.push_binary(initial_info_frame(
        "Pixel 7",
        3,
        vec![display(2, 800, 600), display(0, 1080, 2400)],
    ));
    settle().await;

    // Assert
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert_eq!(
        seen[0],
        StreamEvent::Encoders(vec![
            "OMX.google.h264".to_string(),
            "c2.qti.avc.encoder".to_string()
        ])
    );
    assert!(matches!(
        &seen[1],
        StreamEvent::ClientsStats(stats) if stats.device_name == "Pixel 7" && stats.client_id == 3
    ));
    match &seen[2] {
        StreamEvent::DisplayInfo(displays) => {
            let ids: Vec<i32> = displays.iter().map(|d| d.display_info.display_id).collect();
            assert_eq!(ids, vec![0, 2]);
        }
        other => panic!("expected DisplayInfo, got {other:?}"),
    }
    assert_eq!(receiver.device_name(), "Pixel 7");
    assert_eq!(receiver.client_id(), 3);
    assert_eq!(receiver.display_info(0).map(|d| d.size.width), Some(1080));
}

#[tokio::test(start_paused = true)]
async fn test_second_initial_info_replaces_the_first() {
    let connector = MockConnector::new();
    let receiver = StreamReceiver::new(connector.clone(), ConnectionConfig::new(url()));
    receiver.connect().await.unwrap();
    let server = connector.take_server();

    server.push_binary(initial_info_frame("first", 1, vec![display(0, 1, 1), display(1, 2, 2)]));
    server.push_binary(initial_info_frame("second", 2, vec![display(5, 3, 3)]));
    settle().await;

    assert_eq!(receiver.device_name(), "second");
    assert!(receiver.display_info(0).is_none());
    assert!(receiver.display_info(5).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_truncated_initial_info_keeps_previous_metadata() {
    // Arrange
    let connector = MockConnector::new();
    let receiver = StreamReceiver::new(connector.clone(), ConnectionConfig::new(url()));
    let errors = record(&receiver, &[StreamEventKind::DecodeError]);
    receiver.connect().await.unwrap();
    let server = connector.take_server();
    server.push_binary(initial_info_frame("kept", 1, vec![display(0, 1, 1)]));

    // Act: a second frame cut off inside the display list
    let mut broken = initial_info_frame("lost", 2, vec![display(0, 9, 9)]);
    broken.truncate(broken.len() - 10);
    server.push_binary(broken);
    settle().await;

    // Assert
    assert_eq!(errors.lock().unwrap().len(), 1);
    assert_eq!(receiver.device_name(), "kept");
    assert_eq!(receiver.client_id(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_video_and_device_messages_are_forwarded() {
    let connector = MockConnector::new();
    let receiver = StreamReceiver::new(connector.clone(), ConnectionConfig::new(url()));
    let seen = record(
        &receiver,
        &[StreamEventKind::Video, StreamEventKind::DeviceMessage],
    );
    receiver.connect().await.unwrap();
    let server = connector.take_server();

    server.push_binary(vec![0, 0, 0, 1, 0x67, 0x42]);
    server.push_binary(clipboard_frame("copied"));
    settle().await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], StreamEvent::Video(vec![0, 0, 0, 1, 0x67, 0x42]));
    match &seen[1] {
        StreamEvent::DeviceMessage(message) => {
            assert_eq!(message.event().unwrap(), DeviceEvent::Clipboard("copied".into()));
        }
        other => panic!("expected DeviceMessage, got {other:?}"),
    }
    assert!(!receiver.has_initial_info());
}

#[tokio::test(start_paused = true)]
async fn test_trigger_initial_info_events_replays_current_state() {
    let connector = MockConnector::new();
    let receiver = StreamReceiver::new(connector.clone(), ConnectionConfig::new(url()));
    receiver.connect().await.unwrap();
    let server = connector.take_server();
    server.push_binary(initial_info_frame("dev", 7, vec![display(0, 1, 1)]));
    settle().await;

    let seen = record(&receiver, &[StreamEventKind::ClientsStats]);
    receiver.trigger_initial_info_events();

    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_send_event_queues_until_connected_and_stop_closes() {
    let connector = MockConnector::new();
    let receiver = StreamReceiver::new(connector.clone(), ConnectionConfig::new(url()));
    let lifecycle = record(
        &receiver,
        &[StreamEventKind::Connected, StreamEventKind::Disconnected],
    );

    receiver.send_event(vec![8u8, 1]);
    receiver.connect().await.unwrap();
    let mut server = connector.take_server();
    receiver.stop();

    assert_eq!(
        server.drain(),
        vec![Outbound::Frame(Frame::Binary(vec![8, 1])), Outbound::Close]
    );
    assert_eq!(
        *lifecycle.lock().unwrap(),
        vec![
            StreamEvent::Connected,
            StreamEvent::Disconnected {
                code: Some(1000),
                reason: String::new()
            }
        ]
    );
}

// ── Device tracker ────────────────────────────────────────────────────────────

fn tracker_frame(json: &str) -> Vec<u8> {
    let mut frame = vec![16u8, 0, 0, 0, 0];
    frame.extend_from_slice(json.as_bytes());
    frame
}

#[tokio::test(start_paused = true)]
async fn test_tracker_opens_channel_and_reports_device_list() {
    // Arrange
    let connector = MockConnector::new();
    let tracker = DeviceTracker::new(connector.clone(), &WsConfig::default()).unwrap();
    let updates: Arc<Mutex<Vec<DeviceState>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    let _sub = tracker.on_device_list(move |state| sink.lock().unwrap().push(state.clone()));

    // Act
    tracker.connect().await.unwrap();
    let mut server = connector.take_server();
    server.push_binary(tracker_frame(
        r#"{"type":"devicelist","data":{"list":[{"udid":"emulator-5554","state":"device","ro.product.model":"sdk_gphone64"}]}}"#,
    ));
    settle().await;

    // Assert
    assert_eq!(
        tracker.connection().url().as_str(),
        "ws://localhost:8000/?action=multiplex"
    );
    assert_eq!(
        server.drain(),
        vec![Outbound::Frame(Frame::Binary(vec![4, 0, 0, 0, 0, b'G', b'T', b'R', b'C']))]
    );
    let updates = updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].state, TrackerState::Device);
    assert_eq!(updates[0].devices[0].model, "sdk_gphone64");
}

#[tokio::test(start_paused = true)]
async fn test_tracker_disconnect_drops_listeners() {
    let connector = MockConnector::new();
    let tracker = DeviceTracker::new(connector.clone(), &WsConfig::default()).unwrap();
    let updates = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&updates);
    let _sub = tracker.on_device_list(move |_| *sink.lock().unwrap() += 1);
    tracker.connect().await.unwrap();

    tracker.disconnect();
    tracker.connect().await.unwrap();
    let _first = connector.take_server();
    let second = connector.take_server();
    second.push_binary(tracker_frame(r#"{"type":"devicelist","data":{"list":[]}}"#));
    settle().await;

    assert_eq!(*updates.lock().unwrap(), 0);
}
