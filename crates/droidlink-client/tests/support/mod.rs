//! In-memory `Connector` shared by the client integration tests.
//!
//! Every successful `connect` hands the manager one end of a channel pair and
//! keeps the other end as a [`ServerEnd`], so a test can read what the client
//! wrote and inject what the "server" says.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use url::Url;

use droidlink_client::application::transport::{Outbound, Socket, SocketEvent};
use droidlink_client::{Connector, Frame, TransportError};

/// The far side of one socket handed out by [`MockConnector`].
pub struct ServerEnd {
    pub written: mpsc::UnboundedReceiver<Outbound>,
    pub events: mpsc::UnboundedSender<SocketEvent>,
}

impl ServerEnd {
    /// Everything the client has written so far.
    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(item) = self.written.try_recv() {
            out.push(item);
        }
        out
    }

    pub fn push_binary(&self, data: impl Into<Vec<u8>>) {
        let _ = self
            .events
            .send(SocketEvent::Message(Frame::Binary(data.into())));
    }

    pub fn push(&self, event: SocketEvent) {
        let _ = self.events.send(event);
    }
}

#[derive(Default)]
pub struct MockConnector {
    attempts: AtomicUsize,
    failures_left: AtomicUsize,
    gate: Option<Arc<Notify>>,
    servers: Mutex<VecDeque<ServerEnd>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A connector whose `connect` waits until [`MockConnector::release`].
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Arc::new(Notify::new())),
            ..Self::default()
        })
    }

    /// The next `count` attempts fail.
    pub fn failing(count: usize) -> Arc<Self> {
        let connector = Self::default();
        connector.failures_left.store(count, Ordering::SeqCst);
        Arc::new(connector)
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    /// Number of `connect` calls so far, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Takes the oldest socket not yet taken by the test.
    pub fn take_server(&self) -> ServerEnd {
        self.servers
            .lock()
            .unwrap()
            .pop_front()
            .expect("no socket has been opened")
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &Url) -> Result<Socket, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportError::ConnectFailed {
                url: url.to_string(),
                reason: "connection refused".into(),
            });
        }

        let (outbound, written) = mpsc::unbounded_channel();
        let (events, inbound) = mpsc::unbounded_channel();
        self.servers
            .lock()
            .unwrap()
            .push_back(ServerEnd { written, events });
        Ok(Socket { outbound, inbound })
    }
}

/// Lets every ready task run.  Under a paused clock this also advances time
/// by one millisecond.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn url() -> Url {
    Url::parse("ws://localhost:8000/?action=proxy-adb&udid=emulator-5554").unwrap()
}
