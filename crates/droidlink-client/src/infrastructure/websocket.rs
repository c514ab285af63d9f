//! `Connector` implementation backed by tokio-tungstenite.
//!
//! The WebSocket is split into its sink and stream halves, each driven by its
//! own task:
//!
//! - the **writer** drains the socket's outbound channel into the sink and
//!   sends a close frame when asked to (or when the channel is dropped);
//! - the **reader** turns stream items into [`SocketEvent`]s and ends after
//!   reporting a close or an error.
//!
//! Ping/pong is answered inside tungstenite and never surfaces here.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};
use url::Url;

use crate::application::transport::{Connector, Frame, Outbound, Socket, SocketEvent, TransportError};

/// Opens real WebSocket connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Socket, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        debug!(%url, "websocket open");

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<SocketEvent>();

        let writer_url = url.clone();
        tokio::spawn(async move {
            while let Some(item) = outbound_rx.recv().await {
                let message = match item {
                    Outbound::Frame(Frame::Binary(data)) => Message::Binary(data),
                    Outbound::Frame(Frame::Text(text)) => Message::Text(text),
                    Outbound::Close => break,
                };
                if let Err(e) = sink.send(message).await {
                    debug!(url = %writer_url, "websocket write failed: {e}");
                    return;
                }
            }
            let _ = sink.close().await;
            trace!(url = %writer_url, "websocket writer finished");
        });

        tokio::spawn(async move {
            while let Some(item) = source.next().await {
                let event = match item {
                    Ok(Message::Binary(data)) => SocketEvent::Message(Frame::Binary(data)),
                    Ok(Message::Text(text)) => SocketEvent::Message(Frame::Text(text)),
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = match frame {
                            Some(f) => (Some(u16::from(f.code)), f.reason.into_owned()),
                            None => (None, String::new()),
                        };
                        let _ = inbound_tx.send(SocketEvent::Closed { code, reason });
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = inbound_tx.send(SocketEvent::Error(TransportError::Socket(e.to_string())));
                        return;
                    }
                };
                if inbound_tx.send(event).is_err() {
                    return;
                }
            }
        });

        Ok(Socket {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
