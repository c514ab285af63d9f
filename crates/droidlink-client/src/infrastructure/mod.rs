//! Infrastructure layer for the droidlink client.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `droidlink_core`, but MUST NOT be imported by the `application` layer.
//!
//! - **`websocket`** – `WsConnector`, the tokio-tungstenite implementation
//!   of the application's `Connector` port.

pub mod websocket;
