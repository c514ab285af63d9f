//! Connection-level domain types with no I/O of their own.
//!
//! - **`params`** – the typed query parameters a stream connection is opened
//!   with, and the list of actions the device host understands.
//! - **`config`** – where the device host listens and how to build the
//!   WebSocket URLs for each action.

pub mod config;
pub mod params;
