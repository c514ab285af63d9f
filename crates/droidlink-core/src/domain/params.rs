//! Per-action connection parameters carried in a WebSocket URL query.
//!
//! A stream page is opened with a URL such as
//! `?action=stream&udid=emulator-5554&ws=ws%3A%2F%2Fhost%3A8886%2F`.  Each
//! action accepts a fixed set of keys; [`StreamParams::parse`] rejects
//! anything it does not recognise instead of carrying it along untyped.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Errors produced while parsing stream parameters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParamsError {
    #[error("missing required parameter: {0}")]
    Missing(&'static str),

    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("unknown parameter {key:?} for action {action}")]
    UnknownParameter { action: Action, key: String },

    #[error("invalid value {value:?} for parameter {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("parameter {0} given more than once")]
    Duplicate(String),
}

/// Every action the device host understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    ListHosts,
    ApplDeviceList,
    GoogDeviceList,
    Multiplex,
    Shell,
    ProxyWs,
    ProxyAdb,
    Devtools,
    #[serde(rename = "stream")]
    StreamScrcpy,
    StreamQvh,
    StreamMjpeg,
    ProxyWda,
    #[serde(rename = "list-files")]
    FileListing,
}

impl Action {
    const ALL: [Action; 13] = [
        Action::ListHosts,
        Action::ApplDeviceList,
        Action::GoogDeviceList,
        Action::Multiplex,
        Action::Shell,
        Action::ProxyWs,
        Action::ProxyAdb,
        Action::Devtools,
        Action::StreamScrcpy,
        Action::StreamQvh,
        Action::StreamMjpeg,
        Action::ProxyWda,
        Action::FileListing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ListHosts => "list-hosts",
            Self::ApplDeviceList => "appl-device-list",
            Self::GoogDeviceList => "goog-device-list",
            Self::Multiplex => "multiplex",
            Self::Shell => "shell",
            Self::ProxyWs => "proxy-ws",
            Self::ProxyAdb => "proxy-adb",
            Self::Devtools => "devtools",
            Self::StreamScrcpy => "stream",
            Self::StreamQvh => "stream-qvh",
            Self::StreamMjpeg => "stream-mjpeg",
            Self::ProxyWda => "proxy-wda",
            Self::FileListing => "list-files",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ParamsError::UnsupportedAction(s.to_string()))
    }
}

/// Video player used for scrcpy streams.  Only MSE is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerType {
    #[default]
    Mse,
}

impl PlayerType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mse => "mse",
        }
    }
}

/// Parameters for the two actions a stream connection can be opened with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum StreamParams {
    /// Direct scrcpy stream from the given WebSocket URL.
    #[serde(rename = "stream")]
    Stream {
        udid: String,
        ws: String,
        player: PlayerType,
    },
    /// Raw ADB proxy through the device host.
    ProxyAdb {
        udid: String,
        remote: Option<String>,
        port: Option<u16>,
    },
}

impl StreamParams {
    /// Parses query pairs (`action`, `udid`, ...) into typed parameters.
    ///
    /// The `player` key is accepted for `stream` but the result is always
    /// [`PlayerType::Mse`].
    ///
    /// # Errors
    ///
    /// Returns [`ParamsError`] for a missing `udid` or `ws`, an action other
    /// than `stream` / `proxy-adb`, a key the action does not accept, a repeated
    /// key, or a port that is not a `u16`.
    pub fn parse<I, K, V>(pairs: I) -> Result<Self, ParamsError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut action = None;
        let mut udid = None;
        let mut rest: Vec<(String, String)> = Vec::new();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref().to_string());
            let slot = match key {
                "action" => &mut action,
                "udid" => &mut udid,
                other => {
                    if rest.iter().any(|(k, _)| k == other) {
                        return Err(ParamsError::Duplicate(other.to_string()));
                    }
                    rest.push((other.to_string(), value));
                    continue;
                }
            };
            if slot.replace(value).is_some() {
                return Err(ParamsError::Duplicate(key.to_string()));
            }
        }

        let action: Action = action.ok_or(ParamsError::Missing("action"))?.parse()?;
        let udid = udid
            .filter(|u| !u.is_empty())
            .ok_or(ParamsError::Missing("udid"))?;

        match action {
            Action::StreamScrcpy => {
                let mut ws = None;
                for (key, value) in rest {
                    match key.as_str() {
                        "ws" => ws = Some(value),
                        "player" => {}
                        _ => return Err(ParamsError::UnknownParameter { action, key }),
                    }
                }
                let ws = ws
                    .filter(|w| !w.is_empty())
                    .ok_or(ParamsError::Missing("ws"))?;
                Ok(Self::Stream {
                    udid,
                    ws,
                    player: PlayerType::Mse,
                })
            }
            Action::ProxyAdb => {
                let mut remote = None;
                let mut port = None;
                for (key, value) in rest {
                    match key.as_str() {
                        "remote" => remote = Some(value).filter(|r| !r.is_empty()),
                        "port" if value.is_empty() => {}
                        "port" => {
                            port = Some(value.parse::<u16>().map_err(|_| {
                                ParamsError::InvalidValue { key: "port", value }
                            })?)
                        }
                        _ => return Err(ParamsError::UnknownParameter { action, key }),
                    }
                }
                Ok(Self::ProxyAdb { udid, remote, port })
            }
            other => Err(ParamsError::UnsupportedAction(other.as_str().to_string())),
        }
    }

    /// Parses the query string of `url`.
    pub fn from_url(url: &Url) -> Result<Self, ParamsError> {
        Self::parse(url.query_pairs())
    }

    pub fn action(&self) -> Action {
        match self {
            Self::Stream { .. } => Action::StreamScrcpy,
            Self::ProxyAdb { .. } => Action::ProxyAdb,
        }
    }

    pub fn udid(&self) -> &str {
        match self {
            Self::Stream { udid, .. } | Self::ProxyAdb { udid, .. } => udid,
        }
    }

    /// WebSocket URL to open for these parameters.
    ///
    /// `stream` connects straight to its `ws` URL; `proxy-adb` goes through
    /// `base` with every set parameter appended as a query pair.
    ///
    /// # Errors
    ///
    /// Returns [`ParamsError::InvalidValue`] when the `ws` value is not a URL.
    pub fn websocket_url(&self, base: &Url) -> Result<Url, ParamsError> {
        match self {
            Self::Stream { ws, .. } => Url::parse(ws).map_err(|_| ParamsError::InvalidValue {
                key: "ws",
                value: ws.clone(),
            }),
            Self::ProxyAdb { udid, remote, port } => {
                let mut url = base.clone();
                {
                    let mut query = url.query_pairs_mut();
                    query.append_pair("action", Action::ProxyAdb.as_str());
                    query.append_pair("udid", udid);
                    if let Some(remote) = remote {
                        query.append_pair("remote", remote);
                    }
                    if let Some(port) = port {
                        query.append_pair("port", &port.to_string());
                    }
                }
                Ok(url)
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(pairs: &[(&str, &str)]) -> Result<StreamParams, ParamsError> {
        StreamParams::parse(pairs.iter().copied())
    }

    #[test]
    fn test_stream_params_always_use_mse() {
        // Act
        let params = parse(&[
            ("action", "stream"),
            ("udid", "emulator-5554"),
            ("ws", "ws://10.0.0.2:8886/"),
            ("player", "broadway"),
        ])
        .unwrap();

        // Assert
        assert_eq!(
            params,
            StreamParams::Stream {
                udid: "emulator-5554".to_string(),
                ws: "ws://10.0.0.2:8886/".to_string(),
                player: PlayerType::Mse,
            }
        );
        assert_eq!(params.action(), Action::StreamScrcpy);
    }

    #[test]
    fn test_missing_udid_is_rejected() {
        assert_eq!(
            parse(&[("action", "proxy-adb")]),
            Err(ParamsError::Missing("udid"))
        );
        assert_eq!(
            parse(&[("action", "proxy-adb"), ("udid", "")]),
            Err(ParamsError::Missing("udid"))
        );
    }

    #[test]
    fn test_stream_without_ws_is_rejected() {
        assert_eq!(
            parse(&[("action", "stream"), ("udid", "x")]),
            Err(ParamsError::Missing("ws"))
        );
    }

    #[test]
    fn test_proxy_adb_optional_fields() {
        let bare = parse(&[("action", "proxy-adb"), ("udid", "x")]).unwrap();
        let full = parse(&[
            ("action", "proxy-adb"),
            ("udid", "x"),
            ("remote", "tcp:8886"),
            ("port", "8886"),
        ])
        .unwrap();

        assert_eq!(
            bare,
            StreamParams::ProxyAdb {
                udid: "x".to_string(),
                remote: None,
                port: None
            }
        );
        assert_eq!(
            full,
            StreamParams::ProxyAdb {
                udid: "x".to_string(),
                remote: Some("tcp:8886".to_string()),
                port: Some(8886)
            }
        );
    }

    #[test]
    fn test_bad_port_is_rejected() {
        assert!(matches!(
            parse(&[("action", "proxy-adb"), ("udid", "x"), ("port", "99999")]),
            Err(ParamsError::InvalidValue { key: "port", .. })
        ));
    }

    #[test]
    fn test_known_but_unsupported_action_is_rejected() {
        assert_eq!(
            parse(&[("action", "shell"), ("udid", "x")]),
            Err(ParamsError::UnsupportedAction("shell".to_string()))
        );
        assert_eq!(
            parse(&[("action", "teleport"), ("udid", "x")]),
            Err(ParamsError::UnsupportedAction("teleport".to_string()))
        );
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(matches!(
            parse(&[("action", "proxy-adb"), ("udid", "x"), ("ws", "ws://a/")]),
            Err(ParamsError::UnknownParameter { key, .. }) if key == "ws"
        ));
    }

    #[test]
    fn test_duplicate_key_is_rejected() {
        assert_eq!(
            parse(&[("action", "proxy-adb"), ("udid", "a"), ("udid", "b")]),
            Err(ParamsError::Duplicate("udid".to_string()))
        );
    }

    #[test]
    fn test_from_url_decodes_query() {
        let url =
            Url::parse("http://host/?action=stream&udid=abc&ws=ws%3A%2F%2Fdev%3A8886%2F").unwrap();

        let params = StreamParams::from_url(&url).unwrap();

        assert_eq!(params.udid(), "abc");
        assert_eq!(
            params.websocket_url(&url).unwrap().as_str(),
            "ws://dev:8886/"
        );
    }

    #[test]
    fn test_proxy_adb_websocket_url_appends_set_params() {
        let base = Url::parse("ws://localhost:8000/").unwrap();
        let params = StreamParams::ProxyAdb {
            udid: "abc".to_string(),
            remote: Some("tcp:8886".to_string()),
            port: None,
        };

        let url = params.websocket_url(&base).unwrap();

        assert_eq!(
            url.as_str(),
            "ws://localhost:8000/?action=proxy-adb&udid=abc&remote=tcp%3A8886"
        );
    }

    #[test]
    fn test_action_string_roundtrip() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
    }
}
