//! WebSocket endpoint configuration and URL builders.
//!
//! Every client component reaches the device host through the same server,
//! so the host, port, and scheme live in one [`WsConfig`] value.  It can be
//! built in code or loaded from a TOML file:
//!
//! ```toml
//! host = "192.168.1.20"
//! port = 8000
//! remote_port = 8886
//! secure = false
//! ```
//!
//! Missing keys fall back to the defaults (`localhost:8000`, remote port
//! 8886, plain `ws://`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::domain::params::Action;

/// Error type for loading configuration and building URLs from it.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The host/port combination does not form a valid URL.
    #[error("invalid WebSocket URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Where the device host's WebSocket server listens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WsConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Device-side TCP port the proxy-adb action forwards to.
    #[serde(default = "default_remote_port")]
    pub remote_port: u16,
    /// Selects `wss://` over `ws://`.  TLS itself is handled elsewhere.
    #[serde(default)]
    pub secure: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_remote_port() -> u16 {
    8886
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            remote_port: default_remote_port(),
            secure: false,
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl WsConfig {
    /// Parses a TOML document; absent keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the document is not valid TOML or a
    /// value has the wrong type.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Loads the configuration from `path`, returning the defaults if the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system errors other than "not
    /// found" and [`ConfigError::Parse`] for invalid TOML.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

// ── URL builders ──────────────────────────────────────────────────────────────

impl WsConfig {
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }

    /// `ws://host:port/`
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Ok(Url::parse(&format!(
            "{}://{}:{}/",
            self.scheme(),
            self.host,
            self.port
        ))?)
    }

    /// URL of an action endpoint: the base URL with `action` and then each of
    /// `params` appended as query pairs, in order.
    pub fn action_url(&self, action: Action, params: &[(&str, &str)]) -> Result<Url, ConfigError> {
        let mut url = self.base_url()?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("action", action.as_str());
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// URL that proxies raw ADB traffic to `tcp:<remote_port>` on `udid`.
    pub fn proxy_adb_url(&self, udid: &str) -> Result<Url, ConfigError> {
        let remote = format!("tcp:{}", self.remote_port);
        self.action_url(Action::ProxyAdb, &[("remote", &remote), ("udid", udid)])
    }

    /// URL of the channel multiplexer.
    pub fn multiplex_url(&self) -> Result<Url, ConfigError> {
        self.action_url(Action::Multiplex, &[])
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
