use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::utils::path;
use crate::Error;
use crate::Result;

/// Connection level settings of a coordination session
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionConfig {
    /// Comma separated `host:port` list of the ensemble members
    #[serde(default = "default_server_addr")]
    pub server_addr: String,

    /// Namespace root applied to every path (`app` and `/app` are equivalent,
    /// empty or `/` disables prefixing)
    #[serde(default)]
    pub namespace: String,

    /// Namespace-relative path watched by `watch_root`
    #[serde(default = "default_root_path")]
    pub root_path: String,

    /// Optional `user:password` digest credential. When present every created
    /// node is restricted to the creating identity.
    #[serde(default)]
    pub digest: Option<String>,

    /// Time the service keeps the session (and its ephemeral nodes) alive
    /// after the connection drops
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Deadline for establishing a connection
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            namespace: String::new(),
            root_path: default_root_path(),
            digest: None,
            session_timeout_ms: default_session_timeout_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.servers().is_empty() {
            return Err(Error::InvalidConfig(
                "session.server_addr must contain at least one address".into(),
            ));
        }

        if let Some(bad) = self.servers().iter().find(|s| !s.contains(':')) {
            return Err(Error::InvalidConfig(format!(
                "session.server_addr entry `{}` must be host:port",
                bad
            )));
        }

        path::normalize_namespace(&self.namespace)?;
        path::validate(&self.root_path)?;

        if let Some(digest) = self.credential() {
            if !digest.contains(':') {
                return Err(Error::InvalidConfig(
                    "session.digest must have the form user:password".into(),
                ));
            }
        }

        if self.session_timeout_ms == 0 || self.connection_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "session timeouts must be greater than 0".into(),
            ));
        }

        if self.connection_timeout_ms > self.session_timeout_ms {
            return Err(Error::InvalidConfig(format!(
                "connection_timeout_ms ({}) must not exceed session_timeout_ms ({})",
                self.connection_timeout_ms, self.session_timeout_ms
            )));
        }

        Ok(())
    }

    /// Server addresses with blanks removed
    pub fn servers(&self) -> Vec<String> {
        self.server_addr
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    /// Digest credential, ignoring a blank value
    pub fn credential(&self) -> Option<&str> {
        self.digest.as_deref().filter(|d| !d.trim().is_empty())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

fn default_server_addr() -> String {
    "127.0.0.1:2181".to_string()
}
fn default_root_path() -> String {
    "/".to_string()
}
fn default_session_timeout_ms() -> u64 {
    60000
}
fn default_connection_timeout_ms() -> u64 {
    15000
}
