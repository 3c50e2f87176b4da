use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    RelayError, WireFormat, DEFAULT_DIRECTIVE_KEY, DEFAULT_KNOWN_MARKER, DEFAULT_REPLAY_MARKER,
};

pub(crate) const DEFAULT_SERVER: &str = "http://localhost:8000";
pub(crate) const DEFAULT_CONFIG_FILE: &str = "reqrelay.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct RelayConfig {
    /// HTTP base of the agent server; the websocket base is derived from it.
    pub(crate) server: String,
    pub(crate) chat_id: Option<String>,
    pub(crate) known_marker: String,
    pub(crate) replay_marker: String,
    pub(crate) directive_key: String,
    /// Base for descriptor urls that start with `/`.
    pub(crate) base_url: Option<String>,
    pub(crate) request_timeout_ms: Option<u64>,
    pub(crate) wire_format: WireFormat,
    pub(crate) auto_send_drafts: bool,
    pub(crate) max_reconnect_delay_secs: u64,
    /// How long a stop request waits for undelivered captures.
    pub(crate) drain_timeout_secs: u64,
    pub(crate) transcript_log: Option<PathBuf>,
    pub(crate) requests_file: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            chat_id: None,
            known_marker: DEFAULT_KNOWN_MARKER.to_string(),
            replay_marker: DEFAULT_REPLAY_MARKER.to_string(),
            directive_key: DEFAULT_DIRECTIVE_KEY.to_string(),
            base_url: None,
            request_timeout_ms: None,
            wire_format: WireFormat::Bare,
            auto_send_drafts: false,
            max_reconnect_delay_secs: 30,
            drain_timeout_secs: 30,
            transcript_log: None,
            requests_file: None,
        }
    }
}

pub(crate) fn default_config_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// Missing file means defaults; a file that exists but does not parse is an
/// error.
pub(crate) fn load_config(path: &Path) -> Result<RelayConfig, RelayError> {
    match std::fs::read_to_string(path) {
        Ok(data) => {
            serde_json::from_str(&data).map_err(|err| RelayError::config(path, err.to_string()))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfig::default()),
        Err(err) => Err(err.into()),
    }
}

pub(crate) fn save_config(path: &Path, config: &RelayConfig) -> Result<(), RelayError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

impl RelayConfig {
    pub(crate) fn apply_env(&mut self) -> Result<(), RelayError> {
        self.apply_overrides(env_optional)
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), RelayError> {
        if let Some(server) = lookup("REQRELAY_SERVER") {
            self.server = server;
        }
        if let Some(chat_id) = lookup("REQRELAY_CHAT_ID") {
            self.chat_id = Some(chat_id);
        }
        if let Some(base_url) = lookup("REQRELAY_BASE_URL") {
            self.base_url = Some(base_url);
        }
        if let Some(value) = lookup("REQRELAY_TIMEOUT_MS") {
            let ms = value.trim().parse::<u64>().map_err(|_| {
                RelayError::config("REQRELAY_TIMEOUT_MS", format!("invalid number `{value}`"))
            })?;
            self.request_timeout_ms = Some(ms);
        }
        Ok(())
    }

    /// Server url, always ending in `/` so relative joins keep its path.
    pub(crate) fn server_url(&self) -> Result<Url, RelayError> {
        let mut url = Url::parse(self.server.trim())
            .map_err(|err| RelayError::config("server", format!("`{}`: {err}", self.server)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RelayError::config(
                "server",
                format!("expected an http(s) url, got `{}`", self.server),
            ));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    pub(crate) fn base_url(&self) -> Result<Option<Url>, RelayError> {
        self.base_url
            .as_deref()
            .map(|raw| {
                Url::parse(raw)
                    .map_err(|err| RelayError::config("base_url", format!("`{raw}`: {err}")))
            })
            .transpose()
    }

    pub(crate) fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub(crate) fn max_reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_delay_secs.max(1))
    }

    pub(crate) fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}
