//! Chat id bootstrap and channel address.

use std::path::Path;

use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use crate::{load_config, save_config, RelayConfig, RelayError};

/// Asks the server for a fresh chat id. The id may come back as a string or
/// a number.
pub(crate) async fn fetch_chat_id(client: &Client, server: &Url) -> Result<String, RelayError> {
    let endpoint = server
        .join("get_chat_id")
        .map_err(|err| RelayError::Identity(err.to_string()))?;
    let payload: Value = client
        .get(endpoint.clone())
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|err| RelayError::Identity(format!("{endpoint}: {err}")))?
        .json()
        .await
        .map_err(|err| RelayError::Identity(format!("{endpoint}: {err}")))?;

    let chat_id = match payload.get("chat_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
        Some(Value::Number(id)) => id.to_string(),
        _ => {
            return Err(RelayError::Identity(format!(
                "{endpoint}: response has no chat_id"
            )));
        }
    };
    info!(%chat_id, "chat id assigned by server");
    Ok(chat_id)
}

/// Configured chat id, else one from the server. A fetched id is written
/// back to `config_path` so the next start rejoins the same chat.
pub(crate) async fn resolve_chat_id(
    config: &mut RelayConfig,
    config_path: &Path,
) -> Result<String, RelayError> {
    if let Some(chat_id) = config.chat_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
        return Ok(chat_id.to_string());
    }
    let client = Client::builder()
        .build()
        .map_err(|err| RelayError::Identity(err.to_string()))?;
    let chat_id = fetch_chat_id(&client, &config.server_url()?).await?;
    config.chat_id = Some(chat_id.clone());
    if let Err(err) = remember_chat_id(config_path, &chat_id) {
        warn!(error = %err, path = %config_path.display(), "chat id not saved");
    }
    Ok(chat_id)
}

/// Only the chat id is written; env and flag overrides stay out of the file.
fn remember_chat_id(path: &Path, chat_id: &str) -> Result<(), RelayError> {
    let mut stored = load_config(path)?;
    stored.chat_id = Some(chat_id.to_string());
    save_config(path, &stored)?;
    info!(%chat_id, path = %path.display(), "chat id saved");
    Ok(())
}

/// `{ws_base}/ws/{chat_id}`, where `ws_base` swaps http(s) for ws(s).
pub(crate) fn channel_url(server: &Url, chat_id: &str) -> Result<Url, RelayError> {
    let mut url = server.clone();
    let scheme = if server.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme).map_err(|_| {
        RelayError::config("server", format!("cannot derive a websocket url from {server}"))
    })?;
    let mut joined = url
        .join("ws/")
        .map_err(|err| RelayError::config("server", err.to_string()))?;
    joined
        .path_segments_mut()
        .map_err(|_| RelayError::config("server", format!("{server} cannot be a base")))?
        .pop_if_empty()
        .push(chat_id);
    Ok(joined)
}
