//! Failure taxonomy for the relay.
//!
//! Only [`RelayError`] ever ends the process, and only during startup. The
//! other types are local to one message, one descriptor or one connection.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub(crate) enum ParseFailure {
    /// No directive-shaped content; the message is ordinary text.
    #[error("no request descriptors found in message")]
    NotFound,

    #[error("malformed directive payload: {reason}")]
    Malformed {
        snippet: String,
        #[source]
        reason: MalformedReason,
    },
}

#[derive(Error, Debug)]
pub(crate) enum MalformedReason {
    #[error("invalid JSON after repair: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload has no array of request descriptors")]
    MissingArray,
}

#[derive(Error, Debug)]
pub(crate) enum TransportFailure {
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid method `{0}`")]
    InvalidMethod(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub(crate) enum ChannelFailure {
    #[error("channel is not open")]
    NotOpen,

    #[error("channel closed: {0}")]
    Closed(String),

    #[error("websocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Error, Debug)]
pub(crate) enum RelayError {
    #[error("config error in {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },

    #[error("identity bootstrap failed: {0}")]
    Identity(String),

    #[error("invalid directive key `{0}`")]
    DirectiveKey(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("http client setup failed: {0}")]
    Transport(#[from] TransportFailure),
}

impl RelayError {
    pub(crate) fn config(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
