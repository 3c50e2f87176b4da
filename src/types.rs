use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One request the agent asked us to replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RequestDescriptor {
    pub(crate) method: String,
    pub(crate) url: String,
    #[serde(default)]
    pub(crate) headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) body: Option<String>,
}

impl RequestDescriptor {
    pub(crate) fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.trim().to_ascii_uppercase(),
            url: url.trim().to_string(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// `"{METHOD} {url}"`, the key a capture record is correlated by.
    pub(crate) fn summary(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

pub(crate) fn method_accepts_body(method: &str) -> bool {
    !matches!(method, "GET" | "HEAD")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CaptureRecord {
    #[serde(rename = "request")]
    pub(crate) request_summary: String,
    pub(crate) headers: BTreeMap<String, String>,
    #[serde(rename = "response")]
    pub(crate) response_body: String,
}

/// Shape of a flushed batch on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum WireFormat {
    /// Plain JSON array of records.
    #[default]
    Bare,
    /// `{"batch": seq, "records": [...]}`
    Envelope,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CaptureBatch {
    pub(crate) seq: u64,
    pub(crate) records: Vec<CaptureRecord>,
}

#[derive(Serialize)]
struct BatchEnvelope<'a> {
    batch: u64,
    records: &'a [CaptureRecord],
}

impl CaptureBatch {
    pub(crate) fn to_wire(&self, format: WireFormat) -> Result<String, serde_json::Error> {
        match format {
            WireFormat::Bare => serde_json::to_string(&self.records),
            WireFormat::Envelope => serde_json::to_string(&BatchEnvelope {
                batch: self.seq,
                records: &self.records,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Sender {
    User,
    Bot,
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sender::User => write!(f, "user"),
            Sender::Bot => write!(f, "bot"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ChatMessage {
    pub(crate) id: u64,
    pub(crate) text: String,
    pub(crate) sender: Sender,
    pub(crate) at: DateTime<Utc>,
}
