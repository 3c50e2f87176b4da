//! Per-connection conversation state and the directive protocol.
//!
//! [`Session::handle`] is a plain reducer: it updates the transcript and the
//! protocol state and returns the effects the runtime should perform.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::{
    ChannelEvent, ChatMessage, DescriptorParser, ParseFailure, RequestCatalog, RequestDescriptor,
    Sender, TranscriptStore,
};

pub(crate) const DEFAULT_KNOWN_MARKER: &str = "Sample Requests and Responses";
pub(crate) const DEFAULT_REPLAY_MARKER: &str = "send_response_function";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProtocolState {
    Idle,
    AwaitingExecution,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Effect {
    /// Suggested operator reply listing the known requests.
    Draft(String),
    Execute(Vec<RequestDescriptor>),
    FlushCaptures,
}

pub(crate) struct ProtocolMarkers {
    pub(crate) known: String,
    pub(crate) replay: String,
}

impl Default for ProtocolMarkers {
    fn default() -> Self {
        Self {
            known: DEFAULT_KNOWN_MARKER.to_string(),
            replay: DEFAULT_REPLAY_MARKER.to_string(),
        }
    }
}

pub(crate) struct Session {
    chat_id: String,
    state: ProtocolState,
    connected: bool,
    next_message_id: u64,
    draft: Option<String>,
    markers: ProtocolMarkers,
    parser: DescriptorParser,
    transcript: Box<dyn TranscriptStore>,
    catalog: Box<dyn RequestCatalog>,
}

impl Session {
    pub(crate) fn new(
        chat_id: String,
        markers: ProtocolMarkers,
        parser: DescriptorParser,
        transcript: Box<dyn TranscriptStore>,
        catalog: Box<dyn RequestCatalog>,
    ) -> Self {
        let next_message_id = transcript.messages().last().map_or(1, |m| m.id + 1);
        Self {
            chat_id,
            state: ProtocolState::Idle,
            connected: false,
            next_message_id,
            draft: None,
            markers,
            parser,
            transcript,
            catalog,
        }
    }

    pub(crate) fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected
    }

    pub(crate) fn transcript(&self) -> &[ChatMessage] {
        self.transcript.messages()
    }

    /// The pending draft. It is cleared only when a user message is sent.
    pub(crate) fn draft(&self) -> Option<&str> {
        self.draft.as_deref()
    }

    pub(crate) fn handle(&mut self, event: ChannelEvent) -> Vec<Effect> {
        match event {
            ChannelEvent::Opened => {
                self.connected = true;
                info!(chat_id = %self.chat_id, "session connected");
                vec![Effect::FlushCaptures]
            }
            ChannelEvent::Closed(reason) => {
                self.connected = false;
                info!(chat_id = %self.chat_id, %reason, "session disconnected");
                Vec::new()
            }
            ChannelEvent::Error(error) => {
                self.connected = false;
                warn!(chat_id = %self.chat_id, %error, "channel error");
                Vec::new()
            }
            ChannelEvent::Text(text) => self.on_bot_message(text),
        }
    }

    fn on_bot_message(&mut self, text: String) -> Vec<Effect> {
        // Both stages see the message as it arrived.
        let known = text
            .contains(&self.markers.known)
            .then(|| self.catalog.known_requests());
        let parsed = text
            .contains(&self.markers.replay)
            .then(|| self.parser.extract_descriptors(&text));

        self.record(Sender::Bot, text);

        let mut effects = Vec::new();
        if let Some(requests) = known {
            let listing = requests
                .iter()
                .map(RequestDescriptor::summary)
                .collect::<Vec<_>>()
                .join("\n");
            self.state = ProtocolState::AwaitingExecution;
            self.draft = Some(listing.clone());
            effects.push(Effect::Draft(listing));
        }
        match parsed {
            Some(Ok(descriptors)) => {
                info!(count = descriptors.len(), "directive received");
                self.state = ProtocolState::Idle;
                effects.push(Effect::Execute(descriptors));
            }
            Some(Err(ParseFailure::NotFound)) => {
                debug!("replay marker without a descriptor payload");
            }
            Some(Err(err)) => warn!(error = %err, "ignoring malformed directive"),
            None => {}
        }
        effects
    }

    /// Records an operator line and returns the text to send, or `None` when
    /// the line is blank or the channel is down.
    pub(crate) fn compose_user_message(&mut self, input: &str) -> Option<String> {
        let text = input.trim();
        if text.is_empty() {
            return None;
        }
        if !self.connected {
            warn!("not connected; message not sent");
            return None;
        }
        self.draft = None;
        self.record(Sender::User, text.to_string());
        Some(text.to_string())
    }

    fn record(&mut self, sender: Sender, text: String) {
        let message = ChatMessage {
            id: self.next_message_id,
            text,
            sender,
            at: Utc::now(),
        };
        self.next_message_id += 1;
        if let Err(err) = self.transcript.append(message) {
            warn!(error = %err, "transcript append failed");
        }
    }
}

#[cfg(test)]
impl Session {
    pub(crate) fn state(&self) -> ProtocolState {
        self.state
    }
}
