//! Duplex text channel to the agent, plus the websocket implementation.

use async_trait::async_trait;
use futures::stream::{self, LocalBoxStream, SplitSink};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use crate::ChannelFailure;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChannelEvent {
    Opened,
    Text(String),
    Closed(String),
    Error(String),
}

impl ChannelEvent {
    pub(crate) fn ends_connection(&self) -> bool {
        matches!(self, ChannelEvent::Closed(_) | ChannelEvent::Error(_))
    }
}

pub(crate) type EventStream = LocalBoxStream<'static, ChannelEvent>;

/// Outbound half of a channel.
#[async_trait(?Send)]
pub(crate) trait ChannelSink {
    fn is_open(&self) -> bool;

    async fn send(&mut self, text: &str) -> Result<(), ChannelFailure>;

    async fn close(&mut self) {}
}

#[async_trait(?Send)]
pub(crate) trait Connector {
    type Sink: ChannelSink;

    async fn connect(&mut self) -> Result<(Self::Sink, EventStream), ChannelFailure>;
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub(crate) struct WsChannel {
    sink: Option<WsSink>,
}

#[async_trait(?Send)]
impl ChannelSink for WsChannel {
    fn is_open(&self) -> bool {
        self.sink.is_some()
    }

    async fn send(&mut self, text: &str) -> Result<(), ChannelFailure> {
        let sink = self.sink.as_mut().ok_or(ChannelFailure::NotOpen)?;
        match sink.send(Message::Text(text.to_string().into())).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.sink = None;
                Err(match err {
                    WsError::ConnectionClosed | WsError::AlreadyClosed => {
                        ChannelFailure::Closed("peer closed the connection".to_string())
                    }
                    other => other.into(),
                })
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.close().await;
        }
    }
}

fn inbound_event(message: Result<Message, WsError>) -> Option<ChannelEvent> {
    match message {
        Ok(Message::Text(text)) => Some(ChannelEvent::Text(text.as_str().to_string())),
        Ok(Message::Binary(binary)) => match String::from_utf8(binary.to_vec()) {
            Ok(text) => Some(ChannelEvent::Text(text)),
            Err(_) => {
                debug!("skipping non-utf8 binary frame");
                None
            }
        },
        Ok(Message::Close(frame)) => {
            let reason = frame
                .map(|frame| frame.reason.to_string())
                .filter(|reason| !reason.is_empty())
                .unwrap_or_else(|| "socket closed".to_string());
            Some(ChannelEvent::Closed(reason))
        }
        // Pongs are queued by tungstenite on read.
        Ok(_) => None,
        Err(err) => Some(ChannelEvent::Error(err.to_string())),
    }
}

pub(crate) async fn connect_channel(url: &Url) -> Result<(WsChannel, EventStream), ChannelFailure> {
    let (socket, _) = connect_async(url.as_str()).await?;
    info!(%url, "channel connected");
    let (sink, source) = socket.split();

    let events = stream::once(async { ChannelEvent::Opened })
        .chain(source.filter_map(|message| async move { inbound_event(message) }))
        .boxed_local();
    Ok((WsChannel { sink: Some(sink) }, events))
}

pub(crate) struct WsConnector {
    url: Url,
}

impl WsConnector {
    pub(crate) fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait(?Send)]
impl Connector for WsConnector {
    type Sink = WsChannel;

    async fn connect(&mut self) -> Result<(WsChannel, EventStream), ChannelFailure> {
        connect_channel(&self.url).await
    }
}
