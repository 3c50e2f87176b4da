//! The connected relay loop.
//!
//! One task multiplexes the channel, operator input and the capture batch in
//! flight. Batches run as spawned tasks so HTTP calls keep going while the
//! channel is down or reconnecting. The loop only stops on `/quit` or an
//! interrupt, and then only after pending captures are delivered or the drain
//! timeout passes.

use std::collections::VecDeque;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, LocalBoxStream};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::{
    channel_url, execute_all, resolve_chat_id, CaptureAggregator, CaptureRecord, ChannelEvent,
    ChannelFailure, ChannelSink, ConsoleTranscript, Connector, DescriptorParser, Effect,
    EventStream, HttpTransport, JsonlTranscript, MemoryTranscript, ProtocolMarkers, RelayConfig,
    RelayError, ReqwestTransport, RequestDescriptor, Session, StaticCatalog, TranscriptStore,
    WsConnector,
};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Operator line that sends the current draft.
pub(crate) const SEND_DRAFT_COMMAND: &str = "/send";
/// Operator line that stops the relay.
pub(crate) const QUIT_COMMAND: &str = "/quit";

pub(crate) type InputStream = LocalBoxStream<'static, String>;

struct Backoff {
    delay: Duration,
    max: Duration,
    next_attempt: Instant,
}

impl Backoff {
    fn new(max: Duration) -> Self {
        Self {
            delay: INITIAL_RECONNECT_DELAY,
            max,
            next_attempt: Instant::now(),
        }
    }

    fn reset(&mut self) {
        self.delay = INITIAL_RECONNECT_DELAY;
    }

    fn schedule(&mut self) {
        self.next_attempt = Instant::now() + self.delay;
        self.delay = (self.delay * 2).min(self.max);
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RelayOptions {
    pub(crate) max_reconnect_delay: Duration,
    pub(crate) drain_timeout: Duration,
    pub(crate) auto_send_drafts: bool,
}

impl RelayOptions {
    pub(crate) fn from_config(config: &RelayConfig) -> Self {
        Self {
            max_reconnect_delay: config.max_reconnect_delay(),
            drain_timeout: config.drain_timeout(),
            auto_send_drafts: config.auto_send_drafts,
        }
    }
}

pub(crate) struct Relay<C: Connector> {
    session: Session,
    aggregator: CaptureAggregator,
    transport: Arc<dyn HttpTransport>,
    queued: VecDeque<Vec<RequestDescriptor>>,
    in_flight: Option<JoinHandle<Vec<CaptureRecord>>>,
    link: Option<(C::Sink, EventStream)>,
    backoff: Backoff,
    drain_timeout: Duration,
    auto_send_drafts: bool,
}

impl<C: Connector> Relay<C> {
    pub(crate) fn new(
        session: Session,
        aggregator: CaptureAggregator,
        transport: Arc<dyn HttpTransport>,
        options: RelayOptions,
    ) -> Self {
        Self {
            session,
            aggregator,
            transport,
            queued: VecDeque::new(),
            in_flight: None,
            link: None,
            backoff: Backoff::new(options.max_reconnect_delay),
            drain_timeout: options.drain_timeout,
            auto_send_drafts: options.auto_send_drafts,
        }
    }

    /// Runs until `/quit` arrives on `input` or `shutdown` resolves, then
    /// keeps reconnecting until nothing is left to deliver. The end of
    /// `input` only stops reading operator lines.
    pub(crate) async fn run(
        &mut self,
        connector: &mut C,
        mut input: InputStream,
        shutdown: impl Future<Output = ()>,
    ) {
        tokio::pin!(shutdown);
        let mut input_open = true;
        let mut stop_by: Option<Instant> = None;
        loop {
            if self.in_flight.is_none() {
                self.start_next_batch();
            }
            if let Some(deadline) = stop_by {
                if self.is_drained() {
                    break;
                }
                if Instant::now() >= deadline {
                    warn!(
                        pending = self.aggregator.pending_len(),
                        queued = self.queued.len(),
                        "drain timeout; stopping with undelivered captures"
                    );
                    break;
                }
            }

            tokio::select! {
                _ = sleep_until(self.backoff.next_attempt), if self.link.is_none() => {
                    self.connect(connector).await;
                }
                event = next_event(&mut self.link) => {
                    let event =
                        event.unwrap_or_else(|| ChannelEvent::Closed("stream ended".to_string()));
                    self.on_event(event).await;
                }
                joined = join_batch(&mut self.in_flight) => {
                    self.in_flight = None;
                    match joined {
                        Ok(records) => {
                            self.aggregator.push_batch(records);
                            self.flush().await;
                        }
                        Err(err) => error!(error = %err, "capture batch task failed"),
                    }
                }
                line = input.next(), if input_open => match line {
                    Some(line) if line.trim() == QUIT_COMMAND => {
                        stop_by.get_or_insert_with(|| self.stop_deadline());
                    }
                    Some(line) => self.on_operator_line(&line).await,
                    None => {
                        info!("operator input closed; relay keeps running");
                        input_open = false;
                    }
                },
                _ = &mut shutdown, if stop_by.is_none() => {
                    info!("interrupted");
                    stop_by = Some(self.stop_deadline());
                }
                _ = sleep_until(stop_by.unwrap_or_else(Instant::now)), if stop_by.is_some() => {}
            }
        }

        if let Some((mut sink, _)) = self.link.take() {
            sink.close().await;
        }
        info!(
            chat_id = %self.session.chat_id(),
            messages = self.session.transcript().len(),
            "relay stopped"
        );
    }

    fn stop_deadline(&self) -> Instant {
        info!(
            pending = self.aggregator.pending_len(),
            in_flight = self.in_flight.is_some(),
            drain_timeout = ?self.drain_timeout,
            "stopping once captures are delivered"
        );
        Instant::now() + self.drain_timeout
    }

    fn is_drained(&self) -> bool {
        self.in_flight.is_none() && self.queued.is_empty() && self.aggregator.is_empty()
    }

    async fn connect(&mut self, connector: &mut C) {
        match connector.connect().await {
            Ok(link) => {
                self.backoff.reset();
                self.link = Some(link);
            }
            Err(err) => {
                warn!(error = %err, retry_in = ?self.backoff.delay, "connect failed");
                self.backoff.schedule();
            }
        }
    }

    fn lose_link(&mut self, err: ChannelFailure) {
        let _ = self.session.handle(ChannelEvent::Error(err.to_string()));
        self.link = None;
        self.backoff.schedule();
    }

    async fn on_event(&mut self, event: ChannelEvent) {
        let ends = event.ends_connection();
        let effects = self.session.handle(event);
        if ends {
            self.link = None;
            self.backoff.schedule();
        }
        for effect in effects {
            self.apply(effect).await;
        }
    }

    async fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Draft(text) => {
                if text.is_empty() {
                    debug!("no known requests to offer");
                } else if self.auto_send_drafts {
                    self.send_draft().await;
                } else {
                    for line in text.lines() {
                        println!("draft> {line}");
                    }
                    println!("(enter {SEND_DRAFT_COMMAND} to send the draft)");
                }
            }
            Effect::Execute(descriptors) => {
                if descriptors.is_empty() {
                    info!("directive listed no requests");
                    return;
                }
                self.queued.push_back(descriptors);
                if self.in_flight.is_none() {
                    self.start_next_batch();
                } else {
                    debug!(queued = self.queued.len(), "batch queued behind one in flight");
                }
            }
            Effect::FlushCaptures => self.flush().await,
        }
    }

    fn start_next_batch(&mut self) {
        let Some(descriptors) = self.queued.pop_front() else {
            return;
        };
        info!(count = descriptors.len(), "executing capture batch");
        let transport = Arc::clone(&self.transport);
        self.in_flight = Some(tokio::spawn(async move {
            execute_all(transport.as_ref(), &descriptors).await
        }));
    }

    async fn flush(&mut self) {
        let Some((sink, _)) = self.link.as_mut() else {
            return;
        };
        if let Err(err) = self.aggregator.flush_if_ready(sink).await {
            warn!(
                error = %err,
                pending = self.aggregator.pending_len(),
                "flush failed; keeping captures"
            );
            self.lose_link(err);
        }
    }

    async fn on_operator_line(&mut self, line: &str) {
        if line.trim() == SEND_DRAFT_COMMAND {
            self.send_draft().await;
        } else {
            self.send_user_message(line).await;
        }
    }

    /// The draft stays in the session until a send of it is accepted.
    async fn send_draft(&mut self) {
        let Some(draft) = self.session.draft().map(str::to_string) else {
            println!("(no draft to send)");
            return;
        };
        if !self.session.is_connected() {
            warn!("not connected; draft kept");
            return;
        }
        self.send_user_message(&draft).await;
    }

    async fn send_user_message(&mut self, text: &str) {
        let Some(message) = self.session.compose_user_message(text) else {
            return;
        };
        let Some((sink, _)) = self.link.as_mut() else {
            return;
        };
        if let Err(err) = sink.send(&message).await {
            warn!(error = %err, "message not sent");
            self.lose_link(err);
        }
    }
}

#[cfg(test)]
impl<C: Connector> Relay<C> {
    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    pub(crate) fn pending_captures(&self) -> usize {
        self.aggregator.pending_len()
    }
}

async fn next_event<S>(link: &mut Option<(S, EventStream)>) -> Option<ChannelEvent> {
    match link {
        Some((_, events)) => events.next().await,
        None => std::future::pending().await,
    }
}

async fn join_batch(
    handle: &mut Option<JoinHandle<Vec<CaptureRecord>>>,
) -> Result<Vec<CaptureRecord>, JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

pub(crate) fn stdin_lines() -> InputStream {
    let lines = BufReader::new(tokio::io::stdin()).lines();
    stream::unfold(lines, |mut lines| async move {
        match lines.next_line().await {
            Ok(Some(line)) => Some((line, lines)),
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "stdin read failed");
                None
            }
        }
    })
    .boxed_local()
}

/// Resolves on ctrl-c. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for ctrl-c; use /quit to stop");
        std::future::pending::<()>().await;
    }
}

/// Builds the session from config and relays until `/quit` or ctrl-c.
pub(crate) async fn run_connect(
    config: &mut RelayConfig,
    config_path: &Path,
) -> Result<(), RelayError> {
    let parser = DescriptorParser::new(&config.directive_key)?;
    let catalog = match &config.requests_file {
        Some(path) => StaticCatalog::load(path)?,
        None => StaticCatalog::default(),
    };
    let transcript: Box<dyn TranscriptStore> = match &config.transcript_log {
        Some(path) => Box::new(ConsoleTranscript::new(JsonlTranscript::open(path)?)),
        None => Box::new(ConsoleTranscript::new(MemoryTranscript::default())),
    };
    let transport = ReqwestTransport::new(config.request_timeout(), config.base_url()?)?;

    let chat_id = resolve_chat_id(config, config_path).await?;
    let url = channel_url(&config.server_url()?, &chat_id)?;
    info!(%chat_id, %url, directive_key = parser.key(), "starting relay");

    let markers = ProtocolMarkers {
        known: config.known_marker.clone(),
        replay: config.replay_marker.clone(),
    };
    let session = Session::new(chat_id, markers, parser, transcript, Box::new(catalog));
    let mut relay = Relay::new(
        session,
        CaptureAggregator::new(config.wire_format),
        Arc::new(transport),
        RelayOptions::from_config(config),
    );
    relay
        .run(&mut WsConnector::new(url), stdin_lines(), interrupted())
        .await;
    Ok(())
}
