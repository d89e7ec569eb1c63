//! Connection controller for the market data feed
//!
//! One supervisor task owns the connection lifecycle: connect attempts, the
//! connected session, heartbeats, bounded reconnects, and every frame written
//! to the wire. Each attempt spawns a reader task that pumps events back
//! tagged with that attempt's generation; events from a superseded generation
//! are discarded, so a connection that was abandoned mid-handshake can never
//! flip the status or leave a second session running.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, sleep_until, Instant};
use tracing::{debug, error, info, warn};

use deck_core::{
    ConnectionState, FeedCommand, FeedMessage, PriceRecord, StreamStatus, Symbol, TickPayload,
    UpdateKind,
};

use crate::cache::PriceCache;
use crate::config::StreamConfig;
use crate::subscriptions::SubscriptionRegistry;
use crate::transport::{WireFrame, WireSink, WireTransport};

/// Capacity of the session event channel
const SESSION_EVENT_BUFFER: usize = 256;

/// Requests from the facade to the supervisor
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect,
    /// Symbols newly added to the union; subscribe on the wire if connected
    Subscribe(Vec<Symbol>),
    /// Symbols fully released; unsubscribe on the wire if connected
    Unsubscribe(Vec<Symbol>),
    Shutdown,
}

/// Events from a session reader task, tagged with its generation
enum SessionEvent {
    Opened {
        generation: u64,
        sink: Box<dyn WireSink>,
    },
    Frame {
        generation: u64,
        frame: WireFrame,
    },
    Closed {
        generation: u64,
        reason: Option<String>,
    },
    ConnectFailed {
        generation: u64,
        error: String,
    },
}

impl SessionEvent {
    fn generation(&self) -> u64 {
        match self {
            Self::Opened { generation, .. }
            | Self::Frame { generation, .. }
            | Self::Closed { generation, .. }
            | Self::ConnectFailed { generation, .. } => *generation,
        }
    }
}

/// Updates fanned out to consumers
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A tick was merged; carries the full merged record
    Price { symbol: Symbol, record: PriceRecord },
    /// The connection status changed
    Status(StreamStatus),
}

/// How an active connection cycle ended
enum CycleEnd {
    /// Explicit disconnect; back to idle with no automatic reconnect
    Disconnected,
    /// Retries exhausted or reconnects disabled; back to idle in failed state
    Exhausted,
    Shutdown,
}

/// How one session (attempt plus connected phase) ended
enum SessionEnd {
    /// Failed open or abnormal close; carries the reason
    Failure(String),
    Disconnected,
    Shutdown,
}

/// How a reconnect wait ended
enum WaitEnd {
    Retry,
    /// Manual connect; retry immediately with the attempt counter reset
    ConnectNow,
    Disconnected,
    Shutdown,
}

/// What woke a supervisor select loop
enum Wake {
    Command(Option<Command>),
    Session(Option<SessionEvent>),
    Heartbeat,
    Deadline,
}

/// Symbols subscribed on the wire within one session.
///
/// A subscribe command queued during the handshake can be polled either
/// before or after the open replay; wire writes are filtered through this
/// set so each symbol is subscribed at most once per session.
#[derive(Default)]
struct WiredSet {
    symbols: HashSet<Symbol>,
}

impl WiredSet {
    /// Record the replay sent at session open
    fn replay(&mut self, symbols: &[Symbol]) {
        self.symbols.extend(symbols.iter().cloned());
    }

    /// Keep only the symbols not yet on the wire, recording them
    fn additions(&mut self, symbols: Vec<Symbol>) -> Vec<Symbol> {
        symbols
            .into_iter()
            .filter(|symbol| self.symbols.insert(symbol.clone()))
            .collect()
    }

    /// Keep only the symbols actually on the wire, dropping them
    fn removals(&mut self, symbols: Vec<Symbol>) -> Vec<Symbol> {
        symbols
            .into_iter()
            .filter(|symbol| self.symbols.remove(symbol))
            .collect()
    }
}

pub(crate) struct Supervisor {
    config: StreamConfig,
    transport: Arc<dyn WireTransport>,
    registry: Arc<SubscriptionRegistry>,
    cache: Arc<PriceCache>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    session_tx: mpsc::Sender<SessionEvent>,
    session_rx: mpsc::Receiver<SessionEvent>,
    update_tx: broadcast::Sender<StreamEvent>,
    status_tx: watch::Sender<StreamStatus>,
    /// Identity of the current connection attempt
    generation: u64,
    /// Consecutive abnormal closes since the last healthy connection
    attempts: u32,
    /// Write half of the live connection; the supervisor is the only writer
    sink: Option<Box<dyn WireSink>>,
}

impl Supervisor {
    pub(crate) fn new(
        config: StreamConfig,
        transport: Arc<dyn WireTransport>,
        registry: Arc<SubscriptionRegistry>,
        cache: Arc<PriceCache>,
        command_rx: mpsc::UnboundedReceiver<Command>,
        update_tx: broadcast::Sender<StreamEvent>,
        status_tx: watch::Sender<StreamStatus>,
    ) -> Self {
        let (session_tx, session_rx) = mpsc::channel(SESSION_EVENT_BUFFER);
        Self {
            config,
            transport,
            registry,
            cache,
            command_rx,
            session_tx,
            session_rx,
            update_tx,
            status_tx,
            generation: 0,
            attempts: 0,
            sink: None,
        }
    }

    /// Supervisor entry point. Idles until a connect request, then drives
    /// connection cycles until shutdown or until every facade handle is gone.
    pub(crate) async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                cmd = self.command_rx.recv() => Wake::Command(cmd),
                ev = self.session_rx.recv() => Wake::Session(ev),
            };
            match wake {
                Wake::Command(Some(Command::Connect)) => match self.run_cycle().await {
                    CycleEnd::Disconnected | CycleEnd::Exhausted => {}
                    CycleEnd::Shutdown => break,
                },
                Wake::Command(Some(Command::Disconnect)) => {
                    // Clears a failed badge; otherwise already disconnected
                    if self.status_tx.borrow().state != ConnectionState::Disconnected {
                        self.set_status(ConnectionState::Disconnected, None);
                    }
                }
                Wake::Command(Some(Command::Subscribe(_)))
                | Wake::Command(Some(Command::Unsubscribe(_))) => {
                    // Nothing on the wire while idle; replay covers it on connect
                }
                Wake::Command(Some(Command::Shutdown)) | Wake::Command(None) => break,
                Wake::Session(Some(ev)) => self.discard_stale(ev),
                Wake::Session(None) | Wake::Heartbeat | Wake::Deadline => {}
            }
        }
        debug!("[Market WS] Supervisor stopped");
    }

    /// Drive connect attempts, the connected session, and reconnect waits
    /// until an explicit disconnect, retry exhaustion, or shutdown.
    async fn run_cycle(&mut self) -> CycleEnd {
        self.attempts = 0;
        loop {
            self.generation += 1;
            self.set_status(ConnectionState::Connecting, None);
            info!(
                "[Market WS] Connecting to {} (attempt {})",
                self.config.url,
                self.attempts + 1
            );
            spawn_session(
                self.generation,
                Arc::clone(&self.transport),
                self.config.url.clone(),
                self.session_tx.clone(),
            );

            let failure = match self.drive_session().await {
                SessionEnd::Failure(reason) => reason,
                SessionEnd::Disconnected => return CycleEnd::Disconnected,
                SessionEnd::Shutdown => return CycleEnd::Shutdown,
            };

            self.attempts += 1;
            if !self.config.auto_reconnect {
                error!(
                    "[Market WS] Connection lost and auto-reconnect is off: {}",
                    failure
                );
                self.set_status(ConnectionState::Failed, Some(failure));
                return CycleEnd::Exhausted;
            }
            if self.attempts >= self.config.max_reconnect_attempts {
                error!(
                    "[Market WS] Max reconnect attempts reached ({}): {}",
                    self.attempts, failure
                );
                self.set_status(ConnectionState::Failed, Some(failure));
                return CycleEnd::Exhausted;
            }
            self.set_status(ConnectionState::ReconnectWait, Some(failure));
            info!(
                "[Market WS] Reconnecting in {:?} (attempt {})",
                self.config.reconnect_delay, self.attempts
            );
            match self.wait_reconnect().await {
                WaitEnd::Retry => {}
                WaitEnd::ConnectNow => self.attempts = 0,
                WaitEnd::Disconnected => return CycleEnd::Disconnected,
                WaitEnd::Shutdown => return CycleEnd::Shutdown,
            }
        }
    }

    /// Run one session from its connect attempt to whatever ends it
    async fn drive_session(&mut self) -> SessionEnd {
        let mut heartbeat = interval(self.config.heartbeat_interval);
        let mut wired = WiredSet::default();
        loop {
            let wake = tokio::select! {
                ev = self.session_rx.recv() => Wake::Session(ev),
                cmd = self.command_rx.recv() => Wake::Command(cmd),
                _ = heartbeat.tick(), if self.sink.is_some() => Wake::Heartbeat,
            };
            match wake {
                Wake::Session(Some(ev)) => {
                    if ev.generation() != self.generation {
                        self.discard_stale(ev);
                        continue;
                    }
                    match ev {
                        SessionEvent::Opened { sink, .. } => {
                            self.sink = Some(sink);
                            self.attempts = 0;
                            heartbeat.reset();
                            self.set_status(ConnectionState::Connected, None);
                            info!("[Market WS] Connected");
                            let symbols = self.registry.subscription_set();
                            wired.replay(&symbols);
                            if !symbols.is_empty() {
                                info!("[Market WS] Replaying {} subscriptions", symbols.len());
                                if let Err(reason) =
                                    self.send_feed(&FeedCommand::Subscribe { symbols }).await
                                {
                                    self.abandon_session().await;
                                    return SessionEnd::Failure(reason);
                                }
                            }
                        }
                        SessionEvent::Frame { frame, .. } => {
                            if let Err(reason) = self.handle_frame(frame).await {
                                self.abandon_session().await;
                                return SessionEnd::Failure(reason);
                            }
                        }
                        SessionEvent::Closed { reason, .. } => {
                            let reason = reason.unwrap_or_else(|| "stream ended".to_string());
                            error!("[Market WS] Connection lost: {}", reason);
                            self.abandon_session().await;
                            return SessionEnd::Failure(reason);
                        }
                        SessionEvent::ConnectFailed { error, .. } => {
                            error!("[Market WS] Connection failed: {}", error);
                            self.supersede();
                            return SessionEnd::Failure(error);
                        }
                    }
                }
                Wake::Command(Some(Command::Subscribe(symbols))) => {
                    // Still connecting: skip, the replay on open picks these
                    // up. Connected: skip whatever the replay carried, since
                    // a queued command can be polled after the open.
                    if self.sink.is_some() {
                        let symbols = wired.additions(symbols);
                        if symbols.is_empty() {
                            continue;
                        }
                        if let Err(reason) =
                            self.send_feed(&FeedCommand::Subscribe { symbols }).await
                        {
                            self.abandon_session().await;
                            return SessionEnd::Failure(reason);
                        }
                    }
                }
                Wake::Command(Some(Command::Unsubscribe(symbols))) => {
                    if self.sink.is_some() {
                        let symbols = wired.removals(symbols);
                        if symbols.is_empty() {
                            continue;
                        }
                        if let Err(reason) =
                            self.send_feed(&FeedCommand::Unsubscribe { symbols }).await
                        {
                            self.abandon_session().await;
                            return SessionEnd::Failure(reason);
                        }
                    }
                }
                Wake::Command(Some(Command::Connect)) => {
                    debug!("[Market WS] Connect requested while already active");
                }
                Wake::Command(Some(Command::Disconnect)) => {
                    info!("[Market WS] Disconnected by request");
                    self.abandon_session().await;
                    self.attempts = 0;
                    self.set_status(ConnectionState::Disconnected, None);
                    return SessionEnd::Disconnected;
                }
                Wake::Command(Some(Command::Shutdown)) | Wake::Command(None) => {
                    self.abandon_session().await;
                    self.set_status(ConnectionState::Disconnected, None);
                    return SessionEnd::Shutdown;
                }
                Wake::Heartbeat => {
                    debug!("[Market WS] Heartbeat ping");
                    if let Err(reason) = self.send_feed(&FeedCommand::Ping).await {
                        self.abandon_session().await;
                        return SessionEnd::Failure(reason);
                    }
                }
                Wake::Session(None) => return SessionEnd::Shutdown,
                Wake::Deadline => {}
            }
        }
    }

    /// Sit out the reconnect delay. Commands arriving meanwhile are honored
    /// without shortening the wait, except a manual connect which retries at
    /// once.
    async fn wait_reconnect(&mut self) -> WaitEnd {
        let deadline = Instant::now() + self.config.reconnect_delay;
        loop {
            let wake = tokio::select! {
                _ = sleep_until(deadline) => Wake::Deadline,
                ev = self.session_rx.recv() => Wake::Session(ev),
                cmd = self.command_rx.recv() => Wake::Command(cmd),
            };
            match wake {
                Wake::Deadline => return WaitEnd::Retry,
                Wake::Command(Some(Command::Connect)) => {
                    debug!("[Market WS] Manual connect during reconnect wait");
                    return WaitEnd::ConnectNow;
                }
                Wake::Command(Some(Command::Disconnect)) => {
                    info!("[Market WS] Reconnect cancelled by disconnect");
                    self.attempts = 0;
                    self.set_status(ConnectionState::Disconnected, None);
                    return WaitEnd::Disconnected;
                }
                Wake::Command(Some(Command::Subscribe(_)))
                | Wake::Command(Some(Command::Unsubscribe(_))) => {
                    // Already recorded in the registry; replay covers it
                }
                Wake::Command(Some(Command::Shutdown)) | Wake::Command(None) => {
                    self.set_status(ConnectionState::Disconnected, None);
                    return WaitEnd::Shutdown;
                }
                Wake::Session(Some(ev)) => self.discard_stale(ev),
                Wake::Session(None) => return WaitEnd::Shutdown,
                Wake::Heartbeat => {}
            }
        }
    }

    /// Returns `Err(reason)` when the connection must be treated as lost
    async fn handle_frame(&mut self, frame: WireFrame) -> Result<(), String> {
        match frame {
            WireFrame::Text(text) => {
                self.handle_text(&text);
                Ok(())
            }
            WireFrame::Ping(data) => {
                let Some(sink) = self.sink.as_mut() else {
                    return Ok(());
                };
                sink.send_pong(data).await.map_err(|e| {
                    warn!("[Market WS] Failed to send pong: {}", e);
                    e.to_string()
                })
            }
            WireFrame::Pong => Ok(()),
        }
    }

    /// Parse and dispatch one text frame. Malformed or unknown payloads are
    /// logged and dropped without touching the session.
    fn handle_text(&self, text: &str) {
        match serde_json::from_str::<FeedMessage>(text) {
            Ok(FeedMessage::Trade(tick)) => self.apply_tick(UpdateKind::Trade, tick),
            Ok(FeedMessage::Quote(tick)) => self.apply_tick(UpdateKind::Quote, tick),
            Ok(FeedMessage::Snapshot(tick)) => self.apply_tick(UpdateKind::Snapshot, tick),
            Ok(FeedMessage::Subscribed { symbols }) => {
                info!("[Market WS] Subscription acknowledged for {:?}", symbols);
            }
            Ok(FeedMessage::Pong { .. }) => {
                debug!("[Market WS] Pong received");
            }
            Ok(FeedMessage::Status { message }) => {
                info!(
                    "[Market WS] Server status: {}",
                    message.as_deref().unwrap_or("(empty)")
                );
            }
            Ok(FeedMessage::Unknown) => {
                debug!("[Market WS] Unknown message type: {}", text);
            }
            Err(e) => {
                debug!("[Market WS] Dropping malformed message: {} ({})", e, text);
            }
        }
    }

    /// Merge one tick into the cache and broadcast the merged record
    fn apply_tick(&self, kind: UpdateKind, tick: TickPayload) {
        let symbol = Symbol::new(&tick.symbol);
        if symbol.is_empty() {
            debug!("[Market WS] Dropping tick without a usable symbol");
            return;
        }
        if !self.registry.contains(&symbol) {
            // A straggler for a symbol already unsubscribed must not
            // resurrect its evicted record
            debug!("[Market WS] Dropping tick for unsubscribed symbol {}", symbol);
            return;
        }
        let record = self.cache.apply(&symbol, kind, &tick);
        // A release can land between the check above and the write; evicting
        // again here keeps the release final
        if !self.registry.contains(&symbol) {
            self.cache.evict(std::slice::from_ref(&symbol));
            return;
        }
        let _ = self.update_tx.send(StreamEvent::Price { symbol, record });
    }

    /// Serialize and write one protocol command. `Err` carries the reason
    /// when the transport rejects the write.
    async fn send_feed(&mut self, command: &FeedCommand) -> Result<(), String> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        let json = match serde_json::to_string(command) {
            Ok(json) => json,
            Err(e) => {
                warn!("[Market WS] Failed to encode command: {}", e);
                return Ok(());
            }
        };
        sink.send_text(json).await.map_err(|e| {
            warn!("[Market WS] Write failed: {}", e);
            e.to_string()
        })
    }

    /// Close whatever sink is live and supersede the session so the reader's
    /// remaining events are discarded as stale
    async fn abandon_session(&mut self) {
        if let Some(mut sink) = self.sink.take() {
            sink.close().await;
        }
        self.supersede();
    }

    fn supersede(&mut self) {
        self.generation += 1;
    }

    /// Log and drop an event from a superseded session. A stale open still
    /// carries a live sink, which gets closed off-task.
    fn discard_stale(&self, event: SessionEvent) {
        match event {
            SessionEvent::Opened { generation, sink } => {
                debug!(
                    "[Market WS] Closing stale connection (generation {})",
                    generation
                );
                let mut sink = sink;
                tokio::spawn(async move { sink.close().await });
            }
            SessionEvent::Frame { generation, .. } => {
                debug!("[Market WS] Discarding stale frame (generation {})", generation);
            }
            SessionEvent::Closed { generation, .. } => {
                debug!("[Market WS] Stale session closed (generation {})", generation);
            }
            SessionEvent::ConnectFailed { generation, error } => {
                debug!(
                    "[Market WS] Stale connect failure (generation {}): {}",
                    generation, error
                );
            }
        }
    }

    fn set_status(&self, state: ConnectionState, error: Option<String>) {
        let status = StreamStatus { state, error };
        let _ = self.status_tx.send(status.clone());
        let _ = self.update_tx.send(StreamEvent::Status(status));
    }
}

/// Open a connection and pump its frames back to the supervisor, every event
/// tagged with this attempt's generation
fn spawn_session(
    generation: u64,
    transport: Arc<dyn WireTransport>,
    url: String,
    events: mpsc::Sender<SessionEvent>,
) {
    tokio::spawn(async move {
        let (sink, mut stream) = match transport.connect(&url).await {
            Ok(pair) => pair,
            Err(e) => {
                let _ = events
                    .send(SessionEvent::ConnectFailed {
                        generation,
                        error: e.to_string(),
                    })
                    .await;
                return;
            }
        };
        if events
            .send(SessionEvent::Opened { generation, sink })
            .await
            .is_err()
        {
            return;
        }
        loop {
            match stream.next_frame().await {
                Some(Ok(frame)) => {
                    if events
                        .send(SessionEvent::Frame { generation, frame })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Some(Err(e)) => {
                    let _ = events
                        .send(SessionEvent::Closed {
                            generation,
                            reason: Some(e.to_string()),
                        })
                        .await;
                    return;
                }
                None => {
                    let _ = events
                        .send(SessionEvent::Closed {
                            generation,
                            reason: None,
                        })
                        .await;
                    return;
                }
            }
        }
    });
}
