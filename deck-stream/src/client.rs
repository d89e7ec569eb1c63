//! Consumer facade for the market data stream
//!
//! `MarketStream` owns the whole machine: the subscription registry, the
//! price cache, and the supervisor task driving the connection. UI surfaces
//! each take a [`StreamHandle`] and never touch connection management.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::debug;

use deck_core::{PriceRecord, StreamStatus, Symbol};

use crate::cache::PriceCache;
use crate::config::StreamConfig;
use crate::connection::{Command, StreamEvent, Supervisor};
use crate::subscriptions::{ConsumerId, SubscriptionRegistry};
use crate::transport::{WireTransport, WsTransport};

struct StreamShared {
    registry: Arc<SubscriptionRegistry>,
    cache: Arc<PriceCache>,
    command_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<StreamStatus>,
    update_tx: broadcast::Sender<StreamEvent>,
}

/// The market data streaming service.
///
/// Construct one per process, connect it, and hand out [`StreamHandle`]s to
/// whichever surfaces need prices. All methods are synchronous and
/// non-blocking; connection work happens on the supervisor task.
pub struct MarketStream {
    shared: Arc<StreamShared>,
}

impl MarketStream {
    /// Spawn the service against the real WebSocket transport
    pub fn new(config: StreamConfig) -> Self {
        Self::with_transport(config, Arc::new(WsTransport))
    }

    pub(crate) fn with_transport(config: StreamConfig, transport: Arc<dyn WireTransport>) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let cache = Arc::new(PriceCache::new());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(StreamStatus::default());
        let (update_tx, _) = broadcast::channel(config.update_buffer);

        let supervisor = Supervisor::new(
            config,
            transport,
            Arc::clone(&registry),
            Arc::clone(&cache),
            command_rx,
            update_tx.clone(),
            status_tx,
        );
        tokio::spawn(supervisor.run());

        Self {
            shared: Arc::new(StreamShared {
                registry,
                cache,
                command_tx,
                status_rx,
                update_tx,
            }),
        }
    }

    /// Open the feed connection. No-op while already connecting or connected.
    pub fn connect(&self) {
        let _ = self.shared.command_tx.send(Command::Connect);
    }

    /// Close the connection and cancel any pending reconnect
    pub fn disconnect(&self) {
        let _ = self.shared.command_tx.send(Command::Disconnect);
    }

    /// Tear the service down; the supervisor task exits
    pub fn shutdown(&self) {
        let _ = self.shared.command_tx.send(Command::Shutdown);
    }

    /// Allocate an identity for one consumer of the stream
    pub fn handle(&self) -> StreamHandle {
        let consumer = self.shared.registry.register();
        debug!("Allocated {}", consumer);
        StreamHandle {
            shared: Arc::clone(&self.shared),
            consumer,
        }
    }

    /// Current connection status
    pub fn status(&self) -> StreamStatus {
        self.shared.status_rx.borrow().clone()
    }

    /// Watch channel following every status change
    pub fn status_watch(&self) -> watch::Receiver<StreamStatus> {
        self.shared.status_rx.clone()
    }

    /// Subscribe to the fan-out of price and status updates
    pub fn updates(&self) -> broadcast::Receiver<StreamEvent> {
        self.shared.update_tx.subscribe()
    }

    /// Latest cached record for the symbol
    pub fn get(&self, symbol: &str) -> Option<PriceRecord> {
        self.shared.cache.get(&Symbol::new(symbol))
    }

    /// Point-in-time copy of the whole cache
    pub fn snapshot(&self) -> HashMap<Symbol, PriceRecord> {
        self.shared.cache.snapshot()
    }
}

impl fmt::Debug for MarketStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarketStream")
            .field("state", &self.shared.status_rx.borrow().state)
            .field("consumers", &self.shared.registry.total_consumers())
            .field("cached_symbols", &self.shared.cache.len())
            .finish()
    }
}

/// One consumer's interface to the shared stream.
///
/// Handles are cheap. Dropping one releases all of its registrations, as if
/// it had unsubscribed from everything.
pub struct StreamHandle {
    shared: Arc<StreamShared>,
    consumer: ConsumerId,
}

impl StreamHandle {
    /// Register interest in the given symbols. Symbols new to the shared
    /// subscription set are requested from the server.
    pub fn subscribe(&self, symbols: &[&str]) {
        let added = self.shared.registry.subscribe(self.consumer, symbols);
        if !added.is_empty() {
            let _ = self.shared.command_tx.send(Command::Subscribe(added));
        }
    }

    /// Drop interest in the given symbols. Symbols no other consumer wants
    /// are unsubscribed from the server and evicted from the cache.
    pub fn unsubscribe(&self, symbols: &[&str]) {
        let released = self.shared.registry.unsubscribe(self.consumer, symbols);
        self.release(released);
    }

    /// Latest cached record for the symbol
    pub fn get(&self, symbol: &str) -> Option<PriceRecord> {
        self.shared.cache.get(&Symbol::new(symbol))
    }

    /// Point-in-time copy of the whole cache
    pub fn snapshot(&self) -> HashMap<Symbol, PriceRecord> {
        self.shared.cache.snapshot()
    }

    /// Current connection status
    pub fn status(&self) -> StreamStatus {
        self.shared.status_rx.borrow().clone()
    }

    /// Subscribe to the fan-out of price and status updates
    pub fn updates(&self) -> broadcast::Receiver<StreamEvent> {
        self.shared.update_tx.subscribe()
    }

    pub fn id(&self) -> ConsumerId {
        self.consumer
    }

    fn release(&self, released: Vec<Symbol>) {
        if released.is_empty() {
            return;
        }
        self.shared.cache.evict(&released);
        let _ = self.shared.command_tx.send(Command::Unsubscribe(released));
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        let released = self.shared.registry.remove_consumer(self.consumer);
        self.release(released);
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("consumer", &self.consumer)
            .finish()
    }
}
