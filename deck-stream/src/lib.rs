//! Real-time market data streaming client for the QuoteDeck dashboard
//!
//! One long-lived, self-healing connection is shared by every surface of the
//! dashboard. Consumers subscribe to overlapping symbol sets through cheap
//! handles, the client multiplexes those into the minimal server-facing
//! subscription set, and a merged price cache is the single source of truth
//! they read back. A separate one-shot client streams screener scan progress.

pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
pub mod progress;
pub mod subscriptions;
pub mod transport;

pub use cache::PriceCache;
pub use client::{MarketStream, StreamHandle};
pub use config::StreamConfig;
pub use connection::StreamEvent;
pub use progress::{ProgressEvent, ProgressHandle, ScanProgressClient};
pub use subscriptions::{ConsumerId, SubscriptionRegistry};
pub use transport::{WireFrame, WireSink, WireStream, WireTransport, WsTransport};
