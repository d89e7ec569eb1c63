//! Core types for the QuoteDeck trading dashboard
//!
//! This crate defines the shared data structures used across the dashboard,
//! including symbols, price records, and the market data feed protocol.

pub mod error;
pub mod feed;
pub mod price;
pub mod symbol;

pub use error::{DeckError, DeckResult};
pub use feed::{ConnectionState, FeedCommand, FeedMessage, StreamStatus, TickPayload};
pub use price::{PriceRecord, UpdateKind};
pub use symbol::Symbol;
