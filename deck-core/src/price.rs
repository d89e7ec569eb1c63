//! Cached price facts per symbol

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::feed::TickPayload;

/// Which kind of feed message last touched a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// An executed trade
    Trade,
    /// A bid/ask quote change
    Quote,
    /// A full snapshot pushed by the server
    Snapshot,
}

/// Latest known price facts for one symbol.
///
/// Every field a message carries overwrites the stored value; fields the
/// message omits keep whatever was known before. A record therefore fills
/// in gradually as trades, quotes, and snapshots arrive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    /// Last trade price
    pub price: Option<Decimal>,
    /// Best bid
    pub bid: Option<Decimal>,
    /// Best ask
    pub ask: Option<Decimal>,
    /// Size of the last trade or quote
    pub size: Option<Decimal>,
    /// Kind of the message that produced the most recent update
    pub kind: UpdateKind,
    /// Server timestamp of the most recent update that carried one
    pub timestamp: Option<DateTime<Utc>>,
}

impl PriceRecord {
    /// Create an empty record tagged with the kind of its first message
    pub fn new(kind: UpdateKind) -> Self {
        Self {
            price: None,
            bid: None,
            ask: None,
            size: None,
            kind,
            timestamp: None,
        }
    }

    /// Merge the fields present in a tick into this record
    pub fn apply(&mut self, kind: UpdateKind, tick: &TickPayload) {
        if tick.price.is_some() {
            self.price = tick.price;
        }
        if tick.bid.is_some() {
            self.bid = tick.bid;
        }
        if tick.ask.is_some() {
            self.ask = tick.ask;
        }
        if tick.size.is_some() {
            self.size = tick.size;
        }
        if tick.timestamp.is_some() {
            self.timestamp = tick.timestamp;
        }
        self.kind = kind;
    }
}
