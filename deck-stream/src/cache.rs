//! Latest-known price facts per symbol

use std::collections::HashMap;

use dashmap::DashMap;
use tracing::debug;

use deck_core::{PriceRecord, Symbol, TickPayload, UpdateKind};

/// Concurrent map of symbol to the latest merged price record.
///
/// Inbound handling merges ticks into it; consumers read clones. A record
/// exists from the first tick for its symbol until the symbol leaves the
/// subscription set.
pub struct PriceCache {
    entries: DashMap<Symbol, PriceRecord>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Merge a tick into the symbol's record, creating it on first contact.
    /// Returns the merged record.
    pub fn apply(&self, symbol: &Symbol, kind: UpdateKind, tick: &TickPayload) -> PriceRecord {
        let mut entry = self
            .entries
            .entry(symbol.clone())
            .or_insert_with(|| PriceRecord::new(kind));
        entry.apply(kind, tick);
        entry.value().clone()
    }

    /// Latest record for the symbol, if any tick has arrived
    pub fn get(&self, symbol: &Symbol) -> Option<PriceRecord> {
        self.entries.get(symbol).map(|entry| entry.value().clone())
    }

    /// Point-in-time copy of every cached record
    pub fn snapshot(&self) -> HashMap<Symbol, PriceRecord> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Drop the records for symbols that left the subscription set
    pub fn evict(&self, symbols: &[Symbol]) {
        for symbol in symbols {
            if self.entries.remove(symbol).is_some() {
                debug!("Evicted cached prices for {}", symbol);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new()
    }
}
