//! Consumer registrations and the shared subscription set
//!
//! Several independent consumers subscribe to overlapping symbol sets. The
//! registry keeps the union the server should know about and reports, for
//! every call, which symbols actually entered or left that union, so the
//! connection layer only sends deltas.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use deck_core::Symbol;

/// Unique identifier for one consumer of the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(pub u64);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

#[derive(Default)]
struct RegistryInner {
    /// consumer -> symbols it asked for
    consumers: HashMap<ConsumerId, HashSet<Symbol>>,
    /// symbol -> consumers that want it
    interests: HashMap<Symbol, HashSet<ConsumerId>>,
}

/// Tracks which consumer wants which symbols.
///
/// Both maps live under one lock so the union delta reported by a call is
/// exact even when consumers subscribe concurrently.
pub struct SubscriptionRegistry {
    next_consumer_id: AtomicU64,
    inner: RwLock<RegistryInner>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            next_consumer_id: AtomicU64::new(1),
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Allocate an identity for a new consumer
    pub fn register(&self) -> ConsumerId {
        ConsumerId(self.next_consumer_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Record the consumer's interest in the given symbols. Returns the
    /// symbols that are new to the union; empty and duplicate entries are
    /// dropped after normalization.
    pub fn subscribe(&self, consumer: ConsumerId, symbols: &[&str]) -> Vec<Symbol> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let mut added = Vec::new();
        for raw in symbols {
            let symbol = Symbol::new(raw);
            if symbol.is_empty() {
                continue;
            }
            if !inner
                .consumers
                .entry(consumer)
                .or_default()
                .insert(symbol.clone())
            {
                // This consumer already holds it
                continue;
            }
            let interests = inner.interests.entry(symbol.clone()).or_default();
            if interests.is_empty() {
                added.push(symbol);
            }
            interests.insert(consumer);
        }
        if !added.is_empty() {
            debug!("{} added {:?} to the subscription set", consumer, added);
        }
        added
    }

    /// Drop the consumer's interest in the given symbols. Returns the symbols
    /// no other consumer still wants.
    pub fn unsubscribe(&self, consumer: ConsumerId, symbols: &[&str]) -> Vec<Symbol> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let mut released = Vec::new();
        for raw in symbols {
            let symbol = Symbol::new(raw);
            let held = inner
                .consumers
                .get_mut(&consumer)
                .map(|set| set.remove(&symbol))
                .unwrap_or(false);
            if !held {
                continue;
            }
            if let Some(interests) = inner.interests.get_mut(&symbol) {
                interests.remove(&consumer);
                if interests.is_empty() {
                    inner.interests.remove(&symbol);
                    released.push(symbol);
                }
            }
        }
        if !released.is_empty() {
            debug!("{} released {:?} from the subscription set", consumer, released);
        }
        released
    }

    /// Drop every registration the consumer holds. Returns the symbols no
    /// other consumer still wants.
    pub fn remove_consumer(&self, consumer: ConsumerId) -> Vec<Symbol> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let mut released = Vec::new();
        if let Some(symbols) = inner.consumers.remove(&consumer) {
            for symbol in symbols {
                if let Some(interests) = inner.interests.get_mut(&symbol) {
                    interests.remove(&consumer);
                    if interests.is_empty() {
                        inner.interests.remove(&symbol);
                        released.push(symbol);
                    }
                }
            }
        }
        debug!("{} removed, {} symbols released", consumer, released.len());
        released
    }

    /// The union of all registrations, sorted for stable wire messages
    pub fn subscription_set(&self) -> Vec<Symbol> {
        let inner = self.inner.read();
        let mut symbols: Vec<Symbol> = inner.interests.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Whether any consumer wants the symbol
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.inner.read().interests.contains_key(symbol)
    }

    /// Number of consumers interested in the symbol
    pub fn symbol_refcount(&self, symbol: &Symbol) -> usize {
        self.inner
            .read()
            .interests
            .get(symbol)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    /// Number of consumers with at least one registration
    pub fn total_consumers(&self) -> usize {
        self.inner.read().consumers.len()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SubscriptionRegistry")
            .field("consumers", &inner.consumers.len())
            .field("symbols", &inner.interests.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_is_idempotent_per_consumer() {
        let registry = SubscriptionRegistry::new();
        let consumer = registry.register();

        let added = registry.subscribe(consumer, &["AAPL"]);
        assert_eq!(added, vec![Symbol::new("AAPL")]);

        // Same consumer, same symbol: nothing new enters the union
        let added = registry.subscribe(consumer, &["AAPL"]);
        assert!(added.is_empty());
        assert_eq!(registry.symbol_refcount(&Symbol::new("AAPL")), 1);
    }

    #[test]
    fn test_symbol_released_only_when_last_consumer_leaves() {
        let registry = SubscriptionRegistry::new();
        let a = registry.register();
        let b = registry.register();

        assert_eq!(registry.subscribe(a, &["AAPL"]).len(), 1);
        // Second consumer adds nothing to the union
        assert!(registry.subscribe(b, &["AAPL"]).is_empty());
        assert_eq!(registry.symbol_refcount(&Symbol::new("AAPL")), 2);

        // First leave keeps the symbol alive
        assert!(registry.unsubscribe(a, &["AAPL"]).is_empty());
        assert!(registry.contains(&Symbol::new("AAPL")));

        // Last leave releases it
        let released = registry.unsubscribe(b, &["AAPL"]);
        assert_eq!(released, vec![Symbol::new("AAPL")]);
        assert!(!registry.contains(&Symbol::new("AAPL")));
    }

    #[test]
    fn test_unsubscribe_ignores_symbols_not_held() {
        let registry = SubscriptionRegistry::new();
        let a = registry.register();
        let b = registry.register();

        registry.subscribe(a, &["AAPL"]);
        // b never subscribed, so its unsubscribe must not release anything
        assert!(registry.unsubscribe(b, &["AAPL"]).is_empty());
        assert!(registry.contains(&Symbol::new("AAPL")));
    }

    #[test]
    fn test_remove_consumer_releases_exclusive_symbols() {
        let registry = SubscriptionRegistry::new();
        let a = registry.register();
        let b = registry.register();

        registry.subscribe(a, &["AAPL", "TSLA"]);
        registry.subscribe(b, &["AAPL"]);

        let mut released = registry.remove_consumer(a);
        released.sort();
        // AAPL survives through b, TSLA goes
        assert_eq!(released, vec![Symbol::new("TSLA")]);
        assert!(registry.contains(&Symbol::new("AAPL")));
        assert_eq!(registry.total_consumers(), 1);
    }

    #[test]
    fn test_symbols_normalized_and_blanks_dropped() {
        let registry = SubscriptionRegistry::new();
        let consumer = registry.register();

        let added = registry.subscribe(consumer, &["aapl", " AAPL ", "", "  "]);
        assert_eq!(added, vec![Symbol::new("AAPL")]);
        assert_eq!(registry.subscription_set(), vec![Symbol::new("AAPL")]);
    }

    #[test]
    fn test_subscription_set_is_sorted_union() {
        let registry = SubscriptionRegistry::new();
        let a = registry.register();
        let b = registry.register();

        registry.subscribe(a, &["TSLA", "AAPL"]);
        registry.subscribe(b, &["MSFT", "AAPL"]);

        let set = registry.subscription_set();
        assert_eq!(
            set,
            vec![Symbol::new("AAPL"), Symbol::new("MSFT"), Symbol::new("TSLA")]
        );
    }
}
