//! Ticker symbol identifier

use serde::{Deserialize, Serialize};

/// An uppercase ticker identifier, the key for subscriptions and cached prices.
///
/// Construction normalizes the raw text (trimmed, ASCII-uppercased) so that
/// `"aapl"`, `" AAPL "` and `"AAPL"` all name the same symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol from raw text, normalizing it
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_uppercase())
    }

    /// The normalized ticker text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for symbols that normalized down to nothing
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(raw: &str) -> Self {
        Symbol::new(raw)
    }
}

impl From<String> for Symbol {
    fn from(raw: String) -> Self {
        Symbol::new(raw)
    }
}
