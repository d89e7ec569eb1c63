//! Market data feed protocol types
//!
//! These types define the wire contract with the push-update server. The
//! protocol is consumed, not defined, here: outbound control messages are
//! tagged by an `action` field, inbound messages by a `type` field.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Symbol;

// ============================================================================
// Client -> Server Messages
// ============================================================================

/// Control messages sent to the feed server
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FeedCommand {
    /// Subscribe to live updates for a set of symbols
    Subscribe { symbols: Vec<Symbol> },
    /// Unsubscribe from a set of symbols
    Unsubscribe { symbols: Vec<Symbol> },
    /// Keep-alive ping
    Ping,
}

// ============================================================================
// Server -> Client Messages
// ============================================================================

/// Price fields carried by a trade, quote, or snapshot message.
///
/// Every field except the symbol is optional: a message updates only the
/// fields it carries.
#[derive(Debug, Clone, Deserialize)]
pub struct TickPayload {
    /// Raw symbol text as sent by the server
    pub symbol: String,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub ask: Option<Decimal>,
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Messages pushed by the feed server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// An executed trade
    Trade(TickPayload),
    /// A bid/ask quote change
    Quote(TickPayload),
    /// Full price snapshot for a symbol
    Snapshot(TickPayload),
    /// Subscription acknowledgement, informational only
    Subscribed {
        #[serde(default)]
        symbols: Vec<String>,
    },
    /// Heartbeat reply, informational only
    Pong {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// Server-side status notice, informational only
    Status {
        #[serde(default)]
        message: Option<String>,
    },
    /// Any message type this client does not understand
    #[serde(other)]
    Unknown,
}

// ============================================================================
// Connection Status
// ============================================================================

/// State of the logical feed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and none pending
    Disconnected,
    /// Connection attempt in flight
    Connecting,
    /// Connected and receiving data
    Connected,
    /// Abnormal close observed, next attempt scheduled
    ReconnectWait,
    /// Retries exhausted, not retrying until an explicit connect
    Failed,
}

/// Connection status surfaced to consumers: current state plus the most
/// recent transport error while one is relevant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStatus {
    pub state: ConnectionState,
    pub error: Option<String>,
}

impl Default for StreamStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_subscribe_command_shape() {
        let cmd = FeedCommand::Subscribe {
            symbols: vec![Symbol::new("AAPL"), Symbol::new("TSLA")],
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["action"], "subscribe");
        assert_eq!(json["symbols"][0], "AAPL");
        assert_eq!(json["symbols"][1], "TSLA");
    }

    #[test]
    fn test_ping_command_shape() {
        let json = serde_json::to_string(&FeedCommand::Ping).unwrap();
        assert_eq!(json, r#"{"action":"ping"}"#);
    }

    #[test]
    fn test_parse_trade_with_partial_fields() {
        let msg: FeedMessage =
            serde_json::from_str(r#"{"type":"trade","symbol":"AAPL","price":"189.62","size":"100"}"#)
                .unwrap();
        match msg {
            FeedMessage::Trade(tick) => {
                assert_eq!(tick.symbol, "AAPL");
                assert_eq!(tick.price, Some(dec!(189.62)));
                assert_eq!(tick.size, Some(dec!(100)));
                assert_eq!(tick.bid, None);
                assert_eq!(tick.ask, None);
            }
            other => panic!("expected trade, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_quote_with_timestamp() {
        let msg: FeedMessage = serde_json::from_str(
            r#"{"type":"quote","symbol":"MSFT","bid":"420.10","ask":"420.15","timestamp":"2025-06-02T14:30:00Z"}"#,
        )
        .unwrap();
        match msg {
            FeedMessage::Quote(tick) => {
                assert_eq!(tick.bid, Some(dec!(420.10)));
                assert_eq!(tick.ask, Some(dec!(420.15)));
                assert!(tick.timestamp.is_some());
            }
            other => panic!("expected quote, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_informational_messages() {
        let msg: FeedMessage =
            serde_json::from_str(r#"{"type":"subscribed","symbols":["AAPL"]}"#).unwrap();
        assert!(matches!(msg, FeedMessage::Subscribed { symbols } if symbols == ["AAPL"]));

        let msg: FeedMessage = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert!(matches!(msg, FeedMessage::Pong { timestamp: None }));

        let msg: FeedMessage =
            serde_json::from_str(r#"{"type":"status","message":"rolling restart"}"#).unwrap();
        assert!(matches!(msg, FeedMessage::Status { message: Some(m) } if m == "rolling restart"));
    }

    #[test]
    fn test_unrecognized_type_falls_back_to_unknown() {
        let msg: FeedMessage =
            serde_json::from_str(r#"{"type":"halt_notice","symbol":"XYZ"}"#).unwrap();
        assert!(matches!(msg, FeedMessage::Unknown));
    }

    #[test]
    fn test_extra_fields_are_tolerated() {
        let msg: FeedMessage = serde_json::from_str(
            r#"{"type":"trade","symbol":"SPY","price":"500.01","venue":"ARCA","seq":991}"#,
        )
        .unwrap();
        assert!(matches!(msg, FeedMessage::Trade(_)));
    }

    #[test]
    fn test_garbage_payload_is_an_error() {
        assert!(serde_json::from_str::<FeedMessage>("not json at all").is_err());
        assert!(serde_json::from_str::<FeedMessage>(r#"{"no_type_tag":true}"#).is_err());
        // A tick without a symbol is malformed, not merely sparse
        assert!(serde_json::from_str::<FeedMessage>(r#"{"type":"trade","price":"1.0"}"#).is_err());
    }
}
