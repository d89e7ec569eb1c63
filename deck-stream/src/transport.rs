//! Transport seam for the feed connection
//!
//! The connection controller drives a [`WireTransport`] rather than a socket
//! type directly, so the reconnect and replay machinery can be exercised
//! against a scripted in-process transport in tests.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use deck_core::{DeckError, DeckResult};

/// A frame read from the wire, reduced to what the controller handles
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    /// Text payload; every protocol message is JSON text
    Text(String),
    /// Transport-level ping that needs a pong reply
    Ping(Vec<u8>),
    /// Transport-level pong
    Pong,
}

/// Write half of an open connection
#[async_trait]
pub trait WireSink: Send {
    async fn send_text(&mut self, payload: String) -> DeckResult<()>;
    async fn send_pong(&mut self, payload: Vec<u8>) -> DeckResult<()>;
    /// Best-effort close; errors on an already dead socket are ignored
    async fn close(&mut self);
}

/// Read half of an open connection
#[async_trait]
pub trait WireStream: Send {
    /// Next frame, or `None` once the connection is gone. A server-initiated
    /// close or a read error surfaces as `Some(Err(..))` with the reason.
    async fn next_frame(&mut self) -> Option<DeckResult<WireFrame>>;
}

/// Opens connections to the feed endpoint
#[async_trait]
pub trait WireTransport: Send + Sync {
    async fn connect(&self, url: &str) -> DeckResult<(Box<dyn WireSink>, Box<dyn WireStream>)>;
}

// ============================================================================
// WebSocket transport
// ============================================================================

type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport backed by tokio-tungstenite
pub struct WsTransport;

#[async_trait]
impl WireTransport for WsTransport {
    async fn connect(&self, url: &str) -> DeckResult<(Box<dyn WireSink>, Box<dyn WireStream>)> {
        let url = Url::parse(url)
            .map_err(|e| DeckError::config(format!("Invalid feed URL '{}': {}", url, e)))?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| DeckError::network(e.to_string()))?;
        let (write, read) = ws_stream.split();
        Ok((Box::new(WsSink { write }), Box::new(WsSource { read })))
    }
}

struct WsSink {
    write: SplitSink<WsConnection, Message>,
}

#[async_trait]
impl WireSink for WsSink {
    async fn send_text(&mut self, payload: String) -> DeckResult<()> {
        self.write
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| DeckError::network(e.to_string()))
    }

    async fn send_pong(&mut self, payload: Vec<u8>) -> DeckResult<()> {
        self.write
            .send(Message::Pong(payload.into()))
            .await
            .map_err(|e| DeckError::network(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.write.send(Message::Close(None)).await;
    }
}

struct WsSource {
    read: SplitStream<WsConnection>,
}

#[async_trait]
impl WireStream for WsSource {
    async fn next_frame(&mut self) -> Option<DeckResult<WireFrame>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(WireFrame::Text(text.to_string()))),
                Ok(Message::Ping(data)) => return Some(Ok(WireFrame::Ping(data.to_vec()))),
                Ok(Message::Pong(_)) => return Some(Ok(WireFrame::Pong)),
                Ok(Message::Close(frame)) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed by server".to_string());
                    return Some(Err(DeckError::network(reason)));
                }
                // Binary and raw frames are not part of the protocol
                Ok(_) => continue,
                Err(e) => return Some(Err(DeckError::network(e.to_string()))),
            }
        }
    }
}

// ============================================================================
// Scripted transport for tests
// ============================================================================

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::sync::{mpsc, oneshot};

    use super::*;

    /// What the next connect attempt should do
    pub enum ConnectScript {
        Accept,
        Fail(String),
        /// Park until the gate fires (or drops), then accept
        HoldUntil(oneshot::Receiver<()>),
    }

    /// Test-side handles for one accepted connection
    pub struct MockLink {
        /// Frames the client wrote
        pub sent: mpsc::UnboundedReceiver<String>,
        /// Inject server frames; drop to simulate an abnormal close
        pub inbound: mpsc::UnboundedSender<DeckResult<WireFrame>>,
    }

    /// In-process transport driven by a script of connect outcomes.
    /// Unscripted attempts are accepted.
    pub struct MockTransport {
        scripts: Mutex<VecDeque<ConnectScript>>,
        links: mpsc::UnboundedSender<MockLink>,
        connect_attempts: AtomicU32,
    }

    impl MockTransport {
        pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockLink>) {
            let (links, links_rx) = mpsc::unbounded_channel();
            let transport = Arc::new(Self {
                scripts: Mutex::new(VecDeque::new()),
                links,
                connect_attempts: AtomicU32::new(0),
            });
            (transport, links_rx)
        }

        pub fn script(&self, script: ConnectScript) {
            self.scripts.lock().push_back(script);
        }

        pub fn attempts(&self) -> u32 {
            self.connect_attempts.load(Ordering::SeqCst)
        }

        fn accept(&self) -> DeckResult<(Box<dyn WireSink>, Box<dyn WireStream>)> {
            let (sent_tx, sent_rx) = mpsc::unbounded_channel();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let _ = self.links.send(MockLink {
                sent: sent_rx,
                inbound: inbound_tx,
            });
            Ok((
                Box::new(MockSink {
                    sent: sent_tx,
                    closed: false,
                }),
                Box::new(MockSource { inbound: inbound_rx }),
            ))
        }
    }

    #[async_trait]
    impl WireTransport for MockTransport {
        async fn connect(&self, _url: &str) -> DeckResult<(Box<dyn WireSink>, Box<dyn WireStream>)> {
            self.connect_attempts.fetch_add(1, Ordering::SeqCst);
            let script = self
                .scripts
                .lock()
                .pop_front()
                .unwrap_or(ConnectScript::Accept);
            match script {
                ConnectScript::Accept => self.accept(),
                ConnectScript::Fail(reason) => Err(DeckError::network(reason)),
                ConnectScript::HoldUntil(gate) => {
                    let _ = gate.await;
                    self.accept()
                }
            }
        }
    }

    struct MockSink {
        sent: mpsc::UnboundedSender<String>,
        closed: bool,
    }

    #[async_trait]
    impl WireSink for MockSink {
        async fn send_text(&mut self, payload: String) -> DeckResult<()> {
            if self.closed {
                return Err(DeckError::network("sink closed"));
            }
            self.sent
                .send(payload)
                .map_err(|_| DeckError::network("peer gone"))
        }

        async fn send_pong(&mut self, _payload: Vec<u8>) -> DeckResult<()> {
            if self.closed {
                return Err(DeckError::network("sink closed"));
            }
            Ok(())
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }

    struct MockSource {
        inbound: mpsc::UnboundedReceiver<DeckResult<WireFrame>>,
    }

    #[async_trait]
    impl WireStream for MockSource {
        async fn next_frame(&mut self) -> Option<DeckResult<WireFrame>> {
            self.inbound.recv().await
        }
    }
}
