//! One-shot scan progress stream
//!
//! A simpler sibling of the market stream for screener scans: one scan
//! produces one short-lived push stream of progress events, delivered as
//! `data:` lines over a streaming HTTP response. Exactly one consumer, no
//! multiplexing, no reconnects. The stream ends on a terminal complete or
//! error event, or when the caller aborts.

use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use deck_core::{DeckError, DeckResult};

/// Capacity of the progress event channel
const PROGRESS_BUFFER: usize = 64;

/// Connect timeout for the scan endpoint; the stream itself is open-ended
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Byte chunks of a progress response body
type ScanBody = BoxStream<'static, DeckResult<Bytes>>;

/// Wire shape of one scan progress message
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ProgressMessage {
    Progress {
        completed: u32,
        total: u32,
        #[serde(default)]
        message: Option<String>,
    },
    Complete {
        #[serde(default)]
        message: Option<String>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Progress events delivered to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The scan advanced
    Progress {
        completed: u32,
        total: u32,
        message: Option<String>,
    },
    /// Terminal: the scan finished
    Complete,
    /// Terminal: the scan failed server-side
    Error(String),
}

/// Abort handle for a running progress stream.
///
/// Aborting, or dropping the handle, stops the stream without a terminal
/// event.
pub struct ProgressHandle {
    abort_tx: watch::Sender<bool>,
}

impl ProgressHandle {
    pub fn abort(&self) {
        let _ = self.abort_tx.send(true);
    }
}

/// Client for one-shot scan progress streams
pub struct ScanProgressClient {
    client: reqwest::Client,
}

impl ScanProgressClient {
    pub fn new() -> DeckResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| DeckError::api(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Start streaming progress events from a scan endpoint. Returns once the
    /// response headers arrive; events are pumped on a background task.
    pub async fn stream(
        &self,
        url: &str,
    ) -> DeckResult<(ProgressHandle, mpsc::Receiver<ProgressEvent>)> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DeckError::network(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DeckError::api(format!(
                "Scan endpoint returned {}",
                response.status()
            )));
        }
        info!("[Scan Progress] Streaming from {}", url);

        let body = response
            .bytes_stream()
            .map_err(|e| DeckError::network(e.to_string()))
            .boxed();
        Ok(spawn_pump(body))
    }
}

/// Wire the event channel and abort handle around a pump task for the body
fn spawn_pump(body: ScanBody) -> (ProgressHandle, mpsc::Receiver<ProgressEvent>) {
    let (event_tx, event_rx) = mpsc::channel(PROGRESS_BUFFER);
    let (abort_tx, abort_rx) = watch::channel(false);
    tokio::spawn(pump_events(body, event_tx, abort_rx));
    (ProgressHandle { abort_tx }, event_rx)
}

async fn pump_events(
    mut body: ScanBody,
    events: mpsc::Sender<ProgressEvent>,
    mut abort: watch::Receiver<bool>,
) {
    let mut buffer = String::new();
    loop {
        let chunk = tokio::select! {
            chunk = body.next() => chunk,
            _ = abort.changed() => {
                info!("[Scan Progress] Stream aborted");
                return;
            }
        };
        let chunk = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                warn!("[Scan Progress] Stream error: {}", e);
                let _ = events.send(ProgressEvent::Error(e.to_string())).await;
                return;
            }
            None => {
                debug!("[Scan Progress] Stream ended without a terminal event");
                return;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));
        while let Some(line_end) = buffer.find('\n') {
            let line: String = buffer.drain(..=line_end).collect();
            match parse_data_line(line.trim_end()) {
                Some(ProgressMessage::Progress {
                    completed,
                    total,
                    message,
                }) => {
                    let event = ProgressEvent::Progress {
                        completed,
                        total,
                        message,
                    };
                    if events.send(event).await.is_err() {
                        // Receiver gone, nobody is watching this scan
                        return;
                    }
                }
                Some(ProgressMessage::Complete { .. }) => {
                    info!("[Scan Progress] Scan complete");
                    let _ = events.send(ProgressEvent::Complete).await;
                    return;
                }
                Some(ProgressMessage::Error { message }) => {
                    let reason = message.unwrap_or_else(|| "scan failed".to_string());
                    warn!("[Scan Progress] Scan failed: {}", reason);
                    let _ = events.send(ProgressEvent::Error(reason)).await;
                    return;
                }
                Some(ProgressMessage::Unknown) | None => {}
            }
        }
    }
}

/// Parse one line of the stream; returns `None` for blanks, comments, and
/// malformed payloads.
fn parse_data_line(line: &str) -> Option<ProgressMessage> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str(payload) {
        Ok(message) => Some(message),
        Err(e) => {
            debug!("[Scan Progress] Dropping malformed event: {} ({})", e, payload);
            None
        }
    }
}
