//! Live price watcher
//!
//! Connects to the feed configured in MARKET_WS_URL, subscribes to the
//! symbols given on the command line, and prints every update until Ctrl-C.
//!
//! Usage: cargo run --example watch -- AAPL TSLA MSFT

use deck_stream::{MarketStream, StreamConfig, StreamEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,deck_stream=debug")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let symbols: Vec<&str> = if args.is_empty() {
        vec!["AAPL", "MSFT", "TSLA"]
    } else {
        args.iter().map(String::as_str).collect()
    };

    let config = StreamConfig::from_env().unwrap_or_default();
    info!("Watching {:?} on {}", symbols, config.url);

    let stream = MarketStream::new(config);
    let prices = stream.handle();
    let mut updates = stream.updates();

    stream.connect();
    prices.subscribe(&symbols);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => match update {
                Ok(StreamEvent::Price { symbol, record }) => {
                    info!(
                        "{}: last={:?} bid={:?} ask={:?} ({:?})",
                        symbol, record.price, record.bid, record.ask, record.kind
                    );
                }
                Ok(StreamEvent::Status(status)) => {
                    info!("Connection: {:?}", status.state);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Dropped {} updates, falling behind", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("Shutting down");
    stream.shutdown();
    Ok(())
}
