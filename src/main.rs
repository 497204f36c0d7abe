//! pulse-client diagnostic monitor entry point.
//!
//! Connects to the configured endpoint, tails every inbound event, and
//! prints connection-status and progress-snapshot transitions.

use pulse_client::channel::{EventChannel, WILDCARD};
use pulse_client::config::ClientConfig;
use pulse_client::progress::ProgressAggregator;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = ClientConfig::from_env()?;
    tracing::info!(url = %config.api_base_url, "starting pulse-client monitor");

    // Build the channel and the aggregator on top of it
    let channel = EventChannel::new(config.clone());
    let aggregator = ProgressAggregator::start(channel.clone(), &config).await;

    let _tap = channel
        .subscribe(WILDCARD, |envelope| {
            tracing::info!(message_type = %envelope.message_type, "event");
        })
        .await;

    channel.connect().await?;

    let mut status_rx = channel.watch_status();
    let mut snapshot_rx = aggregator.watch();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = status_rx.borrow().clone();
                tracing::info!(
                    state = ?status.state,
                    error = status.last_error.as_deref(),
                    "channel status"
                );
            }
            changed = snapshot_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshot_rx.borrow().clone();
                tracing::info!(
                    jobs = snapshot.statuses.len(),
                    active = snapshot.active_jobs.len(),
                    "progress snapshot"
                );
            }
        }
    }

    aggregator.shutdown().await;
    channel.disconnect().await;

    Ok(())
}
