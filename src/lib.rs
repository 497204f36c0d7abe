//! # pulse-client
//!
//! Resilient WebSocket event-channel client with batched job-progress
//! aggregation.
//!
//! The crate has two layered components. The [`channel`] layer owns one
//! authenticated, auto-reconnecting connection: an outbound send queue
//! drained in FIFO order on every open, exponential backoff with a retry
//! budget, and a type-keyed subscriber registry with a `"*"` wildcard.
//! The [`progress`] layer sits on top of it, coalescing high-frequency
//! per-job status events into at most one snapshot per window while
//! letting terminal `done`/`error` transitions through immediately.
//!
//! ## Architecture
//!
//! ```text
//! Consumers (UI, automation)
//!     │
//!     ├── ProgressAggregator (progress/)
//!     │       job map · pending buffer · flush timer · snapshot watch
//!     │
//!     ├── EventChannel (channel/)
//!     │       state machine · send queue · listener registry · backoff
//!     │
//!     ├── Connector / TokenProvider seams (channel/transport)
//!     │
//!     └── WebSocket (tokio-tungstenite) · import endpoint (reqwest)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pulse_client::channel::{EventChannel, StaticToken};
//! use pulse_client::config::ClientConfig;
//! use pulse_client::progress::ProgressAggregator;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env()?;
//! let channel = EventChannel::new(config.clone());
//! let aggregator = ProgressAggregator::start(channel.clone(), &config).await;
//!
//! channel
//!     .connect_with_token(Arc::new(StaticToken::new("token")))
//!     .await?;
//!
//! let mut snapshots = aggregator.watch();
//! while snapshots.changed().await.is_ok() {
//!     println!("{} jobs active", snapshots.borrow().active_jobs.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod progress;
