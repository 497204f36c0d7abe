//! Event-channel layer: connection state machine, wire frames, send
//! queue, listener registry, backoff, and the transport seam.
//!
//! [`EventChannel`] is the public entry point; the remaining modules are
//! the pieces it is assembled from, each independently testable.

pub mod backoff;
pub mod client;
pub mod messages;
pub mod queue;
pub mod registry;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use client::{ChannelState, ChannelStatus, EventChannel, Subscription};
pub use messages::{Envelope, WILDCARD};
pub use registry::SubscriberRegistry;
pub use transport::{Connector, StaticToken, TokenProvider, WsConnector};
