//! Client error types.
//!
//! [`ChannelError`] is the central error type for the event channel. Each
//! variant corresponds to one failure class with its own recovery policy:
//! configuration errors are fatal, transport errors drive the backoff
//! retry loop, and protocol errors drop a single frame.

/// Client-side error enum covering every failure class of the channel.
///
/// # Recovery policy
///
/// | Variant             | Recovery                                    |
/// |---------------------|---------------------------------------------|
/// | `Configuration`     | fatal, surfaced to the `connect` caller     |
/// | `Transport`         | retried per the backoff policy              |
/// | `Protocol`          | the offending frame is dropped and logged   |
/// | `RetriesExhausted`  | terminal until `reconnect()` or `reset()`   |
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The client is misconfigured (e.g. missing or malformed endpoint).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A socket-level failure: handshake refused, connection dropped,
    /// read/write error.
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound frame did not conform to the wire contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The reconnect attempt budget was spent without a successful open.
    #[error("connection failed after {attempts} reconnect attempts")]
    RetriesExhausted {
        /// Number of retries that were attempted before giving up.
        attempts: u32,
    },
}

impl ChannelError {
    /// Returns `true` for errors that must not be retried automatically.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::RetriesExhausted { .. })
    }

    /// Returns `true` for errors the backoff policy is allowed to retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn configuration_is_fatal() {
        let err = ChannelError::Configuration("no endpoint".to_string());
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn transport_is_retryable() {
        let err = ChannelError::Transport("connection refused".to_string());
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn exhausted_retries_are_terminal() {
        let err = ChannelError::RetriesExhausted { attempts: 10 };
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "connection failed after 10 reconnect attempts"
        );
    }

    #[test]
    fn protocol_errors_are_neither() {
        let err = ChannelError::Protocol("missing type".to_string());
        assert!(!err.is_fatal());
        assert!(!err.is_retryable());
    }
}
