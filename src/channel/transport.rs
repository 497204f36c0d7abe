//! Transport seam between the channel state machine and the socket.
//!
//! [`Connector`] abstracts "open a WebSocket and give me its two halves"
//! so the state machine can be driven by an in-memory transport in tests.
//! The production implementation is [`WsConnector`], backed by
//! `tokio-tungstenite`.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::ChannelError;

/// Socket-level error type shared by both transport halves.
pub type TransportError = tokio_tungstenite::tungstenite::Error;

/// Boxed write half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = TransportError> + Send>>;

/// Boxed read half of a connection.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, TransportError>> + Send>>;

/// Opens a physical connection to the given URL.
///
/// Exactly one implementation is attached to a channel for its whole
/// lifetime; the channel calls it once per (re)connect attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Performs the handshake and returns the connection halves.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Transport`] when the handshake fails. The
    /// channel treats this the same as a non-clean close and applies its
    /// backoff policy.
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), ChannelError>;
}

/// Supplies the authentication token appended to the connection URI.
///
/// Yielding `None` connects without a token. The supplier is awaited on
/// every (re)connect attempt, so short-lived tokens stay fresh.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Produces the current token, or `None` to connect anonymously.
    async fn token(&self) -> Option<String>;
}

/// [`TokenProvider`] that always yields the same token.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Wraps a fixed token value.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Production connector backed by [`tokio_tungstenite::connect_async`].
#[derive(Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), ChannelError> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| ChannelError::Transport(format!("websocket handshake failed: {e}")))?;

        let (sink, stream) = ws_stream.split();
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Scripted in-memory connector for driving the state machine in tests.
#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use futures::SinkExt;
    use futures::channel::mpsc as fmpsc;

    use super::*;

    /// What the next `connect` call should do.
    pub enum ConnectOutcome {
        /// Hand back a live in-memory link immediately.
        Succeed,
        /// Refuse the handshake.
        Fail,
        /// Wait for the test to fire the gate, then hand back a link.
        GatedSucceed(tokio::sync::oneshot::Receiver<()>),
    }

    /// Test-side endpoints of one successful connection.
    pub struct MockLink {
        /// Frames written by the client, in write order.
        pub written: fmpsc::UnboundedReceiver<Message>,
        /// Injects inbound frames into the client; dropping it ends the
        /// stream (a non-clean close).
        pub inject: fmpsc::UnboundedSender<Message>,
    }

    /// Connector whose connect attempts follow a test-provided script.
    /// Attempts beyond the script fail.
    pub struct MockConnector {
        script: Mutex<VecDeque<ConnectOutcome>>,
        attempts: AtomicU32,
        links: Mutex<VecDeque<MockLink>>,
        urls: Mutex<Vec<String>>,
    }

    impl MockConnector {
        pub fn new(script: Vec<ConnectOutcome>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                attempts: AtomicU32::new(0),
                links: Mutex::new(VecDeque::new()),
                urls: Mutex::new(Vec::new()),
            }
        }

        /// Appends an outcome to the script.
        pub fn push(&self, outcome: ConnectOutcome) {
            self.script.lock().unwrap().push_back(outcome);
        }

        /// Total handshakes attempted so far.
        pub fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }

        /// Takes the endpoints of the oldest un-taken connection.
        pub fn take_link(&self) -> Option<MockLink> {
            self.links.lock().unwrap().pop_front()
        }

        /// URLs passed to `connect`, in call order.
        pub fn urls(&self) -> Vec<String> {
            self.urls.lock().unwrap().clone()
        }

        fn open_link(&self) -> (FrameSink, FrameStream) {
            let (write_tx, write_rx) = fmpsc::unbounded();
            let (inject_tx, inject_rx) = fmpsc::unbounded();
            self.links.lock().unwrap().push_back(MockLink {
                written: write_rx,
                inject: inject_tx,
            });

            let sink: FrameSink = Box::pin(write_tx.sink_map_err(|e| {
                TransportError::Io(io::Error::new(io::ErrorKind::BrokenPipe, e))
            }));
            let stream: FrameStream = Box::pin(inject_rx.map(Ok));
            (sink, stream)
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), ChannelError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_string());

            let outcome = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ConnectOutcome::Fail);

            match outcome {
                ConnectOutcome::Succeed => Ok(self.open_link()),
                ConnectOutcome::Fail => Err(ChannelError::Transport(
                    "mock handshake refused".to_string(),
                )),
                ConnectOutcome::GatedSucceed(gate) => {
                    let _ = gate.await;
                    Ok(self.open_link())
                }
            }
        }
    }
}
