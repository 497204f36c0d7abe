//! The event-channel client: connection state machine, retry scheduling,
//! send queueing, and listener dispatch.
//!
//! [`EventChannel`] is a cheaply clonable handle over shared internals.
//! Each successful connect spawns a reader task and a writer task for
//! that connection; a [`CancellationToken`] tears both down and a
//! connection epoch makes stale close notifications harmless. All state
//! mutations happen in non-yielding critical sections behind one mutex,
//! which is what keeps the drain/dispatch invariants without any further
//! locking.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;

use super::backoff;
use super::messages::{Envelope, parse_frame};
use super::queue::SendQueue;
use super::registry::{ListenerId, SubscriberRegistry};
use super::transport::{Connector, FrameSink, FrameStream, TokenProvider, WsConnector};
use crate::config::ClientConfig;
use crate::error::ChannelError;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No socket is live and no handshake is in flight.
    Disconnected,
    /// A handshake (including the token fetch) is in flight.
    Connecting,
    /// The socket is open and frames flow in both directions.
    Connected,
}

/// Observable connection status published through a watch channel.
#[derive(Debug, Clone)]
pub struct ChannelStatus {
    /// Current lifecycle state.
    pub state: ChannelState,
    /// Most recent transport/protocol/terminal error, if any.
    pub last_error: Option<String>,
    /// When [`state`](Self::state) last changed. Error-only updates do
    /// not touch this, so it identifies one connection generation.
    pub since: DateTime<Utc>,
}

/// Handle returned by [`EventChannel::subscribe`].
///
/// Call [`unsubscribe`](Self::unsubscribe) to remove exactly the listener
/// this handle was created for. Dropping the handle leaves the listener
/// registered.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Mutex<SubscriberRegistry>>,
    message_type: String,
    id: ListenerId,
}

impl Subscription {
    /// Removes the listener this subscription refers to.
    pub async fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .await
                .unsubscribe(&self.message_type, self.id);
        }
    }
}

/// A long-lived, auto-reconnecting, bidirectional message-stream client.
///
/// Owns exactly one physical connection at a time. Frames sent while
/// disconnected are queued and drained, in order, on the next open.
/// Inbound frames are validated and fanned out to type-scoped listeners.
/// See the crate documentation for the full contract.
pub struct EventChannel {
    inner: Arc<ChannelInner>,
}

impl Clone for EventChannel {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel").finish_non_exhaustive()
    }
}

struct ChannelInner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    core: Mutex<ChannelCore>,
    registry: Arc<Mutex<SubscriberRegistry>>,
    status_tx: watch::Sender<ChannelStatus>,
}

/// Mutable channel state. Every access is a non-yielding critical
/// section; nothing holds this lock across an `.await`.
struct ChannelCore {
    state: ChannelState,
    /// Incremented whenever a connect attempt starts or the channel is
    /// intentionally torn down; callbacks carrying an older epoch are
    /// ignored.
    epoch: u64,
    /// Retries fired since the last successful open.
    attempts: u32,
    queue: SendQueue,
    writer_tx: Option<mpsc::UnboundedSender<Envelope>>,
    session: Option<CancellationToken>,
    retry: Option<CancellationToken>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    last_message: Option<Envelope>,
}

impl EventChannel {
    /// Creates a channel using the production WebSocket connector.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Creates a channel with a custom [`Connector`] (testing, tunnelling).
    #[must_use]
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let initial = ChannelStatus {
            state: ChannelState::Disconnected,
            last_error: None,
            since: Utc::now(),
        };
        let (status_tx, _) = watch::channel(initial);

        Self {
            inner: Arc::new(ChannelInner {
                config,
                connector,
                core: Mutex::new(ChannelCore {
                    state: ChannelState::Disconnected,
                    epoch: 0,
                    attempts: 0,
                    queue: SendQueue::new(),
                    writer_tx: None,
                    session: None,
                    retry: None,
                    token_provider: None,
                    last_message: None,
                }),
                registry: Arc::new(Mutex::new(SubscriberRegistry::new())),
                status_tx,
            }),
        }
    }

    /// Opens the connection using the stored token supplier, if any.
    ///
    /// Idempotent: while already `Connecting` or `Connected` this is a
    /// no-op. Transport failures are not returned — they are recorded in
    /// the published status and drive the backoff retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Configuration`] when no usable endpoint
    /// can be derived from the configuration. Configuration errors are
    /// never retried.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        ChannelInner::connect_with(&self.inner, None).await
    }

    /// Like [`connect`](Self::connect), but first replaces the stored
    /// token supplier used by this and all future (re)connect attempts.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Configuration`] when no usable endpoint
    /// can be derived from the configuration.
    pub async fn connect_with_token(
        &self,
        provider: Arc<dyn TokenProvider>,
    ) -> Result<(), ChannelError> {
        ChannelInner::connect_with(&self.inner, Some(provider)).await
    }

    /// Performs an intentional clean shutdown.
    ///
    /// Cancels any pending retry timer and closes the socket with the
    /// normal-closure code, so no reconnect is scheduled.
    pub async fn disconnect(&self) {
        let mut core = self.inner.core.lock().await;
        core.epoch += 1;
        Self::teardown_connection(&mut core);
        core.state = ChannelState::Disconnected;
        self.inner
            .update_status(|status| status.state = ChannelState::Disconnected);
        tracing::info!("event channel disconnected");
    }

    /// Sends a frame, or queues it for the next successful open.
    ///
    /// Returns `true` when the frame was handed to a live connection and
    /// `false` when it was queued. A queued send opportunistically
    /// triggers [`connect`](Self::connect) — but only when the channel is
    /// idle (`Disconnected` with no retry timer armed), so repeated sends
    /// can never race a connect attempt that is already in flight.
    pub async fn send(&self, envelope: Envelope) -> bool {
        let mut envelope = envelope;
        let should_connect = {
            let mut core = self.inner.core.lock().await;
            if core.state == ChannelState::Connected
                && let Some(writer_tx) = &core.writer_tx
            {
                match writer_tx.send(envelope) {
                    Ok(()) => return true,
                    // Writer already gone; fall through to queueing.
                    Err(mpsc::error::SendError(returned)) => envelope = returned,
                }
            }
            core.queue.push(envelope);
            core.state == ChannelState::Disconnected && core.retry.is_none()
        };

        if should_connect {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                if let Err(e) = ChannelInner::connect_with(&inner, None).await {
                    tracing::warn!(error = %e, "opportunistic connect failed");
                }
            });
        }
        false
    }

    /// Registers `listener` for `message_type` (or
    /// [`WILDCARD`](super::messages::WILDCARD) for every frame).
    ///
    /// Listeners run synchronously on the reader task in registration
    /// order; exact-type listeners fire before wildcard ones.
    pub async fn subscribe(
        &self,
        message_type: &str,
        listener: impl Fn(&Envelope) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self
            .inner
            .registry
            .lock()
            .await
            .subscribe(message_type, Box::new(listener));
        Subscription {
            registry: Arc::downgrade(&self.inner.registry),
            message_type: message_type.to_string(),
            id,
        }
    }

    /// Forces an immediate reconnect, ignoring any backoff in progress.
    ///
    /// Cancels timers, cleanly closes the current socket, resets the
    /// reconnect counter, and connects again.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Configuration`] when no usable endpoint
    /// can be derived from the configuration.
    pub async fn reconnect(&self) -> Result<(), ChannelError> {
        {
            let mut core = self.inner.core.lock().await;
            core.epoch += 1;
            Self::teardown_connection(&mut core);
            core.state = ChannelState::Disconnected;
            core.attempts = 0;
        }
        ChannelInner::connect_with(&self.inner, None).await
    }

    /// Full teardown back to the initial state: timers cancelled, socket
    /// closed, queue emptied, all subscriptions removed, published state
    /// reset.
    pub async fn reset(&self) {
        {
            let mut core = self.inner.core.lock().await;
            core.epoch += 1;
            Self::teardown_connection(&mut core);
            core.state = ChannelState::Disconnected;
            core.attempts = 0;
            core.queue.clear();
            core.last_message = None;
        }
        self.inner.registry.lock().await.clear();
        self.inner.update_status(|status| {
            status.state = ChannelState::Disconnected;
            status.last_error = None;
        });
        tracing::info!("event channel reset");
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ChannelState {
        self.inner.core.lock().await.state
    }

    /// The most recently received valid frame, if any.
    pub async fn last_message(&self) -> Option<Envelope> {
        self.inner.core.lock().await.last_message.clone()
    }

    /// Returns a watch receiver over the published connection status.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Cancels the pending retry timer and the live connection tasks.
    /// Must be called with the core lock held.
    fn teardown_connection(core: &mut ChannelCore) {
        if let Some(retry) = core.retry.take() {
            retry.cancel();
        }
        if let Some(session) = core.session.take() {
            session.cancel();
        }
        core.writer_tx = None;
    }
}

impl ChannelInner {
    /// The connect state machine. See [`EventChannel::connect`].
    async fn connect_with(
        inner: &Arc<Self>,
        provider: Option<Arc<dyn TokenProvider>>,
    ) -> Result<(), ChannelError> {
        let (my_epoch, provider, origin) = {
            let mut core = inner.core.lock().await;
            if let Some(provider) = provider {
                core.token_provider = Some(provider);
            }
            if core.state != ChannelState::Disconnected {
                return Ok(());
            }
            // Fail fast on configuration problems; no retry is scheduled
            // and the state is left untouched.
            let origin = inner.config.websocket_origin()?;

            core.state = ChannelState::Connecting;
            core.epoch += 1;
            inner.update_status(|status| {
                status.state = ChannelState::Connecting;
                status.last_error = None;
            });
            (core.epoch, core.token_provider.clone(), origin)
        };

        // The only suspension point between `Connecting` and the
        // handshake. Another connect cannot start meanwhile (state is
        // `Connecting`), but a disconnect/reset can — hence the epoch
        // re-check below.
        let token = match &provider {
            Some(provider) => provider.token().await,
            None => None,
        };

        {
            let core = inner.core.lock().await;
            if core.epoch != my_epoch || core.state != ChannelState::Connecting {
                tracing::debug!("connect attempt superseded during token fetch");
                return Ok(());
            }
        }

        let url = match token {
            Some(token) => format!("{origin}?token={token}"),
            None => origin,
        };
        let connection_id = uuid::Uuid::new_v4();
        tracing::debug!(%connection_id, "opening event channel");

        match inner.connector.connect(&url).await {
            Ok((sink, stream)) => {
                Self::install_connection(inner, my_epoch, connection_id, sink, stream).await;
                Ok(())
            }
            Err(error) => {
                Self::fail_attempt(inner, my_epoch, &error).await;
                Ok(())
            }
        }
    }

    /// Wires up a freshly opened socket: spawns the reader and writer
    /// tasks, resets the retry counter, and drains the send queue before
    /// the state flips to `Connected` so queued frames precede any
    /// post-open send.
    async fn install_connection(
        inner: &Arc<Self>,
        my_epoch: u64,
        connection_id: uuid::Uuid,
        sink: FrameSink,
        stream: FrameStream,
    ) {
        let mut core = inner.core.lock().await;
        if core.epoch != my_epoch || core.state != ChannelState::Connecting {
            // A disconnect/reset won the race; close the orphan socket.
            tracing::debug!(%connection_id, "discarding superseded connection");
            tokio::spawn(close_sink(sink, connection_id));
            return;
        }

        if let Some(retry) = core.retry.take() {
            retry.cancel();
        }

        let session = CancellationToken::new();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(sink, writer_rx, session.clone(), connection_id));
        tokio::spawn(run_reader(
            Arc::clone(inner),
            stream,
            session.clone(),
            my_epoch,
            connection_id,
        ));

        core.attempts = 0;
        let queued = core.queue.len();
        for envelope in core.queue.drain() {
            let _ = writer_tx.send(envelope);
        }
        core.writer_tx = Some(writer_tx);
        core.session = Some(session);
        core.state = ChannelState::Connected;
        inner.update_status(|status| {
            status.state = ChannelState::Connected;
            status.last_error = None;
        });
        tracing::info!(%connection_id, queued, "event channel connected");
    }

    /// Records a failed handshake and applies the retry policy.
    async fn fail_attempt(inner: &Arc<Self>, my_epoch: u64, error: &ChannelError) {
        let mut core = inner.core.lock().await;
        if core.epoch != my_epoch {
            return;
        }
        core.state = ChannelState::Disconnected;
        core.writer_tx = None;
        core.session = None;
        tracing::warn!(error = %error, "event channel connect failed");
        inner.update_status(|status| {
            status.state = ChannelState::Disconnected;
            status.last_error = Some(error.to_string());
        });
        Self::maybe_schedule_retry(inner, &mut core);
    }

    /// Handles the end of a live connection's read loop.
    async fn on_closed(inner: &Arc<Self>, my_epoch: u64, clean: bool) {
        let mut core = inner.core.lock().await;
        if core.epoch != my_epoch {
            // An intentional teardown already advanced the channel.
            return;
        }
        if let Some(session) = core.session.take() {
            session.cancel();
        }
        core.writer_tx = None;
        core.state = ChannelState::Disconnected;
        inner.update_status(|status| status.state = ChannelState::Disconnected);

        if clean {
            tracing::info!("event channel closed cleanly");
            return;
        }
        Self::maybe_schedule_retry(inner, &mut core);
    }

    /// Arms the single backoff timer, or surfaces the terminal
    /// exhausted-retries error once the attempt budget is spent.
    /// Must be called with the core lock held.
    fn maybe_schedule_retry(inner: &Arc<Self>, core: &mut ChannelCore) {
        let policy = &inner.config.backoff;
        if !policy.auto_reconnect || core.retry.is_some() {
            return;
        }
        if let Some(cap) = policy.max_attempts
            && core.attempts >= cap
        {
            let error = ChannelError::RetriesExhausted {
                attempts: core.attempts,
            };
            tracing::error!(attempts = core.attempts, "giving up on reconnection");
            inner.update_status(|status| status.last_error = Some(error.to_string()));
            return;
        }

        let delay = backoff::delay_for_attempt(core.attempts, policy);
        let token = CancellationToken::new();
        core.retry = Some(token.clone());
        tracing::info!(
            delay_ms = delay.as_millis() as u64,
            attempt = core.attempts + 1,
            "scheduling reconnect"
        );

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            {
                let mut core = inner.core.lock().await;
                if token.is_cancelled() {
                    return;
                }
                core.retry = None;
                core.attempts += 1;
            }
            if let Err(e) = Self::connect_with(&inner, None).await {
                tracing::warn!(error = %e, "scheduled reconnect failed");
            }
        });
    }

    /// Validates one inbound text frame and dispatches it to listeners.
    async fn handle_frame(&self, text: &str) {
        match parse_frame(text) {
            Ok(envelope) => {
                {
                    let mut core = self.core.lock().await;
                    core.last_message = Some(envelope.clone());
                }
                self.registry.lock().await.dispatch(&envelope);
            }
            Err(error) => {
                tracing::warn!(error = %error, raw = %text, "dropping malformed frame");
                self.update_status(|status| status.last_error = Some(error.to_string()));
            }
        }
    }

    /// Publishes a status change through the watch channel.
    fn update_status(&self, mutate: impl FnOnce(&mut ChannelStatus)) {
        self.status_tx.send_modify(|status| {
            let previous_state = status.state;
            mutate(status);
            if status.state != previous_state {
                status.since = Utc::now();
            }
        });
    }
}

/// Read loop of one connection. Ends when the socket closes, the session
/// is cancelled, or a receive error occurs; then reports back with the
/// epoch it was spawned under.
async fn run_reader(
    inner: Arc<ChannelInner>,
    mut stream: FrameStream,
    session: CancellationToken,
    epoch: u64,
    connection_id: uuid::Uuid,
) {
    let clean;
    loop {
        tokio::select! {
            () = session.cancelled() => {
                clean = true;
                break;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => inner.handle_frame(&text).await,
                Some(Ok(Message::Close(close_frame))) => {
                    clean = close_frame
                        .as_ref()
                        .is_some_and(|frame| frame.code == CloseCode::Normal);
                    tracing::info!(%connection_id, ?close_frame, "server closed the channel");
                    break;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Handled automatically by tungstenite.
                }
                Some(Ok(_)) => {
                    // Binary / raw frames are not part of the wire contract.
                }
                Some(Err(error)) => {
                    tracing::error!(%connection_id, error = %error, "receive error");
                    inner.update_status(|status| {
                        status.last_error =
                            Some(ChannelError::Transport(error.to_string()).to_string());
                    });
                    clean = false;
                    break;
                }
                None => {
                    tracing::warn!(%connection_id, "stream ended without a close frame");
                    clean = false;
                    break;
                }
            }
        }
    }
    ChannelInner::on_closed(&inner, epoch, clean).await;
}

/// Write loop of one connection. Serializes outbound envelopes in FIFO
/// order; on teardown it sends the normal-closure frame so the peer sees
/// an intentional shutdown.
async fn run_writer(
    mut sink: FrameSink,
    mut writer_rx: mpsc::UnboundedReceiver<Envelope>,
    session: CancellationToken,
    connection_id: uuid::Uuid,
) {
    loop {
        tokio::select! {
            () = session.cancelled() => break,
            envelope = writer_rx.recv() => match envelope {
                Some(envelope) => match serde_json::to_string(&envelope) {
                    Ok(json) => {
                        if let Err(error) = sink.send(Message::text(json)).await {
                            tracing::error!(%connection_id, error = %error, "write failed");
                            break;
                        }
                    }
                    Err(error) => {
                        tracing::error!(error = %error, "unserializable outbound frame");
                    }
                },
                None => break,
            }
        }
    }
    close_sink(sink, connection_id).await;
}

/// Sends the normal-closure frame and shuts the sink down.
async fn close_sink(mut sink: FrameSink, connection_id: uuid::Uuid) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "client disconnect".into(),
    };
    if let Err(error) = sink.send(Message::Close(Some(frame))).await {
        tracing::debug!(%connection_id, error = %error, "close frame not delivered");
    }
    let _ = sink.close().await;
}
