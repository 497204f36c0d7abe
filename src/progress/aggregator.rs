//! The progress aggregator: turns the per-job event firehose into a
//! stable, rate-limited snapshot.
//!
//! High-frequency transient updates (`uploading`/`processing`) are merged
//! into a pending buffer — one slot per job — and applied together when
//! the coalescing window elapses, so observers see at most one
//! notification per window. Terminal updates bypass the window entirely:
//! a `done`/`error` signal is never delayed.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::channel::client::{ChannelState, EventChannel, Subscription};
use crate::channel::messages::{Envelope, TYPE_IMPORT_PROGRESS, TYPE_SUBSCRIBE, TYPE_SUBSCRIBED};
use crate::config::ClientConfig;

use super::job::{ImportAccepted, ImportFile, JobState, JobStatus, JobUpdate, ProgressSnapshot};
use super::uploader::{ImportApi, ImportApiError};

/// Consumes job events from an [`EventChannel`] and publishes a derived,
/// de-duplicated [`ProgressSnapshot`] through a watch channel.
///
/// Created with [`start`](Self::start); cheap to clone. The aggregator
/// only talks to the channel through its public subscription API and owns
/// its job map and pending buffer exclusively.
pub struct ProgressAggregator {
    inner: Arc<AggregatorInner>,
}

impl Clone for ProgressAggregator {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl fmt::Debug for ProgressAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressAggregator").finish_non_exhaustive()
    }
}

struct AggregatorInner {
    channel: EventChannel,
    api: ImportApi,
    throttle: Duration,
    core: Mutex<AggregatorCore>,
    snapshot_tx: watch::Sender<ProgressSnapshot>,
    shutdown: CancellationToken,
}

/// Mutable aggregator state; all mutations are non-yielding critical
/// sections, mirroring the channel core.
#[derive(Default)]
struct AggregatorCore {
    statuses: Vec<JobStatus>,
    active_jobs: Vec<String>,
    /// Pending transient updates, one slot per job id; a newer update for
    /// the same job replaces the buffered one.
    pending: HashMap<String, JobUpdate>,
    /// At most one flush timer is armed at a time.
    flush_timer: Option<CancellationToken>,
    subscriptions: Vec<Subscription>,
}

impl ProgressAggregator {
    /// Subscribes to the channel's progress broadcasts and starts the
    /// aggregation tasks.
    ///
    /// Enrollment (`{"type": "subscribe"}`) is sent on every transition
    /// into `Connected`, so a reconnected channel re-enrolls and receives
    /// a fresh snapshot without caller involvement.
    pub async fn start(channel: EventChannel, config: &ClientConfig) -> Self {
        let (snapshot_tx, _) = watch::channel(ProgressSnapshot::default());
        let inner = Arc::new(AggregatorInner {
            channel: channel.clone(),
            api: ImportApi::new(config),
            throttle: config.progress_throttle,
            core: Mutex::new(AggregatorCore::default()),
            snapshot_tx,
            shutdown: CancellationToken::new(),
        });

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let progress_tx = event_tx.clone();
        let progress_sub = channel
            .subscribe(TYPE_IMPORT_PROGRESS, move |envelope| {
                let _ = progress_tx.send(envelope.clone());
            })
            .await;
        let snapshot_sub = channel
            .subscribe(TYPE_SUBSCRIBED, move |envelope| {
                let _ = event_tx.send(envelope.clone());
            })
            .await;
        inner.core.lock().await.subscriptions = vec![progress_sub, snapshot_sub];

        tokio::spawn(AggregatorInner::run_event_loop(
            Arc::clone(&inner),
            event_rx,
        ));
        tokio::spawn(AggregatorInner::run_enrollment(Arc::clone(&inner)));

        Self { inner }
    }

    /// Submits a batch of files for import.
    ///
    /// The displayed set is replaced by optimistic `Uploading` records
    /// for the batch, uploads run concurrently, and each accepted job id
    /// becomes active. A failed upload moves only its own record to
    /// `Error`; sibling files are unaffected. Results come back in input
    /// order.
    pub async fn submit(
        &self,
        files: Vec<ImportFile>,
    ) -> Vec<Result<ImportAccepted, ImportApiError>> {
        {
            let mut core = self.inner.core.lock().await;
            if let Some(timer) = core.flush_timer.take() {
                timer.cancel();
            }
            core.pending.clear();
            core.statuses = files
                .iter()
                .map(|file| JobStatus::uploading(file.name.as_str()))
                .collect();
            core.active_jobs.clear();
            self.inner.publish(&core);
        }

        futures::future::join_all(files.iter().map(|file| self.submit_one(file))).await
    }

    /// Removes a job record from the displayed set (e.g. the user
    /// dismissed a completed entry). Channel subscriptions are untouched.
    pub async fn remove_job(&self, file_name: &str) {
        let mut core = self.inner.core.lock().await;
        core.statuses.retain(|status| status.file_name != file_name);
        self.inner.publish(&core);
    }

    /// Returns a watch receiver over the published snapshot.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ProgressSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// The most recently published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// Stops the aggregation tasks, cancels any pending flush, and
    /// unsubscribes from the channel.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let subscriptions = {
            let mut core = self.inner.core.lock().await;
            if let Some(timer) = core.flush_timer.take() {
                timer.cancel();
            }
            std::mem::take(&mut core.subscriptions)
        };
        for subscription in subscriptions {
            subscription.unsubscribe().await;
        }
        tracing::debug!("progress aggregator shut down");
    }

    async fn submit_one(&self, file: &ImportFile) -> Result<ImportAccepted, ImportApiError> {
        match self.inner.api.import_file(file).await {
            Ok(accepted) => {
                let mut core = self.inner.core.lock().await;
                if let Some(status) = core
                    .statuses
                    .iter_mut()
                    .find(|status| status.file_name == file.name)
                {
                    status.status = accepted.status;
                }
                core.active_jobs.push(accepted.job_id.clone());
                self.inner.publish(&core);
                Ok(accepted)
            }
            Err(error) => {
                tracing::warn!(file_name = %file.name, error = %error, "upload failed");
                let mut core = self.inner.core.lock().await;
                if let Some(status) = core
                    .statuses
                    .iter_mut()
                    .find(|status| status.file_name == file.name)
                {
                    status.status = JobState::Error;
                    status.error = Some(error.to_string());
                }
                self.inner.publish(&core);
                Err(error)
            }
        }
    }
}

impl AggregatorInner {
    /// Drains envelopes handed over by the channel listeners.
    async fn run_event_loop(inner: Arc<Self>, mut event_rx: mpsc::UnboundedReceiver<Envelope>) {
        loop {
            tokio::select! {
                () = inner.shutdown.cancelled() => break,
                envelope = event_rx.recv() => match envelope {
                    Some(envelope) => Self::on_envelope(&inner, envelope).await,
                    None => break,
                }
            }
        }
    }

    /// Sends the enrollment control message on every transition into
    /// `Connected`, keyed on the connection generation so error-only
    /// status updates never re-enroll.
    async fn run_enrollment(inner: Arc<Self>) {
        let mut status_rx = inner.channel.watch_status();
        let mut enrolled_at: Option<DateTime<Utc>> = None;
        loop {
            let (state, since) = {
                let status = status_rx.borrow_and_update();
                (status.state, status.since)
            };
            if state == ChannelState::Connected && enrolled_at != Some(since) {
                enrolled_at = Some(since);
                tracing::debug!("enrolling in progress broadcasts");
                let _ = inner.channel.send(Envelope::new(TYPE_SUBSCRIBE)).await;
            }
            tokio::select! {
                () = inner.shutdown.cancelled() => break,
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Extracts the job update batch from an envelope.
    async fn on_envelope(inner: &Arc<Self>, envelope: Envelope) {
        let Some(data) = envelope.data else {
            return;
        };
        match serde_json::from_value::<Vec<JobUpdate>>(data) {
            Ok(updates) if !updates.is_empty() => Self::handle_updates(inner, updates).await,
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(
                    message_type = %envelope.message_type,
                    error = %error,
                    "dropping malformed job update payload"
                );
            }
        }
    }

    /// Routes one inbound batch: transient updates into the pending
    /// buffer (arming the single flush timer), everything else applied
    /// and published immediately.
    async fn handle_updates(inner: &Arc<Self>, updates: Vec<JobUpdate>) {
        let mut immediate = Vec::new();
        let mut transient = Vec::new();
        for update in updates {
            if update.status.is_transient() {
                transient.push(update);
            } else {
                immediate.push(update);
            }
        }

        let mut core = inner.core.lock().await;
        if !immediate.is_empty() {
            // A terminal update outruns anything buffered for the same
            // job; evict the stale entry so a later flush cannot regress
            // the terminal state.
            for update in &immediate {
                core.pending.remove(&update.job_id);
            }
            apply_updates(&mut core, &immediate);
            inner.publish(&core);
        }
        if !transient.is_empty() {
            for update in transient {
                core.pending.insert(update.job_id.clone(), update);
            }
            if core.flush_timer.is_none() {
                Self::arm_flush_timer(inner, &mut core);
            }
        }
    }

    /// Arms the coalescing-window timer. Must be called with the core
    /// lock held and no timer armed.
    fn arm_flush_timer(inner: &Arc<Self>, core: &mut AggregatorCore) {
        let token = CancellationToken::new();
        core.flush_timer = Some(token.clone());
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(inner.throttle) => {}
            }
            if token.is_cancelled() {
                return;
            }
            inner.flush().await;
        });
    }

    /// Takes the whole pending buffer and applies it in one pass,
    /// notifying observers once.
    async fn flush(&self) {
        let mut core = self.core.lock().await;
        core.flush_timer = None;
        if core.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut core.pending);
        let updates: Vec<JobUpdate> = pending.into_values().collect();
        apply_updates(&mut core, &updates);
        self.publish(&core);
    }

    fn publish(&self, core: &AggregatorCore) {
        let _ = self.snapshot_tx.send_replace(ProgressSnapshot {
            statuses: core.statuses.clone(),
            active_jobs: core.active_jobs.clone(),
        });
    }
}

/// Applies a batch to the job map, matching by stable file-name identity
/// (upserting records the map has not seen), and retires finished job ids
/// from the active set.
fn apply_updates(core: &mut AggregatorCore, updates: &[JobUpdate]) {
    for update in updates {
        if let Some(status) = core
            .statuses
            .iter_mut()
            .find(|status| status.file_name == update.file_name)
        {
            status.status = update.status;
            if let Some(stats) = &update.stats {
                status.stats = stats.clone();
            }
            status.error = update.error.clone();
        } else {
            core.statuses.push(JobStatus::from(update));
        }
    }

    let finished: HashSet<&str> = updates
        .iter()
        .filter(|update| update.status.is_terminal())
        .map(|update| update.job_id.as_str())
        .collect();
    if !finished.is_empty() {
        core.active_jobs.retain(|id| !finished.contains(id.as_str()));
    }
}
