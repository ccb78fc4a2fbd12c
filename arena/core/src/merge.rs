//! Fan-In Merger
//!
//! Starts one producer task per requested model and merges everything they
//! produce into a single outbound stream.
//!
//! # Architecture
//!
//! ```text
//!   GenerateRequest { prompt, models: [a, b, c] }
//!            │
//!            ▼
//!   ┌─────────────┐ ┌─────────────┐ ┌─────────────┐
//!   │ producer a  │ │ producer b  │ │ producer c  │   one task per branch
//!   │ BranchAdapter│ │ BranchAdapter│ │ BranchAdapter│
//!   └──────┬──────┘ └──────┬──────┘ └──────┬──────┘
//!          └───────────────┼───────────────┘
//!                          ▼
//!              bounded mpsc (send awaits, never drops)
//!                          │
//!                          ▼
//!                 MergedStream (merge loop)
//!          poll with timeout ─► CompletionTracker
//!                          │
//!                          ▼
//!                 outbound encoder / client
//! ```
//!
//! Events from one branch arrive in the order its adapter produced them.
//! Across branches the order is whatever the scheduler delivers.
//!
//! [`FanIn::shutdown`] ends every merged stream it started, so a server can
//! stop without waiting on models that never finish.
//!
//! The tracker is updated only when an event is dequeued, so it is the single
//! source of truth for "every branch is terminal". Checking whether producer
//! tasks have finished is a fallback used after a poll timeout, guarding
//! against a branch that never reports a terminal event.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backend::ChatBackend;
use crate::branch::BranchAdapter;
use crate::events::{BranchEvent, BranchEventKind, BranchId};
use crate::request::{GenerateRequest, RequestError};
use crate::tracker::CompletionTracker;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the fan-in merger
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeConfig {
    /// Longest the merge loop waits on the channel before re-checking
    /// producer liveness
    pub poll_interval: Duration,
    /// Capacity of the shared event channel; producers wait when it is full
    pub channel_capacity: usize,
    /// Fail a branch whose backend stays silent this long
    pub idle_timeout: Option<Duration>,
    /// Maximum number of models per request; `None` accepts any number
    pub max_models: Option<usize>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            channel_capacity: 256,
            idle_timeout: None,
            max_models: None,
        }
    }
}

/// Counters for one merged stream, reported when it finishes
#[derive(Debug, Default)]
struct MergeStats {
    fragments: u64,
    completed: usize,
    failed: usize,
    /// Events dropped because their branch was already terminal
    discarded: u64,
}

// ============================================================================
// Fan-In
// ============================================================================

/// Spawns branch producers and hands back the merged stream
pub struct FanIn {
    backend: Arc<dyn ChatBackend>,
    config: MergeConfig,
    shutdown: watch::Sender<bool>,
}

impl FanIn {
    /// Create a merger over a backend
    pub fn new(backend: Arc<dyn ChatBackend>, config: MergeConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            backend,
            config,
            shutdown,
        }
    }

    /// End every merged stream, in flight or started later
    ///
    /// Producers are aborted and each stream finishes without further events.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Whether [`FanIn::shutdown`] has been called
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Get the current configuration
    #[must_use]
    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Start every branch of a request and return the merged event stream
    ///
    /// The request is validated first; an invalid request spawns nothing.
    /// Must be called from within a Tokio runtime.
    pub fn merge(&self, request: &GenerateRequest) -> Result<MergedStream, RequestError> {
        request.validate(self.config.max_models)?;

        let request_id = Uuid::new_v4();
        let total = request.branch_count();
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));

        let mut producers = JoinSet::new();
        let mut branches = HashMap::with_capacity(total);
        let mut abort_handles = Vec::with_capacity(total);

        for (index, model) in request.models.iter().enumerate() {
            let branch = BranchId(index);
            let adapter = BranchAdapter::new(
                branch,
                model.clone(),
                request.prompt.clone(),
                Arc::clone(&self.backend),
            )
            .with_idle_timeout(self.config.idle_timeout);

            let span = info_span!("branch", %request_id, %branch, model = %model);
            let handle = producers.spawn(produce(adapter, tx.clone()).instrument(span));
            branches.insert(handle.id(), (branch, model.clone()));
            abort_handles.push(handle);
        }

        // Producers hold the only senders; the channel closes when they all end
        drop(tx);

        info!(
            %request_id,
            branches = total,
            models = ?request.models,
            "Fan-in started"
        );

        let merge_loop = MergeLoop {
            request_id,
            receiver: rx,
            shutdown: self.shutdown.subscribe(),
            tracker: Arc::new(CompletionTracker::new()),
            producers,
            branches,
            total,
            poll_interval: self.config.poll_interval,
            synthesized: VecDeque::new(),
            stats: MergeStats::default(),
            started_at: Instant::now(),
            finished: false,
        };

        Ok(MergedStream {
            request_id,
            total,
            tracker: Arc::clone(&merge_loop.tracker),
            abort_handles,
            inner: merge_loop.into_stream(),
        })
    }
}

/// Producer task body: drain one adapter into the shared channel
async fn produce(adapter: BranchAdapter, tx: mpsc::Sender<BranchEvent>) {
    let mut events = std::pin::pin!(adapter.into_stream());
    while let Some(event) = events.next().await {
        // Waits for capacity rather than dropping
        if tx.send(event).await.is_err() {
            debug!("Merge loop gone, stopping producer");
            return;
        }
    }
}

// ============================================================================
// Merge loop
// ============================================================================

struct MergeLoop {
    request_id: Uuid,
    receiver: mpsc::Receiver<BranchEvent>,
    shutdown: watch::Receiver<bool>,
    tracker: Arc<CompletionTracker>,
    producers: JoinSet<()>,
    /// Producer task id to the branch it runs
    branches: HashMap<tokio::task::Id, (BranchId, String)>,
    total: usize,
    poll_interval: Duration,
    /// Error events standing in for producers that died without a terminal event
    synthesized: VecDeque<BranchEvent>,
    stats: MergeStats,
    started_at: Instant,
    finished: bool,
}

impl MergeLoop {
    fn into_stream(self) -> BoxStream<'static, BranchEvent> {
        futures::stream::unfold(self, |mut merge_loop| async move {
            merge_loop
                .next_event()
                .await
                .map(|event| (event, merge_loop))
        })
        .boxed()
    }

    async fn next_event(&mut self) -> Option<BranchEvent> {
        loop {
            if self.finished {
                return None;
            }

            if self.tracker.is_complete(self.total) {
                self.finish();
                return None;
            }

            let polled = tokio::select! {
                biased;
                () = shutdown_requested(&mut self.shutdown) => None,
                polled = tokio::time::timeout(self.poll_interval, self.receiver.recv()) => Some(polled),
            };
            let Some(polled) = polled else {
                warn!(
                    request_id = %self.request_id,
                    terminal = self.tracker.count(),
                    total = self.total,
                    "Shutting down, ending fan-in early"
                );
                self.finish();
                return None;
            };

            match polled {
                Ok(Some(event)) => {
                    if let Some(event) = self.accept(event) {
                        return Some(event);
                    }
                }
                Ok(None) => {
                    // Every producer dropped its sender; collect how they ended
                    while let Some(result) = self.producers.join_next().await {
                        self.record_exit(result);
                    }
                    if let Some(event) = self.take_synthesized() {
                        return Some(event);
                    }
                    if !self.tracker.is_complete(self.total) {
                        warn!(
                            request_id = %self.request_id,
                            terminal = self.tracker.count(),
                            total = self.total,
                            "Event channel closed before every branch reported a terminal event"
                        );
                    }
                    self.finish();
                    return None;
                }
                Err(_) => {
                    while let Some(result) = self.producers.try_join_next() {
                        self.record_exit(result);
                    }
                    if let Some(event) = self.take_synthesized() {
                        return Some(event);
                    }
                    if self.producers.is_empty() && self.receiver.is_empty() {
                        warn!(
                            request_id = %self.request_id,
                            terminal = self.tracker.count(),
                            total = self.total,
                            "All producers finished without full terminal count, ending stream"
                        );
                        self.finish();
                        return None;
                    }
                }
            }
        }
    }

    /// Update the tracker for a dequeued event; `None` if it must not be forwarded
    fn accept(&mut self, event: BranchEvent) -> Option<BranchEvent> {
        if self.tracker.is_terminal(event.branch) {
            self.stats.discarded += 1;
            warn!(
                request_id = %self.request_id,
                branch = %event.branch,
                model = %event.model,
                "Discarding event after branch terminal"
            );
            return None;
        }

        match &event.kind {
            BranchEventKind::Fragment { .. } => self.stats.fragments += 1,
            BranchEventKind::Done => self.stats.completed += 1,
            BranchEventKind::Error { .. } => self.stats.failed += 1,
        }

        if event.is_terminal() {
            self.tracker.mark_terminal(event.branch);
            debug!(
                request_id = %self.request_id,
                branch = %event.branch,
                model = %event.model,
                terminal = self.tracker.count(),
                total = self.total,
                "Branch terminal"
            );
        }

        Some(event)
    }

    /// Queue an error for a producer that died before its branch was terminal
    ///
    /// Only called once the channel is drained, so the stand-in error lands
    /// after everything the dead branch managed to send.
    fn record_exit(&mut self, result: Result<(), tokio::task::JoinError>) {
        let Err(e) = result else {
            return;
        };

        let Some((branch, model)) = self.branches.get(&e.id()).cloned() else {
            return;
        };

        if self.tracker.is_terminal(branch) {
            return;
        }

        warn!(
            request_id = %self.request_id,
            %branch,
            model = %model,
            error = %e,
            "Branch producer exited abnormally"
        );
        let reason = if e.is_panic() {
            "branch task panicked"
        } else {
            "branch task was cancelled"
        };
        self.synthesized
            .push_back(BranchEvent::error(branch, model, reason));
    }

    fn take_synthesized(&mut self) -> Option<BranchEvent> {
        while let Some(event) = self.synthesized.pop_front() {
            if let Some(event) = self.accept(event) {
                return Some(event);
            }
        }
        None
    }

    fn finish(&mut self) {
        self.finished = true;
        self.producers.abort_all();

        info!(
            request_id = %self.request_id,
            branches = self.total,
            completed = self.stats.completed,
            failed = self.stats.failed,
            fragments = self.stats.fragments,
            discarded = self.stats.discarded,
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            "Fan-in finished"
        );
    }
}

/// Resolves once the owning [`FanIn`] is shut down
async fn shutdown_requested(signal: &mut watch::Receiver<bool>) {
    if signal.wait_for(|stopped| *stopped).await.is_err() {
        // The FanIn is gone without shutting down; let the stream run out
        std::future::pending::<()>().await;
    }
}

// ============================================================================
// Merged stream
// ============================================================================

/// The merged, consumer-facing event stream of one request
///
/// Dropping it cancels every producer that is still running.
pub struct MergedStream {
    request_id: Uuid,
    total: usize,
    tracker: Arc<CompletionTracker>,
    abort_handles: Vec<AbortHandle>,
    inner: BoxStream<'static, BranchEvent>,
}

impl MergedStream {
    /// Identifier used in logs for this request
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Number of branches in the request
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    /// The shared completion tracker
    #[must_use]
    pub fn tracker(&self) -> &Arc<CompletionTracker> {
        &self.tracker
    }

    /// Number of producer tasks that have not finished yet
    #[must_use]
    pub fn active_producers(&self) -> usize {
        self.abort_handles
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Stop every producer; the stream yields nothing afterwards
    pub fn cancel(&mut self) {
        for handle in &self.abort_handles {
            handle.abort();
        }
        self.inner = futures::stream::empty().boxed();
        info!(
            request_id = %self.request_id,
            terminal = self.tracker.count(),
            total = self.total,
            "Fan-in cancelled"
        );
    }
}

impl Stream for MergedStream {
    type Item = BranchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for MergedStream {
    fn drop(&mut self) {
        if !self.tracker.is_complete(self.total) {
            debug!(
                request_id = %self.request_id,
                terminal = self.tracker.count(),
                total = self.total,
                "Merged stream dropped early, aborting producers"
            );
        }
        for handle in &self.abort_handles {
            handle.abort();
        }
    }
}
