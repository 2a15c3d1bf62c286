//! Bus consumer that feeds ERP events through the [`MessageProcessor`].
//!
//! Lifecycle:
//!
//! ```text
//! Disconnected → Connecting → Subscribed → Running → Stopping → Disconnected
//! ```
//!
//! While running, each `(topic, partition)` gets its own lane: a task that
//! processes that partition's messages one at a time, in offset order. A
//! semaphore caps how many lanes work at once. Per-message failures end at
//! the dispatch boundary as a log line; only bus faults and panics stop the
//! worker.
//!
//! Every message that reaches an outcome (applied, unchanged or dropped) is
//! acknowledged back to the source. When the worker stops, each lane finishes
//! the message it is working on and abandons the rest of its queue: abandoned
//! messages are logged, never acknowledged, and so redelivered after restart.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{Notify, Semaphore, mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use larder_core::{SyncError, SyncResult};
use larder_events::{Envelope, MessageSource, RawMessage, Topic, UnknownTopic};

use crate::config::WorkerConfig;
use crate::external::catalog::CatalogApi;
use crate::processor::{MessageProcessor, Outcome};

/// Consumer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Disconnected,
    Connecting,
    Subscribed,
    Running,
    Stopping,
}

impl WorkerState {
    /// Whether `self → next` is a legal lifecycle step.
    ///
    /// Startup failures go through `Stopping` so the connection is always
    /// closed on the way back to `Disconnected`.
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Subscribed)
                | (Connecting, Stopping)
                | (Subscribed, Running)
                | (Subscribed, Stopping)
                | (Running, Stopping)
                | (Stopping, Disconnected)
        )
    }
}

/// Worker tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncWorkerConfig {
    /// Lanes allowed to process a message at the same time.
    pub concurrency: usize,
    /// Messages buffered per lane before the consume loop waits.
    pub lane_capacity: usize,
}

impl Default for SyncWorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            lane_capacity: 64,
        }
    }
}

impl From<&WorkerConfig> for SyncWorkerConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            ..Default::default()
        }
    }
}

/// Message counters, reported when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Messages on a known topic handed to a lane.
    pub received: u64,
    /// Messages that produced an accepted catalog update.
    pub applied: u64,
    /// Valid messages with nothing to write.
    pub unchanged: u64,
    /// Messages dropped after a logged failure.
    pub dropped: u64,
    /// Messages from topics this worker does not handle.
    pub ignored: u64,
    /// Messages read but left unprocessed when the worker stopped.
    pub abandoned: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    applied: AtomicU64,
    unchanged: AtomicU64,
    dropped: AtomicU64,
    ignored: AtomicU64,
    abandoned: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            unchanged: self.unchanged.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Requests a graceful stop of a running [`SyncWorker`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<Notify>);

impl ShutdownHandle {
    /// Stop dispatching; in-flight and queued messages still finish.
    pub fn trigger(&self) {
        self.0.notify_one();
    }
}

/// Read-only view of a worker's counters from outside its task.
#[derive(Debug, Clone)]
pub struct StatsHandle(Arc<Counters>);

impl StatsHandle {
    pub fn snapshot(&self) -> WorkerStats {
        self.0.snapshot()
    }
}

/// The consumer, owned by one supervising task.
pub struct SyncWorker<S, C> {
    source: S,
    processor: Arc<MessageProcessor<C>>,
    config: SyncWorkerConfig,
    shutdown: Arc<Notify>,
    state: watch::Sender<WorkerState>,
    stats: Arc<Counters>,
}

impl<S, C> SyncWorker<S, C>
where
    S: MessageSource,
    C: CatalogApi + 'static,
{
    pub fn new(source: S, processor: MessageProcessor<C>, config: SyncWorkerConfig) -> Self {
        let (state, _) = watch::channel(WorkerState::Disconnected);
        Self {
            source,
            processor: Arc::new(processor),
            config,
            shutdown: Arc::new(Notify::new()),
            state,
            stats: Arc::new(Counters::default()),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Observe state changes (e.g. to wait until the worker is `Running`).
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown.clone())
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.snapshot()
    }

    pub fn stats_handle(&self) -> StatsHandle {
        StatsHandle(self.stats.clone())
    }

    /// Connect, subscribe and consume until shutdown or a consumer-level fault.
    ///
    /// Always ends `Disconnected`. Returns `SyncError::Fatal` when the bus
    /// failed or a lane panicked; the caller is expected to exit.
    pub async fn run(&mut self) -> SyncResult<WorkerStats> {
        let mut lanes = Lanes::new(self.processor.clone(), self.stats.clone(), &self.config);

        let outcome = match self.start().await {
            Ok(()) => self.consume(&mut lanes).await,
            Err(err) => {
                error!(error = %err, "failed to start consumer");
                Err(SyncError::fatal(format!("failed to start consumer: {err}")))
            }
        };

        self.transition(WorkerState::Stopping);
        let lane_fault = lanes.drain().await;
        while let Ok(done) = lanes.finished.try_recv() {
            self.acknowledge(done).await;
        }
        if let Err(err) = self.source.close().await {
            warn!(error = %err, "error while closing message source");
        }
        self.transition(WorkerState::Disconnected);

        let stats = self.stats.snapshot();
        info!(
            received = stats.received,
            applied = stats.applied,
            unchanged = stats.unchanged,
            dropped = stats.dropped,
            ignored = stats.ignored,
            abandoned = stats.abandoned,
            "sync worker stopped"
        );

        match (outcome, lane_fault) {
            (Err(err), _) | (Ok(()), Some(err)) => Err(err),
            (Ok(()), None) => Ok(stats),
        }
    }

    async fn start(&mut self) -> Result<(), larder_events::BusError> {
        self.transition(WorkerState::Connecting);
        self.source.connect().await?;
        self.source.subscribe(&Topic::ALL).await?;
        self.transition(WorkerState::Subscribed);
        info!(
            topics = ?Topic::ALL.map(|t| t.name()),
            concurrency = self.config.concurrency,
            "subscribed to ERP topics"
        );
        self.transition(WorkerState::Running);
        Ok(())
    }

    async fn consume(&mut self, lanes: &mut Lanes<C>) -> SyncResult<()> {
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => {
                    info!("shutdown requested");
                    return Ok(());
                }
                // Lanes only end on their own when they fault.
                Some(joined) = lanes.tasks.join_next(), if !lanes.tasks.is_empty() => {
                    return Err(lane_fault(joined));
                }
                Some(done) = lanes.finished.recv() => self.acknowledge(done).await,
                next = self.source.next_message() => match next {
                    Ok(Some(raw)) => lanes.route(raw).await?,
                    Ok(None) => {
                        info!("message source closed");
                        return Ok(());
                    }
                    Err(err) if err.is_recoverable() => {
                        warn!(error = %err, "transient consumer error");
                    }
                    Err(err) => {
                        error!(error = %err, "consumer fault");
                        return Err(SyncError::fatal(err.to_string()));
                    }
                },
            }
        }
    }

    async fn acknowledge(&mut self, done: Finished) {
        let Finished {
            topic,
            partition,
            offset,
        } = done;
        if let Err(err) = self.source.acknowledge(&topic, partition, offset).await {
            warn!(%topic, partition, offset, error = %err, "failed to acknowledge message");
        }
    }

    fn transition(&self, next: WorkerState) {
        let current = self.state();
        if !current.can_transition_to(next) {
            warn!(from = ?current, to = ?next, "unexpected worker state transition");
        }
        info!(from = ?current, to = ?next, "worker state changed");
        self.state.send_replace(next);
    }
}

type LaneKey = (Topic, i32);

/// Bus position of a message that reached its outcome.
#[derive(Debug)]
struct Finished {
    topic: String,
    partition: i32,
    offset: i64,
}

/// Handles shared by every lane.
struct LaneContext<C> {
    processor: Arc<MessageProcessor<C>>,
    stats: Arc<Counters>,
    permits: Arc<Semaphore>,
    stopping: Arc<AtomicBool>,
    finished: mpsc::UnboundedSender<Finished>,
}

impl<C> Clone for LaneContext<C> {
    fn clone(&self) -> Self {
        Self {
            processor: self.processor.clone(),
            stats: self.stats.clone(),
            permits: self.permits.clone(),
            stopping: self.stopping.clone(),
            finished: self.finished.clone(),
        }
    }
}

impl<C> LaneContext<C> {
    fn finish(&self, topic: &str, partition: i32, offset: i64) {
        // The receiver outlives every lane; a failed send means the worker is gone.
        let _ = self.finished.send(Finished {
            topic: topic.to_string(),
            partition,
            offset,
        });
    }

    fn abandon(&self, envelope: &Envelope) {
        Counters::bump(&self.stats.abandoned);
        warn!(
            topic = %envelope.topic(),
            partition = envelope.partition(),
            offset = envelope.offset(),
            "message left unprocessed; it will be redelivered"
        );
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }
}

/// Per-partition processing lanes.
struct Lanes<C> {
    context: LaneContext<C>,
    capacity: usize,
    senders: HashMap<LaneKey, mpsc::Sender<Envelope>>,
    tasks: JoinSet<SyncResult<()>>,
    finished: mpsc::UnboundedReceiver<Finished>,
}

impl<C: CatalogApi + 'static> Lanes<C> {
    fn new(
        processor: Arc<MessageProcessor<C>>,
        stats: Arc<Counters>,
        config: &SyncWorkerConfig,
    ) -> Self {
        let (finished_tx, finished) = mpsc::unbounded_channel();
        Self {
            context: LaneContext {
                processor,
                stats,
                permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
                stopping: Arc::new(AtomicBool::new(false)),
                finished: finished_tx,
            },
            capacity: config.lane_capacity.max(1),
            senders: HashMap::new(),
            tasks: JoinSet::new(),
            finished,
        }
    }

    async fn route(&mut self, raw: RawMessage) -> SyncResult<()> {
        let (partition, offset) = (raw.partition, raw.offset);
        match Envelope::try_from(raw) {
            Ok(envelope) => {
                Counters::bump(&self.context.stats.received);
                self.dispatch(envelope).await
            }
            Err(UnknownTopic(topic)) => {
                Counters::bump(&self.context.stats.ignored);
                warn!(%topic, partition, offset, "ignoring message from unknown topic");
                self.context.finish(&topic, partition, offset);
                Ok(())
            }
        }
    }

    async fn dispatch(&mut self, envelope: Envelope) -> SyncResult<()> {
        let key = (envelope.topic(), envelope.partition());

        let tx = match self.senders.entry(key) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let (tx, rx) = mpsc::channel(self.capacity);
                self.tasks.spawn(run_lane(key, rx, self.context.clone()));
                debug!(topic = %key.0, partition = key.1, "lane opened");
                entry.insert(tx)
            }
        };

        if let Err(mpsc::error::SendError(envelope)) = tx.send(envelope).await {
            self.context.abandon(&envelope);
            return Err(SyncError::fatal(format!(
                "lane {}/{} is no longer running",
                key.0, key.1
            )));
        }
        Ok(())
    }

    /// Stop every lane after its in-flight message and report the first fault.
    async fn drain(&mut self) -> Option<SyncError> {
        self.context.stopping.store(true, Ordering::Release);
        self.senders.clear();

        let mut fault = None;
        while let Some(joined) = self.tasks.join_next().await {
            if !matches!(joined, Ok(Ok(()))) {
                let err = lane_fault(joined);
                fault.get_or_insert(err);
            }
        }
        fault
    }
}

fn lane_fault(joined: Result<SyncResult<()>, JoinError>) -> SyncError {
    match joined {
        Ok(Err(err)) => err,
        Ok(Ok(())) => SyncError::fatal("processing lane exited unexpectedly"),
        Err(err) if err.is_panic() => {
            error!(error = %err, "processing lane panicked");
            SyncError::fatal(format!("processing lane panicked: {err}"))
        }
        Err(err) => SyncError::fatal(format!("processing lane aborted: {err}")),
    }
}

async fn run_lane<C: CatalogApi + 'static>(
    key: LaneKey,
    mut rx: mpsc::Receiver<Envelope>,
    context: LaneContext<C>,
) -> SyncResult<()> {
    let (topic, partition) = key;

    while let Some(envelope) = rx.recv().await {
        let Ok(_permit) = context.permits.acquire().await else {
            break;
        };
        if context.is_stopping() {
            context.abandon(&envelope);
            continue;
        }

        let offset = envelope.offset();
        // Each message gets its own task so a panic is confined to it.
        let processing = tokio::spawn(handle_envelope(
            context.processor.clone(),
            context.stats.clone(),
            envelope,
        ));

        match processing.await {
            Ok(()) => context.finish(topic.name(), partition, offset),
            Err(err) => {
                Counters::bump(&context.stats.dropped);
                error!(
                    %topic,
                    partition,
                    offset,
                    error = %err,
                    "dropping message: processing panicked"
                );
                context.finish(topic.name(), partition, offset);

                rx.close();
                while let Some(queued) = rx.recv().await {
                    context.abandon(&queued);
                }
                return Err(SyncError::fatal(format!(
                    "processing lane {topic}/{partition} panicked: {err}"
                )));
            }
        }
    }

    debug!(%topic, partition, "lane closed");
    Ok(())
}

/// Dispatch boundary: every per-message error stops here.
async fn handle_envelope<C: CatalogApi>(
    processor: Arc<MessageProcessor<C>>,
    stats: Arc<Counters>,
    envelope: Envelope,
) {
    let payload = match envelope.decode_json() {
        Ok(payload) => payload,
        Err(err) => {
            Counters::bump(&stats.dropped);
            warn!(
                topic = %envelope.topic(),
                partition = envelope.partition(),
                offset = envelope.offset(),
                error = %err,
                payload = %envelope.payload_lossy(),
                "dropping message: payload is not valid JSON"
            );
            return;
        }
    };

    let result = processor.process(envelope.topic(), &payload).await;
    match &result {
        Ok(Outcome::Updated(_)) => Counters::bump(&stats.applied),
        Ok(Outcome::NoChanges { .. }) => Counters::bump(&stats.unchanged),
        Err(_) => Counters::bump(&stats.dropped),
    }
    report(&envelope, &result);
}

fn report(envelope: &Envelope, result: &SyncResult<Outcome>) {
    let topic = envelope.topic();
    let partition = envelope.partition();
    let offset = envelope.offset();

    match result {
        Ok(Outcome::Updated(summary)) => info!(
            %topic,
            partition,
            offset,
            product_id = %summary.product_id,
            sku = ?summary.sku.as_ref().map(|s| s.as_str()),
            changed_fields = ?summary.patch.changed_fields(),
            price = ?summary.patch.price,
            stock = ?summary.patch.stock,
            "catalog product updated"
        ),
        Ok(Outcome::NoChanges { sku, .. }) => debug!(
            %topic,
            partition,
            offset,
            sku = ?sku.as_ref().map(|s| s.as_str()),
            "event carried no changes"
        ),
        Err(err @ SyncError::Validation(_)) => warn!(
            %topic,
            partition,
            offset,
            error = %err,
            payload = %envelope.payload_lossy(),
            "dropping message: validation failed"
        ),
        Err(err @ SyncError::NotFound(_)) => warn!(
            %topic,
            partition,
            offset,
            error = %err,
            "dropping message: product not found"
        ),
        Err(err) => error!(
            %topic,
            partition,
            offset,
            kind = err.kind(),
            error = %err,
            payload = %envelope.payload_lossy(),
            "dropping message: catalog update failed"
        ),
    }
}
