use crate::catalog::Catalog;
use crate::catalog::schema::{IndexDescriptor, TableSchema};
use crate::config::SidxConfig;
use crate::error::SidxError;
use crate::storage::base::{PartitionRemoval, RowChange, TableData};
use crate::storage::view::{ViewBatch, ViewBatchSink, ViewMutation};
use crate::view::ViewTarget;
use crate::view::batch::{TableWalk, ViewBatcher, next_rows};
use crate::view::builder::{
    BuildEntry, build_entry, mutation_for_removed_row, mutations_for_change, oversized_value,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One entry of the pending view-work log.
#[derive(Debug)]
pub enum ViewWork {
    RowChanged(RowChange),
    RowsRemoved(PartitionRemoval),
    /// Populate a new index from a snapshot of its table taken at creation.
    BuildIndex {
        descriptor: IndexDescriptor,
        schema: TableSchema,
        table: TableData,
    },
    /// Resolved once everything queued before it has been processed.
    Barrier(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct MaintainerTelemetry {
    work_items_enqueued: AtomicU64,
    work_items_processed: AtomicU64,
    batches_applied: AtomicU64,
    batch_retries: AtomicU64,
    batches_abandoned: AtomicU64,
    mutations_applied: AtomicU64,
    oversized_values_skipped: AtomicU64,
    indexes_built: AtomicU64,
    queue_full_rejections: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaintainerMetrics {
    pub work_items_enqueued: u64,
    pub work_items_processed: u64,
    pub batches_applied: u64,
    pub batch_retries: u64,
    pub batches_abandoned: u64,
    pub mutations_applied: u64,
    pub oversized_values_skipped: u64,
    pub indexes_built: u64,
    pub queue_full_rejections: u64,
}

/// Room for one item in the view-work log, claimed before the base write
/// it belongs to. Dropping it unused gives the room back.
pub struct WorkSlot {
    permit: mpsc::OwnedPermit<ViewWork>,
    telemetry: Arc<MaintainerTelemetry>,
}

impl WorkSlot {
    pub fn send(self, work: ViewWork) {
        let _ = self.permit.send(work);
        self.telemetry
            .work_items_enqueued
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Background task that drains the view-work log into backing views.
pub struct ViewMaintainer {
    tx: Mutex<Option<mpsc::Sender<ViewWork>>>,
    capacity: usize,
    handle: Mutex<Option<JoinHandle<()>>>,
    telemetry: Arc<MaintainerTelemetry>,
    last_failure: Arc<Mutex<Option<SidxError>>>,
}

impl ViewMaintainer {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn(
        catalog: Arc<RwLock<Catalog>>,
        sink: Arc<dyn ViewBatchSink>,
        config: Arc<SidxConfig>,
    ) -> Result<Self, SidxError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| SidxError::Unavailable {
            message: format!("view maintainer needs a tokio runtime: {e}"),
        })?;
        let capacity = config.max_pending_view_work.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let telemetry = Arc::new(MaintainerTelemetry::default());
        let last_failure = Arc::new(Mutex::new(None));
        let worker = Worker {
            catalog,
            sink,
            config,
            telemetry: Arc::clone(&telemetry),
            last_failure: Arc::clone(&last_failure),
        };
        let handle = runtime.spawn(worker.run(rx));
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            capacity,
            handle: Mutex::new(Some(handle)),
            telemetry,
            last_failure,
        })
    }

    fn sender(&self) -> Result<mpsc::Sender<ViewWork>, SidxError> {
        self.tx.lock().clone().ok_or_else(|| SidxError::Unavailable {
            message: "view maintainer is shut down".into(),
        })
    }

    /// Claims room for one work item without waiting. A full log is reported
    /// as [`SidxError::QueueFull`] so callers can back off and retry.
    pub fn reserve(&self) -> Result<WorkSlot, SidxError> {
        let permit = self.sender()?.try_reserve_owned().map_err(|err| match err {
            TrySendError::Full(_) => {
                self.telemetry
                    .queue_full_rejections
                    .fetch_add(1, Ordering::Relaxed);
                SidxError::QueueFull {
                    capacity: self.capacity,
                }
            }
            TrySendError::Closed(_) => SidxError::Unavailable {
                message: "view maintainer stopped".into(),
            },
        })?;
        Ok(WorkSlot {
            permit,
            telemetry: Arc::clone(&self.telemetry),
        })
    }

    pub fn enqueue(&self, work: ViewWork) -> Result<(), SidxError> {
        self.reserve()?.send(work);
        Ok(())
    }

    /// Waits until every work item queued before this call has been applied
    /// or abandoned. Unlike writes, the barrier waits for room in the log.
    pub async fn quiesce(&self) -> Result<(), SidxError> {
        let tx = self.sender()?;
        let (done_tx, done_rx) = oneshot::channel();
        tx.send(ViewWork::Barrier(done_tx))
            .await
            .map_err(|_| SidxError::Unavailable {
                message: "view maintainer stopped".into(),
            })?;
        drop(tx);
        self.telemetry
            .work_items_enqueued
            .fetch_add(1, Ordering::Relaxed);
        done_rx.await.map_err(|_| SidxError::Unavailable {
            message: "view maintainer stopped before reaching barrier".into(),
        })
    }

    pub fn metrics(&self) -> MaintainerMetrics {
        let t = &self.telemetry;
        MaintainerMetrics {
            work_items_enqueued: t.work_items_enqueued.load(Ordering::Relaxed),
            work_items_processed: t.work_items_processed.load(Ordering::Relaxed),
            batches_applied: t.batches_applied.load(Ordering::Relaxed),
            batch_retries: t.batch_retries.load(Ordering::Relaxed),
            batches_abandoned: t.batches_abandoned.load(Ordering::Relaxed),
            mutations_applied: t.mutations_applied.load(Ordering::Relaxed),
            oversized_values_skipped: t.oversized_values_skipped.load(Ordering::Relaxed),
            indexes_built: t.indexes_built.load(Ordering::Relaxed),
            queue_full_rejections: t.queue_full_rejections.load(Ordering::Relaxed),
        }
    }

    /// Most recent batch that ran out of retries.
    pub fn last_failure(&self) -> Option<SidxError> {
        self.last_failure.lock().clone()
    }

    /// Stops accepting work, drains what is queued and waits for the worker.
    pub async fn shutdown(&self) {
        drop(self.tx.lock().take());
        let handle = self.handle.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            warn!(error = %err, "view maintainer task ended abnormally");
        }
    }
}

struct Worker {
    catalog: Arc<RwLock<Catalog>>,
    sink: Arc<dyn ViewBatchSink>,
    config: Arc<SidxConfig>,
    telemetry: Arc<MaintainerTelemetry>,
    last_failure: Arc<Mutex<Option<SidxError>>>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<ViewWork>) {
        let max = self.config.view_batch_max_mutations.max(1);
        let mut carried: Option<ViewWork> = None;
        loop {
            let work = match carried.take() {
                Some(work) => work,
                None => match rx.recv().await {
                    Some(work) => work,
                    None => break,
                },
            };
            match work {
                ViewWork::RowChanged(change) => {
                    // Coalesce consecutive row changes into shared batches.
                    let mut batcher = ViewBatcher::new(max);
                    let mut processed = 1;
                    self.stage_change(&mut batcher, &change).await;
                    while batcher.pending_mutations() < max {
                        match rx.try_recv() {
                            Ok(ViewWork::RowChanged(next)) => {
                                processed += 1;
                                self.stage_change(&mut batcher, &next).await;
                            }
                            Ok(other) => {
                                carried = Some(other);
                                break;
                            }
                            Err(_) => break,
                        }
                    }
                    for batch in batcher.drain() {
                        self.apply_with_retry(batch).await;
                    }
                    self.telemetry
                        .work_items_processed
                        .fetch_add(processed, Ordering::Relaxed);
                }
                ViewWork::RowsRemoved(removal) => {
                    self.process_removal(&removal).await;
                    self.processed();
                }
                ViewWork::BuildIndex {
                    descriptor,
                    schema,
                    table,
                } => {
                    self.build_index(&descriptor, &schema, &table).await;
                    self.processed();
                }
                ViewWork::Barrier(done) => {
                    let _ = done.send(());
                    self.processed();
                }
            }
        }
        debug!("view maintainer stopped");
    }

    fn processed(&self) {
        self.telemetry
            .work_items_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Views of every index on the table, building or ready, as the catalog
    /// knows them now.
    fn targets_for(&self, keyspace: &str, table_name: &str) -> Vec<ViewTarget> {
        let catalog = self.catalog.read();
        let Ok(schema) = catalog.table(keyspace, table_name) else {
            return Vec::new();
        };
        catalog
            .list_for_table(keyspace, table_name)
            .iter()
            .filter_map(|descriptor| match ViewTarget::new(descriptor, schema) {
                Ok(target) => Some(target),
                Err(err) => {
                    warn!(index = %descriptor.name, error = %err, "skipping index with unusable layout");
                    None
                }
            })
            .collect()
    }

    async fn stage_change(&self, batcher: &mut ViewBatcher, change: &RowChange) {
        let limit = self.config.max_indexed_value_bytes;
        for target in self.targets_for(&change.keyspace, &change.table_name) {
            // Changes queued before the index existed skipped the commit-time
            // size check. The stale entry is still removed.
            let oversized = change
                .new
                .as_ref()
                .and_then(|row| oversized_value(&target, row, limit));
            if let Some((column, size)) = &oversized {
                self.telemetry
                    .oversized_values_skipped
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    index = %target.index_name,
                    column = %column,
                    size,
                    limit,
                    "skipping row whose indexed value exceeds the key size limit"
                );
            }
            for mutation in mutations_for_change(&target, change) {
                if oversized.is_some() && matches!(mutation, ViewMutation::Upsert { .. }) {
                    continue;
                }
                if let Some(full) = batcher.push(&target, mutation) {
                    self.apply_with_retry(full).await;
                }
            }
        }
    }

    async fn process_removal(&self, removal: &PartitionRemoval) {
        let targets = self.targets_for(&removal.keyspace, &removal.table_name);
        if targets.is_empty() {
            return;
        }
        let max = self.config.view_batch_max_mutations.max(1);
        debug!(
            table = %removal.table_name,
            rows = removal.len(),
            "removing view entries for deleted rows"
        );
        let mut after = None;
        loop {
            let (rows, last) = next_rows(&removal.removed, after, max);
            if rows.is_empty() {
                break;
            }
            let mut batcher = ViewBatcher::new(max);
            for stored in &rows {
                for target in &targets {
                    let Some(mutation) = mutation_for_removed_row(
                        target,
                        removal.position.token,
                        stored,
                        removal.write_ts,
                    ) else {
                        continue;
                    };
                    if let Some(full) = batcher.push(target, mutation) {
                        self.apply_with_retry(full).await;
                    }
                }
            }
            for batch in batcher.drain() {
                self.apply_with_retry(batch).await;
            }
            after = last;
            tokio::task::yield_now().await;
        }
    }

    async fn build_index(&self, descriptor: &IndexDescriptor, schema: &TableSchema, table: &TableData) {
        let target = match ViewTarget::new(descriptor, schema) {
            Ok(target) => target,
            Err(err) => {
                error!(index = %descriptor.name, error = %err, "cannot build index");
                return;
            }
        };
        let max = self.config.view_batch_max_mutations.max(1);
        let limit = self.config.max_indexed_value_bytes;
        info!(
            keyspace = %descriptor.keyspace,
            index = %descriptor.name,
            rows = table.row_count(),
            "building index"
        );
        let mut walk = TableWalk::default();
        while !walk.is_done() {
            let chunk = walk.next_chunk(table, max);
            let mut batch = ViewBatch {
                keyspace: target.keyspace.clone(),
                view: target.view.clone(),
                generation: target.generation,
                mutations: Vec::with_capacity(chunk.len()),
            };
            for (position, stored) in &chunk {
                match build_entry(&target, position.token, stored, limit) {
                    BuildEntry::Mutation(mutation) => batch.mutations.push(mutation),
                    BuildEntry::Skipped => {}
                    BuildEntry::Oversized { column, size } => {
                        self.telemetry
                            .oversized_values_skipped
                            .fetch_add(1, Ordering::Relaxed);
                        warn!(
                            index = %descriptor.name,
                            column = %column,
                            size,
                            limit,
                            "skipping row whose indexed value exceeds the key size limit"
                        );
                    }
                }
            }
            if !batch.mutations.is_empty() && !self.apply_with_retry(batch).await {
                error!(index = %descriptor.name, "index build abandoned; index stays unavailable");
                return;
            }
            tokio::task::yield_now().await;
        }
        let ready = self.catalog.write().mark_index_ready(
            &descriptor.keyspace,
            &descriptor.name,
            descriptor.generation,
        );
        if ready {
            self.telemetry.indexes_built.fetch_add(1, Ordering::Relaxed);
            info!(keyspace = %descriptor.keyspace, index = %descriptor.name, "index ready");
        } else {
            debug!(index = %descriptor.name, "index dropped or replaced during build");
        }
    }

    /// Applies `batch` with the same boundaries until it succeeds or runs out
    /// of retries. Returns whether it was applied.
    async fn apply_with_retry(&self, batch: ViewBatch) -> bool {
        let max_retries = self.config.view_batch_max_retries;
        let backoff = self.config.view_batch_retry_backoff_ms;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.sink.apply_batch(&batch) {
                Ok(applied) => {
                    self.telemetry.batches_applied.fetch_add(1, Ordering::Relaxed);
                    self.telemetry
                        .mutations_applied
                        .fetch_add(applied as u64, Ordering::Relaxed);
                    return true;
                }
                Err(err) if attempt <= max_retries => {
                    self.telemetry.batch_retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        view = %batch.view,
                        attempt,
                        mutations = batch.mutations.len(),
                        error = %err,
                        "view batch failed; retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff.saturating_mul(attempt as u64)))
                        .await;
                }
                Err(err) => {
                    self.telemetry
                        .batches_abandoned
                        .fetch_add(1, Ordering::Relaxed);
                    let failure = SidxError::BatchWriteFailure {
                        view: batch.view.clone(),
                        attempts: attempt,
                        reason: err.to_string(),
                    };
                    error!(error = %failure, "abandoning view batch");
                    *self.last_failure.lock() = Some(failure);
                    return false;
                }
            }
        }
    }
}
