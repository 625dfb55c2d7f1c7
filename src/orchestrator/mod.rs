//! The orchestrator: work queues, bounded worker pools, statistics,
//! checkpoint/restore and graceful shutdown.
//!
//! All mutable state lives behind one standard mutex that is never held
//! across an await point. Workers are tokio tasks; when one finishes it
//! re-enters the lock through a completion callback and dispatches the next
//! item. Space reclamation is scheduled whenever the torrent queue drains
//! and is serialized against itself by a dedicated async mutex.

pub mod checkpoint;
pub mod space;

use crate::config::Config;
use crate::error::{ShuttleError, ShuttleResult};
use crate::finish::Finisher;
use crate::links::LinkResolver;
use crate::pathmap::PathMapper;
use crate::qbit::QbitPool;
use crate::relocate::{ImportContext, Relocator};
use crate::stats::{ServiceStats, StatsSnapshot};
use crate::tags::{CopyRequest, ReconcileReport, TagSummary, TaggingEngine};
use crate::tautulli::TautulliClient;
use crate::types::{
    CopyOperation, CopyState, DescriptorParams, Infohash, ProcessRecord, QueueItem,
    TorrentDescriptor, RESTORED_PRIORITY,
};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Non-running torrent process records kept for status reporting.
const PROCESS_HISTORY: usize = 10;
/// Non-running copy operation records kept for status reporting.
const COPY_HISTORY: usize = 20;
/// How long graceful shutdown waits for the pools to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
const DRAIN_POLL: Duration = Duration::from_millis(250);

#[derive(Default)]
struct OrchState {
    torrent_queue: Vec<QueueItem>,
    running: HashMap<Uuid, ProcessRecord>,
    recent: VecDeque<ProcessRecord>,
    copy_queue: Vec<CopyOperation>,
    running_copies: HashMap<Uuid, CopyOperation>,
    recent_copies: VecDeque<CopyOperation>,
}

/// Service-level fields of the status snapshot.
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub uptime_seconds: f64,
    pub dry_run: bool,
    pub shutting_down: bool,
}

#[derive(Debug, Serialize)]
pub struct ProcessingStatus {
    pub queued: usize,
    pub running: usize,
    pub max_concurrent: usize,
}

#[derive(Debug, Serialize)]
pub struct CopyPoolStatus {
    pub queued: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    pub max_concurrent: usize,
}

/// Full `/status` snapshot.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub service: ServiceInfo,
    pub processing: ProcessingStatus,
    pub copy: CopyPoolStatus,
    pub stats: StatsSnapshot,
    pub processes: Vec<ProcessRecord>,
}

/// `/copy-operations/status` snapshot, optionally narrowed to one batch.
#[derive(Debug, Serialize)]
pub struct CopyStatusReport {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub operations: Vec<CopyOperation>,
}

/// The persistent scheduler at the heart of the daemon.
pub struct Orchestrator {
    config: Arc<Config>,
    qbit: QbitPool,
    finisher: Finisher,
    relocator: Relocator,
    tagging: TaggingEngine,
    import: Option<ImportContext>,
    state: Mutex<OrchState>,
    stats: ServiceStats,
    shutdown: AtomicBool,
    space_pending: AtomicBool,
    space_serial: tokio::sync::Mutex<()>,
}

impl Orchestrator {
    pub fn new(config: Arc<Config>) -> ShuttleResult<Arc<Self>> {
        let import = if config.import_mode.enabled {
            match TautulliClient::new(&config.tautulli) {
                Ok(oracle) => Some(ImportContext {
                    oracle,
                    mapper: PathMapper::new(&config.import_mode.plex_path_mappings),
                    resolver: LinkResolver::new(config.import_mode.library_roots()),
                }),
                Err(e) => {
                    warn!(error = %e, "import mode enabled but oracle unusable; eviction will skip");
                    None
                }
            }
        } else {
            None
        };

        Ok(Arc::new(Self {
            qbit: QbitPool::new(config.qbit.clone()),
            finisher: Finisher::from_config(&config)?,
            relocator: Relocator::from_config(&config),
            tagging: TaggingEngine::from_config(&config),
            import,
            state: Mutex::new(OrchState::default()),
            stats: ServiceStats::new(),
            shutdown: AtomicBool::new(false),
            space_pending: AtomicBool::new(false),
            space_serial: tokio::sync::Mutex::new(()),
            config,
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> &ServiceStats {
        &self.stats
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Torrent queue
    // =========================================================================

    /// Accept a completion notification. Builds a complete descriptor from
    /// the params when given, else a minimal hash-only descriptor that the
    /// worker hydrates.
    pub fn enqueue_torrent(
        self: &Arc<Self>,
        hash: Infohash,
        params: Option<DescriptorParams>,
        priority: i64,
    ) -> ShuttleResult<Uuid> {
        if self.is_shutting_down() {
            return Err(ShuttleError::ShuttingDown);
        }

        let descriptor = match params {
            Some(p) => TorrentDescriptor::from_params(hash, p),
            None => TorrentDescriptor::minimal(hash),
        };
        let item = QueueItem::new(descriptor, priority);
        let id = item.id;

        {
            let mut state = self.state.lock().expect("orchestrator lock poisoned");
            state.torrent_queue.push(item);
            state.torrent_queue.sort_by(|a, b| a.cmp_order(b));
        }
        self.stats.touch_activity();
        debug!(queue_id = %id, priority, "torrent enqueued");
        self.dispatch();
        Ok(id)
    }

    /// Drain the pending torrent queue; running work is unaffected.
    pub fn clear_queue(&self) -> usize {
        let mut state = self.state.lock().expect("orchestrator lock poisoned");
        let cleared = state.torrent_queue.len();
        state.torrent_queue.clear();
        info!(cleared, "pending queue cleared");
        cleared
    }

    /// Pop and launch work while capacity remains. When this pass empties
    /// the queue, one space-reclamation run is scheduled.
    fn dispatch(self: &Arc<Self>) {
        if self.is_shutting_down() {
            return;
        }
        let mut launched = 0usize;
        let drained = {
            let mut state = self.state.lock().expect("orchestrator lock poisoned");
            while state.running.len() < self.config.processing.max_concurrent_processes {
                // Never two workers for one hash: items whose hash is
                // already running stay queued, in order, until it finishes.
                let next = state.torrent_queue.iter().position(|item| {
                    !state
                        .running
                        .values()
                        .any(|rec| item.descriptor.hash.matches(&rec.hash))
                });
                let Some(index) = next else {
                    break;
                };
                let item = state.torrent_queue.remove(index);
                let record = ProcessRecord::running(item.id, item.descriptor.hash.as_str());
                state.running.insert(item.id, record);
                launched += 1;

                let orchestrator = Arc::clone(self);
                tokio::spawn(async move {
                    orchestrator.run_torrent_worker(item).await;
                });
            }
            state.torrent_queue.is_empty()
        };
        if launched > 0 {
            debug!(launched, "dispatched torrent workers");
            self.stats.touch_activity();
            if drained {
                self.schedule_space_run();
            }
        }
    }

    /// Worker body: check out the client, run the completion pipeline, then
    /// report back through the completion callback.
    async fn run_torrent_worker(self: Arc<Self>, item: QueueItem) {
        let hash = item.descriptor.hash.clone();
        let result = match self.qbit.get().await {
            Ok(qbit) => self.finisher.finish(&qbit, &item.descriptor).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(path) => info!(hash = %hash, dst = %path.display(), "torrent processed"),
            Err(e) => error!(hash = %hash, error = %e, "torrent processing failed"),
        }
        self.complete_torrent(item.id, result.map(|p| p.display().to_string()));
    }

    /// Completion callback: transition the record exactly once, trim
    /// history, account, dispatch the next item.
    fn complete_torrent(self: &Arc<Self>, id: Uuid, result: Result<String, ShuttleError>) {
        {
            let mut state = self.state.lock().expect("orchestrator lock poisoned");
            let Some(mut record) = state.running.remove(&id) else {
                warn!(process_id = %id, "completion for unknown process record");
                return;
            };
            match &result {
                Ok(path) => record.finish(true, Some(path.clone())),
                Err(e) => record.finish(false, Some(e.to_string())),
            }
            state.recent.push_back(record);
            while state.recent.len() > PROCESS_HISTORY {
                state.recent.pop_front();
            }
        }
        if result.is_ok() {
            self.stats.record_torrent_processed();
        }
        self.stats.touch_activity();
        self.dispatch();
    }

    // =========================================================================
    // Copy queue
    // =========================================================================

    /// Queue a batch of verified copies. Returns the batch id callers poll,
    /// or None for an empty request set.
    pub fn enqueue_copy_batch(
        self: &Arc<Self>,
        requests: Vec<CopyRequest>,
    ) -> ShuttleResult<Option<Uuid>> {
        if self.is_shutting_down() {
            return Err(ShuttleError::ShuttingDown);
        }
        if requests.is_empty() {
            return Ok(None);
        }

        let batch_id = Uuid::new_v4();
        {
            let mut state = self.state.lock().expect("orchestrator lock poisoned");
            for req in requests {
                state.copy_queue.push(CopyOperation::queued(
                    batch_id,
                    req.hash.as_str(),
                    &req.name,
                    req.src,
                    req.dst,
                    req.size,
                    req.is_multi_file,
                ));
            }
        }
        info!(batch_id = %batch_id, "copy batch enqueued");
        self.dispatch_copies();
        Ok(Some(batch_id))
    }

    fn dispatch_copies(self: &Arc<Self>) {
        if self.is_shutting_down() {
            return;
        }
        let mut state = self.state.lock().expect("orchestrator lock poisoned");
        while state.running_copies.len() < self.config.processing.max_concurrent_copy_operations
            && !state.copy_queue.is_empty()
        {
            let mut op = state.copy_queue.remove(0);
            op.start();
            let id = op.id;
            state.running_copies.insert(id, op.clone());

            let orchestrator = Arc::clone(self);
            tokio::spawn(async move {
                orchestrator.run_copy_worker(op).await;
            });
        }
    }

    async fn run_copy_worker(self: Arc<Self>, op: CopyOperation) {
        let engine = crate::copy::CopyEngine::from_config(&self.config.processing);
        let result = engine
            .copy_verified(
                &op.src,
                &op.dst,
                op.is_multi_file,
                self.config.processing.copy_retry_attempts,
            )
            .await;

        // A successful bulk copy promotes the torrent to dual-location.
        let result = match result {
            Ok(()) if !engine.dry_run() => self.tag_after_copy(&op).await,
            other => other,
        };

        match &result {
            Ok(()) => info!(copy_id = %op.id, dst = %op.dst.display(), "copy completed"),
            Err(e) => warn!(copy_id = %op.id, error = %e, "copy failed"),
        }
        self.complete_copy(op.id, result);
    }

    async fn tag_after_copy(&self, op: &CopyOperation) -> ShuttleResult<()> {
        let hash: Infohash = op.hash.parse()?;
        let qbit = self.qbit.get().await?;
        qbit.add_tags(&hash, self.tagging.bulk_tag()).await
    }

    fn complete_copy(self: &Arc<Self>, id: Uuid, result: ShuttleResult<()>) {
        {
            let mut state = self.state.lock().expect("orchestrator lock poisoned");
            let Some(mut op) = state.running_copies.remove(&id) else {
                warn!(copy_id = %id, "completion for unknown copy operation");
                return;
            };
            match &result {
                Ok(()) => op.finish(true, None),
                Err(e) => op.finish(false, Some(e.to_string())),
            }
            state.recent_copies.push_back(op);
            while state.recent_copies.len() > COPY_HISTORY {
                state.recent_copies.pop_front();
            }
        }
        match result {
            Ok(()) => self.stats.record_copy_completed(),
            Err(_) => self.stats.record_copy_failed(),
        }
        self.stats.touch_activity();
        self.dispatch_copies();
    }

    // =========================================================================
    // Tagging operations
    // =========================================================================

    pub async fn tag_summary(&self) -> ShuttleResult<TagSummary> {
        let qbit = self.qbit.get().await?;
        self.tagging.summary(&qbit).await
    }

    /// Reconcile existing torrents' tags, enqueueing bulk copies for
    /// cache-resident torrents without a bulk copy. Returns the report plus
    /// the batch id of any enqueued copies.
    pub async fn reconcile_tags(
        self: &Arc<Self>,
        dry_run: bool,
    ) -> ShuttleResult<(ReconcileReport, Option<Uuid>)> {
        let qbit = self.qbit.get().await?;
        let report = self.tagging.reconcile_existing(&qbit, dry_run).await?;
        let batch_id = if dry_run {
            None
        } else {
            self.enqueue_copy_batch(report.copies_needed.clone())?
        };
        Ok((report, batch_id))
    }

    // =========================================================================
    // Space reclamation scheduling
    // =========================================================================

    /// Schedule one reclamation run unless one is already pending or the
    /// service is shutting down. Returns whether a run was scheduled.
    pub fn schedule_space_run(self: &Arc<Self>) -> bool {
        if self.is_shutting_down() {
            return false;
        }
        if self
            .space_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("space reclamation already pending");
            return false;
        }
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            // Serialized with any in-flight run.
            let _serial = orchestrator.space_serial.lock().await;
            orchestrator.space_pending.store(false, Ordering::SeqCst);
            orchestrator.run_space_reclamation().await;
        });
        true
    }

    pub(crate) fn relocator(&self) -> &Relocator {
        &self.relocator
    }

    pub(crate) fn import_context(&self) -> Option<&ImportContext> {
        self.import.as_ref()
    }

    pub(crate) fn qbit_pool(&self) -> &QbitPool {
        &self.qbit
    }

    // =========================================================================
    // Status
    // =========================================================================

    pub fn status(&self) -> StatusReport {
        let state = self.state.lock().expect("orchestrator lock poisoned");
        let stats = self.stats.snapshot();
        let mut processes: Vec<ProcessRecord> = state.running.values().cloned().collect();
        processes.extend(state.recent.iter().cloned());

        StatusReport {
            service: ServiceInfo {
                name: "torrent-shuttle",
                version: env!("CARGO_PKG_VERSION"),
                uptime_seconds: crate::types::unix_now() - stats.service_start_time,
                dry_run: self.config.processing.dry_run,
                shutting_down: self.is_shutting_down(),
            },
            processing: ProcessingStatus {
                queued: state.torrent_queue.len(),
                running: state.running.len(),
                max_concurrent: self.config.processing.max_concurrent_processes,
            },
            copy: CopyPoolStatus {
                queued: state.copy_queue.len(),
                running: state.running_copies.len(),
                completed: stats.copies_completed,
                failed: stats.copies_failed,
                max_concurrent: self.config.processing.max_concurrent_copy_operations,
            },
            stats,
            processes,
        }
    }

    pub fn copy_status(&self, batch_id: Option<Uuid>) -> CopyStatusReport {
        let state = self.state.lock().expect("orchestrator lock poisoned");
        let matches = |op: &CopyOperation| batch_id.map_or(true, |b| op.batch_id == b);

        let mut operations: Vec<CopyOperation> = Vec::new();
        operations.extend(state.copy_queue.iter().filter(|op| matches(op)).cloned());
        operations.extend(
            state
                .running_copies
                .values()
                .filter(|op| matches(op))
                .cloned(),
        );
        operations.extend(state.recent_copies.iter().filter(|op| matches(op)).cloned());

        let count = |s: CopyState| operations.iter().filter(|op| op.state == s).count();
        CopyStatusReport {
            queued: count(CopyState::Queued),
            running: count(CopyState::Running),
            completed: count(CopyState::Completed),
            failed: count(CopyState::Failed),
            operations,
        }
    }

    // =========================================================================
    // Checkpoint / restore / shutdown
    // =========================================================================

    /// Serialize the pending queue and running set to disk.
    pub fn save_checkpoint(&self) -> ShuttleResult<()> {
        let (queue_items, running_processes) = {
            let state = self.state.lock().expect("orchestrator lock poisoned");
            let queue_items = state
                .torrent_queue
                .iter()
                .map(|item| checkpoint::CheckpointQueueItem {
                    id: item.id,
                    torrent_data: item.descriptor.clone(),
                    queued_time: item.enqueue_time,
                    priority: item.priority,
                })
                .collect();
            let running_processes = state
                .running
                .values()
                .map(|rec| checkpoint::CheckpointProcess {
                    id: rec.id,
                    torrent_hash: rec.hash.clone(),
                    start_time: rec.start_time,
                    status: rec.state,
                    result: rec.result.clone(),
                })
                .collect();
            (queue_items, running_processes)
        };
        let snapshot = checkpoint::Checkpoint::new(queue_items, running_processes, self.stats.snapshot());
        checkpoint::save(&self.config.paths.state_dir, &snapshot)?;
        Ok(())
    }

    /// Restore a checkpoint if a valid one exists. Every previously RUNNING
    /// record is re-enqueued at restored priority with a fresh enqueue time;
    /// monotonic counters are restored; the checkpoint file is deleted on
    /// success and dispatch begins.
    pub fn restore_checkpoint(self: &Arc<Self>) -> ShuttleResult<usize> {
        let snapshot = match checkpoint::load(&self.config.paths.state_dir) {
            Ok(Some(s)) => s,
            Ok(None) => return Ok(0),
            Err(e) => {
                warn!(error = %e, "ignoring unusable checkpoint");
                return Ok(0);
            }
        };

        let mut restored = 0usize;
        {
            let mut state = self.state.lock().expect("orchestrator lock poisoned");
            for item in snapshot.queue_items {
                state.torrent_queue.push(QueueItem {
                    id: item.id,
                    descriptor: item.torrent_data,
                    enqueue_time: item.queued_time,
                    priority: item.priority,
                });
                restored += 1;
            }
            for proc in snapshot.running_processes {
                let hash: Infohash = match proc.torrent_hash.parse() {
                    Ok(h) => h,
                    Err(e) => {
                        warn!(hash = %proc.torrent_hash, error = %e, "dropping restored record with bad hash");
                        continue;
                    }
                };
                state.torrent_queue.push(QueueItem::new(
                    TorrentDescriptor::minimal(hash),
                    RESTORED_PRIORITY,
                ));
                restored += 1;
            }
            state.torrent_queue.sort_by(|a, b| a.cmp_order(b));
        }
        self.stats.restore_counters(&snapshot.statistics);
        checkpoint::delete(&self.config.paths.state_dir)?;
        info!(restored, "checkpoint restored, resuming dispatch");
        self.dispatch();
        Ok(restored)
    }

    /// Graceful shutdown: refuse new work, checkpoint, wait for the pools to
    /// drain, log out of the torrent client.
    pub async fn shutdown(self: &Arc<Self>) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down: refusing new work");

        if let Err(e) = self.save_checkpoint() {
            error!(error = %e, "failed to save shutdown checkpoint");
        }

        let deadline = Instant::now() + DRAIN_TIMEOUT;
        loop {
            let (running, copies) = {
                let state = self.state.lock().expect("orchestrator lock poisoned");
                (state.running.len(), state.running_copies.len())
            };
            if running == 0 && copies == 0 {
                break;
            }
            if Instant::now() >= deadline {
                warn!(running, copies, "drain timeout; abandoning in-flight work");
                break;
            }
            sleep(DRAIN_POLL).await;
        }

        self.qbit.close().await;
        info!("shutdown complete");
    }
}
