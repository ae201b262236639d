//! The builder loop: drives every tracked index build through its
//! lifecycle, one step per pass.
//!
//! A single driver task owns the passes; mutators arrive from arbitrary
//! tasks (RPC handlers, the health monitor, the catalog) and only touch
//! the in-memory table. Each pass snapshots the tracked build ids under a
//! read lock, sorts them ascending, releases the lock, and advances each
//! build -- so no RPC ever runs under the table lock.

pub mod stage;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::lock::SegmentLockService;
use crate::model::{IndexMeta, meta_path};
use crate::node::NodeManager;
use crate::store::MetaStore;

pub use stage::{BuildStage, initial_stage};

/// The index build scheduler.
///
/// A cheaply cloneable handle over the shared loop state. Construction
/// rebuilds the task table from the meta store and the current
/// live-worker set; [`start`](Self::start) then spawns the driver that
/// advances builds on a periodic tick and on coalesced wake-ups.
#[derive(Clone)]
pub struct IndexBuilder {
    inner: Arc<Inner>,
}

struct Inner {
    meta_store: Arc<dyn MetaStore>,
    node_manager: Arc<dyn NodeManager>,
    lock_service: Arc<dyn SegmentLockService>,
    config: SchedulerConfig,
    /// In-memory table: build id -> what to do with it next. The only
    /// shared mutable state; never held across an RPC.
    tasks: RwLock<HashMap<i64, BuildStage>>,
    /// Capacity-one wake channel. `notify` is lossy: a wake that cannot
    /// be delivered is dropped, and the tick guarantees progress anyway.
    wake_tx: mpsc::Sender<()>,
    wake_rx: Mutex<Option<mpsc::Receiver<()>>>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl IndexBuilder {
    /// Create the scheduler and rebuild its task table from the durable
    /// records and the live-worker set.
    pub async fn new(
        meta_store: Arc<dyn MetaStore>,
        node_manager: Arc<dyn NodeManager>,
        lock_service: Arc<dyn SegmentLockService>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let (wake_tx, wake_rx) = mpsc::channel(1);
        let task_capacity = config.task_capacity;
        let inner = Inner {
            meta_store,
            node_manager,
            lock_service,
            config,
            tasks: RwLock::new(HashMap::with_capacity(task_capacity)),
            wake_tx,
            wake_rx: Mutex::new(Some(wake_rx)),
            cancel: CancellationToken::new(),
            driver: Mutex::new(None),
        };
        inner.refresh().await?;
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Begin the background driver. Calling more than once is a no-op.
    pub fn start(&self) {
        let wake_rx = self
            .inner
            .wake_rx
            .lock()
            .expect("wake receiver lock poisoned")
            .take();
        let Some(wake_rx) = wake_rx else {
            warn!("builder loop already started");
            return;
        };
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.run(wake_rx).await });
        *self.inner.driver.lock().expect("driver handle lock poisoned") = Some(handle);
    }

    /// Cancel the driver and wait for its current pass to finish. Safe to
    /// call repeatedly; mutators called after this return become no-ops.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let driver = self
            .inner
            .driver
            .lock()
            .expect("driver handle lock poisoned")
            .take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                warn!(error = %e, "builder driver ended abnormally");
            }
        }
    }

    /// Track a new build at `Init` and wake the loop.
    ///
    /// A build that is already tracked keeps its current stage, so a
    /// duplicate submission can never restart an in-flight assignment.
    pub fn enqueue(&self, build_id: i64) {
        if self.inner.cancel.is_cancelled() {
            debug!(build_id, "builder stopped; ignoring enqueue");
            return;
        }
        {
            let mut tasks = self.inner.tasks.write().expect("task table lock poisoned");
            tasks.entry(build_id).or_insert(BuildStage::Init);
        }
        debug!(build_id, "build enqueued");
        self.inner.wake();
    }

    /// Mark a tracked build as removed by the catalog; the next pass
    /// releases any held lock and drops it.
    pub fn mark_deleted(&self, build_id: i64) {
        if self.inner.cancel.is_cancelled() {
            debug!(build_id, "builder stopped; ignoring deletion");
            return;
        }
        {
            let mut tasks = self.inner.tasks.write().expect("task table lock poisoned");
            if let Some(stage) = tasks.get_mut(&build_id) {
                *stage = BuildStage::Deleted;
            }
        }
        debug!(build_id, "build marked deleted");
        self.inner.wake();
    }

    /// React to a worker death: every tracked build assigned to the node
    /// that is not already being torn down moves to `Retry`.
    pub async fn node_down(&self, node_id: i64) {
        if self.inner.cancel.is_cancelled() {
            debug!(node_id, "builder stopped; ignoring node down");
            return;
        }
        let metas = match self.inner.meta_store.get_metas_by_node_id(node_id).await {
            Ok(metas) => metas,
            Err(e) => {
                error!(node_id, error = %e, "failed to load builds for dead node");
                return;
            }
        };
        {
            let mut tasks = self.inner.tasks.write().expect("task table lock poisoned");
            for meta in &metas {
                if let Some(stage) = tasks.get_mut(&meta.build_id) {
                    // Done still owes only its own cleanup; a deleted
                    // build must never be resurrected into a retry.
                    if !matches!(*stage, BuildStage::Done | BuildStage::Deleted) {
                        warn!(build_id = meta.build_id, node_id, "worker died; build will retry");
                        *stage = BuildStage::Retry;
                    }
                }
            }
        }
        self.inner.wake();
    }

    /// Reflect an externally-changed durable record into the table. Used
    /// when a worker reports progress: a terminal state moves the build
    /// to `Done`, anything else means the worker gave it back.
    pub fn update_state_by_meta(&self, meta: &IndexMeta) {
        if self.inner.cancel.is_cancelled() {
            debug!(build_id = meta.build_id, "builder stopped; ignoring state update");
            return;
        }
        {
            let mut tasks = self.inner.tasks.write().expect("task table lock poisoned");
            match tasks.get_mut(&meta.build_id) {
                None => {
                    warn!(
                        build_id = meta.build_id,
                        state = %meta.state,
                        "state update for untracked build; treating as already finalized"
                    );
                }
                Some(stage) if *stage == BuildStage::Deleted => {
                    debug!(build_id = meta.build_id, "build already deleted; keeping teardown");
                }
                Some(stage) => {
                    *stage = if meta.state.is_terminal() {
                        BuildStage::Done
                    } else {
                        BuildStage::Retry
                    };
                }
            }
        }
        self.inner.wake();
    }

    /// Whether the build is currently tracked.
    pub fn has_task(&self, build_id: i64) -> bool {
        self.stage(build_id).is_some()
    }

    /// Current stage of a tracked build.
    pub fn stage(&self, build_id: i64) -> Option<BuildStage> {
        self.inner.stage(build_id)
    }
}

impl Inner {
    // -----------------------------------------------------------------
    // Driver
    // -----------------------------------------------------------------

    async fn run(&self, mut wake_rx: mpsc::Receiver<()>) {
        let mut ticker = time::interval(self.config.schedule_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("builder loop started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
                wake = wake_rx.recv() => {
                    if wake.is_none() {
                        break;
                    }
                }
            }
            self.run_pass().await;
        }
        info!("builder loop stopped");
    }

    /// One pass: advance every tracked build by one step, in ascending
    /// build-id order.
    async fn run_pass(&self) {
        let mut build_ids: Vec<i64> = {
            let tasks = self.tasks.read().expect("task table lock poisoned");
            tasks.keys().copied().collect()
        };
        build_ids.sort_unstable();
        for build_id in build_ids {
            self.process(build_id).await;
        }
    }

    async fn process(&self, build_id: i64) {
        // Re-read: the build may have advanced or vanished since the
        // snapshot was taken.
        let Some(stage) = self.stage(build_id) else {
            return;
        };
        let meta = match self.meta_store.get_meta(build_id).await {
            Ok(meta) => meta,
            Err(e) => {
                error!(build_id, error = %e, "failed to load build record");
                return;
            }
        };
        match stage {
            BuildStage::Init => self.assign(build_id, meta).await,
            // Waiting on the worker's report or a node-down event.
            BuildStage::InProgress => {}
            BuildStage::Retry => self.release_and_reset(build_id, meta).await,
            BuildStage::Done => self.finalize(build_id, meta).await,
            BuildStage::Deleted => self.drop_deleted(build_id, meta).await,
        }
    }

    /// `Init`: pick a worker, record the assignment durably, pin the
    /// input segments, dispatch, and move the build to `InProgress`.
    ///
    /// Any failure after the durable version bump flips the build to
    /// `Retry`; the retry path releases whatever was acquired and resets
    /// the record, so the lock and version bookkeeping always reconverge.
    async fn assign(&self, build_id: i64, meta: Option<IndexMeta>) {
        let Some(meta) = meta else {
            warn!(build_id, "no durable record for build; dropping from table");
            self.remove_task(build_id);
            return;
        };
        let Some((node_id, worker)) = self.node_manager.peek_client(&meta).await else {
            warn!(build_id, "no worker available; will retry next pass");
            return;
        };
        if let Err(e) = self.meta_store.update_version(build_id, node_id).await {
            error!(build_id, node_id, error = %e, "failed to record assignment");
            return;
        }
        let version = meta.index_version + 1;
        if let Err(e) = self
            .lock_service
            .acquire_segment_ref_lock(build_id, node_id, &meta.request.segment_ids)
            .await
        {
            error!(build_id, node_id, error = %e, "failed to acquire segment lock");
            self.set_stage(build_id, BuildStage::Retry);
            return;
        }
        let mut request = meta.request.clone();
        request.build_id = build_id;
        request.version = version;
        request.meta_path = meta_path(&self.config.index_file_prefix, build_id);
        if let Err(e) = worker.create_index(request).await {
            error!(build_id, node_id, error = %e, "worker rejected build");
            self.set_stage(build_id, BuildStage::Retry);
            return;
        }
        if let Err(e) = self.meta_store.build_index(build_id).await {
            error!(build_id, node_id, error = %e, "failed to move build to in_progress");
            self.set_stage(build_id, BuildStage::Retry);
            return;
        }
        info!(build_id, node_id, version, "build dispatched");
        self.set_stage(build_id, BuildStage::InProgress);
    }

    /// `Retry`: release the previous attempt's lock if one is owed, reset
    /// the durable record, and queue the build for a fresh assignment.
    async fn release_and_reset(&self, build_id: i64, meta: Option<IndexMeta>) {
        let Some(meta) = meta else {
            warn!(build_id, "no durable record for retrying build; dropping from table");
            self.remove_task(build_id);
            return;
        };
        if meta.is_assigned() {
            if let Err(e) = self
                .lock_service
                .release_segment_ref_lock(build_id, meta.node_id)
                .await
            {
                error!(build_id, node_id = meta.node_id, error = %e, "failed to release segment lock");
                return;
            }
        }
        if let Err(e) = self.meta_store.reset_meta(build_id).await {
            error!(build_id, error = %e, "failed to reset build record");
            return;
        }
        info!(build_id, "build reset for reassignment");
        self.set_stage(build_id, BuildStage::Init);
        self.wake();
    }

    /// `Done`: release the lock, clear the durable assignment, and stop
    /// tracking the build. The durable record itself stays for the
    /// catalog to inspect or remove.
    async fn finalize(&self, build_id: i64, meta: Option<IndexMeta>) {
        let Some(meta) = meta else {
            warn!(build_id, "no durable record for finished build; dropping from table");
            self.remove_task(build_id);
            return;
        };
        if meta.is_assigned() {
            if let Err(e) = self
                .lock_service
                .release_segment_ref_lock(build_id, meta.node_id)
                .await
            {
                error!(build_id, node_id = meta.node_id, error = %e, "failed to release segment lock");
                return;
            }
            if let Err(e) = self.meta_store.reset_node_id(build_id).await {
                error!(build_id, error = %e, "failed to clear assigned node");
                return;
            }
        }
        info!(build_id, "build finalized");
        self.remove_task(build_id);
    }

    /// `Deleted`: release the lock if the record still shows an assigned
    /// node, then drop the build. Removing the durable record is the
    /// catalog's responsibility; tolerates the record already being gone.
    async fn drop_deleted(&self, build_id: i64, meta: Option<IndexMeta>) {
        if let Some(meta) = meta {
            if meta.is_assigned() {
                if let Err(e) = self
                    .lock_service
                    .release_segment_ref_lock(build_id, meta.node_id)
                    .await
                {
                    error!(build_id, node_id = meta.node_id, error = %e, "failed to release segment lock");
                    return;
                }
                if let Err(e) = self.meta_store.reset_node_id(build_id).await {
                    error!(build_id, error = %e, "failed to clear assigned node");
                    return;
                }
            }
        }
        info!(build_id, "deleted build dropped");
        self.remove_task(build_id);
    }

    // -----------------------------------------------------------------
    // Table plumbing
    // -----------------------------------------------------------------

    /// Rebuild the task table from the meta store and the live-worker
    /// set. The stage of every tracked build is a pure function of its
    /// record and that set, so rebuilding is idempotent.
    async fn refresh(&self) -> Result<()> {
        let metas = self
            .meta_store
            .get_all_index_meta()
            .await
            .context("failed to load build records for refresh")?;
        let live: HashSet<i64> = self.node_manager.live_node_ids().await.into_iter().collect();
        let mut tasks = self.tasks.write().expect("task table lock poisoned");
        tasks.clear();
        for meta in &metas {
            if let Some(stage) = initial_stage(meta, &live) {
                debug!(build_id = meta.build_id, stage = %stage, "recovered build");
                tasks.insert(meta.build_id, stage);
            }
        }
        info!(
            tracked = tasks.len(),
            records = metas.len(),
            "task table rebuilt from meta store"
        );
        Ok(())
    }

    fn stage(&self, build_id: i64) -> Option<BuildStage> {
        self.tasks
            .read()
            .expect("task table lock poisoned")
            .get(&build_id)
            .copied()
    }

    fn set_stage(&self, build_id: i64, stage: BuildStage) {
        let mut tasks = self.tasks.write().expect("task table lock poisoned");
        match tasks.get_mut(&build_id) {
            // A concurrent catalog deletion wins over in-flight progress.
            Some(current) if *current == BuildStage::Deleted => {}
            Some(current) => *current = stage,
            None => {}
        }
    }

    fn remove_task(&self, build_id: i64) {
        let mut tasks = self.tasks.write().expect("task table lock poisoned");
        tasks.remove(&build_id);
    }

    fn wake(&self) {
        // Lossy by design: a full channel means a pass is already queued.
        let _ = self.wake_tx.try_send(());
    }
}
