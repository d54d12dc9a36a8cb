//! The reconciliation control plane.
//!
//! One `NodeSync` value drives the whole consistency seam between
//! configuration, the node fleet and per-node block inventory. Each tick
//! runs, in order:
//!
//! 1. config check (throttled): reload `ClusterInfo` on signature change
//! 2. spec refresh: rebuild the spec universe from table definitions
//! 3. inventory: pull each worker's residency, reconcile against the
//!    repo, batch-expire stale blocks, reset node sizes, publish each
//!    node's health verdict into the cluster snapshot
//! 4. assignment: place every `NEW` spec on the least-loaded worker
//! 5. dispatch: send ingestion tasks for specs needing sync and fold the
//!    replies back into spec state
//!
//! The repo is only touched on this task between RPC boundaries; fan-out
//! phases gather results first and reconcile sequentially after the join
//! barrier.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use nebula_client::{ClientError, NodeConnector};
use nebula_common::NebulaResult;
use nebula_ingest::assign::NodeLoad;
use nebula_ingest::{BlockExpire, SourceScanner, SpecRepo, Task, TaskState};
use nebula_meta::{BlockSummary, ConfigLoader, NodeId};

use crate::runtime::Runtime;

/// Consecutive state-RPC failures that demote a node to inactive.
const NODE_INACTIVE_THRESHOLD: u32 = 2;

/// Options for the reconciliation loop.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Cluster config location (`local` path or `s3://` URI).
    pub conf_uri: String,
    /// Tick interval.
    pub interval: Duration,
    /// Minimum spacing between config signature checks.
    pub conf_check_interval: Duration,
}

/// What one tick did; emitted as the per-tick metric and used by tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Tick ordinal, starting at 1.
    pub tick: u64,
    /// Workers whose state RPC succeeded.
    pub nodes_talked: usize,
    /// Workers whose state RPC failed.
    pub nodes_failed: usize,
    /// Expiration tasks dispatched.
    pub expire_tasks: usize,
    /// Blocks covered by those expirations.
    pub expired_blocks: usize,
    /// Ingestion tasks dispatched.
    pub ingest_tasks: usize,
    /// Wall time of the tick in milliseconds.
    pub elapsed_ms: u64,
}

/// Per-node health per the registry policy: two consecutive state-RPC
/// failures demote to inactive, one success reinstates. The verdict is
/// mirrored into the cluster snapshot via `Runtime::mark_health` so the
/// query path shares the same active set.
#[derive(Debug, Default)]
struct HealthTracker {
    failures: HashMap<NodeId, u32>,
}

impl HealthTracker {
    fn is_active(&self, id: &NodeId) -> bool {
        self.failures
            .get(id)
            .is_none_or(|f| *f < NODE_INACTIVE_THRESHOLD)
    }

    /// Returns true when this failure newly demotes the node.
    fn record_failure(&mut self, id: &NodeId) -> bool {
        let count = self.failures.entry(id.clone()).or_insert(0);
        *count += 1;
        *count == NODE_INACTIVE_THRESHOLD
    }

    fn record_success(&mut self, id: &NodeId) {
        self.failures.remove(id);
    }

    /// Drops tracking for nodes no longer configured.
    fn retain(&mut self, configured: &HashSet<NodeId>) {
        self.failures.retain(|id, _| configured.contains(id));
    }
}

/// The reconciliation scheduler and its state.
pub struct NodeSync {
    runtime: Arc<Runtime>,
    connector: Arc<dyn NodeConnector>,
    scanner: Arc<dyn SourceScanner>,
    loader: ConfigLoader,
    options: SyncOptions,
    repo: SpecRepo,
    health: HealthTracker,
    tick: u64,
    last_conf_check: Option<Instant>,
}

impl NodeSync {
    /// Creates the scheduler.
    pub fn new(
        runtime: Arc<Runtime>,
        connector: Arc<dyn NodeConnector>,
        scanner: Arc<dyn SourceScanner>,
        loader: ConfigLoader,
        options: SyncOptions,
    ) -> Self {
        Self {
            runtime,
            connector,
            scanner,
            loader,
            options,
            repo: SpecRepo::new(),
            health: HealthTracker::default(),
            tick: 0,
            last_conf_check: None,
        }
    }

    /// Read access to the spec repository (scheduler-thread readers and
    /// tests; the query path never touches it).
    #[must_use]
    pub fn repo(&self) -> &SpecRepo {
        &self.repo
    }

    /// Runs ticks until `shutdown` fires; drains the current tick first.
    ///
    /// Only fatal invariant violations escape: the caller logs and
    /// terminates so an orchestrator can restart cleanly.
    pub async fn run(mut self, shutdown: Arc<Notify>) -> NebulaResult<()> {
        loop {
            let started = Instant::now();
            match self.tick().await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "fatal invariant violation, stopping scheduler");
                    return Err(e);
                }
                Err(e) => warn!(error = %e, "tick failed"),
            }

            // An overlong tick starts the next one immediately; ticks are
            // never queued.
            let wait = self.options.interval.saturating_sub(started.elapsed());
            tokio::select! {
                _ = shutdown.notified() => {
                    info!("scheduler stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Runs one full reconciliation tick.
    pub async fn tick(&mut self) -> NebulaResult<TickReport> {
        let started = Instant::now();
        self.tick += 1;
        let mut report = TickReport {
            tick: self.tick,
            ..TickReport::default()
        };

        self.check_config();
        let ci = self.runtime.cluster();

        let configured: HashSet<NodeId> = ci.workers().map(|n| n.id.clone()).collect();
        self.health.retain(&configured);
        let active: Vec<NodeId> = ci
            .workers()
            .filter(|n| n.is_active())
            .map(|n| n.id.clone())
            .filter(|id| self.health.is_active(id))
            .collect();

        // Refresh the spec universe; specs on inactive nodes demote here.
        self.repo.refresh(&ci, &active, self.scanner.as_ref())?;

        // Inventory fan-out across all configured workers: inactive ones
        // are probed too so a single success can reinstate them.
        let inventory = self.gather_inventory(&configured).await;

        // Reconcile sequentially: claim current blocks, collect expired
        // ones, reset node sizes from inventory.
        let mut loads: Vec<NodeLoad> = Vec::new();
        let mut expirations: Vec<(NodeId, BlockExpire)> = Vec::new();
        let mut current_blocks: Vec<BlockSummary> = Vec::new();
        for (id, result) in inventory {
            match result {
                Err(e) => {
                    report.nodes_failed += 1;
                    if self.health.record_failure(&id) {
                        warn!(node = %id, error = %e, "node demoted to inactive");
                        self.connector.evict(&id);
                    } else {
                        warn!(node = %id, error = %e, "node state failed");
                    }
                    // Publish the verdict so snapshot readers (the query
                    // fan-out) stop dialling a demoted node.
                    self.runtime.mark_health(&id, self.health.is_active(&id));
                }
                Ok(blocks) => {
                    self.health.record_success(&id);
                    self.runtime.mark_health(&id, true);
                    report.nodes_talked += 1;

                    let mut size = 0u64;
                    let mut expired: BTreeSet<String> = BTreeSet::new();
                    for block in blocks {
                        if self.repo.assign(&block.spec, &id) {
                            size += block.raw_bytes;
                            current_blocks.push(block);
                        } else {
                            expired.insert(block.spec);
                        }
                    }
                    if !expired.is_empty() {
                        report.expired_blocks += expired.len();
                        expirations
                            .push((id.clone(), BlockExpire::new(expired.into_iter().collect())));
                    }
                    loads.push(NodeLoad { id, size });
                }
            }
        }
        self.runtime.update_table_metrics(current_blocks.iter());

        // One batched expiration task per node.
        report.expire_tasks = expirations.len();
        self.dispatch_expirations(expirations).await;

        // Balance every NEW spec across the nodes that answered, then
        // dispatch ingestion for everything needing sync this tick.
        self.repo.assign_nodes(loads);
        report.ingest_tasks = self.dispatch_ingestions().await?;

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(tick = report.tick, elapsed_ms = report.elapsed_ms, "tick elapsed");
        if report.ingest_tasks > 0 || report.expire_tasks > 0 {
            info!(
                tick = report.tick,
                tasks = report.ingest_tasks,
                expires = report.expire_tasks,
                nodes = report.nodes_talked,
                elapsed_ms = report.elapsed_ms,
                "node sync tick"
            );
        }
        Ok(report)
    }

    /// Throttled config check; failures keep the previous snapshot.
    fn check_config(&mut self) {
        if let Some(last) = self.last_conf_check {
            if last.elapsed() < self.options.conf_check_interval {
                return;
            }
        }
        self.last_conf_check = Some(Instant::now());

        match self.loader.load(&self.options.conf_uri) {
            Ok(Some(ci)) => self.runtime.publish(ci),
            Ok(None) => {}
            Err(e) => warn!(uri = %self.options.conf_uri, error = %e, "config load failed"),
        }
    }

    /// Pulls residency from every configured worker in parallel.
    async fn gather_inventory(
        &self,
        configured: &HashSet<NodeId>,
    ) -> Vec<(NodeId, Result<Vec<BlockSummary>, ClientError>)> {
        let mut join = JoinSet::new();
        for id in configured {
            let id = id.clone();
            let connector = Arc::clone(&self.connector);
            let fanout = self.runtime.fanout();
            join.spawn(async move {
                let _permit = fanout.acquire_owned().await;
                let result = async {
                    let client = connector.make_client(&id).await?;
                    client.state().await?;
                    client.blocks().await
                }
                .await;
                (id, result)
            });
        }

        let mut results = Vec::with_capacity(configured.len());
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(e) => warn!(error = %e, "inventory task panicked"),
            }
        }
        // Deterministic reconcile order regardless of completion order.
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    async fn dispatch_expirations(&self, expirations: Vec<(NodeId, BlockExpire)>) {
        let mut join = JoinSet::new();
        for (id, expire) in expirations {
            let connector = Arc::clone(&self.connector);
            let fanout = self.runtime.fanout();
            let count = expire.specs.len();
            join.spawn(async move {
                let _permit = fanout.acquire_owned().await;
                let result = async {
                    let client = connector.make_client(&id).await?;
                    client.task(Task::expiration(expire)).await
                }
                .await;
                (id, count, result)
            });
        }

        while let Some(joined) = join.join_next().await {
            let Ok((id, count, result)) = joined else {
                continue;
            };
            match result {
                Ok(state) => info!(node = %id, blocks = count, state = %state, "expire dispatched"),
                // Blocks still resident re-enter the expired list next tick.
                Err(e) => warn!(node = %id, error = %e, "expire dispatch failed"),
            }
        }
    }

    /// Sends ingestion tasks for every spec needing sync; folds replies
    /// into the repo. Returns the number of tasks sent.
    async fn dispatch_ingestions(&mut self) -> NebulaResult<usize> {
        let pending = self.repo.pending_sync(self.tick);
        if pending.is_empty() {
            return Ok(0);
        }

        let mut join = JoinSet::new();
        let mut sent = 0usize;
        for (signature, node) in pending {
            let Some(spec) = self.repo.get(&signature) else {
                continue;
            };
            let task = Task::ingestion(spec);
            self.repo.record_sent(&signature, self.tick);
            sent += 1;

            let connector = Arc::clone(&self.connector);
            let fanout = self.runtime.fanout();
            join.spawn(async move {
                let _permit = fanout.acquire_owned().await;
                let result = async {
                    let client = connector.make_client(&node).await?;
                    client.task(task).await
                }
                .await;
                (signature, node, result)
            });
        }

        while let Some(joined) = join.join_next().await {
            let Ok((signature, node, result)) = joined else {
                continue;
            };
            match result {
                Ok(state) => self.repo.record_ingest_reply(&signature, state, true)?,
                Err(e) => {
                    warn!(node = %node, signature = %signature, error = %e, "ingestion dispatch failed");
                    self.repo
                        .record_ingest_reply(&signature, TaskState::Failed, e.established())?;
                }
            }
        }
        Ok(sent)
    }
}

impl std::fmt::Debug for NodeSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSync")
            .field("tick", &self.tick)
            .field("specs", &self.repo.len())
            .finish()
    }
}
