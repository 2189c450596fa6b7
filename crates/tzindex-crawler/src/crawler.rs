//! The crawler: follows the node's chain and drives the builder and the
//! index registry, one block at a time.
//!
//! # Init
//! Load the per-table tips, check the chain id, pull modules that ran ahead
//! back to the lowest tip, then resume from there (or from genesis).
//!
//! # Sync
//! Blocks arrive in height order from the lookahead [`Fetcher`]. Each block
//! that builds on the local tip is built and connected to every module.
//! A block that does not starts a rollback walk: local blocks are
//! disconnected until the node's branch and the local branch agree again,
//! and fetching restarts above the common ancestor.
//!
//! Forks that leave no next block to notice them are caught by a periodic
//! tip check: the node's head may drop below the local tip, or the node may
//! hold a different block at the tip height.
//!
//! # Stop
//! Cancellation is checked between blocks. A block being connected is
//! always finished before the crawler returns.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tzindex_codec::Block as RpcBlock;
use tzindex_core::{
    BlockSummary, BlockTracker, ChainBlock, CrawlerState, Cursor, IndexOptions, IndexRegistry,
    IndexerError, ReorgDetector, ReorgEvent, TaskQueue, TaskScheduler,
};
use tzindex_etl::model::Block;
use tzindex_etl::{BlockBuilder, Builder, LedgerStore, OffsetPolicy, Params};
use tzindex_rpc::{BlockHeaderInfo, BlockId, NodeApi, RetryPolicy};

use crate::config::CrawlerConfig;
use crate::event::CrawlerEvent;
use crate::fetcher::{with_deadline, Fetcher};
use crate::snapshot::SnapshotHook;
use crate::tasks;

/// Tasks a single block may queue before modules see enqueue errors.
const TASK_QUEUE_CAPACITY: usize = 16_384;
const EVENT_CAPACITY: usize = 1024;

/// Registry over the ledger block model and builder context.
pub type LedgerRegistry = IndexRegistry<Block, BlockBuilder>;

enum Step {
    Connected,
    /// The local tip is still on the node's branch.
    Unchanged,
    /// Local blocks were disconnected; fetching must restart above the tip.
    Rewound,
}

enum Next {
    Block(Option<Result<RpcBlock, IndexerError>>),
    CheckTip,
}

pub struct Crawler {
    config: CrawlerConfig,
    node: Arc<dyn NodeApi>,
    store: Arc<dyn LedgerStore>,
    builder: Builder,
    registry: LedgerRegistry,
    tasks: TaskQueue,
    snapshot: Option<Arc<dyn SnapshotHook>>,
    tracker: BlockTracker,
    detector: ReorgDetector,
    cursor: Cursor,
    policy: RetryPolicy,
    chain_id: String,
    finalized: bool,
    state: watch::Sender<CrawlerState>,
    events: broadcast::Sender<CrawlerEvent>,
    cancel: CancellationToken,
}

impl Crawler {
    /// `store` must expose the rows the registry's modules commit.
    pub fn new(
        config: CrawlerConfig,
        node: Arc<dyn NodeApi>,
        store: Arc<dyn LedgerStore>,
        registry: LedgerRegistry,
    ) -> Self {
        let (scheduler, tasks) = TaskScheduler::channel(TASK_QUEUE_CAPACITY);
        let builder = Builder::new(store.clone())
            .with_scheduler(scheduler)
            .with_validation(config.validate);
        let (state, _) = watch::channel(CrawlerState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let window = (config.max_rollback_depth.max(1) + 1) as usize;
        Self {
            tracker: BlockTracker::new(window),
            detector: ReorgDetector::new(),
            cursor: Cursor::new(-1, "", config.delay),
            policy: RetryPolicy::new(config.retry.clone()),
            chain_id: config.chain_id.clone(),
            finalized: false,
            config,
            node,
            store,
            builder,
            registry,
            tasks,
            snapshot: None,
            state,
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the delegation offset table.
    pub fn with_policy(mut self, policy: OffsetPolicy) -> Self {
        self.builder = self.builder.with_policy(policy);
        self
    }

    pub fn with_snapshot_hook(mut self, hook: Arc<dyn SnapshotHook>) -> Self {
        self.snapshot = Some(hook);
        self
    }

    /// Stop when `token` (or a parent of it) is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    pub fn registry(&self) -> &LedgerRegistry {
        &self.registry
    }

    pub fn builder(&self) -> &Builder {
        &self.builder
    }

    pub fn state(&self) -> CrawlerState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<CrawlerState> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CrawlerEvent> {
        self.events.subscribe()
    }

    /// Last committed block.
    pub fn tip(&self) -> Option<&BlockSummary> {
        self.tracker.head()
    }

    /// Token that stops the crawler at the next block boundary.
    pub fn stop_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        info!(height = self.cursor.height, "Stop requested");
        self.cancel.cancel();
    }

    // ─── Run ──────────────────────────────────────────────────────────────────

    /// Crawl until stopped, `stop_block` is committed, or a fatal error.
    pub async fn run(&mut self) -> Result<(), IndexerError> {
        if self.state() != CrawlerState::Idle {
            return Err(IndexerError::Aborted {
                reason: format!("crawler already {}", self.state()),
            });
        }
        match self.crawl().await {
            Ok(()) => {
                self.set_state(CrawlerState::Stopping);
                self.registry.flush().await?;
                self.registry.close().await?;
                self.set_state(CrawlerState::Stopped);
                info!(height = self.cursor.height, hash = %self.cursor.hash, "Crawler stopped");
                self.emit(CrawlerEvent::Stopped {
                    height: self.cursor.height,
                });
                Ok(())
            }
            Err(e) => {
                error!(height = self.cursor.height, error = %e, "Crawler halted");
                self.set_state(CrawlerState::Failed);
                if let Err(close) = self.registry.close().await {
                    warn!(error = %close, "Closing indexes after failure");
                }
                Err(e)
            }
        }
    }

    async fn crawl(&mut self) -> Result<(), IndexerError> {
        match self.sync().await {
            // a stop request interrupting a node call is a clean stop
            Err(IndexerError::Aborted { .. }) if self.cancel.is_cancelled() => Ok(()),
            res => res,
        }
    }

    async fn sync(&mut self) -> Result<(), IndexerError> {
        if self.cancel.is_cancelled() {
            return Ok(());
        }
        self.init().await?;
        if self.config.is_stop_height(self.cursor.height) {
            info!(height = self.cursor.height, "Stop block already indexed");
            return Ok(());
        }
        self.set_state(CrawlerState::Syncing);
        info!(
            from = self.cursor.next_height(),
            chain_id = %self.chain_id,
            queue = self.config.queue,
            delay = self.config.delay,
            "Starting sync"
        );

        let mut fetcher = self.spawn_fetcher();
        let res = self.follow(&mut fetcher).await;
        fetcher.shutdown().await;
        res
    }

    async fn follow(&mut self, fetcher: &mut Fetcher) -> Result<(), IndexerError> {
        let mut tip_check = tokio::time::interval(self.config.poll_interval);
        tip_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tip_check.reset();
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                item = fetcher.next() => Next::Block(item),
                _ = tip_check.tick() => Next::CheckTip,
            };
            let item = match next {
                Next::Block(item) => item,
                Next::CheckTip => {
                    if let Step::Rewound = self.check_tip().await? {
                        fetcher.shutdown().await;
                        *fetcher = self.spawn_fetcher();
                    }
                    continue;
                }
            };
            let rpc = match item {
                Some(Ok(rpc)) => rpc,
                Some(Err(e)) => return Err(e),
                None if self.cancel.is_cancelled() => return Ok(()),
                None if self.config.stop_block.is_some() => return Ok(()),
                None => {
                    return Err(IndexerError::Aborted {
                        reason: "block fetcher ended".into(),
                    })
                }
            };

            match self.process(&rpc).await? {
                Step::Connected | Step::Unchanged => {}
                Step::Rewound => {
                    fetcher.shutdown().await;
                    *fetcher = self.spawn_fetcher();
                    continue;
                }
            }

            self.update_sync_state(fetcher.node_head()).await?;
            if self.config.is_stop_height(self.cursor.height) {
                info!(height = self.cursor.height, "Stop block reached");
                return Ok(());
            }
        }
    }

    fn spawn_fetcher(&self) -> Fetcher {
        Fetcher::spawn(
            self.node.clone(),
            self.cursor.next_height(),
            &self.config,
            &self.cancel,
        )
    }

    // ─── Init ─────────────────────────────────────────────────────────────────

    /// Load state and position the cursor. Called by [`Self::run`].
    pub async fn init(&mut self) -> Result<(), IndexerError> {
        let node = self.node.clone();
        let node_chain = with_deadline(
            &self.policy,
            self.config.fetch_deadline,
            &self.cancel,
            0,
            "chain id",
            || node.chain_id(),
        )
        .await?;
        if !self.chain_id.is_empty() && self.chain_id != node_chain {
            return Err(IndexerError::ChainMismatch {
                expected: self.chain_id.clone(),
                actual: node_chain,
            });
        }
        self.chain_id = node_chain;
        self.registry.set_chain_id(self.chain_id.clone());

        let opts = IndexOptions {
            chain_id: self.chain_id.clone(),
            read_only: false,
            max_rollback_depth: self.config.max_rollback_depth,
        };
        self.registry.create(&opts).await?;
        self.registry.init(&opts).await?;
        if let Some(tip) = self
            .registry
            .tips()
            .into_values()
            .find(|t| t.chain_id != self.chain_id)
        {
            return Err(IndexerError::ChainMismatch {
                expected: tip.chain_id,
                actual: self.chain_id.clone(),
            });
        }

        self.reconcile().await?;
        self.builder.init().await?;
        self.seed_tracker().await?;
        info!(
            chain_id = %self.chain_id,
            height = self.cursor.height,
            hash = %self.cursor.hash,
            indexes = self.registry.len(),
            "Crawler initialized"
        );
        Ok(())
    }

    /// Disconnect modules whose tip is above the lowest tip so every module
    /// resumes from the same height.
    async fn reconcile(&mut self) -> Result<(), IndexerError> {
        let Some(min) = self.registry.min_tip() else {
            return Ok(());
        };
        let max = self
            .registry
            .tips()
            .values()
            .map(|t| t.best_height)
            .max()
            .unwrap_or(min.best_height);
        for height in (min.best_height + 1..=max).rev() {
            let keys = self.registry.indexes_ahead_of(height - 1);
            if keys.is_empty() {
                continue;
            }
            warn!(height, indexes = ?keys, "Pulling indexes back to common tip");
            self.ensure_params_at(height).await?;
            let ctx = self.builder.rollback(height).await?;
            let parent = self.parent_summary(height).await?;
            self.registry
                .disconnect_indexes(&keys, &ctx.block, &parent, &ctx)
                .await?;
        }
        Ok(())
    }

    async fn seed_tracker(&mut self) -> Result<(), IndexerError> {
        self.tracker.clear();
        let start = match self.registry.min_tip() {
            Some(tip) => {
                let from = (tip.best_height - self.config.max_rollback_depth).max(1);
                for h in from..tip.best_height {
                    if let Some(b) = self.store.block(h).await? {
                        let _ = self.tracker.push(b.summary());
                    }
                }
                match self.store.block(tip.best_height).await? {
                    Some(b) => b.summary(),
                    None => BlockSummary {
                        height: tip.best_height,
                        hash: tip.best_hash.clone(),
                        parent_hash: String::new(),
                        timestamp: tip.best_time,
                        cycle: 0,
                    },
                }
            }
            None => {
                let genesis = self.node_summary(0).await?;
                info!(hash = %genesis.hash, "Bootstrapping from genesis");
                genesis
            }
        };
        if self.tracker.push(start.clone()).is_err() {
            self.tracker.clear();
            let _ = self.tracker.push(start.clone());
        }
        self.cursor = Cursor::new(start.height, start.hash, self.config.delay);
        Ok(())
    }

    // ─── Connect ──────────────────────────────────────────────────────────────

    async fn process(&mut self, rpc: &RpcBlock) -> Result<Step, IndexerError> {
        if !rpc.chain_id.is_empty() && rpc.chain_id != self.chain_id {
            return Err(IndexerError::ChainMismatch {
                expected: self.chain_id.clone(),
                actual: rpc.chain_id.clone(),
            });
        }
        let summary = BlockSummary {
            height: rpc.height(),
            hash: rpc.hash.clone(),
            parent_hash: rpc.predecessor().to_string(),
            timestamp: rpc.timestamp(),
            cycle: rpc.cycle(),
        };
        if let Some(tip) = self.tracker.head().cloned() {
            let window = self.tracker.window();
            if let Some(event) = self.detector.check(&summary, &tip, &window) {
                self.rollback_fork(event, rpc.height(), rpc.predecessor().to_string())
                    .await?;
                return Ok(Step::Rewound);
            }
        }
        self.connect(rpc).await?;
        Ok(Step::Connected)
    }

    async fn connect(&mut self, rpc: &RpcBlock) -> Result<(), IndexerError> {
        self.ensure_params(rpc).await?;
        let ctx = self.builder.build(rpc).await?;
        self.registry.connect_block(&ctx.block, &ctx).await?;
        self.builder.commit(&ctx);

        let summary = ctx.block.summary();
        if self.tracker.push(summary.clone()).is_err() {
            self.tracker.clear();
            let _ = self.tracker.push(summary.clone());
        }
        self.cursor.advance(summary.height, summary.hash.as_str());
        debug!(
            height = summary.height,
            hash = %summary.hash,
            cycle = summary.cycle,
            ops = ctx.ops.len(),
            flows = ctx.flows.len(),
            "Block connected"
        );
        self.emit(CrawlerEvent::BlockConnected {
            height: summary.height,
            hash: summary.hash,
            cycle: summary.cycle,
        });

        self.run_tasks().await;
        self.maybe_snapshot(self.cursor.height).await;
        Ok(())
    }

    async fn update_sync_state(&mut self, node_head: Option<i64>) -> Result<(), IndexerError> {
        let Some(head) = node_head else {
            return Ok(());
        };
        let target = self.cursor.target(head);
        let caught_up = self.cursor.height >= target;
        match self.state() {
            CrawlerState::Syncing if caught_up => {
                if !self.finalized {
                    info!(height = self.cursor.height, "Initial sync complete, finalizing indexes");
                    self.registry.finalize_sync().await?;
                    self.finalized = true;
                }
                self.set_state(CrawlerState::Synced);
                info!(height = self.cursor.height, head, "Synced with node");
                self.emit(CrawlerEvent::Synced {
                    height: self.cursor.height,
                });
            }
            CrawlerState::Synced if target - self.cursor.height > self.config.queue as i64 => {
                info!(height = self.cursor.height, head, "Fell behind node, syncing");
                self.set_state(CrawlerState::Syncing);
            }
            _ => {}
        }
        Ok(())
    }

    async fn run_tasks(&mut self) {
        let queued = self.tasks.drain();
        if queued.is_empty() {
            return;
        }
        let node = self.node.clone();
        let results =
            futures::future::join_all(queued.into_iter().map(|t| tasks::execute(node.as_ref(), t)))
                .await;
        for result in results {
            if let Err(e) = self.registry.on_task_complete(&result).await {
                warn!(
                    index = %result.task.index,
                    kind = %result.task.kind,
                    height = result.task.height,
                    error = %e,
                    "Task result rejected"
                );
            }
        }
    }

    async fn maybe_snapshot(&self, height: i64) {
        let (Some(hook), Some(dir)) = (&self.snapshot, &self.config.snapshot.path) else {
            return;
        };
        if !self.config.snapshot.is_snapshot_height(height) {
            return;
        }
        match hook.snapshot(height, dir).await {
            Ok(()) => info!(height, dir = %dir.display(), "Snapshot written"),
            Err(e) => warn!(height, error = %e, "Snapshot failed"),
        }
    }

    // ─── Fork handling ────────────────────────────────────────────────────────

    /// Look for forks the next block cannot reveal: the node's head below
    /// the local tip, or a different block at the tip height.
    async fn check_tip(&mut self) -> Result<Step, IndexerError> {
        let Some(tip) = self.tracker.head().cloned() else {
            return Ok(Step::Unchanged);
        };
        let head = self.node_header(BlockId::Head, tip.height).await?;
        let window = self.tracker.window();
        if let Some(event) = self.detector.check_node_head(head.level, &window) {
            self.rollback_fork(event, head.level + 1, head.hash).await?;
            return Ok(Step::Rewound);
        }

        let at_tip = if head.level == tip.height {
            head
        } else {
            self.node_header(BlockId::Level(tip.height), tip.height).await?
        };
        let node_block = BlockSummary {
            height: at_tip.level,
            hash: at_tip.hash.clone(),
            parent_hash: at_tip.predecessor.clone(),
            timestamp: at_tip.timestamp,
            cycle: tip.cycle,
        };
        match self.detector.check_replaced(&node_block, &window) {
            Some(event) => {
                self.rollback_fork(event, at_tip.level, at_tip.predecessor).await?;
                Ok(Step::Rewound)
            }
            None => Ok(Step::Unchanged),
        }
    }

    /// Disconnect every local block at or above `from`, then keep
    /// disconnecting until the local tip is `ancestor`, following the
    /// node's predecessor links down.
    async fn rollback_fork(
        &mut self,
        event: ReorgEvent,
        from: i64,
        ancestor: String,
    ) -> Result<(), IndexerError> {
        let resume = self.state();
        self.set_state(CrawlerState::RollingBack);
        self.emit(CrawlerEvent::ForkDetected {
            height: event.detected_at,
            depth: event.depth,
            reorg_type: event.reorg_type,
        });
        debug!(
            stale = ?event.dropped_blocks.iter().map(|b| b.hash.as_str()).collect::<Vec<_>>(),
            "Stale blocks in window"
        );

        let mut depth = 0;
        while self.cursor.height >= from {
            self.disconnect_tip(&mut depth).await?;
        }

        let mut want = ancestor;
        loop {
            let height = self.cursor.height;
            if height <= 0 || self.cursor.hash == want {
                break;
            }
            self.disconnect_tip(&mut depth).await?;
            let header = self.node_header(BlockId::Hash(want), height).await?;
            want = header.predecessor;
        }

        info!(
            ancestor = self.cursor.height,
            hash = %self.cursor.hash,
            depth,
            reorg_type = %event.reorg_type,
            "Rolled back to common ancestor"
        );
        self.set_state(resume);
        Ok(())
    }

    /// Disconnect the block at the local tip.
    async fn disconnect_tip(&mut self, depth: &mut i64) -> Result<(), IndexerError> {
        let height = self.cursor.height;
        *depth += 1;
        if *depth > self.config.max_rollback_depth {
            return Err(IndexerError::RollbackTooDeep {
                height,
                max_depth: self.config.max_rollback_depth,
            });
        }

        self.ensure_params_at(height).await?;
        let ctx = self.builder.rollback(height).await?;
        let parent = self.parent_summary(height).await?;
        self.registry
            .disconnect_block(&ctx.block, &parent, &ctx)
            .await?;
        self.builder.commit(&ctx);
        if ctx.params.is_cycle_start(height) {
            debug!(cycle = ctx.block.cycle, "Rolled back past cycle start, purging cycle");
            self.registry.delete_cycle(ctx.block.cycle).await?;
        }

        self.tracker.rewind_to(parent.height);
        if self.tracker.is_empty() {
            let _ = self.tracker.push(parent.clone());
        }
        self.cursor.advance(parent.height, parent.hash.as_str());
        info!(height, hash = %ctx.block.hash, "Disconnected block");
        self.emit(CrawlerEvent::RolledBack {
            height: parent.height,
            hash: parent.hash,
        });
        Ok(())
    }

    /// Summary of the block below `height`: window, then store, then node.
    async fn parent_summary(&self, height: i64) -> Result<BlockSummary, IndexerError> {
        let parent = height - 1;
        if let Some(s) = self.tracker.get(parent) {
            return Ok(s.clone());
        }
        if let Some(b) = self.store.block(parent).await? {
            return Ok(b.summary());
        }
        self.node_summary(parent).await
    }

    async fn node_header(&self, id: BlockId, height: i64) -> Result<BlockHeaderInfo, IndexerError> {
        let node = self.node.clone();
        with_deadline(
            &self.policy,
            self.config.fetch_deadline,
            &self.cancel,
            height,
            "header",
            || node.header(&id),
        )
        .await
    }

    async fn node_summary(&self, height: i64) -> Result<BlockSummary, IndexerError> {
        let header = self.node_header(BlockId::Level(height), height).await?;
        let cycle = self.builder.params().height_to_cycle(height).unwrap_or(0);
        Ok(BlockSummary {
            height: header.level,
            hash: header.hash,
            parent_hash: header.predecessor,
            timestamp: header.timestamp,
            cycle,
        })
    }

    // ─── Protocol params ──────────────────────────────────────────────────────

    /// Register params for `rpc` unless its protocol already covers it.
    async fn ensure_params(&mut self, rpc: &RpcBlock) -> Result<(), IndexerError> {
        match self.builder.params().for_height(rpc.height()) {
            Ok(p) if p.protocol == rpc.protocol => Ok(()),
            _ => self.register_params(rpc).await,
        }
    }

    /// Params for a height being rolled back, fetched from the node after a
    /// restart left the registry empty. The stored block is looked up by
    /// hash since the node's branch may no longer reach `height`.
    async fn ensure_params_at(&mut self, height: i64) -> Result<(), IndexerError> {
        if self.builder.params().for_height(height).is_ok() {
            return Ok(());
        }
        let id = match self.store.block(height).await? {
            Some(b) => BlockId::Hash(b.hash),
            None => BlockId::Level(height),
        };
        let node = self.node.clone();
        let rpc = with_deadline(
            &self.policy,
            self.config.fetch_deadline,
            &self.cancel,
            height,
            "block",
            || node.block(&id),
        )
        .await?;
        self.register_params(&rpc).await
    }

    async fn register_params(&mut self, rpc: &RpcBlock) -> Result<(), IndexerError> {
        let height = rpc.height();
        let node = self.node.clone();
        let id = BlockId::Hash(rpc.hash.clone());
        let constants = with_deadline(
            &self.policy,
            self.config.fetch_deadline,
            &self.cancel,
            height,
            "constants",
            || node.constants(&id),
        )
        .await?;
        let (cycle, offset) = match rpc.metadata.level_info() {
            Some(info) => (info.cycle, info.cycle_position),
            None => self
                .builder
                .params()
                .latest()
                .map(|p| (p.height_to_cycle(height), p.cycle_position(height)))
                .unwrap_or((0, 0)),
        };
        let params = Params::new(rpc.protocol.as_str(), rpc.header.proto as i32, self.chain_id.as_str())
            .with_constants(&constants)
            .with_start(height, cycle, offset);
        info!(
            protocol = %params.protocol,
            version = params.version,
            height,
            cycle,
            blocks_per_cycle = params.blocks_per_cycle,
            "Registered protocol parameters"
        );
        self.builder.register_params(params);
        Ok(())
    }

    // ─── State & events ───────────────────────────────────────────────────────

    fn set_state(&self, to: CrawlerState) {
        let from = self.state.send_replace(to);
        if from != to {
            debug!(%from, %to, "Crawler state changed");
            self.emit(CrawlerEvent::StateChanged { from, to });
        }
    }

    fn emit(&self, event: CrawlerEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}
