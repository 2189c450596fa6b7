//! Index module lifecycle and the registry that drives it.
//!
//! Every index module projects the builder's output for one block into its
//! own tables. The registry calls each lifecycle step on all modules in
//! registration order and only moves the per-table [`ChainTip`]s once every
//! module has finished, so a block is applied to all modules or to none.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::task::TaskResult;
use crate::tip::{min_tip, TipStore};
use crate::types::{BlockSummary, ChainBlock, ChainTip};

/// Options passed to [`BlockIndexer::create`] and [`BlockIndexer::init`].
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub chain_id: String,
    pub read_only: bool,
    /// Heights older than `tip - max_rollback_depth` may drop undo data.
    pub max_rollback_depth: i64,
}

/// The lifecycle every index module implements.
///
/// `B` is the block model handed to modules, `C` the builder context giving
/// read access to the accounts, contracts and bakers touched by that block.
///
/// `connect_block` must be idempotent: replaying the same block after a
/// crash must leave the module's tables exactly as a single call would.
#[async_trait]
pub trait BlockIndexer<B: Sync, C: ?Sized + Sync>: Send + Sync {
    /// Human readable name.
    fn name(&self) -> &str;

    /// Unique key, also used to route task results.
    fn key(&self) -> &str;

    /// Tables owned by this module; each gets its own chain tip.
    fn tables(&self) -> Vec<String>;

    /// Create tables on first start.
    async fn create(&self, opts: &IndexOptions) -> Result<(), IndexerError>;

    /// Open existing tables.
    async fn init(&self, opts: &IndexOptions) -> Result<(), IndexerError>;

    async fn connect_block(&self, block: &B, ctx: &C) -> Result<(), IndexerError>;

    /// Revert the effects of `block`. `ctx` holds the rolled back state.
    async fn disconnect_block(&self, block: &B, ctx: &C) -> Result<(), IndexerError>;

    /// Remove every row written at `height`.
    async fn delete_block(&self, height: i64) -> Result<(), IndexerError>;

    /// Purge cycle-scoped aggregates.
    async fn delete_cycle(&self, cycle: i64) -> Result<(), IndexerError>;

    /// One-time maintenance after the initial catch-up.
    async fn finalize_sync(&self) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn on_task_complete(&self, _result: &TaskResult) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn flush(&self) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), IndexerError> {
        Ok(())
    }
}

/// Transaction boundary of the underlying table store.
///
/// Writes made by modules between `begin` and `commit` become visible
/// together; `abort` discards them.
#[async_trait]
pub trait BlockTx: Send + Sync {
    async fn begin(&self, height: i64) -> Result<(), IndexerError>;
    async fn commit(&self) -> Result<(), IndexerError>;
    async fn abort(&self) -> Result<(), IndexerError>;
}

// ─── Registry ─────────────────────────────────────────────────────────────────

/// Ordered set of index modules plus their committed tips.
pub struct IndexRegistry<B: Sync + 'static, C: ?Sized + Sync + 'static> {
    indexes: Vec<Arc<dyn BlockIndexer<B, C>>>,
    tips: Arc<dyn TipStore>,
    tx: Option<Arc<dyn BlockTx>>,
    /// Tips readers may observe; replaced only after a full commit.
    committed: RwLock<HashMap<String, ChainTip>>,
    chain_id: String,
}

impl<B, C> IndexRegistry<B, C>
where
    B: ChainBlock + Sync + 'static,
    C: ?Sized + Sync + 'static,
{
    pub fn new(chain_id: impl Into<String>, tips: Arc<dyn TipStore>) -> Self {
        Self {
            indexes: Vec::new(),
            tips,
            tx: None,
            committed: RwLock::new(HashMap::new()),
            chain_id: chain_id.into(),
        }
    }

    /// Wrap each block in the store's transaction boundary.
    pub fn with_tx(mut self, tx: Arc<dyn BlockTx>) -> Self {
        self.tx = Some(tx);
        self
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Set the chain id once it is known from the node.
    pub fn set_chain_id(&mut self, chain_id: impl Into<String>) {
        self.chain_id = chain_id.into();
    }

    /// Register a module. Modules run in registration order.
    pub fn register(&mut self, index: Arc<dyn BlockIndexer<B, C>>) -> Result<(), IndexerError> {
        if self.indexes.iter().any(|i| i.key() == index.key()) {
            return Err(IndexerError::index(index.key(), "duplicate index key"));
        }
        self.indexes.push(index);
        Ok(())
    }

    pub fn index(&self, key: &str) -> Option<Arc<dyn BlockIndexer<B, C>>> {
        self.indexes.iter().find(|i| i.key() == key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.indexes.iter().map(|i| i.key().to_string()).collect()
    }

    pub fn tables(&self) -> Vec<String> {
        self.indexes.iter().flat_map(|i| i.tables()).collect()
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    // ─── Tips ─────────────────────────────────────────────────────────────────

    /// Committed tip of one table.
    pub fn tip(&self, table: &str) -> Option<ChainTip> {
        self.committed.read().unwrap().get(table).cloned()
    }

    /// Snapshot of every committed tip.
    pub fn tips(&self) -> HashMap<String, ChainTip> {
        self.committed.read().unwrap().clone()
    }

    /// Lowest tip across all tables, or `None` if any table has never been
    /// written (the crawler then starts from genesis).
    pub fn min_tip(&self) -> Option<ChainTip> {
        let committed = self.committed.read().unwrap();
        let tables = self.tables();
        if tables.is_empty() || tables.iter().any(|t| !committed.contains_key(t)) {
            return None;
        }
        min_tip(tables.iter().filter_map(|t| committed.get(t))).cloned()
    }

    /// Lowest tip across the tables of one module.
    pub fn index_tip(&self, key: &str) -> Option<ChainTip> {
        let index = self.index(key)?;
        let committed = self.committed.read().unwrap();
        let tables = index.tables();
        if tables.iter().any(|t| !committed.contains_key(t)) {
            return None;
        }
        min_tip(tables.iter().filter_map(|t| committed.get(t))).cloned()
    }

    /// Keys of modules whose tip is above `height`.
    pub fn indexes_ahead_of(&self, height: i64) -> Vec<String> {
        self.indexes
            .iter()
            .filter(|i| {
                self.index_tip(i.key())
                    .map(|t| t.best_height > height)
                    .unwrap_or(false)
            })
            .map(|i| i.key().to_string())
            .collect()
    }

    async fn store_tips(
        &self,
        indexes: &[Arc<dyn BlockIndexer<B, C>>],
        block: &BlockSummary,
    ) -> Result<(), IndexerError> {
        let mut updated = Vec::new();
        for index in indexes {
            for table in index.tables() {
                let tip = ChainTip::new(self.chain_id.clone(), block);
                self.tips.save(&table, &tip).await?;
                updated.push((table, tip));
            }
        }
        let mut committed = self.committed.write().unwrap();
        committed.extend(updated);
        Ok(())
    }

    // ─── Lifecycle ────────────────────────────────────────────────────────────

    pub async fn create(&self, opts: &IndexOptions) -> Result<(), IndexerError> {
        for index in &self.indexes {
            tracing::debug!(index = index.key(), "Creating index");
            index.create(opts).await?;
        }
        Ok(())
    }

    /// Open every module and load persisted tips.
    pub async fn init(&self, opts: &IndexOptions) -> Result<(), IndexerError> {
        for index in &self.indexes {
            index.init(opts).await?;
        }
        let loaded = self.tips.load_all().await?;
        let tables = self.tables();
        let mut committed = self.committed.write().unwrap();
        committed.clear();
        committed.extend(loaded.into_iter().filter(|(t, _)| tables.contains(t)));
        Ok(())
    }

    /// Apply `block` to every module that has not seen it yet.
    pub async fn connect_block(&self, block: &B, ctx: &C) -> Result<(), IndexerError> {
        let height = block.height();
        let pending: Vec<_> = self
            .indexes
            .iter()
            .filter(|i| match self.index_tip(i.key()) {
                Some(tip) if tip.best_height >= height => {
                    tracing::debug!(index = i.key(), height, "Index already at height, skipping");
                    false
                }
                _ => true,
            })
            .cloned()
            .collect();

        self.begin(height).await?;
        for index in &pending {
            if let Err(e) = index.connect_block(block, ctx).await {
                tracing::error!(index = index.key(), height, error = %e, "Connect failed, aborting block");
                self.abort().await;
                return Err(wrap(index.key(), e));
            }
        }
        self.commit().await?;
        self.store_tips(&pending, &block.summary()).await
    }

    /// Revert `block` on every module at or above its height, then move the
    /// tips to `parent`.
    pub async fn disconnect_block(
        &self,
        block: &B,
        parent: &BlockSummary,
        ctx: &C,
    ) -> Result<(), IndexerError> {
        let keys: Vec<String> = self
            .indexes
            .iter()
            .filter(|i| {
                self.index_tip(i.key())
                    .map(|t| t.best_height >= block.height())
                    .unwrap_or(false)
            })
            .map(|i| i.key().to_string())
            .collect();
        self.disconnect_indexes(&keys, block, parent, ctx).await
    }

    /// Revert `block` on the named modules only. Used to pull modules that
    /// ran ahead back to a common height.
    pub async fn disconnect_indexes(
        &self,
        keys: &[String],
        block: &B,
        parent: &BlockSummary,
        ctx: &C,
    ) -> Result<(), IndexerError> {
        let height = block.height();
        let selected: Vec<_> = self
            .indexes
            .iter()
            .filter(|i| keys.iter().any(|k| k == i.key()))
            .cloned()
            .collect();

        self.begin(height).await?;
        for index in &selected {
            let res = match index.disconnect_block(block, ctx).await {
                Ok(()) => index.delete_block(height).await,
                Err(e) => Err(e),
            };
            if let Err(e) = res {
                tracing::error!(index = index.key(), height, error = %e, "Disconnect failed");
                self.abort().await;
                return Err(wrap(index.key(), e));
            }
        }
        self.commit().await?;
        self.store_tips(&selected, parent).await
    }

    pub async fn delete_cycle(&self, cycle: i64) -> Result<(), IndexerError> {
        for index in &self.indexes {
            index
                .delete_cycle(cycle)
                .await
                .map_err(|e| wrap(index.key(), e))?;
        }
        Ok(())
    }

    pub async fn finalize_sync(&self) -> Result<(), IndexerError> {
        for index in &self.indexes {
            tracing::info!(index = index.key(), "Finalizing sync");
            index.finalize_sync().await.map_err(|e| wrap(index.key(), e))?;
        }
        Ok(())
    }

    /// Route a finished task to the module that scheduled it.
    pub async fn on_task_complete(&self, result: &TaskResult) -> Result<(), IndexerError> {
        let index = self
            .index(&result.task.index)
            .ok_or_else(|| IndexerError::not_found("index", &result.task.index))?;
        index.on_task_complete(result).await
    }

    pub async fn flush(&self) -> Result<(), IndexerError> {
        for index in &self.indexes {
            index.flush().await.map_err(|e| wrap(index.key(), e))?;
        }
        Ok(())
    }

    /// Flush and close every module. Keeps going after a failure and
    /// reports the first error.
    pub async fn close(&self) -> Result<(), IndexerError> {
        let mut first = None;
        for index in &self.indexes {
            let res = match index.flush().await {
                Ok(()) => index.close().await,
                Err(e) => Err(e),
            };
            if let Err(e) = res {
                tracing::error!(index = index.key(), error = %e, "Close failed");
                first.get_or_insert(wrap(index.key(), e));
            }
        }
        first.map_or(Ok(()), Err)
    }

    async fn begin(&self, height: i64) -> Result<(), IndexerError> {
        match &self.tx {
            Some(tx) => tx.begin(height).await,
            None => Ok(()),
        }
    }

    async fn commit(&self) -> Result<(), IndexerError> {
        match &self.tx {
            Some(tx) => tx.commit().await,
            None => Ok(()),
        }
    }

    async fn abort(&self) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.abort().await {
                tracing::error!(error = %e, "Aborting store transaction failed");
            }
        }
    }
}

/// Attach the module key unless the error already names one.
fn wrap(key: &str, e: IndexerError) -> IndexerError {
    match e {
        IndexerError::Index { .. }
        | IndexerError::Invariant { .. }
        | IndexerError::Decode { .. }
        | IndexerError::NotFound { .. } => e,
        other => IndexerError::index(key, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use crate::tip::MemoryTipStore;
    use chrono::DateTime;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        key: String,
        log: Log,
        fail_connect: AtomicBool,
    }

    impl Recorder {
        fn new(key: &str, log: &Log) -> Arc<Self> {
            Arc::new(Self {
                key: key.into(),
                log: log.clone(),
                fail_connect: AtomicBool::new(false),
            })
        }

        fn push(&self, what: String) {
            self.log.lock().unwrap().push(format!("{}:{what}", self.key));
        }
    }

    #[async_trait]
    impl BlockIndexer<BlockSummary, ()> for Recorder {
        fn name(&self) -> &str {
            &self.key
        }
        fn key(&self) -> &str {
            &self.key
        }
        fn tables(&self) -> Vec<String> {
            vec![self.key.clone()]
        }
        async fn create(&self, _: &IndexOptions) -> Result<(), IndexerError> {
            Ok(())
        }
        async fn init(&self, _: &IndexOptions) -> Result<(), IndexerError> {
            Ok(())
        }
        async fn connect_block(&self, b: &BlockSummary, _: &()) -> Result<(), IndexerError> {
            if self.fail_connect.load(Ordering::Relaxed) {
                return Err(IndexerError::Storage("disk full".into()));
            }
            self.push(format!("connect {}", b.height));
            Ok(())
        }
        async fn disconnect_block(&self, b: &BlockSummary, _: &()) -> Result<(), IndexerError> {
            self.push(format!("disconnect {}", b.height));
            Ok(())
        }
        async fn delete_block(&self, height: i64) -> Result<(), IndexerError> {
            self.push(format!("delete {height}"));
            Ok(())
        }
        async fn delete_cycle(&self, cycle: i64) -> Result<(), IndexerError> {
            self.push(format!("delete-cycle {cycle}"));
            Ok(())
        }
        async fn on_task_complete(&self, r: &TaskResult) -> Result<(), IndexerError> {
            self.push(format!("task {}", r.task.kind));
            Ok(())
        }
    }

    #[derive(Default)]
    struct TxLog(Mutex<Vec<&'static str>>);

    #[async_trait]
    impl BlockTx for TxLog {
        async fn begin(&self, _: i64) -> Result<(), IndexerError> {
            self.0.lock().unwrap().push("begin");
            Ok(())
        }
        async fn commit(&self) -> Result<(), IndexerError> {
            self.0.lock().unwrap().push("commit");
            Ok(())
        }
        async fn abort(&self) -> Result<(), IndexerError> {
            self.0.lock().unwrap().push("abort");
            Ok(())
        }
    }

    fn b(height: i64) -> BlockSummary {
        BlockSummary {
            height,
            hash: format!("BL{height}"),
            parent_hash: format!("BL{}", height - 1),
            timestamp: DateTime::from_timestamp(height * 30, 0).unwrap(),
            cycle: height / 8,
        }
    }

    fn registry(log: &Log) -> (IndexRegistry<BlockSummary, ()>, Arc<Recorder>, Arc<Recorder>) {
        let mut reg = IndexRegistry::new("NetXtest", Arc::new(MemoryTipStore::new()));
        let a = Recorder::new("block", log);
        let c = Recorder::new("account", log);
        reg.register(a.clone()).unwrap();
        reg.register(c.clone()).unwrap();
        (reg, a, c)
    }

    #[tokio::test]
    async fn connect_runs_in_registration_order_and_moves_tips() {
        let log = Log::default();
        let (reg, _, _) = registry(&log);
        assert!(reg.min_tip().is_none());

        reg.connect_block(&b(1), &()).await.unwrap();
        reg.connect_block(&b(2), &()).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["block:connect 1", "account:connect 1", "block:connect 2", "account:connect 2"]
        );
        assert_eq!(reg.min_tip().unwrap().best_height, 2);
        assert_eq!(reg.tip("account").unwrap().best_hash, "BL2");
    }

    #[tokio::test]
    async fn failing_module_aborts_block_without_moving_tips() {
        let log = Log::default();
        let (reg, _, account) = registry(&log);
        let tx = Arc::new(TxLog::default());
        let reg = reg.with_tx(tx.clone());

        reg.connect_block(&b(1), &()).await.unwrap();
        account.fail_connect.store(true, Ordering::Relaxed);
        let err = reg.connect_block(&b(2), &()).await.unwrap_err();

        assert!(matches!(err, IndexerError::Index { ref index, .. } if index == "account"));
        assert_eq!(reg.min_tip().unwrap().best_height, 1);
        assert_eq!(reg.tip("block").unwrap().best_height, 1);
        assert_eq!(*tx.0.lock().unwrap(), vec!["begin", "commit", "begin", "abort"]);
    }

    #[tokio::test]
    async fn disconnect_deletes_and_rewinds_tips() {
        let log = Log::default();
        let (reg, _, _) = registry(&log);
        for h in 1..=3 {
            reg.connect_block(&b(h), &()).await.unwrap();
        }
        log.lock().unwrap().clear();

        reg.disconnect_block(&b(3), &b(2), &()).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["block:disconnect 3", "block:delete 3", "account:disconnect 3", "account:delete 3"]
        );
        assert_eq!(reg.min_tip().unwrap().best_height, 2);
    }

    #[tokio::test]
    async fn replay_skips_modules_already_at_height() {
        let log = Log::default();
        let (reg, _, _) = registry(&log);
        reg.connect_block(&b(1), &()).await.unwrap();
        reg.connect_block(&b(1), &()).await.unwrap();
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn init_loads_tips_and_finds_modules_ahead() {
        let log = Log::default();
        let store = Arc::new(MemoryTipStore::new());
        store.save("block", &ChainTip::new("NetXtest", &b(5))).await.unwrap();
        store.save("account", &ChainTip::new("NetXtest", &b(4))).await.unwrap();

        let mut reg: IndexRegistry<BlockSummary, ()> = IndexRegistry::new("NetXtest", store);
        reg.register(Recorder::new("block", &log)).unwrap();
        reg.register(Recorder::new("account", &log)).unwrap();
        reg.init(&IndexOptions::default()).await.unwrap();

        assert_eq!(reg.min_tip().unwrap().best_height, 4);
        assert_eq!(reg.indexes_ahead_of(4), vec!["block".to_string()]);

        reg.disconnect_indexes(&reg.indexes_ahead_of(4), &b(5), &b(4), &())
            .await
            .unwrap();
        assert!(reg.indexes_ahead_of(4).is_empty());
    }

    #[tokio::test]
    async fn duplicate_key_rejected() {
        let log = Log::default();
        let (mut reg, _, _) = registry(&log);
        assert!(reg.register(Recorder::new("block", &log)).is_err());
        assert_eq!(reg.len(), 2);
    }

    #[tokio::test]
    async fn task_results_routed_by_index_key() {
        let log = Log::default();
        let (reg, _, _) = registry(&log);
        let task = Task {
            index: "account".into(),
            height: 1,
            kind: "script".into(),
            payload: serde_json::Value::Null,
        };
        reg.on_task_complete(&TaskResult { task: task.clone(), outcome: Ok(serde_json::Value::Null) })
            .await
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["account:task script"]);

        let orphan = Task { index: "rights".into(), ..task };
        let err = reg
            .on_task_complete(&TaskResult { task: orphan, outcome: Err("gone".into()) })
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_cycle_reaches_every_module() {
        let log = Log::default();
        let (reg, _, _) = registry(&log);
        reg.delete_cycle(7).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["block:delete-cycle 7", "account:delete-cycle 7"]
        );
    }
}
