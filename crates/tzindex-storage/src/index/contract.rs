//! Contracts.
//!
//! Contracts first seen without a script (accounts referenced before the
//! indexer saw their origination) get a deferred `script` task; the
//! crawler fetches the script from the node and hands it back through
//! [`BlockIndexer::on_task_complete`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tzindex_codec::{Address, Script};
use tzindex_core::{BlockIndexer, IndexOptions, IndexerError, Task, TaskResult};
use tzindex_etl::model::Block;
use tzindex_etl::{BlockBuilder, SCRIPT_TASK};

use crate::memory::MemoryStore;

pub struct ContractIndex {
    store: Arc<MemoryStore>,
}

impl ContractIndex {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    fn apply(&self, ctx: &BlockBuilder) {
        let contracts: Vec<_> = ctx.contracts.values().cloned().collect();
        let removed = ctx.removed_contracts.clone();
        self.store.write(move |t| {
            for c in contracts {
                t.contracts.insert(c.account_id, c);
            }
            for id in removed {
                t.contracts.remove(&id);
            }
        });
    }

    fn schedule_scripts(&self, ctx: &BlockBuilder) -> Result<(), IndexerError> {
        let Some(scheduler) = ctx.scheduler() else {
            return Ok(());
        };
        let stubs = ctx
            .undo
            .contracts_created
            .iter()
            .filter_map(|id| ctx.contract(*id))
            .filter(|c| c.address.is_contract() && !c.has_script());
        for c in stubs {
            tracing::debug!(height = ctx.height(), contract = %c.address, "Scheduling script fetch");
            scheduler.enqueue(Task {
                index: self.key().to_string(),
                height: ctx.height(),
                kind: SCRIPT_TASK.to_string(),
                payload: json!({ "address": c.address.to_string() }),
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl BlockIndexer<Block, BlockBuilder> for ContractIndex {
    fn name(&self) -> &str {
        "Contract index"
    }

    fn key(&self) -> &str {
        "contract"
    }

    fn tables(&self) -> Vec<String> {
        vec!["contract".into()]
    }

    async fn create(&self, _opts: &IndexOptions) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn init(&self, _opts: &IndexOptions) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn connect_block(&self, _block: &Block, ctx: &BlockBuilder) -> Result<(), IndexerError> {
        self.apply(ctx);
        self.schedule_scripts(ctx)
    }

    async fn disconnect_block(&self, _block: &Block, ctx: &BlockBuilder) -> Result<(), IndexerError> {
        self.apply(ctx);
        Ok(())
    }

    async fn delete_block(&self, _height: i64) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn delete_cycle(&self, _cycle: i64) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn on_task_complete(&self, result: &TaskResult) -> Result<(), IndexerError> {
        if result.task.kind != SCRIPT_TASK {
            return Ok(());
        }
        let data = match &result.outcome {
            Ok(data) => data.clone(),
            Err(reason) => {
                tracing::warn!(task = ?result.task.payload, %reason, "Script fetch failed");
                return Ok(());
            }
        };
        let address = result
            .task
            .payload
            .get("address")
            .and_then(|v| v.as_str())
            .ok_or_else(|| IndexerError::index(self.key(), "script task without address"))
            .and_then(|s| Address::parse(s).map_err(|e| IndexerError::index(self.key(), e)))?;
        let script: Script =
            serde_json::from_value(data).map_err(|e| IndexerError::index(self.key(), e))?;

        self.store.write(move |t| {
            let Some(id) = t.addresses.get(&address).copied() else {
                tracing::debug!(contract = %address, "Contract gone before its script arrived");
                return;
            };
            if let Some(c) = t.contracts.get_mut(&id) {
                if !c.has_script() {
                    c.set_script(script);
                    tracing::debug!(contract = %address, slots = c.n_slots(), "Contract script installed");
                }
            }
        });
        Ok(())
    }
}
