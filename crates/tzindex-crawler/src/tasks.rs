//! Executor for deferred tasks queued by index modules.

use serde_json::Value;
use tzindex_codec::Address;
use tzindex_core::{Task, TaskResult};
use tzindex_etl::SCRIPT_TASK;
use tzindex_rpc::{BlockId, NodeApi};

/// Run one task against the node. Never fails; failures end up in the
/// result's outcome for the owning module to handle.
pub async fn execute(node: &dyn NodeApi, task: Task) -> TaskResult {
    let outcome = match task.kind.as_str() {
        SCRIPT_TASK => fetch_script(node, &task).await,
        other => Err(format!("unknown task kind '{other}'")),
    };
    if let Err(reason) = &outcome {
        tracing::warn!(index = %task.index, kind = %task.kind, height = task.height, %reason, "Task failed");
    }
    TaskResult { task, outcome }
}

async fn fetch_script(node: &dyn NodeApi, task: &Task) -> Result<Value, String> {
    let address: Address = task
        .payload
        .get("address")
        .and_then(Value::as_str)
        .ok_or("payload has no address")?
        .parse()
        .map_err(|e| format!("bad address: {e}"))?;
    let script = node
        .contract_script(&address, &BlockId::Level(task.height))
        .await
        .map_err(|e| e.to_string())?;
    serde_json::to_value(script).map_err(|e| e.to_string())
}
