//! End-to-end checks of builder, registry and index modules over the
//! in-memory engine.

use std::sync::Arc;

use chrono::DateTime;
use serde_json::{json, Value};
use tzindex_codec::{Address, AddressType, Block as RpcBlock, Prim};
use tzindex_core::{
    BlockSummary, BlockTx, ChainBlock, IndexOptions, IndexRegistry, TaskResult, TaskScheduler,
};
use tzindex_etl::model::{Account, AccountId, Baker, Block, Contract};
use tzindex_etl::{BlockBuilder, Builder, Params};
use tzindex_storage::{standard_indexes, MemoryStore};

const CHAIN: &str = "NetXdQprcVkpaWU";
const SRC: AccountId = 1;
const BAKER: AccountId = 2;
const B1: AccountId = 3;

// ─── Fixtures ─────────────────────────────────────────────────────────────────

fn tz(n: u8) -> Address {
    Address::new(AddressType::Ed25519, [n; 20])
}

fn kt(n: u8) -> Address {
    Address::new(AddressType::Contract, [n; 20])
}

fn s(a: Address) -> String {
    a.to_string()
}

/// SRC holds 5000 and delegates to B1; BAKER bakes every block.
fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.write(|t| {
        let mut src = Account::new(SRC, tz(1), 1);
        src.spendable_balance = 5000;
        src.baker_id = Some(B1);
        src.is_delegated = true;
        t.put_account(src);
        for id in [BAKER, B1] {
            let mut a = Account::new(id, tz(id as u8), 1);
            a.is_baker = true;
            a.baker_id = Some(id);
            let mut k = Baker::new(id, a.address, 1);
            if id == B1 {
                k.delegated_balance = 5000;
                k.active_delegations = 1;
            }
            t.put_account(a);
            t.bakers.insert(id, k);
        }
    });
    store
}

async fn setup(
    store: &Arc<MemoryStore>,
) -> (IndexRegistry<Block, BlockBuilder>, Builder) {
    let mut registry = IndexRegistry::new(CHAIN, store.clone()).with_tx(store.clone());
    for index in standard_indexes(store) {
        registry.register(index).unwrap();
    }
    let opts = IndexOptions {
        chain_id: CHAIN.into(),
        read_only: false,
        max_rollback_depth: 100,
    };
    registry.create(&opts).await.unwrap();
    registry.init(&opts).await.unwrap();

    let mut builder = Builder::new(store.clone());
    builder.register_params(Params::new("PtHangz2", 11, CHAIN).with_start(1, 0, 0));
    builder.init().await.unwrap();
    (registry, builder)
}

fn fee(amount: i64) -> Value {
    json!([
        { "kind": "contract", "contract": s(tz(1)), "change": (-amount).to_string(), "origin": "block" },
        { "kind": "accumulator", "category": "block fees", "change": amount.to_string(), "origin": "block" }
    ])
}

fn manager(kind: &str, result: Value, extra: Value) -> Value {
    let mut v = json!({
        "kind": kind,
        "source": s(tz(1)),
        "fee": "100",
        "counter": "8",
        "gas_limit": "10000",
        "storage_limit": "500",
        "metadata": { "balance_updates": fee(100), "operation_result": result }
    });
    if let (Value::Object(m), Value::Object(e)) = (&mut v, extra) {
        m.extend(e);
    }
    v
}

fn rpc_block(height: i64, ops: Vec<Value>) -> RpcBlock {
    RpcBlock::from_value(json!({
        "protocol": "PtHangz2aRngywmSRGGvrcTyMbbdpWdpFKuS4uMWxg2RaH9i1qx",
        "chain_id": CHAIN,
        "hash": format!("BL{height}"),
        "header": {
            "level": height,
            "proto": 11,
            "predecessor": format!("BL{}", height - 1),
            "timestamp": "2021-06-01T00:00:00Z"
        },
        "metadata": { "baker": s(tz(2)), "balance_updates": [] },
        "operations": [[], [], [], [{ "hash": format!("op{height}"), "branch": "BL0", "contents": ops }]]
    }))
    .unwrap()
}

/// 200 from SRC to `dst`, burning 50 for allocation.
fn transfer(height: i64, dst: Address) -> RpcBlock {
    let result = json!({
        "status": "applied",
        "balance_updates": [
            { "kind": "contract", "contract": s(tz(1)), "change": "-200", "origin": "block" },
            { "kind": "contract", "contract": s(dst), "change": "200", "origin": "block" },
            { "kind": "contract", "contract": s(tz(1)), "change": "-50", "origin": "block" },
            { "kind": "burned", "category": "storage fees", "change": "50", "origin": "block" }
        ],
        "allocated_destination_contract": true
    });
    rpc_block(
        height,
        vec![manager("transaction", result, json!({ "amount": "200", "destination": s(dst) }))],
    )
}

fn script() -> Value {
    json!({
        "code": [
            { "prim": "parameter", "args": [{ "prim": "int" }] },
            { "prim": "storage", "args": [{ "prim": "int" }] },
            { "prim": "code", "args": [[
                { "prim": "CDR" },
                { "prim": "NIL", "args": [{ "prim": "operation" }] },
                { "prim": "PAIR" }
            ]] }
        ],
        "storage": { "int": "1" }
    })
}

fn origination(height: i64) -> RpcBlock {
    let result = json!({
        "status": "applied",
        "originated_contracts": [s(kt(9))],
        "storage_size": "38",
        "paid_storage_size_diff": "38",
        "balance_updates": [
            { "kind": "contract", "contract": s(tz(1)), "change": "-500", "origin": "block" },
            { "kind": "contract", "contract": s(kt(9)), "change": "500", "origin": "block" },
            { "kind": "contract", "contract": s(tz(1)), "change": "-50", "origin": "block" },
            { "kind": "burned", "category": "storage fees", "change": "50", "origin": "block" }
        ]
    });
    rpc_block(
        height,
        vec![manager("origination", result, json!({ "balance": "500", "script": script() }))],
    )
}

/// Call `dst` with the default entrypoint, leaving `storage` behind.
fn call(height: i64, dst: Address, storage: i64) -> RpcBlock {
    let value = json!({ "int": storage.to_string() });
    let result = json!({ "status": "applied", "storage": value, "balance_updates": [] });
    rpc_block(
        height,
        vec![manager(
            "transaction",
            result,
            json!({
                "amount": "0",
                "destination": s(dst),
                "parameters": { "entrypoint": "default", "value": value }
            }),
        )],
    )
}

fn delegation(height: i64) -> RpcBlock {
    rpc_block(
        height,
        vec![manager("delegation", json!({ "status": "applied" }), json!({ "delegate": s(tz(2)) }))],
    )
}

fn genesis_parent(height: i64) -> BlockSummary {
    BlockSummary {
        height,
        hash: format!("BL{height}"),
        parent_hash: format!("BL{}", height - 1),
        timestamp: DateTime::from_timestamp(0, 0).unwrap(),
        cycle: 0,
    }
}

async fn connect(
    registry: &IndexRegistry<Block, BlockBuilder>,
    builder: &mut Builder,
    rpc: &RpcBlock,
) -> BlockBuilder {
    let ctx = builder.build(rpc).await.unwrap();
    registry.connect_block(&ctx.block, &ctx).await.unwrap();
    builder.commit(&ctx);
    ctx
}

async fn disconnect(
    store: &MemoryStore,
    registry: &IndexRegistry<Block, BlockBuilder>,
    builder: &mut Builder,
    height: i64,
) {
    let ctx = builder.rollback(height).await.unwrap();
    let parent = store
        .read(|t| t.blocks.get(&(height - 1)).map(|b| b.summary()))
        .unwrap_or_else(|| genesis_parent(height - 1));
    registry.disconnect_block(&ctx.block, &parent, &ctx).await.unwrap();
    builder.commit(&ctx);
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rollback_restores_every_ledger_row() {
    let store = seeded_store();
    let (registry, mut builder) = setup(&store).await;
    let before = store.snapshot();

    connect(&registry, &mut builder, &transfer(100, tz(4))).await;
    connect(&registry, &mut builder, &origination(101)).await;
    connect(&registry, &mut builder, &delegation(102)).await;

    assert_eq!(registry.min_tip().unwrap().best_height, 102);
    let mid = store.snapshot();
    assert_ne!(mid.accounts, before.accounts);
    assert_eq!(mid.contracts.len(), 1);
    assert_eq!(mid.blocks.len(), 3);
    assert!(!mid.flow_summary(0).is_empty());
    assert_eq!(mid.accounts[&SRC].baker_id, Some(BAKER));

    for height in (100..=102).rev() {
        disconnect(&store, &registry, &mut builder, height).await;
    }

    let after = store.snapshot();
    assert_eq!(after.accounts, before.accounts);
    assert_eq!(after.bakers, before.bakers);
    assert_eq!(after.contracts, before.contracts);
    assert_eq!(after.addresses, before.addresses);
    assert!(after.blocks.is_empty());
    assert!(after.undo.is_empty());
    assert!(after.ops.is_empty());
    assert!(after.flows.is_empty());
    assert!(after.flow_cycles.is_empty());
    assert_eq!(registry.min_tip().unwrap().best_height, 99);

    // ids handed out by rolled back blocks stay consumed
    assert!(after.high_water >= 5);
    let ctx = connect(&registry, &mut builder, &transfer(100, tz(4))).await;
    assert_eq!(ctx.account_by_address(&tz(4)).unwrap().id, 6);
}

#[tokio::test]
async fn contract_rollback_reverts_calls() {
    let store = seeded_store();
    let (registry, mut builder) = setup(&store).await;

    connect(&registry, &mut builder, &origination(100)).await;
    let originated = store.snapshot().contracts;
    let id = *originated.keys().next().unwrap();

    connect(&registry, &mut builder, &transfer(101, kt(9))).await;
    let called = store.read(|t| t.contracts[&id].clone());
    assert_eq!(called.n_calls_success, 1);
    assert_eq!(called.last_seen, 101);

    disconnect(&store, &registry, &mut builder, 101).await;
    assert_eq!(store.read(|t| t.contracts[&id].clone()), originated[&id]);
}

#[tokio::test]
async fn contract_without_prior_ops_rolls_back_exactly() {
    const STUB: AccountId = 10;
    let store = seeded_store();
    store.write(|t| {
        let mut a = Account::new(STUB, kt(7), 1);
        a.is_contract = true;
        t.put_account(a);
        // known storage but no script and no successful op on record
        let mut c = Contract::stub(STUB, kt(7), 1);
        let storage = Prim::int(1);
        c.storage = storage.to_bytes();
        c.storage_hash = storage.hash64();
        c.storage_size = c.storage.len() as i64;
        c.n_calls_failed = 1;
        t.contracts.insert(STUB, c);
    });
    let (registry, mut builder) = setup(&store).await;
    let before = store.read(|t| t.contracts[&STUB].clone());

    connect(&registry, &mut builder, &call(100, kt(7), 5)).await;
    let called = store.read(|t| t.contracts[&STUB].clone());
    assert_eq!(called.storage_value(), Some(Prim::int(5)));
    assert_eq!(called.n_slots(), 1);

    disconnect(&store, &registry, &mut builder, 100).await;
    let after = store.read(|t| t.contracts[&STUB].clone());
    assert_eq!(after, before);
    assert!(after.call_stats.is_empty());
}

#[tokio::test]
async fn reconnecting_a_block_is_idempotent() {
    let store = seeded_store();
    let (registry, mut builder) = setup(&store).await;

    let ctx = connect(&registry, &mut builder, &origination(100)).await;
    let once = store.snapshot();

    // replay through the registry skips modules already at the height
    registry.connect_block(&ctx.block, &ctx).await.unwrap();
    assert_eq!(store.snapshot(), once);

    // and every module accepts the same block again
    for index in standard_indexes(&store) {
        index.connect_block(&ctx.block, &ctx).await.unwrap();
    }
    assert_eq!(store.snapshot(), once);
}

#[tokio::test]
async fn delete_cycle_purges_summaries_only() {
    let store = seeded_store();
    let (registry, mut builder) = setup(&store).await;
    connect(&registry, &mut builder, &transfer(100, tz(4))).await;

    let src = store.read(|t| t.flow_summary(0))[&SRC].clone();
    assert_eq!((src.fees_paid, src.burned, src.sent), (100, 50, 350));

    registry.delete_cycle(0).await.unwrap();
    store.read(|t| {
        assert!(t.flow_summary(0).is_empty());
        assert_eq!(t.flows_at(100).len(), 5);
    });
}

#[tokio::test]
async fn stub_contract_gets_script_from_task() {
    let store = seeded_store();
    let (registry, _) = setup(&store).await;
    let (scheduler, mut queue) = TaskScheduler::channel(16);
    let mut builder = Builder::new(store.clone()).with_scheduler(scheduler);
    builder.register_params(Params::new("PtHangz2", 11, CHAIN).with_start(1, 0, 0));
    builder.init().await.unwrap();

    connect(&registry, &mut builder, &transfer(100, kt(7))).await;
    let id = store.read(|t| t.addresses[&kt(7)]);
    assert!(!store.read(|t| t.contracts[&id].has_script()));

    let tasks = queue.drain();
    assert_eq!(tasks.len(), 1);
    assert_eq!((tasks[0].index.as_str(), tasks[0].kind.as_str()), ("contract", "script"));

    let result = TaskResult {
        task: tasks[0].clone(),
        outcome: Ok(script()),
    };
    registry.on_task_complete(&result).await.unwrap();
    let c = store.read(|t| t.contracts[&id].clone());
    assert!(c.has_script());
    assert_eq!(c.n_slots(), 1);
}

#[tokio::test]
async fn failed_begin_leaves_no_partial_block() {
    let store = seeded_store();
    let (registry, mut builder) = setup(&store).await;
    let ctx = builder.build(&transfer(100, tz(4))).await.unwrap();

    // an open transaction makes the registry's begin fail before any write
    store.begin(1).await.unwrap();
    assert!(registry.connect_block(&ctx.block, &ctx).await.is_err());
    store.abort().await.unwrap();

    assert!(store.read(|t| t.blocks.is_empty() && t.ops.is_empty()));
    assert!(registry.min_tip().is_none());
}
