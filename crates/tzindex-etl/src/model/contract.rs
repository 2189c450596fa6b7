//! Contract state and its exact update/rollback pair.

use serde::{Deserialize, Serialize};
use tzindex_codec::{Address, Features, Prim, Script};

use super::{AccountId, Op};

/// Call statistic slots of a smart rollup, one per rollup operation kind.
pub const ROLLUP_CALL_SLOTS: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub account_id: AccountId,
    pub address: Address,
    pub creator_id: Option<AccountId>,
    pub baker_id: Option<AccountId>,
    pub first_seen: i64,
    pub last_seen: i64,
    /// Length of the binary encoded storage.
    pub storage_size: i64,
    pub storage_paid: i64,
    pub storage_burn: i64,
    pub script: Option<Script>,
    /// Binary encoded storage, empty while unknown.
    pub storage: Vec<u8>,
    pub interface_hash: u64,
    pub code_hash: u64,
    pub storage_hash: u64,
    /// One 4-byte big-endian counter per entrypoint.
    pub call_stats: Vec<u8>,
    pub features: u16,
    pub n_calls_success: i64,
    pub n_calls_failed: i64,
}

impl Contract {
    /// A contract created by an origination, with its script already
    /// expanded.
    pub fn originate(
        account_id: AccountId,
        address: Address,
        creator_id: Option<AccountId>,
        baker_id: Option<AccountId>,
        script: Option<Script>,
        height: i64,
    ) -> Self {
        let mut c = Self::stub(account_id, address, height);
        c.creator_id = creator_id;
        c.baker_id = baker_id;
        if let Some(script) = script {
            c.set_script(script);
        }
        c
    }

    /// A contract known only by address. Rollups get their fixed call slots.
    pub fn stub(account_id: AccountId, address: Address, height: i64) -> Self {
        let slots = if address.is_rollup() { ROLLUP_CALL_SLOTS } else { 0 };
        Self {
            account_id,
            address,
            creator_id: None,
            baker_id: None,
            first_seen: height,
            last_seen: height,
            storage_size: 0,
            storage_paid: 0,
            storage_burn: 0,
            script: None,
            storage: Vec::new(),
            interface_hash: 0,
            code_hash: 0,
            storage_hash: 0,
            call_stats: vec![0; slots * 4],
            features: 0,
            n_calls_success: 0,
            n_calls_failed: 0,
        }
    }

    /// Install the script and its initial storage. Existing call counters
    /// are kept when the entrypoint count does not change.
    pub fn set_script(&mut self, script: Script) {
        let n = script.entrypoints().len();
        if self.call_stats.len() != n * 4 {
            self.call_stats = vec![0; n * 4];
        }
        self.interface_hash = script.interface_hash();
        self.code_hash = script.code_hash();
        self.features = script.features().bits();
        let storage = script.storage.to_bytes();
        self.set_storage(storage, script.storage_hash());
        self.script = Some(script);
    }

    fn set_storage(&mut self, storage: Vec<u8>, hash: u64) {
        self.storage_size = storage.len() as i64;
        self.storage = storage;
        self.storage_hash = hash;
    }

    pub fn has_script(&self) -> bool {
        self.script.is_some()
    }

    pub fn features(&self) -> Features {
        Features::from_bits(self.features)
    }

    /// Decoded storage, `None` while unknown.
    pub fn storage_value(&self) -> Option<Prim> {
        if self.storage.is_empty() {
            return None;
        }
        Prim::from_bytes(&self.storage).ok()
    }

    pub fn n_slots(&self) -> usize {
        self.call_stats.len() / 4
    }

    pub fn call_count(&self, slot: usize) -> u32 {
        self.call_stats
            .get(slot * 4..slot * 4 + 4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            .unwrap_or(0)
    }

    fn add_call(&mut self, slot: usize, delta: i64) {
        if slot >= self.n_slots() {
            self.call_stats.resize((slot + 1) * 4, 0);
        }
        let v = (self.call_count(slot) as i64 + delta).max(0) as u32;
        self.call_stats[slot * 4..slot * 4 + 4].copy_from_slice(&v.to_be_bytes());
    }

    /// Apply one operation on this contract.
    pub fn update(&mut self, op: &Op) {
        if !op.is_success {
            if op.is_call() {
                self.n_calls_failed += 1;
            }
            return;
        }
        self.last_seen = op.height;
        if let Some(slot) = op.entrypoint_id {
            self.add_call(slot, 1);
            self.n_calls_success += 1;
        }
        self.storage_paid += op.storage_paid;
        self.storage_burn += op.burned;
        if let Some(storage) = &op.storage {
            if op.storage_hash != self.storage_hash {
                self.set_storage(storage.clone(), op.storage_hash);
            }
        }
    }

    /// Undo `drop`, the operations applied on this contract since the
    /// rollback point. `last` is the latest successful operation on this
    /// contract before that point, the origination at the earliest.
    pub fn rollback(&mut self, drop: &[Op], last: Option<&Op>) {
        for op in drop.iter().rev() {
            if !op.is_success {
                if op.is_call() {
                    self.n_calls_failed -= 1;
                }
                continue;
            }
            if let Some(slot) = op.entrypoint_id {
                self.add_call(slot, -1);
                self.n_calls_success -= 1;
            }
            self.storage_paid -= op.storage_paid;
            self.storage_burn -= op.burned;
        }
        match last {
            Some(last) => {
                self.last_seen = last.height;
                if let Some(storage) = &last.storage {
                    self.set_storage(storage.clone(), last.storage_hash);
                }
            }
            None => self.last_seen = self.first_seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde_json::json;
    use tzindex_codec::{AddressType, OpKind};

    fn script() -> Script {
        serde_json::from_value(json!({
            "code": [
                { "prim": "parameter", "args": [{ "prim": "or", "args": [
                    { "prim": "int", "annots": ["%set"] },
                    { "prim": "unit", "annots": ["%reset"] }
                ]}]},
                { "prim": "storage", "args": [{ "prim": "int" }] },
                { "prim": "code", "args": [[]] }
            ],
            "storage": { "int": "0" }
        }))
        .unwrap()
    }

    fn call(height: i64, slot: usize, value: i64, success: bool) -> Op {
        let storage = Prim::int(value);
        let mut op = Op::new(
            OpKind::Transaction,
            height,
            DateTime::from_timestamp(height * 30, 0).unwrap(),
        );
        op.contract_id = Some(2);
        op.entrypoint_id = Some(slot);
        op.is_success = success;
        if success {
            op.storage_hash = storage.hash64();
            op.storage = Some(storage.to_bytes());
            op.storage_paid = 3;
            op.burned = 750;
        }
        op
    }

    fn origination(c: &Contract) -> Op {
        let mut op = Op::new(OpKind::Origination, c.first_seen, DateTime::from_timestamp(0, 0).unwrap());
        op.contract_id = Some(c.account_id);
        op.storage = Some(c.storage.clone());
        op.storage_hash = c.storage_hash;
        op
    }

    fn contract() -> Contract {
        Contract::originate(2, Address::new(AddressType::Contract, [2; 20]), Some(1), None, Some(script()), 10)
    }

    #[test]
    fn originate_sizes_call_stats() {
        let c = contract();
        assert_eq!(c.n_slots(), 2);
        assert_eq!(c.storage_value(), Some(Prim::int(0)));
        assert_eq!(c.storage_size, c.storage.len() as i64);
        assert_ne!(c.interface_hash, 0);

        let rollup = Contract::stub(3, Address::new(AddressType::SmartRollup, [3; 20]), 10);
        assert_eq!(rollup.call_stats.len(), ROLLUP_CALL_SLOTS * 4);
    }

    #[test]
    fn update_counts_calls_big_endian() {
        let mut c = contract();
        c.update(&call(11, 1, 5, true));
        c.update(&call(12, 1, 5, true));
        assert_eq!(c.call_count(1), 2);
        assert_eq!(&c.call_stats[4..8], &[0, 0, 0, 2]);
        assert_eq!(c.storage_value(), Some(Prim::int(5)));
        assert_eq!(c.last_seen, 12);
        assert_eq!(c.storage_paid, 6);
    }

    #[test]
    fn failed_call_only_counts_failure() {
        let mut c = contract();
        let before = c.clone();
        c.update(&call(11, 0, 9, false));
        assert_eq!(c.n_calls_failed, 1);
        assert_eq!(c.call_count(0), 0);
        assert_eq!(c.storage, before.storage);
        c.rollback(&[call(11, 0, 9, false)], Some(&origination(&before)));
        assert_eq!(c, before);
    }

    #[test]
    fn rollback_inverts_update() {
        let mut c = contract();
        let genesis = c.clone();
        let first = call(11, 0, 7, true);
        c.update(&first);
        let after_first = c.clone();

        let drop = vec![call(12, 1, 8, true), call(12, 0, 8, true), call(12, 1, 8, false)];
        for op in &drop {
            c.update(op);
        }
        assert_ne!(c, after_first);

        c.rollback(&drop, Some(&first));
        assert_eq!(c, after_first);

        c.rollback(&[first], Some(&origination(&genesis)));
        assert_eq!(c, genesis);
    }

    #[test]
    fn unchanged_storage_hash_keeps_storage() {
        let mut c = contract();
        let mut op = call(11, 0, 0, true);
        op.storage = Some(vec![0xff]);
        op.storage_hash = c.storage_hash;
        c.update(&op);
        assert_eq!(c.storage_value(), Some(Prim::int(0)));
    }
}
