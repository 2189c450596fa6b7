//! Addresses hidden inside Micheline values.
//!
//! Contracts carry addresses in call parameters, storage, bigmap keys and
//! values, and ticket updates, either as base58 strings or in binary form,
//! possibly packed.

use crate::address::{Address, AddressSet};
use crate::bigmap::BigmapEvent;
use crate::micheline::Prim;
use crate::operation::Operation;
use crate::result::OperationResult;
use crate::ticket::TicketUpdate;

/// Walk `p` and add every address it contains.
pub fn collect_prim(p: &Prim, set: &mut AddressSet) {
    p.walk(&mut |node| match node {
        Prim::String(s) if s.len() == 36 || s.len() == 37 => {
            if let Ok(a) = Address::parse(s) {
                set.insert(a);
            }
            false
        }
        Prim::Bytes(b) if Address::is_address_bytes(b) => {
            if let Ok(a) = Address::from_bytes(b) {
                set.insert(a);
            }
            false
        }
        Prim::Bytes(b) if Prim::is_packed(b) => {
            if let Ok(inner) = Prim::unpack(b) {
                collect_prim(&inner, set);
            }
            false
        }
        _ => true,
    });
}

fn collect_bigmap(events: &[BigmapEvent], set: &mut AddressSet) {
    for ev in events.iter().filter(|e| e.is_key_update()) {
        for p in [&ev.key, &ev.value].into_iter().flatten() {
            collect_prim(p, set);
        }
    }
}

fn collect_tickets(updates: &[TicketUpdate], set: &mut AddressSet) {
    for u in updates {
        set.extend(u.accounts().copied());
    }
}

fn collect_result(r: &OperationResult, set: &mut AddressSet) {
    if let Some(storage) = &r.storage {
        collect_prim(storage, set);
    }
    collect_bigmap(&r.bigmap_events, set);
    collect_tickets(&r.ticket_updates, set);
}

impl Operation {
    /// Add addresses embedded in parameters, storage, bigmap updates and
    /// ticket updates of this operation and its internal results.
    pub fn collect_embedded(&self, set: &mut AddressSet) {
        match self {
            Operation::Transaction(tx) => {
                if !tx.destination.is_contract() {
                    return;
                }
                if let Some(params) = &tx.parameters {
                    collect_prim(&params.value, set);
                }
            }
            Operation::Origination(o) => {
                if let Some(script) = &o.script {
                    collect_prim(&script.storage, set);
                }
            }
            Operation::TransferTicket(t) => {
                collect_prim(&t.ticket_contents, set);
            }
            Operation::Rollup(_) => {}
            _ => return,
        }
        if let Some(r) = self.result() {
            collect_result(r, set);
        }
        for ir in self.internal_results() {
            if let Some(params) = &ir.parameters {
                collect_prim(&params.value, set);
            }
            if let Some(script) = &ir.script {
                collect_prim(&script.storage, set);
            }
            collect_result(&ir.result, set);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::micheline::OpCode;
    use serde_json::json;

    const TZ1: &str = "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx";
    const KT1: &str = "KT1PWx2mnDueood7fEmfbBDKx1D9BAnnXitn";

    #[test]
    fn strings_bytes_and_packed() {
        let tz = Address::parse(TZ1).unwrap();
        let kt = Address::parse(KT1).unwrap();
        let other = Address::new(crate::address::AddressType::Secp256k1, [9; 20]);
        let v = Prim::app(
            OpCode::PAIR_DATA,
            vec![
                Prim::string(TZ1),
                Prim::Seq(vec![
                    Prim::Bytes(kt.to_bytes()),
                    Prim::Bytes(Prim::Bytes(other.to_bytes()).pack()),
                    Prim::string("not an address at all, but 36 chars!"),
                ]),
            ],
        );
        let mut set = AddressSet::new();
        collect_prim(&v, &mut set);
        assert_eq!(set.len(), 3);
        assert!(set.contains(&tz) && set.contains(&kt) && set.contains(&other));
    }

    #[test]
    fn transaction_params_storage_bigmaps_and_tickets() {
        let holder = Address::new(crate::address::AddressType::P256, [3; 20]);
        let op = Operation::decode(json!({
            "kind": "transaction",
            "source": TZ1, "fee": "0", "counter": "1", "gas_limit": "0", "storage_limit": "0",
            "amount": "0", "destination": KT1,
            "parameters": { "entrypoint": "transfer", "value": { "string": TZ1 } },
            "metadata": {
                "balance_updates": [],
                "operation_result": {
                    "status": "applied",
                    "storage": { "bytes": hex::encode(Address::parse(KT1).unwrap().to_bytes()) },
                    "lazy_storage_diff": [{ "kind": "big_map", "id": "1", "diff": {
                        "action": "update",
                        "updates": [{ "key_hash": "exprX", "key": { "string": holder.to_string() },
                                      "value": { "int": "1" } }]
                    }}],
                    "ticket_updates": [{
                        "ticket_token": { "ticketer": KT1, "content_type": { "prim": "unit" },
                                          "content": { "prim": "Unit" } },
                        "updates": [{ "account": TZ1, "amount": "1" }]
                    }]
                }
            }
        }))
        .unwrap();
        let mut set = AddressSet::new();
        op.collect_embedded(&mut set);
        assert_eq!(set.len(), 3);
        assert!(set.contains(&holder));
    }

    #[test]
    fn implicit_destination_has_no_embedded_addresses() {
        let op = Operation::decode(json!({
            "kind": "transaction",
            "source": TZ1, "fee": "0", "counter": "1", "gas_limit": "0", "storage_limit": "0",
            "amount": "5", "destination": TZ1,
            "metadata": { "operation_result": { "status": "applied", "storage": { "string": KT1 } } }
        }))
        .unwrap();
        let mut set = AddressSet::new();
        op.collect_embedded(&mut set);
        assert!(set.is_empty());
    }
}
