//! Ticket balance updates reported by operation receipts.

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

use crate::address::Address;
use crate::micheline::{OpCode, Prim};

/// Identity of a ticket: who minted it and what it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketToken {
    pub ticketer: Address,
    pub content_type: Prim,
    pub content: Prim,
}

impl TicketToken {
    /// Stable identity hash over ticketer, type and content.
    pub fn hash64(&self) -> u64 {
        let key = Prim::app(
            OpCode::PAIR_DATA,
            vec![
                Prim::Bytes(self.ticketer.to_bytes()),
                Prim::app(
                    OpCode::PAIR_DATA,
                    vec![self.content_type.clone(), self.content.clone()],
                ),
            ],
        );
        xxh64(&key.to_bytes(), 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketBalance {
    pub account: Address,
    #[serde(with = "crate::util::bigint_str")]
    pub amount: BigInt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketUpdate {
    #[serde(rename = "ticket_token")]
    pub ticket: TicketToken,
    #[serde(default)]
    pub updates: Vec<TicketBalance>,
}

impl TicketUpdate {
    pub fn accounts(&self) -> impl Iterator<Item = &Address> {
        self.updates.iter().map(|u| &u.account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_ticket_update() {
        let u: TicketUpdate = serde_json::from_value(json!({
            "ticket_token": {
                "ticketer": "KT1PWx2mnDueood7fEmfbBDKx1D9BAnnXitn",
                "content_type": { "prim": "string" },
                "content": { "string": "gold" }
            },
            "updates": [
                { "account": "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx", "amount": "-10" },
                { "account": "KT1PWx2mnDueood7fEmfbBDKx1D9BAnnXitn", "amount": "10" }
            ]
        }))
        .unwrap();
        assert_eq!(u.updates.len(), 2);
        assert_eq!(u.updates[0].amount, BigInt::from(-10));
        assert_eq!(u.accounts().count(), 2);

        let mut other = u.ticket.clone();
        other.content = Prim::string("silver");
        assert_ne!(u.ticket.hash64(), other.hash64());
    }
}
