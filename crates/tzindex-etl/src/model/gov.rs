use serde::{Deserialize, Serialize};
use tzindex_codec::{Features, Prim};

use super::AccountId;

pub type ProposalId = u64;

/// Registered global constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constant {
    /// Expression hash (`expr…`).
    pub address: String,
    pub creator_id: AccountId,
    pub height: i64,
    pub value: Prim,
    pub storage_size: i64,
    pub features: u16,
}

impl Constant {
    pub fn new(address: impl Into<String>, creator_id: AccountId, height: i64, value: Prim) -> Self {
        let storage_size = value.to_bytes().len() as i64;
        let features = Features::detect(&value).bits();
        Self {
            address: address.into(),
            creator_id,
            height,
            value,
            storage_size,
            features,
        }
    }
}

/// Protocol amendment proposal, created by its first upvote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub hash: String,
    pub height: i64,
    pub period: i64,
    pub source_id: AccountId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Yay,
    Nay,
    Pass,
    /// Upvote of a proposal during the proposal period.
    Proposal,
}

impl Vote {
    pub fn parse(s: &str) -> Option<Vote> {
        match s {
            "yay" => Some(Vote::Yay),
            "nay" => Some(Vote::Nay),
            "pass" => Some(Vote::Pass),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub height: i64,
    pub cycle: i64,
    pub op_n: usize,
    pub period: i64,
    pub proposal_id: ProposalId,
    pub source_id: AccountId,
    pub vote: Vote,
}
