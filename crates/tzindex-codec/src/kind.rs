//! Operation kind discriminator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DecodeError;

macro_rules! op_kinds {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Every `kind` string the decoder understands.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum OpKind {
            $($variant),+
        }

        impl OpKind {
            pub const ALL: &'static [OpKind] = &[$(OpKind::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(OpKind::$variant => $name),+
                }
            }
        }

        impl FromStr for OpKind {
            type Err = DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(OpKind::$variant),)+
                    _ => Err(DecodeError::UnsupportedKind { kind: s.to_string() }),
                }
            }
        }
    };
}

op_kinds! {
    ActivateAccount                 => "activate_account",
    DoubleBakingEvidence            => "double_baking_evidence",
    DoubleEndorsementEvidence       => "double_endorsement_evidence",
    DoublePreendorsementEvidence    => "double_preendorsement_evidence",
    DoubleAttestationEvidence       => "double_attestation_evidence",
    DoublePreattestationEvidence    => "double_preattestation_evidence",
    SeedNonceRevelation             => "seed_nonce_revelation",
    VdfRevelation                   => "vdf_revelation",
    DrainDelegate                   => "drain_delegate",
    Endorsement                     => "endorsement",
    EndorsementWithSlot             => "endorsement_with_slot",
    Preendorsement                  => "preendorsement",
    Attestation                     => "attestation",
    Preattestation                  => "preattestation",
    AttestationWithDal              => "attestation_with_dal",
    DalAttestation                  => "dal_attestation",
    Proposals                       => "proposals",
    Ballot                          => "ballot",
    Reveal                          => "reveal",
    Transaction                     => "transaction",
    Origination                     => "origination",
    Delegation                      => "delegation",
    RegisterGlobalConstant          => "register_global_constant",
    SetDepositsLimit                => "set_deposits_limit",
    IncreasePaidStorage             => "increase_paid_storage",
    TransferTicket                  => "transfer_ticket",
    UpdateConsensusKey              => "update_consensus_key",
    TxRollupOrigination             => "tx_rollup_origination",
    TxRollupSubmitBatch             => "tx_rollup_submit_batch",
    TxRollupCommit                  => "tx_rollup_commit",
    TxRollupReturnBond              => "tx_rollup_return_bond",
    TxRollupFinalizeCommitment      => "tx_rollup_finalize_commitment",
    TxRollupRemoveCommitment        => "tx_rollup_remove_commitment",
    TxRollupRejection               => "tx_rollup_rejection",
    TxRollupDispatchTickets         => "tx_rollup_dispatch_tickets",
    SmartRollupOriginate            => "smart_rollup_originate",
    SmartRollupAddMessages          => "smart_rollup_add_messages",
    SmartRollupCement               => "smart_rollup_cement",
    SmartRollupPublish              => "smart_rollup_publish",
    SmartRollupRefute               => "smart_rollup_refute",
    SmartRollupTimeout              => "smart_rollup_timeout",
    SmartRollupExecuteOutboxMessage => "smart_rollup_execute_outbox_message",
    SmartRollupRecoverBond          => "smart_rollup_recover_bond",
    DalPublishSlotHeader            => "dal_publish_slot_header",
    Event                           => "event",
}

impl OpKind {
    /// Manager operations carry `source`, `fee` and `counter` and pay fees
    /// whether or not they apply.
    pub fn is_manager(self) -> bool {
        use OpKind::*;
        matches!(
            self,
            Reveal
                | Transaction
                | Origination
                | Delegation
                | RegisterGlobalConstant
                | SetDepositsLimit
                | IncreasePaidStorage
                | TransferTicket
                | UpdateConsensusKey
                | DalPublishSlotHeader
        ) || self.is_tx_rollup()
            || self.is_smart_rollup()
    }

    pub fn is_consensus(self) -> bool {
        use OpKind::*;
        matches!(
            self,
            Endorsement
                | EndorsementWithSlot
                | Preendorsement
                | Attestation
                | Preattestation
                | AttestationWithDal
                | DalAttestation
        )
    }

    pub fn is_evidence(self) -> bool {
        use OpKind::*;
        matches!(
            self,
            DoubleBakingEvidence
                | DoubleEndorsementEvidence
                | DoublePreendorsementEvidence
                | DoubleAttestationEvidence
                | DoublePreattestationEvidence
        )
    }

    pub fn is_tx_rollup(self) -> bool {
        self.as_str().starts_with("tx_rollup_")
    }

    pub fn is_smart_rollup(self) -> bool {
        self.as_str().starts_with("smart_rollup_")
    }

    /// Kinds that can appear only inside internal operation results.
    pub fn is_internal_only(self) -> bool {
        self == OpKind::Event
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OpKind {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OpKind {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_parses_back() {
        for kind in OpKind::ALL {
            assert_eq!(kind.as_str().parse::<OpKind>().unwrap(), *kind);
        }
    }

    #[test]
    fn unknown_kind_is_typed_error() {
        let err = "zk_rollup_publish".parse::<OpKind>().unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedKind { kind } if kind == "zk_rollup_publish"));
        assert!("".parse::<OpKind>().is_err());
    }

    #[test]
    fn classification() {
        assert!(OpKind::Transaction.is_manager());
        assert!(OpKind::SmartRollupCement.is_manager());
        assert!(OpKind::TxRollupCommit.is_manager());
        assert!(!OpKind::Attestation.is_manager());
        assert!(OpKind::Attestation.is_consensus());
        assert!(OpKind::DoubleBakingEvidence.is_evidence());
        assert!(OpKind::Event.is_internal_only());
    }
}
