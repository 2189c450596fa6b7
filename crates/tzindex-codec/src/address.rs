//! Tezos addresses in base58check and binary form.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexSet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DecodeError;

/// Insertion ordered, de-duplicated address collection.
pub type AddressSet = IndexSet<Address>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    /// `tz1`
    Ed25519,
    /// `tz2`
    Secp256k1,
    /// `tz3`
    P256,
    /// `tz4`
    Bls12_381,
    /// `KT1`
    Contract,
    /// `txr1`
    TxRollup,
    /// `sr1`
    SmartRollup,
}

impl AddressType {
    const ALL: [AddressType; 7] = [
        Self::Ed25519,
        Self::Secp256k1,
        Self::P256,
        Self::Bls12_381,
        Self::Contract,
        Self::TxRollup,
        Self::SmartRollup,
    ];

    fn prefix(self) -> &'static [u8] {
        match self {
            Self::Ed25519 => &[6, 161, 159],
            Self::Secp256k1 => &[6, 161, 161],
            Self::P256 => &[6, 161, 164],
            Self::Bls12_381 => &[6, 161, 166],
            Self::Contract => &[2, 90, 121],
            Self::TxRollup => &[1, 128, 120, 31],
            Self::SmartRollup => &[6, 124, 117],
        }
    }

    /// Curve tag used in the implicit binary form.
    fn key_tag(self) -> Option<u8> {
        match self {
            Self::Ed25519 => Some(0),
            Self::Secp256k1 => Some(1),
            Self::P256 => Some(2),
            Self::Bls12_381 => Some(3),
            _ => None,
        }
    }

    fn from_key_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Ed25519),
            1 => Some(Self::Secp256k1),
            2 => Some(Self::P256),
            3 => Some(Self::Bls12_381),
            _ => None,
        }
    }

    pub fn is_implicit(self) -> bool {
        self.key_tag().is_some()
    }
}

/// A 20-byte hash tagged with its address type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    kind: AddressType,
    hash: [u8; 20],
}

impl Address {
    pub fn new(kind: AddressType, hash: [u8; 20]) -> Self {
        Self { kind, hash }
    }

    pub fn kind(&self) -> AddressType {
        self.kind
    }

    pub fn hash(&self) -> &[u8; 20] {
        &self.hash
    }

    pub fn is_implicit(&self) -> bool {
        self.kind.is_implicit()
    }

    pub fn is_contract(&self) -> bool {
        self.kind == AddressType::Contract
    }

    pub fn is_rollup(&self) -> bool {
        matches!(self.kind, AddressType::TxRollup | AddressType::SmartRollup)
    }

    /// Parse a base58check address. An entrypoint suffix (`KT1…%mint`) is ignored.
    pub fn parse(input: &str) -> Result<Self, DecodeError> {
        let s = input.split('%').next().unwrap_or(input);
        let invalid = |reason: &str| DecodeError::InvalidAddress {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        let payload = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|e| invalid(&e.to_string()))?;
        let kind = AddressType::ALL
            .into_iter()
            .find(|k| payload.len() == k.prefix().len() + 20 && payload.starts_with(k.prefix()))
            .ok_or_else(|| invalid("unknown prefix"))?;
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&payload[kind.prefix().len()..]);
        Ok(Self { kind, hash })
    }

    /// Decode the 22-byte binary form (`00|tag|hash` or `0x|hash|00`) or the
    /// 21-byte key hash form (`tag|hash`).
    pub fn from_bytes(b: &[u8]) -> Result<Self, DecodeError> {
        let invalid = |reason: &str| DecodeError::InvalidAddress {
            input: hex::encode(b),
            reason: reason.to_string(),
        };
        let (kind, hash) = match b.len() {
            21 => {
                let kind = AddressType::from_key_tag(b[0]).ok_or_else(|| invalid("bad key tag"))?;
                (kind, &b[1..])
            }
            22 => match b[0] {
                0 => {
                    let kind =
                        AddressType::from_key_tag(b[1]).ok_or_else(|| invalid("bad key tag"))?;
                    (kind, &b[2..])
                }
                1 | 2 | 3 if b[21] == 0 => {
                    let kind = match b[0] {
                        1 => AddressType::Contract,
                        2 => AddressType::TxRollup,
                        _ => AddressType::SmartRollup,
                    };
                    (kind, &b[1..21])
                }
                _ => return Err(invalid("bad address tag")),
            },
            _ => return Err(invalid("bad length")),
        };
        let mut h = [0u8; 20];
        h.copy_from_slice(hash);
        Ok(Self { kind, hash: h })
    }

    /// Returns `true` if `b` looks like a binary encoded address.
    pub fn is_address_bytes(b: &[u8]) -> bool {
        Self::from_bytes(b).is_ok()
    }

    /// 22-byte binary form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(22);
        match self.kind.key_tag() {
            Some(tag) => {
                out.push(0);
                out.push(tag);
                out.extend_from_slice(&self.hash);
            }
            None => {
                out.push(match self.kind {
                    AddressType::Contract => 1,
                    AddressType::TxRollup => 2,
                    _ => 3,
                });
                out.extend_from_slice(&self.hash);
                out.push(0);
            }
        }
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut payload = self.kind.prefix().to_vec();
        payload.extend_from_slice(&self.hash);
        f.write_str(&bs58::encode(payload).with_check().into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Address::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TZ1: &str = "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx";
    const KT1: &str = "KT1PWx2mnDueood7fEmfbBDKx1D9BAnnXitn";

    #[test]
    fn parse_and_display_roundtrip() {
        for s in [TZ1, KT1] {
            let a = Address::parse(s).unwrap();
            assert_eq!(a.to_string(), s);
        }
        assert!(Address::parse(TZ1).unwrap().is_implicit());
        assert!(Address::parse(KT1).unwrap().is_contract());
    }

    #[test]
    fn entrypoint_suffix_ignored() {
        let a = Address::parse(&format!("{KT1}%transfer")).unwrap();
        assert_eq!(a.to_string(), KT1);
    }

    #[test]
    fn rejects_bad_checksum_and_prefix() {
        // last character changed
        assert!(Address::parse("tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSy").is_err());
        assert!(Address::parse("not an address").is_err());
    }

    #[test]
    fn binary_forms() {
        let tz = Address::parse(TZ1).unwrap();
        let kt = Address::parse(KT1).unwrap();
        assert_eq!(Address::from_bytes(&tz.to_bytes()).unwrap(), tz);
        assert_eq!(Address::from_bytes(&kt.to_bytes()).unwrap(), kt);
        // 21-byte key hash form drops the leading 0x00
        assert_eq!(Address::from_bytes(&tz.to_bytes()[1..]).unwrap(), tz);

        let mut padded = kt.to_bytes();
        padded[21] = 7;
        assert!(!Address::is_address_bytes(&padded));
        assert!(!Address::is_address_bytes(&[0u8; 10]));
    }

    #[test]
    fn serde_as_string() {
        let a: Address = serde_json::from_str(&format!("\"{TZ1}\"")).unwrap();
        assert_eq!(serde_json::to_string(&a).unwrap(), format!("\"{TZ1}\""));
    }
}
