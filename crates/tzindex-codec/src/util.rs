//! Serde helpers for the node's stringified integers, shared with the RPC
//! client.

use serde::de::{self, Deserializer, Visitor};
use serde::Serializer;

struct I64Visitor;

impl<'de> Visitor<'de> for I64Visitor {
    type Value = i64;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("an integer or a decimal string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
        Ok(v)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
        i64::try_from(v).map_err(|_| E::custom(format!("integer {v} out of range")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
        v.parse::<i64>()
            .map_err(|_| E::custom(format!("invalid integer string '{v}'")))
    }
}

/// `"123"` or `123` as `i64`.
pub mod int_str {
    use super::*;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        d.deserialize_any(I64Visitor)
    }

    pub fn serialize<S: Serializer>(v: &i64, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(v)
    }
}

/// Optional variant of [`int_str`]; use with `#[serde(default)]`.
pub mod opt_int_str {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Wrap(#[serde(with = "super::int_str")] i64);

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        Ok(Option::<Wrap>::deserialize(d)?.map(|w| w.0))
    }

    pub fn serialize<S: Serializer>(v: &Option<i64>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(v) => s.collect_str(v),
            None => s.serialize_none(),
        }
    }
}

/// Arbitrary precision integer carried as a decimal string.
pub mod bigint_str {
    use super::*;
    use num_bigint::BigInt;
    use serde::Deserialize;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BigInt, D::Error> {
        let s = String::deserialize(d)?;
        s.parse::<BigInt>()
            .map_err(|_| de::Error::custom(format!("invalid integer string '{s}'")))
    }

    pub fn serialize<S: Serializer>(v: &BigInt, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(v)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Amounts {
        #[serde(with = "super::int_str")]
        fee: i64,
        #[serde(default, with = "super::opt_int_str")]
        limit: Option<i64>,
    }

    #[test]
    fn string_and_number_integers() {
        let a: Amounts = serde_json::from_str(r#"{"fee":"1420","limit":"-5"}"#).unwrap();
        assert_eq!(a, Amounts { fee: 1420, limit: Some(-5) });
        let b: Amounts = serde_json::from_str(r#"{"fee":7}"#).unwrap();
        assert_eq!(b.limit, None);
        assert!(serde_json::from_str::<Amounts>(r#"{"fee":"x"}"#).is_err());
        assert_eq!(serde_json::to_string(&b).unwrap(), r#"{"fee":"7","limit":null}"#);
    }
}
