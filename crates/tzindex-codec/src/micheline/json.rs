//! Micheline JSON form as returned by the node.

use std::fmt;

use num_bigint::BigInt;
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use super::{OpCode, Prim};

impl Serialize for Prim {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Prim::Int(v) => {
                let mut m = s.serialize_map(Some(1))?;
                m.serialize_entry("int", &v.to_string())?;
                m.end()
            }
            Prim::String(v) => {
                let mut m = s.serialize_map(Some(1))?;
                m.serialize_entry("string", v)?;
                m.end()
            }
            Prim::Bytes(v) => {
                let mut m = s.serialize_map(Some(1))?;
                m.serialize_entry("bytes", &hex::encode(v))?;
                m.end()
            }
            Prim::Seq(items) => {
                let mut seq = s.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Prim::App { op, args, annots } => {
                let n = 1 + usize::from(!args.is_empty()) + usize::from(!annots.is_empty());
                let mut m = s.serialize_map(Some(n))?;
                m.serialize_entry("prim", op.name())?;
                if !args.is_empty() {
                    m.serialize_entry("args", args)?;
                }
                if !annots.is_empty() {
                    m.serialize_entry("annots", annots)?;
                }
                m.end()
            }
        }
    }
}

struct PrimVisitor;

impl<'de> Visitor<'de> for PrimVisitor {
    type Value = Prim;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a Micheline expression")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Prim, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element::<Prim>()? {
            items.push(item);
        }
        Ok(Prim::Seq(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Prim, A::Error> {
        let mut prim: Option<String> = None;
        let mut args: Vec<Prim> = Vec::new();
        let mut annots: Vec<String> = Vec::new();
        let mut value: Option<Prim> = None;

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "prim" => prim = Some(map.next_value()?),
                "args" => args = map.next_value()?,
                "annots" => annots = map.next_value()?,
                "int" => {
                    let s: String = map.next_value()?;
                    let v = s
                        .parse::<BigInt>()
                        .map_err(|_| de::Error::custom(format!("invalid int '{s}'")))?;
                    value = Some(Prim::Int(v));
                }
                "string" => value = Some(Prim::String(map.next_value()?)),
                "bytes" => {
                    let s: String = map.next_value()?;
                    let b = hex::decode(&s)
                        .map_err(|_| de::Error::custom(format!("invalid bytes '{s}'")))?;
                    value = Some(Prim::Bytes(b));
                }
                _ => {
                    map.next_value::<de::IgnoredAny>()?;
                }
            }
        }

        match (prim, value) {
            (Some(name), None) => {
                let op = OpCode::from_name(&name)
                    .ok_or_else(|| de::Error::custom(format!("unknown primitive '{name}'")))?;
                Ok(Prim::App { op, args, annots })
            }
            (None, Some(v)) => Ok(v),
            (Some(_), Some(_)) => Err(de::Error::custom("ambiguous Micheline node")),
            (None, None) => Err(de::Error::custom("empty Micheline node")),
        }
    }
}

impl<'de> Deserialize<'de> for Prim {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        d.deserialize_any(PrimVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_nested_expression() {
        let v: Prim = serde_json::from_value(json!({
            "prim": "Pair",
            "args": [
                { "int": "42" },
                [ { "string": "tz1" }, { "bytes": "cafe" } ]
            ]
        }))
        .unwrap();
        assert_eq!(
            v,
            Prim::app(
                OpCode::PAIR_DATA,
                vec![
                    Prim::int(42),
                    Prim::Seq(vec![Prim::string("tz1"), Prim::Bytes(vec![0xca, 0xfe])]),
                ]
            )
        );
    }

    #[test]
    fn annotations_and_encode_back() {
        let raw = json!({ "prim": "nat", "annots": ["%amount"] });
        let v: Prim = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(v.field_annot(), Some("amount"));
        assert_eq!(serde_json::to_value(&v).unwrap(), raw);
    }

    #[test]
    fn rejects_unknown_primitives() {
        assert!(serde_json::from_value::<Prim>(json!({ "prim": "FOO" })).is_err());
        assert!(serde_json::from_value::<Prim>(json!({ "int": "1x" })).is_err());
        assert!(serde_json::from_value::<Prim>(json!({})).is_err());
    }
}
