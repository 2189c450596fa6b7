//! Bigmap updates from `lazy_storage_diff` and the legacy `big_map_diff`.
//!
//! Both wire forms are flattened into one ordered list of [`BigmapEvent`]s.

use serde::{Deserialize, Serialize};

use crate::micheline::Prim;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffAction {
    Alloc,
    Update,
    Remove,
    Copy,
}

/// One bigmap change. A `Remove` with a key removes that key; without a key
/// it removes the whole bigmap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BigmapEvent {
    pub action: DiffAction,
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Prim>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Prim>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<Prim>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<Prim>,
}

impl BigmapEvent {
    fn new(action: DiffAction, id: i64) -> Self {
        Self {
            action,
            id,
            source_id: None,
            key_hash: None,
            key: None,
            value: None,
            key_type: None,
            value_type: None,
        }
    }

    /// Whether this event touches a single key.
    pub fn is_key_update(&self) -> bool {
        matches!(self.action, DiffAction::Update | DiffAction::Remove) && self.key.is_some()
    }
}

// ─── Legacy big_map_diff (< v008) ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyDiff {
    action: DiffAction,
    #[serde(default, with = "crate::util::opt_int_str")]
    big_map: Option<i64>,
    #[serde(default, with = "crate::util::opt_int_str")]
    source_big_map: Option<i64>,
    #[serde(default, with = "crate::util::opt_int_str")]
    destination_big_map: Option<i64>,
    #[serde(default)]
    key_hash: Option<String>,
    #[serde(default)]
    key: Option<Prim>,
    #[serde(default)]
    value: Option<Prim>,
    #[serde(default)]
    key_type: Option<Prim>,
    #[serde(default)]
    value_type: Option<Prim>,
}

impl LegacyDiff {
    fn into_event(self) -> BigmapEvent {
        match self.action {
            DiffAction::Copy => BigmapEvent {
                source_id: self.source_big_map,
                ..BigmapEvent::new(DiffAction::Copy, self.destination_big_map.unwrap_or(-1))
            },
            DiffAction::Update if self.value.is_none() => BigmapEvent {
                key_hash: self.key_hash,
                key: self.key,
                ..BigmapEvent::new(DiffAction::Remove, self.big_map.unwrap_or(-1))
            },
            action => BigmapEvent {
                key_hash: self.key_hash,
                key: self.key,
                value: self.value,
                key_type: self.key_type,
                value_type: self.value_type,
                ..BigmapEvent::new(action, self.big_map.unwrap_or(-1))
            },
        }
    }
}

// ─── lazy_storage_diff (v008+) ────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LazyDiff {
    kind: String,
    #[serde(with = "crate::util::int_str")]
    id: i64,
    diff: LazyDiffBody,
}

#[derive(Debug, Clone, Deserialize)]
struct LazyDiffBody {
    action: DiffAction,
    #[serde(default, with = "crate::util::opt_int_str")]
    source: Option<i64>,
    #[serde(default)]
    key_type: Option<Prim>,
    #[serde(default)]
    value_type: Option<Prim>,
    #[serde(default)]
    updates: LazyUpdates,
}

/// Bigmap diffs list key updates; sapling diffs carry an object we ignore.
#[derive(Debug, Clone, Default)]
struct LazyUpdates(Vec<LazyKeyUpdate>);

impl<'de> Deserialize<'de> for LazyUpdates {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let v = serde_json::Value::deserialize(d)?;
        match v {
            serde_json::Value::Array(_) => serde_json::from_value(v)
                .map(LazyUpdates)
                .map_err(serde::de::Error::custom),
            _ => Ok(LazyUpdates::default()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct LazyKeyUpdate {
    key_hash: String,
    key: Prim,
    #[serde(default)]
    value: Option<Prim>,
}

impl LazyDiff {
    fn push_events(self, out: &mut Vec<BigmapEvent>) {
        if self.kind != "big_map" {
            return;
        }
        let id = self.id;
        let body = self.diff;
        match body.action {
            DiffAction::Remove => {
                out.push(BigmapEvent::new(DiffAction::Remove, id));
                return;
            }
            DiffAction::Alloc => out.push(BigmapEvent {
                key_type: body.key_type,
                value_type: body.value_type,
                ..BigmapEvent::new(DiffAction::Alloc, id)
            }),
            DiffAction::Copy => out.push(BigmapEvent {
                source_id: body.source,
                ..BigmapEvent::new(DiffAction::Copy, id)
            }),
            DiffAction::Update => {}
        }
        for u in body.updates.0 {
            let action = if u.value.is_some() {
                DiffAction::Update
            } else {
                DiffAction::Remove
            };
            out.push(BigmapEvent {
                key_hash: Some(u.key_hash),
                key: Some(u.key),
                value: u.value,
                ..BigmapEvent::new(action, id)
            });
        }
    }
}

/// Flatten either diff form. The lazy form wins when both are present.
pub fn events(lazy: Option<Vec<LazyDiff>>, legacy: Option<Vec<LegacyDiff>>) -> Vec<BigmapEvent> {
    let mut out = Vec::new();
    if let Some(lazy) = lazy {
        for d in lazy {
            d.push_events(&mut out);
        }
    } else if let Some(legacy) = legacy {
        out.extend(legacy.into_iter().map(LegacyDiff::into_event));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lazy_diff_alloc_and_updates() {
        let lazy: Vec<LazyDiff> = serde_json::from_value(json!([
            { "kind": "big_map", "id": "17", "diff": {
                "action": "alloc",
                "updates": [
                    { "key_hash": "exprA", "key": { "int": "1" }, "value": { "string": "a" } },
                    { "key_hash": "exprB", "key": { "int": "2" } }
                ],
                "key_type": { "prim": "nat" },
                "value_type": { "prim": "string" }
            }},
            { "kind": "sapling_state", "id": "3", "diff": {
                "action": "update", "updates": { "commitments_and_ciphertexts": [], "nullifiers": [] }
            }},
            { "kind": "big_map", "id": "-4", "diff": { "action": "copy", "source": "17", "updates": [] } }
        ]))
        .unwrap();
        let ev = events(Some(lazy), None);
        assert_eq!(ev.len(), 4);
        assert_eq!(ev[0].action, DiffAction::Alloc);
        assert!(ev[0].key_type.is_some());
        assert_eq!(ev[1].action, DiffAction::Update);
        assert_eq!(ev[2].action, DiffAction::Remove);
        assert!(ev[2].is_key_update());
        assert_eq!(ev[3].action, DiffAction::Copy);
        assert_eq!((ev[3].id, ev[3].source_id), (-4, Some(17)));
    }

    #[test]
    fn legacy_diff() {
        let legacy: Vec<LegacyDiff> = serde_json::from_value(json!([
            { "action": "update", "big_map": "5", "key_hash": "exprA",
              "key": { "string": "k" }, "value": { "int": "9" } },
            { "action": "update", "big_map": "5", "key_hash": "exprB", "key": { "string": "j" } },
            { "action": "remove", "big_map": "6" }
        ]))
        .unwrap();
        let ev = events(None, Some(legacy));
        assert_eq!(ev[0].action, DiffAction::Update);
        assert_eq!(ev[1].action, DiffAction::Remove);
        assert!(ev[1].is_key_update());
        assert!(!ev[2].is_key_update());
        assert_eq!(ev[2].id, 6);
    }
}
