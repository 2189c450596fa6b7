//! Contract scripts: code sections, entrypoints, feature detection, hashes
//! and global constant expansion.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{OpCode, Prim};
use crate::error::DecodeError;

/// Upper bound on constant substitutions while expanding one script.
const MAX_EXPANSIONS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub code: Prim,
    pub storage: Prim,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entrypoint {
    /// Position in the call-stat vector.
    pub id: usize,
    pub name: String,
    /// Left/right path inside the parameter `or` tree.
    pub branch: String,
    pub typ: Prim,
}

impl Script {
    fn section(&self, op: OpCode) -> Option<&Prim> {
        match &self.code {
            Prim::Seq(items) => items
                .iter()
                .find(|p| p.is_op(op))
                .and_then(|p| p.args().first()),
            _ => None,
        }
    }

    pub fn param_type(&self) -> Option<&Prim> {
        self.section(OpCode::PARAMETER)
    }

    pub fn storage_type(&self) -> Option<&Prim> {
        self.section(OpCode::STORAGE)
    }

    pub fn views(&self) -> Vec<&Prim> {
        self.code
            .args()
            .iter()
            .filter(|p| p.is_op(OpCode::VIEW))
            .collect()
    }

    /// Entrypoints in call-stat order.
    pub fn entrypoints(&self) -> Vec<Entrypoint> {
        let mut out = Vec::new();
        if let Some(param) = self.param_type() {
            explode(param, String::new(), &mut out);
        }
        out
    }

    /// Hash of the parameter type.
    pub fn interface_hash(&self) -> u64 {
        self.param_type().map(Prim::hash64).unwrap_or(0)
    }

    pub fn code_hash(&self) -> u64 {
        self.code.hash64()
    }

    pub fn storage_hash(&self) -> u64 {
        self.storage.hash64()
    }

    pub fn features(&self) -> Features {
        Features::detect(&self.code)
    }

    /// Global constant hashes referenced by the code, in first-use order.
    pub fn constants(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.code.walk(&mut |p| {
            if let Some(hash) = constant_ref(p) {
                if !out.iter().any(|h| h == hash) {
                    out.push(hash.to_string());
                }
            }
            true
        });
        out
    }

    /// Replace every `constant "expr…"` node with its registered value.
    /// Constants may reference other constants.
    pub fn expand_constants<F>(&mut self, mut resolve: F) -> Result<(), DecodeError>
    where
        F: FnMut(&str) -> Option<Prim>,
    {
        let mut budget = MAX_EXPANSIONS;
        self.code.walk_mut(&mut |p| {
            while let Some(hash) = constant_ref(p).map(str::to_string) {
                if budget == 0 {
                    return Err(DecodeError::micheline("constant expansion limit reached"));
                }
                budget -= 1;
                *p = resolve(&hash).ok_or(DecodeError::MissingConstant { hash })?;
            }
            Ok(true)
        })
    }
}

fn constant_ref(p: &Prim) -> Option<&str> {
    match p {
        Prim::App { op, args, .. } if *op == OpCode::CONSTANT => match args.first() {
            Some(Prim::String(hash)) => Some(hash.as_str()),
            _ => None,
        },
        _ => None,
    }
}

fn explode(p: &Prim, branch: String, out: &mut Vec<Entrypoint>) {
    if p.is_op(OpCode::OR) && p.args().len() == 2 {
        if let Some(name) = p.field_annot() {
            push_entrypoint(out, name.to_string(), &branch, p);
        }
        explode(&p.args()[0], format!("{branch}L"), out);
        explode(&p.args()[1], format!("{branch}R"), out);
        return;
    }
    let name = match p.field_annot() {
        Some(name) => name.to_string(),
        None if branch.is_empty() => "default".to_string(),
        None => format!("entrypoint_{}", out.len()),
    };
    push_entrypoint(out, name, &branch, p);
}

fn push_entrypoint(out: &mut Vec<Entrypoint>, name: String, branch: &str, typ: &Prim) {
    out.push(Entrypoint {
        id: out.len(),
        name,
        branch: branch.to_string(),
        typ: typ.clone(),
    });
}

/// Resolve a call's entrypoint name to its call-stat slot. Calls to
/// `default` on a contract without an explicit default hit slot 0.
pub fn entrypoint_id(entrypoints: &[Entrypoint], name: &str) -> Option<usize> {
    entrypoints
        .iter()
        .find(|e| e.name == name)
        .map(|e| e.id)
        .or_else(|| (name == "default" || name.is_empty()).then_some(0))
}

// ─── Features ─────────────────────────────────────────────────────────────────

/// Bitset of notable instructions and types used by a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Features(u16);

impl Features {
    pub const ACCOUNT_FACTORY: Features = Features(1 << 0);
    pub const SET_DELEGATE: Features = Features(1 << 1);
    pub const TRANSFER_TOKENS: Features = Features(1 << 2);
    pub const LAMBDA: Features = Features(1 << 3);
    pub const SAPLING: Features = Features(1 << 4);
    pub const TICKETS: Features = Features(1 << 5);
    pub const VIEWS: Features = Features(1 << 6);
    pub const GLOBAL_CONSTANT: Features = Features(1 << 7);
    pub const TIMELOCK: Features = Features(1 << 8);
    pub const EVENTS: Features = Features(1 << 9);

    const NAMES: [(Features, &'static str); 10] = [
        (Self::ACCOUNT_FACTORY, "account_factory"),
        (Self::SET_DELEGATE, "set_delegate"),
        (Self::TRANSFER_TOKENS, "transfer_tokens"),
        (Self::LAMBDA, "lambda"),
        (Self::SAPLING, "sapling"),
        (Self::TICKETS, "tickets"),
        (Self::VIEWS, "views"),
        (Self::GLOBAL_CONSTANT, "global_constant"),
        (Self::TIMELOCK, "timelock"),
        (Self::EVENTS, "events"),
    ];

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn from_bits(bits: u16) -> Self {
        Features(bits)
    }

    pub fn contains(self, other: Features) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Features) {
        self.0 |= other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn detect(code: &Prim) -> Features {
        let mut f = Features::default();
        code.walk(&mut |p| {
            if let Some(op) = p.op() {
                match op.name() {
                    "CREATE_CONTRACT" => f.insert(Self::ACCOUNT_FACTORY),
                    "SET_DELEGATE" => f.insert(Self::SET_DELEGATE),
                    "TRANSFER_TOKENS" => f.insert(Self::TRANSFER_TOKENS),
                    "lambda" | "LAMBDA" | "LAMBDA_REC" => f.insert(Self::LAMBDA),
                    "sapling_state" | "sapling_transaction" => f.insert(Self::SAPLING),
                    "ticket" | "TICKET" => f.insert(Self::TICKETS),
                    "view" | "VIEW" => f.insert(Self::VIEWS),
                    "constant" => f.insert(Self::GLOBAL_CONSTANT),
                    "chest" | "chest_key" | "OPEN_CHEST" => f.insert(Self::TIMELOCK),
                    "EMIT" => f.insert(Self::EVENTS),
                    _ => {}
                }
            }
            true
        });
        f
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn script(param: serde_json::Value, code: serde_json::Value) -> Script {
        serde_json::from_value(json!({
            "code": [
                { "prim": "parameter", "args": [param] },
                { "prim": "storage", "args": [{ "prim": "nat" }] },
                { "prim": "code", "args": [code] }
            ],
            "storage": { "int": "0" }
        }))
        .unwrap()
    }

    #[test]
    fn entrypoints_from_or_tree() {
        let s = script(
            json!({ "prim": "or", "args": [
                { "prim": "nat", "annots": ["%mint"] },
                { "prim": "or", "args": [
                    { "prim": "address", "annots": ["%burn"] },
                    { "prim": "unit" }
                ]}
            ]}),
            json!([]),
        );
        let eps = s.entrypoints();
        let names: Vec<_> = eps.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["mint", "burn", "entrypoint_2"]);
        assert_eq!(eps[1].branch, "RL");
        assert_eq!(entrypoint_id(&eps, "burn"), Some(1));
        assert_eq!(entrypoint_id(&eps, "default"), Some(0));
        assert_eq!(entrypoint_id(&eps, "missing"), None);
    }

    #[test]
    fn single_entrypoint_is_default() {
        let s = script(json!({ "prim": "unit" }), json!([]));
        let eps = s.entrypoints();
        assert_eq!(eps.len(), 1);
        assert_eq!(eps[0].name, "default");
    }

    #[test]
    fn features_and_hashes() {
        let s = script(
            json!({ "prim": "unit" }),
            json!([{ "prim": "TRANSFER_TOKENS" }, { "prim": "EMIT" }]),
        );
        let f = s.features();
        assert!(f.contains(Features::TRANSFER_TOKENS));
        assert!(f.contains(Features::EVENTS));
        assert!(!f.contains(Features::VIEWS));
        assert_eq!(f.to_string(), "transfer_tokens,events");

        let other = script(json!({ "prim": "nat" }), json!([]));
        assert_ne!(s.interface_hash(), other.interface_hash());
        assert_eq!(s.storage_hash(), other.storage_hash());
    }

    #[test]
    fn expands_nested_constants() {
        let mut s = script(
            json!({ "prim": "unit" }),
            json!([{ "prim": "constant", "args": [{ "string": "exprA" }] }]),
        );
        assert_eq!(s.constants(), vec!["exprA".to_string()]);
        assert!(s.features().contains(Features::GLOBAL_CONSTANT));

        s.expand_constants(|h| match h {
            "exprA" => Some(Prim::Seq(vec![Prim::app(
                OpCode::CONSTANT,
                vec![Prim::string("exprB")],
            )])),
            "exprB" => Some(Prim::app(OpCode::from_name("DROP").unwrap(), vec![])),
            _ => None,
        })
        .unwrap();
        assert!(s.constants().is_empty());
        assert!(s.code.contains(|p| p.is_op(OpCode::from_name("DROP").unwrap())));
    }

    #[test]
    fn missing_or_cyclic_constants_fail() {
        let code = json!([{ "prim": "constant", "args": [{ "string": "exprA" }] }]);
        let mut s = script(json!({ "prim": "unit" }), code.clone());
        assert!(matches!(
            s.expand_constants(|_| None),
            Err(DecodeError::MissingConstant { .. })
        ));

        let mut s = script(json!({ "prim": "unit" }), code);
        let cyclic = Prim::app(OpCode::CONSTANT, vec![Prim::string("exprA")]);
        assert!(s.expand_constants(|_| Some(cyclic.clone())).is_err());
    }
}
