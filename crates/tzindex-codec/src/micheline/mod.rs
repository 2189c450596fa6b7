//! Micheline values: the tree form shared by contract code, storage and
//! parameters.

mod binary;
mod json;
mod script;

pub use script::{entrypoint_id, Entrypoint, Features, Script};

use num_bigint::BigInt;
use xxhash_rust::xxh64::xxh64;

use crate::error::DecodeError;

/// Byte prefix of `PACK`ed values.
pub const PACKED_PREFIX: u8 = 0x05;

static OPCODES: [&str; 157] = [
    "parameter", "storage", "code", "False", "Elt", "Left", "None", "Pair", "Right", "Some",
    "True", "Unit", "PACK", "UNPACK", "BLAKE2B", "SHA256", "SHA512", "ABS", "ADD", "AMOUNT",
    "AND", "BALANCE", "CAR", "CDR", "CHECK_SIGNATURE", "COMPARE", "CONCAT", "CONS",
    "CREATE_ACCOUNT", "CREATE_CONTRACT", "IMPLICIT_ACCOUNT", "DIP", "DROP", "DUP", "EDIV",
    "EMPTY_MAP", "EMPTY_SET", "EQ", "EXEC", "FAILWITH", "GE", "GET", "GT", "HASH_KEY", "IF",
    "IF_CONS", "IF_LEFT", "IF_NONE", "INT", "LAMBDA", "LE", "LEFT", "LOOP", "LSL", "LSR", "LT",
    "MAP", "MEM", "MUL", "NEG", "NEQ", "NIL", "NONE", "NOT", "NOW", "OR", "PAIR", "PUSH",
    "RIGHT", "SIZE", "SOME", "SOURCE", "SENDER", "SELF", "STEPS_TO_QUOTA", "SUB", "SWAP",
    "TRANSFER_TOKENS", "SET_DELEGATE", "UNIT", "UPDATE", "XOR", "ITER", "LOOP_LEFT", "ADDRESS",
    "CONTRACT", "ISNAT", "CAST", "RENAME", "bool", "contract", "int", "key", "key_hash",
    "lambda", "list", "map", "big_map", "nat", "option", "or", "pair", "set", "signature",
    "string", "bytes", "mutez", "timestamp", "unit", "operation", "address", "SLICE", "DIG",
    "DUG", "EMPTY_BIG_MAP", "APPLY", "chain_id", "CHAIN_ID", "LEVEL", "SELF_ADDRESS", "never",
    "NEVER", "UNPAIR", "VOTING_POWER", "TOTAL_VOTING_POWER", "KECCAK", "SHA3", "PAIRING_CHECK",
    "bls12_381_g1", "bls12_381_g2", "bls12_381_fr", "sapling_state",
    "sapling_transaction_deprecated", "SAPLING_EMPTY_STATE", "SAPLING_VERIFY_UPDATE", "ticket",
    "TICKET_DEPRECATED", "READ_TICKET", "SPLIT_TICKET", "JOIN_TICKETS", "GET_AND_UPDATE",
    "chest", "chest_key", "OPEN_CHEST", "VIEW", "view", "constant", "SUB_MUTEZ",
    "tx_rollup_l2_address", "MIN_BLOCK_TIME", "sapling_transaction", "EMIT", "Lambda_rec",
    "LAMBDA_REC", "TICKET", "BYTES", "NAT",
];

/// A Micheline primitive, identified by its binary opcode.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpCode(u8);

impl OpCode {
    pub const PARAMETER: OpCode = OpCode(0x00);
    pub const STORAGE: OpCode = OpCode(0x01);
    pub const CODE: OpCode = OpCode(0x02);
    pub const ELT: OpCode = OpCode(0x04);
    pub const PAIR_DATA: OpCode = OpCode(0x07);
    pub const EMIT: OpCode = OpCode(0x97);
    pub const BIG_MAP: OpCode = OpCode(0x61);
    pub const OR: OpCode = OpCode(0x64);
    pub const PAIR: OpCode = OpCode(0x65);
    pub const ADDRESS: OpCode = OpCode(0x6e);
    pub const SAPLING_STATE: OpCode = OpCode(0x83);
    pub const TICKET_TYPE: OpCode = OpCode(0x87);
    pub const CHEST: OpCode = OpCode(0x8d);
    pub const VIEW: OpCode = OpCode(0x91);
    pub const CONSTANT: OpCode = OpCode(0x92);
    pub const LAMBDA: OpCode = OpCode(0x5e);

    pub fn from_name(name: &str) -> Option<OpCode> {
        OPCODES.iter().position(|n| *n == name).map(|i| OpCode(i as u8))
    }

    pub fn from_byte(b: u8) -> Option<OpCode> {
        ((b as usize) < OPCODES.len()).then_some(OpCode(b))
    }

    pub fn byte(self) -> u8 {
        self.0
    }

    pub fn name(self) -> &'static str {
        OPCODES[self.0 as usize]
    }
}

impl std::fmt::Debug for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Prim {
    Int(BigInt),
    String(String),
    Bytes(Vec<u8>),
    Seq(Vec<Prim>),
    App {
        op: OpCode,
        args: Vec<Prim>,
        annots: Vec<String>,
    },
}

impl Prim {
    pub fn app(op: OpCode, args: Vec<Prim>) -> Prim {
        Prim::App {
            op,
            args,
            annots: Vec::new(),
        }
    }

    pub fn string(s: impl Into<String>) -> Prim {
        Prim::String(s.into())
    }

    pub fn int(v: i64) -> Prim {
        Prim::Int(BigInt::from(v))
    }

    pub fn op(&self) -> Option<OpCode> {
        match self {
            Prim::App { op, .. } => Some(*op),
            _ => None,
        }
    }

    pub fn is_op(&self, code: OpCode) -> bool {
        self.op() == Some(code)
    }

    pub fn args(&self) -> &[Prim] {
        match self {
            Prim::App { args, .. } => args,
            Prim::Seq(items) => items,
            _ => &[],
        }
    }

    pub fn annots(&self) -> &[String] {
        match self {
            Prim::App { annots, .. } => annots,
            _ => &[],
        }
    }

    /// The `%field` annotation without its sigil.
    pub fn field_annot(&self) -> Option<&str> {
        self.annots().iter().find_map(|a| a.strip_prefix('%'))
    }

    /// Depth-first pre-order walk. `f` returns `false` to skip a subtree.
    pub fn walk<F: FnMut(&Prim) -> bool>(&self, f: &mut F) {
        if !f(self) {
            return;
        }
        for child in self.args() {
            child.walk(f);
        }
    }

    /// Mutable variant of [`Prim::walk`].
    pub fn walk_mut<F>(&mut self, f: &mut F) -> Result<(), DecodeError>
    where
        F: FnMut(&mut Prim) -> Result<bool, DecodeError>,
    {
        if !f(self)? {
            return Ok(());
        }
        match self {
            Prim::App { args, .. } | Prim::Seq(args) => {
                for child in args {
                    child.walk_mut(f)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Returns `true` if any node satisfies `pred`.
    pub fn contains(&self, mut pred: impl FnMut(&Prim) -> bool) -> bool {
        let mut found = false;
        self.walk(&mut |p| {
            if found {
                return false;
            }
            if pred(p) {
                found = true;
            }
            !found
        });
        found
    }

    /// Binary encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        binary::encode(self, &mut out);
        out
    }

    /// Decode a complete binary encoded value.
    pub fn from_bytes(b: &[u8]) -> Result<Prim, DecodeError> {
        let (prim, used) = binary::decode(b)?;
        if used != b.len() {
            return Err(DecodeError::micheline(format!(
                "{} trailing bytes",
                b.len() - used
            )));
        }
        Ok(prim)
    }

    /// `PACK` form: `0x05` followed by the binary encoding.
    pub fn pack(&self) -> Vec<u8> {
        let mut out = vec![PACKED_PREFIX];
        binary::encode(self, &mut out);
        out
    }

    /// Returns `true` if `b` decodes as a packed value.
    pub fn is_packed(b: &[u8]) -> bool {
        b.len() > 1
            && b[0] == PACKED_PREFIX
            && binary::decode(&b[1..])
                .map(|(_, n)| n + 1 == b.len())
                .unwrap_or(false)
    }

    pub fn unpack(b: &[u8]) -> Result<Prim, DecodeError> {
        match b.split_first() {
            Some((&PACKED_PREFIX, rest)) => Prim::from_bytes(rest),
            _ => Err(DecodeError::micheline("missing pack prefix")),
        }
    }

    /// 64-bit hash of the binary encoding.
    pub fn hash64(&self) -> u64 {
        xxh64(&self.to_bytes(), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_table() {
        assert_eq!(OpCode::from_name("parameter"), Some(OpCode::PARAMETER));
        assert_eq!(OpCode::from_name("or"), Some(OpCode::OR));
        assert_eq!(OpCode::from_name("pair"), Some(OpCode::PAIR));
        assert_eq!(OpCode::from_name("address"), Some(OpCode::ADDRESS));
        assert_eq!(OpCode::from_name("constant"), Some(OpCode::CONSTANT));
        assert_eq!(OpCode::from_name("ticket"), Some(OpCode::TICKET_TYPE));
        assert_eq!(OpCode::from_name("EMIT"), Some(OpCode::EMIT));
        assert_eq!(OpCode::from_name("NAT").map(|o| o.byte()), Some(0x9c));
        assert!(OpCode::from_name("NOPE").is_none());
        assert!(OpCode::from_byte(0xff).is_none());
    }

    #[test]
    fn walk_skips_subtrees() {
        let v = Prim::app(
            OpCode::PAIR_DATA,
            vec![Prim::Seq(vec![Prim::int(1), Prim::int(2)]), Prim::string("x")],
        );
        let mut seen = 0;
        v.walk(&mut |p| {
            seen += 1;
            !matches!(p, Prim::Seq(_))
        });
        // pair, seq (children skipped), string
        assert_eq!(seen, 3);
        assert!(v.contains(|p| *p == Prim::string("x")));
        assert!(!v.contains(|p| *p == Prim::string("y")));
    }

    #[test]
    fn pack_detection() {
        let v = Prim::string("hello");
        let packed = v.pack();
        assert!(Prim::is_packed(&packed));
        assert_eq!(Prim::unpack(&packed).unwrap(), v);
        assert!(!Prim::is_packed(&packed[1..]));
        assert!(!Prim::is_packed(&[0x05, 0x01]));
    }
}
