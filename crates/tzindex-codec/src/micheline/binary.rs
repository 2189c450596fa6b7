//! Binary Micheline encoding.
//!
//! Tags: `00` int, `01` string, `02` sequence, `03..08` primitives with
//! 0, 1 or 2 args (odd = no annots, even = annots), `09` generic primitive,
//! `0A` bytes. Lengths are 4-byte big-endian.

use num_bigint::{BigInt, BigUint, Sign};

use super::{OpCode, Prim};
use crate::error::DecodeError;

const MAX_DEPTH: usize = 10_000;

pub(super) fn encode(p: &Prim, out: &mut Vec<u8>) {
    match p {
        Prim::Int(v) => {
            out.push(0x00);
            write_zarith(v, out);
        }
        Prim::String(s) => {
            out.push(0x01);
            write_len_prefixed(s.as_bytes(), out);
        }
        Prim::Bytes(b) => {
            out.push(0x0A);
            write_len_prefixed(b, out);
        }
        Prim::Seq(items) => {
            out.push(0x02);
            let mut body = Vec::new();
            for item in items {
                encode(item, &mut body);
            }
            write_len_prefixed(&body, out);
        }
        Prim::App { op, args, annots } => {
            let has_annots = !annots.is_empty();
            if args.len() <= 2 {
                let tag = 0x03 + 2 * args.len() as u8 + u8::from(has_annots);
                out.push(tag);
                out.push(op.byte());
                for arg in args {
                    encode(arg, out);
                }
                if has_annots {
                    write_len_prefixed(annots.join(" ").as_bytes(), out);
                }
            } else {
                out.push(0x09);
                out.push(op.byte());
                let mut body = Vec::new();
                for arg in args {
                    encode(arg, &mut body);
                }
                write_len_prefixed(&body, out);
                write_len_prefixed(annots.join(" ").as_bytes(), out);
            }
        }
    }
}

/// Decode one value from the front of `b`, returning it and the bytes used.
pub(super) fn decode(b: &[u8]) -> Result<(Prim, usize), DecodeError> {
    let mut r = Reader { buf: b, pos: 0 };
    let prim = r.prim(0)?;
    Ok((prim, r.pos))
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn byte(&mut self) -> Result<u8, DecodeError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| DecodeError::micheline("unexpected end of input"))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|e| *e <= self.buf.len())
            .ok_or_else(|| DecodeError::micheline("length exceeds input"))?;
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn len_prefixed(&mut self) -> Result<&'a [u8], DecodeError> {
        let raw = self.take(4)?;
        let n = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        self.take(n)
    }

    fn opcode(&mut self) -> Result<OpCode, DecodeError> {
        let b = self.byte()?;
        OpCode::from_byte(b).ok_or_else(|| DecodeError::micheline(format!("unknown opcode 0x{b:02x}")))
    }

    fn annots(&mut self) -> Result<Vec<String>, DecodeError> {
        let raw = self.len_prefixed()?;
        let s = std::str::from_utf8(raw).map_err(|_| DecodeError::micheline("annotation not utf-8"))?;
        Ok(s.split(' ').filter(|a| !a.is_empty()).map(str::to_string).collect())
    }

    fn sequence(body: &[u8], depth: usize) -> Result<Vec<Prim>, DecodeError> {
        let mut r = Reader { buf: body, pos: 0 };
        let mut items = Vec::new();
        while r.pos < body.len() {
            items.push(r.prim(depth + 1)?);
        }
        Ok(items)
    }

    fn prim(&mut self, depth: usize) -> Result<Prim, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::micheline("nesting too deep"));
        }
        let tag = self.byte()?;
        Ok(match tag {
            0x00 => Prim::Int(self.zarith()?),
            0x01 => {
                let raw = self.len_prefixed()?;
                let s = std::str::from_utf8(raw).map_err(|_| DecodeError::micheline("string not utf-8"))?;
                Prim::String(s.to_string())
            }
            0x02 => {
                let body = self.len_prefixed()?;
                Prim::Seq(Self::sequence(body, depth)?)
            }
            0x03..=0x08 => {
                let op = self.opcode()?;
                let nargs = ((tag - 0x03) / 2) as usize;
                let mut args = Vec::with_capacity(nargs);
                for _ in 0..nargs {
                    args.push(self.prim(depth + 1)?);
                }
                let annots = if tag % 2 == 0 { self.annots()? } else { Vec::new() };
                Prim::App { op, args, annots }
            }
            0x09 => {
                let op = self.opcode()?;
                let body = self.len_prefixed()?;
                let args = Self::sequence(body, depth)?;
                let annots = self.annots()?;
                Prim::App { op, args, annots }
            }
            0x0A => Prim::Bytes(self.len_prefixed()?.to_vec()),
            t => return Err(DecodeError::micheline(format!("unknown tag 0x{t:02x}"))),
        })
    }

    fn zarith(&mut self) -> Result<BigInt, DecodeError> {
        let first = self.byte()?;
        let negative = first & 0x40 != 0;
        let mut mag = BigUint::from(first & 0x3f);
        let mut shift = 6usize;
        let mut more = first & 0x80 != 0;
        while more {
            let b = self.byte()?;
            mag |= BigUint::from(b & 0x7f) << shift;
            shift += 7;
            more = b & 0x80 != 0;
        }
        let sign = if negative { Sign::Minus } else { Sign::Plus };
        Ok(BigInt::from_biguint(sign, mag))
    }
}

fn write_len_prefixed(b: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&(b.len() as u32).to_be_bytes());
    out.extend_from_slice(b);
}

fn low_bits(v: &BigUint, mask: u8) -> u8 {
    (v & BigUint::from(mask)).iter_u64_digits().next().unwrap_or(0) as u8
}

fn write_zarith(v: &BigInt, out: &mut Vec<u8>) {
    let mut mag = v.magnitude().clone();
    let mut first = low_bits(&mag, 0x3f);
    if v.sign() == Sign::Minus {
        first |= 0x40;
    }
    mag >>= 6;
    if mag.bits() > 0 {
        first |= 0x80;
    }
    out.push(first);
    while mag.bits() > 0 {
        let mut b = low_bits(&mag, 0x7f);
        mag >>= 7;
        if mag.bits() > 0 {
            b |= 0x80;
        }
        out.push(b);
    }
}
