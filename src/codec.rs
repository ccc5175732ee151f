//! Order-preserving row codec.
//!
//! A [`Schema`] describes an ordered sequence of typed columns. Encoding a
//! [`Value`] tuple against a schema produces a byte string such that
//! bytewise comparison of two encodings equals componentwise comparison of
//! the original values (see module-level contract in the crate docs).
//! Decoding is positional: the same schema used to encode must be supplied
//! to decode, there is no self-describing tag stream.

use std::convert::TryInto;

use crate::{err_at, Error, Result};

const SIGN_FLIP: u64 = 0x8000_0000_0000_0000;

/// Escape byte used to quote `0x00`/`0x01` inside null-terminated strings.
const ESC: u8 = 0x01;

/// Declares the shape of one column. A [`Schema`] is an ordered list of
/// these. `Blob` is only legal as the last column of a schema; nothing
/// downstream of it could ever be decoded since it consumes the rest of
/// the buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnKind {
    U8,
    U16,
    U32,
    U64,
    F64,
    Bool,
    /// One-byte enum discriminator; applications interpret the value.
    Enum,
    /// A single Unicode scalar value, stored as a 4-byte code point.
    WideChar,
    /// Null-terminated UTF-8 string. Embedded `0x00`/`0x01` bytes are
    /// escaped, see [`encode_str`].
    Str,
    /// Wide string: a sequence of code points terminated by a zero code
    /// point. Unlike `Str`, embedded zero code points are not escapable
    /// and must not occur.
    WStr,
    /// A locale-collated string. The encoded bytes are the collation key,
    /// not the original text: decoding recovers the collation key, never
    /// the input. Callers who need the original value back must store it
    /// again as a separate `Str` column.
    Locale,
    /// Nested row, recursively encoded/decoded against its own schema.
    Row(Schema),
    /// Tagged union: one byte selecting an alternative, then that
    /// alternative's schema.
    Variant(Vec<Schema>),
    /// Opaque tail; consumes every remaining byte. Only legal as the last
    /// column in a schema.
    Blob,
}

/// An ordered list of [`ColumnKind`]s describing one row shape.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Schema(pub Vec<ColumnKind>);

impl Schema {
    pub fn new(columns: Vec<ColumnKind>) -> Schema {
        Schema(columns)
    }

    /// Reject schemas that place `Blob` anywhere but last.
    pub fn validate(&self) -> Result<()> {
        for (i, col) in self.0.iter().enumerate() {
            if matches!(col, ColumnKind::Blob) && i + 1 != self.0.len() {
                err_at!(InvalidInput, msg: "Blob column must be last in schema")?;
            }
            if let ColumnKind::Row(inner) = col {
                inner.validate()?;
            }
            if let ColumnKind::Variant(alts) = col {
                for alt in alts {
                    alt.validate()?;
                }
            }
        }
        Ok(())
    }
}

/// A single column's value, paired positionally against a [`ColumnKind`].
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F64(f64),
    Bool(bool),
    Enum(u8),
    WideChar(char),
    Str(String),
    WStr(Vec<char>),
    Locale(String),
    Row(Vec<Value>),
    Variant(u8, Box<Value>),
    Blob(Vec<u8>),
}

/// Encode `values` against `schema`, appending bytes to `buf`.
pub fn encode_row(schema: &Schema, values: &[Value], buf: &mut Vec<u8>) -> Result<()> {
    if schema.0.len() != values.len() {
        err_at!(
            InvalidInput, msg: "schema has {} columns, {} values given", schema.0.len(), values.len()
        )?;
    }
    for (col, val) in schema.0.iter().zip(values.iter()) {
        encode_column(col, val, buf)?;
    }
    Ok(())
}

fn encode_column(col: &ColumnKind, val: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match (col, val) {
        (ColumnKind::U8, Value::U8(v)) => buf.push(*v),
        (ColumnKind::U16, Value::U16(v)) => buf.extend_from_slice(&v.to_be_bytes()),
        (ColumnKind::U32, Value::U32(v)) => buf.extend_from_slice(&v.to_be_bytes()),
        (ColumnKind::U64, Value::U64(v)) => buf.extend_from_slice(&v.to_be_bytes()),
        (ColumnKind::F64, Value::F64(v)) => buf.extend_from_slice(&encode_f64(*v).to_be_bytes()),
        (ColumnKind::Bool, Value::Bool(v)) => buf.push(if *v { 1 } else { 0 }),
        (ColumnKind::Enum, Value::Enum(v)) => buf.push(*v),
        (ColumnKind::WideChar, Value::WideChar(v)) => {
            buf.extend_from_slice(&(*v as u32).to_be_bytes())
        }
        (ColumnKind::Str, Value::Str(v)) => encode_str(v.as_bytes(), buf),
        (ColumnKind::Locale, Value::Locale(v)) => encode_str(&collation_key(v), buf),
        (ColumnKind::WStr, Value::WStr(chars)) => {
            for ch in chars {
                let cp = *ch as u32;
                if cp == 0 {
                    err_at!(InvalidInput, msg: "wide string must not contain NUL code point")?;
                }
                buf.extend_from_slice(&cp.to_be_bytes());
            }
            buf.extend_from_slice(&0u32.to_be_bytes());
        }
        (ColumnKind::Row(sub), Value::Row(vals)) => encode_row(sub, vals, buf)?,
        (ColumnKind::Variant(alts), Value::Variant(d, inner)) => {
            let alt = alts
                .get(*d as usize)
                .ok_or_else(|| Error::InvalidInput("codec".into(), format!("no alternative {}", d)))?;
            buf.push(*d);
            match alt.0.as_slice() {
                [single] => encode_column(single, inner, buf)?,
                _ => err_at!(
                    Fatal, msg: "variant alternative schema must be a single column wrapper"
                )?,
            }
        }
        (ColumnKind::Blob, Value::Blob(bytes)) => buf.extend_from_slice(bytes),
        (col, val) => err_at!(
            InvalidInput, msg: "column/value type mismatch: {:?} vs {:?}", col, val
        )?,
    }
    Ok(())
}

/// Escape `0x00` as `0x01 0x01` and `0x01` as `0x01 0x02`, then terminate
/// with a bare `0x00`. Order-preserving: the escape prefix `0x01` sorts
/// below every byte that passes through unescaped.
fn encode_str(bytes: &[u8], buf: &mut Vec<u8>) {
    for &b in bytes {
        match b {
            0x00 => buf.extend_from_slice(&[ESC, 0x01]),
            0x01 => buf.extend_from_slice(&[ESC, 0x02]),
            _ => buf.push(b),
        }
    }
    buf.push(0x00);
}

/// Placeholder collation: case-folds ASCII and leaves everything else as
/// raw UTF-8 bytes. Real locale collation (accent folding, locale-specific
/// tailoring) is outside the scope of this crate; applications needing
/// exact ICU-grade ordering should encode their own collation key as a
/// `Blob` column instead.
fn collation_key(s: &str) -> Vec<u8> {
    s.chars().flat_map(|c| c.to_lowercase()).collect::<String>().into_bytes()
}

/// Decode `buf` against `schema`. Returns the decoded values and the
/// number of bytes consumed.
pub fn decode_row(schema: &Schema, buf: &[u8]) -> Result<(Vec<Value>, usize)> {
    let mut pos = 0;
    let mut values = Vec::with_capacity(schema.0.len());
    for col in schema.0.iter() {
        let (val, n) = decode_column(col, &buf[pos..])?;
        pos += n;
        values.push(val);
    }
    Ok((values, pos))
}

fn decode_column(col: &ColumnKind, buf: &[u8]) -> Result<(Value, usize)> {
    match col {
        ColumnKind::U8 => {
            need(buf, 1)?;
            Ok((Value::U8(buf[0]), 1))
        }
        ColumnKind::U16 => {
            need(buf, 2)?;
            Ok((Value::U16(u16::from_be_bytes(buf[..2].try_into().unwrap())), 2))
        }
        ColumnKind::U32 => {
            need(buf, 4)?;
            Ok((Value::U32(u32::from_be_bytes(buf[..4].try_into().unwrap())), 4))
        }
        ColumnKind::U64 => {
            need(buf, 8)?;
            Ok((Value::U64(u64::from_be_bytes(buf[..8].try_into().unwrap())), 8))
        }
        ColumnKind::F64 => {
            need(buf, 8)?;
            let bits = u64::from_be_bytes(buf[..8].try_into().unwrap());
            Ok((Value::F64(decode_f64(bits)), 8))
        }
        ColumnKind::Bool => {
            need(buf, 1)?;
            Ok((Value::Bool(buf[0] != 0), 1))
        }
        ColumnKind::Enum => {
            need(buf, 1)?;
            Ok((Value::Enum(buf[0]), 1))
        }
        ColumnKind::WideChar => {
            need(buf, 4)?;
            let cp = u32::from_be_bytes(buf[..4].try_into().unwrap());
            let ch = char::from_u32(cp)
                .ok_or_else(|| Error::CorruptRow("codec".into(), format!("bad code point {}", cp)))?;
            Ok((Value::WideChar(ch), 4))
        }
        ColumnKind::Str | ColumnKind::Locale => {
            let (bytes, n) = decode_str(buf)?;
            let s = String::from_utf8(bytes)
                .map_err(|e| Error::CorruptRow("codec".into(), e.to_string()))?;
            let val = if matches!(col, ColumnKind::Locale) {
                Value::Locale(s)
            } else {
                Value::Str(s)
            };
            Ok((val, n))
        }
        ColumnKind::WStr => {
            let mut pos = 0;
            let mut chars = Vec::new();
            loop {
                need(&buf[pos..], 4)?;
                let cp = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap());
                pos += 4;
                if cp == 0 {
                    break;
                }
                let ch = char::from_u32(cp)
                    .ok_or_else(|| Error::CorruptRow("codec".into(), format!("bad code point {}", cp)))?;
                chars.push(ch);
            }
            Ok((Value::WStr(chars), pos))
        }
        ColumnKind::Row(sub) => {
            let (vals, n) = decode_row(sub, buf)?;
            Ok((Value::Row(vals), n))
        }
        ColumnKind::Variant(alts) => {
            need(buf, 1)?;
            let d = buf[0];
            let alt = alts
                .get(d as usize)
                .ok_or_else(|| Error::CorruptRow("codec".into(), format!("bad discriminator {}", d)))?;
            let single = match alt.0.as_slice() {
                [single] => single,
                _ => err_at!(Fatal, msg: "variant alternative schema must be a single column wrapper")?,
            };
            let (inner, n) = decode_column(single, &buf[1..])?;
            Ok((Value::Variant(d, Box::new(inner)), 1 + n))
        }
        ColumnKind::Blob => Ok((Value::Blob(buf.to_vec()), buf.len())),
    }
}

fn need(buf: &[u8], n: usize) -> Result<()> {
    if buf.len() < n {
        err_at!(CorruptRow, msg: "truncated row: need {} bytes, have {}", n, buf.len())?;
    }
    Ok(())
}

fn decode_str(buf: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    let mut pos = 0;
    loop {
        need(&buf[pos..], 1)?;
        match buf[pos] {
            0x00 => {
                pos += 1;
                break;
            }
            ESC => {
                need(&buf[pos..], 2)?;
                match buf[pos + 1] {
                    0x01 => out.push(0x00),
                    0x02 => out.push(0x01),
                    other => err_at!(CorruptRow, msg: "bad string escape 0x01{:02x}", other)?,
                }
                pos += 2;
            }
            b => {
                out.push(b);
                pos += 1;
            }
        }
    }
    Ok((out, pos))
}

/// Map an `f64` to a `u64` such that unsigned numeric order on the result
/// equals IEEE total order on finite values (`-inf < all finite < +inf`).
pub fn encode_f64(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits & SIGN_FLIP != 0 {
        !bits
    } else {
        bits | SIGN_FLIP
    }
}

pub fn decode_f64(bits: u64) -> f64 {
    if bits & SIGN_FLIP != 0 {
        f64::from_bits(bits & !SIGN_FLIP)
    } else {
        f64::from_bits(!bits)
    }
}

/// Smallest byte string strictly greater than every string beginning with
/// `key` and not beginning with `key` itself. Returns `None` when `key`
/// consists entirely of `0xFF` bytes (or is empty): there is no finite
/// successor, the range is unbounded above.
pub fn prefix_end(key: &[u8]) -> Option<Vec<u8>> {
    let mut end = key.to_vec();
    while let Some(&last) = end.last() {
        if last == 0xFF {
            end.pop();
        } else {
            break;
        }
    }
    match end.last_mut() {
        Some(b) => {
            *b += 1;
            Some(end)
        }
        None => None,
    }
}

#[cfg(test)]
#[path = "codec_test.rs"]
mod codec_test;
