//! CDR: the binary common data representation (3 ⎕TF)
//!
//! A record is a fixed 16-byte header — 4-byte alignment marker
//! `0x00002020`, 4-byte record length, 4-byte element count (all
//! big-endian), 1-byte type tag 0..7, 1-byte rank, two reserved bytes —
//! followed by `rank` big-endian 4-byte shape items and the body. Records
//! are padded with zeros to 16-byte multiples. Nested values (type 7)
//! carry a vector of 4-byte sub-offsets measured from the start of the
//! record, then each sub-value encoded recursively.

use apl_core::{CdrClass, Cell, Complex64, ErrorKind, Shape, Value};
use num_enum::TryFromPrimitive;
use std::sync::Arc;

pub const CDR_PTR: u32 = 0x0000_2020;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum CdrType {
    /// Packed bits, MSB-first per byte
    Bit = 0,
    /// 4-byte signed integers, little-endian
    Int4 = 1,
    /// 8-byte IEEE floats
    Float8 = 2,
    /// 16-byte complex (two 8-byte floats)
    Complex16 = 3,
    /// 1-byte characters
    Char1 = 4,
    /// 4-byte Unicode code points
    Char4 = 5,
    /// Arithmetic progression vector: start + increment
    Progression = 6,
    /// Nested: offset vector plus recursive records
    Nested = 7,
}

/// The CDR type a value encodes as. An integer vector that forms an
/// arithmetic progression compresses to the APV type.
pub fn cdr_type_of(v: &Value) -> CdrType {
    if progression_of(v).is_some() {
        return CdrType::Progression;
    }
    match v.cdr_class() {
        CdrClass::Bit => CdrType::Bit,
        CdrClass::Int => CdrType::Int4,
        CdrClass::Float => CdrType::Float8,
        CdrClass::Complex => CdrType::Complex16,
        CdrClass::Char8 => CdrType::Char1,
        CdrClass::Char32 => CdrType::Char4,
        CdrClass::Nested => CdrType::Nested,
    }
}

/// (start, increment) when the value is an APV candidate: an integer
/// vector of at least 3 elements with a constant non-zero stride, all
/// fitting 4 bytes
fn progression_of(v: &Value) -> Option<(i32, i32)> {
    if v.rank() != 1 || v.element_count() < 3 {
        return None;
    }
    let mut ints = Vec::with_capacity(v.element_count());
    for c in v.ravel() {
        match c {
            Cell::Int(n) if *n >= i32::MIN as i64 && *n <= i32::MAX as i64 => {
                ints.push(*n as i32)
            }
            _ => return None,
        }
    }
    let step = ints[1].checked_sub(ints[0])?;
    if step == 0 {
        return None;
    }
    for w in ints.windows(2) {
        if w[1].checked_sub(w[0])? != step {
            return None;
        }
    }
    Some((ints[0], step))
}

fn round16(n: usize) -> usize {
    (n + 15) & !15
}

/// Record length including header, shape, body and padding
fn record_len(v: &Value, t: CdrType) -> Result<usize, ErrorKind> {
    let n = v.element_count();
    let body = match t {
        CdrType::Bit => n.div_ceil(8),
        CdrType::Int4 => 4 * n,
        CdrType::Float8 => 8 * n,
        CdrType::Complex16 => 16 * n,
        CdrType::Char1 => n,
        CdrType::Char4 => 4 * n,
        CdrType::Progression => 8,
        CdrType::Nested => {
            let mut sum = 4 * n;
            for c in v.ravel().iter().take(n) {
                let sub = sub_value(c);
                let st = cdr_type_of(&sub);
                sum += record_len(&sub, st)?;
            }
            sum
        }
    };
    Ok(round16(16 + 4 * v.rank() + body))
}

fn sub_value(c: &Cell) -> Value {
    match c {
        Cell::Pointer(v) => (**v).clone(),
        other => Value::scalar(other.clone()),
    }
}

/// Encode a value into its CDR wire form
pub fn encode(v: &Value) -> Result<Vec<u8>, ErrorKind> {
    let t = cdr_type_of(v);
    let len = record_len(v, t)?;
    let mut out = Vec::with_capacity(len);
    fill(&mut out, v, t)?;
    debug_assert_eq!(out.len(), len);
    Ok(out)
}

fn fill(out: &mut Vec<u8>, v: &Value, t: CdrType) -> Result<(), ErrorKind> {
    let start = out.len();
    let len = record_len(v, t)?;
    let nelm = v.element_count() as u32;

    out.extend_from_slice(&CDR_PTR.to_be_bytes());
    out.extend_from_slice(&(len as u32).to_be_bytes());
    out.extend_from_slice(&nelm.to_be_bytes());
    out.push(t as u8);
    out.push(v.rank() as u8);
    out.push(0);
    out.push(0);
    for &dim in v.shape().items() {
        out.extend_from_slice(&(dim as u32).to_be_bytes());
    }

    let n = v.element_count();
    match t {
        CdrType::Bit => {
            let mut accu: u8 = 0;
            let mut bits = 0;
            for i in 0..n {
                let b = match v.cell(i) {
                    Cell::Int(0) => 0,
                    Cell::Int(1) => 1,
                    _ => return Err(ErrorKind::Domain),
                };
                accu = (accu << 1) | b;
                bits += 1;
                if bits == 8 {
                    out.push(accu);
                    accu = 0;
                    bits = 0;
                }
            }
            if bits > 0 {
                out.push(accu << (8 - bits));
            }
        }
        CdrType::Int4 => {
            for i in 0..n {
                let x = match v.cell(i) {
                    Cell::Int(x) => *x as i32,
                    _ => return Err(ErrorKind::Domain),
                };
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        CdrType::Float8 => {
            for i in 0..n {
                let x = match v.cell(i) {
                    Cell::Int(x) => *x as f64,
                    Cell::Float(x) => *x,
                    _ => return Err(ErrorKind::Domain),
                };
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        CdrType::Complex16 => {
            for i in 0..n {
                let z = v.cell(i).complex()?;
                out.extend_from_slice(&z.re.to_le_bytes());
                out.extend_from_slice(&z.im.to_le_bytes());
            }
        }
        CdrType::Char1 => {
            for i in 0..n {
                match v.cell(i) {
                    Cell::Char(c) if (*c as u32) < 0x100 => out.push(*c as u32 as u8),
                    _ => return Err(ErrorKind::Domain),
                }
            }
        }
        CdrType::Char4 => {
            for i in 0..n {
                match v.cell(i) {
                    Cell::Char(c) => out.extend_from_slice(&(*c as u32).to_le_bytes()),
                    _ => return Err(ErrorKind::Domain),
                }
            }
        }
        CdrType::Progression => {
            let (s, d) = progression_of(v).ok_or(ErrorKind::Domain)?;
            out.extend_from_slice(&s.to_le_bytes());
            out.extend_from_slice(&d.to_le_bytes());
        }
        CdrType::Nested => {
            // offsets from the start of this record
            let mut offset = round16(16 + 4 * v.rank() + 4 * n);
            let mut subs = Vec::with_capacity(n);
            for c in v.ravel().iter().take(n) {
                let sub = sub_value(c);
                let st = cdr_type_of(&sub);
                out.extend_from_slice(&(offset as u32).to_le_bytes());
                offset += record_len(&sub, st)?;
                subs.push((sub, st));
            }
            while (out.len() - start) % 16 != 0 {
                out.push(0);
            }
            for (sub, st) in subs {
                fill(out, &sub, st)?;
            }
        }
    }
    while (out.len() - start) % 16 != 0 {
        out.push(0);
    }
    Ok(())
}

/// Decode one CDR record
pub fn decode(bytes: &[u8]) -> Result<Value, ErrorKind> {
    if bytes.len() < 16 {
        return Err(ErrorKind::Length);
    }
    let ptr = u32::from_be_bytes(bytes[0..4].try_into().expect("4 bytes"));
    if ptr != CDR_PTR {
        return Err(ErrorKind::Domain);
    }
    let nb = u32::from_be_bytes(bytes[4..8].try_into().expect("4 bytes")) as usize;
    if nb > bytes.len() {
        return Err(ErrorKind::Length);
    }
    let nelm = u32::from_be_bytes(bytes[8..12].try_into().expect("4 bytes")) as usize;
    let t = CdrType::try_from(bytes[12]).map_err(|_| ErrorKind::Domain)?;
    let rank = bytes[13] as usize;
    if rank > apl_core::MAX_RANK {
        return Err(ErrorKind::Rank);
    }

    let mut pos = 16;
    let mut items = Vec::with_capacity(rank);
    for _ in 0..rank {
        if pos + 4 > bytes.len() {
            return Err(ErrorKind::Length);
        }
        items.push(
            u32::from_be_bytes(bytes[pos..pos + 4].try_into().expect("4 bytes")) as usize,
        );
        pos += 4;
    }
    let shape = Shape::new(items)?;
    if shape.element_count() != nelm && !(t == CdrType::Progression && rank == 1) {
        return Err(ErrorKind::Length);
    }

    let need = |k: usize| -> Result<(), ErrorKind> {
        if pos + k > bytes.len() {
            Err(ErrorKind::Length)
        } else {
            Ok(())
        }
    };

    let cells: Vec<Cell> = match t {
        CdrType::Bit => {
            need(nelm.div_ceil(8))?;
            (0..nelm)
                .map(|i| {
                    let byte = bytes[pos + i / 8];
                    let bit = (byte >> (7 - (i % 8))) & 1;
                    Cell::Int(bit as i64)
                })
                .collect()
        }
        CdrType::Int4 => {
            need(4 * nelm)?;
            (0..nelm)
                .map(|i| {
                    let o = pos + 4 * i;
                    let x = i32::from_le_bytes(bytes[o..o + 4].try_into().expect("4 bytes"));
                    // sign-extend to the cell's 8 bytes
                    Cell::Int(x as i64)
                })
                .collect()
        }
        CdrType::Float8 => {
            need(8 * nelm)?;
            (0..nelm)
                .map(|i| {
                    let o = pos + 8 * i;
                    Cell::Float(f64::from_le_bytes(
                        bytes[o..o + 8].try_into().expect("8 bytes"),
                    ))
                })
                .collect()
        }
        CdrType::Complex16 => {
            need(16 * nelm)?;
            (0..nelm)
                .map(|i| {
                    let o = pos + 16 * i;
                    let re =
                        f64::from_le_bytes(bytes[o..o + 8].try_into().expect("8 bytes"));
                    let im = f64::from_le_bytes(
                        bytes[o + 8..o + 16].try_into().expect("8 bytes"),
                    );
                    Cell::Complex(Complex64::new(re, im))
                })
                .collect()
        }
        CdrType::Char1 => {
            need(nelm)?;
            (0..nelm)
                .map(|i| Cell::Char(bytes[pos + i] as char))
                .collect()
        }
        CdrType::Char4 => {
            need(4 * nelm)?;
            let mut cells = Vec::with_capacity(nelm);
            for i in 0..nelm {
                let o = pos + 4 * i;
                let cp = u32::from_le_bytes(bytes[o..o + 4].try_into().expect("4 bytes"));
                cells.push(Cell::Char(
                    char::from_u32(cp).ok_or(ErrorKind::Domain)?,
                ));
            }
            cells
        }
        CdrType::Progression => {
            need(8)?;
            let s = i32::from_le_bytes(bytes[pos..pos + 4].try_into().expect("4 bytes"));
            let d = i32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().expect("4 bytes"));
            (0..nelm)
                .map(|i| Cell::Int(s as i64 + d as i64 * i as i64))
                .collect()
        }
        CdrType::Nested => {
            need(4 * nelm)?;
            let mut cells = Vec::with_capacity(nelm);
            for i in 0..nelm {
                let o = pos + 4 * i;
                let off =
                    u32::from_le_bytes(bytes[o..o + 4].try_into().expect("4 bytes")) as usize;
                if off >= bytes.len() {
                    return Err(ErrorKind::Length);
                }
                let sub = decode(&bytes[off..])?;
                if sub.is_scalar() && sub.is_simple() {
                    cells.push(sub.ravel()[0].clone());
                } else {
                    cells.push(Cell::Pointer(Arc::new(sub)));
                }
            }
            cells
        }
    };

    if nelm == 0 {
        return Ok(Value::empty_with_prototype(shape, Cell::Int(0)));
    }
    Value::new(shape, cells)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: &Value) -> Value {
        let bytes = encode(v).unwrap();
        assert_eq!(bytes.len() % 16, 0, "records are 16-byte padded");
        decode(&bytes).unwrap()
    }

    #[test]
    fn test_bit_vector() {
        let v = Value::int_vector(&[1, 0, 1, 1, 0, 1, 0, 0, 1]);
        // 1 0 1 1 is a progression? no: ensure bit type chosen
        assert_eq!(cdr_type_of(&v), CdrType::Bit);
        let back = round_trip(&v);
        assert!(Value::tolerantly_equal(&v, &back, 0.0));
    }

    #[test]
    fn test_int_vector() {
        let v = Value::int_vector(&[100, -5, 7]);
        assert_eq!(cdr_type_of(&v), CdrType::Int4);
        let back = round_trip(&v);
        assert!(Value::tolerantly_equal(&v, &back, 0.0));
    }

    #[test]
    fn test_negative_int_sign_extension() {
        let v = Value::int_vector(&[-1, -2147483648, 50]);
        let back = round_trip(&v);
        assert_eq!(back.ravel()[0], Cell::Int(-1));
        assert_eq!(back.ravel()[1], Cell::Int(-2147483648));
    }

    #[test]
    fn test_float_matrix() {
        let v = Value::new(
            Shape::new(vec![2, 2]).unwrap(),
            vec![
                Cell::Float(1.5),
                Cell::Float(-2.25),
                Cell::Float(1e100),
                Cell::Float(0.0),
            ],
        )
        .unwrap();
        assert_eq!(cdr_type_of(&v), CdrType::Float8);
        let back = round_trip(&v);
        assert!(Value::tolerantly_equal(&v, &back, 0.0));
        assert_eq!(back.shape().items(), &[2, 2]);
    }

    #[test]
    fn test_complex() {
        let v = Value::vector(vec![
            Cell::Complex(Complex64::new(1.0, -2.0)),
            Cell::Complex(Complex64::new(0.5, 3.25)),
        ]);
        assert_eq!(cdr_type_of(&v), CdrType::Complex16);
        let back = round_trip(&v);
        assert!(Value::tolerantly_equal(&v, &back, 0.0));
    }

    #[test]
    fn test_chars_both_widths() {
        let v = Value::char_vector("hello");
        assert_eq!(cdr_type_of(&v), CdrType::Char1);
        let back = round_trip(&v);
        assert_eq!(back.as_string().unwrap(), "hello");

        let v = Value::char_vector("⍳⍴");
        assert_eq!(cdr_type_of(&v), CdrType::Char4);
        let back = round_trip(&v);
        assert_eq!(back.as_string().unwrap(), "⍳⍴");
    }

    #[test]
    fn test_progression() {
        let v = Value::int_vector(&[3, 5, 7, 9, 11]);
        assert_eq!(cdr_type_of(&v), CdrType::Progression);
        let bytes = encode(&v).unwrap();
        // one 16-byte header + 4-byte dim + 8-byte body, padded
        assert_eq!(bytes.len(), 32);
        let back = decode(&bytes).unwrap();
        assert!(Value::tolerantly_equal(&v, &back, 0.0));
    }

    #[test]
    fn test_nested() {
        let inner = Value::int_vector(&[10, 20]);
        let v = Value::vector(vec![
            Cell::Pointer(Arc::new(inner)),
            Cell::Pointer(Arc::new(Value::char_vector("ab"))),
        ]);
        assert_eq!(cdr_type_of(&v), CdrType::Nested);
        let back = round_trip(&v);
        assert!(Value::tolerantly_equal(&v, &back, 0.0));
    }

    #[test]
    fn test_header_fields() {
        let v = Value::int_vector(&[1, 5, 2]);
        let bytes = encode(&v).unwrap();
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x20, 0x20]);
        assert_eq!(bytes[12], 1); // type Int4
        assert_eq!(bytes[13], 1); // rank
        // dim is big-endian 3
        assert_eq!(&bytes[16..20], &[0, 0, 0, 3]);
    }

    #[test]
    fn test_bad_marker_rejected() {
        let v = Value::int_vector(&[9, 9, 9]);
        let mut bytes = encode(&v).unwrap();
        bytes[0] = 0xFF;
        assert_eq!(decode(&bytes), Err(ErrorKind::Domain));
    }

    #[test]
    fn test_truncated_rejected() {
        let v = Value::int_vector(&[9, 8, 7]);
        let bytes = encode(&v).unwrap();
        assert!(decode(&bytes[..12]).is_err());
    }
}
