//! Reduce (/ ⌿), n-wise reduce, and the replicate twin
//!
//! Reduce folds right-associatively along one axis. An empty axis yields
//! the operand's identity constant; a length-1 axis just drops the axis.
//! The dyadic overload of the same glyphs is replicate.

use super::{DyaFn, cell_to_value, value_to_cell};
use crate::sysvar::Ctx;
use apl_core::{Cell, ErrorKind, Shape3, Value};

/// F/[X]B with a value-level operand
pub fn reduce(
    f: DyaFn,
    identity: Option<&Cell>,
    b: &Value,
    axis: usize,
) -> Result<Value, ErrorKind> {
    if b.rank() == 0 {
        return Ok(b.clone());
    }
    let s3 = Shape3::new(b.shape(), axis);
    let zshape = b.shape().remove_axis(axis);

    if s3.m == 0 {
        let ident = identity.ok_or(ErrorKind::Domain)?;
        let n = zshape.ravel_len();
        let cells = vec![ident.clone(); n];
        return if zshape.is_empty() {
            Ok(Value::empty_with_prototype(zshape, ident.clone()))
        } else {
            Value::new(zshape, cells)
        };
    }
    if zshape.is_empty() {
        return Ok(Value::empty_with_prototype(zshape, b.prototype_cell()));
    }

    let mut cells = Vec::with_capacity(zshape.ravel_len());
    for h in 0..s3.h {
        for l in 0..s3.l {
            let mut acc = cell_to_value(b.cell(s3.offset(h, s3.m - 1, l)));
            for m in (0..s3.m - 1).rev() {
                let left = cell_to_value(b.cell(s3.offset(h, m, l)));
                acc = f(&left, &acc)?;
            }
            cells.push(value_to_cell(acc));
        }
    }
    Value::new(zshape, cells)
}

/// N F/[X] B: windowed reduce. A negative N scans each window in reverse.
pub fn nwise_reduce(
    f: DyaFn,
    identity: Option<&Cell>,
    n: i64,
    b: &Value,
    axis: usize,
) -> Result<Value, ErrorKind> {
    if b.rank() == 0 {
        return Err(ErrorKind::Rank);
    }
    let s3 = Shape3::new(b.shape(), axis);
    let wn = n.unsigned_abs() as usize;
    if wn > s3.m + 1 {
        return Err(ErrorKind::Domain);
    }
    let zm = s3.m + 1 - wn;
    let zshape = b.shape().with_axis(axis, zm);

    if n == 0 {
        // identity-filled, axis grows to m+1
        let ident = identity.ok_or(ErrorKind::Domain)?;
        let zshape = b.shape().with_axis(axis, s3.m + 1);
        let cells = vec![ident.clone(); zshape.ravel_len()];
        return Value::new(zshape, cells);
    }
    if zshape.is_empty() {
        return Ok(Value::empty_with_prototype(zshape, b.prototype_cell()));
    }

    let reversed = n < 0;
    let mut cells = Vec::with_capacity(zshape.ravel_len());
    for h in 0..s3.h {
        for i in 0..zm {
            for l in 0..s3.l {
                let window: Vec<usize> = if reversed {
                    (i..i + wn).rev().collect()
                } else {
                    (i..i + wn).collect()
                };
                let mut acc = cell_to_value(b.cell(s3.offset(h, window[wn - 1], l)));
                for &m in window[..wn - 1].iter().rev() {
                    let left = cell_to_value(b.cell(s3.offset(h, m, l)));
                    acc = f(&left, &acc)?;
                }
                cells.push(value_to_cell(acc));
            }
        }
    }
    Value::new(zshape, cells)
}

/// A/[X]B: replicate. Positive counts copy, negative counts insert
/// prototype fills, zero skips. A single count broadcasts over the axis.
pub fn replicate(a: &Value, b: &Value, axis: usize, ctx: &Ctx) -> Result<Value, ErrorKind> {
    let counts = a.as_int_vector(ctx.ct)?;
    let b = if b.rank() == 0 {
        // a scalar extends along the replication axis
        let len = counts.iter().filter(|&&c| c >= 0).count().max(1);
        let shape = apl_core::Shape::vector(len);
        Value::new(shape, vec![b.first().clone(); len])?
    } else {
        b.clone()
    };
    let s3 = Shape3::new(b.shape(), axis);
    let counts: Vec<i64> = if counts.len() == 1 {
        vec![counts[0]; s3.m]
    } else {
        counts
    };
    let consuming = counts.iter().filter(|&&c| c >= 0).count();
    if consuming != s3.m {
        return Err(ErrorKind::Length);
    }
    let zm: usize = counts.iter().map(|&c| c.unsigned_abs() as usize).sum();
    let zshape = b.shape().with_axis(axis, zm);
    if zshape.is_empty() {
        return Ok(Value::empty_with_prototype(zshape, b.prototype_cell()));
    }
    let proto = b.prototype_cell();
    // map each result position along the axis to a source position (None
    // inserts a fill)
    let mut plan: Vec<Option<usize>> = Vec::with_capacity(zm);
    let mut src = 0usize;
    for &c in &counts {
        if c >= 0 {
            for _ in 0..c {
                plan.push(Some(src));
            }
            src += 1;
        } else {
            for _ in 0..(-c) {
                plan.push(None);
            }
        }
    }
    let mut cells = Vec::with_capacity(zshape.ravel_len());
    for h in 0..s3.h {
        for &slot in &plan {
            for l in 0..s3.l {
                match slot {
                    Some(m) => cells.push(b.cell(s3.offset(h, m, l)).clone()),
                    None => cells.push(proto.clone()),
                }
            }
        }
    }
    Value::new(zshape, cells)
}
