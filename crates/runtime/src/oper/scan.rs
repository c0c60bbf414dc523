//! Scan (\ ⍀) and the expand twin
//!
//! `Z[h,m,l] = B[h,0,l] F … F B[h,m,l]` — for an associative primitive
//! this is the O(n) running fold; otherwise each prefix is reduced
//! right-to-left as the standard prescribes.

use super::{DyaFn, cell_to_value, value_to_cell};
use crate::sysvar::Ctx;
use apl_core::{Cell, ErrorKind, Shape3, Value};

/// Primitives whose scan may use the running left fold
pub fn is_associative(prim: char) -> bool {
    matches!(prim, '+' | '×' | '⌈' | '⌊' | '∧' | '∨')
}

/// F\[X]B
pub fn scan(f: DyaFn, associative: bool, b: &Value, axis: usize) -> Result<Value, ErrorKind> {
    if b.rank() == 0 {
        return Ok(b.clone());
    }
    if b.is_empty() {
        return Ok(b.clone());
    }
    let s3 = Shape3::new(b.shape(), axis);
    let mut cells: Vec<Cell> = vec![Cell::Int(0); b.element_count()];

    for h in 0..s3.h {
        for l in 0..s3.l {
            if associative {
                let mut acc = cell_to_value(b.cell(s3.offset(h, 0, l)));
                cells[s3.offset(h, 0, l)] = value_to_cell(acc.clone());
                for m in 1..s3.m {
                    let right = cell_to_value(b.cell(s3.offset(h, m, l)));
                    acc = f(&acc, &right)?;
                    cells[s3.offset(h, m, l)] = value_to_cell(acc.clone());
                }
            } else {
                // the standard's definition: each prefix reduced right-to-left
                for m in 0..s3.m {
                    let mut acc = cell_to_value(b.cell(s3.offset(h, m, l)));
                    for k in (0..m).rev() {
                        let left = cell_to_value(b.cell(s3.offset(h, k, l)));
                        acc = f(&left, &acc)?;
                    }
                    cells[s3.offset(h, m, l)] = value_to_cell(acc);
                }
            }
        }
    }
    Value::new(b.shape().clone(), cells)
}

/// A\[X]B: expand. A is a 0/1 vector whose 1-count equals the axis
/// extent; 0-positions become prototype fills.
pub fn expand(a: &Value, b: &Value, axis: usize, ctx: &Ctx) -> Result<Value, ErrorKind> {
    let marks = a.as_int_vector(ctx.ct)?;
    if marks.iter().any(|&m| m != 0 && m != 1) {
        return Err(ErrorKind::Domain);
    }
    let b = if b.rank() == 0 {
        let ones = marks.iter().filter(|&&m| m == 1).count();
        let shape = apl_core::Shape::vector(ones);
        Value::new(shape, vec![b.first().clone(); ones.max(1)])?
    } else {
        b.clone()
    };
    let s3 = Shape3::new(b.shape(), axis);
    let ones = marks.iter().filter(|&&m| m == 1).count();
    if ones != s3.m {
        return Err(ErrorKind::Length);
    }
    let zshape = b.shape().with_axis(axis, marks.len());
    if zshape.is_empty() {
        return Ok(Value::empty_with_prototype(zshape, b.prototype_cell()));
    }
    let proto = b.prototype_cell();
    let mut cells = Vec::with_capacity(zshape.ravel_len());
    for h in 0..s3.h {
        let mut src = 0usize;
        for &mark in &marks {
            for l in 0..s3.l {
                if mark == 1 {
                    cells.push(b.cell(s3.offset(h, src, l)).clone());
                } else {
                    cells.push(proto.clone());
                }
            }
            if mark == 1 {
                src += 1;
            }
        }
    }
    Value::new(zshape, cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::ParallelConfig;
    use crate::prim::scalar;

    #[test]
    fn test_plus_scan() {
        let ctx = Ctx::default();
        let par = ParallelConfig::default();
        let f = move |a: &Value, b: &Value| scalar::eval_dyadic('+', a, b, &ctx, &par);
        let b = Value::int_vector(&[1, 2, 3, 4]);
        let z = scan(&f, true, &b, 0).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[1, 3, 6, 10]).ravel());
    }

    #[test]
    fn test_minus_scan_right_to_left() {
        let ctx = Ctx::default();
        let par = ParallelConfig::default();
        let f = move |a: &Value, b: &Value| scalar::eval_dyadic('-', a, b, &ctx, &par);
        let b = Value::int_vector(&[1, 2, 3]);
        // -\1 2 3 = 1, 1-2, 1-(2-3) = 1 ¯1 2
        let z = scan(&f, false, &b, 0).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[1, -1, 2]).ravel());
    }

    #[test]
    fn test_scan_keeps_shape() {
        let ctx = Ctx::default();
        let par = ParallelConfig::default();
        let f = move |a: &Value, b: &Value| scalar::eval_dyadic('+', a, b, &ctx, &par);
        let m = Value::new(
            apl_core::Shape::new(vec![2, 3]).unwrap(),
            (1..=6).map(Cell::Int).collect(),
        )
        .unwrap();
        let z = scan(&f, true, &m, 1).unwrap();
        assert_eq!(z.shape().items(), &[2, 3]);
        assert_eq!(
            z.ravel(),
            Value::int_vector(&[1, 3, 6, 4, 9, 15]).ravel()
        );
    }

    #[test]
    fn test_expand() {
        let ctx = Ctx::default();
        let b = Value::int_vector(&[1, 2]);
        let z = expand(&Value::int_vector(&[1, 0, 0, 1]), &b, 0, &ctx).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[1, 0, 0, 2]).ravel());
    }

    #[test]
    fn test_expand_length_rule() {
        let ctx = Ctx::default();
        let b = Value::int_vector(&[1, 2, 3]);
        assert_eq!(
            expand(&Value::int_vector(&[1, 0, 1]), &b, 0, &ctx).unwrap_err(),
            ErrorKind::Length
        );
    }

    #[test]
    fn test_expand_char_fill() {
        let ctx = Ctx::default();
        let b = Value::char_vector("AB");
        let z = expand(&Value::int_vector(&[1, 0, 1]), &b, 0, &ctx).unwrap();
        assert_eq!(z.as_string().unwrap(), "A B");
    }
}
