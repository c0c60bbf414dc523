//! Outer (∘.F) and inner (F.G) product
//!
//! Outer: result shape `shape(A) ⌢ shape(B)`, every pair. Inner: the last
//! axis of A paired with the first axis of B, G across the shared axis,
//! F-reduced right-associatively. Both get a tight cell-loop fast path
//! when the operands are scalar primitives and the arguments simple; the
//! outer fast path may fan out across workers.

use super::{DyaFn, cell_to_value, value_to_cell};
use crate::parallel::{ParallelConfig, compute_cells};
use crate::prim::scalar;
use crate::sysvar::Ctx;
use apl_core::{Cell, ErrorKind, Shape, Value};

/// A∘.F B with a value-level operand
pub fn outer(f: DyaFn, a: &Value, b: &Value) -> Result<Value, ErrorKind> {
    let zshape = a.shape().catenated(b.shape())?;
    if zshape.is_empty() {
        return Ok(Value::empty_with_prototype(zshape, Cell::Int(0)));
    }
    let bn = b.element_count();
    let mut cells = Vec::with_capacity(zshape.element_count());
    for i in 0..a.element_count() {
        let ca = cell_to_value(a.cell(i));
        for j in 0..bn {
            let cb = cell_to_value(b.cell(j));
            cells.push(value_to_cell(f(&ca, &cb)?));
        }
    }
    Value::new(zshape, cells)
}

/// Fast path: scalar primitive F over simple arguments, sliced across
/// workers when the result is big enough
pub fn outer_prim(
    prim: char,
    a: &Value,
    b: &Value,
    ctx: &Ctx,
    par: &ParallelConfig,
) -> Result<Value, ErrorKind> {
    if !(a.is_simple() && b.is_simple() && scalar::is_scalar_dyadic(prim)) {
        let f = |x: &Value, y: &Value| scalar::eval_dyadic(prim, x, y, ctx, par);
        return outer(&f, a, b);
    }
    let zshape = a.shape().catenated(b.shape())?;
    if zshape.is_empty() {
        return Ok(Value::empty_with_prototype(zshape, Cell::Int(0)));
    }
    let bn = b.element_count();
    let threshold = par.threshold_dyadic(prim);
    let cells = compute_cells(par, threshold, zshape.element_count(), |k| {
        scalar::dya_cell_op(prim, a.cell(k / bn), b.cell(k % bn), ctx)
    })?;
    Value::new(zshape, cells)
}

/// A F.G B with value-level operands; `f_ident` fills the empty shared
/// dimension
pub fn inner(
    f: DyaFn,
    g: DyaFn,
    f_ident: Option<&Cell>,
    a: &Value,
    b: &Value,
) -> Result<Value, ErrorKind> {
    let (m, zshape_a) = split_last(a);
    let (n, zshape_b) = split_first(b);
    if m != n && m != 1 && n != 1 {
        return Err(ErrorKind::Length);
    }
    let shared = m.max(n);
    let zshape = zshape_a.catenated(&zshape_b)?;
    let rows = zshape_a.element_count();
    let cols = zshape_b.element_count();

    if shared == 0 {
        let ident = f_ident.ok_or(ErrorKind::Domain)?;
        let cells = vec![ident.clone(); zshape.ravel_len()];
        return if zshape.is_empty() {
            Ok(Value::empty_with_prototype(zshape, ident.clone()))
        } else {
            Value::new(zshape, cells)
        };
    }
    if zshape.is_empty() {
        return Ok(Value::empty_with_prototype(zshape, Cell::Int(0)));
    }

    let mut cells = Vec::with_capacity(zshape.element_count());
    for i in 0..rows {
        for j in 0..cols {
            // right-associative F-reduce over the G pairs
            let mut acc: Option<Value> = None;
            for k in (0..shared).rev() {
                let ak = if m == 1 { i } else { i * m + k };
                let bk = if n == 1 { j } else { k * cols + j };
                let ga = cell_to_value(a.cell(ak));
                let gb = cell_to_value(b.cell(bk));
                let prod = g(&ga, &gb)?;
                acc = Some(match acc {
                    None => prod,
                    Some(r) => f(&prod, &r)?,
                });
            }
            cells.push(value_to_cell(acc.expect("shared ≥ 1")));
        }
    }
    Value::new(zshape, cells)
}

/// Fast path for F.G with scalar primitives over simple arguments
pub fn inner_prim(
    f: char,
    g: char,
    a: &Value,
    b: &Value,
    ctx: &Ctx,
    par: &ParallelConfig,
) -> Result<Value, ErrorKind> {
    if !(a.is_simple()
        && b.is_simple()
        && scalar::is_scalar_dyadic(f)
        && scalar::is_scalar_dyadic(g))
    {
        let ff = |x: &Value, y: &Value| scalar::eval_dyadic(f, x, y, ctx, par);
        let gg = |x: &Value, y: &Value| scalar::eval_dyadic(g, x, y, ctx, par);
        let ident = scalar::identity_cell(f);
        return inner(&ff, &gg, ident.as_ref(), a, b);
    }
    let (m, zshape_a) = split_last(a);
    let (n, zshape_b) = split_first(b);
    if m != n && m != 1 && n != 1 {
        return Err(ErrorKind::Length);
    }
    let shared = m.max(n);
    let zshape = zshape_a.catenated(&zshape_b)?;
    let cols = zshape_b.element_count();

    if shared == 0 {
        let ident = scalar::identity_cell(f).ok_or(ErrorKind::Domain)?;
        let cells = vec![ident.clone(); zshape.ravel_len()];
        return if zshape.is_empty() {
            Ok(Value::empty_with_prototype(zshape, ident))
        } else {
            Value::new(zshape, cells)
        };
    }
    if zshape.is_empty() {
        return Ok(Value::empty_with_prototype(zshape, Cell::Int(0)));
    }

    let threshold = par.threshold_dyadic(g);
    let cells = compute_cells(par, threshold, zshape.element_count(), |idx| {
        let i = idx / cols;
        let j = idx % cols;
        let mut acc: Option<Cell> = None;
        for k in (0..shared).rev() {
            let ak = if m == 1 { i } else { i * m + k };
            let bk = if n == 1 { j } else { k * cols + j };
            let prod = scalar::dya_cell_op(g, a.cell(ak), b.cell(bk), ctx)?;
            acc = Some(match acc {
                None => prod,
                Some(r) => scalar::dya_cell_op(f, &prod, &r, ctx)?,
            });
        }
        Ok(acc.expect("shared ≥ 1"))
    })?;
    Value::new(zshape, cells)
}

/// Shape with the last axis split off: (last extent, rest)
fn split_last(v: &Value) -> (usize, Shape) {
    if v.rank() == 0 {
        return (1, Shape::scalar());
    }
    let items = v.shape().items();
    (
        items[items.len() - 1],
        Shape::new(items[..items.len() - 1].to_vec()).expect("rank decreases"),
    )
}

fn split_first(v: &Value) -> (usize, Shape) {
    if v.rank() == 0 {
        return (1, Shape::scalar());
    }
    let items = v.shape().items();
    (
        items[0],
        Shape::new(items[1..].to_vec()).expect("rank decreases"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Ctx {
        Ctx::default()
    }

    fn par() -> ParallelConfig {
        ParallelConfig::default()
    }

    #[test]
    fn test_outer_times_table() {
        // (⍳5) ∘.× ⍳5
        let v = Value::int_vector(&[1, 2, 3, 4, 5]);
        let z = outer_prim('×', &v, &v, &ctx(), &par()).unwrap();
        assert_eq!(z.shape().items(), &[5, 5]);
        // Z[i,j] = i×j (⎕IO=1)
        for i in 0..5 {
            for j in 0..5 {
                assert_eq!(
                    z.ravel()[i * 5 + j],
                    Cell::Int(((i + 1) * (j + 1)) as i64)
                );
            }
        }
    }

    #[test]
    fn test_outer_shape_is_catenation() {
        let a = Value::int_vector(&[1, 2]);
        let b = Value::new(
            Shape::new(vec![3, 4]).unwrap(),
            vec![Cell::Int(0); 12],
        )
        .unwrap();
        let z = outer_prim('+', &a, &b, &ctx(), &par()).unwrap();
        assert_eq!(z.shape().items(), &[2, 3, 4]);
    }

    #[test]
    fn test_inner_matmul() {
        // 2×3 +.× 3×2
        let a = Value::new(
            Shape::new(vec![2, 3]).unwrap(),
            (1..=6).map(Cell::Int).collect(),
        )
        .unwrap();
        let b = Value::new(
            Shape::new(vec![3, 2]).unwrap(),
            (1..=6).map(Cell::Int).collect(),
        )
        .unwrap();
        let z = inner_prim('+', '×', &a, &b, &ctx(), &par()).unwrap();
        assert_eq!(z.shape().items(), &[2, 2]);
        assert_eq!(
            z.ravel(),
            Value::int_vector(&[22, 28, 49, 64]).ravel()
        );
    }

    #[test]
    fn test_inner_vector_dot() {
        let a = Value::int_vector(&[1, 2, 3]);
        let b = Value::int_vector(&[4, 5, 6]);
        let z = inner_prim('+', '×', &a, &b, &ctx(), &par()).unwrap();
        assert!(z.is_scalar());
        assert_eq!(z.ravel()[0], Cell::Int(32));
    }

    #[test]
    fn test_inner_length_error() {
        let a = Value::int_vector(&[1, 2]);
        let b = Value::int_vector(&[1, 2, 3]);
        assert_eq!(
            inner_prim('+', '×', &a, &b, &ctx(), &par()).unwrap_err(),
            ErrorKind::Length
        );
    }

    #[test]
    fn test_inner_empty_shared_uses_identity() {
        let a = Value::new(Shape::new(vec![2, 0]).unwrap(), vec![Cell::Int(0)]).unwrap();
        let b = Value::new(Shape::new(vec![0, 2]).unwrap(), vec![Cell::Int(0)]).unwrap();
        let z = inner_prim('+', '×', &a, &b, &ctx(), &par()).unwrap();
        assert_eq!(z.shape().items(), &[2, 2]);
        assert_eq!(z.ravel()[0], Cell::Int(0));
    }

    #[test]
    fn test_outer_parallel_matches() {
        let mut pc = ParallelConfig::default();
        pc.cores = 4;
        pc.default_threshold = 4;
        let v = Value::int_vector(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let seq = outer_prim('×', &v, &v, &ctx(), &par()).unwrap();
        let parz = outer_prim('×', &v, &v, &ctx(), &pc).unwrap();
        assert_eq!(seq.ravel(), parz.ravel());
    }
}
