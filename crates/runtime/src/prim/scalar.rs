//! Scalar-function dispatch
//!
//! Applies a cell-level primitive elementwise with scalar extension,
//! recursing through pointer cells so that nested arguments work at any
//! depth. Empty arguments short-circuit through the fill semantics, and
//! every dyadic primitive exposes the identity constant used by reduce
//! over an empty axis.

use crate::parallel::{ParallelConfig, compute_cells};
use crate::sysvar::Ctx;
use apl_core::{Cell, ErrorKind, Shape, Value};
use std::sync::Arc;

pub type MonCellFn = fn(&Cell, &Ctx) -> Result<Cell, ErrorKind>;
pub type DyaCellFn = fn(&Cell, &Cell, &Ctx) -> Result<Cell, ErrorKind>;

/// The monadic cell operation behind a scalar glyph, if the glyph has a
/// monadic scalar meaning
pub fn monadic_cell_fn(prim: char) -> Option<MonCellFn> {
    Some(match prim {
        '+' => |b, _ctx| b.conjugate(),
        '-' => |b, _ctx| b.negative(),
        '×' => |b, _ctx| b.direction(),
        '÷' => |b: &Cell, ctx: &Ctx| b.reciprocal(ctx.ct),
        '|' => |b, _ctx| b.magnitude(),
        '⌈' => |b: &Cell, ctx: &Ctx| b.ceiling(ctx.ct),
        '⌊' => |b: &Cell, ctx: &Ctx| b.floor(ctx.ct),
        '⋆' => |b, _ctx| b.exponential(),
        '⍟' => |b, _ctx| b.nat_log(),
        '!' => |b: &Cell, ctx: &Ctx| b.factorial(ctx.ct),
        '○' => |b, _ctx| b.pi_times(),
        '~' => |b: &Cell, ctx: &Ctx| b.not(ctx.ct),
        _ => return None,
    })
}

/// The dyadic cell operation behind a scalar glyph
pub fn dyadic_cell_fn(prim: char) -> Option<DyaCellFn> {
    Some(match prim {
        '+' => |a: &Cell, b: &Cell, _ctx: &Ctx| a.add(b),
        '-' => |a: &Cell, b: &Cell, _ctx: &Ctx| a.subtract(b),
        '×' => |a: &Cell, b: &Cell, _ctx: &Ctx| a.multiply(b),
        '÷' => |a: &Cell, b: &Cell, ctx: &Ctx| a.divide(b, ctx.ct),
        '⋆' => |a: &Cell, b: &Cell, ctx: &Ctx| a.power(b, ctx.ct),
        '⍟' => |a: &Cell, b: &Cell, ctx: &Ctx| a.logarithm(b, ctx.ct),
        '|' => |a: &Cell, b: &Cell, ctx: &Ctx| a.residue(b, ctx.ct),
        '⌈' => |a: &Cell, b: &Cell, ctx: &Ctx| a.maximum(b, ctx.ct),
        '⌊' => |a: &Cell, b: &Cell, ctx: &Ctx| a.minimum(b, ctx.ct),
        '!' => |a: &Cell, b: &Cell, ctx: &Ctx| a.binomial(b, ctx.ct),
        '○' => |a: &Cell, b: &Cell, ctx: &Ctx| a.circle_fn(b, ctx.ct),
        '∧' => |a: &Cell, b: &Cell, ctx: &Ctx| a.and(b, ctx.ct),
        '∨' => |a: &Cell, b: &Cell, ctx: &Ctx| a.or(b, ctx.ct),
        '⍲' => |a: &Cell, b: &Cell, ctx: &Ctx| a.nand(b, ctx.ct),
        '⍱' => |a: &Cell, b: &Cell, ctx: &Ctx| a.nor(b, ctx.ct),
        '=' => |a: &Cell, b: &Cell, ctx: &Ctx| Ok(Cell::bool(a.equal(b, ctx.ct))),
        '≠' => |a: &Cell, b: &Cell, ctx: &Ctx| Ok(Cell::bool(!a.equal(b, ctx.ct))),
        // the ordering comparisons live in dya_cell_op, which also owns
        // their DOMAIN behaviour on characters and complex numbers
        _ => return None,
    })
}

/// True when the glyph has a dyadic scalar meaning
pub fn is_scalar_dyadic(prim: char) -> bool {
    dyadic_fn_exists(prim)
}

fn dyadic_fn_exists(prim: char) -> bool {
    matches!(
        prim,
        '+' | '-'
            | '×'
            | '÷'
            | '⋆'
            | '⍟'
            | '|'
            | '⌈'
            | '⌊'
            | '!'
            | '○'
            | '∧'
            | '∨'
            | '⍲'
            | '⍱'
            | '='
            | '≠'
            | '<'
            | '≤'
            | '>'
            | '≥'
    )
}

/// Apply the dyadic cell op for a glyph (handles the comparison glyphs
/// that need an ordering pick)
pub fn dya_cell_op(prim: char, a: &Cell, b: &Cell, ctx: &Ctx) -> Result<Cell, ErrorKind> {
    match prim {
        '<' => Ok(Cell::bool(
            a.compare_real(b, ctx.ct)? == std::cmp::Ordering::Less,
        )),
        '≤' => Ok(Cell::bool(
            a.compare_real(b, ctx.ct)? != std::cmp::Ordering::Greater,
        )),
        '>' => Ok(Cell::bool(
            a.compare_real(b, ctx.ct)? == std::cmp::Ordering::Greater,
        )),
        '≥' => Ok(Cell::bool(
            a.compare_real(b, ctx.ct)? != std::cmp::Ordering::Less,
        )),
        _ => match dyadic_cell_fn(prim) {
            Some(f) => f(a, b, ctx),
            None => Err(ErrorKind::Syntax),
        },
    }
}

/// Identity constant for F/ over an empty axis, if F has one
pub fn identity_cell(prim: char) -> Option<Cell> {
    Some(match prim {
        '+' | '-' | '|' | '∨' | '<' | '>' | '≠' => Cell::Int(0),
        '×' | '÷' | '⋆' | '!' | '∧' | '≤' | '=' | '≥' => Cell::Int(1),
        '⌈' => Cell::Float(f64::NEG_INFINITY),
        '⌊' => Cell::Float(f64::INFINITY),
        _ => return None,
    })
}

/// Monadic scalar application with nesting recursion
pub fn eval_monadic(
    prim: char,
    b: &Value,
    ctx: &Ctx,
    par: &ParallelConfig,
) -> Result<Value, ErrorKind> {
    let f = monadic_cell_fn(prim).ok_or(ErrorKind::Syntax)?;
    if b.is_empty() {
        return Ok(fill_monadic(b));
    }
    let threshold = par.threshold_monadic(prim);
    let cells = if b.is_simple() {
        compute_cells(par, threshold, b.element_count(), |i| f(b.cell(i), ctx))?
    } else {
        let mut cells = Vec::with_capacity(b.element_count());
        for i in 0..b.element_count() {
            cells.push(mon_cell(prim, f, b.cell(i), ctx, par)?);
        }
        cells
    };
    Value::new(b.shape().clone(), cells)
}

fn mon_cell(
    prim: char,
    f: MonCellFn,
    c: &Cell,
    ctx: &Ctx,
    par: &ParallelConfig,
) -> Result<Cell, ErrorKind> {
    match c {
        Cell::Pointer(v) => {
            let z = eval_monadic(prim, v, ctx, par)?;
            Ok(nest(z))
        }
        _ => f(c, ctx),
    }
}

/// Prototype-propagated empty result for a scalar function over an empty
/// argument
pub fn fill_monadic(b: &Value) -> Value {
    Value::empty_with_prototype(b.shape().clone(), b.prototype_cell())
}

fn nest(v: Value) -> Cell {
    if v.is_scalar() && v.is_simple() {
        v.ravel()[0].clone()
    } else {
        Cell::Pointer(Arc::new(v))
    }
}

/// How the two arguments of a dyadic scalar application conform
enum Conform {
    /// A is fixed (single), iterate over B
    FixA,
    /// B is fixed (single), iterate over A
    FixB,
    /// Same shape, iterate both
    Both,
}

fn conform(a: &Value, b: &Value) -> Result<(Shape, Conform), ErrorKind> {
    let asingle = a.is_single();
    let bsingle = b.is_single();
    if asingle && bsingle {
        let z = if a.rank() >= b.rank() {
            a.shape().clone()
        } else {
            b.shape().clone()
        };
        return Ok((z, Conform::FixA));
    }
    if asingle {
        return Ok((b.shape().clone(), Conform::FixA));
    }
    if bsingle {
        return Ok((a.shape().clone(), Conform::FixB));
    }
    if a.shape() == b.shape() {
        return Ok((a.shape().clone(), Conform::Both));
    }
    if a.rank() != b.rank() {
        Err(ErrorKind::Rank)
    } else {
        Err(ErrorKind::Length)
    }
}

/// Dyadic scalar application with scalar extension and nesting recursion
pub fn eval_dyadic(
    prim: char,
    a: &Value,
    b: &Value,
    ctx: &Ctx,
    par: &ParallelConfig,
) -> Result<Value, ErrorKind> {
    if !dyadic_fn_exists(prim) {
        return Err(ErrorKind::Syntax);
    }
    let (zshape, mode) = conform(a, b)?;
    if zshape.is_empty() {
        return Ok(fill_dyadic(&zshape, a, b));
    }
    let n = zshape.element_count();
    let threshold = par.threshold_dyadic(prim);
    let cells = if a.is_simple() && b.is_simple() {
        compute_cells(par, threshold, n, |i| {
            let (ca, cb) = pick(&mode, a, b, i);
            dya_cell_op(prim, ca, cb, ctx)
        })?
    } else {
        let mut cells = Vec::with_capacity(n);
        for i in 0..n {
            let (ca, cb) = pick(&mode, a, b, i);
            cells.push(dya_cell(prim, ca, cb, ctx, par)?);
        }
        cells
    };
    Value::new(zshape, cells)
}

fn pick<'v>(mode: &Conform, a: &'v Value, b: &'v Value, i: usize) -> (&'v Cell, &'v Cell) {
    match mode {
        Conform::FixA => (a.first(), b.cell(i)),
        Conform::FixB => (a.cell(i), b.first()),
        Conform::Both => (a.cell(i), b.cell(i)),
    }
}

fn dya_cell(
    prim: char,
    a: &Cell,
    b: &Cell,
    ctx: &Ctx,
    par: &ParallelConfig,
) -> Result<Cell, ErrorKind> {
    match (a, b) {
        (Cell::Pointer(va), Cell::Pointer(vb)) => {
            Ok(nest(eval_dyadic(prim, va, vb, ctx, par)?))
        }
        (Cell::Pointer(va), y) => {
            let vb = Value::scalar(y.clone());
            Ok(nest(eval_dyadic(prim, va, &vb, ctx, par)?))
        }
        (x, Cell::Pointer(vb)) => {
            let va = Value::scalar(x.clone());
            Ok(nest(eval_dyadic(prim, &va, vb, ctx, par)?))
        }
        _ => dya_cell_op(prim, a, b, ctx),
    }
}

/// Empty result of a dyadic scalar application: numeric prototype (the
/// fill function of every scalar primitive yields 0)
fn fill_dyadic(zshape: &Shape, _a: &Value, _b: &Value) -> Value {
    Value::empty_with_prototype(zshape.clone(), Cell::Int(0))
}

/// Dyadic scalar application restricted to an axis set: the lower-rank
/// argument is paired with the axes of the higher-rank one named by X
pub fn eval_dyadic_axis(
    prim: char,
    a: &Value,
    x: &Value,
    b: &Value,
    ctx: &Ctx,
    par: &ParallelConfig,
) -> Result<Value, ErrorKind> {
    let (low, high, low_is_a) = if a.rank() <= b.rank() {
        (a, b, true)
    } else {
        (b, a, false)
    };
    let axes = crate::prim::resolve_axis_set(x, high.rank(), ctx).map_err(|_| ErrorKind::Axis)?;
    if axes.len() != low.rank() {
        return Err(ErrorKind::Axis);
    }
    for (i, &ax) in axes.iter().enumerate() {
        if low.shape()[i] != high.shape()[ax] {
            return Err(ErrorKind::Length);
        }
    }
    if high.is_empty() {
        return Ok(fill_dyadic(high.shape(), a, b));
    }

    // weight vector mapping a high-rank index to the low-rank ravel
    let low_weights = low.shape().weights();
    let mut ix = vec![0usize; high.rank()];
    let mut cells = Vec::with_capacity(high.element_count());
    loop {
        let mut low_off = 0;
        for (i, &ax) in axes.iter().enumerate() {
            low_off += ix[ax] * low_weights[i];
        }
        let hoff = high.shape().offset_of(&ix);
        let (ca, cb) = if low_is_a {
            (low.cell(low_off), high.cell(hoff))
        } else {
            (high.cell(hoff), low.cell(low_off))
        };
        cells.push(dya_cell(prim, ca, cb, ctx, par)?);
        if !high.shape().increment(&mut ix) {
            break;
        }
    }
    Value::new(high.shape().clone(), cells)
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
    fn test_monadic_negative() {
        let b = Value::int_vector(&[1, -2, 3]);
        let z = eval_monadic('-', &b, &ctx(), &par()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[-1, 2, -3]).ravel());
    }

    #[test]
    fn test_dyadic_matching_shapes() {
        let a = Value::int_vector(&[1, 2, 3]);
        let b = Value::int_vector(&[10, 20, 30]);
        let z = eval_dyadic('+', &a, &b, &ctx(), &par()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[11, 22, 33]).ravel());
    }

    #[test]
    fn test_scalar_extension() {
        let a = Value::int_scalar(10);
        let b = Value::int_vector(&[1, 2, 3]);
        let z = eval_dyadic('×', &a, &b, &ctx(), &par()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[10, 20, 30]).ravel());
        let z = eval_dyadic('-', &b, &a, &ctx(), &par()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[-9, -8, -7]).ravel());
    }

    #[test]
    fn test_length_and_rank_errors() {
        let a = Value::int_vector(&[1, 2]);
        let b = Value::int_vector(&[1, 2, 3]);
        assert_eq!(
            eval_dyadic('+', &a, &b, &ctx(), &par()).unwrap_err(),
            ErrorKind::Length
        );
        let m = Value::new(Shape::new(vec![1, 3]).unwrap(), vec![
            Cell::Int(1),
            Cell::Int(2),
            Cell::Int(3),
        ])
        .unwrap();
        assert_eq!(
            eval_dyadic('+', &b, &m, &ctx(), &par()).unwrap_err(),
            ErrorKind::Rank
        );
    }

    #[test]
    fn test_nested_recursion() {
        let inner = Value::int_vector(&[1, 2]);
        let a = Value::vector(vec![Cell::Pointer(Arc::new(inner)), Cell::Int(10)]);
        let z = eval_dyadic('+', &a, &Value::int_scalar(1), &ctx(), &par()).unwrap();
        match &z.ravel()[0] {
            Cell::Pointer(v) => {
                assert_eq!(v.ravel(), Value::int_vector(&[2, 3]).ravel())
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(z.ravel()[1], Cell::Int(11));
    }

    #[test]
    fn test_empty_fill() {
        let b = Value::empty_numeric();
        let z = eval_monadic('-', &b, &ctx(), &par()).unwrap();
        assert!(z.is_empty());
        assert_eq!(z.prototype_cell(), Cell::Int(0));
    }

    #[test]
    fn test_comparison_tolerance() {
        let mut c = ctx();
        c.ct = 1e-10;
        let a = Value::int_scalar(1);
        let b = Value::scalar(Cell::Float(1.0 + 1e-12));
        let z = eval_dyadic('=', &a, &b, &c, &par()).unwrap();
        assert_eq!(z.ravel()[0], Cell::Int(1));
    }

    #[test]
    fn test_identity_cells() {
        assert_eq!(identity_cell('+'), Some(Cell::Int(0)));
        assert_eq!(identity_cell('×'), Some(Cell::Int(1)));
        assert_eq!(identity_cell('⌈'), Some(Cell::Float(f64::NEG_INFINITY)));
        assert_eq!(identity_cell('○'), None);
    }

    #[test]
    fn test_dyadic_axis() {
        // (2 3⍴⍳6) +[1] 10 20: column vector paired with axis 1 (⎕IO=1)
        let m = Value::new(
            Shape::new(vec![2, 3]).unwrap(),
            (1..=6).map(Cell::Int).collect(),
        )
        .unwrap();
        let v = Value::int_vector(&[10, 20]);
        let x = Value::int_scalar(1);
        let z = eval_dyadic_axis('+', &m, &x, &v, &ctx(), &par()).unwrap();
        assert_eq!(
            z.ravel(),
            Value::int_vector(&[11, 12, 13, 24, 25, 26]).ravel()
        );
    }
}
