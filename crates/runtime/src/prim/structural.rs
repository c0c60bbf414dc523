//! Structural primitives: ⍴ ↑ ↓ , ⍪ ⍉ ⌽ ⊖ ∊ ⍳ ⍋ ⍒ ⌷ ⊤ ⊥ ⌹ ∪ ∩ ~ ≡ ≢ ⊣ ⊢
//!
//! Each primitive is its shape contract plus a row-major traversal.
//! Empty-array behaviour is prototype-correct throughout: take by zero
//! keeps B's prototype, over-take fills with it, reshape of an empty
//! source propagates its prototype.

use crate::prim::resolve_axis;
use crate::sysvar::Ctx;
use apl_core::{Cell, ErrorKind, Shape, Shape3, Value};
use std::sync::Arc;

// ----------------------------------------------------------------------
// ⍴
// ----------------------------------------------------------------------

/// ⍴B: the shape as an integer vector
pub fn shape_of(b: &Value) -> Value {
    let items: Vec<i64> = b.shape().items().iter().map(|&n| n as i64).collect();
    Value::int_vector(&items)
}

/// A⍴B: result shape A, ravel of B cycled (prototype-filled if B is empty)
pub fn reshape(a: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    let zshape = a.as_shape(ctx.ct)?;
    let zlen = zshape.element_count();
    if zlen == 0 {
        return Ok(Value::empty_with_prototype(zshape, b.prototype_cell()));
    }
    let src = b.element_count();
    let cells: Vec<Cell> = if src == 0 {
        let proto = b.prototype_cell();
        vec![proto; zlen]
    } else {
        (0..zlen).map(|i| b.ravel()[i % src].clone()).collect()
    };
    Value::new(zshape, cells)
}

// ----------------------------------------------------------------------
// , ⍪
// ----------------------------------------------------------------------

/// ,B: ravel to a vector
pub fn ravel(b: &Value) -> Value {
    if b.is_empty() {
        return Value::empty_with_prototype(Shape::vector(0), b.prototype_cell());
    }
    Value::vector(b.ravel().to_vec())
}

/// ⍪B: ravel to a one-column view — shape `(⍴B)[0], ×/1↓⍴B`
pub fn table(b: &Value) -> Result<Value, ErrorKind> {
    let (rows, cols) = if b.rank() == 0 {
        (1, 1)
    } else {
        let rows = b.shape()[0];
        let cols: usize = b.shape().items()[1..].iter().product();
        (rows, cols)
    };
    let zshape = Shape::new(vec![rows, cols])?;
    if zshape.is_empty() {
        return Ok(Value::empty_with_prototype(zshape, b.prototype_cell()));
    }
    Value::new(zshape, b.ravel().to_vec())
}

/// A,B (axis = last) or A⍪B (axis = first), or A,[X]B.
/// A fractional axis laminates: both arguments gain a new length-1 axis.
pub fn catenate(
    a: &Value,
    b: &Value,
    axis: Option<&Value>,
    first_axis: bool,
    ctx: &Ctx,
) -> Result<Value, ErrorKind> {
    // lamination: axis strictly between two integers
    if let Some(x) = axis {
        let f = x.to_real_scalar(ctx.ct).map_err(|_| ErrorKind::Axis)?;
        let adjusted = f - ctx.io as f64;
        if adjusted.fract() != 0.0 {
            let at = adjusted.ceil();
            if at < 0.0 || at > a.rank().max(b.rank()) as f64 {
                return Err(ErrorKind::Axis);
            }
            return laminate(a, b, at as usize);
        }
    }

    let rank = a.rank().max(b.rank()).max(1);
    let axis = match axis {
        Some(x) => resolve_axis(x, rank, ctx)?,
        None if first_axis => 0,
        None => rank - 1,
    };

    let ea = extend_for_catenate(a, b, rank, axis)?;
    let eb = extend_for_catenate(b, a, rank, axis)?;

    // conformance outside the catenation axis
    for ax in 0..rank {
        if ax != axis && ea.shape()[ax] != eb.shape()[ax] {
            return Err(ErrorKind::Length);
        }
    }

    let zm = ea.shape()[axis] + eb.shape()[axis];
    let zshape = ea.shape().with_axis(axis, zm);
    let s3a = Shape3::new(ea.shape(), axis);
    let s3b = Shape3::new(eb.shape(), axis);
    let mut cells = Vec::with_capacity(zshape.ravel_len());
    if zshape.is_empty() {
        return Ok(Value::empty_with_prototype(zshape, ea.prototype_cell()));
    }
    for h in 0..s3a.h.max(1) {
        for m in 0..s3a.m {
            for l in 0..s3a.l {
                cells.push(ea.cell(s3a.offset(h, m, l)).clone());
            }
        }
        for m in 0..s3b.m {
            for l in 0..s3b.l {
                cells.push(eb.cell(s3b.offset(h, m, l)).clone());
            }
        }
    }
    Value::new(zshape, cells)
}

/// Conform one catenation argument to the common rank: scalars are
/// broadcast to the other's shape with extent 1 on the axis; rank-1-less
/// arguments gain a length-1 axis
fn extend_for_catenate(
    v: &Value,
    other: &Value,
    rank: usize,
    axis: usize,
) -> Result<Value, ErrorKind> {
    if v.rank() == rank {
        return Ok(v.clone());
    }
    if v.rank() + 1 == rank {
        let zshape = v.shape().insert_axis(axis, 1)?;
        return Value::new(zshape, v.ravel().to_vec());
    }
    if v.is_scalar() {
        // broadcast to the other's shape with extent 1 on the axis
        let model = if other.rank() == rank {
            other.shape().with_axis(axis, 1)
        } else {
            Shape::vector(1)
        };
        let n = model.ravel_len();
        return Value::new(model, vec![v.first().clone(); n]);
    }
    Err(ErrorKind::Rank)
}

fn laminate(a: &Value, b: &Value, at: usize) -> Result<Value, ErrorKind> {
    let (sa, sb) = (a.shape(), b.shape());
    if !a.is_scalar() && !b.is_scalar() && sa != sb {
        return Err(ErrorKind::Length);
    }
    let model = if a.is_scalar() { sb } else { sa };
    let zshape = model.insert_axis(at, 2)?;
    let n = model.element_count();
    let mut cells = Vec::with_capacity(zshape.ravel_len());
    let s3 = Shape3::new(&zshape, at);
    for h in 0..s3.h {
        for m in 0..2 {
            let src = if m == 0 { a } else { b };
            for l in 0..s3.l {
                cells.push(src.cell((h * s3.l + l) % n.max(1)).clone());
            }
        }
    }
    if zshape.is_empty() {
        return Ok(Value::empty_with_prototype(zshape, a.prototype_cell()));
    }
    Value::new(zshape, cells)
}

// ----------------------------------------------------------------------
// ↑ ↓
// ----------------------------------------------------------------------

/// A↑B with possibly-negative take counts and prototype fill on over-take
pub fn take(a: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    let counts = a.as_int_vector(ctx.ct)?;
    let b = conform_rank(b, counts.len())?;
    if counts.len() != b.rank() {
        return Err(ErrorKind::Length);
    }
    let zshape = Shape::new(counts.iter().map(|&c| c.unsigned_abs() as usize).collect())?;
    let proto = b.prototype_cell();
    if zshape.is_empty() {
        return Ok(Value::empty_with_prototype(zshape, proto));
    }
    let mut cells = Vec::with_capacity(zshape.element_count());
    let mut ix = vec![0usize; zshape.rank()];
    loop {
        // map result index to source index, negative counts align right
        let mut src = Vec::with_capacity(ix.len());
        let mut in_range = true;
        for (ax, &zi) in ix.iter().enumerate() {
            let bn = b.shape()[ax] as i64;
            let c = counts[ax];
            let si = if c >= 0 { zi as i64 } else { bn - c.abs() + zi as i64 };
            if si < 0 || si >= bn {
                in_range = false;
                break;
            }
            src.push(si as usize);
        }
        if in_range {
            cells.push(b.cell(b.shape().offset_of(&src)).clone());
        } else {
            cells.push(proto.clone());
        }
        if !zshape.increment(&mut ix) {
            break;
        }
    }
    Value::new(zshape, cells)
}

/// A↓B: drop; over-drop yields an empty result
pub fn drop(a: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    let counts = a.as_int_vector(ctx.ct)?;
    let b = conform_rank(b, counts.len())?;
    if counts.len() != b.rank() {
        return Err(ErrorKind::Length);
    }
    // A↓B is equivalent to a take of what remains
    let take_counts: Vec<i64> = counts
        .iter()
        .enumerate()
        .map(|(ax, &c)| {
            let bn = b.shape()[ax] as i64;
            let keep = (bn - c.abs()).max(0);
            if c >= 0 { -keep } else { keep }
        })
        .collect();
    take(&Value::int_vector(&take_counts), &b, ctx)
}

/// ↑B: the first element (prototype of B when empty)
pub fn first(b: &Value) -> Value {
    let c = if b.is_empty() {
        b.prototype_cell()
    } else {
        b.ravel()[0].clone()
    };
    match c {
        Cell::Pointer(v) => (*v).clone(),
        other => Value::scalar(other),
    }
}

/// A scalar B conforms to the rank demanded by a take/drop vector
fn conform_rank(b: &Value, rank: usize) -> Result<Value, ErrorKind> {
    if b.rank() == rank || rank == 0 {
        return Ok(b.clone());
    }
    if b.is_scalar() {
        let shape = Shape::new(vec![1; rank])?;
        return Value::new(shape, b.ravel().to_vec());
    }
    Err(ErrorKind::Rank)
}

// ----------------------------------------------------------------------
// ⍉ ⌽ ⊖
// ----------------------------------------------------------------------

/// ⍉B: reverse the axes
pub fn transpose_mon(b: &Value) -> Result<Value, ErrorKind> {
    let perm: Vec<i64> = (0..b.rank() as i64).rev().collect();
    transpose_perm(&perm, b)
}

/// A⍉B: A maps B-axes to Z-axes; repeated entries diagonalise
pub fn transpose_dya(a: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    let mut perm = a.as_int_vector(ctx.ct)?;
    if perm.len() != b.rank() {
        return Err(ErrorKind::Length);
    }
    for p in perm.iter_mut() {
        *p -= ctx.io;
    }
    transpose_perm(&perm, b)
}

fn transpose_perm(perm: &[i64], b: &Value) -> Result<Value, ErrorKind> {
    if perm.is_empty() {
        return Ok(b.clone());
    }
    let zrank = perm.iter().map(|&p| p + 1).max().unwrap_or(0);
    if zrank <= 0 {
        return Err(ErrorKind::Domain);
    }
    let zrank = zrank as usize;
    // every Z-axis must be named at least once
    let mut zshape_items = vec![usize::MAX; zrank];
    for (bax, &zax) in perm.iter().enumerate() {
        if zax < 0 || zax as usize >= zrank {
            return Err(ErrorKind::Domain);
        }
        let zax = zax as usize;
        let extent = b.shape()[bax];
        zshape_items[zax] = zshape_items[zax].min(extent);
    }
    if zshape_items.iter().any(|&n| n == usize::MAX) {
        return Err(ErrorKind::Domain);
    }
    let zshape = Shape::new(zshape_items)?;
    if zshape.is_empty() {
        return Ok(Value::empty_with_prototype(zshape, b.prototype_cell()));
    }
    let mut cells = Vec::with_capacity(zshape.element_count());
    let mut zix = vec![0usize; zshape.rank()];
    loop {
        let bix: Vec<usize> = perm.iter().map(|&zax| zix[zax as usize]).collect();
        cells.push(b.cell(b.shape().offset_of(&bix)).clone());
        if !zshape.increment(&mut zix) {
            break;
        }
    }
    Value::new(zshape, cells)
}

/// ⌽[X]B (or ⊖B with the first axis): reverse along an axis
pub fn reverse(b: &Value, axis: usize) -> Result<Value, ErrorKind> {
    if b.rank() == 0 {
        return Ok(b.clone());
    }
    let s3 = Shape3::new(b.shape(), axis);
    if b.is_empty() {
        return Ok(b.clone());
    }
    let mut cells = Vec::with_capacity(b.element_count());
    for h in 0..s3.h {
        for m in 0..s3.m {
            for l in 0..s3.l {
                cells.push(b.cell(s3.offset(h, s3.m - 1 - m, l)).clone());
            }
        }
    }
    Value::new(b.shape().clone(), cells)
}

/// A⌽[X]B: rotate along an axis; A is a scalar or conforms to the shape
/// of B with the axis removed
pub fn rotate(a: &Value, b: &Value, axis: usize, ctx: &Ctx) -> Result<Value, ErrorKind> {
    if b.rank() == 0 {
        return Ok(b.clone());
    }
    let s3 = Shape3::new(b.shape(), axis);
    if b.is_empty() {
        return Ok(b.clone());
    }
    let rest = b.shape().remove_axis(axis);
    let amounts: Vec<i64> = if a.is_single() {
        vec![a.to_int_scalar(ctx.ct)?; s3.h * s3.l]
    } else {
        if a.shape() != &rest {
            return Err(if a.rank() != rest.rank() {
                ErrorKind::Rank
            } else {
                ErrorKind::Length
            });
        }
        a.as_rotation_vector(ctx.ct)?
    };
    let m = s3.m as i64;
    let mut cells = Vec::with_capacity(b.element_count());
    for h in 0..s3.h {
        for mm in 0..s3.m {
            for l in 0..s3.l {
                let amt = amounts[h * s3.l + l];
                let src = (mm as i64 + amt).rem_euclid(m) as usize;
                cells.push(b.cell(s3.offset(h, src, l)).clone());
            }
        }
    }
    Value::new(b.shape().clone(), cells)
}

// helper on Value used only here
trait RotationArg {
    fn as_rotation_vector(&self, ct: f64) -> Result<Vec<i64>, ErrorKind>;
}

impl RotationArg for Value {
    fn as_rotation_vector(&self, ct: f64) -> Result<Vec<i64>, ErrorKind> {
        self.ravel()
            .iter()
            .take(self.element_count())
            .map(|c| c.to_int(ct))
            .collect()
    }
}

// ----------------------------------------------------------------------
// ⍳ ∊ ∪ ∩ ~
// ----------------------------------------------------------------------

/// ⍳N: the index vector ⎕IO … N−1+⎕IO
pub fn iota(b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    let n = b.to_int_scalar(ctx.ct)?;
    if n < 0 {
        return Err(ErrorKind::Domain);
    }
    if n == 0 {
        return Ok(Value::empty_numeric());
    }
    Ok(Value::vector(
        (0..n).map(|i| Cell::Int(i + ctx.io)).collect(),
    ))
}

/// A⍳B: index of the first match of each element of B in vector A;
/// ⎕IO + len(A) where not found
pub fn index_of(a: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    if a.rank() > 1 {
        return Err(ErrorKind::Rank);
    }
    let not_found = ctx.io + a.element_count() as i64;
    let cells: Vec<Cell> = (0..b.element_count())
        .map(|i| {
            let needle = b.cell(i);
            let found = (0..a.element_count())
                .find(|&j| a.cell(j).equal(needle, ctx.ct))
                .map(|j| j as i64 + ctx.io)
                .unwrap_or(not_found);
            Cell::Int(found)
        })
        .collect();
    if b.is_empty() {
        return Ok(Value::empty_with_prototype(b.shape().clone(), Cell::Int(0)));
    }
    Value::new(b.shape().clone(), cells)
}

/// A∊B: membership, any shape of A against the elements of B
pub fn membership(a: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    if a.is_empty() {
        return Ok(Value::empty_with_prototype(a.shape().clone(), Cell::Int(0)));
    }
    let cells: Vec<Cell> = (0..a.element_count())
        .map(|i| {
            let needle = a.cell(i);
            let found = (0..b.element_count()).any(|j| b.cell(j).equal(needle, ctx.ct));
            Cell::bool(found)
        })
        .collect();
    Value::new(a.shape().clone(), cells)
}

/// ∊B: enlist — all leaf cells of a nested value, in ravel order
pub fn enlist(b: &Value) -> Value {
    fn walk(v: &Value, out: &mut Vec<Cell>) {
        for i in 0..v.element_count() {
            match v.cell(i) {
                Cell::Pointer(inner) => walk(inner, out),
                c => out.push(c.clone()),
            }
        }
    }
    let mut cells = Vec::new();
    walk(b, &mut cells);
    if cells.is_empty() {
        return Value::empty_with_prototype(Shape::vector(0), {
            fn leaf_proto(v: &Value) -> Cell {
                match &v.ravel()[0] {
                    Cell::Pointer(inner) => leaf_proto(inner),
                    c => c.prototype(),
                }
            }
            leaf_proto(b)
        });
    }
    Value::vector(cells)
}

/// ∪B: unique elements of a vector, first occurrence order
pub fn unique(b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    if b.rank() > 1 {
        return Err(ErrorKind::Rank);
    }
    let mut cells: Vec<Cell> = Vec::new();
    for i in 0..b.element_count() {
        let c = b.cell(i);
        if !cells.iter().any(|k| k.equal(c, ctx.ct)) {
            cells.push(c.clone());
        }
    }
    if cells.is_empty() {
        return Ok(Value::empty_with_prototype(
            Shape::vector(0),
            b.prototype_cell(),
        ));
    }
    Ok(Value::vector(cells))
}

/// A∪B: union of two vectors
pub fn union(a: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    if a.rank() > 1 || b.rank() > 1 {
        return Err(ErrorKind::Rank);
    }
    let mut cells: Vec<Cell> = a.ravel()[..a.element_count()].to_vec();
    for i in 0..b.element_count() {
        let c = b.cell(i);
        if !cells.iter().any(|k| k.equal(c, ctx.ct)) {
            cells.push(c.clone());
        }
    }
    if cells.is_empty() {
        return Ok(Value::empty_with_prototype(
            Shape::vector(0),
            a.prototype_cell(),
        ));
    }
    Ok(Value::vector(cells))
}

/// A∩B: intersection, keeping A's order
pub fn intersection(a: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    if a.rank() > 1 || b.rank() > 1 {
        return Err(ErrorKind::Rank);
    }
    let cells: Vec<Cell> = (0..a.element_count())
        .filter(|&i| {
            let c = a.cell(i);
            (0..b.element_count()).any(|j| b.cell(j).equal(c, ctx.ct))
        })
        .map(|i| a.cell(i).clone())
        .collect();
    if cells.is_empty() {
        return Ok(Value::empty_with_prototype(
            Shape::vector(0),
            a.prototype_cell(),
        ));
    }
    Ok(Value::vector(cells))
}

/// A~B: the elements of vector A not in B
pub fn without(a: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    if a.rank() > 1 {
        return Err(ErrorKind::Rank);
    }
    let cells: Vec<Cell> = (0..a.element_count())
        .filter(|&i| {
            let c = a.cell(i);
            !(0..b.element_count()).any(|j| b.cell(j).equal(c, ctx.ct))
        })
        .map(|i| a.cell(i).clone())
        .collect();
    if cells.is_empty() {
        return Ok(Value::empty_with_prototype(
            Shape::vector(0),
            a.prototype_cell(),
        ));
    }
    Ok(Value::vector(cells))
}

// ----------------------------------------------------------------------
// ⍋ ⍒
// ----------------------------------------------------------------------

/// ⍋B / ⍒B: the permutation that sorts the first axis; stable, ties
/// broken by position
pub fn grade(b: &Value, ascending: bool, ctx: &Ctx) -> Result<Value, ErrorKind> {
    if b.rank() == 0 {
        return Err(ErrorKind::Rank);
    }
    let n = b.shape()[0];
    let row: usize = b.shape().items()[1..].iter().product();
    let mut perm: Vec<usize> = (0..n).collect();
    let ct = ctx.ct;
    perm.sort_by(|&x, &y| {
        let mut ord = std::cmp::Ordering::Equal;
        for k in 0..row.max(1) {
            let cx = b.cell(x * row.max(1) + k);
            let cy = b.cell(y * row.max(1) + k);
            ord = cx.total_cmp(cy, ct);
            if ord != std::cmp::Ordering::Equal {
                break;
            }
        }
        if ascending { ord } else { ord.reverse() }
    });
    if n == 0 {
        return Ok(Value::empty_numeric());
    }
    Ok(Value::vector(
        perm.into_iter()
            .map(|i| Cell::Int(i as i64 + ctx.io))
            .collect(),
    ))
}

// ----------------------------------------------------------------------
// indexing: B[I;J;…] and A⌷B
// ----------------------------------------------------------------------

/// Bracket indexing `B[i1;…;ik]`: one slot per axis (all axes present or
/// elided); the result shape is the catenation of the slot shapes
pub fn bracket_index(
    b: &Value,
    slots: &[Option<Value>],
    ctx: &Ctx,
) -> Result<Value, ErrorKind> {
    if slots.len() != b.rank().max(1) {
        return Err(ErrorKind::Index);
    }
    let mut zshape_items: Vec<usize> = Vec::new();
    let mut per_axis: Vec<Vec<usize>> = Vec::new();
    for (ax, slot) in slots.iter().enumerate() {
        let extent = if b.rank() == 0 { 1 } else { b.shape()[ax] };
        match slot {
            None => {
                zshape_items.push(extent);
                per_axis.push((0..extent).collect());
            }
            Some(ixv) => {
                zshape_items.extend_from_slice(ixv.shape().items());
                let mut list = Vec::with_capacity(ixv.element_count());
                for i in 0..ixv.element_count() {
                    let n = ixv.cell(i).to_int(ctx.ct)? - ctx.io;
                    if n < 0 || n as usize >= extent {
                        return Err(ErrorKind::Index);
                    }
                    list.push(n as usize);
                }
                per_axis.push(list);
            }
        }
    }
    let zshape = Shape::new(zshape_items)?;
    if zshape.is_empty() {
        return Ok(Value::empty_with_prototype(zshape, b.prototype_cell()));
    }
    // odometer over the selected index lists
    let mut counters = vec![0usize; per_axis.len()];
    let mut cells = Vec::with_capacity(zshape.element_count());
    loop {
        let src: Vec<usize> = counters
            .iter()
            .enumerate()
            .map(|(ax, &c)| per_axis[ax][c])
            .collect();
        let off = if b.rank() == 0 {
            0
        } else {
            b.shape().offset_of(&src)
        };
        cells.push(b.cell(off).clone());
        // increment over the per-axis lists
        let mut ax = per_axis.len();
        loop {
            if ax == 0 {
                return Value::new(zshape, cells);
            }
            ax -= 1;
            counters[ax] += 1;
            if counters[ax] < per_axis[ax].len() {
                break;
            }
            counters[ax] = 0;
        }
    }
}

/// Indexed assignment `B[i1;…]←V`: scatter V (scalar-extended) into B
pub fn bracket_index_assign(
    b: &mut Value,
    slots: &[Option<Value>],
    v: &Value,
    ctx: &Ctx,
) -> Result<(), ErrorKind> {
    if slots.len() != b.rank().max(1) {
        return Err(ErrorKind::Index);
    }
    let mut per_axis: Vec<Vec<usize>> = Vec::new();
    let mut sel_count = 1usize;
    for (ax, slot) in slots.iter().enumerate() {
        let extent = if b.rank() == 0 { 1 } else { b.shape()[ax] };
        let list: Vec<usize> = match slot {
            None => (0..extent).collect(),
            Some(ixv) => {
                let mut list = Vec::with_capacity(ixv.element_count());
                for i in 0..ixv.element_count() {
                    let n = ixv.cell(i).to_int(ctx.ct)? - ctx.io;
                    if n < 0 || n as usize >= extent {
                        return Err(ErrorKind::Index);
                    }
                    list.push(n as usize);
                }
                list
            }
        };
        sel_count *= list.len();
        per_axis.push(list);
    }
    if !v.is_single() && v.element_count() != sel_count {
        return Err(ErrorKind::Length);
    }
    if sel_count == 0 {
        return Ok(());
    }
    let shape = b.shape().clone();
    let rank0 = b.rank() == 0;
    let mut counters = vec![0usize; per_axis.len()];
    let mut vi = 0usize;
    loop {
        let src: Vec<usize> = counters
            .iter()
            .enumerate()
            .map(|(ax, &c)| per_axis[ax][c])
            .collect();
        let off = if rank0 { 0 } else { shape.offset_of(&src) };
        let cell = if v.is_single() {
            v.first().clone()
        } else {
            v.cell(vi).clone()
        };
        b.ravel_mut()[off] = cell;
        vi += 1;
        let mut ax = per_axis.len();
        loop {
            if ax == 0 {
                return Ok(());
            }
            ax -= 1;
            counters[ax] += 1;
            if counters[ax] < per_axis[ax].len() {
                break;
            }
            counters[ax] = 0;
        }
    }
}

/// A⌷B: index along leading axes — A is a scalar or vector of indices,
/// one per leading axis of B
pub fn squad_index(a: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    let ixs = a.as_int_vector(ctx.ct)?;
    if ixs.len() > b.rank() {
        return Err(ErrorKind::Rank);
    }
    let mut slots: Vec<Option<Value>> = ixs
        .iter()
        .map(|&n| Some(Value::int_scalar(n)))
        .collect();
    for _ in ixs.len()..b.rank() {
        slots.push(None);
    }
    bracket_index(b, &slots, ctx)
}

// ----------------------------------------------------------------------
// ⊤ ⊥
// ----------------------------------------------------------------------

/// A⊥B: decode (mixed-base evaluation) along the first axis of B
pub fn decode(a: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    if a.rank() > 1 {
        return Err(ErrorKind::Rank);
    }
    let blen = if b.rank() == 0 { 1 } else { b.shape()[0] };
    let avec: Vec<f64> = if a.is_single() {
        vec![a.to_real_scalar(ctx.ct)?; blen]
    } else {
        let v: Result<Vec<f64>, ErrorKind> = (0..a.element_count())
            .map(|i| a.cell(i).real(ctx.ct))
            .collect();
        let v = v?;
        if v.len() != blen && blen != 1 {
            return Err(ErrorKind::Length);
        }
        v
    };
    let m = avec.len();

    // weights from the right: w[m-1] = 1, w[k] = w[k+1] × a[k+1]
    let mut weights = vec![1.0f64; m];
    for k in (0..m.saturating_sub(1)).rev() {
        weights[k] = weights[k + 1] * avec[k + 1];
    }

    let rest: usize = if b.rank() <= 1 {
        1
    } else {
        b.shape().items()[1..].iter().product()
    };
    let zshape = if b.rank() <= 1 {
        Shape::scalar()
    } else {
        Shape::new(b.shape().items()[1..].to_vec())?
    };
    let mut cells = Vec::with_capacity(zshape.ravel_len());
    for j in 0..rest {
        let mut acc = 0.0f64;
        for (k, w) in weights.iter().enumerate() {
            // B's first axis scalar-extends against the radix vector
            let bk = if blen == 1 { 0 } else { k };
            let x = b.cell(bk * rest + j).real(ctx.ct)?;
            acc += w * x;
        }
        cells.push(float_or_int(acc));
    }
    if zshape.is_empty() {
        return Ok(Value::empty_with_prototype(zshape, Cell::Int(0)));
    }
    Value::new(zshape, cells)
}

/// A⊤B: encode each element of B in the mixed-base given by vector A;
/// result shape `(⍴A),(⍴B)`
pub fn encode(a: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    if a.rank() > 1 {
        return Err(ErrorKind::Rank);
    }
    let m = a.element_count().max(if a.is_scalar() { 1 } else { 0 });
    let avec: Vec<f64> = (0..m).map(|i| a.cell(i).real(ctx.ct)).collect::<Result<_, _>>()?;
    let zshape = a.shape().catenated(b.shape())?;
    let bn = b.element_count();
    if zshape.is_empty() {
        return Ok(Value::empty_with_prototype(zshape, Cell::Int(0)));
    }
    let mut cells = vec![Cell::Int(0); m * bn.max(1)];
    for j in 0..bn.max(1) {
        let mut rest = b.cell(j.min(bn.saturating_sub(1))).real(ctx.ct)?;
        for k in (0..m).rev() {
            let radix = avec[k];
            let digit = if radix == 0.0 {
                let d = rest;
                rest = 0.0;
                d
            } else {
                let d = rest.rem_euclid(radix);
                rest = ((rest - d) / radix).round();
                d
            };
            cells[k * bn.max(1) + j] = float_or_int(digit);
        }
    }
    Value::new(zshape, cells)
}

fn float_or_int(x: f64) -> Cell {
    if x.fract() == 0.0 && x.abs() < (1i64 << 53) as f64 {
        Cell::Int(x as i64)
    } else {
        Cell::Float(x)
    }
}

// ----------------------------------------------------------------------
// ⌹
// ----------------------------------------------------------------------

/// ⌹B: matrix inverse (least-squares pseudo-inverse for tall matrices)
pub fn matrix_inverse(b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    if b.is_scalar() {
        let x = b.to_real_scalar(ctx.ct)?;
        if x == 0.0 {
            return Err(ErrorKind::Domain);
        }
        return Ok(Value::scalar(Cell::Float(1.0 / x)));
    }
    let id = identity_matrix(if b.rank() == 1 {
        b.shape()[0]
    } else {
        b.shape()[0]
    });
    matrix_divide(&id, b, ctx)
}

/// A⌹B: least-squares solution of B X = A
pub fn matrix_divide(a: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    let (bm, bn, bdata) = as_matrix(b, ctx)?;
    let (am, an, adata) = as_matrix(a, ctx)?;
    if am != bm {
        return Err(ErrorKind::Length);
    }
    if bn > bm {
        return Err(ErrorKind::Domain); // underdetermined
    }

    // normal equations for the overdetermined case, plain solve otherwise
    let (m, rhs_cols, lhs, rhs) = if bm == bn {
        (bm, an, bdata, adata)
    } else {
        // lhs = BᵀB (n×n), rhs = BᵀA (n×an)
        let mut lhs = vec![0.0; bn * bn];
        for i in 0..bn {
            for j in 0..bn {
                let mut s = 0.0;
                for k in 0..bm {
                    s += bdata[k * bn + i] * bdata[k * bn + j];
                }
                lhs[i * bn + j] = s;
            }
        }
        let mut rhs = vec![0.0; bn * an];
        for i in 0..bn {
            for j in 0..an {
                let mut s = 0.0;
                for k in 0..bm {
                    s += bdata[k * bn + i] * adata[k * an + j];
                }
                rhs[i * an + j] = s;
            }
        }
        (bn, an, lhs, rhs)
    };

    let x = gauss_solve(m, rhs_cols, lhs, rhs)?;

    // result shape follows the argument ranks
    let zshape = match (a.rank(), b.rank()) {
        (1, _) | (0, _) => {
            if bn == 1 && a.rank() == 0 {
                Shape::scalar()
            } else {
                Shape::vector(bn)
            }
        }
        _ => Shape::new(vec![bn, an])?,
    };
    let cells: Vec<Cell> = x.into_iter().map(Cell::Float).collect();
    let want = zshape.ravel_len();
    let mut cells = cells;
    cells.truncate(want);
    Value::new(zshape, cells)
}

fn identity_matrix(n: usize) -> Value {
    let mut cells = vec![Cell::Int(0); n * n];
    for i in 0..n {
        cells[i * n + i] = Cell::Int(1);
    }
    Value::new(Shape::new(vec![n, n]).expect("small rank"), cells).expect("square")
}

/// View a scalar/vector/matrix as an m×n real matrix
fn as_matrix(v: &Value, ctx: &Ctx) -> Result<(usize, usize, Vec<f64>), ErrorKind> {
    let (m, n) = match v.rank() {
        0 => (1, 1),
        1 => (v.shape()[0], 1),
        2 => (v.shape()[0], v.shape()[1]),
        _ => return Err(ErrorKind::Rank),
    };
    let data: Result<Vec<f64>, ErrorKind> = (0..m * n).map(|i| v.cell(i).real(ctx.ct)).collect();
    Ok((m, n, data?))
}

/// Gauss-Jordan with partial pivoting; lhs is m×m, rhs m×cols
fn gauss_solve(
    m: usize,
    cols: usize,
    mut lhs: Vec<f64>,
    mut rhs: Vec<f64>,
) -> Result<Vec<f64>, ErrorKind> {
    for col in 0..m {
        // pivot
        let mut pivot = col;
        for row in col + 1..m {
            if lhs[row * m + col].abs() > lhs[pivot * m + col].abs() {
                pivot = row;
            }
        }
        if lhs[pivot * m + col].abs() < f64::EPSILON {
            return Err(ErrorKind::Domain); // singular
        }
        if pivot != col {
            for k in 0..m {
                lhs.swap(col * m + k, pivot * m + k);
            }
            for k in 0..cols {
                rhs.swap(col * cols + k, pivot * cols + k);
            }
        }
        let p = lhs[col * m + col];
        for k in 0..m {
            lhs[col * m + k] /= p;
        }
        for k in 0..cols {
            rhs[col * cols + k] /= p;
        }
        for row in 0..m {
            if row == col {
                continue;
            }
            let f = lhs[row * m + col];
            if f == 0.0 {
                continue;
            }
            for k in 0..m {
                lhs[row * m + k] -= f * lhs[col * m + k];
            }
            for k in 0..cols {
                rhs[row * cols + k] -= f * rhs[col * cols + k];
            }
        }
    }
    Ok(rhs)
}

// ----------------------------------------------------------------------
// ≡ ≢ ⊣ ⊢
// ----------------------------------------------------------------------

/// ≡B: depth
pub fn depth(b: &Value) -> Value {
    Value::int_scalar(b.depth())
}

/// A≡B: match
pub fn match_values(a: &Value, b: &Value, ctx: &Ctx) -> Value {
    Value::scalar(Cell::bool(Value::tolerantly_equal(a, b, ctx.ct)))
}

/// ≢B: tally of the first axis
pub fn tally(b: &Value) -> Value {
    let n = if b.rank() == 0 { 1 } else { b.shape()[0] };
    Value::int_scalar(n as i64)
}

/// A≢B: not-match
pub fn not_match(a: &Value, b: &Value, ctx: &Ctx) -> Value {
    Value::scalar(Cell::bool(!Value::tolerantly_equal(a, b, ctx.ct)))
}

/// Wrap a value (possibly nested) back into a cell for a ravel
pub fn enclose_cell(v: Value) -> Cell {
    if v.is_scalar() && v.is_simple() {
        v.ravel()[0].clone()
    } else {
        Cell::Pointer(Arc::new(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Ctx {
        Ctx::default()
    }

    fn matrix_2x3() -> Value {
        Value::new(
            Shape::new(vec![2, 3]).unwrap(),
            (1..=6).map(Cell::Int).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_reshape_cycles_and_truncates() {
        let b = Value::int_vector(&[1, 2, 3]);
        let z = reshape(&Value::int_vector(&[2, 4]), &b, &ctx()).unwrap();
        assert_eq!(
            z.ravel(),
            Value::int_vector(&[1, 2, 3, 1, 2, 3, 1, 2]).ravel()
        );
        let z = reshape(&Value::int_scalar(2), &b, &ctx()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[1, 2]).ravel());
    }

    #[test]
    fn test_reshape_empty_source_uses_prototype() {
        let z = reshape(&Value::int_vector(&[2, 2]), &Value::empty_char(), &ctx()).unwrap();
        assert_eq!(z.ravel()[0], Cell::Char(' '));
    }

    #[test]
    fn test_ravel_round_trip() {
        // ,(A⍴B) = (×/A)↑,B
        let b = Value::int_vector(&[1, 2, 3, 4, 5]);
        let reshaped = reshape(&Value::int_vector(&[2, 3]), &b, &ctx()).unwrap();
        let raveled = ravel(&reshaped);
        let taken = take(&Value::int_scalar(6), &b, &ctx()).unwrap();
        assert_eq!(raveled.ravel(), taken.ravel());
    }

    #[test]
    fn test_catenate_vectors() {
        let a = Value::char_vector("HELLO");
        let b = Value::char_vector(" ");
        let c = Value::char_vector("WORLD");
        let ab = catenate(&a, &b, None, false, &ctx()).unwrap();
        let abc = catenate(&ab, &c, None, false, &ctx()).unwrap();
        assert_eq!(abc.as_string().unwrap(), "HELLO WORLD");
        assert_eq!(abc.shape().items(), &[11]);
    }

    #[test]
    fn test_catenate_length() {
        // len(A,B along axis) = shape(A)[axis] + shape(B)[axis]
        let m = matrix_2x3();
        let z = catenate(&m, &m, None, true, &ctx()).unwrap();
        assert_eq!(z.shape().items(), &[4, 3]);
        let z = catenate(&m, &m, None, false, &ctx()).unwrap();
        assert_eq!(z.shape().items(), &[2, 6]);
    }

    #[test]
    fn test_catenate_scalar_extension() {
        let v = Value::int_vector(&[1, 2]);
        let z = catenate(&v, &Value::int_scalar(9), None, false, &ctx()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[1, 2, 9]).ravel());
    }

    #[test]
    fn test_take_negative_and_over() {
        let b = Value::int_vector(&[1, 2, 3]);
        let z = take(&Value::int_scalar(-2), &b, &ctx()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[2, 3]).ravel());
        let z = take(&Value::int_scalar(5), &b, &ctx()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[1, 2, 3, 0, 0]).ravel());
        let z = take(&Value::int_scalar(-5), &b, &ctx()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[0, 0, 1, 2, 3]).ravel());
    }

    #[test]
    fn test_take_zero_keeps_prototype() {
        let z = take(&Value::int_scalar(0), &Value::char_vector("xy"), &ctx()).unwrap();
        assert!(z.is_empty());
        assert_eq!(z.prototype_cell(), Cell::Char(' '));
    }

    #[test]
    fn test_drop_and_over_drop() {
        let b = Value::int_vector(&[1, 2, 3]);
        let z = drop(&Value::int_scalar(1), &b, &ctx()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[2, 3]).ravel());
        let z = drop(&Value::int_scalar(-2), &b, &ctx()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[1]).ravel());
        let z = drop(&Value::int_scalar(7), &b, &ctx()).unwrap();
        assert!(z.is_empty());
    }

    #[test]
    fn test_transpose_involution() {
        let m = matrix_2x3();
        let t = transpose_mon(&m).unwrap();
        assert_eq!(t.shape().items(), &[3, 2]);
        let tt = transpose_mon(&t).unwrap();
        assert_eq!(tt.ravel(), m.ravel());
    }

    #[test]
    fn test_transpose_diagonal() {
        // 1 1⍉M is the main diagonal
        let m = matrix_2x3();
        let z = transpose_dya(&Value::int_vector(&[1, 1]), &m, &ctx()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[1, 5]).ravel());
    }

    #[test]
    fn test_reverse_rows() {
        // ⌽ 2 3 ⍴ ⍳6 ⇒ 3 2 1 / 6 5 4
        let m = matrix_2x3();
        let z = reverse(&m, 1).unwrap();
        assert_eq!(
            z.ravel(),
            Value::int_vector(&[3, 2, 1, 6, 5, 4]).ravel()
        );
        let z = reverse(&m, 0).unwrap();
        assert_eq!(
            z.ravel(),
            Value::int_vector(&[4, 5, 6, 1, 2, 3]).ravel()
        );
    }

    #[test]
    fn test_rotate() {
        let v = Value::int_vector(&[1, 2, 3, 4, 5]);
        let z = rotate(&Value::int_scalar(2), &v, 0, &ctx()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[3, 4, 5, 1, 2]).ravel());
        let z = rotate(&Value::int_scalar(-1), &v, 0, &ctx()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[5, 1, 2, 3, 4]).ravel());
    }

    #[test]
    fn test_iota_and_empty() {
        let z = iota(&Value::int_scalar(5), &ctx()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[1, 2, 3, 4, 5]).ravel());
        let z = iota(&Value::int_scalar(0), &ctx()).unwrap();
        assert!(z.is_empty());
        assert_eq!(z.prototype_cell(), Cell::Int(0));
        let mut c = ctx();
        c.io = 0;
        let z = iota(&Value::int_scalar(3), &c).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[0, 1, 2]).ravel());
    }

    #[test]
    fn test_index_of() {
        let a = Value::char_vector("ABC");
        let b = Value::char_vector("CAB X");
        let z = index_of(&a, &b, &ctx()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[3, 1, 2, 4, 4]).ravel());
    }

    #[test]
    fn test_membership() {
        let a = Value::int_vector(&[1, 5, 2]);
        let b = Value::int_vector(&[2, 3, 4, 5]);
        let z = membership(&a, &b, &ctx()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[0, 1, 1]).ravel());
    }

    #[test]
    fn test_grade_stable() {
        let b = Value::int_vector(&[3, 1, 2, 1]);
        let up = grade(&b, true, &ctx()).unwrap();
        assert_eq!(up.ravel(), Value::int_vector(&[2, 4, 3, 1]).ravel());
        let down = grade(&b, false, &ctx()).unwrap();
        assert_eq!(down.ravel(), Value::int_vector(&[1, 3, 2, 4]).ravel());
    }

    #[test]
    fn test_bracket_index_matrix() {
        let m = matrix_2x3();
        // M[2;1 3]
        let z = bracket_index(
            &m,
            &[
                Some(Value::int_scalar(2)),
                Some(Value::int_vector(&[1, 3])),
            ],
            &ctx(),
        )
        .unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[4, 6]).ravel());
        // M[;2] (elided row slot)
        let z = bracket_index(&m, &[None, Some(Value::int_scalar(2))], &ctx()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[2, 5]).ravel());
    }

    #[test]
    fn test_bracket_index_bounds() {
        let v = Value::int_vector(&[1, 2, 3]);
        assert_eq!(
            bracket_index(&v, &[Some(Value::int_scalar(4))], &ctx()).unwrap_err(),
            ErrorKind::Index
        );
        assert_eq!(
            bracket_index(&v, &[Some(Value::int_scalar(0))], &ctx()).unwrap_err(),
            ErrorKind::Index
        );
    }

    #[test]
    fn test_bracket_index_assign() {
        let mut v = Value::int_vector(&[1, 2, 3]);
        bracket_index_assign(
            &mut v,
            &[Some(Value::int_vector(&[1, 3]))],
            &Value::int_vector(&[9, 8]),
            &ctx(),
        )
        .unwrap();
        assert_eq!(v.ravel(), Value::int_vector(&[9, 2, 8]).ravel());
    }

    #[test]
    fn test_squad() {
        let m = matrix_2x3();
        let z = squad_index(&Value::int_scalar(2), &m, &ctx()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[4, 5, 6]).ravel());
        let z = squad_index(&Value::int_vector(&[2, 3]), &m, &ctx()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[6]).ravel());
    }

    #[test]
    fn test_decode() {
        // 2⊥1 0 1 = 5
        let z = decode(&Value::int_scalar(2), &Value::int_vector(&[1, 0, 1]), &ctx()).unwrap();
        assert_eq!(z.ravel()[0], Cell::Int(5));
        // 24 60 60⊥1 2 3 = 3723
        let z = decode(
            &Value::int_vector(&[24, 60, 60]),
            &Value::int_vector(&[1, 2, 3]),
            &ctx(),
        )
        .unwrap();
        assert_eq!(z.ravel()[0], Cell::Int(3723));
    }

    #[test]
    fn test_encode() {
        // 24 60 60⊤3723 = 1 2 3
        let z = encode(
            &Value::int_vector(&[24, 60, 60]),
            &Value::int_scalar(3723),
            &ctx(),
        )
        .unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[1, 2, 3]).ravel());
        // 0 8⊤75 = 9 3
        let z = encode(&Value::int_vector(&[0, 8]), &Value::int_scalar(75), &ctx()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[9, 3]).ravel());
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let radix = Value::int_vector(&[16, 16, 16]);
        let n = Value::int_scalar(0xABC);
        let digits = encode(&radix, &n, &ctx()).unwrap();
        let back = decode(&radix, &digits, &ctx()).unwrap();
        assert_eq!(back.ravel()[0], Cell::Int(0xABC));
    }

    #[test]
    fn test_matrix_inverse() {
        let m = Value::new(
            Shape::new(vec![2, 2]).unwrap(),
            vec![Cell::Int(4), Cell::Int(7), Cell::Int(2), Cell::Int(6)],
        )
        .unwrap();
        let inv = matrix_inverse(&m, &ctx()).unwrap();
        // M +.× ⌹M = identity
        let check = |i: usize, expect: f64| match inv.ravel()[i] {
            Cell::Float(f) => assert!((f - expect).abs() < 1e-10),
            Cell::Int(n) => assert!((n as f64 - expect).abs() < 1e-10),
            _ => panic!("numeric expected"),
        };
        check(0, 0.6);
        check(1, -0.7);
        check(2, -0.2);
        check(3, 0.4);
    }

    #[test]
    fn test_without_and_sets() {
        let a = Value::int_vector(&[1, 2, 3, 4]);
        let b = Value::int_vector(&[2, 4]);
        assert_eq!(
            without(&a, &b, &ctx()).unwrap().ravel(),
            Value::int_vector(&[1, 3]).ravel()
        );
        assert_eq!(
            intersection(&a, &b, &ctx()).unwrap().ravel(),
            Value::int_vector(&[2, 4]).ravel()
        );
        assert_eq!(
            unique(&Value::int_vector(&[1, 1, 2, 1]), &ctx()).unwrap().ravel(),
            Value::int_vector(&[1, 2]).ravel()
        );
        assert_eq!(
            union(&Value::int_vector(&[1, 2]), &Value::int_vector(&[2, 3]), &ctx())
                .unwrap()
                .ravel(),
            Value::int_vector(&[1, 2, 3]).ravel()
        );
    }

    #[test]
    fn test_enlist() {
        let inner = Value::int_vector(&[2, 3]);
        let v = Value::vector(vec![
            Cell::Int(1),
            Cell::Pointer(Arc::new(inner)),
            Cell::Int(4),
        ]);
        let z = enlist(&v);
        assert_eq!(z.ravel(), Value::int_vector(&[1, 2, 3, 4]).ravel());
    }

    #[test]
    fn test_tally_and_depth() {
        let m = matrix_2x3();
        assert_eq!(tally(&m).ravel()[0], Cell::Int(2));
        assert_eq!(depth(&m).ravel()[0], Cell::Int(1));
        assert_eq!(depth(&Value::int_scalar(5)).ravel()[0], Cell::Int(0));
    }
}
