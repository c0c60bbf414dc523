//! Nesting primitives: ⊂ ⊃
//!
//! Enclose wraps a value into a pointer cell; `⊂[X]B` encloses along an
//! axis set, producing a nested value whose inner shape is the X-axes.
//! Disclose (mix) pads element shapes with the prototype; pick descends a
//! path of indices through nesting levels.

use crate::prim::structural::enclose_cell;
use crate::sysvar::Ctx;
use apl_core::{Cell, ErrorKind, Shape, Value};
use std::sync::Arc;

/// ⊂B: enclose. A simple scalar encloses to itself.
pub fn enclose(b: &Value) -> Value {
    if b.is_scalar() && b.is_simple() {
        return b.clone();
    }
    Value::scalar(Cell::Pointer(Arc::new(b.clone())))
}

/// ⊂[X]B: enclose along the axis set X. The outer shape keeps the axes
/// not in X; each element is the sub-array over the X-axes.
pub fn enclose_axes(b: &Value, axes: &[usize]) -> Result<Value, ErrorKind> {
    if axes.is_empty() {
        return Ok(enclose(b));
    }
    for &ax in axes {
        if ax >= b.rank() {
            return Err(ErrorKind::Axis);
        }
    }
    let outer_axes: Vec<usize> = (0..b.rank()).filter(|ax| !axes.contains(ax)).collect();
    let outer_shape = Shape::new(outer_axes.iter().map(|&ax| b.shape()[ax]).collect())?;
    let inner_shape = Shape::new(axes.iter().map(|&ax| b.shape()[ax]).collect())?;

    if outer_shape.is_empty() {
        let proto_inner = Value::empty_with_prototype(
            inner_shape.clone(),
            b.prototype_cell(),
        );
        return Ok(Value::empty_with_prototype(
            outer_shape,
            Cell::Pointer(Arc::new(proto_inner)),
        ));
    }

    let mut cells = Vec::with_capacity(outer_shape.ravel_len());
    let mut oix = vec![0usize; outer_shape.rank()];
    loop {
        // gather the inner sub-array at this outer position
        let mut inner_cells = Vec::with_capacity(inner_shape.ravel_len());
        let mut iix = vec![0usize; inner_shape.rank()];
        loop {
            let mut bix = vec![0usize; b.rank()];
            for (k, &ax) in outer_axes.iter().enumerate() {
                bix[ax] = oix[k];
            }
            for (k, &ax) in axes.iter().enumerate() {
                bix[ax] = iix[k];
            }
            inner_cells.push(b.cell(b.shape().offset_of(&bix)).clone());
            if !inner_shape.increment(&mut iix) {
                break;
            }
        }
        let inner = Value::new(inner_shape.clone(), inner_cells)?;
        cells.push(enclose_cell(inner));
        if !outer_shape.increment(&mut oix) {
            break;
        }
    }
    Value::new(outer_shape, cells)
}

/// A⊂B: partitioned enclose along the last axis. A is a vector of
/// non-negative integers; a positive value starts a new partition, zero
/// drops the element.
pub fn partition(a: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    if b.rank() > 1 {
        return Err(ErrorKind::Rank);
    }
    let marks = a.as_int_vector(ctx.ct)?;
    let n = b.element_count();
    let marks: Vec<i64> = if marks.len() == 1 {
        vec![marks[0]; n]
    } else {
        marks
    };
    if marks.len() != n {
        return Err(ErrorKind::Length);
    }
    if marks.iter().any(|&m| m < 0) {
        return Err(ErrorKind::Domain);
    }
    let mut groups: Vec<Vec<Cell>> = Vec::new();
    let mut prev = 0i64;
    for (i, &m) in marks.iter().enumerate() {
        if m == 0 {
            prev = 0;
            continue;
        }
        if m > prev || groups.is_empty() {
            groups.push(Vec::new());
        }
        groups.last_mut().expect("group started").push(b.cell(i).clone());
        prev = m;
    }
    if groups.is_empty() {
        return Ok(Value::empty_with_prototype(
            Shape::vector(0),
            Cell::Pointer(Arc::new(Value::empty_with_prototype(
                Shape::vector(0),
                b.prototype_cell(),
            ))),
        ));
    }
    let cells: Vec<Cell> = groups
        .into_iter()
        .map(|g| Cell::Pointer(Arc::new(Value::vector(g))))
        .collect();
    Ok(Value::vector(cells))
}

/// ⊃B: disclose (mix). Element shapes are unified by padding with each
/// element's prototype; the result shape is the outer shape followed by
/// the common inner shape.
pub fn disclose(b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    // a simple value discloses to itself
    if b.is_simple() {
        return Ok(b.clone());
    }
    if b.is_scalar() {
        if let Cell::Pointer(v) = b.first() {
            return Ok((**v).clone());
        }
    }

    // common inner shape: axis-wise maximum over all elements
    let mut inner_rank = 0usize;
    for i in 0..b.element_count() {
        if let Cell::Pointer(v) = b.cell(i) {
            inner_rank = inner_rank.max(v.rank());
        }
    }
    let mut inner_items = vec![0usize; inner_rank];
    for i in 0..b.element_count() {
        let item_shape = match b.cell(i) {
            Cell::Pointer(v) => v.shape().clone(),
            _ => Shape::scalar(),
        };
        // low-rank items align to the trailing axes
        let pad = inner_rank - item_shape.rank();
        for (k, &extent) in item_shape.items().iter().enumerate() {
            inner_items[pad + k] = inner_items[pad + k].max(extent);
        }
        for slot in inner_items.iter_mut().take(pad) {
            *slot = (*slot).max(1);
        }
    }
    let inner_shape = Shape::new(inner_items)?;
    let zshape = b.shape().catenated(&inner_shape)?;
    if zshape.is_empty() {
        return Ok(Value::empty_with_prototype(zshape, b.prototype_cell()));
    }

    let inner_len = inner_shape.element_count();
    let mut cells = Vec::with_capacity(zshape.element_count());
    for i in 0..b.element_count() {
        let item: Value = match b.cell(i) {
            Cell::Pointer(v) => (**v).clone(),
            c => Value::scalar(c.clone()),
        };
        // pad the item into the common inner shape with its prototype
        let padded = pad_to(&item, &inner_shape, ctx)?;
        cells.extend_from_slice(&padded.ravel()[..inner_len]);
    }
    Value::new(zshape, cells)
}

/// Pad a value to a target shape (aligned to the leading corner) with
/// its prototype — the take-style fill used by disclose and rank
pub fn pad_to(v: &Value, target: &Shape, _ctx: &Ctx) -> Result<Value, ErrorKind> {
    // conform rank by prefixing length-1 axes
    let mut shaped = v.clone();
    if shaped.rank() < target.rank() {
        let mut items = vec![1usize; target.rank() - shaped.rank()];
        items.extend_from_slice(shaped.shape().items());
        shaped = Value::new(Shape::new(items)?, shaped.ravel().to_vec())?;
    } else if shaped.rank() > target.rank() {
        return Err(ErrorKind::Rank);
    }
    if shaped.shape() == target {
        return Ok(shaped);
    }
    let proto = shaped.prototype_cell();
    if target.is_empty() {
        return Ok(Value::empty_with_prototype(target.clone(), proto));
    }
    let mut cells = Vec::with_capacity(target.element_count());
    let mut ix = vec![0usize; target.rank()];
    loop {
        let in_range = ix
            .iter()
            .enumerate()
            .all(|(ax, &i)| i < shaped.shape()[ax]);
        if in_range {
            cells.push(shaped.cell(shaped.shape().offset_of(&ix)).clone());
        } else {
            cells.push(proto.clone());
        }
        if !target.increment(&mut ix) {
            break;
        }
    }
    Value::new(target.clone(), cells)
}

/// A⊃B: pick. A is a scalar index or a vector whose elements are indices
/// (scalars, or enclosed vectors for multi-axis levels); each element
/// descends one nesting level.
pub fn pick(a: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    let mut cur: Value = b.clone();
    let path_len = a.element_count();
    for step in 0..path_len {
        let sel = a.cell(step);
        let indices: Vec<i64> = match sel {
            Cell::Pointer(v) => v.as_int_vector(ctx.ct)?,
            c => vec![c.to_int(ctx.ct)?],
        };
        if indices.len() != cur.rank().max(1) {
            return Err(ErrorKind::Rank);
        }
        let mut bix = Vec::with_capacity(indices.len());
        for (ax, &n) in indices.iter().enumerate() {
            let i = n - ctx.io;
            let extent = if cur.rank() == 0 { 1 } else { cur.shape()[ax] };
            if i < 0 || i as usize >= extent {
                return Err(ErrorKind::Index);
            }
            bix.push(i as usize);
        }
        let off = if cur.rank() == 0 {
            0
        } else {
            cur.shape().offset_of(&bix)
        };
        cur = match cur.cell(off) {
            Cell::Pointer(v) => (**v).clone(),
            c => Value::scalar(c.clone()),
        };
    }
    Ok(cur)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Ctx {
        Ctx::default()
    }

    #[test]
    fn test_enclose_scalar_is_identity() {
        let s = Value::int_scalar(5);
        assert!(Value::tolerantly_equal(&enclose(&s), &s, 0.0));
    }

    #[test]
    fn test_pick_enclose_round_trip() {
        // ⊃⊂V = V
        let v = Value::int_vector(&[1, 2, 3]);
        let enc = enclose(&v);
        let dis = disclose(&enc, &ctx()).unwrap();
        assert!(Value::tolerantly_equal(&dis, &v, 0.0));
    }

    #[test]
    fn test_disclose_pads_with_prototype() {
        let a = Value::int_vector(&[1, 2, 3]);
        let b = Value::int_vector(&[4, 5]);
        let nested = Value::vector(vec![
            Cell::Pointer(Arc::new(a)),
            Cell::Pointer(Arc::new(b)),
        ]);
        let z = disclose(&nested, &ctx()).unwrap();
        assert_eq!(z.shape().items(), &[2, 3]);
        assert_eq!(
            z.ravel(),
            Value::int_vector(&[1, 2, 3, 4, 5, 0]).ravel()
        );
    }

    #[test]
    fn test_enclose_axes() {
        let m = Value::new(
            Shape::new(vec![2, 3]).unwrap(),
            (1..=6).map(Cell::Int).collect(),
        )
        .unwrap();
        // ⊂[2]M: two enclosed rows
        let z = enclose_axes(&m, &[1]).unwrap();
        assert_eq!(z.shape().items(), &[2]);
        match &z.ravel()[0] {
            Cell::Pointer(v) => {
                assert_eq!(v.ravel(), Value::int_vector(&[1, 2, 3]).ravel())
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_partition() {
        // 1 1 2 2⊂'ABCD' → ('AB')('CD')
        let z = partition(
            &Value::int_vector(&[1, 1, 2, 2]),
            &Value::char_vector("ABCD"),
            &ctx(),
        )
        .unwrap();
        assert_eq!(z.element_count(), 2);
        match (&z.ravel()[0], &z.ravel()[1]) {
            (Cell::Pointer(x), Cell::Pointer(y)) => {
                assert_eq!(x.as_string().unwrap(), "AB");
                assert_eq!(y.as_string().unwrap(), "CD");
            }
            _ => panic!("expected two partitions"),
        }
    }

    #[test]
    fn test_partition_zero_drops() {
        let z = partition(
            &Value::int_vector(&[1, 0, 1]),
            &Value::char_vector("AXB"),
            &ctx(),
        )
        .unwrap();
        assert_eq!(z.element_count(), 2);
        match &z.ravel()[1] {
            Cell::Pointer(v) => assert_eq!(v.as_string().unwrap(), "B"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_pick_path() {
        let inner = Value::int_vector(&[10, 20]);
        let outer = Value::vector(vec![
            Cell::Pointer(Arc::new(inner)),
            Cell::Int(3),
        ]);
        // 1⊃B picks the nested vector, (1 2)-path picks 20
        let z = pick(&Value::int_scalar(1), &outer, &ctx()).unwrap();
        assert_eq!(z.ravel(), Value::int_vector(&[10, 20]).ravel());
        let path = Value::int_vector(&[1, 2]);
        let z = pick(&path, &outer, &ctx()).unwrap();
        assert_eq!(z.ravel()[0], Cell::Int(20));
    }

    #[test]
    fn test_pick_out_of_range() {
        let v = Value::int_vector(&[1, 2]);
        assert_eq!(
            pick(&Value::int_scalar(3), &v, &ctx()).unwrap_err(),
            ErrorKind::Index
        );
    }
}
