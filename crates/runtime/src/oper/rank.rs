//! Rank (⍤)
//!
//! The operand y splits each argument's shape into a frame (leading axes)
//! and a chunk (trailing axes of the given rank). F is applied per chunk
//! pair over the common frame; chunk results are padded with take to the
//! axis-wise maximum shape, and the result shape is frame ⌢ chunk-result.

use super::{DyaFn, MonFn};
use crate::prim::nested::pad_to;
use crate::sysvar::Ctx;
use apl_core::{Cell, ErrorKind, Shape, Value};

/// The effective ranks from the 1-, 2- or 3-element operand vector:
/// (monadic, dyadic-left, dyadic-right)
pub fn split_ranks(y: &Value, ct: f64) -> Result<(i64, i64, i64), ErrorKind> {
    let items = y.as_int_vector(ct)?;
    match items.len() {
        1 => Ok((items[0], items[0], items[0])),
        2 => Ok((items[1], items[0], items[1])),
        3 => Ok((items[0], items[1], items[2])),
        _ => Err(ErrorKind::Length),
    }
}

/// Split a shape into (frame, chunk) where the chunk takes the trailing
/// `rank` axes (negative rank counts from the frame side)
fn frame_chunk(shape: &Shape, rank: i64) -> (Shape, Shape) {
    let r = shape.rank() as i64;
    let chunk_rank = if rank < 0 {
        (r + rank).max(0)
    } else {
        rank.min(r)
    } as usize;
    let cut = shape.rank() - chunk_rank;
    let frame = Shape::new(shape.items()[..cut].to_vec()).expect("rank decreases");
    let chunk = Shape::new(shape.items()[cut..].to_vec()).expect("rank decreases");
    (frame, chunk)
}

/// Decompose a value into its frame shape and the list of chunk values
/// (used by the evaluator's rank continuation)
pub fn chunks_of(b: &Value, rank: i64) -> Result<(Shape, Vec<Value>), ErrorKind> {
    let (frame, chunk) = frame_chunk(b.shape(), rank);
    let chunk_len = chunk.ravel_len();
    let frames = frame.element_count();
    let mut out = Vec::with_capacity(frames);
    for i in 0..frames {
        let cells: Vec<Cell> = (0..chunk_len)
            .map(|k| b.cell(i * chunk.element_count().max(1) + k).clone())
            .collect();
        out.push(Value::new(chunk.clone(), cells)?);
    }
    Ok((frame, out))
}

/// F⍤y B
pub fn rank_mon(f: MonFn, rank: i64, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    let (frame, chunk) = frame_chunk(b.shape(), rank);
    let chunk_len = chunk.ravel_len();
    let frames = frame.element_count();
    if frames == 0 {
        return Ok(Value::empty_with_prototype(frame, b.prototype_cell()));
    }
    let mut results = Vec::with_capacity(frames);
    for i in 0..frames {
        let cells: Vec<Cell> = (0..chunk_len)
            .map(|k| b.cell(i * chunk.element_count().max(1) + k).clone())
            .collect();
        let arg = Value::new(chunk.clone(), cells)?;
        results.push(f(&arg)?);
    }
    assemble(frame, results, ctx)
}

/// A F⍤y B: one-to-one over the common frame; an empty frame on one side
/// scalar-extends that argument
pub fn rank_dya(
    f: DyaFn,
    rank_a: i64,
    rank_b: i64,
    a: &Value,
    b: &Value,
    ctx: &Ctx,
) -> Result<Value, ErrorKind> {
    let (frame_a, chunk_a) = frame_chunk(a.shape(), rank_a);
    let (frame_b, chunk_b) = frame_chunk(b.shape(), rank_b);
    let frame = if frame_a.rank() == 0 {
        frame_b.clone()
    } else if frame_b.rank() == 0 {
        frame_a.clone()
    } else if frame_a == frame_b {
        frame_a.clone()
    } else {
        return Err(ErrorKind::Rank);
    };

    let frames = frame.element_count();
    if frames == 0 {
        return Ok(Value::empty_with_prototype(frame, b.prototype_cell()));
    }
    let ca_len = chunk_a.element_count().max(1);
    let cb_len = chunk_b.element_count().max(1);
    let mut results = Vec::with_capacity(frames);
    for i in 0..frames {
        let ia = if frame_a.rank() == 0 { 0 } else { i };
        let ib = if frame_b.rank() == 0 { 0 } else { i };
        let acells: Vec<Cell> = (0..chunk_a.ravel_len())
            .map(|k| a.cell(ia * ca_len + k).clone())
            .collect();
        let bcells: Vec<Cell> = (0..chunk_b.ravel_len())
            .map(|k| b.cell(ib * cb_len + k).clone())
            .collect();
        let va = Value::new(chunk_a.clone(), acells)?;
        let vb = Value::new(chunk_b.clone(), bcells)?;
        results.push(f(&va, &vb)?);
    }
    assemble(frame, results, ctx)
}

/// Frame ⌢ max-chunk-shape assembly with take-padding of short results;
/// also used by the rank continuation when the operand is user-defined
pub fn assemble_frames(frame: Shape, results: Vec<Value>, ctx: &Ctx) -> Result<Value, ErrorKind> {
    assemble(frame, results, ctx)
}

fn assemble(frame: Shape, results: Vec<Value>, ctx: &Ctx) -> Result<Value, ErrorKind> {
    let max_rank = results.iter().map(Value::rank).max().unwrap_or(0);
    let mut max_items = vec![0usize; max_rank];
    for r in &results {
        let pad = max_rank - r.rank();
        for (k, &extent) in r.shape().items().iter().enumerate() {
            max_items[pad + k] = max_items[pad + k].max(extent);
        }
        for slot in max_items.iter_mut().take(pad) {
            *slot = (*slot).max(1);
        }
    }
    let chunk_shape = Shape::new(max_items)?;
    let zshape = frame.catenated(&chunk_shape)?;
    let chunk_len = chunk_shape.element_count();
    let mut cells = Vec::with_capacity(zshape.ravel_len());
    for r in results {
        let padded = pad_to(&r, &chunk_shape, ctx)?;
        cells.extend_from_slice(&padded.ravel()[..chunk_len.max(1).min(padded.ravel().len())]);
    }
    if zshape.is_empty() {
        let proto = cells.first().map(Cell::prototype).unwrap_or(Cell::Int(0));
        return Ok(Value::empty_with_prototype(zshape, proto));
    }
    cells.truncate(zshape.element_count());
    Value::new(zshape, cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::ParallelConfig;
    use crate::prim::{scalar, structural};

    fn ctx() -> Ctx {
        Ctx::default()
    }

    #[test]
    fn test_rank_splits() {
        let y = Value::int_scalar(2);
        assert_eq!(split_ranks(&y, 1e-13).unwrap(), (2, 2, 2));
        let y = Value::int_vector(&[1, 2]);
        assert_eq!(split_ranks(&y, 1e-13).unwrap(), (2, 1, 2));
        let y = Value::int_vector(&[0, 1, 2]);
        assert_eq!(split_ranks(&y, 1e-13).unwrap(), (0, 1, 2));
    }

    #[test]
    fn test_rank_mon_rows() {
        // +/⍤1 over a matrix: sum per row
        let c = ctx();
        let par = ParallelConfig::default();
        let m = Value::new(
            Shape::new(vec![2, 3]).unwrap(),
            (1..=6).map(Cell::Int).collect(),
        )
        .unwrap();
        let f = move |v: &Value| {
            let plus = |x: &Value, y: &Value| scalar::eval_dyadic('+', x, y, &c, &par);
            crate::oper::reduce::reduce(&plus, Some(&Cell::Int(0)), v, 0)
        };
        let z = rank_mon(&f, 1, &m, &ctx()).unwrap();
        assert_eq!(z.shape().items(), &[2]);
        assert_eq!(z.ravel(), Value::int_vector(&[6, 15]).ravel());
    }

    #[test]
    fn test_rank_pads_uneven_chunks() {
        // ⍳⍤0 over 1 2 3: rows padded to length 3
        let c = ctx();
        let f = move |v: &Value| structural::iota(v, &c);
        let z = rank_mon(&f, 0, &Value::int_vector(&[1, 2, 3]), &ctx()).unwrap();
        assert_eq!(z.shape().items(), &[3, 3]);
        assert_eq!(
            z.ravel(),
            Value::int_vector(&[1, 0, 0, 1, 2, 0, 1, 2, 3]).ravel()
        );
    }

    #[test]
    fn test_rank_dya_frames() {
        // rows of M plus vector V, chunk ranks 1 1
        let c = ctx();
        let par = ParallelConfig::default();
        let m = Value::new(
            Shape::new(vec![2, 3]).unwrap(),
            (1..=6).map(Cell::Int).collect(),
        )
        .unwrap();
        let v = Value::int_vector(&[10, 20, 30]);
        let f = move |x: &Value, y: &Value| scalar::eval_dyadic('+', x, y, &c, &par);
        let z = rank_dya(&f, 1, 1, &m, &v, &ctx()).unwrap();
        assert_eq!(z.shape().items(), &[2, 3]);
        assert_eq!(
            z.ravel(),
            Value::int_vector(&[11, 22, 33, 14, 25, 36]).ravel()
        );
    }
}
