//! Primitive functions
//!
//! `scalar` holds the elementwise primitives and their dispatch (scalar
//! extension, nesting recursion, fill and identity semantics); `structural`
//! the shape-transforming primitives; `nested` enclose/disclose/pick;
//! `format` ⍕ and the value display used by the session.

pub mod format;
pub mod nested;
pub mod scalar;
pub mod structural;

use crate::sysvar::Ctx;
use apl_core::{ErrorKind, Value};

/// Resolve an axis argument (⎕IO-adjusted at the surface) to a 0-based
/// axis of a rank-`rank` value
pub fn resolve_axis(x: &Value, rank: usize, ctx: &Ctx) -> Result<usize, ErrorKind> {
    let n = x.to_int_scalar(ctx.ct).map_err(|_| ErrorKind::Axis)?;
    let axis = n - ctx.io;
    if axis < 0 || axis as usize >= rank {
        return Err(ErrorKind::Axis);
    }
    Ok(axis as usize)
}

/// Resolve an axis *set* (for dyadic scalar functions with axis and ⊂[X])
pub fn resolve_axis_set(x: &Value, rank: usize, ctx: &Ctx) -> Result<Vec<usize>, ErrorKind> {
    let mut axes = Vec::new();
    for n in x.as_int_vector(ctx.ct).map_err(|_| ErrorKind::Axis)? {
        let axis = n - ctx.io;
        if axis < 0 || axis as usize >= rank {
            return Err(ErrorKind::Axis);
        }
        let axis = axis as usize;
        if axes.contains(&axis) {
            return Err(ErrorKind::Axis);
        }
        axes.push(axis);
    }
    Ok(axes)
}
