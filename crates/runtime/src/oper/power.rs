//! Power (⍣)
//!
//! `F⍣N B` applies F N times (with a fixed left argument in the dyadic
//! case). A negative N applies the inverse of F |N| times — the set of
//! invertible primitives lives in the evaluator's inverse table. `F⍣G B`
//! iterates until the condition function G, applied to (new, old),
//! returns scalar 1.

use super::{DyaFn, MonFn};
use apl_core::{ErrorKind, Value};

/// F⍣N B (or A F⍣N B with F already closed over A); N ≥ 0
pub fn power_n(f: MonFn, n: u64, b: &Value) -> Result<Value, ErrorKind> {
    let mut cur = b.clone();
    for _ in 0..n {
        cur = f(&cur)?;
    }
    Ok(cur)
}

/// F⍣G B: iterate until `G(new, old)` is scalar 1
pub fn power_until(f: MonFn, g: DyaFn, b: &Value, ct: f64) -> Result<Value, ErrorKind> {
    let mut old = b.clone();
    // the standard caps nothing; the interrupt flag is the safety valve,
    // but a hard bound guards the primitive-only path
    for _ in 0..MAX_POWER_ITERATIONS {
        let new = f(&old)?;
        let done = g(&new, &old)?;
        let flag = done.to_int_scalar(ct).map_err(|_| ErrorKind::Domain)?;
        if flag == 1 {
            return Ok(new);
        }
        if flag != 0 {
            return Err(ErrorKind::Domain);
        }
        old = new;
    }
    Err(ErrorKind::Domain)
}

const MAX_POWER_ITERATIONS: u64 = 100_000_000;
