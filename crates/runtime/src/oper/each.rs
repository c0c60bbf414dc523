//! Each (¨)
//!
//! Applies the operand to every element, wrapping non-pointer cells into
//! singleton values so the operand always sees a value. Dyadic each uses
//! the scalar-extension pairing rules.

use super::{DyaFn, MonFn, cell_to_value, value_to_cell};
use apl_core::{Cell, ErrorKind, Value};

/// F¨B
pub fn each_mon(f: MonFn, b: &Value) -> Result<Value, ErrorKind> {
    if b.is_empty() {
        // apply to the prototype to keep the result's element type honest
        let proto = cell_to_value(&b.prototype_cell());
        let z = f(&proto)?;
        return Ok(Value::empty_with_prototype(
            b.shape().clone(),
            value_to_cell(z.prototype_value()),
        ));
    }
    let mut cells = Vec::with_capacity(b.element_count());
    for i in 0..b.element_count() {
        let arg = cell_to_value(b.cell(i));
        cells.push(value_to_cell(f(&arg)?));
    }
    Value::new(b.shape().clone(), cells)
}

/// A F¨ B: scalar extension or matching shapes, as for scalar functions
pub fn each_dya(f: DyaFn, a: &Value, b: &Value) -> Result<Value, ErrorKind> {
    let (zshape, fix_a, fix_b) = if a.is_single() && !b.is_single() {
        (b.shape().clone(), true, false)
    } else if b.is_single() && !a.is_single() {
        (a.shape().clone(), false, true)
    } else if a.shape() == b.shape() {
        (a.shape().clone(), false, false)
    } else if a.rank() != b.rank() {
        return Err(ErrorKind::Rank);
    } else {
        return Err(ErrorKind::Length);
    };
    if zshape.is_empty() {
        return Ok(Value::empty_with_prototype(zshape, Cell::Int(0)));
    }
    let mut cells = Vec::with_capacity(zshape.element_count());
    for i in 0..zshape.element_count() {
        let ca = cell_to_value(if fix_a { a.first() } else { a.cell(i) });
        let cb = cell_to_value(if fix_b { b.first() } else { b.cell(i) });
        cells.push(value_to_cell(f(&ca, &cb)?));
    }
    Value::new(zshape, cells)
}
