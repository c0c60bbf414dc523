//! Operators (higher-order functions)
//!
//! Each operator has a synchronous path used when its operand tree is
//! primitive: the operand arrives as a value-level closure. When an operand
//! is a user-defined function the evaluator drives the same traversal
//! through an EOC continuation instead (see `eval::eoc`).

pub mod each;
pub mod power;
pub mod product;
pub mod rank;
pub mod reduce;
pub mod scan;

use apl_core::{Cell, ErrorKind, Value};

/// Monadic operand: a value-level function
pub type MonFn<'a> = &'a dyn Fn(&Value) -> Result<Value, ErrorKind>;
/// Dyadic operand
pub type DyaFn<'a> = &'a dyn Fn(&Value, &Value) -> Result<Value, ErrorKind>;

/// A ravel cell as a standalone value (pointer cells unwrap)
pub fn cell_to_value(c: &Cell) -> Value {
    match c {
        Cell::Pointer(v) => (**v).clone(),
        other => Value::scalar(other.clone()),
    }
}

/// A value as a ravel cell (simple scalars stay inline)
pub fn value_to_cell(v: Value) -> Cell {
    crate::prim::structural::enclose_cell(v)
}
