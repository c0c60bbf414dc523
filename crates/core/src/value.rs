//! Values: shape plus dense ravel
//!
//! A `Value` owns a contiguous ravel of [`Cell`]s in row-major order. An
//! empty value (any shape extent zero) still stores one prototype cell at
//! ravel position 0 so that fill elements and element classes survive.
//!
//! Values are built cell-by-cell by primitives and frozen by
//! [`Value::check_value`], which validates the §-invariants (shape product,
//! rank bound, nesting closure) and derives the flags. After completion a
//! value is treated as immutable; sharing is by `Arc` and bound variables
//! are updated copy-on-write.

use crate::cell::{Cell, CdrClass};
use crate::error::ErrorKind;
use crate::shape::Shape;
use bitflags::bitflags;
use std::cmp::Ordering;
use std::sync::Arc;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ValueFlags: u32 {
        /// At least one pointer cell in the ravel
        const NESTED = 0b0001;
        /// check_value has run; shape and ravel are frozen
        const COMPLETE = 0b0010;
        /// Reached from the workspace root during the save walk
        const MARKED = 0b0100;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    shape: Shape,
    ravel: Vec<Cell>,
    flags: ValueFlags,
}

impl Value {
    /// Assemble a value from shape and ravel and freeze it
    pub fn new(shape: Shape, ravel: Vec<Cell>) -> Result<Value, ErrorKind> {
        Value {
            shape,
            ravel,
            flags: ValueFlags::empty(),
        }
        .check_value()
    }

    /// Validate invariants, derive flags, freeze.
    ///
    /// A short ravel for an empty value is topped up with the prototype;
    /// anything else inconsistent is a LENGTH error.
    pub fn check_value(mut self) -> Result<Value, ErrorKind> {
        if self.shape.rank() > crate::shape::MAX_RANK {
            return Err(ErrorKind::Rank);
        }
        if self.ravel.is_empty() && self.shape.is_empty() {
            self.ravel.push(Cell::Int(0));
        }
        if self.ravel.len() != self.shape.ravel_len() {
            return Err(ErrorKind::Length);
        }
        let nested = self.ravel.iter().any(Cell::is_pointer);
        self.flags = if nested {
            ValueFlags::NESTED | ValueFlags::COMPLETE
        } else {
            ValueFlags::COMPLETE
        };
        Ok(self)
    }

    pub fn scalar(cell: Cell) -> Value {
        Value {
            shape: Shape::scalar(),
            ravel: vec![cell],
            flags: ValueFlags::COMPLETE,
        }
        .refresh_nested()
    }

    pub fn vector(cells: Vec<Cell>) -> Value {
        let mut v = Value {
            shape: Shape::vector(cells.len()),
            ravel: cells,
            flags: ValueFlags::COMPLETE,
        };
        if v.ravel.is_empty() {
            v.ravel.push(Cell::Int(0));
        }
        v.refresh_nested()
    }

    fn refresh_nested(mut self) -> Value {
        if self.ravel.iter().any(Cell::is_pointer) {
            self.flags |= ValueFlags::NESTED;
        }
        self
    }

    pub fn char_vector(s: &str) -> Value {
        let cells: Vec<Cell> = s.chars().map(Cell::Char).collect();
        if cells.is_empty() {
            return Value::empty_char();
        }
        Value::vector(cells)
    }

    pub fn int_vector(items: &[i64]) -> Value {
        if items.is_empty() {
            return Value::empty_numeric();
        }
        Value::vector(items.iter().map(|&i| Cell::Int(i)).collect())
    }

    pub fn int_scalar(i: i64) -> Value {
        Value::scalar(Cell::Int(i))
    }

    /// ⍬: empty numeric vector, prototype 0
    pub fn empty_numeric() -> Value {
        Value {
            shape: Shape::vector(0),
            ravel: vec![Cell::Int(0)],
            flags: ValueFlags::COMPLETE,
        }
    }

    /// '': empty character vector, prototype space
    pub fn empty_char() -> Value {
        Value {
            shape: Shape::vector(0),
            ravel: vec![Cell::Char(' ')],
            flags: ValueFlags::COMPLETE,
        }
    }

    /// Empty value of the given shape carrying an explicit prototype
    pub fn empty_with_prototype(shape: Shape, proto: Cell) -> Value {
        debug_assert!(shape.is_empty());
        Value {
            shape,
            ravel: vec![proto],
            flags: ValueFlags::COMPLETE,
        }
        .refresh_nested()
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn element_count(&self) -> usize {
        self.shape.element_count()
    }

    pub fn is_empty(&self) -> bool {
        self.shape.is_empty()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_scalar()
    }

    pub fn is_vector(&self) -> bool {
        self.shape.rank() == 1
    }

    /// Scalar or one-element array of any rank (scalar-extension candidate)
    pub fn is_single(&self) -> bool {
        self.element_count() == 1
    }

    /// No pointer cells anywhere in the ravel
    pub fn is_simple(&self) -> bool {
        !self.flags.contains(ValueFlags::NESTED)
    }

    pub fn is_char_array(&self) -> bool {
        self.ravel.iter().all(Cell::is_character)
    }

    pub fn flags(&self) -> ValueFlags {
        self.flags
    }

    pub fn set_marked(&mut self, on: bool) {
        self.flags.set(ValueFlags::MARKED, on);
    }

    pub fn ravel(&self) -> &[Cell] {
        &self.ravel
    }

    pub fn ravel_mut(&mut self) -> &mut [Cell] {
        &mut self.ravel
    }

    /// Cell at ravel offset `i`; the prototype for empty values
    pub fn cell(&self, i: usize) -> &Cell {
        if self.ravel.len() == 1 {
            &self.ravel[0]
        } else {
            &self.ravel[i]
        }
    }

    pub fn first(&self) -> &Cell {
        &self.ravel[0]
    }

    /// The fill cell derived from ravel position 0
    pub fn prototype_cell(&self) -> Cell {
        self.ravel[0].prototype()
    }

    /// The prototype as a whole value: same shape, every cell prototyped
    pub fn prototype_value(&self) -> Value {
        Value {
            shape: self.shape.clone(),
            ravel: self.ravel.iter().map(Cell::prototype).collect(),
            flags: self.flags,
        }
    }

    /// Deep copy: pointer cells recursively cloned rather than shared
    pub fn deep_clone(&self) -> Value {
        Value {
            shape: self.shape.clone(),
            ravel: self
                .ravel
                .iter()
                .map(|c| match c {
                    Cell::Pointer(v) => Cell::Pointer(Arc::new(v.deep_clone())),
                    other => other.clone(),
                })
                .collect(),
            flags: self.flags,
        }
    }

    /// Nesting depth for ≡: 0 for a simple scalar, 1 for a simple array,
    /// 1 + max over items otherwise
    pub fn depth(&self) -> i64 {
        if self.is_simple() {
            return if self.is_scalar() { 0 } else { 1 };
        }
        let inner = self
            .ravel
            .iter()
            .map(|c| match c {
                Cell::Pointer(v) => v.depth(),
                _ => 0,
            })
            .max()
            .unwrap_or(0);
        1 + inner
    }

    // ------------------------------------------------------------------
    // conversions used by primitives
    // ------------------------------------------------------------------

    /// Require a single numeric element and return it as near-int
    pub fn to_int_scalar(&self, ct: f64) -> Result<i64, ErrorKind> {
        if !self.is_single() {
            return Err(if self.rank() > 1 {
                ErrorKind::Rank
            } else {
                ErrorKind::Length
            });
        }
        self.ravel[0].to_int(ct)
    }

    pub fn to_real_scalar(&self, ct: f64) -> Result<f64, ErrorKind> {
        if !self.is_single() {
            return Err(ErrorKind::Length);
        }
        self.ravel[0].real(ct)
    }

    /// Ravel as a vector of near-ints (rank ≤ 1 required)
    pub fn as_int_vector(&self, ct: f64) -> Result<Vec<i64>, ErrorKind> {
        if self.rank() > 1 {
            return Err(ErrorKind::Rank);
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }
        self.ravel.iter().map(|c| c.to_int(ct)).collect()
    }

    /// Interpret as a shape vector (non-negative items, rank bound)
    pub fn as_shape(&self, ct: f64) -> Result<Shape, ErrorKind> {
        let items = self.as_int_vector(ct)?;
        if items.iter().any(|&n| n < 0) {
            return Err(ErrorKind::Domain);
        }
        Shape::new(items.into_iter().map(|n| n as usize).collect())
    }

    /// The characters of a simple character array, in ravel order
    pub fn as_string(&self) -> Result<String, ErrorKind> {
        self.ravel
            .iter()
            .take(self.element_count().max(if self.is_scalar() { 1 } else { 0 }))
            .map(|c| match c {
                Cell::Char(ch) => Ok(*ch),
                _ => Err(ErrorKind::Domain),
            })
            .collect()
    }

    /// Overall CDR class: the widest cell class. Mixed character and
    /// numeric cells, or any pointer cell, force the nested record format.
    pub fn cdr_class(&self) -> CdrClass {
        fn is_char(c: CdrClass) -> bool {
            matches!(c, CdrClass::Char8 | CdrClass::Char32)
        }
        let cells: &[Cell] = if self.is_empty() {
            &self.ravel[..1]
        } else {
            &self.ravel
        };
        let mut iter = cells.iter().map(Cell::cdr_class);
        let mut class = iter.next().expect("ravel is never empty");
        for cc in iter {
            if class == CdrClass::Nested || cc == CdrClass::Nested || is_char(class) != is_char(cc)
            {
                return CdrClass::Nested;
            }
            class = class.max(cc);
        }
        class
    }

    // ------------------------------------------------------------------
    // whole-value comparison
    // ------------------------------------------------------------------

    /// ≡-style match: same shape, cell-wise tolerantly equal
    pub fn tolerantly_equal(a: &Value, b: &Value, ct: f64) -> bool {
        if a.shape != b.shape {
            return false;
        }
        if a.is_empty() {
            // empty values match when their prototypes match
            return a.ravel[0].equal(&b.ravel[0], ct);
        }
        a.ravel
            .iter()
            .zip(b.ravel.iter())
            .all(|(x, y)| x.equal(y, ct))
    }

    /// Lexicographic total order over ravel, then shape, for sorting
    pub fn total_cmp(a: &Value, b: &Value, ct: f64) -> Ordering {
        let n = a.element_count().min(b.element_count());
        for i in 0..n {
            let ord = a.ravel[i].total_cmp(&b.ravel[i], ct);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.element_count()
            .cmp(&b.element_count())
            .then_with(|| a.shape.items().cmp(b.shape.items()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ravel_length_invariant() {
        let v = Value::new(
            Shape::new(vec![2, 3]).unwrap(),
            vec![Cell::Int(0); 6],
        )
        .unwrap();
        assert_eq!(v.element_count(), 6);
        assert_eq!(v.ravel().len(), 6);

        // empty keeps one prototype cell
        let e = Value::new(Shape::new(vec![0, 3]).unwrap(), vec![Cell::Int(0)]).unwrap();
        assert_eq!(e.element_count(), 0);
        assert_eq!(e.ravel().len(), 1);
    }

    #[test]
    fn test_check_value_rejects_bad_ravel() {
        let r = Value::new(Shape::new(vec![2, 3]).unwrap(), vec![Cell::Int(0); 5]);
        assert_eq!(r.unwrap_err(), ErrorKind::Length);
    }

    #[test]
    fn test_nested_flag() {
        let inner = Arc::new(Value::int_vector(&[1, 2]));
        let v = Value::vector(vec![Cell::Pointer(inner), Cell::Int(3)]);
        assert!(!v.is_simple());
        assert!(v.flags().contains(ValueFlags::NESTED));
        assert_eq!(v.depth(), 2);
    }

    #[test]
    fn test_prototypes() {
        assert_eq!(Value::empty_numeric().prototype_cell(), Cell::Int(0));
        assert_eq!(Value::empty_char().prototype_cell(), Cell::Char(' '));

        let nested = Value::vector(vec![Cell::Pointer(Arc::new(Value::char_vector("ab")))]);
        match nested.prototype_cell() {
            Cell::Pointer(p) => {
                assert_eq!(p.ravel()[0], Cell::Char(' '));
                assert_eq!(p.ravel()[1], Cell::Char(' '));
            }
            other => panic!("expected pointer prototype, got {:?}", other),
        }
    }

    #[test]
    fn test_deep_clone_detaches() {
        let inner = Arc::new(Value::int_vector(&[1, 2]));
        let v = Value::vector(vec![Cell::Pointer(Arc::clone(&inner))]);
        let c = v.deep_clone();
        match (&v.ravel()[0], &c.ravel()[0]) {
            (Cell::Pointer(a), Cell::Pointer(b)) => {
                assert!(!Arc::ptr_eq(a, b));
                assert_eq!(a.ravel(), b.ravel());
            }
            _ => panic!("expected pointers"),
        }
    }

    #[test]
    fn test_match_and_order() {
        let a = Value::int_vector(&[1, 2, 3]);
        let b = Value::int_vector(&[1, 2, 3]);
        assert!(Value::tolerantly_equal(&a, &b, 1e-13));

        let m = Value::new(Shape::new(vec![3, 1]).unwrap(), vec![
            Cell::Int(1),
            Cell::Int(2),
            Cell::Int(3),
        ])
        .unwrap();
        assert!(!Value::tolerantly_equal(&a, &m, 1e-13));

        let c = Value::int_vector(&[1, 2, 4]);
        assert_eq!(Value::total_cmp(&a, &c, 1e-13), Ordering::Less);
    }

    #[test]
    fn test_as_shape() {
        let v = Value::int_vector(&[2, 3]);
        let s = v.as_shape(1e-13).unwrap();
        assert_eq!(s.items(), &[2, 3]);
        assert!(Value::int_vector(&[-1]).as_shape(1e-13).is_err());
    }

    #[test]
    fn test_cdr_class_widening() {
        assert_eq!(Value::int_vector(&[0, 1, 1]).cdr_class(), CdrClass::Bit);
        assert_eq!(Value::int_vector(&[0, 5]).cdr_class(), CdrClass::Int);
        assert_eq!(
            Value::vector(vec![Cell::Int(1), Cell::Float(0.5)]).cdr_class(),
            CdrClass::Float
        );
        assert_eq!(Value::char_vector("ab").cdr_class(), CdrClass::Char8);
    }
}
