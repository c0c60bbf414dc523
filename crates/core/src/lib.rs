//! apl-core: the array model of the apl workspace
//!
//! Key design principles:
//! - Cell: the unit of a ravel (char, int, float, complex, nested pointer)
//! - Value: shape + dense ravel of inline cells; frozen after check_value
//! - Shape/Shape3: rank-bounded extents and the axis split used by every
//!   axis-parametric primitive

pub mod cell;
pub mod error;
pub mod num;
pub mod shape;
pub mod value;

pub use cell::{CdrClass, Cell};
pub use error::{AplError, ErrorKind, Result};
pub use shape::{MAX_RANK, Shape, Shape3};
pub use value::{Value, ValueFlags};

pub use num_complex::Complex64;
