//! The cell: unit of a ravel
//!
//! A cell is exactly one of character, 64-bit integer, IEEE double, complex,
//! or an owning pointer to a nested [`Value`](crate::value::Value). Cells
//! are stored inline in a value's ravel — a dense array of fixed-size
//! tagged cells, never a vector of heap pointers.
//!
//! All scalar arithmetic and comparison lives here as methods on `Cell`,
//! returning `Result<Cell, ErrorKind>`. Type promotion follows the
//! hierarchy int < float < complex; integer results that would exceed ±2⁵³
//! overflow to float. Comparison tolerance (⎕CT) is passed in by the
//! dispatcher.

use crate::error::ErrorKind;
use crate::num::{
    self, FACTORIALS, LARGE_INT, SMALL_INT, cpx_gcd, flt_gcd, int_gcd, near_int,
    tolerantly_equal,
};
use crate::value::Value;
use num_complex::Complex64;
use num_traits::Zero;
use std::cmp::Ordering;
use std::sync::Arc;

/// Smallest wire container for a cell, used by the CDR codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CdrClass {
    /// 0 or 1
    Bit,
    /// Integer that fits a 4-byte signed container
    Int,
    /// Anything needing an 8-byte float
    Float,
    /// Two 8-byte floats
    Complex,
    /// Character below U+0100
    Char8,
    /// Any other code point
    Char32,
    /// Pointer cell: forces the nested record format
    Nested,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Char(char),
    Int(i64),
    Float(f64),
    Complex(Complex64),
    Pointer(Arc<Value>),
}

/// A numeric cell value promoted to a common representation
enum Num {
    I(i64),
    F(f64),
    C(Complex64),
}

/// A pair of numeric cells promoted to their common type
enum NumPair {
    I(i64, i64),
    F(f64, f64),
    C(Complex64, Complex64),
}

fn pair(a: &Cell, b: &Cell) -> Result<NumPair, ErrorKind> {
    match (a.num()?, b.num()?) {
        (Num::I(x), Num::I(y)) => Ok(NumPair::I(x, y)),
        (Num::C(x), y) => Ok(NumPair::C(x, to_c(y))),
        (x, Num::C(y)) => Ok(NumPair::C(to_c(x), y)),
        (x, y) => Ok(NumPair::F(to_f(x), to_f(y))),
    }
}

fn to_f(n: Num) -> f64 {
    match n {
        Num::I(i) => i as f64,
        Num::F(f) => f,
        Num::C(_) => unreachable!("complex handled before float demotion"),
    }
}

fn to_c(n: Num) -> Complex64 {
    match n {
        Num::I(i) => Complex64::new(i as f64, 0.0),
        Num::F(f) => Complex64::new(f, 0.0),
        Num::C(z) => z,
    }
}

/// Build a result cell from a complex number, demoting a zero imaginary
/// part back to float
fn from_c(z: Complex64) -> Cell {
    if z.im.is_zero() {
        Cell::Float(z.re)
    } else {
        Cell::Complex(z)
    }
}

/// Build a result cell from an exact i128, overflowing to float past ±2⁵³
fn from_i128(n: i128) -> Cell {
    if n > LARGE_INT as i128 || n < SMALL_INT as i128 {
        Cell::Float(n as f64)
    } else {
        Cell::Int(n as i64)
    }
}

impl Cell {
    pub fn zero() -> Cell {
        Cell::Int(0)
    }

    pub fn one() -> Cell {
        Cell::Int(1)
    }

    pub fn space() -> Cell {
        Cell::Char(' ')
    }

    pub fn bool(b: bool) -> Cell {
        Cell::Int(if b { 1 } else { 0 })
    }

    pub fn is_character(&self) -> bool {
        matches!(self, Cell::Char(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Cell::Pointer(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Cell::Int(_) | Cell::Float(_) | Cell::Complex(_))
    }

    /// Promote this cell to a bare number; DOMAIN for characters and
    /// pointers (the dispatcher unwraps pointers before cell arithmetic)
    fn num(&self) -> Result<Num, ErrorKind> {
        match self {
            Cell::Int(i) => Ok(Num::I(*i)),
            Cell::Float(f) => Ok(Num::F(*f)),
            Cell::Complex(z) => Ok(Num::C(*z)),
            Cell::Char(_) | Cell::Pointer(_) => Err(ErrorKind::Domain),
        }
    }

    /// Real part of a numeric cell; DOMAIN for non-real complex
    pub fn real(&self, ct: f64) -> Result<f64, ErrorKind> {
        match self.num()? {
            Num::I(i) => Ok(i as f64),
            Num::F(f) => Ok(f),
            Num::C(z) if num::is_near_zero(z.im, ct) => Ok(z.re),
            Num::C(_) => Err(ErrorKind::Domain),
        }
    }

    pub fn complex(&self) -> Result<Complex64, ErrorKind> {
        Ok(to_c(self.num()?))
    }

    /// The integer this cell is ⎕CT-near to, or DOMAIN
    pub fn to_int(&self, ct: f64) -> Result<i64, ErrorKind> {
        match self.num()? {
            Num::I(i) => Ok(i),
            Num::F(f) => near_int(f, ct).ok_or(ErrorKind::Domain),
            Num::C(z) if num::is_near_zero(z.im, ct) => {
                near_int(z.re, ct).ok_or(ErrorKind::Domain)
            }
            Num::C(_) => Err(ErrorKind::Domain),
        }
    }

    pub fn to_bool(&self, ct: f64) -> Result<bool, ErrorKind> {
        match self.to_int(ct)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ErrorKind::Domain),
        }
    }

    pub fn is_near_zero(&self, ct: f64) -> bool {
        match self {
            Cell::Int(i) => *i == 0,
            Cell::Float(f) => num::is_near_zero(*f, ct),
            Cell::Complex(z) => num::is_near_zero(z.re, ct) && num::is_near_zero(z.im, ct),
            _ => false,
        }
    }

    pub fn is_near_int(&self, ct: f64) -> bool {
        self.to_int(ct).is_ok()
    }

    pub fn is_near_real(&self, ct: f64) -> bool {
        match self {
            Cell::Int(_) | Cell::Float(_) => true,
            Cell::Complex(z) => num::is_near_zero(z.im, ct),
            _ => false,
        }
    }

    /// The canonical fill element: space for characters, 0 for numbers,
    /// recursively the prototype of the referenced value for pointers
    pub fn prototype(&self) -> Cell {
        match self {
            Cell::Char(_) => Cell::Char(' '),
            Cell::Int(_) | Cell::Float(_) | Cell::Complex(_) => Cell::Int(0),
            Cell::Pointer(v) => Cell::Pointer(Arc::new(v.prototype_value())),
        }
    }

    /// Smallest wire container for the CDR codec
    pub fn cdr_class(&self) -> CdrClass {
        match self {
            Cell::Int(0) | Cell::Int(1) => CdrClass::Bit,
            Cell::Int(i) if *i >= i32::MIN as i64 && *i <= i32::MAX as i64 => CdrClass::Int,
            Cell::Int(_) | Cell::Float(_) => CdrClass::Float,
            Cell::Complex(_) => CdrClass::Complex,
            Cell::Char(c) if (*c as u32) < 0x100 => CdrClass::Char8,
            Cell::Char(_) => CdrClass::Char32,
            Cell::Pointer(_) => CdrClass::Nested,
        }
    }

    // ------------------------------------------------------------------
    // monadic scalar functions
    // ------------------------------------------------------------------

    pub fn conjugate(&self) -> Result<Cell, ErrorKind> {
        match self.num()? {
            Num::I(i) => Ok(Cell::Int(i)),
            Num::F(f) => Ok(Cell::Float(f)),
            Num::C(z) => Ok(Cell::Complex(z.conj())),
        }
    }

    pub fn negative(&self) -> Result<Cell, ErrorKind> {
        match self.num()? {
            Num::I(i) => Ok(from_i128(-(i as i128))),
            Num::F(f) => Ok(Cell::Float(-f)),
            Num::C(z) => Ok(Cell::Complex(-z)),
        }
    }

    /// ×B: signum, or B÷|B| for complex
    pub fn direction(&self) -> Result<Cell, ErrorKind> {
        match self.num()? {
            Num::I(i) => Ok(Cell::Int(i.signum())),
            Num::F(f) => Ok(Cell::Int(if f > 0.0 {
                1
            } else if f < 0.0 {
                -1
            } else {
                0
            })),
            Num::C(z) => {
                let n = z.norm();
                if n == 0.0 {
                    Ok(Cell::Int(0))
                } else {
                    Ok(from_c(z / n))
                }
            }
        }
    }

    pub fn reciprocal(&self, ct: f64) -> Result<Cell, ErrorKind> {
        Cell::Int(1).divide(self, ct)
    }

    pub fn magnitude(&self) -> Result<Cell, ErrorKind> {
        match self.num()? {
            Num::I(i) => Ok(from_i128((i as i128).abs())),
            Num::F(f) => Ok(Cell::Float(f.abs())),
            Num::C(z) => Ok(Cell::Float(z.norm())),
        }
    }

    pub fn exponential(&self) -> Result<Cell, ErrorKind> {
        match self.num()? {
            Num::C(z) => Ok(from_c(z.exp())),
            n => Ok(Cell::Float(to_f(n).exp())),
        }
    }

    pub fn nat_log(&self) -> Result<Cell, ErrorKind> {
        match self.num()? {
            Num::C(z) => {
                if z.re == 0.0 && z.im == 0.0 {
                    return Err(ErrorKind::Domain);
                }
                Ok(from_c(z.ln()))
            }
            n => {
                let f = to_f(n);
                if f == 0.0 {
                    Err(ErrorKind::Domain)
                } else if f < 0.0 {
                    Ok(from_c(Complex64::new(f, 0.0).ln()))
                } else {
                    Ok(Cell::Float(f.ln()))
                }
            }
        }
    }

    /// ⌊B with ⎕CT-tolerant rounding; complex floors both components
    pub fn floor(&self, ct: f64) -> Result<Cell, ErrorKind> {
        match self.num()? {
            Num::I(i) => Ok(Cell::Int(i)),
            Num::F(f) => match near_int(f, ct) {
                Some(i) => Ok(Cell::Int(i)),
                None => {
                    let fl = f.floor();
                    if fl.abs() <= LARGE_INT as f64 {
                        Ok(Cell::Int(fl as i64))
                    } else {
                        Ok(Cell::Float(fl))
                    }
                }
            },
            Num::C(z) => Ok(from_c(Complex64::new(z.re.floor(), z.im.floor()))),
        }
    }

    pub fn ceiling(&self, ct: f64) -> Result<Cell, ErrorKind> {
        let neg = self.negative()?;
        neg.floor(ct)?.negative()
    }

    /// ○B: π×B
    pub fn pi_times(&self) -> Result<Cell, ErrorKind> {
        match self.num()? {
            Num::C(z) => Ok(from_c(z * std::f64::consts::PI)),
            n => Ok(Cell::Float(to_f(n) * std::f64::consts::PI)),
        }
    }

    /// ~B on a near-boolean
    pub fn not(&self, ct: f64) -> Result<Cell, ErrorKind> {
        Ok(Cell::bool(!self.to_bool(ct)?))
    }

    /// !B: factorial / gamma
    pub fn factorial(&self, ct: f64) -> Result<Cell, ErrorKind> {
        match self.num()? {
            Num::C(z) if !num::is_near_zero(z.im, ct) => {
                Ok(from_c(num::cgamma(z + 1.0)))
            }
            n => {
                let x = match n {
                    Num::I(i) => i as f64,
                    Num::F(f) => f,
                    Num::C(z) => z.re,
                };
                if let Some(i) = near_int(x, ct) {
                    if i < 0 {
                        return Err(ErrorKind::Domain);
                    }
                    if i <= 20 {
                        return Ok(Cell::Int(FACTORIALS[i as usize]));
                    }
                    if i <= 170 {
                        return Ok(Cell::Float(num::gamma(i as f64 + 1.0)));
                    }
                    return Err(ErrorKind::Domain);
                }
                let g = num::gamma(x + 1.0);
                if g.is_finite() {
                    Ok(Cell::Float(g))
                } else {
                    Err(ErrorKind::Domain)
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // dyadic scalar functions (self is the left argument A)
    // ------------------------------------------------------------------

    pub fn add(&self, b: &Cell) -> Result<Cell, ErrorKind> {
        match pair(self, b)? {
            NumPair::I(x, y) => Ok(from_i128(x as i128 + y as i128)),
            NumPair::F(x, y) => Ok(Cell::Float(x + y)),
            NumPair::C(x, y) => Ok(from_c(x + y)),
        }
    }

    pub fn subtract(&self, b: &Cell) -> Result<Cell, ErrorKind> {
        match pair(self, b)? {
            NumPair::I(x, y) => Ok(from_i128(x as i128 - y as i128)),
            NumPair::F(x, y) => Ok(Cell::Float(x - y)),
            NumPair::C(x, y) => Ok(from_c(x - y)),
        }
    }

    pub fn multiply(&self, b: &Cell) -> Result<Cell, ErrorKind> {
        match pair(self, b)? {
            NumPair::I(x, y) => Ok(from_i128(x as i128 * y as i128)),
            NumPair::F(x, y) => Ok(Cell::Float(x * y)),
            NumPair::C(x, y) => Ok(from_c(x * y)),
        }
    }

    /// A÷B with the APL convention 0÷0 = 1
    pub fn divide(&self, b: &Cell, ct: f64) -> Result<Cell, ErrorKind> {
        match pair(self, b)? {
            NumPair::I(x, y) => {
                if y == 0 {
                    return if x == 0 {
                        Ok(Cell::Int(1))
                    } else {
                        Err(ErrorKind::Domain)
                    };
                }
                if x % y == 0 {
                    Ok(Cell::Int(x / y))
                } else {
                    Ok(Cell::Float(x as f64 / y as f64))
                }
            }
            NumPair::F(x, y) => {
                if num::is_near_zero(y, ct) {
                    return if num::is_near_zero(x, ct) {
                        Ok(Cell::Int(1))
                    } else {
                        Err(ErrorKind::Domain)
                    };
                }
                Ok(Cell::Float(x / y))
            }
            NumPair::C(x, y) => {
                if y.re == 0.0 && y.im == 0.0 {
                    return if x.re == 0.0 && x.im == 0.0 {
                        Ok(Cell::Int(1))
                    } else {
                        Err(ErrorKind::Domain)
                    };
                }
                Ok(from_c(x / y))
            }
        }
    }

    /// A⋆B. Integer exponents use repeated squaring with overflow check;
    /// a negative exponent inverts afterwards.
    pub fn power(&self, b: &Cell, ct: f64) -> Result<Cell, ErrorKind> {
        if let Ok(exp) = b.to_int(ct) {
            return self.power_int(exp);
        }
        match pair(self, b)? {
            NumPair::C(x, y) => {
                if x.re == 0.0 && x.im == 0.0 && (y.re < 0.0 || (y.re == 0.0 && y.im != 0.0)) {
                    return Err(ErrorKind::Domain);
                }
                Ok(from_c(x.powc(y)))
            }
            p => {
                let (x, y) = match p {
                    NumPair::I(x, y) => (x as f64, y as f64),
                    NumPair::F(x, y) => (x, y),
                    NumPair::C(..) => unreachable!(),
                };
                if x == 0.0 {
                    return if y > 0.0 {
                        Ok(Cell::Int(0))
                    } else if y == 0.0 {
                        Ok(Cell::Int(1))
                    } else {
                        Err(ErrorKind::Domain)
                    };
                }
                if x < 0.0 {
                    // negative base, non-integral exponent: complex result
                    return Ok(from_c(Complex64::new(x, 0.0).powc(Complex64::new(y, 0.0))));
                }
                Ok(Cell::Float(x.powf(y)))
            }
        }
    }

    fn power_int(&self, exp: i64) -> Result<Cell, ErrorKind> {
        let invert = exp < 0;
        let b = exp.unsigned_abs();

        if b <= 1 {
            if b == 0 {
                return Ok(Cell::Int(1));
            }
            return if invert {
                Cell::Int(1).divide(self, 0.0)
            } else {
                self.conjugate().map(|_| self.clone())
            };
        }

        match self.num()? {
            Num::I(a0) => {
                if a0 == 0 {
                    return if invert {
                        Err(ErrorKind::Domain)
                    } else {
                        Ok(Cell::Int(0))
                    };
                }
                if a0 == 1 {
                    return Ok(Cell::Int(1));
                }
                if a0 == -1 {
                    return Ok(Cell::Int(if b & 1 == 1 { -1 } else { 1 }));
                }
                let negate = a0 < 0 && (b & 1 == 1);
                let a = a0.unsigned_abs() as i128;

                // repeated squaring in i128, falling back to float on overflow
                let mut overflow = false;
                let mut sq = a;
                let mut z: i128 = 1;
                let mut rest = b;
                loop {
                    if rest & 1 == 1 {
                        match z.checked_mul(sq) {
                            Some(p) if p <= LARGE_INT as i128 => z = p,
                            _ => {
                                overflow = true;
                                break;
                            }
                        }
                        if rest == 1 {
                            break;
                        }
                    }
                    rest >>= 1;
                    match sq.checked_mul(sq) {
                        Some(p) if p <= LARGE_INT as i128 => sq = p,
                        _ => {
                            overflow = true;
                            break;
                        }
                    }
                }

                if !overflow {
                    let zi = if negate { -z } else { z };
                    if invert {
                        if zi == 0 {
                            return Err(ErrorKind::Domain);
                        }
                        return Ok(Cell::Float(1.0 / zi as f64));
                    }
                    return Ok(from_i128(zi));
                }

                let mut zf = (a as f64).powf(b as f64);
                if negate {
                    zf = -zf;
                }
                if invert {
                    zf = 1.0 / zf;
                }
                Ok(Cell::Float(zf))
            }
            Num::F(a0) => {
                let negate = a0 < 0.0 && (b & 1 == 1);
                let mut z = a0.abs().powf(b as f64);
                if negate {
                    z = -z;
                }
                if invert {
                    if z == 0.0 {
                        return Err(ErrorKind::Domain);
                    }
                    z = 1.0 / z;
                }
                Ok(Cell::Float(z))
            }
            Num::C(a) => {
                let mut z = a.powf(b as f64);
                if invert {
                    if z.re == 0.0 && z.im == 0.0 {
                        return Err(ErrorKind::Domain);
                    }
                    z = Complex64::new(1.0, 0.0) / z;
                }
                Ok(from_c(z))
            }
        }
    }

    /// A|B: APL residue. Zero A returns B; the result takes the sign of A.
    pub fn residue(&self, b: &Cell, ct: f64) -> Result<Cell, ErrorKind> {
        if self.is_near_zero(ct) {
            return b.conjugate().map(|_| b.clone());
        }
        if b.is_near_zero(ct) {
            return Ok(Cell::Int(0));
        }
        match pair(self, b)? {
            NumPair::I(a, bb) => {
                let mut rest = bb % a;
                if a < 0 {
                    if rest > 0 {
                        rest += a;
                    }
                } else if rest < 0 {
                    rest += a;
                }
                Ok(Cell::Int(rest))
            }
            NumPair::F(a, bb) => {
                let f_quot = bb / a;
                let mut i_quot = f_quot.floor();
                if tolerantly_equal(i_quot + 1.0, f_quot, ct) {
                    i_quot += 1.0;
                }
                let mut rest = bb - a * i_quot;
                if num::is_near_zero(rest, ct) {
                    return Ok(Cell::Int(0));
                }
                if a < 0.0 {
                    if rest > 0.0 {
                        rest += a;
                    }
                } else if rest < 0.0 {
                    rest += a;
                }
                Ok(Cell::Float(rest))
            }
            NumPair::C(a, bb) => {
                let q = bb / a;
                let q = Complex64::new(q.re.floor(), q.im.floor());
                Ok(from_c(bb - a * q))
            }
        }
    }

    pub fn maximum(&self, b: &Cell, ct: f64) -> Result<Cell, ErrorKind> {
        let x = self.real(ct)?;
        let y = b.real(ct)?;
        if x >= y {
            self.conjugate().map(|_| self.clone())
        } else {
            Ok(b.clone())
        }
    }

    pub fn minimum(&self, b: &Cell, ct: f64) -> Result<Cell, ErrorKind> {
        let x = self.real(ct)?;
        let y = b.real(ct)?;
        if x <= y {
            self.conjugate().map(|_| self.clone())
        } else {
            Ok(b.clone())
        }
    }

    /// A⍟B = ln B ÷ ln A; 1⍟1 = 1 by the 0÷0 rule
    pub fn logarithm(&self, b: &Cell, ct: f64) -> Result<Cell, ErrorKind> {
        let ln_a = self.nat_log();
        let ln_b = b.nat_log();
        match (ln_a, ln_b) {
            (Ok(la), Ok(lb)) => lb.divide(&la, ct),
            _ => Err(ErrorKind::Domain),
        }
    }

    /// A!B: binomial, four-way case split on the signs of A, B and B−A
    pub fn binomial(&self, b: &Cell, ct: f64) -> Result<Cell, ErrorKind> {
        if !self.is_near_real(ct) || !b.is_near_real(ct) {
            let a = self.complex()?;
            let bb = b.complex()?;
            let z = num::cgamma(bb + 1.0)
                / (num::cgamma(a + 1.0) * num::cgamma(bb - a + 1.0));
            return Ok(from_c(z));
        }
        if !self.is_near_int(ct) || !b.is_near_int(ct) {
            let a = self.real(ct)?;
            let bb = b.real(ct)?;
            for arg in [1.0 + a, 1.0 + bb, 1.0 + bb - a] {
                if arg < 0.0 && near_int(arg, ct).is_some() {
                    return Err(ErrorKind::Domain);
                }
            }
            return Ok(Cell::Float(
                num::gamma(1.0 + bb) / (num::gamma(1.0 + a) * num::gamma(1.0 + bb - a)),
            ));
        }

        let a = self.to_int(ct)?;
        let b = b.to_int(ct)?;
        let mut how = 0;
        if a < 0 {
            how |= 4;
        }
        if b < 0 {
            how |= 2;
        }
        if b < a {
            how |= 1;
        }
        match how {
            0 => Ok(choose(b, a, false)),
            3 => Ok(choose(a - (b + 1), a, a & 1 == 1)),
            6 => Ok(choose(-(a + 1), -(b + 1), (b - a) & 1 == 1)),
            _ => Ok(Cell::Int(0)),
        }
    }

    /// A○B: circle functions for selector A ∈ ¯12..12
    pub fn circle_fn(&self, b: &Cell, ct: f64) -> Result<Cell, ErrorKind> {
        let sel = self.to_int(ct)?;
        if !(-12..=12).contains(&sel) {
            return Err(ErrorKind::Domain);
        }
        let z = b.complex()?;
        let is_real = b.is_near_real(ct);
        let x = z.re;

        // real fast path where the real function is total
        if is_real {
            let r = match sel {
                1 => Some(x.sin()),
                2 => Some(x.cos()),
                3 => Some(x.tan()),
                4 => Some((1.0 + x * x).sqrt()),
                5 => Some(x.sinh()),
                6 => Some(x.cosh()),
                7 => Some(x.tanh()),
                9 => Some(x),
                10 => Some(x.abs()),
                11 => Some(0.0),
                12 => Some(0.0),
                -3 => Some(x.atan()),
                -5 => Some(x.asinh()),
                -7 if x.abs() < 1.0 => Some(x.atanh()),
                -9 => Some(x),
                -10 => Some(x),
                // out-of-range arguments stay real and go to NaN
                0 => Some((1.0 - x * x).sqrt()),
                -1 => Some(x.asin()),
                -2 => Some(x.acos()),
                -6 if x >= 1.0 => Some(x.acosh()),
                _ => None,
            };
            if let Some(r) = r {
                return Ok(Cell::Float(r));
            }
        }

        // complex path
        let one = Complex64::new(1.0, 0.0);
        let i = Complex64::new(0.0, 1.0);
        let r = match sel {
            0 => (one - z * z).sqrt(),
            1 => z.sin(),
            2 => z.cos(),
            3 => z.tan(),
            4 => (one + z * z).sqrt(),
            5 => z.sinh(),
            6 => z.cosh(),
            7 => z.tanh(),
            8 => (-(one + z * z)).sqrt(),
            9 => Complex64::new(z.re, 0.0),
            10 => Complex64::new(z.norm(), 0.0),
            11 => Complex64::new(z.im, 0.0),
            12 => Complex64::new(z.arg(), 0.0),
            -1 => z.asin(),
            -2 => z.acos(),
            -3 => z.atan(),
            -4 => (z * z - one).sqrt(),
            -5 => z.asinh(),
            -6 => z.acosh(),
            -7 => z.atanh(),
            -8 => -(-(one + z * z)).sqrt(),
            -9 => z,
            -10 => z.conj(),
            -11 => i * z,
            -12 => (i * z).exp(),
            _ => unreachable!(),
        };
        Ok(from_c(r))
    }

    /// A∧B: boolean and, generalised to LCM (Gaussian LCM for complex)
    pub fn and(&self, b: &Cell, ct: f64) -> Result<Cell, ErrorKind> {
        if self.is_near_zero(ct) || b.is_near_zero(ct) {
            return Ok(Cell::Int(0));
        }
        if !self.is_near_real(ct) || !b.is_near_real(ct) {
            let a = self.complex()?;
            let bb = b.complex()?;
            let g = cpx_gcd(a, bb, ct);
            return Ok(from_c(a * (bb / g)));
        }
        if self.is_near_int(ct) && b.is_near_int(ct) {
            let a = self.to_int(ct)?;
            let bb = b.to_int(ct)?;
            if (a == 0 || a == 1) && (bb == 0 || bb == 1) {
                return Ok(Cell::bool(a == 1 && bb == 1));
            }
            let g = int_gcd(a, bb);
            return Ok(from_i128(a as i128 * (bb / g) as i128));
        }
        let a = self.real(ct)?;
        let bb = b.real(ct)?;
        let g = flt_gcd(a, bb, ct);
        Ok(Cell::Float(a * (bb / g)))
    }

    /// A∨B: boolean or, generalised to GCD (Gaussian GCD for complex)
    pub fn or(&self, b: &Cell, ct: f64) -> Result<Cell, ErrorKind> {
        if self.is_near_zero(ct) {
            return b.magnitude();
        }
        if b.is_near_zero(ct) {
            return self.magnitude();
        }
        if !self.is_near_real(ct) || !b.is_near_real(ct) {
            let g = cpx_gcd(self.complex()?, b.complex()?, ct);
            return Ok(from_c(g));
        }
        if self.is_near_int(ct) && b.is_near_int(ct) {
            let a = self.to_int(ct)?;
            let bb = b.to_int(ct)?;
            if (a == 0 || a == 1) && (bb == 0 || bb == 1) {
                return Ok(Cell::bool(a == 1 || bb == 1));
            }
            return Ok(Cell::Int(int_gcd(a, bb)));
        }
        Ok(Cell::Float(flt_gcd(self.real(ct)?, b.real(ct)?, ct)))
    }

    /// A⍲B: boolean only
    pub fn nand(&self, b: &Cell, ct: f64) -> Result<Cell, ErrorKind> {
        Ok(Cell::bool(!(self.to_bool(ct)? && b.to_bool(ct)?)))
    }

    /// A⍱B: boolean only
    pub fn nor(&self, b: &Cell, ct: f64) -> Result<Cell, ErrorKind> {
        Ok(Cell::bool(!(self.to_bool(ct)? || b.to_bool(ct)?)))
    }

    // ------------------------------------------------------------------
    // comparison
    // ------------------------------------------------------------------

    /// ⎕CT-tolerant equality; never fails (mixed classes are unequal)
    pub fn equal(&self, b: &Cell, ct: f64) -> bool {
        match (self, b) {
            (Cell::Char(x), Cell::Char(y)) => x == y,
            (Cell::Pointer(x), Cell::Pointer(y)) => Value::tolerantly_equal(x, y, ct),
            (Cell::Pointer(x), y) => {
                x.shape().is_scalar() && x.ravel()[0].equal(y, ct)
            }
            (x, Cell::Pointer(y)) => {
                y.shape().is_scalar() && y.ravel()[0].equal(x, ct)
            }
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let x = to_c(a.num().expect("numeric"));
                let y = to_c(b.num().expect("numeric"));
                num::complex_tolerantly_equal(x, y, ct)
            }
            _ => false,
        }
    }

    /// A<B and friends: real numbers only
    pub fn compare_real(&self, b: &Cell, ct: f64) -> Result<Ordering, ErrorKind> {
        let x = self.real(ct)?;
        let y = b.real(ct)?;
        if tolerantly_equal(x, y, ct) {
            Ok(Ordering::Equal)
        } else if x < y {
            Ok(Ordering::Less)
        } else {
            Ok(Ordering::Greater)
        }
    }

    /// Total order for grade and sort: character < numeric < nested;
    /// within a class the obvious order, lexicographic for nested
    pub fn total_cmp(&self, b: &Cell, ct: f64) -> Ordering {
        fn class(c: &Cell) -> u8 {
            match c {
                Cell::Char(_) => 0,
                Cell::Int(_) | Cell::Float(_) | Cell::Complex(_) => 1,
                Cell::Pointer(_) => 2,
            }
        }
        let (ca, cb) = (class(self), class(b));
        if ca != cb {
            return ca.cmp(&cb);
        }
        match (self, b) {
            (Cell::Char(x), Cell::Char(y)) => x.cmp(y),
            (Cell::Pointer(x), Cell::Pointer(y)) => Value::total_cmp(x, y, ct),
            _ => {
                let x = to_c(self.num().expect("numeric"));
                let y = to_c(b.num().expect("numeric"));
                if num::tolerantly_equal(x.re, y.re, ct) {
                    x.im.partial_cmp(&y.im).unwrap_or(Ordering::Equal)
                } else {
                    x.re.partial_cmp(&y.re).unwrap_or(Ordering::Equal)
                }
            }
        }
    }
}

/// C(n, k) with the overflow-to-float rule, optionally negated
fn choose(n: i64, k: i64, negate: bool) -> Cell {
    debug_assert!(n >= 0 && k >= 0);
    if k > n {
        return Cell::Int(0);
    }
    let k = k.min(n - k);
    let mut acc: i128 = 1;
    let mut float_acc = 1.0f64;
    let mut overflowed = false;
    for i in 1..=k {
        let factor = n - k + i;
        if !overflowed {
            match acc.checked_mul(factor as i128) {
                Some(p) => {
                    acc = p / i as i128;
                    if acc > LARGE_INT as i128 {
                        overflowed = true;
                        float_acc = acc as f64;
                    }
                }
                None => {
                    overflowed = true;
                    float_acc = acc as f64 * factor as f64 / i as f64;
                }
            }
        } else {
            float_acc = float_acc * factor as f64 / i as f64;
        }
    }
    if overflowed {
        Cell::Float(if negate { -float_acc } else { float_acc })
    } else {
        from_i128(if negate { -acc } else { acc })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CT: f64 = 1e-13;

    #[test]
    fn test_add_overflow_to_float() {
        let big = Cell::Int(LARGE_INT - 1);
        match big.add(&Cell::Int(10)).unwrap() {
            Cell::Float(f) => assert_eq!(f, (LARGE_INT + 9) as f64),
            other => panic!("expected float, got {:?}", other),
        }
        assert_eq!(Cell::Int(2).add(&Cell::Int(3)).unwrap(), Cell::Int(5));
    }

    #[test]
    fn test_divide_zero_rules() {
        assert_eq!(
            Cell::Int(0).divide(&Cell::Int(0), CT).unwrap(),
            Cell::Int(1)
        );
        assert_eq!(
            Cell::Int(1).divide(&Cell::Int(0), CT),
            Err(ErrorKind::Domain)
        );
        assert_eq!(
            Cell::Int(6).divide(&Cell::Int(3), CT).unwrap(),
            Cell::Int(2)
        );
        assert_eq!(
            Cell::Int(1).divide(&Cell::Int(2), CT).unwrap(),
            Cell::Float(0.5)
        );
    }

    #[test]
    fn test_power_integer() {
        assert_eq!(Cell::Int(2).power(&Cell::Int(10), CT).unwrap(), Cell::Int(1024));
        assert_eq!(Cell::Int(0).power(&Cell::Int(0), CT).unwrap(), Cell::Int(1));
        assert_eq!(
            Cell::Int(0).power(&Cell::Int(-1), CT),
            Err(ErrorKind::Domain)
        );
        assert_eq!(
            Cell::Int(-2).power(&Cell::Int(3), CT).unwrap(),
            Cell::Int(-8)
        );
        // 2⋆¯2 = 0.25
        assert_eq!(
            Cell::Int(2).power(&Cell::Int(-2), CT).unwrap(),
            Cell::Float(0.25)
        );
    }

    #[test]
    fn test_power_overflow() {
        match Cell::Int(10).power(&Cell::Int(30), CT).unwrap() {
            Cell::Float(f) => assert!((f - 1e30).abs() / 1e30 < 1e-10),
            other => panic!("expected float, got {:?}", other),
        }
    }

    #[test]
    fn test_residue_sign_follows_left() {
        assert_eq!(
            Cell::Int(3).residue(&Cell::Int(-1), CT).unwrap(),
            Cell::Int(2)
        );
        assert_eq!(
            Cell::Int(-3).residue(&Cell::Int(1), CT).unwrap(),
            Cell::Int(-2)
        );
        assert_eq!(
            Cell::Int(0).residue(&Cell::Int(7), CT).unwrap(),
            Cell::Int(7)
        );
    }

    #[test]
    fn test_factorial() {
        assert_eq!(Cell::Int(5).factorial(CT).unwrap(), Cell::Int(120));
        assert_eq!(Cell::Int(20).factorial(CT).unwrap(), Cell::Int(FACTORIALS[20]));
        assert!(matches!(
            Cell::Int(25).factorial(CT).unwrap(),
            Cell::Float(_)
        ));
        assert_eq!(Cell::Int(200).factorial(CT), Err(ErrorKind::Domain));
    }

    #[test]
    fn test_binomial_cases() {
        // 2!5 = 10
        assert_eq!(
            Cell::Int(2).binomial(&Cell::Int(5), CT).unwrap(),
            Cell::Int(10)
        );
        // 5!2 = 0
        assert_eq!(
            Cell::Int(5).binomial(&Cell::Int(2), CT).unwrap(),
            Cell::Int(0)
        );
        // 3!¯2 = (¯1)⋆3 × C(3-(-2)-1, 3) = -C(4,3) = ¯4
        assert_eq!(
            Cell::Int(3).binomial(&Cell::Int(-2), CT).unwrap(),
            Cell::Int(-4)
        );
        // ¯3!¯5: C(2,4)-style case 6
        assert_eq!(
            Cell::Int(-3).binomial(&Cell::Int(-5), CT).unwrap(),
            Cell::Int(6)
        );
    }

    #[test]
    fn test_gcd_lcm() {
        assert_eq!(
            Cell::Int(12).or(&Cell::Int(18), CT).unwrap(),
            Cell::Int(6)
        );
        assert_eq!(
            Cell::Int(4).and(&Cell::Int(6), CT).unwrap(),
            Cell::Int(12)
        );
        assert_eq!(Cell::Int(1).and(&Cell::Int(0), CT).unwrap(), Cell::Int(0));
        assert_eq!(Cell::Int(1).or(&Cell::Int(0), CT).unwrap(), Cell::Int(1));
    }

    #[test]
    fn test_logarithm_one_one() {
        assert_eq!(
            Cell::Int(1).logarithm(&Cell::Int(1), CT),
            Err(ErrorKind::Domain)
        );
        // e⍟e = 1
        let e = Cell::Float(std::f64::consts::E);
        match e.logarithm(&e, CT).unwrap() {
            Cell::Float(f) => assert!((f - 1.0).abs() < 1e-12),
            Cell::Int(1) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tolerant_equal() {
        assert!(Cell::Int(1).equal(&Cell::Float(1.0 + 1e-15), 1e-10));
        assert!(!Cell::Int(1).equal(&Cell::Float(1.0 + 1e-15), 0.0));
        assert!(!Cell::Char('a').equal(&Cell::Int(97), CT));
    }

    #[test]
    fn test_total_order_classes() {
        let c = Cell::Char('z');
        let n = Cell::Int(-100);
        assert_eq!(c.total_cmp(&n, CT), Ordering::Less);
        assert_eq!(
            Cell::Int(3).total_cmp(&Cell::Float(3.5), CT),
            Ordering::Less
        );
    }

    #[test]
    fn test_circle_sin() {
        let half_pi = Cell::Float(std::f64::consts::FRAC_PI_2);
        match Cell::Int(1).circle_fn(&half_pi, CT).unwrap() {
            Cell::Float(f) => assert!((f - 1.0).abs() < 1e-12),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_circle_real_out_of_range_is_nan() {
        // ¯2○2 stays on the real path: arccos past ±1 is NaN, not complex
        match Cell::Int(-2).circle_fn(&Cell::Int(2), CT).unwrap() {
            Cell::Float(f) => assert!(f.is_nan()),
            other => panic!("unexpected {:?}", other),
        }
        match Cell::Int(0).circle_fn(&Cell::Int(3), CT).unwrap() {
            Cell::Float(f) => assert!(f.is_nan()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_circle_phase_of_real_is_zero() {
        // 12○B on a real B is 0 regardless of sign
        match Cell::Int(12).circle_fn(&Cell::Int(-5), CT).unwrap() {
            Cell::Float(f) => assert_eq!(f, 0.0),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_floor_tolerant() {
        assert_eq!(
            Cell::Float(2.9999999999999996).floor(1e-13).unwrap(),
            Cell::Int(3)
        );
        assert_eq!(Cell::Float(2.5).floor(CT).unwrap(), Cell::Int(2));
        assert_eq!(Cell::Float(-2.5).floor(CT).unwrap(), Cell::Int(-3));
    }

    #[test]
    fn test_cdr_class() {
        assert_eq!(Cell::Int(1).cdr_class(), CdrClass::Bit);
        assert_eq!(Cell::Int(300).cdr_class(), CdrClass::Int);
        assert_eq!(Cell::Int(1 << 40).cdr_class(), CdrClass::Float);
        assert_eq!(Cell::Char('A').cdr_class(), CdrClass::Char8);
        assert_eq!(Cell::Char('⍳').cdr_class(), CdrClass::Char32);
    }
}
