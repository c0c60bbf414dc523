//! Numeric helpers shared by cell arithmetic
//!
//! Tolerant comparison (⎕CT), safe-integer bounds, integer / real / Gaussian
//! GCD, and the gamma function for factorial and binomial. Gamma uses the
//! Lanczos approximation (g = 7, 9 coefficients) for both the real and the
//! complex path.

use num_complex::Complex64;

/// Largest magnitude an exact integer result may have before arithmetic
/// overflows to float: 2⁵³
pub const LARGE_INT: i64 = 1 << 53;
pub const SMALL_INT: i64 = -(1 << 53);

/// ⎕CT-tolerant equality of two reals.
///
/// Equal iff `|a−b| < ct·max(|a|,|b|)`, except that values of different
/// sign are never tolerantly equal (zero counts as both signs).
pub fn tolerantly_equal(a: f64, b: f64, ct: f64) -> bool {
    if a == b {
        return true;
    }
    if ct == 0.0 {
        return false;
    }
    if (a < 0.0 && b > 0.0) || (a > 0.0 && b < 0.0) {
        return false;
    }
    (a - b).abs() < ct * a.abs().max(b.abs())
}

/// Tolerant equality of two complex numbers (both components)
pub fn complex_tolerantly_equal(a: Complex64, b: Complex64, ct: f64) -> bool {
    tolerantly_equal(a.re, b.re, ct) && tolerantly_equal(a.im, b.im, ct)
}

pub fn is_near_zero(x: f64, ct: f64) -> bool {
    x == 0.0 || x.abs() < ct
}

/// The integer that `x` is tolerantly equal to, if any
pub fn near_int(x: f64, ct: f64) -> Option<i64> {
    if !x.is_finite() || x.abs() >= LARGE_INT as f64 {
        return None;
    }
    let rounded = x.round();
    if x == rounded || tolerantly_equal(x, rounded, ct) || (x - rounded).abs() < ct {
        Some(rounded as i64)
    } else {
        None
    }
}

pub fn int_gcd(a: i64, b: i64) -> i64 {
    let mut a = a.abs();
    let mut b = b.abs();
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Real GCD by Euclid with a ⎕CT stopping criterion
pub fn flt_gcd(a: f64, b: f64, ct: f64) -> f64 {
    let mut a = a.abs();
    let mut b = b.abs();
    while !is_near_zero(b, ct * a.max(1.0)) {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Gaussian-integer GCD for the complex ∧/∨ generalisation
pub fn cpx_gcd(a: Complex64, b: Complex64, ct: f64) -> Complex64 {
    let mut a = a;
    let mut b = b;
    // Euclid on Gaussian integers: remainder of rounded quotient
    for _ in 0..64 {
        if b.norm() < ct.max(f64::EPSILON) {
            break;
        }
        let q = a / b;
        let q = Complex64::new(q.re.round(), q.im.round());
        let r = a - b * q;
        a = b;
        b = r;
    }
    a
}

const LANCZOS_G: f64 = 7.0;
const LANCZOS: [f64; 9] = [
    0.999_999_999_999_809_93,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

/// Real gamma by Lanczos approximation; reflection for x < 0.5
pub fn gamma(x: f64) -> f64 {
    if x < 0.5 {
        // Γ(x)·Γ(1−x) = π ÷ sin πx
        let s = (std::f64::consts::PI * x).sin();
        if s == 0.0 {
            return f64::NAN; // pole at non-positive integers
        }
        return std::f64::consts::PI / (s * gamma(1.0 - x));
    }
    let x = x - 1.0;
    let mut acc = LANCZOS[0];
    for (i, c) in LANCZOS.iter().enumerate().skip(1) {
        acc += c / (x + i as f64);
    }
    let t = x + LANCZOS_G + 0.5;
    (2.0 * std::f64::consts::PI).sqrt() * t.powf(x + 0.5) * (-t).exp() * acc
}

/// Complex gamma, same Lanczos series
pub fn cgamma(z: Complex64) -> Complex64 {
    use std::f64::consts::PI;
    if z.re < 0.5 {
        let s = (Complex64::new(PI, 0.0) * z).sin();
        return Complex64::new(PI, 0.0) / (s * cgamma(Complex64::new(1.0, 0.0) - z));
    }
    let z = z - 1.0;
    let mut acc = Complex64::new(LANCZOS[0], 0.0);
    for (i, c) in LANCZOS.iter().enumerate().skip(1) {
        acc += Complex64::new(*c, 0.0) / (z + i as f64);
    }
    let t = z + LANCZOS_G + 0.5;
    (2.0 * PI).sqrt() * t.powc(z + 0.5) * (-t).exp() * acc
}

/// n! for n ≤ 20 without rounding
pub const FACTORIALS: [i64; 21] = [
    1,
    1,
    2,
    6,
    24,
    120,
    720,
    5040,
    40320,
    362880,
    3628800,
    39916800,
    479001600,
    6227020800,
    87178291200,
    1307674368000,
    20922789888000,
    355687428096000,
    6402373705728000,
    121645100408832000,
    2432902008176640000,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerant_equality() {
        assert!(tolerantly_equal(1.0, 1.0 + 1e-13, 1e-10));
        assert!(!tolerantly_equal(1.0, 1.0 + 1e-13, 0.0));
        // opposite signs never tolerantly equal
        assert!(!tolerantly_equal(1e-20, -1e-20, 1e-10));
        assert!(tolerantly_equal(0.0, 0.0, 1e-10));
    }

    #[test]
    fn test_near_int() {
        assert_eq!(near_int(3.0, 1e-13), Some(3));
        assert_eq!(near_int(3.4, 1e-13), None);
        assert_eq!(near_int(2.9999999999999996, 1e-13), Some(3));
    }

    #[test]
    fn test_int_gcd() {
        assert_eq!(int_gcd(12, 18), 6);
        assert_eq!(int_gcd(-12, 18), 6);
        assert_eq!(int_gcd(0, 7), 7);
    }

    #[test]
    fn test_gaussian_gcd_divides() {
        let a = Complex64::new(4.0, 2.0);
        let b = Complex64::new(2.0, 0.0);
        let g = cpx_gcd(a, b, 1e-10);
        // gcd must divide both to Gaussian integers
        let qa = a / g;
        let qb = b / g;
        assert!((qa.re - qa.re.round()).abs() < 1e-9);
        assert!((qa.im - qa.im.round()).abs() < 1e-9);
        assert!((qb.re - qb.re.round()).abs() < 1e-9);
        assert!((qb.im - qb.im.round()).abs() < 1e-9);
    }

    #[test]
    fn test_gamma_matches_factorial() {
        for n in 1..10i64 {
            let g = gamma((n + 1) as f64);
            let f = FACTORIALS[n as usize] as f64;
            assert!((g - f).abs() / f < 1e-10, "gamma({}) = {}", n + 1, g);
        }
    }

    #[test]
    fn test_gamma_half() {
        // Γ(1/2) = √π
        let g = gamma(0.5);
        assert!((g - std::f64::consts::PI.sqrt()).abs() < 1e-10);
    }

    #[test]
    fn test_cgamma_real_axis() {
        let g = cgamma(Complex64::new(5.0, 0.0));
        assert!((g.re - 24.0).abs() < 1e-8);
        assert!(g.im.abs() < 1e-8);
    }
}
