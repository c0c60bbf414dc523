//! ⍕: format, and the session display of values
//!
//! Monadic format renders numbers to ⎕PP significant digits (`¯` for the
//! negative sign, `E` exponents, `J` complex separators) and lays arrays
//! out with right-justified columns. Dyadic `W⍕B` takes a width/decimals
//! pair (or one pair per column). The session uses [`display_string`].

use crate::sysvar::Ctx;
use apl_core::{Cell, ErrorKind, Shape, Value};

/// Render one real to `pp` significant digits, APL spelling
pub fn fmt_real(x: f64, pp: usize) -> String {
    if x.is_nan() {
        return "NaN".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "∞".to_string() } else { "¯∞".to_string() };
    }
    let neg = x < 0.0 || (x == 0.0 && x.is_sign_negative());
    let ax = x.abs();
    let body = if ax == ax.trunc() && ax < 1e15 {
        format!("{}", ax as i128)
    } else {
        let mag = if ax == 0.0 { 0 } else { ax.log10().floor() as i32 };
        if mag < -5 || mag >= pp as i32 {
            // scientific: pp significant digits
            let s = format!("{:.*e}", pp.saturating_sub(1), ax);
            let (mant, exp) = s.split_once('e').expect("exponent form");
            let mant = trim_zeros(mant);
            let exp: i32 = exp.parse().expect("exponent digits");
            if exp < 0 {
                format!("{}E¯{}", mant, -exp)
            } else {
                format!("{}E{}", mant, exp)
            }
        } else {
            let decimals = (pp as i32 - 1 - mag).max(0) as usize;
            trim_zeros(&format!("{:.*}", decimals, ax))
        }
    };
    if neg { format!("¯{}", body) } else { body }
}

fn trim_zeros(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    let t = s.trim_end_matches('0');
    t.trim_end_matches('.').to_string()
}

/// Render one cell (not a pointer) to its display text
pub fn fmt_cell(c: &Cell, ctx: &Ctx) -> String {
    match c {
        Cell::Char(ch) => ch.to_string(),
        Cell::Int(n) => {
            if *n < 0 {
                format!("¯{}", n.unsigned_abs())
            } else {
                format!("{}", n)
            }
        }
        Cell::Float(f) => fmt_real(*f, ctx.pp),
        Cell::Complex(z) => format!("{}J{}", fmt_real(z.re, ctx.pp), fmt_real(z.im, ctx.pp)),
        Cell::Pointer(v) => display_string(v, ctx),
    }
}

/// The session display of a value as text lines
pub fn display_string(v: &Value, ctx: &Ctx) -> String {
    let lines = display_lines(v, ctx);
    lines.join("\n")
}

fn display_lines(v: &Value, ctx: &Ctx) -> Vec<String> {
    // character arrays print as their characters
    if v.is_char_array() && v.is_simple() {
        if v.rank() <= 1 {
            return vec![v.ravel()[..v.element_count().max(usize::from(v.is_scalar()))]
                .iter()
                .map(|c| match c {
                    Cell::Char(ch) => *ch,
                    _ => ' ',
                })
                .collect()];
        }
        let cols = *v.shape().items().last().expect("rank ≥ 2");
        let rows = v.element_count() / cols.max(1);
        return (0..rows)
            .map(|r| {
                (0..cols)
                    .map(|c| match v.cell(r * cols + c) {
                        Cell::Char(ch) => *ch,
                        _ => ' ',
                    })
                    .collect()
            })
            .collect();
    }

    if v.is_scalar() {
        return vec![fmt_cell(v.first(), ctx)];
    }
    if v.is_empty() {
        return vec![String::new()];
    }

    let texts: Vec<String> = (0..v.element_count())
        .map(|i| fmt_cell(v.cell(i), ctx))
        .collect();

    if v.rank() == 1 {
        return vec![texts.join(" ")];
    }

    // rank ≥ 2: right-justified columns, one space apart
    let cols = *v.shape().items().last().expect("rank ≥ 2");
    let rows = v.element_count() / cols;
    let mut widths = vec![0usize; cols];
    for (i, t) in texts.iter().enumerate() {
        let c = i % cols;
        widths[c] = widths[c].max(t.chars().count());
    }
    (0..rows)
        .map(|r| {
            (0..cols)
                .map(|c| {
                    let t = &texts[r * cols + c];
                    format!("{:>width$}", t, width = widths[c])
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

/// ⍕B: the display as a character array value
pub fn monadic_format(b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    let lines = display_lines(b, ctx);
    if lines.len() == 1 {
        return Ok(Value::char_vector(&lines[0]));
    }
    let rows = lines.len();
    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let mut cells = Vec::with_capacity(rows * width);
    for l in &lines {
        let mut count = 0;
        for ch in l.chars() {
            cells.push(Cell::Char(ch));
            count += 1;
        }
        for _ in count..width {
            cells.push(Cell::Char(' '));
        }
    }
    Value::new(Shape::new(vec![rows, width])?, cells)
}

/// W⍕B: explicit width/decimals formatting.
///
/// W is a single number (decimals, width chosen automatically), a pair
/// `width decimals`, or one pair per column of B.
pub fn dyadic_format(w: &Value, b: &Value, ctx: &Ctx) -> Result<Value, ErrorKind> {
    let spec = w.as_int_vector(ctx.ct)?;
    let cols = if b.rank() == 0 {
        1
    } else {
        *b.shape().items().last().expect("rank ≥ 1")
    };
    let pairs: Vec<(usize, usize)> = match spec.len() {
        1 => vec![(0, check_decimals(spec[0])?); cols],
        2 => vec![(check_width(spec[0])?, check_decimals(spec[1])?); cols],
        n if n == 2 * cols => spec
            .chunks(2)
            .map(|p| Ok((check_width(p[0])?, check_decimals(p[1])?)))
            .collect::<Result<_, ErrorKind>>()?,
        _ => return Err(ErrorKind::Length),
    };

    let rows = b.element_count() / cols.max(1);
    let mut row_texts: Vec<Vec<String>> = Vec::with_capacity(rows.max(1));
    for r in 0..rows.max(1) {
        let mut row = Vec::with_capacity(cols);
        for c in 0..cols {
            let cell = b.cell(r * cols + c);
            let x = cell.real(ctx.ct)?;
            let (width, dec) = pairs[c];
            let mut t = format!("{:.*}", dec, x.abs());
            if x < 0.0 {
                t = format!("¯{}", t);
            }
            if width > 0 {
                if t.chars().count() > width {
                    return Err(ErrorKind::Domain); // field too small
                }
                t = format!("{:>width$}", t, width = width);
            }
            row.push(t);
        }
        row_texts.push(row);
    }

    // auto widths where the field spec gave none
    let mut widths = vec![0usize; cols];
    for row in &row_texts {
        for (c, t) in row.iter().enumerate() {
            widths[c] = widths[c].max(t.chars().count());
        }
    }
    let total: usize = widths.iter().sum::<usize>() + cols.saturating_sub(1);

    let mut zitems: Vec<usize> = b.shape().items().to_vec();
    if zitems.is_empty() {
        zitems.push(total);
    } else {
        *zitems.last_mut().expect("rank ≥ 1") = total;
    }
    let zshape = Shape::new(zitems)?;
    let mut cells = Vec::with_capacity(zshape.ravel_len());
    for row in &row_texts {
        let mut line = String::new();
        for (c, t) in row.iter().enumerate() {
            if c > 0 {
                line.push(' ');
            }
            line.push_str(&format!("{:>width$}", t, width = widths[c]));
        }
        for ch in line.chars() {
            cells.push(Cell::Char(ch));
        }
    }
    if zshape.is_empty() {
        return Ok(Value::empty_with_prototype(zshape, Cell::Char(' ')));
    }
    Value::new(zshape, cells)
}

fn check_width(w: i64) -> Result<usize, ErrorKind> {
    if w < 0 {
        return Err(ErrorKind::Domain);
    }
    Ok(w as usize)
}

fn check_decimals(d: i64) -> Result<usize, ErrorKind> {
    if !(0..=34).contains(&d) {
        return Err(ErrorKind::Domain);
    }
    Ok(d as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Ctx {
        Ctx::default()
    }

    #[test]
    fn test_fmt_real_plain() {
        assert_eq!(fmt_real(15.0, 10), "15");
        assert_eq!(fmt_real(-2.5, 10), "¯2.5");
        assert_eq!(fmt_real(0.0, 10), "0");
    }

    #[test]
    fn test_fmt_real_scientific() {
        assert_eq!(fmt_real(1e-10, 10), "1E¯10");
        let s = fmt_real(1.23e20, 4);
        assert!(s.starts_with("1.23E"), "{}", s);
    }

    #[test]
    fn test_fmt_respects_pp() {
        let s = fmt_real(std::f64::consts::PI, 5);
        assert_eq!(s, "3.1416");
    }

    #[test]
    fn test_display_vector() {
        let v = Value::int_vector(&[1, -2, 3]);
        assert_eq!(display_string(&v, &ctx()), "1 ¯2 3");
    }

    #[test]
    fn test_display_char_vector_verbatim() {
        let v = Value::char_vector("HELLO WORLD");
        assert_eq!(display_string(&v, &ctx()), "HELLO WORLD");
    }

    #[test]
    fn test_display_matrix_alignment() {
        let m = Value::new(
            Shape::new(vec![2, 3]).unwrap(),
            vec![
                Cell::Int(1),
                Cell::Int(2),
                Cell::Int(3),
                Cell::Int(4),
                Cell::Int(5),
                Cell::Int(6),
            ],
        )
        .unwrap();
        assert_eq!(display_string(&m, &ctx()), "1 2 3\n4 5 6");
        let m = Value::new(
            Shape::new(vec![2, 2]).unwrap(),
            vec![Cell::Int(1), Cell::Int(22), Cell::Int(333), Cell::Int(4)],
        )
        .unwrap();
        assert_eq!(display_string(&m, &ctx()), "  1 22\n333  4");
    }

    #[test]
    fn test_monadic_format_matrix_value() {
        let m = Value::new(
            Shape::new(vec![2, 2]).unwrap(),
            vec![Cell::Int(1), Cell::Int(2), Cell::Int(3), Cell::Int(4)],
        )
        .unwrap();
        let z = monadic_format(&m, &ctx()).unwrap();
        assert_eq!(z.rank(), 2);
        assert!(z.is_char_array());
    }

    #[test]
    fn test_dyadic_format_pair() {
        // 8 2⍕x: width 8, 2 decimals
        let z = dyadic_format(
            &Value::int_vector(&[8, 2]),
            &Value::scalar(Cell::Float(3.14159)),
            &ctx(),
        )
        .unwrap();
        assert_eq!(z.as_string().unwrap(), "    3.14");
    }

    #[test]
    fn test_dyadic_format_field_too_small() {
        let z = dyadic_format(
            &Value::int_vector(&[3, 2]),
            &Value::scalar(Cell::Float(12345.0)),
            &ctx(),
        );
        assert_eq!(z.unwrap_err(), ErrorKind::Domain);
    }

    #[test]
    fn test_complex_display() {
        let v = Value::scalar(Cell::Complex(apl_core::Complex64::new(3.0, -4.0)));
        assert_eq!(display_string(&v, &ctx()), "3J¯4");
    }
}
