//! Source text → token stream
//!
//! Character-by-character scan. Numbers use `¯` as the negative sign and
//! `J` (complex), `D` (polar, degrees), `R` (polar, radians) as
//! constructors, with `E`/`e` scientific exponents. Strings come in the
//! single-quoted form (`''` escapes a quote) and the double-quoted form
//! (backslash escapes). `⎕`-names are greedy-matched longest-first against
//! the system-name table; `S∆name`/`T∆name` tokenise to stop/trace
//! references. A `⍝` comment runs to end of line.

use crate::token::{PRIMITIVE_GLYPHS, QUAD_NAMES, QuadName, Tok, TokenTag};
use apl_core::{AplError, Complex64, ErrorKind, Result, Value};

pub fn tokenize(line: &str) -> Result<Vec<Tok>> {
    Tokenizer::new(line).run()
}

struct Tokenizer {
    chars: Vec<char>,
    pos: usize,
    out: Vec<Tok>,
}

fn is_symbol_start(c: char) -> bool {
    c.is_alphabetic() || c == '∆' || c == '⍙' || c == '_'
}

fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric() || c == '∆' || c == '⍙' || c == '_'
}

fn is_diamond(c: char) -> bool {
    c == '◇' || c == '◊' || c == '⋄'
}

impl Tokenizer {
    fn new(line: &str) -> Self {
        Tokenizer {
            chars: line.chars().collect(),
            pos: 0,
            out: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, off: usize) -> Option<char> {
        self.chars.get(self.pos + off).copied()
    }

    fn error(&self, kind: ErrorKind, at: usize) -> AplError {
        let mut e = AplError::new(kind);
        let line: String = self.chars.iter().collect();
        e.set_position(&line, at, at);
        e
    }

    fn push(&mut self, tag: TokenTag, at: usize) {
        self.out.push(Tok::new(tag, at));
    }

    fn run(mut self) -> Result<Vec<Tok>> {
        while let Some(c) = self.peek() {
            let at = self.pos;
            match c {
                ' ' | '\t' => {
                    self.pos += 1;
                }
                '⍝' => break, // comment to end of line
                '\'' => self.single_quoted(at)?,
                '"' => self.double_quoted(at)?,
                '⎕' => self.quad_name(at)?,
                '←' => {
                    self.pos += 1;
                    self.push(TokenTag::Assign, at);
                }
                '→' => {
                    self.pos += 1;
                    self.push(TokenTag::Branch, at);
                }
                '(' => {
                    self.pos += 1;
                    self.push(TokenTag::LParen, at);
                }
                ')' => {
                    self.pos += 1;
                    self.push(TokenTag::RParen, at);
                }
                '[' => {
                    self.pos += 1;
                    self.push(TokenTag::LBracket, at);
                }
                ']' => {
                    self.pos += 1;
                    self.push(TokenTag::RBracket, at);
                }
                '{' => {
                    self.pos += 1;
                    self.push(TokenTag::LBrace, at);
                }
                '}' => {
                    self.pos += 1;
                    self.push(TokenTag::RBrace, at);
                }
                ';' => {
                    self.pos += 1;
                    self.push(TokenTag::Semicolon, at);
                }
                ':' => {
                    self.pos += 1;
                    self.push(TokenTag::Colon, at);
                }
                '⍵' | '⍺' => {
                    // lambda argument names are ordinary symbols
                    self.pos += 1;
                    self.push(TokenTag::Symbol(c.to_string()), at);
                }
                '⍬' => {
                    self.pos += 1;
                    self.push(TokenTag::Value(Value::empty_numeric()), at);
                }
                _ if is_diamond(c) => {
                    self.pos += 1;
                    self.push(TokenTag::Diamond, at);
                }
                '¯' | '0'..='9' => self.number(at)?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.number(at)?,
                _ if is_symbol_start(c) => self.symbol(at),
                _ if PRIMITIVE_GLYPHS.contains(c) => {
                    self.pos += 1;
                    // ⋆ and * are the same power glyph
                    let g = if c == '*' { '⋆' } else { c };
                    self.push(TokenTag::Prim(g), at);
                }
                _ => return Err(self.error(ErrorKind::NoToken, at)),
            }
        }
        Ok(self.out)
    }

    fn single_quoted(&mut self, at: usize) -> Result<()> {
        self.pos += 1; // opening quote
        let mut s = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error(ErrorKind::StringEnd, at)),
                Some('\'') => {
                    if self.peek_at(1) == Some('\'') {
                        s.push('\'');
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                        break;
                    }
                }
                Some(c) => {
                    s.push(c);
                    self.pos += 1;
                }
            }
        }
        self.push(TokenTag::Chars(s), at);
        Ok(())
    }

    fn double_quoted(&mut self, at: usize) -> Result<()> {
        self.pos += 1;
        let mut s = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error(ErrorKind::StringEnd, at)),
                Some('"') => {
                    self.pos += 1;
                    break;
                }
                Some('\\') => {
                    let esc = self
                        .peek_at(1)
                        .ok_or_else(|| self.error(ErrorKind::StringEnd, at))?;
                    s.push(match esc {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '0' => '\0',
                        other => other, // \" \\ and any literal escape
                    });
                    self.pos += 2;
                }
                Some(c) => {
                    s.push(c);
                    self.pos += 1;
                }
            }
        }
        self.push(TokenTag::Chars(s), at);
        Ok(())
    }

    fn quad_name(&mut self, at: usize) -> Result<()> {
        self.pos += 1; // ⎕
        let start = self.pos;
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphabetic() {
                ident.push(c.to_ascii_uppercase());
                self.pos += 1;
            } else {
                break;
            }
        }
        if ident.is_empty() {
            self.push(TokenTag::Quad(QuadName::Quad), at);
            return Ok(());
        }
        // longest matching prefix of the collected identifier
        let mut best: Option<(usize, QuadName)> = None;
        for (name, q) in QUAD_NAMES {
            if ident.starts_with(name) {
                let better = match best {
                    Some((len, _)) => name.len() > len,
                    None => true,
                };
                if better {
                    best = Some((name.len(), *q));
                }
            }
        }
        match best {
            Some((len, q)) => {
                // give back any trailing characters beyond the match
                self.pos = start + len;
                self.push(TokenTag::Quad(q), at);
                Ok(())
            }
            None => Err(self.error(ErrorKind::Syntax, at)),
        }
    }

    fn symbol(&mut self, at: usize) {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if is_symbol_char(c) {
                name.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        // S∆name / T∆name: stop- or trace-set reference
        if let Some(rest) = name.strip_prefix("S∆") {
            if !rest.is_empty() {
                self.push(
                    TokenTag::StopTrace {
                        trace: false,
                        name: rest.to_string(),
                    },
                    at,
                );
                return;
            }
        }
        if let Some(rest) = name.strip_prefix("T∆") {
            if !rest.is_empty() {
                self.push(
                    TokenTag::StopTrace {
                        trace: true,
                        name: rest.to_string(),
                    },
                    at,
                );
                return;
            }
        }
        self.push(TokenTag::Symbol(name), at);
    }

    /// One real: `[¯] digits [. digits] [E [¯] digits]`
    fn real_part(&mut self, at: usize) -> Result<f64> {
        let mut s = String::new();
        if self.peek() == Some('¯') {
            s.push('-');
            self.pos += 1;
        }
        let mut any_digit = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                s.push(c);
                any_digit = true;
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            s.push('.');
            self.pos += 1;
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    s.push(c);
                    any_digit = true;
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        if !any_digit {
            return Err(self.error(ErrorKind::NoToken, at));
        }
        if matches!(self.peek(), Some('E') | Some('e'))
            && self
                .peek_at(1)
                .is_some_and(|c| c.is_ascii_digit() || c == '¯')
        {
            s.push('e');
            self.pos += 1;
            if self.peek() == Some('¯') {
                s.push('-');
                self.pos += 1;
            }
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    s.push(c);
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        s.parse::<f64>()
            .map_err(|_| self.error(ErrorKind::NoToken, at))
    }

    fn number(&mut self, at: usize) -> Result<()> {
        let start = self.pos;
        let re = self.real_part(at)?;
        let tag = match self.peek() {
            Some('J') | Some('j') => {
                self.pos += 1;
                let im = self.real_part(at)?;
                TokenTag::Complex(Complex64::new(re, im))
            }
            Some('D') | Some('d')
                if self
                    .peek_at(1)
                    .is_some_and(|c| c.is_ascii_digit() || c == '¯' || c == '.') =>
            {
                self.pos += 1;
                let deg = self.real_part(at)?;
                let rad = deg.to_radians();
                TokenTag::Complex(Complex64::from_polar(re, rad))
            }
            Some('R') | Some('r')
                if self
                    .peek_at(1)
                    .is_some_and(|c| c.is_ascii_digit() || c == '¯' || c == '.') =>
            {
                self.pos += 1;
                let rad = self.real_part(at)?;
                TokenTag::Complex(Complex64::from_polar(re, rad))
            }
            _ => {
                let text: String = self.chars[start..self.pos].iter().collect();
                let integral = !text.contains('.') && !text.contains('E') && !text.contains('e');
                if integral && re.abs() <= i64::MAX as f64 && re.fract() == 0.0 {
                    TokenTag::Int(re as i64)
                } else {
                    TokenTag::Float(re)
                }
            }
        };
        self.push(tag, at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(line: &str) -> Vec<TokenTag> {
        tokenize(line).unwrap().into_iter().map(|t| t.tag).collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(tags("42"), vec![TokenTag::Int(42)]);
        assert_eq!(tags("¯3"), vec![TokenTag::Int(-3)]);
        assert_eq!(tags("2.5"), vec![TokenTag::Float(2.5)]);
        assert_eq!(tags("1E¯10"), vec![TokenTag::Float(1e-10)]);
        assert_eq!(
            tags("3J4"),
            vec![TokenTag::Complex(Complex64::new(3.0, 4.0))]
        );
    }

    #[test]
    fn test_polar_number() {
        match &tags("1D90")[0] {
            TokenTag::Complex(z) => {
                assert!(z.re.abs() < 1e-12);
                assert!((z.im - 1.0).abs() < 1e-12);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            tags("'it''s'"),
            vec![TokenTag::Chars("it's".to_string())]
        );
        assert_eq!(
            tags(r#""a\nb""#),
            vec![TokenTag::Chars("a\nb".to_string())]
        );
        let err = tokenize("'oops").unwrap_err();
        assert_eq!(err.kind, ErrorKind::StringEnd);
    }

    #[test]
    fn test_quad_greedy_match() {
        assert_eq!(tags("⎕IO"), vec![TokenTag::Quad(QuadName::Io)]);
        assert_eq!(tags("⎕ucs"), vec![TokenTag::Quad(QuadName::Ucs)]);
        assert_eq!(tags("⎕"), vec![TokenTag::Quad(QuadName::Quad)]);
        // ⎕CTX: matches ⎕CT, X continues as a symbol
        assert_eq!(
            tags("⎕CTX"),
            vec![
                TokenTag::Quad(QuadName::Ct),
                TokenTag::Symbol("X".to_string())
            ]
        );
    }

    #[test]
    fn test_stop_trace() {
        assert_eq!(
            tags("S∆FOO"),
            vec![TokenTag::StopTrace {
                trace: false,
                name: "FOO".to_string()
            }]
        );
        assert_eq!(
            tags("T∆BAR"),
            vec![TokenTag::StopTrace {
                trace: true,
                name: "BAR".to_string()
            }]
        );
    }

    #[test]
    fn test_glyphs_and_structure() {
        assert_eq!(
            tags("A←1 ◇ B"),
            vec![
                TokenTag::Symbol("A".to_string()),
                TokenTag::Assign,
                TokenTag::Int(1),
                TokenTag::Diamond,
                TokenTag::Symbol("B".to_string()),
            ]
        );
        assert_eq!(
            tags("+/"),
            vec![TokenTag::Prim('+'), TokenTag::Prim('/')]
        );
        assert_eq!(tags("2*3"), vec![
            TokenTag::Int(2),
            TokenTag::Prim('⋆'),
            TokenTag::Int(3)
        ]);
    }

    #[test]
    fn test_comment_runs_to_eol() {
        assert_eq!(tags("1 ⍝ nothing more"), vec![TokenTag::Int(1)]);
    }

    #[test]
    fn test_no_token() {
        let err = tokenize("1 § 2").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoToken);
    }

    #[test]
    fn test_positions_for_carets() {
        let toks = tokenize("A ← 10").unwrap();
        assert_eq!(toks[0].pos, 0);
        assert_eq!(toks[1].pos, 2);
        assert_eq!(toks[2].pos, 4);
    }
}
