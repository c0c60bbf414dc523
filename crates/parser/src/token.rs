//! Tokens: the unit of parsing and execution
//!
//! The tokenizer emits a flat stream of `Tok`s with source columns; the
//! parser groups literals into value tokens, brackets into index tokens and
//! braces into lambda tokens, and marks assignment targets.

use apl_core::{Complex64, Value};
use std::fmt;

/// System names (⎕XY), greedy-matched longest-first by the tokenizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuadName {
    /// Bare ⎕: output/input conduit
    Quad,
    Io,
    Ct,
    Pp,
    Pw,
    Fc,
    Ps,
    Rl,
    Tz,
    Lx,
    Ai,
    Em,
    Et,
    Nc,
    Ex,
    Fx,
    Cr,
    Ucs,
    Ea,
    Ec,
    Tf,
    Syl,
}

/// Table used for greedy matching; longer names first
pub const QUAD_NAMES: &[(&str, QuadName)] = &[
    ("UCS", QuadName::Ucs),
    ("SYL", QuadName::Syl),
    ("AI", QuadName::Ai),
    ("CR", QuadName::Cr),
    ("CT", QuadName::Ct),
    ("EA", QuadName::Ea),
    ("EC", QuadName::Ec),
    ("EM", QuadName::Em),
    ("ET", QuadName::Et),
    ("EX", QuadName::Ex),
    ("FC", QuadName::Fc),
    ("FX", QuadName::Fx),
    ("IO", QuadName::Io),
    ("LX", QuadName::Lx),
    ("NC", QuadName::Nc),
    ("PP", QuadName::Pp),
    ("PS", QuadName::Ps),
    ("PW", QuadName::Pw),
    ("RL", QuadName::Rl),
    ("TF", QuadName::Tf),
    ("TZ", QuadName::Tz),
];

impl QuadName {
    pub fn as_str(self) -> &'static str {
        match self {
            QuadName::Quad => "",
            QuadName::Io => "IO",
            QuadName::Ct => "CT",
            QuadName::Pp => "PP",
            QuadName::Pw => "PW",
            QuadName::Fc => "FC",
            QuadName::Ps => "PS",
            QuadName::Rl => "RL",
            QuadName::Tz => "TZ",
            QuadName::Lx => "LX",
            QuadName::Ai => "AI",
            QuadName::Em => "EM",
            QuadName::Et => "ET",
            QuadName::Nc => "NC",
            QuadName::Ex => "EX",
            QuadName::Fx => "FX",
            QuadName::Cr => "CR",
            QuadName::Ucs => "UCS",
            QuadName::Ea => "EA",
            QuadName::Ec => "EC",
            QuadName::Tf => "TF",
            QuadName::Syl => "SYL",
        }
    }

    /// True for the stateful system variables (as opposed to functions)
    pub fn is_variable(self) -> bool {
        matches!(
            self,
            QuadName::Quad
                | QuadName::Io
                | QuadName::Ct
                | QuadName::Pp
                | QuadName::Pw
                | QuadName::Fc
                | QuadName::Ps
                | QuadName::Rl
                | QuadName::Tz
                | QuadName::Lx
                | QuadName::Ai
                | QuadName::Em
                | QuadName::Et
                | QuadName::Syl
        )
    }
}

impl fmt::Display for QuadName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "⎕{}", self.as_str())
    }
}

/// The tag of a token
#[derive(Debug, Clone, PartialEq)]
pub enum TokenTag {
    /// Integer constant
    Int(i64),
    /// Float constant
    Float(f64),
    /// Complex constant
    Complex(Complex64),
    /// Quoted string constant
    Chars(String),
    /// Grouped constant value (vector literal, string) made by the parser
    Value(Value),
    /// User symbol reference
    Symbol(String),
    /// Symbol marked as assignment target
    LSymb(String),
    /// Symbols of a parenthesised multi-assignment target `(A B C)←`
    LSymb2(Vec<String>),
    /// System name
    Quad(QuadName),
    /// Primitive function or operator glyph
    Prim(char),
    /// ←
    Assign,
    /// →
    Branch,
    /// ◇ statement separator
    Diamond,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    /// ; inside brackets (grouped away by the parser)
    Semicolon,
    /// : after a line label in a defined function
    Colon,
    /// Grouped bracket expression `[i1;i2;…]`; empty slots elide an axis
    Index(Vec<Vec<Tok>>),
    /// Grouped brace expression `{ … }` (anonymous function body)
    Lambda(Vec<Tok>),
    /// S∆name / T∆name stop- or trace-set reference
    StopTrace { trace: bool, name: String },
    /// Empty statement
    Void,
}

/// A token with its 0-indexed source column (for the caret display)
#[derive(Debug, Clone, PartialEq)]
pub struct Tok {
    pub tag: TokenTag,
    pub pos: usize,
}

impl Tok {
    pub fn new(tag: TokenTag, pos: usize) -> Self {
        Tok { tag, pos }
    }

    /// True for tokens the parser may merge into a vector literal
    pub fn is_literal(&self) -> bool {
        matches!(
            self.tag,
            TokenTag::Int(_) | TokenTag::Float(_) | TokenTag::Complex(_) | TokenTag::Chars(_)
        )
    }
}

/// Every primitive glyph the tokenizer accepts
pub const PRIMITIVE_GLYPHS: &str = "+-×÷⋆*⍟|⌈⌊!○?∊⍴~↑↓⍳⌹⊂⊃∪∩⌷⍋⍒⍉⌽⊖⍕⍎<≤=≥>≠∨∧⍱⍲,⍪⊤⊥≡≢⊣⊢/\\⌿⍀¨⍨⍣⍤∘.";

/// Glyphs that are operators (take function operands)
pub const OPERATOR_GLYPHS: &str = "/\\⌿⍀¨⍨⍣⍤.∘";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_table_sorted_for_greedy_match() {
        // longest-first within a common prefix: UCS before CT is irrelevant,
        // but every 3-letter name must come before its 2-letter prefixes
        let ucs_pos = QUAD_NAMES.iter().position(|(n, _)| *n == "UCS").unwrap();
        let ct_pos = QUAD_NAMES.iter().position(|(n, _)| *n == "CT").unwrap();
        assert!(ucs_pos < ct_pos);
    }

    #[test]
    fn test_operator_glyphs_are_primitives() {
        for g in OPERATOR_GLYPHS.chars() {
            assert!(PRIMITIVE_GLYPHS.contains(g), "{} missing", g);
        }
    }
}
