//! Error taxonomy for the APL evaluation core
//!
//! Every failure in cell arithmetic, structural primitives, and the
//! evaluator is an `ErrorKind`. The evaluator wraps a kind into an
//! `AplError` which additionally carries the failing source line and the
//! two caret positions used by the classic APL error report:
//!
//! ```text
//! DOMAIN ERROR
//!       1÷0
//!       ^^
//! ```
//!
//! Cell-level operations return `Result<_, ErrorKind>` (cheap, position
//! free); the evaluator promotes kinds to `AplError` at the point where
//! source positions are known.

use std::fmt;

/// Classification of an evaluation failure, mapped to APL ⎕ET pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Reference to an unbound symbol
    Value,
    /// Parse-time or runtime malformed expression
    Syntax,
    /// Value outside the operation's domain
    Domain,
    /// Mismatched lengths in a dyadic non-scalar context
    Length,
    /// Incompatible ranks
    Rank,
    /// Out-of-range index
    Index,
    /// Axis value not valid for the argument shape
    Axis,
    /// Malformed selective-assignment target
    LeftSyntax,
    /// Function called with an adicity it does not implement
    Valence,
    /// Soft interrupt requested
    Interrupt,
    /// Non-APL character in source
    NoToken,
    /// String literal not terminated
    StringEnd,
}

impl ErrorKind {
    /// Error name as displayed in the first line of the report
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Value => "VALUE ERROR",
            ErrorKind::Syntax => "SYNTAX ERROR",
            ErrorKind::Domain => "DOMAIN ERROR",
            ErrorKind::Length => "LENGTH ERROR",
            ErrorKind::Rank => "RANK ERROR",
            ErrorKind::Index => "INDEX ERROR",
            ErrorKind::Axis => "AXIS ERROR",
            ErrorKind::LeftSyntax => "LEFT SYNTAX ERROR",
            ErrorKind::Valence => "VALENCE ERROR",
            ErrorKind::Interrupt => "INTERRUPT",
            ErrorKind::NoToken => "NO TOKEN",
            ErrorKind::StringEnd => "STRING NOT TERMINATED",
        }
    }

    /// The (major, minor) ⎕ET pair for this kind
    pub fn et(self) -> (i64, i64) {
        match self {
            ErrorKind::Interrupt => (1, 1),
            ErrorKind::Syntax => (2, 1),
            ErrorKind::NoToken => (2, 2),
            ErrorKind::StringEnd => (2, 3),
            ErrorKind::LeftSyntax => (2, 4),
            ErrorKind::Value => (3, 1),
            ErrorKind::Valence => (5, 1),
            ErrorKind::Rank => (5, 2),
            ErrorKind::Length => (5, 3),
            ErrorKind::Domain => (5, 4),
            ErrorKind::Index => (5, 5),
            ErrorKind::Axis => (5, 6),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An evaluation failure with optional source context
///
/// The caret columns are 0-indexed offsets into `line`: `caret_fail` marks
/// the token that failed, `caret_expr` the start of the containing
/// expression.
#[derive(Debug, Clone, PartialEq)]
pub struct AplError {
    pub kind: ErrorKind,
    /// Extra detail, e.g. the name of the unbound symbol
    pub info: Option<String>,
    /// The source line being evaluated when the error surfaced
    pub line: Option<String>,
    pub caret_fail: Option<usize>,
    pub caret_expr: Option<usize>,
}

impl AplError {
    pub fn new(kind: ErrorKind) -> Self {
        AplError {
            kind,
            info: None,
            line: None,
            caret_fail: None,
            caret_expr: None,
        }
    }

    pub fn with_info(kind: ErrorKind, info: impl Into<String>) -> Self {
        AplError {
            info: Some(info.into()),
            ..AplError::new(kind)
        }
    }

    /// Record the failing column before the source line is known — the
    /// parser knows the token, only the frame knows the line
    pub fn set_caret(&mut self, caret_fail: usize) {
        if self.caret_fail.is_none() {
            self.caret_fail = Some(caret_fail);
            self.caret_expr = Some(caret_fail);
        }
    }

    /// Attach source context once, at the frame that knows it. Carets
    /// already recorded by the tokenizer or parser are kept.
    pub fn set_position(&mut self, line: &str, caret_fail: usize, caret_expr: usize) {
        if self.line.is_none() {
            self.line = Some(line.to_string());
            if self.caret_fail.is_none() {
                self.caret_fail = Some(caret_fail);
                self.caret_expr = Some(caret_expr);
            }
        }
    }

    /// The classic multi-line error report: name, source line, carets
    pub fn report(&self) -> String {
        let mut out = String::new();
        out.push_str(self.kind.name());
        if let Some(info) = &self.info {
            out.push_str(": ");
            out.push_str(info);
        }
        if let Some(line) = &self.line {
            out.push('\n');
            out.push_str("      ");
            out.push_str(line);
            let fail = self.caret_fail.unwrap_or(0);
            let expr = self.caret_expr.unwrap_or(fail);
            let (lo, hi) = if expr <= fail { (expr, fail) } else { (fail, expr) };
            out.push('\n');
            out.push_str("      ");
            for col in 0..=hi {
                if col == lo || col == hi {
                    out.push('^');
                } else {
                    out.push(' ');
                }
            }
        }
        out
    }
}

impl fmt::Display for AplError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.report())
    }
}

impl std::error::Error for AplError {}

impl From<ErrorKind> for AplError {
    fn from(kind: ErrorKind) -> Self {
        AplError::new(kind)
    }
}

/// Result alias used throughout the workspace
pub type Result<T> = std::result::Result<T, AplError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names() {
        assert_eq!(ErrorKind::Domain.name(), "DOMAIN ERROR");
        assert_eq!(ErrorKind::Value.name(), "VALUE ERROR");
    }

    #[test]
    fn test_et_pairs_unique() {
        use std::collections::HashSet;
        let kinds = [
            ErrorKind::Value,
            ErrorKind::Syntax,
            ErrorKind::Domain,
            ErrorKind::Length,
            ErrorKind::Rank,
            ErrorKind::Index,
            ErrorKind::Axis,
            ErrorKind::LeftSyntax,
            ErrorKind::Valence,
            ErrorKind::Interrupt,
            ErrorKind::NoToken,
            ErrorKind::StringEnd,
        ];
        let pairs: HashSet<_> = kinds.iter().map(|k| k.et()).collect();
        assert_eq!(pairs.len(), kinds.len());
    }

    #[test]
    fn test_report_carets() {
        let mut e = AplError::new(ErrorKind::Domain);
        e.set_position("1÷0", 2, 0);
        let report = e.report();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "DOMAIN ERROR");
        assert_eq!(lines[1], "      1÷0");
        assert_eq!(lines[2], "      ^ ^");
    }

    #[test]
    fn test_position_set_once() {
        let mut e = AplError::new(ErrorKind::Length);
        e.set_position("first", 1, 0);
        e.set_position("second", 3, 2);
        assert_eq!(e.line.as_deref(), Some("first"));
    }

    #[test]
    fn test_early_caret_survives_set_position() {
        let mut e = AplError::new(ErrorKind::Syntax);
        e.set_caret(5);
        e.set_position("A B C D E F", 0, 0);
        assert_eq!(e.caret_fail, Some(5));
        assert_eq!(e.line.as_deref(), Some("A B C D E F"));
    }
}
