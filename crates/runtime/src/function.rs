//! User-defined functions
//!
//! A defined function is its header (result, argument and local names),
//! its canonical text, and one parsed token body per line. Execution
//! starts at line 1; labels (`LAB: …`) bind their line number as
//! LABEL-class symbols on entry. Lambdas (`{…}`) are functions with the
//! implicit header `Z←⍺ F ⍵`.

use apl_core::{AplError, ErrorKind, Result};
use apl_parser::{QuadName, Tok, TokenTag, parse_tokens, tokenize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Adicity {
    Niladic,
    Monadic,
    Dyadic,
}

#[derive(Debug, Clone)]
pub struct Header {
    pub result: Option<String>,
    pub left: Option<String>,
    pub fname: String,
    pub right: Option<String>,
    /// Local names after ';'
    pub locals: Vec<String>,
    /// Localised system variables after ';'
    pub quad_locals: Vec<QuadName>,
}

impl Header {
    pub fn adicity(&self) -> Adicity {
        match (&self.left, &self.right) {
            (Some(_), Some(_)) => Adicity::Dyadic,
            (None, Some(_)) => Adicity::Monadic,
            _ => Adicity::Niladic,
        }
    }
}

/// One line: statements, plus the label that prefixed it (if any)
#[derive(Debug, Clone)]
pub struct FunLine {
    pub label: Option<String>,
    pub statements: Vec<Vec<Tok>>,
}

#[derive(Debug, Clone)]
pub struct UserFunction {
    pub header: Header,
    /// Canonical text, line 0 being the header
    pub text: Vec<String>,
    /// Parsed bodies; index 0 is a placeholder for the header
    pub lines: Vec<FunLine>,
    /// (label, line number) pairs in body order
    pub labels: Vec<(String, usize)>,
}

impl UserFunction {
    pub fn name(&self) -> &str {
        &self.header.fname
    }

    /// Fix a function from its text lines (the ⎕FX / ∇ path)
    pub fn fix(lines: &[String]) -> Result<UserFunction> {
        if lines.is_empty() {
            return Err(AplError::new(ErrorKind::Domain));
        }
        let header = parse_header(&lines[0])?;
        let mut fun_lines = vec![FunLine {
            label: None,
            statements: Vec::new(),
        }];
        let mut labels = Vec::new();
        for (ix, text) in lines.iter().enumerate().skip(1) {
            let mut toks = tokenize(text)?;
            let label = strip_label(&mut toks);
            if let Some(name) = &label {
                labels.push((name.clone(), ix));
            }
            let statements = parse_tokens(toks)?;
            fun_lines.push(FunLine { label, statements });
        }
        Ok(UserFunction {
            header,
            text: lines.to_vec(),
            lines: fun_lines,
            labels,
        })
    }

    /// Build a lambda from its grouped body tokens: implicit header
    /// `λ←⍺ λλ ⍵`, body on line 1
    pub fn lambda(body: Vec<Tok>) -> Result<UserFunction> {
        let statements = parse_tokens(body)?;
        let header = Header {
            result: Some("λ".to_string()),
            left: Some("⍺".to_string()),
            fname: "λλ".to_string(),
            right: Some("⍵".to_string()),
            locals: Vec::new(),
            quad_locals: Vec::new(),
        };
        Ok(UserFunction {
            header,
            text: Vec::new(),
            lines: vec![
                FunLine {
                    label: None,
                    statements: Vec::new(),
                },
                FunLine {
                    label: None,
                    statements,
                },
            ],
            labels: Vec::new(),
        })
    }

    pub fn is_lambda(&self) -> bool {
        self.header.fname == "λλ"
    }

    /// The line a label names, if any
    pub fn label_line(&self, name: &str) -> Option<usize> {
        self.labels
            .iter()
            .find(|(l, _)| l == name)
            .map(|&(_, line)| line)
    }

    /// Canonical representation: the text lines (⎕CR)
    pub fn canonical_text(&self) -> &[String] {
        &self.text
    }
}

/// `LAB:` at the start of a line; removed from the token stream
fn strip_label(toks: &mut Vec<Tok>) -> Option<String> {
    if toks.len() >= 2
        && matches!(toks[1].tag, TokenTag::Colon)
        && matches!(toks[0].tag, TokenTag::Symbol(_))
    {
        let name = match &toks[0].tag {
            TokenTag::Symbol(n) => n.clone(),
            _ => unreachable!(),
        };
        toks.drain(..2);
        return Some(name);
    }
    None
}

/// Parse a header line: `[Z←] [A] F [B] [;local ;⎕VAR …]`
fn parse_header(line: &str) -> Result<Header> {
    let toks = tokenize(line)?;
    let mut iter = toks.into_iter().peekable();

    let mut names: Vec<String> = Vec::new();
    let mut result = None;

    // the part before any ';'
    let mut saw_assign = false;
    for t in iter.by_ref() {
        match t.tag {
            TokenTag::Semicolon => break,
            TokenTag::Assign => {
                if saw_assign || names.len() != 1 {
                    return Err(AplError::new(ErrorKind::Syntax));
                }
                result = names.pop();
                saw_assign = true;
            }
            TokenTag::Symbol(n) => {
                names.push(n);
                if names.len() > 3 {
                    return Err(AplError::new(ErrorKind::Syntax));
                }
            }
            _ => return Err(AplError::new(ErrorKind::Syntax)),
        }
    }

    let (left, fname, right) = match names.len() {
        1 => (None, names[0].clone(), None),
        2 => (None, names[0].clone(), Some(names[1].clone())),
        3 => (
            Some(names[0].clone()),
            names[1].clone(),
            Some(names[2].clone()),
        ),
        _ => return Err(AplError::new(ErrorKind::Syntax)),
    };

    // the locals: `;name ;⎕IO …` — the first Semicolon was consumed above
    let mut locals = Vec::new();
    let mut quad_locals = Vec::new();
    let mut expect_name = true;
    for t in iter {
        match t.tag {
            TokenTag::Semicolon => expect_name = true,
            TokenTag::Symbol(n) if expect_name => {
                locals.push(n);
                expect_name = false;
            }
            TokenTag::Quad(q) if expect_name && q.is_variable() => {
                quad_locals.push(q);
                expect_name = false;
            }
            _ => return Err(AplError::new(ErrorKind::Syntax)),
        }
    }

    Ok(Header {
        result,
        left,
        fname,
        right,
        locals,
        quad_locals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_forms() {
        let h = parse_header("Z←A F B").unwrap();
        assert_eq!(h.result.as_deref(), Some("Z"));
        assert_eq!(h.left.as_deref(), Some("A"));
        assert_eq!(h.fname, "F");
        assert_eq!(h.right.as_deref(), Some("B"));
        assert_eq!(h.adicity(), Adicity::Dyadic);

        let h = parse_header("Z←F B").unwrap();
        assert_eq!(h.adicity(), Adicity::Monadic);
        assert!(h.left.is_none());

        let h = parse_header("F").unwrap();
        assert_eq!(h.adicity(), Adicity::Niladic);
        assert!(h.result.is_none());
    }

    #[test]
    fn test_header_locals() {
        let h = parse_header("Z←F B;T;⎕IO;U").unwrap();
        assert_eq!(h.locals, vec!["T", "U"]);
        assert_eq!(h.quad_locals, vec![QuadName::Io]);
    }

    #[test]
    fn test_bad_header() {
        assert!(parse_header("Z←A F B C").is_err());
        assert!(parse_header("←F").is_err());
    }

    #[test]
    fn test_fix_with_labels() {
        let lines = vec![
            "Z←F B".to_string(),
            "Z←B".to_string(),
            "AGAIN: Z←Z+1".to_string(),
        ];
        let f = UserFunction::fix(&lines).unwrap();
        assert_eq!(f.label_line("AGAIN"), Some(2));
        assert_eq!(f.lines.len(), 3);
        assert!(f.lines[2].label.is_some());
    }

    #[test]
    fn test_lambda() {
        let toks = tokenize("⍵+1").unwrap();
        let f = UserFunction::lambda(toks).unwrap();
        assert!(f.is_lambda());
        assert_eq!(f.header.adicity(), Adicity::Dyadic);
        assert_eq!(f.lines[1].statements.len(), 1);
    }
}
