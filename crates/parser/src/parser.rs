//! Token stream → executable statements
//!
//! Two passes over the tokenizer output:
//!
//! 1. split the stream at ◇ into statements;
//! 2. within each statement: match and group brackets (`[…;…]` becomes one
//!    index token, `{…}` one lambda token), remove redundant parentheses,
//!    collapse runs of adjacent constants into a single value token, and
//!    mark the symbols left of `←` as assignment targets.
//!
//! Mismatched brackets raise SYNTAX_ERROR; an empty statement becomes a
//! single void token.

use crate::token::{Tok, TokenTag};
use apl_core::{AplError, Cell, ErrorKind, Result, Value};
use std::sync::Arc;

/// Tokenize and parse one source line into executable statements
pub fn parse_line(line: &str) -> Result<Vec<Vec<Tok>>> {
    parse_tokens(crate::tokenizer::tokenize(line)?)
}

/// Parse an already-tokenized stream into executable statements
pub fn parse_tokens(toks: Vec<Tok>) -> Result<Vec<Vec<Tok>>> {
    let mut statements = Vec::new();
    for stmt in split_statements(toks) {
        statements.push(parse_statement(stmt)?);
    }
    Ok(statements)
}

/// Split at ◇, but not inside brackets or braces: a diamond within a
/// lambda body separates the lambda's own statements
fn split_statements(toks: Vec<Tok>) -> Vec<Vec<Tok>> {
    let mut out = Vec::new();
    let mut cur = Vec::new();
    let mut depth = 0usize;
    for t in toks {
        match t.tag {
            TokenTag::LParen | TokenTag::LBracket | TokenTag::LBrace => depth += 1,
            TokenTag::RParen | TokenTag::RBracket | TokenTag::RBrace => {
                depth = depth.saturating_sub(1)
            }
            TokenTag::Diamond if depth == 0 => {
                out.push(std::mem::take(&mut cur));
                continue;
            }
            _ => {}
        }
        cur.push(t);
    }
    out.push(cur);
    out
}

fn parse_statement(toks: Vec<Tok>) -> Result<Vec<Tok>> {
    if toks.is_empty() {
        return Ok(vec![Tok::new(TokenTag::Void, 0)]);
    }
    let grouped = group_brackets(&mut toks.into_iter().peekable(), None)?;
    let mut out = remove_redundant_parens(grouped);
    out = collapse_literals(out);
    mark_assign_targets(&mut out)?;
    Ok(out)
}

type TokIter = std::iter::Peekable<std::vec::IntoIter<Tok>>;

/// Recursively group `[…]` into index tokens and `{…}` into lambda tokens.
/// `until` is the closing tag we are owed (with the opener's column for
/// the caret of an unterminated group), or None at top level.
fn group_brackets(
    iter: &mut TokIter,
    until: Option<(&TokenTag, usize)>,
) -> Result<Vec<Tok>> {
    let mut out = Vec::new();
    loop {
        let Some(t) = iter.next() else {
            return match until {
                None => Ok(out),
                Some((_, open_pos)) => Err(caret_error(ErrorKind::Syntax, open_pos)),
            };
        };
        match &t.tag {
            tag if Some(tag) == until.map(|(u, _)| u) => return Ok(out),
            TokenTag::RParen | TokenTag::RBracket | TokenTag::RBrace => {
                // closer we were not owed
                return Err(caret_error(ErrorKind::Syntax, t.pos));
            }
            TokenTag::LBracket => {
                let inner = group_brackets(iter, Some((&TokenTag::RBracket, t.pos)))?;
                let mut slots = Vec::new();
                let mut cur = Vec::new();
                for it in inner {
                    if matches!(it.tag, TokenTag::Semicolon) {
                        slots.push(finish_slot(std::mem::take(&mut cur)));
                    } else {
                        cur.push(it);
                    }
                }
                slots.push(finish_slot(cur));
                out.push(Tok::new(TokenTag::Index(slots), t.pos));
            }
            TokenTag::LBrace => {
                let inner = group_brackets(iter, Some((&TokenTag::RBrace, t.pos)))?;
                let body = collapse_literals(remove_redundant_parens(inner));
                out.push(Tok::new(TokenTag::Lambda(body), t.pos));
            }
            TokenTag::LParen => {
                let inner = group_brackets(iter, Some((&TokenTag::RParen, t.pos)))?;
                // re-wrap: parens stay as tokens for the prefix parser,
                // with their contents grouped
                out.push(Tok::new(TokenTag::LParen, t.pos));
                out.extend(inner);
                out.push(Tok::new(TokenTag::RParen, t.pos));
            }
            _ => out.push(t),
        }
    }
}

fn finish_slot(toks: Vec<Tok>) -> Vec<Tok> {
    collapse_literals(remove_redundant_parens(toks))
}

/// An error carrying the failing token's column; the evaluator attaches
/// the source line later without disturbing the caret
fn caret_error(kind: ErrorKind, pos: usize) -> AplError {
    let mut e = AplError::new(kind);
    e.set_caret(pos);
    e
}

/// `(X) → X` for a single token X, repeated to a fixpoint so that
/// `((X))` also collapses
fn remove_redundant_parens(mut toks: Vec<Tok>) -> Vec<Tok> {
    loop {
        let mut changed = false;
        let mut out: Vec<Tok> = Vec::with_capacity(toks.len());
        let mut i = 0;
        while i < toks.len() {
            let single = i + 2 < toks.len()
                && matches!(toks[i].tag, TokenTag::LParen)
                && matches!(toks[i + 2].tag, TokenTag::RParen)
                && !matches!(toks[i + 1].tag, TokenTag::LParen | TokenTag::RParen);
            if single {
                out.push(toks[i + 1].clone());
                i += 3;
                changed = true;
            } else {
                out.push(toks[i].clone());
                i += 1;
            }
        }
        toks = out;
        if !changed {
            return toks;
        }
    }
}

/// Merge runs of adjacent constant tokens into one value token.
///
/// A lone string still becomes a value (a character vector); in a mixed run
/// a multi-character string contributes an enclosed element.
fn collapse_literals(toks: Vec<Tok>) -> Vec<Tok> {
    let mut out: Vec<Tok> = Vec::with_capacity(toks.len());
    let mut i = 0;
    while i < toks.len() {
        if !toks[i].is_literal() {
            out.push(toks[i].clone());
            i += 1;
            continue;
        }
        let start = i;
        while i < toks.len() && toks[i].is_literal() {
            i += 1;
        }
        let run = &toks[start..i];
        out.push(Tok::new(TokenTag::Value(literal_run(run)), run[0].pos));
    }
    out
}

fn literal_run(run: &[Tok]) -> Value {
    if run.len() == 1 {
        return match &run[0].tag {
            TokenTag::Int(n) => Value::scalar(Cell::Int(*n)),
            TokenTag::Float(f) => Value::scalar(Cell::Float(*f)),
            TokenTag::Complex(z) => Value::scalar(Cell::Complex(*z)),
            TokenTag::Chars(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Value::scalar(Cell::Char(c)),
                    _ => Value::char_vector(s),
                }
            }
            _ => unreachable!("literal_run on non-literal"),
        };
    }
    let cells: Vec<Cell> = run
        .iter()
        .map(|t| match &t.tag {
            TokenTag::Int(n) => Cell::Int(*n),
            TokenTag::Float(f) => Cell::Float(*f),
            TokenTag::Complex(z) => Cell::Complex(*z),
            TokenTag::Chars(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Cell::Char(c),
                    _ => Cell::Pointer(Arc::new(Value::char_vector(s))),
                }
            }
            _ => unreachable!("literal_run on non-literal"),
        })
        .collect();
    Value::vector(cells)
}

/// Mark symbols to the left of ← as assignment targets: `A←`, `A[…]←`,
/// and `(A B C)←` (each inner symbol becomes part of an L-SYMB2 token).
fn mark_assign_targets(toks: &mut Vec<Tok>) -> Result<()> {
    let mut i = 0;
    while i < toks.len() {
        if !matches!(toks[i].tag, TokenTag::Assign) {
            i += 1;
            continue;
        }
        if i == 0 {
            return Err(caret_error(ErrorKind::LeftSyntax, toks[i].pos));
        }
        match &toks[i - 1].tag {
            TokenTag::Symbol(name) => {
                let name = name.clone();
                toks[i - 1].tag = TokenTag::LSymb(name);
            }
            TokenTag::Index(_) => {
                // A[…]← — the symbol sits one further left
                if i >= 2 {
                    if let TokenTag::Symbol(name) = &toks[i - 2].tag {
                        let name = name.clone();
                        toks[i - 2].tag = TokenTag::LSymb(name);
                    }
                }
            }
            TokenTag::RParen => {
                // (A B C)← — all symbols inside become one L-SYMB2 token
                let close = i - 1;
                let open = (0..close)
                    .rev()
                    .find(|&j| matches!(toks[j].tag, TokenTag::LParen))
                    .ok_or_else(|| caret_error(ErrorKind::LeftSyntax, toks[close].pos))?;
                let inner = &toks[open + 1..close];
                if !inner.is_empty()
                    && inner
                        .iter()
                        .all(|t| matches!(t.tag, TokenTag::Symbol(_)))
                {
                    let names: Vec<String> = inner
                        .iter()
                        .map(|t| match &t.tag {
                            TokenTag::Symbol(n) => n.clone(),
                            _ => unreachable!(),
                        })
                        .collect();
                    let pos = toks[open].pos;
                    toks.splice(open..=close, [Tok::new(TokenTag::LSymb2(names), pos)]);
                    i = open + 1;
                    continue;
                }
                // selective assignment (A[I])← — rewrite to the indexed
                // target form A[I]← and mark the symbol
                if inner.len() == 2
                    && matches!(inner[0].tag, TokenTag::Symbol(_))
                    && matches!(inner[1].tag, TokenTag::Index(_))
                {
                    let name = match &inner[0].tag {
                        TokenTag::Symbol(n) => n.clone(),
                        _ => unreachable!(),
                    };
                    let mut rewritten = vec![
                        Tok::new(TokenTag::LSymb(name), toks[open].pos),
                        inner[1].clone(),
                    ];
                    let tail: Vec<Tok> = toks[close + 1..].to_vec();
                    rewritten.extend(tail);
                    toks.truncate(open);
                    toks.extend(rewritten);
                    i = open + 2;
                    continue;
                }
            }
            TokenTag::Quad(_) => {}
            TokenTag::Value(_) | TokenTag::StopTrace { .. } => {}
            _ => return Err(caret_error(ErrorKind::LeftSyntax, toks[i - 1].pos)),
        }
        i += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::QuadName;

    fn one(line: &str) -> Vec<Tok> {
        let mut stmts = parse_line(line).unwrap();
        assert_eq!(stmts.len(), 1);
        stmts.pop().unwrap()
    }

    #[test]
    fn test_statement_split() {
        let stmts = parse_line("1 ◇ 2 ◇ 3").unwrap();
        assert_eq!(stmts.len(), 3);
    }

    #[test]
    fn test_empty_statement_is_void() {
        let stmts = parse_line("1 ◇ ◇ 3").unwrap();
        assert_eq!(stmts[1], vec![Tok::new(TokenTag::Void, 0)]);
    }

    #[test]
    fn test_vector_literal_collapse() {
        let toks = one("1 2 3");
        assert_eq!(toks.len(), 1);
        match &toks[0].tag {
            TokenTag::Value(v) => {
                assert_eq!(v.shape().items(), &[3]);
                assert_eq!(v.ravel()[0], Cell::Int(1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_mixed_literal_run_nests_strings() {
        let toks = one("1 'ab' 2");
        match &toks[0].tag {
            TokenTag::Value(v) => {
                assert_eq!(v.element_count(), 3);
                assert!(matches!(v.ravel()[1], Cell::Pointer(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_redundant_paren_removal() {
        let toks = one("(1)");
        assert!(matches!(toks[0].tag, TokenTag::Value(_)));
        assert_eq!(toks.len(), 1);
    }

    #[test]
    fn test_kept_parens_around_expressions() {
        let toks = one("(1+2)×3");
        assert!(matches!(toks[0].tag, TokenTag::LParen));
        assert!(matches!(toks.last().unwrap().tag, TokenTag::Value(_)));
    }

    #[test]
    fn test_index_grouping() {
        let toks = one("A[1;2]");
        assert_eq!(toks.len(), 2);
        match &toks[1].tag {
            TokenTag::Index(slots) => {
                assert_eq!(slots.len(), 2);
                assert!(matches!(slots[0][0].tag, TokenTag::Value(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_elided_index_slot() {
        let toks = one("A[;2]");
        match &toks[1].tag {
            TokenTag::Index(slots) => {
                assert_eq!(slots.len(), 2);
                assert!(slots[0].is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_lambda_grouping() {
        let toks = one("{⍵+1}");
        match &toks[0].tag {
            TokenTag::Lambda(body) => {
                assert!(matches!(body[0].tag, TokenTag::Symbol(ref s) if s == "⍵"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_assign_marking() {
        let toks = one("A←1");
        assert!(matches!(toks[0].tag, TokenTag::LSymb(ref n) if n == "A"));
    }

    #[test]
    fn test_indexed_assign_marking() {
        let toks = one("A[2]←1");
        assert!(matches!(toks[0].tag, TokenTag::LSymb(ref n) if n == "A"));
        assert!(matches!(toks[1].tag, TokenTag::Index(_)));
    }

    #[test]
    fn test_multi_assign_marking() {
        let toks = one("(A B C)←1 2 3");
        match &toks[0].tag {
            TokenTag::LSymb2(names) => assert_eq!(names, &["A", "B", "C"]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_mismatched_brackets() {
        // the caret lands on the unmatched opener
        let err = parse_line("(1+2").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.caret_fail, Some(0));

        // or on the closer nobody was owed
        let err = parse_line("1)").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.caret_fail, Some(1));

        let err = parse_line("A[1").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.caret_fail, Some(1));
    }

    #[test]
    fn test_bad_assign_target_caret() {
        let err = parse_line("+←1").unwrap_err();
        assert_eq!(err.kind, ErrorKind::LeftSyntax);
        assert_eq!(err.caret_fail, Some(0));
    }

    #[test]
    fn test_quad_assign_allowed() {
        let toks = one("⎕IO←0");
        assert!(matches!(toks[0].tag, TokenTag::Quad(QuadName::Io)));
        assert!(matches!(toks[1].tag, TokenTag::Assign));
    }
}
