//! apl-parser: source text → executable token statements
//!
//! The tokenizer turns a source line into a flat token stream with source
//! columns; the parser splits at ◇, groups brackets, braces and literal
//! runs, and marks assignment targets. The runtime's prefix parser consumes
//! the result right-to-left.

pub mod parser;
pub mod token;
pub mod tokenizer;

pub use parser::{parse_line, parse_tokens};
pub use token::{OPERATOR_GLYPHS, PRIMITIVE_GLYPHS, QUAD_NAMES, QuadName, Tok, TokenTag};
pub use tokenizer::tokenize;
