//! Front end (source text → tokens → AST)

pub mod ast;
pub mod lex;
pub mod parse;
pub mod span;

pub use parse::{parse_exp, parse_program};
