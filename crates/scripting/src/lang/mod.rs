//! qbscript language front end
//!
//! Indentation-significant lexer, AST and recursive descent parser.

pub mod lexer;
pub mod ast;
pub mod parser;

pub use lexer::{tokenize, Lexer, Token, TokenKind};
pub use ast::*;
pub use parser::{parse_source, Parser};
