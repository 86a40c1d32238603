//! SQL parsing: a hand-written lexer and a recursive-descent parser
//! producing the statement AST.

pub mod ast;
mod lexer;
mod parser;

use crate::error::Result;

pub use ast::Statement;
pub use lexer::{Keyword, Lexer, Position, Token};
pub use parser::Parser;

/// Parses a SQL statement string into an AST.
pub fn parse_sql(sql: &str) -> Result<Statement> {
    Parser::parse(sql)
}
