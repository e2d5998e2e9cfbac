//! # claw-syntax
//!
//! Lexer, AST and parser for the Claw language.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::{BinaryOp, Expr, ExprKind, LogicalOp, Stmt, StmtKind, UnaryOp};
pub use lexer::Lexer;
pub use parser::Parser;
pub use token::{Token, TokenKind};
