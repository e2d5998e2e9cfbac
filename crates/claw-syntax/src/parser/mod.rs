//! Recursive-descent parser for Claw.
//!
//! Statements are parsed in `stmt.rs`, expressions in `expr.rs` via a
//! precedence ladder (assignment at the top, primary at the bottom).

mod expr;
mod stmt;

use claw_common::{Diagnostic, Diagnostics, ErrorCode};

use crate::ast::Stmt;
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

/// Parse a whole source text into a program.
pub fn parse(source: &str) -> (Vec<Stmt>, Diagnostics) {
    let tokens = Lexer::new(source).tokenize();
    let mut parser = Parser::new(tokens);
    let program = parser.parse_program();
    (program, parser.into_diagnostics())
}

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    diags: Diagnostics,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            diags: Diagnostics::new(),
        }
    }

    /// Parse statements until end of file.
    pub fn parse_program(&mut self) -> Vec<Stmt> {
        let mut program = Vec::new();
        while !self.is_at_end() {
            match self.statement() {
                Some(stmt) => program.push(stmt),
                None => self.synchronize(),
            }
        }
        program
    }

    pub fn had_error(&self) -> bool {
        self.diags.has_errors()
    }

    pub fn into_diagnostics(self) -> Diagnostics {
        self.diags
    }

    // === Token manipulation ===

    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    pub(crate) fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    pub(crate) fn advance(&mut self) -> Token {
        let token = self.tokens[self.current].clone();
        if !self.is_at_end() {
            self.current += 1;
        }
        token
    }

    pub(crate) fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    pub(crate) fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    /// Consume the expected token or report a syntax error.
    pub(crate) fn expect(&mut self, kind: &TokenKind, message: &str) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            self.error_here(message);
            false
        }
    }

    pub(crate) fn error_here(&mut self, message: &str) {
        let token = self.peek().clone();
        self.error_at(&token, message);
    }

    pub(crate) fn error_at(&mut self, token: &Token, message: &str) {
        let full = format!("{} (found {})", message, token.kind.name());
        self.diags.push(Diagnostic::new(
            ErrorCode::Syntax,
            full,
            token.span,
            token.line,
            token.column,
        ));
    }

    /// Skip tokens until a statement boundary after an error.
    fn synchronize(&mut self) {
        while !self.is_at_end() {
            if self.previous().kind == TokenKind::Semi {
                return;
            }
            match self.peek().kind {
                TokenKind::Let
                | TokenKind::Fn
                | TokenKind::Print
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Return => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// Line/column of the current token, used to position AST nodes.
    pub(crate) fn here(&self) -> (u32, u32) {
        let t = self.peek();
        (t.line, t.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, ExprKind, StmtKind};
    use pretty_assertions::assert_eq;

    fn parse_ok(src: &str) -> Vec<Stmt> {
        let (program, diags) = parse(src);
        assert!(!diags.has_errors(), "unexpected parse errors: {:?}", diags);
        program
    }

    #[test]
    fn test_print_statement() {
        let program = parse_ok("print 1 + 2 * 3;");
        assert_eq!(program.len(), 1);
        match &program[0].kind {
            StmtKind::Print(expr) => match &expr.kind {
                ExprKind::Binary { op, .. } => assert_eq!(*op, BinaryOp::Add),
                other => panic!("expected binary add, got {:?}", other),
            },
            other => panic!("expected print, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence_mul_over_add() {
        let program = parse_ok("print 1 + 2 * 3;");
        let StmtKind::Print(expr) = &program[0].kind else {
            panic!()
        };
        let ExprKind::Binary { op, right, .. } = &expr.kind else {
            panic!()
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_let_and_assignment() {
        let program = parse_ok("let x = 1; x = 2;");
        assert!(matches!(&program[0].kind, StmtKind::Let { name, .. } if name == "x"));
        let StmtKind::Expr(e) = &program[1].kind else {
            panic!()
        };
        assert!(matches!(&e.kind, ExprKind::Assign { name, .. } if name == "x"));
    }

    #[test]
    fn test_compound_index_assign() {
        let program = parse_ok("m[\"k\"] += 1;");
        let StmtKind::Expr(e) = &program[0].kind else {
            panic!()
        };
        assert!(matches!(
            &e.kind,
            ExprKind::CompoundIndexAssign {
                op: BinaryOp::Add,
                ..
            }
        ));
    }

    #[test]
    fn test_fn_declaration() {
        let program = parse_ok("fn add(a, b) { return a + b; }");
        let StmtKind::Fn { name, params, body } = &program[0].kind else {
            panic!()
        };
        assert_eq!(name, "add");
        assert_eq!(params, &vec!["a".to_string(), "b".to_string()]);
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn test_for_loop() {
        let program = parse_ok("for (let i = 0; i < 10; i = i + 1) { print i; }");
        let StmtKind::For {
            init, cond, step, ..
        } = &program[0].kind
        else {
            panic!()
        };
        assert!(init.is_some());
        assert!(cond.is_some());
        assert!(step.is_some());
    }

    #[test]
    fn test_ternary() {
        let program = parse_ok("print true ? 1 : 2;");
        let StmtKind::Print(e) = &program[0].kind else {
            panic!()
        };
        assert!(matches!(e.kind, ExprKind::Ternary { .. }));
    }

    #[test]
    fn test_lambda_expression() {
        let program = parse_ok("let f = fn (x) { return x; };");
        let StmtKind::Let { init: Some(e), .. } = &program[0].kind else {
            panic!()
        };
        assert!(matches!(&e.kind, ExprKind::Lambda { params, .. } if params.len() == 1));
    }

    #[test]
    fn test_array_and_map_literals() {
        let program = parse_ok("let a = [1, 2]; let m = {\"k\": 1};");
        let StmtKind::Let { init: Some(e), .. } = &program[0].kind else {
            panic!()
        };
        assert!(matches!(&e.kind, ExprKind::Array(items) if items.len() == 2));
        let StmtKind::Let { init: Some(e), .. } = &program[1].kind else {
            panic!()
        };
        assert!(matches!(&e.kind, ExprKind::Map(pairs) if pairs.len() == 1));
    }

    #[test]
    fn test_member_chain() {
        let program = parse_ok("print a.b.c;");
        let StmtKind::Print(e) = &program[0].kind else {
            panic!()
        };
        let ExprKind::Member { object, name } = &e.kind else {
            panic!()
        };
        assert_eq!(name, "c");
        assert!(matches!(&object.kind, ExprKind::Member { name, .. } if name == "b"));
    }

    #[test]
    fn test_error_recovery() {
        let (program, diags) = parse("let = 1; print 2;");
        assert!(diags.has_errors());
        // The second statement still parses after synchronization.
        assert!(program
            .iter()
            .any(|s| matches!(s.kind, StmtKind::Print(_))));
    }

    #[test]
    fn test_invalid_assignment_target() {
        let (_, diags) = parse("1 = 2;");
        assert!(diags.has_errors());
    }

    #[test]
    fn test_update_expr() {
        let program = parse_ok("i++;");
        let StmtKind::Expr(e) = &program[0].kind else {
            panic!()
        };
        assert!(matches!(
            &e.kind,
            ExprKind::Update {
                name,
                increment: true
            } if name == "i"
        ));
    }

    #[test]
    fn test_logical_short_circuit_shape() {
        let program = parse_ok("print a && b || c;");
        let StmtKind::Print(e) = &program[0].kind else {
            panic!()
        };
        // `||` binds loosest: (a && b) || c
        assert!(matches!(
            &e.kind,
            ExprKind::Logical {
                op: crate::ast::LogicalOp::Or,
                ..
            }
        ));
    }
}
