//! Statement parsing.

use crate::ast::{Stmt, StmtKind};
use crate::token::TokenKind;

use super::Parser;

impl Parser {
    /// Parse one statement. Returns None after reporting a syntax error.
    pub(crate) fn statement(&mut self) -> Option<Stmt> {
        let (line, column) = self.here();
        let kind = match self.peek().kind {
            TokenKind::Let => self.let_statement()?,
            TokenKind::Fn => {
                // `fn name(...)` is a declaration; a bare `fn (...)` is a
                // lambda expression statement.
                if matches!(self.peek_next_kind(), Some(TokenKind::Ident(_))) {
                    self.fn_statement()?
                } else {
                    self.expr_statement()?
                }
            }
            TokenKind::Print => self.print_statement()?,
            TokenKind::If => self.if_statement()?,
            TokenKind::While => self.while_statement()?,
            TokenKind::For => self.for_statement()?,
            TokenKind::Return => self.return_statement()?,
            TokenKind::LBrace => self.block_statement()?,
            _ => self.expr_statement()?,
        };
        Some(Stmt { kind, line, column })
    }

    fn peek_next_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.current + 1).map(|t| t.kind.clone())
    }

    fn let_statement(&mut self) -> Option<StmtKind> {
        self.advance(); // let
        let name = self.expect_ident("Expected variable name after 'let'.")?;
        let init = if self.matches(&TokenKind::Eq) {
            Some(self.expression()?)
        } else {
            None
        };
        self.expect(&TokenKind::Semi, "Expected ';' after variable declaration.");
        Some(StmtKind::Let { name, init })
    }

    fn fn_statement(&mut self) -> Option<StmtKind> {
        self.advance(); // fn
        let name = self.expect_ident("Expected function name after 'fn'.")?;
        let params = self.parameter_list()?;
        let body = self.function_body()?;
        Some(StmtKind::Fn { name, params, body })
    }

    pub(crate) fn parameter_list(&mut self) -> Option<Vec<String>> {
        if !self.expect(&TokenKind::LParen, "Expected '(' after function name.") {
            return None;
        }
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                params.push(self.expect_ident("Expected parameter name.")?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "Expected ')' after parameters.");
        Some(params)
    }

    pub(crate) fn function_body(&mut self) -> Option<Vec<Stmt>> {
        if !self.expect(&TokenKind::LBrace, "Expected '{' before function body.") {
            return None;
        }
        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            body.push(self.statement()?);
        }
        self.expect(&TokenKind::RBrace, "Expected '}' after function body.");
        Some(body)
    }

    fn print_statement(&mut self) -> Option<StmtKind> {
        self.advance(); // print
        let expr = self.expression()?;
        self.expect(&TokenKind::Semi, "Expected ';' after print value.");
        Some(StmtKind::Print(expr))
    }

    fn if_statement(&mut self) -> Option<StmtKind> {
        self.advance(); // if
        self.expect(&TokenKind::LParen, "Expected '(' after 'if'.");
        let cond = self.expression()?;
        self.expect(&TokenKind::RParen, "Expected ')' after condition.");
        let then = Box::new(self.statement()?);
        let else_ = if self.matches(&TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Some(StmtKind::If { cond, then, else_ })
    }

    fn while_statement(&mut self) -> Option<StmtKind> {
        self.advance(); // while
        self.expect(&TokenKind::LParen, "Expected '(' after 'while'.");
        let cond = self.expression()?;
        self.expect(&TokenKind::RParen, "Expected ')' after condition.");
        let body = Box::new(self.statement()?);
        Some(StmtKind::While { cond, body })
    }

    fn for_statement(&mut self) -> Option<StmtKind> {
        self.advance(); // for
        self.expect(&TokenKind::LParen, "Expected '(' after 'for'.");

        let init = if self.matches(&TokenKind::Semi) {
            None
        } else if self.check(&TokenKind::Let) {
            let (line, column) = self.here();
            let kind = self.let_statement()?;
            Some(Box::new(Stmt { kind, line, column }))
        } else {
            let (line, column) = self.here();
            let kind = self.expr_statement()?;
            Some(Box::new(Stmt { kind, line, column }))
        };

        let cond = if self.check(&TokenKind::Semi) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(&TokenKind::Semi, "Expected ';' after loop condition.");

        let step = if self.check(&TokenKind::RParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(&TokenKind::RParen, "Expected ')' after for clauses.");

        let body = Box::new(self.statement()?);
        Some(StmtKind::For {
            init,
            cond,
            step,
            body,
        })
    }

    fn return_statement(&mut self) -> Option<StmtKind> {
        self.advance(); // return
        let value = if self.check(&TokenKind::Semi) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(&TokenKind::Semi, "Expected ';' after return value.");
        Some(StmtKind::Return(value))
    }

    fn block_statement(&mut self) -> Option<StmtKind> {
        self.advance(); // {
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            stmts.push(self.statement()?);
        }
        self.expect(&TokenKind::RBrace, "Expected '}' after block.");
        Some(StmtKind::Block(stmts))
    }

    fn expr_statement(&mut self) -> Option<StmtKind> {
        let expr = self.expression()?;
        self.expect(&TokenKind::Semi, "Expected ';' after expression.");
        Some(StmtKind::Expr(expr))
    }

    pub(crate) fn expect_ident(&mut self, message: &str) -> Option<String> {
        if let TokenKind::Ident(name) = &self.peek().kind {
            let name = name.clone();
            self.advance();
            Some(name)
        } else {
            self.error_here(message);
            None
        }
    }
}
