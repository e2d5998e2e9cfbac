//! Expression parsing by precedence level.

use crate::ast::{BinaryOp, Expr, ExprKind, LogicalOp, UnaryOp};
use crate::token::{Token, TokenKind};

use super::Parser;

impl Parser {
    pub(crate) fn expression(&mut self) -> Option<Expr> {
        self.assignment()
    }

    fn mk(&self, kind: ExprKind, at: &Token) -> Expr {
        Expr {
            kind,
            line: at.line,
            column: at.column,
        }
    }

    /// Assignment and compound assignment. The left-hand side is parsed as a
    /// normal expression and then reshaped into a target.
    fn assignment(&mut self) -> Option<Expr> {
        let expr = self.ternary()?;

        if self.check(&TokenKind::Eq) {
            let at = self.advance();
            let value = Box::new(self.assignment()?);
            return match expr.kind {
                ExprKind::Var(name) => Some(self.mk(ExprKind::Assign { name, value }, &at)),
                ExprKind::Member { object, name } => Some(self.mk(
                    ExprKind::MemberAssign {
                        object,
                        name,
                        value,
                    },
                    &at,
                )),
                ExprKind::Index { object, index } => Some(self.mk(
                    ExprKind::IndexAssign {
                        object,
                        index,
                        value,
                    },
                    &at,
                )),
                _ => {
                    self.error_at(&at, "Invalid assignment target.");
                    None
                }
            };
        }

        if let Some(op) = compound_op(&self.peek().kind) {
            let at = self.advance();
            let value = Box::new(self.assignment()?);
            return match expr.kind {
                ExprKind::Var(name) => {
                    Some(self.mk(ExprKind::CompoundAssign { name, op, value }, &at))
                }
                ExprKind::Member { object, name } => Some(self.mk(
                    ExprKind::CompoundMemberAssign {
                        object,
                        name,
                        op,
                        value,
                    },
                    &at,
                )),
                ExprKind::Index { object, index } => Some(self.mk(
                    ExprKind::CompoundIndexAssign {
                        object,
                        index,
                        op,
                        value,
                    },
                    &at,
                )),
                _ => {
                    self.error_at(&at, "Invalid compound assignment target.");
                    None
                }
            };
        }

        Some(expr)
    }

    fn ternary(&mut self) -> Option<Expr> {
        let cond = self.logical_or()?;
        if self.check(&TokenKind::Question) {
            let at = self.advance();
            let then = Box::new(self.expression()?);
            self.expect(&TokenKind::Colon, "Expected ':' in ternary expression.");
            let else_ = Box::new(self.assignment()?);
            return Some(self.mk(
                ExprKind::Ternary {
                    cond: Box::new(cond),
                    then,
                    else_,
                },
                &at,
            ));
        }
        Some(cond)
    }

    fn logical_or(&mut self) -> Option<Expr> {
        let mut left = self.logical_and()?;
        while self.check(&TokenKind::PipePipe) {
            let at = self.advance();
            let right = self.logical_and()?;
            left = self.mk(
                ExprKind::Logical {
                    op: LogicalOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                &at,
            );
        }
        Some(left)
    }

    fn logical_and(&mut self) -> Option<Expr> {
        let mut left = self.bit_or()?;
        while self.check(&TokenKind::AmpAmp) {
            let at = self.advance();
            let right = self.bit_or()?;
            left = self.mk(
                ExprKind::Logical {
                    op: LogicalOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                &at,
            );
        }
        Some(left)
    }

    fn bit_or(&mut self) -> Option<Expr> {
        self.binary_level(&[(TokenKind::Pipe, BinaryOp::BitOr)], Self::bit_xor)
    }

    fn bit_xor(&mut self) -> Option<Expr> {
        self.binary_level(&[(TokenKind::Caret, BinaryOp::BitXor)], Self::bit_and)
    }

    fn bit_and(&mut self) -> Option<Expr> {
        self.binary_level(&[(TokenKind::Amp, BinaryOp::BitAnd)], Self::equality)
    }

    fn equality(&mut self) -> Option<Expr> {
        self.binary_level(
            &[
                (TokenKind::EqEq, BinaryOp::Eq),
                (TokenKind::BangEq, BinaryOp::Ne),
            ],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> Option<Expr> {
        self.binary_level(
            &[
                (TokenKind::Lt, BinaryOp::Lt),
                (TokenKind::LtEq, BinaryOp::Le),
                (TokenKind::Gt, BinaryOp::Gt),
                (TokenKind::GtEq, BinaryOp::Ge),
            ],
            Self::shift,
        )
    }

    fn shift(&mut self) -> Option<Expr> {
        self.binary_level(
            &[
                (TokenKind::Shl, BinaryOp::Shl),
                (TokenKind::Shr, BinaryOp::Shr),
            ],
            Self::term,
        )
    }

    fn term(&mut self) -> Option<Expr> {
        self.binary_level(
            &[
                (TokenKind::Plus, BinaryOp::Add),
                (TokenKind::Minus, BinaryOp::Sub),
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> Option<Expr> {
        self.binary_level(
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
            ],
            Self::unary,
        )
    }

    fn binary_level(
        &mut self,
        ops: &[(TokenKind, BinaryOp)],
        next: fn(&mut Self) -> Option<Expr>,
    ) -> Option<Expr> {
        let mut left = next(self)?;
        'outer: loop {
            for (kind, op) in ops {
                if self.check(kind) {
                    let at = self.advance();
                    let right = next(self)?;
                    left = self.mk(
                        ExprKind::Binary {
                            op: *op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        &at,
                    );
                    continue 'outer;
                }
            }
            break;
        }
        Some(left)
    }

    fn unary(&mut self) -> Option<Expr> {
        match self.peek().kind {
            TokenKind::Minus => {
                let at = self.advance();
                let expr = Box::new(self.unary()?);
                Some(self.mk(
                    ExprKind::Unary {
                        op: UnaryOp::Neg,
                        expr,
                    },
                    &at,
                ))
            }
            TokenKind::Bang => {
                let at = self.advance();
                let expr = Box::new(self.unary()?);
                Some(self.mk(
                    ExprKind::Unary {
                        op: UnaryOp::Not,
                        expr,
                    },
                    &at,
                ))
            }
            // Prefix update: ++i / --i
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let increment = self.peek().kind == TokenKind::PlusPlus;
                let at = self.advance();
                let name = self.expect_ident("Expected variable name after update operator.")?;
                Some(self.mk(ExprKind::Update { name, increment }, &at))
            }
            _ => self.call(),
        }
    }

    /// Calls, member access, indexing and postfix updates.
    fn call(&mut self) -> Option<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek().kind {
                TokenKind::LParen => {
                    let at = self.advance();
                    let mut args = Vec::new();
                    if !self.check(&TokenKind::RParen) {
                        loop {
                            args.push(self.expression()?);
                            if !self.matches(&TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(&TokenKind::RParen, "Expected ')' after arguments.");
                    expr = self.mk(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        &at,
                    );
                }
                TokenKind::Dot => {
                    let at = self.advance();
                    let name = self.expect_ident("Expected property name after '.'.")?;
                    expr = self.mk(
                        ExprKind::Member {
                            object: Box::new(expr),
                            name,
                        },
                        &at,
                    );
                }
                TokenKind::LBracket => {
                    let at = self.advance();
                    let index = Box::new(self.expression()?);
                    self.expect(&TokenKind::RBracket, "Expected ']' after index.");
                    expr = self.mk(
                        ExprKind::Index {
                            object: Box::new(expr),
                            index,
                        },
                        &at,
                    );
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let increment = self.peek().kind == TokenKind::PlusPlus;
                    let at = self.advance();
                    match expr.kind {
                        ExprKind::Var(name) => {
                            expr = self.mk(ExprKind::Update { name, increment }, &at);
                        }
                        _ => {
                            self.error_at(&at, "Update target must be a variable.");
                            return None;
                        }
                    }
                }
                _ => break,
            }
        }
        Some(expr)
    }

    fn primary(&mut self) -> Option<Expr> {
        let token = self.peek().clone();
        match &token.kind {
            TokenKind::Number(n) => {
                let n = *n;
                self.advance();
                Some(self.mk(ExprKind::Number(n), &token))
            }
            TokenKind::Str(s) => {
                let s = s.clone();
                self.advance();
                Some(self.mk(ExprKind::Str(s), &token))
            }
            TokenKind::True => {
                self.advance();
                Some(self.mk(ExprKind::Bool(true), &token))
            }
            TokenKind::False => {
                self.advance();
                Some(self.mk(ExprKind::Bool(false), &token))
            }
            TokenKind::Nil => {
                self.advance();
                Some(self.mk(ExprKind::Nil, &token))
            }
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Some(self.mk(ExprKind::Var(name), &token))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(&TokenKind::RParen, "Expected ')' after expression.");
                Some(self.mk(ExprKind::Group(Box::new(inner)), &token))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.check(&TokenKind::RBracket) {
                    loop {
                        items.push(self.expression()?);
                        if !self.matches(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBracket, "Expected ']' after array elements.");
                Some(self.mk(ExprKind::Array(items), &token))
            }
            TokenKind::LBrace => {
                self.advance();
                let mut pairs = Vec::new();
                if !self.check(&TokenKind::RBrace) {
                    loop {
                        let key = if let TokenKind::Str(s) = &self.peek().kind {
                            let s = s.clone();
                            self.advance();
                            s
                        } else {
                            self.error_here("Expected string key in map literal.");
                            return None;
                        };
                        self.expect(&TokenKind::Colon, "Expected ':' after map key.");
                        let value = self.expression()?;
                        pairs.push((key, value));
                        if !self.matches(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RBrace, "Expected '}' after map entries.");
                Some(self.mk(ExprKind::Map(pairs), &token))
            }
            TokenKind::Fn => {
                self.advance();
                let params = self.parameter_list()?;
                let body = self.function_body()?;
                Some(self.mk(ExprKind::Lambda { params, body }, &token))
            }
            _ => {
                self.error_here("Expected expression.");
                None
            }
        }
    }
}

fn compound_op(kind: &TokenKind) -> Option<BinaryOp> {
    match kind {
        TokenKind::PlusEq => Some(BinaryOp::Add),
        TokenKind::MinusEq => Some(BinaryOp::Sub),
        TokenKind::StarEq => Some(BinaryOp::Mul),
        TokenKind::SlashEq => Some(BinaryOp::Div),
        TokenKind::AmpEq => Some(BinaryOp::BitAnd),
        TokenKind::PipeEq => Some(BinaryOp::BitOr),
        TokenKind::CaretEq => Some(BinaryOp::BitXor),
        TokenKind::ShlEq => Some(BinaryOp::Shl),
        TokenKind::ShrEq => Some(BinaryOp::Shr),
        _ => None,
    }
}
