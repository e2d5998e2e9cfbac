//! Statement lowering.

use claw_runtime::bytecode::OpCode;
use claw_syntax::ast::{BinaryOp, Expr, ExprKind, Stmt, StmtKind};

use crate::{CompileError, Compiler};

/// Trip counts up to this are fully unrolled.
const UNROLL_LIMIT: i64 = 16;

impl Compiler {
    pub(crate) fn statement(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        self.set_position(stmt.line, stmt.column);
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.expression(expr)?;
                self.emit_op(OpCode::Pop);
            }
            StmtKind::Print(expr) => {
                self.expression(expr)?;
                self.emit_op(OpCode::Print);
            }
            StmtKind::Let { name, init } => self.let_statement(name, init.as_ref())?,
            StmtKind::Block(stmts) => {
                self.begin_scope();
                for s in stmts {
                    self.statement(s)?;
                }
                self.end_scope();
            }
            StmtKind::If { cond, then, else_ } => {
                self.expression(cond)?;
                let then_jump = self.emit_jump(OpCode::JumpIfFalse);
                self.emit_op(OpCode::Pop);
                self.statement(then)?;
                let else_jump = self.emit_jump(OpCode::Jump);
                self.patch_jump(then_jump)?;
                self.emit_op(OpCode::Pop);
                if let Some(else_branch) = else_ {
                    self.statement(else_branch)?;
                }
                self.patch_jump(else_jump)?;
            }
            StmtKind::While { cond, body } => {
                let loop_start = self.current_offset();
                self.expression(cond)?;
                let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
                self.emit_op(OpCode::Pop);
                self.statement(body)?;
                self.emit_loop(loop_start)?;
                self.patch_jump(exit_jump)?;
                self.emit_op(OpCode::Pop);
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => self.for_statement(init.as_deref(), cond.as_ref(), step.as_ref(), body)?,
            StmtKind::Fn { name, params, body } => {
                self.begin_function(name);
                for param in params {
                    self.add_local(param)?;
                }
                for s in body {
                    self.statement(s)?;
                }
                self.end_function(name, params.len() as i32)?;

                if self.scope_depth() > 0 {
                    // The closure value on the stack becomes the local slot.
                    self.add_local(name)?;
                } else {
                    self.emit_with_name(OpCode::DefineGlobal, name)?;
                }
            }
            StmtKind::Return(value) => {
                match value {
                    Some(expr) => self.expression(expr)?,
                    None => self.emit_op(OpCode::Nil),
                }
                self.emit_op(OpCode::Return);
            }
        }
        Ok(())
    }

    fn let_statement(&mut self, name: &str, init: Option<&Expr>) -> Result<(), CompileError> {
        if self.scope_depth() > 0 {
            self.add_local(name)?;
            let slot = self.resolve_local(name).expect("fresh local resolves");
            self.emit_op(OpCode::Nil);
            if let Some(init) = init {
                self.expression(init)?;
                self.emit_op(OpCode::SetLocal);
                self.emit_byte(slot);
                self.emit_op(OpCode::Pop);
            }
        } else {
            match init {
                Some(init) => self.expression(init)?,
                None => self.emit_op(OpCode::Nil),
            }
            self.emit_with_name(OpCode::DefineGlobal, name)?;
        }
        Ok(())
    }

    fn for_statement(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &Stmt,
    ) -> Result<(), CompileError> {
        self.begin_scope();
        if let Some(init) = init {
            self.statement(init)?;
        }

        if let Some(count) = unroll_trip_count(init, cond, step) {
            // Straight-line expansion: body then step, per iteration. The
            // condition is never evaluated.
            let step = step.expect("unrollable loop has a step");
            for _ in 0..count {
                self.statement(body)?;
                self.expression(step)?;
                self.emit_op(OpCode::Pop);
            }
            self.end_scope();
            return Ok(());
        }

        let loop_start = self.current_offset();
        let mut exit_jump = None;
        if let Some(cond) = cond {
            self.expression(cond)?;
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }
        self.statement(body)?;
        if let Some(step) = step {
            self.expression(step)?;
            self.emit_op(OpCode::Pop);
        }
        self.emit_loop(loop_start)?;
        if let Some(exit) = exit_jump {
            self.patch_jump(exit)?;
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
        Ok(())
    }
}

/// Recognize `for (let i = <a>; i < <b>; i = i + <k>)` (or `<=`, or `++i`)
/// with a compile-time positive step and return its trip count when it is
/// small enough to expand.
fn unroll_trip_count(init: Option<&Stmt>, cond: Option<&Expr>, step: Option<&Expr>) -> Option<i64> {
    let init = init?;
    let StmtKind::Let {
        name: var,
        init: Some(start_expr),
    } = &init.kind
    else {
        return None;
    };
    let ExprKind::Number(start) = start_expr.kind else {
        return None;
    };

    let cond = cond?;
    let ExprKind::Binary { op, left, right } = &cond.kind else {
        return None;
    };
    let (ExprKind::Var(cond_var), ExprKind::Number(limit)) = (&left.kind, &right.kind) else {
        return None;
    };
    if cond_var != var {
        return None;
    }

    let step_size = step_size(step?, var)?;
    if step_size <= 0.0 {
        return None;
    }

    let iterations = match op {
        BinaryOp::Lt => ((limit - start) / step_size).floor().max(0.0),
        BinaryOp::Le => (((limit - start) / step_size).floor() + 1.0).max(0.0),
        _ => return None,
    } as i64;

    (iterations > 0 && iterations <= UNROLL_LIMIT).then_some(iterations)
}

/// The constant step of `i = i + k`, `i += k` or `++i`, if that is what
/// the step expression is.
fn step_size(step: &Expr, var: &str) -> Option<f64> {
    match &step.kind {
        ExprKind::Assign { name, value } if name == var => {
            let ExprKind::Binary { op, left, right } = &value.kind else {
                return None;
            };
            if *op != BinaryOp::Add {
                return None;
            }
            let (ExprKind::Var(lhs), ExprKind::Number(k)) = (&left.kind, &right.kind) else {
                return None;
            };
            (lhs == var).then_some(*k)
        }
        ExprKind::CompoundAssign { name, op, value } if name == var => {
            if *op != BinaryOp::Add {
                return None;
            }
            let ExprKind::Number(k) = value.kind else {
                return None;
            };
            Some(k)
        }
        ExprKind::Update { name, increment } if name == var && *increment => Some(1.0),
        _ => None,
    }
}
