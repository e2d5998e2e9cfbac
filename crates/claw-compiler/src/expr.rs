//! Expression lowering.

use claw_runtime::bytecode::OpCode;
use claw_runtime::string_pool::intern;
use claw_runtime::value::Value;
use claw_syntax::ast::{BinaryOp, Expr, ExprKind, LogicalOp, UnaryOp};

use crate::{CompileError, Compiler};

/// Operator-kind byte for the Ensure*Default instructions:
/// 0=+ 1=- 2=* 3=/ 4=& 5=| 6=^ 7=<< 8=>>.
fn ensure_op_kind(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Add => 0,
        BinaryOp::Sub => 1,
        BinaryOp::Mul => 2,
        BinaryOp::Div => 3,
        BinaryOp::BitAnd => 4,
        BinaryOp::BitOr => 5,
        BinaryOp::BitXor => 6,
        BinaryOp::Shl => 7,
        BinaryOp::Shr => 8,
        _ => 255,
    }
}

impl Compiler {
    pub(crate) fn expression(&mut self, expr: &Expr) -> Result<(), CompileError> {
        self.set_position(expr.line, expr.column);
        match &expr.kind {
            ExprKind::Number(n) => self.emit_constant(Value::number(*n))?,
            ExprKind::Str(s) => self.emit_constant(Value::string(intern(s)))?,
            ExprKind::Bool(b) => self.emit_op(if *b { OpCode::True } else { OpCode::False }),
            ExprKind::Nil => self.emit_op(OpCode::Nil),
            ExprKind::Group(inner) => self.expression(inner)?,

            // Container literals are built by the runtime library: the
            // compiler emits a call to the `arrayOf`/`mapOf` built-in, the
            // same construction path every other native uses.
            ExprKind::Array(items) => {
                if items.len() > 255 {
                    return Err(CompileError::TooManyArguments { line: self.line });
                }
                self.variable_get("arrayOf")?;
                for item in items {
                    self.expression(item)?;
                }
                self.emit_op(OpCode::Call);
                self.emit_byte(items.len() as u8);
            }
            ExprKind::Map(pairs) => {
                if pairs.len() * 2 > 255 {
                    return Err(CompileError::TooManyArguments { line: self.line });
                }
                self.variable_get("mapOf")?;
                for (key, value) in pairs {
                    self.emit_constant(Value::string(intern(key)))?;
                    self.expression(value)?;
                }
                self.emit_op(OpCode::Call);
                self.emit_byte((pairs.len() * 2) as u8);
            }

            ExprKind::Var(name) => self.variable_get(name)?,

            ExprKind::Unary { op, expr } => {
                self.expression(expr)?;
                self.emit_op(match op {
                    UnaryOp::Neg => OpCode::Negate,
                    UnaryOp::Not => OpCode::Not,
                });
            }

            ExprKind::Binary { op, left, right } => {
                self.expression(left)?;
                self.expression(right)?;
                self.binary_op(*op);
            }

            ExprKind::Logical { op, left, right } => match op {
                LogicalOp::And => {
                    self.expression(left)?;
                    let end = self.emit_jump(OpCode::JumpIfFalse);
                    self.emit_op(OpCode::Pop);
                    self.expression(right)?;
                    self.patch_jump(end)?;
                }
                LogicalOp::Or => {
                    self.expression(left)?;
                    let else_jump = self.emit_jump(OpCode::JumpIfFalse);
                    let end = self.emit_jump(OpCode::Jump);
                    self.patch_jump(else_jump)?;
                    self.emit_op(OpCode::Pop);
                    self.expression(right)?;
                    self.patch_jump(end)?;
                }
            },

            ExprKind::Ternary { cond, then, else_ } => {
                self.expression(cond)?;
                let else_jump = self.emit_jump(OpCode::JumpIfFalse);
                self.emit_op(OpCode::Pop);
                self.expression(then)?;
                let end_jump = self.emit_jump(OpCode::Jump);
                self.patch_jump(else_jump)?;
                self.emit_op(OpCode::Pop);
                self.expression(else_)?;
                self.patch_jump(end_jump)?;
            }

            ExprKind::Call { callee, args } => {
                // `num(<number literal>)` folds to the literal itself.
                if let ExprKind::Var(name) = &callee.kind {
                    if name == "num" && args.len() == 1 {
                        if let ExprKind::Number(_) = args[0].kind {
                            return self.expression(&args[0]);
                        }
                    }
                }
                if args.len() > 255 {
                    return Err(CompileError::TooManyArguments { line: self.line });
                }
                self.expression(callee)?;
                for arg in args {
                    self.expression(arg)?;
                }
                self.emit_op(OpCode::Call);
                self.emit_byte(args.len() as u8);
            }

            ExprKind::Member { object, name } => {
                self.expression(object)?;
                self.emit_with_name(OpCode::GetProperty, name)?;
            }
            ExprKind::MemberAssign {
                object,
                name,
                value,
            } => {
                self.expression(object)?;
                self.expression(value)?;
                self.emit_with_name(OpCode::SetProperty, name)?;
            }

            ExprKind::Index { object, index } => {
                self.expression(object)?;
                self.expression(index)?;
                self.emit_op(OpCode::GetIndex);
            }
            ExprKind::IndexAssign {
                object,
                index,
                value,
            } => {
                self.expression(object)?;
                self.expression(index)?;
                self.expression(value)?;
                self.emit_op(OpCode::SetIndex);
            }

            ExprKind::Assign { name, value } => {
                self.expression(value)?;
                self.variable_set(name)?;
            }

            ExprKind::CompoundAssign { name, op, value } => {
                self.variable_get(name)?;
                self.expression(value)?;
                self.binary_op(*op);
                self.variable_set(name)?;
            }

            ExprKind::CompoundMemberAssign {
                object,
                name,
                op,
                value,
            } => self.compound_member_assign(object, name, *op, value)?,

            ExprKind::CompoundIndexAssign {
                object,
                index,
                op,
                value,
            } => self.compound_index_assign(object, index, *op, value)?,

            ExprKind::Update { name, increment } => {
                self.variable_get(name)?;
                self.emit_constant(Value::number(1.0))?;
                self.emit_op(if *increment {
                    OpCode::Add
                } else {
                    OpCode::Subtract
                });
                self.variable_set(name)?;
            }

            ExprKind::Lambda { params, body } => {
                self.begin_function("");
                for param in params {
                    self.add_local(param)?;
                }
                for s in body {
                    self.statement(s)?;
                }
                self.end_function("<lambda>", params.len() as i32)?;
            }
        }
        Ok(())
    }

    /// Read a name: local slot, upvalue, or global.
    fn variable_get(&mut self, name: &str) -> Result<(), CompileError> {
        if let Some(slot) = self.resolve_local(name) {
            self.emit_op(OpCode::GetLocal);
            self.emit_byte(slot);
        } else if let Some(slot) = self.resolve_upvalue(name)? {
            self.emit_op(OpCode::GetUpvalue);
            self.emit_byte(slot);
        } else {
            self.emit_with_name(OpCode::GetGlobal, name)?;
        }
        Ok(())
    }

    /// Store the value on top of the stack into a name (leaves the value).
    fn variable_set(&mut self, name: &str) -> Result<(), CompileError> {
        if let Some(slot) = self.resolve_local(name) {
            self.emit_op(OpCode::SetLocal);
            self.emit_byte(slot);
        } else if let Some(slot) = self.resolve_upvalue(name)? {
            self.emit_op(OpCode::SetUpvalue);
            self.emit_byte(slot);
        } else {
            self.emit_with_name(OpCode::SetGlobal, name)?;
        }
        Ok(())
    }

    fn binary_op(&mut self, op: BinaryOp) {
        match op {
            BinaryOp::Add => self.emit_op(OpCode::Add),
            BinaryOp::Sub => self.emit_op(OpCode::Subtract),
            BinaryOp::Mul => self.emit_op(OpCode::Multiply),
            BinaryOp::Div => self.emit_op(OpCode::Divide),
            BinaryOp::BitAnd => self.emit_op(OpCode::BitAnd),
            BinaryOp::BitOr => self.emit_op(OpCode::BitOr),
            BinaryOp::BitXor => self.emit_op(OpCode::BitXor),
            BinaryOp::Shl => self.emit_op(OpCode::ShiftLeft),
            BinaryOp::Shr => self.emit_op(OpCode::ShiftRight),
            BinaryOp::Eq => self.emit_op(OpCode::Equal),
            BinaryOp::Ne => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            BinaryOp::Lt => self.emit_op(OpCode::Less),
            BinaryOp::Le => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            BinaryOp::Gt => self.emit_op(OpCode::Greater),
            BinaryOp::Ge => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
        }
    }

    /// Define a temp local whose slot is the Nil pushed here; returns the
    /// slot index.
    fn stash_temp(&mut self, tag: &str, value: &Expr) -> Result<u8, CompileError> {
        let name = self.temp_name(tag);
        self.add_local(&name)?;
        let slot = self.resolve_local(&name).expect("temp resolves");
        self.emit_op(OpCode::Nil);
        self.expression(value)?;
        self.emit_op(OpCode::SetLocal);
        self.emit_byte(slot);
        self.emit_op(OpCode::Pop);
        Ok(slot)
    }

    fn get_local(&mut self, slot: u8) {
        self.emit_op(OpCode::GetLocal);
        self.emit_byte(slot);
    }

    /// `obj.name op= value`, evaluating the object expression once via a
    /// stack-resident temp, with a seeded default for absent properties.
    fn compound_member_assign(
        &mut self,
        object: &Expr,
        name: &str,
        op: BinaryOp,
        value: &Expr,
    ) -> Result<(), CompileError> {
        self.begin_scope();
        let obj_slot = self.stash_temp("o", object)?;
        let rhs_slot = self.stash_temp("rhs", value)?;

        self.get_local(obj_slot);
        self.get_local(rhs_slot);
        self.emit_with_name(OpCode::EnsurePropertyDefault, name)?;
        self.emit_byte(ensure_op_kind(op));
        self.emit_op(OpCode::Pop);
        self.emit_op(OpCode::Pop);

        // Result slot sits below the evaluation stack for the store.
        let res_name = self.temp_name("r");
        self.add_local(&res_name)?;
        let res_slot = self.resolve_local(&res_name).expect("temp resolves");
        self.emit_op(OpCode::Nil);

        self.get_local(obj_slot);
        self.emit_with_name(OpCode::GetProperty, name)?;
        self.get_local(rhs_slot);
        self.binary_op(op);
        self.emit_op(OpCode::SetLocal);
        self.emit_byte(res_slot);
        self.emit_op(OpCode::Pop);

        self.get_local(obj_slot);
        self.get_local(res_slot);
        self.emit_with_name(OpCode::SetProperty, name)?;
        self.end_scope();
        Ok(())
    }

    /// `obj[index] op= value` with single evaluation of the object and
    /// index expressions and a seeded default for absent keys.
    fn compound_index_assign(
        &mut self,
        object: &Expr,
        index: &Expr,
        op: BinaryOp,
        value: &Expr,
    ) -> Result<(), CompileError> {
        self.begin_scope();
        let obj_slot = self.stash_temp("o", object)?;
        let idx_slot = self.stash_temp("i", index)?;
        let rhs_slot = self.stash_temp("rhs", value)?;

        self.get_local(obj_slot);
        self.get_local(idx_slot);
        self.get_local(rhs_slot);
        self.emit_op(OpCode::EnsureIndexDefault);
        self.emit_byte(ensure_op_kind(op));
        self.emit_op(OpCode::Pop);
        self.emit_op(OpCode::Pop);
        self.emit_op(OpCode::Pop);

        let res_name = self.temp_name("r");
        self.add_local(&res_name)?;
        let res_slot = self.resolve_local(&res_name).expect("temp resolves");
        self.emit_op(OpCode::Nil);

        self.get_local(obj_slot);
        self.get_local(idx_slot);
        self.emit_op(OpCode::GetIndex);
        self.get_local(rhs_slot);
        self.binary_op(op);
        self.emit_op(OpCode::SetLocal);
        self.emit_byte(res_slot);
        self.emit_op(OpCode::Pop);

        self.get_local(obj_slot);
        self.get_local(idx_slot);
        self.get_local(res_slot);
        self.emit_op(OpCode::SetIndex);
        self.end_scope();
        Ok(())
    }
}
