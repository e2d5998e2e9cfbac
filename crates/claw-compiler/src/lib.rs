//! # claw-compiler
//!
//! Single-pass lowering of the Claw AST to VM chunks. Per-function state
//! tracks locals, upvalues and scope depth; nested function compilers are
//! a stack, the innermost last, so upvalue resolution can walk outward.

mod error;
mod expr;
mod stmt;

pub use error::CompileError;

use claw_runtime::bytecode::{Chunk, LineInfo, OpCode};
use claw_runtime::objects::function::{self, VMFunction};
use claw_runtime::string_pool::{intern, IStr};
use claw_runtime::value::Value;
use claw_syntax::ast::Stmt;

/// Compile a program into the chunk executed by a top-level `interpret`.
pub fn compile(program: &[Stmt]) -> Result<Chunk, CompileError> {
    let mut compiler = Compiler::new();
    for stmt in program {
        compiler.set_position(stmt.line, stmt.column);
        compiler.statement(stmt)?;
    }
    compiler.emit_op(OpCode::Return);
    Ok(compiler.finish_script())
}

struct Local {
    name: IStr,
    depth: i32,
    is_captured: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

/// Compile state for one function (or the top-level script).
struct FunctionState {
    chunk: Chunk,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
    loops_emitted: u32,
}

impl FunctionState {
    fn new() -> Self {
        Self {
            chunk: Chunk::new(),
            locals: Vec::new(),
            upvalues: Vec::new(),
            scope_depth: 0,
            loops_emitted: 0,
        }
    }
}

pub(crate) struct Compiler {
    /// Function compilers, innermost last. Index 0 is the script.
    states: Vec<FunctionState>,
    line: u32,
    column: u32,
    /// Names for compiler-introduced temp locals.
    temp_counter: u32,
}

impl Compiler {
    fn new() -> Self {
        Self {
            states: vec![FunctionState::new()],
            line: 0,
            column: 0,
            temp_counter: 0,
        }
    }

    pub(crate) fn set_position(&mut self, line: u32, column: u32) {
        self.line = line;
        self.column = column;
    }

    fn finish_script(mut self) -> Chunk {
        let mut state = self.states.pop().expect("script state");
        state.chunk.set_loop_count(state.loops_emitted);
        state.chunk
    }

    // =========================================================================
    // Function nesting
    // =========================================================================

    /// Begin compiling a nested function. Slot 0 holds the callee; naming
    /// it after the function makes recursive references resolve locally.
    pub(crate) fn begin_function(&mut self, slot_zero_name: &str) {
        let mut state = FunctionState::new();
        state.scope_depth = 1;
        state.locals.push(Local {
            name: intern(slot_zero_name),
            depth: 1,
            is_captured: false,
        });
        self.states.push(state);
    }

    /// Finish the innermost function: emit the implicit return, build the
    /// function object and emit the `Closure` instruction (plus upvalue
    /// descriptor pairs) into the enclosing function.
    pub(crate) fn end_function(
        &mut self,
        name: &str,
        arity: i32,
    ) -> Result<(), CompileError> {
        self.emit_op(OpCode::Nil);
        self.emit_op(OpCode::Return);

        let mut state = self.states.pop().expect("function state");
        state.chunk.set_loop_count(state.loops_emitted);
        let upvalues = state.upvalues.clone();

        let fn_obj = function::create_function(VMFunction::new(
            name,
            arity,
            upvalues.len(),
            state.chunk,
        ));

        let idx = self.make_constant(Value::object(fn_obj))?;
        self.emit_op(OpCode::Closure);
        self.emit_byte(idx);
        for upvalue in upvalues {
            self.emit_byte(upvalue.is_local as u8);
            self.emit_byte(upvalue.index);
        }
        Ok(())
    }

    // =========================================================================
    // Emission
    // =========================================================================

    #[inline]
    fn state(&mut self) -> &mut FunctionState {
        self.states.last_mut().expect("compiler state")
    }

    #[inline]
    fn at(&self) -> LineInfo {
        LineInfo::new(self.line, self.column)
    }

    pub(crate) fn emit_byte(&mut self, byte: u8) {
        let at = self.at();
        self.state().chunk.write(byte, at);
    }

    pub(crate) fn emit_op(&mut self, op: OpCode) {
        let at = self.at();
        self.state().chunk.write_op(op, at);
    }

    pub(crate) fn make_constant(&mut self, value: Value) -> Result<u8, CompileError> {
        let idx = self.state().chunk.add_constant(value);
        if idx > u8::MAX as usize {
            return Err(CompileError::TooManyConstants { line: self.line });
        }
        Ok(idx as u8)
    }

    pub(crate) fn emit_constant(&mut self, value: Value) -> Result<(), CompileError> {
        let idx = self.make_constant(value)?;
        self.emit_op(OpCode::Constant);
        self.emit_byte(idx);
        Ok(())
    }

    /// Emit an op carrying an interned-string constant operand.
    pub(crate) fn emit_with_name(&mut self, op: OpCode, name: &str) -> Result<(), CompileError> {
        let idx = self.make_constant(Value::string(intern(name)))?;
        self.emit_op(op);
        self.emit_byte(idx);
        Ok(())
    }

    /// Emit a jump with a placeholder offset; returns the offset's position.
    pub(crate) fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.state().chunk.len() - 2
    }

    /// Point a previously emitted jump at the current position.
    pub(crate) fn patch_jump(&mut self, offset: usize) -> Result<(), CompileError> {
        // -2 adjusts for the offset bytes themselves.
        let jump = self.state().chunk.len() - offset - 2;
        if jump > u16::MAX as usize {
            return Err(CompileError::JumpTooLarge { line: self.line });
        }
        self.state().chunk.patch_byte(offset, (jump >> 8) as u8);
        self.state().chunk.patch_byte(offset + 1, (jump & 0xff) as u8);
        Ok(())
    }

    /// Emit a back-edge to `loop_start`.
    pub(crate) fn emit_loop(&mut self, loop_start: usize) -> Result<(), CompileError> {
        self.emit_op(OpCode::Loop);
        let offset = self.state().chunk.len() - loop_start + 2;
        if offset > u16::MAX as usize {
            return Err(CompileError::LoopTooLarge { line: self.line });
        }
        self.emit_byte((offset >> 8) as u8);
        self.emit_byte((offset & 0xff) as u8);
        self.state().loops_emitted += 1;
        Ok(())
    }

    pub(crate) fn current_offset(&mut self) -> usize {
        self.state().chunk.len()
    }

    // =========================================================================
    // Scopes and name resolution
    // =========================================================================

    pub(crate) fn begin_scope(&mut self) {
        self.state().scope_depth += 1;
    }

    /// Pop uncaptured locals and close captured ones on scope exit.
    pub(crate) fn end_scope(&mut self) {
        self.state().scope_depth -= 1;
        loop {
            let dying = {
                let state = self.states.last().expect("compiler state");
                match state.locals.last() {
                    Some(local) if local.depth > state.scope_depth => Some(local.is_captured),
                    _ => None,
                }
            };
            let Some(captured) = dying else {
                break;
            };
            self.emit_op(if captured {
                OpCode::CloseUpvalue
            } else {
                OpCode::Pop
            });
            self.state().locals.pop();
        }
    }

    pub(crate) fn scope_depth(&self) -> i32 {
        self.states.last().expect("compiler state").scope_depth
    }

    pub(crate) fn add_local(&mut self, name: &str) -> Result<(), CompileError> {
        let name = intern(name);
        let line = self.line;
        let state = self.states.last_mut().expect("compiler state");
        if state.locals.len() >= 256 {
            return Err(CompileError::TooManyLocals { line });
        }
        for local in state.locals.iter().rev() {
            if local.depth != -1 && local.depth < state.scope_depth {
                break;
            }
            if local.name == name {
                return Err(CompileError::DuplicateDeclaration {
                    name: name.as_str().to_string(),
                    line,
                });
            }
        }
        state.locals.push(Local {
            name,
            depth: state.scope_depth,
            is_captured: false,
        });
        Ok(())
    }

    /// Innermost-first scan of the current function's locals.
    pub(crate) fn resolve_local(&self, name: &str) -> Option<u8> {
        self.resolve_local_at(self.states.len() - 1, intern(name))
    }

    fn resolve_local_at(&self, level: usize, name: IStr) -> Option<u8> {
        let state = &self.states[level];
        for (i, local) in state.locals.iter().enumerate().rev() {
            if local.name == name {
                return Some(i as u8);
            }
        }
        None
    }

    /// Resolve a name as an upvalue of the current function, chaining
    /// through enclosing functions. Marks captured locals.
    pub(crate) fn resolve_upvalue(&mut self, name: &str) -> Result<Option<u8>, CompileError> {
        self.resolve_upvalue_at(self.states.len() - 1, intern(name))
    }

    fn resolve_upvalue_at(
        &mut self,
        level: usize,
        name: IStr,
    ) -> Result<Option<u8>, CompileError> {
        if level == 0 {
            return Ok(None);
        }
        if let Some(local) = self.resolve_local_at(level - 1, name) {
            self.states[level - 1].locals[local as usize].is_captured = true;
            return Ok(Some(self.add_upvalue(level, local, true)?));
        }
        if let Some(upvalue) = self.resolve_upvalue_at(level - 1, name)? {
            return Ok(Some(self.add_upvalue(level, upvalue, false)?));
        }
        Ok(None)
    }

    fn add_upvalue(&mut self, level: usize, index: u8, is_local: bool) -> Result<u8, CompileError> {
        let state = &mut self.states[level];
        let desc = UpvalueDesc { index, is_local };
        for (i, existing) in state.upvalues.iter().enumerate() {
            if *existing == desc {
                return Ok(i as u8);
            }
        }
        if state.upvalues.len() >= 256 {
            return Err(CompileError::TooManyUpvalues { line: self.line });
        }
        state.upvalues.push(desc);
        Ok((state.upvalues.len() - 1) as u8)
    }

    /// A unique name for a compiler-introduced temp local.
    pub(crate) fn temp_name(&mut self, tag: &str) -> String {
        self.temp_counter += 1;
        format!("$tmp_{}_{}", tag, self.temp_counter)
    }
}
