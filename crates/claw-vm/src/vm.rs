//! The Claw virtual machine.
//!
//! A classic fetch-decode-dispatch loop over a fixed-capacity value stack
//! and call-frame array. Per-site inline caches accelerate global reads,
//! property reads and call dispatch; hotness counters feed the JIT
//! interface. Errors write one diagnostic line to the error channel and
//! unwind the `interpret` call with `RuntimeError`.

use std::sync::atomic::{AtomicU32, Ordering};

use claw_common::ErrorCode;
use claw_runtime::bytecode::{Chunk, OpCode};
use claw_runtime::environment::{self, Environment};
use claw_runtime::gc;
use claw_runtime::objects::{
    array, class, closure, function, hashmap, instance, upvalue, HeapObj, ObjRef, VMFunction,
};
use claw_runtime::string_pool::IStr;
use claw_runtime::value::{self, Value};
use claw_runtime::{intern, output, Interpreter};
use rustc_hash::{FxHashMap, FxHashSet};
use std::rc::Rc;

use crate::flags;
use crate::gc_roots;
use crate::jit::{JitConfig, JitEngine};

pub const STACK_MAX: usize = 256;
pub const FRAMES_MAX: usize = 64;

/// Property-cache entries kept per call site before eviction kicks in.
pub const PROPERTY_IC_CAPACITY: usize = 4;
/// Miss count at which a property site goes megamorphic.
pub const PROPERTY_IC_MISS_LIMIT: u32 = 17;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

/// Last runtime failure, for diagnostics and tests.
#[derive(Clone, Debug)]
pub struct RuntimeErrorInfo {
    pub code: ErrorCode,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

#[derive(Clone, Copy)]
pub(crate) struct CallFrame {
    pub(crate) closure: ObjRef,
    /// Offset into the closure's chunk.
    pub(crate) ip: usize,
    /// Base index of this frame's slot window on the value stack.
    pub(crate) slots: usize,
}

struct GlobalCacheEntry {
    name: IStr,
    version: u64,
    value: Value,
}

struct PropertyCacheEntry {
    instance: usize,
    name: IStr,
    version: u64,
    value: Value,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CallCacheKind {
    VMClosure,
    VMFunction,
}

struct CallCacheEntry {
    callee: usize,
    kind: CallCacheKind,
    closure: ObjRef,
}

pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    open_upvalues: Vec<ObjRef>,
    globals: Rc<Environment>,
    interp: Interpreter,
    jit: JitEngine,

    // Inline caches, keyed by the absolute address of the opcode's operand
    // byte. Cleared on every top-level interpret.
    global_cache: FxHashMap<usize, GlobalCacheEntry>,
    property_cache: FxHashMap<usize, Vec<PropertyCacheEntry>>,
    property_misses: FxHashMap<usize, u32>,
    property_megamorphic: FxHashSet<usize>,
    last_property_site: Option<usize>,
    call_cache: FxHashMap<usize, CallCacheEntry>,
    instance_versions: FxHashMap<usize, u64>,

    // Hotness, keyed by function object address / loop site address.
    function_hotness: FxHashMap<usize, AtomicU32>,
    loop_hotness: FxHashMap<usize, AtomicU32>,

    /// The synthetic closure wrapping the chunk under execution; rooted
    /// explicitly because it occupies no stack slot.
    script_closure: Option<ObjRef>,
    alloc_checkpoint: u64,
    /// Flags snapshot taken at interpret entry (flags are set before
    /// `interpret`, not mid-run).
    run_flags: flags::RuntimeFlags,
    last_error: Option<RuntimeErrorInfo>,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_interpreter(Interpreter::new())
    }

    /// Use an interpreter whose globals already carry natives or classes.
    pub fn with_interpreter(interp: Interpreter) -> Self {
        Self {
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            open_upvalues: Vec::new(),
            globals: Rc::clone(interp.globals()),
            interp,
            jit: JitEngine::new(),
            global_cache: FxHashMap::default(),
            property_cache: FxHashMap::default(),
            property_misses: FxHashMap::default(),
            property_megamorphic: FxHashSet::default(),
            last_property_site: None,
            call_cache: FxHashMap::default(),
            instance_versions: FxHashMap::default(),
            function_hotness: FxHashMap::default(),
            loop_hotness: FxHashMap::default(),
            script_closure: None,
            alloc_checkpoint: 0,
            run_flags: flags::RuntimeFlags::default(),
            last_error: None,
        }
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interp
    }

    pub fn interpreter_mut(&mut self) -> &mut Interpreter {
        &mut self.interp
    }

    pub fn jit(&self) -> &JitEngine {
        &self.jit
    }

    pub fn last_error(&self) -> Option<&RuntimeErrorInfo> {
        self.last_error.as_ref()
    }

    /// Execute a compiled chunk to completion.
    pub fn interpret(&mut self, chunk: &Chunk) -> InterpretResult {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        self.global_cache.clear();
        self.property_cache.clear();
        self.property_misses.clear();
        self.property_megamorphic.clear();
        self.last_property_site = None;
        self.call_cache.clear();
        self.instance_versions.clear();
        self.last_error = None;
        self.run_flags = flags::flags();
        self.jit.set_config(JitConfig::from_flags());

        let function = function::create_function(VMFunction::new("<script>", 0, 0, chunk.clone()));
        let closure = function::create_closure(function, Vec::new());
        self.script_closure = Some(closure);
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots: 0,
        });

        self.alloc_checkpoint = gc::young_allocations();

        // Publish roots and the closure-callback trampoline for the
        // duration of the run; `self` cannot move while `run` borrows it.
        let ctx = self as *const Vm as usize;
        unsafe { gc::register_roots(ctx, gc_roots::scan_vm_roots) };
        self.interp.set_vm_invoke(Some((ctx, vm_invoke_trampoline)));
        let result = self.run();
        self.interp.set_vm_invoke(None);
        gc::unregister_roots(ctx);
        result
    }

    // =========================================================================
    // Frame and stack access
    // =========================================================================

    #[inline]
    pub(crate) fn current_chunk(&self) -> &'static Chunk {
        let frame = self.frames.last().expect("no active frame");
        &function::as_function(closure::function_of(frame.closure)).chunk
    }

    #[inline]
    pub(crate) fn frame(&self) -> &CallFrame {
        self.frames.last().expect("no active frame")
    }

    #[inline]
    pub(crate) fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("no active frame")
    }

    #[inline]
    pub(crate) fn read_byte(&mut self) -> u8 {
        let chunk = self.current_chunk();
        let frame = self.frame_mut();
        let b = chunk.code()[frame.ip];
        frame.ip += 1;
        b
    }

    #[inline]
    pub(crate) fn read_short(&mut self) -> u16 {
        let hi = self.read_byte() as u16;
        let lo = self.read_byte() as u16;
        (hi << 8) | lo
    }

    #[inline]
    pub(crate) fn read_constant(&mut self) -> Value {
        let idx = self.read_byte() as usize;
        self.current_chunk().constants()[idx]
    }

    #[inline]
    pub(crate) fn read_string(&mut self) -> IStr {
        self.read_constant().as_str()
    }

    /// Absolute address of the byte at the current ip - the cache key for
    /// the operand the next read will consume.
    #[inline]
    pub(crate) fn site_addr(&self) -> usize {
        let chunk = self.current_chunk();
        chunk.code().as_ptr() as usize + self.frame().ip
    }

    #[inline]
    pub(crate) fn push(&mut self, v: Value) -> bool {
        if self.stack.len() >= STACK_MAX {
            return false;
        }
        self.stack.push(v);
        true
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Value {
        self.stack.pop().expect("value stack underflow")
    }

    #[inline]
    pub(crate) fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    /// The VM truthiness rule: only nil and false are falsy.
    #[inline]
    pub(crate) fn is_falsey(v: Value) -> bool {
        v.is_nil() || (v.is_bool() && !v.as_bool())
    }

    pub(crate) fn runtime_error(&mut self, code: ErrorCode, message: impl Into<String>) -> InterpretResult {
        let message = message.into();
        let (line, column) = match self.frames.last() {
            Some(frame) => {
                let li = self.current_chunk().line_info(frame.ip.saturating_sub(1));
                (li.line, li.column)
            }
            None => (0, 0),
        };
        output::error_line(&format!(
            "[{}] line {}, col {}: {}",
            code, line, column, message
        ));
        self.last_error = Some(RuntimeErrorInfo {
            code,
            line,
            column,
            message,
        });
        InterpretResult::RuntimeError
    }

    // =========================================================================
    // Dispatch loop
    // =========================================================================

    fn run(&mut self) -> InterpretResult {
        self.run_until(0)
    }

    /// Dispatch until the frame count drops back to `base_depth` (0 for a
    /// top-level run; the current depth minus one for nested entry).
    fn run_until(&mut self, base_depth: usize) -> InterpretResult {
        macro_rules! binary_number_op {
            ($self:ident, $op:tt) => {{
                if !$self.peek(0).is_number() || !$self.peek(1).is_number() {
                    return $self.runtime_error(ErrorCode::TypeMismatch, "Operands must be numbers.");
                }
                let b = $self.pop().as_number();
                let a = $self.pop().as_number();
                $self.stack.push(Value::number(a $op b));
            }};
        }
        macro_rules! compare_op {
            ($self:ident, $op:tt) => {{
                if !$self.peek(0).is_number() || !$self.peek(1).is_number() {
                    return $self.runtime_error(ErrorCode::TypeMismatch, "Operands must be numbers.");
                }
                let b = $self.pop().as_number();
                let a = $self.pop().as_number();
                $self.stack.push(Value::boolean(a $op b));
            }};
        }
        macro_rules! bitwise_op {
            ($self:ident, $f:expr) => {{
                if !$self.peek(0).is_number() || !$self.peek(1).is_number() {
                    return $self.runtime_error(ErrorCode::TypeMismatch, "Operands must be numbers.");
                }
                let b = $self.pop().as_number() as i64;
                let a = $self.pop().as_number() as i64;
                let f: fn(i64, i64) -> i64 = $f;
                $self.stack.push(Value::number(f(a, b) as f64));
            }};
        }

        loop {
            let byte = self.read_byte();
            let op = match OpCode::try_from(byte) {
                Ok(op) => op,
                Err(_) => {
                    return self.runtime_error(
                        ErrorCode::TypeMismatch,
                        format!("Unknown opcode {:#04x}.", byte),
                    )
                }
            };

            match op {
                OpCode::Constant => {
                    let v = self.read_constant();
                    if !self.push(v) {
                        return self.runtime_error(ErrorCode::StackOverflow, "Stack overflow.");
                    }
                }
                OpCode::Nil => {
                    if !self.push(Value::nil()) {
                        return self.runtime_error(ErrorCode::StackOverflow, "Stack overflow.");
                    }
                }
                OpCode::True => {
                    if !self.push(Value::boolean(true)) {
                        return self.runtime_error(ErrorCode::StackOverflow, "Stack overflow.");
                    }
                }
                OpCode::False => {
                    if !self.push(Value::boolean(false)) {
                        return self.runtime_error(ErrorCode::StackOverflow, "Stack overflow.");
                    }
                }
                OpCode::Pop => {
                    self.pop();
                }

                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let v = self.pop();
                    self.globals.define(name, v);
                }
                OpCode::GetGlobal => {
                    let site = self.site_addr();
                    let name = self.read_string();
                    let Some(v) = self.global_cached_lookup(site, name) else {
                        return self.runtime_error(
                            ErrorCode::UndefinedVariable,
                            format!("Undefined variable '{}'.", name.as_str()),
                        );
                    };
                    if !self.push(v) {
                        return self.runtime_error(ErrorCode::StackOverflow, "Stack overflow.");
                    }
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let v = self.peek(0);
                    if !self.globals.assign(name, v) {
                        return self.runtime_error(
                            ErrorCode::UndefinedVariable,
                            format!("Undefined variable '{}'.", name.as_str()),
                        );
                    }
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frame().slots;
                    let v = self.stack[base + slot];
                    if !self.push(v) {
                        return self.runtime_error(ErrorCode::StackOverflow, "Stack overflow.");
                    }
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frame().slots;
                    self.stack[base + slot] = self.peek(0);
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let uv = closure::upvalue(self.frame().closure, slot);
                    let v = upvalue::read(uv, &self.stack);
                    if !self.push(v) {
                        return self.runtime_error(ErrorCode::StackOverflow, "Stack overflow.");
                    }
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let uv = closure::upvalue(self.frame().closure, slot);
                    let v = self.peek(0);
                    upvalue::write(uv, &mut self.stack, v);
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }

                OpCode::Add => {
                    if self.peek(0).is_string() && self.peek(1).is_string() {
                        let b = self.pop();
                        let a = self.pop();
                        let joined = format!("{}{}", a.as_str().as_str(), b.as_str().as_str());
                        self.stack.push(Value::string(intern(&joined)));
                    } else if self.peek(0).is_number() && self.peek(1).is_number() {
                        let b = self.pop().as_number();
                        let a = self.pop().as_number();
                        self.stack.push(Value::number(a + b));
                    } else {
                        return self.runtime_error(
                            ErrorCode::TypeMismatch,
                            "Operands must be two numbers or two strings.",
                        );
                    }
                }
                OpCode::Subtract => binary_number_op!(self, -),
                OpCode::Multiply => binary_number_op!(self, *),
                OpCode::Divide => {
                    if !self.peek(0).is_number() || !self.peek(1).is_number() {
                        return self
                            .runtime_error(ErrorCode::TypeMismatch, "Operands must be numbers.");
                    }
                    if self.peek(0).as_number() == 0.0 {
                        return self.runtime_error(ErrorCode::DivisionByZero, "Division by zero.");
                    }
                    let b = self.pop().as_number();
                    let a = self.pop().as_number();
                    self.stack.push(Value::number(a / b));
                }
                OpCode::Negate => {
                    if !self.peek(0).is_number() {
                        return self
                            .runtime_error(ErrorCode::TypeMismatch, "Operand must be a number.");
                    }
                    let v = self.pop().as_number();
                    self.stack.push(Value::number(-v));
                }
                OpCode::BitAnd => bitwise_op!(self, |a, b| a & b),
                OpCode::BitOr => bitwise_op!(self, |a, b| a | b),
                OpCode::BitXor => bitwise_op!(self, |a, b| a ^ b),
                OpCode::ShiftLeft => bitwise_op!(self, |a, b| a << (b & 63)),
                OpCode::ShiftRight => bitwise_op!(self, |a, b| a >> (b & 63)),

                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.stack.push(Value::boolean(value::is_equal(a, b)));
                }
                OpCode::Greater => compare_op!(self, >),
                OpCode::Less => compare_op!(self, <),
                OpCode::Not => {
                    let v = self.pop();
                    self.stack.push(Value::boolean(Self::is_falsey(v)));
                }

                OpCode::Jump => {
                    let offset = self.read_short() as usize;
                    self.frame_mut().ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short() as usize;
                    if Self::is_falsey(self.peek(0)) {
                        self.frame_mut().ip += offset;
                    }
                }
                OpCode::Loop => {
                    let site = self.site_addr();
                    let offset = self.read_short() as usize;
                    let count = {
                        let counter = self.loop_hotness.entry(site).or_default();
                        counter.fetch_add(1, Ordering::Relaxed) + 1
                    };
                    if count == self.jit.effective_loop_threshold() {
                        self.jit.offer_loop(site);
                    }
                    if let Some(result) = self.check_alloc_rate() {
                        return result;
                    }
                    self.frame_mut().ip -= offset;
                }

                OpCode::Print => {
                    let v = self.pop();
                    output::writeln(&value::to_display_string(v));
                }

                OpCode::Call => {
                    let site = self.site_addr();
                    let argc = self.read_byte() as usize;
                    if !self.call_cached(site, argc) {
                        return InterpretResult::RuntimeError;
                    }
                }

                OpCode::Closure => {
                    if let Err(result) = self.op_closure_inner() {
                        return result;
                    }
                }

                OpCode::Return => {
                    if !self.op_return() || self.frames.len() <= base_depth {
                        return InterpretResult::Ok;
                    }
                }

                OpCode::GetProperty => {
                    let site = self.site_addr();
                    let name = self.read_string();
                    let inst_val = self.peek(0);
                    if !inst_val.is_instance() {
                        return self.runtime_error(
                            ErrorCode::TypeMismatch,
                            "Only instances have properties.",
                        );
                    }
                    let inst = inst_val.as_object();
                    self.last_property_site = Some(site);

                    if let Some(v) = self.property_cache_lookup(site, inst, name) {
                        let top = self.stack.len() - 1;
                        self.stack[top] = v;
                        continue;
                    }

                    let Some(v) = instance::get(inst, name) else {
                        return self.runtime_error(
                            ErrorCode::UndefinedVariable,
                            format!("Undefined property '{}'.", name.as_str()),
                        );
                    };
                    self.property_cache_fill(site, inst, name, v);
                    let top = self.stack.len() - 1;
                    self.stack[top] = v;
                }
                OpCode::SetProperty => {
                    let name = self.read_string();
                    if !self.op_set_property(name) {
                        return self
                            .runtime_error(ErrorCode::TypeMismatch, "Only instances have fields.");
                    }
                }

                OpCode::GetIndex => {
                    let index = self.pop();
                    let object = self.pop();
                    match self.index_get(object, index) {
                        Ok(v) => self.stack.push(v),
                        Err(result) => return result,
                    }
                }
                OpCode::SetIndex => {
                    let v = self.pop();
                    let index = self.pop();
                    let object = self.pop();
                    if let Err(result) = self.index_set(object, index, v) {
                        return result;
                    }
                    self.stack.push(v);
                }

                OpCode::EnsurePropertyDefault => {
                    let name = self.read_string();
                    let op_kind = self.read_byte();
                    let inst_val = self.peek(1);
                    if !inst_val.is_instance() {
                        return self.runtime_error(
                            ErrorCode::TypeMismatch,
                            "Only instances have properties.",
                        );
                    }
                    if op_kind <= 8 {
                        let inst = inst_val.as_object();
                        if !instance::has(inst, name) {
                            instance::set(inst, name, Value::number(0.0));
                            *self.instance_versions.entry(inst.addr()).or_insert(0) += 1;
                        }
                    }
                }
                OpCode::EnsureIndexDefault => {
                    let op_kind = self.read_byte();
                    let index = self.peek(1);
                    let object = self.peek(2);
                    if op_kind <= 8 {
                        if let Err(result) = self.ensure_index_default(object, index) {
                            return result;
                        }
                    }
                }
            }
        }
    }

    // =========================================================================
    // Indexing
    // =========================================================================

    pub(crate) fn index_get(&mut self, object: Value, index: Value) -> Result<Value, InterpretResult> {
        if object.is_array() {
            if !index.is_number() {
                return Err(
                    self.runtime_error(ErrorCode::TypeMismatch, "Array index must be a number.")
                );
            }
            let arr = object.as_object();
            let i = index.as_number() as i64;
            if i < 0 || i as usize >= array::len(arr) {
                return Err(self.runtime_error(
                    ErrorCode::IndexOutOfBounds,
                    format!("Array index {} out of bounds.", i),
                ));
            }
            return Ok(array::get(arr, i as usize).unwrap_or(Value::nil()));
        }
        if object.is_map() {
            if !index.is_string() {
                return Err(
                    self.runtime_error(ErrorCode::TypeMismatch, "Map keys must be strings.")
                );
            }
            return Ok(hashmap::get(object.as_object(), index.as_str().as_str()));
        }
        Err(self.runtime_error(ErrorCode::NotIndexable, "Can only index arrays and maps."))
    }

    pub(crate) fn index_set(
        &mut self,
        object: Value,
        index: Value,
        v: Value,
    ) -> Result<(), InterpretResult> {
        if object.is_array() {
            if !index.is_number() {
                return Err(
                    self.runtime_error(ErrorCode::TypeMismatch, "Array index must be a number.")
                );
            }
            let arr = object.as_object();
            let i = index.as_number() as i64;
            if i < 0 || !array::set(arr, i as usize, v) {
                return Err(self.runtime_error(
                    ErrorCode::IndexOutOfBounds,
                    format!("Array index {} out of bounds.", i),
                ));
            }
            return Ok(());
        }
        if object.is_map() {
            if !index.is_string() {
                return Err(
                    self.runtime_error(ErrorCode::TypeMismatch, "Map keys must be strings.")
                );
            }
            hashmap::set(object.as_object(), index.as_str().as_str(), v);
            return Ok(());
        }
        Err(self.runtime_error(ErrorCode::NotIndexable, "Can only index arrays and maps."))
    }

    /// Seed a zero default under a compound assignment target. Arithmetic
    /// and bitwise kinds both seed the number 0.
    fn ensure_index_default(&mut self, object: Value, index: Value) -> Result<(), InterpretResult> {
        if object.is_map() {
            if !index.is_string() {
                return Err(
                    self.runtime_error(ErrorCode::TypeMismatch, "Map keys must be strings.")
                );
            }
            hashmap::ensure_default(
                object.as_object(),
                index.as_str().as_str(),
                Value::number(0.0),
            );
            return Ok(());
        }
        if object.is_array() {
            if !index.is_number() {
                return Err(
                    self.runtime_error(ErrorCode::TypeMismatch, "Array index must be a number.")
                );
            }
            let i = index.as_number() as i64;
            if i < 0 || i as usize >= array::len(object.as_object()) {
                return Err(self.runtime_error(
                    ErrorCode::IndexOutOfBounds,
                    format!("Array index {} out of bounds.", i),
                ));
            }
            return Ok(());
        }
        Err(self.runtime_error(ErrorCode::NotIndexable, "Can only index arrays and maps."))
    }

    // =========================================================================
    // Property inline cache
    // =========================================================================

    fn instance_version(&self, inst: ObjRef) -> u64 {
        self.instance_versions.get(&inst.addr()).copied().unwrap_or(0)
    }

    fn property_cache_lookup(&mut self, site: usize, inst: ObjRef, name: IStr) -> Option<Value> {
        if self.property_megamorphic.contains(&site) {
            return None;
        }
        let version = self.instance_version(inst);
        let entries = self.property_cache.get_mut(&site)?;
        let pos = entries.iter().position(|e| {
            e.instance == inst.addr() && e.name == name && e.version == version
        })?;
        // Most-recently-matched entry moves to the front.
        let entry = entries.remove(pos);
        let v = entry.value;
        entries.insert(0, entry);
        Some(v)
    }

    fn property_cache_fill(&mut self, site: usize, inst: ObjRef, name: IStr, v: Value) {
        let misses = self.property_misses.entry(site).or_insert(0);
        *misses += 1;
        if *misses >= PROPERTY_IC_MISS_LIMIT {
            // Too many shapes at this site; stop caching entirely.
            self.property_megamorphic.insert(site);
            self.property_cache.remove(&site);
            return;
        }
        let version = self.instance_version(inst);
        let entries = self.property_cache.entry(site).or_default();
        entries.insert(
            0,
            PropertyCacheEntry {
                instance: inst.addr(),
                name,
                version,
                value: v,
            },
        );
        // Evict the least-recently-matched entry.
        entries.truncate(PROPERTY_IC_CAPACITY);
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Push a frame for `target` (a VMClosure object). The Err side carries
    /// the final interpret result for the caller to return.
    pub(crate) fn call_closure(&mut self, target: ObjRef, argc: usize) -> Result<(), InterpretResult> {
        let fn_ref = closure::function_of(target);
        let func = function::as_function(fn_ref);
        if func.arity != -1 && argc as i32 != func.arity {
            return Err(self.runtime_error(
                ErrorCode::ArityMismatch,
                format!("Expected {} arguments but got {}.", func.arity, argc),
            ));
        }

        let frame_limit = if self.run_flags.ids_enabled {
            FRAMES_MAX.min(self.run_flags.ids_stack_max)
        } else {
            FRAMES_MAX
        };
        if self.frames.len() >= frame_limit {
            return Err(self.runtime_error(ErrorCode::StackOverflow, "Stack overflow."));
        }

        let count = {
            let counter = self.function_hotness.entry(fn_ref.addr()).or_default();
            counter.fetch_add(1, Ordering::Relaxed) + 1
        };
        if count == self.jit.effective_function_threshold() {
            self.jit.offer_function(fn_ref.addr());
        }

        self.frames.push(CallFrame {
            closure: target,
            ip: 0,
            slots: self.stack.len() - argc - 1,
        });
        Ok(())
    }

    /// Generic call dispatch. On success returns the closure a future cache
    /// hit may call directly (None for bridged callables).
    pub(crate) fn call_value(
        &mut self,
        callee: Value,
        argc: usize,
    ) -> Result<Option<ObjRef>, InterpretResult> {
        if !callee.is_object() {
            return Err(self.runtime_error(
                ErrorCode::NotCallable,
                "Can only call functions and classes.",
            ));
        }
        let obj = callee.as_object();
        match obj.get() {
            HeapObj::Closure(_) => {
                self.call_closure(obj, argc)?;
                Ok(Some(obj))
            }
            HeapObj::Function(func) => {
                if func.upvalue_count != 0 {
                    return Err(self.runtime_error(
                        ErrorCode::NotCallable,
                        "Function with captures requires a closure.",
                    ));
                }
                let wrapper = function::create_closure(obj, Vec::new());
                self.call_closure(wrapper, argc)?;
                Ok(Some(wrapper))
            }
            HeapObj::Callable(callable) => {
                let arity = callable.arity();
                self.bridge_call(callee, argc, arity)
            }
            HeapObj::Class(_) => {
                let arity = class::arity(obj);
                self.bridge_call(callee, argc, arity)
            }
            _ => Err(self.runtime_error(
                ErrorCode::NotCallable,
                "Can only call functions and classes.",
            )),
        }
    }

    /// The VM -> interpreter bridge: materialize arguments, invoke the
    /// callable, convert thrown errors into `RuntimeError`, and reclaim
    /// bridge-local temporaries through an ephemeral GC frame.
    fn bridge_call(
        &mut self,
        callee: Value,
        argc: usize,
        arity: i32,
    ) -> Result<Option<ObjRef>, InterpretResult> {
        if arity != -1 && argc as i32 != arity {
            return Err(self.runtime_error(
                ErrorCode::ArityMismatch,
                format!("Expected {} arguments but got {}.", arity, argc),
            ));
        }
        let args: Vec<Value> = self.stack[self.stack.len() - argc..].to_vec();

        gc::ephemeral_enter();
        let outcome = self.interp.call_value(callee, &args);
        match outcome {
            Ok(result) => {
                gc::ephemeral_escape_deep(result);
                gc::ephemeral_leave();
                let new_len = self.stack.len() - argc - 1;
                self.stack.truncate(new_len);
                self.stack.push(result);
                Ok(None)
            }
            Err(err) => {
                gc::ephemeral_leave();
                Err(self.runtime_error(err.code, err.message))
            }
        }
    }

    // =========================================================================
    // Shared instruction bodies (dispatch loop + C-ABI surface)
    // =========================================================================

    /// Serve a global read from the per-site cache when the name matches
    /// and the global version is unchanged; otherwise resolve through the
    /// environment and refresh the entry. None means undefined.
    pub(crate) fn global_cached_lookup(&mut self, site: usize, name: IStr) -> Option<Value> {
        let version = environment::global_version();
        if let Some(entry) = self.global_cache.get(&site) {
            if entry.name == name && entry.version == version {
                return Some(entry.value);
            }
        }
        let v = self.globals.get(name)?;
        self.global_cache.insert(
            site,
            GlobalCacheEntry {
                name,
                version,
                value: v,
            },
        );
        Some(v)
    }

    /// `Closure idx` body: read the function constant and its upvalue
    /// descriptor pairs, build the closure, push it.
    pub(crate) fn op_closure_inner(&mut self) -> Result<(), InterpretResult> {
        let fn_const = self.read_constant();
        if !fn_const.is_vm_function() {
            return Err(self.runtime_error(ErrorCode::TypeMismatch, "Expected function constant."));
        }
        let fn_ref = fn_const.as_object();
        let count = function::as_function(fn_ref).upvalue_count;
        let mut upvalues = Vec::with_capacity(count);
        for _ in 0..count {
            let is_local = self.read_byte();
            let index = self.read_byte() as usize;
            if is_local == 1 {
                let base = self.frame().slots;
                upvalues.push(self.capture_upvalue(base + index));
            } else {
                upvalues.push(closure::upvalue(self.frame().closure, index));
            }
        }
        let new_closure = function::create_closure(fn_ref, upvalues);
        if !self.push(Value::object(new_closure)) {
            return Err(self.runtime_error(ErrorCode::StackOverflow, "Stack overflow."));
        }
        Ok(())
    }

    pub(crate) fn op_closure(&mut self) -> bool {
        self.op_closure_inner().is_ok()
    }

    /// `Return` body. True while frames remain.
    pub(crate) fn op_return(&mut self) -> bool {
        let result = self.pop();
        let frame = *self.frame();
        self.close_upvalues(frame.slots);
        self.frames.pop();
        if self.frames.is_empty() {
            return false;
        }
        self.stack.truncate(frame.slots);
        self.stack.push(result);
        true
    }

    /// `SetProperty name` body: [instance, value] -> [value], bumping the
    /// instance version. False if the target is not an instance.
    pub(crate) fn op_set_property(&mut self, name: IStr) -> bool {
        let v = self.peek(0);
        let inst_val = self.peek(1);
        if !inst_val.is_instance() {
            return false;
        }
        let inst = inst_val.as_object();
        instance::set(inst, name, v);
        *self.instance_versions.entry(inst.addr()).or_insert(0) += 1;
        let len = self.stack.len();
        self.stack[len - 2] = v;
        self.stack.pop();
        true
    }

    /// `Call argc` body with cache consult and update. False on error.
    pub(crate) fn call_cached(&mut self, site: usize, argc: usize) -> bool {
        let callee = self.peek(argc);
        let use_ic = !self.run_flags.disable_call_ic;
        if use_ic && callee.is_object() {
            if let Some(entry) = self.call_cache.get(&site) {
                if entry.callee == callee.as_object().addr() {
                    debug_assert!(match entry.kind {
                        CallCacheKind::VMClosure => callee.is_vm_closure(),
                        CallCacheKind::VMFunction => callee.is_vm_function(),
                    });
                    let cached = entry.closure;
                    return self.call_closure(cached, argc).is_ok();
                }
            }
        }
        match self.call_value(callee, argc) {
            Err(_) => false,
            Ok(Some(used_closure)) => {
                if use_ic && callee.is_object() {
                    let kind = if callee.is_vm_closure() {
                        CallCacheKind::VMClosure
                    } else {
                        CallCacheKind::VMFunction
                    };
                    self.call_cache.insert(
                        site,
                        CallCacheEntry {
                            callee: callee.as_object().addr(),
                            kind,
                            closure: used_closure,
                        },
                    );
                }
                true
            }
            Ok(None) => true,
        }
    }

    /// Property-cache probe for the ABI surface (no fill on miss).
    pub(crate) fn property_cached_lookup(
        &mut self,
        site: usize,
        inst: ObjRef,
        name: IStr,
    ) -> Option<Value> {
        self.property_cache_lookup(site, inst, name)
    }

    // === Raw stack/upvalue accessors for the ABI surface ===

    pub(crate) fn stack_len(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn stack_at(&self, index: usize) -> Value {
        self.stack[index]
    }

    pub(crate) fn stack_set(&mut self, index: usize, v: Value) {
        self.stack[index] = v;
    }

    pub(crate) fn stack_replace_top(&mut self, v: Value) {
        let top = self.stack.len() - 1;
        self.stack[top] = v;
    }

    pub(crate) fn globals_define(&self, name: IStr, v: Value) {
        self.globals.define(name, v);
    }

    pub(crate) fn globals_assign(&self, name: IStr, v: Value) -> bool {
        self.globals.assign(name, v)
    }

    pub(crate) fn upvalue_read(&self, uv: ObjRef) -> Value {
        upvalue::read(uv, &self.stack)
    }

    pub(crate) fn upvalue_write(&mut self, uv: ObjRef, v: Value) {
        upvalue::write(uv, &mut self.stack, v);
    }

    // =========================================================================
    // Upvalues
    // =========================================================================

    /// Reuse an open upvalue for `slot` or create one.
    pub(crate) fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        for &uv in &self.open_upvalues {
            if upvalue::open_slot(uv) == Some(slot) {
                return uv;
            }
        }
        let created = upvalue::create_open(slot);
        self.open_upvalues.push(created);
        created
    }

    /// Close every open upvalue whose slot is at or above `threshold`.
    pub(crate) fn close_upvalues(&mut self, threshold: usize) {
        for &uv in &self.open_upvalues {
            if let Some(slot) = upvalue::open_slot(uv) {
                if slot >= threshold {
                    upvalue::close(uv, &self.stack);
                }
            }
        }
        self.open_upvalues.retain(|&uv| upvalue::is_open(uv));
    }

    // =========================================================================
    // Intrusion detection hooks
    // =========================================================================

    fn check_alloc_rate(&mut self) -> Option<InterpretResult> {
        if !self.run_flags.ids_enabled || self.run_flags.ids_alloc_rate_max == 0 {
            return None;
        }
        let now = gc::young_allocations();
        if now - self.alloc_checkpoint > self.run_flags.ids_alloc_rate_max {
            return Some(
                self.runtime_error(ErrorCode::StackOverflow, "Allocation rate limit exceeded."),
            );
        }
        self.alloc_checkpoint = now;
        None
    }

    // =========================================================================
    // Introspection (diagnostics, tests, the C-ABI surface)
    // =========================================================================

    pub fn global_get(&self, name: &str) -> Option<Value> {
        self.globals.get(intern(name))
    }

    pub fn global_exists(&self, name: &str) -> bool {
        self.globals.exists(intern(name))
    }

    pub fn define_global(&self, name: &str, v: Value) {
        self.globals.define(intern(name), v);
    }

    /// Calls recorded for a function object (VMClosure or VMFunction value).
    pub fn function_hotness(&self, callee: Value) -> u32 {
        let fn_ref = if callee.is_vm_closure() {
            closure::function_of(callee.as_object())
        } else if callee.is_vm_function() {
            callee.as_object()
        } else {
            return 0;
        };
        self.function_hotness
            .get(&fn_ref.addr())
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn loop_hotness(&self, site: usize) -> u32 {
        self.loop_hotness
            .get(&site)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Whether a function object has crossed its hotness threshold.
    pub fn function_eligible_for_jit(&self, callee: Value) -> bool {
        let fn_ref = if callee.is_vm_closure() {
            closure::function_of(callee.as_object())
        } else if callee.is_vm_function() {
            callee.as_object()
        } else {
            return false;
        };
        self.jit.is_eligible(fn_ref.addr())
    }

    pub fn property_misses(&self, site: usize) -> u32 {
        self.property_misses.get(&site).copied().unwrap_or(0)
    }

    pub fn is_property_megamorphic(&self, site: usize) -> bool {
        self.property_megamorphic.contains(&site)
    }

    pub fn last_property_site(&self) -> Option<usize> {
        self.last_property_site
    }

    pub fn property_cache_len(&self, site: usize) -> usize {
        self.property_cache.get(&site).map(Vec::len).unwrap_or(0)
    }

    /// Re-enter the dispatch loop at an absolute code address inside the
    /// current function (on-stack replacement entry), running until the
    /// entered frame returns. Returns false if the address is outside the
    /// current chunk.
    pub fn osr_enter(&mut self, ip: usize) -> bool {
        if self.frames.is_empty() {
            return false;
        }
        let chunk = self.current_chunk();
        let base = chunk.code().as_ptr() as usize;
        if ip < base || ip >= base + chunk.len() {
            return false;
        }
        self.frame_mut().ip = ip - base;
        let base_depth = self.frames.len() - 1;
        matches!(self.run_until(base_depth), InterpretResult::Ok)
    }

    /// Run a callee synchronously to completion from native code (the
    /// interpreter's closure-callback trampoline). The arguments are pushed,
    /// the call dispatched, and nested frames run until they unwind.
    pub(crate) fn invoke_value(
        &mut self,
        callee: Value,
        args: &[Value],
    ) -> Result<Value, claw_runtime::NativeError> {
        use claw_runtime::NativeError;

        if self.stack.len() + args.len() + 1 > STACK_MAX {
            return Err(NativeError::new(ErrorCode::StackOverflow, "Stack overflow."));
        }
        let base_depth = self.frames.len();
        self.stack.push(callee);
        self.stack.extend_from_slice(args);

        let native_error = |vm: &Vm| {
            let info = vm.last_error.clone();
            match info {
                Some(info) => NativeError::new(info.code, info.message),
                None => NativeError::new(ErrorCode::TypeMismatch, "Runtime error."),
            }
        };

        match self.call_value(callee, args.len()) {
            Err(_) => Err(native_error(self)),
            Ok(_) => {
                if self.frames.len() > base_depth {
                    match self.run_until(base_depth) {
                        InterpretResult::Ok => Ok(self.pop()),
                        _ => Err(native_error(self)),
                    }
                } else {
                    // A bridged callable completed synchronously; its result
                    // is already on the stack.
                    Ok(self.pop())
                }
            }
        }
    }

    // === Root publication (called by the GC through gc_roots) ===

    pub(crate) fn for_each_root(&self, f: &mut dyn FnMut(Value)) {
        for v in &self.stack {
            f(*v);
        }
        for frame in &self.frames {
            f(Value::object(frame.closure));
        }
        if let Some(script) = self.script_closure {
            f(Value::object(script));
        }
        for &uv in &self.open_upvalues {
            f(Value::object(uv));
        }
        self.globals.for_each_value(&mut *f);
        for entry in self.global_cache.values() {
            f(entry.value);
        }
        for entries in self.property_cache.values() {
            for e in entries {
                f(e.value);
            }
        }
        for entry in self.call_cache.values() {
            f(Value::object(entry.closure));
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

/// Trampoline registered with the interpreter so natives can call VM
/// closures handed to them as callbacks.
///
/// # Safety
/// `ctx` is the address of the VM currently inside `interpret` on this
/// thread; the nested entry mutates the same VM the outer dispatch loop
/// is suspended in, which is sound only because the bridge holds no stack
/// or frame references across the native call.
unsafe fn vm_invoke_trampoline(
    ctx: usize,
    callee: Value,
    args: &[Value],
) -> Result<Value, claw_runtime::NativeError> {
    let vm = &mut *(ctx as *mut Vm);
    vm.invoke_value(callee, args)
}

// The fields involved in cross-thread access (the GC root scan) are only
// read while the owning thread is inside `interpret`.

impl Drop for Vm {
    fn drop(&mut self) {
        // Defensive: interpret() unregisters on exit, but a panicking run
        // must not leave a dangling root provider behind.
        gc::unregister_roots(self as *const Vm as usize);
    }
}
