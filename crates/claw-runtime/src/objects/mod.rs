//! Heap object kinds.
//!
//! Every heap object is one variant of the closed `HeapObj` enum, owned by
//! the GC registry (`crate::gc`). Values carry the raw address; dereferencing
//! is valid for the duration of a single VM instruction because collection
//! only runs between instructions.

pub mod array;
pub mod class;
pub mod closure;
pub mod function;
pub mod hashmap;
pub mod instance;
pub mod upvalue;

use std::cell::RefCell;

use claw_common::ErrorCode;
use thiserror::Error;

use crate::interp::Interpreter;
use crate::value::Value;

pub use array::ClawArray;
pub use class::ClawClass;
pub use function::{VMClosure, VMFunction};
pub use hashmap::ClawHashMap;
pub use instance::ClawInstance;
pub use upvalue::Upvalue;

/// Address of a live heap object in the GC registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(usize);

impl ObjRef {
    #[inline]
    pub fn from_addr(addr: usize) -> Self {
        Self(addr)
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0
    }

    /// Dereference the object.
    ///
    /// Valid while the object is registered; the GC only frees objects
    /// between VM instructions, never inside one.
    #[inline]
    pub fn get(self) -> &'static HeapObj {
        unsafe { &*(self.0 as *const HeapObj) }
    }
}

impl std::fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjRef({:#x})", self.0)
    }
}

/// The closed set of heap object kinds.
pub enum HeapObj {
    Array(RefCell<ClawArray>),
    Map(ClawHashMap),
    Class(ClawClass),
    Instance(RefCell<ClawInstance>),
    Callable(Box<dyn Callable>),
    Function(VMFunction),
    Closure(VMClosure),
    Upvalue(RefCell<Upvalue>),
}

/// Object kind, used by the GC for pool dispatch and by diagnostics.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ObjKind {
    Array,
    Map,
    Class,
    Instance,
    Callable,
    Function,
    Closure,
    Upvalue,
}

impl HeapObj {
    pub fn kind(&self) -> ObjKind {
        match self {
            HeapObj::Array(_) => ObjKind::Array,
            HeapObj::Map(_) => ObjKind::Map,
            HeapObj::Class(_) => ObjKind::Class,
            HeapObj::Instance(_) => ObjKind::Instance,
            HeapObj::Callable(_) => ObjKind::Callable,
            HeapObj::Function(_) => ObjKind::Function,
            HeapObj::Closure(_) => ObjKind::Closure,
            HeapObj::Upvalue(_) => ObjKind::Upvalue,
        }
    }
}

/// Error raised by a native built-in or class constructor; the VM bridge
/// converts it into a `RuntimeError` return.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct NativeError {
    pub code: ErrorCode,
    pub message: String,
}

impl NativeError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TypeMismatch, message)
    }

    pub fn arity(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ArityMismatch, message)
    }
}

/// Anything the VM can delegate a call to through the interpreter bridge:
/// native built-ins and class constructors.
pub trait Callable: Send {
    /// Declared parameter count; -1 means variadic.
    fn arity(&self) -> i32;

    fn name(&self) -> &str;

    fn call(&self, interp: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError>;
}

/// Body type for native built-ins. A plain function pointer keeps natives
/// registrable from static tables.
pub type NativeFn = fn(&mut Interpreter, &[Value]) -> Result<Value, NativeError>;

/// A built-in function implemented in Rust.
pub struct NativeFunction {
    name: &'static str,
    arity: i32,
    func: NativeFn,
}

impl NativeFunction {
    pub fn new(name: &'static str, arity: i32, func: NativeFn) -> Self {
        Self { name, arity, func }
    }
}

impl Callable for NativeFunction {
    fn arity(&self) -> i32 {
        self.arity
    }

    fn name(&self) -> &str {
        self.name
    }

    fn call(&self, interp: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
        (self.func)(interp, args)
    }
}
