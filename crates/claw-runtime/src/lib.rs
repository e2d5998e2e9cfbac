//! # claw-runtime
//!
//! Shared runtime for the Claw VM and interpreter bridge:
//! - NaN-boxed `Value` representation
//! - process-wide string pool with stable pointer identity
//! - generational mark-and-sweep GC over an object registry
//! - heap object kinds (arrays, maps, classes, instances, callables,
//!   VM functions, closures, upvalues)
//! - lexically-scoped `Environment` with a global version counter
//! - bytecode (`OpCode`, `Chunk`)
//! - the interpreter context used by the VM's native-call bridge
//! - output sink with a capture mode for tests

pub mod bytecode;
pub mod environment;
pub mod gc;
pub mod interp;
pub mod objects;
pub mod output;
pub mod string_pool;
pub mod value;

pub use bytecode::{Chunk, LineInfo, OpCode};

/// The GC registry is process-wide, so in-crate tests coordinate: tests
/// that trigger collections take the exclusive guard, tests that merely
/// allocate take the shared one.
#[cfg(test)]
pub(crate) mod test_sync {
    use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

    static GUARD: RwLock<()> = RwLock::new(());

    pub fn shared() -> RwLockReadGuard<'static, ()> {
        GUARD.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn exclusive() -> RwLockWriteGuard<'static, ()> {
        GUARD.write().unwrap_or_else(|e| e.into_inner())
    }
}
pub use environment::{Environment, PolicyFlags, SandboxMode};
pub use interp::Interpreter;
pub use objects::{Callable, HeapObj, NativeError, NativeFunction, ObjRef};
pub use string_pool::{intern, IStr};
pub use value::Value;
