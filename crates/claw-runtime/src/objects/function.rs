//! VM function and closure objects.

use crate::bytecode::Chunk;
use crate::gc;
use crate::objects::{HeapObj, ObjRef};

/// Template for a closure: name, arity, declared upvalue count and the
/// owning chunk. Allocated old-generation - functions outlive most
/// collections.
pub struct VMFunction {
    pub name: String,
    /// -1 means variadic.
    pub arity: i32,
    pub upvalue_count: usize,
    pub chunk: Chunk,
}

impl VMFunction {
    pub fn new(name: impl Into<String>, arity: i32, upvalue_count: usize, chunk: Chunk) -> Self {
        Self {
            name: name.into(),
            arity,
            upvalue_count,
            chunk,
        }
    }
}

/// A VMFunction bound to its captured upvalues - the runtime callable.
pub struct VMClosure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

pub fn create_function(function: VMFunction) -> ObjRef {
    gc::alloc_function(function)
}

/// Wrap a function and its captured upvalues into a closure. The closure is
/// old-generation, so each captured upvalue goes through the write barrier.
pub fn create_closure(function: ObjRef, upvalues: Vec<ObjRef>) -> ObjRef {
    debug_assert_eq!(
        as_function(function).upvalue_count,
        upvalues.len(),
        "closure upvalue count must match its function"
    );
    let closure = gc::alloc_closure(VMClosure {
        function,
        upvalues: upvalues.clone(),
    });
    for upvalue in upvalues {
        gc::barrier_write(closure, crate::value::Value::object(upvalue));
    }
    closure
}

pub fn as_function(obj: ObjRef) -> &'static VMFunction {
    match obj.get() {
        HeapObj::Function(f) => f,
        _ => panic!("not a function object"),
    }
}
