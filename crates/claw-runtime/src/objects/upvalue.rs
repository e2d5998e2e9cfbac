//! Upvalue objects.
//!
//! An open upvalue refers to a live value-stack slot by absolute index;
//! closing copies the value into the upvalue itself.

use crate::gc;
use crate::objects::{HeapObj, ObjRef};
use crate::value::Value;

pub enum Upvalue {
    /// Absolute slot index into the owning VM's value stack.
    Open(usize),
    /// Owns the value after the stack slot died.
    Closed(Value),
}

pub fn create_open(slot: usize) -> ObjRef {
    gc::alloc_upvalue(Upvalue::Open(slot))
}

fn cell(obj: ObjRef) -> &'static std::cell::RefCell<Upvalue> {
    match obj.get() {
        HeapObj::Upvalue(c) => c,
        _ => panic!("not an upvalue object"),
    }
}

/// The stack slot this upvalue still points at, if open.
pub fn open_slot(obj: ObjRef) -> Option<usize> {
    match *cell(obj).borrow() {
        Upvalue::Open(slot) => Some(slot),
        Upvalue::Closed(_) => None,
    }
}

pub fn is_open(obj: ObjRef) -> bool {
    open_slot(obj).is_some()
}

/// Read through the upvalue given the owning VM's stack.
pub fn read(obj: ObjRef, stack: &[Value]) -> Value {
    match *cell(obj).borrow() {
        Upvalue::Open(slot) => stack[slot],
        Upvalue::Closed(v) => v,
    }
}

/// Write through the upvalue given the owning VM's stack.
pub fn write(obj: ObjRef, stack: &mut [Value], v: Value) {
    let mut state = cell(obj).borrow_mut();
    match *state {
        Upvalue::Open(slot) => stack[slot] = v,
        Upvalue::Closed(_) => {
            gc::barrier_write(obj, v);
            *state = Upvalue::Closed(v);
        }
    }
}

/// Move the pointed-at stack value into the upvalue.
pub fn close(obj: ObjRef, stack: &[Value]) {
    let mut state = cell(obj).borrow_mut();
    if let Upvalue::Open(slot) = *state {
        let v = stack[slot];
        gc::barrier_write(obj, v);
        *state = Upvalue::Closed(v);
    }
}

/// The closed value, for GC tracing.
pub fn closed_value(obj: ObjRef) -> Option<Value> {
    match *cell(obj).borrow() {
        Upvalue::Open(_) => None,
        Upvalue::Closed(v) => Some(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_then_close() {
        let _g = crate::test_sync::shared();
        let mut stack = vec![Value::number(10.0), Value::number(20.0)];
        let uv = create_open(1);
        assert!(is_open(uv));
        assert_eq!(read(uv, &stack).as_number(), 20.0);

        write(uv, &mut stack, Value::number(21.0));
        assert_eq!(stack[1].as_number(), 21.0);

        close(uv, &stack);
        assert!(!is_open(uv));
        // The stack slot no longer matters.
        stack[1] = Value::nil();
        assert_eq!(read(uv, &stack).as_number(), 21.0);

        write(uv, &mut stack, Value::number(22.0));
        assert_eq!(closed_value(uv).unwrap().as_number(), 22.0);
    }
}
