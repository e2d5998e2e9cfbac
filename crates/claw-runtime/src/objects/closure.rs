//! Closure object accessors.

use crate::objects::{function, HeapObj, ObjRef, VMClosure};

pub fn as_closure(obj: ObjRef) -> &'static VMClosure {
    match obj.get() {
        HeapObj::Closure(c) => c,
        _ => panic!("not a closure object"),
    }
}

pub fn function_of(obj: ObjRef) -> ObjRef {
    as_closure(obj).function
}

pub fn function_name(obj: ObjRef) -> String {
    function::as_function(function_of(obj)).name.clone()
}

pub fn upvalue(obj: ObjRef, index: usize) -> ObjRef {
    as_closure(obj).upvalues[index]
}

pub fn upvalue_count(obj: ObjRef) -> usize {
    as_closure(obj).upvalues.len()
}
