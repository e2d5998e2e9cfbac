//! # claw-natives
//!
//! The built-in function library. Registration through `register_all` is
//! the only way callables enter the globals at startup; the VM reaches
//! them through its interpreter bridge.

mod array;
mod builtin;
mod json;
mod map;
mod math;
mod string;
mod time;

use claw_common::ErrorCode;
use claw_runtime::gc;
use claw_runtime::objects::{NativeError, NativeFn, NativeFunction};
use claw_runtime::value::Value;
use claw_runtime::Interpreter;

/// Register every built-in into the interpreter's globals.
pub fn register_all(interp: &Interpreter) {
    builtin::register(interp);
    math::register(interp);
    string::register(interp);
    array::register(interp);
    map::register(interp);
    json::register(interp);
    time::register(interp);
}

/// Define one native function in the globals. Arity -1 means variadic.
pub(crate) fn define(interp: &Interpreter, name: &'static str, arity: i32, f: NativeFn) {
    let obj = gc::alloc_callable(Box::new(NativeFunction::new(name, arity, f)));
    interp.define_global(name, Value::object(obj));
}

// === Argument helpers shared by the native modules ===

pub(crate) fn want_number(args: &[Value], i: usize, what: &str) -> Result<f64, NativeError> {
    let v = args[i];
    if !v.is_number() {
        return Err(NativeError::type_mismatch(format!(
            "{} requires a number.",
            what
        )));
    }
    Ok(v.as_number())
}

pub(crate) fn want_string(
    args: &[Value],
    i: usize,
    what: &str,
) -> Result<&'static str, NativeError> {
    let v = args[i];
    if !v.is_string() {
        return Err(NativeError::type_mismatch(format!(
            "{} requires a string.",
            what
        )));
    }
    Ok(v.as_str().as_str())
}

pub(crate) fn want_array(
    args: &[Value],
    i: usize,
    what: &str,
) -> Result<claw_runtime::ObjRef, NativeError> {
    let v = args[i];
    if !v.is_array() {
        return Err(NativeError::type_mismatch(format!(
            "{} requires an array.",
            what
        )));
    }
    Ok(v.as_object())
}

pub(crate) fn want_map(
    args: &[Value],
    i: usize,
    what: &str,
) -> Result<claw_runtime::ObjRef, NativeError> {
    let v = args[i];
    if !v.is_map() {
        return Err(NativeError::type_mismatch(format!(
            "{} requires a hashmap.",
            what
        )));
    }
    Ok(v.as_object())
}

pub(crate) fn error(code: ErrorCode, message: impl Into<String>) -> NativeError {
    NativeError::new(code, message)
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// Interpreter with the full library registered, plus a direct handle
    /// on one native for calling it without going through a chunk.
    pub fn interp() -> Interpreter {
        let interp = Interpreter::new();
        register_all(&interp);
        interp
    }

    pub fn call(interp: &mut Interpreter, name: &str, args: &[Value]) -> Result<Value, NativeError> {
        let callee = interp
            .globals()
            .get(claw_runtime::intern(name))
            .unwrap_or_else(|| panic!("native {} not registered", name));
        interp.call_value(callee, args)
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;

    #[test]
    fn test_register_all_defines_natives() {
        let interp = interp();
        for name in [
            "num", "str", "type", "len", "abs", "sqrt", "pow", "min", "max", "round", "floor",
            "ceil", "random", "sin", "cos", "tan", "log", "exp", "toUpper", "toLower", "substr",
            "indexOf", "trim", "split", "replace", "startsWith", "endsWith", "repeat",
            "charCodeAt", "fromCharCode", "arrayOf", "push", "pop", "reverse", "array_sum",
            "filter", "map", "mapOf", "keys", "values", "has", "remove", "jsonEncode",
            "jsonDecode", "clock", "now", "sleep",
        ] {
            assert!(
                interp.globals().get(claw_runtime::intern(name)).is_some(),
                "missing native {}",
                name
            );
        }
    }

    #[test]
    fn test_arity_checked_through_bridge() {
        let mut interp = interp();
        let err = call(&mut interp, "sqrt", &[]).unwrap_err();
        assert_eq!(err.code, claw_common::ErrorCode::ArityMismatch);
    }
}
