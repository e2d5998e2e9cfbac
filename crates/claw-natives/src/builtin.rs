//! Core built-ins: `num`, `str`, `type`, `len`.

use claw_runtime::objects::{array, hashmap, NativeError};
use claw_runtime::string_pool::intern;
use claw_runtime::value::{self, Value};
use claw_runtime::Interpreter;

use crate::define;

pub fn register(interp: &Interpreter) {
    define(interp, "num", 1, native_num);
    define(interp, "str", 1, native_str);
    define(interp, "type", 1, native_type);
    define(interp, "len", 1, native_len);
}

/// Convert to a number: numbers pass through, strings parse, booleans map
/// to 0/1 and nil to 0.
fn native_num(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let v = args[0];
    if v.is_number() {
        return Ok(v);
    }
    if v.is_string() {
        return v
            .as_str()
            .as_str()
            .trim()
            .parse::<f64>()
            .map(Value::number)
            .map_err(|_| NativeError::type_mismatch("num() could not parse string."));
    }
    if v.is_bool() {
        return Ok(Value::number(if v.as_bool() { 1.0 } else { 0.0 }));
    }
    if v.is_nil() {
        return Ok(Value::number(0.0));
    }
    Err(NativeError::type_mismatch(
        "num() requires a number, string, bool or nil.",
    ))
}

fn native_str(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    Ok(Value::string(intern(&value::to_display_string(args[0]))))
}

fn native_type(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let v = args[0];
    let name = if v.is_nil() {
        "nil"
    } else if v.is_bool() {
        "bool"
    } else if v.is_number() {
        "number"
    } else if v.is_string() {
        "string"
    } else if v.is_array() {
        "array"
    } else if v.is_map() {
        "hashmap"
    } else if v.is_class() {
        "class"
    } else if v.is_instance() {
        "instance"
    } else if v.is_callable() || v.is_vm_function() || v.is_vm_closure() {
        "function"
    } else {
        "unknown"
    };
    Ok(Value::string(intern(name)))
}

/// Length of a string (bytes), array or hashmap.
fn native_len(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let v = args[0];
    if v.is_string() {
        return Ok(Value::number(v.as_str().len() as f64));
    }
    if v.is_array() {
        return Ok(Value::number(array::len(v.as_object()) as f64));
    }
    if v.is_map() {
        return Ok(Value::number(hashmap::len(v.as_object()) as f64));
    }
    Err(NativeError::type_mismatch(
        "len() requires a string, array or hashmap.",
    ))
}
