//! String built-ins.

use claw_runtime::objects::{array, NativeError};
use claw_runtime::string_pool::intern;
use claw_runtime::value::Value;
use claw_runtime::Interpreter;

use crate::{define, want_number, want_string};

pub fn register(interp: &Interpreter) {
    define(interp, "toUpper", 1, native_to_upper);
    define(interp, "toLower", 1, native_to_lower);
    define(interp, "substr", 3, native_substr);
    define(interp, "indexOf", 2, native_index_of);
    define(interp, "trim", 1, native_trim);
    define(interp, "split", 2, native_split);
    define(interp, "replace", 3, native_replace);
    define(interp, "startsWith", 2, native_starts_with);
    define(interp, "endsWith", 2, native_ends_with);
    define(interp, "repeat", 2, native_repeat);
    define(interp, "charCodeAt", 2, native_char_code_at);
    define(interp, "fromCharCode", 1, native_from_char_code);
}

fn native_to_upper(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let s = want_string(args, 0, "toUpper()")?;
    Ok(Value::string(intern(&s.to_uppercase())))
}

fn native_to_lower(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let s = want_string(args, 0, "toLower()")?;
    Ok(Value::string(intern(&s.to_lowercase())))
}

/// `substr(s, start, length)`. Negative start and length clamp to zero;
/// the window clamps to the end of the string. Offsets are byte offsets,
/// like `indexOf` and `charCodeAt`; a window that splits a multibyte
/// character yields replacement characters rather than an error.
fn native_substr(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let s = want_string(args, 0, "substr()")?;
    let start = (want_number(args, 1, "substr()")? as i64).max(0) as usize;
    let length = (want_number(args, 2, "substr()")? as i64).max(0) as usize;
    if start >= s.len() {
        return Ok(Value::string(intern("")));
    }
    let end = (start + length).min(s.len());
    Ok(Value::string(intern(&String::from_utf8_lossy(
        &s.as_bytes()[start..end],
    ))))
}

/// Byte index of the first occurrence, or -1.
fn native_index_of(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let s = want_string(args, 0, "indexOf()")?;
    let needle = want_string(args, 1, "indexOf()")?;
    Ok(Value::number(match s.find(needle) {
        Some(pos) => pos as f64,
        None => -1.0,
    }))
}

fn native_trim(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let s = want_string(args, 0, "trim()")?;
    Ok(Value::string(intern(s.trim())))
}

/// Split on a delimiter; an empty delimiter splits into single characters.
fn native_split(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let s = want_string(args, 0, "split()")?;
    let delim = want_string(args, 1, "split()")?;
    let parts: Vec<Value> = if delim.is_empty() {
        s.chars()
            .map(|c| Value::string(intern(&c.to_string())))
            .collect()
    } else {
        s.split(delim)
            .map(|p| Value::string(intern(p)))
            .collect()
    };
    Ok(Value::object(array::create(parts)))
}

fn native_replace(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let s = want_string(args, 0, "replace()")?;
    let from = want_string(args, 1, "replace()")?;
    let to = want_string(args, 2, "replace()")?;
    if from.is_empty() {
        return Ok(args[0]);
    }
    Ok(Value::string(intern(&s.replace(from, to))))
}

fn native_starts_with(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let s = want_string(args, 0, "startsWith()")?;
    let prefix = want_string(args, 1, "startsWith()")?;
    Ok(Value::boolean(s.starts_with(prefix)))
}

fn native_ends_with(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let s = want_string(args, 0, "endsWith()")?;
    let suffix = want_string(args, 1, "endsWith()")?;
    Ok(Value::boolean(s.ends_with(suffix)))
}

fn native_repeat(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let s = want_string(args, 0, "repeat()")?;
    let n = want_number(args, 1, "repeat()")?;
    if n < 0.0 {
        return Err(NativeError::type_mismatch(
            "repeat() requires a non-negative count.",
        ));
    }
    Ok(Value::string(intern(&s.repeat(n as usize))))
}

/// Byte value at an index; out of range is an error.
fn native_char_code_at(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let s = want_string(args, 0, "charCodeAt()")?;
    let i = want_number(args, 1, "charCodeAt()")? as i64;
    if i < 0 || i as usize >= s.len() {
        return Err(crate::error(
            claw_common::ErrorCode::IndexOutOfBounds,
            format!("charCodeAt() index {} out of range.", i),
        ));
    }
    Ok(Value::number(s.as_bytes()[i as usize] as f64))
}

fn native_from_char_code(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let code = want_number(args, 0, "fromCharCode()")? as u32;
    let c = char::from_u32(code).ok_or_else(|| {
        NativeError::type_mismatch("fromCharCode() requires a valid code point.")
    })?;
    Ok(Value::string(intern(&c.to_string())))
}
