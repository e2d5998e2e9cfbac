//! Time built-ins.

use std::time::{SystemTime, UNIX_EPOCH};

use claw_common::ErrorCode;
use claw_runtime::objects::NativeError;
use claw_runtime::value::Value;
use claw_runtime::{Interpreter, SandboxMode};

use crate::{define, want_number};

pub fn register(interp: &Interpreter) {
    define(interp, "clock", 0, native_clock);
    define(interp, "now", 0, native_now);
    define(interp, "sleep", 1, native_sleep);
}

/// Seconds since the Unix epoch, fractional.
fn native_clock(_: &mut Interpreter, _: &[Value]) -> Result<Value, NativeError> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Ok(Value::number(elapsed.as_secs_f64()))
}

/// Milliseconds since the Unix epoch.
fn native_now(_: &mut Interpreter, _: &[Value]) -> Result<Value, NativeError> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Ok(Value::number(elapsed.as_millis() as f64))
}

/// Block for the given number of milliseconds. Denied in the strict
/// sandbox.
fn native_sleep(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    if interp.globals().policy().sandbox == SandboxMode::Strict {
        return Err(NativeError::new(
            ErrorCode::TypeMismatch,
            "sleep() is not permitted in the strict sandbox.",
        ));
    }
    let ms = want_number(args, 0, "sleep()")?;
    if ms > 0.0 {
        std::thread::sleep(std::time::Duration::from_millis(ms as u64));
    }
    Ok(Value::nil())
}
