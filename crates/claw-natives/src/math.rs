//! Math built-ins.

use claw_runtime::objects::NativeError;
use claw_runtime::value::Value;
use claw_runtime::Interpreter;

use crate::{define, want_number};

pub fn register(interp: &Interpreter) {
    define(interp, "abs", 1, native_abs);
    define(interp, "sqrt", 1, native_sqrt);
    define(interp, "pow", 2, native_pow);
    define(interp, "min", 2, native_min);
    define(interp, "max", 2, native_max);
    define(interp, "round", 1, native_round);
    define(interp, "floor", 1, native_floor);
    define(interp, "ceil", 1, native_ceil);
    define(interp, "random", 0, native_random);
    define(interp, "sin", 1, native_sin);
    define(interp, "cos", 1, native_cos);
    define(interp, "tan", 1, native_tan);
    define(interp, "log", 1, native_log);
    define(interp, "exp", 1, native_exp);
}

fn native_abs(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    Ok(Value::number(want_number(args, 0, "abs()")?.abs()))
}

fn native_sqrt(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let n = want_number(args, 0, "sqrt()")?;
    if n < 0.0 {
        return Err(NativeError::type_mismatch(
            "sqrt() requires a non-negative number.",
        ));
    }
    Ok(Value::number(n.sqrt()))
}

fn native_pow(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let base = want_number(args, 0, "pow()")?;
    let exp = want_number(args, 1, "pow()")?;
    Ok(Value::number(base.powf(exp)))
}

fn native_min(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let a = want_number(args, 0, "min()")?;
    let b = want_number(args, 1, "min()")?;
    Ok(Value::number(a.min(b)))
}

fn native_max(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let a = want_number(args, 0, "max()")?;
    let b = want_number(args, 1, "max()")?;
    Ok(Value::number(a.max(b)))
}

fn native_round(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    Ok(Value::number(want_number(args, 0, "round()")?.round()))
}

fn native_floor(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    Ok(Value::number(want_number(args, 0, "floor()")?.floor()))
}

fn native_ceil(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    Ok(Value::number(want_number(args, 0, "ceil()")?.ceil()))
}

/// Uniform in [0, 1).
fn native_random(_: &mut Interpreter, _: &[Value]) -> Result<Value, NativeError> {
    Ok(Value::number(fastrand::f64()))
}

fn native_sin(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    Ok(Value::number(want_number(args, 0, "sin()")?.sin()))
}

fn native_cos(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    Ok(Value::number(want_number(args, 0, "cos()")?.cos()))
}

fn native_tan(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    Ok(Value::number(want_number(args, 0, "tan()")?.tan()))
}

/// Natural logarithm.
fn native_log(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let n = want_number(args, 0, "log()")?;
    if n <= 0.0 {
        return Err(NativeError::type_mismatch(
            "log() requires a positive number.",
        ));
    }
    Ok(Value::number(n.ln()))
}

fn native_exp(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    Ok(Value::number(want_number(args, 0, "exp()")?.exp()))
}

#[cfg(test)]
mod tests {
    use crate::test_util::{call, interp};
    use claw_runtime::value::Value;

    #[test]
    fn test_basics() {
        let mut i = interp();
        assert_eq!(
            call(&mut i, "abs", &[Value::number(-3.0)]).unwrap().as_number(),
            3.0
        );
        assert_eq!(
            call(&mut i, "pow", &[Value::number(2.0), Value::number(10.0)])
                .unwrap()
                .as_number(),
            1024.0
        );
        assert_eq!(
            call(&mut i, "min", &[Value::number(2.0), Value::number(-1.0)])
                .unwrap()
                .as_number(),
            -1.0
        );
    }

    #[test]
    fn test_domain_errors() {
        let mut i = interp();
        assert!(call(&mut i, "sqrt", &[Value::number(-1.0)]).is_err());
        assert!(call(&mut i, "log", &[Value::number(0.0)]).is_err());
        assert!(call(&mut i, "abs", &[Value::nil()]).is_err());
    }

    #[test]
    fn test_random_range() {
        let mut i = interp();
        for _ in 0..32 {
            let r = call(&mut i, "random", &[]).unwrap().as_number();
            assert!((0.0..1.0).contains(&r));
        }
    }
}
