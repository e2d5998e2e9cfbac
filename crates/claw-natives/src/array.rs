//! Array built-ins.

use claw_runtime::objects::{array, NativeError};
use claw_runtime::value::{self, Value};
use claw_runtime::Interpreter;

use crate::{define, want_array, want_number};

pub fn register(interp: &Interpreter) {
    define(interp, "arrayOf", -1, native_array_of);
    define(interp, "push", 2, native_push);
    define(interp, "pop", 1, native_pop);
    define(interp, "reverse", 1, native_reverse);
    define(interp, "array_sum", 1, native_array_sum);
    define(interp, "filter", 2, native_filter);
    define(interp, "map", 2, native_map);
    define(interp, "map_add_scalar", 2, native_map_add_scalar);
}

/// Build an array from its arguments. Array literals lower to this.
fn native_array_of(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    Ok(Value::object(array::create(args.to_vec())))
}

/// Append and return the array.
fn native_push(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let arr = want_array(args, 0, "push()")?;
    array::push(arr, args[1]);
    Ok(args[0])
}

/// Remove and return the last element; nil when empty.
fn native_pop(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let arr = want_array(args, 0, "pop()")?;
    Ok(array::pop(arr).unwrap_or(Value::nil()))
}

/// Reverse in place and return the array.
fn native_reverse(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let arr = want_array(args, 0, "reverse()")?;
    array::reverse(arr);
    Ok(args[0])
}

fn native_array_sum(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let arr = want_array(args, 0, "array_sum()")?;
    let mut sum = 0.0;
    for v in array::snapshot(arr) {
        if !v.is_number() {
            return Err(NativeError::type_mismatch(
                "array_sum() requires an array of numbers.",
            ));
        }
        sum += v.as_number();
    }
    Ok(Value::number(sum))
}

/// New array of the elements for which the predicate is truthy.
fn native_filter(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let arr = want_array(args, 0, "filter()")?;
    let predicate = args[1];
    let mut kept = Vec::new();
    for v in array::snapshot(arr) {
        let keep = interp.call_value(predicate, &[v])?;
        if value::is_truthy(keep) {
            kept.push(v);
        }
    }
    Ok(Value::object(array::create(kept)))
}

/// New array of the callable applied to each element.
fn native_map(interp: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let arr = want_array(args, 0, "map()")?;
    let f = args[1];
    let mut mapped = Vec::with_capacity(array::len(arr));
    for v in array::snapshot(arr) {
        mapped.push(interp.call_value(f, &[v])?);
    }
    Ok(Value::object(array::create(mapped)))
}

/// New array with a scalar added to every numeric element.
fn native_map_add_scalar(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let arr = want_array(args, 0, "map_add_scalar()")?;
    let k = want_number(args, 1, "map_add_scalar()")?;
    let mut out = Vec::with_capacity(array::len(arr));
    for v in array::snapshot(arr) {
        if !v.is_number() {
            return Err(NativeError::type_mismatch(
                "map_add_scalar() requires an array of numbers.",
            ));
        }
        out.push(Value::number(v.as_number() + k));
    }
    Ok(Value::object(array::create(out)))
}

#[cfg(test)]
mod tests {
    use crate::test_util::{call, interp};
    use claw_runtime::objects::array;
    use claw_runtime::value::Value;

    #[test]
    fn test_array_of_and_push_pop() {
        let mut i = interp();
        let arr_val = call(&mut i, "arrayOf", &[Value::number(1.0), Value::number(2.0)]).unwrap();
        assert_eq!(array::len(arr_val.as_object()), 2);

        call(&mut i, "push", &[arr_val, Value::number(3.0)]).unwrap();
        assert_eq!(array::len(arr_val.as_object()), 3);

        let popped = call(&mut i, "pop", &[arr_val]).unwrap();
        assert_eq!(popped.as_number(), 3.0);

        call(&mut i, "pop", &[arr_val]).unwrap();
        call(&mut i, "pop", &[arr_val]).unwrap();
        assert!(call(&mut i, "pop", &[arr_val]).unwrap().is_nil());
    }

    #[test]
    fn test_array_sum() {
        let mut i = interp();
        let arr = call(
            &mut i,
            "arrayOf",
            &[Value::number(1.0), Value::number(2.0), Value::number(3.5)],
        )
        .unwrap();
        assert_eq!(call(&mut i, "array_sum", &[arr]).unwrap().as_number(), 6.5);
    }

    #[test]
    fn test_map_add_scalar_and_reverse() {
        let mut i = interp();
        let arr = call(&mut i, "arrayOf", &[Value::number(1.0), Value::number(2.0)]).unwrap();
        let plus = call(&mut i, "map_add_scalar", &[arr, Value::number(10.0)]).unwrap();
        assert_eq!(array::get(plus.as_object(), 0).unwrap().as_number(), 11.0);

        call(&mut i, "reverse", &[plus]).unwrap();
        assert_eq!(array::get(plus.as_object(), 0).unwrap().as_number(), 12.0);
    }
}
