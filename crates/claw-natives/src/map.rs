//! Hashmap built-ins.

use claw_runtime::objects::{array, hashmap, NativeError};
use claw_runtime::string_pool::intern;
use claw_runtime::value::Value;
use claw_runtime::Interpreter;

use crate::{define, want_map, want_string};

pub fn register(interp: &Interpreter) {
    define(interp, "mapOf", -1, native_map_of);
    define(interp, "keys", 1, native_keys);
    define(interp, "values", 1, native_values);
    define(interp, "has", 2, native_has);
    define(interp, "remove", 2, native_remove);
}

/// Build a hashmap from alternating key/value arguments. Map literals
/// lower to this.
fn native_map_of(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    if args.len() % 2 != 0 {
        return Err(NativeError::arity(
            "mapOf() requires an even number of arguments.",
        ));
    }
    let m = hashmap::create();
    for pair in args.chunks(2) {
        if !pair[0].is_string() {
            return Err(NativeError::type_mismatch("mapOf() keys must be strings."));
        }
        hashmap::set(m, pair[0].as_str().as_str(), pair[1]);
    }
    Ok(Value::object(m))
}

fn native_keys(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let m = want_map(args, 0, "keys()")?;
    let keys: Vec<Value> = hashmap::keys(m)
        .into_iter()
        .map(|k| Value::string(intern(&k)))
        .collect();
    Ok(Value::object(array::create(keys)))
}

fn native_values(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let m = want_map(args, 0, "values()")?;
    Ok(Value::object(array::create(hashmap::values(m))))
}

fn native_has(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let m = want_map(args, 0, "has()")?;
    let key = want_string(args, 1, "has()")?;
    Ok(Value::boolean(hashmap::contains(m, key)))
}

/// Remove a key; true if it existed.
fn native_remove(_: &mut Interpreter, args: &[Value]) -> Result<Value, NativeError> {
    let m = want_map(args, 0, "remove()")?;
    let key = want_string(args, 1, "remove()")?;
    Ok(Value::boolean(hashmap::remove(m, key)))
}

#[cfg(test)]
mod tests {
    use crate::test_util::{call, interp};
    use claw_runtime::objects::{array, hashmap};
    use claw_runtime::string_pool::intern;
    use claw_runtime::value::Value;

    fn s(text: &str) -> Value {
        Value::string(intern(text))
    }

    #[test]
    fn test_map_of_and_accessors() {
        let mut i = interp();
        let m = call(&mut i, "mapOf", &[s("a"), Value::number(1.0), s("b"), Value::number(2.0)])
            .unwrap();
        assert_eq!(hashmap::len(m.as_object()), 2);

        assert!(call(&mut i, "has", &[m, s("a")]).unwrap().as_bool());
        assert!(!call(&mut i, "has", &[m, s("z")]).unwrap().as_bool());

        let keys = call(&mut i, "keys", &[m]).unwrap();
        assert_eq!(array::len(keys.as_object()), 2);

        assert!(call(&mut i, "remove", &[m, s("a")]).unwrap().as_bool());
        assert!(!call(&mut i, "remove", &[m, s("a")]).unwrap().as_bool());
    }

    #[test]
    fn test_map_of_odd_args() {
        let mut i = interp();
        assert!(call(&mut i, "mapOf", &[s("a")]).is_err());
    }
}
