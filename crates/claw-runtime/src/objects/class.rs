//! Class objects.

use hashbrown::HashMap;

use crate::gc;
use crate::interp::Interpreter;
use crate::objects::{instance, HeapObj, NativeError, ObjRef};
use crate::string_pool::IStr;
use crate::value::Value;

/// A class: name, optional superclass, method table keyed by interned name.
pub struct ClawClass {
    name: String,
    superclass: Option<ObjRef>,
    methods: HashMap<IStr, Value>,
}

impl ClawClass {
    pub fn new(
        name: impl Into<String>,
        superclass: Option<ObjRef>,
        methods: HashMap<IStr, Value>,
    ) -> Self {
        Self {
            name: name.into(),
            superclass,
            methods,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn superclass(&self) -> Option<ObjRef> {
        self.superclass
    }

    /// Look up a method, walking the superclass chain.
    pub fn find_method(&self, name: IStr) -> Option<Value> {
        if let Some(m) = self.methods.get(&name) {
            return Some(*m);
        }
        let mut parent = self.superclass;
        while let Some(class_ref) = parent {
            let class = as_class(class_ref);
            if let Some(m) = class.methods.get(&name) {
                return Some(*m);
            }
            parent = class.superclass;
        }
        None
    }

    pub fn for_each_method(&self, mut f: impl FnMut(Value)) {
        for v in self.methods.values() {
            f(*v);
        }
    }
}

pub fn create(class: ClawClass) -> ObjRef {
    gc::alloc_class(class)
}

pub fn as_class(obj: ObjRef) -> &'static ClawClass {
    match obj.get() {
        HeapObj::Class(c) => c,
        _ => panic!("not a class object"),
    }
}

/// Calling a class constructs an instance. If the class declares an `init`
/// callable, it is invoked with the fresh instance as the first argument.
pub fn instantiate(
    class_ref: ObjRef,
    interp: &mut Interpreter,
    args: &[Value],
) -> Result<Value, NativeError> {
    let class = as_class(class_ref);
    let inst = instance::create(class_ref);
    let inst_val = Value::object(inst);

    let init_name = crate::string_pool::intern("init");
    if let Some(init) = class.find_method(init_name) {
        if init.is_callable() {
            let callable = match init.as_object().get() {
                HeapObj::Callable(c) => c,
                _ => unreachable!(),
            };
            let mut full_args = Vec::with_capacity(args.len() + 1);
            full_args.push(inst_val);
            full_args.extend_from_slice(args);
            callable.call(interp, &full_args)?;
        }
    } else if !args.is_empty() {
        return Err(NativeError::arity(format!(
            "Expected 0 arguments but got {}.",
            args.len()
        )));
    }

    Ok(inst_val)
}

/// Declared constructor arity: the init method's arity minus the implicit
/// instance argument, or 0 without an init.
pub fn arity(class_ref: ObjRef) -> i32 {
    let class = as_class(class_ref);
    let init_name = crate::string_pool::intern("init");
    match class.find_method(init_name) {
        Some(init) if init.is_callable() => match init.as_object().get() {
            HeapObj::Callable(c) => {
                let a = c.arity();
                if a < 0 {
                    -1
                } else {
                    (a - 1).max(0)
                }
            }
            _ => 0,
        },
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string_pool::intern;

    #[test]
    fn test_find_method_walks_superclass() {
        let _g = crate::test_sync::shared();
        let m = intern("m");
        let mut base_methods = HashMap::new();
        base_methods.insert(m, Value::number(1.0));
        let base = create(ClawClass::new("Base", None, base_methods));

        let derived = create(ClawClass::new("Derived", Some(base), HashMap::new()));
        let found = as_class(derived).find_method(m).unwrap();
        assert_eq!(found.as_number(), 1.0);
        assert!(as_class(derived).find_method(intern("missing")).is_none());
    }
}
