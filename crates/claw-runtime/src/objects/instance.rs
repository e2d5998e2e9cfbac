//! Instance objects.
//!
//! Field maps key by interned string pointer equality, never by contents.
//! Each instance carries a one-entry cache of the last property lookup.

use hashbrown::HashMap;

use crate::gc;
use crate::objects::{class, HeapObj, ObjRef};
use crate::string_pool::IStr;
use crate::value::Value;

pub struct ClawInstance {
    class: ObjRef,
    fields: HashMap<IStr, Value>,
    last_lookup: Option<(IStr, Value)>,
}

impl ClawInstance {
    pub fn new(class: ObjRef) -> Self {
        Self {
            class,
            fields: HashMap::new(),
            last_lookup: None,
        }
    }

    pub fn class(&self) -> ObjRef {
        self.class
    }
}

pub fn create(class: ObjRef) -> ObjRef {
    gc::alloc_instance(ClawInstance::new(class))
}

fn cell(obj: ObjRef) -> &'static std::cell::RefCell<ClawInstance> {
    match obj.get() {
        HeapObj::Instance(c) => c,
        _ => panic!("not an instance object"),
    }
}

pub fn class_of(obj: ObjRef) -> ObjRef {
    cell(obj).borrow().class
}

pub fn class_name(obj: ObjRef) -> String {
    class::as_class(class_of(obj)).name().to_string()
}

/// Read a property: fields first, then the class method table.
pub fn get(obj: ObjRef, name: IStr) -> Option<Value> {
    {
        let inst = cell(obj).borrow();
        if let Some((cached_name, cached_value)) = inst.last_lookup {
            if cached_name == name {
                return Some(cached_value);
            }
        }
        if let Some(v) = inst.fields.get(&name) {
            let v = *v;
            drop(inst);
            cell(obj).borrow_mut().last_lookup = Some((name, v));
            return Some(v);
        }
    }
    let class_ref = class_of(obj);
    let method = class::as_class(class_ref).find_method(name)?;
    cell(obj).borrow_mut().last_lookup = Some((name, method));
    Some(method)
}

pub fn has(obj: ObjRef, name: IStr) -> bool {
    cell(obj).borrow().fields.contains_key(&name)
}

pub fn set(obj: ObjRef, name: IStr, v: Value) {
    gc::barrier_write(obj, v);
    let mut inst = cell(obj).borrow_mut();
    inst.fields.insert(name, v);
    // A write may shadow a method or change a cached field.
    inst.last_lookup = None;
}

pub fn for_each_field(obj: ObjRef, mut f: impl FnMut(Value)) {
    for v in cell(obj).borrow().fields.values() {
        f(*v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string_pool::intern;

    fn empty_class() -> ObjRef {
        class::create(class::ClawClass::new("C", None, HashMap::new()))
    }

    #[test]
    fn test_set_get_field() {
        let _g = crate::test_sync::shared();
        let inst = create(empty_class());
        let name = intern("x");
        assert!(get(inst, name).is_none());
        set(inst, name, Value::number(3.0));
        assert_eq!(get(inst, name).unwrap().as_number(), 3.0);
        assert!(has(inst, name));
    }

    #[test]
    fn test_lookup_cache_invalidated_on_set() {
        let _g = crate::test_sync::shared();
        let inst = create(empty_class());
        let name = intern("y");
        set(inst, name, Value::number(1.0));
        assert_eq!(get(inst, name).unwrap().as_number(), 1.0);
        set(inst, name, Value::number(2.0));
        assert_eq!(get(inst, name).unwrap().as_number(), 2.0);
    }

    #[test]
    fn test_method_fallback() {
        let _g = crate::test_sync::shared();
        let m = intern("method");
        let mut methods = HashMap::new();
        methods.insert(m, Value::number(9.0));
        let class = class::create(class::ClawClass::new("C", None, methods));
        let inst = create(class);
        assert_eq!(get(inst, m).unwrap().as_number(), 9.0);
        // A field with the same interned name shadows the method.
        set(inst, m, Value::number(1.0));
        assert_eq!(get(inst, m).unwrap().as_number(), 1.0);
    }
}
