//! Hash map object operations.
//!
//! String-keyed map of values. The table is mutex-protected so that
//! concurrent compound assignments to the same missing key produce a single
//! insert (`ensure_default`). The write barrier runs before the table lock
//! is taken, keeping lock order against the GC one-directional.

use std::sync::Mutex;

use hashbrown::HashMap;

use crate::gc;
use crate::objects::{HeapObj, ObjRef};
use crate::value::Value;

#[derive(Default)]
pub struct ClawHashMap {
    data: Mutex<HashMap<String, Value>>,
}

impl ClawHashMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear contents but keep capacity, for pool reuse.
    pub fn reset(&self) {
        self.data.lock().expect("map poisoned").clear();
    }
}

pub fn create() -> ObjRef {
    gc::alloc_map()
}

fn table(map: ObjRef) -> &'static Mutex<HashMap<String, Value>> {
    match map.get() {
        HeapObj::Map(m) => &m.data,
        _ => panic!("not a map object"),
    }
}

pub fn len(map: ObjRef) -> usize {
    table(map).lock().expect("map poisoned").len()
}

/// Missing keys read as nil.
pub fn get(map: ObjRef, key: &str) -> Value {
    table(map)
        .lock()
        .expect("map poisoned")
        .get(key)
        .copied()
        .unwrap_or(Value::nil())
}

pub fn set(map: ObjRef, key: &str, v: Value) {
    gc::barrier_write(map, v);
    table(map)
        .lock()
        .expect("map poisoned")
        .insert(key.to_string(), v);
}

/// Insert `default` only if `key` is absent. Check and insert happen under
/// one lock acquisition.
pub fn ensure_default(map: ObjRef, key: &str, default: Value) {
    gc::barrier_write(map, default);
    table(map)
        .lock()
        .expect("map poisoned")
        .entry(key.to_string())
        .or_insert(default);
}

pub fn contains(map: ObjRef, key: &str) -> bool {
    table(map).lock().expect("map poisoned").contains_key(key)
}

/// Remove a key; returns whether it existed.
pub fn remove(map: ObjRef, key: &str) -> bool {
    table(map).lock().expect("map poisoned").remove(key).is_some()
}

pub fn keys(map: ObjRef) -> Vec<String> {
    table(map)
        .lock()
        .expect("map poisoned")
        .keys()
        .cloned()
        .collect()
}

pub fn values(map: ObjRef) -> Vec<Value> {
    table(map)
        .lock()
        .expect("map poisoned")
        .values()
        .copied()
        .collect()
}

/// Copy of the entries, for iteration without holding the lock.
pub fn entries(map: ObjRef) -> Vec<(String, Value)> {
    table(map)
        .lock()
        .expect("map poisoned")
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect()
}

pub fn for_each_value(map: ObjRef, mut f: impl FnMut(Value)) {
    for v in table(map).lock().expect("map poisoned").values() {
        f(*v);
    }
}
