//! Lexically-scoped name -> value environments.
//!
//! Keys are interned strings, so lookup hashes and compares pointers. A
//! process-wide monotonic version is bumped on any define/assign hitting
//! the outermost scope; global-name inline caches key their freshness on
//! it. Each scope memoizes recent resolutions (name -> defining scope) and
//! invalidates that cache on any write to the scope.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;

use crate::string_pool::IStr;
use crate::value::Value;

static GLOBAL_VERSION: AtomicU64 = AtomicU64::new(0);

/// Current global-version counter; the cache-key generation for
/// global-name inline caches.
pub fn global_version() -> u64 {
    GLOBAL_VERSION.load(Ordering::Relaxed)
}

fn bump_global_version() {
    GLOBAL_VERSION.fetch_add(1, Ordering::Relaxed);
}

/// Sandbox mode carried as opaque policy state; consulted by native
/// built-ins, parsed by the embedding host.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum SandboxMode {
    #[default]
    Full,
    Network,
    Strict,
}

/// Policy flags carried by every environment. The core never interprets
/// these beyond handing them to natives.
#[derive(Clone, Debug)]
pub struct PolicyFlags {
    pub sandbox: SandboxMode,
    pub allow_file_read: bool,
    pub allow_file_write: bool,
    pub allow_input: bool,
    pub allow_output: bool,
    pub allow_network: bool,
    pub crypto_preferred: String,
}

impl Default for PolicyFlags {
    fn default() -> Self {
        Self {
            sandbox: SandboxMode::Full,
            allow_file_read: true,
            allow_file_write: true,
            allow_input: true,
            allow_output: true,
            allow_network: false,
            crypto_preferred: "AES_GCM".to_string(),
        }
    }
}

pub struct Environment {
    values: RefCell<HashMap<IStr, Value>>,
    enclosing: Option<Rc<Environment>>,
    /// name -> defining scope, invalidated on writes to this scope.
    lookup_cache: RefCell<HashMap<IStr, Weak<Environment>>>,
    policy: RefCell<PolicyFlags>,
}

impl Environment {
    /// A fresh outermost (global) scope.
    pub fn new() -> Rc<Environment> {
        Rc::new(Environment {
            values: RefCell::new(HashMap::new()),
            enclosing: None,
            lookup_cache: RefCell::new(HashMap::new()),
            policy: RefCell::new(PolicyFlags::default()),
        })
    }

    /// A nested scope. Policy flags are inherited from the parent.
    pub fn with_enclosing(parent: &Rc<Environment>) -> Rc<Environment> {
        Rc::new(Environment {
            values: RefCell::new(HashMap::new()),
            enclosing: Some(Rc::clone(parent)),
            lookup_cache: RefCell::new(HashMap::new()),
            policy: RefCell::new(parent.policy.borrow().clone()),
        })
    }

    #[inline]
    pub fn is_global(&self) -> bool {
        self.enclosing.is_none()
    }

    pub fn enclosing(&self) -> Option<&Rc<Environment>> {
        self.enclosing.as_ref()
    }

    /// Insert in the current scope. Assignment never lands here; `define`
    /// may shadow an outer name.
    pub fn define(&self, name: IStr, value: Value) {
        self.values.borrow_mut().insert(name, value);
        self.lookup_cache.borrow_mut().clear();
        if self.is_global() {
            bump_global_version();
        }
    }

    /// Search this scope then the enclosing chain.
    pub fn get(self: &Rc<Environment>, name: IStr) -> Option<Value> {
        if let Some(scope) = self.lookup_cache.borrow().get(&name).and_then(Weak::upgrade) {
            if let Some(v) = scope.values.borrow().get(&name) {
                return Some(*v);
            }
        }

        let mut scope = Rc::clone(self);
        loop {
            if let Some(v) = scope.values.borrow().get(&name) {
                self.lookup_cache
                    .borrow_mut()
                    .insert(name, Rc::downgrade(&scope));
                return Some(*v);
            }
            let next = scope.enclosing.clone()?;
            scope = next;
        }
    }

    /// Walk the chain to the defining scope and assign there. Returns false
    /// if the name was never defined - assignment does not create names.
    pub fn assign(self: &Rc<Environment>, name: IStr, value: Value) -> bool {
        let mut scope = Rc::clone(self);
        loop {
            let found = scope.values.borrow().contains_key(&name);
            if found {
                scope.values.borrow_mut().insert(name, value);
                scope.lookup_cache.borrow_mut().clear();
                if scope.is_global() {
                    bump_global_version();
                }
                return true;
            }
            match scope.enclosing.clone() {
                Some(next) => scope = next,
                None => return false,
            }
        }
    }

    pub fn exists(self: &Rc<Environment>, name: IStr) -> bool {
        let mut scope = Rc::clone(self);
        loop {
            if scope.values.borrow().contains_key(&name) {
                return true;
            }
            match scope.enclosing.clone() {
                Some(next) => scope = next,
                None => return false,
            }
        }
    }

    pub fn exists_in_current_scope(&self, name: IStr) -> bool {
        self.values.borrow().contains_key(&name)
    }

    /// Visit every value in this scope (GC root publication).
    pub fn for_each_value(&self, mut f: impl FnMut(Value)) {
        for v in self.values.borrow().values() {
            f(*v);
        }
    }

    pub fn policy(&self) -> PolicyFlags {
        self.policy.borrow().clone()
    }

    pub fn set_policy(&self, policy: PolicyFlags) {
        *self.policy.borrow_mut() = policy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string_pool::intern;

    #[test]
    fn test_define_get() {
        let env = Environment::new();
        let x = intern("x");
        env.define(x, Value::number(1.0));
        assert_eq!(env.get(x).unwrap().as_number(), 1.0);
        assert!(env.get(intern("missing")).is_none());
    }

    #[test]
    fn test_nested_scope_chain() {
        let global = Environment::new();
        let x = intern("chain_x");
        global.define(x, Value::number(1.0));

        let inner = Environment::with_enclosing(&global);
        assert_eq!(inner.get(x).unwrap().as_number(), 1.0);

        // Shadowing in the inner scope.
        inner.define(x, Value::number(2.0));
        assert_eq!(inner.get(x).unwrap().as_number(), 2.0);
        assert_eq!(global.get(x).unwrap().as_number(), 1.0);
    }

    #[test]
    fn test_assign_walks_to_definition() {
        let global = Environment::new();
        let x = intern("assign_x");
        global.define(x, Value::number(1.0));

        let inner = Environment::with_enclosing(&global);
        assert!(inner.assign(x, Value::number(9.0)));
        assert_eq!(global.get(x).unwrap().as_number(), 9.0);
        // Assignment never creates names.
        assert!(!inner.assign(intern("assign_missing"), Value::nil()));
    }

    #[test]
    fn test_global_version_bumps() {
        let env = Environment::new();
        let v0 = global_version();
        env.define(intern("ver_a"), Value::nil());
        assert!(global_version() > v0);

        let v1 = global_version();
        let inner = Environment::with_enclosing(&env);
        inner.define(intern("ver_local"), Value::nil());
        // Local define does not touch the global version.
        assert_eq!(global_version(), v1);

        assert!(inner.assign(intern("ver_a"), Value::number(2.0)));
        assert!(global_version() > v1);
    }

    #[test]
    fn test_lookup_cache_survives_parent_update() {
        let global = Environment::new();
        let g = intern("cache_g");
        global.define(g, Value::number(1.0));

        let inner = Environment::with_enclosing(&global);
        // Prime the inner scope's cache.
        assert_eq!(inner.get(g).unwrap().as_number(), 1.0);
        // The cache maps name -> scope, so an update in the defining scope
        // is observed immediately.
        assert!(global.assign(g, Value::number(2.0)));
        assert_eq!(inner.get(g).unwrap().as_number(), 2.0);
    }

    #[test]
    fn test_exists() {
        let global = Environment::new();
        let inner = Environment::with_enclosing(&global);
        let n = intern("exists_n");
        global.define(n, Value::nil());
        assert!(inner.exists(n));
        assert!(!inner.exists_in_current_scope(n));
        assert!(global.exists_in_current_scope(n));
    }
}
