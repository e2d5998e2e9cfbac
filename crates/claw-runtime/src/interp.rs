//! Interpreter context for the native-call bridge.
//!
//! The full tree-walking interpreter is an external collaborator; the VM
//! only needs the context it hands to `Callable::call`: the globals
//! environment (with its policy flags) and a recursion guard for natives
//! that call back into callables.

use std::rc::Rc;

use crate::environment::Environment;
use crate::objects::{class, HeapObj, NativeError};
use crate::string_pool::intern;
use crate::value::Value;

/// Trampoline back into the owning VM, so natives can invoke VM closures
/// handed to them as callbacks. `ctx` is the VM address the VM registered.
///
/// # Safety
/// Must only be called on the VM thread while the VM is inside `interpret`.
pub type VmInvokeFn = unsafe fn(ctx: usize, callee: Value, args: &[Value]) -> Result<Value, NativeError>;

pub struct Interpreter {
    globals: Rc<Environment>,
    recursion_depth: usize,
    vm_invoke: Option<(usize, VmInvokeFn)>,
}

impl Interpreter {
    pub const MAX_RECURSION_DEPTH: usize = 1000;

    pub fn new() -> Self {
        Self {
            globals: Environment::new(),
            recursion_depth: 0,
            vm_invoke: None,
        }
    }

    pub fn with_globals(globals: Rc<Environment>) -> Self {
        Self {
            globals,
            recursion_depth: 0,
            vm_invoke: None,
        }
    }

    /// Install (or clear) the VM trampoline for closure callbacks. The VM
    /// sets this for the duration of each `interpret`.
    pub fn set_vm_invoke(&mut self, hook: Option<(usize, VmInvokeFn)>) {
        self.vm_invoke = hook;
    }

    pub fn globals(&self) -> &Rc<Environment> {
        &self.globals
    }

    /// Define a global by name (used by native registration and tests).
    pub fn define_global(&self, name: &str, value: Value) {
        self.globals.define(intern(name), value);
    }

    /// Invoke a callable or class value with an arity check. This is the
    /// interpreter side of the VM bridge; natives that take function
    /// arguments also route through it.
    pub fn call_value(&mut self, callee: Value, args: &[Value]) -> Result<Value, NativeError> {
        if self.recursion_depth >= Self::MAX_RECURSION_DEPTH {
            return Err(NativeError::new(
                claw_common::ErrorCode::StackOverflow,
                "Stack overflow.",
            ));
        }
        if !callee.is_object() {
            return Err(NativeError::new(
                claw_common::ErrorCode::NotCallable,
                "Can only call functions and classes.",
            ));
        }

        self.recursion_depth += 1;
        let result = match callee.as_object().get() {
            HeapObj::Callable(callable) => {
                let arity = callable.arity();
                if arity != -1 && args.len() as i32 != arity {
                    Err(NativeError::arity(format!(
                        "Expected {} arguments but got {}.",
                        arity,
                        args.len()
                    )))
                } else {
                    callable.call(self, args)
                }
            }
            HeapObj::Class(_) => class::instantiate(callee.as_object(), self, args),
            HeapObj::Closure(_) | HeapObj::Function(_) => match self.vm_invoke {
                // VM code reached through a native callback re-enters the
                // VM through the registered trampoline.
                Some((ctx, invoke)) => unsafe { invoke(ctx, callee, args) },
                None => Err(NativeError::new(
                    claw_common::ErrorCode::NotCallable,
                    "No VM available to run a bytecode function.",
                )),
            },
            _ => Err(NativeError::new(
                claw_common::ErrorCode::NotCallable,
                "Can only call functions and classes.",
            )),
        };
        self.recursion_depth -= 1;
        result
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}
