//! Process-wide runtime flags, set before `interpret`.

use std::sync::RwLock;

#[derive(Clone, Debug)]
pub struct RuntimeFlags {
    pub disable_call_ic: bool,
    pub ic_diagnostics: bool,
    pub ids_enabled: bool,
    /// Bounds the call-frame count when intrusion detection is enabled.
    pub ids_stack_max: usize,
    /// Bounds young allocations between loop back-edge checks; 0 = off.
    pub ids_alloc_rate_max: u64,
    pub jit_aggressive: bool,
    pub jit_loop_threshold: u32,
    pub jit_function_threshold: u32,
    pub benchmark_mode: bool,
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self {
            disable_call_ic: false,
            ic_diagnostics: false,
            ids_enabled: false,
            ids_stack_max: 64,
            ids_alloc_rate_max: 0,
            jit_aggressive: false,
            jit_loop_threshold: 1000,
            jit_function_threshold: 1000,
            benchmark_mode: false,
        }
    }
}

static FLAGS: RwLock<Option<RuntimeFlags>> = RwLock::new(None);

/// Snapshot of the current flags.
pub fn flags() -> RuntimeFlags {
    FLAGS
        .read()
        .expect("runtime flags poisoned")
        .clone()
        .unwrap_or_default()
}

/// Replace the flags wholesale. Benchmark mode is forwarded to the GC.
pub fn set_flags(new: RuntimeFlags) {
    claw_runtime::gc::set_benchmark_mode(new.benchmark_mode);
    *FLAGS.write().expect("runtime flags poisoned") = Some(new);
}

/// Update the flags in place.
pub fn update(f: impl FnOnce(&mut RuntimeFlags)) {
    let mut guard = FLAGS.write().expect("runtime flags poisoned");
    let mut current = guard.clone().unwrap_or_default();
    f(&mut current);
    claw_runtime::gc::set_benchmark_mode(current.benchmark_mode);
    *guard = Some(current);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let f = RuntimeFlags::default();
        assert!(!f.disable_call_ic);
        assert_eq!(f.jit_function_threshold, 1000);
        assert_eq!(f.ids_stack_max, 64);
    }
}
