//! JIT interface: tier bookkeeping and the baseline entry table.
//!
//! Code generation itself is an external collaborator; the VM only tracks
//! which functions and loops have crossed their hotness thresholds and
//! what compiled entries have been registered. The tables are internally
//! synchronized - two threads may race to register baseline entries.

use std::sync::Mutex;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::flags;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum JitTier {
    Interpreter,
    Baseline,
    Optimized,
}

/// One compiled entry point: the bytecode address it covers and the native
/// code address.
#[derive(Clone, Copy, Debug)]
pub struct JitEntry {
    pub ip: usize,
    pub code: usize,
    pub tier: JitTier,
}

#[derive(Clone, Debug)]
pub struct JitConfig {
    pub aggressive: bool,
    pub loop_threshold: u32,
    pub function_threshold: u32,
}

impl JitConfig {
    pub fn from_flags() -> Self {
        let f = flags::flags();
        Self {
            aggressive: f.jit_aggressive,
            loop_threshold: f.jit_loop_threshold,
            function_threshold: f.jit_function_threshold,
        }
    }
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            aggressive: false,
            loop_threshold: 1000,
            function_threshold: 1000,
        }
    }
}

pub struct JitEngine {
    config: Mutex<JitConfig>,
    baseline: Mutex<FxHashMap<usize, Vec<JitEntry>>>,
    eligible: Mutex<FxHashSet<usize>>,
}

impl Default for JitEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl JitEngine {
    pub fn new() -> Self {
        Self {
            config: Mutex::new(JitConfig::from_flags()),
            baseline: Mutex::new(FxHashMap::default()),
            eligible: Mutex::new(FxHashSet::default()),
        }
    }

    pub fn set_config(&self, config: JitConfig) {
        *self.config.lock().expect("jit config poisoned") = config;
    }

    pub fn config(&self) -> JitConfig {
        self.config.lock().expect("jit config poisoned").clone()
    }

    /// Aggressive mode fires at a quarter of the configured threshold.
    pub fn effective_function_threshold(&self) -> u32 {
        let c = self.config();
        if c.aggressive {
            (c.function_threshold / 4).max(1)
        } else {
            c.function_threshold
        }
    }

    pub fn effective_loop_threshold(&self) -> u32 {
        let c = self.config();
        if c.aggressive {
            (c.loop_threshold / 4).max(1)
        } else {
            c.loop_threshold
        }
    }

    /// A hot function is offered for compilation; the VM keeps interpreting
    /// until a compiled entry shows up. Advisory only.
    pub fn offer_function(&self, key: usize) {
        self.eligible.lock().expect("jit eligible poisoned").insert(key);
    }

    pub fn offer_loop(&self, key: usize) {
        self.eligible.lock().expect("jit eligible poisoned").insert(key);
    }

    pub fn is_eligible(&self, key: usize) -> bool {
        self.eligible.lock().expect("jit eligible poisoned").contains(&key)
    }

    pub fn has_baseline(&self, key: usize) -> bool {
        self.baseline
            .lock()
            .expect("jit baseline poisoned")
            .contains_key(&key)
    }

    pub fn register_baseline(&self, key: usize, entries: Vec<JitEntry>) {
        self.baseline
            .lock()
            .expect("jit baseline poisoned")
            .insert(key, entries);
    }

    /// Look up a compiled entry covering `ip`.
    pub fn baseline_entry(&self, key: usize, ip: usize) -> Option<JitEntry> {
        self.baseline
            .lock()
            .expect("jit baseline poisoned")
            .get(&key)?
            .iter()
            .find(|e| e.ip == ip)
            .copied()
    }

    /// Drop every compiled entry (version-bump invalidation).
    pub fn invalidate_all(&self) {
        self.baseline.lock().expect("jit baseline poisoned").clear();
        self.eligible.lock().expect("jit eligible poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds() {
        let engine = JitEngine::new();
        engine.set_config(JitConfig {
            aggressive: false,
            loop_threshold: 1000,
            function_threshold: 1000,
        });
        assert_eq!(engine.effective_function_threshold(), 1000);
        engine.set_config(JitConfig {
            aggressive: true,
            loop_threshold: 1000,
            function_threshold: 1000,
        });
        assert_eq!(engine.effective_function_threshold(), 250);
        assert_eq!(engine.effective_loop_threshold(), 250);
    }

    #[test]
    fn test_offer_and_eligibility() {
        let engine = JitEngine::new();
        assert!(!engine.is_eligible(42));
        engine.offer_function(42);
        assert!(engine.is_eligible(42));
        engine.invalidate_all();
        assert!(!engine.is_eligible(42));
    }

    #[test]
    fn test_racing_baseline_registration() {
        use std::sync::Arc;

        let engine = Arc::new(JitEngine::new());
        let mut handles = Vec::new();
        for t in 0..2usize {
            let engine = Arc::clone(&engine);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    engine.register_baseline(
                        i,
                        vec![JitEntry {
                            ip: i,
                            code: t,
                            tier: JitTier::Baseline,
                        }],
                    );
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        for i in 0..100 {
            assert!(engine.has_baseline(i));
            assert!(engine.baseline_entry(i, i).is_some());
        }
    }
}
