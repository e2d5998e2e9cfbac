//! GC root publication for the VM.
//!
//! The VM registers itself with the collector for the duration of each
//! `interpret` call; the collector calls back through `scan_vm_roots` with
//! the VM's address. The scan is read-only and runs on the VM thread
//! (collections only happen inside allocation calls made by that thread).

use claw_runtime::value::Value;

use crate::vm::Vm;

/// Root-scan trampoline handed to `claw_runtime::gc::register_roots`.
///
/// # Safety
/// `ctx` must be the address of a live `Vm` that registered it; the VM
/// unregisters before moving or dropping.
pub(crate) unsafe fn scan_vm_roots(ctx: usize, f: &mut dyn FnMut(Value)) {
    let vm = &*(ctx as *const Vm);
    vm.for_each_root(f);
}
