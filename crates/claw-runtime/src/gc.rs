//! Generational mark-and-sweep collector over the object registry.
//!
//! Every heap object is registered here; the registry is the strong owner
//! (`Box::into_raw` on allocation, `Box::from_raw` on sweep) and `Value`s
//! carry raw addresses. One byte per object packs the mark bit (0x80) with
//! the generation bit (0x01, old).
//!
//! The registry is process-wide. Mutation is single-threaded (the VM
//! thread, between instructions); the lock exists so multiple VM instances
//! on different threads can share the registries safely.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{LazyLock, Mutex, MutexGuard};

use hashbrown::{HashMap, HashSet};

use crate::objects::{
    array, hashmap, instance, upvalue, Callable, ClawArray, ClawClass, ClawHashMap, ClawInstance,
    HeapObj, ObjKind, ObjRef, Upvalue, VMClosure, VMFunction,
};
use crate::value::Value;

const MARK_BIT: u8 = 0x80;
const GEN_OLD: u8 = 0x01;
const GEN_YOUNG: u8 = 0x00;

/// Minor collection runs after this many young allocations.
pub const MINOR_INTERVAL: u64 = 100_000;
/// Full collection runs when the live-object table grows past this.
pub const FULL_THRESHOLD: usize = 1_000_000;
/// Pooled arrays/maps beyond this are dropped instead of recycled.
const MAX_POOL: usize = 4096;

/// A registered VM's root-publication callback.
#[derive(Clone, Copy)]
struct RootHandle {
    ctx: usize,
    scan: unsafe fn(usize, &mut dyn FnMut(Value)),
}

struct GcState {
    /// addr -> mark|generation byte.
    objects: HashMap<usize, u8>,
    /// Old objects known to contain young children.
    remembered: HashSet<usize>,
    array_pool: Vec<usize>,
    map_pool: Vec<usize>,
    roots: Vec<RootHandle>,
}

static GC: LazyLock<Mutex<GcState>> = LazyLock::new(|| {
    Mutex::new(GcState {
        objects: HashMap::new(),
        remembered: HashSet::new(),
        array_pool: Vec::new(),
        map_pool: Vec::new(),
        roots: Vec::new(),
    })
});

static YOUNG_ALLOCS: AtomicU64 = AtomicU64::new(0);
static BENCHMARK_MODE: AtomicBool = AtomicBool::new(false);

thread_local! {
    /// Stack of ephemeral frames: addresses of short-lived arrays/maps
    /// allocated during a native call.
    static EPHEMERAL: RefCell<Vec<Vec<usize>>> = const { RefCell::new(Vec::new()) };
}

fn lock() -> MutexGuard<'static, GcState> {
    GC.lock().expect("gc registry poisoned")
}

// =============================================================================
// Allocation
// =============================================================================

/// Count a young allocation and collect if an interval boundary was crossed.
/// Runs before the new object is registered so a fresh allocation cannot be
/// swept while its value is still in flight.
fn maybe_collect() {
    if BENCHMARK_MODE.load(Ordering::Relaxed) {
        YOUNG_ALLOCS.fetch_add(1, Ordering::Relaxed);
        return;
    }
    let n = YOUNG_ALLOCS.fetch_add(1, Ordering::Relaxed) + 1;
    let mut gc = lock();
    if n % MINOR_INTERVAL == 0 {
        collect_minor_locked(&mut gc);
    }
    if gc.objects.len() > FULL_THRESHOLD {
        collect_full_locked(&mut gc);
    }
}

fn register(obj: HeapObj, generation: u8) -> ObjRef {
    let kind = obj.kind();
    let addr = Box::into_raw(Box::new(obj)) as usize;
    lock().objects.insert(addr, generation);
    if generation == GEN_YOUNG && matches!(kind, ObjKind::Array | ObjKind::Map) {
        ephemeral_note(addr);
    }
    ObjRef::from_addr(addr)
}

pub fn alloc_array(elements: Vec<Value>) -> ObjRef {
    maybe_collect();
    let recycled = lock().array_pool.pop();
    if let Some(addr) = recycled {
        let obj = ObjRef::from_addr(addr);
        if let HeapObj::Array(c) = obj.get() {
            let mut a = c.borrow_mut();
            a.reset();
            a.elements_mut().extend_from_slice(&elements);
        }
        lock().objects.insert(addr, GEN_YOUNG);
        ephemeral_note(addr);
        return obj;
    }
    register(HeapObj::Array(RefCell::new(ClawArray::with_elements(elements))), GEN_YOUNG)
}

pub fn alloc_map() -> ObjRef {
    maybe_collect();
    let recycled = lock().map_pool.pop();
    if let Some(addr) = recycled {
        let obj = ObjRef::from_addr(addr);
        if let HeapObj::Map(m) = obj.get() {
            m.reset();
        }
        lock().objects.insert(addr, GEN_YOUNG);
        ephemeral_note(addr);
        return obj;
    }
    register(HeapObj::Map(ClawHashMap::new()), GEN_YOUNG)
}

pub fn alloc_class(class: ClawClass) -> ObjRef {
    maybe_collect();
    register(HeapObj::Class(class), GEN_YOUNG)
}

pub fn alloc_instance(instance: ClawInstance) -> ObjRef {
    maybe_collect();
    register(HeapObj::Instance(RefCell::new(instance)), GEN_YOUNG)
}

pub fn alloc_callable(callable: Box<dyn Callable>) -> ObjRef {
    maybe_collect();
    register(HeapObj::Callable(callable), GEN_YOUNG)
}

/// Functions outlive most collections; allocate directly into the old
/// generation, without counting toward the minor interval.
pub fn alloc_function(function: VMFunction) -> ObjRef {
    register(HeapObj::Function(function), GEN_OLD)
}

pub fn alloc_closure(closure: VMClosure) -> ObjRef {
    register(HeapObj::Closure(closure), GEN_OLD)
}

pub fn alloc_upvalue(uv: Upvalue) -> ObjRef {
    maybe_collect();
    register(HeapObj::Upvalue(RefCell::new(uv)), GEN_YOUNG)
}

// =============================================================================
// Write barrier
// =============================================================================

/// Record old->young edges in the remembered set. Call before storing
/// `child` into `parent`.
pub fn barrier_write(parent: ObjRef, child: Value) {
    if !child.is_object() {
        return;
    }
    let mut gc = lock();
    let Some(&parent_meta) = gc.objects.get(&parent.addr()) else {
        return;
    };
    let Some(&child_meta) = gc.objects.get(&child.as_object().addr()) else {
        return;
    };
    if parent_meta & GEN_OLD != 0 && child_meta & GEN_OLD == 0 {
        gc.remembered.insert(parent.addr());
    }
}

// =============================================================================
// Root registration
// =============================================================================

/// Register a VM's root-publication callback. `ctx` is an opaque address
/// passed back to `scan`; the caller must unregister before it goes away.
pub unsafe fn register_roots(ctx: usize, scan: unsafe fn(usize, &mut dyn FnMut(Value))) {
    lock().roots.push(RootHandle { ctx, scan });
}

pub fn unregister_roots(ctx: usize) {
    lock().roots.retain(|h| h.ctx != ctx);
}

// =============================================================================
// Collection
// =============================================================================

/// Run a minor (young-generation) collection now.
pub fn collect_minor() {
    collect_minor_locked(&mut lock());
}

/// Run a full collection now.
pub fn collect_full() {
    collect_full_locked(&mut lock());
}

fn collect_minor_locked(gc: &mut GcState) {
    mark_phase(gc);
    sweep(gc, false);
}

fn collect_full_locked(gc: &mut GcState) {
    mark_phase(gc);
    sweep(gc, true);
}

fn mark_phase(gc: &mut GcState) {
    let mut gray: Vec<usize> = Vec::new();

    let handles = gc.roots.clone();
    for handle in handles {
        unsafe {
            (handle.scan)(handle.ctx, &mut |v| mark_value(gc, &mut gray, v));
        }
    }

    // Remembered parents are re-traced so their young children survive even
    // when the parent was only reachable in an earlier cycle.
    let remembered: Vec<usize> = gc.remembered.iter().copied().collect();
    for parent in remembered {
        mark_gray(gc, &mut gray, parent);
    }

    while let Some(addr) = gray.pop() {
        trace_children(gc, &mut gray, addr);
    }
}

fn mark_value(gc: &mut GcState, gray: &mut Vec<usize>, v: Value) {
    if v.is_object() {
        mark_gray(gc, gray, v.as_object().addr());
    }
}

fn mark_gray(gc: &mut GcState, gray: &mut Vec<usize>, addr: usize) {
    if let Some(meta) = gc.objects.get_mut(&addr) {
        if *meta & MARK_BIT == 0 {
            *meta |= MARK_BIT;
            gray.push(addr);
        }
    }
}

fn trace_children(gc: &mut GcState, gray: &mut Vec<usize>, addr: usize) {
    let obj = ObjRef::from_addr(addr);
    match obj.get() {
        HeapObj::Array(_) => {
            array::for_each(obj, |v| mark_value(gc, gray, v));
        }
        HeapObj::Map(_) => {
            hashmap::for_each_value(obj, |v| mark_value(gc, gray, v));
        }
        HeapObj::Instance(_) => {
            mark_gray(gc, gray, instance::class_of(obj).addr());
            instance::for_each_field(obj, |v| mark_value(gc, gray, v));
        }
        HeapObj::Class(c) => {
            if let Some(superclass) = c.superclass() {
                mark_gray(gc, gray, superclass.addr());
            }
            c.for_each_method(|v| mark_value(gc, gray, v));
        }
        HeapObj::Closure(c) => {
            mark_gray(gc, gray, c.function.addr());
            for uv in &c.upvalues {
                mark_gray(gc, gray, uv.addr());
            }
        }
        HeapObj::Function(f) => {
            for v in f.chunk.constants() {
                mark_value(gc, gray, *v);
            }
        }
        HeapObj::Upvalue(_) => {
            if let Some(v) = upvalue::closed_value(obj) {
                mark_value(gc, gray, v);
            }
            // Open targets are live stack slots, covered by the stack roots.
        }
        HeapObj::Callable(_) => {}
    }
}

fn sweep(gc: &mut GcState, full: bool) {
    let mut to_free: Vec<usize> = Vec::new();
    for (&addr, &meta) in gc.objects.iter() {
        let marked = meta & MARK_BIT != 0;
        let old = meta & GEN_OLD != 0;
        if !marked && (full || !old) {
            to_free.push(addr);
        }
    }
    for addr in to_free {
        free_or_pool(gc, addr);
    }
    gc.remembered.clear();
    for meta in gc.objects.values_mut() {
        if *meta & MARK_BIT != 0 {
            // Marked young objects promote to old.
            *meta = GEN_OLD;
        } else {
            *meta &= GEN_OLD;
        }
    }
}

fn free_or_pool(gc: &mut GcState, addr: usize) {
    let obj = ObjRef::from_addr(addr);
    match obj.get().kind() {
        ObjKind::Array if gc.array_pool.len() < MAX_POOL => {
            if let HeapObj::Array(c) = obj.get() {
                c.borrow_mut().reset();
            }
            gc.objects.remove(&addr);
            gc.array_pool.push(addr);
        }
        ObjKind::Map if gc.map_pool.len() < MAX_POOL => {
            if let HeapObj::Map(m) = obj.get() {
                m.reset();
            }
            gc.objects.remove(&addr);
            gc.map_pool.push(addr);
        }
        _ => {
            gc.objects.remove(&addr);
            unsafe {
                drop(Box::from_raw(addr as *mut HeapObj));
            }
        }
    }
}

// =============================================================================
// Ephemeral frames
// =============================================================================

fn ephemeral_note(addr: usize) {
    EPHEMERAL.with(|stack| {
        if let Some(top) = stack.borrow_mut().last_mut() {
            top.push(addr);
        }
    });
}

/// Enter an ephemeral frame: arrays and maps allocated until the matching
/// `ephemeral_leave` return to the pools unless escaped.
pub fn ephemeral_enter() {
    EPHEMERAL.with(|stack| stack.borrow_mut().push(Vec::new()));
}

/// Keep a value past the current ephemeral frame.
pub fn ephemeral_escape(v: Value) {
    if !v.is_object() {
        return;
    }
    let addr = v.as_object().addr();
    EPHEMERAL.with(|stack| {
        if let Some(top) = stack.borrow_mut().last_mut() {
            if let Some(pos) = top.iter().position(|&p| p == addr) {
                top.swap_remove(pos);
            }
        }
    });
}

/// Keep a value and everything reachable from it past the current frame.
pub fn ephemeral_escape_deep(v: Value) {
    if !v.is_object() {
        return;
    }
    ephemeral_escape(v);
    let obj = v.as_object();
    match obj.get() {
        HeapObj::Array(_) => {
            for e in array::snapshot(obj) {
                ephemeral_escape_deep(e);
            }
        }
        HeapObj::Map(_) => {
            for (_, e) in hashmap::entries(obj) {
                ephemeral_escape_deep(e);
            }
        }
        HeapObj::Instance(_) => {
            let mut fields = Vec::new();
            instance::for_each_field(obj, |v| fields.push(v));
            for e in fields {
                ephemeral_escape_deep(e);
            }
        }
        _ => {}
    }
}

/// Leave the current frame: every still-pending young array/map returns to
/// its pool, bypassing the collector.
pub fn ephemeral_leave() {
    let pending = EPHEMERAL.with(|stack| stack.borrow_mut().pop());
    let Some(pending) = pending else {
        return;
    };
    let mut gc = lock();
    for addr in pending {
        let Some(&meta) = gc.objects.get(&addr) else {
            continue;
        };
        if meta & GEN_OLD != 0 {
            continue;
        }
        let obj = ObjRef::from_addr(addr);
        match obj.get().kind() {
            ObjKind::Array | ObjKind::Map => free_or_pool(&mut gc, addr),
            _ => {}
        }
    }
}

// =============================================================================
// Flags and introspection
// =============================================================================

/// Benchmark mode disables interval-triggered collections.
pub fn set_benchmark_mode(enable: bool) {
    BENCHMARK_MODE.store(enable, Ordering::Relaxed);
}

pub fn benchmark_mode() -> bool {
    BENCHMARK_MODE.load(Ordering::Relaxed)
}

pub fn young_allocations() -> u64 {
    YOUNG_ALLOCS.load(Ordering::Relaxed)
}

/// Number of registered (live) objects.
pub fn live_object_count() -> usize {
    lock().objects.len()
}

pub fn pooled_array_count() -> usize {
    lock().array_pool.len()
}

/// Generation of a registered object (0 young, 1 old), if still live.
pub fn generation_of(obj: ObjRef) -> Option<u8> {
    lock().objects.get(&obj.addr()).map(|m| m & GEN_OLD)
}

pub fn is_live(obj: ObjRef) -> bool {
    lock().objects.contains_key(&obj.addr())
}

#[cfg(test)]
mod tests {
    use super::*;

    // The registry is process-wide, so tests that trigger collections take
    // the exclusive guard and everything else in this crate takes the
    // shared one (see crate::test_sync).

    #[test]
    fn test_unrooted_young_objects_are_swept() {
        let _g = crate::test_sync::exclusive();
        let arr = alloc_array(vec![Value::number(1.0)]);
        assert!(is_live(arr));
        collect_minor();
        assert!(!is_live(arr));
    }

    #[test]
    fn test_rooted_object_survives_and_promotes() {
        let _g = crate::test_sync::exclusive();
        static ROOT: Mutex<Option<u64>> = Mutex::new(None);
        unsafe fn scan(_ctx: usize, f: &mut dyn FnMut(Value)) {
            if let Some(bits) = *ROOT.lock().unwrap() {
                f(Value::from_raw(bits));
            }
        }
        const CTX: usize = 0xC0FFEE;

        let arr = alloc_array(vec![]);
        *ROOT.lock().unwrap() = Some(Value::object(arr).raw());
        unsafe { register_roots(CTX, scan) };

        collect_minor();
        assert!(is_live(arr));
        assert_eq!(generation_of(arr), Some(GEN_OLD));

        collect_full();
        assert!(is_live(arr));

        *ROOT.lock().unwrap() = None;
        collect_full();
        assert!(!is_live(arr));
        unregister_roots(CTX);
    }

    #[test]
    fn test_cycles_are_collected() {
        let _g = crate::test_sync::exclusive();
        let a = alloc_array(vec![]);
        let b = alloc_array(vec![Value::object(a)]);
        array::push(a, Value::object(b));
        collect_minor();
        assert!(!is_live(a));
        assert!(!is_live(b));
    }

    #[test]
    fn test_remembered_set_keeps_young_child_of_old_parent() {
        let _g = crate::test_sync::exclusive();
        static ROOT: Mutex<Option<u64>> = Mutex::new(None);
        unsafe fn scan(_ctx: usize, f: &mut dyn FnMut(Value)) {
            if let Some(bits) = *ROOT.lock().unwrap() {
                f(Value::from_raw(bits));
            }
        }
        const CTX: usize = 0xBA44;

        let parent = alloc_array(vec![]);
        *ROOT.lock().unwrap() = Some(Value::object(parent).raw());
        unsafe { register_roots(CTX, scan) };
        collect_minor();
        assert_eq!(generation_of(parent), Some(GEN_OLD));

        // Drop the root: the parent is now only kept by the remembered set
        // entry created by the barriered store below.
        *ROOT.lock().unwrap() = None;
        let child = alloc_array(vec![]);
        array::push(parent, Value::object(child));
        collect_minor();
        assert!(is_live(child), "remembered set must keep the young child");

        unregister_roots(CTX);
        collect_full();
    }

    #[test]
    fn test_ephemeral_frame_reclaims_unescaped() {
        let _g = crate::test_sync::exclusive();
        ephemeral_enter();
        let kept = alloc_array(vec![]);
        let dropped = alloc_array(vec![]);
        ephemeral_escape(Value::object(kept));
        ephemeral_leave();
        assert!(is_live(kept));
        assert!(!is_live(dropped));
    }

    #[test]
    fn test_ephemeral_escape_deep() {
        let _g = crate::test_sync::exclusive();
        ephemeral_enter();
        let inner = alloc_array(vec![]);
        let outer = alloc_array(vec![Value::object(inner)]);
        ephemeral_escape_deep(Value::object(outer));
        ephemeral_leave();
        assert!(is_live(outer));
        assert!(is_live(inner));
    }

    #[test]
    fn test_functions_allocate_old() {
        let _g = crate::test_sync::exclusive();
        let f = alloc_function(VMFunction::new("f", 0, 0, crate::bytecode::Chunk::new()));
        assert_eq!(generation_of(f), Some(GEN_OLD));
        // Old objects survive minor collections without roots.
        collect_minor();
        assert!(is_live(f));
    }
}
