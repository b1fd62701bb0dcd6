//! Collector behavior under allocation pressure: soundness of the
//! mark/copy/fixup cycle against live programs, safe-point triggering in
//! the VM, and handle forwarding across compaction.

mod common;

use common::eval_str;
use loam_runtime::context::{Backend, RuntimeConfig, RuntimeContext};

fn small_heap_ctx(backend: Backend) -> RuntimeContext {
    let config = RuntimeConfig {
        backend,
        gc_threshold: 2 * 1024,
        ..RuntimeConfig::default()
    };
    RuntimeContext::new(config)
}

#[test]
fn test_vm_loop_collects_garbage_at_safe_points() {
    let mut ctx = small_heap_ctx(Backend::Bytecode);
    // Each iteration allocates an atom that immediately becomes garbage;
    // only the last one survives in `acc`.
    let result = eval_str(
        &mut ctx,
        "(loop [i 0 acc (atom 0)]
           (if (< i 3000)
             (recur (inc i) (atom i))
             (deref acc)))",
    )
    .unwrap();
    assert_eq!(result, "2999");
    assert!(
        ctx.heap.stats.cycles > 0,
        "pressure should have triggered collection"
    );
    assert!(
        ctx.heap.live_count() < 3000,
        "dead atoms should have been collected (live: {})",
        ctx.heap.live_count()
    );
}

#[test]
fn test_reachable_values_survive_collection() {
    let mut ctx = small_heap_ctx(Backend::Bytecode);
    eval_str(
        &mut ctx,
        "(def keepers (vec (map (fn [i] (atom i)) (range 100))))",
    )
    .unwrap();
    // Force churn, then verify every rooted atom still dereferences to
    // its original value through its (possibly forwarded) handle.
    eval_str(
        &mut ctx,
        "(loop [i 0] (if (< i 2000) (do (atom i) (recur (inc i))) nil))",
    )
    .unwrap();
    let check = eval_str(
        &mut ctx,
        "(reduce (fn [ok i] (and ok (= i (deref (nth keepers i))))) true (range 100))",
    )
    .unwrap();
    assert_eq!(check, "true");
}

#[test]
fn test_explicit_cycle_preserves_roots_and_compacts() {
    let mut ctx = small_heap_ctx(Backend::Bytecode);
    eval_str(&mut ctx, "(def survivor (atom :keep))").unwrap();
    eval_str(&mut ctx, "(dotimes [_ 500] (atom :garbage))").unwrap();
    let before = ctx.heap.live_count();
    ctx.gc_now(&[]);
    let after = ctx.heap.live_count();
    assert!(after <= before);
    assert_eq!(eval_str(&mut ctx, "@survivor").unwrap(), ":keep");
}

#[test]
fn test_letfn_cycle_is_collectable_once_unrooted() {
    let mut ctx = small_heap_ctx(Backend::Bytecode);
    eval_str(
        &mut ctx,
        "(letfn [(a [n] (if (zero? n) :done (b (dec n))))
                 (b [n] (a n))]
           (a 10))",
    )
    .unwrap();
    // The mutually recursive closures are now unreachable; a cycle must
    // not keep them alive.
    ctx.gc_now(&[]);
    let live_after_first = ctx.heap.live_count();
    ctx.gc_now(&[]);
    assert_eq!(ctx.heap.live_count(), live_after_first);
}

#[test]
fn test_disabled_gc_never_cycles() {
    let config = RuntimeConfig {
        backend: Backend::Bytecode,
        gc_enabled: false,
        gc_threshold: 64,
        ..RuntimeConfig::default()
    };
    let mut ctx = RuntimeContext::new(config);
    eval_str(&mut ctx, "(dotimes [_ 200] (atom 0))").unwrap();
    assert_eq!(ctx.heap.stats.cycles, 0);
}

#[test]
fn test_lazy_realization_state_survives_collection() {
    let mut ctx = small_heap_ctx(Backend::Bytecode);
    eval_str(&mut ctx, "(def s (map inc [1 2 3]))").unwrap();
    eval_str(&mut ctx, "(doall s)").unwrap();
    ctx.gc_now(&[]);
    assert_eq!(eval_str(&mut ctx, "s").unwrap(), "(2 3 4)");
}
