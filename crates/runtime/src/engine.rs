//! Engine façade
//!
//! The evaluation entry points the front ends consume: read, analyze,
//! and run every top-level form of a source string on the configured
//! backend. The scratch arena is reset and the collector polled at each
//! top-level expression boundary; the *1/*2/*3/*e history slots are
//! maintained here.
//!
//! Compare mode runs each expression on both backends with a full
//! snapshot of var roots and reachable heap objects taken before each
//! run, and verifies structural equality of the results - identity
//! objects (atoms, promises, delays) compare by content, because their
//! identities are backend-local.

use std::rc::Rc;
use std::time::Instant;

use tracing::{debug, info};

use loam_core::arena::Scratch;
use loam_core::diagnostics::Diagnostic;
use loam_core::heap::{HeapObj, ObjRef};
use loam_core::node::Node;
use loam_core::value::{value_eq, Value};
use loamc::analyzer::{Analyzer, VarResolver};
use loamc::codegen;
use loamc::reader::Reader;

use crate::call::{pr_str_value, realize_deep};
use crate::context::{Backend, ProfileStage, RuntimeContext};
use crate::env::VarSnapshot;
use crate::error::{EvalError, EvalResult};
use crate::treewalk;
use crate::vm;

/// Evaluate all top-level forms of a source string, returning the last
/// value or the first error. This is the boundary entry point: thrown
/// values that reach it become runtime diagnostics.
pub fn evaluate(ctx: &mut RuntimeContext, source: &str, file: &str) -> Result<Value, Diagnostic> {
    match evaluate_source(ctx, source, file) {
        Ok(v) => Ok(v),
        Err(EvalError::Diag(d)) => Err(d),
        Err(EvalError::Thrown(v)) => {
            let printed = pr_str_value(ctx, &v)
                .unwrap_or_else(|_| "#<unprintable>".to_string());
            Err(Diagnostic::runtime(format!("uncaught exception: {}", printed)))
        }
        Err(EvalError::Recur(_)) => Err(Diagnostic::internal("recur escaped its loop")),
    }
}

/// Internal variant preserving thrown values (the loader and REPL use
/// it so `*e` can carry the real value).
pub fn evaluate_source(ctx: &mut RuntimeContext, source: &str, file: &str) -> EvalResult<Value> {
    let file: Rc<str> = file.into();
    let mut scratch = Scratch::new();
    let mut position = (0usize, 1u32, 0u32);
    let mut last = Value::Nil;

    loop {
        // One top-level form per scratch lifetime: read and analyze
        // inside the arena, then reset it before evaluation output can
        // root anything scratch-allocated. Analysis output is owned, so
        // nothing survives the reset except the Node.
        let read_start = Instant::now();
        let step: Option<(Node, (usize, u32, u32))> = {
            let mut reader = Reader::new_at(
                source,
                scratch.bump(),
                file.clone(),
                ctx.env.current_ns(),
                position,
            );
            match reader.read_form()? {
                None => None,
                Some(form) => {
                    profile(ctx, ProfileStage::Reader, read_start);
                    let analyze_start = Instant::now();
                    let node = {
                        let mut analyzer =
                            Analyzer::new(scratch.bump(), &mut ctx.env, file.clone());
                        analyzer.analyze(&form)?
                    };
                    profile(ctx, ProfileStage::Analyzer, analyze_start);
                    Some((node, reader.stream_position()))
                }
            }
        };
        let Some((node, next_position)) = step else {
            break;
        };
        position = next_position;
        scratch.reset();

        let engine_start = Instant::now();
        let result = run_node(ctx, &node);
        profile(ctx, ProfileStage::Engine, engine_start);

        match result {
            Ok(v) => {
                ctx.push_history(v.clone());
                last = v;
            }
            Err(err) => {
                ctx.record_error(err.catch_value());
                return Err(err);
            }
        }

        // Expression boundary: collect under pressure.
        ctx.maybe_gc(&[]);
    }
    Ok(last)
}

/// Evaluate an already-read form (skips the Reader stage). The form must
/// come from `arena`, since expansion allocates alongside it.
pub fn evaluate_form<'a>(
    ctx: &mut RuntimeContext,
    form: &loam_core::form::Form<'a>,
    arena: &'a bumpalo::Bump,
    file: &str,
) -> EvalResult<Value> {
    let file: Rc<str> = file.into();
    let node = {
        let mut analyzer = Analyzer::new(arena, &mut ctx.env, file);
        analyzer.analyze(form)?
    };
    run_node(ctx, &node)
}

/// Define a var programmatically (host-side registration surface).
pub fn bind_root(ctx: &mut RuntimeContext, ns: &str, symbol: &str, value: Value) -> u32 {
    let id = ctx.env.intern_in(ns, symbol);
    ctx.env.bind_root(id, value);
    id
}

pub fn snapshot_vars(ctx: &RuntimeContext) -> VarSnapshot {
    ctx.env.snapshot()
}

pub fn restore_vars(ctx: &mut RuntimeContext, snap: &VarSnapshot) {
    ctx.env.restore(snap);
}

fn profile(ctx: &RuntimeContext, stage: ProfileStage, start: Instant) {
    if ctx.config.profile.contains(&stage) {
        info!(stage = ?stage, micros = start.elapsed().as_micros() as u64, "stage timing");
    }
}

fn run_node(ctx: &mut RuntimeContext, node: &Node) -> EvalResult<Value> {
    match ctx.config.backend {
        Backend::TreeWalk => treewalk::eval_root(ctx, node),
        Backend::Bytecode => {
            let chunk = codegen::compile_top(node)?;
            vm::run_chunk(ctx, Rc::new(chunk))
        }
        Backend::Compare => compare_run(ctx, node),
    }
}

// ---------------------------------------------------------------------
// Compare mode
// ---------------------------------------------------------------------

struct StateSnapshot {
    vars: VarSnapshot,
    objects: Vec<(ObjRef, HeapObj)>,
    gensym_counter: u64,
}

/// Capture var roots plus every heap object reachable from them, so a
/// backend's side effects (atom writes, defmethod installs, lazy
/// realization) can be undone before the second run.
fn snapshot_state(ctx: &RuntimeContext) -> StateSnapshot {
    let mut objects: Vec<(ObjRef, HeapObj)> = Vec::new();
    let mut seen: Vec<ObjRef> = Vec::new();
    let mut queue: Vec<Value> = Vec::new();
    for var in &ctx.env.vars {
        if var.bound {
            queue.push(var.root.clone());
        }
    }
    for v in &ctx.history {
        queue.push(v.clone());
    }
    while let Some(v) = queue.pop() {
        collect_refs(&v, &mut |r| {
            if !seen.iter().any(|s| s.same(r)) {
                seen.push(r.clone());
                let obj = ctx.heap.get(r).clone();
                let mut pending = Vec::new();
                obj.for_each_value(&mut |child| pending.push(child.clone()));
                objects.push((r.clone(), obj));
                queue.extend(pending);
            }
        });
    }
    StateSnapshot {
        vars: ctx.env.snapshot(),
        objects,
        gensym_counter: ctx.gensym_counter,
    }
}

fn restore_state(ctx: &mut RuntimeContext, snap: &StateSnapshot) {
    ctx.env.restore(&snap.vars);
    for (r, obj) in &snap.objects {
        *ctx.heap.get_mut(r) = obj.clone();
    }
    ctx.gensym_counter = snap.gensym_counter;
}

/// Shallow walk of a value for heap references (children are followed by
/// the snapshot queue).
fn collect_refs(v: &Value, visit: &mut impl FnMut(&ObjRef)) {
    match v {
        Value::Obj(r) => visit(r),
        Value::List(l) => l.items.iter().for_each(|i| collect_refs(i, visit)),
        Value::Vector(l) => l.items.iter().for_each(|i| collect_refs(i, visit)),
        Value::Set(s) => s.items.iter().for_each(|i| collect_refs(i, visit)),
        Value::Map(m) => {
            for (k, val) in m.entries() {
                collect_refs(k, visit);
                collect_refs(val, visit);
            }
        }
        Value::Fn(f) => {
            if let loam_core::value::FnKind::User { env: Some(env), .. } = &f.kind {
                visit(env);
            }
            if let loam_core::value::FnKind::Protocol { proto, .. } = &f.kind {
                visit(proto);
            }
        }
        Value::ExInfo(e) => collect_refs(&e.data, visit),
        Value::Reduced(inner) => collect_refs(inner, visit),
        _ => {}
    }
}

/// Run both backends on the same node and verify the results agree.
/// Collection is suppressed across the two runs: the snapshot holds
/// handles whose objects must survive until restore.
fn compare_run(ctx: &mut RuntimeContext, node: &Node) -> EvalResult<Value> {
    let snap = snapshot_state(ctx);

    ctx.native_depth += 1;
    let tree_result = treewalk::eval_root(ctx, node);
    let tree_value = match &tree_result {
        Ok(v) => Some(realize_deep(ctx, v)),
        Err(_) => None,
    };
    restore_state(ctx, &snap);

    let vm_result = codegen::compile_top(node)
        .map_err(EvalError::from)
        .and_then(|chunk| vm::run_chunk(ctx, Rc::new(chunk)));
    ctx.native_depth -= 1;

    match (tree_result, vm_result) {
        (Ok(_), Ok(vm_v)) => {
            let tree_realized = tree_value.expect("realized alongside Ok")?;
            let vm_realized = realize_deep(ctx, &vm_v)?;
            if compare_values(ctx, &tree_realized, &vm_realized) {
                debug!("compare mode: backends agree");
                Ok(vm_v)
            } else {
                Err(EvalError::runtime(format!(
                    "backend mismatch: tree-walk produced {} but the vm produced {}",
                    pr_str_value(ctx, &tree_realized)?,
                    pr_str_value(ctx, &vm_realized)?,
                )))
            }
        }
        (Err(te), Err(ve)) => {
            if errors_agree(ctx, &te, &ve) {
                Err(ve)
            } else {
                Err(EvalError::runtime(
                    "backend mismatch: backends raised different errors",
                ))
            }
        }
        (Ok(_), Err(ve)) => Err(EvalError::runtime(format!(
            "backend mismatch: tree-walk succeeded but the vm raised {}",
            describe_error(&ve)
        ))),
        (Err(te), Ok(_)) => Err(EvalError::runtime(format!(
            "backend mismatch: the vm succeeded but tree-walk raised {}",
            describe_error(&te)
        ))),
    }
}

fn describe_error(e: &EvalError) -> String {
    match e {
        EvalError::Thrown(_) => "a thrown value".to_string(),
        EvalError::Diag(d) => d.to_string(),
        EvalError::Recur(_) => "a stray recur".to_string(),
    }
}

fn errors_agree(ctx: &mut RuntimeContext, a: &EvalError, b: &EvalError) -> bool {
    match (a, b) {
        (EvalError::Thrown(x), EvalError::Thrown(y)) => compare_values(ctx, x, y),
        (EvalError::Diag(x), EvalError::Diag(y)) => x.kind == y.kind && x.message == y.message,
        _ => false,
    }
}

/// Compare-mode equality: structural, with identity-bearing heap objects
/// compared by their contents. This is deliberately a different relation
/// from language `=` (which treats atoms by identity) and never leaks
/// into it. Both sides are expected to be pre-realized.
pub fn compare_values(ctx: &RuntimeContext, a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Obj(x), Value::Obj(y)) => {
            compare_objects(ctx, ctx.heap.get(x), ctx.heap.get(y))
        }
        (Value::Fn(_), Value::Fn(_)) => true,
        (Value::List(_) | Value::Vector(_), Value::List(_) | Value::Vector(_)) => {
            let xs = seq_items(a);
            let ys = seq_items(b);
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|(x, y)| compare_values(ctx, x, y))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.entries().all(|(k, v)| {
                    y.get(k).is_some_and(|ov| compare_values(ctx, v, ov))
                })
        }
        (Value::ExInfo(x), Value::ExInfo(y)) => {
            x.message == y.message && compare_values(ctx, &x.data, &y.data)
        }
        _ => value_eq(a, b),
    }
}

fn seq_items<'v>(v: &'v Value) -> &'v [Value] {
    match v {
        Value::List(l) => &l.items,
        Value::Vector(l) => &l.items,
        _ => &[],
    }
}

fn compare_objects(ctx: &RuntimeContext, a: &HeapObj, b: &HeapObj) -> bool {
    match (a, b) {
        (HeapObj::Atom(x), HeapObj::Atom(y)) => compare_values(ctx, &x.value, &y.value),
        (HeapObj::Volatile(x), HeapObj::Volatile(y)) => compare_values(ctx, x, y),
        (HeapObj::Delay(x), HeapObj::Delay(y)) => match (&x.value, &y.value) {
            (Some(xv), Some(yv)) => compare_values(ctx, xv, yv),
            (None, None) => true,
            _ => false,
        },
        (HeapObj::Promise(x), HeapObj::Promise(y)) => match (x, y) {
            (Some(xv), Some(yv)) => compare_values(ctx, xv, yv),
            (None, None) => true,
            _ => false,
        },
        (HeapObj::MultiFn(x), HeapObj::MultiFn(y)) => {
            x.name == y.name && x.methods.len() == y.methods.len()
        }
        (HeapObj::Protocol(x), HeapObj::Protocol(y)) => x.name == y.name,
        (HeapObj::Lazy(_), HeapObj::Lazy(_)) => {
            // Pre-realized by the caller; an unrealized leftover means
            // the chains were infinite on both sides.
            true
        }
        _ => false,
    }
}
