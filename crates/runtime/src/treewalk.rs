//! Tree-walking evaluator
//!
//! The correctness backend: a direct recursive interpreter over Node
//! trees. Locals live on the context's flat binding stack addressed as
//! frame-base + slot; `recur` travels as a signal through the error
//! channel and is consumed by the nearest loop head or function entry,
//! which rebinds the target slots in place, so iteration runs in constant
//! stack. Bindings pushed by let/loop/letfn are popped on every exit
//! path, normal or unwinding.

use std::rc::Rc;

use loam_core::heap::HeapObj;
use loam_core::node::{BinOp, CollKind, Node, NodeKind};
use loam_core::value::{FnArity, FnBody, FnKind, Function, Value};
use loam_core::collections::{PMap, PSet};

use crate::builtins::arithmetic;
use crate::builtins::collections as coll_ops;
use crate::call::{self, call_value, eq_values};
use crate::context::{with_native, RuntimeContext};
use crate::error::{EvalError, EvalResult};

/// Evaluate one top-level node. Public entry point; raises the native
/// depth so heap safe points inside nested VM runs stay quiet while
/// interpreter frames hold unrooted temporaries.
pub fn eval_root(ctx: &mut RuntimeContext, node: &Node) -> EvalResult<Value> {
    with_native(ctx, |ctx| eval(ctx, node))
}

/// Apply a tree-bodied user function. `args` are already collapsed for
/// variadic arities.
pub fn call_user(ctx: &mut RuntimeContext, f: &Rc<Function>, args: Vec<Value>) -> EvalResult<Value> {
    with_native(ctx, |ctx| {
        let Some(arity) = f.find_arity(args.len()) else {
            return Err(crate::error::arity_error(
                f.name.as_deref().unwrap_or("fn"),
                args.len(),
            ));
        };
        let FnBody::Tree(body) = arity.body.clone() else {
            return Err(EvalError::runtime("expected a tree-compiled function"));
        };
        let param_count = arity.params.len();

        let saved_base = ctx.frame_base;
        let base = ctx.stack.len();
        ctx.stack.extend(args);
        if let FnKind::User { env: Some(env), .. } = &f.kind {
            let HeapObj::Closure(captures) = ctx.heap.get(env) else {
                return Err(EvalError::runtime("corrupt closure environment"));
            };
            let captures = captures.clone();
            ctx.stack.extend(captures);
        }
        if f.name.is_some() {
            ctx.stack.push(Value::Fn(f.clone()));
        }
        ctx.frame_base = base;

        let result = loop {
            match eval(ctx, &body) {
                Err(EvalError::Recur(new_args)) => {
                    // Rebind the parameter slots and restart the body.
                    ctx.stack.truncate(base + param_count);
                    for (i, v) in new_args.into_iter().enumerate() {
                        ctx.stack[base + i] = v;
                    }
                    // Reinstate captures and self below the body.
                    if let FnKind::User { env: Some(env), .. } = &f.kind {
                        if let HeapObj::Closure(captures) = ctx.heap.get(env) {
                            let captures = captures.clone();
                            ctx.stack.extend(captures);
                        }
                    }
                    if f.name.is_some() {
                        ctx.stack.push(Value::Fn(f.clone()));
                    }
                }
                done => break done,
            }
        };
        ctx.stack.truncate(base);
        ctx.frame_base = saved_base;
        result
    })
}

fn eval(ctx: &mut RuntimeContext, node: &Node) -> EvalResult<Value> {
    match &node.kind {
        NodeKind::Const(v) | NodeKind::Quote(v) => Ok(v.clone()),
        NodeKind::VarRef(id) => Ok(ctx.deref_var(*id)?),
        NodeKind::LocalRef { slot, name } => {
            let at = ctx.frame_base + *slot as usize;
            match ctx.stack.get(at) {
                Some(v) => Ok(v.clone()),
                None => Err(EvalError::Diag(loam_core::diagnostics::Diagnostic::internal(
                    format!("local '{}' (slot {}) out of frame", name, slot),
                ))),
            }
        }
        NodeKind::If { test, then, els } => {
            let t = eval(ctx, test)?;
            if t.is_truthy() {
                eval(ctx, then)
            } else {
                match els {
                    Some(e) => eval(ctx, e),
                    None => Ok(Value::Nil),
                }
            }
        }
        NodeKind::Do(body) => {
            let Some((last, init)) = body.split_last() else {
                return Ok(Value::Nil);
            };
            for n in init {
                eval(ctx, n)?;
            }
            eval(ctx, last)
        }
        NodeKind::Let { bindings, body } => {
            let saved = ctx.stack.len();
            let result = (|| {
                for (_, init) in bindings {
                    let v = eval(ctx, init)?;
                    ctx.stack.push(v);
                }
                eval(ctx, body)
            })();
            ctx.stack.truncate(saved);
            result
        }
        NodeKind::Loop { bindings, body } => {
            let saved = ctx.stack.len();
            let result = (|| {
                for (_, init) in bindings {
                    let v = eval(ctx, init)?;
                    ctx.stack.push(v);
                }
                let base = saved;
                loop {
                    match eval(ctx, body) {
                        Err(EvalError::Recur(vals)) => {
                            // Args were fully evaluated into the signal's
                            // buffer before any slot is overwritten.
                            ctx.stack.truncate(base + bindings.len());
                            for (i, v) in vals.into_iter().enumerate() {
                                ctx.stack[base + i] = v;
                            }
                        }
                        done => return done,
                    }
                }
            })();
            ctx.stack.truncate(saved);
            result
        }
        NodeKind::Recur(args) => {
            let mut vals = Vec::with_capacity(args.len());
            for a in args {
                vals.push(eval(ctx, a)?);
            }
            Err(EvalError::Recur(vals))
        }
        NodeKind::Letfn { bindings, body } => eval_letfn(ctx, bindings, body),
        NodeKind::Fn {
            name,
            arities,
            captures,
        } => Ok(make_function(ctx, name, arities, captures)),
        NodeKind::Call { callee, args, .. } => {
            let callee_v = eval(ctx, callee)?;
            let mut arg_vals = Vec::with_capacity(args.len());
            for a in args {
                arg_vals.push(eval(ctx, a)?);
            }
            call_value(ctx, &callee_v, arg_vals)
        }
        NodeKind::BinOp { op, lhs, rhs } => {
            let a = eval(ctx, lhs)?;
            let b = eval(ctx, rhs)?;
            match op {
                BinOp::Add => arithmetic::num_add(&a, &b),
                BinOp::Sub => arithmetic::num_sub(&a, &b),
                BinOp::Mul => arithmetic::num_mul(&a, &b),
                BinOp::Div => arithmetic::num_div(&a, &b),
                BinOp::Lt => arithmetic::num_cmp(&a, &b, BinOp::Lt),
                BinOp::Gt => arithmetic::num_cmp(&a, &b, BinOp::Gt),
                BinOp::Le => arithmetic::num_cmp(&a, &b, BinOp::Le),
                BinOp::Ge => arithmetic::num_cmp(&a, &b, BinOp::Ge),
                BinOp::Eq => Ok(Value::Bool(eq_values(ctx, &a, &b)?)),
                BinOp::Nth => coll_ops::nth_impl(ctx, &a, &b, None),
            }
        }
        NodeKind::Not(operand) => {
            let v = eval(ctx, operand)?;
            Ok(Value::Bool(!v.is_truthy()))
        }
        NodeKind::CollLiteral { kind, items } => {
            let mut vals = Vec::with_capacity(items.len());
            for item in items {
                vals.push(eval(ctx, item)?);
            }
            Ok(build_collection(*kind, vals))
        }
        NodeKind::Def { var, init, .. } => {
            match init {
                Some(init) => {
                    let v = eval(ctx, init)?;
                    call::bind_var_root(ctx, *var, v)?;
                }
                None => {
                    // Declaration only; the var stays unbound.
                }
            }
            Ok(Value::Var(*var))
        }
        NodeKind::Throw(e) => {
            let v = eval(ctx, e)?;
            Err(EvalError::Thrown(v))
        }
        NodeKind::Try {
            body,
            catch,
            finally,
        } => eval_try(ctx, body, catch, finally),
        NodeKind::DefMulti {
            var,
            name,
            dispatch,
        } => {
            let dispatch = eval(ctx, dispatch)?;
            let mref = ctx.heap.alloc(HeapObj::MultiFn(loam_core::heap::MultiFnData {
                name: name.clone(),
                dispatch,
                methods: Vec::new(),
                prefers: Vec::new(),
            }));
            call::bind_var_root(ctx, *var, Value::Obj(mref))?;
            Ok(Value::Var(*var))
        }
        NodeKind::DefMethod {
            var,
            dispatch_val,
            method,
        } => {
            let dv = eval(ctx, dispatch_val)?;
            let method = eval(ctx, method)?;
            call::add_multi_method(ctx, *var, dv, method)?;
            Ok(Value::Var(*var))
        }
    }
}

pub fn build_collection(kind: CollKind, vals: Vec<Value>) -> Value {
    match kind {
        CollKind::Vector => Value::vector(vals),
        CollKind::Map => Value::Map(Rc::new(PMap::from_interleaved(vals))),
        CollKind::Set => Value::Set(Rc::new(PSet::new(vals))),
    }
}

/// Build a function value, copying the captured slots out of the current
/// frame into a heap environment cell.
fn make_function(
    ctx: &mut RuntimeContext,
    name: &Option<Rc<str>>,
    arities: &[loam_core::node::FnArityNode],
    captures: &[u16],
) -> Value {
    let converted: Vec<FnArity> = arities
        .iter()
        .map(|a| FnArity {
            params: a.params.clone().into(),
            variadic: a.variadic,
            body: FnBody::Tree(a.body.clone()),
        })
        .collect();
    let env = if captures.is_empty() {
        None
    } else {
        let values: Vec<Value> = captures
            .iter()
            .map(|slot| ctx.stack[ctx.frame_base + *slot as usize].clone())
            .collect();
        Some(ctx.heap.alloc(HeapObj::Closure(values)))
    };
    Value::Fn(Rc::new(Function {
        name: name.clone(),
        kind: FnKind::User {
            arities: converted.into(),
            env,
        },
        meta: None,
    }))
}

/// Nil placeholders first, then every fn is built, then each closure
/// environment slot that pointed at a placeholder is rewritten to the
/// finished function. The rewrite is a single-slot mutation per capture
/// because environments are index-addressed heap cells.
fn eval_letfn(
    ctx: &mut RuntimeContext,
    bindings: &[(Rc<str>, Node)],
    body: &Node,
) -> EvalResult<Value> {
    let saved = ctx.stack.len();
    let result = (|| {
        let base = ctx.stack.len();
        for _ in bindings {
            ctx.stack.push(Value::Nil);
        }
        for (i, (_, fn_node)) in bindings.iter().enumerate() {
            let v = eval(ctx, fn_node)?;
            ctx.stack[base + i] = v;
        }
        // Fixup: recopy every capture from the now-final frame.
        fixup_letfn(ctx, base, bindings);
        eval(ctx, body)
    })();
    ctx.stack.truncate(saved);
    result
}

fn fixup_letfn(ctx: &mut RuntimeContext, base: usize, bindings: &[(Rc<str>, Node)]) {
    for (i, (_, fn_node)) in bindings.iter().enumerate() {
        let NodeKind::Fn { captures, .. } = &fn_node.kind else {
            continue;
        };
        let Value::Fn(f) = ctx.stack[base + i].clone() else {
            continue;
        };
        let FnKind::User { env: Some(env), .. } = &f.kind else {
            continue;
        };
        let values: Vec<Value> = captures
            .iter()
            .map(|slot| ctx.stack[ctx.frame_base + *slot as usize].clone())
            .collect();
        if let HeapObj::Closure(stored) = ctx.heap.get_mut(env) {
            *stored = values;
        }
    }
}

fn eval_try(
    ctx: &mut RuntimeContext,
    body: &Node,
    catch: &Option<(Rc<str>, Box<Node>)>,
    finally: &Option<Box<Node>>,
) -> EvalResult<Value> {
    let outcome = eval(ctx, body);
    let outcome = match outcome {
        Err(err) if err.catchable() && catch.is_some() => {
            let (_, catch_body) = catch.as_ref().unwrap();
            let saved = ctx.stack.len();
            ctx.stack.push(err.catch_value());
            let caught = eval(ctx, catch_body);
            ctx.stack.truncate(saved);
            caught
        }
        other => other,
    };
    if let Some(fin) = finally {
        // Finally runs on every path; its own failure wins over the
        // primary result.
        eval(ctx, fin)?;
    }
    outcome
}
