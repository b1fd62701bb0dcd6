//! Value application and equality
//!
//! `call_value` is the single dispatch point both backends and every
//! builtin use to apply a value to arguments: functions (builtin, user,
//! protocol method), keywords and maps as lookups, sets as membership
//! tests, vars as indirection, and multimethods. User-function bodies run
//! on whichever backend compiled them - tree bodies through the walker,
//! prototypes through the VM - so mixed stacks compose.

use std::rc::Rc;

use loam_core::heap::{HeapObj, MultiFnData};
use loam_core::printer;
use loam_core::value::{value_eq, FnArity, FnKind, Function, Value};

use crate::context::{with_native, RuntimeContext};
use crate::error::{arity_error, EvalError, EvalResult};
use crate::lazy;
use crate::registry;
use crate::treewalk;
use crate::vm;

pub fn call_value(ctx: &mut RuntimeContext, callee: &Value, args: Vec<Value>) -> EvalResult<Value> {
    match callee {
        Value::Fn(f) => call_function(ctx, f, args),
        Value::Keyword(_) => match args.len() {
            1 => lookup(ctx, &args[0], callee, &Value::Nil),
            2 => lookup(ctx, &args[0], callee, &args[1]),
            n => Err(arity_error("keyword", n)),
        },
        Value::Map(m) => match args.len() {
            1 => Ok(m.get(&args[0]).cloned().unwrap_or(Value::Nil)),
            2 => Ok(m.get(&args[0]).cloned().unwrap_or_else(|| args[1].clone())),
            n => Err(arity_error("map", n)),
        },
        Value::Set(s) => match args.len() {
            1 => Ok(if s.contains(&args[0]) {
                args[0].clone()
            } else {
                Value::Nil
            }),
            n => Err(arity_error("set", n)),
        },
        Value::Var(id) => {
            let root = ctx.deref_var(*id)?;
            call_value(ctx, &root, args)
        }
        Value::Obj(r) => {
            if matches!(ctx.heap.get(r), HeapObj::MultiFn(_)) {
                call_multi(ctx, r.clone(), args)
            } else {
                Err(EvalError::runtime(format!(
                    "{} is not callable",
                    ctx.heap.type_name(r)
                )))
            }
        }
        other => Err(EvalError::runtime(format!(
            "{} is not callable",
            other.type_name()
        ))),
    }
}

fn lookup(
    ctx: &mut RuntimeContext,
    coll: &Value,
    key: &Value,
    default: &Value,
) -> EvalResult<Value> {
    let _ = ctx;
    Ok(match coll {
        Value::Map(m) => m.get(key).cloned().unwrap_or_else(|| default.clone()),
        Value::Set(s) => {
            if s.contains(key) {
                key.clone()
            } else {
                default.clone()
            }
        }
        _ => default.clone(),
    })
}

pub fn call_function(
    ctx: &mut RuntimeContext,
    f: &Rc<Function>,
    args: Vec<Value>,
) -> EvalResult<Value> {
    match &f.kind {
        FnKind::Builtin { idx, arity } => {
            if !arity.accepts(args.len()) {
                return Err(arity_error(f.name.as_deref().unwrap_or("builtin"), args.len()));
            }
            let def = &registry::BUILTINS[*idx as usize];
            with_native(ctx, |ctx| (def.f)(ctx, &args))
        }
        FnKind::Protocol { proto, method } => {
            let Some(receiver) = args.first() else {
                return Err(arity_error(method, 0));
            };
            let type_name: Rc<str> = match receiver {
                Value::Obj(r) => ctx.heap.type_name(r).into(),
                other => other.type_name().into(),
            };
            let HeapObj::Protocol(p) = ctx.heap.get(proto) else {
                return Err(EvalError::runtime("corrupt protocol reference"));
            };
            let Some(implementation) = p
                .impls
                .get(&type_name)
                .and_then(|methods| methods.get(method))
                .cloned()
            else {
                return Err(EvalError::runtime(format!(
                    "no implementation of method {} of protocol {} for type {}",
                    method, p.name, type_name
                )));
            };
            call_value(ctx, &implementation, args)
        }
        FnKind::User { .. } => {
            let Some(arity) = f.find_arity(args.len()) else {
                return Err(arity_error(
                    f.name.as_deref().unwrap_or("fn"),
                    args.len(),
                ));
            };
            let args = collapse_variadic(arity, args);
            match &arity.body {
                loam_core::value::FnBody::Tree(_) => treewalk::call_user(ctx, f, args),
                loam_core::value::FnBody::Proto { .. } => vm::call_proto(ctx, f, args),
            }
        }
    }
}

/// Fold excess arguments of a variadic call into the rest parameter:
/// a list, or nil when empty.
pub fn collapse_variadic(arity: &FnArity, mut args: Vec<Value>) -> Vec<Value> {
    if !arity.variadic {
        return args;
    }
    let fixed = arity.fixed_count();
    let rest: Vec<Value> = args.split_off(fixed);
    args.push(if rest.is_empty() {
        Value::Nil
    } else {
        Value::list(rest)
    });
    args
}

/// Multimethod dispatch: compute the dispatch value, match methods by
/// value equality in insertion order, fall back to :default, and break
/// multi-matches with the preference graph.
fn call_multi(ctx: &mut RuntimeContext, mref: loam_core::heap::ObjRef, args: Vec<Value>) -> EvalResult<Value> {
    let (dispatch, name) = match ctx.heap.get(&mref) {
        HeapObj::MultiFn(m) => (m.dispatch.clone(), m.name.clone()),
        _ => return Err(EvalError::runtime("corrupt multimethod reference")),
    };
    let dv = call_value(ctx, &dispatch, args.clone())?;

    let method = {
        let HeapObj::MultiFn(m) = ctx.heap.get(&mref) else {
            return Err(EvalError::runtime("corrupt multimethod reference"));
        };
        select_method(m, &dv)
    };
    match method {
        Some(f) => call_value(ctx, &f, args),
        None => Err(EvalError::runtime(format!(
            "no method in multimethod '{}' for dispatch value: {}",
            name,
            printer::pr_str(&dv, &ctx.heap)
        ))),
    }
}

fn select_method(m: &MultiFnData, dv: &Value) -> Option<Value> {
    let matches: Vec<&(Value, Value)> = m
        .methods
        .iter()
        .filter(|(k, _)| value_eq(k, dv))
        .collect();
    match matches.len() {
        0 => {
            let default_key = Value::keyword("default");
            m.methods
                .iter()
                .find(|(k, _)| value_eq(k, &default_key))
                .map(|(_, f)| f.clone())
        }
        1 => Some(matches[0].1.clone()),
        _ => {
            // A key preferred over every other matching key wins;
            // otherwise first registration order stands.
            let winner = matches.iter().find(|(k, _)| {
                matches
                    .iter()
                    .filter(|(other, _)| !value_eq(k, other))
                    .all(|(other, _)| prefers(m, k, other))
            });
            Some(winner.unwrap_or(&matches[0]).1.clone())
        }
    }
}

/// Transitive preference: a beats b directly or through a chain.
fn prefers(m: &MultiFnData, a: &Value, b: &Value) -> bool {
    m.prefers.iter().any(|(winner, loser)| {
        value_eq(winner, a) && (value_eq(loser, b) || prefers(m, loser, b))
    })
}

/// Language `=`: structural, forcing lazy sequences as needed.
pub fn eq_values(ctx: &mut RuntimeContext, a: &Value, b: &Value) -> EvalResult<bool> {
    if is_seqish(ctx, a) && is_seqish(ctx, b) {
        let xs = lazy::seq_to_vec(ctx, a)?;
        let ys = lazy::seq_to_vec(ctx, b)?;
        if xs.len() != ys.len() {
            return Ok(false);
        }
        for (x, y) in xs.iter().zip(ys.iter()) {
            if !eq_values(ctx, x, y)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }
    Ok(value_eq(a, b))
}

fn is_seqish(ctx: &RuntimeContext, v: &Value) -> bool {
    match v {
        Value::List(_) | Value::Vector(_) => true,
        Value::Obj(r) => matches!(ctx.heap.get(r), HeapObj::Lazy(_)),
        _ => false,
    }
}

/// Replace every lazy sequence in a value with its fully realized list,
/// recursively. Used by printing and compare mode; language `=` goes
/// through `eq_values` instead. Runs under a raised native depth: the
/// intermediate vectors it holds are not enumerable GC roots.
pub fn realize_deep(ctx: &mut RuntimeContext, v: &Value) -> EvalResult<Value> {
    with_native(ctx, |ctx| realize_inner(ctx, v))
}

fn realize_inner(ctx: &mut RuntimeContext, v: &Value) -> EvalResult<Value> {
    Ok(match v {
        Value::Obj(r) if matches!(ctx.heap.get(r), HeapObj::Lazy(_)) => {
            let items = lazy::seq_to_vec(ctx, v)?;
            let realized = items
                .iter()
                .map(|item| realize_inner(ctx, item))
                .collect::<EvalResult<Vec<_>>>()?;
            Value::list(realized)
        }
        Value::List(l) => Value::list(
            l.items
                .iter()
                .map(|item| realize_inner(ctx, item))
                .collect::<EvalResult<Vec<_>>>()?,
        ),
        Value::Vector(l) => Value::vector(
            l.items
                .iter()
                .map(|item| realize_inner(ctx, item))
                .collect::<EvalResult<Vec<_>>>()?,
        ),
        other => other.clone(),
    })
}

/// Bind a var's root, running its validator first and its watchers
/// after, per the shared resource policy for var mutation.
pub fn bind_var_root(ctx: &mut RuntimeContext, id: u32, value: Value) -> EvalResult<Value> {
    if let Some(validator) = ctx.env.var(id).validator.clone() {
        let verdict = call_value(ctx, &validator, vec![value.clone()])?;
        if !verdict.is_truthy() {
            return Err(EvalError::runtime("invalid reference state"));
        }
    }
    let old = ctx.env.var(id).root.clone();
    ctx.env.bind_root(id, value.clone());
    let watches = ctx.env.var(id).watches.clone();
    for (key, watch) in watches {
        call_value(ctx, &watch, vec![key, Value::Var(id), old.clone(), value.clone()])?;
    }
    Ok(value)
}

/// Install (or replace) a multimethod method under a dispatch value.
pub fn add_multi_method(
    ctx: &mut RuntimeContext,
    var_id: u32,
    dispatch_val: Value,
    method: Value,
) -> EvalResult<()> {
    let root = ctx.deref_var(var_id)?;
    let Value::Obj(r) = &root else {
        return Err(EvalError::runtime("defmethod target is not a multimethod"));
    };
    let HeapObj::MultiFn(m) = ctx.heap.get_mut(r) else {
        return Err(EvalError::runtime("defmethod target is not a multimethod"));
    };
    match m.methods.iter_mut().find(|(k, _)| value_eq(k, &dispatch_val)) {
        Some((_, f)) => *f = method,
        None => m.methods.push((dispatch_val, method)),
    }
    Ok(())
}

/// Readable print that realizes lazy sequences first.
pub fn pr_str_value(ctx: &mut RuntimeContext, v: &Value) -> EvalResult<String> {
    let realized = realize_profiled(ctx, v)?;
    Ok(printer::pr_str(&realized, &ctx.heap))
}

pub fn display_value(ctx: &mut RuntimeContext, v: &Value) -> EvalResult<String> {
    let realized = realize_profiled(ctx, v)?;
    Ok(printer::display_str(&realized, &ctx.heap))
}

fn realize_profiled(ctx: &mut RuntimeContext, v: &Value) -> EvalResult<Value> {
    let start = std::time::Instant::now();
    let realized = realize_deep(ctx, v)?;
    if ctx
        .config
        .profile
        .contains(&crate::context::ProfileStage::Realize)
    {
        tracing::info!(
            micros = start.elapsed().as_micros() as u64,
            "realize timing"
        );
    }
    Ok(realized)
}
