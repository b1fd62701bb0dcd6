//! Var and dynamic-binding builtins
//!
//! `push-bindings*` / `pop-bindings*` are the expansion targets of the
//! `binding` macro; the frame stack is strict LIFO and the try/finally
//! expansion guarantees the pop on exceptional exit. `var-root*` /
//! `var-bind-root*` back `with-redefs`.

use loam_core::value::Value;

use crate::call::{self, call_value};
use crate::context::RuntimeContext;
use crate::error::{EvalError, EvalResult};

fn var_id(v: &Value) -> EvalResult<u32> {
    match v {
        Value::Var(id) => Ok(*id),
        other => Err(EvalError::runtime(format!(
            "expected a var, got {}",
            other.type_name()
        ))),
    }
}

pub fn var_get(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let id = var_id(&args[0])?;
    Ok(ctx.deref_var(id)?)
}

pub fn bound_p(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    for v in args {
        let id = var_id(v)?;
        if !ctx.env.var(id).bound && ctx.dynamic_lookup(id).is_none() {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

pub fn alter_var_root(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let id = var_id(&args[0])?;
    let var = ctx.env.var(id);
    if !var.bound {
        return Err(EvalError::runtime(format!(
            "unbound var #'{}/{}",
            var.ns, var.name
        )));
    }
    let mut call_args = vec![var.root.clone()];
    call_args.extend_from_slice(&args[2..]);
    let new_root = call_value(ctx, &args[1], call_args)?;
    call::bind_var_root(ctx, id, new_root)
}

/// Push one dynamic frame: `[var val var val ...]`. Every var must be
/// marked dynamic.
pub fn push_bindings(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let Value::Vector(pairs) = &args[0] else {
        return Err(EvalError::runtime("push-bindings* requires a vector"));
    };
    if pairs.items.len() % 2 != 0 {
        return Err(EvalError::runtime(
            "push-bindings* requires var/value pairs",
        ));
    }
    let mut frame = Vec::with_capacity(pairs.items.len() / 2);
    for kv in pairs.items.chunks_exact(2) {
        let id = var_id(&kv[0])?;
        let var = ctx.env.var(id);
        if !var.dynamic {
            return Err(EvalError::runtime(format!(
                "can't dynamically bind non-dynamic var #'{}/{}",
                var.ns, var.name
            )));
        }
        frame.push((id, kv[1].clone()));
    }
    ctx.dyn_frames.push(frame);
    Ok(Value::Nil)
}

pub fn pop_bindings(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let _ = args;
    if ctx.dyn_frames.pop().is_none() {
        return Err(EvalError::Diag(
            loam_core::diagnostics::Diagnostic::internal("pop without matching binding frame"),
        ));
    }
    Ok(Value::Nil)
}

/// Root value, bypassing dynamic frames (with-redefs saves this).
pub fn var_root(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let id = var_id(&args[0])?;
    let var = ctx.env.var(id);
    if !var.bound {
        return Err(EvalError::runtime(format!(
            "unbound var #'{}/{}",
            var.ns, var.name
        )));
    }
    Ok(var.root.clone())
}

pub fn var_bind_root(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let id = var_id(&args[0])?;
    call::bind_var_root(ctx, id, args[1].clone())?;
    Ok(args[0].clone())
}

pub fn in_ns(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let Value::Str(name) = &args[0] else {
        return Err(EvalError::runtime("in-ns* requires a namespace name"));
    };
    ctx.env.set_current(name);
    Ok(Value::Nil)
}
