//! Multimethod maintenance builtins
//!
//! defmulti/defmethod are special forms; these cover the table
//! manipulation surface: preference edges, removal, and lookup.

use loam_core::heap::{HeapObj, ObjRef};
use loam_core::value::{value_eq, Value};

use crate::context::RuntimeContext;
use crate::error::{EvalError, EvalResult};

fn multi_ref(ctx: &RuntimeContext, v: &Value) -> EvalResult<ObjRef> {
    match v {
        Value::Obj(r) if matches!(ctx.heap.get(r), HeapObj::MultiFn(_)) => Ok(r.clone()),
        other => Err(EvalError::runtime(format!(
            "expected a multimethod, got {}",
            other.type_name()
        ))),
    }
}

/// `(prefer-method multi winner loser)`: the winner's methods beat the
/// loser's when both match a dispatch value.
pub fn prefer_method(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let r = multi_ref(ctx, &args[0])?;
    let (winner, loser) = (args[1].clone(), args[2].clone());
    let HeapObj::MultiFn(m) = ctx.heap.get_mut(&r) else {
        unreachable!("checked by multi_ref");
    };
    // Reject edges that would contradict an existing preference.
    if m.prefers
        .iter()
        .any(|(w, l)| value_eq(w, &loser) && value_eq(l, &winner))
    {
        return Err(EvalError::runtime("preference conflict"));
    }
    if !m
        .prefers
        .iter()
        .any(|(w, l)| value_eq(w, &winner) && value_eq(l, &loser))
    {
        m.prefers.push((winner, loser));
    }
    Ok(args[0].clone())
}

pub fn remove_method(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let r = multi_ref(ctx, &args[0])?;
    let HeapObj::MultiFn(m) = ctx.heap.get_mut(&r) else {
        unreachable!("checked by multi_ref");
    };
    m.methods.retain(|(k, _)| !value_eq(k, &args[1]));
    Ok(args[0].clone())
}

pub fn get_method(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let r = multi_ref(ctx, &args[0])?;
    let HeapObj::MultiFn(m) = ctx.heap.get(&r) else {
        unreachable!("checked by multi_ref");
    };
    Ok(m.methods
        .iter()
        .find(|(k, _)| value_eq(k, &args[1]))
        .map(|(_, f)| f.clone())
        .unwrap_or(Value::Nil))
}

/// The method table as a map of dispatch value to fn, in registration
/// order.
pub fn methods(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let r = multi_ref(ctx, &args[0])?;
    let HeapObj::MultiFn(m) = ctx.heap.get(&r) else {
        unreachable!("checked by multi_ref");
    };
    let mut flat = Vec::with_capacity(m.methods.len() * 2);
    for (k, f) in &m.methods {
        flat.push(k.clone());
        flat.push(f.clone());
    }
    Ok(Value::Map(std::rc::Rc::new(
        loam_core::collections::PMap::from_interleaved(flat),
    )))
}
