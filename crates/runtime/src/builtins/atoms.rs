//! Atom builtins
//!
//! Every mutation validates first, writes second, and notifies watchers
//! last with `(key ref old new)`. Updates are logically instantaneous
//! under the single-threaded model, so compare-and-set! always observes
//! a coherent current value.

use loam_core::heap::{AtomData, HeapObj, ObjRef};
use loam_core::value::{value_eq, Value};

use crate::call::call_value;
use crate::context::RuntimeContext;
use crate::error::{EvalError, EvalResult};

fn atom_ref(v: &Value) -> EvalResult<ObjRef> {
    match v {
        Value::Obj(r) => Ok(r.clone()),
        other => Err(EvalError::runtime(format!(
            "expected an atom, got {}",
            other.type_name()
        ))),
    }
}

fn atom_value(ctx: &RuntimeContext, r: &ObjRef) -> EvalResult<Value> {
    match ctx.heap.get(r) {
        HeapObj::Atom(a) => Ok(a.value.clone()),
        other => Err(EvalError::runtime(format!(
            "expected an atom, got {}",
            other.type_name()
        ))),
    }
}

fn validate(ctx: &mut RuntimeContext, r: &ObjRef, candidate: &Value) -> EvalResult<()> {
    let validator = match ctx.heap.get(r) {
        HeapObj::Atom(a) => a.validator.clone(),
        _ => None,
    };
    if let Some(validator) = validator {
        let verdict = call_value(ctx, &validator, vec![candidate.clone()])?;
        if !verdict.is_truthy() {
            return Err(EvalError::runtime("invalid reference state"));
        }
    }
    Ok(())
}

/// Write the new value and fire watchers.
fn commit(ctx: &mut RuntimeContext, r: &ObjRef, old: Value, new: Value) -> EvalResult<()> {
    let watches = match ctx.heap.get_mut(r) {
        HeapObj::Atom(a) => {
            a.value = new.clone();
            a.watches.clone()
        }
        _ => return Err(EvalError::runtime("expected an atom")),
    };
    for (key, watch) in watches {
        call_value(
            ctx,
            &watch,
            vec![key, Value::Obj(r.clone()), old.clone(), new.clone()],
        )?;
    }
    Ok(())
}

pub fn atom(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Obj(ctx.heap.alloc(HeapObj::Atom(AtomData {
        value: args[0].clone(),
        validator: None,
        watches: Vec::new(),
    }))))
}

pub fn reset(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let r = atom_ref(&args[0])?;
    let old = atom_value(ctx, &r)?;
    validate(ctx, &r, &args[1])?;
    commit(ctx, &r, old, args[1].clone())?;
    Ok(args[1].clone())
}

pub fn reset_vals(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let r = atom_ref(&args[0])?;
    let old = atom_value(ctx, &r)?;
    validate(ctx, &r, &args[1])?;
    commit(ctx, &r, old.clone(), args[1].clone())?;
    Ok(Value::vector(vec![old, args[1].clone()]))
}

fn swap_inner(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<(Value, Value)> {
    let r = atom_ref(&args[0])?;
    let old = atom_value(ctx, &r)?;
    let mut call_args = vec![old.clone()];
    call_args.extend_from_slice(&args[2..]);
    let new = call_value(ctx, &args[1], call_args)?;
    validate(ctx, &r, &new)?;
    commit(ctx, &r, old.clone(), new.clone())?;
    Ok((old, new))
}

pub fn swap(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(swap_inner(ctx, args)?.1)
}

pub fn swap_vals(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let (old, new) = swap_inner(ctx, args)?;
    Ok(Value::vector(vec![old, new]))
}

pub fn compare_and_set(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let r = atom_ref(&args[0])?;
    let current = atom_value(ctx, &r)?;
    if !value_eq(&current, &args[1]) {
        return Ok(Value::Bool(false));
    }
    validate(ctx, &r, &args[2])?;
    commit(ctx, &r, current, args[2].clone())?;
    Ok(Value::Bool(true))
}

pub fn add_watch(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match &args[0] {
        Value::Var(id) => {
            let id = *id;
            let key = args[1].clone();
            let var = ctx.env.var_mut(id);
            var.watches.retain(|(k, _)| !value_eq(k, &key));
            var.watches.push((key, args[2].clone()));
            Ok(args[0].clone())
        }
        _ => {
            let r = atom_ref(&args[0])?;
            let key = args[1].clone();
            match ctx.heap.get_mut(&r) {
                HeapObj::Atom(a) => {
                    a.watches.retain(|(k, _)| !value_eq(k, &key));
                    a.watches.push((key, args[2].clone()));
                    Ok(args[0].clone())
                }
                other => Err(EvalError::runtime(format!(
                    "add-watch requires an atom or var, got {}",
                    other.type_name()
                ))),
            }
        }
    }
}

pub fn remove_watch(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match &args[0] {
        Value::Var(id) => {
            let id = *id;
            let key = args[1].clone();
            ctx.env
                .var_mut(id)
                .watches
                .retain(|(k, _)| !value_eq(k, &key));
            Ok(args[0].clone())
        }
        _ => {
            let r = atom_ref(&args[0])?;
            let key = args[1].clone();
            match ctx.heap.get_mut(&r) {
                HeapObj::Atom(a) => {
                    a.watches.retain(|(k, _)| !value_eq(k, &key));
                    Ok(args[0].clone())
                }
                other => Err(EvalError::runtime(format!(
                    "remove-watch requires an atom or var, got {}",
                    other.type_name()
                ))),
            }
        }
    }
}

pub fn set_validator(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let validator = match &args[1] {
        Value::Nil => None,
        f => Some(f.clone()),
    };
    match &args[0] {
        Value::Var(id) => {
            ctx.env.var_mut(*id).validator = validator;
            Ok(Value::Nil)
        }
        _ => {
            let r = atom_ref(&args[0])?;
            // A new validator must accept the current value.
            if let Some(v) = &validator {
                let current = atom_value(ctx, &r)?;
                let verdict = call_value(ctx, v, vec![current])?;
                if !verdict.is_truthy() {
                    return Err(EvalError::runtime("invalid reference state"));
                }
            }
            match ctx.heap.get_mut(&r) {
                HeapObj::Atom(a) => {
                    a.validator = validator;
                    Ok(Value::Nil)
                }
                other => Err(EvalError::runtime(format!(
                    "set-validator! requires an atom or var, got {}",
                    other.type_name()
                ))),
            }
        }
    }
}

pub fn get_validator(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match &args[0] {
        Value::Var(id) => Ok(ctx.env.var(*id).validator.clone().unwrap_or(Value::Nil)),
        _ => {
            let r = atom_ref(&args[0])?;
            match ctx.heap.get(&r) {
                HeapObj::Atom(a) => Ok(a.validator.clone().unwrap_or(Value::Nil)),
                _ => Ok(Value::Nil),
            }
        }
    }
}
