//! Protocol builtins
//!
//! Expansion targets of defprotocol / extend-type: `protocol*` creates
//! the protocol object, `protocol-method*` creates the dispatching fn
//! bound to each method var, and `extend*` installs implementations
//! under a type name. Dispatch itself lives in the generic call path.

use std::collections::HashMap;
use std::rc::Rc;

use loam_core::heap::{HeapObj, ObjRef, ProtocolData};
use loam_core::value::{FnKind, Function, Value};

use crate::context::RuntimeContext;
use crate::error::{EvalError, EvalResult};
use crate::lazy;

fn proto_ref(ctx: &RuntimeContext, v: &Value) -> EvalResult<ObjRef> {
    match v {
        Value::Obj(r) if matches!(ctx.heap.get(r), HeapObj::Protocol(_)) => Ok(r.clone()),
        other => Err(EvalError::runtime(format!(
            "expected a protocol, got {}",
            other.type_name()
        ))),
    }
}

fn str_arg(v: &Value, what: &str) -> EvalResult<Rc<str>> {
    match v {
        Value::Str(s) => Ok(s.clone()),
        other => Err(EvalError::runtime(format!(
            "{} requires a string, got {}",
            what,
            other.type_name()
        ))),
    }
}

pub fn protocol_star(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let name = str_arg(&args[0], "protocol*")?;
    let mut method_names = Vec::new();
    for m in lazy::seq_to_vec(ctx, &args[1])? {
        method_names.push(str_arg(&m, "protocol*")?);
    }
    Ok(Value::Obj(ctx.heap.alloc(HeapObj::Protocol(ProtocolData {
        name,
        method_names,
        impls: HashMap::new(),
    }))))
}

pub fn protocol_method_star(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let proto = proto_ref(ctx, &args[0])?;
    let method = str_arg(&args[1], "protocol-method*")?;
    let HeapObj::Protocol(p) = ctx.heap.get(&proto) else {
        unreachable!("checked by proto_ref");
    };
    if !p.method_names.iter().any(|m| *m == method) {
        return Err(EvalError::runtime(format!(
            "protocol {} has no method {}",
            p.name, method
        )));
    }
    Ok(Value::Fn(Rc::new(Function {
        name: Some(method.clone()),
        kind: FnKind::Protocol { proto, method },
        meta: None,
    })))
}

/// `(extend* proto "TypeName" {"method" fn ...})`
pub fn extend_star(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let proto = proto_ref(ctx, &args[0])?;
    let type_name = str_arg(&args[1], "extend*")?;
    let Value::Map(methods) = &args[2] else {
        return Err(EvalError::runtime("extend* requires a method map"));
    };
    let mut resolved: Vec<(Rc<str>, Value)> = Vec::with_capacity(methods.len());
    for (k, f) in methods.entries() {
        resolved.push((str_arg(k, "extend*")?, f.clone()));
    }
    let HeapObj::Protocol(p) = ctx.heap.get_mut(&proto) else {
        unreachable!("checked by proto_ref");
    };
    for (method, _) in &resolved {
        if !p.method_names.iter().any(|m| m == method) {
            return Err(EvalError::runtime(format!(
                "protocol {} has no method {}",
                p.name, method
            )));
        }
    }
    let slot = p.impls.entry(type_name).or_default();
    for (method, f) in resolved {
        slot.insert(method, f);
    }
    Ok(args[0].clone())
}

pub fn satisfies_p(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let proto = proto_ref(ctx, &args[0])?;
    let type_name: Rc<str> = match &args[1] {
        Value::Obj(r) => ctx.heap.type_name(r).into(),
        other => other.type_name().into(),
    };
    let HeapObj::Protocol(p) = ctx.heap.get(&proto) else {
        unreachable!("checked by proto_ref");
    };
    Ok(Value::Bool(p.impls.contains_key(&type_name)))
}

pub fn extends_p(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let proto = proto_ref(ctx, &args[0])?;
    let type_name = match &args[1] {
        Value::Symbol(s) => s.name.clone(),
        Value::Str(s) => s.clone(),
        other => {
            return Err(EvalError::runtime(format!(
                "extends? requires a type symbol, got {}",
                other.type_name()
            )));
        }
    };
    let HeapObj::Protocol(p) = ctx.heap.get(&proto) else {
        unreachable!("checked by proto_ref");
    };
    Ok(Value::Bool(p.impls.contains_key(&type_name)))
}
