//! Core builtins: equality, predicates, printing values to strings,
//! symbols/keywords, metadata, exceptions, apply, deref and the
//! reference types that are not atoms (volatile, delay, promise,
//! reduced).

use std::rc::Rc;

use loam_core::heap::{DelayData, HeapObj};
use loam_core::value::{ExInfo, Sym, Value};

use crate::call::{call_value, display_value, eq_values, pr_str_value};
use crate::context::RuntimeContext;
use crate::error::{EvalError, EvalResult};
use crate::lazy;

pub fn eq(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    for pair in args.windows(2) {
        if !eq_values(ctx, &pair[0], &pair[1])? {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

pub fn not_eq(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match eq(ctx, args)? {
        Value::Bool(b) => Ok(Value::Bool(!b)),
        _ => unreachable!("eq yields a bool"),
    }
}

pub fn not(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(!args[0].is_truthy()))
}

pub fn nil_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Nil)))
}

pub fn some_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(!matches!(args[0], Value::Nil)))
}

pub fn true_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Bool(true))))
}

pub fn false_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Bool(false))))
}

pub fn boolean(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(args[0].is_truthy()))
}

pub fn identity(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(args[0].clone())
}

pub fn identical_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(match (&args[0], &args[1]) {
        (Value::Obj(a), Value::Obj(b)) => a.same(b),
        (Value::Fn(a), Value::Fn(b)) => Rc::ptr_eq(a, b),
        (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b),
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::Keyword(x), Value::Keyword(y)) => **x == **y,
        _ => false,
    }))
}

pub fn type_of(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let name = match &args[0] {
        Value::Obj(r) => ctx.heap.type_name(r),
        other => other.type_name(),
    };
    Ok(Value::symbol(name))
}

pub fn string_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Str(_))))
}

pub fn keyword_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Keyword(_))))
}

pub fn symbol_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Symbol(_))))
}

pub fn fn_p(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let callable = match &args[0] {
        Value::Fn(_) => true,
        Value::Obj(r) => matches!(ctx.heap.get(r), HeapObj::MultiFn(_)),
        _ => false,
    };
    Ok(Value::Bool(callable))
}

pub fn map_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Map(_))))
}

pub fn vector_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Vector(_))))
}

pub fn set_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Set(_))))
}

pub fn list_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::List(_))))
}

pub fn char_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Char(_))))
}

pub fn name(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match &args[0] {
        Value::Keyword(s) | Value::Symbol(s) => Ok(Value::Str(s.name.clone())),
        Value::Str(s) => Ok(Value::Str(s.clone())),
        other => Err(EvalError::runtime(format!(
            "name not supported on {}",
            other.type_name()
        ))),
    }
}

pub fn namespace(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match &args[0] {
        Value::Keyword(s) | Value::Symbol(s) => Ok(match &s.ns {
            Some(ns) => Value::Str(ns.clone()),
            None => Value::Nil,
        }),
        other => Err(EvalError::runtime(format!(
            "namespace not supported on {}",
            other.type_name()
        ))),
    }
}

pub fn keyword(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let to_str = |v: &Value| -> EvalResult<Rc<str>> {
        match v {
            Value::Str(s) => Ok(s.clone()),
            Value::Symbol(s) | Value::Keyword(s) => Ok(s.name.clone()),
            other => Err(EvalError::runtime(format!(
                "keyword requires names, got {}",
                other.type_name()
            ))),
        }
    };
    match args {
        [n] => Ok(Value::Keyword(Rc::new(Sym {
            ns: None,
            name: to_str(n)?,
            meta: None,
        }))),
        [ns, n] => Ok(Value::Keyword(Rc::new(Sym {
            ns: Some(to_str(ns)?),
            name: to_str(n)?,
            meta: None,
        }))),
        _ => Err(EvalError::runtime("keyword requires 1 or 2 arguments")),
    }
}

pub fn symbol(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let to_str = |v: &Value| -> EvalResult<Rc<str>> {
        match v {
            Value::Str(s) => Ok(s.clone()),
            Value::Symbol(s) => Ok(s.name.clone()),
            other => Err(EvalError::runtime(format!(
                "symbol requires names, got {}",
                other.type_name()
            ))),
        }
    };
    match args {
        [n] => Ok(Value::Symbol(Rc::new(Sym {
            ns: None,
            name: to_str(n)?,
            meta: None,
        }))),
        [ns, n] => Ok(Value::Symbol(Rc::new(Sym {
            ns: Some(to_str(ns)?),
            name: to_str(n)?,
            meta: None,
        }))),
        _ => Err(EvalError::runtime("symbol requires 1 or 2 arguments")),
    }
}

pub fn gensym(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let prefix = match args.first() {
        Some(Value::Str(s)) => s.to_string(),
        _ => "G__".to_string(),
    };
    ctx.gensym_counter += 1;
    Ok(Value::symbol(&format!("{}{}", prefix, ctx.gensym_counter)))
}

pub fn meta(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(match &args[0] {
        Value::Symbol(s) | Value::Keyword(s) => s.meta.clone().unwrap_or(Value::Nil),
        Value::List(l) => l.meta.clone().unwrap_or(Value::Nil),
        Value::Vector(l) => l.meta.clone().unwrap_or(Value::Nil),
        Value::Map(m) => m.meta.clone().unwrap_or(Value::Nil),
        Value::Set(s) => s.meta.clone().unwrap_or(Value::Nil),
        Value::Fn(f) => f.meta.clone().unwrap_or(Value::Nil),
        Value::Var(id) => ctx.env.var(*id).meta.clone().unwrap_or(Value::Nil),
        _ => Value::Nil,
    })
}

pub fn with_meta(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let m = match &args[1] {
        Value::Nil => None,
        other => Some(other.clone()),
    };
    Ok(match &args[0] {
        Value::Symbol(s) => {
            let mut s = (**s).clone();
            s.meta = m;
            Value::Symbol(Rc::new(s))
        }
        Value::Keyword(s) => {
            let mut s = (**s).clone();
            s.meta = m;
            Value::Keyword(Rc::new(s))
        }
        Value::List(l) => {
            let mut l = (**l).clone();
            l.meta = m;
            Value::List(Rc::new(l))
        }
        Value::Vector(l) => {
            let mut l = (**l).clone();
            l.meta = m;
            Value::Vector(Rc::new(l))
        }
        Value::Map(map) => {
            let mut map = (**map).clone();
            map.meta = m;
            Value::Map(Rc::new(map))
        }
        Value::Set(s) => {
            let mut s = (**s).clone();
            s.meta = m;
            Value::Set(Rc::new(s))
        }
        Value::Fn(f) => {
            let mut f = (**f).clone();
            f.meta = m;
            Value::Fn(Rc::new(f))
        }
        other => {
            return Err(EvalError::runtime(format!(
                "with-meta not supported on {}",
                other.type_name()
            )));
        }
    })
}

pub fn vary_meta(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let current = meta(ctx, &args[0..1])?;
    let mut call_args = vec![current];
    call_args.extend_from_slice(&args[2..]);
    let new_meta = call_value(ctx, &args[1], call_args)?;
    with_meta(ctx, &[args[0].clone(), new_meta])
}

pub fn str_op(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let mut out = String::new();
    for v in args {
        if !matches!(v, Value::Nil) {
            out.push_str(&display_value(ctx, v)?);
        }
    }
    Ok(Value::string(out))
}

pub fn pr_str(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let mut parts = Vec::with_capacity(args.len());
    for v in args {
        parts.push(pr_str_value(ctx, v)?);
    }
    Ok(Value::string(parts.join(" ")))
}

pub fn ex_info(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let Value::Str(message) = &args[0] else {
        return Err(EvalError::runtime("ex-info requires a string message"));
    };
    Ok(Value::ExInfo(Rc::new(ExInfo {
        message: message.clone(),
        data: args[1].clone(),
    })))
}

pub fn ex_message(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(match &args[0] {
        Value::ExInfo(e) => Value::Str(e.message.clone()),
        _ => Value::Nil,
    })
}

pub fn ex_data(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(match &args[0] {
        Value::ExInfo(e) => e.data.clone(),
        _ => Value::Nil,
    })
}

pub fn apply(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let Some((f, rest)) = args.split_first() else {
        return Err(EvalError::runtime("apply requires a function"));
    };
    let Some((spread, fixed)) = rest.split_last() else {
        return Err(EvalError::runtime("apply requires an argument sequence"));
    };
    let mut call_args: Vec<Value> = fixed.to_vec();
    call_args.extend(lazy::seq_to_vec(ctx, spread)?);
    call_value(ctx, f, call_args)
}

pub fn deref(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match &args[0] {
        Value::Var(id) => Ok(ctx.deref_var(*id)?),
        Value::Reduced(inner) => Ok((**inner).clone()),
        Value::Obj(r) => {
            let r = r.clone();
            enum Deref {
                Done(Value),
                Delay,
                Undelivered,
                Unsupported(&'static str),
            }
            let step = match ctx.heap.get(&r) {
                HeapObj::Atom(a) => Deref::Done(a.value.clone()),
                HeapObj::Volatile(v) => Deref::Done(v.clone()),
                HeapObj::Delay(_) => Deref::Delay,
                HeapObj::Promise(Some(v)) => Deref::Done(v.clone()),
                // Single evaluation thread: a blocking deref could never
                // be delivered.
                HeapObj::Promise(None) => Deref::Undelivered,
                other => Deref::Unsupported(other.type_name()),
            };
            match step {
                Deref::Done(v) => Ok(v),
                Deref::Delay => force_delay(ctx, &args[0]),
                Deref::Undelivered => {
                    Err(EvalError::runtime("deref on an undelivered promise"))
                }
                Deref::Unsupported(t) => {
                    Err(EvalError::runtime(format!("deref not supported on {}", t)))
                }
            }
        }
        other => Err(EvalError::runtime(format!(
            "deref not supported on {}",
            other.type_name()
        ))),
    }
}

pub fn volatile(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Obj(ctx.heap.alloc(HeapObj::Volatile(args[0].clone()))))
}

pub fn vreset(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let Value::Obj(r) = &args[0] else {
        return Err(EvalError::runtime("vreset! requires a volatile"));
    };
    match ctx.heap.get_mut(r) {
        HeapObj::Volatile(slot) => {
            *slot = args[1].clone();
            Ok(args[1].clone())
        }
        other => Err(EvalError::runtime(format!(
            "vreset! requires a volatile, got {}",
            other.type_name()
        ))),
    }
}

pub fn vswap(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let Value::Obj(r) = &args[0] else {
        return Err(EvalError::runtime("vswap! requires a volatile"));
    };
    let current = match ctx.heap.get(r) {
        HeapObj::Volatile(v) => v.clone(),
        other => {
            return Err(EvalError::runtime(format!(
                "vswap! requires a volatile, got {}",
                other.type_name()
            )));
        }
    };
    let mut call_args = vec![current];
    call_args.extend_from_slice(&args[2..]);
    let next = call_value(ctx, &args[1], call_args)?;
    let Value::Obj(r) = &args[0] else { unreachable!() };
    if let HeapObj::Volatile(slot) = ctx.heap.get_mut(r) {
        *slot = next.clone();
    }
    Ok(next)
}

pub fn delay_star(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Obj(ctx.heap.alloc(HeapObj::Delay(DelayData {
        thunk: Some(args[0].clone()),
        value: None,
    }))))
}

pub fn force(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match &args[0] {
        Value::Obj(r) if matches!(ctx.heap.get(r), HeapObj::Delay(_)) => {
            force_delay(ctx, &args[0])
        }
        other => Ok(other.clone()),
    }
}

fn force_delay(ctx: &mut RuntimeContext, v: &Value) -> EvalResult<Value> {
    let Value::Obj(r) = v else {
        return Err(EvalError::runtime("force requires a delay"));
    };
    let thunk = match ctx.heap.get_mut(r) {
        HeapObj::Delay(d) => {
            if let Some(value) = &d.value {
                return Ok(value.clone());
            }
            d.thunk.take()
        }
        _ => return Err(EvalError::runtime("force requires a delay")),
    };
    let Some(thunk) = thunk else {
        return Err(EvalError::runtime("delay is already being forced"));
    };
    let value = call_value(ctx, &thunk, vec![])?;
    if let HeapObj::Delay(d) = ctx.heap.get_mut(r) {
        d.value = Some(value.clone());
    }
    Ok(value)
}

pub fn promise(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let _ = args;
    Ok(Value::Obj(ctx.heap.alloc(HeapObj::Promise(None))))
}

pub fn deliver(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let Value::Obj(r) = &args[0] else {
        return Err(EvalError::runtime("deliver requires a promise"));
    };
    match ctx.heap.get_mut(r) {
        HeapObj::Promise(slot) => {
            if slot.is_none() {
                *slot = Some(args[1].clone());
                Ok(args[0].clone())
            } else {
                // Subsequent deliveries are no-ops.
                Ok(Value::Nil)
            }
        }
        other => Err(EvalError::runtime(format!(
            "deliver requires a promise, got {}",
            other.type_name()
        ))),
    }
}

pub fn reduced(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Reduced(Rc::new(args[0].clone())))
}

pub fn reduced_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(args[0], Value::Reduced(_))))
}

pub fn realized_p(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(match &args[0] {
        Value::Obj(r) => match ctx.heap.get(r) {
            HeapObj::Lazy(state) => state.is_realized(),
            HeapObj::Delay(d) => d.value.is_some(),
            HeapObj::Promise(p) => p.is_some(),
            _ => true,
        },
        _ => true,
    }))
}
