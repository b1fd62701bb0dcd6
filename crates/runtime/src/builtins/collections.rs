//! Collection builtins
//!
//! Constructors and the persistent-update surface: conj, assoc, dissoc,
//! get, nth, count and friends, plus transients. Sequence-producing
//! operations live in `seqs`.

use std::rc::Rc;

use loam_core::collections::{PList, PMap, PSet};
use loam_core::heap::{HeapObj, TransientKind};
use loam_core::lazy::LazyState;
use loam_core::value::{value_eq, Value};

use crate::context::RuntimeContext;
use crate::error::{EvalError, EvalResult};
use crate::lazy;

pub fn list(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::list(args.to_vec()))
}

pub fn vector(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::vector(args.to_vec()))
}

pub fn hash_map(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    if args.len() % 2 != 0 {
        return Err(EvalError::runtime(
            "hash-map requires an even number of arguments",
        ));
    }
    Ok(Value::Map(Rc::new(PMap::from_interleaved(args.to_vec()))))
}

pub fn hash_set(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Set(Rc::new(PSet::new(args.to_vec()))))
}

/// Realize any seqable into a vector.
pub fn vec(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    if let Value::Vector(_) = &args[0] {
        return Ok(args[0].clone());
    }
    let items = lazy::seq_to_vec(ctx, &args[0])?;
    Ok(Value::vector(items))
}

/// Realize any seqable into a set.
pub fn set(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    if let Value::Set(_) = &args[0] {
        return Ok(args[0].clone());
    }
    let items = lazy::seq_to_vec(ctx, &args[0])?;
    Ok(Value::Set(Rc::new(PSet::new(items))))
}

pub fn conj(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let mut coll = args[0].clone();
    for item in &args[1..] {
        coll = conj_one(ctx, &coll, item.clone())?;
    }
    Ok(coll)
}

fn conj_one(ctx: &mut RuntimeContext, coll: &Value, item: Value) -> EvalResult<Value> {
    match coll {
        Value::Nil => Ok(Value::list(vec![item])),
        Value::List(l) => Ok(Value::List(Rc::new(l.conj(item)))),
        Value::Vector(l) => Ok(Value::Vector(Rc::new(l.conj(item)))),
        Value::Set(s) => Ok(Value::Set(Rc::new(s.conj(item)))),
        Value::Map(m) => match &item {
            Value::Vector(kv) if kv.items.len() == 2 => Ok(Value::Map(Rc::new(
                m.assoc(kv.items[0].clone(), kv.items[1].clone()),
            ))),
            Value::Map(other) => {
                let mut merged = (**m).clone();
                for (k, v) in other.entries() {
                    merged = merged.assoc(k.clone(), v.clone());
                }
                Ok(Value::Map(Rc::new(merged)))
            }
            _ => Err(EvalError::runtime("conj on a map requires a [k v] entry")),
        },
        Value::Obj(r) if matches!(ctx.heap.get(r), HeapObj::Lazy(_)) => {
            // Conj onto a sequence prepends, like a list.
            Ok(Value::Obj(ctx.heap.alloc(HeapObj::Lazy(LazyState::Cons {
                head: item,
                tail: coll.clone(),
            }))))
        }
        other => Err(EvalError::runtime(format!(
            "conj not supported on {}",
            other.type_name()
        ))),
    }
}

pub fn assoc(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    if args.len() % 2 != 1 {
        return Err(EvalError::runtime("assoc requires key/value pairs"));
    }
    match &args[0] {
        Value::Map(_) | Value::Nil => {
            let mut map = match &args[0] {
                Value::Map(m) => (**m).clone(),
                _ => PMap::empty(),
            };
            for kv in args[1..].chunks_exact(2) {
                map = map.assoc(kv[0].clone(), kv[1].clone());
            }
            Ok(Value::Map(Rc::new(map)))
        }
        Value::Vector(l) => {
            let mut vector = (**l).clone();
            for kv in args[1..].chunks_exact(2) {
                let Value::Int(i) = kv[0] else {
                    return Err(EvalError::runtime("vector assoc requires an integer key"));
                };
                vector = vector
                    .assoc_index(i as usize, kv[1].clone())
                    .ok_or_else(|| EvalError::runtime(format!("index {} out of bounds", i)))?;
            }
            Ok(Value::Vector(Rc::new(vector)))
        }
        other => Err(EvalError::runtime(format!(
            "assoc not supported on {}",
            other.type_name()
        ))),
    }
}

pub fn dissoc(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match &args[0] {
        Value::Nil => Ok(Value::Nil),
        Value::Map(m) => {
            let mut map = (**m).clone();
            for k in &args[1..] {
                map = map.dissoc(k);
            }
            Ok(Value::Map(Rc::new(map)))
        }
        other => Err(EvalError::runtime(format!(
            "dissoc not supported on {}",
            other.type_name()
        ))),
    }
}

pub fn disj(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match &args[0] {
        Value::Nil => Ok(Value::Nil),
        Value::Set(s) => {
            let mut set = (**s).clone();
            for item in &args[1..] {
                set = set.disj(item);
            }
            Ok(Value::Set(Rc::new(set)))
        }
        other => Err(EvalError::runtime(format!(
            "disj not supported on {}",
            other.type_name()
        ))),
    }
}

pub fn get(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let default = args.get(2).cloned().unwrap_or(Value::Nil);
    Ok(get_impl(&args[0], &args[1]).unwrap_or(default))
}

fn get_impl(coll: &Value, key: &Value) -> Option<Value> {
    match coll {
        Value::Map(m) => m.get(key).cloned(),
        Value::Set(s) => s.contains(key).then(|| key.clone()),
        Value::Vector(l) => match key {
            Value::Int(i) if *i >= 0 => l.items.get(*i as usize).cloned(),
            _ => None,
        },
        Value::Str(s) => match key {
            Value::Int(i) if *i >= 0 => s.chars().nth(*i as usize).map(Value::Char),
            _ => None,
        },
        _ => None,
    }
}

pub fn contains_p(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let found = match (&args[0], &args[1]) {
        (Value::Map(m), k) => m.contains_key(k),
        (Value::Set(s), k) => s.contains(k),
        (Value::Vector(l), Value::Int(i)) => *i >= 0 && (*i as usize) < l.items.len(),
        (Value::Nil, _) => false,
        (other, _) => {
            return Err(EvalError::runtime(format!(
                "contains? not supported on {}",
                other.type_name()
            )));
        }
    };
    Ok(Value::Bool(found))
}

/// Shared by the `nth` builtin and the specialized NthVal opcode.
pub fn nth_impl(
    ctx: &mut RuntimeContext,
    coll: &Value,
    idx: &Value,
    default: Option<&Value>,
) -> EvalResult<Value> {
    let Value::Int(i) = idx else {
        return Err(EvalError::runtime("nth requires an integer index"));
    };
    if *i < 0 {
        return match default {
            Some(d) => Ok(d.clone()),
            None => Err(EvalError::runtime(format!("index {} out of bounds", i))),
        };
    }
    let found = match coll {
        Value::Vector(l) => l.items.get(*i as usize).cloned(),
        Value::List(l) => l.items.get(*i as usize).cloned(),
        Value::Str(s) => s.chars().nth(*i as usize).map(Value::Char),
        Value::Nil => None,
        _ => {
            // Step lazily rather than realizing the whole sequence.
            let mut current = coll.clone();
            let mut remaining = *i;
            loop {
                match lazy::seq_step(ctx, &current)? {
                    Some((head, tail)) => {
                        if remaining == 0 {
                            break Some(head);
                        }
                        remaining -= 1;
                        current = tail;
                    }
                    None => break None,
                }
            }
        }
    };
    match (found, default) {
        (Some(v), _) => Ok(v),
        (None, Some(d)) => Ok(d.clone()),
        (None, None) => Err(EvalError::runtime(format!("index {} out of bounds", i))),
    }
}

pub fn nth(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    nth_impl(ctx, &args[0], &args[1], args.get(2))
}

pub fn count(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let n = match &args[0] {
        Value::Nil => 0,
        Value::List(l) => l.items.len(),
        Value::Vector(l) => l.items.len(),
        Value::Map(m) => m.len(),
        Value::Set(s) => s.items.len(),
        Value::Str(s) => s.chars().count(),
        _ => lazy::seq_to_vec(ctx, &args[0])?.len(),
    };
    Ok(Value::Int(n as i64))
}

pub fn empty_p(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(lazy::seq_step(ctx, &args[0])?.is_none()))
}

pub fn keys(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match &args[0] {
        Value::Nil => Ok(Value::Nil),
        Value::Map(m) => Ok(Value::list(m.keys().cloned().collect())),
        other => Err(EvalError::runtime(format!(
            "keys not supported on {}",
            other.type_name()
        ))),
    }
}

pub fn vals(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match &args[0] {
        Value::Nil => Ok(Value::Nil),
        Value::Map(m) => Ok(Value::list(m.vals().cloned().collect())),
        other => Err(EvalError::runtime(format!(
            "vals not supported on {}",
            other.type_name()
        ))),
    }
}

pub fn into(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let items = lazy::seq_to_vec(ctx, &args[1])?;
    let mut coll = args[0].clone();
    for item in items {
        coll = conj_one(ctx, &coll, item)?;
    }
    Ok(coll)
}

pub fn reverse(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let mut items = lazy::seq_to_vec(ctx, &args[0])?;
    items.reverse();
    Ok(Value::list(items))
}

pub fn last(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(lazy::seq_to_vec(ctx, &args[0])?
        .pop()
        .unwrap_or(Value::Nil))
}

pub fn butlast(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let mut items = lazy::seq_to_vec(ctx, &args[0])?;
    if items.pop().is_none() || items.is_empty() {
        return Ok(Value::Nil);
    }
    Ok(Value::list(items))
}

// Transients: mutable staging buffers with the persistent API shape.

pub fn transient(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let (kind, items) = match &args[0] {
        Value::Vector(l) => (TransientKind::Vector, l.items.to_vec()),
        Value::Set(s) => (TransientKind::Set, s.items.to_vec()),
        Value::Map(m) => {
            let mut flat = Vec::with_capacity(m.len() * 2);
            for (k, v) in m.entries() {
                flat.push(k.clone());
                flat.push(v.clone());
            }
            (TransientKind::Map, flat)
        }
        other => {
            return Err(EvalError::runtime(format!(
                "transient not supported on {}",
                other.type_name()
            )));
        }
    };
    Ok(Value::Obj(
        ctx.heap.alloc(HeapObj::Transient { kind, items }),
    ))
}

fn transient_mut<'h>(
    ctx: &'h mut RuntimeContext,
    v: &Value,
) -> EvalResult<(&'h mut Vec<Value>, TransientKind)> {
    let Value::Obj(r) = v else {
        return Err(EvalError::runtime("expected a transient"));
    };
    match ctx.heap.get_mut(r) {
        HeapObj::Transient { kind, items } => {
            let kind = *kind;
            Ok((items, kind))
        }
        other => Err(EvalError::runtime(format!(
            "expected a transient, got {}",
            other.type_name()
        ))),
    }
}

pub fn conj_bang(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let item = args[1].clone();
    let (items, kind) = transient_mut(ctx, &args[0])?;
    match kind {
        TransientKind::Vector => items.push(item),
        TransientKind::Set => {
            if !items.iter().any(|existing| value_eq(existing, &item)) {
                items.push(item);
            }
        }
        TransientKind::Map => {
            return Err(EvalError::runtime("conj! on a map transient; use assoc!"));
        }
    }
    Ok(args[0].clone())
}

pub fn assoc_bang(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let (k, v) = (args[1].clone(), args[2].clone());
    let (items, kind) = transient_mut(ctx, &args[0])?;
    match kind {
        TransientKind::Map => {
            let existing = items
                .chunks_exact(2)
                .position(|kv| value_eq(&kv[0], &k));
            match existing {
                Some(i) => items[2 * i + 1] = v,
                None => {
                    items.push(k);
                    items.push(v);
                }
            }
        }
        TransientKind::Vector => {
            let Value::Int(i) = k else {
                return Err(EvalError::runtime("vector assoc! requires an integer key"));
            };
            let i = i as usize;
            if i == items.len() {
                items.push(v);
            } else if i < items.len() {
                items[i] = v;
            } else {
                return Err(EvalError::runtime(format!("index {} out of bounds", i)));
            }
        }
        TransientKind::Set => {
            return Err(EvalError::runtime("assoc! on a set transient; use conj!"));
        }
    }
    Ok(args[0].clone())
}

pub fn persistent_bang(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let (items, kind) = transient_mut(ctx, &args[0])?;
    let items = std::mem::take(items);
    Ok(match kind {
        TransientKind::Vector => Value::vector(items),
        TransientKind::Set => Value::Set(Rc::new(PSet::new(items))),
        TransientKind::Map => Value::Map(Rc::new(PMap::from_interleaved(items))),
    })
}

pub fn peek(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(match &args[0] {
        Value::Vector(l) => l.items.last().cloned().unwrap_or(Value::Nil),
        Value::List(l) => l.items.first().cloned().unwrap_or(Value::Nil),
        Value::Nil => Value::Nil,
        _ => Value::Nil,
    })
}

pub fn pop(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match &args[0] {
        Value::Vector(l) => {
            if l.items.is_empty() {
                return Err(EvalError::runtime("pop on an empty vector"));
            }
            Ok(Value::vector(l.items[..l.items.len() - 1].to_vec()))
        }
        Value::List(l) => {
            if l.items.is_empty() {
                return Err(EvalError::runtime("pop on an empty list"));
            }
            Ok(Value::List(Rc::new(PList::new(l.items[1..].to_vec()))))
        }
        other => Err(EvalError::runtime(format!(
            "pop not supported on {}",
            other.type_name()
        ))),
    }
}

pub fn empty(_ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(match &args[0] {
        Value::List(_) => Value::list(vec![]),
        Value::Vector(_) => Value::vector(vec![]),
        Value::Map(_) => Value::Map(Rc::new(PMap::empty())),
        Value::Set(_) => Value::Set(Rc::new(PSet::new(vec![]))),
        _ => Value::Nil,
    })
}
