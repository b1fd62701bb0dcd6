//! Sequence builtins
//!
//! The lazy constructors (map, filter, take, range, iterate, ...) build
//! unrealized heap states; realization happens in `crate::lazy` on first
//! first/rest. `reduce` goes through the fusing reducer.

use loam_core::heap::HeapObj;
use loam_core::lazy::{Generator, LazyState, Transform, TransformKind};
use loam_core::value::Value;

use crate::context::RuntimeContext;
use crate::error::{EvalError, EvalResult};
use crate::lazy::{self, new_lazy};

fn transform(
    ctx: &mut RuntimeContext,
    kind: TransformKind,
    f: Value,
    source: Value,
) -> Value {
    new_lazy(
        ctx,
        LazyState::Transform(Transform {
            kind,
            f,
            source,
            index: 0,
            pending: None,
        }),
    )
}

pub fn map(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(transform(
        ctx,
        TransformKind::Map,
        args[0].clone(),
        args[1].clone(),
    ))
}

pub fn filter(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(transform(
        ctx,
        TransformKind::Filter,
        args[0].clone(),
        args[1].clone(),
    ))
}

pub fn mapcat(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(transform(
        ctx,
        TransformKind::Mapcat,
        args[0].clone(),
        args[1].clone(),
    ))
}

pub fn take_while(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(transform(
        ctx,
        TransformKind::TakeWhile,
        args[0].clone(),
        args[1].clone(),
    ))
}

pub fn drop_while(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(transform(
        ctx,
        TransformKind::DropWhile,
        args[0].clone(),
        args[1].clone(),
    ))
}

pub fn map_indexed(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(transform(
        ctx,
        TransformKind::MapIndexed,
        args[0].clone(),
        args[1].clone(),
    ))
}

/// Build the one-argument negation of a predicate as a synthetic tree
/// function. The wrapped predicate lives in a real closure environment
/// so the collector traces it like any other capture: the body reads it
/// from the capture slot after the single parameter.
fn complement_of(ctx: &mut RuntimeContext, p: Value) -> Value {
    use loam_core::node::{Node, NodeKind};
    use loam_core::value::{FnArity, FnBody, FnKind, Function};
    use std::rc::Rc;

    let file: Rc<str> = "loam.core".into();
    let local = |name: &str, slot: u16| {
        Node::new(
            NodeKind::LocalRef {
                name: name.into(),
                slot,
            },
            0,
            0,
            file.clone(),
        )
    };
    let call = Node::new(
        NodeKind::Call {
            callee: Box::new(local("p", 1)),
            args: vec![local("x", 0)],
            protocol: false,
        },
        0,
        0,
        file.clone(),
    );
    let body = Node::new(NodeKind::Not(Box::new(call)), 0, 0, file);
    let env = ctx.heap.alloc(HeapObj::Closure(vec![p]));
    Value::Fn(Rc::new(Function {
        name: None,
        kind: FnKind::User {
            arities: vec![FnArity {
                params: vec![Rc::from("x")].into(),
                variadic: false,
                body: FnBody::Tree(Rc::new(body)),
            }]
            .into(),
            env: Some(env),
        },
        meta: None,
    }))
}

pub fn complement(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(complement_of(ctx, args[0].clone()))
}

/// `(remove p coll)` is `(filter (complement p) coll)`.
pub fn remove(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let complemented = complement_of(ctx, args[0].clone());
    Ok(transform(
        ctx,
        TransformKind::Filter,
        complemented,
        args[1].clone(),
    ))
}

pub fn take(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let Value::Int(n) = args[0] else {
        return Err(EvalError::runtime("take requires an integer count"));
    };
    Ok(new_lazy(
        ctx,
        LazyState::Take {
            source: args[1].clone(),
            remaining: n,
        },
    ))
}

pub fn drop(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let Value::Int(n) = args[0] else {
        return Err(EvalError::runtime("drop requires an integer count"));
    };
    let mut current = args[1].clone();
    for _ in 0..n {
        match lazy::seq_step(ctx, &current)? {
            Some((_, tail)) => current = tail,
            None => return Ok(Value::Nil),
        }
    }
    Ok(current)
}

pub fn range(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let int = |v: &Value| -> EvalResult<i64> {
        match v {
            Value::Int(n) => Ok(*n),
            other => Err(EvalError::runtime(format!(
                "range requires integers, got {}",
                other.type_name()
            ))),
        }
    };
    let (next, end, step) = match args {
        [] => (0, None, 1),
        [end] => (0, Some(int(end)?), 1),
        [start, end] => (int(start)?, Some(int(end)?), 1),
        [start, end, step] => (int(start)?, Some(int(end)?), int(step)?),
        _ => return Err(EvalError::runtime("range takes at most 3 arguments")),
    };
    if step == 0 && end.is_some() {
        return Err(EvalError::runtime("range step must not be zero"));
    }
    Ok(new_lazy(
        ctx,
        LazyState::Generator(Generator::Range { next, step, end }),
    ))
}

pub fn iterate(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(new_lazy(
        ctx,
        LazyState::Generator(Generator::Iterate {
            f: args[0].clone(),
            next: args[1].clone(),
        }),
    ))
}

pub fn repeat(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match args {
        [value] => Ok(new_lazy(
            ctx,
            LazyState::Generator(Generator::Repeat {
                value: value.clone(),
            }),
        )),
        [Value::Int(n), value] => {
            let infinite = new_lazy(
                ctx,
                LazyState::Generator(Generator::Repeat {
                    value: value.clone(),
                }),
            );
            Ok(new_lazy(
                ctx,
                LazyState::Take {
                    source: infinite,
                    remaining: *n,
                },
            ))
        }
        _ => Err(EvalError::runtime("repeat requires (x) or (n x)")),
    }
}

pub fn cycle(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let items = lazy::seq_to_vec(ctx, &args[0])?;
    Ok(new_lazy(
        ctx,
        LazyState::Generator(Generator::Cycle {
            items: items.into(),
            at: 0,
        }),
    ))
}

pub fn concat(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(new_lazy(
        ctx,
        LazyState::Concat {
            sources: args.to_vec(),
            at: 0,
        },
    ))
}

/// `(lazy-seq* (fn [] ...))` - the expansion target of the lazy-seq
/// macro.
pub fn lazy_seq_star(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(new_lazy(ctx, LazyState::Thunk(args[0].clone())))
}

pub fn cons(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(new_lazy(
        ctx,
        LazyState::Cons {
            head: args[0].clone(),
            tail: args[1].clone(),
        },
    ))
}

pub fn first(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(lazy::seq_step(ctx, &args[0])?
        .map(|(head, _)| head)
        .unwrap_or(Value::Nil))
}

pub fn second(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match lazy::seq_step(ctx, &args[0])? {
        Some((_, tail)) => first(ctx, &[tail]),
        None => Ok(Value::Nil),
    }
}

pub fn rest(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    Ok(lazy::seq_step(ctx, &args[0])?
        .map(|(_, tail)| tail)
        .unwrap_or_else(|| Value::list(vec![])))
}

pub fn next_op(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match lazy::seq_step(ctx, &args[0])? {
        Some((_, tail)) => {
            if lazy::seq_step(ctx, &tail)?.is_some() {
                Ok(tail)
            } else {
                Ok(Value::Nil)
            }
        }
        None => Ok(Value::Nil),
    }
}

pub fn nthnext(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let Value::Int(n) = args[1] else {
        return Err(EvalError::runtime("nthnext requires an integer count"));
    };
    let mut current = args[0].clone();
    for _ in 0..n {
        match lazy::seq_step(ctx, &current)? {
            Some((_, tail)) => current = tail,
            None => return Ok(Value::Nil),
        }
    }
    if lazy::seq_step(ctx, &current)?.is_some() {
        Ok(current)
    } else {
        Ok(Value::Nil)
    }
}

/// nil for empty input, otherwise a seq view of the collection.
pub fn seq(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match lazy::seq_step(ctx, &args[0])? {
        Some(_) => match &args[0] {
            Value::Map(_) | Value::Set(_) | Value::Str(_) => {
                // Non-sequential seqables become an explicit sequence.
                let items = lazy::seq_to_vec(ctx, &args[0])?;
                Ok(Value::list(items))
            }
            other => Ok(other.clone()),
        },
        None => Ok(Value::Nil),
    }
}

pub fn seq_p(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let is_seq = match &args[0] {
        Value::List(_) => true,
        Value::Obj(r) => matches!(ctx.heap.get(r), HeapObj::Lazy(_)),
        _ => false,
    };
    Ok(Value::Bool(is_seq))
}

pub fn reduce(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    match args {
        [f, coll] => match lazy::seq_step(ctx, coll)? {
            None => crate::call::call_value(ctx, f, vec![]),
            Some((head, tail)) => lazy::reduce_value(ctx, f, head, &tail),
        },
        [f, init, coll] => lazy::reduce_value(ctx, f, init.clone(), coll),
        _ => Err(EvalError::runtime("reduce requires 2 or 3 arguments")),
    }
}

pub fn doall(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    // Walk the whole chain; the realized cells are memoised in place, so
    // the original sequence value is returned.
    let mut current = args[0].clone();
    while let Some((_, tail)) = lazy::seq_step(ctx, &current)? {
        current = tail;
    }
    Ok(args[0].clone())
}

pub fn dorun(ctx: &mut RuntimeContext, args: &[Value]) -> EvalResult<Value> {
    let mut current = args[0].clone();
    while let Some((_, tail)) = lazy::seq_step(ctx, &current)? {
        current = tail;
    }
    Ok(Value::Nil)
}
