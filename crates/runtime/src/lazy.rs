//! Lazy sequence realization and fused reduce
//!
//! The first/rest protocol forces exactly one step. Forcing mutates the
//! heap object in place: a thunk becomes whatever its function returns, a
//! transform or generator becomes a cons whose tail carries the advanced
//! state. A sequence that has reached Cons or Empty is never recomputed.
//!
//! `reduce` flattens a chain of unrealized transforms into a stage
//! pipeline and pulls elements straight from the innermost source through
//! the stages into the accumulator - no intermediate cons cells, and the
//! chain itself stays unrealized. `reduced` short-circuits both paths,
//! and the fused result always equals the unfused one.

use loam_core::heap::{HeapObj, ObjRef};
use loam_core::lazy::{Generator, LazyState, Transform, TransformKind};
use loam_core::value::Value;

use crate::call::call_value;
use crate::context::RuntimeContext;
use crate::error::{EvalError, EvalResult};

pub fn new_lazy(ctx: &mut RuntimeContext, state: LazyState) -> Value {
    Value::Obj(ctx.heap.alloc(HeapObj::Lazy(state)))
}

fn lazy_state(ctx: &RuntimeContext, r: &ObjRef) -> Option<LazyState> {
    match ctx.heap.get(r) {
        HeapObj::Lazy(state) => Some(state.clone()),
        _ => None,
    }
}

/// One step of any seqable value: Some((head, tail)) or None when empty.
pub fn seq_step(ctx: &mut RuntimeContext, v: &Value) -> EvalResult<Option<(Value, Value)>> {
    match v {
        Value::Nil => Ok(None),
        Value::List(l) => Ok(split_slice(&l.items)),
        Value::Vector(l) => Ok(split_slice(&l.items)),
        Value::Str(s) => {
            let mut chars = s.chars();
            Ok(chars
                .next()
                .map(|c| (Value::Char(c), Value::string(chars.as_str().to_string()))))
        }
        Value::Map(m) => {
            let pairs: Vec<Value> = m
                .entries()
                .map(|(k, val)| Value::vector(vec![k.clone(), val.clone()]))
                .collect();
            Ok(split_slice(&pairs))
        }
        Value::Set(s) => Ok(split_slice(&s.items)),
        Value::Obj(r) if matches!(ctx.heap.get(r), HeapObj::Lazy(_)) => {
            let r = r.clone();
            force(ctx, &r)?;
            match lazy_state(ctx, &r) {
                Some(LazyState::Cons { head, tail }) => Ok(Some((head, tail))),
                _ => Ok(None),
            }
        }
        other => Err(EvalError::runtime(format!(
            "{} is not seqable",
            other.type_name()
        ))),
    }
}

fn split_slice(items: &[Value]) -> Option<(Value, Value)> {
    let (head, rest) = items.split_first()?;
    Some((head.clone(), Value::list(rest.to_vec())))
}

/// Force a lazy object to Cons or Empty. Idempotent once realized.
pub fn force(ctx: &mut RuntimeContext, r: &ObjRef) -> EvalResult<()> {
    let Some(state) = lazy_state(ctx, r) else {
        return Ok(());
    };
    let next = match state {
        LazyState::Cons { .. } | LazyState::Empty => return Ok(()),
        LazyState::Thunk(f) => {
            let produced = call_value(ctx, &f, vec![])?;
            match seq_step(ctx, &produced)? {
                Some((head, tail)) => LazyState::Cons { head, tail },
                None => LazyState::Empty,
            }
        }
        LazyState::Transform(t) => match step_transform(ctx, t)? {
            Some((head, tail)) => LazyState::Cons { head, tail },
            None => LazyState::Empty,
        },
        LazyState::Generator(g) => match step_generator(ctx, g)? {
            Some((head, next_gen)) => {
                let tail = match next_gen {
                    Some(g) => new_lazy(ctx, LazyState::Generator(g)),
                    None => Value::Nil,
                };
                LazyState::Cons { head, tail }
            }
            None => LazyState::Empty,
        },
        LazyState::Concat { sources, at } => {
            let mut next = LazyState::Empty;
            for i in at..sources.len() {
                if let Some((head, rest)) = seq_step(ctx, &sources[i])? {
                    let mut remaining = sources.clone();
                    remaining[i] = rest;
                    let tail = new_lazy(
                        ctx,
                        LazyState::Concat {
                            sources: remaining,
                            at: i,
                        },
                    );
                    next = LazyState::Cons { head, tail };
                    break;
                }
            }
            next
        }
        LazyState::Take { source, remaining } => {
            if remaining <= 0 {
                LazyState::Empty
            } else {
                match seq_step(ctx, &source)? {
                    Some((head, rest)) => {
                        let tail = new_lazy(
                            ctx,
                            LazyState::Take {
                                source: rest,
                                remaining: remaining - 1,
                            },
                        );
                        LazyState::Cons { head, tail }
                    }
                    None => LazyState::Empty,
                }
            }
        }
    };
    *ctx.heap.get_mut(r) = HeapObj::Lazy(next);
    Ok(())
}

/// One element of a transform node, with the advanced transform as the
/// tail (a fresh lazy cell - the per-step path; reduce fuses instead).
fn step_transform(ctx: &mut RuntimeContext, t: Transform) -> EvalResult<Option<(Value, Value)>> {
    let Transform {
        kind,
        f,
        mut source,
        index,
        mut pending,
    } = t;
    loop {
        match kind {
            TransformKind::Map => {
                return match seq_step(ctx, &source)? {
                    Some((head, rest)) => {
                        let mapped = call_value(ctx, &f, vec![head])?;
                        let tail = advance(ctx, kind, f, rest, index, None);
                        Ok(Some((mapped, tail)))
                    }
                    None => Ok(None),
                };
            }
            TransformKind::Filter => match seq_step(ctx, &source)? {
                Some((head, rest)) => {
                    let keep = call_value(ctx, &f, vec![head.clone()])?;
                    if keep.is_truthy() {
                        let tail = advance(ctx, kind, f, rest, index, None);
                        return Ok(Some((head, tail)));
                    }
                    source = rest;
                }
                None => return Ok(None),
            },
            TransformKind::Mapcat => {
                if let Some(inner) = pending.take() {
                    if let Some((head, inner_rest)) = seq_step(ctx, &inner)? {
                        let tail = advance(ctx, kind, f, source, index, Some(inner_rest));
                        return Ok(Some((head, tail)));
                    }
                }
                match seq_step(ctx, &source)? {
                    Some((head, rest)) => {
                        pending = Some(call_value(ctx, &f, vec![head])?);
                        source = rest;
                    }
                    None => return Ok(None),
                }
            }
            TransformKind::TakeWhile => {
                return match seq_step(ctx, &source)? {
                    Some((head, rest)) => {
                        let keep = call_value(ctx, &f, vec![head.clone()])?;
                        if keep.is_truthy() {
                            let tail = advance(ctx, kind, f, rest, index, None);
                            Ok(Some((head, tail)))
                        } else {
                            Ok(None)
                        }
                    }
                    None => Ok(None),
                };
            }
            TransformKind::DropWhile => match seq_step(ctx, &source)? {
                Some((head, rest)) => {
                    let drop = call_value(ctx, &f, vec![head.clone()])?;
                    if drop.is_truthy() {
                        source = rest;
                    } else {
                        // Past the dropped prefix the remaining source
                        // flows through untransformed.
                        return Ok(Some((head, rest)));
                    }
                }
                None => return Ok(None),
            },
            TransformKind::MapIndexed => {
                return match seq_step(ctx, &source)? {
                    Some((head, rest)) => {
                        let mapped = call_value(ctx, &f, vec![Value::Int(index), head])?;
                        let tail = advance(ctx, kind, f, rest, index + 1, None);
                        Ok(Some((mapped, tail)))
                    }
                    None => Ok(None),
                };
            }
        }
    }
}

fn advance(
    ctx: &mut RuntimeContext,
    kind: TransformKind,
    f: Value,
    source: Value,
    index: i64,
    pending: Option<Value>,
) -> Value {
    new_lazy(
        ctx,
        LazyState::Transform(Transform {
            kind,
            f,
            source,
            index,
            pending,
        }),
    )
}

fn step_generator(
    ctx: &mut RuntimeContext,
    g: Generator,
) -> EvalResult<Option<(Value, Option<Generator>)>> {
    Ok(match g {
        Generator::Iterate { f, next } => {
            let following = call_value(ctx, &f, vec![next.clone()])?;
            Some((next, Some(Generator::Iterate { f, next: following })))
        }
        Generator::Repeat { value } => {
            Some((value.clone(), Some(Generator::Repeat { value })))
        }
        Generator::Cycle { items, at } => {
            if items.is_empty() {
                None
            } else {
                let head = items[at % items.len()].clone();
                let next = (at + 1) % items.len();
                Some((head, Some(Generator::Cycle { items, at: next })))
            }
        }
        Generator::Range { next, step, end } => {
            let done = match end {
                Some(end) => {
                    if step >= 0 {
                        next >= end
                    } else {
                        next <= end
                    }
                }
                None => false,
            };
            if done {
                None
            } else {
                Some((
                    Value::Int(next),
                    Some(Generator::Range {
                        next: next + step,
                        step,
                        end,
                    }),
                ))
            }
        }
    })
}

/// Realize a whole sequence into a vector. Diverges on infinite input,
/// exactly as realizing one element at a time would.
pub fn seq_to_vec(ctx: &mut RuntimeContext, v: &Value) -> EvalResult<Vec<Value>> {
    let mut out = Vec::new();
    let mut current = v.clone();
    while let Some((head, tail)) = seq_step(ctx, &current)? {
        out.push(head);
        current = tail;
    }
    Ok(out)
}

// ---------------------------------------------------------------------
// Fused reduce
// ---------------------------------------------------------------------

/// One stateful stage of a flattened transform chain, innermost first.
enum Stage {
    Map(Value),
    Filter(Value),
    MapIndexed(Value, i64),
    TakeWhile(Value),
    DropWhile(Value, bool),
    Mapcat(Value, Option<Value>),
    Take(i64),
}

enum Base {
    Gen(Generator),
    Seq(Value),
}

/// What feeding one element through the stages did.
enum Feed {
    /// Consumed (accumulated or filtered out); keep pulling.
    Consumed,
    /// A bounding stage ended the walk.
    Halt,
    /// The reducer returned `reduced`.
    Short(Value),
}

/// Flatten an unrealized chain into (stages innermost-first, base).
/// Returns None when the outer node is not a fusable chain head.
fn flatten_chain(ctx: &RuntimeContext, v: &Value) -> Option<(Vec<Stage>, Base)> {
    let mut stages_outer_first: Vec<Stage> = Vec::new();
    let mut current = v.clone();
    loop {
        let state = match &current {
            Value::Obj(r) => lazy_state(ctx, r)?,
            other => {
                if stages_outer_first.is_empty() {
                    return None;
                }
                stages_outer_first.reverse();
                return Some((stages_outer_first, Base::Seq(other.clone())));
            }
        };
        match state {
            LazyState::Transform(t) => {
                // A mapcat with an in-flight inner sequence has partially
                // realized state; leave it to the generic path.
                if t.pending.is_some() {
                    return None;
                }
                stages_outer_first.push(match t.kind {
                    TransformKind::Map => Stage::Map(t.f),
                    TransformKind::Filter => Stage::Filter(t.f),
                    TransformKind::MapIndexed => Stage::MapIndexed(t.f, t.index),
                    TransformKind::TakeWhile => Stage::TakeWhile(t.f),
                    TransformKind::DropWhile => Stage::DropWhile(t.f, false),
                    TransformKind::Mapcat => Stage::Mapcat(t.f, None),
                });
                current = t.source;
            }
            LazyState::Take { source, remaining } => {
                stages_outer_first.push(Stage::Take(remaining));
                current = source;
            }
            LazyState::Generator(g) => {
                // A bare generator profits too: reduce pulls from it
                // directly with no cells.
                stages_outer_first.reverse();
                return Some((stages_outer_first, Base::Gen(g)));
            }
            // Realized, thunk, or concat states feed the pipeline as a
            // plain stepped source.
            _ => {
                if stages_outer_first.is_empty() {
                    return None;
                }
                stages_outer_first.reverse();
                return Some((stages_outer_first, Base::Seq(current)));
            }
        }
    }
}

/// Reduce with fusion over transform/generator chains. `f` receives
/// (accumulator, element); a Reduced value short-circuits.
pub fn reduce_value(
    ctx: &mut RuntimeContext,
    f: &Value,
    init: Value,
    coll: &Value,
) -> EvalResult<Value> {
    if let Some((mut stages, base)) = flatten_chain(ctx, coll) {
        return reduce_fused(ctx, f, init, &mut stages, base);
    }

    let mut acc = init;
    let mut current = coll.clone();
    while let Some((head, tail)) = seq_step(ctx, &current)? {
        acc = call_value(ctx, f, vec![acc, head])?;
        if let Value::Reduced(inner) = acc {
            return Ok((*inner).clone());
        }
        current = tail;
    }
    Ok(acc)
}

fn reduce_fused(
    ctx: &mut RuntimeContext,
    f: &Value,
    init: Value,
    stages: &mut [Stage],
    base: Base,
) -> EvalResult<Value> {
    let mut acc = init;
    match base {
        Base::Gen(mut g) => loop {
            let Some((elem, next)) = step_generator(ctx, g)? else {
                return Ok(acc);
            };
            match feed(ctx, stages, elem, &mut acc, f)? {
                Feed::Consumed => {}
                Feed::Halt => return Ok(acc),
                Feed::Short(v) => return Ok(v),
            }
            match next {
                Some(next) => g = next,
                None => return Ok(acc),
            }
        },
        Base::Seq(seq) => {
            let mut current = seq;
            loop {
                let Some((elem, tail)) = seq_step(ctx, &current)? else {
                    return Ok(acc);
                };
                match feed(ctx, stages, elem, &mut acc, f)? {
                    Feed::Consumed => {}
                    Feed::Halt => return Ok(acc),
                    Feed::Short(v) => return Ok(v),
                }
                current = tail;
            }
        }
    }
}

/// Push one element through the stages (innermost first) into the
/// reducer.
fn feed(
    ctx: &mut RuntimeContext,
    stages: &mut [Stage],
    elem: Value,
    acc: &mut Value,
    f: &Value,
) -> EvalResult<Feed> {
    let Some((stage, rest)) = stages.split_first_mut() else {
        let prev = std::mem::replace(acc, Value::Nil);
        let next = call_value(ctx, f, vec![prev, elem])?;
        if let Value::Reduced(inner) = next {
            return Ok(Feed::Short((*inner).clone()));
        }
        *acc = next;
        return Ok(Feed::Consumed);
    };
    match stage {
        Stage::Map(g) => {
            let g = g.clone();
            let mapped = call_value(ctx, &g, vec![elem])?;
            feed(ctx, rest, mapped, acc, f)
        }
        Stage::Filter(p) => {
            let p = p.clone();
            let keep = call_value(ctx, &p, vec![elem.clone()])?;
            if keep.is_truthy() {
                feed(ctx, rest, elem, acc, f)
            } else {
                Ok(Feed::Consumed)
            }
        }
        Stage::MapIndexed(g, index) => {
            let i = *index;
            *index += 1;
            let g = g.clone();
            let mapped = call_value(ctx, &g, vec![Value::Int(i), elem])?;
            feed(ctx, rest, mapped, acc, f)
        }
        Stage::TakeWhile(p) => {
            let p = p.clone();
            let keep = call_value(ctx, &p, vec![elem.clone()])?;
            if keep.is_truthy() {
                feed(ctx, rest, elem, acc, f)
            } else {
                Ok(Feed::Halt)
            }
        }
        Stage::DropWhile(p, done) => {
            if *done {
                return feed(ctx, rest, elem, acc, f);
            }
            let p = p.clone();
            let drop = call_value(ctx, &p, vec![elem.clone()])?;
            if drop.is_truthy() {
                Ok(Feed::Consumed)
            } else {
                *done = true;
                feed(ctx, rest, elem, acc, f)
            }
        }
        Stage::Mapcat(g, _pending) => {
            let g = g.clone();
            let inner = call_value(ctx, &g, vec![elem])?;
            let mut current = inner;
            while let Some((x, tail)) = seq_step(ctx, &current)? {
                match feed(ctx, rest, x, acc, f)? {
                    Feed::Consumed => {}
                    halted => return Ok(halted),
                }
                current = tail;
            }
            Ok(Feed::Consumed)
        }
        Stage::Take(remaining) => {
            if *remaining <= 0 {
                return Ok(Feed::Halt);
            }
            *remaining -= 1;
            let exhausted = *remaining == 0;
            match feed(ctx, rest, elem, acc, f)? {
                Feed::Consumed => Ok(if exhausted { Feed::Halt } else { Feed::Consumed }),
                other => Ok(other),
            }
        }
    }
}
