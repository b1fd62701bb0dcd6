//! Bytecode virtual machine
//!
//! Stack machine over chunks: a value stack, a frame stack (base
//! pointer, chunk, return pc), and a handler stack for try/catch. Calls
//! to prototype-compiled functions push frames inside the same run loop;
//! tail calls reuse the current frame in place, so self-recursion is
//! constant-stack. Builtins and tree-bodied functions leave the loop
//! through the generic dispatcher and may nest a fresh run.
//!
//! `GcSafePoint` polls the heap threshold; collection only happens when
//! no native frame holds unrooted temporaries, with the VM's own value
//! stack contributed as roots.

use std::rc::Rc;

use loam_core::chunk::{scope_exit_parts, Chunk, Op};
use loam_core::heap::{HeapObj, MultiFnData};
use loam_core::node::{BinOp, CollKind};
use loam_core::value::{FnArity, FnBody, FnKind, Function, Value};

use crate::builtins::arithmetic;
use crate::builtins::collections as coll_ops;
use crate::call::{self, call_value, eq_values};
use crate::context::{with_native, RuntimeContext};
use crate::error::{arity_error, EvalError, EvalResult};
use crate::treewalk;

struct Frame {
    chunk: Rc<Chunk>,
    pc: usize,
    base: usize,
}

struct Handler {
    pc: u16,
    stack_depth: usize,
    frame_depth: usize,
}

pub struct Vm<'c> {
    ctx: &'c mut RuntimeContext,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    handlers: Vec<Handler>,
}

/// Execute a top-level chunk from pc 0 with an empty frame.
pub fn run_chunk(ctx: &mut RuntimeContext, chunk: Rc<Chunk>) -> EvalResult<Value> {
    let mut vm = Vm {
        ctx,
        stack: Vec::new(),
        frames: vec![Frame {
            chunk,
            pc: 0,
            base: 0,
        }],
        handlers: Vec::new(),
    };
    vm.run()
}

/// Apply a prototype-compiled function from outside a run loop (builtins,
/// lazy realization, the compare harness). Arguments are already
/// collapsed for variadic arities.
pub fn call_proto(ctx: &mut RuntimeContext, f: &Rc<Function>, args: Vec<Value>) -> EvalResult<Value> {
    let Some(arity) = f.find_arity(args.len()) else {
        return Err(arity_error(f.name.as_deref().unwrap_or("fn"), args.len()));
    };
    let FnBody::Proto { chunk, proto } = &arity.body else {
        return Err(EvalError::runtime("expected a bytecode-compiled function"));
    };
    let chunk = chunk.clone();
    let entry = proto_entry(&chunk, *proto as usize, arity)?;

    let mut stack = args;
    push_env_and_self(ctx, f, &mut stack)?;
    let mut vm = Vm {
        ctx,
        stack,
        frames: vec![Frame {
            chunk,
            pc: entry,
            base: 0,
        }],
        handlers: Vec::new(),
    };
    vm.run()
}

fn proto_entry(chunk: &Chunk, proto: usize, arity: &FnArity) -> EvalResult<usize> {
    chunk.protos[proto]
        .arities
        .iter()
        .find(|a| a.params.len() == arity.params.len() && a.variadic == arity.variadic)
        .map(|a| a.entry as usize)
        .ok_or_else(|| EvalError::runtime("prototype arity mismatch"))
}

/// Push the closure environment and, for named fns, the function value
/// itself, completing the frame layout params/captures/self.
fn push_env_and_self(
    ctx: &RuntimeContext,
    f: &Rc<Function>,
    stack: &mut Vec<Value>,
) -> EvalResult<()> {
    if let FnKind::User { env: Some(env), .. } = &f.kind {
        let HeapObj::Closure(captures) = ctx.heap.get(env) else {
            return Err(EvalError::runtime("corrupt closure environment"));
        };
        stack.extend(captures.iter().cloned());
    }
    if f.name.is_some() {
        stack.push(Value::Fn(f.clone()));
    }
    Ok(())
}

impl<'c> Vm<'c> {
    fn run(&mut self) -> EvalResult<Value> {
        loop {
            let frame = self.frames.last_mut().expect("vm frame stack empty");
            let (op, operand) = frame.chunk.read(frame.pc);
            frame.pc += 1;
            match self.step(op, operand) {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => {}
                Err(err) => {
                    if let Some(err) = self.unwind(err) {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Route an error to the innermost handler, truncating both stacks
    /// to the depths recorded at TryPush and delivering the thrown value
    /// at the handler pc. Non-catchable errors propagate out.
    fn unwind(&mut self, err: EvalError) -> Option<EvalError> {
        if !err.catchable() {
            return Some(err);
        }
        let Some(handler) = self.handlers.pop() else {
            return Some(err);
        };
        self.frames.truncate(handler.frame_depth);
        self.stack.truncate(handler.stack_depth);
        self.stack.push(err.catch_value());
        let frame = self.frames.last_mut().expect("handler frame missing");
        frame.pc = handler.pc as usize;
        None
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("vm value stack underflow")
    }

    fn local(&self, slot: u16) -> Value {
        let base = self.frames.last().expect("vm frame stack empty").base;
        self.stack[base + slot as usize].clone()
    }

    fn chunk(&self) -> Rc<Chunk> {
        self.frames.last().expect("vm frame stack empty").chunk.clone()
    }

    /// Execute one instruction; Some(value) means the outermost frame
    /// returned.
    fn step(&mut self, op: Op, operand: u16) -> EvalResult<Option<Value>> {
        match op {
            Op::PushConst => {
                let v = self.chunk().consts[operand as usize].clone();
                self.stack.push(v);
            }
            Op::PushNil => self.stack.push(Value::Nil),
            Op::PushTrue => self.stack.push(Value::Bool(true)),
            Op::PushFalse => self.stack.push(Value::Bool(false)),
            Op::LocalLoad => {
                let v = self.local(operand);
                self.stack.push(v);
            }
            Op::LocalStore => {
                let v = self.pop();
                let base = self.frames.last().expect("vm frame stack empty").base;
                self.stack[base + operand as usize] = v;
            }
            Op::ScopeExit => {
                let (pop_count, keep) = scope_exit_parts(operand);
                let keep_from = self.stack.len() - keep as usize;
                let kept: Vec<Value> = self.stack.split_off(keep_from);
                self.stack.truncate(self.stack.len() - pop_count as usize);
                self.stack.extend(kept);
            }
            Op::VarLoad => {
                let v = self.ctx.deref_var(operand as u32)?;
                self.stack.push(v);
            }
            Op::VarStore => {
                let v = self.pop();
                self.native(|ctx| call::bind_var_root(ctx, operand as u32, v))?;
                self.stack.push(Value::Var(operand as u32));
            }
            Op::Call | Op::ProtocolCall => return self.call_op(operand, false),
            Op::TailCall => return self.call_op(operand, true),
            Op::Return => {
                let result = self.pop();
                let frame = self.frames.pop().expect("vm frame stack empty");
                self.stack.truncate(frame.base);
                if self.frames.is_empty() {
                    return Ok(Some(result));
                }
                self.stack.push(result);
            }
            Op::Jump => {
                self.frames.last_mut().expect("vm frame stack empty").pc = operand as usize;
            }
            Op::JumpIfFalse => {
                let test = self.pop();
                if !test.is_truthy() {
                    self.frames.last_mut().expect("vm frame stack empty").pc = operand as usize;
                }
            }
            Op::Pop => {
                self.pop();
            }
            Op::MakeClosure => {
                let chunk = self.chunk();
                let proto = &chunk.protos[operand as usize];
                let base = self.frames.last().expect("vm frame stack empty").base;
                let env = if proto.captures.is_empty() {
                    None
                } else {
                    let values: Vec<Value> = proto
                        .captures
                        .iter()
                        .map(|slot| self.stack[base + *slot as usize].clone())
                        .collect();
                    Some(self.ctx.heap.alloc(HeapObj::Closure(values)))
                };
                let arities: Vec<FnArity> = proto
                    .arities
                    .iter()
                    .map(|a| FnArity {
                        params: a.params.clone().into(),
                        variadic: a.variadic,
                        body: FnBody::Proto {
                            chunk: chunk.clone(),
                            proto: operand,
                        },
                    })
                    .collect();
                self.stack.push(Value::Fn(Rc::new(Function {
                    name: proto.name.clone(),
                    kind: FnKind::User {
                        arities: arities.into(),
                        env,
                    },
                    meta: None,
                })));
            }
            Op::LetfnFixup => {
                let chunk = self.chunk();
                let group = chunk.fixups[operand as usize];
                let base = self.frames.last().expect("vm frame stack empty").base;
                for i in 0..group.count {
                    let slot = base + (group.base_slot + i) as usize;
                    let Value::Fn(f) = self.stack[slot].clone() else {
                        continue;
                    };
                    let FnKind::User { env: Some(env), arities } = &f.kind else {
                        continue;
                    };
                    let Some(FnBody::Proto { proto, .. }) =
                        arities.first().map(|a| a.body.clone())
                    else {
                        continue;
                    };
                    let values: Vec<Value> = chunk.protos[proto as usize]
                        .captures
                        .iter()
                        .map(|cap| self.stack[base + *cap as usize].clone())
                        .collect();
                    if let HeapObj::Closure(stored) = self.ctx.heap.get_mut(env) {
                        *stored = values;
                    }
                }
            }
            Op::TryPush => {
                self.handlers.push(Handler {
                    pc: operand,
                    stack_depth: self.stack.len(),
                    frame_depth: self.frames.len(),
                });
            }
            Op::TryPop => {
                self.handlers.pop();
            }
            Op::Throw => {
                let v = self.pop();
                return Err(EvalError::Thrown(v));
            }
            Op::Recur => {
                let chunk = self.chunk();
                let target = chunk.recur_targets[operand as usize];
                let frame = self.frames.last_mut().expect("vm frame stack empty");
                let base = frame.base;
                for i in (0..target.count).rev() {
                    let v = self.stack.pop().expect("recur arg missing");
                    self.stack[base + (target.base_slot + i) as usize] = v;
                }
                self.stack
                    .truncate(base + (target.base_slot + target.count) as usize);
                frame.pc = target.pc as usize;
            }
            Op::AddInt | Op::SubInt | Op::MulInt | Op::DivInt => {
                let b = self.pop();
                let a = self.pop();
                let result = match op {
                    Op::AddInt => arithmetic::num_add(&a, &b)?,
                    Op::SubInt => arithmetic::num_sub(&a, &b)?,
                    Op::MulInt => arithmetic::num_mul(&a, &b)?,
                    _ => arithmetic::num_div(&a, &b)?,
                };
                self.stack.push(result);
            }
            Op::LtInt | Op::GtInt | Op::LeInt | Op::GeInt => {
                let b = self.pop();
                let a = self.pop();
                let binop = match op {
                    Op::LtInt => BinOp::Lt,
                    Op::GtInt => BinOp::Gt,
                    Op::LeInt => BinOp::Le,
                    _ => BinOp::Ge,
                };
                self.stack.push(arithmetic::num_cmp(&a, &b, binop)?);
            }
            Op::EqVal => {
                let b = self.pop();
                let a = self.pop();
                let eq = self.native(|ctx| eq_values(ctx, &a, &b))?;
                self.stack.push(Value::Bool(eq));
            }
            Op::NotVal => {
                let v = self.pop();
                self.stack.push(Value::Bool(!v.is_truthy()));
            }
            Op::NthVal => {
                let idx = self.pop();
                let coll = self.pop();
                let v = self.native(|ctx| coll_ops::nth_impl(ctx, &coll, &idx, None))?;
                self.stack.push(v);
            }
            Op::MapLiteral | Op::VectorLiteral | Op::SetLiteral => {
                let from = self.stack.len() - operand as usize;
                let items: Vec<Value> = self.stack.split_off(from);
                let kind = match op {
                    Op::MapLiteral => CollKind::Map,
                    Op::VectorLiteral => CollKind::Vector,
                    _ => CollKind::Set,
                };
                self.stack.push(treewalk::build_collection(kind, items));
            }
            Op::DefMulti => {
                let name = self.pop();
                let dispatch = self.pop();
                let Value::Str(name) = name else {
                    return Err(EvalError::runtime("corrupt defmulti name"));
                };
                let mref = self.ctx.heap.alloc(HeapObj::MultiFn(MultiFnData {
                    name: name.clone(),
                    dispatch,
                    methods: Vec::new(),
                    prefers: Vec::new(),
                }));
                let var = operand as u32;
                self.native(|ctx| call::bind_var_root(ctx, var, Value::Obj(mref)))?;
                self.stack.push(Value::Var(var));
            }
            Op::DefMethod => {
                let method = self.pop();
                let dv = self.pop();
                let var = operand as u32;
                self.native(|ctx| call::add_multi_method(ctx, var, dv.clone(), method.clone()))?;
                self.stack.push(Value::Var(var));
            }
            Op::GcSafePoint => {
                let Vm {
                    ctx, stack, frames: _, ..
                } = self;
                ctx.maybe_gc(&[stack.as_slice()]);
            }
        }
        Ok(None)
    }

    /// Run a helper that may re-enter the evaluator. Raising the native
    /// depth keeps every safe point inside it quiet, so the values this
    /// frame holds in Rust locals cannot be moved or collected under it.
    fn native<T>(
        &mut self,
        f: impl FnOnce(&mut RuntimeContext) -> EvalResult<T>,
    ) -> EvalResult<T> {
        with_native(self.ctx, f)
    }

    /// Call and TailCall. The callee sits under `argc` arguments.
    fn call_op(&mut self, argc: u16, tail: bool) -> EvalResult<Option<Value>> {
        let argc = argc as usize;
        let callee_at = self.stack.len() - argc - 1;
        let callee = self.stack[callee_at].clone();

        if let Value::Fn(f) = &callee {
            if let FnKind::User { .. } = &f.kind {
                if let Some(arity) = f.find_arity(argc) {
                    if matches!(arity.body, FnBody::Proto { .. }) {
                        let f = f.clone();
                        return self.enter_proto(f, argc, tail).map(|_| None);
                    }
                }
            }
        }

        // Generic path: builtins, keywords, maps, sets, multimethods,
        // protocol methods, tree-bodied fns.
        let args: Vec<Value> = self.stack.split_off(callee_at + 1);
        self.pop();
        let result = self.native(|ctx| call_value(ctx, &callee, args))?;
        self.stack.push(result);
        if tail {
            // The call was this frame's last expression; return through
            // the normal path.
            return self.step(Op::Return, 0);
        }
        Ok(None)
    }

    /// Push (or, for tail calls, replace) a frame for a
    /// prototype-compiled function.
    fn enter_proto(&mut self, f: Rc<Function>, argc: usize, tail: bool) -> EvalResult<()> {
        let arity = f
            .find_arity(argc)
            .expect("arity rechecked in enter_proto");
        let FnBody::Proto { chunk, proto } = arity.body.clone() else {
            unreachable!("enter_proto requires a proto body");
        };
        let entry = proto_entry(&chunk, proto as usize, arity)?;

        // Collapse variadic arguments in place on the stack.
        if arity.variadic {
            let fixed = arity.fixed_count();
            let rest_from = self.stack.len() - argc + fixed;
            let rest: Vec<Value> = self.stack.split_off(rest_from);
            self.stack.push(if rest.is_empty() {
                Value::Nil
            } else {
                Value::list(rest)
            });
        }
        let n = arity.params.len();

        // Remove the callee; arguments slide down to the frame base.
        let callee_at = self.stack.len() - n - 1;
        self.stack.remove(callee_at);

        if tail {
            let base = self.frames.last().expect("vm frame stack empty").base;
            let args: Vec<Value> = self.stack.split_off(self.stack.len() - n);
            self.stack.truncate(base);
            self.stack.extend(args);
            push_env_and_self(self.ctx, &f, &mut self.stack)?;
            let frame = self.frames.last_mut().expect("vm frame stack empty");
            frame.chunk = chunk;
            frame.pc = entry;
        } else {
            let base = callee_at;
            push_env_and_self(self.ctx, &f, &mut self.stack)?;
            self.frames.push(Frame {
                chunk,
                pc: entry,
                base,
            });
        }
        Ok(())
    }
}
