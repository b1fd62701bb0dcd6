//! Bytecode compiler - Node to Chunk
//!
//! Single pass over the analyzed tree with a compile-time stack depth:
//! every expression nets exactly one value, and a binding simply declares
//! that the value just pushed is the new local, so its slot is depth - 1
//! at declaration time. The Analyzer numbers locals densely (ignoring
//! expression temporaries), so the compiler keeps a map from analyzer
//! slots to stack positions; a `let` nested inside a call's argument
//! list lands above the callee temporary and the map keeps the loads
//! honest.
//!
//! Nested functions are compiled inline behind a jump and registered as
//! prototypes; `MakeClosure` instantiates them at runtime with captures
//! remapped to stack positions. Tail positions (function body tails,
//! both `if` branches, the last form of `do`/`let`/`loop`) emit
//! `TailCall`, so self-recursion runs in constant stack.

use std::rc::Rc;

use loam_core::chunk::{
    scope_exit_operand, Chunk, FnProto, LetfnGroup, Op, ProtoArity, RecurTarget,
};
use loam_core::diagnostics::Diagnostic;
use loam_core::node::{BinOp, CollKind, FnArityNode, Node, NodeKind};
use loam_core::value::Value;

pub struct Codegen {
    chunk: Chunk,
    /// Values above the frame base at the current compile point.
    depth: u16,
    /// Analyzer slot -> stack position, maintained in binding order.
    slot_map: Vec<u16>,
    /// Innermost-first recur targets (indices into chunk.recur_targets).
    recur_stack: Vec<u16>,
}

/// Compile one top-level node into a chunk executable from pc 0 with an
/// empty frame.
pub fn compile_top(node: &Node) -> Result<Chunk, Diagnostic> {
    let mut cg = Codegen {
        chunk: Chunk::new(),
        depth: 0,
        slot_map: Vec::new(),
        recur_stack: Vec::new(),
    };
    cg.compile(node, false)?;
    cg.chunk.emit(Op::Return, 0);
    Ok(cg.chunk)
}

impl Codegen {
    fn operand(&self, value: u32, what: &str, node: &Node) -> Result<u16, Diagnostic> {
        u16::try_from(value).map_err(|_| {
            Diagnostic::internal(format!(
                "{} index {} exceeds operand range at {}:{}",
                what, value, node.file, node.line
            ))
        })
    }

    fn position(&self, slot: u16, name: &str, node: &Node) -> Result<u16, Diagnostic> {
        self.slot_map.get(slot as usize).copied().ok_or_else(|| {
            Diagnostic::internal(format!(
                "local '{}' (slot {}) unmapped at {}:{}",
                name, slot, node.file, node.line
            ))
        })
    }

    /// Compile one expression; nets exactly one stack value.
    fn compile(&mut self, node: &Node, tail: bool) -> Result<(), Diagnostic> {
        let entry_depth = self.depth;
        match &node.kind {
            NodeKind::Const(v) | NodeKind::Quote(v) => self.compile_const(v),
            NodeKind::VarRef(id) => {
                let operand = self.operand(*id, "var", node)?;
                self.chunk.emit(Op::VarLoad, operand);
                self.depth += 1;
            }
            NodeKind::LocalRef { slot, name } => {
                let position = self.position(*slot, name, node)?;
                self.chunk.emit(Op::LocalLoad, position);
                self.depth += 1;
            }
            NodeKind::If { test, then, els } => {
                self.compile(test, false)?;
                let to_else = self.chunk.emit(Op::JumpIfFalse, 0);
                self.depth -= 1;
                let branch_depth = self.depth;
                self.compile(then, tail)?;
                let to_end = self.chunk.emit(Op::Jump, 0);
                let else_at = self.chunk.len() as u16;
                self.chunk.patch(to_else, else_at);
                self.depth = branch_depth;
                match els {
                    Some(e) => self.compile(e, tail)?,
                    None => {
                        self.chunk.emit(Op::PushNil, 0);
                        self.depth += 1;
                    }
                }
                let end = self.chunk.len() as u16;
                self.chunk.patch(to_end, end);
            }
            NodeKind::Do(body) => match body.split_last() {
                None => {
                    self.chunk.emit(Op::PushNil, 0);
                    self.depth += 1;
                }
                Some((last, init)) => {
                    for n in init {
                        self.compile(n, false)?;
                        self.chunk.emit(Op::Pop, 0);
                        self.depth -= 1;
                    }
                    self.compile(last, tail)?;
                }
            },
            NodeKind::Let { bindings, body } => {
                let map_mark = self.slot_map.len();
                for (_, init) in bindings {
                    self.compile(init, false)?;
                    // The value just pushed is the new local.
                    self.slot_map.push(self.depth - 1);
                }
                self.compile(body, tail)?;
                self.exit_scope(bindings.len());
                self.slot_map.truncate(map_mark);
            }
            NodeKind::Loop { bindings, body } => {
                let map_mark = self.slot_map.len();
                let base_position = self.depth;
                for (_, init) in bindings {
                    self.compile(init, false)?;
                    self.slot_map.push(self.depth - 1);
                }
                let target = self.chunk.add_recur_target(RecurTarget {
                    pc: self.chunk.len() as u16,
                    base_slot: base_position,
                    count: bindings.len() as u16,
                });
                self.recur_stack.push(target);
                let result = self.compile(body, tail);
                self.recur_stack.pop();
                result?;
                self.exit_scope(bindings.len());
                self.slot_map.truncate(map_mark);
            }
            NodeKind::Recur(args) => {
                for arg in args {
                    self.compile(arg, false)?;
                }
                let Some(&target) = self.recur_stack.last() else {
                    return Err(Diagnostic::internal("recur without target survived analysis"));
                };
                self.chunk.emit(Op::GcSafePoint, 0);
                self.chunk.emit(Op::Recur, target);
                // Control transfers; the value this expression "produces"
                // is whatever the loop eventually yields.
                self.depth = entry_depth + 1;
            }
            NodeKind::Letfn { bindings, body } => {
                let map_mark = self.slot_map.len();
                let base_position = self.depth;
                for _ in bindings {
                    self.chunk.emit(Op::PushNil, 0);
                    self.slot_map.push(self.depth);
                    self.depth += 1;
                }
                for (i, (_, fn_node)) in bindings.iter().enumerate() {
                    self.compile(fn_node, false)?;
                    self.chunk
                        .emit(Op::LocalStore, base_position + i as u16);
                    self.depth -= 1;
                }
                let group = self.chunk.add_fixup(LetfnGroup {
                    base_slot: base_position,
                    count: bindings.len() as u16,
                });
                self.chunk.emit(Op::LetfnFixup, group);
                self.compile(body, tail)?;
                self.exit_scope(bindings.len());
                self.slot_map.truncate(map_mark);
            }
            NodeKind::Fn {
                name,
                arities,
                captures,
            } => {
                self.compile_fn(node, name, arities, captures)?;
            }
            NodeKind::Call {
                callee,
                args,
                protocol,
            } => {
                self.compile(callee, false)?;
                for arg in args {
                    self.compile(arg, false)?;
                }
                let argc = self.operand(args.len() as u32, "argument count", node)?;
                self.chunk.emit(Op::GcSafePoint, 0);
                let op = if *protocol {
                    Op::ProtocolCall
                } else if tail {
                    Op::TailCall
                } else {
                    Op::Call
                };
                self.chunk.emit(op, argc);
                self.depth -= args.len() as u16 + 1;
                self.depth += 1;
            }
            NodeKind::BinOp { op, lhs, rhs } => {
                self.compile(lhs, false)?;
                self.compile(rhs, false)?;
                let opcode = match op {
                    BinOp::Add => Op::AddInt,
                    BinOp::Sub => Op::SubInt,
                    BinOp::Mul => Op::MulInt,
                    BinOp::Div => Op::DivInt,
                    BinOp::Lt => Op::LtInt,
                    BinOp::Gt => Op::GtInt,
                    BinOp::Le => Op::LeInt,
                    BinOp::Ge => Op::GeInt,
                    BinOp::Eq => Op::EqVal,
                    BinOp::Nth => Op::NthVal,
                };
                self.chunk.emit(opcode, 0);
                self.depth -= 1;
            }
            NodeKind::Not(operand) => {
                self.compile(operand, false)?;
                self.chunk.emit(Op::NotVal, 0);
            }
            NodeKind::CollLiteral { kind, items } => {
                for item in items {
                    self.compile(item, false)?;
                }
                let count = self.operand(items.len() as u32, "literal length", node)?;
                let op = match kind {
                    CollKind::Map => Op::MapLiteral,
                    CollKind::Vector => Op::VectorLiteral,
                    CollKind::Set => Op::SetLiteral,
                };
                self.chunk.emit(op, count);
                self.depth -= items.len() as u16;
                self.depth += 1;
            }
            NodeKind::Def { var, init, .. } => {
                let operand = self.operand(*var, "var", node)?;
                match init {
                    Some(init) => {
                        self.compile(init, false)?;
                        self.chunk.emit(Op::VarStore, operand);
                    }
                    None => {
                        // Declaration only: the var stays unbound, the
                        // expression still yields it.
                        self.compile_const(&Value::Var(*var));
                    }
                }
            }
            NodeKind::Throw(e) => {
                self.compile(e, false)?;
                self.chunk.emit(Op::Throw, 0);
            }
            NodeKind::Try {
                body,
                catch,
                finally,
            } => self.compile_try(body, catch, finally)?,
            NodeKind::DefMulti { var, name, dispatch } => {
                self.compile(dispatch, false)?;
                let name_const = self.chunk.add_const(Value::string(name.to_string()));
                self.chunk.emit(Op::PushConst, name_const);
                self.depth += 1;
                let operand = self.operand(*var, "var", node)?;
                self.chunk.emit(Op::DefMulti, operand);
                self.depth -= 1;
            }
            NodeKind::DefMethod {
                var,
                dispatch_val,
                method,
            } => {
                self.compile(dispatch_val, false)?;
                self.compile(method, false)?;
                let operand = self.operand(*var, "var", node)?;
                self.chunk.emit(Op::DefMethod, operand);
                self.depth -= 1;
            }
        }
        debug_assert_eq!(
            self.depth,
            entry_depth + 1,
            "expression must net one value ({}:{})",
            node.file,
            node.line
        );
        Ok(())
    }

    fn compile_const(&mut self, v: &Value) {
        match v {
            Value::Nil => {
                self.chunk.emit(Op::PushNil, 0);
            }
            Value::Bool(true) => {
                self.chunk.emit(Op::PushTrue, 0);
            }
            Value::Bool(false) => {
                self.chunk.emit(Op::PushFalse, 0);
            }
            _ => {
                let idx = self.chunk.add_const(v.clone());
                self.chunk.emit(Op::PushConst, idx);
            }
        }
        self.depth += 1;
    }

    /// Pop a scope's locals, keeping the expression value on top.
    fn exit_scope(&mut self, count: usize) {
        self.chunk
            .emit(Op::ScopeExit, scope_exit_operand(count as u8, 1));
        self.depth -= count as u16;
    }

    fn compile_fn(
        &mut self,
        node: &Node,
        name: &Option<Rc<str>>,
        arities: &[FnArityNode],
        captures: &[u16],
    ) -> Result<(), Diagnostic> {
        // Captures are analyzer slots in the enclosing frame; record the
        // stack positions the VM must copy at MakeClosure time.
        let capture_positions = captures
            .iter()
            .map(|slot| self.position(*slot, "capture", node))
            .collect::<Result<Vec<u16>, _>>()?;

        let skip = self.chunk.emit(Op::Jump, 0);
        let mut proto_arities = Vec::with_capacity(arities.len());
        for arity in arities {
            let entry = self.chunk.len() as u16;
            // Fresh frame: params, captures, self-name slot when named.
            let frame_size =
                (arity.params.len() + captures.len() + name.is_some() as usize) as u16;
            let saved_depth = std::mem::replace(&mut self.depth, frame_size);
            let saved_map =
                std::mem::replace(&mut self.slot_map, (0..frame_size).collect());

            let target = self.chunk.add_recur_target(RecurTarget {
                pc: entry,
                base_slot: 0,
                count: arity.params.len() as u16,
            });
            self.recur_stack.push(target);
            let result = self.compile(&arity.body, true);
            self.recur_stack.pop();
            self.depth = saved_depth;
            self.slot_map = saved_map;
            result?;
            self.chunk.emit(Op::Return, 0);

            proto_arities.push(ProtoArity {
                params: arity.params.clone(),
                variadic: arity.variadic,
                entry,
            });
        }

        let proto = self.chunk.add_proto(FnProto {
            name: name.clone(),
            arities: proto_arities,
            captures: capture_positions,
        });
        let after = self.chunk.len() as u16;
        self.chunk.patch(skip, after);
        let operand = self.operand(proto as u32, "prototype", node)?;
        self.chunk.emit(Op::MakeClosure, operand);
        self.depth += 1;
        Ok(())
    }

    /// try/catch/finally layout:
    ///
    /// ```text
    ///   TryPush fin_handler        (only with finally)
    ///   TryPush catch_handler      (only with catch)
    ///   <body>
    ///   TryPop                     (catch)
    ///   TryPop, <finally>, Pop     (finally)
    ///   Jump end
    /// catch_handler:               thrown value is on the stack
    ///   <catch body over the bound slot>
    ///   ScopeExit 1 1
    ///   TryPop, <finally>, Pop     (finally)
    ///   Jump end
    /// fin_handler:                 rethrow path
    ///   <finally> Pop
    ///   Throw
    /// end:
    /// ```
    ///
    /// Handlers record the runtime stack depth at TryPush, which equals
    /// this compile point's depth over the frame base; the unwound stack
    /// holds exactly the thrown value there, which is why the catch
    /// binding's position is the depth at entry.
    fn compile_try(
        &mut self,
        body: &Node,
        catch: &Option<(Rc<str>, Box<Node>)>,
        finally: &Option<Box<Node>>,
    ) -> Result<(), Diagnostic> {
        let entry_depth = self.depth;
        let fin_push = finally.as_ref().map(|_| self.chunk.emit(Op::TryPush, 0));
        let catch_push = catch.as_ref().map(|_| self.chunk.emit(Op::TryPush, 0));

        // The handler frame must stay live across the body, so it cannot
        // run in tail position.
        self.compile(body, false)?;
        if catch_push.is_some() {
            self.chunk.emit(Op::TryPop, 0);
        }
        let mut to_end: Vec<usize> = Vec::new();
        self.emit_finally_epilogue(finally, &mut to_end)?;

        if let (Some((_, catch_body)), Some(push_at)) = (catch, catch_push) {
            let handler = self.chunk.len() as u16;
            self.chunk.patch(push_at, handler);
            // Unwinding truncated to entry depth and pushed the thrown
            // value: it is the catch binding, at position entry_depth.
            self.depth = entry_depth + 1;
            self.slot_map.push(entry_depth);
            let result = self.compile(catch_body, false);
            self.slot_map.pop();
            result?;
            self.chunk.emit(Op::ScopeExit, scope_exit_operand(1, 1));
            self.depth -= 1;
            self.emit_finally_epilogue(finally, &mut to_end)?;
        }

        if let (Some(fin), Some(push_at)) = (finally, fin_push) {
            let handler = self.chunk.len() as u16;
            self.chunk.patch(push_at, handler);
            // Thrown value on the stack; run the cleanup and rethrow.
            self.depth = entry_depth + 1;
            self.compile(fin, false)?;
            self.chunk.emit(Op::Pop, 0);
            self.depth -= 1;
            self.chunk.emit(Op::Throw, 0);
        }

        let end = self.chunk.len() as u16;
        for site in to_end {
            self.chunk.patch(site, end);
        }
        self.depth = entry_depth + 1;
        Ok(())
    }

    /// On a normal exit path: pop the finally handler, run the cleanup,
    /// and jump to the end label.
    fn emit_finally_epilogue(
        &mut self,
        finally: &Option<Box<Node>>,
        to_end: &mut Vec<usize>,
    ) -> Result<(), Diagnostic> {
        if let Some(fin) = finally {
            self.chunk.emit(Op::TryPop, 0);
            self.compile(fin, false)?;
            self.chunk.emit(Op::Pop, 0);
            self.depth -= 1;
        }
        to_end.push(self.chunk.emit(Op::Jump, 0));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(v: Value) -> Node {
        Node::constant(v, 1, 0, "t.clj".into())
    }

    fn local(slot: u16) -> Node {
        Node::new(
            NodeKind::LocalRef {
                name: "x".into(),
                slot,
            },
            1,
            0,
            "t.clj".into(),
        )
    }

    #[test]
    fn test_compile_constant() {
        let chunk = compile_top(&constant(Value::Int(42))).unwrap();
        assert_eq!(chunk.read(0), (Op::PushConst, 0));
        assert_eq!(chunk.read(1), (Op::Return, 0));
        assert!(matches!(chunk.consts[0], Value::Int(42)));
    }

    #[test]
    fn test_nil_and_bools_have_dedicated_opcodes() {
        let chunk = compile_top(&constant(Value::Nil)).unwrap();
        assert_eq!(chunk.read(0).0, Op::PushNil);
        let chunk = compile_top(&constant(Value::Bool(true))).unwrap();
        assert_eq!(chunk.read(0).0, Op::PushTrue);
    }

    #[test]
    fn test_if_patches_jumps() {
        let node = Node::new(
            NodeKind::If {
                test: Box::new(constant(Value::Bool(true))),
                then: Box::new(constant(Value::Int(1))),
                els: Some(Box::new(constant(Value::Int(2)))),
            },
            1,
            0,
            "t.clj".into(),
        );
        let chunk = compile_top(&node).unwrap();
        let (op, else_at) = chunk.read(1);
        assert_eq!(op, Op::JumpIfFalse);
        let (op, end_at) = chunk.read(3);
        assert_eq!(op, Op::Jump);
        assert_eq!(chunk.read(else_at as usize).0, Op::PushConst);
        assert_eq!(chunk.read(end_at as usize).0, Op::Return);
    }

    #[test]
    fn test_let_scope_exit_and_slot_positions() {
        let node = Node::new(
            NodeKind::Let {
                bindings: vec![("x".into(), constant(Value::Int(1)))],
                body: Box::new(local(0)),
            },
            1,
            0,
            "t.clj".into(),
        );
        let chunk = compile_top(&node).unwrap();
        assert_eq!(chunk.read(1), (Op::LocalLoad, 0));
        assert!(chunk.disassemble().contains("ScopeExit"));
    }

    #[test]
    fn test_let_inside_call_args_maps_past_temporaries() {
        // (f (let [x 1] x)): the callee occupies position 0, so the let
        // local must map to position 1 even though its analyzer slot is 0.
        let inner_let = Node::new(
            NodeKind::Let {
                bindings: vec![("x".into(), constant(Value::Int(1)))],
                body: Box::new(local(0)),
            },
            1,
            0,
            "t.clj".into(),
        );
        let node = Node::new(
            NodeKind::Call {
                callee: Box::new(Node::new(NodeKind::VarRef(0), 1, 0, "t.clj".into())),
                args: vec![inner_let],
                protocol: false,
            },
            1,
            0,
            "t.clj".into(),
        );
        let chunk = compile_top(&node).unwrap();
        // VarLoad, PushConst, LocalLoad(1), ...
        assert_eq!(chunk.read(2), (Op::LocalLoad, 1));
    }

    #[test]
    fn test_call_emits_safe_point() {
        let node = Node::new(
            NodeKind::Call {
                callee: Box::new(Node::new(NodeKind::VarRef(3), 1, 0, "t.clj".into())),
                args: vec![constant(Value::Int(1))],
                protocol: false,
            },
            1,
            0,
            "t.clj".into(),
        );
        let chunk = compile_top(&node).unwrap();
        assert_eq!(chunk.read(0), (Op::VarLoad, 3));
        assert_eq!(chunk.read(2).0, Op::GcSafePoint);
        assert_eq!(chunk.read(3), (Op::Call, 1));
    }

    #[test]
    fn test_fn_compiles_to_proto_behind_jump() {
        let arity = FnArityNode {
            params: vec!["x".into()],
            variadic: false,
            body: Rc::new(local(0)),
        };
        let node = Node::new(
            NodeKind::Fn {
                name: None,
                arities: vec![arity],
                captures: vec![],
            },
            1,
            0,
            "t.clj".into(),
        );
        let chunk = compile_top(&node).unwrap();
        assert_eq!(chunk.protos.len(), 1);
        let (op, after) = chunk.read(0);
        assert_eq!(op, Op::Jump);
        assert_eq!(chunk.read(after as usize).0, Op::MakeClosure);
        let entry = chunk.protos[0].arities[0].entry as usize;
        assert_eq!(chunk.read(entry).0, Op::LocalLoad);
    }

    #[test]
    fn test_tail_call_in_fn_body() {
        let call = Node::new(
            NodeKind::Call {
                callee: Box::new(Node::new(NodeKind::VarRef(0), 1, 0, "t.clj".into())),
                args: vec![],
                protocol: false,
            },
            1,
            0,
            "t.clj".into(),
        );
        let arity = FnArityNode {
            params: vec![],
            variadic: false,
            body: Rc::new(call),
        };
        let node = Node::new(
            NodeKind::Fn {
                name: None,
                arities: vec![arity],
                captures: vec![],
            },
            1,
            0,
            "t.clj".into(),
        );
        let chunk = compile_top(&node).unwrap();
        assert!(chunk.disassemble().contains("TailCall"));
    }

    #[test]
    fn test_recur_records_target_and_safe_point() {
        let node = Node::new(
            NodeKind::Loop {
                bindings: vec![("i".into(), constant(Value::Int(0)))],
                body: Box::new(Node::new(
                    NodeKind::Recur(vec![constant(Value::Int(1))]),
                    1,
                    0,
                    "t.clj".into(),
                )),
            },
            1,
            0,
            "t.clj".into(),
        );
        let chunk = compile_top(&node).unwrap();
        assert_eq!(chunk.recur_targets.len(), 1);
        let target = chunk.recur_targets[0];
        assert_eq!(target.base_slot, 0);
        assert_eq!(target.count, 1);
        assert!(chunk.disassemble().contains("GcSafePoint"));
    }

    #[test]
    fn test_captures_remap_to_positions() {
        // let x = 1 in (fn [] x): capture analyzer-slot 0 maps to stack
        // position 0 at top level.
        let arity = FnArityNode {
            params: vec![],
            variadic: false,
            body: Rc::new(local(0)),
        };
        let fn_node = Node::new(
            NodeKind::Fn {
                name: None,
                arities: vec![arity],
                captures: vec![0],
            },
            1,
            0,
            "t.clj".into(),
        );
        let node = Node::new(
            NodeKind::Let {
                bindings: vec![("x".into(), constant(Value::Int(1)))],
                body: Box::new(fn_node),
            },
            1,
            0,
            "t.clj".into(),
        );
        let chunk = compile_top(&node).unwrap();
        assert_eq!(chunk.protos[0].captures, vec![0]);
    }
}
