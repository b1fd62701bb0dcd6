//! Analyzer behavior against a stub environment: symbol resolution,
//! slot assignment, capture discovery, macro expansion output, constant
//! folding, and error reporting.

use std::collections::HashSet;
use std::rc::Rc;

use bumpalo::Bump;
use loam_core::diagnostics::ErrorKind;
use loam_core::node::{BinOp, Node, NodeKind};
use loam_core::value::Value;
use loamc::analyzer::{Analyzer, VarResolver};
use loamc::reader::Reader;

/// Stand-in for the runtime environment: a fixed builtin table plus
/// whatever gets interned during analysis.
struct StubEnv {
    names: Vec<String>,
    macros: HashSet<u32>,
}

const BUILTINS: &[&str] = &[
    "+", "-", "*", "/", "<", ">", "<=", ">=", "=", "not", "nth", "get", "list", "vector", "vec",
    "set", "hash-map", "hash-set", "seq", "concat", "apply", "first", "next", "nthnext", "inc",
    "dec", "count", "mapcat", "take-while", "lazy-seq*", "delay*", "ex-info",
    "push-bindings*", "pop-bindings*", "var-root*", "var-bind-root*", "in-ns*", "protocol*",
    "protocol-method*", "extend*", "some?", "nil?",
];

impl StubEnv {
    fn new() -> Self {
        StubEnv {
            names: BUILTINS.iter().map(|s| s.to_string()).collect(),
            macros: HashSet::new(),
        }
    }
}

impl VarResolver for StubEnv {
    fn resolve(&mut self, _ns: Option<&str>, name: &str) -> Option<u32> {
        self.names.iter().position(|n| n == name).map(|i| i as u32)
    }

    fn intern(&mut self, name: &str) -> u32 {
        if let Some(i) = self.names.iter().position(|n| n == name) {
            return i as u32;
        }
        self.names.push(name.to_string());
        (self.names.len() - 1) as u32
    }

    fn current_ns(&self) -> Rc<str> {
        "user".into()
    }

    fn var_ns_name(&self, id: u32) -> (Rc<str>, Rc<str>) {
        ("loam.core".into(), self.names[id as usize].as_str().into())
    }

    fn mark_macro(&mut self, id: u32) {
        self.macros.insert(id);
    }

    fn mark_dynamic(&mut self, _id: u32) {}

    fn binop_of(&self, id: u32) -> Option<BinOp> {
        match self.names.get(id as usize).map(String::as_str) {
            Some("+") => Some(BinOp::Add),
            Some("-") => Some(BinOp::Sub),
            Some("*") => Some(BinOp::Mul),
            Some("/") => Some(BinOp::Div),
            Some("<") => Some(BinOp::Lt),
            Some(">") => Some(BinOp::Gt),
            Some("<=") => Some(BinOp::Le),
            Some(">=") => Some(BinOp::Ge),
            Some("=") => Some(BinOp::Eq),
            Some("nth") => Some(BinOp::Nth),
            _ => None,
        }
    }

    fn is_not_builtin(&self, id: u32) -> bool {
        self.names.get(id as usize).map(String::as_str) == Some("not")
    }

    fn is_protocol_fn(&self, _id: u32) -> bool {
        false
    }
}

fn analyze(src: &str) -> Node {
    try_analyze(src).unwrap()
}

fn try_analyze(src: &str) -> Result<Node, loam_core::diagnostics::Diagnostic> {
    let arena = Bump::new();
    let src = &*arena.alloc_str(src);
    let mut env = StubEnv::new();
    let mut reader = Reader::new(src, &arena, "t.clj".into(), "user".into());
    let form = reader.read_form().unwrap().unwrap();
    let mut analyzer = Analyzer::new(&arena, &mut env, "t.clj".into());
    analyzer.analyze(&form)
}

#[test]
fn test_constant_fold_arithmetic() {
    assert!(matches!(
        analyze("(+ 1 2 3)").kind,
        NodeKind::Const(Value::Int(6))
    ));
    assert!(matches!(
        analyze("(* 2.0 3)").kind,
        NodeKind::Const(Value::Double(d)) if d == 6.0
    ));
    assert!(matches!(
        analyze("(< 1 2 3)").kind,
        NodeKind::Const(Value::Bool(true))
    ));
    assert!(matches!(
        analyze("(/ 6 3)").kind,
        NodeKind::Const(Value::Int(2))
    ));
    // Division by a constant zero is left for runtime.
    assert!(matches!(
        analyze("(/ 1 0)").kind,
        NodeKind::BinOp { op: BinOp::Div, .. }
    ));
}

#[test]
fn test_binop_specialization() {
    let node = analyze("(let [x 1] (+ x 2))");
    let NodeKind::Let { body, .. } = node.kind else {
        panic!("expected let");
    };
    assert!(matches!(body.kind, NodeKind::BinOp { op: BinOp::Add, .. }));
}

#[test]
fn test_not_specialization() {
    let node = analyze("(let [x 1] (not x))");
    let NodeKind::Let { body, .. } = node.kind else {
        panic!("expected let");
    };
    assert!(matches!(body.kind, NodeKind::Not(_)));
}

#[test]
fn test_local_slots_in_order() {
    let node = analyze("(let [a 1 b 2] b)");
    let NodeKind::Let { bindings, body } = node.kind else {
        panic!("expected let");
    };
    assert_eq!(bindings.len(), 2);
    assert!(matches!(
        body.kind,
        NodeKind::LocalRef { slot: 1, .. }
    ));
}

#[test]
fn test_fn_captures_enclosing_local() {
    let node = analyze("(let [n 1] (fn [x] (+ x n)))");
    let NodeKind::Let { body, .. } = node.kind else {
        panic!("expected let");
    };
    let NodeKind::Fn {
        arities, captures, ..
    } = &body.kind
    else {
        panic!("expected fn");
    };
    // n sits at enclosing slot 0 and becomes capture 0, addressed as
    // slot 1 (after the single param) in the body.
    assert_eq!(captures, &vec![0u16]);
    let NodeKind::BinOp { rhs, .. } = &arities[0].body.kind else {
        panic!("expected + body");
    };
    assert!(matches!(rhs.kind, NodeKind::LocalRef { slot: 1, .. }));
}

#[test]
fn test_named_fn_self_slot() {
    let node = analyze("(fn fact [n] (fact n))");
    let NodeKind::Fn { arities, .. } = &node.kind else {
        panic!("expected fn");
    };
    // Self-reference resolves to the slot after params and captures.
    let NodeKind::Call { callee, .. } = &arities[0].body.kind else {
        panic!("expected call body");
    };
    assert!(matches!(callee.kind, NodeKind::LocalRef { slot: 1, .. }));
}

#[test]
fn test_dynamic_collection_literal_lowering() {
    let node = analyze("(let [x 1] [x 2])");
    let NodeKind::Let { body, .. } = node.kind else {
        panic!("expected let");
    };
    assert!(matches!(
        body.kind,
        NodeKind::CollLiteral {
            kind: loam_core::node::CollKind::Vector,
            ..
        }
    ));
    // Fully constant literals stay constants.
    assert!(matches!(
        analyze("[1 2 3]").kind,
        NodeKind::Const(Value::Vector(_))
    ));
}

#[test]
fn test_def_interns_before_initialiser() {
    // Recursive reference inside the initialiser must resolve.
    let node = analyze("(def loop-back (fn [] loop-back))");
    assert!(matches!(node.kind, NodeKind::Def { .. }));
}

#[test]
fn test_when_macro_expands_to_if() {
    assert!(matches!(analyze("(when true 1)").kind, NodeKind::If { .. }));
}

#[test]
fn test_thread_first_expansion() {
    // (-> 1 inc) with inc resolvable expands to (inc 1).
    let node = analyze("(-> 1 inc)");
    assert!(matches!(node.kind, NodeKind::Call { .. }));
}

#[test]
fn test_undefined_symbol_reports_name_and_location() {
    let err = try_analyze("(let [a 1]\n  missing-thing)").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Analysis);
    assert!(err.message.contains("missing-thing"));
    let pos = err.pos.expect("position attached");
    assert_eq!(pos.line, 2);
}

#[test]
fn test_recur_outside_loop_errors() {
    let err = try_analyze("(recur 1)").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Analysis);
}

#[test]
fn test_recur_arity_mismatch_errors() {
    let err = try_analyze("(loop [a 1 b 2] (recur a))").unwrap_err();
    assert!(err.message.contains("recur"));
}

#[test]
fn test_invalid_binding_vector_errors() {
    let err = try_analyze("(let [a] a)").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Analysis);
}

#[test]
fn test_shadowed_special_form_name_is_a_local() {
    // A local named `when` shadows the macro.
    let node = analyze("(let [when (fn [x] x)] (when 1))");
    let NodeKind::Let { body, .. } = node.kind else {
        panic!("expected let");
    };
    assert!(matches!(body.kind, NodeKind::Call { .. }));
}

#[test]
fn test_loop_destructuring_keeps_one_slot_per_pair() {
    let node = analyze("(loop [[a b] [1 2] n 0] (if (< n 1) (recur [a b] (inc n)) a))");
    let NodeKind::Loop { bindings, .. } = &node.kind else {
        panic!("expected loop");
    };
    assert_eq!(bindings.len(), 2);
}

#[test]
fn test_quote_payload_is_a_value() {
    let node = analyze("'(a 1 [b])");
    let NodeKind::Quote(Value::List(items)) = &node.kind else {
        panic!("expected quoted list");
    };
    assert!(matches!(items.items[0], Value::Symbol(_)));
}
