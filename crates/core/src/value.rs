//! Value - what a running Loam program talks about
//!
//! Immutable payloads (strings, symbols, collections, functions) are shared
//! with `Rc` and compared structurally. Identity-bearing or mutable objects
//! (atoms, volatiles, delays, promises, lazy sequences, multimethods,
//! protocols, transients, matchers, wasm modules, closure environments) live
//! in the garbage-collected heap and are referenced through `ObjRef`
//! handles; their equality is handle identity.
//!
//! The split keeps chunk constant pools and var-root snapshots free of heap
//! references for everything a literal can produce, which is what lets the
//! collector skip persistent infrastructure entirely.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::chunk::Chunk;
use crate::collections::{PList, PMap, PSet, PVector};
use crate::heap::ObjRef;
use crate::node::Node;

/// Namespaced name shared by symbols and keywords.
#[derive(Debug, Clone)]
pub struct Sym {
    pub ns: Option<Rc<str>>,
    pub name: Rc<str>,
    /// Metadata attached with `with-meta`; ignored by equality.
    pub meta: Option<Value>,
}

impl Sym {
    pub fn simple(name: impl Into<Rc<str>>) -> Self {
        Sym {
            ns: None,
            name: name.into(),
            meta: None,
        }
    }

    pub fn qualified(ns: impl Into<Rc<str>>, name: impl Into<Rc<str>>) -> Self {
        Sym {
            ns: Some(ns.into()),
            name: name.into(),
            meta: None,
        }
    }
}

impl PartialEq for Sym {
    fn eq(&self, other: &Self) -> bool {
        self.ns == other.ns && self.name == other.name
    }
}

/// Exception value created by `ex-info` (and by runtime errors entering a
/// `catch` clause).
#[derive(Debug, Clone, PartialEq)]
pub struct ExInfo {
    pub message: Rc<str>,
    pub data: Value,
}

/// Declared arity of a builtin: a fixed parameter count or a variadic
/// minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinArity {
    Fixed(u8),
    AtLeast(u8),
}

impl BuiltinArity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            BuiltinArity::Fixed(k) => n == k as usize,
            BuiltinArity::AtLeast(k) => n >= k as usize,
        }
    }
}

/// Body of one user-function arity: a tree for the walking evaluator or a
/// compiled prototype for the VM.
#[derive(Debug, Clone)]
pub enum FnBody {
    Tree(Rc<Node>),
    Proto { chunk: Rc<Chunk>, proto: u16 },
}

/// One arity of a user-defined function. For a variadic arity the last
/// param receives the rest of the arguments as a list.
#[derive(Debug, Clone)]
pub struct FnArity {
    pub params: Rc<[Rc<str>]>,
    pub variadic: bool,
    pub body: FnBody,
}

impl FnArity {
    /// Number of fixed parameters (excludes the rest param).
    pub fn fixed_count(&self) -> usize {
        if self.variadic {
            self.params.len() - 1
        } else {
            self.params.len()
        }
    }
}

#[derive(Debug, Clone)]
pub enum FnKind {
    /// Index into the builtin registration table.
    Builtin { idx: u16, arity: BuiltinArity },
    /// User-defined function; `env` points at a heap closure cell when the
    /// function captures anything.
    User {
        arities: Rc<[FnArity]>,
        env: Option<ObjRef>,
    },
    /// Protocol method: dispatches on the type of its first argument.
    Protocol { proto: ObjRef, method: Rc<str> },
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: Option<Rc<str>>,
    pub kind: FnKind,
    pub meta: Option<Value>,
}

impl Function {
    /// Select the arity for an `n`-argument call: the unique fixed arity
    /// with `n` params, else the variadic arity whose fixed prefix fits.
    pub fn find_arity(&self, n: usize) -> Option<&FnArity> {
        let arities = match &self.kind {
            FnKind::User { arities, .. } => arities,
            _ => return None,
        };
        if let Some(a) = arities.iter().find(|a| !a.variadic && a.params.len() == n) {
            return Some(a);
        }
        arities
            .iter()
            .find(|a| a.variadic && a.fixed_count() <= n)
    }

    pub fn describe(&self) -> String {
        match &self.name {
            Some(name) => format!("fn {}", name),
            None => "fn".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Double(f64),
    Char(char),
    Str(Rc<str>),
    Symbol(Rc<Sym>),
    Keyword(Rc<Sym>),
    List(Rc<PList>),
    Vector(Rc<PVector>),
    Map(Rc<PMap>),
    Set(Rc<PSet>),
    Fn(Rc<Function>),
    /// Interned var, by id in the environment's var table.
    Var(u32),
    Regex(Rc<regex::Regex>),
    ExInfo(Rc<ExInfo>),
    Reduced(Rc<Value>),
    /// Heap-resident identity object (atom, lazy-seq, multimethod, ...).
    Obj(ObjRef),
}

impl Value {
    /// Only `nil` and `false` are logically false.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn keyword(name: &str) -> Value {
        Value::Keyword(Rc::new(Sym::simple(name)))
    }

    pub fn symbol(name: &str) -> Value {
        Value::Symbol(Rc::new(Sym::simple(name)))
    }

    pub fn string(s: impl Into<Rc<str>>) -> Value {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(PList::new(items)))
    }

    pub fn vector(items: Vec<Value>) -> Value {
        Value::Vector(Rc::new(PVector::new(items)))
    }

    /// Type name used by protocol dispatch and error messages. Heap objects
    /// answer through `Heap::type_name`, not here.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "Boolean",
            Value::Int(_) => "Integer",
            Value::Double(_) => "Double",
            Value::Char(_) => "Character",
            Value::Str(_) => "String",
            Value::Symbol(_) => "Symbol",
            Value::Keyword(_) => "Keyword",
            Value::List(_) => "PersistentList",
            Value::Vector(_) => "PersistentVector",
            Value::Map(_) => "PersistentMap",
            Value::Set(_) => "PersistentSet",
            Value::Fn(_) => "Fn",
            Value::Var(_) => "Var",
            Value::Regex(_) => "Pattern",
            Value::ExInfo(_) => "ExceptionInfo",
            Value::Reduced(_) => "Reduced",
            Value::Obj(_) => "Object",
        }
    }
}

/// Structural value equality for heap-independent data; heap objects
/// compare by handle identity. Lists and vectors are both sequential, so
/// they compare elementwise against each other, matching language `=`.
/// Lazy sequences need forcing and are handled a layer up, in the runtime.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        value_eq(self, other)
    }
}

pub fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Double(x), Value::Double(y)) => x == y,
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Symbol(x), Value::Symbol(y)) => **x == **y,
        (Value::Keyword(x), Value::Keyword(y)) => **x == **y,
        (Value::List(_) | Value::Vector(_), Value::List(_) | Value::Vector(_)) => {
            let xs = seq_items(a).unwrap();
            let ys = seq_items(b).unwrap();
            xs.len() == ys.len() && xs.iter().zip(ys.iter()).all(|(x, y)| value_eq(x, y))
        }
        (Value::Map(x), Value::Map(y)) => x.equiv(y),
        (Value::Set(x), Value::Set(y)) => x.equiv(y),
        (Value::Fn(x), Value::Fn(y)) => Rc::ptr_eq(x, y),
        (Value::Var(x), Value::Var(y)) => x == y,
        (Value::Regex(x), Value::Regex(y)) => Rc::ptr_eq(x, y),
        (Value::ExInfo(x), Value::ExInfo(y)) => Rc::ptr_eq(x, y),
        (Value::Reduced(x), Value::Reduced(y)) => value_eq(x, y),
        (Value::Obj(x), Value::Obj(y)) => x.same(y),
        _ => false,
    }
}

fn seq_items(v: &Value) -> Option<&[Value]> {
    match v {
        Value::List(l) => Some(&l.items),
        Value::Vector(l) => Some(&l.items),
        _ => None,
    }
}

/// Hash consistent with `value_eq`: sequential collections hash alike, map
/// and set hashes are order-independent.
pub fn value_hash(v: &Value) -> u64 {
    let mut h = DefaultHasher::new();
    hash_into(v, &mut h);
    h.finish()
}

fn hash_into(v: &Value, h: &mut DefaultHasher) {
    match v {
        Value::Nil => 0u8.hash(h),
        Value::Bool(b) => (1u8, b).hash(h),
        Value::Int(n) => (2u8, n).hash(h),
        Value::Double(d) => (3u8, d.to_bits()).hash(h),
        Value::Char(c) => (4u8, c).hash(h),
        Value::Str(s) => (5u8, &**s).hash(h),
        Value::Symbol(s) => (6u8, s.ns.as_deref(), &*s.name).hash(h),
        Value::Keyword(s) => (7u8, s.ns.as_deref(), &*s.name).hash(h),
        Value::List(_) | Value::Vector(_) => {
            8u8.hash(h);
            for item in seq_items(v).unwrap() {
                value_hash(item).hash(h);
            }
        }
        Value::Map(m) => {
            9u8.hash(h);
            let mut combined: u64 = 0;
            for (k, val) in m.entries() {
                combined = combined.wrapping_add(value_hash(k) ^ value_hash(val));
            }
            combined.hash(h);
        }
        Value::Set(s) => {
            10u8.hash(h);
            let mut combined: u64 = 0;
            for item in s.items.iter() {
                combined = combined.wrapping_add(value_hash(item));
            }
            combined.hash(h);
        }
        Value::Fn(f) => (11u8, Rc::as_ptr(f) as usize).hash(h),
        Value::Var(id) => (12u8, id).hash(h),
        Value::Regex(r) => (13u8, r.as_str()).hash(h),
        Value::ExInfo(e) => (14u8, Rc::as_ptr(e) as usize).hash(h),
        Value::Reduced(inner) => {
            15u8.hash(h);
            hash_into(inner, h);
        }
        Value::Obj(r) => (16u8, r.identity()).hash(h),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::string("").is_truthy());
        assert!(Value::list(vec![]).is_truthy());
    }

    #[test]
    fn test_list_vector_equal_elementwise() {
        let l = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let v = Value::vector(vec![Value::Int(1), Value::Int(2)]);
        assert!(value_eq(&l, &v));
        assert_eq!(value_hash(&l), value_hash(&v));
    }

    #[test]
    fn test_int_double_not_equal() {
        assert!(!value_eq(&Value::Int(1), &Value::Double(1.0)));
    }

    #[test]
    fn test_keyword_symbol_distinct() {
        assert!(!value_eq(&Value::keyword("a"), &Value::symbol("a")));
    }

    #[test]
    fn test_sym_meta_ignored_by_equality() {
        let plain = Sym::simple("x");
        let mut tagged = Sym::simple("x");
        tagged.meta = Some(Value::keyword("hot"));
        assert_eq!(plain, tagged);
    }
}
