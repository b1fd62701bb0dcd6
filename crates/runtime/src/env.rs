//! Runtime environment: namespaces and vars
//!
//! Vars live in one flat table indexed by the ids the Analyzer embeds in
//! Node trees; namespaces map names to ids and carry alias and refer
//! tables. The table itself is persistent infrastructure - the collector
//! never traces it, only the Values it holds, which the context reports
//! as roots.

use std::collections::HashMap;
use std::rc::Rc;

use loam_core::node::BinOp;
use loam_core::value::{FnKind, Value};
use loamc::analyzer::VarResolver;

use crate::registry;

pub const CORE_NS: &str = "loam.core";
pub const USER_NS: &str = "user";

#[derive(Debug, Clone)]
pub struct Var {
    pub name: Rc<str>,
    pub ns: Rc<str>,
    pub root: Value,
    /// False until the first bindRoot; dereferencing an unbound var is a
    /// runtime error.
    pub bound: bool,
    pub dynamic: bool,
    pub macro_flag: bool,
    pub meta: Option<Value>,
    /// (key, watch-fn) pairs fired on root mutation.
    pub watches: Vec<(Value, Value)>,
    pub validator: Option<Value>,
}

impl Var {
    fn unbound(ns: Rc<str>, name: Rc<str>) -> Self {
        Var {
            name,
            ns,
            root: Value::Nil,
            bound: false,
            dynamic: false,
            macro_flag: false,
            meta: None,
            watches: Vec::new(),
            validator: None,
        }
    }
}

#[derive(Debug)]
pub struct Namespace {
    pub name: Rc<str>,
    pub mappings: HashMap<Rc<str>, u32>,
    pub aliases: HashMap<Rc<str>, Rc<str>>,
    pub refers: HashMap<Rc<str>, u32>,
}

impl Namespace {
    fn new(name: Rc<str>) -> Self {
        Namespace {
            name,
            mappings: HashMap::new(),
            aliases: HashMap::new(),
            refers: HashMap::new(),
        }
    }
}

pub struct Env {
    pub vars: Vec<Var>,
    pub namespaces: HashMap<Rc<str>, Namespace>,
    pub current: Rc<str>,
}

/// Saved var roots plus flags, for compare mode and test isolation.
pub struct VarSnapshot {
    roots: Vec<(Value, bool)>,
}

impl Env {
    /// An environment with the core namespace populated from the builtin
    /// registration table and `user` as the current namespace.
    pub fn new() -> Self {
        let mut env = Env {
            vars: Vec::new(),
            namespaces: HashMap::new(),
            current: USER_NS.into(),
        };
        env.ensure_namespace(CORE_NS);
        env.ensure_namespace(USER_NS);
        registry::install(&mut env);
        env
    }

    pub fn ensure_namespace(&mut self, name: &str) -> Rc<str> {
        match self.namespaces.get_key_value(name) {
            Some((key, _)) => key.clone(),
            None => {
                let key: Rc<str> = name.into();
                self.namespaces.insert(key.clone(), Namespace::new(key.clone()));
                key
            }
        }
    }

    pub fn var(&self, id: u32) -> &Var {
        &self.vars[id as usize]
    }

    pub fn var_mut(&mut self, id: u32) -> &mut Var {
        &mut self.vars[id as usize]
    }

    pub fn intern_in(&mut self, ns_name: &str, name: &str) -> u32 {
        let ns_key = self.ensure_namespace(ns_name);
        if let Some(&id) = self.namespaces[&ns_key].mappings.get(name) {
            return id;
        }
        let name_key: Rc<str> = name.into();
        let id = self.vars.len() as u32;
        self.vars.push(Var::unbound(ns_key.clone(), name_key.clone()));
        self.namespaces
            .get_mut(&ns_key)
            .expect("namespace just ensured")
            .mappings
            .insert(name_key, id);
        id
    }

    /// Plain root write, without validator or watcher side effects (those
    /// run a layer up, where functions can be called).
    pub fn bind_root(&mut self, id: u32, value: Value) {
        let var = self.var_mut(id);
        var.root = value;
        var.bound = true;
    }

    pub fn lookup(&self, ns: Option<&str>, name: &str) -> Option<u32> {
        match ns {
            Some(ns) => {
                let current = self.namespaces.get(&self.current);
                let resolved = current
                    .and_then(|c| c.aliases.get(ns))
                    .cloned()
                    .unwrap_or_else(|| ns.into());
                self.namespaces
                    .get(&resolved)
                    .and_then(|n| n.mappings.get(name))
                    .copied()
            }
            None => {
                let current = self.namespaces.get(&self.current)?;
                current
                    .mappings
                    .get(name)
                    .or_else(|| current.refers.get(name))
                    .copied()
                    .or_else(|| {
                        self.namespaces
                            .get(CORE_NS)
                            .and_then(|core| core.mappings.get(name))
                            .copied()
                    })
            }
        }
    }

    pub fn set_current(&mut self, name: &str) {
        let key = self.ensure_namespace(name);
        self.current = key;
    }

    pub fn snapshot(&self) -> VarSnapshot {
        VarSnapshot {
            roots: self
                .vars
                .iter()
                .map(|v| (v.root.clone(), v.bound))
                .collect(),
        }
    }

    /// Restore a snapshot. Vars interned after the snapshot keep their
    /// current roots (the snapshot predates them, so there is nothing to
    /// restore).
    pub fn restore(&mut self, snap: &VarSnapshot) {
        for (var, (root, bound)) in self.vars.iter_mut().zip(snap.roots.iter()) {
            var.root = root.clone();
            var.bound = *bound;
        }
    }

    fn builtin_idx(&self, id: u32) -> Option<u16> {
        let var = self.var(id);
        if !var.bound {
            return None;
        }
        match &var.root {
            Value::Fn(f) => match &f.kind {
                FnKind::Builtin { idx, .. } => Some(*idx),
                _ => None,
            },
            _ => None,
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

impl VarResolver for Env {
    fn resolve(&mut self, ns: Option<&str>, name: &str) -> Option<u32> {
        self.lookup(ns, name)
    }

    fn intern(&mut self, name: &str) -> u32 {
        let current = self.current.clone();
        self.intern_in(&current, name)
    }

    fn current_ns(&self) -> Rc<str> {
        self.current.clone()
    }

    fn var_ns_name(&self, id: u32) -> (Rc<str>, Rc<str>) {
        let var = self.var(id);
        (var.ns.clone(), var.name.clone())
    }

    fn mark_macro(&mut self, id: u32) {
        self.var_mut(id).macro_flag = true;
    }

    fn mark_dynamic(&mut self, id: u32) {
        self.var_mut(id).dynamic = true;
    }

    fn binop_of(&self, id: u32) -> Option<BinOp> {
        self.builtin_idx(id)
            .and_then(|idx| registry::BUILTINS[idx as usize].op)
    }

    fn is_not_builtin(&self, id: u32) -> bool {
        self.builtin_idx(id)
            .is_some_and(|idx| registry::BUILTINS[idx as usize].name == "not")
    }

    fn is_protocol_fn(&self, id: u32) -> bool {
        let var = self.var(id);
        var.bound
            && matches!(
                &var.root,
                Value::Fn(f) if matches!(f.kind, FnKind::Protocol { .. })
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let mut env = Env::new();
        let a = env.intern_in(USER_NS, "x");
        let b = env.intern_in(USER_NS, "x");
        assert_eq!(a, b);
    }

    #[test]
    fn test_core_fallback_resolution() {
        let mut env = Env::new();
        // `+` lives in loam.core but resolves unqualified from user.
        assert!(VarResolver::resolve(&mut env, None, "+").is_some());
        assert!(VarResolver::resolve(&mut env, Some(CORE_NS), "+").is_some());
        assert!(VarResolver::resolve(&mut env, None, "no-such-thing").is_none());
    }

    #[test]
    fn test_current_ns_shadows_core() {
        let mut env = Env::new();
        let core_plus = env.lookup(None, "+").unwrap();
        let user_plus = env.intern_in(USER_NS, "+");
        assert_ne!(core_plus, user_plus);
        assert_eq!(env.lookup(None, "+"), Some(user_plus));
    }

    #[test]
    fn test_snapshot_restore_roots() {
        let mut env = Env::new();
        let id = env.intern_in(USER_NS, "x");
        env.bind_root(id, Value::Int(1));
        let snap = env.snapshot();
        env.bind_root(id, Value::Int(2));
        env.restore(&snap);
        assert!(matches!(env.var(id).root, Value::Int(1)));
    }

    #[test]
    fn test_binop_hint() {
        let mut env = Env::new();
        let plus = VarResolver::resolve(&mut env, None, "+").unwrap();
        assert_eq!(env.binop_of(plus), Some(BinOp::Add));
        let nth = VarResolver::resolve(&mut env, None, "nth").unwrap();
        assert_eq!(env.binop_of(nth), Some(BinOp::Nth));
        let not = VarResolver::resolve(&mut env, None, "not").unwrap();
        assert!(env.is_not_builtin(not));
    }
}
