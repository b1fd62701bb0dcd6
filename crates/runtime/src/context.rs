//! Runtime context and configuration
//!
//! One context owns everything a single evaluation thread needs: the GC
//! heap, the environment, the tree-walker's binding stack, the dynamic
//! binding frames, and the REPL history slots. The collector's root set
//! is exactly what this module enumerates.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::debug;

use loam_core::heap::{Heap, DEFAULT_GC_THRESHOLD};
use loam_core::value::Value;

use crate::env::Env;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    TreeWalk,
    Bytecode,
    /// Run both backends and verify structural equality of the results.
    Compare,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tree-walk" | "treewalk" => Ok(Backend::TreeWalk),
            "bytecode" | "vm" => Ok(Backend::Bytecode),
            "compare" => Ok(Backend::Compare),
            _ => Err(format!("unknown backend '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileStage {
    Reader,
    Analyzer,
    Engine,
    Realize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RuntimeConfig {
    pub backend: Backend,
    pub gc_enabled: bool,
    /// Byte pressure below which collection cycles are skipped.
    pub gc_threshold: usize,
    /// Directories searched by require / load-file, in order.
    pub classpath: Vec<PathBuf>,
    pub profile: Vec<ProfileStage>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            backend: Backend::Bytecode,
            gc_enabled: true,
            gc_threshold: DEFAULT_GC_THRESHOLD,
            classpath: vec![PathBuf::from(".")],
            profile: Vec::new(),
        }
    }
}

pub struct RuntimeContext {
    pub heap: Heap,
    pub env: Env,
    /// Tree-walker binding stack; also the universal temp-root stack.
    pub stack: Vec<Value>,
    /// Base of the current tree-walk frame within `stack`.
    pub frame_base: usize,
    /// Dynamic binding frames, strict LIFO of (var id, value) groups.
    pub dyn_frames: Vec<Vec<(u32, Value)>>,
    /// REPL history: *1 *2 *3 *e.
    pub history: [Value; 4],
    /// Depth of native (Rust) frames holding unrooted values; collection
    /// only runs when this is zero, at safe points and expression
    /// boundaries.
    pub native_depth: u32,
    pub config: RuntimeConfig,
    /// Namespaces already loaded by require.
    pub loaded: HashSet<String>,
    /// Counter backing `gensym`.
    pub gensym_counter: u64,
    /// Embedded-wasm bridge, installed by the front end when present.
    pub wasm_host: Option<Box<dyn crate::wasm::WasmHost>>,
}

impl RuntimeContext {
    pub fn new(config: RuntimeConfig) -> Self {
        RuntimeContext {
            heap: Heap::new(config.gc_enabled, config.gc_threshold),
            env: Env::new(),
            stack: Vec::new(),
            frame_base: 0,
            dyn_frames: Vec::new(),
            history: [Value::Nil, Value::Nil, Value::Nil, Value::Nil],
            native_depth: 0,
            config,
            loaded: HashSet::new(),
            gensym_counter: 0,
            wasm_host: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RuntimeConfig::default())
    }

    /// The innermost dynamic binding of a var, if any frame holds one.
    pub fn dynamic_lookup(&self, id: u32) -> Option<&Value> {
        self.dyn_frames
            .iter()
            .rev()
            .find_map(|frame| frame.iter().rev().find(|(v, _)| *v == id))
            .map(|(_, value)| value)
    }

    /// Dynamic frame first, then the root.
    pub fn deref_var(&self, id: u32) -> Result<Value, loam_core::diagnostics::Diagnostic> {
        if let Some(v) = self.dynamic_lookup(id) {
            return Ok(v.clone());
        }
        let var = self.env.var(id);
        if !var.bound {
            return Err(loam_core::diagnostics::Diagnostic::runtime(format!(
                "unbound var #'{}/{}",
                var.ns, var.name
            )));
        }
        Ok(var.root.clone())
    }

    /// Run a collection if pressure warrants one and no native frame
    /// holds unrooted values. `extra_roots` lets the VM contribute its
    /// value stack.
    pub fn maybe_gc(&mut self, extra_roots: &[&[Value]]) {
        if self.native_depth != 0 || !self.heap.should_collect() {
            return;
        }
        self.gc_now(extra_roots);
    }

    /// Unconditional collection (expression boundaries).
    pub fn gc_now(&mut self, extra_roots: &[&[Value]]) {
        let Self {
            heap,
            env,
            stack,
            dyn_frames,
            history,
            ..
        } = self;
        heap.collect(&mut |sink| {
            for var in &env.vars {
                if var.bound {
                    sink(&var.root);
                }
                if let Some(v) = &var.validator {
                    sink(v);
                }
                if let Some(m) = &var.meta {
                    sink(m);
                }
                for (k, w) in &var.watches {
                    sink(k);
                    sink(w);
                }
            }
            for v in stack.iter() {
                sink(v);
            }
            for frame in dyn_frames.iter() {
                for (_, v) in frame {
                    sink(v);
                }
            }
            for v in history.iter() {
                sink(v);
            }
            for roots in extra_roots {
                for v in *roots {
                    sink(v);
                }
            }
        });
        debug!(
            cycles = self.heap.stats.cycles,
            live = self.heap.stats.live_objects,
            "gc cycle"
        );
    }

    /// Record a top-level result in the *1/*2/*3 history slots and their
    /// vars.
    pub fn push_history(&mut self, v: Value) {
        self.history[2] = std::mem::replace(&mut self.history[1], Value::Nil);
        self.history[1] = std::mem::replace(&mut self.history[0], Value::Nil);
        self.history[0] = v;
        for (name, i) in [("*1", 0), ("*2", 1), ("*3", 2)] {
            let id = self.env.intern_in(crate::env::CORE_NS, name);
            self.env.bind_root(id, self.history[i].clone());
        }
    }

    pub fn record_error(&mut self, v: Value) {
        self.history[3] = v.clone();
        let id = self.env.intern_in(crate::env::CORE_NS, "*e");
        self.env.bind_root(id, v);
    }
}

/// Run `f` with the native-frame depth raised, so safe points inside it
/// skip collection (Rust locals are not enumerable roots).
pub fn with_native<T>(
    ctx: &mut RuntimeContext,
    f: impl FnOnce(&mut RuntimeContext) -> T,
) -> T {
    ctx.native_depth += 1;
    let result = f(ctx);
    ctx.native_depth -= 1;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_lookup_is_lifo() {
        let mut ctx = RuntimeContext::with_defaults();
        let id = ctx.env.intern_in("user", "*x*");
        ctx.dyn_frames.push(vec![(id, Value::Int(1))]);
        ctx.dyn_frames.push(vec![(id, Value::Int(2))]);
        assert!(matches!(ctx.dynamic_lookup(id), Some(Value::Int(2))));
        ctx.dyn_frames.pop();
        assert!(matches!(ctx.dynamic_lookup(id), Some(Value::Int(1))));
    }

    #[test]
    fn test_deref_unbound_var_errors() {
        let mut ctx = RuntimeContext::with_defaults();
        let id = ctx.env.intern_in("user", "nope");
        assert!(ctx.deref_var(id).is_err());
        ctx.env.bind_root(id, Value::Int(5));
        assert!(matches!(ctx.deref_var(id), Ok(Value::Int(5))));
    }

    #[test]
    fn test_history_rotation() {
        let mut ctx = RuntimeContext::with_defaults();
        ctx.push_history(Value::Int(1));
        ctx.push_history(Value::Int(2));
        ctx.push_history(Value::Int(3));
        assert!(matches!(ctx.history[0], Value::Int(3)));
        assert!(matches!(ctx.history[1], Value::Int(2)));
        assert!(matches!(ctx.history[2], Value::Int(1)));
    }
}
