//! Heap - garbage-collected storage for identity objects
//!
//! Every mutable or identity-bearing runtime object (atoms, volatiles,
//! delays, promises, lazy sequences, multimethods, protocols, transients,
//! regex matchers, wasm module handles, closure environments) is allocated
//! here. References are `ObjRef` handles: a shared cell holding the
//! object's current slot index. Two semispaces are slot vectors; a
//! collection cycle runs three phases:
//!
//! 1. Mark: walk every root value, recording reachable slots. Tracing is
//!    cycle-safe because an already-marked slot is skipped before its
//!    children are enqueued.
//! 2. Copy: move each live object into to-space in slot order, recording
//!    its forwarding index.
//! 3. Fixup: write each forwarding index through the object's handle cell,
//!    which atomically repoints every reference in the program. From-space
//!    is then freed in a single vector drop.
//!
//! Dead objects are dropped with from-space; their payload Values release
//! their `Rc`s there, which is also what breaks `letfn` closure cycles
//! (the cycle runs through heap slots, never through `Rc`s alone).
//!
//! The persistent infrastructure (var tables, namespaces, chunks) is never
//! traced; only the Values it holds are, via root enumeration by the
//! runtime.

use std::cell::Cell;
use std::collections::HashMap;
use std::mem::size_of;
use std::rc::Rc;

use crate::lazy::LazyState;
use crate::value::Value;

/// Handle to a heap object. Identity is handle identity: cloning an ObjRef
/// aliases the same object, and a collection updates every alias at once
/// through the shared cell.
#[derive(Clone)]
pub struct ObjRef(Rc<Cell<u32>>);

impl ObjRef {
    fn new(slot: u32) -> Self {
        ObjRef(Rc::new(Cell::new(slot)))
    }

    pub fn slot(&self) -> usize {
        self.0.get() as usize
    }

    /// Reference identity (not content equality).
    pub fn same(&self, other: &ObjRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Stable token for identity hashing.
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

impl std::fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjRef#{}", self.0.get())
    }
}

#[derive(Debug, Clone)]
pub struct AtomData {
    pub value: Value,
    pub validator: Option<Value>,
    /// (key, watch-fn) in registration order.
    pub watches: Vec<(Value, Value)>,
}

#[derive(Debug, Clone)]
pub struct DelayData {
    /// Present until first force.
    pub thunk: Option<Value>,
    pub value: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct MultiFnData {
    pub name: Rc<str>,
    pub dispatch: Value,
    /// Insertion-ordered (dispatch value, method fn) pairs.
    pub methods: Vec<(Value, Value)>,
    /// (winner, loser) preference edges.
    pub prefers: Vec<(Value, Value)>,
}

#[derive(Debug, Clone)]
pub struct ProtocolData {
    pub name: Rc<str>,
    pub method_names: Vec<Rc<str>>,
    /// type name -> method name -> implementation fn.
    pub impls: HashMap<Rc<str>, HashMap<Rc<str>, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    Vector,
    Set,
    /// Items interleaved key/value.
    Map,
}

#[derive(Debug, Clone)]
pub enum HeapObj {
    Atom(AtomData),
    Volatile(Value),
    Delay(DelayData),
    Promise(Option<Value>),
    Lazy(LazyState),
    MultiFn(MultiFnData),
    Protocol(ProtocolData),
    /// Captured values of a closure; index-addressed so a letfn fixup is a
    /// single-slot write.
    Closure(Vec<Value>),
    Transient {
        kind: TransientKind,
        items: Vec<Value>,
    },
    Matcher {
        pattern: Rc<regex::Regex>,
        haystack: Rc<str>,
        pos: usize,
    },
    /// Opaque embedded-wasm module handle; the bridge behind it is an
    /// external collaborator.
    Wasm {
        name: Rc<str>,
        exports: Vec<Rc<str>>,
    },
}

impl HeapObj {
    pub fn type_name(&self) -> &'static str {
        match self {
            HeapObj::Atom(_) => "Atom",
            HeapObj::Volatile(_) => "Volatile",
            HeapObj::Delay(_) => "Delay",
            HeapObj::Promise(_) => "Promise",
            HeapObj::Lazy(_) => "LazySeq",
            HeapObj::MultiFn(_) => "MultiFn",
            HeapObj::Protocol(_) => "Protocol",
            HeapObj::Closure(_) => "Closure",
            HeapObj::Transient { .. } => "Transient",
            HeapObj::Matcher { .. } => "Matcher",
            HeapObj::Wasm { .. } => "WasmModule",
        }
    }

    /// Visit every value directly held by this object.
    pub fn for_each_value(&self, visit: &mut dyn FnMut(&Value)) {
        match self {
            HeapObj::Atom(a) => {
                visit(&a.value);
                if let Some(v) = &a.validator {
                    visit(v);
                }
                for (k, w) in &a.watches {
                    visit(k);
                    visit(w);
                }
            }
            HeapObj::Volatile(v) => visit(v),
            HeapObj::Delay(d) => {
                if let Some(t) = &d.thunk {
                    visit(t);
                }
                if let Some(v) = &d.value {
                    visit(v);
                }
            }
            HeapObj::Promise(p) => {
                if let Some(v) = p {
                    visit(v);
                }
            }
            HeapObj::Lazy(state) => state.for_each_value(visit),
            HeapObj::MultiFn(m) => {
                visit(&m.dispatch);
                for (k, f) in &m.methods {
                    visit(k);
                    visit(f);
                }
                for (a, b) in &m.prefers {
                    visit(a);
                    visit(b);
                }
            }
            HeapObj::Protocol(p) => {
                for methods in p.impls.values() {
                    for f in methods.values() {
                        visit(f);
                    }
                }
            }
            HeapObj::Closure(captures) => {
                for v in captures {
                    visit(v);
                }
            }
            HeapObj::Transient { items, .. } => {
                for v in items {
                    visit(v);
                }
            }
            HeapObj::Matcher { .. } | HeapObj::Wasm { .. } => {}
        }
    }

    fn size_estimate(&self) -> usize {
        let payload = match self {
            HeapObj::Atom(a) => (a.watches.len() * 2 + 2) * size_of::<Value>(),
            HeapObj::Lazy(LazyState::Concat { sources, .. }) => sources.len() * size_of::<Value>(),
            HeapObj::MultiFn(m) => (m.methods.len() + m.prefers.len()) * 2 * size_of::<Value>(),
            HeapObj::Closure(captures) => captures.len() * size_of::<Value>(),
            HeapObj::Transient { items, .. } => items.len() * size_of::<Value>(),
            _ => 0,
        };
        size_of::<HeapObj>() + payload
    }
}

struct Slot {
    obj: HeapObj,
    /// Alias of every outstanding handle; the fixup phase writes the
    /// forwarding index through it.
    handle: ObjRef,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GcStats {
    pub cycles: u64,
    pub live_objects: usize,
    pub collected_objects: u64,
}

/// The GC heap. `enabled: false` turns every collection request into a
/// no-op (allocation still works), which the compare harness uses to keep
/// backends deterministic while diffing.
pub struct Heap {
    slots: Vec<Option<Slot>>,
    bytes: usize,
    threshold: usize,
    enabled: bool,
    pub stats: GcStats,
}

pub const DEFAULT_GC_THRESHOLD: usize = 4 * 1024 * 1024;

impl Heap {
    pub fn new(enabled: bool, threshold: usize) -> Self {
        Heap {
            slots: Vec::new(),
            bytes: 0,
            threshold,
            enabled,
            stats: GcStats::default(),
        }
    }

    pub fn alloc(&mut self, obj: HeapObj) -> ObjRef {
        self.bytes += obj.size_estimate();
        let slot = self.slots.len() as u32;
        let handle = ObjRef::new(slot);
        self.slots.push(Some(Slot {
            obj,
            handle: handle.clone(),
        }));
        handle
    }

    pub fn get(&self, r: &ObjRef) -> &HeapObj {
        &self
            .slots
            .get(r.slot())
            .and_then(|s| s.as_ref())
            .expect("heap handle points at a collected slot")
            .obj
    }

    pub fn get_mut(&mut self, r: &ObjRef) -> &mut HeapObj {
        &mut self
            .slots
            .get_mut(r.slot())
            .and_then(|s| s.as_mut())
            .expect("heap handle points at a collected slot")
            .obj
    }

    pub fn type_name(&self, r: &ObjRef) -> &'static str {
        self.get(r).type_name()
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether allocation pressure warrants a cycle at the next safe
    /// point. Below the threshold, cycles are skipped entirely.
    pub fn should_collect(&self) -> bool {
        self.enabled && self.bytes >= self.threshold
    }

    /// Run one full collection. `for_each_root` must call the sink with
    /// every root value: var roots, evaluation stacks, dynamic binding
    /// frames, in-flight thrown values, and the REPL history slots.
    pub fn collect(&mut self, for_each_root: &mut dyn FnMut(&mut dyn FnMut(&Value))) {
        let n = self.slots.len();

        // Mark.
        let mut marked = vec![false; n];
        let mut queue: Vec<usize> = Vec::new();
        {
            let mut sink = |v: &Value| mark_value(v, &mut marked, &mut queue);
            for_each_root(&mut sink);
        }
        while let Some(at) = queue.pop() {
            let slot = self.slots[at]
                .as_ref()
                .expect("marked slot missing during trace");
            let mut pending: Vec<usize> = Vec::new();
            slot.obj
                .for_each_value(&mut |v| mark_value(v, &mut marked, &mut pending));
            queue.extend(pending);
        }

        // Copy live objects into to-space in slot order, building the
        // forwarding table.
        let mut to_space: Vec<Option<Slot>> = Vec::new();
        let mut forwarding: Vec<Option<u32>> = vec![None; n];
        let mut bytes = 0usize;
        for (at, live) in marked.iter().enumerate() {
            if *live {
                let slot = self.slots[at].take().expect("live slot already moved");
                bytes += slot.obj.size_estimate();
                forwarding[at] = Some(to_space.len() as u32);
                to_space.push(Some(slot));
            }
        }

        // Fixup: repoint every outstanding handle through its cell, then
        // free from-space in one operation.
        for target in forwarding.iter().flatten() {
            let slot = to_space[*target as usize].as_ref().unwrap();
            slot.handle.0.set(*target);
        }
        let collected = self
            .slots
            .iter()
            .filter(|s| s.is_some())
            .count();
        self.slots = to_space;
        self.bytes = bytes;
        self.stats.cycles += 1;
        self.stats.live_objects = self.slots.len();
        self.stats.collected_objects += collected as u64;
        // Grow the threshold if live data alone exceeds it, so a large
        // working set does not trigger a cycle at every safe point.
        if self.bytes >= self.threshold {
            self.threshold = self.bytes * 2;
        }
    }
}

/// Walk a value tree, marking every reachable heap slot. Already-marked
/// slots are skipped before their children are enqueued, which is what
/// makes tracing through cyclic closure environments terminate.
fn mark_value(v: &Value, marked: &mut [bool], queue: &mut Vec<usize>) {
    match v {
        Value::Obj(r) => {
            let at = r.slot();
            if !marked[at] {
                marked[at] = true;
                queue.push(at);
            }
        }
        Value::List(l) => {
            for item in l.items.iter() {
                mark_value(item, marked, queue);
            }
            if let Some(m) = &l.meta {
                mark_value(m, marked, queue);
            }
        }
        Value::Vector(l) => {
            for item in l.items.iter() {
                mark_value(item, marked, queue);
            }
            if let Some(m) = &l.meta {
                mark_value(m, marked, queue);
            }
        }
        Value::Map(m) => {
            for (k, val) in m.entries() {
                mark_value(k, marked, queue);
                mark_value(val, marked, queue);
            }
            if let Some(meta) = &m.meta {
                mark_value(meta, marked, queue);
            }
        }
        Value::Set(s) => {
            for item in s.items.iter() {
                mark_value(item, marked, queue);
            }
            if let Some(m) = &s.meta {
                mark_value(m, marked, queue);
            }
        }
        Value::Fn(f) => {
            if let crate::value::FnKind::User { env: Some(env), .. } = &f.kind {
                let at = env.slot();
                if !marked[at] {
                    marked[at] = true;
                    queue.push(at);
                }
            }
            if let crate::value::FnKind::Protocol { proto, .. } = &f.kind {
                let at = proto.slot();
                if !marked[at] {
                    marked[at] = true;
                    queue.push(at);
                }
            }
            if let Some(m) = &f.meta {
                mark_value(m, marked, queue);
            }
        }
        Value::ExInfo(e) => mark_value(&e.data, marked, queue),
        Value::Reduced(inner) => mark_value(inner, marked, queue),
        Value::Symbol(s) | Value::Keyword(s) => {
            if let Some(m) = &s.meta {
                mark_value(m, marked, queue);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atom(v: Value) -> HeapObj {
        HeapObj::Atom(AtomData {
            value: v,
            validator: None,
            watches: Vec::new(),
        })
    }

    #[test]
    fn test_alloc_and_access() {
        let mut heap = Heap::new(true, 1024);
        let r = heap.alloc(atom(Value::Int(7)));
        match heap.get(&r) {
            HeapObj::Atom(a) => assert!(matches!(a.value, Value::Int(7))),
            _ => panic!("wrong object"),
        }
    }

    #[test]
    fn test_collect_keeps_rooted_drops_garbage() {
        let mut heap = Heap::new(true, 0);
        let live = heap.alloc(atom(Value::Int(1)));
        let _dead = heap.alloc(atom(Value::Int(2)));
        let root = Value::Obj(live.clone());
        heap.collect(&mut |sink| sink(&root));
        assert_eq!(heap.live_count(), 1);
        match heap.get(&live) {
            HeapObj::Atom(a) => assert!(matches!(a.value, Value::Int(1))),
            _ => panic!("wrong object"),
        }
    }

    #[test]
    fn test_collect_traces_through_collections() {
        let mut heap = Heap::new(true, 0);
        let inner = heap.alloc(HeapObj::Volatile(Value::Int(5)));
        let root = Value::vector(vec![Value::Obj(inner.clone())]);
        heap.collect(&mut |sink| sink(&root));
        assert_eq!(heap.live_count(), 1);
        assert!(matches!(heap.get(&inner), HeapObj::Volatile(Value::Int(5))));
    }

    #[test]
    fn test_collect_handles_cycles() {
        let mut heap = Heap::new(true, 0);
        let a = heap.alloc(HeapObj::Closure(vec![Value::Nil]));
        let b = heap.alloc(HeapObj::Closure(vec![Value::Obj(a.clone())]));
        // Close the loop: a's capture points at b.
        if let HeapObj::Closure(captures) = heap.get_mut(&a) {
            captures[0] = Value::Obj(b.clone());
        }
        let root = Value::Obj(a.clone());
        heap.collect(&mut |sink| sink(&root));
        assert_eq!(heap.live_count(), 2);

        // Unrooted, the cycle is collected despite the mutual references.
        heap.collect(&mut |_sink| {});
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn test_handles_follow_compaction() {
        let mut heap = Heap::new(true, 0);
        let _dead1 = heap.alloc(atom(Value::Int(0)));
        let _dead2 = heap.alloc(atom(Value::Int(0)));
        let live = heap.alloc(HeapObj::Volatile(Value::keyword("kept")));
        assert_eq!(live.slot(), 2);
        let root = Value::Obj(live.clone());
        heap.collect(&mut |sink| sink(&root));
        // The survivor was copied to the front of to-space and its handle
        // was forwarded.
        assert_eq!(live.slot(), 0);
        assert!(matches!(heap.get(&live), HeapObj::Volatile(_)));
    }

    #[test]
    fn test_threshold_gates_collection() {
        let heap = Heap::new(true, usize::MAX);
        assert!(!heap.should_collect());
        let heap = Heap::new(false, 0);
        assert!(!heap.should_collect());
    }
}
