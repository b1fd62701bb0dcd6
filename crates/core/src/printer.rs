//! Printing values
//!
//! Two modes, matching the language surface: readable (`pr`, `prn`,
//! `pr-str`) quotes strings and escapes characters; display (`print`,
//! `str`) writes them raw. Lazy sequences print as their realized form
//! only when the caller has forced them first; the runtime's printing
//! builtins do that, since this module never runs user code.

use std::fmt::Write as _;

use crate::heap::{Heap, HeapObj};
use crate::lazy::LazyState;
use crate::value::Value;

pub fn pr_str(v: &Value, heap: &Heap) -> String {
    let mut out = String::new();
    write_value(&mut out, v, heap, true);
    out
}

pub fn display_str(v: &Value, heap: &Heap) -> String {
    let mut out = String::new();
    write_value(&mut out, v, heap, false);
    out
}

fn write_items(out: &mut String, items: &[Value], heap: &Heap, readable: bool) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        write_value(out, item, heap, readable);
    }
}

fn write_value(out: &mut String, v: &Value, heap: &Heap, readable: bool) {
    match v {
        Value::Nil => out.push_str("nil"),
        Value::Bool(b) => {
            let _ = write!(out, "{}", b);
        }
        Value::Int(n) => {
            let _ = write!(out, "{}", n);
        }
        Value::Double(d) => {
            if d.is_infinite() {
                out.push_str(if *d > 0.0 { "##Inf" } else { "##-Inf" });
            } else if d.is_nan() {
                out.push_str("##NaN");
            } else if *d == d.trunc() {
                let _ = write!(out, "{:.1}", d);
            } else {
                let _ = write!(out, "{}", d);
            }
        }
        Value::Char(c) => {
            if readable {
                match c {
                    '\n' => out.push_str("\\newline"),
                    ' ' => out.push_str("\\space"),
                    '\t' => out.push_str("\\tab"),
                    '\r' => out.push_str("\\return"),
                    _ => {
                        let _ = write!(out, "\\{}", c);
                    }
                }
            } else {
                out.push(*c);
            }
        }
        Value::Str(s) => {
            if readable {
                out.push('"');
                for c in s.chars() {
                    match c {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        '\r' => out.push_str("\\r"),
                        _ => out.push(c),
                    }
                }
                out.push('"');
            } else {
                out.push_str(s);
            }
        }
        Value::Symbol(s) => {
            if let Some(ns) = &s.ns {
                let _ = write!(out, "{}/", ns);
            }
            out.push_str(&s.name);
        }
        Value::Keyword(s) => {
            out.push(':');
            if let Some(ns) = &s.ns {
                let _ = write!(out, "{}/", ns);
            }
            out.push_str(&s.name);
        }
        Value::List(l) => {
            out.push('(');
            write_items(out, &l.items, heap, readable);
            out.push(')');
        }
        Value::Vector(l) => {
            out.push('[');
            write_items(out, &l.items, heap, readable);
            out.push(']');
        }
        Value::Map(m) => {
            out.push('{');
            for (i, (k, val)) in m.entries().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, k, heap, readable);
                out.push(' ');
                write_value(out, val, heap, readable);
            }
            out.push('}');
        }
        Value::Set(s) => {
            out.push_str("#{");
            write_items(out, &s.items, heap, readable);
            out.push('}');
        }
        Value::Fn(f) => {
            let _ = write!(out, "#<{}>", f.describe());
        }
        Value::Var(id) => {
            let _ = write!(out, "#'var:{}", id);
        }
        Value::Regex(r) => {
            let _ = write!(out, "#\"{}\"", r.as_str());
        }
        Value::ExInfo(e) => {
            let _ = write!(out, "#error{{:message ");
            write_value(out, &Value::Str(e.message.clone()), heap, true);
            out.push_str(", :data ");
            write_value(out, &e.data, heap, readable);
            out.push('}');
        }
        Value::Reduced(inner) => {
            out.push_str("#<reduced ");
            write_value(out, inner, heap, readable);
            out.push('>');
        }
        Value::Obj(r) => match heap.get(r) {
            HeapObj::Atom(a) => {
                out.push_str("#atom[");
                write_value(out, &a.value, heap, readable);
                out.push(']');
            }
            HeapObj::Volatile(v) => {
                out.push_str("#volatile[");
                write_value(out, v, heap, readable);
                out.push(']');
            }
            HeapObj::Delay(d) => match &d.value {
                Some(v) => {
                    out.push_str("#delay[");
                    write_value(out, v, heap, readable);
                    out.push(']');
                }
                None => out.push_str("#delay[pending]"),
            },
            HeapObj::Promise(p) => match p {
                Some(v) => {
                    out.push_str("#promise[");
                    write_value(out, v, heap, readable);
                    out.push(']');
                }
                None => out.push_str("#promise[pending]"),
            },
            HeapObj::Lazy(state) => write_lazy(out, state, heap, readable),
            HeapObj::MultiFn(m) => {
                let _ = write!(out, "#<multifn {}>", m.name);
            }
            HeapObj::Protocol(p) => {
                let _ = write!(out, "#<protocol {}>", p.name);
            }
            HeapObj::Closure(_) => out.push_str("#<closure-env>"),
            HeapObj::Transient { .. } => out.push_str("#<transient>"),
            HeapObj::Matcher { pattern, .. } => {
                let _ = write!(out, "#<matcher {}>", pattern.as_str());
            }
            HeapObj::Wasm { name, .. } => {
                let _ = write!(out, "#<wasm-module {}>", name);
            }
        },
    }
}

/// Print the realized prefix of a lazy sequence. Chains that end in an
/// unrealized state print a trailing ellipsis; the runtime's printing
/// builtins force sequences before calling here, so user-visible output
/// never shows one.
fn write_lazy(out: &mut String, state: &LazyState, heap: &Heap, readable: bool) {
    out.push('(');
    let mut first = true;
    let mut current = state.clone();
    loop {
        match current {
            LazyState::Cons { head, tail } => {
                if !first {
                    out.push(' ');
                }
                first = false;
                write_value(out, &head, heap, readable);
                match tail {
                    Value::Obj(r) => match heap.get(&r) {
                        HeapObj::Lazy(next) => current = next.clone(),
                        _ => {
                            out.push_str(" ...");
                            break;
                        }
                    },
                    Value::Nil => break,
                    other => {
                        if let Some(items) = as_slice(&other) {
                            if !items.is_empty() {
                                out.push(' ');
                                write_items(out, items, heap, readable);
                            }
                        } else {
                            out.push_str(" ...");
                        }
                        break;
                    }
                }
            }
            LazyState::Empty => break,
            _ => {
                if !first {
                    out.push(' ');
                }
                out.push_str("...");
                break;
            }
        }
    }
    out.push(')');
}

fn as_slice(v: &Value) -> Option<&[Value]> {
    match v {
        Value::List(l) => Some(&l.items),
        Value::Vector(l) => Some(&l.items),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::PMap;
    use std::rc::Rc;

    fn empty_heap() -> Heap {
        Heap::new(false, usize::MAX)
    }

    #[test]
    fn test_readable_string_quoting() {
        let heap = empty_heap();
        let v = Value::string("a\"b\n");
        assert_eq!(pr_str(&v, &heap), "\"a\\\"b\\n\"");
        assert_eq!(display_str(&v, &heap), "a\"b\n");
    }

    #[test]
    fn test_collection_printing() {
        let heap = empty_heap();
        let v = Value::vector(vec![Value::Int(1), Value::keyword("k"), Value::Nil]);
        assert_eq!(pr_str(&v, &heap), "[1 :k nil]");
    }

    #[test]
    fn test_map_printing_preserves_insertion_order() {
        let heap = empty_heap();
        let m = PMap::from_interleaved(vec![
            Value::keyword("b"),
            Value::Int(1),
            Value::keyword("a"),
            Value::Int(2),
        ]);
        assert_eq!(pr_str(&Value::Map(Rc::new(m)), &heap), "{:b 1, :a 2}");
    }

    #[test]
    fn test_atom_printing() {
        let mut heap = Heap::new(false, usize::MAX);
        let r = heap.alloc(HeapObj::Atom(crate::heap::AtomData {
            value: Value::Int(9),
            validator: None,
            watches: Vec::new(),
        }));
        assert_eq!(pr_str(&Value::Obj(r), &heap), "#atom[9]");
    }
}
