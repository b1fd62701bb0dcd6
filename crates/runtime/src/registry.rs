//! Builtin registration table
//!
//! One static table binds every builtin name to its implementation and
//! declared arity. `install` interns the whole table into the core
//! namespace; duplicate names are rejected there (and by a test), since
//! a second registration would silently shadow the first. Entries for
//! the hot primitives carry the specialized opcode hint the analyzer and
//! compiler use in place of generic calls.

use loam_core::node::BinOp;
use loam_core::value::{BuiltinArity, FnKind, Function, Value};
use std::rc::Rc;

use crate::builtins::{
    arithmetic, atoms, collections, core_ops, io, multimethods, protocols, regex_ops, seqs, vars,
    wasm_ops,
};
use crate::context::RuntimeContext;
use crate::env::{Env, CORE_NS};
use crate::error::EvalResult;

pub type BuiltinFn = fn(&mut RuntimeContext, &[Value]) -> EvalResult<Value>;

pub struct BuiltinDef {
    pub name: &'static str,
    pub arity: BuiltinArity,
    pub f: BuiltinFn,
    /// Specialized opcode this builtin compiles to at two-argument call
    /// sites.
    pub op: Option<BinOp>,
}

const fn fixed(name: &'static str, n: u8, f: BuiltinFn) -> BuiltinDef {
    BuiltinDef {
        name,
        arity: BuiltinArity::Fixed(n),
        f,
        op: None,
    }
}

const fn at_least(name: &'static str, n: u8, f: BuiltinFn) -> BuiltinDef {
    BuiltinDef {
        name,
        arity: BuiltinArity::AtLeast(n),
        f,
        op: None,
    }
}

const fn hot(name: &'static str, n: u8, f: BuiltinFn, op: BinOp) -> BuiltinDef {
    BuiltinDef {
        name,
        arity: BuiltinArity::AtLeast(n),
        f,
        op: Some(op),
    }
}

pub static BUILTINS: &[BuiltinDef] = &[
    // Arithmetic
    hot("+", 0, arithmetic::add, BinOp::Add),
    hot("-", 1, arithmetic::sub, BinOp::Sub),
    hot("*", 0, arithmetic::mul, BinOp::Mul),
    hot("/", 1, arithmetic::div, BinOp::Div),
    hot("<", 1, arithmetic::lt, BinOp::Lt),
    hot(">", 1, arithmetic::gt, BinOp::Gt),
    hot("<=", 1, arithmetic::le, BinOp::Le),
    hot(">=", 1, arithmetic::ge, BinOp::Ge),
    fixed("inc", 1, arithmetic::inc),
    fixed("dec", 1, arithmetic::dec),
    fixed("rem", 2, arithmetic::rem_op),
    fixed("quot", 2, arithmetic::quot),
    fixed("mod", 2, arithmetic::mod_op),
    at_least("min", 1, arithmetic::min_op),
    at_least("max", 1, arithmetic::max_op),
    fixed("abs", 1, arithmetic::abs),
    fixed("zero?", 1, arithmetic::zero_p),
    fixed("pos?", 1, arithmetic::pos_p),
    fixed("neg?", 1, arithmetic::neg_p),
    fixed("odd?", 1, arithmetic::odd_p),
    fixed("even?", 1, arithmetic::even_p),
    fixed("number?", 1, arithmetic::number_p),
    fixed("integer?", 1, arithmetic::integer_p),
    fixed("double?", 1, arithmetic::double_p),
    fixed("float?", 1, arithmetic::double_p),
    // Equality and core predicates
    hot("=", 1, core_ops::eq, BinOp::Eq),
    at_least("not=", 1, core_ops::not_eq),
    fixed("not", 1, core_ops::not),
    fixed("nil?", 1, core_ops::nil_p),
    fixed("some?", 1, core_ops::some_p),
    fixed("true?", 1, core_ops::true_p),
    fixed("false?", 1, core_ops::false_p),
    fixed("boolean", 1, core_ops::boolean),
    fixed("identity", 1, core_ops::identity),
    fixed("identical?", 2, core_ops::identical_p),
    fixed("type", 1, core_ops::type_of),
    fixed("string?", 1, core_ops::string_p),
    fixed("keyword?", 1, core_ops::keyword_p),
    fixed("symbol?", 1, core_ops::symbol_p),
    fixed("fn?", 1, core_ops::fn_p),
    fixed("map?", 1, core_ops::map_p),
    fixed("vector?", 1, core_ops::vector_p),
    fixed("set?", 1, core_ops::set_p),
    fixed("list?", 1, core_ops::list_p),
    fixed("char?", 1, core_ops::char_p),
    fixed("seq?", 1, seqs::seq_p),
    fixed("complement", 1, seqs::complement),
    // Names, symbols, metadata
    fixed("name", 1, core_ops::name),
    fixed("namespace", 1, core_ops::namespace),
    at_least("keyword", 1, core_ops::keyword),
    at_least("symbol", 1, core_ops::symbol),
    at_least("gensym", 0, core_ops::gensym),
    fixed("meta", 1, core_ops::meta),
    fixed("with-meta", 2, core_ops::with_meta),
    at_least("vary-meta", 2, core_ops::vary_meta),
    // Strings and printing
    at_least("str", 0, core_ops::str_op),
    at_least("pr-str", 0, core_ops::pr_str),
    at_least("subs", 2, io::subs),
    at_least("println", 0, io::println),
    at_least("print", 0, io::print),
    at_least("prn", 0, io::prn),
    at_least("pr", 0, io::pr),
    fixed("newline", 0, io::newline),
    // Exceptions
    fixed("ex-info", 2, core_ops::ex_info),
    fixed("ex-message", 1, core_ops::ex_message),
    fixed("ex-data", 1, core_ops::ex_data),
    // Application
    at_least("apply", 2, core_ops::apply),
    // References
    fixed("deref", 1, core_ops::deref),
    fixed("atom", 1, atoms::atom),
    fixed("reset!", 2, atoms::reset),
    at_least("swap!", 2, atoms::swap),
    fixed("compare-and-set!", 3, atoms::compare_and_set),
    fixed("reset-vals!", 2, atoms::reset_vals),
    at_least("swap-vals!", 2, atoms::swap_vals),
    fixed("add-watch", 3, atoms::add_watch),
    fixed("remove-watch", 2, atoms::remove_watch),
    fixed("set-validator!", 2, atoms::set_validator),
    fixed("get-validator", 1, atoms::get_validator),
    fixed("volatile!", 1, core_ops::volatile),
    fixed("vreset!", 2, core_ops::vreset),
    at_least("vswap!", 2, core_ops::vswap),
    fixed("delay*", 1, core_ops::delay_star),
    fixed("force", 1, core_ops::force),
    fixed("promise", 0, core_ops::promise),
    fixed("deliver", 2, core_ops::deliver),
    fixed("reduced", 1, core_ops::reduced),
    fixed("reduced?", 1, core_ops::reduced_p),
    fixed("realized?", 1, core_ops::realized_p),
    // Collections
    at_least("list", 0, collections::list),
    at_least("vector", 0, collections::vector),
    fixed("vec", 1, collections::vec),
    fixed("set", 1, collections::set),
    at_least("hash-map", 0, collections::hash_map),
    at_least("hash-set", 0, collections::hash_set),
    at_least("conj", 1, collections::conj),
    at_least("assoc", 3, collections::assoc),
    at_least("dissoc", 1, collections::dissoc),
    at_least("disj", 1, collections::disj),
    at_least("get", 2, collections::get),
    fixed("contains?", 2, collections::contains_p),
    hot("nth", 2, collections::nth, BinOp::Nth),
    fixed("count", 1, collections::count),
    fixed("empty?", 1, collections::empty_p),
    fixed("empty", 1, collections::empty),
    fixed("keys", 1, collections::keys),
    fixed("vals", 1, collections::vals),
    fixed("into", 2, collections::into),
    fixed("reverse", 1, collections::reverse),
    fixed("last", 1, collections::last),
    fixed("butlast", 1, collections::butlast),
    fixed("peek", 1, collections::peek),
    fixed("pop", 1, collections::pop),
    fixed("transient", 1, collections::transient),
    fixed("persistent!", 1, collections::persistent_bang),
    fixed("conj!", 2, collections::conj_bang),
    fixed("assoc!", 3, collections::assoc_bang),
    // Sequences
    fixed("map", 2, seqs::map),
    fixed("filter", 2, seqs::filter),
    fixed("remove", 2, seqs::remove),
    fixed("mapcat", 2, seqs::mapcat),
    fixed("take-while", 2, seqs::take_while),
    fixed("drop-while", 2, seqs::drop_while),
    fixed("map-indexed", 2, seqs::map_indexed),
    fixed("take", 2, seqs::take),
    fixed("drop", 2, seqs::drop),
    at_least("range", 0, seqs::range),
    fixed("iterate", 2, seqs::iterate),
    at_least("repeat", 1, seqs::repeat),
    fixed("cycle", 1, seqs::cycle),
    at_least("concat", 0, seqs::concat),
    fixed("lazy-seq*", 1, seqs::lazy_seq_star),
    fixed("cons", 2, seqs::cons),
    fixed("first", 1, seqs::first),
    fixed("second", 1, seqs::second),
    fixed("rest", 1, seqs::rest),
    fixed("next", 1, seqs::next_op),
    fixed("nthnext", 2, seqs::nthnext),
    fixed("seq", 1, seqs::seq),
    at_least("reduce", 2, seqs::reduce),
    fixed("doall", 1, seqs::doall),
    fixed("dorun", 1, seqs::dorun),
    // Vars and dynamic bindings
    fixed("var-get", 1, vars::var_get),
    at_least("bound?", 1, vars::bound_p),
    at_least("alter-var-root", 2, vars::alter_var_root),
    fixed("push-bindings*", 1, vars::push_bindings),
    fixed("pop-bindings*", 0, vars::pop_bindings),
    fixed("var-root*", 1, vars::var_root),
    fixed("var-bind-root*", 2, vars::var_bind_root),
    fixed("in-ns*", 1, vars::in_ns),
    // Multimethods
    fixed("prefer-method", 3, multimethods::prefer_method),
    fixed("remove-method", 2, multimethods::remove_method),
    fixed("get-method", 2, multimethods::get_method),
    fixed("methods", 1, multimethods::methods),
    // Protocols
    fixed("protocol*", 2, protocols::protocol_star),
    fixed("protocol-method*", 2, protocols::protocol_method_star),
    fixed("extend*", 3, protocols::extend_star),
    fixed("satisfies?", 2, protocols::satisfies_p),
    fixed("extends?", 2, protocols::extends_p),
    // Regex
    fixed("re-pattern", 1, regex_ops::re_pattern),
    fixed("re-matches", 2, regex_ops::re_matches),
    at_least("re-find", 1, regex_ops::re_find),
    fixed("re-seq", 2, regex_ops::re_seq),
    fixed("re-matcher", 2, regex_ops::re_matcher),
    // Loading
    fixed("slurp", 1, io::slurp),
    fixed("load-file", 1, io::load_file),
    at_least("require", 1, io::require),
    // Wasm interop surface
    fixed("wasm-load", 1, wasm_ops::wasm_load),
    fixed("wasm-exports", 1, wasm_ops::wasm_exports),
    at_least("wasm-invoke", 2, wasm_ops::wasm_invoke),
];

/// Intern every builtin into the core namespace. Panics on a duplicate
/// name: that is a build-time mistake in the table, not a runtime
/// condition.
pub fn install(env: &mut Env) {
    let mut seen = std::collections::HashSet::new();
    for (idx, def) in BUILTINS.iter().enumerate() {
        assert!(
            seen.insert(def.name),
            "duplicate builtin registration: {}",
            def.name
        );
        let id = env.intern_in(CORE_NS, def.name);
        env.bind_root(
            id,
            Value::Fn(Rc::new(Function {
                name: Some(def.name.into()),
                kind: FnKind::Builtin {
                    idx: idx as u16,
                    arity: def.arity,
                },
                meta: None,
            })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_duplicate_names() {
        let mut seen = std::collections::HashSet::new();
        for def in BUILTINS {
            assert!(seen.insert(def.name), "duplicate builtin: {}", def.name);
        }
    }

    #[test]
    fn test_every_entry_has_concrete_arity() {
        for def in BUILTINS {
            match def.arity {
                BuiltinArity::Fixed(_) | BuiltinArity::AtLeast(_) => {}
            }
        }
    }

    #[test]
    fn test_hot_primitives_carry_opcode_hints() {
        for name in ["+", "-", "<", ">", "=", "nth"] {
            let def = BUILTINS.iter().find(|d| d.name == name).unwrap();
            assert!(def.op.is_some(), "{} should have an opcode hint", name);
        }
        let not_def = BUILTINS.iter().find(|d| d.name == "not").unwrap();
        assert!(not_def.op.is_none());
    }

    #[test]
    fn test_install_binds_all() {
        let env = Env::new();
        let core = env.namespaces.get(CORE_NS).unwrap();
        assert_eq!(core.mappings.len(), BUILTINS.len());
    }
}
