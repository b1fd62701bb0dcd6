//! Destructuring - binding pattern expansion
//!
//! Rewrites sequential (`[a b & rest :as all]`) and associative
//! (`{x :x, :keys [y], :or {y 0}, :as m}`) binding patterns into flat
//! (symbol, init) pairs with generated temporaries, so the Analyzer only
//! ever sees plain symbol bindings. Nesting recurses: `[[a b] c]` binds an
//! inner temporary for the first element and destructures it in turn.

use loam_core::diagnostics::{Diagnostic, SourcePos};
use loam_core::form::{Form, FormKind};

use crate::builder::Builder;

/// Expand one binding pattern. Appends (name, init) pairs to `out` in
/// evaluation order.
pub fn expand_binding<'a>(
    b: Builder<'a>,
    pattern: Form<'a>,
    init: Form<'a>,
    gensym: &mut u64,
    out: &mut Vec<(Form<'a>, Form<'a>)>,
    file: &std::rc::Rc<str>,
) -> Result<(), Diagnostic> {
    match pattern.kind {
        FormKind::Symbol { ns: None, .. } => {
            out.push((pattern, init));
            Ok(())
        }
        FormKind::Vector(elements) => {
            let temp = fresh(b, "vec", gensym);
            out.push((temp, init));
            expand_sequential(b, elements, temp, gensym, out, file)
        }
        FormKind::Map(kvs) => {
            let temp = fresh(b, "map", gensym);
            out.push((temp, init));
            expand_associative(b, kvs, temp, gensym, out, file)
        }
        _ => Err(Diagnostic::analysis(
            "unsupported binding form",
            pos(&pattern, file),
        )),
    }
}

fn expand_sequential<'a>(
    b: Builder<'a>,
    elements: &'a [Form<'a>],
    source: Form<'a>,
    gensym: &mut u64,
    out: &mut Vec<(Form<'a>, Form<'a>)>,
    file: &std::rc::Rc<str>,
) -> Result<(), Diagnostic> {
    let mut i = 0usize;
    let mut position = 0i64;
    while i < elements.len() {
        let element = elements[i];
        if element.is_symbol("&") {
            let rest_pattern = *elements.get(i + 1).ok_or_else(|| {
                Diagnostic::analysis("expected a binding after '&'", pos(&element, file))
            })?;
            let rest_init = b.call("nthnext", &[source, b.int(position)]);
            expand_binding(b, rest_pattern, rest_init, gensym, out, file)?;
            i += 2;
            continue;
        }
        if matches!(element.kind, FormKind::Keyword { ns: None, name: "as" }) {
            let as_name = *elements.get(i + 1).ok_or_else(|| {
                Diagnostic::analysis("expected a symbol after ':as'", pos(&element, file))
            })?;
            out.push((as_name, source));
            i += 2;
            continue;
        }
        let init = b.call("nth", &[source, b.int(position), b.nil()]);
        expand_binding(b, element, init, gensym, out, file)?;
        position += 1;
        i += 1;
    }
    Ok(())
}

fn expand_associative<'a>(
    b: Builder<'a>,
    kvs: &'a [Form<'a>],
    source: Form<'a>,
    gensym: &mut u64,
    out: &mut Vec<(Form<'a>, Form<'a>)>,
    file: &std::rc::Rc<str>,
) -> Result<(), Diagnostic> {
    // Collect :or defaults first; they apply to every key lookup below.
    let mut defaults: Vec<(&str, Form<'a>)> = Vec::new();
    for pair in kvs.chunks_exact(2) {
        if matches!(pair[0].kind, FormKind::Keyword { ns: None, name: "or" }) {
            let FormKind::Map(or_kvs) = pair[1].kind else {
                return Err(Diagnostic::analysis(
                    ":or requires a map of defaults",
                    pos(&pair[1], file),
                ));
            };
            for or_pair in or_kvs.chunks_exact(2) {
                if let FormKind::Symbol { ns: None, name } = or_pair[0].kind {
                    defaults.push((name, or_pair[1]));
                }
            }
        }
    }
    let lookup = |b: Builder<'a>, name: &str, key: Form<'a>| -> Form<'a> {
        match defaults.iter().find(|(n, _)| *n == name) {
            Some((_, default)) => b.call("get", &[source, key, *default]),
            None => b.call("get", &[source, key]),
        }
    };

    for pair in kvs.chunks_exact(2) {
        match pair[0].kind {
            FormKind::Keyword { ns: None, name: "keys" } => {
                let FormKind::Vector(names) = pair[1].kind else {
                    return Err(Diagnostic::analysis(
                        ":keys requires a vector of symbols",
                        pos(&pair[1], file),
                    ));
                };
                for name_form in names {
                    let FormKind::Symbol { ns: None, name } = name_form.kind else {
                        return Err(Diagnostic::analysis(
                            ":keys requires a vector of symbols",
                            pos(name_form, file),
                        ));
                    };
                    out.push((*name_form, lookup(b, name, b.kw(name))));
                }
            }
            FormKind::Keyword { ns: None, name: "as" } => {
                out.push((pair[1], source));
            }
            FormKind::Keyword { ns: None, name: "or" } => {}
            // `pattern key-expr` entry: bind pattern to (get source key).
            _ => {
                let name = match pair[0].kind {
                    FormKind::Symbol { ns: None, name } => name,
                    _ => "",
                };
                let init = lookup(b, name, pair[1]);
                expand_binding(b, pair[0], init, gensym, out, file)?;
            }
        }
    }
    Ok(())
}

fn fresh<'a>(b: Builder<'a>, prefix: &str, gensym: &mut u64) -> Form<'a> {
    *gensym += 1;
    b.sym(&format!("{}__{}", prefix, gensym))
}

fn pos(form: &Form<'_>, file: &std::rc::Rc<str>) -> SourcePos {
    SourcePos::new(file.clone(), form.line, form.column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Reader;
    use bumpalo::Bump;

    fn expand(src: &str, init_src: &str) -> Vec<String> {
        let arena = Bump::new();
        let file: std::rc::Rc<str> = "t.clj".into();
        let pattern_src = &*arena.alloc_str(src);
        let init_src = &*arena.alloc_str(init_src);
        let pattern = Reader::new(pattern_src, &arena, file.clone(), "user".into())
            .read_form()
            .unwrap()
            .unwrap();
        let init = Reader::new(init_src, &arena, file.clone(), "user".into())
            .read_form()
            .unwrap()
            .unwrap();
        let b = Builder::at(&arena, &pattern);
        let mut gensym = 0;
        let mut out = Vec::new();
        expand_binding(b, pattern, init, &mut gensym, &mut out, &file).unwrap();
        out.iter()
            .map(|(name, init)| format!("{} {}", name, init))
            .collect()
    }

    #[test]
    fn test_plain_symbol_passthrough() {
        assert_eq!(expand("a", "1"), vec!["a 1"]);
    }

    #[test]
    fn test_sequential_with_rest_and_as() {
        let pairs = expand("[a b & more :as all]", "coll");
        assert_eq!(pairs[0], "vec__1 coll");
        assert_eq!(pairs[1], "a (nth vec__1 0 nil)");
        assert_eq!(pairs[2], "b (nth vec__1 1 nil)");
        assert_eq!(pairs[3], "more (nthnext vec__1 2)");
        assert_eq!(pairs[4], "all vec__1");
    }

    #[test]
    fn test_associative_keys_or_as() {
        let pairs = expand("{:keys [x y] :or {y 9} :as m}", "opts");
        assert_eq!(pairs[0], "map__1 opts");
        assert_eq!(pairs[1], "x (get map__1 :x)");
        assert_eq!(pairs[2], "y (get map__1 :y 9)");
        assert_eq!(pairs[3], "m map__1");
    }

    #[test]
    fn test_associative_explicit_key() {
        let pairs = expand("{w :width}", "m");
        assert_eq!(pairs[1], "w (get map__1 :width)");
    }

    #[test]
    fn test_nested_sequential() {
        let pairs = expand("[[a b] c]", "pairs");
        assert_eq!(pairs[0], "vec__1 pairs");
        assert_eq!(pairs[1], "vec__2 (nth vec__1 0 nil)");
        assert_eq!(pairs[2], "a (nth vec__2 0 nil)");
        assert_eq!(pairs[3], "b (nth vec__2 1 nil)");
        assert_eq!(pairs[4], "c (nth vec__1 1 nil)");
    }
}
