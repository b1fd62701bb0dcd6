//! Built-in macro expansion
//!
//! Expands the core macro set over Forms, before analysis. Each expansion
//! produces plain special forms and calls; the Analyzer re-enters the
//! expansion for whatever comes out, so expansion runs to a fixed point
//! without any bookkeeping here.
//!
//! Temporaries introduced by expansions use a `name__N` scheme from the
//! analyzer's gensym counter, so they can never collide with user symbols
//! that survive reading (`__` plus a counter is not valid user input from
//! these expansions' point of view).

use bumpalo::Bump;
use loam_core::diagnostics::{Diagnostic, SourcePos};
use loam_core::form::{Form, FormKind};

use crate::builder::Builder;

fn pos(form: &Form<'_>, file: &std::rc::Rc<str>) -> SourcePos {
    SourcePos::new(file.clone(), form.line, form.column)
}

fn err(msg: impl Into<String>, form: &Form<'_>, file: &std::rc::Rc<str>) -> Diagnostic {
    Diagnostic::analysis(msg, pos(form, file))
}

fn fresh<'a>(b: Builder<'a>, prefix: &str, gensym: &mut u64) -> Form<'a> {
    *gensym += 1;
    b.sym(&format!("{}__{}", prefix, gensym))
}

/// Expand a `(name args...)` form when `name` is a built-in macro.
/// Returns None for anything else.
pub fn expand<'a>(
    arena: &'a Bump,
    name: &str,
    form: Form<'a>,
    gensym: &mut u64,
    file: &std::rc::Rc<str>,
) -> Result<Option<Form<'a>>, Diagnostic> {
    let items = form.as_list().expect("macro call must be a list");
    let args = &items[1..];
    let b = Builder::at(arena, &form);
    let expanded = match name {
        "fn" => rename_head(b, args, "fn*"),
        "let" => rename_head(b, args, "let*"),
        "loop" => rename_head(b, args, "loop*"),
        "defn" => defn(b, args, &form, file)?,
        "when" => {
            let [test, body @ ..] = args else {
                return Err(err("when requires a test", &form, file));
            };
            b.call("if", &[*test, do_block(b, body)])
        }
        "when-not" => {
            let [test, body @ ..] = args else {
                return Err(err("when-not requires a test", &form, file));
            };
            b.call("if", &[*test, b.nil(), do_block(b, body)])
        }
        "cond" => cond(b, args, &form, file)?,
        "condp" => condp(b, args, &form, file, gensym)?,
        "case" => case(b, args, &form, file, gensym)?,
        "and" => and_or(b, args, true, gensym),
        "or" => and_or(b, args, false, gensym),
        "if-let" => if_let(b, args, &form, file, gensym, false, false)?,
        "when-let" => if_let(b, args, &form, file, gensym, true, false)?,
        "if-some" => if_let(b, args, &form, file, gensym, false, true)?,
        "when-some" => if_let(b, args, &form, file, gensym, true, true)?,
        "->" => thread(b, args, &form, file, false)?,
        "->>" => thread(b, args, &form, file, true)?,
        "some->" => some_thread(b, args, &form, file, gensym, false)?,
        "some->>" => some_thread(b, args, &form, file, gensym, true)?,
        "as->" => as_thread(b, args, &form, file)?,
        "cond->" => cond_thread(b, args, &form, file, gensym, false)?,
        "cond->>" => cond_thread(b, args, &form, file, gensym, true)?,
        "doseq" => doseq(b, args, &form, file, gensym)?,
        "dotimes" => dotimes(b, args, &form, file, gensym)?,
        "for" => for_seq(b, args, &form, file)?,
        "while" => {
            let [test, body @ ..] = args else {
                return Err(err("while requires a test", &form, file));
            };
            let step = {
                let mut inner: Vec<Form<'a>> = body.to_vec();
                inner.push(b.call("recur", &[]));
                b.call("when", &[*test, do_block_vec(b, inner)])
            };
            b.call("loop", &[b.vector(&[]), step])
        }
        "binding" => binding(b, args, &form, file)?,
        "with-redefs" => with_redefs(b, args, &form, file, gensym)?,
        "defprotocol" => defprotocol(b, args, &form, file)?,
        "extend-type" => extend_type(b, args, &form, file)?,
        "extend-protocol" => extend_protocol(b, args, &form, file)?,
        "lazy-seq" => b.call("lazy-seq*", &[fn_of(b, &[], args)]),
        "delay" => b.call("delay*", &[fn_of(b, &[], args)]),
        "declare" => {
            let defs: Vec<Form<'a>> = args.iter().map(|s| b.call("def", &[*s])).collect();
            do_block_vec(b, defs)
        }
        "comment" => b.nil(),
        "ns" => {
            let [name_form, ..] = args else {
                return Err(err("ns requires a name", &form, file));
            };
            let Some((None, ns_name)) = name_form.as_symbol() else {
                return Err(err("ns requires a plain symbol name", name_form, file));
            };
            b.call("in-ns*", &[b.str(ns_name)])
        }
        _ => return Ok(None),
    };
    Ok(Some(expanded))
}

fn rename_head<'a>(b: Builder<'a>, args: &[Form<'a>], head: &str) -> Form<'a> {
    let mut items = Vec::with_capacity(args.len() + 1);
    items.push(b.sym(head));
    items.extend_from_slice(args);
    b.list(&items)
}

fn do_block<'a>(b: Builder<'a>, body: &[Form<'a>]) -> Form<'a> {
    match body {
        [single] => *single,
        _ => b.call("do", body),
    }
}

fn do_block_vec<'a>(b: Builder<'a>, body: Vec<Form<'a>>) -> Form<'a> {
    do_block(b, &body)
}

/// `(fn [params...] body...)`
fn fn_of<'a>(b: Builder<'a>, params: &[Form<'a>], body: &[Form<'a>]) -> Form<'a> {
    let mut items = vec![b.sym("fn*"), b.vector(params)];
    items.extend_from_slice(body);
    b.list(&items)
}

fn defn<'a>(
    b: Builder<'a>,
    args: &[Form<'a>],
    form: &Form<'a>,
    file: &std::rc::Rc<str>,
) -> Result<Form<'a>, Diagnostic> {
    let [name, rest @ ..] = args else {
        return Err(err("defn requires a name", form, file));
    };
    // Skip an optional docstring and an optional attribute map.
    let mut rest = rest;
    if matches!(rest.first().map(|f| f.kind), Some(FormKind::Str(_))) {
        rest = &rest[1..];
    }
    if matches!(rest.first().map(|f| f.kind), Some(FormKind::Map(_))) {
        rest = &rest[1..];
    }
    if rest.is_empty() {
        return Err(err("defn requires a params vector and body", form, file));
    }
    let mut fn_items = vec![b.sym("fn*"), *name];
    fn_items.extend_from_slice(rest);
    Ok(b.call("def", &[*name, b.list(&fn_items)]))
}

fn cond<'a>(
    b: Builder<'a>,
    args: &[Form<'a>],
    form: &Form<'a>,
    file: &std::rc::Rc<str>,
) -> Result<Form<'a>, Diagnostic> {
    if args.len() % 2 != 0 {
        return Err(err("cond requires an even number of forms", form, file));
    }
    let mut expanded = b.nil();
    for pair in args.chunks_exact(2).rev() {
        let is_else = matches!(pair[0].kind, FormKind::Keyword { ns: None, name: "else" });
        expanded = if is_else {
            pair[1]
        } else {
            b.call("if", &[pair[0], pair[1], expanded])
        };
    }
    Ok(expanded)
}

fn condp<'a>(
    b: Builder<'a>,
    args: &[Form<'a>],
    form: &Form<'a>,
    file: &std::rc::Rc<str>,
    gensym: &mut u64,
) -> Result<Form<'a>, Diagnostic> {
    let [pred, expr, clauses @ ..] = args else {
        return Err(err("condp requires a predicate and an expression", form, file));
    };
    let p = fresh(b, "pred", gensym);
    let e = fresh(b, "expr", gensym);
    let (pairs, default) = if clauses.len() % 2 == 1 {
        (&clauses[..clauses.len() - 1], Some(clauses[clauses.len() - 1]))
    } else {
        (clauses, None)
    };
    let mut expanded = default.unwrap_or_else(|| {
        b.call(
            "throw",
            &[b.call("ex-info", &[b.str("no matching clause"), b.map(&[])])],
        )
    });
    for pair in pairs.chunks_exact(2).rev() {
        let test = b.list(&[p, pair[0], e]);
        expanded = b.call("if", &[test, pair[1], expanded]);
    }
    Ok(b.call(
        "let*",
        &[b.vector(&[p, *pred, e, *expr]), expanded],
    ))
}

fn case<'a>(
    b: Builder<'a>,
    args: &[Form<'a>],
    form: &Form<'a>,
    file: &std::rc::Rc<str>,
    gensym: &mut u64,
) -> Result<Form<'a>, Diagnostic> {
    let [expr, clauses @ ..] = args else {
        return Err(err("case requires an expression", form, file));
    };
    let e = fresh(b, "case", gensym);
    let (pairs, default) = if clauses.len() % 2 == 1 {
        (&clauses[..clauses.len() - 1], Some(clauses[clauses.len() - 1]))
    } else {
        (clauses, None)
    };
    let mut expanded = default.unwrap_or_else(|| {
        b.call(
            "throw",
            &[b.call("ex-info", &[b.str("no matching clause"), b.map(&[])])],
        )
    });
    let quoted_eq = |c: Form<'a>| b.call("=", &[e, b.call("quote", &[c])]);
    for pair in pairs.chunks_exact(2).rev() {
        // A list of constants groups alternatives for one result.
        let test = match pair[0].as_list() {
            Some(alternatives) => {
                let tests: Vec<Form<'a>> = alternatives.iter().map(|c| quoted_eq(*c)).collect();
                b.call("or", &tests)
            }
            None => quoted_eq(pair[0]),
        };
        expanded = b.call("if", &[test, pair[1], expanded]);
    }
    Ok(b.call("let*", &[b.vector(&[e, *expr]), expanded]))
}

fn and_or<'a>(b: Builder<'a>, args: &[Form<'a>], is_and: bool, gensym: &mut u64) -> Form<'a> {
    match args {
        [] => {
            if is_and {
                b.bool(true)
            } else {
                b.nil()
            }
        }
        [single] => *single,
        [head, rest @ ..] => {
            let t = fresh(b, if is_and { "and" } else { "or" }, gensym);
            let continued = and_or(b, rest, is_and, gensym);
            let branches = if is_and {
                [continued, t]
            } else {
                [t, continued]
            };
            b.call(
                "let*",
                &[b.vector(&[t, *head]), b.call("if", &[t, branches[0], branches[1]])],
            )
        }
    }
}

fn if_let<'a>(
    b: Builder<'a>,
    args: &[Form<'a>],
    form: &Form<'a>,
    file: &std::rc::Rc<str>,
    gensym: &mut u64,
    when_style: bool,
    some_style: bool,
) -> Result<Form<'a>, Diagnostic> {
    let [bindings, rest @ ..] = args else {
        return Err(err("missing binding vector", form, file));
    };
    let Some(binding_items) = bindings.as_vector().filter(|v| v.len() == 2) else {
        return Err(err("binding vector must contain one pattern and one init", form, file));
    };
    let (pattern, init) = (binding_items[0], binding_items[1]);
    let t = fresh(b, "temp", gensym);
    let test: Form<'a> = if some_style {
        b.call("some?", &[t])
    } else {
        t
    };
    let (then, els) = if when_style {
        (do_block(b, rest), b.nil())
    } else {
        match rest {
            [then] => (*then, b.nil()),
            [then, els] => (*then, *els),
            _ => return Err(err("expected then and optional else", form, file)),
        }
    };
    let bound_then = b.call("let*", &[b.vector(&[pattern, t]), then]);
    Ok(b.call(
        "let*",
        &[b.vector(&[t, init]), b.call("if", &[test, bound_then, els])],
    ))
}

/// `->` / `->>`: thread a value through call forms.
fn thread<'a>(
    b: Builder<'a>,
    args: &[Form<'a>],
    form: &Form<'a>,
    file: &std::rc::Rc<str>,
    last: bool,
) -> Result<Form<'a>, Diagnostic> {
    let [seed, steps @ ..] = args else {
        return Err(err("threading requires an initial value", form, file));
    };
    let mut acc = *seed;
    for step in steps {
        acc = thread_step(b, acc, *step, last);
    }
    Ok(acc)
}

fn thread_step<'a>(b: Builder<'a>, acc: Form<'a>, step: Form<'a>, last: bool) -> Form<'a> {
    match step.as_list() {
        Some(items) if !items.is_empty() => {
            let mut call: Vec<Form<'a>> = Vec::with_capacity(items.len() + 1);
            if last {
                call.extend_from_slice(items);
                call.push(acc);
            } else {
                call.push(items[0]);
                call.push(acc);
                call.extend_from_slice(&items[1..]);
            }
            b.list(&call)
        }
        _ => b.list(&[step, acc]),
    }
}

fn some_thread<'a>(
    b: Builder<'a>,
    args: &[Form<'a>],
    form: &Form<'a>,
    file: &std::rc::Rc<str>,
    gensym: &mut u64,
    last: bool,
) -> Result<Form<'a>, Diagnostic> {
    let [seed, steps @ ..] = args else {
        return Err(err("threading requires an initial value", form, file));
    };
    let mut acc = *seed;
    for step in steps {
        let t = fresh(b, "some", gensym);
        let stepped = thread_step(b, t, *step, last);
        acc = b.call(
            "let*",
            &[
                b.vector(&[t, acc]),
                b.call("if", &[b.call("nil?", &[t]), b.nil(), stepped]),
            ],
        );
    }
    Ok(acc)
}

fn as_thread<'a>(
    b: Builder<'a>,
    args: &[Form<'a>],
    form: &Form<'a>,
    file: &std::rc::Rc<str>,
) -> Result<Form<'a>, Diagnostic> {
    let [seed, name, steps @ ..] = args else {
        return Err(err("as-> requires a value and a name", form, file));
    };
    let mut bindings = vec![*name, *seed];
    for step in steps {
        bindings.push(*name);
        bindings.push(*step);
    }
    Ok(b.call("let*", &[b.vector(&bindings), *name]))
}

fn cond_thread<'a>(
    b: Builder<'a>,
    args: &[Form<'a>],
    form: &Form<'a>,
    file: &std::rc::Rc<str>,
    gensym: &mut u64,
    last: bool,
) -> Result<Form<'a>, Diagnostic> {
    let [seed, clauses @ ..] = args else {
        return Err(err("threading requires an initial value", form, file));
    };
    if clauses.len() % 2 != 0 {
        return Err(err("expected test/step pairs", form, file));
    }
    let mut acc = *seed;
    for pair in clauses.chunks_exact(2) {
        let t = fresh(b, "cond", gensym);
        let stepped = thread_step(b, t, pair[1], last);
        acc = b.call(
            "let*",
            &[
                b.vector(&[t, acc]),
                b.call("if", &[pair[0], stepped, t]),
            ],
        );
    }
    Ok(acc)
}

/// Split a `doseq`/`for` binding vector into binding groups, each a
/// pattern/source pair plus its trailing :let/:when/:while modifiers.
struct SeqBinding<'a> {
    pattern: Form<'a>,
    source: Form<'a>,
    lets: Vec<Form<'a>>,
    whens: Vec<Form<'a>>,
    whiles: Vec<Form<'a>>,
}

fn parse_seq_bindings<'a>(
    bindings: &'a [Form<'a>],
    form: &Form<'a>,
    file: &std::rc::Rc<str>,
) -> Result<Vec<SeqBinding<'a>>, Diagnostic> {
    if bindings.len() % 2 != 0 {
        return Err(err("binding vector requires an even number of forms", form, file));
    }
    let mut groups: Vec<SeqBinding<'a>> = Vec::new();
    for pair in bindings.chunks_exact(2) {
        match pair[0].kind {
            FormKind::Keyword { ns: None, name: "let" } => match groups.last_mut() {
                Some(group) => group.lets.push(pair[1]),
                None => return Err(err(":let must follow a binding", form, file)),
            },
            FormKind::Keyword { ns: None, name: "when" } => match groups.last_mut() {
                Some(group) => group.whens.push(pair[1]),
                None => return Err(err(":when must follow a binding", form, file)),
            },
            FormKind::Keyword { ns: None, name: "while" } => match groups.last_mut() {
                Some(group) => group.whiles.push(pair[1]),
                None => return Err(err(":while must follow a binding", form, file)),
            },
            FormKind::Keyword { .. } => {
                return Err(err("unsupported binding modifier", &pair[0], file));
            }
            _ => groups.push(SeqBinding {
                pattern: pair[0],
                source: pair[1],
                lets: Vec::new(),
                whens: Vec::new(),
                whiles: Vec::new(),
            }),
        }
    }
    Ok(groups)
}

/// A binding group's source with :while folded in as take-while.
fn group_source<'a>(b: Builder<'a>, group: &SeqBinding<'a>) -> Form<'a> {
    let mut source = group.source;
    for test in &group.whiles {
        source = b.call("take-while", &[fn_of(b, &[group.pattern], &[*test]), source]);
    }
    source
}

fn doseq<'a>(
    b: Builder<'a>,
    args: &[Form<'a>],
    form: &Form<'a>,
    file: &std::rc::Rc<str>,
    gensym: &mut u64,
) -> Result<Form<'a>, Diagnostic> {
    let [bindings, body @ ..] = args else {
        return Err(err("doseq requires a binding vector", form, file));
    };
    let Some(bindings) = bindings.as_vector() else {
        return Err(err("doseq requires a binding vector", form, file));
    };
    let groups = parse_seq_bindings(bindings, form, file)?;
    let mut inner = do_block(b, body);
    for group in groups.iter().rev() {
        for test in group.whens.iter().rev() {
            inner = b.call("when", &[*test, inner]);
        }
        for let_vec in group.lets.iter().rev() {
            inner = b.call("let*", &[*let_vec, inner]);
        }
        let s = fresh(b, "seq", gensym);
        let step = b.call(
            "when",
            &[
                s,
                b.call(
                    "let*",
                    &[
                        b.vector(&[group.pattern, b.call("first", &[s])]),
                        b.call("do", &[inner, b.call("recur", &[b.call("next", &[s])])]),
                    ],
                ),
            ],
        );
        inner = b.call(
            "loop*",
            &[
                b.vector(&[s, b.call("seq", &[group_source(b, group)])]),
                step,
            ],
        );
    }
    Ok(inner)
}

fn dotimes<'a>(
    b: Builder<'a>,
    args: &[Form<'a>],
    form: &Form<'a>,
    file: &std::rc::Rc<str>,
    gensym: &mut u64,
) -> Result<Form<'a>, Diagnostic> {
    let [bindings, body @ ..] = args else {
        return Err(err("dotimes requires a binding vector", form, file));
    };
    let Some([var, count]) = bindings
        .as_vector()
        .filter(|v| v.len() == 2)
        .map(|v| [v[0], v[1]])
    else {
        return Err(err("dotimes requires [name count]", form, file));
    };
    let n = fresh(b, "count", gensym);
    let mut step_body: Vec<Form<'a>> = body.to_vec();
    step_body.push(b.call("recur", &[b.call("inc", &[var])]));
    let looped = b.call(
        "loop*",
        &[
            b.vector(&[var, b.int(0)]),
            b.call(
                "when",
                &[b.call("<", &[var, n]), do_block_vec(b, step_body)],
            ),
        ],
    );
    Ok(b.call("let*", &[b.vector(&[n, count]), looped]))
}

/// Lazy `for` comprehension: each binding level becomes a mapcat over its
/// source; :when prunes to an empty list, :while narrows the source with
/// take-while, :let wraps the level body.
fn for_seq<'a>(
    b: Builder<'a>,
    args: &[Form<'a>],
    form: &Form<'a>,
    file: &std::rc::Rc<str>,
) -> Result<Form<'a>, Diagnostic> {
    let [bindings, body @ ..] = args else {
        return Err(err("for requires a binding vector", form, file));
    };
    let Some(bindings) = bindings.as_vector() else {
        return Err(err("for requires a binding vector", form, file));
    };
    if body.len() != 1 {
        return Err(err("for requires exactly one body expression", form, file));
    }
    let groups = parse_seq_bindings(bindings, form, file)?;
    if groups.is_empty() {
        return Err(err("for requires at least one binding", form, file));
    }
    let mut inner = b.call("list", &[body[0]]);
    for group in groups.iter().rev() {
        for test in group.whens.iter().rev() {
            inner = b.call("if", &[*test, inner, b.call("list", &[])]);
        }
        for let_vec in group.lets.iter().rev() {
            inner = b.call("let*", &[*let_vec, inner]);
        }
        inner = b.call(
            "mapcat",
            &[fn_of(b, &[group.pattern], &[inner]), group_source(b, group)],
        );
    }
    Ok(inner)
}

/// `binding` pushes a dynamic frame for its vars and pops it on every
/// exit path.
fn binding<'a>(
    b: Builder<'a>,
    args: &[Form<'a>],
    form: &Form<'a>,
    file: &std::rc::Rc<str>,
) -> Result<Form<'a>, Diagnostic> {
    let [bindings, body @ ..] = args else {
        return Err(err("binding requires a binding vector", form, file));
    };
    let Some(bindings) = bindings.as_vector() else {
        return Err(err("binding requires a binding vector", form, file));
    };
    if bindings.len() % 2 != 0 {
        return Err(err("binding vector requires an even number of forms", form, file));
    }
    let mut frame: Vec<Form<'a>> = Vec::with_capacity(bindings.len());
    for pair in bindings.chunks_exact(2) {
        frame.push(b.call("var", &[pair[0]]));
        frame.push(pair[1]);
    }
    let push = b.call("push-bindings*", &[b.vector(&frame)]);
    let pop = b.call("finally", &[b.call("pop-bindings*", &[])]);
    Ok(b.call(
        "do",
        &[push, b.call("try", &[do_block(b, body), pop])],
    ))
}

fn with_redefs<'a>(
    b: Builder<'a>,
    args: &[Form<'a>],
    form: &Form<'a>,
    file: &std::rc::Rc<str>,
    gensym: &mut u64,
) -> Result<Form<'a>, Diagnostic> {
    let [bindings, body @ ..] = args else {
        return Err(err("with-redefs requires a binding vector", form, file));
    };
    let Some(bindings) = bindings.as_vector() else {
        return Err(err("with-redefs requires a binding vector", form, file));
    };
    if bindings.len() % 2 != 0 {
        return Err(err("binding vector requires an even number of forms", form, file));
    }
    let mut expanded = do_block(b, body);
    for pair in bindings.chunks_exact(2).rev() {
        let v = fresh(b, "var", gensym);
        let old = fresh(b, "root", gensym);
        let restore = b.call("finally", &[b.call("var-bind-root*", &[v, old])]);
        expanded = b.call(
            "let*",
            &[
                b.vector(&[
                    v,
                    b.call("var", &[pair[0]]),
                    old,
                    b.call("var-root*", &[v]),
                ]),
                b.call("do", &[
                    b.call("var-bind-root*", &[v, pair[1]]),
                    b.call("try", &[expanded, restore]),
                ]),
            ],
        );
    }
    Ok(expanded)
}

/// `(defprotocol P (f [x]) ...)` defines the protocol value and one
/// dispatching fn var per method.
fn defprotocol<'a>(
    b: Builder<'a>,
    args: &[Form<'a>],
    form: &Form<'a>,
    file: &std::rc::Rc<str>,
) -> Result<Form<'a>, Diagnostic> {
    let [name, sigs @ ..] = args else {
        return Err(err("defprotocol requires a name", form, file));
    };
    let Some((None, proto_name)) = name.as_symbol() else {
        return Err(err("defprotocol requires a plain symbol name", form, file));
    };
    let mut method_names: Vec<Form<'a>> = Vec::new();
    let mut defs: Vec<Form<'a>> = Vec::new();
    for sig in sigs {
        let Some([m, ..]) = sig.as_list().filter(|l| !l.is_empty()).map(|l| [l[0]]) else {
            return Err(err("protocol method signature must be a list", sig, file));
        };
        let Some((None, m_name)) = m.as_symbol() else {
            return Err(err("protocol method name must be a symbol", sig, file));
        };
        method_names.push(b.str(m_name));
        defs.push(b.call(
            "def",
            &[m, b.call("protocol-method*", &[*name, b.str(m_name)])],
        ));
    }
    let mut block = vec![b.call(
        "def",
        &[*name, b.call("protocol*", &[b.str(proto_name), b.vector(&method_names)])],
    )];
    block.extend(defs);
    block.push(*name);
    Ok(do_block_vec(b, block))
}

/// `(extend-type Type Proto (m [args] body) ...)` registers method
/// implementations under the type's name.
fn extend_type<'a>(
    b: Builder<'a>,
    args: &[Form<'a>],
    form: &Form<'a>,
    file: &std::rc::Rc<str>,
) -> Result<Form<'a>, Diagnostic> {
    let [type_name, rest @ ..] = args else {
        return Err(err("extend-type requires a type", form, file));
    };
    let Some((None, type_str)) = type_name.as_symbol() else {
        return Err(err("extend-type requires a type symbol", form, file));
    };
    let mut extends: Vec<Form<'a>> = Vec::new();
    let mut current_proto: Option<Form<'a>> = None;
    let mut methods: Vec<Form<'a>> = Vec::new();
    let flush = |b: Builder<'a>,
                 extends: &mut Vec<Form<'a>>,
                 proto: Option<Form<'a>>,
                 methods: &mut Vec<Form<'a>>| {
        if let Some(proto) = proto {
            extends.push(b.call(
                "extend*",
                &[proto, b.str(type_str), b.call("hash-map", methods)],
            ));
            methods.clear();
        }
    };
    for item in rest {
        match item.kind {
            FormKind::Symbol { .. } => {
                flush(b, &mut extends, current_proto.take(), &mut methods);
                current_proto = Some(*item);
            }
            FormKind::List(sig) if !sig.is_empty() => {
                let Some((None, m_name)) = sig[0].as_symbol() else {
                    return Err(err("method name must be a symbol", item, file));
                };
                let mut fn_items = vec![b.sym("fn*")];
                fn_items.extend_from_slice(&sig[1..]);
                methods.push(b.str(m_name));
                methods.push(b.list(&fn_items));
            }
            _ => return Err(err("unexpected form in extend-type", item, file)),
        }
    }
    flush(b, &mut extends, current_proto.take(), &mut methods);
    if extends.is_empty() {
        return Err(err("extend-type requires a protocol", form, file));
    }
    Ok(do_block_vec(b, extends))
}

/// `(extend-protocol P Type1 (m ...) Type2 (m ...))` regroups into
/// extend-type calls.
fn extend_protocol<'a>(
    b: Builder<'a>,
    args: &[Form<'a>],
    form: &Form<'a>,
    file: &std::rc::Rc<str>,
) -> Result<Form<'a>, Diagnostic> {
    let [proto, rest @ ..] = args else {
        return Err(err("extend-protocol requires a protocol", form, file));
    };
    let mut extends: Vec<Form<'a>> = Vec::new();
    let mut current: Option<(Form<'a>, Vec<Form<'a>>)> = None;
    for item in rest {
        match item.kind {
            FormKind::Symbol { .. } => {
                if let Some((type_name, methods)) = current.take() {
                    let mut call = vec![b.sym("extend-type"), type_name, *proto];
                    call.extend(methods);
                    extends.push(b.list(&call));
                }
                current = Some((*item, Vec::new()));
            }
            _ => match &mut current {
                Some((_, methods)) => methods.push(*item),
                None => return Err(err("expected a type symbol", item, file)),
            },
        }
    }
    if let Some((type_name, methods)) = current.take() {
        let mut call = vec![b.sym("extend-type"), type_name, *proto];
        call.extend(methods);
        extends.push(b.list(&call));
    }
    Ok(do_block_vec(b, extends))
}
