//! Analyzer - Forms to Nodes
//!
//! Resolves every symbol (locals to frame slots, vars to interned ids),
//! expands the built-in macro set to a fixed point, rewrites destructuring
//! and syntax-quote, folds constant arithmetic, and lowers dynamic
//! collection literals to constructor calls. The result is a Node tree
//! both backends execute without ever consulting the environment for
//! name lookup again.
//!
//! Frame layout per function arity: parameters first, then captured
//! locals, then let-introduced slots. Captures are discovered by a
//! pre-scan of the whole fn body for symbols that resolve in the
//! enclosing frame; a shadowed name can at worst copy an unused value
//! into the environment, never miss one.

use std::rc::Rc;

use bumpalo::Bump;
use loam_core::collections::{PList, PMap, PSet, PVector};
use loam_core::diagnostics::{Diagnostic, SourcePos};
use loam_core::form::{Form, FormKind};
use loam_core::node::{BinOp, CollKind, FnArityNode, Node, NodeKind};
use loam_core::value::{Sym, Value};

use crate::builder::Builder;
use crate::destructure;
use crate::macros;
use crate::syntax_quote::SyntaxQuote;

/// The environment surface the analyzer needs: var interning and lookup,
/// plus the hints that drive opcode specialization. Implemented by the
/// runtime's Env.
pub trait VarResolver {
    /// Resolve a (possibly qualified) symbol to an interned var id.
    fn resolve(&mut self, ns: Option<&str>, name: &str) -> Option<u32>;
    /// Intern a var in the current namespace, creating it unbound if new.
    fn intern(&mut self, name: &str) -> u32;
    fn current_ns(&self) -> Rc<str>;
    fn var_ns_name(&self, id: u32) -> (Rc<str>, Rc<str>);
    fn mark_macro(&mut self, id: u32);
    fn mark_dynamic(&mut self, id: u32);
    /// The specialized binary primitive this var is currently bound to.
    fn binop_of(&self, id: u32) -> Option<BinOp>;
    /// Whether the var is currently bound to the `not` builtin.
    fn is_not_builtin(&self, id: u32) -> bool;
    /// Whether the var currently holds a protocol method fn.
    fn is_protocol_fn(&self, id: u32) -> bool;
}

struct Scope {
    /// (name, slot), searched from the back so inner bindings shadow.
    locals: Vec<(Rc<str>, u16)>,
    /// Next free frame slot.
    height: u16,
}

impl Scope {
    fn root() -> Self {
        Scope {
            locals: Vec::new(),
            height: 0,
        }
    }

    fn lookup(&self, name: &str) -> Option<u16> {
        self.locals
            .iter()
            .rev()
            .find(|(n, _)| &**n == name)
            .map(|(_, slot)| *slot)
    }
}

pub struct Analyzer<'a, 'e, R: VarResolver> {
    arena: &'a Bump,
    env: &'e mut R,
    file: Rc<str>,
    scopes: Vec<Scope>,
    /// Expected argument counts of enclosing recur targets.
    recur_arities: Vec<usize>,
    gensym: u64,
}

/// Sentinel in the recur-arity stack: a try boundary that recur may not
/// cross (the VM's handler bookkeeping cannot survive the jump).
const RECUR_BARRIER: usize = usize::MAX;

const SPECIAL_FORMS: &[&str] = &[
    "if", "do", "let*", "loop*", "recur", "fn*", "def", "quote", "var", "try", "throw", "letfn",
    "defmulti", "defmethod", "syntax-quote",
];

impl<'a, 'e, R: VarResolver> Analyzer<'a, 'e, R> {
    pub fn new(arena: &'a Bump, env: &'e mut R, file: Rc<str>) -> Self {
        Analyzer {
            arena,
            env,
            file,
            scopes: vec![Scope::root()],
            recur_arities: Vec::new(),
            gensym: 0,
        }
    }

    fn pos(&self, form: &Form<'a>) -> SourcePos {
        SourcePos::new(self.file.clone(), form.line, form.column)
    }

    fn node(&self, kind: NodeKind, form: &Form<'a>) -> Node {
        Node::new(kind, form.line, form.column, self.file.clone())
    }

    fn error(&self, msg: impl Into<String>, form: &Form<'a>) -> Diagnostic {
        Diagnostic::analysis(msg, self.pos(form))
    }

    fn scope(&mut self) -> &mut Scope {
        self.scopes.last_mut().expect("analyzer scope stack empty")
    }

    /// Analyze one top-level form.
    pub fn analyze(&mut self, form: &Form<'a>) -> Result<Node, Diagnostic> {
        match form.kind {
            FormKind::Nil
            | FormKind::Bool(_)
            | FormKind::Int(_)
            | FormKind::Double(_)
            | FormKind::Ratio(_, _)
            | FormKind::Str(_)
            | FormKind::Char(_)
            | FormKind::Keyword { .. }
            | FormKind::Regex(_) => {
                let v = self.form_to_value(form)?;
                Ok(self.node(NodeKind::Const(v), form))
            }
            FormKind::Symbol { ns, name } => self.analyze_symbol(form, ns, name),
            FormKind::Vector(items) => self.analyze_collection(form, items, CollKind::Vector),
            FormKind::Set(items) => self.analyze_collection(form, items, CollKind::Set),
            FormKind::Map(items) => {
                if items.len() % 2 != 0 {
                    return Err(self.error("map literal must have an even number of forms", form));
                }
                self.analyze_collection(form, items, CollKind::Map)
            }
            FormKind::List(items) => self.analyze_list(form, items),
        }
    }

    fn analyze_symbol(
        &mut self,
        form: &Form<'a>,
        ns: Option<&'a str>,
        name: &'a str,
    ) -> Result<Node, Diagnostic> {
        if ns.is_none() {
            if let Some(slot) = self.scope().lookup(name) {
                return Ok(self.node(
                    NodeKind::LocalRef {
                        name: name.into(),
                        slot,
                    },
                    form,
                ));
            }
        }
        match self.env.resolve(ns, name) {
            Some(id) => Ok(self.node(NodeKind::VarRef(id), form)),
            None => Err(self.error(
                format!(
                    "undefined symbol '{}'",
                    match ns {
                        Some(ns) => format!("{}/{}", ns, name),
                        None => name.to_string(),
                    }
                ),
                form,
            )),
        }
    }

    /// Vector/map/set literals: constant when every element is, otherwise
    /// built element by element at runtime in literal order.
    fn analyze_collection(
        &mut self,
        form: &Form<'a>,
        items: &'a [Form<'a>],
        kind: CollKind,
    ) -> Result<Node, Diagnostic> {
        if form.is_constant() {
            let v = self.form_to_value(form)?;
            return Ok(self.node(NodeKind::Const(v), form));
        }
        let items = items
            .iter()
            .map(|item| self.analyze(item))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.node(NodeKind::CollLiteral { kind, items }, form))
    }

    fn analyze_list(&mut self, form: &Form<'a>, items: &'a [Form<'a>]) -> Result<Node, Diagnostic> {
        let Some(head) = items.first() else {
            // () evaluates to the empty list.
            return Ok(self.node(NodeKind::Const(Value::list(vec![])), form));
        };

        if let Some((None, name)) = head.as_symbol() {
            // Locals shadow both special forms and macros.
            let shadowed = self.scope().lookup(name).is_some();
            if !shadowed {
                if SPECIAL_FORMS.contains(&name) {
                    return self.analyze_special(form, items, name);
                }
                if let Some(expanded) =
                    macros::expand(self.arena, name, *form, &mut self.gensym, &self.file)?
                {
                    let expanded = self.arena.alloc(expanded);
                    return self.analyze(expanded);
                }
            }
        }

        let callee = self.analyze(head)?;
        let args = items[1..]
            .iter()
            .map(|item| self.analyze(item))
            .collect::<Result<Vec<_>, _>>()?;

        if let NodeKind::VarRef(id) = callee.kind {
            if let Some(op) = self.env.binop_of(id) {
                if op != BinOp::Nth {
                    if let Some(folded) = fold_arith(op, &args) {
                        return Ok(self.node(NodeKind::Const(folded), form));
                    }
                }
                if args.len() == 2 {
                    let mut it = args.into_iter();
                    let lhs = Box::new(it.next().unwrap());
                    let rhs = Box::new(it.next().unwrap());
                    return Ok(self.node(NodeKind::BinOp { op, lhs, rhs }, form));
                }
            }
            if args.len() == 1 && self.env.is_not_builtin(id) {
                let operand = Box::new(args.into_iter().next().unwrap());
                return Ok(self.node(NodeKind::Not(operand), form));
            }
            if self.env.is_protocol_fn(id) {
                return Ok(self.node(
                    NodeKind::Call {
                        callee: Box::new(callee),
                        args,
                        protocol: true,
                    },
                    form,
                ));
            }
        }

        Ok(self.node(
            NodeKind::Call {
                callee: Box::new(callee),
                args,
                protocol: false,
            },
            form,
        ))
    }

    fn analyze_special(
        &mut self,
        form: &Form<'a>,
        items: &'a [Form<'a>],
        name: &str,
    ) -> Result<Node, Diagnostic> {
        let args = &items[1..];
        match name {
            "if" => {
                let (test, then, els) = match args {
                    [test, then] => (test, then, None),
                    [test, then, els] => (test, then, Some(els)),
                    _ => return Err(self.error("if requires 2 or 3 forms", form)),
                };
                let test = Box::new(self.analyze(test)?);
                let then = Box::new(self.analyze(then)?);
                let els = match els {
                    Some(e) => Some(Box::new(self.analyze(e)?)),
                    None => None,
                };
                Ok(self.node(NodeKind::If { test, then, els }, form))
            }
            "do" => {
                let body = args
                    .iter()
                    .map(|f| self.analyze(f))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(self.node(NodeKind::Do(body), form))
            }
            "let*" => self.analyze_let(form, args, false),
            "loop*" => self.analyze_let(form, args, true),
            "recur" => {
                let Some(&expected) = self.recur_arities.last() else {
                    return Err(self.error("recur outside loop or fn", form));
                };
                if expected == RECUR_BARRIER {
                    return Err(self.error("cannot recur across try", form));
                }
                if args.len() != expected {
                    return Err(self.error(
                        format!(
                            "recur expects {} arguments, got {}",
                            expected,
                            args.len()
                        ),
                        form,
                    ));
                }
                let analyzed = args
                    .iter()
                    .map(|f| self.analyze(f))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(self.node(NodeKind::Recur(analyzed), form))
            }
            "fn*" => self.analyze_fn(form, args),
            "def" => self.analyze_def(form, args),
            "quote" => {
                let [payload] = args else {
                    return Err(self.error("quote requires exactly one form", form));
                };
                let v = self.form_to_value(payload)?;
                Ok(self.node(NodeKind::Quote(v), form))
            }
            "var" => {
                let [sym] = args else {
                    return Err(self.error("var requires a symbol", form));
                };
                let Some((ns, name)) = sym.as_symbol() else {
                    return Err(self.error("var requires a symbol", form));
                };
                match self.env.resolve(ns, name) {
                    Some(id) => Ok(self.node(NodeKind::Const(Value::Var(id)), form)),
                    None => Err(self.error(format!("undefined var '{}'", name), form)),
                }
            }
            "try" => self.analyze_try(form, args),
            "throw" => {
                let [e] = args else {
                    return Err(self.error("throw requires exactly one form", form));
                };
                let e = Box::new(self.analyze(e)?);
                Ok(self.node(NodeKind::Throw(e), form))
            }
            "letfn" => self.analyze_letfn(form, args),
            "defmulti" => {
                let [name_form, dispatch] = args else {
                    return Err(self.error("defmulti requires a name and a dispatch fn", form));
                };
                let Some((None, mm_name)) = name_form.as_symbol() else {
                    return Err(self.error("defmulti requires a plain symbol name", form));
                };
                let var = self.env.intern(mm_name);
                let dispatch = Box::new(self.analyze(dispatch)?);
                Ok(self.node(
                    NodeKind::DefMulti {
                        var,
                        name: mm_name.into(),
                        dispatch,
                    },
                    form,
                ))
            }
            "defmethod" => {
                let [name_form, dispatch_val, fn_tail @ ..] = args else {
                    return Err(self.error(
                        "defmethod requires a name, a dispatch value, and a fn tail",
                        form,
                    ));
                };
                let Some((ns, mm_name)) = name_form.as_symbol() else {
                    return Err(self.error("defmethod requires a symbol name", form));
                };
                let Some(var) = self.env.resolve(ns, mm_name) else {
                    return Err(self.error(
                        format!("defmethod on undefined multimethod '{}'", mm_name),
                        form,
                    ));
                };
                let dispatch_val = Box::new(self.analyze(dispatch_val)?);
                let b = Builder::at(self.arena, form);
                let mut fn_items = vec![b.sym("fn*")];
                fn_items.extend_from_slice(fn_tail);
                let fn_form = self.arena.alloc(b.list(&fn_items));
                let method = Box::new(self.analyze(fn_form)?);
                Ok(self.node(
                    NodeKind::DefMethod {
                        var,
                        dispatch_val,
                        method,
                    },
                    form,
                ))
            }
            "syntax-quote" => {
                let [payload] = args else {
                    return Err(self.error("syntax-quote requires exactly one form", form));
                };
                let expanded = SyntaxQuote::new(
                    self.arena,
                    self.env,
                    self.file.clone(),
                    &mut self.gensym,
                )
                .expand(*payload)?;
                let expanded = self.arena.alloc(expanded);
                self.analyze(expanded)
            }
            _ => unreachable!("unhandled special form {}", name),
        }
    }

    /// `let*` and `loop*`. Loop binds one slot per binding pair (recur
    /// rebinds exactly those), destructuring the patterns inside the
    /// body; plain let flattens destructuring directly into the binding
    /// list.
    fn analyze_let(
        &mut self,
        form: &Form<'a>,
        args: &'a [Form<'a>],
        is_loop: bool,
    ) -> Result<Node, Diagnostic> {
        let [bindings_form, body @ ..] = args else {
            return Err(self.error("expected a binding vector", form));
        };
        let Some(binding_items) = bindings_form.as_vector() else {
            return Err(self.error("expected a binding vector", form));
        };
        if binding_items.len() % 2 != 0 {
            return Err(self.error("binding vector requires an even number of forms", form));
        }
        let b = Builder::at(self.arena, form);

        // Rewrite destructuring patterns.
        let mut flat: Vec<(Form<'a>, Form<'a>)> = Vec::new();
        let mut post_lets: Vec<(Form<'a>, Form<'a>)> = Vec::new();
        for pair in binding_items.chunks_exact(2) {
            let (pattern, init) = (pair[0], pair[1]);
            if is_loop {
                // Loop slots must stay one-per-pair for recur; inner
                // destructuring happens per iteration in the body.
                if pattern.as_symbol().is_some_and(|(ns, _)| ns.is_none()) {
                    flat.push((pattern, init));
                } else {
                    self.gensym += 1;
                    let temp = b.sym(&format!("loop__{}", self.gensym));
                    flat.push((temp, init));
                    post_lets.push((pattern, temp));
                }
            } else {
                destructure::expand_binding(
                    b,
                    pattern,
                    init,
                    &mut self.gensym,
                    &mut flat,
                    &self.file,
                )?;
            }
        }

        // Analyze initialisers in order, each seeing the ones before it.
        let saved_locals = self.scope().locals.len();
        let saved_height = self.scope().height;
        let result = (|| {
            let mut bindings: Vec<(Rc<str>, Node)> = Vec::with_capacity(flat.len());
            for (pattern, init) in &flat {
                let init = self.analyze(init)?;
                let Some((None, name)) = pattern.as_symbol() else {
                    return Err(self.error("binding name must be a plain symbol", pattern));
                };
                let name: Rc<str> = name.into();
                let scope = self.scope();
                let slot = scope.height;
                scope.locals.push((name.clone(), slot));
                scope.height += 1;
                bindings.push((name, init));
            }

            if is_loop {
                self.recur_arities.push(bindings.len());
            }
            let body_node = if post_lets.is_empty() {
                self.analyze_body(form, body)
            } else {
                // Destructure loop patterns inside the loop body.
                let mut inner_bindings: Vec<Form<'a>> = Vec::new();
                for (pattern, temp) in &post_lets {
                    inner_bindings.push(*pattern);
                    inner_bindings.push(*temp);
                }
                let mut let_items = vec![b.sym("let*"), b.vector(&inner_bindings)];
                let_items.extend_from_slice(body);
                let wrapped = self.arena.alloc(b.list(&let_items));
                self.analyze(wrapped)
            };
            if is_loop {
                self.recur_arities.pop();
            }
            let body_node = body_node?;

            let kind = if is_loop {
                NodeKind::Loop {
                    bindings,
                    body: Box::new(body_node),
                }
            } else {
                NodeKind::Let {
                    bindings,
                    body: Box::new(body_node),
                }
            };
            Ok(self.node(kind, form))
        })();
        let scope = self.scope();
        scope.locals.truncate(saved_locals);
        scope.height = saved_height;
        result
    }

    fn analyze_body(&mut self, form: &Form<'a>, body: &'a [Form<'a>]) -> Result<Node, Diagnostic> {
        match body {
            [] => Ok(self.node(NodeKind::Const(Value::Nil), form)),
            [single] => self.analyze(single),
            _ => {
                let nodes = body
                    .iter()
                    .map(|f| self.analyze(f))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(self.node(NodeKind::Do(nodes), form))
            }
        }
    }

    fn analyze_fn(&mut self, form: &Form<'a>, args: &'a [Form<'a>]) -> Result<Node, Diagnostic> {
        // Optional self-name.
        let (fn_name, rest): (Option<Rc<str>>, &'a [Form<'a>]) = match args.first() {
            Some(first) if first.as_symbol().is_some() => {
                let (_, n) = first.as_symbol().unwrap();
                (Some(n.into()), &args[1..])
            }
            _ => (None, args),
        };

        // Single-arity `(fn* [params] body...)` vs multi-arity
        // `(fn* ([params] body...) ...)`.
        let arity_forms: Vec<&'a [Form<'a>]> = match rest.first() {
            Some(first) if first.as_vector().is_some() => vec![rest],
            _ => rest
                .iter()
                .map(|f| {
                    f.as_list()
                        .ok_or_else(|| self.error("fn arity must be a list", f))
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        if arity_forms.is_empty() {
            return Err(self.error("fn requires at least one arity", form));
        }

        // Pre-scan every body for names that resolve in the enclosing
        // frame; those become the closure's captures.
        let mut captures: Vec<(Rc<str>, u16)> = Vec::new();
        {
            let scope = self.scopes.last().expect("analyzer scope stack empty");
            for arity in &arity_forms {
                for body_form in &arity[1..] {
                    scan_captures(body_form, scope, &mut captures);
                }
            }
            // The self-name is not a capture.
            if let Some(n) = &fn_name {
                captures.retain(|(name, _)| name != n);
            }
        }

        let b = Builder::at(self.arena, form);
        let mut arities: Vec<FnArityNode> = Vec::new();
        for arity in arity_forms {
            let Some(param_items) = arity[0].as_vector() else {
                return Err(self.error("fn params must be a vector", &arity[0]));
            };
            let body_forms = &arity[1..];

            // Parse params; destructuring patterns become temporaries
            // bound inside the body.
            let mut params: Vec<Rc<str>> = Vec::new();
            let mut variadic = false;
            let mut post_lets: Vec<(Form<'a>, Form<'a>)> = Vec::new();
            let mut i = 0;
            while i < param_items.len() {
                let p = param_items[i];
                if p.is_symbol("&") {
                    if variadic || i + 2 != param_items.len() {
                        return Err(self.error("invalid variadic parameter list", &arity[0]));
                    }
                    variadic = true;
                    i += 1;
                    continue;
                }
                match p.as_symbol() {
                    Some((None, name)) => params.push(name.into()),
                    _ => {
                        self.gensym += 1;
                        let temp_name = format!("p__{}", self.gensym);
                        post_lets.push((p, b.sym(&temp_name)));
                        params.push(temp_name.into());
                    }
                }
                i += 1;
            }

            // New arity scope: params, then capture names (unless
            // shadowed by a param), then the self-name slot for named
            // fns (both backends push the function value there at call
            // time, which is what makes direct self-recursion work).
            let mut scope = Scope::root();
            for (idx, p) in params.iter().enumerate() {
                scope.locals.push((p.clone(), idx as u16));
            }
            for (j, (cap_name, _)) in captures.iter().enumerate() {
                let slot = (params.len() + j) as u16;
                if !params.iter().any(|p| p == cap_name) {
                    scope.locals.push((cap_name.clone(), slot));
                }
            }
            let mut height = params.len() + captures.len();
            if let Some(n) = &fn_name {
                if !params.iter().any(|p| p == n) {
                    scope.locals.push((n.clone(), height as u16));
                }
                height += 1;
            }
            scope.height = height as u16;
            self.scopes.push(scope);
            self.recur_arities.push(params.len());

            let body_node = if post_lets.is_empty() {
                self.analyze_body(form, body_forms)
            } else {
                let mut inner: Vec<Form<'a>> = Vec::new();
                for (pattern, temp) in &post_lets {
                    inner.push(*pattern);
                    inner.push(*temp);
                }
                let mut let_items = vec![b.sym("let*"), b.vector(&inner)];
                let_items.extend_from_slice(body_forms);
                let wrapped = self.arena.alloc(b.list(&let_items));
                self.analyze(wrapped)
            };

            self.recur_arities.pop();
            self.scopes.pop();
            let body_node = body_node?;

            arities.push(FnArityNode {
                params,
                variadic,
                body: Rc::new(body_node),
            });
        }

        Ok(self.node(
            NodeKind::Fn {
                name: fn_name,
                arities,
                captures: captures.into_iter().map(|(_, slot)| slot).collect(),
            },
            form,
        ))
    }

    fn analyze_letfn(&mut self, form: &Form<'a>, args: &'a [Form<'a>]) -> Result<Node, Diagnostic> {
        let [bindings_form, body @ ..] = args else {
            return Err(self.error("letfn requires a binding vector", form));
        };
        let Some(fn_forms) = bindings_form.as_vector() else {
            return Err(self.error("letfn requires a binding vector", form));
        };
        let b = Builder::at(self.arena, form);

        // Bind every name first so the fns see each other.
        let saved_locals = self.scope().locals.len();
        let saved_height = self.scope().height;
        let mut bindings: Vec<(Rc<str>, Node)> = Vec::new();
        let mut names: Vec<Rc<str>> = Vec::new();
        for fn_form in fn_forms {
            let Some([name_form, ..]) = fn_form.as_list().filter(|l| l.len() >= 2).map(|l| [l[0]])
            else {
                return Err(self.error("letfn binding must be (name [params] body...)", fn_form));
            };
            let Some((None, name)) = name_form.as_symbol() else {
                return Err(self.error("letfn binding name must be a symbol", fn_form));
            };
            let name: Rc<str> = name.into();
            let scope = self.scope();
            let slot = scope.height;
            scope.locals.push((name.clone(), slot));
            scope.height += 1;
            names.push(name);
        }

        let result = (|| {
            for (fn_form, name) in fn_forms.iter().zip(&names) {
                let items = fn_form.as_list().unwrap();
                let mut fn_items = vec![b.sym("fn*")];
                fn_items.extend_from_slice(items);
                let fn_wrapped = self.arena.alloc(b.list(&fn_items));
                let node = self.analyze(fn_wrapped)?;
                bindings.push((name.clone(), node));
            }
            let body_node = self.analyze_body(form, body)?;
            Ok(self.node(
                NodeKind::Letfn {
                    bindings,
                    body: Box::new(body_node),
                },
                form,
            ))
        })();
        let scope = self.scope();
        scope.locals.truncate(saved_locals);
        scope.height = saved_height;
        result
    }

    fn analyze_def(&mut self, form: &Form<'a>, args: &'a [Form<'a>]) -> Result<Node, Diagnostic> {
        let [name_form, init @ ..] = args else {
            return Err(self.error("def requires a name", form));
        };
        // The reader turns `(def ^:dynamic name init)` into
        // `(def (with-meta name {...}) init)`; unwrap and read flags.
        let (sym_form, macro_flag, dynamic_flag) = unwrap_def_meta(name_form);
        let Some((None, name)) = sym_form.as_symbol() else {
            return Err(self.error("def requires a plain symbol name", form));
        };
        if init.len() > 1 {
            return Err(self.error("def takes at most one initialiser", form));
        }

        // Intern before analyzing the initialiser so recursive
        // definitions resolve.
        let var = self.env.intern(name);
        if macro_flag {
            self.env.mark_macro(var);
        }
        if dynamic_flag || (name.starts_with('*') && name.ends_with('*') && name.len() > 2) {
            self.env.mark_dynamic(var);
        }
        let init = match init.first() {
            Some(f) => Some(Box::new(self.analyze(f)?)),
            None => None,
        };
        Ok(self.node(
            NodeKind::Def {
                var,
                init,
                macro_flag,
            },
            form,
        ))
    }

    fn analyze_try(&mut self, form: &Form<'a>, args: &'a [Form<'a>]) -> Result<Node, Diagnostic> {
        self.recur_arities.push(RECUR_BARRIER);
        let result = self.analyze_try_clauses(form, args);
        self.recur_arities.pop();
        result
    }

    fn analyze_try_clauses(
        &mut self,
        form: &Form<'a>,
        args: &'a [Form<'a>],
    ) -> Result<Node, Diagnostic> {
        let mut body_forms: Vec<Form<'a>> = Vec::new();
        let mut catch: Option<(Rc<str>, Box<Node>)> = None;
        let mut finally: Option<Box<Node>> = None;
        for item in args {
            if let Some(clause) = item.as_list() {
                if clause.first().is_some_and(|h| h.is_symbol("catch")) {
                    let [_, _class, binding, catch_body @ ..] = clause else {
                        return Err(self.error("catch requires a class and a binding", item));
                    };
                    let Some((None, bind_name)) = binding.as_symbol() else {
                        return Err(self.error("catch binding must be a symbol", item));
                    };
                    if catch.is_some() {
                        return Err(self.error("try supports a single catch clause", item));
                    }
                    // The binding occupies one new slot over the current
                    // frame for the catch body.
                    let saved_locals = self.scope().locals.len();
                    let saved_height = self.scope().height;
                    let name: Rc<str> = bind_name.into();
                    let scope = self.scope();
                    scope.locals.push((name.clone(), scope.height));
                    scope.height += 1;
                    let body_node = self.analyze_body(item, catch_body);
                    let scope = self.scope();
                    scope.locals.truncate(saved_locals);
                    scope.height = saved_height;
                    catch = Some((name, Box::new(body_node?)));
                    continue;
                }
                if clause.first().is_some_and(|h| h.is_symbol("finally")) {
                    if finally.is_some() {
                        return Err(self.error("try supports a single finally clause", item));
                    }
                    finally = Some(Box::new(self.analyze_body(item, &clause[1..])?));
                    continue;
                }
            }
            if catch.is_some() || finally.is_some() {
                return Err(self.error("try body form after catch/finally", item));
            }
            body_forms.push(*item);
        }
        let body = self.analyze_body(form, self.arena.alloc_slice_copy(&body_forms))?;
        Ok(self.node(
            NodeKind::Try {
                body: Box::new(body),
                catch,
                finally,
            },
            form,
        ))
    }

    /// Convert a Form into the Value it denotes when quoted. This is the
    /// deep-clone out of the scratch arena: the resulting value owns all
    /// of its data.
    pub fn form_to_value(&self, form: &Form<'a>) -> Result<Value, Diagnostic> {
        Ok(match form.kind {
            FormKind::Nil => Value::Nil,
            FormKind::Bool(b) => Value::Bool(b),
            FormKind::Int(n) => Value::Int(n),
            FormKind::Double(d) => Value::Double(d),
            // Ratios narrow to doubles; see the design notes.
            FormKind::Ratio(p, q) => Value::Double(p as f64 / q as f64),
            FormKind::Str(s) => Value::string(s),
            FormKind::Char(c) => Value::Char(c),
            FormKind::Symbol { ns, name } => Value::Symbol(Rc::new(match ns {
                Some(ns) => Sym::qualified(ns, name),
                None => Sym::simple(name),
            })),
            FormKind::Keyword { ns, name } => Value::Keyword(Rc::new(match ns {
                Some(ns) => Sym::qualified(ns, name),
                None => Sym::simple(name),
            })),
            FormKind::Regex(src) => Value::Regex(Rc::new(regex::Regex::new(src).map_err(
                |e| Diagnostic::lex(format!("invalid regex: {}", e), self.pos(form)),
            )?)),
            FormKind::List(items) => Value::List(Rc::new(PList::new(
                items
                    .iter()
                    .map(|f| self.form_to_value(f))
                    .collect::<Result<Vec<_>, _>>()?,
            ))),
            FormKind::Vector(items) => Value::Vector(Rc::new(PVector::new(
                items
                    .iter()
                    .map(|f| self.form_to_value(f))
                    .collect::<Result<Vec<_>, _>>()?,
            ))),
            FormKind::Map(items) => {
                let kvs = items
                    .iter()
                    .map(|f| self.form_to_value(f))
                    .collect::<Result<Vec<_>, _>>()?;
                Value::Map(Rc::new(PMap::from_interleaved(kvs)))
            }
            FormKind::Set(items) => Value::Set(Rc::new(PSet::new(
                items
                    .iter()
                    .map(|f| self.form_to_value(f))
                    .collect::<Result<Vec<_>, _>>()?,
            ))),
        })
    }
}

/// Unwrap `(with-meta sym {...})` in def name position, reading the
/// :macro and :dynamic flags from a constant meta map.
fn unwrap_def_meta<'a>(form: &'a Form<'a>) -> (&'a Form<'a>, bool, bool) {
    let Some(items) = form.as_list() else {
        return (form, false, false);
    };
    let [head, target, meta] = items else {
        return (form, false, false);
    };
    if !head.is_symbol("with-meta") {
        return (form, false, false);
    }
    let mut macro_flag = false;
    let mut dynamic_flag = false;
    if let FormKind::Map(kvs) = meta.kind {
        for pair in kvs.chunks_exact(2) {
            let truthy = !matches!(pair[1].kind, FormKind::Nil | FormKind::Bool(false));
            match pair[0].kind {
                FormKind::Keyword { ns: None, name: "macro" } => macro_flag = truthy,
                FormKind::Keyword { ns: None, name: "dynamic" } => dynamic_flag = truthy,
                _ => {}
            }
        }
    }
    (target, macro_flag, dynamic_flag)
}

/// Collect enclosing-frame names referenced anywhere in a fn body.
/// Shadowing inside the body can only cause benign over-capture.
fn scan_captures(form: &Form<'_>, scope: &Scope, out: &mut Vec<(Rc<str>, u16)>) {
    match form.kind {
        FormKind::Symbol { ns: None, name } => {
            if let Some(slot) = scope.lookup(name) {
                if !out.iter().any(|(n, _)| &**n == name) {
                    out.push((name.into(), slot));
                }
            }
        }
        _ => {
            if let Some(items) = form.children() {
                for item in items {
                    scan_captures(item, scope, out);
                }
            }
        }
    }
}

/// Fold a pure arithmetic/comparison call over numeric literal operands.
fn fold_arith(op: BinOp, args: &[Node]) -> Option<Value> {
    #[derive(Clone, Copy)]
    enum Num {
        I(i64),
        D(f64),
    }
    let nums: Vec<Num> = args
        .iter()
        .map(|n| match &n.kind {
            NodeKind::Const(Value::Int(i)) => Some(Num::I(*i)),
            NodeKind::Const(Value::Double(d)) => Some(Num::D(*d)),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    if nums.is_empty() {
        return None;
    }

    let as_f = |n: Num| match n {
        Num::I(i) => i as f64,
        Num::D(d) => d,
    };
    let all_int = nums.iter().all(|n| matches!(n, Num::I(_)));

    match op {
        BinOp::Nth => None,
        BinOp::Add | BinOp::Sub | BinOp::Mul => {
            if all_int {
                let ints: Vec<i64> = nums
                    .iter()
                    .map(|n| match n {
                        Num::I(i) => *i,
                        Num::D(_) => unreachable!(),
                    })
                    .collect();
                let mut acc = ints[0];
                for &x in &ints[1..] {
                    acc = match op {
                        BinOp::Add => acc.checked_add(x)?,
                        BinOp::Sub => acc.checked_sub(x)?,
                        BinOp::Mul => acc.checked_mul(x)?,
                        _ => unreachable!(),
                    };
                }
                // Unary minus negates.
                if ints.len() == 1 && op == BinOp::Sub {
                    acc = ints[0].checked_neg()?;
                }
                Some(Value::Int(acc))
            } else {
                let mut acc = as_f(nums[0]);
                for n in &nums[1..] {
                    acc = match op {
                        BinOp::Add => acc + as_f(*n),
                        BinOp::Sub => acc - as_f(*n),
                        BinOp::Mul => acc * as_f(*n),
                        _ => unreachable!(),
                    };
                }
                if nums.len() == 1 && op == BinOp::Sub {
                    acc = -as_f(nums[0]);
                }
                Some(Value::Double(acc))
            }
        }
        BinOp::Div => {
            // Exact integer division folds to an int, inexact to a
            // double; division by zero is left for runtime to report.
            let mut acc = match nums[0] {
                Num::I(i) => Num::I(i),
                Num::D(d) => Num::D(d),
            };
            let rest: &[Num] = if nums.len() == 1 {
                // (/ x) is 1/x.
                acc = Num::I(1);
                &nums[0..1]
            } else {
                &nums[1..]
            };
            for n in rest {
                match (acc, *n) {
                    (Num::I(a), Num::I(b)) => {
                        if b == 0 {
                            return None;
                        }
                        if a % b == 0 {
                            acc = Num::I(a / b);
                        } else {
                            acc = Num::D(a as f64 / b as f64);
                        }
                    }
                    (a, b) => {
                        if as_f(b) == 0.0 {
                            return None;
                        }
                        acc = Num::D(as_f(a) / as_f(b));
                    }
                }
            }
            Some(match acc {
                Num::I(i) => Value::Int(i),
                Num::D(d) => Value::Double(d),
            })
        }
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq => {
            let ok = nums.windows(2).all(|w| {
                let (a, b) = (w[0], w[1]);
                match op {
                    BinOp::Lt => as_f(a) < as_f(b),
                    BinOp::Gt => as_f(a) > as_f(b),
                    BinOp::Le => as_f(a) <= as_f(b),
                    BinOp::Ge => as_f(a) >= as_f(b),
                    BinOp::Eq => match (a, b) {
                        (Num::I(x), Num::I(y)) => x == y,
                        (Num::D(x), Num::D(y)) => x == y,
                        // Mixed int/double are never `=`.
                        _ => false,
                    },
                    _ => unreachable!(),
                }
            });
            Some(Value::Bool(ok))
        }
    }
}
