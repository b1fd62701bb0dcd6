//! Syntax-quote expansion
//!
//! Rewrites `` `form `` into constructor calls that rebuild the form at
//! runtime. Unqualified symbols resolve against the current namespace (or
//! the namespace of the var they name), `~` splices an evaluated
//! expression in, `~@` splices a sequence, and `sym#` generates one fresh
//! symbol per expansion shared by every occurrence of that name.

use std::collections::HashMap;

use bumpalo::Bump;
use loam_core::diagnostics::{Diagnostic, SourcePos};
use loam_core::form::{Form, FormKind};

use crate::analyzer::VarResolver;
use crate::builder::Builder;

/// Names that stay unqualified when quoted: special forms and binding
/// punctuation that must survive macro templates verbatim.
const UNQUALIFIED: &[&str] = &[
    "if", "do", "let*", "loop*", "recur", "fn*", "def", "quote", "var", "try", "throw", "catch",
    "finally", "defmulti", "defmethod", "&", "let", "loop", "fn",
];

pub struct SyntaxQuote<'a, 'e, R: VarResolver> {
    arena: &'a Bump,
    resolver: &'e mut R,
    file: std::rc::Rc<str>,
    /// Per-expansion auto-gensym table: every `foo#` in one syntax-quote
    /// names the same generated symbol.
    gensyms: HashMap<&'a str, &'a str>,
    counter: &'e mut u64,
}

impl<'a, 'e, R: VarResolver> SyntaxQuote<'a, 'e, R> {
    pub fn new(
        arena: &'a Bump,
        resolver: &'e mut R,
        file: std::rc::Rc<str>,
        counter: &'e mut u64,
    ) -> Self {
        SyntaxQuote {
            arena,
            resolver,
            file,
            gensyms: HashMap::new(),
            counter,
        }
    }

    pub fn expand(&mut self, form: Form<'a>) -> Result<Form<'a>, Diagnostic> {
        let b = Builder::at(self.arena, &form);
        match form.kind {
            FormKind::Symbol { ns, name } => Ok(b.list(&[b.sym("quote"), self.quote_symbol(b, ns, name)])),
            FormKind::List(items) => {
                if let Some(inner) = unary(items, "unquote") {
                    return Ok(inner);
                }
                if unary(items, "unquote-splicing").is_some() {
                    return Err(Diagnostic::analysis(
                        "unquote-splicing outside a collection",
                        self.pos(&form),
                    ));
                }
                if items.first().is_some_and(|f| f.is_symbol("syntax-quote")) {
                    return Err(Diagnostic::analysis(
                        "nested syntax-quote is not supported",
                        self.pos(&form),
                    ));
                }
                if items.is_empty() {
                    return Ok(b.call("list", &[]));
                }
                let concat = self.expand_segments(b, items)?;
                Ok(b.call("seq", &[concat]))
            }
            FormKind::Vector(items) => {
                let concat = self.expand_segments(b, items)?;
                Ok(b.call("vec", &[concat]))
            }
            FormKind::Set(items) => {
                let concat = self.expand_segments(b, items)?;
                Ok(b.call("set", &[concat]))
            }
            FormKind::Map(items) => {
                let concat = self.expand_segments(b, items)?;
                Ok(b.call("apply", &[b.sym("hash-map"), concat]))
            }
            // Self-evaluating literals pass through unchanged.
            _ => Ok(form),
        }
    }

    /// Build `(concat seg...)` where runs of plain elements become
    /// `(list e1 e2 ...)` and each `~@x` contributes `x` directly.
    fn expand_segments(
        &mut self,
        b: Builder<'a>,
        items: &'a [Form<'a>],
    ) -> Result<Form<'a>, Diagnostic> {
        let mut segments: Vec<Form<'a>> = Vec::new();
        let mut run: Vec<Form<'a>> = Vec::new();
        for item in items {
            if let Some(spliced) = item.as_list().and_then(|l| unary(l, "unquote-splicing")) {
                if !run.is_empty() {
                    segments.push(b.call("list", &run));
                    run.clear();
                }
                segments.push(spliced);
            } else {
                run.push(self.expand(*item)?);
            }
        }
        if !run.is_empty() {
            segments.push(b.call("list", &run));
        }
        Ok(b.call("concat", &segments))
    }

    fn quote_symbol(&mut self, b: Builder<'a>, ns: Option<&'a str>, name: &'a str) -> Form<'a> {
        if let Some(ns) = ns {
            return b.qualified_sym(ns, name);
        }
        if UNQUALIFIED.contains(&name) {
            return b.sym(name);
        }
        if let Some(stem) = name.strip_suffix('#') {
            if let Some(generated) = self.gensyms.get(name) {
                return b.sym(generated);
            }
            *self.counter += 1;
            let generated =
                &*self.arena.alloc_str(&format!("{}__{}__auto__", stem, self.counter));
            self.gensyms.insert(name, generated);
            return b.sym(generated);
        }
        match self.resolver.resolve(None, name) {
            Some(id) => {
                let (var_ns, var_name) = self.resolver.var_ns_name(id);
                b.qualified_sym(&var_ns, &var_name)
            }
            None => b.qualified_sym(&self.resolver.current_ns(), name),
        }
    }

    fn pos(&self, form: &Form<'_>) -> SourcePos {
        SourcePos::new(self.file.clone(), form.line, form.column)
    }
}

/// `(head x)` -> Some(x) when head matches.
fn unary<'a>(items: &'a [Form<'a>], head: &str) -> Option<Form<'a>> {
    match items {
        [h, x] if h.is_symbol(head) => Some(*x),
        _ => None,
    }
}
