//! Arena Form constructors
//!
//! Shared by macro expansion, destructuring, and syntax-quote, all of
//! which rewrite Form trees in place of the ones the Reader produced.
//! Positions are inherited from the form being rewritten so diagnostics
//! keep pointing at user code.

use bumpalo::Bump;
use loam_core::form::{Form, FormKind};

#[derive(Clone, Copy)]
pub struct Builder<'a> {
    pub arena: &'a Bump,
    pub line: u32,
    pub column: u32,
}

impl<'a> Builder<'a> {
    pub fn at(arena: &'a Bump, form: &Form<'a>) -> Self {
        Builder {
            arena,
            line: form.line,
            column: form.column,
        }
    }

    fn form(&self, kind: FormKind<'a>) -> Form<'a> {
        Form::new(kind, self.line, self.column)
    }

    pub fn nil(&self) -> Form<'a> {
        self.form(FormKind::Nil)
    }

    pub fn bool(&self, b: bool) -> Form<'a> {
        self.form(FormKind::Bool(b))
    }

    pub fn int(&self, n: i64) -> Form<'a> {
        self.form(FormKind::Int(n))
    }

    pub fn sym(&self, name: &str) -> Form<'a> {
        self.form(FormKind::Symbol {
            ns: None,
            name: self.arena.alloc_str(name),
        })
    }

    pub fn qualified_sym(&self, ns: &str, name: &str) -> Form<'a> {
        self.form(FormKind::Symbol {
            ns: Some(self.arena.alloc_str(ns)),
            name: self.arena.alloc_str(name),
        })
    }

    pub fn kw(&self, name: &str) -> Form<'a> {
        self.form(FormKind::Keyword {
            ns: None,
            name: self.arena.alloc_str(name),
        })
    }

    pub fn str(&self, s: &str) -> Form<'a> {
        self.form(FormKind::Str(self.arena.alloc_str(s)))
    }

    pub fn list(&self, items: &[Form<'a>]) -> Form<'a> {
        self.form(FormKind::List(self.arena.alloc_slice_copy(items)))
    }

    pub fn vector(&self, items: &[Form<'a>]) -> Form<'a> {
        self.form(FormKind::Vector(self.arena.alloc_slice_copy(items)))
    }

    pub fn map(&self, kvs: &[Form<'a>]) -> Form<'a> {
        self.form(FormKind::Map(self.arena.alloc_slice_copy(kvs)))
    }

    /// `(head args...)`
    pub fn call(&self, head: &str, args: &[Form<'a>]) -> Form<'a> {
        let mut items = Vec::with_capacity(args.len() + 1);
        items.push(self.sym(head));
        items.extend_from_slice(args);
        self.list(&items)
    }
}
