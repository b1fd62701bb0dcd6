//! Form - the syntactic tree produced by the Reader
//!
//! Forms are pre-semantic: a symbol is just a name, a list is just a
//! sequence. They live in the scratch arena and borrow string data from it
//! (or directly from the source text), so the whole tree is dropped in one
//! arena reset at the next top-level expression boundary. The Analyzer is
//! the only consumer and converts everything it keeps into owned data.

use std::fmt;

/// A single read form with its source position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Form<'a> {
    pub kind: FormKind<'a>,
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FormKind<'a> {
    Nil,
    Bool(bool),
    Int(i64),
    Double(f64),
    /// Ratio literal `p/q`. Folded to a double downstream; kept distinct
    /// here so the printer can round-trip the source notation.
    Ratio(i64, i64),
    Str(&'a str),
    Char(char),
    Symbol { ns: Option<&'a str>, name: &'a str },
    Keyword { ns: Option<&'a str>, name: &'a str },
    /// Regex literal source (the text between `#"` and `"`), undecoded.
    Regex(&'a str),
    List(&'a [Form<'a>]),
    Vector(&'a [Form<'a>]),
    /// Flat key/value sequence; the Reader guarantees even length.
    Map(&'a [Form<'a>]),
    Set(&'a [Form<'a>]),
}

impl<'a> Form<'a> {
    pub fn new(kind: FormKind<'a>, line: u32, column: u32) -> Self {
        Form { kind, line, column }
    }

    /// The form's children if it is a composite, else None.
    pub fn children(&self) -> Option<&'a [Form<'a>]> {
        match self.kind {
            FormKind::List(items)
            | FormKind::Vector(items)
            | FormKind::Map(items)
            | FormKind::Set(items) => Some(items),
            _ => None,
        }
    }

    /// True when this form is the symbol `name` (no namespace).
    pub fn is_symbol(&self, name: &str) -> bool {
        matches!(self.kind, FormKind::Symbol { ns: None, name: n } if n == name)
    }

    pub fn as_symbol(&self) -> Option<(Option<&'a str>, &'a str)> {
        match self.kind {
            FormKind::Symbol { ns, name } => Some((ns, name)),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&'a [Form<'a>]> {
        match self.kind {
            FormKind::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&'a [Form<'a>]> {
        match self.kind {
            FormKind::Vector(items) => Some(items),
            _ => None,
        }
    }

    /// True for forms the Analyzer can treat as compile-time constants
    /// without evaluating anything.
    pub fn is_constant(&self) -> bool {
        match self.kind {
            FormKind::Nil
            | FormKind::Bool(_)
            | FormKind::Int(_)
            | FormKind::Double(_)
            | FormKind::Ratio(_, _)
            | FormKind::Str(_)
            | FormKind::Char(_)
            | FormKind::Keyword { .. } => true,
            FormKind::Vector(items) | FormKind::Map(items) | FormKind::Set(items) => {
                items.iter().all(|f| f.is_constant())
            }
            _ => false,
        }
    }
}

fn write_delimited(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    close: &str,
    items: &[Form<'_>],
) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str(close)
}

/// Prints a form back to readable source text. `read(print(f))` yields a
/// structurally equal form for any tree without reader extensions.
impl fmt::Display for Form<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FormKind::Nil => f.write_str("nil"),
            FormKind::Bool(b) => write!(f, "{}", b),
            FormKind::Int(n) => write!(f, "{}", n),
            FormKind::Double(d) => {
                if d.is_infinite() {
                    f.write_str(if d > 0.0 { "##Inf" } else { "##-Inf" })
                } else if d.is_nan() {
                    f.write_str("##NaN")
                } else if d == d.trunc() {
                    write!(f, "{:.1}", d)
                } else {
                    write!(f, "{}", d)
                }
            }
            FormKind::Ratio(p, q) => write!(f, "{}/{}", p, q),
            FormKind::Str(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        '\t' => f.write_str("\\t")?,
                        '\r' => f.write_str("\\r")?,
                        _ => write!(f, "{}", c)?,
                    }
                }
                f.write_str("\"")
            }
            FormKind::Char(c) => match c {
                '\n' => f.write_str("\\newline"),
                ' ' => f.write_str("\\space"),
                '\t' => f.write_str("\\tab"),
                '\r' => f.write_str("\\return"),
                _ => write!(f, "\\{}", c),
            },
            FormKind::Symbol { ns: Some(ns), name } => write!(f, "{}/{}", ns, name),
            FormKind::Symbol { ns: None, name } => f.write_str(name),
            FormKind::Keyword { ns: Some(ns), name } => write!(f, ":{}/{}", ns, name),
            FormKind::Keyword { ns: None, name } => write!(f, ":{}", name),
            FormKind::Regex(src) => write!(f, "#\"{}\"", src),
            FormKind::List(items) => write_delimited(f, "(", ")", items),
            FormKind::Vector(items) => write_delimited(f, "[", "]", items),
            FormKind::Map(items) => write_delimited(f, "{", "}", items),
            FormKind::Set(items) => write_delimited(f, "#{", "}", items),
        }
    }
}
