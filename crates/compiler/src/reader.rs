//! Reader - tokens to Form trees
//!
//! Consumes the token stream, converts literals (numeric conversion,
//! string escape decoding), assembles collections, and desugars reader
//! macros into plain list forms (`'x` becomes `(quote x)` and so on).
//! Everything is allocated in the scratch arena and borrows the source
//! text, so a read form is only valid until the next arena reset.

use bumpalo::Bump;
use std::rc::Rc;

use loam_core::diagnostics::{Diagnostic, SourcePos};
use loam_core::form::{Form, FormKind};

use crate::token::{Token, TokenKind, Tokenizer};

pub struct Reader<'a> {
    tokenizer: Tokenizer<'a>,
    arena: &'a Bump,
    file: Rc<str>,
    /// Namespace used to resolve `::kw` auto-keywords.
    current_ns: Rc<str>,
    /// `#(...)` does not nest.
    in_fn_short: bool,
}

impl<'a> Reader<'a> {
    pub fn new(src: &'a str, arena: &'a Bump, file: Rc<str>, current_ns: Rc<str>) -> Self {
        Reader {
            tokenizer: Tokenizer::new(src, file.clone()),
            arena,
            file,
            current_ns,
            in_fn_short: false,
        }
    }

    /// Resume reading at a saved stream position (see
    /// [`Tokenizer::stream_position`]).
    pub fn new_at(
        src: &'a str,
        arena: &'a Bump,
        file: Rc<str>,
        current_ns: Rc<str>,
        pos: (usize, u32, u32),
    ) -> Self {
        Reader {
            tokenizer: Tokenizer::new_at(src, file.clone(), pos.0, pos.1, pos.2),
            arena,
            file,
            current_ns,
            in_fn_short: false,
        }
    }

    pub fn stream_position(&self) -> (usize, u32, u32) {
        self.tokenizer.stream_position()
    }

    fn next_token(&mut self) -> Result<Token<'a>, Diagnostic> {
        self.tokenizer.next_token()
    }

    fn pos_of(&self, token: &Token<'a>) -> SourcePos {
        SourcePos::new(self.file.clone(), token.line, token.column)
    }

    fn form(&self, kind: FormKind<'a>, token: &Token<'a>) -> Form<'a> {
        Form::new(kind, token.line, token.column)
    }

    /// Read every top-level form in the source.
    pub fn read_all(&mut self) -> Result<Vec<Form<'a>>, Diagnostic> {
        let mut forms = Vec::new();
        while let Some(form) = self.read_form()? {
            forms.push(form);
        }
        Ok(forms)
    }

    /// Read one form; None at end of input.
    pub fn read_form(&mut self) -> Result<Option<Form<'a>>, Diagnostic> {
        let token = self.next_token()?;
        match token.kind {
            TokenKind::Eof => Ok(None),
            TokenKind::Discard => {
                // #_ drops the next form and yields the one after it.
                self.read_required(&token)?;
                self.read_form()
            }
            _ => self.read_token(token).map(Some),
        }
    }

    /// Read a form, erroring at EOF (for positions where one is required).
    fn read_required(&mut self, opener: &Token<'a>) -> Result<Form<'a>, Diagnostic> {
        match self.read_form()? {
            Some(form) => Ok(form),
            None => Err(Diagnostic::parse(
                "unexpected end of input",
                self.pos_of(opener),
            )),
        }
    }

    fn read_token(&mut self, token: Token<'a>) -> Result<Form<'a>, Diagnostic> {
        match token.kind {
            TokenKind::LParen => self.read_delimited(&token, TokenKind::RParen, |items| {
                FormKind::List(items)
            }),
            TokenKind::LBracket => self.read_delimited(&token, TokenKind::RBracket, |items| {
                FormKind::Vector(items)
            }),
            TokenKind::LBrace => {
                let form = self.read_delimited(&token, TokenKind::RBrace, FormKind::Map)?;
                if let FormKind::Map(items) = form.kind {
                    if items.len() % 2 != 0 {
                        return Err(Diagnostic::parse(
                            "map literal must contain an even number of forms",
                            self.pos_of(&token),
                        ));
                    }
                }
                Ok(form)
            }
            TokenKind::SetOpen => {
                self.read_delimited(&token, TokenKind::RBrace, FormKind::Set)
            }
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => Err(Diagnostic::parse(
                format!("unmatched delimiter '{}'", token.text),
                self.pos_of(&token),
            )),
            TokenKind::Quote => self.wrap(&token, "quote"),
            TokenKind::SyntaxQuote => self.wrap(&token, "syntax-quote"),
            TokenKind::Unquote => self.wrap(&token, "unquote"),
            TokenKind::UnquoteSplicing => self.wrap(&token, "unquote-splicing"),
            TokenKind::Deref => self.wrap(&token, "deref"),
            TokenKind::VarQuote => self.wrap(&token, "var"),
            TokenKind::Meta => self.read_meta(&token),
            TokenKind::FnShort => self.read_fn_short(&token),
            TokenKind::SymbolicValue => self.read_symbolic(&token),
            TokenKind::ReaderCond => self.read_conditional(&token),
            TokenKind::Str => {
                let decoded = self.decode_string(token.text, &token)?;
                Ok(self.form(FormKind::Str(decoded), &token))
            }
            TokenKind::Regex => Ok(self.form(FormKind::Regex(token.text), &token)),
            TokenKind::Char => {
                let c = self.decode_char(token.text, &token)?;
                Ok(self.form(FormKind::Char(c), &token))
            }
            TokenKind::Int => {
                let n = parse_int(token.text)
                    .ok_or_else(|| Diagnostic::lex(
                        format!("invalid number '{}'", token.text),
                        self.pos_of(&token),
                    ))?;
                Ok(self.form(FormKind::Int(n), &token))
            }
            TokenKind::Float => {
                let d = parse_float(token.text).ok_or_else(|| {
                    Diagnostic::lex(
                        format!("invalid number '{}'", token.text),
                        self.pos_of(&token),
                    )
                })?;
                Ok(self.form(FormKind::Double(d), &token))
            }
            TokenKind::Ratio => {
                let (p, q) = parse_ratio(token.text).ok_or_else(|| {
                    Diagnostic::lex(
                        format!("invalid ratio '{}'", token.text),
                        self.pos_of(&token),
                    )
                })?;
                Ok(self.form(FormKind::Ratio(p, q), &token))
            }
            TokenKind::Keyword => self.read_keyword(&token),
            TokenKind::Symbol => Ok(self.read_symbol(&token)),
            TokenKind::Discard => {
                // #_ drops the next form and yields the one after it.
                self.read_required(&token)?;
                self.read_required(&token)
            }
            TokenKind::Eof => Err(Diagnostic::parse(
                "unexpected end of input",
                self.pos_of(&token),
            )),
        }
    }

    fn read_delimited(
        &mut self,
        opener: &Token<'a>,
        closer: TokenKind,
        build: impl FnOnce(&'a [Form<'a>]) -> FormKind<'a>,
    ) -> Result<Form<'a>, Diagnostic> {
        let mut items: Vec<Form<'a>> = Vec::new();
        loop {
            let token = self.next_token()?;
            match token.kind {
                k if k == closer => {
                    let slice = self.arena.alloc_slice_copy(&items);
                    return Ok(self.form(build(slice), opener));
                }
                TokenKind::Eof => {
                    return Err(Diagnostic::parse(
                        "unexpected end of input inside collection",
                        self.pos_of(opener),
                    ));
                }
                TokenKind::Discard => {
                    self.read_required(&token)?;
                }
                _ => items.push(self.read_token(token)?),
            }
        }
    }

    /// `'x` -> `(quote x)` and friends.
    fn wrap(&mut self, token: &Token<'a>, name: &'static str) -> Result<Form<'a>, Diagnostic> {
        let inner = self.read_required(token)?;
        let head = self.form(
            FormKind::Symbol {
                ns: None,
                name,
            },
            token,
        );
        let slice = self.arena.alloc_slice_copy(&[head, inner]);
        Ok(self.form(FormKind::List(slice), token))
    }

    /// `^meta form` -> `(with-meta form canonical-meta)`.
    fn read_meta(&mut self, token: &Token<'a>) -> Result<Form<'a>, Diagnostic> {
        let meta = self.read_required(token)?;
        let target = self.read_required(token)?;
        let canonical = match meta.kind {
            FormKind::Keyword { .. } => {
                let t = self.form(FormKind::Bool(true), token);
                FormKind::Map(self.arena.alloc_slice_copy(&[meta, t]))
            }
            FormKind::Symbol { .. } | FormKind::Str(_) => {
                let tag = self.form(
                    FormKind::Keyword {
                        ns: None,
                        name: "tag",
                    },
                    token,
                );
                FormKind::Map(self.arena.alloc_slice_copy(&[tag, meta]))
            }
            FormKind::Map(_) => meta.kind,
            _ => {
                return Err(Diagnostic::parse(
                    "metadata must be a keyword, symbol, string, or map",
                    self.pos_of(token),
                ));
            }
        };
        let meta_form = self.form(canonical, token);
        let head = self.form(
            FormKind::Symbol {
                ns: None,
                name: "with-meta",
            },
            token,
        );
        let slice = self.arena.alloc_slice_copy(&[head, target, meta_form]);
        Ok(self.form(FormKind::List(slice), token))
    }

    /// `#(body...)` -> `(fn* [%1 ... %&] (body...))`.
    fn read_fn_short(&mut self, token: &Token<'a>) -> Result<Form<'a>, Diagnostic> {
        if self.in_fn_short {
            return Err(Diagnostic::parse(
                "nested #() forms are not allowed",
                self.pos_of(token),
            ));
        }
        self.in_fn_short = true;
        let body = self.read_delimited(token, TokenKind::RParen, FormKind::List);
        self.in_fn_short = false;
        let body = body?;

        // Bare % aliases %1; discover the highest positional and whether
        // %& appears.
        let body = self.rename_percent(body);
        let mut max_arg = 0u32;
        let mut rest = false;
        scan_fn_args(&body, &mut max_arg, &mut rest);

        let mut params: Vec<Form<'a>> = Vec::new();
        for i in 1..=max_arg {
            let name = self.arena.alloc_str(&format!("%{}", i));
            params.push(self.form(FormKind::Symbol { ns: None, name }, token));
        }
        if rest {
            params.push(self.form(FormKind::Symbol { ns: None, name: "&" }, token));
            params.push(self.form(FormKind::Symbol { ns: None, name: "%&" }, token));
        }
        let params = self.form(FormKind::Vector(self.arena.alloc_slice_copy(&params)), token);
        let head = self.form(FormKind::Symbol { ns: None, name: "fn*" }, token);
        let slice = self.arena.alloc_slice_copy(&[head, params, body]);
        Ok(self.form(FormKind::List(slice), token))
    }

    /// Rewrite bare `%` to `%1` throughout a form tree.
    fn rename_percent(&self, form: Form<'a>) -> Form<'a> {
        match form.kind {
            FormKind::Symbol { ns: None, name: "%" } => Form {
                kind: FormKind::Symbol { ns: None, name: "%1" },
                ..form
            },
            FormKind::List(items) => self.rebuild(form, items, FormKind::List),
            FormKind::Vector(items) => self.rebuild(form, items, FormKind::Vector),
            FormKind::Map(items) => self.rebuild(form, items, FormKind::Map),
            FormKind::Set(items) => self.rebuild(form, items, FormKind::Set),
            _ => form,
        }
    }

    fn rebuild(
        &self,
        form: Form<'a>,
        items: &'a [Form<'a>],
        build: impl FnOnce(&'a [Form<'a>]) -> FormKind<'a>,
    ) -> Form<'a> {
        let rebuilt: Vec<Form<'a>> = items.iter().map(|f| self.rename_percent(*f)).collect();
        Form {
            kind: build(self.arena.alloc_slice_copy(&rebuilt)),
            ..form
        }
    }

    /// `##Inf`, `##-Inf`, `##NaN`.
    fn read_symbolic(&mut self, token: &Token<'a>) -> Result<Form<'a>, Diagnostic> {
        let name = self.next_token()?;
        let d = match (name.kind, name.text) {
            (TokenKind::Symbol, "Inf") => f64::INFINITY,
            (TokenKind::Symbol, "-Inf") => f64::NEG_INFINITY,
            (TokenKind::Symbol, "NaN") => f64::NAN,
            _ => {
                return Err(Diagnostic::parse(
                    format!("unknown symbolic value ##{}", name.text),
                    self.pos_of(token),
                ));
            }
        };
        Ok(self.form(FormKind::Double(d), token))
    }

    /// `#?(:clj a :default b)` keeps the :clj branch, else :default, else
    /// reads as nil. Other feature branches are read and dropped.
    fn read_conditional(&mut self, token: &Token<'a>) -> Result<Form<'a>, Diagnostic> {
        let body = self.read_required(token)?;
        let items = body.as_list().ok_or_else(|| {
            Diagnostic::parse("#? must be followed by a list", self.pos_of(token))
        })?;
        if items.len() % 2 != 0 {
            return Err(Diagnostic::parse(
                "#? list must contain feature/form pairs",
                self.pos_of(token),
            ));
        }
        let mut chosen: Option<Form<'a>> = None;
        let mut fallback: Option<Form<'a>> = None;
        for pair in items.chunks_exact(2) {
            match pair[0].kind {
                FormKind::Keyword { ns: None, name: "clj" } => {
                    chosen.get_or_insert(pair[1]);
                }
                FormKind::Keyword { ns: None, name: "default" } => {
                    fallback.get_or_insert(pair[1]);
                }
                _ => {}
            }
        }
        Ok(chosen
            .or(fallback)
            .unwrap_or_else(|| self.form(FormKind::Nil, token)))
    }

    fn read_keyword(&mut self, token: &Token<'a>) -> Result<Form<'a>, Diagnostic> {
        let text = token.text;
        let (auto, body) = if let Some(rest) = text.strip_prefix("::") {
            (true, rest)
        } else {
            (false, &text[1..])
        };
        if body.is_empty() {
            return Err(Diagnostic::lex("invalid keyword ':'", self.pos_of(token)));
        }
        let (ns, name) = if auto {
            (Some(&*self.arena.alloc_str(&self.current_ns)), body)
        } else {
            split_qualified(body)
        };
        Ok(self.form(FormKind::Keyword { ns, name }, token))
    }

    fn read_symbol(&mut self, token: &Token<'a>) -> Form<'a> {
        match token.text {
            "nil" => self.form(FormKind::Nil, token),
            "true" => self.form(FormKind::Bool(true), token),
            "false" => self.form(FormKind::Bool(false), token),
            text => {
                let (ns, name) = split_qualified(text);
                self.form(FormKind::Symbol { ns, name }, token)
            }
        }
    }

    fn decode_string(&self, raw: &str, token: &Token<'a>) -> Result<&'a str, Diagnostic> {
        if !raw.contains('\\') {
            return Ok(self.arena.alloc_str(raw));
        }
        let mut out = String::with_capacity(raw.len());
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('b') => out.push('\u{8}'),
                Some('f') => out.push('\u{c}'),
                Some('0') => out.push('\0'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some('u') => {
                    let hex: String = chars.by_ref().take(4).collect();
                    let code = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32);
                    match code {
                        Some(c) => out.push(c),
                        None => {
                            return Err(Diagnostic::lex(
                                format!("invalid unicode escape '\\u{}'", hex),
                                self.pos_of(token),
                            ));
                        }
                    }
                }
                other => {
                    return Err(Diagnostic::lex(
                        format!(
                            "unsupported escape '\\{}'",
                            other.map(String::from).unwrap_or_default()
                        ),
                        self.pos_of(token),
                    ));
                }
            }
        }
        Ok(self.arena.alloc_str(&out))
    }

    fn decode_char(&self, raw: &str, token: &Token<'a>) -> Result<char, Diagnostic> {
        let body = &raw[1..];
        match body {
            "newline" => return Ok('\n'),
            "space" => return Ok(' '),
            "tab" => return Ok('\t'),
            "return" => return Ok('\r'),
            "backspace" => return Ok('\u{8}'),
            "formfeed" => return Ok('\u{c}'),
            _ => {}
        }
        if let Some(hex) = body.strip_prefix('u') {
            if hex.len() == 4 {
                if let Some(c) = u32::from_str_radix(hex, 16).ok().and_then(char::from_u32) {
                    return Ok(c);
                }
            }
            return Err(Diagnostic::lex(
                format!("invalid character literal '{}'", raw),
                self.pos_of(token),
            ));
        }
        let mut chars = body.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(Diagnostic::lex(
                format!("invalid character literal '{}'", raw),
                self.pos_of(token),
            )),
        }
    }
}

/// Split `ns/name`; a lone `/` is the division symbol.
fn split_qualified(text: &str) -> (Option<&str>, &str) {
    if text == "/" {
        return (None, text);
    }
    match text.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() => (Some(ns), name),
        _ => (None, text),
    }
}

fn scan_fn_args(form: &Form<'_>, max_arg: &mut u32, rest: &mut bool) {
    match form.kind {
        FormKind::Symbol { ns: None, name } => {
            if name == "%&" {
                *rest = true;
            } else if let Some(n) = name.strip_prefix('%') {
                if let Ok(n) = n.parse::<u32>() {
                    *max_arg = (*max_arg).max(n);
                }
            }
        }
        _ => {
            if let Some(items) = form.children() {
                for item in items {
                    scan_fn_args(item, max_arg, rest);
                }
            }
        }
    }
}

/// Parse an integer literal: decimal, hex `0x`, radix `NNr...`,
/// zero-prefixed octal (bare `0` falls back to decimal), optional `N`
/// suffix (narrowed to i64).
fn parse_int(text: &str) -> Option<i64> {
    let (neg, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let body = body.strip_suffix('N').unwrap_or(body);
    if body.is_empty() {
        return None;
    }
    let magnitude = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(at) = body.find(['r', 'R']) {
        let radix: u32 = body[..at].parse().ok()?;
        if !(2..=36).contains(&radix) {
            return None;
        }
        i64::from_str_radix(&body[at + 1..], radix).ok()?
    } else if body.len() > 1 && body.starts_with('0') && body.bytes().all(|b| b.is_ascii_digit()) {
        i64::from_str_radix(&body[1..], 8).ok()?
    } else {
        body.parse::<i64>().ok()?
    };
    Some(if neg { -magnitude } else { magnitude })
}

fn parse_float(text: &str) -> Option<f64> {
    let body = text.strip_suffix('M').unwrap_or(text);
    body.parse::<f64>().ok()
}

fn parse_ratio(text: &str) -> Option<(i64, i64)> {
    let (p, q) = text.split_once('/')?;
    let p: i64 = p.parse().ok()?;
    let q: i64 = q.parse().ok()?;
    if q <= 0 {
        return None;
    }
    Some((p, q))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_one<'a>(arena: &'a Bump, src: &'a str) -> Form<'a> {
        let mut reader = Reader::new(src, arena, "test.clj".into(), "user".into());
        reader.read_form().unwrap().unwrap()
    }

    fn read_err(src: &str) -> Diagnostic {
        let arena = Bump::new();
        let mut reader = Reader::new(src, &arena, "test.clj".into(), "user".into());
        loop {
            match reader.read_form() {
                Err(e) => return e,
                Ok(None) => panic!("expected an error reading {:?}", src),
                Ok(Some(_)) => {}
            }
        }
    }

    #[test]
    fn test_literals() {
        let arena = Bump::new();
        assert_eq!(read_one(&arena, "42").kind, FormKind::Int(42));
        assert_eq!(read_one(&arena, "0x10").kind, FormKind::Int(16));
        assert_eq!(read_one(&arena, "2r101").kind, FormKind::Int(5));
        assert_eq!(read_one(&arena, "017").kind, FormKind::Int(15));
        assert_eq!(read_one(&arena, "0").kind, FormKind::Int(0));
        assert_eq!(read_one(&arena, "7N").kind, FormKind::Int(7));
        assert_eq!(read_one(&arena, "1.5").kind, FormKind::Double(1.5));
        assert_eq!(read_one(&arena, "1/2").kind, FormKind::Ratio(1, 2));
        assert_eq!(read_one(&arena, "nil").kind, FormKind::Nil);
        assert_eq!(read_one(&arena, "true").kind, FormKind::Bool(true));
        assert_eq!(read_one(&arena, "\\a").kind, FormKind::Char('a'));
        assert_eq!(read_one(&arena, "\\newline").kind, FormKind::Char('\n'));
        assert_eq!(read_one(&arena, "\\u0041").kind, FormKind::Char('A'));
    }

    #[test]
    fn test_string_escape_decoding() {
        let arena = Bump::new();
        assert_eq!(read_one(&arena, "\"a\\nb\"").kind, FormKind::Str("a\nb"));
        assert_eq!(read_one(&arena, "\"\\u0041\"").kind, FormKind::Str("A"));
    }

    #[test]
    fn test_quote_desugar() {
        let arena = Bump::new();
        let form = read_one(&arena, "'x");
        let items = form.as_list().unwrap();
        assert!(items[0].is_symbol("quote"));
        assert!(items[1].is_symbol("x"));
    }

    #[test]
    fn test_discard() {
        let arena = Bump::new();
        let form = read_one(&arena, "#_ 1 2");
        assert_eq!(form.kind, FormKind::Int(2));
        let form = read_one(&arena, "(1 #_2 3)");
        let items = form.as_list().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].kind, FormKind::Int(3));
    }

    #[test]
    fn test_fn_short_params() {
        let arena = Bump::new();
        let form = read_one(&arena, "#(+ % %2)");
        let items = form.as_list().unwrap();
        assert!(items[0].is_symbol("fn*"));
        let params = items[1].as_vector().unwrap();
        assert_eq!(params.len(), 2);
        assert!(params[0].is_symbol("%1"));
        assert!(params[1].is_symbol("%2"));
        // Bare % was renamed in the body.
        let body = items[2].as_list().unwrap();
        assert!(body[1].is_symbol("%1"));
    }

    #[test]
    fn test_fn_short_rest() {
        let arena = Bump::new();
        let form = read_one(&arena, "#(apply + %&)");
        let params = form.as_list().unwrap()[1].as_vector().unwrap();
        assert!(params[0].is_symbol("&"));
        assert!(params[1].is_symbol("%&"));
    }

    #[test]
    fn test_symbolic_values() {
        let arena = Bump::new();
        assert_eq!(read_one(&arena, "##Inf").kind, FormKind::Double(f64::INFINITY));
        assert!(matches!(read_one(&arena, "##NaN").kind, FormKind::Double(d) if d.is_nan()));
    }

    #[test]
    fn test_meta_canonicalisation() {
        let arena = Bump::new();
        // Keyword meta becomes {:kw true}.
        let form = read_one(&arena, "^:dynamic x");
        let items = form.as_list().unwrap();
        assert!(items[0].is_symbol("with-meta"));
        let FormKind::Map(kvs) = items[2].kind else {
            panic!("expected map meta");
        };
        assert!(matches!(kvs[0].kind, FormKind::Keyword { name: "dynamic", .. }));
        assert_eq!(kvs[1].kind, FormKind::Bool(true));

        // Symbol meta becomes {:tag sym}.
        let form = read_one(&arena, "^String s");
        let FormKind::Map(kvs) = form.as_list().unwrap()[2].kind else {
            panic!("expected map meta");
        };
        assert!(matches!(kvs[0].kind, FormKind::Keyword { name: "tag", .. }));
    }

    #[test]
    fn test_reader_conditional() {
        let arena = Bump::new();
        assert_eq!(read_one(&arena, "#?(:clj 1 :cljs 2)").kind, FormKind::Int(1));
        assert_eq!(read_one(&arena, "#?(:cljs 2 :default 3)").kind, FormKind::Int(3));
        assert_eq!(read_one(&arena, "#?(:cljs 2)").kind, FormKind::Nil);
    }

    #[test]
    fn test_auto_keyword() {
        let arena = Bump::new();
        let form = read_one(&arena, "::local");
        assert!(matches!(
            form.kind,
            FormKind::Keyword { ns: Some("user"), name: "local" }
        ));
    }

    #[test]
    fn test_errors() {
        assert_eq!(read_err("(1 2").kind, loam_core::diagnostics::ErrorKind::Parse);
        assert_eq!(read_err(")").kind, loam_core::diagnostics::ErrorKind::Parse);
        assert_eq!(read_err("{:a}").kind, loam_core::diagnostics::ErrorKind::Parse);
        assert_eq!(read_err("1/0").kind, loam_core::diagnostics::ErrorKind::Lex);
        assert_eq!(read_err("\"\\q\"").kind, loam_core::diagnostics::ErrorKind::Lex);
    }

    #[test]
    fn test_roundtrip_print_read() {
        let arena = Bump::new();
        let src = "(defn area [w h] {:w w, :h h, :tags #{:a :b}} [1 2.5 \"s\" \\c nil])";
        let form = read_one(&arena, src);
        let printed = form.to_string();
        let arena2 = Bump::new();
        let printed_str = arena2.alloc_str(&printed);
        let reread = {
            let mut reader = Reader::new(printed_str, &arena2, "t.clj".into(), "user".into());
            reader.read_form().unwrap().unwrap()
        };
        assert_eq!(form.to_string(), reread.to_string());
    }
}
