//! Diagnostics for the whole pipeline
//!
//! One structured error type covers every stage: lexing, reading, analysis,
//! execution, and internal invariant failures. Each diagnostic carries a
//! kind (for programmatic matching), a human message, and an optional
//! source position (file, 1-based line, 0-based column).

use std::fmt;
use std::rc::Rc;

/// Position within a source file. Lines are 1-based for display, columns
/// are 0-based, matching editor conventions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePos {
    pub file: Rc<str>,
    pub line: u32,
    pub column: u32,
}

impl SourcePos {
    pub fn new(file: Rc<str>, line: u32, column: u32) -> Self {
        SourcePos { file, line, column }
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Category of a diagnostic, used for programmatic matching and for the
/// catchability rules: only `Runtime` errors (and thrown user values, which
/// travel outside this type) can be caught by `try`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Tokenizer-level failure: unterminated string, bad number, bad escape.
    Lex,
    /// Reader-level failure: unmatched delimiter, odd map literal, EOF
    /// inside a collection.
    Parse,
    /// Analyzer-level failure: undefined symbol, invalid special form,
    /// invalid binding vector.
    Analysis,
    /// Evaluation-time failure: wrong arity, no matching method, integer
    /// division by zero, invalid cast.
    Runtime,
    /// Invariant violation inside the runtime itself. Never catchable.
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Lex => "lex",
            ErrorKind::Parse => "parse",
            ErrorKind::Analysis => "analysis",
            ErrorKind::Runtime => "runtime",
            ErrorKind::Internal => "internal",
        }
    }
}

/// A structured error from any pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub pos: Option<SourcePos>,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Diagnostic {
            kind,
            message: message.into(),
            pos: None,
        }
    }

    pub fn at(kind: ErrorKind, message: impl Into<String>, pos: SourcePos) -> Self {
        Diagnostic {
            kind,
            message: message.into(),
            pos: Some(pos),
        }
    }

    pub fn lex(message: impl Into<String>, pos: SourcePos) -> Self {
        Self::at(ErrorKind::Lex, message, pos)
    }

    pub fn parse(message: impl Into<String>, pos: SourcePos) -> Self {
        Self::at(ErrorKind::Parse, message, pos)
    }

    pub fn analysis(message: impl Into<String>, pos: SourcePos) -> Self {
        Self::at(ErrorKind::Analysis, message, pos)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Runtime diagnostics may be caught by `try`; everything else halts
    /// the current top-level form.
    pub fn catchable(&self) -> bool {
        self.kind == ErrorKind::Runtime
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pos {
            Some(pos) => write!(f, "{} error at {}: {}", self.kind.as_str(), pos, self.message),
            None => write!(f, "{} error: {}", self.kind.as_str(), self.message),
        }
    }
}

impl std::error::Error for Diagnostic {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_position() {
        let pos = SourcePos::new("user.clj".into(), 3, 7);
        let d = Diagnostic::parse("unmatched delimiter ')'", pos);
        assert_eq!(
            d.to_string(),
            "parse error at user.clj:3:7: unmatched delimiter ')'"
        );
    }

    #[test]
    fn test_only_runtime_is_catchable() {
        assert!(Diagnostic::runtime("boom").catchable());
        assert!(!Diagnostic::internal("bad").catchable());
        let pos = SourcePos::new("x.clj".into(), 1, 0);
        assert!(!Diagnostic::lex("bad number", pos).catchable());
    }
}
