//! Tokenizer for Loam source
//!
//! Single-pass scanner producing tokens that borrow slices of the source
//! text. Commas count as whitespace. The tokenizer classifies numeric
//! shapes (int / float / ratio) but leaves value conversion to the Reader,
//! which also decodes string escapes.

use loam_core::diagnostics::{Diagnostic, SourcePos};

use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    /// `'`
    Quote,
    /// `` ` ``
    SyntaxQuote,
    /// `~`
    Unquote,
    /// `~@`
    UnquoteSplicing,
    /// `@`
    Deref,
    /// `^` or `#^`
    Meta,
    /// `#_`
    Discard,
    /// `#'`
    VarQuote,
    /// `#(`
    FnShort,
    /// `#{`
    SetOpen,
    /// `#"..."` - the text excludes the delimiters.
    Regex,
    /// `##` - followed by a symbol token naming the symbolic value.
    SymbolicValue,
    /// `#?`
    ReaderCond,
    Str,
    Char,
    Int,
    Float,
    Ratio,
    Symbol,
    Keyword,
    Eof,
}

/// A token with its source slice and position (1-based line, 0-based
/// column).
#[derive(Debug, Clone, Copy)]
pub struct Token<'s> {
    pub kind: TokenKind,
    pub text: &'s str,
    pub line: u32,
    pub column: u32,
}

pub struct Tokenizer<'s> {
    src: &'s str,
    file: Rc<str>,
    pos: usize,
    line: u32,
    column: u32,
}

fn is_ws(c: char) -> bool {
    c.is_whitespace() || c == ','
}

fn is_terminator(c: char) -> bool {
    is_ws(c) || matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '"' | ';')
}

/// Characters that may continue a symbol, keyword, or number token.
fn is_token_char(c: char) -> bool {
    !is_terminator(c) && !matches!(c, '\'' | '`' | '~' | '@' | '^')
}

impl<'s> Tokenizer<'s> {
    pub fn new(src: &'s str, file: Rc<str>) -> Self {
        Self::new_at(src, file, 0, 1, 0)
    }

    /// Resume scanning at a saved position. The driver reads one
    /// top-level form per scratch-arena lifetime and re-enters here after
    /// each reset.
    pub fn new_at(src: &'s str, file: Rc<str>, pos: usize, line: u32, column: u32) -> Self {
        Tokenizer {
            src,
            file,
            pos,
            line,
            column,
        }
    }

    /// Current byte offset plus line/column, for resuming.
    pub fn stream_position(&self) -> (usize, u32, u32) {
        (self.pos, self.line, self.column)
    }

    pub fn pos(&self) -> SourcePos {
        SourcePos::new(self.file.clone(), self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek2(&self) -> Option<char> {
        let mut chars = self.src[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_ws_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(c) if is_ws(c) => {
                    self.bump();
                }
                Some(';') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn token(&self, kind: TokenKind, start: usize, line: u32, column: u32) -> Token<'s> {
        Token {
            kind,
            text: &self.src[start..self.pos],
            line,
            column,
        }
    }

    /// Consume token characters until a terminator.
    fn eat_word(&mut self) {
        while let Some(c) = self.peek() {
            if !is_token_char(c) {
                break;
            }
            self.bump();
        }
    }

    /// Scan the body of a string, leaving escape pairs undecoded. The
    /// opening quote has been consumed; consumes the closing quote.
    fn eat_string_body(&mut self, open_pos: SourcePos) -> Result<(), Diagnostic> {
        loop {
            match self.bump() {
                None => {
                    return Err(Diagnostic::lex("unterminated string literal", open_pos));
                }
                Some('"') => return Ok(()),
                Some('\\') => {
                    if self.bump().is_none() {
                        return Err(Diagnostic::lex("unterminated string literal", open_pos));
                    }
                }
                Some(_) => {}
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token<'s>, Diagnostic> {
        self.skip_ws_and_comments();
        let (line, column) = (self.line, self.column);
        let start = self.pos;
        let pos = self.pos();

        let c = match self.bump() {
            None => return Ok(self.token(TokenKind::Eof, start, line, column)),
            Some(c) => c,
        };

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '\'' => TokenKind::Quote,
            '`' => TokenKind::SyntaxQuote,
            '@' => TokenKind::Deref,
            '^' => TokenKind::Meta,
            '~' => {
                if self.peek() == Some('@') {
                    self.bump();
                    TokenKind::UnquoteSplicing
                } else {
                    TokenKind::Unquote
                }
            }
            '"' => {
                self.eat_string_body(pos)?;
                // Trim the delimiters from the slice.
                return Ok(Token {
                    kind: TokenKind::Str,
                    text: &self.src[start + 1..self.pos - 1],
                    line,
                    column,
                });
            }
            '\\' => {
                // Character literal: one char, or a named/unicode escape
                // continued by token characters.
                if self.bump().is_none() {
                    return Err(Diagnostic::lex("unterminated character literal", pos));
                }
                self.eat_word();
                TokenKind::Char
            }
            '#' => match self.peek() {
                Some('_') => {
                    self.bump();
                    TokenKind::Discard
                }
                Some('\'') => {
                    self.bump();
                    TokenKind::VarQuote
                }
                Some('(') => {
                    self.bump();
                    TokenKind::FnShort
                }
                Some('{') => {
                    self.bump();
                    TokenKind::SetOpen
                }
                Some('#') => {
                    self.bump();
                    TokenKind::SymbolicValue
                }
                Some('?') => {
                    self.bump();
                    TokenKind::ReaderCond
                }
                Some('^') => {
                    self.bump();
                    TokenKind::Meta
                }
                Some('"') => {
                    self.bump();
                    self.eat_string_body(pos)?;
                    return Ok(Token {
                        kind: TokenKind::Regex,
                        text: &self.src[start + 2..self.pos - 1],
                        line,
                        column,
                    });
                }
                other => {
                    return Err(Diagnostic::lex(
                        format!(
                            "unsupported dispatch #{}",
                            other.map(String::from).unwrap_or_default()
                        ),
                        pos,
                    ));
                }
            },
            ':' => {
                if self.peek() == Some(':') {
                    self.bump();
                }
                self.eat_word();
                TokenKind::Keyword
            }
            '+' | '-' => {
                // A sign starts a number only when a digit follows
                // immediately; otherwise it is a symbol like `+` or `->`.
                if self.peek().is_some_and(|d| d.is_ascii_digit()) {
                    self.eat_word();
                    classify_number(&self.src[start..self.pos])
                } else {
                    self.eat_word();
                    TokenKind::Symbol
                }
            }
            d if d.is_ascii_digit() => {
                self.eat_word();
                classify_number(&self.src[start..self.pos])
            }
            _ => {
                self.eat_word();
                TokenKind::Symbol
            }
        };

        Ok(self.token(kind, start, line, column))
    }

    /// Tokenize the whole source. The Reader drives `next_token` directly;
    /// this is for tests and tooling.
    pub fn tokenize(mut self) -> Result<Vec<Token<'s>>, Diagnostic> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }
}

/// Classify a scanned numeric word. Shapes with `/` are ratios; a decimal
/// point or exponent (outside a radix prefix) or `M` suffix makes a
/// float; everything else is an int candidate. Malformed text still gets
/// a numeric kind here and fails with a proper diagnostic when the Reader
/// converts it.
fn classify_number(text: &str) -> TokenKind {
    let body = text.strip_prefix(['+', '-']).unwrap_or(text);
    if body.contains('/') {
        return TokenKind::Ratio;
    }
    let radix_prefixed =
        body.starts_with("0x") || body.starts_with("0X") || body.contains('r') || body.contains('R');
    if !radix_prefixed
        && (body.contains('.')
            || body.ends_with('M')
            || ((body.contains('e') || body.contains('E')) && !body.starts_with("0x")))
    {
        return TokenKind::Float;
    }
    TokenKind::Int
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Tokenizer::new(src, "test.clj".into())
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_delimiters_and_symbols() {
        assert_eq!(
            kinds("(foo [bar] {})"),
            vec![
                TokenKind::LParen,
                TokenKind::Symbol,
                TokenKind::LBracket,
                TokenKind::Symbol,
                TokenKind::RBracket,
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_commas_are_whitespace() {
        assert_eq!(
            kinds("1, 2,3"),
            vec![TokenKind::Int, TokenKind::Int, TokenKind::Int, TokenKind::Eof]
        );
    }

    #[test]
    fn test_number_shapes() {
        assert_eq!(kinds("42")[0], TokenKind::Int);
        assert_eq!(kinds("-7")[0], TokenKind::Int);
        assert_eq!(kinds("+7")[0], TokenKind::Int);
        assert_eq!(kinds("0x1F")[0], TokenKind::Int);
        assert_eq!(kinds("2r1011")[0], TokenKind::Int);
        assert_eq!(kinds("017")[0], TokenKind::Int);
        assert_eq!(kinds("1.5")[0], TokenKind::Float);
        assert_eq!(kinds("1e3")[0], TokenKind::Float);
        assert_eq!(kinds("-2.0e-3")[0], TokenKind::Float);
        assert_eq!(kinds("1/2")[0], TokenKind::Ratio);
    }

    #[test]
    fn test_sign_without_digit_is_symbol() {
        assert_eq!(kinds("+")[0], TokenKind::Symbol);
        assert_eq!(kinds("->")[0], TokenKind::Symbol);
        assert_eq!(kinds("-")[0], TokenKind::Symbol);
    }

    #[test]
    fn test_string_and_regex_slices() {
        let tokens = Tokenizer::new("\"a\\\"b\" #\"\\d+\"", "t.clj".into())
            .tokenize()
            .unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Str);
        assert_eq!(tokens[0].text, "a\\\"b");
        assert_eq!(tokens[1].kind, TokenKind::Regex);
        assert_eq!(tokens[1].text, "\\d+");
    }

    #[test]
    fn test_unterminated_string_errors() {
        let err = Tokenizer::new("\"oops", "t.clj".into()).tokenize().unwrap_err();
        assert!(err.message.contains("unterminated string"));
    }

    #[test]
    fn test_reader_macro_tokens() {
        assert_eq!(
            kinds("'x `x ~x ~@x @x #'x #_x #(f) #{1} ##Inf #?(:clj 1)"),
            vec![
                TokenKind::Quote,
                TokenKind::Symbol,
                TokenKind::SyntaxQuote,
                TokenKind::Symbol,
                TokenKind::Unquote,
                TokenKind::Symbol,
                TokenKind::UnquoteSplicing,
                TokenKind::Symbol,
                TokenKind::Deref,
                TokenKind::Symbol,
                TokenKind::VarQuote,
                TokenKind::Symbol,
                TokenKind::Discard,
                TokenKind::Symbol,
                TokenKind::FnShort,
                TokenKind::Symbol,
                TokenKind::RParen,
                TokenKind::SetOpen,
                TokenKind::Int,
                TokenKind::RBrace,
                TokenKind::SymbolicValue,
                TokenKind::Symbol,
                TokenKind::ReaderCond,
                TokenKind::LParen,
                TokenKind::Keyword,
                TokenKind::Int,
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_char_literals() {
        let tokens = Tokenizer::new("\\a \\newline \\u0041", "t.clj".into())
            .tokenize()
            .unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Char);
        assert_eq!(tokens[0].text, "\\a");
        assert_eq!(tokens[1].text, "\\newline");
        assert_eq!(tokens[2].text, "\\u0041");
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(kinds("1 ; comment\n2"), vec![TokenKind::Int, TokenKind::Int, TokenKind::Eof]);
    }

    #[test]
    fn test_line_and_column_tracking() {
        let tokens = Tokenizer::new("a\n  b", "t.clj".into()).tokenize().unwrap();
        assert_eq!((tokens[0].line, tokens[0].column), (1, 0));
        assert_eq!((tokens[1].line, tokens[1].column), (2, 2));
    }
}
