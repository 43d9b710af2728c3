//! Lexer for the Alloy source language.
//!
//! Tokenizes with maximal munch: compound punctuation (`<<`, `<=`, `&&`,
//! `->`, ...) and literal suffixes are folded into single tokens. The
//! lexer is fail-fast: the first malformed construct aborts lexing with
//! a diagnostic; there is no recovery.

use crate::diagnostic::Diagnostic;
use crate::span::Span;

/// Suffix attached to an integer literal, selecting its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntSuffix {
    /// No suffix: i32.
    None,
    /// `u`: u32.
    U,
    /// `l`: i64.
    L,
    /// `ul`: u64.
    Ul,
}

/// Kind of a token produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Special
    Eof,

    // Identifiers and literals
    Ident(String),
    Int { value: u64, suffix: IntSuffix },
    Float { value: f64, is_f32: bool },
    Str(String),

    // Punctuation
    LParen,   // (
    RParen,   // )
    LBrace,   // {
    RBrace,   // }
    LBracket, // [
    RBracket, // ]
    Comma,    // ,
    Semi,     // ;
    Colon,    // :
    Arrow,    // ->

    // Operators
    Assign,  // =
    EqEq,    // ==
    NotEq,   // !=
    Lt,      // <
    Le,      // <=
    Gt,      // >
    Ge,      // >=
    Shl,     // <<
    Shr,     // >>
    Plus,    // +
    Minus,   // -
    Star,    // *
    Slash,   // /
    Percent, // %
    Amp,     // &
    AndAnd,  // &&
    Pipe,    // |
    OrOr,    // ||
    Caret,   // ^
    Tilde,   // ~
    Bang,    // !

    // Keywords
    Fn,
    Export,
    Let,
    Mut,
    If,
    Else,
    While,
    Return,
    Break,
    Continue,
    As,
    True,
    False,
}

/// A single token with its kind and span.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Lex a source string into tokens, ending with an `Eof` token.
pub fn lex(source: &str) -> Result<Vec<Token>, Diagnostic> {
    let mut lexer = Lexer {
        chars: source.as_bytes(),
        len: source.len(),
        index: 0,
    };
    lexer.run()
}

struct Lexer<'src> {
    chars: &'src [u8],
    len: usize,
    index: usize,
}

impl<'src> Lexer<'src> {
    fn run(&mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens = Vec::new();

        loop {
            self.skip_trivia();
            let Some(ch) = self.peek_char() else { break };
            let start = self.index as u32;

            let token = match ch {
                b'(' => self.punct(TokenKind::LParen, start),
                b')' => self.punct(TokenKind::RParen, start),
                b'{' => self.punct(TokenKind::LBrace, start),
                b'}' => self.punct(TokenKind::RBrace, start),
                b'[' => self.punct(TokenKind::LBracket, start),
                b']' => self.punct(TokenKind::RBracket, start),
                b',' => self.punct(TokenKind::Comma, start),
                b';' => self.punct(TokenKind::Semi, start),
                b':' => self.punct(TokenKind::Colon, start),
                b'+' => self.punct(TokenKind::Plus, start),
                b'*' => self.punct(TokenKind::Star, start),
                b'/' => self.punct(TokenKind::Slash, start),
                b'%' => self.punct(TokenKind::Percent, start),
                b'^' => self.punct(TokenKind::Caret, start),
                b'~' => self.punct(TokenKind::Tilde, start),
                b'-' => {
                    self.consume_char();
                    if self.peek_char() == Some(b'>') {
                        self.consume_char();
                        self.simple_token(TokenKind::Arrow, start)
                    } else {
                        self.simple_token(TokenKind::Minus, start)
                    }
                }
                b'=' => {
                    self.consume_char();
                    if self.peek_char() == Some(b'=') {
                        self.consume_char();
                        self.simple_token(TokenKind::EqEq, start)
                    } else {
                        self.simple_token(TokenKind::Assign, start)
                    }
                }
                b'!' => {
                    self.consume_char();
                    if self.peek_char() == Some(b'=') {
                        self.consume_char();
                        self.simple_token(TokenKind::NotEq, start)
                    } else {
                        self.simple_token(TokenKind::Bang, start)
                    }
                }
                b'<' => {
                    self.consume_char();
                    match self.peek_char() {
                        Some(b'=') => {
                            self.consume_char();
                            self.simple_token(TokenKind::Le, start)
                        }
                        Some(b'<') => {
                            self.consume_char();
                            self.simple_token(TokenKind::Shl, start)
                        }
                        _ => self.simple_token(TokenKind::Lt, start),
                    }
                }
                b'>' => {
                    self.consume_char();
                    match self.peek_char() {
                        Some(b'=') => {
                            self.consume_char();
                            self.simple_token(TokenKind::Ge, start)
                        }
                        Some(b'>') => {
                            self.consume_char();
                            self.simple_token(TokenKind::Shr, start)
                        }
                        _ => self.simple_token(TokenKind::Gt, start),
                    }
                }
                b'&' => {
                    self.consume_char();
                    if self.peek_char() == Some(b'&') {
                        self.consume_char();
                        self.simple_token(TokenKind::AndAnd, start)
                    } else {
                        self.simple_token(TokenKind::Amp, start)
                    }
                }
                b'|' => {
                    self.consume_char();
                    if self.peek_char() == Some(b'|') {
                        self.consume_char();
                        self.simple_token(TokenKind::OrOr, start)
                    } else {
                        self.simple_token(TokenKind::Pipe, start)
                    }
                }
                b'"' => self.lex_string(start)?,
                b'0'..=b'9' => self.lex_number(start)?,
                _ => {
                    if is_ident_start(ch) {
                        self.lex_ident_or_keyword(start)
                    } else {
                        return Err(Diagnostic::error(
                            format!("unexpected character `{}`", ch as char),
                            Span::new(start, start + 1),
                        ));
                    }
                }
            };

            tokens.push(token);
        }

        tokens.push(Token {
            kind: TokenKind::Eof,
            span: Span::new(self.len as u32, self.len as u32),
        });
        Ok(tokens)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_char() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => self.consume_char(),
                Some(b'/') if self.peek_next() == Some(b'/') => {
                    while let Some(c) = self.peek_char() {
                        if c == b'\n' {
                            break;
                        }
                        self.consume_char();
                    }
                }
                _ => break,
            }
        }
    }

    fn punct(&mut self, kind: TokenKind, start: u32) -> Token {
        self.consume_char();
        self.simple_token(kind, start)
    }

    fn simple_token(&self, kind: TokenKind, start: u32) -> Token {
        Token {
            kind,
            span: Span::new(start, self.index as u32),
        }
    }

    fn lex_string(&mut self, start: u32) -> Result<Token, Diagnostic> {
        // Opening quote
        self.consume_char();
        let mut bytes = Vec::new();

        loop {
            match self.peek_char() {
                Some(b'"') => {
                    self.consume_char();
                    let value = String::from_utf8(bytes).map_err(|_| {
                        Diagnostic::error(
                            "string literal is not valid UTF-8",
                            Span::new(start, self.index as u32),
                        )
                    })?;
                    return Ok(Token {
                        kind: TokenKind::Str(value),
                        span: Span::new(start, self.index as u32),
                    });
                }
                Some(b'\\') => {
                    self.consume_char();
                    let escaped = match self.peek_char() {
                        Some(b'n') => b'\n',
                        Some(b't') => b'\t',
                        Some(b'"') => b'"',
                        Some(b'\\') => b'\\',
                        _ => {
                            return Err(Diagnostic::error(
                                "invalid escape sequence; expected one of `\\n \\t \\\" \\\\`",
                                Span::new(start, self.index as u32 + 1),
                            ));
                        }
                    };
                    self.consume_char();
                    bytes.push(escaped);
                }
                Some(ch) => {
                    self.consume_char();
                    bytes.push(ch);
                }
                None => {
                    return Err(Diagnostic::error(
                        "unterminated string literal",
                        Span::new(start, self.index as u32),
                    ));
                }
            }
        }
    }

    fn lex_number(&mut self, start: u32) -> Result<Token, Diagnostic> {
        let hex = self.peek_char() == Some(b'0')
            && matches!(self.peek_next(), Some(b'x') | Some(b'X'));

        let mut value: u64 = 0;
        if hex {
            self.consume_char(); // 0
            self.consume_char(); // x
            let mut digits = 0;
            while let Some(ch) = self.peek_char() {
                let digit = match ch {
                    b'0'..=b'9' => u64::from(ch - b'0'),
                    b'a'..=b'f' => u64::from(ch - b'a' + 10),
                    b'A'..=b'F' => u64::from(ch - b'A' + 10),
                    b'_' => {
                        self.consume_char();
                        continue;
                    }
                    _ => break,
                };
                value = value
                    .checked_mul(16)
                    .and_then(|v| v.checked_add(digit))
                    .ok_or_else(|| self.overflow(start))?;
                digits += 1;
                self.consume_char();
            }
            if digits == 0 {
                return Err(Diagnostic::error(
                    "expected hexadecimal digits after `0x`",
                    Span::new(start, self.index as u32),
                ));
            }
        } else {
            while let Some(ch) = self.peek_char() {
                match ch {
                    b'0'..=b'9' => {
                        value = value
                            .checked_mul(10)
                            .and_then(|v| v.checked_add(u64::from(ch - b'0')))
                            .ok_or_else(|| self.overflow(start))?;
                        self.consume_char();
                    }
                    b'_' => self.consume_char(),
                    _ => break,
                }
            }
        }

        // Fractional part: only `digits . digits` makes a float, so a
        // bare `1.` stays an integer followed by punctuation.
        if !hex
            && self.peek_char() == Some(b'.')
            && matches!(self.peek_next(), Some(b'0'..=b'9'))
        {
            self.consume_char(); // .
            while let Some(ch) = self.peek_char() {
                if matches!(ch, b'0'..=b'9' | b'_') {
                    self.consume_char();
                } else {
                    break;
                }
            }
            let is_f32 = if self.peek_char() == Some(b'f') {
                self.consume_char();
                true
            } else {
                false
            };
            self.reject_trailing_ident(start)?;

            let end = if is_f32 { self.index - 1 } else { self.index };
            let text: String = self.chars[start as usize..end]
                .iter()
                .map(|b| *b as char)
                .filter(|c| *c != '_')
                .collect();
            let value = text.parse::<f64>().map_err(|_| {
                Diagnostic::error(
                    "malformed floating-point literal",
                    Span::new(start, self.index as u32),
                )
            })?;
            return Ok(Token {
                kind: TokenKind::Float { value, is_f32 },
                span: Span::new(start, self.index as u32),
            });
        }

        let suffix = match self.peek_char() {
            Some(b'u') => {
                self.consume_char();
                if self.peek_char() == Some(b'l') {
                    self.consume_char();
                    IntSuffix::Ul
                } else {
                    IntSuffix::U
                }
            }
            Some(b'l') => {
                self.consume_char();
                IntSuffix::L
            }
            _ => IntSuffix::None,
        };
        self.reject_trailing_ident(start)?;

        Ok(Token {
            kind: TokenKind::Int { value, suffix },
            span: Span::new(start, self.index as u32),
        })
    }

    /// A literal must not run straight into identifier characters
    /// (`10ux`, `1.5g`); maximal munch makes that a malformed literal,
    /// not two tokens.
    fn reject_trailing_ident(&mut self, start: u32) -> Result<(), Diagnostic> {
        if self.peek_char().is_some_and(is_ident_continue) {
            return Err(Diagnostic::error(
                "invalid numeric literal suffix; expected `u`, `l`, `ul`, or `f`",
                Span::new(start, self.index as u32 + 1),
            ));
        }
        Ok(())
    }

    fn overflow(&self, start: u32) -> Diagnostic {
        Diagnostic::error(
            "integer literal too large",
            Span::new(start, self.index as u32),
        )
    }

    fn lex_ident_or_keyword(&mut self, start: u32) -> Token {
        while let Some(ch) = self.peek_char() {
            if is_ident_continue(ch) {
                self.consume_char();
            } else {
                break;
            }
        }

        let end = self.index;
        let text: &str = core::str::from_utf8(&self.chars[start as usize..end])
            .expect("identifier bytes are ASCII");

        let kind = match text {
            "fn" => TokenKind::Fn,
            "export" => TokenKind::Export,
            "let" => TokenKind::Let,
            "mut" => TokenKind::Mut,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "return" => TokenKind::Return,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "as" => TokenKind::As,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            _ => TokenKind::Ident(text.to_string()),
        };

        Token {
            kind,
            span: Span::new(start, end as u32),
        }
    }

    fn peek_char(&self) -> Option<u8> {
        self.chars.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.chars.get(self.index + 1).copied()
    }

    fn consume_char(&mut self) {
        if self.index < self.len {
            self.index += 1;
        }
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::line_col;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).expect("lex").into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_compound_punctuation_with_maximal_munch() {
        assert_eq!(
            kinds("<< <= < >> >= > && & || | -> - == ="),
            vec![
                TokenKind::Shl,
                TokenKind::Le,
                TokenKind::Lt,
                TokenKind::Shr,
                TokenKind::Ge,
                TokenKind::Gt,
                TokenKind::AndAnd,
                TokenKind::Amp,
                TokenKind::OrOr,
                TokenKind::Pipe,
                TokenKind::Arrow,
                TokenKind::Minus,
                TokenKind::EqEq,
                TokenKind::Assign,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_integer_suffixes() {
        assert_eq!(
            kinds("1 2u 3l 4ul"),
            vec![
                TokenKind::Int { value: 1, suffix: IntSuffix::None },
                TokenKind::Int { value: 2, suffix: IntSuffix::U },
                TokenKind::Int { value: 3, suffix: IntSuffix::L },
                TokenKind::Int { value: 4, suffix: IntSuffix::Ul },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_hex_literals() {
        assert_eq!(
            kinds("0xFFFFFFFFu"),
            vec![
                TokenKind::Int { value: 0xFFFF_FFFF, suffix: IntSuffix::U },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_floats() {
        assert_eq!(
            kinds("1.5 2.25f"),
            vec![
                TokenKind::Float { value: 1.5, is_f32: false },
                TokenKind::Float { value: 2.25, is_f32: true },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn processes_string_escapes() {
        assert_eq!(
            kinds(r#""a\n\"b""#),
            vec![TokenKind::Str("a\n\"b".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn keywords_are_not_identifiers() {
        assert_eq!(
            kinds("fn export while foo"),
            vec![
                TokenKind::Fn,
                TokenKind::Export,
                TokenKind::While,
                TokenKind::Ident("foo".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn skips_line_comments() {
        assert_eq!(
            kinds("1 // trailing words\n2"),
            vec![
                TokenKind::Int { value: 1, suffix: IntSuffix::None },
                TokenKind::Int { value: 2, suffix: IntSuffix::None },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn reports_unexpected_character_with_position() {
        let source = "fn main\n  @";
        let err = lex(source).unwrap_err();
        assert!(err.message.contains("unexpected character"));
        let lc = line_col(source, err.span.start);
        assert_eq!((lc.line, lc.col), (2, 3));
    }

    #[test]
    fn reports_unterminated_string() {
        let err = lex("\"abc").unwrap_err();
        assert!(err.message.contains("unterminated string"));
    }

    #[test]
    fn rejects_bad_suffix() {
        let err = lex("10ux").unwrap_err();
        assert!(err.message.contains("suffix"));
    }
}
