// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Lexer built on logos
//!
//! Turns source text into a token stream terminated by [`TokenKind::Eof`].
//! Literal payloads (numbers, strings, library paths) are decoded here so the
//! parser only deals with typed tokens.

use super::token::{Token, TokenKind};
use logos::Logos;
use thiserror::Error;

/// Malformed source text
#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}, column {column}: {message}")]
pub struct LexError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
enum RawToken {
    #[regex(r"//[^\n]*", logos::skip)]
    LineComment,

    #[token("module")]
    Module,
    #[token("function")]
    Function,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("let")]
    Let,
    #[token("each")]
    Each,
    #[token("include")]
    Include,
    #[token("use")]
    Use,
    #[token("import")]
    Import,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("undef")]
    Undef,

    /// `include <path>` or `use <path>`, split into two tokens later
    #[regex(r"(include|use)[ \t]*<[^>\n]*>")]
    Directive,

    /// Directive path missing its closing `>` on the same line
    #[regex(r"(include|use)[ \t]*<[^>\n]*")]
    UnterminatedDirective,

    #[token("&&")]
    AmpAmp,
    #[token("||")]
    PipePipe,
    #[token("==")]
    EqEq,
    #[token("!=")]
    BangEq,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("^")]
    Caret,
    #[token("!")]
    Bang,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,
    #[token("=")]
    Eq,
    #[token(".")]
    Dot,
    #[token("#")]
    Hash,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,

    #[token("/*", block_comment)]
    BlockComment,

    #[token("\"", string_literal)]
    String,

    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?")]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?")]
    Number,

    #[regex(r"\$?[A-Za-z_][A-Za-z0-9_]*")]
    Ident,
}

/// Consume a block comment body. Returns false when the comment never closes.
fn block_comment(lex: &mut logos::Lexer<RawToken>) -> bool {
    match lex.remainder().find("*/") {
        Some(end) => {
            lex.bump(end + 2);
            true
        }
        None => {
            lex.bump(lex.remainder().len());
            false
        }
    }
}

/// Consume a string body up to the closing quote, skipping escaped characters.
fn string_literal(lex: &mut logos::Lexer<RawToken>) -> bool {
    let mut escaped = false;
    for (offset, ch) in lex.remainder().char_indices() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == '"' {
            lex.bump(offset + 1);
            return true;
        }
    }
    lex.bump(lex.remainder().len());
    false
}

/// Incremental byte-offset to line/column conversion.
///
/// Offsets must be queried in non-decreasing order, which holds for a single
/// left-to-right lexing pass.
struct PositionTracker<'s> {
    source: &'s str,
    offset: usize,
    line: usize,
    column: usize,
}

impl<'s> PositionTracker<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            offset: 0,
            line: 1,
            column: 1,
        }
    }

    fn advance_to(&mut self, offset: usize) -> (usize, usize) {
        for ch in self.source[self.offset..offset].chars() {
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.offset = offset;
        (self.line, self.column)
    }
}

/// Tokenize source text.
///
/// The returned stream always ends with an `Eof` token. The first malformed
/// construct aborts lexing.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let mut positions = PositionTracker::new(source);
    let mut lexer = RawToken::lexer(source);

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let slice = lexer.slice();
        let (line, column) = positions.advance_to(span.start);

        let raw = match result {
            Ok(raw) => raw,
            Err(()) => {
                let message = if slice.starts_with("/*") {
                    "unterminated block comment".to_string()
                } else if slice.starts_with('"') {
                    "unterminated string literal".to_string()
                } else {
                    let ch = source[span.start..].chars().next().unwrap_or('?');
                    format!("unexpected character '{}'", ch.escape_debug())
                };
                return Err(LexError {
                    line,
                    column,
                    message,
                });
            }
        };

        let kind = match raw {
            RawToken::LineComment | RawToken::BlockComment => continue,
            RawToken::UnterminatedDirective => {
                return Err(LexError {
                    line,
                    column,
                    message: "unterminated library path, expected '>'".to_string(),
                });
            }
            RawToken::Directive => {
                let (keyword, rest) = if let Some(rest) = slice.strip_prefix("include") {
                    (TokenKind::Include, rest)
                } else {
                    (TokenKind::Use, &slice[3..])
                };
                let keyword_len = slice.len() - rest.len();
                tokens.push(Token::new(keyword, &slice[..keyword_len], line, column));

                let open = slice.find('<').unwrap_or(keyword_len);
                let (line, column) = positions.advance_to(span.start + open);
                let path = slice[open + 1..slice.len() - 1].trim().to_string();
                tokens.push(Token::new(TokenKind::Path(path), &slice[open..], line, column));
                continue;
            }
            RawToken::Number => {
                let value = slice.parse::<f64>().map_err(|_| LexError {
                    line,
                    column,
                    message: format!("invalid number literal '{}'", slice),
                })?;
                TokenKind::Number(value)
            }
            RawToken::String => {
                let body = &slice[1..slice.len() - 1];
                let value = unescape(body).map_err(|message| LexError {
                    line,
                    column,
                    message,
                })?;
                TokenKind::String(value)
            }
            RawToken::Ident => TokenKind::Ident(slice.to_string()),
            RawToken::Module => TokenKind::Module,
            RawToken::Function => TokenKind::Function,
            RawToken::If => TokenKind::If,
            RawToken::Else => TokenKind::Else,
            RawToken::For => TokenKind::For,
            RawToken::Let => TokenKind::Let,
            RawToken::Each => TokenKind::Each,
            RawToken::Include => TokenKind::Include,
            RawToken::Use => TokenKind::Use,
            RawToken::Import => TokenKind::Import,
            RawToken::True => TokenKind::True,
            RawToken::False => TokenKind::False,
            RawToken::Undef => TokenKind::Undef,
            RawToken::AmpAmp => TokenKind::AmpAmp,
            RawToken::PipePipe => TokenKind::PipePipe,
            RawToken::EqEq => TokenKind::EqEq,
            RawToken::BangEq => TokenKind::BangEq,
            RawToken::LtEq => TokenKind::LtEq,
            RawToken::GtEq => TokenKind::GtEq,
            RawToken::Plus => TokenKind::Plus,
            RawToken::Minus => TokenKind::Minus,
            RawToken::Star => TokenKind::Star,
            RawToken::Slash => TokenKind::Slash,
            RawToken::Percent => TokenKind::Percent,
            RawToken::Caret => TokenKind::Caret,
            RawToken::Bang => TokenKind::Bang,
            RawToken::Lt => TokenKind::Lt,
            RawToken::Gt => TokenKind::Gt,
            RawToken::Question => TokenKind::Question,
            RawToken::Colon => TokenKind::Colon,
            RawToken::Eq => TokenKind::Eq,
            RawToken::Dot => TokenKind::Dot,
            RawToken::Hash => TokenKind::Hash,
            RawToken::LParen => TokenKind::LParen,
            RawToken::RParen => TokenKind::RParen,
            RawToken::LBracket => TokenKind::LBracket,
            RawToken::RBracket => TokenKind::RBracket,
            RawToken::LBrace => TokenKind::LBrace,
            RawToken::RBrace => TokenKind::RBrace,
            RawToken::Comma => TokenKind::Comma,
            RawToken::Semi => TokenKind::Semi,
        };

        tokens.push(Token::new(kind, slice, line, column));
    }

    let (line, column) = positions.advance_to(source.len());
    tokens.push(Token::new(TokenKind::Eof, "", line, column));
    Ok(tokens)
}

/// Decode escape sequences inside a string literal body.
fn unescape(body: &str) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('x') => out.push(hex_escape(&mut chars, 2, 0x7f)?),
            Some('u') => out.push(hex_escape(&mut chars, 4, 0x10ffff)?),
            Some('U') => out.push(hex_escape(&mut chars, 6, 0x10ffff)?),
            Some(other) => return Err(format!("invalid escape sequence '\\{}'", other)),
            None => return Err("dangling escape at end of string".to_string()),
        }
    }

    Ok(out)
}

fn hex_escape(chars: &mut std::str::Chars<'_>, digits: usize, max: u32) -> Result<char, String> {
    let hex: String = chars.by_ref().take(digits).collect();
    if hex.len() != digits || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("escape needs {} hex digits", digits));
    }
    u32::from_str_radix(&hex, 16)
        .ok()
        .filter(|code| *code <= max)
        .and_then(char::from_u32)
        .ok_or_else(|| format!("invalid character code '{}'", hex))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1 2.5 .5 1e3 2.5E-2"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Number(2.5),
                TokenKind::Number(0.5),
                TokenKind::Number(1000.0),
                TokenKind::Number(0.025),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_and_special_idents() {
        assert_eq!(
            kinds("module m $fn undef modules"),
            vec![
                TokenKind::Module,
                TokenKind::Ident("m".into()),
                TokenKind::Ident("$fn".into()),
                TokenKind::Undef,
                TokenKind::Ident("modules".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators_longest_match() {
        assert_eq!(
            kinds("a<=b&&!c!=d"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::LtEq,
                TokenKind::Ident("b".into()),
                TokenKind::AmpAmp,
                TokenKind::Bang,
                TokenKind::Ident("c".into()),
                TokenKind::BangEq,
                TokenKind::Ident("d".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let source = "a // line\n/* block\n comment */ b";
        assert_eq!(
            kinds(source),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Ident("b".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("x = 1;\n  cube(2);").unwrap();
        let cube = tokens.iter().find(|t| t.lexeme == "cube").unwrap();
        assert_eq!((cube.line, cube.column), (2, 3));
        let eof = tokens.last().unwrap();
        assert_eq!(eof.kind, TokenKind::Eof);
        assert_eq!(eof.line, 2);
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\"b\n\x41é""#),
            vec![TokenKind::String("a\"b\nAé".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_include_directive() {
        let tokens = tokenize("include <lib/parts.scad>\nuse<util.scad>").unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Include,
                TokenKind::Path("lib/parts.scad".into()),
                TokenKind::Use,
                TokenKind::Path("util.scad".into()),
                TokenKind::Eof,
            ]
        );
        assert_eq!(tokens[1].column, 9);
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("x = \"abc").unwrap_err();
        assert_eq!((err.line, err.column), (1, 5));
        assert!(err.message.contains("unterminated string"));
    }

    #[test]
    fn test_unterminated_comment() {
        let err = tokenize("cube(1);\n/* never closed").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unterminated block comment"));
    }

    #[test]
    fn test_unterminated_library_path() {
        let err = tokenize("cube();
  include <lib.scad").unwrap_err();
        assert_eq!((err.line, err.column), (2, 3));
        assert!(err.message.contains("unterminated library path"), "{}", err);

        let err = tokenize("use <a.scad
cube();").unwrap_err();
        assert_eq!((err.line, err.column), (1, 1));
        assert!(err.message.contains("expected '>'"));
    }

    #[test]
    fn test_invalid_character() {
        let err = tokenize("a = 1 @ 2;").unwrap_err();
        assert_eq!((err.line, err.column), (1, 7));
        assert!(err.message.contains('@'));
    }

    #[test]
    fn test_invalid_escape() {
        let err = tokenize(r#""\q""#).unwrap_err();
        assert!(err.message.contains("invalid escape"));
    }
}
