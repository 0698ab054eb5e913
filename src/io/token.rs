// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Token definitions shared by the lexer and parser

use std::fmt;

/// Coarse token classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCategory {
    Number,
    String,
    Ident,
    Keyword,
    Operator,
    Punct,
    Eof,
}

/// Token kinds, with literal payloads already decoded
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    String(String),
    Ident(String),
    /// Library path of an `include <...>` or `use <...>` directive
    Path(String),

    // Keywords
    Module,
    Function,
    If,
    Else,
    For,
    Let,
    Each,
    Include,
    Use,
    Import,
    True,
    False,
    Undef,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Bang,
    AmpAmp,
    PipePipe,
    EqEq,
    BangEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Question,
    Colon,
    Eq,
    Dot,
    Hash,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semi,

    Eof,
}

impl TokenKind {
    pub fn category(&self) -> TokenCategory {
        use TokenKind::*;
        match self {
            Number(_) => TokenCategory::Number,
            String(_) | Path(_) => TokenCategory::String,
            Ident(_) => TokenCategory::Ident,
            Module | Function | If | Else | For | Let | Each | Include | Use | Import | True
            | False | Undef => TokenCategory::Keyword,
            Plus | Minus | Star | Slash | Percent | Caret | Bang | AmpAmp | PipePipe | EqEq
            | BangEq | Lt | LtEq | Gt | GtEq | Question | Colon | Eq | Dot | Hash => {
                TokenCategory::Operator
            }
            LParen | RParen | LBracket | RBracket | LBrace | RBrace | Comma | Semi => {
                TokenCategory::Punct
            }
            Eof => TokenCategory::Eof,
        }
    }

    /// Human readable description used in parse errors
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Number(n) => format!("number {}", n),
            TokenKind::String(s) => format!("string {:?}", s),
            TokenKind::Ident(name) => format!("identifier '{}'", name),
            TokenKind::Path(p) => format!("path <{}>", p),
            TokenKind::Eof => "end of input".to_string(),
            other => format!("'{}'", other),
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TokenKind::Number(n) => return write!(f, "{}", n),
            TokenKind::String(s) => return write!(f, "{:?}", s),
            TokenKind::Ident(name) => return f.write_str(name),
            TokenKind::Path(p) => return write!(f, "<{}>", p),
            TokenKind::Module => "module",
            TokenKind::Function => "function",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::For => "for",
            TokenKind::Let => "let",
            TokenKind::Each => "each",
            TokenKind::Include => "include",
            TokenKind::Use => "use",
            TokenKind::Import => "import",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Undef => "undef",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Caret => "^",
            TokenKind::Bang => "!",
            TokenKind::AmpAmp => "&&",
            TokenKind::PipePipe => "||",
            TokenKind::EqEq => "==",
            TokenKind::BangEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::LtEq => "<=",
            TokenKind::Gt => ">",
            TokenKind::GtEq => ">=",
            TokenKind::Question => "?",
            TokenKind::Colon => ":",
            TokenKind::Eq => "=",
            TokenKind::Dot => ".",
            TokenKind::Hash => "#",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Semi => ";",
            TokenKind::Eof => "<eof>",
        };
        f.write_str(text)
    }
}

/// A lexed token with its 1-based source position
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            line,
            column,
        }
    }

    pub fn category(&self) -> TokenCategory {
        self.kind.category()
    }
}
