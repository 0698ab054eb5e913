// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! I/O module - lexing, parsing, library loading and STL exchange

mod exporter;
mod importer;
mod lexer;
mod parser;
mod token;

pub use exporter::{export_stl, read_stl, write_stl};
pub use importer::{
    FsResolver, ImportError, ImportResolver, Libraries, MemoryResolver, DEFAULT_MAX_IMPORT_BYTES,
};
pub use lexer::{tokenize, LexError};
pub use parser::{
    parse, parse_expression, parse_scad, ParseError, ParseResult, MAX_NESTING_DEPTH,
};
pub use token::{Token, TokenCategory, TokenKind};
