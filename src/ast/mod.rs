// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Abstract Syntax Tree module
//!
//! Defines the statement and expression trees produced by the parser and
//! the printer that renders them back to source.

mod node;
mod printer;

pub use node::{
    Argument, BinaryOp, Binding, Expr, ExprKind, FunctionDecl, ImportKind, Line, Modifier,
    ModuleCall, ModuleDecl, Parameter, Stmt, StmtKind, UnaryOp,
};
pub use printer::{format_number, print_program, quote_string};
