// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Polyframe Script
//!
//! Front-end and evaluator for an OpenSCAD-style modelling language.
//! Source text is lexed, parsed into an AST and evaluated into calls on a
//! pluggable [`GeometryBackend`]; the result is a [`GeometryProgram`] of
//! annotated backend handles plus captured `echo` output.

pub mod ast;
pub mod config;
pub mod eval;
pub mod geometry;
pub mod io;
pub mod utils;

pub use ast::{print_program, Expr, Stmt};
pub use config::EngineConfig;
pub use eval::{
    Annotation, CancellationToken, EvalError, EvalErrorKind, Evaluator, Geometry, GeometryProgram,
    RunOptions, Value,
};
pub use geometry::{GeometryBackend, Handle, MeshBackend, Primitive, RecordingBackend};
pub use io::{parse_scad, FsResolver, ImportResolver, LexError, Libraries, MemoryResolver, ParseError};

use thiserror::Error;
use tracing::debug;

/// Any failure of [`run_program`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("lex error: {0}")]
    Lex(#[from] LexError),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),
}

/// Lex, parse and evaluate `source` against `backend`.
///
/// Libraries named by `include`/`use` are resolved through the options'
/// import resolver before evaluation starts.
pub fn run_program<B: GeometryBackend + ?Sized>(
    source: &str,
    backend: &mut B,
    options: &RunOptions,
) -> Result<GeometryProgram, Error> {
    let stmts = parse_scad(source)?;
    let libraries = Libraries::load(
        &stmts,
        options.import_resolver.as_deref(),
        &options.search_dirs,
    )
    .map_err(EvalError::from)?;
    debug!(
        statements = stmts.len(),
        libraries = libraries.len(),
        "parsed program"
    );

    let mut evaluator = Evaluator::new(backend, options).with_libraries(&libraries);
    Ok(evaluator.evaluate(&stmts)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_cube() {
        let mut backend = RecordingBackend::new();
        let program = run_program("cube([10, 10, 10]);", &mut backend, &RunOptions::default())
            .unwrap();
        assert_eq!(program.roots.len(), 1);
        assert_eq!(backend.calls().len(), 1);
    }

    #[test]
    fn test_error_kinds() {
        let mut backend = RecordingBackend::new();
        let options = RunOptions::default();
        assert!(matches!(
            run_program("x = \"open;", &mut backend, &options),
            Err(Error::Lex(_))
        ));
        assert!(matches!(
            run_program("cube(1)", &mut backend, &options),
            Err(Error::Parse(_))
        ));
        assert!(matches!(
            run_program("gear();", &mut backend, &options),
            Err(Error::Eval(_))
        ));
    }
}
