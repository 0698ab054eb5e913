// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Evaluation errors

use crate::geometry::BackendError;
use crate::io::ImportError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalErrorKind {
    #[error("undefined function '{0}'")]
    UndefinedFunction(String),
    #[error("undefined module '{0}'")]
    UndefinedModule(String),
    #[error("recursion depth limit of {0} exceeded")]
    RecursionLimit(usize),
    #[error("geometry backend failed: {0}")]
    BackendFailure(BackendError),
    #[error("evaluation cancelled")]
    Cancelled,
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("import failed: {0}")]
    ImportError(ImportError),
    #[error("assertion failed: {0}")]
    AssertionFailed(String),
}

/// Evaluation failure with the source line of the statement or expression
/// that caused it
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}{}", .line.map(|l| format!("line {}: ", l)).unwrap_or_default(), .kind)]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub line: Option<usize>,
}

pub type EvalResult<T> = Result<T, EvalError>;

impl EvalError {
    pub fn new(kind: EvalErrorKind, line: usize) -> Self {
        Self {
            kind,
            line: Some(line),
        }
    }

    pub fn type_mismatch(message: impl Into<String>, line: usize) -> Self {
        Self::new(EvalErrorKind::TypeMismatch(message.into()), line)
    }
}

impl From<ImportError> for EvalError {
    fn from(error: ImportError) -> Self {
        Self {
            kind: EvalErrorKind::ImportError(error),
            line: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_line() {
        let err = EvalError::new(EvalErrorKind::UndefinedModule("gear".into()), 12);
        assert_eq!(err.to_string(), "line 12: undefined module 'gear'");

        let err = EvalError::from(ImportError::NotFound("lib.scad".into()));
        assert_eq!(err.to_string(), "import failed: library not found: lib.scad");
    }
}
