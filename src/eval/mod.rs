// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Evaluation - values, scopes and the tree-walking evaluator

mod args;
mod builtins;
mod cancel;
mod error;
mod evaluator;
mod expr;
mod modules;
mod options;
mod program;
mod scope;
mod value;

pub use cancel::CancellationToken;
pub use error::{EvalError, EvalErrorKind, EvalResult};
pub use evaluator::Evaluator;
pub use expr::MAX_EXPRESSION_DEPTH;
pub use modules::{fragment_count, MAX_FRAGMENTS};
pub use options::{RunOptions, DEFAULT_MAX_RECURSION_DEPTH};
pub use program::{Annotation, Geometry, GeometryProgram};
pub use scope::ScopeId;
pub use value::{format_value_number, FunctionValue, ModuleValue, RangeValue, Value};
