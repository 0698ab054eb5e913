// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

use super::cancel::CancellationToken;
use super::value::Value;
use crate::io::ImportResolver;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 256;

/// Per-run settings for [`crate::run_program`] and [`super::Evaluator`]
#[derive(Clone)]
pub struct RunOptions {
    /// Initial values for `$` variables, layered over the built-in defaults
    pub special_vars: BTreeMap<String, Value<'static>>,
    /// Nested user function, user module and `children()` calls allowed
    pub max_recursion_depth: usize,
    pub cancellation_token: CancellationToken,
    /// Source of `include`/`use` libraries; without one, imports fail
    pub import_resolver: Option<Arc<dyn ImportResolver>>,
    /// Directories searched before the resolver's own, usually the
    /// directory of the main script
    pub search_dirs: Vec<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            special_vars: BTreeMap::new(),
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            cancellation_token: CancellationToken::new(),
            import_resolver: None,
            search_dirs: Vec::new(),
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_special_var(mut self, name: impl Into<String>, value: Value<'static>) -> Self {
        self.special_vars.insert(name.into(), value);
        self
    }

    pub fn with_max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn with_import_resolver(mut self, resolver: impl ImportResolver + 'static) -> Self {
        self.import_resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dirs.push(dir.into());
        self
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("special_vars", &self.special_vars)
            .field("max_recursion_depth", &self.max_recursion_depth)
            .field("cancellation_token", &self.cancellation_token)
            .field("import_resolver", &self.import_resolver.is_some())
            .field("search_dirs", &self.search_dirs)
            .finish()
    }
}
