// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Library resolution for `include <...>` and `use <...>`
//!
//! All library sources are read and parsed before evaluation starts, so the
//! evaluator itself performs no I/O.

use super::{parse, tokenize};
use crate::ast::{ImportKind, Stmt, StmtKind};
use ahash::AHashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Default maximum size of a library file
pub const DEFAULT_MAX_IMPORT_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ImportError {
    #[error("absolute library paths are not allowed: {0}")]
    AbsolutePath(String),
    #[error("library path leaves the search directories: {0}")]
    Traversal(String),
    #[error("file type not allowed for libraries: {0}")]
    Extension(String),
    #[error("{path} is {size} bytes, over the {limit} byte limit")]
    TooLarge { path: String, size: u64, limit: u64 },
    #[error("library not found: {0}")]
    NotFound(String),
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },
    #[error("no import resolver configured, cannot load {0}")]
    NoResolver(String),
    #[error("include cycle through {0}")]
    Cycle(String),
    #[error("{path}: {message}")]
    Invalid { path: String, message: String },
}

/// Maps a library path to its source text
pub trait ImportResolver: Send + Sync {
    fn resolve(&self, path: &str, search_dirs: &[PathBuf]) -> Result<String, ImportError>;
}

/// Sandboxed filesystem resolver.
///
/// Paths must be relative and may not contain `..`. Call-site search
/// directories are tried before the resolver's own.
#[derive(Debug, Clone)]
pub struct FsResolver {
    search_dirs: Vec<PathBuf>,
    extensions: Vec<String>,
    max_bytes: u64,
}

impl Default for FsResolver {
    fn default() -> Self {
        Self {
            search_dirs: Vec::new(),
            extensions: vec!["scad".to_string()],
            max_bytes: DEFAULT_MAX_IMPORT_BYTES,
        }
    }
}

impl FsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_dirs(mut self, dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.search_dirs = dirs.into_iter().collect();
        self
    }

    pub fn with_extensions(mut self, extensions: impl IntoIterator<Item = String>) -> Self {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    fn check_path(&self, path: &str) -> Result<(), ImportError> {
        let candidate = Path::new(path);
        if candidate.is_absolute() || candidate.has_root() {
            return Err(ImportError::AbsolutePath(path.to_string()));
        }
        if candidate
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(ImportError::Traversal(path.to_string()));
        }
        let extension = candidate
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !self.extensions.iter().any(|allowed| *allowed == extension) {
            return Err(ImportError::Extension(path.to_string()));
        }
        Ok(())
    }
}

impl ImportResolver for FsResolver {
    fn resolve(&self, path: &str, search_dirs: &[PathBuf]) -> Result<String, ImportError> {
        self.check_path(path)?;

        for dir in search_dirs.iter().chain(&self.search_dirs) {
            let candidate = dir.join(path);
            let Ok(metadata) = fs::metadata(&candidate) else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            if metadata.len() > self.max_bytes {
                return Err(ImportError::TooLarge {
                    path: path.to_string(),
                    size: metadata.len(),
                    limit: self.max_bytes,
                });
            }
            return fs::read_to_string(&candidate).map_err(|e| ImportError::Io {
                path: path.to_string(),
                message: e.to_string(),
            });
        }

        Err(ImportError::NotFound(path.to_string()))
    }
}

/// In-memory resolver keyed by path, for embedding and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    files: AHashMap<String, String>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, source: impl Into<String>) -> Self {
        self.files.insert(path.into(), source.into());
        self
    }
}

impl ImportResolver for MemoryResolver {
    fn resolve(&self, path: &str, _search_dirs: &[PathBuf]) -> Result<String, ImportError> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| ImportError::NotFound(path.to_string()))
    }
}

/// Parsed library files reachable from a program
#[derive(Debug, Default)]
pub struct Libraries {
    files: AHashMap<String, Vec<Stmt>>,
}

impl Libraries {
    /// Resolve and parse every library referenced by `program`, transitively.
    ///
    /// An `include` that re-enters a file still being loaded is a cycle
    /// error. A `use` of such a file is skipped, since it only imports
    /// declarations.
    pub fn load(
        program: &[Stmt],
        resolver: Option<&dyn ImportResolver>,
        search_dirs: &[PathBuf],
    ) -> Result<Self, ImportError> {
        let mut loader = Loader {
            resolver,
            search_dirs,
            libraries: Libraries::default(),
            in_progress: Vec::new(),
        };
        loader.visit(program)?;
        Ok(loader.libraries)
    }

    pub fn get(&self, path: &str) -> Option<&[Stmt]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

struct Loader<'r> {
    resolver: Option<&'r dyn ImportResolver>,
    search_dirs: &'r [PathBuf],
    libraries: Libraries,
    in_progress: Vec<String>,
}

impl Loader<'_> {
    fn visit(&mut self, stmts: &[Stmt]) -> Result<(), ImportError> {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Import { kind, path } if *kind != ImportKind::Geometry => {
                    self.load(*kind, path)?;
                }
                StmtKind::ModuleDecl(decl) => self.visit(&decl.body)?,
                StmtKind::ModuleCall(call) => self.visit(&call.children)?,
                StmtKind::If {
                    then_branch,
                    else_branch,
                    ..
                } => {
                    self.visit(then_branch)?;
                    self.visit(else_branch)?;
                }
                StmtKind::For { body, .. } | StmtKind::Let { body, .. } | StmtKind::Block(body) => {
                    self.visit(body)?
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn load(&mut self, kind: ImportKind, path: &str) -> Result<(), ImportError> {
        if self.in_progress.iter().any(|p| p == path) {
            return match kind {
                ImportKind::Include => Err(ImportError::Cycle(path.to_string())),
                _ => Ok(()),
            };
        }
        if self.libraries.files.contains_key(path) {
            return Ok(());
        }

        let resolver = self
            .resolver
            .ok_or_else(|| ImportError::NoResolver(path.to_string()))?;
        let source = resolver.resolve(path, self.search_dirs)?;
        let invalid = |message: String| ImportError::Invalid {
            path: path.to_string(),
            message,
        };
        let tokens = tokenize(&source).map_err(|e| invalid(e.to_string()))?;
        let stmts = parse(&tokens).map_err(|e| invalid(e.to_string()))?;
        debug!(path, statements = stmts.len(), "loaded library");

        self.in_progress.push(path.to_string());
        let nested = self.visit(&stmts);
        self.in_progress.pop();
        nested?;

        self.libraries.files.insert(path.to_string(), stmts);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn program(source: &str) -> Vec<Stmt> {
        parse(&tokenize(source).unwrap()).unwrap()
    }

    #[test]
    fn test_fs_resolver_searches_in_order() -> anyhow::Result<()> {
        let first = TempDir::new()?;
        let second = TempDir::new()?;
        fs::write(second.path().join("lib.scad"), "x = 2;")?;
        let resolver = FsResolver::new().with_search_dirs(vec![second.path().to_path_buf()]);

        let source = resolver.resolve("lib.scad", &[first.path().to_path_buf()])?;
        assert_eq!(source, "x = 2;");

        fs::write(first.path().join("lib.scad"), "x = 1;")?;
        let source = resolver.resolve("lib.scad", &[first.path().to_path_buf()])?;
        assert_eq!(source, "x = 1;");
        Ok(())
    }

    #[test]
    fn test_fs_resolver_sandbox() {
        let resolver = FsResolver::new();
        assert!(matches!(
            resolver.resolve("/etc/passwd.scad", &[]),
            Err(ImportError::AbsolutePath(_))
        ));
        assert!(matches!(
            resolver.resolve("../secret.scad", &[]),
            Err(ImportError::Traversal(_))
        ));
        assert!(matches!(
            resolver.resolve("lib/../../x.scad", &[]),
            Err(ImportError::Traversal(_))
        ));
        assert!(matches!(
            resolver.resolve("notes.txt", &[]),
            Err(ImportError::Extension(_))
        ));
        assert!(matches!(
            resolver.resolve("missing.scad", &[]),
            Err(ImportError::NotFound(_))
        ));
    }

    #[test]
    fn test_fs_resolver_size_limit() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut file = fs::File::create(dir.path().join("big.scad"))?;
        file.write_all(&[b' '; 64])?;
        let resolver = FsResolver::new().with_max_bytes(16);
        let err = resolver
            .resolve("big.scad", &[dir.path().to_path_buf()])
            .unwrap_err();
        assert!(matches!(err, ImportError::TooLarge { size: 64, .. }));
        Ok(())
    }

    #[test]
    fn test_libraries_load_transitively() {
        let resolver = MemoryResolver::new()
            .with_file("a.scad", "include <b.scad>\nmodule a() cube();")
            .with_file("b.scad", "function b() = 1;");
        let libraries = Libraries::load(&program("use <a.scad>"), Some(&resolver), &[]).unwrap();
        assert_eq!(libraries.len(), 2);
        assert_eq!(libraries.get("b.scad").map(|s| s.len()), Some(1));
    }

    #[test]
    fn test_include_cycle() {
        let resolver = MemoryResolver::new()
            .with_file("a.scad", "include <b.scad>")
            .with_file("b.scad", "include <a.scad>");
        let err = Libraries::load(&program("include <a.scad>"), Some(&resolver), &[]).unwrap_err();
        assert_eq!(err, ImportError::Cycle("a.scad".into()));
    }

    #[test]
    fn test_use_cycle_is_skipped() {
        let resolver = MemoryResolver::new()
            .with_file("a.scad", "use <b.scad>\nfunction a() = 1;")
            .with_file("b.scad", "use <a.scad>\nfunction b() = 2;");
        let libraries = Libraries::load(&program("use <a.scad>"), Some(&resolver), &[]).unwrap();
        assert_eq!(libraries.len(), 2);
    }

    #[test]
    fn test_library_parse_error_names_file() {
        let resolver = MemoryResolver::new().with_file("bad.scad", "module (");
        let err = Libraries::load(&program("use <bad.scad>"), Some(&resolver), &[]).unwrap_err();
        assert!(err.to_string().starts_with("bad.scad: line 1"));
    }

    #[test]
    fn test_missing_resolver() {
        let err = Libraries::load(&program("include <a.scad>"), None, &[]).unwrap_err();
        assert!(matches!(err, ImportError::NoResolver(_)));
    }
}
