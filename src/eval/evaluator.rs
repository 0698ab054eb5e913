// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Statement execution and module instantiation

use super::args::{is_special, Arg};
use super::cancel::CancellationToken;
use super::error::{EvalError, EvalErrorKind, EvalResult};
use super::modules::is_builtin_module;
use super::options::RunOptions;
use super::program::{Annotation, Geometry, GeometryProgram};
use super::scope::{ScopeArena, ScopeId, SpecialVars};
use super::value::{FunctionValue, ModuleValue, Value};
use crate::ast::{Binding, ImportKind, Modifier, ModuleCall, Stmt, StmtKind};
use crate::geometry::{BooleanOp, GeometryBackend, Handle, Primitive};
use crate::io::{ImportError, Libraries};
use ahash::AHashMap;
use nalgebra::{Matrix4, Vector2};
use std::rc::Rc;
use tracing::{debug, info, trace, warn};

/// Child statements of a module call together with the context of the
/// call site they are evaluated in
pub(crate) struct Children<'a, 'c> {
    pub stmts: &'a [Stmt],
    pub caller: Ctx<'a, 'c>,
}

/// Where a statement or expression is evaluated: its lexical scope and the
/// children of the module call whose body is running, if any
#[derive(Clone, Copy)]
pub(crate) struct Ctx<'a, 'c> {
    pub scope: ScopeId,
    pub children: Option<&'c Children<'a, 'c>>,
}

/// Tree-walking evaluator that turns statements into backend calls.
///
/// The evaluator borrows the program (and any preloaded libraries) for
/// `'a`, so closures can point straight into the AST. Root-scope variables
/// persist across [`Evaluator::evaluate`] calls; everything else is per run.
pub struct Evaluator<'a, B: GeometryBackend> {
    pub(crate) backend: B,
    pub(crate) scopes: ScopeArena<'a>,
    pub(crate) specials: SpecialVars<'a>,
    pub(crate) echoes: Vec<String>,
    libraries: Option<&'a Libraries>,
    used: AHashMap<&'a str, ScopeId>,
    depth: usize,
    max_depth: usize,
    pub(crate) expr_depth: usize,
    cancel: CancellationToken,
    root_override: Option<Vec<Geometry>>,
}

impl<'a, B: GeometryBackend> Evaluator<'a, B> {
    pub fn new(backend: B, options: &RunOptions) -> Self {
        let mut base: Vec<(String, Value<'a>)> = vec![
            ("$fn".to_string(), Value::Number(0.0)),
            ("$fa".to_string(), Value::Number(12.0)),
            ("$fs".to_string(), Value::Number(2.0)),
            ("$t".to_string(), Value::Number(0.0)),
            ("$preview".to_string(), Value::Bool(false)),
        ];
        for (name, value) in &options.special_vars {
            let value: Value<'a> = value.clone();
            base.push((name.clone(), value));
        }

        let mut scopes = ScopeArena::new();
        let root = scopes.root();
        scopes.set_var(root, "PI", Value::Number(std::f64::consts::PI));

        Self {
            backend,
            scopes,
            specials: SpecialVars::new(base),
            echoes: Vec::new(),
            libraries: None,
            used: AHashMap::new(),
            depth: 0,
            max_depth: options.max_recursion_depth,
            expr_depth: 0,
            cancel: options.cancellation_token.clone(),
            root_override: None,
        }
    }

    /// Make preloaded `include`/`use` libraries available
    pub fn with_libraries(mut self, libraries: &'a Libraries) -> Self {
        self.libraries = Some(libraries);
        self
    }

    /// Bind a variable in the root scope before evaluation
    pub fn define_global(&mut self, name: &str, value: Value<'a>) {
        let root = self.scopes.root();
        self.bind(root, name, value);
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    pub fn evaluate(&mut self, program: &'a [Stmt]) -> EvalResult<GeometryProgram> {
        self.echoes.clear();
        self.root_override = None;
        self.depth = 0;
        self.expr_depth = 0;

        let ctx = Ctx {
            scope: self.scopes.root(),
            children: None,
        };
        let roots: Vec<Geometry> = self.exec_block(program, ctx)?.into_iter().flatten().collect();
        let roots = self.root_override.take().unwrap_or(roots);

        debug!(
            roots = roots.len(),
            echoes = self.echoes.len(),
            scopes = self.scopes.len(),
            "assembled geometry program"
        );
        Ok(GeometryProgram {
            roots,
            echoes: std::mem::take(&mut self.echoes),
        })
    }

    /// Hoist declarations, then run each statement in `ctx`. Returns the
    /// geometry of each statement that produced any, one group per
    /// statement.
    pub(crate) fn exec_block(
        &mut self,
        stmts: &'a [Stmt],
        ctx: Ctx<'a, '_>,
    ) -> EvalResult<Vec<Vec<Geometry>>> {
        self.hoist(stmts, ctx.scope)?;
        let mut groups = Vec::new();
        for stmt in stmts {
            self.check_cancelled(stmt.line())?;
            let produced = self.exec_stmt(stmt, ctx)?;
            if !produced.is_empty() {
                groups.push(produced);
            }
        }
        Ok(groups)
    }

    /// Run `stmts` in a fresh child scope with its own `$` frame
    pub(crate) fn exec_scoped(
        &mut self,
        stmts: &'a [Stmt],
        ctx: Ctx<'a, '_>,
    ) -> EvalResult<Vec<Vec<Geometry>>> {
        if stmts.is_empty() {
            return Ok(Vec::new());
        }
        let scope = self.scopes.push(ctx.scope);
        self.specials.push_frame();
        let result = self.exec_block(stmts, Ctx { scope, ..ctx });
        self.specials.pop_frame();
        self.scopes.release(scope);
        result
    }

    fn hoist(&mut self, stmts: &'a [Stmt], scope: ScopeId) -> EvalResult<()> {
        let mut captured = false;
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::FunctionDecl(decl) => {
                    let function = FunctionValue {
                        name: Some(&decl.name),
                        params: &decl.params,
                        body: &decl.body,
                        scope,
                    };
                    self.scopes
                        .define_function(scope, &decl.name, Rc::new(function));
                    captured = true;
                }
                StmtKind::ModuleDecl(decl) => {
                    self.scopes
                        .define_module(scope, &decl.name, Rc::new(ModuleValue { decl, scope }));
                    captured = true;
                }
                _ => {}
            }
        }
        if captured {
            self.scopes.pin(scope);
        }

        for stmt in stmts {
            if let StmtKind::Import {
                kind: ImportKind::Use,
                path,
            } = &stmt.kind
            {
                self.use_library(path, scope, stmt.line())?;
            }
        }
        Ok(())
    }

    fn exec_stmt(&mut self, stmt: &'a Stmt, ctx: Ctx<'a, '_>) -> EvalResult<Vec<Geometry>> {
        let line = stmt.line();
        match &stmt.kind {
            StmtKind::Assignment { name, value } => {
                let value = self.eval_expr(value, ctx)?;
                self.bind(ctx.scope, name, value);
                Ok(Vec::new())
            }
            StmtKind::FunctionDecl(_) | StmtKind::ModuleDecl(_) => Ok(Vec::new()),
            StmtKind::ModuleCall(call) => self.instantiate(call, ctx, line),
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let branch = if self.eval_expr(condition, ctx)?.is_truthy() {
                    then_branch
                } else {
                    else_branch
                };
                Ok(flatten(self.exec_scoped(branch, ctx)?))
            }
            StmtKind::For { bindings, body } => {
                let mut out = Vec::new();
                self.exec_for(bindings, body, ctx, line, &mut out)?;
                Ok(out)
            }
            StmtKind::Let { bindings, body } => {
                let scope = self.scopes.push(ctx.scope);
                self.specials.push_frame();
                let inner = Ctx { scope, ..ctx };
                let result = self
                    .bind_sequential(bindings, inner)
                    .and_then(|_| self.exec_block(body, inner));
                self.specials.pop_frame();
                self.scopes.release(scope);
                Ok(flatten(result?))
            }
            StmtKind::Block(body) => Ok(flatten(self.exec_scoped(body, ctx)?)),
            StmtKind::Import { kind, path } => match kind {
                ImportKind::Include => {
                    let stmts = self.library(path, line)?;
                    debug!(path = %path, line, "including library");
                    Ok(flatten(self.exec_block(stmts, ctx)?))
                }
                ImportKind::Use => Ok(Vec::new()),
                ImportKind::Geometry => {
                    let primitive = Primitive::Import { path: path.clone() };
                    let handle = self.create_primitive(&primitive, line)?;
                    Ok(vec![Geometry::new(handle)])
                }
            },
        }
    }

    /// Bind `let`/`for`-style bindings one after another, so later ones see
    /// earlier ones
    pub(crate) fn bind_sequential(
        &mut self,
        bindings: &'a [Binding],
        ctx: Ctx<'a, '_>,
    ) -> EvalResult<()> {
        for binding in bindings {
            let value = self.eval_expr(&binding.value, ctx)?;
            self.bind(ctx.scope, &binding.name, value);
        }
        Ok(())
    }

    fn exec_for(
        &mut self,
        bindings: &'a [Binding],
        body: &'a [Stmt],
        ctx: Ctx<'a, '_>,
        line: usize,
        out: &mut Vec<Geometry>,
    ) -> EvalResult<()> {
        let Some((first, rest)) = bindings.split_first() else {
            out.extend(flatten(self.exec_block(body, ctx)?));
            return Ok(());
        };

        let iterable = self.eval_expr(&first.value, ctx)?;
        if let Value::Range(range) = &iterable {
            if range.is_empty() {
                warn!(line, variable = %first.name, "for loop over an empty range");
            }
        }
        for item in iterable.iter() {
            self.check_cancelled(line)?;
            let scope = self.scopes.push(ctx.scope);
            self.specials.push_frame();
            self.bind(scope, &first.name, item);
            let result = self.exec_for(rest, body, Ctx { scope, ..ctx }, line, out);
            self.specials.pop_frame();
            self.scopes.release(scope);
            result?;
        }
        Ok(())
    }

    fn instantiate(
        &mut self,
        call: &'a ModuleCall,
        ctx: Ctx<'a, '_>,
        line: usize,
    ) -> EvalResult<Vec<Geometry>> {
        if call.modifier == Some(Modifier::Disable) {
            debug!(module = %call.name, line, "skipping disabled instantiation");
            return Ok(Vec::new());
        }
        debug!(module = %call.name, line, "instantiating module");

        let args = self.eval_args(&call.args, ctx)?;
        let mut produced = if let Some(module) = self.scopes.lookup_module(ctx.scope, &call.name) {
            self.call_user_module(&module, call, args, ctx, line)?
        } else if call.name == "children" {
            self.call_children(args, ctx, line)?
        } else if is_builtin_module(&call.name) {
            self.with_call_frame(call, args, |this, args| {
                this.call_builtin_module(call, args, ctx, line)
            })?
        } else {
            return Err(EvalError::new(
                EvalErrorKind::UndefinedModule(call.name.clone()),
                line,
            ));
        };

        match call.modifier {
            Some(Modifier::RootOnly) => {
                if self.root_override.is_none() {
                    debug!(module = %call.name, line, "root modifier replaces program output");
                    self.root_override = Some(produced.clone());
                }
            }
            Some(Modifier::Highlight) => annotate(&mut produced, Annotation::Highlight),
            Some(Modifier::Background) => annotate(&mut produced, Annotation::Background),
            _ => {}
        }
        Ok(produced)
    }

    /// Push the `$` frame for a module call: `$` arguments and `$children`.
    /// The remaining arguments are passed on to `body`.
    fn with_call_frame<T>(
        &mut self,
        call: &'a ModuleCall,
        args: Vec<Arg<'a>>,
        body: impl FnOnce(&mut Self, Vec<Arg<'a>>) -> EvalResult<T>,
    ) -> EvalResult<T> {
        self.specials.push_frame();
        let children = call.children.iter().filter(|s| s.is_instantiation()).count();
        self.specials.set("$children", Value::Number(children as f64));

        let mut rest = Vec::with_capacity(args.len());
        for arg in args {
            match arg.name {
                Some(name) if is_special(name) => self.specials.set(name, arg.value),
                _ => rest.push(arg),
            }
        }

        let result = body(self, rest);
        self.specials.pop_frame();
        result
    }

    fn call_user_module(
        &mut self,
        module: &ModuleValue<'a>,
        call: &'a ModuleCall,
        args: Vec<Arg<'a>>,
        ctx: Ctx<'a, '_>,
        line: usize,
    ) -> EvalResult<Vec<Geometry>> {
        self.enter(line)?;
        let decl = module.decl;
        let result = self.with_call_frame(call, args, |this, args| {
            let scope = this.scopes.push(module.scope);
            let children = Children {
                stmts: &call.children,
                caller: ctx,
            };
            let inner = Ctx {
                scope,
                children: Some(&children),
            };
            let result = this
                .bind_parameters(&decl.name, &decl.params, args, scope, line)
                .and_then(|_| this.exec_block(&decl.body, inner));
            this.scopes.release(scope);
            result
        });
        self.leave();
        Ok(flatten(result?))
    }

    /// `children()`, `children(i)`, `children([i, j])`, `children([a:b])`
    fn call_children(
        &mut self,
        args: Vec<Arg<'a>>,
        ctx: Ctx<'a, '_>,
        line: usize,
    ) -> EvalResult<Vec<Geometry>> {
        let Some(children) = ctx.children else {
            debug!(line, "children() outside of a module body");
            return Ok(Vec::new());
        };
        let selection = args
            .into_iter()
            .find(|a| a.name.is_none() || a.name == Some("index"))
            .map(|a| a.value)
            .filter(|v| !v.is_undefined());
        let indices = match &selection {
            None => None,
            Some(Value::Number(n)) => Some(vec![*n]),
            Some(v @ (Value::Vector(_) | Value::Range(_))) => Some(
                v.iter()
                    .map(|i| {
                        i.as_number().ok_or_else(|| {
                            EvalError::type_mismatch("children() indices must be numbers", line)
                        })
                    })
                    .collect::<EvalResult<Vec<f64>>>()?,
            ),
            Some(other) => {
                return Err(EvalError::type_mismatch(
                    format!("children() expects an index, got {}", other.type_name()),
                    line,
                ))
            }
        };

        self.enter(line)?;
        let scope = self.scopes.push(children.caller.scope);
        self.specials.push_frame();
        let caller = Ctx {
            scope,
            children: children.caller.children,
        };
        let result = match indices {
            None => self.exec_block(children.stmts, caller).map(flatten),
            Some(indices) => self.exec_selected(children.stmts, &indices, caller, line),
        };
        self.specials.pop_frame();
        self.scopes.release(scope);
        self.leave();
        result
    }

    fn exec_selected(
        &mut self,
        stmts: &'a [Stmt],
        indices: &[f64],
        ctx: Ctx<'a, '_>,
        line: usize,
    ) -> EvalResult<Vec<Geometry>> {
        self.hoist(stmts, ctx.scope)?;
        let mut instantiations = Vec::new();
        for stmt in stmts {
            if stmt.is_instantiation() {
                instantiations.push(stmt);
            } else {
                self.exec_stmt(stmt, ctx)?;
            }
        }

        let mut out = Vec::new();
        for &index in indices {
            let selected = (index >= 0.0 && index.fract() == 0.0)
                .then(|| instantiations.get(index as usize).copied())
                .flatten();
            match selected {
                Some(stmt) => {
                    self.check_cancelled(stmt.line())?;
                    out.extend(self.exec_stmt(stmt, ctx)?);
                }
                None => warn!(
                    line,
                    index,
                    count = instantiations.len(),
                    "children() index out of range"
                ),
            }
        }
        Ok(out)
    }

    fn use_library(&mut self, path: &'a str, scope: ScopeId, line: usize) -> EvalResult<()> {
        let library_scope = match self.used.get(path) {
            Some(id) => *id,
            None => {
                let stmts = self.library(path, line)?;
                debug!(path, line, "using library");
                let id = self.scopes.push(self.scopes.root());
                self.scopes.pin(id);
                self.used.insert(path, id);
                self.load_declarations(stmts, id)?;
                id
            }
        };
        self.scopes.import_declarations(library_scope, scope);
        Ok(())
    }

    /// Declarations and top-level assignments of a used library; its
    /// geometry is ignored
    fn load_declarations(&mut self, stmts: &'a [Stmt], scope: ScopeId) -> EvalResult<()> {
        self.hoist(stmts, scope)?;
        let ctx = Ctx {
            scope,
            children: None,
        };
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Assignment { .. } => {
                    self.exec_stmt(stmt, ctx)?;
                }
                StmtKind::Import {
                    kind: ImportKind::Include,
                    path,
                } => {
                    let included = self.library(path, stmt.line())?;
                    self.load_declarations(included, scope)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn library(&self, path: &str, line: usize) -> EvalResult<&'a [Stmt]> {
        self.libraries
            .and_then(|libraries| libraries.get(path))
            .ok_or_else(|| {
                EvalError::new(
                    EvalErrorKind::ImportError(ImportError::NotFound(path.to_string())),
                    line,
                )
            })
    }

    pub(crate) fn check_cancelled(&self, line: usize) -> EvalResult<()> {
        if self.cancel.is_cancelled() {
            return Err(EvalError::new(EvalErrorKind::Cancelled, line));
        }
        Ok(())
    }

    pub(crate) fn enter(&mut self, line: usize) -> EvalResult<()> {
        if self.depth >= self.max_depth {
            return Err(EvalError::new(
                EvalErrorKind::RecursionLimit(self.max_depth),
                line,
            ));
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub(crate) fn echo(&mut self, message: String) {
        info!(target: "polyframe::echo", "ECHO: {}", message);
        self.echoes.push(message);
    }

    // Backend calls

    pub(crate) fn create_primitive(
        &mut self,
        primitive: &Primitive,
        line: usize,
    ) -> EvalResult<Handle> {
        trace!(primitive = primitive.kind(), line, "create_primitive");
        self.backend
            .create_primitive(primitive)
            .map_err(|e| backend_failure(e, line))
    }

    pub(crate) fn transform(
        &mut self,
        geometry: Geometry,
        matrix: &Matrix4<f64>,
        line: usize,
    ) -> EvalResult<Geometry> {
        trace!(handle = %geometry.handle, line, "transform");
        let handle = self
            .backend
            .transform(geometry.handle, matrix)
            .map_err(|e| backend_failure(e, line))?;
        Ok(Geometry {
            handle,
            annotations: geometry.annotations,
        })
    }

    pub(crate) fn boolean(
        &mut self,
        op: BooleanOp,
        handles: &[Handle],
        line: usize,
    ) -> EvalResult<Handle> {
        trace!(op = op.name(), operands = handles.len(), line, "boolean");
        self.backend
            .boolean(op, handles)
            .map_err(|e| backend_failure(e, line))
    }

    pub(crate) fn hull(&mut self, handles: &[Handle], line: usize) -> EvalResult<Handle> {
        trace!(operands = handles.len(), line, "hull");
        self.backend
            .hull(handles)
            .map_err(|e| backend_failure(e, line))
    }

    pub(crate) fn minkowski(&mut self, a: Handle, b: Handle, line: usize) -> EvalResult<Handle> {
        trace!(a = %a, b = %b, line, "minkowski");
        self.backend
            .minkowski(a, b)
            .map_err(|e| backend_failure(e, line))
    }

    pub(crate) fn extrude_linear(
        &mut self,
        handle: Handle,
        height: f64,
        twist: f64,
        scale: Vector2<f64>,
        slices: u32,
        line: usize,
    ) -> EvalResult<Handle> {
        trace!(handle = %handle, height, twist, slices, line, "extrude_linear");
        self.backend
            .extrude_linear(handle, height, twist, scale, slices)
            .map_err(|e| backend_failure(e, line))
    }

    pub(crate) fn extrude_rotate(
        &mut self,
        handle: Handle,
        angle: f64,
        segments: u32,
        line: usize,
    ) -> EvalResult<Handle> {
        trace!(handle = %handle, angle, segments, line, "extrude_rotate");
        self.backend
            .extrude_rotate(handle, angle, segments)
            .map_err(|e| backend_failure(e, line))
    }
}

fn backend_failure(error: crate::geometry::BackendError, line: usize) -> EvalError {
    EvalError::new(EvalErrorKind::BackendFailure(error), line)
}

pub(crate) fn flatten(groups: Vec<Vec<Geometry>>) -> Vec<Geometry> {
    groups.into_iter().flatten().collect()
}

fn annotate(geometries: &mut [Geometry], annotation: Annotation) {
    for geometry in geometries {
        geometry.annotate(annotation);
    }
}
