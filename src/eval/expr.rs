// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Expression evaluation

use super::args::{is_special, Arg};
use super::builtins::is_builtin_function;
use super::error::{EvalError, EvalErrorKind, EvalResult};
use super::evaluator::{Ctx, Evaluator};
use super::scope::ScopeId;
use super::value::{FunctionValue, RangeValue, Value};
use crate::ast::{Argument, BinaryOp, Binding, Expr, ExprKind, Parameter};
use crate::geometry::GeometryBackend;
use crate::io::MAX_NESTING_DEPTH;
use std::rc::Rc;
use tracing::warn;

/// Expression depth allowed within one function body. Parsed programs stay
/// well below it; it bounds syntax trees built by hand.
pub const MAX_EXPRESSION_DEPTH: usize = 2 * MAX_NESTING_DEPTH;

impl<'a, B: GeometryBackend> Evaluator<'a, B> {
    pub(crate) fn eval_expr(&mut self, expr: &'a Expr, ctx: Ctx<'a, '_>) -> EvalResult<Value<'a>> {
        if self.expr_depth >= MAX_EXPRESSION_DEPTH {
            return Err(EvalError::new(
                EvalErrorKind::RecursionLimit(MAX_EXPRESSION_DEPTH),
                expr.line(),
            ));
        }
        self.expr_depth += 1;
        let result = self.eval_expr_kind(expr, ctx);
        self.expr_depth -= 1;
        result
    }

    fn eval_expr_kind(&mut self, expr: &'a Expr, ctx: Ctx<'a, '_>) -> EvalResult<Value<'a>> {
        match &expr.kind {
            ExprKind::Number(n) => Ok(Value::Number(*n)),
            ExprKind::String(s) => Ok(Value::String(s.clone())),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::Undef => Ok(Value::Undefined),
            ExprKind::Identifier(name) => Ok(self.eval_identifier(name, ctx.scope, expr.line())),
            ExprKind::Binary { op, left, right } => self.eval_binary(*op, left, right, ctx),
            ExprKind::Unary { op, operand } => Ok(self.eval_expr(operand, ctx)?.unary(*op)),
            ExprKind::Ternary {
                condition,
                then_expr,
                else_expr,
            } => {
                let branch = if self.eval_expr(condition, ctx)?.is_truthy() {
                    then_expr
                } else {
                    else_expr
                };
                self.eval_expr(branch, ctx)
            }
            ExprKind::Range { start, step, end } => {
                self.eval_range(start, step.as_deref(), end, ctx)
            }
            ExprKind::Vector(items) => self.eval_vector(items, ctx),
            ExprKind::ListComprehension {
                generators,
                filter,
                body,
            } => {
                let mut out = Vec::new();
                self.comprehend(generators, filter.as_deref(), body, ctx, expr.line(), &mut out)?;
                Ok(Value::Vector(out))
            }
            ExprKind::Each(inner) => self.eval_expr(inner, ctx),
            ExprKind::Let { bindings, body } => self.eval_let(bindings, body, ctx),
            ExprKind::Call { callee, args } => self.eval_call(callee, args, ctx, expr.line()),
            ExprKind::Index { target, index } => {
                let target = self.eval_expr(target, ctx)?;
                let index = self.eval_expr(index, ctx)?;
                Ok(target.index(&index))
            }
            ExprKind::Member { target, member } => Ok(self.eval_expr(target, ctx)?.member(member)),
            ExprKind::FunctionLiteral { params, body } => Ok(self.closure(params, body, ctx.scope)),
        }
    }

    fn eval_identifier(&self, name: &str, scope: ScopeId, line: usize) -> Value<'a> {
        let found = if is_special(name) {
            self.specials.get(name)
        } else {
            self.scopes.lookup_var(scope, name)
        };
        match found {
            Some(value) => value.clone(),
            None => {
                warn!(line, variable = name, "unknown variable, using undef");
                Value::Undefined
            }
        }
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        left: &'a Expr,
        right: &'a Expr,
        ctx: Ctx<'a, '_>,
    ) -> EvalResult<Value<'a>> {
        let lhs = self.eval_expr(left, ctx)?;
        match op {
            BinaryOp::And if !lhs.is_truthy() => Ok(Value::Bool(false)),
            BinaryOp::Or if lhs.is_truthy() => Ok(Value::Bool(true)),
            BinaryOp::And | BinaryOp::Or => Ok(Value::Bool(self.eval_expr(right, ctx)?.is_truthy())),
            _ => {
                let rhs = self.eval_expr(right, ctx)?;
                Ok(lhs.binary(op, &rhs))
            }
        }
    }

    fn eval_range(
        &mut self,
        start: &'a Expr,
        step: Option<&'a Expr>,
        end: &'a Expr,
        ctx: Ctx<'a, '_>,
    ) -> EvalResult<Value<'a>> {
        let start = self.eval_expr(start, ctx)?;
        let step = match step {
            Some(step) => self.eval_expr(step, ctx)?,
            None => Value::Number(1.0),
        };
        let end = self.eval_expr(end, ctx)?;
        Ok(match (start, step, end) {
            (Value::Number(start), Value::Number(step), Value::Number(end)) => {
                Value::Range(RangeValue::new(start, step, end))
            }
            _ => Value::Undefined,
        })
    }

    fn eval_vector(&mut self, items: &'a [Expr], ctx: Ctx<'a, '_>) -> EvalResult<Value<'a>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            self.push_element(item, ctx, &mut out)?;
        }
        Ok(Value::Vector(out))
    }

    /// Append one list element, spreading `each` and the generator forms
    fn push_element(
        &mut self,
        expr: &'a Expr,
        ctx: Ctx<'a, '_>,
        out: &mut Vec<Value<'a>>,
    ) -> EvalResult<()> {
        match &expr.kind {
            ExprKind::Each(inner) => {
                let value = self.eval_expr(inner, ctx)?;
                for item in value.iter() {
                    self.check_cancelled(expr.line())?;
                    out.push(item);
                }
            }
            ExprKind::Ternary {
                condition,
                then_expr,
                else_expr,
            } => {
                let branch = if self.eval_expr(condition, ctx)?.is_truthy() {
                    then_expr
                } else {
                    else_expr
                };
                self.push_element(branch, ctx, out)?;
            }
            ExprKind::Let { bindings, body } => {
                let scope = self.scopes.push(ctx.scope);
                self.specials.push_frame();
                let inner = Ctx { scope, ..ctx };
                let result = self
                    .bind_sequential(bindings, inner)
                    .and_then(|_| self.push_element(body, inner, out));
                self.specials.pop_frame();
                self.scopes.release(scope);
                result?;
            }
            _ => out.push(self.eval_expr(expr, ctx)?),
        }
        Ok(())
    }

    /// Nested generator iteration, first generator outermost
    fn comprehend(
        &mut self,
        generators: &'a [Binding],
        filter: Option<&'a Expr>,
        body: &'a Expr,
        ctx: Ctx<'a, '_>,
        line: usize,
        out: &mut Vec<Value<'a>>,
    ) -> EvalResult<()> {
        let Some((first, rest)) = generators.split_first() else {
            if let Some(filter) = filter {
                if !self.eval_expr(filter, ctx)?.is_truthy() {
                    return Ok(());
                }
            }
            return self.push_element(body, ctx, out);
        };

        let iterable = self.eval_expr(&first.value, ctx)?;
        for item in iterable.iter() {
            self.check_cancelled(line)?;
            let scope = self.scopes.push(ctx.scope);
            self.specials.push_frame();
            self.bind(scope, &first.name, item);
            let result = self.comprehend(rest, filter, body, Ctx { scope, ..ctx }, line, out);
            self.specials.pop_frame();
            self.scopes.release(scope);
            result?;
        }
        Ok(())
    }

    fn eval_let(
        &mut self,
        bindings: &'a [Binding],
        body: &'a Expr,
        ctx: Ctx<'a, '_>,
    ) -> EvalResult<Value<'a>> {
        let scope = self.scopes.push(ctx.scope);
        self.specials.push_frame();
        let inner = Ctx { scope, ..ctx };
        let result = self
            .bind_sequential(bindings, inner)
            .and_then(|_| self.eval_expr(body, inner));
        self.specials.pop_frame();
        self.scopes.release(scope);
        result
    }

    fn closure(&mut self, params: &'a [Parameter], body: &'a Expr, scope: ScopeId) -> Value<'a> {
        self.scopes.pin(scope);
        Value::Function(Rc::new(FunctionValue {
            name: None,
            params,
            body,
            scope,
        }))
    }

    fn eval_call(
        &mut self,
        callee: &'a Expr,
        args: &'a [Argument],
        ctx: Ctx<'a, '_>,
        line: usize,
    ) -> EvalResult<Value<'a>> {
        let ExprKind::Identifier(name) = &callee.kind else {
            return match self.eval_expr(callee, ctx)? {
                Value::Function(function) => {
                    let args = self.eval_args(args, ctx)?;
                    self.call_function(&function, args, line)
                }
                other => Err(EvalError::type_mismatch(
                    format!("cannot call a value of type {}", other.type_name()),
                    line,
                )),
            };
        };

        if let Some(function) = self.scopes.lookup_function(ctx.scope, name) {
            let args = self.eval_args(args, ctx)?;
            return self.call_function(&function, args, line);
        }

        let variable = if is_special(name) {
            self.specials.get(name)
        } else {
            self.scopes.lookup_var(ctx.scope, name)
        };
        let variable = variable.cloned().unwrap_or_default();
        if let Value::Function(function) = &variable {
            let args = self.eval_args(args, ctx)?;
            return self.call_function(function, args, line);
        }

        if is_builtin_function(name) {
            let evaluated = self.eval_args(args, ctx)?;
            return self.call_builtin_function(name, args, evaluated, line);
        }

        Err(match variable {
            Value::Undefined => {
                EvalError::new(EvalErrorKind::UndefinedFunction(name.clone()), line)
            }
            other => EvalError::type_mismatch(
                format!("'{}' is a {}, not a function", name, other.type_name()),
                line,
            ),
        })
    }

    pub(crate) fn call_function(
        &mut self,
        function: &FunctionValue<'a>,
        args: Vec<Arg<'a>>,
        line: usize,
    ) -> EvalResult<Value<'a>> {
        self.enter(line)?;
        // the body starts a fresh expression nest; `enter` bounds the calls
        let outer_depth = std::mem::take(&mut self.expr_depth);
        let scope = self.scopes.push(function.scope);
        self.specials.push_frame();
        let name = function.name.unwrap_or("function literal");
        let body = function.body;
        let result = self
            .bind_parameters(name, function.params, args, scope, line)
            .and_then(|_| {
                self.eval_expr(
                    body,
                    Ctx {
                        scope,
                        children: None,
                    },
                )
            });
        self.specials.pop_frame();
        self.scopes.release(scope);
        self.expr_depth = outer_depth;
        self.leave();
        result
    }
}
