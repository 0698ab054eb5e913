// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Argument evaluation and parameter binding

use super::error::{EvalError, EvalResult};
use super::evaluator::{Ctx, Evaluator};
use super::scope::ScopeId;
use super::value::Value;
use crate::ast::{Argument, Parameter};
use crate::geometry::GeometryBackend;
use nalgebra::{Vector2, Vector3};
use tracing::warn;

/// An evaluated call-site argument
#[derive(Debug, Clone)]
pub(crate) struct Arg<'a> {
    pub name: Option<&'a str>,
    pub value: Value<'a>,
}

pub(crate) fn is_special(name: &str) -> bool {
    name.starts_with('$')
}

impl<'a, B: GeometryBackend> Evaluator<'a, B> {
    /// Evaluate arguments left to right in the caller's context
    pub(crate) fn eval_args(
        &mut self,
        args: &'a [Argument],
        ctx: Ctx<'a, '_>,
    ) -> EvalResult<Vec<Arg<'a>>> {
        args.iter()
            .map(|arg| {
                Ok(Arg {
                    name: arg.name.as_deref(),
                    value: self.eval_expr(&arg.value, ctx)?,
                })
            })
            .collect()
    }

    /// Bind `name` in `scope`, or in the current `$` frame for special names
    pub(crate) fn bind(&mut self, scope: ScopeId, name: &str, value: Value<'a>) {
        if is_special(name) {
            self.specials.set(name, value);
        } else {
            self.scopes.set_var(scope, name, value);
        }
    }

    /// Bind call arguments to declared parameters in a fresh call scope.
    ///
    /// Positional arguments fill parameters in order, named arguments then
    /// override by name, and parameters still unset take their default,
    /// evaluated in the call scope so it can see earlier parameters.
    /// Parameters with neither are bound to `undef`. `$` arguments go to the
    /// current special frame whether declared or not.
    pub(crate) fn bind_parameters(
        &mut self,
        callee: &str,
        params: &'a [Parameter],
        args: Vec<Arg<'a>>,
        scope: ScopeId,
        line: usize,
    ) -> EvalResult<()> {
        let mut slots: Vec<Option<Value<'a>>> = vec![None; params.len()];
        let mut named = Vec::new();
        let mut position = 0;

        for arg in args {
            match arg.name {
                Some(name) => named.push((name, arg.value)),
                None => {
                    match slots.get_mut(position) {
                        Some(slot) => *slot = Some(arg.value),
                        None => warn!(callee, line, "ignoring extra positional argument"),
                    }
                    position += 1;
                }
            }
        }

        for (name, value) in named {
            match params.iter().position(|p| p.name == name) {
                Some(index) => slots[index] = Some(value),
                None if is_special(name) => self.specials.set(name, value),
                None => warn!(callee, line, parameter = name, "ignoring unknown named argument"),
            }
        }

        for (param, slot) in params.iter().zip(slots) {
            let value = match (slot, &param.default) {
                (Some(value), _) => value,
                (None, Some(default)) => self.eval_expr(
                    default,
                    Ctx {
                        scope,
                        children: None,
                    },
                )?,
                (None, None) => Value::Undefined,
            };
            self.bind(scope, &param.name, value);
        }
        Ok(())
    }
}

/// Arguments of a built-in module matched against its parameter names.
///
/// `undef` counts as absent, so `cube(undef)` uses the default size. A
/// present value of the wrong type is a type mismatch.
pub(crate) struct BuiltinArgs<'a> {
    module: &'static str,
    params: &'static [&'static str],
    values: Vec<Option<Value<'a>>>,
    line: usize,
}

impl<'a> BuiltinArgs<'a> {
    /// `$` arguments must already have been moved to the special frame
    pub fn bind(
        module: &'static str,
        params: &'static [&'static str],
        args: Vec<Arg<'a>>,
        line: usize,
    ) -> Self {
        let mut values: Vec<Option<Value<'a>>> = vec![None; params.len()];
        let mut named = Vec::new();
        let mut position = 0;
        for arg in args {
            match arg.name {
                Some(name) => named.push((name, arg.value)),
                None => {
                    match values.get_mut(position) {
                        Some(slot) => *slot = Some(arg.value),
                        None => warn!(module, line, "ignoring extra positional argument"),
                    }
                    position += 1;
                }
            }
        }
        for (name, value) in named {
            match params.iter().position(|p| *p == name) {
                Some(index) => values[index] = Some(value),
                None if is_special(name) => {}
                None => warn!(module, line, parameter = name, "ignoring unknown named argument"),
            }
        }
        Self {
            module,
            params,
            values,
            line,
        }
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn get(&self, name: &str) -> Option<&Value<'a>> {
        let index = self.params.iter().position(|p| *p == name)?;
        self.values[index].as_ref().filter(|v| !v.is_undefined())
    }

    pub fn mismatch(&self, name: &str, expected: &str, found: &Value<'a>) -> EvalError {
        EvalError::type_mismatch(
            format!(
                "{}() expects {} for '{}', got {}",
                self.module,
                expected,
                name,
                found.type_name()
            ),
            self.line,
        )
    }

    pub fn number(&self, name: &str) -> EvalResult<Option<f64>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(Some(*n)),
            Some(other) => Err(self.mismatch(name, "a number", other)),
        }
    }

    pub fn flag(&self, name: &str) -> EvalResult<bool> {
        match self.get(name) {
            None => Ok(false),
            Some(value @ (Value::Bool(_) | Value::Number(_))) => Ok(value.is_truthy()),
            Some(other) => Err(self.mismatch(name, "a boolean", other)),
        }
    }

    /// A 3-vector; a number fills every axis, shorter vectors are padded
    /// with `fill`
    pub fn vec3(&self, name: &str, fill: f64) -> EvalResult<Option<Vector3<f64>>> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        if let Value::Number(n) = value {
            return Ok(Some(Vector3::repeat(*n)));
        }
        match value.as_numbers() {
            Some(v) if (1..=3).contains(&v.len()) => Ok(Some(Vector3::new(
                v[0],
                v.get(1).copied().unwrap_or(fill),
                v.get(2).copied().unwrap_or(fill),
            ))),
            _ => Err(self.mismatch(name, "a number or a vector of up to 3 numbers", value)),
        }
    }

    pub fn vec2(&self, name: &str) -> EvalResult<Option<Vector2<f64>>> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        if let Value::Number(n) = value {
            return Ok(Some(Vector2::repeat(*n)));
        }
        match value.as_numbers() {
            Some(v) if v.len() == 2 => Ok(Some(Vector2::new(v[0], v[1]))),
            _ => Err(self.mismatch(name, "a number or a 2-vector", value)),
        }
    }

    /// A list of points with `dims` coordinates each
    pub fn points(&self, name: &str, dims: usize) -> EvalResult<Option<Vec<Vec<f64>>>> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        let expected = format!("a list of {}D points", dims);
        let items = value
            .as_vector()
            .ok_or_else(|| self.mismatch(name, &expected, value))?;
        items
            .iter()
            .map(|p| match p.as_numbers() {
                Some(coords) if coords.len() == dims => Ok(coords),
                _ => Err(self.mismatch(name, &expected, value)),
            })
            .collect::<EvalResult<Vec<_>>>()
            .map(Some)
    }

    /// A list of index lists
    pub fn indices(&self, name: &str) -> EvalResult<Option<Vec<Vec<usize>>>> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        let invalid = || self.mismatch(name, "a list of index lists", value);
        let lists = value.as_vector().ok_or_else(invalid)?;
        lists
            .iter()
            .map(|list| {
                list.as_numbers()
                    .filter(|ns| ns.iter().all(|n| *n >= 0.0 && n.fract() == 0.0))
                    .map(|ns| ns.into_iter().map(|n| n as usize).collect())
                    .ok_or_else(invalid)
            })
            .collect::<EvalResult<Vec<_>>>()
            .map(Some)
    }
}
