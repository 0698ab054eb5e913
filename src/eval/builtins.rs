// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Built-in functions
//!
//! Math and list functions are pure; non-numeric input yields `undef`
//! instead of an error, matching operator semantics.

use super::args::Arg;
use super::error::{EvalError, EvalErrorKind, EvalResult};
use super::evaluator::Evaluator;
use super::value::Value;
use crate::ast::Argument;
use crate::geometry::GeometryBackend;
use crate::utils::math::{cos_deg, sin_deg, tan_deg};

const BUILTIN_FUNCTIONS: &[&str] = &[
    "abs",
    "sign",
    "sin",
    "cos",
    "tan",
    "asin",
    "acos",
    "atan",
    "atan2",
    "floor",
    "ceil",
    "round",
    "sqrt",
    "exp",
    "ln",
    "log",
    "pow",
    "min",
    "max",
    "norm",
    "cross",
    "len",
    "concat",
    "str",
    "chr",
    "ord",
    "lookup",
    "is_undef",
    "is_num",
    "is_bool",
    "is_string",
    "is_list",
    "is_function",
    "echo",
    "assert",
];

pub(crate) fn is_builtin_function(name: &str) -> bool {
    BUILTIN_FUNCTIONS.contains(&name)
}

impl<'a, B: GeometryBackend> Evaluator<'a, B> {
    pub(crate) fn call_builtin_function(
        &mut self,
        name: &str,
        raw: &'a [Argument],
        args: Vec<Arg<'a>>,
        line: usize,
    ) -> EvalResult<Value<'a>> {
        match name {
            "echo" => {
                self.echo(format_echo(&args));
                Ok(Value::Undefined)
            }
            "assert" => {
                check_assertion(raw, &args, line)?;
                Ok(Value::Undefined)
            }
            _ => {
                let values: Vec<Value<'a>> = args.into_iter().map(|a| a.value).collect();
                Ok(apply(name, &values))
            }
        }
    }
}

/// `echo` text: `value` for positional arguments, `name = value` for named
/// ones
pub(crate) fn format_echo(args: &[Arg<'_>]) -> String {
    args.iter()
        .map(|arg| match arg.name {
            Some(name) => format!("{} = {}", name, arg.value),
            None => arg.value.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `assert(condition, message)` as statement or expression
pub(crate) fn check_assertion(raw: &[Argument], args: &[Arg<'_>], line: usize) -> EvalResult<()> {
    let pick = |name: &str, position: usize| {
        args.iter()
            .position(|a| a.name == Some(name))
            .or_else(|| {
                args.iter()
                    .enumerate()
                    .filter(|(_, a)| a.name.is_none())
                    .nth(position)
                    .map(|(i, _)| i)
            })
    };

    let condition = pick("condition", 0);
    if condition.is_some_and(|i| args[i].value.is_truthy()) {
        return Ok(());
    }

    let message = match pick("message", 1) {
        Some(i) => args[i].value.to_plain_string(),
        None => {
            let source = condition
                .and_then(|i| raw.get(i))
                .map(|arg| arg.value.to_string())
                .unwrap_or_else(|| "undef".to_string());
            format!("assert({})", source)
        }
    };
    Err(EvalError::new(EvalErrorKind::AssertionFailed(message), line))
}

fn number(values: &[Value<'_>], index: usize) -> Option<f64> {
    values.get(index).and_then(Value::as_number)
}

fn unary_math<'a>(values: &[Value<'a>], f: impl Fn(f64) -> f64) -> Value<'a> {
    number(values, 0).map_or(Value::Undefined, |x| Value::Number(f(x)))
}

fn apply<'a>(name: &str, values: &[Value<'a>]) -> Value<'a> {
    match name {
        "abs" => unary_math(values, f64::abs),
        "sign" => unary_math(values, |x| {
            if x > 0.0 {
                1.0
            } else if x < 0.0 {
                -1.0
            } else {
                0.0
            }
        }),
        "sin" => unary_math(values, sin_deg),
        "cos" => unary_math(values, cos_deg),
        "tan" => unary_math(values, tan_deg),
        "asin" => unary_math(values, |x| x.asin().to_degrees()),
        "acos" => unary_math(values, |x| x.acos().to_degrees()),
        "atan" => unary_math(values, |x| x.atan().to_degrees()),
        "atan2" => match (number(values, 0), number(values, 1)) {
            (Some(y), Some(x)) => Value::Number(y.atan2(x).to_degrees()),
            _ => Value::Undefined,
        },
        "floor" => unary_math(values, f64::floor),
        "ceil" => unary_math(values, f64::ceil),
        "round" => unary_math(values, f64::round),
        "sqrt" => unary_math(values, f64::sqrt),
        "exp" => unary_math(values, f64::exp),
        "ln" => unary_math(values, f64::ln),
        "log" => match (number(values, 0), number(values, 1)) {
            (Some(base), Some(x)) => Value::Number(x.ln() / base.ln()),
            (Some(x), None) => Value::Number(x.log10()),
            _ => Value::Undefined,
        },
        "pow" => match (number(values, 0), number(values, 1)) {
            (Some(b), Some(e)) => Value::Number(b.powf(e)),
            _ => Value::Undefined,
        },
        "min" => extremum(values, f64::min),
        "max" => extremum(values, f64::max),
        "norm" => match values.first().and_then(Value::as_numbers) {
            Some(v) => Value::Number(v.iter().map(|x| x * x).sum::<f64>().sqrt()),
            None => Value::Undefined,
        },
        "cross" => cross(values),
        "len" => match values.first() {
            Some(Value::Vector(items)) => Value::Number(items.len() as f64),
            Some(Value::String(s)) => Value::Number(s.chars().count() as f64),
            _ => Value::Undefined,
        },
        "concat" => {
            let mut out = Vec::new();
            for value in values {
                match value {
                    Value::Vector(items) => out.extend(items.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Value::Vector(out)
        }
        "str" => Value::String(values.iter().map(Value::to_plain_string).collect()),
        "chr" => {
            let mut out = String::new();
            for value in values {
                for code in value.iter().filter_map(|v| v.as_number()) {
                    if let Some(c) = char::from_u32(code as u32).filter(|_| code >= 1.0) {
                        out.push(c);
                    }
                }
            }
            Value::String(out)
        }
        "ord" => match values.first().and_then(Value::as_str) {
            Some(s) if s.chars().count() == 1 => {
                s.chars().next().map_or(Value::Undefined, |c| Value::Number(c as u32 as f64))
            }
            _ => Value::Undefined,
        },
        "lookup" => lookup(values),
        "is_undef" => Value::Bool(values.first().map_or(true, Value::is_undefined)),
        "is_num" => Value::Bool(matches!(values.first(), Some(Value::Number(n)) if !n.is_nan())),
        "is_bool" => Value::Bool(matches!(values.first(), Some(Value::Bool(_)))),
        "is_string" => Value::Bool(matches!(values.first(), Some(Value::String(_)))),
        "is_list" => Value::Bool(matches!(values.first(), Some(Value::Vector(_)))),
        "is_function" => Value::Bool(matches!(values.first(), Some(Value::Function(_)))),
        _ => Value::Undefined,
    }
}

/// `min`/`max` over numeric arguments, or over a single vector argument
fn extremum<'a>(values: &[Value<'a>], pick: fn(f64, f64) -> f64) -> Value<'a> {
    let numbers = match values {
        [single @ Value::Vector(_)] => single.as_numbers(),
        _ => values.iter().map(Value::as_number).collect(),
    };
    numbers
        .and_then(|ns| ns.into_iter().reduce(pick))
        .map_or(Value::Undefined, Value::Number)
}

fn cross<'a>(values: &[Value<'a>]) -> Value<'a> {
    let a = values.first().and_then(Value::as_numbers);
    let b = values.get(1).and_then(Value::as_numbers);
    match (a.as_deref(), b.as_deref()) {
        (Some([ax, ay]), Some([bx, by])) => Value::Number(ax * by - ay * bx),
        (Some([ax, ay, az]), Some([bx, by, bz])) => Value::Vector(vec![
            Value::Number(ay * bz - az * by),
            Value::Number(az * bx - ax * bz),
            Value::Number(ax * by - ay * bx),
        ]),
        _ => Value::Undefined,
    }
}

/// Piecewise-linear interpolation in a `[[key, value], ...]` table,
/// clamped at both ends
fn lookup<'a>(values: &[Value<'a>]) -> Value<'a> {
    let Some(key) = number(values, 0) else {
        return Value::Undefined;
    };
    let Some(table) = values.get(1).and_then(Value::as_vector) else {
        return Value::Undefined;
    };
    let mut entries: Vec<(f64, f64)> = table
        .iter()
        .filter_map(|row| match row.as_numbers().as_deref() {
            Some([k, v, ..]) => Some((*k, *v)),
            _ => None,
        })
        .collect();
    entries.sort_by(|a, b| a.0.total_cmp(&b.0));

    let (Some(first), Some(last)) = (entries.first(), entries.last()) else {
        return Value::Undefined;
    };
    if key <= first.0 {
        return Value::Number(first.1);
    }
    if key >= last.0 {
        return Value::Number(last.1);
    }
    entries
        .windows(2)
        .find(|w| key >= w[0].0 && key <= w[1].0)
        .map_or(Value::Undefined, |w| {
            let (k0, v0) = w[0];
            let (k1, v1) = w[1];
            let t = if k1 > k0 { (key - k0) / (k1 - k0) } else { 0.0 };
            Value::Number(v0 + (v1 - v0) * t)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn nums(values: &[f64]) -> Vec<Value<'static>> {
        values.iter().copied().map(Value::Number).collect()
    }

    fn as_f64(value: Value<'_>) -> f64 {
        value.as_number().unwrap_or(f64::NAN)
    }

    #[test]
    fn test_trig_in_degrees() {
        assert_eq!(apply("sin", &nums(&[90.0])), Value::Number(1.0));
        assert_eq!(apply("cos", &nums(&[180.0])), Value::Number(-1.0));
        assert_relative_eq!(as_f64(apply("atan2", &nums(&[1.0, 1.0]))), 45.0, epsilon = 1e-12);
        assert_relative_eq!(as_f64(apply("asin", &nums(&[0.5]))), 30.0, epsilon = 1e-12);
        assert_eq!(apply("sin", &[Value::String("x".into())]), Value::Undefined);
    }

    #[test]
    fn test_min_max_forms() {
        assert_eq!(apply("min", &nums(&[3.0, 1.0, 2.0])), Value::Number(1.0));
        assert_eq!(
            apply("max", &[Value::Vector(nums(&[3.0, 7.0, 2.0]))]),
            Value::Number(7.0)
        );
        assert_eq!(apply("max", &[]), Value::Undefined);
    }

    #[test]
    fn test_list_functions() {
        let v = Value::Vector(nums(&[1.0, 2.0]));
        assert_eq!(apply("len", &[v.clone()]), Value::Number(2.0));
        assert_eq!(apply("len", &[Value::Number(1.0)]), Value::Undefined);
        assert_eq!(
            apply("concat", &[v, Value::Number(3.0)]),
            Value::Vector(nums(&[1.0, 2.0, 3.0]))
        );
        assert_eq!(
            apply("cross", &[Value::Vector(nums(&[1.0, 0.0, 0.0])), Value::Vector(nums(&[0.0, 1.0, 0.0]))]),
            Value::Vector(nums(&[0.0, 0.0, 1.0]))
        );
        assert_eq!(apply("norm", &[Value::Vector(nums(&[3.0, 4.0]))]), Value::Number(5.0));
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(
            apply("str", &[Value::String("w=".into()), Value::Number(2.5)]),
            Value::String("w=2.5".into())
        );
        assert_eq!(apply("chr", &nums(&[72.0, 105.0])), Value::String("Hi".into()));
        assert_eq!(apply("ord", &[Value::String("A".into())]), Value::Number(65.0));
        assert_eq!(apply("ord", &[Value::String("AB".into())]), Value::Undefined);
    }

    #[test]
    fn test_lookup_interpolates_and_clamps() {
        let table = Value::Vector(vec![
            Value::Vector(nums(&[0.0, 0.0])),
            Value::Vector(nums(&[10.0, 100.0])),
        ]);
        assert_eq!(apply("lookup", &[Value::Number(2.5), table.clone()]), Value::Number(25.0));
        assert_eq!(apply("lookup", &[Value::Number(-5.0), table.clone()]), Value::Number(0.0));
        assert_eq!(apply("lookup", &[Value::Number(50.0), table]), Value::Number(100.0));
    }

    #[test]
    fn test_type_predicates() {
        assert_eq!(apply("is_undef", &[Value::Undefined]), Value::Bool(true));
        assert_eq!(apply("is_num", &[Value::Number(f64::NAN)]), Value::Bool(false));
        assert_eq!(apply("is_list", &[Value::Vector(vec![])]), Value::Bool(true));
    }

    #[test]
    fn test_echo_formatting() {
        let args = vec![
            Arg {
                name: None,
                value: Value::String("r".into()),
            },
            Arg {
                name: Some("size"),
                value: Value::Vector(nums(&[1.0, 2.0])),
            },
        ];
        assert_eq!(format_echo(&args), "\"r\", size = [1, 2]");
    }
}
