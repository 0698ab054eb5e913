// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Runtime values and their operators
//!
//! Operators never fail: combinations the language does not define
//! produce `undef`, which then propagates through later arithmetic.

use super::program::Geometry;
use super::scope::ScopeId;
use crate::ast::{quote_string, BinaryOp, Expr, ModuleDecl, Parameter, UnaryOp};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

/// A user function closed over the scope it was declared in
#[derive(Debug)]
pub struct FunctionValue<'a> {
    /// `None` for function literals
    pub name: Option<&'a str>,
    pub params: &'a [Parameter],
    pub body: &'a Expr,
    pub scope: ScopeId,
}

/// A user module closed over the scope it was declared in
#[derive(Debug)]
pub struct ModuleValue<'a> {
    pub decl: &'a ModuleDecl,
    pub scope: ScopeId,
}

/// `[start : step : end]`, iterated lazily
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeValue {
    pub start: f64,
    pub step: f64,
    pub end: f64,
}

impl RangeValue {
    pub fn new(start: f64, step: f64, end: f64) -> Self {
        Self { start, step, end }
    }

    /// Number of values the range yields; zero for empty or malformed ranges.
    /// Saturates at `u64::MAX` for ranges too long to count.
    pub fn len(&self) -> u64 {
        let values = [self.start, self.step, self.end];
        if values.iter().any(|v| !v.is_finite()) || self.step == 0.0 {
            return 0;
        }
        let steps = ((self.end - self.start) / self.step + 1e-9).floor();
        if steps < 0.0 {
            0
        } else {
            // float to int casts saturate
            (steps as u64).saturating_add(1)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> RangeIter {
        RangeIter {
            range: *self,
            index: 0,
            count: self.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RangeIter {
    range: RangeValue,
    index: u64,
    count: u64,
}

impl Iterator for RangeIter {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.index >= self.count {
            return None;
        }
        let value = self.range.start + self.range.step * self.index as f64;
        self.index += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.index;
        match usize::try_from(remaining) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}

/// Runtime value
#[derive(Debug, Clone, Default)]
pub enum Value<'a> {
    #[default]
    Undefined,
    Bool(bool),
    Number(f64),
    String(String),
    Vector(Vec<Value<'a>>),
    Range(RangeValue),
    Function(Rc<FunctionValue<'a>>),
    Module(Rc<ModuleValue<'a>>),
    Geometry(Geometry),
}

impl<'a> Value<'a> {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undef",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Vector(_) => "vector",
            Value::Range(_) => "range",
            Value::Function(_) => "function",
            Value::Module(_) => "module",
            Value::Geometry(_) => "geometry",
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// `false`, `0`, `""`, `[]` and `undef` are false; everything else is true
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Vector(v) => !v.is_empty(),
            Value::Range(r) => !r.is_empty(),
            _ => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[Value<'a>]> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }

    /// Components of a vector whose elements are all numbers
    pub fn as_numbers(&self) -> Option<Vec<f64>> {
        self.as_vector()?.iter().map(Value::as_number).collect()
    }

    /// Text as `str()` renders it: strings unquoted at the top level only
    pub fn to_plain_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Items yielded when iterating in `for`, comprehensions and `each`.
    ///
    /// Vectors yield elements, ranges their values, strings one-character
    /// strings; any other value yields itself once, `undef` nothing.
    pub fn iter(&self) -> ValueIter<'_, 'a> {
        match self {
            Value::Undefined => ValueIter::Empty,
            Value::Vector(items) => ValueIter::Items(items.iter()),
            Value::Range(range) => ValueIter::Range(range.iter()),
            Value::String(s) => ValueIter::Chars(s.chars()),
            other => ValueIter::Once(Some(other.clone())),
        }
    }

    pub fn unary(&self, op: UnaryOp) -> Value<'a> {
        match op {
            UnaryOp::Not => Value::Bool(!self.is_truthy()),
            UnaryOp::Plus => match self {
                Value::Number(_) | Value::Vector(_) => self.clone(),
                _ => Value::Undefined,
            },
            UnaryOp::Negate => self.negate(),
        }
    }

    /// Arithmetic and relational operators; `&&` and `||` short-circuit in
    /// the evaluator and are handled here only for completeness
    pub fn binary(&self, op: BinaryOp, rhs: &Value<'a>) -> Value<'a> {
        match op {
            BinaryOp::Or => Value::Bool(self.is_truthy() || rhs.is_truthy()),
            BinaryOp::And => Value::Bool(self.is_truthy() && rhs.is_truthy()),
            BinaryOp::Equal => Value::Bool(self == rhs),
            BinaryOp::NotEqual => Value::Bool(self != rhs),
            BinaryOp::Less => self.compare(rhs, Ordering::is_lt),
            BinaryOp::LessEqual => self.compare(rhs, Ordering::is_le),
            BinaryOp::Greater => self.compare(rhs, Ordering::is_gt),
            BinaryOp::GreaterEqual => self.compare(rhs, Ordering::is_ge),
            BinaryOp::Add => self.add(rhs),
            BinaryOp::Subtract => self.subtract(rhs),
            BinaryOp::Multiply => self.multiply(rhs),
            BinaryOp::Divide => self.divide(rhs),
            BinaryOp::Modulo => match (self, rhs) {
                (Value::Number(a), Value::Number(b)) => Value::Number(a % b),
                _ => Value::Undefined,
            },
            BinaryOp::Power => match (self, rhs) {
                (Value::Number(a), Value::Number(b)) => Value::Number(a.powf(*b)),
                _ => Value::Undefined,
            },
        }
    }

    /// `v[i]`; out-of-range and non-numeric indices give `undef`
    pub fn index(&self, index: &Value<'a>) -> Value<'a> {
        let Some(i) = index.as_number() else {
            return Value::Undefined;
        };
        if !i.is_finite() || i < 0.0 {
            return Value::Undefined;
        }
        let i = i.floor() as usize;
        match self {
            Value::Vector(items) => items.get(i).cloned().unwrap_or_default(),
            Value::String(s) => s
                .chars()
                .nth(i)
                .map(|c| Value::String(c.to_string()))
                .unwrap_or_default(),
            _ => Value::Undefined,
        }
    }

    /// `.x`, `.y` and `.z` on vectors
    pub fn member(&self, name: &str) -> Value<'a> {
        let index = match name {
            "x" => 0.0,
            "y" => 1.0,
            "z" => 2.0,
            _ => return Value::Undefined,
        };
        match self {
            Value::Vector(_) => self.index(&Value::Number(index)),
            _ => Value::Undefined,
        }
    }

    fn negate(&self) -> Value<'a> {
        match self {
            Value::Number(n) => Value::Number(-n),
            Value::Vector(items) => Value::Vector(items.iter().map(Value::negate).collect()),
            _ => Value::Undefined,
        }
    }

    fn compare(&self, rhs: &Value<'a>, accept: fn(Ordering) -> bool) -> Value<'a> {
        let ordering = match (self, rhs) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        };
        ordering.map_or(Value::Undefined, |o| Value::Bool(accept(o)))
    }

    fn add(&self, rhs: &Value<'a>) -> Value<'a> {
        match (self, rhs) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            (Value::Vector(a), Value::Vector(b)) => elementwise(a, b, Value::add),
            _ => Value::Undefined,
        }
    }

    fn subtract(&self, rhs: &Value<'a>) -> Value<'a> {
        match (self, rhs) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a - b),
            (Value::Vector(a), Value::Vector(b)) => elementwise(a, b, Value::subtract),
            _ => Value::Undefined,
        }
    }

    fn multiply(&self, rhs: &Value<'a>) -> Value<'a> {
        match (self, rhs) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a * b),
            (Value::Number(_), Value::Vector(items)) => {
                Value::Vector(items.iter().map(|v| self.multiply(v)).collect())
            }
            (Value::Vector(items), Value::Number(_)) => {
                Value::Vector(items.iter().map(|v| v.multiply(rhs)).collect())
            }
            (Value::Vector(a), Value::Vector(b)) => vector_product(a, b),
            _ => Value::Undefined,
        }
    }

    fn divide(&self, rhs: &Value<'a>) -> Value<'a> {
        match (self, rhs) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a / b),
            (Value::Vector(items), Value::Number(_)) => {
                Value::Vector(items.iter().map(|v| v.divide(rhs)).collect())
            }
            (Value::Number(_), Value::Vector(items)) => {
                Value::Vector(items.iter().map(|v| self.divide(v)).collect())
            }
            _ => Value::Undefined,
        }
    }
}

fn elementwise<'a>(
    a: &[Value<'a>],
    b: &[Value<'a>],
    op: fn(&Value<'a>, &Value<'a>) -> Value<'a>,
) -> Value<'a> {
    if a.len() != b.len() {
        return Value::Undefined;
    }
    Value::Vector(a.iter().zip(b).map(|(x, y)| op(x, y)).collect())
}

fn numbers(values: &[Value<'_>]) -> Option<Vec<f64>> {
    values.iter().map(Value::as_number).collect()
}

fn matrix(values: &[Value<'_>]) -> Option<Vec<Vec<f64>>> {
    let rows: Vec<Vec<f64>> = values
        .iter()
        .map(|row| row.as_vector().and_then(numbers))
        .collect::<Option<_>>()?;
    let width = rows.first()?.len();
    rows.iter().all(|r| r.len() == width).then_some(rows)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Vector * vector: dot product, matrix-vector, vector-matrix or
/// matrix-matrix depending on the operand shapes
fn vector_product<'a>(a: &[Value<'a>], b: &[Value<'a>]) -> Value<'a> {
    let as_vector = |v: Vec<f64>| Value::Vector(v.into_iter().map(Value::Number).collect());

    if let (Some(x), Some(y)) = (numbers(a), numbers(b)) {
        return if x.len() == y.len() {
            Value::Number(dot(&x, &y))
        } else {
            Value::Undefined
        };
    }

    let vector_times_matrix = |v: &[f64], m: &[Vec<f64>]| -> Option<Vec<f64>> {
        if v.len() != m.len() {
            return None;
        }
        let width = m.first().map_or(0, Vec::len);
        Some(
            (0..width)
                .map(|j| v.iter().zip(m).map(|(x, row)| x * row[j]).sum())
                .collect(),
        )
    };

    match (matrix(a), numbers(b), numbers(a), matrix(b)) {
        (Some(m), Some(v), _, _) => {
            if m[0].len() != v.len() {
                return Value::Undefined;
            }
            as_vector(m.iter().map(|row| dot(row, &v)).collect())
        }
        (_, _, Some(v), Some(m)) => vector_times_matrix(&v, &m).map_or(Value::Undefined, as_vector),
        _ => match (matrix(a), matrix(b)) {
            (Some(left), Some(right)) => left
                .iter()
                .map(|row| vector_times_matrix(row, &right).map(as_vector))
                .collect::<Option<Vec<_>>>()
                .map_or(Value::Undefined, Value::Vector),
            _ => Value::Undefined,
        },
    }
}

impl PartialEq for Value<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => a == b,
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) => Rc::ptr_eq(a, b),
            (Value::Geometry(a), Value::Geometry(b)) => a == b,
            _ => false,
        }
    }
}

/// Iterator returned by [`Value::iter`]
pub enum ValueIter<'v, 'a> {
    Empty,
    Once(Option<Value<'a>>),
    Items(std::slice::Iter<'v, Value<'a>>),
    Range(RangeIter),
    Chars(std::str::Chars<'v>),
}

impl<'a> Iterator for ValueIter<'_, 'a> {
    type Item = Value<'a>;

    fn next(&mut self) -> Option<Value<'a>> {
        match self {
            ValueIter::Empty => None,
            ValueIter::Once(value) => value.take(),
            ValueIter::Items(items) => items.next().cloned(),
            ValueIter::Range(range) => range.next().map(Value::Number),
            ValueIter::Chars(chars) => chars.next().map(|c| Value::String(c.to_string())),
        }
    }
}

/// Number formatting used by `echo` and `str()`: integers without a
/// fraction, everything else with six significant digits
pub fn format_value_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        return format!("{}", n as i64);
    }

    let exponent = n.abs().log10().floor() as i32;
    if !(-5..6).contains(&exponent) {
        let formatted = format!("{:.5e}", n);
        let (mantissa, exp) = formatted.split_once('e').unwrap_or((formatted.as_str(), "0"));
        let exp: i32 = exp.parse().unwrap_or(0);
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs());
    }

    let decimals = (5 - exponent).max(0) as usize;
    trim_fraction(&format!("{:.*}", decimals, n)).to_string()
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undef"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_value_number(*n)),
            Value::String(s) => write!(f, "{}", quote_string(s)),
            Value::Vector(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Range(r) => write!(
                f,
                "[{} : {} : {}]",
                format_value_number(r.start),
                format_value_number(r.step),
                format_value_number(r.end)
            ),
            Value::Function(func) => {
                let params: Vec<&str> = func.params.iter().map(|p| p.name.as_str()).collect();
                write!(f, "function({}) {}", params.join(", "), func.body)
            }
            Value::Module(module) => write!(f, "module {}", module.decl.name),
            Value::Geometry(geometry) => write!(f, "geometry {}", geometry.handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Value<'static> {
        Value::Number(n)
    }

    fn vector(items: &[f64]) -> Value<'static> {
        Value::Vector(items.iter().copied().map(Value::Number).collect())
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!num(0.0).is_truthy());
        assert!(!Value::String(String::new()).is_truthy());
        assert!(!Value::Vector(vec![]).is_truthy());
        assert!(num(-1.0).is_truthy());
        assert!(Value::Vector(vec![Value::Undefined]).is_truthy());
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(num(2.0).binary(BinaryOp::Add, &num(3.0)), num(5.0));
        assert_eq!(
            vector(&[1.0, 2.0]).binary(BinaryOp::Add, &vector(&[3.0, 4.0])),
            vector(&[4.0, 6.0])
        );
        assert_eq!(
            vector(&[1.0, 2.0]).binary(BinaryOp::Add, &vector(&[1.0])),
            Value::Undefined
        );
        assert_eq!(
            num(2.0).binary(BinaryOp::Multiply, &vector(&[1.0, 2.0])),
            vector(&[2.0, 4.0])
        );
        assert_eq!(
            vector(&[2.0, 4.0]).binary(BinaryOp::Divide, &num(2.0)),
            vector(&[1.0, 2.0])
        );
        assert_eq!(
            Value::String("a".into()).binary(BinaryOp::Add, &num(1.0)),
            Value::Undefined
        );
        assert_eq!(num(-7.0).binary(BinaryOp::Modulo, &num(3.0)), num(-1.0));
        assert_eq!(num(2.0).binary(BinaryOp::Power, &num(10.0)), num(1024.0));
    }

    #[test]
    fn test_vector_products() {
        let identity = Value::Vector(vec![vector(&[1.0, 0.0]), vector(&[0.0, 1.0])]);
        let swap = Value::Vector(vec![vector(&[0.0, 1.0]), vector(&[1.0, 0.0])]);

        assert_eq!(
            vector(&[1.0, 2.0, 3.0]).binary(BinaryOp::Multiply, &vector(&[4.0, 5.0, 6.0])),
            num(32.0)
        );
        assert_eq!(
            swap.binary(BinaryOp::Multiply, &vector(&[3.0, 7.0])),
            vector(&[7.0, 3.0])
        );
        assert_eq!(
            vector(&[3.0, 7.0]).binary(BinaryOp::Multiply, &swap),
            vector(&[7.0, 3.0])
        );
        assert_eq!(swap.binary(BinaryOp::Multiply, &identity), swap);
        assert_eq!(
            vector(&[1.0, 2.0]).binary(BinaryOp::Multiply, &vector(&[1.0])),
            Value::Undefined
        );
    }

    #[test]
    fn test_comparison() {
        assert_eq!(num(1.0).binary(BinaryOp::Less, &num(2.0)), Value::Bool(true));
        assert_eq!(
            Value::String("abc".into()).binary(BinaryOp::Greater, &Value::String("abd".into())),
            Value::Bool(false)
        );
        assert_eq!(
            num(1.0).binary(BinaryOp::Less, &Value::String("2".into())),
            Value::Undefined
        );
        assert_eq!(num(1.0).binary(BinaryOp::Equal, &Value::Bool(true)), Value::Bool(false));
        assert_eq!(
            vector(&[1.0, 2.0]).binary(BinaryOp::Equal, &vector(&[1.0, 2.0])),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_index_and_member() {
        let v = vector(&[1.0, 2.0, 3.0]);
        assert_eq!(v.index(&num(1.0)), num(2.0));
        assert_eq!(v.index(&num(5.0)), Value::Undefined);
        assert_eq!(v.index(&num(-1.0)), Value::Undefined);
        assert_eq!(v.member("z"), num(3.0));
        assert_eq!(v.member("w"), Value::Undefined);
        assert_eq!(
            Value::String("hey".into()).index(&num(1.0)),
            Value::String("e".into())
        );
    }

    #[test]
    fn test_range_iteration() {
        let values: Vec<f64> = RangeValue::new(0.0, 0.25, 1.0).iter().collect();
        assert_eq!(values, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert!(RangeValue::new(5.0, 1.0, 0.0).is_empty());
        assert!(RangeValue::new(0.0, 0.0, 1.0).is_empty());
        assert_eq!(RangeValue::new(10.0, -5.0, 0.0).len(), 3);
    }

    #[test]
    fn test_huge_range_saturates() {
        let range = RangeValue::new(0.0, 1.0, 1e20);
        assert_eq!(range.len(), u64::MAX);
        assert!(!range.is_empty());
        assert!(Value::Range(range).is_truthy());

        let first: Vec<f64> = range.iter().take(3).collect();
        assert_eq!(first, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_display() {
        let value = Value::Vector(vec![
            num(1.0),
            num(2.5),
            Value::String("a".into()),
            Value::Undefined,
            Value::Range(RangeValue::new(0.0, 1.0, 5.0)),
        ]);
        assert_eq!(value.to_string(), "[1, 2.5, \"a\", undef, [0 : 1 : 5]]");
        assert_eq!(Value::String("a".into()).to_plain_string(), "a");
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_value_number(3.0), "3");
        assert_eq!(format_value_number(-0.5), "-0.5");
        assert_eq!(format_value_number(1.0 / 3.0), "0.333333");
        assert_eq!(format_value_number(1e-7), "1e-07");
        assert_eq!(format_value_number(1e20), "1e+20");
        assert_eq!(format_value_number(123456.7), "123457");
    }
}
