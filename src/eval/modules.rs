// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Built-in modules: primitives, transforms, booleans and extrusions

use super::args::{Arg, BuiltinArgs};
use super::builtins::{check_assertion, format_echo};
use super::error::{EvalError, EvalErrorKind, EvalResult};
use super::evaluator::{flatten, Ctx, Evaluator};
use super::program::{Annotation, Geometry};
use super::value::Value;
use crate::ast::ModuleCall;
use crate::geometry::{BooleanOp, GeometryBackend, Primitive, TransformOp};
use nalgebra::{Matrix4, Point2, Point3, Vector2, Vector3};
use std::f64::consts::PI;
use tracing::warn;

const BUILTIN_MODULES: &[&str] = &[
    "cube",
    "sphere",
    "cylinder",
    "polyhedron",
    "square",
    "circle",
    "polygon",
    "translate",
    "rotate",
    "scale",
    "mirror",
    "multmatrix",
    "color",
    "union",
    "difference",
    "intersection",
    "hull",
    "minkowski",
    "linear_extrude",
    "rotate_extrude",
    "render",
    "group",
    "echo",
    "assert",
];

/// Built-in modules dispatched through [`Evaluator::call_builtin_module`];
/// `children` is handled by the evaluator itself
pub(crate) fn is_builtin_module(name: &str) -> bool {
    BUILTIN_MODULES.contains(&name)
}

/// Radii below this always get the minimum fragment count
const GRID_FINE: f64 = 0.000_000_953_674_316_406_25;

/// Upper bound on fragments per circle handed to the backend
pub const MAX_FRAGMENTS: u32 = 1000;

/// Number of fragments used to approximate a circle of radius `r`
pub fn fragment_count(r: f64, fn_: f64, fa: f64, fs: f64) -> u32 {
    if !(r >= GRID_FINE) {
        return 3;
    }
    if fn_ > 0.0 {
        return (fn_.floor() as u32).clamp(3, MAX_FRAGMENTS);
    }
    let fa = if fa > 0.0 { fa } else { 12.0 };
    let fs = if fs > 0.0 { fs } else { 2.0 };
    let count = (360.0 / fa).min(r * 2.0 * PI / fs).max(5.0).ceil() as u32;
    count.min(MAX_FRAGMENTS)
}

impl<'a, B: GeometryBackend> Evaluator<'a, B> {
    /// Run a built-in module. `$` arguments have already been moved into
    /// the special frame.
    pub(crate) fn call_builtin_module(
        &mut self,
        call: &'a ModuleCall,
        args: Vec<Arg<'a>>,
        ctx: Ctx<'a, '_>,
        line: usize,
    ) -> EvalResult<Vec<Geometry>> {
        match call.name.as_str() {
            "cube" => {
                let a = BuiltinArgs::bind("cube", &["size", "center"], args, line);
                let size = a.vec3("size", 1.0)?.unwrap_or_else(|| Vector3::repeat(1.0));
                let center = a.flag("center")?;
                self.primitive(Primitive::Cube { size, center }, line)
            }
            "sphere" => {
                let a = BuiltinArgs::bind("sphere", &["r", "d"], args, line);
                let r = radius(&a, "r", "d")?.unwrap_or(1.0);
                let segments = self.fragments(r);
                self.primitive(Primitive::Sphere { r, segments }, line)
            }
            "cylinder" => self.cylinder(args, line),
            "polyhedron" => self.polyhedron(args, line),
            "square" => {
                let a = BuiltinArgs::bind("square", &["size", "center"], args, line);
                let size = a.vec2("size")?.unwrap_or_else(|| Vector2::repeat(1.0));
                let center = a.flag("center")?;
                self.primitive(Primitive::Square { size, center }, line)
            }
            "circle" => {
                let a = BuiltinArgs::bind("circle", &["r", "d"], args, line);
                let r = radius(&a, "r", "d")?.unwrap_or(1.0);
                let segments = self.fragments(r);
                self.primitive(Primitive::Circle { r, segments }, line)
            }
            "polygon" => self.polygon(args, line),
            "translate" | "rotate" | "scale" | "mirror" | "multmatrix" => {
                let op = transform_op(&call.name, args, line)?;
                let matrix = op.to_matrix();
                let children = flatten(self.exec_scoped(&call.children, ctx)?);
                children
                    .into_iter()
                    .map(|child| self.transform(child, &matrix, line))
                    .collect()
            }
            "color" => {
                let a = BuiltinArgs::bind("color", &["c", "alpha"], args, line);
                let rgba = color(&a)?;
                let mut children = flatten(self.exec_scoped(&call.children, ctx)?);
                if let Some(rgba) = rgba {
                    for child in &mut children {
                        child.annotate(Annotation::Color(rgba));
                    }
                }
                Ok(children)
            }
            "union" | "difference" | "intersection" => {
                let op = match call.name.as_str() {
                    "union" => BooleanOp::Union,
                    "difference" => BooleanOp::Difference,
                    _ => BooleanOp::Intersection,
                };
                let operands = self.operands(call, ctx, line)?;
                if operands.len() <= 1 {
                    return Ok(operands);
                }
                let handles: Vec<_> = operands.iter().map(|g| g.handle).collect();
                let handle = self.boolean(op, &handles, line)?;
                Ok(vec![Geometry::new(handle)])
            }
            "hull" => {
                let children = flatten(self.exec_scoped(&call.children, ctx)?);
                if children.is_empty() {
                    return Ok(children);
                }
                let handles: Vec<_> = children.iter().map(|g| g.handle).collect();
                let handle = self.hull(&handles, line)?;
                Ok(vec![Geometry::new(handle)])
            }
            "minkowski" => {
                let mut operands = self.operands(call, ctx, line)?.into_iter();
                let Some(first) = operands.next() else {
                    return Ok(Vec::new());
                };
                let mut result = first;
                for operand in operands {
                    let handle = self.minkowski(result.handle, operand.handle, line)?;
                    result = Geometry::new(handle);
                }
                Ok(vec![result])
            }
            "linear_extrude" => self.linear_extrude(call, args, ctx, line),
            "rotate_extrude" => self.rotate_extrude(call, args, ctx, line),
            "render" | "group" => Ok(flatten(self.exec_scoped(&call.children, ctx)?)),
            "echo" => {
                let message = format_echo(&args);
                self.echo(message);
                Ok(flatten(self.exec_scoped(&call.children, ctx)?))
            }
            "assert" => {
                check_assertion(&call.args, &args, line)?;
                Ok(flatten(self.exec_scoped(&call.children, ctx)?))
            }
            other => Err(EvalError::new(
                EvalErrorKind::UndefinedModule(other.to_string()),
                line,
            )),
        }
    }

    /// Fragment count for radius `r` under the current `$fn`, `$fa`, `$fs`
    pub(crate) fn fragments(&self, r: f64) -> u32 {
        fragment_count(
            r,
            self.specials.number("$fn").unwrap_or(0.0),
            self.specials.number("$fa").unwrap_or(12.0),
            self.specials.number("$fs").unwrap_or(2.0),
        )
    }

    fn primitive(&mut self, primitive: Primitive, line: usize) -> EvalResult<Vec<Geometry>> {
        let handle = self.create_primitive(&primitive, line)?;
        Ok(vec![Geometry::new(handle)])
    }

    /// Children of a boolean-like module, one operand per child statement.
    /// A statement that produced several geometries is unioned first.
    fn operands(
        &mut self,
        call: &'a ModuleCall,
        ctx: Ctx<'a, '_>,
        line: usize,
    ) -> EvalResult<Vec<Geometry>> {
        let groups = self.exec_scoped(&call.children, ctx)?;
        let mut operands = Vec::with_capacity(groups.len());
        for mut group in groups {
            if group.len() == 1 {
                operands.extend(group.pop());
            } else {
                let handles: Vec<_> = group.iter().map(|g| g.handle).collect();
                let handle = self.boolean(BooleanOp::Union, &handles, line)?;
                operands.push(Geometry::new(handle));
            }
        }
        Ok(operands)
    }

    fn cylinder(&mut self, args: Vec<Arg<'a>>, line: usize) -> EvalResult<Vec<Geometry>> {
        let a = BuiltinArgs::bind(
            "cylinder",
            &["h", "r1", "r2", "center", "r", "d", "d1", "d2"],
            args,
            line,
        );
        let h = a.number("h")?.unwrap_or(1.0);
        let r = radius(&a, "r", "d")?;
        let r1 = radius(&a, "r1", "d1")?.or(r).unwrap_or(1.0);
        let r2 = radius(&a, "r2", "d2")?.or(r).unwrap_or(1.0);
        let center = a.flag("center")?;
        let segments = self.fragments(r1.max(r2));
        self.primitive(
            Primitive::Cylinder {
                h,
                r1,
                r2,
                center,
                segments,
            },
            line,
        )
    }

    fn polyhedron(&mut self, args: Vec<Arg<'a>>, line: usize) -> EvalResult<Vec<Geometry>> {
        let a = BuiltinArgs::bind("polyhedron", &["points", "faces", "convexity"], args, line);
        let missing = |name: &str| {
            EvalError::type_mismatch(format!("polyhedron() requires '{}'", name), line)
        };
        let points: Vec<Point3<f64>> = a
            .points("points", 3)?
            .ok_or_else(|| missing("points"))?
            .into_iter()
            .map(|p| Point3::new(p[0], p[1], p[2]))
            .collect();
        let faces = a.indices("faces")?.ok_or_else(|| missing("faces"))?;
        check_indices("polyhedron", &faces, points.len(), line)?;
        self.primitive(Primitive::Polyhedron { points, faces }, line)
    }

    fn polygon(&mut self, args: Vec<Arg<'a>>, line: usize) -> EvalResult<Vec<Geometry>> {
        let a = BuiltinArgs::bind("polygon", &["points", "paths", "convexity"], args, line);
        let points: Vec<Point2<f64>> = a
            .points("points", 2)?
            .ok_or_else(|| EvalError::type_mismatch("polygon() requires 'points'", line))?
            .into_iter()
            .map(|p| Point2::new(p[0], p[1]))
            .collect();
        let paths = a.indices("paths")?;
        if let Some(paths) = &paths {
            check_indices("polygon", paths, points.len(), line)?;
        }
        self.primitive(Primitive::Polygon { points, paths }, line)
    }

    /// Children of an extrusion as a single 2D operand
    fn extrusion_source(
        &mut self,
        call: &'a ModuleCall,
        ctx: Ctx<'a, '_>,
        line: usize,
    ) -> EvalResult<Option<Geometry>> {
        let mut children = flatten(self.exec_scoped(&call.children, ctx)?);
        match children.len() {
            0 => Ok(None),
            1 => Ok(children.pop()),
            _ => {
                let handles: Vec<_> = children.iter().map(|g| g.handle).collect();
                let handle = self.boolean(BooleanOp::Union, &handles, line)?;
                Ok(Some(Geometry::new(handle)))
            }
        }
    }

    fn linear_extrude(
        &mut self,
        call: &'a ModuleCall,
        args: Vec<Arg<'a>>,
        ctx: Ctx<'a, '_>,
        line: usize,
    ) -> EvalResult<Vec<Geometry>> {
        let a = BuiltinArgs::bind(
            "linear_extrude",
            &["height", "center", "convexity", "twist", "slices", "scale"],
            args,
            line,
        );
        let height = a.number("height")?.unwrap_or(100.0);
        let center = a.flag("center")?;
        let twist = a.number("twist")?.unwrap_or(0.0);
        let scale = a.vec2("scale")?.unwrap_or_else(|| Vector2::repeat(1.0));
        let slices = match a.number("slices")? {
            Some(n) => (n.round().max(1.0) as u32).min(MAX_FRAGMENTS),
            None if twist == 0.0 => 1,
            None => {
                let fn_ = self.specials.number("$fn").filter(|n| *n > 0.0).unwrap_or(16.0);
                ((fn_ * twist.abs() / 360.0).ceil().max(1.0) as u32).min(MAX_FRAGMENTS)
            }
        };

        let Some(source) = self.extrusion_source(call, ctx, line)? else {
            return Ok(Vec::new());
        };
        let handle = self.extrude_linear(source.handle, height, twist, scale, slices, line)?;
        let mut result = Geometry::new(handle);
        if center {
            let offset = Matrix4::new_translation(&Vector3::new(0.0, 0.0, -height / 2.0));
            result = self.transform(result, &offset, line)?;
        }
        Ok(vec![result])
    }

    fn rotate_extrude(
        &mut self,
        call: &'a ModuleCall,
        args: Vec<Arg<'a>>,
        ctx: Ctx<'a, '_>,
        line: usize,
    ) -> EvalResult<Vec<Geometry>> {
        let a = BuiltinArgs::bind("rotate_extrude", &["angle", "convexity"], args, line);
        let angle = a.number("angle")?.unwrap_or(360.0).clamp(-360.0, 360.0);

        // The profile radius is unknown here, so only $fn and $fa apply
        let full_turn = match self.specials.number("$fn") {
            Some(fn_) if fn_ > 0.0 => fn_.floor().max(3.0),
            _ => {
                let fa = self.specials.number("$fa").filter(|fa| *fa > 0.0).unwrap_or(12.0);
                (360.0 / fa).max(5.0).ceil()
            }
        };
        let segments = ((full_turn * angle.abs() / 360.0).ceil().max(1.0) as u32).min(MAX_FRAGMENTS);

        let Some(source) = self.extrusion_source(call, ctx, line)? else {
            return Ok(Vec::new());
        };
        let handle = self.extrude_rotate(source.handle, angle, segments, line)?;
        Ok(vec![Geometry::new(handle)])
    }
}

/// A radius given directly or as a diameter; the diameter wins when both
/// are present
fn radius(a: &BuiltinArgs<'_>, r: &str, d: &str) -> EvalResult<Option<f64>> {
    Ok(match (a.number(r)?, a.number(d)?) {
        (_, Some(d)) => Some(d / 2.0),
        (r, None) => r,
    })
}

fn check_indices(module: &str, lists: &[Vec<usize>], count: usize, line: usize) -> EvalResult<()> {
    match lists.iter().flatten().find(|&&i| i >= count) {
        Some(i) => Err(EvalError::type_mismatch(
            format!("{}() index {} out of range for {} points", module, i, count),
            line,
        )),
        None => Ok(()),
    }
}

fn transform_op(name: &str, args: Vec<Arg<'_>>, line: usize) -> EvalResult<TransformOp> {
    Ok(match name {
        "translate" => {
            let a = BuiltinArgs::bind("translate", &["v"], args, line);
            TransformOp::Translate(a.vec3("v", 0.0)?.unwrap_or_else(Vector3::zeros))
        }
        "rotate" => {
            let a = BuiltinArgs::bind("rotate", &["a", "v"], args, line);
            match a.get("a") {
                None => TransformOp::Rotate(Vector3::zeros()),
                Some(Value::Number(angle)) => match a.vec3("v", 0.0)? {
                    Some(axis) => TransformOp::RotateAxis {
                        angle: *angle,
                        axis,
                    },
                    None => TransformOp::Rotate(Vector3::new(0.0, 0.0, *angle)),
                },
                Some(_) => TransformOp::Rotate(a.vec3("a", 0.0)?.unwrap_or_else(Vector3::zeros)),
            }
        }
        "scale" => {
            let a = BuiltinArgs::bind("scale", &["v"], args, line);
            TransformOp::Scale(a.vec3("v", 1.0)?.unwrap_or_else(|| Vector3::repeat(1.0)))
        }
        "mirror" => {
            let a = BuiltinArgs::bind("mirror", &["v"], args, line);
            TransformOp::Mirror(a.vec3("v", 0.0)?.unwrap_or_else(Vector3::x))
        }
        _ => {
            let a = BuiltinArgs::bind("multmatrix", &["m"], args, line);
            TransformOp::Multmatrix(match a.get("m") {
                None => Matrix4::identity(),
                Some(m) => matrix(m).ok_or_else(|| a.mismatch("m", "a matrix of up to 4x4 numbers", m))?,
            })
        }
    })
}

/// Rows of numbers filling the top-left of an identity matrix
fn matrix(value: &Value<'_>) -> Option<Matrix4<f64>> {
    let rows = value.as_vector()?;
    if rows.len() > 4 {
        return None;
    }
    let mut m = Matrix4::identity();
    for (i, row) in rows.iter().enumerate() {
        let row = row.as_numbers()?;
        if row.len() > 4 {
            return None;
        }
        for (j, x) in row.into_iter().enumerate() {
            m[(i, j)] = x;
        }
    }
    Some(m)
}

fn color(a: &BuiltinArgs<'_>) -> EvalResult<Option<[f64; 4]>> {
    let alpha = a.number("alpha")?;
    let Some(value) = a.get("c") else {
        return Ok(None);
    };
    let rgba = match value {
        Value::String(name) => match parse_color_name(name) {
            Some(rgba) => rgba,
            None => {
                warn!(line = a.line(), color = %name, "unknown color name, ignoring");
                return Ok(None);
            }
        },
        other => match other.as_numbers().as_deref() {
            Some([r, g, b]) => [*r, *g, *b, 1.0],
            Some([r, g, b, alpha]) => [*r, *g, *b, *alpha],
            _ => return Err(a.mismatch("c", "a color name or an RGB(A) vector", other)),
        },
    };
    Ok(Some(match alpha {
        Some(alpha) => [rgba[0], rgba[1], rgba[2], alpha],
        None => rgba,
    }))
}

fn parse_color_name(name: &str) -> Option<[f64; 4]> {
    if let Some(hex) = name.strip_prefix('#') {
        return parse_hex_color(hex);
    }
    let rgb: [u8; 3] = match name.to_ascii_lowercase().as_str() {
        "black" => [0, 0, 0],
        "white" => [255, 255, 255],
        "red" => [255, 0, 0],
        "green" => [0, 128, 0],
        "lime" => [0, 255, 0],
        "blue" => [0, 0, 255],
        "yellow" => [255, 255, 0],
        "cyan" | "aqua" => [0, 255, 255],
        "magenta" | "fuchsia" => [255, 0, 255],
        "gray" | "grey" => [128, 128, 128],
        "silver" => [192, 192, 192],
        "orange" => [255, 165, 0],
        "purple" => [128, 0, 128],
        "brown" => [165, 42, 42],
        "pink" => [255, 192, 203],
        "gold" => [255, 215, 0],
        "navy" => [0, 0, 128],
        "teal" => [0, 128, 128],
        "maroon" => [128, 0, 0],
        "olive" => [128, 128, 0],
        _ => return None,
    };
    Some([
        rgb[0] as f64 / 255.0,
        rgb[1] as f64 / 255.0,
        rgb[2] as f64 / 255.0,
        1.0,
    ])
}

/// `rgb`, `rgba`, `rrggbb` or `rrggbbaa`
fn parse_hex_color(hex: &str) -> Option<[f64; 4]> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let digits: Vec<u8> = match hex.len() {
        3 | 4 => hex
            .chars()
            .map(|c| u8::from_str_radix(&format!("{c}{c}"), 16).ok())
            .collect::<Option<_>>()?,
        6 | 8 => (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
            .collect::<Option<_>>()?,
        _ => return None,
    };
    let channel = |i: usize| digits.get(i).map_or(1.0, |d| *d as f64 / 255.0);
    Some([channel(0), channel(1), channel(2), channel(3)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_count() {
        assert_eq!(fragment_count(10.0, 0.0, 12.0, 2.0), 30);
        assert_eq!(fragment_count(1.0, 0.0, 12.0, 2.0), 5);
        assert_eq!(fragment_count(10.0, 7.0, 12.0, 2.0), 7);
        assert_eq!(fragment_count(10.0, 2.0, 12.0, 2.0), 3);
        assert_eq!(fragment_count(1e-9, 64.0, 12.0, 2.0), 3);
    }

    #[test]
    fn test_fragment_count_is_clamped() {
        assert_eq!(fragment_count(10.0, 1e12, 12.0, 2.0), MAX_FRAGMENTS);
        assert_eq!(fragment_count(1e9, 0.0, 0.001, 0.001), MAX_FRAGMENTS);
        assert_eq!(fragment_count(10.0, MAX_FRAGMENTS as f64, 12.0, 2.0), MAX_FRAGMENTS);
    }

    #[test]
    fn test_color_parsing() {
        assert_eq!(parse_color_name("Red"), Some([1.0, 0.0, 0.0, 1.0]));
        assert_eq!(parse_color_name("#00ff00"), Some([0.0, 1.0, 0.0, 1.0]));
        assert_eq!(parse_color_name("#f00"), Some([1.0, 0.0, 0.0, 1.0]));
        assert_eq!(parse_color_name("#0000ff00"), Some([0.0, 0.0, 1.0, 0.0]));
        assert_eq!(parse_color_name("chartreuse-ish"), None);
    }

    #[test]
    fn test_matrix_fills_identity() {
        let rows = Value::Vector(vec![
            Value::Vector(vec![Value::Number(1.0), Value::Number(0.0), Value::Number(0.0), Value::Number(5.0)]),
        ]);
        let m = matrix(&rows).unwrap();
        assert_eq!(m[(0, 3)], 5.0);
        assert_eq!(m[(1, 1)], 1.0);
        assert!(matrix(&Value::Number(1.0)).is_none());
    }
}
