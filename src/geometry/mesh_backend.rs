// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Preview mesh backend
//!
//! Builds triangle meshes for 3D shapes and polygon outlines for 2D shapes.
//! Union concatenates meshes. Difference and intersection keep the first
//! operand unchanged, which is enough for previews but is not real CSG. Hull
//! and minkowski go through parry3d's convex hull and are exact for convex
//! inputs.

use super::backend::{BackendError, BackendResult, BooleanOp, GeometryBackend, Handle};
use super::{Mesh, Primitive};
use crate::io::read_stl;
use crate::utils::math::{cos_deg, lerp, sin_deg};
use nalgebra::{Matrix4, Point2, Point3, Vector2};
use parry3d::na;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A shape owned by the backend
#[derive(Debug, Clone)]
pub enum Shape {
    Solid(Mesh),
    /// Closed 2D polygons, counter-clockwise
    Outline(Vec<Vec<Point2<f64>>>),
}

#[derive(Debug, Default)]
pub struct MeshBackend {
    shapes: Vec<Shape>,
    base_dir: Option<PathBuf>,
}

impl MeshBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `import()` paths against `dir`
    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            shapes: Vec::new(),
            base_dir: Some(dir.into()),
        }
    }

    pub fn shape(&self, handle: Handle) -> Option<&Shape> {
        let index = usize::try_from(handle.0).ok()?.checked_sub(1)?;
        self.shapes.get(index)
    }

    pub fn mesh(&self, handle: Handle) -> Option<&Mesh> {
        match self.shape(handle)? {
            Shape::Solid(mesh) => Some(mesh),
            Shape::Outline(_) => None,
        }
    }

    /// Concatenate the meshes of all solid handles. Outlines are skipped.
    pub fn combined_mesh(&self, handles: &[Handle]) -> Mesh {
        let mut combined = Mesh::new();
        for handle in handles {
            if let Some(mesh) = self.mesh(*handle) {
                combined.merge(mesh);
            }
        }
        combined
    }

    fn get(&self, handle: Handle) -> BackendResult<&Shape> {
        self.shape(handle)
            .ok_or(BackendError::UnknownHandle(handle))
    }

    fn outline(&self, handle: Handle, operation: &'static str) -> BackendResult<&[Vec<Point2<f64>>]> {
        match self.get(handle)? {
            Shape::Outline(polygons) => Ok(polygons),
            Shape::Solid(_) => Err(BackendError::InvalidInput {
                operation,
                expected: "a 2D shape".to_string(),
            }),
        }
    }

    fn insert(&mut self, shape: Shape) -> Handle {
        self.shapes.push(shape);
        Handle(self.shapes.len() as u64)
    }

    fn import(&self, path: &str) -> BackendResult<Shape> {
        let full: PathBuf = match &self.base_dir {
            Some(dir) => dir.join(path),
            None => PathBuf::from(path),
        };
        let extension = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("stl") => read_stl(&full)
                .map(Shape::Solid)
                .map_err(|e| BackendError::Failed(format!("{:#}", e))),
            _ => Err(BackendError::Unsupported(format!(
                "import of '{}': only STL files are supported",
                path
            ))),
        }
    }
}

impl GeometryBackend for MeshBackend {
    fn create_primitive(&mut self, primitive: &Primitive) -> BackendResult<Handle> {
        let shape = match primitive {
            Primitive::Import { path } => self.import(path)?,
            other => match (other.to_mesh(), other.outline()) {
                (Some(mesh), _) => Shape::Solid(mesh),
                (None, Some(polygons)) => Shape::Outline(polygons),
                (None, None) => {
                    return Err(BackendError::Unsupported(other.kind().to_string()));
                }
            },
        };
        Ok(self.insert(shape))
    }

    fn transform(&mut self, handle: Handle, matrix: &Matrix4<f64>) -> BackendResult<Handle> {
        let shape = match self.get(handle)? {
            Shape::Solid(mesh) => {
                let mut mesh = mesh.clone();
                mesh.transform(matrix);
                Shape::Solid(mesh)
            }
            Shape::Outline(polygons) => {
                let flips = matrix[(0, 0)] * matrix[(1, 1)] - matrix[(0, 1)] * matrix[(1, 0)] < 0.0;
                let polygons = polygons
                    .iter()
                    .map(|polygon| {
                        let mut moved: Vec<_> = polygon
                            .iter()
                            .map(|p| {
                                let q = matrix.transform_point(&Point3::new(p.x, p.y, 0.0));
                                Point2::new(q.x, q.y)
                            })
                            .collect();
                        if flips {
                            moved.reverse();
                        }
                        moved
                    })
                    .collect();
                Shape::Outline(polygons)
            }
        };
        Ok(self.insert(shape))
    }

    fn boolean(&mut self, op: BooleanOp, handles: &[Handle]) -> BackendResult<Handle> {
        let shapes = handles
            .iter()
            .map(|h| self.get(*h))
            .collect::<BackendResult<Vec<_>>>()?;
        let Some(first) = shapes.first() else {
            return Err(BackendError::InvalidInput {
                operation: op.name(),
                expected: "at least one operand".to_string(),
            });
        };

        let result = match (op, *first) {
            (BooleanOp::Union, Shape::Solid(_)) => {
                let mut merged = Mesh::new();
                for shape in &shapes {
                    match shape {
                        Shape::Solid(mesh) => merged.merge(mesh),
                        Shape::Outline(_) => return Err(mixed_dimensions(op)),
                    }
                }
                Shape::Solid(merged)
            }
            (BooleanOp::Union, Shape::Outline(_)) => {
                let mut polygons = Vec::new();
                for shape in &shapes {
                    match shape {
                        Shape::Outline(more) => polygons.extend(more.iter().cloned()),
                        Shape::Solid(_) => return Err(mixed_dimensions(op)),
                    }
                }
                Shape::Outline(polygons)
            }
            (_, first) => {
                debug!(
                    operation = op.name(),
                    operands = handles.len(),
                    "preview keeps the first operand"
                );
                first.clone()
            }
        };
        Ok(self.insert(result))
    }

    fn hull(&mut self, handles: &[Handle]) -> BackendResult<Handle> {
        let mut solid_points = Vec::new();
        let mut flat_points = Vec::new();
        for handle in handles {
            match self.get(*handle)? {
                Shape::Solid(mesh) => solid_points.extend(mesh.vertices.iter().map(|v| v.position)),
                Shape::Outline(polygons) => flat_points.extend(polygons.iter().flatten().copied()),
            }
        }

        let shape = match (solid_points.is_empty(), flat_points.is_empty()) {
            (false, true) => Shape::Solid(hull_3d(&solid_points)?),
            (true, _) => Shape::Outline(vec![hull_2d(flat_points)]),
            (false, false) => return Err(mixed_dimensions_named("hull")),
        };
        Ok(self.insert(shape))
    }

    fn minkowski(&mut self, a: Handle, b: Handle) -> BackendResult<Handle> {
        let shape = match (self.get(a)?, self.get(b)?) {
            (Shape::Solid(ma), Shape::Solid(mb)) => {
                let sums: Vec<_> = ma
                    .vertices
                    .iter()
                    .flat_map(|va| mb.vertices.iter().map(move |vb| va.position + vb.position.coords))
                    .collect();
                Shape::Solid(hull_3d(&sums)?)
            }
            (Shape::Outline(pa), Shape::Outline(pb)) => {
                let sums: Vec<_> = pa
                    .iter()
                    .flatten()
                    .flat_map(|p| pb.iter().flatten().map(move |q| p + q.coords))
                    .collect();
                Shape::Outline(vec![hull_2d(sums)])
            }
            _ => return Err(mixed_dimensions_named("minkowski")),
        };
        Ok(self.insert(shape))
    }

    fn extrude_linear(
        &mut self,
        handle: Handle,
        height: f64,
        twist: f64,
        scale: Vector2<f64>,
        slices: u32,
    ) -> BackendResult<Handle> {
        let slices = slices.max(1) as usize;
        let mut mesh = Mesh::new();
        for polygon in self.outline(handle, "linear_extrude")? {
            let layers: Vec<Vec<Point3<f64>>> = (0..=slices)
                .map(|k| {
                    let t = k as f64 / slices as f64;
                    let angle = -twist * t;
                    let (s, c) = (sin_deg(angle), cos_deg(angle));
                    let (sx, sy) = (lerp(1.0, scale.x, t), lerp(1.0, scale.y, t));
                    polygon
                        .iter()
                        .map(|p| {
                            let (x, y) = (p.x * sx, p.y * sy);
                            Point3::new(x * c - y * s, x * s + y * c, height * t)
                        })
                        .collect()
                })
                .collect();
            mesh.merge(&loft(&layers, false, true));
        }
        Ok(self.insert(Shape::Solid(mesh)))
    }

    fn extrude_rotate(
        &mut self,
        handle: Handle,
        angle: f64,
        segments: u32,
    ) -> BackendResult<Handle> {
        let closed = angle.abs() >= 360.0;
        let segments = segments.max(if closed { 3 } else { 1 }) as usize;
        let steps = if closed { segments } else { segments + 1 };
        let mut mesh = Mesh::new();
        for polygon in self.outline(handle, "rotate_extrude")? {
            let rings: Vec<Vec<Point3<f64>>> = (0..steps)
                .map(|j| {
                    let theta = angle * j as f64 / segments as f64;
                    let (s, c) = (sin_deg(theta), cos_deg(theta));
                    polygon
                        .iter()
                        .map(|p| Point3::new(p.x * c, p.x * s, p.y))
                        .collect()
                })
                .collect();
            mesh.merge(&loft(&rings, closed, !closed));
        }
        Ok(self.insert(Shape::Solid(mesh)))
    }
}

fn mixed_dimensions(op: BooleanOp) -> BackendError {
    mixed_dimensions_named(op.name())
}

fn mixed_dimensions_named(operation: &'static str) -> BackendError {
    BackendError::InvalidInput {
        operation,
        expected: "operands of the same dimension".to_string(),
    }
}

/// Stitch a sequence of equally sized point rings into a surface, optionally
/// joining the last ring to the first and fan-capping both ends
fn loft(rings: &[Vec<Point3<f64>>], wrap: bool, caps: bool) -> Mesh {
    let n = rings.first().map_or(0, Vec::len);
    let points: Vec<Point3<f64>> = rings.iter().flatten().copied().collect();
    let mut triangles = Vec::new();
    if n < 3 {
        return Mesh::new();
    }

    let ring_pairs = if wrap { rings.len() } else { rings.len() - 1 };
    for k in 0..ring_pairs {
        let (lower, upper) = (k * n, ((k + 1) % rings.len()) * n);
        for i in 0..n {
            let next = (i + 1) % n;
            triangles.push([lower + i, lower + next, upper + next]);
            triangles.push([lower + i, upper + next, upper + i]);
        }
    }

    if caps {
        let last = (rings.len() - 1) * n;
        for i in 1..n - 1 {
            triangles.push([0, i + 1, i]);
            triangles.push([last, last + i, last + i + 1]);
        }
    }

    Mesh::from_indexed(&points, &triangles)
}

fn hull_3d(points: &[Point3<f64>]) -> BackendResult<Mesh> {
    if points.len() < 4 {
        return Err(BackendError::InvalidInput {
            operation: "hull",
            expected: "at least four points".to_string(),
        });
    }
    let mut input: Vec<na::Point3<f32>> = points
        .iter()
        .map(|p| na::Point3::new(p.x as f32, p.y as f32, p.z as f32))
        .collect();
    input.sort_by(|a, b| {
        a.x.total_cmp(&b.x)
            .then(a.y.total_cmp(&b.y))
            .then(a.z.total_cmp(&b.z))
    });
    input.dedup();
    let (vertices, indices) = parry3d::transformation::try_convex_hull(&input)
        .map_err(|e| BackendError::Failed(format!("convex hull failed: {:?}", e)))?;

    let vertices: Vec<Point3<f64>> = vertices
        .iter()
        .map(|p| Point3::new(p.x as f64, p.y as f64, p.z as f64))
        .collect();
    let triangles: Vec<[usize; 3]> = indices
        .iter()
        .map(|t| [t[0] as usize, t[1] as usize, t[2] as usize])
        .collect();
    Ok(Mesh::from_indexed(&vertices, &triangles))
}

/// Andrew's monotone chain, counter-clockwise
fn hull_2d(mut points: Vec<Point2<f64>>) -> Vec<Point2<f64>> {
    points.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    points.dedup();
    if points.len() < 3 {
        return points;
    }

    let mut lower = half_hull(points.iter());
    let upper = half_hull(points.iter().rev());
    lower.extend(upper);
    lower
}

fn half_hull<'p>(points: impl Iterator<Item = &'p Point2<f64>>) -> Vec<Point2<f64>> {
    let cross = |o: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>| {
        (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
    };
    let mut half: Vec<Point2<f64>> = Vec::new();
    for p in points {
        while half.len() >= 2 && cross(&half[half.len() - 2], &half[half.len() - 1], p) <= 0.0 {
            half.pop();
        }
        half.push(*p);
    }
    half.pop();
    half
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn cube(backend: &mut MeshBackend, size: f64) -> Handle {
        backend
            .create_primitive(&Primitive::Cube {
                size: Vector3::new(size, size, size),
                center: false,
            })
            .unwrap()
    }

    fn square(backend: &mut MeshBackend) -> Handle {
        backend
            .create_primitive(&Primitive::Square {
                size: Vector2::new(1.0, 1.0),
                center: false,
            })
            .unwrap()
    }

    #[test]
    fn test_transform_copies() {
        let mut backend = MeshBackend::new();
        let a = cube(&mut backend, 1.0);
        let b = backend
            .transform(a, &Matrix4::new_translation(&Vector3::new(5.0, 0.0, 0.0)))
            .unwrap();
        assert_relative_eq!(backend.mesh(a).unwrap().bounding_box().min.x, 0.0);
        assert_relative_eq!(backend.mesh(b).unwrap().bounding_box().min.x, 5.0);
    }

    #[test]
    fn test_union_concatenates() {
        let mut backend = MeshBackend::new();
        let a = cube(&mut backend, 1.0);
        let b = cube(&mut backend, 2.0);
        let u = backend.boolean(BooleanOp::Union, &[a, b]).unwrap();
        assert_eq!(backend.mesh(u).unwrap().triangle_count(), 24);
        let d = backend.boolean(BooleanOp::Difference, &[b, a]).unwrap();
        assert_eq!(backend.mesh(d).unwrap().triangle_count(), 12);
    }

    #[test]
    fn test_hull_spans_inputs() {
        let mut backend = MeshBackend::new();
        let a = cube(&mut backend, 1.0);
        let b = cube(&mut backend, 1.0);
        let moved = backend
            .transform(b, &Matrix4::new_translation(&Vector3::new(4.0, 0.0, 0.0)))
            .unwrap();
        let h = backend.hull(&[a, moved]).unwrap();
        let bbox = backend.mesh(h).unwrap().bounding_box();
        assert_relative_eq!(bbox.max.x, 5.0, epsilon = 1e-5);
        assert_relative_eq!(bbox.min.x, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_minkowski_of_squares() {
        let mut backend = MeshBackend::new();
        let a = square(&mut backend);
        let b = square(&mut backend);
        let m = backend.minkowski(a, b).unwrap();
        let Some(Shape::Outline(polygons)) = backend.shape(m) else {
            panic!("expected outline");
        };
        assert_eq!(polygons[0].len(), 4);
        assert!(polygons[0].contains(&Point2::new(2.0, 2.0)));
    }

    #[test]
    fn test_linear_extrude() {
        let mut backend = MeshBackend::new();
        let s = square(&mut backend);
        let e = backend
            .extrude_linear(s, 3.0, 0.0, Vector2::new(1.0, 1.0), 1)
            .unwrap();
        let mesh = backend.mesh(e).unwrap();
        assert_eq!(mesh.triangle_count(), 8 + 4);
        assert_relative_eq!(mesh.bounding_box().max.z, 3.0);
    }

    #[test]
    fn test_rotate_extrude() {
        let mut backend = MeshBackend::new();
        let s = square(&mut backend);
        let moved = backend
            .transform(s, &Matrix4::new_translation(&Vector3::new(2.0, 0.0, 0.0)))
            .unwrap();
        let r = backend.extrude_rotate(moved, 360.0, 8).unwrap();
        let bbox = backend.mesh(r).unwrap().bounding_box();
        assert_relative_eq!(bbox.max.x, 3.0, epsilon = 1e-9);
        assert_relative_eq!(bbox.min.y, -3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_mixed_dimensions_rejected() {
        let mut backend = MeshBackend::new();
        let a = cube(&mut backend, 1.0);
        let s = square(&mut backend);
        assert!(matches!(
            backend.boolean(BooleanOp::Union, &[a, s]),
            Err(BackendError::InvalidInput { .. })
        ));
        assert!(backend.extrude_linear(a, 1.0, 0.0, Vector2::new(1.0, 1.0), 1).is_err());
    }

    #[test]
    fn test_unsupported_import() {
        let mut backend = MeshBackend::new();
        let err = backend
            .create_primitive(&Primitive::Import {
                path: "part.obj".into(),
            })
            .unwrap_err();
        assert!(matches!(err, BackendError::Unsupported(_)));
    }
}
