// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Geometric primitives and their preview mesh generators

use super::{Mesh, Triangle, Vertex};
use nalgebra::{Point2, Point3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// A leaf shape with fully resolved parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    Cube {
        size: Vector3<f64>,
        center: bool,
    },
    Sphere {
        r: f64,
        segments: u32,
    },
    Cylinder {
        h: f64,
        r1: f64,
        r2: f64,
        center: bool,
        segments: u32,
    },
    Polyhedron {
        points: Vec<Point3<f64>>,
        faces: Vec<Vec<usize>>,
    },
    Square {
        size: Vector2<f64>,
        center: bool,
    },
    Circle {
        r: f64,
        segments: u32,
    },
    Polygon {
        points: Vec<Point2<f64>>,
        /// Index paths; `None` means all points in order
        paths: Option<Vec<Vec<usize>>>,
    },
    /// External mesh data referenced by path
    Import {
        path: String,
    },
}

impl Primitive {
    /// Module name that produces this primitive
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cube { .. } => "cube",
            Self::Sphere { .. } => "sphere",
            Self::Cylinder { .. } => "cylinder",
            Self::Polyhedron { .. } => "polyhedron",
            Self::Square { .. } => "square",
            Self::Circle { .. } => "circle",
            Self::Polygon { .. } => "polygon",
            Self::Import { .. } => "import",
        }
    }

    /// Triangle mesh for 3D primitives. `None` for 2D shapes and imports.
    pub fn to_mesh(&self) -> Option<Mesh> {
        let mesh = match self {
            Self::Cube { size, center } => generate_cube_mesh(*size, *center),
            Self::Sphere { r, segments } => generate_sphere_mesh(*r, *segments),
            Self::Cylinder {
                h,
                r1,
                r2,
                center,
                segments,
            } => {
                let mut mesh = generate_cone_mesh(*h, *r1, *r2, *segments);
                if *center {
                    mesh.transform(&nalgebra::Matrix4::new_translation(&Vector3::new(
                        0.0,
                        0.0,
                        -h / 2.0,
                    )));
                }
                mesh
            }
            Self::Polyhedron { points, faces } => generate_polyhedron_mesh(points, faces),
            _ => return None,
        };
        Some(mesh)
    }

    /// Closed outlines for 2D primitives, counter-clockwise
    pub fn outline(&self) -> Option<Vec<Vec<Point2<f64>>>> {
        let outline = match self {
            Self::Square { size, center } => {
                let (x0, y0) = if *center {
                    (-size.x / 2.0, -size.y / 2.0)
                } else {
                    (0.0, 0.0)
                };
                vec![vec![
                    Point2::new(x0, y0),
                    Point2::new(x0 + size.x, y0),
                    Point2::new(x0 + size.x, y0 + size.y),
                    Point2::new(x0, y0 + size.y),
                ]]
            }
            Self::Circle { r, segments } => {
                let n = (*segments).max(3);
                vec![(0..n)
                    .map(|i| {
                        let angle = 2.0 * PI * i as f64 / n as f64;
                        Point2::new(r * angle.cos(), r * angle.sin())
                    })
                    .collect()]
            }
            Self::Polygon { points, paths } => match paths {
                None => vec![points.clone()],
                Some(paths) => paths
                    .iter()
                    .map(|path| {
                        path.iter()
                            .filter_map(|&i| points.get(i).copied())
                            .collect::<Vec<_>>()
                    })
                    .filter(|path| path.len() >= 3)
                    .collect(),
            },
            _ => return None,
        };
        Some(outline)
    }
}

fn generate_cube_mesh(size: Vector3<f64>, center: bool) -> Mesh {
    let mut mesh = Mesh::with_capacity(36, 12);

    let min = if center {
        Point3::from(-size / 2.0)
    } else {
        Point3::origin()
    };
    let max = min + size;

    let positions = [
        Point3::new(min.x, min.y, min.z),
        Point3::new(max.x, min.y, min.z),
        Point3::new(max.x, max.y, min.z),
        Point3::new(min.x, max.y, min.z),
        Point3::new(min.x, min.y, max.z),
        Point3::new(max.x, min.y, max.z),
        Point3::new(max.x, max.y, max.z),
        Point3::new(min.x, max.y, max.z),
    ];

    // Two triangles per face, each face with its own vertices for flat normals
    let faces = [
        ([4, 5, 6], Vector3::new(0.0, 0.0, 1.0)),
        ([4, 6, 7], Vector3::new(0.0, 0.0, 1.0)),
        ([1, 0, 3], Vector3::new(0.0, 0.0, -1.0)),
        ([1, 3, 2], Vector3::new(0.0, 0.0, -1.0)),
        ([5, 1, 2], Vector3::new(1.0, 0.0, 0.0)),
        ([5, 2, 6], Vector3::new(1.0, 0.0, 0.0)),
        ([0, 4, 7], Vector3::new(-1.0, 0.0, 0.0)),
        ([0, 7, 3], Vector3::new(-1.0, 0.0, 0.0)),
        ([7, 6, 2], Vector3::new(0.0, 1.0, 0.0)),
        ([7, 2, 3], Vector3::new(0.0, 1.0, 0.0)),
        ([0, 1, 5], Vector3::new(0.0, -1.0, 0.0)),
        ([0, 5, 4], Vector3::new(0.0, -1.0, 0.0)),
    ];

    for (indices, normal) in faces {
        let v0 = mesh.add_vertex(Vertex::new(positions[indices[0]], normal));
        let v1 = mesh.add_vertex(Vertex::new(positions[indices[1]], normal));
        let v2 = mesh.add_vertex(Vertex::new(positions[indices[2]], normal));
        mesh.add_triangle(Triangle::new([v0, v1, v2]));
    }

    mesh
}

/// UV sphere around the z axis
fn generate_sphere_mesh(radius: f64, segments: u32) -> Mesh {
    let mut mesh = Mesh::new();
    let slices = segments.max(3);
    let stacks = ((segments + 1) / 2).max(2);

    for i in 0..=stacks {
        let phi = PI * i as f64 / stacks as f64;
        let z = radius * phi.cos();
        let r = radius * phi.sin();

        for j in 0..=slices {
            let theta = 2.0 * PI * j as f64 / slices as f64;
            let position = Point3::new(r * theta.cos(), r * theta.sin(), z);
            let normal = position.coords.try_normalize(1e-12).unwrap_or(Vector3::z());
            mesh.add_vertex(Vertex::new(position, normal));
        }
    }

    for i in 0..stacks {
        for j in 0..slices {
            let first = (i * (slices + 1) + j) as usize;
            let second = first + slices as usize + 1;
            mesh.add_triangle(Triangle::new([first, second, first + 1]));
            mesh.add_triangle(Triangle::new([second, second + 1, first + 1]));
        }
    }

    mesh
}

/// Truncated cone from z=0 to z=height
fn generate_cone_mesh(height: f64, r1: f64, r2: f64, segments: u32) -> Mesh {
    let segments = segments.max(3) as usize;
    let mut mesh = Mesh::with_capacity(2 + segments * 2, segments * 4);

    let bottom_center = mesh.add_vertex(Vertex::new(Point3::origin(), -Vector3::z()));
    let top_center = mesh.add_vertex(Vertex::new(Point3::new(0.0, 0.0, height), Vector3::z()));

    let mut bottom = Vec::with_capacity(segments);
    let mut top = Vec::with_capacity(segments);
    for i in 0..segments {
        let angle = 2.0 * PI * i as f64 / segments as f64;
        let (sin, cos) = angle.sin_cos();
        bottom.push(mesh.add_vertex(Vertex::new(
            Point3::new(r1 * cos, r1 * sin, 0.0),
            -Vector3::z(),
        )));
        top.push(mesh.add_vertex(Vertex::new(
            Point3::new(r2 * cos, r2 * sin, height),
            Vector3::z(),
        )));
    }

    for i in 0..segments {
        let next = (i + 1) % segments;
        mesh.add_triangle(Triangle::new([bottom_center, bottom[next], bottom[i]]));
        mesh.add_triangle(Triangle::new([top_center, top[i], top[next]]));
        // Side quads share rim vertices so the mesh stays manifold
        mesh.add_triangle(Triangle::new([bottom[i], bottom[next], top[i]]));
        mesh.add_triangle(Triangle::new([top[i], bottom[next], top[next]]));
    }

    mesh.recompute_normals();
    mesh
}

/// Faces are listed clockwise when seen from outside; fan them reversed
fn generate_polyhedron_mesh(points: &[Point3<f64>], faces: &[Vec<usize>]) -> Mesh {
    let triangles: Vec<[usize; 3]> = faces
        .iter()
        .filter(|face| face.len() >= 3 && face.iter().all(|&i| i < points.len()))
        .flat_map(|face| (1..face.len() - 1).map(move |k| [face[0], face[k + 1], face[k]]))
        .collect();
    Mesh::from_indexed(points, &triangles)
}
