// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! STL export and import

use crate::geometry::{Mesh, Triangle, Vertex};
use anyhow::{Context, Result};
use nalgebra::{Point3, Vector3};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write a mesh as binary STL
pub fn write_stl<W: Write>(mesh: &Mesh, writer: &mut W) -> Result<()> {
    let triangles: Vec<stl_io::Triangle> = mesh
        .triangles
        .iter()
        .map(|tri| {
            let corner = |i: usize| {
                let p = mesh.vertices[tri.indices[i]].position;
                stl_io::Vertex::new([p.x as f32, p.y as f32, p.z as f32])
            };
            // STL wants face normals, not the averaged vertex normals
            let normal = tri.face_normal(mesh);
            stl_io::Triangle {
                normal: stl_io::Normal::new([normal.x as f32, normal.y as f32, normal.z as f32]),
                vertices: [corner(0), corner(1), corner(2)],
            }
        })
        .collect();

    stl_io::write_stl(writer, triangles.iter()).context("Failed to write STL data")?;
    Ok(())
}

/// Export a mesh to a binary STL file
pub fn export_stl(mesh: &Mesh, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create STL file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write_stl(mesh, &mut writer)?;
    writer.flush().context("Failed to flush STL file")?;
    Ok(())
}

/// Load an STL file (ASCII or binary) into a mesh
pub fn read_stl(path: &Path) -> Result<Mesh> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open STL file: {}", path.display()))?;
    let stl = stl_io::read_stl(&mut file)
        .with_context(|| format!("Failed to read STL file: {}", path.display()))?;

    let mut mesh = Mesh::with_capacity(stl.faces.len() * 3, stl.faces.len());
    for face in &stl.faces {
        let normal = Vector3::new(
            face.normal[0] as f64,
            face.normal[1] as f64,
            face.normal[2] as f64,
        );
        let mut indices = [0; 3];
        for (slot, &vertex_index) in indices.iter_mut().zip(face.vertices.iter()) {
            let v = &stl.vertices[vertex_index];
            *slot = mesh.add_vertex(Vertex::new(
                Point3::new(v[0] as f64, v[1] as f64, v[2] as f64),
                normal,
            ));
        }
        mesh.add_triangle(Triangle::new(indices));
    }

    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Primitive;
    use tempfile::TempDir;

    #[test]
    fn test_stl_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("cube.stl");
        let mesh = Primitive::Cube {
            size: Vector3::new(2.0, 2.0, 2.0),
            center: false,
        }
        .to_mesh()
        .context("cube has a mesh")?;

        export_stl(&mesh, &path)?;
        let loaded = read_stl(&path)?;
        assert_eq!(loaded.triangle_count(), 12);
        let (loaded, original) = (loaded.bounding_box(), mesh.bounding_box());
        approx::assert_relative_eq!(loaded.min, original.min, epsilon = 1e-6);
        approx::assert_relative_eq!(loaded.max, original.max, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_missing_file() {
        let err = read_stl(Path::new("/nonexistent/part.stl")).unwrap_err();
        assert!(err.to_string().contains("Failed to open STL file"));
    }
}
