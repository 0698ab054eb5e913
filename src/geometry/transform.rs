// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Affine transformations as homogeneous matrices

use crate::utils::math::{cos_deg, sin_deg};
use nalgebra::{Matrix3, Matrix4, Vector3};
use serde::{Deserialize, Serialize};

/// Transformation operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransformOp {
    Translate(Vector3<f64>),
    /// Euler angles in degrees, applied about x, then y, then z
    Rotate(Vector3<f64>),
    /// Rotation by an angle in degrees about an arbitrary axis
    RotateAxis { angle: f64, axis: Vector3<f64> },
    Scale(Vector3<f64>),
    /// Reflection through the plane with the given normal
    Mirror(Vector3<f64>),
    Multmatrix(Matrix4<f64>),
}

impl TransformOp {
    /// Convert transformation to a 4x4 matrix
    pub fn to_matrix(&self) -> Matrix4<f64> {
        match self {
            TransformOp::Translate(v) => Matrix4::new_translation(v),
            TransformOp::Rotate(angles) => {
                let rx = axis_rotation(&Vector3::x(), angles.x);
                let ry = axis_rotation(&Vector3::y(), angles.y);
                let rz = axis_rotation(&Vector3::z(), angles.z);
                (rz * ry * rx).to_homogeneous()
            }
            TransformOp::RotateAxis { angle, axis } => match axis.try_normalize(1e-12) {
                Some(unit) => axis_rotation(&unit, *angle).to_homogeneous(),
                None => Matrix4::identity(),
            },
            TransformOp::Scale(s) => Matrix4::new_nonuniform_scaling(s),
            TransformOp::Mirror(normal) => {
                let length_sq = normal.norm_squared();
                if length_sq < 1e-24 {
                    return Matrix4::identity();
                }
                let reflection = Matrix3::identity() - normal * normal.transpose() * (2.0 / length_sq);
                reflection.to_homogeneous()
            }
            TransformOp::Multmatrix(m) => *m,
        }
    }
}

/// Rodrigues rotation about a unit axis, with exact quarter turns
fn axis_rotation(axis: &Vector3<f64>, degrees: f64) -> Matrix3<f64> {
    let (s, c) = (sin_deg(degrees), cos_deg(degrees));
    let t = 1.0 - c;
    let (x, y, z) = (axis.x, axis.y, axis.z);
    Matrix3::new(
        t * x * x + c,
        t * x * y - s * z,
        t * x * z + s * y,
        t * x * y + s * z,
        t * y * y + c,
        t * y * z - s * x,
        t * x * z - s * y,
        t * y * z + s * x,
        t * z * z + c,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    #[test]
    fn test_translate() {
        let m = TransformOp::Translate(Vector3::new(1.0, 2.0, 3.0)).to_matrix();
        assert_eq!(
            m.transform_point(&Point3::origin()),
            Point3::new(1.0, 2.0, 3.0)
        );
    }

    #[test]
    fn test_quarter_turn_is_exact() {
        let m = TransformOp::Rotate(Vector3::new(0.0, 0.0, 90.0)).to_matrix();
        assert_eq!(
            m.transform_point(&Point3::new(1.0, 0.0, 0.0)),
            Point3::new(0.0, 1.0, 0.0)
        );
    }

    #[test]
    fn test_rotation_order_x_then_z() {
        let m = TransformOp::Rotate(Vector3::new(90.0, 0.0, 90.0)).to_matrix();
        // y -> z under x, then z stays under z
        assert_eq!(
            m.transform_point(&Point3::new(0.0, 1.0, 0.0)),
            Point3::new(0.0, 0.0, 1.0)
        );
    }

    #[test]
    fn test_axis_rotation() {
        let m = TransformOp::RotateAxis {
            angle: 180.0,
            axis: Vector3::new(1.0, 1.0, 0.0),
        }
        .to_matrix();
        let p = m.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p, Point3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_mirror_arbitrary_plane() {
        let m = TransformOp::Mirror(Vector3::new(1.0, 1.0, 0.0)).to_matrix();
        let p = m.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p, Point3::new(0.0, -1.0, 0.0), epsilon = 1e-12);
        let identity = TransformOp::Mirror(Vector3::zeros()).to_matrix();
        assert_eq!(identity, Matrix4::identity());
    }
}
