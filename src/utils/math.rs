// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Math utilities

use nalgebra::{Point3, Vector3};

/// Calculate the normal of a triangle given three vertices
pub fn calculate_triangle_normal(
    p0: &Point3<f64>,
    p1: &Point3<f64>,
    p2: &Point3<f64>,
) -> Vector3<f64> {
    let v1 = p1 - p0;
    let v2 = p2 - p0;
    let normal = v1.cross(&v2);
    let length = normal.norm();
    if length > 1e-12 {
        normal / length
    } else {
        Vector3::z()
    }
}

/// Linear interpolation
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Sine of an angle in degrees, exact at multiples of 90
pub fn sin_deg(deg: f64) -> f64 {
    match quarter_turns(deg) {
        Some(0) | Some(2) => 0.0,
        Some(1) => 1.0,
        Some(3) => -1.0,
        _ => deg.to_radians().sin(),
    }
}

/// Cosine of an angle in degrees, exact at multiples of 90
pub fn cos_deg(deg: f64) -> f64 {
    match quarter_turns(deg) {
        Some(0) => 1.0,
        Some(1) | Some(3) => 0.0,
        Some(2) => -1.0,
        _ => deg.to_radians().cos(),
    }
}

/// Tangent of an angle in degrees, exact at multiples of 90
pub fn tan_deg(deg: f64) -> f64 {
    match quarter_turns(deg) {
        Some(0) | Some(2) => 0.0,
        Some(1) => f64::INFINITY,
        Some(3) => f64::NEG_INFINITY,
        _ => deg.to_radians().tan(),
    }
}

/// Number of whole quarter turns in `deg` modulo 4, if it is an exact multiple of 90
fn quarter_turns(deg: f64) -> Option<u8> {
    if !deg.is_finite() {
        return None;
    }
    let turns = deg.rem_euclid(360.0) / 90.0;
    if turns.fract() == 0.0 {
        Some(turns as u8 % 4)
    } else {
        None
    }
}
