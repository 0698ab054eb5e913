// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Geometry backend interface
//!
//! The evaluator never computes mesh data itself. Every primitive, transform
//! and combining operation is issued to a [`GeometryBackend`], which returns an
//! opaque [`Handle`] to the result. Operations never mutate their inputs.

use super::Primitive;
use nalgebra::{Matrix4, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque reference to a backend-owned shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(pub u64);

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BooleanOp {
    Union,
    Difference,
    Intersection,
}

impl BooleanOp {
    pub fn name(self) -> &'static str {
        match self {
            BooleanOp::Union => "union",
            BooleanOp::Difference => "difference",
            BooleanOp::Intersection => "intersection",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("unknown geometry handle {0}")]
    UnknownHandle(Handle),
    #[error("{operation} needs {expected}")]
    InvalidInput {
        operation: &'static str,
        expected: String,
    },
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("{0}")]
    Failed(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Executes build operations and owns the resulting shapes
pub trait GeometryBackend {
    fn create_primitive(&mut self, primitive: &Primitive) -> BackendResult<Handle>;

    fn transform(&mut self, handle: Handle, matrix: &Matrix4<f64>) -> BackendResult<Handle>;

    /// Combine operands left to right; `handles` is never empty
    fn boolean(&mut self, op: BooleanOp, handles: &[Handle]) -> BackendResult<Handle>;

    fn hull(&mut self, handles: &[Handle]) -> BackendResult<Handle>;

    fn minkowski(&mut self, a: Handle, b: Handle) -> BackendResult<Handle>;

    /// Extrude a 2D shape along z from 0 to `height`
    fn extrude_linear(
        &mut self,
        handle: Handle,
        height: f64,
        twist: f64,
        scale: Vector2<f64>,
        slices: u32,
    ) -> BackendResult<Handle>;

    /// Revolve a 2D shape in the XZ plane about the z axis
    fn extrude_rotate(&mut self, handle: Handle, angle: f64, segments: u32)
        -> BackendResult<Handle>;
}

impl<B: GeometryBackend + ?Sized> GeometryBackend for &mut B {
    fn create_primitive(&mut self, primitive: &Primitive) -> BackendResult<Handle> {
        (**self).create_primitive(primitive)
    }

    fn transform(&mut self, handle: Handle, matrix: &Matrix4<f64>) -> BackendResult<Handle> {
        (**self).transform(handle, matrix)
    }

    fn boolean(&mut self, op: BooleanOp, handles: &[Handle]) -> BackendResult<Handle> {
        (**self).boolean(op, handles)
    }

    fn hull(&mut self, handles: &[Handle]) -> BackendResult<Handle> {
        (**self).hull(handles)
    }

    fn minkowski(&mut self, a: Handle, b: Handle) -> BackendResult<Handle> {
        (**self).minkowski(a, b)
    }

    fn extrude_linear(
        &mut self,
        handle: Handle,
        height: f64,
        twist: f64,
        scale: Vector2<f64>,
        slices: u32,
    ) -> BackendResult<Handle> {
        (**self).extrude_linear(handle, height, twist, scale, slices)
    }

    fn extrude_rotate(
        &mut self,
        handle: Handle,
        angle: f64,
        segments: u32,
    ) -> BackendResult<Handle> {
        (**self).extrude_rotate(handle, angle, segments)
    }
}
