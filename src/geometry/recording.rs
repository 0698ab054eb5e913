// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Backend that records every call and hands out sequential handles

use super::backend::{BackendError, BackendResult, BooleanOp, GeometryBackend, Handle};
use super::Primitive;
use crate::ast::format_number;
use nalgebra::{Matrix4, Vector2};
use serde::Serialize;
use std::fmt;

/// One recorded backend operation and the handle it returned
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum BackendCall {
    CreatePrimitive {
        primitive: Primitive,
        result: Handle,
    },
    Transform {
        input: Handle,
        matrix: Matrix4<f64>,
        result: Handle,
    },
    Boolean {
        op: BooleanOp,
        inputs: Vec<Handle>,
        result: Handle,
    },
    Hull {
        inputs: Vec<Handle>,
        result: Handle,
    },
    Minkowski {
        a: Handle,
        b: Handle,
        result: Handle,
    },
    ExtrudeLinear {
        input: Handle,
        height: f64,
        twist: f64,
        scale: Vector2<f64>,
        slices: u32,
        result: Handle,
    },
    ExtrudeRotate {
        input: Handle,
        angle: f64,
        segments: u32,
        result: Handle,
    },
}

impl BackendCall {
    pub fn result(&self) -> Handle {
        match self {
            BackendCall::CreatePrimitive { result, .. }
            | BackendCall::Transform { result, .. }
            | BackendCall::Boolean { result, .. }
            | BackendCall::Hull { result, .. }
            | BackendCall::Minkowski { result, .. }
            | BackendCall::ExtrudeLinear { result, .. }
            | BackendCall::ExtrudeRotate { result, .. } => *result,
        }
    }

    /// Short operation name such as `cube`, `transform` or `union`
    pub fn name(&self) -> &'static str {
        match self {
            BackendCall::CreatePrimitive { primitive, .. } => primitive.kind(),
            BackendCall::Transform { .. } => "transform",
            BackendCall::Boolean { op, .. } => op.name(),
            BackendCall::Hull { .. } => "hull",
            BackendCall::Minkowski { .. } => "minkowski",
            BackendCall::ExtrudeLinear { .. } => "linear_extrude",
            BackendCall::ExtrudeRotate { .. } => "rotate_extrude",
        }
    }
}

fn join(handles: &[Handle]) -> String {
    handles
        .iter()
        .map(Handle::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for BackendCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = ", self.result())?;
        match self {
            BackendCall::CreatePrimitive { primitive, .. } => {
                write!(f, "{}({:?})", primitive.kind(), primitive)
            }
            BackendCall::Transform { input, matrix, .. } => {
                let t = matrix.fixed_view::<3, 1>(0, 3);
                write!(
                    f,
                    "transform({}, offset [{}, {}, {}])",
                    input,
                    format_number(t[0]),
                    format_number(t[1]),
                    format_number(t[2])
                )
            }
            BackendCall::Boolean { op, inputs, .. } => write!(f, "{}({})", op.name(), join(inputs)),
            BackendCall::Hull { inputs, .. } => write!(f, "hull({})", join(inputs)),
            BackendCall::Minkowski { a, b, .. } => write!(f, "minkowski({}, {})", a, b),
            BackendCall::ExtrudeLinear {
                input,
                height,
                twist,
                slices,
                ..
            } => write!(
                f,
                "linear_extrude({}, height {}, twist {}, slices {})",
                input,
                format_number(*height),
                format_number(*twist),
                slices
            ),
            BackendCall::ExtrudeRotate {
                input,
                angle,
                segments,
                ..
            } => write!(
                f,
                "rotate_extrude({}, angle {}, segments {})",
                input,
                format_number(*angle),
                segments
            ),
        }
    }
}

/// Deterministic in-memory backend.
///
/// Handles are numbered from 1 in call order, so two runs over the same
/// program produce identical call logs.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Vec<BackendCall>,
    fail_on: Option<String>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that rejects every operation named `operation`
    pub fn failing_on(operation: impl Into<String>) -> Self {
        Self {
            calls: Vec::new(),
            fail_on: Some(operation.into()),
        }
    }

    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    pub fn into_calls(self) -> Vec<BackendCall> {
        self.calls
    }

    /// Primitives created so far, in order
    pub fn primitives(&self) -> Vec<&Primitive> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::CreatePrimitive { primitive, .. } => Some(primitive),
                _ => None,
            })
            .collect()
    }

    /// The call that produced `handle`
    pub fn producer(&self, handle: Handle) -> Option<&BackendCall> {
        let index = usize::try_from(handle.0).ok()?.checked_sub(1)?;
        self.calls.get(index)
    }

    fn check(&self, operation: &str, inputs: &[Handle]) -> BackendResult<Handle> {
        if self.fail_on.as_deref() == Some(operation) {
            return Err(BackendError::Failed(format!(
                "{} rejected by backend",
                operation
            )));
        }
        if let Some(unknown) = inputs
            .iter()
            .find(|h| h.0 == 0 || h.0 > self.calls.len() as u64)
        {
            return Err(BackendError::UnknownHandle(*unknown));
        }
        Ok(Handle(self.calls.len() as u64 + 1))
    }

    fn record(&mut self, call: BackendCall) -> Handle {
        let handle = call.result();
        self.calls.push(call);
        handle
    }
}

impl GeometryBackend for RecordingBackend {
    fn create_primitive(&mut self, primitive: &Primitive) -> BackendResult<Handle> {
        let result = self.check(primitive.kind(), &[])?;
        Ok(self.record(BackendCall::CreatePrimitive {
            primitive: primitive.clone(),
            result,
        }))
    }

    fn transform(&mut self, handle: Handle, matrix: &Matrix4<f64>) -> BackendResult<Handle> {
        let result = self.check("transform", &[handle])?;
        Ok(self.record(BackendCall::Transform {
            input: handle,
            matrix: *matrix,
            result,
        }))
    }

    fn boolean(&mut self, op: BooleanOp, handles: &[Handle]) -> BackendResult<Handle> {
        if handles.is_empty() {
            return Err(BackendError::InvalidInput {
                operation: op.name(),
                expected: "at least one operand".to_string(),
            });
        }
        let result = self.check(op.name(), handles)?;
        Ok(self.record(BackendCall::Boolean {
            op,
            inputs: handles.to_vec(),
            result,
        }))
    }

    fn hull(&mut self, handles: &[Handle]) -> BackendResult<Handle> {
        let result = self.check("hull", handles)?;
        Ok(self.record(BackendCall::Hull {
            inputs: handles.to_vec(),
            result,
        }))
    }

    fn minkowski(&mut self, a: Handle, b: Handle) -> BackendResult<Handle> {
        let result = self.check("minkowski", &[a, b])?;
        Ok(self.record(BackendCall::Minkowski { a, b, result }))
    }

    fn extrude_linear(
        &mut self,
        handle: Handle,
        height: f64,
        twist: f64,
        scale: Vector2<f64>,
        slices: u32,
    ) -> BackendResult<Handle> {
        let result = self.check("linear_extrude", &[handle])?;
        Ok(self.record(BackendCall::ExtrudeLinear {
            input: handle,
            height,
            twist,
            scale,
            slices,
            result,
        }))
    }

    fn extrude_rotate(
        &mut self,
        handle: Handle,
        angle: f64,
        segments: u32,
    ) -> BackendResult<Handle> {
        let result = self.check("rotate_extrude", &[handle])?;
        Ok(self.record(BackendCall::ExtrudeRotate {
            input: handle,
            angle,
            segments,
            result,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn cube() -> Primitive {
        Primitive::Cube {
            size: Vector3::new(1.0, 1.0, 1.0),
            center: false,
        }
    }

    #[test]
    fn test_sequential_handles() {
        let mut backend = RecordingBackend::new();
        let a = backend.create_primitive(&cube()).unwrap();
        let b = backend.create_primitive(&cube()).unwrap();
        let c = backend.boolean(BooleanOp::Union, &[a, b]).unwrap();
        assert_eq!((a, b, c), (Handle(1), Handle(2), Handle(3)));
        assert_eq!(backend.calls().len(), 3);
        assert_eq!(backend.producer(c).map(BackendCall::name), Some("union"));
    }

    #[test]
    fn test_unknown_handle_is_rejected() {
        let mut backend = RecordingBackend::new();
        let err = backend
            .transform(Handle(7), &Matrix4::identity())
            .unwrap_err();
        assert_eq!(err, BackendError::UnknownHandle(Handle(7)));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_failing_on() {
        let mut backend = RecordingBackend::failing_on("cube");
        assert!(matches!(
            backend.create_primitive(&cube()),
            Err(BackendError::Failed(_))
        ));
    }

    #[test]
    fn test_call_display() {
        let mut backend = RecordingBackend::new();
        let a = backend.create_primitive(&cube()).unwrap();
        backend
            .transform(a, &Matrix4::new_translation(&Vector3::new(1.0, 2.5, 0.0)))
            .unwrap();
        assert_eq!(
            backend.calls()[1].to_string(),
            "#2 = transform(#1, offset [1, 2.5, 0])"
        );
    }

    #[test]
    fn test_mutable_reference_is_a_backend() {
        fn build<B: GeometryBackend>(mut backend: B) -> Handle {
            backend.create_primitive(&cube()).unwrap()
        }
        let mut backend = RecordingBackend::new();
        assert_eq!(build(&mut backend), Handle(1));
        assert_eq!(backend.calls().len(), 1);
    }
}
