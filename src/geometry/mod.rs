// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Geometry module - backend interface, primitives and preview meshes

mod backend;
mod bbox;
mod mesh;
mod mesh_backend;
mod primitives;
mod recording;
mod transform;

pub use backend::{BackendError, BackendResult, BooleanOp, GeometryBackend, Handle};
pub use bbox::BoundingBox;
pub use mesh::{Mesh, Triangle, Vertex};
pub use mesh_backend::{MeshBackend, Shape};
pub use primitives::Primitive;
pub use recording::{BackendCall, RecordingBackend};
pub use transform::TransformOp;
