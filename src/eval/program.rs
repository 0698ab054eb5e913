// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Evaluation output

use crate::geometry::Handle;
use serde::Serialize;

/// Display hint attached to a geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Annotation {
    /// From the `#` modifier
    Highlight,
    /// From the `%` modifier
    Background,
    /// RGBA from `color()`, components in 0..=1
    Color([f64; 4]),
}

/// A backend handle plus the annotations it carries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Geometry {
    pub handle: Handle,
    pub annotations: Vec<Annotation>,
}

impl Geometry {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            annotations: Vec::new(),
        }
    }

    pub fn annotate(&mut self, annotation: Annotation) {
        if !self.annotations.contains(&annotation) {
            self.annotations.push(annotation);
        }
    }

    pub fn is_highlighted(&self) -> bool {
        self.annotations.contains(&Annotation::Highlight)
    }

    pub fn is_background(&self) -> bool {
        self.annotations.contains(&Annotation::Background)
    }

    /// The innermost `color()` applied, if any
    pub fn color(&self) -> Option<[f64; 4]> {
        self.annotations.iter().find_map(|a| match a {
            Annotation::Color(rgba) => Some(*rgba),
            _ => None,
        })
    }
}

/// Ordered root geometries and captured `echo` output of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeometryProgram {
    pub roots: Vec<Geometry>,
    pub echoes: Vec<String>,
}

impl GeometryProgram {
    pub fn handles(&self) -> Vec<Handle> {
        self.roots.iter().map(|g| g.handle).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}
