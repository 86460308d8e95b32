//! Draw-call seam between the scene engine and a GPU API.
//!
//! Types:
//! - `UniformValue` is the scalar/vector payload written to a uniform location.
//! - `RenderBackend` is what the render pipeline drives, one pass at a time.
//!
//! A pass is always issued as `begin_pass`, any number of `set_uniform` /
//! `bind_texture` calls, then exactly one `draw`.
use std::fmt::Debug;

use isfdoc::ProgramSource;

use crate::buffer::BufferRef;
use crate::error::{BackendError, CompileError};
use crate::geometry::Quad;
use crate::types::Size;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2([f32; 2]),
    Vec4([f32; 4]),
}

pub trait RenderBackend {
    /// A linked vertex/fragment program.
    type Program;
    /// Handle resolved from a program for a uniform or attribute name. Only
    /// valid for the program it was resolved against.
    type Location: Copy + Eq + Debug;

    fn compile(&mut self, source: &ProgramSource) -> Result<Self::Program, CompileError>;

    /// `None` when the program does not use `name`.
    fn uniform_location(&self, program: &Self::Program, name: &str) -> Option<Self::Location>;

    fn attribute_location(&self, program: &Self::Program, name: &str) -> Option<Self::Location>;

    fn upload_quad(&mut self, quad: &Quad) -> Result<(), BackendError>;

    fn begin_pass(
        &mut self,
        program: &Self::Program,
        target: &BufferRef,
        viewport: Size,
    ) -> Result<(), BackendError>;

    fn set_uniform(&mut self, location: Self::Location, value: UniformValue);

    fn bind_texture(&mut self, location: Self::Location, buffer: &BufferRef);

    /// Draws the uploaded quad into the pass target, feeding positions through
    /// `attribute` when the program declares it.
    fn draw(&mut self, attribute: Option<Self::Location>) -> Result<(), BackendError>;
}
