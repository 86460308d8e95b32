//! Scene execution engine for ISF shader documents.
//!
//! A [`Scene`] takes a parsed [`isfdoc::ShaderDocument`], compiles the shader
//! variant matching the texture targets of its bound images, and draws the
//! document's passes in order every time [`Scene::render`] is called:
//!
//! ```text
//!   bind(doc) ─▶ DocumentSlot ─┐
//!   set_value ─▶ InputStore ───┼─▶ RenderState::render ─▶ RenderBackend (draws)
//!                              │        │                      ▲
//!                              │        └─▶ BufferPool ────────┘ (targets)
//!                              └─ generation counter resets program, uniform
//!                                 handles and persistent slots on swap
//! ```
//!
//! GPU access goes through two seams: [`RenderBackend`] for compiling and
//! drawing and [`BufferPool`] for render targets. [`HeadlessBackend`] with
//! [`HostBufferPool`] runs the engine without a GPU; the `wgpu` feature adds a
//! real backend under [`gpu`].
mod backend;
mod binding;
mod buffer;
mod error;
mod geometry;
mod headless;
mod inputs;
mod pipeline;
mod scene;
mod timing;
mod tracker;
mod types;
mod uniforms;

#[cfg(feature = "wgpu")]
pub mod gpu;

pub use backend::{RenderBackend, UniformValue};
pub use binding::{Bound, DocumentSlot};
pub use buffer::{Buffer, BufferId, BufferPool, BufferRef, HostBufferPool};
pub use error::{BackendError, CompileError, PoolError, SceneError, ShaderStage};
pub use geometry::{GeometryCache, Quad};
pub use headless::{CompiledVariant, DrawCall, HeadlessBackend, HeadlessLocation, HeadlessProgram};
pub use inputs::{InputStore, InputValue};
pub use pipeline::PassOutputs;
pub use scene::Scene;
pub use timing::{derive_time, TimeSample, Timeline};
pub use tracker::{InputTypeDescriptor, InputTypeTracker};
pub use types::{Precision, SceneConfig, Size};
pub use uniforms::{date_vector, BuiltinUniform, CachedLocation, UniformCache};

pub use isfdoc;
