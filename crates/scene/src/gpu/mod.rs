//! `wgpu` implementation of the engine's GPU seams.
//!
//! - `context` creates an adapter/device/queue without a surface.
//! - `pool` allocates pass targets and uploads images as wgpu textures.
//! - `uniforms` lays a program's uniforms out as one std140 block and emits
//!   the GLSL declarations that alias each ISF name onto it.
//! - `pipeline` wraps generated GLSL with those declarations and builds one
//!   render pipeline per target format.
//! - `backend` records passes: per-pass uniform staging, texture bind groups,
//!   placeholder textures for unbound samplers.
//! - `readback` copies a buffer back to the CPU as an `image::RgbaImage`.
mod backend;
mod context;
mod pipeline;
mod pool;
mod readback;
mod uniforms;

pub use backend::{WgpuBackend, WgpuLocation};
pub use context::WgpuContext;
pub use pipeline::WgpuProgram;
pub use pool::{load_cubemap, GpuTexture, WgpuBufferPool, CUBEMAP_FACE_STEMS};
pub use readback::read_rgba;
pub use uniforms::{UniformLayout, UniformSlot};
