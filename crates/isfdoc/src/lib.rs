//! Interactive Shader Format (ISF) documents.
//!
//! An ISF file is a GLSL fragment shader whose first comment is a JSON block
//! declaring typed inputs, render passes and imported images. This crate turns
//! that file into a read-only [`ShaderDocument`] and generates the GLSL
//! variant a backend compiles for a given set of image texture targets.
//!
//! ```text
//!   *.fs / *.vs ──▶ ShaderDocument::load ──▶ ShaderDocument (Arc-shared)
//!                                               │ generate(&[TextureTarget])
//!                                               ▼
//!                                          ProgramSource { vertex, fragment, interface }
//! ```
mod document;
mod glsl;
mod manifest;

pub use document::{
    DocumentError, DocumentKind, ImportDecl, InputDecl, PassDecl, ShaderDocument,
    FILTER_INPUT_NAME,
};
pub use glsl::{
    image_size_uniform, rewrite_image_macros, ProgramInterface, ProgramSource, TextureTarget,
    UniformDecl, UniformKind, BUILTIN_UNIFORMS, VERTEX_ATTRIBUTE,
};
pub use manifest::{ImportSpec, ImportedSpec, InputSpec, InputType, IsfManifest, Literal, PassSpec};
