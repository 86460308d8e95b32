use std::fmt;
use std::path::PathBuf;

use isfdoc::{DocumentError, InputType, TextureTarget};
use thiserror::Error;

use crate::buffer::BufferId;
use crate::types::Size;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// Failure to build a shader variant.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{stage} shader failed to compile: {message}")]
    Shader { stage: ShaderStage, message: String },

    #[error("pipeline creation failed: {0}")]
    Pipeline(String),

    #[error("variant generation failed: {0}")]
    Generate(#[from] DocumentError),

    #[error("{0} textures are not supported by this backend")]
    UnsupportedTarget(TextureTarget),
}

/// Failure reported by a `BufferPool`.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("cannot allocate a {width}x{height} buffer")]
    InvalidSize { width: u32, height: u32 },

    #[error("pixel upload expected {expected} bytes, got {actual}")]
    UploadLength { expected: usize, actual: usize },

    #[error("cannot copy buffer {from:?} into {to:?}: size, precision or target differ")]
    ShapeMismatch { from: BufferId, to: BufferId },

    #[error("buffer {0:?} was not allocated by this pool")]
    ForeignBuffer(BufferId),

    #[error("device allocation failed: {0}")]
    Device(String),
}

/// Failure while recording or submitting a draw.
#[derive(Debug, Error)]
#[error("render backend error: {message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("no ISF document is bound")]
    NoDocumentBound,

    #[error("document has no input named `{0}`")]
    UnknownInput(String),

    #[error("input `{input}` expects a {expected} value, got {found}")]
    TypeMismatch {
        input: String,
        expected: InputType,
        found: &'static str,
    },

    #[error("pass {pass} samples input `{input}` which has never been bound")]
    UnresolvedInput { input: String, pass: u32 },

    #[error("shader compilation failed: {0}")]
    CompilationFailed(#[from] CompileError),

    #[error("buffer allocation failed: {0}")]
    AllocationFailed(#[from] PoolError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("failed to load imported image `{name}` from {path}: {reason}")]
    Import {
        name: String,
        path: PathBuf,
        reason: String,
    },

    #[error("render target is {actual} but the frame is {expected}")]
    TargetSize { expected: Size, actual: Size },

    #[error(transparent)]
    Backend(#[from] BackendError),
}
