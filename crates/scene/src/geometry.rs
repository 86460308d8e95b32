use crate::backend::RenderBackend;
use crate::error::BackendError;

/// Clip-space corners of the quad drawn by every pass, in triangle-strip order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    pub positions: [[f32; 2]; 4],
}

impl Quad {
    /// Covers the whole viewport. Output size only changes the viewport, so
    /// this quad serves every render size.
    pub const fn full_frame() -> Self {
        Self {
            positions: [[-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0], [1.0, 1.0]],
        }
    }
}

/// Keeps the backend's vertex buffer in sync with the quad the pipeline asks
/// for, uploading only when the two differ.
#[derive(Debug, Default)]
pub struct GeometryCache {
    uploaded: Option<Quad>,
    uploads: u64,
}

impl GeometryCache {
    pub fn bind<B: RenderBackend>(&mut self, backend: &mut B, quad: &Quad) -> Result<(), BackendError> {
        if self.uploaded.as_ref() == Some(quad) {
            return Ok(());
        }
        backend.upload_quad(quad)?;
        self.uploaded = Some(*quad);
        self.uploads += 1;
        Ok(())
    }

    pub fn uploads(&self) -> u64 {
        self.uploads
    }
}
