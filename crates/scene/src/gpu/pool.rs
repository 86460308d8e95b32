use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use isfdoc::TextureTarget;

use crate::buffer::{check_same_shape, check_size, check_upload_length, Buffer, BufferId, BufferPool, BufferRef, FreeList};
use crate::error::PoolError;
use crate::types::{Precision, Size};

use super::context::WgpuContext;

/// Face file stems in wgpu cube layer order (+X, -X, +Y, -Y, +Z, -Z).
pub const CUBEMAP_FACE_STEMS: [&str; 6] = ["posx", "negx", "posy", "negy", "posz", "negz"];

/// GPU resource behind a pooled `Buffer`.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    /// D2 view for 2D targets, Cube view for cube maps.
    pub view: wgpu::TextureView,
}

pub(crate) fn texture_format(precision: Precision) -> wgpu::TextureFormat {
    match precision {
        Precision::Standard => wgpu::TextureFormat::Rgba8Unorm,
        Precision::Float => wgpu::TextureFormat::Rgba16Float,
    }
}

/// Pool of render-target textures on one device.
pub struct WgpuBufferPool {
    context: Arc<WgpuContext>,
    next_id: AtomicU64,
    free: FreeList,
}

impl WgpuBufferPool {
    pub fn new(context: Arc<WgpuContext>) -> Self {
        Self {
            context,
            next_id: AtomicU64::new(0),
            free: FreeList::default(),
        }
    }

    fn next_id(&self) -> BufferId {
        BufferId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn create(
        &self,
        size: Size,
        precision: Precision,
        target: TextureTarget,
        label: &str,
    ) -> Result<Buffer, PoolError> {
        let layers = match target {
            TextureTarget::Texture2D => 1,
            TextureTarget::Cube => 6,
            TextureTarget::Rect => return Err(PoolError::Device("rectangle textures are not supported".into())),
        };
        let limit = self.context.device.limits().max_texture_dimension_2d;
        if size.width > limit || size.height > limit {
            return Err(PoolError::Device(format!(
                "{size} exceeds the device texture limit of {limit}"
            )));
        }

        let texture = self.context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(precision),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = match target {
            TextureTarget::Cube => texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some(label),
                dimension: Some(wgpu::TextureViewDimension::Cube),
                array_layer_count: Some(6),
                ..Default::default()
            }),
            _ => texture.create_view(&wgpu::TextureViewDescriptor::default()),
        };

        Ok(Buffer::new(self.next_id(), size, precision, target).with_backing(GpuTexture { texture, view }))
    }

    fn write_layers(&self, buffer: &Buffer, size: Size, pixels: &[u8], layers: u32) -> Result<(), PoolError> {
        let texture = buffer
            .backing::<GpuTexture>()
            .ok_or(PoolError::ForeignBuffer(buffer.id()))?;
        self.context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(size.width * 4),
                rows_per_image: Some(size.height),
            },
            wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: layers,
            },
        );
        Ok(())
    }

    fn copy_texture(&self, from: &Buffer, to: &Buffer) -> Result<(), PoolError> {
        let source = from
            .backing::<GpuTexture>()
            .ok_or(PoolError::ForeignBuffer(from.id()))?;
        let destination = to
            .backing::<GpuTexture>()
            .ok_or(PoolError::ForeignBuffer(to.id()))?;

        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("isf buffer copy"),
            });
        encoder.copy_texture_to_texture(
            source.texture.as_image_copy(),
            destination.texture.as_image_copy(),
            source.texture.size(),
        );
        self.context.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    /// Creates a cube-map buffer from six square RGBA8 faces laid out back to
    /// back in `CUBEMAP_FACE_STEMS` order.
    pub fn upload_cube_rgba(&self, face: Size, pixels: &[u8]) -> Result<BufferRef, PoolError> {
        check_size(face)?;
        let expected = face.width as usize * face.height as usize * 4 * 6;
        if pixels.len() != expected {
            return Err(PoolError::UploadLength {
                expected,
                actual: pixels.len(),
            });
        }
        let buffer = self.create(face, Precision::Standard, TextureTarget::Cube, "isf cube map")?;
        self.write_layers(&buffer, face, pixels, 6)?;
        Ok(Arc::new(buffer))
    }
}

impl BufferPool for WgpuBufferPool {
    fn acquire(&self, size: Size, precision: Precision) -> Result<BufferRef, PoolError> {
        check_size(size)?;
        let buffer = match self.free.take(size, precision) {
            Some(buffer) => buffer,
            None => self.create(size, precision, TextureTarget::Texture2D, "isf pass target")?,
        };
        Ok(Arc::new(buffer))
    }

    fn release(&self, buffer: BufferRef) {
        self.free.give(buffer);
    }

    fn copy(&self, buffer: &BufferRef) -> Result<BufferRef, PoolError> {
        let copy = self.create(buffer.size(), buffer.precision(), buffer.target(), "isf buffer copy")?;
        self.copy_texture(buffer, &copy)?;
        Ok(Arc::new(copy))
    }

    fn copy_into(&self, source: &BufferRef, destination: &BufferRef) -> Result<(), PoolError> {
        check_same_shape(source, destination)?;
        self.copy_texture(source, destination)
    }

    fn upload_rgba(&self, size: Size, pixels: &[u8]) -> Result<BufferRef, PoolError> {
        check_size(size)?;
        check_upload_length(size, pixels)?;
        let buffer = self.create(size, Precision::Standard, TextureTarget::Texture2D, "isf image upload")?;
        self.write_layers(&buffer, size, pixels, 1)?;
        Ok(Arc::new(buffer))
    }
}

/// Loads `posx.png` ... `negz.png` (or jpg/bmp) from `directory` into a cube
/// map buffer.
pub fn load_cubemap(pool: &WgpuBufferPool, directory: &Path) -> Result<BufferRef, PoolError> {
    let mut face_size = None;
    let mut pixels = Vec::new();
    for stem in CUBEMAP_FACE_STEMS {
        let path = find_cubemap_face(directory, stem).ok_or_else(|| {
            PoolError::Device(format!(
                "cubemap face '{stem}' missing in {}",
                directory.display()
            ))
        })?;
        let face = image::open(&path)
            .map_err(|err| PoolError::Device(format!("failed to open {}: {err}", path.display())))?
            .to_rgba8();
        let size = Size::new(face.width(), face.height());
        if size.width != size.height || face_size.is_some_and(|first| first != size) {
            return Err(PoolError::Device(format!(
                "cubemap face {} must be square and match the other faces",
                path.display()
            )));
        }
        face_size = Some(size);
        pixels.extend_from_slice(face.as_raw());
    }
    let face_size = face_size.ok_or(PoolError::InvalidSize { width: 0, height: 0 })?;
    pool.upload_cube_rgba(face_size, &pixels)
}

fn find_cubemap_face(directory: &Path, stem: &str) -> Option<PathBuf> {
    const EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];
    EXTENSIONS
        .iter()
        .map(|ext| directory.join(format!("{stem}.{ext}")))
        .find(|candidate| candidate.exists())
}
