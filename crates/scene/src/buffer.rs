//! Pooled GPU buffers and the pool seam the engine allocates through.
//!
//! The engine never owns buffer memory. A `BufferPool` hands out
//! reference-counted `Buffer`s; whoever drops the last `BufferRef` frees it,
//! and `release` gives the pool a chance to recycle a buffer nobody else holds.
//! Backends attach their GPU resource (a texture, for wgpu) as the buffer's
//! backing and downcast it when binding.
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use isfdoc::TextureTarget;
use parking_lot::Mutex;

use crate::error::PoolError;
use crate::types::{Precision, Size};

/// Free buffers kept per pool before further releases are dropped.
const MAX_FREE_BUFFERS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

pub struct Buffer {
    id: BufferId,
    size: Size,
    precision: Precision,
    target: TextureTarget,
    backing: Option<Box<dyn Any + Send + Sync>>,
}

pub type BufferRef = Arc<Buffer>;

impl Buffer {
    pub fn new(id: BufferId, size: Size, precision: Precision, target: TextureTarget) -> Self {
        Self {
            id,
            size,
            precision,
            target,
            backing: None,
        }
    }

    pub fn with_backing<T: Any + Send + Sync>(mut self, backing: T) -> Self {
        self.backing = Some(Box::new(backing));
        self
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Texture target the buffer's underlying representation is bound as.
    pub fn target(&self) -> TextureTarget {
        self.target
    }

    pub fn backing<T: Any>(&self) -> Option<&T> {
        self.backing.as_ref()?.downcast_ref::<T>()
    }

    fn matches(&self, size: Size, precision: Precision) -> bool {
        self.size == size && self.precision == precision && self.target == TextureTarget::Texture2D
    }

    fn same_shape(&self, other: &Buffer) -> bool {
        self.size == other.size && self.precision == other.precision && self.target == other.target
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("precision", &self.precision)
            .field("target", &self.target)
            .field("backed", &self.backing.is_some())
            .finish()
    }
}

/// Allocation seam shared by any number of scenes. Implementations synchronise
/// internally; each call is atomic from the engine's point of view.
pub trait BufferPool: Send + Sync {
    /// Returns a 2D buffer of exactly `size`, recycled or freshly allocated.
    fn acquire(&self, size: Size, precision: Precision) -> Result<BufferRef, PoolError>;

    /// Hands a buffer back. Buffers still referenced elsewhere are simply dropped.
    fn release(&self, buffer: BufferRef);

    /// Allocates a new buffer holding a copy of `buffer`'s contents.
    fn copy(&self, buffer: &BufferRef) -> Result<BufferRef, PoolError>;

    /// Overwrites `destination` with the contents of `source`. Both buffers
    /// must have the same size, precision and target.
    fn copy_into(&self, source: &BufferRef, destination: &BufferRef) -> Result<(), PoolError>;

    /// Creates a standard-precision 2D buffer from tightly packed RGBA8 pixels.
    fn upload_rgba(&self, size: Size, pixels: &[u8]) -> Result<BufferRef, PoolError>;
}

/// Recycles buffers that come back uniquely owned.
#[derive(Debug, Default)]
pub(crate) struct FreeList {
    buffers: Mutex<Vec<Buffer>>,
}

impl FreeList {
    pub(crate) fn take(&self, size: Size, precision: Precision) -> Option<Buffer> {
        let mut buffers = self.buffers.lock();
        let index = buffers
            .iter()
            .position(|buffer| buffer.matches(size, precision))?;
        Some(buffers.swap_remove(index))
    }

    pub(crate) fn give(&self, buffer: BufferRef) {
        if let Ok(buffer) = Arc::try_unwrap(buffer) {
            if buffer.target != TextureTarget::Texture2D {
                return;
            }
            let mut buffers = self.buffers.lock();
            if buffers.len() < MAX_FREE_BUFFERS {
                buffers.push(buffer);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.buffers.lock().len()
    }
}

/// Default pool used when no pool is injected: allocates backing-less buffer
/// descriptors in host memory. Pairs with `HeadlessBackend`.
#[derive(Debug, Default)]
pub struct HostBufferPool {
    next_id: AtomicU64,
    allocations: AtomicU64,
    free: FreeList,
    copies: Mutex<Vec<(BufferId, BufferId)>>,
}

impl HostBufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self, size: Size, precision: Precision, target: TextureTarget) -> Buffer {
        let id = BufferId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Buffer::new(id, size, precision, target)
    }

    /// Creates a buffer with an arbitrary texture target, standing in for
    /// externally produced images (camera frames, cube maps).
    pub fn create_with_target(
        &self,
        size: Size,
        precision: Precision,
        target: TextureTarget,
    ) -> Result<BufferRef, PoolError> {
        check_size(size)?;
        Ok(Arc::new(self.allocate(size, precision, target)))
    }

    /// Number of buffers allocated so far (recycled buffers are not counted).
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    pub fn free_buffers(&self) -> usize {
        self.free.len()
    }

    /// `(source, copy)` pairs produced by `copy`, oldest first.
    pub fn copies(&self) -> Vec<(BufferId, BufferId)> {
        self.copies.lock().clone()
    }
}

impl BufferPool for HostBufferPool {
    fn acquire(&self, size: Size, precision: Precision) -> Result<BufferRef, PoolError> {
        check_size(size)?;
        let buffer = self
            .free
            .take(size, precision)
            .unwrap_or_else(|| self.allocate(size, precision, TextureTarget::Texture2D));
        Ok(Arc::new(buffer))
    }

    fn release(&self, buffer: BufferRef) {
        self.free.give(buffer);
    }

    fn copy(&self, buffer: &BufferRef) -> Result<BufferRef, PoolError> {
        let copy = self.allocate(buffer.size(), buffer.precision(), buffer.target());
        self.copies.lock().push((buffer.id(), copy.id()));
        Ok(Arc::new(copy))
    }

    fn copy_into(&self, source: &BufferRef, destination: &BufferRef) -> Result<(), PoolError> {
        check_same_shape(source, destination)?;
        self.copies.lock().push((source.id(), destination.id()));
        Ok(())
    }

    fn upload_rgba(&self, size: Size, pixels: &[u8]) -> Result<BufferRef, PoolError> {
        check_size(size)?;
        check_upload_length(size, pixels)?;
        Ok(Arc::new(self.allocate(
            size,
            Precision::Standard,
            TextureTarget::Texture2D,
        )))
    }
}

pub(crate) fn check_size(size: Size) -> Result<(), PoolError> {
    if size.is_empty() {
        return Err(PoolError::InvalidSize {
            width: size.width,
            height: size.height,
        });
    }
    Ok(())
}

pub(crate) fn check_same_shape(source: &Buffer, destination: &Buffer) -> Result<(), PoolError> {
    if source.same_shape(destination) {
        Ok(())
    } else {
        Err(PoolError::ShapeMismatch {
            from: source.id(),
            to: destination.id(),
        })
    }
}

pub(crate) fn check_upload_length(size: Size, pixels: &[u8]) -> Result<(), PoolError> {
    let expected = size.width as usize * size.height as usize * 4;
    if pixels.len() != expected {
        return Err(PoolError::UploadLength {
            expected,
            actual: pixels.len(),
        });
    }
    Ok(())
}
