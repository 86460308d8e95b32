use std::sync::mpsc;

use half::f16;
use image::RgbaImage;

use crate::buffer::BufferRef;
use crate::error::BackendError;
use crate::types::Precision;

use super::context::WgpuContext;
use super::pool::GpuTexture;

/// Row pitch of a readback buffer for `width` texels of `bytes_per_texel`.
fn padded_row_bytes(width: u32, bytes_per_texel: u32) -> u32 {
    let unpadded = width * bytes_per_texel;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Maps an RGBA16F texel row to RGBA8, clamping to [0, 1].
fn half_row_to_rgba8(row: &[u8], out: &mut Vec<u8>) {
    for bits in row.chunks_exact(2) {
        let value = f16::from_le_bytes([bits[0], bits[1]]).to_f32();
        out.push((value.clamp(0.0, 1.0) * 255.0).round() as u8);
    }
}

/// Copies the first layer of `buffer` back to the CPU as 8-bit RGBA. Float
/// buffers are clamped.
pub fn read_rgba(context: &WgpuContext, buffer: &BufferRef) -> Result<RgbaImage, BackendError> {
    let texture = buffer
        .backing::<GpuTexture>()
        .ok_or_else(|| BackendError::new(format!("buffer {:?} is not a wgpu texture", buffer.id())))?;
    let size = buffer.size();
    let bytes_per_texel = match buffer.precision() {
        Precision::Standard => 4,
        Precision::Float => 8,
    };
    let row_bytes = padded_row_bytes(size.width, bytes_per_texel);

    let device = &context.device;
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("isf readback"),
        size: u64::from(row_bytes) * u64::from(size.height),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("isf readback encoder"),
    });
    encoder.copy_texture_to_buffer(
        texture.texture.as_image_copy(),
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(row_bytes),
                rows_per_image: Some(size.height),
            },
        },
        wgpu::Extent3d {
            width: size.width,
            height: size.height,
            depth_or_array_layers: 1,
        },
    );
    context.queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (sender, receiver) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device
        .poll(wgpu::PollType::Wait)
        .map_err(|err| BackendError::new(format!("device poll failed: {err}")))?;
    receiver
        .recv()
        .map_err(|_| BackendError::new("readback mapping was dropped"))?
        .map_err(|err| BackendError::new(format!("readback mapping failed: {err}")))?;

    let unpadded = (size.width * bytes_per_texel) as usize;
    let mut pixels = Vec::with_capacity(size.width as usize * size.height as usize * 4);
    {
        let mapped = slice.get_mapped_range();
        for row in mapped.chunks(row_bytes as usize) {
            let row = &row[..unpadded];
            match buffer.precision() {
                Precision::Standard => pixels.extend_from_slice(row),
                Precision::Float => half_row_to_rgba8(row, &mut pixels),
            }
        }
    }
    staging.unmap();

    RgbaImage::from_raw(size.width, size.height, pixels)
        .ok_or_else(|| BackendError::new("readback produced a short image"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_padded_to_copy_alignment() {
        assert_eq!(padded_row_bytes(1, 4), 256);
        assert_eq!(padded_row_bytes(64, 4), 256);
        assert_eq!(padded_row_bytes(65, 4), 512);
        assert_eq!(padded_row_bytes(40, 8), 512);
    }

    #[test]
    fn half_floats_clamp_into_bytes() {
        let mut row = Vec::new();
        for value in [0.0f32, 0.5, 1.0, 4.0, -1.0] {
            row.extend_from_slice(&f16::from_f32(value).to_le_bytes());
        }
        let mut out = Vec::new();
        half_row_to_rgba8(&row, &mut out);
        assert_eq!(out, vec![0, 128, 255, 255, 0]);
    }
}
