//! GPU buffer management and data transfer.

use wgpu::{Buffer, BufferUsages, Device, Queue};

use crate::error::TrainError;

/// Upload data to a GPU buffer.
///
/// Creates a buffer with the given usage flags and copies data from CPU to
/// GPU.
pub fn create_buffer_init<T: bytemuck::Pod>(
    device: &Device,
    label: &str,
    data: &[T],
    usage: BufferUsages,
) -> Buffer {
    use wgpu::util::DeviceExt;

    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(data),
        usage,
    })
}

/// Create an empty buffer for output.
pub fn create_buffer(device: &Device, label: &str, size: u64, usage: BufferUsages) -> Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage,
        mapped_at_creation: false,
    })
}

/// Create a zero-initialized buffer.
///
/// Output buffers whose elements a shader may leave unwritten must start
/// from zero, otherwise stale device memory leaks into later passes.
pub fn create_buffer_zeroed(
    device: &Device,
    label: &str,
    size: u64,
    usage: BufferUsages,
) -> Buffer {
    let data = vec![0u8; size as usize];
    create_buffer_init(device, label, &data, usage)
}

/// Read data back from a GPU buffer to the CPU.
pub async fn read_buffer<T: bytemuck::Pod>(
    device: &Device,
    queue: &Queue,
    buffer: &Buffer,
    count: usize,
) -> Result<Vec<T>, TrainError> {
    let byte_len = (count * std::mem::size_of::<T>()) as u64;
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("staging buffer"),
        size: byte_len,
        usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback encoder"),
    });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, byte_len);
    queue.submit(Some(encoder.finish()));

    let (tx, rx) = futures::channel::oneshot::channel();
    staging
        .slice(..)
        .map_async(wgpu::MapMode::Read, move |result| {
            tx.send(result).ok();
        });
    device.poll(wgpu::Maintain::Wait);

    rx.await
        .map_err(|_| TrainError::backend("readback channel closed"))?
        .map_err(|e| TrainError::backend(format!("buffer mapping failed: {e:?}")))?;

    let data = staging.slice(..).get_mapped_range();
    let result: Vec<T> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    staging.unmap();

    Ok(result)
}

/// Blocking wrapper for read_buffer.
pub fn read_buffer_blocking<T: bytemuck::Pod>(
    device: &Device,
    queue: &Queue,
    buffer: &Buffer,
    count: usize,
) -> Result<Vec<T>, TrainError> {
    pollster::block_on(read_buffer(device, queue, buffer, count))
}
