//! GPU to CPU readback
//!
//! Copies a range of a storage buffer into a mappable staging buffer and
//! waits for the map with a bounded poll. Used by diagnostics and tests,
//! never by the per-frame path.

use std::time::Duration;

use bytemuck::Pod;
use swarm_core::error::{SwarmError, SwarmResult};

use crate::context::GpuContext;

/// Default wait for a readback map
pub const READBACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Read `count` elements of `T` starting at element `first`
pub fn read_buffer<T: Pod>(
    context: &GpuContext,
    buffer: &wgpu::Buffer,
    first: u32,
    count: u32,
    timeout: Duration,
) -> SwarmResult<Vec<T>> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let element = std::mem::size_of::<T>() as u64;
    let offset = first as u64 * element;
    let size = count as u64 * element;
    if offset + size > buffer.size() {
        return Err(SwarmError::invalid_state(format!(
            "readback of {} bytes at {} past end of {} byte buffer",
            size,
            offset,
            buffer.size()
        )));
    }
    if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 || size % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
        return Err(SwarmError::invalid_state(format!(
            "readback range {}+{} is not {}-byte aligned",
            offset,
            size,
            wgpu::COPY_BUFFER_ALIGNMENT
        )));
    }

    let staging = context.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = context
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback"),
        });
    encoder.copy_buffer_to_buffer(buffer, offset, &staging, 0, size);
    context.queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });

    let _ = context.device.poll(wgpu::PollType::Wait {
        submission_index: None,
        timeout: Some(timeout),
    });

    match rx.try_recv() {
        Ok(Ok(())) => {
            let data = slice.get_mapped_range();
            let values = data
                .chunks_exact(element as usize)
                .map(bytemuck::pod_read_unaligned)
                .collect();
            drop(data);
            staging.unmap();
            Ok(values)
        }
        Ok(Err(e)) => Err(SwarmError::gpu(format!("Readback map error: {:?}", e))),
        Err(_) => {
            tracing::debug!("⏳ Readback not ready after {:?}", timeout);
            Err(SwarmError::gpu(format!("Readback timed out after {:?}", timeout)))
        }
    }
}
