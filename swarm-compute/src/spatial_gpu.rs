//! # GPU Spatial Grid
//!
//! Device-side storage for the uniform grid:
//!
//! 1. **Grid Buffer**: `resolution²` fixed-size cells, each a count plus 64
//!    entity slots (`swarm_core::spatial::GridCell`)
//! 2. **Entity-Cell Buffer**: one `u32` per entity slot naming its cell
//!
//! Both are rebuilt every frame by the spatial grid node. The kernels live
//! in `shaders::spatial`; the coordinate math they implement is
//! `swarm_core::spatial::GridLayout`.

use std::sync::Arc;

use swarm_core::error::{SwarmError, SwarmResult};
use swarm_core::spatial::{GridCell, GridLayout};

use crate::context::GpuContext;

/// Grid and entity-cell buffers
pub struct SpatialGridBuffers {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    layout: GridLayout,
    max_allocation: u64,
    cells: Option<wgpu::Buffer>,
    entity_cells: Option<wgpu::Buffer>,
    entity_capacity: u32,
    generation: u64,
}

impl SpatialGridBuffers {
    pub fn new(context: &GpuContext, layout: GridLayout) -> Self {
        Self {
            device: context.device.clone(),
            queue: context.queue.clone(),
            layout,
            max_allocation: context.max_allocation(),
            cells: None,
            entity_cells: None,
            entity_capacity: 0,
            generation: 0,
        }
    }

    /// (Re)allocate for `entity_capacity` entities, sized from the store
    pub fn allocate(&mut self, entity_capacity: u32) -> SwarmResult<()> {
        let grid_bytes = self.layout.buffer_size();
        let entity_bytes = entity_capacity as u64 * std::mem::size_of::<u32>() as u64;
        for (label, bytes) in [
            ("Grid Cells Buffer", grid_bytes),
            ("Entity Cells Buffer", entity_bytes),
        ] {
            if bytes == 0 || bytes > self.max_allocation {
                tracing::error!("❌ {} of {} bytes cannot be allocated", label, bytes);
                return Err(SwarmError::Allocation {
                    label,
                    requested: bytes,
                    limit: self.max_allocation,
                });
            }
        }

        self.release();
        tracing::info!(
            "🗺️ Spatial grid: {}x{} cells ({} KB), {} entity slots",
            self.layout.resolution(),
            self.layout.resolution(),
            grid_bytes / 1024,
            entity_capacity
        );

        self.cells = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Grid Cells Buffer"),
            size: grid_bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        }));
        self.entity_cells = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Entity Cells Buffer"),
            size: entity_bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        }));
        self.entity_capacity = entity_capacity;
        self.generation += 1;

        self.clear_all_cells()
    }

    fn release(&mut self) {
        if let Some(buffer) = self.cells.take() {
            buffer.destroy();
        }
        if let Some(buffer) = self.entity_cells.take() {
            buffer.destroy();
        }
    }

    /// Reset every cell to an empty count and invalid slots from the host.
    /// The per-frame clear runs on the GPU as part of the grid rebuild.
    pub fn clear_all_cells(&self) -> SwarmResult<()> {
        let cells = self
            .cells
            .as_ref()
            .ok_or_else(|| SwarmError::gpu("Grid cells buffer not created"))?;
        let cleared = vec![GridCell::CLEARED; self.layout.cell_count() as usize];
        self.queue
            .write_buffer(cells, 0, bytemuck::cast_slice(&cleared));
        Ok(())
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn cells_buffer(&self) -> Option<&wgpu::Buffer> {
        self.cells.as_ref()
    }

    pub fn entity_cells_buffer(&self) -> Option<&wgpu::Buffer> {
        self.entity_cells.as_ref()
    }

    pub fn entity_capacity(&self) -> u32 {
        self.entity_capacity
    }

    /// Bumped whenever the buffers are replaced
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
