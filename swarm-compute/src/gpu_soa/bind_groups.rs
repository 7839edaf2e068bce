//! Binding table
//!
//! Every SoA channel and both grid buffers sit at a fixed binding index
//! (`swarm_core::BindingSlot`) in one bind group, plus the frame/camera
//! uniform at binding 16. Kernels address channels by index only.
//!
//! Two groups exist per stage, one per ping-pong parity, so selecting the
//! right position buffers is a matter of picking a group:
//! - compute groups are keyed by the position buffer being **written**
//! - graphics groups are keyed by the position buffer being **read**

use std::num::NonZeroU64;
use std::sync::Arc;

use swarm_core::error::{SwarmError, SwarmResult};
use swarm_core::frame::PositionSlot;
use swarm_core::soa::{BindingSlot, Channel};
use swarm_core::FRAME_UNIFORM_BINDING;

use super::buffers::SoaBufferStore;
use super::config::FrameUniforms;
use crate::context::GpuContext;
use crate::spatial_gpu::SpatialGridBuffers;

/// Slots exposed to vertex/fragment shaders
pub const GRAPHICS_SLOTS: [BindingSlot; 5] = [
    BindingSlot::Color,
    BindingSlot::Transform,
    BindingSlot::PositionSource,
    BindingSlot::PositionCurrent,
    BindingSlot::PositionTarget,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingStage {
    Compute,
    Graphics,
}

/// Buffer that backs a slot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotSource {
    Channel(Channel),
    GridCells,
    EntityCells,
}

/// Resolve `slot` for `stage`. `position` is the written buffer for compute
/// and the read buffer for graphics.
pub fn slot_source(
    slot: BindingSlot,
    stage: BindingStage,
    position: PositionSlot,
) -> Option<SlotSource> {
    let source = match slot {
        BindingSlot::Velocity => SlotSource::Channel(Channel::Velocity),
        BindingSlot::MovementParams => SlotSource::Channel(Channel::MovementParams),
        BindingSlot::MovementCenter => SlotSource::Channel(Channel::MovementCenter),
        BindingSlot::RuntimeState => SlotSource::Channel(Channel::RuntimeState),
        BindingSlot::Rotation => SlotSource::Channel(Channel::Rotation),
        BindingSlot::Color => SlotSource::Channel(Channel::Color),
        BindingSlot::Transform => SlotSource::Channel(Channel::Transform),
        BindingSlot::PositionSource => match stage {
            BindingStage::Compute => SlotSource::Channel(position.other().channel()),
            BindingStage::Graphics => SlotSource::Channel(position.channel()),
        },
        BindingSlot::PositionDestination => match stage {
            BindingStage::Compute => SlotSource::Channel(position.channel()),
            BindingStage::Graphics => return None,
        },
        BindingSlot::PositionCurrent => SlotSource::Channel(Channel::PositionCurrent),
        BindingSlot::PositionTarget => SlotSource::Channel(Channel::PositionTarget),
        BindingSlot::GridCells => SlotSource::GridCells,
        BindingSlot::EntityCells => SlotSource::EntityCells,
    };
    if stage == BindingStage::Graphics && !GRAPHICS_SLOTS.contains(&slot) {
        return None;
    }
    Some(source)
}

fn is_read_only(slot: BindingSlot, stage: BindingStage) -> bool {
    stage == BindingStage::Graphics || slot == BindingSlot::PositionSource
}

fn resolve<'a>(
    source: SlotSource,
    store: &'a SoaBufferStore,
    grid: &'a SpatialGridBuffers,
) -> Option<&'a wgpu::Buffer> {
    match source {
        SlotSource::Channel(channel) => store.buffer(channel),
        SlotSource::GridCells => grid.cells_buffer(),
        SlotSource::EntityCells => grid.entity_cells_buffer(),
    }
}

/// Generations of the resources a table was built from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundGenerations {
    pub store: u64,
    pub grid: u64,
}

/// Indexed binding table over the store and grid
pub struct BindingTable {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    frame_uniforms: wgpu::Buffer,
    compute_layout: Option<wgpu::BindGroupLayout>,
    graphics_layout: Option<wgpu::BindGroupLayout>,
    compute_groups: Vec<wgpu::BindGroup>,
    graphics_groups: Vec<wgpu::BindGroup>,
    populated: Vec<BindingSlot>,
    bound: Option<BoundGenerations>,
    generation: u64,
}

impl BindingTable {
    /// Allocate the frame uniform and populate the table
    pub fn build(
        context: &GpuContext,
        store: &SoaBufferStore,
        grid: &SpatialGridBuffers,
    ) -> SwarmResult<Self> {
        let frame_uniforms = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Uniforms"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut table = Self {
            device: context.device.clone(),
            queue: context.queue.clone(),
            frame_uniforms,
            compute_layout: None,
            graphics_layout: None,
            compute_groups: Vec::new(),
            graphics_groups: Vec::new(),
            populated: Vec::new(),
            bound: None,
            generation: 0,
        };
        table.populate(store, grid)?;
        Ok(table)
    }

    /// Drop every layout and group, then populate from scratch. Call after
    /// anything that replaces a bound buffer (surface resize, store or
    /// grid reallocation).
    pub fn rebuild(&mut self, store: &SoaBufferStore, grid: &SpatialGridBuffers) -> SwarmResult<()> {
        self.reset();
        self.populate(store, grid)
    }

    /// Drop every group without repopulating. Used when a bound buffer is
    /// gone and no replacement exists; consumers see no groups until the
    /// next successful [`rebuild`](Self::rebuild).
    pub fn invalidate(&mut self) {
        self.reset();
        tracing::warn!("⚠️ Binding table invalidated");
    }

    fn reset(&mut self) {
        self.compute_groups.clear();
        self.graphics_groups.clear();
        self.compute_layout = None;
        self.graphics_layout = None;
        self.populated.clear();
        self.bound = None;
        tracing::debug!("🔄 Binding table reset (generation {})", self.generation);
    }

    fn populate(&mut self, store: &SoaBufferStore, grid: &SpatialGridBuffers) -> SwarmResult<()> {
        if self.compute_layout.is_some() || !self.compute_groups.is_empty() {
            return Err(SwarmError::invalid_state(
                "binding table must be reset before it is populated",
            ));
        }

        let mut populated = Vec::with_capacity(BindingSlot::ASSIGNED.len());
        for slot in BindingSlot::ASSIGNED {
            let bound = [PositionSlot::Primary, PositionSlot::Alternate]
                .into_iter()
                .all(|p| {
                    slot_source(slot, BindingStage::Compute, p)
                        .and_then(|source| resolve(source, store, grid))
                        .is_some()
                });
            if bound {
                populated.push(slot);
            } else {
                tracing::warn!(
                    "⚠️ Binding slot {} ({}) has no buffer, skipping",
                    slot.index(),
                    slot.name()
                );
            }
        }
        let graphics_slots: Vec<BindingSlot> = populated
            .iter()
            .copied()
            .filter(|&s| GRAPHICS_SLOTS.contains(&s))
            .collect();

        let compute_layout = self.create_layout(BindingStage::Compute, &populated);
        let graphics_layout = self.create_layout(BindingStage::Graphics, &graphics_slots);

        for position in [PositionSlot::Primary, PositionSlot::Alternate] {
            let group = self.create_group(
                BindingStage::Compute,
                position,
                &populated,
                &compute_layout,
                store,
                grid,
            )?;
            self.compute_groups.push(group);
        }
        for position in [PositionSlot::Primary, PositionSlot::Alternate] {
            let group = self.create_group(
                BindingStage::Graphics,
                position,
                &graphics_slots,
                &graphics_layout,
                store,
                grid,
            )?;
            self.graphics_groups.push(group);
        }

        self.compute_layout = Some(compute_layout);
        self.graphics_layout = Some(graphics_layout);
        self.bound = Some(BoundGenerations {
            store: store.generation(),
            grid: grid.generation(),
        });
        self.generation += 1;

        tracing::info!(
            "🔗 Binding table generation {}: {}/{} slots bound",
            self.generation,
            populated.len(),
            BindingSlot::ASSIGNED.len()
        );
        self.populated = populated;
        Ok(())
    }

    fn create_layout(&self, stage: BindingStage, slots: &[BindingSlot]) -> wgpu::BindGroupLayout {
        let visibility = match stage {
            BindingStage::Compute => wgpu::ShaderStages::COMPUTE,
            BindingStage::Graphics => wgpu::ShaderStages::VERTEX_FRAGMENT,
        };

        let mut entries: Vec<wgpu::BindGroupLayoutEntry> = slots
            .iter()
            .map(|&slot| wgpu::BindGroupLayoutEntry {
                binding: slot.index(),
                visibility,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage {
                        read_only: is_read_only(slot, stage),
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: FRAME_UNIFORM_BINDING,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: NonZeroU64::new(std::mem::size_of::<FrameUniforms>() as u64),
            },
            count: None,
        });

        self.device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(match stage {
                    BindingStage::Compute => "Binding Table Layout (compute)",
                    BindingStage::Graphics => "Binding Table Layout (graphics)",
                }),
                entries: &entries,
            })
    }

    fn create_group(
        &self,
        stage: BindingStage,
        position: PositionSlot,
        slots: &[BindingSlot],
        layout: &wgpu::BindGroupLayout,
        store: &SoaBufferStore,
        grid: &SpatialGridBuffers,
    ) -> SwarmResult<wgpu::BindGroup> {
        let mut entries = Vec::with_capacity(slots.len() + 1);
        for &slot in slots {
            let buffer = slot_source(slot, stage, position)
                .and_then(|source| resolve(source, store, grid))
                .ok_or_else(|| {
                    SwarmError::stale(format!("slot {} lost its buffer", slot.name()))
                })?;
            entries.push(wgpu::BindGroupEntry {
                binding: slot.index(),
                resource: buffer.as_entire_binding(),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: FRAME_UNIFORM_BINDING,
            resource: self.frame_uniforms.as_entire_binding(),
        });

        let label = format!("Binding Table ({:?}, {:?})", stage, position);
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label.as_str()),
            layout,
            entries: &entries,
        }))
    }

    /// Refuse to dispatch against buffers the table was not built from
    pub fn ensure_current(&self, store_generation: u64, grid_generation: u64) -> SwarmResult<()> {
        let expected = BoundGenerations {
            store: store_generation,
            grid: grid_generation,
        };
        match self.bound {
            Some(bound) if bound == expected => Ok(()),
            Some(bound) => Err(SwarmError::stale(format!(
                "table bound to store/grid generation {}/{}, current is {}/{}",
                bound.store, bound.grid, store_generation, grid_generation
            ))),
            None => Err(SwarmError::stale("binding table is not populated")),
        }
    }

    /// Slots in `required` that have no buffer bound
    pub fn missing_slots(&self, required: &[BindingSlot]) -> Vec<BindingSlot> {
        required
            .iter()
            .copied()
            .filter(|slot| !self.populated.contains(slot))
            .collect()
    }

    pub fn write_frame_uniforms(&self, uniforms: &FrameUniforms) {
        self.queue
            .write_buffer(&self.frame_uniforms, 0, bytemuck::bytes_of(uniforms));
    }

    pub fn compute_layout(&self) -> Option<&wgpu::BindGroupLayout> {
        self.compute_layout.as_ref()
    }

    pub fn graphics_layout(&self) -> Option<&wgpu::BindGroupLayout> {
        self.graphics_layout.as_ref()
    }

    /// Compute group for the frame that writes `write_slot`
    pub fn compute_group(&self, write_slot: PositionSlot) -> Option<&wgpu::BindGroup> {
        self.compute_groups.get(write_slot.index())
    }

    /// Graphics group for the frame that reads `read_slot`
    pub fn graphics_group(&self, read_slot: PositionSlot) -> Option<&wgpu::BindGroup> {
        self.graphics_groups.get(read_slot.index())
    }

    pub fn populated(&self) -> &[BindingSlot] {
        &self.populated
    }

    /// Bumped on every successful populate; pipeline layouts key on it
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
