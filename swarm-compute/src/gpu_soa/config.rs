//! GPU uniform types
//!
//! Contains GPU-compatible structs that match the WGSL prelude layouts.

use bytemuck::{Pod, Zeroable};
use swarm_core::dispatch::{DispatchChunk, DispatchPlan};
use swarm_core::spatial::GridLayout;

use crate::nodes::FrameContext;

/// Frame/camera uniform at binding 16 (matches `FrameUniforms` in WGSL)
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct FrameUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub time: f32,
    pub delta_time: f32,
    pub entity_count: u32,
    pub frame_index: u32,
    /// 0 = primary, 1 = alternate
    pub write_slot: u32,
    pub _pad: [u32; 3],
}

impl FrameUniforms {
    pub fn new(frame: &FrameContext, view_proj: [[f32; 4]; 4]) -> Self {
        Self {
            view_proj,
            time: frame.time,
            delta_time: frame.delta_time,
            entity_count: frame.entity_count,
            frame_index: frame.sim_frame as u32,
            write_slot: frame.write_slot.index() as u32,
            _pad: [0; 3],
        }
    }
}

/// Per-launch parameter block (matches `DispatchParams` in WGSL)
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct DispatchParams {
    pub item_offset: u32,
    pub item_count: u32,
    pub entity_count: u32,
    pub work_items: u32,
    pub time: f32,
    pub delta_time: f32,
    pub grid_resolution: u32,
    pub cell_size: f32,
    pub world_size: f32,
    pub chunk_index: u32,
    pub _pad: [u32; 2],
}

impl DispatchParams {
    pub fn for_chunk(
        frame: &FrameContext,
        plan: &DispatchPlan,
        chunk: &DispatchChunk,
        grid: &GridLayout,
    ) -> Self {
        Self {
            item_offset: chunk.item_offset,
            item_count: chunk.item_count,
            entity_count: frame.entity_count,
            work_items: plan.work_items,
            time: frame.time,
            delta_time: frame.delta_time,
            grid_resolution: grid.resolution(),
            cell_size: grid.cell_size(),
            world_size: grid.world_size(),
            chunk_index: chunk.index,
            _pad: [0; 2],
        }
    }
}
