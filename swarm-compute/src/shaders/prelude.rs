//! Binding table declarations shared by every kernel.
//!
//! Struct layouts mirror `swarm_core::soa`; binding indices mirror
//! `swarm_core::BindingSlot`. Storage access must match the compute layout
//! built in `gpu_soa::bind_groups`: everything is `read_write` except the
//! position source, which may alias the buffer graphics is reading.

pub const BINDING_TABLE_PRELUDE: &str = r#"
// [WORKGROUP_SIZE]
const MAX_PER_CELL: u32 = 64u;
const INVALID_ENTITY: u32 = 0xffffffffu;

const PHASE_PENDING: u32 = 0u;
const PHASE_STAGGERED: u32 = 1u;
const PHASE_ACTIVE: u32 = 2u;

struct Velocity {
    value: vec3<f32>,
    damping: f32,
}

struct MovementParams {
    amplitude: f32,
    frequency: f32,
    phase: f32,
    time_offset: f32,
}

struct MovementCenter {
    center: vec3<f32>,
    _pad: f32,
}

struct RuntimeState {
    accumulated_time: f32,
    initialized: u32,
    stagger_timer: f32,
    phase: u32,
}

struct Rotation {
    angle: f32,
    angular_velocity: f32,
    angular_damping: f32,
    _pad: f32,
}

struct GridCell {
    count: atomic<u32>,
    entities: array<u32, 64>,
    _pad: array<u32, 3>,
}

struct FrameUniforms {
    view_proj: mat4x4<f32>,
    time: f32,
    delta_time: f32,
    entity_count: u32,
    frame_index: u32,
    write_slot: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

struct DispatchParams {
    item_offset: u32,
    item_count: u32,
    entity_count: u32,
    work_items: u32,
    time: f32,
    delta_time: f32,
    grid_resolution: u32,
    cell_size: f32,
    world_size: f32,
    chunk_index: u32,
    _pad0: u32,
    _pad1: u32,
}

@group(0) @binding(0) var<storage, read_write> velocities: array<Velocity>;
@group(0) @binding(1) var<storage, read_write> movement: array<MovementParams>;
@group(0) @binding(2) var<storage, read_write> centers: array<MovementCenter>;
@group(0) @binding(3) var<storage, read_write> runtime: array<RuntimeState>;
@group(0) @binding(4) var<storage, read_write> rotations: array<Rotation>;
@group(0) @binding(5) var<storage, read_write> colors: array<vec4<f32>>;
@group(0) @binding(6) var<storage, read_write> transforms: array<mat4x4<f32>>;
@group(0) @binding(7) var<storage, read> position_src: array<vec4<f32>>;
@group(0) @binding(8) var<storage, read_write> position_dst: array<vec4<f32>>;
@group(0) @binding(9) var<storage, read_write> position_current: array<vec4<f32>>;
@group(0) @binding(10) var<storage, read_write> position_target: array<vec4<f32>>;
@group(0) @binding(11) var<storage, read_write> grid_cells: array<GridCell>;
@group(0) @binding(12) var<storage, read_write> entity_cells: array<u32>;
@group(0) @binding(16) var<uniform> frame: FrameUniforms;

@group(1) @binding(0) var<uniform> params: DispatchParams;

// Entity index for this invocation, or INVALID_ENTITY past the chunk or
// the active range
fn entity_index(local: u32) -> u32 {
    if local >= params.item_count {
        return INVALID_ENTITY;
    }
    let index = params.item_offset + local;
    if index >= params.entity_count {
        return INVALID_ENTITY;
    }
    return index;
}
"#;
