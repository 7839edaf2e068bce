//! Spatial grid kernels.
//!
//! `clear_cells` and `populate_cells` share one launch sequence sized for the
//! larger of the two domains; each entry point discards invocations past
//! its own range. The clear runs to completion (pass boundary) before the
//! first insertion.
//!
//! Insertion claims a slot with a compare-exchange loop that never moves
//! the count past `MAX_PER_CELL`, so a full cell keeps its count at 64 and
//! later entities are dropped.

//!
//! NaN coordinates are detected from their bit pattern and land on cell 0
//! of that axis, matching `GridLayout::world_to_cell_coords`.

pub const SPATIAL_GRID_SHADER: &str = r#"
fn world_to_cell(p: vec2<f32>) -> vec2<u32> {
    let size = params.world_size;
    let magnitude = bitcast<vec2<u32>>(p) & vec2<u32>(0x7fffffffu);
    let is_nan = magnitude > vec2<u32>(0x7f800000u);
    let q = select(p, vec2<f32>(-size * 0.5), is_nan);
    let normalized = clamp(q + vec2<f32>(size * 0.5), vec2<f32>(0.0), vec2<f32>(size));
    let cell = vec2<u32>(normalized / params.cell_size);
    return min(cell, vec2<u32>(params.grid_resolution - 1u));
}

@compute @workgroup_size(WORKGROUP_SIZE)
fn clear_cells(@builtin(global_invocation_id) global_id: vec3<u32>) {
    if global_id.x >= params.item_count {
        return;
    }
    let cell = params.item_offset + global_id.x;
    if cell >= params.grid_resolution * params.grid_resolution {
        return;
    }

    atomicStore(&grid_cells[cell].count, 0u);
    for (var i = 0u; i < MAX_PER_CELL; i = i + 1u) {
        grid_cells[cell].entities[i] = INVALID_ENTITY;
    }
}

@compute @workgroup_size(WORKGROUP_SIZE)
fn populate_cells(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let idx = entity_index(global_id.x);
    if idx == INVALID_ENTITY {
        return;
    }

    let coords = world_to_cell(position_dst[idx].xy);
    let cell = coords.y * params.grid_resolution + coords.x;
    entity_cells[idx] = cell;

    var slot = atomicLoad(&grid_cells[cell].count);
    loop {
        if slot >= MAX_PER_CELL {
            break;
        }
        let claim = atomicCompareExchangeWeak(&grid_cells[cell].count, slot, slot + 1u);
        if claim.exchanged {
            grid_cells[cell].entities[slot] = idx;
            break;
        }
        slot = claim.old_value;
    }
}
"#;
