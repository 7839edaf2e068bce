//! Movement kernel.
//!
//! Runs the stagger countdown and steers each active entity toward the
//! point its pattern puts it at: an orbit of radius `amplitude` around the
//! movement centre. `damping` blends in the previous velocity.

pub const MOVEMENT_SHADER: &str = r#"
@compute @workgroup_size(WORKGROUP_SIZE)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let idx = entity_index(global_id.x);
    if idx == INVALID_ENTITY {
        return;
    }

    var rs = runtime[idx];
    let pattern = movement[idx];
    var vel = velocities[idx];

    if rs.initialized == 0u {
        rs.initialized = 1u;
        rs.accumulated_time = pattern.time_offset;
        if rs.stagger_timer > 0.0 {
            rs.phase = PHASE_STAGGERED;
        } else {
            rs.phase = PHASE_ACTIVE;
        }
    }

    if rs.phase == PHASE_STAGGERED {
        rs.stagger_timer = rs.stagger_timer - params.delta_time;
        if rs.stagger_timer <= 0.0 {
            rs.stagger_timer = 0.0;
            rs.phase = PHASE_ACTIVE;
        }
        vel.value = vec3<f32>(0.0, 0.0, 0.0);
    } else {
        rs.accumulated_time = rs.accumulated_time + params.delta_time;
        let angle = rs.accumulated_time * pattern.frequency + pattern.phase;
        let goal = centers[idx].center + vec3<f32>(cos(angle), sin(angle), 0.0) * pattern.amplitude;
        let here = position_src[idx].xyz;
        let steer = (goal - here) * max(pattern.frequency, 0.0);
        let keep = clamp(vel.damping, 0.0, 1.0);
        vel.value = mix(steer, vel.value, keep);
    }

    runtime[idx] = rs;
    velocities[idx] = vel;
}
"#;
