//! Physics kernel: integrates position from the source buffer into the
//! destination buffer, advances rotation and rewrites the transform with
//! the new translation. Scale is recovered from the basis column lengths.

pub const PHYSICS_SHADER: &str = r#"
@compute @workgroup_size(WORKGROUP_SIZE)
fn main(@builtin(global_invocation_id) global_id: vec3<u32>) {
    let idx = entity_index(global_id.x);
    if idx == INVALID_ENTITY {
        return;
    }

    let dt = params.delta_time;
    let src = position_src[idx];
    let pos = src.xyz + velocities[idx].value * dt;
    position_dst[idx] = vec4<f32>(pos, src.w);

    var rot = rotations[idx];
    rot.angle = rot.angle + rot.angular_velocity * dt;
    rot.angular_velocity = rot.angular_velocity * max(0.0, 1.0 - rot.angular_damping * dt);
    rotations[idx] = rot;

    let m = transforms[idx];
    let sx = length(m[0].xyz);
    let sy = length(m[1].xyz);
    let sz = length(m[2].xyz);
    let c = cos(rot.angle);
    let s = sin(rot.angle);
    transforms[idx] = mat4x4<f32>(
        vec4<f32>(c * sx, s * sx, 0.0, 0.0),
        vec4<f32>(-s * sy, c * sy, 0.0, 0.0),
        vec4<f32>(0.0, 0.0, sz, 0.0),
        vec4<f32>(pos, 1.0),
    );
}
"#;
