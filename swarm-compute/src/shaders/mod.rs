//! WGSL kernels for the swarm compute nodes
//!
//! Every kernel is compiled together with the binding table prelude, which
//! declares the channel structs and their fixed binding indices:
//! - `movement`: stagger timers and pattern-driven velocity
//! - `physics`: position integration, rotation and transform
//! - `spatial`: grid clear and bounded insertion

pub mod movement;
pub mod physics;
pub mod prelude;
pub mod spatial;

pub use movement::MOVEMENT_SHADER;
pub use physics::PHYSICS_SHADER;
pub use prelude::BINDING_TABLE_PRELUDE;
pub use spatial::SPATIAL_GRID_SHADER;

/// Prepend the binding table prelude with the workgroup size baked in
pub fn compose(kernel: &str, workgroup_size: u32) -> String {
    let prelude = BINDING_TABLE_PRELUDE.replace(
        "// [WORKGROUP_SIZE]",
        &format!("const WORKGROUP_SIZE: u32 = {}u;", workgroup_size),
    );
    let mut source = String::with_capacity(prelude.len() + kernel.len() + 1);
    source.push_str(&prelude);
    source.push('\n');
    source.push_str(kernel);
    source
}
