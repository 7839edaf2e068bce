//! # Swarm Core
//!
//! GPU-agnostic building blocks for a GPU-resident entity simulation.
//!
//! This crate provides:
//! - **SoA layouts**: one `#[repr(C)]` element type per simulation channel
//! - **Staging**: CPU-side batches appended into a fixed-capacity arena
//! - **Spatial grid**: uniform grid math and a host-side model of the GPU grid
//! - **Dispatch planning**: workgroup accounting, chunking and pacing
//! - **Frame bookkeeping**: ping-pong parity and per-frame writer ownership
//!
//! ## Memory Layout
//!
//! All channel types use `#[repr(C)]` with explicit padding so they can be
//! copied into GPU storage buffers via `bytemuck` and read back verbatim
//! by the WGSL kernels in `swarm-compute`.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod health;
pub mod soa;
pub mod spatial;
pub mod stagger;
pub mod traits;

// Re-export main types at crate root
pub use config::SwarmConfig;
pub use dispatch::{DispatchChunk, DispatchPlan, PacingDecision};
pub use error::{SwarmError, SwarmResult};
pub use frame::{PingPong, PositionSlot, Resource, Writer, WriterLedger};
pub use soa::{BindingSlot, Channel, EntityDescriptor, EntityTransform, SlotArena, StagingBatch};
pub use spatial::{GridCell, GridLayout};
pub use traits::*;

/// Default entity capacity of the buffer store
pub const MAX_ENTITIES: u32 = 131_072;

/// Cells per grid axis
pub const GRID_RESOLUTION: u32 = 128;

/// Side length of the square simulated world, centred on the origin
pub const WORLD_SIZE: f32 = 2000.0;

/// Entity slots reserved per grid cell
pub const MAX_ENTITIES_PER_CELL: usize = 64;

/// Hardware limit on workgroups along one dispatch dimension
pub const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65_535;

/// Fixed channel slots in the binding table
pub const BINDING_SLOT_COUNT: u32 = 16;

/// Binding index of the frame/camera uniform
pub const FRAME_UNIFORM_BINDING: u32 = 16;

/// Sentinel stored in empty grid slots
pub const INVALID_ENTITY: u32 = u32::MAX;
