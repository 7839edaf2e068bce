//! # Swarm Compute
//!
//! `wgpu` implementation of the GPU-resident swarm.
//!
//! - **SoA store**: one storage buffer per channel, fixed capacity, append-only
//! - **Binding table**: every channel at a fixed index in one bind group,
//!   one group per ping-pong parity
//! - **Dispatch scheduler**: chunked, paced launches with per-launch
//!   parameter blocks
//! - **Frame graph**: movement, physics and spatial grid nodes coupled only
//!   through declared buffer access
//!
//! ## Device Selection
//!
//! Set `SWARM_FORCE_CPU` to make [`gpu_available`] report no adapter, which
//! lets GPU-dependent callers take their fallback path on machines that do
//! have one.

pub mod context;
pub mod gpu_soa;
pub mod nodes;
pub mod shaders;
pub mod spatial_gpu;

use std::sync::Arc;

pub use context::GpuContext;
pub use gpu_soa::pipelines::{PipelineCache, PipelineKey, ShaderPipelineCache};
pub use gpu_soa::{FrameReport, GpuSoaSimulation};
pub use nodes::{FrameContext, FrameGraph, NodeKind, NodeOutcome, SkipReason};
pub use spatial_gpu::SpatialGridBuffers;

use swarm_core::config::SwarmConfig;
use swarm_core::error::SwarmResult;
use swarm_core::health::FrameTimeMonitor;

/// Open the default device and build a simulation whose pacing follows
/// measured frame times
pub fn create_simulation(config: &SwarmConfig) -> SwarmResult<GpuSoaSimulation> {
    let context = GpuContext::new()?;
    let monitor = Arc::new(FrameTimeMonitor::new(config.health.clone()));
    let mut simulation = GpuSoaSimulation::new(
        context,
        config.clone(),
        monitor.clone(),
        Box::new(ShaderPipelineCache::new()),
    )?;
    simulation.attach_frame_monitor(monitor);
    Ok(simulation)
}

/// Check if a GPU adapter is available on this system
pub fn gpu_available() -> bool {
    if std::env::var("SWARM_FORCE_CPU").is_ok() {
        return false;
    }

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
    let adapters = pollster::block_on(instance.enumerate_adapters(wgpu::Backends::all()));
    !adapters.is_empty()
}

/// Describe every adapter wgpu can see
pub fn device_info() -> Vec<DeviceInfo> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
    let adapters = pollster::block_on(instance.enumerate_adapters(wgpu::Backends::all()));

    adapters
        .into_iter()
        .map(|adapter| {
            let info = adapter.get_info();
            let limits = adapter.limits();
            DeviceInfo {
                name: info.name,
                device_type: format!("{:?}", info.device_type),
                backend: format!("{:?}", info.backend),
                storage_buffers_per_stage: limits.max_storage_buffers_per_shader_stage,
                supports_binding_table: limits.max_storage_buffers_per_shader_stage
                    >= context::REQUIRED_STORAGE_BUFFERS_PER_STAGE,
            }
        })
        .collect()
}

/// Information about a compute device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub device_type: String,
    pub backend: String,
    pub storage_buffers_per_stage: u32,
    pub supports_binding_table: bool,
}
