//! GPU device and queue shared by every component.

use std::sync::Arc;
use std::time::Duration;

use swarm_core::error::{SwarmError, SwarmResult};

/// Storage buffers a single compute kernel may see through the binding table
pub const REQUIRED_STORAGE_BUFFERS_PER_STAGE: u32 = 13;

/// Device handles plus the adapter facts the store and scheduler size against
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub limits: wgpu::Limits,
    pub adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Pick a high-performance adapter and open a device on it
    pub fn new() -> SwarmResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| SwarmError::gpu(format!("No suitable GPU adapter found: {}", e)))?;

        let info = adapter.get_info();
        tracing::info!(
            "🎮 Swarm GPU: {} ({:?}, {:?})",
            info.name,
            info.device_type,
            info.backend
        );

        let adapter_limits = adapter.limits();
        if adapter_limits.max_storage_buffers_per_shader_stage < REQUIRED_STORAGE_BUFFERS_PER_STAGE {
            return Err(SwarmError::gpu(format!(
                "Adapter exposes {} storage buffers per stage, binding table needs {}",
                adapter_limits.max_storage_buffers_per_shader_stage,
                REQUIRED_STORAGE_BUFFERS_PER_STAGE
            )));
        }

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Swarm Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits {
                    max_storage_buffers_per_shader_stage: adapter_limits
                        .max_storage_buffers_per_shader_stage,
                    ..Default::default()
                },
                memory_hints: wgpu::MemoryHints::Performance,
                trace: Default::default(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
            },
        ))
        .map_err(|e| SwarmError::gpu(format!("Failed to create device: {}", e)))?;

        let limits = device.limits();
        tracing::info!(
            "🎮 Max buffer: {} MB, storage binding: {} MB",
            limits.max_buffer_size / 1024 / 1024,
            limits.max_storage_buffer_binding_size / 1024 / 1024
        );

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            limits,
            adapter_info: info,
        })
    }

    /// Largest single buffer the store may create
    pub fn max_allocation(&self) -> u64 {
        self.limits
            .max_buffer_size
            .min(self.limits.max_storage_buffer_binding_size as u64)
    }

    /// Block until submitted work finishes or `timeout` runs out
    pub fn wait_idle(&self, timeout: Duration) {
        let _ = self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: Some(timeout),
        });
    }
}
