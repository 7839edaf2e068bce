//! Compute pipeline cache
//!
//! The scheduler does not own pipeline objects; it asks a [`PipelineCache`]
//! for one per (kernel, entry point, workgroup size, layout generation).
//! A new binding table generation means new bind group layouts, so stale
//! entries are evicted when the generation moves on.

use std::collections::HashMap;

use swarm_core::error::SwarmResult;

/// Identity of a compute pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub kernel: &'static str,
    pub entry_point: &'static str,
    pub workgroup_size: u32,
    pub layout_generation: u64,
}

/// Everything needed to build the pipeline behind a key
pub struct PipelineRequest<'a> {
    pub key: PipelineKey,
    /// Complete WGSL module (prelude included)
    pub source: &'a str,
    /// Bind group layouts in group order
    pub layouts: &'a [&'a wgpu::BindGroupLayout],
}

/// Pipeline object cache consulted by the dispatch scheduler
pub trait PipelineCache: Send {
    /// Make sure a pipeline exists for `request.key`
    fn prepare(&mut self, device: &wgpu::Device, request: &PipelineRequest<'_>) -> SwarmResult<()>;

    /// Pipeline previously prepared for `key`
    fn get(&self, key: &PipelineKey) -> Option<&wgpu::ComputePipeline>;

    /// Drop pipelines built against an older layout generation
    fn evict_stale(&mut self, _current_generation: u64) {}
}

/// Default cache: compiles on first use, keeps pipelines until evicted
#[derive(Default)]
pub struct ShaderPipelineCache {
    pipelines: HashMap<PipelineKey, wgpu::ComputePipeline>,
}

impl ShaderPipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

impl PipelineCache for ShaderPipelineCache {
    fn prepare(&mut self, device: &wgpu::Device, request: &PipelineRequest<'_>) -> SwarmResult<()> {
        if self.pipelines.contains_key(&request.key) {
            return Ok(());
        }

        let key = request.key;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(key.kernel),
            source: wgpu::ShaderSource::Wgsl(request.source.into()),
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(key.kernel),
            bind_group_layouts: request.layouts,
            immediate_size: 0,
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(key.entry_point),
            layout: Some(&layout),
            module: &shader,
            entry_point: Some(key.entry_point),
            compilation_options: Default::default(),
            cache: None,
        });

        tracing::debug!(
            "🔧 Compiled {}::{} (workgroup {}, layout generation {})",
            key.kernel,
            key.entry_point,
            key.workgroup_size,
            key.layout_generation
        );
        self.pipelines.insert(key, pipeline);
        Ok(())
    }

    fn get(&self, key: &PipelineKey) -> Option<&wgpu::ComputePipeline> {
        self.pipelines.get(key)
    }

    fn evict_stale(&mut self, current_generation: u64) {
        let before = self.pipelines.len();
        self.pipelines
            .retain(|key, _| key.layout_generation == current_generation);
        let evicted = before - self.pipelines.len();
        if evicted > 0 {
            tracing::debug!("🧹 Evicted {} pipelines from older layouts", evicted);
        }
    }
}
