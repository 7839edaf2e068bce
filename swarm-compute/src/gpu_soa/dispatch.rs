//! Dispatch scheduler
//!
//! Nodes hand their workload to the scheduler once per frame. The
//! scheduler plans it under the frame's pacing limits, turns the plan into
//! a [`DispatchProgram`] and, once every node has been heard, records all
//! programs into one command encoder.
//!
//! ## Barriers
//!
//! A barrier is realised by closing the compute pass: storage writes of
//! one pass are visible to the next. Chunks of one kernel share a pass
//! unless the kernel needs ordering between chunks (the grid rebuild).
//! Every program ends with the compute-to-graphics barrier.
//!
//! ## Parameter Blocks
//!
//! Every launch gets its own `DispatchParams` block in a dynamic-offset
//! uniform ring (group 1). All blocks of a frame are written with a single
//! queue write before the encoder is submitted.

use std::num::NonZeroU64;
use std::sync::Arc;

use swarm_core::config::{DispatchConfig, SwarmConfig};
use swarm_core::dispatch::{pace, DispatchPlan, PacingDecision};
use swarm_core::error::{SwarmError, SwarmResult};
use swarm_core::frame::PositionSlot;
use swarm_core::spatial::GridLayout;
use swarm_core::traits::{FrameStats, GpuHealthOracle};

use super::bind_groups::BindingTable;
use super::config::DispatchParams;
use super::pipelines::{PipelineCache, PipelineRequest};
use crate::context::GpuContext;
use crate::nodes::{FrameContext, NodeKind};
use crate::shaders;

const INITIAL_PARAM_BLOCKS: u32 = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BarrierKind {
    /// Later chunks read what earlier chunks wrote
    BetweenChunks,
    /// Next entry point of the same kernel depends on the previous one
    BetweenPhases,
    /// Graphics may read what compute wrote
    ComputeToGraphics,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchStep {
    BeginPass,
    Dispatch {
        /// Index into the node's entry points
        phase: usize,
        workgroups: u32,
        /// Index into the program's parameter blocks
        param_block: u32,
    },
    EndPass,
    Barrier(BarrierKind),
}

/// Ordered launches of one node for one frame
#[derive(Clone, Debug)]
pub struct DispatchProgram {
    pub kind: NodeKind,
    pub plan: DispatchPlan,
    pub steps: Vec<DispatchStep>,
    pub params: Vec<DispatchParams>,
}

/// Expand a plan into passes, launches and barriers
pub fn build_program(
    kind: NodeKind,
    frame: &FrameContext,
    plan: &DispatchPlan,
    grid: &GridLayout,
) -> DispatchProgram {
    let chunks: Vec<_> = plan.chunks().collect();
    let phases = kind.entry_points().len();
    let chunk_barriers = kind.requires_chunk_barriers();

    let mut steps = vec![DispatchStep::BeginPass];
    let mut params = Vec::with_capacity(chunks.len() * phases);

    for phase in 0..phases {
        if phase > 0 {
            steps.push(DispatchStep::EndPass);
            steps.push(DispatchStep::Barrier(BarrierKind::BetweenPhases));
            steps.push(DispatchStep::BeginPass);
        }
        for chunk in &chunks {
            if chunk.index > 0 && chunk_barriers {
                steps.push(DispatchStep::EndPass);
                steps.push(DispatchStep::Barrier(BarrierKind::BetweenChunks));
                steps.push(DispatchStep::BeginPass);
            }
            steps.push(DispatchStep::Dispatch {
                phase,
                workgroups: chunk.workgroups,
                param_block: params.len() as u32,
            });
            params.push(kind.dispatch_params(frame, plan, chunk, grid));
        }
    }

    steps.push(DispatchStep::EndPass);
    steps.push(DispatchStep::Barrier(BarrierKind::ComputeToGraphics));

    DispatchProgram {
        kind,
        plan: *plan,
        steps,
        params,
    }
}

/// Counts of what one program recorded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EncodeCounts {
    pub passes: u32,
    pub dispatches: u32,
    pub barriers: u32,
}

fn encode_program(
    encoder: &mut wgpu::CommandEncoder,
    program: &DispatchProgram,
    pipelines: &[&wgpu::ComputePipeline],
    table_group: &wgpu::BindGroup,
    ring: &ParamRing,
    first_block: u32,
) -> SwarmResult<EncodeCounts> {
    let mut counts = EncodeCounts::default();
    let mut steps = program.steps.iter();

    while let Some(step) = steps.next() {
        match step {
            DispatchStep::BeginPass => {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(program.kind.name()),
                    timestamp_writes: None,
                });
                pass.set_bind_group(0, table_group, &[]);
                counts.passes += 1;

                let mut bound_phase = None;
                loop {
                    match steps.next() {
                        Some(DispatchStep::Dispatch {
                            phase,
                            workgroups,
                            param_block,
                        }) => {
                            if bound_phase != Some(*phase) {
                                let pipeline = pipelines.get(*phase).ok_or_else(|| {
                                    SwarmError::invalid_state(format!(
                                        "{} has no pipeline for phase {}",
                                        program.kind.name(),
                                        phase
                                    ))
                                })?;
                                pass.set_pipeline(pipeline);
                                bound_phase = Some(*phase);
                            }
                            pass.set_bind_group(
                                1,
                                ring.bind_group(),
                                &[ring.offset(first_block + param_block)],
                            );
                            pass.dispatch_workgroups(*workgroups, 1, 1);
                            counts.dispatches += 1;
                        }
                        Some(DispatchStep::EndPass) | None => break,
                        Some(other) => {
                            return Err(SwarmError::invalid_state(format!(
                                "{:?} inside an open compute pass",
                                other
                            )))
                        }
                    }
                }
            }
            DispatchStep::Barrier(kind) => {
                counts.barriers += 1;
                tracing::trace!("{} barrier: {:?}", program.kind.name(), kind);
            }
            DispatchStep::Dispatch { .. } | DispatchStep::EndPass => {
                return Err(SwarmError::invalid_state(format!(
                    "{:?} outside of a compute pass",
                    step
                )));
            }
        }
    }

    Ok(counts)
}

/// Dynamic-offset uniform ring of per-launch parameter blocks
pub struct ParamRing {
    device: Arc<wgpu::Device>,
    layout: wgpu::BindGroupLayout,
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    stride: u64,
    capacity: u32,
    max_size: u64,
}

impl ParamRing {
    pub fn new(context: &GpuContext, initial_blocks: u32) -> SwarmResult<Self> {
        let device = context.device.clone();
        let block_size = std::mem::size_of::<DispatchParams>() as u64;
        let stride = block_size.next_multiple_of(
            (context.limits.min_uniform_buffer_offset_alignment as u64).max(1),
        );

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Dispatch Params Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(block_size),
                },
                count: None,
            }],
        });

        let capacity = initial_blocks.max(1);
        let max_size = context.limits.max_buffer_size;
        let (buffer, bind_group) = Self::allocate(&device, &layout, stride, capacity, max_size)?;

        Ok(Self {
            device,
            layout,
            buffer,
            bind_group,
            stride,
            capacity,
            max_size,
        })
    }

    fn allocate(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        stride: u64,
        blocks: u32,
        max_size: u64,
    ) -> SwarmResult<(wgpu::Buffer, wgpu::BindGroup)> {
        let size = stride * blocks as u64;
        if size > max_size {
            return Err(SwarmError::Allocation {
                label: "Dispatch Params Ring",
                requested: size,
                limit: max_size,
            });
        }

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Dispatch Params Ring"),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Dispatch Params"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: NonZeroU64::new(std::mem::size_of::<DispatchParams>() as u64),
                }),
            }],
        });
        Ok((buffer, bind_group))
    }

    /// Grow (never shrink) so `blocks` parameter blocks fit
    pub fn ensure_capacity(&mut self, blocks: u32) -> SwarmResult<()> {
        if blocks <= self.capacity {
            return Ok(());
        }
        let capacity = blocks.next_power_of_two();
        let (buffer, bind_group) =
            Self::allocate(&self.device, &self.layout, self.stride, capacity, self.max_size)?;
        self.buffer.destroy();
        self.buffer = buffer;
        self.bind_group = bind_group;
        tracing::debug!("📈 Dispatch params ring grown to {} blocks", capacity);
        self.capacity = capacity;
        Ok(())
    }

    /// Write `params` as consecutive blocks starting at block 0
    pub fn write(&self, queue: &wgpu::Queue, params: &[DispatchParams]) {
        if params.is_empty() {
            return;
        }
        let stride = self.stride as usize;
        let mut bytes = vec![0u8; params.len() * stride];
        for (i, block) in params.iter().enumerate() {
            let raw = bytemuck::bytes_of(block);
            bytes[i * stride..i * stride + raw.len()].copy_from_slice(raw);
        }
        queue.write_buffer(&self.buffer, 0, &bytes);
    }

    pub fn layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }

    pub fn offset(&self, block: u32) -> wgpu::DynamicOffset {
        (block as u64 * self.stride) as wgpu::DynamicOffset
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// What [`DispatchScheduler::record`] put into the encoder
#[derive(Clone, Debug, Default)]
pub struct RecordedFrame {
    pub recorded: Vec<NodeKind>,
    pub skipped: Vec<NodeKind>,
    pub counts: EncodeCounts,
}

impl RecordedFrame {
    pub fn contains(&self, kind: NodeKind) -> bool {
        self.recorded.contains(&kind)
    }
}

/// Chunked, paced compute dispatch
pub struct DispatchScheduler {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    settings: DispatchConfig,
    grid: GridLayout,
    oracle: Arc<dyn GpuHealthOracle>,
    pipelines: Box<dyn PipelineCache>,
    ring: ParamRing,
    pacing: PacingDecision,
    pending: Vec<DispatchProgram>,
    layout_generation: u64,
    stats: FrameStats,
}

impl DispatchScheduler {
    pub fn new(
        context: &GpuContext,
        config: &SwarmConfig,
        oracle: Arc<dyn GpuHealthOracle>,
        pipelines: Box<dyn PipelineCache>,
    ) -> SwarmResult<Self> {
        let grid = GridLayout::from_config(&config.grid)?;
        Ok(Self {
            device: context.device.clone(),
            queue: context.queue.clone(),
            settings: config.dispatch.clone(),
            grid,
            oracle,
            pipelines,
            ring: ParamRing::new(context, INITIAL_PARAM_BLOCKS)?,
            pacing: PacingDecision::nominal(&config.dispatch),
            pending: Vec::new(),
            layout_generation: 0,
            stats: FrameStats::default(),
        })
    }

    /// Consult the health oracle and drop anything left from the last frame
    pub fn begin_frame(&mut self) -> PacingDecision {
        if !self.pending.is_empty() {
            tracing::warn!(
                "⚠️ {} scheduled programs were never recorded",
                self.pending.len()
            );
            self.pending.clear();
        }

        let pacing = pace(self.oracle.as_ref(), &self.settings);
        if pacing.degraded {
            self.stats.degraded_frames += 1;
            if !self.pacing.degraded {
                tracing::warn!(
                    "⚠️ GPU unhealthy: chunks capped at {} workgroups",
                    pacing.max_workgroups_per_chunk
                );
            }
        } else if self.pacing.degraded {
            tracing::info!("✅ GPU healthy again, nominal dispatch restored");
        }
        self.pacing = pacing;
        pacing
    }

    /// Plan `kind` for this frame. A plan over the workgroup limit is
    /// rejected and nothing is scheduled.
    pub fn schedule(&mut self, kind: NodeKind, frame: &FrameContext) -> SwarmResult<DispatchPlan> {
        if self.pending.iter().any(|p| p.kind == kind) {
            return Err(SwarmError::invalid_state(format!(
                "{} already scheduled this frame",
                kind.name()
            )));
        }

        let plan = kind
            .plan_dispatch(frame, &self.grid, self.settings.threads_per_group, &self.pacing)
            .map_err(|e| {
                if let SwarmError::WorkgroupLimit { total, limit } = &e {
                    self.stats.rejected_plans += 1;
                    tracing::warn!(
                        "⚠️ {} needs {} workgroups (limit {}), skipped this frame",
                        kind.name(),
                        total,
                        limit
                    );
                }
                e
            })?;

        self.pending
            .push(build_program(kind, frame, &plan, &self.grid));
        Ok(plan)
    }

    /// Record every scheduled program into `encoder`
    pub fn record(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        bindings: &BindingTable,
        write_slot: PositionSlot,
    ) -> SwarmResult<RecordedFrame> {
        let pending = std::mem::take(&mut self.pending);
        let mut frame = RecordedFrame::default();
        if pending.is_empty() {
            return Ok(frame);
        }

        let generation = bindings.generation();
        if generation != self.layout_generation {
            self.pipelines.evict_stale(generation);
            self.layout_generation = generation;
        }

        let table_layout = bindings
            .compute_layout()
            .ok_or_else(|| SwarmError::stale("compute layout not created"))?;
        let table_group = bindings
            .compute_group(write_slot)
            .ok_or_else(|| SwarmError::stale("compute bind group not created"))?;
        let threads = self.settings.threads_per_group;

        let mut runnable = Vec::with_capacity(pending.len());
        for program in pending {
            let kind = program.kind;
            let missing = bindings.missing_slots(kind.required_slots());
            if !missing.is_empty() {
                tracing::error!(
                    "❌ {} skipped, unbound slots: {:?}",
                    kind.name(),
                    missing
                );
                self.stats.skipped_nodes += 1;
                frame.skipped.push(kind);
                continue;
            }

            let source = shaders::compose(kind.kernel_source(), threads);
            let layouts = [table_layout, self.ring.layout()];
            for key in kind.pipeline_keys(threads, generation) {
                self.pipelines.prepare(
                    &self.device,
                    &PipelineRequest {
                        key,
                        source: &source,
                        layouts: &layouts,
                    },
                )?;
            }
            runnable.push(program);
        }

        let blocks: Vec<DispatchParams> = runnable
            .iter()
            .flat_map(|p| p.params.iter().copied())
            .collect();
        self.ring.ensure_capacity(blocks.len() as u32)?;
        self.ring.write(&self.queue, &blocks);

        let mut first_block = 0;
        for program in &runnable {
            let keys = program.kind.pipeline_keys(threads, generation);
            let pipelines = keys
                .iter()
                .map(|key| {
                    self.pipelines.get(key).ok_or_else(|| {
                        SwarmError::invalid_state(format!(
                            "pipeline {}::{} missing after prepare",
                            key.kernel, key.entry_point
                        ))
                    })
                })
                .collect::<SwarmResult<Vec<_>>>()?;

            let counts =
                encode_program(encoder, program, &pipelines, table_group, &self.ring, first_block)?;
            first_block += program.params.len() as u32;

            frame.counts.passes += counts.passes;
            frame.counts.dispatches += counts.dispatches;
            frame.counts.barriers += counts.barriers;
            frame.recorded.push(program.kind);
        }

        self.stats.passes += frame.counts.passes as u64;
        self.stats.dispatches += frame.counts.dispatches as u64;
        self.stats.barriers += frame.counts.barriers as u64;
        Ok(frame)
    }

    /// Count a node that never reached the scheduler
    pub fn note_skipped(&mut self) {
        self.stats.skipped_nodes += 1;
    }

    pub fn pacing(&self) -> PacingDecision {
        self.pacing
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn grid_layout(&self) -> &GridLayout {
        &self.grid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_core::dispatch::plan_dispatch;

    fn frame(entity_count: u32) -> FrameContext {
        FrameContext {
            submission: 0,
            sim_frame: 0,
            write_slot: PositionSlot::Primary,
            entity_count,
            time: 1.0,
            delta_time: 0.016,
            store_generation: 1,
            grid_generation: 1,
        }
    }

    fn dispatches(program: &DispatchProgram) -> Vec<(usize, u32, u32)> {
        program
            .steps
            .iter()
            .filter_map(|s| match s {
                DispatchStep::Dispatch {
                    phase,
                    workgroups,
                    param_block,
                } => Some((*phase, *workgroups, *param_block)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_launch_program() {
        let grid = GridLayout::default();
        let plan = plan_dispatch(1000, 64, 4096, false).unwrap();
        let program = build_program(NodeKind::Movement, &frame(1000), &plan, &grid);

        assert_eq!(
            program.steps,
            vec![
                DispatchStep::BeginPass,
                DispatchStep::Dispatch {
                    phase: 0,
                    workgroups: 16,
                    param_block: 0
                },
                DispatchStep::EndPass,
                DispatchStep::Barrier(BarrierKind::ComputeToGraphics),
            ]
        );
        assert_eq!(program.params.len(), 1);
        assert_eq!(program.params[0].item_count, 1000);
        assert_eq!(program.params[0].entity_count, 1000);
    }

    #[test]
    fn test_chunks_share_a_pass_without_barriers() {
        let grid = GridLayout::default();
        let plan = plan_dispatch(10_000, 64, 64, false).unwrap();
        let program = build_program(NodeKind::Physics, &frame(10_000), &plan, &grid);

        let barriers = program
            .steps
            .iter()
            .filter(|s| matches!(s, DispatchStep::Barrier(_)))
            .count();
        assert_eq!(barriers, 1);
        assert_eq!(
            dispatches(&program),
            vec![(0, 64, 0), (0, 64, 1), (0, 29, 2)]
        );

        let offsets: Vec<u32> = program.params.iter().map(|p| p.item_offset).collect();
        assert_eq!(offsets, vec![0, 4096, 8192]);
        assert_eq!(program.params[2].item_count, 10_000 - 8192);
    }

    #[test]
    fn test_grid_rebuild_orders_chunks_and_phases() {
        let grid = GridLayout::default();
        let plan = plan_dispatch(16_384, 64, 128, false).unwrap();
        let program = build_program(NodeKind::SpatialGrid, &frame(100), &plan, &grid);

        use BarrierKind::*;
        use DispatchStep::*;
        assert_eq!(
            program.steps,
            vec![
                BeginPass,
                Dispatch { phase: 0, workgroups: 128, param_block: 0 },
                EndPass,
                Barrier(BetweenChunks),
                BeginPass,
                Dispatch { phase: 0, workgroups: 128, param_block: 1 },
                EndPass,
                Barrier(BetweenPhases),
                BeginPass,
                Dispatch { phase: 1, workgroups: 128, param_block: 2 },
                EndPass,
                Barrier(BetweenChunks),
                BeginPass,
                Dispatch { phase: 1, workgroups: 128, param_block: 3 },
                EndPass,
                Barrier(ComputeToGraphics),
            ]
        );
        assert_eq!(program.params[1].grid_resolution, 128);
        assert_eq!(program.params[1].cell_size, 15.625);
        assert_eq!(program.params[3].item_offset, 8192);
    }

    #[test]
    fn test_passes_are_balanced() {
        let grid = GridLayout::default();
        for kind in NodeKind::ALL {
            let plan = plan_dispatch(50_000, 64, 100, true).unwrap();
            let program = build_program(kind, &frame(50_000), &plan, &grid);

            let mut open = false;
            for step in &program.steps {
                match step {
                    DispatchStep::BeginPass => {
                        assert!(!open);
                        open = true;
                    }
                    DispatchStep::EndPass => {
                        assert!(open);
                        open = false;
                    }
                    DispatchStep::Dispatch { .. } => assert!(open),
                    DispatchStep::Barrier(_) => assert!(!open),
                }
            }
            assert!(!open);
            assert_eq!(
                program.steps.last(),
                Some(&DispatchStep::Barrier(BarrierKind::ComputeToGraphics))
            );
        }
    }
}
