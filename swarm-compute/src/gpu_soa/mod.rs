//! # GPU SoA Simulation
//!
//! Owns every GPU-side piece of the swarm and runs one frame per
//! [`GpuSoaSimulation::step`]:
//!
//! 1. **Upload**: staged entities are appended to the SoA store, claiming
//!    every channel for the upcoming frame
//! 2. **Frame graph**: movement, physics and grid rebuild schedule their
//!    launches under this frame's pacing
//! 3. **Record**: the scheduler encodes all launches into one encoder,
//!    which is submitted without waiting on the GPU
//! 4. **Present**: graphics binds the group that reads the position buffer
//!    physics wrote last
//!
//! The simulation frame only advances when physics actually ran, so
//! ping-pong parity never points graphics at a buffer nobody wrote.

pub mod bind_groups;
pub mod buffers;
pub mod config;
pub mod dispatch;
pub mod pipelines;
pub mod readback;

use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use swarm_core::config::SwarmConfig;
use swarm_core::dispatch::PacingDecision;
use swarm_core::error::{SwarmError, SwarmResult};
use swarm_core::frame::{PingPong, PositionSlot, Resource, Writer, WriterLedger};
use swarm_core::health::FrameTimeMonitor;
use swarm_core::soa::{Channel, EntityDescriptor, EntityPosition, EntityTransform, StagingBatch};
use swarm_core::spatial::{GridCell, GridLayout, GridOccupancy, HostGrid};
use swarm_core::stagger::StaggerGenerator;
use swarm_core::traits::{FrameStats, GpuHealthOracle};

use self::bind_groups::BindingTable;
use self::buffers::SoaBufferStore;
use self::config::FrameUniforms;
use self::dispatch::{DispatchScheduler, RecordedFrame};
use self::pipelines::PipelineCache;
use self::readback::{read_buffer, READBACK_TIMEOUT};
use crate::context::GpuContext;
use crate::nodes::{FrameContext, FrameGraph, NodeCollaborators, NodeKind, NodeOutcome};
use crate::spatial_gpu::SpatialGridBuffers;

const IDENTITY: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// What one [`GpuSoaSimulation::step`] did
#[derive(Clone, Debug)]
pub struct FrameReport {
    pub submission: u64,
    /// Simulation frame after this step
    pub sim_frame: u64,
    pub write_slot: PositionSlot,
    /// Physics ran and the written position buffer is now current
    pub simulated: bool,
    pub pacing: PacingDecision,
    pub outcomes: Vec<(NodeKind, NodeOutcome)>,
    pub recorded: RecordedFrame,
}

/// GPU-resident swarm
pub struct GpuSoaSimulation {
    context: GpuContext,
    config: SwarmConfig,
    store: SoaBufferStore,
    grid: SpatialGridBuffers,
    bindings: Arc<RwLock<BindingTable>>,
    scheduler: Arc<Mutex<DispatchScheduler>>,
    graph: FrameGraph,
    ledger: WriterLedger,
    staging: StagingBatch,
    stagger: StaggerGenerator,
    monitor: Option<Arc<FrameTimeMonitor>>,
    last_step: Option<Instant>,
    submission: u64,
    sim_frame: u64,
    elapsed: f32,
    view_proj: [[f32; 4]; 4],
    frames: u64,
    simulated_frames: u64,
    uploaded: u64,
}

impl GpuSoaSimulation {
    pub fn new(
        context: GpuContext,
        config: SwarmConfig,
        oracle: Arc<dyn GpuHealthOracle>,
        pipelines: Box<dyn PipelineCache>,
    ) -> SwarmResult<Self> {
        config.validate()?;
        let layout = GridLayout::from_config(&config.grid)?;

        let mut store = SoaBufferStore::new(&context, config.store.memory_budget_mb);
        store.initialize(config.store.max_entities).map_err(|e| {
            tracing::error!("❌ SoA store allocation failed: {}", e);
            e
        })?;

        let mut grid = SpatialGridBuffers::new(&context, layout);
        grid.allocate(store.capacity())?;

        let bindings = Arc::new(RwLock::new(BindingTable::build(&context, &store, &grid)?));
        let scheduler = Arc::new(Mutex::new(DispatchScheduler::new(
            &context, &config, oracle, pipelines,
        )?));
        let graph = FrameGraph::standard(
            &NodeCollaborators {
                bindings: Some(bindings.clone()),
                scheduler: Some(scheduler.clone()),
            },
            &config.diagnostics,
        )?;

        tracing::info!(
            "✅ Swarm simulation ready: {} entity slots, {}x{} grid, {} threads per group",
            store.capacity(),
            layout.resolution(),
            layout.resolution(),
            config.dispatch.threads_per_group
        );

        Ok(Self {
            stagger: StaggerGenerator::from_config(&config.stagger),
            context,
            config,
            store,
            grid,
            bindings,
            scheduler,
            graph,
            ledger: WriterLedger::new(),
            staging: StagingBatch::default(),
            monitor: None,
            last_step: None,
            submission: 0,
            sim_frame: 0,
            elapsed: 0.0,
            view_proj: IDENTITY,
            frames: 0,
            simulated_frames: 0,
            uploaded: 0,
        })
    }

    /// Feed wall-clock frame times into `monitor` on every step
    pub fn attach_frame_monitor(&mut self, monitor: Arc<FrameTimeMonitor>) {
        self.monitor = Some(monitor);
    }

    /// Stage one entity for the next [`flush`](Self::flush)
    pub fn stage(&mut self, entity: &EntityDescriptor) {
        self.staging.push(entity, &mut self.stagger);
    }

    pub fn staged(&self) -> usize {
        self.staging.len()
    }

    /// Upload the staged entities. A rejected batch stays staged.
    pub fn flush(&mut self) -> SwarmResult<Range<u32>> {
        let batch = std::mem::take(&mut self.staging);
        match self.append(&batch) {
            Ok(range) => {
                self.staging = batch;
                self.staging.clear();
                Ok(range)
            }
            Err(e) => {
                self.staging = batch;
                Err(e)
            }
        }
    }

    pub fn discard_staged(&mut self) {
        self.staging.clear();
    }

    /// Append an externally built batch. The upload owns every channel for
    /// the upcoming frame, so no node writes during it.
    pub fn append(&mut self, batch: &StagingBatch) -> SwarmResult<Range<u32>> {
        let active = self.store.active_count();
        if batch.is_empty() {
            return Ok(active..active);
        }

        let resources: Vec<Resource> = Channel::ALL.into_iter().map(Resource::Channel).collect();
        self.ledger
            .check_all(self.submission, &resources, Writer::Upload)?;
        let range = self.store.append(batch)?;
        self.ledger
            .claim_all(self.submission, &resources, Writer::Upload)?;
        self.uploaded += batch.len() as u64;
        Ok(range)
    }

    /// Drop every entity and empty the grid
    pub fn reset(&mut self) -> SwarmResult<()> {
        self.store.clear();
        self.staging.clear();
        self.grid.clear_all_cells()?;
        self.sim_frame = 0;
        self.elapsed = 0.0;
        tracing::info!("🔄 Swarm reset");
        Ok(())
    }

    /// Reallocate store and grid for a new capacity. Entities are dropped.
    /// If the store cannot be replaced the current one stays live.
    pub fn reallocate(&mut self, max_entities: u32) -> SwarmResult<()> {
        self.store.initialize(max_entities).map_err(|e| {
            tracing::error!("❌ Reallocation to {} entities failed: {}", max_entities, e);
            e
        })?;
        if let Err(e) = self.grid.allocate(max_entities) {
            tracing::error!("❌ Grid reallocation failed: {}", e);
            self.bindings.write().invalidate();
            return Err(e);
        }
        self.config.store.max_entities = max_entities;
        self.sim_frame = 0;
        self.rebuild_bindings()
    }

    /// Must run after the presentation surface is recreated
    pub fn on_surface_resized(&mut self) -> SwarmResult<()> {
        self.rebuild_bindings()
    }

    fn rebuild_bindings(&mut self) -> SwarmResult<()> {
        self.bindings
            .write()
            .rebuild(&self.store, &self.grid)
            .map_err(|e| {
                tracing::error!("❌ Binding table rebuild failed: {}", e);
                e
            })
    }

    pub fn set_view_projection(&mut self, view_proj: [[f32; 4]; 4]) {
        self.view_proj = view_proj;
    }

    /// Record and submit one frame. Never waits for the GPU.
    pub fn step(&mut self, delta_time: f32) -> SwarmResult<FrameReport> {
        if let Some(monitor) = &self.monitor {
            let now = Instant::now();
            if let Some(last) = self.last_step.replace(now) {
                monitor.record_frame(now - last);
            }
        }

        let write_slot = PingPong::compute_write(self.sim_frame);
        self.elapsed += delta_time;
        let frame = FrameContext {
            submission: self.submission,
            sim_frame: self.sim_frame,
            write_slot,
            entity_count: self.store.active_count(),
            time: self.elapsed,
            delta_time,
            store_generation: self.store.generation(),
            grid_generation: self.grid.generation(),
        };

        self.bindings
            .read()
            .write_frame_uniforms(&FrameUniforms::new(&frame, self.view_proj));

        let pacing = self.scheduler.lock().begin_frame();
        let outcomes = self.graph.execute(&frame, &mut self.ledger);

        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Swarm Frame"),
            });
        let recorded = {
            let bindings = self.bindings.read();
            self.scheduler
                .lock()
                .record(&mut encoder, &bindings, write_slot)
        };
        let recorded = match recorded {
            Ok(recorded) => recorded,
            Err(e) => {
                // Nothing was submitted; release this frame's writer claims
                self.submission += 1;
                tracing::error!("❌ Frame {} abandoned: {}", frame.submission, e);
                return Err(e);
            }
        };
        self.context.queue.submit(Some(encoder.finish()));

        let simulated = recorded.contains(NodeKind::Physics);
        if simulated {
            self.sim_frame += 1;
            self.simulated_frames += 1;
        }
        self.submission += 1;
        self.frames += 1;

        tracing::trace!(
            "Frame {} (sim {}): {} dispatches, {} passes",
            frame.submission,
            self.sim_frame,
            recorded.counts.dispatches,
            recorded.counts.passes
        );

        Ok(FrameReport {
            submission: frame.submission,
            sim_frame: self.sim_frame,
            write_slot,
            simulated,
            pacing,
            outcomes,
            recorded,
        })
    }

    /// Position buffer graphics should read now
    pub fn graphics_read_slot(&self) -> PositionSlot {
        PingPong::graphics_read(self.sim_frame)
    }

    pub fn graphics_layout(&self) -> Option<MappedRwLockReadGuard<'_, wgpu::BindGroupLayout>> {
        RwLockReadGuard::try_map(self.bindings.read(), |t| t.graphics_layout()).ok()
    }

    /// Graphics group reading the most recently written positions
    pub fn graphics_bind_group(&self) -> Option<MappedRwLockReadGuard<'_, wgpu::BindGroup>> {
        let slot = self.graphics_read_slot();
        RwLockReadGuard::try_map(self.bindings.read(), |t| t.graphics_group(slot)).ok()
    }

    pub fn active_count(&self) -> u32 {
        self.store.active_count()
    }

    pub fn capacity(&self) -> u32 {
        self.store.capacity()
    }

    pub fn sim_frame(&self) -> u64 {
        self.sim_frame
    }

    pub fn grid_layout(&self) -> &GridLayout {
        self.grid.layout()
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn stats(&self) -> FrameStats {
        let mut stats = self.scheduler.lock().stats().clone();
        stats.frames = self.frames;
        stats.simulated_frames = self.simulated_frames;
        stats.uploaded_entities = self.uploaded;
        stats
    }

    fn channel_buffer(&self, channel: Channel) -> SwarmResult<&wgpu::Buffer> {
        self.store
            .buffer(channel)
            .ok_or_else(|| SwarmError::gpu(format!("{} not created", channel.label())))
    }

    /// Active entities' positions in one ping-pong buffer
    pub fn read_positions(&self, slot: PositionSlot) -> SwarmResult<Vec<EntityPosition>> {
        read_buffer(
            &self.context,
            self.channel_buffer(slot.channel())?,
            0,
            self.store.active_count(),
            READBACK_TIMEOUT,
        )
    }

    /// Positions graphics would draw this frame
    pub fn read_current_positions(&self) -> SwarmResult<Vec<EntityPosition>> {
        self.read_positions(self.graphics_read_slot())
    }

    pub fn read_transforms(&self) -> SwarmResult<Vec<EntityTransform>> {
        read_buffer(
            &self.context,
            self.channel_buffer(Channel::Transform)?,
            0,
            self.store.active_count(),
            READBACK_TIMEOUT,
        )
    }

    pub fn read_grid(&self) -> SwarmResult<HostGrid> {
        let buffer = self
            .grid
            .cells_buffer()
            .ok_or_else(|| SwarmError::gpu("Grid cells buffer not created"))?;
        let layout = *self.grid.layout();
        let cells: Vec<GridCell> =
            read_buffer(&self.context, buffer, 0, layout.cell_count(), READBACK_TIMEOUT)?;
        HostGrid::from_cells(layout, cells)
    }

    pub fn read_entity_cells(&self) -> SwarmResult<Vec<u32>> {
        let buffer = self
            .grid
            .entity_cells_buffer()
            .ok_or_else(|| SwarmError::gpu("Entity cells buffer not created"))?;
        read_buffer(
            &self.context,
            buffer,
            0,
            self.store.active_count(),
            READBACK_TIMEOUT,
        )
    }

    pub fn grid_occupancy(&self) -> SwarmResult<GridOccupancy> {
        Ok(self.read_grid()?.occupancy())
    }

    /// Block until submitted frames complete
    pub fn wait_idle(&self, timeout: Duration) {
        self.context.wait_idle(timeout);
    }
}
