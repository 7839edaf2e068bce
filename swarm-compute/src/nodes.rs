//! # Frame-Graph Compute Nodes
//!
//! Each node owns one kernel and declares which binding slots it reads and
//! writes. Declarations are the only coupling between nodes: the graph
//! runs them in order, the writer ledger refuses a second writer for any
//! buffer within a frame, and a node whose upstream output was not
//! produced this frame is skipped.
//!
//! ```text
//! Movement ──velocity──► Physics ──position──► SpatialGrid
//! ```

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use swarm_core::config::DiagnosticsConfig;
use swarm_core::dispatch::{plan_dispatch, plan_grid_rebuild, DispatchChunk, DispatchPlan, PacingDecision};
use swarm_core::error::{SwarmError, SwarmResult};
use swarm_core::frame::{LogThrottle, PositionSlot, Resource, Writer, WriterLedger};
use swarm_core::soa::BindingSlot;
use swarm_core::spatial::GridLayout;

use crate::gpu_soa::bind_groups::BindingTable;
use crate::gpu_soa::config::DispatchParams;
use crate::gpu_soa::dispatch::DispatchScheduler;
use crate::gpu_soa::pipelines::PipelineKey;
use crate::shaders;

/// Everything a node needs to know about the frame being built
#[derive(Clone, Copy, Debug)]
pub struct FrameContext {
    /// Submissions so far, advances every frame
    pub submission: u64,
    /// Frames in which physics ran, drives ping-pong parity
    pub sim_frame: u64,
    /// Position buffer written this frame
    pub write_slot: PositionSlot,
    pub entity_count: u32,
    pub time: f32,
    pub delta_time: f32,
    pub store_generation: u64,
    pub grid_generation: u64,
}

/// Declared buffer access of a node
#[derive(Clone, Copy, Debug)]
pub struct NodeAccess {
    pub reads: &'static [BindingSlot],
    pub writes: &'static [BindingSlot],
    /// Reads that must have been written earlier in the same frame
    pub depends_on: &'static [BindingSlot],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Movement,
    Physics,
    SpatialGrid,
}

const MOVEMENT_SLOTS: [BindingSlot; 5] = [
    BindingSlot::MovementParams,
    BindingSlot::MovementCenter,
    BindingSlot::PositionSource,
    BindingSlot::Velocity,
    BindingSlot::RuntimeState,
];

const PHYSICS_SLOTS: [BindingSlot; 5] = [
    BindingSlot::Velocity,
    BindingSlot::PositionSource,
    BindingSlot::PositionDestination,
    BindingSlot::Rotation,
    BindingSlot::Transform,
];

const SPATIAL_SLOTS: [BindingSlot; 3] = [
    BindingSlot::PositionDestination,
    BindingSlot::GridCells,
    BindingSlot::EntityCells,
];

impl NodeKind {
    /// Graph order
    pub const ALL: [NodeKind; 3] = [NodeKind::Movement, NodeKind::Physics, NodeKind::SpatialGrid];

    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Movement => "movement",
            NodeKind::Physics => "physics",
            NodeKind::SpatialGrid => "spatial_grid",
        }
    }

    pub fn kernel_source(self) -> &'static str {
        match self {
            NodeKind::Movement => shaders::MOVEMENT_SHADER,
            NodeKind::Physics => shaders::PHYSICS_SHADER,
            NodeKind::SpatialGrid => shaders::SPATIAL_GRID_SHADER,
        }
    }

    /// Entry points, run in order over the same launch sequence
    pub fn entry_points(self) -> &'static [&'static str] {
        match self {
            NodeKind::Movement | NodeKind::Physics => &["main"],
            NodeKind::SpatialGrid => &["clear_cells", "populate_cells"],
        }
    }

    /// Insertion into a bounded cell must see every earlier chunk's claims
    pub fn requires_chunk_barriers(self) -> bool {
        matches!(self, NodeKind::SpatialGrid)
    }

    pub fn access(self) -> NodeAccess {
        match self {
            NodeKind::Movement => NodeAccess {
                reads: &MOVEMENT_SLOTS,
                writes: &[BindingSlot::Velocity, BindingSlot::RuntimeState],
                depends_on: &[],
            },
            NodeKind::Physics => NodeAccess {
                reads: &PHYSICS_SLOTS,
                writes: &[
                    BindingSlot::PositionDestination,
                    BindingSlot::Rotation,
                    BindingSlot::Transform,
                ],
                depends_on: &[],
            },
            NodeKind::SpatialGrid => NodeAccess {
                reads: &[BindingSlot::PositionDestination],
                writes: &[BindingSlot::GridCells, BindingSlot::EntityCells],
                depends_on: &[BindingSlot::PositionDestination],
            },
        }
    }

    /// Every slot the kernel touches
    pub fn required_slots(self) -> &'static [BindingSlot] {
        match self {
            NodeKind::Movement => &MOVEMENT_SLOTS,
            NodeKind::Physics => &PHYSICS_SLOTS,
            NodeKind::SpatialGrid => &SPATIAL_SLOTS,
        }
    }

    pub fn plan_dispatch(
        self,
        frame: &FrameContext,
        grid: &GridLayout,
        threads_per_group: u32,
        pacing: &PacingDecision,
    ) -> SwarmResult<DispatchPlan> {
        match self {
            NodeKind::Movement | NodeKind::Physics => plan_dispatch(
                frame.entity_count,
                threads_per_group,
                pacing.max_workgroups_per_chunk,
                pacing.force_chunking,
            ),
            NodeKind::SpatialGrid => plan_grid_rebuild(
                frame.entity_count,
                grid.cell_count(),
                threads_per_group,
                pacing.max_workgroups_per_chunk,
                pacing.force_chunking,
            ),
        }
    }

    pub fn pipeline_keys(self, workgroup_size: u32, layout_generation: u64) -> Vec<PipelineKey> {
        self.entry_points()
            .iter()
            .map(|&entry_point| PipelineKey {
                kernel: self.name(),
                entry_point,
                workgroup_size,
                layout_generation,
            })
            .collect()
    }

    pub fn dispatch_params(
        self,
        frame: &FrameContext,
        plan: &DispatchPlan,
        chunk: &DispatchChunk,
        grid: &GridLayout,
    ) -> DispatchParams {
        DispatchParams::for_chunk(frame, plan, chunk, grid)
    }
}

/// Why a node did not schedule work
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    StaleBinding,
    MissingSlots,
    UpstreamSkipped,
    WriterConflict,
    PlanRejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeOutcome {
    Scheduled(DispatchPlan),
    /// No active entities
    Idle,
    Skipped(SkipReason),
}

/// Shared objects a node cannot run without
#[derive(Clone, Default)]
pub struct NodeCollaborators {
    pub bindings: Option<Arc<RwLock<BindingTable>>>,
    pub scheduler: Option<Arc<Mutex<DispatchScheduler>>>,
}

pub struct ComputeNode {
    kind: NodeKind,
    bindings: Arc<RwLock<BindingTable>>,
    scheduler: Arc<Mutex<DispatchScheduler>>,
    idle_log: LogThrottle,
}

impl ComputeNode {
    pub fn new(
        kind: NodeKind,
        collaborators: &NodeCollaborators,
        idle_log_interval: u64,
    ) -> SwarmResult<Self> {
        let bindings = collaborators
            .bindings
            .clone()
            .ok_or(SwarmError::MissingCollaborator("binding table"))?;
        let scheduler = collaborators
            .scheduler
            .clone()
            .ok_or(SwarmError::MissingCollaborator("dispatch scheduler"))?;

        Ok(Self {
            kind,
            bindings,
            scheduler,
            idle_log: LogThrottle::new(idle_log_interval),
        })
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Hand this frame's work to the scheduler. `produced` collects the
    /// buffers written by nodes that scheduled earlier in the frame.
    pub fn execute(
        &mut self,
        frame: &FrameContext,
        ledger: &mut WriterLedger,
        produced: &mut Vec<Resource>,
    ) -> NodeOutcome {
        let name = self.kind.name();

        if frame.entity_count == 0 {
            if let Some(suppressed) = self.idle_log.check(frame.submission) {
                tracing::debug!(
                    "💤 {}: no active entities ({} idle frames not logged)",
                    name,
                    suppressed
                );
            }
            return NodeOutcome::Idle;
        }

        if let Some(reason) = self.check_bindings(frame) {
            return self.skip(reason);
        }

        let access = self.kind.access();
        for &slot in access.depends_on {
            let resource = Resource::for_slot(slot, frame.write_slot);
            if !produced.contains(&resource) {
                tracing::debug!("⏭️ {}: {} not produced this frame", name, resource);
                return self.skip(SkipReason::UpstreamSkipped);
            }
        }

        let writes: Vec<Resource> = access
            .writes
            .iter()
            .map(|&slot| Resource::for_slot(slot, frame.write_slot))
            .collect();
        if let Err(e) = ledger.claim_all(frame.submission, &writes, Writer::Node(name)) {
            tracing::debug!("⏭️ {}: {}", name, e);
            return self.skip(SkipReason::WriterConflict);
        }

        match self.scheduler.lock().schedule(self.kind, frame) {
            Ok(plan) => {
                produced.extend(writes);
                NodeOutcome::Scheduled(plan)
            }
            Err(e) => {
                tracing::debug!("⏭️ {}: {}", name, e);
                self.skip(SkipReason::PlanRejected)
            }
        }
    }

    fn check_bindings(&self, frame: &FrameContext) -> Option<SkipReason> {
        let bindings = self.bindings.read();
        if let Err(e) = bindings.ensure_current(frame.store_generation, frame.grid_generation) {
            tracing::error!("❌ {} skipped: {}", self.kind.name(), e);
            return Some(SkipReason::StaleBinding);
        }
        let missing = bindings.missing_slots(self.kind.required_slots());
        if !missing.is_empty() {
            tracing::error!("❌ {} skipped, unbound slots: {:?}", self.kind.name(), missing);
            return Some(SkipReason::MissingSlots);
        }
        None
    }

    fn skip(&self, reason: SkipReason) -> NodeOutcome {
        self.scheduler.lock().note_skipped();
        NodeOutcome::Skipped(reason)
    }
}

/// Ordered set of compute nodes run once per frame
pub struct FrameGraph {
    nodes: Vec<ComputeNode>,
}

impl FrameGraph {
    /// Movement, physics and grid rebuild, in that order
    pub fn standard(
        collaborators: &NodeCollaborators,
        diagnostics: &DiagnosticsConfig,
    ) -> SwarmResult<Self> {
        let nodes = NodeKind::ALL
            .iter()
            .map(|&kind| ComputeNode::new(kind, collaborators, diagnostics.idle_log_interval))
            .collect::<SwarmResult<Vec<_>>>()?;
        Ok(Self { nodes })
    }

    pub fn execute(
        &mut self,
        frame: &FrameContext,
        ledger: &mut WriterLedger,
    ) -> Vec<(NodeKind, NodeOutcome)> {
        let mut produced = Vec::new();
        self.nodes
            .iter_mut()
            .map(|node| (node.kind(), node.execute(frame, ledger, &mut produced)))
            .collect()
    }

    pub fn kinds(&self) -> impl Iterator<Item = NodeKind> + '_ {
        self.nodes.iter().map(|n| n.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_core::config::DispatchConfig;

    fn frame(entity_count: u32) -> FrameContext {
        FrameContext {
            submission: 3,
            sim_frame: 1,
            write_slot: PositionSlot::Alternate,
            entity_count,
            time: 0.5,
            delta_time: 0.016,
            store_generation: 1,
            grid_generation: 1,
        }
    }

    #[test]
    fn test_construction_requires_collaborators() {
        let err = ComputeNode::new(NodeKind::Physics, &NodeCollaborators::default(), 60)
            .err()
            .unwrap();
        assert!(matches!(err, SwarmError::MissingCollaborator("binding table")));

        let err = FrameGraph::standard(&NodeCollaborators::default(), &DiagnosticsConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, SwarmError::MissingCollaborator(_)));
    }

    #[test]
    fn test_each_buffer_has_one_writer_kind() {
        for slot in BindingSlot::ASSIGNED {
            let writers: Vec<_> = NodeKind::ALL
                .iter()
                .filter(|k| k.access().writes.contains(&slot))
                .collect();
            assert!(writers.len() <= 1, "{:?} written by {:?}", slot, writers);
        }
    }

    #[test]
    fn test_declared_access_is_bound() {
        for kind in NodeKind::ALL {
            let access = kind.access();
            for slot in access.reads.iter().chain(access.writes) {
                assert!(kind.required_slots().contains(slot), "{:?} {:?}", kind, slot);
            }
            for slot in access.depends_on {
                assert!(access.reads.contains(slot));
            }
        }
    }

    #[test]
    fn test_grid_depends_on_physics_output() {
        let physics = NodeKind::Physics.access();
        for slot in NodeKind::SpatialGrid.access().depends_on {
            assert!(physics.writes.contains(slot));
        }
    }

    #[test]
    fn test_grid_plan_covers_every_cell() {
        let grid = GridLayout::default();
        let pacing = PacingDecision::nominal(&DispatchConfig::default());

        let plan = NodeKind::SpatialGrid
            .plan_dispatch(&frame(100), &grid, 64, &pacing)
            .unwrap();
        assert_eq!(plan.work_items, 16_384);
        assert_eq!(plan.total_workgroups, 256);

        let plan = NodeKind::Physics
            .plan_dispatch(&frame(100), &grid, 64, &pacing)
            .unwrap();
        assert_eq!(plan.total_workgroups, 2);
    }

    #[test]
    fn test_oversized_swarm_is_rejected() {
        let grid = GridLayout::default();
        let pacing = PacingDecision::nominal(&DispatchConfig::default());
        let err = NodeKind::Movement
            .plan_dispatch(&frame(90_000_000), &grid, 64, &pacing)
            .unwrap_err();
        assert!(matches!(err, SwarmError::WorkgroupLimit { total: 1_406_250, .. }));
    }

    #[test]
    fn test_pipeline_keys_follow_entry_points() {
        let keys = NodeKind::SpatialGrid.pipeline_keys(64, 7);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].entry_point, "clear_cells");
        assert_eq!(keys[1].entry_point, "populate_cells");
        assert!(keys.iter().all(|k| k.layout_generation == 7 && k.workgroup_size == 64));

        let keys = NodeKind::Movement.pipeline_keys(128, 1);
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].kernel, "movement");
    }

    #[test]
    fn test_entry_points_exist_in_kernels() {
        for kind in NodeKind::ALL {
            for entry in kind.entry_points() {
                let decl = format!("fn {}(", entry);
                assert!(kind.kernel_source().contains(&decl), "{:?} {}", kind, entry);
            }
        }
    }

    #[test]
    fn test_dispatch_params_carry_grid() {
        let grid = GridLayout::default();
        let pacing = PacingDecision::nominal(&DispatchConfig::default());
        let f = frame(500);
        let plan = NodeKind::SpatialGrid.plan_dispatch(&f, &grid, 64, &pacing).unwrap();
        let chunk = plan.chunks().next().unwrap();
        let params = NodeKind::SpatialGrid.dispatch_params(&f, &plan, &chunk, &grid);
        assert_eq!(params.entity_count, 500);
        assert_eq!(params.grid_resolution, 128);
        assert_eq!(params.cell_size, 15.625);
        assert_eq!(params.delta_time, 0.016);
    }
}
