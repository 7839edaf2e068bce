//! End-to-end frames on a real adapter.
//!
//! Run with `cargo test -p swarm-compute --features gpu-tests`. Each test
//! returns early when no suitable adapter exists.

#![cfg(feature = "gpu-tests")]

use std::sync::Arc;

use swarm_compute::gpu_soa::pipelines::PipelineRequest;
use swarm_compute::{
    GpuContext, GpuSoaSimulation, NodeKind, NodeOutcome, PipelineCache, PipelineKey,
    ShaderPipelineCache, SkipReason,
};
use swarm_core::config::SwarmConfig;
use swarm_core::frame::PositionSlot;
use swarm_core::health::SteadyHealth;
use swarm_core::soa::{EntityDescriptor, MovementPattern};
use swarm_core::SwarmError;

const DT: f32 = 0.1;

fn simulation(max_entities: u32) -> Option<GpuSoaSimulation> {
    simulation_with(max_entities, Box::new(ShaderPipelineCache::new()))
}

fn simulation_with(
    max_entities: u32,
    pipelines: Box<dyn PipelineCache>,
) -> Option<GpuSoaSimulation> {
    let context = match GpuContext::new() {
        Ok(context) => context,
        Err(e) => {
            eprintln!("skipping, no usable adapter: {}", e);
            return None;
        }
    };
    let mut config = SwarmConfig::default();
    config.store.max_entities = max_entities;
    config.stagger.max_delay = 0.0;
    let simulation = GpuSoaSimulation::new(
        context,
        config,
        Arc::new(SteadyHealth),
        pipelines,
    )
    .expect("simulation builds");
    Some(simulation)
}

/// Entity that keeps a constant velocity and never steers
fn drifting(position: [f32; 3], velocity: [f32; 3]) -> EntityDescriptor {
    let mut entity = EntityDescriptor::at(position);
    entity.movement = MovementPattern {
        amplitude: 0.0,
        frequency: 0.0,
        damping: 1.0,
        initial_velocity: velocity,
        ..Default::default()
    };
    entity
}

/// Cache that can never compile anything
struct BrokenPipelines;

impl PipelineCache for BrokenPipelines {
    fn prepare(
        &mut self,
        _device: &wgpu::Device,
        request: &PipelineRequest<'_>,
    ) -> Result<(), SwarmError> {
        Err(SwarmError::gpu(format!("cannot compile {:?}", request.key)))
    }

    fn get(&self, _key: &PipelineKey) -> Option<&wgpu::ComputePipeline> {
        None
    }
}

fn outcome(outcomes: &[(NodeKind, NodeOutcome)], kind: NodeKind) -> NodeOutcome {
    outcomes
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, o)| *o)
        .expect("node ran")
}

#[test]
fn appended_entities_read_back_in_order() {
    let Some(mut sim) = simulation(1024) else { return };

    for i in 0..10 {
        sim.stage(&drifting([i as f32 * 10.0, -5.0, 0.0], [0.0; 3]));
    }
    assert_eq!(sim.flush().unwrap(), 0..10);
    for i in 0..5 {
        sim.stage(&drifting([i as f32, 1.0, 0.0], [0.0; 3]));
    }
    assert_eq!(sim.flush().unwrap(), 10..15);
    assert_eq!(sim.staged(), 0);

    for slot in [PositionSlot::Primary, PositionSlot::Alternate] {
        let positions = sim.read_positions(slot).unwrap();
        assert_eq!(positions.len(), 15);
        assert_eq!(positions[3].position, [30.0, -5.0, 0.0]);
        assert_eq!(positions[12].position, [2.0, 1.0, 0.0]);
    }
    let transforms = sim.read_transforms().unwrap();
    assert_eq!(transforms[12].translation(), [2.0, 1.0, 0.0]);
}

#[test]
fn overflowing_flush_writes_nothing() {
    let Some(mut sim) = simulation(16) else { return };

    for i in 0..20 {
        sim.stage(&drifting([i as f32, 0.0, 0.0], [0.0; 3]));
    }
    let err = sim.flush().unwrap_err();
    assert!(matches!(err, SwarmError::Capacity { requested: 20, available: 16 }));
    assert_eq!(sim.active_count(), 0);
    assert_eq!(sim.staged(), 20);

    sim.discard_staged();
    sim.stage(&drifting([0.0; 3], [0.0; 3]));
    assert_eq!(sim.flush().unwrap(), 0..1);
}

#[test]
fn upload_frame_skips_every_writer() {
    let Some(mut sim) = simulation(256) else { return };

    sim.stage(&drifting([0.0; 3], [1.0, 0.0, 0.0]));
    sim.flush().unwrap();

    let report = sim.step(DT).unwrap();
    assert!(!report.simulated);
    assert_eq!(report.sim_frame, 0);
    assert_eq!(
        outcome(&report.outcomes, NodeKind::Movement),
        NodeOutcome::Skipped(SkipReason::WriterConflict)
    );
    assert_eq!(
        outcome(&report.outcomes, NodeKind::Physics),
        NodeOutcome::Skipped(SkipReason::WriterConflict)
    );
    assert_eq!(
        outcome(&report.outcomes, NodeKind::SpatialGrid),
        NodeOutcome::Skipped(SkipReason::UpstreamSkipped)
    );
    assert_eq!(report.recorded.counts.dispatches, 0);

    let report = sim.step(DT).unwrap();
    assert!(report.simulated);
    assert_eq!(report.write_slot, PositionSlot::Primary);
    assert_eq!(report.sim_frame, 1);
    assert!(report
        .outcomes
        .iter()
        .all(|(_, o)| matches!(o, NodeOutcome::Scheduled(_))));
    assert_eq!(report.recorded.recorded, NodeKind::ALL.to_vec());
}

#[test]
fn graphics_reads_latest_written_positions() {
    let Some(mut sim) = simulation(256) else { return };

    sim.stage(&drifting([0.0; 3], [10.0, 0.0, 0.0]));
    sim.flush().unwrap();
    sim.step(DT).unwrap();

    for n in 1..=5u64 {
        let report = sim.step(DT).unwrap();
        assert!(report.simulated);
        assert_eq!(sim.graphics_read_slot(), report.write_slot);

        let current = sim.read_current_positions().unwrap();
        let previous = sim.read_positions(report.write_slot.other()).unwrap();
        assert!((current[0].position[0] - n as f32).abs() < 1e-3);
        assert!((previous[0].position[0] - (n - 1) as f32).abs() < 1e-3);
    }

    let transforms = sim.read_transforms().unwrap();
    assert!((transforms[0].translation()[0] - 5.0).abs() < 1e-3);
    assert!(sim.graphics_bind_group().is_some());
}

#[test]
fn crowded_cell_keeps_sixty_four() {
    let Some(mut sim) = simulation(256) else { return };

    for _ in 0..100 {
        sim.stage(&drifting([0.0; 3], [0.0; 3]));
    }
    sim.flush().unwrap();
    sim.step(DT).unwrap();
    sim.step(DT).unwrap();

    let grid = sim.read_grid().unwrap();
    let cell = grid.cell(8256).unwrap();
    assert_eq!(cell.count, 64);
    let mut occupants = cell.occupants().to_vec();
    occupants.sort_unstable();
    occupants.dedup();
    assert_eq!(occupants.len(), 64);
    assert!(occupants.iter().all(|&e| e < 100));

    for neighbour in grid.layout().neighborhood(0.0, 0.0) {
        if neighbour != 8256 {
            assert_eq!(grid.cell(neighbour).unwrap().count, 0);
        }
    }

    let entity_cells = sim.read_entity_cells().unwrap();
    assert_eq!(entity_cells.len(), 100);
    assert!(entity_cells.iter().all(|&c| c == 8256));

    let occupancy = sim.grid_occupancy().unwrap();
    assert_eq!(occupancy.active_cells, 1);
    assert_eq!(occupancy.saturated_cells, 1);
    assert_eq!(occupancy.stored_entities, 64);
}

#[test]
fn nan_position_lands_where_host_math_puts_it() {
    let Some(mut sim) = simulation(64) else { return };

    sim.stage(&drifting([f32::NAN, 0.0, 0.0], [0.0; 3]));
    sim.stage(&drifting([f32::NAN, f32::NAN, 0.0], [0.0; 3]));
    sim.flush().unwrap();
    sim.step(DT).unwrap();
    sim.step(DT).unwrap();

    let layout = *sim.grid_layout();
    let entity_cells = sim.read_entity_cells().unwrap();
    assert_eq!(entity_cells[0], layout.world_to_cell(f32::NAN, 0.0));
    assert_eq!(entity_cells[1], layout.world_to_cell(f32::NAN, f32::NAN));
}

#[test]
fn empty_swarm_is_idle() {
    let Some(mut sim) = simulation(64) else { return };

    for _ in 0..3 {
        let report = sim.step(DT).unwrap();
        assert!(!report.simulated);
        assert!(report.outcomes.iter().all(|(_, o)| *o == NodeOutcome::Idle));
    }
    let stats = sim.stats();
    assert_eq!(stats.frames, 3);
    assert_eq!(stats.dispatches, 0);
    assert_eq!(stats.skipped_nodes, 0);
}

#[test]
fn reallocation_rebinds_before_next_dispatch() {
    let Some(mut sim) = simulation(64) else { return };

    sim.stage(&drifting([0.0; 3], [10.0, 0.0, 0.0]));
    sim.flush().unwrap();
    sim.step(DT).unwrap();
    sim.step(DT).unwrap();

    sim.reallocate(512).unwrap();
    assert_eq!(sim.capacity(), 512);
    assert_eq!(sim.active_count(), 0);

    sim.stage(&drifting([100.0, 0.0, 0.0], [10.0, 0.0, 0.0]));
    sim.flush().unwrap();
    sim.step(DT).unwrap();
    let report = sim.step(DT).unwrap();
    assert!(report.simulated);

    let current = sim.read_current_positions().unwrap();
    assert!((current[0].position[0] - 101.0).abs() < 1e-3);
}

#[test]
fn forced_chunking_matches_single_launch() {
    let Some(context) = GpuContext::new().ok() else { return };
    let mut config = SwarmConfig::default();
    config.store.max_entities = 4096;
    config.stagger.max_delay = 0.0;
    config.dispatch.max_workgroups_per_chunk = 4;
    config.dispatch.force_chunking = true;
    let mut sim = GpuSoaSimulation::new(
        context,
        config,
        Arc::new(SteadyHealth),
        Box::new(ShaderPipelineCache::new()),
    )
    .unwrap();

    for i in 0..1000 {
        sim.stage(&drifting([i as f32 - 500.0, 0.0, 0.0], [0.0, 10.0, 0.0]));
    }
    sim.flush().unwrap();
    sim.step(DT).unwrap();
    let report = sim.step(DT).unwrap();
    assert!(report.recorded.counts.dispatches > 3);

    let positions = sim.read_current_positions().unwrap();
    for (i, p) in positions.iter().enumerate() {
        assert!((p.position[0] - (i as f32 - 500.0)).abs() < 1e-3);
        assert!((p.position[1] - 1.0).abs() < 1e-3);
    }
}

#[test]
fn failed_frame_does_not_duplicate_next_upload() {
    let Some(mut sim) = simulation_with(64, Box::new(BrokenPipelines)) else { return };

    sim.stage(&drifting([0.0; 3], [1.0, 0.0, 0.0]));
    assert_eq!(sim.flush().unwrap(), 0..1);
    // Upload frame records nothing, so it succeeds
    sim.step(DT).unwrap();
    // Every node is scheduled and pipeline preparation fails
    assert!(sim.step(DT).is_err());

    sim.stage(&drifting([5.0, 0.0, 0.0], [0.0; 3]));
    assert_eq!(sim.flush().unwrap(), 1..2);
    assert_eq!(sim.active_count(), 2);
    assert_eq!(sim.staged(), 0);

    assert_eq!(sim.flush().unwrap(), 2..2);
    assert_eq!(sim.active_count(), 2);
    let positions = sim.read_positions(PositionSlot::Primary).unwrap();
    assert_eq!(positions[1].position, [5.0, 0.0, 0.0]);
}

#[test]
fn failed_reallocation_keeps_live_store() {
    let Some(mut sim) = simulation(64) else { return };

    sim.stage(&drifting([100.0, 0.0, 0.0], [10.0, 0.0, 0.0]));
    sim.flush().unwrap();

    let err = sim.reallocate(50_000_000).unwrap_err();
    assert!(matches!(err, SwarmError::Allocation { .. }));
    assert_eq!(sim.capacity(), 64);
    assert_eq!(sim.active_count(), 1);
    assert!(sim.graphics_bind_group().is_some());

    sim.step(DT).unwrap();
    let report = sim.step(DT).unwrap();
    assert!(report.simulated);
    let positions = sim.read_current_positions().unwrap();
    assert!((positions[0].position[0] - 101.0).abs() < 1e-4);
}
