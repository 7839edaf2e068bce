//! Headless swarm: spawns a ring of entities, steps a few hundred frames
//! and prints frame and grid statistics.
//!
//! ```text
//! cargo run -p swarm-compute --example headless_swarm -- [entities] [frames]
//! ```
//!
//! `SWARM_CONFIG` names a JSON config file; otherwise `SWARM_*` variables
//! are read on top of the defaults.

use std::time::Instant;

use swarm_core::config::SwarmConfig;
use swarm_core::soa::{EntityDescriptor, MovementPattern};
use tracing::{info, warn, Level};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let mut args = std::env::args().skip(1);
    let entities: u32 = args.next().and_then(|s| s.parse().ok()).unwrap_or(10_000);
    let frames: u32 = args.next().and_then(|s| s.parse().ok()).unwrap_or(300);

    let config = match std::env::var("SWARM_CONFIG") {
        Ok(path) => match SwarmConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("⚠️ Could not load {}: {}, using environment", path, e);
                SwarmConfig::from_env()
            }
        },
        Err(_) => SwarmConfig::from_env(),
    };

    if !swarm_compute::gpu_available() {
        warn!("⚠️ No GPU adapter available, nothing to run");
        return;
    }
    for device in swarm_compute::device_info() {
        info!(
            "🎮 {} ({}, {}), {} storage buffers per stage",
            device.name, device.backend, device.device_type, device.storage_buffers_per_stage
        );
    }

    let mut sim = match swarm_compute::create_simulation(&config) {
        Ok(sim) => sim,
        Err(e) => {
            warn!("⚠️ Simulation unavailable: {}", e);
            return;
        }
    };

    let count = entities.min(sim.capacity());
    let radius = config.grid.world_size * 0.35;
    for i in 0..count {
        let angle = i as f32 / count.max(1) as f32 * std::f32::consts::TAU;
        let mut entity = EntityDescriptor::at([radius * angle.cos(), radius * angle.sin(), 0.0]);
        entity.color = [0.5 + 0.5 * angle.cos(), 0.5 + 0.5 * angle.sin(), 0.8, 1.0];
        entity.movement = MovementPattern {
            amplitude: 20.0 + (i % 7) as f32 * 5.0,
            frequency: 0.5 + (i % 5) as f32 * 0.1,
            phase: angle,
            angular_velocity: 1.0,
            angular_damping: 0.05,
            ..Default::default()
        };
        sim.stage(&entity);
    }
    match sim.flush() {
        Ok(range) => info!("📦 Spawned {} entities", range.len()),
        Err(e) => {
            warn!("⚠️ Spawn rejected: {}", e);
            return;
        }
    }

    let started = Instant::now();
    for _ in 0..frames {
        if let Err(e) = sim.step(1.0 / 60.0) {
            warn!("⚠️ Frame failed: {}", e);
            break;
        }
    }
    sim.wait_idle(std::time::Duration::from_secs(5));
    let elapsed = started.elapsed();

    let stats = sim.stats();
    info!(
        "✅ {} frames ({} simulated) in {:.2?}: {} dispatches, {} passes, {} barriers",
        stats.frames,
        stats.simulated_frames,
        elapsed,
        stats.dispatches,
        stats.passes,
        stats.barriers
    );
    info!(
        "   skipped nodes {}, rejected plans {}, degraded frames {}",
        stats.skipped_nodes, stats.rejected_plans, stats.degraded_frames
    );

    match sim.grid_occupancy() {
        Ok(occupancy) => info!(
            "🗺️ Grid: {} active cells, {:.1} avg, {} max, {} saturated, {} stored",
            occupancy.active_cells,
            occupancy.avg_per_active_cell,
            occupancy.max_in_cell,
            occupancy.saturated_cells,
            occupancy.stored_entities
        ),
        Err(e) => warn!("⚠️ Grid readback failed: {}", e),
    }
}
