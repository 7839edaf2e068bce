//! # Configuration
//!
//! Tunables for the buffer store, grid, dispatch scheduler and pacing.
//! Every section has a `Default` matching the production constants so an
//! empty JSON object deserializes into a working setup.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SwarmError, SwarmResult};
use crate::{GRID_RESOLUTION, MAX_ENTITIES, MAX_WORKGROUPS_PER_DIMENSION, WORLD_SIZE};

/// Master configuration for the simulation
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Buffer store capacity
    pub store: StoreConfig,

    /// Spatial grid geometry
    pub grid: GridConfig,

    /// Dispatch planning
    pub dispatch: DispatchConfig,

    /// Start-time staggering
    pub stagger: StaggerConfig,

    /// Frame-time health monitoring
    pub health: HealthConfig,

    /// Diagnostic output
    pub diagnostics: DiagnosticsConfig,
}

/// Buffer store settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Slots allocated per channel
    pub max_entities: u32,

    /// Total VRAM the store may claim in MB (0 = only device limits apply)
    pub memory_budget_mb: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entities: MAX_ENTITIES,
            memory_budget_mb: 0,
        }
    }
}

/// Spatial grid geometry
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Cells per axis
    pub resolution: u32,

    /// Side length of the world square
    pub world_size: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            resolution: GRID_RESOLUTION,
            world_size: WORLD_SIZE,
        }
    }
}

/// Dispatch planning
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Invocations per workgroup (baked into the kernels)
    pub threads_per_group: u32,

    /// Largest single launch while the GPU is healthy
    pub max_workgroups_per_chunk: u32,

    /// Largest single launch while the GPU is degraded
    pub degraded_max_workgroups_per_chunk: u32,

    /// Always split launches, even when they fit
    pub force_chunking: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            threads_per_group: 64,
            max_workgroups_per_chunk: 4096,
            degraded_max_workgroups_per_chunk: 256,
            force_chunking: false,
        }
    }
}

/// Start-time staggering
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StaggerConfig {
    /// Seed for the stagger generator, fixed for reproducible runs
    pub seed: u64,

    /// Upper bound of a stagger delay in seconds (0 disables staggering)
    pub max_delay: f32,
}

impl Default for StaggerConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED_CAFE,
            max_delay: 1.5,
        }
    }
}

/// Frame-time health monitoring
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Frame time above which a frame counts as over budget
    pub frame_budget_ms: f32,

    /// Consecutive over-budget frames before reporting unhealthy
    pub degrade_after_frames: u32,

    /// Consecutive in-budget frames before reporting healthy again
    pub recover_after_frames: u32,

    /// Chunk size recommended while degraded
    pub recommended_max_workgroups: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            frame_budget_ms: 33.0,
            degrade_after_frames: 5,
            recover_after_frames: 120,
            recommended_max_workgroups: 256,
        }
    }
}

/// Diagnostic output
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Frames between repeated "nothing to simulate" messages
    pub idle_log_interval: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            idle_log_interval: 300,
        }
    }
}

impl SwarmConfig {
    /// Load config from file
    pub fn load(path: impl AsRef<Path>) -> SwarmResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: impl AsRef<Path>) -> SwarmResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(max) = env_parse("SWARM_MAX_ENTITIES") {
            config.store.max_entities = max;
        }
        if let Some(threads) = env_parse("SWARM_THREADS_PER_GROUP") {
            config.dispatch.threads_per_group = threads;
        }
        if let Some(groups) = env_parse("SWARM_MAX_WORKGROUPS_PER_CHUNK") {
            config.dispatch.max_workgroups_per_chunk = groups;
        }
        if let Some(force) = env_parse("SWARM_FORCE_CHUNKING") {
            config.dispatch.force_chunking = force;
        }
        if let Some(seed) = env_parse("SWARM_STAGGER_SEED") {
            config.stagger.seed = seed;
        }

        config
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> SwarmResult<()> {
        if self.store.max_entities == 0 {
            return Err(SwarmError::config("store.max_entities must be > 0"));
        }
        if self.grid.resolution == 0 {
            return Err(SwarmError::config("grid.resolution must be > 0"));
        }
        if !(self.grid.world_size.is_finite() && self.grid.world_size > 0.0) {
            return Err(SwarmError::config(format!(
                "grid.world_size must be finite and positive, got {}",
                self.grid.world_size
            )));
        }

        let dispatch = &self.dispatch;
        if dispatch.threads_per_group == 0 || dispatch.threads_per_group > 256 {
            return Err(SwarmError::config(format!(
                "dispatch.threads_per_group must be in 1..=256, got {}",
                dispatch.threads_per_group
            )));
        }
        for (name, value) in [
            ("max_workgroups_per_chunk", dispatch.max_workgroups_per_chunk),
            (
                "degraded_max_workgroups_per_chunk",
                dispatch.degraded_max_workgroups_per_chunk,
            ),
        ] {
            if value == 0 || value > MAX_WORKGROUPS_PER_DIMENSION {
                return Err(SwarmError::config(format!(
                    "dispatch.{} must be in 1..={}, got {}",
                    name, MAX_WORKGROUPS_PER_DIMENSION, value
                )));
            }
        }

        // One grid rebuild launch covers every cell
        let cells = (self.grid.resolution as u64).pow(2);
        if cells > u32::MAX as u64 {
            return Err(SwarmError::config(format!(
                "grid.resolution {} gives {} cells, more than a u32 can index",
                self.grid.resolution, cells
            )));
        }
        let grid_workgroups = cells.div_ceil(dispatch.threads_per_group as u64);
        if grid_workgroups > MAX_WORKGROUPS_PER_DIMENSION as u64 {
            return Err(SwarmError::config(format!(
                "grid.resolution {} needs {} workgroups of {} threads to rebuild, limit is {}",
                self.grid.resolution,
                grid_workgroups,
                dispatch.threads_per_group,
                MAX_WORKGROUPS_PER_DIMENSION
            )));
        }

        if !(self.stagger.max_delay.is_finite() && self.stagger.max_delay >= 0.0) {
            return Err(SwarmError::config(format!(
                "stagger.max_delay must be finite and >= 0, got {}",
                self.stagger.max_delay
            )));
        }
        if !(self.health.frame_budget_ms.is_finite() && self.health.frame_budget_ms > 0.0) {
            return Err(SwarmError::config(format!(
                "health.frame_budget_ms must be finite and > 0, got {}",
                self.health.frame_budget_ms
            )));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
