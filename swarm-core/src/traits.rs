//! # Traits - Seams Between the Simulation and Its Host
//!
//! - `GpuHealthOracle`: tells the scheduler whether to back off
//! - `FrameStats`: counters accumulated by the scheduler and facade

/// Recovery hint from a degraded GPU
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoveryRecommendation {
    pub should_reduce_workload: bool,
    pub should_split_dispatches: bool,
    /// Suggested chunk size, 0 when the oracle has no opinion
    pub recommended_max_workgroups: u32,
}

/// GPU health oracle, queried once per frame before dispatch planning
pub trait GpuHealthOracle: Send + Sync {
    /// Whether the GPU is keeping up
    fn is_healthy(&self) -> bool;

    /// How to back off while unhealthy
    fn recovery_recommendation(&self) -> RecoveryRecommendation;
}

/// Simulation statistics
#[derive(Clone, Debug, Default)]
pub struct FrameStats {
    /// Frames submitted
    pub frames: u64,

    /// Frames in which positions advanced
    pub simulated_frames: u64,

    /// Compute launches recorded
    pub dispatches: u64,

    /// Compute passes opened
    pub passes: u64,

    /// Barriers recorded (between chunks, phases, and before graphics)
    pub barriers: u64,

    /// Node executions skipped for any reason
    pub skipped_nodes: u64,

    /// Plans rejected for exceeding the workgroup limit
    pub rejected_plans: u64,

    /// Frames planned under degraded pacing
    pub degraded_frames: u64,

    /// Entities uploaded since start
    pub uploaded_entities: u64,
}
