//! Health oracles.
//!
//! [`SteadyHealth`] never asks for back-off. [`FrameTimeMonitor`] watches
//! frame times and turns unhealthy after a run of over-budget frames, then
//! needs a longer run of in-budget frames before it recovers.

use std::time::Duration;

use parking_lot::Mutex;

use crate::config::HealthConfig;
use crate::traits::{GpuHealthOracle, RecoveryRecommendation};

/// Oracle that always reports a healthy GPU
#[derive(Clone, Copy, Debug, Default)]
pub struct SteadyHealth;

impl GpuHealthOracle for SteadyHealth {
    fn is_healthy(&self) -> bool {
        true
    }

    fn recovery_recommendation(&self) -> RecoveryRecommendation {
        RecoveryRecommendation::default()
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    healthy: bool,
    over_budget_run: u32,
    in_budget_run: u32,
}

/// Frame-time driven oracle with hysteresis
pub struct FrameTimeMonitor {
    config: HealthConfig,
    state: Mutex<MonitorState>,
}

impl FrameTimeMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MonitorState {
                healthy: true,
                ..Default::default()
            }),
        }
    }

    /// Feed the duration of a completed frame
    pub fn record_frame(&self, frame_time: Duration) {
        let over_budget = frame_time.as_secs_f32() * 1000.0 > self.config.frame_budget_ms;
        let mut state = self.state.lock();

        if over_budget {
            state.over_budget_run += 1;
            state.in_budget_run = 0;
            if state.healthy && state.over_budget_run >= self.config.degrade_after_frames {
                state.healthy = false;
                tracing::warn!(
                    "⚠️ GPU degraded: {} consecutive frames over {:.1}ms",
                    state.over_budget_run,
                    self.config.frame_budget_ms
                );
            }
        } else {
            state.in_budget_run += 1;
            state.over_budget_run = 0;
            if !state.healthy && state.in_budget_run >= self.config.recover_after_frames {
                state.healthy = true;
                tracing::info!("✅ GPU recovered after {} frames in budget", state.in_budget_run);
            }
        }
    }
}

impl GpuHealthOracle for FrameTimeMonitor {
    fn is_healthy(&self) -> bool {
        self.state.lock().healthy
    }

    fn recovery_recommendation(&self) -> RecoveryRecommendation {
        if self.is_healthy() {
            return RecoveryRecommendation::default();
        }
        RecoveryRecommendation {
            should_reduce_workload: true,
            should_split_dispatches: true,
            recommended_max_workgroups: self.config.recommended_max_workgroups,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> FrameTimeMonitor {
        FrameTimeMonitor::new(HealthConfig {
            frame_budget_ms: 10.0,
            degrade_after_frames: 3,
            recover_after_frames: 4,
            recommended_max_workgroups: 128,
        })
    }

    #[test]
    fn test_degrades_after_consecutive_slow_frames() {
        let m = monitor();
        let slow = Duration::from_millis(20);
        let fast = Duration::from_millis(2);

        m.record_frame(slow);
        m.record_frame(slow);
        m.record_frame(fast);
        m.record_frame(slow);
        assert!(m.is_healthy());

        m.record_frame(slow);
        m.record_frame(slow);
        assert!(!m.is_healthy());

        let rec = m.recovery_recommendation();
        assert!(rec.should_reduce_workload);
        assert_eq!(rec.recommended_max_workgroups, 128);
    }

    #[test]
    fn test_recovers_after_consecutive_fast_frames() {
        let m = monitor();
        for _ in 0..3 {
            m.record_frame(Duration::from_millis(50));
        }
        assert!(!m.is_healthy());

        for _ in 0..3 {
            m.record_frame(Duration::from_millis(1));
        }
        assert!(!m.is_healthy());
        m.record_frame(Duration::from_millis(1));
        assert!(m.is_healthy());
        assert_eq!(m.recovery_recommendation(), RecoveryRecommendation::default());
    }

    #[test]
    fn test_steady_health() {
        assert!(SteadyHealth.is_healthy());
        assert!(!SteadyHealth.recovery_recommendation().should_reduce_workload);
    }
}
