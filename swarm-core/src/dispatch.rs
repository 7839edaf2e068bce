//! # Dispatch Planning
//!
//! Turns an item count into a workgroup budget and, when the budget is
//! larger than one launch may be, into a sequence of chunks.
//!
//! ## Rules
//!
//! - `total = ceil(items / threads_per_group)`
//! - Chunking is used when `total > max_per_chunk` or when forced
//! - A plan over [`MAX_WORKGROUPS_PER_DIMENSION`] is rejected outright;
//!   the caller skips that dispatch for the frame
//! - Each chunk launches `min(remaining, max_per_chunk)` workgroups and
//!   carries the index of its first item so kernels can offset into the
//!   channel buffers
//!
//! Pacing sits in front of planning: while the health oracle reports a
//! degraded GPU, chunks shrink and chunking is forced.

use crate::config::DispatchConfig;
use crate::error::{SwarmError, SwarmResult};
use crate::traits::GpuHealthOracle;
use crate::MAX_WORKGROUPS_PER_DIMENSION;

/// Workgroup budget for one kernel launch sequence
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchPlan {
    /// Items the plan has to cover
    pub work_items: u32,
    pub threads_per_group: u32,
    pub total_workgroups: u32,
    pub max_workgroups_per_chunk: u32,
    pub use_chunking: bool,
}

/// One launch of a chunked plan
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchChunk {
    pub index: u32,
    pub first_workgroup: u32,
    pub workgroups: u32,
    /// First item covered by this launch
    pub item_offset: u32,
    /// Items covered, the last chunk may cover fewer than `workgroups * threads`
    pub item_count: u32,
}

/// Plan a launch sequence over `item_count` items
pub fn plan_dispatch(
    item_count: u32,
    threads_per_group: u32,
    max_workgroups_per_chunk: u32,
    force_chunking: bool,
) -> SwarmResult<DispatchPlan> {
    if threads_per_group == 0 {
        return Err(SwarmError::config("threads_per_group must be > 0"));
    }
    if max_workgroups_per_chunk == 0 {
        return Err(SwarmError::config("max_workgroups_per_chunk must be > 0"));
    }

    let total = (item_count as u64).div_ceil(threads_per_group as u64);
    if total > MAX_WORKGROUPS_PER_DIMENSION as u64 {
        return Err(SwarmError::WorkgroupLimit {
            total,
            limit: MAX_WORKGROUPS_PER_DIMENSION,
        });
    }
    let total = total as u32;
    let max_workgroups_per_chunk = max_workgroups_per_chunk.min(MAX_WORKGROUPS_PER_DIMENSION);

    Ok(DispatchPlan {
        work_items: item_count,
        threads_per_group,
        total_workgroups: total,
        max_workgroups_per_chunk,
        use_chunking: total > max_workgroups_per_chunk || force_chunking,
    })
}

/// Plan the grid rebuild, which clears every cell and inserts every entity
/// with the same launch sequence: `total = max(entity groups, clear groups)`.
pub fn plan_grid_rebuild(
    entity_count: u32,
    cell_count: u32,
    threads_per_group: u32,
    max_workgroups_per_chunk: u32,
    force_chunking: bool,
) -> SwarmResult<DispatchPlan> {
    // ceil is monotonic, so sizing by the larger domain yields
    // max(ceil(entities / t), ceil(cells / t)) workgroups
    plan_dispatch(
        entity_count.max(cell_count),
        threads_per_group,
        max_workgroups_per_chunk,
        force_chunking,
    )
}

impl DispatchPlan {
    /// Launches in submission order
    pub fn chunks(&self) -> DispatchChunks {
        let step = if self.use_chunking {
            self.max_workgroups_per_chunk
        } else {
            self.total_workgroups
        };
        DispatchChunks {
            plan: *self,
            step: step.max(1),
            next_workgroup: 0,
            index: 0,
        }
    }

    pub fn chunk_count(&self) -> u32 {
        if self.total_workgroups == 0 {
            0
        } else if self.use_chunking {
            self.total_workgroups.div_ceil(self.max_workgroups_per_chunk)
        } else {
            1
        }
    }
}

/// Iterator over the chunks of a [`DispatchPlan`]
pub struct DispatchChunks {
    plan: DispatchPlan,
    step: u32,
    next_workgroup: u32,
    index: u32,
}

impl Iterator for DispatchChunks {
    type Item = DispatchChunk;

    fn next(&mut self) -> Option<DispatchChunk> {
        let remaining = self.plan.total_workgroups - self.next_workgroup;
        if remaining == 0 {
            return None;
        }

        let workgroups = remaining.min(self.step);
        let item_offset = self.next_workgroup * self.plan.threads_per_group;
        let item_count =
            (workgroups * self.plan.threads_per_group).min(self.plan.work_items - item_offset);

        let chunk = DispatchChunk {
            index: self.index,
            first_workgroup: self.next_workgroup,
            workgroups,
            item_offset,
            item_count,
        };
        self.next_workgroup += workgroups;
        self.index += 1;
        Some(chunk)
    }
}

/// Chunking limits in force for one frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacingDecision {
    pub max_workgroups_per_chunk: u32,
    pub force_chunking: bool,
    pub degraded: bool,
}

impl PacingDecision {
    /// Limits straight from config, no back-off
    pub fn nominal(config: &DispatchConfig) -> Self {
        Self {
            max_workgroups_per_chunk: config.max_workgroups_per_chunk,
            force_chunking: config.force_chunking,
            degraded: false,
        }
    }
}

/// Consult the oracle and derive this frame's chunking limits
pub fn pace(oracle: &dyn GpuHealthOracle, config: &DispatchConfig) -> PacingDecision {
    if oracle.is_healthy() {
        return PacingDecision::nominal(config);
    }

    let recommendation = oracle.recovery_recommendation();
    let reduced = if recommendation.should_reduce_workload
        && recommendation.recommended_max_workgroups > 0
    {
        recommendation.recommended_max_workgroups
    } else {
        config.degraded_max_workgroups_per_chunk
    };

    PacingDecision {
        max_workgroups_per_chunk: reduced.min(config.max_workgroups_per_chunk).max(1),
        force_chunking: true,
        degraded: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::RecoveryRecommendation;

    struct Degraded(RecoveryRecommendation);

    impl GpuHealthOracle for Degraded {
        fn is_healthy(&self) -> bool {
            false
        }

        fn recovery_recommendation(&self) -> RecoveryRecommendation {
            self.0
        }
    }

    #[test]
    fn test_single_launch_when_it_fits() {
        let plan = plan_dispatch(10_000, 64, 4096, false).unwrap();
        assert_eq!(plan.total_workgroups, 157);
        assert!(!plan.use_chunking);

        let chunks: Vec<_> = plan.chunks().collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].workgroups, 157);
        assert_eq!(chunks[0].item_offset, 0);
        assert_eq!(chunks[0].item_count, 10_000);
    }

    #[test]
    fn test_chunking_when_over_max() {
        let plan = plan_dispatch(131_072, 64, 500, false).unwrap();
        assert_eq!(plan.total_workgroups, 2048);
        assert!(plan.use_chunking);
        assert_eq!(plan.chunk_count(), 5);

        let sizes: Vec<u32> = plan.chunks().map(|c| c.workgroups).collect();
        assert_eq!(sizes, vec![500, 500, 500, 500, 48]);
    }

    #[test]
    fn test_forced_chunking() {
        let plan = plan_dispatch(100, 64, 4096, true).unwrap();
        assert!(plan.use_chunking);
        assert_eq!(plan.chunk_count(), 1);
    }

    #[test]
    fn test_rejects_plans_over_the_workgroup_limit() {
        let err = plan_dispatch(90_000_000, 64, 4096, false).unwrap_err();
        assert!(matches!(
            err,
            SwarmError::WorkgroupLimit {
                total: 1_406_250,
                limit: 65_535
            }
        ));

        assert!(plan_dispatch(65_535 * 64, 64, 4096, false).is_ok());
        assert!(plan_dispatch(65_535 * 64 + 1, 64, 4096, false).is_err());
    }

    #[test]
    fn test_empty_plan_has_no_chunks() {
        let plan = plan_dispatch(0, 64, 4096, true).unwrap();
        assert_eq!(plan.total_workgroups, 0);
        assert_eq!(plan.chunks().count(), 0);
        assert_eq!(plan.chunk_count(), 0);
    }

    #[test]
    fn test_grid_rebuild_covers_larger_domain() {
        // Few entities: the clear of 16384 cells dominates
        let plan = plan_grid_rebuild(100, 16_384, 64, 4096, false).unwrap();
        assert_eq!(plan.total_workgroups, 256);

        // Many entities: insertion dominates
        let plan = plan_grid_rebuild(131_072, 16_384, 64, 4096, false).unwrap();
        assert_eq!(plan.total_workgroups, 2048);
    }

    #[test]
    fn test_chunks_cover_items_exactly_once() {
        for &items in &[1u32, 63, 64, 65, 1000, 4097, 131_072, 200_003] {
            for &max in &[1u32, 3, 7, 64, 4096] {
                for &threads in &[32u32, 64, 256] {
                    let plan = match plan_dispatch(items, threads, max, false) {
                        Ok(plan) => plan,
                        Err(_) => continue,
                    };
                    let mut expected = 0;
                    for chunk in plan.chunks() {
                        assert_eq!(chunk.item_offset, expected);
                        assert!(chunk.item_count > 0);
                        assert!(chunk.workgroups <= plan.max_workgroups_per_chunk);
                        expected += chunk.item_count;
                    }
                    assert_eq!(expected, items);
                }
            }
        }
    }

    #[test]
    fn test_pacing_follows_oracle() {
        let config = DispatchConfig::default();
        let healthy = crate::health::SteadyHealth;
        assert_eq!(pace(&healthy, &config), PacingDecision::nominal(&config));

        let recommended = Degraded(RecoveryRecommendation {
            should_reduce_workload: true,
            should_split_dispatches: true,
            recommended_max_workgroups: 100,
        });
        let decision = pace(&recommended, &config);
        assert!(decision.degraded);
        assert!(decision.force_chunking);
        assert_eq!(decision.max_workgroups_per_chunk, 100);

        let silent = Degraded(RecoveryRecommendation::default());
        let decision = pace(&silent, &config);
        assert_eq!(
            decision.max_workgroups_per_chunk,
            config.degraded_max_workgroups_per_chunk
        );
        assert!(decision.force_chunking);
    }
}
