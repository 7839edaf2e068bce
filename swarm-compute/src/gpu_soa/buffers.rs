//! SoA buffer store
//!
//! One storage buffer per channel, all sized for the same fixed capacity.
//! Entities are appended densely; the only way to free slots is `clear()`.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use swarm_core::error::{SwarmError, SwarmResult};
use swarm_core::soa::{Channel, SlotArena, StagingBatch};

use crate::context::GpuContext;

/// Size of one channel buffer at a given capacity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelAllocation {
    pub channel: Channel,
    pub bytes: u64,
}

/// Byte sizes of every channel buffer for `max_entities` slots
pub fn channel_allocations(max_entities: u32) -> Vec<ChannelAllocation> {
    Channel::ALL
        .iter()
        .map(|&channel| ChannelAllocation {
            channel,
            bytes: channel.element_size() * max_entities as u64,
        })
        .collect()
}

/// Limits a single allocation and, optionally, the running total
#[derive(Clone, Copy, Debug)]
pub struct AllocationBudget {
    pub per_buffer: u64,
    pub remaining: Option<u64>,
}

impl AllocationBudget {
    fn charge(&mut self, label: &'static str, bytes: u64) -> SwarmResult<()> {
        if bytes > self.per_buffer {
            return Err(SwarmError::Allocation {
                label,
                requested: bytes,
                limit: self.per_buffer,
            });
        }
        if let Some(remaining) = self.remaining.as_mut() {
            if bytes > *remaining {
                return Err(SwarmError::Allocation {
                    label,
                    requested: bytes,
                    limit: *remaining,
                });
            }
            *remaining -= bytes;
        }
        Ok(())
    }
}

/// Create every allocation in order. On the first failure the buffers
/// already created are handed to `destroy` and nothing is returned.
pub fn allocate_all<B>(
    allocations: &[ChannelAllocation],
    budget: &mut AllocationBudget,
    mut create: impl FnMut(&ChannelAllocation) -> B,
    mut destroy: impl FnMut(B),
) -> SwarmResult<Vec<(Channel, B)>> {
    let mut created = Vec::with_capacity(allocations.len());
    for allocation in allocations {
        if let Err(e) = budget.charge(allocation.channel.label(), allocation.bytes) {
            tracing::error!(
                "❌ {} failed, releasing {} buffers already created",
                e,
                created.len()
            );
            for (_, buffer) in created.drain(..) {
                destroy(buffer);
            }
            return Err(e);
        }
        created.push((allocation.channel, create(allocation)));
    }
    Ok(created)
}

/// Fixed-capacity SoA store on the GPU
pub struct SoaBufferStore {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    max_allocation: u64,
    memory_budget: Option<u64>,
    buffers: HashMap<Channel, wgpu::Buffer>,
    arena: SlotArena,
    generation: u64,
}

impl SoaBufferStore {
    /// An empty store; nothing is allocated until [`initialize`](Self::initialize)
    pub fn new(context: &GpuContext, memory_budget_mb: u64) -> Self {
        Self {
            device: context.device.clone(),
            queue: context.queue.clone(),
            max_allocation: context.max_allocation(),
            memory_budget: (memory_budget_mb > 0).then(|| memory_budget_mb * 1024 * 1024),
            buffers: HashMap::new(),
            arena: SlotArena::new(0),
            generation: 0,
        }
    }

    /// Allocate every channel for `max_entities` slots, replacing any
    /// previous allocation. The old buffers are released only once the
    /// new set exists; on failure the store is left as it was.
    pub fn initialize(&mut self, max_entities: u32) -> SwarmResult<()> {
        if max_entities == 0 {
            return Err(SwarmError::config("max_entities must be > 0"));
        }

        let allocations = channel_allocations(max_entities);
        let total_bytes: u64 = allocations.iter().map(|a| a.bytes).sum();
        tracing::info!(
            "🎮 Swarm SoA: Allocating ~{} MB VRAM for {} entities ({} channels)",
            total_bytes / 1024 / 1024,
            max_entities,
            allocations.len()
        );

        let mut budget = AllocationBudget {
            per_buffer: self.max_allocation,
            remaining: self.memory_budget,
        };
        let device = &self.device;
        let created = allocate_all(
            &allocations,
            &mut budget,
            |allocation| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(allocation.channel.label()),
                    size: allocation.bytes,
                    usage: wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::COPY_DST
                        | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                })
            },
            |buffer| buffer.destroy(),
        )?;

        self.teardown();
        self.buffers = created.into_iter().collect();
        self.arena = SlotArena::new(max_entities);
        self.generation += 1;
        Ok(())
    }

    fn teardown(&mut self) {
        if self.buffers.is_empty() {
            return;
        }
        for (_, buffer) in self.buffers.drain() {
            buffer.destroy();
        }
        self.arena = SlotArena::new(0);
        tracing::debug!("🧹 SoA buffers released");
    }

    /// Upload a staged batch at `active_count`. Either every channel
    /// receives the whole batch or nothing is written.
    pub fn append(&mut self, batch: &StagingBatch) -> SwarmResult<Range<u32>> {
        if !self.is_initialized() {
            return Err(SwarmError::invalid_state("append before initialize"));
        }
        batch.check_aligned()?;

        let count = u32::try_from(batch.len()).map_err(|_| SwarmError::Capacity {
            requested: u32::MAX,
            available: self.arena.remaining(),
        })?;
        let range = self.arena.reserve(count).map_err(|e| {
            tracing::warn!(
                "⚠️ Append of {} entities rejected: {} active, capacity {}",
                count,
                self.arena.active(),
                self.arena.capacity()
            );
            e
        })?;

        for channel in Channel::ALL {
            let buffer = self
                .buffers
                .get(&channel)
                .ok_or_else(|| SwarmError::gpu(format!("{} not created", channel.label())))?;
            let offset = range.start as u64 * channel.element_size();
            self.queue.write_buffer(buffer, offset, batch.channel_bytes(channel));
        }

        tracing::debug!(
            "📦 Appended {} entities at [{}, {})",
            count,
            range.start,
            range.end
        );
        Ok(range)
    }

    /// Forget every entity. Buffer contents stay as they are.
    pub fn clear(&mut self) {
        self.arena.reset();
    }

    pub fn buffer(&self, channel: Channel) -> Option<&wgpu::Buffer> {
        self.buffers.get(&channel)
    }

    pub fn is_initialized(&self) -> bool {
        !self.buffers.is_empty()
    }

    pub fn active_count(&self) -> u32 {
        self.arena.active()
    }

    pub fn capacity(&self) -> u32 {
        self.arena.capacity()
    }

    /// Bumped whenever the buffers are replaced
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocations_cover_every_channel() {
        let allocations = channel_allocations(131_072);
        assert_eq!(allocations.len(), 11);
        let transform = allocations
            .iter()
            .find(|a| a.channel == Channel::Transform)
            .unwrap();
        assert_eq!(transform.bytes, 131_072 * 64);
        let total: u64 = allocations.iter().map(|a| a.bytes).sum();
        assert_eq!(total, 131_072 * (10 * 16 + 64));
    }

    #[test]
    fn test_oversized_buffer_fails_before_creation() {
        let allocations = channel_allocations(1_000);
        let mut budget = AllocationBudget {
            per_buffer: 16 * 1_000 - 1,
            remaining: None,
        };
        let mut created = 0;
        let err = allocate_all(&allocations, &mut budget, |_| created += 1, |_| {}).unwrap_err();
        assert!(matches!(err, SwarmError::Allocation { .. }));
        assert_eq!(created, 0);
    }

    #[test]
    fn test_partial_allocation_is_torn_down() {
        let allocations = channel_allocations(1_000);
        // Room for exactly three 16 KB buffers
        let mut budget = AllocationBudget {
            per_buffer: u64::MAX,
            remaining: Some(3 * 16_000),
        };
        let mut destroyed = Vec::new();
        let result = allocate_all(
            &allocations,
            &mut budget,
            |a| a.channel,
            |channel| destroyed.push(channel),
        );

        assert!(matches!(
            result,
            Err(SwarmError::Allocation {
                label: "Runtime State Buffer",
                ..
            })
        ));
        assert_eq!(
            destroyed,
            vec![Channel::Velocity, Channel::MovementParams, Channel::MovementCenter]
        );
    }

    #[test]
    fn test_budget_large_enough_allocates_everything() {
        let allocations = channel_allocations(10);
        let mut budget = AllocationBudget {
            per_buffer: 1024,
            remaining: Some(10 * 224),
        };
        let created = allocate_all(&allocations, &mut budget, |a| a.bytes, |_| {}).unwrap();
        assert_eq!(created.len(), 11);
        assert_eq!(budget.remaining, Some(0));
    }
}
