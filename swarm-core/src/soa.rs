//! # Structure of Arrays (SoA) Channels
//!
//! Every simulation attribute lives in its own GPU buffer, indexed by the
//! entity's dense slot. A slot `i` owns element `i` of every channel; the
//! channels are never resized independently.
//!
//! Element types are 16-byte aligned so they map one-to-one onto the
//! WGSL structs declared in the compute kernels.

use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::error::{SwarmError, SwarmResult};
use crate::stagger::StaggerGenerator;

/// Linear velocity plus per-entity damping
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct EntityVelocity {
    pub velocity: [f32; 3],
    /// Fraction of the previous velocity kept each frame (0..1)
    pub damping: f32,
}

/// Oscillating movement pattern
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct MovementParams {
    pub amplitude: f32,
    pub frequency: f32,
    pub phase: f32,
    pub time_offset: f32,
}

/// Point the movement pattern orbits
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct MovementCenter {
    pub center: [f32; 3],
    pub _pad: f32,
}

/// Per-entity runtime bookkeeping, owned by the movement kernel
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct RuntimeState {
    pub accumulated_time: f32,
    /// 0 until the movement kernel has seen the entity once
    pub initialized: u32,
    /// Seconds left before the entity starts moving
    pub stagger_timer: f32,
    /// A [`MotionPhase`] discriminant
    pub state: u32,
}

impl RuntimeState {
    pub fn new(stagger_timer: f32) -> Self {
        Self {
            accumulated_time: 0.0,
            initialized: 0,
            stagger_timer,
            state: MotionPhase::Pending as u32,
        }
    }

    pub fn phase(&self) -> Option<MotionPhase> {
        MotionPhase::from_u32(self.state)
    }
}

/// Lifecycle of an entity's movement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum MotionPhase {
    /// Not yet touched by the movement kernel
    Pending = 0,
    /// Waiting for the stagger timer to run out
    Staggered = 1,
    /// Following its movement pattern
    Active = 2,
}

impl MotionPhase {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Pending),
            1 => Some(Self::Staggered),
            2 => Some(Self::Active),
            _ => None,
        }
    }
}

/// Rotation about the world Z axis
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct RotationState {
    pub angle: f32,
    pub angular_velocity: f32,
    pub angular_damping: f32,
    pub _pad: f32,
}

/// Linear RGBA color
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct EntityColor {
    pub rgba: [f32; 4],
}

/// Column-major 4x4 model matrix; column 3 holds the translation
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct EntityTransform {
    pub columns: [[f32; 4]; 4],
}

impl EntityTransform {
    pub const IDENTITY: Self = Self {
        columns: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub fn from_translation(translation: [f32; 3]) -> Self {
        Self::from_translation_scale(translation, 1.0)
    }

    pub fn from_translation_scale(translation: [f32; 3], scale: f32) -> Self {
        let mut transform = Self::IDENTITY;
        for axis in 0..3 {
            transform.columns[axis][axis] = scale;
        }
        transform.columns[3] = [translation[0], translation[1], translation[2], 1.0];
        transform
    }

    pub fn translation(&self) -> [f32; 3] {
        let t = self.columns[3];
        [t[0], t[1], t[2]]
    }
}

impl Default for EntityTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// World-space position (xyz, w unused)
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct EntityPosition {
    pub position: [f32; 3],
    pub _pad: f32,
}

impl EntityPosition {
    pub fn new(position: [f32; 3]) -> Self {
        Self { position, _pad: 0.0 }
    }
}

/// Every GPU buffer owned by the store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Velocity,
    MovementParams,
    MovementCenter,
    RuntimeState,
    Rotation,
    Color,
    Transform,
    PositionPrimary,
    PositionAlternate,
    PositionCurrent,
    PositionTarget,
}

impl Channel {
    pub const ALL: [Channel; 11] = [
        Channel::Velocity,
        Channel::MovementParams,
        Channel::MovementCenter,
        Channel::RuntimeState,
        Channel::Rotation,
        Channel::Color,
        Channel::Transform,
        Channel::PositionPrimary,
        Channel::PositionAlternate,
        Channel::PositionCurrent,
        Channel::PositionTarget,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Channel::Velocity => "Velocity Buffer",
            Channel::MovementParams => "Movement Params Buffer",
            Channel::MovementCenter => "Movement Center Buffer",
            Channel::RuntimeState => "Runtime State Buffer",
            Channel::Rotation => "Rotation Buffer",
            Channel::Color => "Color Buffer",
            Channel::Transform => "Transform Buffer",
            Channel::PositionPrimary => "Position Primary Buffer",
            Channel::PositionAlternate => "Position Alternate Buffer",
            Channel::PositionCurrent => "Position Current Buffer",
            Channel::PositionTarget => "Position Target Buffer",
        }
    }

    /// Bytes per entity
    pub fn element_size(self) -> u64 {
        let size = match self {
            Channel::Velocity => std::mem::size_of::<EntityVelocity>(),
            Channel::MovementParams => std::mem::size_of::<MovementParams>(),
            Channel::MovementCenter => std::mem::size_of::<MovementCenter>(),
            Channel::RuntimeState => std::mem::size_of::<RuntimeState>(),
            Channel::Rotation => std::mem::size_of::<RotationState>(),
            Channel::Color => std::mem::size_of::<EntityColor>(),
            Channel::Transform => std::mem::size_of::<EntityTransform>(),
            Channel::PositionPrimary
            | Channel::PositionAlternate
            | Channel::PositionCurrent
            | Channel::PositionTarget => std::mem::size_of::<EntityPosition>(),
        };
        size as u64
    }

    pub fn is_position(self) -> bool {
        matches!(
            self,
            Channel::PositionPrimary
                | Channel::PositionAlternate
                | Channel::PositionCurrent
                | Channel::PositionTarget
        )
    }
}

/// Fixed indices of the binding table shared by every kernel.
///
/// Slots 13..=15 are reserved and never populated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum BindingSlot {
    Velocity = 0,
    MovementParams = 1,
    MovementCenter = 2,
    RuntimeState = 3,
    Rotation = 4,
    Color = 5,
    Transform = 6,
    /// Last completed position write (read-only in compute)
    PositionSource = 7,
    /// This frame's position write target
    PositionDestination = 8,
    PositionCurrent = 9,
    PositionTarget = 10,
    GridCells = 11,
    EntityCells = 12,
}

impl BindingSlot {
    pub const ASSIGNED: [BindingSlot; 13] = [
        BindingSlot::Velocity,
        BindingSlot::MovementParams,
        BindingSlot::MovementCenter,
        BindingSlot::RuntimeState,
        BindingSlot::Rotation,
        BindingSlot::Color,
        BindingSlot::Transform,
        BindingSlot::PositionSource,
        BindingSlot::PositionDestination,
        BindingSlot::PositionCurrent,
        BindingSlot::PositionTarget,
        BindingSlot::GridCells,
        BindingSlot::EntityCells,
    ];

    pub fn index(self) -> u32 {
        self as u32
    }

    /// Slot at `index`, `None` for reserved or out-of-range indices
    pub fn from_index(index: u32) -> Option<Self> {
        Self::ASSIGNED.get(index as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            BindingSlot::Velocity => "velocity",
            BindingSlot::MovementParams => "movement_params",
            BindingSlot::MovementCenter => "movement_center",
            BindingSlot::RuntimeState => "runtime_state",
            BindingSlot::Rotation => "rotation",
            BindingSlot::Color => "color",
            BindingSlot::Transform => "transform",
            BindingSlot::PositionSource => "position_source",
            BindingSlot::PositionDestination => "position_destination",
            BindingSlot::PositionCurrent => "position_current",
            BindingSlot::PositionTarget => "position_target",
            BindingSlot::GridCells => "grid_cells",
            BindingSlot::EntityCells => "entity_cells",
        }
    }
}

/// How an entity moves, as supplied by the authoring layer
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MovementPattern {
    pub amplitude: f32,
    pub frequency: f32,
    pub phase: f32,
    pub time_offset: f32,
    pub damping: f32,
    pub initial_velocity: [f32; 3],
    pub angular_velocity: f32,
    pub angular_damping: f32,
}

impl Default for MovementPattern {
    fn default() -> Self {
        Self {
            amplitude: 10.0,
            frequency: 1.0,
            phase: 0.0,
            time_offset: 0.0,
            damping: 0.9,
            initial_velocity: [0.0; 3],
            angular_velocity: 0.0,
            angular_damping: 0.0,
        }
    }
}

/// One entity as handed over by the authoring layer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EntityDescriptor {
    pub transform: EntityTransform,
    pub color: [f32; 4],
    pub movement: MovementPattern,
}

impl EntityDescriptor {
    pub fn at(position: [f32; 3]) -> Self {
        Self {
            transform: EntityTransform::from_translation(position),
            color: [1.0; 4],
            movement: MovementPattern::default(),
        }
    }
}

/// CPU-side SoA mirror of entities waiting for upload
#[derive(Clone, Debug, Default)]
pub struct StagingBatch {
    pub velocities: Vec<EntityVelocity>,
    pub movement: Vec<MovementParams>,
    pub centers: Vec<MovementCenter>,
    pub runtime: Vec<RuntimeState>,
    pub rotations: Vec<RotationState>,
    pub colors: Vec<EntityColor>,
    pub transforms: Vec<EntityTransform>,
    pub positions: Vec<EntityPosition>,
}

impl StagingBatch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            velocities: Vec::with_capacity(capacity),
            movement: Vec::with_capacity(capacity),
            centers: Vec::with_capacity(capacity),
            runtime: Vec::with_capacity(capacity),
            rotations: Vec::with_capacity(capacity),
            colors: Vec::with_capacity(capacity),
            transforms: Vec::with_capacity(capacity),
            positions: Vec::with_capacity(capacity),
        }
    }

    /// Stage one entity. The movement centre is the spawn position.
    pub fn push(&mut self, entity: &EntityDescriptor, stagger: &mut StaggerGenerator) {
        let translation = entity.transform.translation();
        let pattern = &entity.movement;

        self.velocities.push(EntityVelocity {
            velocity: pattern.initial_velocity,
            damping: pattern.damping,
        });
        self.movement.push(MovementParams {
            amplitude: pattern.amplitude,
            frequency: pattern.frequency,
            phase: pattern.phase,
            time_offset: pattern.time_offset,
        });
        self.centers.push(MovementCenter {
            center: translation,
            _pad: 0.0,
        });
        self.runtime.push(RuntimeState::new(stagger.next_delay()));
        self.rotations.push(RotationState {
            angle: 0.0,
            angular_velocity: pattern.angular_velocity,
            angular_damping: pattern.angular_damping,
            _pad: 0.0,
        });
        self.colors.push(EntityColor { rgba: entity.color });
        self.transforms.push(entity.transform);
        self.positions.push(EntityPosition::new(translation));
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn clear(&mut self) {
        self.velocities.clear();
        self.movement.clear();
        self.centers.clear();
        self.runtime.clear();
        self.rotations.clear();
        self.colors.clear();
        self.transforms.clear();
        self.positions.clear();
    }

    /// Raw bytes staged for `channel`
    pub fn channel_bytes(&self, channel: Channel) -> &[u8] {
        match channel {
            Channel::Velocity => bytemuck::cast_slice(&self.velocities),
            Channel::MovementParams => bytemuck::cast_slice(&self.movement),
            Channel::MovementCenter => bytemuck::cast_slice(&self.centers),
            Channel::RuntimeState => bytemuck::cast_slice(&self.runtime),
            Channel::Rotation => bytemuck::cast_slice(&self.rotations),
            Channel::Color => bytemuck::cast_slice(&self.colors),
            Channel::Transform => bytemuck::cast_slice(&self.transforms),
            Channel::PositionPrimary
            | Channel::PositionAlternate
            | Channel::PositionCurrent
            | Channel::PositionTarget => bytemuck::cast_slice(&self.positions),
        }
    }

    /// Every channel must hold the same number of elements
    pub fn check_aligned(&self) -> SwarmResult<()> {
        let len = self.len();
        let lengths = [
            self.velocities.len(),
            self.movement.len(),
            self.centers.len(),
            self.runtime.len(),
            self.rotations.len(),
            self.colors.len(),
            self.transforms.len(),
        ];
        if lengths.iter().any(|&l| l != len) {
            return Err(SwarmError::invalid_state(format!(
                "staging channels out of alignment: positions={} others={:?}",
                len, lengths
            )));
        }
        Ok(())
    }
}

/// Append-only occupancy of a fixed-capacity slot range.
///
/// Slots are handed out densely from 0; the only way to reclaim them is
/// [`SlotArena::reset`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotArena {
    capacity: u32,
    active: u32,
}

impl SlotArena {
    pub fn new(capacity: u32) -> Self {
        Self { capacity, active: 0 }
    }

    /// Reserve `count` consecutive slots, or nothing at all
    pub fn reserve(&mut self, count: u32) -> SwarmResult<Range<u32>> {
        let available = self.remaining();
        if count > available {
            return Err(SwarmError::Capacity {
                requested: count,
                available,
            });
        }
        let start = self.active;
        self.active += count;
        Ok(start..self.active)
    }

    pub fn reset(&mut self) {
        self.active = 0;
    }

    pub fn active(&self) -> u32 {
        self.active
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn remaining(&self) -> u32 {
        self.capacity - self.active
    }

    pub fn contains(&self, slot: u32) -> bool {
        slot < self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sizes() {
        assert_eq!(std::mem::size_of::<EntityVelocity>(), 16);
        assert_eq!(std::mem::size_of::<MovementParams>(), 16);
        assert_eq!(std::mem::size_of::<MovementCenter>(), 16);
        assert_eq!(std::mem::size_of::<RuntimeState>(), 16);
        assert_eq!(std::mem::size_of::<RotationState>(), 16);
        assert_eq!(std::mem::size_of::<EntityColor>(), 16);
        assert_eq!(std::mem::size_of::<EntityTransform>(), 64);
        assert_eq!(std::mem::size_of::<EntityPosition>(), 16);
    }

    #[test]
    fn test_transform_translation_column() {
        let t = EntityTransform::from_translation_scale([1.0, -2.0, 3.0], 2.0);
        assert_eq!(t.translation(), [1.0, -2.0, 3.0]);
        assert_eq!(t.columns[0][0], 2.0);
        assert_eq!(t.columns[3][3], 1.0);
    }

    #[test]
    fn test_binding_slot_indices() {
        assert_eq!(BindingSlot::Velocity.index(), 0);
        assert_eq!(BindingSlot::PositionSource.index(), 7);
        assert_eq!(BindingSlot::EntityCells.index(), 12);
        for slot in BindingSlot::ASSIGNED {
            assert_eq!(BindingSlot::from_index(slot.index()), Some(slot));
        }
        assert_eq!(BindingSlot::from_index(13), None);
        assert_eq!(BindingSlot::from_index(15), None);
    }

    #[test]
    fn test_staging_push_keeps_channels_aligned() {
        let mut stagger = StaggerGenerator::new(7, 1.0);
        let mut batch = StagingBatch::default();
        for i in 0..10 {
            batch.push(&EntityDescriptor::at([i as f32, 0.0, 0.0]), &mut stagger);
        }
        assert_eq!(batch.len(), 10);
        assert!(batch.check_aligned().is_ok());
        assert_eq!(batch.centers[3].center, [3.0, 0.0, 0.0]);
        assert_eq!(batch.positions[3].position, [3.0, 0.0, 0.0]);
        assert_eq!(batch.runtime[3].phase(), Some(MotionPhase::Pending));
        assert_eq!(
            batch.channel_bytes(Channel::Transform).len(),
            10 * Channel::Transform.element_size() as usize
        );

        batch.velocities.pop();
        assert!(batch.check_aligned().is_err());

        batch.clear();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_arena_reserve_is_all_or_nothing() {
        let mut arena = SlotArena::new(100);
        assert_eq!(arena.reserve(60).unwrap(), 0..60);

        let err = arena.reserve(41).unwrap_err();
        assert!(matches!(
            err,
            SwarmError::Capacity {
                requested: 41,
                available: 40
            }
        ));
        assert_eq!(arena.active(), 60);

        assert_eq!(arena.reserve(40).unwrap(), 60..100);
        assert_eq!(arena.remaining(), 0);
        assert!(arena.contains(99));
        assert!(!arena.contains(100));

        arena.reset();
        assert_eq!(arena.active(), 0);
        assert_eq!(arena.reserve(1).unwrap(), 0..1);
    }
}
