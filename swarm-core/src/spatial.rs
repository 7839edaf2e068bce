//! # Spatial Hash Grid
//!
//! Uniform 2D grid over a square world centred on the origin. Each cell
//! holds up to [`MAX_ENTITIES_PER_CELL`] entity indices; insertions beyond
//! that are dropped.
//!
//! ## Coordinate Mapping
//!
//! 1. Shift the position by half the world size so it lands in `[0, world_size]`
//! 2. Divide by the cell size and truncate
//! 3. Clamp each axis to `[0, resolution - 1]`
//!
//! Positions outside the world collapse onto the boundary cells, so edge
//! cells can fill up with entities that are nowhere near them.
//!
//! [`HostGrid`] mirrors the GPU buffer layout and insertion rule exactly. It
//! is used to reason about occupancy on the CPU and to check readbacks.

use bytemuck::{Pod, Zeroable};

use crate::config::GridConfig;
use crate::error::{SwarmError, SwarmResult};
use crate::{INVALID_ENTITY, MAX_ENTITIES_PER_CELL};

/// GPU-compatible grid cell
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct GridCell {
    /// Occupied slots, never above `MAX_ENTITIES_PER_CELL`
    pub count: u32,
    /// Entity indices, `INVALID_ENTITY` when empty
    pub entities: [u32; MAX_ENTITIES_PER_CELL],
    /// Padding for alignment
    pub _pad: [u32; 3],
}

impl GridCell {
    pub const CLEARED: Self = Self {
        count: 0,
        entities: [INVALID_ENTITY; MAX_ENTITIES_PER_CELL],
        _pad: [0; 3],
    };

    /// Bounded insert: check the count, then claim the slot it names.
    /// Returns the slot used, or `None` if the cell is full.
    pub fn try_insert(&mut self, entity: u32) -> Option<u32> {
        let slot = self.count;
        if slot as usize >= MAX_ENTITIES_PER_CELL {
            return None;
        }
        self.entities[slot as usize] = entity;
        self.count = slot + 1;
        Some(slot)
    }

    pub fn occupants(&self) -> &[u32] {
        let count = (self.count as usize).min(MAX_ENTITIES_PER_CELL);
        &self.entities[..count]
    }

    pub fn is_full(&self) -> bool {
        self.count as usize >= MAX_ENTITIES_PER_CELL
    }
}

impl Default for GridCell {
    fn default() -> Self {
        Self::CLEARED
    }
}

/// Grid geometry and the coordinate math shared with the WGSL kernels
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridLayout {
    resolution: u32,
    world_size: f32,
    cell_size: f32,
}

impl GridLayout {
    pub fn new(resolution: u32, world_size: f32) -> SwarmResult<Self> {
        if resolution == 0 {
            return Err(SwarmError::config("grid resolution must be > 0"));
        }
        if resolution.checked_mul(resolution).is_none() {
            return Err(SwarmError::config(format!(
                "grid resolution {} has more cells than a u32 can index",
                resolution
            )));
        }
        if !(world_size.is_finite() && world_size > 0.0) {
            return Err(SwarmError::config(format!(
                "grid world size must be finite and positive, got {}",
                world_size
            )));
        }
        Ok(Self {
            resolution,
            world_size,
            cell_size: world_size / resolution as f32,
        })
    }

    pub fn from_config(config: &GridConfig) -> SwarmResult<Self> {
        Self::new(config.resolution, config.world_size)
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn world_size(&self) -> f32 {
        self.world_size
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn cell_count(&self) -> u32 {
        self.resolution * self.resolution
    }

    /// Byte size of the grid buffer
    pub fn buffer_size(&self) -> u64 {
        self.cell_count() as u64 * std::mem::size_of::<GridCell>() as u64
    }

    pub fn world_to_cell_coords(&self, x: f32, y: f32) -> (u32, u32) {
        (self.axis_to_cell(x), self.axis_to_cell(y))
    }

    fn axis_to_cell(&self, v: f32) -> u32 {
        // NaN falls through both clamps and casts to 0
        let normalized = (v + self.world_size * 0.5).clamp(0.0, self.world_size);
        let cell = (normalized / self.cell_size) as u32;
        cell.min(self.resolution - 1)
    }

    pub fn cell_coords_to_index(&self, gx: u32, gy: u32) -> u32 {
        gy * self.resolution + gx
    }

    pub fn world_to_cell(&self, x: f32, y: f32) -> u32 {
        let (gx, gy) = self.world_to_cell_coords(x, y);
        self.cell_coords_to_index(gx, gy)
    }

    pub fn index_to_cell_coords(&self, index: u32) -> (u32, u32) {
        (index % self.resolution, index / self.resolution)
    }

    /// Centre of the cell in world space
    pub fn cell_to_world(&self, index: u32) -> (f32, f32) {
        let (gx, gy) = self.index_to_cell_coords(index);
        let half = self.world_size * 0.5;
        (
            (gx as f32 + 0.5) * self.cell_size - half,
            (gy as f32 + 0.5) * self.cell_size - half,
        )
    }

    /// Indices of the cell containing `(x, y)` and its in-bounds neighbours
    pub fn neighborhood(&self, x: f32, y: f32) -> Vec<u32> {
        let (gx, gy) = self.world_to_cell_coords(x, y);
        let mut cells = Vec::with_capacity(9);
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let nx = gx as i64 + dx;
                let ny = gy as i64 + dy;
                if nx < 0 || ny < 0 || nx >= self.resolution as i64 || ny >= self.resolution as i64
                {
                    continue;
                }
                cells.push(self.cell_coords_to_index(nx as u32, ny as u32));
            }
        }
        cells
    }
}

impl Default for GridLayout {
    fn default() -> Self {
        let config = GridConfig::default();
        Self {
            resolution: config.resolution,
            world_size: config.world_size,
            cell_size: config.world_size / config.resolution as f32,
        }
    }
}

/// Outcome of a host-side insertion
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Insertion {
    Stored { cell: u32, slot: u32 },
    Dropped { cell: u32 },
}

/// CPU model of the GPU grid buffer
pub struct HostGrid {
    layout: GridLayout,
    cells: Vec<GridCell>,
    entity_cells: Vec<u32>,
}

impl HostGrid {
    pub fn new(layout: GridLayout) -> Self {
        Self {
            layout,
            cells: vec![GridCell::CLEARED; layout.cell_count() as usize],
            entity_cells: Vec::new(),
        }
    }

    /// Rebuild from a readback of the GPU grid buffer
    pub fn from_cells(layout: GridLayout, cells: Vec<GridCell>) -> SwarmResult<Self> {
        if cells.len() != layout.cell_count() as usize {
            return Err(SwarmError::invalid_state(format!(
                "grid readback has {} cells, layout expects {}",
                cells.len(),
                layout.cell_count()
            )));
        }
        Ok(Self {
            layout,
            cells,
            entity_cells: Vec::new(),
        })
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn clear_all_cells(&mut self) {
        self.cells.fill(GridCell::CLEARED);
        self.entity_cells.clear();
    }

    /// Record the entity's cell and insert it if the cell has room
    pub fn insert(&mut self, entity: u32, x: f32, y: f32) -> Insertion {
        let cell = self.layout.world_to_cell(x, y);
        let index = entity as usize;
        if self.entity_cells.len() <= index {
            self.entity_cells.resize(index + 1, INVALID_ENTITY);
        }
        self.entity_cells[index] = cell;

        match self.cells[cell as usize].try_insert(entity) {
            Some(slot) => Insertion::Stored { cell, slot },
            None => Insertion::Dropped { cell },
        }
    }

    pub fn cell(&self, index: u32) -> Option<&GridCell> {
        self.cells.get(index as usize)
    }

    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    pub fn entity_cell(&self, entity: u32) -> Option<u32> {
        self.entity_cells
            .get(entity as usize)
            .copied()
            .filter(|&c| c != INVALID_ENTITY)
    }

    /// Entities stored in the 3x3 block around `(x, y)`
    pub fn nearby(&self, x: f32, y: f32) -> Vec<u32> {
        self.layout
            .neighborhood(x, y)
            .into_iter()
            .flat_map(|c| self.cells[c as usize].occupants().iter().copied())
            .collect()
    }

    pub fn occupancy(&self) -> GridOccupancy {
        GridOccupancy::from_cells(&self.cells)
    }
}

/// Statistics about grid occupancy
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GridOccupancy {
    /// Cells holding at least one entity
    pub active_cells: usize,

    /// Average entities per active cell
    pub avg_per_active_cell: f32,

    /// Largest count in a single cell
    pub max_in_cell: u32,

    /// Cells at capacity (insertions into them may have been dropped)
    pub saturated_cells: usize,

    /// Entities stored across all cells
    pub stored_entities: u64,
}

impl GridOccupancy {
    pub fn from_cells(cells: &[GridCell]) -> Self {
        let active: Vec<u32> = cells.iter().map(|c| c.count).filter(|&n| n > 0).collect();
        if active.is_empty() {
            return Self::default();
        }

        let stored: u64 = active.iter().map(|&n| n as u64).sum();
        Self {
            active_cells: active.len(),
            avg_per_active_cell: stored as f32 / active.len() as f32,
            max_in_cell: active.iter().copied().max().unwrap_or(0),
            saturated_cells: cells.iter().filter(|c| c.is_full()).count(),
            stored_entities: stored,
        }
    }
}
