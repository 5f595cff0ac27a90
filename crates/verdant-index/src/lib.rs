//! Uniform-grid spatial indexing for organism neighborhood queries.

use ordered_float::OrderedFloat;
use std::collections::HashMap;
use std::hash::Hash;
use thiserror::Error;

/// Errors emitted by the spatial index.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., non-positive cell size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Integer triple identifying one grid cell.
pub type CellKey = (i32, i32, i32);

fn distance_squared(a: [f32; 3], b: [f32; 3]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

/// Uniform grid bucketing occupants by quantized position.
///
/// Occupants are identified by a caller-supplied key type and belong to the
/// cell computed by `floor(coord / cell_size)` per axis. A reverse occupancy
/// map keeps relocation O(1) amortized: moving an occupant touches only its
/// old and new buckets, never the whole grid.
///
/// Query results are exact: every query enumerates the cells overlapping the
/// requested radius and filters candidates by Euclidean distance, so the grid
/// is a pure acceleration structure and never an approximation. Candidate
/// cells are walked in fixed nested axis order and buckets preserve insertion
/// order, which makes tie-breaking reproducible.
#[derive(Debug, Clone)]
pub struct UniformGrid<K> {
    cell_size: f32,
    cells: HashMap<CellKey, Vec<(K, [f32; 3])>>,
    occupancy: HashMap<K, CellKey>,
}

impl<K: Copy + Eq + Hash> UniformGrid<K> {
    /// Create an empty grid with the provided cell edge length.
    pub fn new(cell_size: f32) -> Result<Self, IndexError> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(IndexError::InvalidConfig(
                "cell_size must be positive and finite",
            ));
        }
        Ok(Self {
            cell_size,
            cells: HashMap::new(),
            occupancy: HashMap::new(),
        })
    }

    /// Edge length of each grid cell.
    #[must_use]
    pub const fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Cell containing `position`.
    #[must_use]
    pub fn cell_key(&self, position: [f32; 3]) -> CellKey {
        (
            (position[0] / self.cell_size).floor() as i32,
            (position[1] / self.cell_size).floor() as i32,
            (position[2] / self.cell_size).floor() as i32,
        )
    }

    /// Number of tracked occupants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.occupancy.len()
    }

    /// Returns true when no occupants are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.occupancy.is_empty()
    }

    /// Whether `key` is currently tracked.
    #[must_use]
    pub fn contains(&self, key: K) -> bool {
        self.occupancy.contains_key(&key)
    }

    /// Cell currently holding `key`, if tracked.
    #[must_use]
    pub fn occupant_cell(&self, key: K) -> Option<CellKey> {
        self.occupancy.get(&key).copied()
    }

    /// Remove all occupants while retaining allocated capacity.
    pub fn clear(&mut self) {
        self.cells.clear();
        self.occupancy.clear();
    }

    /// Insert `key` at `position`, relocating it if already tracked.
    ///
    /// An occupant is never present in more than one bucket: a stale entry in
    /// a previous cell is detached before the new one is recorded, and a
    /// same-cell move only refreshes the stored position.
    pub fn insert(&mut self, key: K, position: [f32; 3]) {
        let cell = self.cell_key(position);
        if let Some(previous) = self.occupancy.insert(key, cell) {
            if previous == cell {
                if let Some(entry) = self
                    .cells
                    .get_mut(&cell)
                    .and_then(|bucket| bucket.iter_mut().find(|(k, _)| *k == key))
                {
                    entry.1 = position;
                    return;
                }
            } else {
                self.detach(previous, key);
            }
        }
        self.cells.entry(cell).or_default().push((key, position));
    }

    /// Move `key` to the cell matching its current position.
    pub fn relocate(&mut self, key: K, position: [f32; 3]) {
        self.insert(key, position);
    }

    /// Remove `key` from the grid, returning whether it was tracked.
    pub fn remove(&mut self, key: K) -> bool {
        match self.occupancy.remove(&key) {
            Some(cell) => {
                self.detach(cell, key);
                true
            }
            None => false,
        }
    }

    fn detach(&mut self, cell: CellKey, key: K) {
        if let Some(bucket) = self.cells.get_mut(&cell) {
            if let Some(idx) = bucket.iter().position(|(k, _)| *k == key) {
                bucket.remove(idx);
            }
            if bucket.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }

    /// Visit every occupant within `radius` (inclusive) of `center`.
    ///
    /// The visitor receives the occupant key and its Euclidean distance to
    /// `center`. Visit order is the fixed cell-then-bucket order.
    pub fn for_each_within(
        &self,
        center: [f32; 3],
        radius: f32,
        visitor: &mut dyn FnMut(K, OrderedFloat<f32>),
    ) {
        if radius < 0.0 {
            return;
        }
        let radius_sq = radius * radius;
        self.for_each_candidate(center, radius, &mut |key, position| {
            let dist_sq = distance_squared(center, position);
            if dist_sq <= radius_sq {
                visitor(key, OrderedFloat(dist_sq.sqrt()));
            }
        });
    }

    /// Nearest occupant with distance strictly below `radius` that passes
    /// `filter`, together with that distance.
    ///
    /// Ties resolve to the candidate encountered first in cell-then-bucket
    /// order. The result always equals a brute-force linear scan over the
    /// same candidate set.
    #[must_use]
    pub fn nearest_within(
        &self,
        center: [f32; 3],
        radius: f32,
        mut filter: impl FnMut(K) -> bool,
    ) -> Option<(K, f32)> {
        if radius <= 0.0 {
            return None;
        }
        let radius_sq = radius * radius;
        let mut best: Option<(K, f32)> = None;
        self.for_each_candidate(center, radius, &mut |key, position| {
            let dist_sq = distance_squared(center, position);
            if dist_sq >= radius_sq || !filter(key) {
                return;
            }
            let dist = dist_sq.sqrt();
            if best.is_none_or(|(_, nearest)| dist < nearest) {
                best = Some((key, dist));
            }
        });
        best
    }

    fn for_each_candidate(
        &self,
        center: [f32; 3],
        radius: f32,
        visitor: &mut dyn FnMut(K, [f32; 3]),
    ) {
        let reach = (radius / self.cell_size).ceil() as i32;
        let origin = self.cell_key(center);
        for ix in (origin.0 - reach)..=(origin.0 + reach) {
            for iy in (origin.1 - reach)..=(origin.1 + reach) {
                for iz in (origin.2 - reach)..=(origin.2 + reach) {
                    let Some(bucket) = self.cells.get(&(ix, iy, iz)) else {
                        continue;
                    };
                    for &(key, position) in bucket {
                        visitor(key, position);
                    }
                }
            }
        }
    }
}
