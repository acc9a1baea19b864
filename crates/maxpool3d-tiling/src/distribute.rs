//! Work distribution across compute units.
//!
//! Work-items are numbered `0..total` and each used unit gets one contiguous
//! range. The first `tail_count` units take one extra item.

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Per-unit work-item counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CoreDistribution {
    pub total_items: u64,
    /// Items per unit (units at or past `tail_count`).
    pub normal_count: u64,
    /// Leading units that take `normal_count + 1` items.
    pub tail_count: u64,
    pub used_cores: u64,
}

/// Spreads `total_items` over at most `core_count` units.
pub fn distribute(total_items: u64, core_count: u64) -> CoreDistribution {
    let cores = core_count.max(1);
    if total_items < cores {
        return CoreDistribution {
            total_items,
            normal_count: u64::from(total_items > 0),
            tail_count: 0,
            used_cores: total_items,
        };
    }
    CoreDistribution {
        total_items,
        normal_count: total_items / cores,
        tail_count: total_items % cores,
        used_cores: cores,
    }
}

impl CoreDistribution {
    /// Items handled by `unit`.
    pub fn count(&self, unit: u64) -> u64 {
        if unit >= self.used_cores {
            0
        } else if unit < self.tail_count {
            self.normal_count + 1
        } else {
            self.normal_count
        }
    }

    /// Work-item range of `unit`; empty past `used_cores`.
    pub fn range(&self, unit: u64) -> Range<u64> {
        if unit >= self.used_cores {
            return self.total_items..self.total_items;
        }
        let n = self.normal_count;
        let t = self.tail_count;
        let begin = if unit < t { unit * (n + 1) } else { unit * n + t };
        begin..begin + self.count(unit)
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range<u64>> + '_ {
        (0..self.used_cores).map(|u| self.range(u))
    }
}

/// Starting tile coordinates of each used unit.
///
/// Entries are `[batch_block, d, h, w]` in the row-major work-item grid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SplitPointTable {
    pub entries: Vec<[u64; 4]>,
}

impl SplitPointTable {
    pub fn build(dist: &CoreDistribution, grid: [u64; 4]) -> Self {
        let entries = dist.ranges().map(|r| unravel(r.start, grid)).collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Row-major index to grid coordinates.
pub(crate) fn unravel(mut index: u64, grid: [u64; 4]) -> [u64; 4] {
    let mut coords = [0u64; 4];
    for axis in (0..4).rev() {
        let extent = grid[axis].max(1);
        coords[axis] = index % extent;
        index /= extent;
    }
    coords
}
