//! Plan emission.
//!
//! Turns a converged [`TileCandidate`] and its distribution into the
//! [`TilingPlan`] handed to the dispatch layer, plus the flat
//! [`TilingData`] block the compute kernel reads.

use std::fmt;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cost::{ByteBreakdown, Formulation, TileShape};
use crate::distribute::{CoreDistribution, SplitPointTable, distribute};
use crate::platform::{BufferBudget, format_bytes};
use crate::problem::{IndexType, ProblemSpec};
use crate::strategy::{StrategyKind, TileCandidate};
use crate::{D_AXIS, H_AXIS, W_AXIS, ceil_div};

/// Tiling of one output axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AxisSplit {
    /// Tile extent.
    pub factor: u64,
    /// Extent of the last tile; equals `factor` when the axis divides evenly.
    pub tail: u64,
    /// Number of tiles.
    pub outer_count: u64,
}

impl AxisSplit {
    pub fn new(extent: u64, factor: u64) -> Self {
        let factor = factor.clamp(1, extent.max(1));
        let outer_count = ceil_div(extent, factor);
        Self {
            factor,
            tail: extent - (outer_count.saturating_sub(1)) * factor,
            outer_count,
        }
    }

    pub fn is_split(&self) -> bool {
        self.outer_count > 1
    }

    pub fn has_short_tail(&self) -> bool {
        self.tail < self.factor
    }
}

/// Kernel-variant selector.
///
/// Decimal digits `S D H W K T`: strategy id, one flag per split output
/// axis, kernel-window split flag, then the datatype class (plus 3 for
/// 64-bit indices).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DispatchKey(pub u64);

impl DispatchKey {
    pub fn compose(strategy: StrategyKind, split: [bool; 3], kernel_split: bool, problem: &ProblemSpec) -> Self {
        let index_offset = match problem.index_dtype {
            IndexType::I32 => 0,
            IndexType::I64 => 3,
        };
        let digits = [
            strategy.id(),
            u64::from(split[D_AXIS]),
            u64::from(split[H_AXIS]),
            u64::from(split[W_AXIS]),
            u64::from(kernel_split),
            problem.dtype.class() + index_offset,
        ];
        Self(digits.iter().fold(0, |key, d| key * 10 + d))
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn strategy(self) -> Option<StrategyKind> {
        StrategyKind::from_id(self.0 / 100_000)
    }
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal planning artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilingPlan {
    pub strategy: StrategyKind,
    pub dispatch_key: DispatchKey,
    /// Normalized problem, including the adjusted padding.
    pub problem: ProblemSpec,
    /// Work-item extents, as re-estimated against the budget.
    pub tile: TileShape,
    pub axes: [AxisSplit; 3],
    pub kernel_passes: u64,
    pub buffers: ByteBreakdown,
    pub workspace_bytes: u64,
    pub budget_bytes: u64,
    pub total_work_items: u64,
    pub distribution: CoreDistribution,
    /// Present when some split axis ends in a short tile.
    pub split_points: Option<SplitPointTable>,
}

impl TilingPlan {
    /// Builds the plan from a feasible candidate.
    pub fn emit(
        problem: &ProblemSpec,
        candidate: &TileCandidate,
        budget: &BufferBudget,
        core_count: u64,
    ) -> Self {
        let axes: [AxisSplit; 3] =
            std::array::from_fn(|a| AxisSplit::new(problem.output_shape[a], candidate.tile.out[a]));
        let grid = candidate.work_grid(problem);
        let total_work_items = candidate.total_work_items(problem);
        let distribution = distribute(total_work_items, core_count);

        let split_points = axes
            .iter()
            .any(|a| a.is_split() && a.has_short_tail())
            .then(|| SplitPointTable::build(&distribution, grid));

        let dispatch_key = DispatchKey::compose(
            candidate.strategy,
            axes.map(|a| a.is_split()),
            candidate.kernel_passes > 1,
            problem,
        );

        let plan = Self {
            strategy: candidate.strategy,
            dispatch_key,
            problem: problem.clone(),
            tile: candidate.tile,
            axes,
            kernel_passes: candidate.kernel_passes,
            buffers: candidate.bytes,
            workspace_bytes: candidate.workspace_bytes,
            budget_bytes: budget.total_bytes,
            total_work_items,
            distribution,
            split_points,
        };
        debug!(
            strategy = plan.strategy.name(),
            key = plan.dispatch_key.value(),
            items = plan.total_work_items,
            cores = plan.distribution.used_cores,
            bytes = plan.buffers.total,
            "emitted tiling plan"
        );
        plan
    }

    /// Flat kernel-facing view.
    pub fn tiling_data(&self) -> TilingData {
        let p = &self.problem;
        let dist = &self.distribution;
        TilingData {
            tiling_key: self.dispatch_key.value(),
            batches: p.batches,
            batch_tile: self.tile.batch,
            input_shape: p.input_shape,
            output_shape: p.output_shape,
            kernel: p.kernel,
            stride: p.stride,
            dilation: p.dilation,
            pad_front: p.pad.map(|[front, _]| front),
            pad_back: p.pad.map(|[_, back]| back),
            factor: self.axes.map(|a| a.factor),
            tail: self.axes.map(|a| a.tail),
            outer: self.axes.map(|a| a.outer_count),
            kernel_window: self.tile.kernel_window,
            kernel_passes: self.kernel_passes,
            window_chunk: self.tile.window_chunk,
            input_bytes: self.buffers.input,
            output_bytes: self.buffers.output,
            index_bytes: self.buffers.index,
            mask_bytes: self.buffers.mask,
            aux_bytes: self.buffers.aux,
            workspace_bytes: self.workspace_bytes,
            total_work_items: self.total_work_items,
            normal_count: dist.normal_count,
            tail_count: dist.tail_count,
            used_cores: dist.used_cores,
            ceil_mode: u64::from(p.ceil_mode),
        }
    }

    /// Human-readable summary.
    pub fn describe(&self) -> String {
        let mut desc = String::new();

        desc.push_str(&format!("Strategy: {} (key {})\n", self.strategy.name(), self.dispatch_key));
        desc.push_str(&format!(
            "Output: {:?} x {} batches\n",
            self.problem.output_shape, self.problem.batches
        ));
        let factors = self.axes.map(|a| a.factor);
        let tails = self.axes.map(|a| a.tail);
        desc.push_str(&format!("Tile: {:?} (tail {:?}, batch {})\n", factors, tails, self.tile.batch));
        if self.kernel_passes > 1 {
            desc.push_str(&format!(
                "Kernel window: {:?} in {} passes\n",
                self.tile.kernel_window, self.kernel_passes
            ));
        }
        if self.tile.formulation == Formulation::Elementwise {
            desc.push_str(&format!("Window chunk: {} elements\n", self.tile.window_chunk));
        }
        desc.push_str(&format!(
            "Scratch: {} of {} (in {}, out {}, idx {}, mask {})\n",
            format_bytes(self.buffers.total),
            format_bytes(self.budget_bytes),
            format_bytes(self.buffers.input),
            format_bytes(self.buffers.output),
            format_bytes(self.buffers.index),
            format_bytes(self.buffers.mask),
        ));
        if self.workspace_bytes > 0 {
            desc.push_str(&format!("Workspace: {}\n", format_bytes(self.workspace_bytes)));
        }
        desc.push_str(&format!(
            "Work items: {} on {} cores ({} each, {} with one extra)\n",
            self.total_work_items,
            self.distribution.used_cores,
            self.distribution.normal_count,
            self.distribution.tail_count,
        ));

        desc
    }
}

/// Flat scalar block consumed by the compute kernel.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct TilingData {
    pub tiling_key: u64,
    pub batches: u64,
    pub batch_tile: u64,
    pub input_shape: [u64; 3],
    pub output_shape: [u64; 3],
    pub kernel: [u64; 3],
    pub stride: [u64; 3],
    pub dilation: [u64; 3],
    pub pad_front: [u64; 3],
    pub pad_back: [u64; 3],
    pub factor: [u64; 3],
    pub tail: [u64; 3],
    pub outer: [u64; 3],
    pub kernel_window: [u64; 3],
    pub kernel_passes: u64,
    pub window_chunk: u64,
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub index_bytes: u64,
    pub mask_bytes: u64,
    pub aux_bytes: u64,
    pub workspace_bytes: u64,
    pub total_work_items: u64,
    pub normal_count: u64,
    pub tail_count: u64,
    pub used_cores: u64,
    pub ceil_mode: u64,
}

impl TilingData {
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}
