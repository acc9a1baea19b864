//! Decomposition strategies and their fixed priority order.
//!
//! Each strategy is a capability check plus a probe that searches for the
//! largest tile it can stage within the scratch budget. The planner walks
//! [`STRATEGY_CHAIN`] and takes the first probe that fits.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::cost::{ByteBreakdown, TileShape, estimate};
use crate::platform::{BufferBudget, Capabilities, PlatformInfo};
use crate::problem::ProblemSpec;
use crate::search::{search_extent, search_nested};
use crate::{D_AXIS, H_AXIS, W_AXIS, ceil_align, ceil_div, saturating_product};

/// Tiling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Whole output volume per batch group.
    WholeTensor,
    /// Depth tiled, height and width whole.
    SplitDepth,
    /// One output depth, height tiled, width whole.
    SplitHeight,
    /// One output depth and height, width tiled.
    SplitWidth,
    /// One output element, kernel window split into accumulated passes.
    HugeKernel,
    /// One output element, window gathered element by element.
    BigKernel,
    /// Joint D/H/W search for index-gather hardware.
    Gather,
}

/// Probe order. First fit wins.
pub const STRATEGY_CHAIN: [StrategyKind; 7] = [
    StrategyKind::WholeTensor,
    StrategyKind::Gather,
    StrategyKind::SplitDepth,
    StrategyKind::SplitHeight,
    StrategyKind::SplitWidth,
    StrategyKind::HugeKernel,
    StrategyKind::BigKernel,
];

/// Result of probing one strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Fits(TileCandidate),
    /// Preconditions hold but no tile fits the budget, or a shape
    /// precondition (such as dilation) rules the strategy out.
    NoFit,
    /// The platform lacks a capability the strategy needs.
    Unsupported,
}

impl StrategyKind {
    /// Strategy digit of the dispatch key.
    pub fn id(self) -> u64 {
        match self {
            Self::WholeTensor => 1,
            Self::SplitDepth => 2,
            Self::SplitHeight => 3,
            Self::SplitWidth => 4,
            Self::HugeKernel => 5,
            Self::BigKernel => 6,
            Self::Gather => 7,
        }
    }

    pub fn from_id(id: u64) -> Option<Self> {
        STRATEGY_CHAIN.into_iter().find(|s| s.id() == id)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::WholeTensor => "whole-tensor",
            Self::SplitDepth => "split-depth",
            Self::SplitHeight => "split-height",
            Self::SplitWidth => "split-width",
            Self::HugeKernel => "huge-kernel",
            Self::BigKernel => "big-kernel",
            Self::Gather => "gather",
        }
    }

    /// Whether the platform offers what this strategy needs.
    pub fn is_supported(self, caps: &Capabilities) -> bool {
        match self {
            Self::WholeTensor | Self::SplitDepth | Self::SplitHeight | Self::SplitWidth => {
                caps.strided_copy
            }
            Self::HugeKernel => caps.staged_kernel_copy,
            Self::BigKernel => caps.element_gather,
            Self::Gather => caps.index_gather,
        }
    }

    /// Searches for the largest tile this strategy can use.
    pub fn probe(self, problem: &ProblemSpec, budget: &BufferBudget, platform: &PlatformInfo) -> Probe {
        if !self.is_supported(&platform.capabilities) {
            return Probe::Unsupported;
        }
        let limit = budget.total_bytes;
        let bytes = |tile: &TileShape| estimate(tile, problem, budget).total;
        let out = problem.output_shape;

        let tile = match self {
            Self::WholeTensor => {
                let per_round = platform.core_num.max(1).saturating_mul(2);
                let cap = (problem.batches / per_round).clamp(1, problem.batches.max(1));
                let batch = search_extent(1, cap, limit, |b| bytes(&TileShape::staged(problem, b, out)));
                (batch > 0).then(|| TileShape::staged(problem, batch, out))
            }
            Self::SplitDepth => {
                let shape = |d| TileShape::staged(problem, 1, [d, out[H_AXIS], out[W_AXIS]]);
                let d = search_extent(1, out[D_AXIS], limit, |d| bytes(&shape(d)));
                (d > 0).then(|| shape(d))
            }
            Self::SplitHeight => {
                let shape = |h| TileShape::staged(problem, 1, [1, h, out[W_AXIS]]);
                let h = search_extent(1, out[H_AXIS], limit, |h| bytes(&shape(h)));
                (h > 0).then(|| shape(h))
            }
            Self::SplitWidth => {
                let shape = |w| TileShape::staged(problem, 1, [1, 1, w]);
                let w = search_extent(1, out[W_AXIS], limit, |w| bytes(&shape(w)));
                (w > 0).then(|| shape(w))
            }
            Self::Gather => search_nested(out, limit, |e| bytes(&TileShape::gather(problem, e)))
                .map(|e| TileShape::gather(problem, e)),
            Self::HugeKernel => {
                if !problem.unit_dilation() {
                    return Probe::NoFit;
                }
                search_kernel_window(problem, limit, &bytes).map(|w| TileShape::kernel_split(problem, w))
            }
            Self::BigKernel => {
                if !problem.unit_dilation() {
                    return Probe::NoFit;
                }
                let chunk = search_extent(1, problem.kernel_volume(), limit, |c| {
                    bytes(&TileShape::elementwise(problem, c))
                });
                (chunk > 0).then(|| TileShape::elementwise(problem, chunk))
            }
        };

        match tile.map(|t| TileCandidate::new(self, t, problem, budget, platform)) {
            Some(candidate) if budget.fits(candidate.bytes.total) => Probe::Fits(candidate),
            _ => {
                trace!(strategy = self.name(), limit, "no tile fits");
                Probe::NoFit
            }
        }
    }
}

/// Kernel sub-window for the huge-kernel strategy: depth is split first,
/// then height with depth at 1, then width with both at 1.
fn search_kernel_window<F>(problem: &ProblemSpec, limit: u64, bytes: &F) -> Option<[u64; 3]>
where
    F: Fn(&TileShape) -> u64,
{
    let [kd, kh, kw] = problem.kernel;
    let cost = |w: [u64; 3]| bytes(&TileShape::kernel_split(problem, w));

    let d = search_extent(1, kd, limit, |d| cost([d, kh, kw]));
    if d > 0 {
        return Some([d, kh, kw]);
    }
    let h = search_extent(1, kh, limit, |h| cost([1, h, kw]));
    if h > 0 {
        return Some([1, h, kw]);
    }
    let w = search_extent(1, kw, limit, |w| cost([1, 1, w]));
    (w > 0).then_some([1, 1, w])
}

/// Converged tile of one strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileCandidate {
    pub strategy: StrategyKind,
    pub tile: TileShape,
    /// Input extents (with dilation) implied by the tile.
    pub input_extent: [u64; 3],
    pub bytes: ByteBreakdown,
    /// Partial-kernel passes per output element.
    pub kernel_passes: u64,
    /// Global workspace for cross-pass accumulation.
    pub workspace_bytes: u64,
}

impl TileCandidate {
    pub fn new(
        strategy: StrategyKind,
        tile: TileShape,
        problem: &ProblemSpec,
        budget: &BufferBudget,
        platform: &PlatformInfo,
    ) -> Self {
        let kernel_passes =
            saturating_product((0..3).map(|a| ceil_div(problem.kernel[a], tile.kernel_window[a].max(1))));
        let workspace_bytes = if tile.accumulate {
            let per_pass = problem.element_bytes() + problem.index_bytes();
            let bytes = saturating_product([platform.core_num, kernel_passes, per_pass]);
            ceil_align(bytes, budget.alignment_bytes)
        } else {
            0
        };
        Self {
            strategy,
            tile,
            input_extent: tile.input_extent(problem),
            bytes: estimate(&tile, problem, budget),
            kernel_passes,
            workspace_bytes,
        }
    }

    /// Work-item grid: batch blocks, then D, H and W tiles.
    pub fn work_grid(&self, problem: &ProblemSpec) -> [u64; 4] {
        [
            ceil_div(problem.batches, self.tile.batch.max(1)),
            ceil_div(problem.output_shape[D_AXIS], self.tile.out[D_AXIS].max(1)),
            ceil_div(problem.output_shape[H_AXIS], self.tile.out[H_AXIS].max(1)),
            ceil_div(problem.output_shape[W_AXIS], self.tile.out[W_AXIS].max(1)),
        ]
    }

    pub fn total_work_items(&self, problem: &ProblemSpec) -> u64 {
        saturating_product(self.work_grid(problem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{InputDesc, PoolAttrs};

    fn problem(batches: i64, spatial: [i64; 3], kernel: i64, stride: i64) -> ProblemSpec {
        ProblemSpec::build(&InputDesc::new(batches, spatial), &PoolAttrs::cubic(kernel, stride)).unwrap()
    }

    fn fits(probe: Probe) -> TileCandidate {
        match probe {
            Probe::Fits(c) => c,
            other => panic!("expected fit, got {other:?}"),
        }
    }

    #[test]
    fn test_chain_order() {
        assert_eq!(STRATEGY_CHAIN[0], StrategyKind::WholeTensor);
        assert_eq!(STRATEGY_CHAIN[1], StrategyKind::Gather);
        assert_eq!(STRATEGY_CHAIN[6], StrategyKind::BigKernel);
        for s in STRATEGY_CHAIN {
            assert_eq!(StrategyKind::from_id(s.id()), Some(s));
        }
    }

    #[test]
    fn test_whole_tensor_batch_cap() {
        let p = problem(64, [8, 8, 8], 3, 3);
        let platform = PlatformInfo::with_cores(4);
        let c = fits(StrategyKind::WholeTensor.probe(&p, &platform.budget(), &platform));
        // 64 / (4 * 2)
        assert_eq!(c.tile.batch, 8);
        assert_eq!(c.tile.out, [2, 2, 2]);
        assert_eq!(c.total_work_items(&p), 8);
    }

    #[test]
    fn test_whole_tensor_extreme_platform() {
        let p = problem(64, [8, 8, 8], 3, 3);
        let platform = PlatformInfo::with_cores(u64::MAX);
        let c = fits(StrategyKind::WholeTensor.probe(&p, &platform.budget(), &platform));
        assert_eq!(c.tile.batch, 1);
        assert_eq!(c.total_work_items(&p), 64);
    }

    #[test]
    fn test_whole_tensor_zero_batches() {
        // Reachable through deserialization only; build rejects it.
        let mut p = problem(2, [8, 8, 8], 3, 3);
        p.batches = 0;
        let platform = PlatformInfo::with_cores(4);
        let c = fits(StrategyKind::WholeTensor.probe(&p, &platform.budget(), &platform));
        assert_eq!(c.tile.batch, 1);
        assert_eq!(c.total_work_items(&p), 0);
    }

    #[test]
    fn test_unaddressable_shape_never_fits() {
        let mut p = problem(1, [8, 8, 8], 1, 1);
        p.input_shape = [1 << 22, 1 << 21, 1 << 21];
        p.output_shape = p.input_shape;
        let platform = PlatformInfo::default();
        let budget = platform.budget();
        assert_eq!(StrategyKind::WholeTensor.probe(&p, &budget, &platform), Probe::NoFit);
        let c = fits(StrategyKind::SplitWidth.probe(&p, &budget, &platform));
        assert!(c.bytes.total <= budget.total_bytes);
        assert!(c.tile.out[W_AXIS] < 1 << 21);
    }

    #[test]
    fn test_split_depth_keeps_plane_whole() {
        let p = problem(1, [64, 64, 64], 2, 2);
        let platform = PlatformInfo::default();
        let budget = platform.budget().with_total(64 * 1024);
        let c = fits(StrategyKind::SplitDepth.probe(&p, &budget, &platform));
        assert_eq!(c.tile.out[1..], [32, 32]);
        assert!(c.tile.out[0] < 32);
        assert!(c.bytes.total <= budget.total_bytes);
    }

    #[test]
    fn test_capability_gate() {
        let p = problem(1, [8, 8, 8], 2, 2);
        let platform = PlatformInfo::default();
        let probe = StrategyKind::Gather.probe(&p, &platform.budget(), &platform);
        assert_eq!(probe, Probe::Unsupported);
    }

    #[test]
    fn test_kernel_split_depth_first() {
        let p = problem(1, [32, 32, 32], 32, 1);
        let platform = PlatformInfo::default();
        let budget = platform.budget().with_total(16 * 1024);
        let c = fits(StrategyKind::HugeKernel.probe(&p, &budget, &platform));
        let [d, h, w] = c.tile.kernel_window;
        assert!(d >= 1 && d < 32);
        assert_eq!([h, w], [32, 32]);
        assert!(c.kernel_passes > 1);
        assert!(c.workspace_bytes > 0);
        assert_eq!(c.total_work_items(&p), 1);
    }

    #[test]
    fn test_kernel_strategies_need_unit_dilation() {
        let a = PoolAttrs {
            kernel: vec![2],
            stride: vec![1],
            dilation: vec![2],
            ..Default::default()
        };
        let p = ProblemSpec::build(&InputDesc::new(1, [8, 8, 8]), &a).unwrap();
        let platform = PlatformInfo::default();
        let budget = platform.budget();
        assert_eq!(StrategyKind::HugeKernel.probe(&p, &budget, &platform), Probe::NoFit);
        assert_eq!(StrategyKind::BigKernel.probe(&p, &budget, &platform), Probe::NoFit);
    }

    #[test]
    fn test_big_kernel_chunk() {
        let p = problem(1, [16, 16, 16], 16, 1);
        let platform = PlatformInfo::default();
        let budget = platform.budget().with_total(1024);
        let c = fits(StrategyKind::BigKernel.probe(&p, &budget, &platform));
        // 1024 - 32 (output) - 32 (index) leaves 960 bytes = 240 f32
        assert_eq!(c.tile.window_chunk, 240);
        assert_eq!(c.total_work_items(&p), 1);
    }
}
