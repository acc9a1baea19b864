//! Scratchpad-aware tiling planner for 3-D max-pooling with argmax.
//!
//! Decomposes one pooling invocation into independent work-items sized so
//! every scratch buffer fits the per-core fast-memory budget, then spreads
//! those work-items across the available compute units.
//!
//! # Architecture
//!
//! ```text
//! Planner::plan(ProblemSpec)
//!     ├── strategy chain ──> first strategy whose probe fits the budget
//!     │       └── search ──> binary search + step-down over cost::estimate
//!     ├── distribute ──> per-core normal/tail work-item counts
//!     └── plan ──> TilingPlan + dispatch key + flat TilingData
//! ```
//!
//! # Example
//!
//! ```rust
//! use maxpool3d_tiling::{PlatformInfo, Planner, PoolAttrs, ProblemSpec, InputDesc};
//!
//! let input = InputDesc::new(8, [8, 8, 8]);
//! let attrs = PoolAttrs::cubic(3, 3);
//! let problem = ProblemSpec::build(&input, &attrs).unwrap();
//!
//! let planner = Planner::new(PlatformInfo::with_cores(4));
//! let plan = planner.plan(&problem).unwrap();
//! assert_eq!(plan.distribution.used_cores, 4);
//! ```

pub mod cost;
pub mod distribute;
pub mod plan;
pub mod planner;
pub mod platform;
pub mod problem;
pub mod search;
pub mod strategy;

pub use cost::{ByteBreakdown, Formulation, TileShape, estimate};
pub use distribute::{CoreDistribution, SplitPointTable, distribute};
pub use plan::{AxisSplit, DispatchKey, TilingData, TilingPlan};
pub use planner::Planner;
pub use platform::{BufferBudget, Capabilities, PlatformInfo};
pub use problem::{DataType, IndexType, InputDesc, PaddingMode, PoolAttrs, ProblemSpec};
pub use strategy::{Probe, STRATEGY_CHAIN, StrategyKind, TileCandidate};

use thiserror::Error;

/// Spatial axis indices (depth, height, width).
pub const D_AXIS: usize = 0;
pub const H_AXIS: usize = 1;
pub const W_AXIS: usize = 2;

/// Coarse error classes handed to the dispatch layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidShape,
    Infeasible,
    UnsupportedOnPlatform,
}

/// Planning errors.
///
/// Every error is raised before any compute dispatch; a caller that gets
/// one must not launch the kernel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TilingError {
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Invalid attribute: {0}")]
    InvalidAttribute(String),

    #[error("Unsupported dtype: {0}")]
    UnsupportedDtype(String),

    #[error("No strategy fits {budget} bytes of scratch memory (tried {tried})")]
    Infeasible { budget: u64, tried: usize },

    #[error("No strategy is supported on this platform: {reason}")]
    UnsupportedOnPlatform { reason: String },
}

impl TilingError {
    /// Maps the error onto one of the three planning error classes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidShape(_) | Self::InvalidAttribute(_) | Self::UnsupportedDtype(_) => {
                ErrorKind::InvalidShape
            }
            Self::Infeasible { .. } => ErrorKind::Infeasible,
            Self::UnsupportedOnPlatform { .. } => ErrorKind::UnsupportedOnPlatform,
        }
    }
}

pub type TilingResult<T> = Result<T, TilingError>;

/// Ceiling division. `d` must be non-zero.
#[inline]
pub(crate) fn ceil_div(n: u64, d: u64) -> u64 {
    n.div_ceil(d)
}

/// Rounds `n` up to a multiple of `align` (no-op when `align` is 0).
/// Saturates at `u64::MAX`.
#[inline]
pub(crate) fn ceil_align(n: u64, align: u64) -> u64 {
    if align == 0 {
        return n;
    }
    n.div_ceil(align).saturating_mul(align)
}

/// Product that saturates at `u64::MAX` instead of wrapping.
#[inline]
pub(crate) fn saturating_product<I: IntoIterator<Item = u64>>(values: I) -> u64 {
    values.into_iter().fold(1, u64::saturating_mul)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_align() {
        assert_eq!(ceil_align(0, 32), 0);
        assert_eq!(ceil_align(1, 32), 32);
        assert_eq!(ceil_align(32, 32), 32);
        assert_eq!(ceil_align(33, 32), 64);
        assert_eq!(ceil_align(7, 0), 7);
        assert_eq!(ceil_align(u64::MAX - 3, 32), u64::MAX);
    }

    #[test]
    fn test_saturating_product() {
        assert_eq!(saturating_product([2, 3, 4]), 24);
        assert_eq!(saturating_product([1 << 22, 1 << 21, 1 << 21]), u64::MAX);
        assert_eq!(saturating_product([]), 1);
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(TilingError::InvalidAttribute("x".into()).kind(), ErrorKind::InvalidShape);
        assert_eq!(TilingError::Infeasible { budget: 1, tried: 7 }.kind(), ErrorKind::Infeasible);
        let err = TilingError::UnsupportedOnPlatform { reason: "none".into() };
        assert_eq!(err.kind(), ErrorKind::UnsupportedOnPlatform);
    }
}
