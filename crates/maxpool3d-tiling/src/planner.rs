//! Planning entry point.
//!
//! Walks the strategy chain in priority order, takes the first strategy
//! whose probe fits the budget, and emits the plan for it.
//!
//! # Example
//!
//! ```rust
//! use maxpool3d_tiling::{InputDesc, PlatformInfo, Planner, PoolAttrs, ProblemSpec, StrategyKind};
//!
//! let problem = ProblemSpec::build(&InputDesc::new(2, [16, 16, 16]), &PoolAttrs::cubic(2, 2)).unwrap();
//! let plan = Planner::new(PlatformInfo::default()).plan(&problem).unwrap();
//! assert_eq!(plan.strategy, StrategyKind::WholeTensor);
//! ```

use tracing::{debug, trace};

use crate::plan::TilingPlan;
use crate::platform::{BufferBudget, PlatformInfo};
use crate::problem::ProblemSpec;
use crate::strategy::{Probe, STRATEGY_CHAIN, StrategyKind};
use crate::{TilingError, TilingResult};

/// Tiling planner for one target platform.
#[derive(Debug, Clone)]
pub struct Planner {
    platform: PlatformInfo,
    budget: BufferBudget,
}

impl Planner {
    /// Planner with the budget derived from the platform.
    pub fn new(platform: PlatformInfo) -> Self {
        let budget = platform.budget();
        Self { platform, budget }
    }

    /// Planner with an explicit scratch budget.
    pub fn with_budget(platform: PlatformInfo, budget: BufferBudget) -> Self {
        Self { platform, budget }
    }

    pub fn platform(&self) -> &PlatformInfo {
        &self.platform
    }

    pub fn budget(&self) -> &BufferBudget {
        &self.budget
    }

    /// Plans `problem`.
    ///
    /// Fails with [`TilingError::UnsupportedOnPlatform`] when every strategy
    /// needs a capability the platform lacks, and with
    /// [`TilingError::Infeasible`] when no supported strategy fits.
    pub fn plan(&self, problem: &ProblemSpec) -> TilingResult<TilingPlan> {
        if self.platform.core_num == 0 {
            return Err(TilingError::UnsupportedOnPlatform {
                reason: "platform reports zero compute units".into(),
            });
        }

        let mut supported = 0;
        for strategy in STRATEGY_CHAIN {
            match strategy.probe(problem, &self.budget, &self.platform) {
                Probe::Fits(candidate) => {
                    debug!(
                        strategy = strategy.name(),
                        tile = ?candidate.tile.out,
                        bytes = candidate.bytes.total,
                        budget = self.budget.total_bytes,
                        "selected strategy"
                    );
                    return Ok(TilingPlan::emit(problem, &candidate, &self.budget, self.platform.core_num));
                }
                Probe::NoFit => {
                    supported += 1;
                    trace!(strategy = strategy.name(), "strategy does not fit");
                }
                Probe::Unsupported => {
                    trace!(strategy = strategy.name(), "strategy unsupported on platform");
                }
            }
        }

        if supported == 0 {
            let names: Vec<&str> = STRATEGY_CHAIN.iter().map(|s: &StrategyKind| s.name()).collect();
            return Err(TilingError::UnsupportedOnPlatform {
                reason: format!("no capability for any of {}", names.join(", ")),
            });
        }
        Err(TilingError::Infeasible {
            budget: self.budget.total_bytes,
            tried: supported,
        })
    }
}
