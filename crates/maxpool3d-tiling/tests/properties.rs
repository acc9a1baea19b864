//! Property tests for plan invariants.

use maxpool3d_tiling::{
    Capabilities, ErrorKind, InputDesc, PaddingMode, PlatformInfo, Planner, PoolAttrs, ProblemSpec,
    STRATEGY_CHAIN, TilingPlan, estimate,
};
use proptest::prelude::*;

fn padding_mode() -> impl Strategy<Value = PaddingMode> {
    prop_oneof![
        3 => Just(PaddingMode::Calculated),
        1 => Just(PaddingMode::Same),
        1 => Just(PaddingMode::Valid),
    ]
}

/// Per-axis list, optionally in the five-entry NCDHW form.
fn axis_list(spatial: [i64; 3], ncdhw: bool) -> Vec<i64> {
    if ncdhw {
        [1, 1].into_iter().chain(spatial).collect()
    } else {
        spatial.to_vec()
    }
}

fn problem_strategy() -> impl Strategy<Value = (InputDesc, PoolAttrs)> {
    (
        (1i64..=16, prop::array::uniform3(1i64..=160)),
        prop::array::uniform3(1i64..=6),
        prop::array::uniform3(1i64..=4),
        prop::array::uniform3(prop_oneof![3 => Just(1i64), 1 => 2i64..=3]),
        0i64..=2,
        padding_mode(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|((batches, spatial), kernel, stride, dilation, pad, padding_mode, ceil_mode, ncdhw)| {
            let attrs = PoolAttrs {
                kernel: axis_list(kernel, ncdhw),
                stride: axis_list(stride, ncdhw),
                pad: vec![pad],
                dilation: axis_list(dilation, ncdhw),
                padding_mode,
                ceil_mode,
            };
            (InputDesc::new(batches, spatial), attrs)
        })
}

fn chain_position(plan: &TilingPlan) -> usize {
    STRATEGY_CHAIN.iter().position(|&s| s == plan.strategy).unwrap_or(usize::MAX)
}

proptest! {
    #[test]
    fn plan_fits_budget_and_partitions_work(
        (input, attrs) in problem_strategy(),
        ub_kib in 4u64..=256,
        cores in 1u64..=64,
    ) {
        let Ok(problem) = ProblemSpec::build(&input, &attrs) else {
            return Ok(());
        };
        let platform = PlatformInfo::new(cores, ub_kib * 1024);
        let budget = platform.budget();
        let plan = match Planner::new(platform).plan(&problem) {
            Ok(plan) => plan,
            Err(err) => {
                // Only dilated windows can outgrow every strategy: the
                // kernel-splitting fallbacks need unit dilation.
                prop_assert_eq!(err.kind(), ErrorKind::Infeasible);
                prop_assert!(!problem.unit_dilation());
                return Ok(());
            }
        };

        let recomputed = estimate(&plan.tile, &plan.problem, &budget);
        prop_assert_eq!(recomputed, plan.buffers);
        prop_assert!(recomputed.total <= budget.total_bytes);

        let dist = plan.distribution;
        prop_assert!(dist.used_cores <= cores);
        let mut next = 0;
        for range in dist.ranges() {
            prop_assert_eq!(range.start, next);
            prop_assert!(range.end > range.start);
            next = range.end;
        }
        prop_assert_eq!(next, plan.total_work_items);

        if let Some(table) = &plan.split_points {
            prop_assert_eq!(table.len() as u64, dist.used_cores);
        }
    }

    #[test]
    fn larger_budget_never_shrinks_tiles(
        (input, attrs) in problem_strategy(),
        cores in 1u64..=16,
    ) {
        let Ok(problem) = ProblemSpec::build(&input, &attrs) else {
            return Ok(());
        };
        let platform = PlatformInfo::with_cores(cores).with_capabilities(Capabilities::default());
        let mut last: Option<TilingPlan> = None;
        for kib in [1u64, 2, 4, 8, 16, 32, 64, 128, 256] {
            let budget = platform.budget().with_total(kib * 1024);
            let plan = match Planner::with_budget(platform.clone(), budget).plan(&problem) {
                Ok(plan) => plan,
                Err(err) => {
                    // Once a budget fits, every larger one must too.
                    prop_assert!(last.is_none(), "{err} after a smaller budget fit");
                    continue;
                }
            };
            if let Some(prev) = &last {
                prop_assert!(chain_position(&plan) <= chain_position(prev));
                for axis in 0..3 {
                    prop_assert!(plan.tile.out[axis] >= prev.tile.out[axis]);
                }
                prop_assert!(plan.tile.batch >= prev.tile.batch);
            }
            last = Some(plan);
        }
    }

    #[test]
    fn output_shape_matches_window_formula((input, attrs) in problem_strategy()) {
        let Ok(problem) = ProblemSpec::build(&input, &attrs) else {
            return Ok(());
        };
        for axis in 0..3 {
            let eff = problem.effective_kernel(axis);
            let padded = problem.padded_extent(axis);
            let out = problem.output_shape[axis];
            prop_assert_eq!((padded - eff) / problem.stride[axis] + 1, out);
            // Every window starts inside the input or the front pad.
            prop_assert!((out - 1) * problem.stride[axis] < problem.input_shape[axis] + problem.pad[axis][0]);
        }
    }

    #[test]
    fn planning_is_idempotent((input, attrs) in problem_strategy()) {
        let (Ok(a), Ok(b)) = (ProblemSpec::build(&input, &attrs), ProblemSpec::build(&input, &attrs)) else {
            return Ok(());
        };
        let planner = Planner::new(PlatformInfo::with_cores(8));
        let pa = serde_json::to_string(&planner.plan(&a).ok()).unwrap();
        let pb = serde_json::to_string(&planner.plan(&b).ok()).unwrap();
        prop_assert_eq!(pa, pb);
    }
}
