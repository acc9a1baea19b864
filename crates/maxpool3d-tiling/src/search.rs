//! Budget-bounded tile search.
//!
//! Buffer cost only grows with a tile extent, so the largest fitting extent
//! is found by binary search. The search bracket only bounds the result from
//! one side; a linear step-down pass then walks the extent back until the
//! estimate is under budget.

use tracing::trace;

use crate::{D_AXIS, H_AXIS, W_AXIS};

/// Largest extent in `[lower, upper]` whose cost fits `budget`, or 0.
///
/// `cost` must be non-decreasing in the extent. A `lower` of 0 is allowed;
/// if nothing above it fits the search retries once at extent 1.
pub fn search_extent<F>(lower: u64, upper: u64, budget: u64, cost: F) -> u64
where
    F: Fn(u64) -> u64,
{
    if upper == 0 || lower > upper {
        return 0;
    }

    // Invariant: answer lies in [low, high).
    let mut low = lower;
    let mut high = upper.saturating_add(1);
    while high - low > 1 {
        let mid = low + (high - low) / 2;
        if cost(mid) <= budget {
            low = mid;
        } else {
            high = mid;
        }
    }

    let mut extent = low;
    while extent > 1 && cost(extent) > budget {
        extent -= 1;
    }
    if extent == 0 {
        extent = 1;
    }

    let bytes = cost(extent);
    trace!(lower, upper, extent, bytes, budget, "search_extent");
    if bytes <= budget { extent } else { 0 }
}

/// Shrinks `extents` one unit at a time, depth first, until `fits` holds.
///
/// An axis is only decremented once every higher-priority axis is at 1.
/// Returns false if even `[1, 1, 1]` does not fit.
pub fn step_down<F>(extents: &mut [u64; 3], fits: F) -> bool
where
    F: Fn(&[u64; 3]) -> bool,
{
    loop {
        if fits(extents) {
            return true;
        }
        match [D_AXIS, H_AXIS, W_AXIS].into_iter().find(|&a| extents[a] > 1) {
            Some(axis) => extents[axis] -= 1,
            None => return false,
        }
    }
}

/// Joint search over all three axes.
///
/// Width is searched first with depth and height at 1. Height is only grown
/// once width is whole, and depth once height is whole.
pub fn search_nested<F>(upper: [u64; 3], budget: u64, cost: F) -> Option<[u64; 3]>
where
    F: Fn([u64; 3]) -> u64,
{
    let w = search_extent(0, upper[W_AXIS], budget, |w| cost([1, 1, w]));
    if w == 0 {
        return None;
    }

    let mut extents = if w < upper[W_AXIS] {
        [1, 1, w]
    } else {
        let h = search_extent(1, upper[H_AXIS], budget, |h| cost([1, h, w]));
        if h < upper[H_AXIS] {
            [1, h.max(1), w]
        } else {
            let d = search_extent(1, upper[D_AXIS], budget, |d| cost([d, h, w]));
            [d.max(1), h, w]
        }
    };

    if !step_down(&mut extents, |e| cost(*e) <= budget) {
        return None;
    }
    trace!(?extents, budget, "search_nested");
    Some(extents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_largest_fit() {
        // cost = 10 * x
        assert_eq!(search_extent(1, 100, 455, |x| 10 * x), 45);
        assert_eq!(search_extent(1, 100, 10_000, |x| 10 * x), 100);
    }

    #[test]
    fn test_infeasible_returns_zero() {
        assert_eq!(search_extent(1, 100, 5, |x| 10 * x), 0);
        assert_eq!(search_extent(0, 100, 5, |x| 10 * x), 0);
    }

    #[test]
    fn test_retry_at_one_from_zero_lower_bound() {
        assert_eq!(search_extent(0, 1, 10, |x| 10 * x), 1);
        assert_eq!(search_extent(0, 8, 15, |x| 10 * x), 1);
    }

    #[test]
    fn test_step_correction_on_rounded_cost() {
        // Alignment makes cost a staircase; the answer sits on a step edge.
        let cost = |x: u64| (x * 12).div_ceil(32) * 32;
        let best = search_extent(1, 64, 256, cost);
        assert!(cost(best) <= 256);
        assert!(best == 64 || cost(best + 1) > 256);
    }

    #[test]
    fn test_empty_range() {
        assert_eq!(search_extent(5, 4, 1_000, |x| x), 0);
        assert_eq!(search_extent(0, 0, 1_000, |x| x), 0);
    }

    #[test]
    fn test_saturated_cost_never_fits() {
        assert_eq!(search_extent(1, u64::MAX, 1 << 20, |_| u64::MAX), 0);
        assert_eq!(search_extent(1, u64::MAX, 1 << 20, |x| if x <= 7 { 8 } else { u64::MAX }), 7);
    }

    #[test]
    fn test_step_down_priority() {
        let mut e = [3, 3, 3];
        assert!(step_down(&mut e, |e| e.iter().product::<u64>() <= 6));
        assert_eq!(e, [1, 2, 3]);

        let mut e = [2, 2, 2];
        assert!(!step_down(&mut e, |_| false));
        assert_eq!(e, [1, 1, 1]);
    }

    #[test]
    fn test_nested_grows_width_first() {
        let cost = |e: [u64; 3]| e.iter().product::<u64>();
        assert_eq!(search_nested([4, 4, 8], 5, cost), Some([1, 1, 5]));
        assert_eq!(search_nested([4, 4, 8], 20, cost), Some([1, 2, 8]));
        assert_eq!(search_nested([4, 4, 8], 100, cost), Some([3, 4, 8]));
        assert_eq!(search_nested([4, 4, 8], 0, cost), None);
    }
}
