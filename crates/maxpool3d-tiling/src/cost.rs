//! Scratch-buffer cost model.
//!
//! Pure byte accounting for one work-item. Every region is rounded up to the
//! budget alignment on its own, so the total is the sum of aligned parts and
//! never the aligned sum. Arithmetic saturates, so a tile too large to
//! describe in bytes costs `u64::MAX` and never fits.

use serde::{Deserialize, Serialize};

use crate::platform::BufferBudget;
use crate::problem::ProblemSpec;
use crate::{ceil_align, ceil_div, saturating_product};

/// Bytes per gather offset in the index-gather formulation.
const GATHER_OFFSET_BYTES: u64 = 4;

/// How a work-item stages its data in scratch memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Formulation {
    /// Strided copy of the input tile, vector max over the window.
    #[default]
    Staged,
    /// Staged tile plus gather offsets for the no-expand-indices kernel.
    Gather,
    /// One output element at a time, window loaded in chunks.
    Elementwise,
}

/// Extents of one work-item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileShape {
    /// Batch slices processed together.
    pub batch: u64,
    /// Output extents (D, H, W).
    pub out: [u64; 3],
    /// Kernel sub-extents staged per pass. Equal to the kernel unless split.
    pub kernel_window: [u64; 3],
    /// Running max/argmax carried across kernel passes.
    pub accumulate: bool,
    pub formulation: Formulation,
    /// Window elements loaded at once (elementwise only).
    pub window_chunk: u64,
}

impl TileShape {
    /// Staged tile with the full kernel window.
    pub fn staged(problem: &ProblemSpec, batch: u64, out: [u64; 3]) -> Self {
        Self {
            batch,
            out,
            kernel_window: problem.kernel,
            accumulate: false,
            formulation: Formulation::Staged,
            window_chunk: 0,
        }
    }

    pub fn gather(problem: &ProblemSpec, out: [u64; 3]) -> Self {
        Self {
            formulation: Formulation::Gather,
            ..Self::staged(problem, 1, out)
        }
    }

    /// Single output element whose kernel window is split into sub-windows.
    pub fn kernel_split(problem: &ProblemSpec, kernel_window: [u64; 3]) -> Self {
        Self {
            kernel_window,
            accumulate: true,
            ..Self::staged(problem, 1, [1; 3])
        }
    }

    pub fn elementwise(problem: &ProblemSpec, window_chunk: u64) -> Self {
        Self {
            formulation: Formulation::Elementwise,
            window_chunk,
            ..Self::staged(problem, 1, [1; 3])
        }
    }

    /// Input extents implied by the output extents and kernel window.
    pub fn input_extent(&self, problem: &ProblemSpec) -> [u64; 3] {
        std::array::from_fn(|a| {
            let out = self.out[a].max(1);
            let footprint = problem.dilation[a].saturating_mul(self.kernel_window[a].max(1) - 1);
            (out - 1)
                .saturating_mul(problem.stride[a])
                .saturating_add(footprint)
                .saturating_add(1)
        })
    }

    /// Output elements held in scratch at once.
    pub fn output_elements(&self) -> u64 {
        saturating_product(std::iter::once(self.batch).chain(self.out))
    }

    pub fn window_volume(&self) -> u64 {
        saturating_product(self.kernel_window)
    }
}

/// Per-region scratch bytes of one work-item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ByteBreakdown {
    pub input: u64,
    pub output: u64,
    pub index: u64,
    pub mask: u64,
    /// Gather offsets; zero outside the gather formulation.
    pub aux: u64,
    pub total: u64,
}

impl ByteBreakdown {
    fn sum(input: u64, output: u64, index: u64, mask: u64, aux: u64) -> Self {
        Self {
            input,
            output,
            index,
            mask,
            aux,
            total: input
                .saturating_add(output)
                .saturating_add(index)
                .saturating_add(mask)
                .saturating_add(aux),
        }
    }
}

/// Scratch bytes needed to process `tile`.
///
/// Never fails; the result may exceed the budget and the caller decides.
pub fn estimate(tile: &TileShape, problem: &ProblemSpec, budget: &BufferBudget) -> ByteBreakdown {
    let align = budget.alignment_bytes;
    let elem = problem.element_bytes();
    let idx = problem.index_bytes();

    if tile.formulation == Formulation::Elementwise {
        let chunk = tile.window_chunk.max(1);
        return ByteBreakdown::sum(
            ceil_align(chunk.saturating_mul(elem), align),
            ceil_align(elem, align),
            ceil_align(idx, align),
            0,
            0,
        );
    }

    let in_elems = saturating_product(std::iter::once(tile.batch).chain(tile.input_extent(problem)));
    let out_elems = tile.output_elements();
    let lanes = budget.lanes(elem);

    let input = ceil_align(in_elems.saturating_mul(elem), align);
    let mut output = ceil_align(out_elems.saturating_mul(elem), align);
    if tile.accumulate {
        output = output.saturating_mul(2);
    }
    let index = ceil_align(out_elems.saturating_mul(idx), align);
    let mask_row = ceil_align(ceil_div(tile.window_volume().saturating_mul(lanes), 8), align);
    let mask = mask_row.saturating_mul(ceil_div(out_elems, lanes));
    let aux = match tile.formulation {
        Formulation::Gather => ceil_align(out_elems.saturating_mul(GATHER_OFFSET_BYTES), align),
        _ => 0,
    };

    ByteBreakdown::sum(input, output, index, mask, aux)
}
