//! Problem normalization.
//!
//! Turns raw pooling attributes (kernel/stride/pad/dilation lists, padding
//! mode, ceil-mode) plus the input descriptor into an immutable
//! [`ProblemSpec`]: per-axis arrays in depth/height/width order, the output
//! shape, and the padding every downstream stage must use.
//!
//! Under ceil-mode the back padding is rewritten so that
//! `out = floor((in + front + back - effK) / stride) + 1` holds exactly.
//! An axis that produces a single output with unit dilation is then
//! collapsed to one unpadded window over the input.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{TilingError, TilingResult, ceil_div, saturating_product};

/// Element type of the pooled tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataType {
    #[default]
    F32,
    F16,
    BF16,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size_bytes(self) -> u64 {
        match self {
            Self::F32 => 4,
            Self::F16 | Self::BF16 => 2,
        }
    }

    /// Datatype class digit used by the dispatch key.
    pub fn class(self) -> u64 {
        match self {
            Self::F32 => 0,
            Self::F16 => 1,
            Self::BF16 => 2,
        }
    }

    /// Parses the usual short names (`float32`, `fp16`, `bf16`, ...).
    pub fn parse(name: &str) -> TilingResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "f32" | "fp32" | "float" | "float32" => Ok(Self::F32),
            "f16" | "fp16" | "half" | "float16" => Ok(Self::F16),
            "bf16" | "bfloat16" => Ok(Self::BF16),
            other => Err(TilingError::UnsupportedDtype(other.to_string())),
        }
    }
}

/// Element type of the argmax output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IndexType {
    #[default]
    I32,
    I64,
}

impl IndexType {
    pub fn size_bytes(self) -> u64 {
        match self {
            Self::I32 => 4,
            Self::I64 => 8,
        }
    }
}

/// How padding is derived from the attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PaddingMode {
    /// Explicit pads from [`PoolAttrs::pad`].
    #[default]
    Calculated,
    /// Output is `ceil(in / stride)`; pads are derived.
    Same,
    /// No padding at all.
    Valid,
}

/// Raw pooling attributes as received from the operator.
///
/// Lists hold 1 entry (broadcast to all axes), 3 entries (D, H, W) or
/// 5 entries in NCDHW order. The N and C entries of a 5-entry kernel or
/// stride must be 1. `pad` accepts 1, 3 or 6 entries (front/back for D,
/// then H, then W).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolAttrs {
    pub kernel: Vec<i64>,
    pub stride: Vec<i64>,
    pub pad: Vec<i64>,
    pub dilation: Vec<i64>,
    pub padding_mode: PaddingMode,
    pub ceil_mode: bool,
}

impl Default for PoolAttrs {
    fn default() -> Self {
        Self {
            kernel: vec![1],
            stride: vec![1],
            pad: vec![0],
            dilation: vec![1],
            padding_mode: PaddingMode::Calculated,
            ceil_mode: false,
        }
    }
}

impl PoolAttrs {
    /// Same kernel and stride on every axis, no padding.
    pub fn cubic(kernel: i64, stride: i64) -> Self {
        Self {
            kernel: vec![kernel],
            stride: vec![stride],
            ..Default::default()
        }
    }
}

/// Input tensor descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDesc {
    /// Flattened leading dimensions (N * C for NCDHW).
    pub batches: i64,
    /// Spatial extents (D, H, W).
    pub spatial: [i64; 3],
    pub dtype: DataType,
    pub index_dtype: IndexType,
    /// Output spatial shape declared by the graph, checked when present.
    pub declared_output: Option<[i64; 3]>,
}

impl InputDesc {
    pub fn new(batches: i64, spatial: [i64; 3]) -> Self {
        Self {
            batches,
            spatial,
            dtype: DataType::F32,
            index_dtype: IndexType::I32,
            declared_output: None,
        }
    }

    pub fn with_dtype(mut self, dtype: DataType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn with_index_dtype(mut self, index_dtype: IndexType) -> Self {
        self.index_dtype = index_dtype;
        self
    }

    pub fn with_declared_output(mut self, output: [i64; 3]) -> Self {
        self.declared_output = Some(output);
        self
    }
}

/// Normalized pooling problem. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProblemSpec {
    pub batches: u64,
    pub input_shape: [u64; 3],
    pub output_shape: [u64; 3],
    pub kernel: [u64; 3],
    pub stride: [u64; 3],
    /// `[front, back]` per axis, after ceil-mode adjustment.
    pub pad: [[u64; 2]; 3],
    pub dilation: [u64; 3],
    pub dtype: DataType,
    pub index_dtype: IndexType,
    pub ceil_mode: bool,
}

impl ProblemSpec {
    /// Validates the attributes and computes output shape and padding.
    pub fn build(input: &InputDesc, attrs: &PoolAttrs) -> TilingResult<Self> {
        if input.batches <= 0 {
            return Err(TilingError::InvalidShape(format!(
                "batch count must be positive, got {}",
                input.batches
            )));
        }
        let input_shape = positive_axes("input shape", input.spatial)?;
        let mut kernel = positive_axes("kernel", expand_axes("kernel", &attrs.kernel, true)?)?;
        let mut stride = positive_axes("stride", expand_axes("stride", &attrs.stride, true)?)?;
        let dilation = positive_axes("dilation", expand_axes("dilation", &attrs.dilation, false)?)?;
        let batches = input.batches as u64;

        let declared_pads = match attrs.padding_mode {
            PaddingMode::Calculated => expand_pads(&attrs.pad)?,
            PaddingMode::Same | PaddingMode::Valid => [[0; 2]; 3],
        };

        let mut pad = [[0u64; 2]; 3];
        let mut output_shape = [0u64; 3];
        for axis in 0..3 {
            let eff = effective_extent(kernel[axis], dilation[axis]).ok_or_else(|| {
                TilingError::InvalidShape(format!(
                    "kernel {} with dilation {} on axis {axis} overflows",
                    kernel[axis], dilation[axis]
                ))
            })?;
            let (front, back, out) = match attrs.padding_mode {
                PaddingMode::Calculated => {
                    let [front, back] = declared_pads[axis];
                    for p in [front, back] {
                        if p < 0 || p as u64 >= eff {
                            return Err(TilingError::InvalidAttribute(format!(
                                "pad {p} on axis {axis} must be in [0, {eff})"
                            )));
                        }
                    }
                    resolve_axis(
                        input_shape[axis],
                        front as u64,
                        back as u64,
                        eff,
                        stride[axis],
                        attrs.ceil_mode,
                    )?
                }
                PaddingMode::Valid => {
                    resolve_axis(input_shape[axis], 0, 0, eff, stride[axis], false)?
                }
                PaddingMode::Same => {
                    let out = ceil_div(input_shape[axis], stride[axis]);
                    let covered = ((out - 1) * stride[axis]).checked_add(eff).ok_or_else(|| {
                        TilingError::InvalidShape(format!("window extent on axis {axis} overflows"))
                    })?;
                    let need = covered.saturating_sub(input_shape[axis]);
                    let front = need / 2;
                    (front, need - front, out)
                }
            };
            trace!(axis, front, back, out, "resolved axis");
            pad[axis] = [front, back];
            output_shape[axis] = out;
        }

        if let Some(declared) = input.declared_output {
            let declared = positive_axes("declared output", declared)?;
            if declared != output_shape {
                return Err(TilingError::InvalidShape(format!(
                    "declared output {declared:?} disagrees with computed {output_shape:?}"
                )));
            }
        }

        let elements = [input_shape, output_shape]
            .map(|shape| saturating_product(std::iter::once(batches).chain(shape)));
        let widest = input.dtype.size_bytes().max(input.index_dtype.size_bytes());
        if elements.iter().any(|&n| n.checked_mul(widest).is_none()) {
            return Err(TilingError::InvalidShape(format!(
                "{batches} x {input_shape:?} elements are not addressable in bytes"
            )));
        }

        for axis in 0..3 {
            if output_shape[axis] == 1 && dilation[axis] == 1 {
                let window = kernel[axis].saturating_sub(pad[axis][0]).clamp(1, input_shape[axis]);
                trace!(axis, kernel = kernel[axis], window, "collapsed single-output axis");
                kernel[axis] = window;
                stride[axis] = input_shape[axis];
                pad[axis] = [0, 0];
            }
        }

        Ok(Self {
            batches,
            input_shape,
            output_shape,
            kernel,
            stride,
            pad,
            dilation,
            dtype: input.dtype,
            index_dtype: input.index_dtype,
            ceil_mode: attrs.ceil_mode,
        })
    }

    /// Dilated kernel footprint on one axis.
    #[inline]
    pub fn effective_kernel(&self, axis: usize) -> u64 {
        effective_extent(self.kernel[axis], self.dilation[axis]).unwrap_or(u64::MAX)
    }

    /// Input extent covered by `out` consecutive outputs on one axis.
    #[inline]
    pub fn input_extent(&self, axis: usize, out: u64) -> u64 {
        if out == 0 {
            return 0;
        }
        (out - 1)
            .saturating_mul(self.stride[axis])
            .saturating_add(self.effective_kernel(axis))
    }

    /// Padded input extent on one axis.
    #[inline]
    pub fn padded_extent(&self, axis: usize) -> u64 {
        self.input_shape[axis]
            .saturating_add(self.pad[axis][0])
            .saturating_add(self.pad[axis][1])
    }

    pub fn kernel_volume(&self) -> u64 {
        saturating_product(self.kernel)
    }

    /// Output elements per batch slice.
    pub fn output_volume(&self) -> u64 {
        saturating_product(self.output_shape)
    }

    pub fn element_bytes(&self) -> u64 {
        self.dtype.size_bytes()
    }

    pub fn index_bytes(&self) -> u64 {
        self.index_dtype.size_bytes()
    }

    pub fn has_padding(&self) -> bool {
        self.pad.iter().flatten().any(|&p| p != 0)
    }

    pub fn unit_dilation(&self) -> bool {
        self.dilation.iter().all(|&d| d == 1)
    }
}

/// `dilation * (kernel - 1) + 1`, or `None` on overflow.
#[inline]
pub fn effective_extent(kernel: u64, dilation: u64) -> Option<u64> {
    dilation.checked_mul(kernel.saturating_sub(1))?.checked_add(1)
}

/// Output extent and adjusted padding for one axis.
///
/// Returns `(front, back, out)`.
fn resolve_axis(
    input: u64,
    front: u64,
    back: u64,
    eff: u64,
    stride: u64,
    ceil_mode: bool,
) -> TilingResult<(u64, u64, u64)> {
    let total = input
        .checked_add(front)
        .and_then(|t| t.checked_add(back))
        .ok_or_else(|| TilingError::InvalidShape(format!("padded extent of {input} overflows")))?;
    if total < eff {
        return Err(TilingError::InvalidShape(format!(
            "padded extent {total} is smaller than the kernel footprint {eff}"
        )));
    }
    if !ceil_mode {
        return Ok((front, back, (total - eff) / stride + 1));
    }

    let mut out = ceil_div(total - eff, stride) + 1;
    // The last window must start inside the input or the front padding.
    if (out - 1).saturating_mul(stride) >= input + front {
        out -= 1;
    }
    let needed = ((out - 1) * stride).saturating_add(eff);
    Ok((front, needed.saturating_sub(input + front), out))
}

/// Expands a 1-, 3- or 5-entry (NCDHW) list to D/H/W.
///
/// With `unit_nc`, the N and C entries of a 5-entry list must be 1.
fn expand_axes(name: &str, values: &[i64], unit_nc: bool) -> TilingResult<[i64; 3]> {
    match values {
        [v] => Ok([*v; 3]),
        [d, h, w] => Ok([*d, *h, *w]),
        [n, c, d, h, w] => {
            if unit_nc && (*n != 1 || *c != 1) {
                return Err(TilingError::InvalidAttribute(format!(
                    "{name} of the N and C dimensions must be 1, got [{n}, {c}]"
                )));
            }
            Ok([*d, *h, *w])
        }
        _ => Err(TilingError::InvalidAttribute(format!(
            "{name} must have 1, 3 or 5 elements, got {}",
            values.len()
        ))),
    }
}

fn expand_pads(values: &[i64]) -> TilingResult<[[i64; 2]; 3]> {
    match values {
        [p] => Ok([[*p; 2]; 3]),
        [d, h, w] => Ok([[*d; 2], [*h; 2], [*w; 2]]),
        [df, db, hf, hb, wf, wb] => Ok([[*df, *db], [*hf, *hb], [*wf, *wb]]),
        _ => Err(TilingError::InvalidAttribute(format!(
            "pad must have 1, 3 or 6 elements, got {}",
            values.len()
        ))),
    }
}

fn positive_axes(name: &str, values: [i64; 3]) -> TilingResult<[u64; 3]> {
    if values.iter().any(|&v| v <= 0) {
        return Err(TilingError::InvalidShape(format!(
            "{name} entries must be positive, got {values:?}"
        )));
    }
    Ok(values.map(|v| v as u64))
}
