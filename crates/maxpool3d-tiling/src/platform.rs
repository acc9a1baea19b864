//! Platform description and scratch-memory budget.
//!
//! The planner never queries hardware itself. Callers describe the target
//! with a [`PlatformInfo`] (compute-unit count, per-unit fast-memory size,
//! vector width and capability flags) and the planner derives a
//! [`BufferBudget`] from it.
//!
//! # Environment Variables
//!
//! Only [`PlatformInfo::with_env_overrides`] reads these:
//!
//! - `MAXPOOL3D_CORE_NUM` - Override compute-unit count
//! - `MAXPOOL3D_UB_SIZE` - Override per-unit scratch size in bytes
//! - `MAXPOOL3D_INDEX_GATHER` - Enable the gather formulation ("1" or "true")

use std::env;

use serde::{Deserialize, Serialize};

/// Bytes held back from the scratchpad for the kernel's own bookkeeping.
pub const UB_RESERVED_BYTES: u64 = 1024;

/// Scratchpad block alignment.
pub const UB_BLOCK_BYTES: u64 = 32;

/// Defaults when the caller has nothing better.
const DEFAULT_CORE_NUM: u64 = 48;
const DEFAULT_UB_SIZE: u64 = 192 * 1024;
const DEFAULT_VECTOR_BYTES: u64 = 256;

/// Hardware features that gate individual strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capabilities {
    /// Multi-dimensional strided copy into the scratchpad (tile staging).
    pub strided_copy: bool,
    /// Staged copy of partial kernel windows with running max accumulation.
    pub staged_kernel_copy: bool,
    /// Per-element loads from global memory (element-wise fallback).
    pub element_gather: bool,
    /// Vector index-gather primitive (no-expand-indices formulation).
    pub index_gather: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            strided_copy: true,
            staged_kernel_copy: true,
            element_gather: true,
            index_gather: false,
        }
    }
}

impl Capabilities {
    /// Nothing supported; useful as a base for tests.
    pub fn none() -> Self {
        Self {
            strided_copy: false,
            staged_kernel_copy: false,
            element_gather: false,
            index_gather: false,
        }
    }
}

/// Target description supplied by the platform query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    /// Number of compute units work is spread over.
    pub core_num: u64,
    /// Fast-memory (scratchpad) capacity per compute unit in bytes.
    pub ub_size: u64,
    /// Vector register width in bytes.
    pub vector_bytes: u64,
    pub capabilities: Capabilities,
}

impl Default for PlatformInfo {
    fn default() -> Self {
        Self {
            core_num: DEFAULT_CORE_NUM,
            ub_size: DEFAULT_UB_SIZE,
            vector_bytes: DEFAULT_VECTOR_BYTES,
            capabilities: Capabilities::default(),
        }
    }
}

impl PlatformInfo {
    pub fn new(core_num: u64, ub_size: u64) -> Self {
        Self {
            core_num,
            ub_size,
            ..Default::default()
        }
    }

    /// Default platform with a different core count.
    pub fn with_cores(core_num: u64) -> Self {
        Self {
            core_num,
            ..Default::default()
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Applies `MAXPOOL3D_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| env::var(name).ok())
    }

    /// Applies `MAXPOOL3D_*` overrides read through `lookup`.
    ///
    /// A zero or unparsable core count is ignored, as is an unparsable
    /// scratch size.
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());
        if let Some(cores) = number("MAXPOOL3D_CORE_NUM").filter(|&c| c > 0) {
            self.core_num = cores;
        }
        if let Some(ub) = number("MAXPOOL3D_UB_SIZE") {
            self.ub_size = ub;
        }
        if let Some(v) = lookup("MAXPOOL3D_INDEX_GATHER") {
            self.capabilities.index_gather = parse_flag(&v);
        }
        self
    }

    /// Scratch budget left after the fixed reservation.
    pub fn budget(&self) -> BufferBudget {
        BufferBudget::from_platform(self)
    }
}

/// Per-unit scratch budget every candidate tile is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferBudget {
    /// Usable bytes per compute unit.
    pub total_bytes: u64,
    /// Every scratch region is rounded up to this.
    pub alignment_bytes: u64,
    /// Vector register width, sets the lane count of the mask buffer.
    pub vector_bytes: u64,
}

impl BufferBudget {
    pub fn new(total_bytes: u64, alignment_bytes: u64) -> Self {
        Self {
            total_bytes,
            alignment_bytes,
            vector_bytes: DEFAULT_VECTOR_BYTES,
        }
    }

    pub fn from_platform(platform: &PlatformInfo) -> Self {
        Self {
            total_bytes: platform.ub_size.saturating_sub(UB_RESERVED_BYTES),
            alignment_bytes: UB_BLOCK_BYTES,
            vector_bytes: platform.vector_bytes.max(1),
        }
    }

    /// Same alignment and vector width, different capacity.
    pub fn with_total(self, total_bytes: u64) -> Self {
        Self { total_bytes, ..self }
    }

    #[inline]
    pub fn fits(&self, bytes: u64) -> bool {
        bytes <= self.total_bytes
    }

    /// Vector lanes for elements of `element_bytes`.
    #[inline]
    pub fn lanes(&self, element_bytes: u64) -> u64 {
        (self.vector_bytes / element_bytes.max(1)).max(1)
    }
}

/// Format bytes as human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    value == "1" || value.eq_ignore_ascii_case("true")
}
