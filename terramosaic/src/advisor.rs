//! Memory-based downsample recommendations for loading large rasters.
//!
//! The advice is only a recommendation: nothing is reserved, and memory may
//! change between the check and the load.

use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::warn;

use crate::error::Result;

/// Working memory assumed per megabyte of file.
const PROCESSING_FACTOR: f64 = 3.0;

/// Share of available memory a load may use.
const USABLE_FRACTION: f64 = 0.6;

/// Smallest factor recommended once downsampling is needed at all.
const MIN_DOWNSAMPLE_FACTOR: u32 = 4;

/// Source of the currently available memory.
pub trait MemoryProbe: Send + Sync {
    /// Available memory in megabytes.
    fn available_mb(&self) -> f64;
}

/// Reads `MemAvailable` from `/proc/meminfo`.
///
/// Reports 0 when the file is unreadable, which makes every file look too
/// large rather than silently fine.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMemoryProbe;

impl MemoryProbe for SystemMemoryProbe {
    fn available_mb(&self) -> f64 {
        let content = fs::read_to_string("/proc/meminfo").unwrap_or_default();
        parse_mem_available_kb(&content) as f64 / 1024.0
    }
}

fn parse_mem_available_kb(meminfo: &str) -> u64 {
    meminfo
        .lines()
        .find(|line| line.starts_with("MemAvailable:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// A probe reporting a constant amount of memory.
#[derive(Debug, Clone, Copy)]
pub struct FixedMemoryProbe(pub f64);

impl MemoryProbe for FixedMemoryProbe {
    fn available_mb(&self) -> f64 {
        self.0
    }
}

/// Recommendation returned by [`MemoryAdvisor`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DownsampleAdvice {
    /// Whether the file fits at full resolution.
    pub can_process: bool,
    /// Factor to pass to [`crate::loader::load_downsampled`].
    pub factor: u32,
    /// Estimated working memory for a full-resolution load.
    pub estimated_mb: f64,
    /// Memory reported available at the time of the check.
    pub available_mb: f64,
}

/// Recommends a downsample factor from file size and available memory.
pub struct MemoryAdvisor<P = SystemMemoryProbe> {
    probe: P,
}

impl MemoryAdvisor<SystemMemoryProbe> {
    /// Advisor backed by `/proc/meminfo`.
    pub fn system() -> Self {
        Self {
            probe: SystemMemoryProbe,
        }
    }
}

impl<P: MemoryProbe> MemoryAdvisor<P> {
    /// Advisor backed by a custom probe.
    pub fn with_probe(probe: P) -> Self {
        Self { probe }
    }

    /// Advice for a file of `file_size_mb` megabytes.
    ///
    /// The estimate is three times the file size. If it fits in 60% of
    /// available memory the factor is 1, otherwise
    /// `max(4, ceil(sqrt(estimate / (available * 0.6))))`.
    pub fn advise(&self, file_size_mb: f64) -> DownsampleAdvice {
        let estimated_mb = file_size_mb * PROCESSING_FACTOR;
        let available_mb = self.probe.available_mb();
        let budget = available_mb * USABLE_FRACTION;

        if estimated_mb < budget {
            return DownsampleAdvice {
                can_process: true,
                factor: 1,
                estimated_mb,
                available_mb,
            };
        }

        let factor = if budget > 0.0 {
            (estimated_mb / budget).sqrt().ceil() as u32
        } else {
            u32::MAX
        };
        let factor = factor.max(MIN_DOWNSAMPLE_FACTOR);

        warn!(
            estimated_mb,
            available_mb, factor, "Raster too large for available memory, downsampling"
        );

        DownsampleAdvice {
            can_process: false,
            factor,
            estimated_mb,
            available_mb,
        }
    }

    /// Advice for the file at `path`, sized from its metadata.
    pub fn advise_for_file<Q: AsRef<Path>>(&self, path: Q) -> Result<DownsampleAdvice> {
        let size = fs::metadata(path)?.len();
        Ok(self.advise(size as f64 / (1024.0 * 1024.0)))
    }
}
