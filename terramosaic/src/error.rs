//! Error types for the terramosaic library.

use std::path::PathBuf;
use thiserror::Error;

use crate::bounds::Bounds;

/// Errors that can occur while locating, mosaicking or loading rasters.
#[derive(Error, Debug)]
pub enum MosaicError {
    /// IO error when reading or writing files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The TIFF decoder or encoder rejected the data.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Coordinates are outside the supported raster coverage.
    #[error("Coordinates out of range: lat={lat}, lon={lon} (supported: lat 10° to 80°, lon -180° to -10°)")]
    CoordinateOutOfRange { lat: f64, lon: f64 },

    /// A single required tile is absent from the storage backend.
    #[error("Tile not found: {path}")]
    TileNotFound { path: String },

    /// None of the candidate tiles for a request exist.
    #[error("No tiles found for bounds {bounds} ({candidates} candidates checked)")]
    NoTilesFound { bounds: Bounds, candidates: usize },

    /// Merging the source tiles failed.
    #[error("Merge failed: {reason}")]
    MergeFailure { reason: String },

    /// Cropping the merged raster failed.
    #[error("Crop of {path} failed: {reason}")]
    CropFailure { path: PathBuf, reason: String },

    /// The raster layout is not something this crate can handle.
    #[error("Unsupported raster {path}: {reason}")]
    UnsupportedRaster { path: String, reason: String },

    /// A caller-supplied argument was rejected.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The storage backend failed to serve a request.
    #[error("Storage error for {path}: {reason}")]
    Storage { path: String, reason: String },

    /// Configuration is missing or inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network request failed.
    #[error("Network request to {url} failed: {reason}")]
    Network { url: String, reason: String },
}

/// Result type alias using [`MosaicError`].
pub type Result<T> = std::result::Result<T, MosaicError>;
