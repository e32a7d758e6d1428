//! Merging located tiles into one raster and cropping it to the request.
//!
//! [`MosaicEngine::combine`] is the end-to-end operation: compute the bounds
//! of a point, locate the 1° tiles covering them, read the ones that exist,
//! merge, optionally crop, and write a single GeoTIFF.
//!
//! # Example
//!
//! ```ignore
//! use std::path::Path;
//! use std::sync::Arc;
//! use terramosaic::{LocalStorage, MosaicEngine};
//!
//! let engine = MosaicEngine::new(Arc::new(LocalStorage::new("/data")));
//! let result = engine.combine("dem", Path::new("out/denver.tif"), 39.74, -104.99, 1609.0, true)?;
//! println!("{} tiles merged into {}", result.tiles_used.len(), result.path.display());
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bounds::{compute_bounds, validate_elevation, Bounds, GeoPoint};
use crate::error::{MosaicError, Result};
use crate::geotiff::{Raster, RasterMeta, RasterTile};
use crate::locator::{locate_all, resolve, TileKey};
use crate::storage::StorageBackend;

/// Tolerance, in pixels, for snapping window edges onto the pixel grid.
const SNAP_EPSILON: f64 = 1e-6;

/// Outcome of a successful [`MosaicEngine::combine`].
#[derive(Debug, Clone, Serialize)]
pub struct MosaicResult {
    /// Where the GeoTIFF was written.
    pub path: PathBuf,
    /// Bounds computed from the request.
    pub requested: Bounds,
    /// Extent of the written raster.
    pub output: Bounds,
    /// Storage keys of the tiles that were merged.
    pub tiles_used: Vec<String>,
    /// Storage keys of candidate tiles that do not exist.
    pub tiles_missing: Vec<String>,
}

/// Stateless mosaic builder over a storage backend.
#[derive(Clone)]
pub struct MosaicEngine {
    storage: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for MosaicEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MosaicEngine")
            .field("storage", &self.storage.describe())
            .finish()
    }
}

impl MosaicEngine {
    /// Create an engine reading tiles from `storage`.
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// The backend tiles are read from.
    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// Build a GeoTIFF of the terrain around a point.
    ///
    /// Tiles are looked up under `input_dir` in the storage backend. The
    /// merged raster is staged as `<stem>_temp.tif` next to `output_path`;
    /// with `crop` it is clipped to the computed bounds (all-touched), and in
    /// both cases the final file is moved into place by rename. Staging files
    /// are removed on every exit path.
    ///
    /// # Errors
    ///
    /// - [`MosaicError::CoordinateOutOfRange`] if the point lies outside the
    ///   raster coverage.
    /// - [`MosaicError::InvalidArgument`] unless `elevation_m` is finite and
    ///   positive.
    /// - [`MosaicError::NoTilesFound`] if none of the candidate tiles exist;
    ///   nothing is written.
    /// - [`MosaicError::MergeFailure`] / [`MosaicError::CropFailure`] if the
    ///   tiles cannot be combined or do not reach the requested bounds.
    /// - Read and decode errors of individual tiles.
    pub fn combine(
        &self,
        input_dir: &str,
        output_path: &Path,
        lat: f64,
        lon: f64,
        elevation_m: f64,
        crop: bool,
    ) -> Result<MosaicResult> {
        GeoPoint::new(lat, lon)?;
        validate_elevation(elevation_m)?;

        let requested = compute_bounds(lat, lon, elevation_m);
        debug!(%requested, lat, lon, elevation_m, "Computed request bounds");

        let candidates = locate_all(&requested);
        debug!(count = candidates.len(), "Candidate tiles");

        let (found, missing) = self.partition_existing(input_dir, &candidates)?;
        for path in &missing {
            warn!(path = %path, "Tile not found");
        }
        if found.is_empty() {
            return Err(MosaicError::NoTilesFound {
                bounds: requested,
                candidates: candidates.len(),
            });
        }

        let mut rasters = Vec::with_capacity(found.len());
        for path in &found {
            let bytes = self.storage.read_file(path)?;
            rasters.push(RasterTile::from_bytes(path.as_str(), bytes)?.read_band()?);
        }
        let merged = merge(&rasters)?;
        let merged_bounds = merged.meta.bounds();
        drop(rasters);

        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let merged_temp = TempArtifact::new(sibling_path(output_path, "_temp")?);
        merged.write(merged_temp.path())?;
        drop(merged);

        let output = if crop {
            let staged = RasterTile::open(merged_temp.path())?.read_band()?;
            let cropped = self::crop(&staged, &requested).ok_or_else(|| MosaicError::CropFailure {
                path: merged_temp.path().to_path_buf(),
                reason: format!(
                    "bounds {} do not overlap merged extent {}",
                    requested,
                    staged.meta.bounds()
                ),
            })?;

            let crop_temp = TempArtifact::new(sibling_path(output_path, "_crop_temp")?);
            cropped.write(crop_temp.path())?;
            crop_temp.persist(output_path)?;
            cropped.meta.bounds()
        } else {
            merged_temp.persist(output_path)?;
            merged_bounds
        };

        info!(
            tiles = found.len(),
            missing = missing.len(),
            output = %output_path.display(),
            "Mosaic written"
        );

        Ok(MosaicResult {
            path: output_path.to_path_buf(),
            requested,
            output,
            tiles_used: found,
            tiles_missing: missing,
        })
    }

    fn partition_existing(
        &self,
        input_dir: &str,
        candidates: &[TileKey],
    ) -> Result<(Vec<String>, Vec<String>)> {
        let mut found = Vec::new();
        let mut missing = Vec::new();
        for key in candidates {
            match resolve(self.storage.as_ref(), input_dir, key) {
                Ok(path) => found.push(path),
                Err(MosaicError::TileNotFound { path }) => missing.push(path),
                Err(e) => return Err(e),
            }
        }
        Ok((found, missing))
    }
}

/// Merge rasters into one covering the union of their extents.
///
/// The output takes its pixel size, pixel type, nodata value and CRS from
/// the first input. Each output pixel is filled by nearest-neighbour lookup
/// in the first input holding a valid sample there; pixels no input covers
/// keep the nodata value (0 if the first input declares none).
///
/// # Errors
///
/// Returns [`MosaicError::MergeFailure`] for an empty input list or inputs in
/// different coordinate reference systems.
pub fn merge(rasters: &[Raster]) -> Result<Raster> {
    let first = rasters.first().ok_or_else(|| MosaicError::MergeFailure {
        reason: "no input rasters".to_string(),
    })?;
    if let Some(other) = rasters.iter().find(|r| r.meta.crs != first.meta.crs) {
        return Err(MosaicError::MergeFailure {
            reason: format!(
                "inputs use different coordinate reference systems ({} vs {})",
                first.meta.bounds(),
                other.meta.bounds()
            ),
        });
    }

    let extent = rasters
        .iter()
        .map(|r| r.meta.bounds())
        .reduce(|a, b| a.union(&b))
        .unwrap_or_else(|| first.meta.bounds());

    let res_x = first.meta.transform.pixel_width;
    let res_y = first.meta.transform.pixel_height;
    let width = snap((extent.right - extent.left) / res_x).round().max(1.0) as u32;
    let height = snap((extent.top - extent.bottom) / res_y).round().max(1.0) as u32;

    let mut transform = first.meta.transform;
    transform.origin_x = extent.left;
    transform.origin_y = extent.top;

    let fill = first.meta.nodata.unwrap_or(0.0);
    let meta = RasterMeta {
        width,
        height,
        transform,
        ..first.meta.clone()
    };
    let mut data = vec![fill; meta.len()];
    let mut filled = vec![false; meta.len()];

    for raster in rasters {
        let src = &raster.meta;
        let b = src.bounds();
        // Output pixels whose centres may fall inside this input
        let col0 = transform.col_of(b.left).floor().max(0.0) as usize;
        let col1 = (transform.col_of(b.right).ceil().max(0.0) as usize).min(width as usize);
        let row0 = transform.row_of(b.top).floor().max(0.0) as usize;
        let row1 = (transform.row_of(b.bottom).ceil().max(0.0) as usize).min(height as usize);

        for row in row0..row1 {
            for col in col0..col1 {
                let idx = row * width as usize + col;
                if filled[idx] {
                    continue;
                }
                let (x, y) = transform.pixel_center(col, row);
                let sc = src.transform.col_of(x).floor();
                let sr = src.transform.row_of(y).floor();
                if sc < 0.0 || sr < 0.0 {
                    continue;
                }
                if let Some(value) = raster.get(sc as usize, sr as usize) {
                    if !src.is_nodata(value) {
                        data[idx] = value;
                        filled[idx] = true;
                    }
                }
            }
        }
    }

    Ok(Raster { meta, data })
}

/// Clip a raster to `bounds` with all-touched semantics.
///
/// The pixel window is rounded outwards so every pixel the bounds touch is
/// kept, then clamped to the raster. Pixels of the window not touched by the
/// bounds are set to nodata. Returns `None` if the bounds miss the raster.
pub fn crop(raster: &Raster, bounds: &Bounds) -> Option<Raster> {
    let meta = &raster.meta;
    let t = meta.transform;
    let width = meta.width as f64;
    let height = meta.height as f64;

    let col0 = snap(t.col_of(bounds.left)).floor().clamp(0.0, width) as usize;
    let col1 = snap(t.col_of(bounds.right)).ceil().clamp(0.0, width) as usize;
    let row0 = snap(t.row_of(bounds.top)).floor().clamp(0.0, height) as usize;
    let row1 = snap(t.row_of(bounds.bottom)).ceil().clamp(0.0, height) as usize;
    if col1 <= col0 || row1 <= row0 {
        return None;
    }

    let out_transform = t.offset(col0, row0);
    let out_meta = RasterMeta {
        width: (col1 - col0) as u32,
        height: (row1 - row0) as u32,
        transform: out_transform,
        ..meta.clone()
    };
    let fill = meta.nodata.unwrap_or(0.0);
    let src_width = meta.width as usize;

    let mut data = Vec::with_capacity(out_meta.len());
    for row in row0..row1 {
        for col in col0..col1 {
            let value = raster.data[row * src_width + col];
            let pixel = Bounds {
                left: t.origin_x + col as f64 * t.pixel_width,
                right: t.origin_x + (col + 1) as f64 * t.pixel_width,
                top: t.origin_y - row as f64 * t.pixel_height,
                bottom: t.origin_y - (row + 1) as f64 * t.pixel_height,
            };
            data.push(if touches(&pixel, bounds) { value } else { fill });
        }
    }

    Some(Raster {
        meta: out_meta,
        data,
    })
}

/// Positive-area overlap; sharing only an edge does not count.
fn touches(pixel: &Bounds, bounds: &Bounds) -> bool {
    pixel.intersects(bounds)
}

/// Round values within [`SNAP_EPSILON`] of an integer onto it.
fn snap(value: f64) -> f64 {
    let rounded = value.round();
    if (value - rounded).abs() < SNAP_EPSILON {
        rounded
    } else {
        value
    }
}

fn sibling_path(output_path: &Path, suffix: &str) -> Result<PathBuf> {
    let stem = output_path.file_stem().ok_or_else(|| {
        MosaicError::InvalidArgument(format!(
            "output path {} has no file name",
            output_path.display()
        ))
    })?;
    Ok(output_path.with_file_name(format!("{}{}.tif", stem.to_string_lossy(), suffix)))
}

/// A staging file deleted on drop unless it has been persisted.
struct TempArtifact {
    path: PathBuf,
    armed: bool,
}

impl TempArtifact {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Move the file to `dest`, replacing any existing file.
    fn persist(mut self, dest: &Path) -> Result<()> {
        fs::rename(&self.path, dest)?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "Failed to remove staging file");
                }
            }
        }
    }
}
