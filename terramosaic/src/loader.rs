//! Reduced-resolution reads of large rasters.

use std::path::Path;

use crate::bounds::Bounds;
use crate::error::{MosaicError, Result};
use crate::geotiff::RasterTile;
use crate::grid::ElevationGrid;

/// Load a GeoTIFF averaged down by `factor` in each dimension.
///
/// The output has `max(1, height / factor)` rows and
/// `max(1, width / factor)` columns. Source pixel `(r, c)` contributes to
/// output cell `(r * out_h / h, c * out_w / w)`; nodata and NaN samples are
/// ignored and cells without any valid sample are NaN. The raster is read
/// chunk by chunk so only the output grid is held in full.
///
/// Returns the grid together with the full bounds of the raster.
///
/// # Errors
///
/// [`MosaicError::InvalidArgument`] when `factor` is 0; read and decode
/// errors otherwise.
///
/// # Example
///
/// ```ignore
/// use terramosaic::loader::load_downsampled;
///
/// let (grid, bounds) = load_downsampled("out/denver.tif", 4)?;
/// println!("{:?} over {}", grid.shape(), bounds);
/// ```
pub fn load_downsampled<P: AsRef<Path>>(path: P, factor: u32) -> Result<(ElevationGrid, Bounds)> {
    if factor < 1 {
        return Err(MosaicError::InvalidArgument(
            "downsample factor must be at least 1".to_string(),
        ));
    }

    let tile = RasterTile::open(path.as_ref())?;
    let meta = tile.meta().clone();
    let width = meta.width as usize;
    let height = meta.height as usize;
    let out_rows = (height / factor as usize).max(1);
    let out_cols = (width / factor as usize).max(1);

    let mut sums = vec![0.0f64; out_rows * out_cols];
    let mut counts = vec![0u32; out_rows * out_cols];

    tile.for_each_chunk(|x0, y0, w, h, samples| {
        for r in 0..h as usize {
            let src_row = y0 as usize + r;
            if src_row >= height {
                break;
            }
            let out_row = src_row * out_rows / height;
            for c in 0..w as usize {
                let src_col = x0 as usize + c;
                if src_col >= width {
                    break;
                }
                let value = samples[r * w as usize + c];
                if meta.is_nodata(value) {
                    continue;
                }
                let cell = out_row * out_cols + src_col * out_cols / width;
                sums[cell] += value;
                counts[cell] += 1;
            }
        }
    })?;

    let data = sums
        .iter()
        .zip(&counts)
        .map(|(&sum, &count)| {
            if count == 0 {
                f32::NAN
            } else {
                (sum / count as f64) as f32
            }
        })
        .collect();

    let bounds = meta.bounds();
    let grid = ElevationGrid::new(out_rows, out_cols, data, bounds).ok_or_else(|| {
        MosaicError::InvalidArgument(format!("bad grid shape {}x{}", out_rows, out_cols))
    })?;
    Ok((grid, bounds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geotiff::{GeoKeys, GeoTransform, PixelType, Raster, RasterMeta};
    use tempfile::TempDir;

    fn write_raster(dir: &TempDir, width: u32, height: u32, data: Vec<f64>) -> std::path::PathBuf {
        let meta = RasterMeta {
            width,
            height,
            transform: GeoTransform {
                origin_x: -75.0,
                origin_y: 41.0,
                pixel_width: 1.0 / width as f64,
                pixel_height: 1.0 / height as f64,
            },
            nodata: Some(-32768.0),
            pixel_type: PixelType::I16,
            crs: GeoKeys::wgs84(),
        };
        let path = dir.path().join("dem.tif");
        Raster::new(meta, data).unwrap().write(&path).unwrap();
        path
    }

    #[test]
    fn test_factor_one_is_identity() {
        let dir = TempDir::new().unwrap();
        let data: Vec<f64> = (0..12).map(|v| v as f64).collect();
        let path = write_raster(&dir, 4, 3, data.clone());

        let (grid, bounds) = load_downsampled(&path, 1).unwrap();
        assert_eq!(grid.shape(), (3, 4));
        assert_eq!(grid.data(), data.iter().map(|&v| v as f32).collect::<Vec<_>>().as_slice());
        assert_eq!(bounds, Bounds::new(-75.0, 40.0, -74.0, 41.0));
    }

    #[test]
    fn test_block_average() {
        let dir = TempDir::new().unwrap();
        #[rustfmt::skip]
        let data = vec![
            1.0, 3.0,   10.0, 10.0,
            5.0, 7.0,   10.0, 30.0,
        ];
        let path = write_raster(&dir, 4, 2, data);

        let (grid, _) = load_downsampled(&path, 2).unwrap();
        assert_eq!(grid.shape(), (1, 2));
        assert_eq!(grid.data(), &[4.0, 15.0]);
    }

    #[test]
    fn test_nodata_excluded() {
        let dir = TempDir::new().unwrap();
        #[rustfmt::skip]
        let data = vec![
            -32768.0, 8.0,       -32768.0, -32768.0,
            -32768.0, -32768.0,  -32768.0, -32768.0,
        ];
        let path = write_raster(&dir, 4, 2, data);

        let (grid, _) = load_downsampled(&path, 2).unwrap();
        assert_eq!(grid.get(0, 0), Some(8.0));
        assert!(grid.get(0, 1).unwrap().is_nan());
        assert_eq!(grid.stats().nodata_count, 1);
    }

    #[test]
    fn test_factor_larger_than_raster() {
        let dir = TempDir::new().unwrap();
        let path = write_raster(&dir, 3, 2, vec![2.0; 6]);
        let (grid, _) = load_downsampled(&path, 10).unwrap();
        assert_eq!(grid.shape(), (1, 1));
        assert_eq!(grid.get(0, 0), Some(2.0));
    }

    #[test]
    fn test_invalid_factor_and_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = write_raster(&dir, 2, 2, vec![0.0; 4]);
        assert!(matches!(
            load_downsampled(&path, 0),
            Err(MosaicError::InvalidArgument(_))
        ));
        assert!(matches!(
            load_downsampled(dir.path().join("missing.tif"), 2),
            Err(MosaicError::Storage { .. })
        ));
    }
}
