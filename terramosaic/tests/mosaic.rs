//! End-to-end mosaic tests against synthetic 1° tiles on disk.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use terramosaic::geotiff::{GeoKeys, GeoTransform};
use terramosaic::{
    compute_bounds, Bounds, LocalStorage, MosaicEngine, MosaicError, PixelType, Raster, RasterMeta,
    RasterTile, TileKey,
};

/// Pixels per degree of the synthetic tiles.
const PIXELS: u32 = 100;
const RES: f64 = 1.0 / PIXELS as f64;
const NODATA: f64 = -32768.0;

/// Write a 1° tile whose samples encode their global pixel position.
fn write_tile(dir: &Path, lon_base: i32, lat_base: i32) {
    let key = TileKey::unit(lon_base, lat_base);
    let meta = RasterMeta {
        width: PIXELS,
        height: PIXELS,
        transform: GeoTransform {
            origin_x: lon_base as f64,
            origin_y: (lat_base + 1) as f64,
            pixel_width: RES,
            pixel_height: RES,
        },
        nodata: Some(NODATA),
        pixel_type: PixelType::I16,
        crs: GeoKeys::wgs84(),
    };
    let mut data = Vec::with_capacity(meta.len());
    for row in 0..PIXELS as i32 {
        for col in 0..PIXELS as i32 {
            let gx = (lon_base + 180) * PIXELS as i32 + col;
            let gy = (lat_base + 1) * PIXELS as i32 - row;
            data.push(((gx * 7 + gy * 3) % 10_000) as f64);
        }
    }
    Raster::new(meta, data)
        .unwrap()
        .write(dir.join(key.filename()))
        .unwrap();
}

fn engine_with_tiles(tiles: &[(i32, i32)]) -> (TempDir, MosaicEngine) {
    let dir = TempDir::new().unwrap();
    let dem = dir.path().join("dem");
    fs::create_dir(&dem).unwrap();
    for &(lon, lat) in tiles {
        write_tile(&dem, lon, lat);
    }
    let engine = MosaicEngine::new(Arc::new(LocalStorage::new(dir.path())));
    (dir, engine)
}

fn read_output(path: &Path) -> Raster {
    RasterTile::open(path).unwrap().read_band().unwrap()
}

fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// `outer` covers `inner` and overshoots each edge by at most one pixel.
fn within_one_pixel(outer: &Bounds, inner: &Bounds) -> bool {
    let overshoot = [
        inner.left - outer.left,
        outer.right - inner.right,
        inner.bottom - outer.bottom,
        outer.top - inner.top,
    ];
    overshoot.iter().all(|&d| d > -1e-9 && d < RES + 1e-9)
}

#[test]
fn test_combine_twice_is_byte_identical() {
    let (dir, engine) = engine_with_tiles(&[(-75, 40), (-74, 40), (-75, 41), (-74, 41)]);
    let out = dir.path().join("out");

    let first = engine
        .combine("dem", &out.join("a.tif"), 40.3, -74.25, 100.0, true)
        .unwrap();
    let second = engine
        .combine("dem", &out.join("b.tif"), 40.3, -74.25, 100.0, true)
        .unwrap();

    assert_eq!(first.tiles_used, second.tiles_used);
    assert_eq!(
        fs::read(&first.path).unwrap(),
        fs::read(&second.path).unwrap()
    );
}

#[test]
fn test_rerun_onto_same_output_is_byte_identical() {
    let (dir, engine) = engine_with_tiles(&[(-75, 40), (-74, 40), (-75, 41), (-74, 41)]);
    let output = dir.path().join("area.tif");

    engine
        .combine("dem", &output, 40.3, -74.25, 100.0, true)
        .unwrap();
    let before = fs::read(&output).unwrap();

    engine
        .combine("dem", &output, 40.3, -74.25, 100.0, true)
        .unwrap();
    let after = fs::read(&output).unwrap();

    assert_eq!(before, after);
    assert_eq!(dir_entries(dir.path()), vec!["area.tif", "dem"]);
}

#[test]
fn test_point_outside_coverage_is_rejected() {
    let (dir, engine) = engine_with_tiles(&[(-75, 40)]);
    let output = dir.path().join("nowhere.tif");

    for (lat, lon) in [(0.0, 0.0), (40.3, -5.0), (85.0, -74.0)] {
        let err = engine
            .combine("dem", &output, lat, lon, 500.0, true)
            .unwrap_err();
        assert!(
            matches!(err, MosaicError::CoordinateOutOfRange { .. }),
            "({}, {}) gave {:?}",
            lat,
            lon,
            err
        );
    }
    assert!(!output.exists());
    assert_eq!(dir_entries(dir.path()), vec!["dem"]);
}

#[test]
fn test_invalid_elevation_is_rejected() {
    let (dir, engine) = engine_with_tiles(&[(-75, 40)]);
    let output = dir.path().join("area.tif");

    for elevation in [-500.0, 0.0, f64::NAN, f64::INFINITY, -1.0e8] {
        let err = engine
            .combine("dem", &output, 40.3, -74.25, elevation, true)
            .unwrap_err();
        assert!(
            matches!(err, MosaicError::InvalidArgument(_)),
            "elevation {} gave {:?}",
            elevation,
            err
        );
    }
    assert!(!output.exists());
}

#[test]
fn test_huge_elevation_does_not_overflow() {
    // Covers the whole world; only the one stored tile is found
    let (dir, engine) = engine_with_tiles(&[(-75, 40)]);
    let output = dir.path().join("huge.tif");

    let result = engine
        .combine("dem", &output, 40.3, -74.25, 1.0e8, false)
        .unwrap();

    assert_eq!(result.tiles_used.len(), 1);
    assert_eq!(result.tiles_missing.len(), 361 * 181 - 1);
}

#[test]
fn test_one_of_four_tiles_present() {
    // Request sits inside the -75/40 cell but the candidates span 2x2 tiles
    let (dir, engine) = engine_with_tiles(&[(-75, 40)]);
    let output = dir.path().join("partial.tif");

    let result = engine
        .combine("dem", &output, 40.3, -74.25, 100.0, true)
        .unwrap();

    assert_eq!(result.tiles_used, vec!["dem/xmin-75_xmax-74_ymin40_ymax41.tif"]);
    assert_eq!(result.tiles_missing.len(), 3);

    let tile_bounds = TileKey::unit(-75, 40).bounds();
    assert!(tile_bounds.contains_bounds(&result.output));
    assert!(within_one_pixel(&result.output, &result.requested));

    let raster = read_output(&output);
    assert_eq!(raster.meta.bounds(), result.output);
    assert!(raster.data.iter().all(|&v| v != NODATA));
}

#[test]
fn test_no_tiles_writes_nothing() {
    let (dir, engine) = engine_with_tiles(&[]);
    let output = dir.path().join("none.tif");

    let err = engine
        .combine("dem", &output, 40.3, -74.25, 100.0, true)
        .unwrap_err();

    match err {
        MosaicError::NoTilesFound { candidates, .. } => assert_eq!(candidates, 4),
        other => panic!("Expected NoTilesFound, got {:?}", other),
    }
    assert!(!output.exists());
    assert_eq!(dir_entries(dir.path()), vec!["dem"]);
}

#[test]
fn test_crop_across_tile_seam() {
    let (dir, engine) = engine_with_tiles(&[(-75, 40), (-74, 40)]);
    let output = dir.path().join("seam.tif");

    let result = engine
        .combine("dem", &output, 40.5, -74.0, 500.0, true)
        .unwrap();

    assert_eq!(result.tiles_used.len(), 2);
    assert_eq!(result.requested, compute_bounds(40.5, -74.0, 500.0));

    let merged = Bounds::new(-75.0, 40.0, -73.0, 41.0);
    assert!(merged.contains_bounds(&result.output));
    assert!(within_one_pixel(&result.output, &result.requested));

    let raster = read_output(&output);
    assert_eq!(raster.meta.pixel_type, PixelType::I16);
    assert_eq!(raster.meta.nodata, Some(NODATA));
    assert_eq!(raster.meta.crs, GeoKeys::wgs84());
    assert!(raster.data.iter().all(|&v| v != NODATA));

    // Staging files are gone
    assert_eq!(dir_entries(dir.path()), vec!["dem", "seam.tif"]);
}

#[test]
fn test_uncropped_output_is_merged_extent() {
    let (dir, engine) = engine_with_tiles(&[(-75, 40), (-74, 41)]);
    let output = dir.path().join("merged.tif");

    let result = engine
        .combine("dem", &output, 40.9, -74.05, 300.0, false)
        .unwrap();

    assert_eq!(result.output, Bounds::new(-75.0, 40.0, -73.0, 42.0));
    let raster = read_output(&output);
    assert_eq!(raster.meta.width, 2 * PIXELS);
    assert_eq!(raster.meta.height, 2 * PIXELS);
    // North-west quadrant has no tile
    assert_eq!(raster.get(10, 10), Some(NODATA));
    assert_ne!(raster.get(10, 150), Some(NODATA));
}

#[test]
fn test_existing_output_is_replaced() {
    let (dir, engine) = engine_with_tiles(&[(-75, 40)]);
    let output = dir.path().join("area.tif");
    fs::write(&output, b"stale").unwrap();

    engine
        .combine("dem", &output, 40.3, -74.25, 100.0, true)
        .unwrap();

    assert_ne!(fs::read(&output).unwrap(), b"stale");
    assert!(RasterTile::open(&output).is_ok());
}

#[test]
fn test_failed_combine_keeps_existing_output() {
    let (dir, engine) = engine_with_tiles(&[]);
    let output = dir.path().join("area.tif");
    fs::write(&output, b"previous").unwrap();

    assert!(engine
        .combine("dem", &output, 40.3, -74.25, 100.0, true)
        .is_err());
    assert_eq!(fs::read(&output).unwrap(), b"previous");
}
