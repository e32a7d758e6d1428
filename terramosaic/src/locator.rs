//! Tile addressing: which source rasters cover a point or a bounding box.
//!
//! Two grids exist in the elevation archive and both are expressed through
//! the single [`TileKey`] type:
//!
//! - [`TileGrid::UnitDegree`]: 1° × 1° tiles named
//!   `xmin{x}_xmax{x+1}_ymin{y}_ymax{y+1}.tif`. This is the layout the mosaic
//!   engine reads and the one [`locate_all`] produces.
//! - [`TileGrid::Decadal`]: 10° × 10° tiles named
//!   `10_DEM_y{lat}x-{abs(lon)}.tif`, used only by the single-point lookup
//!   [`locate`]. Longitudes are always written without their sign.
//!
//! The two grids are not interchangeable. [`crate::mosaic::MosaicEngine`]
//! never reads 10° tiles; a key from [`locate`] names a file in the legacy
//! archive, not a mosaic input.
//!
//! Every key names the **south-west corner** of its tile.

use std::fmt;

use crate::bounds::{is_supported_coord, Bounds};
use crate::error::{MosaicError, Result};
use crate::storage::{join_key, StorageBackend};

/// The fixed grid a tile belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TileGrid {
    /// 10° × 10° tiles.
    Decadal,
    /// 1° × 1° tiles.
    UnitDegree,
}

impl TileGrid {
    /// Edge length of one tile in degrees.
    pub fn size_deg(&self) -> i32 {
        match self {
            TileGrid::Decadal => 10,
            TileGrid::UnitDegree => 1,
        }
    }
}

/// Identifies one source raster by its floor-aligned south-west corner.
///
/// Keys order by grid, then longitude, then latitude, which is the order
/// candidate tiles are enumerated and merged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    /// Grid the tile belongs to.
    pub grid: TileGrid,
    /// Longitude of the western edge.
    pub lon_base: i32,
    /// Latitude of the southern edge.
    pub lat_base: i32,
}

impl TileKey {
    /// Create a key for a 1° tile.
    pub fn unit(lon_base: i32, lat_base: i32) -> Self {
        Self {
            grid: TileGrid::UnitDegree,
            lon_base,
            lat_base,
        }
    }

    /// Create a key for a 10° tile.
    pub fn decadal(lon_base: i32, lat_base: i32) -> Self {
        Self {
            grid: TileGrid::Decadal,
            lon_base,
            lat_base,
        }
    }

    /// Source filename for this tile.
    ///
    /// # Examples
    ///
    /// ```
    /// use terramosaic::locator::TileKey;
    ///
    /// assert_eq!(TileKey::decadal(-80, 40).filename(), "10_DEM_y40x-80.tif");
    /// assert_eq!(
    ///     TileKey::unit(-75, 40).filename(),
    ///     "xmin-75_xmax-74_ymin40_ymax41.tif"
    /// );
    /// ```
    pub fn filename(&self) -> String {
        match self.grid {
            TileGrid::Decadal => {
                format!("10_DEM_y{}x-{}.tif", self.lat_base, self.lon_base.abs())
            }
            TileGrid::UnitDegree => format!(
                "xmin{}_xmax{}_ymin{}_ymax{}.tif",
                self.lon_base,
                self.lon_base + 1,
                self.lat_base,
                self.lat_base + 1
            ),
        }
    }

    /// Geographic extent of the tile.
    pub fn bounds(&self) -> Bounds {
        let size = self.grid.size_deg();
        Bounds::new(
            self.lon_base as f64,
            self.lat_base as f64,
            (self.lon_base + size) as f64,
            (self.lat_base + size) as f64,
        )
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.filename())
    }
}

/// Find the 10° tile containing a point.
///
/// # Errors
///
/// Returns [`MosaicError::CoordinateOutOfRange`] outside lon -180°..-10°,
/// lat 10°..80°.
///
/// # Examples
///
/// ```
/// use terramosaic::locator::locate;
///
/// let key = locate(40.3, -74.0).unwrap();
/// assert_eq!(key.filename(), "10_DEM_y40x-80.tif");
/// ```
pub fn locate(lat: f64, lon: f64) -> Result<TileKey> {
    if !is_supported_coord(lat, lon) {
        return Err(MosaicError::CoordinateOutOfRange { lat, lon });
    }

    let lat_base = (lat / 10.0).floor() as i32 * 10;

    let mut lon_base = (lon / 10.0).floor() as i32 * 10;
    if lon_base as f64 > lon {
        lon_base -= 10;
    }

    Ok(TileKey::decadal(lon_base, lat_base))
}

/// List every 1° tile needed to cover a bounding box.
///
/// Enumerates integer `x` in `floor(left)..=ceil(right)` and `y` in
/// `floor(bottom)..=ceil(top)`, x-major. The list always covers `bounds` and
/// may name tiles that do not exist in storage.
///
/// The box is first clamped to the world (±180°, ±90°), so oversized or
/// infinite bounds yield at most 361 × 181 keys. Bounds with a NaN edge
/// yield none.
pub fn locate_all(bounds: &Bounds) -> Vec<TileKey> {
    let edges = [bounds.left, bounds.bottom, bounds.right, bounds.top];
    if edges.iter().any(|v| v.is_nan()) {
        return Vec::new();
    }

    let x_min = bounds.left.clamp(-180.0, 180.0).floor() as i32;
    let x_max = bounds.right.clamp(-180.0, 180.0).ceil() as i32;
    let y_min = bounds.bottom.clamp(-90.0, 90.0).floor() as i32;
    let y_max = bounds.top.clamp(-90.0, 90.0).ceil() as i32;

    let across = i64::from(x_max) - i64::from(x_min) + 1;
    let down = i64::from(y_max) - i64::from(y_min) + 1;
    let mut keys = Vec::with_capacity((across * down).max(0) as usize);
    for x in x_min..=x_max {
        for y in y_min..=y_max {
            keys.push(TileKey::unit(x, y));
        }
    }
    keys
}

/// Resolve a key to its storage path, failing if the tile is absent.
///
/// # Errors
///
/// Returns [`MosaicError::TileNotFound`] with the full path when the backend
/// does not hold the tile. Absent tiles are not retried.
pub fn resolve(storage: &dyn StorageBackend, prefix: &str, key: &TileKey) -> Result<String> {
    let path = join_key(prefix, &key.filename());
    if storage.exists(&path)? {
        Ok(path)
    } else {
        Err(MosaicError::TileNotFound { path })
    }
}

/// Parse a tile filename of either grid back into its key.
///
/// Accepts bare names or paths, with or without the `.tif` extension.
///
/// # Examples
///
/// ```
/// use terramosaic::locator::{parse_filename, TileKey};
///
/// assert_eq!(parse_filename("10_DEM_y40x-80.tif"), Some(TileKey::decadal(-80, 40)));
/// assert_eq!(
///     parse_filename("/data/xmin-106_xmax-105_ymin20_ymax21.tif"),
///     Some(TileKey::unit(-106, 20))
/// );
/// assert_eq!(parse_filename("N35E138.hgt"), None);
/// ```
pub fn parse_filename(filename: &str) -> Option<TileKey> {
    // Extract just the filename if a path is given
    let name = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    let name = name.strip_suffix(".tif").unwrap_or(name);

    if let Some(rest) = name.strip_prefix("10_DEM_y") {
        let (lat, lon) = rest.split_once("x-")?;
        let lat_base: i32 = lat.parse().ok()?;
        let lon_abs: i32 = lon.parse().ok()?;
        if lon_abs < 0 {
            return None;
        }
        return Some(TileKey::decadal(-lon_abs, lat_base));
    }

    let mut parts = name.split('_');
    let x_min: i32 = parts.next()?.strip_prefix("xmin")?.parse().ok()?;
    let x_max: i32 = parts.next()?.strip_prefix("xmax")?.parse().ok()?;
    let y_min: i32 = parts.next()?.strip_prefix("ymin")?.parse().ok()?;
    let y_max: i32 = parts.next()?.strip_prefix("ymax")?.parse().ok()?;
    if parts.next().is_some() || x_max != x_min + 1 || y_max != y_min + 1 {
        return None;
    }

    Some(TileKey::unit(x_min, y_min))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::compute_bounds;
    use crate::storage::LocalStorage;
    use tempfile::TempDir;

    #[test]
    fn test_locate_reference_point() {
        let key = locate(40.3, -74.0).unwrap();
        assert_eq!(key, TileKey::decadal(-80, 40));
        assert_eq!(key.filename(), "10_DEM_y40x-80.tif");
    }

    #[test]
    fn test_locate_boundary_cases() {
        // Exactly on a tile boundary belongs to the tile starting there
        assert_eq!(locate(40.0, -70.0).unwrap(), TileKey::decadal(-70, 40));
        // Coverage corners
        assert_eq!(locate(10.0, -180.0).unwrap(), TileKey::decadal(-180, 10));
        assert_eq!(locate(80.0, -10.0).unwrap(), TileKey::decadal(-10, 80));
        // floor(-10.5 / 10) = -2
        assert_eq!(locate(19.99, -10.5).unwrap(), TileKey::decadal(-20, 10));
    }

    #[test]
    fn test_locate_out_of_range() {
        for (lat, lon) in [(9.99, -74.0), (80.01, -74.0), (40.0, -9.99), (40.0, -180.01), (-40.0, 74.0)] {
            assert!(
                matches!(locate(lat, lon), Err(MosaicError::CoordinateOutOfRange { .. })),
                "({}, {}) should be rejected",
                lat,
                lon
            );
        }
    }

    #[test]
    fn test_locate_extent_contains_point() {
        let mut lat = 10.0;
        while lat <= 80.0 {
            let mut lon = -180.0;
            while lon <= -10.0 {
                let key = locate(lat, lon).unwrap();
                assert!(
                    key.bounds().contains(lat, lon),
                    "{} does not contain ({}, {})",
                    key,
                    lat,
                    lon
                );
                lon += 3.7;
            }
            lat += 2.3;
        }
    }

    #[test]
    fn test_locate_all_covers_bounds() {
        let bounds = compute_bounds(40.3, -74.0, 500.0);
        let keys = locate_all(&bounds);

        // floor(-74.19)=-75 .. ceil(-73.81)=-73, floor(40.05)=40 .. ceil(40.55)=41
        assert_eq!(keys.len(), 3 * 2);
        assert_eq!(keys[0], TileKey::unit(-75, 40));
        assert_eq!(keys[1], TileKey::unit(-75, 41));
        assert_eq!(keys[5], TileKey::unit(-73, 41));

        let covered = keys
            .iter()
            .map(|k| k.bounds())
            .reduce(|a, b| a.union(&b))
            .unwrap();
        assert!(covered.contains_bounds(&bounds));
    }

    #[test]
    fn test_locate_all_huge_bounds_clamped_to_world() {
        let keys = locate_all(&compute_bounds(40.0, -100.0, 1.0e8));
        assert_eq!(keys.len(), 361 * 181);
        assert_eq!(keys[0], TileKey::unit(-180, -90));
        assert_eq!(keys[keys.len() - 1], TileKey::unit(180, 90));

        let infinite = Bounds::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::INFINITY);
        assert_eq!(locate_all(&infinite).len(), 361 * 181);
    }

    #[test]
    fn test_locate_all_nan_bounds_is_empty() {
        let bounds = Bounds {
            left: f64::NAN,
            bottom: 40.0,
            right: -74.0,
            top: 41.0,
        };
        assert!(locate_all(&bounds).is_empty());
    }

    #[test]
    fn test_locate_all_is_sorted() {
        let keys = locate_all(&Bounds::new(-106.2, 20.4, -104.7, 22.1));
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_unit_filename() {
        assert_eq!(
            TileKey::unit(-86, 34).filename(),
            "xmin-86_xmax-85_ymin34_ymax35.tif"
        );
        assert_eq!(
            TileKey::unit(-1, 10).filename(),
            "xmin-1_xmax0_ymin10_ymax11.tif"
        );
    }

    #[test]
    fn test_parse_filename() {
        assert_eq!(
            parse_filename("xmin-86_xmax-85_ymin34_ymax35.tif"),
            Some(TileKey::unit(-86, 34))
        );
        assert_eq!(
            parse_filename("C:\\tiles\\10_DEM_y20x-110.tif"),
            Some(TileKey::decadal(-110, 20))
        );
        assert_eq!(
            parse_filename("xmin-86_xmax-85_ymin34_ymax35"),
            Some(TileKey::unit(-86, 34))
        );
    }

    #[test]
    fn test_parse_filename_invalid() {
        assert_eq!(parse_filename("invalid"), None);
        assert_eq!(parse_filename("xmin-86_xmax-84_ymin34_ymax35.tif"), None); // 2° wide
        assert_eq!(parse_filename("xmin-86_xmax-85_ymin34.tif"), None); // Too short
        assert_eq!(parse_filename("10_DEM_y20x110.tif"), None); // Missing sign
        assert_eq!(parse_filename("10_DEM_yAAx-110.tif"), None); // Non-numeric
    }

    #[test]
    fn test_roundtrip() {
        for key in [
            TileKey::unit(-106, 20),
            TileKey::unit(-1, 79),
            TileKey::decadal(-180, 10),
            TileKey::decadal(-80, 40),
        ] {
            assert_eq!(parse_filename(&key.filename()), Some(key));
        }
    }

    #[test]
    fn test_resolve() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("xmin-75_xmax-74_ymin40_ymax41.tif"), b"x").unwrap();
        let storage = LocalStorage::new(dir.path());

        let path = resolve(&storage, "", &TileKey::unit(-75, 40)).unwrap();
        assert_eq!(path, "xmin-75_xmax-74_ymin40_ymax41.tif");

        let err = resolve(&storage, "dem", &TileKey::unit(-74, 40)).unwrap_err();
        match err {
            MosaicError::TileNotFound { path } => {
                assert_eq!(path, "dem/xmin-74_xmax-73_ymin40_ymax41.tif")
            }
            other => panic!("Expected TileNotFound, got {:?}", other),
        }
    }
}
