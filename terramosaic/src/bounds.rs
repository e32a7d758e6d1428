//! Geographic points, bounding boxes and the elevation-to-extent heuristic.
//!
//! [`Bounds`] is the one bounding-box type used throughout the crate: tile
//! extents, raster extents, crop windows and web-tile requests all speak it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MosaicError, Result};

/// Southern edge of the supported raster coverage.
pub const MIN_SUPPORTED_LAT: f64 = 10.0;
/// Northern edge of the supported raster coverage.
pub const MAX_SUPPORTED_LAT: f64 = 80.0;
/// Western edge of the supported raster coverage.
pub const MIN_SUPPORTED_LON: f64 = -180.0;
/// Eastern edge of the supported raster coverage.
pub const MAX_SUPPORTED_LON: f64 = -10.0;

/// Statute miles per degree of latitude.
const MILES_PER_DEGREE: f64 = 69.0;

/// Check whether coordinates fall inside the supported raster coverage.
///
/// The elevation archive covers longitudes from -180° to -10° and latitudes
/// from 10° to 80°, both inclusive.
pub fn is_supported_coord(lat: f64, lon: f64) -> bool {
    (MIN_SUPPORTED_LAT..=MAX_SUPPORTED_LAT).contains(&lat)
        && (MIN_SUPPORTED_LON..=MAX_SUPPORTED_LON).contains(&lon)
}

/// A validated geographic point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    lat: f64,
    lon: f64,
}

impl GeoPoint {
    /// Create a point, rejecting anything outside the supported coverage.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::CoordinateOutOfRange`] when the point is outside
    /// lat 10°..80°, lon -180°..-10° (or is NaN).
    pub fn new(lat: f64, lon: f64) -> Result<Self> {
        if !is_supported_coord(lat, lon) {
            return Err(MosaicError::CoordinateOutOfRange { lat, lon });
        }
        Ok(Self { lat, lon })
    }

    /// Latitude in decimal degrees.
    pub fn lat(&self) -> f64 {
        self.lat
    }

    /// Longitude in decimal degrees.
    pub fn lon(&self) -> f64 {
        self.lon
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_coordinates(self.lat, self.lon))
    }
}

/// An axis-aligned geographic bounding box in decimal degrees.
///
/// Field order follows the raster convention `(left, bottom, right, top)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Western edge (minimum longitude).
    pub left: f64,
    /// Southern edge (minimum latitude).
    pub bottom: f64,
    /// Eastern edge (maximum longitude).
    pub right: f64,
    /// Northern edge (maximum latitude).
    pub top: f64,
}

impl Bounds {
    /// Create a bounding box. Corners may be given in either order.
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self {
            left: left.min(right),
            bottom: bottom.min(top),
            right: left.max(right),
            top: bottom.max(top),
        }
    }

    /// Square box of the given area (square miles) centered on a point.
    ///
    /// One degree of latitude is taken as 69 miles; longitude degrees shrink
    /// with `cos(lat)`.
    pub fn from_area(lat: f64, lon: f64, area_sq_miles: f64) -> Self {
        let side_miles = area_sq_miles.sqrt();
        let lat_offset = (side_miles / 2.0) / MILES_PER_DEGREE;
        let lon_offset = (side_miles / 2.0) / (MILES_PER_DEGREE * lat.abs().to_radians().cos());

        Self::new(
            lon - lon_offset,
            lat - lat_offset,
            lon + lon_offset,
            lat + lat_offset,
        )
    }

    /// Longitude span in degrees.
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    /// Latitude span in degrees.
    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    /// Center as `(lat, lon)`.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.bottom + self.top) / 2.0,
            (self.left + self.right) / 2.0,
        )
    }

    /// Check whether a point lies inside (edges included).
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.bottom && lat <= self.top && lon >= self.left && lon <= self.right
    }

    /// Check whether `other` lies entirely inside this box.
    pub fn contains_bounds(&self, other: &Bounds) -> bool {
        other.left >= self.left
            && other.right <= self.right
            && other.bottom >= self.bottom
            && other.top <= self.top
    }

    /// Check whether the two boxes share a region of positive area.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.left < other.right
            && self.right > other.left
            && self.bottom < other.top
            && self.top > other.bottom
    }

    /// Overlapping region, or `None` when the boxes do not overlap.
    pub fn intersection(&self, other: &Bounds) -> Option<Bounds> {
        if !self.intersects(other) {
            return None;
        }
        Some(Bounds {
            left: self.left.max(other.left),
            bottom: self.bottom.max(other.bottom),
            right: self.right.min(other.right),
            top: self.top.min(other.top),
        })
    }

    /// Clamp this box so it stays within `outer`.
    ///
    /// Returns `None` when nothing of this box lies inside `outer`.
    pub fn clamp_to(&self, outer: &Bounds) -> Option<Bounds> {
        outer.intersection(self)
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            left: self.left.min(other.left),
            bottom: self.bottom.min(other.bottom),
            right: self.right.max(other.right),
            top: self.top.max(other.top),
        }
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(left={:.6}, bottom={:.6}, right={:.6}, top={:.6})",
            self.left, self.bottom, self.right, self.top
        )
    }
}

/// Compute the bounding box shown for a point viewed from a given elevation.
///
/// The angular span is `elevation_m / 1000` degrees. This is a rough proxy,
/// not a horizon calculation, and it is kept exactly as is because every
/// stored bounding box depends on it. The longitude span is additionally
/// scaled by `cos(lat)`.
///
/// No range validation happens here; see [`crate::locator`].
///
/// # Examples
///
/// ```
/// use terramosaic::bounds::compute_bounds;
///
/// let b = compute_bounds(40.3, -74.0, 500.0);
/// assert!((b.height() - 0.5).abs() < 1e-12);
/// assert!((b.width() - 0.5 * 40.3_f64.to_radians().cos()).abs() < 1e-12);
/// ```
pub fn compute_bounds(lat: f64, lon: f64, elevation_m: f64) -> Bounds {
    let span_deg = elevation_m / 1000.0;

    let lat_span = span_deg;
    let lon_span = span_deg * lat.to_radians().cos();

    Bounds::new(
        lon - lon_span / 2.0,
        lat - lat_span / 2.0,
        lon + lon_span / 2.0,
        lat + lat_span / 2.0,
    )
}

/// Reject elevations that cannot size an area.
///
/// # Errors
///
/// Returns [`MosaicError::InvalidArgument`] unless `elevation_m` is finite and
/// greater than zero.
pub fn validate_elevation(elevation_m: f64) -> Result<f64> {
    if elevation_m.is_finite() && elevation_m > 0.0 {
        Ok(elevation_m)
    } else {
        Err(MosaicError::InvalidArgument(format!(
            "elevation must be a positive number of meters, got {}",
            elevation_m
        )))
    }
}

/// Web-map zoom level that fits the box, clamped to 0..=18.
pub fn zoom_for_bounds(bounds: &Bounds) -> u8 {
    let max_diff = bounds.width().abs().max(bounds.height().abs());
    if max_diff <= 0.0 || !max_diff.is_finite() {
        return 18;
    }

    let zoom = (360.0 / max_diff).log2().round();
    zoom.clamp(0.0, 18.0) as u8
}

/// Format coordinates with hemisphere letters, e.g. `(40.30°N, 74.00°W)`.
pub fn format_coordinates(lat: f64, lon: f64) -> String {
    let lat_dir = if lat >= 0.0 { 'N' } else { 'S' };
    let lon_dir = if lon >= 0.0 { 'E' } else { 'W' };
    format!(
        "({:.2}°{}, {:.2}°{})",
        lat.abs(),
        lat_dir,
        lon.abs(),
        lon_dir
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_compute_bounds_reference_point() {
        let b = compute_bounds(40.3, -74.0, 500.0);

        assert!(approx(b.height(), 0.5));
        let expected_lon_span = 0.5 * 40.3_f64.to_radians().cos();
        assert!(approx(b.width(), expected_lon_span));
        assert!((b.width() - 0.381).abs() < 0.001);

        let (lat, lon) = b.center();
        assert!(approx(lat, 40.3));
        assert!(approx(lon, -74.0));
    }

    #[test]
    fn test_compute_bounds_scales_with_elevation() {
        let small = compute_bounds(35.0, -105.0, 100.0);
        let large = compute_bounds(35.0, -105.0, 1000.0);

        assert!(approx(small.height(), 0.1));
        assert!(approx(large.height(), 1.0));
        assert!(large.contains_bounds(&small));
    }

    #[test]
    fn test_compute_bounds_narrows_with_latitude() {
        let south = compute_bounds(15.0, -100.0, 500.0);
        let north = compute_bounds(70.0, -100.0, 500.0);
        assert!(north.width() < south.width());
        assert!(approx(north.height(), south.height()));
    }

    #[test]
    fn test_geo_point_validation() {
        assert!(GeoPoint::new(40.3, -74.0).is_ok());
        assert!(GeoPoint::new(10.0, -180.0).is_ok());
        assert!(GeoPoint::new(80.0, -10.0).is_ok());

        assert!(matches!(
            GeoPoint::new(9.9, -74.0),
            Err(MosaicError::CoordinateOutOfRange { .. })
        ));
        assert!(GeoPoint::new(40.0, -9.0).is_err());
        assert!(GeoPoint::new(81.0, -100.0).is_err());
        assert!(GeoPoint::new(f64::NAN, -100.0).is_err());
    }

    #[test]
    fn test_validate_elevation() {
        assert_eq!(validate_elevation(500.0).unwrap(), 500.0);
        for bad in [0.0, -500.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(
                matches!(validate_elevation(bad), Err(MosaicError::InvalidArgument(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_bounds_new_normalizes_corners() {
        let b = Bounds::new(-73.0, 41.0, -74.0, 40.0);
        assert_eq!(b.left, -74.0);
        assert_eq!(b.right, -73.0);
        assert_eq!(b.bottom, 40.0);
        assert_eq!(b.top, 41.0);
    }

    #[test]
    fn test_intersection_and_clamp() {
        let tile = Bounds::new(-75.0, 40.0, -74.0, 41.0);
        let request = Bounds::new(-74.2, 40.5, -73.8, 40.9);

        let clamped = request.clamp_to(&tile).unwrap();
        assert_eq!(clamped, Bounds::new(-74.2, 40.5, -74.0, 40.9));

        let far = Bounds::new(-60.0, 10.0, -59.0, 11.0);
        assert!(far.clamp_to(&tile).is_none());

        // Touching edges share no area
        let neighbour = Bounds::new(-74.0, 40.0, -73.0, 41.0);
        assert!(!tile.intersects(&neighbour));
        assert_eq!(
            tile.union(&neighbour),
            Bounds::new(-75.0, 40.0, -73.0, 41.0)
        );
    }

    #[test]
    fn test_from_area() {
        // 100 sq miles -> 10 mile side -> 5 miles each way
        let b = Bounds::from_area(40.0, -105.0, 100.0);
        assert!(approx(b.height(), 10.0 / 69.0));
        assert!(b.width() > b.height());
        let (lat, lon) = b.center();
        assert!(approx(lat, 40.0));
        assert!(approx(lon, -105.0));
    }

    #[test]
    fn test_zoom_for_bounds() {
        assert_eq!(zoom_for_bounds(&Bounds::new(-180.0, -85.0, 180.0, 85.0)), 0);
        // 360 / 0.5 = 720 -> log2 ~ 9.49 -> 9
        assert_eq!(zoom_for_bounds(&Bounds::new(-74.0, 40.0, -73.5, 40.2)), 9);
        // Tiny boxes clamp at 18
        assert_eq!(
            zoom_for_bounds(&Bounds::new(-74.0, 40.0, -73.99999, 40.00001)),
            18
        );
        assert_eq!(zoom_for_bounds(&Bounds::new(-74.0, 40.0, -74.0, 40.0)), 18);
    }

    #[test]
    fn test_format_coordinates() {
        assert_eq!(format_coordinates(40.3, -74.0), "(40.30°N, 74.00°W)");
        assert_eq!(format_coordinates(-33.87, 151.21), "(33.87°S, 151.21°E)");
    }
}
