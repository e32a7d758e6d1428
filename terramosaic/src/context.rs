//! Request-scoped location state passed between operations.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::bounds::{
    compute_bounds, format_coordinates, validate_elevation, zoom_for_bounds, Bounds, GeoPoint,
};
use crate::collaborators::CityRecord;
use crate::error::Result;
use crate::mosaic::{MosaicEngine, MosaicResult};

/// Where the user is looking: a centre point, the elevation that sizes the
/// area, the derived bounds, a display label and the mosaic output path.
#[derive(Debug, Clone, Serialize)]
pub struct LocationContext {
    pub center: GeoPoint,
    pub elevation_m: f64,
    pub bounds: Bounds,
    pub label: String,
    pub output_path: PathBuf,
}

impl LocationContext {
    /// Context for a bare point, labelled with its formatted coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`crate::MosaicError::CoordinateOutOfRange`] outside the
    /// raster coverage and [`crate::MosaicError::InvalidArgument`] for an
    /// elevation that is not finite and positive.
    pub fn from_point(lat: f64, lon: f64, elevation_m: f64, output_dir: &Path) -> Result<Self> {
        let center = GeoPoint::new(lat, lon)?;
        validate_elevation(elevation_m)?;
        let label = format_coordinates(lat, lon);
        let file = format!(
            "{:.2}{}_{:.2}{}.tif",
            lat.abs(),
            if lat >= 0.0 { 'N' } else { 'S' },
            lon.abs(),
            if lon >= 0.0 { 'E' } else { 'W' }
        );
        Ok(Self::build(center, elevation_m, label, output_dir.join(file)))
    }

    /// Context centred on a city, labelled "City, State".
    pub fn from_city(city: &CityRecord, elevation_m: f64, output_dir: &Path) -> Result<Self> {
        let center = GeoPoint::new(city.lat, city.lon)?;
        validate_elevation(elevation_m)?;
        let label = format!("{}, {}", city.name, city.state);
        let file = format!("{}_{}.tif", slug(&city.name), slug(&city.state));
        Ok(Self::build(center, elevation_m, label, output_dir.join(file)))
    }

    fn build(center: GeoPoint, elevation_m: f64, label: String, output_path: PathBuf) -> Self {
        Self {
            bounds: compute_bounds(center.lat(), center.lon(), elevation_m),
            center,
            elevation_m,
            label,
            output_path,
        }
    }

    /// Zoom level at which satellite tiles frame the bounds.
    pub fn satellite_zoom(&self) -> u8 {
        zoom_for_bounds(&self.bounds)
    }

    /// Run [`MosaicEngine::combine`] for this location.
    pub fn combine(&self, engine: &MosaicEngine, input_dir: &str, crop: bool) -> Result<MosaicResult> {
        engine.combine(
            input_dir,
            &self.output_path,
            self.center.lat(),
            self.center.lon(),
            self.elevation_m,
            crop,
        )
    }
}

fn slug(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MosaicError;

    #[test]
    fn test_from_point() {
        let ctx = LocationContext::from_point(40.3, -74.0, 500.0, Path::new("out")).unwrap();
        assert_eq!(ctx.label, "(40.30°N, 74.00°W)");
        assert_eq!(ctx.output_path, PathBuf::from("out/40.30N_74.00W.tif"));
        assert!((ctx.bounds.height() - 0.5).abs() < 1e-9);
        assert!(ctx.bounds.contains(40.3, -74.0));
    }

    #[test]
    fn test_from_city() {
        let city = CityRecord {
            name: "Colorado Springs".to_string(),
            state: "Colorado".to_string(),
            lat: 38.8339,
            lon: -104.8214,
            population: None,
            area_sq_miles: Some(195.0),
            zip_codes: Vec::new(),
            ips: Vec::new(),
        };
        let ctx = LocationContext::from_city(&city, 1839.0, Path::new("/tmp")).unwrap();
        assert_eq!(ctx.label, "Colorado Springs, Colorado");
        assert_eq!(ctx.output_path, PathBuf::from("/tmp/colorado_springs_colorado.tif"));
        assert!(ctx.satellite_zoom() <= 18);
    }

    #[test]
    fn test_rejects_bad_elevation() {
        let err = LocationContext::from_point(40.3, -74.0, -500.0, Path::new(".")).unwrap_err();
        assert!(matches!(err, MosaicError::InvalidArgument(_)));
    }

    #[test]
    fn test_out_of_coverage() {
        let err = LocationContext::from_point(51.5, 0.1, 100.0, Path::new(".")).unwrap_err();
        assert!(matches!(err, MosaicError::CoordinateOutOfRange { .. }));
    }
}
