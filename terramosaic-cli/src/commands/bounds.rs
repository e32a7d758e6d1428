use anyhow::Result;
use serde::Serialize;
use terramosaic::bounds::{format_coordinates, validate_elevation, zoom_for_bounds};
use terramosaic::{compute_bounds, Bounds, GeoPoint};

#[derive(Serialize)]
struct BoundsResponse {
    lat: f64,
    lon: f64,
    elevation_m: f64,
    bounds: Bounds,
    zoom: u8,
}

pub fn run(lat: f64, lon: f64, elevation: f64, json: bool) -> Result<()> {
    let center = GeoPoint::new(lat, lon)?;
    let elevation = validate_elevation(elevation)?;
    let bounds = compute_bounds(center.lat(), center.lon(), elevation);
    let zoom = zoom_for_bounds(&bounds);

    if json {
        let response = BoundsResponse {
            lat,
            lon,
            elevation_m: elevation,
            bounds,
            zoom,
        };
        println!("{}", serde_json::to_string(&response)?);
        return Ok(());
    }

    println!("Center:      {}", format_coordinates(lat, lon));
    println!("Elevation:   {} m", elevation);
    println!("West:        {:.6}", bounds.left);
    println!("South:       {:.6}", bounds.bottom);
    println!("East:        {:.6}", bounds.right);
    println!("North:       {:.6}", bounds.top);
    println!("Span:        {:.4}° x {:.4}°", bounds.width(), bounds.height());
    println!("Map zoom:    {}", zoom);

    Ok(())
}
