use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use terramosaic::bounds::{validate_elevation, zoom_for_bounds};
use terramosaic::webtiles::TileRange;
use terramosaic::{compute_bounds, GeoPoint, HttpTileTransport, WebTileStitcher};

pub fn run(lat: f64, lon: f64, elevation: f64, zoom: Option<u8>, output: &Path) -> Result<()> {
    let center = GeoPoint::new(lat, lon)?;
    let elevation = validate_elevation(elevation)?;
    let bounds = compute_bounds(center.lat(), center.lon(), elevation);
    let zoom = zoom.unwrap_or_else(|| zoom_for_bounds(&bounds));

    let range = TileRange::new(bounds.top, bounds.left, bounds.bottom, bounds.right, zoom);
    let total = range.tile_count() as u64;

    let transport = HttpTileTransport::satellite().context("Failed to create HTTP client")?;
    let stitcher = WebTileStitcher::new(transport);

    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    let stitched = stitcher.fetch_stitched(
        bounds.top,
        bounds.left,
        bounds.bottom,
        bounds.right,
        zoom,
        |fraction| pb.set_position((fraction * total as f64).round() as u64),
    );
    pb.finish_and_clear();

    if stitched.is_blank() {
        anyhow::bail!("No satellite tiles could be fetched ({} failed)", stitched.tiles_failed);
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    stitched
        .image
        .save(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Zoom:        {}", zoom);
    println!(
        "Image:       {} x {}",
        stitched.image.width(),
        stitched.image.height()
    );
    println!("Tiles:       {} fetched, {} failed", stitched.tiles_fetched, stitched.tiles_failed);
    println!("Written to:  {}", output.display());

    Ok(())
}
