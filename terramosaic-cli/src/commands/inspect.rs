use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use terramosaic::grid::GridStats;
use terramosaic::{load_downsampled, Bounds, DownsampleAdvice, MemoryAdvisor, RasterTile};

#[derive(Serialize)]
struct InspectResponse {
    path: String,
    width: u32,
    height: u32,
    pixel_type: String,
    nodata: Option<f64>,
    bounds: Bounds,
    advice: DownsampleAdvice,
    factor: u32,
    grid_rows: usize,
    grid_cols: usize,
    stats: GridStats,
}

pub fn run(path: &Path, factor: Option<u32>, json: bool) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }

    let meta = RasterTile::open(path)
        .context("Failed to open raster")?
        .meta()
        .clone();

    let advice = MemoryAdvisor::system()
        .advise_for_file(path)
        .context("Failed to size raster")?;
    let factor = factor.unwrap_or(advice.factor);

    let (grid, bounds) = load_downsampled(path, factor).context("Failed to load raster")?;
    let stats = grid.stats();

    if json {
        let response = InspectResponse {
            path: path.display().to_string(),
            width: meta.width,
            height: meta.height,
            pixel_type: format!("{:?}", meta.pixel_type),
            nodata: meta.nodata,
            bounds,
            advice,
            factor,
            grid_rows: grid.rows(),
            grid_cols: grid.cols(),
            stats,
        };
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("File:          {}", path.display());
    println!("Size:          {} x {} ({:?})", meta.width, meta.height, meta.pixel_type);
    match meta.nodata {
        Some(nodata) => println!("Nodata:        {}", nodata),
        None => println!("Nodata:        none"),
    }
    println!("Bounds:        {}", bounds);
    println!();
    println!("Memory:");
    println!("  Estimated:   {:.1} MB", advice.estimated_mb);
    println!("  Available:   {:.1} MB", advice.available_mb);
    println!(
        "  Factor:      {}{}",
        factor,
        if advice.can_process { "" } else { " (downsampled)" }
    );
    println!();
    println!("Grid:          {} x {}", grid.rows(), grid.cols());
    match (stats.min, stats.max, stats.mean) {
        (Some(min), Some(max), Some(mean)) => {
            println!("  Min:         {:.1} m", min);
            println!("  Max:         {:.1} m", max);
            println!("  Mean:        {:.1} m", mean);
        }
        _ => println!("  No valid samples"),
    }
    println!("  Void cells:  {}", stats.nodata_count);

    Ok(())
}
