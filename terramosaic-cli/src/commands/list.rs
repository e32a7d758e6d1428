use anyhow::{Context, Result};
use terramosaic::locator::parse_filename;
use terramosaic::{StorageBackend, TileGrid};

pub fn run(storage: &dyn StorageBackend, prefix: &str) -> Result<()> {
    let files = storage
        .list_files(prefix)
        .with_context(|| format!("Failed to list {}", prefix))?;

    let tiles: Vec<_> = files
        .iter()
        .filter_map(|path| parse_filename(path).map(|key| (path, key)))
        .collect();

    if tiles.is_empty() {
        println!("No DEM tiles found in: {}", storage.describe());
        return Ok(());
    }

    let mut unit_count = 0;
    let mut decadal_count = 0;

    println!("{:<40} {:>4}  {}", "TILE", "GRID", "COVERAGE");
    println!("{}", "-".repeat(100));

    for (path, key) in &tiles {
        let grid = match key.grid {
            TileGrid::UnitDegree => {
                unit_count += 1;
                "1°"
            }
            TileGrid::Decadal => {
                decadal_count += 1;
                "10°"
            }
        };
        let name = path.rsplit('/').next().unwrap_or(path.as_str());
        println!("{:<40} {:>4}  {}", name, grid, key.bounds());
    }

    // Summary
    println!();
    println!("Summary:");
    println!("  Total tiles: {}", tiles.len());
    if unit_count > 0 {
        println!("  1° tiles: {}", unit_count);
    }
    if decadal_count > 0 {
        println!("  10° tiles: {}", decadal_count);
    }
    let skipped = files.len() - tiles.len();
    if skipped > 0 {
        println!("  Other files: {}", skipped);
    }
    println!("  Storage: {}", storage.describe());

    Ok(())
}
