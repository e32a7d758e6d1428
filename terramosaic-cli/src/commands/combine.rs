use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use terramosaic::collaborators::{CityLookup, InMemoryCityLookup};
use terramosaic::{LocationContext, MosaicEngine, StorageBackend};

/// What the mosaic is centred on.
pub enum Target {
    Point { lat: f64, lon: f64 },
    City {
        name: String,
        state: String,
        cities: Option<PathBuf>,
    },
}

#[allow(clippy::too_many_arguments)]
pub fn run(
    storage: Arc<dyn StorageBackend>,
    target: Target,
    elevation: f64,
    input_dir: &str,
    output: Option<PathBuf>,
    output_dir: &Path,
    crop: bool,
    json: bool,
) -> Result<()> {
    let mut context = match target {
        Target::Point { lat, lon } => LocationContext::from_point(lat, lon, elevation, output_dir)?,
        Target::City {
            name,
            state,
            cities,
        } => {
            let cities = cities.context(
                "No city list configured. Use --cities or set TERRAMOSAIC_CITIES",
            )?;
            let lookup = InMemoryCityLookup::from_json_file(&cities)
                .with_context(|| format!("Failed to load city list {}", cities.display()))?;
            let city = lookup
                .find_city(&name, &state)
                .with_context(|| format!("City not found: {}, {}", name, state))?;
            LocationContext::from_city(&city, elevation, output_dir)?
        }
    };
    if let Some(output) = output {
        context.output_path = output;
    }

    let engine = MosaicEngine::new(storage);
    let result = context
        .combine(&engine, input_dir, crop)
        .with_context(|| format!("Failed to build mosaic for {}", context.label))?;

    if json {
        println!("{}", serde_json::to_string(&result)?);
        return Ok(());
    }

    println!("Location:    {}", context.label);
    println!("Requested:   {}", result.requested);
    println!("Output:      {}", result.output);
    println!("Tiles used:  {}", result.tiles_used.len());
    for path in &result.tiles_used {
        println!("  {}", path);
    }
    if !result.tiles_missing.is_empty() {
        println!("Missing:     {}", result.tiles_missing.len());
        for path in &result.tiles_missing {
            println!("  {}", path);
        }
    }
    println!("Written to:  {}", result.path.display());

    Ok(())
}
