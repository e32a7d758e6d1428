use anyhow::Result;
use terramosaic::bounds::validate_elevation;
use terramosaic::locator::resolve;
use terramosaic::{compute_bounds, locate, locate_all, MosaicError, StorageBackend};

pub fn run(
    storage: Option<&dyn StorageBackend>,
    input_dir: &str,
    lat: f64,
    lon: f64,
    elevation: f64,
) -> Result<()> {
    let decadal = locate(lat, lon)?;
    println!("10° tile:    {} ({})", decadal.filename(), decadal.bounds());

    let bounds = compute_bounds(lat, lon, validate_elevation(elevation)?);
    let candidates = locate_all(&bounds);
    println!("Area:        {}", bounds);
    println!();
    println!("{:<40} {:>8}", "1° TILE", "STATUS");
    println!("{}", "-".repeat(49));

    let mut present = 0;
    for key in &candidates {
        let status = match storage {
            Some(storage) => match resolve(storage, input_dir, key) {
                Ok(_) => {
                    present += 1;
                    "found"
                }
                Err(MosaicError::TileNotFound { .. }) => "missing",
                Err(e) => return Err(e.into()),
            },
            None => "-",
        };
        println!("{:<40} {:>8}", key.filename(), status);
    }

    println!();
    println!("Candidates:  {}", candidates.len());
    if let Some(storage) = storage {
        println!("Present:     {}", present);
        println!("Storage:     {}", storage.describe());
    }

    Ok(())
}
