use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use terramosaic::{Config, StorageBackend};
use tracing_subscriber::EnvFilter;

mod commands;

/// DEM mosaic and satellite imagery CLI tool
#[derive(Parser)]
#[command(name = "terramosaic")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Tile storage backend: local, mounted_s3 or boto3_s3
    #[arg(long, env = "TERRAMOSAIC_DATA_SOURCE", global = true)]
    data_source: Option<String>,

    /// Directory containing DEM tiles (local backend)
    #[arg(short, long, env = "TERRAMOSAIC_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Mount point of the tile bucket (mounted_s3 backend)
    #[arg(long, env = "TERRAMOSAIC_MOUNT_POINT", global = true)]
    mount_point: Option<String>,

    /// Bucket name (boto3_s3 backend)
    #[arg(long, env = "TERRAMOSAIC_BUCKET", global = true)]
    bucket: Option<String>,

    /// Bucket region (boto3_s3 backend)
    #[arg(long, env = "TERRAMOSAIC_REGION", global = true)]
    region: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Configuration assembled from arguments, which clap already fills
    /// from the environment.
    fn config(&self) -> Result<Config> {
        let config = Config::from_lookup(|key| match key {
            "TERRAMOSAIC_DATA_SOURCE" => self.data_source.clone(),
            "TERRAMOSAIC_DATA_DIR" => self.data_dir.as_ref().map(|p| p.display().to_string()),
            "TERRAMOSAIC_MOUNT_POINT" => self.mount_point.clone(),
            "TERRAMOSAIC_BUCKET" => self.bucket.clone(),
            "TERRAMOSAIC_REGION" => self.region.clone(),
            _ => None,
        })?;
        Ok(config)
    }

    fn storage(&self) -> Result<Arc<dyn StorageBackend>> {
        let config = self.config()?;
        terramosaic::storage::from_config(&config).context(
            "No tile storage configured. Use --data-dir or set TERRAMOSAIC_DATA_DIR",
        )
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the bounding box around a point
    Bounds {
        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Elevation in meters that sizes the area
        #[arg(short, long, default_value = "1000")]
        elevation: f64,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show which tiles cover a point and its surrounding area
    Locate {
        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Elevation in meters that sizes the area
        #[arg(short, long, default_value = "1000")]
        elevation: f64,

        /// Directory or key prefix holding the tiles
        #[arg(short, long, default_value = "dem")]
        input_dir: String,

        /// Check each candidate against the configured storage
        #[arg(long)]
        check: bool,
    },

    /// Merge the tiles around a point into one GeoTIFF
    Combine {
        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true, required_unless_present = "city")]
        lat: Option<f64>,

        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true, required_unless_present = "city")]
        lon: Option<f64>,

        /// Centre the area on a city instead of a point
        #[arg(long, requires = "state", conflicts_with_all = ["lat", "lon"])]
        city: Option<String>,

        /// State of the city
        #[arg(long)]
        state: Option<String>,

        /// JSON city list used with --city
        #[arg(long, env = "TERRAMOSAIC_CITIES")]
        cities: Option<PathBuf>,

        /// Elevation in meters that sizes the area
        #[arg(short, long, default_value = "1000")]
        elevation: f64,

        /// Directory or key prefix holding the tiles
        #[arg(short, long, default_value = "dem")]
        input_dir: String,

        /// Output file (derived from the location if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory for derived output names
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        /// Keep the full merged extent instead of cropping
        #[arg(long)]
        no_crop: bool,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Load a GeoTIFF at a memory-safe resolution and summarize it
    Inspect {
        /// Path to a GeoTIFF
        path: PathBuf,

        /// Downsample factor (advised from available memory if not specified)
        #[arg(short, long)]
        factor: Option<u32>,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Download and stitch satellite imagery around a point
    Satellite {
        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Elevation in meters that sizes the area
        #[arg(short, long, default_value = "1000")]
        elevation: f64,

        /// Zoom level (fitted to the area if not specified)
        #[arg(short, long)]
        zoom: Option<u8>,

        /// Output PNG file
        #[arg(short, long, default_value = "satellite.png")]
        output: PathBuf,
    },

    /// Show current weather at a point
    Weather {
        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// OpenWeather API key
        #[arg(long, env = "TERRAMOSAIC_WEATHER_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// List DEM tiles in the configured storage
    List {
        /// Directory or key prefix holding the tiles
        #[arg(default_value = "dem")]
        prefix: String,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("terramosaic=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Bounds {
            lat,
            lon,
            elevation,
            json,
        } => commands::bounds::run(*lat, *lon, *elevation, *json),
        Commands::Locate {
            lat,
            lon,
            elevation,
            input_dir,
            check,
        } => {
            let storage = if *check { Some(cli.storage()?) } else { None };
            commands::locate::run(storage.as_deref(), input_dir, *lat, *lon, *elevation)
        }
        Commands::Combine {
            lat,
            lon,
            city,
            state,
            cities,
            elevation,
            input_dir,
            output,
            output_dir,
            no_crop,
            json,
        } => {
            let target = match (city, state, lat, lon) {
                (Some(city), Some(state), _, _) => commands::combine::Target::City {
                    name: city.clone(),
                    state: state.clone(),
                    cities: cities.clone(),
                },
                (_, _, Some(lat), Some(lon)) => commands::combine::Target::Point {
                    lat: *lat,
                    lon: *lon,
                },
                _ => anyhow::bail!("Specify --lat and --lon, or --city and --state"),
            };
            commands::combine::run(
                cli.storage()?,
                target,
                *elevation,
                input_dir,
                output.clone(),
                output_dir,
                !*no_crop,
                *json,
            )
        }
        Commands::Inspect { path, factor, json } => commands::inspect::run(path, *factor, *json),
        Commands::Satellite {
            lat,
            lon,
            elevation,
            zoom,
            output,
        } => commands::satellite::run(*lat, *lon, *elevation, *zoom, output),
        Commands::Weather {
            lat,
            lon,
            api_key,
            json,
        } => commands::weather::run(*lat, *lon, api_key.as_deref(), *json),
        Commands::List { prefix } => commands::list::run(cli.storage()?.as_ref(), prefix),
    }
}
