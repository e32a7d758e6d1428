//! # terramosaic - DEM Tile Mosaicking Library
//!
//! Turns a point on the map into terrain data: find the elevation tiles that
//! cover the surrounding area, merge them into a single GeoTIFF cropped to
//! the area, and read it back at a resolution that fits in memory. A
//! separate stitcher assembles Web-Mercator satellite tiles for the same
//! area.
//!
//! ## Features
//!
//! - **Tile addressing**: 1° (`xmin…_ymax….tif`) and legacy 10°
//!   (`10_DEM_y…x-….tif`) grids behind one [`TileKey`] type
//! - **Deterministic mosaics**: identical inputs give byte-identical output
//! - **Storage backends**: local directory, mounted bucket, or S3 via the
//!   `s3` feature
//! - **Memory-aware loading**: averaged downsampling with a factor advisor
//! - **Web tiles**: retrying fetch and stitch with the `http` feature
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::path::Path;
//! use std::sync::Arc;
//! use terramosaic::{load_downsampled, LocalStorage, MemoryAdvisor, MosaicEngine};
//!
//! let engine = MosaicEngine::new(Arc::new(LocalStorage::new("/data")));
//! let result = engine.combine("dem", Path::new("out/area.tif"), 40.3, -74.0, 500.0, true)?;
//!
//! let advice = MemoryAdvisor::system().advise_for_file(&result.path)?;
//! let (grid, bounds) = load_downsampled(&result.path, advice.factor)?;
//! println!("{:?} cells over {}", grid.shape(), bounds);
//! ```
//!
//! ## Coverage
//!
//! Point lookups are validated against the archive coverage: longitudes
//! -180° to -10°, latitudes 10° to 80°.

pub mod advisor;
pub mod bounds;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod error;
pub mod geotiff;
pub mod grid;
pub mod loader;
pub mod locator;
pub mod mosaic;
pub mod storage;
pub mod webtiles;

// Re-export main types at crate root for convenience
pub use advisor::{DownsampleAdvice, MemoryAdvisor, MemoryProbe};
pub use bounds::{compute_bounds, Bounds, GeoPoint};
pub use config::{Config, DataSource};
pub use context::LocationContext;
pub use error::{MosaicError, Result};
pub use geotiff::{PixelType, Raster, RasterMeta, RasterTile};
pub use grid::ElevationGrid;
pub use loader::load_downsampled;
pub use locator::{locate, locate_all, TileGrid, TileKey};
pub use mosaic::{MosaicEngine, MosaicResult};
pub use storage::{LocalStorage, MountedStorage, StorageBackend};
pub use webtiles::{StitchedImage, TileTransport, WebTileStitcher};

#[cfg(feature = "s3")]
pub use storage::ObjectStorage;

#[cfg(feature = "http")]
pub use collaborators::OpenWeatherClient;
#[cfg(feature = "http")]
pub use webtiles::HttpTileTransport;
