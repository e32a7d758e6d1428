//! Runtime configuration read from `TERRAMOSAIC_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{MosaicError, Result};

/// Which storage backend holds the elevation tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataSource {
    /// Plain directory on the local filesystem.
    #[default]
    Local,
    /// Bucket mounted into the filesystem.
    MountedS3,
    /// Bucket accessed through the S3 API.
    ObjectStore,
}

impl FromStr for DataSource {
    type Err = MosaicError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(DataSource::Local),
            "mounted_s3" => Ok(DataSource::MountedS3),
            "boto3_s3" | "s3" => Ok(DataSource::ObjectStore),
            other => Err(MosaicError::Config(format!(
                "unknown data source '{}' (expected local, mounted_s3 or boto3_s3)",
                other
            ))),
        }
    }
}

/// Settings shared by the library and the CLI.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Backend selector.
    pub data_source: DataSource,
    /// Root directory for [`DataSource::Local`].
    pub data_dir: Option<PathBuf>,
    /// Mount point for [`DataSource::MountedS3`]; `~` is expanded.
    pub mount_point: Option<String>,
    /// Bucket for [`DataSource::ObjectStore`].
    pub bucket: Option<String>,
    /// Optional region for [`DataSource::ObjectStore`].
    pub region: Option<String>,
    /// API key for the weather collaborator.
    pub weather_api_key: Option<String>,
}

impl Config {
    /// Read configuration from environment variables.
    ///
    /// | Variable | Meaning |
    /// |----------|---------|
    /// | `TERRAMOSAIC_DATA_SOURCE` | `local` (default), `mounted_s3` or `boto3_s3` |
    /// | `TERRAMOSAIC_DATA_DIR` | tile directory for `local` |
    /// | `TERRAMOSAIC_MOUNT_POINT` | mount point for `mounted_s3` |
    /// | `TERRAMOSAIC_BUCKET` | bucket for `boto3_s3` |
    /// | `TERRAMOSAIC_REGION` | region for `boto3_s3` |
    /// | `TERRAMOSAIC_WEATHER_API_KEY` | weather API key |
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::Config`] if the data source selector is unknown.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_source = match get("TERRAMOSAIC_DATA_SOURCE") {
            Some(value) => value.parse()?,
            None => DataSource::default(),
        };

        Ok(Self {
            data_source,
            data_dir: get("TERRAMOSAIC_DATA_DIR").map(PathBuf::from),
            mount_point: get("TERRAMOSAIC_MOUNT_POINT"),
            bucket: get("TERRAMOSAIC_BUCKET"),
            region: get("TERRAMOSAIC_REGION"),
            weather_api_key: get("TERRAMOSAIC_WEATHER_API_KEY"),
        })
    }
}
