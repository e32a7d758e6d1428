//! Storage backends the mosaic engine reads source tiles from.
//!
//! All backends address files by `/`-separated keys relative to their root.
//! [`from_config`] builds the backend selected by [`Config`].

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::config::{Config, DataSource};
use crate::error::{MosaicError, Result};

/// Read access to a tree of raster files.
///
/// Implementations must be shareable across threads; every call is blocking.
pub trait StorageBackend: Send + Sync {
    /// Read the whole file at `path`.
    fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// List file keys under `prefix`, sorted.
    fn list_files(&self, prefix: &str) -> Result<Vec<String>>;

    /// Whether a file exists at `path`.
    fn exists(&self, path: &str) -> Result<bool>;

    /// Human-readable description for logs and CLI output.
    fn describe(&self) -> String;
}

impl fmt::Debug for dyn StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Join a prefix and a file name into a storage key.
///
/// Empty prefixes yield the bare name; redundant separators are dropped.
///
/// # Examples
///
/// ```
/// use terramosaic::storage::join_key;
///
/// assert_eq!(join_key("", "a.tif"), "a.tif");
/// assert_eq!(join_key("dem/", "a.tif"), "dem/a.tif");
/// ```
pub fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Files on the local filesystem below a base directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a backend rooted at `base_path`.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Root directory of this backend.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.base_path.join(path.trim_start_matches('/'))
    }

    fn storage_error(path: &str, err: std::io::Error) -> MosaicError {
        MosaicError::Storage {
            path: path.to_string(),
            reason: err.to_string(),
        }
    }
}

impl StorageBackend for LocalStorage {
    #[instrument(skip(self), fields(base = %self.base_path.display()))]
    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.full_path(path);
        let data = fs::read(&full).map_err(|e| Self::storage_error(&full.display().to_string(), e))?;
        debug!(size = data.len(), "Read file");
        Ok(data)
    }

    fn list_files(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.full_path(prefix);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::storage_error(&dir.display().to_string(), e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(join_key(prefix, &entry.file_name().to_string_lossy()));
            }
        }
        files.sort();
        Ok(files)
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.full_path(path).is_file())
    }

    fn describe(&self) -> String {
        format!("local:{}", self.base_path.display())
    }
}

/// A bucket mounted into the filesystem (e.g. with `s3fs` or `mountpoint-s3`).
///
/// Behaves like [`LocalStorage`] after expanding a leading `~` in the mount
/// point.
#[derive(Debug, Clone)]
pub struct MountedStorage {
    inner: LocalStorage,
}

impl MountedStorage {
    /// Create a backend for the given mount point.
    pub fn new(mount_point: &str) -> Self {
        Self {
            inner: LocalStorage::new(expand_home(mount_point)),
        }
    }

    /// Expanded mount point.
    pub fn mount_point(&self) -> &Path {
        self.inner.base_path()
    }
}

impl StorageBackend for MountedStorage {
    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.read_file(path)
    }

    fn list_files(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_files(prefix)
    }

    fn exists(&self, path: &str) -> Result<bool> {
        self.inner.exists(path)
    }

    fn describe(&self) -> String {
        format!("mounted:{}", self.inner.base_path().display())
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        _ => PathBuf::from(path),
    }
}

#[cfg(feature = "s3")]
pub use self::object::ObjectStorage;

#[cfg(feature = "s3")]
mod object {
    use futures::TryStreamExt;
    use object_store::aws::AmazonS3Builder;
    use object_store::path::Path as ObjectPath;
    use object_store::ObjectStore;
    use tokio::runtime::Runtime;
    use tracing::{debug, instrument};

    use super::StorageBackend;
    use crate::error::{MosaicError, Result};

    /// Objects in an S3-compatible bucket.
    ///
    /// Credentials come from the standard AWS environment variables. The
    /// backend owns a current-thread runtime and blocks on each request.
    pub struct ObjectStorage {
        store: Box<dyn ObjectStore>,
        bucket: String,
        runtime: Runtime,
    }

    impl ObjectStorage {
        /// Connect to `bucket`, optionally pinning the region.
        pub fn new(bucket: &str, region: Option<&str>) -> Result<Self> {
            let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
            if let Some(region) = region {
                builder = builder.with_region(region);
            }

            let store = builder.build().map_err(|e| MosaicError::Storage {
                path: format!("s3://{}", bucket),
                reason: format!("Failed to create S3 client: {}", e),
            })?;

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;

            Ok(Self {
                store: Box::new(store),
                bucket: bucket.to_string(),
                runtime,
            })
        }

        fn error(&self, path: &str, err: object_store::Error) -> MosaicError {
            MosaicError::Storage {
                path: format!("s3://{}/{}", self.bucket, path),
                reason: err.to_string(),
            }
        }
    }

    impl StorageBackend for ObjectStorage {
        #[instrument(skip(self), fields(bucket = %self.bucket))]
        fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            let location = ObjectPath::from(path);
            let bytes = self
                .runtime
                .block_on(async {
                    let result = self.store.get(&location).await?;
                    result.bytes().await
                })
                .map_err(|e| self.error(path, e))?;

            debug!(size = bytes.len(), "Read object");
            Ok(bytes.to_vec())
        }

        fn list_files(&self, prefix: &str) -> Result<Vec<String>> {
            let prefix_path = ObjectPath::from(prefix);
            let mut paths: Vec<String> = self
                .runtime
                .block_on(async {
                    self.store
                        .list(Some(&prefix_path))
                        .map_ok(|meta| meta.location.to_string())
                        .try_collect()
                        .await
                })
                .map_err(|e| self.error(prefix, e))?;
            paths.sort();
            Ok(paths)
        }

        fn exists(&self, path: &str) -> Result<bool> {
            let location = ObjectPath::from(path);
            match self.runtime.block_on(self.store.head(&location)) {
                Ok(_) => Ok(true),
                Err(object_store::Error::NotFound { .. }) => Ok(false),
                Err(e) => Err(self.error(path, e)),
            }
        }

        fn describe(&self) -> String {
            format!("s3://{}", self.bucket)
        }
    }
}

/// Build the backend selected by `config`.
///
/// # Errors
///
/// Returns [`MosaicError::Config`] when the selected backend is missing its
/// required setting, or was not compiled in.
pub fn from_config(config: &Config) -> Result<Arc<dyn StorageBackend>> {
    match config.data_source {
        DataSource::Local => {
            let dir = config.data_dir.as_ref().ok_or_else(|| {
                MosaicError::Config("TERRAMOSAIC_DATA_DIR is required for the local data source".into())
            })?;
            Ok(Arc::new(LocalStorage::new(dir)))
        }
        DataSource::MountedS3 => {
            let mount = config.mount_point.as_deref().ok_or_else(|| {
                MosaicError::Config(
                    "TERRAMOSAIC_MOUNT_POINT is required for the mounted_s3 data source".into(),
                )
            })?;
            Ok(Arc::new(MountedStorage::new(mount)))
        }
        DataSource::ObjectStore => object_backend(config),
    }
}

#[cfg(feature = "s3")]
fn object_backend(config: &Config) -> Result<Arc<dyn StorageBackend>> {
    let bucket = config.bucket.as_deref().ok_or_else(|| {
        MosaicError::Config("TERRAMOSAIC_BUCKET is required for the boto3_s3 data source".into())
    })?;
    Ok(Arc::new(ObjectStorage::new(bucket, config.region.as_deref())?))
}

#[cfg(not(feature = "s3"))]
fn object_backend(_config: &Config) -> Result<Arc<dyn StorageBackend>> {
    Err(MosaicError::Config(
        "the boto3_s3 data source requires the `s3` feature".into(),
    ))
}
