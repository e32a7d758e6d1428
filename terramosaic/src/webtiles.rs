//! Web-Mercator tile fetching and stitching.
//!
//! A geographic box and a zoom level select a rectangle of 256×256 map
//! tiles. Each tile is fetched through a [`TileTransport`] with retries and
//! copied into one RGB buffer covering exactly the requested pixels. Tiles
//! that still fail after all retries leave black pixels and are counted in
//! [`StitchedImage::tiles_failed`].

use std::f64::consts::PI;
use std::thread;
use std::time::Duration;

use image::{imageops, RgbImage};
use thiserror::Error;
use tracing::{debug, warn};

/// Edge length of a web-map tile in pixels.
pub const TILE_SIZE: u32 = 256;

/// Satellite imagery tile endpoint.
pub const SATELLITE_URL_TEMPLATE: &str = "https://mt.google.com/vt/lyrs=s&x={x}&y={y}&z={z}";

/// HTTP statuses that trigger a backoff retry.
const RETRY_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// Project a point to Web-Mercator world coordinates at `scale = 2^zoom`.
///
/// `sin(lat)` is clamped to ±0.9999 so the poles stay finite.
///
/// # Examples
///
/// ```
/// use terramosaic::webtiles::project;
///
/// let (x, y) = project(0.0, 0.0, 1.0);
/// assert_eq!(x, 0.5);
/// assert!((y - 0.5).abs() < 1e-12);
/// ```
pub fn project(lat: f64, lon: f64, scale: f64) -> (f64, f64) {
    let siny = (lat * PI / 180.0).sin().clamp(-0.9999, 0.9999);
    let x = scale * (0.5 + lon / 360.0);
    let y = scale * (0.5 - ((1.0 + siny) / (1.0 - siny)).ln() / (4.0 * PI));
    (x, y)
}

/// Address of one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    /// Fill a `{x}`, `{y}`, `{z}` URL template.
    pub fn url(&self, template: &str) -> String {
        template
            .replace("{x}", &self.x.to_string())
            .replace("{y}", &self.y.to_string())
            .replace("{z}", &self.zoom.to_string())
    }
}

/// One decoded tile.
#[derive(Debug, Clone)]
pub struct WebTileImage {
    pub coord: TileCoord,
    pub image: RgbImage,
}

/// Why a single tile fetch failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TileFetchError {
    /// The server answered with a non-success status.
    #[error("HTTP status {0}")]
    Status(u16),

    /// Connection, timeout or decoding failure.
    #[error("{0}")]
    Other(String),
}

impl TileFetchError {
    /// Whether the inner backoff loop should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TileFetchError::Status(code) if RETRY_STATUSES.contains(code))
    }
}

/// Fetches and decodes single tiles.
pub trait TileTransport: Send + Sync {
    fn fetch(&self, coord: TileCoord) -> Result<RgbImage, TileFetchError>;
}

impl<F> TileTransport for F
where
    F: Fn(TileCoord) -> Result<RgbImage, TileFetchError> + Send + Sync,
{
    fn fetch(&self, coord: TileCoord) -> Result<RgbImage, TileFetchError> {
        self(coord)
    }
}

/// Two-level retry schedule.
///
/// The inner loop retries 5xx responses up to `max_retries` times, sleeping
/// `backoff_factor * 2^(n-1)` seconds before retry `n`. Any other failure
/// ends the inner loop; the whole sequence is then repeated up to
/// `outer_attempts` times with `outer_pause` in between.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor: f64,
    pub outer_attempts: u32,
    pub outer_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_factor: 0.1,
            outer_attempts: 2,
            outer_pause: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Same attempt counts as the default with every pause removed.
    pub fn without_delays() -> Self {
        Self {
            backoff_factor: 0.0,
            outer_pause: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Sleep before inner retry `n` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        Duration::from_secs_f64(self.backoff_factor.max(0.0) * f64::from(1u32 << exp))
    }
}

/// Pixel and tile extent of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub zoom: u8,
    /// Top-left corner in world pixels.
    pub tl_pixel: (i64, i64),
    /// Bottom-right corner in world pixels.
    pub br_pixel: (i64, i64),
    /// Top-left tile index.
    pub tl_tile: (i64, i64),
    /// Bottom-right tile index, inclusive.
    pub br_tile: (i64, i64),
}

impl TileRange {
    /// Range for the box spanned by two corners, in any order.
    pub fn new(lat1: f64, lon1: f64, lat2: f64, lon2: f64, zoom: u8) -> Self {
        let (min_lat, max_lat) = (lat1.min(lat2), lat1.max(lat2));
        let (min_lon, max_lon) = (lon1.min(lon2), lon1.max(lon2));
        let scale = f64::from(1u32 << zoom.min(30));
        let size = f64::from(TILE_SIZE);

        let (tl_x, tl_y) = project(max_lat, min_lon, scale);
        let (br_x, br_y) = project(min_lat, max_lon, scale);

        Self {
            zoom,
            tl_pixel: ((tl_x * size) as i64, (tl_y * size) as i64),
            br_pixel: ((br_x * size) as i64, (br_y * size) as i64),
            tl_tile: (tl_x as i64, tl_y as i64),
            br_tile: (br_x as i64, br_y as i64),
        }
    }

    /// Output width in pixels.
    pub fn width(&self) -> u32 {
        (self.tl_pixel.0 - self.br_pixel.0).unsigned_abs() as u32
    }

    /// Output height in pixels.
    pub fn height(&self) -> u32 {
        (self.br_pixel.1 - self.tl_pixel.1).max(0) as u32
    }

    /// Number of tiles in the range.
    pub fn tile_count(&self) -> usize {
        let across = (self.br_tile.0 - self.tl_tile.0 + 1).max(0);
        let down = (self.br_tile.1 - self.tl_tile.1 + 1).max(0);
        (across * down) as usize
    }

    /// Tile indices, row by row from the top-left.
    pub fn tiles(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        (self.tl_tile.1..=self.br_tile.1)
            .flat_map(move |y| (self.tl_tile.0..=self.br_tile.0).map(move |x| (x, y)))
    }
}

/// Result of [`WebTileStitcher::fetch_stitched`].
#[derive(Debug, Clone)]
pub struct StitchedImage {
    pub image: RgbImage,
    pub tiles_fetched: usize,
    pub tiles_failed: usize,
}

impl StitchedImage {
    /// True when no tile could be fetched.
    pub fn is_blank(&self) -> bool {
        self.tiles_fetched == 0
    }
}

/// Fetches tile ranges and assembles them into one image.
pub struct WebTileStitcher<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: TileTransport> WebTileStitcher<T> {
    /// Stitcher with the default retry policy.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            policy: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fetch every tile covering the box and stitch them.
    ///
    /// `on_progress` is called with the completed fraction after each tile,
    /// whether it succeeded or not.
    pub fn fetch_stitched<F>(
        &self,
        lat1: f64,
        lon1: f64,
        lat2: f64,
        lon2: f64,
        zoom: u8,
        mut on_progress: F,
    ) -> StitchedImage
    where
        F: FnMut(f64),
    {
        let range = TileRange::new(lat1, lon1, lat2, lon2, zoom);
        let mut image = RgbImage::new(range.width(), range.height());
        let total = range.tile_count();
        debug!(?range, total, "Fetching web tiles");

        let mut fetched = 0;
        let mut failed = 0;
        for (done, (tile_x, tile_y)) in range.tiles().enumerate() {
            match self.fetch_at(zoom, tile_x, tile_y) {
                Ok(tile) => {
                    let offset_x = tile_x * i64::from(TILE_SIZE) - range.tl_pixel.0;
                    let offset_y = tile_y * i64::from(TILE_SIZE) - range.tl_pixel.1;
                    imageops::replace(&mut image, &tile.image, offset_x, offset_y);
                    fetched += 1;
                }
                Err(e) => {
                    warn!(x = tile_x, y = tile_y, zoom, error = %e, "Tile fetch failed");
                    failed += 1;
                }
            }
            on_progress((done + 1) as f64 / total as f64);
        }

        StitchedImage {
            image,
            tiles_fetched: fetched,
            tiles_failed: failed,
        }
    }

    fn fetch_at(&self, zoom: u8, x: i64, y: i64) -> Result<WebTileImage, TileFetchError> {
        let (x, y) = match (u32::try_from(x), u32::try_from(y)) {
            (Ok(x), Ok(y)) => (x, y),
            _ => return Err(TileFetchError::Other(format!("tile ({}, {}) out of range", x, y))),
        };
        self.fetch_tile(TileCoord { zoom, x, y })
    }

    /// Fetch one tile with the full retry schedule.
    pub fn fetch_tile(&self, coord: TileCoord) -> Result<WebTileImage, TileFetchError> {
        let attempts = self.policy.outer_attempts.max(1);
        let mut last_error = TileFetchError::Other("no attempt made".to_string());

        for attempt in 0..attempts {
            if attempt > 0 {
                thread::sleep(self.policy.outer_pause);
            }
            match self.fetch_with_backoff(coord) {
                Ok(image) => return Ok(WebTileImage { coord, image }),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    fn fetch_with_backoff(&self, coord: TileCoord) -> Result<RgbImage, TileFetchError> {
        let mut retry = 0;
        loop {
            match self.transport.fetch(coord) {
                Ok(image) => return Ok(image),
                Err(e) if e.is_retryable() && retry < self.policy.max_retries => {
                    retry += 1;
                    thread::sleep(self.policy.backoff(retry));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(feature = "http")]
pub use self::http::HttpTileTransport;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use image::RgbImage;
    use reqwest::blocking::Client;

    use super::{TileCoord, TileFetchError, TileTransport, SATELLITE_URL_TEMPLATE};
    use crate::error::{MosaicError, Result};

    /// Per-attempt request timeout.
    const TIMEOUT_SECS: u64 = 10;

    const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/99.0.4844.82 Safari/537.36";

    /// Fetches tiles over HTTP and decodes PNG or JPEG bodies.
    pub struct HttpTileTransport {
        client: Client,
        url_template: String,
    }

    impl HttpTileTransport {
        /// Transport for the satellite imagery endpoint.
        pub fn satellite() -> Result<Self> {
            Self::with_url_template(SATELLITE_URL_TEMPLATE)
        }

        /// Transport for any `{x}`/`{y}`/`{z}` template.
        pub fn with_url_template(url_template: impl Into<String>) -> Result<Self> {
            let url_template = url_template.into();
            let client = Client::builder()
                .timeout(Duration::from_secs(TIMEOUT_SECS))
                .user_agent(USER_AGENT)
                .build()
                .map_err(|e| MosaicError::Network {
                    url: url_template.clone(),
                    reason: e.to_string(),
                })?;
            Ok(Self {
                client,
                url_template,
            })
        }
    }

    impl TileTransport for HttpTileTransport {
        fn fetch(&self, coord: TileCoord) -> std::result::Result<RgbImage, TileFetchError> {
            let url = coord.url(&self.url_template);
            let response = self
                .client
                .get(&url)
                .send()
                .map_err(|e| TileFetchError::Other(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(TileFetchError::Status(status.as_u16()));
            }

            let bytes = response
                .bytes()
                .map_err(|e| TileFetchError::Other(e.to_string()))?;
            let decoded = image::load_from_memory(&bytes)
                .map_err(|e| TileFetchError::Other(format!("decode failed: {}", e)))?;
            Ok(decoded.to_rgb8())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn solid_tile(value: u8) -> RgbImage {
        RgbImage::from_pixel(TILE_SIZE, TILE_SIZE, Rgb([value, value, value]))
    }

    #[test]
    fn test_project() {
        let (x, y) = project(0.0, -180.0, 4.0);
        assert_eq!(x, 0.0);
        assert!((y - 2.0).abs() < 1e-12);

        // Clamped near the poles
        let (_, y_north) = project(89.99, 0.0, 1.0);
        let (_, y_pole) = project(90.0, 0.0, 1.0);
        assert_eq!(y_north, y_pole);
        assert!(y_pole.is_finite());
    }

    #[test]
    fn test_tile_url() {
        let coord = TileCoord { zoom: 12, x: 1205, y: 1539 };
        assert_eq!(
            coord.url(SATELLITE_URL_TEMPLATE),
            "https://mt.google.com/vt/lyrs=s&x=1205&y=1539&z=12"
        );
    }

    #[test]
    fn test_range_corner_order_irrelevant() {
        let a = TileRange::new(40.0, -74.5, 40.5, -74.0, 12);
        let b = TileRange::new(40.5, -74.0, 40.0, -74.5, 12);
        assert_eq!(a, b);
        assert!(a.width() > 0);
        assert!(a.height() > 0);
        assert_eq!(a.tiles().count(), a.tile_count());
        assert_eq!(a.tiles().next(), Some(a.tl_tile));
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(RetryPolicy::without_delays().backoff(5), Duration::ZERO);
    }

    #[test]
    fn test_single_tile_always_failing() {
        let range = TileRange::new(40.0, -74.0, 41.0, -73.0, 1);
        assert_eq!(range.tile_count(), 1);

        let stitcher = WebTileStitcher::new(|_: TileCoord| -> Result<RgbImage, TileFetchError> {
            Err(TileFetchError::Other("connection refused".into()))
        })
        .with_retry_policy(RetryPolicy::without_delays());

        let mut progress = Vec::new();
        let result = stitcher.fetch_stitched(40.0, -74.0, 41.0, -73.0, 1, |p| progress.push(p));

        assert_eq!(result.image.dimensions(), (range.width(), range.height()));
        assert!(result.image.pixels().all(|p| p.0 == [0, 0, 0]));
        assert_eq!(result.tiles_failed, 1);
        assert!(result.is_blank());
        assert_eq!(progress, vec![1.0]);
    }

    #[test]
    fn test_retry_counts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let stitcher = WebTileStitcher::new(move |_: TileCoord| -> Result<RgbImage, TileFetchError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TileFetchError::Status(503))
        })
        .with_retry_policy(RetryPolicy::without_delays());

        assert!(stitcher.fetch_tile(TileCoord { zoom: 1, x: 0, y: 0 }).is_err());
        // (1 try + 5 retries) per outer attempt, 2 outer attempts
        assert_eq!(calls.load(Ordering::SeqCst), 12);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let stitcher = WebTileStitcher::new(move |_: TileCoord| -> Result<RgbImage, TileFetchError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TileFetchError::Status(404))
        })
        .with_retry_policy(RetryPolicy::without_delays());
        let err = stitcher.fetch_tile(TileCoord { zoom: 1, x: 0, y: 0 }).unwrap_err();
        assert_eq!(err, TileFetchError::Status(404));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_recovers_after_transient_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let stitcher = WebTileStitcher::new(move |_: TileCoord| -> Result<RgbImage, TileFetchError> {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TileFetchError::Status(502))
            } else {
                Ok(solid_tile(7))
            }
        })
        .with_retry_policy(RetryPolicy::without_delays());

        let tile = stitcher.fetch_tile(TileCoord { zoom: 3, x: 1, y: 2 }).unwrap();
        assert_eq!(tile.coord, TileCoord { zoom: 3, x: 1, y: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_stitch_places_tiles() {
        // Each tile is painted with its x index so placement can be checked
        let stitcher = WebTileStitcher::new(|coord: TileCoord| -> Result<RgbImage, TileFetchError> {
            Ok(solid_tile(coord.x as u8))
        })
        .with_retry_policy(RetryPolicy::without_delays());

        let range = TileRange::new(40.0, -75.0, 40.3, -74.0, 10);
        let mut calls = 0;
        let result = stitcher.fetch_stitched(40.0, -75.0, 40.3, -74.0, 10, |_| calls += 1);

        assert_eq!(calls, range.tile_count());
        assert_eq!(result.tiles_fetched, range.tile_count());
        assert_eq!(result.tiles_failed, 0);
        assert!(!result.is_blank());

        let first = result.image.get_pixel(0, 0).0[0];
        let last = result.image.get_pixel(range.width() - 1, 0).0[0];
        assert_eq!(first as i64, range.tl_tile.0 % 256);
        assert_eq!(last as i64, range.br_tile.0 % 256);
    }
}
