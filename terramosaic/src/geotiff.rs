//! Single-band GeoTIFF reading and writing.
//!
//! Only north-up rasters are supported: the georeferencing must come from a
//! ModelPixelScale + ModelTiepoint pair or from a ModelTransformation without
//! rotation terms. The GeoKey directory is carried through untouched so the
//! coordinate reference system of the inputs survives a round trip.

use std::fs;
use std::io::{Cursor, Seek, Write};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, DirectoryEncoder, TiffEncoder, TiffKind, TiffValue};
use tiff::tags::Tag;
use tiff::ColorType;

use crate::bounds::Bounds;
use crate::error::{MosaicError, Result};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GEO_DOUBLE_PARAMS: u16 = 34736;
const GEO_ASCII_PARAMS: u16 = 34737;
const GDAL_NODATA: u16 = 42113;

/// Resolve a numeric tag to the variant the decoder files it under.
fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Storage type of raster samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    F32,
    F64,
}

impl PixelType {
    /// Map TIFF bits-per-sample and SampleFormat (1 uint, 2 int, 3 float).
    fn from_layout(bits: u8, sample_format: u64) -> Option<Self> {
        match (sample_format, bits) {
            (1, 8) => Some(PixelType::U8),
            (1, 16) => Some(PixelType::U16),
            (1, 32) => Some(PixelType::U32),
            (2, 8) => Some(PixelType::I8),
            (2, 16) => Some(PixelType::I16),
            (2, 32) => Some(PixelType::I32),
            (3, 32) => Some(PixelType::F32),
            (3, 64) => Some(PixelType::F64),
            _ => None,
        }
    }

    /// Size of one sample in bytes.
    pub fn size_bytes(&self) -> usize {
        match self {
            PixelType::U8 | PixelType::I8 => 1,
            PixelType::U16 | PixelType::I16 => 2,
            PixelType::U32 | PixelType::I32 | PixelType::F32 => 4,
            PixelType::F64 => 8,
        }
    }

    /// Whether samples are floating point.
    pub fn is_float(&self) -> bool {
        matches!(self, PixelType::F32 | PixelType::F64)
    }
}

/// North-up affine transform: pixel `(col, row)` has its top-left corner at
/// `(origin_x + col * pixel_width, origin_y - row * pixel_height)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    /// Pixel size along x, positive.
    pub pixel_width: f64,
    /// Pixel size along y, positive; rows advance southwards.
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Geographic extent of a `width × height` raster.
    pub fn bounds(&self, width: u32, height: u32) -> Bounds {
        Bounds {
            left: self.origin_x,
            top: self.origin_y,
            right: self.origin_x + width as f64 * self.pixel_width,
            bottom: self.origin_y - height as f64 * self.pixel_height,
        }
    }

    /// Fractional column of a longitude.
    pub fn col_of(&self, x: f64) -> f64 {
        (x - self.origin_x) / self.pixel_width
    }

    /// Fractional row of a latitude.
    pub fn row_of(&self, y: f64) -> f64 {
        (self.origin_y - y) / self.pixel_height
    }

    /// Coordinates of the centre of pixel `(col, row)`.
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y - (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Transform of a window starting at `(col, row)`.
    pub fn offset(&self, col: usize, row: usize) -> Self {
        Self {
            origin_x: self.origin_x + col as f64 * self.pixel_width,
            origin_y: self.origin_y - row as f64 * self.pixel_height,
            ..*self
        }
    }
}

/// GeoKey directory and parameter tags, copied verbatim between files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoKeys {
    pub directory: Vec<u16>,
    pub double_params: Vec<f64>,
    pub ascii_params: Option<String>,
}

impl GeoKeys {
    /// Geographic WGS 84 (EPSG:4326), pixel-is-area.
    pub fn wgs84() -> Self {
        Self {
            directory: vec![
                1, 1, 0, 3, //
                1024, 0, 1, 2, // GTModelTypeGeoKey = geographic
                1025, 0, 1, 1, // GTRasterTypeGeoKey = pixel is area
                2048, 0, 1, 4326, // GeographicTypeGeoKey
            ],
            double_params: Vec::new(),
            ascii_params: None,
        }
    }
}

/// Everything about a raster except its samples.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMeta {
    pub width: u32,
    pub height: u32,
    pub transform: GeoTransform,
    pub nodata: Option<f64>,
    pub pixel_type: PixelType,
    pub crs: GeoKeys,
}

impl RasterMeta {
    /// Geographic extent.
    pub fn bounds(&self) -> Bounds {
        self.transform.bounds(self.width, self.height)
    }

    /// Whether `value` should be treated as missing.
    pub fn is_nodata(&self, value: f64) -> bool {
        value.is_nan() || self.nodata == Some(value)
    }

    /// Total pixel count.
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Whether the raster has no pixels.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An opened source GeoTIFF.
///
/// Reading the band consumes the tile, so the decoder and its buffer are
/// released as soon as the samples have been extracted.
pub struct RasterTile {
    name: String,
    decoder: Decoder<Cursor<Vec<u8>>>,
    meta: RasterMeta,
}

impl RasterTile {
    /// Open a GeoTIFF held in memory. `name` is used in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`MosaicError::UnsupportedRaster`] for multi-band, rotated or
    /// ungeoreferenced files, and [`MosaicError::Tiff`] for undecodable data.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        let name = name.into();
        let mut limits = Limits::default();
        limits.decoding_buffer_size = 1024 * 1024 * 1024; // 1 GB
        limits.intermediate_buffer_size = 1024 * 1024 * 1024; // 1 GB
        limits.ifd_value_size = 64 * 1024 * 1024;
        let mut decoder = Decoder::new(Cursor::new(bytes))?.with_limits(limits);

        let meta = read_meta(&mut decoder, &name)?;
        Ok(Self {
            name,
            decoder,
            meta,
        })
    }

    /// Open a GeoTIFF on the local filesystem.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let bytes = fs::read(path).map_err(|e| MosaicError::Storage {
            path: name.clone(),
            reason: e.to_string(),
        })?;
        Self::from_bytes(name, bytes)
    }

    /// Raster metadata.
    pub fn meta(&self) -> &RasterMeta {
        &self.meta
    }

    /// Name the tile was opened under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the single band into memory.
    pub fn read_band(mut self) -> Result<Raster> {
        let decoded = self.decoder.read_image()?;
        let data = to_f64(decoded);
        if data.len() != self.meta.len() {
            return Err(MosaicError::UnsupportedRaster {
                path: self.name,
                reason: format!(
                    "decoded {} samples, expected {}",
                    data.len(),
                    self.meta.len()
                ),
            });
        }
        Ok(Raster {
            meta: self.meta,
            data,
        })
    }

    /// Stream the band chunk by chunk (strips or tiles).
    ///
    /// `visit` receives the chunk's top-left pixel `(col, row)`, its width and
    /// height, and its samples in row-major order.
    pub fn for_each_chunk<F>(mut self, mut visit: F) -> Result<RasterMeta>
    where
        F: FnMut(u32, u32, u32, u32, &[f64]),
    {
        let (chunk_w, chunk_h) = self.decoder.chunk_dimensions();
        if chunk_w == 0 || chunk_h == 0 {
            return Err(MosaicError::UnsupportedRaster {
                path: self.name,
                reason: "zero-sized chunks".to_string(),
            });
        }
        let across = self.meta.width.div_ceil(chunk_w);
        let down = self.meta.height.div_ceil(chunk_h);

        for chunk_row in 0..down {
            for chunk_col in 0..across {
                let index = chunk_row * across + chunk_col;
                let (w, h) = self.decoder.chunk_data_dimensions(index);
                let samples = to_f64(self.decoder.read_chunk(index)?);
                visit(chunk_col * chunk_w, chunk_row * chunk_h, w, h, &samples);
            }
        }
        Ok(self.meta)
    }
}

fn read_meta(decoder: &mut Decoder<Cursor<Vec<u8>>>, name: &str) -> Result<RasterMeta> {
    let unsupported = |reason: String| MosaicError::UnsupportedRaster {
        path: name.to_string(),
        reason,
    };

    let (width, height) = decoder.dimensions()?;
    let bits = match decoder.colortype()? {
        ColorType::Gray(bits) => bits,
        other => return Err(unsupported(format!("expected one band, found {:?}", other))),
    };
    let sample_format = decoder
        .find_tag(Tag::SampleFormat)?
        .map(|v| v.into_u64_vec())
        .transpose()?
        .and_then(|v| v.first().copied())
        .unwrap_or(1);
    let pixel_type = PixelType::from_layout(bits, sample_format).ok_or_else(|| {
        unsupported(format!(
            "{}-bit samples with sample format {}",
            bits, sample_format
        ))
    })?;

    let transform = read_transform(decoder)?.ok_or_else(|| unsupported("missing or rotated georeferencing".to_string()))?;

    let crs = GeoKeys {
        directory: decoder
            .find_tag(tag(GEO_KEY_DIRECTORY))?
            .map(|v| v.into_u64_vec())
            .transpose()?
            .map(|v| v.into_iter().map(|k| k as u16).collect())
            .unwrap_or_default(),
        double_params: decoder
            .find_tag(tag(GEO_DOUBLE_PARAMS))?
            .map(|v| v.into_f64_vec())
            .transpose()?
            .unwrap_or_default(),
        ascii_params: decoder
            .find_tag(tag(GEO_ASCII_PARAMS))?
            .map(|v| v.into_string())
            .transpose()?,
    };

    // GDAL stores nodata as ASCII text
    let nodata = decoder
        .find_tag(tag(GDAL_NODATA))?
        .map(|v| v.into_string())
        .transpose()?
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok());

    Ok(RasterMeta {
        width,
        height,
        transform,
        nodata,
        pixel_type,
        crs,
    })
}

fn read_transform(decoder: &mut Decoder<Cursor<Vec<u8>>>) -> Result<Option<GeoTransform>> {
    let scale = decoder
        .find_tag(tag(MODEL_PIXEL_SCALE))?
        .map(|v| v.into_f64_vec())
        .transpose()?;
    let tiepoint = decoder
        .find_tag(tag(MODEL_TIEPOINT))?
        .map(|v| v.into_f64_vec())
        .transpose()?;

    if let (Some(scale), Some(tiepoint)) = (scale, tiepoint) {
        if scale.len() >= 2 && tiepoint.len() >= 6 && scale[0] > 0.0 && scale[1] > 0.0 {
            // Tiepoint format: [i, j, k, x, y, z]
            return Ok(Some(GeoTransform {
                origin_x: tiepoint[3] - tiepoint[0] * scale[0],
                origin_y: tiepoint[4] + tiepoint[1] * scale[1],
                pixel_width: scale[0],
                pixel_height: scale[1],
            }));
        }
    }

    let matrix = decoder
        .find_tag(tag(MODEL_TRANSFORMATION))?
        .map(|v| v.into_f64_vec())
        .transpose()?;
    if let Some(m) = matrix {
        // Row-major 4x4; north-up means no shear terms
        if m.len() >= 8 && m[1] == 0.0 && m[4] == 0.0 && m[0] > 0.0 && m[5] < 0.0 {
            return Ok(Some(GeoTransform {
                origin_x: m[3],
                origin_y: m[7],
                pixel_width: m[0],
                pixel_height: -m[5],
            }));
        }
    }

    Ok(None)
}

fn to_f64(decoded: DecodingResult) -> Vec<f64> {
    match decoded {
        DecodingResult::U8(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f64).collect(),
        DecodingResult::I8(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f64).collect(),
        DecodingResult::F32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::F64(data) => data,
    }
}

/// A single band held in memory, samples row-major from the north-west corner.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub meta: RasterMeta,
    pub data: Vec<f64>,
}

impl Raster {
    /// Build a raster, checking that `data` matches the declared dimensions.
    pub fn new(meta: RasterMeta, data: Vec<f64>) -> Result<Self> {
        if data.len() != meta.len() {
            return Err(MosaicError::InvalidArgument(format!(
                "{} samples for a {}x{} raster",
                data.len(),
                meta.width,
                meta.height
            )));
        }
        Ok(Self { meta, data })
    }

    /// Sample at `(col, row)`, or `None` outside the raster.
    pub fn get(&self, col: usize, row: usize) -> Option<f64> {
        if col >= self.meta.width as usize || row >= self.meta.height as usize {
            return None;
        }
        self.data.get(row * self.meta.width as usize + col).copied()
    }

    /// Encode as a GeoTIFF, keeping the pixel type of [`RasterMeta`].
    ///
    /// Integer types are rounded and saturated; encoding is deterministic.
    pub fn to_tiff_bytes(&self) -> Result<Vec<u8>> {
        let data = &self.data;
        match self.meta.pixel_type {
            PixelType::U8 => {
                let samples: Vec<u8> = data.iter().map(|v| v.round() as u8).collect();
                encode::<colortype::Gray8>(&self.meta, &samples)
            }
            PixelType::U16 => {
                let samples: Vec<u16> = data.iter().map(|v| v.round() as u16).collect();
                encode::<colortype::Gray16>(&self.meta, &samples)
            }
            PixelType::U32 => {
                let samples: Vec<u32> = data.iter().map(|v| v.round() as u32).collect();
                encode::<colortype::Gray32>(&self.meta, &samples)
            }
            PixelType::I8 => {
                let samples: Vec<i8> = data.iter().map(|v| v.round() as i8).collect();
                encode::<colortype::GrayI8>(&self.meta, &samples)
            }
            PixelType::I16 => {
                let samples: Vec<i16> = data.iter().map(|v| v.round() as i16).collect();
                encode::<colortype::GrayI16>(&self.meta, &samples)
            }
            PixelType::I32 => {
                let samples: Vec<i32> = data.iter().map(|v| v.round() as i32).collect();
                encode::<colortype::GrayI32>(&self.meta, &samples)
            }
            PixelType::F32 => {
                let samples: Vec<f32> = data.iter().map(|&v| v as f32).collect();
                encode::<colortype::Gray32Float>(&self.meta, &samples)
            }
            PixelType::F64 => encode::<colortype::Gray64Float>(&self.meta, data),
        }
    }

    /// Write as a GeoTIFF file.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let bytes = self.to_tiff_bytes()?;
        fs::write(path, bytes)?;
        Ok(())
    }
}

fn encode<C>(meta: &RasterMeta, samples: &[C::Inner]) -> Result<Vec<u8>>
where
    C: colortype::ColorType,
    [C::Inner]: TiffValue,
{
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut tiff = TiffEncoder::new(&mut buffer)?;
        let mut image = tiff.new_image::<C>(meta.width, meta.height)?;
        write_geo_tags(image.encoder(), meta)?;
        image.write_data(samples)?;
    }
    Ok(buffer.into_inner())
}

fn write_geo_tags<W, K>(dir: &mut DirectoryEncoder<'_, W, K>, meta: &RasterMeta) -> Result<()>
where
    W: Write + Seek,
    K: TiffKind,
{
    let t = &meta.transform;
    dir.write_tag(tag(MODEL_PIXEL_SCALE), &[t.pixel_width, t.pixel_height, 0.0][..])?;
    dir.write_tag(
        tag(MODEL_TIEPOINT),
        &[0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0][..],
    )?;
    if !meta.crs.directory.is_empty() {
        dir.write_tag(tag(GEO_KEY_DIRECTORY), &meta.crs.directory[..])?;
    }
    if !meta.crs.double_params.is_empty() {
        dir.write_tag(tag(GEO_DOUBLE_PARAMS), &meta.crs.double_params[..])?;
    }
    if let Some(ascii) = &meta.crs.ascii_params {
        dir.write_tag(tag(GEO_ASCII_PARAMS), ascii.as_str())?;
    }
    if let Some(nodata) = meta.nodata {
        dir.write_tag(tag(GDAL_NODATA), format!("{}", nodata).as_str())?;
    }
    Ok(())
}
