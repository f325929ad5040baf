use image::{Rgba, RgbaImage};
use std::io::Cursor;
use thiserror::Error;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

/// Smallest alpha applied to any positive cloud reading.
pub const MIN_CLOUD_ALPHA: u8 = 25;
/// Largest alpha applied; clouds never render fully opaque.
pub const MAX_CLOUD_ALPHA: u8 = 250;
/// Reading treated as fully dense cloud when scaling alpha.
const FULL_DENSITY: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

/// Geographic extent of a raster in EPSG:4326 degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

/// Corner coordinates in the fixed order expected by image map sources:
/// top-left, top-right, bottom-right, bottom-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CornerCoords {
    pub top_left: LonLat,
    pub top_right: LonLat,
    pub bottom_right: LonLat,
    pub bottom_left: LonLat,
}

impl CornerCoords {
    pub fn from_extent(extent: Extent) -> Self {
        Self {
            top_left: LonLat {
                lon: extent.min_lon,
                lat: extent.max_lat,
            },
            top_right: LonLat {
                lon: extent.max_lon,
                lat: extent.max_lat,
            },
            bottom_right: LonLat {
                lon: extent.max_lon,
                lat: extent.min_lat,
            },
            bottom_left: LonLat {
                lon: extent.min_lon,
                lat: extent.min_lat,
            },
        }
    }
}

/// One decoded raster: a display-ready RGBA surface plus the coordinates
/// that place it on the map. Immutable after creation and shared by
/// reference between the cache and the layer registry.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub image: RgbaImage,
    pub corners: CornerCoords,
}

impl DecodedFrame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not a decodable TIFF: {0}")]
    Tiff(#[from] tiff::TiffError),
    #[error("missing georeferencing tag {0}")]
    MissingGeoreference(&'static str),
    #[error("unsupported sample format for single-band raster")]
    UnsupportedSampleFormat,
    #[error("band length {len} does not match {width}x{height}")]
    BandSizeMismatch { width: u32, height: u32, len: usize },
}

/// Decode a single-band GeoTIFF payload into a white, variable-opacity
/// cloud mask plus its geographic corner coordinates.
///
/// Pixels that are nodata, NaN, or <= 0 become fully transparent; any
/// positive reading maps to opaque-white RGB with
/// alpha = clamp(value / 0.8 * 255, 25, 250).
pub fn decode_geotiff(bytes: &[u8]) -> Result<DecodedFrame, DecodeError> {
    let mut decoder = Decoder::new(Cursor::new(bytes))?;
    let (width, height) = decoder.dimensions()?;

    let scale = decoder
        .get_tag_f64_vec(Tag::ModelPixelScaleTag)
        .map_err(|_| DecodeError::MissingGeoreference("ModelPixelScale"))?;
    let tiepoint = decoder
        .get_tag_f64_vec(Tag::ModelTiepointTag)
        .map_err(|_| DecodeError::MissingGeoreference("ModelTiepoint"))?;
    if scale.len() < 2 {
        return Err(DecodeError::MissingGeoreference("ModelPixelScale"));
    }
    if tiepoint.len() < 6 {
        return Err(DecodeError::MissingGeoreference("ModelTiepoint"));
    }

    let nodata = decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|raw| raw.trim().parse::<f64>().ok());

    let values = read_band(decoder.read_image()?)?;
    if values.len() != (width as usize) * (height as usize) {
        return Err(DecodeError::BandSizeMismatch {
            width,
            height,
            len: values.len(),
        });
    }

    // The tiepoint anchors raster pixel (0, 0) at the top-left corner.
    let min_lon = tiepoint[3];
    let max_lat = tiepoint[4];
    let extent = Extent {
        min_lon,
        min_lat: max_lat - scale[1] * height as f64,
        max_lon: min_lon + scale[0] * width as f64,
        max_lat,
    };

    let mut image = RgbaImage::new(width, height);
    for (pixel, value) in image.pixels_mut().zip(values.iter()) {
        *pixel = cloud_pixel(*value, nodata);
    }

    Ok(DecodedFrame {
        image,
        corners: CornerCoords::from_extent(extent),
    })
}

fn read_band(result: DecodingResult) -> Result<Vec<f64>, DecodeError> {
    match result {
        DecodingResult::F32(values) => Ok(values.into_iter().map(f64::from).collect()),
        DecodingResult::F64(values) => Ok(values),
        DecodingResult::U8(values) => Ok(values.into_iter().map(f64::from).collect()),
        DecodingResult::U16(values) => Ok(values.into_iter().map(f64::from).collect()),
        _ => Err(DecodeError::UnsupportedSampleFormat),
    }
}

fn cloud_pixel(value: f64, nodata: Option<f64>) -> Rgba<u8> {
    if !value.is_finite() || value <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    if nodata.map_or(false, |nd| value == nd) {
        return Rgba([0, 0, 0, 0]);
    }
    let alpha = (value / FULL_DENSITY * 255.0)
        .clamp(MIN_CLOUD_ALPHA as f64, MAX_CLOUD_ALPHA as f64)
        .round() as u8;
    Rgba([255, 255, 255, alpha])
}
