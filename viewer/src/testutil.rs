//! Shared test fixtures: a synthetic GeoTIFF builder, a scripted layer
//! source, and a mock map surface that records mutations.

use async_trait::async_trait;
use cloudcasting::{FetchError, StatusCode};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

use crate::cache::LayerSource;
use crate::decode::{decode_geotiff, DecodedFrame};
use crate::layers::{MapSurface, ResourceError};

/// Encode a single-band float GeoTIFF with pixel-scale/tiepoint
/// georeferencing anchored at (min_lon, max_lat).
pub(crate) fn encode_geotiff(
    width: u32,
    height: u32,
    values: &[f32],
    min_lon: f64,
    max_lat: f64,
    scale: (f64, f64),
) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut cursor).unwrap();
        let mut image = encoder
            .new_image::<colortype::Gray32Float>(width, height)
            .unwrap();
        image
            .encoder()
            .write_tag(Tag::ModelPixelScaleTag, &[scale.0, scale.1, 0.0][..])
            .unwrap();
        image
            .encoder()
            .write_tag(Tag::ModelTiepointTag, &[0.0, 0.0, 0.0, min_lon, max_lat, 0.0][..])
            .unwrap();
        image.write_data(values).unwrap();
    }
    cursor.into_inner()
}

/// Like [`encode_geotiff`] but with a GDAL nodata marker.
pub(crate) fn encode_geotiff_with_nodata(
    width: u32,
    height: u32,
    values: &[f32],
    nodata: f64,
) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut cursor).unwrap();
        let mut image = encoder
            .new_image::<colortype::Gray32Float>(width, height)
            .unwrap();
        image
            .encoder()
            .write_tag(Tag::ModelPixelScaleTag, &[1.0, 1.0, 0.0][..])
            .unwrap();
        image
            .encoder()
            .write_tag(Tag::ModelTiepointTag, &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0][..])
            .unwrap();
        image
            .encoder()
            .write_tag(Tag::GdalNodata, nodata.to_string().as_str())
            .unwrap();
        image.write_data(values).unwrap();
    }
    cursor.into_inner()
}

/// A TIFF with valid pixels but no georeferencing tags.
pub(crate) fn encode_plain_tiff(width: u32, height: u32, values: &[f32]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut cursor).unwrap();
        encoder
            .write_image::<colortype::Gray32Float>(width, height, values)
            .unwrap();
    }
    cursor.into_inner()
}

pub(crate) fn sample_layer_bytes() -> Vec<u8> {
    encode_geotiff(2, 2, &[0.4, 0.6, 0.2, 0.1], -12.0, 64.0, (0.5, 0.5))
}

pub(crate) fn sample_frame() -> DecodedFrame {
    decode_geotiff(&sample_layer_bytes()).unwrap()
}

/// Layer source with per-(variable, step) failure scripting and a call
/// counter, standing in for the HTTP client.
pub(crate) struct ScriptedSource {
    calls: AtomicUsize,
    failing: Mutex<HashSet<(String, u32)>>,
    corrupted: Mutex<HashSet<(String, u32)>>,
}

impl ScriptedSource {
    pub(crate) fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
            corrupted: Mutex::new(HashSet::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make fetches for this key fail with a service error.
    pub(crate) fn fail(&self, variable: &str, step: u32) {
        self.failing
            .lock()
            .unwrap()
            .insert((variable.to_string(), step));
    }

    pub(crate) fn recover(&self, variable: &str, step: u32) {
        self.failing
            .lock()
            .unwrap()
            .remove(&(variable.to_string(), step));
    }

    /// Make fetches for this key return undecodable bytes.
    pub(crate) fn corrupt(&self, variable: &str, step: u32) {
        self.corrupted
            .lock()
            .unwrap()
            .insert((variable.to_string(), step));
    }
}

#[async_trait]
impl LayerSource for ScriptedSource {
    async fn fetch_layer(&self, variable: &str, step: u32) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = (variable.to_string(), step);
        if self.failing.lock().unwrap().contains(&key) {
            return Err(FetchError::Status {
                url: format!("mock://layers/{}/{}.tif", variable, step),
                status: StatusCode::SERVICE_UNAVAILABLE,
            });
        }
        if self.corrupted.lock().unwrap().contains(&key) {
            return Ok(b"garbage payload".to_vec());
        }
        Ok(sample_layer_bytes())
    }
}

/// Map surface that records sources, layers, and visibility.
#[derive(Default)]
pub(crate) struct MockMap {
    sources: HashSet<String>,
    layers: HashMap<String, bool>,
    add_source_calls: usize,
    // Simulates resources removed out from under the registry.
    external_removal: bool,
}

impl MockMap {
    pub(crate) fn with_external_removal() -> Self {
        Self {
            external_removal: true,
            ..Self::default()
        }
    }

    pub(crate) fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub(crate) fn add_source_calls(&self) -> usize {
        self.add_source_calls
    }

    pub(crate) fn visible_layers(&self) -> Vec<String> {
        let mut visible: Vec<String> = self
            .layers
            .iter()
            .filter(|(_, v)| **v)
            .map(|(id, _)| id.clone())
            .collect();
        visible.sort();
        visible
    }
}

impl MapSurface for MockMap {
    fn add_image_source(&mut self, id: &str, _frame: &DecodedFrame) -> Result<(), ResourceError> {
        self.add_source_calls += 1;
        if !self.sources.insert(id.to_string()) {
            return Err(ResourceError::DuplicateSource(id.to_string()));
        }
        Ok(())
    }

    fn add_raster_layer(&mut self, id: &str, visible: bool) -> Result<(), ResourceError> {
        if self.layers.contains_key(id) {
            return Err(ResourceError::DuplicateLayer(id.to_string()));
        }
        self.layers.insert(id.to_string(), visible);
        Ok(())
    }

    fn set_layer_visibility(&mut self, id: &str, visible: bool) -> Result<(), ResourceError> {
        match self.layers.get_mut(id) {
            Some(entry) => {
                *entry = visible;
                Ok(())
            }
            None => Err(ResourceError::LayerNotFound(id.to_string())),
        }
    }

    fn remove_layer(&mut self, id: &str) -> Result<(), ResourceError> {
        if self.external_removal {
            self.layers.remove(id);
            return Err(ResourceError::LayerNotFound(id.to_string()));
        }
        match self.layers.remove(id) {
            Some(_) => Ok(()),
            None => Err(ResourceError::LayerNotFound(id.to_string())),
        }
    }

    fn remove_source(&mut self, id: &str) -> Result<(), ResourceError> {
        if self.external_removal {
            self.sources.remove(id);
            return Err(ResourceError::SourceNotFound(id.to_string()));
        }
        if self.sources.remove(id) {
            Ok(())
        } else {
            Err(ResourceError::SourceNotFound(id.to_string()))
        }
    }

    fn has_layer(&self, id: &str) -> bool {
        self.layers.contains_key(id)
    }

    fn has_source(&self, id: &str) -> bool {
        self.sources.contains(id)
    }
}
