//! Layer acquisition, decode, cache, and animation-playback engine for
//! time-stepped cloud-forecast rasters.
//!
//! The engine turns raw single-band GeoTIFF payloads into displayable,
//! georeferenced map overlays, keeps decoded frames cached for instant
//! re-display, and drives a timer-based animation loop over the forecast
//! horizon. The map itself is reached through the [`MapSurface`] trait so
//! any raster-capable map widget can host the overlays.

pub mod cache;
pub mod decode;
pub mod layers;
pub mod playback;

#[cfg(test)]
pub(crate) mod testutil;

pub use cache::{
    CacheOutcome, CacheStats, FrameCache, FrameKey, LayerError, LayerSource,
    DEFAULT_CACHE_CAPACITY,
};
pub use decode::{
    decode_geotiff, CornerCoords, DecodeError, DecodedFrame, Extent, LonLat, MAX_CLOUD_ALPHA,
    MIN_CLOUD_ALPHA,
};
pub use layers::{LayerRegistry, MapSurface, ResourceError};
pub use playback::{
    Command, ControllerHandle, EngineEvent, KeyInput, Phase, PlaySpeed, PlaybackController,
};
