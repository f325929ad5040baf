use anyhow::Result;
use cloud_viewer::{
    DecodedFrame, EngineEvent, FrameCache, LayerRegistry, MapSurface, Phase, PlaySpeed,
    PlaybackController, ResourceError, DEFAULT_CACHE_CAPACITY,
};
use cloudcasting::{find_variable, format_time_step, CloudcastingApi, MAX_TIME_STEPS};
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::env;
use std::sync::Arc;

/// Headless map surface: records resources and logs every mutation, so the
/// engine can be exercised without a map widget.
#[derive(Default)]
struct LogMap {
    sources: HashSet<String>,
    layers: HashMap<String, bool>,
}

impl MapSurface for LogMap {
    fn add_image_source(&mut self, id: &str, frame: &DecodedFrame) -> Result<(), ResourceError> {
        debug!(
            "add source {} ({}x{}, top-left {:.2},{:.2})",
            id,
            frame.width(),
            frame.height(),
            frame.corners.top_left.lon,
            frame.corners.top_left.lat
        );
        self.sources.insert(id.to_string());
        Ok(())
    }

    fn add_raster_layer(&mut self, id: &str, visible: bool) -> Result<(), ResourceError> {
        debug!("add layer {} (visible: {})", id, visible);
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
        debug!("remove layer {}", id);
        match self.layers.remove(id) {
            Some(_) => Ok(()),
            None => Err(ResourceError::LayerNotFound(id.to_string())),
        }
    }

    fn remove_source(&mut self, id: &str) -> Result<(), ResourceError> {
        debug!("remove source {}", id);
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

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let args: Vec<String> = env::args().collect();
    let variable = args.get(1).map(String::as_str).unwrap_or("IR_016");
    let loops: u32 = args.get(2).map(|s| s.parse()).transpose()?.unwrap_or(1);

    if find_variable(variable).is_none() {
        eprintln!("Unknown variable: {}", variable);
        eprintln!("Usage: {} [variable] [loops]", args[0]);
        std::process::exit(1);
    }

    info!("starting cloud viewer for variable {}", variable);

    let api = CloudcastingApi::new()?;
    let cache = Arc::new(FrameCache::new(Arc::new(api), DEFAULT_CACHE_CAPACITY));
    let registry = LayerRegistry::new(LogMap::default());
    let (controller, handle, mut events) = PlaybackController::new(cache, registry, variable);

    let engine = tokio::spawn(controller.run());

    handle.set_speed(PlaySpeed::Quadruple);
    handle.toggle_play();

    let total_frames = loops * MAX_TIME_STEPS;
    let mut shown = 0;
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::PhaseChanged(phase) => {
                info!("phase: {:?}", phase);
                if phase == Phase::Playing {
                    println!("Playing {} at 4x ({} loops)", variable, loops);
                }
            }
            EngineEvent::PreloadProgress { loaded, total } => {
                println!("Preloading... {}/{}", loaded, total);
            }
            EngineEvent::FrameShown(key) => {
                println!("Frame {} ({})", key, format_time_step(key.step));
                shown += 1;
                if shown >= total_frames {
                    handle.shutdown();
                }
            }
            EngineEvent::LayerFailed { key, message } => {
                eprintln!("Layer {} unavailable: {}", key, message);
            }
        }
    }

    engine.await?;
    info!("cloud viewer stopped");
    Ok(())
}
