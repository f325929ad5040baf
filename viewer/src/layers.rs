use cloudcasting::{layer_id, MAX_TIME_STEPS};
use log::{debug, warn};
use std::collections::HashMap;
use thiserror::Error;

use crate::cache::{FrameCache, FrameKey};
use crate::decode::DecodedFrame;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("layer {0} does not exist")]
    LayerNotFound(String),
    #[error("source {0} does not exist")]
    SourceNotFound(String),
    #[error("layer {0} already exists")]
    DuplicateLayer(String),
    #[error("source {0} already exists")]
    DuplicateSource(String),
}

/// Map surface collaborator: the minimal mutation interface a
/// raster-capable map widget must expose. Overlay resources are addressed
/// by the deterministic identifier from [`cloudcasting::layer_id`].
pub trait MapSurface: Send {
    /// Register an image source from a decoded frame's pixel surface and
    /// corner coordinates.
    fn add_image_source(&mut self, id: &str, frame: &DecodedFrame) -> Result<(), ResourceError>;
    /// Add a raster layer backed by the image source of the same id.
    fn add_raster_layer(&mut self, id: &str, visible: bool) -> Result<(), ResourceError>;
    fn set_layer_visibility(&mut self, id: &str, visible: bool) -> Result<(), ResourceError>;
    fn remove_layer(&mut self, id: &str) -> Result<(), ResourceError>;
    fn remove_source(&mut self, id: &str) -> Result<(), ResourceError>;
    fn has_layer(&self, id: &str) -> bool;
    fn has_source(&self, id: &str) -> bool;
}

struct Overlay {
    layer_id: String,
    visible: bool,
}

/// Tracks which decoded frames have been materialized as map overlays and
/// which one is visible. All map-surface mutation funnels through here,
/// which is what keeps the one-visible-overlay-per-variable invariant.
pub struct LayerRegistry<M: MapSurface> {
    map: M,
    overlays: HashMap<FrameKey, Overlay>,
}

impl<M: MapSurface> LayerRegistry<M> {
    pub fn new(map: M) -> Self {
        Self {
            map,
            overlays: HashMap::new(),
        }
    }

    pub fn map(&self) -> &M {
        &self.map
    }

    /// Make `key` the visible overlay for its variable, materializing the
    /// overlay first if this frame has never been shown. After this call
    /// exactly one overlay for the variable is visible.
    pub fn show(&mut self, key: &FrameKey, frame: &DecodedFrame) -> Result<(), ResourceError> {
        self.materialize(key, frame, false)?;

        let siblings: Vec<FrameKey> = self
            .overlays
            .iter()
            .filter(|(other, overlay)| {
                other.variable == key.variable && *other != key && overlay.visible
            })
            .map(|(other, _)| other.clone())
            .collect();
        for sibling in siblings {
            self.set_visible(&sibling, false)?;
        }

        self.set_visible(key, true)
    }

    /// Ensure a (hidden) overlay exists for every step of `variable`,
    /// fetching and decoding through the cache as needed, then re-show the
    /// active step. Progress is reported after every step, failed steps
    /// are logged and skipped so playback can still start.
    ///
    /// Returns (loaded, failed) step counts.
    pub async fn preload_all(
        &mut self,
        cache: &FrameCache,
        variable: &str,
        active_step: u32,
        mut progress: impl FnMut(u32, u32),
    ) -> (u32, u32) {
        let total = MAX_TIME_STEPS;
        let mut loaded = 0;
        let mut failed = 0;
        let mut active_frame = None;

        self.hide_variable(variable);

        for step in 0..total {
            let key = FrameKey::new(variable, step);
            match cache.get_or_create(&key).await {
                Ok(outcome) => {
                    if let Some(evicted) = outcome.evicted {
                        self.remove_overlay(&evicted);
                    }
                    match self.materialize(&key, &outcome.frame, false) {
                        Ok(_) => {
                            loaded += 1;
                            if step == active_step {
                                active_frame = Some(outcome.frame);
                            }
                        }
                        Err(err) => {
                            warn!("failed to materialize overlay for {}: {}", key, err);
                            failed += 1;
                        }
                    }
                }
                Err(err) => {
                    warn!("failed to preload step {} for {}: {}", step, variable, err);
                    failed += 1;
                }
            }
            progress(step + 1, total);
        }

        if let Some(frame) = active_frame {
            let key = FrameKey::new(variable, active_step);
            if let Err(err) = self.show(&key, &frame) {
                warn!("failed to show active step after preload: {}", err);
            }
        }

        (loaded, failed)
    }

    /// Remove one overlay and its underlying map resources. Safe to call
    /// for overlays whose resources were already removed externally.
    pub fn remove_overlay(&mut self, key: &FrameKey) {
        if let Some(overlay) = self.overlays.remove(key) {
            debug!("removing overlay {}", overlay.layer_id);
            if let Err(err) = self.map.remove_layer(&overlay.layer_id) {
                warn!("error removing layer {}: {}", overlay.layer_id, err);
            }
            if let Err(err) = self.map.remove_source(&overlay.layer_id) {
                warn!("error removing source {}: {}", overlay.layer_id, err);
            }
        }
    }

    /// Remove every overlay belonging to `variable`. Idempotent.
    pub fn teardown_variable(&mut self, variable: &str) {
        let keys: Vec<FrameKey> = self
            .overlays
            .keys()
            .filter(|key| key.variable == variable)
            .cloned()
            .collect();
        for key in keys {
            self.remove_overlay(&key);
        }
    }

    /// Remove every overlay. Used on controller teardown. Idempotent.
    pub fn teardown_all(&mut self) {
        let keys: Vec<FrameKey> = self.overlays.keys().cloned().collect();
        for key in keys {
            self.remove_overlay(&key);
        }
    }

    /// The step currently visible for `variable`, if any.
    pub fn visible_step(&self, variable: &str) -> Option<u32> {
        self.overlays
            .iter()
            .find(|(key, overlay)| key.variable == variable && overlay.visible)
            .map(|(key, _)| key.step)
    }

    pub fn is_materialized(&self, key: &FrameKey) -> bool {
        self.overlays.contains_key(key)
    }

    pub fn overlay_count(&self) -> usize {
        self.overlays.len()
    }

    fn materialize(
        &mut self,
        key: &FrameKey,
        frame: &DecodedFrame,
        visible: bool,
    ) -> Result<(), ResourceError> {
        if self.overlays.contains_key(key) {
            return Ok(());
        }
        let id = layer_id(&key.variable, key.step);
        if !self.map.has_source(&id) {
            self.map.add_image_source(&id, frame)?;
        }
        if !self.map.has_layer(&id) {
            self.map.add_raster_layer(&id, visible)?;
        }
        self.overlays.insert(
            key.clone(),
            Overlay {
                layer_id: id,
                visible,
            },
        );
        Ok(())
    }

    fn set_visible(&mut self, key: &FrameKey, visible: bool) -> Result<(), ResourceError> {
        if let Some(overlay) = self.overlays.get_mut(key) {
            if overlay.visible != visible {
                self.map.set_layer_visibility(&overlay.layer_id, visible)?;
                overlay.visible = visible;
            }
        }
        Ok(())
    }

    fn hide_variable(&mut self, variable: &str) {
        let keys: Vec<FrameKey> = self
            .overlays
            .iter()
            .filter(|(key, overlay)| key.variable == variable && overlay.visible)
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            if let Err(err) = self.set_visible(&key, false) {
                warn!("error hiding overlay for {}: {}", key, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{FrameCache, LayerSource};
    use crate::testutil::{sample_frame, MockMap, ScriptedSource};
    use std::sync::Arc;

    #[test]
    fn show_materializes_once_then_toggles_visibility() {
        let mut registry = LayerRegistry::new(MockMap::default());
        let frame = sample_frame();
        let a = FrameKey::new("IR_016", 0);
        let b = FrameKey::new("IR_016", 1);

        registry.show(&a, &frame).unwrap();
        registry.show(&b, &frame).unwrap();
        registry.show(&a, &frame).unwrap();

        // Two overlays exist; re-showing `a` added no new resources.
        assert_eq!(registry.map().source_count(), 2);
        assert_eq!(registry.map().add_source_calls(), 2);
        assert_eq!(registry.visible_step("IR_016"), Some(0));
    }

    #[test]
    fn exactly_one_overlay_visible_per_variable() {
        let mut registry = LayerRegistry::new(MockMap::default());
        let frame = sample_frame();

        for step in 0..4 {
            registry.show(&FrameKey::new("IR_016", step), &frame).unwrap();
        }
        registry.show(&FrameKey::new("WV_062", 2), &frame).unwrap();

        assert_eq!(registry.map().visible_layers().len(), 2);
        assert_eq!(registry.visible_step("IR_016"), Some(3));
        assert_eq!(registry.visible_step("WV_062"), Some(2));
    }

    #[tokio::test]
    async fn preload_materializes_all_steps_hidden_except_active() {
        let source = Arc::new(ScriptedSource::new());
        let cache = FrameCache::new(Arc::clone(&source) as Arc<dyn LayerSource>, 64);
        let mut registry = LayerRegistry::new(MockMap::default());

        let mut reports = Vec::new();
        let (loaded, failed) = registry
            .preload_all(&cache, "IR_016", 4, |done, total| {
                reports.push((done, total));
            })
            .await;

        assert_eq!(loaded, MAX_TIME_STEPS);
        assert_eq!(failed, 0);
        assert_eq!(registry.overlay_count(), MAX_TIME_STEPS as usize);
        assert_eq!(registry.visible_step("IR_016"), Some(4));
        assert_eq!(registry.map().visible_layers().len(), 1);

        assert_eq!(reports.len(), MAX_TIME_STEPS as usize);
        assert_eq!(reports.first(), Some(&(1, MAX_TIME_STEPS)));
        assert_eq!(reports.last(), Some(&(MAX_TIME_STEPS, MAX_TIME_STEPS)));
    }

    #[tokio::test]
    async fn preload_skips_failed_steps_and_still_reports_progress() {
        let source = Arc::new(ScriptedSource::new());
        source.fail("IR_016", 7);
        let cache = FrameCache::new(Arc::clone(&source) as Arc<dyn LayerSource>, 64);
        let mut registry = LayerRegistry::new(MockMap::default());

        let mut reports = 0;
        let (loaded, failed) = registry
            .preload_all(&cache, "IR_016", 0, |_, _| reports += 1)
            .await;

        assert_eq!(loaded, MAX_TIME_STEPS - 1);
        assert_eq!(failed, 1);
        assert_eq!(reports, MAX_TIME_STEPS);
        assert!(!registry.is_materialized(&FrameKey::new("IR_016", 7)));
        assert_eq!(registry.visible_step("IR_016"), Some(0));
    }

    #[test]
    fn teardown_is_idempotent_and_swallows_missing_resources() {
        let mut registry = LayerRegistry::new(MockMap::default());
        let frame = sample_frame();
        let key = FrameKey::new("IR_016", 0);

        registry.show(&key, &frame).unwrap();
        registry.teardown_variable("IR_016");
        assert_eq!(registry.overlay_count(), 0);
        assert_eq!(registry.map().source_count(), 0);

        // Second teardown finds nothing to remove and must not fail.
        registry.teardown_variable("IR_016");
        registry.teardown_all();
    }

    #[test]
    fn removing_an_externally_removed_overlay_is_safe() {
        let mut registry = LayerRegistry::new(MockMap::with_external_removal());
        let frame = sample_frame();
        let key = FrameKey::new("IR_016", 0);

        registry.show(&key, &frame).unwrap();
        // The mock drops its resources out from under the registry; the
        // not-found errors are logged, never propagated.
        registry.remove_overlay(&key);
        assert_eq!(registry.overlay_count(), 0);
    }
}
