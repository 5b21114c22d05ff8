//! Per-track reference data, built once and shared by every session.

use std::collections::HashMap;
use std::sync::Arc;

use analysis::{resample, LapTimeTable, Segmentation, SegmentationConfig, SegmentationEngine};
use coach::{CoachError, SessionReference};
use model::{Lap, TrackKey};
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::store::Store;

type Slot = Arc<OnceCell<Arc<SessionReference>>>;

/// Concurrent callers for the same track share one load; the others wait for
/// it instead of segmenting again.
pub struct ReferenceCache {
    store: Arc<dyn Store>,
    config: SegmentationConfig,
    cache: Mutex<HashMap<TrackKey, Slot>>,
}

fn unusable(track: &TrackKey, e: impl std::fmt::Display) -> CoachError {
    CoachError::Reference { track: track.clone(), reason: e.to_string() }
}

/// Lap time table from the fastest lap that resamples cleanly.
fn table_from_laps(laps: &[Lap], track_length: u32) -> LapTimeTable {
    laps.iter()
        .filter(|l| l.total_time_ms > 0)
        .filter_map(|l| resample(&l.points).map(|r| (l.total_time_ms, r)))
        .filter(|(_, r)| r.len() >= 2)
        .min_by_key(|(t, _)| *t)
        .map(|(_, r)| LapTimeTable::from_trace(&r, track_length))
        .unwrap_or_else(|| LapTimeTable::linear(track_length, 0.0))
}

impl ReferenceCache {
    pub fn new(store: Arc<dyn Store>, config: SegmentationConfig) -> Self {
        Self { store, config, cache: Mutex::new(HashMap::new()) }
    }

    pub fn cached(&self, track: &TrackKey) -> Option<Arc<SessionReference>> {
        self.cache.lock().get(track).and_then(|slot| slot.get().cloned())
    }

    /// Loads persisted segments when present, otherwise segments the
    /// track's reference laps and persists the result. Failures are not
    /// cached so a later call can succeed once data arrives.
    pub async fn get(&self, track: &TrackKey) -> Result<Arc<SessionReference>, CoachError> {
        let slot: Slot = self.cache.lock().entry(track.clone()).or_default().clone();
        let reference = slot.get_or_try_init(|| self.load(track)).await?;
        Ok(reference.clone())
    }

    async fn load(&self, track: &TrackKey) -> Result<Arc<SessionReference>, CoachError> {
        let laps = self.store.reference_laps(track).await.map_err(|e| unusable(track, e))?;
        let stored = self.store.reference_segments(track).await.map_err(|e| unusable(track, e))?;

        let reference = match stored {
            Some(ring) => {
                debug!(%track, segments = ring.len(), "using stored segments");
                let table = table_from_laps(&laps, ring.track_length());
                Arc::new(SessionReference { track: track.clone(), ring, table })
            }
            None => {
                if laps.is_empty() {
                    return Err(CoachError::NoReference(track.clone()));
                }
                let known = self.store.track_length(track).await.map_err(|e| unusable(track, e))?;
                let engine = SegmentationEngine::new(self.config.clone());
                let segmentation: Segmentation = tokio::task::spawn_blocking(move || engine.build(&laps, known))
                    .await
                    .map_err(|e| unusable(track, e))?
                    .map_err(|e| unusable(track, e))?;
                self.store
                    .save_segments(track, &segmentation.ring)
                    .await
                    .map_err(|e| unusable(track, e))?;
                info!(%track, segments = segmentation.ring.len(), length = segmentation.ring.track_length(), "segmented track");
                SessionReference::new(track.clone(), segmentation)
            }
        };
        Ok(reference)
    }
}
