//! Persistence collaborator: reference data in, laps and coach status out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Result};
use model::{CompletedLap, Lap, SegmentRing, TrackKey};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ReferenceConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachSettings {
    pub enabled: bool,
    pub app: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachStatus {
    pub status: String,
    pub error: Option<String>,
}

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Segments persisted for a track by an earlier segmentation run.
    async fn reference_segments(&self, track: &TrackKey) -> Result<Option<SegmentRing>>;
    async fn save_segments(&self, track: &TrackKey, ring: &SegmentRing) -> Result<()>;
    async fn reference_laps(&self, track: &TrackKey) -> Result<Vec<Lap>>;
    async fn track_length(&self, track: &TrackKey) -> Result<Option<u32>>;
    async fn grow_track_length(&self, track: &TrackKey, length_m: u32) -> Result<()>;
    async fn coach_settings(&self, driver: &str) -> Result<Option<CoachSettings>>;
    async fn update_coach_status(&self, driver: &str, status: &str, error: Option<&str>) -> Result<()>;
    async fn save_lap(&self, lap: &CompletedLap) -> Result<()>;
}

/// Process-local store, seeded from configuration.
#[derive(Default)]
pub struct MemoryStore {
    reference_laps: RwLock<HashMap<TrackKey, Vec<Lap>>>,
    segments: RwLock<HashMap<TrackKey, SegmentRing>>,
    track_lengths: RwLock<HashMap<TrackKey, u32>>,
    settings: RwLock<HashMap<String, CoachSettings>>,
    statuses: RwLock<HashMap<String, CoachStatus>>,
    laps: RwLock<Vec<CompletedLap>>,
    failing_saves: AtomicUsize,
    segment_saves: AtomicUsize,
}

impl MemoryStore {
    pub fn from_config(config: &ReferenceConfig) -> Result<Self> {
        let store = Self::default();
        if let Some(dir) = &config.laps_dir {
            let laps = iox::import_dir(dir)?;
            info!(laps = laps.len(), dir = %dir.display(), "loaded reference laps");
            store.add_reference_laps(laps);
        }
        for d in &config.drivers {
            store.set_coach_settings(&d.name, CoachSettings { enabled: d.enabled, app: d.app.clone() });
        }
        Ok(store)
    }

    pub fn add_reference_laps(&self, laps: Vec<Lap>) {
        let mut map = self.reference_laps.write();
        for lap in laps {
            map.entry(lap.track_key()).or_default().push(lap);
        }
    }

    pub fn set_coach_settings(&self, driver: &str, settings: CoachSettings) {
        self.settings.write().insert(driver.to_string(), settings);
    }

    pub fn set_track_length(&self, track: &TrackKey, length_m: u32) {
        self.track_lengths.write().insert(track.clone(), length_m);
    }

    pub fn saved_laps(&self) -> Vec<CompletedLap> {
        self.laps.read().clone()
    }

    pub fn status(&self, driver: &str) -> Option<CoachStatus> {
        self.statuses.read().get(driver).cloned()
    }

    pub fn has_segments(&self, track: &TrackKey) -> bool {
        self.segments.read().contains_key(track)
    }

    /// How many times segments were written.
    pub fn segment_saves(&self) -> usize {
        self.segment_saves.load(Ordering::SeqCst)
    }

    /// Makes the next `n` lap saves fail.
    pub fn fail_next_saves(&self, n: usize) {
        self.failing_saves.store(n, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn reference_segments(&self, track: &TrackKey) -> Result<Option<SegmentRing>> {
        Ok(self.segments.read().get(track).cloned())
    }

    async fn save_segments(&self, track: &TrackKey, ring: &SegmentRing) -> Result<()> {
        self.segments.write().insert(track.clone(), ring.clone());
        self.segment_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reference_laps(&self, track: &TrackKey) -> Result<Vec<Lap>> {
        Ok(self.reference_laps.read().get(track).cloned().unwrap_or_default())
    }

    async fn track_length(&self, track: &TrackKey) -> Result<Option<u32>> {
        Ok(self.track_lengths.read().get(track).copied())
    }

    async fn grow_track_length(&self, track: &TrackKey, length_m: u32) -> Result<()> {
        let mut map = self.track_lengths.write();
        let entry = map.entry(track.clone()).or_insert(0);
        if length_m > *entry {
            *entry = length_m;
        }
        Ok(())
    }

    async fn coach_settings(&self, driver: &str) -> Result<Option<CoachSettings>> {
        Ok(self.settings.read().get(driver).cloned())
    }

    async fn update_coach_status(&self, driver: &str, status: &str, error: Option<&str>) -> Result<()> {
        self.statuses.write().insert(
            driver.to_string(),
            CoachStatus { status: status.to_string(), error: error.map(str::to_string) },
        );
        Ok(())
    }

    async fn save_lap(&self, lap: &CompletedLap) -> Result<()> {
        let failing = self.failing_saves.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_saves.store(failing - 1, Ordering::SeqCst);
            bail!("store unavailable");
        }
        self.laps.write().push(lap.clone());
        Ok(())
    }
}
