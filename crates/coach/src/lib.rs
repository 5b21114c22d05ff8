//! Live coaching: per-session history over the segment ring and the state
//! machine that turns telemetry ticks into timed responses.

pub mod apps;
pub mod coach;
pub mod feedback;
pub mod history;
pub mod messages;
pub mod timing;

use std::sync::Arc;

use analysis::{LapTimeTable, Segmentation};
use model::{SegmentRing, TrackKey};

pub use apps::{AppKind, CopilotApp, Cue, TickContext};
pub use coach::{Coach, CoachConfig, CoachFilter, CoachState, LapEvent, Tick};
pub use history::History;
pub use messages::{DistanceStrategy, Message, MessageRing};
pub use timing::PlayingMap;

/// Configuration problems that keep a coach from becoming ready. The text is
/// shown to the driver as the coach status.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CoachError {
    #[error("unknown coaching app `{0}`")]
    UnknownApp(String),
    #[error("no reference laps for {0}")]
    NoReference(TrackKey),
    #[error("reference data for {track} is unusable: {reason}")]
    Reference { track: TrackKey, reason: String },
    #[error("driver `{0}` is not registered")]
    UnknownDriver(String),
}

/// Read-only reference data of one (game, car, track), shared by every
/// session driving it.
#[derive(Clone, Debug)]
pub struct SessionReference {
    pub track: TrackKey,
    pub ring: SegmentRing,
    pub table: LapTimeTable,
}

impl SessionReference {
    pub fn new(track: TrackKey, segmentation: Segmentation) -> Arc<Self> {
        Arc::new(Self { track, ring: segmentation.ring, table: segmentation.table })
    }

    pub fn track_length(&self) -> u32 {
        self.ring.track_length()
    }
}
