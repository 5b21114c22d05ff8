//! Offline analysis of reference laps: resampling, corner detection and the
//! segment model the live coach runs against.

pub mod bins;
pub mod extrema;
pub mod features;
pub mod kmeans;
pub mod laptime;
pub mod resample;
pub mod segmentation;

pub use features::{aggregate, extract, extract_points};
pub use laptime::LapTimeTable;
pub use resample::{resample, Channel, Resampled};
pub use segmentation::{Segmentation, SegmentationConfig, SegmentationEngine, DEFAULT_EXTREMA_ORDER};

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("none of the {0} reference laps is long enough to segment")]
    NoUsableLaps(usize),
}
