//! Comparison of the latest pass through a segment with the driver's usual.

use model::SegmentFeatures;

/// Samples further than this many standard deviations from the mean are
/// ignored when computing the driver's usual value.
pub const OUTLIER_Z: f64 = 1.0;
/// Brake or lift point differences below this are not worth mentioning.
pub const POINT_TOLERANCE_M: f64 = 10.0;
/// Pedal force differences below this are not worth mentioning.
pub const FORCE_TOLERANCE: f64 = 0.1;

/// Mean of `values` after dropping samples more than `z` standard deviations
/// from the plain mean.
pub fn trimmed_mean(values: &[f64], z: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let sd = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if sd == 0.0 {
        return Some(mean);
    }
    let kept: Vec<f64> = values.iter().copied().filter(|v| (v - mean).abs() <= z * sd).collect();
    if kept.is_empty() {
        return Some(mean);
    }
    Some(kept.iter().sum::<f64>() / kept.len() as f64)
}

/// Signed forward distance from `from` to `to`, folded into half a lap.
pub fn signed_delta(from: f64, to: f64, track_length: u32) -> f64 {
    let len = track_length as f64;
    let mut d = (to - from) % len;
    if d > len / 2.0 {
        d -= len;
    } else if d < -len / 2.0 {
        d += len;
    }
    d
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timing {
    Earlier,
    Later,
    OnPoint,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pressure {
    Harder,
    Softer,
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Feedback {
    pub timing: Timing,
    pub pressure: Pressure,
}

impl Feedback {
    /// Compares the most recent live sample with the trimmed mean of the
    /// earlier ones. `None` until there are at least two samples.
    pub fn from_history<'a>(live: impl ExactSizeIterator<Item = &'a SegmentFeatures>, track_length: u32) -> Option<Self> {
        let samples: Vec<&SegmentFeatures> = live.collect();
        let (latest, prior) = samples.split_last()?;
        if prior.is_empty() {
            return None;
        }
        let reference = prior[0].force_start_m;
        let points: Vec<f64> = prior
            .iter()
            .map(|s| reference + signed_delta(reference, s.force_start_m, track_length))
            .collect();
        let usual_point = trimmed_mean(&points, OUTLIER_Z)?;
        let forces: Vec<f64> = prior.iter().map(|s| s.force).collect();
        let usual_force = trimmed_mean(&forces, OUTLIER_Z)?;

        // positive: the latest pass started later than usual
        let late_by = signed_delta(usual_point, latest.force_start_m, track_length);
        let timing = if late_by > POINT_TOLERANCE_M {
            Timing::Earlier
        } else if late_by < -POINT_TOLERANCE_M {
            Timing::Later
        } else {
            Timing::OnPoint
        };
        let pressure = if latest.force < usual_force - FORCE_TOLERANCE {
            Pressure::Harder
        } else if latest.force > usual_force + FORCE_TOLERANCE {
            Pressure::Softer
        } else {
            Pressure::Right
        };
        Some(Self { timing, pressure })
    }
}

/// Pedal force as spoken percentage.
pub fn percent(force: f64) -> u32 {
    (force.clamp(0.0, 1.0) * 100.0 / 5.0).round() as u32 * 5
}
