//! Per-window feature extraction shared by segmentation and live history.

use model::{SegmentFeatures, SegmentKind, TelemetryPoint};

use crate::bins::top_bin;
use crate::resample::{resample, Resampled};

/// Fraction of the peak brake force that still counts as braking.
pub const FORCE_ON_FRACTION: f64 = 0.1;
/// Brake values at or below this are treated as released.
pub const BRAKE_FLOOR: f64 = 0.05;
/// Throttle at or above this is treated as flat out.
pub const FULL_THROTTLE: f64 = 0.98;

/// Extracts features from indices `lo..hi` of `trace`. Distances are
/// reported modulo `track_length`.
pub fn extract(trace: &Resampled, kind: SegmentKind, lo: usize, hi: usize, track_length: u32) -> Option<SegmentFeatures> {
    let hi = hi.min(trace.len());
    if lo >= hi || track_length == 0 {
        return None;
    }
    let meters = |i: usize| ((trace.start_m as usize + i) % track_length as usize) as f64;

    let apex = (lo..hi).min_by(|a, b| {
        trace.speed[*a].partial_cmp(&trace.speed[*b]).unwrap_or(std::cmp::Ordering::Equal)
    })?;
    let gear = trace.gear[lo..hi].iter().copied().filter(|g| *g > 0).min();

    match kind {
        SegmentKind::Brake => {
            let peak = (lo..hi).max_by(|a, b| {
                trace.brake[*a].partial_cmp(&trace.brake[*b]).unwrap_or(std::cmp::Ordering::Equal)
            })?;
            let peak_force = trace.brake[peak];
            if peak_force <= BRAKE_FLOOR {
                return None;
            }
            let threshold = peak_force * FORCE_ON_FRACTION;
            let mut start = peak;
            while start > lo && trace.brake[start - 1] >= threshold {
                start -= 1;
            }
            let mut end = peak;
            while end + 1 < hi && trace.brake[end + 1] >= threshold {
                end += 1;
            }
            let force = top_bin(&trace.brake[start..=end], BRAKE_FLOOR).unwrap_or(peak_force);
            let apex = (start..hi)
                .min_by(|a, b| trace.speed[*a].partial_cmp(&trace.speed[*b]).unwrap_or(std::cmp::Ordering::Equal))
                .unwrap_or(apex);
            Some(SegmentFeatures {
                force,
                force_start_m: meters(start),
                force_end_m: meters(end),
                gear,
                apex_m: meters(apex),
            })
        }
        SegmentKind::Throttle => {
            let lowest = (lo..hi).min_by(|a, b| {
                trace.throttle[*a].partial_cmp(&trace.throttle[*b]).unwrap_or(std::cmp::Ordering::Equal)
            })?;
            if trace.throttle[lowest] >= FULL_THROTTLE {
                return Some(SegmentFeatures {
                    force: 1.0,
                    force_start_m: meters(apex),
                    force_end_m: meters(apex),
                    gear,
                    apex_m: meters(apex),
                });
            }
            let mut start = lowest;
            while start > lo && trace.throttle[start - 1] < FULL_THROTTLE {
                start -= 1;
            }
            let mut end = lowest;
            while end + 1 < hi && trace.throttle[end + 1] < FULL_THROTTLE {
                end += 1;
            }
            let force = top_bin(&trace.throttle[start..=end], -1.0).unwrap_or(trace.throttle[lowest]);
            Some(SegmentFeatures {
                force,
                force_start_m: meters(start),
                force_end_m: meters(end),
                gear,
                apex_m: meters(apex),
            })
        }
    }
}

/// Extracts features from the raw samples of one pass through a segment.
///
/// `points` may cross the start/finish line; distances below `start_m` are
/// shifted up by one lap before resampling.
pub fn extract_points(points: &[TelemetryPoint], kind: SegmentKind, start_m: u32, track_length: u32) -> Option<SegmentFeatures> {
    let unwrapped: Vec<TelemetryPoint> = points
        .iter()
        .map(|p| {
            let mut p = p.clone();
            if p.distance_m < start_m as f64 {
                p.distance_m += track_length as f64;
            }
            p
        })
        .collect();
    let trace = resample(&unwrapped)?;
    extract(&trace, kind, 0, trace.len(), track_length)
}

/// Consensus over several laps: median distances (unwrapped around the first
/// sample), mean force and the lowest gear.
pub fn aggregate(samples: &[SegmentFeatures], track_length: u32) -> Option<SegmentFeatures> {
    let first = samples.first()?;
    Some(SegmentFeatures {
        force: samples.iter().map(|s| s.force).sum::<f64>() / samples.len() as f64,
        force_start_m: median_m(samples, first.force_start_m, track_length, |s| s.force_start_m),
        force_end_m: median_m(samples, first.force_end_m, track_length, |s| s.force_end_m),
        gear: samples.iter().filter_map(|s| s.gear).min(),
        apex_m: median_m(samples, first.apex_m, track_length, |s| s.apex_m),
    })
}

/// Median of a distance, unwrapped around `reference` before sorting.
fn median_m(samples: &[SegmentFeatures], reference: f64, track_length: u32, get: impl Fn(&SegmentFeatures) -> f64) -> f64 {
    let len = track_length as f64;
    let mut v: Vec<f64> = samples
        .iter()
        .map(|s| {
            let d = get(s);
            if d - reference > len / 2.0 {
                d - len
            } else if reference - d > len / 2.0 {
                d + len
            } else {
                d
            }
        })
        .collect();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let m = if v.len() % 2 == 1 { v[v.len() / 2] } else { (v[v.len() / 2 - 1] + v[v.len() / 2]) / 2.0 };
    m.rem_euclid(len)
}
