//! Builds the canonical segment ring of a track from reference laps.
//!
//! Each lap is resampled to a 1 m grid and repeated three times end to end so
//! that corners crossing the start/finish line stay contiguous. Speed minima
//! and brake maxima are detected per lap, clustered across laps with k-means,
//! and the centroids of the middle copy become the consensus corners.

use model::{Lap, Segment, SegmentFeatures, SegmentKind, SegmentRing};
use tracing::{debug, info, warn};

use crate::extrema::{local_maxima, local_minima};
use crate::features::{aggregate, extract, FORCE_ON_FRACTION};
use crate::kmeans::kmeans;
use crate::laptime::LapTimeTable;
use crate::resample::{resample, Channel, Resampled};
use crate::AnalysisError;

/// Copies of each lap laid end to end before clustering.
const COPIES: usize = 3;

/// Default half-width of the extrema window. Brake windows also reach this
/// far back before their segment start.
pub const DEFAULT_EXTREMA_ORDER: usize = 50;

#[derive(Clone, Debug)]
pub struct SegmentationConfig {
    /// Laps with fewer resampled meters are discarded.
    pub min_samples: usize,
    /// Half-width of the extrema comparison window (meters).
    pub extrema_order: usize,
    /// Minimum drop into a speed minimum to count as a corner (m/s).
    pub min_speed_drop_ms: f64,
    /// Brake peaks at or below this are ignored.
    pub brake_floor: f64,
    /// Seconds before the brake point the countdown starts.
    pub announce_lead_s: f64,
    /// Meters after the brake release searched for the apex.
    pub apex_search_m: u32,
    /// Scale of the normalized channel value against distance in clustering.
    pub value_weight: f64,
    pub kmeans_iterations: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            min_samples: 100,
            extrema_order: DEFAULT_EXTREMA_ORDER,
            min_speed_drop_ms: 2.0,
            brake_floor: 0.1,
            announce_lead_s: 5.3,
            apex_search_m: 300,
            value_weight: 50.0,
            kmeans_iterations: 100,
        }
    }
}

/// Output of one segmentation run.
#[derive(Clone, Debug)]
pub struct Segmentation {
    pub ring: SegmentRing,
    pub table: LapTimeTable,
}

#[derive(Clone, Copy, Debug)]
struct Zone {
    kind: SegmentKind,
    key_m: u32,
    start_m: Option<u32>,
}

pub struct SegmentationEngine {
    config: SegmentationConfig,
}

impl Default for SegmentationEngine {
    fn default() -> Self {
        Self::new(SegmentationConfig::default())
    }
}

fn fwd(a: u32, b: u32, track_length: u32) -> u32 {
    (b + track_length - a) % track_length
}

impl SegmentationEngine {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    /// Segments the track. `track_length` overrides the length inferred from
    /// the laps when known.
    pub fn build(&self, laps: &[Lap], track_length: Option<u32>) -> Result<Segmentation, AnalysisError> {
        let traces: Vec<Resampled> = laps
            .iter()
            .filter_map(|l| {
                let r = resample(&l.points);
                if r.as_ref().map(|r| r.len()).unwrap_or(0) < self.config.min_samples {
                    debug!(lap = %l.id, "discarding short reference lap");
                    return None;
                }
                r
            })
            .collect();
        if traces.is_empty() {
            return Err(AnalysisError::NoUsableLaps(laps.len()));
        }

        let track_length = track_length
            .filter(|l| *l > 0)
            .or_else(|| traces.iter().map(|t| t.end_m()).max())
            .ok_or(AnalysisError::NoUsableLaps(laps.len()))?;

        let full: Vec<Resampled> = traces.iter().map(|t| t.to_track(track_length)).collect();
        let table = LapTimeTable::from_trace(fastest(&traces), track_length);
        let consensus = consensus(&full);

        let brake_centers = self.cluster_extrema(&full, Channel::Brake, track_length);
        let speed_centers = self.cluster_extrema(&full, Channel::Speed, track_length);
        debug!(brake = brake_centers.len(), speed = speed_centers.len(), "consensus extrema");

        let zones = self.zones(&consensus, &brake_centers, &speed_centers, track_length);
        if zones.is_empty() {
            warn!(track_length, "no corners found, using a single whole-track segment");
            return Ok(Segmentation { ring: SegmentRing::whole_track(track_length), table });
        }

        let segments = self.segments(&full, &consensus, &zones, &table, track_length);
        let ring = match SegmentRing::new(segments, track_length) {
            Ok(ring) => ring,
            Err(e) => {
                warn!(error = %e, "segment boundaries invalid, using a single whole-track segment");
                SegmentRing::whole_track(track_length)
            }
        };
        info!(segments = ring.len(), track_length, laps = traces.len(), "track segmented");
        Ok(Segmentation { ring, table })
    }

    /// Consensus positions (lap meters) of one channel's extrema.
    fn cluster_extrema(&self, full: &[Resampled], channel: Channel, track_length: u32) -> Vec<f64> {
        let order = self.config.extrema_order;
        let len = track_length as usize;
        let mut counts = Vec::with_capacity(full.len());
        let mut points = Vec::new();

        for lap in full {
            let series = lap.repeated(COPIES).channel(channel);
            let idx = match channel {
                Channel::Brake => local_maxima(&series, order, self.config.brake_floor),
                _ => local_minima(&series, order, self.config.min_speed_drop_ms),
            };
            counts.push(idx.iter().filter(|i| (len..2 * len).contains(*i)).count());
            let scale = series.iter().cloned().fold(0.0_f64, f64::max).max(1e-9);
            for i in idx {
                points.push([series[i] / scale * self.config.value_weight, i as f64]);
            }
        }

        counts.sort_unstable();
        let k = counts.get(counts.len() / 2).copied().unwrap_or(0);
        if k == 0 {
            return Vec::new();
        }

        let clusters = match kmeans(&points, k * COPIES, self.config.kmeans_iterations) {
            Some(c) => c,
            None => return Vec::new(),
        };
        let sizes = clusters.sizes();
        let mut centers: Vec<f64> = clusters
            .centroids
            .iter()
            .zip(sizes)
            .filter(|(_, n)| *n > 0)
            .map(|(c, _)| c[1])
            .filter(|d| *d >= len as f64 && *d < (2 * len) as f64)
            .map(|d| d - len as f64)
            .collect();
        centers.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        // merge centroids closer than the extrema window
        let mut merged: Vec<Vec<f64>> = Vec::new();
        for c in centers {
            match merged.last_mut() {
                Some(group) if c - group[group.len() - 1] <= order as f64 => group.push(c),
                _ => merged.push(vec![c]),
            }
        }
        merged.into_iter().map(|g| g.iter().sum::<f64>() / g.len() as f64).collect()
    }

    fn zones(&self, consensus: &Resampled, brake_centers: &[f64], speed_centers: &[f64], track_length: u32) -> Vec<Zone> {
        let order = self.config.extrema_order as u32;
        let at = |m: u32| (m % track_length) as usize;
        let mut zones = Vec::new();
        let mut reaches: Vec<(u32, u32)> = Vec::new();

        for c in brake_centers {
            let c = (c.round() as u32) % track_length;
            let from = c + track_length - order.min(track_length);
            let peak = (from..=from + 2 * order)
                .max_by(|a, b| {
                    consensus.brake[at(*a)]
                        .partial_cmp(&consensus.brake[at(*b)])
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|m| m % track_length)
                .unwrap_or(c);
            let peak_force = consensus.brake[at(peak)];
            if peak_force <= self.config.brake_floor {
                continue;
            }
            let threshold = peak_force * FORCE_ON_FRACTION;
            let half = track_length / 2;

            let mut start = peak;
            for _ in 0..half {
                let prev = (start + track_length - 1) % track_length;
                if consensus.brake[at(prev)] < threshold {
                    break;
                }
                start = prev;
            }
            let mut end = peak;
            for _ in 0..half {
                let next = (end + 1) % track_length;
                if consensus.brake[at(next)] < threshold {
                    break;
                }
                end = next;
            }
            let apex = (0..=self.config.apex_search_m + fwd(start, end, track_length))
                .map(|o| (start + o) % track_length)
                .min_by(|a, b| {
                    consensus.speed[at(*a)]
                        .partial_cmp(&consensus.speed[at(*b)])
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(end);

            if zones.iter().any(|z: &Zone| z.start_m == Some(start)) {
                continue;
            }
            reaches.push((start, (apex + order) % track_length));
            zones.push(Zone { kind: SegmentKind::Brake, key_m: peak, start_m: Some(start) });
        }

        for s in speed_centers {
            let s = (s.round() as u32) % track_length;
            let covered = reaches
                .iter()
                .any(|(start, reach)| fwd(*start, s, track_length) <= fwd(*start, *reach, track_length));
            if !covered {
                zones.push(Zone { kind: SegmentKind::Throttle, key_m: s, start_m: None });
            }
        }

        zones.sort_by_key(|z| z.key_m);
        let n = zones.len();
        let keys: Vec<u32> = zones.iter().map(|z| z.key_m).collect();
        for (i, z) in zones.iter_mut().enumerate() {
            if z.start_m.is_none() {
                let prev = keys[(i + n - 1) % n];
                let gap = if n == 1 { track_length } else { fwd(prev, z.key_m, track_length) };
                z.start_m = Some((prev + gap / 2) % track_length);
            }
        }
        zones.sort_by_key(|z| z.start_m);
        zones.dedup_by_key(|z| z.start_m);
        zones
    }

    fn segments(
        &self,
        full: &[Resampled],
        consensus: &Resampled,
        zones: &[Zone],
        table: &LapTimeTable,
        track_length: u32,
    ) -> Vec<Segment> {
        let n = zones.len();
        let len = track_length as usize;
        let tripled: Vec<Resampled> = full.iter().map(|f| f.repeated(COPIES)).collect();
        let consensus = consensus.repeated(COPIES);

        let mut segments = Vec::with_capacity(n);
        for i in 0..n {
            let start = zones[i].start_m.unwrap_or(0);
            let next = zones[(i + 1) % n].start_m.unwrap_or(0);
            let end = (next + track_length - 1) % track_length;
            let kind = zones[i].kind;
            let seg_len = if n == 1 { len } else { fwd(start, next, track_length) as usize };

            let margin = match kind {
                SegmentKind::Brake => self.config.extrema_order,
                SegmentKind::Throttle => 0,
            };
            let lo = len + start as usize - margin;
            let hi = lo + seg_len;

            let samples: Vec<SegmentFeatures> = tripled
                .iter()
                .filter_map(|t| extract(t, kind, lo, hi, track_length))
                .collect();
            let features = aggregate(&samples, track_length)
                .or_else(|| extract(&consensus, kind, lo, hi, track_length))
                .unwrap_or_else(|| SegmentFeatures {
                    force: 0.0,
                    force_start_m: start as f64,
                    force_end_m: end as f64,
                    gear: None,
                    apex_m: start as f64,
                });

            let mut segment = Segment::new(i, start, end, kind, features);
            if kind == SegmentKind::Brake {
                segment.announce_m = Some(table.distance_before(segment.features.force_start_m, self.config.announce_lead_s));
            }
            segments.push(segment);
        }
        segments
    }
}

/// The reference lap with the shortest time per meter.
fn fastest(traces: &[Resampled]) -> &Resampled {
    let pace = |t: &Resampled| {
        let span = t.time_ms.last().copied().unwrap_or(0.0) - t.time_ms.first().copied().unwrap_or(0.0);
        span / t.len().max(1) as f64
    };
    traces
        .iter()
        .min_by(|a, b| pace(a).partial_cmp(&pace(b)).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or(&traces[0])
}

fn mean_of(full: &[Resampled], len: usize, get: impl Fn(&Resampled, usize) -> f64) -> Vec<f64> {
    let n = full.len().max(1) as f64;
    (0..len).map(|i| full.iter().map(|f| get(f, i)).sum::<f64>() / n).collect()
}

/// Mean of speed and pedals across full-track traces; lowest gear.
fn consensus(full: &[Resampled]) -> Resampled {
    let len = full.iter().map(|f| f.len()).min().unwrap_or(0);
    Resampled {
        start_m: 0,
        time_ms: mean_of(full, len, |f, i| f.time_ms[i]),
        speed: mean_of(full, len, |f, i| f.speed[i]),
        throttle: mean_of(full, len, |f, i| f.throttle[i]),
        brake: mean_of(full, len, |f, i| f.brake[i]),
        gear: (0..len).map(|i| full.iter().map(|f| f.gear[i]).min().unwrap_or(0)).collect(),
    }
}
