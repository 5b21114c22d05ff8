use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Laps of live features kept per segment.
pub const LIVE_HISTORY: usize = 10;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Brake,
    Throttle,
}

impl std::fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentKind::Brake => write!(f, "brake"),
            SegmentKind::Throttle => write!(f, "throttle"),
        }
    }
}

/// Driving features of one pass through a segment.
///
/// `force_start_m`/`force_end_m` bound the window where the dominant pedal is
/// applied (for throttle segments: where the driver lifts). All distances are
/// lap meters, already reduced modulo track length.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct SegmentFeatures {
    pub force: f64,
    pub force_start_m: f64,
    pub force_end_m: f64,
    #[serde(default)]
    pub gear: Option<i8>,
    pub apex_m: f64,
}

/// One zone of the track.
///
/// Covers `[start_m, end_m]` inclusive; when `end_m < start_m` the segment
/// wraps through the start/finish line.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Segment {
    pub index: usize,
    pub start_m: u32,
    pub end_m: u32,
    pub kind: SegmentKind,
    pub features: SegmentFeatures,
    #[serde(default)]
    pub announce_m: Option<f64>,
    #[serde(skip)]
    live: VecDeque<SegmentFeatures>,
}

impl Segment {
    pub fn new(index: usize, start_m: u32, end_m: u32, kind: SegmentKind, features: SegmentFeatures) -> Self {
        Self { index, start_m, end_m, kind, features, announce_m: None, live: VecDeque::new() }
    }

    pub fn contains(&self, m: u32) -> bool {
        if self.start_m < self.end_m {
            self.start_m <= m && m <= self.end_m
        } else {
            m >= self.start_m || m <= self.end_m
        }
    }

    pub fn length(&self, track_length: u32) -> u32 {
        if self.end_m >= self.start_m {
            self.end_m - self.start_m + 1
        } else {
            track_length - self.start_m + self.end_m + 1
        }
    }

    /// Where the driver should start braking, for braking zones.
    pub fn brake_point(&self) -> Option<f64> {
        match self.kind {
            SegmentKind::Brake => Some(self.features.force_start_m),
            SegmentKind::Throttle => None,
        }
    }

    /// Where the driver should lift, for throttle zones.
    pub fn throttle_point(&self) -> Option<f64> {
        match self.kind {
            SegmentKind::Throttle => Some(self.features.force_start_m),
            SegmentKind::Brake => None,
        }
    }

    pub fn push_live(&mut self, features: SegmentFeatures) {
        if self.live.len() >= LIVE_HISTORY {
            self.live.pop_front();
        }
        self.live.push_back(features);
    }

    pub fn live(&self) -> impl ExactSizeIterator<Item = &SegmentFeatures> + '_ {
        self.live.iter()
    }

    pub fn last_live(&self) -> Option<&SegmentFeatures> {
        self.live.back()
    }

    pub fn clear_live(&mut self) {
        self.live.clear();
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RingError {
    #[error("segment ring is empty")]
    Empty,
    #[error("track length must be positive")]
    ZeroLength,
    #[error("segment {index} bound {meters} outside track length {track_length}")]
    OutOfTrack { index: usize, meters: u32, track_length: u32 },
    #[error("segment {index} ends at {end} but next starts at {next_start}")]
    Gap { index: usize, end: u32, next_start: u32 },
}

/// Segments in lap order forming a cycle around the track.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct SegmentRing {
    segments: Vec<Segment>,
    track_length: u32,
}

impl SegmentRing {
    /// Builds a ring, checking that the segments partition the track.
    pub fn new(mut segments: Vec<Segment>, track_length: u32) -> Result<Self, RingError> {
        if track_length == 0 {
            return Err(RingError::ZeroLength);
        }
        if segments.is_empty() {
            return Err(RingError::Empty);
        }
        for (i, s) in segments.iter_mut().enumerate() {
            s.index = i;
            for meters in [s.start_m, s.end_m] {
                if meters >= track_length {
                    return Err(RingError::OutOfTrack { index: i, meters, track_length });
                }
            }
        }
        let n = segments.len();
        for i in 0..n {
            let end = segments[i].end_m;
            let next_start = segments[(i + 1) % n].start_m;
            if (end + 1) % track_length != next_start {
                return Err(RingError::Gap { index: i, end, next_start });
            }
        }
        let ring = Self { segments, track_length };
        let covered: u64 = ring.segments.iter().map(|s| s.length(track_length) as u64).sum();
        if covered != track_length as u64 {
            // contiguous but wraps more than once
            return Err(RingError::Gap {
                index: n - 1,
                end: ring.segments[n - 1].end_m,
                next_start: ring.segments[0].start_m,
            });
        }
        Ok(ring)
    }

    /// A single throttle segment covering the whole lap.
    pub fn whole_track(track_length: u32) -> Self {
        let track_length = track_length.max(1);
        let features = SegmentFeatures {
            force: 1.0,
            force_start_m: 0.0,
            force_end_m: (track_length - 1) as f64,
            gear: None,
            apex_m: 0.0,
        };
        Self {
            segments: vec![Segment::new(0, 0, track_length - 1, SegmentKind::Throttle, features)],
            track_length,
        }
    }

    pub fn track_length(&self) -> u32 {
        self.track_length
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, index: usize) -> &Segment {
        &self.segments[index % self.segments.len()]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Segment {
        let n = self.segments.len();
        &mut self.segments[index % n]
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn next_index(&self, index: usize) -> usize {
        (index + 1) % self.segments.len()
    }

    pub fn prev_index(&self, index: usize) -> usize {
        (index + self.segments.len() - 1) % self.segments.len()
    }

    /// Index of the segment containing `m`.
    pub fn find(&self, m: u32) -> Option<usize> {
        let m = m % self.track_length;
        self.segments.iter().position(|s| s.contains(m))
    }

    /// Sum of segment lengths; equals the track length for a valid ring.
    pub fn covered_length(&self) -> u64 {
        self.segments.iter().map(|s| s.length(self.track_length) as u64).sum()
    }
}
