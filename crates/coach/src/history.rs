//! Per-session position tracking over the segment ring.

use std::collections::VecDeque;

use analysis::{extract_points, DEFAULT_EXTREMA_ORDER};
use model::{Segment, SegmentKind, SegmentRing, TelemetryFrame, TelemetryPoint};
use tracing::trace;

/// Samples of one finished pass through a segment, waiting for extraction.
#[derive(Debug)]
struct Pass {
    segment: usize,
    points: Vec<TelemetryPoint>,
}

/// Tracks which segment the car is in and collects the samples of each pass.
///
/// The ring is a private copy: live features extracted from the driver's own
/// laps are appended to it and never leak into the shared reference.
///
/// A brake pass also carries the last `lead_in_m` meters of the segment
/// before it, so braking that starts ahead of the reference point is still
/// seen, the same window the segmentation engine extracts from.
#[derive(Debug)]
pub struct History {
    ring: SegmentRing,
    head: Option<usize>,
    previous_m: Option<u32>,
    // true while the current pass started somewhere inside the head segment
    partial: bool,
    buffer: Vec<TelemetryPoint>,
    // leading samples of `buffer` that belong to the previous segment
    lead: usize,
    lead_in_m: u32,
    pending: VecDeque<Pass>,
}

impl History {
    pub fn new(ring: SegmentRing) -> Self {
        Self {
            ring,
            head: None,
            previous_m: None,
            partial: true,
            buffer: Vec::new(),
            lead: 0,
            lead_in_m: DEFAULT_EXTREMA_ORDER as u32,
            pending: VecDeque::new(),
        }
    }

    pub fn ring(&self) -> &SegmentRing {
        &self.ring
    }

    pub fn track_length(&self) -> u32 {
        self.ring.track_length()
    }

    pub fn segment(&self, index: usize) -> &Segment {
        self.ring.get(index)
    }

    /// Index of the segment the car currently occupies.
    pub fn head(&self) -> Option<usize> {
        self.head
    }

    pub fn previous_meters(&self) -> Option<u32> {
        self.previous_m
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Feeds one tick. Returns true when a finished pass is waiting for
    /// [`History::process_pending`]. A tick on the same whole meter as the
    /// previous one is ignored.
    pub fn update(&mut self, now_ms: i64, frame: &TelemetryFrame) -> bool {
        let m = frame.meters() % self.ring.track_length();
        if self.previous_m == Some(m) {
            return false;
        }
        self.previous_m = Some(m);

        let mut point = frame.to_point();
        point.t_ms = now_ms as f64;

        let mut head = match self.head {
            Some(h) => h,
            None => match self.ring.find(m) {
                Some(h) => {
                    self.head = Some(h);
                    self.partial = self.ring.get(h).start_m != m;
                    self.buffer.push(point);
                    return self.has_pending();
                }
                None => return self.has_pending(),
            },
        };

        for _ in 0..self.ring.len() {
            if self.ring.get(head).contains(m) {
                self.buffer.push(point);
                break;
            }
            let points = std::mem::take(&mut self.buffer);
            let own = points.len() - self.lead;
            let next = self.ring.next_index(head);
            let upcoming = self.ring.get(next);
            self.buffer = match upcoming.kind {
                SegmentKind::Brake => self.lead_in(&points[self.lead..], upcoming.start_m),
                SegmentKind::Throttle => Vec::new(),
            };
            self.lead = self.buffer.len();
            if !self.partial && own > 0 {
                trace!(segment = head, samples = points.len(), "segment pass finished");
                self.pending.push_back(Pass { segment: head, points });
            }
            self.partial = false;
            head = next;
        }
        self.head = Some(head);
        self.has_pending()
    }

    /// Samples of a finished pass at most `lead_in_m` short of `start_m`.
    fn lead_in(&self, points: &[TelemetryPoint], start_m: u32) -> Vec<TelemetryPoint> {
        let len = self.ring.track_length() as f64;
        let reach = self.lead_in_m as f64;
        let from = points
            .iter()
            .position(|p| (start_m as f64 - p.distance_m).rem_euclid(len) <= reach)
            .unwrap_or(points.len());
        points[from..].to_vec()
    }

    /// Extracts features from every finished pass and appends them to the
    /// segment's live history. Returns how many passes produced features.
    pub fn process_pending(&mut self) -> usize {
        let track_length = self.ring.track_length();
        let back = self.lead_in_m.min(track_length);
        let mut extracted = 0;
        while let Some(pass) = self.pending.pop_front() {
            let segment = self.ring.get_mut(pass.segment);
            let window_m = match segment.kind {
                SegmentKind::Brake => (segment.start_m + track_length - back) % track_length,
                SegmentKind::Throttle => segment.start_m,
            };
            if let Some(features) = extract_points(&pass.points, segment.kind, window_m, track_length) {
                segment.push_live(features);
                extracted += 1;
            }
        }
        extracted
    }

    /// Forgets the car's position and any unfinished pass. Live features of
    /// completed passes are kept.
    pub fn reset(&mut self) {
        self.head = None;
        self.previous_m = None;
        self.partial = true;
        self.buffer.clear();
        self.lead = 0;
        self.pending.clear();
    }
}
