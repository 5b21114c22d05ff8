//! Messages bound to segments, ordered by the meter they are evaluated at.

use analysis::LapTimeTable;
use model::{Segment, SegmentKind, SegmentRing};
use serde::{Deserialize, Serialize};

use crate::timing::speech_duration;

/// Seconds of slack between evaluating a message and the latest moment its
/// speech could start.
pub const EVALUATION_LEAD_S: f64 = 1.0;

/// How a message's target meter is derived from its segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceStrategy {
    SegmentStart,
    BrakePoint,
    ThrottlePoint,
    ApexPoint,
    FallbackBrakeOrThrottle,
}

impl DistanceStrategy {
    /// Target meter for `segment`, or `None` when the segment has no such
    /// point (e.g. a brake point on a throttle segment).
    pub fn resolve(self, segment: &Segment) -> Option<f64> {
        match self {
            DistanceStrategy::SegmentStart => Some(segment.start_m as f64),
            DistanceStrategy::BrakePoint => segment.brake_point(),
            DistanceStrategy::ThrottlePoint => segment.throttle_point(),
            DistanceStrategy::ApexPoint => Some(segment.features.apex_m),
            DistanceStrategy::FallbackBrakeOrThrottle => Some(
                segment
                    .brake_point()
                    .or_else(|| segment.throttle_point())
                    .unwrap_or(segment.start_m as f64),
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub segment: usize,
    /// Meter the speech should end at.
    pub finish_m: f64,
    /// Meter the message is evaluated at.
    pub at_m: u32,
    pub priority: u8,
}

/// Messages sorted by `at_m`. Neighbours wrap around the lap.
#[derive(Clone, Debug, Default)]
pub struct MessageRing {
    messages: Vec<Message>,
}

impl MessageRing {
    pub fn new(mut messages: Vec<Message>) -> Self {
        messages.sort_by_key(|m| m.at_m);
        Self { messages }
    }

    /// One message per segment of `kinds` that resolves a target meter.
    ///
    /// A brake point message is evaluated at the segment's announcement
    /// meter when the segmentation produced one. Otherwise it is evaluated
    /// early enough to speak `template` with [`EVALUATION_LEAD_S`] to spare.
    pub fn build(
        ring: &SegmentRing,
        table: &LapTimeTable,
        kinds: &[SegmentKind],
        strategy: DistanceStrategy,
        priority: u8,
        template: &str,
    ) -> Self {
        let track_length = ring.track_length();
        let lead = speech_duration(template) + EVALUATION_LEAD_S;
        let messages = ring
            .segments()
            .iter()
            .filter(|s| kinds.contains(&s.kind))
            .filter_map(|s| {
                let finish_m = strategy.resolve(s)?.rem_euclid(track_length as f64);
                let at = match (strategy, s.announce_m) {
                    (DistanceStrategy::BrakePoint, Some(announce)) => announce.rem_euclid(track_length as f64),
                    _ => table.distance_before(finish_m, lead),
                };
                let at_m = (at.round() as u32) % track_length;
                Some(Message { segment: s.index, finish_m, at_m, priority })
            })
            .collect();
        Self::new(messages)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Messages evaluated at meter `m`.
    pub fn at(&self, m: u32) -> &[Message] {
        let lo = self.messages.partition_point(|x| x.at_m < m);
        let hi = self.messages.partition_point(|x| x.at_m <= m);
        &self.messages[lo..hi]
    }
}
