//! Copilot applications: what gets said, and about which segments.

use std::str::FromStr;

use analysis::LapTimeTable;
use model::{SegmentKind, SegmentRing, TelemetryFrame};

use crate::feedback::{percent, Feedback, Pressure, Timing};
use crate::messages::{DistanceStrategy, MessageRing};
use crate::CoachError;

/// Something an application wants said.
#[derive(Clone, Debug, PartialEq)]
pub struct Cue {
    pub text: String,
    pub priority: u8,
    /// Meter the speech should end at; `None` plays immediately.
    pub finish_m: Option<f64>,
}

impl Cue {
    pub fn instant(text: impl Into<String>, priority: u8) -> Self {
        Self { text: text.into(), priority, finish_m: None }
    }

    pub fn finishing_at(text: impl Into<String>, priority: u8, finish_m: f64) -> Self {
        Self { text: text.into(), priority, finish_m: Some(finish_m) }
    }
}

/// What an application sees on each tick.
pub struct TickContext<'a> {
    pub ring: &'a SegmentRing,
    pub table: &'a LapTimeTable,
    pub frame: &'a TelemetryFrame,
    pub lap: u32,
}

pub trait CopilotApp: Send {
    fn tag(&self) -> &'static str;

    /// Binds the application to a track. Called once per reference load.
    fn initialize(&mut self, ring: &SegmentRing, table: &LapTimeTable);

    /// Called for every meter the car covers, once per lap.
    fn on_tick(&mut self, ctx: &TickContext<'_>, meter: u32, cues: &mut Vec<Cue>);

    fn on_new_lap(&mut self, _ctx: &TickContext<'_>, _cues: &mut Vec<Cue>) {}

    fn on_reset_to_pits(&mut self, _ctx: &TickContext<'_>, _cues: &mut Vec<Cue>) {}

    fn on_crash(&mut self, _ctx: &TickContext<'_>, _cues: &mut Vec<Cue>) {}
}

/// Tag stored with the driver's coach settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppKind {
    Brake,
    TrackGuide,
    Debug,
}

impl FromStr for AppKind {
    type Err = CoachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "brake" | "brake_coach" | "brakecoach" => Ok(AppKind::Brake),
            "trackguide" | "track_guide" => Ok(AppKind::TrackGuide),
            "debug" => Ok(AppKind::Debug),
            _ => Err(CoachError::UnknownApp(s.to_string())),
        }
    }
}

impl AppKind {
    pub fn build(self) -> Box<dyn CopilotApp> {
        match self {
            AppKind::Brake => Box::new(BrakeCoach::default()),
            AppKind::TrackGuide => Box::new(TrackGuide::default()),
            AppKind::Debug => Box::new(DebugCoach::default()),
        }
    }
}

fn gear_word(gear: Option<i8>) -> Option<String> {
    match gear {
        Some(g) if g > 0 => Some(format!("gear {}", g)),
        _ => None,
    }
}

fn timing_word(timing: Timing, verb: &str) -> Option<String> {
    match timing {
        Timing::Earlier => Some(format!("{} a bit earlier", verb)),
        Timing::Later => Some(format!("{} a bit later", verb)),
        Timing::OnPoint => None,
    }
}

/// Countdown to every braking point.
#[derive(Default)]
pub struct BrakeCoach {
    messages: MessageRing,
}

impl BrakeCoach {
    pub const PRIORITY: u8 = 8;
    const TEMPLATE: &'static str = "brake a bit earlier and a bit harder, gear 3, brake";

    fn text(ring: &SegmentRing, segment: usize) -> String {
        let s = ring.get(segment);
        let mut parts = Vec::new();
        match Feedback::from_history(s.live(), ring.track_length()) {
            Some(f) => {
                parts.extend(timing_word(f.timing, "brake"));
                match f.pressure {
                    Pressure::Harder => parts.push("a bit harder".to_string()),
                    Pressure::Softer => parts.push("a bit softer".to_string()),
                    Pressure::Right => {}
                }
            }
            None => {
                parts.push(format!("{} percent", percent(s.features.force)));
                parts.extend(gear_word(s.features.gear));
            }
        }
        parts.push("brake".to_string());
        parts.join(", ")
    }
}

impl CopilotApp for BrakeCoach {
    fn tag(&self) -> &'static str {
        "brake"
    }

    fn initialize(&mut self, ring: &SegmentRing, table: &LapTimeTable) {
        self.messages = MessageRing::build(ring, table, &[SegmentKind::Brake], DistanceStrategy::BrakePoint, Self::PRIORITY, Self::TEMPLATE);
    }

    fn on_tick(&mut self, ctx: &TickContext<'_>, meter: u32, cues: &mut Vec<Cue>) {
        for m in self.messages.at(meter) {
            cues.push(Cue::finishing_at(Self::text(ctx.ring, m.segment), m.priority, m.finish_m));
        }
    }
}

/// Gear and pedal guidance for every segment.
#[derive(Default)]
pub struct TrackGuide {
    messages: MessageRing,
}

impl TrackGuide {
    pub const PRIORITY: u8 = 6;
    const TEMPLATE: &'static str = "gear 3, lift a bit earlier, a bit harder, brake";

    fn text(ring: &SegmentRing, segment: usize) -> Option<String> {
        let s = ring.get(segment);
        let flat = s.kind == SegmentKind::Throttle && s.features.force >= analysis::features::FULL_THROTTLE;
        let mut parts: Vec<String> = gear_word(s.features.gear).into_iter().collect();
        let feedback = Feedback::from_history(s.live(), ring.track_length());
        match s.kind {
            SegmentKind::Brake => {
                if let Some(f) = feedback {
                    parts.extend(timing_word(f.timing, "brake"));
                    match f.pressure {
                        Pressure::Harder => parts.push("a bit harder".to_string()),
                        Pressure::Softer => parts.push("a bit softer".to_string()),
                        Pressure::Right => {}
                    }
                    parts.push("brake".to_string());
                } else {
                    parts.push(format!("brake {} percent", percent(s.features.force)));
                }
            }
            SegmentKind::Throttle if flat => parts.push("flat out".to_string()),
            SegmentKind::Throttle => {
                if let Some(f) = feedback {
                    parts.extend(timing_word(f.timing, "lift"));
                    match f.pressure {
                        // less throttle is more lift
                        Pressure::Harder => parts.push("a bit more throttle".to_string()),
                        Pressure::Softer => parts.push("a bit less throttle".to_string()),
                        Pressure::Right => {}
                    }
                    parts.push("lift".to_string());
                } else {
                    parts.push(format!("lift to {} percent", percent(s.features.force)));
                }
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

impl CopilotApp for TrackGuide {
    fn tag(&self) -> &'static str {
        "trackguide"
    }

    fn initialize(&mut self, ring: &SegmentRing, table: &LapTimeTable) {
        self.messages = MessageRing::build(
            ring,
            table,
            &[SegmentKind::Brake, SegmentKind::Throttle],
            DistanceStrategy::FallbackBrakeOrThrottle,
            Self::PRIORITY,
            Self::TEMPLATE,
        );
    }

    fn on_tick(&mut self, ctx: &TickContext<'_>, meter: u32, cues: &mut Vec<Cue>) {
        for m in self.messages.at(meter) {
            if let Some(text) = Self::text(ctx.ring, m.segment) {
                cues.push(Cue::finishing_at(text, m.priority, m.finish_m));
            }
        }
    }
}

/// Announces segments and session events; for checking a track setup.
#[derive(Default)]
pub struct DebugCoach {
    messages: MessageRing,
}

impl DebugCoach {
    pub const PRIORITY: u8 = 2;
    pub const EVENT_PRIORITY: u8 = 9;
}

impl CopilotApp for DebugCoach {
    fn tag(&self) -> &'static str {
        "debug"
    }

    fn initialize(&mut self, ring: &SegmentRing, table: &LapTimeTable) {
        self.messages = MessageRing::build(
            ring,
            table,
            &[SegmentKind::Brake, SegmentKind::Throttle],
            DistanceStrategy::SegmentStart,
            Self::PRIORITY,
            "segment 10 brake",
        );
    }

    fn on_tick(&mut self, ctx: &TickContext<'_>, meter: u32, cues: &mut Vec<Cue>) {
        for m in self.messages.at(meter) {
            let kind = ctx.ring.get(m.segment).kind;
            cues.push(Cue::finishing_at(format!("segment {} {}", m.segment + 1, kind), m.priority, m.finish_m));
        }
    }

    fn on_new_lap(&mut self, ctx: &TickContext<'_>, cues: &mut Vec<Cue>) {
        cues.push(Cue::instant(format!("lap {}", ctx.lap), Self::EVENT_PRIORITY));
    }

    fn on_reset_to_pits(&mut self, _ctx: &TickContext<'_>, cues: &mut Vec<Cue>) {
        cues.push(Cue::instant("reset to pits", Self::EVENT_PRIORITY));
    }

    fn on_crash(&mut self, _ctx: &TickContext<'_>, cues: &mut Vec<Cue>) {
        cues.push(Cue::instant("crash detected", Self::EVENT_PRIORITY));
    }
}
