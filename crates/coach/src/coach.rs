//! The per-session coaching state machine.

use std::sync::Arc;

use model::{Response, TelemetryFrame, TrackKey};
use tracing::{debug, info, warn};

use crate::apps::{AppKind, CopilotApp, Cue, TickContext};
use crate::history::History;
use crate::timing::{ahead, speech_duration, start_distance, PlayingMap};
use crate::{CoachError, SessionReference};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoachState {
    Uninitialized,
    Initializing,
    Ready,
    Active,
}

/// Who is being coached, where, and by which application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoachFilter {
    pub driver: String,
    pub track: TrackKey,
    pub app: String,
}

#[derive(Clone, Debug)]
pub struct CoachConfig {
    /// Largest gap across the start/finish line still read as a lap crossing.
    pub lap_cross_tolerance_m: u32,
    /// Below this speed a backwards jump is a return to the pits.
    pub reset_speed_ms: f64,
    /// Backwards movement up to this is ignored as noise.
    pub jitter_m: u32,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self { lap_cross_tolerance_m: 200, reset_speed_ms: 1.0, jitter_m: 20 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LapEvent {
    LapCrossed,
    ResetToPits,
    Crash,
}

/// Outcome of one [`Coach::notify`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Tick {
    pub event: Option<LapEvent>,
    /// Configuration error keeping the coach from becoming ready.
    pub error: Option<String>,
    /// A finished segment pass awaits [`Coach::process_pending`].
    pub work_pending: bool,
}

#[derive(Debug, PartialEq)]
enum Motion {
    First,
    Duplicate,
    Jitter,
    Forward(u32),
    LapCross(u32),
    Reset,
    Crash,
}

struct Loaded {
    reference: Arc<SessionReference>,
    history: History,
    app: Box<dyn CopilotApp>,
    playing: PlayingMap,
    processed: Vec<bool>,
    previous: Option<u32>,
}

pub struct Coach {
    config: CoachConfig,
    state: CoachState,
    filter: Option<CoachFilter>,
    error: Option<String>,
    loaded: Option<Loaded>,
    lap: u32,
    last_current_lap: Option<u32>,
    crashed: bool,
    queued: Vec<Response>,
}

impl Default for Coach {
    fn default() -> Self {
        Self::new(CoachConfig::default())
    }
}

fn classify(config: &CoachConfig, previous: Option<u32>, m: u32, lap_changed: bool, speed_ms: f64, track_length: u32) -> Motion {
    let Some(prev) = previous else {
        return Motion::First;
    };
    if m == prev {
        return Motion::Duplicate;
    }
    if m > prev {
        return Motion::Forward(prev);
    }
    if prev - m <= config.jitter_m && !lap_changed {
        return Motion::Jitter;
    }
    if speed_ms < config.reset_speed_ms {
        return Motion::Reset;
    }
    if lap_changed || (track_length - prev) + m <= config.lap_cross_tolerance_m {
        return Motion::LapCross(prev);
    }
    Motion::Crash
}

/// Runs the application over meters `from..=to` that were not yet visited
/// this lap.
fn visit(app: &mut dyn CopilotApp, processed: &mut [bool], ctx: &TickContext<'_>, from: u32, to: u32, cues: &mut Vec<Cue>) {
    for r in from..=to {
        let seen = &mut processed[r as usize];
        if !*seen {
            *seen = true;
            app.on_tick(ctx, r, cues);
        }
    }
}

impl Coach {
    pub fn new(config: CoachConfig) -> Self {
        Self {
            config,
            state: CoachState::Uninitialized,
            filter: None,
            error: None,
            loaded: None,
            lap: 0,
            last_current_lap: None,
            crashed: false,
            queued: Vec::new(),
        }
    }

    pub fn state(&self) -> CoachState {
        self.state
    }

    pub fn filter(&self) -> Option<&CoachFilter> {
        self.filter.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn history(&self) -> Option<&History> {
        self.loaded.as_ref().map(|l| &l.history)
    }

    pub fn reference(&self) -> Option<&Arc<SessionReference>> {
        self.loaded.as_ref().map(|l| &l.reference)
    }

    /// Laps crossed since the coach became ready.
    pub fn lap(&self) -> u32 {
        self.lap
    }

    /// Points the coach at a driver/track/app. Returns true when that moved
    /// it back to `Initializing`, i.e. a reference load is needed.
    pub fn set_filter(&mut self, filter: CoachFilter) -> bool {
        if self.filter.as_ref() == Some(&filter) && self.state != CoachState::Uninitialized {
            return false;
        }
        info!(driver = %filter.driver, track = %filter.track, app = %filter.app, "coach initializing");
        self.filter = Some(filter);
        self.state = CoachState::Initializing;
        self.error = None;
        self.loaded = None;
        self.crashed = false;
        self.queued.clear();
        true
    }

    pub fn disable(&mut self) {
        if self.state != CoachState::Uninitialized {
            info!("coach disabled");
        }
        self.state = CoachState::Uninitialized;
        self.filter = None;
        self.error = None;
        self.loaded = None;
        self.queued.clear();
    }

    /// Completes initialization with the outcome of the reference lookup.
    /// On error the coach stays `Initializing` and reports the error on
    /// every tick.
    pub fn initialize(&mut self, reference: Result<Arc<SessionReference>, CoachError>) -> Result<(), CoachError> {
        let Some(app_tag) = self.filter.as_ref().map(|f| f.app.clone()) else {
            return Ok(());
        };
        let result = reference.and_then(|r| Ok((r, app_tag.parse::<AppKind>()?)));
        match result {
            Ok((reference, kind)) => {
                let mut app = kind.build();
                app.initialize(&reference.ring, &reference.table);
                let track_length = reference.track_length();
                info!(track = %reference.track, segments = reference.ring.len(), app = app.tag(), "coach ready");
                self.loaded = Some(Loaded {
                    history: History::new(reference.ring.clone()),
                    app,
                    playing: PlayingMap::new(track_length),
                    processed: vec![false; track_length as usize],
                    previous: None,
                    reference,
                });
                self.state = CoachState::Ready;
                self.error = None;
                self.lap = 0;
                self.crashed = false;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "coach not ready");
                self.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Feeds one telemetry tick. Responses produced by it are queued for
    /// [`Coach::take_responses`]; feature extraction is left for
    /// [`Coach::process_pending`].
    pub fn notify(&mut self, frame: &TelemetryFrame) -> Tick {
        match self.state {
            CoachState::Uninitialized => Tick::default(),
            CoachState::Initializing => Tick { error: self.error.clone(), ..Default::default() },
            CoachState::Ready | CoachState::Active => self.advance(frame),
        }
    }

    fn advance(&mut self, frame: &TelemetryFrame) -> Tick {
        let Some(loaded) = self.loaded.as_mut() else {
            return Tick::default();
        };
        let Loaded { reference, history, app, playing, processed, previous } = loaded;
        let track_length = reference.track_length();
        let m = frame.meters() % track_length;
        let lap_changed = matches!(self.last_current_lap, Some(l) if frame.current_lap > l);
        let motion = classify(&self.config, *previous, m, lap_changed, frame.speed_ms, track_length);

        let mut tick = Tick::default();
        let mut cues = Vec::new();
        match motion {
            Motion::Duplicate => return tick,
            Motion::Jitter => {
                debug!(from = previous.unwrap_or(0), to = m, "ignoring backwards jitter");
                return tick;
            }
            Motion::First => {
                let ctx = TickContext { ring: history.ring(), table: &reference.table, frame, lap: self.lap };
                visit(app.as_mut(), processed, &ctx, m, m, &mut cues);
            }
            Motion::Forward(prev) => {
                self.crashed = false;
                playing.release(prev, m);
                let ctx = TickContext { ring: history.ring(), table: &reference.table, frame, lap: self.lap };
                visit(app.as_mut(), processed, &ctx, prev + 1, m, &mut cues);
            }
            Motion::LapCross(prev) => {
                self.crashed = false;
                playing.release(prev, m);
                {
                    let ctx = TickContext { ring: history.ring(), table: &reference.table, frame, lap: self.lap };
                    if prev + 1 < track_length {
                        visit(app.as_mut(), processed, &ctx, prev + 1, track_length - 1, &mut cues);
                    }
                }
                self.lap += 1;
                processed.iter_mut().for_each(|p| *p = false);
                debug!(lap = self.lap, "lap crossed");
                tick.event = Some(LapEvent::LapCrossed);
                let ctx = TickContext { ring: history.ring(), table: &reference.table, frame, lap: self.lap };
                app.on_new_lap(&ctx, &mut cues);
                visit(app.as_mut(), processed, &ctx, 0, m, &mut cues);
            }
            Motion::Reset => {
                info!(meters = m, "reset to pits");
                self.crashed = false;
                self.queued.clear();
                playing.clear();
                history.reset();
                processed.iter_mut().for_each(|p| *p = false);
                tick.event = Some(LapEvent::ResetToPits);
                let ctx = TickContext { ring: history.ring(), table: &reference.table, frame, lap: self.lap };
                app.on_reset_to_pits(&ctx, &mut cues);
            }
            Motion::Crash => {
                history.reset();
                if !self.crashed {
                    info!(from = previous.unwrap_or(0), to = m, "crash");
                    self.crashed = true;
                    tick.event = Some(LapEvent::Crash);
                    let ctx = TickContext { ring: history.ring(), table: &reference.table, frame, lap: self.lap };
                    app.on_crash(&ctx, &mut cues);
                }
            }
        }
        *previous = Some(m);
        self.last_current_lap = Some(frame.current_lap);
        self.state = CoachState::Active;

        // higher priority claims the playing map first; sort is stable
        cues.sort_by(|a, b| b.priority.cmp(&a.priority));
        for cue in cues {
            match cue.finish_m {
                None => self.queued.push(Response::instant(cue.text, cue.priority)),
                Some(finish) => {
                    let mut start = start_distance(&reference.table, finish, speech_duration(&cue.text));
                    let f = (finish.floor() as u32) % track_length;
                    let mut s = (start.floor() as u32) % track_length;
                    if ahead(m, s, track_length) > ahead(m, f, track_length) {
                        // should have started already
                        s = m;
                        start = m as f64;
                    }
                    if playing.occupy(s, f) {
                        self.queued.push(Response::at(cue.text, cue.priority, start, Some(finish)));
                    } else {
                        debug!(text = %cue.text, start = s, finish = f, "dropping overlapping response");
                    }
                }
            }
        }

        tick.work_pending = history.update(frame.time_ms, frame);
        tick
    }

    /// Runs feature extraction for finished segment passes.
    pub fn process_pending(&mut self) -> usize {
        self.loaded.as_mut().map(|l| l.history.process_pending()).unwrap_or(0)
    }

    /// Responses queued since the last call, highest priority first within
    /// each tick.
    pub fn take_responses(&mut self) -> Vec<Response> {
        std::mem::take(&mut self.queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis::LapTimeTable;
    use model::{Segment, SegmentFeatures, SegmentKind, SegmentRing};

    const TRACK: u32 = 3600;

    fn key() -> TrackKey {
        TrackKey { game: "iRacing".into(), car: "gt3".into(), track: "spa".into() }
    }

    fn reference_with(segments: Vec<Segment>) -> Arc<SessionReference> {
        Arc::new(SessionReference {
            track: key(),
            ring: SegmentRing::new(segments, TRACK).unwrap(),
            table: LapTimeTable::linear(TRACK, 72.0),
        })
    }

    fn reference() -> Arc<SessionReference> {
        let flat = SegmentFeatures { force: 1.0, gear: Some(6), ..Default::default() };
        let brake = SegmentFeatures { force: 0.9, force_start_m: 1100.0, force_end_m: 1180.0, gear: Some(3), apex_m: 1250.0 };
        reference_with(vec![
            Segment::new(0, 0, 999, SegmentKind::Throttle, flat.clone()),
            Segment::new(0, 1000, 1999, SegmentKind::Brake, brake),
            Segment::new(0, 2000, 3599, SegmentKind::Throttle, flat),
        ])
    }

    fn filter(app: &str) -> CoachFilter {
        CoachFilter { driver: "jim".into(), track: key(), app: app.into() }
    }

    fn frame(m: f64, speed: f64) -> TelemetryFrame {
        let brake = if (1100.0..1180.0).contains(&m) { 0.9 } else { 0.0 };
        TelemetryFrame {
            time_ms: (m * 20.0) as i64,
            distance_m: m,
            speed_ms: speed,
            throttle: 1.0 - brake,
            brake,
            gear: 4,
            current_lap: 1,
            current_lap_is_valid: true,
            ..Default::default()
        }
    }

    fn ready(app: &str) -> Coach {
        let mut c = Coach::default();
        c.set_filter(filter(app));
        c.initialize(Ok(reference())).unwrap();
        c
    }

    fn drive(c: &mut Coach, from: u32, to: u32, step: usize) -> Vec<Tick> {
        (from..to).step_by(step).map(|m| c.notify(&frame(m as f64, 50.0))).collect()
    }

    #[test]
    fn test_lifecycle() {
        let mut c = Coach::default();
        assert_eq!(c.state(), CoachState::Uninitialized);
        assert_eq!(c.notify(&frame(10.0, 50.0)), Tick::default());

        assert!(c.set_filter(filter("brake")));
        assert!(!c.set_filter(filter("brake")));
        assert_eq!(c.state(), CoachState::Initializing);

        assert!(c.initialize(Err(CoachError::NoReference(key()))).is_err());
        let tick = c.notify(&frame(20.0, 50.0));
        assert_eq!(tick.error.as_deref(), Some("no reference laps for iRacing/spa/gt3"));
        assert_eq!(c.state(), CoachState::Initializing);

        c.initialize(Ok(reference())).unwrap();
        assert_eq!(c.state(), CoachState::Ready);
        assert_eq!(c.notify(&frame(30.0, 50.0)).error, None);
        assert_eq!(c.state(), CoachState::Active);

        c.disable();
        assert_eq!(c.state(), CoachState::Uninitialized);
        assert!(c.history().is_none());
    }

    #[test]
    fn test_unknown_app_is_a_configuration_error() {
        let mut c = Coach::default();
        c.set_filter(filter("karaoke"));
        assert_eq!(c.initialize(Ok(reference())), Err(CoachError::UnknownApp("karaoke".into())));
        assert!(c.error().unwrap().contains("karaoke"));
        assert_eq!(c.state(), CoachState::Initializing);
    }

    #[test]
    fn test_brake_countdown_ends_at_brake_point() {
        let mut c = ready("brake");
        drive(&mut c, 0, 1200, 5);
        let responses = c.take_responses();
        assert_eq!(responses.len(), 1);
        let r = &responses[0];
        assert_eq!(r.message, "90 percent, gear 3, brake");
        assert_eq!(r.max_distance, Some(1100.0));
        let start = r.distance.unwrap();
        assert!(start < 1100.0);
        let table = LapTimeTable::linear(TRACK, 72.0);
        assert!((table.seconds_between(start, 1100.0) - speech_duration(&r.message)).abs() < 1e-6);
    }

    #[test]
    fn test_lap_crossing() {
        let mut c = ready("debug");
        drive(&mut c, 3000, 3551, 10);
        c.take_responses();
        let tick = c.notify(&frame(40.0, 50.0));
        assert_eq!(tick.event, Some(LapEvent::LapCrossed));
        assert_eq!(c.lap(), 1);
        let responses = c.take_responses();
        assert!(responses.iter().any(|r| r.message == "lap 1" && r.is_instant()));
    }

    #[test]
    fn test_same_jump_standing_still_is_reset() {
        let mut c = ready("brake");
        drive(&mut c, 3000, 3551, 10);
        let tick = c.notify(&frame(40.0, 0.0));
        assert_eq!(tick.event, Some(LapEvent::ResetToPits));
        assert_eq!(c.lap(), 0);
    }

    #[test]
    fn test_reset_clears_pending_responses() {
        let mut c = ready("brake");
        drive(&mut c, 0, 1000, 5);
        let tick = c.notify(&frame(10.0, 0.2));
        assert_eq!(tick.event, Some(LapEvent::ResetToPits));
        assert!(c.take_responses().is_empty());

        // the brake point is coached again on the way out
        drive(&mut c, 20, 1200, 5);
        assert_eq!(c.take_responses().len(), 1);
    }

    #[test]
    fn test_crash_is_reported_once() {
        let mut c = ready("debug");
        drive(&mut c, 0, 2000, 5);
        c.take_responses();
        assert_eq!(c.notify(&frame(1000.0, 30.0)).event, Some(LapEvent::Crash));
        assert_eq!(c.notify(&frame(500.0, 30.0)).event, None);
        assert_eq!(c.notify(&frame(510.0, 30.0)).event, None);
        assert_eq!(c.notify(&frame(100.0, 30.0)).event, Some(LapEvent::Crash));
        let crashes = c.take_responses().iter().filter(|r| r.message == "crash detected").count();
        assert_eq!(crashes, 2);
    }

    #[test]
    fn test_duplicate_and_jitter_ticks_are_ignored() {
        let mut c = ready("brake");
        c.notify(&frame(100.2, 50.0));
        assert_eq!(c.notify(&frame(100.7, 50.0)), Tick::default());
        assert_eq!(c.history().unwrap().buffered(), 1);

        c.notify(&frame(500.0, 50.0));
        assert_eq!(c.notify(&frame(495.0, 50.0)).event, None);
        assert_eq!(c.history().unwrap().previous_meters(), Some(500));
    }

    #[test]
    fn test_extraction_after_segment_exit() {
        let mut c = ready("brake");
        let ticks = drive(&mut c, 0, 2005, 5);
        assert!(ticks.iter().any(|t| t.work_pending));
        assert_eq!(c.process_pending(), 2);
        let live = c.history().unwrap().segment(1).last_live().unwrap();
        assert!((live.force - 0.9).abs() < 0.05);
        assert!(live.force_start_m >= 1095.0 && live.force_start_m <= 1100.0);
        // the shared reference is untouched
        assert_eq!(c.reference().unwrap().ring.get(1).live().len(), 0);
    }

    #[test]
    fn test_responses_never_overlap() {
        let segments = (0..36u32)
            .map(|i| {
                let start = i * 100;
                let (kind, force) = if i % 2 == 0 { (SegmentKind::Brake, 0.9) } else { (SegmentKind::Throttle, 0.6) };
                let features = SegmentFeatures {
                    force,
                    force_start_m: (start + 50) as f64,
                    force_end_m: (start + 70) as f64,
                    gear: Some(3),
                    apex_m: (start + 80) as f64,
                };
                Segment::new(0, start, start + 99, kind, features)
            })
            .collect();
        let mut c = Coach::default();
        c.set_filter(filter("trackguide"));
        c.initialize(Ok(reference_with(segments))).unwrap();

        drive(&mut c, 0, 3000, 3);
        let responses = c.take_responses();
        assert!(!responses.is_empty());
        assert!(responses.len() < 36);

        let windows: Vec<(u32, u32)> = responses
            .iter()
            .map(|r| (r.distance.unwrap().floor() as u32 % TRACK, r.max_distance.unwrap().floor() as u32 % TRACK))
            .collect();
        for (i, a) in windows.iter().enumerate() {
            for (j, b) in windows.iter().enumerate() {
                if i != j {
                    assert!(
                        ahead(a.0, b.0, TRACK) >= ahead(a.0, a.1, TRACK),
                        "{:?} starts inside {:?}",
                        b,
                        a
                    );
                }
            }
        }
    }
}
