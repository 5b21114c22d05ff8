//! Cuts the live stream of a session into completed laps and hands them to
//! the store in batches.

use std::collections::VecDeque;

use model::{CompletedLap, SessionKey, TelemetryFrame};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::store::Store;

/// A finished lap shorter than this share of the track is not valid.
const MIN_LENGTH_SHARE: f64 = 0.6;
/// Backwards movement tolerated before a slow car is taken back to the pits.
const PIT_JITTER_M: f64 = 20.0;
const MIN_MOVING_MS: f64 = 1.0;

#[derive(Debug)]
struct OpenLap {
    number: u32,
    start_ms: i64,
    first_m: f64,
    max_m: f64,
}

impl OpenLap {
    fn starting(number: u32, frame: &TelemetryFrame) -> Self {
        Self { number, start_ms: frame.time_ms, first_m: frame.distance_m, max_m: frame.distance_m }
    }
}

pub struct LapBuilder {
    key: SessionKey,
    current: Option<OpenLap>,
    last: Option<TelemetryFrame>,
    counted: u32,
}

impl LapBuilder {
    pub fn new(key: SessionKey) -> Self {
        Self { key, current: None, last: None, counted: 0 }
    }

    fn next_number(&mut self, frame: &TelemetryFrame) -> u32 {
        self.counted += 1;
        if frame.current_lap > 0 {
            frame.current_lap
        } else {
            self.counted
        }
    }

    /// Feeds one tick; returns the lap it completed, if any. `track_length`
    /// is used for the finish-line fallback and the validity check.
    pub fn feed(&mut self, frame: &TelemetryFrame, track_length: Option<u32>) -> Option<CompletedLap> {
        let Some(last) = self.last.replace(frame.clone()) else {
            let n = self.next_number(frame);
            self.current = Some(OpenLap::starting(n, frame));
            return None;
        };

        // 1) explicit lap number increase
        let mut roll = frame.current_lap > last.current_lap && frame.current_lap > 0;
        // 2) games without lap numbers: distance wraps at the line
        if !roll && frame.current_lap == 0 && last.current_lap == 0 {
            let span = track_length
                .map(f64::from)
                .or_else(|| self.current.as_ref().map(|l| l.max_m))
                .unwrap_or(0.0);
            roll = span > 0.0 && last.distance_m - frame.distance_m > span / 2.0 && frame.speed_ms >= MIN_MOVING_MS;
        }

        if !roll {
            if frame.speed_ms < MIN_MOVING_MS && frame.distance_m + PIT_JITTER_M < last.distance_m {
                debug!(session = %self.key, "lap restarted from the pits");
                let n = self.current.as_ref().map(|l| l.number).unwrap_or(1);
                self.current = Some(OpenLap::starting(n, frame));
            } else if let Some(lap) = self.current.as_mut() {
                lap.max_m = lap.max_m.max(frame.distance_m);
            }
            return None;
        }

        let finished = self.current.take();
        let n = self.next_number(frame);
        self.current = Some(OpenLap::starting(n, frame));
        let lap = finished?;

        let end_ms = last.time_ms.max(lap.start_ms);
        let time_ms = match frame.lap_time_previous_s {
            Some(s) if s > 0.0 => (s * 1000.0).round() as u64,
            _ => (end_ms - lap.start_ms) as u64,
        };
        let length_m = (lap.max_m - lap.first_m).max(0.0);
        let long_enough = track_length.map(|l| length_m >= f64::from(l) * MIN_LENGTH_SHARE).unwrap_or(true);
        let valid = frame.previous_lap_was_valid.unwrap_or(last.current_lap_is_valid) && long_enough;
        debug!(session = %self.key, lap = lap.number, time_ms, length_m, valid, "lap completed");

        Some(CompletedLap {
            driver: self.key.driver.clone(),
            session_id: self.key.session_id.clone(),
            track: self.key.track_key(),
            number: lap.number,
            start_ms: lap.start_ms,
            end_ms,
            time_ms,
            length_m,
            valid,
        })
    }
}

/// Completed laps waiting to be written.
#[derive(Default)]
pub struct LapBuffer {
    laps: Mutex<VecDeque<CompletedLap>>,
}

impl LapBuffer {
    pub fn push(&self, lap: CompletedLap) {
        self.laps.lock().push_back(lap);
    }

    pub fn drain(&self) -> Vec<CompletedLap> {
        self.laps.lock().drain(..).collect()
    }

    /// Puts laps back at the front, keeping their order.
    pub fn requeue(&self, laps: Vec<CompletedLap>) {
        let mut q = self.laps.lock();
        for lap in laps.into_iter().rev() {
            q.push_front(lap);
        }
    }

    pub fn len(&self) -> usize {
        self.laps.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Writes buffered laps. On the first failure the failed lap and everything
/// after it go back into the buffer for the next flush. Returns the number
/// of laps saved.
pub async fn flush(buffer: &LapBuffer, store: &dyn Store) -> usize {
    let mut pending = buffer.drain().into_iter();
    let mut saved = 0;
    while let Some(lap) = pending.next() {
        if let Err(e) = store.save_lap(&lap).await {
            warn!(error = %e, driver = %lap.driver, lap = lap.number, "saving lap failed, will retry");
            let mut rest = vec![lap];
            rest.extend(pending);
            buffer.requeue(rest);
            break;
        }
        saved += 1;
        if lap.valid {
            if let Err(e) = store.grow_track_length(&lap.track, lap.length_m.round() as u32).await {
                warn!(error = %e, track = %lap.track, "updating track length failed");
            }
        }
    }
    saved
}
