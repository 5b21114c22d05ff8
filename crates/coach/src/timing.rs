//! Speech timing: when to start talking so a cue ends at its target meter.

use analysis::LapTimeTable;

/// Speaking rate of the downstream voice.
pub const WORDS_PER_SECOND: f64 = 2.5;
/// Fixed overhead added to every utterance (queueing plus trailing silence).
pub const SPEECH_PAD_S: f64 = 0.5;

/// Estimated seconds needed to say `text`.
pub fn speech_duration(text: &str) -> f64 {
    let words = text.split_whitespace().count();
    words as f64 / WORDS_PER_SECOND + SPEECH_PAD_S
}

/// Meter at which speech lasting `duration_s` must start to end at
/// `finish_m`, using the reference lap's pace.
pub fn start_distance(table: &LapTimeTable, finish_m: f64, duration_s: f64) -> f64 {
    table.distance_before(finish_m, duration_s)
}

/// Forward distance from `from` to `to` on a track of length `len`.
pub(crate) fn ahead(from: u32, to: u32, len: u32) -> u32 {
    (to + len - from % len) % len
}

/// Occupancy of the track by responses that are still being spoken.
///
/// Indexed by meter. A window is half-open, `[start, end)`, and may wrap
/// through the start/finish line.
#[derive(Clone, Debug)]
pub struct PlayingMap {
    occupied: Vec<bool>,
}

impl PlayingMap {
    pub fn new(track_length: u32) -> Self {
        Self { occupied: vec![false; track_length.max(1) as usize] }
    }

    pub fn track_length(&self) -> u32 {
        self.occupied.len() as u32
    }

    fn span(&self, start: u32, end: u32) -> impl Iterator<Item = usize> {
        let len = self.track_length();
        let start = start % len;
        let n = ahead(start, end % len, len).max(1);
        (0..n).map(move |i| ((start + i) % len) as usize)
    }

    pub fn is_free(&self, start: u32, end: u32) -> bool {
        self.span(start, end).all(|m| !self.occupied[m])
    }

    /// Marks the window as playing. Fails without side effects if any meter
    /// of it is already taken.
    pub fn occupy(&mut self, start: u32, end: u32) -> bool {
        if !self.is_free(start, end) {
            return false;
        }
        for m in self.span(start, end).collect::<Vec<_>>() {
            self.occupied[m] = true;
        }
        true
    }

    pub fn release(&mut self, start: u32, end: u32) {
        for m in self.span(start, end).collect::<Vec<_>>() {
            self.occupied[m] = false;
        }
    }

    pub fn clear(&mut self) {
        self.occupied.iter_mut().for_each(|m| *m = false);
    }

    /// Number of occupied meters.
    pub fn occupied(&self) -> usize {
        self.occupied.iter().filter(|m| **m).count()
    }
}
