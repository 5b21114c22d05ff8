//! Distance ↔ lap-time lookup for a reference lap.

use crate::resample::Resampled;

/// Speed assumed when a reference lap gives nothing usable (m/s).
const FALLBACK_SPEED: f64 = 40.0;

/// Elapsed seconds at every whole meter of the lap, `0..=track_length`.
#[derive(Clone, Debug, PartialEq)]
pub struct LapTimeTable {
    times_s: Vec<f64>,
    track_length: u32,
    start_corrected: bool,
}

impl LapTimeTable {
    /// Builds the table from a resampled reference lap.
    ///
    /// Time at meter 0 is extrapolated from the first sample so laps that
    /// start recording a few meters late are corrected. If the result is not
    /// strictly increasing the table falls back to uniform interpolation.
    pub fn from_trace(trace: &Resampled, track_length: u32) -> Self {
        let track_length = track_length.max(1);
        if trace.len() < 2 {
            return Self::linear(track_length, track_length as f64 / FALLBACK_SPEED);
        }
        let full = trace.to_track(track_length);
        let t0 = full.time_ms[0];
        let mut times_s: Vec<f64> = full.time_ms.iter().map(|t| (t - t0) / 1000.0).collect();
        let last_speed = full.speed.last().copied().unwrap_or(FALLBACK_SPEED).max(1.0);
        let end = times_s.last().copied().unwrap_or(0.0) + 1.0 / last_speed;
        times_s.push(end);

        if times_s.windows(2).all(|w| w[1] > w[0]) {
            return Self { times_s, track_length, start_corrected: true };
        }

        let span_s = (trace.time_ms[trace.len() - 1] - trace.time_ms[0]) / 1000.0;
        let lap_s = if span_s > 0.0 {
            span_s * track_length as f64 / (trace.len() - 1) as f64
        } else {
            track_length as f64 / FALLBACK_SPEED
        };
        Self::linear(track_length, lap_s)
    }

    pub fn linear(track_length: u32, lap_time_s: f64) -> Self {
        let track_length = track_length.max(1);
        let lap_time_s = if lap_time_s > 0.0 { lap_time_s } else { track_length as f64 / FALLBACK_SPEED };
        let times_s = (0..=track_length)
            .map(|m| m as f64 / track_length as f64 * lap_time_s)
            .collect();
        Self { times_s, track_length, start_corrected: false }
    }

    pub fn is_start_corrected(&self) -> bool {
        self.start_corrected
    }

    pub fn track_length(&self) -> u32 {
        self.track_length
    }

    pub fn lap_time(&self) -> f64 {
        self.times_s.last().copied().unwrap_or(0.0)
    }

    /// Seconds from lap start to meter `m` (reduced modulo track length).
    pub fn time_at(&self, m: f64) -> f64 {
        let m = m.rem_euclid(self.track_length as f64);
        let i = m.floor() as usize;
        let frac = m - i as f64;
        let a = self.times_s[i];
        let b = self.times_s[(i + 1).min(self.times_s.len() - 1)];
        a + frac * (b - a)
    }

    /// Meter reached `t` seconds into the lap (reduced modulo lap time).
    pub fn distance_at(&self, t: f64) -> f64 {
        let lap = self.lap_time();
        if lap <= 0.0 {
            return 0.0;
        }
        let t = t.rem_euclid(lap);
        let i = self.times_s.partition_point(|x| *x < t);
        if i == 0 {
            return 0.0;
        }
        let (a, b) = (self.times_s[i - 1], self.times_s[i.min(self.times_s.len() - 1)]);
        let frac = if b > a { (t - a) / (b - a) } else { 0.0 };
        let d = (i - 1) as f64 + frac;
        d.rem_euclid(self.track_length as f64)
    }

    /// Meter the car passes `seconds` before reaching `target_m`.
    pub fn distance_before(&self, target_m: f64, seconds: f64) -> f64 {
        let seconds = seconds.clamp(0.0, self.lap_time() * 0.999);
        self.distance_at(self.time_at(target_m) - seconds)
    }

    /// Meter the car reaches `seconds` after passing `start_m`.
    pub fn distance_after(&self, start_m: f64, seconds: f64) -> f64 {
        let seconds = seconds.clamp(0.0, self.lap_time() * 0.999);
        self.distance_at(self.time_at(start_m) + seconds)
    }

    /// Forward travel time from `from_m` to `to_m`, wrapping the line.
    pub fn seconds_between(&self, from_m: f64, to_m: f64) -> f64 {
        let dt = self.time_at(to_m) - self.time_at(from_m);
        if dt < 0.0 {
            dt + self.lap_time()
        } else {
            dt
        }
    }
}
