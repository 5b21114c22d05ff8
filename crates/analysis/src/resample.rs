//! Uniform 1-meter resampling of lap traces.

use model::TelemetryPoint;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Time,
    Speed,
    Throttle,
    Brake,
    Gear,
}

/// A lap trace on a 1 m grid. Index `i` is lap meter `start_m + i`.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Resampled {
    pub start_m: u32,
    pub time_ms: Vec<f64>,
    pub speed: Vec<f64>,
    pub throttle: Vec<f64>,
    pub brake: Vec<f64>,
    pub gear: Vec<i8>,
}

impl Resampled {
    pub fn len(&self) -> usize {
        self.speed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.speed.is_empty()
    }

    /// Meters covered, measured from lap meter 0.
    pub fn end_m(&self) -> u32 {
        self.start_m + self.len() as u32
    }

    pub fn channel(&self, channel: Channel) -> Vec<f64> {
        match channel {
            Channel::Time => self.time_ms.clone(),
            Channel::Speed => self.speed.clone(),
            Channel::Throttle => self.throttle.clone(),
            Channel::Brake => self.brake.clone(),
            Channel::Gear => self.gear.iter().map(|g| *g as f64).collect(),
        }
    }

    fn raw(&self, channel: Channel, i: usize) -> f64 {
        match channel {
            Channel::Time => self.time_ms[i],
            Channel::Speed => self.speed[i],
            Channel::Throttle => self.throttle[i],
            Channel::Brake => self.brake[i],
            Channel::Gear => self.gear[i] as f64,
        }
    }

    /// Linearly interpolated value at lap distance `d`.
    pub fn value_at(&self, channel: Channel, d: f64) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let x = d - self.start_m as f64;
        let last = (self.len() - 1) as f64;
        if x < -1e-9 || x > last + 1e-9 {
            return None;
        }
        let x = x.clamp(0.0, last);
        let i = x.floor() as usize;
        if i + 1 >= self.len() {
            return Some(self.raw(channel, i));
        }
        let frac = x - i as f64;
        let a = self.raw(channel, i);
        let b = self.raw(channel, i + 1);
        Some(a + frac * (b - a))
    }

    /// Pads or truncates the trace to exactly `track_length` meters starting
    /// at meter 0, holding edge values.
    pub fn to_track(&self, track_length: u32) -> Resampled {
        let n = track_length as usize;
        let mut out = Resampled {
            start_m: 0,
            time_ms: Vec::with_capacity(n),
            speed: Vec::with_capacity(n),
            throttle: Vec::with_capacity(n),
            brake: Vec::with_capacity(n),
            gear: Vec::with_capacity(n),
        };
        if self.is_empty() {
            return out;
        }
        let first_speed = self.speed[0].max(1.0);
        let last_speed = self.speed[self.len() - 1].max(1.0);
        for m in 0..n {
            let rel = m as i64 - self.start_m as i64;
            let i = rel.clamp(0, self.len() as i64 - 1) as usize;
            // extrapolate time at the edges using the edge speed
            let t = if rel < 0 {
                self.time_ms[0] + rel as f64 / first_speed * 1000.0
            } else if rel as usize >= self.len() {
                let over = rel - (self.len() as i64 - 1);
                self.time_ms[self.len() - 1] + over as f64 / last_speed * 1000.0
            } else {
                self.time_ms[i]
            };
            out.time_ms.push(t);
            out.speed.push(self.speed[i]);
            out.throttle.push(self.throttle[i]);
            out.brake.push(self.brake[i]);
            out.gear.push(self.gear[i]);
        }
        out
    }

    /// Concatenates `copies` of a full-track trace so zones crossing the
    /// start/finish line are contiguous in the middle copy.
    pub fn repeated(&self, copies: usize) -> Resampled {
        let lap_ms = match (self.time_ms.first(), self.time_ms.last()) {
            (Some(a), Some(b)) => (b - a) + 1000.0 / self.speed.last().copied().unwrap_or(1.0).max(1.0),
            _ => 0.0,
        };
        let mut out = Resampled { start_m: self.start_m, ..Default::default() };
        for c in 0..copies {
            out.time_ms.extend(self.time_ms.iter().map(|t| t + lap_ms * c as f64));
            out.speed.extend_from_slice(&self.speed);
            out.throttle.extend_from_slice(&self.throttle);
            out.brake.extend_from_slice(&self.brake);
            out.gear.extend_from_slice(&self.gear);
        }
        out
    }
}

/// Keeps only samples whose distance strictly increases.
pub fn monotonic(points: &[TelemetryPoint]) -> Vec<&TelemetryPoint> {
    let mut out: Vec<&TelemetryPoint> = Vec::with_capacity(points.len());
    for p in points {
        if !p.distance_m.is_finite() {
            continue;
        }
        match out.last() {
            Some(last) if p.distance_m <= last.distance_m => {}
            _ => out.push(p),
        }
    }
    out
}

/// Resamples points onto whole meters between the first and last sample.
pub fn resample(points: &[TelemetryPoint]) -> Option<Resampled> {
    let pts = monotonic(points);
    if pts.len() < 2 {
        return None;
    }
    let first = pts[0].distance_m.ceil().max(0.0);
    let last = pts[pts.len() - 1].distance_m.floor();
    if last < first {
        return None;
    }
    let start_m = first as u32;
    let n = (last - first) as usize + 1;
    let mut out = Resampled {
        start_m,
        time_ms: Vec::with_capacity(n),
        speed: Vec::with_capacity(n),
        throttle: Vec::with_capacity(n),
        brake: Vec::with_capacity(n),
        gear: Vec::with_capacity(n),
    };

    let mut j = 0usize;
    for k in 0..n {
        let d = first + k as f64;
        while j + 2 < pts.len() && pts[j + 1].distance_m < d {
            j += 1;
        }
        let (a, b) = (pts[j], pts[j + 1]);
        let span = b.distance_m - a.distance_m;
        let frac = if span > 0.0 { ((d - a.distance_m) / span).clamp(0.0, 1.0) } else { 0.0 };
        let lerp = |x: f64, y: f64| x + frac * (y - x);
        out.time_ms.push(lerp(a.t_ms, b.t_ms));
        out.speed.push(lerp(a.speed_ms, b.speed_ms));
        out.throttle.push(lerp(a.throttle, b.throttle));
        out.brake.push(lerp(a.brake, b.brake));
        out.gear.push(lerp(a.gear as f64, b.gear as f64).round() as i8);
    }
    Some(out)
}
