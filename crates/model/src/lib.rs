use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod segment;

pub use segment::*;

/// Highest response priority understood by the downstream audio queue.
pub const MAX_PRIORITY: u8 = 10;

/// One sample of a recorded reference lap.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct TelemetryPoint {
    pub t_ms: f64,
    pub distance_m: f64,
    pub speed_ms: f64,
    pub throttle: f64,
    pub brake: f64,
    pub gear: i8,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct LapMeta {
    #[serde(with = "uuid::serde::simple")]
    pub id: Uuid,
    pub game: String,
    pub car: String,
    pub track: String,
    pub lap_number: u32,
}

/// A recorded lap with its full trace, used as segmentation input.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Lap {
    #[serde(with = "uuid::serde::simple")]
    pub id: Uuid,
    pub meta: LapMeta,
    pub total_time_ms: u64,
    #[serde(default)]
    pub points: Vec<TelemetryPoint>,
}

impl Lap {
    pub fn new(key: &TrackKey, lap_number: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            meta: LapMeta {
                id: Uuid::new_v4(),
                game: key.game.clone(),
                car: key.car.clone(),
                track: key.track.clone(),
                lap_number,
            },
            total_time_ms: 0,
            points: vec![],
        }
    }

    pub fn track_key(&self) -> TrackKey {
        TrackKey {
            game: self.meta.game.clone(),
            car: self.meta.car.clone(),
            track: self.meta.track.clone(),
        }
    }
}

/// A lap finished during a live session, handed to the store.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct CompletedLap {
    pub driver: String,
    pub session_id: String,
    pub track: TrackKey,
    pub number: u32,
    pub start_ms: i64,
    pub end_ms: i64,
    pub time_ms: u64,
    pub length_m: f64,
    pub valid: bool,
}

/// One decoded live telemetry tick.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct TelemetryFrame {
    pub time_ms: i64,
    pub distance_m: f64,
    pub speed_ms: f64,
    pub throttle: f64,
    pub brake: f64,
    pub gear: i8,
    pub current_lap: u32,
    pub current_lap_time_s: f64,
    pub current_lap_is_valid: bool,
    #[serde(default)]
    pub previous_lap_was_valid: Option<bool>,
    #[serde(default)]
    pub lap_time_previous_s: Option<f64>,
}

impl TelemetryFrame {
    /// Whole meters travelled on the current lap.
    pub fn meters(&self) -> u32 {
        if self.distance_m.is_finite() && self.distance_m > 0.0 {
            self.distance_m as u32
        } else {
            0
        }
    }

    pub fn to_point(&self) -> TelemetryPoint {
        TelemetryPoint {
            t_ms: self.time_ms as f64,
            distance_m: self.distance_m,
            speed_ms: self.speed_ms,
            throttle: self.throttle,
            brake: self.brake,
            gear: self.gear,
        }
    }
}

/// (game, car, track) triple that reference data is stored under.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackKey {
    pub game: String,
    pub car: String,
    pub track: String,
}

impl std::fmt::Display for TrackKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.game, self.track, self.car)
    }
}

/// Identity of one live telemetry stream.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub driver: String,
    pub session_id: String,
    pub game: String,
    pub track: String,
    pub car: String,
    pub session_type: String,
}

impl SessionKey {
    pub fn track_key(&self) -> TrackKey {
        TrackKey {
            game: self.game.clone(),
            car: self.car.clone(),
            track: self.track.clone(),
        }
    }

    /// Topic responses for this driver are published on.
    pub fn response_topic(&self, prefix: &str) -> String {
        format!("{}/{}", prefix.trim_end_matches('/'), self.driver)
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}/{}",
            self.driver, self.session_id, self.game, self.track, self.car, self.session_type
        )
    }
}

/// A unit of speech sent downstream.
///
/// Responses without a `distance` are instant and play immediately. A
/// distance-bound response should be dropped by the player once the car is
/// past `max_distance`.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Response {
    pub message: String,
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_distance: Option<f64>,
}

impl Response {
    pub fn instant(message: impl Into<String>, priority: u8) -> Self {
        Self {
            message: message.into(),
            priority: priority.min(MAX_PRIORITY),
            distance: None,
            max_distance: None,
        }
    }

    pub fn at(message: impl Into<String>, priority: u8, distance: f64, max_distance: Option<f64>) -> Self {
        Self {
            message: message.into(),
            priority: priority.min(MAX_PRIORITY),
            distance: Some(distance),
            max_distance,
        }
    }

    pub fn is_instant(&self) -> bool {
        self.distance.is_none()
    }
}
