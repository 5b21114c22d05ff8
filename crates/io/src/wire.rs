//! JSON wire format of the telemetry and response streams.

use model::{Response, SessionKey, TelemetryFrame};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("topic `{0}` is not prefix/driver/session/game/track/car/type")]
    Topic(String),
    #[error("topic `{topic}` does not start with `{prefix}`")]
    Prefix { topic: String, prefix: String },
    #[error("telemetry frame is missing {0}")]
    Missing(&'static str),
    #[error("invalid {field}: {value}")]
    Invalid { field: &'static str, value: String },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Parses `prefix/driver/sessionId/game/track/car/sessionType`. The prefix
/// may itself contain slashes; the last six parts are the key.
pub fn parse_topic(topic: &str, prefix: Option<&str>) -> Result<SessionKey, WireError> {
    let parts: Vec<&str> = topic.trim_matches('/').split('/').collect();
    if parts.len() < 7 || parts.iter().any(|p| p.is_empty()) {
        return Err(WireError::Topic(topic.to_string()));
    }
    let split = parts.len() - 6;
    if let Some(prefix) = prefix {
        let actual = parts[..split].join("/");
        if actual != prefix.trim_matches('/') {
            return Err(WireError::Prefix { topic: topic.to_string(), prefix: prefix.to_string() });
        }
    }
    let k = &parts[split..];
    Ok(SessionKey {
        driver: k[0].to_string(),
        session_id: k[1].to_string(),
        game: k[2].to_string(),
        track: k[3].to_string(),
        car: k[4].to_string(),
        session_type: k[5].to_string(),
    })
}

pub fn telemetry_topic(prefix: &str, key: &SessionKey) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), key)
}

/// A decoded inbound message.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Telemetry(TelemetryFrame),
    Disconnect,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GearValue {
    Num(i64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Seconds {
    Num(f64),
    Text(String),
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct RawTelemetry {
    distance_round_track: Option<f64>,
    speed_ms: Option<f64>,
    throttle: Option<f64>,
    brake: Option<f64>,
    gear: Option<GearValue>,
    current_lap: Option<u32>,
    current_lap_time: Option<Seconds>,
    current_lap_is_valid: Option<bool>,
    previous_lap_was_valid: Option<bool>,
    lap_time_previous: Option<Seconds>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    telemetry: Option<RawTelemetry>,
    #[serde(default)]
    disconnect: bool,
}

fn gear(g: Option<GearValue>) -> Result<i8, WireError> {
    match g {
        None => Ok(0),
        Some(GearValue::Num(n)) => Ok(n.clamp(-1, 12) as i8),
        Some(GearValue::Text(s)) => match s.trim() {
            "" | "N" | "n" => Ok(0),
            "R" | "r" => Ok(-1),
            other => other
                .parse::<i8>()
                .map_err(|_| WireError::Invalid { field: "Gear", value: other.to_string() }),
        },
    }
}

/// Accepts plain seconds or `[[hh:]mm:]ss.fff`.
fn seconds(v: Option<Seconds>, field: &'static str) -> Result<Option<f64>, WireError> {
    match v {
        None => Ok(None),
        Some(Seconds::Num(n)) => Ok(Some(n)),
        Some(Seconds::Text(s)) => {
            let mut total = 0.0;
            for part in s.trim().split(':') {
                let x: f64 = part
                    .parse()
                    .map_err(|_| WireError::Invalid { field, value: s.clone() })?;
                total = total * 60.0 + x;
            }
            Ok(Some(total))
        }
    }
}

/// Normalizes a pedal reading to a 0..=1 fraction.
///
/// Readings in `0..=1` are fractions, so exactly `1` is a fully pressed
/// pedal. Readings above `1` are percentages and saturate at `100`. A sender
/// using percentages therefore cannot express anything between 0% and 1%.
/// Missing, negative and non-finite readings are released.
fn pedal(v: Option<f64>) -> f64 {
    match v {
        Some(x) if !x.is_finite() => 0.0,
        Some(x) if x > 1.0 => (x / 100.0).min(1.0),
        Some(x) if x > 0.0 => x,
        _ => 0.0,
    }
}

/// Decodes one inbound payload. An empty payload or `{"disconnect": true}`
/// ends the session.
pub fn decode_inbound(payload: &[u8]) -> Result<Inbound, WireError> {
    if payload.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Inbound::Disconnect);
    }
    let env: Envelope = serde_json::from_slice(payload)?;
    if env.disconnect {
        return Ok(Inbound::Disconnect);
    }
    let raw = env.telemetry.ok_or(WireError::Missing("telemetry"))?;
    let time_ms = env.time.ok_or(WireError::Missing("time"))?;
    let distance_m = raw.distance_round_track.ok_or(WireError::Missing("DistanceRoundTrack"))?;
    let speed_ms = raw.speed_ms.ok_or(WireError::Missing("SpeedMs"))?;
    if !distance_m.is_finite() || !speed_ms.is_finite() {
        return Err(WireError::Invalid { field: "DistanceRoundTrack", value: distance_m.to_string() });
    }

    Ok(Inbound::Telemetry(TelemetryFrame {
        time_ms,
        distance_m,
        speed_ms,
        throttle: pedal(raw.throttle),
        brake: pedal(raw.brake),
        gear: gear(raw.gear)?,
        current_lap: raw.current_lap.unwrap_or(0),
        current_lap_time_s: seconds(raw.current_lap_time, "CurrentLapTime")?.unwrap_or(0.0),
        current_lap_is_valid: raw.current_lap_is_valid.unwrap_or(true),
        previous_lap_was_valid: raw.previous_lap_was_valid,
        lap_time_previous_s: seconds(raw.lap_time_previous, "LapTimePrevious")?,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct OutTelemetry {
    distance_round_track: f64,
    speed_ms: f64,
    throttle: f64,
    brake: f64,
    gear: i8,
    current_lap: u32,
    current_lap_time: f64,
    current_lap_is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_lap_was_valid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lap_time_previous: Option<f64>,
}

/// Encodes a frame in the inbound wire shape; used by replay tools and tests.
pub fn encode_telemetry(frame: &TelemetryFrame) -> Result<String, WireError> {
    let t = OutTelemetry {
        distance_round_track: frame.distance_m,
        speed_ms: frame.speed_ms,
        throttle: frame.throttle,
        brake: frame.brake,
        gear: frame.gear,
        current_lap: frame.current_lap,
        current_lap_time: frame.current_lap_time_s,
        current_lap_is_valid: frame.current_lap_is_valid,
        previous_lap_was_valid: frame.previous_lap_was_valid,
        lap_time_previous: frame.lap_time_previous_s,
    };
    Ok(serde_json::to_string(&serde_json::json!({ "time": frame.time_ms, "telemetry": t }))?)
}

pub fn encode_response(response: &Response) -> Result<String, WireError> {
    Ok(serde_json::to_string(response)?)
}

pub fn decode_response(payload: &[u8]) -> Result<Response, WireError> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_topic() {
        let key = parse_topic("crewchief/jim/17/iRacing/spa/gt3/Race", Some("crewchief")).unwrap();
        assert_eq!(key.driver, "jim");
        assert_eq!(key.session_id, "17");
        assert_eq!(key.session_type, "Race");

        let key = parse_topic("a/b/jim/17/iRacing/spa/gt3/Race", Some("a/b")).unwrap();
        assert_eq!(key.game, "iRacing");

        assert!(matches!(parse_topic("crewchief/jim/17", None), Err(WireError::Topic(_))));
        assert!(matches!(
            parse_topic("other/jim/17/iRacing/spa/gt3/Race", Some("crewchief")),
            Err(WireError::Prefix { .. })
        ));
        assert_eq!(telemetry_topic("crewchief/", &key), "crewchief/jim/17/iRacing/spa/gt3/Race");
    }

    #[test]
    fn test_decode_telemetry() {
        let payload = br#"{"time": 1700000000000, "telemetry": {
            "DistanceRoundTrack": 812.4, "SpeedMs": 41.2, "Throttle": 0, "Brake": 87,
            "Gear": "3", "CurrentLap": 4, "CurrentLapTime": "00:01:02.500",
            "CurrentLapIsValid": true, "PreviousLapWasValid": false, "LapTimePrevious": 93.1,
            "Rpms": 7100}}"#;
        let Inbound::Telemetry(f) = decode_inbound(payload).unwrap() else {
            panic!("expected telemetry");
        };
        assert_eq!(f.meters(), 812);
        assert!((f.brake - 0.87).abs() < 1e-9);
        assert_eq!(f.gear, 3);
        assert!((f.current_lap_time_s - 62.5).abs() < 1e-9);
        assert_eq!(f.previous_lap_was_valid, Some(false));
        assert_eq!(f.lap_time_previous_s, Some(93.1));
    }

    #[test]
    fn test_missing_distance_is_rejected() {
        let payload = br#"{"time": 1, "telemetry": {"SpeedMs": 3.0}}"#;
        assert!(matches!(decode_inbound(payload), Err(WireError::Missing("DistanceRoundTrack"))));
        assert!(decode_inbound(b"{not json").is_err());
        let payload = br#"{"time": 1, "telemetry": {"DistanceRoundTrack": 1.0, "SpeedMs": 3.0, "Gear": "X"}}"#;
        assert!(matches!(decode_inbound(payload), Err(WireError::Invalid { field: "Gear", .. })));
    }

    #[test]
    fn test_pedal_units() {
        assert_eq!(pedal(Some(1.0)), 1.0);
        assert_eq!(pedal(Some(0.4)), 0.4);
        assert!((pedal(Some(40.0)) - 0.4).abs() < 1e-9);
        assert_eq!(pedal(Some(100.0)), 1.0);
        assert_eq!(pedal(Some(250.0)), 1.0);
        assert_eq!(pedal(Some(-3.0)), 0.0);
        assert_eq!(pedal(Some(f64::NAN)), 0.0);
        assert_eq!(pedal(None), 0.0);

        let payload = br#"{"time": 1, "telemetry": {"DistanceRoundTrack": 5.0, "SpeedMs": 20.0, "Throttle": 1, "Brake": 1}}"#;
        let Inbound::Telemetry(f) = decode_inbound(payload).unwrap() else { panic!() };
        assert_eq!((f.throttle, f.brake), (1.0, 1.0));
    }

    #[test]
    fn test_disconnect() {
        assert_eq!(decode_inbound(b"").unwrap(), Inbound::Disconnect);
        assert_eq!(decode_inbound(br#"{"disconnect": true}"#).unwrap(), Inbound::Disconnect);
    }

    #[test]
    fn test_gear_text() {
        let payload = br#"{"time": 1, "telemetry": {"DistanceRoundTrack": 1.0, "SpeedMs": 0.0, "Gear": "R"}}"#;
        let Inbound::Telemetry(f) = decode_inbound(payload).unwrap() else { panic!() };
        assert_eq!(f.gear, -1);
        assert!(f.current_lap_is_valid);
    }

    #[test]
    fn test_encoded_frame_decodes() {
        let frame = TelemetryFrame {
            time_ms: 5,
            distance_m: 100.5,
            speed_ms: 30.0,
            throttle: 0.5,
            brake: 0.25,
            gear: 4,
            current_lap: 2,
            current_lap_time_s: 12.0,
            current_lap_is_valid: true,
            previous_lap_was_valid: None,
            lap_time_previous_s: Some(90.0),
        };
        let s = encode_telemetry(&frame).unwrap();
        assert_eq!(decode_inbound(s.as_bytes()).unwrap(), Inbound::Telemetry(frame));
    }

    #[test]
    fn test_response_payload() {
        let r = Response::at("brake", 7, 450.0, Some(500.0));
        let s = encode_response(&r).unwrap();
        assert_eq!(decode_response(s.as_bytes()).unwrap(), r);
    }
}
