use std::sync::Arc;
use std::time::{Duration, Instant};

use coach_ingest_core::{memory_source, InboundMessage, MemoryPublisher};
use coach_service::config::IntervalConfig;
use coach_service::store::CoachSettings;
use coach_service::{Config, Health, MemoryStore, Orchestrator, Store};
use model::{CompletedLap, Lap, SegmentRing, SessionKey, TelemetryFrame, TelemetryPoint, TrackKey};

const TRACK: u32 = 3600;

fn track() -> TrackKey {
    TrackKey { game: "iRacing".into(), car: "gt3".into(), track: "spa".into() }
}

fn session() -> SessionKey {
    session_of("jim")
}

fn session_of(driver: &str) -> SessionKey {
    SessionKey {
        driver: driver.into(),
        session_id: "1".into(),
        game: "iRacing".into(),
        track: "spa".into(),
        car: "gt3".into(),
        session_type: "Race".into(),
    }
}

/// Reference lap with one braking zone at 800-850 m.
fn reference_lap(n: u32, offset: f64) -> Lap {
    let mut lap = Lap::new(&track(), n);
    let (s, e) = (800.0 + offset, 850.0 + offset);
    let mut t = 0.0;
    let mut d = 0.5;
    while d < TRACK as f64 {
        let mut brake = 0.0;
        let mut speed: f64 = 60.0;
        if d >= s && d <= e {
            brake = 0.9;
            speed = 60.0 - 35.0 * (d - s) / (e - s);
        } else if d > e && d < e + 200.0 {
            speed = 25.0 + 35.0 * (d - e) / 200.0;
        }
        lap.points.push(TelemetryPoint {
            t_ms: t,
            distance_m: d,
            speed_ms: speed,
            throttle: if brake > 0.0 { 0.0 } else { 1.0 },
            brake,
            gear: if speed < 35.0 { 3 } else { 5 },
        });
        t += 2.0 / speed * 1000.0;
        d += 2.0;
    }
    lap.total_time_ms = t as u64;
    lap
}

fn seeded_store(app: &str) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::default());
    store.add_reference_laps(vec![reference_lap(1, -2.0), reference_lap(2, 0.0), reference_lap(3, 2.0)]);
    store.set_track_length(&track(), TRACK);
    store.set_coach_settings("jim", CoachSettings { enabled: true, app: app.into() });
    store
}

fn live_frame(i: i64) -> TelemetryFrame {
    lap_frame(1, i)
}

/// The `i`-th tick of lap `lap`, 10 m apart at 50 m/s.
fn lap_frame(lap: u32, i: i64) -> TelemetryFrame {
    TelemetryFrame {
        time_ms: ((lap as i64 - 1) * 360 + i) * 200,
        distance_m: i as f64 * 10.0,
        speed_ms: 50.0,
        throttle: 1.0,
        gear: 5,
        current_lap: lap,
        current_lap_is_valid: true,
        ..Default::default()
    }
}

fn frame_message(topic: &str, frame: &TelemetryFrame) -> InboundMessage {
    InboundMessage::new(topic, iox::encode_telemetry(frame).unwrap())
}

/// Config with every background duty on a one second period.
fn quick_config(session_timeout_secs: u64) -> Config {
    Config {
        intervals: IntervalConfig { coach_poll_secs: 1, lap_flush_secs: 1, session_timeout_secs, reap_secs: 1 },
        ..Default::default()
    }
}

async fn wait_until(what: &str, done: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(20);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn brake_cues(publisher: &MemoryPublisher) -> usize {
    publisher
        .published()
        .iter()
        .filter_map(|m| iox::decode_response(m.payload.as_bytes()).ok())
        .filter(|r| r.message.ends_with("brake"))
        .count()
}

/// One full lap, the first tick of the next one, then a disconnect.
fn drive(topic: &str) -> Vec<InboundMessage> {
    let mut msgs: Vec<InboundMessage> = (0..360)
        .map(|i| InboundMessage::new(topic, iox::encode_telemetry(&live_frame(i)).unwrap()))
        .collect();
    let next = TelemetryFrame {
        time_ms: 72_000,
        distance_m: 5.0,
        speed_ms: 50.0,
        throttle: 1.0,
        gear: 5,
        current_lap: 2,
        current_lap_is_valid: true,
        previous_lap_was_valid: Some(true),
        lap_time_previous_s: Some(72.0),
        ..Default::default()
    };
    msgs.push(InboundMessage::new(topic, iox::encode_telemetry(&next).unwrap()));
    msgs.push(InboundMessage::new(topic, ""));
    msgs
}

async fn run_session(store: Arc<MemoryStore>, msgs: Vec<InboundMessage>) -> (Arc<MemoryPublisher>, Arc<Health>) {
    let publisher = Arc::new(MemoryPublisher::default());
    let health = Arc::new(Health::default());
    let orchestrator = Orchestrator::new(Config::default(), store, publisher.clone(), health.clone());

    let (feed, source) = memory_source();
    for m in msgs {
        feed.send(m).unwrap();
    }
    drop(feed);
    tokio::time::timeout(Duration::from_secs(60), orchestrator.run(source))
        .await
        .expect("orchestrator did not stop")
        .unwrap();
    assert_eq!(orchestrator.session_count(), 0);
    (publisher, health)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_brake_coach_end_to_end() {
    let store = seeded_store("brake");
    let topic = iox::telemetry_topic("telemetry", &session());
    let (publisher, health) = run_session(store.clone(), drive(&topic)).await;

    let sent = publisher.published();
    assert!(!sent.is_empty());
    assert!(sent.iter().all(|m| m.topic == "coach/jim"));
    let responses: Vec<model::Response> = sent.iter().map(|m| iox::decode_response(m.payload.as_bytes()).unwrap()).collect();
    let brake = responses
        .iter()
        .find(|r| r.message.ends_with("brake"))
        .unwrap_or_else(|| panic!("no brake countdown in {:?}", responses));
    let finish = brake.max_distance.unwrap();
    assert!((780.0..=830.0).contains(&finish), "{}", finish);
    assert!(brake.distance.unwrap() < finish);
    assert_eq!(brake.priority, 8);

    let laps = store.saved_laps();
    assert_eq!(laps.len(), 1);
    assert_eq!(laps[0].number, 1);
    assert_eq!(laps[0].time_ms, 72_000);
    assert!(laps[0].valid);
    assert_eq!(laps[0].driver, "jim");

    assert_eq!(store.status("jim").unwrap().status, "ready");
    assert!(store.has_segments(&track()));
    assert!(health.is_live());
    assert!(!health.is_ready());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_app_reports_status() {
    let store = seeded_store("pitwall");
    let topic = iox::telemetry_topic("telemetry", &session());
    let (publisher, _) = run_session(store.clone(), drive(&topic)).await;

    assert!(publisher.published().is_empty());
    let status = store.status("jim").unwrap();
    assert!(status.status.contains("pitwall"), "{}", status.status);
    assert_eq!(status.error.as_deref(), Some(status.status.as_str()));
    assert_eq!(store.saved_laps().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_foreign_topics_and_bad_frames_are_dropped() {
    let store = seeded_store("brake");
    let msgs = vec![
        InboundMessage::new("other/jim/1/iRacing/spa/gt3/Race", iox::encode_telemetry(&live_frame(1)).unwrap()),
        InboundMessage::new("telemetry/jim/1", iox::encode_telemetry(&live_frame(1)).unwrap()),
        InboundMessage::new(iox::telemetry_topic("telemetry", &session()), "{not json"),
    ];
    let (publisher, _) = run_session(store.clone(), msgs).await;
    assert!(publisher.published().is_empty());
    assert!(store.saved_laps().is_empty());
    assert!(store.status("jim").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disabled_coach_still_records_laps() {
    let store = seeded_store("brake");
    store.set_coach_settings("jim", CoachSettings { enabled: false, app: "brake".into() });
    let topic = iox::telemetry_topic("telemetry", &session());
    let (publisher, _) = run_session(store.clone(), drive(&topic)).await;

    assert!(publisher.published().is_empty());
    assert!(store.status("jim").is_none());
    let laps = store.saved_laps();
    assert_eq!(laps.len(), 1);
    assert!(laps[0].valid);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_silent_session_is_reaped_while_stream_stays_open() {
    let store = seeded_store("brake");
    let publisher = Arc::new(MemoryPublisher::default());
    let orchestrator = Orchestrator::new(quick_config(1), store.clone(), publisher, Arc::new(Health::default()));
    let (feed, source) = memory_source();
    let topic = iox::telemetry_topic("telemetry", &session());

    let driver = async {
        feed.send(frame_message(&topic, &live_frame(1))).unwrap();
        wait_until("session start", || orchestrator.session_count() == 1).await;
        wait_until("inactive session teardown", || orchestrator.session_count() == 0).await;

        // the same session comes back on its next frame
        feed.send(frame_message(&topic, &live_frame(2))).unwrap();
        wait_until("session restart", || orchestrator.session_count() == 1).await;
        drop(feed);
    };
    let (result, ()) = tokio::time::timeout(Duration::from_secs(60), async { tokio::join!(orchestrator.run(source), driver) })
        .await
        .expect("orchestrator did not stop");
    result.unwrap();
    assert_eq!(orchestrator.session_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_poller_turns_coach_on_and_off() {
    let store = seeded_store("brake");
    store.set_coach_settings("jim", CoachSettings { enabled: false, app: "brake".into() });
    let publisher = Arc::new(MemoryPublisher::default());
    let orchestrator = Orchestrator::new(quick_config(600), store.clone(), publisher.clone(), Arc::new(Health::default()));
    let (feed, source) = memory_source();
    let topic = iox::telemetry_topic("telemetry", &session());

    let driver = async {
        for i in 0..5 {
            feed.send(frame_message(&topic, &live_frame(i))).unwrap();
        }
        wait_until("session start", || orchestrator.session_count() == 1).await;
        assert!(store.status("jim").is_none());

        store.set_coach_settings("jim", CoachSettings { enabled: true, app: "brake".into() });
        wait_until("coach ready", || store.status("jim").is_some_and(|s| s.status == "ready")).await;
        for i in 5..360 {
            feed.send(frame_message(&topic, &live_frame(i))).unwrap();
        }
        wait_until("brake countdown", || brake_cues(&publisher) > 0).await;

        store.set_coach_settings("jim", CoachSettings { enabled: false, app: "brake".into() });
        wait_until("coach disabled", || store.status("jim").is_some_and(|s| s.status == "disabled")).await;
        for i in 0..360 {
            feed.send(frame_message(&topic, &lap_frame(2, i))).unwrap();
        }
        drop(feed);
    };
    let (result, ()) = tokio::time::timeout(Duration::from_secs(60), async { tokio::join!(orchestrator.run(source), driver) })
        .await
        .expect("orchestrator did not stop");
    result.unwrap();

    // the second lap ran with the coach off
    assert_eq!(brake_cues(&publisher), 1);
    let status = store.status("jim").unwrap();
    assert_eq!(status.status, "disabled");
    assert_eq!(status.error, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_session_does_not_affect_another() {
    let store = seeded_store("brake");
    store.set_coach_settings("ann", CoachSettings { enabled: true, app: "pitwall".into() });
    let jim = iox::telemetry_topic("telemetry", &session());
    let ann = iox::telemetry_topic("telemetry", &session_of("ann"));

    let mut msgs = Vec::new();
    for (a, b) in drive(&jim).into_iter().zip(drive(&ann)) {
        msgs.push(a);
        msgs.push(b);
    }
    let (publisher, _) = run_session(store.clone(), msgs).await;

    let sent = publisher.published();
    assert!(sent.iter().all(|m| m.topic == "coach/jim"), "{:?}", sent);
    assert!(brake_cues(&publisher) > 0);
    assert_eq!(store.status("jim").unwrap().status, "ready");
    let failed = store.status("ann").unwrap();
    assert!(failed.status.contains("pitwall"), "{}", failed.status);

    let mut drivers: Vec<String> = store.saved_laps().into_iter().map(|l| l.driver).collect();
    drivers.sort();
    assert_eq!(drivers, vec!["ann".to_string(), "jim".to_string()]);
}

/// Store whose reference laps never arrive.
struct StallingStore {
    inner: Arc<MemoryStore>,
}

#[async_trait::async_trait]
impl Store for StallingStore {
    async fn reference_segments(&self, track: &TrackKey) -> anyhow::Result<Option<SegmentRing>> {
        self.inner.reference_segments(track).await
    }

    async fn save_segments(&self, track: &TrackKey, ring: &SegmentRing) -> anyhow::Result<()> {
        self.inner.save_segments(track, ring).await
    }

    async fn reference_laps(&self, _track: &TrackKey) -> anyhow::Result<Vec<Lap>> {
        std::future::pending().await
    }

    async fn track_length(&self, track: &TrackKey) -> anyhow::Result<Option<u32>> {
        self.inner.track_length(track).await
    }

    async fn grow_track_length(&self, track: &TrackKey, length_m: u32) -> anyhow::Result<()> {
        self.inner.grow_track_length(track, length_m).await
    }

    async fn coach_settings(&self, driver: &str) -> anyhow::Result<Option<CoachSettings>> {
        self.inner.coach_settings(driver).await
    }

    async fn update_coach_status(&self, driver: &str, status: &str, error: Option<&str>) -> anyhow::Result<()> {
        self.inner.update_coach_status(driver, status, error).await
    }

    async fn save_lap(&self, lap: &CompletedLap) -> anyhow::Result<()> {
        self.inner.save_lap(lap).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_interrupts_stuck_initialization() {
    let memory = seeded_store("brake");
    let store = Arc::new(StallingStore { inner: memory.clone() });
    let publisher = Arc::new(MemoryPublisher::default());
    let orchestrator = Orchestrator::new(Config::default(), store, publisher.clone(), Arc::new(Health::default()));
    let (feed, source) = memory_source();
    let topic = iox::telemetry_topic("telemetry", &session());

    let driver = async {
        for i in 0..50 {
            feed.send(frame_message(&topic, &live_frame(i))).unwrap();
        }
        wait_until("initialization", || memory.status("jim").is_some_and(|s| s.status == "initializing")).await;
        feed.send(InboundMessage::new(&topic, "")).unwrap();
        wait_until("disconnect", || orchestrator.session_count() == 0).await;
        drop(feed);
    };
    let (result, ()) = tokio::time::timeout(Duration::from_secs(30), async { tokio::join!(orchestrator.run(source), driver) })
        .await
        .expect("stopped session kept the orchestrator waiting");
    result.unwrap();
    assert!(publisher.published().is_empty());
    assert!(memory.saved_laps().is_empty());
}
