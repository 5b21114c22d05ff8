//! Session orchestration: demultiplexes the telemetry stream into one worker
//! per live session and runs the background duties around them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::Context;
use coach::{Coach, CoachConfig, CoachFilter, CoachState};
use coach_ingest_core::{channel, InboundMessage, InboundRx, ResponsePublisher, TelemetrySource};
use iox::Inbound;
use model::{SessionKey, TelemetryFrame};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::health::Health;
use crate::lap::{flush, LapBuffer, LapBuilder};
use crate::reference::ReferenceCache;
use crate::store::Store;

/// Messages a session worker acts on, in arrival order.
#[derive(Clone, Debug)]
pub enum Control {
    Frame(TelemetryFrame),
    Enable(String),
    Disable,
    /// Ends the worker after everything queued before it.
    Stop,
}

struct SessionHandle {
    tx: mpsc::UnboundedSender<Control>,
    /// Ends the worker at its next await, skipping queued controls.
    stop: watch::Sender<bool>,
    last_seen: Mutex<Instant>,
    task: JoinHandle<()>,
}

struct Shared {
    config: Config,
    coach_config: CoachConfig,
    store: Arc<dyn Store>,
    publisher: Arc<dyn ResponsePublisher>,
    references: ReferenceCache,
    sessions: RwLock<HashMap<SessionKey, SessionHandle>>,
    /// Tasks of sessions already removed from the map.
    retired: Mutex<Vec<JoinHandle<()>>>,
    laps: LapBuffer,
    health: Arc<Health>,
}

pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Shared {
    fn sender(self: &Arc<Self>, key: &SessionKey, rt: &tokio::runtime::Handle) -> mpsc::UnboundedSender<Control> {
        if let Some(h) = self.sessions.read().get(key) {
            *h.last_seen.lock() = Instant::now();
            return h.tx.clone();
        }
        let mut sessions = self.sessions.write();
        let h = sessions.entry(key.clone()).or_insert_with(|| {
            info!(session = %key, "session started");
            let (tx, rx) = mpsc::unbounded_channel();
            let (stop, stopped) = watch::channel(false);
            let worker = Worker::new(key.clone(), self.clone());
            SessionHandle { tx, stop, last_seen: Mutex::new(Instant::now()), task: rt.spawn(worker.run(rx, stopped)) }
        });
        h.tx.clone()
    }

    fn stop_session(&self, key: &SessionKey, why: &str) {
        let removed = self.sessions.write().remove(key);
        if let Some(h) = removed {
            info!(session = %key, why, "session stopped");
            let _ = h.stop.send(true);
            self.retired.lock().push(h.task);
        }
    }

    fn dispatch(self: &Arc<Self>, msg: InboundMessage, rt: &tokio::runtime::Handle) {
        let key = match iox::parse_topic(&msg.topic, Some(&self.config.stream.topic_prefix)) {
            Ok(k) => k,
            Err(e) => {
                debug!(error = %e, "dropping message");
                return;
            }
        };
        match iox::decode_inbound(&msg.payload) {
            Ok(Inbound::Disconnect) => self.stop_session(&key, "disconnect"),
            Ok(Inbound::Telemetry(frame)) => {
                if self.sender(&key, rt).send(Control::Frame(frame)).is_err() {
                    debug!(session = %key, "worker gone, frame dropped");
                }
            }
            Err(e) => debug!(session = %key, error = %e, "dropping bad frame"),
        }
    }

    fn demux(self: Arc<Self>, rx: InboundRx, rt: tokio::runtime::Handle) {
        for msg in rx.iter() {
            self.dispatch(msg, &rt);
        }
        debug!("telemetry stream closed");
    }

    async fn poll_coaches(&self) {
        let snapshot: Vec<(String, mpsc::UnboundedSender<Control>)> = {
            let sessions = self.sessions.read();
            sessions.iter().map(|(k, h)| (k.driver.clone(), h.tx.clone())).collect()
        };
        let mut by_driver: BTreeMap<String, Vec<mpsc::UnboundedSender<Control>>> = BTreeMap::new();
        for (driver, tx) in snapshot {
            by_driver.entry(driver).or_default().push(tx);
        }
        for (driver, senders) in by_driver {
            let control = match self.store.coach_settings(&driver).await {
                Ok(Some(s)) if s.enabled => Control::Enable(s.app),
                Ok(_) => Control::Disable,
                Err(e) => {
                    warn!(%driver, error = %e, "reading coach settings failed");
                    continue;
                }
            };
            for tx in senders {
                let _ = tx.send(control.clone());
            }
        }
    }

    fn reap(&self) {
        let timeout = self.config.intervals.session_timeout();
        let stale: Vec<SessionKey> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, h)| h.last_seen.lock().elapsed() >= timeout)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            self.stop_session(&key, "inactive");
        }
        self.retired.lock().retain(|t| !t.is_finished());
    }

    /// Lets every live worker finish its queue, then waits for all of them.
    async fn shutdown_sessions(&self) {
        let handles: Vec<SessionHandle> = self.sessions.write().drain().map(|(_, h)| h).collect();
        let retired: Vec<JoinHandle<()>> = std::mem::take(&mut *self.retired.lock());
        for h in &handles {
            let _ = h.tx.send(Control::Stop);
        }
        // the stop senders stay alive until each worker has drained its queue
        let tasks = handles.into_iter().map(|h| (Some(h.stop), h.task));
        for (stop, task) in retired.into_iter().map(|t| (None, t)).chain(tasks) {
            if let Err(e) = task.await {
                warn!(error = %e, "session worker failed");
            }
            drop(stop);
        }
    }
}

impl Orchestrator {
    pub fn new(config: Config, store: Arc<dyn Store>, publisher: Arc<dyn ResponsePublisher>, health: Arc<Health>) -> Self {
        let references = ReferenceCache::new(store.clone(), Default::default());
        Self {
            shared: Arc::new(Shared {
                config,
                coach_config: CoachConfig::default(),
                store,
                publisher,
                references,
                sessions: RwLock::new(HashMap::new()),
                retired: Mutex::new(Vec::new()),
                laps: LapBuffer::default(),
                health,
            }),
        }
    }

    pub fn session_count(&self) -> usize {
        self.shared.sessions.read().len()
    }

    /// Runs until `source` ends, then stops every session and writes the
    /// remaining laps.
    pub async fn run<S: TelemetrySource + 'static>(&self, source: S) -> anyhow::Result<()> {
        let shared = &self.shared;
        shared.health.set_live(true);

        let (tx, rx) = channel();
        let listener = tokio::spawn(async move { source.run(tx).await });

        let rt = tokio::runtime::Handle::current();
        let demux = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("coach-demux".into())
                .spawn(move || shared.demux(rx, rt))
                .context("spawn demux thread")?
        };

        let intervals = &shared.config.intervals;
        let (poll_every, flush_every, reap_every) = (intervals.coach_poll(), intervals.lap_flush(), intervals.reap());
        let background = [
            {
                let shared = shared.clone();
                tokio::spawn(async move {
                    let mut every = tokio::time::interval(poll_every);
                    loop {
                        every.tick().await;
                        shared.poll_coaches().await;
                    }
                })
            },
            {
                let shared = shared.clone();
                tokio::spawn(async move {
                    let mut every = tokio::time::interval(flush_every);
                    loop {
                        every.tick().await;
                        let saved = flush(&shared.laps, &*shared.store).await;
                        if saved > 0 {
                            debug!(saved, "laps flushed");
                        }
                    }
                })
            },
            {
                let shared = shared.clone();
                tokio::spawn(async move {
                    let mut every = tokio::time::interval(reap_every);
                    loop {
                        every.tick().await;
                        shared.reap();
                    }
                })
            },
        ];
        shared.health.set_ready(true);
        info!("coach service running");

        let result = match listener.await {
            Ok(r) => r.map_err(anyhow::Error::from),
            Err(e) => Err(anyhow::Error::from(e).context("telemetry listener")),
        };
        shared.health.set_ready(false);
        if let Err(e) = &result {
            warn!(error = %e, "telemetry listener stopped");
        }

        if tokio::task::spawn_blocking(move || demux.join()).await?.is_err() {
            warn!("demux thread panicked");
        }
        for task in &background {
            task.abort();
        }
        shared.shutdown_sessions().await;
        let saved = flush(&shared.laps, &*shared.store).await;
        if !shared.laps.is_empty() {
            warn!(pending = shared.laps.len(), "laps left unsaved");
        }
        info!(saved, "coach service stopped");
        result
    }
}

/// Owns one session's coach and lap builder.
struct Worker {
    key: SessionKey,
    shared: Arc<Shared>,
    coach: Coach,
    laps: LapBuilder,
    topic: String,
    status: Option<String>,
    track_length: Option<u32>,
}

impl Worker {
    fn new(key: SessionKey, shared: Arc<Shared>) -> Self {
        let topic = key.response_topic(&shared.config.stream.response_prefix);
        Self {
            coach: Coach::new(shared.coach_config.clone()),
            laps: LapBuilder::new(key.clone()),
            key,
            shared,
            topic,
            status: None,
            track_length: None,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Control>, mut stopped: watch::Receiver<bool>) {
        tokio::select! {
            biased;
            _ = stopped.changed() => {
                debug!(session = %self.key, "worker stopped before starting");
                return;
            }
            _ = self.start() => {}
        }

        loop {
            let control = tokio::select! {
                biased;
                _ = stopped.changed() => break,
                control = rx.recv() => control,
            };
            let Some(control) = control else { break };
            match control {
                Control::Frame(frame) => self.on_frame(frame).await,
                Control::Enable(app) => {
                    tokio::select! {
                        biased;
                        _ = stopped.changed() => break,
                        _ = self.enable(app) => {}
                    }
                }
                Control::Disable => self.disable().await,
                Control::Stop => break,
            }
        }
        debug!(session = %self.key, "worker finished");
    }

    /// Reads what the session needs from the store before the first frame.
    async fn start(&mut self) {
        match self.shared.store.track_length(&self.key.track_key()).await {
            Ok(l) => self.track_length = l,
            Err(e) => warn!(session = %self.key, error = %e, "reading track length failed"),
        }
        match self.shared.store.coach_settings(&self.key.driver).await {
            Ok(Some(s)) if s.enabled => self.enable(s.app).await,
            Ok(_) => {}
            Err(e) => warn!(session = %self.key, error = %e, "reading coach settings failed"),
        }
    }

    async fn on_frame(&mut self, frame: TelemetryFrame) {
        let known = self.coach.reference().map(|r| r.track_length()).or(self.track_length);
        if let Some(lap) = self.laps.feed(&frame, known) {
            self.shared.laps.push(lap);
        }

        let tick = self.coach.notify(&frame);
        for response in self.coach.take_responses() {
            let payload = match iox::encode_response(&response) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "encoding response failed");
                    continue;
                }
            };
            if let Err(e) = self.shared.publisher.publish(&self.topic, &payload).await {
                warn!(topic = %self.topic, error = %e, "publishing response failed");
            }
        }
        if tick.work_pending {
            self.coach.process_pending();
        }
    }

    async fn enable(&mut self, app: String) {
        let filter = CoachFilter { driver: self.key.driver.clone(), track: self.key.track_key(), app };
        let changed = self.coach.set_filter(filter);
        if changed {
            self.report("initializing", None).await;
        } else if self.coach.state() != CoachState::Initializing {
            return;
        }
        let reference = self.shared.references.get(&self.key.track_key()).await;
        match self.coach.initialize(reference) {
            Ok(()) => self.report("ready", None).await,
            Err(e) => {
                let text = e.to_string();
                self.report(&text, Some(&text)).await;
            }
        }
    }

    async fn disable(&mut self) {
        if self.coach.state() == CoachState::Uninitialized {
            return;
        }
        self.coach.disable();
        self.report("disabled", None).await;
    }

    /// Writes the coach status when it differs from the last one written.
    async fn report(&mut self, status: &str, error: Option<&str>) {
        if self.status.as_deref() == Some(status) {
            return;
        }
        match self.shared.store.update_coach_status(&self.key.driver, status, error).await {
            Ok(()) => self.status = Some(status.to_string()),
            Err(e) => warn!(driver = %self.key.driver, error = %e, "writing coach status failed"),
        }
    }
}
