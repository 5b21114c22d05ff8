//! Transport model and traits used by the coach service

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One message as delivered by the pub/sub transport.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self { topic: topic.into(), payload: payload.into() }
    }
}

/// One message handed to a [`ResponsePublisher`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
}

/// Datagram framing: a topic plus the JSON payload, optionally carrying
/// credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub topic: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Envelope {
    /// Payload bytes as the wire codec expects them. A JSON string payload is
    /// taken as already-encoded JSON; `null` becomes an empty payload.
    pub fn payload_bytes(&self) -> Result<Bytes, IngestError> {
        match &self.payload {
            serde_json::Value::Null => Ok(Bytes::new()),
            serde_json::Value::String(s) => Ok(Bytes::from(s.clone().into_bytes())),
            v => Ok(Bytes::from(serde_json::to_vec(v).map_err(anyhow::Error::from)?)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn accepts(&self, env: &Envelope) -> bool {
        env.username.as_deref() == Some(self.username.as_str()) && env.password.as_deref() == Some(self.password.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("{0}")]
    Msg(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for IngestError {
    fn from(e: std::io::Error) -> Self {
        IngestError::Other(e.into())
    }
}

pub type InboundTx = crossbeam_channel::Sender<InboundMessage>;
pub type InboundRx = crossbeam_channel::Receiver<InboundMessage>;

/// Trait for any live telemetry connector
#[async_trait::async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn run(&self, tx: InboundTx) -> Result<(), IngestError>;
}

/// Sends coach responses back over the transport.
#[async_trait::async_trait]
pub trait ResponsePublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), IngestError>;
}

pub fn channel() -> (InboundTx, InboundRx) {
    crossbeam_channel::unbounded()
}

/// In-process source fed through a [`MemoryFeed`]; used by tests and replay.
pub struct MemorySource {
    rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<InboundMessage>>,
}

#[derive(Clone)]
pub struct MemoryFeed {
    tx: tokio::sync::mpsc::UnboundedSender<InboundMessage>,
}

impl MemoryFeed {
    pub fn send(&self, msg: InboundMessage) -> Result<(), IngestError> {
        self.tx.send(msg).map_err(|_| IngestError::Msg("memory source stopped".into()))
    }
}

pub fn memory_source() -> (MemoryFeed, MemorySource) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    (MemoryFeed { tx }, MemorySource { rx: tokio::sync::Mutex::new(rx) })
}

#[async_trait::async_trait]
impl TelemetrySource for MemorySource {
    /// Forwards until every feed handle is dropped.
    async fn run(&self, tx: InboundTx) -> Result<(), IngestError> {
        let mut rx = self.rx.lock().await;
        while let Some(msg) = rx.recv().await {
            if tx.send(msg).is_err() {
                return Err(IngestError::Msg("telemetry receiver dropped".into()));
            }
        }
        Ok(())
    }
}

/// Publisher that records everything it is given.
#[derive(Default)]
pub struct MemoryPublisher {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl MemoryPublisher {
    pub fn published(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait::async_trait]
impl ResponsePublisher for MemoryPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), IngestError> {
        self.sent.lock().push(OutboundMessage { topic: topic.to_string(), payload: payload.to_string() });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_payloads() {
        let env: Envelope = serde_json::from_str(r#"{"topic": "t/a", "payload": {"time": 1}}"#).unwrap();
        assert_eq!(&env.payload_bytes().unwrap()[..], br#"{"time":1}"#);

        let env: Envelope = serde_json::from_str(r#"{"topic": "t/a", "payload": "{\"time\": 2}"}"#).unwrap();
        assert_eq!(&env.payload_bytes().unwrap()[..], br#"{"time": 2}"#);

        let env: Envelope = serde_json::from_str(r#"{"topic": "t/a"}"#).unwrap();
        assert!(env.payload_bytes().unwrap().is_empty());
    }

    #[test]
    fn test_credentials() {
        let creds = Credentials { username: "coach".into(), password: "pw".into() };
        let mut env = Envelope { topic: "t".into(), payload: serde_json::Value::Null, username: None, password: None };
        assert!(!creds.accepts(&env));
        env.username = Some("coach".into());
        env.password = Some("pw".into());
        assert!(creds.accepts(&env));
    }

    #[tokio::test]
    async fn test_memory_source_forwards_in_order() {
        let (feed, source) = memory_source();
        let (tx, rx) = channel();
        feed.send(InboundMessage::new("a", "1")).unwrap();
        feed.send(InboundMessage::new("a", "2")).unwrap();
        drop(feed);
        source.run(tx).await.unwrap();
        let got: Vec<_> = rx.try_iter().map(|m| m.payload).collect();
        assert_eq!(got, vec![Bytes::from("1"), Bytes::from("2")]);
    }

    #[tokio::test]
    async fn test_memory_publisher_records() {
        let p = MemoryPublisher::default();
        p.publish("coach/jim", "{}").await.unwrap();
        assert_eq!(p.published()[0].topic, "coach/jim");
    }
}
