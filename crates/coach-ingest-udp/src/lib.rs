use anyhow::Context;
use bytes::Bytes;
use coach_ingest_core::*;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct UdpConfig {
    pub bind_addr: String,       // e.g. "0.0.0.0:20780"
    pub credentials: Option<Credentials>,
    pub max_datagram: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self { bind_addr: "0.0.0.0:20780".into(), credentials: None, max_datagram: 65_507 }
    }
}

/// Receives JSON [`Envelope`] datagrams.
pub struct UdpJsonSource {
    cfg: UdpConfig,
    socket: UdpSocket,
}

impl UdpJsonSource {
    pub async fn bind(cfg: UdpConfig) -> Result<Self, IngestError> {
        let socket = UdpSocket::bind(&cfg.bind_addr)
            .await
            .with_context(|| format!("bind {}", cfg.bind_addr))?;
        Ok(Self { cfg, socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, IngestError> {
        Ok(self.socket.local_addr()?)
    }
}

#[async_trait::async_trait]
impl TelemetrySource for UdpJsonSource {
    async fn run(&self, tx: InboundTx) -> Result<(), IngestError> {
        let mut buf = vec![0u8; self.cfg.max_datagram];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;
            let Some(msg) = parse_datagram(&buf[..len], self.cfg.credentials.as_ref()) else {
                debug!(%peer, len, "dropping datagram");
                continue;
            };
            if tx.send(msg).is_err() {
                return Err(IngestError::Msg("telemetry receiver dropped".into()));
            }
        }
    }
}

fn parse_datagram(buf: &[u8], credentials: Option<&Credentials>) -> Option<InboundMessage> {
    let env: Envelope = serde_json::from_slice(buf).ok()?;
    if let Some(creds) = credentials {
        if !creds.accepts(&env) {
            warn!(topic = %env.topic, "rejecting datagram with bad credentials");
            return None;
        }
    }
    let payload: Bytes = env.payload_bytes().ok()?;
    Some(InboundMessage { topic: env.topic, payload })
}

/// Sends responses as [`Envelope`] datagrams to a fixed address.
pub struct UdpPublisher {
    socket: UdpSocket,
    target: String,
}

impl UdpPublisher {
    pub async fn connect(target: &str) -> Result<Self, IngestError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await.context("bind publisher socket")?;
        Ok(Self { socket, target: target.to_string() })
    }
}

#[async_trait::async_trait]
impl ResponsePublisher for UdpPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), IngestError> {
        let payload = serde_json::from_str(payload).unwrap_or_else(|_| serde_json::Value::String(payload.to_string()));
        let env = Envelope { topic: topic.to_string(), payload, username: None, password: None };
        let bytes = serde_json::to_vec(&env).map_err(anyhow::Error::from)?;
        self.socket
            .send_to(&bytes, &self.target)
            .await
            .with_context(|| format!("send to {}", self.target))?;
        Ok(())
    }
}
