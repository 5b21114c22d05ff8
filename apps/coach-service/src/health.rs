//! Liveness and readiness probes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

#[derive(Default, Debug)]
pub struct Health {
    live: AtomicBool,
    ready: AtomicBool,
}

impl Health {
    pub fn set_live(&self, v: bool) {
        self.live.store(v, Ordering::SeqCst);
    }

    pub fn set_ready(&self, v: bool) {
        self.ready.store(v, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[derive(Serialize, Debug, PartialEq)]
pub struct Probe {
    pub ok: bool,
}

fn probe(ok: bool) -> (StatusCode, Json<Probe>) {
    let code = if ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(Probe { ok }))
}

pub async fn live(State(health): State<Arc<Health>>) -> (StatusCode, Json<Probe>) {
    probe(health.is_live())
}

pub async fn ready(State(health): State<Arc<Health>>) -> (StatusCode, Json<Probe>) {
    probe(health.is_ready())
}

pub fn router(health: Arc<Health>) -> Router {
    Router::new().route("/live", get(live)).route("/ready", get(ready)).with_state(health)
}

pub async fn serve(bind_addr: &str, health: Arc<Health>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "health endpoint listening");
    axum::serve(listener, router(health)).await?;
    Ok(())
}
