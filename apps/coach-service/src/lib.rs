//! Live coaching service: session orchestration around the coach engine.

pub mod config;
pub mod health;
pub mod lap;
pub mod reference;
pub mod session;
pub mod store;

pub use config::Config;
pub use health::Health;
pub use session::Orchestrator;
pub use store::{MemoryStore, Store};
