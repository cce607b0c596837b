//! Telemetry Ingestion & Analysis Engine
//!
//! Exposes every module for use by the `telemetry-engine` binary and by
//! integration tests. Collaborators (the message log, persistent store,
//! alert sink, notifier, derived-event publisher, model runtime) are
//! traits in [`collaborators`]; this crate ships in-memory fakes for
//! tests and the composition root in `main.rs` wires in real adapters.

pub mod alerts;
pub mod baseline;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod consumer;
pub mod emitter;
pub mod error;
pub mod events;
pub mod families;
pub mod graph;
pub mod idempotency;
pub mod metrics;
pub mod periodic;
pub mod rolling_window;
pub mod threshold;
