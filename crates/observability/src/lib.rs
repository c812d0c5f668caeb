//! # pulse-observability
//!
//! Observability-Crate fuer die Pulse-Voice-Session:
//! - Structured Logging (Text oder JSON) via tracing-subscriber
//! - Prometheus-kompatible Session-Metriken

pub mod logging;
pub mod metrics;

pub use logging::logging_initialisieren;
pub use metrics::SessionMetriken;
