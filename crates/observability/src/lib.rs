//! # feldfunk-observability
//!
//! Observability-Crate fuer Feldfunk:
//! - Prometheus-Metriken der Sprach-Pipeline ([`VoiceMetriken`])
//! - Structured Logging (Text oder JSON) via tracing-subscriber

pub mod logging;
pub mod metrics;

pub use logging::logging_initialisieren;
pub use metrics::VoiceMetriken;
