//! feldfunk-core – Gemeinsame Bausteine
//!
//! Dieses Crate stellt die Identifikationstypen und die lock-freie
//! [`StreamQueue`](stream::StreamQueue) bereit, ueber die alle Stufen der
//! Sprach-Pipeline (Aufnahme, Encoder, Netzwerk, Decoder, Wiedergabe)
//! ihre Daten weiterreichen.

pub mod stream;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use stream::{Abgriff, SchreibAbgriff, StreamQueue, StreamSink};
pub use types::{KanalId, PeerId};
