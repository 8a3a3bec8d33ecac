//! feldfunk-protocol – Protokoll-Definitionen
//!
//! - [`voice`] – Binaeres Wire-Format der Sprachnachrichten (HANDSHAKE,
//!   START, DATA, STOP, LOSS)
//! - [`codec`] – Opus-Konfiguration (mono, 20-ms-Frames)
//! - [`quality`] – Aggregierte Netzqualitaet

pub mod codec;
pub mod quality;
pub mod voice;

pub use codec::{FecModus, OpusConfig};
pub use quality::{NetworkQuality, PeerStatistik};
pub use voice::{Befehl, Frame, VoiceNachricht, PROTOKOLL_VERSION};
