//! feldfunk-voice – Sprach-Multiplexer fuer P2P-Spielrunden
//!
//! Verbindet die Codec-Schicht mit einem beliebigen Nachrichten-Transport.
//!
//! ## Module
//! - [`multiplexer`] – Protokoll-Endpunkt (HANDSHAKE/START/DATA/STOP/LOSS)
//! - [`jitter`] – Sequenz-Einordnung und Verlustzaehlung pro Sprecher
//! - [`session`] – Eingehender Strom: Jitter -> Decoder -> Wiedergabe
//! - [`route`] – Sprechziel (gestoppt, Team, global, Kanal)
//! - [`transport`] – Schnittstelle zum Peer-Netzwerk
//! - [`loopback`] – In-Prozess-Netz mit Verlust- und Umordnungs-Simulation
//! - [`kontext`] – Codec-Fabrik, Metriken und Umgebungseffekte
//! - [`config`] – Knoten-Konfiguration

pub mod config;
pub mod error;
pub mod jitter;
pub mod kontext;
pub mod loopback;
pub mod multiplexer;
pub mod route;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testkit;

pub use config::VoiceConfig;
pub use error::{VoiceError, VoiceResult};
pub use jitter::PeerJitterStream;
pub use kontext::{CodecFabrik, OpusFabrik, VoiceKontext};
pub use loopback::{LoopbackNetz, LoopbackOptionen, LoopbackTransport};
pub use multiplexer::VoiceMultiplexer;
pub use route::RouteTarget;
pub use session::{PeerSession, SitzungsEnde};
pub use transport::{Transport, TransportEreignis};
