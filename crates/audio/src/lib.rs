//! feldfunk-audio – Codec-Schicht der Sprach-Pipeline
//!
//! - Opus-Backends hinter [`EncoderBackend`] / [`DecoderBackend`]
//! - [`VoiceEncoder`]: Batches beliebiger Laenge -> 20-ms-Frames, mit
//!   Rest-Pufferung und Komplexitaets-Drossel
//! - [`VoiceDecoder`]: Frames -> Samples, mit FEC/DRED/PLC-Verdeckung
//! - [`EncoderTuning`]: Encoder-Parameter aus gemessener Netzqualitaet
//! - [`PlaybackBuffer`]: Wiedergabepuffer mit Bereit-/Trocken-Zustand
//! - Umgebungsmodifikatoren fuer dekodiertes Audio

pub mod codec;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod modifier;
pub mod playback;
pub mod throttle;
pub mod tuning;

// Bequeme Re-Exporte der wichtigsten Typen
pub use codec::{DecoderBackend, EncoderBackend, OpusDecoderBackend, OpusEncoderBackend};
pub use decoder::VoiceDecoder;
pub use encoder::VoiceEncoder;
pub use error::{AudioError, AudioResult};
pub use modifier::{stoerrauschen, Umgebungsmodifikator};
pub use playback::PlaybackBuffer;
pub use throttle::ComplexityThrottle;
pub use tuning::EncoderTuning;
