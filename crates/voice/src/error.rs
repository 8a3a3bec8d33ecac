//! Fehlertypen des Multiplexers

use std::io;

use feldfunk_audio::AudioError;
use feldfunk_core::PeerId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoiceError {
    /// Encoder oder Decoder ist ausgefallen
    #[error(transparent)]
    Codec(#[from] AudioError),

    /// Nachricht liess sich nicht dekodieren
    #[error("Protokollfehler: {0}")]
    Protokoll(#[from] io::Error),

    #[error("{peer} spricht Protokollversion {version}, unterstuetzt bis {eigene}")]
    VersionInkompatibel {
        peer: PeerId,
        version: u16,
        eigene: u16,
    },
}

impl VoiceError {
    /// Muss der betroffene Strom abgebaut werden?
    pub fn erfordert_abbau(&self) -> bool {
        match self {
            VoiceError::Codec(e) => e.ist_fatal(),
            VoiceError::VersionInkompatibel { .. } => true,
            VoiceError::Protokoll(_) => false,
        }
    }
}

pub type VoiceResult<T> = Result<T, VoiceError>;
