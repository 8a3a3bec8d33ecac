//! Fehlertypen fuer Codec und Wiedergabe

use thiserror::Error;

/// Alle moeglichen Fehler des Audio-Crates
#[derive(Debug, Error)]
pub enum AudioError {
    /// Der native Codec hat einen Fehler gemeldet. Die Instanz ist danach
    /// unbrauchbar und muss verworfen werden.
    #[error("Codec-Fehler: {0}")]
    CodecFehler(String),

    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Codec bereits geschlossen")]
    Geschlossen,
}

impl AudioError {
    /// Ist die betroffene Codec-Instanz nicht mehr verwendbar?
    pub fn ist_fatal(&self) -> bool {
        matches!(self, AudioError::CodecFehler(_) | AudioError::Geschlossen)
    }
}

pub type AudioResult<T> = Result<T, AudioError>;
