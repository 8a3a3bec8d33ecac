//! Codec-Konfiguration fuer die Sprachuebertragung
//!
//! Definiert die Opus-Konfiguration, mit der Encoder und Decoder erstellt
//! werden. Uebertragen wird immer mono in 20-ms-Frames; Stereo und andere
//! Frame-Dauern sind als Werte bekannt, werden aber von
//! [`OpusConfig::validieren`] abgelehnt.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Opus-Konfiguration
// ---------------------------------------------------------------------------

/// Abtastrate fuer Opus
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleRate {
    /// 8 kHz – Schmalband
    Hz8000 = 8000,
    /// 16 kHz – Breitband
    Hz16000 = 16000,
    /// 24 kHz – Superbreitband
    Hz24000 = 24000,
    /// 48 kHz – Vollband, Standard fuer Feldfunk
    #[default]
    Hz48000 = 48000,
}

impl SampleRate {
    /// Abtastrate in Hertz
    pub fn hz(&self) -> u32 {
        *self as u32
    }
}

/// Anzahl der Audio-Kanaele
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelCount {
    #[default]
    Mono = 1,
    Stereo = 2,
}

/// Frame-Dauer in Millisekunden
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameSizeMs {
    Ms10 = 10,
    /// 20 ms – Standard
    #[default]
    Ms20 = 20,
    Ms40 = 40,
}

impl FrameSizeMs {
    /// Frame-Dauer in Millisekunden
    pub fn as_ms(&self) -> u32 {
        *self as u32
    }

    /// Anzahl der Samples pro Kanal und Frame bei gegebener Abtastrate
    pub fn samples_per_frame(&self, sample_rate: SampleRate) -> usize {
        (sample_rate.hz() * self.as_ms() / 1000) as usize
    }
}

/// Inband-FEC des Encoders
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FecModus {
    /// Keine Redundanz
    #[default]
    Aus,
    /// Redundanz immer mitsenden, auch auf Kosten der Qualitaet
    Aggressiv,
    /// Redundanz nur, wenn die Bitrate es erlaubt
    Entspannt,
}

/// Vollstaendige Opus-Konfiguration eines Sprachstroms
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpusConfig {
    /// Ziel-Bitrate in bit/s
    pub bitrate_bps: u32,
    pub sample_rate: SampleRate,
    pub channels: ChannelCount,
    pub frame_size: FrameSizeMs,
    /// Startwert der Komplexitaet (0–10); der Throttle senkt ihn nur
    pub complexity: u8,
    pub fec: FecModus,
    /// Discontinuous Transmission (Stille als Mini-Paket)
    pub dtx_enabled: bool,
    /// Erwarteter Paketverlust in Prozent (Hinweis an den Encoder)
    pub packet_loss_perc: u8,
    /// Deep-Redundancy-Dauer in 10-ms-Einheiten (0 = aus)
    pub dred_dauer: u8,
    /// Maximal verdeckte Frames nach einer Verlustserie
    pub max_verdeckung: usize,
}

/// Sprache im Spiel: 48 kHz mono, 20 ms, 24 kbit/s, DTX
impl Default for OpusConfig {
    fn default() -> Self {
        Self {
            bitrate_bps: 24_000,
            sample_rate: SampleRate::Hz48000,
            channels: ChannelCount::Mono,
            frame_size: FrameSizeMs::Ms20,
            complexity: 9,
            fec: FecModus::Aus,
            dtx_enabled: true,
            packet_loss_perc: 0,
            dred_dauer: 0,
            max_verdeckung: 10,
        }
    }
}

impl OpusConfig {
    /// Samples pro Frame (ueber alle Kanaele)
    pub fn frame_samples(&self) -> usize {
        self.frame_size.samples_per_frame(self.sample_rate) * self.channels as usize
    }

    /// Validiert die Konfiguration
    pub fn validieren(&self) -> Result<(), String> {
        if self.channels != ChannelCount::Mono {
            return Err(format!(
                "Sprachstroeme sind mono (war: {:?})",
                self.channels
            ));
        }
        if self.frame_size != FrameSizeMs::Ms20 {
            return Err(format!(
                "Frame-Dauer muss 20 ms sein (war: {} ms)",
                self.frame_size.as_ms()
            ));
        }
        if !(6_000..=510_000).contains(&self.bitrate_bps) {
            return Err(format!(
                "Bitrate muss zwischen 6000 und 510000 bit/s liegen (war: {})",
                self.bitrate_bps
            ));
        }
        if self.complexity > 10 {
            return Err(format!(
                "Komplexitaet muss zwischen 0 und 10 liegen (war: {})",
                self.complexity
            ));
        }
        if self.packet_loss_perc > 100 {
            return Err(format!(
                "Paketverlust muss zwischen 0 und 100 liegen (war: {})",
                self.packet_loss_perc
            ));
        }
        if self.dred_dauer > 100 {
            return Err(format!(
                "DRED-Dauer darf 100 (1 s) nicht ueberschreiten (war: {})",
                self.dred_dauer
            ));
        }
        Ok(())
    }
}
