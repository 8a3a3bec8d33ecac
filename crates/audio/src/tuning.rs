//! Encoder-Nachstellung aus gemessener Netzqualitaet

use feldfunk_protocol::codec::FecModus;
use feldfunk_protocol::quality::NetworkQuality;

/// Ab diesem Verlust (Prozent) wird FEC aggressiv eingeschaltet
pub const FEC_SCHWELLE: u8 = 25;

/// Verlust (Prozent), ab dem DRED einsetzt
pub const DRED_BODEN: u8 = 20;

/// Obergrenze der DRED-Dauer in 10-ms-Einheiten (1 s)
pub const DRED_MAX: u8 = 100;

/// Untergrenze der Bitrate bei knapper Bandbreite
pub const MIN_BITRATE: u32 = 6_000;

/// Parametersatz fuer [`crate::VoiceEncoder::tunen`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderTuning {
    pub bitrate_bps: u32,
    pub fec: FecModus,
    pub packet_loss_perc: u8,
    pub dred_dauer: u8,
}

impl EncoderTuning {
    /// Leitet die Encoder-Parameter aus der Netzqualitaet ab
    ///
    /// `basis_bitrate` ist die konfigurierte Bitrate. Sie wird auf ein
    /// Viertel der kleinsten gemessenen Bandbreite begrenzt, sofern eine
    /// Bandbreite bekannt ist.
    pub fn aus_netzqualitaet(qualitaet: &NetworkQuality, basis_bitrate: u32) -> Self {
        let verlust = qualitaet.verlust_prozent();

        let fec = if verlust >= FEC_SCHWELLE {
            FecModus::Aggressiv
        } else {
            FecModus::Aus
        };

        let ueber_boden = verlust.saturating_sub(DRED_BODEN) as u16;
        let dred_dauer = (ueber_boden * 2).min(DRED_MAX as u16) as u8;

        let bitrate_bps = if qualitaet.min_bandwidth > 0 {
            let grenze = (qualitaet.min_bandwidth as u64 * 8 / 4) as u32;
            basis_bitrate.min(grenze).max(MIN_BITRATE)
        } else {
            basis_bitrate
        };

        Self {
            bitrate_bps,
            fec,
            packet_loss_perc: verlust,
            dred_dauer,
        }
    }
}
