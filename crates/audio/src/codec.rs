//! Opus-Backend hinter zwei schmalen Traits
//!
//! [`EncoderBackend`] und [`DecoderBackend`] sind die Grenze zum nativen
//! Codec. Die Produktiv-Implementierung kapselt audiopus (libopus); die
//! Tests setzen eigene Backends ein, um Latenz und Fehler zu steuern.
//!
//! Das gebuendelte libopus kennt weder DRED noch eine Decoder-Komplexitaet.
//! Beide Werte werden gespeichert, DRED meldet eine Reichweite von 0.

use audiopus::{
    coder::{Decoder, Encoder},
    Application, Bitrate, Channels, SampleRate,
};
use tracing::debug;

use crate::error::{AudioError, AudioResult};
use feldfunk_protocol::codec::{ChannelCount, FecModus, OpusConfig, SampleRate as ProtocolSampleRate};

/// Groesster Opus-Frame (120 ms bei 48 kHz) pro Kanal
pub const MAX_FRAME_SAMPLES: usize = 5760;

/// Obergrenze fuer ein kodiertes Paket
pub const MAX_PAKET_BYTES: usize = 4000;

// libopus CTL-Requests, die audiopus nicht als eigene Methode anbietet
const OPUS_SET_PACKET_LOSS_PERC: i32 = 4014;
const OPUS_SET_DTX: i32 = 4016;
const OPUS_SET_SIGNAL: i32 = 4024;
const OPUS_SIGNAL_VOICE: i32 = 3001;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Nativer Encoder
pub trait EncoderBackend: Send {
    /// Kodiert genau einen Frame, liefert die Anzahl geschriebener Bytes
    fn encode(&mut self, pcm: &[f32], ausgabe: &mut [u8]) -> AudioResult<usize>;
    fn set_bitrate(&mut self, bps: u32) -> AudioResult<()>;
    fn set_complexity(&mut self, komplexitaet: u8) -> AudioResult<()>;
    fn set_fec(&mut self, modus: FecModus) -> AudioResult<()>;
    fn set_packet_loss_perc(&mut self, prozent: u8) -> AudioResult<()>;
    /// Deep-Redundancy-Dauer in 10-ms-Einheiten
    fn set_dred_dauer(&mut self, dauer: u8) -> AudioResult<()>;
    fn set_dtx(&mut self, aktiv: bool) -> AudioResult<()>;
}

/// Nativer Decoder
///
/// Alle `decode*`-Methoden liefern die Anzahl Samples pro Kanal.
pub trait DecoderBackend: Send {
    fn decode(&mut self, paket: &[u8], ausgabe: &mut [f32]) -> AudioResult<usize>;
    /// Rekonstruiert den Frame *vor* `paket` aus dessen Inband-FEC.
    /// `ausgabe` muss genau einen Frame lang sein.
    fn decode_fec(&mut self, paket: &[u8], ausgabe: &mut [f32]) -> AudioResult<usize>;
    /// Packet Loss Concealment ohne Daten
    fn decode_plc(&mut self, ausgabe: &mut [f32]) -> AudioResult<usize>;
    /// Kann `paket` Inband-FEC fuer den Vorgaenger tragen?
    fn hat_fec(&self, paket: &[u8]) -> bool;
    /// Wie viele Samples vor `paket` per DRED rekonstruierbar sind
    fn dred_reichweite(&mut self, paket: &[u8]) -> usize;
    /// Rekonstruiert den Frame, der `versatz` Samples vor `paket` endet
    fn decode_dred(&mut self, paket: &[u8], versatz: usize, ausgabe: &mut [f32])
        -> AudioResult<usize>;
    fn set_complexity(&mut self, komplexitaet: u8) -> AudioResult<()>;
    /// Verstaerkung in Q8-dB (256 = 1 dB)
    fn set_gain(&mut self, q8_db: i16) -> AudioResult<()>;
}

// ---------------------------------------------------------------------------
// libopus
// ---------------------------------------------------------------------------

/// Encoder auf Basis von audiopus
pub struct OpusEncoderBackend {
    encoder: Encoder,
    dred_dauer: u8,
}

impl OpusEncoderBackend {
    /// Erstellt den Encoder und setzt alle Parameter aus `config`
    pub fn neu(config: &OpusConfig) -> AudioResult<Self> {
        let encoder = Encoder::new(
            rate_zu_audiopus(config.sample_rate),
            kanaele_zu_audiopus(config.channels),
            Application::Voip,
        )
        .map_err(codec_fehler)?;

        let mut backend = Self {
            encoder,
            dred_dauer: 0,
        };
        backend
            .encoder
            .set_encoder_ctl_request(OPUS_SET_SIGNAL, OPUS_SIGNAL_VOICE)
            .map_err(codec_fehler)?;
        backend.set_bitrate(config.bitrate_bps)?;
        backend.set_complexity(config.complexity)?;
        backend.set_fec(config.fec)?;
        backend.set_packet_loss_perc(config.packet_loss_perc)?;
        backend.set_dtx(config.dtx_enabled)?;
        backend.set_dred_dauer(config.dred_dauer)?;

        debug!(
            bitrate = config.bitrate_bps,
            komplexitaet = config.complexity,
            fec = ?config.fec,
            "Opus-Encoder erstellt"
        );
        Ok(backend)
    }

    /// Zuletzt gesetzte DRED-Dauer
    pub fn dred_dauer(&self) -> u8 {
        self.dred_dauer
    }
}

impl EncoderBackend for OpusEncoderBackend {
    fn encode(&mut self, pcm: &[f32], ausgabe: &mut [u8]) -> AudioResult<usize> {
        self.encoder.encode_float(pcm, ausgabe).map_err(codec_fehler)
    }

    fn set_bitrate(&mut self, bps: u32) -> AudioResult<()> {
        let bps = bps.clamp(500, 512_000) as i32;
        self.encoder
            .set_bitrate(Bitrate::BitsPerSecond(bps))
            .map_err(codec_fehler)
    }

    fn set_complexity(&mut self, komplexitaet: u8) -> AudioResult<()> {
        self.encoder
            .set_complexity(komplexitaet.min(10))
            .map_err(codec_fehler)
    }

    fn set_fec(&mut self, modus: FecModus) -> AudioResult<()> {
        // libopus 1.3 kennt nur an/aus, "entspannt" wird zu "an"
        self.encoder
            .set_inband_fec(modus != FecModus::Aus)
            .map_err(codec_fehler)
    }

    fn set_packet_loss_perc(&mut self, prozent: u8) -> AudioResult<()> {
        self.encoder
            .set_encoder_ctl_request(OPUS_SET_PACKET_LOSS_PERC, prozent.min(100) as i32)
            .map_err(codec_fehler)
    }

    fn set_dred_dauer(&mut self, dauer: u8) -> AudioResult<()> {
        self.dred_dauer = dauer.min(100);
        Ok(())
    }

    fn set_dtx(&mut self, aktiv: bool) -> AudioResult<()> {
        self.encoder
            .set_encoder_ctl_request(OPUS_SET_DTX, aktiv as i32)
            .map_err(codec_fehler)
    }
}

/// Decoder auf Basis von audiopus
///
/// Die Verstaerkung wird nach dem Dekodieren in Software angewendet.
///
/// `set_complexity` merkt sich den Wert nur: der Decoder von libopus 1.3
/// hat keine Komplexitaet. Der Throttle des [`VoiceDecoder`](crate::VoiceDecoder)
/// bleibt mit diesem Backend daher ohne Wirkung auf die Dekodierkosten.
pub struct OpusDecoderBackend {
    decoder: Decoder,
    kanaele: usize,
    komplexitaet: u8,
    verstaerkung: f32,
}

impl OpusDecoderBackend {
    pub fn neu(config: &OpusConfig) -> AudioResult<Self> {
        let decoder = Decoder::new(
            rate_zu_audiopus(config.sample_rate),
            kanaele_zu_audiopus(config.channels),
        )
        .map_err(codec_fehler)?;

        debug!(sample_rate = ?config.sample_rate, "Opus-Decoder erstellt");
        Ok(Self {
            decoder,
            kanaele: config.channels as usize,
            komplexitaet: config.complexity,
            verstaerkung: 1.0,
        })
    }

    /// Zuletzt gesetzte Komplexitaet
    pub fn komplexitaet(&self) -> u8 {
        self.komplexitaet
    }

    fn verstaerken(&self, ausgabe: &mut [f32], samples: usize) {
        if (self.verstaerkung - 1.0).abs() > f32::EPSILON {
            let ende = (samples * self.kanaele).min(ausgabe.len());
            for s in &mut ausgabe[..ende] {
                *s *= self.verstaerkung;
            }
        }
    }
}

impl DecoderBackend for OpusDecoderBackend {
    fn decode(&mut self, paket: &[u8], ausgabe: &mut [f32]) -> AudioResult<usize> {
        let samples = self
            .decoder
            .decode_float(Some(paket), &mut *ausgabe, false)
            .map_err(codec_fehler)?;
        self.verstaerken(ausgabe, samples);
        Ok(samples)
    }

    fn decode_fec(&mut self, paket: &[u8], ausgabe: &mut [f32]) -> AudioResult<usize> {
        let samples = self
            .decoder
            .decode_float(Some(paket), &mut *ausgabe, true)
            .map_err(codec_fehler)?;
        self.verstaerken(ausgabe, samples);
        Ok(samples)
    }

    fn decode_plc(&mut self, ausgabe: &mut [f32]) -> AudioResult<usize> {
        let samples = self
            .decoder
            .decode_float(None::<&[u8]>, &mut *ausgabe, false)
            .map_err(codec_fehler)?;
        self.verstaerken(ausgabe, samples);
        Ok(samples)
    }

    fn hat_fec(&self, paket: &[u8]) -> bool {
        hat_lbrr(paket)
    }

    fn dred_reichweite(&mut self, _paket: &[u8]) -> usize {
        0
    }

    fn decode_dred(
        &mut self,
        _paket: &[u8],
        _versatz: usize,
        _ausgabe: &mut [f32],
    ) -> AudioResult<usize> {
        Err(AudioError::CodecFehler(
            "DRED wird vom gebuendelten libopus nicht unterstuetzt".to_string(),
        ))
    }

    fn set_complexity(&mut self, komplexitaet: u8) -> AudioResult<()> {
        // Nur gemerkt, siehe Typ-Doku
        self.komplexitaet = komplexitaet.min(10);
        Ok(())
    }

    fn set_gain(&mut self, q8_db: i16) -> AudioResult<()> {
        self.verstaerkung = 10f32.powf(q8_db as f32 / (20.0 * 256.0));
        Ok(())
    }
}

/// Prueft anhand des TOC-Bytes, ob das Paket SILK-Anteile hat
///
/// Nur SILK- und Hybrid-Pakete (Konfiguration 0–15) koennen LBRR-Daten fuer
/// den Vorgaenger tragen. Fehlen sie trotzdem, faellt libopus beim
/// FEC-Dekodieren selbst auf PLC zurueck.
pub fn hat_lbrr(paket: &[u8]) -> bool {
    match paket.first() {
        Some(toc) => (toc >> 3) < 16,
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Konvertierungs-Hilfsfunktionen
// ---------------------------------------------------------------------------

fn codec_fehler(e: audiopus::Error) -> AudioError {
    AudioError::CodecFehler(e.to_string())
}

fn rate_zu_audiopus(rate: ProtocolSampleRate) -> SampleRate {
    match rate {
        ProtocolSampleRate::Hz8000 => SampleRate::Hz8000,
        ProtocolSampleRate::Hz16000 => SampleRate::Hz16000,
        ProtocolSampleRate::Hz24000 => SampleRate::Hz24000,
        ProtocolSampleRate::Hz48000 => SampleRate::Hz48000,
    }
}

fn kanaele_zu_audiopus(ch: ChannelCount) -> Channels {
    match ch {
        ChannelCount::Mono => Channels::Mono,
        ChannelCount::Stereo => Channels::Stereo,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_backend_erstellbar() {
        let backend = OpusEncoderBackend::neu(&OpusConfig::default());
        assert!(backend.is_ok());
    }

    #[test]
    fn decoder_backend_erstellbar() {
        let backend = OpusDecoderBackend::neu(&OpusConfig::default());
        assert!(backend.is_ok());
    }

    #[test]
    fn frame_kodieren_und_dekodieren() {
        let config = OpusConfig::default();
        let mut enc = OpusEncoderBackend::neu(&config).unwrap();
        let mut dec = OpusDecoderBackend::neu(&config).unwrap();

        let pcm: Vec<f32> = (0..960).map(|i| (i as f32 * 0.05).sin() * 0.4).collect();
        let mut paket = vec![0u8; MAX_PAKET_BYTES];
        let laenge = enc.encode(&pcm, &mut paket).unwrap();
        assert!(laenge > 0);

        let mut ausgabe = vec![0.0f32; MAX_FRAME_SAMPLES];
        let samples = dec.decode(&paket[..laenge], &mut ausgabe).unwrap();
        assert_eq!(samples, 960);
    }

    #[test]
    fn falsche_frame_groesse_ist_codec_fehler() {
        let mut enc = OpusEncoderBackend::neu(&OpusConfig::default()).unwrap();
        let mut paket = vec![0u8; MAX_PAKET_BYTES];
        let err = enc.encode(&[0.0; 100], &mut paket).unwrap_err();
        assert!(matches!(err, AudioError::CodecFehler(_)));
    }

    #[test]
    fn plc_liefert_einen_frame() {
        let mut dec = OpusDecoderBackend::neu(&OpusConfig::default()).unwrap();
        let mut ausgabe = vec![0.0f32; 960];
        assert_eq!(dec.decode_plc(&mut ausgabe).unwrap(), 960);
    }

    #[test]
    fn decoder_komplexitaet_wird_nur_gemerkt() {
        let mut dec = OpusDecoderBackend::neu(&OpusConfig::default()).unwrap();
        dec.set_complexity(4).unwrap();
        assert_eq!(dec.komplexitaet(), 4);
        dec.set_complexity(15).unwrap();
        assert_eq!(dec.komplexitaet(), 10);

        let mut ausgabe = vec![0.0f32; 960];
        assert_eq!(dec.decode_plc(&mut ausgabe).unwrap(), 960);
    }

    #[test]
    fn lbrr_nur_bei_silk_und_hybrid() {
        // Konfiguration 1 (SILK NB 20ms)
        assert!(hat_lbrr(&[1 << 3, 0xAA]));
        // Konfiguration 13 (Hybrid SWB 20ms)
        assert!(hat_lbrr(&[13 << 3]));
        // Konfiguration 31 (CELT FB 20ms)
        assert!(!hat_lbrr(&[31 << 3]));
        assert!(!hat_lbrr(&[]));
    }

    #[test]
    fn verstaerkung_in_q8_db() {
        let mut dec = OpusDecoderBackend::neu(&OpusConfig::default()).unwrap();
        dec.set_gain(6 * 256).unwrap();
        assert!((dec.verstaerkung - 1.995).abs() < 0.01);
        dec.set_gain(0).unwrap();
        assert!((dec.verstaerkung - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn dred_ohne_unterstuetzung() {
        let mut dec = OpusDecoderBackend::neu(&OpusConfig::default()).unwrap();
        assert_eq!(dec.dred_reichweite(&[0x08]), 0);
        let mut enc = OpusEncoderBackend::neu(&OpusConfig::default()).unwrap();
        enc.set_dred_dauer(200).unwrap();
        assert_eq!(enc.dred_dauer(), 100);
    }
}
