//! Attrappen fuer die Unit-Tests des Crates

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use feldfunk_audio::{
    AudioError, AudioResult, DecoderBackend, EncoderBackend, VoiceDecoder, VoiceEncoder,
};
use feldfunk_core::PeerId;
use feldfunk_protocol::codec::{FecModus, OpusConfig};

use crate::kontext::CodecFabrik;
use crate::transport::Transport;

/// Markiert ein Paket, an dem der Test-Decoder scheitert
pub const GIFTPAKET: u8 = 0xFF;

/// Frame-Laenge der Standardkonfiguration (48 kHz, 20 ms)
pub const FRAME: usize = 960;

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Kodiert jeden Frame als 3 Bytes `[0x10, wert, wert]` mit `wert = pcm[0] * 100`
pub struct TestEncoder {
    pub defekt: bool,
    pub bitraten: Arc<Mutex<Vec<u32>>>,
}

impl EncoderBackend for TestEncoder {
    fn encode(&mut self, pcm: &[f32], ausgabe: &mut [u8]) -> AudioResult<usize> {
        if self.defekt {
            return Err(AudioError::CodecFehler("Testencoder defekt".into()));
        }
        let wert = (pcm[0] * 100.0) as u8;
        ausgabe[..3].copy_from_slice(&[0x10, wert, wert]);
        Ok(3)
    }
    fn set_bitrate(&mut self, bps: u32) -> AudioResult<()> {
        self.bitraten.lock().push(bps);
        Ok(())
    }
    fn set_complexity(&mut self, _komplexitaet: u8) -> AudioResult<()> {
        Ok(())
    }
    fn set_fec(&mut self, _modus: FecModus) -> AudioResult<()> {
        Ok(())
    }
    fn set_packet_loss_perc(&mut self, _prozent: u8) -> AudioResult<()> {
        Ok(())
    }
    fn set_dred_dauer(&mut self, _dauer: u8) -> AudioResult<()> {
        Ok(())
    }
    fn set_dtx(&mut self, _aktiv: bool) -> AudioResult<()> {
        Ok(())
    }
}

/// Jeder Frame wird zu [`FRAME`] Samples mit dem Wert `paket[1] / 100`,
/// Verdeckung liefert Stille
pub struct KopierDecoder;

impl DecoderBackend for KopierDecoder {
    fn decode(&mut self, paket: &[u8], ausgabe: &mut [f32]) -> AudioResult<usize> {
        if paket[0] == GIFTPAKET {
            return Err(AudioError::CodecFehler("Testdecoder vergiftet".into()));
        }
        let wert = paket.get(1).copied().unwrap_or(0) as f32 / 100.0;
        ausgabe[..FRAME].fill(wert);
        Ok(FRAME)
    }
    fn decode_fec(&mut self, _paket: &[u8], ausgabe: &mut [f32]) -> AudioResult<usize> {
        self.decode_plc(ausgabe)
    }
    fn decode_plc(&mut self, ausgabe: &mut [f32]) -> AudioResult<usize> {
        ausgabe[..FRAME].fill(0.0);
        Ok(FRAME)
    }
    fn hat_fec(&self, _paket: &[u8]) -> bool {
        false
    }
    fn dred_reichweite(&mut self, _paket: &[u8]) -> usize {
        0
    }
    fn decode_dred(
        &mut self,
        _paket: &[u8],
        _versatz: usize,
        ausgabe: &mut [f32],
    ) -> AudioResult<usize> {
        self.decode_plc(ausgabe)
    }
    fn set_complexity(&mut self, _komplexitaet: u8) -> AudioResult<()> {
        Ok(())
    }
    fn set_gain(&mut self, _q8_db: i16) -> AudioResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct TestFabrik {
    pub encoder_defekt: bool,
    pub bitraten: Arc<Mutex<Vec<u32>>>,
}

impl CodecFabrik for TestFabrik {
    fn encoder(&self, config: &OpusConfig) -> AudioResult<VoiceEncoder> {
        Ok(VoiceEncoder::mit_backend(
            config,
            Box::new(TestEncoder {
                defekt: self.encoder_defekt,
                bitraten: self.bitraten.clone(),
            }),
        ))
    }

    fn decoder(&self, config: &OpusConfig) -> AudioResult<VoiceDecoder> {
        Ok(VoiceDecoder::mit_backend(config, Box::new(KopierDecoder)))
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weg {
    Einzeln(PeerId),
    Team,
    Alle,
}

/// Zeichnet alle gesendeten Nachrichten auf
#[derive(Default)]
pub struct Mitschnitt {
    pub gesendet: Mutex<Vec<(Weg, Bytes)>>,
    pub getrennt: Mutex<Vec<PeerId>>,
}

impl Mitschnitt {
    /// Befehlsbytes in Sendereihenfolge
    pub fn befehle(&self) -> Vec<(Weg, u8)> {
        self.gesendet
            .lock()
            .iter()
            .map(|(weg, daten)| (*weg, daten[0]))
            .collect()
    }

    pub fn leeren(&self) -> Vec<(Weg, Bytes)> {
        std::mem::take(&mut *self.gesendet.lock())
    }
}

impl Transport for Mitschnitt {
    fn senden_an(&self, peer: PeerId, daten: Bytes) {
        self.gesendet.lock().push((Weg::Einzeln(peer), daten));
    }
    fn senden_an_team(&self, daten: Bytes) {
        self.gesendet.lock().push((Weg::Team, daten));
    }
    fn senden_an_alle(&self, daten: Bytes) {
        self.gesendet.lock().push((Weg::Alle, daten));
    }
    fn trennen(&self, peer: PeerId) {
        self.getrennt.lock().push(peer);
    }
}
