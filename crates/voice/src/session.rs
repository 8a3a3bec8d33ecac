//! Eingehender Sprachstrom eines Peers
//!
//! Eine Sitzung verbindet Jitter-Stream, Decoder und Wiedergabepuffer:
//!
//! ```text
//! DATA -> PeerJitterStream -> VoiceDecoder -> StreamQueue -> PlaybackBuffer
//! ```
//!
//! Sie lebt von START bis STOP (oder Verbindungsverlust).

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use feldfunk_audio::{PlaybackBuffer, Umgebungsmodifikator, VoiceDecoder};
use feldfunk_core::{KanalId, PeerId, StreamSink};

use crate::error::VoiceResult;
use crate::jitter::PeerJitterStream;

/// Abschlussbericht beim Abbau einer Sitzung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SitzungsEnde {
    pub verlust_prozent: u8,
    pub verloren: u64,
    pub verdeckt: u64,
}

pub struct PeerSession {
    peer: PeerId,
    kanal: Option<KanalId>,
    jitter: PeerJitterStream,
    decoder: Arc<VoiceDecoder>,
    wiedergabe: Arc<PlaybackBuffer>,
}

impl PeerSession {
    /// Verdrahtet einen fertigen Decoder mit Jitter-Stream und Wiedergabe
    pub fn neu(
        peer: PeerId,
        kanal: Option<KanalId>,
        decoder: VoiceDecoder,
        modifikator: Option<Umgebungsmodifikator>,
    ) -> Self {
        let decoder = Arc::new(decoder);
        let wiedergabe = Arc::new(PlaybackBuffer::neu(decoder.frame_samples(), modifikator));
        decoder
            .ausgabe()
            .pipe(Some(wiedergabe.clone() as Arc<dyn StreamSink<Vec<f32>>>));

        let ziel = decoder.clone();
        let jitter = PeerJitterStream::neu(
            peer,
            Box::new(move |frames| {
                ziel.transform(&frames)?;
                Ok(())
            }),
        );

        debug!(peer = %peer, kanal = ?kanal, "Peer-Sitzung angelegt");
        Self {
            peer,
            kanal,
            jitter,
            decoder,
            wiedergabe,
        }
    }

    /// Nutzlast einer DATA-Nachricht (ohne Befehlsbyte)
    pub fn empfangen(&self, nutzlast: &Bytes) -> VoiceResult<()> {
        self.jitter.empfangen(nutzlast)
    }

    /// Leert den Jitter-Stream und liefert die Abschlusswerte
    ///
    /// Auch wenn der Decoder beim Leeren ausfaellt, stehen die Zaehler fest;
    /// der Fehler wird zusammen mit ihnen gemeldet.
    pub fn beenden(&self) -> (SitzungsEnde, VoiceResult<()>) {
        let ergebnis = self.jitter.flush();
        let ende = SitzungsEnde {
            verlust_prozent: self.jitter.verlust_prozent(),
            verloren: self.jitter.verloren(),
            verdeckt: self.decoder.verdeckte_frames(),
        };
        (ende, ergebnis)
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Kanal aus dem START, `None` fuer globale und Team-Stroeme
    pub fn kanal(&self) -> Option<KanalId> {
        self.kanal
    }

    pub fn wiedergabe(&self) -> &Arc<PlaybackBuffer> {
        &self.wiedergabe
    }

    pub fn jitter(&self) -> &PeerJitterStream {
        &self.jitter
    }

    pub fn decoder(&self) -> &VoiceDecoder {
        &self.decoder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{KopierDecoder, FRAME, GIFTPAKET};
    use feldfunk_protocol::codec::OpusConfig;
    use feldfunk_protocol::voice::DataPaket;

    fn sitzung() -> PeerSession {
        let config = OpusConfig::default();
        let decoder = VoiceDecoder::mit_backend(&config, Box::new(KopierDecoder));
        PeerSession::neu(PeerId(3), None, decoder, None)
    }

    fn nutzlast<F: AsRef<[u8]>>(seq: u16, frames: &[F]) -> Bytes {
        DataPaket::kodieren(seq, frames).slice(1..)
    }

    #[test]
    fn data_landet_im_wiedergabepuffer() {
        let sitzung = sitzung();
        sitzung.empfangen(&nutzlast(0, &[b"\x10\x32a", b"\x10\x32b"])).unwrap();
        assert_eq!(sitzung.wiedergabe().gepuffert(), 2 * FRAME);
    }

    #[test]
    fn luecke_wird_verdeckt() {
        let sitzung = sitzung();
        sitzung.empfangen(&nutzlast(0, &[b"\x10\x32a"])).unwrap();
        // seq 1 und 2 fehlen
        sitzung.empfangen(&nutzlast(3, &[b"\x10\x32b"])).unwrap();
        sitzung.empfangen(&nutzlast(4, &[b"\x10\x32c"])).unwrap();

        // 1 echter + 2 verdeckte + 2 echte
        assert_eq!(sitzung.wiedergabe().gepuffert(), 5 * FRAME);
        assert_eq!(sitzung.decoder().verdeckte_frames(), 2);
        assert_eq!(sitzung.jitter().verloren(), 2);
    }

    #[test]
    fn beenden_liefert_verlust() {
        let sitzung = sitzung();
        sitzung.empfangen(&nutzlast(0, &[b"\x10\x32a"])).unwrap();
        sitzung.empfangen(&nutzlast(3, &[b"\x10\x32b"])).unwrap();

        let (ende, ergebnis) = sitzung.beenden();
        assert!(ergebnis.is_ok());
        // Ein Platzhalter plus der nie eingeholte Batch, 4 Sequenz-Plaetze
        assert_eq!(ende.verloren, 2);
        assert_eq!(ende.verlust_prozent, 50);
        assert_eq!(ende.verdeckt, 1);
        assert_eq!(sitzung.wiedergabe().gepuffert(), 3 * FRAME);
    }

    #[test]
    fn decoderfehler_kommt_beim_empfang_an() {
        let sitzung = sitzung();
        let fehler = sitzung
            .empfangen(&nutzlast(0, &[[GIFTPAKET, 0, 0]]))
            .unwrap_err();
        assert!(fehler.erfordert_abbau());
        assert!(sitzung.decoder().ist_defekt());
    }
}
