//! Wire-Format der Sprachnachrichten
//!
//! Jede Nachricht beginnt mit einem Befehlsbyte. Alle Mehrbyte-Felder sind
//! little-endian.
//!
//! ```text
//! Befehl      Byte  Nutzlast
//! ---------   ----  --------
//! HANDSHAKE    0    u16 Protokollversion
//! START        1    optional 1 Byte Kanal (fehlt = global)
//! DATA         2    u16 seq, dann wiederholt (u16 laenge, laenge Bytes)
//! STOP         3    -
//! LOSS         4    1 Byte Verlust in Prozent (0–100)
//! ```
//!
//! Ein DATA-Unterpaket der Laenge 0 ist ein Platzhalter fuer einen
//! verlorenen oder stillen (DTX) Frame und traegt keine Bytes.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use feldfunk_core::KanalId;

/// Aktuelle Protokollversion (HANDSHAKE)
pub const PROTOKOLL_VERSION: u16 = 1;

/// Frames bis zu dieser Laenge sind DTX-/Verlust-Marker
pub const DTX_GRENZE: usize = 2;

/// Ein kodiertes Opus-Paket oder ein leerer Verlust-Marker
pub type Frame = Bytes;

/// Prueft, ob ein Frame nur ein DTX-/Verlust-Marker ist
pub fn ist_platzhalter(frame: &[u8]) -> bool {
    frame.len() <= DTX_GRENZE
}

// ---------------------------------------------------------------------------
// Befehl
// ---------------------------------------------------------------------------

/// Befehlsbyte am Anfang jeder Nachricht
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Befehl {
    Handshake = 0,
    Start = 1,
    Data = 2,
    Stop = 3,
    Loss = 4,
}

impl Befehl {
    /// Konvertiert ein Byte in einen `Befehl`
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Handshake),
            1 => Some(Self::Start),
            2 => Some(Self::Data),
            3 => Some(Self::Stop),
            4 => Some(Self::Loss),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// VoiceNachricht
// ---------------------------------------------------------------------------

/// Eine dekodierte Nachricht
///
/// DATA bleibt roh ([`DataPaket::parsen`] zerlegt die Nutzlast), damit der
/// Jitter-Stream des Senders die Bytes ohne Kopie uebernehmen kann.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceNachricht {
    Handshake { version: u16 },
    Start { kanal: Option<KanalId> },
    Data(Bytes),
    Stop,
    Loss { prozent: u8 },
}

impl VoiceNachricht {
    /// Befehl dieser Nachricht
    pub fn befehl(&self) -> Befehl {
        match self {
            VoiceNachricht::Handshake { .. } => Befehl::Handshake,
            VoiceNachricht::Start { .. } => Befehl::Start,
            VoiceNachricht::Data(_) => Befehl::Data,
            VoiceNachricht::Stop => Befehl::Stop,
            VoiceNachricht::Loss { .. } => Befehl::Loss,
        }
    }

    /// Serialisiert die Nachricht
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4);
        buf.put_u8(self.befehl() as u8);
        match self {
            VoiceNachricht::Handshake { version } => buf.put_u16_le(*version),
            VoiceNachricht::Start { kanal } => {
                if let Some(kanal) = kanal {
                    buf.put_u8(kanal.0);
                }
            }
            VoiceNachricht::Data(nutzlast) => buf.extend_from_slice(nutzlast),
            VoiceNachricht::Stop => {}
            VoiceNachricht::Loss { prozent } => buf.put_u8(*prozent),
        }
        buf.freeze()
    }

    /// Deserialisiert eine Nachricht
    ///
    /// # Fehler
    /// - `InvalidData` bei leerem Datagramm oder unbekanntem Befehl
    /// - `InvalidData` wenn die Pflicht-Nutzlast fehlt
    pub fn decode(mut buf: Bytes) -> io::Result<Self> {
        if buf.is_empty() {
            return Err(ungueltig("Leere Nachricht".to_string()));
        }
        let byte = buf.get_u8();
        let befehl =
            Befehl::from_u8(byte).ok_or_else(|| ungueltig(format!("Unbekannter Befehl: {byte}")))?;

        match befehl {
            Befehl::Handshake => {
                if buf.remaining() < 2 {
                    return Err(ungueltig("HANDSHAKE ohne Version".to_string()));
                }
                Ok(VoiceNachricht::Handshake {
                    version: buf.get_u16_le(),
                })
            }
            Befehl::Start => {
                let kanal = buf.has_remaining().then(|| KanalId(buf.get_u8()));
                Ok(VoiceNachricht::Start { kanal })
            }
            Befehl::Data => Ok(VoiceNachricht::Data(buf)),
            Befehl::Stop => Ok(VoiceNachricht::Stop),
            Befehl::Loss => {
                if !buf.has_remaining() {
                    return Err(ungueltig("LOSS ohne Prozentwert".to_string()));
                }
                Ok(VoiceNachricht::Loss {
                    prozent: buf.get_u8().min(100),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// DATA
// ---------------------------------------------------------------------------

/// Zerlegte DATA-Nutzlast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaket {
    pub seq: u16,
    /// Unterpakete in Sendereihenfolge, leere Frames sind Platzhalter
    pub frames: Vec<Frame>,
    /// Eine deklarierte Laenge ragte ueber das Datagramm hinaus. Alles ab
    /// dieser Stelle wurde verworfen.
    pub abgeschnitten: bool,
}

impl DataPaket {
    /// Kodiert eine komplette DATA-Nachricht inklusive Befehlsbyte
    ///
    /// Frames bis [`DTX_GRENZE`] Bytes und Frames, deren Laenge nicht in
    /// ein u16 passt, werden als Platzhalter (Laenge 0) geschrieben.
    pub fn kodieren<F: AsRef<[u8]>>(seq: u16, frames: &[F]) -> Bytes {
        let nutzlast: usize = frames.iter().map(|f| 2 + f.as_ref().len()).sum();
        let mut buf = BytesMut::with_capacity(3 + nutzlast);
        buf.put_u8(Befehl::Data as u8);
        buf.put_u16_le(seq);
        for frame in frames {
            let frame = frame.as_ref();
            match u16::try_from(frame.len()) {
                Ok(laenge) if !ist_platzhalter(frame) => {
                    buf.put_u16_le(laenge);
                    buf.extend_from_slice(frame);
                }
                _ => buf.put_u16_le(0),
            }
        }
        buf.freeze()
    }

    /// Zerlegt die Nutzlast hinter dem Befehlsbyte
    ///
    /// Ein abgeschnittenes Unterpaket ist kein Fehler: die bereits
    /// gelesenen Frames werden geliefert und `abgeschnitten` gesetzt.
    ///
    /// # Fehler
    /// - `InvalidData` wenn nicht einmal die Sequenznummer vorhanden ist
    pub fn parsen(nutzlast: &Bytes) -> io::Result<Self> {
        let mut buf = nutzlast.clone();
        if buf.remaining() < 2 {
            return Err(ungueltig(format!(
                "DATA zu kurz: {} Bytes (erwartet mindestens 2)",
                buf.remaining()
            )));
        }
        let seq = buf.get_u16_le();

        let mut frames = Vec::new();
        let mut abgeschnitten = false;
        while buf.has_remaining() {
            if buf.remaining() < 2 {
                abgeschnitten = true;
                break;
            }
            let laenge = buf.get_u16_le() as usize;
            if laenge > buf.remaining() {
                abgeschnitten = true;
                break;
            }
            frames.push(buf.split_to(laenge));
        }

        Ok(Self {
            seq,
            frames,
            abgeschnitten,
        })
    }
}

fn ungueltig(nachricht: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, nachricht)
}
