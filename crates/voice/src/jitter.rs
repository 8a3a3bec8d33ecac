//! Jitter-Stream pro Peer
//!
//! Ordnet eingehende DATA-Nachrichten nach ihrer 16-Bit-Sequenznummer und
//! fuellt Luecken mit Verlust-Platzhaltern auf, die der Decoder spaeter
//! verdeckt.
//!
//! ## Einordnung
//! `diff = seq - erwartet` (16 Bit, mit Ueberlauf):
//! - `diff < 0`: veraltet oder doppelt, wird verworfen. Ausnahme: der
//!   fehlende Vorgaenger eines zurueckgestellten Batches (`diff == -2`)
//!   wird noch vor diesem ausgeliefert
//! - `diff == 0`: puenktlich. Wartet ein Batch, ist sein Vorgaenger
//!   endgueltig verloren: Platzhalter, wartender Batch, aktueller Batch
//! - `diff > 0`: zu frueh; `diff - 1` Platzhalter gehen sofort raus, der
//!   Batch selbst wird ein Paket lang zurueckgestellt
//!
//! Jede fehlende Sequenznummer erzeugt damit genau einen Platzhalter und
//! zaehlt genau einmal als verloren, sofern sie nicht rechtzeitig nachkommt.
//!
//! Der Zustandsuebergang laeuft komplett unter einem Mutex, weil Empfang und
//! Abbau (`flush`) aus verschiedenen Threads kommen koennen. Die Ausgabe wird
//! innerhalb des Locks aufgerufen, damit der Decoder die Frames in genau der
//! Reihenfolge sieht, in der sie eingeordnet wurden.

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{trace, warn};

use feldfunk_core::PeerId;
use feldfunk_protocol::voice::{DataPaket, Frame};

use crate::error::VoiceResult;

/// Empfaenger der eingeordneten Frames (typischerweise der Decoder)
pub type FrameAusgabe = Box<dyn Fn(Vec<Frame>) -> VoiceResult<()> + Send + Sync>;

// ---------------------------------------------------------------------------
// Zustand
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct JitterZustand {
    /// Naechste erwartete Sequenznummer
    erwartet: u16,
    /// Verlorene Frames (Luecken und nie eingeholte Wartezeiten)
    verloren: u64,
    /// Durchlaufene Sequenz-Plaetze, laeuft anders als `erwartet` nicht ueber
    plaetze: u64,
    zurueckgestellt: Option<Vec<Frame>>,
}

// ---------------------------------------------------------------------------
// PeerJitterStream
// ---------------------------------------------------------------------------

/// Umsortierung und Lueckenerkennung fuer einen sprechenden Peer
pub struct PeerJitterStream {
    peer: PeerId,
    zustand: Mutex<JitterZustand>,
    ausgabe: FrameAusgabe,
}

impl PeerJitterStream {
    pub fn neu(peer: PeerId, ausgabe: FrameAusgabe) -> Self {
        Self {
            peer,
            zustand: Mutex::new(JitterZustand::default()),
            ausgabe,
        }
    }

    /// Verarbeitet die Nutzlast einer DATA-Nachricht (ohne Befehlsbyte)
    ///
    /// Ein abgeschnittenes Datagramm wird geloggt; die vollstaendig
    /// gelesenen Unterpakete werden trotzdem eingeordnet.
    pub fn empfangen(&self, nutzlast: &Bytes) -> VoiceResult<()> {
        let paket = DataPaket::parsen(nutzlast)?;
        if paket.abgeschnitten {
            warn!(
                peer = %self.peer,
                seq = paket.seq,
                frames = paket.frames.len(),
                "DATA abgeschnitten, Rest des Datagramms verworfen"
            );
        }
        self.einordnen(paket.seq, paket.frames)
    }

    /// Ordnet einen bereits zerlegten Batch ein
    pub fn einordnen(&self, seq: u16, frames: Vec<Frame>) -> VoiceResult<()> {
        if frames.is_empty() {
            trace!(peer = %self.peer, seq, "DATA ohne Frames ignoriert");
            return Ok(());
        }

        let mut zustand = self.zustand.lock();
        let diff = seq.wrapping_sub(zustand.erwartet) as i16;

        if diff < 0 {
            if diff == -2 {
                if let Some(wartend) = zustand.zurueckgestellt.take() {
                    trace!(peer = %self.peer, seq, "Vorgaenger rechtzeitig eingeholt");
                    let mut batch = frames;
                    batch.extend(wartend);
                    return (self.ausgabe)(batch);
                }
            }
            trace!(
                peer = %self.peer,
                seq,
                erwartet = zustand.erwartet,
                diff,
                "Veraltetes Paket verworfen"
            );
            return Ok(());
        }

        // Ein wartender Batch wird jetzt nicht mehr eingeholt
        let mut batch = match zustand.zurueckgestellt.take() {
            Some(wartend) => {
                zustand.verloren += 1;
                let mut batch = Vec::with_capacity(wartend.len() + frames.len() + 1);
                batch.push(Frame::new());
                batch.extend(wartend);
                batch
            }
            None => Vec::new(),
        };

        if diff == 0 {
            batch.extend(frames);
            zustand.erwartet = zustand.erwartet.wrapping_add(1);
            zustand.plaetze += 1;
            return (self.ausgabe)(batch);
        }

        // Zu frueh: Luecke sofort als Platzhalter ausliefern, Batch warten lassen
        let luecke = (diff - 1) as usize;
        batch.extend(std::iter::repeat(Frame::new()).take(luecke));

        zustand.verloren += luecke as u64;
        zustand.plaetze += diff as u64 + 1;
        zustand.erwartet = seq.wrapping_add(1);
        zustand.zurueckgestellt = Some(frames);

        if luecke > 0 {
            trace!(peer = %self.peer, seq, diff, luecke, "Luecke im Sprachstrom");
        }
        if batch.is_empty() {
            return Ok(());
        }
        (self.ausgabe)(batch)
    }

    /// Liefert einen zurueckgestellten Batch beim Abbau aus
    ///
    /// Der Batch zaehlt als ein weiterer Verlust, weil sein Vorgaenger nie
    /// angekommen ist.
    pub fn flush(&self) -> VoiceResult<()> {
        let mut zustand = self.zustand.lock();
        let Some(wartend) = zustand.zurueckgestellt.take() else {
            return Ok(());
        };
        zustand.verloren += 1;
        (self.ausgabe)(wartend)
    }

    /// Verlust in Prozent der durchlaufenen Sequenz-Plaetze (0–100)
    pub fn verlust_prozent(&self) -> u8 {
        let zustand = self.zustand.lock();
        if zustand.plaetze == 0 {
            return 0;
        }
        (zustand.verloren * 100 / zustand.plaetze).min(100) as u8
    }

    pub fn verloren(&self) -> u64 {
        self.zustand.lock().verloren
    }

    /// Naechste erwartete Sequenznummer
    pub fn erwartet(&self) -> u16 {
        self.zustand.lock().erwartet
    }

    pub fn hat_zurueckgestellt(&self) -> bool {
        self.zustand.lock().zurueckgestellt.is_some()
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }
}
