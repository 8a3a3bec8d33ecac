//! Voice-Multiplexer – Protokoll-Endpunkt eines Sprachknotens
//!
//! Ausgehend: Aufnahme-Batches laufen beim `tick` durch den Encoder; jeder
//! Batch kodierter Frames wird zu genau einer DATA-Nachricht mit eigener
//! Sequenznummer und geht an das aktuelle [`RouteTarget`].
//!
//! Eingehend: Nachrichten werden nach Befehlsbyte verteilt. START legt pro
//! Peer eine [`PeerSession`] an, DATA wird dorthin weitergereicht, STOP baut
//! sie ab und antwortet mit LOSS.
//!
//! ## Fehlerbehandlung
//! - Kaputte Nachrichten und unbekannte Befehle: geloggt, verworfen
//! - Zustandsfehler (DATA ohne Strom, STOP ohne Strom): geloggt, no-op
//! - Codec-Fehler: nur der betroffene Strom wird abgebaut
//! - Hoehere Protokollversion: Peer wird getrennt
//!
//! Der [`Transport`] darf aus seinen Sendemethoden nicht synchron in den
//! Multiplexer zurueckrufen.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use feldfunk_audio::{AudioError, EncoderTuning, PlaybackBuffer, VoiceEncoder};
use feldfunk_core::{Abgriff, KanalId, PeerId, SchreibAbgriff, StreamQueue};
use feldfunk_observability::VoiceMetriken;
use feldfunk_protocol::codec::OpusConfig;
use feldfunk_protocol::quality::{NetworkQuality, PeerStatistik};
use feldfunk_protocol::voice::{DataPaket, Frame, VoiceNachricht, PROTOKOLL_VERSION};

use crate::config::VoiceConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::kontext::VoiceKontext;
use crate::route::RouteTarget;
use crate::session::{PeerSession, SitzungsEnde};
use crate::transport::{Transport, TransportEreignis};

// ---------------------------------------------------------------------------
// Ausgehender Strom
// ---------------------------------------------------------------------------

/// Rahmt die Frame-Batches des Encoders als DATA und sendet sie
struct DataAbgriff {
    ziel: RouteTarget,
    seq: AtomicU16,
    transport: Arc<dyn Transport>,
    metriken: Option<VoiceMetriken>,
}

impl SchreibAbgriff<Frame> for DataAbgriff {
    fn abgreifen(&self, frames: Vec<Frame>) -> Abgriff<Frame> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let anzahl = frames.len();
        let daten = DataPaket::kodieren(seq, &frames);
        self.ziel.senden(&*self.transport, daten);
        if let Some(m) = &self.metriken {
            m.data_gesendet.inc();
        }
        trace!(seq, frames = anzahl, ziel = %self.ziel, "DATA gesendet");
        Abgriff::Behandelt
    }
}

/// Encoder eines aktiven Sprechziels
struct Sendestrom {
    ziel: RouteTarget,
    encoder: VoiceEncoder,
}

#[derive(Default)]
struct Ausgang {
    ziel: RouteTarget,
    strom: Option<Arc<Sendestrom>>,
}

// ---------------------------------------------------------------------------
// Abbaugruende
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Abbau {
    Stop,
    NeuerStart,
    Verbindungsverlust,
    Version,
    Codecfehler,
    Kanalwechsel,
    Herunterfahren,
}

impl Abbau {
    /// Bekommt der Sender eine LOSS-Antwort?
    fn meldet_verlust(self) -> bool {
        matches!(self, Abbau::Stop | Abbau::NeuerStart | Abbau::Codecfehler)
    }
}

// ---------------------------------------------------------------------------
// VoiceMultiplexer
// ---------------------------------------------------------------------------

/// Sprach-Endpunkt eines Knotens
///
/// `Clone`-faehig (innerer Arc); alle Methoden sind aus beliebigen Threads
/// aufrufbar.
#[derive(Clone)]
pub struct VoiceMultiplexer {
    inner: Arc<MultiplexerInner>,
}

struct MultiplexerInner {
    transport: Arc<dyn Transport>,
    opus: OpusConfig,
    kanal: RwLock<Option<KanalId>>,
    kontext: VoiceKontext,
    aufnahme: Arc<StreamQueue<Vec<f32>>>,
    ausgang: Mutex<Ausgang>,
    sitzungen: DashMap<PeerId, Arc<PeerSession>>,
    /// Letzte Messung: (alle Peers, eigenes Team)
    qualitaet: RwLock<Option<(NetworkQuality, NetworkQuality)>>,
    gemeldeter_verlust: DashMap<PeerId, u8>,
}

impl VoiceMultiplexer {
    /// Erstellt einen Multiplexer; gesendet wird erst nach [`Self::ziel_setzen`]
    pub fn neu(
        config: VoiceConfig,
        transport: Arc<dyn Transport>,
        kontext: VoiceKontext,
    ) -> VoiceResult<Self> {
        config
            .validieren()
            .map_err(|e| VoiceError::Codec(AudioError::Konfiguration(e)))?;

        Ok(Self {
            inner: Arc::new(MultiplexerInner {
                transport,
                opus: config.opus,
                kanal: RwLock::new(config.kanal),
                kontext,
                aufnahme: Arc::new(StreamQueue::neu()),
                ausgang: Mutex::new(Ausgang::default()),
                sitzungen: DashMap::new(),
                qualitaet: RwLock::new(None),
                gemeldeter_verlust: DashMap::new(),
            }),
        })
    }

    // -----------------------------------------------------------------------
    // Ausgehend
    // -----------------------------------------------------------------------

    /// Queue fuer Aufnahme-Batches (Mikrofon-Thread schreibt hinein)
    pub fn aufnahme(&self) -> &Arc<StreamQueue<Vec<f32>>> {
        &self.inner.aufnahme
    }

    /// Aktuelles Sprechziel
    pub fn ziel(&self) -> RouteTarget {
        self.inner.ausgang.lock().ziel
    }

    /// Wechselt das Sprechziel
    ///
    /// - gestoppt -> X: START, danach wird gesendet
    /// - X -> gestoppt: Restframe, STOP
    /// - X -> Y: Restframe und STOP an X, START an Y
    /// - X -> X: nichts
    ///
    /// Schlaegt das Anlegen des Encoders fehl, bleibt der Knoten gestoppt.
    pub fn ziel_setzen(&self, neu: RouteTarget) -> VoiceResult<()> {
        let inner = &self.inner;
        let mut ausgang = inner.ausgang.lock();
        if ausgang.ziel == neu {
            return Ok(());
        }
        let alt = ausgang.ziel;

        if let Some(strom) = ausgang.strom.take() {
            self.strom_schliessen(&strom);
        }
        if alt.ist_aktiv() {
            alt.senden(&*inner.transport, VoiceNachricht::Stop.encode());
        }
        ausgang.ziel = RouteTarget::Stopped;

        let Some(start) = neu.start_nachricht() else {
            info!(von = %alt, "Sprechen beendet");
            return Ok(());
        };

        let encoder = inner.kontext.fabrik.encoder(&inner.opus).map_err(|e| {
            error!(ziel = %neu, fehler = %e, "Encoder konnte nicht angelegt werden");
            VoiceError::from(e)
        })?;
        encoder.ausgabe().abgriff_hinzufuegen(Arc::new(DataAbgriff {
            ziel: neu,
            seq: AtomicU16::new(0),
            transport: inner.transport.clone(),
            metriken: inner.kontext.metriken.clone(),
        }));
        let strom = Arc::new(Sendestrom {
            ziel: neu,
            encoder,
        });
        self.tunen(&strom)?;

        neu.senden(&*inner.transport, start.encode());
        ausgang.ziel = neu;
        ausgang.strom = Some(strom);
        info!(von = %alt, nach = %neu, "Sprechziel gewechselt");
        Ok(())
    }

    /// Netzwerk-Takt: kodiert alle wartenden Aufnahme-Batches
    ///
    /// Ohne aktives Ziel werden die Batches verworfen.
    pub fn tick(&self) {
        let batches = self.inner.aufnahme.read_all();
        let strom = self.inner.ausgang.lock().strom.clone();
        let Some(strom) = strom else {
            if !batches.is_empty() {
                trace!(batches = batches.len(), "Nicht am Sprechen, Aufnahme verworfen");
            }
            return;
        };

        for batch in batches {
            match strom.encoder.transform(&batch) {
                Ok(_) => {}
                // Ziel wurde waehrenddessen gewechselt
                Err(AudioError::Geschlossen) => return,
                Err(e) => {
                    self.ausgang_abbauen(&strom, e.into());
                    return;
                }
            }
        }

        if let Some(m) = &self.inner.kontext.metriken {
            m.encoder_komplexitaet.set(strom.encoder.komplexitaet() as i64);
        }
    }

    /// Komplexitaet des aktiven Encoders
    pub fn encoder_komplexitaet(&self) -> Option<u8> {
        let ausgang = self.inner.ausgang.lock();
        ausgang.strom.as_ref().map(|s| s.encoder.komplexitaet())
    }

    /// Bitrate des aktiven Encoders
    pub fn encoder_bitrate(&self) -> Option<u32> {
        let ausgang = self.inner.ausgang.lock();
        ausgang.strom.as_ref().map(|s| s.encoder.bitrate())
    }

    // -----------------------------------------------------------------------
    // Eingehend
    // -----------------------------------------------------------------------

    /// Verarbeitet ein Ereignis des Transports
    pub fn ereignis(&self, ereignis: TransportEreignis) {
        match ereignis {
            TransportEreignis::NeueVerbindung(peer) => {
                debug!(peer = %peer, version = PROTOKOLL_VERSION, "HANDSHAKE gesendet");
                self.inner.transport.senden_an(
                    peer,
                    VoiceNachricht::Handshake {
                        version: PROTOKOLL_VERSION,
                    }
                    .encode(),
                );
            }
            TransportEreignis::VerbindungVerloren(peer) => {
                self.inner.gemeldeter_verlust.remove(&peer);
                self.sitzung_abbauen(peer, Abbau::Verbindungsverlust);
            }
            TransportEreignis::Paket { von, daten } => self.paket(von, daten),
            TransportEreignis::Messung(statistiken) => self.messung(&statistiken),
        }
    }

    fn paket(&self, von: PeerId, daten: Bytes) {
        let nachricht = match VoiceNachricht::decode(daten) {
            Ok(n) => n,
            Err(e) => {
                error!(peer = %von, fehler = %e, "Nachricht verworfen");
                return;
            }
        };

        match nachricht {
            VoiceNachricht::Handshake { version } => self.handshake(von, version),
            VoiceNachricht::Start { kanal } => self.strom_starten(von, kanal),
            VoiceNachricht::Data(nutzlast) => self.data(von, &nutzlast),
            VoiceNachricht::Stop => {
                self.sitzung_abbauen(von, Abbau::Stop);
            }
            VoiceNachricht::Loss { prozent } => {
                debug!(peer = %von, prozent, "LOSS empfangen");
                self.inner.gemeldeter_verlust.insert(von, prozent);
            }
        }
    }

    fn handshake(&self, peer: PeerId, version: u16) {
        if version <= PROTOKOLL_VERSION {
            debug!(peer = %peer, version, "HANDSHAKE akzeptiert");
            return;
        }
        let fehler = VoiceError::VersionInkompatibel {
            peer,
            version,
            eigene: PROTOKOLL_VERSION,
        };
        warn!(peer = %peer, fehler = %fehler, "Peer wird getrennt");
        self.sitzung_abbauen(peer, Abbau::Version);
        self.inner.transport.trennen(peer);
    }

    fn strom_starten(&self, peer: PeerId, kanal: Option<KanalId>) {
        let inner = &self.inner;
        if inner.sitzungen.contains_key(&peer) {
            warn!(peer = %peer, "START bei aktivem Strom, alter Strom wird abgebaut");
            self.sitzung_abbauen(peer, Abbau::NeuerStart);
        }

        if let Some(kanal) = kanal {
            let eigener = *inner.kanal.read();
            if eigener != Some(kanal) {
                debug!(
                    peer = %peer,
                    kanal = %kanal,
                    eigener = ?eigener,
                    "START auf fremdem Kanal ignoriert"
                );
                return;
            }
        }

        let decoder = match inner.kontext.fabrik.decoder(&inner.opus) {
            Ok(d) => d,
            Err(e) => {
                error!(peer = %peer, fehler = %e, "Decoder konnte nicht angelegt werden");
                return;
            }
        };
        let sitzung = Arc::new(PeerSession::neu(
            peer,
            kanal,
            decoder,
            inner.kontext.modifikator.clone(),
        ));

        if let Some(m) = &inner.kontext.metriken {
            m.aktive_streams.inc();
        }
        if let Some(alt) = inner.sitzungen.insert(peer, sitzung) {
            // Gleichzeitiger zweiter START
            self.sitzung_beenden(&alt, Abbau::NeuerStart);
        }
        info!(peer = %peer, kanal = ?kanal, "Sprachstrom gestartet");
    }

    fn data(&self, peer: PeerId, nutzlast: &Bytes) {
        let Some(sitzung) = self.sitzung(peer) else {
            trace!(peer = %peer, "DATA ohne aktiven Strom ignoriert");
            return;
        };
        if let Some(m) = &self.inner.kontext.metriken {
            m.data_empfangen.inc();
        }

        if let Err(e) = sitzung.empfangen(nutzlast) {
            if e.erfordert_abbau() {
                error!(peer = %peer, fehler = %e, "Decoder ausgefallen, Strom wird abgebaut");
                self.sitzung_abbauen(peer, Abbau::Codecfehler);
            } else {
                warn!(peer = %peer, fehler = %e, "DATA verworfen");
            }
        }
    }

    fn messung(&self, statistiken: &[PeerStatistik]) {
        let (alle, team) = NetworkQuality::alle_und_team(statistiken);
        trace!(
            peers = statistiken.len(),
            verlust = alle.verlust_prozent(),
            team_verlust = team.verlust_prozent(),
            "Messung empfangen"
        );
        *self.inner.qualitaet.write() = Some((alle, team));

        let strom = self.inner.ausgang.lock().strom.clone();
        if let Some(strom) = strom {
            if let Err(e) = self.tunen(&strom) {
                self.ausgang_abbauen(&strom, e);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Wiedergabe und Zustand
    // -----------------------------------------------------------------------

    /// Mischt alle wiedergabebereiten Sprecher in `ausgabe` (interleaved)
    ///
    /// Gibt die Anzahl der Sprecher zurueck, die Samples beigetragen haben.
    pub fn wiedergabe_fuellen(&self, ausgabe: &mut [f32], kanaele: usize) -> usize {
        let puffer: Vec<Arc<PlaybackBuffer>> = self
            .inner
            .sitzungen
            .iter()
            .map(|eintrag| eintrag.wiedergabe().clone())
            .collect();
        puffer
            .iter()
            .filter(|p| p.fuellen(ausgabe, kanaele) > 0)
            .count()
    }

    /// Wiedergabepuffer eines Sprechers
    pub fn wiedergabe(&self, peer: PeerId) -> Option<Arc<PlaybackBuffer>> {
        self.sitzung(peer).map(|s| s.wiedergabe().clone())
    }

    pub fn sitzung(&self, peer: PeerId) -> Option<Arc<PeerSession>> {
        self.inner.sitzungen.get(&peer).map(|s| s.value().clone())
    }

    /// Peers mit aktivem eingehenden Strom
    pub fn aktive_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.inner.sitzungen.iter().map(|e| *e.key()).collect();
        peers.sort();
        peers
    }

    /// Zuletzt per LOSS gemeldeter Verlust unseres Stroms bei `peer`
    pub fn gemeldeter_verlust(&self, peer: PeerId) -> Option<u8> {
        self.inner.gemeldeter_verlust.get(&peer).map(|v| *v)
    }

    pub fn kanal(&self) -> Option<KanalId> {
        *self.inner.kanal.read()
    }

    /// Stellt den Empfangskanal um
    ///
    /// Laufende Stroeme auf dem alten Kanal werden abgebaut.
    pub fn kanal_setzen(&self, kanal: Option<KanalId>) {
        let alt = std::mem::replace(&mut *self.inner.kanal.write(), kanal);
        if alt == kanal {
            return;
        }
        info!(von = ?alt, nach = ?kanal, "Kanal gewechselt");

        let betroffen: Vec<PeerId> = self
            .inner
            .sitzungen
            .iter()
            .filter(|e| e.kanal().is_some() && e.kanal() != kanal)
            .map(|e| *e.key())
            .collect();
        for peer in betroffen {
            self.sitzung_abbauen(peer, Abbau::Kanalwechsel);
        }
    }

    /// Stoppt das Senden und baut alle eingehenden Stroeme ab
    pub fn herunterfahren(&self) {
        if let Err(e) = self.ziel_setzen(RouteTarget::Stopped) {
            warn!(fehler = %e, "Sprechen konnte nicht sauber beendet werden");
        }
        let peers: Vec<PeerId> = self.inner.sitzungen.iter().map(|e| *e.key()).collect();
        for peer in peers {
            self.sitzung_abbauen(peer, Abbau::Herunterfahren);
        }
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsfunktionen
    // -----------------------------------------------------------------------

    fn sitzung_abbauen(&self, peer: PeerId, grund: Abbau) -> Option<SitzungsEnde> {
        let Some((_, sitzung)) = self.inner.sitzungen.remove(&peer) else {
            match grund {
                Abbau::Stop => warn!(peer = %peer, "STOP ohne aktiven Strom"),
                _ => trace!(peer = %peer, grund = ?grund, "Kein Strom zum Abbauen"),
            }
            return None;
        };
        let ende = self.sitzung_beenden(&sitzung, grund);
        if grund.meldet_verlust() {
            self.inner.transport.senden_an(
                peer,
                VoiceNachricht::Loss {
                    prozent: ende.verlust_prozent,
                }
                .encode(),
            );
        }
        Some(ende)
    }

    fn sitzung_beenden(&self, sitzung: &PeerSession, grund: Abbau) -> SitzungsEnde {
        let (ende, ergebnis) = sitzung.beenden();
        let codec_fehler = grund == Abbau::Codecfehler || ergebnis.is_err();
        if let Err(e) = ergebnis {
            warn!(peer = %sitzung.peer(), fehler = %e, "Rest des Stroms nicht dekodierbar");
        }

        if let Some(m) = &self.inner.kontext.metriken {
            m.aktive_streams.dec();
            m.frames_verloren.inc_by(ende.verloren);
            m.frames_verdeckt.inc_by(ende.verdeckt);
            m.peer_verlust.observe(ende.verlust_prozent as f64);
            if codec_fehler {
                m.codec_fehler.inc();
            }
        }
        info!(
            peer = %sitzung.peer(),
            grund = ?grund,
            verlust = ende.verlust_prozent,
            verdeckt = ende.verdeckt,
            "Sprachstrom beendet"
        );
        ende
    }

    fn tunen(&self, strom: &Sendestrom) -> VoiceResult<()> {
        let Some((alle, team)) = *self.inner.qualitaet.read() else {
            return Ok(());
        };
        let qualitaet = if strom.ziel == RouteTarget::Team { team } else { alle };
        let tuning = EncoderTuning::aus_netzqualitaet(&qualitaet, self.inner.opus.bitrate_bps);
        strom.encoder.tunen(&tuning)?;
        if let Some(m) = &self.inner.kontext.metriken {
            m.encoder_bitrate.set(tuning.bitrate_bps as i64);
        }
        Ok(())
    }

    fn strom_schliessen(&self, strom: &Sendestrom) {
        match strom.encoder.schliessen() {
            Ok(_) | Err(AudioError::Geschlossen) => {}
            Err(e) => debug!(fehler = %e, "Restframe nicht kodiert"),
        }
    }

    /// Baut den Sendestrom nach einem Encoder-Fehler ab
    fn ausgang_abbauen(&self, strom: &Arc<Sendestrom>, fehler: VoiceError) {
        let mut ausgang = self.inner.ausgang.lock();
        let betroffen = ausgang
            .strom
            .as_ref()
            .is_some_and(|aktiv| Arc::ptr_eq(aktiv, strom));
        if !betroffen {
            return;
        }
        ausgang.strom = None;
        ausgang.ziel = RouteTarget::Stopped;
        strom
            .ziel
            .senden(&*self.inner.transport, VoiceNachricht::Stop.encode());

        if let Some(m) = &self.inner.kontext.metriken {
            m.codec_fehler.inc();
        }
        error!(ziel = %strom.ziel, fehler = %fehler, "Encoder ausgefallen, Sprechen gestoppt");
    }
}
