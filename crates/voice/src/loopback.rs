//! In-Prozess-Netz fuer Tests und den Demo-Knoten
//!
//! Jeder Knoten bekommt einen Eingang ([`StreamQueue`]) fuer seine
//! [`TransportEreignis`]se. Senden legt nur in fremde Eingaenge ab und ruft
//! nie synchron in einen Multiplexer zurueck; [`LoopbackNetz::pumpen`]
//! stellt die Eingaenge zu.
//!
//! ## Simulation
//! - Verlust: DATA wird mit Wahrscheinlichkeit `verlust` verworfen
//! - Umordnung: ein DATA wird zurueckgehalten und hinter das naechste Paket
//!   an denselben Empfaenger gestellt. Kommt keins, geht es spaetestens beim
//!   zweiten `pumpen` raus.
//! - Steuerbefehle (HANDSHAKE, START, STOP, LOSS) kommen immer und in
//!   Reihenfolge an. Ein zurueckgehaltenes DATA wird vor ihnen zugestellt.
//!
//! Der Zufallsgenerator ist mit `seed` initialisiert, Laeufe sind damit
//! reproduzierbar.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use feldfunk_core::{PeerId, StreamQueue};
use feldfunk_protocol::quality::PeerStatistik;
use feldfunk_protocol::voice::Befehl;

use crate::multiplexer::VoiceMultiplexer;
use crate::transport::{Transport, TransportEreignis};

/// Obergrenze fuer Zustellrunden pro `pumpen` (Antworten auf Antworten)
const MAX_RUNDEN: usize = 16;

// ---------------------------------------------------------------------------
// Optionen
// ---------------------------------------------------------------------------

/// Eigenschaften des simulierten Netzes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackOptionen {
    /// Verlustwahrscheinlichkeit fuer DATA (0.0–1.0)
    pub verlust: f32,
    /// Wahrscheinlichkeit, dass ein DATA hinter das naechste Paket rutscht
    pub umordnen: f32,
    /// Gemeldeter Round-Trip
    pub ping_ms: u32,
    /// Gemeldete Bandbreite in Bytes pro Sekunde
    pub bandbreite: u32,
    pub seed: u64,
}

impl Default for LoopbackOptionen {
    fn default() -> Self {
        Self {
            verlust: 0.0,
            umordnen: 0.0,
            ping_ms: 40,
            bandbreite: 16_000,
            seed: 1,
        }
    }
}

impl LoopbackOptionen {
    pub fn validieren(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.verlust) {
            return Err(format!(
                "Verlust muss zwischen 0.0 und 1.0 liegen (war: {})",
                self.verlust
            ));
        }
        if !(0.0..=1.0).contains(&self.umordnen) {
            return Err(format!(
                "Umordnung muss zwischen 0.0 und 1.0 liegen (war: {})",
                self.umordnen
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Netzzustand
// ---------------------------------------------------------------------------

struct Knoten {
    team: u8,
    eingang: Arc<StreamQueue<TransportEreignis>>,
}

#[derive(Debug, Clone, Copy)]
enum Empfaenger {
    Einzeln(PeerId),
    Team,
    Alle,
}

/// DATA-Zaehler einer gerichteten Verbindung seit der letzten Messung
#[derive(Debug, Default, Clone, Copy)]
struct Zaehler {
    gesendet: u64,
    verloren: u64,
}

struct Zustand {
    zufall: StdRng,
    /// Pro Empfaenger hoechstens ein zurueckgehaltenes DATA mit der
    /// Generation, in der es zurueckgehalten wurde
    zurueckgehalten: HashMap<PeerId, (u64, TransportEreignis)>,
    zaehler: HashMap<(PeerId, PeerId), Zaehler>,
    getrennt: HashSet<(PeerId, PeerId)>,
    generation: u64,
}

struct NetzInner {
    optionen: LoopbackOptionen,
    knoten: RwLock<BTreeMap<PeerId, Knoten>>,
    zustand: Mutex<Zustand>,
}

impl NetzInner {
    fn senden(&self, von: PeerId, empfaenger: Empfaenger, daten: Bytes) {
        let knoten = self.knoten.read();
        let Some(absender) = knoten.get(&von) else {
            trace!(peer = %von, "Absender nicht mehr im Netz");
            return;
        };
        let ist_data = daten.first() == Some(&(Befehl::Data as u8));

        let mut zustand = self.zustand.lock();
        for (&an, ziel) in knoten.iter() {
            let passt = match empfaenger {
                Empfaenger::Einzeln(peer) => an == peer,
                Empfaenger::Team => ziel.team == absender.team,
                Empfaenger::Alle => true,
            };
            if an == von || !passt {
                continue;
            }
            zustand.uebertragen(&self.optionen, von, an, &ziel.eingang, ist_data, daten.clone());
        }
    }
}

impl Zustand {
    fn uebertragen(
        &mut self,
        optionen: &LoopbackOptionen,
        von: PeerId,
        an: PeerId,
        eingang: &StreamQueue<TransportEreignis>,
        ist_data: bool,
        daten: Bytes,
    ) {
        if self.getrennt.contains(&(von, an)) {
            trace!(von = %von, an = %an, "Verbindung getrennt, Paket verworfen");
            return;
        }
        let ereignis = TransportEreignis::Paket { von, daten };

        if !ist_data {
            if let Some((_, wartend)) = self.zurueckgehalten.remove(&an) {
                eingang.write_one(wartend);
            }
            eingang.write_one(ereignis);
            return;
        }

        let zaehler = self.zaehler.entry((von, an)).or_default();
        zaehler.gesendet += 1;
        if optionen.verlust > 0.0 && self.zufall.gen_bool(optionen.verlust.clamp(0.0, 1.0) as f64)
        {
            zaehler.verloren += 1;
            trace!(von = %von, an = %an, "DATA verloren (simuliert)");
            return;
        }

        if let Some((_, wartend)) = self.zurueckgehalten.remove(&an) {
            eingang.write(vec![ereignis, wartend]);
            return;
        }
        if optionen.umordnen > 0.0
            && self.zufall.gen_bool(optionen.umordnen.clamp(0.0, 1.0) as f64)
        {
            trace!(von = %von, an = %an, "DATA zurueckgehalten (simuliert)");
            self.zurueckgehalten.insert(an, (self.generation, ereignis));
            return;
        }
        eingang.write_one(ereignis);
    }
}

// ---------------------------------------------------------------------------
// LoopbackNetz
// ---------------------------------------------------------------------------

/// Simuliertes Netz zwischen mehreren Knoten eines Prozesses
#[derive(Clone)]
pub struct LoopbackNetz {
    inner: Arc<NetzInner>,
}

impl LoopbackNetz {
    pub fn neu(optionen: LoopbackOptionen) -> Self {
        let zufall = StdRng::seed_from_u64(optionen.seed);
        Self {
            inner: Arc::new(NetzInner {
                optionen,
                knoten: RwLock::new(BTreeMap::new()),
                zustand: Mutex::new(Zustand {
                    zufall,
                    zurueckgehalten: HashMap::new(),
                    zaehler: HashMap::new(),
                    getrennt: HashSet::new(),
                    generation: 0,
                }),
            }),
        }
    }

    /// Nimmt einen Knoten auf; beide Seiten jeder neuen Verbindung bekommen
    /// `NeueVerbindung`
    pub fn beitreten(&self, peer: PeerId, team: u8) -> LoopbackTransport {
        let eingang = Arc::new(StreamQueue::neu());
        let mut knoten = self.inner.knoten.write();
        let ersetzt = knoten
            .insert(
                peer,
                Knoten {
                    team,
                    eingang: eingang.clone(),
                },
            )
            .is_some();
        if ersetzt {
            warn!(peer = %peer, "Knoten war bereits im Netz, Eingang ersetzt");
        }

        let mut nachbarn = 0;
        for (&anderer, k) in knoten.iter().filter(|(p, _)| **p != peer) {
            eingang.write_one(TransportEreignis::NeueVerbindung(anderer));
            k.eingang.write_one(TransportEreignis::NeueVerbindung(peer));
            nachbarn += 1;
        }
        drop(knoten);

        self.inner
            .zustand
            .lock()
            .getrennt
            .retain(|(a, b)| *a != peer && *b != peer);
        debug!(peer = %peer, team, nachbarn, "Knoten beigetreten");

        LoopbackTransport {
            peer,
            netz: self.inner.clone(),
        }
    }

    /// Entfernt einen Knoten; alle anderen bekommen `VerbindungVerloren`
    pub fn verlassen(&self, peer: PeerId) {
        let mut knoten = self.inner.knoten.write();
        if knoten.remove(&peer).is_none() {
            return;
        }
        for k in knoten.values() {
            k.eingang.write_one(TransportEreignis::VerbindungVerloren(peer));
        }
        drop(knoten);

        let mut zustand = self.inner.zustand.lock();
        zustand.zurueckgehalten.remove(&peer);
        zustand.zaehler.retain(|(a, b), _| *a != peer && *b != peer);
        debug!(peer = %peer, "Knoten hat das Netz verlassen");
    }

    /// Eingang eines Knotens
    pub fn eingang(&self, peer: PeerId) -> Option<Arc<StreamQueue<TransportEreignis>>> {
        self.inner.knoten.read().get(&peer).map(|k| k.eingang.clone())
    }

    /// Stellt alle Eingaenge zu, bis keine Antworten mehr entstehen
    ///
    /// Gibt die Anzahl zugestellter Ereignisse zurueck. Knoten, die nicht in
    /// `knoten` stehen, behalten ihren Eingang.
    pub fn pumpen(&self, knoten: &[(PeerId, &VoiceMultiplexer)]) -> usize {
        self.zurueckgehaltene_freigeben();

        let mut zugestellt = 0;
        for _ in 0..MAX_RUNDEN {
            let mut runde = 0;
            for (peer, mux) in knoten {
                let Some(eingang) = self.eingang(*peer) else {
                    continue;
                };
                for ereignis in eingang.read_all() {
                    mux.ereignis(ereignis);
                    runde += 1;
                }
            }
            if runde == 0 {
                break;
            }
            zugestellt += runde;
        }
        zugestellt
    }

    /// Legt jedem Knoten eine `Messung` ueber seine Nachbarn in den Eingang
    ///
    /// Der Verlust stammt aus den DATA-Zaehlern seit der letzten Messung,
    /// ohne gesendete DATA gilt der eingestellte Wert. Knoten ohne Nachbarn
    /// bekommen keine Messung.
    pub fn messung_verteilen(&self) {
        let optionen = &self.inner.optionen;
        let knoten = self.inner.knoten.read();
        let mut zustand = self.inner.zustand.lock();

        for (&peer, eigener) in knoten.iter() {
            let statistiken: Vec<PeerStatistik> = knoten
                .iter()
                .filter(|(p, _)| **p != peer && !zustand.getrennt.contains(&(peer, **p)))
                .map(|(&anderer, k)| {
                    let z = zustand
                        .zaehler
                        .get(&(peer, anderer))
                        .copied()
                        .unwrap_or_default();
                    let verlust = if z.gesendet == 0 {
                        optionen.verlust
                    } else {
                        z.verloren as f32 / z.gesendet as f32
                    };
                    PeerStatistik {
                        peer: anderer,
                        verlust,
                        ping_ms: optionen.ping_ms,
                        bandbreite: optionen.bandbreite,
                        im_team: k.team == eigener.team,
                    }
                })
                .collect();
            if !statistiken.is_empty() {
                eigener
                    .eingang
                    .write_one(TransportEreignis::Messung(statistiken));
            }
        }
        zustand.zaehler.clear();
    }

    /// Knoten im Netz, aufsteigend sortiert
    pub fn knoten(&self) -> Vec<PeerId> {
        self.inner.knoten.read().keys().copied().collect()
    }

    pub fn optionen(&self) -> &LoopbackOptionen {
        &self.inner.optionen
    }

    fn zurueckgehaltene_freigeben(&self) {
        let knoten = self.inner.knoten.read();
        let mut zustand = self.inner.zustand.lock();
        zustand.generation += 1;
        let generation = zustand.generation;

        let faellig: Vec<PeerId> = zustand
            .zurueckgehalten
            .iter()
            .filter(|(_, (gehalten, _))| gehalten + 1 < generation)
            .map(|(peer, _)| *peer)
            .collect();
        for peer in faellig {
            let Some((_, ereignis)) = zustand.zurueckgehalten.remove(&peer) else {
                continue;
            };
            if let Some(k) = knoten.get(&peer) {
                k.eingang.write_one(ereignis);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// LoopbackTransport
// ---------------------------------------------------------------------------

/// Sicht eines Knotens auf das [`LoopbackNetz`]
#[derive(Clone)]
pub struct LoopbackTransport {
    peer: PeerId,
    netz: Arc<NetzInner>,
}

impl LoopbackTransport {
    pub fn peer(&self) -> PeerId {
        self.peer
    }
}

impl Transport for LoopbackTransport {
    fn senden_an(&self, peer: PeerId, daten: Bytes) {
        self.netz.senden(self.peer, Empfaenger::Einzeln(peer), daten);
    }

    fn senden_an_team(&self, daten: Bytes) {
        self.netz.senden(self.peer, Empfaenger::Team, daten);
    }

    fn senden_an_alle(&self, daten: Bytes) {
        self.netz.senden(self.peer, Empfaenger::Alle, daten);
    }

    fn trennen(&self, peer: PeerId) {
        let knoten = self.netz.knoten.read();
        {
            let mut zustand = self.netz.zustand.lock();
            zustand.getrennt.insert((self.peer, peer));
            zustand.getrennt.insert((peer, self.peer));
        }
        if let Some(k) = knoten.get(&self.peer) {
            k.eingang.write_one(TransportEreignis::VerbindungVerloren(peer));
        }
        if let Some(k) = knoten.get(&peer) {
            k.eingang
                .write_one(TransportEreignis::VerbindungVerloren(self.peer));
        }
        debug!(peer = %self.peer, getrennt_von = %peer, "Verbindung getrennt");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VoiceConfig;
    use crate::kontext::VoiceKontext;
    use crate::route::RouteTarget;
    use crate::testkit::{TestFabrik, FRAME};
    use feldfunk_protocol::voice::{DataPaket, VoiceNachricht};

    fn netz(optionen: LoopbackOptionen) -> (LoopbackNetz, Vec<LoopbackTransport>) {
        let netz = LoopbackNetz::neu(optionen);
        let transporte = vec![
            netz.beitreten(PeerId(1), 0),
            netz.beitreten(PeerId(2), 0),
            netz.beitreten(PeerId(3), 1),
        ];
        for peer in netz.knoten() {
            netz.eingang(peer).unwrap().read_all();
        }
        (netz, transporte)
    }

    fn empfangen(netz: &LoopbackNetz, peer: u64) -> Vec<TransportEreignis> {
        netz.eingang(PeerId(peer)).unwrap().read_all()
    }

    fn data(seq: u16) -> Bytes {
        DataPaket::kodieren(seq, &[b"abc"])
    }

    fn seq_von(ereignis: &TransportEreignis) -> u16 {
        match ereignis {
            TransportEreignis::Paket { daten, .. } => {
                DataPaket::parsen(&daten.slice(1..)).unwrap().seq
            }
            anderes => panic!("Kein Paket: {anderes:?}"),
        }
    }

    #[test]
    fn beitritt_meldet_beide_seiten() {
        let netz = LoopbackNetz::neu(LoopbackOptionen::default());
        let _a = netz.beitreten(PeerId(1), 0);
        let _b = netz.beitreten(PeerId(2), 0);
        assert_eq!(
            empfangen(&netz, 1),
            vec![TransportEreignis::NeueVerbindung(PeerId(2))]
        );
        assert_eq!(
            empfangen(&netz, 2),
            vec![TransportEreignis::NeueVerbindung(PeerId(1))]
        );
    }

    #[test]
    fn team_und_alle() {
        let (netz, t) = netz(LoopbackOptionen::default());
        t[0].senden_an_team(VoiceNachricht::Stop.encode());
        assert_eq!(empfangen(&netz, 2).len(), 1);
        assert!(empfangen(&netz, 3).is_empty());
        assert!(empfangen(&netz, 1).is_empty());

        t[0].senden_an_alle(VoiceNachricht::Stop.encode());
        assert_eq!(empfangen(&netz, 2).len(), 1);
        assert_eq!(empfangen(&netz, 3).len(), 1);
        assert!(empfangen(&netz, 1).is_empty());

        t[2].senden_an(PeerId(1), VoiceNachricht::Stop.encode());
        assert_eq!(
            empfangen(&netz, 1),
            vec![TransportEreignis::Paket {
                von: PeerId(3),
                daten: VoiceNachricht::Stop.encode(),
            }]
        );
    }

    #[test]
    fn verlust_trifft_nur_data() {
        let (netz, t) = netz(LoopbackOptionen {
            verlust: 1.0,
            ..LoopbackOptionen::default()
        });
        t[0].senden_an(PeerId(2), VoiceNachricht::Start { kanal: None }.encode());
        t[0].senden_an(PeerId(2), data(0));
        t[0].senden_an(PeerId(2), VoiceNachricht::Stop.encode());

        let ankunft = empfangen(&netz, 2);
        assert_eq!(ankunft.len(), 2);
        netz.messung_verteilen();
        let TransportEreignis::Messung(statistiken) = &empfangen(&netz, 1)[0] else {
            panic!("Messung erwartet");
        };
        let zu_2 = statistiken.iter().find(|s| s.peer == PeerId(2)).unwrap();
        assert_eq!(zu_2.verlust, 1.0);
        assert!(zu_2.im_team);
        let zu_3 = statistiken.iter().find(|s| s.peer == PeerId(3)).unwrap();
        assert!(!zu_3.im_team);
    }

    #[test]
    fn umordnung_tauscht_mit_dem_naechsten_paket() {
        let (netz, t) = netz(LoopbackOptionen {
            umordnen: 1.0,
            ..LoopbackOptionen::default()
        });
        t[0].senden_an(PeerId(2), data(0));
        assert!(empfangen(&netz, 2).is_empty());
        t[0].senden_an(PeerId(2), data(1));
        let ankunft = empfangen(&netz, 2);
        assert_eq!(ankunft.iter().map(seq_von).collect::<Vec<_>>(), vec![1, 0]);
    }

    #[test]
    fn steuerbefehl_ueberholt_kein_data() {
        let (netz, t) = netz(LoopbackOptionen {
            umordnen: 1.0,
            ..LoopbackOptionen::default()
        });
        t[0].senden_an(PeerId(2), data(0));
        t[0].senden_an(PeerId(2), VoiceNachricht::Stop.encode());
        let ankunft = empfangen(&netz, 2);
        assert_eq!(ankunft.len(), 2);
        assert_eq!(seq_von(&ankunft[0]), 0);
    }

    #[test]
    fn zurueckgehaltenes_data_kommt_nach_zwei_runden() {
        let (netz, t) = netz(LoopbackOptionen {
            umordnen: 1.0,
            ..LoopbackOptionen::default()
        });
        t[0].senden_an(PeerId(2), data(0));
        netz.pumpen(&[]);
        assert!(empfangen(&netz, 2).is_empty());
        netz.pumpen(&[]);
        assert_eq!(empfangen(&netz, 2).len(), 1);
    }

    #[test]
    fn trennen_meldet_beiden_und_sperrt() {
        let (netz, t) = netz(LoopbackOptionen::default());
        t[0].trennen(PeerId(2));
        assert_eq!(
            empfangen(&netz, 1),
            vec![TransportEreignis::VerbindungVerloren(PeerId(2))]
        );
        assert_eq!(
            empfangen(&netz, 2),
            vec![TransportEreignis::VerbindungVerloren(PeerId(1))]
        );
        t[1].senden_an_alle(VoiceNachricht::Stop.encode());
        assert!(empfangen(&netz, 1).is_empty());
        assert_eq!(empfangen(&netz, 3).len(), 1);
    }

    #[test]
    fn verlassen_meldet_verbindungsverlust() {
        let (netz, t) = netz(LoopbackOptionen::default());
        netz.verlassen(PeerId(3));
        assert_eq!(netz.knoten(), vec![PeerId(1), PeerId(2)]);
        assert_eq!(
            empfangen(&netz, 1),
            vec![TransportEreignis::VerbindungVerloren(PeerId(3))]
        );
        // Abgemeldeter Knoten sendet ins Leere
        t[2].senden_an_alle(VoiceNachricht::Stop.encode());
        assert!(empfangen(&netz, 1).is_empty());
    }

    #[test]
    fn ungueltige_optionen() {
        let optionen = LoopbackOptionen {
            verlust: 1.5,
            ..LoopbackOptionen::default()
        };
        assert!(optionen.validieren().is_err());
        assert!(LoopbackOptionen::default().validieren().is_ok());
    }

    #[test]
    fn zwei_multiplexer_sprechen_miteinander() {
        let netz = LoopbackNetz::neu(LoopbackOptionen::default());
        let erzeugen = |peer: u64| {
            let kontext = VoiceKontext::default().mit_fabrik(Arc::new(TestFabrik::default()));
            let transport = Arc::new(netz.beitreten(PeerId(peer), 0));
            VoiceMultiplexer::neu(VoiceConfig::default(), transport, kontext).unwrap()
        };
        let a = erzeugen(1);
        let b = erzeugen(2);
        let knoten = [(PeerId(1), &a), (PeerId(2), &b)];
        // NeueVerbindung -> HANDSHAKE in beide Richtungen
        assert_eq!(netz.pumpen(&knoten), 4);

        a.ziel_setzen(RouteTarget::Global).unwrap();
        for _ in 0..4 {
            a.aufnahme().write_one(vec![0.25; FRAME]);
            a.tick();
        }
        netz.pumpen(&knoten);
        assert_eq!(b.aktive_peers(), vec![PeerId(1)]);
        assert_eq!(b.wiedergabe(PeerId(1)).unwrap().gepuffert(), 4 * FRAME);

        a.ziel_setzen(RouteTarget::Stopped).unwrap();
        netz.pumpen(&knoten);
        assert!(b.aktive_peers().is_empty());
        assert_eq!(a.gemeldeter_verlust(PeerId(2)), Some(0));
    }
}
