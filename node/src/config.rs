//! Knoten-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! Standardwerte, der Demo-Knoten laeuft also auch ohne Datei.

use serde::{Deserialize, Serialize};

use feldfunk_core::{KanalId, PeerId};
use feldfunk_observability::logging::log_level_gueltig;
use feldfunk_voice::{LoopbackOptionen, RouteTarget, VoiceConfig};

/// Vollstaendige Konfiguration des Demo-Knotens
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Codec und Empfangskanal (Vorgabe fuer alle simulierten Knoten)
    pub audio: VoiceConfig,
    pub simulation: SimulationEinstellungen,
    /// Wer wann wohin spricht
    pub sprechen: SprechEinstellungen,
    pub logging: LoggingEinstellungen,
}

/// Ablauf der Simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationEinstellungen {
    /// Gesamtdauer in Millisekunden
    pub dauer_ms: u64,
    /// Abstand zwischen zwei Messungen der Netzqualitaet
    pub messung_ms: u64,
    /// Staerke der Funkstoerung auf dekodiertem Audio (0.0 = aus)
    pub stoerung: f32,
    /// Metriken am Ende im Prometheus-Textformat ausgeben
    pub metriken_ausgeben: bool,
    pub netz: LoopbackOptionen,
    pub knoten: Vec<KnotenEinstellung>,
}

impl Default for SimulationEinstellungen {
    fn default() -> Self {
        Self {
            dauer_ms: 8_000,
            messung_ms: 1_000,
            stoerung: 0.0,
            metriken_ausgeben: false,
            netz: LoopbackOptionen::default(),
            knoten: vec![
                KnotenEinstellung {
                    peer: PeerId(1),
                    team: 0,
                    kanal: Some(KanalId(1)),
                },
                KnotenEinstellung {
                    peer: PeerId(2),
                    team: 0,
                    kanal: None,
                },
                KnotenEinstellung {
                    peer: PeerId(3),
                    team: 1,
                    kanal: Some(KanalId(1)),
                },
            ],
        }
    }
}

/// Ein simulierter Teilnehmer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnotenEinstellung {
    pub peer: PeerId,
    pub team: u8,
    /// Ueberschreibt `audio.kanal`
    #[serde(default)]
    pub kanal: Option<KanalId>,
}

/// Sprechplan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SprechEinstellungen {
    pub plan: Vec<Sprechabschnitt>,
}

impl Default for SprechEinstellungen {
    fn default() -> Self {
        Self {
            plan: vec![
                Sprechabschnitt {
                    peer: PeerId(1),
                    ab_ms: 0,
                    bis_ms: 2_000,
                    ziel: RouteTarget::Global,
                },
                Sprechabschnitt {
                    peer: PeerId(2),
                    ab_ms: 2_500,
                    bis_ms: 4_500,
                    ziel: RouteTarget::Team,
                },
                Sprechabschnitt {
                    peer: PeerId(3),
                    ab_ms: 5_000,
                    bis_ms: 7_000,
                    ziel: RouteTarget::Channel(KanalId(1)),
                },
            ],
        }
    }
}

/// `peer` spricht im Zeitraum `[ab_ms, bis_ms)` an `ziel`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sprechabschnitt {
    pub peer: PeerId,
    pub ab_ms: u64,
    pub bis_ms: u64,
    pub ziel: RouteTarget,
}

impl Sprechabschnitt {
    pub fn aktiv(&self, zeit_ms: u64) -> bool {
        (self.ab_ms..self.bis_ms).contains(&zeit_ms)
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Filter-Direktive: "trace", "debug", "info", "feldfunk_voice=debug", ...
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl NodeConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Prueft die Konfiguration auf Widersprueche
    pub fn validieren(&self) -> anyhow::Result<()> {
        self.audio
            .validieren()
            .map_err(|e| anyhow::anyhow!("[audio]: {e}"))?;
        self.simulation
            .netz
            .validieren()
            .map_err(|e| anyhow::anyhow!("[simulation.netz]: {e}"))?;

        if !log_level_gueltig(&self.logging.level) {
            anyhow::bail!("[logging]: ungueltiger Level '{}'", self.logging.level);
        }
        if self.simulation.messung_ms == 0 {
            anyhow::bail!("[simulation]: messung_ms muss groesser als 0 sein");
        }

        let knoten = &self.simulation.knoten;
        for (i, k) in knoten.iter().enumerate() {
            if knoten[..i].iter().any(|vorher| vorher.peer == k.peer) {
                anyhow::bail!("[simulation]: {} ist doppelt eingetragen", k.peer);
            }
        }
        for abschnitt in &self.sprechen.plan {
            if !knoten.iter().any(|k| k.peer == abschnitt.peer) {
                anyhow::bail!("[sprechen]: {} ist kein simulierter Knoten", abschnitt.peer);
            }
            if abschnitt.ab_ms >= abschnitt.bis_ms {
                anyhow::bail!(
                    "[sprechen]: Abschnitt von {} endet vor seinem Beginn",
                    abschnitt.peer
                );
            }
        }
        Ok(())
    }

    /// Sprechziel von `peer` zum Zeitpunkt `zeit_ms`
    pub fn ziel_zu(&self, peer: PeerId, zeit_ms: u64) -> RouteTarget {
        self.sprechen
            .plan
            .iter()
            .find(|a| a.peer == peer && a.aktiv(zeit_ms))
            .map(|a| a.ziel)
            .unwrap_or_default()
    }

    /// Frame-Dauer des Codecs, zugleich der Simulations-Takt
    pub fn takt_ms(&self) -> u64 {
        self.audio.opus.frame_size.as_ms() as u64
    }
}
