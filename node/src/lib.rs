//! feldfunk-node – Demo-Knoten
//!
//! Startet mehrere Sprachknoten in einem Prozess, verbindet sie ueber das
//! [`LoopbackNetz`] und laesst sie nach dem Sprechplan funken. Aufnahme ist
//! ein Sinuston pro Knoten, die Wiedergabe wird nur ausgemessen.

pub mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use feldfunk_audio::stoerrauschen;
use feldfunk_core::PeerId;
use feldfunk_observability::VoiceMetriken;
use feldfunk_voice::{LoopbackNetz, VoiceConfig, VoiceKontext, VoiceMultiplexer};

use config::NodeConfig;

/// Ein simulierter Teilnehmer
pub struct SimKnoten {
    pub peer: PeerId,
    pub mux: VoiceMultiplexer,
    pub metriken: VoiceMetriken,
    frequenz: f32,
    phase: usize,
    /// Wiedergegebene Samples mit mindestens einem Sprecher
    pub gehoert: u64,
}

impl SimKnoten {
    fn aufnehmen(&mut self, samples: usize, abtastrate: f32) -> Vec<f32> {
        let start = self.phase;
        self.phase += samples;
        (start..start + samples)
            .map(|i| (i as f32 * self.frequenz * std::f32::consts::TAU / abtastrate).sin() * 0.3)
            .collect()
    }
}

/// Haelt Netz und Knoten zusammen
pub struct Simulation {
    pub config: NodeConfig,
    pub netz: LoopbackNetz,
    pub knoten: Vec<SimKnoten>,
    zeit_ms: u64,
    letzte_messung_ms: u64,
}

impl Simulation {
    /// Baut Netz und Knoten aus der Konfiguration
    pub fn neu(config: NodeConfig) -> Result<Self> {
        config.validieren()?;
        let netz = LoopbackNetz::neu(config.simulation.netz.clone());

        let mut knoten = Vec::with_capacity(config.simulation.knoten.len());
        for (i, einstellung) in config.simulation.knoten.iter().enumerate() {
            let metriken = VoiceMetriken::neu()?;
            let mut kontext = VoiceKontext::default().mit_metriken(metriken.clone());
            let staerke = config.simulation.stoerung;
            if staerke > 0.0 {
                kontext = kontext.mit_modifikator(stoerrauschen(move || staerke));
            }

            let voice = VoiceConfig {
                opus: config.audio.opus.clone(),
                kanal: einstellung.kanal.or(config.audio.kanal),
            };
            let transport = Arc::new(netz.beitreten(einstellung.peer, einstellung.team));
            let mux = VoiceMultiplexer::neu(voice, transport, kontext)
                .with_context(|| format!("Knoten {} konnte nicht erstellt werden", einstellung.peer))?;

            knoten.push(SimKnoten {
                peer: einstellung.peer,
                mux,
                metriken,
                frequenz: 220.0 + 110.0 * i as f32,
                phase: 0,
                gehoert: 0,
            });
        }

        tracing::info!(
            knoten = knoten.len(),
            verlust = config.simulation.netz.verlust,
            umordnen = config.simulation.netz.umordnen,
            "Simulation aufgebaut"
        );

        Ok(Self {
            config,
            netz,
            knoten,
            zeit_ms: 0,
            letzte_messung_ms: 0,
        })
    }

    /// Simulierte Zeit seit dem Start
    pub fn zeit_ms(&self) -> u64 {
        self.zeit_ms
    }

    pub fn ist_fertig(&self) -> bool {
        self.zeit_ms >= self.config.simulation.dauer_ms
    }

    /// Ein Takt: Sprechziele setzen, aufnehmen, kodieren, zustellen,
    /// wiedergeben
    pub fn schritt(&mut self) -> Result<()> {
        let zeit = self.zeit_ms;
        let opus = &self.config.audio.opus;
        let frame = opus.frame_samples();
        let abtastrate = opus.sample_rate.hz() as f32;

        for k in &mut self.knoten {
            let ziel = self.config.ziel_zu(k.peer, zeit);
            k.mux
                .ziel_setzen(ziel)
                .with_context(|| format!("Sprechziel fuer {} nicht setzbar", k.peer))?;
            if ziel.ist_aktiv() {
                let samples = k.aufnehmen(frame, abtastrate);
                k.mux.aufnahme().write_one(samples);
            }
            k.mux.tick();
        }

        if zeit >= self.letzte_messung_ms + self.config.simulation.messung_ms {
            self.netz.messung_verteilen();
            self.letzte_messung_ms = zeit;
        }
        self.pumpen();

        let mut ausgabe = vec![0.0f32; frame];
        for k in &mut self.knoten {
            ausgabe.fill(0.0);
            if k.mux.wiedergabe_fuellen(&mut ausgabe, 1) > 0 {
                k.gehoert += frame as u64;
            }
        }

        self.zeit_ms += self.config.takt_ms();
        Ok(())
    }

    /// Stoppt alle Sprecher und stellt die letzten Nachrichten zu
    pub fn beenden(&mut self) {
        for k in &self.knoten {
            k.mux.herunterfahren();
        }
        self.pumpen();
    }

    /// Loggt den Zustand jedes Knotens
    pub fn bericht(&self) {
        for k in &self.knoten {
            let gemeldet: Vec<String> = self
                .knoten
                .iter()
                .filter(|anderer| anderer.peer != k.peer)
                .filter_map(|anderer| {
                    k.mux
                        .gemeldeter_verlust(anderer.peer)
                        .map(|v| format!("{}={v}%", anderer.peer))
                })
                .collect();
            tracing::info!(
                peer = %k.peer,
                gesendet = k.metriken.data_gesendet.get(),
                empfangen = k.metriken.data_empfangen.get(),
                verloren = k.metriken.frames_verloren.get(),
                verdeckt = k.metriken.frames_verdeckt.get(),
                gehoert_ms = k.gehoert * 1000 / self.config.audio.opus.sample_rate.hz() as u64,
                gemeldeter_verlust = %gemeldet.join(","),
                "Knoten-Bericht"
            );
        }
    }

    /// Metriken aller Knoten im Prometheus-Textformat
    pub fn metriken_exportieren(&self) -> Result<String> {
        let mut text = String::new();
        for k in &self.knoten {
            text.push_str(&format!("# {}\n", k.peer));
            text.push_str(&k.metriken.exportieren()?);
        }
        Ok(text)
    }

    /// Laeuft im Takt der Frame-Dauer bis `dauer_ms` oder Ctrl-C
    pub async fn starten(mut self) -> Result<()> {
        let mut takt = tokio::time::interval(Duration::from_millis(self.config.takt_ms()));
        takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            dauer_ms = self.config.simulation.dauer_ms,
            takt_ms = self.config.takt_ms(),
            "Simulation laeuft"
        );

        while !self.ist_fertig() {
            tokio::select! {
                _ = takt.tick() => self.schritt()?,
                ergebnis = tokio::signal::ctrl_c() => {
                    ergebnis?;
                    tracing::info!("Shutdown-Signal empfangen, Simulation wird beendet");
                    break;
                }
            }
        }

        self.beenden();
        self.bericht();
        if self.config.simulation.metriken_ausgeben {
            println!("{}", self.metriken_exportieren()?);
        }
        Ok(())
    }

    fn pumpen(&self) {
        let liste: Vec<(PeerId, &VoiceMultiplexer)> =
            self.knoten.iter().map(|k| (k.peer, &k.mux)).collect();
        self.netz.pumpen(&liste);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feldfunk_core::KanalId;
    use feldfunk_voice::RouteTarget;

    fn kurz() -> NodeConfig {
        let mut cfg = NodeConfig::default();
        cfg.simulation.dauer_ms = 400;
        cfg.sprechen.plan = vec![config::Sprechabschnitt {
            peer: PeerId(1),
            ab_ms: 0,
            bis_ms: 200,
            ziel: RouteTarget::Global,
        }];
        cfg
    }

    #[test]
    fn globaler_sprecher_wird_gehoert() {
        let mut sim = Simulation::neu(kurz()).unwrap();
        for _ in 0..10 {
            sim.schritt().unwrap();
        }
        assert_eq!(sim.zeit_ms(), 200);
        assert_eq!(sim.knoten[1].mux.aktive_peers(), vec![PeerId(1)]);
        assert_eq!(sim.knoten[2].mux.aktive_peers(), vec![PeerId(1)]);
        assert!(sim.knoten[1].gehoert > 0);
        assert_eq!(sim.knoten[0].metriken.data_gesendet.get(), 10);

        // Abschnitt vorbei: STOP, Hoerer melden LOSS
        sim.schritt().unwrap();
        assert!(sim.knoten[1].mux.aktive_peers().is_empty());
        assert_eq!(sim.knoten[0].mux.gemeldeter_verlust(PeerId(2)), Some(0));
    }

    #[test]
    fn kanalfunk_erreicht_nur_den_kanal() {
        let mut cfg = kurz();
        cfg.sprechen.plan[0].ziel = RouteTarget::Channel(KanalId(1));
        let mut sim = Simulation::neu(cfg).unwrap();
        for _ in 0..5 {
            sim.schritt().unwrap();
        }
        // Knoten 2 hat keinen Kanal eingestellt, Knoten 3 hoert Kanal 1
        assert!(sim.knoten[1].mux.aktive_peers().is_empty());
        assert_eq!(sim.knoten[2].mux.aktive_peers(), vec![PeerId(1)]);
    }

    #[test]
    fn metriken_export_enthaelt_alle_knoten() {
        let mut sim = Simulation::neu(kurz()).unwrap();
        sim.schritt().unwrap();
        let text = sim.metriken_exportieren().unwrap();
        assert!(text.contains("# peer:1"));
        assert!(text.contains("# peer:3"));
        assert!(text.contains("feldfunk_data_sent_total"));
    }

    #[test]
    fn ungueltige_config_wird_abgelehnt() {
        let mut cfg = kurz();
        cfg.logging.level = String::new();
        assert!(Simulation::neu(cfg).is_err());
    }

    #[tokio::test]
    async fn lauf_endet_nach_der_dauer() {
        let mut cfg = kurz();
        cfg.simulation.dauer_ms = 100;
        let sim = Simulation::neu(cfg).unwrap();
        sim.starten().await.unwrap();
    }
}
