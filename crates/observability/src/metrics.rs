//! Prometheus-kompatible Metriken der Sprach-Pipeline
//!
//! Registrierte Metriken:
//! - `feldfunk_peer_streams_active` – Gauge: Aktive eingehende Sprachstroeme
//! - `feldfunk_data_sent_total` – Counter: Gesendete DATA-Nachrichten
//! - `feldfunk_data_received_total` – Counter: Empfangene DATA-Nachrichten
//! - `feldfunk_frames_lost_total` – Counter: Als verloren erkannte Frames
//! - `feldfunk_frames_concealed_total` – Counter: Per FEC/DRED/PLC erzeugte Frames
//! - `feldfunk_codec_faults_total` – Counter: Stillgelegte Encoder/Decoder
//! - `feldfunk_peer_loss_percent` – Histogram: Verlust beim Stromende
//! - `feldfunk_encoder_complexity` – Gauge: Aktuelle Encoder-Komplexitaet
//! - `feldfunk_encoder_bitrate_bps` – Gauge: Aktuelle Encoder-Bitrate
//!
//! Jede Instanz hat ihre eigene Registry, damit mehrere Knoten in einem
//! Prozess (Loopback, Tests) getrennt zaehlen.

use anyhow::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Alle Feldfunk-Prometheus-Metriken
#[derive(Clone)]
pub struct VoiceMetriken {
    pub registry: Arc<Registry>,

    pub aktive_streams: IntGauge,
    pub data_gesendet: IntCounter,
    pub data_empfangen: IntCounter,
    pub frames_verloren: IntCounter,
    pub frames_verdeckt: IntCounter,
    pub codec_fehler: IntCounter,
    pub peer_verlust: Histogram,
    pub encoder_komplexitaet: IntGauge,
    pub encoder_bitrate: IntGauge,
}

impl VoiceMetriken {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let aktive_streams = IntGauge::with_opts(Opts::new(
            "feldfunk_peer_streams_active",
            "Anzahl aktiver eingehender Sprachstroeme",
        ))?;
        registry.register(Box::new(aktive_streams.clone()))?;

        let data_gesendet = IntCounter::with_opts(Opts::new(
            "feldfunk_data_sent_total",
            "Gesamtanzahl gesendeter DATA-Nachrichten",
        ))?;
        registry.register(Box::new(data_gesendet.clone()))?;

        let data_empfangen = IntCounter::with_opts(Opts::new(
            "feldfunk_data_received_total",
            "Gesamtanzahl empfangener DATA-Nachrichten",
        ))?;
        registry.register(Box::new(data_empfangen.clone()))?;

        let frames_verloren = IntCounter::with_opts(Opts::new(
            "feldfunk_frames_lost_total",
            "Im Jitter-Stream als verloren erkannte Frames",
        ))?;
        registry.register(Box::new(frames_verloren.clone()))?;

        let frames_verdeckt = IntCounter::with_opts(Opts::new(
            "feldfunk_frames_concealed_total",
            "Per FEC, DRED oder PLC erzeugte Frames",
        ))?;
        registry.register(Box::new(frames_verdeckt.clone()))?;

        let codec_fehler = IntCounter::with_opts(Opts::new(
            "feldfunk_codec_faults_total",
            "Nach Codec-Fehler stillgelegte Encoder und Decoder",
        ))?;
        registry.register(Box::new(codec_fehler.clone()))?;

        let peer_verlust = Histogram::with_opts(
            HistogramOpts::new(
                "feldfunk_peer_loss_percent",
                "Paketverlust eines Sprachstroms beim Stromende (0 bis 100)",
            )
            .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0]),
        )?;
        registry.register(Box::new(peer_verlust.clone()))?;

        let encoder_komplexitaet = IntGauge::with_opts(Opts::new(
            "feldfunk_encoder_complexity",
            "Aktuelle Komplexitaet des Encoders (0-10)",
        ))?;
        registry.register(Box::new(encoder_komplexitaet.clone()))?;

        let encoder_bitrate = IntGauge::with_opts(Opts::new(
            "feldfunk_encoder_bitrate_bps",
            "Aktuelle Encoder-Bitrate in Bits pro Sekunde",
        ))?;
        registry.register(Box::new(encoder_bitrate.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            aktive_streams,
            data_gesendet,
            data_empfangen,
            frames_verloren,
            frames_verdeckt,
            codec_fehler,
            peer_verlust,
            encoder_komplexitaet,
            encoder_bitrate,
        })
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
