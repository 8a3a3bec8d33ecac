//! Sprach-Decoder: Opus-Frames -> Sample-Batches
//!
//! Frames bis 2 Bytes sind Verlust-/DTX-Marker und erzeugen kein Audio,
//! erhoehen aber den Verlustzaehler. Das naechste echte Paket rekonstruiert
//! zuerst die verlorenen Frames und wird danach normal dekodiert:
//!
//! - der unmittelbare Vorgaenger ueber Inband-FEC, falls das Paket SILK-Anteile hat
//! - aeltere Frames ueber DRED, soweit die Redundanz reicht
//! - alles andere ueber PLC
//!
//! Ein Batch von Frames ergibt genau einen Sample-Batch in der Ausgabe.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use feldfunk_core::StreamQueue;
use feldfunk_protocol::codec::OpusConfig;
use feldfunk_protocol::voice::{ist_platzhalter, Frame};

use crate::codec::{DecoderBackend, OpusDecoderBackend, MAX_FRAME_SAMPLES};
use crate::error::{AudioError, AudioResult};
use crate::throttle::ComplexityThrottle;

struct DecoderInner {
    backend: Box<dyn DecoderBackend>,
    /// Verlorene Frames seit dem letzten echten Paket
    verloren: usize,
    throttle: ComplexityThrottle,
    komplexitaet: u8,
    puffer: Vec<f32>,
}

/// Adaptiver Opus-Decoder mit Verlustverdeckung
pub struct VoiceDecoder {
    inner: Mutex<DecoderInner>,
    frame_samples: usize,
    kanaele: usize,
    max_verdeckung: usize,
    ausgabe: Arc<StreamQueue<Vec<f32>>>,
    defekt: AtomicBool,
    komplexitaet: AtomicU8,
    verdeckt: AtomicU64,
}

impl VoiceDecoder {
    /// Erstellt einen Decoder auf Basis von libopus
    pub fn neu(config: &OpusConfig) -> AudioResult<Self> {
        config.validieren().map_err(AudioError::Konfiguration)?;
        let backend = OpusDecoderBackend::neu(config)?;
        Ok(Self::mit_backend(config, Box::new(backend)))
    }

    /// Erstellt einen Decoder mit eigenem Backend
    pub fn mit_backend(config: &OpusConfig, backend: Box<dyn DecoderBackend>) -> Self {
        let kanaele = config.channels as usize;
        Self {
            inner: Mutex::new(DecoderInner {
                backend,
                verloren: 0,
                throttle: ComplexityThrottle::neu(),
                komplexitaet: config.complexity,
                puffer: vec![0.0; MAX_FRAME_SAMPLES * kanaele],
            }),
            frame_samples: config.frame_samples(),
            kanaele,
            max_verdeckung: config.max_verdeckung,
            ausgabe: Arc::new(StreamQueue::neu()),
            defekt: AtomicBool::new(false),
            komplexitaet: AtomicU8::new(config.complexity),
            verdeckt: AtomicU64::new(0),
        }
    }

    /// Dekodiert einen Batch von Frames
    ///
    /// Gibt die Anzahl erzeugter Samples zurueck. Laeuft bereits ein anderer
    /// Aufruf, passiert nichts und es wird `Ok(0)` geliefert.
    pub fn transform(&self, frames: &[Frame]) -> AudioResult<usize> {
        if self.ist_defekt() {
            return Err(AudioError::CodecFehler(
                "Decoder nach Codec-Fehler stillgelegt".to_string(),
            ));
        }
        let Some(mut inner) = self.inner.try_lock() else {
            trace!("Decoder belegt, Batch uebersprungen");
            return Ok(0);
        };

        let mut samples = Vec::with_capacity(frames.len() * self.frame_samples);
        for frame in frames {
            if ist_platzhalter(frame) {
                inner.verloren += 1;
                continue;
            }
            if inner.verloren > 0 {
                if let Err(e) = self.verdecken(&mut inner, frame, &mut samples) {
                    return Err(self.als_defekt(e));
                }
            }
            if let Err(e) = self.dekodieren(&mut inner, frame, &mut samples) {
                return Err(self.als_defekt(e));
            }
        }
        drop(inner);

        let anzahl = samples.len();
        if anzahl > 0 {
            self.ausgabe.write_one(samples);
        }
        Ok(anzahl)
    }

    /// Setzt die Verstaerkung in Q8-dB
    pub fn set_gain(&self, q8_db: i16) -> AudioResult<()> {
        let mut inner = self.inner.lock();
        inner.backend.set_gain(q8_db).map_err(|e| self.als_defekt(e))
    }

    /// Queue mit den dekodierten Sample-Batches
    pub fn ausgabe(&self) -> &Arc<StreamQueue<Vec<f32>>> {
        &self.ausgabe
    }

    /// Samples pro Frame (ueber alle Kanaele)
    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Noch nicht verdeckte Verluste
    pub fn ausstehende_verluste(&self) -> usize {
        self.inner.lock().verloren
    }

    /// Insgesamt per FEC/DRED/PLC erzeugte Frames
    pub fn verdeckte_frames(&self) -> u64 {
        self.verdeckt.load(Ordering::Relaxed)
    }

    pub fn komplexitaet(&self) -> u8 {
        self.komplexitaet.load(Ordering::Relaxed)
    }

    pub fn ist_defekt(&self) -> bool {
        self.defekt.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsfunktionen
    // -----------------------------------------------------------------------

    fn dekodieren(
        &self,
        inner: &mut DecoderInner,
        paket: &[u8],
        samples: &mut Vec<f32>,
    ) -> AudioResult<()> {
        let start = Instant::now();
        let DecoderInner {
            backend, puffer, ..
        } = &mut *inner;
        let erzeugt = backend.decode(paket, puffer)?;
        samples.extend_from_slice(&puffer[..erzeugt * self.kanaele]);
        self.drosseln(inner, start)
    }

    /// Rekonstruiert die verlorenen Frames vor `paket`, aeltester zuerst
    fn verdecken(
        &self,
        inner: &mut DecoderInner,
        paket: &[u8],
        samples: &mut Vec<f32>,
    ) -> AudioResult<()> {
        let verloren = std::mem::take(&mut inner.verloren);
        let anzahl = verloren.min(self.max_verdeckung);
        if anzahl < verloren {
            debug!(
                verloren,
                verdeckt = anzahl,
                "Verlustserie zu lang, aeltere Frames uebersprungen"
            );
        }

        let fec = inner.backend.hat_fec(paket);
        let reichweite = inner.backend.dred_reichweite(paket);
        let frame_len = self.frame_samples;

        for abstand in (1..=anzahl).rev() {
            let start = Instant::now();
            let versatz = abstand * frame_len / self.kanaele;
            let DecoderInner {
                backend, puffer, ..
            } = &mut *inner;
            let ziel = &mut puffer[..frame_len];

            let erzeugt = if abstand == 1 && fec {
                backend.decode_fec(paket, ziel)?
            } else if versatz <= reichweite {
                backend.decode_dred(paket, versatz, ziel)?
            } else {
                backend.decode_plc(ziel)?
            };
            samples.extend_from_slice(&puffer[..erzeugt * self.kanaele]);
            self.drosseln(inner, start)?;
        }

        self.verdeckt.fetch_add(anzahl as u64, Ordering::Relaxed);
        trace!(anzahl, fec, reichweite, "Verluste verdeckt");
        Ok(())
    }

    fn drosseln(&self, inner: &mut DecoderInner, start: Instant) -> AudioResult<()> {
        if let Some(neu) = inner.throttle.anwenden(start.elapsed(), inner.komplexitaet) {
            inner.backend.set_complexity(neu)?;
            debug!(von = inner.komplexitaet, auf = neu, "Decoder-Komplexitaet gesenkt");
            inner.komplexitaet = neu;
            self.komplexitaet.store(neu, Ordering::Relaxed);
        }
        Ok(())
    }

    fn als_defekt(&self, fehler: AudioError) -> AudioError {
        self.defekt.store(true, Ordering::Release);
        error!(fehler = %fehler, "Decoder stillgelegt");
        fehler
    }
}
