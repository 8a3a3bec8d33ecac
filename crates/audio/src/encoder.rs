//! Sprach-Encoder: Sample-Batches -> Opus-Frames
//!
//! Nimmt Batches beliebiger Laenge an, puffert den Rest bis zum naechsten
//! Aufruf und kodiert nur volle Frames (20 ms). Jeder Aufruf, der Frames
//! erzeugt, schreibt sie als *einen* Batch in die Ausgabe-Queue; der
//! Multiplexer macht daraus genau eine DATA-Nachricht.
//!
//! Ein zweiter gleichzeitiger Aufruf auf derselben Instanz liefert nichts
//! (try-lock). Ein Codec-Fehler macht die Instanz dauerhaft unbrauchbar.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use feldfunk_core::{StreamQueue, StreamSink};
use feldfunk_protocol::codec::OpusConfig;
use feldfunk_protocol::voice::Frame;

use crate::codec::{EncoderBackend, OpusEncoderBackend, MAX_PAKET_BYTES};
use crate::error::{AudioError, AudioResult};
use crate::throttle::ComplexityThrottle;
use crate::tuning::EncoderTuning;

/// Frame-Budget, ab dem ein Aufruf als zu langsam geloggt wird
const FRAME_BUDGET_MS: u128 = 20;

struct EncoderInner {
    backend: Box<dyn EncoderBackend>,
    rest: Vec<f32>,
    throttle: ComplexityThrottle,
    komplexitaet: u8,
    paket_puffer: Vec<u8>,
}

/// Adaptiver Opus-Encoder
pub struct VoiceEncoder {
    inner: Mutex<EncoderInner>,
    frame_samples: usize,
    ausgabe: Arc<StreamQueue<Frame>>,
    defekt: AtomicBool,
    geschlossen: AtomicBool,
    komplexitaet: AtomicU8,
    bitrate: AtomicU32,
}

impl VoiceEncoder {
    /// Erstellt einen Encoder auf Basis von libopus
    pub fn neu(config: &OpusConfig) -> AudioResult<Self> {
        config.validieren().map_err(AudioError::Konfiguration)?;
        let backend = OpusEncoderBackend::neu(config)?;
        Ok(Self::mit_backend(config, Box::new(backend)))
    }

    /// Erstellt einen Encoder mit eigenem Backend
    ///
    /// Das Backend muss bereits nach `config` eingestellt sein.
    pub fn mit_backend(config: &OpusConfig, backend: Box<dyn EncoderBackend>) -> Self {
        Self {
            inner: Mutex::new(EncoderInner {
                backend,
                rest: Vec::new(),
                throttle: ComplexityThrottle::neu(),
                komplexitaet: config.complexity,
                paket_puffer: vec![0u8; MAX_PAKET_BYTES],
            }),
            frame_samples: config.frame_samples(),
            ausgabe: Arc::new(StreamQueue::neu()),
            defekt: AtomicBool::new(false),
            geschlossen: AtomicBool::new(false),
            komplexitaet: AtomicU8::new(config.complexity),
            bitrate: AtomicU32::new(config.bitrate_bps),
        }
    }

    /// Kodiert alle vollen Frames aus Rest + `samples`
    ///
    /// Gibt die Anzahl erzeugter Frames zurueck. Laeuft bereits ein anderer
    /// Aufruf, passiert nichts und es wird `Ok(0)` geliefert.
    pub fn transform(&self, samples: &[f32]) -> AudioResult<usize> {
        self.pruefen()?;
        let Some(mut inner) = self.inner.try_lock() else {
            trace!("Encoder belegt, Batch uebersprungen");
            return Ok(0);
        };
        if self.ist_geschlossen() {
            return Err(AudioError::Geschlossen);
        }

        let start = Instant::now();
        inner.rest.extend_from_slice(samples);
        let voll = inner.rest.len() / self.frame_samples * self.frame_samples;
        if voll == 0 {
            return Ok(0);
        }
        let roh: Vec<f32> = inner.rest.drain(..voll).collect();

        let mut frames = Vec::with_capacity(voll / self.frame_samples);
        for chunk in roh.chunks_exact(self.frame_samples) {
            frames.push(self.frame_kodieren(&mut inner, chunk)?);
        }
        drop(inner);

        let dauer = start.elapsed().as_millis();
        if dauer > FRAME_BUDGET_MS {
            debug!(
                dauer_ms = dauer as u64,
                frames = frames.len(),
                "Encoding ueberschreitet Frame-Budget"
            );
        }

        let anzahl = frames.len();
        self.ausgabe.write(frames);
        Ok(anzahl)
    }

    /// Fuellt den Rest mit Stille auf, kodiert ihn und schliesst den Encoder
    ///
    /// Wartet auf einen laufenden `transform`-Aufruf. Weitere Aufrufe
    /// liefern danach [`AudioError::Geschlossen`].
    pub fn schliessen(&self) -> AudioResult<usize> {
        self.pruefen()?;
        let mut inner = self.inner.lock();
        self.geschlossen.store(true, Ordering::Release);

        if inner.rest.is_empty() {
            return Ok(0);
        }
        let mut letzter = std::mem::take(&mut inner.rest);
        letzter.resize(self.frame_samples, 0.0);
        let frame = self.frame_kodieren(&mut inner, &letzter)?;
        drop(inner);

        self.ausgabe.write(vec![frame]);
        Ok(1)
    }

    /// Stellt Bitrate, FEC, Verlusthinweis und DRED nach
    pub fn tunen(&self, tuning: &EncoderTuning) -> AudioResult<()> {
        self.pruefen()?;
        let mut inner = self.inner.lock();
        let ergebnis = (|| {
            inner.backend.set_bitrate(tuning.bitrate_bps)?;
            inner.backend.set_fec(tuning.fec)?;
            inner.backend.set_packet_loss_perc(tuning.packet_loss_perc)?;
            inner.backend.set_dred_dauer(tuning.dred_dauer)
        })();
        if let Err(e) = ergebnis {
            return Err(self.als_defekt(e));
        }
        self.bitrate.store(tuning.bitrate_bps, Ordering::Relaxed);
        debug!(
            bitrate = tuning.bitrate_bps,
            fec = ?tuning.fec,
            verlust = tuning.packet_loss_perc,
            dred = tuning.dred_dauer,
            "Encoder nachgestellt"
        );
        Ok(())
    }

    /// Queue mit den kodierten Frames (ein Eintrag pro Frame, ein
    /// Schreibvorgang pro `transform`-Aufruf)
    pub fn ausgabe(&self) -> &Arc<StreamQueue<Frame>> {
        &self.ausgabe
    }

    /// Samples pro Frame
    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Aktuell gepufferte Samples ohne vollen Frame
    pub fn rest_samples(&self) -> usize {
        self.inner.lock().rest.len()
    }

    pub fn komplexitaet(&self) -> u8 {
        self.komplexitaet.load(Ordering::Relaxed)
    }

    pub fn bitrate(&self) -> u32 {
        self.bitrate.load(Ordering::Relaxed)
    }

    /// Hat der Codec einen Fehler gemeldet?
    pub fn ist_defekt(&self) -> bool {
        self.defekt.load(Ordering::Acquire)
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.geschlossen.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsfunktionen
    // -----------------------------------------------------------------------

    fn pruefen(&self) -> AudioResult<()> {
        if self.ist_defekt() {
            return Err(AudioError::CodecFehler(
                "Encoder nach Codec-Fehler stillgelegt".to_string(),
            ));
        }
        if self.ist_geschlossen() {
            return Err(AudioError::Geschlossen);
        }
        Ok(())
    }

    fn frame_kodieren(&self, inner: &mut EncoderInner, pcm: &[f32]) -> AudioResult<Frame> {
        let start = Instant::now();
        let EncoderInner {
            backend,
            paket_puffer,
            ..
        } = &mut *inner;
        let laenge = match backend.encode(pcm, paket_puffer) {
            Ok(laenge) => laenge,
            Err(e) => return Err(self.als_defekt(e)),
        };
        let frame = Bytes::copy_from_slice(&paket_puffer[..laenge]);

        if let Some(neu) = inner.throttle.anwenden(start.elapsed(), inner.komplexitaet) {
            if let Err(e) = inner.backend.set_complexity(neu) {
                return Err(self.als_defekt(e));
            }
            debug!(von = inner.komplexitaet, auf = neu, "Encoder-Komplexitaet gesenkt");
            inner.komplexitaet = neu;
            self.komplexitaet.store(neu, Ordering::Relaxed);
        }
        Ok(frame)
    }

    fn als_defekt(&self, fehler: AudioError) -> AudioError {
        self.defekt.store(true, Ordering::Release);
        error!(fehler = %fehler, "Encoder stillgelegt");
        fehler
    }
}

impl StreamSink<Vec<f32>> for VoiceEncoder {
    fn schreiben(&self, daten: Vec<Vec<f32>>) {
        for batch in daten {
            if let Err(e) = self.transform(&batch) {
                // Fehler wurde beim Stilllegen bereits geloggt
                if !e.ist_fatal() {
                    warn!(fehler = %e, "Aufnahme-Batch verworfen");
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feldfunk_protocol::codec::FecModus;
    use std::time::Duration;

    /// Backend ohne libopus: ein Frame wird zu seiner ersten Sample-Stelle
    /// als Byte, verzoegert um `verzoegerung`
    struct TestBackend {
        verzoegerung: Duration,
        fehler_ab: Option<usize>,
        aufrufe: Arc<Mutex<Vec<String>>>,
        zaehler: usize,
    }

    impl TestBackend {
        fn neu(aufrufe: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                verzoegerung: Duration::ZERO,
                fehler_ab: None,
                aufrufe,
                zaehler: 0,
            }
        }
    }

    impl EncoderBackend for TestBackend {
        fn encode(&mut self, pcm: &[f32], ausgabe: &mut [u8]) -> AudioResult<usize> {
            self.zaehler += 1;
            if self.fehler_ab.is_some_and(|ab| self.zaehler >= ab) {
                return Err(AudioError::CodecFehler("kaputt".to_string()));
            }
            if !self.verzoegerung.is_zero() {
                std::thread::sleep(self.verzoegerung);
            }
            ausgabe[0] = 0x10;
            ausgabe[1] = (pcm[0] * 100.0) as u8;
            ausgabe[2] = pcm.len() as u8;
            Ok(3)
        }
        fn set_bitrate(&mut self, bps: u32) -> AudioResult<()> {
            self.aufrufe.lock().push(format!("bitrate={bps}"));
            Ok(())
        }
        fn set_complexity(&mut self, k: u8) -> AudioResult<()> {
            self.aufrufe.lock().push(format!("komplexitaet={k}"));
            Ok(())
        }
        fn set_fec(&mut self, modus: FecModus) -> AudioResult<()> {
            self.aufrufe.lock().push(format!("fec={modus:?}"));
            Ok(())
        }
        fn set_packet_loss_perc(&mut self, p: u8) -> AudioResult<()> {
            self.aufrufe.lock().push(format!("verlust={p}"));
            Ok(())
        }
        fn set_dred_dauer(&mut self, d: u8) -> AudioResult<()> {
            self.aufrufe.lock().push(format!("dred={d}"));
            Ok(())
        }
        fn set_dtx(&mut self, _aktiv: bool) -> AudioResult<()> {
            Ok(())
        }
    }

    fn kleine_config() -> OpusConfig {
        // 10 ms bei 8 kHz = 80 Samples pro Frame
        OpusConfig {
            sample_rate: feldfunk_protocol::codec::SampleRate::Hz8000,
            frame_size: feldfunk_protocol::codec::FrameSizeMs::Ms10,
            ..OpusConfig::default()
        }
    }

    fn test_encoder(backend: TestBackend) -> VoiceEncoder {
        VoiceEncoder::mit_backend(&kleine_config(), Box::new(backend))
    }

    #[test]
    fn rest_wird_gepuffert() {
        let enc = test_encoder(TestBackend::neu(Default::default()));
        assert_eq!(enc.frame_samples(), 80);

        assert_eq!(enc.transform(&[0.0; 50]).unwrap(), 0);
        assert_eq!(enc.rest_samples(), 50);
        assert!(enc.ausgabe().is_empty());

        // 50 + 120 = 170 -> 2 Frames, 10 Rest
        assert_eq!(enc.transform(&[0.0; 120]).unwrap(), 2);
        assert_eq!(enc.rest_samples(), 10);
        assert_eq!(enc.ausgabe().count(), 2);
    }

    #[test]
    fn ein_batch_pro_aufruf() {
        let enc = test_encoder(TestBackend::neu(Default::default()));
        let batches = Arc::new(Mutex::new(Vec::new()));
        let b = batches.clone();
        enc.ausgabe().abgriff_hinzufuegen(Arc::new(move |frames: Vec<Frame>| {
            b.lock().push(frames.len());
            feldfunk_core::Abgriff::Behandelt
        }));

        enc.transform(&[0.0; 240]).unwrap();
        enc.transform(&[0.0; 80]).unwrap();
        assert_eq!(*batches.lock(), vec![3, 1]);
    }

    #[test]
    fn reihenfolge_der_samples_bleibt() {
        let enc = test_encoder(TestBackend::neu(Default::default()));
        let mut pcm = vec![0.0f32; 160];
        pcm[0] = 0.5;
        pcm[80] = 0.25;
        enc.transform(&pcm).unwrap();
        let frames = enc.ausgabe().read_all();
        assert_eq!(frames[0][1], 50);
        assert_eq!(frames[1][1], 25);
    }

    #[test]
    fn schliessen_fuellt_mit_stille_auf() {
        let enc = test_encoder(TestBackend::neu(Default::default()));
        enc.transform(&[0.5; 30]).unwrap();
        assert_eq!(enc.schliessen().unwrap(), 1);

        let frames = enc.ausgabe().read_all();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][1], 50);
        assert_eq!(frames[0][2], 80, "Letzter Frame muss volle Laenge haben");

        assert!(matches!(enc.transform(&[0.0; 80]), Err(AudioError::Geschlossen)));
    }

    #[test]
    fn schliessen_ohne_rest_erzeugt_nichts() {
        let enc = test_encoder(TestBackend::neu(Default::default()));
        enc.transform(&[0.0; 80]).unwrap();
        enc.ausgabe().read_all();
        assert_eq!(enc.schliessen().unwrap(), 0);
        assert!(enc.ausgabe().is_empty());
    }

    #[test]
    fn codec_fehler_legt_encoder_still() {
        let mut backend = TestBackend::neu(Default::default());
        backend.fehler_ab = Some(2);
        let enc = test_encoder(backend);

        assert!(enc.transform(&[0.0; 160]).is_err());
        assert!(enc.ist_defekt());
        assert!(enc.ausgabe().is_empty(), "Halbe Batches werden nicht ausgegeben");
        assert!(matches!(enc.transform(&[0.0; 80]), Err(AudioError::CodecFehler(_))));
    }

    #[test]
    fn gleichzeitiger_aufruf_liefert_nichts() {
        let enc = test_encoder(TestBackend::neu(Default::default()));
        let _gesperrt = enc.inner.lock();
        assert_eq!(enc.transform(&[0.0; 800]).unwrap(), 0);
    }

    #[test]
    fn langsamer_codec_senkt_komplexitaet() {
        let aufrufe = Arc::new(Mutex::new(Vec::new()));
        let mut backend = TestBackend::neu(aufrufe.clone());
        backend.verzoegerung = Duration::from_millis(45);
        let enc = test_encoder(backend);
        let start = enc.komplexitaet();

        enc.transform(&[0.0; 80 * 6]).unwrap();
        assert_eq!(enc.komplexitaet(), start - 2);
        assert_eq!(*aufrufe.lock(), vec![format!("komplexitaet={}", start - 2)]);
    }

    #[test]
    fn schneller_codec_behaelt_komplexitaet() {
        let enc = test_encoder(TestBackend::neu(Default::default()));
        let start = enc.komplexitaet();
        enc.transform(&[0.0; 80 * 12]).unwrap();
        assert_eq!(enc.komplexitaet(), start);
    }

    #[test]
    fn tunen_setzt_alle_parameter() {
        let aufrufe = Arc::new(Mutex::new(Vec::new()));
        let enc = test_encoder(TestBackend::neu(aufrufe.clone()));
        enc.tunen(&EncoderTuning {
            bitrate_bps: 16_000,
            fec: FecModus::Aggressiv,
            packet_loss_perc: 30,
            dred_dauer: 20,
        })
        .unwrap();

        assert_eq!(
            *aufrufe.lock(),
            vec!["bitrate=16000", "fec=Aggressiv", "verlust=30", "dred=20"]
        );
        assert_eq!(enc.bitrate(), 16_000);
    }

    #[test]
    fn als_senke_einer_aufnahme_queue() {
        let enc = Arc::new(test_encoder(TestBackend::neu(Default::default())));
        let aufnahme: StreamQueue<Vec<f32>> = StreamQueue::neu();
        aufnahme.write_one(vec![0.0; 100]);
        aufnahme.pipe(Some(enc.clone() as Arc<dyn StreamSink<Vec<f32>>>));
        aufnahme.write_one(vec![0.0; 60]);
        assert_eq!(enc.ausgabe().count(), 2);
        assert_eq!(enc.rest_samples(), 0);
    }

    #[test]
    fn echter_opus_encoder_erzeugt_frames() {
        let enc = VoiceEncoder::neu(&OpusConfig::default()).unwrap();
        let pcm: Vec<f32> = (0..2_000).map(|i| (i as f32 * 0.03).sin() * 0.3).collect();
        assert_eq!(enc.transform(&pcm).unwrap(), 2);
        assert_eq!(enc.rest_samples(), 80);
    }
}
