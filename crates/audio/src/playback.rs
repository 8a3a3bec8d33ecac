//! Wiedergabepuffer pro Sprecher
//!
//! Nimmt dekodierte Sample-Batches an und gibt sie im Audio-Callback aus.
//! Die Wiedergabe startet erst, wenn mehr als [`BEREIT_FRAMES`] Frames
//! gepuffert sind, und pausiert ("trocken"), sobald der Callback mehr
//! verlangt als vorhanden ist. Das ist der eigentliche Jitter-Puffer auf
//! der Ausgabeseite.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use feldfunk_core::{StreamQueue, StreamSink};

use crate::modifier::Umgebungsmodifikator;

/// Gepufferte Frames, ab denen die Wiedergabe startet
pub const BEREIT_FRAMES: usize = 3;

#[derive(Default)]
struct Angebrochen {
    samples: Vec<f32>,
    position: usize,
}

impl Angebrochen {
    fn uebrig(&self) -> usize {
        self.samples.len() - self.position
    }
}

/// Puffer zwischen Decoder und Audio-Callback
pub struct PlaybackBuffer {
    warteschlange: StreamQueue<Vec<f32>>,
    /// Samples in `warteschlange` plus Rest im angebrochenen Batch
    gepuffert: AtomicUsize,
    angebrochen: Mutex<Angebrochen>,
    bereit: AtomicBool,
    schwelle: usize,
    modifikator: Option<Umgebungsmodifikator>,
}

impl PlaybackBuffer {
    /// `frame_samples` ist die Frame-Groesse des Decoders (mono)
    pub fn neu(frame_samples: usize, modifikator: Option<Umgebungsmodifikator>) -> Self {
        Self {
            warteschlange: StreamQueue::neu(),
            gepuffert: AtomicUsize::new(0),
            angebrochen: Mutex::new(Angebrochen::default()),
            bereit: AtomicBool::new(false),
            schwelle: frame_samples * BEREIT_FRAMES,
            modifikator,
        }
    }

    /// Haengt dekodierte Samples an (nach Anwendung des Modifikators)
    pub fn anhaengen(&self, mut samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        if let Some(modifikator) = &self.modifikator {
            modifikator(&mut samples);
        }
        let neu = self.gepuffert.fetch_add(samples.len(), Ordering::AcqRel) + samples.len();
        self.warteschlange.write_one(samples);

        if neu > self.schwelle && !self.bereit.swap(true, Ordering::AcqRel) {
            debug!(gepuffert = neu, "Wiedergabe bereit");
        }
    }

    /// Mischt gepufferte Samples in einen interleavten Ausgabepuffer
    ///
    /// Mono-Samples werden auf alle `kanaele` addiert. Gibt die Anzahl
    /// verbrauchter Samples zurueck. Ist nicht genug gepuffert, wird der
    /// Rest trotzdem ausgegeben und der Puffer gilt danach als trocken.
    pub fn fuellen(&self, ausgabe: &mut [f32], kanaele: usize) -> usize {
        if kanaele == 0 || !self.ist_bereit() {
            return 0;
        }
        let benoetigt = ausgabe.len() / kanaele;
        let vorhanden = self.gepuffert.load(Ordering::Acquire);
        if vorhanden < benoetigt {
            trace!(vorhanden, benoetigt, "Wiedergabe trocken");
            self.bereit.store(false, Ordering::Release);
        }

        let ziel = benoetigt.min(vorhanden);
        let mut angebrochen = self.angebrochen.lock();
        let mut geschrieben = 0;
        while geschrieben < ziel {
            if angebrochen.uebrig() == 0 {
                match self.warteschlange.read() {
                    Some(samples) => {
                        *angebrochen = Angebrochen {
                            samples,
                            position: 0,
                        }
                    }
                    None => break,
                }
            }
            let anzahl = angebrochen.uebrig().min(ziel - geschrieben);
            let start = angebrochen.position;
            for (i, sample) in angebrochen.samples[start..start + anzahl].iter().enumerate() {
                let basis = (geschrieben + i) * kanaele;
                for kanal in &mut ausgabe[basis..basis + kanaele] {
                    *kanal += *sample;
                }
            }
            angebrochen.position += anzahl;
            geschrieben += anzahl;
        }
        self.gepuffert.fetch_sub(geschrieben, Ordering::AcqRel);
        geschrieben
    }

    /// Laeuft die Wiedergabe?
    pub fn ist_bereit(&self) -> bool {
        self.bereit.load(Ordering::Acquire)
    }

    /// Gepufferte Samples (Richtwert)
    pub fn gepuffert(&self) -> usize {
        self.gepuffert.load(Ordering::Acquire)
    }
}

impl StreamSink<Vec<f32>> for PlaybackBuffer {
    fn schreiben(&self, daten: Vec<Vec<f32>>) {
        for samples in daten {
            self.anhaengen(samples);
        }
    }
}
