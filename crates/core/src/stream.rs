//! Lock-freie StreamQueue
//!
//! Unbegrenzte FIFO-Warteschlange zwischen den Stufen der Sprach-Pipeline.
//!
//! ## Aufbau
//! - Einfach verkettete Liste mit Platzhalter-Knoten (`kopf` zeigt immer auf
//!   einen bereits konsumierten Knoten). Leer genau dann wenn `kopf == ende`.
//! - Schreiber (beliebig viele) haengen einen kompletten Batch als Teilliste
//!   mit einem einzigen atomaren Tausch von `ende` an und verketten danach
//!   den alten Endknoten mit dem Batch-Anfang. Kein Lock im Schreibpfad.
//! - Leser werden ueber ein atomares Flag serialisiert (kurzes Spinnen).
//!   Mehrere gleichzeitige Leser sind damit speichersicher, lesen aber
//!   nacheinander.
//! - `pipe(Some(senke))` leert den Inhalt in die Senke und leitet danach
//!   jeden Schreibvorgang direkt weiter. Speichern und Weiterleiten
//!   schliessen sich aus.
//! - Vor dem Speichern laeuft die Abgriff-Kette: der erste Abgriff, der einen
//!   Batch uebernimmt, beendet die Kette, gespeichert wird dann nichts.
//!
//! Die Queue ist unbegrenzt. Ein Leser, der nicht mehr abholt, laesst den
//! Speicher wachsen.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};

// ---------------------------------------------------------------------------
// Senken und Abgriffe
// ---------------------------------------------------------------------------

/// Ziel fuer weitergeleitete Batches (siehe [`StreamQueue::pipe`])
pub trait StreamSink<T>: Send + Sync {
    /// Nimmt einen Batch entgegen. Die Reihenfolge innerhalb des Batches
    /// muss erhalten bleiben.
    fn schreiben(&self, daten: Vec<T>);
}

/// Ergebnis eines Abgriffs
#[derive(Debug, PartialEq, Eq)]
pub enum Abgriff<T> {
    /// Nicht uebernommen, der Batch laeuft weiter durch die Kette
    Weiter(Vec<T>),
    /// Uebernommen, weder weitere Abgriffe noch der Speicher sehen den Batch
    Behandelt,
}

/// Beobachter vor dem Speichern eines Batches
pub trait SchreibAbgriff<T>: Send + Sync {
    fn abgreifen(&self, daten: Vec<T>) -> Abgriff<T>;
}

impl<T, F> SchreibAbgriff<T> for F
where
    F: Fn(Vec<T>) -> Abgriff<T> + Send + Sync,
{
    fn abgreifen(&self, daten: Vec<T>) -> Abgriff<T> {
        self(daten)
    }
}

// ---------------------------------------------------------------------------
// Knoten
// ---------------------------------------------------------------------------

struct Knoten<T> {
    wert: Option<T>,
    naechster: AtomicPtr<Knoten<T>>,
}

impl<T> Knoten<T> {
    fn neu(wert: Option<T>) -> *mut Self {
        Box::into_raw(Box::new(Self {
            wert,
            naechster: AtomicPtr::new(ptr::null_mut()),
        }))
    }
}

// ---------------------------------------------------------------------------
// StreamQueue
// ---------------------------------------------------------------------------

/// Lock-freie MPSC-Queue mit Weiterleitung und Abgriff-Kette
pub struct StreamQueue<T> {
    /// Platzhalter-Knoten, gehoert der Leserseite
    kopf: AtomicPtr<Knoten<T>>,
    /// Zuletzt angehaengter Knoten, von Schreibern getauscht
    ende: AtomicPtr<Knoten<T>>,
    /// Serialisiert die Leserseite
    leser_aktiv: AtomicBool,
    senke: RwLock<Option<Arc<dyn StreamSink<T>>>>,
    umgeleitet: AtomicBool,
    /// Haelt die Reihenfolge beim Weiterleiten; reentrant, damit eine Senke
    /// in dieselbe Queue zurueckschreiben darf
    weiterleitung: ReentrantMutex<()>,
    abgriffe: RwLock<Vec<Arc<dyn SchreibAbgriff<T>>>>,
    hat_abgriffe: AtomicBool,
}

// SAFETY: Werte wandern zwischen Threads (Send), die Knotenverwaltung ist
// ueber Atomics und das Leser-Flag synchronisiert.
unsafe impl<T: Send> Send for StreamQueue<T> {}
unsafe impl<T: Send> Sync for StreamQueue<T> {}

impl<T> StreamQueue<T> {
    /// Erstellt eine leere Queue
    pub fn neu() -> Self {
        let platzhalter = Knoten::neu(None);
        Self {
            kopf: AtomicPtr::new(platzhalter),
            ende: AtomicPtr::new(platzhalter),
            leser_aktiv: AtomicBool::new(false),
            senke: RwLock::new(None),
            umgeleitet: AtomicBool::new(false),
            weiterleitung: ReentrantMutex::new(()),
            abgriffe: RwLock::new(Vec::new()),
            hat_abgriffe: AtomicBool::new(false),
        }
    }

    /// Schreibt ein einzelnes Element
    pub fn write_one(&self, wert: T) {
        self.write(vec![wert]);
    }

    /// Schreibt einen Batch
    ///
    /// Ist eine Senke gesetzt, geht der Batch direkt dorthin. Sonst laeuft
    /// die Abgriff-Kette, und nur ein nicht uebernommener Batch wird
    /// gespeichert.
    pub fn write(&self, daten: Vec<T>) {
        if daten.is_empty() {
            return;
        }

        if self.umgeleitet.load(Ordering::Acquire) {
            let _reihenfolge = self.weiterleitung.lock();
            let senke = self.senke.read().clone();
            if let Some(senke) = senke {
                senke.schreiben(daten);
                return;
            }
        }

        let daten = if self.hat_abgriffe.load(Ordering::Acquire) {
            match self.abgriffe_anwenden(daten) {
                Some(rest) => rest,
                None => return,
            }
        } else {
            daten
        };

        self.einketten(daten);

        // pipe() kann zwischen Pruefung und Einketten gesetzt worden sein
        if self.umgeleitet.load(Ordering::Acquire) {
            self.nachspuelen();
        }
    }

    /// Entnimmt das aelteste Element
    pub fn read(&self) -> Option<T> {
        let _leser = self.leser_sperren();
        let kopf = self.kopf.load(Ordering::Relaxed);
        // SAFETY: `kopf` ist der Platzhalter und wird nur von der (gesperrten)
        // Leserseite freigegeben.
        let naechster = unsafe { (*kopf).naechster.load(Ordering::Acquire) };
        if naechster.is_null() {
            return None;
        }
        self.kopf.store(naechster, Ordering::Release);
        // SAFETY: `naechster` ist veroeffentlicht und wird zum neuen
        // Platzhalter. Schreiber fassen `wert` nach dem Einketten nie an.
        let wert = unsafe { (*naechster).wert.take() };
        // SAFETY: der alte Platzhalter ist aus der Kette geloest; kein
        // Schreiber haelt ihn mehr, da sein `naechster` bereits gesetzt war.
        drop(unsafe { Box::from_raw(kopf) });
        wert
    }

    /// Entnimmt genau `anzahl` Elemente oder gar keines
    ///
    /// Sind weniger als `anzahl` Elemente verkettet, bleibt die Queue
    /// unveraendert und es wird `None` zurueckgegeben.
    pub fn read_n(&self, anzahl: usize) -> Option<Vec<T>> {
        let _leser = self.leser_sperren();
        let kopf = self.kopf.load(Ordering::Relaxed);

        // Erst pruefen, dann abschneiden
        let mut letzter = kopf;
        for _ in 0..anzahl {
            // SAFETY: alle Knoten ab `kopf` leben, solange die Leserseite
            // gesperrt ist.
            let naechster = unsafe { (*letzter).naechster.load(Ordering::Acquire) };
            if naechster.is_null() {
                return None;
            }
            letzter = naechster;
        }

        let mut werte = Vec::with_capacity(anzahl);
        let mut aktuell = kopf;
        while aktuell != letzter {
            // SAFETY: siehe oben, die Kette bis `letzter` wurde geprueft.
            let naechster = unsafe { (*aktuell).naechster.load(Ordering::Acquire) };
            if let Some(wert) = unsafe { (*naechster).wert.take() } {
                werte.push(wert);
            }
            drop(unsafe { Box::from_raw(aktuell) });
            aktuell = naechster;
        }
        self.kopf.store(letzter, Ordering::Release);
        Some(werte)
    }

    /// Entnimmt alles, was aktuell verkettet ist
    pub fn read_all(&self) -> Vec<T> {
        let mut werte = Vec::new();
        while let Some(wert) = self.read() {
            werte.push(wert);
        }
        werte
    }

    /// Anzahl gespeicherter Elemente (O(n), nur ein Richtwert bei
    /// gleichzeitigen Schreibern)
    pub fn count(&self) -> usize {
        let _leser = self.leser_sperren();
        let mut anzahl = 0;
        let mut aktuell = self.kopf.load(Ordering::Relaxed);
        loop {
            // SAFETY: Leserseite gesperrt, Knoten ab `kopf` leben.
            let naechster = unsafe { (*aktuell).naechster.load(Ordering::Acquire) };
            if naechster.is_null() {
                return anzahl;
            }
            anzahl += 1;
            aktuell = naechster;
        }
    }

    /// O(1), vergleicht nur Zeiger
    pub fn is_empty(&self) -> bool {
        self.kopf.load(Ordering::Acquire) == self.ende.load(Ordering::Acquire)
    }

    /// Setzt oder entfernt die Senke
    ///
    /// Beim Setzen wird der bisherige Inhalt in die Senke geleert, danach
    /// gehen alle Schreibvorgaenge direkt dorthin. `None` schaltet zurueck
    /// auf Speichern.
    pub fn pipe(&self, senke: Option<Arc<dyn StreamSink<T>>>) {
        let _reihenfolge = self.weiterleitung.lock();
        match senke {
            Some(senke) => {
                *self.senke.write() = Some(Arc::clone(&senke));
                self.umgeleitet.store(true, Ordering::Release);
                let rest = self.read_all();
                if !rest.is_empty() {
                    tracing::trace!(anzahl = rest.len(), "StreamQueue in Senke geleert");
                    senke.schreiben(rest);
                }
            }
            None => {
                *self.senke.write() = None;
                self.umgeleitet.store(false, Ordering::Release);
            }
        }
    }

    /// Ist aktuell eine Senke gesetzt?
    pub fn ist_umgeleitet(&self) -> bool {
        self.umgeleitet.load(Ordering::Acquire)
    }

    /// Haengt einen Abgriff an das Ende der Kette
    pub fn abgriff_hinzufuegen(&self, abgriff: Arc<dyn SchreibAbgriff<T>>) {
        let mut abgriffe = self.abgriffe.write();
        abgriffe.push(abgriff);
        self.hat_abgriffe.store(true, Ordering::Release);
    }

    /// Entfernt alle Abgriffe
    pub fn abgriffe_entfernen(&self) {
        let mut abgriffe = self.abgriffe.write();
        abgriffe.clear();
        self.hat_abgriffe.store(false, Ordering::Release);
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsfunktionen
    // -----------------------------------------------------------------------

    fn abgriffe_anwenden(&self, mut daten: Vec<T>) -> Option<Vec<T>> {
        let abgriffe = self.abgriffe.read().clone();
        for abgriff in &abgriffe {
            match abgriff.abgreifen(daten) {
                Abgriff::Weiter(rest) => daten = rest,
                Abgriff::Behandelt => return None,
            }
        }
        Some(daten)
    }

    fn einketten(&self, daten: Vec<T>) {
        let mut werte = daten.into_iter();
        let Some(erster_wert) = werte.next() else {
            return;
        };

        let erster = Knoten::neu(Some(erster_wert));
        let mut letzter = erster;
        for wert in werte {
            let knoten = Knoten::neu(Some(wert));
            // SAFETY: die Teilliste ist noch privat.
            unsafe { (*letzter).naechster.store(knoten, Ordering::Relaxed) };
            letzter = knoten;
        }

        let vorher = self.ende.swap(letzter, Ordering::AcqRel);
        // SAFETY: `vorher` kann erst freigegeben werden, wenn sein
        // `naechster` gesetzt ist, und das passiert genau hier.
        unsafe { (*vorher).naechster.store(erster, Ordering::Release) };
    }

    fn nachspuelen(&self) {
        let _reihenfolge = self.weiterleitung.lock();
        let senke = self.senke.read().clone();
        if let Some(senke) = senke {
            let rest = self.read_all();
            if !rest.is_empty() {
                senke.schreiben(rest);
            }
        }
    }

    fn leser_sperren(&self) -> LeserWaechter<'_> {
        let mut versuche = 0u32;
        while self
            .leser_aktiv
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            versuche += 1;
            if versuche < 64 {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
        LeserWaechter {
            flag: &self.leser_aktiv,
        }
    }
}

impl<T> Default for StreamQueue<T> {
    fn default() -> Self {
        Self::neu()
    }
}

impl<T> Drop for StreamQueue<T> {
    fn drop(&mut self) {
        let mut aktuell = *self.kopf.get_mut();
        while !aktuell.is_null() {
            // SAFETY: exklusiver Zugriff in drop, jeder Knoten wird genau
            // einmal freigegeben.
            let knoten = unsafe { Box::from_raw(aktuell) };
            aktuell = knoten.naechster.load(Ordering::Relaxed);
        }
    }
}

impl<T: Send> StreamSink<T> for StreamQueue<T> {
    fn schreiben(&self, daten: Vec<T>) {
        self.write(daten);
    }
}

struct LeserWaechter<'a> {
    flag: &'a AtomicBool,
}

impl Drop for LeserWaechter<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
