//! Komplexitaets-Drossel
//!
//! Misst die Wanduhrzeit pro Frame. Sobald ein Fenster von
//! [`FENSTER`] Messungen voll ist, wird der Mittelwert bewertet und das
//! Fenster geleert:
//!
//! | Mittelwert        | Absenkung |
//! |-------------------|-----------|
//! | > 40 ms           | 2         |
//! | > 20 ms, <= 40 ms | 1         |
//! | sonst             | 0         |
//!
//! Die Komplexitaet steigt nie automatisch wieder an.

use std::time::Duration;

/// Anzahl Messungen pro Bewertung
pub const FENSTER: usize = 6;

const GRENZE_HOCH: Duration = Duration::from_millis(40);
const GRENZE_BUDGET: Duration = Duration::from_millis(20);

/// Fenster der letzten Frame-Kosten
#[derive(Debug, Default)]
pub struct ComplexityThrottle {
    kosten: Vec<Duration>,
}

impl ComplexityThrottle {
    pub fn neu() -> Self {
        Self {
            kosten: Vec::with_capacity(FENSTER),
        }
    }

    /// Erfasst die Kosten eines Frames
    ///
    /// Gibt nach jeder [`FENSTER`]-ten Messung die Absenkung zurueck
    /// (0, 1 oder 2), sonst `None`.
    pub fn erfassen(&mut self, kosten: Duration) -> Option<u8> {
        self.kosten.push(kosten);
        if self.kosten.len() < FENSTER {
            return None;
        }
        let absenkung = bewerten(&self.kosten);
        self.kosten.clear();
        Some(absenkung)
    }

    /// Wendet eine Messung direkt auf eine Komplexitaet an
    ///
    /// Gibt die neue Komplexitaet zurueck, falls sie sich aendert.
    pub fn anwenden(&mut self, kosten: Duration, komplexitaet: u8) -> Option<u8> {
        match self.erfassen(kosten) {
            Some(absenkung) if absenkung > 0 && komplexitaet > 0 => {
                Some(komplexitaet.saturating_sub(absenkung))
            }
            _ => None,
        }
    }
}

/// Bewertet ein volles Fenster
pub fn bewerten(kosten: &[Duration]) -> u8 {
    if kosten.is_empty() {
        return 0;
    }
    let mittel = kosten.iter().sum::<Duration>() / kosten.len() as u32;
    if mittel > GRENZE_HOCH {
        2
    } else if mittel > GRENZE_BUDGET {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(werte: &[u64]) -> Vec<Duration> {
        werte.iter().map(|&w| Duration::from_millis(w)).collect()
    }

    #[test]
    fn ueber_40ms_senkt_um_zwei() {
        assert_eq!(bewerten(&ms(&[45, 42, 41, 43, 44, 46])), 2);
    }

    #[test]
    fn zwischen_20_und_40ms_senkt_um_eins() {
        assert_eq!(bewerten(&ms(&[25, 22, 21, 23, 24, 26])), 1);
    }

    #[test]
    fn im_budget_unveraendert() {
        assert_eq!(bewerten(&ms(&[5, 5, 5, 5, 5, 5])), 0);
    }

    #[test]
    fn grenzen_sind_exklusiv() {
        assert_eq!(bewerten(&ms(&[40; 6])), 1);
        assert_eq!(bewerten(&ms(&[20; 6])), 0);
    }

    #[test]
    fn bewertung_erst_bei_vollem_fenster() {
        let mut throttle = ComplexityThrottle::neu();
        for kosten in ms(&[45, 42, 41, 43, 44]) {
            assert_eq!(throttle.erfassen(kosten), None);
        }
        assert_eq!(throttle.erfassen(Duration::from_millis(46)), Some(2));
        // Fenster ist danach leer
        assert_eq!(throttle.erfassen(Duration::from_millis(100)), None);
    }

    #[test]
    fn komplexitaet_faellt_nicht_unter_null() {
        let mut throttle = ComplexityThrottle::neu();
        let mut ergebnis = None;
        for _ in 0..FENSTER {
            ergebnis = throttle.anwenden(Duration::from_millis(50), 1);
        }
        assert_eq!(ergebnis, Some(0));

        for _ in 0..FENSTER {
            ergebnis = throttle.anwenden(Duration::from_millis(50), 0);
        }
        assert_eq!(ergebnis, None);
    }

    #[test]
    fn keine_aenderung_im_budget() {
        let mut throttle = ComplexityThrottle::neu();
        for _ in 0..FENSTER {
            assert_eq!(throttle.anwenden(Duration::from_millis(3), 9), None);
        }
    }
}
