//! Umgebungseffekte auf dekodiertem Audio
//!
//! Der Host kann jedem Wiedergabepuffer einen Modifikator mitgeben, der
//! jeden dekodierten Batch vor dem Puffern veraendert (z. B. Funkstoerung
//! abhaengig vom Spielzustand). Der Kern kennt den Spielzustand nicht, er
//! ruft nur die Funktion auf.

use std::sync::Arc;

use rand::Rng;

/// Veraendert einen dekodierten Sample-Batch in place
pub type Umgebungsmodifikator = Arc<dyn Fn(&mut [f32]) + Send + Sync>;

/// Funkstoerung: addiert normalverteiltes Rauschen
///
/// `staerke` wird pro Batch abgefragt; 0.0 laesst das Signal unveraendert,
/// 1.0 entspricht Rauschen mit Standardabweichung 1. Das Ergebnis wird auf
/// [-1.0, 1.0] begrenzt.
pub fn stoerrauschen<F>(staerke: F) -> Umgebungsmodifikator
where
    F: Fn() -> f32 + Send + Sync + 'static,
{
    Arc::new(move |samples: &mut [f32]| {
        let staerke = staerke();
        if staerke <= 0.0 {
            return;
        }
        let mut rng = rand::thread_rng();
        for sample in samples.iter_mut() {
            *sample = (*sample + gauss(&mut rng) * staerke).clamp(-1.0, 1.0);
        }
    })
}

/// Standardnormalverteilter Wert (Box-Muller)
pub fn gauss<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    // 1 - x liegt in (0, 1], der Logarithmus bleibt endlich
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    let radius = (-2.0 * u1.ln()).sqrt();
    (radius * (std::f64::consts::TAU * u2).sin()) as f32
}
