//! Aggregierte Netzqualitaet
//!
//! Der Transport misst periodisch pro Peer Verlust, Ping und Bandbreite.
//! Daraus entstehen zwei [`NetworkQuality`]-Werte: einer ueber alle Peers
//! und einer nur ueber das eigene Team. Der Encoder wird anhand des Werts
//! zum aktuellen Sprechziel nachgestellt.

use feldfunk_core::PeerId;
use serde::{Deserialize, Serialize};

/// Messwerte eines einzelnen Peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerStatistik {
    pub peer: PeerId,
    /// Verlustanteil 0.0–1.0
    pub verlust: f32,
    /// Round-Trip in Millisekunden
    pub ping_ms: u32,
    /// Verfuegbare Bandbreite in Bytes pro Sekunde
    pub bandbreite: u32,
    /// Gehoert der Peer zum eigenen Team?
    pub im_team: bool,
}

/// Zusammengefasste Netzqualitaet einer Peer-Gruppe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkQuality {
    pub avg_loss: f32,
    pub max_loss: f32,
    pub avg_ping: u32,
    pub max_ping: u32,
    pub avg_bandwidth: u32,
    pub min_bandwidth: u32,
}

impl Default for NetworkQuality {
    /// Ohne Messwerte gilt alles als verloren
    fn default() -> Self {
        Self {
            avg_loss: 1.0,
            max_loss: 1.0,
            avg_ping: 0,
            max_ping: 0,
            avg_bandwidth: 0,
            min_bandwidth: 0,
        }
    }
}

impl NetworkQuality {
    /// Fasst die Statistiken zusammen
    ///
    /// Eine leere Menge ergibt [`NetworkQuality::default`].
    pub fn aggregieren<'a, I>(statistiken: I) -> Self
    where
        I: IntoIterator<Item = &'a PeerStatistik>,
    {
        let mut anzahl = 0u64;
        let mut summe_verlust = 0.0f64;
        let mut summe_ping = 0u64;
        let mut summe_bandbreite = 0u64;
        let mut ergebnis = Self {
            avg_loss: 0.0,
            max_loss: 0.0,
            avg_ping: 0,
            max_ping: 0,
            avg_bandwidth: 0,
            min_bandwidth: u32::MAX,
        };

        for s in statistiken {
            anzahl += 1;
            summe_verlust += s.verlust as f64;
            summe_ping += s.ping_ms as u64;
            summe_bandbreite += s.bandbreite as u64;
            ergebnis.max_loss = ergebnis.max_loss.max(s.verlust);
            ergebnis.max_ping = ergebnis.max_ping.max(s.ping_ms);
            ergebnis.min_bandwidth = ergebnis.min_bandwidth.min(s.bandbreite);
        }

        if anzahl == 0 {
            return Self::default();
        }

        ergebnis.avg_loss = (summe_verlust / anzahl as f64) as f32;
        ergebnis.avg_ping = (summe_ping / anzahl) as u32;
        ergebnis.avg_bandwidth = (summe_bandbreite / anzahl) as u32;
        ergebnis
    }

    /// Aggregat ueber alle Peers und ueber das eigene Team
    pub fn alle_und_team(statistiken: &[PeerStatistik]) -> (Self, Self) {
        let alle = Self::aggregieren(statistiken);
        let team = Self::aggregieren(statistiken.iter().filter(|s| s.im_team));
        (alle, team)
    }

    /// Durchschnittlicher Verlust in ganzen Prozent (0–100)
    pub fn verlust_prozent(&self) -> u8 {
        (self.avg_loss.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statistik(
        peer: u64,
        verlust: f32,
        ping_ms: u32,
        bandbreite: u32,
        im_team: bool,
    ) -> PeerStatistik {
        PeerStatistik {
            peer: PeerId(peer),
            verlust,
            ping_ms,
            bandbreite,
            im_team,
        }
    }

    #[test]
    fn leere_menge_gilt_als_verloren() {
        let q = NetworkQuality::aggregieren(&Vec::<PeerStatistik>::new());
        assert_eq!(q.avg_loss, 1.0);
        assert_eq!(q.avg_ping, 0);
        assert_eq!(q.min_bandwidth, 0);
    }

    #[test]
    fn mittelwerte_und_extreme() {
        let stats = [
            statistik(1, 0.1, 40, 10_000, true),
            statistik(2, 0.3, 80, 6_000, false),
        ];
        let q = NetworkQuality::aggregieren(&stats);
        assert!((q.avg_loss - 0.2).abs() < 1e-6);
        assert!((q.max_loss - 0.3).abs() < 1e-6);
        assert_eq!(q.avg_ping, 60);
        assert_eq!(q.max_ping, 80);
        assert_eq!(q.avg_bandwidth, 8_000);
        assert_eq!(q.min_bandwidth, 6_000);
    }

    #[test]
    fn team_filter() {
        let stats = [
            statistik(1, 0.0, 10, 10_000, true),
            statistik(2, 0.5, 90, 1_000, false),
        ];
        let (alle, team) = NetworkQuality::alle_und_team(&stats);
        assert_eq!(alle.max_ping, 90);
        assert_eq!(team.max_ping, 10);
        assert_eq!(team.avg_loss, 0.0);
    }

    #[test]
    fn team_ohne_mitglieder_gilt_als_verloren() {
        let stats = [statistik(1, 0.0, 10, 10_000, false)];
        let (_, team) = NetworkQuality::alle_und_team(&stats);
        assert_eq!(team, NetworkQuality::default());
    }

    #[test]
    fn verlust_prozent_gerundet() {
        let q = NetworkQuality {
            avg_loss: 0.254,
            ..NetworkQuality::default()
        };
        assert_eq!(q.verlust_prozent(), 25);
    }
}
