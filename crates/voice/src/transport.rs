//! Schnittstelle zum Netzwerk
//!
//! Der Multiplexer kennt kein Socket-API. Er sendet ueber [`Transport`] und
//! bekommt Eingaben als [`TransportEreignis`] zugestellt. Senden ist
//! unzuverlaessig (Datagramm-Semantik): ein verworfenes Paket ist kein Fehler.

use bytes::Bytes;

use feldfunk_core::PeerId;
use feldfunk_protocol::quality::PeerStatistik;

/// Senden und Trennen, vom Host implementiert
pub trait Transport: Send + Sync {
    /// Nachricht an genau einen Peer
    fn senden_an(&self, peer: PeerId, daten: Bytes);

    /// Nachricht an alle Peers des eigenen Teams
    fn senden_an_team(&self, daten: Bytes);

    /// Nachricht an alle verbundenen Peers
    fn senden_an_alle(&self, daten: Bytes);

    /// Verbindung zu einem Peer beenden (z. B. bei inkompatibler Version)
    fn trennen(&self, peer: PeerId);
}

/// Eingaben vom Transport an den Multiplexer
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEreignis {
    NeueVerbindung(PeerId),
    VerbindungVerloren(PeerId),
    Paket { von: PeerId, daten: Bytes },
    /// Periodische Messung pro Peer
    Messung(Vec<PeerStatistik>),
}

impl TransportEreignis {
    /// Betroffener Peer, falls das Ereignis einen hat
    pub fn peer(&self) -> Option<PeerId> {
        match self {
            TransportEreignis::NeueVerbindung(peer)
            | TransportEreignis::VerbindungVerloren(peer)
            | TransportEreignis::Paket { von: peer, .. } => Some(*peer),
            TransportEreignis::Messung(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_eines_ereignisses() {
        assert_eq!(
            TransportEreignis::NeueVerbindung(PeerId(2)).peer(),
            Some(PeerId(2))
        );
        let paket = TransportEreignis::Paket {
            von: PeerId(5),
            daten: Bytes::from_static(&[3]),
        };
        assert_eq!(paket.peer(), Some(PeerId(5)));
        assert_eq!(TransportEreignis::Messung(Vec::new()).peer(), None);
    }
}
