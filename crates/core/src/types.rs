//! Gemeinsame Identifikationstypen fuer Feldfunk
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};

/// Kennung eines entfernten Teilnehmers, vom Transport vergeben
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Gibt den inneren Wert zurueck
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer:{}", self.0)
    }
}

impl From<u64> for PeerId {
    fn from(wert: u64) -> Self {
        Self(wert)
    }
}

/// Funkkanal (ein Byte auf der Leitung)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KanalId(pub u8);

impl KanalId {
    /// Gibt den inneren Wert zurueck
    pub fn inner(&self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for KanalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "kanal:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_display() {
        assert_eq!(PeerId(42).to_string(), "peer:42");
    }

    #[test]
    fn kanal_id_display() {
        assert_eq!(KanalId(3).to_string(), "kanal:3");
    }

    #[test]
    fn ids_sind_serde_kompatibel() {
        let peer = PeerId(7);
        let json = serde_json::to_string(&peer).unwrap();
        let peer2: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(peer, peer2);
    }
}
