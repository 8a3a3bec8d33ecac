//! Sprechziel des lokalen Senders

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use feldfunk_core::KanalId;
use feldfunk_protocol::voice::VoiceNachricht;

use crate::transport::Transport;

/// An wen der lokale Sprachstrom geht
///
/// `Channel` wird an alle Peers gesendet; nur Empfaenger, die auf denselben
/// Kanal eingestellt sind, spielen ihn ab.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTarget {
    #[default]
    Stopped,
    Team,
    Global,
    Channel(KanalId),
}

impl RouteTarget {
    /// Wird gerade gesendet?
    pub fn ist_aktiv(&self) -> bool {
        !matches!(self, RouteTarget::Stopped)
    }

    /// START-Nachricht fuer dieses Ziel, `None` fuer `Stopped`
    pub fn start_nachricht(&self) -> Option<VoiceNachricht> {
        match self {
            RouteTarget::Stopped => None,
            RouteTarget::Team | RouteTarget::Global => Some(VoiceNachricht::Start { kanal: None }),
            RouteTarget::Channel(kanal) => Some(VoiceNachricht::Start {
                kanal: Some(*kanal),
            }),
        }
    }

    /// Verteilt `daten` ueber den passenden Transportweg
    ///
    /// Gibt `false` zurueck, wenn das Ziel `Stopped` ist und nichts gesendet wurde.
    pub fn senden(&self, transport: &dyn Transport, daten: Bytes) -> bool {
        match self {
            RouteTarget::Stopped => return false,
            RouteTarget::Team => transport.senden_an_team(daten),
            RouteTarget::Global | RouteTarget::Channel(_) => transport.senden_an_alle(daten),
        }
        true
    }
}

impl std::fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteTarget::Stopped => write!(f, "gestoppt"),
            RouteTarget::Team => write!(f, "team"),
            RouteTarget::Global => write!(f, "global"),
            RouteTarget::Channel(kanal) => write!(f, "{kanal}"),
        }
    }
}
