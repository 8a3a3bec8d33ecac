//! Konfiguration des Multiplexers

use serde::{Deserialize, Serialize};

use feldfunk_core::KanalId;
use feldfunk_protocol::codec::OpusConfig;

/// Einstellungen eines Sprachknotens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Codec-Einstellungen fuer Encoder und alle Decoder
    pub opus: OpusConfig,
    /// Eingestellter Funkkanal; kanalgebundene Sprecher auf anderen
    /// Kanaelen werden nicht wiedergegeben
    pub kanal: Option<KanalId>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            opus: OpusConfig::default(),
            kanal: None,
        }
    }
}

impl VoiceConfig {
    /// Prueft die Codec-Einstellungen
    pub fn validieren(&self) -> Result<(), String> {
        self.opus.validieren()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_ohne_kanal() {
        let config = VoiceConfig::default();
        assert_eq!(config.kanal, None);
        assert!(config.validieren().is_ok());
    }

    #[test]
    fn teilweise_toml_fuellt_standardwerte() {
        let config: VoiceConfig = toml::from_str(
            r#"
            kanal = 3

            [opus]
            bitrate_bps = 16000
            "#,
        )
        .unwrap();
        assert_eq!(config.kanal, Some(KanalId(3)));
        assert_eq!(config.opus.bitrate_bps, 16_000);
        assert_eq!(config.opus.complexity, OpusConfig::default().complexity);
    }

    #[test]
    fn ungueltige_bitrate_faellt_auf() {
        let mut config = VoiceConfig::default();
        config.opus.bitrate_bps = 100;
        assert!(config.validieren().is_err());
    }

    #[test]
    fn stereo_aus_toml_wird_abgelehnt() {
        let config: VoiceConfig = toml::from_str(
            r#"
            [opus]
            channels = "stereo"
            "#,
        )
        .unwrap();
        assert!(config.validieren().is_err());
    }
}
