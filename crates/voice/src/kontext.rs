//! Explizite Abhaengigkeiten des Multiplexers
//!
//! Alles, was nicht zum Protokoll selbst gehoert (Codec-Erzeugung,
//! Metriken, Umgebungseffekte), wird beim Erstellen uebergeben. Der Kern
//! haelt keinen globalen Zustand.

use std::sync::Arc;

use feldfunk_audio::{AudioResult, Umgebungsmodifikator, VoiceDecoder, VoiceEncoder};
use feldfunk_observability::VoiceMetriken;
use feldfunk_protocol::codec::OpusConfig;

/// Erzeugt Encoder und Decoder fuer neue Stroeme
pub trait CodecFabrik: Send + Sync {
    fn encoder(&self, config: &OpusConfig) -> AudioResult<VoiceEncoder>;
    fn decoder(&self, config: &OpusConfig) -> AudioResult<VoiceDecoder>;
}

/// libopus ueber audiopus
#[derive(Debug, Default, Clone, Copy)]
pub struct OpusFabrik;

impl CodecFabrik for OpusFabrik {
    fn encoder(&self, config: &OpusConfig) -> AudioResult<VoiceEncoder> {
        VoiceEncoder::neu(config)
    }

    fn decoder(&self, config: &OpusConfig) -> AudioResult<VoiceDecoder> {
        VoiceDecoder::neu(config)
    }
}

/// Kontext eines Multiplexers
#[derive(Clone)]
pub struct VoiceKontext {
    pub fabrik: Arc<dyn CodecFabrik>,
    pub metriken: Option<VoiceMetriken>,
    /// Wird auf jeden dekodierten Batch jedes Sprechers angewendet
    pub modifikator: Option<Umgebungsmodifikator>,
}

impl Default for VoiceKontext {
    fn default() -> Self {
        Self {
            fabrik: Arc::new(OpusFabrik),
            metriken: None,
            modifikator: None,
        }
    }
}

impl VoiceKontext {
    pub fn mit_metriken(mut self, metriken: VoiceMetriken) -> Self {
        self.metriken = Some(metriken);
        self
    }

    pub fn mit_modifikator(mut self, modifikator: Umgebungsmodifikator) -> Self {
        self.modifikator = Some(modifikator);
        self
    }

    pub fn mit_fabrik(mut self, fabrik: Arc<dyn CodecFabrik>) -> Self {
        self.fabrik = fabrik;
        self
    }
}
