//! Schnittstelle zur Signalisierung (RPC zur SFU)
//!
//! Die Signalisierung selbst liegt ausserhalb dieses Crates. Push-Ereignisse
//! der SFU kommen ueber einen mpsc-Kanal, der pro Session genau einmal
//! abonniert und beim Aufraeumen verworfen wird.

use async_trait::async_trait;
use pulse_core::{ConsumerId, ParticipantId, ProducerId, SfuEvent, StreamKind, TransportId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::VoiceResult;
use crate::rtp::{
    ConsumerParams, DtlsParameters, RtpCapabilities, RtpParameters, TransportDirection,
    TransportParams,
};

/// Teilaktualisierung des eigenen Voice-Zustands beim Server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceStatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mic_muted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound_muted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webcam_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sharing_screen: Option<bool>,
}

/// Producer, der beim Beitritt bereits im Kanal existiert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingProducer {
    pub participant_id: ParticipantId,
    pub kind: StreamKind,
    pub producer_id: ProducerId,
}

#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Router-Capabilities der SFU (einmal pro Beitritt)
    async fn get_capabilities(&self) -> VoiceResult<RtpCapabilities>;

    async fn create_transport_params(&self, direction: TransportDirection) -> VoiceResult<TransportParams>;

    async fn connect_transport(&self, id: &TransportId, dtls: DtlsParameters) -> VoiceResult<()>;

    /// Kuendigt einen lokalen Producer an; liefert die SFU-seitige ID
    async fn announce_producer(&self, kind: StreamKind, rtp_parameters: RtpParameters) -> VoiceResult<ProducerId>;

    async fn notify_producer_closed(&self, kind: StreamKind) -> VoiceResult<()>;

    async fn get_existing_producers(&self) -> VoiceResult<Vec<ExistingProducer>>;

    async fn consume(&self, producer_id: &ProducerId, rtp_capabilities: &RtpCapabilities) -> VoiceResult<ConsumerParams>;

    async fn resume_consumer(&self, consumer_id: &ConsumerId) -> VoiceResult<()>;

    async fn update_voice_state(&self, patch: VoiceStatePatch) -> VoiceResult<()>;

    /// Abonniert die Push-Ereignisse der SFU
    fn subscribe(&self) -> mpsc::Receiver<SfuEvent>;
}
