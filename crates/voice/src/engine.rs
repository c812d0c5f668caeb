//! Medien-Engine (mediasoup-artiges Client-Geraet)
//!
//! Die Engine laedt die Router-Capabilities der SFU und erzeugt daraus ein
//! `MediaDevice`. Das Geraet baut Sende- und Empfangs-Transporte, auf denen
//! Producer bzw. Consumer entstehen. Alle Objekte sind `Arc<dyn ...>`, damit
//! Registries sie referenzieren koennen ohne sie zu besitzen.

use async_trait::async_trait;
use pulse_core::{ConsumerId, MediaTrack, ProducerId, StreamKind, TransportId};
use std::sync::Arc;

use crate::error::VoiceResult;
use crate::rtp::{
    CodecOptions, ConsumerParams, DegradationPreference, DtlsParameters, MediaKind,
    RtpCapabilities, RtpCodecCapability, RtpEncoding, RtpParameters, TransportParams,
    TransportStatistik,
};

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Laedt die Router-Capabilities; schlaegt bei inkompatiblem Router fehl
    async fn load(&self, router_capabilities: &RtpCapabilities) -> VoiceResult<Arc<dyn MediaDevice>>;
}

#[async_trait]
pub trait MediaDevice: Send + Sync {
    /// Empfangs-Capabilities des lokalen Geraets
    fn rtp_capabilities(&self) -> RtpCapabilities;

    fn can_produce(&self, kind: MediaKind) -> bool;

    async fn create_send_transport(&self, params: TransportParams) -> VoiceResult<Arc<dyn SendTransport>>;

    async fn create_recv_transport(&self, params: TransportParams) -> VoiceResult<Arc<dyn RecvTransport>>;
}

/// Parameter fuer `SendTransport::produce`
#[derive(Debug, Clone)]
pub struct ProduceOptions {
    pub track: MediaTrack,
    pub stream_kind: StreamKind,
    /// Erzwungener Codec (None = Engine waehlt)
    pub codec: Option<RtpCodecCapability>,
    pub encodings: Vec<RtpEncoding>,
    pub codec_options: Option<CodecOptions>,
}

#[async_trait]
pub trait SendTransport: Send + Sync {
    fn id(&self) -> TransportId;

    fn local_dtls_parameters(&self) -> DtlsParameters;

    async fn produce(&self, options: ProduceOptions) -> VoiceResult<Arc<dyn ProducerHandle>>;

    async fn stats(&self) -> VoiceResult<TransportStatistik>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

#[async_trait]
pub trait RecvTransport: Send + Sync {
    fn id(&self) -> TransportId;

    fn local_dtls_parameters(&self) -> DtlsParameters;

    async fn consume(&self, params: ConsumerParams) -> VoiceResult<Arc<dyn ConsumerHandle>>;

    async fn stats(&self) -> VoiceResult<TransportStatistik>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Lokaler Producer auf dem Sende-Transport
#[async_trait]
pub trait ProducerHandle: Send + Sync {
    /// Lokale ID (bis zur Ankuendigung bei der SFU)
    fn id(&self) -> ProducerId;

    fn kind(&self) -> StreamKind;

    fn track(&self) -> MediaTrack;

    fn rtp_parameters(&self) -> RtpParameters;

    /// Ersetzt den Quell-Track ohne Neuverhandlung
    async fn replace_track(&self, track: MediaTrack) -> VoiceResult<()>;

    async fn set_degradation_preference(&self, preference: DegradationPreference) -> VoiceResult<()>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Consumer auf dem Empfangs-Transport
pub trait ConsumerHandle: Send + Sync {
    fn id(&self) -> ConsumerId;

    fn producer_id(&self) -> ProducerId;

    fn kind(&self) -> MediaKind;

    fn track(&self) -> MediaTrack;

    fn close(&self);

    fn is_closed(&self) -> bool;
}
