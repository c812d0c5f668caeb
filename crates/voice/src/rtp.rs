//! RTP-Capabilities, Encoding-Parameter und Transport-Parameter
//!
//! Die SFU liefert Capabilities als Liste von Codec-Beschreibungen mit
//! MIME-Strings. Diese werden beim Einlesen in `CodecKind` normalisiert,
//! sodass Codec-Auswahl und Richtlinien nie mit Strings vergleichen.

use pulse_core::{ConsumerId, ParticipantId, ProducerId, StreamKind, TransportId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Codecs
// ---------------------------------------------------------------------------

/// Medienart auf RTP-Ebene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl From<StreamKind> for MediaKind {
    fn from(kind: StreamKind) -> Self {
        if kind.ist_audio() {
            Self::Audio
        } else {
            Self::Video
        }
    }
}

/// Normalisierter Codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    Opus,
    Av1,
    H264,
    Vp8,
    Vp9,
    /// Retransmission (kein eigenstaendiger Medien-Codec)
    Rtx,
    Sonstiger,
}

impl CodecKind {
    /// Normalisiert einen MIME-String (`video/AV1`, `audio/opus`, ...)
    pub fn aus_mime(mime: &str) -> Self {
        match mime.to_ascii_lowercase().as_str() {
            "audio/opus" => Self::Opus,
            "video/av1" => Self::Av1,
            "video/h264" => Self::H264,
            "video/vp8" => Self::Vp8,
            "video/vp9" => Self::Vp9,
            "video/rtx" => Self::Rtx,
            _ => Self::Sonstiger,
        }
    }

    /// Kurzname aus der Konfiguration (`av1`, `h264`, `vp8`, ...)
    pub fn aus_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "opus" => Some(Self::Opus),
            "av1" => Some(Self::Av1),
            "h264" => Some(Self::H264),
            "vp8" => Some(Self::Vp8),
            "vp9" => Some(Self::Vp9),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Opus => "audio/opus",
            Self::Av1 => "video/AV1",
            Self::H264 => "video/H264",
            Self::Vp8 => "video/VP8",
            Self::Vp9 => "video/VP9",
            Self::Rtx => "video/rtx",
            Self::Sonstiger => "application/octet-stream",
        }
    }
}

/// Codec-Beschreibung wie von der SFU geliefert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl RtpCodecCapability {
    pub fn codec(&self) -> CodecKind {
        CodecKind::aus_mime(&self.mime_type)
    }
}

/// Capability-Beschreibung (Router der SFU oder lokales Geraet)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default)]
    pub header_extensions: Vec<serde_json::Value>,
}

impl RtpCapabilities {
    /// Erster Eintrag fuer den gegebenen Codec
    pub fn finde(&self, codec: CodecKind) -> Option<&RtpCodecCapability> {
        self.codecs.iter().find(|c| c.codec() == codec)
    }

    /// Gibt true zurueck wenn mindestens ein Medien-Codec der Art existiert
    pub fn unterstuetzt(&self, kind: MediaKind) -> bool {
        self.codecs
            .iter()
            .any(|c| c.kind == kind && !matches!(c.codec(), CodecKind::Rtx | CodecKind::Sonstiger))
    }
}

// ---------------------------------------------------------------------------
// Encodings
// ---------------------------------------------------------------------------

/// Skalierbarkeitsmodus (raeumliche/zeitliche Layer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalabilityMode {
    L1T1,
    L1T2,
    L1T3,
}

impl ScalabilityMode {
    /// Anzahl zeitlicher Layer (1 = keine zeitliche Skalierung)
    pub fn temporal_layers(&self) -> u8 {
        match self {
            Self::L1T1 => 1,
            Self::L1T2 => 2,
            Self::L1T3 => 3,
        }
    }
}

/// Sende-Prioritaet eines Encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    VeryLow,
    Low,
    Medium,
    High,
}

/// Parameter eines einzelnen Encodings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncoding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_framerate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scalability_mode: Option<ScalabilityMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtx: Option<bool>,
}

/// Codec-spezifische Optionen beim Produzieren
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodecOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opus_stereo: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opus_fec: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opus_dtx: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opus_max_playback_rate: Option<u32>,
    /// Start-Bitrate der Staukontrolle in kbps (nur H264/VP8 wirksam)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_google_start_bitrate: Option<u32>,
}

/// Was der Encoder bei Stau opfert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegradationPreference {
    /// Aufloesung reduzieren, Bildrate halten
    MaintainFramerate,
    /// Bildrate reduzieren, Aufloesung halten
    MaintainResolution,
    Balanced,
}

/// RTP-Parameter eines Producers/Consumers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default)]
    pub encodings: Vec<RtpEncoding>,
}

// ---------------------------------------------------------------------------
// Transport-Parameter
// ---------------------------------------------------------------------------

/// Richtung eines Transports aus Sicht des Clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Recv,
}

impl std::fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send => f.write_str("send"),
            Self::Recv => f.write_str("recv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    #[serde(default)]
    pub ice_lite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub foundation: String,
    pub ip: String,
    pub port: u16,
    pub protocol: String,
    pub priority: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    Auto,
    Client,
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsParameters {
    pub role: DtlsRole,
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// Vom Server erzeugte Parameter eines Transports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: TransportId,
    pub ice_parameters: IceParameters,
    #[serde(default)]
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

/// Vom Server erzeugte Parameter eines Consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerParams {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub participant_id: ParticipantId,
    pub stream_kind: StreamKind,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

/// Byte-Zaehler eines Transports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStatistik {
    pub bytes_sent: u64,
    pub bytes_received: u64,
}
