//! Gemeinsame Identifikationstypen der Voice-Session-Schicht
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen. Kanal- und
//! Teilnehmer-IDs vergibt der Server numerisch, Producer-, Consumer- und
//! Transport-IDs vergibt die SFU als Strings, Track-IDs entstehen lokal.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Eindeutige Voice-Kanal-ID (vom Server vergeben)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u32);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel:{}", self.0)
    }
}

/// Eindeutige Teilnehmer-ID (Benutzer im Voice-Kanal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub u32);

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "participant:{}", self.0)
    }
}

/// Lokal erzeugte Track-ID
///
/// Identitaet eines Medien-Tracks. Der Audio-Producer haelt fuer die gesamte
/// Session dieselbe Track-ID (Ausgang des Audio-Graphen).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(pub Uuid);

impl TrackId {
    /// Erstellt eine neue zufaellige TrackId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "track:{}", self.0)
    }
}

macro_rules! sfu_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Gibt die ID als String-Slice zurueck
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

sfu_id!(
    /// Von der SFU vergebene Producer-ID
    ProducerId,
    "producer"
);
sfu_id!(
    /// Von der SFU vergebene Consumer-ID
    ConsumerId,
    "consumer"
);
sfu_id!(
    /// Von der SFU vergebene Transport-ID
    TransportId,
    "transport"
);

// ---------------------------------------------------------------------------
// StreamKind
// ---------------------------------------------------------------------------

/// Art eines Medienflusses
///
/// Pro Session existiert hoechstens ein lokaler Producer je Art.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Mikrofon (Ausgang des Audio-Graphen)
    Audio,
    /// Webcam
    Video,
    /// Bildschirmfreigabe (Video)
    Screen,
    /// Bildschirmfreigabe (System-Audio)
    ScreenAudio,
}

impl StreamKind {
    /// Alle Stream-Arten in fester Reihenfolge
    pub const ALLE: [StreamKind; 4] = [
        StreamKind::Audio,
        StreamKind::Video,
        StreamKind::Screen,
        StreamKind::ScreenAudio,
    ];

    /// Gibt true zurueck wenn die Art Audio traegt
    pub fn ist_audio(&self) -> bool {
        matches!(self, Self::Audio | Self::ScreenAudio)
    }

    /// Gibt true zurueck wenn die Art zur Bildschirmfreigabe gehoert
    pub fn ist_bildschirm(&self) -> bool {
        matches!(self, Self::Screen | Self::ScreenAudio)
    }

    /// Track-Art, die ein Producer dieser Stream-Art erwartet
    pub fn track_art(&self) -> crate::track::TrackKind {
        if self.ist_audio() {
            crate::track::TrackKind::Audio
        } else {
            crate::track::TrackKind::Video
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Screen => "screen",
            Self::ScreenAudio => "screen_audio",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ConnectionStatus
// ---------------------------------------------------------------------------

/// Verbindungszustand einer Voice-Session
///
/// `Disconnected -> Connecting -> Connected | Failed`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl ConnectionStatus {
    /// Numerischer Wert fuer Metriken (0..=3)
    pub fn als_zahl(&self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Failed => 3,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
