//! pulse-core – Gemeinsame Typen der Voice-Session-Schicht
//!
//! Dieses Crate stellt die Bausteine bereit, die Audio-Graph und
//! Session-Steuerung gemeinsam nutzen: ID-Newtypes, Stream-Arten,
//! Medien-Tracks und die Ereignisse, die zwischen SFU und Client fliessen.

pub mod event;
pub mod track;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use event::{SfuEvent, VoiceEvent};
pub use track::{AudioFeed, ContentHint, DisplaySurface, EndeGrund, MediaStream, MediaTrack, TrackKind, TrackState};
pub use types::{
    ChannelId, ConnectionStatus, ConsumerId, ParticipantId, ProducerId, StreamKind, TrackId,
    TransportId,
};
