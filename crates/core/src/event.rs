//! Ereignisse der Voice-Session
//!
//! `SfuEvent` kommt von der Signalisierung herein (Push vom Server),
//! `VoiceEvent` geht an die UI hinaus.

use serde::{Deserialize, Serialize};

use crate::types::{ConnectionStatus, ParticipantId, ProducerId, StreamKind};

/// Push-Ereignis der SFU
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SfuEvent {
    /// Ein entfernter Teilnehmer hat einen neuen Producer angelegt
    NewProducer {
        participant_id: ParticipantId,
        kind: StreamKind,
        producer_id: ProducerId,
    },
    /// Ein entfernter Producer wurde geschlossen
    ProducerClosed {
        participant_id: ParticipantId,
        kind: StreamKind,
    },
    /// Ein Teilnehmer hat den Kanal verlassen
    ParticipantLeft { participant_id: ParticipantId },
}

/// Zustandsaenderung fuer die UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceEvent {
    StatusGeaendert(ConnectionStatus),
    /// Ein lokaler Producer wurde geschlossen, weil sein Track extern endete
    ProducerBeendet { kind: StreamKind },
    /// Ein entfernter Stream ist verfuegbar
    StreamHinzugefuegt {
        participant_id: ParticipantId,
        kind: StreamKind,
    },
    /// Ein entfernter Stream wurde entfernt
    StreamEntfernt {
        participant_id: ParticipantId,
        kind: StreamKind,
    },
    /// Alle Streams eines Teilnehmers wurden entfernt
    TeilnehmerEntfernt { participant_id: ParticipantId },
    /// Das Loopback-Fenster wurde geschlossen
    LoopbackGeschlossen,
    /// Die Mikrofon-Erfassung endete extern (Geraet entfernt, Zugriff entzogen)
    MikrofonBeendet,
    /// Beitritt mit fatalem Fehler gescheitert
    BeitrittFehlgeschlagen { meldung: String, wiederholbar: bool },
}
