//! Fehlertypen der Voice-Session-Schicht
//!
//! Die Varianten folgen der Fehler-Taxonomie der Session:
//! Geraete- und Berechtigungsfehler, Transport- und Aushandlungsfehler,
//! Loopback-Fehler (nie session-kritisch) sowie Abbrueche durch neuere
//! Anfragen. Statistik-Abfragen scheitern still und haben keine Variante.

use pulse_audio::AudioError;
use thiserror::Error;

/// Welche Erfassungsquelle einen Geraetefehler ausgeloest hat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeraeteQuelle {
    Mikrofon,
    Kamera,
    Bildschirm,
    SystemAudio,
}

impl std::fmt::Display for GeraeteQuelle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Mikrofon => "mikrofon",
            Self::Kamera => "kamera",
            Self::Bildschirm => "bildschirm",
            Self::SystemAudio => "system-audio",
        };
        f.write_str(s)
    }
}

/// Alle Fehler der Voice-Session
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("Geraetefehler ({quelle}): {meldung}")]
    Geraet {
        quelle: GeraeteQuelle,
        meldung: String,
    },

    #[error("Transportfehler: {0}")]
    Transport(String),

    #[error("Aushandlung fehlgeschlagen: {0}")]
    Aushandlung(String),

    #[error("Signalisierungsfehler: {0}")]
    Signalisierung(String),

    #[error("Loopback-Fehler: {0}")]
    Loopback(String),

    #[error("Vorgang durch neuere Anfrage abgebrochen")]
    Abgebrochen,

    #[error("Keine aktive Voice-Session")]
    NichtVerbunden,

    #[error(transparent)]
    Audio(#[from] AudioError),
}

impl VoiceError {
    pub fn geraet(quelle: GeraeteQuelle, meldung: impl Into<String>) -> Self {
        Self::Geraet {
            quelle,
            meldung: meldung.into(),
        }
    }

    /// Fatal fuer die Session: fuehrt beim Beitritt zu `Failed`
    ///
    /// Geraetefehler sind nur fatal, wenn sie das Mikrofon betreffen.
    pub fn ist_fatal(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Aushandlung(_) | Self::Signalisierung(_) => true,
            Self::Audio(_) => true,
            Self::Geraet { quelle, .. } => *quelle == GeraeteQuelle::Mikrofon,
            Self::Loopback(_) | Self::Abgebrochen | Self::NichtVerbunden => false,
        }
    }

    /// Ein erneuter Beitritt kann den Fehler beheben
    ///
    /// Aushandlungsfehler (Capability-Mismatch) bleiben bei einem zweiten
    /// Versuch gegen dieselbe SFU bestehen.
    pub fn ist_wiederholbar(&self) -> bool {
        self.ist_fatal() && !matches!(self, Self::Aushandlung(_))
    }

    pub fn ist_abbruch(&self) -> bool {
        matches!(self, Self::Abgebrochen)
    }
}

pub type VoiceResult<T> = Result<T, VoiceError>;
