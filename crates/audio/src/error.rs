//! Fehlertypen fuer den Audio-Graphen

use thiserror::Error;

/// Alle moeglichen Fehler des Audio-Graphen
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Audio-Graph nicht initialisiert")]
    GraphNichtInitialisiert,

    #[error("Audio-Graph bereits geschlossen")]
    GraphGeschlossen,

    #[error("Track traegt kein Audio: {0}")]
    KeinAudioTrack(String),

    #[error("Dekodierung fehlgeschlagen: {0}")]
    Dekodierung(String),

    #[error("Nicht unterstuetztes Format: {0}")]
    FormatNichtUnterstuetzt(String),
}

pub type AudioResult<T> = Result<T, AudioError>;
