//! pulse-audio – Audio-Graph der Voice-Session
//!
//! - Persistenter Mischgraph (Mikrofon -> Gain -> Ziel, Soundpad -> Ziel)
//! - Mute ueber den Gain-Knoten, ohne den Ausgangs-Track zu ersetzen
//! - Dekodierung von Soundpad-Dateien via symphonia

pub mod decoder;
pub mod error;
pub mod mixer;

// Bequeme Re-Exporte der wichtigsten Typen
pub use decoder::{dekodieren, DekodierterPuffer};
pub use error::{AudioError, AudioResult};
pub use mixer::{AudioGraphMixer, MixerConfig, TransientId};
