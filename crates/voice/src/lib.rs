//! pulse-voice – Voice-Session-Schicht des Pulse-Clients
//!
//! Verbindet lokale Geraete ueber eine SFU mit einem Voice-Kanal: ein
//! Sende- und ein Empfangs-Transport, hoechstens ein Producer pro
//! Stream-Art, ein Consumer pro entferntem Producer.
//!
//! ## Module
//! - [`session`] – Beitritt, Aufraeumen, Anrufsteuerung
//! - [`capture`] – Geraete-Erfassung und Hot-Swap
//! - [`transport`] – Sende-/Empfangs-Transport
//! - [`producer`] / [`consumer`] – Ausgehende und eingehende Streams
//! - [`encoding`] – Encoding-Richtlinien fuer die Bildschirmfreigabe
//! - [`loopback`] – Relay in das Vollbild-Fenster
//! - [`stats`] – Verbindungsstatistik
//! - [`engine`] / [`signaling`] / [`sound`] – Schnittstellen nach aussen
//! - [`config`] – TOML-Konfiguration
//!
//! ## Start
//! Konfiguration laden und Logging aus der `[logging]`-Sektion setzen,
//! bevor der `SessionController` erstellt wird:
//!
//! ```no_run
//! let config = pulse_voice::VoiceConfig::laden("pulse-voice.toml")?;
//! config.logging.initialisieren();
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod capture;
pub mod config;
pub mod consumer;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod guard;
pub mod loopback;
pub mod producer;
pub mod rtp;
pub mod session;
pub mod settings;
pub mod signaling;
pub mod sound;
pub mod stats;
pub mod transport;

pub use capture::{CaptureBackend, DeviceCaptureManager, SystemAudioCapture, SystemAudioRoute};
pub use config::VoiceConfig;
pub use consumer::ConsumerRegistry;
pub use error::{GeraeteQuelle, VoiceError, VoiceResult};
pub use loopback::{LoopbackQuelle, LoopbackViewer};
pub use producer::ProducerRegistry;
pub use session::{LoopbackDienste, OwnVoiceState, SessionController, SessionDienste};
pub use settings::DeviceSettings;
pub use signaling::SignalingClient;
pub use stats::{StatsMonitor, VerbindungsStatistik};
pub use transport::TransportManager;
