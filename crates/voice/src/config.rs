//! Konfiguration der Voice-Session
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass die Session ohne Konfigurationsdatei
//! lauffaehig ist.

use pulse_audio::MixerConfig;
use pulse_observability::logging::{log_format_gueltig, log_level_gueltig, logging_initialisieren};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::rtp::CodecKind;

/// Vollstaendige Konfiguration der Voice-Session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Audio-Graph
    pub audio: AudioEinstellungen,
    /// Bildschirmfreigabe
    pub bildschirm: BildschirmEinstellungen,
    /// Transport-Statistik
    pub statistik: StatistikEinstellungen,
    /// Loopback-Relay
    pub loopback: LoopbackEinstellungen,
    /// Logging
    pub logging: LoggingEinstellungen,
}

/// Audio-Graph-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    /// Abtastrate in Hz (auch fuer Mikrofon-Constraints)
    pub sample_rate: u32,
    /// Kanalanzahl
    pub kanaele: u16,
    /// Frames pro Render-Quantum
    pub quantum_frames: usize,
    /// Kapazitaet des Ausgangs-Feeds in Samples
    pub ring_kapazitaet: usize,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            kanaele: 2,
            quantum_frames: 960,
            ring_kapazitaet: 48000 * 2,
        }
    }
}

impl AudioEinstellungen {
    pub fn mixer_config(&self) -> MixerConfig {
        MixerConfig {
            sample_rate: self.sample_rate,
            channels: self.kanaele,
            quantum_frames: self.quantum_frames,
            ring_kapazitaet: self.ring_kapazitaet,
        }
    }
}

/// Bildschirmfreigabe-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BildschirmEinstellungen {
    /// Video-Bitrate-Obergrenze in kbps, wenn der Benutzer nichts gewaehlt hat
    pub standard_video_bitrate_kbps: u32,
    /// Anteil der Obergrenze, mit dem die Staukontrolle startet
    pub start_bitrate_faktor: f64,
    /// Audio-Bitrate in kbps, wenn der Benutzer nichts gewaehlt hat
    pub standard_audio_bitrate_kbps: u32,
    /// Codec-Praeferenz, effizientester zuerst
    pub codec_praeferenz: Vec<String>,
}

impl Default for BildschirmEinstellungen {
    fn default() -> Self {
        Self {
            standard_video_bitrate_kbps: 10_000,
            start_bitrate_faktor: 0.7,
            standard_audio_bitrate_kbps: 128,
            codec_praeferenz: vec!["av1".into(), "h264".into(), "vp8".into()],
        }
    }
}

impl BildschirmEinstellungen {
    /// Codec-Praeferenz als Enum; unbekannte Namen werden uebersprungen
    pub fn codecs(&self) -> Vec<CodecKind> {
        self.codec_praeferenz
            .iter()
            .filter_map(|name| {
                let codec = CodecKind::aus_name(name);
                if codec.is_none() {
                    tracing::warn!(codec = %name, "Unbekannter Codec in Praeferenzliste ignoriert");
                }
                codec
            })
            .collect()
    }
}

/// Statistik-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatistikEinstellungen {
    /// Abfrageintervall in Millisekunden
    pub intervall_ms: u64,
    /// Anzahl Messungen im gleitenden Durchschnitt
    pub fenster: usize,
}

impl Default for StatistikEinstellungen {
    fn default() -> Self {
        Self {
            intervall_ms: 1000,
            fenster: 10,
        }
    }
}

impl StatistikEinstellungen {
    pub fn intervall(&self) -> Duration {
        Duration::from_millis(self.intervall_ms.max(1))
    }
}

/// Loopback-Relay-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackEinstellungen {
    /// Bitrate-Obergrenze der lokalen Spiegelung in bps
    pub max_bitrate_bps: u32,
}

impl Default for LoopbackEinstellungen {
    fn default() -> Self {
        Self {
            max_bitrate_bps: 50_000_000,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl LoggingEinstellungen {
    /// Level und Format, mit Rueckfall auf die Standardwerte bei ungueltigen Angaben
    pub fn wirksam(&self) -> (String, String) {
        let standard = Self::default();
        let level = if log_level_gueltig(&self.level) {
            self.level.clone()
        } else {
            tracing::warn!(level = %self.level, "Ungueltiger Log-Level, verwende '{}'", standard.level);
            standard.level
        };
        let format = if log_format_gueltig(&self.format) {
            self.format.clone()
        } else {
            tracing::warn!(format = %self.format, "Ungueltiges Log-Format, verwende '{}'", standard.format);
            standard.format
        };
        (level, format)
    }

    /// Setzt den globalen tracing-Subscriber
    ///
    /// `PULSE_LOG_LEVEL`/`PULSE_LOG_FORMAT` haben Vorrang. Gibt `false`
    /// zurueck, wenn die einbettende Anwendung bereits einen Subscriber hat.
    pub fn initialisieren(&self) -> bool {
        let (level, format) = self.wirksam();
        logging_initialisieren(&level, &format)
    }
}

impl VoiceConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }
}
