//! Geraete-Einstellungen des Benutzers
//!
//! Extern verwaltet (Einstellungsdialog), fuer die Session nur Eingabe.
//! Aenderungen waehrend eines Anrufs loesen einen Hot-Swap aus, nie eine
//! Neuerstellung des Producers.

use serde::{Deserialize, Serialize};

use crate::capture::{AudioConstraints, DisplayConstraints, VideoConstraints};

/// Aufloesungsstufe fuer Webcam und Bildschirmfreigabe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "144p")]
    P144,
    #[serde(rename = "240p")]
    P240,
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "1440p")]
    P1440,
    #[serde(rename = "2160p")]
    P2160,
}

impl Resolution {
    /// Breite und Hoehe in Pixeln (16:9)
    pub fn breite_hoehe(&self) -> (u32, u32) {
        match self {
            Self::P144 => (256, 144),
            Self::P240 => (426, 240),
            Self::P360 => (640, 360),
            Self::P480 => (854, 480),
            Self::P720 => (1280, 720),
            Self::P1080 => (1920, 1080),
            Self::P1440 => (2560, 1440),
            Self::P2160 => (3840, 2160),
        }
    }
}

/// Vom Benutzer gewaehlte Geraete und Qualitaetsstufen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceSettings {
    pub microphone_id: Option<String>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub webcam_id: Option<String>,
    pub webcam_resolution: Resolution,
    pub webcam_framerate: u32,
    pub screen_resolution: Resolution,
    pub screen_framerate: u32,
    /// Bitrate-Obergrenze der Bildschirmfreigabe in kbps (None = Standard)
    pub screen_video_bitrate: Option<u32>,
    /// Bitrate des Bildschirm-Audios in kbps (None = Standard)
    pub screen_audio_bitrate: Option<u32>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            microphone_id: None,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            webcam_id: None,
            webcam_resolution: Resolution::P720,
            webcam_framerate: 30,
            screen_resolution: Resolution::P1080,
            screen_framerate: 30,
            screen_video_bitrate: None,
            screen_audio_bitrate: None,
        }
    }
}

impl DeviceSettings {
    /// Betrifft die Aenderung das Mikrofon?
    pub fn mikrofon_geaendert(&self, andere: &DeviceSettings) -> bool {
        self.microphone_id != andere.microphone_id
            || self.echo_cancellation != andere.echo_cancellation
            || self.noise_suppression != andere.noise_suppression
            || self.auto_gain_control != andere.auto_gain_control
    }

    /// Betrifft die Aenderung die Webcam?
    pub fn webcam_geaendert(&self, andere: &DeviceSettings) -> bool {
        self.webcam_id != andere.webcam_id
            || self.webcam_framerate != andere.webcam_framerate
            || self.webcam_resolution != andere.webcam_resolution
    }

    /// Mikrofon-Constraints gemaess Einstellungen
    pub fn mikrofon_constraints(&self, sample_rate: u32, kanaele: u16) -> AudioConstraints {
        AudioConstraints {
            device_id: self.microphone_id.clone(),
            exakt: self.microphone_id.is_some(),
            echo_cancellation: self.echo_cancellation,
            noise_suppression: self.noise_suppression,
            auto_gain_control: self.auto_gain_control,
            sample_rate,
            channel_count: kanaele,
        }
    }

    pub fn webcam_constraints(&self) -> VideoConstraints {
        let (breite, hoehe) = self.webcam_resolution.breite_hoehe();
        VideoConstraints {
            device_id: self.webcam_id.clone(),
            breite,
            hoehe,
            frame_rate: self.webcam_framerate,
        }
    }

    /// Constraints fuer die Bildschirmauswahl
    ///
    /// Audio ohne AGC und Echo-Unterdrueckung (Systemklang soll unveraendert
    /// ankommen), die eigene Anwendung wird von der Auswahl ausgeschlossen.
    pub fn bildschirm_constraints(&self, sample_rate: u32, kanaele: u16) -> DisplayConstraints {
        let (breite, hoehe) = self.screen_resolution.breite_hoehe();
        DisplayConstraints {
            video: VideoConstraints {
                device_id: None,
                breite,
                hoehe,
                frame_rate: self.screen_framerate,
            },
            audio: Some(AudioConstraints {
                device_id: None,
                exakt: false,
                echo_cancellation: false,
                noise_suppression: true,
                auto_gain_control: false,
                sample_rate,
                channel_count: kanaele,
            }),
            eigene_oberflaeche_ausschliessen: true,
        }
    }
}
