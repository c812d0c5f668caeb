//! Encoding-Richtlinien pro Stream-Art
//!
//! Bildschirm-Video: bester verfuegbarer Codec aus der Praeferenzliste,
//! eine einzige Schicht (L1T1), feste Bitrate-Obergrenze, konservative
//! Start-Bitrate und Aufloesung vor Bildrate opfern.
//!
//! Bildschirm-Audio: Stereo, FEC an, kein DTX. Stille muss gesendet werden,
//! sonst hoert man Aussetzer im mitgeschnittenen System-Audio.

use crate::config::BildschirmEinstellungen;
use crate::rtp::{
    CodecKind, CodecOptions, DegradationPreference, Priority, RtpCapabilities,
    RtpCodecCapability, RtpEncoding, ScalabilityMode,
};
use crate::settings::DeviceSettings;

/// Vollstaendige Produce-Richtlinie einer Stream-Art
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProduceRichtlinie {
    pub codec: Option<RtpCodecCapability>,
    pub encodings: Vec<RtpEncoding>,
    pub codec_options: Option<CodecOptions>,
    /// Wird nach der Erstellung gesetzt; Fehler dabei sind nicht kritisch
    pub degradation: Option<DegradationPreference>,
}

impl ProduceRichtlinie {
    /// Engine-Standard (Mikrofon, Webcam)
    pub fn standard() -> Self {
        Self::default()
    }
}

/// Erster Codec der Praeferenzliste, den das lokale Geraet kodieren kann
pub fn codec_waehlen(
    praeferenz: &[CodecKind],
    capabilities: &RtpCapabilities,
) -> Option<RtpCodecCapability> {
    praeferenz
        .iter()
        .find_map(|codec| capabilities.finde(*codec))
        .cloned()
}

/// Richtlinie fuer das Bildschirm-Video
pub fn bildschirm_video(
    settings: &DeviceSettings,
    cfg: &BildschirmEinstellungen,
    capabilities: &RtpCapabilities,
) -> ProduceRichtlinie {
    let kbps = settings
        .screen_video_bitrate
        .unwrap_or(cfg.standard_video_bitrate_kbps);
    let start_kbps = (f64::from(kbps) * cfg.start_bitrate_faktor).round() as u32;

    let codec = codec_waehlen(&cfg.codecs(), capabilities);
    if codec.is_none() {
        tracing::debug!("Kein bevorzugter Bildschirm-Codec verfuegbar, Engine waehlt");
    }

    ProduceRichtlinie {
        codec,
        encodings: vec![RtpEncoding {
            max_bitrate: Some(kbps.saturating_mul(1000)),
            max_framerate: Some(settings.screen_framerate),
            scalability_mode: Some(ScalabilityMode::L1T1),
            priority: Some(Priority::High),
            network_priority: Some(Priority::High),
            dtx: None,
        }],
        codec_options: Some(CodecOptions {
            video_google_start_bitrate: Some(start_kbps),
            ..Default::default()
        }),
        degradation: Some(DegradationPreference::MaintainFramerate),
    }
}

/// Richtlinie fuer das Bildschirm-Audio
pub fn bildschirm_audio(
    settings: &DeviceSettings,
    cfg: &BildschirmEinstellungen,
) -> ProduceRichtlinie {
    let kbps = settings
        .screen_audio_bitrate
        .unwrap_or(cfg.standard_audio_bitrate_kbps);

    ProduceRichtlinie {
        codec: None,
        encodings: vec![RtpEncoding {
            max_bitrate: Some(kbps.saturating_mul(1000)),
            dtx: Some(false),
            ..Default::default()
        }],
        codec_options: Some(CodecOptions {
            opus_stereo: Some(true),
            opus_fec: Some(true),
            opus_dtx: Some(false),
            opus_max_playback_rate: Some(48000),
            video_google_start_bitrate: None,
        }),
        degradation: None,
    }
}
