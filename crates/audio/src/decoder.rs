//! Dekodierung von Soundpad-Dateien via symphonia
//!
//! Dateien kommen als Bytes aus der Soundbibliothek und werden vollstaendig
//! in einen interleaved f32-Puffer dekodiert. `in_format` bringt den Puffer
//! danach auf Abtastrate und Kanalzahl des Audio-Graphen.

use bytes::Bytes;
use std::io::{Cursor, ErrorKind};
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, trace};

use crate::error::{AudioError, AudioResult};

/// Vollstaendig dekodierter Audio-Puffer (interleaved)
#[derive(Debug, Clone)]
pub struct DekodierterPuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DekodierterPuffer {
    /// Anzahl Frames (Samples pro Kanal)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Abspieldauer
    pub fn dauer(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Wandelt den Puffer in Zielrate und Zielkanalzahl um
    ///
    /// Kanaele: Mono wird dupliziert, nach Mono wird gemittelt, sonst werden
    /// ueberzaehlige Kanaele verworfen. Rate: lineare Interpolation.
    pub fn in_format(&self, ziel_rate: u32, ziel_kanaele: u16) -> Vec<f32> {
        let kanalgemappt = kanaele_anpassen(&self.samples, self.channels, ziel_kanaele);
        resamplen(&kanalgemappt, ziel_kanaele, self.sample_rate, ziel_rate)
    }
}

/// Dekodiert eine komplette Audio-Datei aus dem Speicher
pub fn dekodieren(daten: Bytes) -> AudioResult<DekodierterPuffer> {
    if daten.is_empty() {
        return Err(AudioError::FormatNichtUnterstuetzt("leere Datei".into()));
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(daten)), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioError::FormatNichtUnterstuetzt(e.to_string()))?;

    let mut format = probed.format;
    let (track_id, mut decoder) = {
        let track = format
            .default_track()
            .ok_or_else(|| AudioError::FormatNichtUnterstuetzt("keine Audio-Spur".into()))?;
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| AudioError::FormatNichtUnterstuetzt(e.to_string()))?;
        (track.id, decoder)
    };

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate = 0u32;
    let mut channels = 0u16;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(AudioError::Dekodierung(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            // Einzelne kaputte Pakete ueberspringen
            Err(SymphoniaError::DecodeError(e)) => {
                trace!("Paket verworfen: {}", e);
                continue;
            }
            Err(SymphoniaError::IoError(_)) => continue,
            Err(e) => return Err(AudioError::Dekodierung(e.to_string())),
        }
    }

    if channels == 0 || sample_rate == 0 {
        return Err(AudioError::Dekodierung("keine dekodierbaren Pakete".into()));
    }

    debug!(
        "Soundpad-Datei dekodiert: {} Samples, {}Hz, {}ch",
        samples.len(),
        sample_rate,
        channels
    );

    Ok(DekodierterPuffer {
        samples,
        sample_rate,
        channels,
    })
}

fn kanaele_anpassen(samples: &[f32], von: u16, nach: u16) -> Vec<f32> {
    if von == nach || von == 0 || nach == 0 {
        return samples.to_vec();
    }
    let von = von as usize;
    let nach = nach as usize;
    let frames = samples.len() / von;
    let mut aus = Vec::with_capacity(frames * nach);

    for frame in samples.chunks_exact(von) {
        if nach == 1 {
            let summe: f32 = frame.iter().sum();
            aus.push(summe / von as f32);
        } else {
            for c in 0..nach {
                aus.push(frame[c.min(von - 1)]);
            }
        }
    }
    aus
}

fn resamplen(samples: &[f32], kanaele: u16, von_rate: u32, nach_rate: u32) -> Vec<f32> {
    if von_rate == nach_rate || von_rate == 0 || nach_rate == 0 || kanaele == 0 {
        return samples.to_vec();
    }
    let ch = kanaele as usize;
    let frames_ein = samples.len() / ch;
    if frames_ein == 0 {
        return Vec::new();
    }
    let frames_aus = (frames_ein as u64 * nach_rate as u64 / von_rate as u64) as usize;
    let verhaeltnis = von_rate as f64 / nach_rate as f64;
    let mut aus = Vec::with_capacity(frames_aus * ch);

    for i in 0..frames_aus {
        let pos = i as f64 * verhaeltnis;
        let idx = (pos.floor() as usize).min(frames_ein - 1);
        let naechster = (idx + 1).min(frames_ein - 1);
        let anteil = (pos - idx as f64) as f32;
        for c in 0..ch {
            let a = samples[idx * ch + c];
            let b = samples[naechster * ch + c];
            aus.push(a + (b - a) * anteil);
        }
    }
    aus
}
