//! AudioGraphMixer – Persistenter Audio-Graph der Session
//!
//! Mischt Mikrofon und Soundpad-Transienten in einen einzigen Ausgangs-Track.
//! Der Ausgangs-Track (Ziel) ist der einzige Track, den der Audio-Producer je
//! sieht. Seine Identitaet bleibt fuer die Lebensdauer des Graphen gleich;
//! Mute, Geraetewechsel und Soundeffekte aendern nur Verbindungen und Gain.
//!
//! ```text
//!  Mikrofon-Track ──> [Quelle] ──> [Gain] ──┐
//!                                           ├──> [Ziel] ──> Ausgangs-Track
//!  Soundpad-Puffer ──> [Transient] ─────────┘
//! ```
//!
//! Gerendert wird in Quanten fester Groesse (Standard 960 Frames = 20ms bei
//! 48kHz). `starten()` treibt das Rendern ueber einen tokio-Task, Tests rufen
//! `rendern()` direkt auf.

use bytes::Bytes;
use parking_lot::Mutex;
use pulse_core::{AudioFeed, MediaTrack, TrackKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::decoder::dekodieren;
use crate::error::{AudioError, AudioResult};

/// Konfiguration des Audio-Graphen
#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// Abtastrate in Hz
    pub sample_rate: u32,
    /// Kanalanzahl (interleaved)
    pub channels: u16,
    /// Frames pro Render-Quantum
    pub quantum_frames: usize,
    /// Kapazitaet des Ausgangs-Feeds in Samples
    pub ring_kapazitaet: usize,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            quantum_frames: 960,
            ring_kapazitaet: 48000 * 2,
        }
    }
}

impl MixerConfig {
    fn quantum_samples(&self) -> usize {
        self.quantum_frames * self.channels as usize
    }
}

/// Kennung einer Transient-Wiedergabe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransientId(pub u64);

// ---------------------------------------------------------------------------
// Knoten
// ---------------------------------------------------------------------------

struct GainKnoten {
    wert: f32,
    /// Audio-Uhr (Frames) zum Zeitpunkt der letzten Aenderung
    geaendert_bei: u64,
}

struct TransientKnoten {
    id: TransientId,
    samples: Arc<Vec<f32>>,
    position: usize,
}

struct Graph {
    ziel: MediaTrack,
    gain: GainKnoten,
    mikrofon: Option<MediaTrack>,
    transient: Option<TransientKnoten>,
    /// Gerenderte Frames seit Erstellung
    uhr: u64,
}

enum GraphZustand {
    Leer,
    Aktiv(Graph),
    Geschlossen,
}

// ---------------------------------------------------------------------------
// AudioGraphMixer
// ---------------------------------------------------------------------------

/// Persistenter Audio-Graph einer Voice-Session
pub struct AudioGraphMixer {
    config: MixerConfig,
    zustand: Mutex<GraphZustand>,
    naechste_transient_id: Mutex<u64>,
}

impl AudioGraphMixer {
    pub fn neu(config: MixerConfig) -> Self {
        Self {
            config,
            zustand: Mutex::new(GraphZustand::Leer),
            naechste_transient_id: Mutex::new(0),
        }
    }

    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    /// Legt Graph, Gain und Ziel einmalig an und gibt den Ausgangs-Track zurueck
    ///
    /// Idempotent: weitere Aufrufe liefern denselben Track, `anfangs_gain`
    /// wirkt nur beim ersten Aufruf.
    pub fn graph_sicherstellen(&self, anfangs_gain: f32) -> AudioResult<MediaTrack> {
        let mut zustand = self.zustand.lock();
        match &*zustand {
            GraphZustand::Aktiv(graph) => Ok(graph.ziel.clone()),
            GraphZustand::Geschlossen => Err(AudioError::GraphGeschlossen),
            GraphZustand::Leer => {
                let ziel = MediaTrack::neu_audio(
                    "pulse-mix",
                    None,
                    AudioFeed::neu(self.config.ring_kapazitaet),
                );
                info!(
                    track = %ziel.id(),
                    gain = anfangs_gain,
                    "Audio-Graph erstellt: {}Hz {}ch",
                    self.config.sample_rate,
                    self.config.channels
                );
                *zustand = GraphZustand::Aktiv(Graph {
                    ziel: ziel.clone(),
                    gain: GainKnoten {
                        wert: anfangs_gain.clamp(0.0, 1.0),
                        geaendert_bei: 0,
                    },
                    mikrofon: None,
                    transient: None,
                    uhr: 0,
                });
                Ok(ziel)
            }
        }
    }

    /// Ausgangs-Track, falls der Graph existiert
    pub fn ziel_track(&self) -> Option<MediaTrack> {
        match &*self.zustand.lock() {
            GraphZustand::Aktiv(graph) => Some(graph.ziel.clone()),
            _ => None,
        }
    }

    /// Verbindet eine neue Mikrofon-Quelle mit dem Gain-Knoten
    ///
    /// Eine vorherige Quelle wird vorher getrennt. Gain und Ziel bleiben
    /// unangetastet.
    pub fn mikrofon_setzen(&self, track: &MediaTrack) -> AudioResult<()> {
        if track.kind() != TrackKind::Audio || track.audio_feed().is_none() {
            return Err(AudioError::KeinAudioTrack(track.label().to_string()));
        }
        let mut zustand = self.zustand.lock();
        let graph = aktiver_graph(&mut zustand)?;

        if let Some(alt) = graph.mikrofon.replace(track.clone()) {
            debug!(alt = %alt.id(), neu = %track.id(), "Mikrofon-Quelle getauscht");
        } else {
            debug!(track = %track.id(), "Mikrofon-Quelle verbunden");
        }
        Ok(())
    }

    /// Trennt die Mikrofon-Quelle (Ziel bleibt bestehen)
    pub fn mikrofon_trennen(&self) -> Option<MediaTrack> {
        let mut zustand = self.zustand.lock();
        match &mut *zustand {
            GraphZustand::Aktiv(graph) => graph.mikrofon.take(),
            _ => None,
        }
    }

    /// Aktuell verbundene Mikrofon-Quelle
    pub fn mikrofon(&self) -> Option<MediaTrack> {
        match &*self.zustand.lock() {
            GraphZustand::Aktiv(graph) => graph.mikrofon.clone(),
            _ => None,
        }
    }

    /// Setzt den Gain zur aktuellen Audio-Uhrzeit (Mute-Mechanismus)
    ///
    /// Beruehrt weder Capture-Stream noch Producer. Ohne Graph ein No-Op.
    pub fn gain_setzen(&self, wert: f32) {
        let mut zustand = self.zustand.lock();
        if let GraphZustand::Aktiv(graph) = &mut *zustand {
            graph.gain.wert = wert.clamp(0.0, 1.0);
            graph.gain.geaendert_bei = graph.uhr;
            trace!(gain = graph.gain.wert, uhr = graph.uhr, "Gain gesetzt");
        }
    }

    /// Aktueller Gain-Wert
    pub fn gain(&self) -> Option<f32> {
        match &*self.zustand.lock() {
            GraphZustand::Aktiv(graph) => Some(graph.gain.wert),
            _ => None,
        }
    }

    /// Audio-Uhr (Frames) der letzten Gain-Aenderung
    pub fn gain_geaendert_bei(&self) -> Option<u64> {
        match &*self.zustand.lock() {
            GraphZustand::Aktiv(graph) => Some(graph.gain.geaendert_bei),
            _ => None,
        }
    }

    /// Aktuelle Audio-Uhrzeit
    pub fn uhrzeit(&self) -> Duration {
        let frames = match &*self.zustand.lock() {
            GraphZustand::Aktiv(graph) => graph.uhr,
            _ => 0,
        };
        Duration::from_secs_f64(frames as f64 / self.config.sample_rate as f64)
    }

    /// Dekodiert eine Datei und spielt sie einmalig in das Ziel
    pub fn transient_abspielen(&self, daten: Bytes) -> AudioResult<TransientId> {
        if !self.ist_aktiv() {
            return Err(AudioError::GraphNichtInitialisiert);
        }
        let puffer = dekodieren(daten)?;
        let samples = puffer.in_format(self.config.sample_rate, self.config.channels);
        self.samples_abspielen(samples)
    }

    /// Spielt bereits passend formatierte Samples einmalig in das Ziel
    ///
    /// Ein laufender Transient wird vorher gestoppt und getrennt.
    pub fn samples_abspielen(&self, samples: Vec<f32>) -> AudioResult<TransientId> {
        let id = {
            let mut naechste = self.naechste_transient_id.lock();
            *naechste += 1;
            TransientId(*naechste)
        };

        let mut zustand = self.zustand.lock();
        let graph = aktiver_graph(&mut zustand)?;

        if let Some(alt) = graph.transient.take() {
            debug!(id = alt.id.0, "Vorheriger Transient gestoppt");
        }
        graph.transient = Some(TransientKnoten {
            id,
            samples: Arc::new(samples),
            position: 0,
        });
        debug!(id = id.0, "Transient gestartet");
        Ok(id)
    }

    /// Anzahl aktiver Transient-Knoten (0 oder 1)
    pub fn aktive_transienten(&self) -> usize {
        match &*self.zustand.lock() {
            GraphZustand::Aktiv(graph) => usize::from(graph.transient.is_some()),
            _ => 0,
        }
    }

    /// ID des laufenden Transienten
    pub fn aktiver_transient(&self) -> Option<TransientId> {
        match &*self.zustand.lock() {
            GraphZustand::Aktiv(graph) => graph.transient.as_ref().map(|t| t.id),
            _ => None,
        }
    }

    pub fn ist_aktiv(&self) -> bool {
        matches!(&*self.zustand.lock(), GraphZustand::Aktiv(_))
    }

    /// Rendert ein Quantum in den Ausgangs-Track
    ///
    /// Gibt die Anzahl gerenderter Frames zurueck.
    pub fn rendern(&self) -> AudioResult<usize> {
        let n = self.config.quantum_samples();
        let mut puffer = vec![0.0f32; n];

        let mut zustand = self.zustand.lock();
        let graph = aktiver_graph(&mut zustand)?;

        // Quelle -> Gain
        if let Some(mic) = &graph.mikrofon {
            if let Some(feed) = mic.audio_feed() {
                let gelesen = feed.lesen(&mut puffer);
                if mic.ist_beendet() || !mic.ist_aktiviert() {
                    puffer[..gelesen].fill(0.0);
                } else {
                    let gain = graph.gain.wert;
                    for s in &mut puffer[..gelesen] {
                        *s *= gain;
                    }
                }
            }
        }

        // Transient -> Ziel (am Gain vorbei)
        let beendet = match &mut graph.transient {
            Some(t) => {
                let rest = &t.samples[t.position..];
                let anzahl = rest.len().min(n);
                for (out, s) in puffer.iter_mut().zip(&rest[..anzahl]) {
                    *out += *s;
                }
                t.position += anzahl;
                t.position >= t.samples.len()
            }
            None => false,
        };
        if beendet {
            if let Some(t) = graph.transient.take() {
                debug!(id = t.id.0, "Transient beendet, Knoten getrennt");
            }
        }

        for s in puffer.iter_mut() {
            *s = begrenzen(*s);
        }

        if let Some(feed) = graph.ziel.audio_feed() {
            let geschrieben = feed.schreiben(&puffer);
            if geschrieben < n {
                trace!("Ausgangs-Feed voll: {} Samples verworfen", n - geschrieben);
            }
        }

        graph.uhr += self.config.quantum_frames as u64;
        Ok(self.config.quantum_frames)
    }

    /// Dauer eines Render-Quantums
    pub fn quantum_dauer(&self) -> Duration {
        Duration::from_secs_f64(self.config.quantum_frames as f64 / self.config.sample_rate as f64)
    }

    /// Startet den Render-Takt als tokio-Task
    ///
    /// Der Task endet von selbst, sobald der Graph geschlossen wird.
    pub fn starten(self: &Arc<Self>) -> JoinHandle<()> {
        let mixer = Arc::clone(self);
        tokio::spawn(async move {
            let mut takt = tokio::time::interval(mixer.quantum_dauer());
            takt.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                takt.tick().await;
                match mixer.rendern() {
                    Ok(_) | Err(AudioError::GraphNichtInitialisiert) => {}
                    Err(AudioError::GraphGeschlossen) => break,
                    Err(e) => warn!("Render-Fehler: {}", e),
                }
            }
            debug!("Render-Takt beendet");
        })
    }

    /// Trennt alle Knoten und schliesst den Graphen
    ///
    /// Sicher aufrufbar, auch wenn der Graph nie erstellt wurde.
    pub fn schliessen(&self) {
        let mut zustand = self.zustand.lock();
        if let GraphZustand::Aktiv(graph) = std::mem::replace(&mut *zustand, GraphZustand::Geschlossen)
        {
            graph.ziel.stoppen();
            if let Some(feed) = graph.ziel.audio_feed() {
                feed.leeren();
            }
            info!(track = %graph.ziel.id(), "Audio-Graph geschlossen");
        }
    }
}

fn aktiver_graph(zustand: &mut GraphZustand) -> AudioResult<&mut Graph> {
    match zustand {
        GraphZustand::Aktiv(graph) => Ok(graph),
        GraphZustand::Leer => Err(AudioError::GraphNichtInitialisiert),
        GraphZustand::Geschlossen => Err(AudioError::GraphGeschlossen),
    }
}

/// Harte Begrenzung auf [-1, 1]
fn begrenzen(x: f32) -> f32 {
    x.clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::tests::wav_bytes;

    fn mixer() -> AudioGraphMixer {
        AudioGraphMixer::neu(MixerConfig {
            sample_rate: 48000,
            channels: 1,
            quantum_frames: 4,
            ring_kapazitaet: 64,
        })
    }

    fn mikrofon(wert: f32, anzahl: usize) -> MediaTrack {
        let feed = AudioFeed::neu(256);
        feed.schreiben(&vec![wert; anzahl]);
        MediaTrack::neu_audio("mic", Some("default".into()), feed)
    }

    fn ausgabe(track: &MediaTrack) -> Vec<f32> {
        let feed = track.audio_feed().unwrap();
        let mut buf = vec![0.0; feed.verfuegbar()];
        feed.lesen(&mut buf);
        buf
    }

    #[test]
    fn graph_sicherstellen_idempotent() {
        let m = mixer();
        let a = m.graph_sicherstellen(1.0).unwrap();
        let b = m.graph_sicherstellen(0.0).unwrap();
        assert_eq!(a, b, "Ziel-Track muss identisch bleiben");
        assert_eq!(m.gain(), Some(1.0), "Anfangs-Gain wirkt nur beim ersten Aufruf");
    }

    #[test]
    fn stumm_vor_beitritt() {
        let m = mixer();
        let ziel = m.graph_sicherstellen(0.0).unwrap();
        m.mikrofon_setzen(&mikrofon(0.5, 4)).unwrap();
        m.rendern().unwrap();
        assert!(ausgabe(&ziel).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn gain_skaliert_mikrofon() {
        let m = mixer();
        let ziel = m.graph_sicherstellen(1.0).unwrap();
        m.mikrofon_setzen(&mikrofon(0.5, 8)).unwrap();

        m.rendern().unwrap();
        m.gain_setzen(0.0);
        m.rendern().unwrap();

        let out = ausgabe(&ziel);
        assert_eq!(out.len(), 8);
        assert!(out[..4].iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert!(out[4..].iter().all(|&s| s == 0.0));
        assert_eq!(m.gain_geaendert_bei(), Some(4));
    }

    #[test]
    fn mute_aendert_ziel_identitaet_nicht() {
        let m = mixer();
        let ziel = m.graph_sicherstellen(1.0).unwrap();
        for i in 0..10 {
            m.gain_setzen(if i % 2 == 0 { 0.0 } else { 1.0 });
            assert_eq!(m.ziel_track().unwrap(), ziel);
        }
    }

    #[test]
    fn mikrofon_tausch_behaelt_gain_und_ziel() {
        let m = mixer();
        let ziel = m.graph_sicherstellen(0.0).unwrap();
        let alt = mikrofon(0.1, 4);
        let neu = mikrofon(0.2, 4);
        m.mikrofon_setzen(&alt).unwrap();
        m.mikrofon_setzen(&neu).unwrap();

        assert_eq!(m.mikrofon(), Some(neu));
        assert_eq!(m.gain(), Some(0.0));
        assert_eq!(m.ziel_track(), Some(ziel));
    }

    #[test]
    fn mikrofon_ohne_graph_abgelehnt() {
        let m = mixer();
        let err = m.mikrofon_setzen(&mikrofon(0.1, 1)).unwrap_err();
        assert!(matches!(err, AudioError::GraphNichtInitialisiert));
    }

    #[test]
    fn video_track_als_mikrofon_abgelehnt() {
        let m = mixer();
        m.graph_sicherstellen(1.0).unwrap();
        let err = m
            .mikrofon_setzen(&MediaTrack::neu_video("cam", None))
            .unwrap_err();
        assert!(matches!(err, AudioError::KeinAudioTrack(_)));
    }

    #[test]
    fn transient_umgeht_gain() {
        let m = mixer();
        let ziel = m.graph_sicherstellen(0.0).unwrap();
        m.mikrofon_setzen(&mikrofon(0.5, 4)).unwrap();
        m.samples_abspielen(vec![0.25; 4]).unwrap();
        m.rendern().unwrap();
        assert!(ausgabe(&ziel).iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn neuer_transient_stoppt_vorherigen() {
        let m = mixer();
        m.graph_sicherstellen(1.0).unwrap();
        let erster = m.samples_abspielen(vec![0.1; 100]).unwrap();
        let zweiter = m.samples_abspielen(vec![0.2; 100]).unwrap();
        let dritter = m.samples_abspielen(vec![0.3; 100]).unwrap();

        assert_ne!(erster, dritter);
        assert_ne!(zweiter, dritter);
        assert_eq!(m.aktive_transienten(), 1);
        assert_eq!(m.aktiver_transient(), Some(dritter));
    }

    #[test]
    fn transient_trennt_sich_nach_ende() {
        let m = mixer();
        m.graph_sicherstellen(1.0).unwrap();
        m.samples_abspielen(vec![0.1; 6]).unwrap();
        m.rendern().unwrap();
        assert_eq!(m.aktive_transienten(), 1);
        m.rendern().unwrap();
        assert_eq!(m.aktive_transienten(), 0);
    }

    #[test]
    fn transient_aus_wav_datei() {
        let m = mixer();
        m.graph_sicherstellen(1.0).unwrap();
        let id = m
            .transient_abspielen(wav_bytes(48000, 1, &[1000; 16]))
            .unwrap();
        assert_eq!(m.aktiver_transient(), Some(id));
    }

    #[test]
    fn ausgabe_wird_begrenzt() {
        let m = mixer();
        let ziel = m.graph_sicherstellen(1.0).unwrap();
        m.mikrofon_setzen(&mikrofon(0.9, 4)).unwrap();
        m.samples_abspielen(vec![0.9; 4]).unwrap();
        m.rendern().unwrap();
        assert!(ausgabe(&ziel).iter().all(|&s| s <= 1.0));
    }

    #[test]
    fn schliessen_ohne_graph_sicher() {
        let m = mixer();
        m.schliessen();
        m.schliessen();
        assert!(!m.ist_aktiv());
        assert!(matches!(m.rendern(), Err(AudioError::GraphGeschlossen)));
    }

    #[test]
    fn schliessen_stoppt_ziel() {
        let m = mixer();
        let ziel = m.graph_sicherstellen(1.0).unwrap();
        m.samples_abspielen(vec![0.1; 100]).unwrap();
        m.schliessen();
        assert!(ziel.ist_beendet());
        assert_eq!(m.aktive_transienten(), 0);
        assert!(m.graph_sicherstellen(1.0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn render_takt_endet_nach_schliessen() {
        let m = Arc::new(AudioGraphMixer::neu(MixerConfig::default()));
        m.graph_sicherstellen(1.0).unwrap();
        let handle = m.starten();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(m.uhrzeit() >= Duration::from_millis(80));

        m.schliessen();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("Render-Task muss enden")
            .unwrap();
    }
}
