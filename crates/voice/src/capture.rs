//! Geraete-Erfassung: Mikrofon, Kamera, Bildschirm
//!
//! Der `DeviceCaptureManager` fordert Medien ueber ein `CaptureBackend` an
//! (OS-Medien-APIs) und haelt die rohen Erfassungs-Streams. Das Mikrofon
//! geht nie direkt an einen Producer, sondern immer in den Audio-Graphen.
//!
//! Hot-Swaps derselben Geraeteart sind Last-Writer-Wins: ein veraltetes
//! Erfassungsergebnis wird gestoppt und verworfen.

use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_audio::AudioGraphMixer;
use pulse_core::{ContentHint, DisplaySurface, EndeGrund, MediaStream, MediaTrack, VoiceEvent};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{GeraeteQuelle, VoiceError, VoiceResult};
use crate::guard::NeuesteAnfrage;
use crate::settings::DeviceSettings;

// ---------------------------------------------------------------------------
// Constraints und Geraete
// ---------------------------------------------------------------------------

/// Anforderungen an eine Audio-Erfassung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConstraints {
    pub device_id: Option<String>,
    /// Geraet muss exakt passen (kein Fallback auf das Standardgeraet)
    pub exakt: bool,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub sample_rate: u32,
    pub channel_count: u16,
}

/// Anforderungen an eine Video-Erfassung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConstraints {
    pub device_id: Option<String>,
    pub breite: u32,
    pub hoehe: u32,
    pub frame_rate: u32,
}

/// Anforderungen an eine Bildschirmauswahl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayConstraints {
    pub video: VideoConstraints,
    pub audio: Option<AudioConstraints>,
    /// Eigenes Anwendungsfenster nicht zur Auswahl anbieten
    pub eigene_oberflaeche_ausschliessen: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: Option<AudioConstraints>,
    pub video: Option<VideoConstraints>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    AudioInput,
    AudioOutput,
    VideoInput,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: String,
    pub kind: DeviceKind,
    pub label: String,
}

// ---------------------------------------------------------------------------
// Externe Schnittstellen
// ---------------------------------------------------------------------------

/// OS-Medien-APIs
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn get_user_media(&self, constraints: MediaConstraints) -> VoiceResult<MediaStream>;

    async fn get_display_media(&self, constraints: DisplayConstraints) -> VoiceResult<MediaStream>;

    async fn enumerate_devices(&self) -> VoiceResult<Vec<DeviceInfo>>;
}

/// Route des System-Audio-Helfers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemAudioRoute {
    /// Teil des Labels des virtuellen Eingangsgeraets
    pub virtual_input_label: String,
    /// Name des echten Ausgabegeraets (fuer die Wiedergabe entfernter Audio-Streams)
    pub real_output_name: String,
}

/// Opaker nativer Helfer fuer System-Audio-Erfassung
#[async_trait]
pub trait SystemAudioCapture: Send + Sync {
    async fn is_available(&self) -> bool;

    /// Startet den Helfer; `None` wenn keine Umleitung noetig ist
    async fn start(&self) -> VoiceResult<Option<SystemAudioRoute>>;

    async fn stop(&self) -> VoiceResult<()>;
}

/// Ergebnis einer Bildschirmauswahl
#[derive(Debug, Clone)]
pub struct BildschirmErfassung {
    pub video: MediaTrack,
    pub audio: Option<MediaTrack>,
    /// Audio stammt vom System (nicht aus einem Browser-Tab)
    pub system_audio: bool,
    pub route: Option<SystemAudioRoute>,
}

// ---------------------------------------------------------------------------
// DeviceCaptureManager
// ---------------------------------------------------------------------------

pub struct DeviceCaptureManager {
    backend: Arc<dyn CaptureBackend>,
    system_audio: Option<Arc<dyn SystemAudioCapture>>,
    mixer: Arc<AudioGraphMixer>,
    ereignisse: broadcast::Sender<VoiceEvent>,
    sample_rate: u32,
    kanaele: u16,
    mikrofon: Mutex<Option<MediaStream>>,
    kamera: Mutex<Option<MediaStream>>,
    bildschirm: Mutex<Option<MediaStream>>,
    mic_anfrage: NeuesteAnfrage,
    kamera_anfrage: NeuesteAnfrage,
    bildschirm_anfrage: NeuesteAnfrage,
    real_output_sink: Mutex<Option<String>>,
    helfer_aktiv: AtomicBool,
}

impl DeviceCaptureManager {
    pub fn neu(
        backend: Arc<dyn CaptureBackend>,
        system_audio: Option<Arc<dyn SystemAudioCapture>>,
        mixer: Arc<AudioGraphMixer>,
        ereignisse: broadcast::Sender<VoiceEvent>,
    ) -> Self {
        let sample_rate = mixer.config().sample_rate;
        let kanaele = mixer.config().channels;
        Self {
            backend,
            system_audio,
            mixer,
            ereignisse,
            sample_rate,
            kanaele,
            mikrofon: Mutex::new(None),
            kamera: Mutex::new(None),
            bildschirm: Mutex::new(None),
            mic_anfrage: NeuesteAnfrage::neu(),
            kamera_anfrage: NeuesteAnfrage::neu(),
            bildschirm_anfrage: NeuesteAnfrage::neu(),
            real_output_sink: Mutex::new(None),
            helfer_aktiv: AtomicBool::new(false),
        }
    }

    // -- Mikrofon --------------------------------------------------------

    /// Fordert das Mikrofon an und verbindet es mit dem Audio-Graphen
    ///
    /// Gibt den rohen Erfassungs-Track zurueck. Ein vorheriger Mikrofon-Stream
    /// wird erst nach dem Umschalten im Graphen gestoppt.
    pub async fn mikrofon_erfassen(&self, constraints: AudioConstraints) -> VoiceResult<MediaTrack> {
        let token = self.mic_anfrage.beginnen();
        let stream = self
            .backend
            .get_user_media(MediaConstraints {
                audio: Some(constraints),
                video: None,
            })
            .await?;

        let _sperre = self.mic_anfrage.sperren().await;
        if !self.mic_anfrage.ist_aktuell(token) {
            debug!("Veraltete Mikrofon-Erfassung verworfen");
            stream.alle_stoppen();
            return Err(VoiceError::Abgebrochen);
        }

        let Some(track) = stream.audio_track() else {
            stream.alle_stoppen();
            return Err(VoiceError::geraet(
                GeraeteQuelle::Mikrofon,
                "Erfassung lieferte keinen Audio-Track",
            ));
        };
        if let Err(e) = self.mixer.mikrofon_setzen(&track) {
            stream.alle_stoppen();
            return Err(e.into());
        }

        if let Some(alt) = self.mikrofon.lock().replace(stream) {
            alt.alle_stoppen();
        }

        let beobachtet = track.clone();
        let ereignisse = self.ereignisse.clone();
        tokio::spawn(async move {
            if beobachtet.beendet().await == EndeGrund::Extern {
                warn!(track = %beobachtet.id(), "Mikrofon-Erfassung extern beendet");
                let _ = ereignisse.send(VoiceEvent::MikrofonBeendet);
            }
        });

        info!(track = %track.id(), label = track.label(), "Mikrofon erfasst");
        Ok(track)
    }

    /// Mikrofon waehrend einer Bildschirmfreigabe mit System-Audio
    ///
    /// Echo- und Rauschunterdrueckung sowie AGC sind erzwungen, das virtuelle
    /// Eingangsgeraet des Helfers wird nie als Mikrofon gewaehlt.
    pub async fn mikrofon_fuer_systemaudio(
        &self,
        settings: &DeviceSettings,
        route: &SystemAudioRoute,
    ) -> VoiceResult<MediaTrack> {
        let mut constraints = settings.mikrofon_constraints(self.sample_rate, self.kanaele);
        constraints.echo_cancellation = true;
        constraints.noise_suppression = true;
        constraints.auto_gain_control = true;

        let geraete = self.backend.enumerate_devices().await.unwrap_or_else(|e| {
            warn!("Geraeteliste nicht verfuegbar: {}", e);
            Vec::new()
        });
        let eingaenge: Vec<&DeviceInfo> = geraete
            .iter()
            .filter(|g| g.kind == DeviceKind::AudioInput)
            .filter(|g| !g.label.contains(&route.virtual_input_label))
            .collect();

        let bevorzugt = settings
            .microphone_id
            .as_deref()
            .and_then(|id| eingaenge.iter().find(|g| g.device_id == id))
            .or_else(|| eingaenge.first());
        if let Some(geraet) = bevorzugt {
            constraints.device_id = Some(geraet.device_id.clone());
            constraints.exakt = true;
        }

        self.mikrofon_erfassen(constraints).await
    }

    pub fn mikrofon_track(&self) -> Option<MediaTrack> {
        self.mikrofon.lock().as_ref().and_then(|s| s.audio_track())
    }

    /// Trennt das Mikrofon vom Graphen und stoppt die Erfassung
    pub fn mikrofon_freigeben(&self) -> bool {
        self.mic_anfrage.verwerfen_alle();
        self.mixer.mikrofon_trennen();
        match self.mikrofon.lock().take() {
            Some(stream) => {
                stream.alle_stoppen();
                true
            }
            None => false,
        }
    }

    // -- Kamera ----------------------------------------------------------

    /// Fordert die Kamera an und uebergibt den Track an `anwenden`
    ///
    /// `anwenden` laeuft unter der Hot-Swap-Sperre und bevor der alte Stream
    /// gestoppt wird (Producer erstellen oder Track ersetzen). Schlaegt es
    /// fehl, wird der neue Stream gestoppt und der alte bleibt aktiv.
    pub async fn kamera_erfassen<F, Fut>(
        &self,
        constraints: VideoConstraints,
        anwenden: F,
    ) -> VoiceResult<MediaTrack>
    where
        F: FnOnce(MediaTrack) -> Fut + Send,
        Fut: Future<Output = VoiceResult<()>> + Send,
    {
        let token = self.kamera_anfrage.beginnen();
        let stream = self
            .backend
            .get_user_media(MediaConstraints {
                audio: None,
                video: Some(constraints),
            })
            .await?;

        let _sperre = self.kamera_anfrage.sperren().await;
        if !self.kamera_anfrage.ist_aktuell(token) {
            debug!("Veraltete Kamera-Erfassung verworfen");
            stream.alle_stoppen();
            return Err(VoiceError::Abgebrochen);
        }

        let Some(track) = stream.video_track() else {
            stream.alle_stoppen();
            return Err(VoiceError::geraet(
                GeraeteQuelle::Kamera,
                "Erfassung lieferte keinen Video-Track",
            ));
        };

        if let Err(e) = anwenden(track.clone()).await {
            stream.alle_stoppen();
            return Err(e);
        }

        if let Some(alt) = self.kamera.lock().replace(stream) {
            alt.alle_stoppen();
        }
        info!(track = %track.id(), label = track.label(), "Kamera erfasst");
        Ok(track)
    }

    pub fn kamera_track(&self) -> Option<MediaTrack> {
        self.kamera.lock().as_ref().and_then(|s| s.video_track())
    }

    /// Stoppt die Kamera; laufende Erfassungen werden verworfen
    pub fn kamera_freigeben(&self) -> bool {
        self.kamera_anfrage.verwerfen_alle();
        match self.kamera.lock().take() {
            Some(stream) => {
                stream.alle_stoppen();
                debug!("Kamera freigegeben");
                true
            }
            None => false,
        }
    }

    // -- Bildschirm ------------------------------------------------------

    /// Fordert eine Bildschirmauswahl an
    ///
    /// Der Video-Track traegt bei Rueckgabe bereits den Encoder-Hinweis.
    /// Ist System-Audio im Spiel und der Helfer verfuegbar, wird der Audio-Track
    /// der Auswahl durch eine Erfassung des virtuellen Eingangs ersetzt.
    pub async fn bildschirm_erfassen(
        &self,
        settings: &DeviceSettings,
    ) -> VoiceResult<BildschirmErfassung> {
        let constraints = settings.bildschirm_constraints(self.sample_rate, self.kanaele);
        let token = self.bildschirm_anfrage.beginnen();
        let stream = self.backend.get_display_media(constraints).await?;

        let _sperre = self.bildschirm_anfrage.sperren().await;
        if !self.bildschirm_anfrage.ist_aktuell(token) {
            debug!("Veraltete Bildschirmauswahl verworfen");
            stream.alle_stoppen();
            return Err(VoiceError::Abgebrochen);
        }

        let Some(video) = stream.video_track() else {
            stream.alle_stoppen();
            return Err(VoiceError::geraet(
                GeraeteQuelle::Bildschirm,
                "Auswahl lieferte keinen Video-Track",
            ));
        };
        video.set_content_hint(ContentHint::Motion);

        let mut audio = stream.audio_track();
        let system_audio =
            audio.is_some() && video.display_surface() != Some(DisplaySurface::Browser);
        let mut route = None;

        if system_audio {
            if let Some(helfer) = self.system_audio.clone() {
                if helfer.is_available().await {
                    match self.systemaudio_umleiten(helfer.as_ref(), &stream).await {
                        Ok(Some((track, r))) => {
                            audio = Some(track);
                            route = Some(r);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!("System-Audio-Helfer fehlgeschlagen, Freigabe ohne Umleitung: {}", e);
                            self.helfer_stoppen().await;
                        }
                    }
                }
            }
        }

        // Waehrend der Helfer-Umleitung freigegeben
        if !self.bildschirm_anfrage.ist_aktuell(token) {
            debug!("Bildschirmauswahl waehrend der Umleitung freigegeben");
            stream.alle_stoppen();
            self.helfer_stoppen().await;
            return Err(VoiceError::Abgebrochen);
        }

        if let Some(alt) = self.bildschirm.lock().replace(stream) {
            alt.alle_stoppen();
        }

        info!(
            track = %video.id(),
            audio = audio.is_some(),
            system_audio,
            "Bildschirm erfasst"
        );
        Ok(BildschirmErfassung {
            video,
            audio,
            system_audio,
            route,
        })
    }

    async fn systemaudio_umleiten(
        &self,
        helfer: &dyn SystemAudioCapture,
        stream: &MediaStream,
    ) -> VoiceResult<Option<(MediaTrack, SystemAudioRoute)>> {
        let Some(route) = helfer.start().await? else {
            return Ok(None);
        };
        self.helfer_aktiv.store(true, Ordering::SeqCst);

        let geraete = self.backend.enumerate_devices().await?;
        let Some(eingang) = geraete.iter().find(|g| {
            g.kind == DeviceKind::AudioInput && g.label.contains(&route.virtual_input_label)
        }) else {
            warn!(label = %route.virtual_input_label, "Virtuelles Eingangsgeraet nicht gefunden");
            self.helfer_stoppen().await;
            return Ok(None);
        };

        let virtuell = self
            .backend
            .get_user_media(MediaConstraints {
                audio: Some(AudioConstraints {
                    device_id: Some(eingang.device_id.clone()),
                    exakt: true,
                    echo_cancellation: false,
                    noise_suppression: false,
                    auto_gain_control: false,
                    sample_rate: self.sample_rate,
                    channel_count: self.kanaele,
                }),
                video: None,
            })
            .await?;
        let track = virtuell.audio_track().ok_or_else(|| {
            VoiceError::geraet(GeraeteQuelle::SystemAudio, "Virtueller Eingang ohne Audio-Track")
        })?;

        if let Some(auswahl_audio) = stream.audio_track() {
            stream.track_entfernen(&auswahl_audio);
            auswahl_audio.stoppen();
        }
        stream.track_hinzufuegen(track.clone());

        *self.real_output_sink.lock() = geraete
            .iter()
            .find(|g| g.kind == DeviceKind::AudioOutput && g.label.contains(&route.real_output_name))
            .map(|g| g.device_id.clone());

        debug!(geraet = %eingang.device_id, "System-Audio ueber virtuellen Eingang umgeleitet");
        Ok(Some((track, route)))
    }

    async fn helfer_stoppen(&self) {
        if !self.helfer_aktiv.swap(false, Ordering::SeqCst) {
            return;
        }
        *self.real_output_sink.lock() = None;
        if let Some(helfer) = &self.system_audio {
            if let Err(e) = helfer.stop().await {
                warn!("System-Audio-Helfer liess sich nicht stoppen: {}", e);
            }
        }
    }

    /// Lokaler Bildschirm-Stream (fuer das Loopback-Fenster)
    pub fn lokaler_bildschirm(&self) -> Option<MediaStream> {
        self.bildschirm.lock().clone()
    }

    /// Stoppt die Bildschirmfreigabe und den System-Audio-Helfer
    pub async fn bildschirm_freigeben(&self) -> bool {
        self.bildschirm_anfrage.verwerfen_alle();
        let stream = self.bildschirm.lock().take();
        self.helfer_stoppen().await;
        match stream {
            Some(stream) => {
                stream.alle_stoppen();
                debug!("Bildschirm freigegeben");
                true
            }
            None => false,
        }
    }

    /// Ausgabegeraet fuer entfernte Audio-Streams, solange der Helfer umleitet
    pub fn real_output_sink(&self) -> Option<String> {
        self.real_output_sink.lock().clone()
    }

    /// Gibt alle Erfassungen frei (Aufraeumen)
    pub async fn alles_freigeben(&self) {
        self.mikrofon_freigeben();
        self.kamera_freigeben();
        self.bildschirm_freigeben().await;
    }
}
