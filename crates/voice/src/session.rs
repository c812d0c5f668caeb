//! Session-Steuerung: Beitritt, Aufraeumen, Anrufsteuerung
//!
//! ## Zustandsmaschine
//! ```text
//! Disconnected --init--> Connecting --ok--> Connected
//!                             |
//!                             +---fehler--> Failed
//! jeder Zustand --cleanup--> Disconnected
//! ```
//!
//! `init` und `cleanup` laufen unter einer gemeinsamen Lebenszyklus-Sperre.
//! Jeder Aufruf erhoeht zuerst die Generation; ein laufendes `init` prueft
//! die Generation nach jedem asynchronen Schritt und bricht mit
//! `VoiceError::Abgebrochen` ab, sobald ein neuerer Aufruf wartet. Was bis
//! dahin entstanden ist, wird vor der Freigabe der Sperre abgebaut.
//!
//! Mute veraendert nur den Gain im Audio-Graphen und wartet nie auf
//! Producer-Operationen.

use parking_lot::{Mutex, RwLock};
use pulse_audio::AudioGraphMixer;
use pulse_core::{
    ChannelId, ConnectionStatus, MediaStream, MediaTrack, ParticipantId, SfuEvent, StreamKind,
    VoiceEvent,
};
use pulse_observability::SessionMetriken;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capture::{CaptureBackend, DeviceCaptureManager, SystemAudioCapture};
use crate::config::VoiceConfig;
use crate::consumer::ConsumerRegistry;
use crate::encoding::{self, ProduceRichtlinie};
use crate::engine::{MediaEngine, RecvTransport};
use crate::error::{VoiceError, VoiceResult};
use crate::guard::EinzelFlug;
use crate::loopback::{LoopbackHandle, LoopbackQuelle, PeerConnectionFactory, ViewerBridge};
use crate::producer::ProducerRegistry;
use crate::rtp::{MediaKind, RtpCapabilities};
use crate::settings::DeviceSettings;
use crate::signaling::{SignalingClient, VoiceStatePatch};
use crate::sound::SoundLibrary;
use crate::stats::{StatsMonitor, VerbindungsStatistik};
use crate::transport::TransportManager;

/// Kapazitaet des UI-Ereigniskanals
const EREIGNIS_KAPAZITAET: usize = 256;

/// Eigener Voice-Zustand (ueberlebt einzelne Sessions)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnVoiceState {
    pub mic_muted: bool,
    pub sound_muted: bool,
    pub webcam_enabled: bool,
    pub sharing_screen: bool,
}

/// Dienste fuer das Vollbild-Fenster
#[derive(Clone)]
pub struct LoopbackDienste {
    pub factory: Arc<dyn PeerConnectionFactory>,
    pub bridge: Arc<dyn ViewerBridge>,
}

/// Externe Kollaborateure der Session
#[derive(Clone)]
pub struct SessionDienste {
    pub signaling: Arc<dyn SignalingClient>,
    pub engine: Arc<dyn MediaEngine>,
    pub capture: Arc<dyn CaptureBackend>,
    pub system_audio: Option<Arc<dyn SystemAudioCapture>>,
    pub sounds: Arc<dyn SoundLibrary>,
    pub loopback: Option<LoopbackDienste>,
}

// ---------------------------------------------------------------------------
// Kontext (von Hintergrund-Tasks geteilt)
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Kontext {
    signaling: Arc<dyn SignalingClient>,
    eigener_zustand: Arc<watch::Sender<OwnVoiceState>>,
    settings: Arc<RwLock<DeviceSettings>>,
}

impl Kontext {
    fn zustand(&self) -> OwnVoiceState {
        *self.eigener_zustand.borrow()
    }

    fn zustand_aendern(&self, f: impl FnOnce(&mut OwnVoiceState)) -> OwnVoiceState {
        self.eigener_zustand.send_if_modified(|z| {
            let vorher = *z;
            f(z);
            *z != vorher
        });
        self.zustand()
    }

    /// Meldet den eigenen Zustand an den Server; Fehler werden protokolliert
    async fn melden(&self, patch: VoiceStatePatch) {
        if let Err(e) = self.signaling.update_voice_state(patch).await {
            warn!("Voice-Zustand nicht gemeldet: {}", e);
        }
    }
}

// ---------------------------------------------------------------------------
// VoiceSession
// ---------------------------------------------------------------------------

/// Alle Ressourcen eines beigetretenen Kanals
struct VoiceSession {
    channel_id: ChannelId,
    router_capabilities: RtpCapabilities,
    /// Capabilities des geladenen Geraets (Schnittmenge mit dem Router)
    geraete_capabilities: RwLock<RtpCapabilities>,
    mixer: Arc<AudioGraphMixer>,
    capture: Arc<DeviceCaptureManager>,
    transports: Arc<TransportManager>,
    producers: Arc<ProducerRegistry>,
    consumers: Arc<ConsumerRegistry>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Laufendes Relay mit fortlaufender Nummer
    loopback: Mutex<Option<(u64, LoopbackHandle)>>,
    loopback_nr: AtomicU64,
    system_audio_aktiv: AtomicBool,
}

impl VoiceSession {
    fn neu(
        channel_id: ChannelId,
        router_capabilities: RtpCapabilities,
        dienste: &SessionDienste,
        config: &VoiceConfig,
        ereignisse: &broadcast::Sender<VoiceEvent>,
    ) -> Self {
        let mixer = Arc::new(AudioGraphMixer::neu(config.audio.mixer_config()));
        let capture = Arc::new(DeviceCaptureManager::neu(
            Arc::clone(&dienste.capture),
            dienste.system_audio.clone(),
            Arc::clone(&mixer),
            ereignisse.clone(),
        ));
        Self {
            channel_id,
            router_capabilities,
            geraete_capabilities: RwLock::new(RtpCapabilities::default()),
            mixer,
            capture,
            transports: Arc::new(TransportManager::neu(Arc::clone(&dienste.signaling))),
            producers: ProducerRegistry::neu(Arc::clone(&dienste.signaling), ereignisse.clone()),
            consumers: ConsumerRegistry::neu(Arc::clone(&dienste.signaling), ereignisse.clone()),
            tasks: Mutex::new(Vec::new()),
            loopback: Mutex::new(None),
            loopback_nr: AtomicU64::new(0),
            system_audio_aktiv: AtomicBool::new(false),
        }
    }

    fn task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Beendet die Bildschirmfreigabe und stellt das Mikrofon wieder her
    async fn bildschirm_beenden(&self, settings: &DeviceSettings) {
        self.producers.schliessen(StreamKind::Screen).await;
        self.producers.schliessen(StreamKind::ScreenAudio).await;
        self.capture.bildschirm_freigeben().await;

        if self.system_audio_aktiv.swap(false, Ordering::SeqCst) {
            let sr = self.mixer.config().sample_rate;
            let ch = self.mixer.config().channels;
            match self
                .capture
                .mikrofon_erfassen(settings.mikrofon_constraints(sr, ch))
                .await
            {
                Ok(_) => debug!("Mikrofon-Einstellungen nach System-Audio wiederhergestellt"),
                Err(e) if e.ist_abbruch() => {}
                Err(e) => warn!("Mikrofon nach System-Audio nicht wiederhergestellt: {}", e),
            }
        }
    }

    /// Baut alles ab, was existiert. Sicher bei teilweisem Aufbau.
    async fn abbauen(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
        }
        if let Some((_, loopback)) = self.loopback.lock().take() {
            loopback.stoppen();
        }

        self.capture.alles_freigeben().await;
        let producers = self.producers.alle_schliessen().await;
        let consumers = self.consumers.alle_schliessen();
        self.transports.schliessen();
        self.mixer.schliessen();

        info!(
            channel = %self.channel_id,
            producers,
            consumers,
            "Voice-Session abgebaut"
        );
    }
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

/// Oberste Steuerung der Voice-Session
pub struct SessionController {
    dienste: SessionDienste,
    config: VoiceConfig,
    metriken: Option<SessionMetriken>,
    kontext: Kontext,
    lebenszyklus: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    session: RwLock<Option<Arc<VoiceSession>>>,
    status: watch::Sender<ConnectionStatus>,
    ereignisse: broadcast::Sender<VoiceEvent>,
    stats: StatsMonitor,
    bildschirm_flug: EinzelFlug,
    kamera_flug: EinzelFlug,
}

impl SessionController {
    pub fn neu(
        dienste: SessionDienste,
        config: VoiceConfig,
        metriken: Option<SessionMetriken>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (ereignisse, _) = broadcast::channel(EREIGNIS_KAPAZITAET);
        let (eigener_zustand, _) = watch::channel(OwnVoiceState::default());
        let stats = StatsMonitor::neu(&config.statistik, metriken.clone());
        let kontext = Kontext {
            signaling: Arc::clone(&dienste.signaling),
            eigener_zustand: Arc::new(eigener_zustand),
            settings: Arc::new(RwLock::new(DeviceSettings::default())),
        };
        Self {
            dienste,
            config,
            metriken,
            kontext,
            lebenszyklus: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            session: RwLock::new(None),
            status,
            ereignisse,
            stats,
            bildschirm_flug: EinzelFlug::neu(),
            kamera_flug: EinzelFlug::neu(),
        }
    }

    // -- Lebenszyklus ----------------------------------------------------

    /// Holt die Router-Capabilities und tritt dem Kanal bei
    pub async fn beitreten(&self, channel_id: ChannelId) -> VoiceResult<()> {
        let capabilities = self.dienste.signaling.get_capabilities().await?;
        self.init(capabilities, channel_id).await
    }

    /// Tritt dem Kanal bei
    ///
    /// Eine vorhandene Session wird zuerst vollstaendig abgebaut. Bei einem
    /// fatalen Fehler ist der Status `Failed` und alle Ressourcen sind frei.
    pub async fn init(
        &self,
        router_capabilities: RtpCapabilities,
        channel_id: ChannelId,
    ) -> VoiceResult<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _lebenszyklus = self.lebenszyklus.lock().await;
        self.pruefen(generation)?;

        self.cleanup_intern().await;
        self.status_setzen(ConnectionStatus::Connecting);
        info!(channel = %channel_id, "Voice-Beitritt gestartet");

        let session = Arc::new(VoiceSession::neu(
            channel_id,
            router_capabilities,
            &self.dienste,
            &self.config,
            &self.ereignisse,
        ));

        match self.aufbauen(&session, generation).await {
            Ok(()) => {
                *self.session.write() = Some(Arc::clone(&session));
                // Mute-Umschaltungen waehrend des Aufbaus nachziehen
                session.mixer.gain_setzen(gain_fuer(self.kontext.zustand()));
                self.stats.starten(
                    Arc::clone(&session.transports),
                    Arc::clone(&session.producers),
                    Arc::clone(&session.consumers),
                );
                self.status_setzen(ConnectionStatus::Connected);
                info!(channel = %channel_id, "Voice-Session verbunden");
                Ok(())
            }
            Err(e) => {
                session.abbauen().await;
                if e.ist_fatal() {
                    let wiederholbar = e.ist_wiederholbar();
                    warn!(channel = %channel_id, wiederholbar, "Voice-Beitritt fehlgeschlagen: {}", e);
                    self.status_setzen(ConnectionStatus::Failed);
                    let _ = self.ereignisse.send(VoiceEvent::BeitrittFehlgeschlagen {
                        meldung: e.to_string(),
                        wiederholbar,
                    });
                } else {
                    debug!(channel = %channel_id, "Voice-Beitritt abgebrochen: {}", e);
                    self.status_setzen(ConnectionStatus::Disconnected);
                }
                Err(e)
            }
        }
    }

    async fn aufbauen(&self, session: &Arc<VoiceSession>, generation: u64) -> VoiceResult<()> {
        // Vor dem ersten Producer abonnieren, sonst geht ein Track-Ende verloren
        let registry_ereignisse = self.ereignisse.subscribe();

        let device = self
            .dienste
            .engine
            .load(&session.router_capabilities)
            .await?;
        self.pruefen(generation)?;
        if !device.can_produce(MediaKind::Audio) {
            return Err(VoiceError::Aushandlung(
                "Router bietet keinen nutzbaren Audio-Codec".into(),
            ));
        }

        let senden = session
            .transports
            .sende_transport_erstellen(device.as_ref())
            .await?;
        self.pruefen(generation)?;
        let empfangen = session
            .transports
            .empfangs_transport_erstellen(device.as_ref())
            .await?;
        self.pruefen(generation)?;

        let sfu_ereignisse = self.dienste.signaling.subscribe();
        let lokale_caps = device.rtp_capabilities();
        *session.geraete_capabilities.write() = lokale_caps.clone();
        let bestehende = self.dienste.signaling.get_existing_producers().await?;
        self.pruefen(generation)?;
        let anzahl = bestehende.len();
        let konsumiert = session
            .consumers
            .bestehende_konsumieren(&empfangen, &lokale_caps, bestehende)
            .await;
        debug!(bestehende = anzahl, konsumiert, "Backfill abgeschlossen");
        self.pruefen(generation)?;

        session.consumers.ton_stummschalten(self.kontext.zustand().sound_muted);
        session.task(sfu_pumpe_starten(
            sfu_ereignisse,
            Arc::clone(&session.consumers),
            Arc::clone(&empfangen),
            lokale_caps,
        ));
        session.task(registry_pumpe_starten(
            registry_ereignisse,
            Arc::downgrade(session),
            self.kontext.clone(),
        ));

        let ziel = session
            .mixer
            .graph_sicherstellen(gain_fuer(self.kontext.zustand()))?;
        session.task(session.mixer.starten());

        let settings = self.kontext.settings.read().clone();
        let sr = self.config.audio.sample_rate;
        let ch = self.config.audio.kanaele;
        session
            .capture
            .mikrofon_erfassen(settings.mikrofon_constraints(sr, ch))
            .await?;
        self.pruefen(generation)?;

        session
            .producers
            .produzieren(StreamKind::Audio, ziel, &senden, ProduceRichtlinie::standard())
            .await?;
        self.pruefen(generation)
    }

    fn pruefen(&self, generation: u64) -> VoiceResult<()> {
        if self.generation.load(Ordering::SeqCst) == generation {
            Ok(())
        } else {
            Err(VoiceError::Abgebrochen)
        }
    }

    /// Baut die Session ab. Idempotent, aus jedem Zustand aufrufbar.
    ///
    /// Ein laufendes `init` wird abgebrochen und raeumt selbst auf.
    pub async fn cleanup(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let _lebenszyklus = self.lebenszyklus.lock().await;
        self.cleanup_intern().await;
        self.status_setzen(ConnectionStatus::Disconnected);
    }

    async fn cleanup_intern(&self) {
        self.stats.stoppen();
        self.stats.zuruecksetzen();

        let session = self.session.write().take();
        if let Some(session) = session {
            session.abbauen().await;
        }

        self.kontext.zustand_aendern(|z| {
            z.webcam_enabled = false;
            z.sharing_screen = false;
        });
    }

    fn status_setzen(&self, status: ConnectionStatus) {
        let geaendert = self.status.send_if_modified(|s| {
            let anders = *s != status;
            *s = status;
            anders
        });
        if let Some(m) = &self.metriken {
            m.session_status.set(i64::from(status.als_zahl()));
        }
        if geaendert {
            debug!(status = ?status, "Verbindungsstatus geaendert");
            let _ = self.ereignisse.send(VoiceEvent::StatusGeaendert(status));
        }
    }

    fn aktive_session(&self) -> VoiceResult<Arc<VoiceSession>> {
        self.session.read().clone().ok_or(VoiceError::NichtVerbunden)
    }

    // -- Anrufsteuerung --------------------------------------------------

    /// Schaltet das Mikrofon stumm/laut; gibt den neuen Mute-Zustand zurueck
    ///
    /// Funktioniert auch vor dem Beitritt (wirkt dann als Anfangs-Gain).
    pub async fn toggle_mic(&self) -> bool {
        let zustand = self.kontext.zustand_aendern(|z| z.mic_muted = !z.mic_muted);
        let session = self.session.read().clone();
        if let Some(session) = session {
            session.mixer.gain_setzen(gain_fuer(zustand));
        }
        debug!(stumm = zustand.mic_muted, "Mikrofon umgeschaltet");
        self.kontext
            .melden(VoiceStatePatch {
                mic_muted: Some(zustand.mic_muted),
                ..Default::default()
            })
            .await;
        zustand.mic_muted
    }

    /// Schaltet den eingehenden Ton ab/an (Deafen); gibt den neuen Zustand zurueck
    pub async fn toggle_sound(&self) -> bool {
        let zustand = self.kontext.zustand_aendern(|z| z.sound_muted = !z.sound_muted);
        let session = self.session.read().clone();
        if let Some(session) = session {
            session.consumers.ton_stummschalten(zustand.sound_muted);
        }
        self.kontext
            .melden(VoiceStatePatch {
                sound_muted: Some(zustand.sound_muted),
                ..Default::default()
            })
            .await;
        zustand.sound_muted
    }

    /// Schaltet die Webcam um; gibt den neuen Zustand zurueck
    ///
    /// Ein Umschalten waehrend eines laufenden Umschaltens wird ignoriert.
    pub async fn toggle_camera(&self) -> VoiceResult<bool> {
        match self.kamera_flug.ausfuehren(|| self.kamera_umschalten()).await {
            Some(ergebnis) => ergebnis,
            None => {
                debug!("Webcam wird bereits umgeschaltet");
                Ok(self.kontext.zustand().webcam_enabled)
            }
        }
    }

    async fn kamera_umschalten(&self) -> VoiceResult<bool> {
        let session = self.aktive_session()?;
        let an = !self.kontext.zustand().webcam_enabled;

        if an {
            let settings = self.kontext.settings.read().clone();
            if let Err(e) = self.kamera_produzieren(&session, &settings).await {
                warn!("Webcam nicht gestartet: {}", e);
                return Err(e);
            }
        } else {
            session.producers.schliessen(StreamKind::Video).await;
            session.capture.kamera_freigeben();
        }

        self.kontext.zustand_aendern(|z| z.webcam_enabled = an);
        info!(an, "Webcam umgeschaltet");
        self.kontext
            .melden(VoiceStatePatch {
                webcam_enabled: Some(an),
                ..Default::default()
            })
            .await;
        Ok(an)
    }

    /// Erfasst die Kamera und erstellt den Producer bzw. ersetzt dessen Track
    async fn kamera_produzieren(
        &self,
        session: &Arc<VoiceSession>,
        settings: &DeviceSettings,
    ) -> VoiceResult<MediaTrack> {
        let senden = session
            .transports
            .sende_transport()
            .ok_or(VoiceError::NichtVerbunden)?;
        let producers = Arc::clone(&session.producers);
        session
            .capture
            .kamera_erfassen(settings.webcam_constraints(), move |track| async move {
                producers
                    .produzieren(StreamKind::Video, track, &senden, ProduceRichtlinie::standard())
                    .await
                    .map(|_| ())
            })
            .await
    }

    /// Startet/beendet die Bildschirmfreigabe; gibt den neuen Zustand zurueck
    pub async fn toggle_screen_share(&self) -> VoiceResult<bool> {
        match self
            .bildschirm_flug
            .ausfuehren(|| self.bildschirm_umschalten())
            .await
        {
            Some(ergebnis) => ergebnis,
            None => {
                debug!("Bildschirmfreigabe wird bereits umgeschaltet");
                Ok(self.kontext.zustand().sharing_screen)
            }
        }
    }

    async fn bildschirm_umschalten(&self) -> VoiceResult<bool> {
        let session = self.aktive_session()?;
        let an = !self.kontext.zustand().sharing_screen;
        let settings = self.kontext.settings.read().clone();

        if an {
            self.bildschirm_starten(&session, &settings).await?;
        } else {
            session.bildschirm_beenden(&settings).await;
        }

        self.kontext.zustand_aendern(|z| z.sharing_screen = an);
        info!(an, "Bildschirmfreigabe umgeschaltet");
        self.kontext
            .melden(VoiceStatePatch {
                sharing_screen: Some(an),
                ..Default::default()
            })
            .await;
        Ok(an)
    }

    async fn bildschirm_starten(
        &self,
        session: &Arc<VoiceSession>,
        settings: &DeviceSettings,
    ) -> VoiceResult<()> {
        let senden = session
            .transports
            .sende_transport()
            .ok_or(VoiceError::NichtVerbunden)?;
        let erfassung = session.capture.bildschirm_erfassen(settings).await?;

        let geraete_caps = session.geraete_capabilities.read().clone();
        let video_richtlinie =
            encoding::bildschirm_video(settings, &self.config.bildschirm, &geraete_caps);
        if let Err(e) = session
            .producers
            .produzieren(StreamKind::Screen, erfassung.video.clone(), &senden, video_richtlinie)
            .await
        {
            warn!("Bildschirm-Producer nicht erstellt: {}", e);
            session.capture.bildschirm_freigeben().await;
            return Err(e);
        }

        if let Some(audio) = erfassung.audio {
            let audio_richtlinie = encoding::bildschirm_audio(settings, &self.config.bildschirm);
            if let Err(e) = session
                .producers
                .produzieren(StreamKind::ScreenAudio, audio, &senden, audio_richtlinie)
                .await
            {
                warn!("Bildschirm-Audio wird nicht gesendet: {}", e);
            }
        }

        if let Some(route) = erfassung.route {
            session.system_audio_aktiv.store(true, Ordering::SeqCst);
            if let Err(e) = session
                .capture
                .mikrofon_fuer_systemaudio(settings, &route)
                .await
            {
                warn!("Mikrofon fuer System-Audio nicht umgestellt: {}", e);
            }
        }
        Ok(())
    }

    /// Spielt eine Soundpad-Datei in den ausgehenden Audio-Track
    pub async fn play_transient(&self, file_id: &str) -> VoiceResult<()> {
        let session = self.aktive_session()?;
        let daten = self.dienste.sounds.fetch(file_id).await?;
        let id = session.mixer.transient_abspielen(daten)?;
        if let Some(m) = &self.metriken {
            m.transients_total.inc();
        }
        debug!(datei = file_id, transient = id.0, "Transient gestartet");
        Ok(())
    }

    /// Uebernimmt neue Geraete-Einstellungen
    ///
    /// Waehrend eines Anrufs wird das betroffene Geraet neu erfasst und im
    /// Audio-Graphen bzw. im bestehenden Video-Producer getauscht, ohne
    /// Producer neu zu erstellen. Ein durch einen neueren Wechsel verworfener
    /// Wechsel ist kein Fehler.
    pub async fn apply_device_settings(&self, neu: DeviceSettings) -> VoiceResult<()> {
        let alt = std::mem::replace(&mut *self.kontext.settings.write(), neu.clone());
        let Ok(session) = self.aktive_session() else {
            return Ok(());
        };

        if alt.mikrofon_geaendert(&neu) && !session.system_audio_aktiv.load(Ordering::SeqCst) {
            let sr = self.config.audio.sample_rate;
            let ch = self.config.audio.kanaele;
            match session
                .capture
                .mikrofon_erfassen(neu.mikrofon_constraints(sr, ch))
                .await
            {
                Ok(track) => {
                    info!(track = %track.id(), "Mikrofon gewechselt");
                    self.hot_swap_zaehlen("audio");
                }
                Err(e) if e.ist_abbruch() => {}
                Err(e) => return Err(e),
            }
        }

        if alt.webcam_geaendert(&neu) && self.kontext.zustand().webcam_enabled {
            match self.kamera_produzieren(&session, &neu).await {
                Ok(track) => {
                    info!(track = %track.id(), "Webcam gewechselt");
                    self.hot_swap_zaehlen("video");
                }
                Err(e) if e.ist_abbruch() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn hot_swap_zaehlen(&self, kind: &str) {
        if let Some(m) = &self.metriken {
            m.hot_swaps_total.with_label_values(&[kind]).inc();
        }
    }

    // -- Loopback --------------------------------------------------------

    /// Oeffnet das Vollbild-Fenster fuer eine Bildschirmfreigabe
    ///
    /// `None` spiegelt die eigene Freigabe, sonst die des Teilnehmers.
    pub fn loopback_oeffnen(&self, teilnehmer: Option<ParticipantId>) -> VoiceResult<()> {
        let session = self.aktive_session()?;
        let dienste = self
            .dienste
            .loopback
            .clone()
            .ok_or_else(|| VoiceError::Loopback("Kein Vollbild-Fenster verfuegbar".into()))?;

        let stream = match teilnehmer {
            None => session.capture.lokaler_bildschirm(),
            Some(p) => session
                .consumers
                .track(p, StreamKind::Screen)
                .map(|t| MediaStream::neu(vec![t])),
        }
        .ok_or_else(|| VoiceError::Loopback("Kein Bildschirm-Stream vorhanden".into()))?;

        let quelle = LoopbackQuelle::neu(
            dienste.factory,
            dienste.bridge,
            self.config.loopback.max_bitrate_bps,
            self.ereignisse.clone(),
        );
        let handle = quelle.starten(session.channel_id, stream);
        let ende = handle.abgeschlossen();
        let nr = session.loopback_nr.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((_, alt)) = session.loopback.lock().replace((nr, handle)) {
            alt.stoppen();
        }

        // Ein von selbst beendetes Relay freigeben, ein neueres bleibt
        let weak = Arc::downgrade(&session);
        session.task(tokio::spawn(async move {
            ende.await;
            let Some(session) = weak.upgrade() else {
                return;
            };
            let mut slot = session.loopback.lock();
            if slot.as_ref().is_some_and(|(aktuell, _)| *aktuell == nr) {
                *slot = None;
                debug!(relay = nr, "Loopback-Relay beendet");
            }
        }));
        Ok(())
    }

    pub fn loopback_schliessen(&self) -> bool {
        let Ok(session) = self.aktive_session() else {
            return false;
        };
        let handle = session.loopback.lock().take();
        match handle {
            Some((_, handle)) => {
                handle.stoppen();
                true
            }
            None => false,
        }
    }

    pub fn loopback_aktiv(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .is_some_and(|s| s.loopback.lock().is_some())
    }

    // -- Beobachtbarer Zustand -------------------------------------------

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn status_beobachten(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn eigener_zustand(&self) -> OwnVoiceState {
        self.kontext.zustand()
    }

    pub fn eigener_zustand_beobachten(&self) -> watch::Receiver<OwnVoiceState> {
        self.kontext.eigener_zustand.subscribe()
    }

    pub fn einstellungen(&self) -> DeviceSettings {
        self.kontext.settings.read().clone()
    }

    pub fn stats(&self) -> VerbindungsStatistik {
        self.stats.aktuell()
    }

    pub fn stats_beobachten(&self) -> watch::Receiver<VerbindungsStatistik> {
        self.stats.beobachten()
    }

    pub fn ereignisse(&self) -> broadcast::Receiver<VoiceEvent> {
        self.ereignisse.subscribe()
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.session.read().as_ref().map(|s| s.channel_id)
    }

    /// Track des Audio-Producers (Ausgang des Audio-Graphen)
    pub async fn ausgehender_audio_track(&self) -> Option<MediaTrack> {
        let session = self.session.read().clone()?;
        session.producers.track(StreamKind::Audio).await
    }

    pub fn mixer(&self) -> Option<Arc<AudioGraphMixer>> {
        self.session.read().as_ref().map(|s| Arc::clone(&s.mixer))
    }

    pub fn streams_von(&self, teilnehmer: ParticipantId) -> Vec<(StreamKind, MediaTrack)> {
        self.session
            .read()
            .as_ref()
            .map(|s| s.consumers.fuer_teilnehmer(teilnehmer))
            .unwrap_or_default()
    }

    pub fn teilnehmer_mit(&self, kind: StreamKind) -> Vec<ParticipantId> {
        self.session
            .read()
            .as_ref()
            .map(|s| s.consumers.teilnehmer_mit(kind))
            .unwrap_or_default()
    }

    pub async fn producer_anzahl(&self) -> usize {
        let session = self.session.read().clone();
        match session {
            Some(s) => s.producers.anzahl().await,
            None => 0,
        }
    }

    pub fn consumer_anzahl(&self) -> usize {
        self.session
            .read()
            .as_ref()
            .map_or(0, |s| s.consumers.anzahl())
    }

    pub fn transport_anzahl(&self) -> usize {
        self.session
            .read()
            .as_ref()
            .map_or(0, |s| s.transports.anzahl_offen())
    }

    /// Ausgabegeraet fuer entfernte Audio-Streams (nur mit System-Audio-Helfer)
    pub fn real_output_sink(&self) -> Option<String> {
        self.session
            .read()
            .as_ref()
            .and_then(|s| s.capture.real_output_sink())
    }
}

fn gain_fuer(zustand: OwnVoiceState) -> f32 {
    if zustand.mic_muted {
        0.0
    } else {
        1.0
    }
}

// ---------------------------------------------------------------------------
// Hintergrund-Tasks
// ---------------------------------------------------------------------------

/// Verarbeitet Push-Ereignisse der SFU
fn sfu_pumpe_starten(
    mut rx: mpsc::Receiver<SfuEvent>,
    consumers: Arc<ConsumerRegistry>,
    empfangen: Arc<dyn RecvTransport>,
    lokale_caps: RtpCapabilities,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(ereignis) = rx.recv().await {
            match ereignis {
                SfuEvent::NewProducer {
                    participant_id,
                    kind,
                    producer_id,
                } => {
                    if let Err(e) = consumers
                        .konsumieren(&empfangen, &lokale_caps, participant_id, kind, &producer_id)
                        .await
                    {
                        warn!(
                            participant = %participant_id,
                            kind = %kind,
                            "Neuer Producer nicht konsumiert: {}", e
                        );
                    }
                }
                SfuEvent::ProducerClosed {
                    participant_id,
                    kind,
                } => {
                    consumers.entfernen(participant_id, kind);
                }
                SfuEvent::ParticipantLeft { participant_id } => {
                    let anzahl = consumers.teilnehmer_entfernen(participant_id);
                    debug!(participant = %participant_id, anzahl, "Teilnehmer hat den Kanal verlassen");
                }
            }
        }
        debug!("SFU-Ereigniskanal geschlossen");
    })
}

/// Reagiert auf Producer, deren Track extern endete
fn registry_pumpe_starten(
    mut rx: broadcast::Receiver<VoiceEvent>,
    session: Weak<VoiceSession>,
    kontext: Kontext,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let kind = match rx.recv().await {
                Ok(VoiceEvent::ProducerBeendet { kind }) => kind,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(verpasst = n, "Registry-Ereignisse uebergelaufen");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Some(session) = session.upgrade() else {
                break;
            };

            match kind {
                StreamKind::Screen => {
                    let settings = kontext.settings.read().clone();
                    session.bildschirm_beenden(&settings).await;
                    kontext.zustand_aendern(|z| z.sharing_screen = false);
                    kontext
                        .melden(VoiceStatePatch {
                            sharing_screen: Some(false),
                            ..Default::default()
                        })
                        .await;
                }
                StreamKind::Video => {
                    session.capture.kamera_freigeben();
                    kontext.zustand_aendern(|z| z.webcam_enabled = false);
                    kontext
                        .melden(VoiceStatePatch {
                            webcam_enabled: Some(false),
                            ..Default::default()
                        })
                        .await;
                }
                StreamKind::Audio | StreamKind::ScreenAudio => {
                    debug!(kind = %kind, "Producer extern beendet");
                }
            }
        }
    })
}
