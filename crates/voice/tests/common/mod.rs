//! Test-Doubles fuer Engine, Signalisierung, Geraete und Loopback

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use pulse_core::{
    AudioFeed, ChannelId, ConsumerId, DisplaySurface, MediaStream, MediaTrack, ParticipantId,
    ProducerId, SfuEvent, StreamKind, TransportId,
};
use pulse_voice::capture::{
    CaptureBackend, DeviceInfo, DeviceKind, DisplayConstraints, MediaConstraints,
    SystemAudioCapture, SystemAudioRoute,
};
use pulse_voice::engine::{
    ConsumerHandle, MediaDevice, MediaEngine, ProduceOptions, ProducerHandle, RecvTransport,
    SendTransport,
};
use pulse_voice::loopback::{
    LoopbackPeer, PeerConnectionFactory, PeerEvent, RelayKanal, RelayMessage, ViewerBridge,
    IceCandidateInit,
};
use pulse_voice::rtp::{
    ConsumerParams, DegradationPreference, DtlsFingerprint, DtlsParameters, DtlsRole,
    IceParameters, MediaKind, RtpCapabilities, RtpCodecCapability, RtpEncoding, RtpParameters,
    TransportDirection, TransportParams, TransportStatistik,
};
use pulse_voice::signaling::{ExistingProducer, SignalingClient, VoiceStatePatch};
use pulse_voice::sound::SoundLibrary;
use pulse_voice::{
    GeraeteQuelle, LoopbackDienste, SessionController, SessionDienste, VoiceConfig, VoiceError,
    VoiceResult,
};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};

static NAECHSTE_ID: AtomicU64 = AtomicU64::new(1);

fn naechste_id() -> u64 {
    NAECHSTE_ID.fetch_add(1, Ordering::SeqCst)
}

pub fn codec(mime: &str, kind: MediaKind, clock_rate: u32) -> RtpCodecCapability {
    RtpCodecCapability {
        kind,
        mime_type: mime.into(),
        preferred_payload_type: None,
        clock_rate,
        channels: if kind == MediaKind::Audio { Some(2) } else { None },
        parameters: BTreeMap::new(),
    }
}

/// Router mit Opus, AV1 und VP8
pub fn router_caps() -> RtpCapabilities {
    RtpCapabilities {
        codecs: vec![
            codec("audio/opus", MediaKind::Audio, 48000),
            codec("video/AV1", MediaKind::Video, 90000),
            codec("video/VP8", MediaKind::Video, 90000),
        ],
        header_extensions: Vec::new(),
    }
}

fn dtls() -> DtlsParameters {
    DtlsParameters {
        role: DtlsRole::Auto,
        fingerprints: vec![DtlsFingerprint {
            algorithm: "sha-256".into(),
            value: "AB:CD".into(),
        }],
    }
}

/// Wartet bis `bedingung` gilt (hoechstens eine Sekunde)
pub async fn warten_bis(mut bedingung: impl FnMut() -> bool) {
    for _ in 0..200 {
        if bedingung() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(bedingung(), "Bedingung nicht rechtzeitig erfuellt");
}

/// Wie `warten_bis`, fuer asynchrone Bedingungen
pub async fn warten_bis_async<F, Fut>(mut bedingung: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if bedingung().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(bedingung().await, "Bedingung nicht rechtzeitig erfuellt");
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct FakeProducer {
    pub id: ProducerId,
    pub kind: StreamKind,
    pub optionen: ProduceOptions,
    pub track: Mutex<MediaTrack>,
    pub ersetzt: AtomicUsize,
    pub degradation: Mutex<Option<DegradationPreference>>,
    pub closed: AtomicBool,
}

#[async_trait]
impl ProducerHandle for FakeProducer {
    fn id(&self) -> ProducerId {
        self.id.clone()
    }

    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn track(&self) -> MediaTrack {
        self.track.lock().clone()
    }

    fn rtp_parameters(&self) -> RtpParameters {
        RtpParameters {
            mid: None,
            codecs: self.optionen.codec.iter().cloned().collect(),
            encodings: self.optionen.encodings.clone(),
        }
    }

    async fn replace_track(&self, track: MediaTrack) -> VoiceResult<()> {
        *self.track.lock() = track;
        self.ersetzt.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_degradation_preference(&self, preference: DegradationPreference) -> VoiceResult<()> {
        *self.degradation.lock() = Some(preference);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct FakeSendTransport {
    pub id: TransportId,
    pub closed: AtomicBool,
    pub producers: Mutex<Vec<Arc<FakeProducer>>>,
    pub bytes_sent: AtomicU64,
    pub produce_fehler: Mutex<Option<StreamKind>>,
}

impl FakeSendTransport {
    pub fn producer(&self, kind: StreamKind) -> Vec<Arc<FakeProducer>> {
        self.producers
            .lock()
            .iter()
            .filter(|p| p.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SendTransport for FakeSendTransport {
    fn id(&self) -> TransportId {
        self.id.clone()
    }

    fn local_dtls_parameters(&self) -> DtlsParameters {
        dtls()
    }

    async fn produce(&self, options: ProduceOptions) -> VoiceResult<Arc<dyn ProducerHandle>> {
        if *self.produce_fehler.lock() == Some(options.stream_kind) {
            return Err(VoiceError::Transport("produce verweigert".into()));
        }
        let producer = Arc::new(FakeProducer {
            id: ProducerId(format!("lokal-{}", naechste_id())),
            kind: options.stream_kind,
            track: Mutex::new(options.track.clone()),
            optionen: options,
            ersetzt: AtomicUsize::new(0),
            degradation: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        self.producers.lock().push(Arc::clone(&producer));
        Ok(producer)
    }

    async fn stats(&self) -> VoiceResult<TransportStatistik> {
        Ok(TransportStatistik {
            bytes_sent: self.bytes_sent.load(Ordering::SeqCst),
            bytes_received: 0,
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct FakeConsumer {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub track: MediaTrack,
    pub closed: AtomicBool,
}

impl ConsumerHandle for FakeConsumer {
    fn id(&self) -> ConsumerId {
        self.id.clone()
    }

    fn producer_id(&self) -> ProducerId {
        self.producer_id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn track(&self) -> MediaTrack {
        self.track.clone()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct FakeRecvTransport {
    pub id: TransportId,
    pub closed: AtomicBool,
    pub consumers: Mutex<Vec<Arc<FakeConsumer>>>,
    pub bytes_received: AtomicU64,
}

#[async_trait]
impl RecvTransport for FakeRecvTransport {
    fn id(&self) -> TransportId {
        self.id.clone()
    }

    fn local_dtls_parameters(&self) -> DtlsParameters {
        dtls()
    }

    async fn consume(&self, params: ConsumerParams) -> VoiceResult<Arc<dyn ConsumerHandle>> {
        let label = format!("{}-{}", params.participant_id, params.stream_kind);
        let track = if params.kind == MediaKind::Audio {
            MediaTrack::neu_audio(label, None, AudioFeed::neu(960))
        } else {
            MediaTrack::neu_video(label, None)
        };
        let consumer = Arc::new(FakeConsumer {
            id: params.id,
            producer_id: params.producer_id,
            kind: params.kind,
            track,
            closed: AtomicBool::new(false),
        });
        self.consumers.lock().push(Arc::clone(&consumer));
        Ok(consumer)
    }

    async fn stats(&self) -> VoiceResult<TransportStatistik> {
        Ok(TransportStatistik {
            bytes_sent: 0,
            bytes_received: self.bytes_received.load(Ordering::SeqCst),
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct FakeDevice {
    pub caps: RtpCapabilities,
    pub sende: Mutex<Vec<Arc<FakeSendTransport>>>,
    pub empfang: Mutex<Vec<Arc<FakeRecvTransport>>>,
}

impl FakeDevice {
    pub fn sende_transport(&self) -> Option<Arc<FakeSendTransport>> {
        self.sende.lock().last().cloned()
    }

    pub fn empfangs_transport(&self) -> Option<Arc<FakeRecvTransport>> {
        self.empfang.lock().last().cloned()
    }
}

#[async_trait]
impl MediaDevice for FakeDevice {
    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.caps.clone()
    }

    fn can_produce(&self, kind: MediaKind) -> bool {
        self.caps.unterstuetzt(kind)
    }

    async fn create_send_transport(&self, params: TransportParams) -> VoiceResult<Arc<dyn SendTransport>> {
        let transport = Arc::new(FakeSendTransport {
            id: params.id,
            closed: AtomicBool::new(false),
            producers: Mutex::new(Vec::new()),
            bytes_sent: AtomicU64::new(0),
            produce_fehler: Mutex::new(None),
        });
        self.sende.lock().push(Arc::clone(&transport));
        Ok(transport)
    }

    async fn create_recv_transport(&self, params: TransportParams) -> VoiceResult<Arc<dyn RecvTransport>> {
        let transport = Arc::new(FakeRecvTransport {
            id: params.id,
            closed: AtomicBool::new(false),
            consumers: Mutex::new(Vec::new()),
            bytes_received: AtomicU64::new(0),
        });
        self.empfang.lock().push(Arc::clone(&transport));
        Ok(transport)
    }
}

/// Engine, die pro `load` ein neues Geraet erzeugt
///
/// Ohne `geraete_caps` uebernimmt das Geraet die Router-Capabilities.
#[derive(Default)]
pub struct FakeEngine {
    pub geraete: Mutex<Vec<Arc<FakeDevice>>>,
    pub geraete_caps: Mutex<Option<RtpCapabilities>>,
}

impl FakeEngine {
    pub fn device(&self) -> Arc<FakeDevice> {
        self.geraete
            .lock()
            .last()
            .cloned()
            .expect("Engine wurde nie geladen")
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn load(&self, router_capabilities: &RtpCapabilities) -> VoiceResult<Arc<dyn MediaDevice>> {
        let caps = self
            .geraete_caps
            .lock()
            .clone()
            .unwrap_or_else(|| router_capabilities.clone());
        let device = Arc::new(FakeDevice {
            caps,
            sende: Mutex::new(Vec::new()),
            empfang: Mutex::new(Vec::new()),
        });
        self.geraete.lock().push(Arc::clone(&device));
        Ok(device)
    }
}

// ---------------------------------------------------------------------------
// Signalisierung
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeSignaling {
    sfu: Mutex<Option<mpsc::Sender<SfuEvent>>>,
    quellen: Mutex<HashMap<ProducerId, (ParticipantId, StreamKind)>>,
    pub bestehende: Mutex<Vec<ExistingProducer>>,
    pub angekuendigt: Mutex<Vec<StreamKind>>,
    pub geschlossen: Mutex<Vec<StreamKind>>,
    pub patches: Mutex<Vec<VoiceStatePatch>>,
    pub fortgesetzt: Mutex<Vec<ConsumerId>>,
    pub verbunden: Mutex<Vec<TransportId>>,
    pub capabilities_abrufe: AtomicUsize,
    /// Haelt `get_existing_producers` an, bis `freigeben` aufgerufen wird
    pub bestehende_anhalten: AtomicBool,
    pub bestehende_erreicht: Notify,
    bestehende_frei: Notify,
}

impl FakeSignaling {
    pub fn bestehender(&self, participant: u32, kind: StreamKind, id: &str) {
        let producer_id = ProducerId::from(id);
        self.quellen
            .lock()
            .insert(producer_id.clone(), (ParticipantId(participant), kind));
        self.bestehende.lock().push(ExistingProducer {
            participant_id: ParticipantId(participant),
            kind,
            producer_id,
        });
    }

    pub fn freigeben(&self) {
        self.bestehende_frei.notify_one();
    }

    /// Meldet einen neuen entfernten Producer als Push-Ereignis
    pub async fn neuer_producer(&self, participant: u32, kind: StreamKind, id: &str) {
        let producer_id = ProducerId::from(id);
        self.quellen
            .lock()
            .insert(producer_id.clone(), (ParticipantId(participant), kind));
        self.pushen(SfuEvent::NewProducer {
            participant_id: ParticipantId(participant),
            kind,
            producer_id,
        })
        .await;
    }

    pub async fn pushen(&self, ereignis: SfuEvent) {
        let sender = self.sfu.lock().clone().expect("SFU-Ereignisse nicht abonniert");
        sender.send(ereignis).await.expect("SFU-Ereigniskanal geschlossen");
    }

    pub fn letzter_patch(&self) -> Option<VoiceStatePatch> {
        self.patches.lock().last().cloned()
    }
}

#[async_trait]
impl SignalingClient for FakeSignaling {
    async fn get_capabilities(&self) -> VoiceResult<RtpCapabilities> {
        self.capabilities_abrufe.fetch_add(1, Ordering::SeqCst);
        Ok(router_caps())
    }

    async fn create_transport_params(&self, direction: TransportDirection) -> VoiceResult<TransportParams> {
        Ok(TransportParams {
            id: TransportId(format!("{}-{}", direction, naechste_id())),
            ice_parameters: IceParameters {
                username_fragment: "ufrag".into(),
                password: "pwd".into(),
                ice_lite: true,
            },
            ice_candidates: Vec::new(),
            dtls_parameters: dtls(),
        })
    }

    async fn connect_transport(&self, id: &TransportId, _dtls: DtlsParameters) -> VoiceResult<()> {
        self.verbunden.lock().push(id.clone());
        Ok(())
    }

    async fn announce_producer(&self, kind: StreamKind, _rtp_parameters: RtpParameters) -> VoiceResult<ProducerId> {
        self.angekuendigt.lock().push(kind);
        Ok(ProducerId(format!("srv-{}-{}", kind, naechste_id())))
    }

    async fn notify_producer_closed(&self, kind: StreamKind) -> VoiceResult<()> {
        self.geschlossen.lock().push(kind);
        Ok(())
    }

    async fn get_existing_producers(&self) -> VoiceResult<Vec<ExistingProducer>> {
        if self.bestehende_anhalten.load(Ordering::SeqCst) {
            self.bestehende_erreicht.notify_one();
            self.bestehende_frei.notified().await;
        }
        Ok(self.bestehende.lock().clone())
    }

    async fn consume(&self, producer_id: &ProducerId, _rtp_capabilities: &RtpCapabilities) -> VoiceResult<ConsumerParams> {
        let (participant_id, stream_kind) = self
            .quellen
            .lock()
            .get(producer_id)
            .copied()
            .ok_or_else(|| VoiceError::Signalisierung(format!("Unbekannter Producer {}", producer_id)))?;
        Ok(ConsumerParams {
            id: ConsumerId(format!("c-{}", naechste_id())),
            producer_id: producer_id.clone(),
            participant_id,
            stream_kind,
            kind: MediaKind::from(stream_kind),
            rtp_parameters: RtpParameters::default(),
        })
    }

    async fn resume_consumer(&self, consumer_id: &ConsumerId) -> VoiceResult<()> {
        self.fortgesetzt.lock().push(consumer_id.clone());
        Ok(())
    }

    async fn update_voice_state(&self, patch: VoiceStatePatch) -> VoiceResult<()> {
        self.patches.lock().push(patch);
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<SfuEvent> {
        let (tx, rx) = mpsc::channel(64);
        *self.sfu.lock() = Some(tx);
        rx
    }
}

// ---------------------------------------------------------------------------
// Geraete
// ---------------------------------------------------------------------------

pub struct FakeCapture {
    pub anfragen: Mutex<Vec<MediaConstraints>>,
    pub bildschirm_anfragen: Mutex<Vec<DisplayConstraints>>,
    pub gelieferte: Mutex<Vec<MediaTrack>>,
    pub mic_verweigert: AtomicBool,
    pub oberflaeche: Mutex<DisplaySurface>,
    pub bildschirm_audio: AtomicBool,
    /// Haelt die naechste Bildschirmauswahl an, bis das Tor freigegeben wird
    pub auswahl_tor: Mutex<Option<Arc<Notify>>>,
    pub geraete: Mutex<Vec<DeviceInfo>>,
}

impl Default for FakeCapture {
    fn default() -> Self {
        Self {
            anfragen: Mutex::new(Vec::new()),
            bildschirm_anfragen: Mutex::new(Vec::new()),
            gelieferte: Mutex::new(Vec::new()),
            mic_verweigert: AtomicBool::new(false),
            oberflaeche: Mutex::new(DisplaySurface::Monitor),
            bildschirm_audio: AtomicBool::new(false),
            auswahl_tor: Mutex::new(None),
            geraete: Mutex::new(vec![
                DeviceInfo {
                    device_id: "mic-1".into(),
                    kind: DeviceKind::AudioInput,
                    label: "Headset".into(),
                },
                DeviceInfo {
                    device_id: "virt-1".into(),
                    kind: DeviceKind::AudioInput,
                    label: "pulse-virtual-sink Monitor".into(),
                },
                DeviceInfo {
                    device_id: "out-1".into(),
                    kind: DeviceKind::AudioOutput,
                    label: "Lautsprecher".into(),
                },
            ]),
        }
    }
}

impl FakeCapture {
    /// Zuletzt gelieferter Audio-Track
    pub fn letztes_mikrofon(&self) -> Option<MediaTrack> {
        self.gelieferte
            .lock()
            .iter()
            .rev()
            .find(|t| t.audio_feed().is_some() && t.label().starts_with("mic"))
            .cloned()
    }

    pub fn audio_anfragen(&self) -> Vec<MediaConstraints> {
        self.anfragen
            .lock()
            .iter()
            .filter(|c| c.audio.is_some())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CaptureBackend for FakeCapture {
    async fn get_user_media(&self, constraints: MediaConstraints) -> VoiceResult<MediaStream> {
        self.anfragen.lock().push(constraints.clone());
        let mut tracks = Vec::new();
        if let Some(audio) = &constraints.audio {
            if self.mic_verweigert.load(Ordering::SeqCst) {
                return Err(VoiceError::geraet(GeraeteQuelle::Mikrofon, "Zugriff verweigert"));
            }
            let label = format!("mic:{}", audio.device_id.as_deref().unwrap_or("default"));
            tracks.push(MediaTrack::neu_audio(label, audio.device_id.clone(), AudioFeed::neu(4800)));
        }
        if let Some(video) = &constraints.video {
            let label = format!("cam:{}", video.device_id.as_deref().unwrap_or("default"));
            tracks.push(MediaTrack::neu_video(label, video.device_id.clone()));
        }
        self.gelieferte.lock().extend(tracks.iter().cloned());
        Ok(MediaStream::neu(tracks))
    }

    async fn get_display_media(&self, constraints: DisplayConstraints) -> VoiceResult<MediaStream> {
        self.bildschirm_anfragen.lock().push(constraints);
        // Auswahldialog: gibt die Kontrolle einmal ab
        tokio::task::yield_now().await;
        let tor = self.auswahl_tor.lock().take();
        if let Some(n) = tor {
            n.notified().await;
        }
        let mut tracks = vec![MediaTrack::neu_bildschirm("screen", *self.oberflaeche.lock())];
        if self.bildschirm_audio.load(Ordering::SeqCst) {
            tracks.push(MediaTrack::neu_audio("screen-audio", None, AudioFeed::neu(4800)));
        }
        self.gelieferte.lock().extend(tracks.iter().cloned());
        Ok(MediaStream::neu(tracks))
    }

    async fn enumerate_devices(&self) -> VoiceResult<Vec<DeviceInfo>> {
        Ok(self.geraete.lock().clone())
    }
}

/// System-Audio-Helfer mit fester Route
pub struct FakeSystemAudio {
    pub gestartet: AtomicUsize,
    pub gestoppt: AtomicUsize,
}

impl FakeSystemAudio {
    pub fn neu() -> Self {
        Self {
            gestartet: AtomicUsize::new(0),
            gestoppt: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SystemAudioCapture for FakeSystemAudio {
    async fn is_available(&self) -> bool {
        true
    }

    async fn start(&self) -> VoiceResult<Option<SystemAudioRoute>> {
        self.gestartet.fetch_add(1, Ordering::SeqCst);
        Ok(Some(SystemAudioRoute {
            virtual_input_label: "pulse-virtual-sink".into(),
            real_output_name: "Lautsprecher".into(),
        }))
    }

    async fn stop(&self) -> VoiceResult<()> {
        self.gestoppt.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Liefert fuer jede Datei dieselben Bytes
pub struct FakeSounds {
    pub daten: Bytes,
}

#[async_trait]
impl SoundLibrary for FakeSounds {
    async fn fetch(&self, file_id: &str) -> VoiceResult<Bytes> {
        if file_id.is_empty() {
            return Err(VoiceError::Signalisierung("Datei nicht gefunden".into()));
        }
        Ok(self.daten.clone())
    }
}

// ---------------------------------------------------------------------------
// Loopback
// ---------------------------------------------------------------------------

pub struct FakePeer {
    pub ereignisse: broadcast::Sender<PeerEvent>,
    pub tracks: Mutex<Vec<MediaTrack>>,
    pub remote: Mutex<Vec<String>>,
    pub kandidaten: Mutex<Vec<IceCandidateInit>>,
    pub encodings: Mutex<Vec<RtpEncoding>>,
    pub closed: AtomicBool,
}

impl FakePeer {
    pub fn zustand(&self, zustand: pulse_voice::loopback::PeerState) {
        let _ = self.ereignisse.send(PeerEvent::Zustand(zustand));
    }
}

#[async_trait]
impl LoopbackPeer for FakePeer {
    async fn add_track(&self, track: MediaTrack) -> VoiceResult<()> {
        self.tracks.lock().push(track);
        Ok(())
    }

    async fn create_offer(&self) -> VoiceResult<String> {
        Ok(format!("offer-{}", naechste_id()))
    }

    async fn create_answer(&self) -> VoiceResult<String> {
        Ok(format!("answer-{}", naechste_id()))
    }

    async fn set_remote_description(&self, sdp: String) -> VoiceResult<()> {
        if sdp.starts_with("offer") {
            let _ = self
                .ereignisse
                .send(PeerEvent::Track(MediaTrack::neu_video("loopback", None)));
        }
        self.remote.lock().push(sdp);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> VoiceResult<()> {
        self.kandidaten.lock().push(candidate);
        Ok(())
    }

    fn ereignisse(&self) -> broadcast::Receiver<PeerEvent> {
        self.ereignisse.subscribe()
    }

    async fn sender_encodings_setzen(&self, encoding: RtpEncoding) -> VoiceResult<usize> {
        let sender = self.tracks.lock().len();
        self.encodings.lock().push(encoding);
        Ok(sender)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakePeerFactory {
    pub peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakePeerFactory {
    pub fn peer(&self, index: usize) -> Option<Arc<FakePeer>> {
        self.peers.lock().get(index).cloned()
    }

    pub fn anzahl(&self) -> usize {
        self.peers.lock().len()
    }
}

#[async_trait]
impl PeerConnectionFactory for FakePeerFactory {
    async fn erstellen(&self) -> VoiceResult<Arc<dyn LoopbackPeer>> {
        let (ereignisse, _) = broadcast::channel(32);
        let peer = Arc::new(FakePeer {
            ereignisse,
            tracks: Mutex::new(Vec::new()),
            remote: Mutex::new(Vec::new()),
            kandidaten: Mutex::new(Vec::new()),
            encodings: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.peers.lock().push(Arc::clone(&peer));
        Ok(peer)
    }
}

/// Ein Ende eines lokalen Relay-Kanals
pub struct RelayEnde {
    eingang: broadcast::Sender<RelayMessage>,
    ausgang: broadcast::Sender<RelayMessage>,
    pub gesendet: Mutex<Vec<RelayMessage>>,
    pub geoeffnet: Mutex<Vec<ChannelId>>,
    pub geschlossen: AtomicUsize,
}

impl RelayEnde {
    pub fn gesendet(&self) -> Vec<RelayMessage> {
        self.gesendet.lock().clone()
    }

    pub fn hat_gesendet(&self, pruefen: impl Fn(&RelayMessage) -> bool) -> bool {
        self.gesendet.lock().iter().any(pruefen)
    }
}

/// Verbundenes Kanal-Paar (Quelle, Viewer)
pub fn relay_paar() -> (Arc<RelayEnde>, Arc<RelayEnde>) {
    let (a, _) = broadcast::channel(64);
    let (b, _) = broadcast::channel(64);
    let quelle = Arc::new(RelayEnde {
        eingang: a.clone(),
        ausgang: b.clone(),
        gesendet: Mutex::new(Vec::new()),
        geoeffnet: Mutex::new(Vec::new()),
        geschlossen: AtomicUsize::new(0),
    });
    let viewer = Arc::new(RelayEnde {
        eingang: b,
        ausgang: a,
        gesendet: Mutex::new(Vec::new()),
        geoeffnet: Mutex::new(Vec::new()),
        geschlossen: AtomicUsize::new(0),
    });
    (quelle, viewer)
}

#[async_trait]
impl RelayKanal for RelayEnde {
    async fn senden(&self, nachricht: RelayMessage) -> VoiceResult<()> {
        self.gesendet.lock().push(nachricht.clone());
        // Ohne Empfaenger geht die Nachricht verloren
        let _ = self.ausgang.send(nachricht);
        Ok(())
    }

    fn abonnieren(&self) -> broadcast::Receiver<RelayMessage> {
        self.eingang.subscribe()
    }
}

#[async_trait]
impl ViewerBridge for RelayEnde {
    async fn oeffnen(&self, channel: ChannelId) -> VoiceResult<()> {
        self.geoeffnet.lock().push(channel);
        Ok(())
    }

    async fn schliessen(&self) -> VoiceResult<()> {
        self.geschlossen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session-Aufbau
// ---------------------------------------------------------------------------

pub struct Umgebung {
    pub controller: Arc<SessionController>,
    pub signaling: Arc<FakeSignaling>,
    pub engine: Arc<FakeEngine>,
    pub capture: Arc<FakeCapture>,
    pub system_audio: Arc<FakeSystemAudio>,
    pub peers: Arc<FakePeerFactory>,
    pub bridge: Arc<RelayEnde>,
    pub viewer_kanal: Arc<RelayEnde>,
}

impl Umgebung {
    pub fn neu() -> Self {
        Self::mit(false)
    }

    /// Mit System-Audio-Helfer
    pub fn mit_system_audio() -> Self {
        Self::mit(true)
    }

    fn mit(system_audio: bool) -> Self {
        let signaling = Arc::new(FakeSignaling::default());
        let engine = Arc::new(FakeEngine::default());
        let capture = Arc::new(FakeCapture::default());
        let helfer = Arc::new(FakeSystemAudio::neu());
        let peers = Arc::new(FakePeerFactory::default());
        let (bridge, viewer_kanal) = relay_paar();

        let dienste = SessionDienste {
            signaling: signaling.clone(),
            engine: engine.clone(),
            capture: capture.clone(),
            system_audio: if system_audio {
                Some(helfer.clone() as Arc<dyn SystemAudioCapture>)
            } else {
                None
            },
            sounds: Arc::new(FakeSounds {
                daten: Bytes::from_static(b"keine mp3-daten"),
            }),
            loopback: Some(LoopbackDienste {
                factory: peers.clone(),
                bridge: bridge.clone(),
            }),
        };
        let controller = Arc::new(SessionController::neu(dienste, VoiceConfig::default(), None));

        Self {
            controller,
            signaling,
            engine,
            capture,
            system_audio: helfer,
            peers,
            bridge,
            viewer_kanal,
        }
    }

    pub async fn beitreten(&self) {
        self.controller
            .init(router_caps(), ChannelId(1))
            .await
            .expect("Beitritt fehlgeschlagen");
    }

    pub fn sende_transport(&self) -> Arc<FakeSendTransport> {
        self.engine
            .device()
            .sende_transport()
            .expect("kein Sende-Transport")
    }

    pub fn empfangs_transport(&self) -> Arc<FakeRecvTransport> {
        self.engine
            .device()
            .empfangs_transport()
            .expect("kein Empfangs-Transport")
    }
}
