//! Loopback-Relay fuer das Vollbild-Fenster
//!
//! Spiegelt einen bereits laufenden Bildschirm-Stream ueber eine zweite,
//! SFU-unabhaengige Peer-Verbindung in ein anderes Fenster. Signalisiert
//! wird ueber einen lokalen Punkt-zu-Punkt-Kanal.
//!
//! ## Ablauf
//! ```text
//! Quelle                          Viewer
//!   |-- Fenster oeffnen ------------>|
//!   |                                |-- Peer erstellen
//!   |<--------------------- Ready ---|
//!   |-- Peer erstellen, Tracks       |
//!   |-- Offer ---------------------->|
//!   |<-------------------- Answer ---|
//!   |<-------------- ICE ----------->|
//! ```
//! Das Offer wird erst nach `Ready` gesendet; vorher existiert auf der
//! Gegenseite keine Peer-Verbindung und das Offer ginge verloren.
//! ICE- und Signalisierungsfehler werden nur protokolliert.

use async_trait::async_trait;
use pulse_core::{ChannelId, ContentHint, MediaStream, MediaTrack, TrackKind, VoiceEvent};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::error::{VoiceError, VoiceResult};
use crate::rtp::{Priority, RtpEncoding};

// ---------------------------------------------------------------------------
// Nachrichten und Schnittstellen
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

/// Nachricht auf dem Relay-Kanal zwischen Quelle und Viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    Ready,
    Offer { sdp: String },
    Answer { sdp: String },
    Ice { candidate: IceCandidateInit },
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone)]
pub enum PeerEvent {
    IceKandidat(IceCandidateInit),
    Zustand(PeerState),
    /// Eingehender Track (nur Viewer-Seite)
    Track(MediaTrack),
}

/// Lokale Peer-Verbindung ohne ICE-Server
#[async_trait]
pub trait LoopbackPeer: Send + Sync {
    async fn add_track(&self, track: MediaTrack) -> VoiceResult<()>;

    /// Erzeugt ein Offer und setzt es als lokale Beschreibung
    async fn create_offer(&self) -> VoiceResult<String>;

    /// Erzeugt ein Answer und setzt es als lokale Beschreibung
    async fn create_answer(&self) -> VoiceResult<String>;

    async fn set_remote_description(&self, sdp: String) -> VoiceResult<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> VoiceResult<()>;

    fn ereignisse(&self) -> broadcast::Receiver<PeerEvent>;

    /// Setzt die Parameter aller Sender; gibt die Anzahl der Sender zurueck
    async fn sender_encodings_setzen(&self, encoding: RtpEncoding) -> VoiceResult<usize>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn erstellen(&self) -> VoiceResult<Arc<dyn LoopbackPeer>>;
}

/// Punkt-zu-Punkt-Kanal zur Gegenseite
#[async_trait]
pub trait RelayKanal: Send + Sync {
    async fn senden(&self, nachricht: RelayMessage) -> VoiceResult<()>;

    fn abonnieren(&self) -> broadcast::Receiver<RelayMessage>;
}

/// Relay-Kanal der Quelle inklusive Fenstersteuerung
#[async_trait]
pub trait ViewerBridge: RelayKanal {
    async fn oeffnen(&self, channel: ChannelId) -> VoiceResult<()>;

    async fn schliessen(&self) -> VoiceResult<()>;
}

// ---------------------------------------------------------------------------
// Ergebnis und Handle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopbackEnde {
    /// Gegenseite hat ihr Fenster geschlossen
    GegenseiteGeschlossen,
    /// Der gespiegelte Stream existiert nicht mehr
    QuelleWeg,
    /// Lokal gestoppt
    Gestoppt,
    Fehler,
}

/// Ergebnis eines Relay-Laufs
///
/// Quelle: gesendete Offers / empfangene Answers.
/// Viewer: empfangene Offers / gesendete Answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackErgebnis {
    pub angebote: usize,
    pub antworten: usize,
    pub grund: LoopbackEnde,
}

impl LoopbackErgebnis {
    fn neu() -> Self {
        Self {
            angebote: 0,
            antworten: 0,
            grund: LoopbackEnde::Gestoppt,
        }
    }
}

/// Laufendes Relay (Quelle oder Viewer)
pub struct LoopbackHandle {
    stopp: watch::Sender<bool>,
    task: JoinHandle<LoopbackErgebnis>,
    track: Option<watch::Receiver<Option<MediaTrack>>>,
    fertig: watch::Receiver<bool>,
}

impl LoopbackHandle {
    pub fn stoppen(&self) {
        let _ = self.stopp.send(true);
    }

    pub fn ist_beendet(&self) -> bool {
        self.task.is_finished()
    }

    /// Endet, sobald das Relay endet; verbraucht den Handle nicht
    pub fn abgeschlossen(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut fertig = self.fertig.clone();
        async move {
            let _ = fertig.wait_for(|f| *f).await;
        }
    }

    /// Empfangener Track (nur Viewer)
    pub fn track(&self) -> Option<watch::Receiver<Option<MediaTrack>>> {
        self.track.clone()
    }

    /// Wartet auf das Ende des Relays
    pub async fn ergebnis(self) -> LoopbackErgebnis {
        match self.task.await {
            Ok(ergebnis) => ergebnis,
            Err(e) => {
                warn!("Loopback-Task abgebrochen: {}", e);
                LoopbackErgebnis {
                    grund: LoopbackEnde::Fehler,
                    ..LoopbackErgebnis::neu()
                }
            }
        }
    }

    /// Stoppt das Relay und wartet auf sein Ende
    pub async fn beenden(self) -> LoopbackErgebnis {
        self.stoppen();
        self.ergebnis().await
    }
}

/// Endet mit dem ersten beendeten Track der Quelle
async fn quelle_beendet(stream: MediaStream) {
    let mut waechter = JoinSet::new();
    for track in stream.tracks() {
        waechter.spawn(async move { track.beendet().await });
    }
    waechter.join_next().await;
}

async fn stopp_abwarten(stopp: &mut watch::Receiver<bool>) {
    while !*stopp.borrow_and_update() {
        if stopp.changed().await.is_err() {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Quelle
// ---------------------------------------------------------------------------

/// Quellseite: oeffnet das Fenster und sendet den Stream
pub struct LoopbackQuelle {
    factory: Arc<dyn PeerConnectionFactory>,
    bridge: Arc<dyn ViewerBridge>,
    max_bitrate_bps: u32,
    ereignisse: broadcast::Sender<VoiceEvent>,
}

struct QuellFortschritt {
    peer: Option<Arc<dyn LoopbackPeer>>,
    ergebnis: LoopbackErgebnis,
}

impl LoopbackQuelle {
    pub fn neu(
        factory: Arc<dyn PeerConnectionFactory>,
        bridge: Arc<dyn ViewerBridge>,
        max_bitrate_bps: u32,
        ereignisse: broadcast::Sender<VoiceEvent>,
    ) -> Self {
        Self {
            factory,
            bridge,
            max_bitrate_bps,
            ereignisse,
        }
    }

    /// Startet das Relay als eigenen Task
    pub fn starten(self, channel: ChannelId, stream: MediaStream) -> LoopbackHandle {
        let (stopp, stopp_rx) = watch::channel(false);
        let (fertig_tx, fertig) = watch::channel(false);
        let task = tokio::spawn(async move {
            let ergebnis = self.ausfuehren(channel, stream, stopp_rx).await;
            let _ = fertig_tx.send(true);
            ergebnis
        });
        LoopbackHandle {
            stopp,
            task,
            track: None,
            fertig,
        }
    }

    async fn ausfuehren(
        &self,
        channel: ChannelId,
        stream: MediaStream,
        mut stopp: watch::Receiver<bool>,
    ) -> LoopbackErgebnis {
        let mut fortschritt = QuellFortschritt {
            peer: None,
            ergebnis: LoopbackErgebnis::neu(),
        };

        let grund = match self
            .ablauf(channel, &stream, &mut stopp, &mut fortschritt)
            .await
        {
            Ok(grund) => grund,
            Err(e) => {
                warn!("Loopback-Relay abgebrochen: {}", e);
                LoopbackEnde::Fehler
            }
        };

        if let Some(peer) = fortschritt.peer.take() {
            peer.close();
        }
        if grund != LoopbackEnde::GegenseiteGeschlossen {
            if let Err(e) = self.bridge.senden(RelayMessage::Closed).await {
                debug!("Viewer nicht ueber Ende informiert: {}", e);
            }
        }
        if let Err(e) = self.bridge.schliessen().await {
            debug!("Viewer-Fenster nicht geschlossen: {}", e);
        }
        let _ = self.ereignisse.send(VoiceEvent::LoopbackGeschlossen);

        info!(grund = ?grund, angebote = fortschritt.ergebnis.angebote, "Loopback-Relay beendet");
        LoopbackErgebnis {
            grund,
            ..fortschritt.ergebnis
        }
    }

    async fn ablauf(
        &self,
        channel: ChannelId,
        stream: &MediaStream,
        stopp: &mut watch::Receiver<bool>,
        fortschritt: &mut QuellFortschritt,
    ) -> VoiceResult<LoopbackEnde> {
        let mut relay = self.bridge.abonnieren();
        self.bridge.oeffnen(channel).await?;

        let quelle_weg = quelle_beendet(stream.clone());
        tokio::pin!(quelle_weg);

        // Auf die Peer-Verbindung der Gegenseite warten
        loop {
            tokio::select! {
                nachricht = relay.recv() => match nachricht {
                    Ok(RelayMessage::Ready) => break,
                    Ok(RelayMessage::Closed) | Err(RecvError::Closed) => {
                        return Ok(LoopbackEnde::GegenseiteGeschlossen);
                    }
                    Ok(andere) => debug!(nachricht = ?andere, "Nachricht vor Ready ignoriert"),
                    Err(RecvError::Lagged(n)) => debug!(verpasst = n, "Relay-Kanal uebergelaufen"),
                },
                _ = &mut quelle_weg => return Ok(LoopbackEnde::QuelleWeg),
                _ = stopp_abwarten(stopp) => return Ok(LoopbackEnde::Gestoppt),
            }
        }

        if stream.ist_beendet() {
            return Ok(LoopbackEnde::QuelleWeg);
        }

        let peer = self.factory.erstellen().await?;
        fortschritt.peer = Some(Arc::clone(&peer));
        let mut peer_ereignisse = peer.ereignisse();

        for track in stream.tracks() {
            if track.kind() == TrackKind::Video {
                track.set_content_hint(ContentHint::Detail);
            }
            peer.add_track(track).await?;
        }

        let sdp = peer.create_offer().await?;
        self.bridge.senden(RelayMessage::Offer { sdp }).await?;
        fortschritt.ergebnis.angebote += 1;
        debug!("Loopback-Offer gesendet");

        loop {
            tokio::select! {
                nachricht = relay.recv() => match nachricht {
                    Ok(RelayMessage::Answer { sdp }) => {
                        match peer.set_remote_description(sdp).await {
                            Ok(()) => fortschritt.ergebnis.antworten += 1,
                            Err(e) => debug!("Loopback-Answer nicht uebernommen: {}", e),
                        }
                    }
                    Ok(RelayMessage::Ice { candidate }) => {
                        if let Err(e) = peer.add_ice_candidate(candidate).await {
                            debug!("Loopback-ICE-Kandidat verworfen: {}", e);
                        }
                    }
                    Ok(RelayMessage::Closed) | Err(RecvError::Closed) => {
                        return Ok(LoopbackEnde::GegenseiteGeschlossen);
                    }
                    Ok(RelayMessage::Ready) => debug!("Doppeltes Ready ignoriert"),
                    Ok(RelayMessage::Offer { .. }) => debug!("Offer vom Viewer ignoriert"),
                    Err(RecvError::Lagged(n)) => debug!(verpasst = n, "Relay-Kanal uebergelaufen"),
                },
                ereignis = peer_ereignisse.recv() => match ereignis {
                    Ok(PeerEvent::IceKandidat(candidate)) => {
                        if let Err(e) = self.bridge.senden(RelayMessage::Ice { candidate }).await {
                            debug!("ICE-Kandidat nicht weitergeleitet: {}", e);
                        }
                    }
                    Ok(PeerEvent::Zustand(PeerState::Connected)) => self.encodings_anheben(peer.as_ref()).await,
                    Ok(PeerEvent::Zustand(PeerState::Closed)) | Err(RecvError::Closed) => {
                        return Err(VoiceError::Loopback("Peer-Verbindung geschlossen".into()));
                    }
                    Ok(PeerEvent::Zustand(zustand)) => debug!(zustand = ?zustand, "Loopback-Zustand"),
                    Ok(PeerEvent::Track(_)) => {}
                    Err(RecvError::Lagged(n)) => debug!(verpasst = n, "Peer-Ereignisse uebergelaufen"),
                },
                _ = &mut quelle_weg => return Ok(LoopbackEnde::QuelleWeg),
                _ = stopp_abwarten(stopp) => return Ok(LoopbackEnde::Gestoppt),
            }
        }
    }

    /// Erst nach `Connected` zuverlaessig
    async fn encodings_anheben(&self, peer: &dyn LoopbackPeer) {
        let encoding = RtpEncoding {
            max_bitrate: Some(self.max_bitrate_bps),
            priority: Some(Priority::High),
            network_priority: Some(Priority::High),
            ..Default::default()
        };
        match peer.sender_encodings_setzen(encoding).await {
            Ok(sender) => debug!(sender, bitrate = self.max_bitrate_bps, "Loopback-Encodings gesetzt"),
            Err(e) => debug!("Loopback-Encodings nicht gesetzt: {}", e),
        }
    }
}

// ---------------------------------------------------------------------------
// Viewer
// ---------------------------------------------------------------------------

/// Viewer-Seite: empfaengt den gespiegelten Stream
pub struct LoopbackViewer {
    factory: Arc<dyn PeerConnectionFactory>,
    kanal: Arc<dyn RelayKanal>,
}

impl LoopbackViewer {
    pub fn neu(factory: Arc<dyn PeerConnectionFactory>, kanal: Arc<dyn RelayKanal>) -> Self {
        Self { factory, kanal }
    }

    pub fn starten(self) -> LoopbackHandle {
        let (stopp, stopp_rx) = watch::channel(false);
        let (track_tx, track_rx) = watch::channel(None);
        let (fertig_tx, fertig) = watch::channel(false);
        let task = tokio::spawn(async move {
            let ergebnis = self.ausfuehren(stopp_rx, track_tx).await;
            let _ = fertig_tx.send(true);
            ergebnis
        });
        LoopbackHandle {
            stopp,
            task,
            track: Some(track_rx),
            fertig,
        }
    }

    async fn ausfuehren(
        &self,
        mut stopp: watch::Receiver<bool>,
        track_tx: watch::Sender<Option<MediaTrack>>,
    ) -> LoopbackErgebnis {
        let mut ergebnis = LoopbackErgebnis::neu();
        let mut peer = None;
        let grund = match self
            .ablauf(&mut stopp, &track_tx, &mut peer, &mut ergebnis)
            .await
        {
            Ok(grund) => grund,
            Err(e) => {
                warn!("Loopback-Viewer abgebrochen: {}", e);
                LoopbackEnde::Fehler
            }
        };

        if let Some(peer) = peer {
            peer.close();
        }
        if grund != LoopbackEnde::GegenseiteGeschlossen {
            if let Err(e) = self.kanal.senden(RelayMessage::Closed).await {
                debug!("Quelle nicht ueber Ende informiert: {}", e);
            }
        }
        track_tx.send_replace(None);
        LoopbackErgebnis { grund, ..ergebnis }
    }

    async fn ablauf(
        &self,
        stopp: &mut watch::Receiver<bool>,
        track_tx: &watch::Sender<Option<MediaTrack>>,
        peer_slot: &mut Option<Arc<dyn LoopbackPeer>>,
        ergebnis: &mut LoopbackErgebnis,
    ) -> VoiceResult<LoopbackEnde> {
        let peer = self.factory.erstellen().await?;
        *peer_slot = Some(Arc::clone(&peer));
        let mut peer_ereignisse = peer.ereignisse();
        let mut relay = self.kanal.abonnieren();

        self.kanal.senden(RelayMessage::Ready).await?;

        loop {
            tokio::select! {
                nachricht = relay.recv() => match nachricht {
                    Ok(RelayMessage::Offer { sdp }) => {
                        ergebnis.angebote += 1;
                        match self.beantworten(peer.as_ref(), sdp).await {
                            Ok(()) => ergebnis.antworten += 1,
                            Err(e) => debug!("Loopback-Offer nicht beantwortet: {}", e),
                        }
                    }
                    Ok(RelayMessage::Ice { candidate }) => {
                        if let Err(e) = peer.add_ice_candidate(candidate).await {
                            debug!("Loopback-ICE-Kandidat verworfen: {}", e);
                        }
                    }
                    Ok(RelayMessage::Closed) | Err(RecvError::Closed) => {
                        return Ok(LoopbackEnde::GegenseiteGeschlossen);
                    }
                    Ok(andere) => debug!(nachricht = ?andere, "Unerwartete Nachricht ignoriert"),
                    Err(RecvError::Lagged(n)) => debug!(verpasst = n, "Relay-Kanal uebergelaufen"),
                },
                ereignis = peer_ereignisse.recv() => match ereignis {
                    Ok(PeerEvent::IceKandidat(candidate)) => {
                        if let Err(e) = self.kanal.senden(RelayMessage::Ice { candidate }).await {
                            debug!("ICE-Kandidat nicht weitergeleitet: {}", e);
                        }
                    }
                    Ok(PeerEvent::Track(track)) => {
                        debug!(track = %track.id(), "Loopback-Track empfangen");
                        track_tx.send_replace(Some(track));
                    }
                    Ok(PeerEvent::Zustand(PeerState::Closed)) | Err(RecvError::Closed) => {
                        return Err(VoiceError::Loopback("Peer-Verbindung geschlossen".into()));
                    }
                    Ok(PeerEvent::Zustand(zustand)) => debug!(zustand = ?zustand, "Loopback-Zustand"),
                    Err(RecvError::Lagged(n)) => debug!(verpasst = n, "Peer-Ereignisse uebergelaufen"),
                },
                _ = stopp_abwarten(stopp) => return Ok(LoopbackEnde::Gestoppt),
            }
        }
    }

    async fn beantworten(&self, peer: &dyn LoopbackPeer, sdp: String) -> VoiceResult<()> {
        peer.set_remote_description(sdp).await?;
        let antwort = peer.create_answer().await?;
        self.kanal.senden(RelayMessage::Answer { sdp: antwort }).await
    }
}
