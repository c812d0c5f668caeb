//! Eingehende Consumer, einer pro (Teilnehmer, Stream-Art)
//!
//! Entstehen reaktiv, wenn die SFU einen neuen entfernten Producer meldet,
//! oder beim Beitritt fuer alle bereits bestehenden Producer (Backfill).
//! Entfernen ist nie ein Fehler: bei Reconnect-Races kann derselbe Eintrag
//! zweimal entfernt werden.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pulse_core::{
    ConsumerId, EndeGrund, MediaTrack, ParticipantId, ProducerId, StreamKind, VoiceEvent,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::engine::{ConsumerHandle, RecvTransport};
use crate::error::VoiceResult;
use crate::rtp::RtpCapabilities;
use crate::signaling::{ExistingProducer, SignalingClient};

type Schluessel = (ParticipantId, StreamKind);

/// Momentaufnahme eines Consumers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerInfo {
    pub participant_id: ParticipantId,
    pub kind: StreamKind,
    pub consumer_id: ConsumerId,
    pub producer_id: ProducerId,
}

pub struct ConsumerRegistry {
    signaling: Arc<dyn SignalingClient>,
    eintraege: DashMap<Schluessel, Arc<dyn ConsumerHandle>>,
    ton_aus: AtomicBool,
    ereignisse: broadcast::Sender<VoiceEvent>,
}

impl ConsumerRegistry {
    pub fn neu(
        signaling: Arc<dyn SignalingClient>,
        ereignisse: broadcast::Sender<VoiceEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            signaling,
            eintraege: DashMap::new(),
            ton_aus: AtomicBool::new(false),
            ereignisse,
        })
    }

    /// Konsumiert einen entfernten Producer
    ///
    /// Existiert fuer denselben Producer bereits ein Consumer, wird dessen
    /// Track zurueckgegeben. Ein Consumer eines anderen Producers unter
    /// demselben Schluessel wird ersetzt.
    pub async fn konsumieren(
        self: &Arc<Self>,
        transport: &Arc<dyn RecvTransport>,
        lokale_capabilities: &RtpCapabilities,
        participant_id: ParticipantId,
        kind: StreamKind,
        producer_id: &ProducerId,
    ) -> VoiceResult<MediaTrack> {
        let schluessel = (participant_id, kind);
        if let Some(track) = self.vorhandener_track(&schluessel, producer_id) {
            debug!(participant = %participant_id, kind = %kind, "Consumer existiert bereits");
            return Ok(track);
        }

        let params = self
            .signaling
            .consume(producer_id, lokale_capabilities)
            .await?;
        let handle = transport.consume(params).await?;

        if let Err(e) = self.signaling.resume_consumer(&handle.id()).await {
            handle.close();
            return Err(e);
        }

        let track = handle.track();
        if kind.ist_audio() && self.ton_aus.load(Ordering::SeqCst) {
            track.set_aktiviert(false);
        }

        match self.eintraege.entry(schluessel) {
            Entry::Occupied(e)
                if e.get().producer_id() == *producer_id && !e.get().is_closed() =>
            {
                // Paralleler Aufruf (Ereignis und Backfill) war schneller
                let vorhanden = e.get().track();
                drop(e);
                handle.close();
                return Ok(vorhanden);
            }
            Entry::Occupied(mut e) => {
                let alt = e.insert(Arc::clone(&handle));
                alt.close();
                alt.track().stoppen();
            }
            Entry::Vacant(e) => {
                e.insert(Arc::clone(&handle));
            }
        }

        self.waechter_starten(schluessel, Arc::clone(&handle));
        info!(
            participant = %participant_id,
            kind = %kind,
            consumer = %handle.id(),
            "Consumer erstellt"
        );
        let _ = self
            .ereignisse
            .send(VoiceEvent::StreamHinzugefuegt { participant_id, kind });
        Ok(track)
    }

    fn vorhandener_track(&self, schluessel: &Schluessel, producer_id: &ProducerId) -> Option<MediaTrack> {
        self.eintraege
            .get(schluessel)
            .filter(|h| h.producer_id() == *producer_id && !h.is_closed())
            .map(|h| h.track())
    }

    fn waechter_starten(self: &Arc<Self>, schluessel: Schluessel, handle: Arc<dyn ConsumerHandle>) {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            if handle.track().beendet().await != EndeGrund::Extern {
                return;
            }
            let Some(registry) = registry.upgrade() else {
                return;
            };
            let gleicher = registry
                .eintraege
                .get(&schluessel)
                .is_some_and(|h| h.id() == handle.id());
            if gleicher {
                warn!(participant = %schluessel.0, kind = %schluessel.1, "Eingehender Track extern beendet");
                registry.entfernen(schluessel.0, schluessel.1);
            }
        });
    }

    /// Backfill beim Beitritt: ein Consumer pro bestehendem Producer
    ///
    /// Einzelne Fehler werden protokolliert; gibt die Anzahl erfolgreich
    /// konsumierter Producer zurueck.
    pub async fn bestehende_konsumieren(
        self: &Arc<Self>,
        transport: &Arc<dyn RecvTransport>,
        lokale_capabilities: &RtpCapabilities,
        bestehende: Vec<ExistingProducer>,
    ) -> usize {
        let mut erfolgreich = 0;
        for p in bestehende {
            match self
                .konsumieren(
                    transport,
                    lokale_capabilities,
                    p.participant_id,
                    p.kind,
                    &p.producer_id,
                )
                .await
            {
                Ok(_) => erfolgreich += 1,
                Err(e) => warn!(
                    participant = %p.participant_id,
                    kind = %p.kind,
                    "Bestehender Producer nicht konsumiert: {}", e
                ),
            }
        }
        erfolgreich
    }

    /// Entfernt den Consumer. Nie ein Fehler, auch wenn nichts existiert.
    pub fn entfernen(&self, participant_id: ParticipantId, kind: StreamKind) -> bool {
        let Some((_, handle)) = self.eintraege.remove(&(participant_id, kind)) else {
            return false;
        };
        handle.close();
        handle.track().stoppen();
        debug!(participant = %participant_id, kind = %kind, "Consumer entfernt");
        let _ = self
            .ereignisse
            .send(VoiceEvent::StreamEntfernt { participant_id, kind });
        true
    }

    /// Entfernt alle Consumer eines Teilnehmers
    pub fn teilnehmer_entfernen(&self, participant_id: ParticipantId) -> usize {
        let anzahl = StreamKind::ALLE
            .iter()
            .filter(|kind| self.entfernen(participant_id, **kind))
            .count();
        let _ = self
            .ereignisse
            .send(VoiceEvent::TeilnehmerEntfernt { participant_id });
        anzahl
    }

    /// Alle Streams eines Teilnehmers
    pub fn fuer_teilnehmer(&self, participant_id: ParticipantId) -> Vec<(StreamKind, MediaTrack)> {
        StreamKind::ALLE
            .iter()
            .filter_map(|kind| {
                self.eintraege
                    .get(&(participant_id, *kind))
                    .map(|h| (*kind, h.track()))
            })
            .collect()
    }

    /// Alle Teilnehmer mit einem Stream der Art `kind`, aufsteigend sortiert
    pub fn teilnehmer_mit(&self, kind: StreamKind) -> Vec<ParticipantId> {
        let mut teilnehmer: Vec<ParticipantId> = self
            .eintraege
            .iter()
            .filter(|e| e.key().1 == kind)
            .map(|e| e.key().0)
            .collect();
        teilnehmer.sort();
        teilnehmer
    }

    pub fn track(&self, participant_id: ParticipantId, kind: StreamKind) -> Option<MediaTrack> {
        self.eintraege
            .get(&(participant_id, kind))
            .map(|h| h.track())
    }

    /// Schaltet alle eingehenden Audio-Tracks stumm (Deafen)
    ///
    /// Gilt auch fuer Consumer, die waehrend des Stummschaltens entstehen.
    pub fn ton_stummschalten(&self, stumm: bool) {
        self.ton_aus.store(stumm, Ordering::SeqCst);
        for eintrag in self.eintraege.iter() {
            if eintrag.key().1.ist_audio() {
                eintrag.value().track().set_aktiviert(!stumm);
            }
        }
        debug!(stumm, "Eingehender Ton umgeschaltet");
    }

    pub fn anzahl(&self) -> usize {
        self.eintraege.len()
    }

    /// Schliesst alle Consumer (Aufraeumen); gibt die Anzahl zurueck
    pub fn alle_schliessen(&self) -> usize {
        let schluessel: Vec<Schluessel> = self.eintraege.iter().map(|e| *e.key()).collect();
        let mut anzahl = 0;
        for s in schluessel {
            if let Some((_, handle)) = self.eintraege.remove(&s) {
                handle.close();
                handle.track().stoppen();
                anzahl += 1;
            }
        }
        anzahl
    }

    pub fn schnappschuss(&self) -> Vec<ConsumerInfo> {
        let mut infos: Vec<ConsumerInfo> = self
            .eintraege
            .iter()
            .map(|e| ConsumerInfo {
                participant_id: e.key().0,
                kind: e.key().1,
                consumer_id: e.value().id(),
                producer_id: e.value().producer_id(),
            })
            .collect();
        infos.sort_by_key(|i| (i.participant_id, StreamKind::ALLE.iter().position(|k| *k == i.kind)));
        infos
    }
}
