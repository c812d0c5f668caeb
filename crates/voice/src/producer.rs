//! Lokale Producer, hoechstens einer pro Stream-Art
//!
//! `produzieren` erstellt den Producer beim ersten Aufruf und ersetzt danach
//! nur noch den Track (Hot-Swap). Alle Operationen laufen unter einer
//! gemeinsamen Sperre, zwei Producer derselben Art koennen so nicht
//! gleichzeitig entstehen.
//!
//! Jeder Producer hat einen Waechter-Task auf seinem Track. Endet der Track
//! von aussen (Geraet entfernt, Freigabe ueber die OS-Leiste beendet), wird
//! der Producer geschlossen und `VoiceEvent::ProducerBeendet` gesendet.

use pulse_core::{EndeGrund, MediaTrack, ProducerId, StreamKind, TrackId, VoiceEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::encoding::ProduceRichtlinie;
use crate::engine::{ProduceOptions, ProducerHandle, SendTransport};
use crate::error::VoiceResult;
use crate::signaling::SignalingClient;

struct ProducerEintrag {
    handle: Arc<dyn ProducerHandle>,
    remote_id: ProducerId,
    track: MediaTrack,
    waechter: JoinHandle<()>,
}

/// Momentaufnahme eines Producers (Statistik, UI)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerInfo {
    pub kind: StreamKind,
    pub producer_id: ProducerId,
    pub track_id: TrackId,
}

pub struct ProducerRegistry {
    signaling: Arc<dyn SignalingClient>,
    eintraege: Mutex<HashMap<StreamKind, ProducerEintrag>>,
    ereignisse: broadcast::Sender<VoiceEvent>,
}

impl ProducerRegistry {
    pub fn neu(
        signaling: Arc<dyn SignalingClient>,
        ereignisse: broadcast::Sender<VoiceEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            signaling,
            eintraege: Mutex::new(HashMap::new()),
            ereignisse,
        })
    }

    /// Erstellt den Producer fuer `kind` oder ersetzt dessen Track
    pub async fn produzieren(
        self: &Arc<Self>,
        kind: StreamKind,
        track: MediaTrack,
        transport: &Arc<dyn SendTransport>,
        richtlinie: ProduceRichtlinie,
    ) -> VoiceResult<Arc<dyn ProducerHandle>> {
        let mut eintraege = self.eintraege.lock().await;

        if let Some(eintrag) = eintraege.get_mut(&kind).filter(|e| !e.handle.is_closed()) {
            if eintrag.track != track {
                eintrag.handle.replace_track(track.clone()).await?;
                eintrag.waechter.abort();
                eintrag.waechter = self.waechter_starten(kind, track.clone());
                debug!(kind = %kind, alt = %eintrag.track.id(), neu = %track.id(), "Producer-Track ersetzt");
                eintrag.track = track;
            }
            return Ok(Arc::clone(&eintrag.handle));
        }
        if let Some(tot) = eintraege.remove(&kind) {
            tot.waechter.abort();
        }

        let handle = transport
            .produce(ProduceOptions {
                track: track.clone(),
                stream_kind: kind,
                codec: richtlinie.codec,
                encodings: richtlinie.encodings,
                codec_options: richtlinie.codec_options,
            })
            .await?;

        let remote_id = match self
            .signaling
            .announce_producer(kind, handle.rtp_parameters())
            .await
        {
            Ok(id) => id,
            Err(e) => {
                handle.close();
                return Err(e);
            }
        };

        if let Some(praeferenz) = richtlinie.degradation {
            if let Err(e) = handle.set_degradation_preference(praeferenz).await {
                warn!(kind = %kind, "Degradation-Praeferenz nicht gesetzt: {}", e);
            }
        }

        let waechter = self.waechter_starten(kind, track.clone());
        info!(kind = %kind, producer = %remote_id, track = %track.id(), "Producer erstellt");
        eintraege.insert(
            kind,
            ProducerEintrag {
                handle: Arc::clone(&handle),
                remote_id,
                track,
                waechter,
            },
        );
        Ok(handle)
    }

    fn waechter_starten(self: &Arc<Self>, kind: StreamKind, track: MediaTrack) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            if track.beendet().await != EndeGrund::Extern {
                return;
            }
            if let Some(registry) = registry.upgrade() {
                registry.track_beendet(kind, &track).await;
            }
        })
    }

    async fn track_beendet(&self, kind: StreamKind, track: &MediaTrack) {
        let eintrag = {
            let mut eintraege = self.eintraege.lock().await;
            match eintraege.get(&kind) {
                Some(e) if e.track == *track => eintraege.remove(&kind),
                _ => None,
            }
        };
        let Some(eintrag) = eintrag else {
            return;
        };

        warn!(kind = %kind, track = %track.id(), "Track extern beendet, Producer wird geschlossen");
        eintrag.handle.close();
        if let Err(e) = self.signaling.notify_producer_closed(kind).await {
            warn!(kind = %kind, "SFU nicht ueber geschlossenen Producer informiert: {}", e);
        }
        let _ = self.ereignisse.send(VoiceEvent::ProducerBeendet { kind });
    }

    /// Schliesst den Producer fuer `kind`. Idempotent.
    ///
    /// Die SFU wird benachrichtigt; ein Fehler dabei wird nur protokolliert.
    pub async fn schliessen(&self, kind: StreamKind) -> bool {
        let eintrag = self.eintraege.lock().await.remove(&kind);
        let Some(eintrag) = eintrag else {
            return false;
        };
        self.eintrag_schliessen(kind, eintrag).await;
        true
    }

    async fn eintrag_schliessen(&self, kind: StreamKind, eintrag: ProducerEintrag) {
        eintrag.waechter.abort();
        eintrag.handle.close();
        debug!(kind = %kind, producer = %eintrag.remote_id, "Producer geschlossen");
        if let Err(e) = self.signaling.notify_producer_closed(kind).await {
            warn!(kind = %kind, "SFU nicht ueber geschlossenen Producer informiert: {}", e);
        }
    }

    /// Schliesst alle Producer; gibt die Anzahl zurueck
    pub async fn alle_schliessen(&self) -> usize {
        let alle: Vec<_> = self.eintraege.lock().await.drain().collect();
        let anzahl = alle.len();
        for (kind, eintrag) in alle {
            self.eintrag_schliessen(kind, eintrag).await;
        }
        anzahl
    }

    /// Anzahl lebender Producer
    pub async fn anzahl(&self) -> usize {
        self.eintraege
            .lock()
            .await
            .values()
            .filter(|e| !e.handle.is_closed())
            .count()
    }

    pub async fn track(&self, kind: StreamKind) -> Option<MediaTrack> {
        self.eintraege.lock().await.get(&kind).map(|e| e.track.clone())
    }

    /// Lebende Producer in fester Reihenfolge der Stream-Arten
    pub async fn schnappschuss(&self) -> Vec<ProducerInfo> {
        let eintraege = self.eintraege.lock().await;
        StreamKind::ALLE
            .iter()
            .filter_map(|kind| {
                eintraege
                    .get(kind)
                    .filter(|e| !e.handle.is_closed())
                    .map(|e| ProducerInfo {
                        kind: *kind,
                        producer_id: e.remote_id.clone(),
                        track_id: e.track.id(),
                    })
            })
            .collect()
    }
}
