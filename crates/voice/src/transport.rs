//! Sende- und Empfangs-Transport zur SFU
//!
//! Pro Session genau ein Transport je Richtung. Erstellung:
//! Parameter vom Server holen, lokal erzeugen, DTLS-Parameter zurueckmelden.
//! Schlaegt das Verbinden fehl, wird der halb erstellte Transport sofort
//! geschlossen.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::{MediaDevice, RecvTransport, SendTransport};
use crate::error::VoiceResult;
use crate::rtp::TransportDirection;
use crate::signaling::SignalingClient;

pub struct TransportManager {
    signaling: Arc<dyn SignalingClient>,
    senden: RwLock<Option<Arc<dyn SendTransport>>>,
    empfangen: RwLock<Option<Arc<dyn RecvTransport>>>,
}

impl TransportManager {
    pub fn neu(signaling: Arc<dyn SignalingClient>) -> Self {
        Self {
            signaling,
            senden: RwLock::new(None),
            empfangen: RwLock::new(None),
        }
    }

    /// Erstellt und verbindet den Sende-Transport
    ///
    /// Ein bereits vorhandener Sende-Transport wird vorher geschlossen.
    pub async fn sende_transport_erstellen(
        &self,
        device: &dyn MediaDevice,
    ) -> VoiceResult<Arc<dyn SendTransport>> {
        let params = self
            .signaling
            .create_transport_params(TransportDirection::Send)
            .await?;
        let transport = device.create_send_transport(params).await?;

        if let Err(e) = self
            .signaling
            .connect_transport(&transport.id(), transport.local_dtls_parameters())
            .await
        {
            warn!(transport = %transport.id(), "Sende-Transport konnte nicht verbunden werden: {}", e);
            transport.close();
            return Err(e);
        }

        if let Some(alt) = self.senden.write().replace(Arc::clone(&transport)) {
            alt.close();
        }
        info!(transport = %transport.id(), richtung = %TransportDirection::Send, "Transport verbunden");
        Ok(transport)
    }

    /// Erstellt und verbindet den Empfangs-Transport
    pub async fn empfangs_transport_erstellen(
        &self,
        device: &dyn MediaDevice,
    ) -> VoiceResult<Arc<dyn RecvTransport>> {
        let params = self
            .signaling
            .create_transport_params(TransportDirection::Recv)
            .await?;
        let transport = device.create_recv_transport(params).await?;

        if let Err(e) = self
            .signaling
            .connect_transport(&transport.id(), transport.local_dtls_parameters())
            .await
        {
            warn!(transport = %transport.id(), "Empfangs-Transport konnte nicht verbunden werden: {}", e);
            transport.close();
            return Err(e);
        }

        if let Some(alt) = self.empfangen.write().replace(Arc::clone(&transport)) {
            alt.close();
        }
        info!(transport = %transport.id(), richtung = %TransportDirection::Recv, "Transport verbunden");
        Ok(transport)
    }

    pub fn sende_transport(&self) -> Option<Arc<dyn SendTransport>> {
        self.senden.read().clone()
    }

    pub fn empfangs_transport(&self) -> Option<Arc<dyn RecvTransport>> {
        self.empfangen.read().clone()
    }

    /// Schliesst beide Transporte. Idempotent.
    pub fn schliessen(&self) {
        if let Some(t) = self.senden.write().take() {
            debug!(transport = %t.id(), "Sende-Transport geschlossen");
            t.close();
        }
        if let Some(t) = self.empfangen.write().take() {
            debug!(transport = %t.id(), "Empfangs-Transport geschlossen");
            t.close();
        }
    }

    /// Anzahl offener Transporte (0..=2)
    pub fn anzahl_offen(&self) -> usize {
        let senden = self.senden.read().as_ref().is_some_and(|t| !t.is_closed());
        let empfangen = self.empfangen.read().as_ref().is_some_and(|t| !t.is_closed());
        usize::from(senden) + usize::from(empfangen)
    }
}
