//! Prometheus-kompatible Metriken einer Voice-Session
//!
//! Registrierte Metriken:
//! - `pulse_session_status` – Gauge: Verbindungsstatus (0=getrennt, 1=verbindend, 2=verbunden, 3=fehlgeschlagen)
//! - `pulse_producers_live` – Gauge: Lebende lokale Producer
//! - `pulse_consumers_live` – Gauge: Lebende Consumer
//! - `pulse_send_bitrate_bps` – Gauge: Aktuelle Sende-Bitrate
//! - `pulse_receive_bitrate_bps` – Gauge: Aktuelle Empfangs-Bitrate
//! - `pulse_bytes_sent_total` – Gauge: Gesendete Bytes laut Transport
//! - `pulse_bytes_received_total` – Gauge: Empfangene Bytes laut Transport
//! - `pulse_hot_swaps_total` – Counter: Geraetewechsel waehrend eines Anrufs (kind)
//! - `pulse_transients_total` – Counter: Abgespielte Soundpad-Transienten
//!
//! Die Registry ist pro Instanz, nicht global. Mehrere Controller im selben
//! Prozess (z.B. in Tests) kollidieren dadurch nicht.

use anyhow::Result;
use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Alle Prometheus-Metriken einer Voice-Session
#[derive(Clone)]
pub struct SessionMetriken {
    pub registry: Arc<Registry>,

    pub session_status: IntGauge,
    pub producers_live: IntGauge,
    pub consumers_live: IntGauge,
    pub send_bitrate_bps: Gauge,
    pub receive_bitrate_bps: Gauge,
    pub bytes_sent_total: Gauge,
    pub bytes_received_total: Gauge,
    pub hot_swaps_total: IntCounterVec,
    pub transients_total: IntCounter,
}

impl SessionMetriken {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let session_status = IntGauge::with_opts(Opts::new(
            "pulse_session_status",
            "Verbindungsstatus der Voice-Session (0-3)",
        ))?;
        registry.register(Box::new(session_status.clone()))?;

        let producers_live = IntGauge::with_opts(Opts::new(
            "pulse_producers_live",
            "Anzahl lebender lokaler Producer",
        ))?;
        registry.register(Box::new(producers_live.clone()))?;

        let consumers_live = IntGauge::with_opts(Opts::new(
            "pulse_consumers_live",
            "Anzahl lebender Consumer",
        ))?;
        registry.register(Box::new(consumers_live.clone()))?;

        let send_bitrate_bps = Gauge::with_opts(Opts::new(
            "pulse_send_bitrate_bps",
            "Aktuelle Sende-Bitrate in Bits pro Sekunde",
        ))?;
        registry.register(Box::new(send_bitrate_bps.clone()))?;

        let receive_bitrate_bps = Gauge::with_opts(Opts::new(
            "pulse_receive_bitrate_bps",
            "Aktuelle Empfangs-Bitrate in Bits pro Sekunde",
        ))?;
        registry.register(Box::new(receive_bitrate_bps.clone()))?;

        let bytes_sent_total = Gauge::with_opts(Opts::new(
            "pulse_bytes_sent_total",
            "Gesendete Bytes laut Sende-Transport",
        ))?;
        registry.register(Box::new(bytes_sent_total.clone()))?;

        let bytes_received_total = Gauge::with_opts(Opts::new(
            "pulse_bytes_received_total",
            "Empfangene Bytes laut Empfangs-Transport",
        ))?;
        registry.register(Box::new(bytes_received_total.clone()))?;

        let hot_swaps_total = IntCounterVec::new(
            Opts::new(
                "pulse_hot_swaps_total",
                "Geraetewechsel waehrend einer aktiven Session",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(hot_swaps_total.clone()))?;

        let transients_total = IntCounter::with_opts(Opts::new(
            "pulse_transients_total",
            "Abgespielte Soundpad-Transienten",
        ))?;
        registry.register(Box::new(transients_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            session_status,
            producers_live,
            consumers_live,
            send_bitrate_bps,
            receive_bitrate_bps,
            bytes_sent_total,
            bytes_received_total,
            hot_swaps_total,
            transients_total,
        })
    }

    /// Setzt alle Momentanwerte zurueck (bei Session-Ende)
    pub fn zuruecksetzen(&self) {
        self.producers_live.set(0);
        self.consumers_live.set(0);
        self.send_bitrate_bps.set(0.0);
        self.receive_bitrate_bps.set(0.0);
        self.bytes_sent_total.set(0.0);
        self.bytes_received_total.set(0.0);
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
