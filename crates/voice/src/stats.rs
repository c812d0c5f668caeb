//! Verbindungsstatistik der Session
//!
//! Fragt in festem Intervall die Byte-Zaehler beider Transporte ab und
//! leitet daraus die aktuelle und die gleitend gemittelte Bitrate ab.
//! Fehlende Transporte (Teardown-Race) und Abfragefehler werden toleriert:
//! Telemetrie darf die Verbindung nie beeinflussen.
//!
//! Der aktuelle Stand ist ueber einen `watch`-Kanal beobachtbar.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pulse_observability::SessionMetriken;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::config::StatistikEinstellungen;
use crate::consumer::{ConsumerInfo, ConsumerRegistry};
use crate::producer::{ProducerInfo, ProducerRegistry};
use crate::transport::TransportManager;

/// Momentaufnahme der Verbindungsstatistik
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerbindungsStatistik {
    pub producers: Vec<ProducerInfo>,
    pub consumers: Vec<ConsumerInfo>,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    /// Bitraten in Bits pro Sekunde
    pub current_bitrate_send: u64,
    pub current_bitrate_receive: u64,
    pub average_bitrate_send: u64,
    pub average_bitrate_receive: u64,
    pub is_monitoring: bool,
    pub zeitstempel: DateTime<Utc>,
}

struct Messung {
    gesendet: u64,
    empfangen: u64,
    zeitpunkt: Instant,
}

#[derive(Default)]
struct Verlauf {
    letzte: Option<Messung>,
    senden: VecDeque<u64>,
    empfangen: VecDeque<u64>,
}

struct MonitorInner {
    intervall: Duration,
    fenster: usize,
    metriken: Option<SessionMetriken>,
    verlauf: Mutex<Verlauf>,
    stand: watch::Sender<VerbindungsStatistik>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Periodische Abfrage der Transport-Zaehler
#[derive(Clone)]
pub struct StatsMonitor {
    inner: Arc<MonitorInner>,
}

impl StatsMonitor {
    pub fn neu(cfg: &StatistikEinstellungen, metriken: Option<SessionMetriken>) -> Self {
        let (stand, _) = watch::channel(VerbindungsStatistik::default());
        Self {
            inner: Arc::new(MonitorInner {
                intervall: cfg.intervall(),
                fenster: cfg.fenster.max(1),
                metriken,
                verlauf: Mutex::new(Verlauf::default()),
                stand,
                task: Mutex::new(None),
            }),
        }
    }

    /// Startet die periodische Abfrage; ein laufender Task wird ersetzt
    pub fn starten(
        &self,
        transports: Arc<TransportManager>,
        producers: Arc<ProducerRegistry>,
        consumers: Arc<ConsumerRegistry>,
    ) {
        self.task_abbrechen();
        self.inner.stand.send_modify(|s| s.is_monitoring = true);

        let monitor = self.clone();
        let handle = tokio::spawn(async move {
            let mut takt = tokio::time::interval(monitor.inner.intervall);
            takt.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                takt.tick().await;
                monitor.abfragen(&transports, &producers, &consumers).await;
            }
        });
        *self.inner.task.lock() = Some(handle);
        debug!(intervall_ms = self.inner.intervall.as_millis() as u64, "Statistik-Abfrage gestartet");
    }

    /// Eine einzelne Abfrage aller Zaehler
    pub async fn abfragen(
        &self,
        transports: &TransportManager,
        producers: &ProducerRegistry,
        consumers: &ConsumerRegistry,
    ) -> VerbindungsStatistik {
        let gesendet = match transports.sende_transport() {
            Some(t) => match t.stats().await {
                Ok(s) => Some(s.bytes_sent),
                Err(e) => {
                    trace!("Sende-Statistik nicht verfuegbar: {}", e);
                    None
                }
            },
            None => None,
        };
        let empfangen = match transports.empfangs_transport() {
            Some(t) => match t.stats().await {
                Ok(s) => Some(s.bytes_received),
                Err(e) => {
                    trace!("Empfangs-Statistik nicht verfuegbar: {}", e);
                    None
                }
            },
            None => None,
        };

        let producer_infos = producers.schnappschuss().await;
        let consumer_infos = consumers.schnappschuss();
        self.messung_verarbeiten(gesendet, empfangen, Instant::now(), producer_infos, consumer_infos)
    }

    fn messung_verarbeiten(
        &self,
        gesendet: Option<u64>,
        empfangen: Option<u64>,
        jetzt: Instant,
        producers: Vec<ProducerInfo>,
        consumers: Vec<ConsumerInfo>,
    ) -> VerbindungsStatistik {
        let mut verlauf = self.inner.verlauf.lock();

        let (gesendet, empfangen, bps_senden, bps_empfangen) = match &verlauf.letzte {
            Some(letzte) => {
                let gesendet = gesendet.unwrap_or(letzte.gesendet);
                let empfangen = empfangen.unwrap_or(letzte.empfangen);
                let sekunden = jetzt.duration_since(letzte.zeitpunkt).as_secs_f64();
                if sekunden > 0.0 {
                    let bps = |neu: u64, vorher: u64| {
                        (neu.saturating_sub(vorher) as f64 * 8.0 / sekunden).round() as u64
                    };
                    (
                        gesendet,
                        empfangen,
                        bps(gesendet, letzte.gesendet),
                        bps(empfangen, letzte.empfangen),
                    )
                } else {
                    (gesendet, empfangen, 0, 0)
                }
            }
            None => (gesendet.unwrap_or(0), empfangen.unwrap_or(0), 0, 0),
        };

        let erste_messung = verlauf.letzte.is_none();
        verlauf.letzte = Some(Messung {
            gesendet,
            empfangen,
            zeitpunkt: jetzt,
        });
        if !erste_messung {
            verlauf.senden.push_back(bps_senden);
            verlauf.empfangen.push_back(bps_empfangen);
            while verlauf.senden.len() > self.inner.fenster {
                verlauf.senden.pop_front();
            }
            while verlauf.empfangen.len() > self.inner.fenster {
                verlauf.empfangen.pop_front();
            }
        }
        let durchschnitt = |werte: &VecDeque<u64>| {
            if werte.is_empty() {
                0
            } else {
                werte.iter().sum::<u64>() / werte.len() as u64
            }
        };
        let average_send = durchschnitt(&verlauf.senden);
        let average_receive = durchschnitt(&verlauf.empfangen);
        drop(verlauf);

        let stand = VerbindungsStatistik {
            producers,
            consumers,
            total_bytes_sent: gesendet,
            total_bytes_received: empfangen,
            current_bitrate_send: bps_senden,
            current_bitrate_receive: bps_empfangen,
            average_bitrate_send: average_send,
            average_bitrate_receive: average_receive,
            is_monitoring: self.inner.stand.borrow().is_monitoring,
            zeitstempel: Utc::now(),
        };
        trace!(
            senden_bps = stand.current_bitrate_send,
            empfangen_bps = stand.current_bitrate_receive,
            "Statistik aktualisiert"
        );

        if let Some(m) = &self.inner.metriken {
            m.producers_live.set(stand.producers.len() as i64);
            m.consumers_live.set(stand.consumers.len() as i64);
            m.send_bitrate_bps.set(stand.current_bitrate_send as f64);
            m.receive_bitrate_bps.set(stand.current_bitrate_receive as f64);
            m.bytes_sent_total.set(stand.total_bytes_sent as f64);
            m.bytes_received_total.set(stand.total_bytes_received as f64);
        }

        self.inner.stand.send_replace(stand.clone());
        stand
    }

    fn task_abbrechen(&self) -> bool {
        match self.inner.task.lock().take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Stoppt die Abfrage; der letzte Stand bleibt lesbar
    pub fn stoppen(&self) {
        if self.task_abbrechen() {
            debug!("Statistik-Abfrage gestoppt");
        }
        self.inner.stand.send_modify(|s| s.is_monitoring = false);
    }

    /// Verwirft Verlauf und Stand
    pub fn zuruecksetzen(&self) {
        *self.inner.verlauf.lock() = Verlauf::default();
        self.inner.stand.send_replace(VerbindungsStatistik {
            is_monitoring: self.inner.task.lock().is_some(),
            ..Default::default()
        });
        if let Some(m) = &self.inner.metriken {
            m.zuruecksetzen();
        }
    }

    pub fn aktuell(&self) -> VerbindungsStatistik {
        self.inner.stand.borrow().clone()
    }

    pub fn beobachten(&self) -> watch::Receiver<VerbindungsStatistik> {
        self.inner.stand.subscribe()
    }

    pub fn ist_aktiv(&self) -> bool {
        self.inner.task.lock().is_some()
    }
}
