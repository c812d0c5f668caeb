//! Medien-Tracks und -Streams
//!
//! Ein `MediaTrack` ist ein einzelner Audio- oder Video-Fluss mit stabiler
//! Identitaet. Audio-Tracks tragen ein `AudioFeed` (lock-free Ring-Buffer),
//! ueber das Samples von der Quelle zur Senke fliessen.
//!
//! ## Lebenszyklus
//! ```text
//! Live --stoppen()------------> Ended(Gestoppt)   (lokal, z.B. Kamera aus)
//! Live --extern_beendet()-----> Ended(Extern)     (Geraet entfernt, OS-Freigabe beendet)
//! ```
//! Nur `Extern` loest die Track-Ended-Behandlung der Registries aus.

use parking_lot::{Mutex, RwLock};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::types::TrackId;

// ---------------------------------------------------------------------------
// Grundtypen
// ---------------------------------------------------------------------------

/// Art eines Tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Grund fuer das Ende eines Tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndeGrund {
    /// Lokal gestoppt (Benutzer hat die Quelle abgeschaltet)
    Gestoppt,
    /// Von aussen beendet (Geraet entfernt, Berechtigung entzogen, OS-Leiste)
    Extern,
}

/// Zustand eines Tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Ended(EndeGrund),
}

/// Encoder-Hinweis fuer Video-Tracks
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ContentHint {
    #[default]
    Keiner,
    /// Bildrate vor Schaerfe (Bewegtbild)
    Motion,
    /// Schaerfe vor Bildrate (Text, Standbild)
    Detail,
}

/// Art der erfassten Oberflaeche bei Bildschirmfreigaben
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplaySurface {
    Monitor,
    Window,
    Browser,
}

// ---------------------------------------------------------------------------
// AudioFeed
// ---------------------------------------------------------------------------

/// Sample-Kanal eines Audio-Tracks (Single-Producer/Single-Consumer)
///
/// Beide Enden liegen hinter eigenen Mutexen, damit Quelle und Senke
/// unabhaengig voneinander schreiben und lesen koennen.
#[derive(Clone)]
pub struct AudioFeed {
    schreiber: Arc<Mutex<HeapProd<f32>>>,
    leser: Arc<Mutex<HeapCons<f32>>>,
}

impl AudioFeed {
    /// Erstellt einen neuen Feed mit Kapazitaet in Samples
    pub fn neu(kapazitaet: usize) -> Self {
        let rb = HeapRb::<f32>::new(kapazitaet.max(1));
        let (prod, cons) = rb.split();
        Self {
            schreiber: Arc::new(Mutex::new(prod)),
            leser: Arc::new(Mutex::new(cons)),
        }
    }

    /// Schreibt Samples; gibt die Anzahl tatsaechlich geschriebener Samples zurueck
    pub fn schreiben(&self, samples: &[f32]) -> usize {
        self.schreiber.lock().push_slice(samples)
    }

    /// Liest bis zu `ziel.len()` Samples; gibt die Anzahl gelesener Samples zurueck
    pub fn lesen(&self, ziel: &mut [f32]) -> usize {
        self.leser.lock().pop_slice(ziel)
    }

    /// Anzahl gepufferter Samples
    pub fn verfuegbar(&self) -> usize {
        self.leser.lock().occupied_len()
    }

    /// Verwirft alle gepufferten Samples
    pub fn leeren(&self) -> usize {
        self.leser.lock().clear()
    }
}

impl std::fmt::Debug for AudioFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFeed")
            .field("verfuegbar", &self.verfuegbar())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// MediaTrack
// ---------------------------------------------------------------------------

struct TrackInner {
    id: TrackId,
    kind: TrackKind,
    label: String,
    device_id: Option<String>,
    zustand: watch::Sender<TrackState>,
    aktiviert: AtomicBool,
    content_hint: Mutex<ContentHint>,
    display_surface: Option<DisplaySurface>,
    audio: Option<AudioFeed>,
}

/// Ein einzelner Medien-Track
///
/// Klone teilen denselben Zustand (Arc). Gleichheit ist Identitaet.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    /// Erstellt einen Audio-Track mit eigenem Sample-Kanal
    pub fn neu_audio(label: impl Into<String>, device_id: Option<String>, feed: AudioFeed) -> Self {
        Self::bauen(TrackKind::Audio, label.into(), device_id, None, Some(feed))
    }

    /// Erstellt einen Video-Track
    pub fn neu_video(label: impl Into<String>, device_id: Option<String>) -> Self {
        Self::bauen(TrackKind::Video, label.into(), device_id, None, None)
    }

    /// Erstellt einen Video-Track einer Bildschirmfreigabe
    pub fn neu_bildschirm(label: impl Into<String>, surface: DisplaySurface) -> Self {
        Self::bauen(TrackKind::Video, label.into(), None, Some(surface), None)
    }

    fn bauen(
        kind: TrackKind,
        label: String,
        device_id: Option<String>,
        display_surface: Option<DisplaySurface>,
        audio: Option<AudioFeed>,
    ) -> Self {
        let (zustand, _) = watch::channel(TrackState::Live);
        Self {
            inner: Arc::new(TrackInner {
                id: TrackId::new(),
                kind,
                label,
                device_id,
                zustand,
                aktiviert: AtomicBool::new(true),
                content_hint: Mutex::new(ContentHint::Keiner),
                display_surface,
                audio,
            }),
        }
    }

    pub fn id(&self) -> TrackId {
        self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Geraete-ID der Quelle (falls bekannt)
    pub fn device_id(&self) -> Option<&str> {
        self.inner.device_id.as_deref()
    }

    /// Erfasste Oberflaeche (nur Bildschirm-Tracks)
    pub fn display_surface(&self) -> Option<DisplaySurface> {
        self.inner.display_surface
    }

    /// Sample-Kanal (nur Audio-Tracks)
    pub fn audio_feed(&self) -> Option<&AudioFeed> {
        self.inner.audio.as_ref()
    }

    pub fn zustand(&self) -> TrackState {
        *self.inner.zustand.borrow()
    }

    pub fn ist_beendet(&self) -> bool {
        matches!(self.zustand(), TrackState::Ended(_))
    }

    /// Stoppt den Track lokal. Idempotent; gibt true beim ersten Aufruf zurueck.
    pub fn stoppen(&self) -> bool {
        self.beenden(EndeGrund::Gestoppt)
    }

    /// Markiert den Track als von aussen beendet (Geraet weg, OS-Freigabe beendet)
    pub fn extern_beendet(&self) -> bool {
        self.beenden(EndeGrund::Extern)
    }

    fn beenden(&self, grund: EndeGrund) -> bool {
        self.inner.zustand.send_if_modified(|z| {
            if *z == TrackState::Live {
                *z = TrackState::Ended(grund);
                true
            } else {
                false
            }
        })
    }

    /// Wartet bis der Track endet und liefert den Grund
    pub async fn beendet(&self) -> EndeGrund {
        let mut rx = self.inner.zustand.subscribe();
        loop {
            if let TrackState::Ended(grund) = *rx.borrow_and_update() {
                return grund;
            }
            if rx.changed().await.is_err() {
                return EndeGrund::Gestoppt;
            }
        }
    }

    /// Aktiviert/deaktiviert den Track (deaktivierte Tracks liefern Stille/Schwarz)
    pub fn set_aktiviert(&self, aktiviert: bool) {
        self.inner.aktiviert.store(aktiviert, Ordering::Relaxed);
    }

    pub fn ist_aktiviert(&self) -> bool {
        self.inner.aktiviert.load(Ordering::Relaxed)
    }

    pub fn content_hint(&self) -> ContentHint {
        *self.inner.content_hint.lock()
    }

    pub fn set_content_hint(&self, hint: ContentHint) {
        *self.inner.content_hint.lock() = hint;
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for MediaTrack {}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.label)
            .field("zustand", &self.zustand())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// MediaStream
// ---------------------------------------------------------------------------

/// Sammlung von Tracks aus einer Erfassung
#[derive(Clone)]
pub struct MediaStream {
    id: Uuid,
    tracks: Arc<RwLock<Vec<MediaTrack>>>,
}

impl MediaStream {
    pub fn neu(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tracks: Arc::new(RwLock::new(tracks)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.tracks.read().clone()
    }

    /// Erster Audio-Track
    pub fn audio_track(&self) -> Option<MediaTrack> {
        self.tracks
            .read()
            .iter()
            .find(|t| t.kind() == TrackKind::Audio)
            .cloned()
    }

    /// Erster Video-Track
    pub fn video_track(&self) -> Option<MediaTrack> {
        self.tracks
            .read()
            .iter()
            .find(|t| t.kind() == TrackKind::Video)
            .cloned()
    }

    pub fn track_hinzufuegen(&self, track: MediaTrack) {
        self.tracks.write().push(track);
    }

    /// Entfernt einen Track aus dem Stream (ohne ihn zu stoppen)
    pub fn track_entfernen(&self, track: &MediaTrack) -> bool {
        let mut tracks = self.tracks.write();
        let vorher = tracks.len();
        tracks.retain(|t| t != track);
        tracks.len() != vorher
    }

    /// Stoppt alle Tracks des Streams
    pub fn alle_stoppen(&self) {
        for track in self.tracks.read().iter() {
            track.stoppen();
        }
    }

    /// True wenn alle Tracks beendet sind (oder keine existieren)
    pub fn ist_beendet(&self) -> bool {
        self.tracks.read().iter().all(|t| t.ist_beendet())
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn audio_feed_schreiben_lesen() {
        let feed = AudioFeed::neu(8);
        assert_eq!(feed.schreiben(&[0.1, 0.2, 0.3]), 3);
        assert_eq!(feed.verfuegbar(), 3);

        let mut ziel = [0.0f32; 4];
        assert_eq!(feed.lesen(&mut ziel), 3);
        assert!((ziel[2] - 0.3).abs() < f32::EPSILON);
        assert_eq!(feed.verfuegbar(), 0);
    }

    #[test]
    fn audio_feed_ueberlauf_verwirft() {
        let feed = AudioFeed::neu(2);
        assert_eq!(feed.schreiben(&[1.0, 1.0, 1.0]), 2);
    }

    #[test]
    fn track_stoppen_idempotent() {
        let track = MediaTrack::neu_video("cam", None);
        assert!(!track.ist_beendet());
        assert!(track.stoppen());
        assert!(!track.stoppen(), "Zweites Stoppen darf nichts aendern");
        assert!(!track.extern_beendet(), "Gestoppter Track bleibt gestoppt");
        assert_eq!(track.zustand(), TrackState::Ended(EndeGrund::Gestoppt));
    }

    #[test]
    fn track_gleichheit_ist_identitaet() {
        let a = MediaTrack::neu_video("cam", None);
        let b = a.clone();
        let c = MediaTrack::neu_video("cam", None);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn track_beendet_liefert_grund() {
        let track = MediaTrack::neu_video("screen", None);
        let beobachter = track.clone();
        let handle = tokio::spawn(async move { beobachter.beendet().await });

        tokio::time::sleep(Duration::from_millis(5)).await;
        track.extern_beendet();

        let grund = handle.await.unwrap();
        assert_eq!(grund, EndeGrund::Extern);
    }

    #[test]
    fn stream_track_verwaltung() {
        let audio = MediaTrack::neu_audio("mic", None, AudioFeed::neu(16));
        let video = MediaTrack::neu_video("cam", None);
        let stream = MediaStream::neu(vec![audio.clone(), video.clone()]);

        assert_eq!(stream.audio_track(), Some(audio.clone()));
        assert_eq!(stream.video_track(), Some(video.clone()));

        assert!(stream.track_entfernen(&audio));
        assert!(stream.audio_track().is_none());

        stream.alle_stoppen();
        assert!(video.ist_beendet());
        assert!(stream.ist_beendet());
    }

    #[test]
    fn content_hint_setzen() {
        let track = MediaTrack::neu_bildschirm("screen", DisplaySurface::Monitor);
        assert_eq!(track.content_hint(), ContentHint::Keiner);
        track.set_content_hint(ContentHint::Motion);
        assert_eq!(track.content_hint(), ContentHint::Motion);
        assert_eq!(track.display_surface(), Some(DisplaySurface::Monitor));
    }
}
