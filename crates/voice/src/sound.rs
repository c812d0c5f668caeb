//! Soundpad-Dateien
//!
//! Liefert die Rohbytes einer Sounddatei; dekodiert wird im Audio-Graphen.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::VoiceResult;

#[async_trait]
pub trait SoundLibrary: Send + Sync {
    async fn fetch(&self, file_id: &str) -> VoiceResult<Bytes>;
}
