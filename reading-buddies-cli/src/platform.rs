//! Terminal stand-ins for the platform ports.
//!
//! There is no renderer or sound card behind the CLI: animations and audio
//! are validated against the asset directory and then reported through
//! `tracing`. Analytics batches are appended to a JSON-lines file.

use async_trait::async_trait;
use reading_buddies_core::analytics::AnalyticsBatch;
use reading_buddies_core::{
    AnalyticsTransport, AnimationEngine, AssetSource, AudioBackend, AudioHandle, EngineInstance,
    Error, Gesture, InputKind, LoadRequest, Result,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Engine that checks the animation file exists and exposes one trigger
/// input per gesture.
pub struct HeadlessEngine {
    assets: Arc<dyn AssetSource>,
}

impl HeadlessEngine {
    pub fn new(assets: Arc<dyn AssetSource>) -> Self {
        Self { assets }
    }
}

#[async_trait]
impl AnimationEngine for HeadlessEngine {
    async fn load(&self, request: &LoadRequest) -> Result<Box<dyn EngineInstance>> {
        let bytes = self
            .assets
            .fetch(&request.src)
            .await
            .map_err(|e| Error::animation_load(&request.src, e.to_string()))?;

        let artboard = request.artboard.as_deref().unwrap_or("default").to_string();
        info!(src = %request.src, artboard = %artboard, bytes = bytes.len(), "animation loaded");
        Ok(Box::new(HeadlessInstance { artboard }))
    }
}

struct HeadlessInstance {
    artboard: String,
}

impl EngineInstance for HeadlessInstance {
    fn input_kind(&self, name: &str) -> Option<InputKind> {
        name.parse::<Gesture>().ok().map(|_| InputKind::Trigger)
    }

    fn fire(&mut self, name: &str) {
        println!("  [{}] {}", self.artboard, name);
    }

    fn set_boolean(&mut self, name: &str, value: bool) {
        debug!(artboard = %self.artboard, input = name, value, "set boolean");
    }

    fn set_number(&mut self, name: &str, value: f64) {
        debug!(artboard = %self.artboard, input = name, value, "set number");
    }

    fn cleanup(&mut self) {
        debug!(artboard = %self.artboard, "animation released");
    }
}

/// Audio backend that "plays" by logging the clip size and volume.
#[derive(Default)]
pub struct LoggingAudioBackend {
    next: AtomicU64,
    sizes: Mutex<HashMap<AudioHandle, usize>>,
}

impl LoggingAudioBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AudioBackend for LoggingAudioBackend {
    async fn decode(&self, bytes: Vec<u8>) -> Result<AudioHandle> {
        if bytes.is_empty() {
            return Err(Error::audio("empty audio file"));
        }
        let handle = AudioHandle(self.next.fetch_add(1, Ordering::SeqCst));
        self.sizes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, bytes.len());
        Ok(handle)
    }

    fn play(&self, buffer: AudioHandle, volume: f32) -> Result<()> {
        let size = self
            .sizes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&buffer)
            .copied()
            .ok_or_else(|| Error::audio("unknown audio buffer"))?;
        info!(buffer = buffer.0, bytes = size, volume, "playing audio");
        Ok(())
    }

    fn close(&self) {
        self.sizes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Appends each batch as one JSON line to the file named by the endpoint.
pub struct FileTransport;

#[async_trait]
impl AnalyticsTransport for FileTransport {
    async fn send(&self, endpoint: &str, batch: &AnalyticsBatch) -> Result<()> {
        let path = endpoint.strip_prefix("file://").unwrap_or(endpoint);
        let mut line = serde_json::to_string(batch).map_err(|e| Error::transport(e.to_string()))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| Error::transport(format!("{}: {}", path, e)))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::transport(format!("{}: {}", path, e)))?;

        debug!(path, events = batch.events.len(), "analytics batch written");
        Ok(())
    }
}
