//! Voice lines and sound effects.
//!
//! Audio is a non-critical enhancement: every playback and decode failure
//! is logged and swallowed. Decoding and output go through an
//! [`AudioBackend`]; clip bytes come from the [`AssetSource`].

use crate::assets::{fetch_json, AssetSource};
use crate::config::{Config, DEFAULT_LOCALE};
use crate::error::{Error, Result};
use crate::event::{Event, EventSender};
use crate::listeners::{Listeners, Subscription};
use crate::model::{AudioClip, Gesture};
use crate::store::{keys, read_json, write_json, KeyValueStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Subject whose clips are used when a subject has none of its own.
pub const DEFAULT_SUBJECT: &str = "default";

/// Default playback volume.
const DEFAULT_VOLUME: f32 = 0.7;

/// Opaque handle to a decoded buffer, issued by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioHandle(pub u64);

/// Platform audio graph.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Open or resume the graph.
    async fn resume(&self) -> Result<()> {
        Ok(())
    }

    /// Decode encoded audio into a playable buffer.
    async fn decode(&self, bytes: Vec<u8>) -> Result<AudioHandle>;

    /// Start playing a buffer at `volume` (0 to 1).
    fn play(&self, buffer: AudioHandle, volume: f32) -> Result<()>;

    /// Close the graph and release decoded buffers.
    fn close(&self);

    /// Whether the platform has muted audio for this app.
    fn system_muted(&self) -> bool {
        false
    }
}

/// Process-wide playback settings, persisted under [`keys::AUDIO_SETTINGS`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSettings {
    pub enabled: bool,
    pub volume: f32,
    pub muted_by_system: bool,
    pub voice_lines_enabled: bool,
    pub sfx_enabled: bool,
    pub current_locale: String,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            volume: DEFAULT_VOLUME,
            muted_by_system: false,
            voice_lines_enabled: true,
            sfx_enabled: true,
            current_locale: DEFAULT_LOCALE.to_string(),
        }
    }
}

/// Plays gesture voice lines and sound effects, caching decoded buffers by
/// file path.
pub struct AudioController {
    backend: Arc<dyn AudioBackend>,
    assets: Arc<dyn AssetSource>,
    store: Arc<dyn KeyValueStore>,
    events: EventSender,
    audio_index_path: String,
    fallback_locale: String,
    settings: AudioSettings,
    clips: HashMap<String, Vec<AudioClip>>,
    buffers: HashMap<String, AudioHandle>,
    graph_open: bool,
    listeners: Listeners<AudioSettings>,
}

fn fallback_clips() -> HashMap<String, Vec<AudioClip>> {
    let clips = vec![
        AudioClip {
            gesture: Gesture::Wave,
            file_path: "/public/assets/audio/wave.mp3".to_string(),
            locale: DEFAULT_LOCALE.to_string(),
            transcript: "Hello there!".to_string(),
        },
        AudioClip {
            gesture: Gesture::Cheer,
            file_path: "/public/assets/audio/cheer.mp3".to_string(),
            locale: DEFAULT_LOCALE.to_string(),
            transcript: "Great job!".to_string(),
        },
    ];
    HashMap::from([(DEFAULT_SUBJECT.to_string(), clips)])
}

impl AudioController {
    /// Create a controller with persisted settings merged over the defaults.
    ///
    /// Nothing plays until [`initialize`](Self::initialize) opens the graph.
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        assets: Arc<dyn AssetSource>,
        store: Arc<dyn KeyValueStore>,
        events: EventSender,
        config: &Config,
    ) -> Self {
        let defaults = AudioSettings {
            current_locale: config.default_locale.clone(),
            ..AudioSettings::default()
        };
        let mut settings = load_settings(store.as_ref(), defaults);
        if backend.system_muted() {
            settings.muted_by_system = true;
        }

        Self {
            backend,
            assets,
            store,
            events,
            audio_index_path: config.audio_index_path.clone(),
            fallback_locale: config.default_locale.clone(),
            settings,
            clips: HashMap::new(),
            buffers: HashMap::new(),
            graph_open: false,
            listeners: Listeners::new(),
        }
    }

    /// Open the audio graph and load the audio index.
    ///
    /// If the graph cannot be opened, audio is disabled for the session.
    pub async fn initialize(&mut self) {
        if !self.graph_open {
            if let Err(e) = self.backend.resume().await {
                error!(error = %e, "failed to initialize audio");
                self.settings.enabled = false;
                self.listeners.notify(&self.settings);
                return;
            }
            self.graph_open = true;
        }

        self.clips = match fetch_json::<HashMap<String, Vec<AudioClip>>>(
            self.assets.as_ref(),
            &self.audio_index_path,
        )
        .await
        {
            Ok(clips) => clips,
            Err(e) => {
                warn!(error = %e, "no usable audio index, using fallback clips");
                fallback_clips()
            }
        };
    }

    /// Register a listener called with the settings after every change.
    pub fn subscribe(
        &self,
        listener: impl Fn(&AudioSettings) + Send + Sync + 'static,
    ) -> Subscription {
        self.listeners.subscribe(listener)
    }

    /// Play the voice line for a gesture.
    ///
    /// Looks for a clip in the current locale, then in the fallback locale.
    /// Subjects without clips use the default subject's clips.
    pub async fn play_gesture_audio(&mut self, subject_id: &str, gesture: Gesture) {
        if !self.settings.enabled || !self.settings.voice_lines_enabled {
            return;
        }

        let Some(clip) = self.find_clip(subject_id, gesture) else {
            debug!(subject_id, %gesture, "no voice line for gesture");
            return;
        };

        if self.play_file(&clip.file_path).await {
            self.events.emit(Event::announcement(clip.transcript));
        }
    }

    /// Play a sound effect by path.
    pub async fn play_sfx(&mut self, path: &str) {
        if !self.settings.enabled || !self.settings.sfx_enabled {
            return;
        }
        self.play_file(path).await;
    }

    /// Transcript of the voice line that would play for a gesture.
    pub fn transcript(&self, subject_id: &str, gesture: Gesture) -> Option<String> {
        self.find_clip(subject_id, gesture)
            .map(|clip| clip.transcript)
    }

    /// Decode every clip of a subject in the current locale.
    ///
    /// Decodes run concurrently; individual failures are ignored.
    pub async fn preload(&mut self, subject_id: &str) {
        if !self.graph_open {
            debug!(subject_id, "audio graph closed, skipping preload");
            return;
        }
        let Some(clips) = self.clips.get(subject_id) else {
            return;
        };

        let mut decodes = JoinSet::new();
        for clip in clips {
            if clip.locale != self.settings.current_locale
                || self.buffers.contains_key(&clip.file_path)
            {
                continue;
            }
            let path = clip.file_path.clone();
            let assets = Arc::clone(&self.assets);
            let backend = Arc::clone(&self.backend);
            decodes.spawn(async move {
                let decoded = match assets.fetch(&path).await {
                    Ok(bytes) => backend.decode(bytes).await,
                    Err(e) => Err(e),
                };
                (path, decoded)
            });
        }

        while let Some(joined) = decodes.join_next().await {
            match joined {
                Ok((path, Ok(buffer))) => {
                    self.buffers.insert(path, buffer);
                }
                Ok((path, Err(e))) => {
                    error!(path = %path, error = %e, "failed to preload audio");
                }
                Err(e) => error!(error = %e, "audio preload task failed"),
            }
        }
    }

    /// Set the volume, clamped to 0..=1.
    pub fn set_volume(&mut self, volume: f32) {
        if volume.is_nan() {
            warn!("ignoring NaN volume");
            return;
        }
        self.settings.volume = volume.clamp(0.0, 1.0);
        self.commit();
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
        self.commit();
    }

    pub fn set_voice_lines_enabled(&mut self, enabled: bool) {
        self.settings.voice_lines_enabled = enabled;
        self.commit();
    }

    pub fn set_sfx_enabled(&mut self, enabled: bool) {
        self.settings.sfx_enabled = enabled;
        self.commit();
    }

    pub fn set_locale(&mut self, locale: impl Into<String>) {
        self.settings.current_locale = locale.into();
        self.commit();
    }

    /// Current settings.
    pub fn settings(&self) -> &AudioSettings {
        &self.settings
    }

    /// Whether a decoded buffer is cached for `path`.
    pub fn is_cached(&self, path: &str) -> bool {
        self.buffers.contains_key(path)
    }

    /// Drop cached buffers and close the audio graph.
    pub fn cleanup(&mut self) {
        self.buffers.clear();
        if self.graph_open {
            self.backend.close();
            self.graph_open = false;
        }
    }

    fn find_clip(&self, subject_id: &str, gesture: Gesture) -> Option<AudioClip> {
        let clips = self
            .clips
            .get(subject_id)
            .or_else(|| self.clips.get(DEFAULT_SUBJECT))?;

        let in_locale = |locale: &str| {
            clips
                .iter()
                .find(|c| c.gesture == gesture && c.locale == locale)
        };

        in_locale(&self.settings.current_locale)
            .or_else(|| in_locale(&self.fallback_locale))
            .cloned()
    }

    async fn play_file(&mut self, path: &str) -> bool {
        if !self.graph_open || !self.settings.enabled {
            return false;
        }

        let buffer = match self.buffers.get(path) {
            Some(buffer) => *buffer,
            None => match self.load_buffer(path).await {
                Ok(buffer) => buffer,
                Err(e) => {
                    error!(path, error = %e, "failed to load audio buffer");
                    return false;
                }
            },
        };

        match self.backend.play(buffer, self.settings.volume) {
            Ok(()) => true,
            Err(e) => {
                error!(path, error = %e, "failed to play audio file");
                false
            }
        }
    }

    async fn load_buffer(&mut self, path: &str) -> Result<AudioHandle> {
        if !self.graph_open {
            return Err(Error::audio("audio graph not initialized"));
        }
        let bytes = self.assets.fetch(path).await?;
        let buffer = self.backend.decode(bytes).await?;
        self.buffers.insert(path.to_string(), buffer);
        Ok(buffer)
    }

    fn commit(&self) {
        if let Err(e) = write_json(self.store.as_ref(), keys::AUDIO_SETTINGS, &self.settings) {
            error!(error = %e, "failed to save audio settings");
        }
        self.listeners.notify(&self.settings);
    }
}

/// Overlay stored fields onto `defaults`; unknown or malformed data leaves
/// the defaults in place.
fn load_settings(store: &dyn KeyValueStore, defaults: AudioSettings) -> AudioSettings {
    let saved = match read_json::<serde_json::Value>(store, keys::AUDIO_SETTINGS) {
        Ok(Some(serde_json::Value::Object(saved))) => saved,
        Ok(_) => return defaults,
        Err(e) => {
            error!(error = %e, "failed to load audio settings");
            return defaults;
        }
    };

    let mut merged = match serde_json::to_value(&defaults) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => return defaults,
    };
    merged.extend(saved);

    serde_json::from_value(serde_json::Value::Object(merged)).unwrap_or_else(|e| {
        error!(error = %e, "stored audio settings are malformed");
        defaults
    })
}

impl std::fmt::Debug for AudioController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioController")
            .field("settings", &self.settings)
            .field("buffers", &self.buffers.len())
            .field("graph_open", &self.graph_open)
            .finish_non_exhaustive()
    }
}
