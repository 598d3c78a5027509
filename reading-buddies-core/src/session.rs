//! A buddy paired with its voice.

use crate::audio::AudioController;
use crate::buddy::BuddyController;
use crate::error::Result;
use crate::model::{BuddyState, Gesture};
use tracing::warn;

/// Keeps a [`BuddyController`] and an [`AudioController`] in step: loading
/// preloads the character's clips and every gesture plays its voice line.
#[derive(Debug)]
pub struct BuddySession {
    buddy: BuddyController,
    audio: AudioController,
    subject_id: Option<String>,
}

impl BuddySession {
    pub fn new(buddy: BuddyController, audio: AudioController) -> Self {
        Self {
            buddy,
            audio,
            subject_id: None,
        }
    }

    /// Load a character and preload its audio.
    ///
    /// # Errors
    ///
    /// Propagates the animation load error from [`BuddyController::load`].
    pub async fn load(&mut self, subject_id: &str) -> Result<()> {
        self.buddy.load(subject_id).await?;
        self.audio.preload(subject_id).await;
        self.subject_id = Some(subject_id.to_string());
        Ok(())
    }

    /// Trigger a gesture and play its voice line.
    pub async fn trigger_gesture(&mut self, gesture: Gesture) {
        let Some(subject_id) = self.subject_id.clone() else {
            warn!(%gesture, "cannot trigger gesture: buddy not loaded");
            return;
        };
        self.buddy.trigger(gesture);
        if self.buddy.state() == BuddyState::Active {
            self.audio.play_gesture_audio(&subject_id, gesture).await;
        }
    }

    /// Tear down the character and the audio graph.
    pub fn cleanup(&mut self) {
        self.buddy.cleanup();
        self.audio.cleanup();
        self.subject_id = None;
    }

    pub fn subject_id(&self) -> Option<&str> {
        self.subject_id.as_deref()
    }

    pub fn buddy(&self) -> &BuddyController {
        &self.buddy
    }

    pub fn audio(&self) -> &AudioController {
        &self.audio
    }

    pub fn audio_mut(&mut self) -> &mut AudioController {
        &mut self.audio
    }
}
