//! Buddy controller.
//!
//! Owns the lifecycle of the loaded character:
//! `Egg -> Hatching -> Active`, with `cleanup()` returning to `Egg`.
//! The hatch transition runs on a spawned timer task that `cleanup()`
//! aborts.

use crate::animation::{AnimationHandle, AnimationLoader, LoadRequest};
use crate::assets::{fetch_json, AssetSource};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::{EventKind, EventSender};
use crate::listeners::{Listeners, Subscription};
use crate::model::{
    AccessoryConfig, BuddyConfig, BuddyState, CharacterType, Gesture, InteractionEvent,
    MultiCharacterConfig,
};
use chrono::Utc;
use serde_json::json;
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Window used by [`BuddyController::interaction_count`] callers that have
/// no better one.
pub const DEFAULT_INTERACTION_WINDOW: Duration = Duration::from_secs(60 * 60);

#[derive(Default)]
struct BuddyInner {
    state: BuddyState,
    buddy: Option<BuddyConfig>,
    shared: Option<MultiCharacterConfig>,
    handle: Option<AnimationHandle>,
    equipped: BTreeSet<String>,
    interactions: VecDeque<InteractionEvent>,
    hatch_timer: Option<JoinHandle<()>>,
    /// Bumped by every cleanup so a stale hatch timer can tell it lost.
    generation: u64,
}

fn lock(inner: &Mutex<BuddyInner>) -> MutexGuard<'_, BuddyInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives one animated character.
pub struct BuddyController {
    inner: Arc<Mutex<BuddyInner>>,
    animations: Arc<AnimationLoader>,
    assets: Arc<dyn AssetSource>,
    events: EventSender,
    config: Config,
    listeners: Listeners<BuddyState>,
}

impl BuddyController {
    pub fn new(
        animations: Arc<AnimationLoader>,
        assets: Arc<dyn AssetSource>,
        events: EventSender,
        config: Config,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BuddyInner::default())),
            animations,
            assets,
            events,
            config,
            listeners: Listeners::new(),
        }
    }

    /// Register a listener called on every state change.
    pub fn subscribe(
        &self,
        listener: impl Fn(&BuddyState) + Send + Sync + 'static,
    ) -> Subscription {
        self.listeners.subscribe(listener)
    }

    /// Load a character by id.
    ///
    /// A missing or malformed character config is replaced by the built-in
    /// fallback.
    ///
    /// # Errors
    ///
    /// Returns the animation engine's error if the artboard cannot be
    /// loaded. The state is left unchanged in that case.
    pub async fn load(&self, subject_id: &str) -> Result<()> {
        let path = self.config.buddy_config_path(subject_id);
        let buddy = match fetch_json::<BuddyConfig>(self.assets.as_ref(), &path).await {
            Ok(buddy) => buddy,
            Err(e) => {
                error!(subject_id, error = %e, "failed to fetch buddy config, using fallback");
                BuddyConfig::fallback(subject_id)
            }
        };
        self.load_config(buddy).await
    }

    /// Load a character from an already resolved config.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub async fn load_config(&self, buddy: BuddyConfig) -> Result<()> {
        self.ensure_shared_config(&buddy).await;

        let request = LoadRequest::new(buddy.riv_file_path.as_str())
            .artboard(buddy.artboard_name.as_str())
            .state_machine(buddy.state_machine_name.as_str())
            .autoplay(true);
        let handle = self.animations.load(request).await.inspect_err(|e| {
            error!(subject_id = %buddy.id, error = %e, "failed to load buddy");
        })?;

        info!(subject_id = %buddy.id, artboard = %buddy.artboard_name, "buddy loaded");
        {
            let mut inner = lock(&self.inner);
            inner.buddy = Some(buddy);
            inner.handle = Some(handle);
            inner.state = BuddyState::Active;
        }
        self.listeners.notify(&BuddyState::Active);
        Ok(())
    }

    /// Play a gesture on the loaded character.
    ///
    /// A no-op unless the character is `Active`.
    pub fn trigger(&self, gesture: Gesture) {
        let (handle, subject_id) = {
            let mut inner = lock(&self.inner);
            let (Some(handle), Some(buddy)) = (inner.handle.clone(), inner.buddy.as_ref()) else {
                warn!(%gesture, "cannot trigger gesture: buddy not loaded");
                return;
            };
            if inner.state != BuddyState::Active {
                warn!(%gesture, state = %inner.state, "cannot trigger gesture: buddy not active");
                return;
            }
            let subject_id = buddy.id.clone();

            inner.interactions.push_back(InteractionEvent {
                subject_id: subject_id.clone(),
                gesture,
                timestamp: Utc::now(),
            });
            let limit = self.config.interaction_history_limit;
            while inner.interactions.len() > limit {
                inner.interactions.pop_front();
            }
            (handle, subject_id)
        };

        handle.trigger(gesture.as_str());
        self.events.analytics(
            EventKind::GestureTriggered,
            json!({ "buddyId": subject_id, "gesture": gesture }),
        );
    }

    /// Toggle a compatible accessory on the loaded character.
    pub fn equip(&self, accessory_id: &str) {
        let (subject_id, equipped) = {
            let mut inner = lock(&self.inner);
            let Some(buddy) = inner.buddy.as_ref() else {
                warn!(accessory_id, "cannot equip accessory: buddy not loaded");
                return;
            };
            if buddy.accessory(accessory_id).is_none() {
                warn!(accessory_id, subject_id = %buddy.id, "accessory not compatible with buddy");
                return;
            }
            let subject_id = buddy.id.clone();

            let equipped = if inner.equipped.remove(accessory_id) {
                false
            } else {
                inner.equipped.insert(accessory_id.to_string());
                true
            };
            (subject_id, equipped)
        };

        self.events.analytics(
            EventKind::AccessoryEquipped,
            json!({ "accessoryId": accessory_id, "buddyId": subject_id, "equipped": equipped }),
        );
    }

    /// Start hatching the egg.
    ///
    /// Moves to `Hatching` now and to `Active` after the configured delay,
    /// unless `cleanup()` runs first. Must be called within a Tokio runtime.
    pub fn hatch(&self) {
        let (handle, generation) = {
            let mut inner = lock(&self.inner);
            if inner.state != BuddyState::Egg {
                warn!(state = %inner.state, "cannot hatch: buddy is not an egg");
                return;
            }
            inner.state = BuddyState::Hatching;
            (inner.handle.clone(), inner.generation)
        };
        self.listeners.notify(&BuddyState::Hatching);

        if let Some(handle) = handle {
            handle.trigger(Gesture::Hatch.as_str());
        }

        let inner = Arc::clone(&self.inner);
        let listeners = self.listeners.clone();
        let events = self.events.clone();
        let delay = self.config.hatch_delay;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let subject_id = {
                let mut inner = lock(&inner);
                if inner.generation != generation || inner.state != BuddyState::Hatching {
                    return;
                }
                inner.state = BuddyState::Active;
                inner.hatch_timer = None;
                inner.buddy.as_ref().map(|b| b.id.clone())
            };
            listeners.notify(&BuddyState::Active);
            if let Some(subject_id) = subject_id {
                events.analytics(EventKind::BuddyHatched, json!({ "buddyId": subject_id }));
            }
        });

        let mut inner = lock(&self.inner);
        if let Some(previous) = inner.hatch_timer.replace(timer) {
            previous.abort();
        }
    }

    /// Switch the shared animation file to another character variant.
    ///
    /// # Errors
    ///
    /// `Error::NotLoaded` without a loaded character, `Error::NoSharedConfig`
    /// if the shared config was never loaded, `Error::UnknownVariant` if the
    /// variant has no artboard mapping, or the engine's load error.
    pub async fn switch_character(&self, variant: CharacterType) -> Result<()> {
        let buddy = {
            let inner = lock(&self.inner);
            let Some(shared) = inner.shared.as_ref() else {
                return Err(Error::NoSharedConfig);
            };
            let Some(mapping) = shared.characters.get(&variant) else {
                return Err(Error::unknown_variant(variant.as_str()));
            };
            let Some(current) = inner.buddy.as_ref() else {
                return Err(Error::NotLoaded);
            };

            let mut buddy = current.clone();
            buddy.character_type = Some(variant);
            buddy.artboard_name = mapping.artboard_name.clone();
            buddy.state_machine_name = mapping.state_machine_name.clone();
            buddy.riv_file_path = shared.file_path.clone();
            buddy
        };

        debug!(%variant, artboard = %buddy.artboard_name, "switching character");
        self.cleanup();
        self.load_config(buddy).await
    }

    /// Release the animation, cancel a pending hatch and reset to `Egg`.
    ///
    /// The shared multi-character config is kept.
    pub fn cleanup(&self) {
        let (handle, timer) = {
            let mut inner = lock(&self.inner);
            inner.generation += 1;
            inner.state = BuddyState::Egg;
            inner.buddy = None;
            inner.equipped.clear();
            inner.interactions.clear();
            (inner.handle.take(), inner.hatch_timer.take())
        };

        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(handle) = handle {
            handle.cleanup();
        }
        self.listeners.notify(&BuddyState::Egg);
    }

    pub fn state(&self) -> BuddyState {
        lock(&self.inner).state
    }

    /// Config of the loaded character.
    pub fn config(&self) -> Option<BuddyConfig> {
        lock(&self.inner).buddy.clone()
    }

    /// The shared multi-character config, once fetched.
    pub fn shared_config(&self) -> Option<MultiCharacterConfig> {
        lock(&self.inner).shared.clone()
    }

    /// Accessories currently worn, in the character's catalog order.
    pub fn equipped_accessories(&self) -> Vec<AccessoryConfig> {
        let inner = lock(&self.inner);
        let Some(buddy) = inner.buddy.as_ref() else {
            return Vec::new();
        };
        buddy
            .accessories
            .iter()
            .filter(|a| inner.equipped.contains(&a.id))
            .cloned()
            .collect()
    }

    /// The interaction log, oldest first.
    pub fn interactions(&self) -> Vec<InteractionEvent> {
        lock(&self.inner).interactions.iter().cloned().collect()
    }

    /// Number of interactions within the last `within`.
    pub fn interaction_count(&self, within: Duration) -> usize {
        let window = chrono::Duration::from_std(within).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        lock(&self.inner)
            .interactions
            .iter()
            .filter(|event| event.timestamp > cutoff)
            .count()
    }

    async fn ensure_shared_config(&self, buddy: &BuddyConfig) {
        if !self.config.is_shared_asset(&buddy.riv_file_path)
            || lock(&self.inner).shared.is_some()
        {
            return;
        }

        let path = &self.config.shared_config_path;
        match fetch_json::<MultiCharacterConfig>(self.assets.as_ref(), path).await {
            Ok(shared) => {
                debug!(
                    path = %path,
                    variants = shared.characters.len(),
                    "loaded shared character config"
                );
                lock(&self.inner).shared = Some(shared);
            }
            Err(e) => {
                error!(path = %path, error = %e, "multi-character support unavailable");
            }
        }
    }
}

impl Drop for BuddyController {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.inner).hatch_timer.take() {
            timer.abort();
        }
    }
}

impl std::fmt::Debug for BuddyController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("BuddyController")
            .field("state", &inner.state)
            .field("buddy", &inner.buddy.as_ref().map(|b| b.id.as_str()))
            .field("interactions", &inner.interactions.len())
            .finish_non_exhaustive()
    }
}
