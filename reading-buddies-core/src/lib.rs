//! Reading Buddies core library
//!
//! This crate provides the engine behind reading-companion characters:
//! egg progress tracking, the accessory inventory, voice lines, the buddy
//! state machine over an animation engine, and analytics batching. Storage,
//! asset fetching, audio output and animation are reached through traits so
//! hosts can plug in their own platform.

pub mod analytics;
pub mod animation;
pub mod assets;
pub mod audio;
pub mod buddy;
pub mod config;
pub mod error;
pub mod event;
pub mod inventory;
pub mod listeners;
pub mod model;
pub mod progress;
pub mod session;
pub mod store;

pub use analytics::{Analytics, AnalyticsConfig, AnalyticsConfigUpdate, AnalyticsTransport};
pub use animation::{
    AnimationEngine, AnimationHandle, AnimationLoader, EngineInstance, InputKind, LoadRequest,
};
pub use assets::{AssetSource, FsAssetSource, MemoryAssets};
pub use audio::{AudioBackend, AudioController, AudioHandle, AudioSettings};
pub use buddy::BuddyController;
pub use config::Config;
pub use error::{Error, Result};
pub use event::{channel, Event, EventKind, EventReceiver, EventSender};
pub use inventory::{AccessoryInventory, Inventory, UnlockProgress};
pub use listeners::Subscription;
pub use model::{
    AccessoryCategory, AccessoryConfig, BuddyConfig, BuddyState, CharacterType, Gesture, Rarity,
};
pub use progress::{ProgressRecord, ProgressTracker};
pub use session::BuddySession;
pub use store::{FileStore, KeyValueStore, MemoryStore};
