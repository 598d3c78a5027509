//! Shared data types: gestures, characters, accessories, eggs and audio clips.
//!
//! JSON field names follow the asset files (`camelCase`, kebab-case enum
//! values).

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// A discrete animated reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gesture {
    Wave,
    Jump,
    Sad,
    Cheer,
    Idle,
    Hatch,
}

impl Gesture {
    /// Every gesture.
    pub const ALL: [Gesture; 6] = [
        Gesture::Wave,
        Gesture::Jump,
        Gesture::Sad,
        Gesture::Cheer,
        Gesture::Idle,
        Gesture::Hatch,
    ];

    /// The state-machine input name for this gesture.
    pub fn as_str(&self) -> &'static str {
        match self {
            Gesture::Wave => "wave",
            Gesture::Jump => "jump",
            Gesture::Sad => "sad",
            Gesture::Cheer => "cheer",
            Gesture::Idle => "idle",
            Gesture::Hatch => "hatch",
        }
    }
}

/// Accessory slot categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessoryCategory {
    Hat,
    Glasses,
    Helmet,
    Costume,
}

impl AccessoryCategory {
    /// Every category.
    pub const ALL: [AccessoryCategory; 4] = [
        AccessoryCategory::Hat,
        AccessoryCategory::Glasses,
        AccessoryCategory::Helmet,
        AccessoryCategory::Costume,
    ];

    /// The wire name of this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessoryCategory::Hat => "hat",
            AccessoryCategory::Glasses => "glasses",
            AccessoryCategory::Helmet => "helmet",
            AccessoryCategory::Costume => "costume",
        }
    }
}

/// How rare an accessory is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    /// The wire name of this rarity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Rarity::Common => "common",
            Rarity::Rare => "rare",
            Rarity::Epic => "epic",
            Rarity::Legendary => "legendary",
        }
    }
}

/// Character variants available in the shared multi-character file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CharacterType {
    KittenNinja,
    PuppyWizard,
    BearKnight,
    DragonMage,
}

impl CharacterType {
    /// Every variant.
    pub const ALL: [CharacterType; 4] = [
        CharacterType::KittenNinja,
        CharacterType::PuppyWizard,
        CharacterType::BearKnight,
        CharacterType::DragonMage,
    ];

    /// The wire name of this variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            CharacterType::KittenNinja => "kitten-ninja",
            CharacterType::PuppyWizard => "puppy-wizard",
            CharacterType::BearKnight => "bear-knight",
            CharacterType::DragonMage => "dragon-mage",
        }
    }
}

impl FromStr for Gesture {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| Error::other(format!("unknown gesture '{}'", s)))
    }
}

impl FromStr for AccessoryCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::other(format!("unknown accessory category '{s}'")))
    }
}

impl FromStr for CharacterType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::unknown_variant(s))
    }
}

impl std::fmt::Display for Gesture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for AccessoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for CharacterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of the loaded character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuddyState {
    #[default]
    Egg,
    Hatching,
    Active,
    /// Reserved; no operation enters it yet.
    Sleeping,
}

impl std::fmt::Display for BuddyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BuddyState::Egg => "egg",
            BuddyState::Hatching => "hatching",
            BuddyState::Active => "active",
            BuddyState::Sleeping => "sleeping",
        };
        f.write_str(name)
    }
}

/// A catalog accessory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessoryConfig {
    pub id: String,
    pub name: String,
    pub category: AccessoryCategory,
    pub image_path: String,
    pub unlock_milestone: String,
    pub rarity: Rarity,
}

/// Per-character config as stored at `{buddy dir}/{id}/config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuddyConfig {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_type: Option<CharacterType>,
    pub artboard_name: String,
    pub state_machine_name: String,
    pub riv_file_path: String,
    pub audio_path: String,
    /// Accessories this character can wear.
    #[serde(default)]
    pub accessories: Vec<AccessoryConfig>,
    pub unlock_milestone: String,
    pub schema_version: String,
}

impl BuddyConfig {
    /// Config used when a character's config cannot be fetched.
    pub fn fallback(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: "Default Buddy".to_string(),
            character_type: None,
            artboard_name: "DefaultBuddy".to_string(),
            state_machine_name: "EmotionSM".to_string(),
            riv_file_path: "/rive/buddies.riv".to_string(),
            audio_path: "/public/assets/buddies/default/audio/".to_string(),
            accessories: Vec::new(),
            unlock_milestone: "default".to_string(),
            schema_version: "1.0.0".to_string(),
        }
    }

    /// Look up a compatible accessory.
    pub fn accessory(&self, id: &str) -> Option<&AccessoryConfig> {
        self.accessories.iter().find(|a| a.id == id)
    }
}

/// Artboard mapping for one variant of the shared file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterArtboard {
    pub artboard_name: String,
    pub state_machine_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_mappings: Option<HashMap<String, String>>,
}

/// Assets shared by every variant in the multi-character file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SharedAssets {
    pub base_textures: Vec<String>,
    pub animations: Vec<String>,
    pub state_machines: Vec<String>,
}

/// Config of the single animation file holding several characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiCharacterConfig {
    pub file_path: String,
    pub characters: HashMap<CharacterType, CharacterArtboard>,
    #[serde(default)]
    pub shared_assets: SharedAssets,
}

/// Egg artwork and milestone for a character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EggConfig {
    pub buddy_id: String,
    pub egg_image_path: String,
    pub cracked_image_path: String,
    pub hatch_sound_path: String,
    #[serde(default)]
    pub progress: u32,
    pub milestone: String,
}

impl EggConfig {
    /// Catalog used when the egg catalog cannot be fetched.
    pub fn fallback_catalog() -> Vec<EggConfig> {
        vec![EggConfig {
            buddy_id: "kitten-ninja".to_string(),
            egg_image_path: "/public/assets/eggs/kitten-ninja/egg.png".to_string(),
            cracked_image_path: "/public/assets/eggs/kitten-ninja/egg-cracked.png".to_string(),
            hatch_sound_path: "/public/assets/eggs/kitten-ninja/hatch.mp3".to_string(),
            progress: 0,
            milestone: "read_3_days".to_string(),
        }]
    }
}

/// The egg catalog is published either wrapped or as a bare array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EggCatalog {
    Wrapped { eggs: Vec<EggConfig> },
    Bare(Vec<EggConfig>),
}

impl EggCatalog {
    /// The catalog entries.
    pub fn into_entries(self) -> Vec<EggConfig> {
        match self {
            EggCatalog::Wrapped { eggs } => eggs,
            EggCatalog::Bare(eggs) => eggs,
        }
    }
}

/// A localized voice line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioClip {
    pub gesture: Gesture,
    pub file_path: String,
    pub locale: String,
    pub transcript: String,
}

/// One gesture triggered on a loaded character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEvent {
    pub subject_id: String,
    pub gesture: Gesture,
    pub timestamp: DateTime<Utc>,
}
