//! Accessory ownership, unlocks and equip slots.
//!
//! The catalog is static once loaded. The inventory tracks which
//! accessories are owned and unlocked, and which one each subject wears.

use crate::assets::{fetch_json, AssetSource};
use crate::config::Config;
use crate::event::{EventKind, EventSender};
use crate::listeners::{Listeners, Subscription};
use crate::model::{AccessoryCategory, AccessoryConfig, Rarity};
use crate::store::{keys, read_json, write_json, KeyValueStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// How many common accessories a new player receives.
const STARTER_ACCESSORY_COUNT: usize = 3;

/// What the player owns and wears.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Inventory {
    /// Accessories the player owns.
    pub owned: BTreeSet<String>,
    /// Accessories that have been unlocked; unlocking also grants ownership.
    pub unlocked: BTreeSet<String>,
    /// Subject id to the accessory it wears.
    pub equipped: BTreeMap<String, String>,
}

/// Summary returned by [`AccessoryInventory::unlock_progress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlockProgress {
    pub unlocked: usize,
    pub total: usize,
    pub percentage: u32,
}

/// Owns the accessory catalog and the player's inventory, persisted under
/// [`keys::ACCESSORY_INVENTORY`].
pub struct AccessoryInventory {
    store: Arc<dyn KeyValueStore>,
    assets: Arc<dyn AssetSource>,
    events: EventSender,
    catalog_path: String,
    catalog: Vec<AccessoryConfig>,
    catalog_index: HashMap<String, usize>,
    inventory: Inventory,
    listeners: Listeners<Inventory>,
}

/// Catalog used when the accessory catalog cannot be fetched.
pub fn fallback_catalog() -> Vec<AccessoryConfig> {
    vec![
        AccessoryConfig {
            id: "red-hat".to_string(),
            name: "Red Hat".to_string(),
            category: AccessoryCategory::Hat,
            image_path: "/public/assets/accessories/hats/red-hat.png".to_string(),
            unlock_milestone: "read_1_book".to_string(),
            rarity: Rarity::Common,
        },
        AccessoryConfig {
            id: "cool-glasses".to_string(),
            name: "Cool Glasses".to_string(),
            category: AccessoryCategory::Glasses,
            image_path: "/public/assets/accessories/glasses/cool-glasses.png".to_string(),
            unlock_milestone: "read_5_books".to_string(),
            rarity: Rarity::Rare,
        },
    ]
}

impl AccessoryInventory {
    /// Create an inventory, restoring any persisted state. The catalog is
    /// empty until [`initialize`](Self::initialize) or
    /// [`set_catalog`](Self::set_catalog).
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        assets: Arc<dyn AssetSource>,
        events: EventSender,
        config: &Config,
    ) -> Self {
        let mut inventory = Self {
            store,
            assets,
            events,
            catalog_path: config.accessory_catalog_path.clone(),
            catalog: Vec::new(),
            catalog_index: HashMap::new(),
            inventory: Inventory::default(),
            listeners: Listeners::new(),
        };
        inventory.load_inventory();
        inventory
    }

    /// Fetch the catalog (falling back to the built-in one) and re-read the
    /// persisted inventory.
    pub async fn initialize(&mut self) {
        let catalog =
            match fetch_json::<Vec<AccessoryConfig>>(self.assets.as_ref(), &self.catalog_path).await
            {
                Ok(catalog) => catalog,
                Err(e) => {
                    error!(error = %e, "failed to load accessory catalog, using fallback");
                    fallback_catalog()
                }
            };
        self.set_catalog(catalog);
        self.load_inventory();
    }

    /// Replace the catalog, keeping its order. A repeated id keeps its
    /// first position and takes the later entry.
    pub fn set_catalog(&mut self, catalog: Vec<AccessoryConfig>) {
        self.catalog.clear();
        self.catalog_index.clear();
        for accessory in catalog {
            match self.catalog_index.get(&accessory.id) {
                Some(&slot) => self.catalog[slot] = accessory,
                None => {
                    self.catalog_index
                        .insert(accessory.id.clone(), self.catalog.len());
                    self.catalog.push(accessory);
                }
            }
        }
    }

    /// Register a listener called with the inventory after every change.
    pub fn subscribe(&self, listener: impl Fn(&Inventory) + Send + Sync + 'static) -> Subscription {
        self.listeners.subscribe(listener)
    }

    /// Unlock (and grant) an accessory.
    ///
    /// Returns false for ids missing from the catalog. Unlocking an already
    /// unlocked accessory returns true and changes nothing.
    pub fn unlock(&mut self, accessory_id: &str) -> bool {
        let Some(accessory) = self.lookup(accessory_id) else {
            warn!(accessory_id, "accessory not found");
            return false;
        };

        if self.inventory.unlocked.contains(accessory_id) {
            debug!(accessory_id, "accessory already unlocked");
            return true;
        }

        let payload = json!({
            "accessoryId": accessory_id,
            "category": accessory.category,
            "rarity": accessory.rarity,
        });

        self.inventory.unlocked.insert(accessory_id.to_string());
        self.inventory.owned.insert(accessory_id.to_string());
        self.commit();

        self.events.analytics(EventKind::AccessoryUnlocked, payload);
        true
    }

    /// Put an owned accessory on a subject.
    ///
    /// A currently equipped accessory of the same category is taken off
    /// first. Returns false if the accessory is not owned or not in the
    /// catalog.
    pub fn equip(&mut self, subject_id: &str, accessory_id: &str) -> bool {
        if !self.inventory.owned.contains(accessory_id) {
            warn!(accessory_id, "accessory not owned");
            return false;
        }
        let Some(accessory) = self.lookup(accessory_id) else {
            warn!(accessory_id, "accessory not found");
            return false;
        };
        let category = accessory.category;

        if let Some(current) = self.inventory.equipped.get(subject_id) {
            let same_category = self.lookup(current).is_some_and(|c| c.category == category);
            if same_category {
                self.inventory.equipped.remove(subject_id);
            }
        }

        self.inventory
            .equipped
            .insert(subject_id.to_string(), accessory_id.to_string());
        self.commit();

        self.events.analytics(
            EventKind::AccessoryEquipped,
            json!({
                "buddyId": subject_id,
                "accessoryId": accessory_id,
                "category": category,
            }),
        );
        true
    }

    /// Take an accessory off a subject.
    ///
    /// Returns false unless `accessory_id` is what the subject is wearing.
    pub fn unequip(&mut self, subject_id: &str, accessory_id: &str) -> bool {
        if self.inventory.equipped.get(subject_id).map(String::as_str) != Some(accessory_id) {
            warn!(subject_id, accessory_id, "accessory not equipped on buddy");
            return false;
        }

        self.inventory.equipped.remove(subject_id);
        self.commit();

        self.events.analytics(
            EventKind::AccessoryUnequipped,
            json!({
                "buddyId": subject_id,
                "accessoryId": accessory_id,
            }),
        );
        true
    }

    /// Owned accessories that exist in the catalog.
    pub fn owned(&self) -> Vec<&AccessoryConfig> {
        self.inventory
            .owned
            .iter()
            .filter_map(|id| self.lookup(id))
            .collect()
    }

    /// Catalog accessories of one category.
    pub fn by_category(&self, category: AccessoryCategory) -> Vec<&AccessoryConfig> {
        self.catalog
            .iter()
            .filter(|a| a.category == category)
            .collect()
    }

    /// What a subject is wearing.
    pub fn equipped(&self, subject_id: &str) -> Vec<&AccessoryConfig> {
        self.inventory
            .equipped
            .get(subject_id)
            .and_then(|id| self.lookup(id))
            .into_iter()
            .collect()
    }

    pub fn is_unlocked(&self, accessory_id: &str) -> bool {
        self.inventory.unlocked.contains(accessory_id)
    }

    pub fn is_owned(&self, accessory_id: &str) -> bool {
        self.inventory.owned.contains(accessory_id)
    }

    pub fn is_equipped(&self, subject_id: &str, accessory_id: &str) -> bool {
        self.inventory.equipped.get(subject_id).map(String::as_str) == Some(accessory_id)
    }

    /// A catalog entry.
    pub fn accessory(&self, accessory_id: &str) -> Option<&AccessoryConfig> {
        self.lookup(accessory_id)
    }

    /// The whole catalog, in catalog order.
    pub fn all(&self) -> Vec<&AccessoryConfig> {
        self.catalog.iter().collect()
    }

    /// The raw inventory.
    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// How much of the catalog is unlocked.
    pub fn unlock_progress(&self) -> UnlockProgress {
        let total = self.catalog.len();
        let unlocked = self.inventory.unlocked.len();
        let percentage = if total > 0 {
            (unlocked as f64 / total as f64 * 100.0).round() as u32
        } else {
            0
        };
        UnlockProgress {
            unlocked,
            total,
            percentage,
        }
    }

    /// Unlock the first few common accessories in the catalog.
    pub fn grant_starter_accessories(&mut self) {
        let starters: Vec<String> = self
            .catalog
            .iter()
            .filter(|a| a.rarity == Rarity::Common)
            .take(STARTER_ACCESSORY_COUNT)
            .map(|a| a.id.clone())
            .collect();

        for id in starters {
            self.unlock(&id);
        }
    }

    fn lookup(&self, accessory_id: &str) -> Option<&AccessoryConfig> {
        self.catalog_index
            .get(accessory_id)
            .map(|&slot| &self.catalog[slot])
    }

    fn commit(&self) {
        if let Err(e) = write_json(
            self.store.as_ref(),
            keys::ACCESSORY_INVENTORY,
            &self.inventory,
        ) {
            error!(error = %e, "failed to save accessory inventory to storage");
        }
        self.listeners.notify(&self.inventory);
    }

    fn load_inventory(&mut self) {
        match read_json::<Inventory>(self.store.as_ref(), keys::ACCESSORY_INVENTORY) {
            Ok(Some(saved)) => self.inventory = saved,
            Ok(None) => {}
            Err(e) => error!(error = %e, "failed to load accessory inventory from storage"),
        }
    }
}

impl std::fmt::Debug for AccessoryInventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessoryInventory")
            .field("catalog", &self.catalog.len())
            .field("inventory", &self.inventory)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryAssets;
    use crate::event::{channel, Event, EventReceiver};
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn accessory(id: &str, category: AccessoryCategory, rarity: Rarity) -> AccessoryConfig {
        AccessoryConfig {
            id: id.to_string(),
            name: id.to_string(),
            category,
            image_path: format!("/{}.png", id),
            unlock_milestone: "m".to_string(),
            rarity,
        }
    }

    fn test_catalog() -> Vec<AccessoryConfig> {
        vec![
            accessory("red-hat", AccessoryCategory::Hat, Rarity::Common),
            accessory("blue-hat", AccessoryCategory::Hat, Rarity::Common),
            accessory("cool-glasses", AccessoryCategory::Glasses, Rarity::Rare),
            accessory("space-helmet", AccessoryCategory::Helmet, Rarity::Common),
            accessory("cape", AccessoryCategory::Costume, Rarity::Common),
        ]
    }

    fn inventory_with(store: Arc<MemoryStore>) -> (AccessoryInventory, EventReceiver) {
        let (tx, rx) = channel();
        let mut inventory = AccessoryInventory::new(
            store,
            Arc::new(MemoryAssets::new()),
            tx,
            &Config::default(),
        );
        inventory.set_catalog(test_catalog());
        (inventory, rx)
    }

    fn count_kind(rx: &mut EventReceiver, kind: EventKind) -> usize {
        let mut count = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, Event::Analytics(ref s) if s.kind == kind) {
                count += 1;
            }
        }
        count
    }

    #[test]
    fn test_unlock_grants_ownership() {
        let (mut inventory, _rx) = inventory_with(Arc::new(MemoryStore::new()));
        assert!(inventory.unlock("red-hat"));
        assert!(inventory.is_unlocked("red-hat"));
        assert!(inventory.is_owned("red-hat"));
        assert!(!inventory.unlock("golden-crown"));
    }

    #[test]
    fn test_unlock_is_idempotent() {
        let (mut inventory, mut rx) = inventory_with(Arc::new(MemoryStore::new()));
        assert!(inventory.unlock("red-hat"));
        let after_first = inventory.inventory().clone();
        assert!(inventory.unlock("red-hat"));

        assert_eq!(inventory.inventory(), &after_first);
        assert_eq!(count_kind(&mut rx, EventKind::AccessoryUnlocked), 1);
    }

    #[test]
    fn test_equip_requires_ownership() {
        let (mut inventory, _rx) = inventory_with(Arc::new(MemoryStore::new()));
        assert!(!inventory.equip("kitten-ninja", "red-hat"));
        assert!(inventory.equipped("kitten-ninja").is_empty());
    }

    #[test]
    fn test_equip_same_category_replaces() {
        let (mut inventory, _rx) = inventory_with(Arc::new(MemoryStore::new()));
        inventory.unlock("red-hat");
        inventory.unlock("blue-hat");

        assert!(inventory.equip("kitten-ninja", "red-hat"));
        assert!(inventory.equip("kitten-ninja", "blue-hat"));

        let hats: Vec<_> = inventory
            .equipped("kitten-ninja")
            .into_iter()
            .filter(|a| a.category == AccessoryCategory::Hat)
            .collect();
        assert_eq!(hats.len(), 1);
        assert_eq!(hats[0].id, "blue-hat");
        assert!(!inventory.is_equipped("kitten-ninja", "red-hat"));
    }

    #[test]
    fn test_equip_is_per_subject() {
        let (mut inventory, _rx) = inventory_with(Arc::new(MemoryStore::new()));
        inventory.unlock("red-hat");
        inventory.unlock("cool-glasses");

        inventory.equip("kitten-ninja", "red-hat");
        inventory.equip("bear-knight", "cool-glasses");

        assert!(inventory.is_equipped("kitten-ninja", "red-hat"));
        assert!(inventory.is_equipped("bear-knight", "cool-glasses"));
    }

    #[test]
    fn test_unequip_only_current() {
        let (mut inventory, mut rx) = inventory_with(Arc::new(MemoryStore::new()));
        inventory.unlock("red-hat");
        inventory.equip("kitten-ninja", "red-hat");

        assert!(!inventory.unequip("kitten-ninja", "cool-glasses"));
        assert!(!inventory.unequip("bear-knight", "red-hat"));
        assert!(inventory.unequip("kitten-ninja", "red-hat"));
        assert!(inventory.equipped("kitten-ninja").is_empty());
        assert_eq!(count_kind(&mut rx, EventKind::AccessoryUnequipped), 1);
    }

    #[test]
    fn test_queries() {
        let (mut inventory, _rx) = inventory_with(Arc::new(MemoryStore::new()));
        inventory.unlock("cool-glasses");

        assert_eq!(inventory.all().len(), 5);
        assert_eq!(inventory.by_category(AccessoryCategory::Hat).len(), 2);
        assert_eq!(inventory.owned().len(), 1);
        assert_eq!(
            inventory.accessory("cape").map(|a| a.category),
            Some(AccessoryCategory::Costume)
        );
    }

    #[test]
    fn test_unlock_progress() {
        let (mut inventory, _rx) = inventory_with(Arc::new(MemoryStore::new()));
        assert_eq!(
            inventory.unlock_progress(),
            UnlockProgress {
                unlocked: 0,
                total: 5,
                percentage: 0
            }
        );

        inventory.unlock("red-hat");
        inventory.unlock("cool-glasses");
        assert_eq!(inventory.unlock_progress().percentage, 40);

        inventory.set_catalog(Vec::new());
        assert_eq!(inventory.unlock_progress().percentage, 0);
    }

    #[test]
    fn test_grant_starter_accessories() {
        let (mut inventory, _rx) = inventory_with(Arc::new(MemoryStore::new()));
        inventory.grant_starter_accessories();

        assert_eq!(inventory.inventory().unlocked.len(), 3);
        assert!(inventory.is_unlocked("red-hat"));
        assert!(inventory.is_unlocked("blue-hat"));
        assert!(inventory.is_unlocked("space-helmet"));
        assert!(!inventory.is_unlocked("cape"));
        assert!(!inventory.is_unlocked("cool-glasses"));
    }

    #[test]
    fn test_catalog_keeps_its_order() {
        let (mut inventory, _rx) = inventory_with(Arc::new(MemoryStore::new()));
        let ids: Vec<&str> = inventory.all().into_iter().map(|a| a.id.as_str()).collect();
        let expected = [
            "red-hat",
            "blue-hat",
            "cool-glasses",
            "space-helmet",
            "cape",
        ];
        assert_eq!(ids, expected);

        let hats: Vec<&str> = inventory
            .by_category(AccessoryCategory::Hat)
            .into_iter()
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(hats, ["red-hat", "blue-hat"]);

        let mut catalog = test_catalog();
        catalog.push(accessory("red-hat", AccessoryCategory::Hat, Rarity::Epic));
        inventory.set_catalog(catalog);
        assert_eq!(inventory.all().len(), 5);
        assert_eq!(inventory.all()[0].rarity, Rarity::Epic);
    }

    #[test]
    fn test_inventory_persists_across_instances() {
        let store = Arc::new(MemoryStore::new());
        let (mut inventory, _rx) = inventory_with(store.clone());
        inventory.unlock("red-hat");
        inventory.equip("kitten-ninja", "red-hat");

        let (restored, _rx) = inventory_with(store);
        assert!(restored.is_owned("red-hat"));
        assert!(restored.is_equipped("kitten-ninja", "red-hat"));
    }

    #[test]
    fn test_listener_sees_each_change() {
        let (mut inventory, _rx) = inventory_with(Arc::new(MemoryStore::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let _sub = inventory.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        inventory.unlock("red-hat");
        inventory.unlock("red-hat");
        inventory.equip("kitten-ninja", "red-hat");
        inventory.unequip("kitten-ninja", "red-hat");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_initialize_falls_back_to_sample_entries() {
        let mut inventory = AccessoryInventory::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryAssets::new()),
            EventSender::detached(),
            &Config::default(),
        );
        inventory.initialize().await;

        assert_eq!(inventory.all().len(), 2);
        assert!(inventory.accessory("red-hat").is_some());
        assert!(inventory.accessory("cool-glasses").is_some());
    }
}
