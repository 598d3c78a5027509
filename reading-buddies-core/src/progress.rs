//! Egg progress tracking.
//!
//! Each subject can have one egg in progress. Reading activity adds to the
//! egg's progress until it reaches its target, at which point the egg is
//! ready to hatch; completing a ready egg removes its record.

use crate::assets::{fetch_json, AssetSource};
use crate::config::Config;
use crate::event::{Event, EventKind, EventSender};
use crate::listeners::{Listeners, Subscription};
use crate::model::{EggCatalog, EggConfig};
use crate::store::{keys, read_json, write_json, KeyValueStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Largest step `simulate_progress` takes.
const SIMULATED_STEP: u32 = 10;

/// Progress of one subject's egg.
///
/// `current <= target` and `ready == (current == target)` hold after every
/// mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    #[serde(rename = "buddyId")]
    pub subject_id: String,
    #[serde(rename = "currentProgress")]
    pub current: u32,
    #[serde(rename = "targetProgress")]
    pub target: u32,
    pub milestone: String,
    #[serde(rename = "isReadyToHatch")]
    pub ready: bool,
}

impl ProgressRecord {
    fn new(subject_id: &str, milestone: &str, target: u32) -> Self {
        let mut record = Self {
            subject_id: subject_id.to_string(),
            current: 0,
            target,
            milestone: milestone.to_string(),
            ready: false,
        };
        record.normalize();
        record
    }

    fn normalize(&mut self) {
        self.current = self.current.min(self.target);
        self.ready = self.current == self.target;
    }

    /// Progress as a whole percentage.
    pub fn percentage(&self) -> u32 {
        if self.target == 0 {
            return 100;
        }
        (f64::from(self.current) / f64::from(self.target) * 100.0).round() as u32
    }
}

/// Owns every subject's egg progress and persists it under
/// [`keys::EGG_PROGRESS`].
pub struct ProgressTracker {
    store: Arc<dyn KeyValueStore>,
    assets: Arc<dyn AssetSource>,
    events: EventSender,
    config: Config,
    eggs: HashMap<String, EggConfig>,
    records: BTreeMap<String, ProgressRecord>,
    listeners: Listeners<ProgressRecord>,
}

impl ProgressTracker {
    /// Create a tracker, restoring any persisted progress.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        assets: Arc<dyn AssetSource>,
        events: EventSender,
        config: Config,
    ) -> Self {
        let mut tracker = Self {
            store,
            assets,
            events,
            config,
            eggs: HashMap::new(),
            records: BTreeMap::new(),
            listeners: Listeners::new(),
        };
        tracker.load_records();
        tracker
    }

    /// Load the egg catalog and re-read persisted progress.
    ///
    /// A missing or malformed catalog is replaced by the built-in one.
    pub async fn initialize(&mut self) {
        let path = self.config.egg_catalog_path.clone();
        let entries = match fetch_json::<EggCatalog>(self.assets.as_ref(), &path).await {
            Ok(catalog) => catalog.into_entries(),
            Err(e) => {
                error!(error = %e, "failed to load egg catalog, using fallback");
                EggConfig::fallback_catalog()
            }
        };

        self.eggs = entries
            .into_iter()
            .map(|egg| (egg.buddy_id.clone(), egg))
            .collect();
        self.load_records();
    }

    /// Register a listener called with every changed record.
    pub fn subscribe(
        &self,
        listener: impl Fn(&ProgressRecord) + Send + Sync + 'static,
    ) -> Subscription {
        self.listeners.subscribe(listener)
    }

    /// Start a fresh egg for `subject_id` with the default target.
    pub fn start_default(&mut self, subject_id: &str, milestone: &str) {
        let target = self.config.default_target_progress;
        self.start(subject_id, milestone, target);
    }

    /// Start a fresh egg for `subject_id`, replacing any existing one.
    pub fn start(&mut self, subject_id: &str, milestone: &str, target: u32) {
        if !self.eggs.contains_key(subject_id) {
            debug!(subject_id, "no egg artwork configured for subject");
        }

        let record = ProgressRecord::new(subject_id, milestone, target);
        self.records.insert(subject_id.to_string(), record.clone());
        self.save_records();
        self.listeners.notify(&record);

        self.events.analytics(
            EventKind::EggCreated,
            json!({
                "buddyId": subject_id,
                "milestone": milestone,
                "targetProgress": target,
            }),
        );
    }

    /// Add progress to an existing egg, clamped at its target.
    ///
    /// Does nothing (besides a warning) if no egg exists for the subject.
    pub fn add_progress(&mut self, subject_id: &str, increment: u32) {
        let Some(record) = self.records.get_mut(subject_id) else {
            warn!(subject_id, "no egg progress found");
            return;
        };

        let was_ready = record.ready;
        record.current = record.current.saturating_add(increment);
        record.normalize();
        let record = record.clone();

        self.save_records();
        self.listeners.notify(&record);

        if record.ready && !was_ready {
            self.events.emit(Event::egg_ready(subject_id));
        }
    }

    /// Finish a ready egg and drop its record.
    ///
    /// Returns false, leaving the record untouched, if the egg is missing or
    /// not ready.
    pub fn complete(&mut self, subject_id: &str) -> bool {
        let milestone = match self.records.get(subject_id) {
            Some(record) if record.ready => record.milestone.clone(),
            _ => {
                warn!(subject_id, "egg is not ready to hatch");
                return false;
            }
        };

        self.records.remove(subject_id);
        self.save_records();

        self.events.analytics(
            EventKind::EggHatched,
            json!({
                "buddyId": subject_id,
                "milestone": milestone,
            }),
        );
        true
    }

    /// Progress percentage for a subject, 0 if it has no egg.
    pub fn percentage(&self, subject_id: &str) -> u32 {
        self.records
            .get(subject_id)
            .map(ProgressRecord::percentage)
            .unwrap_or(0)
    }

    /// The subject's record, if any.
    pub fn progress(&self, subject_id: &str) -> Option<&ProgressRecord> {
        self.records.get(subject_id)
    }

    /// Every record, ordered by subject.
    pub fn all_progress(&self) -> Vec<&ProgressRecord> {
        self.records.values().collect()
    }

    /// Egg artwork for a subject, once the catalog is loaded.
    pub fn egg_config(&self, subject_id: &str) -> Option<&EggConfig> {
        self.eggs.get(subject_id)
    }

    /// Development helper: advance an egg by up to ten points.
    pub fn simulate_progress(&mut self, subject_id: &str) {
        if !self.config.dev_mode {
            warn!("simulate_progress is only available in development mode");
            return;
        }

        let Some(record) = self.records.get(subject_id) else {
            warn!(subject_id, "no egg progress found");
            return;
        };
        let step = (record.target - record.current).min(SIMULATED_STEP);
        self.add_progress(subject_id, step);
    }

    fn load_records(&mut self) {
        match read_json::<BTreeMap<String, ProgressRecord>>(self.store.as_ref(), keys::EGG_PROGRESS)
        {
            Ok(Some(saved)) => {
                for (subject_id, mut record) in saved {
                    record.normalize();
                    self.records.insert(subject_id, record);
                }
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, "failed to load egg progress from storage"),
        }
    }

    fn save_records(&self) {
        if let Err(e) = write_json(self.store.as_ref(), keys::EGG_PROGRESS, &self.records) {
            error!(error = %e, "failed to save egg progress to storage");
        }
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("records", &self.records)
            .field("eggs", &self.eggs.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryAssets;
    use crate::event::{channel, EventReceiver};
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn tracker_with(store: Arc<MemoryStore>) -> (ProgressTracker, EventReceiver) {
        let (tx, rx) = channel();
        let tracker = ProgressTracker::new(
            store,
            Arc::new(MemoryAssets::new()),
            tx,
            Config::default(),
        );
        (tracker, rx)
    }

    fn drain(rx: &mut EventReceiver) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_reading_scenario_to_completion() {
        let (mut tracker, mut rx) = tracker_with(Arc::new(MemoryStore::new()));

        tracker.start("kitten-ninja", "read_3_days", 100);
        tracker.add_progress("kitten-ninja", 10);
        assert_eq!(tracker.percentage("kitten-ninja"), 10);
        assert!(!tracker.progress("kitten-ninja").unwrap().ready);

        for _ in 0..9 {
            tracker.add_progress("kitten-ninja", 10);
        }
        assert_eq!(tracker.percentage("kitten-ninja"), 100);
        assert!(tracker.progress("kitten-ninja").unwrap().ready);

        assert!(tracker.complete("kitten-ninja"));
        assert_eq!(tracker.percentage("kitten-ninja"), 0);
        assert!(tracker.progress("kitten-ninja").is_none());

        let events = drain(&mut rx);
        let ready_signals = events
            .iter()
            .filter(|e| matches!(e, Event::EggReadyToHatch { .. }))
            .count();
        assert_eq!(ready_signals, 1);
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Analytics(signal) if signal.kind == EventKind::EggHatched
        )));
    }

    #[test]
    fn test_progress_is_clamped_at_target() {
        let (mut tracker, _rx) = tracker_with(Arc::new(MemoryStore::new()));
        tracker.start("bear", "read_1_book", 30);

        for increment in [7, 0, 25, u32::MAX] {
            tracker.add_progress("bear", increment);
            let record = tracker.progress("bear").unwrap();
            assert!(record.current <= record.target);
            assert_eq!(record.ready, record.current == record.target);
        }
        assert_eq!(tracker.progress("bear").unwrap().current, 30);
    }

    #[test]
    fn test_ready_signal_only_on_transition() {
        let (mut tracker, mut rx) = tracker_with(Arc::new(MemoryStore::new()));
        tracker.start("bear", "m", 10);
        tracker.add_progress("bear", 10);
        tracker.add_progress("bear", 5);

        let ready_signals = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, Event::EggReadyToHatch { .. }))
            .count();
        assert_eq!(ready_signals, 1);
    }

    #[test]
    fn test_unknown_subject_is_a_no_op() {
        let (mut tracker, mut rx) = tracker_with(Arc::new(MemoryStore::new()));
        tracker.add_progress("unknown-subject", 10);

        assert!(tracker.progress("unknown-subject").is_none());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_complete_requires_ready() {
        let (mut tracker, _rx) = tracker_with(Arc::new(MemoryStore::new()));
        tracker.start("kitten-ninja", "read_3_days", 100);
        tracker.add_progress("kitten-ninja", 40);
        let before = tracker.progress("kitten-ninja").cloned();

        assert!(!tracker.complete("kitten-ninja"));
        assert_eq!(tracker.progress("kitten-ninja").cloned(), before);
        assert!(!tracker.complete("nobody"));
    }

    #[test]
    fn test_start_overwrites_existing_record() {
        let (mut tracker, _rx) = tracker_with(Arc::new(MemoryStore::new()));
        tracker.start("kitten-ninja", "read_3_days", 100);
        tracker.add_progress("kitten-ninja", 60);
        tracker.start_default("kitten-ninja", "read_5_days");

        let record = tracker.progress("kitten-ninja").unwrap();
        assert_eq!(record.current, 0);
        assert_eq!(record.target, 100);
        assert_eq!(record.milestone, "read_5_days");
    }

    #[test]
    fn test_zero_target_is_ready_immediately() {
        let (mut tracker, _rx) = tracker_with(Arc::new(MemoryStore::new()));
        tracker.start("instant", "m", 0);
        assert!(tracker.progress("instant").unwrap().ready);
        assert_eq!(tracker.percentage("instant"), 100);
    }

    #[test]
    fn test_percentage_rounds() {
        let (mut tracker, _rx) = tracker_with(Arc::new(MemoryStore::new()));
        tracker.start("thirds", "m", 3);
        tracker.add_progress("thirds", 1);
        assert_eq!(tracker.percentage("thirds"), 33);
        tracker.add_progress("thirds", 1);
        assert_eq!(tracker.percentage("thirds"), 67);
    }

    #[test]
    fn test_progress_persists_across_instances() {
        let store = Arc::new(MemoryStore::new());
        let (mut tracker, _rx) = tracker_with(store.clone());
        tracker.start("kitten-ninja", "read_3_days", 100);
        tracker.add_progress("kitten-ninja", 25);

        let (restored, _rx) = tracker_with(store);
        assert_eq!(restored.percentage("kitten-ninja"), 25);
        assert_eq!(restored.all_progress().len(), 1);
    }

    #[test]
    fn test_storage_failure_keeps_memory_state() {
        let store = Arc::new(MemoryStore::new());
        store.set_read_only(true);
        let (mut tracker, _rx) = tracker_with(store);

        tracker.start("kitten-ninja", "read_3_days", 100);
        tracker.add_progress("kitten-ninja", 50);
        assert_eq!(tracker.percentage("kitten-ninja"), 50);
    }

    #[test]
    fn test_listeners_notified_and_unsubscribed() {
        let (mut tracker, _rx) = tracker_with(Arc::new(MemoryStore::new()));
        let seen = Arc::new(AtomicU32::new(0));
        let s = seen.clone();
        let sub = tracker.subscribe(move |record| {
            s.store(record.current, Ordering::SeqCst);
        });

        tracker.start("kitten-ninja", "read_3_days", 100);
        tracker.add_progress("kitten-ninja", 15);
        assert_eq!(seen.load(Ordering::SeqCst), 15);

        sub.unsubscribe();
        tracker.add_progress("kitten-ninja", 15);
        assert_eq!(seen.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn test_simulate_progress_requires_dev_mode() {
        let (mut tracker, _rx) = tracker_with(Arc::new(MemoryStore::new()));
        tracker.start("kitten-ninja", "read_3_days", 15);
        tracker.simulate_progress("kitten-ninja");
        assert_eq!(tracker.percentage("kitten-ninja"), 0);

        tracker.config = Config::new().dev_mode(true);
        tracker.simulate_progress("kitten-ninja");
        tracker.simulate_progress("kitten-ninja");
        assert_eq!(tracker.progress("kitten-ninja").unwrap().current, 15);
    }

    #[tokio::test]
    async fn test_initialize_falls_back_to_builtin_catalog() {
        let (mut tracker, _rx) = tracker_with(Arc::new(MemoryStore::new()));
        tracker.initialize().await;

        let egg = tracker.egg_config("kitten-ninja").expect("fallback egg");
        assert_eq!(egg.milestone, "read_3_days");
    }

    #[tokio::test]
    async fn test_initialize_reads_catalog() {
        let assets = Arc::new(MemoryAssets::new());
        assets.insert_json(
            "/assets/eggs/index.json",
            &json!([{
                "buddyId": "dragon-mage",
                "eggImagePath": "/egg.png",
                "crackedImagePath": "/cracked.png",
                "hatchSoundPath": "/hatch.mp3",
                "milestone": "read_7_days"
            }]),
        );
        let mut tracker = ProgressTracker::new(
            Arc::new(MemoryStore::new()),
            assets,
            EventSender::detached(),
            Config::default(),
        );
        tracker.initialize().await;

        assert!(tracker.egg_config("dragon-mage").is_some());
        assert!(tracker.egg_config("kitten-ninja").is_none());
    }
}
