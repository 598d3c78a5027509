//! Analytics batching.
//!
//! [`Analytics`] queues tracked events and flushes them in batches: on a
//! timer, when the queue reaches the batch size, and when the event bus
//! closes. A batch goes to the [`AnalyticsTransport`] when an endpoint is
//! configured; otherwise, or when sending fails, it is appended to a
//! bounded backup buffer in the key-value store.

use crate::error::Result;
use crate::event::{Event, EventKind, EventReceiver, Payload};
use crate::store::{keys, read_json, write_json, KeyValueStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Maximum number of events kept in the backup buffer.
pub const BACKUP_LIMIT: usize = 100;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const PLATFORM: &str = "native";

/// Batcher settings, persisted under [`keys::ANALYTICS_CONFIG`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsConfig {
    pub enabled: bool,
    pub batch_size: usize,
    /// Milliseconds between timed flushes.
    #[serde(rename = "flushInterval")]
    pub flush_interval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub debug: bool,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 10,
            flush_interval_ms: 30_000,
            endpoint: None,
            debug: false,
        }
    }
}

impl AnalyticsConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Partial update for [`Analytics::set_config`]. `None` fields are kept.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsConfigUpdate {
    pub enabled: Option<bool>,
    pub batch_size: Option<usize>,
    pub flush_interval_ms: Option<u64>,
    /// `Some(None)` clears the endpoint.
    pub endpoint: Option<Option<String>>,
    pub debug: Option<bool>,
}

/// An event as queued and sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: Payload,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMetadata {
    pub app_version: String,
    pub platform: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Body sent to the analytics endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsBatch {
    pub events: Vec<TrackedEvent>,
    pub metadata: BatchMetadata,
}

/// Delivers batches to a collection endpoint.
#[async_trait]
pub trait AnalyticsTransport: Send + Sync {
    async fn send(&self, endpoint: &str, batch: &AnalyticsBatch) -> Result<()>;
}

/// Queues and flushes analytics events.
pub struct Analytics {
    store: Arc<dyn KeyValueStore>,
    transport: Option<Arc<dyn AnalyticsTransport>>,
    config: AnalyticsConfig,
    queue: Vec<TrackedEvent>,
    user_id: Option<String>,
    session_id: Option<String>,
}

impl Analytics {
    /// Create a batcher, merging any persisted config over the defaults.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        transport: Option<Arc<dyn AnalyticsTransport>>,
    ) -> Self {
        let config = load_config(store.as_ref());
        Self {
            store,
            transport,
            config,
            queue: Vec::new(),
            user_id: None,
            session_id: None,
        }
    }

    pub fn set_user_id(&mut self, user_id: impl Into<String>) {
        self.user_id = Some(user_id.into());
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Apply a partial config update and persist the result.
    pub fn set_config(&mut self, update: AnalyticsConfigUpdate) {
        if let Some(enabled) = update.enabled {
            self.config.enabled = enabled;
        }
        if let Some(batch_size) = update.batch_size {
            self.config.batch_size = batch_size;
        }
        if let Some(ms) = update.flush_interval_ms {
            self.config.flush_interval_ms = ms;
        }
        if let Some(endpoint) = update.endpoint {
            self.config.endpoint = endpoint;
        }
        if let Some(debug) = update.debug {
            self.config.debug = debug;
        }

        if let Err(e) = write_json(self.store.as_ref(), keys::ANALYTICS_CONFIG, &self.config) {
            error!(error = %e, "failed to save analytics config");
        }
    }

    /// Number of queued, unflushed events.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Queue an event, flushing if the batch is full.
    pub async fn track(&mut self, kind: EventKind, mut payload: Payload) {
        if !self.config.enabled {
            return;
        }

        let now = Utc::now();
        payload.insert("timestamp".to_string(), json!(now.timestamp_millis()));
        payload.insert("sessionId".to_string(), Value::String(self.session_id()));

        let event = TrackedEvent {
            kind,
            payload,
            timestamp: now,
            user_id: self.user_id.clone(),
        };
        if self.config.debug {
            info!(kind = %event.kind, payload = ?event.payload, "analytics event");
        }
        self.queue.push(event);

        if self.queue.len() >= self.config.batch_size {
            self.flush().await;
        }
    }

    /// Route a bus event into the queue.
    pub async fn ingest(&mut self, event: Event) {
        match event {
            Event::Analytics(signal) => self.track(signal.kind, signal.payload).await,
            Event::EggReadyToHatch { subject_id } => {
                let mut payload = Payload::new();
                payload.insert("buddyId".to_string(), Value::String(subject_id));
                self.track(EventKind::EggReadyToHatch, payload).await;
            }
            Event::Announcement { .. } => {}
        }
    }

    /// Send or back up everything queued.
    pub async fn flush(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let events = std::mem::take(&mut self.queue);
        let count = events.len();

        match (self.config.endpoint.as_deref(), self.transport.as_ref()) {
            (Some(endpoint), Some(transport)) => {
                let batch = AnalyticsBatch {
                    events,
                    metadata: BatchMetadata {
                        app_version: APP_VERSION.to_string(),
                        platform: PLATFORM.to_string(),
                        timestamp: Utc::now(),
                    },
                };
                if let Err(e) = transport.send(endpoint, &batch).await {
                    error!(error = %e, "failed to send analytics events");
                    self.backup_events(batch.events);
                }
            }
            (Some(_), None) => {
                warn!("analytics endpoint set but no transport available");
                self.backup_events(events);
            }
            (None, _) => self.backup_events(events),
        }

        debug!(count, "flushed analytics events");
    }

    /// Events currently held in the backup buffer.
    pub fn backup(&self) -> Vec<TrackedEvent> {
        match read_json::<Vec<TrackedEvent>>(self.store.as_ref(), keys::ANALYTICS_BACKUP) {
            Ok(events) => events.unwrap_or_default(),
            Err(e) => {
                error!(error = %e, "failed to read analytics backup");
                Vec::new()
            }
        }
    }

    /// Move backed-up events back into the queue so the next flush retries
    /// them. Returns how many were moved.
    pub fn requeue_backup(&mut self) -> usize {
        let backup = self.backup();
        if backup.is_empty() {
            return 0;
        }
        if let Err(e) = self.store.delete(keys::ANALYTICS_BACKUP) {
            error!(error = %e, "failed to clear analytics backup");
            return 0;
        }
        let count = backup.len();
        self.queue.extend(backup);
        count
    }

    /// Consume the event bus until every sender is gone.
    ///
    /// Flushes on the configured interval and once more on exit.
    pub async fn run(mut self, mut events: EventReceiver) -> Self {
        let period = self.config.flush_interval().max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.flush().await,
                event = events.recv() => match event {
                    Some(event) => self.ingest(event).await,
                    None => break,
                },
            }
        }

        self.flush().await;
        self
    }

    fn session_id(&mut self) -> String {
        if let Some(id) = &self.session_id {
            return id.clone();
        }

        let id = match self.store.get(keys::SESSION_ID) {
            Ok(Some(id)) => id,
            Ok(None) => self.new_session_id(),
            Err(e) => {
                error!(error = %e, "failed to read session id");
                self.new_session_id()
            }
        };
        self.session_id = Some(id.clone());
        id
    }

    fn new_session_id(&self) -> String {
        let id = generate_session_id();
        if let Err(e) = self.store.set(keys::SESSION_ID, &id) {
            error!(error = %e, "failed to save session id");
        }
        id
    }

    fn backup_events(&self, events: Vec<TrackedEvent>) {
        let mut backup =
            match read_json::<Vec<TrackedEvent>>(self.store.as_ref(), keys::ANALYTICS_BACKUP) {
                Ok(saved) => saved.unwrap_or_default(),
                Err(e) => {
                    // Leave the unreadable backup in place rather than overwrite it.
                    error!(
                        error = %e,
                        dropped = events.len(),
                        "analytics backup unreadable, not backing up events"
                    );
                    return;
                }
            };
        backup.extend(events);
        if backup.len() > BACKUP_LIMIT {
            backup.drain(..backup.len() - BACKUP_LIMIT);
        }
        if let Err(e) = write_json(self.store.as_ref(), keys::ANALYTICS_BACKUP, &backup) {
            error!(error = %e, "failed to back up analytics events");
        }
    }
}

impl std::fmt::Debug for Analytics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analytics")
            .field("config", &self.config)
            .field("pending", &self.queue.len())
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

/// `session-{millis}-{9 random base36 chars}`.
fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .filter_map(|_| char::from_digit(rng.gen_range(0..36), 36))
        .collect();
    format!("session-{}-{}", Utc::now().timestamp_millis(), suffix)
}

fn load_config(store: &dyn KeyValueStore) -> AnalyticsConfig {
    let defaults = AnalyticsConfig::default();
    let saved = match read_json::<Value>(store, keys::ANALYTICS_CONFIG) {
        Ok(Some(Value::Object(saved))) => saved,
        Ok(_) => return defaults,
        Err(e) => {
            error!(error = %e, "failed to load analytics config");
            return defaults;
        }
    };

    let Ok(Value::Object(mut merged)) = serde_json::to_value(&defaults) else {
        return defaults;
    };
    merged.extend(saved);
    serde_json::from_value(Value::Object(merged)).unwrap_or_else(|e| {
        error!(error = %e, "stored analytics config is malformed");
        defaults
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::event::channel;
    use crate::store::MemoryStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTransport {
        sent: Mutex<Vec<(String, AnalyticsBatch)>>,
        fail: bool,
    }

    #[async_trait]
    impl AnalyticsTransport for FakeTransport {
        async fn send(&self, endpoint: &str, batch: &AnalyticsBatch) -> Result<()> {
            if self.fail {
                return Err(Error::transport("503 Service Unavailable"));
            }
            self.sent
                .lock()
                .unwrap()
                .push((endpoint.to_string(), batch.clone()));
            Ok(())
        }
    }

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => Payload::new(),
        }
    }

    #[test]
    fn test_session_id_format() {
        let id = generate_session_id();
        let parts: Vec<&str> = id.splitn(3, '-').collect();
        assert_eq!(parts[0], "session");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[tokio::test]
    async fn test_unreadable_backup_is_not_overwritten() {
        let store = Arc::new(MemoryStore::new());
        let corrupt = r#"[{"type":"some_future_event","payload":{},"timestamp":0}]"#;
        store.set(keys::ANALYTICS_BACKUP, corrupt).unwrap();

        let mut analytics = Analytics::new(store.clone(), None);
        analytics
            .track(EventKind::BuddyHatched, Payload::new())
            .await;
        analytics.flush().await;

        assert_eq!(analytics.pending(), 0);
        assert_eq!(
            store.get(keys::ANALYTICS_BACKUP).unwrap().as_deref(),
            Some(corrupt)
        );
    }

    #[tokio::test]
    async fn test_track_enriches_payload() {
        let store = Arc::new(MemoryStore::new());
        let mut analytics = Analytics::new(store.clone(), None);
        analytics.set_user_id("reader-1");

        analytics
            .track(
                EventKind::BuddyHatched,
                payload(json!({ "buddyId": "kitten-ninja" })),
            )
            .await;
        analytics.flush().await;

        let backup = analytics.backup();
        assert_eq!(backup.len(), 1);
        let event = &backup[0];
        assert_eq!(event.kind, EventKind::BuddyHatched);
        assert_eq!(event.payload["buddyId"], "kitten-ninja");
        assert!(event.payload["timestamp"].is_i64());
        let session = store.get(keys::SESSION_ID).unwrap().unwrap();
        assert_eq!(event.payload["sessionId"], session.as_str());
        assert_eq!(event.user_id.as_deref(), Some("reader-1"));
    }

    #[tokio::test]
    async fn test_disabled_drops_events() {
        let mut analytics = Analytics::new(Arc::new(MemoryStore::new()), None);
        analytics.set_config(AnalyticsConfigUpdate {
            enabled: Some(false),
            ..Default::default()
        });
        analytics
            .track(EventKind::GestureTriggered, Payload::new())
            .await;
        assert_eq!(analytics.pending(), 0);
    }

    #[tokio::test]
    async fn test_batch_size_triggers_send() {
        let transport = Arc::new(FakeTransport::default());
        let mut analytics = Analytics::new(Arc::new(MemoryStore::new()), Some(transport.clone()));
        analytics.set_config(AnalyticsConfigUpdate {
            batch_size: Some(3),
            endpoint: Some(Some("https://collect.example/batch".to_string())),
            ..Default::default()
        });

        for _ in 0..3 {
            analytics
                .track(EventKind::GestureTriggered, Payload::new())
                .await;
        }

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "https://collect.example/batch");
        assert_eq!(sent[0].1.events.len(), 3);
        assert_eq!(sent[0].1.metadata.app_version, APP_VERSION);
        drop(sent);
        assert_eq!(analytics.pending(), 0);
        assert!(analytics.backup().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_backs_up() {
        let transport = Arc::new(FakeTransport {
            fail: true,
            ..FakeTransport::default()
        });
        let mut analytics = Analytics::new(Arc::new(MemoryStore::new()), Some(transport));
        analytics.set_config(AnalyticsConfigUpdate {
            endpoint: Some(Some("https://collect.example/batch".to_string())),
            ..Default::default()
        });

        analytics.track(EventKind::EggHatched, Payload::new()).await;
        analytics.flush().await;
        assert_eq!(analytics.backup().len(), 1);
    }

    #[tokio::test]
    async fn test_backup_keeps_newest_hundred() {
        let mut analytics = Analytics::new(Arc::new(MemoryStore::new()), None);
        for i in 0..105 {
            analytics
                .track(EventKind::BuddyInteractionTick, payload(json!({ "n": i })))
                .await;
        }
        analytics.flush().await;

        let backup = analytics.backup();
        assert_eq!(backup.len(), BACKUP_LIMIT);
        assert_eq!(backup[0].payload["n"], 5);
        assert_eq!(backup[BACKUP_LIMIT - 1].payload["n"], 104);
    }

    #[tokio::test]
    async fn test_requeue_backup_retries_delivery() {
        let store = Arc::new(MemoryStore::new());
        let mut offline = Analytics::new(store.clone(), None);
        offline.track(EventKind::EggCreated, Payload::new()).await;
        offline.track(EventKind::EggHatched, Payload::new()).await;
        offline.flush().await;

        let transport = Arc::new(FakeTransport::default());
        let mut online = Analytics::new(store, Some(transport.clone()));
        online.set_config(AnalyticsConfigUpdate {
            endpoint: Some(Some("https://collect.example/batch".to_string())),
            ..Default::default()
        });

        assert_eq!(online.requeue_backup(), 2);
        assert!(online.backup().is_empty());
        online.flush().await;

        assert_eq!(transport.sent.lock().unwrap()[0].1.events.len(), 2);
        assert_eq!(online.requeue_backup(), 0);
    }

    #[test]
    fn test_config_persists_and_merges() {
        let store = Arc::new(MemoryStore::new());
        let mut analytics = Analytics::new(store.clone(), None);
        analytics.set_config(AnalyticsConfigUpdate {
            batch_size: Some(25),
            ..Default::default()
        });

        let restored = Analytics::new(store.clone(), None);
        assert_eq!(restored.config().batch_size, 25);
        assert!(restored.config().enabled);

        store
            .set(keys::ANALYTICS_CONFIG, r#"{"flushInterval":5000}"#)
            .unwrap();
        let partial = Analytics::new(store, None);
        assert_eq!(partial.config().flush_interval(), Duration::from_secs(5));
        assert_eq!(partial.config().batch_size, 10);
    }

    #[tokio::test]
    async fn test_run_drains_bus_and_flushes_on_close() {
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = channel();
        let analytics = Analytics::new(store, None);
        let task = tokio::spawn(analytics.run(rx));

        tx.analytics(
            EventKind::GestureTriggered,
            json!({ "buddyId": "kitten-ninja" }),
        );
        tx.emit(Event::egg_ready("kitten-ninja"));
        tx.emit(Event::announcement("Hi!"));
        drop(tx);

        let analytics = task.await.unwrap();
        let kinds: Vec<EventKind> = analytics.backup().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::GestureTriggered, EventKind::EggReadyToHatch]
        );
        assert_eq!(analytics.backup()[1].payload["buddyId"], "kitten-ninja");
    }
}
