//! Event bus for the reading buddies engine.
//!
//! Managers publish analytics signals, the "egg ready to hatch" signal and
//! screen-reader announcements through an explicit channel handed to their
//! constructors. The analytics batcher is the usual consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

/// Free-form analytics payload.
pub type Payload = Map<String, Value>;

/// Events published on the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A buddy analytics signal.
    Analytics(AnalyticsSignal),

    /// An egg's progress just reached its target.
    EggReadyToHatch {
        /// The subject whose egg is ready.
        subject_id: String,
    },

    /// Text that should be announced to assistive technology.
    Announcement {
        /// The transcript of the voice line that played.
        transcript: String,
    },
}

/// An analytics signal as emitted by a manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSignal {
    /// What happened.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Event details.
    pub payload: Payload,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
}

/// The kinds of analytics events the engine produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    EggCreated,
    EggReadyToHatch,
    EggHatched,
    AccessoryUnlocked,
    AccessoryEquipped,
    AccessoryUnequipped,
    GestureTriggered,
    BuddyHatched,
    ReadingMilestoneMet,
    BuddyInteractionTick,
}

impl EventKind {
    /// The wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::EggCreated => "egg_created",
            EventKind::EggReadyToHatch => "egg_ready_to_hatch",
            EventKind::EggHatched => "egg_hatched",
            EventKind::AccessoryUnlocked => "accessory_unlocked",
            EventKind::AccessoryEquipped => "accessory_equipped",
            EventKind::AccessoryUnequipped => "accessory_unequipped",
            EventKind::GestureTriggered => "gesture_triggered",
            EventKind::BuddyHatched => "buddy_hatched",
            EventKind::ReadingMilestoneMet => "reading_milestone_met",
            EventKind::BuddyInteractionTick => "buddy_interaction_tick",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event {
    /// Create an analytics event stamped with the current time.
    ///
    /// Non-object payload values are replaced by an empty payload.
    pub fn analytics(kind: EventKind, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            _ => Payload::new(),
        };
        Self::Analytics(AnalyticsSignal {
            kind,
            payload,
            timestamp: Utc::now(),
        })
    }

    /// Create an "egg ready to hatch" event.
    pub fn egg_ready(subject_id: impl Into<String>) -> Self {
        Self::EggReadyToHatch {
            subject_id: subject_id.into(),
        }
    }

    /// Create an announcement event.
    pub fn announcement(transcript: impl Into<String>) -> Self {
        Self::Announcement {
            transcript: transcript.into(),
        }
    }
}

/// Sending half of the bus. Cheap to clone; one per manager.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

/// Receiving half of the bus.
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Create a new event bus.
///
/// Returns a sender and receiver pair for event communication.
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

impl EventSender {
    /// A sender with no consumer; everything sent to it is dropped.
    pub fn detached() -> Self {
        channel().0
    }

    /// Publish an event. Publishing never fails the caller.
    pub fn emit(&self, event: Event) {
        if let Err(err) = self.tx.send(event) {
            tracing::trace!(event = ?err.0, "event bus has no consumer");
        }
    }

    /// Publish an analytics signal.
    pub fn analytics(&self, kind: EventKind, payload: Value) {
        self.emit(Event::analytics(kind, payload));
    }
}
