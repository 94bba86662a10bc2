//! Typed event bus: one ordered stream per topic, broadcast to every
//! subscriber, modeled on a `broadcast::Sender`-per-topic websocket handler
//! but split into one channel per topic rather than one tagged enum, so
//! `StateTransition` bursts can never starve `Shutdown`.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{Outcome, ReviewSummary};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckScheduled {
    pub check_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckStarted {
    pub check_id: String,
    pub iteration: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckCompleted {
    pub check_id: String,
    pub iteration: usize,
    pub result: ReviewSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckErrored {
    pub check_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateTransition {
    pub from: RunState,
    pub to: RunState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HumanInputRequested {
    pub check_id: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotSaved {
    pub channel: String,
    pub thread_ts: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Shutdown {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome reported alongside `CheckCompleted` where callers need the
/// scheduler's verdict rather than just the raw `ReviewSummary`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckOutcomeRecorded {
    pub check_id: String,
    pub iteration: usize,
    pub outcome: Outcome,
}

const TOPIC_CAPACITY: usize = 256;

macro_rules! topic_channel {
    ($field:ident, $ty:ty) => {
        pub fn $field(&self) -> broadcast::Receiver<$ty> {
            self.$field.subscribe()
        }
    };
}

/// One `broadcast::Sender` per documented topic. Delivery is in-order per
/// topic because each topic is its own channel; handlers fan out but a slow
/// subscriber on one topic cannot reorder or block another.
pub struct EventBus {
    check_scheduled: broadcast::Sender<CheckScheduled>,
    check_started: broadcast::Sender<CheckStarted>,
    check_completed: broadcast::Sender<CheckCompleted>,
    check_errored: broadcast::Sender<CheckErrored>,
    state_transition: broadcast::Sender<StateTransition>,
    human_input_requested: broadcast::Sender<HumanInputRequested>,
    snapshot_saved: broadcast::Sender<SnapshotSaved>,
    shutdown: broadcast::Sender<Shutdown>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            check_scheduled: broadcast::channel(TOPIC_CAPACITY).0,
            check_started: broadcast::channel(TOPIC_CAPACITY).0,
            check_completed: broadcast::channel(TOPIC_CAPACITY).0,
            check_errored: broadcast::channel(TOPIC_CAPACITY).0,
            state_transition: broadcast::channel(TOPIC_CAPACITY).0,
            human_input_requested: broadcast::channel(TOPIC_CAPACITY).0,
            snapshot_saved: broadcast::channel(TOPIC_CAPACITY).0,
            shutdown: broadcast::channel(TOPIC_CAPACITY).0,
        }
    }

    pub fn publish_check_scheduled(&self, event: CheckScheduled) {
        let _ = self.check_scheduled.send(event);
    }

    pub fn publish_check_started(&self, event: CheckStarted) {
        let _ = self.check_started.send(event);
    }

    pub fn publish_check_completed(&self, event: CheckCompleted) {
        let _ = self.check_completed.send(event);
    }

    pub fn publish_check_errored(&self, event: CheckErrored) {
        let _ = self.check_errored.send(event);
    }

    pub fn publish_state_transition(&self, event: StateTransition) {
        let _ = self.state_transition.send(event);
    }

    pub fn publish_human_input_requested(&self, event: HumanInputRequested) {
        let _ = self.human_input_requested.send(event);
    }

    pub fn publish_snapshot_saved(&self, event: SnapshotSaved) {
        let _ = self.snapshot_saved.send(event);
    }

    pub fn publish_shutdown(&self, event: Shutdown) {
        let _ = self.shutdown.send(event);
    }

    topic_channel!(check_scheduled, CheckScheduled);
    topic_channel!(check_started, CheckStarted);
    topic_channel!(check_completed, CheckCompleted);
    topic_channel!(check_errored, CheckErrored);
    topic_channel!(state_transition, StateTransition);
    topic_channel!(human_input_requested, HumanInputRequested);
    topic_channel!(snapshot_saved, SnapshotSaved);
    topic_channel!(shutdown, Shutdown);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_events_in_publish_order() {
        let bus = EventBus::new();
        let mut rx = bus.check_started();
        bus.publish_check_started(CheckStarted { check_id: "a".into(), iteration: 0 });
        bus.publish_check_started(CheckStarted { check_id: "a".into(), iteration: 1 });
        assert_eq!(rx.recv().await.unwrap().iteration, 0);
        assert_eq!(rx.recv().await.unwrap().iteration, 1);
    }

    #[tokio::test]
    async fn topics_are_independent_channels() {
        let bus = EventBus::new();
        let mut shutdown_rx = bus.shutdown();
        bus.publish_check_started(CheckStarted { check_id: "a".into(), iteration: 0 });
        bus.publish_shutdown(Shutdown { error: Some("fatal".into()) });
        let received = shutdown_rx.recv().await.unwrap();
        assert_eq!(received.error, Some("fatal".to_string()));
    }

    #[tokio::test]
    async fn late_subscriber_misses_earlier_events_but_sees_new_ones() {
        let bus = EventBus::new();
        bus.publish_check_scheduled(CheckScheduled { check_id: "missed".into() });
        let mut rx = bus.check_scheduled();
        bus.publish_check_scheduled(CheckScheduled { check_id: "seen".into() });
        assert_eq!(rx.recv().await.unwrap().check_id, "seen");
    }
}
