use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::JobStatus;

/// State changes published by the engine. Subscribers that fall behind miss
/// events; every event is also reflected in durable state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    JobUpdated {
        job_id: String,
        account_id: String,
        status: JobStatus,
    },
    ScheduleTriggered {
        schedule_id: String,
        job_id: String,
        status: JobStatus,
        retry_count: u32,
    },
    InitializationProgress {
        account_id: String,
        overall_progress: f64,
        status: String,
    },
    CycleCompleted {
        account_id: String,
        batch_id: String,
        applied: u32,
        blocked: u32,
        skipped: u32,
        pending_approval: u32,
    },
    EmergencyStop {
        account_id: String,
        reason: String,
    },
    Resumed {
        account_id: String,
    },
}

impl EngineEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::JobUpdated { .. } => "job_updated",
            EngineEvent::ScheduleTriggered { .. } => "schedule_triggered",
            EngineEvent::InitializationProgress { .. } => "initialization_progress",
            EngineEvent::CycleCompleted { .. } => "cycle_completed",
            EngineEvent::EmergencyStop { .. } => "emergency_stop",
            EngineEvent::Resumed { .. } => "resumed",
        }
    }
}

/// Cloneable publisher. Sending with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let sink = EventSink::default();
        let mut rx = sink.subscribe();
        sink.publish(EngineEvent::Resumed {
            account_id: "a".to_string(),
        });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.name(), "resumed");
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        EventSink::default().publish(EngineEvent::EmergencyStop {
            account_id: "a".to_string(),
            reason: "x".to_string(),
        });
    }

    #[test]
    fn events_are_tagged() {
        let json = serde_json::to_value(EngineEvent::Resumed {
            account_id: "a".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "resumed");
    }
}
