//! Process-local publish/subscribe bus for UI and observability consumers.
//! Advisory only: nothing durable or correctness-bearing flows through it,
//! which is why a full subscriber can simply drop the newest event rather
//! than block the publisher or the event store.

use chrono::{DateTime, Utc};
use research_core::cost::CostRecord;
use research_core::model::{Analysis, NodeStatus, Perspective, ResearchStatus};
use tokio::sync::broadcast;
use tracing::warn;

const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// The engine-level notifications a subscriber (CLI progress view, demo
/// harness, future UI) can observe. Distinct from `events::DomainEvent`:
/// this is a UI-facing projection, not the durable record the store
/// persists, so it is free to carry derived/display fields the event log
/// does not. Variants below the first block cover the finer-grained kinds
/// (diffusion iteration, delegation, gap-filling, cross-validation, ...)
/// that the aggregate's own command/event model is too coarse to carry;
/// the supervisor and DAG loops publish these directly.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StatusChanged {
        session_id: String,
        status: ResearchStatus,
    },
    PlanReady {
        session_id: String,
        perspectives: Vec<Perspective>,
    },
    NodeStatusChanged {
        session_id: String,
        node_id: String,
        status: NodeStatus,
    },
    WorkerProgress {
        session_id: String,
        worker_id: String,
        message: String,
    },
    AnalysisReady {
        session_id: String,
        analysis: Analysis,
    },
    CostUpdated {
        session_id: String,
        total: CostRecord,
    },
    Completed {
        session_id: String,
        duration_ms: u64,
    },
    Failed {
        session_id: String,
        error: String,
    },
    DiffusionStarted {
        session_id: String,
    },
    DiffusionIteration {
        session_id: String,
        iteration: u32,
    },
    DiffusionComplete {
        session_id: String,
        iterations_run: u32,
    },
    ResearchDelegated {
        session_id: String,
        topic: String,
    },
    DraftRefined {
        session_id: String,
    },
    SubResearcherProgress {
        session_id: String,
        topic: String,
        message: String,
    },
    AnalysisProgress {
        session_id: String,
        message: String,
    },
    SynthesisProgress {
        session_id: String,
        message: String,
    },
    CrossValidationStarted {
        session_id: String,
    },
    CrossValidationComplete {
        session_id: String,
        contradictions_found: usize,
    },
    GapFillingStarted {
        session_id: String,
        gap_count: usize,
    },
    GapFillingComplete {
        session_id: String,
    },
    FinalReportStarted {
        session_id: String,
    },
}

impl EngineEvent {
    pub fn session_id(&self) -> &str {
        match self {
            EngineEvent::StatusChanged { session_id, .. }
            | EngineEvent::PlanReady { session_id, .. }
            | EngineEvent::NodeStatusChanged { session_id, .. }
            | EngineEvent::WorkerProgress { session_id, .. }
            | EngineEvent::AnalysisReady { session_id, .. }
            | EngineEvent::CostUpdated { session_id, .. }
            | EngineEvent::Completed { session_id, .. }
            | EngineEvent::Failed { session_id, .. }
            | EngineEvent::DiffusionStarted { session_id, .. }
            | EngineEvent::DiffusionIteration { session_id, .. }
            | EngineEvent::DiffusionComplete { session_id, .. }
            | EngineEvent::ResearchDelegated { session_id, .. }
            | EngineEvent::DraftRefined { session_id, .. }
            | EngineEvent::SubResearcherProgress { session_id, .. }
            | EngineEvent::AnalysisProgress { session_id, .. }
            | EngineEvent::SynthesisProgress { session_id, .. }
            | EngineEvent::CrossValidationStarted { session_id, .. }
            | EngineEvent::CrossValidationComplete { session_id, .. }
            | EngineEvent::GapFillingStarted { session_id, .. }
            | EngineEvent::GapFillingComplete { session_id, .. }
            | EngineEvent::FinalReportStarted { session_id, .. } => session_id,
        }
    }
}

/// A broadcast bus: every subscriber gets its own bounded lane, and a lane
/// that falls behind loses its oldest events rather than stalling the
/// publisher.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<(DateTime<Utc>, EngineEvent)>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender }
    }

    /// Publishes an event to all current subscribers. Returns the number of
    /// subscribers the event was delivered to; a lagging subscriber drops
    /// the oldest buffered event to make room rather than ever blocking
    /// this call.
    pub fn publish(&self, event: EngineEvent) -> usize {
        match self.sender.send((Utc::now(), event)) {
            Ok(n) => n,
            Err(_) => 0, // no subscribers currently attached
        }
    }

    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A single subscriber's lane. Wraps `broadcast::Receiver`'s lag behavior
/// into a plain `Option`: a lagged receive is logged and treated as "skip
/// ahead", never surfaced as an error to callers.
pub struct EventSubscriber {
    receiver: broadcast::Receiver<(DateTime<Utc>, EngineEvent)>,
}

impl EventSubscriber {
    pub async fn recv(&mut self) -> Option<(DateTime<Utc>, EngineEvent)> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, dropping oldest events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_event(session_id: &str) -> EngineEvent {
        EngineEvent::StatusChanged {
            session_id: session_id.to_string(),
            status: ResearchStatus::Planning,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_events_in_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        bus.publish(status_event("s1"));
        bus.publish(EngineEvent::Completed {
            session_id: "s1".into(),
            duration_ms: 42,
        });

        let (_, first) = sub.recv().await.unwrap();
        assert!(matches!(first, EngineEvent::StatusChanged { .. }));
        let (_, second) = sub.recv().await.unwrap();
        assert!(matches!(second, EngineEvent::Completed { .. }));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(status_event("s1")), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_their_own_copy() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(status_event("s1"));

        assert!(a.recv().await.is_some());
        assert!(b.recv().await.is_some());
    }

    #[tokio::test]
    async fn overflowing_a_lagging_subscriber_does_not_block_publisher() {
        let bus = EventBus::with_capacity(2);
        let mut sub = bus.subscribe();

        for i in 0..10 {
            bus.publish(status_event(&format!("s{i}")));
        }

        // The lagging subscriber skips ahead instead of hanging; it should
        // still be able to receive something without this test timing out.
        assert!(sub.recv().await.is_some());
    }

    #[test]
    fn subscriber_count_tracks_active_subscriptions() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        let _a = bus.subscribe();
        let _b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn session_id_resolves_for_every_fine_grained_progress_variant() {
        let events = vec![
            EngineEvent::DiffusionStarted { session_id: "s1".into() },
            EngineEvent::DiffusionIteration { session_id: "s1".into(), iteration: 2 },
            EngineEvent::DiffusionComplete { session_id: "s1".into(), iterations_run: 3 },
            EngineEvent::ResearchDelegated { session_id: "s1".into(), topic: "x".into() },
            EngineEvent::DraftRefined { session_id: "s1".into() },
            EngineEvent::SubResearcherProgress { session_id: "s1".into(), topic: "x".into(), message: "m".into() },
            EngineEvent::AnalysisProgress { session_id: "s1".into(), message: "m".into() },
            EngineEvent::SynthesisProgress { session_id: "s1".into(), message: "m".into() },
            EngineEvent::CrossValidationStarted { session_id: "s1".into() },
            EngineEvent::CrossValidationComplete { session_id: "s1".into(), contradictions_found: 1 },
            EngineEvent::GapFillingStarted { session_id: "s1".into(), gap_count: 2 },
            EngineEvent::GapFillingComplete { session_id: "s1".into() },
            EngineEvent::FinalReportStarted { session_id: "s1".into() },
        ];
        for event in events {
            assert_eq!(event.session_id(), "s1");
        }
    }
}
