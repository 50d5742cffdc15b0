//! Shared plumbing used by both orchestrator drivers: committing one
//! command at a time to the aggregate, persisting the resulting event, and
//! projecting it onto the UI-facing bus.

use research_core::error::ResearchError;
use research_events::aggregate::{Command, ResearchState};
use research_events::bus::{EngineEvent, EventBus};
use research_events::events::DomainEvent;
use research_events::store::EventStore;

/// Validates and applies `command`, persists the single event it produces
/// with the correct `expected_version`, clears the uncommitted buffer, and
/// projects the event onto `bus`. Every orchestrator step funnels through
/// this so state, store and bus can never drift out of sync.
pub async fn commit(
    state: &mut ResearchState,
    store: &dyn EventStore,
    bus: &EventBus,
    session_id: &str,
    command: Command,
) -> Result<(), ResearchError> {
    let expected_version = state.version;
    state.handle(command)?;

    let events = state.uncommitted_events().to_vec();
    store
        .append_events(session_id, events.clone(), expected_version)
        .await?;
    state.clear_uncommitted();

    for event in &events {
        for engine_event in project(session_id, event, state) {
            bus.publish(engine_event);
        }
    }

    Ok(())
}

/// Turns one durable `DomainEvent` into zero or more UI-facing
/// `EngineEvent`s. A `CostUpdated` is appended alongside any event that
/// changes `total_cost`, matching §4.1's "minimum event kind" list.
fn project(session_id: &str, event: &DomainEvent, state: &ResearchState) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    match event {
        DomainEvent::ResearchStarted { .. } => out.push(EngineEvent::StatusChanged {
            session_id: session_id.to_string(),
            status: state.status,
        }),
        DomainEvent::PlanCreated { perspectives, .. } => {
            out.push(EngineEvent::PlanReady {
                session_id: session_id.to_string(),
                perspectives: perspectives.clone(),
            });
            out.push(EngineEvent::StatusChanged {
                session_id: session_id.to_string(),
                status: state.status,
            });
        }
        DomainEvent::WorkerStarted { worker_id, .. } => out.push(EngineEvent::NodeStatusChanged {
            session_id: session_id.to_string(),
            node_id: worker_id.clone(),
            status: research_core::model::NodeStatus::Running,
        }),
        DomainEvent::WorkerCompleted { worker_id, cost, .. } => {
            out.push(EngineEvent::NodeStatusChanged {
                session_id: session_id.to_string(),
                node_id: worker_id.clone(),
                status: research_core::model::NodeStatus::Complete,
            });
            if cost.total_tokens > 0 {
                out.push(EngineEvent::CostUpdated {
                    session_id: session_id.to_string(),
                    total: state.total_cost,
                });
            }
        }
        DomainEvent::WorkerFailed { worker_id, .. } => out.push(EngineEvent::NodeStatusChanged {
            session_id: session_id.to_string(),
            node_id: worker_id.clone(),
            status: research_core::model::NodeStatus::Failed,
        }),
        DomainEvent::AnalysisStarted { .. } => out.push(EngineEvent::StatusChanged {
            session_id: session_id.to_string(),
            status: state.status,
        }),
        DomainEvent::AnalysisCompleted { analysis, .. } => {
            out.push(EngineEvent::AnalysisReady {
                session_id: session_id.to_string(),
                analysis: analysis.clone(),
            });
            out.push(EngineEvent::CostUpdated {
                session_id: session_id.to_string(),
                total: state.total_cost,
            });
        }
        DomainEvent::SynthesisStarted { .. } => out.push(EngineEvent::StatusChanged {
            session_id: session_id.to_string(),
            status: state.status,
        }),
        DomainEvent::ReportGenerated { .. } => out.push(EngineEvent::CostUpdated {
            session_id: session_id.to_string(),
            total: state.total_cost,
        }),
        DomainEvent::ResearchCompleted { duration_ms, .. } => out.push(EngineEvent::Completed {
            session_id: session_id.to_string(),
            duration_ms: *duration_ms,
        }),
        DomainEvent::ResearchFailed { error, .. } => out.push(EngineEvent::Failed {
            session_id: session_id.to_string(),
            error: error.clone(),
        }),
        DomainEvent::ResearchCancelled { .. } => out.push(EngineEvent::StatusChanged {
            session_id: session_id.to_string(),
            status: state.status,
        }),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::model::ResearchMode;
    use research_events::store::SqliteEventStore;

    #[tokio::test]
    async fn commit_persists_and_projects_start_research() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let mut state = ResearchState::new("s1");

        commit(
            &mut state,
            &store,
            &bus,
            "s1",
            Command::StartResearch {
                query: "quantum computing cryptography".into(),
                mode: ResearchMode::Diffusion,
            },
        )
        .await
        .unwrap();

        assert_eq!(store.current_version("s1").await.unwrap(), 1);
        let (_, event) = sub.recv().await.unwrap();
        assert!(matches!(event, EngineEvent::StatusChanged { .. }));
    }

    #[tokio::test]
    async fn commit_rejects_invalid_command_without_persisting() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        let bus = EventBus::new();
        let mut state = ResearchState::new("s1");

        // A worker cannot start before a plan has moved the aggregate into
        // `searching`.
        let err = commit(
            &mut state,
            &store,
            &bus,
            "s1",
            Command::StartWorker {
                id: "w1".into(),
                num: 1,
                objective: "x".into(),
                perspective: None,
            },
        )
        .await;
        assert!(err.is_err());
        assert_eq!(store.current_version("s1").await.unwrap(), 0);
    }
}
