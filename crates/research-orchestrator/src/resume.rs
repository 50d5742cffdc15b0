//! Restart entry point: reconstructs a session's aggregate purely from its
//! persisted events and hands it to whichever orchestrator matches its
//! recorded mode. No snapshot is consulted; the event store's own
//! correctness guarantee already holds under events-only replay, so a
//! snapshot here would only be a latency shortcut this engine doesn't need.

use crate::dag_orchestrator::DagOrchestrator;
use crate::diffusion::DiffusionOrchestrator;
use research_core::error::ResearchError;
use research_core::model::{InjectionContext, ResearchMode};
use research_events::aggregate::ResearchState;
use research_events::bus::EventBus;
use research_events::store::EventStore;

/// Loads every event recorded for `session_id`, replays it into a
/// `ResearchState`, and resumes the matching orchestrator. A terminal
/// session's orchestrator returns it unchanged; there is nothing left to do.
pub async fn load_and_resume(
    session_id: &str,
    diffusion: &DiffusionOrchestrator,
    dag: &DagOrchestrator,
    injection: Option<&InjectionContext>,
    store: &dyn EventStore,
    bus: &EventBus,
) -> Result<ResearchState, ResearchError> {
    let events = store.load_events(session_id).await?;
    let state = ResearchState::load_from_events(session_id, &events);

    match state.mode {
        ResearchMode::Diffusion => diffusion.resume(state, injection, store, bus).await,
        ResearchMode::Dag => dag.resume(state, store, bus).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::commit;
    use crate::dag_orchestrator::DagOrchestratorConfig;
    use research_agents::SupervisorConfig;
    use research_core::testing::{ScriptedChatClient, ScriptedToolExecutor};
    use research_events::aggregate::Command;
    use research_events::store::SqliteEventStore;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn load_and_resume_dispatches_by_recorded_mode() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        let bus = EventBus::new();

        let mut state = ResearchState::new("s1");
        commit(
            &mut state,
            &store,
            &bus,
            "s1",
            Command::StartResearch {
                query: "resume dispatch test".into(),
                mode: ResearchMode::Diffusion,
            },
        )
        .await
        .unwrap();
        commit(
            &mut state,
            &store,
            &bus,
            "s1",
            Command::SetPlan {
                topic: "resume dispatch test".into(),
                perspectives: vec![],
                dag: vec![],
            },
        )
        .await
        .unwrap();

        let chat = Arc::new(ScriptedChatClient::new(
            "test",
            vec![
                serde_json::json!({"objective": "q", "sub_questions": [], "scope_boundaries": [], "priority_sources": []}).to_string(),
                "# Draft\n".to_string(),
                r#"<tool_call name="research_complete">{}</tool_call>"#.to_string(),
                serde_json::json!({"validated_facts": [], "contradictions": [], "knowledge_gaps": []}).to_string(),
                "## Summary\n\nDispatched via resume.".to_string(),
            ],
        ));
        let tools = Arc::new(ScriptedToolExecutor::new(HashMap::new()));
        let diffusion = DiffusionOrchestrator::new(chat, tools, SupervisorConfig::default());

        let dag_chat = Arc::new(ScriptedChatClient::new("test", vec![]));
        let dag_tools = Arc::new(ScriptedToolExecutor::new(HashMap::new()));
        let dag = DagOrchestrator::new(dag_chat, dag_tools, DagOrchestratorConfig::default());

        let resumed = load_and_resume("s1", &diffusion, &dag, None, &store, &bus).await.unwrap();
        assert_eq!(resumed.status, research_core::model::ResearchStatus::Complete);
        assert!(resumed.report_content.contains("Dispatched via resume"));
    }

    #[tokio::test]
    async fn load_and_resume_is_a_no_op_for_a_completed_session() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        let bus = EventBus::new();

        let chat = Arc::new(ScriptedChatClient::new(
            "test",
            vec![
                serde_json::json!([{"name": "Solo", "focus": "everything", "questions": []}]).to_string(),
                "<final_answer>Only detail.</final_answer>".to_string(),
                "only findings [1]".to_string(),
                serde_json::json!({"validated_facts": [], "contradictions": [], "knowledge_gaps": []}).to_string(),
                "## Summary\n\nDone already.".to_string(),
            ],
        ));
        let tools = Arc::new(ScriptedToolExecutor::new(HashMap::new()));
        let dag = DagOrchestrator::new(chat, tools, DagOrchestratorConfig::default());
        dag.run("s2", "one-shot topic", None, &store, &bus).await.unwrap();

        let no_op_chat = Arc::new(ScriptedChatClient::new("test", vec![]));
        let no_op_tools = Arc::new(ScriptedToolExecutor::new(HashMap::new()));
        let no_op_diffusion = DiffusionOrchestrator::new(no_op_chat.clone(), no_op_tools.clone(), SupervisorConfig::default());
        let no_op_dag = DagOrchestrator::new(no_op_chat, no_op_tools, DagOrchestratorConfig::default());

        let version_before = store.current_version("s2").await.unwrap();
        let resumed = load_and_resume("s2", &no_op_diffusion, &no_op_dag, None, &store, &bus).await.unwrap();
        assert_eq!(resumed.status, research_core::model::ResearchStatus::Complete);
        assert_eq!(store.current_version("s2").await.unwrap(), version_before);
    }
}
