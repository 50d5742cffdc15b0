//! Orchestrator I1: wires the Supervisor diffusion loop and Sub-Researcher
//! agent to the event-sourced aggregate. A session's entire diffusion run
//! happens inside `Supervisor::run`; this driver is responsible for
//! bracketing it with aggregate commands so the session is resumable and
//! observable even though the loop itself is opaque to the event store.

use crate::common::commit;
use research_agents::{Supervisor, SupervisorConfig};
use research_core::cost::CostRecord;
use research_core::error::ResearchError;
use research_core::llm::ChatClient;
use research_core::model::{InjectionContext, ResearchMode, ResearchStatus};
use research_core::tool::ToolExecutor;
use research_events::aggregate::{Command, ResearchState};
use research_events::bus::EventBus;
use research_events::store::EventStore;
use std::sync::Arc;
use std::time::Instant;

pub struct DiffusionOrchestrator {
    chat: Arc<dyn ChatClient>,
    tools: Arc<dyn ToolExecutor>,
    config: SupervisorConfig,
}

impl DiffusionOrchestrator {
    pub fn new(chat: Arc<dyn ChatClient>, tools: Arc<dyn ToolExecutor>, config: SupervisorConfig) -> Self {
        DiffusionOrchestrator { chat, tools, config }
    }

    /// Drives one session end to end: `StartResearch` -> (empty) `SetPlan`
    /// to enter `searching` -> the diffusion loop -> one `StartWorker`/
    /// `CompleteWorker` pair per kept Note -> analysis/synthesis -> report
    /// -> `CompleteResearch`. Every step is committed individually so a
    /// crash mid-session leaves a resumable, consistent event log.
    pub async fn run(
        &self,
        session_id: &str,
        query: &str,
        injection: Option<&InjectionContext>,
        store: &dyn EventStore,
        bus: &EventBus,
    ) -> Result<ResearchState, ResearchError> {
        let started_at = Instant::now();
        let mut state = ResearchState::new(session_id);

        commit(
            &mut state,
            store,
            bus,
            session_id,
            Command::StartResearch {
                query: query.to_string(),
                mode: ResearchMode::Diffusion,
            },
        )
        .await?;

        commit(
            &mut state,
            store,
            bus,
            session_id,
            Command::SetPlan {
                topic: query.to_string(),
                perspectives: vec![],
                dag: vec![],
            },
        )
        .await?;

        let supervisor = Supervisor::new(
            Arc::clone(&self.chat),
            Arc::clone(&self.tools),
            SupervisorConfig {
                max_iterations: self.config.max_iterations,
                max_concurrent_researchers: self.config.max_concurrent_researchers,
                max_sub_researcher_iterations: self.config.max_sub_researcher_iterations,
            },
        );

        let outcome = match supervisor.run(query, injection, Some((bus, session_id))).await {
            Ok(outcome) => outcome,
            Err(e) => {
                commit(
                    &mut state,
                    store,
                    bus,
                    session_id,
                    Command::FailResearch { error: e.to_string() },
                )
                .await?;
                return Err(e);
            }
        };

        for (i, note) in outcome.notes.iter().enumerate() {
            let worker_id = format!("sub-{i}");
            commit(
                &mut state,
                store,
                bus,
                session_id,
                Command::StartWorker {
                    id: worker_id.clone(),
                    num: i as u32 + 1,
                    objective: note.topic.clone(),
                    perspective: None,
                },
            )
            .await?;
            commit(
                &mut state,
                store,
                bus,
                session_id,
                Command::CompleteWorker {
                    id: worker_id,
                    output: note.findings.clone(),
                    facts: note.insights.iter().map(|f| f.claim.clone()).collect(),
                    sources: note.sources.iter().map(|s| s.url.clone()).collect(),
                    cost: CostRecord::zero(),
                },
            )
            .await?;
        }

        commit(
            &mut state,
            store,
            bus,
            session_id,
            Command::StartAnalysis {
                total_facts: outcome.notes.iter().map(|n| n.insights.len()).sum(),
            },
        )
        .await?;

        commit(
            &mut state,
            store,
            bus,
            session_id,
            Command::SetAnalysis {
                validated: vec![],
                contradictions: vec![],
                gaps: vec![],
                cost: CostRecord::zero(),
            },
        )
        .await?;

        commit(&mut state, store, bus, session_id, Command::StartSynthesis).await?;

        commit(
            &mut state,
            store,
            bus,
            session_id,
            Command::SetReport {
                title: outcome.report.title.clone(),
                summary: outcome.report.summary.clone(),
                content: outcome.report.full_content.clone(),
                citations: outcome.report.citations.clone(),
                cost: outcome.cost,
            },
        )
        .await?;

        commit(
            &mut state,
            store,
            bus,
            session_id,
            Command::CompleteResearch {
                duration_ms: started_at.elapsed().as_millis() as u64,
            },
        )
        .await?;

        Ok(state)
    }

    /// Picks a diffusion session back up after an interruption. The
    /// supervisor loop keeps no per-turn record in the event store, so there
    /// is nothing to replay into: resuming means re-running the loop against
    /// the same query and committing whatever bracket commands the recorded
    /// status hasn't already produced. Terminal sessions are a no-op.
    pub async fn resume(
        &self,
        mut state: ResearchState,
        injection: Option<&InjectionContext>,
        store: &dyn EventStore,
        bus: &EventBus,
    ) -> Result<ResearchState, ResearchError> {
        if state.status.is_terminal() {
            return Ok(state);
        }
        let started_at = Instant::now();
        let session_id = state.id.clone();
        let query = state.query.clone();

        if state.status == ResearchStatus::Pending {
            commit(
                &mut state,
                store,
                bus,
                &session_id,
                Command::StartResearch {
                    query: query.clone(),
                    mode: ResearchMode::Diffusion,
                },
            )
            .await?;
        }

        if state.status == ResearchStatus::Planning {
            commit(
                &mut state,
                store,
                bus,
                &session_id,
                Command::SetPlan {
                    topic: query.clone(),
                    perspectives: vec![],
                    dag: vec![],
                },
            )
            .await?;
        }

        let supervisor = Supervisor::new(
            Arc::clone(&self.chat),
            Arc::clone(&self.tools),
            SupervisorConfig {
                max_iterations: self.config.max_iterations,
                max_concurrent_researchers: self.config.max_concurrent_researchers,
                max_sub_researcher_iterations: self.config.max_sub_researcher_iterations,
            },
        );

        let outcome = match supervisor.run(&query, injection, Some((bus, &session_id))).await {
            Ok(outcome) => outcome,
            Err(e) => {
                commit(&mut state, store, bus, &session_id, Command::FailResearch { error: e.to_string() }).await?;
                return Err(e);
            }
        };

        let already_recorded = state.workers.len();
        for (i, note) in outcome.notes.iter().enumerate().skip(already_recorded) {
            let worker_id = format!("sub-{i}");
            commit(
                &mut state,
                store,
                bus,
                &session_id,
                Command::StartWorker {
                    id: worker_id.clone(),
                    num: i as u32 + 1,
                    objective: note.topic.clone(),
                    perspective: None,
                },
            )
            .await?;
            commit(
                &mut state,
                store,
                bus,
                &session_id,
                Command::CompleteWorker {
                    id: worker_id,
                    output: note.findings.clone(),
                    facts: note.insights.iter().map(|f| f.claim.clone()).collect(),
                    sources: note.sources.iter().map(|s| s.url.clone()).collect(),
                    cost: CostRecord::zero(),
                },
            )
            .await?;
        }

        if state.status == ResearchStatus::Searching {
            commit(
                &mut state,
                store,
                bus,
                &session_id,
                Command::StartAnalysis {
                    total_facts: outcome.notes.iter().map(|n| n.insights.len()).sum(),
                },
            )
            .await?;
        }

        if matches!(state.status, ResearchStatus::Analyzing) {
            commit(
                &mut state,
                store,
                bus,
                &session_id,
                Command::SetAnalysis {
                    validated: vec![],
                    contradictions: vec![],
                    gaps: vec![],
                    cost: CostRecord::zero(),
                },
            )
            .await?;

            commit(&mut state, store, bus, &session_id, Command::StartSynthesis).await?;
        }

        commit(
            &mut state,
            store,
            bus,
            &session_id,
            Command::SetReport {
                title: outcome.report.title.clone(),
                summary: outcome.report.summary.clone(),
                content: outcome.report.full_content.clone(),
                citations: outcome.report.citations.clone(),
                cost: outcome.cost,
            },
        )
        .await?;

        commit(
            &mut state,
            store,
            bus,
            &session_id,
            Command::CompleteResearch {
                duration_ms: started_at.elapsed().as_millis() as u64,
            },
        )
        .await?;

        Ok(state)
    }
}
