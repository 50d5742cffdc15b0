//! Orchestrator I2: plans a perspective DAG, drives it to completion under
//! the bounded-parallelism executor, folds context as nodes complete, gap-
//! fills any important knowledge gap the analyzer surfaces, then
//! synthesizes the final report. Where the diffusion orchestrator brackets
//! an opaque supervisor loop, this one has real per-node visibility: every
//! search node gets its own `StartWorker`/`CompleteWorker` pair committed
//! as it actually finishes, not retrospectively.

use crate::common::commit;
use async_trait::async_trait;
use research_agents::{analyze, build_dag, plan_perspectives, synthesize, SubResearcher};
use research_context::ContextManager;
use research_core::config::EngineConfig;
use research_core::cost::CostRecord;
use research_core::error::ResearchError;
use research_core::llm::ChatClient;
use research_core::model::{DAGNode, InjectionContext, KnowledgeGap, Note, ResearchMode};
use research_core::tool::ToolExecutor;
use research_dag::{ExecutionObserver, TaskGraph, TaskOutcome, TaskRunner};
use research_events::aggregate::{Command, ResearchState};
use research_events::bus::{EngineEvent, EventBus};
use research_events::store::EventStore;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub struct DagOrchestratorConfig {
    pub max_concurrent_researchers: usize,
    pub max_sub_researcher_iterations: u32,
}

impl Default for DagOrchestratorConfig {
    fn default() -> Self {
        DagOrchestratorConfig {
            max_concurrent_researchers: 3,
            max_sub_researcher_iterations: 5,
        }
    }
}

pub struct DagOrchestrator {
    chat: Arc<dyn ChatClient>,
    tools: Arc<dyn ToolExecutor>,
    config: DagOrchestratorConfig,
}

impl DagOrchestrator {
    pub fn new(chat: Arc<dyn ChatClient>, tools: Arc<dyn ToolExecutor>, config: DagOrchestratorConfig) -> Self {
        DagOrchestrator { chat, tools, config }
    }

    /// Drives one session end to end: `StartResearch` -> real `SetPlan` ->
    /// the DAG executor (per-node `StartWorker`/`CompleteWorker`/
    /// `FailWorker`, context folding between nodes) -> analysis -> targeted
    /// gap-filling for important gaps -> synthesis -> `CompleteResearch`.
    pub async fn run(
        &self,
        session_id: &str,
        query: &str,
        _injection: Option<&InjectionContext>,
        store: &dyn EventStore,
        bus: &EventBus,
    ) -> Result<ResearchState, ResearchError> {
        let mut state = ResearchState::new(session_id);

        commit(
            &mut state,
            store,
            bus,
            session_id,
            Command::StartResearch {
                query: query.to_string(),
                mode: ResearchMode::Dag,
            },
        )
        .await?;

        let perspectives = match plan_perspectives(&*self.chat, query).await {
            Ok(p) => p,
            Err(e) => {
                commit(&mut state, store, bus, session_id, Command::FailResearch { error: e.to_string() }).await?;
                return Err(e);
            }
        };
        let dag_nodes = build_dag(&perspectives);

        commit(
            &mut state,
            store,
            bus,
            session_id,
            Command::SetPlan {
                topic: query.to_string(),
                perspectives: perspectives.clone(),
                dag: dag_nodes.clone(),
            },
        )
        .await?;

        self.drive_to_completion(&mut state, query, &perspectives, &dag_nodes, store, bus, Instant::now())
            .await?;
        Ok(state)
    }

    /// Picks a session back up after an interruption. A plan must already
    /// be on record (status `searching` or later); workers already
    /// reflected in `state` are left alone and the DAG resumes with
    /// whatever is still pending. Terminal sessions are a no-op, matching
    /// idempotent-resume semantics.
    pub async fn resume(
        &self,
        mut state: ResearchState,
        store: &dyn EventStore,
        bus: &EventBus,
    ) -> Result<ResearchState, ResearchError> {
        if state.status.is_terminal() {
            return Ok(state);
        }
        let query = state.query.clone();
        let perspectives = state.perspectives.clone();
        let dag_nodes = state.dag.clone();
        self.drive_to_completion(&mut state, &query, &perspectives, &dag_nodes, store, bus, Instant::now())
            .await?;
        Ok(state)
    }

    /// Everything after a plan is on record: build the graph (pre-seeding
    /// already-finished workers as complete so a resumed session does not
    /// redo them), run the executor, analyze, gap-fill, synthesize, and
    /// close out the session.
    #[allow(clippy::too_many_arguments)]
    async fn drive_to_completion(
        &self,
        state: &mut ResearchState,
        query: &str,
        perspectives: &[research_core::model::Perspective],
        dag_nodes: &[DAGNode],
        store: &dyn EventStore,
        bus: &EventBus,
        started_at: Instant,
    ) -> Result<(), ResearchError> {
        let session_id = state.id.clone();
        let graph = Arc::new(TaskGraph::new());
        for node in dag_nodes {
            graph.add_node(node.clone()).await;
            if let Some(worker) = state.workers.get(&node.id) {
                match worker.status {
                    research_core::model::NodeStatus::Complete => {
                        let _ = graph.set_result(&node.id, serde_json::json!(null)).await;
                    }
                    research_core::model::NodeStatus::Failed => {
                        let _ = graph.set_error(&node.id, worker.error.clone().unwrap_or_default()).await;
                    }
                    _ => {}
                }
            }
        }

        let runner: Arc<dyn TaskRunner> = Arc::new(SubResearcherRunner {
            sub: SubResearcher::new(Arc::clone(&self.chat), Arc::clone(&self.tools), self.config.max_sub_researcher_iterations),
            counter: AtomicU32::new(0),
        });
        let observer = Arc::new(DagObserver {
            chat: Arc::clone(&self.chat),
            context: Mutex::new(ContextManager::from_config(&EngineConfig::default())),
            finished: Mutex::new(Vec::new()),
            facts_seen: AtomicUsize::new(0),
            bus: bus.clone(),
            session_id: session_id.clone(),
        });

        if let Err(e) = research_dag::run(
            graph.clone(),
            runner,
            observer.clone() as Arc<dyn ExecutionObserver>,
            self.config.max_concurrent_researchers,
            CancellationToken::new(),
        )
        .await
        {
            commit(state, store, bus, &session_id, Command::FailResearch { error: e.to_string() }).await?;
            return Err(e);
        }

        let finished = observer.finished.lock().await.clone();
        let mut notes: Vec<Note> = Vec::with_capacity(finished.len());
        for outcome in &finished {
            let worker_id = outcome.node_id.clone();
            let perspective_name = dag_nodes
                .iter()
                .position(|n| n.id == worker_id)
                .and_then(|i| perspectives.get(i))
                .map(|p| p.name.clone());
            commit(
                state,
                store,
                bus,
                &session_id,
                Command::StartWorker {
                    id: worker_id.clone(),
                    num: state.workers.len() as u32 + 1,
                    objective: outcome.note.topic.clone(),
                    perspective: perspective_name,
                },
            )
            .await?;
            match &outcome.error {
                None => {
                    commit(
                        state,
                        store,
                        bus,
                        &session_id,
                        Command::CompleteWorker {
                            id: worker_id,
                            output: outcome.note.findings.clone(),
                            facts: outcome.facts.clone(),
                            sources: outcome.note.urls().map(String::from).collect(),
                            cost: outcome.cost,
                        },
                    )
                    .await?;
                    notes.push(outcome.note.clone());
                }
                Some(error) => {
                    commit(state, store, bus, &session_id, Command::FailWorker { id: worker_id, error: error.clone() }).await?;
                }
            }
        }

        let analysis_outcome = analyze(&*self.chat, &notes, Some((bus, &session_id))).await;
        let mut total_cost = analysis_outcome.cost;

        // Gap-fill dispatches still need `Searching` status, so they run
        // (and commit their own worker events) before `StartAnalysis` moves
        // the aggregate on.
        let warranted_gaps = analysis_outcome
            .analysis
            .knowledge_gaps
            .iter()
            .filter(|g| g.warrants_gap_fill())
            .count();
        if warranted_gaps > 0 {
            bus.publish(EngineEvent::GapFillingStarted {
                session_id: session_id.clone(),
                gap_count: warranted_gaps,
            });
        }
        let gap_fill_notes = self.fill_gaps(&analysis_outcome.analysis.knowledge_gaps, notes.len()).await?;
        if warranted_gaps > 0 {
            bus.publish(EngineEvent::GapFillingComplete {
                session_id: session_id.clone(),
            });
        }
        for (i, (topic, result)) in gap_fill_notes.into_iter().enumerate() {
            let worker_id = format!("gap_fill_{i}");
            commit(
                state,
                store,
                bus,
                &session_id,
                Command::StartWorker {
                    id: worker_id.clone(),
                    num: state.workers.len() as u32 + 1,
                    objective: topic,
                    perspective: None,
                },
            )
            .await?;
            match result {
                Ok(outcome) => {
                    total_cost = total_cost + outcome.cost;
                    commit(
                        state,
                        store,
                        bus,
                        &session_id,
                        Command::CompleteWorker {
                            id: worker_id,
                            output: outcome.note.findings.clone(),
                            facts: vec![],
                            sources: outcome.note.urls().map(String::from).collect(),
                            cost: outcome.cost,
                        },
                    )
                    .await?;
                    notes.push(outcome.note);
                }
                Err(e) => {
                    commit(state, store, bus, &session_id, Command::FailWorker { id: worker_id, error: e.to_string() }).await?;
                }
            }
        }

        commit(
            state,
            store,
            bus,
            &session_id,
            Command::StartAnalysis {
                total_facts: observer.facts_seen.load(Ordering::SeqCst),
            },
        )
        .await?;

        commit(
            state,
            store,
            bus,
            &session_id,
            Command::SetAnalysis {
                validated: analysis_outcome.analysis.validated_facts.clone(),
                contradictions: analysis_outcome.analysis.contradictions.clone(),
                gaps: analysis_outcome.analysis.knowledge_gaps.clone(),
                cost: analysis_outcome.cost,
            },
        )
        .await?;

        commit(state, store, bus, &session_id, Command::StartSynthesis).await?;

        let (report, synth_cost) =
            synthesize(&*self.chat, query, &notes, &analysis_outcome.analysis, Some((bus, &session_id))).await?;
        total_cost = total_cost + synth_cost;

        commit(
            state,
            store,
            bus,
            &session_id,
            Command::SetReport {
                title: report.title,
                summary: report.summary,
                content: report.full_content,
                citations: report.citations,
                cost: total_cost,
            },
        )
        .await?;

        commit(
            state,
            store,
            bus,
            &session_id,
            Command::CompleteResearch {
                duration_ms: started_at.elapsed().as_millis() as u64,
            },
        )
        .await?;

        Ok(())
    }

    /// Dispatches one extra sub-researcher per knowledge gap with
    /// `importance >= 0.5`, using the gap's suggested queries (falling back
    /// to its description) as the topic. Unlike the main DAG fan-out, these
    /// run sequentially: there are rarely more than one or two, and
    /// unbounded concurrency here buys nothing.
    async fn fill_gaps(
        &self,
        gaps: &[KnowledgeGap],
        researcher_offset: usize,
    ) -> Result<Vec<(String, Result<research_agents::SubResearcherOutcome, ResearchError>)>, ResearchError> {
        let sub = SubResearcher::new(Arc::clone(&self.chat), Arc::clone(&self.tools), self.config.max_sub_researcher_iterations);
        let mut results = Vec::new();
        for (i, gap) in gaps.iter().filter(|g| g.warrants_gap_fill()).enumerate() {
            let topic = if gap.suggested_queries.is_empty() {
                gap.description.clone()
            } else {
                gap.suggested_queries.join("; ")
            };
            let num = researcher_offset as u32 + i as u32 + 1;
            let outcome = sub.run(&topic, num).await;
            results.push((topic, outcome));
        }
        Ok(results)
    }
}

struct SubResearcherRunner {
    sub: SubResearcher,
    counter: AtomicU32,
}

#[async_trait]
impl TaskRunner for SubResearcherRunner {
    async fn run_task(&self, node: &DAGNode) -> Result<TaskOutcome, ResearchError> {
        let num = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self.sub.run(&node.description, num).await?;
        let output = serde_json::json!({
            "node_id": node.id,
            "note": outcome.note,
            "cost": outcome.cost,
        });
        Ok(TaskOutcome {
            output,
            facts: vec![outcome.note.findings.clone()],
            sources: outcome.note.urls().map(String::from).collect(),
        })
    }
}

/// One search node's outcome, reconstructed from its serialized
/// `TaskOutcome` once the executor hands it to [`DagObserver`].
#[derive(Clone)]
struct FinishedNode {
    node_id: String,
    note: Note,
    facts: Vec<String>,
    cost: CostRecord,
    error: Option<String>,
}

/// Folds the session's context after every completed node per the DAG
/// executor's per-node loop, and records each node's outcome for the
/// orchestrator to turn into worker events once the whole graph settles.
struct DagObserver {
    chat: Arc<dyn ChatClient>,
    context: Mutex<ContextManager>,
    finished: Mutex<Vec<FinishedNode>>,
    facts_seen: AtomicUsize,
    bus: EventBus,
    session_id: String,
}

#[async_trait]
impl ExecutionObserver for DagObserver {
    async fn on_node_started(&self, node: &DAGNode) {
        let mut ctx = self.context.lock().await;
        ctx.add_interaction("system", format!("started node {}", node.id));
        drop(ctx);
        self.bus.publish(EngineEvent::ResearchDelegated {
            session_id: self.session_id.clone(),
            topic: node.description.clone(),
        });
    }

    async fn on_node_completed(&self, node_id: &str, outcome: &TaskOutcome) {
        self.bus.publish(EngineEvent::SubResearcherProgress {
            session_id: self.session_id.clone(),
            topic: node_id.to_string(),
            message: "finding complete".to_string(),
        });
        let note: Option<Note> = outcome
            .output
            .get("note")
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        let cost: CostRecord = outcome
            .output
            .get("cost")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_else(CostRecord::zero);

        self.facts_seen.fetch_add(outcome.facts.len(), Ordering::SeqCst);

        {
            let mut ctx = self.context.lock().await;
            ctx.add_tool_result(node_id.to_string(), outcome.facts.join("\n"), outcome.facts.clone());
            if ctx.should_fold() {
                if let Ok(directive) = ctx.decide_folding(&*self.chat).await {
                    let _ = ctx.fold(directive, &*self.chat).await;
                }
            }
        }

        if let Some(note) = note {
            self.finished.lock().await.push(FinishedNode {
                node_id: node_id.to_string(),
                note,
                facts: outcome.facts.clone(),
                cost,
                error: None,
            });
        }
    }

    async fn on_node_failed(&self, node_id: &str, error: &ResearchError) {
        let mut ctx = self.context.lock().await;
        ctx.add_interaction("system", format!("node {node_id} failed: {error}"));
        drop(ctx);
        self.finished.lock().await.push(FinishedNode {
            node_id: node_id.to_string(),
            note: Note::new(node_id, "", vec![]),
            facts: vec![],
            cost: CostRecord::zero(),
            error: Some(error.to_string()),
        });
    }
}
