//! The research-session aggregate: a command/event/apply state machine
//! with optimistic concurrency and deterministic replay. Every mutation is
//! expressed as a `Command`, validated against current state; a valid
//! command yields exactly one `DomainEvent`, which both mutates the
//! aggregate and lands in its uncommitted-events buffer for the caller to
//! persist via an `EventStore`.

use crate::events::DomainEvent;
use crate::store::StoredEvent;
use chrono::Utc;
use research_core::cost::CostRecord;
use research_core::error::ResearchError;
use research_core::model::{
    Analysis, Citation, Contradiction, DAGNode, KnowledgeGap, NodeStatus, Perspective,
    ResearchMode, ResearchStatus, ValidatedFact, WorkerState,
};
use std::collections::HashMap;

/// The full command vocabulary the aggregate accepts. One variant per
/// command-table entry.
#[derive(Debug, Clone)]
pub enum Command {
    StartResearch {
        query: String,
        mode: ResearchMode,
    },
    SetPlan {
        topic: String,
        perspectives: Vec<Perspective>,
        dag: Vec<DAGNode>,
    },
    StartWorker {
        id: String,
        num: u32,
        objective: String,
        perspective: Option<String>,
    },
    CompleteWorker {
        id: String,
        output: String,
        facts: Vec<String>,
        sources: Vec<String>,
        cost: CostRecord,
    },
    FailWorker {
        id: String,
        error: String,
    },
    StartAnalysis {
        total_facts: usize,
    },
    SetAnalysis {
        validated: Vec<ValidatedFact>,
        contradictions: Vec<Contradiction>,
        gaps: Vec<KnowledgeGap>,
        cost: CostRecord,
    },
    StartSynthesis,
    SetReport {
        title: String,
        summary: String,
        content: String,
        citations: Vec<Citation>,
        cost: CostRecord,
    },
    CompleteResearch {
        duration_ms: u64,
    },
    FailResearch {
        error: String,
    },
    CancelResearch,
}

/// The aggregate's current state, rebuilt by replaying its event stream.
#[derive(Debug, Clone)]
pub struct ResearchState {
    pub id: String,
    pub query: String,
    pub mode: ResearchMode,
    pub status: ResearchStatus,
    pub topic: String,
    pub perspectives: Vec<Perspective>,
    pub dag: Vec<DAGNode>,
    pub workers: HashMap<String, WorkerState>,
    pub analysis: Option<Analysis>,
    pub report_title: String,
    pub report_summary: String,
    pub report_content: String,
    pub citations: Vec<Citation>,
    pub total_cost: CostRecord,
    pub version: u64,
    uncommitted: Vec<DomainEvent>,
}

impl ResearchState {
    /// A fresh, unstarted aggregate. `status = pending` accepts only
    /// `StartResearch`.
    pub fn new(id: impl Into<String>) -> Self {
        ResearchState {
            id: id.into(),
            query: String::new(),
            mode: ResearchMode::Diffusion,
            status: ResearchStatus::Pending,
            topic: String::new(),
            perspectives: Vec::new(),
            dag: Vec::new(),
            workers: HashMap::new(),
            analysis: None,
            report_title: String::new(),
            report_summary: String::new(),
            report_content: String::new(),
            citations: Vec::new(),
            total_cost: CostRecord::zero(),
            version: 0,
            uncommitted: Vec::new(),
        }
    }

    /// Progress is completed DAG nodes divided by total DAG nodes; 0 when
    /// there is no DAG yet. Failed nodes count against the denominator but
    /// not the numerator, distinct from `is_terminal`'s complete-or-failed
    /// definition used for `all_complete`.
    pub fn progress(&self) -> f64 {
        if self.dag.is_empty() {
            return 0.0;
        }
        let done = self
            .dag
            .iter()
            .filter(|n| n.status == NodeStatus::Complete)
            .count();
        done as f64 / self.dag.len() as f64
    }

    pub fn uncommitted_events(&self) -> &[DomainEvent] {
        &self.uncommitted
    }

    pub fn clear_uncommitted(&mut self) {
        self.uncommitted.clear();
    }

    /// Validates `command` against current status, producing the single
    /// event it emits without mutating state. Returns a
    /// [`ResearchError::CommandValidation`] on a precondition failure.
    pub fn validate(&self, command: &Command) -> Result<DomainEvent, ResearchError> {
        use ResearchStatus::*;
        let now = Utc::now();

        let invalid = |reason: &str| {
            Err(ResearchError::command_validation(
                command_name(command),
                format!("{:?}", self.status),
                reason,
            ))
        };

        match command {
            Command::StartResearch { query, mode } => {
                if self.status != Pending {
                    return invalid("research already started");
                }
                if query.trim().is_empty() {
                    return invalid("query must not be empty");
                }
                Ok(DomainEvent::ResearchStarted {
                    query: query.clone(),
                    mode: *mode,
                    occurred_at: now,
                })
            }
            Command::SetPlan {
                topic,
                perspectives,
                dag,
            } => {
                if !matches!(self.status, Pending | Planning) {
                    return invalid("plan can only be set while pending or planning");
                }
                Ok(DomainEvent::PlanCreated {
                    topic: topic.clone(),
                    perspectives: perspectives.clone(),
                    dag_nodes: dag.clone(),
                    occurred_at: now,
                })
            }
            Command::StartWorker {
                id,
                num,
                objective,
                perspective,
            } => {
                if self.status != Searching {
                    return invalid("workers can only start while searching");
                }
                Ok(DomainEvent::WorkerStarted {
                    worker_id: id.clone(),
                    num: *num,
                    objective: objective.clone(),
                    perspective: perspective.clone(),
                    occurred_at: now,
                })
            }
            Command::CompleteWorker {
                id,
                output,
                facts,
                sources,
                cost,
            } => {
                match self.workers.get(id) {
                    Some(w) if w.status == NodeStatus::Running => {}
                    Some(_) => return invalid("worker is not running"),
                    None => return invalid("worker does not exist"),
                }
                Ok(DomainEvent::WorkerCompleted {
                    worker_id: id.clone(),
                    output: output.clone(),
                    facts: facts.clone(),
                    sources: sources.clone(),
                    cost: cost.clone(),
                    occurred_at: now,
                })
            }
            Command::FailWorker { id, error } => {
                if !self.workers.contains_key(id) {
                    return invalid("worker does not exist");
                }
                Ok(DomainEvent::WorkerFailed {
                    worker_id: id.clone(),
                    error: error.clone(),
                    occurred_at: now,
                })
            }
            Command::StartAnalysis { total_facts } => {
                if self.status != Searching {
                    return invalid("analysis can only start while searching");
                }
                Ok(DomainEvent::AnalysisStarted {
                    total_facts: *total_facts,
                    occurred_at: now,
                })
            }
            Command::SetAnalysis {
                validated,
                contradictions,
                gaps,
                cost,
            } => {
                if self.status != Analyzing {
                    return invalid("analysis result can only be set while analyzing");
                }
                Ok(DomainEvent::AnalysisCompleted {
                    analysis: Analysis {
                        validated_facts: validated.clone(),
                        contradictions: contradictions.clone(),
                        knowledge_gaps: gaps.clone(),
                    },
                    cost: cost.clone(),
                    occurred_at: now,
                })
            }
            Command::StartSynthesis => {
                if !matches!(self.status, Analyzing | Synthesizing) {
                    return invalid("synthesis can only start while analyzing or synthesizing");
                }
                Ok(DomainEvent::SynthesisStarted { occurred_at: now })
            }
            Command::SetReport {
                title,
                summary,
                content,
                citations,
                cost,
            } => {
                if self.status != Synthesizing {
                    return invalid("report can only be set while synthesizing");
                }
                Ok(DomainEvent::ReportGenerated {
                    title: title.clone(),
                    summary: summary.clone(),
                    content: content.clone(),
                    citations: citations.clone(),
                    cost: cost.clone(),
                    occurred_at: now,
                })
            }
            Command::CompleteResearch { duration_ms } => {
                if self.status.is_terminal() {
                    return invalid("research is already in a terminal state");
                }
                Ok(DomainEvent::ResearchCompleted {
                    duration_ms: *duration_ms,
                    occurred_at: now,
                })
            }
            Command::FailResearch { error } => {
                if self.status.is_terminal() {
                    return invalid("research is already in a terminal state");
                }
                Ok(DomainEvent::ResearchFailed {
                    error: error.clone(),
                    occurred_at: now,
                })
            }
            Command::CancelResearch => {
                if self.status.is_terminal() {
                    return invalid("research is already in a terminal state");
                }
                Ok(DomainEvent::ResearchCancelled { occurred_at: now })
            }
        }
    }

    /// Validates and applies `command` in one step, appending the emitted
    /// event to the uncommitted-events buffer. The caller is responsible
    /// for persisting the buffer via an `EventStore` and clearing it on
    /// success.
    pub fn handle(&mut self, command: Command) -> Result<(), ResearchError> {
        let event = self.validate(&command)?;
        self.apply(&event);
        self.uncommitted.push(event);
        Ok(())
    }

    /// Applies an event to mutate state. Pure and deterministic: replaying
    /// the same event sequence always yields the same state.
    pub fn apply(&mut self, event: &DomainEvent) {
        match event {
            DomainEvent::ResearchStarted { query, mode, .. } => {
                self.query = query.clone();
                self.mode = *mode;
                self.status = ResearchStatus::Planning;
            }
            DomainEvent::PlanCreated {
                topic,
                perspectives,
                dag_nodes,
                ..
            } => {
                self.topic = topic.clone();
                self.perspectives = perspectives.clone();
                self.dag = dag_nodes.clone();
                self.workers = dag_nodes
                    .iter()
                    .map(|n| {
                        (
                            n.id.clone(),
                            WorkerState {
                                id: n.id.clone(),
                                num: 0,
                                objective: n.description.clone(),
                                perspective: None,
                                status: NodeStatus::Pending,
                                output: None,
                                error: None,
                            },
                        )
                    })
                    .collect();
                self.status = ResearchStatus::Searching;
            }
            DomainEvent::WorkerStarted {
                worker_id,
                num,
                objective,
                perspective,
                ..
            } => {
                let worker = self
                    .workers
                    .entry(worker_id.clone())
                    .or_insert_with(|| WorkerState {
                        id: worker_id.clone(),
                        num: *num,
                        objective: objective.clone(),
                        perspective: perspective.clone(),
                        status: NodeStatus::Pending,
                        output: None,
                        error: None,
                    });
                worker.num = *num;
                worker.objective = objective.clone();
                worker.perspective = perspective.clone();
                worker.status = NodeStatus::Running;
                set_node_status(&mut self.dag, worker_id, NodeStatus::Running);
            }
            DomainEvent::WorkerCompleted {
                worker_id,
                output,
                cost,
                ..
            } => {
                if let Some(w) = self.workers.get_mut(worker_id) {
                    w.status = NodeStatus::Complete;
                    w.output = Some(output.clone());
                }
                set_node_status(&mut self.dag, worker_id, NodeStatus::Complete);
                self.total_cost = self.total_cost.clone() + cost.clone();
            }
            DomainEvent::WorkerFailed {
                worker_id, error, ..
            } => {
                if let Some(w) = self.workers.get_mut(worker_id) {
                    w.status = NodeStatus::Failed;
                    w.error = Some(error.clone());
                }
                set_node_status(&mut self.dag, worker_id, NodeStatus::Failed);
            }
            DomainEvent::AnalysisStarted { .. } => {
                self.status = ResearchStatus::Analyzing;
            }
            DomainEvent::AnalysisCompleted { analysis, cost, .. } => {
                self.analysis = Some(analysis.clone());
                self.total_cost = self.total_cost.clone() + cost.clone();
                self.status = ResearchStatus::Synthesizing;
            }
            DomainEvent::SynthesisStarted { .. } => {
                self.status = ResearchStatus::Synthesizing;
            }
            DomainEvent::ReportGenerated {
                title,
                summary,
                content,
                citations,
                cost,
                ..
            } => {
                self.report_title = title.clone();
                self.report_summary = summary.clone();
                self.report_content = content.clone();
                self.citations = citations.clone();
                self.total_cost = self.total_cost.clone() + cost.clone();
            }
            DomainEvent::ResearchCompleted { .. } => {
                self.status = ResearchStatus::Complete;
            }
            DomainEvent::ResearchFailed { .. } => {
                self.status = ResearchStatus::Failed;
            }
            DomainEvent::ResearchCancelled { .. } => {
                self.status = ResearchStatus::Cancelled;
            }
        }
        self.version += 1;
    }

    /// Reconstructs an aggregate by replaying `events` in order onto a
    /// fresh instance, clearing the uncommitted-events buffer. Equivalent
    /// to sequential `apply` calls; used by the resume path.
    pub fn load_from_events(id: impl Into<String>, events: &[StoredEvent]) -> Self {
        let mut state = ResearchState::new(id);
        for stored in events {
            state.apply(&stored.event);
        }
        state.uncommitted.clear();
        state
    }
}

fn set_node_status(dag: &mut [DAGNode], node_id: &str, status: NodeStatus) {
    if let Some(node) = dag.iter_mut().find(|n| n.id == node_id) {
        node.status = status;
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::StartResearch { .. } => "StartResearch",
        Command::SetPlan { .. } => "SetPlan",
        Command::StartWorker { .. } => "StartWorker",
        Command::CompleteWorker { .. } => "CompleteWorker",
        Command::FailWorker { .. } => "FailWorker",
        Command::StartAnalysis { .. } => "StartAnalysis",
        Command::SetAnalysis { .. } => "SetAnalysis",
        Command::StartSynthesis => "StartSynthesis",
        Command::SetReport { .. } => "SetReport",
        Command::CompleteResearch { .. } => "CompleteResearch",
        Command::FailResearch { .. } => "FailResearch",
        Command::CancelResearch => "CancelResearch",
    }
}
