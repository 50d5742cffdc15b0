//! The tagged domain events the research-state aggregate applies and the
//! event store persists. One variant per command-table entry; each carries
//! exactly the payload its command emits, matching the "use tagged data per
//! event type, never duck typing" design note.

use chrono::{DateTime, Utc};
use research_core::cost::CostRecord;
use research_core::model::{
    Analysis, Citation, DAGNode, Perspective, ResearchMode, ResearchStatus,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DomainEvent {
    ResearchStarted {
        query: String,
        mode: ResearchMode,
        occurred_at: DateTime<Utc>,
    },
    PlanCreated {
        topic: String,
        perspectives: Vec<Perspective>,
        dag_nodes: Vec<DAGNode>,
        occurred_at: DateTime<Utc>,
    },
    WorkerStarted {
        worker_id: String,
        num: u32,
        objective: String,
        perspective: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    WorkerCompleted {
        worker_id: String,
        output: String,
        facts: Vec<String>,
        sources: Vec<String>,
        cost: CostRecord,
        occurred_at: DateTime<Utc>,
    },
    WorkerFailed {
        worker_id: String,
        error: String,
        occurred_at: DateTime<Utc>,
    },
    AnalysisStarted {
        total_facts: usize,
        occurred_at: DateTime<Utc>,
    },
    AnalysisCompleted {
        analysis: Analysis,
        cost: CostRecord,
        occurred_at: DateTime<Utc>,
    },
    SynthesisStarted {
        occurred_at: DateTime<Utc>,
    },
    ReportGenerated {
        title: String,
        summary: String,
        content: String,
        citations: Vec<Citation>,
        cost: CostRecord,
        occurred_at: DateTime<Utc>,
    },
    ResearchCompleted {
        duration_ms: u64,
        occurred_at: DateTime<Utc>,
    },
    ResearchFailed {
        error: String,
        occurred_at: DateTime<Utc>,
    },
    ResearchCancelled {
        occurred_at: DateTime<Utc>,
    },
}

impl DomainEvent {
    /// The status the aggregate is expected to be in immediately after
    /// applying this event, used by tests and by the resume path to sanity
    /// check replay without re-deriving the whole lattice.
    pub fn resulting_status(&self) -> Option<ResearchStatus> {
        match self {
            DomainEvent::ResearchStarted { .. } => Some(ResearchStatus::Planning),
            DomainEvent::PlanCreated { .. } => Some(ResearchStatus::Searching),
            DomainEvent::AnalysisStarted { .. } => Some(ResearchStatus::Analyzing),
            DomainEvent::AnalysisCompleted { .. } => Some(ResearchStatus::Synthesizing),
            DomainEvent::SynthesisStarted { .. } => Some(ResearchStatus::Synthesizing),
            DomainEvent::ResearchCompleted { .. } => Some(ResearchStatus::Complete),
            DomainEvent::ResearchFailed { .. } => Some(ResearchStatus::Failed),
            DomainEvent::ResearchCancelled { .. } => Some(ResearchStatus::Cancelled),
            _ => None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::ResearchStarted { .. } => "ResearchStarted",
            DomainEvent::PlanCreated { .. } => "PlanCreated",
            DomainEvent::WorkerStarted { .. } => "WorkerStarted",
            DomainEvent::WorkerCompleted { .. } => "WorkerCompleted",
            DomainEvent::WorkerFailed { .. } => "WorkerFailed",
            DomainEvent::AnalysisStarted { .. } => "AnalysisStarted",
            DomainEvent::AnalysisCompleted { .. } => "AnalysisCompleted",
            DomainEvent::SynthesisStarted { .. } => "SynthesisStarted",
            DomainEvent::ReportGenerated { .. } => "ReportGenerated",
            DomainEvent::ResearchCompleted { .. } => "ResearchCompleted",
            DomainEvent::ResearchFailed { .. } => "ResearchFailed",
            DomainEvent::ResearchCancelled { .. } => "ResearchCancelled",
        }
    }
}
