//! The data model shared by every component: queries, briefs, drafts,
//! notes, perspectives, DAG nodes and the research session's status lattice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// An opaque natural-language research query.
pub type Query = String;

/// Structured objective for a session, produced once and immutable
/// thereafter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchBrief {
    pub objective: String,
    pub sub_questions: Vec<String>,
    pub scope_boundaries: Vec<String>,
    pub priority_sources: Vec<String>,
}

impl ResearchBrief {
    pub fn new(objective: impl Into<String>) -> Self {
        ResearchBrief {
            objective: objective.into(),
            sub_questions: Vec::new(),
            scope_boundaries: Vec::new(),
            priority_sources: Vec::new(),
        }
    }

    /// Appends the expansion-mode augmentation described for injection
    /// contexts: known findings, known gaps, and visited URLs, each
    /// suffixed onto the brief text rather than replacing any section.
    pub fn augmented_text(&self, injection: &InjectionContext) -> String {
        let mut text = self.render();
        if !injection.previous_findings.is_empty() {
            text.push_str("\n\nKnown findings (do not re-research):\n");
            for f in injection.previous_findings.iter().take(10) {
                text.push_str(&format!("- {f}\n"));
            }
        }
        if !injection.known_gaps.is_empty() {
            text.push_str("\nKnown gaps (prioritize):\n");
            for g in &injection.known_gaps {
                text.push_str(&format!("- {g}\n"));
            }
        }
        if !injection.visited_urls.is_empty() {
            text.push_str(&format!(
                "\nVisited URLs (avoid revisiting, {} total):\n",
                injection.visited_urls.len()
            ));
            for u in injection.visited_urls.iter().take(5) {
                text.push_str(&format!("- {u}\n"));
            }
        }
        text
    }

    fn render(&self) -> String {
        let mut text = format!("Objective: {}\n", self.objective);
        if !self.sub_questions.is_empty() {
            text.push_str("Sub-questions:\n");
            for q in &self.sub_questions {
                text.push_str(&format!("- {q}\n"));
            }
        }
        if !self.scope_boundaries.is_empty() {
            text.push_str("Scope boundaries:\n");
            for b in &self.scope_boundaries {
                text.push_str(&format!("- {b}\n"));
            }
        }
        if !self.priority_sources.is_empty() {
            text.push_str("Priority sources:\n");
            for s in &self.priority_sources {
                text.push_str(&format!("- {s}\n"));
            }
        }
        text
    }
}

/// Optional expansion-mode input carrying prior findings, known gaps and
/// already-visited URLs into a new session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InjectionContext {
    pub expansion_topic: Option<String>,
    pub previous_findings: Vec<String>,
    pub known_gaps: Vec<String>,
    pub visited_urls: Vec<String>,
}

/// The mutable, single-owner report artifact refined by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Draft {
    pub content: String,
}

impl Draft {
    pub fn new(content: impl Into<String>) -> Self {
        Draft {
            content: content.into(),
        }
    }

    pub fn replace(&mut self, new_content: impl Into<String>) {
        self.content = new_content.into();
    }
}

/// An immutable source reference: URL plus title.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Source {
    pub url: String,
    pub title: String,
}

/// A structured fact contributed by a sub-researcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubInsight {
    pub claim: String,
    pub source_url: String,
    pub confidence: f64,
}

impl SubInsight {
    pub fn new(claim: impl Into<String>, source_url: impl Into<String>, confidence: f64) -> Self {
        SubInsight {
            claim: claim.into(),
            source_url: source_url.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// A compressed, immutable finding handed off from a sub-researcher to the
/// supervisor or DAG orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub topic: String,
    pub findings: String,
    pub sources: Vec<Source>,
    pub insights: Vec<SubInsight>,
}

impl Note {
    pub fn new(topic: impl Into<String>, findings: impl Into<String>, sources: Vec<Source>) -> Self {
        Note {
            topic: topic.into(),
            findings: findings.into(),
            sources,
            insights: Vec::new(),
        }
    }

    /// URLs referenced by this note, in source-list order.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.sources.iter().map(|s| s.url.as_str())
    }
}

/// A named research angle used to parallelize coverage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Perspective {
    pub name: String,
    pub focus: String,
    pub questions: Vec<String>,
}

impl Perspective {
    pub fn new(name: impl Into<String>, focus: impl Into<String>, questions: Vec<String>) -> Self {
        Perspective {
            name: name.into(),
            focus: focus.into(),
            questions,
        }
    }

    /// The reference 3-perspective fallback used when perspective
    /// discovery returns malformed output (error kind "Planning failure").
    pub fn default_plan() -> Vec<Perspective> {
        vec![
            Perspective::new(
                "Technical Expert",
                "Deep technical mechanisms and implementation detail",
                vec![],
            ),
            Perspective::new(
                "Practical User",
                "Real-world usage, trade-offs and adoption concerns",
                vec![],
            ),
            Perspective::new(
                "Critic",
                "Limitations, risks and counter-arguments",
                vec![],
            ),
        ]
    }
}

/// The kind of work a DAG node performs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Search,
    Analyze,
    Synthesize,
    Validate,
}

/// A DAG node's place in the pending→running→{complete|failed} lattice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl NodeStatus {
    /// Whether `self -> next` is an allowed lattice transition.
    pub fn can_transition_to(self, next: NodeStatus) -> bool {
        matches!(
            (self, next),
            (NodeStatus::Pending, NodeStatus::Running)
                | (NodeStatus::Running, NodeStatus::Complete)
                | (NodeStatus::Running, NodeStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Complete | NodeStatus::Failed)
    }
}

/// A node in the task DAG.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DAGNode {
    pub id: String,
    pub task_type: TaskType,
    pub description: String,
    pub dependencies: Vec<String>,
    pub status: NodeStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl DAGNode {
    pub fn new(
        id: impl Into<String>,
        task_type: TaskType,
        description: impl Into<String>,
        dependencies: Vec<String>,
    ) -> Self {
        DAGNode {
            id: id.into(),
            task_type,
            description: description.into(),
            dependencies,
            status: NodeStatus::Pending,
            result: None,
            error: None,
        }
    }

    /// The synthetic post-DAG gap-filling node id. The DAG executor's
    /// per-task dispatch must special-case this id and never spawn work
    /// for it inside the main loop.
    pub const FILL_GAPS_ID: &'static str = "fill_gaps";

    pub fn is_fill_gaps(&self) -> bool {
        self.id == Self::FILL_GAPS_ID
    }
}

/// State of a single sub-researcher worker as tracked by the aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerState {
    pub id: String,
    pub num: u32,
    pub objective: String,
    pub perspective: Option<String>,
    pub status: NodeStatus,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// The research session's top-level status lattice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    Pending,
    Planning,
    Searching,
    Analyzing,
    Synthesizing,
    Complete,
    Failed,
    Cancelled,
}

impl ResearchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ResearchStatus::Complete | ResearchStatus::Failed | ResearchStatus::Cancelled
        )
    }
}

/// The research mode selected for a session: the diffusion (supervisor)
/// loop, or the DAG-based plan/search/synthesize pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResearchMode {
    Diffusion,
    Dag,
}

/// A validated fact produced by the analyzer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidatedFact {
    pub claim: String,
    pub score: f64,
    pub corroborating_sources: Vec<String>,
}

/// A contradiction detected between two claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contradiction {
    pub claim1: String,
    pub claim2: String,
    pub nature: String,
}

/// An analyzer-identified knowledge gap. Gaps with `importance >= 0.5`
/// trigger an additional round of targeted sub-research (gap-filling).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeGap {
    pub description: String,
    pub importance: f64,
    pub suggested_queries: Vec<String>,
}

impl KnowledgeGap {
    pub const GAP_FILL_THRESHOLD: f64 = 0.5;

    pub fn warrants_gap_fill(&self) -> bool {
        self.importance >= Self::GAP_FILL_THRESHOLD
    }
}

/// Output of the analyzer collaborator (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Analysis {
    pub validated_facts: Vec<ValidatedFact>,
    pub contradictions: Vec<Contradiction>,
    pub knowledge_gaps: Vec<KnowledgeGap>,
}

/// A sequential citation mapping a `[n]` marker to a unique URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub id: u32,
    pub url: String,
    pub title: String,
}

/// The final synthesized report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Report {
    pub title: String,
    pub summary: String,
    pub full_content: String,
    pub citations: Vec<Citation>,
}

/// Per-session identifier.
pub type SessionId = Uuid;

/// A timestamped interaction turn in an agent's working memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    pub role: String,
    pub content: String,
    pub token_count: usize,
    pub turn_num: u64,
    pub timestamp: DateTime<Utc>,
}

/// A compressed block of prior interactions at context-manager level `L`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub level: usize,
    pub content: String,
    pub token_count: usize,
    pub covered_turns: Vec<u64>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregated record of calls to one distinct tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolSummary {
    pub tool: String,
    pub call_count: u32,
    pub last_result: Option<String>,
    pub key_findings: Vec<String>,
}

/// A raw per-session map of node id -> arbitrary result payload, used to
/// thread `SearchResults`-shaped data (including `gap_`-prefixed entries
/// from post-DAG gap-filling) through the DAG orchestrator.
pub type SearchResults = HashMap<String, serde_json::Value>;
