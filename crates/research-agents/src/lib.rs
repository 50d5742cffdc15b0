//! Sub-researcher and supervisor agent loops, perspective planning and
//! source analysis/synthesis: the two agent-shaped components (§4.6, §4.7)
//! plus the plain collaborators that turn their output into a cited report
//! (§4.9).

pub mod analysis;
pub mod perspectives;
pub mod sub_researcher;
pub mod supervisor;

pub use analysis::{analyze, synthesize, AnalysisOutcome};
pub use perspectives::{build_dag, plan_perspectives};
pub use sub_researcher::{SubResearcher, SubResearcherOutcome};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorOutcome};

/// Current version of the research-agents crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
