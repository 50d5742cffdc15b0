//! Wires the DAG and diffusion research loops to the event-sourced
//! aggregate: two orchestrator drivers (§4.5–§4.9) sharing a common
//! commit/projection path, plus the resume entry point that reconstructs a
//! session purely from its event log.

pub mod common;
pub mod dag_orchestrator;
pub mod diffusion;
pub mod resume;

pub use common::commit;
pub use dag_orchestrator::{DagOrchestrator, DagOrchestratorConfig};
pub use diffusion::DiffusionOrchestrator;
pub use resume::load_and_resume;

/// Current version of the research-orchestrator crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
