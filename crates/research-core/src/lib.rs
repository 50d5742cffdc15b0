//! Core data model, error handling, configuration and external capability
//! interfaces shared by every other crate in the research engine.
//!
//! Nothing in this crate drives a research session itself; it defines the
//! vocabulary (`model`), the failure modes (`error`), the two capability
//! interfaces the core consumes (`llm`, `tool`), and small supporting pieces
//! (`cost`, `tokens`, `wire`, `config`) that the rest of the workspace builds
//! on.

pub mod config;
pub mod cost;
pub mod error;
pub mod llm;
pub mod model;
pub mod tokens;
pub mod tool;
pub mod wire;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{ErrorCategory, ResearchError, Result};

/// Current version of the research engine core.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports for downstream crates.
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::cost::CostRecord;
    pub use crate::error::{ErrorCategory, ResearchError, Result};
    pub use crate::llm::{ChatClient, ChatMessage, ChatResponse, Usage};
    pub use crate::model::*;
    pub use crate::tool::{ToolExecutor, ToolResult};
    pub use async_trait::async_trait;
    pub use serde_json::{json, Value};
    pub use uuid::Uuid;
}
