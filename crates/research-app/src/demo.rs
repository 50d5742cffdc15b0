//! Canned `ChatClient`/`ToolExecutor` pairs for `--demo` runs: no network
//! calls, no API key, deterministic output. Each script is long enough to
//! drive one orchestrator all the way to `CompleteResearch` without relying
//! on the scripted client's script-exhaustion fallback.

use research_core::llm::ChatClient;
use research_core::testing::{ScriptedChatClient, ScriptedToolExecutor};
use research_core::tool::ToolExecutor;
use std::collections::HashMap;
use std::sync::Arc;

/// A diffusion-mode walkthrough: one iteration of think/conduct_research,
/// a dispatched sub-researcher that finds a source, then refine and
/// complete. Mirrors the happy-path fixture the supervisor itself is
/// tested against.
pub fn diffusion_demo() -> (Arc<dyn ChatClient>, Arc<dyn ToolExecutor>) {
    let chat = Arc::new(ScriptedChatClient::new(
        "demo",
        vec![
            serde_json::json!({
                "objective": "quantum computing cryptography",
                "sub_questions": [],
                "scope_boundaries": [],
                "priority_sources": [],
            })
            .to_string(),
            "# Draft\n".to_string(),
            r#"<tool_call name="think">{"reflection": "start with Shor's algorithm"}</tool_call><tool_call name="conduct_research">{"topic": "Shor's algorithm impact on RSA encryption"}</tool_call>"#.to_string(),
            r#"<tool_call name="web_search">{"query": "Shor's algorithm RSA"}</tool_call>"#.to_string(),
            "<final_answer>RSA is vulnerable to Shor's algorithm.</final_answer>".to_string(),
            "Shor's algorithm threatens RSA [1]".to_string(),
            r#"<tool_call name="refine_draft">{}</tool_call><tool_call name="research_complete">{}</tool_call>"#.to_string(),
            "# Report\n\nShor's algorithm threatens RSA [1].".to_string(),
            serde_json::json!({"validated_facts": [], "contradictions": [], "knowledge_gaps": []}).to_string(),
            "## Summary\n\nShor's algorithm threatens RSA [1].".to_string(),
        ],
    ));

    let mut results = HashMap::new();
    results.insert("web_search".to_string(), "https://example.com/quantum".to_string());
    let tools = Arc::new(ScriptedToolExecutor::new(results));

    (chat, tools)
}

/// A DAG-mode walkthrough: three perspectives searched in parallel, an
/// analysis surfacing one important gap, a gap-fill pass, then synthesis.
pub fn dag_demo() -> (Arc<dyn ChatClient>, Arc<dyn ToolExecutor>) {
    let chat = Arc::new(ScriptedChatClient::new(
        "demo",
        vec![
            serde_json::json!([
                {"name": "Technical Expert", "focus": "mechanisms", "questions": []},
                {"name": "Practical User", "focus": "adoption", "questions": []},
                {"name": "Critic", "focus": "risks", "questions": []},
            ])
            .to_string(),
            "<final_answer>Mechanism details.</final_answer>".to_string(),
            "mechanism findings [1]".to_string(),
            "<final_answer>Adoption details.</final_answer>".to_string(),
            "adoption findings [1]".to_string(),
            "<final_answer>Risk details.</final_answer>".to_string(),
            "risk findings [1]".to_string(),
            serde_json::json!({
                "validated_facts": [],
                "contradictions": [],
                "knowledge_gaps": [
                    {"description": "pricing data is thin", "importance": 0.6, "suggested_queries": ["cloud provider pricing 2026"]},
                ],
            })
            .to_string(),
            "<final_answer>Pricing is comparable across providers.</final_answer>".to_string(),
            "pricing findings [1]".to_string(),
            "## Summary\n\nFull report across perspectives, including a gap-filled pricing pass.".to_string(),
        ],
    ));
    let tools = Arc::new(ScriptedToolExecutor::new(HashMap::new()));

    (chat, tools)
}
