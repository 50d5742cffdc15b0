//! Perspective planning: asks the model for 3-5 distinct research angles
//! on a topic, then lays them out as a DAG (`search_0..search_N` ->
//! `cross_validate` -> `fill_gaps` -> `synthesize`). Malformed planner
//! output falls back to [`Perspective::default_plan`] rather than failing
//! the session.

use research_core::error::ResearchError;
use research_core::llm::{ChatClient, ChatMessage};
use research_core::model::{DAGNode, Perspective, TaskType};

pub const CROSS_VALIDATE_ID: &str = "cross_validate";
pub const SYNTHESIZE_ID: &str = "synthesize";

/// Asks the model to propose research perspectives for `topic`. On
/// unparseable output, returns the reference 3-perspective fallback
/// (Technical Expert, Practical User, Critic) instead of propagating a
/// [`ResearchError::PlanningFailure`].
pub async fn plan_perspectives(
    chat: &dyn ChatClient,
    topic: &str,
) -> Result<Vec<Perspective>, ResearchError> {
    let prompt = format!(
        "Propose 3 to 5 distinct research perspectives for the topic \"{topic}\". \
         Respond with a JSON array of objects: \
         [{{\"name\": \"...\", \"focus\": \"...\", \"questions\": [\"...\"]}}]"
    );
    let response = chat
        .chat(&[ChatMessage::user(prompt)])
        .await
        .map_err(|e| ResearchError::llm(format!("perspective planning failed: {e}")))?;

    match parse_perspectives(response.content()) {
        Some(perspectives) if (3..=5).contains(&perspectives.len()) => Ok(perspectives),
        _ => Ok(Perspective::default_plan()),
    }
}

fn parse_perspectives(raw: &str) -> Option<Vec<Perspective>> {
    let value: serde_json::Value = serde_json::from_str(raw.trim()).ok()?;
    let array = value.as_array()?;
    let mut perspectives = Vec::with_capacity(array.len());
    for entry in array {
        let name = entry.get("name")?.as_str()?.to_string();
        let focus = entry.get("focus")?.as_str()?.to_string();
        let questions = entry
            .get("questions")
            .and_then(|q| q.as_array())
            .map(|q| q.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        perspectives.push(Perspective::new(name, focus, questions));
    }
    if perspectives.is_empty() {
        None
    } else {
        Some(perspectives)
    }
}

/// Lays `perspectives` out as a DAG: one `search_<n>` node per perspective,
/// all feeding a `cross_validate` analyze node, a synthetic `fill_gaps`
/// node depending on `cross_validate` (skipped in the executor's main
/// loop, run post-DAG), and a `synthesize` node depending on both.
pub fn build_dag(perspectives: &[Perspective]) -> Vec<DAGNode> {
    let mut nodes = Vec::with_capacity(perspectives.len() + 3);
    let mut search_ids = Vec::with_capacity(perspectives.len());

    for (i, perspective) in perspectives.iter().enumerate() {
        let id = format!("search_{i}");
        nodes.push(DAGNode::new(
            &id,
            TaskType::Search,
            format!("Research from the \"{}\" perspective: {}", perspective.name, perspective.focus),
            vec![],
        ));
        search_ids.push(id);
    }

    nodes.push(DAGNode::new(
        CROSS_VALIDATE_ID,
        TaskType::Analyze,
        "Cross-validate findings across perspectives",
        search_ids.clone(),
    ));

    nodes.push(DAGNode::new(
        DAGNode::FILL_GAPS_ID,
        TaskType::Search,
        "Fill knowledge gaps identified during cross-validation",
        vec![CROSS_VALIDATE_ID.to_string()],
    ));

    nodes.push(DAGNode::new(
        SYNTHESIZE_ID,
        TaskType::Synthesize,
        "Synthesize the final report",
        vec![CROSS_VALIDATE_ID.to_string(), DAGNode::FILL_GAPS_ID.to_string()],
    ));

    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::testing::ScriptedChatClient;

    #[tokio::test]
    async fn parses_well_formed_perspective_array() {
        let chat = ScriptedChatClient::new(
            "test",
            vec![serde_json::json!([
                {"name": "Technical Expert", "focus": "mechanisms", "questions": ["how does it work?"]},
                {"name": "Practical User", "focus": "adoption", "questions": []},
                {"name": "Critic", "focus": "risks", "questions": []},
            ])
            .to_string()],
        );
        let perspectives = plan_perspectives(&chat, "quantum cryptography").await.unwrap();
        assert_eq!(perspectives.len(), 3);
        assert_eq!(perspectives[0].name, "Technical Expert");
    }

    #[tokio::test]
    async fn falls_back_to_default_plan_on_malformed_output() {
        let chat = ScriptedChatClient::new("test", vec!["not json".to_string()]);
        let perspectives = plan_perspectives(&chat, "topic").await.unwrap();
        assert_eq!(perspectives, Perspective::default_plan());
    }

    #[tokio::test]
    async fn falls_back_when_array_length_is_out_of_range() {
        let chat = ScriptedChatClient::new(
            "test",
            vec![serde_json::json!([
                {"name": "Only One", "focus": "x", "questions": []},
            ])
            .to_string()],
        );
        let perspectives = plan_perspectives(&chat, "topic").await.unwrap();
        assert_eq!(perspectives, Perspective::default_plan());
    }

    #[test]
    fn build_dag_wires_search_nodes_into_cross_validate_then_fill_gaps_then_synthesize() {
        let dag = build_dag(&Perspective::default_plan());
        assert_eq!(dag.len(), 6); // 3 search + cross_validate + fill_gaps + synthesize

        let cross_validate = dag.iter().find(|n| n.id == CROSS_VALIDATE_ID).unwrap();
        assert_eq!(cross_validate.dependencies.len(), 3);

        let fill_gaps = dag.iter().find(|n| n.is_fill_gaps()).unwrap();
        assert_eq!(fill_gaps.dependencies, vec![CROSS_VALIDATE_ID.to_string()]);

        let synthesize = dag.iter().find(|n| n.id == SYNTHESIZE_ID).unwrap();
        assert!(synthesize.dependencies.contains(&CROSS_VALIDATE_ID.to_string()));
        assert!(synthesize.dependencies.contains(&DAGNode::FILL_GAPS_ID.to_string()));
    }
}
