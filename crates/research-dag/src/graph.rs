//! The in-memory task graph: nodes plus dependency edges, a status
//! lattice per node, and a ready-set query. Every operation locks the
//! whole graph; callers needing atomic "observe ready, then claim" pairing
//! use [`TaskGraph::claim_ready`] rather than composing `ready_tasks` with a
//! separate `set_status` call, which would race two workers onto the same
//! node.

use research_core::error::ResearchError;
use research_core::model::{DAGNode, NodeStatus};
use std::collections::HashSet;
use tokio::sync::RwLock;

struct Inner {
    nodes: Vec<DAGNode>,
}

/// A dependency-ordered graph of [`DAGNode`]s, safe under concurrent
/// mutation.
pub struct TaskGraph {
    inner: RwLock<Inner>,
}

impl TaskGraph {
    pub fn new() -> Self {
        TaskGraph {
            inner: RwLock::new(Inner { nodes: Vec::new() }),
        }
    }

    pub async fn add_node(&self, node: DAGNode) {
        self.inner.write().await.nodes.push(node);
    }

    /// Declares that `child` depends on `parent`. Rejects if either id is
    /// missing from the graph.
    pub async fn add_dependency(&self, child: &str, parent: &str) -> Result<(), ResearchError> {
        let mut inner = self.inner.write().await;
        if !inner.nodes.iter().any(|n| n.id == parent) {
            return Err(ResearchError::Fatal(format!(
                "cannot add dependency: parent node '{parent}' does not exist"
            )));
        }
        let child_node = inner
            .nodes
            .iter_mut()
            .find(|n| n.id == child)
            .ok_or_else(|| {
                ResearchError::Fatal(format!(
                    "cannot add dependency: child node '{child}' does not exist"
                ))
            })?;
        if !child_node.dependencies.iter().any(|d| d == parent) {
            child_node.dependencies.push(parent.to_string());
        }
        Ok(())
    }

    /// A snapshot of nodes whose status is `pending` and whose every
    /// dependency is `complete`. A task may cease to be ready between this
    /// read and a caller's use of it only if another caller has already
    /// transitioned it to `running` via [`TaskGraph::claim_ready`].
    pub async fn ready_tasks(&self) -> Vec<DAGNode> {
        let inner = self.inner.read().await;
        Self::compute_ready(&inner.nodes)
    }

    /// The synthetic `fill_gaps` id is excluded from the ready set even
    /// when its dependencies are satisfied: gap-filling always runs after
    /// the DAG as a whole completes, driven directly by the orchestrator,
    /// never dispatched as an ordinary search node. Since it is therefore
    /// never claimed and never transitions to `complete`, a dependency on
    /// `fill_gaps` (as `synthesize` declares, to document that synthesis
    /// conceptually follows gap-filling) is treated as always satisfied
    /// rather than a real blocker.
    fn compute_ready(nodes: &[DAGNode]) -> Vec<DAGNode> {
        nodes
            .iter()
            .filter(|n| {
                !n.is_fill_gaps()
                    && n.status == NodeStatus::Pending
                    && n.dependencies.iter().all(|dep| {
                        dep == DAGNode::FILL_GAPS_ID
                            || nodes
                                .iter()
                                .find(|d| &d.id == dep)
                                .map(|d| d.status == NodeStatus::Complete)
                                .unwrap_or(false)
                    })
            })
            .cloned()
            .collect()
    }

    /// Atomically reads the ready set and transitions every entry to
    /// `running` in the same lock acquisition, so no two callers can ever
    /// observe the same node as ready.
    pub async fn claim_ready(&self) -> Vec<DAGNode> {
        let mut inner = self.inner.write().await;
        let ready_ids: HashSet<String> = Self::compute_ready(&inner.nodes)
            .into_iter()
            .map(|n| n.id)
            .collect();
        let mut claimed = Vec::with_capacity(ready_ids.len());
        for node in inner.nodes.iter_mut() {
            if ready_ids.contains(&node.id) {
                node.status = NodeStatus::Running;
                claimed.push(node.clone());
            }
        }
        claimed
    }

    pub async fn set_status(&self, node_id: &str, status: NodeStatus) -> Result<(), ResearchError> {
        let mut inner = self.inner.write().await;
        let node = inner
            .nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or_else(|| ResearchError::Fatal(format!("unknown node '{node_id}'")))?;
        if !node.status.can_transition_to(status) {
            return Err(ResearchError::Fatal(format!(
                "invalid transition for '{node_id}': {:?} -> {:?}",
                node.status, status
            )));
        }
        node.status = status;
        Ok(())
    }

    pub async fn set_result(&self, node_id: &str, result: serde_json::Value) -> Result<(), ResearchError> {
        let mut inner = self.inner.write().await;
        let node = inner
            .nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or_else(|| ResearchError::Fatal(format!("unknown node '{node_id}'")))?;
        node.result = Some(result);
        node.status = NodeStatus::Complete;
        Ok(())
    }

    pub async fn set_error(&self, node_id: &str, error: impl Into<String>) -> Result<(), ResearchError> {
        let mut inner = self.inner.write().await;
        let node = inner
            .nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or_else(|| ResearchError::Fatal(format!("unknown node '{node_id}'")))?;
        node.error = Some(error.into());
        node.status = NodeStatus::Failed;
        Ok(())
    }

    /// True iff the graph is non-empty and every node other than the
    /// synthetic `fill_gaps` node is terminal (complete or failed).
    pub async fn all_complete(&self) -> bool {
        let inner = self.inner.read().await;
        let relevant: Vec<&DAGNode> = inner.nodes.iter().filter(|n| !n.is_fill_gaps()).collect();
        !relevant.is_empty() && relevant.iter().all(|n| n.status.is_terminal())
    }

    /// Parents-before-children ordering via Kahn's algorithm. Callers that
    /// never built a cycle (every `add_dependency` succeeded) always get a
    /// full ordering back.
    pub async fn topological_order(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut in_degree: std::collections::HashMap<&str, usize> = inner
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n.dependencies.len()))
            .collect();
        let mut queue: std::collections::VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(inner.nodes.len());

        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            for node in &inner.nodes {
                if node.dependencies.iter().any(|d| d == id) {
                    if let Some(deg) = in_degree.get_mut(node.id.as_str()) {
                        *deg -= 1;
                        if *deg == 0 {
                            queue.push_back(node.id.as_str());
                        }
                    }
                }
            }
        }
        order
    }

    pub async fn node(&self, node_id: &str) -> Option<DAGNode> {
        self.inner.read().await.nodes.iter().find(|n| n.id == node_id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<DAGNode> {
        self.inner.read().await.nodes.clone()
    }

    /// Counts of pending/running/complete/failed nodes, used for the
    /// periodic diagnostic the executor emits while waiting for ready work.
    pub async fn counts(&self) -> (usize, usize, usize, usize) {
        let inner = self.inner.read().await;
        let mut pending = 0;
        let mut running = 0;
        let mut complete = 0;
        let mut failed = 0;
        for n in &inner.nodes {
            match n.status {
                NodeStatus::Pending => pending += 1,
                NodeStatus::Running => running += 1,
                NodeStatus::Complete => complete += 1,
                NodeStatus::Failed => failed += 1,
            }
        }
        (pending, running, complete, failed)
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::model::TaskType;

    fn node(id: &str, deps: Vec<&str>) -> DAGNode {
        DAGNode::new(id, TaskType::Search, format!("node {id}"), deps.into_iter().map(String::from).collect())
    }

    #[tokio::test]
    async fn ready_tasks_excludes_nodes_with_incomplete_dependencies() {
        let graph = TaskGraph::new();
        graph.add_node(node("a", vec![])).await;
        graph.add_node(node("b", vec!["a"])).await;

        let ready = graph.ready_tasks().await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "a");
    }

    #[tokio::test]
    async fn add_dependency_rejects_missing_nodes() {
        let graph = TaskGraph::new();
        graph.add_node(node("a", vec![])).await;
        assert!(graph.add_dependency("a", "missing").await.is_err());
        assert!(graph.add_dependency("missing", "a").await.is_err());
    }

    #[tokio::test]
    async fn claim_ready_transitions_to_running_so_a_second_claim_sees_nothing() {
        let graph = TaskGraph::new();
        graph.add_node(node("a", vec![])).await;

        let first = graph.claim_ready().await;
        assert_eq!(first.len(), 1);
        let second = graph.claim_ready().await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn set_result_completes_node_and_unblocks_dependents() {
        let graph = TaskGraph::new();
        graph.add_node(node("a", vec![])).await;
        graph.add_node(node("b", vec!["a"])).await;

        graph.claim_ready().await;
        graph.set_result("a", serde_json::json!({"ok": true})).await.unwrap();

        let ready = graph.ready_tasks().await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "b");
    }

    #[tokio::test]
    async fn set_error_fails_node_and_never_unblocks_dependents() {
        let graph = TaskGraph::new();
        graph.add_node(node("a", vec![])).await;
        graph.add_node(node("b", vec!["a"])).await;

        graph.claim_ready().await;
        graph.set_error("a", "tool outage").await.unwrap();

        assert!(graph.ready_tasks().await.is_empty());
        assert!(!graph.all_complete().await);
    }

    #[tokio::test]
    async fn all_complete_requires_nonempty_and_every_node_terminal() {
        let graph = TaskGraph::new();
        assert!(!graph.all_complete().await);

        graph.add_node(node("a", vec![])).await;
        assert!(!graph.all_complete().await);

        graph.claim_ready().await;
        graph.set_result("a", serde_json::json!(null)).await.unwrap();
        assert!(graph.all_complete().await);
    }

    #[tokio::test]
    async fn fill_gaps_node_is_never_claimed_and_does_not_block_all_complete() {
        let graph = TaskGraph::new();
        graph.add_node(node("a", vec![])).await;
        graph.add_node(node(DAGNode::FILL_GAPS_ID, vec!["a"])).await;

        graph.claim_ready().await;
        graph.set_result("a", serde_json::json!(null)).await.unwrap();

        assert!(graph.ready_tasks().await.is_empty());
        assert!(graph.all_complete().await);
    }

    #[tokio::test]
    async fn a_dependency_on_fill_gaps_is_treated_as_already_satisfied() {
        let graph = TaskGraph::new();
        graph.add_node(node("a", vec![])).await;
        graph.add_node(node(DAGNode::FILL_GAPS_ID, vec!["a"])).await;
        graph.add_node(node("synthesize", vec!["a", DAGNode::FILL_GAPS_ID])).await;

        graph.claim_ready().await;
        graph.set_result("a", serde_json::json!(null)).await.unwrap();

        let ready = graph.ready_tasks().await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "synthesize");
    }

    #[tokio::test]
    async fn topological_order_places_parents_before_children() {
        let graph = TaskGraph::new();
        graph.add_node(node("a", vec![])).await;
        graph.add_node(node("b", vec!["a"])).await;
        graph.add_node(node("c", vec!["a", "b"])).await;

        let order = graph.topological_order().await;
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }
}
