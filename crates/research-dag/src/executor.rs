//! Drives a [`TaskGraph`] to completion under bounded parallelism, polling
//! for newly-ready work and dispatching each batch to a caller-supplied
//! [`TaskRunner`]. A failed node poisons only its descendants: they
//! simply never become ready, since `ready_tasks` requires every
//! dependency to be `complete`, and the executor proceeds with whatever
//! finished.

use async_trait::async_trait;
use research_core::error::ResearchError;
use research_core::model::{DAGNode, TaskType};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::graph::TaskGraph;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const DIAGNOSTIC_EVERY_N_WAITS: u32 = 10;

/// The outcome of running one search node.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub output: serde_json::Value,
    pub facts: Vec<String>,
    pub sources: Vec<String>,
}

/// The executor's seam to the rest of the system: turning a `search` node
/// into a sub-researcher invocation is the orchestrator's job, not the
/// graph's.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(&self, node: &DAGNode) -> Result<TaskOutcome, ResearchError>;
}

/// A no-op observer called once per batch so the orchestrator can publish
/// progress without the executor depending on `research-events` directly.
#[async_trait]
pub trait ExecutionObserver: Send + Sync {
    async fn on_node_started(&self, _node: &DAGNode) {}
    async fn on_node_completed(&self, _node_id: &str, _outcome: &TaskOutcome) {}
    async fn on_node_failed(&self, _node_id: &str, _error: &ResearchError) {}
    async fn on_waiting(&self, _pending: usize, _running: usize, _complete: usize, _failed: usize) {}
}

pub struct NullObserver;

#[async_trait]
impl ExecutionObserver for NullObserver {
    async fn on_node_started(&self, _node: &DAGNode) {}
    async fn on_node_completed(&self, _node_id: &str, _outcome: &TaskOutcome) {}
    async fn on_node_failed(&self, _node_id: &str, _error: &ResearchError) {}
    async fn on_waiting(&self, _pending: usize, _running: usize, _complete: usize, _failed: usize) {}
}

/// Drives `graph` to completion, dispatching `search` nodes to `runner`
/// under a `max_concurrent` cap; `analyze`/`synthesize` nodes are no-ops at
/// the node level, handled by the orchestrator after the DAG finishes.
/// Returns `Err(ResearchError::Cancelled)` if `cancel` fires before
/// completion.
pub async fn run(
    graph: Arc<TaskGraph>,
    runner: Arc<dyn TaskRunner>,
    observer: Arc<dyn ExecutionObserver>,
    max_concurrent: usize,
    cancel: CancellationToken,
) -> Result<(), ResearchError> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut consecutive_empty_waits: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(ResearchError::Cancelled);
        }
        if graph.all_complete().await {
            return Ok(());
        }

        let batch = graph.claim_ready().await;
        if batch.is_empty() {
            consecutive_empty_waits += 1;
            if consecutive_empty_waits % DIAGNOSTIC_EVERY_N_WAITS == 0 {
                let (pending, running, complete, failed) = graph.counts().await;
                observer.on_waiting(pending, running, complete, failed).await;
                info!(pending, running, complete, failed, "dag executor waiting for ready tasks");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }
        consecutive_empty_waits = 0;

        let mut handles = Vec::with_capacity(batch.len());
        for node in batch {
            let semaphore = semaphore.clone();
            let graph = graph.clone();
            let runner = runner.clone();
            let observer = observer.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                if cancel.is_cancelled() {
                    return;
                }
                observer.on_node_started(&node).await;
                run_one_node(&graph, &*runner, &*observer, &node).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

async fn run_one_node(
    graph: &TaskGraph,
    runner: &dyn TaskRunner,
    observer: &dyn ExecutionObserver,
    node: &DAGNode,
) {
    match node.task_type {
        TaskType::Analyze | TaskType::Synthesize | TaskType::Validate => {
            // No-op at the node level; the orchestrator runs these phases
            // after the whole DAG completes.
            let _ = graph.set_result(&node.id, serde_json::Value::Null).await;
            return;
        }
        TaskType::Search => {}
    }

    match runner.run_task(node).await {
        Ok(outcome) => {
            let _ = graph.set_result(&node.id, outcome.output.clone()).await;
            observer.on_node_completed(&node.id, &outcome).await;
        }
        Err(error) => {
            warn!(node_id = %node.id, %error, "dag node failed");
            let _ = graph.set_error(&node.id, error.to_string()).await;
            observer.on_node_failed(&node.id, &error).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::model::TaskType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner {
        calls: AtomicUsize,
        fail_ids: Vec<String>,
    }

    #[async_trait]
    impl TaskRunner for CountingRunner {
        async fn run_task(&self, node: &DAGNode) -> Result<TaskOutcome, ResearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_ids.contains(&node.id) {
                return Err(ResearchError::tool("web_search", "simulated failure"));
            }
            Ok(TaskOutcome {
                output: serde_json::json!({"node": node.id}),
                facts: vec![format!("fact from {}", node.id)],
                sources: vec![],
            })
        }
    }

    fn search_node(id: &str, deps: Vec<&str>) -> DAGNode {
        DAGNode::new(id, TaskType::Search, format!("search {id}"), deps.into_iter().map(String::from).collect())
    }

    #[tokio::test]
    async fn runs_to_completion_over_a_linear_chain() {
        let graph = Arc::new(TaskGraph::new());
        graph.add_node(search_node("a", vec![])).await;
        graph.add_node(search_node("b", vec!["a"])).await;

        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            fail_ids: vec![],
        });
        let observer = Arc::new(NullObserver);

        run(graph.clone(), runner.clone(), observer, 3, CancellationToken::new())
            .await
            .unwrap();

        assert!(graph.all_complete().await);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn a_failed_node_poisons_only_its_descendants() {
        let graph = Arc::new(TaskGraph::new());
        graph.add_node(search_node("a", vec![])).await;
        graph.add_node(search_node("b", vec!["a"])).await;
        graph.add_node(search_node("c", vec![])).await;

        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            fail_ids: vec!["a".to_string()],
        });
        let observer = Arc::new(NullObserver);

        run(graph.clone(), runner, observer, 3, CancellationToken::new())
            .await
            .unwrap();

        let snapshot = graph.snapshot().await;
        let a = snapshot.iter().find(|n| n.id == "a").unwrap();
        let b = snapshot.iter().find(|n| n.id == "b").unwrap();
        let c = snapshot.iter().find(|n| n.id == "c").unwrap();
        assert_eq!(a.status, research_core::model::NodeStatus::Failed);
        assert_eq!(b.status, research_core::model::NodeStatus::Pending);
        assert_eq!(c.status, research_core::model::NodeStatus::Complete);
    }

    #[tokio::test]
    async fn cancellation_is_observed_before_the_next_batch() {
        let graph = Arc::new(TaskGraph::new());
        graph.add_node(search_node("a", vec![])).await;

        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
            fail_ids: vec![],
        });
        let observer = Arc::new(NullObserver);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run(graph, runner, observer, 3, cancel).await;
        assert!(matches!(result, Err(ResearchError::Cancelled)));
    }

    #[tokio::test]
    async fn bounded_parallelism_never_exceeds_the_semaphore_cap() {
        use std::sync::Arc as StdArc;
        use tokio::sync::Mutex as TokioMutex;

        struct ConcurrencyTrackingRunner {
            in_flight: StdArc<AtomicUsize>,
            max_observed: StdArc<TokioMutex<usize>>,
        }

        #[async_trait]
        impl TaskRunner for ConcurrencyTrackingRunner {
            async fn run_task(&self, node: &DAGNode) -> Result<TaskOutcome, ResearchError> {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                {
                    let mut max = self.max_observed.lock().await;
                    if now > *max {
                        *max = now;
                    }
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(TaskOutcome {
                    output: serde_json::json!({"node": node.id}),
                    facts: vec![],
                    sources: vec![],
                })
            }
        }

        let graph = Arc::new(TaskGraph::new());
        for i in 0..6 {
            graph.add_node(search_node(&format!("n{i}"), vec![])).await;
        }

        let max_observed = StdArc::new(TokioMutex::new(0));
        let runner = Arc::new(ConcurrencyTrackingRunner {
            in_flight: StdArc::new(AtomicUsize::new(0)),
            max_observed: max_observed.clone(),
        });
        let observer = Arc::new(NullObserver);

        run(graph, runner, observer, 2, CancellationToken::new())
            .await
            .unwrap();

        assert!(*max_observed.lock().await <= 2);
    }
}
