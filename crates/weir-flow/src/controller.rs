use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use weir_core::config::FlowConfig;
use weir_core::error::{Result, WeirError};
use weir_core::traits::StepExecutor;
use weir_core::types::{Bundle, RunId, RunState, StepContext};

use crate::condition::select_branch;
use crate::graph::Graph;

/// Named step executors, resolved by the executor reference on each step.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under a name.
    pub fn register(&mut self, name: impl Into<String>, executor: impl StepExecutor) {
        self.executors.insert(name.into(), Arc::new(executor));
    }

    /// Register an already-shared executor.
    pub fn register_arc(&mut self, name: impl Into<String>, executor: Arc<dyn StepExecutor>) {
        self.executors.insert(name.into(), executor);
    }

    /// Get an executor by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(name).cloned()
    }

    /// List registered executor names.
    pub fn list(&self) -> Vec<&str> {
        self.executors.keys().map(|s| s.as_str()).collect()
    }
}

/// External inputs for one run, keyed by step name.
pub type ExternalInputs = HashMap<String, Bundle>;

/// Result of one step execution.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Which step was executed.
    pub step: String,
    /// 1-based attempt number within the run.
    pub attempt: u32,
    /// Execution time in milliseconds.
    pub elapsed_ms: u64,
    /// Branch selected by this step's route decision, if it is branching.
    pub branch: Option<String>,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run: RunId,
    pub started_at: DateTime<Utc>,
    /// All produced values.
    pub state: RunState,
    /// Per-execution results in execution order.
    pub steps: Vec<StepResult>,
    /// Name of the last step that executed.
    pub terminal_step: Option<String>,
    /// Branch selected by the last route decision of the run.
    pub terminal_branch: Option<String>,
    /// Back-edge traversal counts, keyed by edge label. Only traversed
    /// edges appear.
    pub loop_traversals: HashMap<String, u32>,
    pub total_elapsed_ms: u64,
}

impl RunReport {
    /// Number of times a step executed in this run.
    pub fn attempts(&self, step: &str) -> u32 {
        self.steps.iter().filter(|r| r.step == step).count() as u32
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct EdgeRun {
    delivered: bool,
    traversals: u32,
}

/// Executes one run of a flow graph to completion.
///
/// Steps are drained from a ready queue in deterministic order: entry steps
/// in declaration order, then steps in the order their inputs finish binding.
/// Branch decisions activate only matching out-edges; an edge delivering
/// into an already-executed step is a back edge and is counted against its
/// loop ceiling. Execution is sequential; each step is awaited and raced
/// against the cancellation token.
pub struct FlowController {
    graph: Arc<Graph>,
    config: FlowConfig,
}

impl FlowController {
    pub fn new(graph: Graph, config: FlowConfig) -> Self {
        Self {
            graph: Arc::new(graph),
            config,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Execute the graph once with the given external inputs.
    pub async fn run(
        &self,
        registry: &ExecutorRegistry,
        external: &ExternalInputs,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let start = Instant::now();
        let steps = self.graph.steps();
        let edges = self.graph.edges();

        // Resolve executors and external inputs up front; both are
        // configuration defects, not run-time surprises.
        let mut resolved: Vec<Arc<dyn StepExecutor>> = Vec::with_capacity(steps.len());
        for step in steps {
            let executor =
                registry
                    .get(&step.executor)
                    .ok_or_else(|| WeirError::ExecutorNotFound {
                        step: step.name.clone(),
                        executor: step.executor.clone(),
                    })?;
            resolved.push(executor);
            for input in &step.external {
                let supplied = external
                    .get(&step.name)
                    .is_some_and(|b| b.contains_key(input));
                if !supplied {
                    return Err(WeirError::MissingExternalInput {
                        step: step.name.clone(),
                        input: input.clone(),
                    });
                }
            }
        }

        let mut edge_target: Vec<usize> = Vec::with_capacity(edges.len());
        for edge in edges {
            let target = self
                .graph
                .step_index(&edge.to.step)
                .ok_or_else(|| WeirError::UnknownStep(edge.to.step.clone()))?;
            edge_target.push(target);
        }

        let mut state = RunState::new();
        let mut edge_run = vec![EdgeRun::default(); edges.len()];
        let mut attempts = vec![0u32; steps.len()];
        let mut queued = vec![false; steps.len()];
        let mut results: Vec<StepResult> = Vec::new();
        let mut last_branch: Option<String> = None;

        let mut queue: VecDeque<usize> = VecDeque::new();
        for i in self.graph.entry_steps() {
            queue.push_back(i);
            queued[i] = true;
        }

        while let Some(idx) = queue.pop_front() {
            queued[idx] = false;
            if cancel.is_cancelled() {
                return Err(WeirError::Cancelled);
            }

            let step = &steps[idx];
            let attempt = attempts[idx] + 1;
            info!(run = %run_id, step = %step.name, attempt, "executing step");

            let args = self.assemble_args(idx, external, &state, &edge_run)?;
            let ctx = StepContext {
                run: run_id.clone(),
                step: step.name.clone(),
                attempt,
                cancel: cancel.clone(),
            };

            let step_start = Instant::now();
            let outputs = self
                .invoke(resolved[idx].as_ref(), &step.name, args, ctx, &cancel)
                .await?;
            let elapsed_ms = step_start.elapsed().as_millis() as u64;

            for out in &step.outputs {
                if !outputs.contains_key(out) {
                    return Err(WeirError::StepExecutionFailed {
                        step: step.name.clone(),
                        cause: format!("declared output '{out}' missing from result"),
                    });
                }
            }

            // All outputs of one execution bind as a whole.
            state.bind(step.name.clone(), outputs);
            attempts[idx] = attempt;

            let branch = if step.is_branching() {
                let selected = select_branch(&step.name, &step.routes, &state)?.to_string();
                info!(step = %step.name, branch = %selected, "branch selected");
                last_branch = Some(selected.clone());
                Some(selected)
            } else {
                None
            };

            results.push(StepResult {
                step: step.name.clone(),
                attempt,
                elapsed_ms,
                branch: branch.clone(),
            });

            for &e in self.graph.outgoing(idx) {
                let edge = &edges[e];
                let active = match (&edge.branch, &branch) {
                    (None, _) => true,
                    (Some(b), Some(selected)) => b == selected,
                    (Some(_), None) => false,
                };
                if !active {
                    edge_run[e].delivered = false;
                    debug!(edge = %edge.label(), "edge pruned for this activation");
                    continue;
                }

                let target = edge_target[e];
                if attempts[target] > 0 {
                    edge_run[e].traversals += 1;
                    let limit = edge.max_traversals.unwrap_or(self.config.max_loops);
                    // The traversal that reaches the ceiling fails; a ceiling
                    // of N allows N-1 delivered re-entries.
                    if edge_run[e].traversals >= limit {
                        return Err(WeirError::LoopBudgetExceeded {
                            step: edge.to.step.clone(),
                            edge: edge.label(),
                            traversals: edge_run[e].traversals,
                            limit,
                            partial: Box::new(state),
                        });
                    }
                    debug!(
                        edge = %edge.label(),
                        traversal = edge_run[e].traversals,
                        "back edge traversed"
                    );
                }
                edge_run[e].delivered = true;

                if !queued[target] && self.is_ready(target, &edge_run) {
                    queue.push_back(target);
                    queued[target] = true;
                }
            }
        }

        let loop_traversals: HashMap<String, u32> = edges
            .iter()
            .zip(&edge_run)
            .filter(|(_, r)| r.traversals > 0)
            .map(|(e, r)| (e.label(), r.traversals))
            .collect();

        let report = RunReport {
            run: run_id,
            started_at,
            terminal_step: results.last().map(|r| r.step.clone()),
            terminal_branch: last_branch,
            state,
            steps: results,
            loop_traversals,
            total_elapsed_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            run = %report.run,
            terminal_step = report.terminal_step.as_deref().unwrap_or("-"),
            terminal_branch = report.terminal_branch.as_deref().unwrap_or("-"),
            elapsed_ms = report.total_elapsed_ms,
            "run complete"
        );
        Ok(report)
    }

    /// A step is ready when every required edge-bound input has a delivered
    /// edge. External and optional inputs never block readiness.
    fn is_ready(&self, idx: usize, edge_run: &[EdgeRun]) -> bool {
        let step = &self.graph.steps()[idx];
        step.inputs
            .iter()
            .filter(|input| step.input_is_required(input))
            .all(|input| match self.graph.incoming(idx).get(input) {
                Some(edge_ids) => edge_ids.iter().any(|&e| edge_run[e].delivered),
                None => false,
            })
    }

    fn assemble_args(
        &self,
        idx: usize,
        external: &ExternalInputs,
        state: &RunState,
        edge_run: &[EdgeRun],
    ) -> Result<Bundle> {
        let step = &self.graph.steps()[idx];
        let mut args = Bundle::new();
        for input in &step.inputs {
            if step.external.iter().any(|n| n == input) {
                if let Some(value) = external.get(&step.name).and_then(|b| b.get(input)) {
                    args.insert(input.clone(), value.clone());
                }
                continue;
            }
            let delivered = self
                .graph
                .incoming(idx)
                .get(input)
                .and_then(|edge_ids| {
                    edge_ids
                        .iter()
                        .find(|&&e| edge_run[e].delivered)
                        .map(|&e| &self.graph.edges()[e].from)
                })
                .and_then(|from| state.get(&from.step, &from.port));
            match delivered {
                Some(value) => {
                    args.insert(input.clone(), value.clone());
                }
                None if step.optional.iter().any(|n| n == input) => {}
                None => {
                    return Err(WeirError::UnboundInput {
                        step: step.name.clone(),
                        input: input.clone(),
                    });
                }
            }
        }
        Ok(args)
    }

    async fn invoke(
        &self,
        executor: &dyn StepExecutor,
        step: &str,
        args: Bundle,
        ctx: StepContext,
        cancel: &CancellationToken,
    ) -> Result<Bundle> {
        let fut = executor.execute(args, ctx);
        let result = match self.config.step_timeout_secs {
            Some(secs) => {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(WeirError::Cancelled),
                    res = tokio::time::timeout(Duration::from_secs(secs), fut) => match res {
                        Ok(inner) => inner,
                        Err(_) => {
                            return Err(WeirError::StepTimeout {
                                step: step.to_string(),
                                timeout_secs: secs,
                            })
                        }
                    },
                }
            }
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(WeirError::Cancelled),
                    res = fut => res,
                }
            }
        };
        result.map_err(|e| match e {
            WeirError::Cancelled => WeirError::Cancelled,
            other => WeirError::StepExecutionFailed {
                step: step.to_string(),
                cause: other.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weir_core::traits::FnExecutor;

    use crate::graph::{Edge, Step};

    fn echo_registry() -> ExecutorRegistry {
        let mut registry = ExecutorRegistry::new();
        registry.register("upper", FnExecutor(|args: Bundle, _ctx: StepContext| {
            let text = args
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let mut out = Bundle::new();
            out.insert("text".into(), serde_json::json!(text.to_uppercase()));
            Ok(out)
        }));
        registry
    }

    fn linear_graph() -> Graph {
        let steps = vec![
            Step::new("first", "upper")
                .with_inputs(["text"])
                .with_external(["text"])
                .with_outputs(["text"]),
            Step::new("second", "upper")
                .with_inputs(["text"])
                .with_outputs(["text"]),
        ];
        let edges = vec![Edge::bind(("first", "text"), ("second", "text"))];
        Graph::new(steps, edges).unwrap()
    }

    fn external_text(step: &str, text: &str) -> ExternalInputs {
        let mut bundle = Bundle::new();
        bundle.insert("text".into(), serde_json::json!(text));
        let mut external = ExternalInputs::new();
        external.insert(step.into(), bundle);
        external
    }

    #[tokio::test]
    async fn test_linear_run() {
        let controller = FlowController::new(linear_graph(), FlowConfig::default());
        let report = controller
            .run(
                &echo_registry(),
                &external_text("first", "hello"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.state.get_str("second", "text"), Some("HELLO"));
        assert_eq!(report.terminal_step.as_deref(), Some("second"));
        assert!(report.terminal_branch.is_none());
        assert_eq!(report.steps.len(), 2);
        assert!(report.loop_traversals.is_empty());
    }

    #[tokio::test]
    async fn test_missing_executor() {
        let controller = FlowController::new(linear_graph(), FlowConfig::default());
        let err = controller
            .run(
                &ExecutorRegistry::new(),
                &external_text("first", "x"),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WeirError::ExecutorNotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_external_input() {
        let controller = FlowController::new(linear_graph(), FlowConfig::default());
        let err = controller
            .run(
                &echo_registry(),
                &ExternalInputs::new(),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            WeirError::MissingExternalInput { step, input } => {
                assert_eq!(step, "first");
                assert_eq!(input, "text");
            }
            other => panic!("expected MissingExternalInput, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_step_failure_is_fatal() {
        let mut registry = ExecutorRegistry::new();
        registry.register("boom", FnExecutor(|_args: Bundle, _ctx: StepContext| {
            Err(WeirError::Config("provider unreachable".into()))
        }));

        let graph = Graph::new(
            vec![Step::new("only", "boom").with_outputs(["out"])],
            vec![],
        )
        .unwrap();
        let controller = FlowController::new(graph, FlowConfig::default());
        let err = controller
            .run(&registry, &ExternalInputs::new(), CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            WeirError::StepExecutionFailed { step, cause } => {
                assert_eq!(step, "only");
                assert!(cause.contains("provider unreachable"));
            }
            other => panic!("expected StepExecutionFailed, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_declared_output() {
        let mut registry = ExecutorRegistry::new();
        registry.register("empty", FnExecutor(|_args: Bundle, _ctx: StepContext| Ok(Bundle::new())));

        let graph = Graph::new(
            vec![Step::new("only", "empty").with_outputs(["reply"])],
            vec![],
        )
        .unwrap();
        let controller = FlowController::new(graph, FlowConfig::default());
        let err = controller
            .run(&registry, &ExternalInputs::new(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WeirError::StepExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn test_pre_cancelled_run() {
        let controller = FlowController::new(linear_graph(), FlowConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = controller
            .run(&echo_registry(), &external_text("first", "x"), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, WeirError::Cancelled));
    }

    #[test]
    fn test_registry_ops() {
        let registry = echo_registry();
        assert!(registry.get("upper").is_some());
        assert!(registry.get("lower").is_none());
        assert_eq!(registry.list(), vec!["upper"]);
    }
}
