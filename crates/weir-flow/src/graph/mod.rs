//! Flow graph model: steps, edges, and construction-time validation.
//!
//! A flow is a directed graph of `Step`s connected by `Edge`s from producer
//! outputs to consumer inputs. Branching steps carry an ordered `Route` list;
//! edges labelled with a branch only deliver when that branch is selected.
//! Cycles are permitted: an edge that re-enters an already-executed step is a
//! back edge, bounded per edge by a traversal ceiling at run time.
//!
//! `Graph::new` validates the declaration statically: unknown steps or ports,
//! ambiguous input bindings, and inputs that nothing binds are rejected
//! before any run starts.

pub mod edge;
pub mod step;

pub use edge::{Edge, PortRef};
pub use step::Step;

use std::collections::{HashMap, HashSet};

use tracing::warn;

use weir_core::error::{Result, WeirError};

use crate::condition::Predicate;

/// A validated, immutable flow graph. Safely shareable across runs.
#[derive(Debug, Clone)]
pub struct Graph {
    steps: Vec<Step>,
    edges: Vec<Edge>,
    index: HashMap<String, usize>,
    /// Outgoing edge indices per step, in edge declaration order.
    outgoing: Vec<Vec<usize>>,
    /// Incoming edge indices per step, grouped by consumer input name.
    incoming: Vec<HashMap<String, Vec<usize>>>,
}

impl Graph {
    /// Build and validate a graph.
    pub fn new(steps: Vec<Step>, edges: Vec<Edge>) -> Result<Self> {
        let mut index = HashMap::new();
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.name.clone(), i).is_some() {
                return Err(WeirError::Graph(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
            if step.executor.is_empty() {
                return Err(WeirError::Graph(format!(
                    "step '{}' has no executor reference",
                    step.name
                )));
            }
            for name in step.external.iter().chain(&step.optional) {
                if !step.has_input(name) {
                    return Err(WeirError::Graph(format!(
                        "step '{}' marks undeclared input '{}'",
                        step.name, name
                    )));
                }
            }
        }

        let mut outgoing = vec![Vec::new(); steps.len()];
        let mut incoming: Vec<HashMap<String, Vec<usize>>> =
            vec![HashMap::new(); steps.len()];

        for (e, edge) in edges.iter().enumerate() {
            let from = *index
                .get(&edge.from.step)
                .ok_or_else(|| WeirError::UnknownStep(edge.from.step.clone()))?;
            let to = *index
                .get(&edge.to.step)
                .ok_or_else(|| WeirError::UnknownStep(edge.to.step.clone()))?;

            if !steps[from].has_output(&edge.from.port) {
                return Err(WeirError::Graph(format!(
                    "edge '{}' reads undeclared output '{}' of step '{}'",
                    edge.label(),
                    edge.from.port,
                    edge.from.step
                )));
            }
            if !steps[to].has_input(&edge.to.port) {
                return Err(WeirError::Graph(format!(
                    "edge '{}' feeds undeclared input '{}' of step '{}'",
                    edge.label(),
                    edge.to.port,
                    edge.to.step
                )));
            }
            if steps[to].external.iter().any(|n| n == &edge.to.port) {
                return Err(WeirError::Graph(format!(
                    "input '{}' of step '{}' is external but also bound by edge '{}'",
                    edge.to.port,
                    edge.to.step,
                    edge.label()
                )));
            }
            if let Some(branch) = &edge.branch {
                if !steps[from].routes.iter().any(|r| &r.branch == branch) {
                    return Err(WeirError::Graph(format!(
                        "edge '{}' is guarded by branch '{}' which step '{}' never selects",
                        edge.label(),
                        branch,
                        edge.from.step
                    )));
                }
            }

            outgoing[from].push(e);
            incoming[to]
                .entry(edge.to.port.clone())
                .or_default()
                .push(e);
        }

        // One producer per (input, branch): overlapping bindings are ambiguous.
        for (i, step) in steps.iter().enumerate() {
            for (input, edge_ids) in &incoming[i] {
                let mut seen: HashSet<Option<&str>> = HashSet::new();
                for &e in edge_ids {
                    if !seen.insert(edges[e].branch.as_deref()) {
                        return Err(WeirError::Graph(format!(
                            "input '{}' of step '{}' is bound by more than one edge on the same branch",
                            input, step.name
                        )));
                    }
                }
                if edge_ids.len() > 1 && seen.contains(&None) {
                    return Err(WeirError::Graph(format!(
                        "input '{}' of step '{}' mixes an unguarded binding with guarded ones",
                        input, step.name
                    )));
                }
            }
        }

        // Every input is edge-bound, external, or explicitly optional.
        for (i, step) in steps.iter().enumerate() {
            for input in &step.inputs {
                let externally = step.external.iter().any(|n| n == input);
                let optionally = step.optional.iter().any(|n| n == input);
                let bound = incoming[i].contains_key(input);
                if !externally && !optionally && !bound {
                    return Err(WeirError::UnboundInput {
                        step: step.name.clone(),
                        input: input.clone(),
                    });
                }
            }
        }

        // A run must have somewhere to start.
        let has_entry = steps
            .iter()
            .enumerate()
            .any(|(i, step)| Self::is_entry(step, &incoming[i]));
        if !steps.is_empty() && !has_entry {
            return Err(WeirError::Graph(
                "no entry step: every step waits on another step's output".to_string(),
            ));
        }

        // Exhaustiveness cannot be proven, but the obvious gap can be flagged.
        for step in &steps {
            if step.is_branching()
                && !step
                    .routes
                    .iter()
                    .any(|r| matches!(r.when, Predicate::Always))
            {
                warn!(
                    step = %step.name,
                    "route list has no catch-all; unmatched output will fail the run"
                );
            }
        }

        Ok(Self {
            steps,
            edges,
            index,
            outgoing,
            incoming,
        })
    }

    fn is_entry(step: &Step, incoming: &HashMap<String, Vec<usize>>) -> bool {
        step.inputs
            .iter()
            .filter(|input| step.input_is_required(input))
            .all(|input| !incoming.contains_key(input))
    }

    /// Steps in declaration order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn step_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.step_index(name).map(|i| &self.steps[i])
    }

    /// Outgoing edge indices of a step, in edge declaration order.
    pub fn outgoing(&self, step: usize) -> &[usize] {
        &self.outgoing[step]
    }

    /// Incoming edge indices of a step, grouped by input name.
    pub fn incoming(&self, step: usize) -> &HashMap<String, Vec<usize>> {
        &self.incoming[step]
    }

    /// Steps ready before any edge has delivered: no required edge-bound input.
    pub fn entry_steps(&self) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(i, step)| Self::is_entry(step, &self.incoming[*i]))
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Predicate, Route};

    fn answer_step() -> Step {
        Step::new("answer", "llm")
            .with_inputs(["question"])
            .with_external(["question"])
            .with_outputs(["reply"])
    }

    #[test]
    fn test_linear_graph() {
        let steps = vec![
            answer_step(),
            Step::new("summarize", "llm")
                .with_inputs(["text"])
                .with_outputs(["summary"]),
        ];
        let edges = vec![Edge::bind(("answer", "reply"), ("summarize", "text"))];

        let graph = Graph::new(steps, edges).unwrap();
        assert_eq!(graph.entry_steps(), vec![0]);
        assert_eq!(graph.outgoing(0), &[0]);
        assert!(graph.incoming(1).contains_key("text"));
    }

    #[test]
    fn test_duplicate_step_name() {
        let err = Graph::new(vec![answer_step(), answer_step()], vec![]).unwrap_err();
        assert!(matches!(err, WeirError::Graph(_)));
    }

    #[test]
    fn test_unknown_step_in_edge() {
        let err = Graph::new(
            vec![answer_step()],
            vec![Edge::bind(("answer", "reply"), ("ghost", "text"))],
        )
        .unwrap_err();
        assert!(matches!(err, WeirError::UnknownStep(s) if s == "ghost"));
    }

    #[test]
    fn test_undeclared_port_in_edge() {
        let steps = vec![
            answer_step(),
            Step::new("summarize", "llm")
                .with_inputs(["text"])
                .with_outputs(["summary"]),
        ];
        let err = Graph::new(
            steps,
            vec![Edge::bind(("answer", "nope"), ("summarize", "text"))],
        )
        .unwrap_err();
        assert!(matches!(err, WeirError::Graph(_)));
    }

    #[test]
    fn test_unbound_input_detected_statically() {
        let steps = vec![
            answer_step(),
            Step::new("summarize", "llm")
                .with_inputs(["text"])
                .with_outputs(["summary"]),
        ];
        let err = Graph::new(steps, vec![]).unwrap_err();
        match err {
            WeirError::UnboundInput { step, input } => {
                assert_eq!(step, "summarize");
                assert_eq!(input, "text");
            }
            other => panic!("expected UnboundInput, got {other}"),
        }
    }

    #[test]
    fn test_unknown_branch_label() {
        let steps = vec![
            answer_step(),
            Step::new("websearch", "search")
                .with_inputs(["prompt"])
                .with_outputs(["snippets"]),
        ];
        let edges = vec![
            Edge::bind(("answer", "reply"), ("websearch", "prompt")).on_branch("go_to_websearch"),
        ];
        // "answer" declares no routes, so the branch label cannot match.
        let err = Graph::new(steps, edges).unwrap_err();
        assert!(matches!(err, WeirError::Graph(_)));
    }

    #[test]
    fn test_ambiguous_binding() {
        let steps = vec![
            answer_step(),
            Step::new("other", "llm")
                .with_inputs(["question"])
                .with_external(["question"])
                .with_outputs(["reply"]),
            Step::new("summarize", "llm")
                .with_inputs(["text"])
                .with_outputs(["summary"]),
        ];
        let edges = vec![
            Edge::bind(("answer", "reply"), ("summarize", "text")),
            Edge::bind(("other", "reply"), ("summarize", "text")),
        ];
        let err = Graph::new(steps, edges).unwrap_err();
        assert!(matches!(err, WeirError::Graph(_)));
    }

    #[test]
    fn test_no_entry_step() {
        let steps = vec![
            Step::new("a", "x").with_inputs(["in"]).with_outputs(["out"]),
            Step::new("b", "x").with_inputs(["in"]).with_outputs(["out"]),
        ];
        let edges = vec![
            Edge::bind(("a", "out"), ("b", "in")),
            Edge::bind(("b", "out"), ("a", "in")),
        ];
        let err = Graph::new(steps, edges).unwrap_err();
        assert!(matches!(err, WeirError::Graph(_)));
    }

    #[test]
    fn test_loop_graph_is_valid() {
        let steps = vec![
            Step::new("generate", "llm")
                .with_inputs(["question", "diagnostic"])
                .with_external(["question"])
                .with_optional(["diagnostic"])
                .with_outputs(["reply"]),
            Step::new("validate", "validator")
                .with_inputs(["artifact"])
                .with_outputs(["status", "artifact", "diagnostic"])
                .with_routes(vec![
                    Route::new(
                        Predicate::Equals {
                            key: "status".into(),
                            value: "valid".into(),
                        },
                        "valid",
                    ),
                    Route::otherwise("invalid"),
                ]),
        ];
        let edges = vec![
            Edge::bind(("generate", "reply"), ("validate", "artifact")),
            Edge::bind(("validate", "diagnostic"), ("generate", "diagnostic"))
                .on_branch("invalid"),
        ];

        let graph = Graph::new(steps, edges).unwrap();
        // The generation step is the only entry; the validator waits on it.
        assert_eq!(graph.entry_steps(), vec![0]);
    }
}
