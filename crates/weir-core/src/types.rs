use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named bundle of values, as passed into and out of step executors.
pub type Bundle = HashMap<String, serde_json::Value>;

/// Per-run mapping from (step, output name) to the produced value.
///
/// A step's outputs are bound as a whole: all outputs of one execution or
/// none. Re-binding the same step (a loop re-entry) replaces that step's
/// previous outputs; no step ever writes another step's entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    outputs: HashMap<String, Bundle>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a produced value by step and output name.
    pub fn get(&self, step: &str, output: &str) -> Option<&serde_json::Value> {
        self.outputs.get(step).and_then(|b| b.get(output))
    }

    /// Get a produced value as a string, if it is one.
    pub fn get_str(&self, step: &str, output: &str) -> Option<&str> {
        self.get(step, output).and_then(|v| v.as_str())
    }

    /// Whether the step has produced outputs in this run.
    pub fn has_step(&self, step: &str) -> bool {
        self.outputs.contains_key(step)
    }

    /// Whether a specific output of a step has been produced.
    pub fn has(&self, step: &str, output: &str) -> bool {
        self.get(step, output).is_some()
    }

    /// Bind all outputs of one step execution atomically.
    pub fn bind(&mut self, step: impl Into<String>, outputs: Bundle) {
        self.outputs.insert(step.into(), outputs);
    }

    /// Number of steps with bound outputs.
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Resolve a `step.output` key against the state.
    ///
    /// Keys without a dot are resolved against `default_step`.
    pub fn resolve(&self, default_step: &str, key: &str) -> Option<&serde_json::Value> {
        match key.split_once('.') {
            Some((step, output)) => self.get(step, output),
            None => self.get(default_step, key),
        }
    }
}

/// Context handed to a step executor for one invocation.
#[derive(Debug, Clone)]
pub struct StepContext {
    /// The run this invocation belongs to.
    pub run: RunId,
    /// Name of the step being executed.
    pub step: String,
    /// 1-based attempt number (2+ only on loop re-entry).
    pub attempt: u32,
    /// Cancellation signal for the run.
    pub cancel: CancellationToken,
}

impl StepContext {
    pub fn new(run: RunId, step: impl Into<String>) -> Self {
        Self {
            run,
            step: step.into(),
            attempt: 1,
            cancel: CancellationToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_bind_and_get() {
        let mut state = RunState::new();
        let mut outputs = Bundle::new();
        outputs.insert("reply".into(), serde_json::json!("hello"));
        state.bind("generate", outputs);

        assert_eq!(state.get_str("generate", "reply"), Some("hello"));
        assert!(state.has_step("generate"));
        assert!(!state.has("generate", "missing"));
        assert_eq!(state.get("other", "reply"), None);
    }

    #[test]
    fn test_rebind_replaces_previous_outputs() {
        let mut state = RunState::new();
        let mut first = Bundle::new();
        first.insert("reply".into(), serde_json::json!("attempt one"));
        first.insert("tokens".into(), serde_json::json!(12));
        state.bind("generate", first);

        let mut second = Bundle::new();
        second.insert("reply".into(), serde_json::json!("attempt two"));
        state.bind("generate", second);

        assert_eq!(state.get_str("generate", "reply"), Some("attempt two"));
        // The whole bundle is replaced, not merged.
        assert_eq!(state.get("generate", "tokens"), None);
    }

    #[test]
    fn test_resolve_qualified_and_bare_keys() {
        let mut state = RunState::new();
        let mut outputs = Bundle::new();
        outputs.insert("reply".into(), serde_json::json!("ok"));
        state.bind("answer", outputs);

        assert_eq!(
            state.resolve("answer", "reply"),
            Some(&serde_json::json!("ok"))
        );
        assert_eq!(
            state.resolve("elsewhere", "answer.reply"),
            Some(&serde_json::json!("ok"))
        );
        assert_eq!(state.resolve("answer", "nope"), None);
    }

    #[test]
    fn test_run_id_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }
}
