use std::sync::Arc;

use tracing::debug;

use weir_core::error::{Result, WeirError};
use weir_core::types::RunState;

/// A pure boolean predicate over named Run State values.
///
/// Keys are resolved against the step being routed; a `producer.output`
/// qualified key reads another step's output instead.
#[derive(Clone)]
pub enum Predicate {
    /// Always true. Conventionally the terminal catch-all of a route list.
    Always,
    /// The value under `key` is a string containing `value` as a substring.
    Contains { key: String, value: String },
    /// The value under `key` is a string equal to `value`.
    Equals { key: String, value: String },
    /// The value under `key` is a string different from `value`.
    /// Missing keys and non-strings evaluate false.
    NotEquals { key: String, value: String },
    /// Arbitrary boolean function over the Run State.
    Custom(Arc<dyn Fn(&RunState) -> bool + Send + Sync>),
}

impl std::fmt::Debug for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::Contains { key, value } => write!(f, "Contains({key} ~ {value:?})"),
            Self::Equals { key, value } => write!(f, "Equals({key} == {value:?})"),
            Self::NotEquals { key, value } => write!(f, "NotEquals({key} != {value:?})"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl Predicate {
    /// Custom predicate from a closure.
    pub fn custom(f: impl Fn(&RunState) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Evaluate against the Run State, with bare keys resolved as outputs
    /// of `step`.
    pub fn eval(&self, step: &str, state: &RunState) -> bool {
        match self {
            Self::Always => true,
            Self::Contains { key, value } => state
                .resolve(step, key)
                .and_then(|v| v.as_str())
                .is_some_and(|s| s.contains(value)),
            Self::Equals { key, value } => state
                .resolve(step, key)
                .and_then(|v| v.as_str())
                .is_some_and(|s| s == value),
            Self::NotEquals { key, value } => state
                .resolve(step, key)
                .and_then(|v| v.as_str())
                .is_some_and(|s| s != value),
            Self::Custom(f) => f(state),
        }
    }
}

/// One branch alternative of a routing step: a predicate guarding a named
/// continuation.
#[derive(Debug, Clone)]
pub struct Route {
    pub when: Predicate,
    pub branch: String,
}

impl Route {
    pub fn new(when: Predicate, branch: impl Into<String>) -> Self {
        Self {
            when,
            branch: branch.into(),
        }
    }

    /// Terminal catch-all route.
    pub fn otherwise(branch: impl Into<String>) -> Self {
        Self::new(Predicate::Always, branch)
    }
}

/// Select the active branch for a step's output: first route whose predicate
/// holds, scanned in declaration order.
///
/// No match is a configuration defect and fails the run rather than silently
/// dropping the output.
pub fn select_branch<'a>(step: &str, routes: &'a [Route], state: &RunState) -> Result<&'a str> {
    for route in routes {
        if route.when.eval(step, state) {
            debug!(step = %step, branch = %route.branch, "route matched");
            return Ok(&route.branch);
        }
    }
    Err(WeirError::UnroutedOutput {
        step: step.to_string(),
        branches: routes.iter().map(|r| r.branch.clone()).collect(),
    })
}
