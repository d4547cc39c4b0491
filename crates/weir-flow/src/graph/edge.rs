use weir_core::error::{Result, WeirError};

/// Reference to a named port (input or output) of a step.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortRef {
    pub step: String,
    pub port: String,
}

impl PortRef {
    pub fn new(step: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            port: port.into(),
        }
    }

    /// Parse a `step.port` reference.
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((step, port)) if !step.is_empty() && !port.is_empty() => {
                Ok(Self::new(step, port))
            }
            _ => Err(WeirError::Graph(format!(
                "malformed port reference '{s}', expected 'step.port'"
            ))),
        }
    }
}

impl std::fmt::Display for PortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.step, self.port)
    }
}

impl<S: Into<String>, P: Into<String>> From<(S, P)> for PortRef {
    fn from((step, port): (S, P)) -> Self {
        Self::new(step, port)
    }
}

/// A directed edge from a producer output to a consumer input.
///
/// An edge with a `branch` label only delivers when its producer's route
/// decision selects that branch. `max_traversals` overrides the configured
/// loop ceiling when this edge re-enters an already-executed step.
#[derive(Debug, Clone)]
pub struct Edge {
    pub from: PortRef,
    pub to: PortRef,
    pub branch: Option<String>,
    pub max_traversals: Option<u32>,
}

impl Edge {
    /// Unconditional data edge.
    pub fn bind(from: impl Into<PortRef>, to: impl Into<PortRef>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            branch: None,
            max_traversals: None,
        }
    }

    /// Restrict delivery to one branch of the producer's route decision.
    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Per-edge loop ceiling, overriding the configured default.
    pub fn with_loop_limit(mut self, limit: u32) -> Self {
        self.max_traversals = Some(limit);
        self
    }

    /// Stable label for logs and diagnostics.
    pub fn label(&self) -> String {
        match &self.branch {
            Some(b) => format!("{} -> {} [{}]", self.from, self.to, b),
            None => format!("{} -> {}", self.from, self.to),
        }
    }
}
