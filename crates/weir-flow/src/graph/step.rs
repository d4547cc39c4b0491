use crate::condition::Route;

/// A step in the flow graph.
///
/// Declared once at graph construction and immutable thereafter. Inputs are
/// bound either by edges from other steps' outputs or supplied externally at
/// run start; `optional` inputs may be absent on a given attempt (they are
/// typically carried in on a guarded back edge).
#[derive(Debug, Clone)]
pub struct Step {
    /// Unique step name.
    pub name: String,
    /// Executor name, resolved through the registry at run time.
    pub executor: String,
    /// Declared input names.
    pub inputs: Vec<String>,
    /// Inputs supplied by the caller at run start (subset of `inputs`).
    pub external: Vec<String>,
    /// Inputs that may be absent for an attempt (subset of `inputs`).
    pub optional: Vec<String>,
    /// Output names this step produces.
    pub outputs: Vec<String>,
    /// Ordered branch alternatives; empty for non-branching steps.
    pub routes: Vec<Route>,
}

impl Step {
    pub fn new(name: impl Into<String>, executor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executor: executor.into(),
            inputs: vec![],
            external: vec![],
            optional: vec![],
            outputs: vec![],
            routes: vec![],
        }
    }

    /// Declare input names.
    pub fn with_inputs(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.inputs = names.into_iter().map(Into::into).collect();
        self
    }

    /// Mark inputs as externally supplied at run start.
    pub fn with_external(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.external = names.into_iter().map(Into::into).collect();
        self
    }

    /// Mark inputs as optional.
    pub fn with_optional(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.optional = names.into_iter().map(Into::into).collect();
        self
    }

    /// Declare output names.
    pub fn with_outputs(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.outputs = names.into_iter().map(Into::into).collect();
        self
    }

    /// Attach ordered branch routes.
    pub fn with_routes(mut self, routes: Vec<Route>) -> Self {
        self.routes = routes;
        self
    }

    /// Whether this input must be bound for the step to become ready.
    pub fn input_is_required(&self, input: &str) -> bool {
        !self.external.iter().any(|n| n == input) && !self.optional.iter().any(|n| n == input)
    }

    pub fn is_branching(&self) -> bool {
        !self.routes.is_empty()
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|i| i == name)
    }
}
