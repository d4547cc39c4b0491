use std::path::Path;

use serde::{Deserialize, Serialize};

use weir_core::error::{Result, WeirError};

use crate::condition::{Predicate, Route};
use crate::graph::{Edge, Graph, PortRef, Step};

/// Declarative description of a flow graph, deserializable from TOML.
///
/// Edge endpoints are written as `step.port` references and route predicates
/// as expressions:
///
/// ```toml
/// max_loops = 3
///
/// [[step]]
/// name = "generate"
/// executor = "llm"
/// inputs = ["question", "diagnostic"]
/// external = ["question"]
/// optional = ["diagnostic"]
/// outputs = ["reply"]
///
/// [[step]]
/// name = "validate"
/// executor = "validator"
/// inputs = ["artifact"]
/// outputs = ["status", "artifact", "diagnostic"]
///
/// [[step.route]]
/// when = 'status == "valid"'
/// branch = "valid"
///
/// [[step.route]]
/// when = "always"
/// branch = "invalid"
///
/// [[edge]]
/// from = "generate.reply"
/// to = "validate.artifact"
///
/// [[edge]]
/// from = "validate.diagnostic"
/// to = "generate.diagnostic"
/// branch = "invalid"
/// max_traversals = 3
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDefinition {
    /// Default loop ceiling for this flow; merged into the controller
    /// config by the caller.
    #[serde(default)]
    pub max_loops: Option<u32>,
    #[serde(default, rename = "step")]
    pub steps: Vec<StepDef>,
    #[serde(default, rename = "edge")]
    pub edges: Vec<EdgeDef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepDef {
    pub name: String,
    pub executor: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub external: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default, rename = "route")]
    pub routes: Vec<RouteDef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteDef {
    pub when: String,
    pub branch: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeDef {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub max_traversals: Option<u32>,
}

impl GraphDefinition {
    /// Parse a definition from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| WeirError::Config(format!("graph definition: {e}")))
    }

    /// Load a definition from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(WeirError::ConfigNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Resolve the definition into a validated graph.
    pub fn build(&self) -> Result<Graph> {
        let mut steps = Vec::with_capacity(self.steps.len());
        for def in &self.steps {
            let mut routes = Vec::with_capacity(def.routes.len());
            for route in &def.routes {
                routes.push(Route::new(
                    parse_predicate(&route.when)?,
                    route.branch.clone(),
                ));
            }
            steps.push(
                Step::new(&def.name, &def.executor)
                    .with_inputs(def.inputs.clone())
                    .with_external(def.external.clone())
                    .with_optional(def.optional.clone())
                    .with_outputs(def.outputs.clone())
                    .with_routes(routes),
            );
        }

        let mut edges = Vec::with_capacity(self.edges.len());
        for def in &self.edges {
            let mut edge = Edge::bind(PortRef::parse(&def.from)?, PortRef::parse(&def.to)?);
            if let Some(branch) = &def.branch {
                edge = edge.on_branch(branch);
            }
            if let Some(limit) = def.max_traversals {
                edge = edge.with_loop_limit(limit);
            }
            edges.push(edge);
        }

        Graph::new(steps, edges)
    }
}

/// Parse a route expression into a predicate.
///
/// Supported forms:
/// - `always` (or `true`) for a catch-all
/// - `key contains "substr"`
/// - `key == "value"`
/// - `key != "value"`
///
/// Unparseable expressions are configuration errors, not silently-false
/// predicates: a broken route must be visible.
pub fn parse_predicate(expr: &str) -> Result<Predicate> {
    let expr = expr.trim();

    if expr.eq_ignore_ascii_case("always") || expr.eq_ignore_ascii_case("true") {
        return Ok(Predicate::Always);
    }
    if let Some((key, value)) = parse_operator(expr, " contains ") {
        return Ok(Predicate::Contains { key, value });
    }
    if let Some((key, value)) = parse_operator(expr, "!=") {
        return Ok(Predicate::NotEquals { key, value });
    }
    if let Some((key, value)) = parse_operator(expr, "==") {
        return Ok(Predicate::Equals { key, value });
    }

    Err(WeirError::Config(format!(
        "unparseable route expression '{expr}'"
    )))
}

/// Parse `key OP "value"` expressions, returning (key, value).
fn parse_operator(expr: &str, op: &str) -> Option<(String, String)> {
    let (key, value) = expr.split_once(op)?;
    let key = key.trim();
    let value = value.trim().trim_matches('"');
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}
