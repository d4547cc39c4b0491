use futures::future::BoxFuture;
use tracing::debug;

use weir_core::error::Result;
use weir_core::traits::StepExecutor;
use weir_core::types::{Bundle, StepContext};

/// Checks a candidate artifact against a target schema.
///
/// Pure: no side effects beyond reporting. An invalid artifact yields one
/// human-readable diagnostic suitable for feeding back into the next
/// generation attempt.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    /// Keys that must be present in the JSON object. Empty skips the JSON
    /// structure check entirely.
    pub required_keys: Vec<String>,
    /// Maximum allowed artifact length (characters).
    pub max_length: usize,
}

/// Result of validating one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// The artifact conforms; it passes through unchanged.
    Valid,
    /// The artifact does not conform.
    Invalid { diagnostic: String },
}

impl SchemaValidator {
    /// Validator with no required keys and a 100K length cap.
    pub fn new() -> Self {
        Self {
            required_keys: vec![],
            max_length: 100_000,
        }
    }

    pub fn with_required_keys(
        mut self,
        keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.required_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_length(mut self, max: usize) -> Self {
        self.max_length = max;
        self
    }

    /// Validate an artifact.
    pub fn validate(&self, artifact: &str) -> ValidationResult {
        let mut issues = Vec::new();

        if artifact.len() > self.max_length {
            issues.push(format!(
                "artifact exceeds max length: {} > {}",
                artifact.len(),
                self.max_length
            ));
        }

        if !self.required_keys.is_empty() {
            match serde_json::from_str::<serde_json::Value>(artifact) {
                Ok(value) => match value.as_object() {
                    Some(obj) => {
                        for key in &self.required_keys {
                            if !obj.contains_key(key) {
                                issues.push(format!("missing field {key}"));
                            }
                        }
                    }
                    None => issues.push("expected a JSON object".to_string()),
                },
                Err(e) => issues.push(format!("artifact is not valid JSON: {e}")),
            }
        }

        if issues.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid {
                diagnostic: issues.join("; "),
            }
        }
    }
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Heuristic cleanup of model-generated artifacts before validation:
/// strips markdown code fences, trims whitespace, and balances JSON
/// braces/brackets left open by truncated output.
pub fn clean_artifact(artifact: &str) -> String {
    let mut result = strip_code_fences(artifact).trim().to_string();
    if result.starts_with('{') || result.starts_with('[') {
        result = balance_braces(&result);
    }
    result
}

fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    // Prefer a tagged json fence; fall back to the first bare fence, whose
    // opening line may carry an arbitrary language tag.
    for fence in ["```json", "```"] {
        let Some(start) = trimmed.find(fence) else {
            continue;
        };
        let mut body = &trimmed[start + fence.len()..];
        if fence == "```" {
            if let Some(nl) = body.find('\n') {
                body = &body[nl + 1..];
            }
        }
        if let Some(end) = body.find("```") {
            return body[..end].trim().to_string();
        }
    }
    trimmed.to_string()
}

fn balance_braces(text: &str) -> String {
    let mut brace_depth: i32 = 0;
    let mut bracket_depth: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for ch in text.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            _ if in_string => {}
            '{' => brace_depth += 1,
            '}' => brace_depth -= 1,
            '[' => bracket_depth += 1,
            ']' => bracket_depth -= 1,
            _ => {}
        }
    }

    let mut result = text.to_string();
    for _ in 0..bracket_depth {
        result.push(']');
    }
    for _ in 0..brace_depth {
        result.push('}');
    }
    result
}

/// Ready-made executor wrapping a `SchemaValidator` for the auto-correction
/// loop.
///
/// Reads the `artifact` argument and produces `status` (`"valid"` or
/// `"invalid"`), `artifact` (cleaned when cleanup is enabled), and
/// `diagnostic` (empty on valid). Route the `status` output to pick the
/// terminal branch or the back edge.
pub struct ValidatorStep {
    validator: SchemaValidator,
    clean: bool,
}

impl ValidatorStep {
    pub fn new(validator: SchemaValidator) -> Self {
        Self {
            validator,
            clean: false,
        }
    }

    /// Apply heuristic artifact cleanup before validating.
    pub fn with_cleanup(mut self) -> Self {
        self.clean = true;
        self
    }
}

impl StepExecutor for ValidatorStep {
    fn execute(&self, args: Bundle, ctx: StepContext) -> BoxFuture<'_, Result<Bundle>> {
        let raw = match args.get("artifact") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let artifact = if self.clean { clean_artifact(&raw) } else { raw };
        let result = self.validator.validate(&artifact);

        let mut out = Bundle::new();
        match result {
            ValidationResult::Valid => {
                debug!(step = %ctx.step, "artifact valid");
                out.insert("status".into(), serde_json::json!("valid"));
                out.insert("diagnostic".into(), serde_json::json!(""));
            }
            ValidationResult::Invalid { diagnostic } => {
                debug!(step = %ctx.step, diagnostic = %diagnostic, "artifact invalid");
                out.insert("status".into(), serde_json::json!("invalid"));
                out.insert("diagnostic".into(), serde_json::json!(diagnostic));
            }
        }
        out.insert("artifact".into(), serde_json::json!(artifact));
        Box::pin(async move { Ok(out) })
    }
}
