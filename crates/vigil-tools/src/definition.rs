//! Core tool abstraction: the [`Tool`] trait, [`ToolResult`], and the
//! typed [`ToolError`] tools raise internally.
//!
//! Tools are `Send + Sync` so the registry can hand out `Arc<dyn Tool>`
//! across tasks. The executor converts every `ToolError` into an in-band
//! [`ToolResult`]; only the executor sees the error type.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool an agent can invoke.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique name (alphanumeric + underscores, max 64 chars).
    fn name(&self) -> &str;

    /// Short description advertised to the model.
    fn description(&self) -> &str;

    /// JSON Schema for valid arguments.
    fn input_schema(&self) -> Value;

    /// Run the tool. Returns the structured payload on success.
    async fn execute(&self, input: Value) -> Result<Value, ToolError>;
}

/// Classes of tool failure. Serialized as the `error_kind` field of a
/// failed [`ToolResult`] and mirrored into span attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// The human (or the timeout acting for them) denied the call.
    Denied,
    /// Path or shell policy refused the call before execution.
    PolicyViolation,
    /// The call exceeded its time budget.
    Timeout,
    /// No tool registered under that name.
    NotFound,
    /// Arguments failed validation (missing field, ambiguous patch, ...).
    InvalidInput,
    /// The tool ran and failed.
    ExecutionFailed,
}

impl ToolErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolErrorKind::Denied => "denied",
            ToolErrorKind::PolicyViolation => "policy_violation",
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::NotFound => "not_found",
            ToolErrorKind::InvalidInput => "invalid_input",
            ToolErrorKind::ExecutionFailed => "execution_failed",
        }
    }
}

/// Error raised inside a tool handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidInput, message)
    }

    pub fn policy(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::PolicyViolation, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ExecutionFailed, message)
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for ToolError {}

/// The in-band result of one tool call, fed back to the model verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ToolResult {
    pub fn success(payload: Value) -> Self {
        Self {
            ok: true,
            payload,
            error_kind: None,
            message: None,
        }
    }

    pub fn failure(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            payload: Value::Null,
            error_kind: Some(kind),
            message: Some(message.into()),
        }
    }

    /// The synthetic result used when an approval is denied or times out.
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::failure(ToolErrorKind::Denied, reason)
    }

    /// Serialized form handed back to the model as tool-result content.
    pub fn to_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"ok\":false}".to_string())
    }

    /// Short outcome label for span attributes.
    pub fn outcome(&self) -> &'static str {
        match self.error_kind {
            None => "ok",
            Some(kind) => kind.as_str(),
        }
    }
}

impl From<ToolError> for ToolResult {
    fn from(err: ToolError) -> Self {
        Self::failure(err.kind, err.message)
    }
}

/// Maximum allowed length of a tool name.
const MAX_TOOL_NAME_LEN: usize = 64;

/// Validate a tool name: non-empty, bounded, alphanumeric + underscores.
pub fn validate_tool_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("tool name must not be empty".into());
    }
    if name.len() > MAX_TOOL_NAME_LEN {
        return Err(format!(
            "tool name exceeds maximum length of {MAX_TOOL_NAME_LEN} characters: {name}"
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!(
            "tool name must contain only alphanumeric characters and underscores: {name}"
        ));
    }
    Ok(())
}

/// Validate that an input schema is a JSON object with a `"type"` field.
pub fn validate_input_schema(schema: &Value) -> Result<(), String> {
    let obj = schema
        .as_object()
        .ok_or_else(|| "input schema must be a JSON object".to_string())?;
    if !obj.contains_key("type") {
        return Err("input schema must contain a \"type\" field".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_result_serialization_shapes() {
        let ok = ToolResult::success(json!({"exit_code": 0}));
        let v = serde_json::to_value(&ok).unwrap();
        assert_eq!(v["ok"], true);
        assert_eq!(v["payload"]["exit_code"], 0);
        assert!(v.get("error_kind").is_none());

        let err = ToolResult::failure(ToolErrorKind::PolicyViolation, "blocked path");
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["error_kind"], "policy_violation");
        assert_eq!(v["message"], "blocked path");
        assert!(v.get("payload").is_none());
    }

    #[test]
    fn denied_result_has_denied_kind() {
        let result = ToolResult::denied("approval timed out");
        assert!(!result.ok);
        assert_eq!(result.error_kind, Some(ToolErrorKind::Denied));
        assert_eq!(result.outcome(), "denied");
    }

    #[test]
    fn tool_error_converts_to_result() {
        let result: ToolResult = ToolError::invalid_input("search matched 3 times").into();
        assert_eq!(result.error_kind, Some(ToolErrorKind::InvalidInput));
        assert_eq!(result.message.as_deref(), Some("search matched 3 times"));
    }

    #[test]
    fn tool_name_validation() {
        assert!(validate_tool_name("read_file").is_ok());
        assert!(validate_tool_name(&"a".repeat(64)).is_ok());
        assert!(validate_tool_name("").is_err());
        assert!(validate_tool_name(&"a".repeat(65)).is_err());
        assert!(validate_tool_name("bad-name").is_err());
        assert!(validate_tool_name("bad name").is_err());
        assert!(validate_tool_name("../etc").is_err());
        assert!(validate_tool_name("tool;rm").is_err());
    }

    #[test]
    fn schema_validation_requires_typed_object() {
        assert!(validate_input_schema(&json!({"type": "object"})).is_ok());
        assert!(validate_input_schema(&json!("string")).is_err());
        assert!(validate_input_schema(&json!({"properties": {}})).is_err());
    }
}
