//! Tool executor: the sandbox pipeline around every tool call.
//!
//! 1. **Size check** -- reject oversized argument payloads.
//! 2. **Path pre-check** -- canonicalize path-like arguments and refuse
//!    blocklisted targets before the tool sees them.
//! 3. **Timeout enforcement** -- a hard wall-clock budget per call.
//! 4. **Span recording** -- every call is a `tool_exec` span carrying the
//!    tool name, an argument digest, duration, and outcome.
//!
//! All failures surface as in-band [`ToolResult`]s; nothing is thrown
//! past this boundary.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};

use vigil_trace::{SpanKind, SpanStatus, TraceRecorder};
use vigil_types::config::ToolsConfig;
use vigil_types::TraceId;

use crate::builtin::register_builtin_tools;
use crate::definition::{ToolErrorKind, ToolResult};
use crate::policy::PathPolicy;
use crate::registry::ToolRegistry;

/// Argument keys treated as filesystem paths during the pre-check.
const PATH_ARG_KEYS: &[&str] = &["path", "file_path", "search_path", "root"];

/// Executor limits.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Hard wall-clock budget for one tool call, in milliseconds. Tools
    /// with their own tighter timeouts (shell) still respect this outer
    /// bound.
    pub default_timeout_ms: u64,
    /// Maximum serialized argument size in bytes.
    pub max_input_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 120_000,
            max_input_bytes: 1024 * 1024,
        }
    }
}

/// Runs tools through the sandbox pipeline.
pub struct ToolExecutor {
    registry: ToolRegistry,
    policy: Arc<PathPolicy>,
    config: ExecutorConfig,
    recorder: Arc<TraceRecorder>,
}

impl ToolExecutor {
    pub fn new(
        registry: ToolRegistry,
        policy: Arc<PathPolicy>,
        config: ExecutorConfig,
        recorder: Arc<TraceRecorder>,
    ) -> Self {
        Self {
            registry,
            policy,
            config,
            recorder,
        }
    }

    /// Executor with the built-in tools registered from config.
    pub fn with_builtins(
        tools_config: &ToolsConfig,
        recorder: Arc<TraceRecorder>,
    ) -> Result<Self, String> {
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry, tools_config)?;
        Ok(Self::new(
            registry,
            Arc::new(PathPolicy::from_config(tools_config)),
            ExecutorConfig::default(),
            recorder,
        ))
    }

    /// The registry backing this executor (for the tool catalogue and for
    /// runtime MCP registration).
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute one tool call, recording a `tool_exec` span on `trace_id`.
    pub async fn execute(&self, trace_id: &TraceId, tool_name: &str, args: Value) -> ToolResult {
        let span = self
            .recorder
            .start_span(trace_id, SpanKind::ToolExec, tool_name, None);
        let started = Instant::now();

        let serialized = args.to_string();
        let digest = hex::encode(Sha256::digest(serialized.as_bytes()));

        let result = self.execute_inner(tool_name, &serialized, args).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let status = if result.ok {
            SpanStatus::Ok
        } else {
            SpanStatus::Error
        };
        let mut attributes = vec![
            ("tool".to_string(), tool_name.to_string()),
            ("arg_digest".to_string(), digest),
            ("duration_ms".to_string(), duration_ms.to_string()),
            ("outcome".to_string(), result.outcome().to_string()),
        ];
        if let Some(kind) = result.error_kind {
            attributes.push(("error.kind".to_string(), kind.as_str().to_string()));
        }
        self.recorder.end_span(&span, status, attributes);

        tracing::debug!(
            tool = tool_name,
            outcome = result.outcome(),
            duration_ms,
            "tool executed"
        );
        result
    }

    async fn execute_inner(
        &self,
        tool_name: &str,
        serialized: &str,
        args: Value,
    ) -> ToolResult {
        if serialized.len() > self.config.max_input_bytes {
            return ToolResult::failure(
                ToolErrorKind::InvalidInput,
                format!(
                    "arguments too large: {} bytes exceeds limit of {} bytes",
                    serialized.len(),
                    self.config.max_input_bytes
                ),
            );
        }

        let Some(tool) = self.registry.get(tool_name) else {
            return ToolResult::failure(
                ToolErrorKind::NotFound,
                format!("unknown tool: {tool_name}"),
            );
        };

        // Pre-check every path-like argument against the sandbox before
        // the tool runs; the tools re-check with their own access mode.
        if let Some(map) = args.as_object() {
            for key in PATH_ARG_KEYS {
                if let Some(raw) = map.get(*key).and_then(Value::as_str) {
                    if let Err(err) = self.policy.check_access(Path::new(raw)) {
                        tracing::warn!(tool = tool_name, path = raw, "path refused by policy");
                        return err.into();
                    }
                }
            }
        }

        let budget = Duration::from_millis(self.config.default_timeout_ms);
        match tokio::time::timeout(budget, tool.execute(args)).await {
            Ok(Ok(payload)) => ToolResult::success(payload),
            Ok(Err(err)) => err.into(),
            Err(_) => ToolResult::failure(
                ToolErrorKind::Timeout,
                format!("tool {tool_name} exceeded {}ms budget", budget.as_millis()),
            ),
        }
    }
}
