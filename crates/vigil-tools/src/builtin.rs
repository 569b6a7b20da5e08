//! The five built-in tools: `shell`, `read_file`, `write_file`,
//! `search_files`, and `patch_file`.
//!
//! Tool schemas are part of the provider contract: changing a field name
//! invalidates cached provider interactions, so the shapes here are
//! stable. Non-zero exit codes are successful results (the model reads
//! them); only policy refusals, timeouts, and runtime failures produce
//! error results.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::process::Command;

use vigil_types::config::ToolsConfig;

use crate::definition::{Tool, ToolError, ToolErrorKind};
use crate::policy::{PathPolicy, ShellGuard};
use crate::registry::ToolRegistry;

/// Output clipping: stdout and stderr handed back to the model.
const MAX_STDOUT_BYTES: usize = 50_000;
const MAX_STDERR_BYTES: usize = 10_000;

/// Hard ceiling on a caller-supplied shell timeout.
const MAX_SHELL_TIMEOUT_SECS: u64 = 300;

/// Build and register every built-in tool.
pub fn register_builtin_tools(
    registry: &ToolRegistry,
    config: &ToolsConfig,
) -> Result<(), String> {
    let policy = Arc::new(PathPolicy::from_config(config));
    registry.register(Arc::new(ShellTool {
        guard: ShellGuard::from_config(config),
        default_timeout: Duration::from_secs(config.shell_timeout_secs),
    }))?;
    registry.register(Arc::new(ReadFileTool {
        policy: policy.clone(),
        max_bytes: config.max_read_bytes,
    }))?;
    registry.register(Arc::new(WriteFileTool {
        policy: policy.clone(),
    }))?;
    registry.register(Arc::new(SearchFilesTool {
        policy: policy.clone(),
        max_results: config.max_search_results,
    }))?;
    registry.register(Arc::new(PatchFileTool { policy }))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn require_str<'a>(input: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    input
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::invalid_input(format!("missing required argument: {key}")))
}

fn optional_u64(input: &Value, key: &str) -> Option<u64> {
    input.get(key).and_then(Value::as_u64)
}

fn clip(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[truncated]", &text[..cut])
}

// ---------------------------------------------------------------------------
// shell
// ---------------------------------------------------------------------------

pub struct ShellTool {
    pub guard: ShellGuard,
    pub default_timeout: Duration,
}

#[async_trait::async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return exit code, stdout, and stderr"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "The command to run"},
                "timeout": {"type": "integer", "description": "Timeout in seconds"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let command = require_str(&input, "command")?;
        self.guard.check(command)?;

        let timeout = optional_u64(&input, "timeout")
            .map(|secs| Duration::from_secs(secs.min(MAX_SHELL_TIMEOUT_SECS)))
            .unwrap_or(self.default_timeout);

        let started = Instant::now();
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(timeout, child)
            .await
            .map_err(|_| {
                ToolError::new(
                    ToolErrorKind::Timeout,
                    format!("command timed out after {}s", timeout.as_secs()),
                )
            })?
            .map_err(|e| ToolError::failed(format!("failed to spawn command: {e}")))?;

        Ok(json!({
            "exit_code": output.status.code().unwrap_or(-1),
            "stdout": clip(&String::from_utf8_lossy(&output.stdout), MAX_STDOUT_BYTES),
            "stderr": clip(&String::from_utf8_lossy(&output.stderr), MAX_STDERR_BYTES),
            "duration_ms": started.elapsed().as_millis() as u64,
        }))
    }
}

// ---------------------------------------------------------------------------
// read_file
// ---------------------------------------------------------------------------

pub struct ReadFileTool {
    pub policy: Arc<PathPolicy>,
    pub max_bytes: u64,
}

#[async_trait::async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file's content, truncated at max_bytes"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Absolute path of the file"},
                "max_bytes": {"type": "integer", "description": "Read at most this many bytes"}
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let raw = require_str(&input, "path")?;
        let path = self.policy.check_access(Path::new(raw))?;
        let limit = optional_u64(&input, "max_bytes")
            .unwrap_or(self.max_bytes)
            .min(self.max_bytes) as usize;

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ToolError::failed(format!("cannot read {}: {e}", path.display())))?;
        let truncated = bytes.len() > limit;
        let content = String::from_utf8_lossy(&bytes[..bytes.len().min(limit)]).into_owned();

        Ok(json!({
            "path": path.to_string_lossy(),
            "content": content,
            "size": bytes.len() as u64,
            "truncated": truncated,
        }))
    }
}

// ---------------------------------------------------------------------------
// write_file
// ---------------------------------------------------------------------------

pub struct WriteFileTool {
    pub policy: Arc<PathPolicy>,
}

#[async_trait::async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file inside the workspace, creating parent directories"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Destination path"},
                "content": {"type": "string", "description": "File content"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let raw = require_str(&input, "path")?;
        let content = input
            .get("content")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::invalid_input("missing required argument: content"))?;
        let path = self.policy.check_write(Path::new(raw))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::failed(format!("cannot create {}: {e}", parent.display())))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| ToolError::failed(format!("cannot write {}: {e}", path.display())))?;

        Ok(json!({
            "path": path.to_string_lossy(),
            "bytes_written": content.len() as u64,
        }))
    }
}

// ---------------------------------------------------------------------------
// search_files
// ---------------------------------------------------------------------------

pub struct SearchFilesTool {
    pub policy: Arc<PathPolicy>,
    pub max_results: usize,
}

#[async_trait::async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Find files under a root directory matching a glob pattern"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "root": {"type": "string", "description": "Directory to search"},
                "glob": {"type": "string", "description": "Glob pattern, e.g. *.rs or src/**/*.rs"}
            },
            "required": ["root", "glob"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let raw_root = require_str(&input, "root")?;
        let pattern_text = require_str(&input, "glob")?;
        let root = self.policy.check_access(Path::new(raw_root))?;
        let pattern = glob::Pattern::new(pattern_text)
            .map_err(|e| ToolError::invalid_input(format!("invalid glob pattern: {e}")))?;

        // walkdir is synchronous; hop to a blocking thread so the runtime
        // stays responsive on large trees.
        let max_results = self.max_results;
        let (matches, truncated) = tokio::task::spawn_blocking(move || {
            let mut matches: Vec<String> = Vec::new();
            let mut truncated = false;
            for entry in walkdir::WalkDir::new(&root)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
                let name_hit = entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| pattern.matches(name));
                if name_hit || pattern.matches_path(relative) {
                    if matches.len() >= max_results {
                        truncated = true;
                        break;
                    }
                    matches.push(entry.path().to_string_lossy().into_owned());
                }
            }
            matches.sort();
            (matches, truncated)
        })
        .await
        .map_err(|e| ToolError::failed(format!("search task failed: {e}")))?;

        Ok(json!({
            "count": matches.len(),
            "matches": matches,
            "truncated": truncated,
        }))
    }
}

// ---------------------------------------------------------------------------
// patch_file
// ---------------------------------------------------------------------------

pub struct PatchFileTool {
    pub policy: Arc<PathPolicy>,
}

#[async_trait::async_trait]
impl Tool for PatchFileTool {
    fn name(&self) -> &str {
        "patch_file"
    }

    fn description(&self) -> &str {
        "Apply search/replace edits to a file; each search must match exactly once"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File to edit"},
                "edits": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "search": {"type": "string"},
                            "replace": {"type": "string"}
                        },
                        "required": ["search", "replace"]
                    }
                }
            },
            "required": ["path", "edits"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value, ToolError> {
        let raw = require_str(&input, "path")?;
        let edits = input
            .get("edits")
            .and_then(Value::as_array)
            .filter(|edits| !edits.is_empty())
            .ok_or_else(|| ToolError::invalid_input("edits must be a non-empty array"))?;
        let path = self.policy.check_write(Path::new(raw))?;

        let mut content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::failed(format!("cannot read {}: {e}", path.display())))?;

        for (index, edit) in edits.iter().enumerate() {
            let search = edit
                .get("search")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    ToolError::invalid_input(format!("edit {index}: missing search text"))
                })?;
            let replace = edit.get("replace").and_then(Value::as_str).ok_or_else(|| {
                ToolError::invalid_input(format!("edit {index}: missing replace text"))
            })?;

            // Ambiguity is an error, not a best-match.
            let occurrences = content.matches(search).count();
            if occurrences != 1 {
                return Err(ToolError::invalid_input(format!(
                    "edit {index}: search text matched {occurrences} times, expected exactly 1"
                )));
            }
            content = content.replacen(search, replace, 1);
        }

        // Atomic write: temp file in the same directory, then rename.
        let tmp = path.with_extension("vigil-patch.tmp");
        tokio::fs::write(&tmp, &content)
            .await
            .map_err(|e| ToolError::failed(format!("cannot write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| ToolError::failed(format!("cannot replace {}: {e}", path.display())))?;

        Ok(json!({
            "path": path.to_string_lossy(),
            "edits_applied": edits.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, Arc<PathPolicy>) {
        let dir = TempDir::new().unwrap();
        let policy = Arc::new(PathPolicy::rooted(&[dir.path()]));
        (dir, policy)
    }

    #[tokio::test]
    async fn shell_reports_exit_code_and_output() {
        let tool = ShellTool {
            guard: ShellGuard::from_config(&ToolsConfig::default()),
            default_timeout: Duration::from_secs(5),
        };
        let out = tool
            .execute(json!({"command": "echo hello; echo oops >&2; exit 3"}))
            .await
            .unwrap();
        assert_eq!(out["exit_code"], 3);
        assert!(out["stdout"].as_str().unwrap().contains("hello"));
        assert!(out["stderr"].as_str().unwrap().contains("oops"));
    }

    #[tokio::test]
    async fn shell_blocks_dangerous_commands() {
        let tool = ShellTool {
            guard: ShellGuard::from_config(&ToolsConfig::default()),
            default_timeout: Duration::from_secs(5),
        };
        let err = tool.execute(json!({"command": "rm -rf /"})).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::PolicyViolation);
    }

    #[tokio::test]
    async fn shell_times_out() {
        let tool = ShellTool {
            guard: ShellGuard::from_config(&ToolsConfig::default()),
            default_timeout: Duration::from_millis(100),
        };
        let err = tool.execute(json!({"command": "sleep 5"})).await.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Timeout);
    }

    #[tokio::test]
    async fn read_file_truncates_and_flags() {
        let (dir, policy) = workspace();
        let path = dir.path().join("big.txt");
        std::fs::write(&path, "abcdefghij").unwrap();

        let tool = ReadFileTool {
            policy,
            max_bytes: 4,
        };
        let out = tool
            .execute(json!({"path": path.to_str().unwrap()}))
            .await
            .unwrap();
        assert_eq!(out["content"], "abcd");
        assert_eq!(out["size"], 10);
        assert_eq!(out["truncated"], true);
    }

    #[tokio::test]
    async fn write_file_creates_parents_inside_root_only() {
        let (dir, policy) = workspace();
        let tool = WriteFileTool { policy };

        let nested = dir.path().join("a/b/c.txt");
        let out = tool
            .execute(json!({"path": nested.to_str().unwrap(), "content": "data"}))
            .await
            .unwrap();
        assert_eq!(out["bytes_written"], 4);
        assert_eq!(std::fs::read_to_string(&nested).unwrap(), "data");

        let err = tool
            .execute(json!({"path": "/tmp/outside.txt", "content": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::PolicyViolation);
    }

    #[tokio::test]
    async fn search_files_matches_globs_bounded() {
        let (dir, policy) = workspace();
        for i in 0..5 {
            std::fs::write(dir.path().join(format!("f{i}.rs")), "").unwrap();
        }
        std::fs::write(dir.path().join("notes.md"), "").unwrap();

        let tool = SearchFilesTool {
            policy,
            max_results: 3,
        };
        let out = tool
            .execute(json!({"root": dir.path().to_str().unwrap(), "glob": "*.rs"}))
            .await
            .unwrap();
        assert_eq!(out["count"], 3);
        assert_eq!(out["truncated"], true);

        let err = tool
            .execute(json!({"root": dir.path().to_str().unwrap(), "glob": "[bad"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn patch_file_requires_unique_match() {
        let (dir, policy) = workspace();
        let path = dir.path().join("code.py");
        std::fs::write(&path, "x = 1\ny = 1\n").unwrap();
        let tool = PatchFileTool { policy };

        // Ambiguous: "1" appears twice.
        let err = tool
            .execute(json!({
                "path": path.to_str().unwrap(),
                "edits": [{"search": "1", "replace": "2"}]
            }))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidInput);
        assert!(err.message.contains("matched 2 times"));

        // Unique matches apply sequentially.
        let out = tool
            .execute(json!({
                "path": path.to_str().unwrap(),
                "edits": [
                    {"search": "x = 1", "replace": "x = 10"},
                    {"search": "y = 1", "replace": "y = 20"}
                ]
            }))
            .await
            .unwrap();
        assert_eq!(out["edits_applied"], 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x = 10\ny = 20\n");

        // Zero matches is also an error.
        let err = tool
            .execute(json!({
                "path": path.to_str().unwrap(),
                "edits": [{"search": "missing", "replace": "nope"}]
            }))
            .await
            .unwrap_err();
        assert!(err.message.contains("matched 0 times"));
    }

    #[test]
    fn builtin_registration_installs_all_five() {
        let registry = ToolRegistry::new();
        register_builtin_tools(&registry, &ToolsConfig::default()).unwrap();
        let names: Vec<String> = registry.list_specs().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec!["patch_file", "read_file", "search_files", "shell", "write_file"]
        );
    }
}
