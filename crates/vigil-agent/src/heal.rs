//! Self-healing code execution.
//!
//! Runs a piece of code through the `shell` tool and, on failure,
//! classifies the error, builds a healing prompt (code + stderr + an
//! environment snapshot), asks the model for a corrected version, and
//! retries. Bounded by `max_attempts`; the original error is returned if
//! the loop exhausts.

use std::io::Write;
use std::sync::Arc;

use regex::Regex;
use serde_json::json;

use vigil_provider::ProviderRouter;
use vigil_tools::ToolExecutor;
use vigil_trace::{SpanKind, SpanStatus, TraceRecorder};
use vigil_types::config::HealConfig;
use vigil_types::{ChatMessage, CompletionRequest, TraceId};

use crate::cancel::CancelSignal;

/// Cap on the environment snapshot embedded in healing prompts.
const ENV_SNAPSHOT_MAX_BYTES: usize = 2048;

/// Per-execution shell timeout, seconds.
const CODE_TIMEOUT_SECS: u64 = 60;

/// Error families the classifier can recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    ModuleMissing,
    Indentation,
    Syntax,
    Type,
    Name,
    Attribute,
    Key,
    Index,
    Value,
    FileMissing,
    ZeroDivision,
    Import,
    Other,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::ModuleMissing => "module-missing",
            ErrorCategory::Indentation => "indentation",
            ErrorCategory::Syntax => "syntax",
            ErrorCategory::Type => "type",
            ErrorCategory::Name => "name",
            ErrorCategory::Attribute => "attribute",
            ErrorCategory::Key => "key",
            ErrorCategory::Index => "index",
            ErrorCategory::Value => "value",
            ErrorCategory::FileMissing => "file-missing",
            ErrorCategory::ZeroDivision => "zero-division",
            ErrorCategory::Import => "import",
            ErrorCategory::Other => "other",
        }
    }
}

/// Classify captured stderr into an error family. Subclass markers are
/// checked before their parents (`ModuleNotFoundError` before
/// `ImportError`, `IndentationError` before `SyntaxError`).
pub fn classify_error(stderr: &str) -> ErrorCategory {
    const TABLE: &[(&str, ErrorCategory)] = &[
        ("ModuleNotFoundError", ErrorCategory::ModuleMissing),
        ("No module named", ErrorCategory::ModuleMissing),
        ("IndentationError", ErrorCategory::Indentation),
        ("TabError", ErrorCategory::Indentation),
        ("SyntaxError", ErrorCategory::Syntax),
        ("TypeError", ErrorCategory::Type),
        ("NameError", ErrorCategory::Name),
        ("AttributeError", ErrorCategory::Attribute),
        ("KeyError", ErrorCategory::Key),
        ("IndexError", ErrorCategory::Index),
        ("ValueError", ErrorCategory::Value),
        ("FileNotFoundError", ErrorCategory::FileMissing),
        ("No such file or directory", ErrorCategory::FileMissing),
        ("ZeroDivisionError", ErrorCategory::ZeroDivision),
        ("ImportError", ErrorCategory::Import),
    ];
    for (marker, category) in TABLE {
        if stderr.contains(marker) {
            return *category;
        }
    }
    ErrorCategory::Other
}

/// Extract the first fenced code block from a model reply.
pub fn extract_code_block(reply: &str) -> Option<String> {
    let re = Regex::new(r"(?s)```[a-zA-Z0-9_]*\n(.*?)```").ok()?;
    re.captures(reply)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end().to_string())
}

/// Result of a self-healing run.
#[derive(Debug, Clone, PartialEq)]
pub struct HealOutcome {
    pub ok: bool,
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    /// Executions performed (1 = succeeded first try).
    pub attempts: u32,
    /// Whether a regenerated version (not the original code) succeeded.
    pub healed: bool,
    pub final_code: String,
}

/// Wraps code execution in the bounded heal loop.
pub struct SelfHealingExecutor {
    router: Arc<ProviderRouter>,
    tools: Arc<ToolExecutor>,
    recorder: Arc<TraceRecorder>,
    config: HealConfig,
}

impl SelfHealingExecutor {
    pub fn new(
        router: Arc<ProviderRouter>,
        tools: Arc<ToolExecutor>,
        recorder: Arc<TraceRecorder>,
        config: HealConfig,
    ) -> Self {
        Self {
            router,
            tools,
            recorder,
            config,
        }
    }

    /// Run Python code, healing failures up to `max_attempts` executions.
    pub async fn run_code(
        &self,
        trace_id: &TraceId,
        code: &str,
        mut cancel: CancelSignal,
    ) -> HealOutcome {
        let max_attempts = if self.config.enabled {
            self.config.max_attempts.max(1)
        } else {
            1
        };
        let mut current_code = code.to_string();
        let mut snapshot: Option<String> = None;
        let mut first_failure: Option<HealOutcome> = None;

        for attempt in 1..=max_attempts {
            let span = self
                .recorder
                .start_span(trace_id, SpanKind::SelfHeal, "attempt", None);
            let run = self.execute_code(trace_id, &current_code).await;

            if run.exit_code == 0 {
                self.recorder.end_span(
                    &span,
                    SpanStatus::Ok,
                    vec![
                        ("attempt".into(), attempt.to_string()),
                        ("success".into(), "true".into()),
                    ],
                );
                return HealOutcome {
                    ok: true,
                    exit_code: 0,
                    stdout: run.stdout,
                    stderr: run.stderr,
                    attempts: attempt,
                    healed: attempt > 1,
                    final_code: current_code,
                };
            }

            let category = classify_error(&run.stderr);
            self.recorder.end_span(
                &span,
                SpanStatus::Error,
                vec![
                    ("attempt".into(), attempt.to_string()),
                    ("error_category".into(), category.as_str().into()),
                    ("success".into(), "false".into()),
                ],
            );
            tracing::info!(
                attempt,
                category = category.as_str(),
                "code execution failed"
            );

            let outcome = HealOutcome {
                ok: false,
                exit_code: run.exit_code,
                stdout: run.stdout,
                stderr: run.stderr.clone(),
                attempts: attempt,
                healed: false,
                final_code: current_code.clone(),
            };
            if first_failure.is_none() {
                first_failure = Some(outcome.clone());
            }

            // Unrecognized errors get one healing attempt, no more.
            if attempt >= max_attempts || (category == ErrorCategory::Other && attempt > 1) {
                break;
            }

            if snapshot.is_none() {
                snapshot = Some(self.environment_snapshot(trace_id).await);
            }
            let prompt = healing_prompt(
                &current_code,
                &run.stderr,
                category,
                snapshot.as_deref().unwrap_or(""),
            );
            let request = CompletionRequest {
                system: Some(
                    "You fix broken code. Reply with a single fenced code block containing \
                     the corrected program and nothing else."
                        .into(),
                ),
                messages: vec![ChatMessage::user(prompt)],
                temperature: Some(0.1),
                max_tokens: Some(4096),
                tools: Vec::new(),
            };
            let reply = tokio::select! {
                result = self
                    .router
                    .complete(&request, Some((self.recorder.as_ref(), trace_id))) => result,
                _ = cancel.cancelled() => break,
            };
            match reply {
                Ok((response, _)) => match extract_code_block(&response.content) {
                    Some(new_code) => current_code = new_code,
                    None => {
                        tracing::warn!("healing reply contained no code block, giving up");
                        break;
                    }
                },
                Err(err) => {
                    tracing::warn!(error = %err, "healing completion failed, giving up");
                    break;
                }
            }
        }

        // The loop exhausted: the original failure is what the caller sees.
        first_failure.unwrap_or(HealOutcome {
            ok: false,
            exit_code: -1,
            stdout: String::new(),
            stderr: "code execution could not be started".into(),
            attempts: 0,
            healed: false,
            final_code: current_code,
        })
    }

    async fn execute_code(&self, trace_id: &TraceId, code: &str) -> RawRun {
        let mut file = match tempfile::Builder::new().suffix(".py").tempfile() {
            Ok(file) => file,
            Err(e) => {
                return RawRun {
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: format!("failed to create temp file: {e}"),
                }
            }
        };
        if let Err(e) = file.write_all(code.as_bytes()) {
            return RawRun {
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("failed to write temp file: {e}"),
            };
        }
        let path = file.path().to_string_lossy().into_owned();

        let result = self
            .tools
            .execute(
                trace_id,
                "shell",
                json!({"command": format!("python3 {path}"), "timeout": CODE_TIMEOUT_SECS}),
            )
            .await;

        if !result.ok {
            return RawRun {
                exit_code: -1,
                stdout: String::new(),
                stderr: result.message.unwrap_or_else(|| "tool failure".into()),
            };
        }
        RawRun {
            exit_code: result.payload["exit_code"].as_i64().unwrap_or(-1),
            stdout: result.payload["stdout"].as_str().unwrap_or("").to_string(),
            stderr: result.payload["stderr"].as_str().unwrap_or("").to_string(),
        }
    }

    /// OS, runtime version, and installed packages, clipped to 2 KiB.
    async fn environment_snapshot(&self, trace_id: &TraceId) -> String {
        let result = self
            .tools
            .execute(
                trace_id,
                "shell",
                json!({
                    "command": "uname -sr; python3 --version 2>&1; \
                                python3 -m pip list 2>/dev/null",
                    "timeout": 15
                }),
            )
            .await;
        let mut snapshot = result.payload["stdout"].as_str().unwrap_or("").to_string();
        if snapshot.len() > ENV_SNAPSHOT_MAX_BYTES {
            let mut cut = ENV_SNAPSHOT_MAX_BYTES;
            while !snapshot.is_char_boundary(cut) {
                cut -= 1;
            }
            snapshot.truncate(cut);
        }
        snapshot
    }
}

struct RawRun {
    exit_code: i64,
    stdout: String,
    stderr: String,
}

fn healing_prompt(
    code: &str,
    stderr: &str,
    category: ErrorCategory,
    snapshot: &str,
) -> String {
    format!(
        "The following program failed with a {} error.\n\n\
         Program:\n```python\n{code}\n```\n\n\
         Error output:\n```\n{stderr}\n```\n\n\
         Environment:\n```\n{snapshot}\n```\n\n\
         Produce a corrected version that works in this environment. If a \
         package is unavailable, rewrite the program to avoid it.",
        category.as_str()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_covers_the_error_table() {
        assert_eq!(
            classify_error("ModuleNotFoundError: No module named 'pandas'"),
            ErrorCategory::ModuleMissing
        );
        assert_eq!(
            classify_error("  File \"x.py\", line 3\nIndentationError: unexpected indent"),
            ErrorCategory::Indentation
        );
        assert_eq!(
            classify_error("SyntaxError: invalid syntax"),
            ErrorCategory::Syntax
        );
        assert_eq!(
            classify_error("TypeError: unsupported operand"),
            ErrorCategory::Type
        );
        assert_eq!(classify_error("NameError: name 'x'"), ErrorCategory::Name);
        assert_eq!(
            classify_error("AttributeError: 'int' object"),
            ErrorCategory::Attribute
        );
        assert_eq!(classify_error("KeyError: 'missing'"), ErrorCategory::Key);
        assert_eq!(
            classify_error("IndexError: list index out of range"),
            ErrorCategory::Index
        );
        assert_eq!(
            classify_error("ValueError: invalid literal"),
            ErrorCategory::Value
        );
        assert_eq!(
            classify_error("FileNotFoundError: [Errno 2]"),
            ErrorCategory::FileMissing
        );
        assert_eq!(
            classify_error("ZeroDivisionError: division by zero"),
            ErrorCategory::ZeroDivision
        );
        assert_eq!(
            classify_error("ImportError: cannot import name"),
            ErrorCategory::Import
        );
        assert_eq!(classify_error("segmentation fault"), ErrorCategory::Other);
    }

    #[test]
    fn code_block_extraction_takes_first_fence() {
        let reply = "Here is the fix:\n```python\nprint('fixed')\n```\nAnd notes:\n```\nother\n```";
        assert_eq!(extract_code_block(reply).unwrap(), "print('fixed')");
        assert!(extract_code_block("no code here").is_none());
    }

    #[test]
    fn healing_prompt_carries_all_context() {
        let prompt = healing_prompt(
            "import pandas",
            "ModuleNotFoundError: No module named 'pandas'",
            ErrorCategory::ModuleMissing,
            "Linux 6.1\nPython 3.11.2\npip 23.0",
        );
        assert!(prompt.contains("module-missing"));
        assert!(prompt.contains("import pandas"));
        assert!(prompt.contains("No module named 'pandas'"));
        assert!(prompt.contains("Python 3.11.2"));
    }
}
