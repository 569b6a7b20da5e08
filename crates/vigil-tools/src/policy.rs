//! Path sandbox and shell command policy.
//!
//! Paths are normalized lexically (targets may not exist yet) and checked
//! against hardcoded sensitive prefixes plus the operator blocklist.
//! Write-capable tools additionally require the target to sit under a
//! configured allowed root. Shell commands run through a blocked-pattern
//! table; `exec_only` mode refuses shell metacharacters entirely.

use std::path::{Path, PathBuf};

use regex::Regex;

use vigil_types::config::ToolsConfig;
use vigil_types::paths::normalize_path;

use crate::definition::ToolError;

/// Prefixes no tool may touch, ever.
const SENSITIVE_PREFIXES: &[&str] = &[
    "/etc/shadow",
    "/etc/passwd",
    "/proc",
    "/sys",
    "/dev",
    "/boot",
    "/root/.ssh",
    "/root/.aws",
];

/// Home-directory credential dirs blocked anywhere in a path.
const CREDENTIAL_COMPONENTS: &[&str] = &[".ssh", ".aws", ".gnupg", ".kube", ".docker"];

/// Decides which filesystem paths tools may read and write.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    allowed_roots: Vec<PathBuf>,
    blocked: Vec<PathBuf>,
}

impl PathPolicy {
    pub fn from_config(config: &ToolsConfig) -> Self {
        Self {
            allowed_roots: config
                .allowed_roots
                .iter()
                .map(|p| normalize_path(p))
                .collect(),
            blocked: config.blocked_paths.iter().map(|p| normalize_path(p)).collect(),
        }
    }

    /// Policy allowing reads and writes under the given roots. For tests.
    pub fn rooted(roots: &[&Path]) -> Self {
        Self {
            allowed_roots: roots.iter().map(|p| normalize_path(p)).collect(),
            blocked: Vec::new(),
        }
    }

    /// Normalize and verify a path may be read. Returns the canonical form.
    pub fn check_access(&self, raw: &Path) -> Result<PathBuf, ToolError> {
        let path = normalize_path(raw);
        if is_sensitive(&path) {
            return Err(ToolError::policy(format!(
                "access to sensitive path refused: {}",
                path.display()
            )));
        }
        if self.blocked.iter().any(|b| path.starts_with(b)) {
            return Err(ToolError::policy(format!(
                "path is blocklisted: {}",
                path.display()
            )));
        }
        Ok(path)
    }

    /// Like [`Self::check_access`], additionally requiring the path to sit
    /// under an allowed root.
    pub fn check_write(&self, raw: &Path) -> Result<PathBuf, ToolError> {
        let path = self.check_access(raw)?;
        if !self.allowed_roots.iter().any(|root| path.starts_with(root)) {
            return Err(ToolError::policy(format!(
                "write outside allowed roots refused: {}",
                path.display()
            )));
        }
        Ok(path)
    }
}

fn is_sensitive(path: &Path) -> bool {
    let as_str = path.to_string_lossy();
    if SENSITIVE_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix) || as_str.as_ref() == *prefix)
    {
        return true;
    }
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|s| CREDENTIAL_COMPONENTS.contains(&s))
    })
}

// ---------------------------------------------------------------------------
// Shell command policy
// ---------------------------------------------------------------------------

/// Built-in dangerous patterns, matched case-insensitively anywhere in the
/// command line.
const BLOCKED_PATTERNS: &[&str] = &[
    r"rm\s+-[a-z]*[rf][a-z]*\s+/(\s|$)",        // rm -rf / and variants
    r"rm\s+-[a-z]*[rf][a-z]*\s+/[a-z]*\s*\*",   // rm -rf /x *
    r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:", // fork bomb
    r"(curl|wget)\b[^|;&]*\|\s*(ba|z|da)?sh\b",  // download piped to shell
    r"base64\s+(-d|--decode)\b[^|;&]*\|\s*(ba|z|da)?sh\b",
    r"mkfs(\.|\s)",
    r"dd\s+if=.*of=/dev/",
    r">\s*/dev/sd",
];

/// Shell metacharacters refused outright in exec-only mode.
const METACHARACTERS: &[char] = &['|', ';', '&', '$', '`', '>', '<', '(', ')'];

/// Validates shell commands before execution.
#[derive(Debug, Clone)]
pub struct ShellGuard {
    exec_only: bool,
    patterns: Vec<Regex>,
    blocked_commands: Vec<String>,
}

impl ShellGuard {
    pub fn from_config(config: &ToolsConfig) -> Self {
        let patterns = BLOCKED_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
            .collect();
        Self {
            exec_only: config.exec_only,
            patterns,
            blocked_commands: config
                .blocked_commands
                .iter()
                .map(|c| c.to_lowercase())
                .collect(),
        }
    }

    /// Refuse the command if it trips any policy.
    pub fn check(&self, command: &str) -> Result<(), ToolError> {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Err(ToolError::invalid_input("no command provided"));
        }

        if self.exec_only {
            if let Some(bad) = trimmed.chars().find(|c| METACHARACTERS.contains(c)) {
                return Err(ToolError::policy(format!(
                    "shell metacharacter '{bad}' refused in exec-only mode"
                )));
            }
        }

        for pattern in &self.patterns {
            if pattern.is_match(trimmed) {
                tracing::warn!(pattern = %pattern.as_str(), "blocked shell pattern");
                return Err(ToolError::policy("command blocked by security policy"));
            }
        }

        // Operator-configured prefixes apply to every chained segment, so
        // `echo hi; rm -rf /tmp` cannot smuggle a blocked command.
        if !self.blocked_commands.is_empty() {
            let lower = trimmed.to_lowercase();
            for segment in lower.split(['|', ';', '&']) {
                let segment = segment.trim();
                if self
                    .blocked_commands
                    .iter()
                    .any(|blocked| segment.starts_with(blocked.as_str()))
                {
                    return Err(ToolError::policy("command blocked by security policy"));
                }
            }
        }

        Ok(())
    }
}
