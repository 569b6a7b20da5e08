//! Role-specialized agent profiles.
//!
//! Seven fixed roles, each with its own system prompt, sandbox access
//! tier, and tool allowlist. The brain intersects its tool catalogue with
//! the active profile before anything is advertised to the model.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The fixed set of swarm roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Coder,
    Reviewer,
    Critic,
    Planner,
    Tester,
    Researcher,
    Security,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentRole::Coder => "coder",
            AgentRole::Reviewer => "reviewer",
            AgentRole::Critic => "critic",
            AgentRole::Planner => "planner",
            AgentRole::Tester => "tester",
            AgentRole::Researcher => "researcher",
            AgentRole::Security => "security",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a profile may do to the filesystem, which in turn constrains the
/// tool catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxAccess {
    None,
    Read,
    ReadWrite,
}

/// One role's operating parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentProfile {
    pub role: AgentRole,
    pub system_prompt: String,
    pub sandbox_access: SandboxAccess,
    pub allowed_tools: Vec<String>,
    pub max_iterations: u32,
    pub temperature: f64,
}

/// Tools that mutate the filesystem or spawn processes.
const WRITE_TOOLS: &[&str] = &["shell", "write_file", "patch_file"];

/// Tools that only read.
const READ_TOOLS: &[&str] = &["read_file", "search_files"];

impl AgentProfile {
    /// Whether this profile may call the named tool. The allowlist and
    /// the sandbox tier must both agree.
    pub fn permits(&self, tool_name: &str) -> bool {
        if !self.allowed_tools.iter().any(|t| t == tool_name) {
            return false;
        }
        if WRITE_TOOLS.contains(&tool_name) {
            return self.sandbox_access == SandboxAccess::ReadWrite;
        }
        if READ_TOOLS.contains(&tool_name) {
            return self.sandbox_access != SandboxAccess::None;
        }
        true
    }
}

/// The built-in profile for a role.
pub fn builtin_profile(role: AgentRole) -> AgentProfile {
    match role {
        AgentRole::Coder => AgentProfile {
            role,
            system_prompt: "You are a strict, rigorous software engineer. You write clean, \
                efficient, well-structured code. You have full read/write access to the \
                workspace. Respond ONLY with executable code; explanations go in code \
                comments."
                .into(),
            sandbox_access: SandboxAccess::ReadWrite,
            allowed_tools: vec![
                "shell".into(),
                "read_file".into(),
                "write_file".into(),
                "search_files".into(),
                "patch_file".into(),
            ],
            max_iterations: 3,
            temperature: 0.3,
        },
        AgentRole::Reviewer => AgentProfile {
            role,
            system_prompt: "You are an expert in code quality and security review. Analyze \
                the provided code for security flaws, logic bugs, unhandled edge cases, \
                performance problems, and bad practice. You have READ-ONLY workspace \
                access. Respond with a structured list of findings ordered by severity. \
                If the code is acceptable, respond exactly: APPROVED. If a specialist \
                should weigh in, add one directive of the form ROUTE:security or \
                ROUTE:tester."
                .into(),
            sandbox_access: SandboxAccess::Read,
            allowed_tools: vec!["read_file".into(), "search_files".into()],
            max_iterations: 3,
            temperature: 0.2,
        },
        AgentRole::Critic => AgentProfile {
            role,
            system_prompt: "You are a hostile validator. Inspect the approved artifact for \
                hallucinations, logic errors, security flaws, missed edge cases, and \
                requirement omissions. You have no workspace access; judge only what is \
                in front of you. Respond exactly VALID if the artifact holds up, or \
                REJECTED:<one-line reason> if it does not."
                .into(),
            sandbox_access: SandboxAccess::None,
            allowed_tools: vec![],
            max_iterations: 1,
            temperature: 0.2,
        },
        AgentRole::Planner => AgentProfile {
            role,
            system_prompt: "You are a software architect. Decompose complex tasks into \
                clear, ordered steps with validation criteria. Identify risks and \
                dependencies. You produce plans, not code."
                .into(),
            sandbox_access: SandboxAccess::None,
            allowed_tools: vec![],
            max_iterations: 1,
            temperature: 0.4,
        },
        AgentRole::Tester => AgentProfile {
            role,
            system_prompt: "You are a software testing expert. Write exhaustive unit and \
                integration tests covering nominal paths, edge cases, and failure modes. \
                You have full read/write workspace access to run what you write."
                .into(),
            sandbox_access: SandboxAccess::ReadWrite,
            allowed_tools: vec![
                "shell".into(),
                "read_file".into(),
                "write_file".into(),
                "search_files".into(),
            ],
            max_iterations: 3,
            temperature: 0.3,
        },
        AgentRole::Researcher => AgentProfile {
            role,
            system_prompt: "You are a research specialist. Break questions down, analyze \
                them, and provide detailed findings with sources. You do not execute \
                code; you provide information."
                .into(),
            sandbox_access: SandboxAccess::None,
            allowed_tools: vec![],
            max_iterations: 1,
            temperature: 0.5,
        },
        AgentRole::Security => AgentProfile {
            role,
            system_prompt: "You are an application security specialist. Audit the provided \
                code for injection, unsafe deserialization, path traversal, credential \
                leakage, SSRF, and privilege issues. You have READ-ONLY workspace access. \
                Report concrete findings with the vulnerable line and a fix."
                .into(),
            sandbox_access: SandboxAccess::Read,
            allowed_tools: vec!["read_file".into(), "search_files".into()],
            max_iterations: 1,
            temperature: 0.2,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seven_roles_have_distinct_prompts() {
        let roles = [
            AgentRole::Coder,
            AgentRole::Reviewer,
            AgentRole::Critic,
            AgentRole::Planner,
            AgentRole::Tester,
            AgentRole::Researcher,
            AgentRole::Security,
        ];
        let prompts: std::collections::HashSet<String> = roles
            .iter()
            .map(|r| builtin_profile(*r).system_prompt)
            .collect();
        assert_eq!(prompts.len(), roles.len());
    }

    #[test]
    fn sandbox_tiers_match_the_design() {
        assert_eq!(
            builtin_profile(AgentRole::Coder).sandbox_access,
            SandboxAccess::ReadWrite
        );
        assert_eq!(
            builtin_profile(AgentRole::Reviewer).sandbox_access,
            SandboxAccess::Read
        );
        assert_eq!(
            builtin_profile(AgentRole::Critic).sandbox_access,
            SandboxAccess::None
        );
        assert_eq!(
            builtin_profile(AgentRole::Security).sandbox_access,
            SandboxAccess::Read
        );
    }

    #[test]
    fn permits_intersects_allowlist_and_sandbox() {
        let coder = builtin_profile(AgentRole::Coder);
        assert!(coder.permits("write_file"));
        assert!(coder.permits("shell"));
        assert!(!coder.permits("made_up_tool"));

        let reviewer = builtin_profile(AgentRole::Reviewer);
        assert!(reviewer.permits("read_file"));
        assert!(!reviewer.permits("write_file"), "not in allowlist");

        // Even if an allowlist is misconfigured, the sandbox tier gates
        // write tools.
        let mut crippled = builtin_profile(AgentRole::Reviewer);
        crippled.allowed_tools.push("write_file".into());
        assert!(!crippled.permits("write_file"));

        let critic = builtin_profile(AgentRole::Critic);
        assert!(!critic.permits("read_file"));
    }
}
