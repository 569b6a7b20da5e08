//! Temporary trust grants.
//!
//! A grant auto-approves matching tool calls until it expires. Scope is
//! `(tool, server)` plus an optional canonical path prefix; prefixes are
//! stored with a trailing `/` so `/workspace/proj` can never accidentally
//! match `/workspace/project-evil`.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use vigil_types::paths::normalize_prefix;

/// One time-bounded trust grant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrustGrant {
    pub tool_name: String,
    pub server_name: String,
    /// Canonical path prefix ending with `/`, or `None` for tool-global.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TrustGrant {
    /// The store key: `server::tool` or `server::tool@prefix`.
    fn key(tool_name: &str, server_name: &str, path_prefix: Option<&str>) -> String {
        let base = format!("{server_name}::{tool_name}");
        match path_prefix {
            Some(prefix) => format!("{base}@{prefix}"),
            None => base,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// In-memory trust store. Expired grants are dropped lazily whenever they
/// are consulted.
#[derive(Debug, Default)]
pub struct TrustStore {
    grants: HashMap<String, TrustGrant>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant trust for `minutes`; returns the expiry instant. Re-granting
    /// the same scope replaces the previous expiry.
    pub fn grant(
        &mut self,
        tool_name: &str,
        server_name: &str,
        path_prefix: Option<&str>,
        minutes: u32,
    ) -> DateTime<Utc> {
        let now = Utc::now();
        let expires_at = now + Duration::minutes(i64::from(minutes.max(1)));
        let prefix = path_prefix.map(normalize_prefix);
        let key = TrustGrant::key(tool_name, server_name, prefix.as_deref());
        tracing::info!(
            scope = %key,
            minutes = minutes.max(1),
            "trust granted"
        );
        self.grants.insert(
            key,
            TrustGrant {
                tool_name: tool_name.to_string(),
                server_name: server_name.to_string(),
                path_prefix: prefix,
                granted_at: now,
                expires_at,
            },
        );
        expires_at
    }

    /// Remove one grant; returns whether it existed.
    pub fn revoke(
        &mut self,
        tool_name: &str,
        server_name: &str,
        path_prefix: Option<&str>,
    ) -> bool {
        let prefix = path_prefix.map(normalize_prefix);
        let key = TrustGrant::key(tool_name, server_name, prefix.as_deref());
        let removed = self.grants.remove(&key).is_some();
        if removed {
            tracing::info!(scope = %key, "trust revoked");
        }
        removed
    }

    /// Remove every grant; returns how many were dropped.
    pub fn revoke_all(&mut self) -> usize {
        let count = self.grants.len();
        self.grants.clear();
        count
    }

    /// Whether a call is covered by a live grant.
    ///
    /// Match order, first winner wins:
    /// 1. exact: a grant whose prefix equals the effective path,
    /// 2. prefix: a grant whose prefix the effective path starts with,
    /// 3. tool-global: a grant with no path scope.
    ///
    /// Expired grants never match and are garbage-collected on the way.
    pub fn is_trusted(
        &mut self,
        tool_name: &str,
        server_name: &str,
        effective_path: Option<&str>,
        now: DateTime<Utc>,
    ) -> bool {
        self.grants.retain(|_, grant| !grant.is_expired(now));

        if let Some(path) = effective_path {
            let exact = normalize_prefix(path);
            let exact_key = TrustGrant::key(tool_name, server_name, Some(exact.as_str()));
            if self.grants.contains_key(&exact_key) {
                return true;
            }
            let matched = self.grants.values().any(|grant| {
                grant.tool_name == tool_name
                    && grant.server_name == server_name
                    && grant
                        .path_prefix
                        .as_deref()
                        .is_some_and(|prefix| exact.starts_with(prefix))
            });
            if matched {
                return true;
            }
        }

        let global_key = TrustGrant::key(tool_name, server_name, None);
        self.grants.contains_key(&global_key)
    }

    /// Live grants, expired ones dropped.
    pub fn list(&mut self, now: DateTime<Utc>) -> Vec<TrustGrant> {
        self.grants.retain(|_, grant| !grant.is_expired(now));
        let mut grants: Vec<TrustGrant> = self.grants.values().cloned().collect();
        grants.sort_by(|a, b| a.expires_at.cmp(&b.expires_at));
        grants
    }
}
