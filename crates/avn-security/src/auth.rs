// SPDX-License-Identifier: MIT OR Apache-2.0
//! Token authorization and REST gating.
//!
//! `guard_rest_access` decides, for every HTTP request, whether it may
//! reach the dispatcher and under which scope. The admin secret grants
//! everything; the bootstrap key never authenticates; the `cron` action
//! bypasses authentication entirely (it still passes security).

use avn_core::{EngineError, TokenRecord, TokenStatus, sha256_hex};
use avn_store::{BrainRepository, generate_key};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// How a request was authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Via the configured admin secret.
    AdminSecret,
    /// Via a registered token.
    Token,
    /// The auth-exempt `cron` action.
    Cron,
}

/// Breadth of project access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Every project.
    All,
    /// Only the listed projects.
    Projects,
}

/// The set of projects a request may touch.
#[derive(Debug, Clone)]
pub struct TokenScope {
    /// Breadth of the scope.
    pub kind: ScopeKind,
    /// Project slugs; `["*"]` under [`ScopeKind::All`].
    pub projects: Vec<String>,
}

impl TokenScope {
    /// The all-projects scope.
    #[must_use]
    pub fn all() -> Self {
        Self {
            kind: ScopeKind::All,
            projects: vec!["*".into()],
        }
    }

    /// Whether `slug` is within scope.
    #[must_use]
    pub fn allows_project(&self, slug: &str) -> bool {
        match self.kind {
            ScopeKind::All => true,
            ScopeKind::Projects => self.projects.iter().any(|p| p == slug || p == "*"),
        }
    }
}

/// A granted request.
#[derive(Debug, Clone)]
pub struct AccessDecision {
    /// How the request authenticated.
    pub mode: AuthMode,
    /// Granted scope.
    pub scope: TokenScope,
    /// Token id for [`AuthMode::Token`] grants.
    pub token_id: Option<String>,
}

/// Redacted preview of a token key: first four, `...`, last four.
#[must_use]
pub fn token_preview(key: &str) -> String {
    if key.len() < 12 {
        return "****".to_string();
    }
    format!("{}...{}", &key[..4], &key[key.len() - 4..])
}

/// Token lookup, scope derivation, admin-secret bypass, REST gating.
pub struct AuthManager {
    repo: Arc<BrainRepository>,
    admin_secret: Option<String>,
    api_key_length: usize,
}

impl AuthManager {
    /// Build a manager. An `admin_secret` not matching the `_…` /
    /// length ≥ 8 rule is discarded here as a last line of defense (the
    /// config layer already warns about it).
    #[must_use]
    pub fn new(
        repo: Arc<BrainRepository>,
        admin_secret: Option<String>,
        api_key_length: usize,
    ) -> Self {
        let admin_secret =
            admin_secret.filter(|s| s.starts_with('_') && s.len() >= 8);
        Self {
            repo,
            admin_secret,
            api_key_length,
        }
    }

    /// Authorize one REST request.
    ///
    /// # Errors
    ///
    /// `auth` errors with reasons `api_disabled` (503), `token_missing`
    /// (401), `bootstrap_forbidden` (403), `token_invalid` (401), or
    /// `token_inactive` (403).
    pub fn guard_rest_access(
        &self,
        token: Option<&str>,
        action: &str,
        supplied_secret: Option<&str>,
    ) -> Result<AccessDecision, EngineError> {
        if let (Some(configured), Some(supplied)) = (&self.admin_secret, supplied_secret) {
            if configured == supplied {
                return Ok(AccessDecision {
                    mode: AuthMode::AdminSecret,
                    scope: TokenScope::all(),
                    token_id: None,
                });
            }
        }

        // Scheduled invocations arrive from out-of-band infrastructure
        // with no credentials; they are the single auth-exempt action.
        if action == "cron" {
            return Ok(AccessDecision {
                mode: AuthMode::Cron,
                scope: TokenScope::all(),
                token_id: None,
            });
        }

        let auth = self.repo.system_auth_state()?;
        if !auth.api.enabled {
            return Err(EngineError::auth("api_disabled", "REST access is disabled"));
        }

        let token = token.map(str::trim).filter(|t| !t.is_empty());
        let Some(token) = token else {
            return Err(EngineError::auth("token_missing", "no API token supplied"));
        };

        if token == auth.bootstrap_key {
            return Err(EngineError::auth(
                "bootstrap_forbidden",
                "the bootstrap key never authenticates REST requests",
            ));
        }

        let hash = sha256_hex(token.as_bytes());
        let Some((id, record)) = auth.tokens.iter().find(|(_, r)| r.hash == hash) else {
            return Err(EngineError::auth("token_invalid", "unknown API token"));
        };
        if record.status != TokenStatus::Active {
            return Err(EngineError::auth("token_inactive", "token is revoked"));
        }

        let scope = derive_scope(record);
        if let Err(err) = self.repo.touch_auth_key(id) {
            debug!(token = %id, error = %err, "failed to record token usage");
        }
        Ok(AccessDecision {
            mode: AuthMode::Token,
            scope,
            token_id: Some(id.clone()),
        })
    }

    /// Generate and register a token. Returns `(id, key)`; the key is
    /// shown exactly once, only its hash is stored.
    ///
    /// # Errors
    ///
    /// `invalid_argument` for an empty label, `storage` on write
    /// failure.
    pub fn register_token(
        &self,
        label: &str,
        scope: Option<&str>,
        projects: Option<&str>,
    ) -> Result<(String, String), EngineError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(EngineError::invalid_argument("token label must not be empty"));
        }

        let scope_tag = scope
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "ALL".to_string());
        let project_list: Vec<String> = match (&scope_tag[..], projects) {
            ("ALL", _) => vec!["*".to_string()],
            (_, Some(csv)) => csv
                .split(',')
                .map(|p| p.trim().to_ascii_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            (_, None) => Vec::new(),
        };
        if scope_tag != "ALL" && project_list.is_empty() {
            return Err(EngineError::invalid_argument(
                "a project-scoped token needs at least one project",
            ));
        }

        let key = generate_key(self.api_key_length);
        let id = Uuid::new_v4().simple().to_string();
        let record = TokenRecord {
            hash: sha256_hex(key.as_bytes()),
            label: label.to_string(),
            scope: scope_tag,
            projects: project_list,
            status: TokenStatus::Active,
            created_at: Utc::now(),
            last_used_at: None,
            preview: token_preview(&key),
        };
        self.repo.register_auth_token(&id, record)?;
        Ok((id, key))
    }

    /// Redacted token listing for the `auth list` command.
    ///
    /// # Errors
    ///
    /// `storage` when the system brain is unreadable.
    pub fn list_tokens(&self) -> Result<serde_json::Value, EngineError> {
        let auth = self.repo.system_auth_state()?;
        let tokens: Vec<serde_json::Value> = auth
            .tokens
            .iter()
            .map(|(id, record)| {
                json!({
                    "id": id,
                    "label": record.label,
                    "preview": record.preview,
                    "scope": record.scope,
                    "projects": record.projects,
                    "status": record.status,
                    "created_at": record.created_at,
                    "last_used_at": record.last_used_at,
                })
            })
            .collect();
        Ok(json!(tokens))
    }
}

fn derive_scope(record: &TokenRecord) -> TokenScope {
    if record.scope.eq_ignore_ascii_case("all") {
        return TokenScope::all();
    }
    // Stored project lists may be a CSV leftover from older tooling.
    let projects: Vec<String> = record
        .projects
        .iter()
        .flat_map(|entry| entry.split(','))
        .map(|p| p.trim().to_ascii_lowercase())
        .filter(|p| !p.is_empty())
        .collect();
    TokenScope {
        kind: ScopeKind::Projects,
        projects,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avn_core::EventBus;
    use avn_store::PathLocator;

    fn manager(admin_secret: Option<&str>) -> (AuthManager, Arc<BrainRepository>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let locator = PathLocator::new(dir.path().join("avn"), None, None, None);
        locator.ensure_layout().unwrap();
        let repo = Arc::new(BrainRepository::new(locator, Arc::new(EventBus::new())));
        repo.ensure_system_brain().unwrap();
        let auth = AuthManager::new(repo.clone(), admin_secret.map(String::from), 40);
        (auth, repo, dir)
    }

    #[test]
    fn preview_uses_three_dots() {
        assert_eq!(token_preview("abcdefghijklmnop"), "abcd...mnop");
        assert_eq!(token_preview("short"), "****");
    }

    #[test]
    fn admin_secret_grants_all() {
        let (auth, _repo, _dir) = manager(Some("_topsecret"));
        let decision = auth
            .guard_rest_access(None, "save", Some("_topsecret"))
            .unwrap();
        assert_eq!(decision.mode, AuthMode::AdminSecret);
        assert!(decision.scope.allows_project("anything"));
    }

    #[test]
    fn invalid_admin_secret_config_is_discarded() {
        let (auth, _repo, _dir) = manager(Some("nounderscore"));
        let err = auth
            .guard_rest_access(None, "save", Some("nounderscore"))
            .unwrap_err();
        assert_eq!(err.reason(), "api_disabled");
    }

    #[test]
    fn cron_bypasses_authentication() {
        let (auth, _repo, _dir) = manager(None);
        let decision = auth.guard_rest_access(None, "cron", None).unwrap();
        assert_eq!(decision.mode, AuthMode::Cron);
    }

    #[test]
    fn disabled_api_refuses_tokens() {
        let (auth, _repo, _dir) = manager(None);
        let err = auth
            .guard_rest_access(Some("whatever"), "save", None)
            .unwrap_err();
        assert_eq!(err.reason(), "api_disabled");
        assert_eq!(err.http_status(), 503);
    }

    #[test]
    fn missing_token_is_401() {
        let (auth, repo, _dir) = manager(None);
        repo.set_api_enabled(true).unwrap();
        let err = auth.guard_rest_access(None, "save", None).unwrap_err();
        assert_eq!(err.reason(), "token_missing");
        assert_eq!(err.http_status(), 401);
        let err = auth.guard_rest_access(Some("  "), "save", None).unwrap_err();
        assert_eq!(err.reason(), "token_missing");
    }

    #[test]
    fn bootstrap_key_is_forbidden() {
        let (auth, repo, _dir) = manager(None);
        repo.set_api_enabled(true).unwrap();
        let bootstrap = repo.system_auth_state().unwrap().bootstrap_key;
        let err = auth
            .guard_rest_access(Some(&bootstrap), "save", None)
            .unwrap_err();
        assert_eq!(err.reason(), "bootstrap_forbidden");
        assert_eq!(err.http_status(), 403);
    }

    #[test]
    fn registered_token_authenticates_and_touches() {
        let (auth, repo, _dir) = manager(None);
        repo.set_api_enabled(true).unwrap();
        let (id, key) = auth.register_token("ci", None, None).unwrap();

        let decision = auth.guard_rest_access(Some(&key), "save", None).unwrap();
        assert_eq!(decision.mode, AuthMode::Token);
        assert_eq!(decision.token_id.as_deref(), Some(id.as_str()));
        assert!(decision.scope.allows_project("any"));

        let state = repo.system_auth_state().unwrap();
        assert!(state.tokens[&id].last_used_at.is_some());
    }

    #[test]
    fn unknown_token_is_invalid() {
        let (auth, repo, _dir) = manager(None);
        repo.set_api_enabled(true).unwrap();
        let err = auth
            .guard_rest_access(Some("madeup"), "save", None)
            .unwrap_err();
        assert_eq!(err.reason(), "token_invalid");
        assert_eq!(err.http_status(), 401);
    }

    #[test]
    fn revoked_token_is_inactive() {
        let (auth, repo, _dir) = manager(None);
        repo.set_api_enabled(true).unwrap();
        let (id, key) = auth.register_token("old", None, None).unwrap();
        repo.revoke_auth_token(&id).unwrap();
        let err = auth.guard_rest_access(Some(&key), "save", None).unwrap_err();
        assert_eq!(err.reason(), "token_inactive");
        assert_eq!(err.http_status(), 403);
    }

    #[test]
    fn project_scoped_token_limits_projects() {
        let (auth, repo, _dir) = manager(None);
        repo.set_api_enabled(true).unwrap();
        let (_, key) = auth
            .register_token("limited", Some("projects"), Some("alpha, beta"))
            .unwrap();
        let decision = auth.guard_rest_access(Some(&key), "save", None).unwrap();
        assert_eq!(decision.scope.kind, ScopeKind::Projects);
        assert!(decision.scope.allows_project("alpha"));
        assert!(decision.scope.allows_project("beta"));
        assert!(!decision.scope.allows_project("gamma"));
    }

    #[test]
    fn project_scope_requires_projects() {
        let (auth, _repo, _dir) = manager(None);
        assert!(auth.register_token("bad", Some("projects"), None).is_err());
    }

    #[test]
    fn only_hash_and_preview_are_stored() {
        let (auth, repo, _dir) = manager(None);
        let (id, key) = auth.register_token("ci", None, None).unwrap();
        let record = &repo.system_auth_state().unwrap().tokens[&id];
        assert_eq!(record.hash, sha256_hex(key.as_bytes()));
        assert_ne!(record.preview, key);
        assert!(record.preview.contains("..."));
    }
}
