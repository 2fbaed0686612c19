// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! avn-runtime
#![deny(unsafe_code)]

mod commands;

use avn_cache::Cache;
use avn_command::{CommandParser, CommandRegistry, ParsedCommand};
use avn_config::EngineConfig;
use avn_core::{EngineError, EventBus, ResponseEnvelope};
use avn_export::ExportEngine;
use avn_modules::{LoadReport, ModuleServices, discover_manifests};
use avn_query::ResolverEngine;
use avn_security::{AuthManager, AuthMode, ScopeKind, SecurityManager};
use avn_store::{BrainRepository, PathLocator};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, Weak};
use tracing::{info, warn};

pub use avn_config::{ConfigError, ConfigWarning, SecurityDefaults};
pub use avn_core::EnvelopeStatus;

/// One remote request entering the secured lifecycle.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Client key (forwarded-for header or peer address).
    pub client: String,
    /// Bearer token / API key, if any.
    pub token: Option<String>,
    /// Admin secret, if supplied.
    pub admin_secret: Option<String>,
    /// Action name; `command` dispatches `statement`.
    pub action: String,
    /// Named parameters.
    pub parameters: BTreeMap<String, Value>,
    /// Raw statement for `action == "command"`.
    pub statement: Option<String>,
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) repo: Arc<BrainRepository>,
    pub(crate) cache: Arc<Cache>,
    pub(crate) security: Arc<SecurityManager>,
    pub(crate) auth: Arc<AuthManager>,
    pub(crate) parser: CommandParser,
    pub(crate) registry: CommandRegistry,
    pub(crate) load_report: LoadReport,
    pub(crate) started_at: DateTime<Utc>,
}

impl EngineInner {
    pub(crate) fn execute_statement(&self, statement: &str) -> ResponseEnvelope {
        match self.parser.parse(statement) {
            Ok(parsed) => self.registry.dispatch(&parsed),
            Err(err) => ResponseEnvelope::from_error("parse", &err),
        }
    }

    pub(crate) fn execute_action(
        &self,
        action: &str,
        mut parameters: BTreeMap<String, Value>,
    ) -> ResponseEnvelope {
        if action == "command" {
            let statement = parameters
                .remove("command")
                .and_then(|v| v.as_str().map(str::to_string));
            return match statement {
                Some(statement) => self.execute_statement(&statement),
                None => ResponseEnvelope::from_error(
                    "command",
                    &EngineError::invalid_argument("action 'command' needs a command string"),
                ),
            };
        }
        let payload = parameters.remove("payload");
        let parsed = ParsedCommand {
            action: action.to_ascii_lowercase(),
            tokens: Vec::new(),
            payload,
            parameters,
            metadata: BTreeMap::new(),
        };
        self.registry.dispatch(&parsed)
    }
}

/// Handle shared by cron tasks to re-enter the dispatcher after the
/// engine is fully wired.
pub(crate) type Dispatcher = Arc<OnceLock<Weak<EngineInner>>>;

/// The engine: one per process, cheap to clone, safe to share.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Wire the container: ensure the layout and brains, seed defaults,
    /// load the built-in command modules, run diagnostics.
    ///
    /// # Errors
    ///
    /// `invalid_argument` when the configuration is unusable, `storage`
    /// when the layout or brains cannot be created.
    pub fn bootstrap(mut config: EngineConfig) -> Result<Self, EngineError> {
        let warnings = config
            .validate()
            .map_err(|e| EngineError::invalid_argument(e.to_string()))?;
        for warning in &warnings {
            warn!(%warning, "configuration warning");
        }

        let locator = PathLocator::new(
            config.root.clone(),
            config.backups_path.clone(),
            config.exports_path.clone(),
            config.log_path.clone(),
        );
        locator.ensure_layout()?;

        let bus = Arc::new(EventBus::new());
        let repo = Arc::new(BrainRepository::new(locator.clone(), bus.clone()));
        let created_system = repo.ensure_system_brain()?;
        repo.system_auth_state()?;
        seed_security_config(&repo, &config.security)?;
        avn_export::seed_presets(&repo)?;
        let active = repo.ensure_active_brain(&config.default_brain)?;

        let cache = Arc::new(Cache::new(locator.cache_dir(), true));
        let security = Arc::new(SecurityManager::new(
            repo.clone(),
            cache.clone(),
            bus.clone(),
        ));
        let auth = Arc::new(AuthManager::new(
            repo.clone(),
            config.admin_secret.clone(),
            config.api_key_length,
        ));

        let max_depth = repo
            .get_config_value("resolver.max_depth", true)
            .ok()
            .and_then(|v| v.as_u64())
            .map_or(avn_query::DEFAULT_MAX_DEPTH, |d| d as usize);
        let resolver = Arc::new(ResolverEngine::new(repo.clone()).with_max_depth(max_depth));
        let export = Arc::new(ExportEngine::new(
            repo.clone(),
            resolver.clone(),
            cache.clone(),
            config.save_exports,
        ));

        let mut parser = CommandParser::new(bus.clone());
        let mut registry = CommandRegistry::new(bus.clone());
        let dispatcher: Dispatcher = Arc::new(OnceLock::new());

        let deps = commands::HandlerDeps {
            repo: repo.clone(),
            cache: cache.clone(),
            security: security.clone(),
            auth: auth.clone(),
            resolver: resolver.clone(),
            export: export.clone(),
            config: Arc::new(config.clone()),
            dispatcher: dispatcher.clone(),
            started_at: Utc::now(),
            load_report: Arc::new(OnceLock::new()),
        };
        commands::register_parse_handlers(&mut parser);
        let loader = commands::module_loader(&deps);

        let mut manifests = discover_manifests(&locator.modules_system_dir());
        manifests.extend(discover_manifests(&locator.modules_user_dir()));
        let report = loader.load(
            ModuleServices {
                registry: &mut registry,
                parser: &mut parser,
                bus: bus.clone(),
                cache: cache.clone(),
                repo: repo.clone(),
                export: export.clone(),
            },
            &manifests,
        );
        let _ = deps.load_report.set(report.clone());

        let inner = Arc::new(EngineInner {
            config,
            bus,
            repo: repo.clone(),
            cache,
            security,
            auth,
            parser,
            registry,
            load_report: report,
            started_at: deps.started_at,
        });
        let _ = dispatcher.set(Arc::downgrade(&inner));
        let engine = Self { inner };

        engine.run_diagnostics(created_system, &active);
        Ok(engine)
    }

    fn run_diagnostics(&self, created_system: bool, active: &str) {
        for slug in [avn_store::SYSTEM_BRAIN, active] {
            match self.inner.repo.integrity_report(slug) {
                Ok(report) if report.is_ok() => {}
                Ok(report) => {
                    for issue in &report.issues {
                        warn!(brain = slug, location = %issue.location, detail = %issue.detail, "integrity issue");
                    }
                }
                Err(err) => warn!(brain = slug, error = %err, "integrity check failed"),
            }
        }
        info!(
            created_system,
            active,
            commands = self.inner.registry.commands().len(),
            modules = self.inner.load_report.initialized.len(),
            disabled = self.inner.load_report.disabled.len(),
            "engine ready"
        );
    }

    /// Parse and dispatch a statement (the CLI path).
    #[must_use]
    pub fn execute_statement(&self, statement: &str) -> ResponseEnvelope {
        self.inner.execute_statement(statement)
    }

    /// Dispatch an action with parameters (the HTTP path, after auth).
    #[must_use]
    pub fn execute_action(
        &self,
        action: &str,
        parameters: BTreeMap<String, Value>,
    ) -> ResponseEnvelope {
        self.inner.execute_action(action, parameters)
    }

    /// Run the full secured request lifecycle: preflight, attempt,
    /// authorization, scope check, dispatch, success/failure hooks.
    #[must_use]
    pub fn handle_request(&self, request: RequestContext) -> ResponseEnvelope {
        let client = &request.client;
        let action_name = if request.statement.is_some() && request.action.is_empty() {
            "command".to_string()
        } else {
            request.action.to_ascii_lowercase()
        };

        if let Err(err) = self.inner.security.preflight(client) {
            return ResponseEnvelope::from_error(&action_name, &err);
        }
        if let Err(err) = self.inner.security.register_attempt(client) {
            return ResponseEnvelope::from_error(&action_name, &err);
        }

        let decision = match self.inner.auth.guard_rest_access(
            request.token.as_deref(),
            &action_name,
            request.admin_secret.as_deref(),
        ) {
            Ok(decision) => decision,
            Err(err) => {
                if let Err(record_err) = self.inner.security.register_failure(client) {
                    warn!(error = %record_err, "failed to record auth failure");
                }
                return ResponseEnvelope::from_error(&action_name, &err);
            }
        };

        if let Err(err) = enforce_scope(&decision, &request, &action_name) {
            if let Err(record_err) = self.inner.security.register_failure(client) {
                warn!(error = %record_err, "failed to record scope failure");
            }
            return ResponseEnvelope::from_error(&action_name, &err);
        }

        let envelope = match &request.statement {
            Some(statement) if action_name == "command" => {
                self.inner.execute_statement(statement)
            }
            _ => self
                .inner
                .execute_action(&action_name, request.parameters.clone()),
        };

        if envelope.is_ok() {
            self.inner.security.register_success(client, decision.mode);
        } else if let Err(err) = self.inner.security.register_failure(client) {
            warn!(error = %err, "failed to record command failure");
        }
        envelope
    }

    /// The repository handle (tests and adapters).
    #[must_use]
    pub fn repository(&self) -> Arc<BrainRepository> {
        self.inner.repo.clone()
    }

    /// The event bus.
    #[must_use]
    pub fn bus(&self) -> Arc<EventBus> {
        self.inner.bus.clone()
    }

    /// The shared cache.
    #[must_use]
    pub fn cache(&self) -> Arc<Cache> {
        self.inner.cache.clone()
    }

    /// Engine configuration snapshot.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Module load report of the bootstrap pass.
    #[must_use]
    pub fn load_report(&self) -> &LoadReport {
        &self.inner.load_report
    }
}

/// Project-scoped tokens may only dispatch entity-level commands
/// against their projects; administrative groups need full scope.
fn enforce_scope(
    decision: &avn_security::AccessDecision,
    request: &RequestContext,
    action: &str,
) -> Result<(), EngineError> {
    if decision.scope.kind == ScopeKind::All || decision.mode == AuthMode::Cron {
        return Ok(());
    }
    let group = action.split('.').next().unwrap_or(action);
    let administrative = matches!(
        group,
        "auth" | "api" | "security" | "brain" | "config" | "schedule" | "cache" | "modules"
    );
    if administrative {
        return Err(EngineError::auth(
            "scope_denied",
            format!("token scope does not allow '{action}'"),
        ));
    }
    if let Some(project) = request
        .parameters
        .get("project")
        .and_then(Value::as_str)
    {
        if !decision.scope.allows_project(project) {
            return Err(EngineError::auth(
                "scope_denied",
                format!("token scope does not allow project '{project}'"),
            ));
        }
    }
    Ok(())
}

fn seed_security_config(
    repo: &BrainRepository,
    defaults: &SecurityDefaults,
) -> Result<(), EngineError> {
    let seeds: [(&str, Value); 7] = [
        ("security.active", json!(defaults.active)),
        ("security.rate_limit", json!(defaults.rate_limit)),
        ("security.global_limit", json!(defaults.global_limit)),
        ("security.block_duration", json!(defaults.block_duration)),
        ("security.ddos_lockdown", json!(defaults.ddos_lockdown)),
        ("security.failed_limit", json!(defaults.failed_limit)),
        ("security.failed_block", json!(defaults.failed_block)),
    ];
    for (key, value) in seeds {
        repo.seed_config_value(key, value, true)?;
    }
    Ok(())
}
