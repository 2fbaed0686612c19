// SPDX-License-Identifier: MIT OR Apache-2.0
//! Rate limiting, blocks, and lockdown.
//!
//! All counters live in the cache under the `security` tag: per-client
//! 60-second windows, a global window, failure counters, block entries,
//! and the lockdown marker. Configuration is read from the system
//! brain's `security.*` keys on every decision, so runtime changes take
//! effect immediately.

use crate::auth::AuthMode;
use avn_cache::Cache;
use avn_core::{EngineError, ErrorKind, EventBus, sha256_hex};
use avn_store::BrainRepository;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const TAG: &str = "security";

/// Effective security configuration for one decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecuritySettings {
    /// Master switch; everything is a no-op when off.
    pub active: bool,
    /// Allowed requests per client per 60-second window.
    pub rate_limit: u64,
    /// Allowed aggregate requests per 60-second window.
    pub global_limit: u64,
    /// Client block duration in seconds after a rate breach.
    pub block_duration: u64,
    /// Lockdown duration in seconds after a global breach.
    pub ddos_lockdown: u64,
    /// Failed attempts before a client is blocked.
    pub failed_limit: u64,
    /// Block duration in seconds after too many failures.
    pub failed_block: u64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            active: true,
            rate_limit: 60,
            global_limit: 600,
            block_duration: 300,
            ddos_lockdown: 600,
            failed_limit: 5,
            failed_block: 900,
        }
    }
}

type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

/// Preflight / attempt / failure / success hooks plus lockdown state.
pub struct SecurityManager {
    repo: Arc<BrainRepository>,
    cache: Arc<Cache>,
    bus: Arc<EventBus>,
    clock: Clock,
}

impl SecurityManager {
    /// Build a manager over the repository (settings source) and the
    /// cache (counter store).
    #[must_use]
    pub fn new(repo: Arc<BrainRepository>, cache: Arc<Cache>, bus: Arc<EventBus>) -> Self {
        Self {
            repo,
            cache,
            bus,
            clock: Box::new(|| {
                use std::time::{SystemTime, UNIX_EPOCH};
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0)
            }),
        }
    }

    /// Replace the clock (tests drive window rollover deterministically).
    #[must_use]
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    /// Read the effective settings from the system brain config.
    #[must_use]
    pub fn settings(&self) -> SecuritySettings {
        let defaults = SecuritySettings::default();
        let get_u64 = |key: &str, fallback: u64| -> u64 {
            self.repo
                .get_config_value(key, true)
                .ok()
                .and_then(|v| v.as_u64())
                .unwrap_or(fallback)
        };
        let active = self
            .repo
            .get_config_value("security.active", true)
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(defaults.active);
        SecuritySettings {
            active,
            rate_limit: get_u64("security.rate_limit", defaults.rate_limit),
            global_limit: get_u64("security.global_limit", defaults.global_limit),
            block_duration: get_u64("security.block_duration", defaults.block_duration),
            ddos_lockdown: get_u64("security.ddos_lockdown", defaults.ddos_lockdown),
            failed_limit: get_u64("security.failed_limit", defaults.failed_limit),
            failed_block: get_u64("security.failed_block", defaults.failed_block),
        }
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    fn window(&self) -> i64 {
        self.now().div_euclid(60)
    }

    fn client_hash(client: &str) -> String {
        let normalized = client.trim().to_ascii_lowercase();
        let normalized = if normalized.is_empty() {
            "anonymous".to_string()
        } else {
            normalized
        };
        sha256_hex(normalized.as_bytes())
    }

    fn rate_key(&self, hash: &str) -> String {
        format!("sec.rate.{hash}.{}", self.window())
    }

    fn global_key(&self) -> String {
        format!("sec.rate.global.{}", self.window())
    }

    fn fail_key(hash: &str) -> String {
        format!("sec.fail.{hash}")
    }

    fn block_key(hash: &str) -> String {
        format!("sec.block.{hash}")
    }

    const LOCKDOWN_KEY: &'static str = "sec.lockdown";

    /// Deny early when a lockdown is active or the client is blocked.
    ///
    /// # Errors
    ///
    /// `locked_down` (503) or `rate_limited` (429), both with a
    /// `retry_after` hint.
    pub fn preflight(&self, client: &str) -> Result<(), EngineError> {
        if !self.settings().active {
            return Ok(());
        }
        if self.cache.get(Self::LOCKDOWN_KEY).is_some() {
            let retry = self
                .cache
                .ttl_remaining(Self::LOCKDOWN_KEY)
                .unwrap_or(0)
                .max(1);
            return Err(EngineError::new(ErrorKind::LockedDown, "engine is locked down")
                .with_context("retry_after", retry.to_string()));
        }
        let hash = Self::client_hash(client);
        if self.cache.get(&Self::block_key(&hash)).is_some() {
            let retry = self
                .cache
                .ttl_remaining(&Self::block_key(&hash))
                .unwrap_or(0)
                .max(1);
            return Err(EngineError::new(ErrorKind::RateLimited, "client is blocked")
                .with_context("retry_after", retry.to_string()));
        }
        Ok(())
    }

    /// Count one attempt against the client and global windows.
    ///
    /// # Errors
    ///
    /// `rate_limited` when the client window exceeds `rate_limit`;
    /// `locked_down` when the global window exceeds `global_limit`.
    pub fn register_attempt(&self, client: &str) -> Result<(), EngineError> {
        let settings = self.settings();
        if !settings.active {
            return Ok(());
        }
        let hash = Self::client_hash(client);

        // Window counters outlive their window by one slack window so a
        // late read at the boundary still sees them.
        let window_ttl = Duration::from_secs(120);
        let count = self
            .cache
            .increment(&self.rate_key(&hash), window_ttl, &[TAG])?;
        if count > settings.rate_limit {
            self.cache.put(
                &Self::block_key(&hash),
                json!({"reason": "rate_limit"}),
                Some(Duration::from_secs(settings.block_duration)),
                &[TAG],
            )?;
            warn!(client = %hash, count, "client rate limit exceeded, blocking");
            self.bus.emit(
                "security.client_blocked",
                &json!({"client": hash, "duration": settings.block_duration}),
            );
            return Err(
                EngineError::new(ErrorKind::RateLimited, "rate limit exceeded")
                    .with_context("retry_after", settings.block_duration.to_string()),
            );
        }

        let global = self
            .cache
            .increment(&self.global_key(), window_ttl, &[TAG])?;
        if global > settings.global_limit {
            self.lockdown(settings.ddos_lockdown)?;
            return Err(EngineError::new(
                ErrorKind::LockedDown,
                "global rate limit exceeded, engine locked down",
            )
            .with_context("retry_after", settings.ddos_lockdown.to_string()));
        }
        Ok(())
    }

    /// Count one failed request; block the client past `failed_limit`.
    ///
    /// # Errors
    ///
    /// `storage` when the counters cannot be written.
    pub fn register_failure(&self, client: &str) -> Result<(), EngineError> {
        let settings = self.settings();
        if !settings.active {
            return Ok(());
        }
        let hash = Self::client_hash(client);
        let failures = self.cache.increment(
            &Self::fail_key(&hash),
            Duration::from_secs(settings.failed_block),
            &[TAG],
        )?;
        if failures > settings.failed_limit {
            self.cache.put(
                &Self::block_key(&hash),
                json!({"reason": "failed_limit"}),
                Some(Duration::from_secs(settings.failed_block)),
                &[TAG],
            )?;
            warn!(client = %hash, failures, "failure limit exceeded, blocking");
            self.bus.emit(
                "security.client_blocked",
                &json!({"client": hash, "duration": settings.failed_block}),
            );
        }
        Ok(())
    }

    /// Clear the failure counter; an admin-secret success also clears
    /// the block entry.
    pub fn register_success(&self, client: &str, mode: AuthMode) {
        if !self.settings().active {
            return;
        }
        let hash = Self::client_hash(client);
        self.cache.forget(&Self::fail_key(&hash));
        if mode == AuthMode::AdminSecret {
            self.cache.forget(&Self::block_key(&hash));
        }
    }

    /// Administrative lockdown for `duration` seconds.
    ///
    /// # Errors
    ///
    /// `storage` when the marker cannot be written.
    pub fn lockdown(&self, duration: u64) -> Result<(), EngineError> {
        self.cache.put(
            Self::LOCKDOWN_KEY,
            json!({"since": self.now()}),
            Some(Duration::from_secs(duration)),
            &[TAG],
        )?;
        info!(duration, "lockdown engaged");
        self.bus
            .emit("security.lockdown", &json!({"duration": duration}));
        Ok(())
    }

    /// Drop every security counter, block, and the lockdown marker.
    #[must_use]
    pub fn purge(&self) -> usize {
        self.cache.flush(Some(&[TAG]))
    }

    /// Current security posture for the `security status` command.
    #[must_use]
    pub fn status(&self) -> Value {
        let settings = self.settings();
        json!({
            "active": settings.active,
            "rate_limit": settings.rate_limit,
            "global_limit": settings.global_limit,
            "block_duration": settings.block_duration,
            "ddos_lockdown": settings.ddos_lockdown,
            "failed_limit": settings.failed_limit,
            "failed_block": settings.failed_block,
            "lockdown_remaining": self.cache.ttl_remaining(Self::LOCKDOWN_KEY),
        })
    }
}
