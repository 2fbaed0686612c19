// SPDX-License-Identifier: MIT OR Apache-2.0
//! Auth and API substate operations.
//!
//! Auth state lives in the system brain only. Token keys are never
//! stored; registration keeps the SHA-256 hash and a redacted preview.

use crate::repository::{BrainRepository, SYSTEM_BRAIN};
use avn_core::{AuthState, EngineError, TokenRecord, TokenStatus, model::ApiState};
use chrono::Utc;
use uuid::Uuid;

/// Generate a random alphanumeric key of `length` characters.
///
/// Keys draw on v4 UUID randomness (122 bits per draw), concatenated
/// until the requested length is covered.
#[must_use]
pub fn generate_key(length: usize) -> String {
    let mut key = String::with_capacity(length + 32);
    while key.len() < length {
        key.push_str(Uuid::new_v4().simple().to_string().as_str());
    }
    key.truncate(length);
    key
}

impl BrainRepository {
    /// Auth state of the system brain, seeding it on first access with a
    /// fresh bootstrap key and the API disabled.
    ///
    /// # Errors
    ///
    /// `storage` on write failure.
    pub fn system_auth_state(&self) -> Result<AuthState, EngineError> {
        let existing = self.with_brain(SYSTEM_BRAIN, |doc| Ok(doc.auth.clone()))?;
        if let Some(auth) = existing {
            return Ok(auth);
        }
        self.mutate_brain(SYSTEM_BRAIN, |doc| {
            let auth = doc.auth.get_or_insert_with(|| AuthState {
                tokens: Default::default(),
                bootstrap_key: generate_key(32),
                api: ApiState { enabled: false },
            });
            Ok(auth.clone())
        })
    }

    /// Record a successful authentication for token `id`.
    ///
    /// Serializes through the brain lock, so last-use timestamps are
    /// strictly ordered.
    ///
    /// # Errors
    ///
    /// `not_found` for an unknown token id.
    pub fn touch_auth_key(&self, id: &str) -> Result<(), EngineError> {
        self.mutate_brain(SYSTEM_BRAIN, |doc| {
            let auth = doc
                .auth
                .as_mut()
                .ok_or_else(|| EngineError::not_found("auth state not initialized"))?;
            let token = auth
                .tokens
                .get_mut(id)
                .ok_or_else(|| EngineError::not_found(format!("token '{id}' not found")))?;
            token.last_used_at = Some(Utc::now());
            Ok(())
        })
    }

    /// Store a freshly generated token record under `id`.
    ///
    /// # Errors
    ///
    /// `conflict` when the id is taken.
    pub fn register_auth_token(
        &self,
        id: &str,
        record: TokenRecord,
    ) -> Result<(), EngineError> {
        self.system_auth_state()?;
        self.mutate_brain(SYSTEM_BRAIN, |doc| {
            let auth = doc
                .auth
                .as_mut()
                .ok_or_else(|| EngineError::internal("auth state vanished"))?;
            if auth.tokens.contains_key(id) {
                return Err(EngineError::conflict(format!("token '{id}' already exists")));
            }
            auth.tokens.insert(id.to_string(), record);
            Ok(())
        })
    }

    /// Revoke a token by id.
    ///
    /// # Errors
    ///
    /// `not_found` for an unknown id.
    pub fn revoke_auth_token(&self, id: &str) -> Result<(), EngineError> {
        self.mutate_brain(SYSTEM_BRAIN, |doc| {
            let auth = doc
                .auth
                .as_mut()
                .ok_or_else(|| EngineError::not_found("auth state not initialized"))?;
            let token = auth
                .tokens
                .get_mut(id)
                .ok_or_else(|| EngineError::not_found(format!("token '{id}' not found")))?;
            token.status = TokenStatus::Revoked;
            Ok(())
        })
    }

    /// Drop every registered token.
    ///
    /// # Errors
    ///
    /// `storage` on write failure.
    pub fn reset_auth_tokens(&self) -> Result<usize, EngineError> {
        self.system_auth_state()?;
        self.mutate_brain(SYSTEM_BRAIN, |doc| {
            let auth = doc
                .auth
                .as_mut()
                .ok_or_else(|| EngineError::internal("auth state vanished"))?;
            let removed = auth.tokens.len();
            auth.tokens.clear();
            Ok(removed)
        })
    }

    /// Enable or disable REST exposure.
    ///
    /// # Errors
    ///
    /// `storage` on write failure.
    pub fn set_api_enabled(&self, enabled: bool) -> Result<(), EngineError> {
        self.system_auth_state()?;
        self.mutate_brain(SYSTEM_BRAIN, |doc| {
            let auth = doc
                .auth
                .as_mut()
                .ok_or_else(|| EngineError::internal("auth state vanished"))?;
            auth.api.enabled = enabled;
            Ok(())
        })
    }

    /// Rotate the bootstrap key, returning the new key.
    ///
    /// # Errors
    ///
    /// `storage` on write failure.
    pub fn update_bootstrap_key(&self, length: usize) -> Result<String, EngineError> {
        self.system_auth_state()?;
        let key = generate_key(length.max(16));
        let stored = key.clone();
        self.mutate_brain(SYSTEM_BRAIN, |doc| {
            let auth = doc
                .auth
                .as_mut()
                .ok_or_else(|| EngineError::internal("auth state vanished"))?;
            auth.bootstrap_key = stored;
            Ok(())
        })?;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PathLocator;
    use avn_core::EventBus;
    use std::sync::Arc;

    fn repo() -> (BrainRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let locator = PathLocator::new(dir.path().join("avn"), None, None, None);
        locator.ensure_layout().unwrap();
        let repo = BrainRepository::new(locator, Arc::new(EventBus::new()));
        repo.ensure_system_brain().unwrap();
        (repo, dir)
    }

    fn token(hash: &str) -> TokenRecord {
        TokenRecord {
            hash: hash.into(),
            label: "ci".into(),
            scope: "ALL".into(),
            projects: vec!["*".into()],
            status: TokenStatus::Active,
            created_at: Utc::now(),
            last_used_at: None,
            preview: "abcd...wxyz".into(),
        }
    }

    #[test]
    fn generated_keys_have_requested_length() {
        for length in [16, 32, 40, 64, 100] {
            let key = generate_key(length);
            assert_eq!(key.len(), length);
            assert!(key.bytes().all(|b| b.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn generated_keys_are_unique() {
        assert_ne!(generate_key(40), generate_key(40));
    }

    #[test]
    fn auth_state_seeded_on_first_access() {
        let (repo, _dir) = repo();
        let auth = repo.system_auth_state().unwrap();
        assert!(!auth.bootstrap_key.is_empty());
        assert!(!auth.api.enabled);
        assert!(auth.tokens.is_empty());

        // Second access returns the same seeded state.
        let again = repo.system_auth_state().unwrap();
        assert_eq!(again.bootstrap_key, auth.bootstrap_key);
    }

    #[test]
    fn register_revoke_reset_lifecycle() {
        let (repo, _dir) = repo();
        repo.register_auth_token("t1", token("h1")).unwrap();
        assert!(repo.register_auth_token("t1", token("h1")).is_err());

        repo.revoke_auth_token("t1").unwrap();
        let auth = repo.system_auth_state().unwrap();
        assert_eq!(auth.tokens["t1"].status, TokenStatus::Revoked);

        repo.register_auth_token("t2", token("h2")).unwrap();
        assert_eq!(repo.reset_auth_tokens().unwrap(), 2);
        assert!(repo.system_auth_state().unwrap().tokens.is_empty());
    }

    #[test]
    fn touch_sets_last_used() {
        let (repo, _dir) = repo();
        repo.register_auth_token("t1", token("h1")).unwrap();
        repo.touch_auth_key("t1").unwrap();
        let auth = repo.system_auth_state().unwrap();
        assert!(auth.tokens["t1"].last_used_at.is_some());
        assert!(repo.touch_auth_key("ghost").is_err());
    }

    #[test]
    fn api_toggle_persists() {
        let (repo, _dir) = repo();
        repo.set_api_enabled(true).unwrap();
        assert!(repo.system_auth_state().unwrap().api.enabled);
        repo.set_api_enabled(false).unwrap();
        assert!(!repo.system_auth_state().unwrap().api.enabled);
    }

    #[test]
    fn bootstrap_rotation_changes_key() {
        let (repo, _dir) = repo();
        let before = repo.system_auth_state().unwrap().bootstrap_key;
        let rotated = repo.update_bootstrap_key(32).unwrap();
        assert_ne!(before, rotated);
        assert_eq!(repo.system_auth_state().unwrap().bootstrap_key, rotated);
    }
}
