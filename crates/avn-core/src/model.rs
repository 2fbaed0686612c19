// SPDX-License-Identifier: MIT OR Apache-2.0
//! Brain document model.
//!
//! One brain is one JSON document: metadata, a shared config map,
//! projects holding versioned entities, and a commit index for O(1)
//! content-address lookup. The system brain additionally carries auth
//! state, export presets, export layouts, and scheduler tasks.
//!
//! All maps are `BTreeMap` so the serialized document is deterministic.

use crate::canonical::payload_hash;
use crate::error::EngineError;
use crate::reference::{MIN_COMMIT_PREFIX, VersionRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Brain
// ---------------------------------------------------------------------------

/// A complete brain file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainDocument {
    /// Identity and schema metadata.
    pub meta: BrainMeta,

    /// Shared key/value store (keys normalized lowercase, dotted).
    #[serde(default)]
    pub config: BTreeMap<String, Value>,

    /// Projects by slug.
    #[serde(default)]
    pub projects: BTreeMap<String, Project>,

    /// Commit hash → location, for O(1) commit lookup.
    #[serde(default)]
    pub commit_index: BTreeMap<String, CommitPointer>,

    /// Auth substate. Present only in the system brain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthState>,

    /// Export presets (system brain).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub presets: BTreeMap<String, Value>,

    /// Export layouts (system brain).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub export_layouts: BTreeMap<String, Value>,

    /// Scheduled task definitions (system brain).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scheduler_tasks: BTreeMap<String, Value>,
}

/// Identity block of a brain file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainMeta {
    /// Brain slug (`system`, or the user brain name).
    pub slug: String,
    /// Stable identity across renames.
    pub uuid: Uuid,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// On-disk schema version.
    pub schema_version: String,
}

impl BrainDocument {
    /// Fresh, empty brain.
    #[must_use]
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            meta: BrainMeta {
                slug: slug.into(),
                uuid: Uuid::new_v4(),
                created_at: Utc::now(),
                schema_version: crate::SCHEMA_VERSION.to_string(),
            },
            config: BTreeMap::new(),
            projects: BTreeMap::new(),
            commit_index: BTreeMap::new(),
            auth: None,
            presets: BTreeMap::new(),
            export_layouts: BTreeMap::new(),
            scheduler_tasks: BTreeMap::new(),
        }
    }

    /// Look up a project or fail with `not_found`.
    ///
    /// # Errors
    ///
    /// Returns `not_found` when no project has this slug.
    pub fn project(&self, slug: &str) -> Result<&Project, EngineError> {
        self.projects
            .get(slug)
            .ok_or_else(|| EngineError::not_found(format!("project '{slug}' not found")))
    }

    /// Mutable variant of [`BrainDocument::project`].
    ///
    /// # Errors
    ///
    /// Returns `not_found` when no project has this slug.
    pub fn project_mut(&mut self, slug: &str) -> Result<&mut Project, EngineError> {
        self.projects
            .get_mut(slug)
            .ok_or_else(|| EngineError::not_found(format!("project '{slug}' not found")))
    }
}

/// Location of one committed version, resolvable from a commit hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPointer {
    /// Project slug.
    pub project: String,
    /// Entity slug.
    pub entity: String,
    /// Version number (stringified).
    pub version: String,
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// Lifecycle state of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    /// Normal, writable state.
    Active,
    /// Soft-removed; kept for inspection and restore.
    Archived,
    /// Marked for erasure.
    Deleted,
}

/// A named collection of entities within a brain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Project slug, unique within the brain.
    pub slug: String,
    /// Display title.
    pub title: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Lifecycle state.
    pub status: ProjectStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Set when the project was archived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    /// Entities by slug.
    #[serde(default)]
    pub entities: BTreeMap<String, Entity>,
}

impl Project {
    /// Fresh active project.
    #[must_use]
    pub fn new(slug: impl Into<String>, title: impl Into<String>, description: String) -> Self {
        let now = Utc::now();
        Self {
            slug: slug.into(),
            title: title.into(),
            description,
            status: ProjectStatus::Active,
            created_at: now,
            updated_at: now,
            archived_at: None,
            entities: BTreeMap::new(),
        }
    }

    /// Look up an entity or fail with `not_found`.
    ///
    /// # Errors
    ///
    /// Returns `not_found` when no entity has this slug.
    pub fn entity(&self, slug: &str) -> Result<&Entity, EngineError> {
        self.entities.get(slug).ok_or_else(|| {
            EngineError::not_found(format!("entity '{}.{slug}' not found", self.slug))
        })
    }

    /// Mutable variant of [`Project::entity`].
    ///
    /// # Errors
    ///
    /// Returns `not_found` when no entity has this slug.
    pub fn entity_mut(&mut self, slug: &str) -> Result<&mut Entity, EngineError> {
        let project = self.slug.clone();
        self.entities.get_mut(slug).ok_or_else(|| {
            EngineError::not_found(format!("entity '{project}.{slug}' not found"))
        })
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Lifecycle state of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    /// Has an active version.
    Active,
    /// Soft-removed; history retained, no active version required.
    Archived,
}

/// A versioned record identified by `project.slug`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Entity slug, unique within the project.
    pub slug: String,
    /// Optional parent entity slug (hierarchy).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Path segments used for relative URL computation.
    #[serde(default)]
    pub path_segments: Vec<String>,
    /// Number of the currently active version, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_version: Option<String>,
    /// Lifecycle state.
    pub status: EntityStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Append-only version history, oldest first.
    #[serde(default)]
    pub versions: Vec<VersionRecord>,
}

impl Entity {
    /// Fresh entity with no versions yet.
    ///
    /// Path segments come from the dotted slug (`chapter.one` →
    /// `["chapter", "one"]`); they drive relative URL computation.
    #[must_use]
    pub fn new(slug: impl Into<String>, parent: Option<String>) -> Self {
        let slug = slug.into();
        let now = Utc::now();
        let path_segments: Vec<String> = slug.split('.').map(str::to_string).collect();
        Self {
            slug,
            parent,
            path_segments,
            active_version: None,
            status: EntityStatus::Active,
            created_at: now,
            updated_at: now,
            versions: Vec::new(),
        }
    }

    /// The active version record, if one exists.
    #[must_use]
    pub fn active(&self) -> Option<&VersionRecord> {
        let number = self.active_version.as_deref()?;
        self.versions
            .iter()
            .find(|v| v.version == number && v.status == VersionStatus::Active)
    }

    /// Next dense version number (1-based).
    #[must_use]
    pub fn next_version_number(&self) -> u64 {
        self.versions
            .iter()
            .filter_map(|v| v.version.parse::<u64>().ok())
            .max()
            .map_or(1, |n| n + 1)
    }

    /// Resolve a reference against this entity's history.
    ///
    /// `None` resolves the active version. Commit references accept the
    /// full hash or a unique prefix of at least seven characters.
    ///
    /// # Errors
    ///
    /// Returns `not_found` when nothing matches, `invalid_argument` when
    /// a commit prefix is ambiguous.
    pub fn resolve_version(
        &self,
        reference: Option<&VersionRef>,
    ) -> Result<&VersionRecord, EngineError> {
        match reference {
            None => self.active().ok_or_else(|| {
                EngineError::not_found(format!("entity '{}' has no active version", self.slug))
            }),
            Some(VersionRef::Version(number)) => {
                let wanted = number.to_string();
                self.versions
                    .iter()
                    .find(|v| v.version == wanted)
                    .ok_or_else(|| {
                        EngineError::not_found(format!(
                            "version @{number} of entity '{}' not found",
                            self.slug
                        ))
                    })
            }
            Some(VersionRef::Commit(prefix)) => {
                debug_assert!(prefix.len() >= MIN_COMMIT_PREFIX);
                let mut matches = self.versions.iter().filter(|v| v.commit.starts_with(prefix));
                let first = matches.next().ok_or_else(|| {
                    EngineError::not_found(format!(
                        "commit #{prefix} not found on entity '{}'",
                        self.slug
                    ))
                })?;
                // Restores duplicate payloads, so several versions may
                // legitimately carry the same commit; a prefix is only
                // ambiguous when it matches differing commits.
                if matches.any(|v| v.commit != first.commit) {
                    return Err(EngineError::invalid_argument(format!(
                        "commit prefix #{prefix} is ambiguous on entity '{}'",
                        self.slug
                    )));
                }
                Ok(first)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Lifecycle state of one version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// The single live version of its entity.
    Active,
    /// Superseded by a later version.
    Inactive,
    /// Belongs to an archived entity.
    Archived,
}

/// One immutable revision of an entity's payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Monotonic version number, stringified.
    pub version: String,
    /// Lifecycle state.
    pub status: VersionStatus,
    /// Content hash of the payload (equals `commit`).
    pub hash: String,
    /// Commit hash; the payload's content address.
    pub commit: String,
    /// Commit timestamp.
    pub committed_at: DateTime<Utc>,
    /// The payload itself.
    pub payload: Value,
    /// Optional version metadata (fieldset hash reference, save notes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl VersionRecord {
    /// Build an active version record for `payload`, hashing it
    /// canonically.
    #[must_use]
    pub fn commit_payload(number: u64, payload: Value, meta: Option<Value>) -> Self {
        let hash = payload_hash(&payload);
        Self {
            version: number.to_string(),
            status: VersionStatus::Active,
            commit: hash.clone(),
            hash,
            committed_at: Utc::now(),
            payload,
            meta,
        }
    }

    /// Verify `hash == commit == payload_hash(payload)`.
    #[must_use]
    pub fn verify_hash(&self) -> bool {
        self.hash == self.commit && self.hash == payload_hash(&self.payload)
    }
}

// ---------------------------------------------------------------------------
// Auth substate (system brain)
// ---------------------------------------------------------------------------

/// Lifecycle state of an API token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    /// Token may authenticate.
    Active,
    /// Token is revoked.
    Revoked,
}

/// Auth and API state stored in the system brain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthState {
    /// Registered tokens by id.
    #[serde(default)]
    pub tokens: BTreeMap<String, TokenRecord>,
    /// Bootstrap key; never valid for REST authentication.
    pub bootstrap_key: String,
    /// REST exposure state.
    pub api: ApiState,
}

/// REST exposure flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiState {
    /// Whether the HTTP endpoint accepts authenticated commands.
    pub enabled: bool,
}

/// One registered API token. Only the SHA-256 hash of the key is kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// SHA-256 hex of the token key.
    pub hash: String,
    /// Human label.
    pub label: String,
    /// Scope: `ALL` or `projects`.
    pub scope: String,
    /// Project slugs this token may touch (`*` under scope ALL).
    #[serde(default)]
    pub projects: Vec<String>,
    /// Lifecycle state.
    pub status: TokenStatus,
    /// Registration timestamp.
    pub created_at: DateTime<Utc>,
    /// Last successful authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    /// Redacted preview of the key (`abcd...wxyz`).
    pub preview: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity_with_versions(payloads: &[Value]) -> Entity {
        let mut entity = Entity::new("hero", None);
        for (i, payload) in payloads.iter().enumerate() {
            for old in &mut entity.versions {
                old.status = VersionStatus::Inactive;
            }
            let record = VersionRecord::commit_payload((i + 1) as u64, payload.clone(), None);
            entity.active_version = Some(record.version.clone());
            entity.versions.push(record);
        }
        entity
    }

    #[test]
    fn commit_payload_hash_equals_commit() {
        let record = VersionRecord::commit_payload(1, json!({"name": "Aria"}), None);
        assert!(record.verify_hash());
        assert_eq!(record.hash, record.commit);
        assert_eq!(record.version, "1");
    }

    #[test]
    fn active_resolves_current_version() {
        let entity = entity_with_versions(&[json!({"v": 1}), json!({"v": 2})]);
        assert_eq!(entity.active().unwrap().version, "2");
        assert_eq!(entity.active().unwrap().payload, json!({"v": 2}));
    }

    #[test]
    fn next_version_number_is_dense() {
        let entity = entity_with_versions(&[json!({"v": 1}), json!({"v": 2})]);
        assert_eq!(entity.next_version_number(), 3);
        assert_eq!(Entity::new("fresh", None).next_version_number(), 1);
    }

    #[test]
    fn resolve_by_version_number() {
        let entity = entity_with_versions(&[json!({"v": 1}), json!({"v": 2})]);
        let record = entity
            .resolve_version(Some(&VersionRef::Version(1)))
            .unwrap();
        assert_eq!(record.payload, json!({"v": 1}));
        assert!(entity.resolve_version(Some(&VersionRef::Version(9))).is_err());
    }

    #[test]
    fn resolve_by_commit_prefix() {
        let entity = entity_with_versions(&[json!({"v": 1}), json!({"v": 2})]);
        let full = entity.versions[0].commit.clone();
        let record = entity
            .resolve_version(Some(&VersionRef::Commit(full[..8].to_string())))
            .unwrap();
        assert_eq!(record.commit, full);
    }

    #[test]
    fn resolve_active_without_versions_fails() {
        let entity = Entity::new("empty", None);
        assert!(entity.resolve_version(None).is_err());
    }

    #[test]
    fn dotted_slug_drives_path_segments() {
        let entity = Entity::new("chapter.one", Some("chapter".into()));
        assert_eq!(entity.path_segments, vec!["chapter", "one"]);
        assert_eq!(entity.parent.as_deref(), Some("chapter"));
    }

    #[test]
    fn system_maps_omitted_when_empty() {
        let brain = BrainDocument::new("notes");
        let v = serde_json::to_value(&brain).unwrap();
        assert!(v.get("presets").is_none());
        assert!(v.get("auth").is_none());
        assert!(v.get("export_layouts").is_none());
        // Core maps always serialize.
        assert!(v.get("projects").is_some());
        assert!(v.get("commit_index").is_some());
    }

    #[test]
    fn brain_document_roundtrips() {
        let mut brain = BrainDocument::new("notes");
        brain
            .projects
            .insert("p".into(), Project::new("p", "P", String::new()));
        let json = serde_json::to_string(&brain).unwrap();
        let back: BrainDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back.meta.slug, "notes");
        assert!(back.projects.contains_key("p"));
    }
}
