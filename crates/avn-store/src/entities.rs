// SPDX-License-Identifier: MIT OR Apache-2.0
//! Project, entity, and version operations.
//!
//! All mutations run through [`BrainRepository::mutate_brain`], so the
//! atomic commit protocol applies uniformly. Version history is
//! append-only: saves and restores add versions, they never rewrite
//! existing ones.

use crate::repository::BrainRepository;
use avn_core::{
    CommitPointer, EngineError, Entity, EntityStatus, Project, ProjectStatus, VersionRecord,
    VersionRef, VersionStatus, canonical_json, merge::deep_merge, normalize_slug, payload_hash,
};
use chrono::Utc;
use serde_json::{Value, json};

/// Options accepted by [`BrainRepository::save_entity`].
#[derive(Debug, Clone)]
pub struct SaveOptions {
    /// Deep-merge onto the active payload (`false` replaces it).
    pub merge: bool,
    /// Fieldset name from an `entity:fieldset` selector; its hash
    /// reference is recorded in the version meta.
    pub fieldset: Option<String>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            merge: true,
            fieldset: None,
        }
    }
}

/// Result of a save or restore.
#[derive(Debug, Clone)]
pub struct SaveOutcome {
    /// Project slug.
    pub project: String,
    /// Entity slug.
    pub entity: String,
    /// The resulting version record (new, or the unchanged active one).
    pub record: VersionRecord,
    /// Whether a new version was appended.
    pub changed: bool,
    /// Whether the entity was created by this save.
    pub created_entity: bool,
}

impl BrainRepository {
    fn active_slug(&self) -> Result<String, EngineError> {
        self.active_brain_slug()
    }

    // -----------------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------------

    /// Projects of the active brain (deleted tombstones excluded).
    ///
    /// # Errors
    ///
    /// `not_found` when no brain is mounted.
    pub fn list_projects(&self) -> Result<Vec<Project>, EngineError> {
        let brain = self.active_slug()?;
        self.with_brain(&brain, |doc| {
            Ok(doc
                .projects
                .values()
                .filter(|p| p.status != ProjectStatus::Deleted)
                .cloned()
                .collect())
        })
    }

    /// Create a project in the active brain.
    ///
    /// # Errors
    ///
    /// `conflict` when the slug is taken, `invalid_argument` for a bad
    /// slug.
    pub fn create_project(
        &self,
        slug: &str,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<Project, EngineError> {
        let brain = self.active_slug()?;
        let slug = normalize_slug(slug)?;
        let title = title.unwrap_or(&slug).to_string();
        let description = description.unwrap_or_default().to_string();
        self.mutate_brain(&brain, |doc| {
            if doc.projects.contains_key(&slug) {
                return Err(EngineError::conflict(format!(
                    "project '{slug}' already exists"
                )));
            }
            let project = Project::new(&slug, title, description);
            doc.projects.insert(slug.clone(), project.clone());
            Ok(project)
        })
    }

    /// Soft-remove a project.
    ///
    /// # Errors
    ///
    /// `not_found` for an unknown project, `conflict` when already
    /// archived.
    pub fn archive_project(&self, slug: &str) -> Result<(), EngineError> {
        let brain = self.active_slug()?;
        let slug = normalize_slug(slug)?;
        self.mutate_brain(&brain, |doc| {
            let project = doc.project_mut(&slug)?;
            if project.status == ProjectStatus::Archived {
                return Err(EngineError::conflict(format!(
                    "project '{slug}' is already archived"
                )));
            }
            project.status = ProjectStatus::Archived;
            project.archived_at = Some(Utc::now());
            project.updated_at = Utc::now();
            Ok(())
        })
    }

    /// Delete a project. Without `purge_commits` the project becomes a
    /// `deleted` tombstone and the commit index stays resolvable; with
    /// it, the project and every commit-index entry pointing into it are
    /// erased.
    ///
    /// # Errors
    ///
    /// `not_found` for an unknown project.
    pub fn delete_project(&self, slug: &str, purge_commits: bool) -> Result<(), EngineError> {
        let brain = self.active_slug()?;
        let slug = normalize_slug(slug)?;
        self.mutate_brain(&brain, |doc| {
            if !doc.projects.contains_key(&slug) {
                return Err(EngineError::not_found(format!("project '{slug}' not found")));
            }
            if purge_commits {
                doc.projects.remove(&slug);
                doc.commit_index.retain(|_, ptr| ptr.project != slug);
            } else {
                let project = doc.project_mut(&slug)?;
                project.status = ProjectStatus::Deleted;
                project.updated_at = Utc::now();
            }
            Ok(())
        })
    }

    /// Summary of one project: status, counts, entity listing.
    ///
    /// # Errors
    ///
    /// `not_found` for an unknown project.
    pub fn project_report(&self, slug: &str) -> Result<Value, EngineError> {
        let brain = self.active_slug()?;
        let slug = normalize_slug(slug)?;
        self.with_brain(&brain, |doc| {
            let project = doc.project(&slug)?;
            let entities: Vec<Value> = project
                .entities
                .values()
                .map(|e| {
                    json!({
                        "slug": e.slug,
                        "status": e.status,
                        "active_version": e.active_version,
                        "versions": e.versions.len(),
                        "updated_at": e.updated_at,
                    })
                })
                .collect();
            Ok(json!({
                "slug": project.slug,
                "title": project.title,
                "description": project.description,
                "status": project.status,
                "created_at": project.created_at,
                "updated_at": project.updated_at,
                "archived_at": project.archived_at,
                "entity_count": entities.len(),
                "entities": entities,
            }))
        })
    }

    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------

    /// Entities of a project.
    ///
    /// # Errors
    ///
    /// `not_found` for an unknown project.
    pub fn list_entities(&self, project: &str) -> Result<Vec<Entity>, EngineError> {
        let brain = self.active_slug()?;
        let project = normalize_slug(project)?;
        self.with_brain(&brain, |doc| {
            Ok(doc.project(&project)?.entities.values().cloned().collect())
        })
    }

    /// One entity, optionally with its full version history.
    ///
    /// # Errors
    ///
    /// `not_found` for an unknown project or entity.
    pub fn entity_report(
        &self,
        project: &str,
        entity: &str,
        with_versions: bool,
    ) -> Result<Value, EngineError> {
        let brain = self.active_slug()?;
        let project = normalize_slug(project)?;
        let entity = normalize_slug(entity)?;
        self.with_brain(&brain, |doc| {
            let record = doc.project(&project)?.entity(&entity)?;
            let mut out = json!({
                "slug": record.slug,
                "parent": record.parent,
                "path_segments": record.path_segments,
                "status": record.status,
                "active_version": record.active_version,
                "created_at": record.created_at,
                "updated_at": record.updated_at,
                "version_count": record.versions.len(),
            });
            if with_versions {
                out["versions"] = json!(
                    record
                        .versions
                        .iter()
                        .map(|v| {
                            json!({
                                "version": v.version,
                                "status": v.status,
                                "commit": v.commit,
                                "committed_at": v.committed_at,
                            })
                        })
                        .collect::<Vec<_>>()
                );
            }
            Ok(out)
        })
    }

    /// Version headers of an entity (no payloads), oldest first.
    ///
    /// # Errors
    ///
    /// `not_found` for an unknown project or entity.
    pub fn list_entity_versions(
        &self,
        project: &str,
        entity: &str,
    ) -> Result<Vec<VersionRecord>, EngineError> {
        let brain = self.active_slug()?;
        let project = normalize_slug(project)?;
        let entity = normalize_slug(entity)?;
        self.with_brain(&brain, |doc| {
            Ok(doc.project(&project)?.entity(&entity)?.versions.clone())
        })
    }

    /// Resolve one version of an entity; `None` means the active one.
    ///
    /// # Errors
    ///
    /// `not_found` when project, entity, or version is unknown;
    /// `invalid_argument` for an ambiguous commit prefix.
    pub fn get_entity_version(
        &self,
        project: &str,
        entity: &str,
        reference: Option<&VersionRef>,
    ) -> Result<VersionRecord, EngineError> {
        let brain = self.active_slug()?;
        let project = normalize_slug(project)?;
        let entity = normalize_slug(entity)?;
        self.with_brain(&brain, |doc| {
            Ok(doc
                .project(&project)?
                .entity(&entity)?
                .resolve_version(reference)?
                .clone())
        })
    }

    /// Save a payload as a new version of `project.entity`.
    ///
    /// With `options.merge` the payload deep-merges onto the current
    /// active payload, the empty string deleting keys; otherwise it
    /// replaces it. When the post-merge canonical payload equals the
    /// current active payload, no version is appended and the existing
    /// one is returned with `changed = false`.
    ///
    /// # Errors
    ///
    /// `invalid_argument` for bad slugs or a non-object merge target,
    /// `not_found` for an unknown project, `conflict` when the project
    /// is archived.
    pub fn save_entity(
        &self,
        project: &str,
        entity: &str,
        payload: Value,
        meta: Option<Value>,
        options: &SaveOptions,
    ) -> Result<SaveOutcome, EngineError> {
        let brain = self.active_slug()?;
        let project = normalize_slug(project)?;
        let entity_slug = normalize_slug(entity)?;
        if !payload.is_object() && !payload.is_array() {
            return Err(EngineError::invalid_argument(
                "payload must be a JSON object or array",
            ));
        }

        self.mutate_brain(&brain, |doc| {
            let proj = doc.project_mut(&project)?;
            match proj.status {
                ProjectStatus::Archived => {
                    return Err(EngineError::conflict(format!(
                        "project '{project}' is archived"
                    )));
                }
                ProjectStatus::Deleted => {
                    return Err(EngineError::not_found(format!(
                        "project '{project}' not found"
                    )));
                }
                ProjectStatus::Active => {}
            }

            let created_entity = !proj.entities.contains_key(&entity_slug);
            if created_entity {
                let parent = entity_slug
                    .rsplit_once('.')
                    .map(|(prefix, _)| prefix.to_string())
                    .filter(|prefix| proj.entities.contains_key(prefix));
                proj.entities
                    .insert(entity_slug.clone(), Entity::new(&entity_slug, parent));
            }
            let record = proj
                .entities
                .get_mut(&entity_slug)
                .unwrap_or_else(|| unreachable!("inserted above"));

            // Merge against the active payload when asked and possible.
            let next_payload = match (options.merge, record.active()) {
                (true, Some(active)) => {
                    let mut merged = active.payload.clone();
                    deep_merge(&mut merged, &payload);
                    merged
                }
                _ => payload.clone(),
            };

            if let Some(active) = record.active() {
                if canonical_json(&next_payload) == canonical_json(&active.payload) {
                    return Ok(SaveOutcome {
                        project: project.clone(),
                        entity: entity_slug.clone(),
                        record: active.clone(),
                        changed: false,
                        created_entity,
                    });
                }
            }

            let mut version_meta = meta.clone().unwrap_or_else(|| json!({}));
            if let Some(fieldset) = &options.fieldset {
                version_meta["fieldset"] = json!({
                    "name": fieldset,
                    "hash": payload_hash(&json!(fieldset)),
                });
            }
            let version_meta =
                (version_meta != json!({})).then_some(version_meta);

            for old in &mut record.versions {
                if old.status == VersionStatus::Active {
                    old.status = VersionStatus::Inactive;
                }
            }
            let number = record.next_version_number();
            let new_version =
                VersionRecord::commit_payload(number, next_payload, version_meta);
            record.active_version = Some(new_version.version.clone());
            record.status = EntityStatus::Active;
            record.updated_at = Utc::now();
            record.versions.push(new_version.clone());

            doc.commit_index.insert(
                new_version.commit.clone(),
                CommitPointer {
                    project: project.clone(),
                    entity: entity_slug.clone(),
                    version: new_version.version.clone(),
                },
            );
            doc.project_mut(&project)?.updated_at = Utc::now();

            Ok(SaveOutcome {
                project: project.clone(),
                entity: entity_slug.clone(),
                record: new_version,
                changed: true,
                created_entity,
            })
        })
    }

    /// Archive an entity: its active version becomes `archived`, no
    /// version stays active.
    ///
    /// # Errors
    ///
    /// `not_found` for unknown project/entity, `conflict` when already
    /// archived.
    pub fn deactivate_entity(&self, project: &str, entity: &str) -> Result<(), EngineError> {
        let brain = self.active_slug()?;
        let project = normalize_slug(project)?;
        let entity = normalize_slug(entity)?;
        self.mutate_brain(&brain, |doc| {
            let record = doc.project_mut(&project)?.entity_mut(&entity)?;
            if record.status == EntityStatus::Archived {
                return Err(EngineError::conflict(format!(
                    "entity '{project}.{entity}' is already archived"
                )));
            }
            for version in &mut record.versions {
                if version.status == VersionStatus::Active {
                    version.status = VersionStatus::Archived;
                }
            }
            record.active_version = None;
            record.status = EntityStatus::Archived;
            record.updated_at = Utc::now();
            Ok(())
        })
    }

    /// Erase an entity and the commit-index entries pointing at it.
    ///
    /// Index entries cannot outlive the entity (a dangling pointer would
    /// break commit lookup), so the `purge` flag accepted for interface
    /// parity changes nothing here.
    ///
    /// # Errors
    ///
    /// `not_found` for unknown project/entity.
    pub fn delete_entity(
        &self,
        project: &str,
        entity: &str,
        _purge: bool,
    ) -> Result<(), EngineError> {
        let brain = self.active_slug()?;
        let project = normalize_slug(project)?;
        let entity = normalize_slug(entity)?;
        self.mutate_brain(&brain, |doc| {
            let proj = doc.project_mut(&project)?;
            if proj.entities.remove(&entity).is_none() {
                return Err(EngineError::not_found(format!(
                    "entity '{project}.{entity}' not found"
                )));
            }
            proj.updated_at = Utc::now();
            doc.commit_index
                .retain(|_, ptr| !(ptr.project == project && ptr.entity == entity));
            Ok(())
        })
    }

    /// Delete one version. When the active version is removed, the most
    /// recent remaining version becomes active; when none remain, the
    /// entity is archived.
    ///
    /// # Errors
    ///
    /// `not_found` when the version is unknown; `invalid_argument` for
    /// an ambiguous commit prefix.
    pub fn delete_entity_version(
        &self,
        project: &str,
        entity: &str,
        reference: &VersionRef,
    ) -> Result<(), EngineError> {
        let brain = self.active_slug()?;
        let project = normalize_slug(project)?;
        let entity = normalize_slug(entity)?;
        self.mutate_brain(&brain, |doc| {
            let record = doc.project_mut(&project)?.entity_mut(&entity)?;
            let target = record.resolve_version(Some(reference))?.clone();
            record.versions.retain(|v| v.version != target.version);

            let was_active = record.active_version.as_deref() == Some(target.version.as_str());
            if was_active {
                match record
                    .versions
                    .iter_mut()
                    .max_by_key(|v| v.version.parse::<u64>().unwrap_or(0))
                {
                    Some(next) => {
                        next.status = VersionStatus::Active;
                        record.active_version = Some(next.version.clone());
                    }
                    None => {
                        record.active_version = None;
                        record.status = EntityStatus::Archived;
                    }
                }
            }
            record.updated_at = Utc::now();

            // Drop the index entry only when it points at the removed
            // version; an identical payload saved elsewhere keeps its
            // pointer.
            let stale = doc.commit_index.get(&target.commit).is_some_and(|ptr| {
                ptr.project == project && ptr.entity == entity && ptr.version == target.version
            });
            if stale {
                doc.commit_index.remove(&target.commit);
            }
            Ok(())
        })
    }

    /// Promote an archived or superseded version by appending a new
    /// version that duplicates its payload; history stays append-only.
    /// Restoring a payload equal to the current active one changes
    /// nothing.
    ///
    /// # Errors
    ///
    /// `not_found` when the version is unknown.
    pub fn restore_entity_version(
        &self,
        project: &str,
        entity: &str,
        reference: &VersionRef,
    ) -> Result<SaveOutcome, EngineError> {
        let brain = self.active_slug()?;
        let project = normalize_slug(project)?;
        let entity_slug = normalize_slug(entity)?;
        self.mutate_brain(&brain, |doc| {
            let record = doc.project_mut(&project)?.entity_mut(&entity_slug)?;
            let source = record.resolve_version(Some(reference))?.clone();

            if let Some(active) = record.active() {
                if canonical_json(&active.payload) == canonical_json(&source.payload) {
                    return Ok(SaveOutcome {
                        project: project.clone(),
                        entity: entity_slug.clone(),
                        record: active.clone(),
                        changed: false,
                        created_entity: false,
                    });
                }
            }

            for old in &mut record.versions {
                if old.status == VersionStatus::Active {
                    old.status = VersionStatus::Inactive;
                }
            }
            let number = record.next_version_number();
            let meta = json!({"restored_from": source.version});
            let new_version =
                VersionRecord::commit_payload(number, source.payload.clone(), Some(meta));
            record.active_version = Some(new_version.version.clone());
            record.status = EntityStatus::Active;
            record.updated_at = Utc::now();
            record.versions.push(new_version.clone());

            doc.commit_index.insert(
                new_version.commit.clone(),
                CommitPointer {
                    project: project.clone(),
                    entity: entity_slug.clone(),
                    version: new_version.version.clone(),
                },
            );

            Ok(SaveOutcome {
                project: project.clone(),
                entity: entity_slug.clone(),
                record: new_version,
                changed: true,
                created_entity: false,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PathLocator, SYSTEM_BRAIN};
    use avn_core::EventBus;
    use std::sync::Arc;

    fn repo() -> (BrainRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let locator = PathLocator::new(dir.path().join("avn"), None, None, None);
        locator.ensure_layout().unwrap();
        let repo = BrainRepository::new(locator, Arc::new(EventBus::new()));
        repo.ensure_system_brain().unwrap();
        repo.ensure_active_brain("default").unwrap();
        (repo, dir)
    }

    fn save(
        repo: &BrainRepository,
        project: &str,
        entity: &str,
        payload: Value,
    ) -> SaveOutcome {
        repo.save_entity(project, entity, payload, None, &SaveOptions::default())
            .unwrap()
    }

    #[test]
    fn create_save_show_roundtrip() {
        let (repo, _dir) = repo();
        repo.create_project("storyverse", Some("Story Verse"), None)
            .unwrap();
        let outcome = save(
            &repo,
            "storyverse",
            "hero",
            json!({"name": "Aria", "role": "Pilot"}),
        );
        assert!(outcome.changed);
        assert!(outcome.created_entity);
        assert_eq!(outcome.record.version, "1");
        assert_eq!(
            outcome.record.commit,
            payload_hash(&json!({"name": "Aria", "role": "Pilot"}))
        );

        let shown = repo.get_entity_version("storyverse", "hero", None).unwrap();
        assert_eq!(shown.payload, json!({"name": "Aria", "role": "Pilot"}));
        assert_eq!(shown.version, "1");
    }

    #[test]
    fn merge_save_deletes_empty_string_keys() {
        let (repo, _dir) = repo();
        repo.create_project("storyverse", None, None).unwrap();
        save(&repo, "storyverse", "hero", json!({"name": "Aria", "role": "Pilot"}));
        let outcome = save(
            &repo,
            "storyverse",
            "hero",
            json!({"role": "Commander", "callsign": ""}),
        );
        assert_eq!(outcome.record.version, "2");
        assert_eq!(
            outcome.record.payload,
            json!({"name": "Aria", "role": "Commander"})
        );
    }

    #[test]
    fn replace_save_ignores_prior_payload() {
        let (repo, _dir) = repo();
        repo.create_project("p", None, None).unwrap();
        save(&repo, "p", "e", json!({"a": 1, "b": 2}));
        let outcome = repo
            .save_entity(
                "p",
                "e",
                json!({"c": 3}),
                None,
                &SaveOptions {
                    merge: false,
                    fieldset: None,
                },
            )
            .unwrap();
        assert_eq!(outcome.record.payload, json!({"c": 3}));
    }

    #[test]
    fn identical_payload_is_a_noop() {
        let (repo, _dir) = repo();
        repo.create_project("p", None, None).unwrap();
        save(&repo, "p", "e", json!({"a": 1}));
        let outcome = save(&repo, "p", "e", json!({"a": 1}));
        assert!(!outcome.changed);
        assert_eq!(outcome.record.version, "1");
        assert_eq!(repo.list_entity_versions("p", "e").unwrap().len(), 1);
    }

    #[test]
    fn versions_are_dense_and_single_active() {
        let (repo, _dir) = repo();
        repo.create_project("p", None, None).unwrap();
        for i in 1..=3 {
            save(&repo, "p", "e", json!({"v": i}));
        }
        let versions = repo.list_entity_versions("p", "e").unwrap();
        assert_eq!(
            versions.iter().map(|v| v.version.as_str()).collect::<Vec<_>>(),
            vec!["1", "2", "3"]
        );
        assert_eq!(
            versions
                .iter()
                .filter(|v| v.status == VersionStatus::Active)
                .count(),
            1
        );
        assert_eq!(versions.last().unwrap().status, VersionStatus::Active);
    }

    #[test]
    fn restore_appends_and_deactivates_others() {
        let (repo, _dir) = repo();
        repo.create_project("storyverse", None, None).unwrap();
        save(&repo, "storyverse", "hero", json!({"name": "Aria", "role": "Pilot"}));
        save(&repo, "storyverse", "hero", json!({"role": "Commander"}));

        let outcome = repo
            .restore_entity_version("storyverse", "hero", &VersionRef::Version(1))
            .unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.record.version, "3");
        assert_eq!(
            outcome.record.payload,
            json!({"name": "Aria", "role": "Pilot"})
        );

        let versions = repo.list_entity_versions("storyverse", "hero").unwrap();
        assert_eq!(versions[0].status, VersionStatus::Inactive);
        assert_eq!(versions[1].status, VersionStatus::Inactive);
        assert_eq!(versions[2].status, VersionStatus::Active);
    }

    #[test]
    fn restore_of_active_payload_is_noop() {
        let (repo, _dir) = repo();
        repo.create_project("p", None, None).unwrap();
        save(&repo, "p", "e", json!({"a": 1}));
        let outcome = repo
            .restore_entity_version("p", "e", &VersionRef::Version(1))
            .unwrap();
        assert!(!outcome.changed);
        assert_eq!(repo.list_entity_versions("p", "e").unwrap().len(), 1);
    }

    #[test]
    fn commit_lookup_resolves_by_hash() {
        let (repo, _dir) = repo();
        repo.create_project("p", None, None).unwrap();
        let saved = save(&repo, "p", "e", json!({"a": 1}));
        let commit = saved.record.commit.clone();

        let by_full = repo
            .get_entity_version("p", "e", Some(&VersionRef::Commit(commit.clone())))
            .unwrap();
        assert_eq!(by_full.payload, json!({"a": 1}));

        let by_prefix = repo
            .get_entity_version("p", "e", Some(&VersionRef::Commit(commit[..10].into())))
            .unwrap();
        assert_eq!(by_prefix.version, by_full.version);
    }

    #[test]
    fn delete_active_version_promotes_previous() {
        let (repo, _dir) = repo();
        repo.create_project("p", None, None).unwrap();
        save(&repo, "p", "e", json!({"v": 1}));
        save(&repo, "p", "e", json!({"v": 2}));
        repo.delete_entity_version("p", "e", &VersionRef::Version(2))
            .unwrap();

        let active = repo.get_entity_version("p", "e", None).unwrap();
        assert_eq!(active.version, "1");
        assert_eq!(active.payload, json!({"v": 1}));
    }

    #[test]
    fn deleting_last_version_archives_entity() {
        let (repo, _dir) = repo();
        repo.create_project("p", None, None).unwrap();
        save(&repo, "p", "e", json!({"v": 1}));
        repo.delete_entity_version("p", "e", &VersionRef::Version(1))
            .unwrap();

        let entities = repo.list_entities("p").unwrap();
        assert_eq!(entities[0].status, EntityStatus::Archived);
        assert!(entities[0].active_version.is_none());
        assert!(repo.get_entity_version("p", "e", None).is_err());
    }

    #[test]
    fn deleted_version_leaves_commit_index_clean() {
        let (repo, _dir) = repo();
        repo.create_project("p", None, None).unwrap();
        let saved = save(&repo, "p", "e", json!({"v": 1}));
        save(&repo, "p", "e", json!({"v": 2}));
        repo.delete_entity_version("p", "e", &VersionRef::Version(1))
            .unwrap();
        let brain = repo.active_brain_slug().unwrap();
        repo.with_brain(&brain, |doc| {
            assert!(!doc.commit_index.contains_key(&saved.record.commit));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn deactivate_archives_without_losing_history() {
        let (repo, _dir) = repo();
        repo.create_project("p", None, None).unwrap();
        save(&repo, "p", "e", json!({"v": 1}));
        repo.deactivate_entity("p", "e").unwrap();

        let versions = repo.list_entity_versions("p", "e").unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].status, VersionStatus::Archived);

        // A later save revives the entity with a fresh active version.
        let outcome = save(&repo, "p", "e", json!({"v": 2}));
        assert_eq!(outcome.record.version, "2");
        assert_eq!(
            repo.list_entities("p").unwrap()[0].status,
            EntityStatus::Active
        );
    }

    #[test]
    fn archived_project_rejects_saves() {
        let (repo, _dir) = repo();
        repo.create_project("p", None, None).unwrap();
        repo.archive_project("p").unwrap();
        let err = repo
            .save_entity("p", "e", json!({"a": 1}), None, &SaveOptions::default())
            .unwrap_err();
        assert_eq!(err.reason(), "conflict");
    }

    #[test]
    fn delete_project_tombstone_vs_purge() {
        let (repo, _dir) = repo();
        repo.create_project("p", None, None).unwrap();
        let saved = save(&repo, "p", "e", json!({"a": 1}));
        repo.delete_project("p", false).unwrap();
        assert!(repo.list_projects().unwrap().is_empty());
        let brain = repo.active_brain_slug().unwrap();
        repo.with_brain(&brain, |doc| {
            assert!(doc.commit_index.contains_key(&saved.record.commit));
            Ok(())
        })
        .unwrap();

        repo.delete_project("p", true).unwrap();
        repo.with_brain(&brain, |doc| {
            assert!(!doc.commit_index.contains_key(&saved.record.commit));
            assert!(!doc.projects.contains_key("p"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn fieldset_hash_recorded_in_meta() {
        let (repo, _dir) = repo();
        repo.create_project("p", None, None).unwrap();
        let outcome = repo
            .save_entity(
                "p",
                "e",
                json!({"a": 1}),
                None,
                &SaveOptions {
                    merge: true,
                    fieldset: Some("profile".into()),
                },
            )
            .unwrap();
        let meta = outcome.record.meta.unwrap();
        assert_eq!(meta["fieldset"]["name"], "profile");
        assert_eq!(meta["fieldset"]["hash"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn dotted_slug_links_to_existing_parent() {
        let (repo, _dir) = repo();
        repo.create_project("p", None, None).unwrap();
        save(&repo, "p", "chapter", json!({"t": "c"}));
        save(&repo, "p", "chapter.one", json!({"t": "c1"}));
        let entities = repo.list_entities("p").unwrap();
        let child = entities.iter().find(|e| e.slug == "chapter.one").unwrap();
        assert_eq!(child.parent.as_deref(), Some("chapter"));
        assert_eq!(child.path_segments, vec!["chapter", "one"]);
    }

    #[test]
    fn system_brain_untouched_by_entity_ops() {
        let (repo, _dir) = repo();
        repo.create_project("p", None, None).unwrap();
        save(&repo, "p", "e", json!({"a": 1}));
        repo.with_brain(SYSTEM_BRAIN, |doc| {
            assert!(doc.projects.is_empty());
            Ok(())
        })
        .unwrap();
    }
}
