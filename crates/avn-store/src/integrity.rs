// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integrity verification and reports.
//!
//! Checks the stored invariants of a brain document: hash/commit
//! equality against the canonical payload, single-active-version per
//! entity, dense version numbering, and commit-index resolvability.

use crate::repository::{BrainRepository, SYSTEM_BRAIN};
use avn_core::{BrainDocument, EngineError, VersionStatus, normalize_slug, payload_hash};
use serde::Serialize;
use serde_json::{Value, json};

/// One violated invariant.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityIssue {
    /// Where the issue was found (`project.entity@version`, or a
    /// commit-index key).
    pub location: String,
    /// What is wrong.
    pub detail: String,
}

/// Result of an integrity pass over one brain.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    /// The brain that was checked.
    pub brain: String,
    /// Projects visited.
    pub projects: usize,
    /// Entities visited.
    pub entities: usize,
    /// Versions visited.
    pub versions: usize,
    /// Commit-index entries visited.
    pub commit_entries: usize,
    /// Violations found; empty means the brain is sound.
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    /// `true` when no invariant is violated.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

fn check_document(slug: &str, doc: &BrainDocument) -> IntegrityReport {
    let mut report = IntegrityReport {
        brain: slug.to_string(),
        projects: 0,
        entities: 0,
        versions: 0,
        commit_entries: 0,
        issues: Vec::new(),
    };

    for (project_slug, project) in &doc.projects {
        report.projects += 1;
        for (entity_slug, entity) in &project.entities {
            report.entities += 1;
            let mut active_count = 0;
            let mut last_number = 0u64;
            for version in &entity.versions {
                report.versions += 1;
                let location = format!("{project_slug}.{entity_slug}@{}", version.version);
                if version.hash != version.commit {
                    report.issues.push(IntegrityIssue {
                        location: location.clone(),
                        detail: "hash and commit differ".into(),
                    });
                }
                let actual = payload_hash(&version.payload);
                if actual != version.commit {
                    report.issues.push(IntegrityIssue {
                        location: location.clone(),
                        detail: format!(
                            "payload hash {actual} does not match commit {}",
                            version.commit
                        ),
                    });
                }
                if version.status == VersionStatus::Active {
                    active_count += 1;
                }
                match version.version.parse::<u64>() {
                    Ok(number) if number > last_number => last_number = number,
                    Ok(number) => report.issues.push(IntegrityIssue {
                        location: location.clone(),
                        detail: format!("version number {number} is not increasing"),
                    }),
                    Err(_) => report.issues.push(IntegrityIssue {
                        location: location.clone(),
                        detail: "version number is not numeric".into(),
                    }),
                }
            }
            if active_count > 1 {
                report.issues.push(IntegrityIssue {
                    location: format!("{project_slug}.{entity_slug}"),
                    detail: format!("{active_count} versions are active"),
                });
            }
            match &entity.active_version {
                Some(number) => {
                    let matches = entity
                        .versions
                        .iter()
                        .any(|v| &v.version == number && v.status == VersionStatus::Active);
                    if !matches {
                        report.issues.push(IntegrityIssue {
                            location: format!("{project_slug}.{entity_slug}"),
                            detail: format!(
                                "active_version {number} does not point at an active version"
                            ),
                        });
                    }
                }
                None if active_count > 0 => report.issues.push(IntegrityIssue {
                    location: format!("{project_slug}.{entity_slug}"),
                    detail: "an active version exists but active_version is unset".into(),
                }),
                None => {}
            }
        }
    }

    for (hash, pointer) in &doc.commit_index {
        report.commit_entries += 1;
        let resolved = doc
            .projects
            .get(&pointer.project)
            .and_then(|p| p.entities.get(&pointer.entity))
            .and_then(|e| e.versions.iter().find(|v| v.version == pointer.version));
        match resolved {
            Some(version) if &version.hash == hash => {}
            Some(version) => report.issues.push(IntegrityIssue {
                location: format!("commit_index[{hash}]"),
                detail: format!("points at version with hash {}", version.hash),
            }),
            None => report.issues.push(IntegrityIssue {
                location: format!("commit_index[{hash}]"),
                detail: format!(
                    "dangling pointer to {}.{}@{}",
                    pointer.project, pointer.entity, pointer.version
                ),
            }),
        }
    }

    report
}

impl BrainRepository {
    /// Run the invariant checks over one brain.
    ///
    /// # Errors
    ///
    /// `not_found` for an unknown brain.
    pub fn integrity_report(&self, slug: &str) -> Result<IntegrityReport, EngineError> {
        let slug = normalize_slug(slug)?;
        self.with_brain(&slug, |doc| Ok(check_document(&slug, doc)))
    }

    /// Summary of a brain (or the active one when `slug` is `None`).
    ///
    /// # Errors
    ///
    /// `not_found` for an unknown brain.
    pub fn brain_report(&self, slug: Option<&str>) -> Result<Value, EngineError> {
        let slug = match slug {
            Some(s) => normalize_slug(s)?,
            None => self.active_brain_slug()?,
        };
        let active = self.active_brain_slug().ok();
        self.with_brain(&slug, |doc| {
            let entity_count: usize = doc.projects.values().map(|p| p.entities.len()).sum();
            let version_count: usize = doc
                .projects
                .values()
                .flat_map(|p| p.entities.values())
                .map(|e| e.versions.len())
                .sum();
            Ok(json!({
                "slug": doc.meta.slug,
                "uuid": doc.meta.uuid,
                "created_at": doc.meta.created_at,
                "schema_version": doc.meta.schema_version,
                "is_system": slug == SYSTEM_BRAIN,
                "is_active": active.as_deref() == Some(slug.as_str()),
                "projects": doc.projects.len(),
                "entities": entity_count,
                "versions": version_count,
                "commit_entries": doc.commit_index.len(),
                "config_keys": doc.config.len(),
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PathLocator, SaveOptions};
    use avn_core::EventBus;
    use serde_json::json;
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

    #[test]
    fn healthy_brain_reports_clean() {
        let (repo, _dir) = repo();
        repo.create_project("p", None, None).unwrap();
        for i in 0..3 {
            repo.save_entity("p", "e", json!({"v": i}), None, &SaveOptions::default())
                .unwrap();
        }
        let report = repo.integrity_report("default").unwrap();
        assert!(report.is_ok(), "issues: {:?}", report.issues);
        assert_eq!(report.versions, 3);
        assert_eq!(report.commit_entries, 3);
    }

    #[test]
    fn corrupted_payload_is_detected() {
        let (repo, _dir) = repo();
        repo.create_project("p", None, None).unwrap();
        repo.save_entity("p", "e", json!({"v": 1}), None, &SaveOptions::default())
            .unwrap();
        // Tamper behind the hash's back.
        repo.mutate_brain("default", |doc| {
            let entity = doc.project_mut("p")?.entity_mut("e")?;
            entity.versions[0].payload = json!({"v": "tampered"});
            Ok(())
        })
        .unwrap();
        let report = repo.integrity_report("default").unwrap();
        assert!(!report.is_ok());
        assert!(report.issues[0].detail.contains("does not match commit"));
    }

    #[test]
    fn dangling_commit_pointer_is_detected() {
        let (repo, _dir) = repo();
        repo.mutate_brain("default", |doc| {
            doc.commit_index.insert(
                "deadbeef".into(),
                avn_core::CommitPointer {
                    project: "ghost".into(),
                    entity: "none".into(),
                    version: "1".into(),
                },
            );
            Ok(())
        })
        .unwrap();
        let report = repo.integrity_report("default").unwrap();
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].detail.contains("dangling"));
    }

    #[test]
    fn double_active_is_detected() {
        let (repo, _dir) = repo();
        repo.create_project("p", None, None).unwrap();
        repo.save_entity("p", "e", json!({"v": 1}), None, &SaveOptions::default())
            .unwrap();
        repo.save_entity("p", "e", json!({"v": 2}), None, &SaveOptions::default())
            .unwrap();
        repo.mutate_brain("default", |doc| {
            let entity = doc.project_mut("p")?.entity_mut("e")?;
            entity.versions[0].status = VersionStatus::Active;
            Ok(())
        })
        .unwrap();
        let report = repo.integrity_report("default").unwrap();
        assert!(report.issues.iter().any(|i| i.detail.contains("active")));
    }

    #[test]
    fn brain_report_counts() {
        let (repo, _dir) = repo();
        repo.create_project("p", None, None).unwrap();
        repo.save_entity("p", "e", json!({"v": 1}), None, &SaveOptions::default())
            .unwrap();
        let report = repo.brain_report(None).unwrap();
        assert_eq!(report["slug"], "default");
        assert_eq!(report["projects"], 1);
        assert_eq!(report["entities"], 1);
        assert_eq!(report["versions"], 1);
        assert_eq!(report["is_active"], true);
        assert_eq!(report["is_system"], false);
    }
}
