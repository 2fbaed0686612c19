// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! avn-export
#![deny(unsafe_code)]

use avn_cache::Cache;
use avn_core::{EngineError, VersionRef, canonical_json, paths, sha256_hex};
use avn_query::{FilterDef, FilterEngine, ResolverContext, ResolverEngine};
use avn_store::BrainRepository;
use chrono::Utc;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Preset slug seeded for plain exports.
pub const DEFAULT_PRESET: &str = "default";
/// Preset slug seeded for reference-resolved context bundles.
pub const CONTEXT_PRESET: &str = "context-unified";
/// Layout slug of the built-in JSON layout.
pub const DEFAULT_LAYOUT: &str = "default-json";

/// One export invocation.
#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    /// Project selectors (manual mode) or `${project}` substitutions
    /// (preset mode).
    pub targets: Vec<String>,
    /// Entity selectors: `slug`, `slug@version`, `slug#commit`.
    pub selectors: Vec<String>,
    /// Preset slug; absent means manual mode.
    pub preset: Option<String>,
    /// Parameters for `${param.…}` substitution.
    pub params: BTreeMap<String, Value>,
    /// Free-form description echoed into the bundle.
    pub description: Option<String>,
    /// Free-form usage note echoed into the bundle.
    pub usage: Option<String>,
    /// Directory to write the bundle into, when saving is wanted.
    pub out_dir: Option<PathBuf>,
}

/// A rendered bundle plus metadata.
#[derive(Debug, Clone)]
pub struct ExportBundle {
    /// The layout-rendered bundle.
    pub rendered: Value,
    /// Where the bundle was written, if it was.
    pub path: Option<PathBuf>,
    /// Whether the bundle came from the cache.
    pub cached: bool,
}

/// Composes, transforms, resolves, and renders export bundles.
pub struct ExportEngine {
    repo: Arc<BrainRepository>,
    resolver: Arc<ResolverEngine>,
    cache: Arc<Cache>,
    save_exports: bool,
}

impl ExportEngine {
    /// Build an engine over the repository, resolver, and cache.
    #[must_use]
    pub fn new(
        repo: Arc<BrainRepository>,
        resolver: Arc<ResolverEngine>,
        cache: Arc<Cache>,
        save_exports: bool,
    ) -> Self {
        Self {
            repo,
            resolver,
            cache,
            save_exports,
        }
    }

    /// Run one export.
    ///
    /// # Errors
    ///
    /// `invalid_argument` for unusable selectors or missing preset
    /// params, `not_found` for unknown presets/projects, `storage` on
    /// write failures.
    pub fn run(&self, request: &ExportRequest) -> Result<ExportBundle, EngineError> {
        let started = Instant::now();
        let preset = match &request.preset {
            Some(slug) => self.repo.get_preset(slug)?,
            None => json!({}),
        };
        let mode = if request.preset.is_some() {
            "preset"
        } else {
            "manual"
        };

        let cache_policy = preset
            .get("policies")
            .and_then(|p| p.get("cache"))
            .cloned()
            .unwrap_or_else(|| json!({"enabled": false}));
        let cache_enabled = cache_policy["enabled"].as_bool().unwrap_or(false);
        let cache_key = cache_enabled.then(|| self.cache_key(request));
        if let Some(key) = &cache_key {
            if let Some(hit) = self.cache.get(key) {
                debug!(key = %key, "export served from cache");
                return Ok(ExportBundle {
                    rendered: hit,
                    path: None,
                    cached: true,
                });
            }
        }

        let projects = self.resolve_projects(&preset, request, mode)?;
        if mode == "manual" && projects.len() > 1 && !request.selectors.is_empty() {
            return Err(EngineError::invalid_argument(
                "entity selectors need a single project target",
            ));
        }

        let references = preset
            .get("policies")
            .and_then(|p| p.get("references"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let entity_filters = filter_defs(&preset, "entities")?;
        let payload_filters = filter_defs(&preset, "payload_filters")?;

        let mut entities = Vec::new();
        let mut index_projects = Vec::new();
        let mut version_count = 0usize;
        for project in &projects {
            let all = self.repo.list_entities(project)?;
            let mut selected = FilterEngine::select(&all, &entity_filters).slugs;
            if !payload_filters.is_empty() {
                let keep = FilterEngine::select(&all, &payload_filters).slugs;
                selected.retain(|slug| keep.contains(slug));
            }

            let chosen = self.apply_selectors(&selected, &request.selectors)?;
            let mut project_index = Vec::new();
            for (slug, reference) in chosen {
                let Ok(record) = self.repo.get_entity_version(project, &slug, reference.as_ref())
                else {
                    // No resolvable version (archived entity, missing ref).
                    continue;
                };
                let mut payload = record.payload.clone();
                apply_transforms(&mut payload, &preset);
                if references {
                    let ctx = ResolverContext {
                        project: project.clone(),
                        entity: slug.clone(),
                        version: record.version.clone(),
                        path_segments: slug.split('.').map(str::to_string).collect(),
                        params: request.params.clone(),
                    };
                    payload = self.resolver.resolve_payload(&payload, &ctx);
                }
                version_count += 1;
                project_index.push(slug.clone());
                entities.push(json!({
                    "project": project,
                    "slug": slug,
                    "uid": format!("{project}.{slug}"),
                    "version": record.version,
                    "payload_versions": [{
                        "version": record.version,
                        "commit": record.commit,
                        "hash": record.hash,
                        "committed_at": record.committed_at,
                        "payload": payload,
                    }],
                }));
            }
            index_projects.push(json!({"project": project, "entities": project_index}));
        }

        let scope = match (request.selectors.is_empty(), projects.len()) {
            (false, _) => "project_slice",
            (true, 1) => "project",
            _ => "brain",
        };
        let brain = self.repo.active_brain_slug()?;
        let stats = json!({
            "projects": projects.len(),
            "entities": entities.len(),
            "versions": version_count,
            "duration_ms": started.elapsed().as_millis() as u64,
        });
        let policies = json!({
            "references": references,
            "cache": cache_policy,
        });
        let action = json!({
            "mode": mode,
            "preset": request.preset,
            "targets": request.targets,
            "selectors": request.selectors,
            "description": request.description,
            "usage": request.usage,
        });

        let entities = self.apply_entity_template(&preset, entities);
        let mut data = Map::new();
        data.insert("generated_at".into(), json!(Utc::now().to_rfc3339()));
        data.insert("brain".into(), json!(brain));
        data.insert("scope".into(), json!(scope));
        data.insert("action".into(), action);
        data.insert("stats".into(), stats);
        data.insert("policies".into(), policies);
        data.insert("index".into(), json!({"projects": index_projects}));
        data.insert("entities".into(), Value::Array(entities));
        data.insert(
            "description".into(),
            json!(request.description.clone().unwrap_or_default()),
        );
        data.insert("usage".into(), json!(request.usage.clone().unwrap_or_default()));

        let layout = self.load_layout(&preset);
        let rendered = render_layout(&layout, &data);

        if let Some(key) = &cache_key {
            let ttl = cache_policy["ttl"].as_u64().unwrap_or(300);
            self.cache
                .put(key, rendered.clone(), Some(Duration::from_secs(ttl)), &["export"])?;
        }

        let path = match (&request.out_dir, self.save_exports) {
            (Some(dir), true) => Some(self.write_bundle(dir, &brain, &rendered)?),
            _ => None,
        };
        info!(
            mode,
            preset = request.preset.as_deref().unwrap_or("-"),
            projects = projects.len(),
            entities = version_count,
            "export complete"
        );
        Ok(ExportBundle {
            rendered,
            path,
            cached: false,
        })
    }

    fn cache_key(&self, request: &ExportRequest) -> String {
        let fingerprint = json!({
            "targets": request.targets,
            "selectors": request.selectors,
            "preset": request.preset,
            "params": request.params,
        });
        format!("export.{}", sha256_hex(canonical_json(&fingerprint).as_bytes()))
    }

    fn resolve_projects(
        &self,
        preset: &Value,
        request: &ExportRequest,
        mode: &str,
    ) -> Result<Vec<String>, EngineError> {
        let known: Vec<String> = self
            .repo
            .list_projects()?
            .into_iter()
            .map(|p| p.slug)
            .collect();

        if mode == "manual" {
            if request.targets.is_empty() {
                return Err(EngineError::invalid_argument(
                    "export needs at least one project target",
                ));
            }
            if request.targets.iter().any(|t| t == "*") {
                return Ok(known);
            }
            for target in &request.targets {
                if !known.contains(target) {
                    return Err(EngineError::not_found(format!(
                        "project '{target}' not found"
                    )));
                }
            }
            return Ok(request.targets.clone());
        }

        let selectors = preset
            .get("selection")
            .and_then(|s| s.get("projects"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_else(|| vec!["*".to_string()]);

        let mut resolved = Vec::new();
        for selector in &selectors {
            if selector == "*" {
                for slug in &known {
                    if !resolved.contains(slug) {
                        resolved.push(slug.clone());
                    }
                }
            } else if selector == "${project}" {
                if request.targets.is_empty() {
                    return Err(EngineError::invalid_argument(
                        "preset expects a project target for ${project}",
                    ));
                }
                for target in &request.targets {
                    if !resolved.contains(target) {
                        resolved.push(target.clone());
                    }
                }
            } else if let Some(param) = selector
                .strip_prefix("${param.")
                .and_then(|s| s.strip_suffix('}'))
            {
                let Some(value) = request.params.get(param) else {
                    return Err(EngineError::invalid_argument(format!(
                        "preset requires parameter '{param}'"
                    )));
                };
                let csv = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                for slug in csv.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    if !resolved.contains(&slug.to_string()) {
                        resolved.push(slug.to_string());
                    }
                }
            } else if !resolved.contains(selector) {
                resolved.push(selector.clone());
            }
        }

        for slug in &resolved {
            if !known.contains(slug) {
                return Err(EngineError::not_found(format!("project '{slug}' not found")));
            }
        }
        Ok(resolved)
    }

    fn apply_selectors(
        &self,
        selected: &[String],
        selectors: &[String],
    ) -> Result<Vec<(String, Option<VersionRef>)>, EngineError> {
        if selectors.is_empty() {
            return Ok(selected.iter().map(|s| (s.clone(), None)).collect());
        }
        let mut chosen = Vec::new();
        for selector in selectors {
            let (slug, reference) = split_selector(selector)?;
            if selected.contains(&slug) {
                chosen.push((slug, reference));
            }
        }
        Ok(chosen)
    }

    fn load_layout(&self, preset: &Value) -> Value {
        let slug = preset
            .get("templates")
            .and_then(|t| t.get("layout"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_LAYOUT);
        match self.repo.get_layout(slug) {
            Ok(layout) => layout,
            Err(err) => {
                debug!(layout = slug, error = %err, "layout missing, using built-in");
                builtin_layout()
            }
        }
    }

    fn apply_entity_template(&self, preset: &Value, entities: Vec<Value>) -> Vec<Value> {
        let Some(template) = preset
            .get("templates")
            .and_then(|t| t.get("entity_template"))
            .filter(|t| !t.is_null())
        else {
            return entities;
        };
        entities
            .iter()
            .map(|entity| substitute_entity(template, entity))
            .collect()
    }

    fn write_bundle(
        &self,
        dir: &PathBuf,
        brain: &str,
        rendered: &Value,
    ) -> Result<PathBuf, EngineError> {
        let dir = if dir.as_os_str().is_empty() {
            self.repo.locator().exports_dir().to_path_buf()
        } else {
            dir.clone()
        };
        std::fs::create_dir_all(&dir).map_err(|e| EngineError::io("ensure exports dir", &e))?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let path = dir.join(format!("{brain}-export-{stamp}.json"));
        let pretty = serde_json::to_vec_pretty(rendered)
            .map_err(|e| EngineError::internal(e.to_string()))?;
        std::fs::write(&path, pretty).map_err(|e| EngineError::io("write export", &e))?;
        Ok(path)
    }
}

/// Seed the `default` and `context-unified` presets plus the built-in
/// layout, without overwriting operator customizations.
///
/// # Errors
///
/// `storage` on write failure.
pub fn seed_presets(repo: &BrainRepository) -> Result<(), EngineError> {
    if repo.get_layout(DEFAULT_LAYOUT).is_err() {
        repo.put_layout(DEFAULT_LAYOUT, builtin_layout())?;
    }
    if repo.get_preset(DEFAULT_PRESET).is_err() {
        repo.put_preset(
            DEFAULT_PRESET,
            json!({
                "meta": {
                    "slug": DEFAULT_PRESET,
                    "title": "Default export",
                    "description": "Raw payloads of the targeted projects.",
                },
                "selection": {"projects": ["${project}"], "entities": []},
                "transform": {"whitelist": [], "blacklist": []},
                "policies": {"references": false, "cache": {"enabled": false}},
                "templates": {"layout": DEFAULT_LAYOUT, "entity_template": null},
            }),
        )?;
    }
    if repo.get_preset(CONTEXT_PRESET).is_err() {
        repo.put_preset(
            CONTEXT_PRESET,
            json!({
                "meta": {
                    "slug": CONTEXT_PRESET,
                    "title": "Unified context",
                    "description": "Reference-resolved context bundle across targeted projects.",
                },
                "selection": {"projects": ["${project}"], "entities": []},
                "transform": {"whitelist": [], "blacklist": []},
                "policies": {"references": true, "cache": {"enabled": false}},
                "templates": {"layout": DEFAULT_LAYOUT, "entity_template": null},
            }),
        )?;
    }
    Ok(())
}

fn builtin_layout() -> Value {
    json!({
        "format": "aaviondb.export.v1",
        "generated_at": "${generated_at}",
        "brain": "${brain}",
        "scope": "${scope}",
        "action": "${action}",
        "stats": "${stats}",
        "policies": "${policies}",
        "index": "${index}",
        "entities": "${entities}",
    })
}

fn filter_defs(preset: &Value, key: &str) -> Result<Vec<FilterDef>, EngineError> {
    match preset.get("selection").and_then(|s| s.get(key)) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            EngineError::invalid_argument(format!("preset selection.{key} is malformed: {e}"))
        }),
    }
}

fn apply_transforms(payload: &mut Value, preset: &Value) {
    let transform = preset.get("transform").cloned().unwrap_or(Value::Null);
    let whitelist: Vec<String> = string_list(transform.get("whitelist"));
    let blacklist: Vec<String> = string_list(transform.get("blacklist"));
    if !whitelist.is_empty() {
        *payload = paths::project(payload, &whitelist);
    }
    if !blacklist.is_empty() {
        paths::discard(payload, &blacklist);
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn split_selector(selector: &str) -> Result<(String, Option<VersionRef>), EngineError> {
    if let Some(index) = selector[1..].find(['@', '#']).map(|i| i + 1) {
        let reference = VersionRef::parse(&selector[index..])?;
        Ok((selector[..index].to_ascii_lowercase(), Some(reference)))
    } else {
        Ok((selector.to_ascii_lowercase(), None))
    }
}

/// Substitute `${placeholders}` of the prepared data map through a
/// layout. A string that is exactly one placeholder takes the raw JSON
/// value; mixed strings interpolate stringified values.
fn render_layout(layout: &Value, data: &Map<String, Value>) -> Value {
    match layout {
        Value::String(text) => {
            if let Some(key) = text
                .strip_prefix("${")
                .and_then(|s| s.strip_suffix('}'))
            {
                if let Some(value) = lookup(data, key) {
                    return value;
                }
            }
            Value::String(interpolate(text, data))
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| render_layout(item, data)).collect())
        }
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), render_layout(value, data));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn lookup(data: &Map<String, Value>, key: &str) -> Option<Value> {
    match key.split_once('.') {
        Some((head, rest)) => paths::get(data.get(head)?, rest).cloned(),
        None => data.get(key).cloned(),
    }
}

fn interpolate(text: &str, data: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let Some(end) = rest[start..].find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = &rest[start + 2..start + end];
        match lookup(data, key) {
            Some(Value::String(s)) => out.push_str(&s),
            Some(value) => out.push_str(&value.to_string()),
            None => out.push_str(&rest[start..start + end + 1]),
        }
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);
    out
}

fn substitute_entity(template: &Value, entity: &Value) -> Value {
    match template {
        Value::String(text) => {
            if let Some(path) = text
                .strip_prefix("${entity.")
                .and_then(|s| s.strip_suffix('}'))
            {
                if let Some(value) = paths::get(entity, path) {
                    return value.clone();
                }
            }
            if text == "${entity}" {
                return entity.clone();
            }
            let mut out = String::with_capacity(text.len());
            let mut rest = text.as_str();
            while let Some(start) = rest.find("${entity") {
                out.push_str(&rest[..start]);
                let Some(end) = rest[start..].find('}') else {
                    out.push_str(&rest[start..]);
                    return Value::String(out);
                };
                let key = &rest[start + 2..start + end];
                let replacement = if key == "entity" {
                    Some(entity.clone())
                } else {
                    key.strip_prefix("entity.")
                        .and_then(|path| paths::get(entity, path).cloned())
                };
                match replacement {
                    Some(Value::String(s)) => out.push_str(&s),
                    Some(value) => out.push_str(&value.to_string()),
                    None => out.push_str(&rest[start..start + end + 1]),
                }
                rest = &rest[start + end + 1..];
            }
            out.push_str(rest);
            Value::String(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_entity(item, entity))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), substitute_entity(value, entity));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}
