// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shortcode expansion and stripping.
//!
//! Payload strings may embed two shortcodes:
//!
//! - `[ref @project.entity[@v|#hash] path | option=value …]` pulls a
//!   field (or the whole payload) from another entity.
//! - `[query project=… | where=… | select=… | sort=… | limit=… |
//!   offset=… | format=… | template=… | separator=…]` scans, filters,
//!   sorts, slices, and renders entities.
//!
//! Resolution replaces a marker `[inner]` with
//! `[resolved inner]output[/resolved]`, keeping `inner` verbatim so
//! [`strip_string`] can restore the original marker byte-for-byte:
//! `strip(resolve(p)) == strip(p)`.
//!
//! A visit stack of `(uid, path)` pairs detects cycles (`<cycle>`), a
//! depth bound (default 6) leaves too-deep shortcodes intact, and any
//! per-shortcode failure renders `<unresolved: message>` without
//! failing the surrounding operation. The memo and stack are scoped to
//! one top-level call, never shared across requests.

use crate::conditions::{parse_conditions, stringify};
use avn_core::{EngineError, VersionRecord, VersionRef, paths};
use avn_store::BrainRepository;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const RESOLVED_OPEN: &str = "[resolved ";
const RESOLVED_CLOSE: &str = "[/resolved]";

/// Default recursion depth bound.
pub const DEFAULT_MAX_DEPTH: usize = 6;

/// Identity of the payload being resolved plus its call parameters.
#[derive(Debug, Clone)]
pub struct ResolverContext {
    /// Project of the calling entity.
    pub project: String,
    /// Slug of the calling entity.
    pub entity: String,
    /// Version of the calling payload.
    pub version: String,
    /// Path segments of the calling entity (relative URL base).
    pub path_segments: Vec<String>,
    /// Caller-supplied parameters (`${param.<name>}`).
    pub params: BTreeMap<String, Value>,
}

impl ResolverContext {
    /// Context for `project.entity` at `version` with no parameters.
    #[must_use]
    pub fn new(project: impl Into<String>, entity: impl Into<String>, version: impl Into<String>) -> Self {
        let entity = entity.into();
        Self {
            project: project.into(),
            path_segments: entity.split('.').map(str::to_string).collect(),
            entity,
            version: version.into(),
            params: BTreeMap::new(),
        }
    }

    fn uid(&self) -> String {
        format!("{}.{}", self.project, self.entity)
    }
}

struct ResolveState {
    stack: Vec<(String, String)>,
    memo: BTreeMap<(String, String, String), VersionRecord>,
}

/// Expands `[ref …]` / `[query …]` shortcodes against the repository.
pub struct ResolverEngine {
    repo: Arc<BrainRepository>,
    max_depth: usize,
}

impl ResolverEngine {
    /// Build a resolver with the default depth bound.
    #[must_use]
    pub fn new(repo: Arc<BrainRepository>) -> Self {
        Self {
            repo,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Override the depth bound (`resolver.max_depth` config).
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// Resolve every string field of `payload`.
    #[must_use]
    pub fn resolve_payload(&self, payload: &Value, ctx: &ResolverContext) -> Value {
        let mut state = ResolveState {
            stack: vec![(ctx.uid(), String::new())],
            memo: BTreeMap::new(),
        };
        self.resolve_value(payload, ctx, &mut state, 0)
    }

    /// Resolve one string.
    #[must_use]
    pub fn resolve_string(&self, input: &str, ctx: &ResolverContext) -> String {
        let mut state = ResolveState {
            stack: vec![(ctx.uid(), String::new())],
            memo: BTreeMap::new(),
        };
        self.resolve_text(input, ctx, &mut state, 0)
    }

    fn resolve_value(
        &self,
        value: &Value,
        ctx: &ResolverContext,
        state: &mut ResolveState,
        depth: usize,
    ) -> Value {
        match value {
            Value::String(s) => Value::String(self.resolve_text(s, ctx, state, depth)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.resolve_value(item, ctx, state, depth))
                    .collect(),
            ),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, item) in map {
                    out.insert(key.clone(), self.resolve_value(item, ctx, state, depth));
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    fn resolve_text(
        &self,
        input: &str,
        ctx: &ResolverContext,
        state: &mut ResolveState,
        depth: usize,
    ) -> String {
        let mut out = String::with_capacity(input.len());
        let mut cursor = 0;
        while let Some((start, end)) = next_shortcode(input, cursor) {
            out.push_str(&input[cursor..start]);
            let inner = &input[start + 1..end];
            if depth >= self.max_depth {
                // Too deep: the original shortcode stays untouched.
                out.push_str(&input[start..=end]);
            } else {
                let rendered = match self.resolve_shortcode(inner, ctx, state, depth) {
                    Ok(text) => text,
                    Err(err) => {
                        debug!(shortcode = inner, error = %err, "shortcode left unresolved");
                        format!("<unresolved: {}>", err.message())
                    }
                };
                out.push_str(RESOLVED_OPEN);
                out.push_str(inner);
                out.push(']');
                out.push_str(&rendered);
                out.push_str(RESOLVED_CLOSE);
            }
            cursor = end + 1;
        }
        out.push_str(&input[cursor..]);
        out
    }

    fn resolve_shortcode(
        &self,
        inner: &str,
        ctx: &ResolverContext,
        state: &mut ResolveState,
        depth: usize,
    ) -> Result<String, EngineError> {
        if let Some(rest) = inner.strip_prefix("ref ") {
            self.resolve_ref(rest, ctx, state, depth)
        } else if let Some(rest) = inner.strip_prefix("query ") {
            self.resolve_query(rest, ctx, state, depth)
        } else {
            Err(EngineError::invalid_argument(format!(
                "unknown shortcode '{inner}'"
            )))
        }
    }

    // -----------------------------------------------------------------------
    // [ref …]
    // -----------------------------------------------------------------------

    fn resolve_ref(
        &self,
        body: &str,
        ctx: &ResolverContext,
        state: &mut ResolveState,
        depth: usize,
    ) -> Result<String, EngineError> {
        let mut sections = body.split('|');
        let head = sections.next().unwrap_or_default().trim();
        let options = parse_options(sections);

        let head = substitute_placeholders(head, ctx, None, None);
        let mut head_tokens = head.split_whitespace();
        let target = head_tokens
            .next()
            .ok_or_else(|| EngineError::invalid_argument("ref needs a target"))?;
        let path = head_tokens.next().unwrap_or("").to_string();

        let (project, entity, reference) = parse_target(target, ctx)?;
        let uid = format!("{project}.{entity}");
        if state.stack.iter().any(|(u, p)| u == &uid && p == &path) {
            return Ok("<cycle>".to_string());
        }

        let record = self.fetch(&project, &entity, reference.as_ref(), state)?;
        let value = if path.is_empty() {
            record.payload.clone()
        } else {
            paths::get(&record.payload, &path)
                .cloned()
                .ok_or_else(|| {
                    EngineError::not_found(format!("path '{path}' not found in {uid}"))
                })?
        };

        // Resolve the target's own shortcodes in the target's context.
        let target_ctx = self.context_for(&project, &entity, &record);
        state.stack.push((uid, path));
        let value = self.resolve_value(&value, &target_ctx, state, depth + 1);
        state.stack.pop();

        if let Some(template) = options.get("template") {
            let rendered =
                substitute_placeholders(template, &target_ctx, Some(&value), Some(ctx));
            return Ok(rendered);
        }
        Ok(render_value(&value, &options))
    }

    // -----------------------------------------------------------------------
    // [query …]
    // -----------------------------------------------------------------------

    fn resolve_query(
        &self,
        body: &str,
        ctx: &ResolverContext,
        state: &mut ResolveState,
        depth: usize,
    ) -> Result<String, EngineError> {
        let options = parse_options(body.split('|'));
        let project_selector = options
            .get("project")
            .map(|p| substitute_placeholders(p, ctx, None, None))
            .ok_or_else(|| EngineError::invalid_argument("query needs project=…"))?;

        let all_projects = self.repo.list_projects()?;
        let selected: Vec<String> = if project_selector.trim() == "*" {
            all_projects.iter().map(|p| p.slug.clone()).collect()
        } else {
            project_selector
                .split(',')
                .map(|p| p.trim().to_ascii_lowercase())
                .filter(|p| !p.is_empty())
                .collect()
        };

        let conditions = match options.get("where") {
            Some(clause) => {
                parse_conditions(&substitute_placeholders(clause, ctx, None, None))?
            }
            None => Vec::new(),
        };

        let mut records: Vec<(String, String, VersionRecord)> = Vec::new();
        for project in &selected {
            for entity in self.repo.list_entities(project)? {
                let Some(active) = entity.active() else {
                    continue;
                };
                let keep = conditions
                    .iter()
                    .all(|c| c.matches(&active.payload, &entity.slug, project));
                if keep {
                    records.push((project.clone(), entity.slug.clone(), active.clone()));
                }
            }
        }

        if let Some(sort) = options.get("sort") {
            let (key, descending) = match sort.rsplit_once(':') {
                Some((key, "desc")) => (key.to_string(), true),
                Some((key, "asc")) => (key.to_string(), false),
                _ => (sort.clone(), false),
            };
            records.sort_by(|(_, slug_a, a), (_, slug_b, b)| {
                let left = sort_key(&a.payload, slug_a, &key);
                let right = sort_key(&b.payload, slug_b, &key);
                if descending {
                    right.partial_cmp(&left)
                } else {
                    left.partial_cmp(&right)
                }
                .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let offset = option_usize(&options, "offset").unwrap_or(0);
        let limit = option_usize(&options, "limit");
        let mut sliced: Vec<(String, String, VersionRecord)> =
            records.into_iter().skip(offset).collect();
        if let Some(limit) = limit {
            sliced.truncate(limit);
        }

        // Resolve nested shortcodes before projection and rendering.
        let select: Option<Vec<String>> = options.get("select").map(|s| {
            s.split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        });

        let mut rendered_items = Vec::new();
        let mut json_items = Vec::new();
        for (project, slug, record) in &sliced {
            let uid = format!("{project}.{slug}");
            if state.stack.iter().any(|(u, _)| u == &uid) {
                rendered_items.push("<cycle>".to_string());
                json_items.push(Value::String("<cycle>".into()));
                continue;
            }
            let record_ctx = self.context_for(project, slug, record);
            state.stack.push((uid, String::new()));
            let payload = self.resolve_value(&record.payload, &record_ctx, state, depth + 1);
            state.stack.pop();

            let payload = match &select {
                Some(select_paths) => paths::project(&payload, select_paths),
                None => payload,
            };

            if let Some(template) = options.get("template") {
                rendered_items.push(substitute_placeholders(
                    template,
                    &record_ctx,
                    Some(&payload),
                    Some(ctx),
                ));
            } else {
                rendered_items.push(stringify(&payload));
            }
            json_items.push(payload);
        }

        let separator = options
            .get("separator")
            .cloned()
            .unwrap_or_else(|| "\n".to_string());
        let format = options.get("format").map(String::as_str).unwrap_or("plain");
        match format {
            "json" | "raw" => Ok(Value::Array(json_items).to_string()),
            "markdown" => Ok(rendered_items
                .iter()
                .map(|item| format!("- {item}"))
                .collect::<Vec<_>>()
                .join("\n")),
            _ => Ok(rendered_items.join(&separator)),
        }
    }

    fn fetch(
        &self,
        project: &str,
        entity: &str,
        reference: Option<&VersionRef>,
        state: &mut ResolveState,
    ) -> Result<VersionRecord, EngineError> {
        let key = (
            project.to_string(),
            entity.to_string(),
            reference.map(ToString::to_string).unwrap_or_default(),
        );
        if let Some(record) = state.memo.get(&key) {
            return Ok(record.clone());
        }
        let record = self.repo.get_entity_version(project, entity, reference)?;
        state.memo.insert(key, record.clone());
        Ok(record)
    }

    fn context_for(&self, project: &str, entity: &str, record: &VersionRecord) -> ResolverContext {
        let segments = self
            .repo
            .list_entities(project)
            .ok()
            .and_then(|entities| {
                entities
                    .into_iter()
                    .find(|e| e.slug == entity)
                    .map(|e| e.path_segments)
            })
            .unwrap_or_else(|| entity.split('.').map(str::to_string).collect());
        ResolverContext {
            project: project.to_string(),
            entity: entity.to_string(),
            version: record.version.clone(),
            path_segments: segments,
            params: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stripping
// ---------------------------------------------------------------------------

/// Remove rendered output from every string field, restoring original
/// markers.
#[must_use]
pub fn strip_payload(payload: &Value) -> Value {
    match payload {
        Value::String(s) => Value::String(strip_string(s)),
        Value::Array(items) => Value::Array(items.iter().map(strip_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), strip_payload(item));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Replace every `[resolved inner]…[/resolved]` block with `[inner]`,
/// handling nested blocks by depth counting. Text without resolved
/// blocks passes through unchanged.
#[must_use]
pub fn strip_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0;
    while let Some(rel) = input[cursor..].find(RESOLVED_OPEN) {
        let open = cursor + rel;
        out.push_str(&input[cursor..open]);

        let header_start = open + RESOLVED_OPEN.len();
        let Some(header_rel) = input[header_start..].find(']') else {
            // Torn block: keep the rest verbatim.
            out.push_str(&input[open..]);
            return out;
        };
        let inner = &input[header_start..header_start + header_rel];
        let mut scan = header_start + header_rel + 1;
        let mut depth = 1;
        while depth > 0 {
            let next_open = input[scan..].find(RESOLVED_OPEN);
            let next_close = input[scan..].find(RESOLVED_CLOSE);
            match (next_open, next_close) {
                (Some(o), Some(c)) if o < c => {
                    depth += 1;
                    scan += o + RESOLVED_OPEN.len();
                }
                (_, Some(c)) => {
                    depth -= 1;
                    scan += c + RESOLVED_CLOSE.len();
                }
                (_, None) => {
                    // Unbalanced: keep the rest verbatim.
                    out.push_str(&input[open..]);
                    return out;
                }
            }
        }

        out.push('[');
        out.push_str(inner);
        out.push(']');
        cursor = scan;
    }
    out.push_str(&input[cursor..]);
    out
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Find the next `[ref ` / `[query ` span; returns byte offsets of `[`
/// and the matching `]`.
fn next_shortcode(input: &str, from: usize) -> Option<(usize, usize)> {
    let hay = &input[from..];
    let ref_pos = hay.find("[ref ");
    let query_pos = hay.find("[query ");
    let rel = match (ref_pos, query_pos) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    let start = from + rel;
    let end_rel = input[start..].find(']')?;
    Some((start, start + end_rel))
}

fn parse_options<'a>(sections: impl Iterator<Item = &'a str>) -> BTreeMap<String, String> {
    let mut options = BTreeMap::new();
    for section in sections {
        let section = section.trim();
        if section.is_empty() {
            continue;
        }
        if let Some((key, value)) = section.split_once('=') {
            options.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    options
}

fn option_usize(options: &BTreeMap<String, String>, key: &str) -> Option<usize> {
    options.get(key).and_then(|v| v.parse().ok())
}

/// Parse `@project.entity[@v|#hash]`; a bare `@entity` resolves inside
/// the calling project.
fn parse_target(
    target: &str,
    ctx: &ResolverContext,
) -> Result<(String, String, Option<VersionRef>), EngineError> {
    let body = target.strip_prefix('@').ok_or_else(|| {
        EngineError::invalid_argument(format!("ref target '{target}' must start with '@'"))
    })?;

    // A trailing @version or #hash reference.
    let (body, reference) = match body[1..]
        .find(['@', '#'])
        .map(|i| i + 1)
    {
        Some(index) => {
            let reference = VersionRef::parse(&body[index..])?;
            (&body[..index], Some(reference))
        }
        None => (body, None),
    };

    match body.split_once('.') {
        Some((project, entity)) if !project.is_empty() && !entity.is_empty() => Ok((
            project.to_ascii_lowercase(),
            entity.to_ascii_lowercase(),
            reference,
        )),
        _ => Ok((
            ctx.project.clone(),
            body.to_ascii_lowercase(),
            reference,
        )),
    }
}

fn render_value(value: &Value, options: &BTreeMap<String, String>) -> String {
    let separator = options
        .get("separator")
        .cloned()
        .unwrap_or_else(|| ", ".to_string());
    match options.get("format").map(String::as_str).unwrap_or("plain") {
        "json" | "raw" => value.to_string(),
        "markdown" => match value {
            Value::Array(items) => items
                .iter()
                .map(|item| format!("- {}", stringify(item)))
                .collect::<Vec<_>>()
                .join("\n"),
            other => stringify(other),
        },
        _ => match value {
            Value::Array(items) => items
                .iter()
                .map(stringify)
                .collect::<Vec<_>>()
                .join(&separator),
            other => stringify(other),
        },
    }
}

/// Substitute `${…}` placeholders and `{record.url*}` markers.
///
/// `ctx` supplies identity fields and `${payload.<path>}` roots;
/// `caller` (when distinct) supplies the base for relative URLs and the
/// `${param.<name>}` table.
fn substitute_placeholders(
    input: &str,
    ctx: &ResolverContext,
    payload: Option<&Value>,
    caller: Option<&ResolverContext>,
) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let Some(end) = rest[start..].find('}') else {
            out.push_str(&rest[start..]);
            return finish_record_urls(&out, ctx, caller);
        };
        let name = &rest[start + 2..start + end];
        let params = caller.map_or(&ctx.params, |c| &c.params);
        let replacement = match name {
            "project" => Some(ctx.project.clone()),
            "entity" => Some(ctx.entity.clone()),
            "uid" => Some(format!("{}.{}", ctx.project, ctx.entity)),
            "version" => Some(ctx.version.clone()),
            _ => {
                if let Some(param) = name.strip_prefix("param.") {
                    params.get(param).map(stringify)
                } else if let Some(path) = name.strip_prefix("payload.") {
                    payload.and_then(|p| paths::get(p, path)).map(stringify)
                } else {
                    None
                }
            }
        };
        match replacement {
            Some(text) => out.push_str(&text),
            // Unknown placeholders stay visible.
            None => out.push_str(&rest[start..start + end + 1]),
        }
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);
    finish_record_urls(&out, ctx, caller)
}

fn finish_record_urls(
    input: &str,
    ctx: &ResolverContext,
    caller: Option<&ResolverContext>,
) -> String {
    if !input.contains("{record.url") {
        return input.to_string();
    }
    let base = caller.map_or(&ctx.path_segments, |c| &c.path_segments);
    let absolute = format!("/{}", ctx.path_segments.join("/"));
    let relative = relative_url(base, &ctx.path_segments);
    input
        .replace("{record.url_relative}", &relative)
        .replace("{record.url_absolute}", &absolute)
        .replace("{record.url}", &relative)
}

/// Relative path from the caller's location to the target's.
fn relative_url(caller: &[String], target: &[String]) -> String {
    let caller_dir = &caller[..caller.len().saturating_sub(1)];
    let common = caller_dir
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let ups = caller_dir.len() - common;
    let mut parts: Vec<String> = std::iter::repeat_n("..".to_string(), ups).collect();
    parts.extend(target[common..].iter().cloned());
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

fn sort_key(payload: &Value, slug: &str, key: &str) -> SortKey {
    if key == "slug" || key == "entity" {
        return SortKey::Text(slug.to_string());
    }
    match paths::get(payload, key) {
        Some(Value::Number(n)) => SortKey::Number(n.as_f64().unwrap_or(0.0)),
        Some(value) => SortKey::Text(stringify(value)),
        None => SortKey::Missing,
    }
}

#[derive(Debug, PartialEq)]
enum SortKey {
    Missing,
    Number(f64),
    Text(String),
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        use SortKey::{Missing, Number, Text};
        match (self, other) {
            (Missing, Missing) => Some(std::cmp::Ordering::Equal),
            (Missing, _) => Some(std::cmp::Ordering::Less),
            (_, Missing) => Some(std::cmp::Ordering::Greater),
            (Number(a), Number(b)) => a.partial_cmp(b),
            (Text(a), Text(b)) => Some(a.cmp(b)),
            (Number(_), Text(_)) => Some(std::cmp::Ordering::Less),
            (Text(_), Number(_)) => Some(std::cmp::Ordering::Greater),
        }
    }
}
