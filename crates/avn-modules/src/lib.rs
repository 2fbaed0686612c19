// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! avn-modules
#![deny(unsafe_code)]

use avn_cache::Cache;
use avn_command::{CommandParser, CommandRegistry};
use avn_core::EventBus;
use avn_export::ExportEngine;
use avn_store::BrainRepository;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// A service surface a module may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Capability {
    /// Register commands and parser handlers.
    Commands,
    /// Subscribe to and emit events.
    Events,
    /// Direct repository access.
    Storage,
    /// The shared cache.
    Cache,
    /// The export engine.
    Exports,
    /// Scheduler task storage.
    Scheduler,
}

/// Where a module was declared; gates its capability ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleScope {
    /// Ships with the engine; may request any capability.
    System,
    /// Operator-provided; limited to the user set.
    User,
}

impl ModuleScope {
    /// Capabilities grantable in this scope.
    #[must_use]
    pub fn allowed(&self) -> &'static [Capability] {
        match self {
            Self::System => &[
                Capability::Commands,
                Capability::Events,
                Capability::Storage,
                Capability::Cache,
                Capability::Exports,
                Capability::Scheduler,
            ],
            Self::User => &[
                Capability::Commands,
                Capability::Events,
                Capability::Cache,
                Capability::Exports,
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures surfaced by module initialization.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// The module asked for a service its capabilities do not grant.
    #[error("capability {0:?} not granted")]
    CapabilityDenied(Capability),
    /// The initializer itself failed.
    #[error("module init failed: {0}")]
    Init(String),
}

// ---------------------------------------------------------------------------
// ModuleContext
// ---------------------------------------------------------------------------

/// Service handles granted to one module's initializer.
///
/// Every accessor checks the module's granted capability set; asking
/// for an ungranted service is a [`ModuleError::CapabilityDenied`].
pub struct ModuleContext<'a> {
    granted: BTreeSet<Capability>,
    registry: &'a mut CommandRegistry,
    parser: &'a mut CommandParser,
    bus: Arc<EventBus>,
    cache: Arc<Cache>,
    repo: Arc<BrainRepository>,
    export: Arc<ExportEngine>,
}

impl ModuleContext<'_> {
    /// The command registry, for [`Capability::Commands`].
    ///
    /// # Errors
    ///
    /// [`ModuleError::CapabilityDenied`] without the capability.
    pub fn commands(&mut self) -> Result<&mut CommandRegistry, ModuleError> {
        if !self.granted.contains(&Capability::Commands) {
            return Err(ModuleError::CapabilityDenied(Capability::Commands));
        }
        Ok(self.registry)
    }

    /// The statement parser, for [`Capability::Commands`].
    ///
    /// # Errors
    ///
    /// [`ModuleError::CapabilityDenied`] without the capability.
    pub fn parser(&mut self) -> Result<&mut CommandParser, ModuleError> {
        if !self.granted.contains(&Capability::Commands) {
            return Err(ModuleError::CapabilityDenied(Capability::Commands));
        }
        Ok(self.parser)
    }

    /// The event bus, for [`Capability::Events`].
    ///
    /// # Errors
    ///
    /// [`ModuleError::CapabilityDenied`] without the capability.
    pub fn events(&self) -> Result<Arc<EventBus>, ModuleError> {
        if !self.granted.contains(&Capability::Events) {
            return Err(ModuleError::CapabilityDenied(Capability::Events));
        }
        Ok(self.bus.clone())
    }

    /// The brain repository, for [`Capability::Storage`] or
    /// [`Capability::Scheduler`].
    ///
    /// # Errors
    ///
    /// [`ModuleError::CapabilityDenied`] without either capability.
    pub fn storage(&self) -> Result<Arc<BrainRepository>, ModuleError> {
        if !self.granted.contains(&Capability::Storage)
            && !self.granted.contains(&Capability::Scheduler)
        {
            return Err(ModuleError::CapabilityDenied(Capability::Storage));
        }
        Ok(self.repo.clone())
    }

    /// The shared cache, for [`Capability::Cache`].
    ///
    /// # Errors
    ///
    /// [`ModuleError::CapabilityDenied`] without the capability.
    pub fn cache(&self) -> Result<Arc<Cache>, ModuleError> {
        if !self.granted.contains(&Capability::Cache) {
            return Err(ModuleError::CapabilityDenied(Capability::Cache));
        }
        Ok(self.cache.clone())
    }

    /// The export engine, for [`Capability::Exports`].
    ///
    /// # Errors
    ///
    /// [`ModuleError::CapabilityDenied`] without the capability.
    pub fn exports(&self) -> Result<Arc<ExportEngine>, ModuleError> {
        if !self.granted.contains(&Capability::Exports) {
            return Err(ModuleError::CapabilityDenied(Capability::Exports));
        }
        Ok(self.export.clone())
    }
}

/// Borrowed service handles the loader threads into every context.
pub struct ModuleServices<'a> {
    /// Command registry (mutable; modules register handlers).
    pub registry: &'a mut CommandRegistry,
    /// Statement parser (mutable; modules register parse handlers).
    pub parser: &'a mut CommandParser,
    /// Event bus.
    pub bus: Arc<EventBus>,
    /// Shared cache.
    pub cache: Arc<Cache>,
    /// Brain repository.
    pub repo: Arc<BrainRepository>,
    /// Export engine.
    pub export: Arc<ExportEngine>,
}

// ---------------------------------------------------------------------------
// ModuleDef
// ---------------------------------------------------------------------------

type InitFn = Box<dyn Fn(&mut ModuleContext<'_>) -> Result<(), ModuleError> + Send + Sync>;

/// One statically linked module.
pub struct ModuleDef {
    /// Module slug.
    pub name: String,
    /// Exact version string.
    pub version: String,
    /// Whether the loader initializes it without being asked.
    pub autoload: bool,
    /// Dependencies as `slug` or `slug@version` (exact match).
    pub requires: Vec<String>,
    /// Requested capabilities.
    pub capabilities: Vec<Capability>,
    /// Declaration scope.
    pub scope: ModuleScope,
    init: InitFn,
}

impl ModuleDef {
    /// Start a definition with name, version, and initializer.
    #[must_use]
    pub fn new<F>(name: impl Into<String>, version: impl Into<String>, init: F) -> Self
    where
        F: Fn(&mut ModuleContext<'_>) -> Result<(), ModuleError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            version: version.into(),
            autoload: true,
            requires: Vec::new(),
            capabilities: Vec::new(),
            scope: ModuleScope::System,
            init: Box::new(init),
        }
    }

    /// Set requested capabilities.
    #[must_use]
    pub fn capabilities(mut self, caps: &[Capability]) -> Self {
        self.capabilities = caps.to_vec();
        self
    }

    /// Add a dependency (`slug` or `slug@version`).
    #[must_use]
    pub fn requires(mut self, dep: impl Into<String>) -> Self {
        self.requires.push(dep.into());
        self
    }

    /// Set the declaration scope.
    #[must_use]
    pub fn scope(mut self, scope: ModuleScope) -> Self {
        self.scope = scope;
        self
    }

    /// Opt out of autoloading.
    #[must_use]
    pub fn manual(mut self) -> Self {
        self.autoload = false;
        self
    }
}

// ---------------------------------------------------------------------------
// Manifests
// ---------------------------------------------------------------------------

/// Metadata read from an on-disk `module.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleManifest {
    /// Module slug the manifest applies to.
    pub name: String,
    /// Declared version (informational).
    #[serde(default)]
    pub version: Option<String>,
    /// Autoload override.
    #[serde(default)]
    pub autoload: Option<bool>,
    /// Initialization ordering hint (lower first).
    #[serde(default)]
    pub order: Option<i64>,
}

/// Scan a directory tree for `module.json` manifests.
#[must_use]
pub fn discover_manifests(dir: &Path) -> BTreeMap<String, ModuleManifest> {
    let mut manifests = BTreeMap::new();
    if !dir.is_dir() {
        return manifests;
    }
    for entry in WalkDir::new(dir)
        .max_depth(2)
        .into_iter()
        .filter_map(Result::ok)
    {
        if entry.file_name() != "module.json" {
            continue;
        }
        match std::fs::read(entry.path())
            .ok()
            .and_then(|raw| serde_json::from_slice::<ModuleManifest>(&raw).ok())
        {
            Some(manifest) => {
                manifests.insert(manifest.name.clone(), manifest);
            }
            None => {
                warn!(path = %entry.path().display(), "ignoring unreadable module manifest");
            }
        }
    }
    manifests
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// What happened to every registered module during a load pass.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Modules initialized, in initialization order.
    pub initialized: Vec<String>,
    /// Modules disabled, with the cause.
    pub disabled: Vec<(String, String)>,
    /// Modules skipped because `autoload` is off.
    pub skipped: Vec<String>,
}

/// Holds module definitions and runs the initialization pass.
#[derive(Default)]
pub struct ModuleLoader {
    defs: Vec<ModuleDef>,
}

impl ModuleLoader {
    /// Empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module definition.
    pub fn register(&mut self, def: ModuleDef) {
        self.defs.push(def);
    }

    /// Registered module names.
    #[must_use]
    pub fn module_names(&self) -> Vec<String> {
        self.defs.iter().map(|d| d.name.clone()).collect()
    }

    /// Initialize all autoload modules in dependency order.
    ///
    /// Manifests (when provided) override autoload and contribute
    /// ordering. A failed module never aborts the pass; it and its
    /// transitive dependents land in `disabled`.
    pub fn load(
        &self,
        services: ModuleServices<'_>,
        manifests: &BTreeMap<String, ModuleManifest>,
    ) -> LoadReport {
        let mut report = LoadReport::default();
        let mut disabled: BTreeMap<String, String> = BTreeMap::new();

        // Manifest ordering first, registration order second.
        let mut order: Vec<&ModuleDef> = self.defs.iter().collect();
        order.sort_by_key(|def| {
            manifests
                .get(&def.name)
                .and_then(|m| m.order)
                .unwrap_or(i64::MAX)
        });

        let mut active: Vec<&ModuleDef> = Vec::new();
        for def in order {
            let autoload = manifests
                .get(&def.name)
                .and_then(|m| m.autoload)
                .unwrap_or(def.autoload);
            if autoload {
                active.push(def);
            } else {
                report.skipped.push(def.name.clone());
            }
        }

        // Capability gating before anything runs.
        for def in &active {
            let allowed = def.scope.allowed();
            if let Some(cap) = def
                .capabilities
                .iter()
                .find(|cap| !allowed.contains(cap))
            {
                disabled.insert(
                    def.name.clone(),
                    format!("capability {cap:?} not allowed in {:?} scope", def.scope),
                );
            }
        }

        // Dependency resolution: exact-version requires against the
        // active set.
        let by_name: BTreeMap<&str, &ModuleDef> =
            active.iter().map(|d| (d.name.as_str(), *d)).collect();
        for def in &active {
            if disabled.contains_key(&def.name) {
                continue;
            }
            for requirement in &def.requires {
                let (dep_name, dep_version) = match requirement.split_once('@') {
                    Some((name, version)) => (name, Some(version)),
                    None => (requirement.as_str(), None),
                };
                match by_name.get(dep_name) {
                    None => {
                        disabled.insert(
                            def.name.clone(),
                            format!("dependency '{dep_name}' is not available"),
                        );
                        break;
                    }
                    Some(dep) => {
                        if let Some(version) = dep_version {
                            if dep.version != version {
                                disabled.insert(
                                    def.name.clone(),
                                    format!(
                                        "dependency '{dep_name}' is {}, needs {version}",
                                        dep.version
                                    ),
                                );
                                break;
                            }
                        }
                    }
                }
            }
        }

        // Topological order with cycle detection (Kahn).
        let topo = topological_order(&active, &disabled);
        let TopoResult { ordered, cyclic } = topo;
        for name in cyclic {
            disabled
                .entry(name)
                .or_insert_with(|| "dependency cycle".to_string());
        }

        // Initialize; a failure disables transitively.
        let mut context_services = services;
        for def in ordered {
            if let Some(reason) = blocked_reason(def, &disabled) {
                disabled.entry(def.name.clone()).or_insert(reason);
                continue;
            }
            let mut ctx = ModuleContext {
                granted: def.capabilities.iter().copied().collect(),
                registry: &mut *context_services.registry,
                parser: &mut *context_services.parser,
                bus: context_services.bus.clone(),
                cache: context_services.cache.clone(),
                repo: context_services.repo.clone(),
                export: context_services.export.clone(),
            };
            match (def.init)(&mut ctx) {
                Ok(()) => {
                    debug!(module = %def.name, version = %def.version, "module initialized");
                    report.initialized.push(def.name.clone());
                }
                Err(err) => {
                    warn!(module = %def.name, error = %err, "module failed to initialize");
                    disabled.insert(def.name.clone(), err.to_string());
                }
            }
        }

        report.disabled = disabled.into_iter().collect();
        info!(
            initialized = report.initialized.len(),
            disabled = report.disabled.len(),
            skipped = report.skipped.len(),
            "module load pass complete"
        );
        report
    }
}

fn blocked_reason(def: &ModuleDef, disabled: &BTreeMap<String, String>) -> Option<String> {
    if let Some(reason) = disabled.get(&def.name) {
        return Some(reason.clone());
    }
    for requirement in &def.requires {
        let dep_name = requirement
            .split_once('@')
            .map_or(requirement.as_str(), |(name, _)| name);
        if disabled.contains_key(dep_name) {
            return Some(format!("dependency '{dep_name}' is disabled"));
        }
    }
    None
}

struct TopoResult<'a> {
    ordered: Vec<&'a ModuleDef>,
    cyclic: Vec<String>,
}

fn topological_order<'a>(
    active: &[&'a ModuleDef],
    disabled: &BTreeMap<String, String>,
) -> TopoResult<'a> {
    let names: BTreeSet<&str> = active.iter().map(|d| d.name.as_str()).collect();
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for def in active {
        let mut degree = 0;
        for requirement in &def.requires {
            let dep = requirement
                .split_once('@')
                .map_or(requirement.as_str(), |(name, _)| name);
            if names.contains(dep) {
                degree += 1;
                dependents.entry(dep).or_default().push(def.name.as_str());
            }
        }
        in_degree.insert(def.name.as_str(), degree);
    }

    let by_name: BTreeMap<&str, &'a ModuleDef> =
        active.iter().map(|d| (d.name.as_str(), *d)).collect();
    // Keep the manifest/registration order among ready modules.
    let mut ordered = Vec::new();
    let mut ready: Vec<&str> = active
        .iter()
        .filter(|d| in_degree[d.name.as_str()] == 0)
        .map(|d| d.name.as_str())
        .collect();
    while let Some(name) = ready.first().copied() {
        ready.remove(0);
        ordered.push(by_name[name]);
        for dependent in dependents.get(name).cloned().unwrap_or_default() {
            let degree = in_degree
                .get_mut(dependent)
                .unwrap_or_else(|| unreachable!("dependent is active"));
            *degree -= 1;
            if *degree == 0 {
                ready.push(dependent);
            }
        }
    }

    let cyclic = active
        .iter()
        .filter(|d| {
            !ordered.iter().any(|o| o.name == d.name) && !disabled.contains_key(&d.name)
        })
        .map(|d| d.name.clone())
        .collect();
    TopoResult { ordered, cyclic }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avn_query::ResolverEngine;
    use avn_store::PathLocator;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        registry: CommandRegistry,
        parser: CommandParser,
        bus: Arc<EventBus>,
        cache: Arc<Cache>,
        repo: Arc<BrainRepository>,
        export: Arc<ExportEngine>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn services(&mut self) -> ModuleServices<'_> {
            ModuleServices {
                registry: &mut self.registry,
                parser: &mut self.parser,
                bus: self.bus.clone(),
                cache: self.cache.clone(),
                repo: self.repo.clone(),
                export: self.export.clone(),
            }
        }
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let locator = PathLocator::new(dir.path().join("avn"), None, None, None);
        locator.ensure_layout().unwrap();
        let bus = Arc::new(EventBus::new());
        let repo = Arc::new(BrainRepository::new(locator.clone(), bus.clone()));
        repo.ensure_system_brain().unwrap();
        let cache = Arc::new(Cache::new(locator.cache_dir(), true));
        let resolver = Arc::new(ResolverEngine::new(repo.clone()));
        let export = Arc::new(ExportEngine::new(
            repo.clone(),
            resolver,
            cache.clone(),
            false,
        ));
        Harness {
            registry: CommandRegistry::new(bus.clone()),
            parser: CommandParser::new(bus.clone()),
            bus,
            cache,
            repo,
            export,
            _dir: dir,
        }
    }

    fn noop(name: &str) -> ModuleDef {
        ModuleDef::new(name, "1.0.0", |_| Ok(()))
    }

    #[test]
    fn modules_initialize_in_dependency_order() {
        let mut harness = harness();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut loader = ModuleLoader::new();
        for name in ["alpha", "beta"] {
            let log = order.clone();
            let def = ModuleDef::new(name, "1.0.0", move |_| {
                log.lock().unwrap().push(name.to_string());
                Ok(())
            });
            let def = if name == "alpha" {
                def.requires("beta")
            } else {
                def
            };
            loader.register(def);
        }
        let report = loader.load(harness.services(), &BTreeMap::new());
        assert_eq!(report.initialized, vec!["beta", "alpha"]);
        assert_eq!(*order.lock().unwrap(), vec!["beta", "alpha"]);
    }

    #[test]
    fn exact_version_requirement_enforced() {
        let mut harness = harness();
        let mut loader = ModuleLoader::new();
        loader.register(noop("base"));
        loader.register(noop("wants-old").requires("base@0.9.0"));
        loader.register(noop("wants-current").requires("base@1.0.0"));
        let report = loader.load(harness.services(), &BTreeMap::new());
        assert!(report.initialized.contains(&"wants-current".to_string()));
        assert!(
            report
                .disabled
                .iter()
                .any(|(name, reason)| name == "wants-old" && reason.contains("needs 0.9.0"))
        );
    }

    #[test]
    fn missing_dependency_disables_transitively() {
        let mut harness = harness();
        let mut loader = ModuleLoader::new();
        loader.register(noop("a").requires("ghost"));
        loader.register(noop("b").requires("a"));
        let report = loader.load(harness.services(), &BTreeMap::new());
        assert!(report.initialized.is_empty());
        assert_eq!(report.disabled.len(), 2);
        assert!(
            report
                .disabled
                .iter()
                .any(|(name, reason)| name == "b" && reason.contains("'a' is disabled"))
        );
    }

    #[test]
    fn dependency_cycle_detected() {
        let mut harness = harness();
        let mut loader = ModuleLoader::new();
        loader.register(noop("x").requires("y"));
        loader.register(noop("y").requires("x"));
        let report = loader.load(harness.services(), &BTreeMap::new());
        assert!(report.initialized.is_empty());
        assert!(
            report
                .disabled
                .iter()
                .all(|(_, reason)| reason.contains("cycle"))
        );
    }

    #[test]
    fn init_failure_disables_dependents() {
        let mut harness = harness();
        let mut loader = ModuleLoader::new();
        loader.register(ModuleDef::new("flaky", "1.0.0", |_| {
            Err(ModuleError::Init("no database".into()))
        }));
        loader.register(noop("dependent").requires("flaky"));
        let report = loader.load(harness.services(), &BTreeMap::new());
        assert!(report.initialized.is_empty());
        assert!(
            report
                .disabled
                .iter()
                .any(|(name, reason)| name == "flaky" && reason.contains("no database"))
        );
        assert!(
            report
                .disabled
                .iter()
                .any(|(name, _)| name == "dependent")
        );
    }

    #[test]
    fn user_scope_cannot_request_storage() {
        let mut harness = harness();
        let mut loader = ModuleLoader::new();
        loader.register(
            noop("sneaky")
                .scope(ModuleScope::User)
                .capabilities(&[Capability::Storage]),
        );
        let report = loader.load(harness.services(), &BTreeMap::new());
        assert!(
            report
                .disabled
                .iter()
                .any(|(name, reason)| name == "sneaky" && reason.contains("Storage"))
        );
    }

    #[test]
    fn system_scope_gets_full_set() {
        let mut harness = harness();
        let mut loader = ModuleLoader::new();
        loader.register(
            ModuleDef::new("privileged", "1.0.0", |ctx| {
                ctx.storage()?;
                ctx.cache()?;
                ctx.events()?;
                Ok(())
            })
            .capabilities(&[Capability::Storage, Capability::Cache, Capability::Events]),
        );
        let report = loader.load(harness.services(), &BTreeMap::new());
        assert_eq!(report.initialized, vec!["privileged"]);
    }

    #[test]
    fn ungranted_capability_access_fails_init() {
        let mut harness = harness();
        let mut loader = ModuleLoader::new();
        loader.register(
            ModuleDef::new("overreach", "1.0.0", |ctx| {
                ctx.storage()?;
                Ok(())
            })
            .capabilities(&[Capability::Events]),
        );
        let report = loader.load(harness.services(), &BTreeMap::new());
        assert!(
            report
                .disabled
                .iter()
                .any(|(name, reason)| name == "overreach" && reason.contains("Storage"))
        );
    }

    #[test]
    fn module_can_register_commands() {
        let mut harness = harness();
        let mut loader = ModuleLoader::new();
        loader.register(
            ModuleDef::new("greeter", "1.0.0", |ctx| {
                ctx.commands()?.register(
                    "greet",
                    avn_command::CommandMeta::new("say hello", "modules", "greet"),
                    |_| Ok(avn_command::CommandOutcome::message("hello")),
                );
                Ok(())
            })
            .capabilities(&[Capability::Commands]),
        );
        let report = loader.load(harness.services(), &BTreeMap::new());
        assert_eq!(report.initialized, vec!["greeter"]);
        assert!(harness.registry.contains("greet"));
    }

    #[test]
    fn manual_modules_are_skipped() {
        let mut harness = harness();
        let mut loader = ModuleLoader::new();
        loader.register(noop("optional").manual());
        let report = loader.load(harness.services(), &BTreeMap::new());
        assert_eq!(report.skipped, vec!["optional"]);
        assert!(report.initialized.is_empty());
    }

    #[test]
    fn manifest_overrides_autoload_and_order() {
        let mut harness = harness();
        let mut loader = ModuleLoader::new();
        loader.register(noop("late"));
        loader.register(noop("early"));
        loader.register(noop("off"));

        let dir = tempfile::tempdir().unwrap();
        for (name, body) in [
            ("late", r#"{"name": "late", "order": 2}"#),
            ("early", r#"{"name": "early", "order": 1}"#),
            ("off", r#"{"name": "off", "autoload": false}"#),
        ] {
            let module_dir = dir.path().join(name);
            std::fs::create_dir_all(&module_dir).unwrap();
            std::fs::write(module_dir.join("module.json"), body).unwrap();
        }
        let manifests = discover_manifests(dir.path());
        assert_eq!(manifests.len(), 3);

        let report = loader.load(harness.services(), &manifests);
        assert_eq!(report.initialized, vec!["early", "late"]);
        assert_eq!(report.skipped, vec!["off"]);
    }

    #[test]
    fn discover_ignores_garbage_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let module_dir = dir.path().join("broken");
        std::fs::create_dir_all(&module_dir).unwrap();
        std::fs::write(module_dir.join("module.json"), b"not json").unwrap();
        assert!(discover_manifests(dir.path()).is_empty());
        assert!(discover_manifests(Path::new("/nonexistent")).is_empty());
    }
}
