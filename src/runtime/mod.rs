//! The test runtime core: module identity, registries, the real/mock
//! loader, sandbox invocation, automock synthesis, and lifecycle.

mod facade;
mod normalize;
mod policy;
mod registry;

pub use facade::{MockOptions, TestFacade};
pub use normalize::{
    virtual_mock_path, ModuleId, ModuleKind, SharedContext, PATH_LIST_SEPARATOR,
};
pub use registry::{
    MockRegistry, ModuleRecord, ModuleRegistry, SENTINEL_FILENAME, SENTINEL_ID,
};

use crate::config::Config;
use crate::coverage::{CoverageCollector, LineCollector, COVERAGE_STORE_KEY};
use crate::error::{Error, Result};
use crate::mocker::{MockMetadata, Mocker};
use crate::resolver::Resolver;
use crate::sandbox::{SandboxEnvironment, CLEAR_TIMERS_KEY};
use crate::transform::{ModuleScope, TransformOptions, Transformer, WRAPPER_KEY};
use crate::value::Value;
use ahash::{AHashMap, AHashSet};
use log::{debug, warn};
use regex::Regex;
use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Delivery mode of the single load pathway. The public require surfaces
/// are fixed-mode views over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Ask the mock-policy oracle.
    Auto,
    /// Always the real module.
    Real,
    /// Always the mock.
    Mock,
}

pub(crate) struct RuntimeInner {
    pub(crate) config: Config,
    pub(crate) environment: Rc<SandboxEnvironment>,
    pub(crate) resolver: Rc<dyn Resolver>,
    transformer: Rc<dyn Transformer>,
    pub(crate) mocker: Mocker,
    pub(crate) shared: Rc<SharedContext>,

    modules: ModuleRegistry,
    mocks: MockRegistry,
    /// User-registered mock producers; survive registry reset.
    pub(crate) mock_factories: RefCell<AHashMap<String, Rc<dyn Fn() -> Value>>>,
    /// Tri-state force-mock/force-real marks; survive registry reset.
    pub(crate) explicit_mocks: RefCell<AHashMap<String, bool>>,
    /// `false` marks a module and its dependency subtree automock-exempt.
    pub(crate) transitive_unmock: RefCell<AHashMap<String, bool>>,
    /// Breadcrumbs keyed `from ∥ identifier`, read at the top of the
    /// oracle. Never cleared during a Runtime's life.
    pub(crate) transitive_dep_cache: RefCell<AHashMap<String, bool>>,
    pub(crate) should_mock_cache: RefCell<AHashMap<String, bool>>,
    pub(crate) virtual_mocks: RefCell<AHashSet<PathBuf>>,
    /// Metadata is expensive and deterministic in the module source, so
    /// it outlives registry resets.
    metadata_cache: RefCell<AHashMap<PathBuf, MockMetadata>>,
    collectors: RefCell<AHashMap<PathBuf, Rc<dyn CoverageCollector>>>,

    pub(crate) automock: Cell<bool>,
    current_path: RefCell<Option<PathBuf>>,
    pub(crate) current_manual_mock: RefCell<Option<PathBuf>>,

    pub(crate) unmock_regex: Option<Rc<Regex>>,
    mocks_regex: Option<Regex>,
    test_regex: Regex,
    coverage_ignore: Option<Regex>,
}

/// The runtime. A cheap handle over shared interior state: the loader,
/// the facade and every specifier-bound require all borrow the same
/// instance.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RuntimeInner>,
}

impl Runtime {
    /// Build a runtime, then run its lifecycle: flag node_modules setup
    /// files automock-exempt, reset the registries, and require each
    /// setup file.
    pub fn new(
        config: Config,
        environment: Rc<SandboxEnvironment>,
        resolver: Rc<dyn Resolver>,
        transformer: Rc<dyn Transformer>,
        shared: Rc<SharedContext>,
    ) -> Result<Runtime> {
        let unmock_regex = shared.unmock_regex_for(&config)?;
        let mocks_regex = if config.mocks_pattern.is_empty() {
            None
        } else {
            Some(
                Regex::new(&config.mocks_pattern)
                    .map_err(|e| Error::config(format!("bad mocks_pattern: {}", e)))?,
            )
        };
        let test_regex = normalize::compile_test_regex(&config.test_regex)?;
        let coverage_ignore = if config.coverage_path_ignore_patterns.is_empty() {
            None
        } else {
            Some(
                Regex::new(&config.coverage_path_ignore_patterns.join("|")).map_err(|e| {
                    Error::config(format!("bad coverage_path_ignore_patterns: {}", e))
                })?,
            )
        };

        let automock = config.automock;
        let setup_files = config.setup_files.clone();
        let runtime = Runtime {
            inner: Rc::new(RuntimeInner {
                config,
                environment,
                resolver,
                transformer,
                mocker: Mocker::new(),
                shared,
                modules: ModuleRegistry::new(),
                mocks: MockRegistry::new(),
                mock_factories: RefCell::new(AHashMap::new()),
                explicit_mocks: RefCell::new(AHashMap::new()),
                transitive_unmock: RefCell::new(AHashMap::new()),
                transitive_dep_cache: RefCell::new(AHashMap::new()),
                should_mock_cache: RefCell::new(AHashMap::new()),
                virtual_mocks: RefCell::new(AHashSet::new()),
                metadata_cache: RefCell::new(AHashMap::new()),
                collectors: RefCell::new(AHashMap::new()),
                automock: Cell::new(automock),
                current_path: RefCell::new(None),
                current_manual_mock: RefCell::new(None),
                unmock_regex,
                mocks_regex,
                test_regex,
                coverage_ignore,
            }),
        };

        for setup_file in &setup_files {
            if has_node_modules_segment(setup_file) {
                if let Ok(id) = runtime.normalize_id(setup_file, None) {
                    runtime
                        .inner
                        .transitive_unmock
                        .borrow_mut()
                        .insert(id.key(), false);
                }
            }
        }

        runtime.reset_module_registry();

        for setup_file in &setup_files {
            runtime.require_module(setup_file, None)?;
        }

        Ok(runtime)
    }

    /// The single dynamic pathway from a specifier to a delivered value.
    pub fn load(&self, from: &Path, specifier: &str, mode: LoadMode) -> Result<Value> {
        match mode {
            LoadMode::Auto => {
                if self.should_mock(from, specifier)? {
                    self.require_mock(from, specifier)
                } else {
                    self.require_module(from, Some(specifier))
                }
            }
            LoadMode::Real => self.require_module(from, Some(specifier)),
            LoadMode::Mock => self.require_mock(from, specifier),
        }
    }

    pub fn require(&self, from: &Path, specifier: &str) -> Result<Value> {
        self.load(from, specifier, LoadMode::Auto)
    }

    /// Load the real module, bypassing the oracle.
    pub fn require_module(&self, from: &Path, specifier: Option<&str>) -> Result<Value> {
        let id = self.normalize_id(from, specifier)?;

        let mut module_path: Option<PathBuf> = None;
        if let Some(spec) = specifier {
            // Ghost manual mocks: a mock file standing in for a module
            // that exists only as a mock. Skipped while that very mock is
            // executing, and when the module is explicitly forced real.
            if let Some(manual) = self.inner.resolver.get_mock_module(spec) {
                let executing_it = self.inner.current_manual_mock.borrow().as_deref()
                    == Some(manual.as_path());
                let forced_real =
                    self.inner.explicit_mocks.borrow().get(&id.key()) == Some(&false);
                if self.inner.resolver.get_module(spec).is_none()
                    && !executing_it
                    && !forced_real
                {
                    module_path = Some(manual);
                }
            }

            if self.inner.resolver.is_core_module(spec) {
                return self.inner.environment.core_module(spec).ok_or_else(|| {
                    Error::resolution(format!(
                        "core module '{}' is not registered with the sandbox",
                        spec
                    ))
                });
            }
        }

        let module_path = match module_path {
            Some(path) => path,
            None => match specifier {
                Some(spec) => self.inner.resolver.resolve_module(from, spec)?,
                None => from.to_path_buf(),
            },
        };

        if !self.inner.modules.contains(&module_path) {
            let record = ModuleRecord::new(&module_path);
            // Inserted before execution so a re-entrant require during a
            // cycle observes the partially populated exports.
            self.inner.modules.insert(record.clone());

            match module_path.extension().and_then(|e| e.to_str()) {
                Some("json") => {
                    let text = std::fs::read_to_string(&module_path).map_err(|e| {
                        Error::io(format!("cannot read JSON module: {}", e))
                            .with_file(&module_path)
                    })?;
                    let parsed = self
                        .inner
                        .environment
                        .parse_json(&text)
                        .map_err(|e| e.with_file(&module_path))?;
                    record.set_exports(parsed);
                }
                Some("node") => {
                    record.set_exports(self.inner.environment.native_addon(&module_path));
                }
                _ => self.exec_module(&record)?,
            }
        }

        Ok(self
            .inner
            .modules
            .get(&module_path)
            .map(|record| record.exports())
            .unwrap_or_else(Value::object))
    }

    /// Deliver the mock for a specifier: cached value, registered
    /// factory, manual-mock file (haste-named or sidecar), or automock.
    pub fn require_mock(&self, from: &Path, specifier: &str) -> Result<Value> {
        let key = self.normalize_id(from, Some(specifier))?.key();
        if let Some(existing) = self.inner.mocks.get(&key) {
            return Ok(existing);
        }

        let factory = self.inner.mock_factories.borrow().get(&key).cloned();
        if let Some(factory) = factory {
            let value = factory();
            self.inner.mocks.insert(key, value.clone());
            return Ok(value);
        }

        let mut manual = self.inner.resolver.get_mock_module(specifier);
        if manual.is_none() {
            // Sidecar rule: distinct files sharing a basename get
            // per-directory mocks from the adjacent __mocks__ folder.
            if let Ok(real) = self.inner.resolver.resolve_module(from, specifier) {
                if let (Some(dir), Some(name)) = (real.parent(), real.file_name()) {
                    let sidecar = dir.join("__mocks__").join(name);
                    if sidecar.is_file() {
                        manual = Some(sidecar);
                    }
                }
            }
        }

        let value = match manual {
            Some(mock_path) => {
                debug!("manual mock for '{}': {}", specifier, mock_path.display());
                // Scratch record: executed like a real module but never
                // registered.
                let record = ModuleRecord::new(&mock_path);
                self.exec_module(&record)?;
                record.exports()
            }
            None => self.generate_mock(from, specifier)?,
        };

        self.inner.mocks.insert(key, value.clone());
        Ok(value)
    }

    /// Run a module body inside the sandbox. The record must already
    /// carry its filename and an initialised exports bag.
    pub(crate) fn exec_module(&self, record: &Rc<ModuleRecord>) -> Result<()> {
        if self.inner.environment.is_torn_down() {
            return Ok(());
        }

        let filename = record.filename.clone();
        let dirname = filename
            .parent()
            .unwrap_or(Path::new("/"))
            .to_path_buf();

        let (coverage_store, instrument) = if self.should_collect_coverage(&filename) {
            let collector = self.collector_for(&filename);
            let store = collector.coverage_data_store();
            let hook_collector = collector.clone();
            let hook: Rc<dyn Fn(&str, &Path) -> String> = Rc::new(move |source, file| {
                hook_collector.instrumented_source(source, file, COVERAGE_STORE_KEY)
            });
            (store, Some(hook))
        } else {
            (Value::Undefined, None)
        };

        let saved_path = self.inner.current_path.replace(Some(filename.clone()));
        let saved_manual = self
            .inner
            .current_manual_mock
            .replace(Some(filename.clone()));

        let result = (|| -> Result<()> {
            let require = self.create_require(&filename);
            record.attach(
                self.inner.shared.sentinel(),
                self.inner.resolver.get_module_paths(&dirname),
                require.clone(),
            );

            let evaluated = (|| {
                let script = self.inner.transformer.transform(
                    &filename,
                    &self.inner.config,
                    &TransformOptions { instrument },
                )?;
                self.inner.environment.run_script(&script)
            })()
            .map_err(|e| self.wrap_syntax_error(&filename, e))?;

            let wrapper = evaluated.get(WRAPPER_KEY).ok_or_else(|| {
                Error::execution(format!(
                    "transformed script for {} exposes no '{}' entry",
                    filename.display(),
                    WRAPPER_KEY
                ))
            })?;

            wrapper(ModuleScope {
                receiver: record.exports(),
                module: record.clone(),
                exports: record.exports(),
                require,
                dirname: dirname.clone(),
                filename: filename.clone(),
                global: self.inner.environment.global().unwrap_or(Value::Undefined),
                rig: self.create_facade(&filename),
                coverage: coverage_store,
            })
        })();

        self.inner.current_path.replace(saved_path);
        self.inner.current_manual_mock.replace(saved_manual);
        result
    }

    /// Syntax failures during transform/evaluation are re-raised as
    /// syntax errors naming the file relative to the configured root and
    /// pointing at preprocessor configuration.
    fn wrap_syntax_error(&self, filename: &Path, error: Error) -> Error {
        if !error.is_syntax() {
            return error;
        }
        let relative = filename
            .strip_prefix(&self.inner.config.root_dir)
            .unwrap_or(filename);
        let preprocessor = self
            .inner
            .config
            .script_preprocessor
            .as_deref()
            .unwrap_or("script_preprocessor");
        Error::syntax(format!(
            "{} failed to evaluate: {}. If the file uses non-standard syntax, make sure your preprocessor ({}) handles it.",
            relative.display(),
            error.message,
            preprocessor
        ))
        .with_file(filename)
    }

    /// Synthesise a mock from the module's live exports. The real module
    /// executes against scratch registries so the caller's caches never
    /// observe it; metadata is cached per path across registry resets.
    pub fn generate_mock(&self, from: &Path, specifier: &str) -> Result<Value> {
        let path = self.inner.resolver.resolve_module(from, specifier)?;

        if !self.inner.metadata_cache.borrow().contains_key(&path) {
            // Seed with trivial metadata so re-entry for the same path
            // terminates instead of recursing.
            let seed = self
                .inner
                .mocker
                .get_metadata(&Value::object())
                .ok_or_else(|| Error::automock("empty-object metadata unavailable"))?;
            self.inner
                .metadata_cache
                .borrow_mut()
                .insert(path.clone(), seed);

            let saved_modules = self.inner.modules.swap(AHashMap::new());
            let saved_mocks = self.inner.mocks.swap(AHashMap::new());
            let outcome = self.require_module(from, Some(specifier));
            self.inner.modules.swap(saved_modules);
            self.inner.mocks.swap(saved_mocks);

            let exports = match outcome {
                Ok(exports) => exports,
                Err(e) => {
                    self.inner.metadata_cache.borrow_mut().remove(&path);
                    return Err(e);
                }
            };

            match self.inner.mocker.get_metadata(&exports) {
                Some(metadata) => {
                    self.inner
                        .metadata_cache
                        .borrow_mut()
                        .insert(path.clone(), metadata);
                }
                None => {
                    self.inner.metadata_cache.borrow_mut().remove(&path);
                    return Err(Error::automock(format!(
                        "failed to derive mock metadata for module '{}'; see the module mocking chapter of the documentation",
                        specifier
                    ))
                    .with_file(&path));
                }
            }
        }

        let metadata = self
            .inner
            .metadata_cache
            .borrow()
            .get(&path)
            .cloned()
            .ok_or_else(|| Error::automock("metadata cache entry vanished"))?;
        Ok(self.inner.mocker.generate_from_metadata(&metadata))
    }

    /// Drop all module and mock records, clear recorded calls on every
    /// mock function reachable from the sandbox global, and invoke the
    /// global timer-clear entry point when present.
    pub fn reset_module_registry(&self) {
        self.inner.modules.clear();
        self.inner.mocks.clear();

        if let Some(global) = self.inner.environment.global() {
            for (_, value) in global.entries() {
                if let Some(mock) = value.as_mock() {
                    mock.mock_clear();
                }
            }
            let clear_timers = global.get(CLEAR_TIMERS_KEY);
            if clear_timers.is_callable() {
                if let Err(e) = clear_timers.call(&[]) {
                    warn!("{} failed during registry reset: {}", CLEAR_TIMERS_KEY, e);
                }
            }
        }
    }

    pub fn should_collect_coverage(&self, filename: &Path) -> bool {
        let config = &self.inner.config;
        if !config.collect_coverage {
            return false;
        }
        if let Some(only) = &config.collect_coverage_only_from {
            if !only.iter().any(|allowed| allowed == filename) {
                return false;
            }
        }
        let display = filename.to_string_lossy();
        if let Some(ignore) = &self.inner.coverage_ignore {
            if ignore.is_match(&display) {
                return false;
            }
        }
        if let Some(mocks) = &self.inner.mocks_regex {
            if mocks.is_match(&display) {
                return false;
            }
        }
        !self.inner.test_regex.is_match(&display)
    }

    /// Extracted runtime coverage per instrumented file.
    pub fn get_all_coverage_info(&self) -> AHashMap<PathBuf, Vec<u32>> {
        self.inner
            .collectors
            .borrow()
            .iter()
            .map(|(path, collector)| {
                (path.clone(), collector.extract_runtime_coverage_info())
            })
            .collect()
    }

    fn collector_for(&self, filename: &Path) -> Rc<dyn CoverageCollector> {
        let mut collectors = self.inner.collectors.borrow_mut();
        collectors
            .entry(filename.to_path_buf())
            .or_insert_with(|| match self.inner.config.coverage_collector.as_deref() {
                None | Some("line") => {
                    Rc::new(LineCollector::default()) as Rc<dyn CoverageCollector>
                }
                Some(other) => {
                    warn!("unknown coverage_collector '{}', using the line collector", other);
                    Rc::new(LineCollector::default())
                }
            })
            .clone()
    }

    /// The specifier-bound require delivered to a module body.
    pub fn create_require(&self, from: &Path) -> RequireFunction {
        RequireFunction {
            runtime: self.clone(),
            from: from.to_path_buf(),
            cache: Value::object(),
            extensions: Value::object(),
        }
    }

    /// The per-file test-control facade.
    pub fn create_facade(&self, from: &Path) -> TestFacade {
        TestFacade::new(self.clone(), from)
    }

    /// Path of the module currently executing, if any. Set on entry to
    /// `exec_module` and restored on every exit path.
    pub fn current_executing_path(&self) -> Option<PathBuf> {
        self.inner.current_path.borrow().clone()
    }

    pub fn environment(&self) -> Rc<SandboxEnvironment> {
        self.inner.environment.clone()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn loaded_module_count(&self) -> usize {
        self.inner.modules.len()
    }
}

/// Dispatches to the oracle, with fixed-mode siblings and the inert
/// host-compatibility fields.
#[derive(Clone)]
pub struct RequireFunction {
    runtime: Runtime,
    from: PathBuf,
    /// Present for host compatibility; not consulted by the core.
    pub cache: Value,
    /// Present for host compatibility; not consulted by the core.
    pub extensions: Value,
}

impl RequireFunction {
    pub fn require(&self, specifier: &str) -> Result<Value> {
        self.runtime.load(&self.from, specifier, LoadMode::Auto)
    }

    pub fn require_actual(&self, specifier: &str) -> Result<Value> {
        self.runtime.load(&self.from, specifier, LoadMode::Real)
    }

    pub fn require_mock(&self, specifier: &str) -> Result<Value> {
        self.runtime.load(&self.from, specifier, LoadMode::Mock)
    }

    /// Resolver passthrough.
    pub fn resolve(&self, specifier: &str) -> Result<PathBuf> {
        self.runtime
            .inner
            .resolver
            .resolve_module(&self.from, specifier)
    }

    pub fn from(&self) -> &Path {
        &self.from
    }
}

pub(crate) fn has_node_modules_segment(path: &Path) -> bool {
    path.components()
        .any(|component| component.as_os_str() == "node_modules")
}
