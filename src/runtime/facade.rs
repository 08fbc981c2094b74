//! Per-file test-control facade: the object a module body receives for
//! steering mock policy, timers, matchers and the registries. Mutating
//! methods return the facade handle so calls chain.

use super::normalize::virtual_mock_path;
use super::Runtime;
use crate::error::Result;
use crate::mocker::{MockFn, Mocker};
use crate::sandbox::{MATCHERS_KEY, TEST_FRAMEWORK_KEY};
use crate::value::Value;
use log::warn;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Options accepted by `mock_with_options`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockOptions {
    /// Register the computed virtual path before identity normalisation,
    /// letting a module be mocked without existing on disk.
    pub virtual_mock: bool,
}

#[derive(Clone)]
pub struct TestFacade {
    runtime: Runtime,
    from: PathBuf,
}

impl TestFacade {
    pub(crate) fn new(runtime: Runtime, from: &Path) -> Self {
        Self {
            runtime,
            from: from.to_path_buf(),
        }
    }

    /// The file this facade was created for.
    pub fn from(&self) -> &Path {
        &self.from
    }

    pub fn enable_automock(&self) -> &Self {
        self.runtime.inner.automock.set(true);
        self
    }

    pub fn disable_automock(&self) -> &Self {
        self.runtime.inner.automock.set(false);
        self
    }

    /// Force-mock a specifier.
    pub fn mock(&self, name: &str) -> &Self {
        self.mock_with_options(name, None, MockOptions::default())
    }

    /// Force-mock with a registered factory.
    pub fn mock_with(&self, name: &str, factory: impl Fn() -> Value + 'static) -> &Self {
        self.mock_with_options(name, Some(Rc::new(factory)), MockOptions::default())
    }

    pub fn mock_with_options(
        &self,
        name: &str,
        factory: Option<Rc<dyn Fn() -> Value>>,
        options: MockOptions,
    ) -> &Self {
        if options.virtual_mock {
            self.runtime
                .inner
                .virtual_mocks
                .borrow_mut()
                .insert(virtual_mock_path(&self.from, name));
        }
        match self.runtime.normalize_id(&self.from, Some(name)) {
            Ok(id) => {
                let key = id.key();
                if let Some(factory) = factory {
                    self.runtime
                        .inner
                        .mock_factories
                        .borrow_mut()
                        .insert(key.clone(), factory);
                }
                self.runtime
                    .inner
                    .explicit_mocks
                    .borrow_mut()
                    .insert(key, true);
            }
            Err(e) => warn!("mock('{}') ignored: {}", name, e),
        }
        self
    }

    /// `mock` with a constant value.
    pub fn set_mock(&self, name: &str, value: Value) -> &Self {
        self.mock_with(name, move || value.clone())
    }

    /// Force the real module.
    pub fn unmock(&self, name: &str) -> &Self {
        match self.runtime.normalize_id(&self.from, Some(name)) {
            Ok(id) => {
                self.runtime
                    .inner
                    .explicit_mocks
                    .borrow_mut()
                    .insert(id.key(), false);
            }
            Err(e) => warn!("unmock('{}') ignored: {}", name, e),
        }
        self
    }

    /// Force the real module and exempt its dependency subtree from
    /// automock.
    pub fn deep_unmock(&self, name: &str) -> &Self {
        match self.runtime.normalize_id(&self.from, Some(name)) {
            Ok(id) => {
                let key = id.key();
                self.runtime
                    .inner
                    .explicit_mocks
                    .borrow_mut()
                    .insert(key.clone(), false);
                self.runtime
                    .inner
                    .transitive_unmock
                    .borrow_mut()
                    .insert(key, false);
            }
            Err(e) => warn!("deep_unmock('{}') ignored: {}", name, e),
        }
        self
    }

    pub fn reset_module_registry(&self) -> &Self {
        self.runtime.reset_module_registry();
        self
    }

    /// Automock synthesis without touching the mock registry.
    pub fn gen_mock_from_module(&self, name: &str) -> Result<Value> {
        self.runtime.generate_mock(&self.from, name)
    }

    /// Fresh recording mock function.
    pub fn mock_fn(&self) -> Value {
        self.runtime.inner.mocker.mock_function()
    }

    /// Recording mock function preloaded with an implementation.
    pub fn mock_fn_with(
        &self,
        implementation: impl Fn(&[Value]) -> Result<Value> + 'static,
    ) -> Value {
        Value::Mock(Rc::new(MockFn::with_implementation(implementation)))
    }

    /// Alias for the mock-function factory.
    pub fn gen_mock_function(&self) -> Value {
        self.mock_fn()
    }

    /// Alias for the mock-function factory.
    pub fn gen_mock_fn(&self) -> Value {
        self.mock_fn()
    }

    pub fn is_mock_function(&self, value: &Value) -> bool {
        Mocker::is_mock_function(value)
    }

    pub fn use_fake_timers(&self) -> &Self {
        self.runtime.inner.environment.fake_timers().use_fake_timers();
        self
    }

    pub fn use_real_timers(&self) -> &Self {
        self.runtime.inner.environment.fake_timers().use_real_timers();
        self
    }

    pub fn clear_all_timers(&self) -> &Self {
        self.runtime.inner.environment.fake_timers().clear_all_timers();
        self
    }

    pub fn run_all_ticks(&self) -> Result<&Self> {
        self.runtime.inner.environment.fake_timers().run_all_ticks()?;
        Ok(self)
    }

    pub fn run_all_immediates(&self) -> Result<&Self> {
        self.runtime
            .inner
            .environment
            .fake_timers()
            .run_all_immediates()?;
        Ok(self)
    }

    pub fn run_all_timers(&self) -> Result<&Self> {
        self.runtime.inner.environment.fake_timers().run_all_timers()?;
        Ok(self)
    }

    pub fn run_only_pending_timers(&self) -> Result<&Self> {
        self.runtime
            .inner
            .environment
            .fake_timers()
            .run_only_pending_timers()?;
        Ok(self)
    }

    /// Install assertion matchers into the globally exposed test-spec
    /// framework bag.
    pub fn add_matchers(&self, matchers: Value) -> &Self {
        if let Some(global) = self.runtime.inner.environment.global() {
            let framework = global.get(TEST_FRAMEWORK_KEY);
            let installed = framework.get(MATCHERS_KEY);
            for (name, matcher) in matchers.entries() {
                installed.set(name, matcher);
            }
        }
        self
    }

    /// Frozen shallow clone of the configured test-environment data.
    pub fn get_test_env_data(&self) -> Value {
        let data = Value::object_from(
            self.runtime
                .inner
                .config
                .test_env_data
                .iter()
                .map(|(key, entry)| (key.clone(), Value::from_json(entry))),
        );
        data.freeze();
        data
    }
}
