//! Sandbox environment: an isolated global bag against which transformed
//! scripts are evaluated, plus the host-module tables and fake timers the
//! runtime delegates to.

mod timers;

pub use timers::FakeTimers;

use crate::error::{Error, Result};
use crate::transform::{EvalResult, Script};
use crate::value::Value;
use ahash::AHashMap;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Global key under which the test-spec framework bag is exposed.
pub const TEST_FRAMEWORK_KEY: &str = "testFramework";
/// Key inside the framework bag receiving installed matchers.
pub const MATCHERS_KEY: &str = "matchers";
/// Global entry point invoked by registry reset to drop timer state.
pub const CLEAR_TIMERS_KEY: &str = "mockClearTimers";

/// The evaluation context shared by every module of a test file. Holds
/// the global bag (`None` once torn down), the core/native module tables
/// consulted by the host-loader delegation paths, and the fake timers.
pub struct SandboxEnvironment {
    global: RefCell<Option<Value>>,
    fake_timers: FakeTimers,
    core_modules: RefCell<AHashMap<String, Value>>,
    native_addons: RefCell<AHashMap<PathBuf, Value>>,
}

impl SandboxEnvironment {
    pub fn new() -> Rc<Self> {
        let fake_timers = FakeTimers::new();
        let global = Value::object();

        let framework = Value::object();
        framework.set(MATCHERS_KEY, Value::object());
        global.set(TEST_FRAMEWORK_KEY, framework);

        let timers = fake_timers.clone();
        global.set(
            CLEAR_TIMERS_KEY,
            Value::function(CLEAR_TIMERS_KEY, move |_| {
                timers.clear_all_timers();
                Ok(Value::Undefined)
            }),
        );

        Rc::new(Self {
            global: RefCell::new(Some(global)),
            fake_timers,
            core_modules: RefCell::new(AHashMap::new()),
            native_addons: RefCell::new(AHashMap::new()),
        })
    }

    /// The sandbox global, or `None` after teardown.
    pub fn global(&self) -> Option<Value> {
        self.global.borrow().clone()
    }

    pub fn teardown(&self) {
        *self.global.borrow_mut() = None;
    }

    pub fn is_torn_down(&self) -> bool {
        self.global.borrow().is_none()
    }

    /// Evaluate a transformed script. The result table carries the module
    /// wrapper under the property the transformer names.
    pub fn run_script(&self, script: &Script) -> Result<EvalResult> {
        if self.is_torn_down() {
            return Err(Error::execution(
                "sandbox environment has been torn down",
            ));
        }
        Ok(script.evaluate())
    }

    /// The sandbox's JSON parser, used for data modules.
    pub fn parse_json(&self, text: &str) -> Result<Value> {
        let json: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| Error::syntax(format!("invalid JSON module: {}", e)))?;
        Ok(Value::from_json(&json))
    }

    pub fn register_core_module(&self, name: impl Into<String>, exports: Value) {
        self.core_modules.borrow_mut().insert(name.into(), exports);
    }

    pub fn core_module(&self, name: &str) -> Option<Value> {
        self.core_modules.borrow().get(name).cloned()
    }

    pub fn core_module_names(&self) -> Vec<String> {
        self.core_modules.borrow().keys().cloned().collect()
    }

    /// Opaque passthrough for native add-ons: whatever was registered for
    /// the path, otherwise an empty bag.
    pub fn register_native_addon(&self, path: impl Into<PathBuf>, exports: Value) {
        self.native_addons.borrow_mut().insert(path.into(), exports);
    }

    pub fn native_addon(&self, path: &Path) -> Value {
        self.native_addons
            .borrow()
            .get(path)
            .cloned()
            .unwrap_or_else(Value::object)
    }

    pub fn fake_timers(&self) -> &FakeTimers {
        &self.fake_timers
    }
}
