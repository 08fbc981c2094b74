use super::RequireFunction;
use crate::value::Value;
use ahash::AHashMap;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Filename every executed module observes on `module.parent`.
pub const SENTINEL_FILENAME: &str = "mock.js";
/// Id of the sentinel parent record.
pub const SENTINEL_ID: &str = "mockParent";

/// A loaded module. Identity is stable once the record enters the
/// registry; the exports slot stays mutable so a body can populate or
/// replace it mid-execution, which is what a re-entrant require observes
/// during a cycle.
pub struct ModuleRecord {
    pub filename: PathBuf,
    pub id: String,
    exports: RefCell<Value>,
    parent: RefCell<Option<Rc<ModuleRecord>>>,
    children: RefCell<Vec<Rc<ModuleRecord>>>,
    paths: RefCell<Vec<PathBuf>>,
    require: RefCell<Option<RequireFunction>>,
}

impl ModuleRecord {
    /// Placeholder record: empty exports, no parent, nothing attached.
    pub fn new(filename: impl Into<PathBuf>) -> Rc<Self> {
        let filename = filename.into();
        let id = filename.display().to_string();
        Rc::new(Self {
            filename,
            id,
            exports: RefCell::new(Value::object()),
            parent: RefCell::new(None),
            children: RefCell::new(Vec::new()),
            paths: RefCell::new(Vec::new()),
            require: RefCell::new(None),
        })
    }

    /// The shared parent assigned to every executed module. Its exports
    /// bag is frozen so user code cannot meaningfully mutate it.
    pub fn sentinel() -> Rc<Self> {
        let exports = Value::object();
        exports.freeze();
        Rc::new(Self {
            filename: PathBuf::from(SENTINEL_FILENAME),
            id: SENTINEL_ID.to_string(),
            exports: RefCell::new(exports),
            parent: RefCell::new(None),
            children: RefCell::new(Vec::new()),
            paths: RefCell::new(Vec::new()),
            require: RefCell::new(None),
        })
    }

    pub fn exports(&self) -> Value {
        self.exports.borrow().clone()
    }

    pub fn set_exports(&self, exports: Value) {
        *self.exports.borrow_mut() = exports;
    }

    pub fn parent(&self) -> Option<Rc<ModuleRecord>> {
        self.parent.borrow().clone()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.borrow().clone()
    }

    pub fn require_fn(&self) -> Option<RequireFunction> {
        self.require.borrow().clone()
    }

    pub fn children(&self) -> Vec<Rc<ModuleRecord>> {
        self.children.borrow().clone()
    }

    /// Populate the host-facing fields just before execution.
    pub(crate) fn attach(
        &self,
        parent: Rc<ModuleRecord>,
        paths: Vec<PathBuf>,
        require: RequireFunction,
    ) {
        *self.parent.borrow_mut() = Some(parent);
        self.children.borrow_mut().clear();
        *self.paths.borrow_mut() = paths;
        *self.require.borrow_mut() = Some(require);
    }
}

/// Real-module cache keyed by absolute path.
pub struct ModuleRegistry {
    records: RefCell<AHashMap<PathBuf, Rc<ModuleRecord>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            records: RefCell::new(AHashMap::new()),
        }
    }

    pub fn get(&self, path: &Path) -> Option<Rc<ModuleRecord>> {
        self.records.borrow().get(path).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.records.borrow().contains_key(path)
    }

    /// Placeholder-first insertion; must happen before the module body
    /// runs so re-entrant requires observe the record.
    pub fn insert(&self, record: Rc<ModuleRecord>) {
        self.records
            .borrow_mut()
            .insert(record.filename.clone(), record);
    }

    pub fn clear(&self) {
        self.records.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    /// Swap the backing table out (for automock isolation) and back in.
    pub(crate) fn swap(
        &self,
        replacement: AHashMap<PathBuf, Rc<ModuleRecord>>,
    ) -> AHashMap<PathBuf, Rc<ModuleRecord>> {
        self.records.replace(replacement)
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Delivered-mock cache keyed by serialised module identifier.
pub struct MockRegistry {
    values: RefCell<AHashMap<String, Value>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self {
            values: RefCell::new(AHashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.borrow().get(key).cloned()
    }

    pub fn insert(&self, key: String, value: Value) {
        self.values.borrow_mut().insert(key, value);
    }

    pub fn clear(&self) {
        self.values.borrow_mut().clear();
    }

    pub(crate) fn swap(&self, replacement: AHashMap<String, Value>) -> AHashMap<String, Value> {
        self.values.replace(replacement)
    }
}

impl Default for MockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_exports_are_replaceable_but_identity_is_stable() {
        let record = ModuleRecord::new("/t/a.js");
        let before = record.exports();
        before.set("n", Value::Number(1.0));
        assert_eq!(record.exports().get("n"), Value::Number(1.0));

        record.set_exports(Value::object());
        assert!(record.exports().get("n").is_undefined());
        // The earlier handle still points at the original bag.
        assert_eq!(before.get("n"), Value::Number(1.0));
    }

    #[test]
    fn test_sentinel_identity() {
        let sentinel = ModuleRecord::sentinel();
        assert_eq!(sentinel.filename, PathBuf::from(SENTINEL_FILENAME));
        assert_eq!(sentinel.id, SENTINEL_ID);
        sentinel.exports().set("x", Value::Number(1.0));
        assert!(sentinel.exports().get("x").is_undefined(), "frozen");
    }

    #[test]
    fn test_registry_swap_round_trip() {
        let registry = ModuleRegistry::new();
        registry.insert(ModuleRecord::new("/t/a.js"));

        let saved = registry.swap(AHashMap::new());
        assert!(registry.is_empty());
        registry.insert(ModuleRecord::new("/t/b.js"));

        registry.swap(saved);
        assert!(registry.contains(Path::new("/t/a.js")));
        assert!(!registry.contains(Path::new("/t/b.js")));
    }
}
