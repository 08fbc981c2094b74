//! Module identity: the `(kind, absolute path, mock path)` triple every
//! cache in the mocking layer is keyed by, and the shared context that
//! memoises it across Runtime instances.

use super::registry::ModuleRecord;
use super::Runtime;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::resolver::normalize_path;
use ahash::AHashMap;
use regex::Regex;
use std::cell::RefCell;
use std::fmt;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::rc::Rc;

/// Host path-list separator used in serialised identifiers.
#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: char = ':';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    Core,
    User,
}

/// Canonical identity of a `(requesting file, specifier)` pair. Either
/// path slot may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleId {
    pub kind: ModuleKind,
    pub path: PathBuf,
    pub mock_path: Option<PathBuf>,
}

impl ModuleId {
    /// Serialised form used as a cache key.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ModuleKind::Core => "core",
            ModuleKind::User => "user",
        };
        write!(
            f,
            "{}{}{}{}{}",
            kind,
            PATH_LIST_SEPARATOR,
            self.path.display(),
            PATH_LIST_SEPARATOR,
            self.mock_path.as_deref().unwrap_or(Path::new("")).display()
        )
    }
}

/// Caches shared across Runtime instances: the identifier memo and the
/// per-configuration compiled unmock pattern, plus the sentinel parent
/// record. Threaded into each Runtime explicitly instead of living in a
/// process global. Resolver state is treated as immutable for the
/// lifetime of a context; the identifier memo relies on that.
pub struct SharedContext {
    id_cache: RefCell<AHashMap<String, ModuleId>>,
    unmock_regex_cache: RefCell<AHashMap<String, Option<Rc<Regex>>>>,
    sentinel: Rc<ModuleRecord>,
}

impl SharedContext {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            id_cache: RefCell::new(AHashMap::new()),
            unmock_regex_cache: RefCell::new(AHashMap::new()),
            sentinel: ModuleRecord::sentinel(),
        })
    }

    pub fn sentinel(&self) -> Rc<ModuleRecord> {
        self.sentinel.clone()
    }

    pub(crate) fn cached_id(&self, key: &str) -> Option<ModuleId> {
        self.id_cache.borrow().get(key).cloned()
    }

    pub(crate) fn memoise_id(&self, key: String, id: ModuleId) {
        self.id_cache.borrow_mut().insert(key, id);
    }

    /// Compiled unmock-list for a configuration; two Runtimes built on
    /// the same pattern list share the compiled regex.
    pub(crate) fn unmock_regex_for(&self, config: &Config) -> Result<Option<Rc<Regex>>> {
        let cache_key = config.unmock_cache_key();
        if let Some(entry) = self.unmock_regex_cache.borrow().get(&cache_key) {
            return Ok(entry.clone());
        }
        let compiled = if config.unmocked_module_path_patterns.is_empty() {
            None
        } else {
            let alternation = config.unmocked_module_path_patterns.join("|");
            Some(Rc::new(Regex::new(&alternation).map_err(|e| {
                Error::config(format!("bad unmocked_module_path_patterns: {}", e))
            })?))
        };
        self.unmock_regex_cache
            .borrow_mut()
            .insert(cache_key, compiled.clone());
        Ok(compiled)
    }
}

/// Virtual-mock candidate path for a specifier: bare names pass through
/// unchanged; relative and absolute specifiers normalise against the
/// requesting file's directory.
pub fn virtual_mock_path(from: &Path, specifier: &str) -> PathBuf {
    if !specifier.starts_with('.') && !specifier.starts_with('/') {
        return PathBuf::from(specifier);
    }
    let dir = from.parent().unwrap_or(Path::new("/"));
    normalize_path(&dir.join(specifier))
}

impl Runtime {
    /// Compute the stable identifier for a `(requesting file, specifier)`
    /// pair. Deterministic for fixed resolver state and memoised in the
    /// shared context.
    pub fn normalize_id(&self, from: &Path, specifier: Option<&str>) -> Result<ModuleId> {
        let cache_key = format!(
            "{}{}{}",
            from.display(),
            PATH_LIST_SEPARATOR,
            specifier.unwrap_or("")
        );
        if let Some(id) = self.inner.shared.cached_id(&cache_key) {
            return Ok(id);
        }

        let id = match specifier {
            None => ModuleId {
                kind: ModuleKind::User,
                path: from.to_path_buf(),
                mock_path: None,
            },
            Some(spec) if self.inner.resolver.is_core_module(spec) => ModuleId {
                kind: ModuleKind::Core,
                path: PathBuf::from(spec),
                mock_path: None,
            },
            Some(spec) => {
                let mock_path = self.inner.resolver.get_mock_module(spec);

                // A virtual path only stands in when the resolver knows
                // neither a real nor a manual-mock entry for the name.
                let mut path = None;
                if self.inner.resolver.get_module(spec).is_none() && mock_path.is_none() {
                    let candidate = virtual_mock_path(from, spec);
                    if self.inner.virtual_mocks.borrow().contains(&candidate) {
                        path = Some(candidate);
                    }
                }
                let path = match path {
                    Some(path) => path,
                    None => match self.inner.resolver.resolve_module(from, spec) {
                        Ok(path) => path,
                        // A manual mock can stand in for a module that
                        // exists only as a mock.
                        Err(e) => match &mock_path {
                            Some(mock) => mock.clone(),
                            None => return Err(e),
                        },
                    },
                };
                ModuleId {
                    kind: ModuleKind::User,
                    path,
                    mock_path,
                }
            }
        };

        self.inner.shared.memoise_id(cache_key, id.clone());
        Ok(id)
    }
}

/// Rewrites configured forward slashes to the host separator before the
/// test pattern is compiled.
pub(crate) fn compile_test_regex(pattern: &str) -> Result<Regex> {
    let rewritten = pattern.replace('/', &MAIN_SEPARATOR.to_string());
    Regex::new(&rewritten).map_err(|e| Error::config(format!("bad test_regex: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_mock_path_bare_name_passes_through() {
        assert_eq!(
            virtual_mock_path(Path::new("/t/x.js"), "nope"),
            PathBuf::from("nope")
        );
    }

    #[test]
    fn test_virtual_mock_path_relative_normalises() {
        assert_eq!(
            virtual_mock_path(Path::new("/t/sub/x.js"), "../ghost"),
            PathBuf::from("/t/ghost")
        );
        assert_eq!(
            virtual_mock_path(Path::new("/t/x.js"), "./ghost"),
            PathBuf::from("/t/ghost")
        );
    }

    #[test]
    fn test_id_key_serialises_triple() {
        let id = ModuleId {
            kind: ModuleKind::User,
            path: PathBuf::from("/t/a.js"),
            mock_path: Some(PathBuf::from("/t/__mocks__/a.js")),
        };
        let key = id.key();
        assert!(key.starts_with("user"));
        assert!(key.contains("/t/a.js"));
        assert!(key.contains("__mocks__"));
        assert_eq!(key.matches(PATH_LIST_SEPARATOR).count(), 2);
    }

    #[test]
    fn test_unmock_regex_memoised_per_configuration() {
        let shared = SharedContext::new();
        let mut config = Config::default();
        config.unmocked_module_path_patterns = vec!["react".to_string()];

        let first = shared.unmock_regex_for(&config).unwrap().unwrap();
        let second = shared.unmock_regex_for(&config).unwrap().unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert!(first.is_match("/p/node_modules/react/index.js"));
    }
}
