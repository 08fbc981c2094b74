mod haste;

pub use haste::{build_haste_map, BuildOptions, BuiltHasteMap, HasteError, HasteMap};

use crate::config::Config;
use crate::error::{Error, Result};
use ahash::AHashSet;
use log::trace;
use std::path::{Component, Path, PathBuf};

/// Resolution contract consumed by the runtime. Implementations map
/// specifiers to absolute paths and classify built-ins.
pub trait Resolver {
    /// Resolve a specifier relative to the requesting file. Errors when no
    /// candidate file exists.
    fn resolve_module(&self, from: &Path, specifier: &str) -> Result<PathBuf>;

    /// Haste-map lookup by bare module name.
    fn get_module(&self, name: &str) -> Option<PathBuf>;

    /// Manual-mock lookup by bare module name.
    fn get_mock_module(&self, name: &str) -> Option<PathBuf>;

    /// Whether the specifier names a module supplied by the host
    /// environment rather than a file.
    fn is_core_module(&self, specifier: &str) -> bool;

    /// Search-path list for a directory: `node_modules` in it and every
    /// ancestor.
    fn get_module_paths(&self, dir: &Path) -> Vec<PathBuf>;
}

/// Filesystem resolver backed by a built haste map.
#[derive(Debug)]
pub struct FileResolver {
    haste: HasteMap,
    extensions: Vec<String>,
    core_modules: AHashSet<String>,
}

impl FileResolver {
    pub fn new(haste: HasteMap, config: &Config) -> Self {
        Self {
            haste,
            extensions: config.module_file_extensions.clone(),
            core_modules: AHashSet::new(),
        }
    }

    /// Names delivered by the host loader instead of the filesystem.
    pub fn with_core_modules<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.core_modules = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn haste(&self) -> &HasteMap {
        &self.haste
    }

    /// Probe a path candidate: as given (when it already has an
    /// extension), with each configured extension appended, then as a
    /// directory with an index file.
    fn try_file(&self, candidate: &Path) -> Option<PathBuf> {
        if candidate.extension().is_some() && candidate.is_file() {
            return Some(candidate.to_path_buf());
        }
        let display = candidate.to_string_lossy();
        for ext in &self.extensions {
            let with_ext = PathBuf::from(format!("{}.{}", display, ext));
            if with_ext.is_file() {
                return Some(with_ext);
            }
        }
        for ext in &self.extensions {
            let index = candidate.join(format!("index.{}", ext));
            if index.is_file() {
                return Some(index);
            }
        }
        None
    }
}

impl Resolver for FileResolver {
    fn resolve_module(&self, from: &Path, specifier: &str) -> Result<PathBuf> {
        let spec_path = Path::new(specifier);
        let resolved = if specifier.starts_with('.') || spec_path.is_absolute() {
            let base = if spec_path.is_absolute() {
                spec_path.to_path_buf()
            } else {
                from.parent().unwrap_or(Path::new("/")).join(spec_path)
            };
            self.try_file(&normalize_path(&base))
        } else if let Some(path) = self.haste.module(specifier) {
            Some(path)
        } else {
            let start = from.parent().unwrap_or(Path::new("/"));
            self.get_module_paths(start)
                .iter()
                .find_map(|dir| self.try_file(&dir.join(specifier)))
        };

        match resolved {
            Some(path) => {
                trace!("resolved '{}' from {} -> {}", specifier, from.display(), path.display());
                Ok(path)
            }
            None => Err(Error::resolution(format!(
                "cannot resolve module '{}' from {}",
                specifier,
                from.display()
            ))),
        }
    }

    fn get_module(&self, name: &str) -> Option<PathBuf> {
        self.haste.module(name)
    }

    fn get_mock_module(&self, name: &str) -> Option<PathBuf> {
        self.haste.mock(name)
    }

    fn is_core_module(&self, specifier: &str) -> bool {
        self.core_modules.contains(specifier)
    }

    fn get_module_paths(&self, dir: &Path) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        let mut current = Some(dir);
        while let Some(ancestor) = current {
            if ancestor.file_name().map_or(true, |n| n != "node_modules") {
                paths.push(ancestor.join("node_modules"));
            }
            current = ancestor.parent();
        }
        paths
    }
}

/// Lexical normalisation: folds `.` and `..` without touching the
/// filesystem, so virtual paths normalise the same way real ones do.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/t/sub/../b/./c")),
            PathBuf::from("/t/b/c")
        );
        assert_eq!(normalize_path(Path::new("/t/./a.js")), PathBuf::from("/t/a.js"));
    }

    #[test]
    fn test_module_paths_walk_ancestors() {
        let resolver = FileResolver::new(HasteMap::empty(), &Config::default());
        let paths = resolver.get_module_paths(Path::new("/p/node_modules/a/lib"));
        assert!(paths.contains(&PathBuf::from("/p/node_modules/a/lib/node_modules")));
        assert!(paths.contains(&PathBuf::from("/p/node_modules")));
        // A `node_modules` directory itself is not doubled.
        assert!(!paths.contains(&PathBuf::from("/p/node_modules/node_modules")));
    }

    #[test]
    fn test_core_module_classification() {
        let resolver = FileResolver::new(HasteMap::empty(), &Config::default())
            .with_core_modules(["fs", "path"]);
        assert!(resolver.is_core_module("fs"));
        assert!(!resolver.is_core_module("./fs"));
    }
}
