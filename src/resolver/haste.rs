//! Haste/index map: a one-pass scan of the project tree mapping bare
//! module names to files and mock names to their manual-mock files, with
//! an on-disk cache keyed by the project root.

use super::FileResolver;
use crate::config::Config;
use crate::error::{Error, Result};
use ahash::AHashMap;
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// First-line annotation declaring a module's haste name.
const MODULE_ANNOTATION: &str = "// @module ";

#[derive(Debug, thiserror::Error)]
pub enum HasteError {
    #[error("haste cache read failed: {0}")]
    CacheRead(#[from] std::io::Error),
    #[error("haste cache decode failed: {0}")]
    CacheDecode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HasteMapData {
    root: PathBuf,
    modules: AHashMap<String, PathBuf>,
    mocks: AHashMap<String, PathBuf>,
}

/// Built index over the project tree. Cheap to clone; the data is shared.
#[derive(Debug, Clone)]
pub struct HasteMap {
    data: Rc<HasteMapData>,
}

impl HasteMap {
    pub fn empty() -> Self {
        Self {
            data: Rc::new(HasteMapData {
                root: PathBuf::new(),
                modules: AHashMap::new(),
                mocks: AHashMap::new(),
            }),
        }
    }

    /// Build the map for `config.root_dir`, consulting the cache under
    /// `config.cache_directory`. The cache directory is created if
    /// missing; when `config.cache` is false any existing cache file is
    /// discarded first.
    pub fn build(config: &Config, max_workers: usize) -> Result<Self> {
        fs::create_dir_all(&config.cache_directory).map_err(|e| {
            Error::io(format!(
                "cannot create cache directory {}: {}",
                config.cache_directory.display(),
                e
            ))
        })?;

        let root = config
            .root_dir
            .canonicalize()
            .unwrap_or_else(|_| config.root_dir.clone());
        let cache_path = config
            .cache_directory
            .join(format!("haste-{}.json", digest_of(&root)));

        if !config.cache {
            let _ = fs::remove_file(&cache_path);
        } else if let Some(map) = Self::load_cache(&cache_path, &root) {
            debug!("haste map loaded from cache {}", cache_path.display());
            return Ok(map);
        }

        let map = Self::scan(config, &root, max_workers.max(1))?;
        if config.cache {
            match serde_json::to_string(&*map.data) {
                Ok(json) => {
                    if let Err(e) = fs::write(&cache_path, json) {
                        warn!("haste cache not written to {}: {}", cache_path.display(), e);
                    }
                }
                Err(e) => warn!("haste cache not encoded: {}", e),
            }
        }
        Ok(map)
    }

    fn load_cache(cache_path: &Path, root: &Path) -> Option<Self> {
        let read = || -> std::result::Result<HasteMapData, HasteError> {
            let text = fs::read_to_string(cache_path)?;
            Ok(serde_json::from_str(&text)?)
        };
        match read() {
            Ok(data) if data.root == root => Some(Self { data: Rc::new(data) }),
            Ok(_) => None,
            Err(HasteError::CacheRead(_)) => None,
            Err(e) => {
                warn!("stale haste cache at {}: {}", cache_path.display(), e);
                None
            }
        }
    }

    fn scan(config: &Config, root: &Path, max_workers: usize) -> Result<Self> {
        let mocks_re = Regex::new(&config.mocks_pattern)
            .map_err(|e| Error::config(format!("bad mocks_pattern: {}", e)))?;

        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map_or(true, |name| !name.starts_with('.'))
            })
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .map_or(false, |ext| {
                        config.module_file_extensions.iter().any(|known| known == ext)
                    })
            })
            .collect();
        files.sort();

        struct Indexed {
            name: String,
            path: PathBuf,
            is_mock: bool,
        }

        let chunk_size = files.len().div_ceil(max_workers).max(1);
        let mut indexed: Vec<Indexed> = Vec::with_capacity(files.len());
        std::thread::scope(|scope| {
            let handles: Vec<_> = files
                .chunks(chunk_size)
                .map(|chunk| {
                    let mocks_re = &mocks_re;
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|path| {
                                let is_mock = mocks_re.is_match(&path.to_string_lossy());
                                let stem = path
                                    .file_stem()
                                    .map(|s| s.to_string_lossy().into_owned())
                                    .unwrap_or_default();
                                let name = if is_mock {
                                    stem
                                } else {
                                    annotated_name(path).unwrap_or(stem)
                                };
                                Indexed {
                                    name,
                                    path: path.clone(),
                                    is_mock,
                                }
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            for handle in handles {
                if let Ok(chunk) = handle.join() {
                    indexed.extend(chunk);
                }
            }
        });

        let mut modules: AHashMap<String, PathBuf> = AHashMap::new();
        let mut mocks: AHashMap<String, PathBuf> = AHashMap::new();
        for entry in indexed {
            let table = if entry.is_mock { &mut mocks } else { &mut modules };
            if let Some(existing) = table.get(&entry.name) {
                warn!(
                    "duplicate haste name '{}': {} kept, {} ignored",
                    entry.name,
                    existing.display(),
                    entry.path.display()
                );
            } else {
                table.insert(entry.name, entry.path);
            }
        }

        debug!(
            "haste scan of {}: {} modules, {} mocks",
            root.display(),
            modules.len(),
            mocks.len()
        );
        Ok(Self {
            data: Rc::new(HasteMapData {
                root: root.to_path_buf(),
                modules,
                mocks,
            }),
        })
    }

    pub fn module(&self, name: &str) -> Option<PathBuf> {
        self.data.modules.get(name).cloned()
    }

    pub fn mock(&self, name: &str) -> Option<PathBuf> {
        self.data.mocks.get(name).cloned()
    }

    pub fn module_count(&self) -> usize {
        self.data.modules.len()
    }
}

/// Read the leading `// @module name` annotation, if any.
fn annotated_name(path: &Path) -> Option<String> {
    let file = fs::File::open(path).ok()?;
    let mut first_line = String::new();
    BufReader::new(file).read_line(&mut first_line).ok()?;
    let rest = first_line.strip_prefix(MODULE_ANNOTATION)?;
    let name = rest.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn digest_of(root: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(root.to_string_lossy().as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Options for `build_haste_map`.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub max_workers: usize,
    /// Names the resolver should classify as host-supplied.
    pub core_modules: Vec<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            max_workers: num_cpus::get(),
            core_modules: Vec::new(),
        }
    }
}

/// Result of the static haste entry point: the map plus a resolver over it.
pub struct BuiltHasteMap {
    pub map: HasteMap,
    pub resolver: Rc<FileResolver>,
}

pub fn build_haste_map(config: &Config, options: BuildOptions) -> Result<BuiltHasteMap> {
    let map = HasteMap::build(config, options.max_workers)?;
    let resolver = Rc::new(
        FileResolver::new(map.clone(), config).with_core_modules(options.core_modules),
    );
    Ok(BuiltHasteMap { map, resolver })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_config(tag: &str) -> Config {
        let base = std::env::temp_dir().join(format!("testrig-haste-{}", tag));
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(base.join("src")).unwrap();
        let mut config = Config::default().with_root(&base);
        config.cache_directory = base.join(".cache");
        config
    }

    #[test]
    fn test_scan_indexes_modules_and_mocks() {
        let config = scratch_config("scan");
        let root = &config.root_dir;
        fs::write(root.join("src/alpha.js"), "exports.a = 1;\n").unwrap();
        fs::write(root.join("src/named.js"), "// @module beta\nexports.b = 2;\n").unwrap();
        fs::create_dir_all(root.join("src/__mocks__")).unwrap();
        fs::write(root.join("src/__mocks__/alpha.js"), "exports.a = 0;\n").unwrap();

        let map = HasteMap::build(&config, 2).unwrap();
        assert!(map.module("alpha").is_some());
        assert!(map.module("beta").is_some(), "annotation name wins");
        assert!(map.module("named").is_none());
        assert!(map.mock("alpha").is_some());
        assert!(map.mock("beta").is_none());
    }

    #[test]
    fn test_cache_disabled_resets_cache_file() {
        let mut config = scratch_config("nocache");
        fs::write(config.root_dir.join("src/only.js"), "exports.x = 1;\n").unwrap();

        let _ = HasteMap::build(&config, 1).unwrap();
        let cached: Vec<_> = fs::read_dir(&config.cache_directory).unwrap().collect();
        assert_eq!(cached.len(), 1);

        config.cache = false;
        let _ = HasteMap::build(&config, 1).unwrap();
        let cached: Vec<_> = fs::read_dir(&config.cache_directory).unwrap().collect();
        assert!(cached.is_empty(), "cache reset when cache=false");
    }
}
