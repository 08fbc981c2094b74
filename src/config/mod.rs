use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Runtime configuration. Loadable from a TOML or JSON file; every field
/// has a default so partial files are fine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Root of the project tree; resolution, discovery and relative error
    /// paths are computed against it.
    pub root_dir: PathBuf,
    /// Directory for the haste-map cache file.
    pub cache_directory: PathBuf,
    /// When false, any existing haste cache is discarded on build.
    pub cache: bool,
    /// Global automock switch: deliver generated mocks unless told otherwise.
    pub automock: bool,
    /// Pattern selecting manual-mock files.
    pub mocks_pattern: String,
    /// Pattern selecting test files. Slashes are rewritten to the host path
    /// separator before compilation.
    pub test_regex: String,
    pub coverage_path_ignore_patterns: Vec<String>,
    /// Modules matching any of these patterns are never automocked.
    pub unmocked_module_path_patterns: Vec<String>,
    pub collect_coverage: bool,
    /// Optional allow-list: when present, only these files are instrumented.
    pub collect_coverage_only_from: Option<Vec<PathBuf>>,
    /// Collector implementation to instantiate per instrumented file.
    pub coverage_collector: Option<String>,
    /// Files required before the test file, with automock suppressed for
    /// any of them living under node_modules.
    pub setup_files: Vec<PathBuf>,
    /// Name of the source preprocessor; mentioned in syntax-error guidance.
    pub script_preprocessor: Option<String>,
    /// Extensions tried during resolution, in order.
    pub module_file_extensions: Vec<String>,
    /// Opaque per-environment data exposed (frozen) through the facade.
    pub test_env_data: serde_json::Map<String, serde_json::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            cache_directory: default_cache_directory(),
            cache: true,
            automock: false,
            mocks_pattern: "__mocks__".to_string(),
            test_regex: "__tests__/.*\\.js$".to_string(),
            coverage_path_ignore_patterns: vec!["/node_modules/".to_string()],
            unmocked_module_path_patterns: Vec::new(),
            collect_coverage: false,
            collect_coverage_only_from: None,
            coverage_collector: None,
            setup_files: Vec::new(),
            script_preprocessor: None,
            module_file_extensions: vec![
                "js".to_string(),
                "json".to_string(),
                "node".to_string(),
            ],
            test_env_data: serde_json::Map::new(),
        }
    }
}

impl Config {
    /// Load a configuration file, dispatching on its extension.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;

        let mut config: Config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&text)
                .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?,
            _ => toml::from_str(&text)
                .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?,
        };

        // Relative root is anchored at the config file's directory.
        if config.root_dir.is_relative() {
            if let Some(dir) = path.parent() {
                config.root_dir = dir.join(&config.root_dir);
            }
        }

        Ok(config)
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root_dir = root.into();
        self
    }

    /// Key under which the compiled unmock pattern is memoised; two
    /// configurations with the same pattern list share a compiled regex.
    pub fn unmock_cache_key(&self) -> String {
        self.unmocked_module_path_patterns.join("\u{0}")
    }
}

fn default_cache_directory() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("testrig")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.cache);
        assert!(!config.automock);
        assert_eq!(config.mocks_pattern, "__mocks__");
        assert!(config.module_file_extensions.contains(&"json".to_string()));
    }

    #[test]
    fn test_unmock_cache_key_distinguishes_patterns() {
        let mut a = Config::default();
        let mut b = Config::default();
        a.unmocked_module_path_patterns = vec!["react".to_string()];
        b.unmocked_module_path_patterns = vec!["redux".to_string()];
        assert_ne!(a.unmock_cache_key(), b.unmock_cache_key());
    }

    #[test]
    fn test_load_toml() {
        let dir = std::env::temp_dir().join("testrig-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("testrig.toml");
        std::fs::write(&path, "automock = true\nroot_dir = \"proj\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.automock);
        assert_eq!(config.root_dir, dir.join("proj"));
    }
}
