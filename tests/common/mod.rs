//! Fixture trees for integration tests: a temp directory the resolver
//! scans, plus helpers that wire a runtime over it.

use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;
use testrig::{
    build_haste_map, BuildOptions, Config, Resolver, Runtime, SandboxEnvironment,
    SharedContext, SourceTransformer,
};

pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("fixture tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file under the fixture root, creating parent directories.
    pub fn file(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("fixture dirs");
        }
        std::fs::write(&path, contents).expect("fixture file");
        path
    }

    /// A path under the root that need not exist; used as a requesting
    /// file.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root().join(relative)
    }

    pub fn config(&self) -> Config {
        let mut config = Config::default().with_root(self.root());
        config.cache_directory = self.root().join(".testrig-cache");
        config
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime_with(|_| {})
    }

    pub fn runtime_with(&self, tweak: impl FnOnce(&mut Config)) -> Runtime {
        let mut config = self.config();
        tweak(&mut config);
        self.runtime_from(config)
    }

    pub fn runtime_from(&self, config: Config) -> Runtime {
        let built = build_haste_map(
            &config,
            BuildOptions {
                max_workers: 2,
                ..BuildOptions::default()
            },
        )
        .expect("haste map");
        let resolver: Rc<dyn Resolver> = built.resolver;
        Runtime::new(
            config,
            SandboxEnvironment::new(),
            resolver,
            Rc::new(SourceTransformer),
            SharedContext::new(),
        )
        .expect("runtime")
    }
}
