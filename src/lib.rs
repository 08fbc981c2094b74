pub mod config;
pub mod coverage;
pub mod error;
pub mod mocker;
pub mod resolver;
pub mod runtime;
pub mod sandbox;
pub mod testing;
pub mod transform;
pub mod value;

pub use config::Config;
pub use coverage::{CoverageCollector, LineCollector, COVERAGE_STORE_KEY};
pub use error::{Error, ErrorKind, Result};
pub use mocker::{MockFn, MockMetadata, Mocker};
pub use resolver::{
    build_haste_map, BuildOptions, BuiltHasteMap, FileResolver, HasteMap, Resolver,
};
pub use runtime::{
    virtual_mock_path, LoadMode, MockOptions, ModuleId, ModuleKind, ModuleRecord,
    RequireFunction, Runtime, SharedContext, TestFacade, SENTINEL_FILENAME, SENTINEL_ID,
};
pub use sandbox::{FakeTimers, SandboxEnvironment};
pub use testing::{
    cli_options, run_cli, CliOptions, ConsoleReporter, TestDiscovery, TestReporter, TestResult,
    TestStatus, TestSummary,
};
pub use transform::{
    ModuleScope, ModuleWrapper, Script, SourceTransformer, TransformOptions, Transformer,
    WRAPPER_KEY,
};
pub use value::Value;
