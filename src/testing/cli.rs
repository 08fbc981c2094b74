//! CLI entry points: option parsing, configuration loading, haste-map
//! construction, discovery and the per-file runtime loop.

use super::{ConsoleReporter, TestDiscovery, TestReporter, TestResult, TestStatus, TestSummary};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::resolver::{build_haste_map, BuildOptions, Resolver};
use crate::runtime::{Runtime, SharedContext};
use crate::sandbox::SandboxEnvironment;
use crate::transform::SourceTransformer;
use clap::{CommandFactory, Parser};
use log::debug;
use std::ffi::OsString;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

const DEFAULT_CONFIG_FILE: &str = "testrig.toml";

#[derive(Debug, Parser)]
#[command(
    name = "testrig",
    about = "Sandboxed module loader and mocking engine for test runtimes",
    version
)]
pub struct CliOptions {
    /// Configuration file (TOML or JSON); defaults to testrig.toml in the
    /// project root when present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Project root; overrides the configuration file.
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Worker threads for the haste scan.
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Collect coverage for loaded modules.
    #[arg(long)]
    pub coverage: bool,

    /// Verbose reporting.
    #[arg(short, long)]
    pub verbose: bool,

    /// Only run test files whose path contains one of these terms.
    pub patterns: Vec<String>,
}

/// The clap command definition, for embedders that compose their own
/// parsing.
pub fn cli_options() -> clap::Command {
    CliOptions::command()
}

/// Parse arguments, load configuration, build the haste map, run every
/// discovered test file in its own runtime, and report.
pub fn run_cli<I, T>(args: I) -> Result<TestSummary>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let options = CliOptions::try_parse_from(args)
        .map_err(|e| Error::config(e.to_string()))?;

    let mut config = match &options.config {
        Some(path) => Config::load(path)?,
        None => {
            let root = options
                .root
                .clone()
                .unwrap_or_else(|| PathBuf::from("."));
            let default_file = root.join(DEFAULT_CONFIG_FILE);
            if default_file.is_file() {
                Config::load(&default_file)?
            } else {
                Config::default()
            }
        }
    };
    if let Some(root) = &options.root {
        config.root_dir = root.clone();
    }
    if options.coverage {
        config.collect_coverage = true;
    }

    let max_workers = options.max_workers.unwrap_or_else(num_cpus::get);
    let built = build_haste_map(
        &config,
        BuildOptions {
            max_workers,
            ..BuildOptions::default()
        },
    )?;
    debug!(
        "haste map ready: {} modules under {}",
        built.map.module_count(),
        config.root_dir.display()
    );

    let discovery = TestDiscovery::new(&config)?;
    let files: Vec<PathBuf> = discovery
        .discover(&config.root_dir)
        .into_iter()
        .filter(|file| {
            options.patterns.is_empty()
                || options
                    .patterns
                    .iter()
                    .any(|term| file.to_string_lossy().contains(term))
        })
        .collect();

    let shared = SharedContext::new();
    let resolver: Rc<dyn Resolver> = built.resolver.clone();
    let results: Vec<TestResult> = files
        .iter()
        .map(|file| {
            let start = Instant::now();
            let status = run_test_file(&config, resolver.clone(), shared.clone(), file);
            TestResult {
                file: file.clone(),
                status,
                duration: start.elapsed(),
            }
        })
        .collect();

    let reporter = ConsoleReporter {
        verbose: options.verbose,
    };
    reporter.report_results(&results);

    Ok(TestSummary::from_results(&results))
}

/// One test file, one fresh sandbox and runtime.
fn run_test_file(
    config: &Config,
    resolver: Rc<dyn Resolver>,
    shared: Rc<SharedContext>,
    file: &PathBuf,
) -> TestStatus {
    let environment = SandboxEnvironment::new();
    let outcome = Runtime::new(
        config.clone(),
        environment,
        resolver,
        Rc::new(SourceTransformer),
        shared,
    )
    .and_then(|runtime| runtime.require_module(file, None));

    match outcome {
        Ok(_) => TestStatus::Passed,
        Err(e) => TestStatus::Failed(e.to_string()),
    }
}
