//! Test discovery and the console runner built on the runtime core.

mod cli;

pub use cli::{cli_options, run_cli, CliOptions};

use crate::config::Config;
use crate::error::{Error, Result};
use colored::Colorize;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::time::Duration;

/// Finds test files under a root by the configured test pattern,
/// skipping manual-mock files and node_modules.
pub struct TestDiscovery {
    test_regex: Regex,
    mocks_regex: Option<Regex>,
}

impl TestDiscovery {
    pub fn new(config: &Config) -> Result<Self> {
        let rewritten = config.test_regex.replace('/', &MAIN_SEPARATOR.to_string());
        let test_regex = Regex::new(&rewritten)
            .map_err(|e| Error::config(format!("bad test_regex: {}", e)))?;
        let mocks_regex = if config.mocks_pattern.is_empty() {
            None
        } else {
            Some(
                Regex::new(&config.mocks_pattern)
                    .map_err(|e| Error::config(format!("bad mocks_pattern: {}", e)))?,
            )
        };
        Ok(Self {
            test_regex,
            mocks_regex,
        })
    }

    pub fn discover(&self, root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_entry(|entry| {
                entry.file_name().to_str().map_or(true, |name| {
                    !name.starts_with('.') && name != "node_modules"
                })
            })
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                let display = path.to_string_lossy();
                self.test_regex.is_match(&display)
                    && self
                        .mocks_regex
                        .as_ref()
                        .map_or(true, |re| !re.is_match(&display))
            })
            .collect();
        files.sort();
        files
    }
}

#[derive(Debug, Clone)]
pub enum TestStatus {
    Passed,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct TestResult {
    pub file: PathBuf,
    pub status: TestStatus,
    pub duration: Duration,
}

/// Summary of a run.
#[derive(Debug, Clone)]
pub struct TestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration: Duration,
}

impl TestSummary {
    pub fn from_results(results: &[TestResult]) -> Self {
        let total = results.len();
        let passed = results
            .iter()
            .filter(|r| matches!(r.status, TestStatus::Passed))
            .count();
        let failed = results
            .iter()
            .filter(|r| matches!(r.status, TestStatus::Failed(_)))
            .count();
        let duration = results.iter().map(|r| r.duration).sum();

        Self {
            total,
            passed,
            failed,
            duration,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.total > 0
    }
}

impl fmt::Display for TestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Test Summary: {} total, {} passed, {} failed ({:.2}s)",
            self.total,
            self.passed,
            self.failed,
            self.duration.as_secs_f64()
        )
    }
}

/// Reporter contract; the runner drives one per run.
pub trait TestReporter {
    fn report_results(&self, results: &[TestResult]);
}

/// Coloured per-file lines plus the summary.
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    pub verbose: bool,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TestReporter for ConsoleReporter {
    fn report_results(&self, results: &[TestResult]) {
        for result in results {
            match &result.status {
                TestStatus::Passed => {
                    println!("{} {}", "PASS".green().bold(), result.file.display());
                }
                TestStatus::Failed(message) => {
                    println!("{} {}", "FAIL".red().bold(), result.file.display());
                    println!("  {}", message);
                }
            }
        }
        let summary = TestSummary::from_results(results);
        let line = summary.to_string();
        if summary.all_passed() {
            println!("{}", line.green());
        } else if summary.failed > 0 {
            println!("{}", line.red());
        } else {
            println!("{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let results = vec![
            TestResult {
                file: PathBuf::from("/t/__tests__/a.js"),
                status: TestStatus::Passed,
                duration: Duration::from_millis(5),
            },
            TestResult {
                file: PathBuf::from("/t/__tests__/b.js"),
                status: TestStatus::Failed("boom".to_string()),
                duration: Duration::from_millis(7),
            },
        ];
        let summary = TestSummary::from_results(&results);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.all_passed());
    }

    #[test]
    fn test_empty_run_never_passes() {
        let summary = TestSummary::from_results(&[]);
        assert!(!summary.all_passed());
    }

    #[test]
    fn test_discovery_filters_mocks() {
        let base = std::env::temp_dir().join("testrig-discovery-test");
        let _ = std::fs::remove_dir_all(&base);
        std::fs::create_dir_all(base.join("__tests__")).unwrap();
        std::fs::create_dir_all(base.join("__mocks__/__tests__")).unwrap();
        std::fs::write(base.join("__tests__/a.js"), "exports.ok = true;\n").unwrap();
        std::fs::write(base.join("lib.js"), "exports.l = 1;\n").unwrap();
        std::fs::write(
            base.join("__mocks__/__tests__/a.js"),
            "exports.ok = false;\n",
        )
        .unwrap();

        let discovery = TestDiscovery::new(&Config::default()).unwrap();
        let found = discovery.discover(&base);
        assert_eq!(found, vec![base.join("__tests__/a.js")]);
    }
}
