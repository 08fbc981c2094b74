//! Coverage collection: a per-file collector annotates source on its way
//! through the transformer and accumulates runtime data in a store that
//! the sandboxed module writes into.

use crate::value::Value;
use std::path::Path;

/// Fixed symbol under which instrumented source addresses its store.
pub const COVERAGE_STORE_KEY: &str = "__coverage__";

/// Pragma a collector prepends to instrumented source. The evaluator
/// records executed line numbers when it sees it.
pub const COVERAGE_PRAGMA: &str = "// @coverage";

/// Per-file collector contract.
pub trait CoverageCollector {
    /// The mutable store handed to the module being measured.
    fn coverage_data_store(&self) -> Value;

    /// Annotate source so its evaluation reports into the store named by
    /// `store_key`.
    fn instrumented_source(&self, source: &str, filename: &Path, store_key: &str) -> String;

    /// Pull the accumulated runtime data out of the store.
    fn extract_runtime_coverage_info(&self) -> Vec<u32>;
}

/// Line collector: records the line number of every executed statement.
pub struct LineCollector {
    store: Value,
}

impl Default for LineCollector {
    fn default() -> Self {
        let store = Value::object();
        store.set("lines", Value::array(Vec::new()));
        Self { store }
    }
}

impl CoverageCollector for LineCollector {
    fn coverage_data_store(&self) -> Value {
        self.store.clone()
    }

    fn instrumented_source(&self, source: &str, filename: &Path, store_key: &str) -> String {
        format!(
            "{} {} {}\n{}",
            COVERAGE_PRAGMA,
            store_key,
            filename.display(),
            source
        )
    }

    fn extract_runtime_coverage_info(&self) -> Vec<u32> {
        let mut lines: Vec<u32> = match self.store.get("lines") {
            Value::Array(items) => items
                .borrow()
                .iter()
                .filter_map(|v| v.as_number())
                .map(|n| n as u32)
                .collect(),
            _ => Vec::new(),
        };
        lines.sort_unstable();
        lines.dedup();
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_instrumented_source_carries_pragma() {
        let collector = LineCollector::default();
        let out = collector.instrumented_source(
            "exports.a = 1;",
            &PathBuf::from("/t/a.js"),
            COVERAGE_STORE_KEY,
        );
        assert!(out.starts_with(COVERAGE_PRAGMA));
        assert!(out.ends_with("exports.a = 1;"));
    }

    #[test]
    fn test_extract_sorts_and_dedups() {
        let collector = LineCollector::default();
        let store = collector.coverage_data_store();
        for line in [3.0, 1.0, 3.0, 2.0] {
            store.get("lines").push(Value::Number(line));
        }
        assert_eq!(collector.extract_runtime_coverage_info(), vec![1, 2, 3]);
    }
}
