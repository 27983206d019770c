//! Turns raw `go test -v` output into a [`TestResult`].
//!
//! Classification is a set union per status: a test seen as both PASS and
//! FAIL in the same output lands in both lists. Nothing is collapsed by
//! precedence, so re-runs and flakes stay visible.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;
use tracing::warn;

use crate::result::TestResult;

fn test_results_expression() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^--- (PASS|FAIL|SKIP): (TestAcc\w+)").expect("static regex compiles")
    })
}

fn subtest_results_expression() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^    --- (PASS|FAIL|SKIP): (TestAcc\w+)/(\w+)")
            .expect("static regex compiles")
    })
}

fn test_panic_expression() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^panic: .*").expect("static regex compiles"))
}

fn take(sets: &mut BTreeMap<&str, BTreeSet<String>>, status: &str) -> Vec<String> {
    sets.remove(status)
        .map(|set| set.into_iter().collect())
        .unwrap_or_default()
}

/// Classify every result marker and panic line in `output`.
pub fn collect_result(output: &str) -> TestResult {
    let mut tests: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for caps in test_results_expression().captures_iter(output) {
        let (Some(status), Some(name)) = (caps.get(1), caps.get(2)) else {
            warn!(matched = %&caps[0], "unexpected regex match found in test output");
            continue;
        };
        tests
            .entry(status.as_str())
            .or_default()
            .insert(name.as_str().to_string());
    }

    let mut subtests: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for caps in subtest_results_expression().captures_iter(output) {
        let (Some(status), Some(test), Some(sub)) = (caps.get(1), caps.get(2), caps.get(3)) else {
            warn!(matched = %&caps[0], "unexpected regex match found in test output");
            continue;
        };
        subtests
            .entry(status.as_str())
            .or_default()
            .insert(format!("{}__{}", test.as_str(), sub.as_str()));
    }

    let mut panics: Vec<String> = test_panic_expression()
        .find_iter(output)
        .map(|m| m.as_str().trim_end_matches('\r').to_string())
        .collect();
    panics.sort();

    TestResult {
        passed_tests: take(&mut tests, "PASS"),
        skipped_tests: take(&mut tests, "SKIP"),
        failed_tests: take(&mut tests, "FAIL"),
        passed_subtests: take(&mut subtests, "PASS"),
        skipped_subtests: take(&mut subtests, "SKIP"),
        failed_subtests: take(&mut subtests, "FAIL"),
        panics,
    }
}
