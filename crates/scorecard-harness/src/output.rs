//! Result model and rendering
//!
//! JSON output follows the `ScorecardOutput` document shape
//! (`osdk.openshift.io/v1alpha1`) so existing consumers can parse it.

use std::fmt;

use colored::Colorize;
use serde::Serialize;

use scorecard_common::Error;

use crate::score::Score;
use crate::suite::TestSuite;

/// `kind` of the JSON document
pub const OUTPUT_KIND: &str = "ScorecardOutput";
/// `apiVersion` of the JSON document
pub const OUTPUT_API_VERSION: &str = "osdk.openshift.io/v1alpha1";

/// Final state of one test
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Every point earned
    Pass,
    /// Some points earned
    PartialPass,
    /// No points earned
    Fail,
    /// Skipped because a prerequisite failed
    NotApplicable,
}

impl State {
    /// Classify a test's summed score
    pub fn of(score: Score) -> Self {
        if score.is_skipped() {
            State::NotApplicable
        } else if score.is_full() {
            State::Pass
        } else if score.earned > 0 {
            State::PartialPass
        } else {
            State::Fail
        }
    }
}

/// One test's merged outcome across every CR
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    /// Classification of the summed score
    pub state: State,
    /// Test name
    pub name: String,
    /// What the test checks
    pub description: String,
    /// Points earned, summed over CRs
    pub earned_points: u32,
    /// Points available, summed over CRs
    pub maximum_points: u32,
    /// Deduplicated, in the order first seen
    pub suggestions: Vec<String>,
}

/// One suite's results and counts by [`State`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteResult {
    /// Suite name
    pub name: String,
    /// What the suite covers
    pub description: String,
    /// Tests in [`State::Pass`]
    pub pass: usize,
    /// Tests in [`State::PartialPass`]
    pub partial_pass: usize,
    /// Tests in [`State::Fail`]
    pub fail: usize,
    /// Tests in [`State::NotApplicable`]
    pub not_applicable: usize,
    /// Number of tests
    pub total_tests: usize,
    /// Weighted percentage, 0 to 100
    #[serde(rename = "totalScorePercent")]
    pub total_score: u32,
    /// Per-test results in registration order
    pub tests: Vec<TestResult>,
    /// Always empty; the run log goes on [`ScorecardOutput`]
    pub log: String,
}

impl SuiteResult {
    /// Snapshot a suite's accumulated records
    pub fn from_suite(suite: &TestSuite) -> Self {
        let tests: Vec<TestResult> = suite
            .records()
            .map(|(record, _)| {
                let total = record.total();
                TestResult {
                    state: State::of(total),
                    name: record.info.name.clone(),
                    description: record.info.description.clone(),
                    earned_points: total.earned,
                    maximum_points: total.maximum,
                    suggestions: record.suggestions.clone(),
                }
            })
            .collect();
        let count = |state: State| tests.iter().filter(|t| t.state == state).count();

        Self {
            name: suite.name().to_string(),
            description: suite.description().to_string(),
            pass: count(State::Pass),
            partial_pass: count(State::PartialPass),
            fail: count(State::Fail),
            not_applicable: count(State::NotApplicable),
            total_tests: tests.len(),
            total_score: suite.total_percent(),
            tests,
            log: String::new(),
        }
    }
}

/// Top-level JSON document
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScorecardOutput {
    /// Always [`OUTPUT_KIND`]
    pub kind: String,
    /// Always [`OUTPUT_API_VERSION`]
    pub api_version: String,
    /// Log lines captured during the run
    pub log: String,
    /// One entry per enabled suite
    pub results: Vec<SuiteResult>,
}

impl ScorecardOutput {
    /// Document for `results` with the captured `log`
    pub fn new(results: Vec<SuiteResult>, log: impl Into<String>) -> Self {
        Self {
            kind: OUTPUT_KIND.to_string(),
            api_version: OUTPUT_API_VERSION.to_string(),
            log: log.into(),
            results,
        }
    }
}

/// Mean of the suite percentages, rounded
pub fn total_score(results: &[SuiteResult]) -> u32 {
    if results.is_empty() {
        return 0;
    }
    let sum: f64 = results.iter().map(|r| f64::from(r.total_score)).sum();
    (sum / results.len() as f64).round() as u32
}

/// Plain-text report with coloured suggestion and error lines.
///
/// Colour follows the terminal and `NO_COLOR`.
pub struct HumanReport<'a> {
    /// Suites in display order
    pub results: &'a [SuiteResult],
    /// Printed after the suggestions
    pub errors: &'a [String],
}

impl fmt::Display for HumanReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for suite in self.results {
            writeln!(f, "{}:", suite.name)?;
            for test in &suite.tests {
                if test.state == State::NotApplicable {
                    writeln!(f, "\t{}: N/A (depends on an earlier test that failed)", test.name)?;
                } else {
                    writeln!(
                        f,
                        "\t{}: {}/{}",
                        test.name, test.earned_points, test.maximum_points
                    )?;
                }
            }
            writeln!(f, "\tScore: {}%", suite.total_score)?;
        }
        writeln!(f, "\nTotal Score: {}%", total_score(self.results))?;

        for suggestion in self.results.iter().flat_map(|s| &s.tests).flat_map(|t| &t.suggestions) {
            writeln!(f, "{} {}", "SUGGESTION:".yellow(), suggestion)?;
        }
        for error in self.errors {
            writeln!(f, "{} {}", "ERROR:".red(), error)?;
        }
        Ok(())
    }
}

/// Render [`HumanReport`] to a string
pub fn render_human(results: &[SuiteResult], errors: &[String]) -> String {
    HumanReport { results, errors }.to_string()
}

/// Pretty-printed JSON document
pub fn render_json(output: &ScorecardOutput) -> Result<String, Error> {
    serde_json::to_string_pretty(output)
        .map_err(|e| Error::serialization_for_kind(OUTPUT_KIND, e.to_string()))
}
