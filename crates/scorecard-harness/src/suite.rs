//! Weighted test suites
//!
//! A suite runs its tests strictly in declared order against one
//! [`RunContext`]. Test errors abort the suite; deficiencies come back as
//! scores. Records live as long as the suite, so running it once per CR
//! accumulates results across CRs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, error, info};

use scorecard_common::Error;

use crate::context::RunContext;
use crate::score::{Score, TestInfo, TestOutcome, TestRecord};

/// Total of all weights in a suite
pub const WEIGHT_TOTAL: u32 = 100;

/// A single conformance check
#[async_trait]
pub trait ScorecardTest: Send + Sync {
    /// Name, description and aggregation mode
    fn info(&self) -> TestInfo;

    /// Run the check once.
    ///
    /// Return `Err` only for infrastructure failures; a missing field or
    /// behavior is a low score with suggestions.
    async fn run(&self, ctx: &RunContext) -> Result<TestOutcome, Error>;
}

struct SuiteEntry {
    test: Box<dyn ScorecardTest>,
    weight: u32,
    record: TestRecord,
}

/// Ordered, weighted collection of tests
pub struct TestSuite {
    name: String,
    description: String,
    entries: Vec<SuiteEntry>,
}

impl TestSuite {
    /// Build a suite from `(test, weight)` pairs.
    ///
    /// Fails if weights do not sum to 100 or two tests share a name.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        tests: Vec<(Box<dyn ScorecardTest>, u32)>,
    ) -> Result<Self, Error> {
        let suite = Self {
            name: name.into(),
            description: description.into(),
            entries: tests
                .into_iter()
                .map(|(test, weight)| {
                    let record = TestRecord::new(test.info());
                    SuiteEntry {
                        test,
                        weight,
                        record,
                    }
                })
                .collect(),
        };
        suite.validate_weights()?;
        Ok(suite)
    }

    /// Suite name used in reports
    pub fn name(&self) -> &str {
        &self.name
    }

    /// One-line summary of the suite
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Weight per test name
    pub fn weights(&self) -> BTreeMap<String, u32> {
        self.entries
            .iter()
            .map(|e| (e.record.info.name.clone(), e.weight))
            .collect()
    }

    /// Check the weights sum to exactly 100 with one weight per test
    pub fn validate_weights(&self) -> Result<(), Error> {
        let weights = self.weights();
        if weights.len() != self.entries.len() {
            return Err(Error::internal_with_context(
                "suite",
                format!("suite '{}' has duplicate test names", self.name),
            ));
        }
        let sum: u32 = weights.values().sum();
        if sum != WEIGHT_TOTAL {
            return Err(Error::internal_with_context(
                "suite",
                format!(
                    "weights of suite '{}' sum to {}, expected {}",
                    self.name, sum, WEIGHT_TOTAL
                ),
            ));
        }
        Ok(())
    }

    /// Run every test once, in order, against `ctx`
    pub async fn run(&mut self, ctx: &RunContext) -> Result<(), Error> {
        info!(suite = %self.name, cr = %ctx.cr_key, "running suite");
        for entry in &mut self.entries {
            let name = entry.record.info.name.clone();
            debug!(suite = %self.name, test = %name, "running test");
            let outcome = entry.test.run(ctx).await.inspect_err(|e| {
                error!(suite = %self.name, test = %name, error = %e, "test aborted suite");
            })?;
            info!(
                suite = %self.name,
                test = %name,
                earned = outcome.score.earned,
                maximum = outcome.score.maximum,
                "test finished"
            );
            entry.record.push(outcome);
        }
        Ok(())
    }

    /// Records with their weights, in declared order
    pub fn records(&self) -> impl Iterator<Item = (&TestRecord, u32)> {
        self.entries.iter().map(|e| (&e.record, e.weight))
    }

    /// Weighted percentage across tests with a non-zero maximum, truncated.
    ///
    /// Tests whose total maximum is 0 are N/A and contribute nothing.
    pub fn total_percent(&self) -> u32 {
        let sum: f64 = self
            .records()
            .filter_map(|(record, weight)| {
                let total: Score = record.total();
                total.ratio().map(|r| r * f64::from(weight))
            })
            .sum();
        // absorb float error before truncating (e.g. 2/3 * 24)
        (sum + 1e-9).floor() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApi;
    use crate::testing::{memcached_cr, memcached_key};
    use rstest::rstest;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Test double returning scripted outcomes and logging its invocations
    struct Scripted {
        name: &'static str,
        cumulative: bool,
        outcomes: Mutex<VecDeque<Result<TestOutcome, Error>>>,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Scripted {
        fn new(
            name: &'static str,
            cumulative: bool,
            outcomes: Vec<Result<TestOutcome, Error>>,
            calls: &Arc<Mutex<Vec<&'static str>>>,
        ) -> Box<dyn ScorecardTest> {
            Box::new(Self {
                name,
                cumulative,
                outcomes: Mutex::new(outcomes.into()),
                calls: Arc::clone(calls),
            })
        }
    }

    #[async_trait]
    impl ScorecardTest for Scripted {
        fn info(&self) -> TestInfo {
            TestInfo {
                name: self.name.to_string(),
                description: String::new(),
                cumulative: self.cumulative,
            }
        }

        async fn run(&self, _ctx: &RunContext) -> Result<TestOutcome, Error> {
            self.calls.lock().unwrap().push(self.name);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(TestOutcome::new(Score::pass())))
        }
    }

    fn ctx() -> RunContext {
        RunContext::new(
            Arc::new(MockClusterApi::new()),
            "scorecard",
            memcached_key(),
            memcached_cr(),
            Default::default(),
        )
    }

    fn ok(earned: u32, maximum: u32) -> Result<TestOutcome, Error> {
        Ok(TestOutcome::new(Score::new(earned, maximum)))
    }

    fn calls() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[rstest]
    #[case::exact(vec![60, 40], true)]
    #[case::short(vec![60, 39], false)]
    #[case::over(vec![60, 41], false)]
    #[case::single(vec![100], true)]
    fn test_weights_must_sum_to_100(#[case] weights: Vec<u32>, #[case] valid: bool) {
        let c = calls();
        let names = ["a", "b", "c"];
        let tests = weights
            .into_iter()
            .enumerate()
            .map(|(i, w)| (Scripted::new(names[i], false, vec![], &c), w))
            .collect();
        assert_eq!(TestSuite::new("s", "", tests).is_ok(), valid);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let c = calls();
        let tests = vec![
            (Scripted::new("a", false, vec![], &c), 50),
            (Scripted::new("a", false, vec![], &c), 50),
        ];
        assert!(TestSuite::new("s", "", tests).is_err());
    }

    #[tokio::test]
    async fn test_runs_in_declared_order_and_weights_total() {
        let c = calls();
        let mut suite = TestSuite::new(
            "Basic Tests",
            "",
            vec![
                (Scripted::new("spec", false, vec![ok(1, 1)], &c), 34),
                (Scripted::new("status", false, vec![ok(0, 1)], &c), 22),
                (Scripted::new("update", false, vec![ok(0, 0)], &c), 22),
                (Scripted::new("writes", false, vec![ok(1, 1)], &c), 22),
            ],
        )
        .unwrap();

        suite.run(&ctx()).await.unwrap();
        assert_eq!(*c.lock().unwrap(), vec!["spec", "status", "update", "writes"]);
        // update is N/A and contributes nothing
        assert_eq!(suite.total_percent(), 56);
    }

    #[tokio::test]
    async fn test_error_aborts_remaining_tests() {
        let c = calls();
        let mut suite = TestSuite::new(
            "s",
            "",
            vec![
                (Scripted::new("first", false, vec![ok(1, 1)], &c), 50),
                (
                    Scripted::new(
                        "broken",
                        false,
                        vec![Err(Error::internal("api server unreachable"))],
                        &c,
                    ),
                    25,
                ),
                (Scripted::new("never", false, vec![], &c), 25),
            ],
        )
        .unwrap();

        let err = suite.run(&ctx()).await.unwrap_err();
        assert!(err.to_string().contains("unreachable"));
        assert_eq!(*c.lock().unwrap(), vec!["first", "broken"]);
    }

    #[tokio::test]
    async fn test_fractional_scores_use_float_division() {
        let c = calls();
        let mut suite = TestSuite::new(
            "s",
            "",
            vec![
                (Scripted::new("a", true, vec![ok(2, 3)], &c), 24),
                (Scripted::new("b", true, vec![ok(1, 2)], &c), 76),
            ],
        )
        .unwrap();
        suite.run(&ctx()).await.unwrap();
        // 2/3 * 24 + 1/2 * 76 = 16 + 38
        assert_eq!(suite.total_percent(), 54);
    }

    #[tokio::test]
    async fn test_records_accumulate_across_runs() {
        let c = calls();
        let mut suite = TestSuite::new(
            "s",
            "",
            vec![
                (Scripted::new("pf", false, vec![ok(1, 1), ok(0, 1)], &c), 50),
                (Scripted::new("cum", true, vec![ok(1, 1), ok(0, 1)], &c), 50),
            ],
        )
        .unwrap();
        suite.run(&ctx()).await.unwrap();
        assert_eq!(suite.total_percent(), 100);
        suite.run(&ctx()).await.unwrap();

        let totals: Vec<Score> = suite.records().map(|(r, _)| r.total()).collect();
        assert_eq!(totals, vec![Score::fail(), Score::new(1, 2)]);
        assert_eq!(suite.total_percent(), 25);
    }

    #[test]
    fn test_nothing_run_is_zero_percent() {
        let c = calls();
        let suite =
            TestSuite::new("s", "", vec![(Scripted::new("a", false, vec![], &c), 100)]).unwrap();
        assert_eq!(suite.total_percent(), 0);
    }
}
