//! Scores and per-test aggregation

use std::ops::Add;

/// Points earned out of points available for one test invocation.
///
/// `earned <= maximum` always holds. A score with `maximum == 0` means the
/// check was skipped because a prerequisite was missing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Score {
    /// Points earned
    pub earned: u32,
    /// Points available
    pub maximum: u32,
}

impl Score {
    /// Build a score, clamping `earned` to `maximum`
    pub fn new(earned: u32, maximum: u32) -> Self {
        Self {
            earned: earned.min(maximum),
            maximum,
        }
    }

    /// One of one point
    pub fn pass() -> Self {
        Self::new(1, 1)
    }

    /// Zero of one point
    pub fn fail() -> Self {
        Self::new(0, 1)
    }

    /// Prerequisite missing; reported as N/A
    pub fn skipped() -> Self {
        Self::new(0, 0)
    }

    /// Nothing was available to earn
    pub fn is_skipped(&self) -> bool {
        self.maximum == 0
    }

    /// Every available point earned (and at least one available)
    pub fn is_full(&self) -> bool {
        self.maximum > 0 && self.earned == self.maximum
    }

    /// earned / maximum, or `None` when nothing was available
    pub fn ratio(&self) -> Option<f64> {
        (self.maximum > 0).then(|| f64::from(self.earned) / f64::from(self.maximum))
    }

    /// Add one available point, earned or not
    pub fn record(&mut self, earned: bool) {
        self.maximum += 1;
        if earned {
            self.earned += 1;
        }
    }
}

impl Add for Score {
    type Output = Score;

    fn add(self, other: Score) -> Score {
        Score::new(self.earned + other.earned, self.maximum + other.maximum)
    }
}

/// Static description of a test
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestInfo {
    /// Name shown in reports; unique within a suite
    pub name: String,
    /// One-line summary of the check
    pub description: String,
    /// Sum scores across invocations instead of pass/fail
    pub cumulative: bool,
}

impl TestInfo {
    /// A test whose invocations each pass or fail
    pub fn pass_fail(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            cumulative: false,
        }
    }

    /// A test whose invocations add up
    pub fn cumulative(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            cumulative: true,
        }
    }
}

/// What one invocation of a test produced
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestOutcome {
    /// Points for this invocation
    pub score: Score,
    /// Advice for raising the score
    pub suggestions: Vec<String>,
}

impl TestOutcome {
    /// Outcome without suggestions
    pub fn new(score: Score) -> Self {
        Self {
            score,
            suggestions: Vec::new(),
        }
    }

    /// Append one suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Append several suggestions
    pub fn with_suggestions(mut self, suggestions: impl IntoIterator<Item = String>) -> Self {
        self.suggestions.extend(suggestions);
        self
    }
}

/// Scores and suggestions a test accumulated over a process lifetime
#[derive(Clone, Debug)]
pub struct TestRecord {
    /// The test's description
    pub info: TestInfo,
    /// One score per invocation, oldest first
    pub scores: Vec<Score>,
    /// Suggestions without duplicates, in first-seen order
    pub suggestions: Vec<String>,
}

impl TestRecord {
    /// Record with no invocations
    pub fn new(info: TestInfo) -> Self {
        Self {
            info,
            scores: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    /// Fold an invocation's outcome into the record
    pub fn push(&mut self, outcome: TestOutcome) {
        self.scores.push(outcome.score);
        self.suggestions.extend(outcome.suggestions);
    }

    /// Aggregate score across all recorded invocations.
    ///
    /// Cumulative tests sum earned and maximum. Pass-fail tests score 1/1 when
    /// every non-skipped invocation earned full points and 0/1 otherwise;
    /// when every invocation was skipped (or none ran) the total is 0/0.
    pub fn total(&self) -> Score {
        if self.info.cumulative {
            return self.scores.iter().copied().fold(Score::default(), Add::add);
        }

        let mut counted = self.scores.iter().filter(|s| !s.is_skipped()).peekable();
        if counted.peek().is_none() {
            return Score::skipped();
        }
        if counted.all(Score::is_full) {
            Score::pass()
        } else {
            Score::fail()
        }
    }
}
