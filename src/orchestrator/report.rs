//! Test outcomes and the run report

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::test_case::{TestName, TestStage};
use crate::common::{EngineError, ErrorCategory};
use crate::evaluator::Verdict;

/// Final classification of one test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeCategory {
    /// Every enabled verdict passed
    Passed,
    /// At least one verdict failed
    FailedMismatch,
    /// The test did not reach evaluation
    FailedError,
    /// Every expectation was disabled
    Skipped,
}

/// Error that stopped a test
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestFailure {
    pub category: ErrorCategory,
    /// Stage the test was in when it failed
    pub stage: TestStage,
    pub message: String,
}

/// Result of one test
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestOutcome {
    pub test_name: TestName,
    pub stage: TestStage,
    pub category: OutcomeCategory,
    pub verdicts: Vec<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TestFailure>,
}

impl TestOutcome {
    /// Outcome of a test that reached evaluation
    pub fn completed(test_name: TestName, verdicts: Vec<Verdict>) -> Self {
        let category = if verdicts.iter().all(Verdict::is_skipped) {
            OutcomeCategory::Skipped
        } else if verdicts.iter().all(Verdict::passed) {
            OutcomeCategory::Passed
        } else {
            OutcomeCategory::FailedMismatch
        };
        Self {
            test_name,
            stage: TestStage::Done,
            category,
            verdicts,
            error: None,
        }
    }

    /// Outcome of a test stopped by an error in `stage`
    pub fn failed(test_name: TestName, stage: TestStage, error: &EngineError) -> Self {
        Self {
            test_name,
            stage: TestStage::Failed,
            category: OutcomeCategory::FailedError,
            verdicts: Vec::new(),
            error: Some(TestFailure {
                category: error.category(),
                stage,
                message: error.to_string(),
            }),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self.category,
            OutcomeCategory::FailedMismatch | OutcomeCategory::FailedError
        )
    }
}

/// Number of tests per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportCounts {
    pub passed: usize,
    pub failed_mismatch: usize,
    pub failed_error: usize,
    pub skipped: usize,
}

/// Report of one engine run
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub outcomes: Vec<TestOutcome>,
}

impl Report {
    pub fn new(outcomes: Vec<TestOutcome>) -> Self {
        Self {
            generated_at: Utc::now(),
            outcomes,
        }
    }

    pub fn outcome(&self, test: TestName) -> Option<&TestOutcome> {
        self.outcomes.iter().find(|o| o.test_name == test)
    }

    pub fn counts(&self) -> ReportCounts {
        let mut counts = ReportCounts::default();
        for outcome in &self.outcomes {
            match outcome.category {
                OutcomeCategory::Passed => counts.passed += 1,
                OutcomeCategory::FailedMismatch => counts.failed_mismatch += 1,
                OutcomeCategory::FailedError => counts.failed_error += 1,
                OutcomeCategory::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    /// True when no test failed (skipped tests do not count as failures)
    pub fn all_passed(&self) -> bool {
        !self.outcomes.iter().any(TestOutcome::is_failure)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
