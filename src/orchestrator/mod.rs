//! Test case orchestration
//!
//! Runs decode → extract → aggregate → evaluate for each requested test.
//! Tests are isolated: an error stops only the test it occurred in and is
//! recorded in that test's outcome.
//!
//! # Stages
//! ```text
//! NotRun → Decoding → Extracting → Aggregating → Evaluating → Done
//!              └───────────┴────────────┴────────────┴──→ Failed
//! ```

pub mod report;
pub mod test_case;

pub use report::{OutcomeCategory, Report, ReportCounts, TestFailure, TestOutcome};
pub use test_case::{TestName, TestStage};

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::capture::CaptureSet;
use crate::common::{EngineError, EngineResult};
use crate::config::{AnalysisSettings, AutotestConfig, ConfigError, FieldLayoutTable, MarocTagTable};
use crate::decoder::{DecodeOptions, PacketDecoder, RawPacket};
use crate::evaluator::{evaluate, skip_disabled, Expectation, ExpectationTable, Verdict};
use crate::extractor::{MarocCommandBuilder, Measurement, MeasurementKind, SignalExtractor};
use crate::stats::aggregate_measurements;

/// Read-only tables shared by every test of a run
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub layouts: FieldLayoutTable,
    pub expectations: ExpectationTable,
    pub settings: AnalysisSettings,
    /// Measurement overrides per test
    pub plans: BTreeMap<TestName, Vec<String>>,
    extractor: SignalExtractor,
}

impl EngineContext {
    pub fn new(
        layouts: FieldLayoutTable,
        expectations: ExpectationTable,
        settings: AnalysisSettings,
    ) -> Self {
        let extractor = SignalExtractor::new(
            settings.peaks,
            settings.pattern,
            MarocCommandBuilder::new().build(true),
        );
        Self {
            layouts,
            expectations,
            settings,
            plans: BTreeMap::new(),
            extractor,
        }
    }

    /// Set the MAROC tags the echo is compared against
    pub fn with_maroc_tags(mut self, tags: &MarocTagTable) -> EngineResult<Self> {
        self.extractor.maroc_command = MarocCommandBuilder::from_tags(tags)?.build(true);
        Ok(self)
    }

    /// Restrict a test to the given measurements
    pub fn with_plan(mut self, test: TestName, measurements: Vec<String>) -> Self {
        self.plans.insert(test, measurements);
        self
    }

    /// Build a context from a loaded configuration
    pub fn from_config(config: &AutotestConfig) -> Result<Self, ConfigError> {
        let mut ctx = Self::new(
            config.layouts()?,
            config.expectations()?,
            config.analysis.clone(),
        )
        .with_maroc_tags(&config.maroc_tags()?)
        .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

        for (name, plan) in &config.tests {
            let test: TestName = name
                .parse()
                .map_err(|e: EngineError| ConfigError::InvalidValue(e.to_string()))?;
            if let Some(measurements) = &plan.measurements {
                ctx = ctx.with_plan(test, measurements.clone());
            }
        }
        Ok(ctx)
    }

    /// Expected MAROC command used for echo comparison
    pub fn maroc_command(&self) -> &[u8] {
        &self.extractor.maroc_command
    }

    /// Measurements to evaluate for a test, paired with their expectations
    ///
    /// Without an override the expectation keys of the test form the plan.
    fn plan(&self, test: TestName) -> EngineResult<Vec<(MeasurementKind, &Expectation)>> {
        let name = test.as_str();
        let measurements = match self.plans.get(&test) {
            Some(list) => list.clone(),
            None => self.expectations.measurement_names(name),
        };
        if measurements.is_empty() {
            return Err(EngineError::NoExpectations {
                test: name.to_string(),
            });
        }

        measurements
            .iter()
            .map(|m| {
                let kind = test.resolve(m).ok_or_else(|| EngineError::UnknownMeasurement {
                    test: name.to_string(),
                    measurement: m.clone(),
                })?;
                let expectation =
                    self.expectations
                        .get(name, m)
                        .ok_or_else(|| EngineError::MissingExpectation {
                            test: name.to_string(),
                            measurement: m.clone(),
                        })?;
                Ok((kind, expectation))
            })
            .collect()
    }
}

/// Tracks the stage of one test and enforces valid transitions
struct StageTracker {
    test: TestName,
    stage: TestStage,
}

impl StageTracker {
    fn new(test: TestName) -> Self {
        Self {
            test,
            stage: TestStage::NotRun,
        }
    }

    fn advance(&mut self, next: TestStage) {
        if !self.stage.can_transition_to(next) {
            warn!(test = %self.test, from = %self.stage, to = %next, "Invalid stage transition");
            return;
        }
        debug!(test = %self.test, from = %self.stage, to = %next, "Stage transition");
        self.stage = next;
    }
}

/// Runs tests against an [`EngineContext`]
#[derive(Debug, Clone, Copy)]
pub struct TestRunner<'a> {
    ctx: &'a EngineContext,
}

impl<'a> TestRunner<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// Run the requested tests in order
    ///
    /// Every requested test appears exactly once in the report; duplicates
    /// are collapsed keeping the first occurrence.
    pub fn run(&self, tests: &[TestName], captures: &CaptureSet) -> Report {
        let outcomes = unique(tests)
            .into_iter()
            .map(|test| self.run_test(test, captures.packets(test)))
            .collect();
        self.finish(outcomes)
    }

    /// Run the requested tests on scoped threads
    ///
    /// Produces the same report as [`TestRunner::run`].
    pub fn run_parallel(&self, tests: &[TestName], captures: &CaptureSet) -> Report {
        let tests = unique(tests);
        let outcomes = std::thread::scope(|scope| {
            let handles: Vec<_> = tests
                .iter()
                .map(|&test| {
                    let packets = captures.packets(test);
                    (test, scope.spawn(move || self.run_test(test, packets)))
                })
                .collect();

            handles
                .into_iter()
                .map(|(test, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        let err = EngineError::config("analysis thread panicked");
                        TestOutcome::failed(test, TestStage::NotRun, &err)
                    })
                })
                .collect()
        });
        self.finish(outcomes)
    }

    fn finish(&self, outcomes: Vec<TestOutcome>) -> Report {
        let report = Report::new(outcomes);
        let counts = report.counts();
        info!(
            passed = counts.passed,
            failed_mismatch = counts.failed_mismatch,
            failed_error = counts.failed_error,
            skipped = counts.skipped,
            "Autotest run complete"
        );
        report
    }

    /// Run a single test over its capture window
    pub fn run_test(&self, test: TestName, packets: &[RawPacket]) -> TestOutcome {
        let mut tracker = StageTracker::new(test);
        match self.execute(test, packets, &mut tracker) {
            Ok(verdicts) => {
                tracker.advance(TestStage::Done);
                let outcome = TestOutcome::completed(test, verdicts);
                info!(test = %test, category = ?outcome.category, "Test finished");
                outcome
            }
            Err(e) => {
                let failed_at = tracker.stage;
                tracker.advance(TestStage::Failed);
                warn!(test = %test, stage = %failed_at, error = %e, "Test failed");
                TestOutcome::failed(test, failed_at, &e)
            }
        }
    }

    fn execute(
        &self,
        test: TestName,
        packets: &[RawPacket],
        tracker: &mut StageTracker,
    ) -> EngineResult<Vec<Verdict>> {
        let ctx = self.ctx;

        tracker.advance(TestStage::Decoding);
        let decoder = PacketDecoder::with_options(
            &ctx.layouts,
            DecodeOptions {
                require_timing: test.requires_timing(),
                sequence_modulus: ctx.settings.sequence_modulus,
            },
        );
        let records = decoder.decode_window(packets)?;
        debug!(test = %test, records = records.len(), "Decoded capture window");

        tracker.advance(TestStage::Extracting);
        let plan = ctx.plan(test)?;
        // Disabled entries are not measured
        let series = plan
            .iter()
            .map(|(kind, expectation)| {
                if !expectation.enabled {
                    return Ok(None);
                }
                ctx.extractor
                    .extract(&expectation.name, kind, &records)
                    .map(Some)
            })
            .collect::<EngineResult<Vec<Option<Vec<Measurement>>>>>()?;

        tracker.advance(TestStage::Aggregating);
        let observations = plan
            .iter()
            .zip(&series)
            .map(|((_, expectation), measurements)| {
                measurements
                    .as_ref()
                    .map(|m| aggregate_measurements(&expectation.name, m))
                    .transpose()
            })
            .collect::<EngineResult<Vec<_>>>()?;

        tracker.advance(TestStage::Evaluating);
        Ok(plan
            .iter()
            .zip(observations)
            .map(|((_, expectation), observed)| match observed {
                Some(observed) => evaluate(test.as_str(), observed, expectation),
                None => skip_disabled(test.as_str(), expectation),
            })
            .collect())
    }
}

fn unique(tests: &[TestName]) -> Vec<TestName> {
    let mut out = Vec::with_capacity(tests.len());
    for &t in tests {
        if !out.contains(&t) {
            out.push(t);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{encode_science, PacketKind, ScienceHeader};

    fn ph_packets(n: usize) -> Vec<RawPacket> {
        let layouts = FieldLayoutTable::default();
        (0..n)
            .map(|i| {
                let header = ScienceHeader {
                    packet_no: i as u16,
                    ..ScienceHeader::default()
                };
                let samples = [0, 10, 200, 900, 200, 10, 0, 0];
                RawPacket::new(
                    PacketKind::Ph,
                    encode_science(&layouts.ph, &header, &samples),
                    i as u64 * 1000,
                )
            })
            .collect()
    }

    fn context() -> EngineContext {
        let mut expectations = ExpectationTable::default();
        expectations.insert("ph_data", Expectation::numeric("ph_max", 900.0, 1.0));
        expectations.insert("ph_peaks", Expectation::numeric("ph_peak_count", 1.0, 0.0));
        expectations.insert("hk_time", Expectation::numeric("hk_interval", 1.0, 0.1));
        EngineContext::new(
            FieldLayoutTable::default(),
            expectations,
            AnalysisSettings::default(),
        )
    }

    #[test]
    fn test_run_passes_and_isolates_errors() {
        let ctx = context();
        let mut captures = CaptureSet::default();
        captures.insert(TestName::PhData, ph_packets(5));
        captures.insert(TestName::PhPeaks, ph_packets(5));

        let report = TestRunner::new(&ctx).run(
            &[TestName::PhData, TestName::HkTime, TestName::PhPeaks],
            &captures,
        );
        assert_eq!(report.outcomes.len(), 3);

        let ph = report.outcome(TestName::PhData).unwrap();
        assert_eq!(ph.category, OutcomeCategory::Passed);
        assert_eq!(ph.verdicts.len(), 1);

        let hk = report.outcome(TestName::HkTime).unwrap();
        assert_eq!(hk.category, OutcomeCategory::FailedError);
        assert_eq!(hk.error.as_ref().unwrap().stage, TestStage::Extracting);

        assert_eq!(
            report.outcome(TestName::PhPeaks).unwrap().category,
            OutcomeCategory::Passed
        );
    }

    #[test]
    fn test_duplicates_collapsed_in_order() {
        let ctx = context();
        let captures = CaptureSet::default();
        let report = TestRunner::new(&ctx).run(
            &[TestName::HkTime, TestName::PhData, TestName::HkTime],
            &captures,
        );
        let names: Vec<_> = report.outcomes.iter().map(|o| o.test_name).collect();
        assert_eq!(names, vec![TestName::HkTime, TestName::PhData]);
    }

    #[test]
    fn test_no_expectations() {
        let ctx = context();
        let outcome = TestRunner::new(&ctx).run_test(TestName::Mac, &[]);
        assert_eq!(outcome.category, OutcomeCategory::FailedError);
        assert!(outcome.error.unwrap().message.contains("No expectations"));
    }

    #[test]
    fn test_plan_override_errors() {
        let ctx = context().with_plan(TestName::PhData, vec!["ph_mean".to_string()]);
        let outcome = TestRunner::new(&ctx).run_test(TestName::PhData, &ph_packets(2));
        let failure = outcome.error.unwrap();
        assert!(failure.message.contains("Missing expectation"));

        let ctx = context().with_plan(TestName::PhData, vec!["hk_interval".to_string()]);
        let outcome = TestRunner::new(&ctx).run_test(TestName::PhData, &ph_packets(2));
        assert!(outcome.error.unwrap().message.contains("Unknown measurement"));
    }

    #[test]
    fn test_malformed_packet_fails_in_decoding() {
        let ctx = context();
        let mut packets = ph_packets(3);
        packets[1].bytes.truncate(15);
        let outcome = TestRunner::new(&ctx).run_test(TestName::PhData, &packets);
        let failure = outcome.error.unwrap();
        assert_eq!(failure.stage, TestStage::Decoding);
        assert_eq!(failure.category, crate::common::ErrorCategory::Packet);
        assert!(failure.message.contains("index 1"));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let ctx = context();
        let mut captures = CaptureSet::default();
        captures.insert(TestName::PhData, ph_packets(4));
        captures.insert(TestName::PhPeaks, ph_packets(4));
        let tests = [TestName::PhPeaks, TestName::HkTime, TestName::PhData];

        let runner = TestRunner::new(&ctx);
        let seq = runner.run(&tests, &captures);
        let par = runner.run_parallel(&tests, &captures);
        assert_eq!(seq.outcomes, par.outcomes);
    }
}
