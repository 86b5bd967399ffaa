//! End-to-end engine scenarios: packets in, report out
//!
//! Random inputs come from seeded generators so failures reproduce.

use quabo_autotest::capture::{CaptureHeader, CaptureSet};
use quabo_autotest::common::{EngineError, ErrorCategory};
use quabo_autotest::config::{AnalysisSettings, AutotestConfig, FieldLayoutTable};
use quabo_autotest::decoder::{
    covered_bytes, decode_hk, encode_hk, encode_science, PacketKind, RawPacket, ScienceHeader,
    WrTimestamp,
};
use quabo_autotest::emulator::{Emulator, EmulatorConfig};
use quabo_autotest::evaluator::{evaluate, Expectation, ExpectationTable, VerdictReason};
use quabo_autotest::extractor::{deltas, find_peaks, PeakConfig};
use quabo_autotest::orchestrator::{EngineContext, OutcomeCategory, TestName, TestRunner, TestStage};
use quabo_autotest::stats::{aggregate, Observation};
use rand::prelude::*;
use rand::rngs::StdRng;

fn pulse_packets(n: usize) -> Vec<RawPacket> {
    let layouts = FieldLayoutTable::default();
    (0..n)
        .map(|i| {
            let header = ScienceHeader {
                packet_no: i as u16,
                boardloc: 0x0101,
                timestamp: WrTimestamp::new(100, i as u32 * 1000),
                ..ScienceHeader::default()
            };
            let mut samples = vec![0; 32];
            let at = 8 + i % 10;
            samples[at - 2] = 150;
            samples[at - 1] = 600;
            samples[at] = 1000 + i as i32;
            samples[at + 1] = 600;
            samples[at + 2] = 150;
            RawPacket::new(
                PacketKind::Ph,
                encode_science(&layouts.ph, &header, &samples),
                1_000_000 + i as u64 * 1_000_000,
            )
        })
        .collect()
}

fn hk_packet(boardloc: u16, capture_ns: u64) -> RawPacket {
    let mut bytes = vec![0u8; 64];
    bytes[2..4].copy_from_slice(&boardloc.to_be_bytes());
    bytes[44..52].copy_from_slice(&0x0011_2233_4455_6677u64.to_be_bytes());
    RawPacket::new(PacketKind::Hk, bytes, capture_ns)
}

fn context(expectations: ExpectationTable) -> EngineContext {
    EngineContext::new(
        FieldLayoutTable::default(),
        expectations,
        AnalysisSettings::default(),
    )
}

#[test]
fn test_one_pulse_per_packet_gives_unit_peak_count() {
    let mut expectations = ExpectationTable::default();
    expectations.insert("ph_peaks", Expectation::numeric("ph_peak_count", 1.0, 0.0));
    let ctx = context(expectations);

    let outcome = TestRunner::new(&ctx).run_test(TestName::PhPeaks, &pulse_packets(10));
    assert_eq!(outcome.category, OutcomeCategory::Passed);

    let verdict = &outcome.verdicts[0];
    let Some(Observation::Summary(summary)) = &verdict.observed else {
        panic!("expected numeric summary");
    };
    assert_eq!(summary.n, 10);
    assert_eq!(summary.mean, 1.0);
    assert_eq!(summary.stdev, 0.0);
    assert!(!summary.low_confidence);
}

#[test]
fn test_board_ip_exact_match() {
    let expectations = ExpectationTable::from_json(
        r#"{"mac": {"board_ip": {"val": "192.168.1.1", "valid": true}}}"#,
    )
    .unwrap();
    let ctx = context(expectations);
    let packets = vec![hk_packet(0x0101, 10), hk_packet(0x0101, 20)];

    let outcome = TestRunner::new(&ctx).run_test(TestName::Mac, &packets);
    assert_eq!(outcome.category, OutcomeCategory::Passed);
    let Some(Observation::Exact(exact)) = &outcome.verdicts[0].observed else {
        panic!("expected exact observation");
    };
    assert_eq!(exact.value, "192.168.1.1");

    let outcome = TestRunner::new(&ctx).run_test(TestName::Mac, &[hk_packet(0x0102, 10)]);
    assert_eq!(outcome.category, OutcomeCategory::FailedMismatch);
}

#[test]
fn test_disabled_measurement_missing_from_window_does_not_fail() {
    let expectations = ExpectationTable::from_json(
        r#"{"mac": {
            "board_ip": {"val": "192.168.1.1", "valid": true},
            "ph_dest_mac": {"val": "ff:ff:ff:ff:ff:ff", "valid": false}
        }}"#,
    )
    .unwrap();
    let ctx = context(expectations);

    // HK only: no destination MAC reply to extract from
    let packets = vec![hk_packet(0x0101, 10), hk_packet(0x0101, 20)];
    let outcome = TestRunner::new(&ctx).run_test(TestName::Mac, &packets);

    assert_eq!(outcome.category, OutcomeCategory::Passed, "{:?}", outcome);
    assert!(outcome.error.is_none());
    assert_eq!(outcome.verdicts.len(), 2);
    let dest = outcome
        .verdicts
        .iter()
        .find(|v| v.measurement_name == "ph_dest_mac")
        .unwrap();
    assert!(dest.passed());
    assert_eq!(dest.reason, VerdictReason::Disabled);
    assert!(dest.observed.is_none());
}

#[test]
fn test_all_disabled_window_without_samples_is_skipped() {
    let mut expectations = ExpectationTable::default();
    expectations.insert(
        "hk_time",
        Expectation::numeric("hk_interval", 1.0, 0.1).disabled(),
    );
    let ctx = context(expectations);

    let outcome = TestRunner::new(&ctx).run_test(TestName::HkTime, &[]);
    assert_eq!(outcome.category, OutcomeCategory::Skipped);
    assert_eq!(outcome.stage, TestStage::Done);
}

#[test]
fn test_empty_hk_time_window_isolated() {
    let mut expectations = ExpectationTable::default();
    expectations.insert("hk_time", Expectation::numeric("hk_interval", 1.0, 0.1));
    expectations.insert("ph_data", Expectation::numeric("ph_max", 1004.5, 5.0));
    let ctx = context(expectations);

    let mut captures = CaptureSet::default();
    captures.insert(TestName::PhData, pulse_packets(10));

    let report = TestRunner::new(&ctx).run(&[TestName::HkTime, TestName::PhData], &captures);
    assert_eq!(report.outcomes.len(), 2);

    let hk = report.outcome(TestName::HkTime).unwrap();
    assert_eq!(hk.stage, TestStage::Failed);
    assert_eq!(hk.category, OutcomeCategory::FailedError);
    let failure = hk.error.as_ref().unwrap();
    assert_eq!(failure.category, ErrorCategory::Samples);
    assert_eq!(
        failure.message,
        EngineError::insufficient("hk_interval", 2, 0).to_string()
    );

    assert_eq!(
        report.outcome(TestName::PhData).unwrap().category,
        OutcomeCategory::Passed
    );
    assert!(!report.all_passed());
}

#[test]
fn test_evaluator_deviation_boundary() {
    let expectation = Expectation::numeric("hk_interval", 2.5, 0.5);
    let at_edge = evaluate(
        "hk_time",
        Observation::Summary(aggregate("hk_interval", &[3.0]).unwrap()),
        &expectation,
    );
    assert!(at_edge.passed());

    let beyond = evaluate(
        "hk_time",
        Observation::Summary(aggregate("hk_interval", &[3.01]).unwrap()),
        &expectation,
    );
    assert!(!beyond.passed());
}

#[test]
fn test_interval_deltas_sum_to_span() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..50 {
        let n = rng.gen_range(2..100);
        let mut t = rng.gen_range(0..1_000_000u64);
        let timestamps: Vec<u64> = (0..n)
            .map(|_| {
                t += rng.gen_range(1..10_000);
                t
            })
            .collect();

        let d = deltas("ph_interval", &timestamps).unwrap();
        assert_eq!(d.len(), n - 1);
        assert_eq!(d.iter().sum::<u64>(), timestamps[n - 1] - timestamps[0]);
    }
}

#[test]
fn test_aggregate_bounds() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..50 {
        let n = rng.gen_range(1..200);
        let values: Vec<f64> = (0..n).map(|_| rng.gen_range(-1e6..1e6)).collect();
        let s = aggregate("x", &values).unwrap();
        assert!(s.min <= s.mean && s.mean <= s.max);
        assert!(s.stdev >= 0.0);
        assert_eq!(s.n, n);
    }
}

#[test]
fn test_peak_detection_idempotent() {
    let mut rng = StdRng::seed_from_u64(3);
    let config = PeakConfig::default();
    for _ in 0..50 {
        let samples: Vec<i32> = (0..128).map(|_| rng.gen_range(-50..2000)).collect();
        let first = find_peaks(&samples, &config);
        let second = find_peaks(&samples, &config);
        assert_eq!(first, second);
    }
}

#[test]
fn test_hk_reencode_preserves_field_bytes() {
    let layout = FieldLayoutTable::default().hk;
    let covered = covered_bytes(&layout);
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..50 {
        let bytes: Vec<u8> = (0..layout.packet_len).map(|_| rng.gen()).collect();
        let record = decode_hk(&layout, &bytes, 0).unwrap();
        let encoded = encode_hk(&layout, &record).unwrap();
        for (i, c) in covered.iter().enumerate() {
            if *c {
                assert_eq!(encoded[i], bytes[i], "byte {} differs", i);
            }
        }
    }
}

#[test]
fn test_emulated_board_passes_every_test() {
    let mut emulator =
        Emulator::new(EmulatorConfig::default(), FieldLayoutTable::default()).unwrap();
    let captures = emulator.capture_set().unwrap();
    let ctx = context(emulator.expectations().unwrap());

    let report = TestRunner::new(&ctx).run(&TestName::ALL, &captures);
    for outcome in &report.outcomes {
        assert_eq!(
            outcome.category,
            OutcomeCategory::Passed,
            "{} did not pass: {:?}",
            outcome.test_name,
            outcome
        );
    }
    assert_eq!(report.counts().passed, TestName::ALL.len());
}

#[test]
fn test_emulated_capture_through_file_and_config() {
    let dir = std::env::temp_dir().join(format!("quabo_scenario_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let mut emulator = Emulator::new(
        EmulatorConfig {
            seed: 5,
            ..Default::default()
        },
        FieldLayoutTable::default(),
    )
    .unwrap();
    let captures = emulator.capture_set().unwrap();
    let capture_path = dir.join("run.qcap");
    captures
        .write_file(&capture_path, &CaptureHeader::new("0011223344556677", "192.168.1.1"))
        .unwrap();
    std::fs::write(
        dir.join("expectations.json"),
        emulator.expectations().unwrap().to_json().unwrap(),
    )
    .unwrap();
    let config_path = dir.join("autotest.toml");
    std::fs::write(
        &config_path,
        "expectations_file = \"expectations.json\"\n\n[tests.ph_data]\nmeasurements = [\"ph_max\"]\n",
    )
    .unwrap();

    let config = AutotestConfig::load(&config_path).unwrap();
    let ctx = EngineContext::from_config(&config).unwrap();
    let (_, restored) = CaptureSet::read_file(&capture_path).unwrap();

    let runner = TestRunner::new(&ctx);
    let report = runner.run_parallel(&TestName::ALL, &restored);
    assert!(report.all_passed(), "{}", report.to_json().unwrap());
    assert_eq!(
        report.outcome(TestName::PhData).unwrap().verdicts.len(),
        1
    );

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_maroc_echo_mismatch_reported() {
    let mut expectations = ExpectationTable::default();
    expectations.insert("maroc", Expectation::exact("maroc_echo", "match"));
    expectations.insert("maroc", Expectation::numeric("maroc_mismatches", 0.0, 0.0));
    let ctx = context(expectations);

    let mut emulator =
        Emulator::new(EmulatorConfig::default(), FieldLayoutTable::default()).unwrap();
    let mut echo = emulator.maroc_echo().unwrap();
    let good = TestRunner::new(&ctx).run_test(TestName::Maroc, std::slice::from_ref(&echo));
    assert_eq!(good.category, OutcomeCategory::Passed);

    echo.bytes.truncate(100);
    let bad = TestRunner::new(&ctx).run_test(TestName::Maroc, &[echo]);
    assert_eq!(bad.category, OutcomeCategory::FailedMismatch);
    assert!(bad.verdicts.iter().all(|v| !v.passed()));
}
